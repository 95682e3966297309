use std::{
    collections::BTreeMap,
    fmt, fs, io,
    path::{Component, Path, PathBuf},
    sync::RwLock,
};

use thiserror::Error;

/// 儲存操作可能發生的錯誤類型。
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("Key is invalid: {0}")]
    InvalidKey(String),
    #[error("Key not found: {0}")]
    NotFound(String),
    #[error("Key is a dir: {0}")]
    IsDir(String),
    #[error("Not a directory: {0}")]
    NotDirectory(String),
    #[error("Lock poisoned")]
    LockPoisoned,
    #[error("File is not valid UTF-8: {0}")]
    NotUtf8(String),
}

/// 儲存操作的結果類型，封裝 [`StorageError`]。
pub type Result<T> = std::result::Result<T, StorageError>;

/// 帳戶金鑰、訂單快取與憑證檔案的持久化介面。key 一律為以 `/` 分隔的相對路徑。
pub trait Storage: Send + Sync + fmt::Debug {
    /// 建立指定 key 所對應的目錄樹，若不存在則自動建立。
    fn create_dir_all(&self, key: &str) -> Result<()>;

    /// 讀取指定 key 所對應檔案的內容。
    fn read_file(&self, key: &str) -> Result<Vec<u8>>;

    /// 將資料寫入指定 key 所對應的檔案中，覆寫既有內容。
    fn write_file(&self, key: &str, value: &[u8]) -> Result<()>;

    /// 刪除指定 key 所對應的檔案或目錄；不存在時不視為錯誤。
    fn remove(&self, key: &str) -> Result<()>;

    /// 檢查指定 key 是否存在於儲存系統中。
    fn exists(&self, key: &str) -> Result<bool>;

    /// 判斷指定 key 是否為目錄。
    fn is_dir(&self, key: &str) -> Result<bool>;

    /// key 在本機檔案系統上的實際路徑；純記憶體實作回傳 `None`。
    fn path_of(&self, _key: &str) -> Option<PathBuf> {
        None
    }

    /// 讀取 UTF-8 文字檔。
    fn read_to_string(&self, key: &str) -> Result<String> {
        String::from_utf8(self.read_file(key)?).map_err(|_| StorageError::NotUtf8(key.to_string()))
    }

    /// 預設方法：確保給定路徑的父目錄存在且為目錄，否則嘗試建立。
    fn ensure_parent_directory(&self, path: &Path) -> Result<()> {
        if let Some(parent) = KeyUtils::parent(path) {
            let parent_key = parent.to_string_lossy();
            if !self.exists(&parent_key)? {
                self.create_dir_all(&parent_key)?;
            } else if !self.is_dir(&parent_key)? {
                return Err(StorageError::NotDirectory(parent_key.into_owned()));
            }
        }
        Ok(())
    }
}

/// 私有工具，提供 key 正規化與驗證等輔助函式。
struct KeyUtils;

impl KeyUtils {
    /// 正規化 key 字串為以 `/` 起始的路徑，並檢查不合法字元與格式。
    fn normalize(key: &str) -> Result<PathBuf> {
        if key.is_empty() {
            return Err(StorageError::InvalidKey("Empty key".to_string()));
        }
        if key.contains('\0') || key.contains('\n') || key.contains('\r') {
            return Err(StorageError::InvalidKey(format!(
                "Invalid characters in key: {}",
                key
            )));
        }
        if key.contains("//") {
            return Err(StorageError::InvalidKey(format!(
                "Double slashes not allowed in key: {}",
                key
            )));
        }
        let mut normalized = PathBuf::from("/");
        for component in Path::new(key).components() {
            match component {
                Component::RootDir => normalized = PathBuf::from("/"),
                Component::CurDir => {}
                Component::ParentDir => {
                    if normalized.as_os_str() == "/" {
                        return Err(StorageError::InvalidKey(format!(
                            "Cannot use '..' to escape root directory: {}",
                            key
                        )));
                    }
                    normalized.pop();
                }
                Component::Normal(name) => match name.to_str() {
                    Some(name_str) if !name_str.contains('\\') => normalized.push(name_str),
                    _ => {
                        return Err(StorageError::InvalidKey(format!(
                            "Invalid path component in: {}",
                            key
                        )))
                    }
                },
                _ => return Err(StorageError::InvalidKey(format!("Invalid path: {}", key))),
            }
        }
        Ok(normalized)
    }

    fn parent(path: &Path) -> Option<PathBuf> {
        path.parent().map(|p| p.to_path_buf())
    }

    /// 驗證檔案 key：不可以斜線結尾，也不可指向根目錄。
    fn verify_file_key(key: &str) -> Result<PathBuf> {
        let path = Self::normalize(key)?;
        if key.ends_with('/') || path.as_os_str() == "/" {
            return Err(StorageError::InvalidKey(format!(
                "File key cannot end with '/': {}",
                key
            )));
        }
        Ok(path)
    }

    /// 去除開頭的 `/`，得到相對於儲存根目錄的路徑。
    fn relative(path: &Path) -> &Path {
        path.strip_prefix("/").unwrap_or(path)
    }
}

/// 以本機目錄為根的儲存實作，每個 key 對應一個實際檔案。
///
/// 在 Unix 上，寫入的檔案權限為 `0600`（內含私鑰）。
#[derive(Debug, Clone)]
pub struct FileStorage {
    root: PathBuf,
}

impl FileStorage {
    /// 開啟（必要時建立）根目錄。
    pub fn open<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        self.root.join(KeyUtils::relative(path))
    }

    fn not_found_or(key: &str, err: io::Error) -> StorageError {
        if err.kind() == io::ErrorKind::NotFound {
            StorageError::NotFound(key.to_string())
        } else {
            StorageError::Io(err)
        }
    }
}

impl Storage for FileStorage {
    fn create_dir_all(&self, key: &str) -> Result<()> {
        let target = self.resolve(&KeyUtils::normalize(key)?);
        if target.is_file() {
            return Err(StorageError::NotDirectory(key.to_string()));
        }
        fs::create_dir_all(target)?;
        Ok(())
    }

    fn read_file(&self, key: &str) -> Result<Vec<u8>> {
        let target = self.resolve(&KeyUtils::verify_file_key(key)?);
        if target.is_dir() {
            return Err(StorageError::IsDir(key.to_string()));
        }
        fs::read(&target).map_err(|e| Self::not_found_or(key, e))
    }

    fn write_file(&self, key: &str, value: &[u8]) -> Result<()> {
        let path = KeyUtils::verify_file_key(key)?;
        self.ensure_parent_directory(&path)?;
        let target = self.resolve(&path);
        if target.is_dir() {
            return Err(StorageError::IsDir(key.to_string()));
        }

        #[cfg(unix)]
        {
            use std::{io::Write, os::unix::fs::OpenOptionsExt};
            let mut file = fs::OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .mode(0o600)
                .open(&target)?;
            file.write_all(value)?;
        }
        #[cfg(not(unix))]
        fs::write(&target, value)?;

        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        let target = self.resolve(&KeyUtils::normalize(key)?);
        let result = if target.is_dir() {
            fs::remove_dir_all(&target)
        } else {
            fs::remove_file(&target)
        };
        match result {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }

    fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.resolve(&KeyUtils::normalize(key)?).exists())
    }

    fn is_dir(&self, key: &str) -> Result<bool> {
        Ok(self.resolve(&KeyUtils::normalize(key)?).is_dir())
    }

    fn path_of(&self, key: &str) -> Option<PathBuf> {
        KeyUtils::normalize(key).ok().map(|p| self.resolve(&p))
    }
}

/// 記憶體中的一個節點。
#[derive(Debug, Clone)]
enum Entry {
    File(Vec<u8>),
    Dir,
}

/// 純記憶體的儲存實作，測試與不需持久化的流程使用。
///
/// 所有節點存放在同一張以正規化路徑排序的表中，刪除目錄時以前綴一次移除整棵子樹。
#[derive(Debug)]
pub struct MemStorage {
    entries: RwLock<BTreeMap<PathBuf, Entry>>,
}

impl Default for MemStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl MemStorage {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(BTreeMap::from([(PathBuf::from("/"), Entry::Dir)])),
        }
    }

    fn entry(&self, key: &str) -> Result<Option<Entry>> {
        let path = KeyUtils::normalize(key)?;
        let entries = self.entries.read().map_err(|_| StorageError::LockPoisoned)?;
        Ok(entries.get(&path).cloned())
    }
}

impl Storage for MemStorage {
    fn create_dir_all(&self, key: &str) -> Result<()> {
        let path = KeyUtils::normalize(key)?;
        let mut entries = self.entries.write().map_err(|_| StorageError::LockPoisoned)?;

        let mut current = PathBuf::from("/");
        for component in path.components().skip(1) {
            current.push(component);
            match entries.get(&current) {
                Some(Entry::File(_)) => {
                    return Err(StorageError::NotDirectory(
                        current.to_string_lossy().into_owned(),
                    ))
                }
                Some(Entry::Dir) => {}
                None => {
                    entries.insert(current.clone(), Entry::Dir);
                }
            }
        }
        Ok(())
    }

    fn read_file(&self, key: &str) -> Result<Vec<u8>> {
        KeyUtils::verify_file_key(key)?;
        match self.entry(key)? {
            Some(Entry::File(data)) => Ok(data),
            Some(Entry::Dir) => Err(StorageError::IsDir(key.to_string())),
            None => Err(StorageError::NotFound(key.to_string())),
        }
    }

    fn write_file(&self, key: &str, value: &[u8]) -> Result<()> {
        let path = KeyUtils::verify_file_key(key)?;
        self.ensure_parent_directory(&path)?;

        let mut entries = self.entries.write().map_err(|_| StorageError::LockPoisoned)?;
        if let Some(Entry::Dir) = entries.get(&path) {
            return Err(StorageError::IsDir(key.to_string()));
        }
        entries.insert(path, Entry::File(value.to_vec()));
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        let path = KeyUtils::normalize(key)?;
        if path.as_os_str() == "/" {
            return Err(StorageError::InvalidKey("Cannot remove the root".to_string()));
        }
        self.entries
            .write()
            .map_err(|_| StorageError::LockPoisoned)?
            .retain(|p, _| !p.starts_with(&path));
        Ok(())
    }

    fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.entry(key)?.is_some())
    }

    fn is_dir(&self, key: &str) -> Result<bool> {
        Ok(matches!(self.entry(key)?, Some(Entry::Dir)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn exercise(storage: &dyn Storage) -> Result<()> {
        storage.create_dir_all("dir1/")?;
        assert!(storage.is_dir("dir1/")?);

        storage.write_file("dir1/file1.txt", b"Hello")?;
        assert_eq!(storage.read_file("dir1/file1.txt")?, b"Hello");
        storage.write_file("dir1/file1.txt", b"Hi")?;
        assert_eq!(storage.read_to_string("dir1/file1.txt")?, "Hi");

        assert!(storage.exists("dir1/file1.txt")?);
        storage.remove("dir1/file1.txt")?;
        assert!(!storage.exists("dir1/file1.txt")?);
        assert!(matches!(
            storage.read_file("dir1/file1.txt"),
            Err(StorageError::NotFound(_))
        ));
        storage.remove("dir1/file1.txt")?;
        Ok(())
    }

    #[test]
    fn test_mem_storage_basic_operations() -> Result<()> {
        exercise(&MemStorage::new())
    }

    #[test]
    fn test_file_storage_basic_operations() -> Result<()> {
        let temp_dir = tempdir()?;
        exercise(&FileStorage::open(temp_dir.path())?)
    }

    #[test]
    fn test_invalid_keys() {
        let storage = MemStorage::new();
        assert!(matches!(
            storage.write_file("invalid/", b"data"),
            Err(StorageError::InvalidKey(_))
        ));
        assert!(matches!(
            storage.read_file("../escape"),
            Err(StorageError::InvalidKey(_))
        ));
        assert!(matches!(
            storage.read_file("a//b"),
            Err(StorageError::InvalidKey(_))
        ));
    }

    #[test]
    fn test_file_storage_layout_on_disk() -> Result<()> {
        let temp_dir = tempdir()?;
        let storage = FileStorage::open(temp_dir.path())?;
        storage.write_file("abcdefgh/rsa/ORDER", b"{}")?;

        let on_disk = temp_dir.path().join("abcdefgh").join("rsa").join("ORDER");
        assert!(on_disk.is_file());
        assert_eq!(storage.path_of("abcdefgh/rsa/ORDER"), Some(on_disk));

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = fs::metadata(temp_dir.path().join("abcdefgh/rsa/ORDER"))?
                .permissions()
                .mode();
            assert_eq!(mode & 0o777, 0o600);
        }
        Ok(())
    }

    #[test]
    fn test_remove_directory_recursively() -> Result<()> {
        let mem = MemStorage::new();
        mem.write_file("ns/rsa/private.pem", b"k")?;
        mem.remove("ns/rsa")?;
        assert!(!mem.exists("ns/rsa/private.pem")?);
        assert!(mem.exists("ns")?);

        let temp_dir = tempdir()?;
        let file = FileStorage::open(temp_dir.path())?;
        file.write_file("ns/rsa/private.pem", b"k")?;
        file.remove("ns/rsa")?;
        assert!(!file.exists("ns/rsa")?);
        Ok(())
    }
}
