use std::result;

use openssl::{
    hash::MessageDigest,
    nid::Nid,
    stack::Stack,
    x509::{
        extension::{BasicConstraints, KeyUsage, SubjectAlternativeName},
        X509NameBuilder, X509Req,
    },
};
use thiserror::Error;

use crate::key_pair::KeyPair;

/// 用於描述建立 CSR（證書簽名請求）過程中可能發生的錯誤。
#[derive(Debug, Error)]
pub enum CsrError {
    #[error("Openssl error: {0}")]
    OpensslError(#[from] openssl::error::ErrorStack),
    #[error("No SAN entries")]
    NoSanEntries,
}

type Result<T> = result::Result<T, CsrError>;

/// CSR 建構器：每個域名都會成為一筆 DNS 主體替代名稱 (SAN)。
///
/// # 範例
///
/// ```no_run
/// # use acme2::csr::Csr;
/// # use acme2::key_pair::{KeyAlgorithm, KeyPair};
/// let key_pair = KeyPair::generate(KeyAlgorithm::Ec).unwrap();
/// let csr = Csr::new(["example.com", "www.example.com"])
///     .build(&key_pair)
///     .unwrap();
/// ```
pub struct Csr {
    san_entries: Vec<String>,
    common_name: Option<String>,
}

impl Csr {
    pub fn new<I, S>(domains: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Csr {
            san_entries: domains.into_iter().map(Into::into).collect(),
            common_name: None,
        }
    }

    /// 指定主體的 CN。未指定時使用 [`common_name_for_csr`] 的結果。
    pub fn common_name(mut self, common_name: impl Into<String>) -> Self {
        self.common_name = Some(common_name.into());
        self
    }

    /// 以 `key_pair` 簽署 CSR（SHA-256）。
    ///
    /// 除 SAN 外另加上 `basicConstraints=CA:FALSE` 與
    /// `keyUsage=nonRepudiation,digitalSignature,keyEncipherment`。
    ///
    /// # 錯誤
    ///
    /// 未設定任何 SAN 時回傳 [`CsrError::NoSanEntries`]。
    pub fn build(self, key_pair: &KeyPair) -> Result<X509Req> {
        if self.san_entries.is_empty() {
            return Err(CsrError::NoSanEntries);
        }

        let common_name = match self.common_name {
            Some(cn) => cn,
            None => common_name_for_csr(&self.san_entries).ok_or(CsrError::NoSanEntries)?,
        };

        let mut req_builder = X509Req::builder()?;

        let mut name = X509NameBuilder::new()?;
        name.append_entry_by_nid(Nid::COMMONNAME, &common_name)?;
        req_builder.set_subject_name(&name.build())?;

        let mut san_builder = SubjectAlternativeName::new();
        for entry in &self.san_entries {
            san_builder.dns(entry);
        }
        let san_extension = san_builder.build(&req_builder.x509v3_context(None))?;

        let mut stack = Stack::new()?;
        stack.push(BasicConstraints::new().build()?)?;
        stack.push(san_extension)?;
        stack.push(
            KeyUsage::new()
                .non_repudiation()
                .digital_signature()
                .key_encipherment()
                .build()?,
        )?;
        req_builder.add_extensions(&stack)?;

        req_builder.set_pubkey(&key_pair.pri_key)?;
        req_builder.sign(&key_pair.pri_key, MessageDigest::sha256())?;

        Ok(req_builder.build())
    }
}

/// 為 CSR 挑選 CN：依標籤數分組，取標籤最少的一組中字典序最前者。
///
/// ```
/// # use acme2::csr::common_name_for_csr;
/// let cn = common_name_for_csr(&["www.example.com", "example.com", "*.example.com"]);
/// assert_eq!(cn.as_deref(), Some("example.com"));
/// ```
pub fn common_name_for_csr<S: AsRef<str>>(domains: &[S]) -> Option<String> {
    let label_count = |domain: &str| domain.split('.').count();

    let fewest = domains.iter().map(|d| label_count(d.as_ref())).min()?;
    domains
        .iter()
        .map(AsRef::as_ref)
        .filter(|d| label_count(d) == fewest)
        .min()
        .map(str::to_string)
}

/// 讀取 PEM 格式的 CSR 並轉為 DER。
pub fn pem_to_der(pem: &[u8]) -> Result<Vec<u8>> {
    Ok(X509Req::from_pem(pem)?.to_der()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key_pair::KeyAlgorithm;

    #[test]
    fn test_common_name_prefers_fewest_labels() {
        assert_eq!(
            common_name_for_csr(&["www.example.com", "example.com", "*.example.com"]).as_deref(),
            Some("example.com")
        );
        assert_eq!(
            common_name_for_csr(&["b.example.org", "a.example.net"]).as_deref(),
            Some("a.example.net")
        );
        let empty: &[&str] = &[];
        assert!(common_name_for_csr(empty).is_none());
    }

    #[test]
    fn test_build_csr_with_extensions() {
        let key = KeyPair::generate(KeyAlgorithm::Ec).unwrap();
        let req = Csr::new(["www.example.com", "example.com"]).build(&key).unwrap();

        assert!(req.verify(&key.pub_key).unwrap());
        let cn = req
            .subject_name()
            .entries_by_nid(Nid::COMMONNAME)
            .next()
            .unwrap()
            .data()
            .as_utf8()
            .unwrap()
            .to_string();
        assert_eq!(cn, "example.com");
        assert_eq!(req.extensions().unwrap().len(), 3);

        let pem = req.to_pem().unwrap();
        assert_eq!(pem_to_der(&pem).unwrap(), req.to_der().unwrap());
    }

    #[test]
    fn test_no_san_entries() {
        let key = KeyPair::generate(KeyAlgorithm::Ec).unwrap();
        let empty: [&str; 0] = [];
        assert!(matches!(
            Csr::new(empty).build(&key),
            Err(CsrError::NoSanEntries)
        ));
    }
}
