//! # acme2
//!
//! ACME v2（RFC 8555）客戶端：建立與管理帳戶、推進憑證訂單、輪詢授權、產生挑戰驗證資料，
//! 並以 JWS 包裝每一個需要驗證身分的請求。適用於 Let's Encrypt 等 CA。
//!
//! ## 模組
//!
//! - **session**: 工作階段，持有 HTTP 客戶端、目錄、nonce 來源、時鐘、預檢器與存儲。
//! - **account**: 帳戶的建立、查詢、聯絡資訊更新、金鑰輪替與停用。
//! - **order**: 訂單的建立與接續、待完成挑戰、CSR 送出、憑證下載與撤銷。
//! - **authorization** / **challenge**: 授權輪詢、挑戰類型與驗證資料。
//! - **jws** / **protection** / **signature** / **payload**: 請求簽名。
//!
//! 本庫不負責發佈驗證資料（放置 HTTP 檔案或新增 DNS 記錄），只告訴呼叫端要發佈什麼，
//! 並在發佈後確認已生效才通知 CA。
//!
//! ## 示例
//!
//! ```no_run
//! use acme2::{order::{Order, OrderRequest}, session::Session, challenge::ChallengeCredential};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // 1. 建立工作階段並載入或註冊帳戶
//!     let account = Session::builder()
//!         .emails(["admin@example.com"])
//!         .staging(true)
//!         .connect()?;
//!
//!     // 2. 開啟訂單：example.com 以 HTTP-01 驗證，萬用字元以 DNS-01 驗證
//!     let request = OrderRequest::new()
//!         .http(["example.com"])
//!         .dns(["*.example.com"]);
//!     let mut order = Order::open(&account, request)?;
//!
//!     // 3. 發佈驗證資料後逐一驗證
//!     for challenge in order.pending_challenges()? {
//!         match &challenge.credential {
//!             ChallengeCredential::Http { identifier, file_name, file_content } => {
//!                 println!("http://{identifier}/.well-known/acme-challenge/{file_name} -> {file_content}");
//!             }
//!             ChallengeCredential::Dns { identifier, dns_content } => {
//!                 println!("_acme-challenge.{identifier} TXT {dns_content}");
//!             }
//!         }
//!         challenge.verify(&mut order, 180, 60)?;
//!     }
//!
//!     // 4. 送出 CSR 並下載憑證
//!     let files = order.certificate_file(None)?;
//!     println!("{:?}", files.certificate_full_chained.path);
//!
//!     Ok(())
//! }
//! ```

pub mod account;
pub mod authorization;
pub mod base64;
pub mod certificate;
pub mod challenge;
pub mod clock;
pub mod csr;
pub mod directory;
pub mod jwk;
pub mod jws;
pub mod key_pair;
pub mod nonce;
pub mod order;
pub mod payload;
pub mod probe;
pub mod protection;
pub mod session;
pub mod signature;
pub mod storage;

pub use account::{Account, AccountError};
pub use order::{Order, OrderError, OrderRequest};
pub use session::{Session, SessionBuilder, SessionError};
