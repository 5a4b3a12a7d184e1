pub mod api;
pub mod client;
pub mod config;
pub mod error;
pub mod messages;
pub mod redact;
pub mod request;
pub mod retry;
pub mod session;
pub mod storage;
pub mod transport;
pub mod types;

pub use client::KinKeepClient;
pub use config::ClientConfig;
pub use error::{ApiError, StorageError};
pub use messages::MessageService;
pub use request::{PendingRequest, RequestOptions};
pub use session::{Session, SessionHolder};
pub use storage::{FileStorage, KeyringStorage, MemoryStorage, SessionStorage};
