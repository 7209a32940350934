#![warn(rust_2018_idioms)]

//! Durable event-batching and upload engine.
//!
//! Events are appended to a size-bounded open batch, persisted through a
//! pluggable [`storage`] backend, and uploaded in creation order by the
//! [`upload::Uploader`] with retry classification and server-assisted retry
//! headers.
//!
//! ```no_run
//! use rudder_uploader::config::Config;
//! use rudder_uploader::sender::{HttpEventSender, SenderConfig};
//! use rudder_uploader::storage::{self, Storage};
//! use rudder_uploader::upload::{Uploader, UploaderCallbacks};
//! use std::sync::Arc;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
//! let config = Config {
//!     write_key: "1pTxG1Tqxr7".into(),
//!     ..Config::default()
//! };
//!
//! let storage = Arc::new(Storage::file(&config).await?);
//! let sender = Arc::new(HttpEventSender::new(SenderConfig::from_config(&config))?);
//! let uploader = Arc::new(Uploader::new(
//!     Arc::clone(&storage),
//!     sender,
//!     config.backoff.clone(),
//!     UploaderCallbacks::default(),
//! ));
//!
//! uploader.start();
//! storage.write_string(storage::EVENT, "{\"event\":\"app_open\"}").await?;
//! uploader.flush();
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod sender;
pub mod storage;
pub mod upload;

// Re-export main types for easy access
pub use config::{Config, PlatformType};
pub use sender::{EventSender, HttpEventSender};
pub use storage::{Storage, StorageError};
pub use upload::{EventUploadResult, Uploader, UploaderCallbacks, UploaderState};

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
