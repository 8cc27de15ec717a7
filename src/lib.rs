//! Offline-first client for a form/submission REST API.
//!
//! The pipeline resolves resource paths into typed locators, memoizes
//! GET responses, keeps a persistent per-project snapshot of form
//! definitions for offline reads, and defers submissions made while
//! disconnected into a durable queue that replays serially once
//! connectivity returns.
//!
//! # Example
//!
//! ```ignore
//! let client = FormioClient::new(Config::new("https://api.example.com"))?;
//! client.cache_offline_project("https://myproject.example.com", None)?;
//!
//! let formio = client.formio("https://myproject.example.com/intake")?;
//! let form = formio.load_form().await?;
//! let saved = formio.save_submission(json!({"data": {"a": 1}})).await?;
//! ```

pub mod auth;
pub mod cache;
pub mod client;
pub mod config;
pub mod error;
pub mod http;
pub mod locator;
pub mod offline;
pub mod resource;
pub mod storage;
pub mod types;

pub use client::FormioClient;
pub use config::Config;
pub use error::{Error, Result};
pub use http::{HttpTransport, Method, Transport, TransportError, TransportResponse};
pub use locator::ResourceLocator;
pub use offline::{Form, OfflineEvent, ProjectSnapshot, QueueEntry};
pub use resource::{Formio, RequestTarget, ResourceKind};
pub use storage::{MemoryStorage, OfflineStorage, SqliteStorage};
pub use types::field_data;
