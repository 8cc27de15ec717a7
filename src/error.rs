//! Error types for the request pipeline.

use serde_json::Value;

use crate::resource::ResourceKind;

pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the client.
///
/// The enum is `Clone` so a settled GET response can be handed to every
/// caller sharing the same memoized request.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
  /// A load or delete was attempted on a locator with no id for that
  /// resource. Raised before any transport activity.
  #[error("missing {0} id")]
  MissingId(ResourceKind),

  /// A request was made with an empty URL.
  #[error("no url provided")]
  MissingUrl,

  /// The resource path could not be resolved into a locator.
  #[error("invalid resource path: {0}")]
  InvalidPath(String),

  /// The transport layer failed before a response was received.
  #[error("{0}")]
  Network(String),

  /// The server answered with a non-success status. The parsed response
  /// body is carried verbatim so callers can inspect server-provided
  /// error structures.
  #[error("request failed with status {status}")]
  Api { status: u16, body: Value },

  /// The persistent storage collaborator failed.
  #[error("storage error: {0}")]
  Storage(String),

  /// The client configuration could not be loaded.
  #[error("configuration error: {0}")]
  Config(String),

  /// A payload could not be serialized or deserialized.
  #[error("serialization error: {0}")]
  Serialization(String),
}

impl Error {
  pub(crate) fn storage(err: impl std::fmt::Display) -> Self {
    Error::Storage(err.to_string())
  }

  pub(crate) fn serialization(err: impl std::fmt::Display) -> Self {
    Error::Serialization(err.to_string())
  }
}
