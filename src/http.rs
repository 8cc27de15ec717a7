//! Transport trait and the reqwest-backed implementation.

use std::collections::HashMap;

use async_trait::async_trait;

/// The closed set of methods the pipeline dispatches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
  Get,
  Post,
  Put,
  Delete,
}

impl Method {
  pub fn as_str(&self) -> &'static str {
    match self {
      Method::Get => "GET",
      Method::Post => "POST",
      Method::Put => "PUT",
      Method::Delete => "DELETE",
    }
  }
}

impl std::fmt::Display for Method {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(self.as_str())
  }
}

/// A response as seen by the pipeline: status, headers (lower-cased
/// names) and the raw body text. Parsing happens in the request layer.
#[derive(Debug, Clone, Default)]
pub struct TransportResponse {
  pub status: u16,
  pub headers: HashMap<String, String>,
  pub body: String,
}

impl TransportResponse {
  pub fn is_success(&self) -> bool {
    (200..300).contains(&self.status)
  }

  pub fn header(&self, name: &str) -> Option<&str> {
    self.headers.get(&name.to_lowercase()).map(String::as_str)
  }
}

/// Failure before a response was received (DNS, refused connection,
/// dropped socket). Protocol-level failures are regular responses.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct TransportError {
  pub message: String,
}

impl TransportError {
  pub fn new(message: impl Into<String>) -> Self {
    TransportError {
      message: message.into(),
    }
  }
}

/// The HTTP transport collaborator.
#[async_trait]
pub trait Transport: Send + Sync {
  async fn send(
    &self,
    url: &str,
    method: Method,
    headers: &[(String, String)],
    body: Option<String>,
  ) -> Result<TransportResponse, TransportError>;
}

/// Transport over a shared reqwest client.
pub struct HttpTransport {
  client: reqwest::Client,
}

impl HttpTransport {
  pub fn new() -> Result<Self, TransportError> {
    let client = reqwest::Client::builder()
      .build()
      .map_err(|e| TransportError::new(format!("Failed to create HTTP client: {e}")))?;
    Ok(HttpTransport { client })
  }

  fn method_for(method: Method) -> reqwest::Method {
    match method {
      Method::Get => reqwest::Method::GET,
      Method::Post => reqwest::Method::POST,
      Method::Put => reqwest::Method::PUT,
      Method::Delete => reqwest::Method::DELETE,
    }
  }
}

#[async_trait]
impl Transport for HttpTransport {
  async fn send(
    &self,
    url: &str,
    method: Method,
    headers: &[(String, String)],
    body: Option<String>,
  ) -> Result<TransportResponse, TransportError> {
    let mut request = self.client.request(Self::method_for(method), url);
    for (name, value) in headers {
      request = request.header(name, value);
    }
    if let Some(body) = body {
      request = request.body(body);
    }

    let response = request
      .send()
      .await
      .map_err(|e| TransportError::new(e.to_string()))?;

    let status = response.status().as_u16();
    let mut response_headers = HashMap::new();
    for (name, value) in response.headers() {
      if let Ok(value) = value.to_str() {
        response_headers.insert(name.as_str().to_string(), value.to_string());
      }
    }
    let body = response
      .text()
      .await
      .map_err(|e| TransportError::new(e.to_string()))?;

    Ok(TransportResponse {
      status,
      headers: response_headers,
      body,
    })
  }
}
