use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use futures::stream::BoxStream;
use reqwest::Client;
use reqwest::header::{ACCEPT, CACHE_CONTROL};
use tracing::debug;
use url::Url;

use crate::error::TransportError;

/// Raw body chunks of an open event stream.
pub type ByteStream = BoxStream<'static, Result<Bytes, TransportError>>;

/// Opens the underlying byte stream.
///
/// [`HttpConnector`] is the production implementation; tests substitute
/// scripted connectors.
#[async_trait]
pub trait StreamConnector: Send + Sync {
  async fn open(&self, client_id: &str) -> Result<ByteStream, TransportError>;
}

/// Connects to an HTTP `text/event-stream` endpoint.
pub struct HttpConnector {
  client: Client,
  endpoint: Url,
  client_id_param: String,
}

impl HttpConnector {
  pub fn new(endpoint: Url, client_id_param: impl Into<String>) -> Result<Self, TransportError> {
    // No overall request timeout: the response body is meant to stay open.
    let client = Client::builder()
      .connect_timeout(Duration::from_secs(30))
      .build()?;
    Ok(Self {
      client,
      endpoint,
      client_id_param: client_id_param.into(),
    })
  }

  /// Endpoint with the client-session id appended.
  pub fn stream_url(&self, client_id: &str) -> Url {
    let mut url = self.endpoint.clone();
    url
      .query_pairs_mut()
      .append_pair(&self.client_id_param, client_id);
    url
  }
}

#[async_trait]
impl StreamConnector for HttpConnector {
  async fn open(&self, client_id: &str) -> Result<ByteStream, TransportError> {
    let url = self.stream_url(client_id);
    debug!(url = %url, "opening event stream");

    let response = self
      .client
      .get(url)
      .header(ACCEPT, "text/event-stream")
      .header(CACHE_CONTROL, "no-cache")
      .send()
      .await?;

    let status = response.status();
    if !status.is_success() {
      return Err(TransportError::Status {
        status: status.as_u16(),
      });
    }

    Ok(
      response
        .bytes_stream()
        .map(|chunk| chunk.map_err(TransportError::from))
        .boxed(),
    )
  }
}
