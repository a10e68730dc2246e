//! Streaming HTTP client backed by `reqwest`.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::TryStreamExt;
use tokio_util::io::StreamReader;
use tracing::debug;

use crate::error::{CacheError, Result};
use crate::traits::{ByteStream, StreamingHttpClient};

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(30);

/// Downloads track bodies as streams; response bytes flow straight to the
/// blob writer without buffering the whole file.
///
/// No request-level deadline is set: cache downloads of large lossless
/// files legitimately run for minutes. The read timeout bounds each
/// individual chunk instead, so a stalled transfer still fails.
pub struct ReqwestStreamClient {
    client: reqwest::Client,
}

impl ReqwestStreamClient {
    pub fn new() -> Result<Self> {
        Self::with_timeouts(DEFAULT_CONNECT_TIMEOUT, DEFAULT_READ_TIMEOUT)
    }

    pub fn with_timeouts(connect_timeout: Duration, read_timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .read_timeout(read_timeout)
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl StreamingHttpClient for ReqwestStreamClient {
    async fn get_stream(&self, url: &str, bearer_token: Option<&str>) -> Result<ByteStream> {
        let mut request = self.client.get(url);
        if let Some(token) = bearer_token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(CacheError::HttpStatus {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        debug!(%url, status = status.as_u16(), "Download stream opened");
        let stream = response
            .bytes_stream()
            .map_err(|err| std::io::Error::new(std::io::ErrorKind::Other, err));
        Ok(Box::new(StreamReader::new(Box::pin(stream))))
    }
}
