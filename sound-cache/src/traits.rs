//! Collaborator seams for the cache engine.
//!
//! The engine never knows where tokens or server addresses come from; the
//! host application supplies them through these traits so the cache works
//! unchanged across account switches and server migrations.

use async_trait::async_trait;
use tokio::io::AsyncRead;

use crate::error::Result;

/// Byte stream handed back by a [`StreamingHttpClient`].
pub type ByteStream = Box<dyn AsyncRead + Send + Unpin>;

/// Supplies the bearer token for authenticated downloads.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    /// Current access token, or `None` for anonymous requests.
    async fn access_token(&self) -> Option<String>;
}

/// Supplies the server base URL, queried fresh for every request.
#[async_trait]
pub trait BaseUrlResolver: Send + Sync {
    async fn base_url(&self) -> String;
}

/// Issues a GET request and exposes the response body as a byte stream.
#[async_trait]
pub trait StreamingHttpClient: Send + Sync {
    /// Non-success statuses surface as errors; the body is never buffered
    /// whole in memory.
    async fn get_stream(&self, url: &str, bearer_token: Option<&str>) -> Result<ByteStream>;
}

/// Fixed-token provider for hosts without rotating credentials.
pub struct StaticTokenProvider {
    token: Option<String>,
}

impl StaticTokenProvider {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: Some(token.into()),
        }
    }

    /// Provider that issues no token at all.
    pub fn anonymous() -> Self {
        Self { token: None }
    }
}

#[async_trait]
impl TokenProvider for StaticTokenProvider {
    async fn access_token(&self) -> Option<String> {
        self.token.clone()
    }
}

/// Fixed-address resolver; normalizes to a trailing slash.
pub struct StaticBaseUrl {
    base_url: String,
}

impl StaticBaseUrl {
    pub fn new(base_url: impl Into<String>) -> Self {
        let mut base_url = base_url.into();
        if !base_url.ends_with('/') {
            base_url.push('/');
        }
        Self { base_url }
    }
}

#[async_trait]
impl BaseUrlResolver for StaticBaseUrl {
    async fn base_url(&self) -> String {
        self.base_url.clone()
    }
}
