//! The fetch capability injected into the loader.
//!
//! [`HttpFetcher`] serves `http(s)://` keys through reqwest; [`FsFetcher`]
//! serves `file://` URLs and plain paths through `tokio::fs`.

use std::io::ErrorKind;
use std::path::PathBuf;

use async_trait::async_trait;
use thiserror::Error;

/// A transport-level failure: no response was obtained.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct TransportError(pub String);

/// A fetched response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchResponse {
    pub ok: bool,
    pub status: u16,
    pub body: String,
}

impl FetchResponse {
    pub fn ok(body: impl Into<String>) -> Self {
        FetchResponse {
            ok: true,
            status: 200,
            body: body.into(),
        }
    }

    pub fn status(status: u16, body: impl Into<String>) -> Self {
        FetchResponse {
            ok: (200..300).contains(&status),
            status,
            body: body.into(),
        }
    }
}

/// Retrieves the text behind a canonical key.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<FetchResponse, TransportError>;
}

/// Fetches over HTTP(S).
#[derive(Debug, Clone, Default)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new() -> Self {
        HttpFetcher {
            client: reqwest::Client::new(),
        }
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        HttpFetcher { client }
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchResponse, TransportError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|err| TransportError(format!("request failed: {}", err)))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|err| TransportError(format!("response read failed: {}", err)))?;

        Ok(FetchResponse {
            ok: status.is_success(),
            status: status.as_u16(),
            body,
        })
    }
}

/// Fetches from the local filesystem. A missing file answers 404 rather
/// than failing the transport.
#[derive(Debug, Clone, Default)]
pub struct FsFetcher;

impl FsFetcher {
    pub fn new() -> Self {
        FsFetcher
    }

    fn path_of(url: &str) -> PathBuf {
        PathBuf::from(url.strip_prefix("file://").unwrap_or(url))
    }
}

#[async_trait]
impl Fetcher for FsFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchResponse, TransportError> {
        let path = Self::path_of(url);
        match tokio::fs::read_to_string(&path).await {
            Ok(body) => Ok(FetchResponse::ok(body)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(FetchResponse::status(404, "")),
            Err(err) => Err(TransportError(format!("{}: {}", path.display(), err))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_constructor_derives_ok() {
        assert!(FetchResponse::status(204, "").ok);
        assert!(!FetchResponse::status(404, "").ok);
        assert!(!FetchResponse::status(500, "boom").ok);
    }

    #[test]
    fn file_urls_map_to_paths() {
        assert_eq!(FsFetcher::path_of("file:///tmp/a.json"), PathBuf::from("/tmp/a.json"));
        assert_eq!(FsFetcher::path_of("mods/a.json"), PathBuf::from("mods/a.json"));
    }
}
