//! HTTP client for one storage replica's slice API
//!
//! `GET|PUT {addr}/slice/{hex(handler)}?consistency_policy={n}`

use crate::common::{base_url, DIGEST_LEN};
use crate::connector::{ConsistencyPolicy, WireError};
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::StatusCode;
use std::time::Duration;

/// Default per-request timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Transport used to reach storage replicas
#[async_trait]
pub trait SliceTransport: Send + Sync {
    async fn get_slice(&self, addr: &str, handler: &[u8]) -> Result<Bytes, WireError>;

    /// `data` of `None` models an absent payload and is rejected
    async fn put_slice(
        &self,
        addr: &str,
        handler: &[u8],
        data: Option<Bytes>,
    ) -> Result<(), WireError>;
}

/// Slice API client bound to one consistency policy
#[derive(Debug, Clone)]
pub struct SliceClient {
    http: reqwest::Client,
    policy: ConsistencyPolicy,
    timeout: Duration,
}

impl SliceClient {
    pub fn new(policy: ConsistencyPolicy) -> Self {
        Self {
            http: reqwest::Client::new(),
            policy,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Override the per-request timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn policy(&self) -> ConsistencyPolicy {
        self.policy
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// URL of a slice on a replica
    pub fn slice_url(&self, addr: &str, handler: &[u8]) -> String {
        format!(
            "{}/slice/{}?consistency_policy={}",
            base_url(addr),
            hex::encode(handler),
            self.policy.as_u8()
        )
    }

    async fn send(&self, request: reqwest::RequestBuilder, url: &str) -> Result<Bytes, WireError> {
        let response = request
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| classify(e, url))?;

        let status = response.status();
        let body = response.bytes().await.map_err(|e| classify(e, url))?;

        if status != StatusCode::OK {
            return Err(WireError::Status {
                url: url.to_string(),
                status: status.as_u16(),
                body: String::from_utf8_lossy(&body).into_owned(),
            });
        }
        Ok(body)
    }
}

fn validate(addr: &str, handler: &[u8]) -> Result<(), WireError> {
    if addr.trim().is_empty() {
        return Err(WireError::ConnAddrEmpty);
    }
    if handler.len() != DIGEST_LEN {
        return Err(WireError::HandlerInvalid);
    }
    Ok(())
}

fn classify(err: reqwest::Error, url: &str) -> WireError {
    if err.is_timeout() {
        WireError::Timeout {
            url: url.to_string(),
        }
    } else {
        WireError::Transport {
            url: url.to_string(),
            source: err,
        }
    }
}

#[async_trait]
impl SliceTransport for SliceClient {
    async fn get_slice(&self, addr: &str, handler: &[u8]) -> Result<Bytes, WireError> {
        validate(addr, handler)?;
        let url = self.slice_url(addr, handler);
        tracing::debug!(url = %url, "get_slice");
        self.send(self.http.get(&url), &url).await
    }

    async fn put_slice(
        &self,
        addr: &str,
        handler: &[u8],
        data: Option<Bytes>,
    ) -> Result<(), WireError> {
        validate(addr, handler)?;
        let data = data.ok_or(WireError::PutNilSlice)?;
        let url = self.slice_url(addr, handler);
        tracing::debug!(url = %url, bytes = data.len(), "put_slice");
        self.send(
            self.http
                .put(&url)
                .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
                .body(data),
            &url,
        )
        .await?;
        Ok(())
    }
}
