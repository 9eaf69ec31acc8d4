//! Data-request HTTP client
//!
//! A single GET against a peer's data endpoint with a bounded timeout. The
//! framework, not the client, owns retry policy; this layer only classifies
//! outcomes: payload bytes, an epoch discrepancy (the peer's current epoch
//! travels in the 409 body), or a transport error.

use std::time::Duration;

use crate::common::{Error, Result};
use crate::transport::server::DATA_REQUEST_PATH;

#[derive(Clone)]
pub struct DataClient {
    http: reqwest::Client,
}

impl DataClient {
    pub fn new(timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Internal(format!("http client: {}", e)))?;
        Ok(Self { http })
    }

    /// Fetch the payload for `req` from the peer at `addr` (host:port).
    /// `from` is the requester's slot, `epoch` the requester's current epoch.
    pub async fn fetch(&self, addr: &str, from: u64, epoch: u64, req: &str) -> Result<Vec<u8>> {
        let url = format!("http://{}{}", addr, DATA_REQUEST_PATH);
        let response = self
            .http
            .get(&url)
            .query(&[
                ("taskID", from.to_string().as_str()),
                ("epoch", epoch.to_string().as_str()),
                ("req", req),
            ])
            .send()
            .await?;

        let status = response.status();
        let body = response.bytes().await?;

        if status.is_success() {
            return Ok(body.to_vec());
        }
        if status == reqwest::StatusCode::CONFLICT {
            let current = std::str::from_utf8(&body)
                .ok()
                .and_then(|s| s.trim().parse::<u64>().ok())
                .ok_or_else(|| {
                    Error::Http(format!("unparseable epoch in conflict response from {}", addr))
                })?;
            return Err(Error::EpochMismatch { current });
        }
        Err(Error::Http(format!(
            "{} returned {}: {}",
            addr,
            status,
            String::from_utf8_lossy(&body)
        )))
    }
}
