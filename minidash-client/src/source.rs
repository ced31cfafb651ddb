use std::time::Duration;

use log::trace;
use minidash_proto::MetricsSnapshot;

use crate::{error::FetchError, http_util};

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

const ERROR_BODY_EXCERPT: usize = 200;

/// Where a poll gets its snapshot from.
pub trait MetricsSource: Send + Sync + 'static {
    /// Fetch one snapshot from `{base_url}/metrics`.
    fn fetch(
        &self,
        base_url: &str,
    ) -> impl Future<Output = Result<MetricsSnapshot, FetchError>> + Send;
}

/// Plain HTTP/1.1 (or HTTPS) `GET` against the exporter.
#[derive(Debug, Clone)]
pub struct HttpSource {
    timeout: Duration,
    prefer_ipv6: bool,
}

impl HttpSource {
    pub fn new(timeout: Duration, prefer_ipv6: bool) -> Self {
        Self {
            timeout,
            prefer_ipv6,
        }
    }
}

impl Default for HttpSource {
    fn default() -> Self {
        Self::new(DEFAULT_REQUEST_TIMEOUT, false)
    }
}

impl MetricsSource for HttpSource {
    async fn fetch(&self, base_url: &str) -> Result<MetricsSnapshot, FetchError> {
        let req = http_util::get_request(base_url, "metrics")?;
        trace!("GET {}", req.uri());

        let resp = tokio::time::timeout(
            self.timeout,
            http_util::send_request(req, self.prefer_ipv6),
        )
        .await
        .map_err(|_| {
            FetchError::transport(format!(
                "request timed out after {} ms",
                self.timeout.as_millis()
            ))
        })??;

        if !resp.status().is_success() {
            let body = String::from_utf8_lossy(resp.body());
            return Err(FetchError::Protocol {
                status: resp.status().as_u16(),
                body: body.chars().take(ERROR_BODY_EXCERPT).collect(),
            });
        }

        Ok(serde_json::from_slice(resp.body())?)
    }
}
