//! HTTP transport used by the built-in providers.

use log::debug;
use std::time::Duration;

use crate::error::ApiError;

/// Minimal blocking GET. Implementations map HTTP failures onto [`ApiError`];
/// callers re-attribute them with [`ApiError::for_call`].
pub trait HttpTransport: Send + Sync {
    fn get(&self, url: &str, query: &[(String, String)]) -> Result<String, ApiError>;
}

/// `reqwest::blocking` transport.
pub struct ReqwestTransport {
    client: reqwest::blocking::Client,
}

impl ReqwestTransport {
    pub fn new() -> Self {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent(concat!("stockaid/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_else(|e| {
                log::warn!("HTTP client builder failed ({e}), using defaults");
                reqwest::blocking::Client::new()
            });
        Self { client }
    }
}

impl Default for ReqwestTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpTransport for ReqwestTransport {
    fn get(&self, url: &str, query: &[(String, String)]) -> Result<String, ApiError> {
        // The query may carry an API key; only the URL is logged.
        debug!("GET {url}");
        let resp = self
            .client
            .get(url)
            .query(query)
            .send()
            .map_err(|e| ApiError::fetch("http", url, e.to_string()))?;

        let status = resp.status();

        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(ApiError::credential(
                "http",
                format!("HTTP {status}: credential rejected"),
            ));
        }

        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after = resp
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(60);
            return Err(ApiError::Fetch {
                provider: "http".into(),
                name: url.to_string(),
                reason: format!("HTTP {status}"),
                retry_after_secs: Some(retry_after),
            });
        }

        if !status.is_success() {
            return Err(ApiError::fetch("http", url, format!("HTTP {status}")));
        }

        resp.text()
            .map_err(|e| ApiError::fetch("http", url, format!("reading body: {e}")))
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Canned-response transport for provider tests.

    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Default)]
    pub struct CannedTransport {
        responses: HashMap<String, Result<String, (u16, String)>>,
        pub requests: Mutex<Vec<(String, Vec<(String, String)>)>>,
    }

    impl CannedTransport {
        pub fn with(mut self, url: &str, body: &str) -> Self {
            self.responses.insert(url.to_string(), Ok(body.to_string()));
            self
        }

        pub fn failing(mut self, url: &str, status: u16) -> Self {
            self.responses
                .insert(url.to_string(), Err((status, format!("HTTP {status}"))));
            self
        }
    }

    impl HttpTransport for CannedTransport {
        fn get(&self, url: &str, query: &[(String, String)]) -> Result<String, ApiError> {
            self.requests
                .lock()
                .unwrap()
                .push((url.to_string(), query.to_vec()));
            match self.responses.get(url) {
                Some(Ok(body)) => Ok(body.clone()),
                Some(Err((401 | 403, reason))) => Err(ApiError::credential("http", reason.clone())),
                Some(Err((_, reason))) => Err(ApiError::fetch("http", url, reason.clone())),
                None => Err(ApiError::fetch("http", url, "HTTP 404 Not Found")),
            }
        }
    }
}
