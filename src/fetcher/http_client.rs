use anyhow::{anyhow, Context, Result};
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use std::time::Duration;
use tokio::time::sleep;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::RetryIf;
use tracing::{debug, warn};

use crate::config::{FetcherConfig, HttpMethod};

const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded; charset=UTF-8";

/// Why one attempt failed, and whether another attempt may help.
#[derive(Debug)]
enum AttemptError {
    Transient(anyhow::Error),
    Fatal(anyhow::Error),
}

impl AttemptError {
    fn is_transient(&self) -> bool {
        matches!(self, AttemptError::Transient(_))
    }

    fn into_inner(self) -> anyhow::Error {
        match self {
            AttemptError::Transient(e) | AttemptError::Fatal(e) => e,
        }
    }
}

pub struct HttpClient {
    inner: reqwest::Client,
    config: FetcherConfig,
}

impl HttpClient {
    pub fn new(config: &FetcherConfig) -> Result<Self> {
        let inner = reqwest::Client::builder()
            .user_agent(&config.user_agent)
            .timeout(Duration::from_secs(config.timeout_secs))
            .gzip(true)
            // Portals keep the session in cookies
            .cookie_store(true)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            inner,
            config: config.clone(),
        })
    }

    /// Fetch a URL as text with rate-limiting and retry.
    pub async fn request_text(&self, method: HttpMethod, url: &str, params: &[(String, String)]) -> Result<String> {
        self.polite_delay().await;

        let strategy = ExponentialBackoff::from_millis(2)
            .factor(self.config.request_delay_ms.max(100))
            .max_delay(Duration::from_secs(30))
            .map(jitter)
            .take(self.config.max_retries as usize);

        let mut attempt = 0u32;
        RetryIf::spawn(
            strategy,
            move || {
                attempt += 1;
                self.attempt(method, url, params, attempt)
            },
            AttemptError::is_transient,
        )
        .await
        .map_err(AttemptError::into_inner)
        .with_context(|| format!("All retries exhausted for {}", url))
    }

    async fn attempt(
        &self,
        method: HttpMethod,
        url: &str,
        params: &[(String, String)],
        attempt: u32,
    ) -> std::result::Result<String, AttemptError> {
        debug!("{:?} {} (attempt {})", method, url, attempt);

        let request = match method {
            HttpMethod::Get => {
                let full = url::Url::parse_with_params(url, params)
                    .with_context(|| format!("Invalid URL {}", url))
                    .map_err(AttemptError::Fatal)?;
                self.inner.get(full)
            }
            HttpMethod::Post => self
                .inner
                .post(url)
                .header(CONTENT_TYPE, FORM_CONTENT_TYPE)
                .header(ACCEPT, "application/json, text/html, */*")
                .body(encode_form(params)),
        };

        let resp = match request.send().await {
            Ok(resp) => resp,
            Err(e) => {
                warn!("Request failed on attempt {}: {}", attempt, e);
                return Err(AttemptError::Transient(anyhow!("Request error: {}", e)));
            }
        };

        let status = resp.status();
        if status.is_success() {
            return resp
                .text()
                .await
                .context("Failed to read response body")
                .map_err(AttemptError::Transient);
        }

        if status.as_u16() == 429 || status.is_server_error() {
            warn!("HTTP {} on attempt {}, backing off", status, attempt);
            Err(AttemptError::Transient(anyhow!("HTTP {}", status)))
        } else {
            // Don't retry 4xx other than 429
            Err(AttemptError::Fatal(anyhow!("HTTP error {}", status)))
        }
    }

    /// Sleep for the configured delay + random jitter.
    async fn polite_delay(&self) {
        let base = Duration::from_millis(self.config.request_delay_ms);
        sleep(base + jitter(base / 2)).await;
    }
}

pub fn encode_form(params: &[(String, String)]) -> String {
    url::form_urlencoded::Serializer::new(String::new())
        .extend_pairs(params.iter().map(|(k, v)| (k.as_str(), v.as_str())))
        .finish()
}
