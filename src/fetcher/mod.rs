pub mod http_client;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use crate::config::{EndpointConfig, FetcherConfig, InstitutionConfig};
use crate::models::{PayloadKind, RawPayload, TermSelection};

use self::http_client::HttpClient;

// ── Source trait ──────────────────────────────────────────────────────────────

/// Swappable payload source abstraction.
#[async_trait]
pub trait PayloadSource: Send + Sync {
    async fn fetch_payload(
        &self,
        institution: &InstitutionConfig,
        selection: &TermSelection,
    ) -> Result<RawPayload>;
}

// ── HTTP source ───────────────────────────────────────────────────────────────

pub struct HttpPayloadSource {
    client: Arc<HttpClient>,
    concurrency: usize,
}

impl HttpPayloadSource {
    pub fn new(config: &FetcherConfig) -> Result<Self> {
        Ok(Self {
            client: Arc::new(HttpClient::new(config)?),
            concurrency: config.concurrency.max(1),
        })
    }

    /// One request per week, `concurrency` at a time. Failed weeks are skipped.
    async fn fetch_weeks(
        &self,
        endpoint: &EndpointConfig,
        selection: &TermSelection,
        weeks: u32,
    ) -> Result<Vec<Value>> {
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut handles = Vec::new();

        for week in 1..=weeks {
            let client = Arc::clone(&self.client);
            let sem = Arc::clone(&semaphore);
            let url = endpoint.url.clone();
            let method = endpoint.method;
            let params = endpoint.render_params(selection, Some(week));

            let handle = tokio::spawn(async move {
                let _permit = sem.acquire().await.ok()?;
                match client.request_text(method, &url, &params).await {
                    Ok(body) => match serde_json::from_str::<Value>(&body) {
                        Ok(page) => Some((week, page)),
                        Err(e) => {
                            warn!("Week {}: response is not JSON: {}", week, e);
                            None
                        }
                    },
                    Err(e) => {
                        warn!("Week {}: {:#}", week, e);
                        None
                    }
                }
            });

            handles.push(handle);
        }

        let mut pages = Vec::new();
        for handle in handles {
            if let Ok(Some(page)) = handle.await {
                pages.push(page);
            }
        }
        pages.sort_by_key(|(week, _)| *week);

        if pages.is_empty() {
            bail!("none of {} weekly pages could be fetched", weeks);
        }
        info!("Fetched {}/{} weekly pages", pages.len(), weeks);

        Ok(pages.into_iter().map(|(_, page)| page).collect())
    }
}

#[async_trait]
impl PayloadSource for HttpPayloadSource {
    async fn fetch_payload(
        &self,
        institution: &InstitutionConfig,
        selection: &TermSelection,
    ) -> Result<RawPayload> {
        let endpoint = institution
            .endpoint
            .as_ref()
            .ok_or_else(|| anyhow!("{} has no fetch endpoint; import a saved payload instead", institution.name))?;

        if let Some(weeks) = endpoint.per_week {
            let pages = self.fetch_weeks(endpoint, selection, weeks).await?;
            return Ok(RawPayload::Json { pages });
        }

        let params = endpoint.render_params(selection, None);
        debug!("Fetching {} for {} {}", endpoint.url, selection.year, selection.term);
        let body = self
            .client
            .request_text(endpoint.method, &endpoint.url, &params)
            .await
            .with_context(|| format!("Failed to fetch schedule for {}", institution.name))?;

        parse_body(institution.source.payload_kind(), body)
    }
}

/// Wrap a response body in the payload kind the institution expects.
pub fn parse_body(kind: PayloadKind, body: String) -> Result<RawPayload> {
    match kind {
        PayloadKind::Json => {
            let value: Value = serde_json::from_str(&body).context("response is not valid JSON")?;
            Ok(RawPayload::json(value))
        }
        PayloadKind::Html => Ok(RawPayload::Html(body)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_body_json() {
        let payload = parse_body(PayloadKind::Json, r#"{"kbList": []}"#.to_string()).unwrap();
        match payload {
            RawPayload::Json { pages } => assert_eq!(pages.len(), 1),
            RawPayload::Html(_) => panic!("wrong kind"),
        }
    }

    #[test]
    fn test_parse_body_rejects_login_page_as_json() {
        assert!(parse_body(PayloadKind::Json, "<html>login</html>".to_string()).is_err());
    }

    #[test]
    fn test_parse_body_html_passthrough() {
        let payload = parse_body(PayloadKind::Html, "<table></table>".to_string()).unwrap();
        assert_eq!(payload.kind(), PayloadKind::Html);
    }
}
