use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use batchflow_core::error::NotifyError;
use batchflow_core::notify::Notifier;
use batchflow_core::PipelineReport;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};

const BODY_PREVIEW_LIMIT: usize = 512;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DeliveryFailure {
    Timeout,
    Connect,
    Request,
    Status,
    Unknown,
}

impl fmt::Display for DeliveryFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Timeout => "timeout",
            Self::Connect => "connect",
            Self::Request => "request",
            Self::Status => "status",
            Self::Unknown => "unknown",
        })
    }
}

fn classify(err: &reqwest::Error) -> DeliveryFailure {
    if err.is_timeout() {
        DeliveryFailure::Timeout
    } else if err.is_connect() {
        DeliveryFailure::Connect
    } else if err.is_request() {
        DeliveryFailure::Request
    } else {
        DeliveryFailure::Unknown
    }
}

fn preview_body(body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return "<empty body>".to_string();
    }
    let mut out: String = trimmed.chars().take(BODY_PREVIEW_LIMIT).collect();
    if trimmed.chars().nth(BODY_PREVIEW_LIMIT).is_some() {
        out.push_str("...");
    }
    out
}

/// POSTs the report as JSON to a fixed URL.
#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    url: String,
    http: reqwest::Client,
}

impl WebhookNotifier {
    pub fn new(
        url: impl Into<String>,
        headers: &BTreeMap<String, String>,
        timeout: Duration,
    ) -> anyhow::Result<Self> {
        let mut default_headers = HeaderMap::new();
        for (name, value) in headers {
            default_headers.insert(
                HeaderName::from_bytes(name.as_bytes())?,
                HeaderValue::from_str(value)?,
            );
        }
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .default_headers(default_headers)
            .build()?;
        Ok(Self {
            url: url.into(),
            http,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    fn failure(&self, kind: DeliveryFailure, status: Option<u16>, message: &str) -> NotifyError {
        let mut out = format!("webhook kind={kind}");
        if let Some(status) = status {
            out.push_str(&format!(" status={status}"));
        }
        out.push_str(&format!(" url={}: {message}", self.url));
        NotifyError::Delivery(out)
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    fn name(&self) -> &str {
        "webhook"
    }

    async fn send(&self, report: &PipelineReport) -> Result<(), NotifyError> {
        let resp = self
            .http
            .post(&self.url)
            .json(report)
            .send()
            .await
            .map_err(|e| self.failure(classify(&e), None, &e.to_string()))?;

        let status = resp.status();
        if status.is_success() {
            tracing::debug!(run_id = %report.run_id, status = %status, "webhook delivered");
            return Ok(());
        }

        let body = resp.text().await.unwrap_or_default();
        Err(self.failure(
            DeliveryFailure::Status,
            Some(status.as_u16()),
            &preview_body(&body),
        ))
    }
}
