//! HTTP client for the demo API (`/people`, `/places`, `/report`).
//!
//! Every request is a JSON `POST` whose body gets the configured `apikey`
//! merged in. Lookup replies are classified by `LookupResponse`; report
//! replies are interpreted here.

use std::time::Duration;

use async_trait::async_trait;
use resolution::lookup::{LookupRequest, LookupResponse};
use resolution::{
    LocatorError, LocatorResult, LookupClient, LookupResult, SubmissionEndpoint,
    SubmissionReceipt,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::CentralConfig;

const PEOPLE_PATH: &str = "people";
const PLACES_PATH: &str = "places";
const REPORT_PATH: &str = "report";

/// Body of a `/report` submission (API key is added on send).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReportRequest {
    pub task: String,
    pub answer: String,
}

#[derive(Debug, Clone, Deserialize)]
struct ReportResponse {
    code: i64,
    #[serde(default)]
    message: serde_json::Value,
}

/// Transport for the demo API.
pub struct CentralaClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    task: String,
    sentinel: String,
}

impl CentralaClient {
    pub fn new(config: &CentralConfig) -> LocatorResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| LocatorError::Configuration(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            task: config.task.clone(),
            sentinel: config.restricted_sentinel.clone(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    /// POST `body` (plus `apikey`) to `path`; returns the status and raw body.
    pub async fn send_raw<T: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &T,
    ) -> LocatorResult<(u16, String)> {
        let payload = with_api_key(body, &self.api_key)?;
        let response = self
            .http
            .post(self.url(path))
            .json(&payload)
            .send()
            .await
            .map_err(|e| LocatorError::Transport(format!("POST /{path}: {e}")))?;
        let status = response.status().as_u16();
        let text = response
            .text()
            .await
            .map_err(|e| LocatorError::Transport(format!("reading /{path} reply: {e}")))?;
        debug!(path, status, body = %text, "demo API reply");
        Ok((status, text))
    }

    async fn query(&self, path: &str, canonical_id: &str) -> LookupResult {
        let request = LookupRequest {
            query: canonical_id.to_string(),
        };
        match self.send_raw(path, &request).await {
            Ok((_, body)) => LookupResponse::classify_body(&body, &self.sentinel),
            Err(e) => {
                warn!(path, query = canonical_id, error = %e, "lookup failed");
                LookupResult::transport_error(e.to_string())
            }
        }
    }

    /// Submit one answer to `/report`.
    pub async fn send_answer(&self, answer: &str) -> LocatorResult<SubmissionReceipt> {
        let request = ReportRequest {
            task: self.task.clone(),
            answer: answer.to_string(),
        };
        let (status, body) = match self.send_raw(REPORT_PATH, &request).await {
            Ok(reply) => reply,
            Err(e) => return Err(LocatorError::rejected(answer, e.to_string())),
        };
        let receipt = interpret_report(status, &body, answer)?;
        info!(answer, message = %receipt.message, "answer accepted");
        Ok(receipt)
    }
}

#[async_trait]
impl LookupClient for CentralaClient {
    async fn lookup_person(&self, canonical_id: &str) -> LookupResult {
        self.query(PEOPLE_PATH, canonical_id).await
    }

    async fn lookup_place(&self, canonical_id: &str) -> LookupResult {
        self.query(PLACES_PATH, canonical_id).await
    }
}

#[async_trait]
impl SubmissionEndpoint for CentralaClient {
    async fn submit(&self, answer: &str) -> LocatorResult<SubmissionReceipt> {
        self.send_answer(answer).await
    }
}

/// Serialize `body` and add `apikey`; the body must be a JSON object.
pub fn with_api_key<T: Serialize + ?Sized>(
    body: &T,
    api_key: &str,
) -> LocatorResult<serde_json::Value> {
    let mut value = serde_json::to_value(body)
        .map_err(|e| LocatorError::Transport(format!("cannot encode request: {e}")))?;
    match value.as_object_mut() {
        Some(object) => {
            object.insert(
                "apikey".to_string(),
                serde_json::Value::String(api_key.to_string()),
            );
            Ok(value)
        }
        None => Err(LocatorError::Transport(
            "request body must be a JSON object".to_string(),
        )),
    }
}

/// Accepted only for a 2xx reply whose body has `code == 0`.
pub fn interpret_report(status: u16, body: &str, answer: &str) -> LocatorResult<SubmissionReceipt> {
    let parsed: ReportResponse = match serde_json::from_str(body) {
        Ok(parsed) => parsed,
        Err(_) => {
            return Err(LocatorError::rejected(
                answer,
                format!("HTTP {status}: {}", body.trim()),
            ))
        }
    };
    let message = match parsed.message {
        serde_json::Value::String(s) => s,
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    };
    if !(200..300).contains(&status) || parsed.code != 0 {
        return Err(LocatorError::rejected(
            answer,
            format!("HTTP {status}, code {}: {message}", parsed.code),
        ));
    }
    Ok(SubmissionReceipt {
        code: parsed.code,
        message,
    })
}
