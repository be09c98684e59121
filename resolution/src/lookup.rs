//! LookupClient contract and wire-level classification of lookup replies.
//!
//! The demo API answers both `person → places` and `place → persons`
//! queries with `{ code, message, flag? }`. Classification happens once,
//! here, so the search only ever sees a tagged `LookupStatus`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::entity::EntityKind;

/// Marker the lookup API uses when it withholds data.
pub const RESTRICTED_SENTINEL: &str = "[**RESTRICTED DATA**]";

/// Outcome of one lookup, decoded at the boundary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum LookupStatus {
    /// Raw tokens of the opposite kind (not yet normalized).
    Ok(Vec<String>),
    /// Details withheld; the target is associated with the queried entity.
    Restricted,
    /// The API does not know the entity (non-zero code).
    NotFound,
    /// The request did not complete.
    TransportError(String),
    /// The reply could not be decoded.
    Malformed(String),
}

impl LookupStatus {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Ok(_) => "ok",
            Self::Restricted => "restricted",
            Self::NotFound => "not_found",
            Self::TransportError(_) => "transport_error",
            Self::Malformed(_) => "malformed",
        }
    }

    /// `true` for outcomes that degrade the traversal instead of informing it.
    pub fn is_degraded(&self) -> bool {
        matches!(self, Self::TransportError(_) | Self::Malformed(_))
    }
}

/// A classified lookup reply plus the optional flag some replies carry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LookupResult {
    pub status: LookupStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flag: Option<String>,
}

impl LookupResult {
    pub fn ok<I, S>(tokens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::from(LookupStatus::Ok(tokens.into_iter().map(Into::into).collect()))
    }

    pub fn restricted() -> Self {
        Self::from(LookupStatus::Restricted)
    }

    pub fn not_found() -> Self {
        Self::from(LookupStatus::NotFound)
    }

    pub fn transport_error(message: impl Into<String>) -> Self {
        Self::from(LookupStatus::TransportError(message.into()))
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        Self::from(LookupStatus::Malformed(message.into()))
    }

    pub fn with_flag(mut self, flag: impl Into<String>) -> Self {
        self.flag = Some(flag.into());
        self
    }
}

impl From<LookupStatus> for LookupResult {
    fn from(status: LookupStatus) -> Self {
        Self { status, flag: None }
    }
}

/// Request body for `/people` and `/places` (API key is added by the transport).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LookupRequest {
    pub query: String,
}

/// Raw reply body for `/people` and `/places`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LookupResponse {
    pub code: i64,
    #[serde(default)]
    pub message: serde_json::Value,
    #[serde(default)]
    pub flag: Option<String>,
}

impl LookupResponse {
    /// Decode the reply: `code != 0` ⇒ not found, sentinel ⇒ restricted,
    /// otherwise a whitespace-delimited token list.
    pub fn classify(&self, sentinel: &str) -> LookupResult {
        let status = if self.code != 0 {
            LookupStatus::NotFound
        } else {
            match &self.message {
                serde_json::Value::String(message) if message.trim() == sentinel => {
                    LookupStatus::Restricted
                }
                serde_json::Value::String(message) => LookupStatus::Ok(
                    message.split_whitespace().map(str::to_string).collect(),
                ),
                other => LookupStatus::Malformed(format!("expected string message, got {other}")),
            }
        };
        LookupResult {
            status,
            flag: self.flag.clone().filter(|f| !f.is_empty()),
        }
    }

    /// Decode a raw body; anything that is not a `{code, message}` object
    /// becomes `Malformed`.
    pub fn classify_body(body: &str, sentinel: &str) -> LookupResult {
        match serde_json::from_str::<LookupResponse>(body) {
            Ok(response) => response.classify(sentinel),
            Err(e) => LookupResult::malformed(e.to_string()),
        }
    }
}

/// The two lookup oracles.
///
/// Implementations never fail: transport problems are reported as
/// `LookupStatus::TransportError` so the search can degrade and continue.
#[async_trait]
pub trait LookupClient: Send + Sync {
    /// Places a person has been seen in.
    async fn lookup_person(&self, canonical_id: &str) -> LookupResult;

    /// Persons seen in a place.
    async fn lookup_place(&self, canonical_id: &str) -> LookupResult;

    /// Dispatch by kind.
    async fn lookup(&self, kind: EntityKind, canonical_id: &str) -> LookupResult {
        match kind {
            EntityKind::Person => self.lookup_person(canonical_id).await,
            EntityKind::Place => self.lookup_place(canonical_id).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(code: i64, message: &str) -> LookupResponse {
        LookupResponse {
            code,
            message: serde_json::Value::String(message.to_string()),
            flag: None,
        }
    }

    #[test]
    fn splits_tokens_on_whitespace() {
        let result = response(0, "KRAKOW  WARSZAWA\nELBLAG").classify(RESTRICTED_SENTINEL);
        assert_eq!(result, LookupResult::ok(["KRAKOW", "WARSZAWA", "ELBLAG"]));
    }

    #[test]
    fn sentinel_is_restricted() {
        let result = response(0, RESTRICTED_SENTINEL).classify(RESTRICTED_SENTINEL);
        assert_eq!(result.status, LookupStatus::Restricted);
    }

    #[test]
    fn nonzero_code_is_not_found() {
        let result = response(-200, RESTRICTED_SENTINEL).classify(RESTRICTED_SENTINEL);
        assert_eq!(result.status, LookupStatus::NotFound);
    }

    #[test]
    fn empty_message_is_empty_ok() {
        let result = response(0, "").classify(RESTRICTED_SENTINEL);
        assert_eq!(result.status, LookupStatus::Ok(vec![]));
    }

    #[test]
    fn flag_is_carried_through() {
        let body = r#"{"code":0,"message":"RAFAL","flag":"{{FLG:FOUND}}"}"#;
        let result = LookupResponse::classify_body(body, RESTRICTED_SENTINEL);
        assert_eq!(result.flag.as_deref(), Some("{{FLG:FOUND}}"));
        assert_eq!(result.status, LookupStatus::Ok(vec!["RAFAL".into()]));
    }

    #[test]
    fn undecodable_body_is_malformed() {
        let result = LookupResponse::classify_body("<html>502</html>", RESTRICTED_SENTINEL);
        assert!(matches!(result.status, LookupStatus::Malformed(_)));
        assert!(result.status.is_degraded());

        let result = LookupResponse::classify_body(r#"{"code":0,"message":42}"#, RESTRICTED_SENTINEL);
        assert_eq!(result.status.label(), "malformed");
    }
}
