//! Break-ritual and re-entry requests for the local automation bridge

use crate::error::CoreError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

pub const MIN_RITUAL_SECONDS: u32 = 30;
pub const MAX_RITUAL_SECONDS: u32 = 900;
pub const MAX_KIND_CHARS: usize = 64;
pub const MAX_URL_CHARS: usize = 2048;

fn default_seconds() -> u32 {
    90
}

fn default_kind() -> String {
    "breathing".to_string()
}

fn default_mute_slack() -> bool {
    true
}

fn default_selector_hint() -> String {
    "textarea, [contenteditable=true]".to_string()
}

/// A short reset started when the engine reports overload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BreakRitualRequest {
    #[serde(default = "default_seconds")]
    pub seconds: u32,
    #[serde(default = "default_kind")]
    pub kind: String,
    #[serde(default = "default_mute_slack")]
    pub mute_slack: bool,
}

impl Default for BreakRitualRequest {
    fn default() -> Self {
        Self {
            seconds: default_seconds(),
            kind: default_kind(),
            mute_slack: default_mute_slack(),
        }
    }
}

impl BreakRitualRequest {
    pub fn validate(&self) -> Result<(), CoreError> {
        if !(MIN_RITUAL_SECONDS..=MAX_RITUAL_SECONDS).contains(&self.seconds) {
            return Err(CoreError::InvalidRequest(format!(
                "seconds must be between {MIN_RITUAL_SECONDS} and {MAX_RITUAL_SECONDS}, got {}",
                self.seconds
            )));
        }
        if self.kind.chars().count() > MAX_KIND_CHARS {
            return Err(CoreError::InvalidRequest(format!(
                "kind must be at most {MAX_KIND_CHARS} characters"
            )));
        }
        Ok(())
    }
}

/// Cue to bring the user back to the document they left
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReentryRequest {
    pub url: String,
    #[serde(default)]
    pub note: String,
    #[serde(default = "default_selector_hint")]
    pub selector_hint: String,
}

impl ReentryRequest {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            note: String::new(),
            selector_hint: default_selector_hint(),
        }
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        let len = self.url.chars().count();
        if len == 0 {
            return Err(CoreError::InvalidRequest("missing url".to_string()));
        }
        if len > MAX_URL_CHARS {
            return Err(CoreError::InvalidRequest(format!(
                "url must be at most {MAX_URL_CHARS} characters"
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BridgeResponse {
    pub status: String,
}

impl BridgeResponse {
    pub fn ok() -> Self {
        Self {
            status: "ok".to_string(),
        }
    }
}

/// Dispatch of validated ritual requests
#[async_trait]
pub trait RitualBridge: Send + Sync {
    async fn break_ritual(&self, request: &BreakRitualRequest) -> Result<BridgeResponse, CoreError>;
    async fn reentry(&self, request: &ReentryRequest) -> Result<BridgeResponse, CoreError>;
}

/// Validates and logs requests without driving any automation
#[derive(Debug, Clone, Copy, Default)]
pub struct DryRunBridge;

#[async_trait]
impl RitualBridge for DryRunBridge {
    async fn break_ritual(&self, request: &BreakRitualRequest) -> Result<BridgeResponse, CoreError> {
        request.validate()?;
        warn!("no automation backend configured; break ritual runs as a dry run");
        info!(
            kind = %request.kind,
            seconds = request.seconds,
            mute_slack = request.mute_slack,
            "break ritual"
        );
        Ok(BridgeResponse::ok())
    }

    async fn reentry(&self, request: &ReentryRequest) -> Result<BridgeResponse, CoreError> {
        request.validate()?;
        warn!("no automation backend configured; reentry runs as a dry run");
        info!(
            url = %request.url,
            selector_hint = %request.selector_hint,
            note_len = request.note.len(),
            "reentry"
        );
        Ok(BridgeResponse::ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_break_ritual_defaults() {
        let request: BreakRitualRequest = serde_json::from_str("{}").unwrap();
        assert_eq!(request, BreakRitualRequest::default());
        assert_eq!(request.seconds, 90);
        assert_eq!(request.kind, "breathing");
        assert!(request.mute_slack);
        assert!(request.validate().is_ok());
    }

    #[test]
    fn test_break_ritual_bounds() {
        for (seconds, ok) in [(29, false), (30, true), (900, true), (901, false)] {
            let request = BreakRitualRequest {
                seconds,
                ..Default::default()
            };
            assert_eq!(request.validate().is_ok(), ok, "seconds = {seconds}");
        }

        let request = BreakRitualRequest {
            kind: "x".repeat(65),
            ..Default::default()
        };
        assert!(matches!(request.validate(), Err(CoreError::InvalidRequest(_))));
    }

    #[test]
    fn test_reentry_wire_format() {
        let request: ReentryRequest =
            serde_json::from_str(r#"{"url":"https://docs.example.com/d/1","note":"draft intro"}"#).unwrap();
        assert_eq!(request.selector_hint, "textarea, [contenteditable=true]");
        assert!(request.validate().is_ok());

        let json = serde_json::to_value(&request).unwrap();
        assert!(json.get("selectorHint").is_some());
    }

    #[test]
    fn test_reentry_url_bounds() {
        assert!(ReentryRequest::new("").validate().is_err());
        assert!(ReentryRequest::new("u".repeat(2048)).validate().is_ok());
        assert!(ReentryRequest::new("u".repeat(2049)).validate().is_err());
    }

    #[tokio::test]
    async fn test_dry_run_bridge() {
        let bridge = DryRunBridge;
        let response = bridge.break_ritual(&BreakRitualRequest::default()).await.unwrap();
        assert_eq!(response, BridgeResponse::ok());

        let bad = BreakRitualRequest {
            seconds: 5,
            ..Default::default()
        };
        assert!(bridge.break_ritual(&bad).await.is_err());
        assert!(bridge.reentry(&ReentryRequest::new("")).await.is_err());
    }
}
