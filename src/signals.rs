//! Raw signal inputs
//!
//! Signals come from the platform (tab and idle events, the periodic alarm) and
//! from page observers (pre-aggregated keystroke counts, never raw keys).

use crate::types::ActivityState;
use serde::{Deserialize, Serialize};

/// Most keystrokes accepted from a single batch (about 20 keys/sec for a minute)
pub const MAX_KEYS_PER_BATCH: u32 = 1200;

/// A raw signal delivered to the engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Signal {
    /// The user focused a different tab
    TabActivated { url: String },
    /// The focused tab navigated to a new URL
    TabUpdated { url: String },
    /// The platform idle detector changed state
    IdleChanged { state: ActivityState },
    /// Periodic alarm
    Tick,
    /// Keystroke count observed by a page since its previous batch
    KeystrokeBatch {
        count: i64,
        timestamp_ms: i64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        url: Option<String>,
    },
}

impl Signal {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::TabActivated { .. } => "tab_activated",
            Self::TabUpdated { .. } => "tab_updated",
            Self::IdleChanged { .. } => "idle_changed",
            Self::Tick => "tick",
            Self::KeystrokeBatch { .. } => "keystroke_batch",
        }
    }
}

/// Extract the normalized host of an http(s) URL.
///
/// Anything else (`chrome://`, `file://`, extension pages, garbage) yields
/// `None` and is never tracked.
pub fn host_from_url(url: &str) -> Option<String> {
    let trimmed = url.trim();
    let (scheme, rest) = trimmed.split_once("://")?;
    if !scheme.eq_ignore_ascii_case("http") && !scheme.eq_ignore_ascii_case("https") {
        return None;
    }

    let authority = rest
        .split(['/', '?', '#'])
        .next()
        .unwrap_or_default();
    let without_user = authority.rsplit('@').next().unwrap_or_default();

    let host = if let Some(bracketed) = without_user.strip_prefix('[') {
        // IPv6 literal
        bracketed.split(']').next().unwrap_or_default()
    } else {
        without_user.split(':').next().unwrap_or_default()
    };

    let host = normalize_host(host);
    if host.is_empty() {
        None
    } else {
        Some(host)
    }
}

/// Lower-case a host, drop a trailing dot and a leading `www.`
pub fn normalize_host(raw: &str) -> String {
    let lowered = raw.trim().trim_end_matches('.').to_ascii_lowercase();
    match lowered.strip_prefix("www.") {
        Some(stripped) => stripped.to_string(),
        None => lowered,
    }
}

/// True when `host` is `domain` or one of its subdomains
pub fn host_matches(host: &str, domain: &str) -> bool {
    if domain.is_empty() {
        return false;
    }
    host == domain
        || (host.len() > domain.len()
            && host.ends_with(domain)
            && host.as_bytes()[host.len() - domain.len() - 1] == b'.')
}
