//! Nudge text
//!
//! Generated copy is a best-effort capability. The presenter races the
//! generator against a timeout and falls back to bundled local copy, so a slow
//! or failing generator can only ever cost a nicer sentence.

use crate::error::CoreError;
use crate::types::FocusState;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tracing::{debug, warn};

/// Default budget for one generation call
pub const DEFAULT_NUDGE_TIMEOUT: Duration = Duration::from_secs(3);

/// Generated text longer than this is cut at a word boundary
pub const MAX_NUDGE_CHARS: usize = 280;

/// Self-reported mood used to pick the tone
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mood {
    Calm,
    #[default]
    Neutral,
    Tired,
    Stressed,
}

impl fmt::Display for Mood {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Calm => "calm",
            Self::Neutral => "neutral",
            Self::Tired => "tired",
            Self::Stressed => "stressed",
        };
        f.write_str(s)
    }
}

/// Source of nudge text
#[async_trait]
pub trait NudgeGenerator: Send + Sync {
    async fn generate(&self, state: FocusState, mood: Mood) -> Result<String, CoreError>;
}

/// Bundled copy, always available
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalCopy;

impl LocalCopy {
    pub fn line(state: FocusState, mood: Mood) -> &'static str {
        match (state, mood) {
            (FocusState::Steady, Mood::Tired) => "Good pace. Keep a glass of water in reach.",
            (FocusState::Steady, _) => "You're in a good rhythm. Keep going.",
            (FocusState::Drift, Mood::Stressed) => {
                "Lots of tabs lately. Pick the one thing that matters and close the rest."
            }
            (FocusState::Drift, _) => "Attention is wandering. Return to the task you started with.",
            (FocusState::Overload, Mood::Calm) => "Long stretch without a pause. Stand up for a minute.",
            (FocusState::Overload, _) => "You've been at it a while. Take a short break and breathe.",
        }
    }
}

#[async_trait]
impl NudgeGenerator for LocalCopy {
    async fn generate(&self, state: FocusState, mood: Mood) -> Result<String, CoreError> {
        Ok(Self::line(state, mood).to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NudgeSource {
    Generated,
    Fallback,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Nudge {
    pub text: String,
    pub source: NudgeSource,
}

/// Wraps a generator with a timeout and the local fallback
pub struct NudgePresenter<G> {
    generator: G,
    timeout: Duration,
}

impl<G: NudgeGenerator> NudgePresenter<G> {
    pub fn new(generator: G) -> Self {
        Self::with_timeout(generator, DEFAULT_NUDGE_TIMEOUT)
    }

    pub fn with_timeout(generator: G, timeout: Duration) -> Self {
        Self { generator, timeout }
    }

    /// Never fails; errors, timeouts and blank text all yield local copy.
    pub async fn nudge(&self, state: FocusState, mood: Mood) -> Nudge {
        let attempt = tokio::time::timeout(self.timeout, self.generator.generate(state, mood)).await;
        let failure = match attempt {
            Ok(Ok(text)) => match tidy(&text) {
                Some(text) => {
                    debug!(%state, %mood, "generated nudge");
                    return Nudge {
                        text,
                        source: NudgeSource::Generated,
                    };
                }
                None => "generator returned blank text".to_string(),
            },
            Ok(Err(err)) => err.to_string(),
            Err(_) => CoreError::Timeout(format!("nudge generation exceeded {:?}", self.timeout)).to_string(),
        };
        warn!(%state, %mood, reason = %failure, "using local nudge copy");
        Nudge {
            text: LocalCopy::line(state, mood).to_string(),
            source: NudgeSource::Fallback,
        }
    }
}

fn tidy(text: &str) -> Option<String> {
    let text = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if text.is_empty() {
        return None;
    }
    if text.chars().count() <= MAX_NUDGE_CHARS {
        return Some(text);
    }
    let mut cut = String::new();
    for word in text.split(' ') {
        if cut.chars().count() + word.chars().count() + 1 > MAX_NUDGE_CHARS {
            break;
        }
        if !cut.is_empty() {
            cut.push(' ');
        }
        cut.push_str(word);
    }
    if cut.is_empty() {
        cut = text.chars().take(MAX_NUDGE_CHARS).collect();
    }
    Some(cut)
}
