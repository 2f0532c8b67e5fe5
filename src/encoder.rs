//! Snapshot encoding
//!
//! Wraps an [`EngineOutput`] with producer metadata so presentation layers and
//! stored exports can tell which build and which engine instance produced it.

use crate::engine::EngineOutput;
use crate::error::CoreError;
use crate::{CORE_VERSION, PRODUCER_NAME};
use chrono::{DateTime, SecondsFormat};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Current snapshot schema version
pub const SNAPSHOT_SCHEMA_VERSION: &str = "1.0.0";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Producer {
    pub name: String,
    pub version: String,
    pub instance_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotPayload {
    pub schema_version: String,
    pub producer: Producer,
    /// RFC 3339, UTC
    pub computed_at: String,
    pub snapshot: EngineOutput,
}

/// Produces [`SnapshotPayload`]s stamped with one instance id
pub struct SnapshotEncoder {
    instance_id: String,
}

impl Default for SnapshotEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl SnapshotEncoder {
    /// Create an encoder with a fresh instance id
    pub fn new() -> Self {
        Self {
            instance_id: Uuid::new_v4().to_string(),
        }
    }

    pub fn with_instance_id(instance_id: impl Into<String>) -> Self {
        Self {
            instance_id: instance_id.into(),
        }
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    pub fn encode(&self, snapshot: &EngineOutput) -> Result<SnapshotPayload, CoreError> {
        let computed_at = DateTime::from_timestamp_millis(snapshot.computed_at_ms)
            .ok_or_else(|| {
                CoreError::ParseError(format!("timestamp out of range: {}", snapshot.computed_at_ms))
            })?
            .to_rfc3339_opts(SecondsFormat::Millis, true);

        Ok(SnapshotPayload {
            schema_version: SNAPSHOT_SCHEMA_VERSION.to_string(),
            producer: Producer {
                name: PRODUCER_NAME.to_string(),
                version: CORE_VERSION.to_string(),
                instance_id: self.instance_id.clone(),
            },
            computed_at,
            snapshot: snapshot.clone(),
        })
    }

    /// Compact JSON, one payload per line when streamed
    pub fn to_json(&self, snapshot: &EngineOutput) -> Result<String, CoreError> {
        let payload = self.encode(snapshot)?;
        Ok(serde_json::to_string(&payload)?)
    }

    pub fn to_json_pretty(&self, snapshot: &EngineOutput) -> Result<String, CoreError> {
        let payload = self.encode(snapshot)?;
        Ok(serde_json::to_string_pretty(&payload)?)
    }
}
