//! NeuroNudge core - Activity accounting and focus-state engine
//!
//! The engine turns raw browser signals (tab switches, idle transitions, the
//! periodic tick and pre-aggregated keystroke counts) into per-host time
//! ledgers, a coarse focus state, daily goal progress and limit verdicts:
//! signal → ledgers → rollup → goals / limits → classifier → output.
//!
//! ## Modules
//!
//! - **Accounting**: `summary`, `host_ledger`, `keystrokes`, `rollup`
//! - **Evaluation**: `rules`, `classifier`, `goals`, `limits`
//! - **Coordination**: `engine` (single coordinator) and `actor` (one task owns it)
//! - **Presentation helpers**: `nudge`, `ritual`, `encoder`, `ffi`

pub mod actor;
pub mod cache;
pub mod classifier;
pub mod clock;
pub mod config;
pub mod encoder;
pub mod engine;
pub mod error;
pub mod goals;
pub mod host_ledger;
pub mod keystrokes;
pub mod limits;
pub mod nudge;
pub mod ritual;
pub mod rollup;
pub mod rules;
pub mod signals;
pub mod storage;
pub mod summary;
pub mod types;

// FFI bindings for C interop (always available for cdylib/staticlib builds)
pub mod ffi;

pub use actor::{spawn_engine, EngineHandle};
pub use config::CoreConfig;
pub use encoder::{SnapshotEncoder, SnapshotPayload};
pub use engine::{DiscardReason, EngineOutput, FocusEngine, SignalOutcome};
pub use error::CoreError;
pub use signals::Signal;
pub use types::{ActivityState, Category, FocusState, GoalState};

/// Core version embedded in every snapshot payload
pub const CORE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Producer name for snapshot payloads
pub const PRODUCER_NAME: &str = "neuronudge-core";
