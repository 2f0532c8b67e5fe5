//! Replay a short scripted session and print the final snapshot payload

use chrono::{DateTime, Duration};
use neuronudge_core::{ActivityState, CoreConfig, FocusEngine, Signal, SnapshotEncoder};
use neuronudge_core::storage::MemoryStore;

fn main() {
    let config = CoreConfig::from_json(
        r#"{
            "classificationRules": {
                "github.com": "Productive:code",
                "docs.rs": "Productive:docs",
                "youtube.com": "Distracting:video"
            },
            "distractingLimitMinutes": 5
        }"#,
    );
    let start = DateTime::parse_from_rfc3339("2025-01-15T09:00:00+01:00");

    let (config, start) = match (config, start) {
        (Ok(config), Ok(start)) => (config, start),
        (Err(e), _) => return eprintln!("Error: {e}"),
        (_, Err(e)) => return eprintln!("Error: {e}"),
    };

    let mut engine = match FocusEngine::with_config(MemoryStore::new(), config, start) {
        Ok(engine) => engine,
        Err(e) => return eprintln!("Error: {e}"),
    };

    let tab = |url: &str| Signal::TabActivated { url: url.to_string() };
    let mut script = vec![(0, tab("https://github.com/rust-lang/rust"))];
    for minute in 1..=20 {
        script.push((minute, Signal::Tick));
        script.push((
            minute,
            Signal::KeystrokeBatch {
                count: 45,
                timestamp_ms: (start + Duration::minutes(minute)).timestamp_millis(),
                url: Some("https://github.com/rust-lang/rust".to_string()),
            },
        ));
    }
    script.push((21, tab("https://docs.rs/tokio")));
    script.push((25, tab("https://www.youtube.com/watch?v=abc")));
    for minute in 26..=32 {
        script.push((minute, Signal::Tick));
    }
    script.push((33, Signal::IdleChanged { state: ActivityState::Idle }));

    for (minute, signal) in script {
        if let Err(e) = engine.handle(signal, start + Duration::minutes(minute)) {
            return eprintln!("Error: {e}");
        }
    }

    let snapshot = engine.snapshot(start + Duration::minutes(34));
    match SnapshotEncoder::new().to_json_pretty(&snapshot) {
        Ok(json) => println!("{json}"),
        Err(e) => eprintln!("Error: {e}"),
    }
}
