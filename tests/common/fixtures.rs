//! Static fixtures used across harnesses: provider metadata and JSON-lines
//! log files.

use evlens_core::resolver::{EventTemplate, ProviderMetadata};
use evlens_core::RawRecord;
use std::collections::BTreeMap;
use std::io::Write;
use std::path::Path;

/// A `Security` provider with one templated logon event, a task and a
/// provider keyword.
pub fn security_provider() -> ProviderMetadata {
    ProviderMetadata {
        name: "Security".into(),
        events: vec![
            EventTemplate {
                id: 4624,
                version: 0,
                template: Some("An account was successfully logged on.%n%nAccount: %1".into()),
            },
            EventTemplate {
                id: 4625,
                version: 0,
                template: Some("An account failed to log on.%n%nAccount: %1".into()),
            },
        ],
        keywords: BTreeMap::from([(0x10, "Logon".to_string())]),
        tasks: BTreeMap::from([(12544, "Logon".to_string())]),
        opcodes: BTreeMap::new(),
    }
}

/// The same provider in the on-disk JSON shape.
pub const SECURITY_PROVIDER_JSON: &str = r#"{
    "name": "Security",
    "events": [
        { "id": 4624, "template": "An account was successfully logged on.%n%nAccount: %1" },
        { "id": 4625, "template": "An account failed to log on.%n%nAccount: %1" }
    ],
    "keywords": { "16": "Logon" },
    "tasks": { "12544": "Logon" }
}"#;

/// One JSON line for `record`, newline-terminated.
pub fn jsonl_line(record: &RawRecord) -> String {
    let mut line = serde_json::to_string(record).expect("record serializes");
    line.push('\n');
    line
}

/// Write `records` as a JSON-lines file.
pub fn write_jsonl(path: &Path, records: &[RawRecord]) -> std::io::Result<()> {
    let mut file = std::fs::File::create(path)?;
    for record in records {
        file.write_all(jsonl_line(record).as_bytes())?;
    }
    file.sync_all()
}

/// Append `records` to an existing JSON-lines file.
pub fn append_jsonl(path: &Path, records: &[RawRecord]) -> std::io::Result<()> {
    let mut file = std::fs::OpenOptions::new().append(true).open(path)?;
    for record in records {
        file.write_all(jsonl_line(record).as_bytes())?;
    }
    file.sync_all()
}
