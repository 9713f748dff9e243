//! Host-side record IO: reading record batches and queuing edit requests.

use std::fs;
use std::io::{BufRead, BufReader, Write};
use std::path::Path;

use anyhow::{Context, anyhow};
use serde_json::Value;
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use crate::edit::RecordUpdate;
use crate::task::RawRecord;

/// Reads a batch from a JSON array file or a JSON Lines file.
#[tracing::instrument(skip(path))]
pub fn load_records(path: &Path) -> anyhow::Result<Vec<RawRecord>> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("failed to read records from {}", path.display()))?;
    let records = parse_records(&text)
        .with_context(|| format!("failed to parse records in {}", path.display()))?;
    info!(file = %path.display(), count = records.len(), "loaded records");
    Ok(records)
}

/// A record that does not convert is skipped; the rest of the batch survives.
pub fn parse_records(text: &str) -> anyhow::Result<Vec<RawRecord>> {
    let trimmed = text.trim_start();
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }

    let values: Vec<Value> = if trimmed.starts_with('[') {
        serde_json::from_str(trimmed).context("records file is not a JSON array")?
    } else {
        let mut values = Vec::new();
        for (idx, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match serde_json::from_str::<Value>(line) {
                Ok(value) => values.push(value),
                Err(err) => warn!(line = idx + 1, error = %err, "skipping malformed record line"),
            }
        }
        values
    };

    let total = values.len();
    let records: Vec<RawRecord> = values
        .into_iter()
        .enumerate()
        .filter_map(|(idx, value)| {
            if !value.is_object() {
                warn!(record = idx + 1, "skipping non-object record");
                return None;
            }
            match serde_json::from_value::<RawRecord>(value) {
                Ok(record) => Some(record),
                Err(err) => {
                    warn!(record = idx + 1, error = %err, "skipping unconvertible record");
                    None
                }
            }
        })
        .collect();

    debug!(total, kept = records.len(), "converted records");
    Ok(records)
}

/// Appends one update as a JSON line. The outbox is rewritten through a
/// temporary file so a reader never sees a half-written line.
#[tracing::instrument(skip(path, update), fields(id = update.id))]
pub fn append_update(path: &Path, update: &RecordUpdate) -> anyhow::Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir).with_context(|| format!("failed to create {}", dir.display()))?;

    let existing = if path.exists() {
        fs::read(path).with_context(|| format!("failed to read {}", path.display()))?
    } else {
        Vec::new()
    };

    let mut temp = NamedTempFile::new_in(dir)?;
    temp.write_all(&existing)?;
    if existing.last().is_some_and(|byte| *byte != b'\n') {
        writeln!(temp)?;
    }
    let serialized = serde_json::to_string(update)?;
    writeln!(temp, "{serialized}")?;
    temp.flush()?;

    temp.persist(path)
        .map_err(|err| anyhow!("failed to persist {}: {}", path.display(), err))?;

    debug!(file = %path.display(), "queued record update");
    Ok(())
}

#[tracing::instrument(skip(path))]
pub fn load_updates(path: &Path) -> anyhow::Result<Vec<RecordUpdate>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let file = fs::File::open(path)?;
    let reader = BufReader::new(file);

    let mut out = Vec::new();
    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let update: RecordUpdate = serde_json::from_str(trimmed)
            .with_context(|| format!("failed parsing {} line {}", path.display(), idx + 1))?;
        out.push(update);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use serde_json::json;
    use tempfile::tempdir;

    use super::*;

    #[test]
    fn reads_json_arrays() {
        let records = parse_records(
            r#"[{"id": 1, "Titre": "A", "startDate": "2025-01-06"}, 42, {"id": 2}]"#,
        )
        .expect("parse array");

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].name, json!("A"));
        assert_eq!(records[0].start, json!("2025-01-06"));
        assert_eq!(records[1].id, json!(2));
    }

    #[test]
    fn keeps_records_with_several_name_spellings() {
        let records = parse_records(
            r#"[{"id": 1, "Titre": "Pose", "Name": "Install", "start": "2025-01-06", "duration": 2}]"#,
        )
        .expect("parse array");

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].name, json!("Pose"));
    }

    #[test]
    fn reads_json_lines_and_skips_garbage() {
        let text = "{\"id\": 1}\n\nnot json\n{\"id\": 3, \"groupBy\": \"Ops\"}\n";
        let records = parse_records(text).expect("parse lines");

        assert_eq!(records.len(), 2);
        assert_eq!(records[1].group_by, json!("Ops"));
        assert!(parse_records("   ").expect("empty input").is_empty());
        assert!(parse_records("[1, 2").is_err());
    }

    #[test]
    fn appends_updates_to_outbox() {
        let dir = tempdir().expect("tempdir");
        let outbox = dir.path().join("nested").join("outbox.jsonl");

        for id in [4, 9] {
            let update = RecordUpdate {
                id,
                fields: BTreeMap::from([("duration".to_string(), json!(3.0))]),
            };
            append_update(&outbox, &update).expect("append update");
        }

        let updates = load_updates(&outbox).expect("load updates");
        let ids: Vec<i64> = updates.iter().map(|u| u.id).collect();
        assert_eq!(ids, vec![4, 9]);
        assert_eq!(updates[1].fields["duration"], json!(3.0));
        assert!(
            load_updates(&dir.path().join("missing.jsonl"))
                .expect("missing outbox")
                .is_empty()
        );
    }
}
