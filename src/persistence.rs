//! Atomic on-disk persistence helpers shared by NAV, Circuit Breaker, Caps,
//! and Cooldown state (spec.md §5, §6: "written atomically (temp file +
//! rename) except the event log which is append-only with `O_APPEND`").
//!
//! Grounded on the append-only JSONL writer in `mqk-audit/src/lib.rs`
//! (`append_line`) and the `tempfile::NamedTempFile` idiom used by the
//! pack's `sq-remediator` tool for atomic rewrite.

use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;

/// Writes `value` as JSON to `path` atomically: write to a temp file in the
/// same directory, then rename over the target. Never leaves a partially
/// written file in place of a valid one.
pub fn atomic_write_json<T: Serialize>(path: &Path, value: &T) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    let body = serde_json::to_vec_pretty(value)?;
    tmp.write_all(&body)?;
    tmp.flush()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// Reads and parses a JSON file. Returns `Ok(None)` if the file does not
/// exist (a fresh install has nothing to recover).
pub fn read_json<T: DeserializeOwned>(path: &Path) -> std::io::Result<Option<T>> {
    match fs::read_to_string(path) {
        Ok(s) => {
            let v = serde_json::from_str(&s)
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
            Ok(Some(v))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

/// Appends one line-delimited JSON record to `path`, creating it (and parent
/// directories) if necessary. Uses `O_APPEND` so concurrent appends from a
/// single writer are never interleaved mid-line.
pub fn append_jsonl<T: Serialize>(path: &Path, value: &T) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let line = serde_json::to_string(value)?;
    let mut f = OpenOptions::new().create(true).append(true).open(path)?;
    f.write_all(line.as_bytes())?;
    f.write_all(b"\n")?;
    Ok(())
}

/// Reads every line of a JSONL file, skipping (and counting) lines that fail
/// to parse rather than aborting the whole load (spec.md §4.2 "Parse errors
/// during load skip the offending line; load never aborts").
pub fn read_jsonl<T: DeserializeOwned>(path: &Path) -> std::io::Result<(Vec<T>, usize)> {
    let content = match fs::read_to_string(path) {
        Ok(s) => s,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok((Vec::new(), 0)),
        Err(e) => return Err(e),
    };

    let mut out = Vec::new();
    let mut skipped = 0usize;
    for line in content.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        match serde_json::from_str::<T>(trimmed) {
            Ok(v) => out.push(v),
            Err(_) => skipped += 1,
        }
    }
    Ok((out, skipped))
}

/// Rewrites a JSONL file keeping only the given records, after copying the
/// current file to a dated backup. Used for circuit-breaker log compaction
/// (spec.md §4.2 "Log compaction").
pub fn compact_jsonl<T: Serialize>(
    path: &Path,
    keep: &[T],
    backup_suffix: &str,
) -> std::io::Result<()> {
    if path.exists() {
        let backup_path = format!("{}.backup.{}", path.display(), backup_suffix);
        fs::copy(path, backup_path)?;
    }

    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(dir)?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    for v in keep {
        let line = serde_json::to_string(v)?;
        tmp.write_all(line.as_bytes())?;
        tmp.write_all(b"\n")?;
    }
    tmp.flush()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Rec {
        id: u64,
        name: String,
    }

    #[test]
    fn atomic_write_then_read_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        let rec = Rec {
            id: 1,
            name: "a".into(),
        };
        atomic_write_json(&path, &rec).unwrap();
        let loaded: Rec = read_json(&path).unwrap().unwrap();
        assert_eq!(loaded, rec);
    }

    #[test]
    fn read_json_missing_file_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.json");
        let loaded: Option<Rec> = read_json(&path).unwrap();
        assert!(loaded.is_none());
    }

    #[test]
    fn jsonl_round_trip_and_skip_bad_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.jsonl");
        append_jsonl(&path, &Rec { id: 1, name: "a".into() }).unwrap();
        append_jsonl(&path, &Rec { id: 2, name: "b".into() }).unwrap();

        // Corrupt a line manually.
        let mut content = fs::read_to_string(&path).unwrap();
        content.push_str("not json\n");
        fs::write(&path, content).unwrap();

        let (records, skipped): (Vec<Rec>, usize) = read_jsonl(&path).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(skipped, 1);
    }

    #[test]
    fn compaction_backs_up_before_rewrite() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.jsonl");
        append_jsonl(&path, &Rec { id: 1, name: "a".into() }).unwrap();
        append_jsonl(&path, &Rec { id: 2, name: "b".into() }).unwrap();

        compact_jsonl(&path, &[Rec { id: 2, name: "b".into() }], "20260101").unwrap();

        let (records, _): (Vec<Rec>, usize) = read_jsonl(&path).unwrap();
        assert_eq!(records, vec![Rec { id: 2, name: "b".into() }]);

        let backup = dir.path().join("events.jsonl.backup.20260101");
        assert!(backup.exists());
    }
}
