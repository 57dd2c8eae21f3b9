// src/sources/snapshot.rs
//! Snapshot source: reads JSON event dumps from a directory. The only
//! concrete source in this crate; it stands in for live connectors in
//! batch and test runs.

use crate::event::RawEvent;
use crate::sources::EventSource;
use anyhow::{Context, Result};
use std::path::PathBuf;

pub const DEFAULT_SNAPSHOT_DIR: &str = "data/snapshots";

pub struct SnapshotSource {
    dir: PathBuf,
}

impl SnapshotSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Synchronous load, also used directly by tests. Unreadable or
    /// unparsable files are skipped with a warning.
    pub fn load(&self) -> Result<Vec<RawEvent>> {
        let mut events = Vec::new();
        if !self.dir.exists() {
            return Ok(events);
        }
        let mut paths: Vec<PathBuf> = std::fs::read_dir(&self.dir)
            .with_context(|| format!("reading snapshot dir {}", self.dir.display()))?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.extension().is_some_and(|ext| ext == "json"))
            .collect();
        paths.sort();

        for path in paths {
            let content = match std::fs::read_to_string(&path) {
                Ok(c) => c,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = ?e, "snapshot_unreadable");
                    continue;
                }
            };
            match serde_json::from_str::<Vec<RawEvent>>(&content) {
                Ok(mut batch) => events.append(&mut batch),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = ?e, "snapshot_unparsable");
                }
            }
        }
        Ok(events)
    }
}

#[async_trait::async_trait]
impl EventSource for SnapshotSource {
    async fn fetch_events(&self) -> Result<Vec<RawEvent>> {
        self.load()
    }

    fn name(&self) -> &'static str {
        "snapshot"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::SourceTag;
    use std::io::Write;

    fn unique_tmp_dir() -> PathBuf {
        let mut dir = std::env::temp_dir();
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        dir.push(format!("snapshot_test_{nanos}"));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn loads_json_dumps_and_skips_garbage() {
        let dir = unique_tmp_dir();
        let good = r#"[{"source":"twitter","timestamp":"2025-06-02T12:00:00Z","title":"Firedancer update","text":"testnet milestone"}]"#;
        let mut f = std::fs::File::create(dir.join("a.json")).unwrap();
        write!(f, "{good}").unwrap();
        let mut g = std::fs::File::create(dir.join("b.json")).unwrap();
        write!(g, "not json at all").unwrap();

        let events = SnapshotSource::new(&dir).load().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].source, Some(SourceTag::Twitter));

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn missing_dir_is_empty_not_error() {
        let events = SnapshotSource::new("definitely/not/a/real/dir").load().unwrap();
        assert!(events.is_empty());
    }
}
