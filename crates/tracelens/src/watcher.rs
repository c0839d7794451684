use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::PathBuf;
use std::time::SystemTime;

use tracelens_core::model::FileType;
use tracelens_ingest::{FileEvent, FileEventKind};
use tracing::warn;

/// Expands glob patterns; a pattern that matches nothing is kept as a literal path so the
/// loader can report it.
pub fn expand_paths(patterns: &[String]) -> Vec<PathBuf> {
    let mut out = BTreeSet::new();
    for pattern in patterns {
        match glob::glob(pattern) {
            Ok(entries) => {
                let before = out.len();
                out.extend(entries.filter_map(Result::ok).filter(|p| p.is_file()));
                if out.len() == before && !has_glob_chars(pattern) {
                    out.insert(PathBuf::from(pattern));
                }
            }
            Err(e) => {
                warn!(pattern = %pattern, error = %e, "invalid glob pattern, using it literally");
                out.insert(PathBuf::from(pattern));
            }
        }
    }
    out.into_iter().collect()
}

fn has_glob_chars(pattern: &str) -> bool {
    pattern.contains(['*', '?', '['])
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FileStamp {
    modified: Option<SystemTime>,
    len: u64,
}

/// Polling stand-in for a filesystem watcher: diffs mtime/size snapshots of the supported files
/// the patterns match.
pub struct PollWatcher {
    patterns: Vec<String>,
    seen: BTreeMap<PathBuf, FileStamp>,
}

impl PollWatcher {
    /// Takes the initial snapshot; files present now do not produce `Created` events.
    pub fn new(patterns: Vec<String>) -> Self {
        let mut watcher = Self {
            patterns,
            seen: BTreeMap::new(),
        };
        watcher.seen = watcher.snapshot();
        watcher
    }

    fn snapshot(&self) -> BTreeMap<PathBuf, FileStamp> {
        expand_paths(&self.patterns)
            .into_iter()
            .filter(|p| FileType::from_path(p).is_some())
            .filter_map(|p| {
                let meta = fs::metadata(&p).ok()?;
                meta.is_file().then(|| {
                    (
                        p,
                        FileStamp {
                            modified: meta.modified().ok(),
                            len: meta.len(),
                        },
                    )
                })
            })
            .collect()
    }

    pub fn poll(&mut self) -> Vec<FileEvent> {
        let current = self.snapshot();
        let mut events = Vec::new();
        for (path, stamp) in &current {
            match self.seen.get(path) {
                None => events.push(FileEvent::new(FileEventKind::Created, path)),
                Some(prev) if prev != stamp => {
                    events.push(FileEvent::new(FileEventKind::Changed, path))
                }
                Some(_) => {}
            }
        }
        for path in self.seen.keys() {
            if !current.contains_key(path) {
                events.push(FileEvent::new(FileEventKind::Deleted, path));
            }
        }
        self.seen = current;
        events
    }
}
