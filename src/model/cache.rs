//! Persistent prompt -> completion store.
//!
//! Records are kept in a JSON lines file, one [`CompletionRecord`] per line,
//! and loaded into memory when the cache is opened. The store is append-only:
//! the first completion stored for a prompt is the one every later lookup
//! returns.

use std::collections::HashMap;
use std::fs::OpenOptions;
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// A prompt together with the completion the model produced for it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionRecord {
    /// The exact prompt text (the cache key).
    pub prompt: String,
    /// The generated text, with leading whitespace removed.
    pub completion: String,
    /// Per-token top log-probabilities, when the service reported them.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub top_logprobs: Vec<HashMap<String, f64>>,
}

impl CompletionRecord {
    pub fn new(prompt: impl Into<String>, completion: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            completion: completion.into(),
            top_logprobs: Vec::new(),
        }
    }
}

/// Completion store keyed by exact prompt text.
#[derive(Debug, Default)]
pub struct CompletionCache {
    path: Option<PathBuf>,
    entries: HashMap<String, CompletionRecord>,
}

impl CompletionCache {
    /// A cache that lives only as long as the process.
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// An in-memory cache pre-populated with `records`.
    pub fn with_records(records: impl IntoIterator<Item = CompletionRecord>) -> Self {
        let mut cache = Self::in_memory();
        for record in records {
            cache.entries.entry(record.prompt.clone()).or_insert(record);
        }
        cache
    }

    /// Open the cache file at `path`, creating it on first write.
    ///
    /// Lines that fail to parse are skipped with a warning.
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut entries = HashMap::new();

        if path.exists() {
            let reader = BufReader::new(std::fs::File::open(&path)?);
            for (line_no, line) in reader.lines().enumerate() {
                let line = line?;
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<CompletionRecord>(&line) {
                    Ok(record) => {
                        entries.entry(record.prompt.clone()).or_insert(record);
                    }
                    Err(e) => {
                        warn!(
                            path = %path.display(),
                            line = line_no + 1,
                            error = %e,
                            "skipping malformed cache line"
                        );
                    }
                }
            }
        }

        info!(path = %path.display(), entries = entries.len(), "opened completion cache");
        Ok(Self {
            path: Some(path),
            entries,
        })
    }

    /// Look up the completion stored for `prompt`.
    pub fn get(&self, prompt: &str) -> Option<&CompletionRecord> {
        self.entries.get(prompt)
    }

    /// Whether a completion is stored for `prompt`.
    pub fn contains(&self, prompt: &str) -> bool {
        self.entries.contains_key(prompt)
    }

    /// Store `record` unless its prompt is already present, persisting it to
    /// the backing file. Returns whether the record was new.
    pub fn insert(&mut self, record: CompletionRecord) -> io::Result<bool> {
        if self.entries.contains_key(&record.prompt) {
            debug!("prompt already cached; keeping the existing completion");
            return Ok(false);
        }

        if let Some(path) = &self.path {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)?;
            }
            let mut file = OpenOptions::new().create(true).append(true).open(path)?;
            let line = serde_json::to_string(&record)?;
            writeln!(file, "{line}")?;
        }

        self.entries.insert(record.prompt.clone(), record);
        Ok(true)
    }

    /// Number of cached prompts.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The backing file, if any.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Iterate over all records in no particular order.
    pub fn records(&self) -> impl Iterator<Item = &CompletionRecord> {
        self.entries.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_cache_path() -> PathBuf {
        std::env::temp_dir().join(format!("textrl_cache_{}.jsonl", uuid::Uuid::new_v4()))
    }

    #[test]
    fn test_first_completion_wins() {
        let mut cache = CompletionCache::in_memory();
        assert!(cache.insert(CompletionRecord::new("p", "Left.")).unwrap());
        assert!(!cache.insert(CompletionRecord::new("p", "Right.")).unwrap());
        assert_eq!(cache.get("p").unwrap().completion, "Left.");
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_with_records() {
        let cache = CompletionCache::with_records([
            CompletionRecord::new("a", "1"),
            CompletionRecord::new("b", "2"),
            CompletionRecord::new("a", "3"),
        ]);
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get("a").unwrap().completion, "1");
        assert!(cache.path().is_none());
    }

    #[test]
    fn test_persists_across_reopen() {
        let path = temp_cache_path();
        {
            let mut cache = CompletionCache::open(&path).unwrap();
            assert!(cache.is_empty());
            cache
                .insert(CompletionRecord::new("You are at 1.\nYou are at 2.", "Right."))
                .unwrap();
            cache.insert(CompletionRecord::new("q", "Left.")).unwrap();
        }

        let cache = CompletionCache::open(&path).unwrap();
        assert_eq!(cache.len(), 2);
        assert_eq!(
            cache.get("You are at 1.\nYou are at 2.").unwrap().completion,
            "Right."
        );
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_open_skips_malformed_lines() {
        let path = temp_cache_path();
        let good = serde_json::to_string(&CompletionRecord::new("p", "Left.")).unwrap();
        std::fs::write(&path, format!("not json\n\n{good}\n")).unwrap();

        let cache = CompletionCache::open(&path).unwrap();
        assert_eq!(cache.len(), 1);
        assert!(cache.contains("p"));
        std::fs::remove_file(&path).ok();
    }
}
