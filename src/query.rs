//! Query engine — the serve-phase read path.
//!
//! The engine loads `master_index.json` once at construction and is
//! read-only afterwards.  A query expands its first term over the sorted
//! word list by prefix range scan, pulls the candidate shards through an
//! in-process cache, exact-filters with AND-of-substrings, and ranks by the
//! score table (lower is better):
//!
//! | Score | Condition (lowercased)                         |
//! |-------|------------------------------------------------|
//! | 1     | title == query                                 |
//! | 2     | title starts with query                        |
//! | 3     | every term is a substring of title             |
//! | 4     | every term is a substring of artist            |
//! | 5     | every term is a substring of title + " " + artist |
//!
//! One track keeps its minimum score across all observations; ties keep the
//! first-observation order.  The shard cache is unbounded for the process
//! lifetime; concurrent loads of the same shard are allowed to race
//! (last-writer-wins) — shards are immutable once on disk.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::indexer::{MasterIndex, Shard, CHUNK_DIR, DATA_DIR, MASTER_INDEX_FILE};
use crate::track::Preview;

pub const DEFAULT_MAX_RESULTS: usize = 50;

#[derive(Error, Debug)]
pub enum QueryError {
    #[error("query must be at least 2 characters long")]
    QueryTooShort,
    #[error("master index not loaded: {0}")]
    IndexNotLoaded(String),
}

impl QueryError {
    /// Status code for the transport layer wrapping this engine.
    pub fn http_status(&self) -> u16 {
        match self {
            QueryError::QueryTooShort     => 400,
            QueryError::IndexNotLoaded(_) => 503,
        }
    }
}

// ── Result record ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    #[serde(rename = "TITLE")]
    pub title:          String,
    #[serde(rename = "ARTIST")]
    pub artist:         String,
    #[serde(rename = "_originalIndex")]
    pub original_index: u32,
    #[serde(rename = "_superIndex")]
    pub super_index:    u32,
    #[serde(rename = "_priority")]
    pub priority:       u8,
}

// ── Engine ───────────────────────────────────────────────────────────────────

#[derive(Debug)]
pub struct QueryEngine {
    chunk_dir: PathBuf,
    master:    MasterIndex,
    cache:     RwLock<HashMap<u32, Arc<Shard>>>,
}

impl QueryEngine {
    /// Load `master_index.json` from `<output_root>/Data/`.  Any failure —
    /// missing file, malformed JSON — means the engine is not available.
    pub fn load<P: AsRef<Path>>(output_root: P) -> Result<Self, QueryError> {
        let data_dir = output_root.as_ref().join(DATA_DIR);
        let raw = fs::read(data_dir.join(MASTER_INDEX_FILE))
            .map_err(|e| QueryError::IndexNotLoaded(e.to_string()))?;
        let master: MasterIndex = serde_json::from_slice(&raw)
            .map_err(|e| QueryError::IndexNotLoaded(e.to_string()))?;
        Ok(Self {
            chunk_dir: data_dir.join(CHUNK_DIR),
            master,
            cache: RwLock::new(HashMap::new()),
        })
    }

    pub fn master(&self) -> &MasterIndex {
        &self.master
    }

    /// Free-text search.  `max_results` defaults to 50.
    pub fn search(
        &self,
        q: &str,
        max_results: Option<usize>,
    ) -> Result<Vec<SearchHit>, QueryError> {
        let query = q.to_lowercase().trim().to_owned();
        if query.chars().count() < 2 {
            return Err(QueryError::QueryTooShort);
        }
        let max_results = max_results.unwrap_or(DEFAULT_MAX_RESULTS);

        let terms: Vec<String> = query.split_whitespace().map(str::to_owned).collect();
        let prefix = match terms.first() {
            Some(t) => t.as_str(),
            None    => return Err(QueryError::QueryTooShort),
        };

        // Prefix range scan over the sorted word list.
        let words = &self.master.words;
        let lo = words.partition_point(|w| w.as_str() < prefix);
        let candidates: Vec<&String> = words[lo..]
            .iter()
            .take_while(|w| w.starts_with(prefix))
            .collect();

        // Group candidate words by shard, keeping first-appearance shard
        // order so result ordering is deterministic.
        let mut by_shard: Vec<(u32, Vec<&String>)> = Vec::new();
        for word in candidates {
            let chunk = match self.master.word_to_chunk_map.get(word.as_str()) {
                Some(c) => *c,
                None    => continue,
            };
            match by_shard.iter_mut().find(|(id, _)| *id == chunk) {
                Some((_, group)) => group.push(word),
                None             => by_shard.push((chunk, vec![word])),
            }
        }

        // Best score per original_index, in first-observation order.
        let mut ranked: Vec<(Preview, u8)> = Vec::new();
        let mut positions: HashMap<u32, usize> = HashMap::new();

        for (chunk, group) in by_shard {
            let shard = match self.shard(chunk) {
                Some(s) => s,
                None    => continue,
            };
            for word in group {
                let posting = match shard.get(word.as_str()) {
                    Some(p) => p,
                    None    => continue,
                };
                for preview in posting {
                    let full_text = preview.search_text().to_lowercase();
                    if !terms.iter().all(|t| full_text.contains(t.as_str())) {
                        continue;
                    }
                    let score = score(preview, &query, &terms);
                    match positions.get(&preview.original_index) {
                        Some(&pos) => {
                            if score < ranked[pos].1 {
                                ranked[pos].1 = score;
                            }
                        }
                        None => {
                            positions.insert(preview.original_index, ranked.len());
                            ranked.push((preview.clone(), score));
                        }
                    }
                }
            }
        }

        ranked.sort_by_key(|(_, score)| *score); // stable — ties keep order
        ranked.truncate(max_results);

        Ok(ranked
            .into_iter()
            .map(|(p, score)| SearchHit {
                title:          p.title,
                artist:         p.artist,
                original_index: p.original_index,
                super_index:    p.super_index,
                priority:       score,
            })
            .collect())
    }

    /// Shard lookup through the cache.  A shard that cannot be read or
    /// parsed is skipped, not fatal.
    fn shard(&self, chunk: u32) -> Option<Arc<Shard>> {
        if let Ok(cache) = self.cache.read() {
            if let Some(shard) = cache.get(&chunk) {
                return Some(Arc::clone(shard));
            }
        }

        let path = self.chunk_dir.join(format!("{chunk}.json"));
        let shard: Shard = match fs::read(&path).map_err(|e| e.to_string()).and_then(|raw| {
            serde_json::from_slice(&raw).map_err(|e| e.to_string())
        }) {
            Ok(s) => s,
            Err(e) => {
                warn!(chunk, error = %e, "shard load failed");
                return None;
            }
        };

        let shard = Arc::new(shard);
        if let Ok(mut cache) = self.cache.write() {
            cache.insert(chunk, Arc::clone(&shard)); // last-writer-wins
        }
        Some(shard)
    }
}

// ── Scoring ──────────────────────────────────────────────────────────────────

fn score(preview: &Preview, query: &str, terms: &[String]) -> u8 {
    let title  = preview.title.to_lowercase();
    let artist = preview.artist.to_lowercase();

    if title == query {
        return 1;
    }
    if title.starts_with(query) {
        return 2;
    }
    if terms.iter().all(|t| title.contains(t.as_str())) {
        return 3;
    }
    if terms.iter().all(|t| artist.contains(t.as_str())) {
        return 4;
    }
    let full_text = format!("{title} {artist}");
    if terms.iter().all(|t| full_text.contains(t.as_str())) {
        return 5;
    }
    99 // unreachable after the AND-of-substrings filter
}

// ── Tests ────────────────────────────────────────────────────────────────────
