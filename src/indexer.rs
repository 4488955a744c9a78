//! Sharded prefix search index builder.
//!
//! Tokens are maximal runs of `[a-z0-9\u{0e00}-\u{0e7f}]` in the lowercased
//! `TITLE + " " + ARTIST` text, length ≥ 2.  Each token maps to a posting
//! list of preview records in track-insertion order; a track whose title and
//! artist share a token posts twice.  Tokens are then laid into numbered
//! shards in lexicographic order, each shard bounded by the serialized byte
//! size of its posting lists, so query-time memory and I/O stay bounded.
//!
//! # Artifacts
//!
//! ```text
//! Data/master_index.json          word list + word→shard map + build stamp
//! Data/preview_chunk/<id>.json    { word: [ {t,a,i,s}, … ], … }
//! index.zip                       optional, both of the above
//! ```

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::Path;
use std::time::Instant;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;
use zip::write::FileOptions;
use zip::ZipWriter;

use crate::track::{Preview, Track};

/// Serialized shard ceiling.  A single word whose posting list alone
/// exceeds this occupies a shard by itself.
pub const SHARD_MAX_BYTES: usize = 5 * 1024 * 1024;

pub const DATA_DIR:          &str = "Data";
pub const CHUNK_DIR:         &str = "preview_chunk";
pub const MASTER_INDEX_FILE: &str = "master_index.json";
pub const INDEX_ZIP_FILE:    &str = "index.zip";

#[derive(Error, Debug)]
pub enum IndexError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Zip error: {0}")]
    Zip(#[from] zip::result::ZipError),
}

// ── Master index ─────────────────────────────────────────────────────────────

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MasterIndex {
    pub total_records:     u64,
    /// Lexicographically sorted; matches the key set of `word_to_chunk_map`.
    pub words:             Vec<String>,
    pub word_to_chunk_map: BTreeMap<String, u32>,
    /// Elapsed build time, milliseconds.
    pub build_time:        u64,
    /// `YYYY-MM-DDTHH:MM:SS.ffffff`
    pub last_built:        String,
}

/// Shard payload: word → posting list.  Iteration order is the sorted word
/// order the builder inserted them in.
pub type Shard = BTreeMap<String, Vec<Preview>>;

#[derive(Debug)]
pub struct IndexSummary {
    pub total_records: u64,
    pub words:         usize,
    pub shards:        u32,
    pub build_time_ms: u64,
}

// ── Tokenization ─────────────────────────────────────────────────────────────

#[inline]
fn is_token_char(c: char) -> bool {
    matches!(c, 'a'..='z' | '0'..='9' | '\u{0e00}'..='\u{0e7f}')
}

/// Lowercase, then extract maximal runs of token characters, dropping runs
/// shorter than two characters.  No diacritic folding, no stemming.
pub fn tokenize(text: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    for c in text.to_lowercase().chars() {
        if is_token_char(c) {
            current.push(c);
        } else if !current.is_empty() {
            if current.chars().count() >= 2 {
                tokens.push(std::mem::take(&mut current));
            } else {
                current.clear();
            }
        }
    }
    if current.chars().count() >= 2 {
        tokens.push(current);
    }
    tokens
}

// ── Posting construction ─────────────────────────────────────────────────────

/// Token → posting list over all accepted tracks, postings in insertion
/// order.  Duplicates within one track's tokens are kept.
fn build_postings(accepted: &[Track]) -> Shard {
    let mut postings: Shard = BTreeMap::new();
    for track in accepted {
        let preview = match track.preview() {
            Some(p) => p,
            None    => continue, // identity never assigned — not in the build
        };
        for token in tokenize(&track.search_text()) {
            postings.entry(token).or_default().push(preview.clone());
        }
    }
    postings
}

// ── Shard assignment ─────────────────────────────────────────────────────────

/// Group sorted words into shards.  The size estimate for a word is the
/// UTF-8 byte length of its JSON-serialized posting list; a new shard opens
/// when the running estimate would pass `ceiling` and the current shard is
/// non-empty.
fn plan_shards(postings: &Shard, ceiling: usize) -> Result<Vec<Vec<String>>, IndexError> {
    let mut shards: Vec<Vec<String>> = Vec::new();
    let mut current: Vec<String> = Vec::new();
    let mut current_bytes = 0usize;

    for (word, posting) in postings {
        let estimate = serde_json::to_string(posting)?.len();
        if !current.is_empty() && current_bytes + estimate > ceiling {
            shards.push(std::mem::take(&mut current));
            current_bytes = 0;
        }
        current_bytes += estimate;
        current.push(word.clone());
    }
    if !current.is_empty() {
        shards.push(current);
    }
    Ok(shards)
}

// ── Build ────────────────────────────────────────────────────────────────────

/// Consume the packer's accepted tracks and emit the master index plus
/// numbered shard files under `<output_root>/Data/`.
///
/// `build_start` is the moment the whole build began; the master index
/// records the elapsed milliseconds up to emission.
pub fn build_index(
    accepted:         &[Track],
    output_root:      &Path,
    create_index_zip: bool,
    build_start:      Instant,
) -> Result<IndexSummary, IndexError> {
    let data_dir  = output_root.join(DATA_DIR);
    let chunk_dir = data_dir.join(CHUNK_DIR);
    fs::create_dir_all(&chunk_dir)?;

    let mut postings = build_postings(accepted);
    let plan = plan_shards(&postings, SHARD_MAX_BYTES)?;

    let mut word_to_chunk_map: BTreeMap<String, u32> = BTreeMap::new();
    for (shard_id, words) in plan.iter().enumerate() {
        let mut shard: Shard = BTreeMap::new();
        for word in words {
            if let Some(posting) = postings.remove(word) {
                shard.insert(word.clone(), posting);
            }
            word_to_chunk_map.insert(word.clone(), shard_id as u32);
        }
        let payload = serde_json::to_string(&shard)?;
        fs::write(chunk_dir.join(format!("{shard_id}.json")), payload)?;
        debug!(shard_id, words = words.len(), "shard written");
    }

    let master = MasterIndex {
        total_records:     accepted.len() as u64,
        words:             word_to_chunk_map.keys().cloned().collect(),
        word_to_chunk_map,
        build_time:        build_start.elapsed().as_millis() as u64,
        last_built:        Utc::now().format("%Y-%m-%dT%H:%M:%S%.6f").to_string(),
    };
    fs::write(
        data_dir.join(MASTER_INDEX_FILE),
        serde_json::to_string(&master)?,
    )?;

    if create_index_zip {
        write_index_zip(output_root, plan.len() as u32)?;
    }

    Ok(IndexSummary {
        total_records: master.total_records,
        words:         master.words.len(),
        shards:        plan.len() as u32,
        build_time_ms: master.build_time,
    })
}

/// Bundle `Data/master_index.json` and every shard into `index.zip`, paths
/// preserved relative to the output root.
fn write_index_zip(output_root: &Path, shards: u32) -> Result<(), IndexError> {
    let mut zw = ZipWriter::new(File::create(output_root.join(INDEX_ZIP_FILE))?);
    let opts = FileOptions::default();

    let master_rel = format!("{DATA_DIR}/{MASTER_INDEX_FILE}");
    zw.start_file(master_rel.as_str(), opts)?;
    zw.write_all(&fs::read(output_root.join(DATA_DIR).join(MASTER_INDEX_FILE))?)?;

    for shard_id in 0..shards {
        let rel = format!("{DATA_DIR}/{CHUNK_DIR}/{shard_id}.json");
        zw.start_file(rel.as_str(), opts)?;
        zw.write_all(&fs::read(
            output_root.join(DATA_DIR).join(CHUNK_DIR).join(format!("{shard_id}.json")),
        )?)?;
    }
    zw.finish()?;
    Ok(())
}

// ── Tests ────────────────────────────────────────────────────────────────────
