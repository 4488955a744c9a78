//! Build pipeline — the offline phase.
//!
//! `DBF reader → record decoder → asset fetcher (parallel) → batch packer →
//! index builder`.  Records flow once; asset fetches run on a worker pool
//! and the packer consumes completions on the calling thread, so identity
//! assignment stays serialized.  There is no fetch-order → output-order
//! relationship.
//!
//! Cancellation is cooperative: the stop flag is polled between records,
//! in-flight fetches are allowed to complete, and the open batch is NOT
//! finalized — partial archives stay on disk but are not indexed.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::time::Instant;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::assets::{DiskAssetStore, SongAssetStore};
use crate::dbf::{DbfError, DbfTable};
use crate::indexer::{build_index, IndexError, IndexSummary};
use crate::packer::{BatchPacker, PackError, PackerOptions};
use crate::track::Track;

/// Catalog record file, relative to `input_root`.
pub const DBF_RELATIVE_PATH: &str = "Data/SONG.DBF";

pub const BATCH_SIZE_RANGE:    std::ops::RangeInclusive<usize> = 10..=1000;
pub const ZIP_LIMIT_MB_RANGE:  std::ops::RangeInclusive<u64>   = 50..=5000;

#[derive(Error, Debug)]
pub enum BuildError {
    #[error("input catalog not found: {}", .0.display())]
    InputNotFound(PathBuf),
    #[error(transparent)]
    Dbf(#[from] DbfError),
    #[error(transparent)]
    Pack(#[from] PackError),
    #[error(transparent)]
    Index(#[from] IndexError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("worker pool: {0}")]
    Pool(#[from] rayon::ThreadPoolBuildError),
}

// ── Options ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct BuildOptions {
    /// Source catalog root containing `Data/SONG.DBF` and `Songs/…`.
    pub input_root:  PathBuf,
    /// Destination for archives and index artifacts.
    pub output_root: PathBuf,
    /// Max tracks per batch archive.
    pub batch_size:  usize,
    /// Byte ceiling for batch and super-archive sizes, in MiB.
    pub large_zip_limit_mb: u64,
    /// When false, skip archive emission; the index is still built.
    pub create_zips: bool,
    /// Produce `index.zip` at the end.
    pub create_index_zip: bool,
    /// Asset-fetch parallelism.
    pub max_workers: usize,
}

impl BuildOptions {
    pub fn new<P: AsRef<Path>, Q: AsRef<Path>>(input_root: P, output_root: Q) -> Self {
        Self {
            input_root:         input_root.as_ref().to_owned(),
            output_root:        output_root.as_ref().to_owned(),
            batch_size:         200,
            large_zip_limit_mb: 500,
            create_zips:        true,
            create_index_zip:   false,
            max_workers:        4,
        }
    }

    /// Clamp the tunables to their supported ranges.
    pub fn clamped(mut self) -> Self {
        let batch_size = self
            .batch_size
            .clamp(*BATCH_SIZE_RANGE.start(), *BATCH_SIZE_RANGE.end());
        if batch_size != self.batch_size {
            warn!(requested = self.batch_size, clamped = batch_size, "batch_size out of range");
        }
        let limit_mb = self
            .large_zip_limit_mb
            .clamp(*ZIP_LIMIT_MB_RANGE.start(), *ZIP_LIMIT_MB_RANGE.end());
        if limit_mb != self.large_zip_limit_mb {
            warn!(requested = self.large_zip_limit_mb, clamped = limit_mb, "large_zip_limit_mb out of range");
        }
        self.batch_size = batch_size;
        self.large_zip_limit_mb = limit_mb;
        self.max_workers = self.max_workers.max(1);
        self
    }

    pub fn large_zip_limit_bytes(&self) -> u64 {
        self.large_zip_limit_mb * 1024 * 1024
    }
}

// ── Report ───────────────────────────────────────────────────────────────────

#[derive(Debug)]
pub struct BuildReport {
    /// Live (non-deleted) rows read from the DBF.
    pub dbf_records:      u64,
    /// Rows carrying the deletion flag, skipped before decoding.
    pub deleted:          u64,
    pub accepted:         u64,
    pub skipped_assets:   u64,
    pub skipped_sub_type: u64,
    pub batches:          u32,
    pub super_archives:   u32,
    /// Absent when the build was cancelled before indexing.
    pub index:            Option<IndexSummary>,
    pub stopped:          bool,
    pub elapsed_ms:       u64,
}

// ── Build ────────────────────────────────────────────────────────────────────

/// Run the five-stage build.  `stop` is polled between records; see the
/// module docs for cancellation semantics.
pub fn run_build(opts: &BuildOptions, stop: &AtomicBool) -> Result<BuildReport, BuildError> {
    let opts    = opts.clone().clamped();
    let started = Instant::now();

    let dbf_path = opts.input_root.join(DBF_RELATIVE_PATH);
    if !dbf_path.exists() {
        return Err(BuildError::InputNotFound(dbf_path));
    }
    std::fs::create_dir_all(&opts.output_root)?;

    let table = DbfTable::parse(std::fs::read(&dbf_path)?)?;
    info!(
        records = table.header.record_count,
        fields = table.header.fields.len(),
        "catalog opened"
    );

    // Decode rows up front; tracks without a known sub-type never reach the
    // fetch pool.
    let mut skipped_sub_type = 0u64;
    let mut tracks: Vec<Track> = Vec::new();
    let mut records = table.records();
    for record in &mut records {
        let track = Track::from_record(&table.header, &record);
        if track.sub_type.is_none() {
            skipped_sub_type += 1;
            continue;
        }
        tracks.push(track);
    }
    let dbf_records = tracks.len() as u64 + skipped_sub_type;
    let deleted     = records.deleted() as u64;

    let store = DiskAssetStore::new(&opts.input_root);
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(opts.max_workers)
        .build()?;

    let mut packer = BatchPacker::new(
        &opts.output_root,
        PackerOptions {
            batch_size:      opts.batch_size,
            large_zip_limit: opts.large_zip_limit_bytes(),
            emit_archives:   opts.create_zips,
        },
    );

    let mut skipped_assets = 0u64;
    let mut stopped = false;

    std::thread::scope(|scope| -> Result<(), BuildError> {
        let (tx, rx) = mpsc::channel();
        let store = &store;
        let pool  = &pool;
        scope.spawn(move || {
            pool.install(|| {
                use rayon::prelude::*;
                tracks.into_par_iter().for_each_with(tx, |tx, track| {
                    if stop.load(Ordering::Relaxed) {
                        return;
                    }
                    let assets = store.fetch(&track);
                    let _ = tx.send((track, assets));
                });
            });
        });

        // The packer consumes completions serially, in arrival order.
        for (track, assets) in &rx {
            if stop.load(Ordering::Relaxed) {
                stopped = true;
                break;
            }
            match assets {
                Some(assets) => packer.accept(track, &assets)?,
                None => {
                    skipped_assets += 1;
                    debug!(code = %track.code, "assets unresolvable");
                }
            }
        }
        Ok(())
    })?;

    if stopped {
        let finalized = packer.abort();
        let batches = finalized
            .iter()
            .filter_map(|t| t.super_index)
            .max()
            .map(|m| m + 1)
            .unwrap_or(0);
        warn!(finalized = finalized.len(), "build cancelled, open batch dropped, index skipped");
        return Ok(BuildReport {
            dbf_records,
            deleted,
            accepted: finalized.len() as u64,
            skipped_assets,
            skipped_sub_type,
            batches,
            super_archives: 0,
            index: None,
            stopped: true,
            elapsed_ms: started.elapsed().as_millis() as u64,
        });
    }

    let outcome = packer.finish()?;
    let index = build_index(
        &outcome.accepted,
        &opts.output_root,
        opts.create_index_zip,
        started,
    )?;

    info!(
        accepted = outcome.accepted.len(),
        skipped_assets,
        skipped_sub_type,
        batches = outcome.batches,
        super_archives = outcome.super_archives,
        shards = index.shards,
        "build complete"
    );

    Ok(BuildReport {
        dbf_records,
        deleted,
        accepted: outcome.accepted.len() as u64,
        skipped_assets,
        skipped_sub_type,
        batches: outcome.batches,
        super_archives: outcome.super_archives,
        index: Some(index),
        stopped: false,
        elapsed_ms: started.elapsed().as_millis() as u64,
    })
}
