//! Batch packer and archiver.
//!
//! The packer is the single serialization point of the build: it owns
//! identity assignment, the in-memory batch state, and all archive writes.
//! Fetch results arrive in completion order; each accepted song gets the
//! next `original_index` immediately and the batch's `super_index` at
//! finalization, so a batch is atomic with respect to identity.
//!
//! # Archive layout
//!
//! ```text
//! <super_index>.zip         one batch: <original_index>.zip | .emk entries
//! karaoke_<k>.zip           one super-archive: whole batch archives
//! ```
//!
//! Per-song NCN blobs are in-memory zips (`song.mid` / `song.lyr` /
//! `song.cur`, DEFLATE level 9); EMK blobs are the raw `.emk` bytes.  Batch
//! and super-archive members are stored uncompressed — their payloads are
//! already compressed.

use std::fs::{self, File};
use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info};
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::assets::SongAssets;
use crate::track::Track;

/// DEFLATE level for per-song NCN zips.
const SONG_ZIP_LEVEL: i32 = 9;

#[derive(Error, Debug)]
pub enum PackError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Zip error: {0}")]
    Zip(#[from] zip::result::ZipError),
}

// ── Options ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct PackerOptions {
    /// Max songs per batch archive.
    pub batch_size:      usize,
    /// Byte ceiling for batch and super-archive sizes.
    pub large_zip_limit: u64,
    /// When false, identities are still assigned but no archive is written.
    pub emit_archives:   bool,
}

// ── Outcome ──────────────────────────────────────────────────────────────────

/// What the build's later stages need from a finished pack pass.
#[derive(Debug)]
pub struct PackOutcome {
    /// Accepted tracks, each carrying `original_index` and `super_index`.
    pub accepted:       Vec<Track>,
    pub batches:        u32,
    pub super_archives: u32,
}

// ── Packer ───────────────────────────────────────────────────────────────────

pub struct BatchPacker {
    out_root: PathBuf,
    opts:     PackerOptions,

    next_original: u32,
    next_super:    u32,

    /// Current batch: tracks paired with their compressed entry (name, blob).
    batch:       Vec<(Track, String, Vec<u8>)>,
    batch_bytes: u64,

    accepted: Vec<Track>,
}

impl BatchPacker {
    pub fn new<P: AsRef<Path>>(out_root: P, opts: PackerOptions) -> Self {
        Self {
            out_root:      out_root.as_ref().to_owned(),
            opts,
            next_original: 0,
            next_super:    0,
            batch:         Vec::new(),
            batch_bytes:   0,
            accepted:      Vec::new(),
        }
    }

    /// Accept one resolved song: assign its `original_index`, compress it,
    /// and finalize the batch if a rollover trigger fires.
    pub fn accept(&mut self, mut track: Track, assets: &SongAssets) -> Result<(), PackError> {
        let original_index = self.next_original;
        self.next_original += 1;
        track.original_index = Some(original_index);

        let (name, blob) = compress_song(original_index, assets)?;
        self.batch_bytes += blob.len() as u64;
        self.batch.push((track, name, blob));

        if self.batch.len() >= self.opts.batch_size
            || self.batch_bytes >= self.opts.large_zip_limit
        {
            self.finalize_batch()?;
        }
        Ok(())
    }

    /// Close the current batch: stamp `super_index` on every member, write
    /// `<super_index>.zip`, and reset the in-memory state.
    fn finalize_batch(&mut self) -> Result<(), PackError> {
        if self.batch.is_empty() {
            return Ok(());
        }
        let super_index = self.next_super;
        self.next_super += 1;

        if self.opts.emit_archives {
            let path = self.out_root.join(format!("{super_index}.zip"));
            let mut zw = ZipWriter::new(File::create(&path)?);
            let stored = FileOptions::default().compression_method(CompressionMethod::Stored);
            for (_, name, blob) in &self.batch {
                zw.start_file(name.as_str(), stored)?;
                zw.write_all(blob)?;
            }
            zw.finish()?;
        }

        debug!(
            super_index,
            songs = self.batch.len(),
            bytes = self.batch_bytes,
            "batch finalized"
        );

        for (mut track, _, _) in self.batch.drain(..) {
            track.super_index = Some(super_index);
            self.accepted.push(track);
        }
        self.batch_bytes = 0;
        Ok(())
    }

    /// End of input: finalize the tail batch, then re-archive batches into
    /// super-archives.
    pub fn finish(mut self) -> Result<PackOutcome, PackError> {
        self.finalize_batch()?;
        let super_archives = if self.opts.emit_archives {
            pack_super_archives(&self.out_root, self.opts.large_zip_limit)?
        } else {
            0
        };
        Ok(PackOutcome {
            accepted: self.accepted,
            batches: self.next_super,
            super_archives,
        })
    }

    /// Cooperative cancel: the current batch is dropped without
    /// finalization.  Returns the tracks from batches already on disk.
    pub fn abort(self) -> Vec<Track> {
        self.accepted
    }
}

// ── Per-song compression ─────────────────────────────────────────────────────

/// Build the batch entry for one song: `<original_index>.zip` holding the
/// NCN triple at DEFLATE level 9, or the raw bytes as `<original_index>.emk`.
fn compress_song(original_index: u32, assets: &SongAssets) -> Result<(String, Vec<u8>), PackError> {
    match assets {
        SongAssets::Emk { emk } => {
            Ok((format!("{original_index}.emk"), emk.clone()))
        }
        SongAssets::Ncn { midi, lyr, cur } => {
            let mut zw = ZipWriter::new(Cursor::new(Vec::new()));
            let deflated = FileOptions::default()
                .compression_method(CompressionMethod::Deflated)
                .compression_level(Some(SONG_ZIP_LEVEL));
            for (entry, data) in [("song.mid", midi), ("song.lyr", lyr), ("song.cur", cur)] {
                zw.start_file(entry, deflated)?;
                zw.write_all(data)?;
            }
            let blob = zw.finish()?.into_inner();
            Ok((format!("{original_index}.zip"), blob))
        }
    }
}

// ── Super-archive pass ───────────────────────────────────────────────────────

/// Re-archive the numbered batch archives into `karaoke_<k>.zip` fleet
/// bundles, bounded by `limit` bytes, and delete the source batch files.
/// A single batch larger than the limit occupies a super-archive alone.
pub fn pack_super_archives(out_root: &Path, limit: u64) -> Result<u32, PackError> {
    // Batch archives are exactly the `<integer>.zip` entries.
    let mut batches: Vec<(u32, PathBuf, u64)> = Vec::new();
    for entry in fs::read_dir(out_root)? {
        let entry = entry?;
        let path  = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("zip") {
            continue;
        }
        let stem = match path.file_stem().and_then(|s| s.to_str()) {
            Some(s) => s,
            None    => continue,
        };
        if let Ok(n) = stem.parse::<u32>() {
            batches.push((n, path.clone(), entry.metadata()?.len()));
        }
    }
    batches.sort_by_key(|(n, _, _)| *n);

    let mut next_super_archive = 0u32;
    let mut group: Vec<(u32, PathBuf)> = Vec::new();
    let mut group_bytes = 0u64;

    for (n, path, size) in batches {
        if !group.is_empty() && group_bytes + size > limit {
            write_super_archive(out_root, next_super_archive, &group)?;
            next_super_archive += 1;
            group.clear();
            group_bytes = 0;
        }
        group_bytes += size;
        group.push((n, path));
    }
    if !group.is_empty() {
        write_super_archive(out_root, next_super_archive, &group)?;
        next_super_archive += 1;
    }
    Ok(next_super_archive)
}

fn write_super_archive(
    out_root: &Path,
    k: u32,
    members: &[(u32, PathBuf)],
) -> Result<(), PackError> {
    let out_path = out_root.join(format!("karaoke_{k}.zip"));
    let mut zw = ZipWriter::new(File::create(&out_path)?);
    let stored = FileOptions::default().compression_method(CompressionMethod::Stored);
    for (n, path) in members {
        zw.start_file(format!("{n}.zip"), stored)?;
        zw.write_all(&fs::read(path)?)?;
    }
    zw.finish()?;

    for (_, path) in members {
        fs::remove_file(path)?;
    }
    info!(k, members = members.len(), "super-archive written");
    Ok(())
}

// ── Tests ────────────────────────────────────────────────────────────────────
