//! Blob retrieval — `(super_index, original_index)` → one song bundle.
//!
//! Opens `<super_index>.zip` and returns the embedded `<original_index>.zip`
//! (NCN) or `<original_index>.emk` (EMK) entry verbatim, together with the
//! MIME type and download filename the transport layer should attach.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use thiserror::Error;
use zip::result::ZipError;
use zip::ZipArchive;

#[derive(Error, Debug)]
pub enum BlobError {
    #[error("super archive for index {0} not found")]
    SuperArchiveMissing(u32),
    #[error("song with original index {original_index} not found inside super archive {super_index}")]
    EntryMissing { super_index: u32, original_index: u32 },
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Zip error: {0}")]
    Zip(#[from] ZipError),
}

impl BlobError {
    pub fn http_status(&self) -> u16 {
        match self {
            BlobError::SuperArchiveMissing(_) | BlobError::EntryMissing { .. } => 404,
            BlobError::Io(_) | BlobError::Zip(_) => 500,
        }
    }
}

/// One retrieved song: raw bytes plus the response metadata.
#[derive(Debug)]
pub struct SongBlob {
    pub data:     Vec<u8>,
    pub filename: String,
    pub mime:     &'static str,
}

/// Look a song up by its `(super, original)` coordinate in `archive_root`.
pub fn fetch_song(
    archive_root: &Path,
    super_index: u32,
    original_index: u32,
) -> Result<SongBlob, BlobError> {
    let path = archive_root.join(format!("{super_index}.zip"));
    if !path.exists() {
        return Err(BlobError::SuperArchiveMissing(super_index));
    }
    let mut archive = ZipArchive::new(File::open(&path)?)?;

    for (entry, filename, mime) in [
        (
            format!("{original_index}.zip"),
            format!("song_{original_index}.zip"),
            "application/zip",
        ),
        (
            format!("{original_index}.emk"),
            format!("song_{original_index}.emk"),
            "application/octet-stream",
        ),
    ] {
        match archive.by_name(&entry) {
            Ok(mut file) => {
                let mut data = Vec::with_capacity(file.size() as usize);
                file.read_to_end(&mut data)?;
                return Ok(SongBlob { data, filename, mime });
            }
            Err(ZipError::FileNotFound) => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Err(BlobError::EntryMissing { super_index, original_index })
}
