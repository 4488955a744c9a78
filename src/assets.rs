//! Per-song asset resolution.
//!
//! The source catalog stores song files under `Songs/<TYPE>/...`, fanned out
//! by the first character of the track code.  Both the fanned-out and the
//! flat location are tried, in that order:
//!
//! ```text
//! EMK   Songs/<TYPE>/EMK/<F>/<CODE>.emk
//!       Songs/<TYPE>/EMK/<CODE>.emk
//! NCN   Songs/<TYPE>/NCN/Song/<F>/<CODE>.mid     (+ flat fallback)
//!       Songs/<TYPE>/NCN/Lyrics/<F>/<CODE>.lyr   (+ flat fallback)
//!       Songs/<TYPE>/NCN/Cursor/<F>/<CODE>.cur   (+ flat fallback)
//! ```
//!
//! An NCN bundle resolves only if all three files are found; an EMK bundle
//! resolves if the single file is found.  A failed resolution is not an
//! error — the caller counts it and moves on.

use std::fs;
use std::path::{Path, PathBuf};

use crate::track::{SubType, Track};

// ── Bundle ───────────────────────────────────────────────────────────────────

/// Raw bytes of one song, shaped by its packaging convention.
#[derive(Debug, Clone)]
pub enum SongAssets {
    Emk { emk: Vec<u8> },
    Ncn { midi: Vec<u8>, lyr: Vec<u8>, cur: Vec<u8> },
}

impl SongAssets {
    /// Total payload bytes before per-song compression.
    pub fn raw_len(&self) -> usize {
        match self {
            SongAssets::Emk { emk } => emk.len(),
            SongAssets::Ncn { midi, lyr, cur } => midi.len() + lyr.len() + cur.len(),
        }
    }
}

// ── Store ────────────────────────────────────────────────────────────────────

/// Capability that turns a track descriptor into its raw asset bytes.
/// `None` means the track is unresolvable (missing files, empty code,
/// unknown sub-type) — the caller skips it.
pub trait SongAssetStore: Sync {
    fn fetch(&self, track: &Track) -> Option<SongAssets>;
}

/// The on-disk catalog layout described in the module docs.
pub struct DiskAssetStore {
    root: PathBuf,
}

impl DiskAssetStore {
    pub fn new<P: AsRef<Path>>(input_root: P) -> Self {
        Self { root: input_root.as_ref().to_owned() }
    }

    /// Candidate paths for one file: `<dir>/<F>/<CODE>.<ext>` then
    /// `<dir>/<CODE>.<ext>`, where `F` is the first character of the code.
    fn candidates(&self, dir: &Path, code: &str, ext: &str) -> Vec<PathBuf> {
        let fan = match code.chars().next() {
            Some(c) => c.to_string(),
            None    => return Vec::new(),
        };
        let file = format!("{code}.{ext}");
        vec![dir.join(fan).join(&file), dir.join(&file)]
    }

    fn read_first(&self, dir: &Path, code: &str, ext: &str) -> Option<Vec<u8>> {
        self.candidates(dir, code, ext)
            .iter()
            .find_map(|p| fs::read(p).ok())
    }
}

impl SongAssetStore for DiskAssetStore {
    fn fetch(&self, track: &Track) -> Option<SongAssets> {
        let sub_type = track.sub_type?;
        if track.code.is_empty() {
            return None;
        }

        match sub_type {
            SubType::Emk => {
                let dir = self.root.join("Songs").join(&track.kind).join("EMK");
                let emk = self.read_first(&dir, &track.code, "emk")?;
                Some(SongAssets::Emk { emk })
            }
            SubType::Ncn => {
                let ncn = self.root.join("Songs").join(&track.kind).join("NCN");
                let midi = self.read_first(&ncn.join("Song"), &track.code, "mid")?;
                let lyr  = self.read_first(&ncn.join("Lyrics"), &track.code, "lyr")?;
                let cur  = self.read_first(&ncn.join("Cursor"), &track.code, "cur")?;
                Some(SongAssets::Ncn { midi, lyr, cur })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::track::SubType;
    use tempfile::TempDir;

    fn track(code: &str, kind: &str, sub_type: SubType) -> Track {
        Track {
            title:     String::new(),
            artist:    String::new(),
            author:    String::new(),
            lyr_title: String::new(),
            code:      code.into(),
            kind:      kind.into(),
            sub_type:  Some(sub_type),
            original_index: None,
            super_index:    None,
        }
    }

    fn write(root: &Path, rel: &str, data: &[u8]) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, data).unwrap();
    }

    #[test]
    fn emk_fanned_then_flat() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "Songs/K/EMK/A/A0001.emk", b"fanned");
        write(dir.path(), "Songs/K/EMK/B0002.emk", b"flat");
        let store = DiskAssetStore::new(dir.path());

        match store.fetch(&track("A0001", "K", SubType::Emk)).unwrap() {
            SongAssets::Emk { emk } => assert_eq!(emk, b"fanned"),
            _ => panic!("expected EMK bundle"),
        }
        match store.fetch(&track("B0002", "K", SubType::Emk)).unwrap() {
            SongAssets::Emk { emk } => assert_eq!(emk, b"flat"),
            _ => panic!("expected EMK bundle"),
        }
    }

    #[test]
    fn ncn_requires_all_three() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "Songs/K/NCN/Song/A/A0001.mid", b"m");
        write(dir.path(), "Songs/K/NCN/Lyrics/A/A0001.lyr", b"l");
        let store = DiskAssetStore::new(dir.path());

        // Cursor file missing — unresolvable.
        assert!(store.fetch(&track("A0001", "K", SubType::Ncn)).is_none());

        write(dir.path(), "Songs/K/NCN/Cursor/A/A0001.cur", b"c");
        match store.fetch(&track("A0001", "K", SubType::Ncn)).unwrap() {
            SongAssets::Ncn { midi, lyr, cur } => {
                assert_eq!((midi.as_slice(), lyr.as_slice(), cur.as_slice()),
                           (&b"m"[..], &b"l"[..], &b"c"[..]));
            }
            _ => panic!("expected NCN bundle"),
        }
    }

    #[test]
    fn empty_code_is_unresolvable() {
        let dir = TempDir::new().unwrap();
        let store = DiskAssetStore::new(dir.path());
        assert!(store.fetch(&track("", "K", SubType::Emk)).is_none());
    }
}
