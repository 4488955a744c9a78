//! End-to-end build → serve round trip on a synthetic catalog.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::Read;
use std::path::Path;
use std::sync::atomic::AtomicBool;

use karapack::indexer::Shard;
use karapack::{fetch_song, run_build, BuildOptions, MasterIndex, QueryEngine};
use tempfile::TempDir;
use zip::ZipArchive;

// ── Catalog synthesis ────────────────────────────────────────────────────────

const FIELDS: &[(&str, usize)] = &[
    ("TITLE", 20),
    ("ARTIST", 16),
    ("AUTHOR", 8),
    ("LYR_TITLE", 12),
    ("CODE", 8),
    ("TYPE", 2),
    ("SUB_TYPE", 4),
];

fn pad(value: &[u8], width: usize) -> Vec<u8> {
    let mut out = value.to_vec();
    assert!(out.len() <= width, "field value wider than column");
    out.resize(width, b' ');
    out
}

struct Row {
    deleted: bool,
    values:  Vec<Vec<u8>>,
}

fn row(title: &[u8], artist: &str, code: &str, sub_type: &str) -> Row {
    Row {
        deleted: false,
        values: vec![
            pad(title, 20),
            pad(artist.as_bytes(), 16),
            pad(b"", 8),
            pad(b"", 12),
            pad(code.as_bytes(), 8),
            pad(b"K", 2),
            pad(sub_type.as_bytes(), 4),
        ],
    }
}

fn write_dbf(path: &Path, rows: &[Row]) {
    let header_length = 32 + FIELDS.len() * 32 + 1;
    let record_length = 1 + FIELDS.iter().map(|f| f.1).sum::<usize>();

    let mut buf = vec![0u8; 32];
    buf[0] = 0x03;
    buf[4..8].copy_from_slice(&(rows.len() as u32).to_le_bytes());
    buf[8..10].copy_from_slice(&(header_length as u16).to_le_bytes());
    buf[10..12].copy_from_slice(&(record_length as u16).to_le_bytes());

    for (name, length) in FIELDS {
        let mut desc = [0u8; 32];
        desc[..name.len()].copy_from_slice(name.as_bytes());
        desc[11] = b'C';
        desc[16] = *length as u8;
        buf.extend_from_slice(&desc);
    }
    buf.push(0x0D);

    for r in rows {
        buf.push(if r.deleted { 0x2A } else { 0x20 });
        for v in &r.values {
            buf.extend_from_slice(v);
        }
    }
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, buf).unwrap();
}

fn write_asset(root: &Path, rel: &str, data: &[u8]) {
    let path = root.join(rel);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, data).unwrap();
}

fn write_ncn(root: &Path, code: &str, fanned: bool) {
    let fan = if fanned { format!("{}/", &code[..1]) } else { String::new() };
    write_asset(root, &format!("Songs/K/NCN/Song/{fan}{code}.mid"), b"midi-bytes");
    write_asset(root, &format!("Songs/K/NCN/Lyrics/{fan}{code}.lyr"), b"lyr-bytes");
    write_asset(root, &format!("Songs/K/NCN/Cursor/{fan}{code}.cur"), b"cur-bytes");
}

/// A catalog of six live rows: four resolvable (three NCN, one Thai-titled
/// EMK), one with missing assets, one with an unknown sub-type, plus one
/// deleted row in the middle.
fn make_catalog(input_root: &Path) {
    let rows = vec![
        row(b"Hello World", "The Band", "A0001", "NCN"),
        row(b"love", "x", "A0002", "NCN"),
        Row { deleted: true, ..row(b"gone", "gone", "Z9999", "NCN") },
        row(b"love song", "x", "B0001", "NCN"),
        // "กข" in TIS-620
        row(&[0xA1, 0xA2], "thai artist", "C0001", "EMK"),
        row(b"missing", "y", "D0001", "NCN"),
        row(b"weird", "z", "E0001", "MP3"),
    ];
    write_dbf(&input_root.join("Data/SONG.DBF"), &rows);

    write_ncn(input_root, "A0001", true);
    write_ncn(input_root, "A0002", true);
    write_ncn(input_root, "B0001", false); // flat fallback path
    write_asset(input_root, "Songs/K/EMK/C/C0001.emk", b"emk-bytes");
}

/// Unpack every `karaoke_<k>.zip` into `serve_root`, recovering the batch
/// archives the way a jukebox deployment would.
fn deploy_super_archives(output_root: &Path, serve_root: &Path) {
    fs::create_dir_all(serve_root).unwrap();
    for entry in fs::read_dir(output_root).unwrap() {
        let path = entry.unwrap().path();
        let name = path.file_name().unwrap().to_string_lossy().to_string();
        if !name.starts_with("karaoke_") || !name.ends_with(".zip") {
            continue;
        }
        let mut ar = ZipArchive::new(File::open(&path).unwrap()).unwrap();
        for i in 0..ar.len() {
            let mut file = ar.by_index(i).unwrap();
            let mut data = Vec::new();
            file.read_to_end(&mut data).unwrap();
            fs::write(serve_root.join(file.name()), data).unwrap();
        }
    }
}

fn read_all_previews(output_root: &Path) -> Vec<(u32, u32)> {
    let chunk_dir = output_root.join("Data/preview_chunk");
    let mut pairs = Vec::new();
    for entry in fs::read_dir(chunk_dir).unwrap() {
        let raw = fs::read(entry.unwrap().path()).unwrap();
        let shard: Shard = serde_json::from_slice(&raw).unwrap();
        for posting in shard.values() {
            for p in posting {
                pairs.push((p.super_index, p.original_index));
            }
        }
    }
    pairs
}

// ── The test ─────────────────────────────────────────────────────────────────

#[test]
fn build_then_query_then_retrieve() {
    let input  = TempDir::new().unwrap();
    let output = TempDir::new().unwrap();
    make_catalog(input.path());

    let opts = BuildOptions {
        create_index_zip: true,
        max_workers: 4,
        ..BuildOptions::new(input.path(), output.path())
    };
    let report = run_build(&opts, &AtomicBool::new(false)).unwrap();

    assert_eq!(report.dbf_records, 6); // deleted row never surfaces
    assert_eq!(report.deleted, 1);
    assert_eq!(report.accepted, 4);
    assert_eq!(report.skipped_assets, 1);
    assert_eq!(report.skipped_sub_type, 1);
    assert_eq!(report.batches, 1);
    assert_eq!(report.super_archives, 1);
    assert!(!report.stopped);

    // ── Master index invariants ──────────────────────────────────────────
    let raw = fs::read(output.path().join("Data/master_index.json")).unwrap();
    let master: MasterIndex = serde_json::from_slice(&raw).unwrap();
    assert_eq!(master.total_records, 4);

    let mut sorted = master.words.clone();
    sorted.sort();
    assert_eq!(master.words, sorted, "words must be sorted");
    assert_eq!(
        master.words,
        master.word_to_chunk_map.keys().cloned().collect::<Vec<_>>(),
        "every word must map to a shard"
    );

    assert!(output.path().join("index.zip").exists());

    // Re-tokenizing any indexed preview only yields words the master index
    // can route to a shard.
    let chunk_dir = output.path().join("Data/preview_chunk");
    for entry in fs::read_dir(&chunk_dir).unwrap() {
        let raw = fs::read(entry.unwrap().path()).unwrap();
        let shard: Shard = serde_json::from_slice(&raw).unwrap();
        for posting in shard.values() {
            for p in posting {
                for token in karapack::tokenize(&format!("{} {}", p.title, p.artist)) {
                    assert!(master.word_to_chunk_map.contains_key(&token));
                }
            }
        }
    }

    // ── Identity invariants ──────────────────────────────────────────────
    let previews = read_all_previews(output.path());
    let mut originals: Vec<u32> = previews.iter().map(|(_, i)| *i).collect();
    originals.sort();
    originals.dedup();
    assert_eq!(originals, vec![0, 1, 2, 3], "original_index is dense and unique");

    // ── Query ────────────────────────────────────────────────────────────
    let engine = QueryEngine::load(output.path()).unwrap();

    let hits = engine.search("love", None).unwrap();
    assert_eq!(hits.len(), 2);
    assert_eq!(hits[0].title, "love");
    assert_eq!(hits[0].priority, 1);
    assert_eq!(hits[1].title, "love song");
    assert_eq!(hits[1].priority, 2);

    let hits = engine.search("hello band", None).unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].title, "Hello World");

    // Thai title decoded from TIS-620 and searchable.
    let hits = engine.search("กข", None).unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].title, "\u{0E01}\u{0E02}");
    let emk_coord = (hits[0].super_index, hits[0].original_index);

    for q in ["love", "hello band", "the", "band"] {
        for hit in engine.search(q, None).unwrap() {
            assert!((1..=5).contains(&hit.priority), "q={q} hit={hit:?}");
        }
    }

    // ── Deploy and retrieve ──────────────────────────────────────────────
    let serve = TempDir::new().unwrap();
    deploy_super_archives(output.path(), serve.path());

    // Every (super, original) reachable from the index resolves to a
    // non-empty blob.
    let mut seen: BTreeMap<(u32, u32), &'static str> = BTreeMap::new();
    for (s, i) in read_all_previews(output.path()) {
        let blob = fetch_song(serve.path(), s, i).unwrap();
        assert!(!blob.data.is_empty());
        seen.insert((s, i), blob.mime);
    }
    assert_eq!(seen[&emk_coord], "application/octet-stream");
    assert_eq!(
        seen.values().filter(|m| **m == "application/zip").count(),
        3,
        "the three NCN songs come back as inner zips"
    );

    // Unreachable coordinates are clean misses.
    assert_eq!(fetch_song(serve.path(), 99, 0).unwrap_err().http_status(), 404);
    assert_eq!(fetch_song(serve.path(), 0, 99).unwrap_err().http_status(), 404);
}

#[test]
fn skip_zips_still_builds_index() {
    let input  = TempDir::new().unwrap();
    let output = TempDir::new().unwrap();
    make_catalog(input.path());

    let opts = BuildOptions {
        create_zips: false,
        ..BuildOptions::new(input.path(), output.path())
    };
    let report = run_build(&opts, &AtomicBool::new(false)).unwrap();

    assert_eq!(report.accepted, 4);
    assert_eq!(report.super_archives, 0);
    assert!(output.path().join("Data/master_index.json").exists());
    assert!(!output.path().join("0.zip").exists());
    assert!(!output.path().join("karaoke_0.zip").exists());

    // Identities are still assigned, so the index is fully addressed.
    let previews = read_all_previews(output.path());
    assert!(previews.iter().all(|(s, _)| *s == 0));
}
