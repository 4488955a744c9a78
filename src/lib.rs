//! # karapack — karaoke catalog migration toolkit
//!
//! Ingests a dBASE-III style karaoke catalog plus its per-song asset files
//! and produces (a) a compact, batched archive of song bundles and (b) a
//! sharded prefix search index served by a small query engine.
//!
//! Contract highlights:
//! - DBF fields decode through a fixed codepage cascade: TIS-620, CP874,
//!   UTF-8, Latin-1 — the first decoder that accepts the bytes wins
//! - The packer is the single serialization point: `original_index` is
//!   assigned per accepted song, `super_index` per finalized batch, and a
//!   batch is atomic with respect to identity
//! - Batch archives are `<super_index>.zip`, re-archived into
//!   `karaoke_<k>.zip` fleet bundles under a byte ceiling
//! - Shards bound their serialized size; the master index maps every word
//!   to exactly one shard and its word list is lexicographically sorted
//! - The serve side is read-only after startup; shards load through an
//!   unbounded in-process cache and are never mutated

pub mod dbf;
pub mod track;
pub mod assets;
pub mod packer;
pub mod indexer;
pub mod query;
pub mod blob;
pub mod pipeline;

// Flat re-exports for the most common types.
pub use assets::{DiskAssetStore, SongAssetStore, SongAssets};
pub use blob::{fetch_song, BlobError, SongBlob};
pub use dbf::{DbfError, DbfHeader, DbfRecord, DbfTable, FieldDescriptor};
pub use indexer::{build_index, tokenize, IndexError, IndexSummary, MasterIndex,
                  SHARD_MAX_BYTES};
pub use packer::{pack_super_archives, BatchPacker, PackError, PackOutcome,
                 PackerOptions};
pub use pipeline::{run_build, BuildError, BuildOptions, BuildReport};
pub use query::{QueryEngine, QueryError, SearchHit, DEFAULT_MAX_RESULTS};
pub use track::{Preview, SubType, Track};
