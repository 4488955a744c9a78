use clap::{Parser, Subcommand};
use karapack::blob::fetch_song;
use karapack::pipeline::{run_build, BuildOptions};
use karapack::query::QueryEngine;
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "karapack", version, about = "Karaoke catalog migration and search CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the full build: decode the catalog, pack archives, build the index
    Build {
        /// Source catalog root containing Data/SONG.DBF and Songs/…
        #[arg(short, long)]
        input: PathBuf,
        /// Destination for archives and index artifacts
        #[arg(short, long)]
        output: PathBuf,
        /// Max tracks per batch archive (10..1000)
        #[arg(long, default_value = "200")]
        batch_size: usize,
        /// Byte ceiling for batch and super-archive sizes, MiB (50..5000)
        #[arg(long, default_value = "500")]
        large_zip_limit_mb: u64,
        /// Skip archive emission; still build the index
        #[arg(long)]
        skip_zips: bool,
        /// Bundle the master index and shards into index.zip
        #[arg(long)]
        index_zip: bool,
        /// Asset-fetch parallelism
        #[arg(long, default_value = "4")]
        max_workers: usize,
    },
    /// Query a built index
    Search {
        /// Build output root (holds Data/)
        data: PathBuf,
        query: String,
        #[arg(short, long, default_value = "50")]
        max_results: usize,
    },
    /// Retrieve one song blob by its (super, original) coordinate
    Song {
        /// Directory holding the <super_index>.zip batch archives
        archive_root: PathBuf,
        #[arg(long)]
        super_index: u32,
        #[arg(long)]
        original_index: u32,
        /// Write the blob here (defaults to the download filename)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Show master index metadata
    Info {
        /// Build output root (holds Data/)
        data: PathBuf,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    match Cli::parse().command {

        // ── Build ────────────────────────────────────────────────────────────
        Commands::Build {
            input, output, batch_size, large_zip_limit_mb,
            skip_zips, index_zip, max_workers,
        } => {
            let opts = BuildOptions {
                batch_size,
                large_zip_limit_mb,
                create_zips: !skip_zips,
                create_index_zip: index_zip,
                max_workers,
                ..BuildOptions::new(&input, &output)
            };
            let stop = AtomicBool::new(false);
            let report = run_build(&opts, &stop)?;

            println!("── Build report ─────────────────────────────────────────");
            println!("  Catalog records   {}", report.dbf_records);
            println!("  Deleted records   {}", report.deleted);
            println!("  Accepted          {}", report.accepted);
            println!("  Missing assets    {}", report.skipped_assets);
            println!("  Unknown sub-type  {}", report.skipped_sub_type);
            println!("  Batch archives    {}", report.batches);
            println!("  Super-archives    {}", report.super_archives);
            if let Some(index) = &report.index {
                println!("  Index words       {}", index.words);
                println!("  Index shards      {}", index.shards);
            }
            println!("  Elapsed           {} ms", report.elapsed_ms);
        }

        // ── Search ───────────────────────────────────────────────────────────
        Commands::Search { data, query, max_results } => {
            let engine = QueryEngine::load(&data)?;
            let hits = engine.search(&query, Some(max_results))?;
            println!("{:<36} {:<24} {:>9} {:>7} {:>5}",
                     "Title", "Artist", "Original", "Super", "Prio");
            for hit in &hits {
                println!("{:<36} {:<24} {:>9} {:>7} {:>5}",
                    hit.title, hit.artist,
                    hit.original_index, hit.super_index, hit.priority);
            }
            println!("{} result(s)", hits.len());
        }

        // ── Song ─────────────────────────────────────────────────────────────
        Commands::Song { archive_root, super_index, original_index, output } => {
            let blob = fetch_song(&archive_root, super_index, original_index)?;
            let path = output.unwrap_or_else(|| PathBuf::from(&blob.filename));
            std::fs::write(&path, &blob.data)?;
            println!("Wrote {} ({} B, {})", path.display(), blob.data.len(), blob.mime);
        }

        // ── Info ─────────────────────────────────────────────────────────────
        Commands::Info { data } => {
            let engine = QueryEngine::load(&data)?;
            let master = engine.master();
            let shards = master
                .word_to_chunk_map
                .values()
                .max()
                .map(|m| m + 1)
                .unwrap_or(0);
            println!("── Master index ─────────────────────────────────────────");
            println!("  Total records  {}", master.total_records);
            println!("  Words          {}", master.words.len());
            println!("  Shards         {}", shards);
            println!("  Build time     {} ms", master.build_time);
            println!("  Last built     {}", master.last_built);
        }
    }

    Ok(())
}
