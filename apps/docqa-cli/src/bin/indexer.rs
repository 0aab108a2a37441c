use std::env;
use std::path::PathBuf;

use indicatif::{ProgressBar, ProgressStyle};

use docqa_core::config::{expand_path, Config};
use docqa_core::data_processor::{ChunkingConfig, TextFileSource};
use docqa_core::logging;
use docqa_core::traits::DocumentSource;
use docqa_embed::get_default_embedder;
use docqa_vector::IndexStore;

fn main() -> anyhow::Result<()> {
    let config = Config::load().map_err(|e| { eprintln!("Error loading config: {}", e); e })?;
    let settings = config.settings()?;
    settings.validate()?;
    logging::init(&settings.logging);
    let source_dir = env::args().nth(1).map(PathBuf::from).unwrap_or_else(|| { eprintln!("Usage: docqa-indexer <dir>"); std::process::exit(1) });

    let source = TextFileSource::with_chunking(ChunkingConfig { chunk_size: settings.data.chunk_size, chunk_overlap: settings.data.chunk_overlap });
    let files = source.list_files(&source_dir);
    let index_dir = expand_path(&settings.data.dir);
    println!("docqa indexer\n=============");
    println!("Source directory: {}", source_dir.display());
    println!("Index directory:  {}", index_dir.display());

    let embedder = get_default_embedder(&settings.embedding)?;
    let store = IndexStore::open(&index_dir, embedder)?;
    let before = store.len();

    let pb = ProgressBar::new(files.len() as u64);
    pb.set_style(ProgressStyle::default_bar().template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} files ({percent}%) {msg}")?.progress_chars("#>-"));
    let mut chunks_added = 0usize;
    for file in &files {
        pb.set_message(file.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_default());
        let chunks = source.load(file)?;
        chunks_added += store.add_documents(chunks)?;
        pb.inc(1);
    }
    pb.finish_with_message("done");
    store.flush()?;

    println!("\nIndexed {} files into {} chunks ({} -> {} documents)", files.len(), chunks_added, before, store.len());
    Ok(())
}
