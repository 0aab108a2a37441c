use docqa_core::config::EmbeddingSettings;
use docqa_embed::get_default_embedder;

// Embed a couple of sentences with the configured model and print the shape.
// Usage:
//   APP_MODEL_DIR=models/all-MiniLM-L6-v2 cargo run -p docqa-embed --example embed

fn main() -> anyhow::Result<()> {
    let embedder = get_default_embedder(&EmbeddingSettings::default())?;
    let texts = vec!["Revenue grew 20% in 2023.".to_string(), "What was the revenue growth?".to_string()];
    let embs = embedder.embed_batch(&texts)?;
    let sim: f32 = embs[0].iter().zip(&embs[1]).map(|(a, b)| a * b).sum();
    println!("B={} dim={} cosine={:.4}", embs.len(), embedder.dim(), sim);
    Ok(())
}
