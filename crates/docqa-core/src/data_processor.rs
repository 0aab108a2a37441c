//! Text and CSV document source.
//!
//! Text is split into overlapping character windows, preferring paragraph and
//! then word boundaries. CSV files yield one chunk per data row rendered as
//! `header: value` lines.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::traits::DocumentSource;
use crate::types::Chunk;

pub const SUPPORTED_EXTENSIONS: [&str; 2] = ["txt", "csv"];

#[derive(Debug, Clone)]
pub struct ChunkingConfig {
    /// Upper bound on chunk length, in characters.
    pub chunk_size: usize,
    /// Characters repeated from the end of one window at the start of the next.
    pub chunk_overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self { chunk_size: 500, chunk_overlap: 50 }
    }
}

#[derive(Default)]
pub struct TextFileSource {
    chunking_config: ChunkingConfig,
}

impl TextFileSource {
    pub fn new() -> Self { Self::default() }

    pub fn with_chunking(chunking_config: ChunkingConfig) -> Self { Self { chunking_config } }

    /// Load every supported file under `data_dir`, in sorted path order.
    /// Unsupported files are skipped.
    pub fn load_dir(&self, data_dir: &Path) -> Result<Vec<Chunk>> {
        let files = self.list_files(data_dir);
        if files.is_empty() {
            info!("No supported files found under {}", data_dir.display());
            return Ok(vec![]);
        }
        let mut all_chunks = Vec::new();
        for (file_index, file_path) in files.iter().enumerate() {
            debug!("Processing file {}/{}: {}", file_index + 1, files.len(), file_path.display());
            all_chunks.extend(self.load(file_path)?);
        }
        info!("Processed {} files into {} chunks", files.len(), all_chunks.len());
        Ok(all_chunks)
    }

    pub fn list_files(&self, root: &Path) -> Vec<PathBuf> {
        let mut files = Vec::new();
        for entry in walkdir::WalkDir::new(root).into_iter().filter_map(|e| e.ok()).filter(|e| e.file_type().is_file()) {
            let path = entry.path();
            if is_supported(path) {
                files.push(path.to_path_buf());
            } else {
                warn!("Skipping unsupported file {}", path.display());
            }
        }
        files.sort();
        files
    }

    fn read_file_content(&self, file_path: &Path) -> Result<String> {
        match fs::read_to_string(file_path) {
            Ok(content) => Ok(content),
            Err(_) => {
                let bytes = fs::read(file_path).map_err(|e| Error::InputRejected(format!("{}: {}", file_path.display(), e)))?;
                Ok(String::from_utf8_lossy(&bytes).to_string())
            }
        }
    }

    /// Split free text into windows of at most `chunk_size` characters.
    pub fn chunk_text(&self, content: &str) -> Vec<String> {
        let max = self.chunking_config.chunk_size;
        let mut chunks = Vec::new();
        let mut current = String::new();
        for paragraph in content.split("\n\n").map(str::trim).filter(|p| !p.is_empty()) {
            let para_len = paragraph.chars().count();
            if para_len > max {
                if !current.is_empty() { chunks.push(std::mem::take(&mut current)); }
                chunks.extend(self.split_with_overlap(paragraph));
                continue;
            }
            let joined_len = if current.is_empty() { para_len } else { current.chars().count() + 2 + para_len };
            if joined_len > max {
                chunks.push(std::mem::take(&mut current));
            }
            if !current.is_empty() { current.push_str("\n\n"); }
            current.push_str(paragraph);
        }
        if !current.is_empty() { chunks.push(current); }
        chunks
    }

    fn split_with_overlap(&self, paragraph: &str) -> Vec<String> {
        let max = self.chunking_config.chunk_size;
        let overlap = self.chunking_config.chunk_overlap;
        let words: Vec<&str> = paragraph.split_whitespace().collect();
        let mut chunks = Vec::new();
        let mut start = 0;
        while start < words.len() {
            let mut end = start;
            let mut len = 0usize;
            while end < words.len() {
                let w = words[end].chars().count();
                let added = if end == start { w } else { len + 1 + w };
                if added > max && end > start { break; }
                len = added;
                end += 1;
            }
            let window = words[start..end].join(" ");
            // A single word longer than the window is hard-cut.
            chunks.push(if len > max { window.chars().take(max).collect() } else { window });
            if end >= words.len() { break; }
            let mut back = end;
            let mut carried = 0usize;
            while back > start + 1 {
                let w = words[back - 1].chars().count() + 1;
                if carried + w > overlap { break; }
                carried += w;
                back -= 1;
            }
            start = back;
        }
        chunks
    }

    fn csv_rows(&self, content: &str) -> Vec<String> {
        let mut records = csv_records(content).into_iter();
        let header = match records.next() {
            Some(h) => h,
            None => return vec![],
        };
        records
            .map(|record| {
                record
                    .into_iter()
                    .enumerate()
                    .map(|(i, value)| {
                        let key = header.get(i).cloned().unwrap_or_else(|| format!("column_{}", i + 1));
                        format!("{}: {}", key.trim(), value.trim())
                    })
                    .collect::<Vec<_>>()
                    .join("\n")
            })
            .collect()
    }
}

impl DocumentSource for TextFileSource {
    fn load(&self, path: &Path) -> Result<Vec<Chunk>> {
        let ext = extension(path);
        if !SUPPORTED_EXTENSIONS.contains(&ext.as_str()) {
            return Err(Error::InputRejected("Only TXT and CSV supported".to_string()));
        }
        let content = self.read_file_content(path)?;
        let source = path.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_else(|| path.display().to_string());
        let pieces = if ext == "csv" { self.csv_rows(&content) } else { self.chunk_text(&content) };
        Ok(pieces
            .into_iter()
            .filter(|p| !p.trim().is_empty())
            .enumerate()
            .map(|(i, p)| Chunk::new(p, source.clone()).with_meta("chunk_index", i.to_string()))
            .collect())
    }
}

fn extension(path: &Path) -> String {
    path.extension().and_then(|s| s.to_str()).map(str::to_ascii_lowercase).unwrap_or_default()
}

fn is_supported(path: &Path) -> bool { SUPPORTED_EXTENSIONS.contains(&extension(path).as_str()) }

/// Parse CSV records, honouring double-quoted fields, `""` escapes and line
/// breaks inside quotes. Blank lines are skipped.
fn csv_records(content: &str) -> Vec<Vec<String>> {
    let mut records = Vec::new();
    let mut fields = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut chars = content.chars().peekable();
    let mut end_record = |fields: &mut Vec<String>, field: &mut String| {
        fields.push(std::mem::take(field));
        if fields.len() > 1 || !fields[0].trim().is_empty() {
            records.push(std::mem::take(fields));
        } else {
            fields.clear();
        }
    };
    while let Some(c) = chars.next() {
        match c {
            '"' if in_quotes && chars.peek() == Some(&'"') => { field.push('"'); chars.next(); }
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => fields.push(std::mem::take(&mut field)),
            '\r' if !in_quotes && chars.peek() == Some(&'\n') => {}
            '\n' if !in_quotes => end_record(&mut fields, &mut field),
            _ => field.push(c),
        }
    }
    if !fields.is_empty() || !field.is_empty() { end_record(&mut fields, &mut field); }
    records
}
