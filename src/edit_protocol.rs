//! Recovers file-write intents and ordinary code blocks from model output.
//!
//! A path-tagged block opens with ```` ```file:<path> ```` and carries the
//! complete new content of that file. A block whose closing fence is
//! missing runs to the end of the text.

use once_cell::sync::Lazy;
use regex::Regex;

static FILE_BLOCK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)```file:([^\n\r]+)\r?\n(.*?)(?:```|\z)")
        .expect("file block regex must compile")
});

static CODE_BLOCK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)```([^\n\r]*)\r?\n(.*?)(?:```|\z)").expect("code block regex must compile")
});

/// Languages whose blocks are prose, never offered for saving.
const PROSE_LANGS: &[&str] = &["markdown", "md", "text", "txt", ""];
const MIN_OFFER_LINES: usize = 3;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileIntent {
    /// Path exactly as written in the block tag, trimmed.
    pub path: String,
    pub content: String,
}

/// Every path-tagged block in document order, duplicates included.
#[must_use]
pub fn extract_file_intents(text: &str) -> Vec<FileIntent> {
    FILE_BLOCK
        .captures_iter(text)
        .filter_map(|captures| {
            let path = captures.get(1)?.as_str().trim();
            if path.is_empty() {
                return None;
            }
            let body = captures.get(2).map_or("", |m| m.as_str());
            Some(FileIntent {
                path: path.to_string(),
                content: strip_fence_newline(body).to_string(),
            })
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeBlock {
    pub lang: String,
    pub content: String,
}

impl CodeBlock {
    /// Worth offering to save: real code, at least a few lines long.
    #[must_use]
    pub fn is_offerable(&self) -> bool {
        let lang = self.lang.to_ascii_lowercase();
        !PROSE_LANGS.contains(&lang.as_str()) && self.content.lines().count() >= MIN_OFFER_LINES
    }

    /// Content normalized to end with exactly one newline.
    #[must_use]
    pub fn normalized_content(&self) -> String {
        normalize_trailing_newline(&self.content)
    }
}

/// Ordinary fenced blocks, skipping path-tagged ones.
#[must_use]
pub fn extract_generic_blocks(text: &str) -> Vec<CodeBlock> {
    CODE_BLOCK
        .captures_iter(text)
        .filter_map(|captures| {
            let lang = captures.get(1)?.as_str().trim();
            if lang.starts_with("file:") {
                return None;
            }
            Some(CodeBlock {
                lang: lang.to_string(),
                content: captures.get(2).map_or("", |m| m.as_str()).to_string(),
            })
        })
        .collect()
}

/// Generic blocks worth offering for a manual save.
#[must_use]
pub fn offerable_blocks(text: &str) -> Vec<CodeBlock> {
    extract_generic_blocks(text)
        .into_iter()
        .filter(CodeBlock::is_offerable)
        .collect()
}

/// File extension for a bare save name given the block language.
#[must_use]
pub fn suggested_extension(lang: &str) -> &'static str {
    match lang.to_ascii_lowercase().as_str() {
        "python" | "py" => ".py",
        "javascript" | "js" => ".js",
        "typescript" | "ts" => ".ts",
        "java" => ".java",
        "cpp" | "c++" => ".cpp",
        "c" => ".c",
        "go" => ".go",
        "rust" | "rs" => ".rs",
        "ruby" | "rb" => ".rb",
        "php" => ".php",
        "html" => ".html",
        "css" => ".css",
        "json" => ".json",
        "yaml" | "yml" => ".yaml",
        "sql" => ".sql",
        "bash" | "sh" | "shell" => ".sh",
        _ => ".txt",
    }
}

/// Strips trailing newlines and appends exactly one.
#[must_use]
pub fn normalize_trailing_newline(content: &str) -> String {
    let mut normalized = content.trim_end_matches(['\n', '\r']).to_string();
    normalized.push('\n');
    normalized
}

fn strip_fence_newline(body: &str) -> &str {
    body.strip_suffix("\r\n")
        .or_else(|| body.strip_suffix('\n'))
        .unwrap_or(body)
}
