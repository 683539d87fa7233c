//! Reading files into context: the auto-load policy, bounded reads, image
//! descriptions, and explicit opens with optional line ranges.

use std::fs::{self, File};
use std::io::Read;
use std::path::Path;

use crate::config::AssistantConfig;
use crate::context::{FileBody, LoadedFile};
use crate::error::AssistantError;
use crate::sandbox::{is_code_or_config, is_image, PathSandbox};

/// Project files that are always worth loading when mentioned.
pub const PROJECT_CONTEXT_FILES: &[&str] = &[
    "README.md",
    "README.txt",
    "CONTRIBUTING.md",
    "package.json",
    "requirements.txt",
    "Cargo.toml",
    "go.mod",
    "pyproject.toml",
    "setup.py",
    "Makefile",
    "CMakeLists.txt",
    ".gitignore",
    "Dockerfile",
    "docker-compose.yml",
];

#[must_use]
pub fn is_project_context_file(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| PROJECT_CONTEXT_FILES.contains(&name))
}

/// A bounded read of a text file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextPrefix {
    pub text: String,
    pub truncated: bool,
    pub size: u64,
}

/// Reads at most `limit` bytes as lossy UTF-8, appending a marker when cut.
pub fn read_text_prefix(path: &Path, limit: usize) -> Result<TextPrefix, AssistantError> {
    let file = File::open(path).map_err(|source| AssistantError::io("opening file", path, source))?;
    let size = file
        .metadata()
        .map_err(|source| AssistantError::io("reading file metadata", path, source))?
        .len();

    let mut bytes = Vec::new();
    file.take(limit as u64)
        .read_to_end(&mut bytes)
        .map_err(|source| AssistantError::io("reading file", path, source))?;

    let truncated = size > limit as u64;
    if truncated {
        drop_partial_char_tail(&mut bytes);
    }
    let mut text = String::from_utf8_lossy(&bytes).into_owned();
    if truncated {
        text.push_str(&format!(
            "\n\n[... TRUNCATED - showing {:.1}KB of {:.1}KB total ...]",
            limit as f64 / 1024.0,
            size as f64 / 1024.0
        ));
    }

    Ok(TextPrefix {
        text,
        truncated,
        size,
    })
}

fn drop_partial_char_tail(bytes: &mut Vec<u8>) {
    if let Err(error) = std::str::from_utf8(bytes) {
        if error.error_len().is_none() {
            bytes.truncate(error.valid_up_to());
        }
    }
}

/// One-line stand-in for an image: name, dimensions and format when readable.
#[must_use]
pub fn describe_image(path: &Path) -> String {
    let name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());

    let Ok(reader) = image::ImageReader::open(path).and_then(|reader| reader.with_guessed_format())
    else {
        return format!("[Image: {name}]");
    };
    let format = reader
        .format()
        .map(|format| format!("{format:?}").to_ascii_uppercase());
    match (reader.into_dimensions(), format) {
        (Ok((width, height)), Some(format)) => {
            format!("[Image: {name} - {width}x{height}px, {format} format]")
        }
        (Ok((width, height)), None) => format!("[Image: {name} - {width}x{height}px]"),
        (Err(_), _) => format!("[Image: {name}]"),
    }
}

/// Inclusive 1-based line selection for explicit opens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineRange {
    pub start: usize,
    pub end: Option<usize>,
}

/// Splits `file.py:10-50` / `file.py:100` into path and range.
///
/// A suffix that is not purely numeric is treated as part of the path.
#[must_use]
pub fn parse_open_target(arg: &str) -> (&str, Option<LineRange>) {
    let arg = arg.trim();
    let Some((file, suffix)) = arg.rsplit_once(':') else {
        return (arg, None);
    };

    let digits = |value: &str| !value.is_empty() && value.bytes().all(|b| b.is_ascii_digit());
    let range = match suffix.split_once('-') {
        Some((start, end)) if digits(start) && digits(end) => {
            match (start.parse(), end.parse()) {
                (Ok(start), Ok(end)) => Some(LineRange {
                    start,
                    end: Some(end),
                }),
                _ => None,
            }
        }
        None if digits(suffix) => suffix.parse().ok().map(|start| LineRange { start, end: None }),
        _ => None,
    };

    match range {
        Some(range) if !file.is_empty() => (file, Some(range)),
        _ => (arg, None),
    }
}

/// Renders the selected lines with a header and right-aligned numbers.
#[must_use]
pub fn render_line_range(text: &str, range: LineRange, display: &str) -> String {
    let lines: Vec<&str> = text.lines().collect();
    let total = lines.len();
    let start = range.start.max(1).min(total.max(1));
    let end = range.end.unwrap_or(total).min(total).max(start.saturating_sub(1));

    let mut out = format!("[Lines {start}-{end} of {total} in {display}]");
    for (offset, line) in lines
        .iter()
        .enumerate()
        .skip(start - 1)
        .take(end + 1 - start)
    {
        out.push_str(&format!("\n{:4} | {}", offset + 1, line.trim_end()));
    }
    out
}

/// Loads files for the context store according to the configured limits.
#[derive(Debug, Clone)]
pub struct FileLoader {
    auto_load_max_bytes: u64,
    auto_load_read_bytes: usize,
}

impl FileLoader {
    #[must_use]
    pub fn new(config: &AssistantConfig) -> Self {
        Self {
            auto_load_max_bytes: config.auto_load_max_bytes,
            auto_load_read_bytes: config.auto_load_read_bytes,
        }
    }

    /// True for project files and for code/config files under the size ceiling.
    #[must_use]
    pub fn should_auto_load(&self, path: &Path) -> bool {
        if is_project_context_file(path) {
            return true;
        }
        if !is_code_or_config(path) {
            return false;
        }
        fs::metadata(path).is_ok_and(|metadata| metadata.len() < self.auto_load_max_bytes)
    }

    /// Applies the auto-load policy. `Ok(None)` means the policy declined.
    pub fn auto_load(
        &self,
        sandbox: &PathSandbox,
        path: &Path,
    ) -> Result<Option<LoadedFile>, AssistantError> {
        let path = sandbox.check(path)?;
        if is_image(&path) {
            let size = fs::metadata(&path).map(|metadata| metadata.len()).unwrap_or(0);
            let description = describe_image(&path);
            let body = FileBody::ImageDescription(description);
            return LoadedFile::new(sandbox, &path, body, false, size).map(Some);
        }
        if !self.should_auto_load(&path) {
            return Ok(None);
        }

        let prefix = read_text_prefix(&path, self.auto_load_read_bytes)?;
        if prefix.truncated {
            tracing::debug!(
                path = %path.display(),
                size = prefix.size,
                "auto-loaded file truncated"
            );
        }
        LoadedFile::new(
            sandbox,
            &path,
            FileBody::Text(prefix.text),
            prefix.truncated,
            prefix.size,
        )
        .map(Some)
    }

    /// Loads a whole file (or a numbered line range) on explicit request.
    pub fn open(
        &self,
        sandbox: &PathSandbox,
        path: &Path,
        range: Option<LineRange>,
    ) -> Result<LoadedFile, AssistantError> {
        let path = sandbox.check(path)?;
        let metadata = fs::metadata(&path)
            .map_err(|source| AssistantError::io("opening file", &path, source))?;
        if !metadata.is_file() {
            return Err(AssistantError::io(
                "opening file",
                &path,
                std::io::Error::new(std::io::ErrorKind::InvalidInput, "not a regular file"),
            ));
        }
        if is_image(&path) {
            return LoadedFile::new(
                sandbox,
                &path,
                FileBody::ImageDescription(describe_image(&path)),
                false,
                metadata.len(),
            );
        }

        let bytes =
            fs::read(&path).map_err(|source| AssistantError::io("reading file", &path, source))?;
        let text = String::from_utf8_lossy(&bytes).into_owned();
        let body = match range {
            Some(range) => render_line_range(&text, range, &sandbox.display(&path)),
            None => text,
        };
        LoadedFile::new(sandbox, &path, FileBody::Text(body), false, metadata.len())
    }
}
