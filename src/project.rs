//! Project detection and the always-loaded project files.

use std::fmt;
use std::fs;
use std::path::Path;

use crate::loader::{read_text_prefix, PROJECT_CONTEXT_FILES};
use crate::sandbox::PathSandbox;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProjectType {
    Python,
    NodeJs,
    Rust,
    Go,
    Java,
    Ruby,
    Php,
    DotNet,
}

impl ProjectType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Python => "python",
            Self::NodeJs => "nodejs",
            Self::Rust => "rust",
            Self::Go => "go",
            Self::Java => "java",
            Self::Ruby => "ruby",
            Self::Php => "php",
            Self::DotNet => "dotnet",
        }
    }
}

impl fmt::Display for ProjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

const MARKERS: &[(ProjectType, &[&str])] = &[
    (
        ProjectType::Python,
        &["requirements.txt", "setup.py", "pyproject.toml", "Pipfile"],
    ),
    (
        ProjectType::NodeJs,
        &["package.json", "yarn.lock", "pnpm-lock.yaml"],
    ),
    (ProjectType::Rust, &["Cargo.toml"]),
    (ProjectType::Go, &["go.mod"]),
    (ProjectType::Java, &["pom.xml", "build.gradle"]),
    (ProjectType::Ruby, &["Gemfile"]),
    (ProjectType::Php, &["composer.json"]),
];

const DOTNET_EXTENSIONS: &[&str] = &["csproj", "sln"];

/// First matching marker wins, in the fixed order above.
#[must_use]
pub fn detect_project_type(dir: &Path) -> Option<ProjectType> {
    for (project_type, markers) in MARKERS {
        if markers.iter().any(|marker| dir.join(marker).exists()) {
            return Some(*project_type);
        }
    }

    let entries = fs::read_dir(dir).ok()?;
    entries
        .filter_map(Result::ok)
        .any(|entry| {
            entry
                .path()
                .extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| DOTNET_EXTENSIONS.contains(&ext))
        })
        .then_some(ProjectType::DotNet)
}

/// Sorted names of the first `limit` entries in `dir`.
#[must_use]
pub fn directory_sample(dir: &Path, limit: usize) -> Vec<String> {
    let Ok(entries) = fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut names: Vec<String> = entries
        .filter_map(Result::ok)
        .map(|entry| entry.file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names.truncate(limit);
    names
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectFile {
    pub name: String,
    pub content: String,
}

/// README/manifest files read from the working directory, in fixed order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProjectContext {
    files: Vec<ProjectFile>,
}

impl ProjectContext {
    /// Reads each known project file that exists inside the sandbox.
    ///
    /// Unreadable files are skipped.
    #[must_use]
    pub fn load(sandbox: &PathSandbox, dir: &Path, read_bytes: usize) -> Self {
        let mut files = Vec::new();
        for name in PROJECT_CONTEXT_FILES {
            let path = dir.join(name);
            if !path.is_file() || !sandbox.is_safe(&path) {
                continue;
            }
            match read_text_prefix(&path, read_bytes) {
                Ok(prefix) => files.push(ProjectFile {
                    name: (*name).to_string(),
                    content: prefix.text,
                }),
                Err(error) => {
                    tracing::debug!(
                        path = %path.display(),
                        error = %error,
                        "skipping project file"
                    );
                }
            }
        }
        Self { files }
    }

    #[must_use]
    pub fn files(&self) -> &[ProjectFile] {
        &self.files
    }

    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.files.iter().map(|file| file.name.as_str()).collect()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}
