//! Path resolution and the write/read boundary.
//!
//! All paths are resolved the way `realpath` does: each component is
//! canonicalized (following symlinks) as it is appended, `..` pops the
//! resolved prefix, and missing components are kept as written. Containment
//! is then a component-wise prefix check against the canonical root, so
//! neither `..` sequences nor symlinks can leave the root.

use std::env;
use std::fs;
use std::path::{Component, Path, PathBuf};

use crate::error::AssistantError;

pub const CODE_EXTENSIONS: &[&str] = &[
    "py", "js", "jsx", "ts", "tsx", "java", "cpp", "c", "h", "hpp", "cs", "go", "rs", "rb", "php",
    "swift", "kt", "scala", "r", "sh", "bash", "sql", "graphql", "proto",
];
pub const CONFIG_EXTENSIONS: &[&str] =
    &["json", "yaml", "yml", "toml", "xml", "ini", "conf", "cfg"];
pub const WEB_EXTENSIONS: &[&str] = &["html", "css", "scss", "sass", "less", "vue", "svelte"];
pub const DOC_EXTENSIONS: &[&str] = &["md", "txt", "rst", "adoc"];
pub const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "gif", "bmp", "webp"];

#[derive(Debug, Clone)]
pub struct PathSandbox {
    root: PathBuf,
}

impl PathSandbox {
    /// Fixes the sandbox at the canonical form of `root`, which must be a directory.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, AssistantError> {
        let root = root.into();
        let canonical = root
            .canonicalize()
            .map_err(|source| AssistantError::io("resolving sandbox root", &root, source))?;
        if !canonical.is_dir() {
            return Err(AssistantError::Config(format!(
                "sandbox root must be a directory: {}",
                canonical.display()
            )));
        }
        Ok(Self { root: canonical })
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolves `user_path` against `cwd`. An empty path resolves to `cwd`.
    ///
    /// The result is not checked; pair with [`PathSandbox::is_safe`] or use
    /// [`PathSandbox::resolve_checked`].
    #[must_use]
    pub fn resolve(&self, user_path: &str, cwd: &Path) -> PathBuf {
        let user_path = user_path.trim();
        let candidate = if user_path.is_empty() {
            cwd.to_path_buf()
        } else {
            let path = Path::new(user_path);
            if path.is_absolute() {
                path.to_path_buf()
            } else {
                cwd.join(path)
            }
        };
        real_path(&candidate)
    }

    /// True iff the real path of `path` is the root or inside it.
    #[must_use]
    pub fn is_safe(&self, path: &Path) -> bool {
        real_path(path).starts_with(&self.root)
    }

    /// Returns the real path of `path` or a [`AssistantError::SandboxViolation`].
    pub fn check(&self, path: &Path) -> Result<PathBuf, AssistantError> {
        let real = real_path(path);
        if real.starts_with(&self.root) {
            Ok(real)
        } else {
            tracing::warn!(
                path = %real.display(),
                root = %self.root.display(),
                "sandbox violation"
            );
            Err(AssistantError::sandbox(real, &self.root))
        }
    }

    pub fn resolve_checked(&self, user_path: &str, cwd: &Path) -> Result<PathBuf, AssistantError> {
        self.check(&self.resolve(user_path, cwd))
    }

    /// Root-relative rendering used in prompts, diffs and backup names.
    #[must_use]
    pub fn display(&self, path: &Path) -> String {
        match path.strip_prefix(&self.root) {
            Ok(relative) if relative.as_os_str().is_empty() => ".".to_string(),
            Ok(relative) => relative.display().to_string(),
            Err(_) => path.display().to_string(),
        }
    }
}

/// `realpath`-style resolution that tolerates a non-existent tail.
#[must_use]
pub fn real_path(path: &Path) -> PathBuf {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        env::current_dir()
            .unwrap_or_else(|_| PathBuf::from("/"))
            .join(path)
    };

    // `..` after a missing directory can land back on an existing link.
    let mut resolved = PathBuf::new();
    for component in absolute.components() {
        match component {
            Component::Prefix(_) | Component::RootDir => resolved.push(component.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => {
                resolved.pop();
            }
            Component::Normal(name) => {
                let next = resolved.join(name);
                resolved = fs::canonicalize(&next).unwrap_or(next);
            }
        }
    }
    resolved
}

/// Lower-cased extension without the dot, or `""`.
#[must_use]
pub fn extension_of(path: &Path) -> String {
    path.extension()
        .map(|ext| ext.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default()
}

/// Extensions written without an extra confirmation. Extension-less files pass.
#[must_use]
pub fn is_allowed_extension(path: &Path) -> bool {
    let ext = extension_of(path);
    ext.is_empty()
        || [CODE_EXTENSIONS, CONFIG_EXTENSIONS, WEB_EXTENSIONS, DOC_EXTENSIONS]
            .iter()
            .any(|set| set.contains(&ext.as_str()))
}

#[must_use]
pub fn is_image(path: &Path) -> bool {
    IMAGE_EXTENSIONS.contains(&extension_of(path).as_str())
}

#[must_use]
pub fn is_code_or_config(path: &Path) -> bool {
    let ext = extension_of(path);
    CODE_EXTENSIONS.contains(&ext.as_str()) || CONFIG_EXTENSIONS.contains(&ext.as_str())
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::Path;

    use super::{is_allowed_extension, PathSandbox};

    fn sandbox() -> (tempfile::TempDir, PathSandbox) {
        let dir = tempfile::tempdir().expect("tempdir should be created");
        fs::create_dir_all(dir.path().join("proj/src")).expect("tree should be created");
        let sandbox = PathSandbox::new(dir.path().join("proj")).expect("sandbox should open");
        (dir, sandbox)
    }

    #[test]
    fn relative_paths_join_cwd_and_normalize_dots() {
        let (_dir, sandbox) = sandbox();
        let cwd = sandbox.root().join("src");
        let resolved = sandbox.resolve("./../src/./new.rs", &cwd);
        assert_eq!(resolved, sandbox.root().join("src/new.rs"));
        assert!(sandbox.is_safe(&resolved));
        assert_eq!(sandbox.display(&resolved), "src/new.rs");
    }

    #[test]
    fn empty_path_resolves_to_cwd() {
        let (_dir, sandbox) = sandbox();
        let cwd = sandbox.root().join("src");
        assert_eq!(sandbox.resolve("  ", &cwd), cwd);
        assert_eq!(sandbox.display(sandbox.root()), ".");
    }

    #[test]
    fn dot_dot_escapes_are_unsafe() {
        let (_dir, sandbox) = sandbox();
        let cwd = sandbox.root().join("src");
        for input in ["../../outside.txt", "../../../etc/passwd", "missing/../../../x"] {
            let resolved = sandbox.resolve(input, &cwd);
            assert!(!sandbox.is_safe(&resolved), "{input} must be rejected");
            assert!(sandbox
                .resolve_checked(input, &cwd)
                .expect_err("escape must fail")
                .is_sandbox_violation());
        }
    }

    #[test]
    fn sibling_with_shared_prefix_is_unsafe() {
        let (dir, sandbox) = sandbox();
        fs::create_dir_all(dir.path().join("proj2")).expect("sibling should be created");
        let resolved = sandbox.resolve("../proj2/file.txt", sandbox.root());
        assert!(!sandbox.is_safe(&resolved));
    }

    #[test]
    fn absolute_paths_outside_root_are_unsafe() {
        let (dir, sandbox) = sandbox();
        let outside = dir.path().join("elsewhere.txt");
        let resolved = sandbox.resolve(&outside.display().to_string(), sandbox.root());
        assert!(!sandbox.is_safe(&resolved));
        assert!(sandbox.is_safe(sandbox.root()));
    }

    #[cfg(unix)]
    #[test]
    fn symlinks_pointing_outside_are_unsafe() {
        let (dir, sandbox) = sandbox();
        let outside = dir.path().join("secrets");
        fs::create_dir_all(&outside).expect("outside dir should be created");
        fs::write(outside.join("key.txt"), "k").expect("outside file should be written");
        std::os::unix::fs::symlink(&outside, sandbox.root().join("link"))
            .expect("symlink should be created");

        for input in ["link/key.txt", "link/new.txt", "link"] {
            let resolved = sandbox.resolve(input, sandbox.root());
            assert!(!sandbox.is_safe(&resolved), "{input} must be rejected");
        }
    }

    #[cfg(unix)]
    #[test]
    fn symlink_then_dot_dot_follows_the_link_target() {
        let (dir, sandbox) = sandbox();
        let deep = dir.path().join("outer/inner");
        fs::create_dir_all(&deep).expect("outside tree should be created");
        std::os::unix::fs::symlink(&deep, sandbox.root().join("jump"))
            .expect("symlink should be created");

        let resolved = sandbox.resolve("jump/../x.txt", sandbox.root());
        assert_eq!(resolved, dir.path().canonicalize().expect("canon").join("outer/x.txt"));
        assert!(!sandbox.is_safe(&resolved));
    }

    #[cfg(unix)]
    #[test]
    fn links_after_a_missing_directory_are_still_followed() {
        let (dir, sandbox) = sandbox();
        let outside = dir.path().join("escape-target");
        fs::create_dir_all(&outside).expect("outside dir should be created");
        std::os::unix::fs::symlink(&outside, sandbox.root().join("escape"))
            .expect("symlink should be created");

        let resolved = sandbox.resolve("missing/../escape/x.py", sandbox.root());
        assert_eq!(resolved, outside.canonicalize().expect("canon").join("x.py"));
        assert!(!sandbox.is_safe(&resolved));
    }

    #[test]
    fn extension_allowlist_accepts_known_and_extensionless() {
        assert!(is_allowed_extension(Path::new("a/b.rs")));
        assert!(is_allowed_extension(Path::new("Makefile")));
        assert!(is_allowed_extension(Path::new("README.MD")));
        assert!(!is_allowed_extension(Path::new("tool.exe")));
        assert!(!is_allowed_extension(Path::new("photo.png")));
    }
}
