//! Open-document lifecycle: per-document state and the manager that owns it.

mod document;
mod manager;

pub use document::{Document, DocumentKey};
pub use manager::DocumentManager;

use std::path::{Component, Path, PathBuf};

/// Normalize a path to an absolute, lexically-cleaned form. Relative paths
/// are resolved against the current working directory; `.` and `..`
/// components are folded without touching the filesystem.
pub fn normalize_path(path: &Path) -> PathBuf {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir().unwrap_or_default().join(path)
    };

    let mut cleaned = PathBuf::new();
    for component in absolute.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                cleaned.pop();
            }
            other => cleaned.push(other),
        }
    }
    cleaned
}

/// Derive a language identifier from a file extension.
pub fn language_for_path(path: &Path) -> &'static str {
    match path.extension().and_then(|e| e.to_str()) {
        Some("rs") => "rust",
        Some("go") => "go",
        Some("py") => "python",
        Some("js" | "mjs" | "cjs") => "javascript",
        Some("ts" | "mts") => "typescript",
        Some("c" | "h") => "c",
        Some("cpp" | "cc" | "hpp") => "cpp",
        Some("java") => "java",
        Some("rb") => "ruby",
        Some("sh" | "bash") => "shell",
        Some("json") => "json",
        Some("toml") => "toml",
        Some("yaml" | "yml") => "yaml",
        Some("md") => "markdown",
        Some("html" | "htm") => "html",
        Some("css") => "css",
        _ => "plaintext",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_folds_dot_components() {
        assert_eq!(
            normalize_path(Path::new("/a/b/../c/./d.txt")),
            PathBuf::from("/a/c/d.txt")
        );
        assert_eq!(normalize_path(Path::new("/a/./b")), PathBuf::from("/a/b"));
    }

    #[test]
    fn test_normalize_makes_relative_absolute() {
        let normalized = normalize_path(Path::new("some/file.txt"));
        assert!(normalized.is_absolute());
        assert!(normalized.ends_with("some/file.txt"));
    }

    #[test]
    fn test_language_detection() {
        assert_eq!(language_for_path(Path::new("/x/main.rs")), "rust");
        assert_eq!(language_for_path(Path::new("/x/main.go")), "go");
        assert_eq!(language_for_path(Path::new("/x/notes.txt")), "plaintext");
        assert_eq!(language_for_path(Path::new("/x/no_extension")), "plaintext");
    }
}
