//! Include resolvers for `:r` directives

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use batchql_core::{IncludeError, IncludeResolver, IncludedFile, SourceFile};


/// Reads includes from the filesystem.
///
/// Relative paths in the top-level script resolve against `base_dir`;
/// relative paths inside an included file resolve against that file's
/// directory. File identity is the canonical path, so the same file reached
/// through different relative spellings is still detected as a cycle.
#[derive(Debug, Clone)]
pub struct FsIncludeResolver {
    base_dir: PathBuf,
}

impl FsIncludeResolver {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    fn candidate(&self, path: &str, relative_to: &SourceFile) -> PathBuf {
        let requested = Path::new(path);
        if requested.is_absolute() {
            return requested.to_path_buf();
        }
        match relative_to.path().and_then(|p| Path::new(p).parent()) {
            Some(dir) => dir.join(requested),
            None => self.base_dir.join(requested),
        }
    }
}

impl IncludeResolver for FsIncludeResolver {
    fn read(&self, path: &str, relative_to: &SourceFile) -> Result<IncludedFile, IncludeError> {
        let candidate = self.candidate(path, relative_to);
        let display = candidate.display().to_string();

        let text = std::fs::read_to_string(&candidate).map_err(|source| {
            if source.kind() == std::io::ErrorKind::NotFound {
                IncludeError::NotFound(display.clone())
            } else {
                IncludeError::Io {
                    path: display.clone(),
                    source,
                }
            }
        })?;

        let identity = std::fs::canonicalize(&candidate)
            .map(|p| p.display().to_string())
            .unwrap_or(display);

        tracing::debug!(path = %identity, bytes = text.len(), "read include file");
        Ok(IncludedFile {
            path: identity,
            text,
        })
    }
}

/// Serves includes from an in-memory map keyed by path.
///
/// Paths are looked up exactly as written in the directive; `relative_to`
/// is ignored. Useful for editors that hold unsaved buffers and for tests.
#[derive(Debug, Clone, Default)]
pub struct MemoryIncludeResolver {
    files: HashMap<String, String>,
}

impl MemoryIncludeResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_file(mut self, path: impl Into<String>, text: impl Into<String>) -> Self {
        self.insert(path, text);
        self
    }

    pub fn insert(&mut self, path: impl Into<String>, text: impl Into<String>) {
        self.files.insert(path.into(), text.into());
    }
}

impl IncludeResolver for MemoryIncludeResolver {
    fn read(&self, path: &str, _relative_to: &SourceFile) -> Result<IncludedFile, IncludeError> {
        self.files
            .get(path)
            .map(|text| IncludedFile {
                path: path.to_string(),
                text: text.clone(),
            })
            .ok_or_else(|| IncludeError::NotFound(path.to_string()))
    }
}
