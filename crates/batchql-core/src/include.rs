//! Capability trait for resolving `:r` includes

use crate::{IncludeError, SourceFile};

/// The contents of an included file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncludedFile {
    /// Resolved identity of the file; used for cycle detection and as the
    /// source tag of every token lexed from it
    pub path: String,
    pub text: String,
}

/// Reads files named by include directives.
pub trait IncludeResolver {
    /// Read `path`, interpreted relative to the file containing the directive
    fn read(&self, path: &str, relative_to: &SourceFile) -> Result<IncludedFile, IncludeError>;
}

impl<T: IncludeResolver + ?Sized> IncludeResolver for &T {
    fn read(&self, path: &str, relative_to: &SourceFile) -> Result<IncludedFile, IncludeError> {
        (**self).read(path, relative_to)
    }
}
