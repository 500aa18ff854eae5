//! Cache keys: one directory per (source, precision).

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use crate::precision::Precision;
use crate::source::ModelSource;

/// Identifies one converted artifact in the cache.
///
/// Local sources are keyed by their canonical path so that `./m` and
/// `/abs/m` share an entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    source: ModelSource,
    precision: Precision,
}

impl CacheKey {
    pub fn new(source: &ModelSource, precision: Precision) -> io::Result<Self> {
        let source = match source {
            ModelSource::Remote(repo) => ModelSource::Remote(repo.clone()),
            ModelSource::Local(path) => ModelSource::Local(std::fs::canonicalize(path)?),
        };
        Ok(Self { source, precision })
    }

    pub fn source(&self) -> &ModelSource {
        &self.source
    }

    pub fn precision(&self) -> Precision {
        self.precision
    }

    /// Directory shared by every precision of this source.
    pub fn source_dir_name(&self) -> String {
        match &self.source {
            ModelSource::Remote(repo) => repo.dir_name(),
            ModelSource::Local(path) => local_dir_name(path),
        }
    }

    /// Label recorded in manifests and compared on lookup.
    pub fn source_label(&self) -> String {
        self.source.to_string()
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}]", self.source, self.precision)
    }
}

fn local_dir_name(path: &Path) -> String {
    let stem: String = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "root".to_string())
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '.' { c } else { '_' })
        .collect();

    let digest = Sha256::digest(path.as_os_str().to_string_lossy().as_bytes());
    let hex: String = digest.iter().take(8).map(|b| format!("{b:02x}")).collect();
    format!("local--{stem}--{hex}")
}

/// Helper used by the store.
pub(crate) fn join_key(root: &Path, key: &CacheKey) -> PathBuf {
    root.join(key.source_dir_name()).join(key.precision.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::RepoId;

    #[test]
    fn test_remote_key_layout() {
        let source = ModelSource::Remote(RepoId::parse("org/demo-model").unwrap());
        let key = CacheKey::new(&source, Precision::Int4).unwrap();
        assert_eq!(key.source_dir_name(), "models--org--demo-model");
        assert_eq!(
            join_key(Path::new("/cache"), &key),
            PathBuf::from("/cache/models--org--demo-model/int4")
        );
    }

    #[test]
    fn test_precision_is_part_of_key() {
        let source = ModelSource::Remote(RepoId::parse("org/demo-model").unwrap());
        let a = CacheKey::new(&source, Precision::Int4).unwrap();
        let b = CacheKey::new(&source, Precision::Int8).unwrap();
        assert_ne!(a, b);
        assert_ne!(join_key(Path::new("/c"), &a), join_key(Path::new("/c"), &b));
    }

    #[test]
    fn test_local_key_is_canonical() {
        let dir = tempfile::tempdir().unwrap();
        let model = dir.path().join("my model");
        std::fs::create_dir(&model).unwrap();

        let direct = CacheKey::new(&ModelSource::Local(model.clone()), Precision::Int4).unwrap();
        let dotted = CacheKey::new(
            &ModelSource::Local(model.join("..").join("my model")),
            Precision::Int4,
        )
        .unwrap();

        assert_eq!(direct, dotted);
        let name = direct.source_dir_name();
        assert!(name.starts_with("local--my_model--"), "{name}");
    }

    #[test]
    fn test_missing_local_path_fails() {
        let err = CacheKey::new(
            &ModelSource::Local(PathBuf::from("/nonexistent/path")),
            Precision::Int4,
        );
        assert!(err.is_err());
    }
}
