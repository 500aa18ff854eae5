//! Model sources: a hub repository id or a local filesystem path.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::resolver::{ResolveError, ResolveResult};

/// A validated `org/name` repository identifier on a model hub.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RepoId {
    org: String,
    name: String,
}

impl RepoId {
    /// Parses `org/name`. Both halves must be non-empty and contain no further slashes.
    pub fn parse(id: &str) -> Option<Self> {
        let (org, name) = id.trim().split_once('/')?;
        let valid = |part: &str| {
            !part.is_empty()
                && part
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
                && part != "."
                && part != ".."
        };
        if valid(org) && valid(name) {
            Some(Self {
                org: org.to_string(),
                name: name.to_string(),
            })
        } else {
            None
        }
    }

    pub fn org(&self) -> &str {
        &self.org
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Hub-style directory name, e.g. `models--org--name`.
    pub fn dir_name(&self) -> String {
        format!("models--{}--{}", self.org, self.name)
    }
}

impl fmt::Display for RepoId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.org, self.name)
    }
}

/// Where a model comes from.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ModelSource {
    /// Repository on a model hub, fetched on a cache miss.
    Remote(RepoId),
    /// Checkpoint directory or converted artifact on disk.
    Local(PathBuf),
}

impl ModelSource {
    /// Interprets a user-supplied repo id or path.
    ///
    /// Anything that reads like a path (absolute, `./`, `../`, `~`, backslashes,
    /// or an existing file/directory) is local. `org/name` is remote.
    pub fn parse(input: &str) -> ResolveResult<Self> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(ResolveError::InvalidConfig(
                "model source must not be empty".to_string(),
            ));
        }

        if looks_like_path(trimmed) || Path::new(trimmed).exists() {
            return Ok(Self::Local(expand_home(trimmed)));
        }

        match RepoId::parse(trimmed) {
            Some(repo) => Ok(Self::Remote(repo)),
            None => Ok(Self::Local(PathBuf::from(trimmed))),
        }
    }

    pub fn is_remote(&self) -> bool {
        matches!(self, Self::Remote(_))
    }

    pub fn as_local(&self) -> Option<&Path> {
        match self {
            Self::Local(path) => Some(path),
            Self::Remote(_) => None,
        }
    }
}

impl FromStr for ModelSource {
    type Err = ResolveError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl From<RepoId> for ModelSource {
    fn from(repo: RepoId) -> Self {
        Self::Remote(repo)
    }
}

impl From<PathBuf> for ModelSource {
    fn from(path: PathBuf) -> Self {
        Self::Local(path)
    }
}

impl fmt::Display for ModelSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Remote(repo) => write!(f, "{repo}"),
            Self::Local(path) => write!(f, "{}", path.display()),
        }
    }
}

fn looks_like_path(s: &str) -> bool {
    s.starts_with('/')
        || s.starts_with("./")
        || s.starts_with("../")
        || s.starts_with('~')
        || s == "."
        || s == ".."
        || s.contains('\\')
        || s.matches('/').count() > 1
        || (s.len() > 1 && s.as_bytes()[1] == b':')
}

fn expand_home(s: &str) -> PathBuf {
    if let Some(rest) = s.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(s)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repo_id_parse() {
        let repo = RepoId::parse("org/demo-model").unwrap();
        assert_eq!(repo.org(), "org");
        assert_eq!(repo.name(), "demo-model");
        assert_eq!(repo.to_string(), "org/demo-model");
        assert_eq!(repo.dir_name(), "models--org--demo-model");

        assert!(RepoId::parse("no-slash").is_none());
        assert!(RepoId::parse("/leading").is_none());
        assert!(RepoId::parse("trailing/").is_none());
        assert!(RepoId::parse("a/b/c").is_none());
        assert!(RepoId::parse("../x").is_none());
    }

    #[test]
    fn test_source_parse_remote() {
        let source = ModelSource::parse("togethercomputer/RedPajama-INCITE-7B-Chat").unwrap();
        assert!(source.is_remote());
    }

    #[test]
    fn test_source_parse_paths() {
        for input in ["/nonexistent/path", "./model", "../model", "C:\\models\\x", "a/b/c"] {
            let source = ModelSource::parse(input).unwrap();
            assert!(source.as_local().is_some(), "{input} should be local");
        }
    }

    #[test]
    fn test_source_parse_existing_dir_is_local() {
        let dir = tempfile::tempdir().unwrap();
        let source = ModelSource::parse(dir.path().to_str().unwrap()).unwrap();
        assert_eq!(source.as_local(), Some(dir.path()));
    }

    #[test]
    fn test_source_parse_empty() {
        assert!(matches!(
            ModelSource::parse("   "),
            Err(ResolveError::InvalidConfig(_))
        ));
    }
}
