//! Domain newtypes with validation
//!
//! This module provides strongly-typed wrappers for local and remote paths.
//! Each newtype ensures data validity at construction time.

use std::fmt::{self, Display, Formatter};
use std::path::{Component, Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::errors::DomainError;

// ============================================================================
// Local paths
// ============================================================================

/// A validated absolute local path
///
/// SyncPath ensures the path is:
/// - Absolute (starts with /)
/// - Lexically normalized (no . or .. components)
/// - Within the watched root when validated against one
///
/// Normalization is purely lexical; the path does not have to exist, which
/// matters for events about files that were already deleted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "PathBuf", into = "PathBuf")]
pub struct SyncPath(PathBuf);

impl SyncPath {
    /// Create a new SyncPath, validating it is absolute
    ///
    /// # Errors
    /// Returns `DomainError::InvalidPath` if the path is not absolute or
    /// escapes the filesystem root via `..`
    pub fn new(path: PathBuf) -> Result<Self, DomainError> {
        if !path.is_absolute() {
            return Err(DomainError::InvalidPath(format!(
                "Path must be absolute: {}",
                path.display()
            )));
        }

        let normalized = Self::normalize_path(&path)?;
        Ok(Self(normalized))
    }

    /// Create a SyncPath validated against a watched root
    ///
    /// # Errors
    /// Returns error if path is not within the root
    pub fn new_within_root(path: PathBuf, root: &SyncPath) -> Result<Self, DomainError> {
        let sync_path = Self::new(path)?;

        if !sync_path.0.starts_with(&root.0) {
            return Err(DomainError::PathNotInRoot(format!(
                "{} is not within {}",
                sync_path.0.display(),
                root.0.display()
            )));
        }

        Ok(sync_path)
    }

    /// Get the inner path
    #[must_use]
    pub fn as_path(&self) -> &Path {
        &self.0
    }

    /// Convert to owned PathBuf
    #[must_use]
    pub fn into_path_buf(self) -> PathBuf {
        self.0
    }

    /// Get the path relative to a root
    ///
    /// # Errors
    /// Returns error if this path is not within the root
    pub fn relative_to(&self, root: &SyncPath) -> Result<PathBuf, DomainError> {
        self.0
            .strip_prefix(&root.0)
            .map(Path::to_path_buf)
            .map_err(|_| {
                DomainError::PathNotInRoot(format!(
                    "{} is not within {}",
                    self.0.display(),
                    root.0.display()
                ))
            })
    }

    /// Number of components between `root` and this path
    ///
    /// The root itself has depth 0, a direct child depth 1. Returns `None`
    /// when the path lies outside the root.
    #[must_use]
    pub fn depth_below(&self, root: &SyncPath) -> Option<usize> {
        self.0
            .strip_prefix(&root.0)
            .ok()
            .map(|rel| rel.components().count())
    }

    /// Append a suffix to the final component, e.g. `a.txt` → `a.txt.enc`
    #[must_use]
    pub fn with_suffix(&self, suffix: &str) -> Self {
        let mut raw = self.0.as_os_str().to_owned();
        raw.push(suffix);
        Self(PathBuf::from(raw))
    }

    /// Normalize a path by resolving . and .. components
    fn normalize_path(path: &Path) -> Result<PathBuf, DomainError> {
        let mut normalized = PathBuf::new();

        for component in path.components() {
            match component {
                Component::Prefix(p) => normalized.push(p.as_os_str()),
                Component::RootDir => normalized.push("/"),
                Component::CurDir => {}
                Component::ParentDir => {
                    if !normalized.pop() {
                        return Err(DomainError::InvalidPath(
                            "Path escapes root via ..".to_string(),
                        ));
                    }
                }
                Component::Normal(c) => normalized.push(c),
            }
        }

        Ok(normalized)
    }
}

impl Display for SyncPath {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.display())
    }
}

impl TryFrom<PathBuf> for SyncPath {
    type Error = DomainError;

    fn try_from(path: PathBuf) -> Result<Self, Self::Error> {
        Self::new(path)
    }
}

impl From<SyncPath> for PathBuf {
    fn from(sync_path: SyncPath) -> Self {
        sync_path.0
    }
}

impl AsRef<Path> for SyncPath {
    fn as_ref(&self) -> &Path {
        &self.0
    }
}

// ============================================================================
// Remote paths
// ============================================================================

/// A location on a named remote, written `remote:/path/to/object`
///
/// The path part always starts with `/` and uses forward slashes regardless
/// of the local platform.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RemotePath {
    remote: String,
    path: String,
}

impl RemotePath {
    /// Create a new RemotePath
    ///
    /// # Errors
    /// Returns error if the remote name is empty or contains `:`, or if the
    /// path is not absolute, contains `//` or `..`
    pub fn new(remote: impl Into<String>, path: impl Into<String>) -> Result<Self, DomainError> {
        let remote = remote.into();
        let mut path = path.into();

        if remote.is_empty() || remote.contains(':') {
            return Err(DomainError::InvalidRemotePath(format!(
                "Invalid remote name: {remote:?}"
            )));
        }
        if !path.starts_with('/') {
            return Err(DomainError::InvalidRemotePath(format!(
                "Remote path must start with '/': {path}"
            )));
        }
        if path.len() > 1 && path.contains("//") {
            return Err(DomainError::InvalidRemotePath(format!(
                "Remote path contains invalid double slashes: {path}"
            )));
        }
        if path.split('/').any(|segment| segment == "..") {
            return Err(DomainError::InvalidRemotePath(format!(
                "Remote path contains invalid traversal: {path}"
            )));
        }
        if path.len() > 1 && path.ends_with('/') {
            path.pop();
        }

        Ok(Self { remote, path })
    }

    /// The root `/` of a remote
    ///
    /// # Errors
    /// Returns error if the remote name is invalid
    pub fn root(remote: impl Into<String>) -> Result<Self, DomainError> {
        Self::new(remote, "/")
    }

    /// Name of the remote
    #[must_use]
    pub fn remote(&self) -> &str {
        &self.remote
    }

    /// Path on the remote, always starting with `/`
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Join a single path component
    ///
    /// # Errors
    /// Returns error if component is empty or contains `/` or `..`
    pub fn join(&self, component: &str) -> Result<Self, DomainError> {
        if component.is_empty() || component.contains('/') || component == ".." {
            return Err(DomainError::InvalidRemotePath(format!(
                "Invalid path component: {component}"
            )));
        }

        let new_path = if self.path == "/" {
            format!("/{component}")
        } else {
            format!("{}/{component}", self.path)
        };

        Self::new(self.remote.clone(), new_path)
    }

    /// Join a relative local path, converting separators to `/`
    ///
    /// # Errors
    /// Returns error if `relative` is absolute or contains `..`
    pub fn join_relative(&self, relative: &Path) -> Result<Self, DomainError> {
        let mut joined = self.clone();
        for component in relative.components() {
            match component {
                Component::Normal(c) => joined = joined.join(&c.to_string_lossy())?,
                Component::CurDir => {}
                _ => {
                    return Err(DomainError::InvalidRemotePath(format!(
                        "Relative path expected: {}",
                        relative.display()
                    )))
                }
            }
        }
        Ok(joined)
    }

    /// Get the parent location
    #[must_use]
    pub fn parent(&self) -> Option<Self> {
        if self.path == "/" {
            return None;
        }

        let parent = match self.path.rfind('/') {
            Some(0) => "/".to_string(),
            Some(idx) => self.path[..idx].to_string(),
            None => return None,
        };
        Some(Self {
            remote: self.remote.clone(),
            path: parent,
        })
    }

    /// Get the file name component
    #[must_use]
    pub fn file_name(&self) -> Option<&str> {
        if self.path == "/" {
            return None;
        }

        self.path.rsplit('/').next()
    }
}

impl Display for RemotePath {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.remote, self.path)
    }
}

impl FromStr for RemotePath {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (remote, path) = s.split_once(':').ok_or_else(|| {
            DomainError::InvalidRemotePath(format!("Expected 'remote:/path', got: {s}"))
        })?;
        let path = if path.is_empty() { "/" } else { path };
        Self::new(remote, path)
    }
}

impl TryFrom<String> for RemotePath {
    type Error = DomainError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<RemotePath> for String {
    fn from(path: RemotePath) -> Self {
        path.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // -- SyncPath --

    #[test]
    fn test_sync_path_requires_absolute() {
        assert!(SyncPath::new(PathBuf::from("relative/file.txt")).is_err());
        assert!(SyncPath::new(PathBuf::from("/abs/file.txt")).is_ok());
    }

    #[test]
    fn test_sync_path_normalizes_lexically() {
        let path = SyncPath::new(PathBuf::from("/a/./b/../c.txt")).unwrap();
        assert_eq!(path.as_path(), Path::new("/a/c.txt"));
    }

    #[test]
    fn test_sync_path_rejects_escape() {
        assert!(SyncPath::new(PathBuf::from("/..")).is_err());
    }

    #[test]
    fn test_sync_path_within_root() {
        let root = SyncPath::new(PathBuf::from("/vault")).unwrap();
        assert!(SyncPath::new_within_root(PathBuf::from("/vault/a.txt"), &root).is_ok());
        let err = SyncPath::new_within_root(PathBuf::from("/other/a.txt"), &root).unwrap_err();
        assert!(matches!(err, DomainError::PathNotInRoot(_)));
    }

    #[test]
    fn test_sync_path_relative_to() {
        let root = SyncPath::new(PathBuf::from("/vault")).unwrap();
        let path = SyncPath::new(PathBuf::from("/vault/docs/a.txt")).unwrap();
        assert_eq!(path.relative_to(&root).unwrap(), PathBuf::from("docs/a.txt"));
    }

    #[test]
    fn test_sync_path_depth_below() {
        let root = SyncPath::new(PathBuf::from("/vault")).unwrap();
        let child = SyncPath::new(PathBuf::from("/vault/a")).unwrap();
        let deep = SyncPath::new(PathBuf::from("/vault/a/b/c")).unwrap();
        let outside = SyncPath::new(PathBuf::from("/elsewhere")).unwrap();
        assert_eq!(root.depth_below(&root), Some(0));
        assert_eq!(child.depth_below(&root), Some(1));
        assert_eq!(deep.depth_below(&root), Some(3));
        assert_eq!(outside.depth_below(&root), None);
    }

    #[test]
    fn test_sync_path_with_suffix() {
        let path = SyncPath::new(PathBuf::from("/vault/a.txt")).unwrap();
        assert_eq!(
            path.with_suffix(".enc").as_path(),
            Path::new("/vault/a.txt.enc")
        );
    }

    // -- RemotePath --

    #[test]
    fn test_remote_path_display_and_parse() {
        let path = RemotePath::new("backup", "/Watched_folder/a.txt").unwrap();
        assert_eq!(path.to_string(), "backup:/Watched_folder/a.txt");
        let parsed: RemotePath = "backup:/Watched_folder/a.txt".parse().unwrap();
        assert_eq!(parsed, path);
    }

    #[test]
    fn test_remote_path_parse_bare_remote() {
        let parsed: RemotePath = "backup:".parse().unwrap();
        assert_eq!(parsed.path(), "/");
        assert!("no-colon".parse::<RemotePath>().is_err());
    }

    #[test]
    fn test_remote_path_validation() {
        assert!(RemotePath::new("", "/a").is_err());
        assert!(RemotePath::new("b:x", "/a").is_err());
        assert!(RemotePath::new("b", "a").is_err());
        assert!(RemotePath::new("b", "/a//c").is_err());
        assert!(RemotePath::new("b", "/a/../c").is_err());
        // Dots inside a name are fine
        assert!(RemotePath::new("b", "/a/..hidden").is_ok());
    }

    #[test]
    fn test_remote_path_trailing_slash_trimmed() {
        let path = RemotePath::new("b", "/Watched_folder/").unwrap();
        assert_eq!(path.path(), "/Watched_folder");
    }

    #[test]
    fn test_remote_path_join_relative() {
        let root = RemotePath::new("b", "/Watched_folder").unwrap();
        let joined = root.join_relative(Path::new("docs/2024/a.txt.enc")).unwrap();
        assert_eq!(joined.to_string(), "b:/Watched_folder/docs/2024/a.txt.enc");
        assert!(root.join_relative(Path::new("../escape")).is_err());
        assert!(root.join_relative(Path::new("/abs")).is_err());
    }

    #[test]
    fn test_remote_path_parent_and_file_name() {
        let path = RemotePath::new("b", "/Watched_folder/docs/a.txt").unwrap();
        assert_eq!(path.file_name(), Some("a.txt"));
        let parent = path.parent().unwrap();
        assert_eq!(parent.to_string(), "b:/Watched_folder/docs");
        let top = RemotePath::new("b", "/a").unwrap().parent().unwrap();
        assert_eq!(top.path(), "/");
        assert!(top.parent().is_none());
        assert!(top.file_name().is_none());
    }
}
