//! Resolving resource paths into host assets.
//!
//! The core never loads textures, sounds or scenes itself. It hands a
//! [`ResourcePath`] to an [`AssetResolver`] supplied by the host and keeps the
//! opaque [`AssetHandle`] it gets back.

use std::any::Any;
use std::fmt;
use std::path::{Component as PathComponent, PathBuf};
use std::rc::Rc;

use crate::record::ResourcePath;

/// Failure to resolve a resource path.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AssetError {
    #[error("asset '{path}' not found")]
    NotFound { path: String },

    #[error("asset '{path}' escapes the asset root")]
    OutsideRoot { path: String },

    #[error("asset '{path}' failed to load: {detail}")]
    Load { path: String, detail: String },
}

/// A loaded (or at least located) asset. Cheap to clone.
#[derive(Clone)]
pub struct AssetHandle {
    path: ResourcePath,
    payload: Rc<dyn Any>,
}

impl AssetHandle {
    /// Wrap a resolver-specific payload for `path`.
    pub fn new<T: Any>(path: ResourcePath, payload: T) -> Self {
        Self {
            path,
            payload: Rc::new(payload),
        }
    }

    /// The resource path this handle was resolved from.
    pub fn path(&self) -> &ResourcePath {
        &self.path
    }

    /// The host-specific payload, if it is a `T`.
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.payload.downcast_ref::<T>()
    }
}

impl fmt::Debug for AssetHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AssetHandle")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

/// Host collaborator that turns resource paths into handles.
pub trait AssetResolver {
    fn resolve(&self, path: &ResourcePath) -> Result<AssetHandle, AssetError>;
}

/// Maps `res://a/b.png` to `<root>/a/b.png` on disk, payload `PathBuf`.
///
/// Only checks that the file exists; actual decoding belongs to the host.
#[derive(Debug, Clone)]
pub struct PathResolver {
    root: PathBuf,
}

impl PathResolver {
    /// Resolve resource paths under `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The directory resource paths are joined onto.
    pub fn root(&self) -> &std::path::Path {
        &self.root
    }
}

impl AssetResolver for PathResolver {
    fn resolve(&self, path: &ResourcePath) -> Result<AssetHandle, AssetError> {
        let relative = std::path::Path::new(path.relative());
        let escapes = relative.components().any(|c| {
            matches!(
                c,
                PathComponent::ParentDir | PathComponent::RootDir | PathComponent::Prefix(_)
            )
        });
        if escapes {
            return Err(AssetError::OutsideRoot {
                path: path.to_string(),
            });
        }
        let full = self.root.join(relative);
        if !full.is_file() {
            return Err(AssetError::NotFound {
                path: path.to_string(),
            });
        }
        Ok(AssetHandle::new(path.clone(), full))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn res(raw: &str) -> ResourcePath {
        ResourcePath::parse(raw).unwrap()
    }

    #[test]
    fn path_resolver_finds_files_under_root() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("sprites")).unwrap();
        std::fs::write(dir.path().join("sprites/hero.png"), b"png").unwrap();

        let resolver = PathResolver::new(dir.path());
        let handle = resolver.resolve(&res("res://sprites/hero.png")).unwrap();
        assert_eq!(
            handle.downcast_ref::<PathBuf>().unwrap(),
            &dir.path().join("sprites/hero.png")
        );
        assert!(handle.downcast_ref::<String>().is_none());
    }

    #[test]
    fn path_resolver_rejects_missing_and_escaping_paths() {
        let dir = tempfile::tempdir().unwrap();
        let resolver = PathResolver::new(dir.path());
        assert!(matches!(
            resolver.resolve(&res("res://nope.png")),
            Err(AssetError::NotFound { .. })
        ));
        assert!(matches!(
            resolver.resolve(&res("res://../secret")),
            Err(AssetError::OutsideRoot { .. })
        ));
    }
}
