//! Secure path resolution
//!
//! Turns a logical file reference into a filesystem path. Legacy-storage
//! files are answered by the legacy file store as-is. Managed-repository
//! files are rebuilt from their stored relative path components, each of
//! which must pass the [`PathPolicy`], and the result must stay inside the
//! managed root both lexically and, where the path exists, after symlinks
//! are followed.
//!
//! ```text
//! LOOKUP_RECORD ─┬─ legacy ──────────────────────────────▶ LEGACY_PATH
//!                └─ managed ─▶ SANITIZE_COMPONENTS ─┬─────▶ REJECTED
//!                                                   └─▶ NORMALIZE_AND_VERIFY ─┬─▶ REJECTED
//!                                                                             └─▶ RESOLVED
//! ```

use crate::error::{BackboneError, Result};
use crate::facade::{DataStore, FileLookup, FileRecord, Repository, TxContext};
use crate::policy::PathPolicy;
use std::fmt;
use std::path::{Component, Path, PathBuf};

/// A path verified to lie inside the managed root
///
/// Only the resolver constructs these.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckedPath(PathBuf);

impl CheckedPath {
    pub fn as_path(&self) -> &Path {
        &self.0
    }

    pub fn into_path_buf(self) -> PathBuf {
        self.0
    }
}

impl fmt::Display for CheckedPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.display())
    }
}

/// Outcome of a successful resolution
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolvedPath {
    /// Path reported by the legacy file store
    Legacy(PathBuf),
    /// Verified managed-repository path
    Managed(CheckedPath),
}

impl ResolvedPath {
    pub fn as_path(&self) -> &Path {
        match self {
            ResolvedPath::Legacy(p) => p,
            ResolvedPath::Managed(p) => p.as_path(),
        }
    }
}

/// Resolves logical file references against a fixed managed root
#[derive(Debug, Clone)]
pub struct PathResolver {
    policy: PathPolicy,
    managed_root: PathBuf,
}

impl PathResolver {
    /// Create a resolver for an absolute managed root
    pub fn new(policy: PathPolicy, managed_root: impl AsRef<Path>) -> Result<Self> {
        let root = managed_root.as_ref();
        if !root.is_absolute() {
            return Err(BackboneError::Config(format!(
                "managed repository root must be absolute: {}",
                root.display()
            )));
        }
        let managed_root = normalize(root).ok_or_else(|| {
            BackboneError::Config(format!(
                "managed repository root escapes the filesystem root: {}",
                root.display()
            ))
        })?;
        tracing::info!(root = %managed_root.display(), "Managed repository root set");
        Ok(Self {
            policy,
            managed_root,
        })
    }

    pub fn managed_root(&self) -> &Path {
        &self.managed_root
    }

    pub fn policy(&self) -> &PathPolicy {
        &self.policy
    }

    /// Resolve a logical file reference
    pub fn resolve(&self, tx: &TxContext, store: &dyn DataStore, lookup: FileLookup) -> Result<ResolvedPath> {
        let record = store.query().file_record(tx, lookup)?;
        self.resolve_record(tx, store, &record)
    }

    /// Resolve an already looked-up file record
    pub fn resolve_record(
        &self,
        tx: &TxContext,
        store: &dyn DataStore,
        record: &FileRecord,
    ) -> Result<ResolvedPath> {
        match &record.repository {
            Repository::Legacy => Ok(ResolvedPath::Legacy(store.files().legacy_path(tx, record.id)?)),
            Repository::Managed(repo) => {
                let components = store.files().repo_relative_path(tx, repo, record.id)?;
                self.check(record.id, &components).map(ResolvedPath::Managed)
            }
        }
    }

    /// Verify stored relative path components of a managed file
    pub fn check(&self, file_id: i64, components: &[String]) -> Result<CheckedPath> {
        if components.is_empty() {
            return Err(self.reject(file_id, components, "no path components"));
        }
        for component in components {
            if let Err(violation) = self.policy.sanitize_component(component) {
                return Err(self.reject(file_id, components, &violation.to_string()));
            }
        }

        let joined = components
            .iter()
            .fold(self.managed_root.clone(), |path, c| path.join(c));
        let candidate = match normalize(&joined) {
            Some(p) if p.starts_with(&self.managed_root) && p != self.managed_root => p,
            _ => return Err(self.reject(file_id, components, "escapes managed root")),
        };

        if !self.contained_on_disk(&candidate) {
            return Err(self.reject(file_id, components, "escapes managed root via symlink"));
        }

        Ok(CheckedPath(candidate))
    }

    /// Follow symlinks of the deepest existing part of `candidate`
    ///
    /// When the root itself does not exist only the lexical check applies.
    fn contained_on_disk(&self, candidate: &Path) -> bool {
        let Ok(root) = self.managed_root.canonicalize() else {
            return true;
        };
        let Some(existing) = candidate
            .ancestors()
            .find(|p| p.symlink_metadata().is_ok())
        else {
            return true;
        };
        match existing.canonicalize() {
            Ok(real) => real.starts_with(&root),
            // Dangling symlink
            Err(_) => false,
        }
    }

    fn reject(&self, file_id: i64, components: &[String], reason: &str) -> BackboneError {
        tracing::warn!(
            file_id,
            components = ?components,
            root = %self.managed_root.display(),
            reason,
            "Illegal path"
        );
        BackboneError::IllegalPath { file_id }
    }
}

/// Lexically resolve `.` and `..`; None if `..` climbs above the root
fn normalize(path: &Path) -> Option<PathBuf> {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Prefix(_) | Component::RootDir | Component::Normal(_) => out.push(component),
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    return None;
                }
            }
        }
    }
    Some(out)
}
