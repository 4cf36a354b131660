//! Data-access facade: the broker's view of the underlying store
//!
//! The query, pixels-metadata and file-store services are external; the
//! broker only calls them. Every call takes the [`TxContext`] of the unit of
//! work it belongs to, so two concurrent units of work never share state
//! through the facade.

use crate::error::Result;
use crate::model::ObjectGraph;
use crate::types::Identity;
use chrono::{DateTime, Utc};
use std::path::PathBuf;

pub mod memory;

/// Transactional context of one unit of work
#[derive(Debug, Clone)]
pub struct TxContext {
    id: uuid::Uuid,
    identity: Identity,
    read_only: bool,
    opened_at: DateTime<Utc>,
}

impl TxContext {
    /// Open a read-only context for `identity`
    pub fn read_only(identity: Identity) -> Self {
        Self {
            id: uuid::Uuid::new_v4(),
            identity,
            read_only: true,
            opened_at: Utc::now(),
        }
    }

    pub fn id(&self) -> uuid::Uuid {
        self.id
    }

    /// Identity the context is scoped to
    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    pub fn opened_at(&self) -> DateTime<Utc> {
        self.opened_at
    }
}

/// How a transactional context is closed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxOutcome {
    Commit,
    Rollback,
}

/// Where a file record's bytes live
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Repository {
    /// Addressed directly by record id through the legacy file store
    Legacy,
    /// Managed repository, addressed by repository-relative path
    Managed(String),
}

/// Original file record as stored by the record store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecord {
    pub id: i64,
    pub name: String,
    pub repository: Repository,
}

impl FileRecord {
    /// A file in legacy storage
    pub fn legacy(id: i64, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            repository: Repository::Legacy,
        }
    }

    /// A file in a managed repository
    pub fn managed(id: i64, name: impl Into<String>, repo: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            repository: Repository::Managed(repo.into()),
        }
    }
}

/// Logical reference to a file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileLookup {
    /// An original file by id
    OriginalFile(i64),
    /// The file attached to a file annotation
    FileAnnotation(i64),
}

/// Object queries
pub trait QueryService: Send + Sync {
    /// Load an object; missing objects are `NotFound`
    fn get(&self, tx: &TxContext, kind: &str, id: i64) -> Result<ObjectGraph>;

    /// Load an object if it exists and is readable
    fn find(&self, tx: &TxContext, kind: &str, id: i64) -> Result<Option<ObjectGraph>>;

    /// An image with its pixels sets loaded under the image's `pixels` field
    fn find_image_with_pixels(&self, tx: &TxContext, image_id: i64) -> Result<Option<ObjectGraph>>;

    /// Original files of the fileset an image was imported from, one root each
    fn find_fileset_files(&self, tx: &TxContext, image_id: i64) -> Result<ObjectGraph>;

    /// File record behind a logical file reference
    fn file_record(&self, tx: &TxContext, lookup: FileLookup) -> Result<FileRecord>;
}

/// Pixels metadata
pub trait PixelsService: Send + Sync {
    /// Every value of an enumeration type, one root each
    fn get_all_enumerations(&self, tx: &TxContext, kind: &str) -> Result<ObjectGraph>;

    /// Rendering settings of a pixels set for the current identity
    fn retrieve_rendering_settings(&self, tx: &TxContext, pixels_id: i64) -> Result<Option<ObjectGraph>>;

    /// Full pixels description (dimensions, type, channels)
    fn retrieve_pixels_description(&self, tx: &TxContext, pixels_id: i64) -> Result<ObjectGraph>;
}

/// Legacy and managed file stores
pub trait FileStore: Send + Sync {
    /// Path of a legacy-storage file; trusted by construction
    fn legacy_path(&self, tx: &TxContext, file_id: i64) -> Result<PathBuf>;

    /// Repository-relative path components of a managed file, root to leaf
    fn repo_relative_path(&self, tx: &TxContext, repo: &str, file_id: i64) -> Result<Vec<String>>;
}

/// Per-unit-of-work handle onto the data layer
pub trait DataStore: Send + Sync {
    /// Open a transactional context for `identity`
    fn begin(&self, identity: &Identity) -> Result<TxContext> {
        Ok(TxContext::read_only(identity.clone()))
    }

    /// Close a context
    fn finish(&self, _tx: TxContext, _outcome: TxOutcome) -> Result<()> {
        Ok(())
    }

    fn query(&self) -> &dyn QueryService;

    fn pixels(&self) -> &dyn PixelsService;

    fn files(&self) -> &dyn FileStore;
}
