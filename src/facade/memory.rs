//! In-memory data store
//!
//! Implements every facade service over plain tables. Useful for tests and
//! single-process hosts; counts facade calls and transaction outcomes so
//! callers can assert what a request did (or did not) touch.

use super::{
    DataStore, FileLookup, FileRecord, FileStore, PixelsService, QueryService, Repository,
    TxContext, TxOutcome,
};
use crate::error::{BackboneError, Result};
use crate::model::{AmbientContext, ObjectGraph, ObjectNode};
use crate::types::Identity;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::RwLock;

#[derive(Default)]
struct Tables {
    objects: HashMap<(String, i64), ObjectNode>,
    hidden: HashSet<(String, i64, String)>,
    image_pixels: HashMap<i64, Vec<i64>>,
    enumerations: HashMap<String, Vec<ObjectNode>>,
    rendering_settings: HashMap<i64, ObjectNode>,
    filesets: HashMap<i64, Vec<i64>>,
    files: HashMap<i64, FileRecord>,
    annotations: HashMap<i64, i64>,
    repo_paths: HashMap<i64, Vec<String>>,
    legacy_paths: HashMap<i64, PathBuf>,
}

/// Counters of work done against the store
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
    /// Facade service calls (query, pixels, file store)
    pub calls: usize,
    pub begun: usize,
    pub committed: usize,
    pub rolled_back: usize,
}

/// In-memory implementation of the data-access facade
#[derive(Default)]
pub struct MemoryDataStore {
    tables: RwLock<Tables>,
    context: Option<AmbientContext>,
    calls: AtomicUsize,
    begun: AtomicUsize,
    committed: AtomicUsize,
    rolled_back: AtomicUsize,
}

impl MemoryDataStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach `context` to every node handed out, as an ORM would
    pub fn with_ambient_context(mut self, context: AmbientContext) -> Self {
        self.context = Some(context);
        self
    }

    /// Insert or replace an object
    pub fn insert(&self, node: ObjectNode) {
        self.write(|t| {
            t.objects.insert((node.kind.clone(), node.id), node);
        });
    }

    /// Make an object unreadable for a session subject
    pub fn hide_from(&self, kind: &str, id: i64, subject: &str) {
        self.write(|t| {
            t.hidden.insert((kind.to_string(), id, subject.to_string()));
        });
    }

    /// Insert an image with one pixels set
    pub fn insert_image(&self, image: ObjectNode, pixels: ObjectNode) {
        let (image_id, pixels_id) = (image.id, pixels.id);
        self.insert(image);
        self.insert(pixels);
        self.write(|t| t.image_pixels.entry(image_id).or_default().push(pixels_id));
    }

    /// Register the values of an enumeration type
    pub fn insert_enumeration(&self, kind: &str, values: Vec<ObjectNode>) {
        self.write(|t| {
            t.enumerations.insert(kind.to_string(), values);
        });
    }

    /// Set the rendering settings of a pixels set
    pub fn insert_rendering_settings(&self, pixels_id: i64, settings: ObjectNode) {
        self.write(|t| {
            t.rendering_settings.insert(pixels_id, settings);
        });
    }

    /// Insert a legacy-storage file
    pub fn insert_legacy_file(&self, record: FileRecord, path: impl Into<PathBuf>) {
        let path = path.into();
        self.insert(file_node(&record));
        self.write(|t| {
            t.legacy_paths.insert(record.id, path);
            t.files.insert(record.id, record);
        });
    }

    /// Insert a managed-repository file with its stored relative path
    pub fn insert_managed_file(&self, record: FileRecord, components: &[&str]) {
        let components: Vec<String> = components.iter().map(|c| c.to_string()).collect();
        self.insert(file_node(&record));
        self.write(|t| {
            t.repo_paths.insert(record.id, components);
            t.files.insert(record.id, record);
        });
    }

    /// Attach a file to a file annotation
    pub fn insert_file_annotation(&self, annotation_id: i64, file_id: i64) {
        self.insert(ObjectNode::new("FileAnnotation", annotation_id).with_value("file", file_id));
        self.write(|t| {
            t.annotations.insert(annotation_id, file_id);
        });
    }

    /// Record the files an image was imported from
    pub fn insert_fileset(&self, image_id: i64, file_ids: Vec<i64>) {
        self.write(|t| {
            t.filesets.insert(image_id, file_ids);
        });
    }

    /// Snapshot of the counters
    pub fn stats(&self) -> StoreStats {
        StoreStats {
            calls: self.calls.load(Ordering::SeqCst),
            begun: self.begun.load(Ordering::SeqCst),
            committed: self.committed.load(Ordering::SeqCst),
            rolled_back: self.rolled_back.load(Ordering::SeqCst),
        }
    }

    fn write(&self, f: impl FnOnce(&mut Tables)) {
        // A poisoned lock only means a writer panicked; the tables are still usable
        let mut tables = self.tables.write().unwrap_or_else(|e| e.into_inner());
        f(&mut tables);
    }

    fn read<T>(&self, f: impl FnOnce(&Tables) -> Result<T>) -> Result<T> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let tables = self.tables.read().map_err(|e| {
            BackboneError::Store(format!("Memory store lock poisoned: {}", e))
        })?;
        f(&tables)
    }

    fn prepare(&self, mut graph: ObjectGraph) -> ObjectGraph {
        if let Some(context) = &self.context {
            graph.attach_context(context);
        }
        graph
    }
}

fn file_node(record: &FileRecord) -> ObjectNode {
    let node = ObjectNode::new("OriginalFile", record.id).with_value("name", record.name.clone());
    match &record.repository {
        Repository::Legacy => node,
        Repository::Managed(repo) => node.with_value("repo", repo.clone()),
    }
}

impl Tables {
    fn readable(&self, tx: &TxContext, kind: &str, id: i64) -> Option<&ObjectNode> {
        let key = (kind.to_string(), id);
        if self
            .hidden
            .contains(&(key.0.clone(), id, tx.identity().subject.clone()))
        {
            return None;
        }
        self.objects.get(&key)
    }

    fn exists(&self, kind: &str, id: i64) -> bool {
        self.objects.contains_key(&(kind.to_string(), id))
    }
}

impl QueryService for MemoryDataStore {
    fn get(&self, tx: &TxContext, kind: &str, id: i64) -> Result<ObjectGraph> {
        let graph = self.read(|t| match t.readable(tx, kind, id) {
            Some(node) => Ok(ObjectGraph::single(node.clone())),
            None if t.exists(kind, id) => Err(BackboneError::PermissionDenied(format!(
                "{}:{} is not readable by the current session",
                kind, id
            ))),
            None => Err(BackboneError::NotFound(format!("{}:{}", kind, id))),
        })?;
        Ok(self.prepare(graph))
    }

    fn find(&self, tx: &TxContext, kind: &str, id: i64) -> Result<Option<ObjectGraph>> {
        let graph = self.read(|t| Ok(t.readable(tx, kind, id).map(|n| ObjectGraph::single(n.clone()))))?;
        Ok(graph.map(|g| self.prepare(g)))
    }

    fn find_image_with_pixels(&self, tx: &TxContext, image_id: i64) -> Result<Option<ObjectGraph>> {
        let graph = self.read(|t| {
            let Some(image) = t.readable(tx, "Image", image_id) else {
                return Ok(None);
            };
            let mut graph = ObjectGraph::single(image.clone());
            let root = graph.roots()[0];
            for pixels_id in t.image_pixels.get(&image_id).into_iter().flatten() {
                if let Some(pixels) = t.objects.get(&("Pixels".to_string(), *pixels_id)) {
                    let p = graph.add(pixels.clone());
                    graph.link(root, "pixels", p);
                    graph.set_ref(p, "image", root);
                }
            }
            Ok(Some(graph))
        })?;
        Ok(graph.map(|g| self.prepare(g)))
    }

    fn find_fileset_files(&self, tx: &TxContext, image_id: i64) -> Result<ObjectGraph> {
        let graph = self.read(|t| {
            let mut graph = ObjectGraph::new();
            if t.readable(tx, "Image", image_id).is_none() {
                return Ok(graph);
            }
            for file_id in t.filesets.get(&image_id).into_iter().flatten() {
                if let Some(node) = t.readable(tx, "OriginalFile", *file_id) {
                    let id = graph.add(node.clone());
                    graph.push_root(id);
                }
            }
            Ok(graph)
        })?;
        Ok(self.prepare(graph))
    }

    fn file_record(&self, tx: &TxContext, lookup: FileLookup) -> Result<FileRecord> {
        self.read(|t| {
            let file_id = match lookup {
                FileLookup::OriginalFile(id) => id,
                FileLookup::FileAnnotation(id) => {
                    t.readable(tx, "FileAnnotation", id)
                        .and_then(|_| t.annotations.get(&id).copied())
                        .ok_or_else(|| BackboneError::NotFound(format!("FileAnnotation:{}", id)))?
                }
            };
            t.readable(tx, "OriginalFile", file_id)
                .and_then(|_| t.files.get(&file_id).cloned())
                .ok_or_else(|| BackboneError::NotFound(format!("OriginalFile:{}", file_id)))
        })
    }
}

impl PixelsService for MemoryDataStore {
    fn get_all_enumerations(&self, _tx: &TxContext, kind: &str) -> Result<ObjectGraph> {
        let graph = self.read(|t| {
            let values = t
                .enumerations
                .get(kind)
                .ok_or_else(|| BackboneError::Store(format!("{} is not an enumeration type", kind)))?;
            let mut graph = ObjectGraph::new();
            for value in values {
                let id = graph.add(value.clone());
                graph.push_root(id);
            }
            Ok(graph)
        })?;
        Ok(self.prepare(graph))
    }

    fn retrieve_rendering_settings(&self, tx: &TxContext, pixels_id: i64) -> Result<Option<ObjectGraph>> {
        let graph = self.read(|t| {
            if t.readable(tx, "Pixels", pixels_id).is_none() {
                return Ok(None);
            }
            Ok(t.rendering_settings
                .get(&pixels_id)
                .map(|n| ObjectGraph::single(n.clone())))
        })?;
        Ok(graph.map(|g| self.prepare(g)))
    }

    fn retrieve_pixels_description(&self, tx: &TxContext, pixels_id: i64) -> Result<ObjectGraph> {
        let graph = self.read(|t| {
            t.readable(tx, "Pixels", pixels_id)
                .map(|n| ObjectGraph::single(n.clone()))
                .ok_or_else(|| BackboneError::NotFound(format!("Pixels:{}", pixels_id)))
        })?;
        Ok(self.prepare(graph))
    }
}

impl FileStore for MemoryDataStore {
    fn legacy_path(&self, _tx: &TxContext, file_id: i64) -> Result<PathBuf> {
        self.read(|t| {
            t.legacy_paths
                .get(&file_id)
                .cloned()
                .ok_or_else(|| BackboneError::NotFound(format!("legacy file {}", file_id)))
        })
    }

    fn repo_relative_path(&self, _tx: &TxContext, repo: &str, file_id: i64) -> Result<Vec<String>> {
        self.read(|t| {
            let in_repo = matches!(
                t.files.get(&file_id).map(|r| &r.repository),
                Some(Repository::Managed(r)) if r == repo
            );
            if !in_repo {
                return Err(BackboneError::NotFound(format!(
                    "file {} in repository {}",
                    file_id, repo
                )));
            }
            Ok(t.repo_paths.get(&file_id).cloned().unwrap_or_default())
        })
    }
}

impl DataStore for MemoryDataStore {
    fn begin(&self, identity: &Identity) -> Result<TxContext> {
        self.begun.fetch_add(1, Ordering::SeqCst);
        Ok(TxContext::read_only(identity.clone()))
    }

    fn finish(&self, _tx: TxContext, outcome: TxOutcome) -> Result<()> {
        match outcome {
            TxOutcome::Commit => self.committed.fetch_add(1, Ordering::SeqCst),
            TxOutcome::Rollback => self.rolled_back.fetch_add(1, Ordering::SeqCst),
        };
        Ok(())
    }

    fn query(&self) -> &dyn QueryService {
        self
    }

    fn pixels(&self) -> &dyn PixelsService {
        self
    }

    fn files(&self) -> &dyn FileStore {
        self
    }
}
