//! Operation handlers
//!
//! One plain function per operation, looked up through [`handler`]. Handlers
//! run inside a unit of work and report failure only through their return
//! value; they never touch the reply.

use crate::error::{BackboneError, Result};
use crate::facade::{DataStore, FileLookup, TxContext};
use crate::model::ObjectGraph;
use crate::operation::Operation;
use crate::resolver::{PathResolver, ResolvedPath};
use crate::types::Payload;
use serde_json::json;

/// What a handler hands back to the dispatcher
#[derive(Debug, Clone)]
pub enum WorkResult {
    /// Answer of an identity or permission check
    Bool(bool),
    /// Object graph, sanitized before serialization
    Graph(ObjectGraph),
    /// Plain string (file paths)
    Text(String),
    /// Pre-built JSON document
    Json(serde_json::Value),
    /// No result
    Empty,
}

/// Everything a handler may touch
pub struct Scope<'a> {
    pub tx: &'a TxContext,
    pub store: &'a dyn DataStore,
    pub resolver: &'a PathResolver,
}

/// Handler function signature
pub type Handler = fn(&Scope<'_>, &Payload) -> Result<WorkResult>;

/// Handler bound to an operation
///
/// `IsSessionValid` has no handler: it is answered from the session lookup
/// alone.
pub fn handler(op: Operation) -> Option<Handler> {
    let handler: Handler = match op {
        Operation::IsSessionValid => return None,
        Operation::CanRead => can_read,
        Operation::GetObject => get_object,
        Operation::GetAllEnumerations => get_all_enumerations,
        Operation::GetRenderingSettings => get_rendering_settings,
        Operation::GetPixelsDescription | Operation::GetPixels => get_pixels_description,
        Operation::GetFilePath => get_file_path,
        Operation::GetOriginalFilePaths => get_original_file_paths,
        Operation::GetImportedImageFiles => get_imported_image_files,
    };
    Some(handler)
}

fn can_read(scope: &Scope<'_>, payload: &Payload) -> Result<WorkResult> {
    let kind = payload.str("type")?;
    let id = payload.i64("id")?;
    let found = scope.store.query().find(scope.tx, kind, id)?;
    Ok(WorkResult::Bool(found.is_some()))
}

fn get_object(scope: &Scope<'_>, payload: &Payload) -> Result<WorkResult> {
    let kind = payload.str("type")?;
    let id = payload.i64("id")?;
    Ok(WorkResult::Graph(scope.store.query().get(scope.tx, kind, id)?))
}

fn get_all_enumerations(scope: &Scope<'_>, payload: &Payload) -> Result<WorkResult> {
    let kind = payload.str("type")?;
    Ok(WorkResult::Graph(
        scope.store.pixels().get_all_enumerations(scope.tx, kind)?,
    ))
}

fn get_rendering_settings(scope: &Scope<'_>, payload: &Payload) -> Result<WorkResult> {
    let pixels_id = payload.i64("pixelsId")?;
    Ok(scope
        .store
        .pixels()
        .retrieve_rendering_settings(scope.tx, pixels_id)?
        .map(WorkResult::Graph)
        .unwrap_or(WorkResult::Empty))
}

/// Pixels description of an image's primary pixels, linked back to the image
fn get_pixels_description(scope: &Scope<'_>, payload: &Payload) -> Result<WorkResult> {
    let image_id = payload.i64("imageId")?;
    let image = scope
        .store
        .query()
        .find_image_with_pixels(scope.tx, image_id)?
        .ok_or_else(|| BackboneError::NotFound(format!("Image:{}", image_id)))?;

    let image_root = image
        .roots()
        .first()
        .copied()
        .ok_or_else(|| BackboneError::NotFound(format!("Image:{}", image_id)))?;
    let primary = image
        .referenced(image_root, "pixels")
        .first()
        .and_then(|id| image.node(*id))
        .map(|n| n.id)
        .ok_or_else(|| BackboneError::NotFound(format!("Pixels of Image:{}", image_id)))?;

    let mut pixels = scope
        .store
        .pixels()
        .retrieve_pixels_description(scope.tx, primary)?;
    let pixels_root = pixels
        .roots()
        .first()
        .copied()
        .ok_or_else(|| BackboneError::NotFound(format!("Pixels:{}", primary)))?;
    if let Some(image_root) = pixels.merge(image).first() {
        pixels.set_ref(pixels_root, "image", *image_root);
    }
    Ok(WorkResult::Graph(pixels))
}

fn get_file_path(scope: &Scope<'_>, payload: &Payload) -> Result<WorkResult> {
    let id = payload.i64("id")?;
    let lookup = match payload.str("type")? {
        "FileAnnotation" => FileLookup::FileAnnotation(id),
        _ => FileLookup::OriginalFile(id),
    };
    let resolved = scope.resolver.resolve(scope.tx, scope.store, lookup)?;
    Ok(WorkResult::Text(path_string(&resolved)?))
}

fn get_original_file_paths(scope: &Scope<'_>, payload: &Payload) -> Result<WorkResult> {
    let ids = payload.i64_array("originalFileIds")?;
    let mut paths = Vec::with_capacity(ids.len());
    for id in ids {
        let record = scope
            .store
            .query()
            .file_record(scope.tx, FileLookup::OriginalFile(id))?;
        let resolved = scope.resolver.resolve_record(scope.tx, scope.store, &record)?;
        paths.push(path_string(&resolved)?);
    }
    let root = scope.resolver.managed_root();
    Ok(WorkResult::Json(json!({
        "managedRepositoryRoot": root.to_str().ok_or_else(|| non_utf8(root))?,
        "paths": paths,
    })))
}

fn get_imported_image_files(scope: &Scope<'_>, payload: &Payload) -> Result<WorkResult> {
    let image_id = payload.i64("imageId")?;
    Ok(WorkResult::Graph(
        scope.store.query().find_fileset_files(scope.tx, image_id)?,
    ))
}

fn path_string(resolved: &ResolvedPath) -> Result<String> {
    let path = resolved.as_path();
    path.to_str()
        .map(str::to_string)
        .ok_or_else(|| non_utf8(path))
}

fn non_utf8(path: &std::path::Path) -> BackboneError {
    BackboneError::Store(format!("path is not valid UTF-8: {}", path.display()))
}
