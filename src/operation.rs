//! The operation table
//!
//! Every operation the broker answers is a variant of [`Operation`]. Subjects
//! follow the `omero.<operation>` convention used by existing gateways; an
//! unknown subject never reaches a handler.

use crate::error::BackboneError;
use std::fmt;
use std::str::FromStr;

/// A brokered operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    IsSessionValid,
    CanRead,
    GetObject,
    GetAllEnumerations,
    GetRenderingSettings,
    GetPixelsDescription,
    GetPixels,
    GetFilePath,
    GetOriginalFilePaths,
    GetImportedImageFiles,
}

impl Operation {
    /// All operations, in registration order
    pub const ALL: [Operation; 10] = [
        Operation::IsSessionValid,
        Operation::CanRead,
        Operation::GetObject,
        Operation::GetAllEnumerations,
        Operation::GetRenderingSettings,
        Operation::GetPixelsDescription,
        Operation::GetPixels,
        Operation::GetFilePath,
        Operation::GetOriginalFilePaths,
        Operation::GetImportedImageFiles,
    ];

    /// Bus subject this operation is addressed by
    pub fn subject(&self) -> &'static str {
        match self {
            Operation::IsSessionValid => "omero.is_session_valid",
            Operation::CanRead => "omero.can_read",
            Operation::GetObject => "omero.get_object",
            Operation::GetAllEnumerations => "omero.get_all_enumerations",
            Operation::GetRenderingSettings => "omero.get_rendering_settings",
            Operation::GetPixelsDescription => "omero.get_pixels_description",
            Operation::GetPixels => "omero.get_pixels",
            Operation::GetFilePath => "omero.get_file_path",
            Operation::GetOriginalFilePaths => "omero.get_original_file_paths",
            Operation::GetImportedImageFiles => "omero.get_imported_image_files",
        }
    }

    /// Short name used in logs and unit-of-work diagnostics
    pub fn name(&self) -> &'static str {
        match self {
            Operation::IsSessionValid => "isSessionValid",
            Operation::CanRead => "canRead",
            Operation::GetObject => "getObject",
            Operation::GetAllEnumerations => "getAllEnumerations",
            Operation::GetRenderingSettings => "getRenderingSettings",
            Operation::GetPixelsDescription => "getPixelsDescription",
            Operation::GetPixels => "getPixels",
            Operation::GetFilePath => "getFilePath",
            Operation::GetOriginalFilePaths => "getOriginalFilePaths",
            Operation::GetImportedImageFiles => "getImportedImageFiles",
        }
    }

    /// Whether the operation answers with a bare boolean
    pub fn replies_bool(&self) -> bool {
        matches!(self, Operation::IsSessionValid | Operation::CanRead)
    }
}

impl FromStr for Operation {
    type Err = BackboneError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Operation::ALL
            .iter()
            .copied()
            .find(|op| op.subject() == s)
            .ok_or_else(|| BackboneError::UnsupportedOperation(s.to_string()))
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.subject())
    }
}
