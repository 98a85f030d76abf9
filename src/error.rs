//! Engine error types

use crate::backend::BackendError;
use thiserror::Error;

/// Errors surfaced by scene, asset and render operations
///
/// Resolution failures (missing textures, unknown GUIDs) never show up here;
/// they fall back to built-in resources and are only logged.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Image decode error: {0}")]
    Image(#[from] image::ImageError),
    #[error("glTF error: {0}")]
    Gltf(#[from] gltf::Error),
    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),
    #[error("Unknown component type: {0}")]
    UnknownComponent(String),
    #[error("Invalid scene: {0}")]
    InvalidScene(String),
    #[error("Hierarchy error: {0}")]
    Hierarchy(#[from] HierarchyError),
    #[error("Asset not found: {0}")]
    AssetNotFound(String),
}

pub type EngineResult<T> = Result<T, EngineError>;

/// Rejected reparenting operations
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum HierarchyError {
    #[error("an object cannot be its own parent")]
    SelfParent,
    #[error("reparenting would create a cycle")]
    Cycle,
    #[error("object is not managed by this scene")]
    MissingObject,
}
