//! Error taxonomy for the scene graph and texture subsystem.

use thiserror::Error;

use crate::tree::NodeId;

/// A tree mutation was rejected; the hierarchy is left untouched.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StructuralError {
    #[error("reparenting {node:?} under {new_parent:?} would create a cycle")]
    Cycle { node: NodeId, new_parent: NodeId },

    #[error("node {0:?} cannot be its own parent")]
    SelfParent(NodeId),

    #[error("the root node cannot be reparented")]
    RootCannotBeReparented,

    #[error("the root node cannot be destroyed")]
    RootCannotBeDestroyed,

    #[error("node {0:?} does not exist or was destroyed")]
    UnknownNode(NodeId),
}

/// Why a texture is not renderable.
///
/// These never abort a frame: they are stored on the resource and surfaced
/// as diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TextureError {
    #[error("texture load failed: {0}")]
    LoadFailed(String),

    #[error("memory pressure: need {requested} bytes, {used} of {critical} bytes in use")]
    MemoryPressure {
        requested: u64,
        used: u64,
        critical: u64,
    },

    #[error("render target {width}x{height} could not be allocated: {reason}")]
    RenderTargetAllocation {
        width: u32,
        height: u32,
        reason: String,
    },

    #[error("texture upload failed: {0}")]
    UploadFailed(String),

    #[error("texture does not exist or was removed")]
    UnknownTexture,
}

impl TextureError {
    /// Memory-pressure failures may succeed on a later attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TextureError::MemoryPressure { .. } | TextureError::RenderTargetAllocation { .. }
        )
    }
}
