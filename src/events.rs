//! Notifications produced by a [`Stage`](crate::Stage) tick.

use crate::error::TextureError;
use crate::texture::{CleanupMode, CleanupReport, TextureId};
use crate::tree::NodeId;

/// A recoverable failure surfaced to the embedder.
#[derive(Debug, Clone, PartialEq)]
pub enum Diagnostic {
    /// A texture could not be loaded, uploaded or kept resident
    Texture {
        texture: TextureId,
        error: TextureError,
    },
    /// A render-to-texture node's target could not be allocated; its subtree
    /// was skipped for the frame
    RenderTarget { node: NodeId, error: TextureError },
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Diagnostic::Texture { texture, error } => write!(f, "texture {texture:?}: {error}"),
            Diagnostic::RenderTarget { node, error } => write!(f, "node {node:?}: {error}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum StageEvent {
    /// A frame ran with no pending work; the loop may sleep
    Idle,
    /// Work arrived after an idle period
    Active,
    /// Frames rendered per second over the last reporting interval
    FpsUpdate { fps: f32 },
    /// A cleanup pass freed texture memory
    TexturesEvicted {
        mode: CleanupMode,
        report: CleanupReport,
    },
    Diagnostic(Diagnostic),
}

impl From<Diagnostic> for StageEvent {
    fn from(diagnostic: Diagnostic) -> Self {
        StageEvent::Diagnostic(diagnostic)
    }
}
