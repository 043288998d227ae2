//! Pipeline setup errors.

use assetflow_graph::GraphError;
use thiserror::Error;

use crate::render::RenderError;

/// Errors raised while wiring tasks and plans at startup.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Task registration or lookup failed.
    #[error(transparent)]
    Graph(#[from] GraphError),

    /// The configured template engine is not available.
    #[error(transparent)]
    Render(#[from] RenderError),
}

/// Result type for pipeline setup.
pub type Result<T> = std::result::Result<T, PipelineError>;
