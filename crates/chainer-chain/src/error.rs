//! Error types for chain validation and execution.

use chainer_mcp::McpError;
use thiserror::Error;

/// Errors from validating or running a chain.
///
/// Per-step failures carry the step index (and tool where known) so the
/// upstream client can see exactly where a chain died; no step is retried.
#[derive(Debug, Error)]
pub enum ChainError {
    #[error("chain is empty")]
    EmptyChain,

    #[error("step {step}: toolArgs is not a valid JSON template: {message}")]
    InvalidTemplate { step: usize, message: String },

    #[error("step {step}: invalid JSONPath '{path}': {message}")]
    InvalidPath {
        step: usize,
        path: String,
        message: String,
    },

    #[error("step {step}: tool '{tool}' not found in registry")]
    ToolNotFound { step: usize, tool: String },

    #[error("step {step}: arguments failed to parse after substitution: {message}")]
    Substitution { step: usize, message: String },

    #[error("step {step}: tool '{tool}' returned an empty response")]
    EmptyResponse { step: usize, tool: String },

    #[error("chain aborted at step {step} ('{tool}'): {source}")]
    Aborted {
        step: usize,
        tool: String,
        #[source]
        source: McpError,
    },
}
