//! Domain-specific error types.
//!
//! Uses `thiserror` for structured error definitions; the driver and CLI wrap
//! these in `anyhow` at the boundary.

use thiserror::Error;

/// Errors from loading and validating front-end IR.
#[derive(Debug, Error)]
pub enum IrError {
    #[error("invalid IR document: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("empty IR document")]
    EmptyDocument,

    #[error("function `{function}`: entry node {entry} does not exist")]
    MissingEntry { function: String, entry: usize },

    #[error("function `{function}`: node {node} links to unknown node {target}")]
    DanglingEdge {
        function: String,
        node: usize,
        target: usize,
    },

    #[error("function `{function}`: node {node} is stored at index {index}")]
    MisnumberedNode {
        function: String,
        node: usize,
        index: usize,
    },

    #[error("function `{function}`: {kind} node {node} needs two successors, has {found}")]
    MalformedBranch {
        function: String,
        kind: &'static str,
        node: usize,
        found: usize,
    },

    #[error("function `{0}`: body needs either `nodes` or `statements`")]
    MissingBody(String),

    #[error("contract `{0}` not found")]
    ContractNotFound(String),

    #[error("function `{function}` not found in contract `{contract}`")]
    FunctionNotFound { contract: String, function: String },
}

/// Errors from the term compiler. Never fatal: the engine falls back to a
/// fresh unconstrained term.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CompileError {
    #[error("temporary TMP_{0} used before it was defined")]
    UndefinedTemporary(u32),

    #[error("operation list has no CONDITION marker")]
    MissingCondition,

    #[error("unsupported expression `{0}`")]
    UnsupportedExpression(String),

    #[error("literal `{0}` does not fit the arithmetic theory")]
    UnrepresentableLiteral(String),
}

/// Errors that abort the analysis of one function.
#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("exploration timeout after {0}s")]
    Timeout(u64),

    #[error("path limit exceeded ({0} paths, max {1})")]
    PathLimitExceeded(usize, usize),

    #[error("analysis panicked: {0}")]
    Panicked(String),
}

/// Maximum number of explored paths per function before aborting.
pub const MAX_PATH_COUNT: usize = 10_000;
/// Default wall-clock budget for one function, in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 60;
/// Per-query solver timeout, in milliseconds.
pub const DEFAULT_SOLVER_TIMEOUT_MS: u32 = 5_000;
