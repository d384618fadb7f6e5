use thiserror::Error;

use crate::Table;

/// Errors raised by the engine itself.
///
/// Most of them travel as rejection reasons (wrapped in [`crate::Value::Error`]);
/// `AwaitOutsideTask` is returned straight to the caller since it is misuse.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Error {
    #[error("Chaining cycle detected for promise")]
    Cycle,
    #[error("await is only valid inside an async function")]
    AwaitOutsideTask,
    #[error("async function suspended on a future the engine does not drive")]
    ForeignAwait,
    #[error("async function awaited more than one value at once")]
    ConcurrentAwait,
    #[error("all promises were rejected")]
    Aggregate(Table),
    #[error("fetch {url} failed: {reason}")]
    Fetch { url: String, reason: String },
    #[error("failed to load image {url}")]
    ImageLoad { url: String },
}
