use thiserror::Error;

/// The global allocator could not provide memory for a payload or its control block.
///
/// This is the only failure a [`Shared`](crate::Shared) constructor can report. When it is
/// returned, no handle exists and the payload that was passed in has been dropped.
///
/// Please note that the global allocator on some systems may instead abort the process if an
/// allocation failure happens.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Error)]
#[error("memory allocation failed")]
pub struct AllocError;
