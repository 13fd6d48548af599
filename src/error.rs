//! Error types.
//!
//! Map operations never fail: a missing key is a `None`, a `false` or a
//! default value. Errors only come from the scheduler context, either when
//! its thread cannot be started or when a request reaches a context that
//! has already shut down.

/// Result type for fallible `lungo` operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by the scheduler context.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// The dedicated scheduler thread could not be spawned.
    #[error("failed to spawn scheduler thread '{name}': {source}")]
    Spawn {
        name: String,
        #[source]
        source: std::io::Error,
    },

    /// The scheduler context has shut down and no longer accepts requests.
    #[error("scheduler context has shut down")]
    SchedulerClosed,
}
