//! Error taxonomy and the recoverable failure signal.
//!
//! The engine distinguishes three classes of errors:
//! - [`BuildError::Failure`]: an intentional, recoverable abort raised by
//!   build logic via [`fail`] / [`fail_with`]. Call sites that have a
//!   fallback catch it with [`with_fallback`] or [`with_fallback_async`];
//!   everything else lets it propagate.
//! - Configuration errors (`NoRule`, `DuplicateOption`, ...): bugs in the
//!   build description, surfaced immediately and never retried.
//! - `Other`: arbitrary defects from user build actions, wrapped in
//!   [`anyhow::Error`] and propagated unchanged.

use std::future::Future;

use thiserror::Error;

/// Result alias used throughout the crate.
pub type BuildResult<T> = Result<T, BuildError>;

/// Error raised while configuring or running a build.
#[derive(Debug, Error)]
pub enum BuildError {
    /// The distinguished recoverable abort. Only [`with_fallback`]-style
    /// call sites are sanctioned to catch it.
    #[error("build failure: {}", message.as_deref().unwrap_or("unspecified"))]
    Failure {
        /// Optional reason, logged when the failure was raised.
        message: Option<String>,
    },

    /// A name was requested that has no registered target and no matching
    /// filesystem artifact.
    #[error("no rule to make target `{0}` and no such file exists")]
    NoRule(String),

    /// An option name was registered twice.
    #[error("option `{0}` is already registered")]
    DuplicateOption(String),

    /// A `-D` define referenced an option nobody registered.
    #[error("unknown option `{0}`")]
    UnknownOption(String),

    /// A lazy dependency producer was drained a second time without
    /// memoization.
    #[error("lazy dependency producer was already consumed")]
    LazyDepsConsumed,

    /// Arbitrary error from user build logic or the surrounding I/O.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl BuildError {
    /// Whether this is the recoverable failure signal.
    pub fn is_failure(&self) -> bool {
        matches!(self, BuildError::Failure { .. })
    }
}

impl From<std::io::Error> for BuildError {
    fn from(err: std::io::Error) -> Self {
        BuildError::Other(err.into())
    }
}

/// Raise the recoverable failure signal without a message.
pub fn fail<T>() -> BuildResult<T> {
    Err(BuildError::Failure { message: None })
}

/// Raise the recoverable failure signal with a message, logging it.
pub fn fail_with<T>(message: impl Into<String>) -> BuildResult<T> {
    let message = message.into();
    tracing::error!("{message}");
    Err(BuildError::Failure {
        message: Some(message),
    })
}

/// Run `trial`; if it raises the failure signal, evaluate `fallback` and
/// return its result instead. Any other error propagates unchanged.
pub fn with_fallback<T, F, G>(trial: F, fallback: G) -> BuildResult<T>
where
    F: FnOnce() -> BuildResult<T>,
    G: FnOnce() -> BuildResult<T>,
{
    match trial() {
        Err(BuildError::Failure { .. }) => fallback(),
        other => other,
    }
}

/// Asynchronous counterpart of [`with_fallback`].
pub async fn with_fallback_async<T, Fut, G, GFut>(trial: Fut, fallback: G) -> BuildResult<T>
where
    Fut: Future<Output = BuildResult<T>>,
    G: FnOnce() -> GFut,
    GFut: Future<Output = BuildResult<T>>,
{
    match trial.await {
        Err(BuildError::Failure { .. }) => fallback().await,
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    #[test]
    fn test_fail_is_failure() {
        let err = fail::<()>().unwrap_err();
        assert!(err.is_failure());

        let err = fail_with::<()>("broken").unwrap_err();
        assert!(err.is_failure());
        assert_eq!(err.to_string(), "build failure: broken");
    }

    #[test]
    fn test_other_is_not_failure() {
        let err = BuildError::Other(anyhow!("boom"));
        assert!(!err.is_failure());
    }

    #[test]
    fn test_with_fallback_substitutes_failure() {
        let result = with_fallback(|| fail::<i32>(), || Ok(42));
        assert_eq!(result.unwrap(), 42);
    }

    #[test]
    fn test_with_fallback_passes_success_through() {
        let result = with_fallback(|| Ok(7), || Ok(42));
        assert_eq!(result.unwrap(), 7);
    }

    #[test]
    fn test_with_fallback_propagates_defects() {
        let result = with_fallback(|| Err::<i32, _>(anyhow!("defect").into()), || Ok(42));
        assert!(matches!(result, Err(BuildError::Other(_))));
    }

    #[tokio::test]
    async fn test_with_fallback_async() {
        let result = with_fallback_async(async { fail::<i32>() }, || async { Ok(1) }).await;
        assert_eq!(result.unwrap(), 1);

        let result = with_fallback_async(async { Ok(2) }, || async { Ok(1) }).await;
        assert_eq!(result.unwrap(), 2);
    }
}
