//! Error types for the build-and-run pipeline.
//!
//! The taxonomy separates infrastructure trouble (retryable: the caller's
//! queuing layer should run the whole invocation again later) from failures
//! tied to this specific run. A failing user build is not an error at all; it
//! comes back as an ordinary result with a sentinel status code.

use thiserror::Error;

/// Errors surfaced by the container build-and-run pipeline.
#[derive(Debug, Error)]
pub enum RunnerError {
    /// The container runtime could not be reached.
    #[error("could not connect to the container runtime: {0}")]
    ConnectionFailed(String),

    /// The image to run from has gone missing between build and create.
    #[error("image '{0}' not found")]
    ImageNotFound(String),

    /// Another container already holds the requested name. Concurrent runs
    /// are rejected, never merged.
    #[error("container name '{0}' is already in use")]
    NameConflict(String),

    /// An image build operation failed outright.
    #[error("image build failed: {0}")]
    BuildFailed(String),

    /// A caller-supplied event callback returned an error mid-run. The
    /// container has been killed.
    #[error("run aborted: {0}")]
    Aborted(anyhow::Error),

    /// Any other container runtime API error.
    #[error("container runtime API error: {0}")]
    Api(#[from] bollard::errors::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl RunnerError {
    /// Whether the caller should requeue the whole run and try again later.
    /// True only for transient infrastructure trouble, never for anything the
    /// scraper code itself caused.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RunnerError::ConnectionFailed(_) | RunnerError::ImageNotFound(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn infrastructure_errors_are_retryable() {
        assert!(RunnerError::ConnectionFailed("refused".to_string()).is_retryable());
        assert!(RunnerError::ImageNotFound("sha256:abc".to_string()).is_retryable());
    }

    #[test]
    fn run_specific_errors_are_not_retryable() {
        assert!(!RunnerError::NameConflict("scraper-1".to_string()).is_retryable());
        assert!(!RunnerError::BuildFailed("nonzero exit".to_string()).is_retryable());
        assert!(!RunnerError::Aborted(anyhow::anyhow!("caller stop")).is_retryable());
        let io = RunnerError::Io(std::io::Error::new(std::io::ErrorKind::Other, "disk"));
        assert!(!io.is_retryable());
    }

    #[test]
    fn display_names_the_container() {
        let e = RunnerError::NameConflict("scraper-7".to_string());
        assert_eq!(e.to_string(), "container name 'scraper-7' is already in use");
    }
}
