//! Error types for topology discovery and CPU selection.

use thiserror::Error;

use crate::select::SharingPolicy;

/// Errors reported by topology discovery, CPU selection and cpulist parsing.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// The caller asked for something that can never succeed, such as zero CPUs.
    #[error("invalid request: {reason}")]
    InvalidRequest {
        /// Human-readable description of what was wrong with the request.
        reason: String,
    },

    /// The topology cannot provide the requested number of CPUs under the policy.
    #[error("cannot select {requested} CPUs under {policy}: topology allows at most {available}")]
    InsufficientTopology {
        /// Number of CPUs the caller asked for.
        requested: usize,
        /// Most CPUs the policy admits on this topology.
        available: usize,
        /// Policy the selection ran under.
        policy: SharingPolicy,
    },

    /// The hardware topology source was unreadable or internally inconsistent.
    #[error("topology discovery failed: {reason}")]
    DiscoveryFailure {
        /// What went wrong while reading or validating the topology.
        reason: String,
        /// Underlying I/O error, if the source could not be read at all.
        #[source]
        source: Option<std::io::Error>,
    },

    /// A cpulist string (e.g. `0-3,8`) did not match the expected format.
    #[error("invalid cpulist: '{value}': {problem}")]
    InvalidCpuList {
        /// The offending cpulist, or the part of it that failed.
        value: String,
        /// What is wrong with it.
        problem: String,
    },
}

impl Error {
    pub(crate) fn discovery(reason: impl Into<String>) -> Self {
        Self::DiscoveryFailure {
            reason: reason.into(),
            source: None,
        }
    }

    pub(crate) fn discovery_io(reason: impl Into<String>, source: std::io::Error) -> Self {
        Self::DiscoveryFailure {
            reason: reason.into(),
            source: Some(source),
        }
    }

    pub(crate) fn invalid_cpulist(value: &str, problem: impl Into<String>) -> Self {
        Self::InvalidCpuList {
            value: value.to_string(),
            problem: problem.into(),
        }
    }
}

/// A specialized `Result` type returning the crate's [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_send_sync<T: Send + Sync + 'static>() {}

    #[test]
    fn test_error_is_send_sync() {
        assert_send_sync::<Error>();
    }

    #[test]
    fn test_insufficient_topology_message() {
        let err = Error::InsufficientTopology {
            requested: 3,
            available: 2,
            policy: SharingPolicy::ShareNone,
        };
        let msg = err.to_string();
        assert!(msg.contains("3 CPUs"));
        assert!(msg.contains("ShareNone"));
        assert!(msg.contains("at most 2"));
    }

    #[test]
    fn test_discovery_failure_keeps_source() {
        use std::error::Error as _;

        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "no such file");
        let err = Error::discovery_io("cannot read /proc/cpuinfo", io);
        assert!(err.source().is_some());
        assert!(Error::discovery("empty").source().is_none());
    }
}
