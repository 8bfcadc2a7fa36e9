//! Lifecycle engine for Skipper.
//!
//! Turns a composed configuration into build/run artifacts and a safe,
//! repeatable sequence of container-engine invocations. External commands run
//! strictly sequentially through an explicit [`ProcessRunner`] capability;
//! one shared [`CancelToken`] propagates an operating-system interrupt to the
//! in-flight command's whole process group.

pub mod artifacts;
pub mod cancel;
pub mod command;
pub mod orchestrator;
pub mod probes;
pub mod runner;

pub use cancel::{install_signal_handler, CancelToken};
pub use command::{CommandBuilder, RunOptions, DEFAULT_ENGINE};
pub use orchestrator::{
    DestroyOutcome, Orchestrator, Settings, StartOptions, StartOutcome, StopOutcome,
};
pub use runner::{CommandSpec, HostRunner, ProcessRunner, RecordingRunner, StdinSource};

use std::path::PathBuf;
use thiserror::Error;

/// Reserved exit code meaning "retry the whole operation"; always propagated
/// verbatim, never treated as an ordinary failure.
pub const RETRY_EXIT_CODE: i32 = 77;

/// Provisioning-tool tag selections for the three provisioning contexts.
pub const BUILD_SKIP_TAGS: &str = "--skip-tags=precompile,migrate,db";
pub const MIGRATE_TAGS: &str = "--tags=db,migrate";
pub const CONFIGURE_TAGS: &str = "--tags=db,precompile";

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Config(#[from] skipper_config::ConfigError),
    #[error("output directory {0} already exists (pass --parent-dirs to reuse it)")]
    DirectoryCollision(PathBuf),
    #[error("failed to launch step '{step}': {source}")]
    Spawn {
        step: String,
        source: std::io::Error,
    },
    #[error("step '{step}' failed with exit code {code}")]
    ExternalCommand { step: String, code: i32 },
    #[error("step '{step}' requested a retry of the whole operation")]
    RetryRequested { step: String },
    #[error("operation cancelled during step '{step}'")]
    Cancelled { step: String },
    #[error("step '{step}' did not finish within {seconds}s")]
    Timeout { step: String, seconds: u64 },
    #[error("failed to render {artifact}: {source}")]
    Render {
        artifact: &'static str,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl EngineError {
    /// Process exit code for this error: the retry sentinel passes through
    /// verbatim, configuration problems get their own code, everything else
    /// is a generic failure.
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::RetryRequested { .. } => 77,
            Self::Config(_) => 2,
            _ => 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_exit_code_passes_through() {
        let err = EngineError::RetryRequested {
            step: "build".to_owned(),
        };
        assert_eq!(err.exit_code(), 77);
    }

    #[test]
    fn config_errors_have_their_own_code() {
        let err = EngineError::Config(skipper_config::ConfigError::InstanceNotFound(
            "app".to_owned(),
        ));
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn external_failures_are_generic() {
        let err = EngineError::ExternalCommand {
            step: "migrate run".to_owned(),
            code: 3,
        };
        assert_eq!(err.exit_code(), 1);
        assert!(err.to_string().contains("migrate run"));
    }
}
