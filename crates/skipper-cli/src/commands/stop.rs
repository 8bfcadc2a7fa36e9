use super::{notice, success, EXIT_SUCCESS};
use skipper_engine::{EngineError, Orchestrator, StopOutcome};

pub fn run(orch: &Orchestrator<'_>, config: &str) -> Result<u8, EngineError> {
    match orch.stop(config)? {
        StopOutcome::Absent => notice(&format!("'{config}' was not found")),
        StopOutcome::Stopped => success(&format!("stopped '{config}'")),
    }
    Ok(EXIT_SUCCESS)
}
