use super::{notice, success, EXIT_SUCCESS};
use skipper_engine::{DestroyOutcome, EngineError, Orchestrator};

pub fn run(orch: &Orchestrator<'_>, config: &str) -> Result<u8, EngineError> {
    match orch.destroy(config)? {
        DestroyOutcome::Absent => notice(&format!("'{config}' was not found")),
        DestroyOutcome::Destroyed => success(&format!("destroyed '{config}'")),
    }
    Ok(EXIT_SUCCESS)
}
