use super::{success, EXIT_SUCCESS};
use skipper_engine::{EngineError, Orchestrator};

pub fn run(orch: &Orchestrator<'_>, config: &str) -> Result<u8, EngineError> {
    orch.clean(config)?;
    success(&format!("removed artifacts for '{config}'"));
    Ok(EXIT_SUCCESS)
}
