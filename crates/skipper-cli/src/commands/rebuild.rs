use super::{success, EXIT_SUCCESS};
use skipper_engine::{EngineError, Orchestrator};

pub fn run(orch: &Orchestrator<'_>, config: &str, full_build: bool) -> Result<u8, EngineError> {
    orch.rebuild(config, full_build)?;
    success(&format!("rebuilt '{config}'"));
    Ok(EXIT_SUCCESS)
}
