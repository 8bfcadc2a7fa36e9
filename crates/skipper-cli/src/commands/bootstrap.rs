use super::{success, EXIT_SUCCESS};
use skipper_engine::{EngineError, Orchestrator};

pub fn run(orch: &Orchestrator<'_>, config: &str) -> Result<u8, EngineError> {
    orch.bootstrap(config)?;
    success(&format!("bootstrapped '{config}'"));
    Ok(EXIT_SUCCESS)
}
