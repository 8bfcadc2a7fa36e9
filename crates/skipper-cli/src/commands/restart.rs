use super::{success, EXIT_SUCCESS};
use skipper_engine::{EngineError, Orchestrator, StartOptions};

pub fn run(orch: &Orchestrator<'_>, config: &str, opts: &StartOptions) -> Result<u8, EngineError> {
    orch.restart(config, opts)?;
    success(&format!("restarted '{config}'"));
    Ok(EXIT_SUCCESS)
}
