use super::{success, EXIT_SUCCESS};
use skipper_engine::{EngineError, Orchestrator};

pub fn run(orch: &Orchestrator<'_>, config: &str, bake_env: bool) -> Result<u8, EngineError> {
    orch.build(config, bake_env)?;
    success(&format!("built image for '{config}'"));
    Ok(EXIT_SUCCESS)
}
