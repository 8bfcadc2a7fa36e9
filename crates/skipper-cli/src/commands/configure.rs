use super::{success, EXIT_SUCCESS};
use skipper_engine::{EngineError, Orchestrator};

pub fn run(orch: &Orchestrator<'_>, config: &str) -> Result<u8, EngineError> {
    orch.configure(config)?;
    success(&format!("configured image for '{config}'"));
    Ok(EXIT_SUCCESS)
}
