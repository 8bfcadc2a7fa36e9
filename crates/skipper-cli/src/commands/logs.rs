use super::EXIT_SUCCESS;
use skipper_engine::{EngineError, Orchestrator};

pub fn run(orch: &Orchestrator<'_>, config: &str) -> Result<u8, EngineError> {
    let output = orch.logs(config)?;
    println!("{output}");
    Ok(EXIT_SUCCESS)
}
