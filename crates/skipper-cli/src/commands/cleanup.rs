use super::{success, EXIT_SUCCESS};
use dialoguer::Confirm;
use skipper_engine::{EngineError, Orchestrator};
use std::path::Path;

pub fn run(orch: &Orchestrator<'_>, data_dir: &Path) -> Result<u8, EngineError> {
    let legacy = data_dir.join("postgres_data_old");
    orch.cleanup(Some(&legacy), |dir| {
        Confirm::new()
            .with_prompt(format!(
                "remove old database data directory {}?",
                dir.display()
            ))
            .default(false)
            .interact()
            .unwrap_or(false)
    })?;
    success("cleanup complete");
    Ok(EXIT_SUCCESS)
}
