use super::{success, EXIT_SUCCESS};
use skipper_engine::{EngineError, Orchestrator, StartOptions, StartOutcome};

pub fn run(orch: &Orchestrator<'_>, config: &str, opts: &StartOptions) -> Result<u8, EngineError> {
    match orch.start(config, opts)? {
        StartOutcome::AlreadyRunning => {
            println!("nothing to do, '{config}' is already running");
        }
        StartOutcome::StartedExisting => success(&format!("started existing container '{config}'")),
        StartOutcome::Started => success(&format!("started '{config}'")),
        StartOutcome::DryRun(cmd) => println!("{cmd}"),
    }
    Ok(EXIT_SUCCESS)
}
