//! Container state probes. No state is ever persisted; existence and
//! liveness are derived from the engine's `ps` output on demand.

use crate::command;
use crate::runner::ProcessRunner;
use crate::EngineError;

/// True when a container with this name exists, running or not.
pub fn container_exists(
    runner: &dyn ProcessRunner,
    engine: &str,
    name: &str,
) -> Result<bool, EngineError> {
    let out = runner.capture(&command::exists_probe(engine, name))?;
    Ok(!out.trim().is_empty())
}

/// True when a container with this name is currently running.
pub fn container_running(
    runner: &dyn ProcessRunner,
    engine: &str,
    name: &str,
) -> Result<bool, EngineError> {
    let out = runner.capture(&command::running_probe(engine, name))?;
    Ok(!out.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::RecordingRunner;

    #[test]
    fn empty_output_means_absent() {
        let runner = RecordingRunner::new();
        assert!(!container_exists(&runner, "docker", "app").unwrap());
        assert!(!container_running(&runner, "docker", "app").unwrap());
    }

    #[test]
    fn container_id_output_means_present() {
        let runner = RecordingRunner::new();
        runner.respond("exists probe", "a1b2c3\n");
        runner.respond("running probe", "\n");
        assert!(container_exists(&runner, "docker", "app").unwrap());
        assert!(!container_running(&runner, "docker", "app").unwrap());
    }
}
