use super::EXIT_SUCCESS;
use clap::CommandFactory;
use clap_complete::Shell;
use skipper_engine::EngineError;

#[allow(clippy::unnecessary_wraps)]
pub fn run<C: CommandFactory>(shell: Shell) -> Result<u8, EngineError> {
    clap_complete::generate(shell, &mut C::command(), "skipper", &mut std::io::stdout());
    Ok(EXIT_SUCCESS)
}
