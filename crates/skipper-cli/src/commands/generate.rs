use super::{success, EXIT_SUCCESS};
use clap::{Subcommand, ValueEnum};
use skipper_engine::artifacts;
use skipper_engine::{EngineError, Orchestrator};

#[derive(Debug, Subcommand)]
pub enum GenerateCommands {
    /// Write a compose setup (docker-compose.yaml, Dockerfile, config.yaml,
    /// .envrc) to the output directory. Run with 'source .envrc; docker
    /// compose up'.
    Compose {
        /// Instance name.
        config: String,
        /// Bake the configured environment into the image after build.
        #[arg(short = 'e', long, default_value_t = false)]
        bake_env: bool,
    },
    /// Print the merged configuration stream fed to the provisioning tool.
    RawYaml {
        /// Instance name.
        config: String,
    },
    /// Print engine run arguments derived from the configuration.
    Args {
        /// Instance name.
        config: String,
        #[arg(long = "type", value_enum, default_value_t = ArgKind::Args)]
        kind: ArgKind,
        /// Leave port publications out of the printed arguments.
        #[arg(long, default_value_t = false)]
        no_ports: bool,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ArgKind {
    /// The full run argument string.
    Args,
    Ports,
    Env,
    Labels,
    Volumes,
    Links,
    RunImage,
    BootCommand,
    BaseImage,
}

pub fn run(orch: &Orchestrator<'_>, command: GenerateCommands) -> Result<u8, EngineError> {
    match command {
        GenerateCommands::Compose { config, bake_env } => {
            let dir = orch.generate_artifacts(&config, bake_env)?;
            success(&format!("compose setup written to {}", dir.display()));
        }
        GenerateCommands::RawYaml { config } => {
            print!("{}", orch.raw_yaml(&config)?);
        }
        GenerateCommands::Args {
            config,
            kind,
            no_ports,
        } => {
            let composed = orch.compose_instance(&config)?;
            let out = match kind {
                ArgKind::Args => {
                    let mut args = Vec::new();
                    if !no_ports {
                        args.extend(artifacts::ports_args(&composed));
                    }
                    args.extend(artifacts::env_args(&composed));
                    args.extend(artifacts::labels_args(&composed));
                    args.extend(artifacts::volumes_args(&composed));
                    args.extend(artifacts::links_args(&composed));
                    artifacts::join_cli(&args)
                }
                ArgKind::Ports => artifacts::join_cli(&artifacts::ports_args(&composed)),
                ArgKind::Env => artifacts::join_cli(&artifacts::env_args(&composed)),
                ArgKind::Labels => artifacts::join_cli(&artifacts::labels_args(&composed)),
                ArgKind::Volumes => artifacts::join_cli(&artifacts::volumes_args(&composed)),
                ArgKind::Links => artifacts::join_cli(&artifacts::links_args(&composed)),
                ArgKind::RunImage => composed.run_image(),
                ArgKind::BootCommand => composed.boot_command(),
                ArgKind::BaseImage => composed.base_image().to_owned(),
            };
            println!("{out}");
        }
    }
    Ok(EXIT_SUCCESS)
}
