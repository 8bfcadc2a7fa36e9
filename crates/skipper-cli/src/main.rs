mod commands;

use clap::{Parser, Subcommand};
use clap_complete::Shell;
use commands::generate::GenerateCommands;
use commands::{EXIT_CONFIG_ERROR, EXIT_FAILURE, EXIT_RETRY};
use skipper_engine::{
    install_signal_handler, CancelToken, EngineError, HostRunner, Orchestrator, Settings,
    StartOptions, DEFAULT_ENGINE,
};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "skipper",
    version,
    about = "Launcher for containerized application instances built from layered YAML templates"
)]
struct Cli {
    /// Directory of per-instance configuration files.
    #[arg(short, long, default_value = "./containers", global = true)]
    conf_dir: PathBuf,

    /// Directory template references are resolved against.
    #[arg(short, long, default_value = ".", global = true)]
    templates_dir: PathBuf,

    /// Parent directory for generated build artifacts.
    #[arg(short, long, default_value = "./tmp", global = true)]
    output_dir: PathBuf,

    /// Reuse an existing artifact directory instead of failing.
    #[arg(short = 'p', long = "parent-dirs", default_value_t = false, global = true)]
    parent_dirs: bool,

    /// Container engine binary.
    #[arg(long, default_value = DEFAULT_ENGINE, global = true)]
    engine: String,

    #[arg(long, hide = true, global = true)]
    container_id: Option<String>,

    /// Enable verbose (debug) logging output.
    #[arg(short, long, default_value_t = false, global = true)]
    verbose: bool,

    /// Enable trace-level logging (more detailed than --verbose).
    #[arg(long, default_value_t = false, global = true)]
    trace: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Build an instance image from its composed configuration.
    Build {
        /// Instance name.
        config: String,
        /// Bake the configured environment into the image after build.
        #[arg(short = 'e', long, default_value_t = false)]
        bake_env: bool,
    },
    /// Run database migrations in a disposable container.
    Migrate {
        /// Instance name.
        config: String,
    },
    /// Run the configure provisioning pass and commit the result.
    Configure {
        /// Instance name.
        config: String,
    },
    /// Build, migrate, and configure in one pass.
    Bootstrap {
        /// Instance name.
        config: String,
    },
    /// Start the instance container, reusing a stopped one when present.
    Start {
        /// Instance name.
        config: String,
        /// Attached run without a restart policy.
        #[arg(long, default_value_t = false)]
        supervised: bool,
        /// Print the start command without executing it.
        #[arg(short = 'n', long, default_value_t = false)]
        dry_run: bool,
        /// Override the image used for running the container.
        #[arg(long)]
        run_image: Option<String>,
        /// Extra arguments to pass to the engine run command.
        #[arg(long)]
        docker_args: Option<String>,
    },
    /// Stop the instance container gracefully.
    Stop {
        /// Instance name.
        config: String,
    },
    /// Stop then start the instance container.
    Restart {
        /// Instance name.
        config: String,
        /// Override the image used for running the container.
        #[arg(long)]
        run_image: Option<String>,
        /// Extra arguments to pass to the engine run command.
        #[arg(long)]
        docker_args: Option<String>,
    },
    /// Stop and remove the instance container.
    Destroy {
        /// Instance name.
        config: String,
    },
    /// Open a login shell inside the running container.
    Enter {
        /// Instance name.
        config: String,
    },
    /// Print the container's logs.
    Logs {
        /// Instance name.
        config: String,
    },
    /// Rebuild the image and replace the running container.
    Rebuild {
        /// Instance name.
        config: String,
        /// Provision even when the config defers migration or precompilation
        /// to boot time.
        #[arg(long, default_value_t = false)]
        full_build: bool,
    },
    /// Prune stopped containers and old images, offer legacy data removal.
    Cleanup {
        /// Data directory checked for a legacy database directory.
        #[arg(long, default_value = "./shared/standalone")]
        data_dir: PathBuf,
    },
    /// Remove an instance's generated artifact directory.
    Clean {
        /// Instance name.
        config: String,
    },
    /// Generate artifacts without touching the engine.
    Generate {
        #[command(subcommand)]
        command: GenerateCommands,
    },
    /// Generate shell completions for bash, zsh, fish, elvish, or powershell.
    Completions {
        /// Shell to generate completions for.
        shell: Shell,
    },
}

fn main() -> ExitCode {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let msg = info.to_string();
        if msg.contains("Broken pipe")
            || msg.contains("broken pipe")
            || msg.contains("os error 32")
            || msg.contains("failed printing to stdout")
        {
            std::process::exit(0);
        }
        default_hook(info);
    }));

    let cli = Cli::parse();

    let default_level = if cli.trace {
        "trace"
    } else if cli.verbose {
        "debug"
    } else {
        "warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("SKIPPER_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_target(false)
        .without_time()
        .init();

    let cancel = CancelToken::new();
    install_signal_handler(&cancel);

    let settings = Settings {
        conf_dir: cli.conf_dir,
        templates_dir: cli.templates_dir,
        output_dir: cli.output_dir,
        engine: cli.engine,
        reuse_output_dir: cli.parent_dirs,
        helper_name: cli.container_id,
    };
    let runner = HostRunner::new(cancel.clone());
    let orch = Orchestrator::new(settings, &runner, cancel);

    let result = match cli.command {
        Commands::Build { config, bake_env } => commands::build::run(&orch, &config, bake_env),
        Commands::Migrate { config } => commands::migrate::run(&orch, &config),
        Commands::Configure { config } => commands::configure::run(&orch, &config),
        Commands::Bootstrap { config } => commands::bootstrap::run(&orch, &config),
        Commands::Start {
            config,
            supervised,
            dry_run,
            run_image,
            docker_args,
        } => commands::start::run(
            &orch,
            &config,
            &StartOptions {
                supervised,
                dry_run,
                run_image,
                docker_args: split_args(docker_args.as_deref()),
            },
        ),
        Commands::Stop { config } => commands::stop::run(&orch, &config),
        Commands::Restart {
            config,
            run_image,
            docker_args,
        } => commands::restart::run(
            &orch,
            &config,
            &StartOptions {
                run_image,
                docker_args: split_args(docker_args.as_deref()),
                ..StartOptions::default()
            },
        ),
        Commands::Destroy { config } => commands::destroy::run(&orch, &config),
        Commands::Enter { config } => commands::enter::run(&orch, &config),
        Commands::Logs { config } => commands::logs::run(&orch, &config),
        Commands::Rebuild { config, full_build } => {
            commands::rebuild::run(&orch, &config, full_build)
        }
        Commands::Cleanup { data_dir } => commands::cleanup::run(&orch, &data_dir),
        Commands::Clean { config } => commands::clean::run(&orch, &config),
        Commands::Generate { command } => commands::generate::run(&orch, command),
        Commands::Completions { shell } => commands::completions::run::<Cli>(shell),
    };

    match result {
        Ok(code) => ExitCode::from(code),
        Err(err) => {
            eprintln!("error: {err}");
            if matches!(err, EngineError::ExternalCommand { .. }) {
                eprintln!("** FAILED **");
                eprintln!("please scroll up and look for earlier error messages, there may be more than one");
            }
            let code = match err {
                EngineError::RetryRequested { .. } => EXIT_RETRY,
                EngineError::Config(_) => EXIT_CONFIG_ERROR,
                _ => EXIT_FAILURE,
            };
            ExitCode::from(code)
        }
    }
}

fn split_args(args: Option<&str>) -> Vec<String> {
    args.map(|a| a.split_whitespace().map(str::to_owned).collect())
        .unwrap_or_default()
}
