//! Lifecycle operations over one instance.
//!
//! Every operation is an ordered list of named steps evaluated by one
//! fail-fast loop that checks the cancellation token between steps. The
//! orchestrator holds no state between invocations; container existence and
//! liveness are probed, never remembered.

use crate::artifacts;
use crate::cancel::CancelToken;
use crate::command::{self, CommandBuilder, RunOptions, DEFAULT_ENGINE};
use crate::probes;
use crate::runner::{CommandSpec, ProcessRunner};
use crate::{EngineError, BUILD_SKIP_TAGS, CONFIGURE_TAGS, MIGRATE_TAGS};
use skipper_config::ComposedConfig;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Asset compilation is deferred to the dedicated configure tags, so the
/// provisioning runs themselves skip it.
const PROVISION_EXTRA_ENV: (&str, &str) = ("SKIP_ASSET_COMPILE", "1");

/// Where configs live and how the engine is reached.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Directory of per-instance `<name>.yml` files.
    pub conf_dir: PathBuf,
    /// Directory template references are resolved against.
    pub templates_dir: PathBuf,
    /// Parent of the per-instance artifact directories.
    pub output_dir: PathBuf,
    /// Container engine binary.
    pub engine: String,
    /// Reuse an existing artifact directory instead of failing.
    pub reuse_output_dir: bool,
    /// Fixed helper container name; a fresh unique one per operation when
    /// unset.
    pub helper_name: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            conf_dir: PathBuf::from("./containers"),
            templates_dir: PathBuf::from("."),
            output_dir: PathBuf::from("./tmp"),
            engine: DEFAULT_ENGINE.to_owned(),
            reuse_output_dir: false,
            helper_name: None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct StartOptions {
    /// Attached run without a restart policy.
    pub supervised: bool,
    /// Print the fresh-run command instead of executing anything.
    pub dry_run: bool,
    pub run_image: Option<String>,
    pub docker_args: Vec<String>,
}

#[derive(Debug, PartialEq, Eq)]
pub enum StartOutcome {
    AlreadyRunning,
    StartedExisting,
    Started,
    /// The command line that a real start would have run.
    DryRun(String),
}

#[derive(Debug, PartialEq, Eq)]
pub enum StopOutcome {
    Absent,
    Stopped,
}

#[derive(Debug, PartialEq, Eq)]
pub enum DestroyOutcome {
    Absent,
    Destroyed,
}

struct Step<'a> {
    name: &'static str,
    run: Box<dyn FnOnce() -> Result<(), EngineError> + 'a>,
}

impl<'a> Step<'a> {
    fn new(name: &'static str, run: impl FnOnce() -> Result<(), EngineError> + 'a) -> Self {
        Self {
            name,
            run: Box::new(run),
        }
    }
}

pub struct Orchestrator<'a> {
    settings: Settings,
    runner: &'a dyn ProcessRunner,
    cancel: CancelToken,
}

impl<'a> Orchestrator<'a> {
    pub fn new(settings: Settings, runner: &'a dyn ProcessRunner, cancel: CancelToken) -> Self {
        Self {
            settings,
            runner,
            cancel,
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Composes the named instance's configuration from disk.
    pub fn compose_instance(&self, name: &str) -> Result<ComposedConfig, EngineError> {
        Ok(skipper_config::compose(
            &self.settings.conf_dir,
            name,
            &self.settings.templates_dir,
        )?)
    }

    fn instance_dir(&self, name: &str) -> PathBuf {
        self.settings.output_dir.join(name)
    }

    fn helper_name(&self) -> String {
        self.settings
            .helper_name
            .clone()
            .unwrap_or_else(|| format!("skipper-build-{}", Uuid::new_v4()))
    }

    fn run_steps(&self, steps: Vec<Step<'_>>) -> Result<(), EngineError> {
        for step in steps {
            if self.cancel.is_cancelled() {
                return Err(EngineError::Cancelled {
                    step: step.name.to_owned(),
                });
            }
            tracing::info!(step = step.name, "running step");
            (step.run)()?;
        }
        Ok(())
    }

    fn provision_spec(
        &self,
        config: &ComposedConfig,
        label: &str,
        tags: &str,
        remove_on_exit: bool,
        helper: &str,
    ) -> CommandSpec {
        let builder = CommandBuilder::new(&self.settings.engine, config);
        let opts = RunOptions {
            container_name: helper.to_owned(),
            fallback_hostname: format!("{}-{}", host_hostname(), config.name),
            interactive: true,
            remove_on_exit,
            publish_ports: false,
            extra_env: vec![(
                PROVISION_EXTRA_ENV.0.to_owned(),
                PROVISION_EXTRA_ENV.1.to_owned(),
            )],
            command: builder.provision_command(tags),
            ..RunOptions::default()
        };
        builder.run(label, &opts)
    }

    /// Builds the instance image from scratch. Artifacts are staged in the
    /// per-instance output directory and cleaned up afterwards whatever the
    /// outcome.
    pub fn build(&self, name: &str, bake_env: bool) -> Result<(), EngineError> {
        let config = self.compose_instance(name)?;
        let dir = self.instance_dir(name);
        artifacts::ensure_dir(&dir, self.settings.reuse_output_dir)?;

        let result = self.run_steps(vec![
            Step::new("write config", || artifacts::write_config(&dir, &config)),
            Step::new("build", || {
                let builder = CommandBuilder::new(&self.settings.engine, &config);
                let dockerfile = artifacts::dockerfile(&config, BUILD_SKIP_TAGS, bake_env);
                self.runner.run(&builder.build(dockerfile, &dir))
            }),
        ]);
        if let Err(err) = artifacts::clean_artifacts(&dir) {
            tracing::warn!(dir = %dir.display(), error = %err, "could not clean artifact directory");
        }
        result
    }

    /// Runs database migrations in a disposable helper container.
    pub fn migrate(&self, name: &str) -> Result<(), EngineError> {
        let config = self.compose_instance(name)?;
        let helper = self.helper_name();
        self.run_steps(vec![Step::new("migrate run", || {
            self.runner
                .run(&self.provision_spec(&config, "migrate run", MIGRATE_TAGS, true, &helper))
        })])
    }

    /// Runs the configure provisioning pass and commits the result as the
    /// instance image, stamping the boot command. The helper container is
    /// removed best-effort afterwards.
    pub fn configure(&self, name: &str) -> Result<(), EngineError> {
        let config = self.compose_instance(name)?;
        let helper = self.helper_name();
        self.run_steps(vec![
            Step::new("configure run", || {
                self.runner.run(&self.provision_spec(
                    &config,
                    "configure run",
                    CONFIGURE_TAGS,
                    false,
                    &helper,
                ))
            }),
            Step::new("commit", || {
                let builder = CommandBuilder::new(&self.settings.engine, &config);
                self.runner.run(&builder.commit(&helper))
            }),
        ])?;
        if let Err(err) = self
            .runner
            .run(&command::remove_forced(&self.settings.engine, &helper))
        {
            tracing::warn!(helper = %helper, error = %err, "could not remove helper container");
        }
        Ok(())
    }

    /// build then migrate then configure, fail-fast, no rollback.
    pub fn bootstrap(&self, name: &str) -> Result<(), EngineError> {
        self.build(name, false)?;
        self.migrate(name)?;
        self.configure(name)
    }

    pub fn start(&self, name: &str, opts: &StartOptions) -> Result<StartOutcome, EngineError> {
        let engine = &self.settings.engine;
        if !opts.dry_run {
            if probes::container_running(self.runner, engine, name)? {
                tracing::info!(instance = name, "container is already running");
                return Ok(StartOutcome::AlreadyRunning);
            }
            if probes::container_exists(self.runner, engine, name)? {
                tracing::info!(instance = name, "starting existing container");
                self.runner.run(&command::start_existing(engine, name))?;
                return Ok(StartOutcome::StartedExisting);
            }
        }

        let config = self.compose_instance(name)?;
        let boot = config.boot_command();
        let run_opts = RunOptions {
            container_name: name.to_owned(),
            fallback_hostname: format!("{}-{}", host_hostname(), name),
            detach: !opts.supervised,
            restart_policy: (!opts.supervised).then(|| "always".to_owned()),
            publish_ports: true,
            extra_args: opts.docker_args.clone(),
            image_override: opts.run_image.clone(),
            command: if boot.is_empty() { Vec::new() } else { vec![boot] },
            ..RunOptions::default()
        };
        let builder = CommandBuilder::new(engine, &config);
        let spec = builder.run("start run", &run_opts);
        if opts.dry_run {
            return Ok(StartOutcome::DryRun(spec.to_string()));
        }
        self.run_steps(vec![Step::new("start run", || self.runner.run(&spec))])?;
        Ok(StartOutcome::Started)
    }

    pub fn stop(&self, name: &str) -> Result<StopOutcome, EngineError> {
        let engine = &self.settings.engine;
        if !probes::container_exists(self.runner, engine, name)? {
            tracing::info!(instance = name, "no container to stop");
            return Ok(StopOutcome::Absent);
        }
        self.run_steps(vec![Step::new("stop", || {
            self.runner.run(&command::stop(engine, name))
        })])?;
        Ok(StopOutcome::Stopped)
    }

    pub fn restart(&self, name: &str, opts: &StartOptions) -> Result<StartOutcome, EngineError> {
        self.stop(name)?;
        self.start(name, opts)
    }

    /// Graceful stop then removal. A no-op when the container is absent.
    pub fn destroy(&self, name: &str) -> Result<DestroyOutcome, EngineError> {
        let engine = &self.settings.engine;
        if !probes::container_exists(self.runner, engine, name)? {
            tracing::info!(instance = name, "no container to destroy");
            return Ok(DestroyOutcome::Absent);
        }
        self.run_steps(vec![
            Step::new("stop", || self.runner.run(&command::stop(engine, name))),
            Step::new("remove", || self.runner.run(&command::remove(engine, name))),
        ])?;
        Ok(DestroyOutcome::Destroyed)
    }

    /// Full image rebuild and container replacement. Migrate and configure
    /// are skipped when the config defers them to boot time, unless a full
    /// build is forced. Every step failure aborts the pipeline.
    pub fn rebuild(&self, name: &str, full_build: bool) -> Result<(), EngineError> {
        let config = self.compose_instance(name)?;
        self.build(name, false)?;
        self.stop(name)?;
        if full_build || config.env_value("MIGRATE_ON_BOOT").is_none() {
            self.migrate(name)?;
        }
        if full_build || config.env_value("PRECOMPILE_ON_BOOT").is_none() {
            self.configure(name)?;
        }
        self.destroy(name)?;
        self.start(name, &StartOptions::default())?;
        Ok(())
    }

    /// Prunes stopped containers and unused images older than an hour, then
    /// offers removal of the legacy data directory when one is present.
    pub fn cleanup(
        &self,
        legacy_dir: Option<&Path>,
        confirm: impl FnOnce(&Path) -> bool,
    ) -> Result<(), EngineError> {
        let engine = &self.settings.engine;
        self.run_steps(vec![
            Step::new("prune containers", || {
                self.runner.run(&command::prune_containers(engine))
            }),
            Step::new("prune images", || {
                self.runner.run(&command::prune_images(engine))
            }),
        ])?;
        if let Some(dir) = legacy_dir {
            if dir.is_dir() && confirm(dir) {
                std::fs::remove_dir_all(dir)?;
                tracing::info!(dir = %dir.display(), "removed legacy data directory");
            }
        }
        Ok(())
    }

    /// Interactive login shell inside the running container.
    pub fn enter(&self, name: &str) -> Result<(), EngineError> {
        self.runner
            .run(&command::enter_shell(&self.settings.engine, name))
    }

    pub fn logs(&self, name: &str) -> Result<String, EngineError> {
        self.runner.capture(&command::logs(&self.settings.engine, name))
    }

    /// Removes the instance's artifact directory and its contents.
    pub fn clean(&self, name: &str) -> Result<(), EngineError> {
        artifacts::clean_artifacts(&self.instance_dir(name))
    }

    /// Writes the full artifact set for the compose workflow.
    pub fn generate_artifacts(&self, name: &str, bake_env: bool) -> Result<PathBuf, EngineError> {
        let config = self.compose_instance(name)?;
        let dir = self.instance_dir(name);
        artifacts::ensure_dir(&dir, self.settings.reuse_output_dir)?;
        artifacts::write_artifacts(&dir, &config, BUILD_SKIP_TAGS, bake_env)?;
        Ok(dir)
    }

    /// The merged provisioning stream, as fed to the provisioning tool.
    pub fn raw_yaml(&self, name: &str) -> Result<String, EngineError> {
        Ok(self.compose_instance(name)?.merged_yaml())
    }
}

/// The operating system hostname, `localhost` when it cannot be read.
#[allow(unsafe_code)]
pub fn host_hostname() -> String {
    let mut buf = [0u8; 256];
    // SAFETY: pointer and length describe the local buffer.
    let rc = unsafe { libc::gethostname(buf.as_mut_ptr().cast(), buf.len()) };
    if rc != 0 {
        return "localhost".to_owned();
    }
    let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    String::from_utf8_lossy(&buf[..end]).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::RecordingRunner;
    use std::fs;

    fn fixture(extra_env: &str) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("containers")).unwrap();
        fs::write(
            dir.path().join("containers/test.yml"),
            format!(
                "env:\n  DEVELOPER_EMAILS: me@example.com\n  DB_PASSWORD: SECRET\n{extra_env}expose:\n  - \"80:80\"\nrun:\n  - exec: echo test\n"
            ),
        )
        .unwrap();
        dir
    }

    fn settings(dir: &tempfile::TempDir) -> Settings {
        Settings {
            conf_dir: dir.path().join("containers"),
            templates_dir: dir.path().to_path_buf(),
            output_dir: dir.path().join("tmp"),
            engine: "docker".to_owned(),
            reuse_output_dir: true,
            helper_name: Some("helper".to_owned()),
        }
    }

    #[test]
    fn start_is_idempotent_when_running() {
        let dir = fixture("");
        let runner = RecordingRunner::new();
        runner.respond("running probe", "abc123\n");
        let orch = Orchestrator::new(settings(&dir), &runner, CancelToken::new());

        let outcome = orch.start("test", &StartOptions::default()).unwrap();
        assert_eq!(outcome, StartOutcome::AlreadyRunning);
        assert_eq!(runner.labels(), vec!["running probe"]);
    }

    #[test]
    fn start_reuses_existing_container() {
        let dir = fixture("");
        let runner = RecordingRunner::new();
        runner.respond("exists probe", "abc123\n");
        let orch = Orchestrator::new(settings(&dir), &runner, CancelToken::new());

        let outcome = orch.start("test", &StartOptions::default()).unwrap();
        assert_eq!(outcome, StartOutcome::StartedExisting);
        assert_eq!(
            runner.labels(),
            vec!["running probe", "exists probe", "start existing"]
        );
    }

    #[test]
    fn fresh_start_runs_detached_with_restart_policy() {
        let dir = fixture("");
        let runner = RecordingRunner::new();
        let orch = Orchestrator::new(settings(&dir), &runner, CancelToken::new());

        let outcome = orch.start("test", &StartOptions::default()).unwrap();
        assert_eq!(outcome, StartOutcome::Started);
        let commands = runner.commands();
        let run = commands.last().unwrap();
        assert!(run.has_arg("-d"));
        assert!(run.has_arg("--restart=always"));
        assert!(run.args.windows(2).any(|w| w == ["-p", "80:80"]));
        assert_eq!(run.args.last().map(String::as_str), Some("/sbin/boot"));
    }

    #[test]
    fn dry_run_start_touches_nothing() {
        let dir = fixture("");
        let runner = RecordingRunner::new();
        let orch = Orchestrator::new(settings(&dir), &runner, CancelToken::new());

        let opts = StartOptions {
            dry_run: true,
            ..StartOptions::default()
        };
        let outcome = orch.start("test", &opts).unwrap();
        match outcome {
            StartOutcome::DryRun(cmd) => assert!(cmd.starts_with("docker run ")),
            other => panic!("unexpected outcome {other:?}"),
        }
        assert!(runner.labels().is_empty());
    }

    #[test]
    fn stop_of_absent_container_only_probes() {
        let dir = fixture("");
        let runner = RecordingRunner::new();
        let orch = Orchestrator::new(settings(&dir), &runner, CancelToken::new());

        let outcome = orch.stop("test").unwrap();
        assert_eq!(outcome, StopOutcome::Absent);
        assert_eq!(runner.labels(), vec!["exists probe"]);
    }

    #[test]
    fn destroy_stops_then_removes() {
        let dir = fixture("");
        let runner = RecordingRunner::new();
        runner.respond("exists probe", "abc123\n");
        let orch = Orchestrator::new(settings(&dir), &runner, CancelToken::new());

        let outcome = orch.destroy("test").unwrap();
        assert_eq!(outcome, DestroyOutcome::Destroyed);
        assert_eq!(runner.labels(), vec!["exists probe", "stop", "remove"]);
    }

    #[test]
    fn bootstrap_fails_fast_after_migrate() {
        let dir = fixture("");
        let runner = RecordingRunner::new();
        runner.fail_step("migrate run", 1);
        let orch = Orchestrator::new(settings(&dir), &runner, CancelToken::new());

        let err = orch.bootstrap("test").unwrap_err();
        assert!(matches!(err, EngineError::ExternalCommand { .. }));
        let labels = runner.labels();
        assert!(labels.contains(&"build".to_owned()));
        assert!(labels.contains(&"migrate run".to_owned()));
        assert!(!labels.contains(&"configure run".to_owned()));
        assert!(!labels.contains(&"commit".to_owned()));
    }

    #[test]
    fn configure_commits_then_removes_helper() {
        let dir = fixture("");
        let runner = RecordingRunner::new();
        let orch = Orchestrator::new(settings(&dir), &runner, CancelToken::new());

        orch.configure("test").unwrap();
        assert_eq!(runner.labels(), vec!["configure run", "commit", "remove helper"]);
        let commands = runner.commands();
        assert!(!commands[0].has_arg("--rm"));
        assert!(commands[1]
            .flag_value("--change")
            .is_some_and(|c| c.starts_with("LABEL org.opencontainers.image.created=")));
        assert!(commands[2].has_arg("helper"));
        assert!(commands[2].has_arg("-f"));
    }

    #[test]
    fn migrate_run_is_disposable_and_streams_config() {
        let dir = fixture("");
        let runner = RecordingRunner::new();
        let orch = Orchestrator::new(settings(&dir), &runner, CancelToken::new());

        orch.migrate("test").unwrap();
        let commands = runner.commands();
        let run = &commands[0];
        assert!(run.has_arg("--rm"));
        assert!(!run.args.iter().any(|a| a == "-p"));
        assert!(run.args.windows(2).any(|w| w == ["--env", "SKIP_ASSET_COMPILE"]));
        assert!(run
            .args
            .last()
            .is_some_and(|a| a.contains("--stdin --tags=db,migrate")));
    }

    #[test]
    fn retry_sentinel_passes_through_bootstrap() {
        let dir = fixture("");
        let runner = RecordingRunner::new();
        runner.fail_step("configure run", 77);
        let orch = Orchestrator::new(settings(&dir), &runner, CancelToken::new());

        let err = orch.bootstrap("test").unwrap_err();
        assert!(matches!(err, EngineError::RetryRequested { .. }));
        assert_eq!(err.exit_code(), 77);
    }

    #[test]
    fn rebuild_skips_deferred_provisioning() {
        let dir = fixture("  MIGRATE_ON_BOOT: 1\n  PRECOMPILE_ON_BOOT: 1\n");
        let runner = RecordingRunner::new();
        let orch = Orchestrator::new(settings(&dir), &runner, CancelToken::new());

        orch.rebuild("test", false).unwrap();
        let labels = runner.labels();
        assert!(labels.contains(&"build".to_owned()));
        assert!(!labels.contains(&"migrate run".to_owned()));
        assert!(!labels.contains(&"configure run".to_owned()));
        assert!(labels.contains(&"start run".to_owned()));
    }

    #[test]
    fn rebuild_full_build_provisions_anyway() {
        let dir = fixture("  MIGRATE_ON_BOOT: 1\n");
        let runner = RecordingRunner::new();
        let orch = Orchestrator::new(settings(&dir), &runner, CancelToken::new());

        orch.rebuild("test", true).unwrap();
        assert!(runner.labels().contains(&"migrate run".to_owned()));
    }

    #[test]
    fn cancelled_token_stops_before_first_step() {
        let dir = fixture("");
        let runner = RecordingRunner::new();
        let cancel = CancelToken::new();
        cancel.trigger();
        let orch = Orchestrator::new(settings(&dir), &runner, cancel);

        let err = orch.migrate("test").unwrap_err();
        assert!(matches!(err, EngineError::Cancelled { .. }));
        assert!(runner.labels().is_empty());
    }

    #[test]
    fn build_cleans_artifact_directory() {
        let dir = fixture("");
        let runner = RecordingRunner::new();
        let orch = Orchestrator::new(settings(&dir), &runner, CancelToken::new());

        orch.build("test", false).unwrap();
        assert!(!dir.path().join("tmp/test").exists());
        let commands = runner.commands();
        let build = commands.last().unwrap();
        assert!(build.args.windows(2).any(|w| w == ["--build-arg", "DEVELOPER_EMAILS"]));
        assert!(!build.args.iter().any(|a| a == "DB_PASSWORD"));
    }

    #[test]
    fn generate_writes_all_four_artifacts() {
        let dir = fixture("");
        let runner = RecordingRunner::new();
        let orch = Orchestrator::new(settings(&dir), &runner, CancelToken::new());

        let out = orch.generate_artifacts("test", false).unwrap();
        for name in [
            artifacts::CONFIG_FILE,
            artifacts::DOCKERFILE,
            artifacts::COMPOSE_FILE,
            artifacts::ENV_FILE,
        ] {
            assert!(out.join(name).is_file(), "{name} missing");
        }
        orch.clean("test").unwrap();
        assert!(!out.exists());
    }

    #[test]
    fn hostname_is_never_empty() {
        assert!(!host_hostname().is_empty());
    }
}
