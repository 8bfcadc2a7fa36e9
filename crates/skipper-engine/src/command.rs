//! Translation of a composed configuration into container-engine argv.
//!
//! Every function here is pure: it returns a [`CommandSpec`] and never talks
//! to the host. Secret env values travel through the child's environment,
//! never through argv, so they cannot leak into process listings or image
//! history.

use crate::runner::{CommandSpec, StdinSource};
use chrono::Utc;
use skipper_config::ComposedConfig;
use std::path::Path;
use std::time::Duration;

/// Container engine binary used when nothing else is configured.
pub const DEFAULT_ENGINE: &str = "docker";

/// Provisioning tool invoked inside helper containers.
pub const PROVISIONER_BIN: &str = "/usr/local/bin/pups";

/// Checkout the provisioning tool is updated from when requested.
pub const PROVISIONER_DIR: &str = "/pups";

/// Placeholder in label values replaced by the instance name.
const INSTANCE_PLACEHOLDER: &str = "{{instance}}";

/// Graceful-stop window before the engine kills the container.
const STOP_TIMEOUT_SECS: u32 = 600;

/// How a container is run; everything the argv needs beyond the config.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub container_name: String,
    /// Default hostname when the config does not set one.
    pub fallback_hostname: String,
    pub detach: bool,
    /// Attach stdin and feed it the provisioning stream.
    pub interactive: bool,
    pub remove_on_exit: bool,
    pub publish_ports: bool,
    pub restart_policy: Option<String>,
    /// Env additions beyond the composed config, e.g. provisioning toggles.
    pub extra_env: Vec<(String, String)>,
    /// Extra engine flags from the command line, appended after the config's.
    pub extra_args: Vec<String>,
    /// Run a different image than the config's.
    pub image_override: Option<String>,
    /// Trailing argv after the image, empty for the image's own entrypoint.
    pub command: Vec<String>,
}

/// Builds engine command lines for one instance's composed configuration.
pub struct CommandBuilder<'a> {
    engine: String,
    config: &'a ComposedConfig,
}

impl<'a> CommandBuilder<'a> {
    pub fn new(engine: impl Into<String>, config: &'a ComposedConfig) -> Self {
        Self {
            engine: engine.into(),
            config,
        }
    }

    pub fn engine(&self) -> &str {
        &self.engine
    }

    /// Image build from a rendered Dockerfile on stdin. Build arguments are
    /// declared by name only; the engine resolves values from the child
    /// environment, which carries only non-secret pairs.
    pub fn build(&self, dockerfile: String, context_dir: &Path) -> CommandSpec {
        let mut spec = CommandSpec::new("build", &self.engine)
            .arg("build")
            .args(["--no-cache", "--pull", "--force-rm"])
            .args(["-t".to_owned(), self.config.image()])
            .arg("--shm-size=512m");
        for (key, _) in self.config.non_secret_env() {
            spec = spec.arg("--build-arg").arg(key);
        }
        spec = spec.args(["-f", "-", "."]);
        spec.env = self.config.non_secret_env().cloned().collect();
        spec.env
            .push(("BUILDKIT_PROGRESS".to_owned(), "plain".to_owned()));
        spec.cwd = Some(context_dir.to_path_buf());
        spec.stdin = StdinSource::Text(dockerfile);
        spec.own_group = true;
        spec
    }

    /// A `run` invocation. Env keys are declared by name only with values in
    /// the child environment; labels, mounts, links, and ports come from the
    /// composed config.
    pub fn run(&self, label: &str, opts: &RunOptions) -> CommandSpec {
        let mut spec = CommandSpec::new(label, &self.engine).arg("run");
        if opts.detach {
            spec = spec.arg("-d");
        }
        if opts.interactive {
            spec = spec.arg("-i").args(["-a", "stdin", "-a", "stdout", "-a", "stderr"]);
        }
        if opts.remove_on_exit {
            spec = spec.arg("--rm");
        }
        if let Some(policy) = &opts.restart_policy {
            spec = spec.arg(format!("--restart={policy}"));
        }
        spec = spec
            .arg("--shm-size=512m")
            .args(["--name".to_owned(), opts.container_name.clone()])
            .args(["-h".to_owned(), self.config.hostname_or(&opts.fallback_hostname)]);

        for (key, _) in &self.config.env {
            spec = spec.args(["--env".to_owned(), key.clone()]);
        }
        for (key, _) in &opts.extra_env {
            spec = spec.args(["--env".to_owned(), key.clone()]);
        }
        for (key, value) in &self.config.labels {
            let value = value.replace(INSTANCE_PLACEHOLDER, &self.config.name);
            spec = spec.args(["--label".to_owned(), format!("{key}={value}")]);
        }
        if opts.publish_ports {
            for port in &self.config.expose {
                if port.contains(':') {
                    spec = spec.args(["-p".to_owned(), port.clone()]);
                } else {
                    spec = spec.args(["--expose".to_owned(), port.clone()]);
                }
            }
        }
        for volume in &self.config.volumes {
            spec = spec.args(["-v".to_owned(), format!("{}:{}", volume.host, volume.guest)]);
        }
        for link in &self.config.links {
            spec = spec.args(["--link".to_owned(), format!("{}:{}", link.name, link.alias)]);
        }
        spec = spec.args(self.config.docker_args.split_whitespace().map(str::to_owned));
        spec = spec.args(opts.extra_args.iter().cloned());

        let image = opts
            .image_override
            .clone()
            .unwrap_or_else(|| self.config.run_image());
        spec = spec.arg(image);
        spec = spec.args(opts.command.iter().cloned());

        spec.env = self.config.env.clone();
        spec.env.extend(opts.extra_env.iter().cloned());
        spec.own_group = true;
        if opts.interactive {
            spec.stdin = StdinSource::Text(self.config.merged_yaml());
        }
        spec
    }

    /// Commits the helper container as the instance's image, stamping the
    /// creation time and resetting CMD to the boot command.
    pub fn commit(&self, container_name: &str) -> CommandSpec {
        let created = Utc::now().to_rfc3339();
        let mut spec = CommandSpec::new("commit", &self.engine)
            .arg("commit")
            .arg("--change")
            .arg(format!("LABEL org.opencontainers.image.created=\"{created}\""));
        let boot = self.config.boot_command();
        if !boot.is_empty() {
            spec = spec.arg("--change").arg(format!("CMD {boot}"));
        }
        spec.arg(container_name).arg(self.config.image())
    }

    /// Shell command a provisioning run executes inside the container.
    pub fn provision_command(&self, tags: &str) -> Vec<String> {
        let invocation = format!("{PROVISIONER_BIN} --stdin {tags}");
        let script = if self.config.update_provisioner {
            format!("cd {PROVISIONER_DIR} && git pull && {invocation}")
        } else {
            invocation
        };
        vec!["/bin/bash".to_owned(), "-c".to_owned(), script]
    }
}

pub fn start_existing(engine: &str, name: &str) -> CommandSpec {
    CommandSpec::new("start existing", engine).args(["start", name])
}

pub fn stop(engine: &str, name: &str) -> CommandSpec {
    CommandSpec::new("stop", engine)
        .arg("stop")
        .args(["-t".to_owned(), STOP_TIMEOUT_SECS.to_string()])
        .arg(name)
}

pub fn remove(engine: &str, name: &str) -> CommandSpec {
    CommandSpec::new("remove", engine).args(["rm", name])
}

/// Forced removal with a short bounded wait; a wedged engine daemon must not
/// hang the launcher indefinitely.
pub fn remove_forced(engine: &str, name: &str) -> CommandSpec {
    let mut spec = CommandSpec::new("remove helper", engine).args(["rm", "-f", name]);
    spec.timeout = Some(Duration::from_secs(10));
    spec.stdin = StdinSource::Null;
    spec
}

pub fn logs(engine: &str, name: &str) -> CommandSpec {
    CommandSpec::new("logs", engine).args(["logs", name])
}

pub fn enter_shell(engine: &str, name: &str) -> CommandSpec {
    CommandSpec::new("enter", engine).args(["exec", "-it", name, "/bin/bash", "--login"])
}

pub fn exists_probe(engine: &str, name: &str) -> CommandSpec {
    let mut spec = CommandSpec::new("exists probe", engine)
        .args(["ps", "-a", "-q", "--filter"])
        .arg(format!("name={name}"));
    spec.stdin = StdinSource::Null;
    spec
}

pub fn running_probe(engine: &str, name: &str) -> CommandSpec {
    let mut spec = CommandSpec::new("running probe", engine)
        .args(["ps", "-q", "--filter"])
        .arg(format!("name={name}"));
    spec.stdin = StdinSource::Null;
    spec
}

/// Prunes run attached, so the engine's own confirmation prompt is the
/// interaction.
pub fn prune_containers(engine: &str) -> CommandSpec {
    CommandSpec::new("prune containers", engine)
        .args(["container", "prune", "--filter", "until=1h"])
}

pub fn prune_images(engine: &str) -> CommandSpec {
    CommandSpec::new("prune images", engine)
        .args(["image", "prune", "--all", "--filter", "until=1h"])
}

#[cfg(test)]
mod tests {
    use super::*;
    use skipper_config::{parse_fragment_str, ComposedConfig, SecretPolicy};

    fn config() -> ComposedConfig {
        let fragment = parse_fragment_str(
            concat!(
                "env:\n",
                "  LANG: en_US.UTF-8\n",
                "  DEVELOPER_EMAILS: me@example.com\n",
                "  DB_PASSWORD: SECRET\n",
                "labels:\n",
                "  app_name: \"{{instance}}\"\n",
                "expose:\n",
                "  - \"80:80\"\n",
                "  - \"90\"\n",
                "volumes:\n",
                "  - volume:\n",
                "      host: /srv/data\n",
                "      guest: /shared\n",
                "links:\n",
                "  - link:\n",
                "      name: data\n",
                "      alias: db\n",
            ),
            "inline.yml",
        )
        .unwrap();
        ComposedConfig::compose_from("app", vec![fragment], SecretPolicy::default())
    }

    #[test]
    fn build_declares_only_non_secret_args() {
        let config = config();
        let builder = CommandBuilder::new("docker", &config);
        let spec = builder.build("FROM debian\n".to_owned(), Path::new("/tmp/app"));

        assert!(spec.args.windows(2).any(|w| w == ["--build-arg", "DEVELOPER_EMAILS"]));
        assert!(!spec.args.iter().any(|a| a == "DB_PASSWORD"));
        assert!(spec.env.iter().any(|(k, _)| k == "LANG"));
        assert!(!spec.env.iter().any(|(k, _)| k == "DB_PASSWORD"));
        assert_eq!(spec.flag_value("-t"), Some("skipper/app"));
        assert!(spec.has_arg("--no-cache"));
        assert_eq!(spec.stdin, StdinSource::Text("FROM debian\n".to_owned()));
    }

    #[test]
    fn run_declares_env_by_name_with_values_in_child_env() {
        let config = config();
        let builder = CommandBuilder::new("docker", &config);
        let opts = RunOptions {
            container_name: "app".to_owned(),
            fallback_hostname: "host-app".to_owned(),
            detach: true,
            publish_ports: true,
            restart_policy: Some("always".to_owned()),
            ..RunOptions::default()
        };
        let spec = builder.run("start run", &opts);

        assert!(spec.args.windows(2).any(|w| w == ["--env", "DB_PASSWORD"]));
        assert!(!spec.args.iter().any(|a| a.contains("SECRET")));
        assert_eq!(
            spec.env.iter().find(|(k, _)| k == "DB_PASSWORD").map(|(_, v)| v.as_str()),
            Some("SECRET")
        );
        assert!(spec.args.windows(2).any(|w| w == ["--label", "app_name=app"]));
        assert!(spec.args.windows(2).any(|w| w == ["-p", "80:80"]));
        assert!(spec.args.windows(2).any(|w| w == ["--expose", "90"]));
        assert!(spec.args.windows(2).any(|w| w == ["-v", "/srv/data:/shared"]));
        assert!(spec.args.windows(2).any(|w| w == ["--link", "data:db"]));
        assert!(spec.has_arg("--restart=always"));
        assert!(spec.has_arg("-d"));
        assert_eq!(spec.args.last().map(String::as_str), Some("skipper/app"));
    }

    #[test]
    fn provisioning_run_skips_ports_and_streams_config() {
        let config = config();
        let builder = CommandBuilder::new("docker", &config);
        let opts = RunOptions {
            container_name: "skipper-build-1234".to_owned(),
            fallback_hostname: "host-app".to_owned(),
            interactive: true,
            remove_on_exit: true,
            publish_ports: false,
            command: builder.provision_command("--tags=db,migrate"),
            ..RunOptions::default()
        };
        let spec = builder.run("migrate run", &opts);

        assert!(!spec.args.iter().any(|a| a == "-p"));
        assert!(spec.has_arg("--rm"));
        assert!(spec.has_arg("-i"));
        assert_eq!(spec.stdin, StdinSource::Text(config.merged_yaml()));
        assert!(spec
            .args
            .last()
            .is_some_and(|a| a.contains("pups --stdin --tags=db,migrate")));
    }

    #[test]
    fn update_provisioner_prefixes_git_pull() {
        let fragment = parse_fragment_str("update_provisioner: true\n", "inline.yml").unwrap();
        let config = ComposedConfig::compose_from("app", vec![fragment], SecretPolicy::default());
        let builder = CommandBuilder::new("docker", &config);
        let command = builder.provision_command("--tags=db,migrate");
        assert!(command[2].starts_with("cd /pups && git pull && "));
    }

    #[test]
    fn commit_stamps_creation_and_boot_command() {
        let config = config();
        let builder = CommandBuilder::new("docker", &config);
        let spec = builder.commit("skipper-build-1234");

        assert_eq!(spec.args[0], "commit");
        assert!(spec
            .args
            .iter()
            .any(|a| a.starts_with("LABEL org.opencontainers.image.created=")));
        assert!(spec.args.iter().any(|a| a == "CMD /sbin/boot"));
        assert_eq!(spec.args.last().map(String::as_str), Some("skipper/app"));
    }

    #[test]
    fn stop_uses_long_grace_period() {
        let spec = stop("docker", "app");
        assert_eq!(spec.to_string(), "docker stop -t 600 app");
    }

    #[test]
    fn remove_is_forced_and_bounded() {
        let spec = remove_forced("docker", "app");
        assert!(spec.has_arg("-f"));
        assert_eq!(spec.timeout, Some(Duration::from_secs(10)));
    }

    #[test]
    fn probes_filter_by_name() {
        assert_eq!(exists_probe("docker", "app").to_string(), "docker ps -a -q --filter name=app");
        assert_eq!(running_probe("docker", "app").to_string(), "docker ps -q --filter name=app");
    }
}
