//! Rendering of the per-instance build artifacts.
//!
//! Everything here is a pure function over a [`ComposedConfig`] except the
//! `write_*`/`clean_artifacts` helpers, which own the artifact directory
//! layout: exactly `config.yaml`, `Dockerfile`, `docker-compose.yaml`, and
//! `.envrc`.

use crate::command::PROVISIONER_BIN;
use crate::EngineError;
use serde_yaml::{Mapping, Value};
use skipper_config::ComposedConfig;
use std::fmt::Write as _;
use std::fs;
use std::path::Path;

pub const CONFIG_FILE: &str = "config.yaml";
pub const DOCKERFILE: &str = "Dockerfile";
pub const COMPOSE_FILE: &str = "docker-compose.yaml";
pub const ENV_FILE: &str = ".envrc";

const INSTANCE_PLACEHOLDER: &str = "{{instance}}";

/// Renders the Dockerfile fed to the engine build. Non-secret env keys are
/// declared as build arguments; `bake_env` additionally freezes their values
/// into image layers. Secret keys never appear in either form.
pub fn dockerfile(config: &ComposedConfig, provision_args: &str, bake_env: bool) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "ARG from_image={}", config.base_image());
    out.push_str("FROM ${from_image}\n");
    for (key, _) in config.non_secret_env() {
        let _ = writeln!(out, "ARG {key}");
    }
    if bake_env {
        for (key, _) in config.non_secret_env() {
            let _ = writeln!(out, "ENV {key}=${{{key}}}");
        }
    }
    for port in &config.expose {
        let _ = writeln!(out, "EXPOSE {port}");
    }
    let _ = writeln!(out, "COPY {CONFIG_FILE} /temp-config.yaml");
    let _ = writeln!(
        out,
        "RUN cat /temp-config.yaml | {PROVISIONER_BIN} --stdin {provision_args} \
         && rm /temp-config.yaml"
    );
    let boot = config.boot_command();
    if boot.is_empty() {
        out.push_str("CMD []\n");
    } else {
        let _ = writeln!(out, "CMD [\"{boot}\"]");
    }
    out
}

/// Renders a compose descriptor equivalent to the managed run command. Env
/// vars are listed by name only; values come from sourcing the env file.
pub fn compose_file(config: &ComposedConfig) -> Result<String, EngineError> {
    let mut build = Mapping::new();
    build.insert("context".into(), ".".into());
    build.insert("dockerfile".into(), DOCKERFILE.into());
    let args: Vec<Value> = config
        .non_secret_env()
        .map(|(k, _)| Value::from(k.as_str()))
        .collect();
    build.insert("args".into(), Value::Sequence(args));

    let mut service = Mapping::new();
    service.insert("build".into(), Value::Mapping(build));
    service.insert("image".into(), config.image().into());
    service.insert("container_name".into(), config.name.as_str().into());
    service.insert("restart".into(), "always".into());
    service.insert("shm_size".into(), "512m".into());

    let environment: Vec<Value> = config
        .env
        .iter()
        .map(|(k, _)| Value::from(k.as_str()))
        .collect();
    if !environment.is_empty() {
        service.insert("environment".into(), Value::Sequence(environment));
    }

    let (ports, expose): (Vec<_>, Vec<_>) =
        config.expose.iter().partition(|p| p.contains(':'));
    if !ports.is_empty() {
        service.insert(
            "ports".into(),
            Value::Sequence(ports.into_iter().map(|p| Value::from(p.as_str())).collect()),
        );
    }
    if !expose.is_empty() {
        service.insert(
            "expose".into(),
            Value::Sequence(expose.into_iter().map(|p| Value::from(p.as_str())).collect()),
        );
    }
    if !config.volumes.is_empty() {
        let volumes: Vec<Value> = config
            .volumes
            .iter()
            .map(|v| Value::from(format!("{}:{}", v.host, v.guest)))
            .collect();
        service.insert("volumes".into(), Value::Sequence(volumes));
    }
    if !config.links.is_empty() {
        let links: Vec<Value> = config
            .links
            .iter()
            .map(|l| Value::from(format!("{}:{}", l.name, l.alias)))
            .collect();
        service.insert("links".into(), Value::Sequence(links));
    }
    if !config.labels.is_empty() {
        let mut labels = Mapping::new();
        for (key, value) in &config.labels {
            labels.insert(
                Value::from(key.as_str()),
                Value::from(value.replace(INSTANCE_PLACEHOLDER, &config.name)),
            );
        }
        service.insert("labels".into(), Value::Mapping(labels));
    }

    let mut services = Mapping::new();
    services.insert(config.name.as_str().into(), Value::Mapping(service));
    let mut root = Mapping::new();
    root.insert("services".into(), Value::Mapping(services));

    serde_yaml::to_string(&root).map_err(|source| EngineError::Render {
        artifact: COMPOSE_FILE,
        source,
    })
}

/// Renders the sourceable env file, one `export KEY='value'` per variable.
pub fn env_file(config: &ComposedConfig) -> String {
    let mut out = String::new();
    for (key, value) in &config.env {
        let _ = writeln!(out, "export {key}='{}'", value.replace('\'', "'\\''"));
    }
    out
}

pub fn ports_args(config: &ComposedConfig) -> Vec<String> {
    let mut args = Vec::new();
    for port in &config.expose {
        if port.contains(':') {
            args.push("-p".to_owned());
        } else {
            args.push("--expose".to_owned());
        }
        args.push(port.clone());
    }
    args
}

pub fn env_args(config: &ComposedConfig) -> Vec<String> {
    let mut args = Vec::new();
    for (key, value) in &config.env {
        args.push("--env".to_owned());
        args.push(format!("{key}={value}"));
    }
    args
}

pub fn labels_args(config: &ComposedConfig) -> Vec<String> {
    let mut args = Vec::new();
    for (key, value) in &config.labels {
        args.push("--label".to_owned());
        args.push(format!(
            "{key}={}",
            value.replace(INSTANCE_PLACEHOLDER, &config.name)
        ));
    }
    args
}

pub fn volumes_args(config: &ComposedConfig) -> Vec<String> {
    let mut args = Vec::new();
    for volume in &config.volumes {
        args.push("-v".to_owned());
        args.push(format!("{}:{}", volume.host, volume.guest));
    }
    args
}

pub fn links_args(config: &ComposedConfig) -> Vec<String> {
    let mut args = Vec::new();
    for link in &config.links {
        args.push("--link".to_owned());
        args.push(format!("{}:{}", link.name, link.alias));
    }
    args
}

/// Space-joined form for pasting into a shell, values with whitespace quoted.
pub fn join_cli(args: &[String]) -> String {
    args.iter()
        .map(|a| {
            if a.chars().any(char::is_whitespace) {
                format!("'{a}'")
            } else {
                a.clone()
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Creates the per-instance artifact directory. An existing directory is an
/// error unless the caller opted into reuse.
pub fn ensure_dir(dir: &Path, reuse: bool) -> Result<(), EngineError> {
    if dir.exists() {
        if reuse {
            return Ok(());
        }
        return Err(EngineError::DirectoryCollision(dir.to_path_buf()));
    }
    fs::create_dir_all(dir)?;
    Ok(())
}

/// Writes the merged provisioning stream as `config.yaml`.
pub fn write_config(dir: &Path, config: &ComposedConfig) -> Result<(), EngineError> {
    fs::write(dir.join(CONFIG_FILE), config.merged_yaml())?;
    Ok(())
}

/// Writes all four artifacts for the compose workflow.
pub fn write_artifacts(
    dir: &Path,
    config: &ComposedConfig,
    provision_args: &str,
    bake_env: bool,
) -> Result<(), EngineError> {
    write_config(dir, config)?;
    fs::write(dir.join(DOCKERFILE), dockerfile(config, provision_args, bake_env))?;
    fs::write(dir.join(COMPOSE_FILE), compose_file(config)?)?;
    fs::write(dir.join(ENV_FILE), env_file(config))?;
    Ok(())
}

/// Removes the four artifacts and then the (now empty) directory. Files that
/// were never written are skipped.
pub fn clean_artifacts(dir: &Path) -> Result<(), EngineError> {
    for name in [CONFIG_FILE, DOCKERFILE, COMPOSE_FILE, ENV_FILE] {
        match fs::remove_file(dir.join(name)) {
            Ok(()) => {}
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => return Err(err.into()),
        }
    }
    match fs::remove_dir(dir) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err.into()),
    }
}
