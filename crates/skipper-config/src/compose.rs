//! Composition of an ordered fragment sequence into one immutable config.
//!
//! Merge precedence is left-to-right: shared templates in declaration order,
//! the instance's own fragment last, so instance values always win. The
//! concatenated raw texts form the provisioning tool's instruction stream.

use crate::fragment::{parse_fragment_file, NetworkLink, ProvisionStep, TemplateFragment, VolumeMount};
use crate::ConfigError;
use std::path::Path;

/// Document separator of the provisioning stream. The historical spelling is
/// part of the wire format the provisioning tool splits on.
pub const FILE_SEPARATOR: &str = "_FILE_SEPERATOR_";

/// Image namespace prefix for every image this launcher produces.
pub const IMAGE_NAMESPACE: &str = "skipper";

pub const DEFAULT_BASE_IMAGE: &str = "debian:bookworm-slim";

pub const DEFAULT_BOOT_COMMAND: &str = "/sbin/boot";

/// Env keys flagged secret by default: never baked into an image layer and
/// never listed as build arguments, still supplied at container run time.
pub const DEFAULT_SECRET_KEYS: &[&str] = &[
    "DB_HOST",
    "DB_PORT",
    "DB_PASSWORD",
    "DB_REPLICA_HOST",
    "DB_REPLICA_PORT",
    "REDIS_HOST",
    "REDIS_REPLICA_HOST",
    "REDIS_PASSWORD",
    "SMTP_ADDRESS",
    "SMTP_USER_NAME",
    "SMTP_PASSWORD",
    "SECRET_KEY_BASE",
    "SAML_CERT",
];

/// Which env keys must be kept out of less-trusted execution contexts.
#[derive(Debug, Clone)]
pub struct SecretPolicy {
    keys: Vec<String>,
}

impl Default for SecretPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_SECRET_KEYS.iter().map(|k| (*k).to_owned()))
    }
}

impl SecretPolicy {
    pub fn new(keys: impl IntoIterator<Item = String>) -> Self {
        Self {
            keys: keys.into_iter().collect(),
        }
    }

    pub fn is_secret(&self, key: &str) -> bool {
        self.keys.iter().any(|k| k == key)
    }
}

/// The merged, immutable configuration for one named instance. Built once per
/// command invocation and passed down by reference; never mutated afterwards.
#[derive(Debug, Clone)]
pub struct ComposedConfig {
    pub name: String,
    /// Env pairs in first-seen order, keys unique (last writer won).
    pub env: Vec<(String, String)>,
    pub labels: Vec<(String, String)>,
    /// Deduplicated by guest path, last writer wins.
    pub volumes: Vec<VolumeMount>,
    /// Deduplicated by alias, last writer wins.
    pub links: Vec<NetworkLink>,
    pub expose: Vec<String>,
    pub update_provisioner: bool,
    pub docker_args: String,
    /// Provisioning steps concatenated in fragment order, never deduplicated.
    pub steps: Vec<ProvisionStep>,
    base_image: Option<String>,
    run_image: Option<String>,
    boot_command: Option<String>,
    no_boot_command: bool,
    hostname: Option<String>,
    fragments_raw: Vec<String>,
    secrets: SecretPolicy,
}

impl ComposedConfig {
    /// Merges fragments left-to-right under the documented precedence rules.
    pub fn compose_from(
        name: impl Into<String>,
        fragments: Vec<TemplateFragment>,
        secrets: SecretPolicy,
    ) -> Self {
        let mut config = Self {
            name: name.into(),
            env: Vec::new(),
            labels: Vec::new(),
            volumes: Vec::new(),
            links: Vec::new(),
            expose: Vec::new(),
            update_provisioner: false,
            docker_args: String::new(),
            steps: Vec::new(),
            base_image: None,
            run_image: None,
            boot_command: None,
            no_boot_command: false,
            hostname: None,
            fragments_raw: Vec::with_capacity(fragments.len()),
            secrets,
        };
        for fragment in fragments {
            config.apply(fragment);
        }
        config
    }

    fn apply(&mut self, fragment: TemplateFragment) {
        for (key, value) in fragment.env {
            upsert(&mut self.env, key, value);
        }
        for (key, value) in fragment.labels {
            upsert(&mut self.labels, key, value);
        }
        for volume in fragment.volumes {
            match self.volumes.iter_mut().find(|v| v.guest == volume.guest) {
                Some(existing) => *existing = volume,
                None => self.volumes.push(volume),
            }
        }
        for link in fragment.links {
            match self.links.iter_mut().find(|l| l.alias == link.alias) {
                Some(existing) => *existing = link,
                None => self.links.push(link),
            }
        }
        self.expose.extend(fragment.expose);
        self.steps.extend(fragment.steps);
        if fragment.base_image.is_some() {
            self.base_image = fragment.base_image;
        }
        if fragment.run_image.is_some() {
            self.run_image = fragment.run_image;
        }
        if fragment.boot_command.is_some() {
            self.boot_command = fragment.boot_command;
        }
        if let Some(flag) = fragment.no_boot_command {
            self.no_boot_command = flag;
        }
        if let Some(flag) = fragment.update_provisioner {
            self.update_provisioner = flag;
        }
        if let Some(args) = fragment.docker_args {
            self.docker_args = args;
        }
        if fragment.hostname.is_some() {
            self.hostname = fragment.hostname;
        }
        self.fragments_raw.push(fragment.raw);
    }

    /// The provisioning instruction stream: every contributing fragment's raw
    /// text joined by the separator marker, in composition order. Contains
    /// exactly `fragment_count() - 1` separator occurrences.
    pub fn merged_yaml(&self) -> String {
        self.fragments_raw.join(&format!("{FILE_SEPARATOR}\n"))
    }

    pub fn fragment_count(&self) -> usize {
        self.fragments_raw.len()
    }

    pub fn is_secret(&self, key: &str) -> bool {
        self.secrets.is_secret(key)
    }

    /// Env pairs safe for build-time contexts (image layers, build args).
    pub fn non_secret_env(&self) -> impl Iterator<Item = &(String, String)> {
        self.env.iter().filter(|(k, _)| !self.secrets.is_secret(k))
    }

    pub fn env_value(&self, key: &str) -> Option<&str> {
        self.env
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn base_image(&self) -> &str {
        self.base_image.as_deref().unwrap_or(DEFAULT_BASE_IMAGE)
    }

    /// Tag the built image carries: `<namespace>/<instance name>`.
    pub fn image(&self) -> String {
        format!("{IMAGE_NAMESPACE}/{}", self.name)
    }

    /// Image used for running; the configured override or the built image.
    pub fn run_image(&self) -> String {
        self.run_image.clone().unwrap_or_else(|| self.image())
    }

    /// The container's long-running entrypoint: the configured command, or
    /// empty when boot is explicitly disabled, or the stock boot script.
    pub fn boot_command(&self) -> String {
        match &self.boot_command {
            Some(cmd) if !cmd.is_empty() => cmd.clone(),
            _ if self.no_boot_command => String::new(),
            _ => DEFAULT_BOOT_COMMAND.to_owned(),
        }
    }

    /// Container hostname: the configured one or the supplied default, with
    /// every character outside `[A-Za-z0-9_-]` replaced by a dash.
    pub fn hostname_or(&self, default: &str) -> String {
        self.hostname
            .as_deref()
            .unwrap_or(default)
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                    c
                } else {
                    '-'
                }
            })
            .collect()
    }
}

fn upsert(pairs: &mut Vec<(String, String)>, key: String, value: String) {
    match pairs.iter_mut().find(|(k, _)| *k == key) {
        Some((_, existing)) => *existing = value,
        None => pairs.push((key, value)),
    }
}

/// Composes the named instance's configuration from its own file plus the
/// shared templates it declares, using the default secret policy.
pub fn compose(
    conf_dir: &Path,
    name: &str,
    templates_dir: &Path,
) -> Result<ComposedConfig, ConfigError> {
    compose_with_secrets(conf_dir, name, templates_dir, SecretPolicy::default())
}

pub fn compose_with_secrets(
    conf_dir: &Path,
    name: &str,
    templates_dir: &Path,
    secrets: SecretPolicy,
) -> Result<ComposedConfig, ConfigError> {
    let instance_path = conf_dir.join(format!("{name}.yml"));
    if !instance_path.is_file() {
        return Err(ConfigError::InstanceNotFound(name.to_owned()));
    }
    let instance = parse_fragment_file(&instance_path)?;

    let mut fragments = Vec::with_capacity(instance.templates.len() + 1);
    for reference in &instance.templates {
        let path = templates_dir.join(reference);
        if !path.is_file() {
            return Err(ConfigError::TemplateNotFound {
                reference: reference.clone(),
                dir: templates_dir.to_path_buf(),
            });
        }
        tracing::debug!(template = %reference, "loading template fragment");
        fragments.push(parse_fragment_file(&path)?);
    }
    fragments.push(instance);

    Ok(ComposedConfig::compose_from(name, fragments, secrets))
}
