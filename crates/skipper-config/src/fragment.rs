//! Parsing of one YAML template fragment into its typed form.
//!
//! Fragments legitimately carry keys the launcher never interprets (the
//! provisioning tool's own payload), so unknown fields are kept in the raw
//! text and ignored by the typed model rather than rejected.

use crate::ConfigError;
use serde::Deserialize;
use serde_yaml::Value;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeMount {
    pub host: String,
    pub guest: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkLink {
    pub name: String,
    pub alias: String,
}

/// One provisioning step, preserved verbatim for the provisioning tool.
/// The tag is the step mapping's single key when it has exactly one.
#[derive(Debug, Clone, PartialEq)]
pub struct ProvisionStep {
    pub tag: Option<String>,
    pub body: Value,
}

/// One parsed YAML fragment. Mapping order is preserved as written.
#[derive(Debug, Clone)]
pub struct TemplateFragment {
    pub source: PathBuf,
    /// Normalized raw text: trailing whitespace trimmed, one trailing newline.
    pub raw: String,
    /// Template references declared by this fragment, in declaration order.
    pub templates: Vec<String>,
    pub env: Vec<(String, String)>,
    pub labels: Vec<(String, String)>,
    pub volumes: Vec<VolumeMount>,
    pub links: Vec<NetworkLink>,
    /// Port specs, plain `"80"` or `"80:443"` host:guest form.
    pub expose: Vec<String>,
    pub base_image: Option<String>,
    pub run_image: Option<String>,
    pub boot_command: Option<String>,
    pub no_boot_command: Option<bool>,
    pub update_provisioner: Option<bool>,
    pub docker_args: Option<String>,
    pub hostname: Option<String>,
    pub steps: Vec<ProvisionStep>,
}

#[derive(Debug, Default, Deserialize)]
struct RawFragment {
    #[serde(default)]
    templates: Vec<String>,
    #[serde(default)]
    env: serde_yaml::Mapping,
    #[serde(default)]
    labels: serde_yaml::Mapping,
    #[serde(default)]
    expose: Vec<Value>,
    #[serde(default)]
    volumes: Vec<RawVolume>,
    #[serde(default)]
    links: Vec<RawLink>,
    #[serde(default)]
    run: Vec<Value>,
    #[serde(default)]
    base_image: Option<String>,
    #[serde(default)]
    run_image: Option<String>,
    #[serde(default)]
    boot_command: Option<String>,
    #[serde(default)]
    no_boot_command: Option<bool>,
    #[serde(default)]
    update_provisioner: Option<bool>,
    #[serde(default)]
    docker_args: Option<String>,
    #[serde(default)]
    hostname: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawVolume {
    volume: VolumeMountBody,
}

#[derive(Debug, Deserialize)]
struct VolumeMountBody {
    host: String,
    guest: String,
}

#[derive(Debug, Deserialize)]
struct RawLink {
    link: NetworkLinkBody,
}

#[derive(Debug, Deserialize)]
struct NetworkLinkBody {
    name: String,
    alias: String,
}

/// Renders a YAML scalar the way the provisioning environment expects it:
/// numbers and booleans become their scalar text, null becomes empty.
fn scalar_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null => String::new(),
        other => serde_yaml::to_string(other)
            .map(|s| s.trim_end().to_owned())
            .unwrap_or_default(),
    }
}

fn mapping_pairs(mapping: &serde_yaml::Mapping) -> Vec<(String, String)> {
    mapping
        .iter()
        .map(|(k, v)| (scalar_text(k), scalar_text(v)))
        .collect()
}

fn parse_steps(run: &[Value]) -> Vec<ProvisionStep> {
    run.iter()
        .map(|item| {
            let tag = match item {
                Value::Mapping(m) if m.len() == 1 => m.iter().next().map(|(k, _)| scalar_text(k)),
                _ => None,
            };
            ProvisionStep {
                tag,
                body: item.clone(),
            }
        })
        .collect()
}

pub fn parse_fragment_str(
    text: &str,
    source: impl Into<PathBuf>,
) -> Result<TemplateFragment, ConfigError> {
    let source = source.into();
    let raw_fragment: RawFragment =
        serde_yaml::from_str(text).map_err(|source_err| ConfigError::Syntax {
            path: source.clone(),
            source: source_err,
        })?;

    Ok(TemplateFragment {
        raw: format!("{}\n", text.trim_end()),
        templates: raw_fragment.templates,
        env: mapping_pairs(&raw_fragment.env),
        labels: mapping_pairs(&raw_fragment.labels),
        volumes: raw_fragment
            .volumes
            .into_iter()
            .map(|v| VolumeMount {
                host: v.volume.host,
                guest: v.volume.guest,
            })
            .collect(),
        links: raw_fragment
            .links
            .into_iter()
            .map(|l| NetworkLink {
                name: l.link.name,
                alias: l.link.alias,
            })
            .collect(),
        expose: raw_fragment.expose.iter().map(scalar_text).collect(),
        base_image: raw_fragment.base_image,
        run_image: raw_fragment.run_image,
        boot_command: raw_fragment.boot_command,
        no_boot_command: raw_fragment.no_boot_command,
        update_provisioner: raw_fragment.update_provisioner,
        docker_args: raw_fragment.docker_args,
        hostname: raw_fragment.hostname,
        steps: parse_steps(&raw_fragment.run),
        source,
    })
}

pub fn parse_fragment_file(path: &Path) -> Result<TemplateFragment, ConfigError> {
    let text = fs::read_to_string(path)?;
    parse_fragment_str(&text, path)
}
