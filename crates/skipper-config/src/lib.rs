//! Template store, configuration composition, and the composed data model
//! for Skipper.
//!
//! An instance is described by `<conf-dir>/<name>.yml` plus an ordered list
//! of shared template fragments it declares. This crate resolves and parses
//! those fragments, merges them into one immutable [`ComposedConfig`] with
//! defined precedence, and exposes the derived values (provisioning stream,
//! boot command, image names) that the engine crate turns into artifacts and
//! container-engine commands.

pub mod compose;
pub mod fragment;

pub use compose::{
    compose, compose_with_secrets, ComposedConfig, SecretPolicy, DEFAULT_BASE_IMAGE,
    DEFAULT_BOOT_COMMAND, DEFAULT_SECRET_KEYS, FILE_SEPARATOR, IMAGE_NAMESPACE,
};
pub use fragment::{
    parse_fragment_file, parse_fragment_str, NetworkLink, ProvisionStep, TemplateFragment,
    VolumeMount,
};

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("YAML syntax error in {path}: {source}")]
    Syntax {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("template reference '{reference}' does not match any file under {dir}")]
    TemplateNotFound { reference: String, dir: PathBuf },
    #[error("no configuration named '{0}' (expected <conf-dir>/{0}.yml)")]
    InstanceNotFound(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
