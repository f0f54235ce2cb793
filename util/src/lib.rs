use glob::glob;
use std::env;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

pub fn maybe_print_version(
    name: &'static str,
    major: &'static str,
    minor: &'static str,
    patch: &'static str,
    pre: &'static str,
) {
    let mut args = std::env::args();
    if args.len() == 2 && args.nth(1).as_deref() == Some("--version") {
        println!("{} {}.{}.{} {}", name, major, minor, patch, pre);
        std::process::exit(0);
    }
}

#[macro_export]
macro_rules! add_version {
    () => {
        keyport_util::maybe_print_version(
            env!("CARGO_PKG_NAME"),
            env!("CARGO_PKG_VERSION_MAJOR"),
            env!("CARGO_PKG_VERSION_MINOR"),
            env!("CARGO_PKG_VERSION_PATCH"),
            env!("CARGO_PKG_VERSION_PRE"),
        );
    };
}

/// Logs to stderr, filtered by `LOG_LEVEL` (default `info`).
pub fn init_logging() {
    let _ = pretty_env_logger::formatted_builder()
        .filter_level(log::LevelFilter::Info)
        .parse_env("LOG_LEVEL")
        .try_init();
}

/// Loads the layered configuration of `component`.
///
/// Later sources override earlier ones: the packaged defaults in
/// `/usr/share/keyport`, the file named by `<COMPONENT>_CONF` (or the one in
/// `/etc/keyport`), every file matched in the conf.d directory, and finally
/// `<COMPONENT>_*` environment variables.
pub fn settings_for(component: &str) -> Result<config::Config> {
    let conf_d = glob(
        &conf_dir_from_env(&format_conf_dir_env(component))
            .unwrap_or_else(|| format!("/etc/keyport/{}.conf.d/*.yml", component)),
    )?
    .collect::<std::result::Result<Vec<PathBuf>, _>>()
    .context("Listing configuration files from conf.d")?;

    config::Config::builder()
        .add_source(
            config::File::from(Path::new(&format!("/usr/share/keyport/{}.yml", component)))
                .required(false),
        )
        .add_source(
            config::File::from(Path::new(
                &conf_dir_from_env(&format_conf_env(component))
                    .unwrap_or_else(|| format!("/etc/keyport/{}.yml", component)),
            ))
            .required(false),
        )
        .add_source(
            conf_d
                .into_iter()
                .map(config::File::from)
                .collect::<Vec<_>>(),
        )
        .add_source(
            config::Environment::with_prefix(&component_env_prefix(component)).try_parsing(true),
        )
        .build()
        .with_context(|| format!("Loading configuration for {}", component))
}

pub fn format_conf_env(component: &str) -> String {
    format!("{}_CONF", component_env_prefix(component))
}

pub fn format_conf_dir_env(component: &str) -> String {
    format!("{}_CONF_DIR", component_env_prefix(component))
}

fn component_env_prefix(component: &str) -> String {
    component.replace('-', "_").to_uppercase()
}

fn conf_dir_from_env(key: &str) -> Option<String> {
    env::var_os(key).and_then(|v| v.into_string().ok())
}
