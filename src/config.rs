use crate::cli::RunArgs;
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(50);
pub const DEFAULT_RATE: u32 = 1000;
pub const DEFAULT_DURATION: Duration = Duration::from_secs(10);
pub const DEFAULT_BUFFER: usize = 50;

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct TomlConfig {
    #[serde(default)]
    pub target: TargetConfig,
    #[serde(default)]
    pub load: LoadSettings,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct TargetConfig {
    pub addr: Option<String>,
    #[serde(default, with = "humantime_serde::option")]
    pub timeout: Option<Duration>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct LoadSettings {
    pub rate: Option<u32>,
    #[serde(default, with = "humantime_serde::option")]
    pub duration: Option<Duration>,
    pub buffer: Option<usize>,
    pub max_in_flight: Option<u32>,
}

/// Effective settings for one `run`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunConfig {
    /// `None` only when a local server will supply the address.
    pub addr: Option<String>,
    pub timeout: Duration,
    pub rate: u32,
    pub duration: Duration,
    pub buffer: usize,
    pub max_in_flight: Option<u32>,
}

pub fn load_config(path: &Path) -> Result<TomlConfig, String> {
    let content =
        fs::read_to_string(path).map_err(|e| format!("Failed to read config file: {}", e))?;

    let content = interpolate_env_vars(&content)?;

    toml::from_str(&content).map_err(|e| format!("Failed to parse config file: {}", e))
}

/// Expand `${VAR}` and `${VAR:-default}`.
fn interpolate_env_vars(content: &str) -> Result<String, String> {
    let re = regex_lite::Regex::new(r"\$\{([^}]+)\}")
        .map_err(|e| format!("Invalid interpolation pattern: {}", e))?;
    let mut result = content.to_string();

    for cap in re.captures_iter(content) {
        let (full_match, [var_expr]) = cap.extract();

        let (var_name, default) = match var_expr.split_once(":-") {
            Some((name, default)) => (name, Some(default)),
            None => (var_expr, None),
        };

        let value = match std::env::var(var_name) {
            Ok(v) => v,
            Err(_) => match default {
                Some(d) => d.to_string(),
                None => return Err(format!("Environment variable '{}' not set", var_name)),
            },
        };

        result = result.replace(full_match, &value);
    }

    Ok(result)
}

/// CLI values win over the file, the file wins over the defaults.
pub fn merge_config(cli: &RunArgs, toml: Option<TomlConfig>) -> Result<RunConfig, String> {
    let toml = toml.unwrap_or_default();

    let addr = cli.target.clone().or(toml.target.addr);
    if addr.is_none() && !cli.serve_local {
        return Err(
            "Target address is required. Provide via argument, config file or --serve-local."
                .to_string(),
        );
    }

    let timeout = cli
        .timeout
        .or(toml.target.timeout)
        .unwrap_or(DEFAULT_TIMEOUT);
    let rate = cli.rate.or(toml.load.rate).unwrap_or(DEFAULT_RATE);
    let duration = cli
        .duration
        .or(toml.load.duration)
        .unwrap_or(DEFAULT_DURATION);
    let buffer = cli.buffer.or(toml.load.buffer).unwrap_or(DEFAULT_BUFFER);
    let max_in_flight = cli.max_in_flight.or(toml.load.max_in_flight);

    if buffer == 0 {
        return Err("Result buffer must hold at least one result".to_string());
    }

    Ok(RunConfig {
        addr: if cli.serve_local { None } else { addr },
        timeout,
        rate,
        duration,
        buffer,
        max_in_flight,
    })
}
