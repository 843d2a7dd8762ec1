use anyhow::{bail, Context, Result};
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_BINARY: &str = "default-name";
pub const DEFAULT_BRANCH: &str = "master";

#[derive(Clone)]
pub struct Config {
    /// `owner/name` of the GitHub repository to deploy.
    pub repo: String,
    pub webhook_secret: String,
    pub listen_address: String,
    /// Artifact name. Also keys the side directories.
    pub binary_name: String,
    pub deploy_branch: String,
    pub build_command: Vec<String>,
    /// Artifact location relative to a side directory.
    pub artifact_path: PathBuf,
    pub port_flag: String,
    pub base_port: u16,
    pub work_root: PathBuf,
    pub command_timeout: Duration,
    /// `None` disables the readiness probe.
    pub readiness_timeout: Option<Duration>,
    pub github_token: Option<String>,
    /// Append logs here instead of writing them to stdout.
    pub log_path: Option<PathBuf>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Build a config from any variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let repo = lookup("SIDESWAP_REPO")
            .filter(|s| !s.trim().is_empty())
            .context("SIDESWAP_REPO environment variable is required")?;
        if !repo.contains('/') {
            bail!("SIDESWAP_REPO must look like owner/name, got {:?}", repo);
        }

        let webhook_secret = parse_webhook_secret(lookup("SIDESWAP_WEBHOOK_SECRET"))?;

        let listen_address =
            lookup("SIDESWAP_LISTEN").unwrap_or_else(|| "localhost:8080".to_string());

        let binary_name = lookup("SIDESWAP_BINARY").unwrap_or_else(|| DEFAULT_BINARY.to_string());

        let deploy_branch =
            lookup("SIDESWAP_BRANCH").unwrap_or_else(|| DEFAULT_BRANCH.to_string());

        let build_command = parse_build_command(lookup("SIDESWAP_BUILD_COMMAND"), &binary_name)?;

        let artifact_path = lookup("SIDESWAP_ARTIFACT_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(&binary_name));

        let port_flag = lookup("SIDESWAP_PORT_FLAG").unwrap_or_else(|| "-hostport".to_string());

        let base_port: u16 = parse_number(
            "SIDESWAP_BASE_PORT",
            lookup("SIDESWAP_BASE_PORT"),
            8080,
        )?;
        // Side 2 binds base + 2
        if base_port > u16::MAX - 2 {
            bail!("SIDESWAP_BASE_PORT must leave room for two sides");
        }

        let work_root = lookup("SIDESWAP_WORK_ROOT")
            .map(PathBuf::from)
            .unwrap_or_else(env::temp_dir);

        let command_timeout = Duration::from_secs(parse_number(
            "SIDESWAP_COMMAND_TIMEOUT_SECS",
            lookup("SIDESWAP_COMMAND_TIMEOUT_SECS"),
            600,
        )?);

        let readiness_timeout = parse_readiness_timeout(lookup("SIDESWAP_READINESS_TIMEOUT_SECS"))?;

        let github_token = lookup("SIDESWAP_GITHUB_TOKEN").filter(|s| !s.trim().is_empty());

        let log_path = lookup("SIDESWAP_LOG_PATH")
            .filter(|s| !s.trim().is_empty())
            .map(PathBuf::from);

        Ok(Config {
            repo,
            webhook_secret,
            listen_address,
            binary_name,
            deploy_branch,
            build_command,
            artifact_path,
            port_flag,
            base_port,
            work_root,
            command_timeout,
            readiness_timeout,
            github_token,
            log_path,
        })
    }
}

/// The webhook secret must be present and non-blank.
pub fn parse_webhook_secret(value: Option<String>) -> Result<String> {
    match value {
        Some(secret) if !secret.trim().is_empty() => Ok(secret),
        Some(_) => bail!("SIDESWAP_WEBHOOK_SECRET must not be empty"),
        None => bail!("SIDESWAP_WEBHOOK_SECRET environment variable is required"),
    }
}

/// Split a whitespace-separated build command, defaulting to a Go build of
/// `binary_name`.
pub fn parse_build_command(value: Option<String>, binary_name: &str) -> Result<Vec<String>> {
    let Some(value) = value else {
        return Ok(vec![
            "go".to_string(),
            "build".to_string(),
            "-o".to_string(),
            binary_name.to_string(),
        ]);
    };

    let parts: Vec<String> = value.split_whitespace().map(str::to_string).collect();
    if parts.is_empty() {
        bail!("SIDESWAP_BUILD_COMMAND must not be empty");
    }
    Ok(parts)
}

/// `0` turns the probe off.
pub fn parse_readiness_timeout(value: Option<String>) -> Result<Option<Duration>> {
    let secs: u64 = parse_number("SIDESWAP_READINESS_TIMEOUT_SECS", value, 30)?;
    Ok((secs > 0).then(|| Duration::from_secs(secs)))
}

fn parse_number<T>(name: &str, value: Option<String>, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match value {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .with_context(|| format!("{} must be a valid number, got {:?}", name, raw)),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name: &str| vars.get(name).cloned()
    }

    fn minimal() -> Vec<(&'static str, &'static str)> {
        vec![
            ("SIDESWAP_REPO", "octo/app"),
            ("SIDESWAP_WEBHOOK_SECRET", "hunter2"),
        ]
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_lookup(lookup_from(&minimal())).unwrap();

        assert_eq!(config.repo, "octo/app");
        assert_eq!(config.listen_address, "localhost:8080");
        assert_eq!(config.binary_name, "default-name");
        assert_eq!(config.deploy_branch, "master");
        assert_eq!(
            config.build_command,
            vec!["go", "build", "-o", "default-name"]
        );
        assert_eq!(config.artifact_path, PathBuf::from("default-name"));
        assert_eq!(config.port_flag, "-hostport");
        assert_eq!(config.base_port, 8080);
        assert_eq!(config.work_root, env::temp_dir());
        assert_eq!(config.command_timeout, Duration::from_secs(600));
        assert_eq!(config.readiness_timeout, Some(Duration::from_secs(30)));
        assert_eq!(config.github_token, None);
        assert_eq!(config.log_path, None);
    }

    #[test]
    fn test_binary_name_drives_build_and_artifact_defaults() {
        let mut vars = minimal();
        vars.push(("SIDESWAP_BINARY", "shop"));
        let config = Config::from_lookup(lookup_from(&vars)).unwrap();

        assert_eq!(config.build_command, vec!["go", "build", "-o", "shop"]);
        assert_eq!(config.artifact_path, PathBuf::from("shop"));
    }

    #[test]
    fn test_missing_repo_is_fatal() {
        let err = Config::from_lookup(lookup_from(&[("SIDESWAP_WEBHOOK_SECRET", "s")]))
            .err()
            .unwrap();
        assert!(err.to_string().contains("SIDESWAP_REPO"));
    }

    #[test]
    fn test_repo_without_owner_is_rejected() {
        let vars = [
            ("SIDESWAP_REPO", "app"),
            ("SIDESWAP_WEBHOOK_SECRET", "s"),
        ];
        assert!(Config::from_lookup(lookup_from(&vars)).is_err());
    }

    #[test]
    fn test_malformed_port_is_fatal() {
        let mut vars = minimal();
        vars.push(("SIDESWAP_BASE_PORT", "eighty"));
        let err = Config::from_lookup(lookup_from(&vars)).err().unwrap();
        assert!(err.to_string().contains("SIDESWAP_BASE_PORT"));
    }

    #[test]
    fn test_base_port_must_fit_both_sides() {
        let mut vars = minimal();
        vars.push(("SIDESWAP_BASE_PORT", "65534"));
        assert!(Config::from_lookup(lookup_from(&vars)).is_err());
    }

    #[test]
    fn test_parse_webhook_secret() {
        assert!(parse_webhook_secret(None).is_err());
        assert!(parse_webhook_secret(Some("".to_string())).is_err());
        assert!(parse_webhook_secret(Some(" \t".to_string())).is_err());
        assert_eq!(
            parse_webhook_secret(Some("s3cret".to_string())).unwrap(),
            "s3cret"
        );
    }

    #[test]
    fn test_parse_build_command() {
        assert_eq!(
            parse_build_command(Some("cargo build --release".to_string()), "x").unwrap(),
            vec!["cargo", "build", "--release"]
        );
        assert!(parse_build_command(Some("   ".to_string()), "x").is_err());
    }

    #[test]
    fn test_parse_readiness_timeout() {
        assert_eq!(parse_readiness_timeout(Some("0".to_string())).unwrap(), None);
        assert_eq!(
            parse_readiness_timeout(Some("5".to_string())).unwrap(),
            Some(Duration::from_secs(5))
        );
        assert!(parse_readiness_timeout(Some("-1".to_string())).is_err());
    }

    #[test]
    fn test_blank_optional_values_are_unset() {
        let mut vars = minimal();
        vars.push(("SIDESWAP_GITHUB_TOKEN", "  "));
        vars.push(("SIDESWAP_LOG_PATH", ""));
        let config = Config::from_lookup(lookup_from(&vars)).unwrap();

        assert_eq!(config.github_token, None);
        assert_eq!(config.log_path, None);
    }
}
