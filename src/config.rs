use anyhow::{Context, Result, anyhow};
use regex::Regex;
use serde::Deserialize;
use std::path::PathBuf;
use std::{env, fs, path::Path};
use tracing::info;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    pub webserver: Webserver,
    /// Defaults document for Kappnav instances.
    pub defaults: PathBuf,
    /// Defaults document for the `default` KindActionMapping. Not converged
    /// when unset.
    #[serde(default)]
    pub kam_defaults: Option<PathBuf>,
    /// Config map template directories. The map type label is taken from the
    /// directory name.
    #[serde(default)]
    pub templates: Vec<PathBuf>,
    /// Watch a single namespace instead of the whole cluster.
    #[serde(default)]
    pub watch_namespace: Option<String>,
    #[serde(default)]
    pub log_json: bool,
}

#[derive(Debug, Deserialize)]
pub struct Webserver {
    pub port: u16,
}

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config> {
    info!("Loading config from file {}", path.as_ref().display());
    let yaml_str = fs::read_to_string(&path)
        .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;

    let expanded = expand_env_vars(&yaml_str)?;

    let config = serde_yaml_ng::from_str(&expanded)
        .context("Failed to parse YAML config after environment variable expansion")?;

    Ok(config)
}

/// Replaces `${VAR}` placeholders with environment variables values.
/// Returns an error if any env var is missing or regex fails.
fn expand_env_vars(input: &str) -> Result<String> {
    let re =
        Regex::new(r"\$\{([^}]+)}").context("Invalid regex pattern for env var substitution")?;

    let mut result = String::with_capacity(input.len());
    let mut last = 0;
    for caps in re.captures_iter(input) {
        let Some(placeholder) = caps.get(0) else {
            continue;
        };
        let var_name = &caps[1];
        let value = env::var(var_name)
            .map_err(|_| anyhow!("Missing environment variable: {}", var_name))?;
        result.push_str(&input[last..placeholder.start()]);
        result.push_str(&value);
        last = placeholder.end();
    }
    result.push_str(&input[last..]);

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;

    #[test]
    fn test_expand_env_vars_success() {
        unsafe {
            env::set_var("KAPPNAV_TEST_VAR", "value123");
        }
        let input = "This is a test: ${KAPPNAV_TEST_VAR}";
        let expanded = expand_env_vars(input).expect("Expansion should succeed");
        assert_eq!(expanded, "This is a test: value123");
        unsafe {
            env::remove_var("KAPPNAV_TEST_VAR");
        }
    }

    #[test]
    fn test_expand_env_vars_missing_var() {
        let input = "This will fail: ${KAPPNAV_MISSING_VAR}";
        let error = expand_env_vars(input).unwrap_err();
        assert_eq!(
            error.to_string(),
            "Missing environment variable: KAPPNAV_MISSING_VAR"
        );
    }

    #[test]
    fn test_expand_env_vars_multiple_vars() {
        unsafe {
            env::set_var("KAPPNAV_VAR1", "foo");
            env::set_var("KAPPNAV_VAR2", "bar");
        }
        let input = "${KAPPNAV_VAR1} and ${KAPPNAV_VAR2}";
        let expanded = expand_env_vars(input).expect("Expansion should succeed");
        assert_eq!(expanded, "foo and bar");
        unsafe {
            env::remove_var("KAPPNAV_VAR1");
            env::remove_var("KAPPNAV_VAR2");
        }
    }

    #[test]
    fn test_expand_env_vars_no_vars() {
        let input = "No variables here";
        let expanded = expand_env_vars(input).expect("Expansion should succeed");
        assert_eq!(expanded, input);
    }

    #[test]
    fn test_load_config_file() {
        unsafe {
            env::set_var("KAPPNAV_TEST_NAMESPACE", "kappnav");
        }
        let yaml_content = r#"
        webserver:
          port: 8080
        defaults: /etc/kappnav/defaults/kappnav.yaml
        kamDefaults: /etc/kappnav/defaults/kam.yaml
        templates:
          - maps/action
          - maps/sections
          - maps/status
        watchNamespace: ${KAPPNAV_TEST_NAMESPACE}
        logJson: true
        "#;

        let tmp_file = tempfile::NamedTempFile::new().expect("Failed to create temp file");
        let path = tmp_file.path();
        fs::write(path, yaml_content).expect("Failed to write to temp file");

        let config = load_config(path).expect("Should load config");

        assert_eq!(config.webserver.port, 8080);
        assert_eq!(
            config.defaults,
            PathBuf::from("/etc/kappnav/defaults/kappnav.yaml")
        );
        assert!(config.kam_defaults.is_some());
        assert_eq!(config.templates.len(), 3);
        assert_eq!(config.watch_namespace.as_deref(), Some("kappnav"));
        assert!(config.log_json);
        unsafe {
            env::remove_var("KAPPNAV_TEST_NAMESPACE");
        }
    }

    #[test]
    fn test_load_minimal_config_file() {
        let tmp_file = tempfile::NamedTempFile::new().expect("Failed to create temp file");
        fs::write(
            tmp_file.path(),
            "webserver:\n  port: 9090\ndefaults: kappnav.yaml\n",
        )
        .expect("Failed to write to temp file");

        let config = load_config(tmp_file.path()).expect("Should load config");
        assert_eq!(config.webserver.port, 9090);
        assert!(config.kam_defaults.is_none());
        assert!(config.templates.is_empty());
        assert!(config.watch_namespace.is_none());
        assert!(!config.log_json);
    }
}
