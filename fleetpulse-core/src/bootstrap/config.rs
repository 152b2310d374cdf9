//! Configuration loading

use anyhow::Result;

use crate::Config;

/// Load configuration from config file or environment variables
///
/// Config file search order:
/// 1. `explicit` (the `--config` command-line flag)
/// 2. FLEETPULSE_CONFIG_PATH environment variable
/// 3. ./config.yaml (current working directory)
/// 4. /config/config.yaml (Kubernetes mount path)
/// 5. Fall back to environment variables only
///
/// Runs before logging is initialised, so progress goes to stderr.
pub fn load_config(explicit: Option<&str>) -> Result<Config> {
    if let Some(path) = explicit {
        if !std::path::Path::new(path).exists() {
            return Err(anyhow::anyhow!("Config file {path} does not exist"));
        }
    }

    let config_path = explicit
        .map(str::to_string)
        .or_else(|| {
            std::env::var("FLEETPULSE_CONFIG_PATH")
                .ok()
                .filter(|p| std::path::Path::new(p).exists())
        })
        .or_else(|| {
            ["config.yaml", "/config/config.yaml"]
                .into_iter()
                .find(|p| std::path::Path::new(p).exists())
                .map(str::to_string)
        });

    let config = if let Some(path) = config_path {
        eprintln!("Loading config from {path}");
        Config::from_file(&path)
            .map_err(|e| anyhow::anyhow!("Failed to load {path}: {e}"))?
    } else {
        eprintln!("No config file found, using environment variables");
        Config::from_env()
            .map_err(|e| anyhow::anyhow!("Failed to load config from environment: {e}"))?
    };

    if let Err(errors) = config.validate() {
        for error in &errors {
            eprintln!("Config validation error: {error}");
        }
        return Err(anyhow::anyhow!(
            "Configuration validation failed with {} error(s): {}",
            errors.len(),
            errors.join("; ")
        ));
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unparseable_env_override_fails_startup() {
        std::env::remove_var("FLEETPULSE_CONFIG_PATH");
        std::env::set_var("FLEETPULSE_HUB__CHANNEL_CAPACITY", "abc");
        let result = load_config(None);
        std::env::remove_var("FLEETPULSE_HUB__CHANNEL_CAPACITY");

        assert!(result.is_err());
    }

    #[test]
    fn test_missing_explicit_file_fails_startup() {
        let err = load_config(Some("/nonexistent/fleetpulse.yaml")).unwrap_err();
        assert!(err.to_string().contains("does not exist"));
    }
}
