// Configuration loader — layers a TOML file over built-in defaults, with
// environment-variable overrides under the `SUBSPACE_` prefix.
//
// Mirrors the teacher's `config::loader::load_config`, swapping the
// Claude-settings-specific lookup for a generic layered `config` crate
// source chain.

use anyhow::{Context, Result};
use std::path::Path;

use super::settings::Settings;
use crate::errors::SubspaceError;

/// Load settings from an optional TOML file, falling back to defaults and
/// applying `SUBSPACE_*` environment overrides on top.
pub fn load_settings(path: Option<&Path>) -> Result<Settings> {
    let defaults = Settings::default();
    let defaults_json = serde_json::to_value(&defaults).context("failed to serialize defaults")?;

    let mut builder = config::Config::builder()
        .add_source(config::Config::try_from(&defaults_json).context("invalid defaults")?);

    if let Some(path) = path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path));
        } else {
            return Err(SubspaceError::ConfigError(format!(
                "config file not found: {}",
                path.display()
            ))
            .into());
        }
    }

    let built = builder
        .add_source(config::Environment::with_prefix("SUBSPACE").separator("__"))
        .build()
        .context("failed to build configuration")?;

    let settings: Settings = built
        .try_deserialize()
        .map_err(|e| SubspaceError::ConfigError(e.to_string()))?;

    validate(&settings)?;
    Ok(settings)
}

fn validate(settings: &Settings) -> Result<()> {
    if !settings.workspace_root.is_absolute() {
        return Err(SubspaceError::ConfigError(
            "workspace_root must be an absolute path".to_string(),
        )
        .into());
    }
    let share_sum: f64 = settings.memory.stage_shares.values().sum();
    if (share_sum - 1.0).abs() > 0.01 {
        return Err(SubspaceError::ConfigError(format!(
            "stage_shares must sum to ~1.0, got {share_sum}"
        ))
        .into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        let settings = load_settings(None).unwrap();
        assert_eq!(settings.sandbox.mem_mb_cap, 512);
    }

    #[test]
    fn missing_file_errors() {
        let result = load_settings(Some(Path::new("/nonexistent/subspace.toml")));
        assert!(result.is_err());
    }

    #[test]
    fn file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("subspace.toml");
        std::fs::write(
            &path,
            format!(
                "workspace_root = \"{}\"\ntemplate_root = \"{}\"\n\n[sandbox]\nmem_mb_cap = 1024\n",
                dir.path().join("ws").display(),
                dir.path().join("tmpl").display()
            ),
        )
        .unwrap();

        let settings = load_settings(Some(&path)).unwrap();
        assert_eq!(settings.sandbox.mem_mb_cap, 1024);
    }
}
