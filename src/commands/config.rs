use anyhow::{Context, Result};
use serde::Serialize;
use std::path::{Path, PathBuf};

use crate::config::{
    write_config_atomic, Config, ConfigSource, ResolvedConfig, PROJECT_CONFIG_FILENAME,
};

#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case", tag = "action")]
pub enum ConfigResult {
    ShowPath { source: ConfigSource },
    Written { path: PathBuf },
    Show { source: ConfigSource, config: Config },
}

pub fn cmd_config_show(config: &ResolvedConfig) -> ConfigResult {
    ConfigResult::Show {
        source: config.source.clone(),
        config: config.effective.clone(),
    }
}

pub fn cmd_config_path(config: &ResolvedConfig) -> ConfigResult {
    ConfigResult::ShowPath {
        source: config.source.clone(),
    }
}

/// Write the built-in defaults as a project config in `workdir`.
pub fn cmd_config_init(workdir: &Path, force: bool) -> Result<ConfigResult> {
    let path = workdir.join(PROJECT_CONFIG_FILENAME);
    write_config_atomic(&path, &Config::default(), force)?;
    log::info!("wrote {}", path.display());
    Ok(ConfigResult::Written { path })
}

pub fn format_config_human(result: &ConfigResult) -> Result<String> {
    Ok(match result {
        ConfigResult::ShowPath { source } => source.to_string(),
        ConfigResult::Written { path } => format!("Wrote {}", path.display()),
        ConfigResult::Show { source, config } => {
            let body = toml::to_string_pretty(config).context("failed to serialize config")?;
            format!("# source: {}\n{}", source, body.trim_end())
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::TestEnv;

    #[test]
    fn init_writes_loadable_defaults() {
        let env = TestEnv::new();
        let result = cmd_config_init(env.path(), false).unwrap();
        let path = env.path().join(PROJECT_CONFIG_FILENAME);
        assert!(matches!(result, ConfigResult::Written { path: ref p } if *p == path));

        let loaded = crate::config::load(None, env.path()).unwrap();
        assert_eq!(loaded.effective, Config::default());
    }

    #[test]
    fn init_twice_requires_force() {
        let env = TestEnv::new();
        cmd_config_init(env.path(), false).unwrap();
        assert!(cmd_config_init(env.path(), false).is_err());
        assert!(cmd_config_init(env.path(), true).is_ok());
    }

    #[test]
    fn show_renders_toml_with_source() {
        let env = TestEnv::new();
        let text = format_config_human(&cmd_config_show(&env.config())).unwrap();
        assert!(text.starts_with("# source: (defaults)\n"));
        assert!(text.contains("[installer]"));
        assert!(text.contains("package_template = \"{product}-{version}.msi\""));
    }

    #[test]
    fn path_reports_defaults_when_no_file() {
        let env = TestEnv::new();
        let text = format_config_human(&cmd_config_path(&env.config())).unwrap();
        assert_eq!(text, "(defaults)");
    }
}
