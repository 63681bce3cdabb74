use super::types::{
    RawReplayConfig, RawSessionConfig, RawStewardConfig, ReplayConfig, StewardConfig,
};
use anyhow::{Context, Result};
use directories::ProjectDirs;
use std::path::{Path, PathBuf};

pub struct ConfigLoader;

impl ConfigLoader {
    /// Load merged configuration (user + project)
    pub fn load() -> Result<StewardConfig> {
        Self::load_with(None)
    }

    /// Load merged configuration, with `explicit` layered on top
    ///
    /// An explicit path must exist; the user and project files are optional.
    pub fn load_with(explicit: Option<&Path>) -> Result<StewardConfig> {
        let mut raw = RawStewardConfig::default();

        // Layer 1: User config
        if let Some(user_path) = Self::user_config_path()
            && user_path.exists()
        {
            raw = Self::merge_raw(raw, Self::read_raw(&user_path)?);
        }

        // Layer 2: Project config
        let project_path = Self::project_config_path();
        if project_path.exists() {
            raw = Self::merge_raw(raw, Self::read_raw(&project_path)?);
        }

        // Layer 3: --config
        if let Some(path) = explicit {
            raw = Self::merge_raw(raw, Self::read_raw(path)?);
        }

        Self::finalize(raw)
    }

    /// Get user config path (platform-specific)
    pub fn user_config_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", "steward").map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Get project config path
    /// Can be overridden with STEWARD_PROJECT_CONFIG_DIR env var (useful for isolated tests)
    pub fn project_config_path() -> PathBuf {
        if let Ok(dir) = std::env::var("STEWARD_PROJECT_CONFIG_DIR") {
            PathBuf::from(dir).join("config.toml")
        } else {
            PathBuf::from(".steward/config.toml")
        }
    }

    fn read_raw(path: &Path) -> Result<RawStewardConfig> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        toml::from_str(&contents).with_context(|| format!("parsing config {}", path.display()))
    }

    /// Merge two raw configs (overlay values override base only if explicitly set)
    fn merge_raw(base: RawStewardConfig, overlay: RawStewardConfig) -> RawStewardConfig {
        RawStewardConfig {
            session: RawSessionConfig {
                session_timeout: overlay.session.session_timeout.or(base.session.session_timeout),
                closed_retention: overlay
                    .session
                    .closed_retention
                    .or(base.session.closed_retention),
                check_expiration_on_apply: overlay
                    .session
                    .check_expiration_on_apply
                    .or(base.session.check_expiration_on_apply),
            },
            replay: RawReplayConfig {
                stop_on_error: overlay.replay.stop_on_error.or(base.replay.stop_on_error),
            },
        }
    }

    /// Convert raw config to final config with defaults applied
    fn finalize(raw: RawStewardConfig) -> Result<StewardConfig> {
        let session = raw.session.finalize();
        session.validate()?;
        Ok(StewardConfig {
            session,
            replay: ReplayConfig {
                stop_on_error: raw.replay.stop_on_error.unwrap_or(false),
            },
        })
    }

    /// Load config from a specific path (for testing)
    #[cfg(test)]
    pub fn load_from_path(path: &Path) -> Result<StewardConfig> {
        if path.exists() {
            Self::finalize(Self::read_raw(path)?)
        } else {
            Ok(StewardConfig::default())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;
    use tempfile::TempDir;

    fn raw(timeout: Option<u64>, retention: Option<u64>, stop: Option<bool>) -> RawStewardConfig {
        RawStewardConfig {
            session: RawSessionConfig {
                session_timeout: timeout,
                closed_retention: retention,
                check_expiration_on_apply: None,
            },
            replay: RawReplayConfig {
                stop_on_error: stop,
            },
        }
    }

    // ==================== Load Tests ====================

    #[test]
    fn test_load_nonexistent_returns_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nonexistent.toml");

        let config = ConfigLoader::load_from_path(&path).unwrap();

        assert_eq!(config.session.session_timeout, 1_000);
        assert!(!config.replay.stop_on_error);
    }

    #[test]
    fn test_load_from_valid_toml() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.toml");

        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            r#"
[session]
session_timeout = 50
check_expiration_on_apply = true

[replay]
stop_on_error = true
"#
        )
        .unwrap();

        let config = ConfigLoader::load_from_path(&path).unwrap();

        assert_eq!(config.session.session_timeout, 50);
        assert_eq!(config.session.closed_retention, 100);
        assert!(config.session.check_expiration_on_apply);
        assert!(config.replay.stop_on_error);
    }

    #[test]
    fn test_load_invalid_toml_returns_error() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("invalid.toml");

        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "this is not valid toml {{{{").unwrap();

        let result = ConfigLoader::load_from_path(&path);
        assert!(result.is_err());
    }

    #[test]
    fn test_load_zero_timeout_is_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.toml");
        std::fs::write(&path, "[session]\nsession_timeout = 0\n").unwrap();

        let err = ConfigLoader::load_from_path(&path).unwrap_err();

        assert!(err.to_string().contains("session_timeout"));
    }

    // ==================== Merge Tests ====================

    #[test]
    fn test_merge_raw_overlay_overrides_base() {
        let base = raw(Some(10), Some(5), Some(false));
        let overlay = raw(Some(20), None, Some(true));

        let merged = ConfigLoader::merge_raw(base, overlay);

        assert_eq!(merged.session.session_timeout, Some(20));
        // overlay's None falls through to base value via .or()
        assert_eq!(merged.session.closed_retention, Some(5));
        assert_eq!(merged.replay.stop_on_error, Some(true));
    }

    #[test]
    fn test_merge_raw_none_preserves_base() {
        let base = raw(Some(30), Some(7), Some(true));
        let overlay = raw(None, None, None);

        let merged = ConfigLoader::merge_raw(base, overlay);

        assert_eq!(merged.session.session_timeout, Some(30));
        assert_eq!(merged.session.closed_retention, Some(7));
        assert_eq!(merged.replay.stop_on_error, Some(true));
    }

    // ==================== Path Tests ====================

    #[test]
    fn test_user_config_path_returns_some() {
        let path = ConfigLoader::user_config_path();
        assert!(path.is_some());
        let path = path.unwrap();
        assert!(path.to_string_lossy().contains("steward"));
        assert!(path.to_string_lossy().contains("config.toml"));
    }

    #[test]
    #[serial]
    fn test_project_config_path() {
        let path = ConfigLoader::project_config_path();
        assert_eq!(path, PathBuf::from(".steward/config.toml"));
    }

    #[test]
    #[serial]
    fn test_project_config_dir_override_and_explicit_layer() {
        let project = TempDir::new().unwrap();
        std::fs::write(
            project.path().join("config.toml"),
            "[session]\nsession_timeout = 40\nclosed_retention = 4\n",
        )
        .unwrap();
        let explicit_dir = TempDir::new().unwrap();
        let explicit = explicit_dir.path().join("replay.toml");
        std::fs::write(&explicit, "[session]\nsession_timeout = 80\n").unwrap();

        // SAFETY: serialized with every other test that reads this variable
        unsafe { std::env::set_var("STEWARD_PROJECT_CONFIG_DIR", project.path()) };
        let project_path = ConfigLoader::project_config_path();
        let config = ConfigLoader::load_with(Some(&explicit));
        unsafe { std::env::remove_var("STEWARD_PROJECT_CONFIG_DIR") };

        assert_eq!(project_path, project.path().join("config.toml"));
        let config = config.unwrap();
        assert_eq!(config.session.session_timeout, 80);
        assert_eq!(config.session.closed_retention, 4);
    }

    #[test]
    fn test_missing_explicit_config_is_an_error() {
        let temp_dir = TempDir::new().unwrap();
        let result = ConfigLoader::load_with(Some(&temp_dir.path().join("missing.toml")));
        assert!(result.is_err());
    }
}
