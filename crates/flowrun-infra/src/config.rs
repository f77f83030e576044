//! Configuration file loader.
//!
//! Looks for `flowrun.toml` in the working directory, then
//! `<config_dir>/flowrun/config.toml`. Falls back to defaults when neither
//! exists or the file found is malformed.

use std::path::{Path, PathBuf};

use flowrun_types::config::FlowConfig;

/// File name looked up in the working directory.
pub const LOCAL_CONFIG_FILE: &str = "flowrun.toml";

/// Candidate configuration files, most specific first.
pub fn config_candidates(work_dir: &Path) -> Vec<PathBuf> {
    let mut candidates = vec![work_dir.join(LOCAL_CONFIG_FILE)];
    if let Some(dir) = dirs::config_dir() {
        candidates.push(dir.join("flowrun").join("config.toml"));
    }
    candidates
}

/// Load the first configuration file that exists among
/// [`config_candidates`].
pub async fn load_config(work_dir: &Path) -> FlowConfig {
    for path in config_candidates(work_dir) {
        if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            return load_config_file(&path).await;
        }
    }
    tracing::debug!("no configuration file found, using defaults");
    FlowConfig::default()
}

/// Load configuration from `path`.
///
/// - A missing file yields [`FlowConfig::default()`].
/// - A file that cannot be read or parsed logs a warning and yields the
///   default.
pub async fn load_config_file(path: &Path) -> FlowConfig {
    let content = match tokio::fs::read_to_string(path).await {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!("No config at {}, using defaults", path.display());
            return FlowConfig::default();
        }
        Err(err) => {
            tracing::warn!("Failed to read {}: {err}, using defaults", path.display());
            return FlowConfig::default();
        }
    };

    match toml::from_str::<FlowConfig>(&content) {
        Ok(config) => {
            tracing::debug!(path = %path.display(), "loaded configuration");
            config
        }
        Err(err) => {
            tracing::warn!("Failed to parse {}: {err}, using defaults", path.display());
            FlowConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowrun_types::config::Discovery;
    use tempfile::TempDir;

    #[tokio::test]
    async fn missing_file_returns_default() {
        let tmp = TempDir::new().unwrap();
        let config = load_config_file(&tmp.path().join("flowrun.toml")).await;
        assert!(config.engine.root.is_root());
        assert_eq!(config.engine.discovery, Discovery::NamedChildren);
    }

    #[tokio::test]
    async fn local_file_is_preferred() {
        let tmp = TempDir::new().unwrap();
        tokio::fs::write(
            tmp.path().join(LOCAL_CONFIG_FILE),
            r#"
[engine]
root = "command.build"
discovery = "by_shape"
"#,
        )
        .await
        .unwrap();

        let config = load_config(tmp.path()).await;
        assert_eq!(config.engine.root.to_string(), "command.build");
        assert_eq!(config.engine.discovery, Discovery::ByShape);
    }

    #[tokio::test]
    async fn invalid_file_returns_default() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join(LOCAL_CONFIG_FILE);
        tokio::fs::write(&path, "this is not { valid toml !!!")
            .await
            .unwrap();

        let config = load_config_file(&path).await;
        assert!(config.engine.root.is_root());
        assert!(!config.engine.allow_incomplete);
    }

    #[test]
    fn local_candidate_comes_first() {
        let candidates = config_candidates(Path::new("/work"));
        assert_eq!(candidates[0], Path::new("/work/flowrun.toml"));
    }
}
