//! Defaults-then-file-then-env configuration loading.

use std::path::{Path, PathBuf};

use crate::{ClusterConfig, ConfigError};

/// Builds a [`ClusterConfig`] by layering, in increasing precedence:
/// built-in defaults, an optional TOML file, and `QKV_*` environment
/// variables.
pub struct ConfigLoader {
    file: Option<PathBuf>,
    env_prefix: String,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self { file: None, env_prefix: "QKV".to_string() }
    }

    /// Sets the TOML file to load, if any.
    pub fn with_file(mut self, path: impl AsRef<Path>) -> Self {
        self.file = Some(path.as_ref().to_path_buf());
        self
    }

    pub fn with_env_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.env_prefix = prefix.into();
        self
    }

    /// Loads and validates the configuration. Any failure here is fatal —
    /// the caller (the CLI) converts it to a non-zero exit via
    /// `anyhow::Context`.
    pub fn load(self) -> Result<ClusterConfig, ConfigError> {
        let mut builder = config::Config::builder();

        let defaults = ClusterConfig::default();
        builder = builder.add_source(config::Config::try_from(&defaults)?);

        if let Some(path) = &self.file {
            builder = builder.add_source(
                config::File::from(path.clone()).required(true).format(config::FileFormat::Toml),
            );
        }

        builder = builder.add_source(
            config::Environment::with_prefix(&self.env_prefix).separator("_").try_parsing(true),
        );

        let built = builder.build()?;
        let config: ClusterConfig = built.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemberConfig;
    use std::fs;

    #[test]
    fn loads_defaults_with_no_file() {
        let config = ConfigLoader::new().load().unwrap();
        assert_eq!(config.replica_id, 1);
        assert_eq!(config.members, vec![MemberConfig { id: 1, host: "127.0.0.1".into(), port: 5001 }]);
    }

    #[test]
    fn file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cluster.toml");
        fs::write(
            &path,
            r#"
            replica_id = 2
            engine = "bft"

            [[members]]
            id = 1
            host = "10.0.0.1"
            port = 6001

            [[members]]
            id = 2
            host = "10.0.0.2"
            port = 6002
            "#,
        )
        .unwrap();

        let config = ConfigLoader::new().with_file(&path).load().unwrap();
        assert_eq!(config.replica_id, 2);
        assert_eq!(config.engine, crate::EngineKind::Bft);
        assert_eq!(config.members.len(), 2);
    }

    #[test]
    fn missing_required_file_is_an_error() {
        let result = ConfigLoader::new().with_file("/nonexistent/cluster.toml").load();
        assert!(result.is_err());
    }

    #[test]
    fn invalid_config_fails_validation() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cluster.toml");
        fs::write(&path, "replica_id = 5\n\n[[members]]\nid = 1\nhost = \"h\"\nport = 1\n").unwrap();

        let result = ConfigLoader::new().with_file(&path).load();
        assert!(matches!(result, Err(ConfigError::SelfNotAMember(5))));
    }
}
