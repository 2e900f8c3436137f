//! # Environment Configuration
//!
//! A TOML file whose top-level tables are environment names:
//!
//! ```toml
//! [test]
//! backend = "file"
//! database = "tmp/test.redb"
//! log = "tmp/test.log"
//! schema = "schema.toml"
//! fixtures = "fixtures"
//!
//! [scratch]
//! backend = "memory"
//! schema = "schema.toml"
//! ```
//!
//! Relative paths are resolved against the directory holding the file.

use crate::error::{NetrelError, Result};
use crate::storage::Backend;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    #[default]
    File,
    Memory,
}

/// One named environment.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Environment {
    #[serde(skip)]
    pub name: String,
    #[serde(default)]
    pub backend: BackendKind,
    /// Database file; required for the file backend.
    #[serde(default)]
    pub database: Option<PathBuf>,
    /// Log file, truncated at harness boot.
    #[serde(default)]
    pub log: Option<PathBuf>,
    pub schema: PathBuf,
    /// Directory of fixture files.
    #[serde(default)]
    pub fixtures: Option<PathBuf>,
}

impl Environment {
    /// Storage backend described by this environment.
    pub fn backend(&self) -> Result<Backend> {
        match (self.backend, &self.database) {
            (BackendKind::Memory, _) => Ok(Backend::Memory),
            (BackendKind::File, Some(path)) => Ok(Backend::File(path.clone())),
            (BackendKind::File, None) => Err(NetrelError::Config(format!(
                "environment `{}` uses the file backend but sets no `database`",
                self.name
            ))),
        }
    }

    fn resolve(&mut self, base: &Path) {
        let join = |path: &mut PathBuf| {
            if path.is_relative() {
                *path = base.join(&*path);
            }
        };
        join(&mut self.schema);
        for path in [&mut self.database, &mut self.log, &mut self.fixtures]
            .into_iter()
            .flatten()
        {
            join(path);
        }
    }
}

/// All environments of one config file.
#[derive(Debug, Clone, Default)]
pub struct Config {
    environments: BTreeMap<String, Environment>,
}

impl Config {
    /// Parse a config document; relative paths are joined onto `base`.
    pub fn from_toml_str(source: &str, base: &Path) -> Result<Self> {
        let mut environments: BTreeMap<String, Environment> =
            toml::from_str(source).map_err(|e| NetrelError::Config(e.to_string()))?;
        for (name, env) in &mut environments {
            env.name = name.clone();
            env.resolve(base);
        }
        Ok(Self { environments })
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path)
            .map_err(|e| NetrelError::Io(format!("cannot read {}: {}", path.display(), e)))?;
        let base = path.parent().unwrap_or_else(|| Path::new(""));
        Self::from_toml_str(&source, base)
    }

    /// Look up an environment by name.
    pub fn environment(&self, name: &str) -> Result<&Environment> {
        self.environments.get(name).ok_or_else(|| {
            NetrelError::Config(format!(
                "no environment `{}` (known: {})",
                name,
                self.names().join(", ")
            ))
        })
    }

    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.environments.keys().map(String::as_str).collect()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
        [test]
        database = "tmp/test.redb"
        log = "tmp/test.log"
        schema = "schema.toml"
        fixtures = "/abs/fixtures"

        [scratch]
        backend = "memory"
        schema = "schema.toml"
    "#;

    #[test]
    fn resolves_relative_paths_against_base() {
        let config = Config::from_toml_str(SAMPLE, Path::new("/srv/app")).expect("parse");
        let test = config.environment("test").expect("test env");
        assert_eq!(test.name, "test");
        assert_eq!(test.schema, PathBuf::from("/srv/app/schema.toml"));
        assert_eq!(test.fixtures, Some(PathBuf::from("/abs/fixtures")));
        assert_eq!(
            test.backend().expect("backend"),
            Backend::File(PathBuf::from("/srv/app/tmp/test.redb"))
        );
        assert_eq!(config.names(), vec!["scratch", "test"]);
    }

    #[test]
    fn memory_backend_needs_no_database() {
        let config = Config::from_toml_str(SAMPLE, Path::new(".")).expect("parse");
        let scratch = config.environment("scratch").expect("scratch env");
        assert_eq!(scratch.backend().expect("backend"), Backend::Memory);
    }

    #[test]
    fn file_backend_without_database_is_rejected() {
        let config =
            Config::from_toml_str("[dev]\nschema = \"s.toml\"\n", Path::new(".")).expect("parse");
        let err = config.environment("dev").expect("dev").backend().unwrap_err();
        assert!(matches!(err, NetrelError::Config(_)));
    }

    #[test]
    fn unknown_environment_and_keys_are_errors() {
        let config = Config::from_toml_str(SAMPLE, Path::new(".")).expect("parse");
        assert!(matches!(
            config.environment("production"),
            Err(NetrelError::Config(_))
        ));
        assert!(Config::from_toml_str("[dev]\nschema = \"s\"\ncolour = 1\n", Path::new(".")).is_err());
    }
}
