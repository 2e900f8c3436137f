//! # Test Harness
//!
//! One `Harness` per test process, usually held in a `static OnceLock`.
//!
//! `boot` runs once:
//! 1. removes the environment's database file and truncates its log
//! 2. installs file logging
//! 3. opens the connection and applies the schema (drop and recreate)
//! 4. loads the fixture directory and indexes every declared network
//!
//! Each test then calls `isolated`, which hands the body a fresh write
//! transaction and rolls it back afterwards, whether the body returns `Ok`,
//! `Err` or panics. Tests sharing a harness therefore run one at a time and
//! each starts from the committed fixture state.

use crate::logging::init_file_logging;
use netrel_core::{
    Backend, Config, Connection, Environment, FixtureCache, FixtureLoader, FixtureSet,
    FixtureSource, NetrelError, NetworkStore, Result, SchemaLoader, Transaction,
};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

pub struct Harness {
    env: Environment,
    conn: Connection,
    networks: BTreeMap<String, NetworkStore>,
    fixtures: FixtureCache,
}

impl std::fmt::Debug for Harness {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Harness")
            .field("env", &self.env.name)
            .field("networks", &self.networks.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl Harness {
    /// Read `config` and boot the environment called `env`.
    pub fn from_config(config: impl AsRef<Path>, env: &str) -> Result<Self> {
        let config = Config::from_path(config)?;
        Self::boot(config.environment(env)?)
    }

    /// Reset the environment's artifacts and bring the database to the
    /// fixture state.
    pub fn boot(env: &Environment) -> Result<Self> {
        let backend = env.backend()?;
        if let Backend::File(path) = &backend {
            remove_if_present(path)?;
        }
        if let Some(log) = &env.log {
            init_file_logging(log)?;
        }

        let conn = Connection::open(&backend)?;
        let schema = SchemaLoader::load_path(&conn, &env.schema)?;
        let networks = {
            let snapshot = conn.snapshot()?;
            schema
                .networks()
                .iter()
                .map(|config| {
                    NetworkStore::attach(&snapshot, config.clone())
                        .map(|store| (config.name.clone(), store))
                })
                .collect::<Result<BTreeMap<_, _>>>()?
        };

        let harness = Self {
            env: env.clone(),
            conn,
            networks,
            fixtures: FixtureCache::new(),
        };
        let fixtures = harness.fixtures()?;
        tracing::info!(
            env = %harness.env.name,
            tables = schema.tables().len(),
            networks = harness.networks.len(),
            fixtures = fixtures.len(),
            "harness booted"
        );
        Ok(harness)
    }

    /// Fixture keys, loading them on first use.
    pub fn fixtures(&self) -> Result<Arc<FixtureSet>> {
        self.fixtures
            .get_or_load(&self.env.name, || self.load_fixtures())
    }

    fn load_fixtures(&self) -> Result<FixtureSet> {
        let sources = match &self.env.fixtures {
            Some(dir) => FixtureSource::read_dir(dir)?,
            None => Vec::new(),
        };
        let mut tx = self.conn.begin()?;
        let set = FixtureLoader::load_into(&mut tx, &sources)?;
        for store in self.networks.values() {
            let edges = store.rebuild(&mut tx)?;
            tracing::debug!(network = store.name(), edges, "network indexed");
        }
        tx.commit()?;
        Ok(set)
    }

    /// Run `body` in a transaction that is rolled back afterwards.
    ///
    /// Blocks until no other test holds the writer. An error from `body` wins
    /// over a failed rollback.
    pub fn isolated<T>(
        &self,
        body: impl FnOnce(&mut Transaction<'_>, &FixtureSet) -> Result<T>,
    ) -> Result<T> {
        let fixtures = self.fixtures()?;
        let mut tx = self.conn.begin()?;
        let result = body(&mut tx, &fixtures);
        finish(result, tx.rollback())
    }

    /// A network declared in the schema.
    pub fn network(&self, name: &str) -> Result<&NetworkStore> {
        self.networks
            .get(name)
            .ok_or_else(|| NetrelError::InvalidArgument(format!("unknown network `{}`", name)))
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub fn environment(&self) -> &Environment {
        &self.env
    }
}

/// The body's result, unless it succeeded and the rollback did not.
fn finish<T>(result: Result<T>, rolled_back: Result<()>) -> Result<T> {
    match (result, rolled_back) {
        (Err(e), Err(rollback)) => {
            tracing::warn!(error = %rollback, "rollback after failed test body also failed");
            Err(e)
        }
        (Err(e), Ok(())) => Err(e),
        (Ok(_), Err(rollback)) => Err(rollback),
        (Ok(value), Ok(())) => Ok(value),
    }
}

fn remove_if_present(path: &Path) -> Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(NetrelError::Io(format!(
            "cannot remove {}: {}",
            path.display(),
            e
        ))),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;

    fn rollback_failed() -> Result<()> {
        Err(NetrelError::Storage("rollback failed".to_string()))
    }

    #[test]
    fn body_error_wins_over_rollback_error() {
        let body: Result<()> = Err(NetrelError::InvalidArgument("body failed".to_string()));
        let err = finish(body, rollback_failed()).unwrap_err();
        assert!(matches!(err, NetrelError::InvalidArgument(ref m) if m == "body failed"));
    }

    #[test]
    fn rollback_error_surfaces_after_successful_body() {
        let err = finish(Ok(7), rollback_failed()).unwrap_err();
        assert!(matches!(err, NetrelError::Storage(_)));
        assert_eq!(finish(Ok(7), Ok(())).expect("clean"), 7);
    }
}
