//! # netrel-testkit
//!
//! Boots a netrel environment for a test run and isolates every test in its
//! own transaction.
//!
//! ```no_run
//! use netrel_testkit::Harness;
//!
//! let harness = Harness::from_config("tests/data/database.toml", "test")?;
//! harness.isolated(|tx, fixtures| {
//!     let family = harness.network("family")?;
//!     let mum = fixtures.key("people", "mum")?;
//!     let kid = fixtures.key("people", "kid")?;
//!     family.add_child(tx, mum, kid, None)?;
//!     Ok(())
//! })?;
//! # Ok::<(), netrel_core::NetrelError>(())
//! ```

mod harness;
mod logging;

pub use harness::Harness;
pub use logging::{LOG_ENV, init_file_logging};
