//! # netrel CLI Module
//!
//! ## Available Commands
//!
//! - `setup` - Apply the schema, load fixtures and index every network
//! - `tables` - List tables with their row counts
//! - `link` - Add a parent → child edge to a network
//! - `unlink` - Remove an edge by id
//! - `query` - Run a read-only network query

mod commands;

use clap::{Parser, Subcommand, ValueEnum};
use netrel_core::NetrelError;
use std::path::PathBuf;

pub use commands::*;

// =============================================================================
// CLI STRUCTURE
// =============================================================================

/// netrel - tree and DAG relationships over an embedded store
#[derive(Parser, Debug)]
#[command(name = "netrel")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to the environment configuration file
    #[arg(short, long, global = true, default_value = "database.toml")]
    pub config: PathBuf,

    /// Environment to use from the configuration file
    #[arg(short, long, global = true, default_value = "development")]
    pub env: String,

    /// Output in JSON format (for programmatic access)
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Recreate all tables, load fixtures and index every network
    Setup {
        /// Skip the fixture directory even if the environment names one
        #[arg(long)]
        no_fixtures: bool,
    },

    /// List tables and row counts
    Tables,

    /// Link CHILD under PARENT
    Link {
        network: String,
        parent: u64,
        child: u64,

        /// Relationship kind (join tables with a kind column only)
        #[arg(short, long)]
        kind: Option<String>,
    },

    /// Remove an edge by id
    Unlink { network: String, edge: u64 },

    /// Query a network
    Query {
        network: String,

        #[arg(value_enum)]
        op: QueryOp,

        /// Entity id (not needed for `roots` and `edges`)
        id: Option<u64>,

        /// Second entity, for `is-ancestor`
        #[arg(short, long)]
        other: Option<u64>,

        /// Relationship kind filter, for `connections`
        #[arg(short, long)]
        kind: Option<String>,
    },
}

/// Read-only network queries.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryOp {
    Parent,
    Parents,
    Children,
    Ancestors,
    Descendants,
    Siblings,
    State,
    IsAncestor,
    Roots,
    Edges,
    Connections,
}

impl QueryOp {
    /// Whether the query is about one entity.
    pub fn needs_id(self) -> bool {
        !matches!(self, Self::Roots | Self::Edges)
    }
}

// =============================================================================
// COMMAND EXECUTION
// =============================================================================

/// Execute the CLI with parsed arguments.
pub fn execute(cli: Cli) -> Result<(), NetrelError> {
    let json = cli.json;
    let ctx = Context::load(&cli.config, &cli.env)?;

    match cli.command {
        Commands::Setup { no_fixtures } => cmd_setup(&ctx, json, no_fixtures),
        Commands::Tables => cmd_tables(&ctx, json),
        Commands::Link {
            network,
            parent,
            child,
            kind,
        } => cmd_link(&ctx, json, &network, parent, child, kind.as_deref()),
        Commands::Unlink { network, edge } => cmd_unlink(&ctx, json, &network, edge),
        Commands::Query {
            network,
            op,
            id,
            other,
            kind,
        } => cmd_query(
            &ctx,
            json,
            &network,
            &QueryArgs {
                op,
                id,
                other,
                kind,
            },
        ),
    }
}
