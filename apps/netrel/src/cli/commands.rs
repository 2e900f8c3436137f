//! # CLI Command Implementations

use super::QueryOp;
use netrel_core::{
    Config, Connection, EdgeId, EntityId, Environment, FixtureLoader, NetrelError, NetworkStore,
    ReadAccess, Schema, SchemaLoader,
};
use serde_json::{Value as Json, json};
use std::path::Path;

// =============================================================================
// CONTEXT
// =============================================================================

/// Everything a command needs: the selected environment, its schema and an
/// open connection.
pub struct Context {
    pub env: Environment,
    pub schema: Schema,
    pub conn: Connection,
}

impl Context {
    /// Read `config`, select `env` and open its database.
    pub fn load(config: &Path, env: &str) -> Result<Self, NetrelError> {
        let env = Config::from_path(config)?.environment(env)?.clone();
        let schema = Schema::from_path(&env.schema)?;
        let conn = Connection::open(&env.backend()?)?;
        tracing::debug!(env = %env.name, "context loaded");
        Ok(Self { env, schema, conn })
    }

    /// Handle for a network declared in the schema, validated against the
    /// current catalog.
    fn network<R: ReadAccess + ?Sized>(&self, r: &R, name: &str) -> Result<NetworkStore, NetrelError> {
        let config = self
            .schema
            .network(name)
            .cloned()
            .ok_or_else(|| NetrelError::InvalidArgument(format!("unknown network `{}`", name)))?;
        NetworkStore::attach(r, config)
    }
}

fn print_json(value: &Json) {
    println!(
        "{}",
        serde_json::to_string_pretty(value).unwrap_or_default()
    );
}

fn id_list(ids: impl IntoIterator<Item = EntityId>) -> String {
    let ids: Vec<String> = ids.into_iter().map(|id| id.to_string()).collect();
    if ids.is_empty() {
        "(none)".to_string()
    } else {
        ids.join(", ")
    }
}

// =============================================================================
// SETUP COMMAND
// =============================================================================

/// Recreate the schema, load fixtures and index every declared network.
pub fn cmd_setup(ctx: &Context, json_mode: bool, no_fixtures: bool) -> Result<(), NetrelError> {
    SchemaLoader::apply(&ctx.conn, &ctx.schema)?;

    let records = match (&ctx.env.fixtures, no_fixtures) {
        (Some(dir), false) => FixtureLoader::load_dir(&ctx.conn, dir)?.len(),
        _ => 0,
    };

    let mut networks = Vec::new();
    for config in ctx.schema.networks() {
        let store = NetworkStore::open(&ctx.conn, config.clone())?;
        let edges = store.edges(&ctx.conn.snapshot()?)?.len();
        networks.push((store.name().to_string(), edges));
    }

    if json_mode {
        let output = json!({
            "environment": ctx.env.name,
            "tables": ctx.schema.tables().len(),
            "fixtures": records,
            "networks": networks
                .iter()
                .map(|(name, edges)| json!({ "name": name, "edges": edges }))
                .collect::<Vec<_>>(),
        });
        print_json(&output);
    } else {
        println!("netrel setup ({})", ctx.env.name);
        println!("==================");
        println!("Tables:   {}", ctx.schema.tables().len());
        println!("Fixtures: {}", records);
        for (name, edges) in &networks {
            println!("Network {}: {} edges", name, edges);
        }
    }

    Ok(())
}

// =============================================================================
// TABLES COMMAND
// =============================================================================

/// List every table in the catalog with its row count.
pub fn cmd_tables(ctx: &Context, json_mode: bool) -> Result<(), NetrelError> {
    let snapshot = ctx.conn.snapshot()?;
    let mut tables = Vec::new();
    for spec in snapshot.table_specs()? {
        let rows = snapshot.count(&spec.name)?;
        tables.push((spec, rows));
    }

    if json_mode {
        let output: Vec<Json> = tables
            .iter()
            .map(|(spec, rows)| {
                json!({
                    "name": spec.name,
                    "rows": rows,
                    "columns": spec
                        .columns
                        .iter()
                        .map(|c| json!({ "name": c.name, "type": c.column_type.name(), "nullable": c.nullable }))
                        .collect::<Vec<_>>(),
                })
            })
            .collect();
        print_json(&Json::Array(output));
    } else if tables.is_empty() {
        println!("No tables. Run `netrel setup` first.");
    } else {
        for (spec, rows) in &tables {
            println!("{:<24} {:>8} rows", spec.name, rows);
        }
    }

    Ok(())
}

// =============================================================================
// LINK / UNLINK COMMANDS
// =============================================================================

/// Add `parent -> child` to a network and commit.
pub fn cmd_link(
    ctx: &Context,
    json_mode: bool,
    network: &str,
    parent: u64,
    child: u64,
    kind: Option<&str>,
) -> Result<(), NetrelError> {
    let mut tx = ctx.conn.begin()?;
    let store = ctx.network(&tx, network)?;
    let edge = store.add_child(&mut tx, EntityId(parent), EntityId(child), kind)?;
    tx.commit()?;

    if json_mode {
        print_json(&json!({ "network": network, "edge": edge, "parent": parent, "child": child }));
    } else {
        println!("Linked {} -> {} in {} (edge {})", parent, child, network, edge);
    }
    Ok(())
}

/// Remove an edge and commit.
pub fn cmd_unlink(
    ctx: &Context,
    json_mode: bool,
    network: &str,
    edge: u64,
) -> Result<(), NetrelError> {
    let mut tx = ctx.conn.begin()?;
    let store = ctx.network(&tx, network)?;
    let removed = store.remove_edge(&mut tx, EdgeId(edge))?;
    tx.commit()?;

    if json_mode {
        print_json(&json!({ "network": network, "removed": removed }));
    } else {
        println!(
            "Removed edge {} ({} -> {}) from {}",
            removed.id, removed.parent, removed.child, network
        );
    }
    Ok(())
}

// =============================================================================
// QUERY COMMAND
// =============================================================================

/// Arguments of one `query` invocation.
#[derive(Debug, Clone)]
pub struct QueryArgs {
    pub op: QueryOp,
    pub id: Option<u64>,
    pub other: Option<u64>,
    pub kind: Option<String>,
}

/// Run a query against committed state and print the result.
pub fn cmd_query(
    ctx: &Context,
    json_mode: bool,
    network: &str,
    args: &QueryArgs,
) -> Result<(), NetrelError> {
    let result = run_query(ctx, network, args)?;

    if json_mode {
        print_json(&result);
        return Ok(());
    }

    match &result {
        Json::Array(items) if items.iter().all(Json::is_u64) => {
            let ids = items.iter().filter_map(Json::as_u64).map(EntityId);
            println!("{}", id_list(ids));
        }
        Json::Array(edges) => {
            if edges.is_empty() {
                println!("(no edges)");
            }
            for edge in edges {
                let kind = edge["kind"].as_str().map(|k| format!(" [{}]", k));
                println!(
                    "  #{} {} -> {}{}",
                    edge["id"],
                    edge["parent"],
                    edge["child"],
                    kind.unwrap_or_default()
                );
            }
        }
        Json::Null => println!("(none)"),
        Json::String(s) => println!("{}", s),
        other => println!("{}", other),
    }
    Ok(())
}

/// Evaluate a query to a JSON value.
///
/// Entity lists become arrays of ids, `state` a string, `is-ancestor` a bool,
/// `parent` an id or null and `edges` an array of edge objects.
pub fn run_query(ctx: &Context, network: &str, args: &QueryArgs) -> Result<Json, NetrelError> {
    let snapshot = ctx.conn.snapshot()?;
    let store = ctx.network(&snapshot, network)?;

    let id = match (args.op.needs_id(), args.id) {
        (true, Some(id)) => EntityId(id),
        (true, None) => {
            return Err(NetrelError::InvalidArgument(format!(
                "`{:?}` needs an entity id",
                args.op
            )));
        }
        (false, _) => EntityId(0),
    };
    let ids = |list: Vec<EntityId>| json!(list.iter().map(|e| e.0).collect::<Vec<_>>());

    let value = match args.op {
        QueryOp::Parent => json!(store.parent(&snapshot, id)?.map(|p| p.0)),
        QueryOp::Parents => ids(store.parents(&snapshot, id)?),
        QueryOp::Children => ids(store.children(&snapshot, id)?),
        QueryOp::Ancestors => ids(store.ancestors(&snapshot, id)?),
        QueryOp::Descendants => ids(store.descendants(&snapshot, id)?),
        QueryOp::Siblings => ids(store.siblings(&snapshot, id)?.into_iter().collect()),
        QueryOp::State => json!(store.state(&snapshot, id)?.to_string()),
        QueryOp::IsAncestor => {
            let other = args.other.ok_or_else(|| {
                NetrelError::InvalidArgument("`is-ancestor` needs --other".to_string())
            })?;
            json!(store.is_ancestor_of(&snapshot, id, EntityId(other))?)
        }
        QueryOp::Roots => ids(store.roots(&snapshot)?),
        QueryOp::Edges => serde_json::to_value(store.edges(&snapshot)?)
            .map_err(|e| NetrelError::Serialization(e.to_string()))?,
        QueryOp::Connections => ids(store.connections(&snapshot, id, args.kind.as_deref())?),
    };
    Ok(value)
}

// =============================================================================
// TESTS
// =============================================================================
