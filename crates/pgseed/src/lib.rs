//! Schema and data snapshots for Postgres, read straight from the catalog.
//!
//! This crate provides:
//! - Schema dumps: executable DDL synthesized from `pg_catalog`, emitted in
//!   an order that creates every object after the objects it depends on
//! - Seeds: capture a subset of rows into `INSERT` statements and replay them
//!   in foreign-key order
//! - Migration flattening: replace applied migration files with a single
//!   baseline holding the current schema
//!
//! Literal and identifier rendering lives in [`pgseed_sql`].
//!
//! # Connections
//!
//! Every entry point takes a plain [`tokio_postgres::Client`]. Statements are
//! sent through [`TracedConn`], so running with `RUST_LOG=pgseed=debug` logs
//! each one in a `db.query` / `db.execute` / `db.batch` span, and each call
//! honors the [`CancellationToken`](tokio_util::sync::CancellationToken) in
//! its options.
//!
//! ```ignore
//! let (mut client, connection) = tokio_postgres::connect(url, NoTls).await?;
//! tokio::spawn(connection);
//!
//! let ddl = pgseed::dump_schema(&mut client, &DumpOptions::default()).await?;
//! ```
//!
//! # Transactions
//!
//! A schema dump reads from one `REPEATABLE READ` snapshot. A capture runs in
//! one transaction that is always rolled back. A replay runs in one
//! transaction that commits only if every table loaded.

mod catalog;
pub mod ddl;
mod error;
pub mod flatten;
pub mod migrations;
pub mod order;
pub mod seed;
mod table;
mod traced;

pub use ddl::{DumpOptions, ObjectKind, SchemaObject, assemble, dump_schema};
pub use error::{Error, Result};
pub use flatten::{FlattenOptions, FlattenOutcome, flatten};
pub use migrations::{DEFAULT_LEDGER, MigrationFile};
pub use order::{FkEdge, order_tables, resolve_order, reverse_order};
pub use seed::{CaptureOptions, ReplayStats, SeedArtifact, SeedSet, TableFilter, capture, replay};
pub use table::{ExcludeSet, TableRef};
pub use traced::{Connection, ConnectionExt, TracedConn};
