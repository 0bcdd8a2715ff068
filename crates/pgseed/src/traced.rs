//! Traced, cancellable database access.
//!
//! Every statement pgseed sends goes through [`TracedConn`], which opens a
//! `tracing` span per statement and races it against a cancellation token.

use std::future::Future;
use std::pin::Pin;

use tokio_postgres::types::ToSql;
use tokio_postgres::{CancelToken, NoTls, Row};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::{Error, Result};

type PgFuture<'a, T> =
    Pin<Box<dyn Future<Output = std::result::Result<T, tokio_postgres::Error>> + Send + 'a>>;

/// Something that can run statements: a client or an open transaction.
pub trait Connection: Send + Sync {
    /// Execute a statement, returning the number of rows affected.
    fn execute<'a>(&'a self, sql: &'a str, params: &'a [&'a (dyn ToSql + Sync)])
    -> PgFuture<'a, u64>;

    /// Execute a query, returning all rows.
    fn query<'a>(
        &'a self,
        sql: &'a str,
        params: &'a [&'a (dyn ToSql + Sync)],
    ) -> PgFuture<'a, Vec<Row>>;

    /// Execute a query, returning at most one row.
    fn query_opt<'a>(
        &'a self,
        sql: &'a str,
        params: &'a [&'a (dyn ToSql + Sync)],
    ) -> PgFuture<'a, Option<Row>>;

    /// Execute one or more statements separated by semicolons, without
    /// parameters, using the simple query protocol.
    fn batch_execute<'a>(&'a self, sql: &'a str) -> PgFuture<'a, ()>;

    /// Token for asking the server to abort whatever this session is running.
    fn cancel_token(&self) -> CancelToken;
}

impl Connection for tokio_postgres::Client {
    fn execute<'a>(
        &'a self,
        sql: &'a str,
        params: &'a [&'a (dyn ToSql + Sync)],
    ) -> PgFuture<'a, u64> {
        Box::pin(tokio_postgres::Client::execute(self, sql, params))
    }

    fn query<'a>(
        &'a self,
        sql: &'a str,
        params: &'a [&'a (dyn ToSql + Sync)],
    ) -> PgFuture<'a, Vec<Row>> {
        Box::pin(tokio_postgres::Client::query(self, sql, params))
    }

    fn query_opt<'a>(
        &'a self,
        sql: &'a str,
        params: &'a [&'a (dyn ToSql + Sync)],
    ) -> PgFuture<'a, Option<Row>> {
        Box::pin(tokio_postgres::Client::query_opt(self, sql, params))
    }

    fn batch_execute<'a>(&'a self, sql: &'a str) -> PgFuture<'a, ()> {
        Box::pin(tokio_postgres::Client::batch_execute(self, sql))
    }

    fn cancel_token(&self) -> CancelToken {
        tokio_postgres::Client::cancel_token(self)
    }
}

impl Connection for tokio_postgres::Transaction<'_> {
    fn execute<'a>(
        &'a self,
        sql: &'a str,
        params: &'a [&'a (dyn ToSql + Sync)],
    ) -> PgFuture<'a, u64> {
        Box::pin(tokio_postgres::Transaction::execute(self, sql, params))
    }

    fn query<'a>(
        &'a self,
        sql: &'a str,
        params: &'a [&'a (dyn ToSql + Sync)],
    ) -> PgFuture<'a, Vec<Row>> {
        Box::pin(tokio_postgres::Transaction::query(self, sql, params))
    }

    fn query_opt<'a>(
        &'a self,
        sql: &'a str,
        params: &'a [&'a (dyn ToSql + Sync)],
    ) -> PgFuture<'a, Option<Row>> {
        Box::pin(tokio_postgres::Transaction::query_opt(self, sql, params))
    }

    fn batch_execute<'a>(&'a self, sql: &'a str) -> PgFuture<'a, ()> {
        Box::pin(tokio_postgres::Transaction::batch_execute(self, sql))
    }

    fn cancel_token(&self) -> CancelToken {
        tokio_postgres::Transaction::cancel_token(self)
    }
}

/// A wrapper around a connection that logs every statement via tracing and,
/// when given a token, aborts the in-flight statement once it is cancelled.
///
/// On cancellation the server is asked to cancel the running query and the
/// call returns [`Error::Cancelled`]. Callers then drop their transaction,
/// which rolls it back.
pub struct TracedConn<'a, C: Connection> {
    conn: &'a C,
    cancel: Option<&'a CancellationToken>,
}

impl<'a, C: Connection> TracedConn<'a, C> {
    pub fn new(conn: &'a C) -> Self {
        Self { conn, cancel: None }
    }

    pub fn with_cancel(conn: &'a C, cancel: &'a CancellationToken) -> Self {
        Self {
            conn,
            cancel: Some(cancel),
        }
    }

    /// Execute a statement, returning the number of rows affected.
    pub async fn execute(&self, sql: &str, params: &[&(dyn ToSql + Sync)]) -> Result<u64> {
        let span = tracing::debug_span!(
            "db.execute",
            sql = %sql,
            params = params.len(),
            affected = tracing::field::Empty,
        );
        let affected = self
            .guarded(self.conn.execute(sql, params))
            .instrument(span.clone())
            .await?;
        span.record("affected", affected);
        Ok(affected)
    }

    /// Execute a query, returning all rows.
    pub async fn query(&self, sql: &str, params: &[&(dyn ToSql + Sync)]) -> Result<Vec<Row>> {
        let span = tracing::debug_span!(
            "db.query",
            sql = %sql,
            params = params.len(),
            rows = tracing::field::Empty,
        );
        let rows = self
            .guarded(self.conn.query(sql, params))
            .instrument(span.clone())
            .await?;
        span.record("rows", rows.len());
        Ok(rows)
    }

    /// Execute a query, returning at most one row.
    pub async fn query_opt(
        &self,
        sql: &str,
        params: &[&(dyn ToSql + Sync)],
    ) -> Result<Option<Row>> {
        let span = tracing::debug_span!(
            "db.query",
            sql = %sql,
            params = params.len(),
            rows = tracing::field::Empty,
        );
        let row = self
            .guarded(self.conn.query_opt(sql, params))
            .instrument(span.clone())
            .await?;
        span.record("rows", if row.is_some() { 1u64 } else { 0u64 });
        Ok(row)
    }

    /// Run a multi-statement script. Only the byte length is recorded, since
    /// user scripts can be large.
    pub async fn batch_execute(&self, sql: &str) -> Result<()> {
        let span = tracing::debug_span!("db.batch", bytes = sql.len());
        self.guarded(self.conn.batch_execute(sql))
            .instrument(span)
            .await
    }

    async fn guarded<T>(
        &self,
        fut: impl Future<Output = std::result::Result<T, tokio_postgres::Error>>,
    ) -> Result<T> {
        let Some(cancel) = self.cancel else {
            return Ok(fut.await?);
        };
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                if let Err(e) = self.conn.cancel_token().cancel_query(NoTls).await {
                    tracing::warn!(error = %e, "could not cancel the running statement");
                }
                Err(Error::Cancelled)
            }
            res = fut => Ok(res?),
        }
    }
}

/// Extension trait to get a traced wrapper from a connection.
pub trait ConnectionExt: Connection + Sized {
    /// Wrap this connection in a `TracedConn` for query logging.
    fn traced(&self) -> TracedConn<'_, Self> {
        TracedConn::new(self)
    }

    /// Wrap this connection in a `TracedConn` that honors `cancel`.
    fn traced_with<'a>(&'a self, cancel: &'a CancellationToken) -> TracedConn<'a, Self> {
        TracedConn::with_cancel(self, cancel)
    }
}

impl<C: Connection> ConnectionExt for C {}
