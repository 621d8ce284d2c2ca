//! A single SQL Server session

use std::time::Instant;

use async_trait::async_trait;
use batchql_core::{DriverError, Notice, NoticeSender, Session};
use tiberius::Client;
use tokio::net::TcpStream;
use tokio_util::compat::Compat;

use crate::config::ServerAddress;
use crate::error::map_error;

pub(crate) type TdsClient = Client<Compat<TcpStream>>;

/// An open tiberius client. Batches are sent one at a time; the session is
/// unusable after `close`.
pub struct MssqlSession {
    client: Option<TdsClient>,
    address: ServerAddress,
}

impl MssqlSession {
    pub(crate) fn new(client: TdsClient, address: ServerAddress) -> Self {
        Self {
            client: Some(client),
            address,
        }
    }

    pub fn address(&self) -> &ServerAddress {
        &self.address
    }

    pub fn is_closed(&self) -> bool {
        self.client.is_none()
    }
}

#[async_trait]
impl Session for MssqlSession {
    #[tracing::instrument(skip_all, fields(server = %self.address))]
    async fn execute(
        &mut self,
        sql: &str,
        notices: &NoticeSender,
    ) -> Result<Option<u64>, DriverError> {
        let client = self
            .client
            .as_mut()
            .ok_or_else(|| DriverError::ConnectionBroken("session is closed".to_string()))?;
        let start = Instant::now();

        let result = if returns_rows(sql) {
            run_query(client, sql, notices).await
        } else {
            run_statement(client, sql, notices).await
        };

        match &result {
            Ok(rows) => tracing::debug!(
                rows = rows.unwrap_or_default(),
                duration_ms = start.elapsed().as_millis() as u64,
                "batch completed"
            ),
            Err(err) => tracing::debug!(error = %err, "batch failed"),
        }
        result
    }

    async fn close(&mut self) -> Result<(), DriverError> {
        if let Some(client) = self.client.take() {
            client.close().await.map_err(map_error)?;
            tracing::debug!(server = %self.address, "session closed");
        }
        Ok(())
    }
}

/// Run a batch that produces result sets, reporting the size of each
async fn run_query(
    client: &mut TdsClient,
    sql: &str,
    notices: &NoticeSender,
) -> Result<Option<u64>, DriverError> {
    let stream = client.simple_query(sql).await.map_err(map_error)?;
    let results = stream.into_results().await.map_err(map_error)?;

    let counts: Vec<u64> = results.iter().map(|rows| rows.len() as u64).collect();
    report_row_counts(&counts, notices);
    Ok(Some(counts.iter().sum()))
}

/// Run a batch of statements, reporting each statement's row count
async fn run_statement(
    client: &mut TdsClient,
    sql: &str,
    notices: &NoticeSender,
) -> Result<Option<u64>, DriverError> {
    let result = client.execute(sql, &[]).await.map_err(map_error)?;

    let counts = result.rows_affected();
    report_row_counts(counts, notices);
    Ok(Some(counts.iter().sum()))
}

/// Send a row count message per statement. Returns how many were delivered;
/// sending stops once the receiver is gone, since the engine has stopped
/// listening for this batch.
pub(crate) fn report_row_counts(counts: &[u64], notices: &NoticeSender) -> usize {
    for (sent, count) in counts.iter().enumerate() {
        if notices
            .send(Notice::Message(rows_affected_message(*count)))
            .is_err()
        {
            tracing::debug!(
                undelivered = counts.len() - sent,
                "notice receiver closed, dropping row counts"
            );
            return sent;
        }
    }
    counts.len()
}

pub(crate) fn rows_affected_message(count: u64) -> String {
    if count == 1 {
        "(1 row affected)".to_string()
    } else {
        format!("({} rows affected)", count)
    }
}

/// Whether the first statement of `sql` is a query. Leading comments are
/// skipped.
pub(crate) fn returns_rows(sql: &str) -> bool {
    let keyword: String = skip_comments(sql)
        .chars()
        .take_while(|c| c.is_ascii_alphabetic())
        .collect();
    keyword.eq_ignore_ascii_case("select") || keyword.eq_ignore_ascii_case("with")
}

fn skip_comments(mut sql: &str) -> &str {
    loop {
        sql = sql.trim_start();
        if let Some(rest) = sql.strip_prefix("--") {
            sql = rest.split_once('\n').map_or("", |(_, after)| after);
        } else if let Some(rest) = sql.strip_prefix("/*") {
            sql = skip_block_comment(rest);
        } else {
            return sql;
        }
    }
}

/// Skip past the end of a block comment whose opener was already consumed.
/// Block comments nest.
fn skip_block_comment(mut sql: &str) -> &str {
    let mut depth = 1;
    while depth > 0 {
        let open = sql.find("/*");
        let Some(close) = sql.find("*/") else {
            return "";
        };
        match open {
            Some(open) if open < close => {
                depth += 1;
                sql = &sql[open + 2..];
            }
            _ => {
                depth -= 1;
                sql = &sql[close + 2..];
            }
        }
    }
    sql
}
