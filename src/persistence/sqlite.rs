// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-powermeter project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! SQLite durable sink
//!
//! This module implements the durable sink on a local SQLite database. The
//! table layout is derived from the register map at startup: one row per
//! record, the timestamp plus one nullable REAL column per register.

use std::sync::Mutex;

use anyhow::{Context, Result};
use async_trait::async_trait;
use log::debug;
use rusqlite::{params_from_iter, types::Value, Connection};

use super::{RecordSink, SinkError};
use crate::acquisition::Record;
use crate::config::RegisterSpec;

/// Durable sink writing record batches to a SQLite database.
///
/// Thread-safe via internal Mutex (SQLite Connection is not Sync).
pub struct SqliteSink {
    conn: Mutex<Connection>,
    table: String,
    columns: Vec<String>,
    insert_sql: String,
}

impl SqliteSink {
    /// Open (or create) the database file and ensure the readings table.
    pub fn new(path: &str, table: &str, specs: &[RegisterSpec]) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open SQLite database at {}", path))?;
        Self::with_connection(conn, table, specs)
    }

    /// Create an in-memory sink (for testing).
    pub fn new_in_memory(table: &str, specs: &[RegisterSpec]) -> Result<Self> {
        let conn =
            Connection::open_in_memory().context("Failed to create in-memory SQLite database")?;
        Self::with_connection(conn, table, specs)
    }

    fn with_connection(conn: Connection, table: &str, specs: &[RegisterSpec]) -> Result<Self> {
        let columns: Vec<String> = specs.iter().map(|spec| spec.name.clone()).collect();

        let placeholders = (1..=columns.len() + 1)
            .map(|i| format!("?{}", i))
            .collect::<Vec<_>>()
            .join(", ");
        let insert_sql = format!(
            "INSERT INTO {} (timestamp, {}) VALUES ({})",
            table,
            columns.join(", "),
            placeholders
        );

        let sink = Self {
            conn: Mutex::new(conn),
            table: table.to_string(),
            columns,
            insert_sql,
        };
        sink.init_schema()?;
        Ok(sink)
    }

    /// Initialize database schema
    fn init_schema(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap();

        let column_defs = self
            .columns
            .iter()
            .map(|name| format!("{} REAL", name))
            .collect::<Vec<_>>()
            .join(",\n                ");
        conn.execute(
            &format!(
                "CREATE TABLE IF NOT EXISTS {} (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp TEXT NOT NULL,
                {}
            )",
                self.table, column_defs
            ),
            [],
        )?;

        conn.execute(
            &format!(
                "CREATE INDEX IF NOT EXISTS idx_{}_timestamp ON {}(timestamp)",
                self.table, self.table
            ),
            [],
        )?;

        Ok(())
    }

    /// Number of rows in the readings table (for tests and diagnostics).
    pub fn count(&self) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row(
            &format!("SELECT COUNT(*) FROM {}", self.table),
            [],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }
}

#[async_trait]
impl RecordSink for SqliteSink {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn write_batch(&self, batch: &[Record]) -> Result<(), SinkError> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare_cached(&self.insert_sql)?;
            for record in batch {
                let mut values: Vec<Value> = Vec::with_capacity(self.columns.len() + 1);
                values.push(Value::Text(record.format_timestamp()));
                for column in &self.columns {
                    match record.fields.get(column).copied().flatten() {
                        Some(v) => values.push(Value::Real(v)),
                        None => values.push(Value::Null),
                    }
                }
                stmt.execute(params_from_iter(values))?;
            }
        }
        tx.commit()?;
        debug!("Inserted {} rows into {}", batch.len(), self.table);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Local;
    use std::collections::BTreeMap;

    fn specs() -> Vec<RegisterSpec> {
        vec![
            RegisterSpec::scaled("voltage_l1", 4034, 0.1),
            RegisterSpec::decimal("frequency", 4019, 2, false),
        ]
    }

    fn record(voltage: Option<f64>, frequency: Option<f64>) -> Record {
        let mut fields = BTreeMap::new();
        fields.insert("voltage_l1".to_string(), voltage);
        fields.insert("frequency".to_string(), frequency);
        Record {
            timestamp: Local::now(),
            fields,
        }
    }

    #[tokio::test]
    async fn test_write_batch_inserts_rows() {
        let sink = SqliteSink::new_in_memory("readings", &specs()).unwrap();

        let batch = vec![
            record(Some(230.4), Some(50.02)),
            record(Some(229.8), Some(49.97)),
            record(Some(231.1), Some(50.01)),
        ];
        sink.write_batch(&batch).await.unwrap();
        assert_eq!(sink.count().unwrap(), 3);
    }

    #[tokio::test]
    async fn test_absent_field_stored_as_null() {
        let sink = SqliteSink::new_in_memory("readings", &specs()).unwrap();
        sink.write_batch(&[record(None, Some(50.0))]).await.unwrap();

        let conn = sink.conn.lock().unwrap();
        let (voltage, frequency): (Option<f64>, Option<f64>) = conn
            .query_row(
                "SELECT voltage_l1, frequency FROM readings",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .unwrap();
        assert_eq!(voltage, None);
        assert_eq!(frequency, Some(50.0));
    }

    #[tokio::test]
    async fn test_file_database_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("meter.db");
        let path = path.to_str().unwrap();

        {
            let sink = SqliteSink::new(path, "readings", &specs()).unwrap();
            sink.write_batch(&[record(Some(230.0), Some(50.0))])
                .await
                .unwrap();
        }

        let sink = SqliteSink::new(path, "readings", &specs()).unwrap();
        assert_eq!(sink.count().unwrap(), 1);
    }
}
