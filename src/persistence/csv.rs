// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-powermeter project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Daily CSV best-effort sink
//!
//! This module appends record batches to a daily CSV file
//! (`<prefix>_YYYY-MM-DD.csv`). The header is written when a file is first
//! created; absent fields become empty cells. Appends to the target file
//! are serialized by an internal lock since concurrent writers would
//! corrupt it.

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Local;
use log::debug;
use tokio::sync::Mutex;

use super::{RecordSink, SinkError};
use crate::acquisition::Record;
use crate::config::{CsvSinkConfig, RegisterSpec};

/// Best-effort sink writing daily CSV files.
pub struct CsvSink {
    directory: PathBuf,
    prefix: String,
    columns: Vec<String>,
    write_lock: Mutex<()>,
}

impl CsvSink {
    /// Create a sink for the configured directory and register map.
    pub fn new(config: &CsvSinkConfig, specs: &[RegisterSpec]) -> Self {
        Self {
            directory: PathBuf::from(&config.directory),
            prefix: config.prefix.clone(),
            columns: specs.iter().map(|spec| spec.name.clone()).collect(),
            write_lock: Mutex::new(()),
        }
    }

    /// Path of today's file.
    fn current_file(&self) -> PathBuf {
        let today = Local::now().format("%Y-%m-%d");
        self.directory.join(format!("{}_{}.csv", self.prefix, today))
    }

    fn append_batch(&self, path: &Path, batch: &[Record]) -> Result<(), SinkError> {
        std::fs::create_dir_all(&self.directory)?;
        let file_exists = path.is_file();

        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(file);

        if !file_exists {
            let mut header = vec!["timestamp".to_string()];
            header.extend(self.columns.iter().cloned());
            writer.write_record(&header)?;
        }

        for record in batch {
            let mut row = Vec::with_capacity(self.columns.len() + 1);
            row.push(record.format_timestamp());
            for column in &self.columns {
                match record.fields.get(column).copied().flatten() {
                    Some(value) => row.push(value.to_string()),
                    None => row.push(String::new()),
                }
            }
            writer.write_record(&row)?;
        }
        writer.flush()?;
        Ok(())
    }
}

#[async_trait]
impl RecordSink for CsvSink {
    fn name(&self) -> &str {
        "csv"
    }

    async fn write_batch(&self, batch: &[Record]) -> Result<(), SinkError> {
        let _guard = self.write_lock.lock().await;
        let path = self.current_file();
        self.append_batch(&path, batch)?;
        debug!("Appended {} rows to {:?}", batch.len(), path);
        Ok(())
    }
}
