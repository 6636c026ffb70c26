// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-powermeter project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Sample buffer module
//!
//! This module provides the record type produced by sampling passes and the
//! shared buffer that accumulates records between flushes.

use std::collections::BTreeMap;
use std::sync::Mutex;

use chrono::{DateTime, Duration, Local};
use serde::{Deserialize, Serialize};

use crate::config::BufferConfig;

/// One timestamped sampling pass over all configured registers.
///
/// A field holds `None` when its decode failed; the record is still usable
/// as long as at least one field decoded. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Instant the sampling pass began.
    pub timestamp: DateTime<Local>,
    /// Decoded values keyed by register name; `None` marks a failed decode.
    pub fields: BTreeMap<String, Option<f64>>,
}

impl Record {
    /// Create a record stamped with the pass-begin instant.
    pub fn new(timestamp: DateTime<Local>) -> Self {
        Self {
            timestamp,
            fields: BTreeMap::new(),
        }
    }

    /// Number of fields that decoded successfully.
    pub fn decoded_field_count(&self) -> usize {
        self.fields.values().filter(|v| v.is_some()).count()
    }

    /// Timestamp formatted the way the sinks store it.
    pub fn format_timestamp(&self) -> String {
        self.timestamp.format("%Y-%m-%d %H:%M:%S").to_string()
    }
}

struct BufferInner {
    records: Vec<Record>,
    /// Timestamp of the first record since the last flush.
    oldest: Option<DateTime<Local>>,
}

/// Shared buffer accumulating records between flushes.
///
/// `take_batch` swaps the accumulated records for an empty vec in one
/// critical section: records sampled after the swap accumulate into the new
/// buffer and can never appear in the batch already handed out.
pub struct SampleBuffer {
    inner: Mutex<BufferInner>,
    max_records: usize,
    max_age: Duration,
}

impl SampleBuffer {
    /// Create a buffer with the configured flush thresholds.
    pub fn new(config: &BufferConfig) -> Self {
        Self {
            inner: Mutex::new(BufferInner {
                records: Vec::new(),
                oldest: None,
            }),
            max_records: config.flush_max_records,
            max_age: Duration::seconds(config.flush_max_age_seconds as i64),
        }
    }

    /// Append a record.
    pub fn push(&self, record: Record) {
        let mut inner = self.inner.lock().unwrap();
        if inner.oldest.is_none() {
            inner.oldest = Some(record.timestamp);
        }
        inner.records.push(record);
    }

    /// Number of buffered records.
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().records.len()
    }

    /// Whether the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether either flush threshold has fired.
    ///
    /// Count threshold: the buffer reached `flush_max_records`. Age
    /// threshold: the first unflushed record is older than
    /// `flush_max_age_seconds`.
    pub fn should_flush(&self, now: DateTime<Local>) -> bool {
        let inner = self.inner.lock().unwrap();
        if inner.records.is_empty() {
            return false;
        }
        if inner.records.len() >= self.max_records {
            return true;
        }
        match inner.oldest {
            Some(oldest) => now.signed_duration_since(oldest) >= self.max_age,
            None => false,
        }
    }

    /// Atomically swap out the buffered records as an immutable batch.
    pub fn take_batch(&self) -> Vec<Record> {
        let mut inner = self.inner.lock().unwrap();
        inner.oldest = None;
        std::mem::take(&mut inner.records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record_at(timestamp: DateTime<Local>, value: f64) -> Record {
        let mut record = Record::new(timestamp);
        record.fields.insert("voltage_l1".to_string(), Some(value));
        record
    }

    fn test_buffer(max_records: usize, max_age_seconds: u64) -> SampleBuffer {
        SampleBuffer::new(&BufferConfig {
            flush_max_records: max_records,
            flush_max_age_seconds: max_age_seconds,
        })
    }

    #[test]
    fn test_count_threshold() {
        let buffer = test_buffer(3, 3600);
        let now = Local::now();
        for i in 0..2 {
            buffer.push(record_at(now, i as f64));
            assert!(!buffer.should_flush(now));
        }
        buffer.push(record_at(now, 2.0));
        assert!(buffer.should_flush(now));
    }

    #[test]
    fn test_age_threshold() {
        let buffer = test_buffer(100, 60);
        let start = Local::now();
        buffer.push(record_at(start, 230.0));

        assert!(!buffer.should_flush(start + Duration::seconds(59)));
        assert!(buffer.should_flush(start + Duration::seconds(60)));
    }

    #[test]
    fn test_empty_buffer_never_flushes() {
        let buffer = test_buffer(1, 1);
        assert!(!buffer.should_flush(Local::now() + Duration::days(1)));
    }

    #[test]
    fn test_take_batch_is_atomic() {
        let buffer = test_buffer(10, 3600);
        let now = Local::now();
        buffer.push(record_at(now, 1.0));
        buffer.push(record_at(now, 2.0));

        let batch = buffer.take_batch();
        assert_eq!(batch.len(), 2);
        assert!(buffer.is_empty());

        // A record sampled after the swap goes to the new buffer only
        buffer.push(record_at(now, 3.0));
        assert_eq!(batch.len(), 2);
        assert_eq!(buffer.len(), 1);
    }

    #[test]
    fn test_age_resets_after_flush() {
        let buffer = test_buffer(100, 60);
        let start = Local::now();
        buffer.push(record_at(start, 1.0));
        buffer.take_batch();

        // New records age from their own arrival, not the old batch
        let later = start + Duration::seconds(120);
        buffer.push(record_at(later, 2.0));
        assert!(!buffer.should_flush(later + Duration::seconds(59)));
        assert!(buffer.should_flush(later + Duration::seconds(61)));
    }

    #[test]
    fn test_decoded_field_count() {
        let mut record = Record::new(Local::now());
        record.fields.insert("voltage_l1".to_string(), Some(230.0));
        record.fields.insert("voltage_l2".to_string(), None);
        assert_eq!(record.decoded_field_count(), 1);
    }
}
