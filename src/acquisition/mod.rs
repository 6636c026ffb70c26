// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-powermeter project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Data acquisition module
//!
//! This module handles the acquisition of register data from the power
//! meter: the register transport abstraction (serial Modbus RTU or mock),
//! decoding raw words into physical values, the sample buffer, and the
//! sampling scheduler daemon.

use anyhow::Result;
use async_trait::async_trait;
use thiserror::Error;

pub mod buffer;
pub mod daemon;
mod mock;
pub mod sampler;
mod serial;

pub use buffer::{Record, SampleBuffer};
pub use daemon::{next_boundary, SamplingDaemon, SchedulerState};
pub use mock::MockRegisterTransport;
pub use sampler::{PassError, RegisterSampler, SamplerStats};
pub use serial::SerialRegisterTransport;

use crate::config::TransportConfig;

/// Errors produced by the register transport.
///
/// All of these are transient and scoped to a single field read: the
/// sampling pass continues with the remaining registers.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("serial I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("read of register {address} timed out after {timeout_ms} ms")]
    Timeout { address: u16, timeout_ms: u64 },

    #[error("device rejected read of register {address}: {exception}")]
    Exception { address: u16, exception: String },

    #[error("short response for register {address}: expected {expected} words, got {actual}")]
    ShortResponse {
        address: u16,
        expected: usize,
        actual: usize,
    },
}

/// Represents a register source (serial bus or mock)
///
/// The underlying bus is a single shared, non-reentrant resource: the trait
/// takes `&mut self` so at most one read is in flight at a time.
#[async_trait]
pub trait RegisterTransport: Send {
    /// Read `count` consecutive 16-bit input registers starting at `address`
    async fn read_words(&mut self, address: u16, count: u16) -> Result<Vec<u16>, TransportError>;
}

/// Get a register transport for the configured serial port
pub async fn get_serial_transport(config: &TransportConfig) -> Result<Box<dyn RegisterTransport>> {
    Ok(Box::new(SerialRegisterTransport::connect(config).await?))
}

/// Get a mock register transport preloaded with plausible meter values
pub fn get_mock_transport() -> Box<dyn RegisterTransport> {
    Box::new(MockRegisterTransport::with_default_map())
}

/// Get the transport selected by the configuration
pub async fn get_transport(config: &TransportConfig) -> Result<Box<dyn RegisterTransport>> {
    if config.mock {
        Ok(get_mock_transport())
    } else {
        get_serial_transport(config).await
    }
}
