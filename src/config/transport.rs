// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-powermeter project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Serial transport configuration
//!
//! This module defines the structures for configuring the Modbus RTU serial
//! link to the power meter.

use serde::{Deserialize, Serialize};

/// Serial parity setting for the RTU link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Parity {
    None,
    Even,
    Odd,
}

/// Configuration for the Modbus RTU serial transport.
///
/// The wire-level framing is handled by the transport implementation; these
/// settings are passed through opaquely. Defaults match the RX380 factory
/// settings (19200 baud, 8E1, slave 1).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Serial device path (e.g. `/dev/ttyUSB0`).
    pub port: String,

    /// Baud rate of the serial link.
    pub baud_rate: u32,

    /// Parity setting of the serial link.
    pub parity: Parity,

    /// Number of stop bits (1 or 2).
    pub stop_bits: u8,

    /// Modbus slave address of the meter.
    pub slave_id: u8,

    /// Per-request timeout in milliseconds.
    ///
    /// A read that does not complete within this window is treated as a
    /// communication failure for that field only.
    pub timeout_ms: u64,

    /// Use the in-process mock transport instead of a serial port.
    ///
    /// Intended for development and integration testing without a meter
    /// attached.
    pub mock: bool,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            port: "/dev/ttyUSB0".to_string(),
            baud_rate: 19200,
            parity: Parity::Even,
            stop_bits: 1,
            slave_id: 1,
            timeout_ms: 1000,
            mock: false,
        }
    }
}
