// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-powermeter project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Serial Modbus RTU register transport
//!
//! This module implements the register transport over a serial Modbus RTU
//! link using tokio-modbus. Register reads use function code 4 (input
//! registers), which is where the RX380 exposes its measurements.

use std::time::Duration;

use anyhow::{Context as _, Result};
use log::{debug, info};
use tokio::time::timeout;
use tokio_modbus::client::{rtu, Context, Reader};
use tokio_modbus::slave::Slave;
use tokio_serial::{DataBits, SerialStream, StopBits};

use super::{RegisterTransport, TransportError};
use crate::config::{Parity, TransportConfig};

/// Register transport over a serial Modbus RTU link.
///
/// Owns the serial context exclusively; the bus is non-reentrant and the
/// sampler issues one read at a time.
pub struct SerialRegisterTransport {
    ctx: Context,
    timeout_ms: u64,
}

impl SerialRegisterTransport {
    /// Open the configured serial port and attach a Modbus RTU client.
    pub async fn connect(config: &TransportConfig) -> Result<Self> {
        let parity = match config.parity {
            Parity::None => tokio_serial::Parity::None,
            Parity::Even => tokio_serial::Parity::Even,
            Parity::Odd => tokio_serial::Parity::Odd,
        };
        let stop_bits = match config.stop_bits {
            2 => StopBits::Two,
            _ => StopBits::One,
        };

        let builder = tokio_serial::new(&config.port, config.baud_rate)
            .data_bits(DataBits::Eight)
            .parity(parity)
            .stop_bits(stop_bits)
            .timeout(Duration::from_millis(config.timeout_ms));

        let port = SerialStream::open(&builder)
            .with_context(|| format!("Failed to open serial port {}", config.port))?;

        info!(
            "Serial transport open on {} ({} baud, slave {})",
            config.port, config.baud_rate, config.slave_id
        );

        Ok(Self {
            ctx: rtu::attach_slave(port, Slave(config.slave_id)),
            timeout_ms: config.timeout_ms,
        })
    }
}

#[async_trait::async_trait]
impl RegisterTransport for SerialRegisterTransport {
    async fn read_words(&mut self, address: u16, count: u16) -> Result<Vec<u16>, TransportError> {
        let window = Duration::from_millis(self.timeout_ms);
        let response = timeout(window, self.ctx.read_input_registers(address, count))
            .await
            .map_err(|_| TransportError::Timeout {
                address,
                timeout_ms: self.timeout_ms,
            })?;

        match response {
            Ok(Ok(words)) => {
                if words.len() != count as usize {
                    return Err(TransportError::ShortResponse {
                        address,
                        expected: count as usize,
                        actual: words.len(),
                    });
                }
                debug!("Read {} words at register {}", count, address);
                Ok(words)
            }
            Ok(Err(exception)) => Err(TransportError::Exception {
                address,
                exception: exception.to_string(),
            }),
            Err(err) => Err(TransportError::Io(std::io::Error::other(err))),
        }
    }
}
