// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-powermeter project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Mock register transport
//!
//! This module provides a mock transport that emulates the meter's input
//! register bank in memory, with per-address failure injection. It backs
//! `--mock` runs and the acquisition tests.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use super::{RegisterTransport, TransportError};

/// Mock register transport backed by an in-memory register bank.
///
/// Addresses not present in the bank answer with a Modbus illegal-data-
/// address exception, which is also how injected failures surface.
#[derive(Clone)]
pub struct MockRegisterTransport {
    registers: Arc<Mutex<HashMap<u16, u16>>>,
    failing: Arc<Mutex<HashSet<u16>>>,
    read_counter: Arc<AtomicU64>,
}

impl MockRegisterTransport {
    /// Create an empty mock transport.
    pub fn new() -> Self {
        Self {
            registers: Arc::new(Mutex::new(HashMap::new())),
            failing: Arc::new(Mutex::new(HashSet::new())),
            read_counter: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Create a mock transport preloaded with plausible RX380 readings.
    pub fn with_default_map() -> Self {
        let mock = Self::new();
        // Phase voltages around 230 V, line voltages around 400 V (x0.1)
        mock.set_u32(4034, 2304);
        mock.set_u32(4036, 2297);
        mock.set_u32(4038, 2310);
        mock.set_u32(4028, 3990);
        mock.set_u32(4030, 4003);
        mock.set_u32(4032, 3987);
        mock.set_u32(4124, 4101);
        mock.set_u32(4128, 4110);
        mock.set_u32(4132, 4098);
        mock.set_u32(4212, 3902);
        mock.set_u32(4216, 3911);
        mock.set_u32(4220, 3899);
        // Currents in mA (x0.001)
        mock.set_u32(4020, 12_450);
        mock.set_u32(4022, 11_980);
        mock.set_u32(4024, 12_730);
        mock.set_u32(4026, 340);
        // Powers in W / VA / VAR
        mock.set_u32(4012, 8_250);
        mock.set_u32(4014, 8_690);
        mock.set_u32(4016, 2_730);
        // Power factor 0.950 (signed, 3 decimals), frequency 50.02 Hz
        mock.set_word(4018, 950);
        mock.set_word(4019, 5002);
        // Energy accumulators
        mock.set_u32(4002, 148_210);
        mock.set_u32(4006, 156_080);
        mock.set_u32(4010, 51_340);
        mock
    }

    /// Store a single 16-bit word at `address`.
    pub fn set_word(&self, address: u16, value: u16) {
        self.registers.lock().unwrap().insert(address, value);
    }

    /// Store a 32-bit value as two big-endian words at `address`.
    pub fn set_u32(&self, address: u16, value: u32) {
        let mut registers = self.registers.lock().unwrap();
        registers.insert(address, (value >> 16) as u16);
        registers.insert(address + 1, (value & 0xFFFF) as u16);
    }

    /// Make every read covering `address` fail until cleared.
    pub fn fail_address(&self, address: u16) {
        self.failing.lock().unwrap().insert(address);
    }

    /// Clear a previously injected failure.
    pub fn clear_failure(&self, address: u16) {
        self.failing.lock().unwrap().remove(&address);
    }

    /// Total number of read requests served or failed.
    pub fn read_count(&self) -> u64 {
        self.read_counter.load(Ordering::Relaxed)
    }
}

impl Default for MockRegisterTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl RegisterTransport for MockRegisterTransport {
    async fn read_words(&mut self, address: u16, count: u16) -> Result<Vec<u16>, TransportError> {
        self.read_counter.fetch_add(1, Ordering::Relaxed);

        let failing = self.failing.lock().unwrap();
        let registers = self.registers.lock().unwrap();

        let mut words = Vec::with_capacity(count as usize);
        for offset in 0..count {
            let addr = address + offset;
            if failing.contains(&addr) {
                return Err(TransportError::Exception {
                    address,
                    exception: "injected failure".to_string(),
                });
            }
            match registers.get(&addr) {
                Some(word) => words.push(*word),
                None => {
                    return Err(TransportError::Exception {
                        address,
                        exception: "illegal data address".to_string(),
                    })
                }
            }
        }
        Ok(words)
    }
}
