// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-powermeter project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Register sampler module
//!
//! This module turns raw register words into physical values and runs full
//! sampling passes over the configured register map. A failed read or a
//! malformed response affects only its own field; the pass continues with
//! the remaining registers. A pass where every field failed is discarded.

use chrono::Local;
use log::{debug, warn};
use thiserror::Error;

use super::buffer::Record;
use super::{RegisterTransport, TransportError};
use crate::config::{RegisterEncoding, RegisterSpec};

/// Error for a sampling pass that produced no usable data.
#[derive(Error, Debug)]
pub enum PassError {
    #[error("all {total} register reads failed, pass discarded")]
    AllFieldsFailed { total: usize },
}

/// Counters describing sampler activity since startup.
#[derive(Debug, Clone, Default)]
pub struct SamplerStats {
    /// Total sampling passes attempted.
    pub passes: u64,
    /// Passes discarded because every field failed.
    pub failed_passes: u64,
    /// Passes that completed with at least one absent field.
    pub partial_passes: u64,
    /// Individual field read/decode failures.
    pub field_errors: u64,
}

/// Reads and decodes all configured registers into records.
///
/// Owns the transport: the serial bus is non-reentrant, so pass execution
/// is inherently single-flight.
pub struct RegisterSampler {
    transport: Box<dyn RegisterTransport>,
    specs: Vec<RegisterSpec>,
    stats: SamplerStats,
}

impl RegisterSampler {
    /// Create a sampler over the given transport and register map.
    pub fn new(transport: Box<dyn RegisterTransport>, specs: Vec<RegisterSpec>) -> Self {
        Self {
            transport,
            specs,
            stats: SamplerStats::default(),
        }
    }

    /// The register map this sampler reads.
    pub fn specs(&self) -> &[RegisterSpec] {
        &self.specs
    }

    /// Activity counters.
    pub fn stats(&self) -> &SamplerStats {
        &self.stats
    }

    /// Run one full sampling pass over all configured registers.
    ///
    /// The record timestamp is the instant the pass began. Per-field
    /// failures are logged with the register address and surface as absent
    /// fields; only an all-absent pass is an error.
    pub async fn sample_pass(&mut self) -> Result<Record, PassError> {
        let mut record = Record::new(Local::now());
        self.stats.passes += 1;

        let transport = &mut self.transport;
        for spec in &self.specs {
            match read_register(transport.as_mut(), spec).await {
                Ok(value) => {
                    record.fields.insert(spec.name.clone(), Some(value));
                }
                Err(err) => {
                    warn!("Error reading register {}: {}", spec.address, err);
                    self.stats.field_errors += 1;
                    record.fields.insert(spec.name.clone(), None);
                }
            }
        }

        let decoded = record.decoded_field_count();
        if decoded == 0 {
            self.stats.failed_passes += 1;
            return Err(PassError::AllFieldsFailed {
                total: self.specs.len(),
            });
        }
        if decoded < self.specs.len() {
            self.stats.partial_passes += 1;
        }
        debug!(
            "Sampling pass complete: {}/{} fields decoded",
            decoded,
            self.specs.len()
        );
        Ok(record)
    }
}

/// Read and decode one register spec.
async fn read_register(
    transport: &mut dyn RegisterTransport,
    spec: &RegisterSpec,
) -> Result<f64, TransportError> {
    let count = spec.encoding.word_count();
    let words = transport.read_words(spec.address, count).await?;
    decode_words(&spec.encoding, &words, spec.address)
}

/// Decode raw register words according to the encoding rule.
pub fn decode_words(
    encoding: &RegisterEncoding,
    words: &[u16],
    address: u16,
) -> Result<f64, TransportError> {
    match encoding {
        RegisterEncoding::ScaledDoubleWord { scale } => {
            if words.len() != 2 {
                return Err(TransportError::ShortResponse {
                    address,
                    expected: 2,
                    actual: words.len(),
                });
            }
            let raw = (u32::from(words[0]) << 16) | u32::from(words[1]);
            Ok(f64::from(raw) * scale)
        }
        RegisterEncoding::DecimalRegister { decimals, signed } => {
            if words.len() != 1 {
                return Err(TransportError::ShortResponse {
                    address,
                    expected: 1,
                    actual: words.len(),
                });
            }
            let raw = if *signed {
                f64::from(words[0] as i16)
            } else {
                f64::from(words[0])
            };
            Ok(raw / 10f64.powi(i32::from(*decimals)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acquisition::MockRegisterTransport;
    use crate::config::default_registers;
    use approx::assert_relative_eq;

    #[test]
    fn test_decode_scaled_double_word() {
        let encoding = RegisterEncoding::ScaledDoubleWord { scale: 0.1 };
        // high word set: value crosses the 16-bit range
        let value = decode_words(&encoding, &[1, 2], 4002).unwrap();
        assert_relative_eq!(value, ((1u32 << 16) | 2) as f64 * 0.1);
    }

    #[test]
    fn test_decode_decimal_register_signed() {
        let encoding = RegisterEncoding::DecimalRegister {
            decimals: 3,
            signed: true,
        };
        // 0xFC18 as i16 is -1000 -> -1.0 with three decimals
        let value = decode_words(&encoding, &[0xFC18], 4018).unwrap();
        assert_relative_eq!(value, -1.0);
    }

    #[test]
    fn test_decode_decimal_register_unsigned() {
        let encoding = RegisterEncoding::DecimalRegister {
            decimals: 2,
            signed: false,
        };
        let value = decode_words(&encoding, &[5002], 4019).unwrap();
        assert_relative_eq!(value, 50.02);
    }

    #[test]
    fn test_decode_rejects_short_response() {
        let encoding = RegisterEncoding::ScaledDoubleWord { scale: 1.0 };
        let err = decode_words(&encoding, &[7], 4012).unwrap_err();
        assert!(matches!(err, TransportError::ShortResponse { .. }));
    }

    #[tokio::test]
    async fn test_full_pass_decodes_all_fields() {
        let mock = MockRegisterTransport::with_default_map();
        let mut sampler = RegisterSampler::new(Box::new(mock), default_registers());

        let record = sampler.sample_pass().await.unwrap();
        assert_eq!(record.decoded_field_count(), 24);
        assert_relative_eq!(record.fields["voltage_l1"].unwrap(), 230.4);
        assert_relative_eq!(record.fields["total_power_factor"].unwrap(), 0.95);
        assert_relative_eq!(record.fields["frequency"].unwrap(), 50.02);
        assert_eq!(sampler.stats().partial_passes, 0);
    }

    #[tokio::test]
    async fn test_field_failure_leaves_siblings_intact() {
        let mock = MockRegisterTransport::with_default_map();
        mock.fail_address(4036); // voltage_l2
        let mut sampler = RegisterSampler::new(Box::new(mock), default_registers());

        let record = sampler.sample_pass().await.unwrap();
        assert_eq!(record.fields["voltage_l2"], None);
        assert_eq!(record.decoded_field_count(), 23);
        assert_relative_eq!(record.fields["voltage_l1"].unwrap(), 230.4);
        assert_eq!(sampler.stats().partial_passes, 1);
        assert_eq!(sampler.stats().field_errors, 1);
    }

    #[tokio::test]
    async fn test_all_absent_pass_is_discarded() {
        // Empty register bank: every read fails
        let mock = MockRegisterTransport::new();
        let mut sampler = RegisterSampler::new(Box::new(mock), default_registers());

        let result = sampler.sample_pass().await;
        assert!(matches!(
            result,
            Err(PassError::AllFieldsFailed { total: 24 })
        ));
        assert_eq!(sampler.stats().failed_passes, 1);
    }
}
