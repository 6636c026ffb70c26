// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-powermeter project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Register map configuration
//!
//! This module defines the structures describing which Modbus registers are
//! sampled and how their raw words are decoded into physical values. The
//! ordered register list is fixed for the process lifetime and determines
//! exactly which fields a record contains.

use serde::{Deserialize, Serialize};

/// How the raw register words of one field are decoded.
///
/// * `ScaledDoubleWord` - two consecutive 16-bit words combined as a 32-bit
///   unsigned big-endian integer (`high << 16 | low`), then multiplied by
///   `scale`. Used for accumulators that exceed the 16-bit range (energy,
///   voltage, current).
/// * `DecimalRegister` - a single 16-bit word, optionally interpreted as
///   signed, divided by `10^decimals` (power factor, frequency).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RegisterEncoding {
    /// 32-bit value spread over two registers, multiplied by a scale factor.
    ScaledDoubleWord {
        /// Multiplier applied to the combined 32-bit value.
        scale: f64,
    },
    /// Single-register fixed-point value.
    DecimalRegister {
        /// Number of implied decimal places (value is divided by 10^decimals).
        decimals: u8,
        /// Interpret the raw word as a signed 16-bit integer.
        signed: bool,
    },
}

impl RegisterEncoding {
    /// Number of 16-bit words this encoding reads from the device.
    pub fn word_count(&self) -> u16 {
        match self {
            RegisterEncoding::ScaledDoubleWord { .. } => 2,
            RegisterEncoding::DecimalRegister { .. } => 1,
        }
    }
}

/// One sampled field: a named register address plus its decoding rule.
///
/// The ordered list of these specs defines the closed field set of every
/// record; sinks derive their column layout from it at startup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegisterSpec {
    /// Field name, used as the record key and as the sink column name.
    ///
    /// Must be a lowercase identifier (letters, digits, underscores).
    pub name: String,

    /// Modbus input register address (function code 4).
    pub address: u16,

    /// Decoding rule for the raw register words.
    pub encoding: RegisterEncoding,
}

impl RegisterSpec {
    /// Convenience constructor for a scaled double-word register.
    pub fn scaled(name: &str, address: u16, scale: f64) -> Self {
        Self {
            name: name.to_string(),
            address,
            encoding: RegisterEncoding::ScaledDoubleWord { scale },
        }
    }

    /// Convenience constructor for a single fixed-point register.
    pub fn decimal(name: &str, address: u16, decimals: u8, signed: bool) -> Self {
        Self {
            name: name.to_string(),
            address,
            encoding: RegisterEncoding::DecimalRegister { decimals, signed },
        }
    }
}

/// Default register map for the Lumel RX380 three-phase power meter.
///
/// Addresses and scale factors follow the RX380 input register table.
pub fn default_registers() -> Vec<RegisterSpec> {
    vec![
        // Phase voltages
        RegisterSpec::scaled("voltage_l1", 4034, 0.1), // V
        RegisterSpec::scaled("voltage_l2", 4036, 0.1), // V
        RegisterSpec::scaled("voltage_l3", 4038, 0.1), // V
        // Line voltages
        RegisterSpec::scaled("voltage_l12", 4028, 0.1), // V
        RegisterSpec::scaled("voltage_l23", 4030, 0.1), // V
        RegisterSpec::scaled("voltage_l31", 4032, 0.1), // V
        // Line voltage maxima
        RegisterSpec::scaled("voltage_l12_max", 4124, 0.1), // V
        RegisterSpec::scaled("voltage_l23_max", 4128, 0.1), // V
        RegisterSpec::scaled("voltage_l31_max", 4132, 0.1), // V
        // Line voltage minima
        RegisterSpec::scaled("voltage_l12_min", 4212, 0.1), // V
        RegisterSpec::scaled("voltage_l23_min", 4216, 0.1), // V
        RegisterSpec::scaled("voltage_l31_min", 4220, 0.1), // V
        // Currents
        RegisterSpec::scaled("current_l1", 4020, 0.001), // A
        RegisterSpec::scaled("current_l2", 4022, 0.001), // A
        RegisterSpec::scaled("current_l3", 4024, 0.001), // A
        RegisterSpec::scaled("current_ln", 4026, 0.001), // A
        // Powers
        RegisterSpec::scaled("total_real_power", 4012, 1.0), // W
        RegisterSpec::scaled("total_apparent_power", 4014, 1.0), // VA
        RegisterSpec::scaled("total_reactive_power", 4016, 1.0), // VAR
        // Power factor and frequency
        RegisterSpec::decimal("total_power_factor", 4018, 3, true),
        RegisterSpec::decimal("frequency", 4019, 2, false), // Hz
        // Energy accumulators
        RegisterSpec::scaled("total_real_energy", 4002, 1.0), // kWh
        RegisterSpec::scaled("total_apparent_energy", 4006, 1.0), // kVAh
        RegisterSpec::scaled("total_reactive_energy", 4010, 1.0), // kVARh
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_register_map() {
        let specs = default_registers();
        assert_eq!(specs.len(), 24);
        assert_eq!(specs[0].name, "voltage_l1");
        assert_eq!(specs[0].address, 4034);
        assert_eq!(specs[0].encoding.word_count(), 2);

        let pf = specs
            .iter()
            .find(|s| s.name == "total_power_factor")
            .unwrap();
        assert_eq!(
            pf.encoding,
            RegisterEncoding::DecimalRegister {
                decimals: 3,
                signed: true
            }
        );
        assert_eq!(pf.encoding.word_count(), 1);
    }

    #[test]
    fn test_encoding_yaml_round_trip() {
        let spec = RegisterSpec::scaled("voltage_l1", 4034, 0.1);
        let yaml = serde_yml::to_string(&spec).unwrap();
        assert!(yaml.contains("scaled_double_word"));
        let back: RegisterSpec = serde_yml::from_str(&yaml).unwrap();
        assert_eq!(back, spec);
    }
}
