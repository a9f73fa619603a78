use bevy::prelude::*;
use serde::Deserialize;

use crate::constants::ONE_ATMOSPHERE;

/// Tunable simulation parameters.
///
/// The flux and heat coefficients shape how quickly gas and heat spread; they
/// are gameplay knobs rather than physical constants. Whatever their values,
/// a single pass moves at most an even share of the amount that would
/// equalize each pair, split across every face draining the source or filling
/// the destination.
#[derive(Debug, Clone, PartialEq, Deserialize, Resource)]
#[serde(default)]
pub struct AtmosConfig {
    /// Fixed simulation rate in ticks per second.
    pub tick_rate_hz: f64,
    /// Moles moved per kPa of pressure difference per second across one face.
    pub flux_coefficient: f32,
    /// Fraction of the thermal-equilibrium energy exchanged per second across one face.
    pub heat_transfer_coefficient: f32,
    /// Pressure difference (kPa) that wakes a cell straight to `Active`.
    pub active_pressure_delta: f32,
    /// Temperature difference (K) that wakes a cell straight to `Active`.
    pub active_temperature_delta: f32,
    /// Below this pressure difference (kPa) a cell counts as settled.
    pub settle_pressure_delta: f32,
    /// Below this temperature difference (K) a cell counts as settled.
    pub settle_temperature_delta: f32,
    /// Consecutive settled ticks before a cell drops one activity level.
    pub stability_ticks: u32,
    /// Longest simulated interval (s) handled in a single flux pass.
    pub max_substep: f32,
    /// Most flux passes a single step may run. Longer steps are truncated.
    pub max_substeps: u32,
    /// Pressure (kPa) used to fill floor cells when a station is initialized.
    pub standard_pressure: f32,
}

impl Default for AtmosConfig {
    fn default() -> Self {
        Self {
            tick_rate_hz: 10.0,
            flux_coefficient: 2.0,
            heat_transfer_coefficient: 4.0,
            active_pressure_delta: 1.0,
            active_temperature_delta: 4.0,
            settle_pressure_delta: 0.01,
            settle_temperature_delta: 0.5,
            stability_ticks: 4,
            max_substep: 0.25,
            max_substeps: 16,
            standard_pressure: ONE_ATMOSPHERE,
        }
    }
}

impl AtmosConfig {
    /// Checks that every tunable is finite and in range.
    pub fn validate(&self) -> Result<(), String> {
        let positive = [
            ("flux_coefficient", self.flux_coefficient),
            ("heat_transfer_coefficient", self.heat_transfer_coefficient),
            ("active_pressure_delta", self.active_pressure_delta),
            ("active_temperature_delta", self.active_temperature_delta),
            ("settle_pressure_delta", self.settle_pressure_delta),
            ("settle_temperature_delta", self.settle_temperature_delta),
            ("max_substep", self.max_substep),
            ("standard_pressure", self.standard_pressure),
        ];
        for (name, value) in positive {
            if !(value.is_finite() && value > 0.0) {
                return Err(format!("{name} must be a positive number, got {value}"));
            }
        }
        if !(self.tick_rate_hz.is_finite() && self.tick_rate_hz > 0.0) {
            return Err(format!(
                "tick_rate_hz must be a positive number, got {}",
                self.tick_rate_hz
            ));
        }
        if self.settle_pressure_delta >= self.active_pressure_delta {
            return Err(format!(
                "settle_pressure_delta ({}) must be below active_pressure_delta ({})",
                self.settle_pressure_delta, self.active_pressure_delta
            ));
        }
        if self.settle_temperature_delta >= self.active_temperature_delta {
            return Err(format!(
                "settle_temperature_delta ({}) must be below active_temperature_delta ({})",
                self.settle_temperature_delta, self.active_temperature_delta
            ));
        }
        if self.stability_ticks == 0 {
            return Err("stability_ticks must be at least 1".to_string());
        }
        if self.max_substeps == 0 {
            return Err("max_substeps must be at least 1".to_string());
        }
        Ok(())
    }

    /// Returns this config if valid, otherwise logs the problem and falls back to defaults.
    pub fn validated_or_default(self) -> Self {
        match self.validate() {
            Ok(()) => self,
            Err(error) => {
                warn!("Invalid atmospherics config, using defaults: {error}");
                Self::default()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(AtmosConfig::default().validate().is_ok());
    }

    #[test]
    fn test_rejects_non_positive_coefficients() {
        let config = AtmosConfig {
            flux_coefficient: 0.0,
            ..default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.contains("flux_coefficient"));

        let config = AtmosConfig {
            max_substep: f32::NAN,
            ..default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_inverted_thresholds() {
        let config = AtmosConfig {
            settle_pressure_delta: 5.0,
            active_pressure_delta: 1.0,
            ..default()
        };
        assert!(config.validate().unwrap_err().contains("settle_pressure_delta"));
    }

    #[test]
    fn test_rejects_zero_max_substeps() {
        let config = AtmosConfig {
            max_substeps: 0,
            ..default()
        };
        assert!(config.validate().unwrap_err().contains("max_substeps"));
    }

    #[test]
    fn test_invalid_config_falls_back_to_defaults() {
        let config = AtmosConfig {
            stability_ticks: 0,
            ..default()
        };
        assert_eq!(config.validated_or_default(), AtmosConfig::default());
    }
}
