//! Physical constants and unit conventions.
//!
//! Volumes are litres and pressures kPa, so `p = n·R·T / V` holds with
//! `R` in kPa·L/(K·mol).

pub const R_IDEAL_GAS_EQUATION: f32 = 8.314;
pub const ONE_ATMOSPHERE: f32 = 101.325;
/// Cosmic background temperature, used as the temperature floor.
pub const TCMB: f32 = 2.7;
pub const T20C: f32 = 293.15;

/// Below this many moles a mixture is treated as vacuum.
pub const GAS_MIN_MOLES: f32 = 0.000_000_05;
pub const MINIMUM_HEAT_CAPACITY: f32 = 0.0003;
pub const MINIMUM_VOLUME: f32 = 0.001;

/// Litres of gas in one floor tile.
pub const CELL_VOLUME: f32 = 2500.0;
/// Litres of gas in one pipe segment.
pub const PIPE_VOLUME: f32 = 70.0;

pub const O2STANDARD: f32 = 0.21;
pub const N2STANDARD: f32 = 0.79;

/// Moles in a standard cell at one atmosphere and 20 °C.
pub const MOLES_CELLSTANDARD: f32 = ONE_ATMOSPHERE * CELL_VOLUME / (T20C * R_IDEAL_GAS_EQUATION);
