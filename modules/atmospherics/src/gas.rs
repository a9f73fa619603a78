use bevy::prelude::*;

use crate::constants::{
    GAS_MIN_MOLES, MINIMUM_HEAT_CAPACITY, MINIMUM_VOLUME, N2STANDARD, O2STANDARD,
    ONE_ATMOSPHERE, R_IDEAL_GAS_EQUATION, T20C, TCMB,
};

pub const GAS_COUNT: usize = 6;

/// Per-species molar amounts, indexed by [`Gas::index`].
pub type GasAmounts = [f32; GAS_COUNT];

/// Gas species tracked by the simulation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Reflect)]
#[reflect(Debug, PartialEq)]
pub enum Gas {
    Oxygen,
    Nitrogen,
    CarbonDioxide,
    Plasma,
    WaterVapor,
    NitrousOxide,
}

impl Gas {
    pub const ALL: [Gas; GAS_COUNT] = [
        Gas::Oxygen,
        Gas::Nitrogen,
        Gas::CarbonDioxide,
        Gas::Plasma,
        Gas::WaterVapor,
        Gas::NitrousOxide,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    /// Molar heat capacity in J/(K·mol).
    pub fn specific_heat(self) -> f32 {
        match self {
            Gas::Oxygen => 20.0,
            Gas::Nitrogen => 20.0,
            Gas::CarbonDioxide => 30.0,
            Gas::Plasma => 200.0,
            Gas::WaterVapor => 40.0,
            Gas::NitrousOxide => 40.0,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Gas::Oxygen => "oxygen",
            Gas::Nitrogen => "nitrogen",
            Gas::CarbonDioxide => "carbon dioxide",
            Gas::Plasma => "plasma",
            Gas::WaterVapor => "water vapor",
            Gas::NitrousOxide => "nitrous oxide",
        }
    }
}

/// A body of gas: volume, temperature and moles per species.
///
/// All mutation goes through methods that keep moles non-negative and finite,
/// and keep the temperature at or above [`TCMB`]. Derived quantities guard
/// against zero volume and empty mixtures, so they never produce NaN.
#[derive(Debug, Clone, Copy, PartialEq, Reflect)]
#[reflect(Debug, PartialEq)]
pub struct GasMixture {
    volume: f32,
    temperature: f32,
    moles: GasAmounts,
}

impl GasMixture {
    /// Creates an empty mixture (vacuum) of the given volume at 20 °C.
    pub fn new(volume: f32) -> Self {
        Self {
            volume: sanitize_volume(volume),
            temperature: T20C,
            moles: [0.0; GAS_COUNT],
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.set_temperature(temperature);
        self
    }

    /// Builds a mixture at `pressure` kPa whose composition follows `fractions`.
    /// Fractions are normalised, so they need not sum to one.
    pub fn at_pressure(
        volume: f32,
        temperature: f32,
        pressure: f32,
        fractions: &[(Gas, f32)],
    ) -> Self {
        let mut mixture = Self::new(volume).with_temperature(temperature);
        let weight: f32 = fractions.iter().map(|(_, f)| f.max(0.0)).sum();
        if weight <= 0.0 || !(pressure > 0.0) {
            return mixture;
        }
        let total = pressure * mixture.volume / (R_IDEAL_GAS_EQUATION * mixture.temperature);
        for &(gas, fraction) in fractions {
            mixture.add_gas(gas, total * fraction.max(0.0) / weight);
        }
        mixture
    }

    /// Breathable station air at one atmosphere and 20 °C.
    pub fn standard_air(volume: f32) -> Self {
        Self::at_pressure(
            volume,
            T20C,
            ONE_ATMOSPHERE,
            &[(Gas::Oxygen, O2STANDARD), (Gas::Nitrogen, N2STANDARD)],
        )
    }

    pub fn volume(&self) -> f32 {
        self.volume
    }

    pub fn set_volume(&mut self, volume: f32) {
        self.volume = sanitize_volume(volume);
    }

    pub fn temperature(&self) -> f32 {
        self.temperature
    }

    /// Stores the temperature as given, floored at [`TCMB`]. Non-finite values are ignored.
    pub fn set_temperature(&mut self, temperature: f32) {
        if temperature.is_finite() {
            self.temperature = temperature.max(TCMB);
        }
    }

    pub fn moles(&self, gas: Gas) -> f32 {
        self.moles[gas.index()]
    }

    pub fn amounts(&self) -> &GasAmounts {
        &self.moles
    }

    /// Adds `amount` moles of `gas` at the mixture's current temperature.
    /// Negative or non-finite amounts are treated as zero.
    pub fn add_gas(&mut self, gas: Gas, amount: f32) {
        debug_assert!(!(amount < 0.0), "add_gas called with negative amount {amount}");
        if amount > 0.0 && amount.is_finite() {
            self.moles[gas.index()] += amount;
        }
    }

    /// Removes up to `amount` moles of `gas` and returns how much was removed.
    pub fn remove_gas(&mut self, gas: Gas, amount: f32) -> f32 {
        if !(amount > 0.0) {
            return 0.0;
        }
        let available = self.moles[gas.index()];
        let removed = amount.min(available);
        self.moles[gas.index()] = available - removed;
        removed
    }

    pub fn total_moles(&self) -> f32 {
        self.moles.iter().sum()
    }

    pub fn is_empty(&self) -> bool {
        self.total_moles() <= GAS_MIN_MOLES
    }

    /// Pressure in kPa from the ideal gas law.
    pub fn pressure(&self) -> f32 {
        let total = self.total_moles();
        if total <= GAS_MIN_MOLES {
            return 0.0;
        }
        total * R_IDEAL_GAS_EQUATION * self.temperature.max(TCMB) / self.volume.max(MINIMUM_VOLUME)
    }

    /// Molar fraction of each species; all zero for an empty mixture.
    pub fn proportions(&self) -> GasAmounts {
        let total = self.total_moles();
        if total <= GAS_MIN_MOLES {
            return [0.0; GAS_COUNT];
        }
        self.moles.map(|m| m / total)
    }

    /// Heat capacity in J/K.
    pub fn heat_capacity(&self) -> f32 {
        Gas::ALL
            .iter()
            .map(|gas| self.moles[gas.index()] * gas.specific_heat())
            .sum()
    }

    /// Thermal energy in J.
    pub fn thermal_energy(&self) -> f32 {
        self.heat_capacity() * self.temperature
    }

    /// Adds (or with a negative value removes) thermal energy, updating the temperature.
    /// Has no effect on a mixture without meaningful heat capacity.
    pub fn add_thermal_energy(&mut self, energy: f32) {
        let capacity = self.heat_capacity();
        if capacity > MINIMUM_HEAT_CAPACITY && energy.is_finite() {
            self.set_temperature((self.thermal_energy() + energy) / capacity);
        }
    }

    /// Removes `amount` moles split across species by the current proportions,
    /// so the remaining composition is unchanged. Returns the removed parcel,
    /// which keeps this mixture's volume and temperature.
    pub fn subtract_proportional(&mut self, amount: f32) -> GasMixture {
        let total = self.total_moles();
        if total <= GAS_MIN_MOLES || !(amount > 0.0) {
            return Self::new(self.volume).with_temperature(self.temperature);
        }
        self.remove_ratio(amount / total)
    }

    /// Removes `ratio` (clamped to 0..=1) of every species. Returns the removed parcel.
    pub fn remove_ratio(&mut self, ratio: f32) -> GasMixture {
        let ratio = if ratio.is_finite() { ratio.clamp(0.0, 1.0) } else { 0.0 };
        let mut parcel = Self::new(self.volume).with_temperature(self.temperature);
        for (taken, held) in parcel.moles.iter_mut().zip(self.moles.iter_mut()) {
            *taken = *held * ratio;
            *held = (*held - *taken).max(0.0);
        }
        parcel
    }

    /// Returns a copy with every species multiplied by `ratio`.
    pub fn scaled(&self, ratio: f32) -> GasMixture {
        let ratio = if ratio.is_finite() { ratio.max(0.0) } else { 0.0 };
        Self {
            moles: self.moles.map(|m| m * ratio),
            ..*self
        }
    }

    /// Adds all of `other`'s gas to this mixture. The resulting temperature is
    /// the heat-capacity weighted average of both, so thermal energy is conserved.
    pub fn merge(&mut self, other: &GasMixture) {
        let energy = self.thermal_energy() + other.thermal_energy();
        for (mine, theirs) in self.moles.iter_mut().zip(other.moles.iter()) {
            *mine += theirs.max(0.0);
        }
        let capacity = self.heat_capacity();
        if capacity > MINIMUM_HEAT_CAPACITY {
            self.set_temperature(energy / capacity);
        } else if other.total_moles() > 0.0 {
            self.set_temperature(other.temperature);
        }
    }

    pub fn clear(&mut self) {
        self.moles = [0.0; GAS_COUNT];
    }

    /// Zeroes species below [`GAS_MIN_MOLES`] and any non-finite amount.
    pub fn garbage_collect(&mut self) {
        for m in self.moles.iter_mut() {
            if !m.is_finite() || *m < GAS_MIN_MOLES {
                *m = 0.0;
            }
        }
    }
}

fn sanitize_volume(volume: f32) -> f32 {
    if volume.is_finite() {
        volume.max(MINIMUM_VOLUME)
    } else {
        MINIMUM_VOLUME
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::{CELL_VOLUME, MOLES_CELLSTANDARD};

    #[test]
    fn test_remove_gas_clamps_to_available() {
        let mut mix = GasMixture::new(CELL_VOLUME);
        mix.add_gas(Gas::Oxygen, 12.5);

        let removed = mix.remove_gas(Gas::Oxygen, 40.0);
        assert_eq!(removed, 12.5);
        assert_eq!(mix.moles(Gas::Oxygen), 0.0);

        // Nothing left: further removal is a no-op.
        assert_eq!(mix.remove_gas(Gas::Oxygen, 5.0), 0.0);
        assert_eq!(mix.moles(Gas::Oxygen), 0.0);
    }

    #[test]
    fn test_remove_gas_partial() {
        let mut mix = GasMixture::new(CELL_VOLUME);
        mix.add_gas(Gas::Nitrogen, 10.0);
        assert_eq!(mix.remove_gas(Gas::Nitrogen, 4.0), 4.0);
        assert!((mix.moles(Gas::Nitrogen) - 6.0).abs() < 1e-6);
    }

    #[test]
    fn test_remove_gas_ignores_negative_and_nan() {
        let mut mix = GasMixture::new(CELL_VOLUME);
        mix.add_gas(Gas::Nitrogen, 10.0);
        assert_eq!(mix.remove_gas(Gas::Nitrogen, -3.0), 0.0);
        assert_eq!(mix.remove_gas(Gas::Nitrogen, f32::NAN), 0.0);
        assert_eq!(mix.moles(Gas::Nitrogen), 10.0);
    }

    #[test]
    fn test_pressure_ideal_gas_law() {
        let mut mix = GasMixture::new(1000.0).with_temperature(300.0);
        mix.add_gas(Gas::Oxygen, 2.0);
        mix.add_gas(Gas::Nitrogen, 2.0);

        let expected = 4.0 * R_IDEAL_GAS_EQUATION * 300.0 / 1000.0;
        assert!((mix.pressure() - expected).abs() < 1e-4);
        assert!((mix.total_moles() - 4.0).abs() < 1e-6);
    }

    #[test]
    fn test_empty_mixture_derived_values_are_zero() {
        let mix = GasMixture::new(CELL_VOLUME);
        assert_eq!(mix.pressure(), 0.0);
        assert_eq!(mix.proportions(), [0.0; GAS_COUNT]);
        assert!(mix.is_empty());
    }

    #[test]
    fn test_degenerate_volume_and_temperature_floored() {
        let mut mix = GasMixture::new(0.0);
        assert!(mix.volume() > 0.0);

        mix.set_temperature(-50.0);
        assert_eq!(mix.temperature(), TCMB);
        mix.set_temperature(f32::NAN);
        assert_eq!(mix.temperature(), TCMB);

        mix.add_gas(Gas::Oxygen, 1.0);
        assert!(mix.pressure().is_finite());
    }

    #[test]
    fn test_proportions() {
        let mut mix = GasMixture::new(CELL_VOLUME);
        mix.add_gas(Gas::Oxygen, 1.0);
        mix.add_gas(Gas::Nitrogen, 3.0);
        let p = mix.proportions();
        assert!((p[Gas::Oxygen.index()] - 0.25).abs() < 1e-6);
        assert!((p[Gas::Nitrogen.index()] - 0.75).abs() < 1e-6);
        assert_eq!(p[Gas::Plasma.index()], 0.0);
    }

    #[test]
    fn test_subtract_proportional_preserves_composition() {
        let mut mix = GasMixture::new(CELL_VOLUME).with_temperature(400.0);
        mix.add_gas(Gas::Oxygen, 30.0);
        mix.add_gas(Gas::Nitrogen, 10.0);
        let before = mix.proportions();

        let parcel = mix.subtract_proportional(8.0);

        assert!((parcel.total_moles() - 8.0).abs() < 1e-5);
        assert!((parcel.moles(Gas::Oxygen) - 6.0).abs() < 1e-5);
        assert!((parcel.moles(Gas::Nitrogen) - 2.0).abs() < 1e-5);
        assert_eq!(parcel.temperature(), 400.0);
        assert!((mix.total_moles() - 32.0).abs() < 1e-5);

        let after = mix.proportions();
        for (a, b) in before.iter().zip(after.iter()) {
            assert!((a - b).abs() < 1e-6);
        }
    }

    #[test]
    fn test_subtract_proportional_more_than_available() {
        let mut mix = GasMixture::new(CELL_VOLUME);
        mix.add_gas(Gas::CarbonDioxide, 5.0);
        let parcel = mix.subtract_proportional(50.0);
        assert!((parcel.total_moles() - 5.0).abs() < 1e-6);
        assert_eq!(mix.total_moles(), 0.0);
    }

    #[test]
    fn test_merge_weights_temperature_by_heat_capacity() {
        // 10 mol plasma (c=200) at 300 K + 10 mol oxygen (c=20) at 600 K.
        let mut cold = GasMixture::new(CELL_VOLUME).with_temperature(300.0);
        cold.add_gas(Gas::Plasma, 10.0);
        let mut hot = GasMixture::new(CELL_VOLUME).with_temperature(600.0);
        hot.add_gas(Gas::Oxygen, 10.0);

        let energy_before = cold.thermal_energy() + hot.thermal_energy();
        cold.merge(&hot);

        let expected = (2000.0 * 300.0 + 200.0 * 600.0) / 2200.0;
        assert!((cold.temperature() - expected).abs() < 1e-3);
        assert!((cold.thermal_energy() - energy_before).abs() / energy_before < 1e-5);
        assert!((cold.total_moles() - 20.0).abs() < 1e-6);
    }

    #[test]
    fn test_merge_into_vacuum_takes_parcel_temperature() {
        let mut vacuum = GasMixture::new(CELL_VOLUME).with_temperature(T20C);
        let mut parcel = GasMixture::new(CELL_VOLUME).with_temperature(500.0);
        parcel.add_gas(Gas::Nitrogen, 3.0);
        vacuum.merge(&parcel);
        assert!((vacuum.temperature() - 500.0).abs() < 1e-3);
    }

    #[test]
    fn test_standard_air_is_one_atmosphere() {
        let air = GasMixture::standard_air(CELL_VOLUME);
        assert!((air.pressure() - ONE_ATMOSPHERE).abs() < 1e-2);
        let p = air.proportions();
        assert!((p[Gas::Oxygen.index()] - O2STANDARD).abs() < 1e-4);
        assert!((air.total_moles() - MOLES_CELLSTANDARD).abs() < 1e-2);
    }

    #[test]
    fn test_add_thermal_energy() {
        let mut mix = GasMixture::new(CELL_VOLUME).with_temperature(300.0);
        mix.add_gas(Gas::Oxygen, 10.0);
        // 200 J/K, +2000 J => +10 K
        mix.add_thermal_energy(2000.0);
        assert!((mix.temperature() - 310.0).abs() < 1e-3);

        let mut empty = GasMixture::new(CELL_VOLUME).with_temperature(300.0);
        empty.add_thermal_energy(1.0e6);
        assert_eq!(empty.temperature(), 300.0);
    }
}
