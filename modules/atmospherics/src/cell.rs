use bevy::prelude::*;

use crate::config::AtmosConfig;
use crate::constants::{GAS_MIN_MOLES, MINIMUM_HEAT_CAPACITY, R_IDEAL_GAS_EQUATION};
use crate::gas::{GAS_COUNT, Gas, GasAmounts, GasMixture};

/// Pressure differences (kPa) below this move no gas.
const MINIMUM_PRESSURE_DELTA: f32 = 0.0001;
/// Temperature differences (K) below this move no heat.
const MINIMUM_TEMPERATURE_DELTA: f32 = 0.001;

/// How much attention a cell gets from the flux sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Reflect)]
#[reflect(Debug, PartialEq)]
pub enum ActivityState {
    /// Settled against every neighbour; skipped by the sweep.
    #[default]
    Inactive,
    /// Small differentials; simulated, and drops to `Inactive` once settled.
    SemiActive,
    /// Significant flux; always simulated.
    Active,
}

impl ActivityState {
    pub fn is_simulated(self) -> bool {
        self != ActivityState::Inactive
    }

    fn demoted(self) -> Self {
        match self {
            ActivityState::Active => ActivityState::SemiActive,
            ActivityState::SemiActive | ActivityState::Inactive => ActivityState::Inactive,
        }
    }
}

/// Value copy of a neighbour taken at the start of a flux pass.
#[derive(Debug, Clone, Copy)]
pub struct NeighborSnapshot {
    pub index: usize,
    pub mixture: GasMixture,
    pub pressure: f32,
    pub state: ActivityState,
}

/// Gas and heat leaving a cell through one face during a flux pass.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transfer {
    pub to: usize,
    pub moles: f32,
    /// Conducted heat in J, on top of the heat carried by the moved gas.
    pub heat: f32,
    /// Moles that would equalize the source and destination on their own.
    pub pair_moles: f32,
    /// Conducted heat that would bring the pair to one temperature this pass.
    pub pair_heat: f32,
    /// Faces the source sends gas through in this pass.
    pub gas_faces: u8,
    /// Faces the source conducts heat through in this pass.
    pub heat_faces: u8,
}

impl Transfer {
    /// Caps the transfer at an even split of the pair's equilibrium across
    /// every face that drains the source or fills the destination this pass.
    ///
    /// With several higher neighbours feeding one cell, each gets a smaller
    /// share, so the destination cannot end above any of its sources.
    pub(crate) fn limit_to_shared_equilibrium(&mut self, inflow: InflowFaces) {
        if self.moles > 0.0 {
            let faces = f32::from(self.gas_faces) + f32::from(inflow.gas);
            self.moles = self.moles.min(self.pair_moles / faces.max(1.0));
        }
        if self.heat > 0.0 {
            let faces = f32::from(self.heat_faces) + f32::from(inflow.heat);
            self.heat = self.heat.min(self.pair_heat / faces.max(1.0));
        }
    }
}

/// Number of faces a cell receives gas and heat through in one pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InflowFaces {
    pub gas: u8,
    pub heat: u8,
}

/// Counts, for every destination, the faces it receives gas and heat through.
pub(crate) fn count_inflows(outboxes: &[FluxOutbox], inflows: &mut [InflowFaces]) {
    inflows.fill(InflowFaces::default());
    for transfer in outboxes.iter().flatten().flatten() {
        let faces = &mut inflows[transfer.to];
        if transfer.moles > 0.0 {
            faces.gas += 1;
        }
        if transfer.heat > 0.0 {
            faces.heat += 1;
        }
    }
}

/// Everything one cell sends to its neighbours in a single pass.
pub type FluxOutbox = [Option<Transfer>; 4];

/// Net change to one cell accumulated from every transfer in a pass.
#[derive(Debug, Clone, Copy, Default)]
pub struct CellDelta {
    pub moles: GasAmounts,
    pub energy: f32,
}

impl CellDelta {
    pub fn clear(&mut self) {
        *self = Self::default();
    }
}

/// One simulation unit of the open-air grid.
#[derive(Debug, Clone)]
pub struct AtmosCell {
    position: IVec2,
    pub(crate) mixture: GasMixture,
    pub(crate) state: ActivityState,
    pub(crate) neighbors: [Option<usize>; 4],
    pub(crate) stable_ticks: u32,
    snapshot: [Option<NeighborSnapshot>; 4],
}

impl AtmosCell {
    pub fn new(position: IVec2, mixture: GasMixture) -> Self {
        Self {
            position,
            mixture,
            state: ActivityState::Inactive,
            neighbors: [None; 4],
            stable_ticks: 0,
            snapshot: [None; 4],
        }
    }

    pub fn position(&self) -> IVec2 {
        self.position
    }

    pub fn mixture(&self) -> &GasMixture {
        &self.mixture
    }

    pub fn state(&self) -> ActivityState {
        self.state
    }

    pub fn neighbors(&self) -> &[Option<usize>; 4] {
        &self.neighbors
    }

    /// Promotes the cell to at least `level`, restarting its stability window.
    pub(crate) fn wake(&mut self, level: ActivityState) {
        if level > self.state {
            self.state = level;
        }
        self.stable_ticks = 0;
    }

    /// Copies the neighbours' state out of `prior`. Must run for every cell
    /// before any cell computes flux.
    pub(crate) fn load_snapshots(&mut self, prior: &[(GasMixture, ActivityState)]) {
        for (slot, neighbor) in self.snapshot.iter_mut().zip(self.neighbors.iter()) {
            *slot = neighbor.map(|index| {
                let (mixture, state) = prior[index];
                NeighborSnapshot {
                    index,
                    mixture,
                    pressure: mixture.pressure(),
                    state,
                }
            });
        }
    }

    /// Computes the gas and heat this cell pushes to lower-pressure and colder
    /// neighbours, reading only its own mixture and the loaded snapshots.
    ///
    /// Each face moves at most the amount that would equalize the pair, divided
    /// by the number of faces flowing out. The grid then applies
    /// [`Transfer::limit_to_shared_equilibrium`] once every cell's inflows are
    /// known.
    pub(crate) fn compute_flux(&self, dt: f32, config: &AtmosConfig) -> FluxOutbox {
        let mut outbox: FluxOutbox = [None; 4];
        if !self.state.is_simulated() || self.mixture.is_empty() {
            return outbox;
        }

        let pressure = self.mixture.pressure();
        let temperature = self.mixture.temperature();
        let capacity = self.mixture.heat_capacity();

        let gas_faces = self
            .snapshot
            .iter()
            .flatten()
            .filter(|s| pressure - s.pressure > MINIMUM_PRESSURE_DELTA)
            .count();
        let heat_faces = self
            .snapshot
            .iter()
            .flatten()
            .filter(|s| conducts_heat(&self.mixture, &s.mixture))
            .count();
        if gas_faces == 0 && heat_faces == 0 {
            return outbox;
        }

        let heat_fraction = (config.heat_transfer_coefficient * dt).clamp(0.0, 1.0);
        let mut total_out = 0.0;
        for (slot, snapshot) in outbox.iter_mut().zip(self.snapshot.iter()) {
            let Some(neighbor) = snapshot else {
                continue;
            };

            let mut moles = 0.0;
            let mut pair_moles = 0.0;
            let delta_p = pressure - neighbor.pressure;
            if delta_p > MINIMUM_PRESSURE_DELTA {
                let proposed = delta_p * config.flux_coefficient * dt;
                pair_moles = equalizing_moles(&self.mixture, &neighbor.mixture);
                moles = proposed.min(pair_moles / gas_faces as f32).max(0.0);
            }

            let mut heat = 0.0;
            let mut pair_heat = 0.0;
            if conducts_heat(&self.mixture, &neighbor.mixture) {
                let theirs = neighbor.mixture.heat_capacity();
                let equilibrium = (temperature - neighbor.mixture.temperature()) * capacity * theirs
                    / (capacity + theirs);
                pair_heat = (equilibrium * heat_fraction).max(0.0);
                heat = pair_heat / heat_faces as f32;
            }

            if moles > 0.0 || heat > 0.0 {
                total_out += moles;
                *slot = Some(Transfer {
                    to: neighbor.index,
                    moles,
                    heat,
                    pair_moles,
                    pair_heat,
                    gas_faces: gas_faces as u8,
                    heat_faces: heat_faces as u8,
                });
            }
        }

        // Never send more than the cell holds, whatever the coefficients.
        let available = self.mixture.total_moles();
        if total_out > available && total_out > 0.0 {
            let scale = available / total_out;
            for transfer in outbox.iter_mut().flatten() {
                transfer.moles *= scale;
            }
        }

        outbox
    }

    /// Adds this cell's outgoing transfers to the pass-wide deltas.
    ///
    /// Moved gas has this cell's composition and carries its heat content at
    /// this cell's temperature.
    pub(crate) fn accumulate_outbox(
        &self,
        own_index: usize,
        outbox: &FluxOutbox,
        deltas: &mut [CellDelta],
    ) {
        let proportions = self.mixture.proportions();
        let temperature = self.mixture.temperature();
        for transfer in outbox.iter().flatten() {
            let mut parcel = [0.0; GAS_COUNT];
            let mut parcel_energy = 0.0;
            for gas in Gas::ALL {
                let moved = proportions[gas.index()] * transfer.moles;
                parcel[gas.index()] = moved;
                parcel_energy += moved * gas.specific_heat() * temperature;
            }

            let energy = parcel_energy + transfer.heat;
            let source = &mut deltas[own_index];
            for (d, moved) in source.moles.iter_mut().zip(parcel.iter()) {
                *d -= moved;
            }
            source.energy -= energy;

            let destination = &mut deltas[transfer.to];
            for (d, moved) in destination.moles.iter_mut().zip(parcel.iter()) {
                *d += moved;
            }
            destination.energy += energy;
        }
    }

    /// Applies the accumulated change. The new temperature is the old thermal
    /// energy plus the delta spread over the new heat capacity.
    pub(crate) fn apply_delta(&mut self, delta: &CellDelta) {
        if delta.moles.iter().all(|m| *m == 0.0) && delta.energy == 0.0 {
            return;
        }
        let energy = self.mixture.thermal_energy() + delta.energy;
        for gas in Gas::ALL {
            let change = delta.moles[gas.index()];
            if change > 0.0 {
                self.mixture.add_gas(gas, change);
            } else if change < 0.0 {
                self.mixture.remove_gas(gas, -change);
            }
        }
        self.mixture.garbage_collect();

        let capacity = self.mixture.heat_capacity();
        if capacity > MINIMUM_HEAT_CAPACITY && energy.is_finite() {
            self.mixture.set_temperature(energy / capacity);
        }
    }

    /// Decides the state after a pass by comparing against the live neighbours.
    pub(crate) fn next_activity(
        &self,
        cells: &[AtmosCell],
        config: &AtmosConfig,
    ) -> (ActivityState, u32) {
        let mut max_pressure = 0.0f32;
        let mut max_temperature = 0.0f32;
        for index in self.neighbors.iter().flatten() {
            let (dp, dt) = differential(&self.mixture, &cells[*index].mixture);
            max_pressure = max_pressure.max(dp);
            max_temperature = max_temperature.max(dt);
        }

        if max_pressure > config.active_pressure_delta
            || max_temperature > config.active_temperature_delta
        {
            (ActivityState::Active, 0)
        } else if max_pressure <= config.settle_pressure_delta
            && max_temperature <= config.settle_temperature_delta
        {
            let stable = self.stable_ticks + 1;
            if stable >= config.stability_ticks {
                (self.state.demoted(), 0)
            } else {
                (self.state, stable)
            }
        } else {
            (ActivityState::SemiActive, 0)
        }
    }
}

/// Absolute pressure and temperature difference between two mixtures.
/// Temperature only counts when both sides hold gas.
pub(crate) fn differential(a: &GasMixture, b: &GasMixture) -> (f32, f32) {
    let dp = (a.pressure() - b.pressure()).abs();
    let dt = if a.is_empty() || b.is_empty() {
        0.0
    } else {
        (a.temperature() - b.temperature()).abs()
    };
    (dp, dt)
}

fn conducts_heat(from: &GasMixture, to: &GasMixture) -> bool {
    from.temperature() - to.temperature() > MINIMUM_TEMPERATURE_DELTA
        && from.heat_capacity() > MINIMUM_HEAT_CAPACITY
        && to.heat_capacity() > MINIMUM_HEAT_CAPACITY
}

/// Moles that must move from `source` to `destination` for both to end at the
/// same pressure, accounting for the moved gas warming or cooling the
/// destination (heat-capacity weighted mixing). Zero if `source` is not at the
/// higher pressure.
///
/// Solves `p_src(x) = p_dst(x)`, which is quadratic in `x`; the work is done in
/// `f64` because the coefficients span several orders of magnitude.
pub fn equalizing_moles(source: &GasMixture, destination: &GasMixture) -> f32 {
    let n1 = source.total_moles() as f64;
    if n1 <= GAS_MIN_MOLES as f64 || source.pressure() <= destination.pressure() {
        return 0.0;
    }
    let r = R_IDEAL_GAS_EQUATION as f64;
    let t1 = source.temperature() as f64;
    let a = r * t1 / source.volume() as f64;
    let k = r / destination.volume() as f64;
    let c = source.heat_capacity() as f64 / n1;
    let n2 = destination.total_moles() as f64;
    let c2 = destination.heat_capacity() as f64;
    let e2 = c2 * destination.temperature() as f64;

    let qa = c * (k * t1 + a);
    let qb = k * n2 * c * t1 + k * e2 - a * n1 * c + a * c2;
    let qc = k * n2 * e2 - a * n1 * c2;
    if qa <= f64::EPSILON {
        return 0.0;
    }

    let root = (qb * qb - 4.0 * qa * qc).max(0.0).sqrt();
    let x = if qb >= 0.0 {
        let denominator = qb + root;
        if denominator <= 0.0 {
            0.0
        } else {
            -2.0 * qc / denominator
        }
    } else {
        (-qb + root) / (2.0 * qa)
    };

    if x.is_finite() {
        x.clamp(0.0, n1) as f32
    } else {
        0.0
    }
}
