use bevy::prelude::*;
use rayon::prelude::*;
use tiles::{CARDINALS, TileKind, Tilemap};

use crate::cell::{
    ActivityState, AtmosCell, CellDelta, FluxOutbox, InflowFaces, count_inflows, differential,
};
use crate::config::AtmosConfig;
use crate::constants::CELL_VOLUME;
use crate::gas::{Gas, GasAmounts, GasMixture};

/// Snapshot of one cell for callers outside the simulation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CellReading {
    pub pressure: f32,
    pub temperature: f32,
    pub moles: GasAmounts,
    pub state: ActivityState,
}

/// Per-tick load figures reported by [`AtmosGrid::step`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Resource)]
pub struct TickStats {
    /// Cells that ran the flux computation in the final sub-step.
    pub simulated_cells: usize,
    pub active_cells: usize,
    pub semi_active_cells: usize,
    /// Inactive cells woken by a neighbour across all sub-steps.
    pub woken_cells: usize,
    pub substeps: u32,
}

/// The open-air grid: a flat, row-major buffer of cells with index-based
/// neighbour links, driven one tick at a time by [`AtmosGrid::step`].
#[derive(Debug, Clone, Resource)]
pub struct AtmosGrid {
    width: u32,
    height: u32,
    cells: Vec<AtmosCell>,
    passable: Vec<bool>,
    // Scratch buffers reused across sub-steps to avoid per-tick heap allocations
    scratch_prior: Vec<(GasMixture, ActivityState)>,
    scratch_simulated: Vec<bool>,
    scratch_outbox: Vec<FluxOutbox>,
    scratch_inflow: Vec<InflowFaces>,
    scratch_delta: Vec<CellDelta>,
    scratch_activity: Vec<(ActivityState, u32)>,
}

impl AtmosGrid {
    /// Creates a grid of vacuum cells. Every cell starts passable and inactive.
    pub fn new(width: u32, height: u32) -> Self {
        let size = width as usize * height as usize;
        let cells = (0..size)
            .map(|idx| {
                let pos = IVec2::new((idx % width as usize) as i32, (idx / width as usize) as i32);
                AtmosCell::new(pos, GasMixture::new(CELL_VOLUME))
            })
            .collect();
        let mut grid = Self {
            width,
            height,
            cells,
            passable: vec![true; size],
            scratch_prior: Vec::with_capacity(size),
            scratch_simulated: vec![false; size],
            scratch_outbox: vec![[None; 4]; size],
            scratch_inflow: vec![InflowFaces::default(); size],
            scratch_delta: vec![CellDelta::default(); size],
            scratch_activity: vec![(ActivityState::Inactive, 0); size],
        };
        grid.rebuild_neighbors();
        grid
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn cells(&self) -> &[AtmosCell] {
        &self.cells
    }

    fn coord_to_index(&self, pos: IVec2) -> Option<usize> {
        if pos.x >= 0 && pos.x < self.width as i32 && pos.y >= 0 && pos.y < self.height as i32 {
            Some(pos.y as usize * self.width as usize + pos.x as usize)
        } else {
            None
        }
    }

    fn passable_index(&self, pos: IVec2) -> Option<usize> {
        self.coord_to_index(pos).filter(|idx| self.passable[*idx])
    }

    pub fn is_passable(&self, pos: IVec2) -> bool {
        self.passable_index(pos).is_some()
    }

    /// Rewires every cell's cardinal neighbour slots from the passability mask.
    /// Walls have no neighbours and are never anybody's neighbour.
    pub fn rebuild_neighbors(&mut self) {
        for idx in 0..self.cells.len() {
            let pos = self.cells[idx].position();
            let mut neighbors = [None; 4];
            if self.passable[idx] {
                for (slot, offset) in neighbors.iter_mut().zip(CARDINALS.iter()) {
                    *slot = self.passable_index(pos + *offset);
                }
            }
            self.cells[idx].neighbors = neighbors;
        }
    }

    /// Updates passability from the tilemap and rewires neighbours.
    ///
    /// A floor tile that becomes a wall loses its gas and leaves the simulation;
    /// a wall that becomes floor starts as vacuum. Cells next to any change are
    /// woken so the new boundary is simulated. Returns the number of changed cells.
    pub fn sync_walls(&mut self, tilemap: &Tilemap) -> usize {
        let mut changed = Vec::new();
        for idx in 0..self.cells.len() {
            let pos = self.cells[idx].position();
            let new_passable = matches!(tilemap.get(pos), Some(TileKind::Floor));
            if new_passable != self.passable[idx] {
                let cell = &mut self.cells[idx];
                cell.mixture.clear();
                cell.state = ActivityState::Inactive;
                cell.stable_ticks = 0;
                self.passable[idx] = new_passable;
                changed.push(idx);
            }
        }
        if changed.is_empty() {
            return 0;
        }

        self.rebuild_neighbors();
        for &idx in &changed {
            let pos = self.cells[idx].position();
            for offset in CARDINALS {
                if let Some(n) = self.passable_index(pos + offset) {
                    self.cells[n].wake(ActivityState::Active);
                }
            }
        }
        debug!("Synced {} wall changes into the atmos grid", changed.len());
        changed.len()
    }

    pub fn cell(&self, pos: IVec2) -> Option<&AtmosCell> {
        self.coord_to_index(pos).map(|idx| &self.cells[idx])
    }

    pub fn mixture_at(&self, pos: IVec2) -> Option<&GasMixture> {
        self.passable_index(pos).map(|idx| &self.cells[idx].mixture)
    }

    /// Returns the pressure at the given position, or None if out of bounds or a wall.
    pub fn pressure_at(&self, pos: IVec2) -> Option<f32> {
        self.mixture_at(pos).map(GasMixture::pressure)
    }

    pub fn reading_at(&self, pos: IVec2) -> Option<CellReading> {
        let idx = self.passable_index(pos)?;
        let cell = &self.cells[idx];
        Some(CellReading {
            pressure: cell.mixture.pressure(),
            temperature: cell.mixture.temperature(),
            moles: *cell.mixture.amounts(),
            state: cell.state,
        })
    }

    /// Runs `mutate` on the mixture at `pos` and wakes the cell.
    /// Returns None for out-of-bounds positions and walls.
    fn mutate_at<R>(&mut self, pos: IVec2, mutate: impl FnOnce(&mut GasMixture) -> R) -> Option<R> {
        let idx = self.passable_index(pos)?;
        let cell = &mut self.cells[idx];
        let result = mutate(&mut cell.mixture);
        cell.wake(ActivityState::Active);
        Some(result)
    }

    pub fn add_gas(&mut self, pos: IVec2, gas: Gas, moles: f32) -> bool {
        self.mutate_at(pos, |mix| mix.add_gas(gas, moles)).is_some()
    }

    /// Removes up to `moles` of `gas`; returns the amount actually removed.
    pub fn remove_gas(&mut self, pos: IVec2, gas: Gas, moles: f32) -> Option<f32> {
        self.mutate_at(pos, |mix| mix.remove_gas(gas, moles))
    }

    pub fn set_temperature(&mut self, pos: IVec2, temperature: f32) -> bool {
        self.mutate_at(pos, |mix| mix.set_temperature(temperature)).is_some()
    }

    /// Replaces the cell's gas. The cell keeps its own volume.
    pub fn set_mixture(&mut self, pos: IVec2, mixture: GasMixture) -> bool {
        self.mutate_at(pos, |mix| {
            let volume = mix.volume();
            *mix = mixture;
            mix.set_volume(volume);
        })
        .is_some()
    }

    /// Mixes `parcel` into the cell, conserving thermal energy.
    pub fn merge_into(&mut self, pos: IVec2, parcel: &GasMixture) -> bool {
        self.mutate_at(pos, |mix| mix.merge(parcel)).is_some()
    }

    /// Removes `moles` from the cell keeping its composition; returns the removed parcel.
    pub fn remove_from(&mut self, pos: IVec2, moles: f32) -> Option<GasMixture> {
        self.mutate_at(pos, |mix| mix.subtract_proportional(moles))
    }

    /// Returns the total number of moles across all cells in the grid.
    /// This should remain constant (within floating-point epsilon) during a
    /// step of a closed grid.
    pub fn total_moles(&self) -> f32 {
        self.cells.iter().map(|cell| cell.mixture.total_moles()).sum()
    }

    pub fn species_total(&self, gas: Gas) -> f32 {
        self.cells.iter().map(|cell| cell.mixture.moles(gas)).sum()
    }

    pub fn thermal_energy(&self) -> f32 {
        self.cells.iter().map(|cell| cell.mixture.thermal_energy()).sum()
    }

    pub fn simulated_cell_count(&self) -> usize {
        self.cells.iter().filter(|cell| cell.state.is_simulated()).count()
    }

    /// Advances the grid by `dt` seconds.
    ///
    /// Large `dt` values are split into sub-steps of at most
    /// [`AtmosConfig::max_substep`] so a single pass never has to move gas
    /// across more than one neighbour's worth of pressure difference. At most
    /// [`AtmosConfig::max_substeps`] passes run per call; beyond that the
    /// remaining time is dropped with a warning.
    pub fn step(&mut self, dt: f32, config: &AtmosConfig) -> TickStats {
        let mut stats = TickStats::default();
        if dt <= 0.0 || !dt.is_finite() || self.cells.is_empty() {
            return stats;
        }

        let max_substeps = config.max_substeps.max(1);
        let wanted = (dt / config.max_substep).ceil().max(1.0);
        let (substeps, substep_dt) = if wanted > max_substeps as f32 {
            warn!(
                "Atmos step of {dt}s needs {wanted} sub-steps, running {max_substeps} of {}s",
                config.max_substep
            );
            (max_substeps, config.max_substep)
        } else {
            let substeps = wanted as u32;
            (substeps, dt / substeps as f32)
        };

        for _ in 0..substeps {
            let pass = self.step_substep(substep_dt, config);
            stats.simulated_cells = pass.simulated_cells;
            stats.woken_cells += pass.woken_cells;
        }
        stats.substeps = substeps;
        for cell in &self.cells {
            match cell.state {
                ActivityState::Active => stats.active_cells += 1,
                ActivityState::SemiActive => stats.semi_active_cells += 1,
                ActivityState::Inactive => {}
            }
        }
        stats
    }

    /// One two-phase pass: wake and load snapshots for every cell, compute
    /// flux in parallel from those snapshots, then write all transfers back.
    fn step_substep(&mut self, dt: f32, config: &AtmosConfig) -> TickStats {
        let mut stats = TickStats::default();

        // Wake inactive neighbours of simulated cells. Decided from the set of
        // cells simulated at the start of the pass so the result does not
        // depend on iteration order.
        for (flag, cell) in self.scratch_simulated.iter_mut().zip(self.cells.iter()) {
            *flag = cell.state.is_simulated();
        }
        for idx in 0..self.cells.len() {
            if !self.scratch_simulated[idx] {
                continue;
            }
            let neighbors = self.cells[idx].neighbors;
            for n in neighbors.into_iter().flatten() {
                if self.cells[n].state.is_simulated() {
                    continue;
                }
                let (dp, dtemp) = differential(&self.cells[idx].mixture, &self.cells[n].mixture);
                let level = if dp > config.active_pressure_delta
                    || dtemp > config.active_temperature_delta
                {
                    ActivityState::Active
                } else if dp > config.settle_pressure_delta
                    || dtemp > config.settle_temperature_delta
                {
                    ActivityState::SemiActive
                } else {
                    continue;
                };
                self.cells[n].wake(level);
                stats.woken_cells += 1;
            }
        }

        // Phase 1: load. Every snapshot is taken before any flux is computed.
        self.scratch_prior.clear();
        self.scratch_prior
            .extend(self.cells.iter().map(|cell| (cell.mixture, cell.state)));
        let prior = &self.scratch_prior;
        self.cells
            .par_iter_mut()
            .for_each(|cell| cell.load_snapshots(prior));

        // Phase 2: compute. Cells read only their own gas and their snapshots.
        let cells = &self.cells;
        self.scratch_outbox
            .par_iter_mut()
            .zip(cells.par_iter())
            .for_each(|(outbox, cell)| *outbox = cell.compute_flux(dt, config));
        stats.simulated_cells = cells.iter().filter(|c| c.state.is_simulated()).count();

        // Split each pair's equilibrium across every face touching either end.
        count_inflows(&self.scratch_outbox, &mut self.scratch_inflow);
        let inflows = &self.scratch_inflow;
        self.scratch_outbox.par_iter_mut().for_each(|outbox| {
            for transfer in outbox.iter_mut().flatten() {
                transfer.limit_to_shared_equilibrium(inflows[transfer.to]);
            }
        });

        // Phase 3: write back. Accumulate every transfer, then apply per cell.
        for delta in self.scratch_delta.iter_mut() {
            delta.clear();
        }
        for (idx, (cell, outbox)) in self.cells.iter().zip(self.scratch_outbox.iter()).enumerate() {
            if outbox.iter().any(Option::is_some) {
                cell.accumulate_outbox(idx, outbox, &mut self.scratch_delta);
            }
        }
        let deltas = &self.scratch_delta;
        self.cells
            .par_iter_mut()
            .zip(deltas.par_iter())
            .for_each(|(cell, delta)| cell.apply_delta(delta));

        // Re-evaluate activity for every cell that took part in the pass.
        let cells = &self.cells;
        self.scratch_activity
            .par_iter_mut()
            .zip(cells.par_iter())
            .for_each(|(next, cell)| {
                *next = if cell.state.is_simulated() {
                    cell.next_activity(cells, config)
                } else {
                    (cell.state, cell.stable_ticks)
                };
            });
        for (cell, &(state, stable)) in self.cells.iter_mut().zip(self.scratch_activity.iter()) {
            cell.state = state;
            cell.stable_ticks = stable;
        }

        trace!(
            "Atmos pass: {} simulated, {} woken",
            stats.simulated_cells,
            stats.woken_cells
        );
        stats
    }
}

/// Builds a grid matching `tilemap`, with every floor cell holding a copy of
/// `template` (resized to the cell volume) and starting active.
pub fn initialize_atmos_grid(tilemap: &Tilemap, template: &GasMixture) -> AtmosGrid {
    let mut grid = AtmosGrid::new(tilemap.width(), tilemap.height());
    grid.sync_walls(tilemap);
    for (pos, kind) in tilemap.iter() {
        if kind.is_walkable() {
            grid.set_mixture(pos, *template);
        }
    }
    grid
}
