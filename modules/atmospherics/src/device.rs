use bevy::prelude::*;

use crate::constants::R_IDEAL_GAS_EQUATION;
use crate::gas::{Gas, GasMixture};
use crate::grid::AtmosGrid;
use crate::pipe_graph::{PipeKey, PipeNetworks};

/// Everything a device may touch during its step.
pub struct AtmosContext<'a> {
    pub grid: &'a mut AtmosGrid,
    pub pipes: &'a mut PipeNetworks,
}

/// A machine that moves or produces gas once per simulation tick.
///
/// Devices run after pipe topology is resolved and before networks are
/// equalized, so anything they add to a network reaches every member the same tick.
pub trait StepAtmos: Send + Sync + 'static {
    fn step_atmos(&mut self, dt: f32, ctx: &mut AtmosContext);
}

#[derive(Component)]
pub struct AtmosDevice(pub Box<dyn StepAtmos>);

impl AtmosDevice {
    pub fn new(device: impl StepAtmos) -> Self {
        Self(Box::new(device))
    }
}

/// Produces one gas into a pipe network until the network reaches `max_pressure`.
#[derive(Debug, Clone)]
pub struct GasGenerator {
    pub pipe: PipeKey,
    pub gas: Gas,
    /// Moles per second.
    pub rate: f32,
    pub temperature: f32,
    pub max_pressure: f32,
}

impl StepAtmos for GasGenerator {
    fn step_atmos(&mut self, dt: f32, ctx: &mut AtmosContext) {
        let Some(net) = ctx.pipes.network_at(self.pipe) else {
            return;
        };
        if net.pressure() >= self.max_pressure {
            return;
        }
        let mut parcel = GasMixture::new(net.volume()).with_temperature(self.temperature);
        parcel.add_gas(self.gas, (self.rate * dt).max(0.0));
        ctx.pipes.merge_core_gasses(self.pipe, &parcel);
    }
}

/// Moves one gas from the input network to the output network.
#[derive(Debug, Clone)]
pub struct GasFilter {
    pub input: PipeKey,
    pub output: PipeKey,
    pub gas: Gas,
    /// Moles per second.
    pub rate: f32,
}

impl StepAtmos for GasFilter {
    fn step_atmos(&mut self, dt: f32, ctx: &mut AtmosContext) {
        if ctx.pipes.network_at(self.output).is_none() {
            return;
        }
        let Some(parcel) = ctx
            .pipes
            .remove_core_gasses(self.input, &[(self.gas, (self.rate * dt).max(0.0))])
        else {
            return;
        };
        if !parcel.is_empty() {
            ctx.pipes.merge_core_gasses(self.output, &parcel);
        }
    }
}

/// Draws from two input networks in a fixed ratio into one output network.
#[derive(Debug, Clone)]
pub struct GasMixer {
    pub inputs: [PipeKey; 2],
    /// Share of each tick's flow taken from the first input, in `[0, 1]`.
    pub first_ratio: f32,
    pub output: PipeKey,
    /// Moles per second.
    pub rate: f32,
}

impl StepAtmos for GasMixer {
    fn step_atmos(&mut self, dt: f32, ctx: &mut AtmosContext) {
        if ctx.pipes.network_at(self.output).is_none() {
            return;
        }
        let ratio = self.first_ratio.clamp(0.0, 1.0);
        let shares = [ratio, 1.0 - ratio];

        let mut available = [0.0_f32; 2];
        for (slot, key) in available.iter_mut().zip(self.inputs) {
            match ctx.pipes.network_at(key) {
                Some(net) => *slot = net.total_moles(),
                None => return,
            }
        }
        // The scarcer input limits the whole draw so the output keeps the ratio.
        let mut flow = (self.rate * dt).max(0.0);
        for (share, moles) in shares.iter().zip(available) {
            if *share > 0.0 {
                flow = flow.min(moles / share);
            }
        }
        if flow <= 0.0 {
            return;
        }

        for (share, key) in shares.iter().zip(self.inputs) {
            if *share <= 0.0 {
                continue;
            }
            if let Some(parcel) = ctx.pipes.remove_core_moles(key, flow * share) {
                ctx.pipes.merge_core_gasses(self.output, &parcel);
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VentMode {
    /// Pumps network gas out until the tile reaches the target pressure.
    Release,
    /// Draws tile gas into the network until the tile drops to the target pressure.
    Siphon,
}

/// Exchanges gas between a pipe network and the floor cell it sits on.
#[derive(Debug, Clone)]
pub struct AirVent {
    pub pipe: PipeKey,
    pub mode: VentMode,
    /// Tile pressure (kPa) the vent works toward.
    pub target_pressure: f32,
    /// Maximum moles per second.
    pub rate: f32,
}

impl AirVent {
    /// Moles that would shift the tile to the target pressure at its current temperature.
    fn moles_to_target(&self, tile: &GasMixture) -> f32 {
        let delta = match self.mode {
            VentMode::Release => self.target_pressure - tile.pressure(),
            VentMode::Siphon => tile.pressure() - self.target_pressure,
        };
        if delta <= 0.0 {
            return 0.0;
        }
        delta * tile.volume() / (R_IDEAL_GAS_EQUATION * tile.temperature())
    }
}

impl StepAtmos for AirVent {
    fn step_atmos(&mut self, dt: f32, ctx: &mut AtmosContext) {
        let position = self.pipe.position;
        let Some(tile) = ctx.grid.mixture_at(position) else {
            return;
        };
        if !ctx.grid.is_passable(position) || ctx.pipes.network_at(self.pipe).is_none() {
            return;
        }
        let moles = self.moles_to_target(tile).min((self.rate * dt).max(0.0));
        if moles <= 0.0 {
            return;
        }

        match self.mode {
            VentMode::Release => {
                if let Some(parcel) = ctx.pipes.remove_core_moles(self.pipe, moles) {
                    ctx.grid.merge_into(position, &parcel);
                }
            }
            VentMode::Siphon => {
                if let Some(parcel) = ctx.grid.remove_from(position, moles) {
                    ctx.pipes.merge_core_gasses(self.pipe, &parcel);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::{CELL_VOLUME, ONE_ATMOSPHERE, T20C};
    use crate::pipe_graph::PipeKind;
    use tiles::{PipeLayer, TileKind, Tilemap};

    fn key(x: i32, y: i32) -> PipeKey {
        PipeKey::new(IVec2::new(x, y), PipeLayer::Distribution)
    }

    /// A 5x1 floor with one pipe per listed position. Adjacent pipes share a network.
    fn setup(positions: &[(i32, i32)]) -> (AtmosGrid, PipeNetworks) {
        let mut tilemap = Tilemap::new(5, 1, TileKind::Floor);
        let mut pipes = PipeNetworks::default();
        for &(x, y) in positions {
            tilemap.set_pipe(IVec2::new(x, y), PipeLayer::Distribution, true);
            pipes.register_pipe(&tilemap, key(x, y), PipeKind::Pipe);
        }
        pipes.on_tick();
        (AtmosGrid::new(5, 1), pipes)
    }

    fn step(device: &mut impl StepAtmos, grid: &mut AtmosGrid, pipes: &mut PipeNetworks, dt: f32) {
        let mut ctx = AtmosContext { grid, pipes };
        device.step_atmos(dt, &mut ctx);
    }

    #[test]
    fn test_generator_adds_rate_times_dt() {
        let (mut grid, mut pipes) = setup(&[(0, 0)]);
        let mut generator = GasGenerator {
            pipe: key(0, 0),
            gas: Gas::Oxygen,
            rate: 10.0,
            temperature: T20C,
            max_pressure: 10_000.0,
        };
        step(&mut generator, &mut grid, &mut pipes, 0.5);
        let net = pipes.network_at(key(0, 0)).unwrap();
        assert!((net.mixture().moles(Gas::Oxygen) - 5.0).abs() < 1e-5);
    }

    #[test]
    fn test_generator_stops_at_max_pressure() {
        let (mut grid, mut pipes) = setup(&[(0, 0)]);
        let mut generator = GasGenerator {
            pipe: key(0, 0),
            gas: Gas::Nitrogen,
            rate: 100.0,
            temperature: T20C,
            max_pressure: 1.0,
        };
        step(&mut generator, &mut grid, &mut pipes, 1.0);
        let after_first = pipes.total_moles();
        step(&mut generator, &mut grid, &mut pipes, 1.0);
        assert_eq!(pipes.total_moles(), after_first);
    }

    #[test]
    fn test_filter_moves_only_its_gas() {
        let (mut grid, mut pipes) = setup(&[(0, 0), (2, 0)]);
        pipes.add_core_gasses(key(0, 0), &[(Gas::Plasma, 4.0), (Gas::Oxygen, 4.0)]);
        let mut filter = GasFilter {
            input: key(0, 0),
            output: key(2, 0),
            gas: Gas::Plasma,
            rate: 100.0,
        };
        step(&mut filter, &mut grid, &mut pipes, 1.0);

        let input = pipes.network_at(key(0, 0)).unwrap().mixture();
        let output = pipes.network_at(key(2, 0)).unwrap().mixture();
        assert_eq!(input.moles(Gas::Plasma), 0.0);
        assert_eq!(input.moles(Gas::Oxygen), 4.0);
        assert_eq!(output.moles(Gas::Plasma), 4.0);
    }

    #[test]
    fn test_filter_without_output_keeps_gas() {
        let (mut grid, mut pipes) = setup(&[(0, 0)]);
        pipes.add_core_gasses(key(0, 0), &[(Gas::Plasma, 4.0)]);
        let mut filter = GasFilter {
            input: key(0, 0),
            output: key(4, 0),
            gas: Gas::Plasma,
            rate: 100.0,
        };
        step(&mut filter, &mut grid, &mut pipes, 1.0);
        assert_eq!(pipes.total_moles(), 4.0);
    }

    #[test]
    fn test_mixer_keeps_ratio_when_one_input_runs_dry() {
        let (mut grid, mut pipes) = setup(&[(0, 0), (2, 0), (4, 0)]);
        pipes.add_core_gasses(key(0, 0), &[(Gas::Oxygen, 2.0)]);
        pipes.add_core_gasses(key(2, 0), &[(Gas::Nitrogen, 100.0)]);
        let mut mixer = GasMixer {
            inputs: [key(0, 0), key(2, 0)],
            first_ratio: 0.2,
            output: key(4, 0),
            rate: 1000.0,
        };
        step(&mut mixer, &mut grid, &mut pipes, 1.0);

        // Oxygen limits the draw to 10 moles: 2 O2 + 8 N2.
        let output = pipes.network_at(key(4, 0)).unwrap().mixture();
        assert!((output.moles(Gas::Oxygen) - 2.0).abs() < 1e-4);
        assert!((output.moles(Gas::Nitrogen) - 8.0).abs() < 1e-4);
        assert!((pipes.total_moles() - 102.0).abs() < 1e-3);
    }

    #[test]
    fn test_vent_release_fills_tile_toward_target() {
        let (mut grid, mut pipes) = setup(&[(1, 0)]);
        pipes.add_core_gasses(key(1, 0), &[(Gas::Nitrogen, 500.0)]);
        let mut vent = AirVent {
            pipe: key(1, 0),
            mode: VentMode::Release,
            target_pressure: ONE_ATMOSPHERE,
            rate: 1000.0,
        };
        step(&mut vent, &mut grid, &mut pipes, 1.0);

        let tile = grid.pressure_at(IVec2::new(1, 0)).unwrap();
        assert!((tile - ONE_ATMOSPHERE).abs() < 0.5, "tile at {tile}");
        let moved = grid.total_moles();
        assert!((moved + pipes.total_moles() - 500.0).abs() < 1e-2);

        // Already at target: nothing more moves.
        step(&mut vent, &mut grid, &mut pipes, 1.0);
        assert!((grid.total_moles() - moved).abs() < 1e-2);
    }

    #[test]
    fn test_vent_siphon_drains_tile() {
        let (mut grid, mut pipes) = setup(&[(1, 0)]);
        let tile = IVec2::new(1, 0);
        grid.set_mixture(tile, GasMixture::standard_air(CELL_VOLUME));
        let before = grid.total_moles();
        let mut vent = AirVent {
            pipe: key(1, 0),
            mode: VentMode::Siphon,
            target_pressure: 0.0,
            rate: 5.0,
        };
        step(&mut vent, &mut grid, &mut pipes, 1.0);

        assert!((before - grid.total_moles() - 5.0).abs() < 1e-3);
        assert!((pipes.total_moles() - 5.0).abs() < 1e-3);
    }
}
