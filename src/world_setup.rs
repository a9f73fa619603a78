use atmospherics::constants::{CELL_VOLUME, N2STANDARD, O2STANDARD, T20C};
use atmospherics::{
    AirVent, AtmosDevice, Gas, GasFilter, GasGenerator, GasMixer, GasMixture, PipeKey, PipeKind,
    PipeTopologyEvent, VentMode, initialize_atmos_grid,
};
use bevy::prelude::*;
use tiles::{PipeLayer, Tilemap};

use crate::config::AppConfig;

/// The east room's only gas source, fed under the wall by the distribution line.
const EAST_VENT: IVec2 = IVec2::new(13, 5);
const WASTE_VENT: IVec2 = IVec2::new(3, 3);
const O2_TANK: IVec2 = IVec2::new(2, 1);
const N2_TANK: IVec2 = IVec2::new(2, 8);
const DISTRIBUTION_VALVE: IVec2 = IVec2::new(10, 5);

pub struct WorldSetupPlugin;

impl Plugin for WorldSetupPlugin {
    fn build(&self, app: &mut App) {
        app.add_systems(Startup, setup_world);
    }
}

/// Builds the demo station: a pressurised west room, an evacuated east room,
/// and a distribution line that refills the east room from two gas tanks.
pub fn setup_world(
    mut commands: Commands,
    config: Res<AppConfig>,
    mut topology: MessageWriter<PipeTopologyEvent>,
) {
    let tilemap = Tilemap::test_room();
    let air = GasMixture::at_pressure(
        CELL_VOLUME,
        T20C,
        config.atmospherics.standard_pressure,
        &[(Gas::Oxygen, O2STANDARD), (Gas::Nitrogen, N2STANDARD)],
    );
    let mut grid = initialize_atmos_grid(&tilemap, &air);
    for x in 11..=14 {
        for y in 1..=8 {
            grid.set_mixture(IVec2::new(x, y), GasMixture::new(CELL_VOLUME));
        }
    }

    // Tanks on the auxiliary layer, the feed line on distribution.
    let mut pipes = Vec::new();
    pipes.extend((2..=4).map(|x| (IVec2::new(x, 1), PipeLayer::Auxiliary, PipeKind::Pipe)));
    pipes.extend((2..=4).map(|x| (IVec2::new(x, 8), PipeLayer::Auxiliary, PipeKind::Pipe)));
    for x in 4..=13 {
        let kind = if x == DISTRIBUTION_VALVE.x {
            PipeKind::Valve { open: true }
        } else {
            PipeKind::Pipe
        };
        pipes.push((IVec2::new(x, 5), PipeLayer::Distribution, kind));
    }
    pipes.push((WASTE_VENT, PipeLayer::Waste, PipeKind::Pipe));
    let pipe_count = pipes.len();
    for (position, layer, kind) in pipes {
        topology.write(PipeTopologyEvent::RegisterPipe {
            key: PipeKey::new(position, layer),
            kind,
        });
    }

    let standard = config.atmospherics.standard_pressure;
    let o2_tank = PipeKey::new(O2_TANK, PipeLayer::Auxiliary);
    let n2_tank = PipeKey::new(N2_TANK, PipeLayer::Auxiliary);
    let feed = PipeKey::new(IVec2::new(4, 5), PipeLayer::Distribution);
    let waste = PipeKey::new(WASTE_VENT, PipeLayer::Waste);
    commands.spawn((
        Name::new("O2 generator"),
        AtmosDevice::new(GasGenerator {
            pipe: o2_tank,
            gas: Gas::Oxygen,
            rate: 20.0,
            temperature: T20C,
            max_pressure: standard * 20.0,
        }),
    ));
    commands.spawn((
        Name::new("N2 generator"),
        AtmosDevice::new(GasGenerator {
            pipe: n2_tank,
            gas: Gas::Nitrogen,
            rate: 60.0,
            temperature: T20C,
            max_pressure: standard * 20.0,
        }),
    ));
    commands.spawn((
        Name::new("Air mixer"),
        AtmosDevice::new(GasMixer {
            inputs: [o2_tank, n2_tank],
            first_ratio: O2STANDARD,
            output: feed,
            rate: 40.0,
        }),
    ));
    commands.spawn((
        Name::new("East vent"),
        AtmosDevice::new(AirVent {
            pipe: PipeKey::new(EAST_VENT, PipeLayer::Distribution),
            mode: VentMode::Release,
            target_pressure: standard,
            rate: 30.0,
        }),
    ));
    commands.spawn((
        Name::new("Waste scrubber"),
        AtmosDevice::new(AirVent {
            pipe: waste,
            mode: VentMode::Siphon,
            target_pressure: standard,
            rate: 10.0,
        }),
    ));
    commands.spawn((
        Name::new("Waste oxygen reclaimer"),
        AtmosDevice::new(GasFilter {
            input: waste,
            output: o2_tank,
            gas: Gas::Oxygen,
            rate: 5.0,
        }),
    ));

    info!(
        "Station ready: {}x{} tiles, {:.1} mol of air, {} pipe segments queued",
        tilemap.width(),
        tilemap.height(),
        grid.total_moles(),
        pipe_count
    );
    commands.insert_resource(tilemap);
    commands.insert_resource(grid);
}
