use bevy::prelude::*;
use tiles::Tilemap;

pub mod cell;
pub mod config;
pub mod constants;
pub mod device;
pub mod gas;
pub mod grid;
pub mod pipe_graph;
pub mod pipe_net;

pub use cell::{ActivityState, AtmosCell, equalizing_moles};
pub use config::AtmosConfig;
pub use device::{
    AirVent, AtmosContext, AtmosDevice, GasFilter, GasGenerator, GasMixer, StepAtmos, VentMode,
};
pub use gas::{GAS_COUNT, Gas, GasAmounts, GasMixture};
pub use grid::{AtmosGrid, CellReading, TickStats, initialize_atmos_grid};
pub use pipe_graph::{AtmosPipe, PipeKey, PipeKind, PipeNetworks};
pub use pipe_net::PipeNet;

/// Phases of one atmospherics tick, run in order inside `FixedUpdate`.
#[derive(SystemSet, Debug, Clone, PartialEq, Eq, Hash)]
pub enum AtmosSet {
    /// Applies pipe/wall changes and rebuilds dirty pipe networks.
    Topology,
    /// Steps every [`AtmosDevice`].
    Devices,
    /// Spreads each network's gas back over its pipes.
    Equalize,
    /// Runs the grid flux sweep.
    Flux,
}

/// Pipe topology changes requested by the rest of the game.
#[derive(Message, Clone, Debug)]
pub enum PipeTopologyEvent {
    RegisterPipe { key: PipeKey, kind: PipeKind },
    /// The removed pipe's gas is released onto its tile.
    RemovePipe { key: PipeKey },
    SetValve { key: PipeKey, open: bool },
}

/// Fixed-rate gas simulation over the [`Tilemap`] and its pipes.
///
/// Insert an [`AtmosConfig`] before adding the plugin to override the defaults.
/// The [`AtmosGrid`] resource is left to the caller (see
/// [`initialize_atmos_grid`]); grid and device systems idle until it exists.
pub struct AtmosphericsPlugin;

impl Plugin for AtmosphericsPlugin {
    fn build(&self, app: &mut App) {
        let config = app
            .world_mut()
            .remove_resource::<AtmosConfig>()
            .unwrap_or_default()
            .validated_or_default();
        info!(
            "Atmospherics running at {} Hz (flux {}, heat {})",
            config.tick_rate_hz, config.flux_coefficient, config.heat_transfer_coefficient
        );
        app.insert_resource(Time::<Fixed>::from_hz(config.tick_rate_hz));
        app.insert_resource(config);
        app.init_resource::<PipeNetworks>();
        app.init_resource::<TickStats>();
        app.add_message::<PipeTopologyEvent>();
        app.register_type::<Gas>();
        app.register_type::<GasMixture>();
        app.register_type::<ActivityState>();

        app.configure_sets(
            FixedUpdate,
            (
                AtmosSet::Topology,
                AtmosSet::Devices,
                AtmosSet::Equalize,
                AtmosSet::Flux,
            )
                .chain(),
        );
        app.add_systems(
            FixedUpdate,
            (
                (apply_topology_events, wall_sync_system, resolve_pipe_networks)
                    .chain()
                    .in_set(AtmosSet::Topology),
                step_devices
                    .in_set(AtmosSet::Devices)
                    .run_if(resource_exists::<AtmosGrid>),
                equalize_pipe_networks.in_set(AtmosSet::Equalize),
                simulate_flux
                    .in_set(AtmosSet::Flux)
                    .run_if(resource_exists::<AtmosGrid>),
            ),
        );
    }
}

fn apply_topology_events(
    mut events: MessageReader<PipeTopologyEvent>,
    mut tilemap: Option<ResMut<Tilemap>>,
    mut pipes: ResMut<PipeNetworks>,
    mut grid: Option<ResMut<AtmosGrid>>,
) {
    for event in events.read() {
        match *event {
            PipeTopologyEvent::RegisterPipe { key, kind } => {
                let Some(tilemap) = tilemap.as_mut() else {
                    warn!("Cannot register pipe {key:?}: no tilemap");
                    continue;
                };
                if !tilemap.set_pipe(key.position, key.layer, true) {
                    warn!("Cannot register pipe {key:?}: out of bounds");
                    continue;
                }
                if !pipes.register_pipe(tilemap, key, kind) {
                    debug!("Pipe {key:?} already registered");
                }
            }
            PipeTopologyEvent::RemovePipe { key } => {
                if let Some(tilemap) = tilemap.as_mut() {
                    tilemap.set_pipe(key.position, key.layer, false);
                }
                let Some(released) = pipes.remove_pipe(key) else {
                    debug!("Cannot remove pipe {key:?}: not registered");
                    continue;
                };
                if released.is_empty() {
                    continue;
                }
                let vented = grid
                    .as_mut()
                    .is_some_and(|grid| grid.merge_into(key.position, &released));
                if !vented {
                    warn!(
                        "Pipe {key:?} removed with {:.3} mol and no floor to release it on",
                        released.total_moles()
                    );
                }
            }
            PipeTopologyEvent::SetValve { key, open } => {
                let Some(tilemap) = tilemap.as_ref() else {
                    warn!("Cannot set valve {key:?}: no tilemap");
                    continue;
                };
                if !pipes.set_valve(tilemap, key, open) {
                    warn!("Cannot set valve {key:?}: no valve there");
                }
            }
        }
    }
}

/// Syncs wall passability when the tilemap changes.
fn wall_sync_system(tilemap: Option<Res<Tilemap>>, mut grid: Option<ResMut<AtmosGrid>>) {
    let Some(tilemap) = tilemap else { return };
    let Some(ref mut grid) = grid else { return };

    if tilemap.is_changed() {
        grid.sync_walls(&tilemap);
    }
}

fn resolve_pipe_networks(mut pipes: ResMut<PipeNetworks>) {
    pipes.on_tick();
}

fn step_devices(
    time: Res<Time<Fixed>>,
    mut devices: Query<&mut AtmosDevice>,
    mut grid: ResMut<AtmosGrid>,
    mut pipes: ResMut<PipeNetworks>,
) {
    let dt = time.timestep().as_secs_f32();
    let mut ctx = AtmosContext {
        grid: &mut *grid,
        pipes: &mut *pipes,
    };
    for mut device in &mut devices {
        device.0.step_atmos(dt, &mut ctx);
    }
}

fn equalize_pipe_networks(mut pipes: ResMut<PipeNetworks>) {
    pipes.equalize();
}

fn simulate_flux(
    time: Res<Time<Fixed>>,
    config: Res<AtmosConfig>,
    mut grid: ResMut<AtmosGrid>,
    mut stats: ResMut<TickStats>,
) {
    let dt = time.timestep().as_secs_f32();
    *stats = grid.step(dt, &config);
    debug!(
        "Atmos tick: {} simulated ({} active, {} semi-active), {} woken",
        stats.simulated_cells, stats.active_cells, stats.semi_active_cells, stats.woken_cells
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use tiles::{PipeLayer, TileKind, TilesPlugin};

    fn test_app(config: Option<AtmosConfig>) -> App {
        let mut app = App::new();
        if let Some(config) = config {
            app.insert_resource(config);
        }
        app.add_plugins((MinimalPlugins, TilesPlugin, AtmosphericsPlugin));
        app
    }

    /// An 8x1 corridor of floor with a grid of vacuum.
    fn corridor_app() -> App {
        let mut app = test_app(None);
        let tilemap = Tilemap::new(8, 1, TileKind::Floor);
        let grid = initialize_atmos_grid(&tilemap, &GasMixture::new(constants::CELL_VOLUME));
        app.insert_resource(tilemap);
        app.insert_resource(grid);
        app
    }

    fn tick(app: &mut App, count: usize) {
        for _ in 0..count {
            app.world_mut().run_schedule(FixedUpdate);
        }
    }

    fn key(x: i32) -> PipeKey {
        PipeKey::new(IVec2::new(x, 0), PipeLayer::Distribution)
    }

    #[test]
    fn test_plugin_uses_configured_tick_rate() {
        let app = test_app(Some(AtmosConfig {
            tick_rate_hz: 20.0,
            ..default()
        }));
        let time = app.world().resource::<Time<Fixed>>();
        assert!((time.timestep().as_secs_f64() - 0.05).abs() < 1e-9);
    }

    #[test]
    fn test_plugin_falls_back_on_invalid_config() {
        let app = test_app(Some(AtmosConfig {
            flux_coefficient: -1.0,
            ..default()
        }));
        assert_eq!(*app.world().resource::<AtmosConfig>(), AtmosConfig::default());
    }

    #[test]
    fn test_register_message_builds_network() {
        let mut app = corridor_app();
        for x in 0..3 {
            app.world_mut().write_message(PipeTopologyEvent::RegisterPipe {
                key: key(x),
                kind: PipeKind::Pipe,
            });
        }
        tick(&mut app, 1);

        let pipes = app.world().resource::<PipeNetworks>();
        assert_eq!(pipes.pipe_count(), 3);
        assert_eq!(pipes.network_count(), 1);
        assert!(!pipes.is_dirty());
        let tilemap = app.world().resource::<Tilemap>();
        assert!(tilemap.has_pipe(IVec2::new(1, 0), PipeLayer::Distribution));
    }

    #[test]
    fn test_removed_pipe_vents_onto_tile() {
        let mut app = corridor_app();
        app.world_mut().write_message(PipeTopologyEvent::RegisterPipe {
            key: key(2),
            kind: PipeKind::Pipe,
        });
        tick(&mut app, 1);
        app.world_mut()
            .resource_mut::<PipeNetworks>()
            .add_core_gasses(key(2), &[(Gas::Oxygen, 12.0)]);

        app.world_mut()
            .write_message(PipeTopologyEvent::RemovePipe { key: key(2) });
        tick(&mut app, 1);

        let pipes = app.world().resource::<PipeNetworks>();
        assert_eq!(pipes.pipe_count(), 0);
        assert_eq!(pipes.network_count(), 0);
        let grid = app.world().resource::<AtmosGrid>();
        assert!((grid.species_total(Gas::Oxygen) - 12.0).abs() < 1e-3);
    }

    #[test]
    fn test_vent_device_feeds_room() {
        let mut app = corridor_app();
        app.world_mut().write_message(PipeTopologyEvent::RegisterPipe {
            key: key(0),
            kind: PipeKind::Pipe,
        });
        app.world_mut().spawn(AtmosDevice::new(GasGenerator {
            pipe: key(0),
            gas: Gas::Nitrogen,
            rate: 50.0,
            temperature: constants::T20C,
            max_pressure: 5_000.0,
        }));
        app.world_mut().spawn(AtmosDevice::new(AirVent {
            pipe: key(0),
            mode: VentMode::Release,
            target_pressure: constants::ONE_ATMOSPHERE,
            rate: 20.0,
        }));
        tick(&mut app, 30);

        let grid = app.world().resource::<AtmosGrid>();
        assert!(grid.total_moles() > 0.0);
        // Gas has spread past the vent tile.
        assert!(grid.mixture_at(IVec2::new(3, 0)).unwrap().total_moles() > 0.0);
        let stats = app.world().resource::<TickStats>();
        assert!(stats.simulated_cells > 0);
    }

    #[test]
    fn test_wall_placed_in_tilemap_seals_cell() {
        let mut app = corridor_app();
        app.world_mut()
            .resource_mut::<AtmosGrid>()
            .add_gas(IVec2::new(4, 0), Gas::Oxygen, 10.0);
        tick(&mut app, 1);

        app.world_mut()
            .resource_mut::<Tilemap>()
            .set(IVec2::new(4, 0), TileKind::Wall);
        tick(&mut app, 1);

        let grid = app.world().resource::<AtmosGrid>();
        assert!(!grid.is_passable(IVec2::new(4, 0)));
        assert!(grid.mixture_at(IVec2::new(4, 0)).is_none());
    }
}
