use atmospherics::{AtmosSet, AtmosphericsPlugin, TickStats};
use bevy::log::{Level, LogPlugin};
use bevy::prelude::*;
use tiles::TilesPlugin;

mod config;
mod world_setup;

use crate::config::AppConfig;

fn parse_log_level(s: &str) -> Level {
    match s.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" | "warning" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    }
}

fn main() {
    let app_config = crate::config::load_config();
    let log_level = parse_log_level(&app_config.debug.log_level);

    let mut app = App::new();
    // The plugin takes ownership of the atmospherics section and validates it.
    app.insert_resource(app_config.atmospherics.clone());
    app.insert_resource(app_config);

    // Headless: no window, no rendering, just the fixed-rate simulation.
    app.add_plugins(MinimalPlugins)
        .add_plugins(LogPlugin {
            level: log_level,
            ..default()
        })
        .add_plugins(TilesPlugin)
        .add_plugins(AtmosphericsPlugin)
        .add_plugins(world_setup::WorldSetupPlugin)
        .add_systems(FixedUpdate, report_and_exit.after(AtmosSet::Flux));

    app.run();
}

/// Logs grid statistics periodically and exits once the configured tick count is reached.
fn report_and_exit(
    mut ticks: Local<u64>,
    config: Res<AppConfig>,
    stats: Res<TickStats>,
    grid: Option<Res<atmospherics::AtmosGrid>>,
    mut exit: MessageWriter<AppExit>,
) {
    *ticks += 1;
    let interval = config.run.stats_interval.max(1);
    if *ticks % interval == 0 {
        let moles = grid.as_ref().map_or(0.0, |grid| grid.total_moles());
        info!(
            "Tick {}: {} simulated cells ({} active, {} semi-active), {:.1} mol on the grid",
            *ticks, stats.simulated_cells, stats.active_cells, stats.semi_active_cells, moles
        );
    }
    if config.run.ticks > 0 && *ticks >= config.run.ticks {
        info!("Reached {} ticks, shutting down", *ticks);
        exit.write(AppExit::Success);
    }
}
