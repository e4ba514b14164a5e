//! Cityforge - procedural 2D city layout synthesizer
//!
//! Headless driver: runs the generation pipeline in the background, logs a
//! summary of the finished layout, and exits. Rendering, cameras, and UI
//! live with the consumers of [`CityLayout`], not here.

use bevy::app::AppExit;
use bevy::log::LogPlugin;
use bevy::prelude::*;

use cityforge::{CityGenPlugin, CityLayout};

fn main() {
    App::new()
        .add_plugins((MinimalPlugins, LogPlugin::default()))
        .add_plugins(CityGenPlugin)
        .add_systems(Update, report_and_exit.run_if(resource_added::<CityLayout>))
        .run();
}

fn report_and_exit(layout: Res<CityLayout>, mut exit: EventWriter<AppExit>) {
    info!(
        "layout ready: {} major nodes, {} minor nodes, {} blocks, {} lots ({} parks)",
        layout.graph.major_nodes.len(),
        layout.graph.minor_nodes.len(),
        layout.blocks.len(),
        layout.lots.len(),
        layout.lots.iter().filter(|lot| lot.park).count()
    );
    exit.send(AppExit::Success);
}
