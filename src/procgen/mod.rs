//! Procedural city layout synthesis.
//!
//! - Extended L-system road growth (major + minor passes)
//! - Block extraction by geometric node thickening
//! - Recursive lot subdivision via minimum bounding rectangles
//!
//! The five stages run strictly sequentially on one seeded RNG; the plugin
//! runs the whole pipeline as a single background compute task and publishes
//! the finished [`CityLayout`] as a resource.

use bevy::prelude::*;
use bevy::tasks::{block_on, futures_lite::future, AsyncComputeTaskPool, Task};
use rand::{rngs::StdRng, SeedableRng};
use thiserror::Error;

pub mod blocks;
pub mod geometry;
pub mod graph;
pub mod lots;
pub mod major_roads;
pub mod minor_roads;

pub use blocks::Parcel;
pub use graph::RoadGraph;

use geometry::is_counter_clockwise;

/// Invariant violations that abort a generation run. Routine local failures
/// (rejected candidates, abandoned block walks, failed slices) never surface
/// here; they are counted and logged where they happen.
#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("line built from coincident points [{p:?} | {q:?}]")]
    DegenerateLine { p: Vec2, q: Vec2 },
    #[error("line at {base:?} has a zero normal vector")]
    ZeroNormal { base: Vec2 },
    #[error("road node at {position:?} has {degree} edges, expected 1..=4")]
    NodeDegree { position: Vec2, degree: usize },
}

/// All generation inputs. One resource, one seed; two runs with the same
/// config produce identical layouts.
#[derive(Resource, Clone, Debug)]
pub struct CityConfig {
    /// Half-extent of the square map; bounds are +-map_size on both axes.
    pub map_size: i32,
    /// Soft cap on accepted major road segments.
    pub max_major_roads: usize,
    /// Soft cap on accepted minor road segments.
    pub max_minor_roads: usize,
    /// Corridor half-width of arterial roads.
    pub major_thickness: f32,
    /// Corridor half-width of local streets.
    pub minor_thickness: f32,
    /// Curvature bound for major-road leaning, in whole degrees; below 1
    /// the arterials grow straight.
    pub max_lean_degrees: i32,
    /// Chance that an accepted major segment branches perpendicular.
    pub branch_probability: f32,
    /// Chance that an interior minor node is deleted during pruning.
    pub node_deletion_chance: f64,
    /// Inset applied to blocks to model the sidewalk margin.
    pub sidewalk_thickness: f32,
    /// Building height range for lots.
    pub min_building_height: f32,
    pub max_building_height: f32,
    /// Flat height used for blocks and park lots.
    pub block_height: f32,
    /// Seed for the single RNG threaded through every stage.
    pub seed: u64,
}

impl Default for CityConfig {
    fn default() -> Self {
        Self {
            map_size: 200,
            max_major_roads: 1000,
            max_minor_roads: 10000,
            major_thickness: 2.0,
            minor_thickness: 0.5,
            max_lean_degrees: 2,
            branch_probability: 0.1,
            node_deletion_chance: 0.1,
            sidewalk_thickness: 0.3,
            min_building_height: 1.0,
            max_building_height: 10.0,
            block_height: 0.02,
            seed: 7,
        }
    }
}

/// Event to trigger a generation run.
#[derive(Event)]
pub struct GenerateCityEvent;

/// The finished layout: the road graph (for diagnostic overlays), the
/// blocks before and after sidewalk thinning, and the building lots. All
/// output polygons are wound counter-clockwise.
#[derive(Resource, Debug)]
pub struct CityLayout {
    pub graph: RoadGraph,
    pub major_segment_count: usize,
    pub minor_segment_count: usize,
    /// Blocks as extracted, before the sidewalk inset.
    pub raw_blocks: Vec<Parcel>,
    /// Sidewalk-thinned blocks; these are what the divider consumed.
    pub blocks: Vec<Parcel>,
    pub lots: Vec<Parcel>,
}

/// Run the whole pipeline synchronously. Every stage consumes the full
/// output of the previous one, so there is no internal parallelism; callers
/// wanting concurrency run independent seeds side by side.
pub fn generate(config: &CityConfig) -> Result<CityLayout, GenerationError> {
    let mut rng = StdRng::seed_from_u64(config.seed);
    let mut graph = RoadGraph::default();

    let major_segments = major_roads::generate(&mut graph, config, &mut rng);
    let minor_segments = minor_roads::generate(&mut graph, config, &mut rng, &major_segments);

    let extraction = blocks::extract(&mut graph, config)?;
    let mut raw_blocks = extraction.to_parcels();
    let mut thinned = blocks::thin_blocks(&extraction, config);

    let mut lots = lots::divide_parcels(thinned.clone(), config, &mut rng);

    normalize_winding(&mut raw_blocks);
    normalize_winding(&mut thinned);
    normalize_winding(&mut lots);

    Ok(CityLayout {
        graph,
        major_segment_count: major_segments.len(),
        minor_segment_count: minor_segments.len(),
        raw_blocks,
        blocks: thinned,
        lots,
    })
}

/// Fix every output polygon to the one winding convention consumers rely on.
fn normalize_winding(parcels: &mut [Parcel]) {
    for parcel in parcels {
        if !is_counter_clockwise(&parcel.vertices) {
            parcel.vertices.reverse();
        }
    }
}

pub struct CityGenPlugin;

impl Plugin for CityGenPlugin {
    fn build(&self, app: &mut App) {
        app.init_resource::<CityConfig>()
            .add_event::<GenerateCityEvent>()
            .add_systems(Startup, trigger_initial_generation)
            .add_systems(Update, (begin_generation, poll_generation));
    }
}

/// The in-flight background run.
#[derive(Resource)]
struct GenerationTask(Task<Result<CityLayout, GenerationError>>);

fn trigger_initial_generation(mut events: EventWriter<GenerateCityEvent>) {
    events.send(GenerateCityEvent);
}

fn begin_generation(
    mut commands: Commands,
    mut events: EventReader<GenerateCityEvent>,
    config: Res<CityConfig>,
    running: Option<Res<GenerationTask>>,
) {
    for _ in events.read() {
        if running.is_some() {
            warn!("city generation already in progress, ignoring trigger");
            continue;
        }
        info!("starting city generation (seed {})", config.seed);
        let config = config.clone();
        let task = AsyncComputeTaskPool::get().spawn(async move { generate(&config) });
        commands.insert_resource(GenerationTask(task));
    }
}

fn poll_generation(mut commands: Commands, task: Option<ResMut<GenerationTask>>) {
    let Some(mut task) = task else {
        return;
    };
    let Some(result) = block_on(future::poll_once(&mut task.0)) else {
        return;
    };
    commands.remove_resource::<GenerationTask>();

    match result {
        Ok(layout) => {
            info!(
                "city generation complete: {} major / {} minor segments, {} blocks, {} lots",
                layout.major_segment_count,
                layout.minor_segment_count,
                layout.blocks.len(),
                layout.lots.len()
            );
            commands.insert_resource(layout);
        }
        Err(error) => {
            error!("city generation failed: {error}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use super::geometry::segments_cross;

    fn small_config() -> CityConfig {
        CityConfig {
            map_size: 40,
            max_major_roads: 200,
            max_minor_roads: 800,
            seed: 7,
            ..Default::default()
        }
    }

    #[test]
    fn the_pipeline_runs_end_to_end() {
        let layout = generate(&small_config()).unwrap();

        assert!(layout.major_segment_count > 0);
        assert!(!layout.graph.major_nodes.is_empty());

        // Road edges from the surviving graph never properly cross.
        let edges: Vec<(Vec2, Vec2)> = layout
            .graph
            .major_edges
            .iter()
            .chain(&layout.graph.minor_edges)
            .map(|&edge| {
                let (a, b) = layout.graph.endpoints(edge);
                (layout.graph.position(a), layout.graph.position(b))
            })
            .collect();
        for (i, &(a1, a2)) in edges.iter().enumerate() {
            for &(b1, b2) in edges.iter().skip(i + 1) {
                let shared = a1 == b1 || a1 == b2 || a2 == b1 || a2 == b2;
                if !shared {
                    assert!(!segments_cross(a1, a2, b1, b2));
                }
            }
        }

        // Every output ring shares the fixed winding convention.
        for parcel in layout.blocks.iter().chain(&layout.lots) {
            assert!(geometry::polygon_area(&parcel.vertices) >= 0.0);
        }
    }

    #[test]
    fn identical_seeds_produce_identical_layouts() {
        let config = small_config();
        let a = generate(&config).unwrap();
        let b = generate(&config).unwrap();

        assert_eq!(a.major_segment_count, b.major_segment_count);
        assert_eq!(a.minor_segment_count, b.minor_segment_count);
        assert_eq!(a.raw_blocks, b.raw_blocks);
        assert_eq!(a.blocks, b.blocks);
        assert_eq!(a.lots, b.lots);
    }

    #[test]
    fn different_seeds_diverge() {
        let mut other = small_config();
        other.seed = 8;

        let a = generate(&small_config()).unwrap();
        let b = generate(&other).unwrap();
        assert_ne!(a.lots, b.lots, "distinct seeds should diverge");
    }
}
