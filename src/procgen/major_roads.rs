//! Arterial road growth: an extended L-system over a FIFO candidate queue.
//!
//! Every dequeued candidate runs the local constraint checks (snap, crossing,
//! bounds, degeneracy, degree, parallel edges); accepted segments then emit
//! global goals: optional perpendicular branches plus one continuation whose
//! direction leans left or right for short runs to approximate organic
//! curvature.

use bevy::prelude::*;
use petgraph::stable_graph::NodeIndex;
use rand::{rngs::StdRng, Rng};
use std::collections::VecDeque;

use super::geometry::{perpendicular, random_angle_radians, rotate, segments_cross};
use super::graph::{RoadClass, RoadGraph};
use super::CityConfig;

/// Length of one grown road segment, in map units.
pub const ROAD_LENGTH: f32 = 10.0;

/// Segments whose end snapped onto an existing node within this radius are
/// terminal: growth must not continue past them.
const SNAP_RADIUS: f32 = ROAD_LENGTH * 0.8;

/// How many segments a lean persists before a new one is rolled.
const LEAN_RUN: u32 = 3;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Lean {
    Straight,
    Left,
    Right,
}

/// Where a candidate segment ends: at a fresh position, or snapped onto a
/// node that already exists in the graph.
#[derive(Clone, Copy, Debug)]
pub enum SegmentEnd {
    New(Vec2),
    Existing(NodeIndex),
}

/// A candidate road produced by the global goals, not yet part of the graph.
#[derive(Clone, Copy, Debug)]
pub struct RoadSegment {
    pub from: NodeIndex,
    pub to: SegmentEnd,
    pub lean_iteration: u32,
    pub lean: Lean,
    pub end_segment: bool,
}

impl RoadSegment {
    pub fn new(from: NodeIndex, to: Vec2) -> Self {
        Self {
            from,
            to: SegmentEnd::New(to),
            lean_iteration: 0,
            lean: Lean::Straight,
            end_segment: false,
        }
    }

    pub fn end_position(&self, graph: &RoadGraph) -> Vec2 {
        match self.to {
            SegmentEnd::New(position) => position,
            SegmentEnd::Existing(node) => graph.position(node),
        }
    }

    fn shares_endpoint(&self, accepted: &AcceptedSegment) -> bool {
        if self.from == accepted.from || self.from == accepted.to {
            return true;
        }
        match self.to {
            SegmentEnd::Existing(node) => node == accepted.from || node == accepted.to,
            SegmentEnd::New(_) => false,
        }
    }
}

/// A segment that passed the local constraints and became a graph edge.
#[derive(Clone, Copy, Debug)]
pub struct AcceptedSegment {
    pub from: NodeIndex,
    pub to: NodeIndex,
    pub lean_iteration: u32,
    pub lean: Lean,
    pub end_segment: bool,
}

/// Grow the arterial network. Returns the accepted segments in acceptance
/// order; the minor pass seeds from them.
pub fn generate(graph: &mut RoadGraph, config: &CityConfig, rng: &mut StdRng) -> Vec<AcceptedSegment> {
    info!("growing major road network");

    let mut queue = VecDeque::new();
    seed_start_segments(graph, config, rng, &mut queue);

    let mut accepted: Vec<AcceptedSegment> = Vec::new();
    let mut rejected = 0usize;

    while let Some(mut candidate) = queue.pop_front() {
        if accepted.len() >= config.max_major_roads {
            break;
        }
        if !passes_local_constraints(graph, config, &accepted, &mut candidate) {
            rejected += 1;
            continue;
        }

        let segment = materialize(graph, candidate);
        global_goals(graph, config, rng, &segment, &mut queue);
        accepted.push(segment);
    }

    if accepted.len() == config.max_major_roads {
        warn!("major roads reached maximum amount ({})", config.max_major_roads);
    }
    info!(
        "major pass done: {} segments accepted, {} rejected",
        accepted.len(),
        rejected
    );

    accepted
}

/// One random point in the central third of the map, one random direction,
/// two opposite starter segments.
fn seed_start_segments(
    graph: &mut RoadGraph,
    config: &CityConfig,
    rng: &mut StdRng,
    queue: &mut VecDeque<RoadSegment>,
) {
    let third = config.map_size as f32 / 3.0;
    let start = Vec2::new(rng.gen_range(-third..third), rng.gen_range(-third..third));

    let raw = Vec2::new(rng.gen_range(-1.0..1.0f32), rng.gen_range(-1.0..1.0f32));
    let dir = if raw.length_squared() < 1e-6 {
        Vec2::X
    } else {
        raw.normalize()
    };

    let start_node = graph.insert_node(start);
    queue.push_back(RoadSegment::new(start_node, start + dir * ROAD_LENGTH));
    queue.push_back(RoadSegment::new(start_node, start - dir * ROAD_LENGTH));
}

/// The local constraint battery from the L-system: snap first, then reject
/// crossings, out-of-bounds starts, degenerate segments, over-degree
/// endpoints, and parallel edges.
fn passes_local_constraints(
    graph: &RoadGraph,
    config: &CityConfig,
    accepted: &[AcceptedSegment],
    candidate: &mut RoadSegment,
) -> bool {
    if let SegmentEnd::New(position) = candidate.to {
        for segment in accepted {
            if graph.position(segment.to).distance_squared(position) < SNAP_RADIUS * SNAP_RADIUS {
                candidate.to = SegmentEnd::Existing(segment.to);
                candidate.end_segment = true;
                break;
            }
        }
    }

    let from_pos = graph.position(candidate.from);
    let to_pos = candidate.end_position(graph);

    for segment in accepted {
        if candidate.shares_endpoint(segment) {
            continue;
        }
        if segments_cross(
            from_pos,
            to_pos,
            graph.position(segment.from),
            graph.position(segment.to),
        ) {
            return false;
        }
    }

    let border = config.map_size as f32;
    if from_pos.x > border || from_pos.x < -border || from_pos.y > border || from_pos.y < -border {
        return false;
    }

    if from_pos == to_pos {
        return false;
    }

    if graph.degree(candidate.from) >= 4 {
        return false;
    }
    if let SegmentEnd::Existing(node) = candidate.to {
        if graph.degree(node) >= 4 {
            return false;
        }
        // No parallel edges: the end node must not already touch the start.
        for &edge in &graph.node(node).edges {
            let (a, b) = graph.endpoints(edge);
            if a == candidate.from || b == candidate.from {
                return false;
            }
        }
    }

    true
}

fn materialize(graph: &mut RoadGraph, candidate: RoadSegment) -> AcceptedSegment {
    let to = match candidate.to {
        SegmentEnd::Existing(node) => node,
        SegmentEnd::New(position) => graph.insert_node(position),
    };
    graph.claim_major(candidate.from);
    graph.claim_major(to);
    graph.connect(candidate.from, to, RoadClass::Major);
    AcceptedSegment {
        from: candidate.from,
        to,
        lean_iteration: candidate.lean_iteration,
        lean: candidate.lean,
        end_segment: candidate.end_segment,
    }
}

/// Emit 0-2 perpendicular branches and one (possibly leaning) continuation.
fn global_goals(
    graph: &RoadGraph,
    config: &CityConfig,
    rng: &mut StdRng,
    segment: &AcceptedSegment,
    queue: &mut VecDeque<RoadSegment>,
) {
    if segment.end_segment {
        return;
    }

    let from = graph.position(segment.from);
    let to = graph.position(segment.to);
    let dir = (to - from).normalize();

    // The branch draw: one value in [0, max_int) where 1 = right, 2 = left,
    // 3 = both, so the effective probability stays within [0.03, 0.3].
    let p = config.branch_probability;
    let max_int: u32 = if p > 0.3 {
        6
    } else if p < 0.03 {
        100
    } else {
        (3.0 / p).round() as u32
    };
    match rng.gen_range(0..max_int) {
        1 => queue.push_back(grow(graph, segment.to, perpendicular(dir), 0)),
        2 => queue.push_back(grow(graph, segment.to, -perpendicular(dir), 0)),
        3 => {
            queue.push_back(grow(graph, segment.to, perpendicular(dir), 0));
            queue.push_back(grow(graph, segment.to, -perpendicular(dir), 0));
        }
        _ => {}
    }

    queue.push_back(continuation(graph, config, rng, segment, dir));
}

/// The continuation candidate: straight when leaning is disabled, otherwise
/// either following the current lean or, every `LEAN_RUN` + 1 segments,
/// rolling a fresh lean direction with a doubled initial angle.
fn continuation(
    graph: &RoadGraph,
    config: &CityConfig,
    rng: &mut StdRng,
    segment: &AcceptedSegment,
    dir: Vec2,
) -> RoadSegment {
    let max_lean = config.max_lean_degrees;
    if max_lean < 1 {
        return grow(graph, segment.to, dir, 0);
    }

    if segment.lean_iteration == LEAN_RUN {
        match rng.gen_range(0..3) {
            1 => {
                let turned = rotate(dir, random_angle_radians(rng, 2, max_lean * 2));
                let mut next = grow(graph, segment.to, turned, 0);
                next.lean = Lean::Left;
                next
            }
            2 => {
                let turned = rotate(dir, random_angle_radians(rng, -2, -max_lean * 2));
                let mut next = grow(graph, segment.to, turned, 0);
                next.lean = Lean::Right;
                next
            }
            _ => grow(graph, segment.to, dir, 0),
        }
    } else {
        match segment.lean {
            Lean::Left => {
                let turned = rotate(dir, random_angle_radians(rng, 2, max_lean));
                let mut next = grow(graph, segment.to, turned, segment.lean_iteration + 1);
                next.lean = Lean::Left;
                next
            }
            Lean::Right => {
                let turned = rotate(dir, random_angle_radians(rng, -2, -max_lean));
                let mut next = grow(graph, segment.to, turned, segment.lean_iteration + 1);
                next.lean = Lean::Right;
                next
            }
            Lean::Straight => grow(graph, segment.to, dir, segment.lean_iteration + 1),
        }
    }
}

fn grow(graph: &RoadGraph, from: NodeIndex, dir: Vec2, lean_iteration: u32) -> RoadSegment {
    let target = graph.position(from) + dir.normalize() * ROAD_LENGTH;
    let mut segment = RoadSegment::new(from, target);
    segment.lean_iteration = lean_iteration;
    segment
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn accepted_positions(graph: &RoadGraph, segments: &[AcceptedSegment]) -> Vec<(Vec2, Vec2)> {
        segments
            .iter()
            .map(|s| (graph.position(s.from), graph.position(s.to)))
            .collect()
    }

    #[test]
    fn growth_terminates_and_produces_a_crossing_free_graph() {
        // End-to-end scenario: seed 7, half-extent 20.
        let config = CityConfig {
            map_size: 20,
            seed: 7,
            ..Default::default()
        };
        let mut graph = RoadGraph::default();
        let mut rng = StdRng::seed_from_u64(config.seed);
        let segments = generate(&mut graph, &config, &mut rng);

        assert!(!segments.is_empty());
        assert!(!graph.major_nodes.is_empty());

        for (i, a) in segments.iter().enumerate() {
            for b in segments.iter().skip(i + 1) {
                let shared = a.from == b.from || a.from == b.to || a.to == b.from || a.to == b.to;
                if shared {
                    continue;
                }
                assert!(
                    !segments_cross(
                        graph.position(a.from),
                        graph.position(a.to),
                        graph.position(b.from),
                        graph.position(b.to),
                    ),
                    "accepted segments must never properly cross"
                );
            }
        }
    }

    #[test]
    fn node_degrees_stay_within_bounds() {
        let config = CityConfig {
            map_size: 40,
            seed: 13,
            ..Default::default()
        };
        let mut graph = RoadGraph::default();
        let mut rng = StdRng::seed_from_u64(config.seed);
        generate(&mut graph, &config, &mut rng);

        for &node in &graph.major_nodes {
            let degree = graph.degree(node);
            assert!((1..=4).contains(&degree), "degree {degree} out of range");
        }
    }

    #[test]
    fn the_road_cap_is_a_soft_limit() {
        let config = CityConfig {
            map_size: 100,
            max_major_roads: 5,
            seed: 3,
            ..Default::default()
        };
        let mut graph = RoadGraph::default();
        let mut rng = StdRng::seed_from_u64(config.seed);
        let segments = generate(&mut graph, &config, &mut rng);
        assert!(segments.len() <= 5);
        assert!(!segments.is_empty());
    }

    #[test]
    fn identical_seeds_grow_identical_networks() {
        let config = CityConfig {
            map_size: 30,
            seed: 99,
            ..Default::default()
        };

        let mut graph_a = RoadGraph::default();
        let mut rng_a = StdRng::seed_from_u64(config.seed);
        let a = generate(&mut graph_a, &config, &mut rng_a);

        let mut graph_b = RoadGraph::default();
        let mut rng_b = StdRng::seed_from_u64(config.seed);
        let b = generate(&mut graph_b, &config, &mut rng_b);

        assert_eq!(
            accepted_positions(&graph_a, &a),
            accepted_positions(&graph_b, &b)
        );
    }
}
