//! Local street growth seeded from the arterial network.
//!
//! Same queue/accept/reject skeleton as the major pass, but candidates must
//! also be angularly free at both endpoints, and every non-terminal segment
//! continues in exactly three directions, so the raw result is a dense
//! lattice. The pruning passes afterwards thin it into a plausible street
//! pattern; their order matters, each step feeds the next.

use bevy::prelude::*;
use petgraph::stable_graph::{EdgeIndex, NodeIndex};
use rand::{rngs::StdRng, Rng};
use std::collections::VecDeque;

use super::geometry::{angle_of, perpendicular, segments_cross};
use super::graph::{RoadClass, RoadGraph};
use super::major_roads::{AcceptedSegment, RoadSegment, SegmentEnd, ROAD_LENGTH};
use super::CityConfig;

/// Minor ends snap a little tighter than major ones.
const SNAP_RADIUS: f32 = ROAD_LENGTH * 0.7;

/// Pruning ignores nodes within this margin of the map border.
const BORDER_MARGIN: f32 = 2.0;

/// Grow the minor network from the accepted major segments, then prune it.
pub fn generate(
    graph: &mut RoadGraph,
    config: &CityConfig,
    rng: &mut StdRng,
    major_segments: &[AcceptedSegment],
) -> Vec<AcceptedSegment> {
    info!("growing minor road network");

    let mut queue = VecDeque::new();
    seed_from_major(graph, major_segments, &mut queue);

    let mut accepted: Vec<AcceptedSegment> = Vec::new();
    let mut rejected = 0usize;

    while let Some(mut candidate) = queue.pop_front() {
        if accepted.len() >= config.max_minor_roads {
            break;
        }
        if !passes_local_constraints(graph, config, major_segments, &accepted, &mut candidate) {
            rejected += 1;
            continue;
        }

        let to = match candidate.to {
            SegmentEnd::Existing(node) => node,
            SegmentEnd::New(position) => graph.insert_node(position),
        };
        graph.claim_minor(candidate.from);
        graph.claim_minor(to);
        graph.connect(candidate.from, to, RoadClass::Minor);
        let segment = AcceptedSegment {
            from: candidate.from,
            to,
            lean_iteration: 0,
            lean: super::major_roads::Lean::Straight,
            end_segment: candidate.end_segment,
        };

        global_goals(graph, &segment, &mut queue);
        accepted.push(segment);
    }

    if accepted.len() == config.max_minor_roads {
        warn!("minor roads reached maximum amount ({})", config.max_minor_roads);
    }
    info!(
        "minor pass done: {} segments accepted, {} rejected",
        accepted.len(),
        rejected
    );

    prune(graph, config, rng);

    accepted
}

/// Branch two perpendicular candidates from the end of every non-terminal
/// major segment, and from the start of the very first one (the seed point
/// grows roads in both directions).
fn seed_from_major(
    graph: &RoadGraph,
    major_segments: &[AcceptedSegment],
    queue: &mut VecDeque<RoadSegment>,
) {
    for (index, segment) in major_segments.iter().enumerate() {
        if segment.end_segment {
            continue;
        }

        let dir = (graph.position(segment.to) - graph.position(segment.from)).normalize();
        queue.push_back(branch(graph, segment.to, perpendicular(dir)));
        queue.push_back(branch(graph, segment.to, -perpendicular(dir)));

        if index == 0 {
            queue.push_back(branch(graph, segment.from, perpendicular(dir)));
            queue.push_back(branch(graph, segment.from, -perpendicular(dir)));
        }
    }
}

fn branch(graph: &RoadGraph, from: NodeIndex, dir: Vec2) -> RoadSegment {
    RoadSegment::new(from, graph.position(from) + dir.normalize() * ROAD_LENGTH)
}

fn passes_local_constraints(
    graph: &RoadGraph,
    config: &CityConfig,
    major_segments: &[AcceptedSegment],
    accepted: &[AcceptedSegment],
    candidate: &mut RoadSegment,
) -> bool {
    // Snap against major ends first, then minor ends.
    if let SegmentEnd::New(position) = candidate.to {
        'snap: for pool in [major_segments, accepted] {
            for segment in pool {
                if graph.position(segment.to).distance_squared(position)
                    < SNAP_RADIUS * SNAP_RADIUS
                {
                    candidate.to = SegmentEnd::Existing(segment.to);
                    candidate.end_segment = true;
                    break 'snap;
                }
            }
        }
    }

    let from_pos = graph.position(candidate.from);
    let to_pos = candidate.end_position(graph);

    for pool in [major_segments, accepted] {
        for segment in pool {
            if candidate_shares_endpoint(candidate, segment) {
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
    }

    // Minimum angular separation at both endpoints; this is what keeps
    // intersections at degree <= 4 and well spread out.
    if !graph.is_free(candidate.from, angle_of(to_pos - from_pos)) {
        return false;
    }
    if let SegmentEnd::Existing(node) = candidate.to {
        if !graph.is_free(node, angle_of(from_pos - to_pos)) {
            return false;
        }
    }

    true
}

fn candidate_shares_endpoint(candidate: &RoadSegment, accepted: &AcceptedSegment) -> bool {
    if candidate.from == accepted.from || candidate.from == accepted.to {
        return true;
    }
    match candidate.to {
        SegmentEnd::Existing(node) => node == accepted.from || node == accepted.to,
        SegmentEnd::New(_) => false,
    }
}

/// Minor roads form a grid: straight plus both perpendiculars, always.
fn global_goals(graph: &RoadGraph, segment: &AcceptedSegment, queue: &mut VecDeque<RoadSegment>) {
    if segment.end_segment {
        return;
    }

    let dir = (graph.position(segment.to) - graph.position(segment.from)).normalize();
    queue.push_back(branch(graph, segment.to, dir));
    queue.push_back(branch(graph, segment.to, perpendicular(dir)));
    queue.push_back(branch(graph, segment.to, -perpendicular(dir)));
}

/// The four pruning passes, in an order where each step's deletions create
/// the candidates for the next.
fn prune(graph: &mut RoadGraph, config: &CityConfig, rng: &mut StdRng) {
    let before_nodes = graph.minor_nodes.len();
    let before_edges = graph.minor_edges.len();

    delete_random_interior_nodes(graph, config, rng);
    delete_interior_leaves(graph, config);
    delete_isolated_edges(graph);
    delete_isolated_nodes(graph);

    info!(
        "minor pruning: {} -> {} nodes, {} -> {} edges",
        before_nodes,
        graph.minor_nodes.len(),
        before_edges,
        graph.minor_edges.len()
    );
}

fn is_interior(position: Vec2, border: f32) -> bool {
    position.x < border - BORDER_MARGIN
        && position.x > -border + BORDER_MARGIN
        && position.y < border - BORDER_MARGIN
        && position.y > -border + BORDER_MARGIN
}

/// Randomly delete a fraction of interior minor nodes with their edges.
fn delete_random_interior_nodes(graph: &mut RoadGraph, config: &CityConfig, rng: &mut StdRng) {
    let border = config.map_size as f32;
    let mut removable: Vec<NodeIndex> = Vec::new();

    for &node in &graph.minor_nodes {
        if !is_interior(graph.position(node), border) {
            continue;
        }
        if rng.gen_bool(config.node_deletion_chance) {
            removable.push(node);
        }
    }

    for node in removable {
        graph.remove_node(node);
    }
}

/// Delete interior dead ends: minor nodes of degree 1 and their stub edges.
fn delete_interior_leaves(graph: &mut RoadGraph, config: &CityConfig) {
    let border = config.map_size as f32;
    let mut removable: Vec<NodeIndex> = Vec::new();

    for &node in &graph.minor_nodes {
        if graph.degree(node) == 1 && is_interior(graph.position(node), border) {
            removable.push(node);
        }
    }

    for node in removable {
        graph.remove_node(node);
    }
}

/// Delete isolated segments: minor edges whose endpoints both dropped to
/// degree 1. The leftover nodes fall to the next pass.
fn delete_isolated_edges(graph: &mut RoadGraph) {
    let mut removable: Vec<EdgeIndex> = Vec::new();

    for &edge in &graph.minor_edges {
        let (a, b) = graph.endpoints(edge);
        if graph.degree(a) == 1 && graph.degree(b) == 1 {
            removable.push(edge);
        }
    }

    for edge in removable {
        graph.remove_edge(edge);
    }
}

fn delete_isolated_nodes(graph: &mut RoadGraph) {
    let removable: Vec<NodeIndex> = graph
        .minor_nodes
        .iter()
        .copied()
        .filter(|&node| graph.degree(node) == 0)
        .collect();

    for node in removable {
        graph.remove_node(node);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::procgen::major_roads::Lean;
    use rand::SeedableRng;

    fn terminal_major_graph() -> (RoadGraph, Vec<AcceptedSegment>) {
        let mut graph = RoadGraph::default();
        let a = graph.insert_node(Vec2::new(0.0, 0.0));
        let b = graph.insert_node(Vec2::new(ROAD_LENGTH, 0.0));
        graph.claim_major(a);
        graph.claim_major(b);
        graph.connect(a, b, RoadClass::Major);
        let segments = vec![AcceptedSegment {
            from: a,
            to: b,
            lean_iteration: 0,
            lean: Lean::Straight,
            end_segment: true,
        }];
        (graph, segments)
    }

    #[test]
    fn terminal_majors_seed_no_minor_roads() {
        // End-to-end scenario: no non-terminal major segments at all.
        let (mut graph, majors) = terminal_major_graph();
        let config = CityConfig {
            map_size: 50,
            ..Default::default()
        };
        let mut rng = StdRng::seed_from_u64(1);

        let accepted = generate(&mut graph, &config, &mut rng, &majors);
        assert!(accepted.is_empty());
        assert!(graph.minor_nodes.is_empty());
        assert!(graph.minor_edges.is_empty());
    }

    #[test]
    fn minor_growth_respects_degree_and_crossing_invariants() {
        let config = CityConfig {
            map_size: 30,
            seed: 7,
            node_deletion_chance: 0.0,
            ..Default::default()
        };
        let mut graph = RoadGraph::default();
        let mut rng = StdRng::seed_from_u64(config.seed);
        let majors = crate::procgen::major_roads::generate(&mut graph, &config, &mut rng);
        let minors = generate(&mut graph, &config, &mut rng, &majors);
        assert!(!minors.is_empty());

        for &node in graph.major_nodes.iter().chain(&graph.minor_nodes) {
            assert!((1..=4).contains(&graph.degree(node)));
        }

        // Pruning may have dropped accepted segments, so check the edges
        // that actually survived in the graph.
        let edges: Vec<(NodeIndex, NodeIndex)> = graph
            .major_edges
            .iter()
            .chain(&graph.minor_edges)
            .map(|&edge| graph.endpoints(edge))
            .collect();
        for (i, &(a1, a2)) in edges.iter().enumerate() {
            for &(b1, b2) in edges.iter().skip(i + 1) {
                let shared = a1 == b1 || a1 == b2 || a2 == b1 || a2 == b2;
                if shared {
                    continue;
                }
                assert!(!segments_cross(
                    graph.position(a1),
                    graph.position(a2),
                    graph.position(b1),
                    graph.position(b2),
                ));
            }
        }
    }

    #[test]
    fn pruning_removes_stubs_in_order() {
        let mut graph = RoadGraph::default();
        let config = CityConfig {
            map_size: 100,
            node_deletion_chance: 0.0,
            ..Default::default()
        };

        // A dangling segment at the border: too close to the edge for the
        // leaf pass, so it falls to the isolated-edge pass instead.
        let a = graph.insert_node(Vec2::new(99.0, 0.0));
        let b = graph.insert_node(Vec2::new(99.0, 5.0));
        graph.claim_minor(a);
        graph.claim_minor(b);
        graph.connect(a, b, RoadClass::Minor);

        // An interior chain; the leaf pass removes both degree-1 ends and
        // the stranded middle node falls to the isolated-node pass.
        let hub = graph.insert_node(Vec2::new(40.0, 40.0));
        let mid = graph.insert_node(Vec2::new(45.0, 40.0));
        let leaf = graph.insert_node(Vec2::new(50.0, 40.0));
        for node in [hub, mid, leaf] {
            graph.claim_minor(node);
        }
        graph.connect(hub, mid, RoadClass::Minor);
        graph.connect(mid, leaf, RoadClass::Minor);

        let mut rng = StdRng::seed_from_u64(5);
        prune(&mut graph, &config, &mut rng);

        assert!(graph.minor_edges.is_empty());
        assert!(graph.minor_nodes.is_empty());
    }
}
