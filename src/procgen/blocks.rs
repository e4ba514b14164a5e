//! Block extraction: thickening road nodes into block corners, walking the
//! corners into closed block polygons, and insetting sidewalks.
//!
//! Thickening is degree-dependent. Degree 1 and 2 are symmetric offset
//! constructions; degree 3 and 4 produce one corner per edge pair, with a
//! 180-degree bisector correction when the offset lands on the wrong side,
//! and an asymmetric two-thickness construction where a major road meets a
//! minor one. The edge-role assignment at mixed degree-3/4 crossings can
//! produce visibly asymmetric offsets for some configurations; see
//! DESIGN.md before changing it.

use bevy::prelude::*;
use petgraph::stable_graph::{EdgeIndex, NodeIndex};
use smallvec::SmallVec;
use std::f32::consts::{FRAC_PI_2, FRAC_PI_4, PI};

use super::geometry::{angle_of, average_radian, radian_difference, side_of};
use super::graph::RoadGraph;
use super::lots::{min_bounding_rectangle, MIN_LOT_AREA};
use super::{CityConfig, GenerationError};

/// Handle into the corner arena.
pub type CornerId = usize;

/// The block-formation walk gives up after this many steps.
const MAX_WALK_STEPS: u32 = 100;

/// A point derived from a road node by offsetting along the bisector(s) of
/// its incident edges. Tagged with the 1 or 2 edges it separates.
#[derive(Clone, Debug)]
pub struct BlockCorner {
    pub position: Vec2,
    pub edges: SmallVec<[EdgeIndex; 2]>,
    /// Claim token of the formation walk that took this corner. Walk ids are
    /// never reused, so corners grabbed by an abandoned walk stay out of
    /// every later block.
    pub block: Option<usize>,
}

/// An ordered cyclic run of corners describing one closed block polygon.
#[derive(Clone, Debug)]
pub struct Block {
    pub id: usize,
    pub corners: Vec<CornerId>,
    pub height: f32,
    pub park: bool,
}

/// A free-standing closed polygon with its height attribute: a thinned
/// block, or a lot produced by dividing one.
#[derive(Clone, Debug, PartialEq)]
pub struct Parcel {
    pub vertices: Vec<Vec2>,
    pub height: f32,
    pub park: bool,
}

/// Corner arena plus the blocks assembled over it.
#[derive(Clone, Debug, Default)]
pub struct BlockExtraction {
    pub corners: Vec<BlockCorner>,
    pub blocks: Vec<Block>,
}

impl BlockExtraction {
    pub fn ring(&self, block: &Block) -> Vec<Vec2> {
        block
            .corners
            .iter()
            .map(|&id| self.corners[id].position)
            .collect()
    }

    /// The raw (pre-sidewalk) blocks as free-standing polygons.
    pub fn to_parcels(&self) -> Vec<Parcel> {
        self.blocks
            .iter()
            .map(|block| Parcel {
                vertices: self.ring(block),
                height: block.height,
                park: block.park,
            })
            .collect()
    }
}

/// Thicken every road node into corners, then walk the corners into blocks
/// and drop the malformed ones at the map edge.
pub fn extract(graph: &mut RoadGraph, config: &CityConfig) -> Result<BlockExtraction, GenerationError> {
    info!("extracting blocks from the road graph");

    let mut corners: Vec<BlockCorner> = Vec::new();
    thicken_nodes(graph, config, &mut corners)?;

    let mut blocks = form_blocks(graph, &mut corners, config.block_height);
    let formed = blocks.len();
    remove_map_edge_blocks(graph, &corners, &mut blocks);

    info!(
        "block extraction done: {} corners, {} blocks formed, {} kept",
        corners.len(),
        formed,
        blocks.len()
    );

    Ok(BlockExtraction { corners, blocks })
}

fn thicken_nodes(
    graph: &mut RoadGraph,
    config: &CityConfig,
    corners: &mut Vec<BlockCorner>,
) -> Result<(), GenerationError> {
    // Major nodes first at major thickness, then minor nodes.
    let majors = graph.major_nodes.clone();
    for node in majors {
        thicken_node(graph, config, node, config.major_thickness, corners)?;
    }
    let minors = graph.minor_nodes.clone();
    for node in minors {
        thicken_node(graph, config, node, config.minor_thickness, corners)?;
    }
    Ok(())
}

fn thicken_node(
    graph: &mut RoadGraph,
    config: &CityConfig,
    node: NodeIndex,
    thickness: f32,
    corners: &mut Vec<BlockCorner>,
) -> Result<(), GenerationError> {
    match graph.degree(node) {
        1 => thicken_degree_one(graph, node, thickness, corners),
        2 => thicken_degree_two(graph, node, thickness, corners),
        3 => thicken_degree_three(graph, config, node, thickness, corners),
        4 => thicken_degree_four(graph, config, node, thickness, corners),
        // The generators cap degree at 4, and listed nodes always carry at
        // least one edge; hitting this means a constraint check is broken.
        degree => Err(GenerationError::NodeDegree {
            position: graph.position(node),
            degree,
        }),
    }
}

fn add_corner(
    graph: &mut RoadGraph,
    corners: &mut Vec<BlockCorner>,
    node: NodeIndex,
    position: Vec2,
    edges: &[EdgeIndex],
) -> CornerId {
    let id = corners.len();
    corners.push(BlockCorner {
        position,
        edges: SmallVec::from_slice(edges),
        block: None,
    });
    graph.node_mut(node).corners.push(id);
    id
}

/// Dead end: two corners behind the road head, symmetric about the edge.
fn thicken_degree_one(
    graph: &mut RoadGraph,
    node: NodeIndex,
    thickness: f32,
    corners: &mut Vec<BlockCorner>,
) -> Result<(), GenerationError> {
    let edge = graph.node(node).edges[0];
    let dir = graph.dir_from(edge, node);
    let position = graph.position(node);
    let magnitude = thickness / FRAC_PI_4.sin();

    let left = position + Vec2::from_angle(dir + 1.5 * FRAC_PI_2) * magnitude;
    let right = position + Vec2::from_angle(dir - 1.5 * FRAC_PI_2) * magnitude;

    add_corner(graph, corners, node, left, &[edge]);
    add_corner(graph, corners, node, right, &[edge]);
    Ok(())
}

/// Mitered offset along the bisector of the two edges and its opposite.
fn thicken_degree_two(
    graph: &mut RoadGraph,
    node: NodeIndex,
    thickness: f32,
    corners: &mut Vec<BlockCorner>,
) -> Result<(), GenerationError> {
    let e0 = graph.node(node).edges[0];
    let e1 = graph.node(node).edges[1];
    let position = graph.position(node);

    let (first, second) = mitered_offsets(
        graph.dir_from(e0, node),
        graph.dir_from(e1, node),
        thickness,
    );

    add_corner(graph, corners, node, position + first, &[e0, e1]);
    add_corner(graph, corners, node, position + second, &[e0, e1]);
    Ok(())
}

/// The degree-2 construction on raw angles, shared with sidewalk thinning.
fn mitered_offsets(dir1: f32, dir2: f32, thickness: f32) -> (Vec2, Vec2) {
    let average = average_radian(dir1, dir2);
    let diff = radian_difference(dir1, dir2);

    let first = Vec2::from_angle(average) * thickness * (1.0 / (diff / 2.0).sin());
    let second =
        Vec2::from_angle(average + PI) * thickness * (1.0 / ((2.0 * PI - diff) / 2.0).sin());
    (first, second)
}

fn thicken_degree_three(
    graph: &mut RoadGraph,
    config: &CityConfig,
    node: NodeIndex,
    thickness: f32,
    corners: &mut Vec<BlockCorner>,
) -> Result<(), GenerationError> {
    let edges = [
        graph.node(node).edges[0],
        graph.node(node).edges[1],
        graph.node(node).edges[2],
    ];
    let mixed_node = is_mixed_node(graph, &edges);
    let position = graph.position(node);

    // One corner per unordered pair; the third edge decides whether the
    // bisector needs the 180-degree flip.
    for (i, j, excluded) in [(0, 1, 2), (0, 2, 1), (1, 2, 0)] {
        let diff = pair_difference(graph, node, edges[i], edges[j]);
        let mut average = pair_average(graph, node, edges[i], edges[j]);
        if diff > FRAC_PI_2 && !bisector_clears_edge(graph, node, average, edges[excluded]) {
            average += PI;
        }

        let offset = pair_offset(
            graph, config, node, edges[i], edges[j], average, diff, thickness, mixed_node,
        );
        add_corner(graph, corners, node, position + offset, &[edges[i], edges[j]]);
    }
    Ok(())
}

fn thicken_degree_four(
    graph: &mut RoadGraph,
    config: &CityConfig,
    node: NodeIndex,
    thickness: f32,
    corners: &mut Vec<BlockCorner>,
) -> Result<(), GenerationError> {
    let edges = [
        graph.node(node).edges[0],
        graph.node(node).edges[1],
        graph.node(node).edges[2],
        graph.node(node).edges[3],
    ];
    let mixed_node = is_mixed_node(graph, &edges);
    let position = graph.position(node);

    // Angle-sort the edges; the alternating pair become base edges, the
    // others common edges, one corner per (base, common) pair.
    let mut order: Vec<(f32, EdgeIndex)> = edges
        .iter()
        .map(|&edge| (graph.dir_from(edge, node), edge))
        .collect();
    order.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));

    let base1 = order[0].1;
    let common1 = order[1].1;
    let base2 = order[2].1;
    let common2 = order[3].1;

    let pairs = [
        (base1, common1, base2, common2),
        (base1, common2, base2, common1),
        (base2, common1, base1, common2),
        (base2, common2, base1, common1),
    ];

    for (base, common, other_base, other_common) in pairs {
        let diff = pair_difference(graph, node, base, common);
        let mut average = pair_average(graph, node, base, common);
        if !four_edge_average_is_correct(graph, node, average, base, other_base, other_common) {
            average += PI;
        }

        let offset = pair_offset(
            graph, config, node, base, common, average, diff, thickness, mixed_node,
        );
        add_corner(graph, corners, node, position + offset, &[base, common]);
    }
    Ok(())
}

fn is_mixed_node(graph: &RoadGraph, edges: &[EdgeIndex]) -> bool {
    let majors = edges.iter().filter(|&&e| graph.is_major_edge(e)).count();
    majors != 0 && majors != edges.len()
}

fn pair_average(graph: &RoadGraph, node: NodeIndex, e1: EdgeIndex, e2: EdgeIndex) -> f32 {
    average_radian(graph.dir_from(e1, node), graph.dir_from(e2, node))
}

fn pair_difference(graph: &RoadGraph, node: NodeIndex, e1: EdgeIndex, e2: EdgeIndex) -> f32 {
    radian_difference(graph.dir_from(e1, node), graph.dir_from(e2, node))
}

/// Whether the candidate bisector already points away from the unpaired
/// edge; when its opposite sits further out, the caller flips it.
fn bisector_clears_edge(
    graph: &RoadGraph,
    node: NodeIndex,
    average: f32,
    excluded: EdgeIndex,
) -> bool {
    let excluded_dir = graph.dir_from(excluded, node);
    radian_difference(excluded_dir, average) >= radian_difference(excluded_dir, average + PI)
}

/// Degree-4 variant: the bisector of a (base, common) pair must sit
/// angularly closer to its own base edge than to either excluded edge.
fn four_edge_average_is_correct(
    graph: &RoadGraph,
    node: NodeIndex,
    average: f32,
    included: EdgeIndex,
    excluded1: EdgeIndex,
    excluded2: EdgeIndex,
) -> bool {
    let inc = radian_difference(average, graph.dir_from(included, node));
    inc <= radian_difference(average, graph.dir_from(excluded1, node))
        && inc <= radian_difference(average, graph.dir_from(excluded2, node))
}

/// The offset vector for one edge pair. Mixed major/minor pairs offset by
/// the two thicknesses independently and sum; minor-minor pairs at a mixed
/// node use half thickness; everything else is the plain miter.
fn pair_offset(
    graph: &RoadGraph,
    config: &CityConfig,
    node: NodeIndex,
    e1: EdgeIndex,
    e2: EdgeIndex,
    average: f32,
    diff: f32,
    thickness: f32,
    mixed_node: bool,
) -> Vec2 {
    let e1_major = graph.is_major_edge(e1);
    let e2_major = graph.is_major_edge(e2);

    if e1_major != e2_major {
        let d1 = graph.dir_from(e1, node);
        let d2 = graph.dir_from(e2, node);
        let scale = 1.0 / diff.sin();
        // Walking along one road's direction sets the distance from the
        // other road's line, so each direction carries the other thickness.
        return if e2_major {
            Vec2::from_angle(d2) * config.minor_thickness * scale
                + Vec2::from_angle(d1) * config.major_thickness * scale
        } else {
            Vec2::from_angle(d1) * config.minor_thickness * scale
                + Vec2::from_angle(d2) * config.major_thickness * scale
        };
    }

    let scale = if mixed_node && !e1_major && !e2_major {
        thickness / 2.0
    } else {
        thickness
    };
    Vec2::from_angle(average) * scale * (1.0 / (diff / 2.0).sin())
}

/// Walk every unassigned corner into a block. Failed walks keep their
/// claims (ids are never reused) and just drop the nascent block.
fn form_blocks(graph: &RoadGraph, corners: &mut Vec<BlockCorner>, block_height: f32) -> Vec<Block> {
    let mut blocks = Vec::new();
    let mut failed = 0usize;

    for start in 0..corners.len() {
        if corners[start].block.is_some() {
            continue;
        }
        let walk_id = blocks.len() + failed;
        let first_edge = corners[start].edges[0];
        let mut ring = Vec::new();

        if form_block(graph, corners, start, first_edge, walk_id, &mut ring, 1) {
            blocks.push(Block {
                id: walk_id,
                corners: ring,
                height: block_height,
                park: false,
            });
        } else {
            failed += 1;
        }
    }

    debug!("block walks: {} succeeded, {} abandoned", blocks.len(), failed);
    blocks
}

fn form_block(
    graph: &RoadGraph,
    corners: &mut [BlockCorner],
    current: CornerId,
    edge: EdgeIndex,
    walk_id: usize,
    ring: &mut Vec<CornerId>,
    step: u32,
) -> bool {
    if ring.contains(&current) {
        return true; // got all the way around
    }
    if corners[current].block.is_some() {
        return false; // claimed by an earlier walk
    }
    if step > MAX_WALK_STEPS {
        return false;
    }

    ring.push(current);
    corners[current].block = Some(walk_id);

    let (a, b) = graph.endpoints(edge);
    let owner = if graph.node(a).corners.contains(&current) {
        a
    } else {
        b
    };
    let next_node = if owner == a { b } else { a };

    // Dead-end corners chain to their sibling on the same node before the
    // walk crosses the edge.
    if corners[current].edges.len() == 1 {
        let owner_corners = &graph.node(owner).corners;
        let sibling = if owner_corners[0] == current {
            owner_corners[1]
        } else {
            owner_corners[0]
        };
        if !ring.contains(&sibling) {
            return form_block(graph, corners, sibling, edge, walk_id, ring, step + 1);
        }
    }

    // The corner across the edge with the same orientation to it.
    let pa = graph.position(a);
    let pb = graph.position(b);
    let side = side_of(pa, pb, corners[current].position);

    let mut next_corner = None;
    for &candidate in &graph.node(next_node).corners {
        if corners[candidate].edges.contains(&edge)
            && side_of(pa, pb, corners[candidate].position) == side
        {
            next_corner = Some(candidate);
        }
    }
    let Some(next_corner) = next_corner else {
        return false;
    };

    let next_edge = if corners[next_corner].edges.len() == 1 {
        edge
    } else {
        let tagged = &corners[next_corner].edges;
        if tagged[0] == edge {
            tagged[1]
        } else {
            tagged[0]
        }
    };

    form_block(graph, corners, next_corner, next_edge, walk_id, ring, step + 1)
}

/// Drop blocks at the map edge or otherwise malformed: first and last
/// corners sharing no edge, fewer than 3 corners, or a ring whose first and
/// last corners came from the same road node (dead-end sliver).
fn remove_map_edge_blocks(graph: &RoadGraph, corners: &[BlockCorner], blocks: &mut Vec<Block>) {
    blocks.retain(|block| {
        let Some(&first_id) = block.corners.first() else {
            return false;
        };
        let Some(&last_id) = block.corners.last() else {
            return false;
        };
        let first = &corners[first_id];
        let last = &corners[last_id];

        if !first.edges.iter().any(|edge| last.edges.contains(edge)) {
            return false;
        }
        if block.corners.len() <= 2 {
            return false;
        }
        origin_node(graph, first.edges[0], first_id)
            != origin_node(graph, last.edges[0], last_id)
    });
}

/// The road node a corner was derived from.
fn origin_node(graph: &RoadGraph, edge: EdgeIndex, corner: CornerId) -> NodeIndex {
    let (a, b) = graph.endpoints(edge);
    if graph.node(a).corners.contains(&corner) {
        a
    } else {
        b
    }
}

/// Inset every block by the sidewalk margin and keep the inner ring.
/// Slivers whose bounding rectangle falls under the lot-validity area are
/// dropped here rather than handed to the divider.
pub fn thin_blocks(extraction: &BlockExtraction, config: &CityConfig) -> Vec<Parcel> {
    let mut parcels = Vec::new();
    let mut dropped = 0usize;

    for block in &extraction.blocks {
        let ring = extraction.ring(block);
        let inset = inset_ring(&ring, config.sidewalk_thickness);

        match min_bounding_rectangle(&inset) {
            Some(rect) if rect.area() >= MIN_LOT_AREA => parcels.push(Parcel {
                vertices: inset,
                height: block.height,
                park: block.park,
            }),
            _ => dropped += 1,
        }
    }

    info!(
        "sidewalk thinning: {} blocks kept, {} dropped as slivers",
        parcels.len(),
        dropped
    );
    parcels
}

/// Treat each corner as a synthetic degree-2 node over the block's own two
/// adjacent sides, producing two parallel rings; the smaller-bounded ring is
/// the inner one.
fn inset_ring(ring: &[Vec2], thickness: f32) -> Vec<Vec2> {
    let n = ring.len();
    let mut first_ring = Vec::with_capacity(n);
    let mut second_ring = Vec::with_capacity(n);

    for i in 0..n {
        let current = ring[i];
        let next = ring[(i + 1) % n];
        let previous = ring[(i + n - 1) % n];

        let (first, second) = mitered_offsets(
            angle_of(previous - current),
            angle_of(next - current),
            thickness,
        );

        // Keep each ring on its own side of the outgoing block side.
        if side_of(current, next, current + first) > 0 {
            first_ring.push(current + first);
            second_ring.push(current + second);
        } else {
            first_ring.push(current + second);
            second_ring.push(current + first);
        }
    }

    match (
        min_bounding_rectangle(&first_ring),
        min_bounding_rectangle(&second_ring),
    ) {
        (Some(a), Some(b)) => {
            if a.area() > b.area() {
                second_ring
            } else {
                first_ring
            }
        }
        (None, Some(_)) => second_ring,
        _ => first_ring,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::procgen::graph::RoadClass;
    use std::f32::consts::SQRT_2;

    fn test_config() -> CityConfig {
        CityConfig {
            major_thickness: 1.0,
            minor_thickness: 0.5,
            ..Default::default()
        }
    }

    #[test]
    fn degree_one_thickening_is_symmetric() {
        // End-to-end scenario: thickness 1 puts both corners at 1/sin(45).
        let mut graph = RoadGraph::default();
        let a = graph.insert_node(Vec2::new(0.0, 0.0));
        let b = graph.insert_node(Vec2::new(10.0, 0.0));
        graph.claim_major(a);
        graph.claim_major(b);
        graph.connect(a, b, RoadClass::Major);

        let extraction = extract(&mut graph, &test_config()).unwrap();
        let a_corners: Vec<&BlockCorner> = graph
            .node(a)
            .corners
            .iter()
            .map(|&id| &extraction.corners[id])
            .collect();

        assert_eq!(a_corners.len(), 2);
        for corner in &a_corners {
            let distance = corner.position.distance(Vec2::ZERO);
            assert!((distance - SQRT_2).abs() < 1e-4);
        }
        // Symmetric about the edge direction: opposite sides, mirrored y.
        let s0 = side_of(Vec2::ZERO, Vec2::new(10.0, 0.0), a_corners[0].position);
        let s1 = side_of(Vec2::ZERO, Vec2::new(10.0, 0.0), a_corners[1].position);
        assert_eq!(s0, -s1);
        assert!((a_corners[0].position.y + a_corners[1].position.y).abs() < 1e-4);
    }

    #[test]
    fn degree_two_straight_road_offsets_perpendicular() {
        let mut graph = RoadGraph::default();
        let a = graph.insert_node(Vec2::new(-10.0, 0.0));
        let mid = graph.insert_node(Vec2::new(0.0, 0.0));
        let b = graph.insert_node(Vec2::new(10.0, 0.0));
        for node in [a, mid, b] {
            graph.claim_major(node);
        }
        graph.connect(a, mid, RoadClass::Major);
        graph.connect(mid, b, RoadClass::Major);

        let extraction = extract(&mut graph, &test_config()).unwrap();
        let mid_corners: Vec<Vec2> = graph
            .node(mid)
            .corners
            .iter()
            .map(|&id| extraction.corners[id].position)
            .collect();

        assert_eq!(mid_corners.len(), 2);
        // Collinear edges: the miter degenerates to the plain perpendicular
        // offset at exactly the road thickness.
        for corner in &mid_corners {
            assert!(corner.x.abs() < 1e-4);
            assert!((corner.y.abs() - 1.0).abs() < 1e-4);
        }
    }

    #[test]
    fn out_of_range_degree_fails_fast() {
        let mut graph = RoadGraph::default();
        let hub = graph.insert_node(Vec2::ZERO);
        graph.claim_major(hub);
        for i in 0..5 {
            let angle = i as f32 * 0.8;
            let outer = graph.insert_node(Vec2::from_angle(angle) * 10.0);
            graph.claim_major(outer);
            graph.connect(hub, outer, RoadClass::Major);
        }

        let result = extract(&mut graph, &test_config());
        assert!(matches!(
            result,
            Err(GenerationError::NodeDegree { degree: 5, .. })
        ));
    }

    #[test]
    fn degree_zero_fails_fast() {
        let mut graph = RoadGraph::default();
        let lonely = graph.insert_node(Vec2::ZERO);
        graph.claim_major(lonely);

        let result = extract(&mut graph, &test_config());
        assert!(matches!(
            result,
            Err(GenerationError::NodeDegree { degree: 0, .. })
        ));
    }

    fn square_graph() -> RoadGraph {
        let mut graph = RoadGraph::default();
        let positions = [
            Vec2::new(0.0, 0.0),
            Vec2::new(10.0, 0.0),
            Vec2::new(10.0, 10.0),
            Vec2::new(0.0, 10.0),
        ];
        let nodes: Vec<NodeIndex> = positions.iter().map(|&p| graph.insert_node(p)).collect();
        for &node in &nodes {
            graph.claim_major(node);
        }
        for i in 0..4 {
            graph.connect(nodes[i], nodes[(i + 1) % 4], RoadClass::Major);
        }
        graph
    }

    #[test]
    fn a_square_cycle_forms_blocks_with_unique_membership() {
        let mut graph = square_graph();
        let extraction = extract(&mut graph, &test_config()).unwrap();

        assert!(!extraction.blocks.is_empty());
        for block in &extraction.blocks {
            assert!(block.corners.len() >= 3);
        }

        // Every corner is assigned to at most one surviving block.
        let mut seen = vec![false; extraction.corners.len()];
        for block in &extraction.blocks {
            for &corner in &block.corners {
                assert!(!seen[corner], "corner {corner} appears in two blocks");
                seen[corner] = true;
            }
        }
    }

    #[test]
    fn sidewalk_thinning_keeps_the_inner_ring() {
        let ring = vec![
            Vec2::new(0.0, 0.0),
            Vec2::new(10.0, 0.0),
            Vec2::new(10.0, 10.0),
            Vec2::new(0.0, 10.0),
        ];
        let inset = inset_ring(&ring, 1.0);

        assert_eq!(inset.len(), 4);
        for corner in &inset {
            assert!(corner.x > 0.5 && corner.x < 9.5);
            assert!(corner.y > 0.5 && corner.y < 9.5);
        }
        assert!(inset
            .iter()
            .any(|corner| corner.distance(Vec2::new(1.0, 1.0)) < 1e-3));
    }
}
