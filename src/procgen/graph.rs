//! Road graph model shared by the major and minor generation passes.
//!
//! Nodes and edges live in a petgraph stable arena so handles survive the
//! minor-network pruning. The major and minor subgraphs are membership
//! lists over the shared arena, not a tag on the types: a node created by
//! the major pass stays major even when minor roads later attach to it.

use bevy::prelude::*;
use petgraph::stable_graph::{EdgeIndex, NodeIndex, StableUnGraph};
use smallvec::SmallVec;
use std::f32::consts::PI;

use super::blocks::CornerId;

/// A road intersection or endpoint. The position never changes after
/// creation; only the incident-edge and corner lists grow.
#[derive(Clone, Debug, Default)]
pub struct RoadNode {
    pub position: Vec2,
    /// Incident edges in discovery order. The generators cap this at 4.
    pub edges: SmallVec<[EdgeIndex; 4]>,
    /// Block corners derived from this node by the thickener.
    pub corners: SmallVec<[CornerId; 4]>,
}

/// An undirected road segment. The outgoing direction angle as seen from
/// each endpoint is cached at construction and never changes.
#[derive(Clone, Copy, Debug)]
pub struct RoadEdge {
    pub dir_from_a: f32,
    pub dir_from_b: f32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RoadClass {
    Major,
    Minor,
}

/// The road network: a stable node/edge arena plus the major and minor
/// membership lists in insertion order.
#[derive(Clone, Debug, Default)]
pub struct RoadGraph {
    graph: StableUnGraph<RoadNode, RoadEdge>,
    pub major_nodes: Vec<NodeIndex>,
    pub minor_nodes: Vec<NodeIndex>,
    pub major_edges: Vec<EdgeIndex>,
    pub minor_edges: Vec<EdgeIndex>,
}

impl RoadGraph {
    /// Add a node to the arena without claiming it for either subgraph.
    /// Candidate segments reference arena nodes before acceptance.
    pub fn insert_node(&mut self, position: Vec2) -> NodeIndex {
        self.graph.add_node(RoadNode {
            position,
            edges: SmallVec::new(),
            corners: SmallVec::new(),
        })
    }

    /// Record a node as part of the major subgraph (idempotent).
    pub fn claim_major(&mut self, node: NodeIndex) {
        if !self.major_nodes.contains(&node) {
            self.major_nodes.push(node);
        }
    }

    /// Record a node as part of the minor subgraph, unless the major pass
    /// already owns it.
    pub fn claim_minor(&mut self, node: NodeIndex) {
        if !self.major_nodes.contains(&node) && !self.minor_nodes.contains(&node) {
            self.minor_nodes.push(node);
        }
    }

    /// Connect two nodes, caching the direction angles seen from each end.
    pub fn connect(&mut self, a: NodeIndex, b: NodeIndex, class: RoadClass) -> EdgeIndex {
        let pa = self.graph[a].position;
        let pb = self.graph[b].position;
        let edge = self.graph.add_edge(
            a,
            b,
            RoadEdge {
                dir_from_a: (pb.y - pa.y).atan2(pb.x - pa.x),
                dir_from_b: (pa.y - pb.y).atan2(pa.x - pb.x),
            },
        );
        self.graph[a].edges.push(edge);
        self.graph[b].edges.push(edge);
        match class {
            RoadClass::Major => self.major_edges.push(edge),
            RoadClass::Minor => self.minor_edges.push(edge),
        }
        edge
    }

    pub fn node(&self, node: NodeIndex) -> &RoadNode {
        &self.graph[node]
    }

    pub fn node_mut(&mut self, node: NodeIndex) -> &mut RoadNode {
        &mut self.graph[node]
    }

    pub fn position(&self, node: NodeIndex) -> Vec2 {
        self.graph[node].position
    }

    pub fn degree(&self, node: NodeIndex) -> usize {
        self.graph[node].edges.len()
    }

    pub fn endpoints(&self, edge: EdgeIndex) -> (NodeIndex, NodeIndex) {
        self.graph
            .edge_endpoints(edge)
            .unwrap_or((NodeIndex::end(), NodeIndex::end()))
    }

    /// The cached direction angle of `edge` as seen from `node`.
    pub fn dir_from(&self, edge: EdgeIndex, node: NodeIndex) -> f32 {
        let (a, _) = self.endpoints(edge);
        let weight = &self.graph[edge];
        if a == node {
            weight.dir_from_a
        } else {
            weight.dir_from_b
        }
    }

    pub fn is_major_edge(&self, edge: EdgeIndex) -> bool {
        self.major_edges.contains(&edge)
    }

    /// Whether a new road may leave `node` in direction `dir_rad`: every
    /// incident edge must sit at least 60 degrees away, including the pair
    /// of directions that straddle the +-PI wrap.
    pub fn is_free(&self, node: NodeIndex, dir_rad: f32) -> bool {
        let limit = PI / 3.0;
        let wrap = 2.5 * PI / 3.0;
        for &edge in &self.graph[node].edges {
            let existing = self.dir_from(edge, node);
            if (existing - dir_rad).abs() < limit {
                return false;
            }
            if (dir_rad > wrap && existing < -wrap) || (dir_rad < -wrap && existing > wrap) {
                return false;
            }
        }
        true
    }

    /// Remove an edge, keeping incident lists and memberships consistent.
    pub fn remove_edge(&mut self, edge: EdgeIndex) {
        if let Some((a, b)) = self.graph.edge_endpoints(edge) {
            self.graph[a].edges.retain(|e| *e != edge);
            self.graph[b].edges.retain(|e| *e != edge);
        }
        self.graph.remove_edge(edge);
        self.major_edges.retain(|&e| e != edge);
        self.minor_edges.retain(|&e| e != edge);
    }

    /// Remove a node and its incident edges.
    pub fn remove_node(&mut self, node: NodeIndex) {
        let edges: Vec<EdgeIndex> = self.graph[node].edges.iter().copied().collect();
        for edge in edges {
            self.remove_edge(edge);
        }
        self.graph.remove_node(node);
        self.major_nodes.retain(|&n| n != node);
        self.minor_nodes.retain(|&n| n != node);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn edges_cache_direction_angles_from_both_ends() {
        let mut graph = RoadGraph::default();
        let a = graph.insert_node(Vec2::new(0.0, 0.0));
        let b = graph.insert_node(Vec2::new(10.0, 10.0));
        let edge = graph.connect(a, b, RoadClass::Major);

        let quarter = PI / 4.0;
        assert!((graph.dir_from(edge, a) - quarter).abs() < 1e-6);
        assert!((graph.dir_from(edge, b) - (quarter - PI)).abs() < 1e-6);
        assert_eq!(graph.node(a).edges.len(), 1);
        assert_eq!(graph.node(b).edges.len(), 1);
        assert!(graph.is_major_edge(edge));
    }

    #[test]
    fn is_free_enforces_angular_separation() {
        let mut graph = RoadGraph::default();
        let a = graph.insert_node(Vec2::new(0.0, 0.0));
        let b = graph.insert_node(Vec2::new(10.0, 0.0));
        graph.connect(a, b, RoadClass::Minor);

        // Directly along the existing edge and anywhere inside 60 degrees.
        assert!(!graph.is_free(a, 0.0));
        assert!(!graph.is_free(a, 0.9));
        // Perpendicular is fine.
        assert!(graph.is_free(a, PI / 2.0));
    }

    #[test]
    fn is_free_handles_the_pi_wrap() {
        let mut graph = RoadGraph::default();
        let a = graph.insert_node(Vec2::new(0.0, 0.0));
        let b = graph.insert_node(Vec2::new(-10.0, 0.4));
        graph.connect(a, b, RoadClass::Minor);

        // The edge points at almost +PI; a candidate at almost -PI is the
        // same physical direction and must be rejected.
        assert!(!graph.is_free(a, -PI + 0.05));
    }

    #[test]
    fn removal_keeps_lists_consistent() {
        let mut graph = RoadGraph::default();
        let a = graph.insert_node(Vec2::new(0.0, 0.0));
        let b = graph.insert_node(Vec2::new(10.0, 0.0));
        let c = graph.insert_node(Vec2::new(20.0, 0.0));
        graph.claim_minor(a);
        graph.claim_minor(b);
        graph.claim_minor(c);
        let ab = graph.connect(a, b, RoadClass::Minor);
        graph.connect(b, c, RoadClass::Minor);

        graph.remove_edge(ab);
        assert_eq!(graph.degree(a), 0);
        assert_eq!(graph.degree(b), 1);
        assert_eq!(graph.minor_edges.len(), 1);

        graph.remove_node(b);
        assert_eq!(graph.degree(c), 0);
        assert!(graph.minor_edges.is_empty());
        assert_eq!(graph.minor_nodes, vec![a, c]);
    }

    #[test]
    fn minor_claim_defers_to_major_membership() {
        let mut graph = RoadGraph::default();
        let a = graph.insert_node(Vec2::ZERO);
        graph.claim_major(a);
        graph.claim_minor(a);
        assert!(graph.minor_nodes.is_empty());
        assert_eq!(graph.major_nodes, vec![a]);
    }
}
