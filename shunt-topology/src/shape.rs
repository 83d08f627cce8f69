// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! The radix parameters of a fabric and the arithmetic they induce.

use crate::{BucketId, MAX_PHASES, NodeId, Tick};

/// The `(phase, link)` pair a tick activates.
///
/// Every node sends on exactly this pair during the tick; the schedule rotates
/// through links fastest, phases slowest.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Slot {
    pub phase: usize,
    pub link: usize,
}

/// Radix parameters of a fabric: `num_phases` dimensions of
/// `nodes_per_phase`-node complete graphs.
///
/// All coordinate arithmetic is modulo `nodes_per_phase` per phase and the
/// linear encoding is positional: phase `i` contributes
/// `coordinate * nodes_per_phase^i`.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Shape {
    num_phases: usize,
    nodes_per_phase: usize,
}

impl Shape {
    /// Create a shape. Panics if the parameters are degenerate; the radices
    /// are fixed for the lifetime of a run.
    #[must_use]
    pub fn new(num_phases: usize, nodes_per_phase: usize) -> Self {
        assert!(
            (1..=MAX_PHASES).contains(&num_phases),
            "num_phases must be in [1, {MAX_PHASES}]"
        );
        assert!(nodes_per_phase >= 2, "each phase needs at least two nodes");
        Self {
            num_phases,
            nodes_per_phase,
        }
    }

    /// Derive a shape from a total node count: the per-phase radix is the
    /// smallest that covers `num_nodes` with `num_phases` digits.
    #[must_use]
    pub fn for_node_count(num_phases: usize, num_nodes: usize) -> Self {
        let mut radix = (num_nodes as f64).powf(1.0 / num_phases as f64).ceil() as usize;
        // Counter the odd case where floating point rounds the root down.
        while radix.pow(num_phases as u32) < num_nodes {
            radix += 1;
        }
        Self::new(num_phases, radix)
    }

    #[must_use]
    pub fn num_phases(&self) -> usize {
        self.num_phases
    }

    #[must_use]
    pub fn nodes_per_phase(&self) -> usize {
        self.nodes_per_phase
    }

    /// Links a node has within one phase (all other members of the clique).
    #[must_use]
    pub fn links_per_phase(&self) -> usize {
        self.nodes_per_phase - 1
    }

    /// Ticks in one full rotation through every `(phase, link)` pair.
    #[must_use]
    pub fn epoch_length(&self) -> usize {
        self.links_per_phase() * self.num_phases
    }

    /// One past the largest valid node id.
    #[must_use]
    pub fn max_node_id(&self) -> usize {
        self.nodes_per_phase.pow(self.num_phases as u32)
    }

    /// Decode a tick into the `(phase, link)` pair it activates.
    #[must_use]
    pub fn slot(&self, tick: Tick) -> Slot {
        let links = self.links_per_phase() as Tick;
        Slot {
            phase: ((tick / links) % self.num_phases as Tick) as usize,
            link: (tick % links) as usize,
        }
    }

    /// Split an address into its per-phase coordinates.
    #[must_use]
    pub fn decompose(&self, id: NodeId) -> [usize; MAX_PHASES] {
        let mut coords = [0; MAX_PHASES];
        let mut rest = id.index();
        for coord in coords.iter_mut().take(self.num_phases) {
            *coord = rest % self.nodes_per_phase;
            rest /= self.nodes_per_phase;
        }
        coords
    }

    /// Pack per-phase coordinates back into an address.
    #[must_use]
    pub fn compose(&self, coords: &[usize]) -> NodeId {
        let mut id = 0;
        for phase in (0..self.num_phases).rev() {
            id = id * self.nodes_per_phase + coords[phase] % self.nodes_per_phase;
        }
        NodeId::from(id)
    }

    /// The coordinate of `id` on one phase.
    #[must_use]
    pub fn extract_coord(&self, id: NodeId, phase: usize) -> usize {
        debug_assert!(phase < self.num_phases);
        let mut rest = id.index();
        for _ in 0..phase {
            rest /= self.nodes_per_phase;
        }
        rest % self.nodes_per_phase
    }

    /// Shift the coordinate of `id` on one phase, modulo the radix.
    #[must_use]
    pub fn adjust_coord(&self, id: NodeId, phase: usize, offset: i64) -> NodeId {
        let mut coords = self.decompose(id);
        let radix = self.nodes_per_phase as i64;
        coords[phase] = (coords[phase] as i64 + offset).rem_euclid(radix) as usize;
        self.compose(&coords[..self.num_phases])
    }

    /// Overwrite the coordinate of `id` on one phase, modulo the radix.
    #[must_use]
    pub fn set_coord(&self, id: NodeId, phase: usize, value: usize) -> NodeId {
        let mut coords = self.decompose(id);
        coords[phase] = value % self.nodes_per_phase;
        self.compose(&coords[..self.num_phases])
    }

    /// The neighbour a node reaches via `(phase, link)`: link `l` connects to
    /// the clique member `l + 1` coordinate steps away.
    #[must_use]
    pub fn neighbour(&self, id: NodeId, phase: usize, link: usize) -> NodeId {
        self.adjust_coord(id, phase, link as i64 + 1)
    }

    /// The node whose transmission arrives at `id` during `slot` (the
    /// inverse of [`neighbour`](Self::neighbour) over the active pair).
    #[must_use]
    pub fn upstream(&self, id: NodeId, slot: Slot) -> NodeId {
        self.adjust_coord(id, slot.phase, -(slot.link as i64 + 1))
    }

    /// The link index pointing back at whoever is reached via `link`.
    #[must_use]
    pub fn mirror_link(&self, link: usize) -> usize {
        self.links_per_phase() - 1 - link
    }

    /// Flow-control bucket key for a destination with a given remaining spray
    /// budget.
    #[must_use]
    pub fn bucket_of(&self, dest: NodeId, rem_spray_hops: usize) -> BucketId {
        BucketId((dest.index() + rem_spray_hops * self.max_node_id()) as u32)
    }

    /// The reserved bucket for frames whose next hop is their destination.
    #[must_use]
    pub fn direct_bucket(&self) -> BucketId {
        BucketId((self.max_node_id() * self.num_phases + 1) as u32)
    }

    /// Render an address as its coordinate tuple, for log messages.
    #[must_use]
    pub fn coords_string(&self, id: NodeId) -> String {
        let coords = self.decompose(id);
        let mut s = String::from("[");
        for (phase, coord) in coords.iter().enumerate().take(self.num_phases) {
            if phase > 0 {
                s.push(' ');
            }
            s.push_str(&coord.to_string());
        }
        s.push(']');
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compose_inverts_decompose() {
        let shape = Shape::new(3, 4);
        for id in 0..shape.max_node_id() {
            let id = NodeId::from(id);
            let coords = shape.decompose(id);
            assert_eq!(shape.compose(&coords[..3]), id);
        }
    }

    #[test]
    fn extract_matches_decompose() {
        let shape = Shape::new(3, 5);
        for id in 0..shape.max_node_id() {
            let id = NodeId::from(id);
            let coords = shape.decompose(id);
            for phase in 0..3 {
                assert_eq!(shape.extract_coord(id, phase), coords[phase]);
            }
        }
    }

    #[test]
    fn adjust_wraps_in_both_directions() {
        let shape = Shape::new(2, 4);
        let id = shape.compose(&[3, 1]);
        assert_eq!(shape.decompose(shape.adjust_coord(id, 0, 2))[0], 1);
        assert_eq!(shape.decompose(shape.adjust_coord(id, 0, -4)), shape.decompose(id));
        assert_eq!(shape.decompose(shape.adjust_coord(id, 1, -2))[1], 3);
    }

    #[test]
    fn set_coord_overwrites_one_phase() {
        let shape = Shape::new(3, 4);
        let id = shape.compose(&[1, 2, 3]);
        let moved = shape.set_coord(id, 1, 0);
        assert_eq!(shape.decompose(moved)[..3], [1, 0, 3]);
    }

    #[test]
    fn upstream_inverts_neighbour() {
        let shape = Shape::new(2, 4);
        for tick in 0..shape.epoch_length() as Tick {
            let slot = shape.slot(tick);
            for id in 0..shape.max_node_id() {
                let id = NodeId::from(id);
                let downstream = shape.neighbour(id, slot.phase, slot.link);
                assert_eq!(shape.upstream(downstream, slot), id);
            }
        }
    }

    #[test]
    fn slot_schedule_covers_every_pair_once_per_epoch() {
        let shape = Shape::new(3, 4);
        let mut seen = vec![0; shape.epoch_length()];
        for tick in 0..shape.epoch_length() as Tick {
            let slot = shape.slot(tick);
            seen[slot.phase * shape.links_per_phase() + slot.link] += 1;
        }
        assert!(seen.iter().all(|&count| count == 1));
    }

    #[test]
    fn bucket_keys_are_distinct_per_spray_budget() {
        let shape = Shape::new(3, 4);
        let dest = NodeId::from(17usize);
        let mut keys: Vec<_> = (0..3).map(|rem| shape.bucket_of(dest, rem)).collect();
        keys.push(shape.direct_bucket());
        keys.sort();
        keys.dedup();
        assert_eq!(keys.len(), 4);
    }

    #[test]
    fn mirror_link_points_back() {
        let shape = Shape::new(2, 4);
        for link in 0..shape.links_per_phase() {
            let mirrored = shape.mirror_link(link);
            let id = NodeId::from(0usize);
            let there = shape.neighbour(id, 0, link);
            assert_eq!(shape.neighbour(there, 0, mirrored), id);
        }
    }

    #[test]
    fn derived_radix_covers_node_count() {
        let shape = Shape::for_node_count(3, 4096);
        assert_eq!(shape.nodes_per_phase(), 16);
        let shape = Shape::for_node_count(3, 4097);
        assert_eq!(shape.nodes_per_phase(), 17);
    }

    #[test]
    fn coords_render_as_tuple() {
        let shape = Shape::new(3, 4);
        assert_eq!(shape.coords_string(shape.compose(&[1, 0, 2])), "[1 0 2]");
    }
}
