// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! Even-spread failure placement.
//!
//! Nodes are failed in rings of constant coordinate digit sum, alternating
//! outward from the balanced sum, so failures land spread across every
//! phase rather than clustered in one corner of the coordinate space. When
//! a ring holds more candidates than still needed, a seeded shuffle picks
//! the remainder.

use rand::SeedableRng;
use rand::rngs::SmallRng;
use rand::seq::SliceRandom;
use shunt_topology::{NodeId, Shape};

/// Select `count` node ids to fail, spread evenly across the topology.
/// Deterministic for a given shape and count.
#[must_use]
pub fn evenly_spread(shape: Shape, count: usize) -> Vec<NodeId> {
    assert!(
        count <= shape.max_node_id(),
        "cannot fail more nodes than exist"
    );

    let base_sum = (shape.links_per_phase() * shape.num_phases() / 2) as i64;
    let max_sum = (shape.links_per_phase() * shape.num_phases()) as i64;
    let mut rng = SmallRng::seed_from_u64(1);
    let mut selected = Vec::with_capacity(count);
    let mut iterations: i64 = 0;

    while selected.len() < count {
        let sum = if iterations % 2 == 1 {
            base_sum + (iterations + 1) / 2
        } else {
            base_sum - iterations / 2
        };
        iterations += 1;
        if !(0..=max_sum).contains(&sum) {
            continue;
        }

        let mut ring: Vec<NodeId> = (0..shape.max_node_id())
            .map(NodeId::from)
            .filter(|&id| digit_sum(shape, id) == sum)
            .collect();

        let remaining = count - selected.len();
        if ring.len() > remaining {
            ring.shuffle(&mut rng);
            ring.truncate(remaining);
        }
        selected.extend(ring);
    }
    selected
}

fn digit_sum(shape: Shape, id: NodeId) -> i64 {
    let coords = shape.decompose(id);
    coords
        .iter()
        .take(shape.num_phases())
        .map(|&coord| coord as i64)
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fails_exactly_the_requested_count() {
        let shape = Shape::new(3, 4);
        for count in [0, 1, 7, 16] {
            assert_eq!(evenly_spread(shape, count).len(), count);
        }
    }

    #[test]
    fn selection_is_deterministic() {
        let shape = Shape::new(3, 4);
        assert_eq!(evenly_spread(shape, 9), evenly_spread(shape, 9));
    }

    #[test]
    fn starts_from_the_balanced_ring() {
        let shape = Shape::new(2, 4);
        // Balanced digit sum for two phases of radix four is 3.
        for id in evenly_spread(shape, 2) {
            assert_eq!(digit_sum(shape, id), 3);
        }
    }

    #[test]
    fn no_duplicates_even_when_failing_many() {
        let shape = Shape::new(2, 4);
        let mut ids = evenly_spread(shape, 12);
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 12);
    }
}
