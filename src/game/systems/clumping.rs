//! Applier clumping
//!
//! Groups nearby same-polarity appliers into aggregate sources so a dense
//! emitter field costs one query per clump instead of one per applier.
//! Averaging loses per-source detail; direct evaluation stays the default.

use smallvec::SmallVec;
use std::collections::VecDeque;

use crate::game::entity::EntityId;
use crate::game::force::{FalloffCurve, FalloffPolicy, ForceDescriptor, Polarity};
use crate::game::spatial::{CellKey, FastMap};
use crate::util::vec2::Vec2;

/// An applier as seen by the force pass this tick
#[derive(Debug, Clone, Copy)]
pub struct ApplierSnapshot<'a> {
    pub id: EntityId,
    pub position: Vec2,
    pub descriptor: &'a ForceDescriptor,
}

/// Aggregate of adjacent same-polarity appliers, valid for one tick
#[derive(Debug, Clone, PartialEq)]
pub struct Clump {
    pub centroid: Vec2,
    /// Mean signed force value of the members
    pub force_value: f32,
    /// Mean range of the members
    pub max_range: f32,
    pub falloff: FalloffPolicy,
    pub curve: Option<FalloffCurve>,
    pub members: Vec<EntityId>,
}

impl Clump {
    /// Build from members; falloff comes from the strongest member (smallest id on ties)
    fn from_members(members: &[ApplierSnapshot<'_>]) -> Option<Clump> {
        let count = members.len() as f32;
        let strongest = members.iter().max_by(|a, b| {
            a.descriptor
                .max_force_value
                .abs()
                .total_cmp(&b.descriptor.max_force_value.abs())
                .then_with(|| b.id.cmp(&a.id))
        })?;

        let centroid: Vec2 = members.iter().map(|m| m.position).sum::<Vec2>() / count;
        let force_value = members.iter().map(|m| m.descriptor.max_force_value).sum::<f32>() / count;
        let max_range = members.iter().map(|m| m.descriptor.max_range).sum::<f32>() / count;

        Some(Clump {
            centroid,
            force_value,
            max_range,
            falloff: strongest.descriptor.falloff,
            curve: strongest.descriptor.curve.clone(),
            members: members.iter().map(|m| m.id).collect(),
        })
    }
}

/// Flood-fill one polarity partition into clumps
///
/// Two appliers are adjacent when they are at most
/// `mean range * threshold_factor` apart; each connected component becomes a
/// clump. Components are discovered in input order, so callers wanting
/// reproducible output should pass appliers sorted by id.
pub fn group_into_clumps(appliers: &[ApplierSnapshot<'_>], threshold_factor: f32) -> Vec<Clump> {
    if appliers.is_empty() {
        return Vec::new();
    }

    let average_range = appliers.iter().map(|a| a.descriptor.max_range).sum::<f32>() / appliers.len() as f32;
    let threshold = average_range * threshold_factor;

    if !threshold.is_finite() || threshold <= 0.0 {
        return appliers
            .iter()
            .filter_map(|a| Clump::from_members(std::slice::from_ref(a)))
            .collect();
    }

    let cell_of = |p: Vec2| -> CellKey { ((p.x / threshold).floor() as i32, (p.y / threshold).floor() as i32) };
    let mut grid: FastMap<CellKey, SmallVec<[usize; 8]>> = FastMap::default();
    for (i, applier) in appliers.iter().enumerate() {
        grid.entry(cell_of(applier.position)).or_default().push(i);
    }

    let threshold_sq = threshold * threshold;
    let mut assigned = vec![false; appliers.len()];
    let mut queue = VecDeque::new();
    let mut clumps = Vec::new();
    let mut group: Vec<ApplierSnapshot<'_>> = Vec::new();

    for start in 0..appliers.len() {
        if assigned[start] {
            continue;
        }

        assigned[start] = true;
        queue.push_back(start);
        group.clear();

        while let Some(current) = queue.pop_front() {
            let here = appliers[current].position;
            group.push(appliers[current]);

            // 3x3 neighbourhood; with cell size == threshold every in-threshold pair is adjacent.
            // Far-out positions saturate to the edge cells, so offsets saturate too.
            let (cx, cy) = cell_of(here);
            for dx in -1..=1 {
                for dy in -1..=1 {
                    let Some(candidates) = grid.get(&(cx.saturating_add(dx), cy.saturating_add(dy))) else {
                        continue;
                    };
                    for &other in candidates {
                        if !assigned[other] && appliers[other].position.distance_sq_to(here) <= threshold_sq {
                            assigned[other] = true;
                            queue.push_back(other);
                        }
                    }
                }
            }
        }

        clumps.extend(Clump::from_members(&group));
    }

    clumps
}

/// Split appliers by polarity and clump each side separately
///
/// Attraction and repulsion never share a clump, so co-located sources of
/// opposite sign cannot cancel during averaging. Zero-force appliers are dropped.
pub fn group_by_polarity(appliers: &[ApplierSnapshot<'_>], threshold_factor: f32) -> Vec<Clump> {
    let (attractors, repellers): (Vec<_>, Vec<_>) = appliers
        .iter()
        .copied()
        .filter(|a| a.descriptor.polarity().is_some())
        .partition(|a| a.descriptor.polarity() == Some(Polarity::Attract));

    let mut clumps = group_into_clumps(&attractors, threshold_factor);
    clumps.extend(group_into_clumps(&repellers, threshold_factor));
    clumps
}
