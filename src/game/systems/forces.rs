//! Force evaluation pass
//!
//! Runs once per physics tick. For every force category, each source (an
//! applier, or a clump of appliers in clustered mode) queries the spatial
//! index for receivers inside its range and adds a falloff-scaled force to
//! each receiver's accumulator.

#[cfg(feature = "parallel_forces")]
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::game::body::ForceSink;
#[cfg(feature = "parallel_forces")]
use crate::game::constants::forces::PARALLEL_SOURCE_THRESHOLD;
use crate::game::constants::forces::DEFAULT_CLUMP_THRESHOLD_FACTOR;
use crate::game::entity::{CategoryKey, EntityId, ForceKind};
use crate::game::force::{contribution, FalloffCurve, FalloffPolicy, Polarity};
use crate::game::registry::ForceRegistry;
use crate::game::spatial::SpatialIndex;
use crate::game::systems::clumping::{group_by_polarity, ApplierSnapshot, Clump};
use crate::util::vec2::Vec2;

/// How sources are formed from appliers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum EvaluationMode {
    /// One source per applier (exact)
    #[default]
    Direct,
    /// One source per clump of adjacent same-polarity appliers
    Clustered,
}

/// Knobs for one force pass
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ForceSettings {
    pub mode: EvaluationMode,
    pub clump_threshold_factor: f32,
    /// Keep every applied force vector in the tick report (debug overlays)
    pub record_force_vectors: bool,
}

impl Default for ForceSettings {
    fn default() -> Self {
        Self {
            mode: EvaluationMode::Direct,
            clump_threshold_factor: DEFAULT_CLUMP_THRESHOLD_FACTOR,
            record_force_vectors: false,
        }
    }
}

/// One applied force, for drawing
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ForceSample {
    pub force: ForceKind,
    pub polarity: Polarity,
    pub receiver: EntityId,
    pub receiver_position: Vec2,
    pub source_position: Vec2,
    pub vector: Vec2,
}

/// Outcome of one physics tick
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TickReport {
    /// Sources evaluated (appliers or clumps)
    pub sources: usize,
    /// Forces written into a receiver's accumulator
    pub contributions: usize,
    /// Forces dropped because the receiver had no physics state
    pub skipped_without_body: usize,
    pub samples: Vec<ForceSample>,
}

/// Emitter evaluated against receivers in range
struct ForceSource<'a> {
    origin: Option<EntityId>,
    position: Vec2,
    force_value: f32,
    max_range: f32,
    falloff: FalloffPolicy,
    curve: Option<&'a FalloffCurve>,
}

impl<'a> ForceSource<'a> {
    fn from_applier(applier: &ApplierSnapshot<'a>) -> Self {
        Self {
            origin: Some(applier.id),
            position: applier.position,
            force_value: applier.descriptor.max_force_value,
            max_range: applier.descriptor.max_range,
            falloff: applier.descriptor.falloff,
            curve: applier.descriptor.curve.as_ref(),
        }
    }

    fn from_clump(clump: &'a Clump) -> Self {
        Self {
            origin: None,
            position: clump.centroid,
            force_value: clump.force_value,
            max_range: clump.max_range,
            falloff: clump.falloff,
            curve: clump.curve.as_ref(),
        }
    }
}

/// Force on one receiver from one source
#[derive(Debug, Clone, Copy)]
struct Contribution {
    receiver: EntityId,
    receiver_position: Vec2,
    vector: Vec2,
}

/// Run the force pass for every force category
pub fn update<S: ForceSink>(
    index: &SpatialIndex,
    registry: &ForceRegistry,
    sink: &mut S,
    settings: &ForceSettings,
) -> TickReport {
    let mut report = TickReport::default();
    for force in ForceKind::ALL {
        update_category(index, registry, sink, settings, force, &mut report);
    }

    debug!(
        sources = report.sources,
        contributions = report.contributions,
        skipped = report.skipped_without_body,
        "Force pass complete"
    );
    report
}

/// Run the force pass for a single force category, adding to `report`
pub fn update_category<S: ForceSink>(
    index: &SpatialIndex,
    registry: &ForceRegistry,
    sink: &mut S,
    settings: &ForceSettings,
    force: ForceKind,
    report: &mut TickReport,
) {
    let appliers = collect_appliers(index, registry, force);
    if appliers.is_empty() {
        return;
    }

    let clumps: Vec<Clump>;
    let sources: Vec<ForceSource<'_>> = match settings.mode {
        EvaluationMode::Direct => appliers.iter().map(ForceSource::from_applier).collect(),
        EvaluationMode::Clustered => {
            clumps = group_by_polarity(&appliers, settings.clump_threshold_factor);
            clumps.iter().map(ForceSource::from_clump).collect()
        }
    };
    report.sources += sources.len();

    let per_source = compute_contributions(index, registry, force, &sources);

    // Accumulate sequentially in source order so totals don't depend on scheduling
    for (source, contributions) in sources.iter().zip(per_source) {
        for c in contributions {
            if !sink.add_force(c.receiver, c.vector) {
                report.skipped_without_body += 1;
                debug!(receiver = %c.receiver, ?force, "Receiver has no physics state, skipping");
                continue;
            }

            report.contributions += 1;
            if settings.record_force_vectors {
                if let Some(polarity) = Polarity::of(source.force_value) {
                    report.samples.push(ForceSample {
                        force,
                        polarity,
                        receiver: c.receiver,
                        receiver_position: c.receiver_position,
                        source_position: source.position,
                        vector: c.vector,
                    });
                }
            }
        }
    }
}

/// Appliers of a category with their indexed positions, attractors first, each side sorted by id
///
/// Zero-force appliers are dropped; polarity sides are kept apart so clumping
/// and accumulation order never interleave attraction with repulsion.
fn collect_appliers<'r>(index: &SpatialIndex, registry: &'r ForceRegistry, force: ForceKind) -> Vec<ApplierSnapshot<'r>> {
    let category = CategoryKey::Force(force);
    let mut attractors = Vec::new();
    let mut repellers = Vec::new();

    for (id, descriptor) in registry.appliers(force) {
        let Some(position) = index.position_in(id, category) else {
            warn!(entity = %id, ?force, "Applier has no spatial record, skipping");
            continue;
        };
        let snapshot = ApplierSnapshot { id, position, descriptor };
        match descriptor.polarity() {
            Some(Polarity::Attract) => attractors.push(snapshot),
            Some(Polarity::Repel) => repellers.push(snapshot),
            None => {}
        }
    }

    attractors.sort_unstable_by_key(|a| a.id);
    repellers.sort_unstable_by_key(|a| a.id);
    attractors.extend(repellers);
    attractors
}

fn compute_contributions(
    index: &SpatialIndex,
    registry: &ForceRegistry,
    force: ForceKind,
    sources: &[ForceSource<'_>],
) -> Vec<Vec<Contribution>> {
    #[cfg(feature = "parallel_forces")]
    if sources.len() >= PARALLEL_SOURCE_THRESHOLD {
        return sources
            .par_iter()
            .map(|source| contributions_from(index, registry, force, source))
            .collect();
    }

    sources
        .iter()
        .map(|source| contributions_from(index, registry, force, source))
        .collect()
}

/// Receivers within a source's range and the force each feels
fn contributions_from(
    index: &SpatialIndex,
    registry: &ForceRegistry,
    force: ForceKind,
    source: &ForceSource<'_>,
) -> Vec<Contribution> {
    let mut out = Vec::new();
    index.for_each_nearby(CategoryKey::Force(force), source.position, source.max_range, |id, position, _| {
        if source.origin == Some(id) || !registry.role(id, force).receiver {
            return;
        }
        if let Some(vector) = contribution(
            source.position,
            position,
            source.force_value,
            source.max_range,
            source.falloff,
            source.curve,
        ) {
            out.push(Contribution {
                receiver: id,
                receiver_position: position,
                vector,
            });
        }
    });
    out
}
