use rand::Rng;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use skirmish_core::game::entity::{EntityId, EntityKind, EntityRef, ForceKind};
use skirmish_core::game::force::{FalloffPolicy, ForceDescriptor};
use skirmish_core::game::team::Team;
use skirmish_core::util::vec2::Vec2;
use skirmish_core::{SimulationBuilder, SimulationConfig};

/// Demo arena half-extent in world units
const ARENA_HALF_SIZE: f32 = 400.0;
const SHIP_COUNT: u64 = 400;
const DEBRIS_COUNT: u64 = 200;
const TICKS: u32 = 600;
const DT: f32 = 1.0 / 60.0;
const REPORT_INTERVAL: u32 = 120;

fn main() -> anyhow::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    info!("Skirmish core demo v{}", env!("CARGO_PKG_VERSION"));

    let config = SimulationConfig::load_or_default();
    config.validate()?;
    info!(
        "Configuration loaded: cell_size={}, mode={:?}, clump_factor={}",
        config.cell_size, config.evaluation_mode, config.clump_threshold_factor
    );

    // Queue the initial population before the context exists
    let mut rng = rand::thread_rng();
    let mut builder = SimulationBuilder::new(config);
    let mut positions: Vec<(EntityId, Vec2)> = Vec::new();

    for i in 0..SHIP_COUNT {
        let id = EntityId(i + 1);
        let position = random_position(&mut rng);
        let entity = EntityRef::new(id, position);
        builder.queue_kind(entity, EntityKind::Ship)?;
        builder.queue_team(id, team_for(i))?;
        builder.queue_body(id, rng.gen_range(1.0..5.0))?;
        builder.queue_force_role(entity, ForceKind::Gravity, ForceDescriptor::receiver())?;
        builder.queue_force_role(entity, ForceKind::ForceField, ForceDescriptor::receiver())?;
        positions.push((id, position));
    }

    for i in 0..DEBRIS_COUNT {
        let id = EntityId(SHIP_COUNT + i + 1);
        let position = random_position(&mut rng);
        let entity = EntityRef::new(id, position);
        builder.queue_kind(entity, EntityKind::SpaceDebris)?;
        builder.queue_team(id, Team::EnemyToAll)?;
        let descriptor = if i % 4 == 0 {
            ForceDescriptor::applier(-120.0, 40.0).with_falloff(FalloffPolicy::Quadratic)
        } else {
            ForceDescriptor::applier(80.0, 60.0)
        };
        let force = if i % 4 == 0 { ForceKind::ForceField } else { ForceKind::Gravity };
        builder.queue_force_role(entity, force, descriptor)?;
    }

    let mut context = builder.build()?;

    for tick in 1..=TICKS {
        // Drift ships with their velocity; debris stays put
        for (id, position) in positions.iter_mut() {
            if let Some(body) = context.bodies().get(*id) {
                *position += body.velocity * DT;
            }
            context.sync_position(*id, *position);
        }

        let report = context.physics_tick().clone();
        context.integrate(DT);

        if tick % REPORT_INTERVAL == 0 {
            let stats = context.grid_stats(EntityKind::Ship);
            info!(
                tick,
                sources = report.sources,
                contributions = report.contributions,
                ship_cells = stats.non_empty_cells,
                max_per_cell = stats.max_per_cell,
                "Tick summary"
            );

            if let Some(&(probe, position)) = positions.first() {
                let team = context.team_of(probe);
                let enemies = context.nearby_enemies(&[EntityKind::Ship, EntityKind::SpaceDebris], position, 50.0, team);
                match context.find_closest(EntityKind::SpaceDebris, position) {
                    Some(closest) => info!(%probe, enemies = enemies.len(), %closest, "Probe surroundings"),
                    None => warn!(%probe, "No debris left in the arena"),
                }
            }
        }
    }

    info!("Demo finished after {} ticks", TICKS);
    Ok(())
}

fn random_position(rng: &mut impl Rng) -> Vec2 {
    Vec2::new(
        rng.gen_range(-ARENA_HALF_SIZE..ARENA_HALF_SIZE),
        rng.gen_range(-ARENA_HALF_SIZE..ARENA_HALF_SIZE),
    )
}

fn team_for(index: u64) -> Team {
    match index % 4 {
        0 => Team::Team1,
        1 => Team::Team2,
        2 => Team::Team3,
        _ => Team::Team4,
    }
}
