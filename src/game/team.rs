//! Team membership and allegiance
//!
//! Entities carry a team directly. Attached entities (turrets, projectiles,
//! debris spawned by a ship) store an explicit owner reference; their team is
//! resolved once at attach time and rebound whenever the owner's team changes.

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use tracing::warn;

use crate::game::entity::EntityId;
use crate::game::spatial::FastMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Team {
    /// Hostile to no one and never an ally (e.g. indestructible walls)
    #[default]
    Neutral,
    /// Hostile to everyone (e.g. asteroids)
    EnemyToAll,
    Team1,
    Team2,
    Team3,
    Team4,
    Team5,
    Team6,
    Team7,
    Team8,
}

/// Allies share a real team; Neutral and EnemyToAll have no allies
pub fn is_ally(mine: Team, other: Team) -> bool {
    if matches!(mine, Team::Neutral | Team::EnemyToAll) || matches!(other, Team::Neutral | Team::EnemyToAll) {
        return false;
    }
    mine == other
}

pub fn is_enemy(mine: Team, other: Team) -> bool {
    match (mine, other) {
        (_, Team::Neutral) => false,
        (_, Team::EnemyToAll) | (Team::EnemyToAll, _) => true,
        _ => mine != other,
    }
}

/// Team and ownership records
#[derive(Debug, Default)]
pub struct TeamRoster {
    teams: FastMap<EntityId, Team>,
    owners: FastMap<EntityId, EntityId>,
    attached: FastMap<EntityId, SmallVec<[EntityId; 4]>>,
}

impl TeamRoster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set an entity's team and rebind everything attached to it
    pub fn set_team(&mut self, entity: EntityId, team: Team) {
        let mut stack: Vec<EntityId> = vec![entity];
        while let Some(current) = stack.pop() {
            self.teams.insert(current, team);
            if let Some(children) = self.attached.get(&current) {
                stack.extend(children.iter().copied());
            }
        }
    }

    /// Attach `child` to `owner`; the child takes the owner's team
    ///
    /// Re-attaching moves the child to the new owner. Attaching an entity to
    /// itself or to one of its own attachments is refused.
    pub fn attach(&mut self, child: EntityId, owner: EntityId) -> bool {
        if child == owner || self.is_owned_by(owner, child) {
            warn!(%child, %owner, "Refusing attachment that would form an ownership cycle");
            return false;
        }

        self.detach(child);
        self.owners.insert(child, owner);
        self.attached.entry(owner).or_default().push(child);

        let team = self.teams.get(&owner).copied().unwrap_or_default();
        self.set_team(child, team);
        true
    }

    /// Drop the owner reference; the child keeps its current team
    pub fn detach(&mut self, child: EntityId) -> Option<EntityId> {
        let owner = self.owners.remove(&child)?;
        if let Some(children) = self.attached.get_mut(&owner) {
            children.retain(|c| *c != child);
            if children.is_empty() {
                self.attached.remove(&owner);
            }
        }
        Some(owner)
    }

    /// Forget an entity; its attachments become unowned but keep their team
    pub fn remove(&mut self, entity: EntityId) {
        self.detach(entity);
        self.teams.remove(&entity);
        if let Some(children) = self.attached.remove(&entity) {
            for child in children {
                self.owners.remove(&child);
            }
        }
    }

    pub fn owner_of(&self, entity: EntityId) -> Option<EntityId> {
        self.owners.get(&entity).copied()
    }

    /// Team of an entity; unknown entities are Neutral
    pub fn team_of(&self, entity: EntityId) -> Team {
        match self.teams.get(&entity) {
            Some(team) => *team,
            None => {
                warn!(%entity, "Entity has no team record, treating as Neutral");
                Team::Neutral
            }
        }
    }

    /// Team of an entity, without the unknown-entity warning
    pub fn get(&self, entity: EntityId) -> Option<Team> {
        self.teams.get(&entity).copied()
    }

    pub fn has_team(&self, entity: EntityId) -> bool {
        self.teams.contains_key(&entity)
    }

    /// Whether `ancestor` appears anywhere on `entity`'s owner chain
    fn is_owned_by(&self, entity: EntityId, ancestor: EntityId) -> bool {
        let mut current = entity;
        while let Some(&owner) = self.owners.get(&current) {
            if owner == ancestor {
                return true;
            }
            current = owner;
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alliance_rules() {
        assert!(is_ally(Team::Team1, Team::Team1));
        assert!(!is_ally(Team::Team1, Team::Team2));
        assert!(!is_ally(Team::Neutral, Team::Neutral));
        assert!(!is_ally(Team::EnemyToAll, Team::EnemyToAll));
    }

    #[test]
    fn test_enemy_rules() {
        assert!(is_enemy(Team::Team1, Team::Team2));
        assert!(!is_enemy(Team::Team1, Team::Team1));
        assert!(!is_enemy(Team::Team1, Team::Neutral));
        assert!(!is_enemy(Team::EnemyToAll, Team::Neutral));
        assert!(is_enemy(Team::Team3, Team::EnemyToAll));
        assert!(is_enemy(Team::EnemyToAll, Team::Team3));
        assert!(is_enemy(Team::EnemyToAll, Team::EnemyToAll));
    }

    #[test]
    fn test_attach_inherits_and_rebinds() {
        let mut roster = TeamRoster::new();
        let ship = EntityId(1);
        let turret = EntityId(2);
        let bullet = EntityId(3);

        roster.set_team(ship, Team::Team4);
        assert!(roster.attach(turret, ship));
        assert!(roster.attach(bullet, turret));
        assert_eq!(roster.team_of(bullet), Team::Team4);

        roster.set_team(ship, Team::Team7);
        assert_eq!(roster.team_of(turret), Team::Team7);
        assert_eq!(roster.team_of(bullet), Team::Team7);
        assert_eq!(roster.owner_of(bullet), Some(turret));
    }

    #[test]
    fn test_reattach_moves_child() {
        let mut roster = TeamRoster::new();
        roster.set_team(EntityId(1), Team::Team1);
        roster.set_team(EntityId(2), Team::Team2);
        roster.attach(EntityId(3), EntityId(1));

        roster.attach(EntityId(3), EntityId(2));
        assert_eq!(roster.team_of(EntityId(3)), Team::Team2);

        // Old owner's team change no longer reaches the child
        roster.set_team(EntityId(1), Team::Team5);
        assert_eq!(roster.team_of(EntityId(3)), Team::Team2);
    }

    #[test]
    fn test_cycle_refused() {
        let mut roster = TeamRoster::new();
        roster.attach(EntityId(2), EntityId(1));
        assert!(!roster.attach(EntityId(1), EntityId(2)));
        assert!(!roster.attach(EntityId(1), EntityId(1)));
        assert_eq!(roster.owner_of(EntityId(1)), None);
    }

    #[test]
    fn test_remove_orphans_children() {
        let mut roster = TeamRoster::new();
        roster.set_team(EntityId(1), Team::Team3);
        roster.attach(EntityId(2), EntityId(1));

        roster.remove(EntityId(1));
        assert!(!roster.has_team(EntityId(1)));
        assert_eq!(roster.owner_of(EntityId(2)), None);
        assert_eq!(roster.team_of(EntityId(2)), Team::Team3);
    }

    #[test]
    fn test_unknown_entity_is_neutral() {
        let roster = TeamRoster::new();
        assert_eq!(roster.team_of(EntityId(9)), Team::Neutral);
    }
}
