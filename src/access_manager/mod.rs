//! AccessManager (component B): the in-memory authorization graph plus its
//! four auxiliary mappings, and the query surface built on top of them.

pub mod types;

use std::collections::{BTreeMap, BTreeSet};

pub use types::{AccessLevel, ApplicationComponent, Entity, EntityType};

use crate::error::AccessError;
use crate::graph::{DirectedGraph, LeafId, NonLeafId, VisitControl};

/// The in-memory authorization graph: users, groups, group inheritance, and
/// the accessory mappings to application components and entities.
#[derive(Debug, Clone, Default)]
pub struct AccessManager {
    graph: DirectedGraph,
    user_component_access: BTreeMap<LeafId, BTreeSet<(ApplicationComponent, AccessLevel)>>,
    group_component_access: BTreeMap<NonLeafId, BTreeSet<(ApplicationComponent, AccessLevel)>>,
    entity_types: BTreeSet<EntityType>,
    entities: BTreeMap<EntityType, BTreeSet<Entity>>,
    user_entities: BTreeMap<LeafId, BTreeMap<EntityType, BTreeSet<Entity>>>,
    group_entities: BTreeMap<NonLeafId, BTreeMap<EntityType, BTreeSet<Entity>>>,
}

impl AccessManager {
    /// Create an empty access manager.
    pub fn new() -> Self {
        Self::default()
    }

    // -- users / groups / inheritance (delegate to the graph core) ---------

    /// Add a user. Fails with `ElementAlreadyExists` if present.
    pub fn add_user(&mut self, user: LeafId) -> Result<(), AccessError> {
        self.graph.add_leaf(user)
    }

    /// Add a group. Fails with `ElementAlreadyExists` if present.
    pub fn add_group(&mut self, group: NonLeafId) -> Result<(), AccessError> {
        self.graph.add_non_leaf(group)
    }

    /// Whether `user` currently exists.
    pub fn has_user(&self, user: &LeafId) -> bool {
        self.graph.has_leaf(user)
    }

    /// Whether `group` currently exists.
    pub fn has_group(&self, group: &NonLeafId) -> bool {
        self.graph.has_non_leaf(group)
    }

    /// Remove a user and all mappings that reference it.
    pub fn remove_user(&mut self, user: &LeafId) -> Result<(), AccessError> {
        self.graph.remove_leaf(user)?;
        self.user_component_access.remove(user);
        self.user_entities.remove(user);
        Ok(())
    }

    /// Remove a group and all mappings that reference it.
    pub fn remove_group(&mut self, group: &NonLeafId) -> Result<(), AccessError> {
        self.graph.remove_non_leaf(group)?;
        self.group_component_access.remove(group);
        self.group_entities.remove(group);
        Ok(())
    }

    /// Add a user -> group mapping.
    pub fn add_user_to_group_mapping(
        &mut self,
        user: &LeafId,
        group: &NonLeafId,
    ) -> Result<(), AccessError> {
        self.graph.add_leaf_edge(user, group)
    }

    /// Remove a user -> group mapping.
    pub fn remove_user_to_group_mapping(
        &mut self,
        user: &LeafId,
        group: &NonLeafId,
    ) -> Result<(), AccessError> {
        self.graph.remove_leaf_edge(user, group)
    }

    /// Add a group -> group mapping (inheritance edge). Fails with
    /// `CircularReference` if it would create a cycle.
    pub fn add_group_to_group_mapping(
        &mut self,
        from: &NonLeafId,
        to: &NonLeafId,
    ) -> Result<(), AccessError> {
        self.graph.add_non_leaf_edge(from, to)
    }

    /// Remove a group -> group mapping.
    pub fn remove_group_to_group_mapping(
        &mut self,
        from: &NonLeafId,
        to: &NonLeafId,
    ) -> Result<(), AccessError> {
        self.graph.remove_non_leaf_edge(from, to)
    }

    // -- component access mappings ------------------------------------------

    /// Grant a user direct access to `(component, level)`.
    pub fn add_user_component_access(
        &mut self,
        user: &LeafId,
        component: ApplicationComponent,
        level: AccessLevel,
    ) -> Result<(), AccessError> {
        if !self.graph.has_leaf(user) {
            return Err(AccessError::leaf_not_found(user));
        }
        let set = self.user_component_access.entry(user.clone()).or_default();
        if !set.insert((component.clone(), level.clone())) {
            return Err(AccessError::ElementAlreadyExists(format!(
                "user component access '{user}' -> ({component}, {level})"
            )));
        }
        Ok(())
    }

    /// Revoke a user's direct access to `(component, level)`.
    pub fn remove_user_component_access(
        &mut self,
        user: &LeafId,
        component: &ApplicationComponent,
        level: &AccessLevel,
    ) -> Result<(), AccessError> {
        let removed = self
            .user_component_access
            .get_mut(user)
            .map(|set| set.remove(&(component.clone(), level.clone())))
            .unwrap_or(false);
        if !removed {
            return Err(AccessError::ElementNotFound(format!(
                "user component access '{user}' -> ({component}, {level})"
            )));
        }
        Ok(())
    }

    /// Grant a group direct access to `(component, level)`.
    pub fn add_group_component_access(
        &mut self,
        group: &NonLeafId,
        component: ApplicationComponent,
        level: AccessLevel,
    ) -> Result<(), AccessError> {
        if !self.graph.has_non_leaf(group) {
            return Err(AccessError::non_leaf_not_found(group));
        }
        let set = self.group_component_access.entry(group.clone()).or_default();
        if !set.insert((component.clone(), level.clone())) {
            return Err(AccessError::ElementAlreadyExists(format!(
                "group component access '{group}' -> ({component}, {level})"
            )));
        }
        Ok(())
    }

    /// Revoke a group's direct access to `(component, level)`.
    pub fn remove_group_component_access(
        &mut self,
        group: &NonLeafId,
        component: &ApplicationComponent,
        level: &AccessLevel,
    ) -> Result<(), AccessError> {
        let removed = self
            .group_component_access
            .get_mut(group)
            .map(|set| set.remove(&(component.clone(), level.clone())))
            .unwrap_or(false);
        if !removed {
            return Err(AccessError::ElementNotFound(format!(
                "group component access '{group}' -> ({component}, {level})"
            )));
        }
        Ok(())
    }

    // -- entity types / entities ----------------------------------------------

    /// Register an entity type.
    pub fn add_entity_type(&mut self, entity_type: EntityType) -> Result<(), AccessError> {
        if !self.entity_types.insert(entity_type.clone()) {
            return Err(AccessError::ElementAlreadyExists(format!(
                "entity type '{entity_type}'"
            )));
        }
        self.entities.entry(entity_type).or_default();
        Ok(())
    }

    /// Remove an entity type. Cascades: invalidates all of its entities and
    /// every mapping referencing them.
    pub fn remove_entity_type(&mut self, entity_type: &EntityType) -> Result<(), AccessError> {
        if !self.entity_types.remove(entity_type) {
            return Err(AccessError::ElementNotFound(format!(
                "entity type '{entity_type}'"
            )));
        }
        self.entities.remove(entity_type);
        for per_type in self.user_entities.values_mut() {
            per_type.remove(entity_type);
        }
        for per_type in self.group_entities.values_mut() {
            per_type.remove(entity_type);
        }
        Ok(())
    }

    /// Add an entity under an existing entity type.
    pub fn add_entity(&mut self, entity_type: &EntityType, entity: Entity) -> Result<(), AccessError> {
        if !self.entity_types.contains(entity_type) {
            return Err(AccessError::ElementNotFound(format!(
                "entity type '{entity_type}'"
            )));
        }
        let set = self.entities.entry(entity_type.clone()).or_default();
        if !set.insert(entity.clone()) {
            return Err(AccessError::ElementAlreadyExists(format!(
                "entity '{entity_type}' / '{entity}'"
            )));
        }
        Ok(())
    }

    /// Remove an entity. Cascades: invalidates mappings referencing it.
    pub fn remove_entity(&mut self, entity_type: &EntityType, entity: &Entity) -> Result<(), AccessError> {
        let removed = self
            .entities
            .get_mut(entity_type)
            .map(|set| set.remove(entity))
            .unwrap_or(false);
        if !removed {
            return Err(AccessError::ElementNotFound(format!(
                "entity '{entity_type}' / '{entity}'"
            )));
        }
        for per_type in self.user_entities.values_mut() {
            if let Some(set) = per_type.get_mut(entity_type) {
                set.remove(entity);
            }
        }
        for per_type in self.group_entities.values_mut() {
            if let Some(set) = per_type.get_mut(entity_type) {
                set.remove(entity);
            }
        }
        Ok(())
    }

    /// Map a user to an entity.
    pub fn add_user_to_entity_mapping(
        &mut self,
        user: &LeafId,
        entity_type: &EntityType,
        entity: &Entity,
    ) -> Result<(), AccessError> {
        if !self.graph.has_leaf(user) {
            return Err(AccessError::leaf_not_found(user));
        }
        if !self.entities.get(entity_type).is_some_and(|s| s.contains(entity)) {
            return Err(AccessError::ElementNotFound(format!(
                "entity '{entity_type}' / '{entity}'"
            )));
        }
        let set = self
            .user_entities
            .entry(user.clone())
            .or_default()
            .entry(entity_type.clone())
            .or_default();
        if !set.insert(entity.clone()) {
            return Err(AccessError::ElementAlreadyExists(format!(
                "user entity mapping '{user}' -> ({entity_type}, {entity})"
            )));
        }
        Ok(())
    }

    /// Remove a user -> entity mapping.
    pub fn remove_user_to_entity_mapping(
        &mut self,
        user: &LeafId,
        entity_type: &EntityType,
        entity: &Entity,
    ) -> Result<(), AccessError> {
        let removed = self
            .user_entities
            .get_mut(user)
            .and_then(|per_type| per_type.get_mut(entity_type))
            .map(|set| set.remove(entity))
            .unwrap_or(false);
        if !removed {
            return Err(AccessError::ElementNotFound(format!(
                "user entity mapping '{user}' -> ({entity_type}, {entity})"
            )));
        }
        Ok(())
    }

    /// Map a group to an entity.
    pub fn add_group_to_entity_mapping(
        &mut self,
        group: &NonLeafId,
        entity_type: &EntityType,
        entity: &Entity,
    ) -> Result<(), AccessError> {
        if !self.graph.has_non_leaf(group) {
            return Err(AccessError::non_leaf_not_found(group));
        }
        if !self.entities.get(entity_type).is_some_and(|s| s.contains(entity)) {
            return Err(AccessError::ElementNotFound(format!(
                "entity '{entity_type}' / '{entity}'"
            )));
        }
        let set = self
            .group_entities
            .entry(group.clone())
            .or_default()
            .entry(entity_type.clone())
            .or_default();
        if !set.insert(entity.clone()) {
            return Err(AccessError::ElementAlreadyExists(format!(
                "group entity mapping '{group}' -> ({entity_type}, {entity})"
            )));
        }
        Ok(())
    }

    /// Remove a group -> entity mapping.
    pub fn remove_group_to_entity_mapping(
        &mut self,
        group: &NonLeafId,
        entity_type: &EntityType,
        entity: &Entity,
    ) -> Result<(), AccessError> {
        let removed = self
            .group_entities
            .get_mut(group)
            .and_then(|per_type| per_type.get_mut(entity_type))
            .map(|set| set.remove(entity))
            .unwrap_or(false);
        if !removed {
            return Err(AccessError::ElementNotFound(format!(
                "group entity mapping '{group}' -> ({entity_type}, {entity})"
            )));
        }
        Ok(())
    }

    // -- queries --------------------------------------------------------------

    /// Groups transitively reachable from `user` (direct membership plus
    /// group inheritance).
    fn reachable_groups(&self, user: &LeafId) -> BTreeSet<NonLeafId> {
        self.graph.reachable_non_leaves_from_leaf(user)
    }

    /// True iff `user` has access to `(component, level)` directly or via
    /// any reachable group. False (not an error) if `user` is unknown.
    pub fn has_access_to_application_component(
        &self,
        user: &LeafId,
        component: &ApplicationComponent,
        level: &AccessLevel,
    ) -> bool {
        if !self.graph.has_leaf(user) {
            return false;
        }
        let key = (component.clone(), level.clone());
        if self
            .user_component_access
            .get(user)
            .is_some_and(|set| set.contains(&key))
        {
            return true;
        }

        let mut found = false;
        self.graph.traverse_from_leaf(user, |group| {
            if self
                .group_component_access
                .get(group)
                .is_some_and(|set| set.contains(&key))
            {
                found = true;
                return VisitControl::Stop;
            }
            VisitControl::Continue
        });
        found
    }

    /// True iff `user` has access to `(entity_type, entity)` directly or via
    /// any reachable group. Fails with `ElementNotFound` if `entity_type` is
    /// unknown; returns false (not an error) if `user` is unknown.
    pub fn has_access_to_entity(
        &self,
        user: &LeafId,
        entity_type: &EntityType,
        entity: &Entity,
    ) -> Result<bool, AccessError> {
        if !self.entity_types.contains(entity_type) {
            return Err(AccessError::ElementNotFound(format!(
                "entity type '{entity_type}'"
            )));
        }
        if !self.graph.has_leaf(user) {
            return Ok(false);
        }
        if self
            .user_entities
            .get(user)
            .and_then(|per_type| per_type.get(entity_type))
            .is_some_and(|set| set.contains(entity))
        {
            return Ok(true);
        }

        let mut found = false;
        self.graph.traverse_from_leaf(user, |group| {
            if self
                .group_entities
                .get(group)
                .and_then(|per_type| per_type.get(entity_type))
                .is_some_and(|set| set.contains(entity))
            {
                found = true;
                return VisitControl::Stop;
            }
            VisitControl::Continue
        });
        Ok(found)
    }

    /// Union of entities of `entity_type` directly accessible by `user`
    /// and accessible via any reachable group. Fails with `ElementNotFound`
    /// if `entity_type` is unknown.
    pub fn get_accessible_entities(
        &self,
        user: &LeafId,
        entity_type: &EntityType,
    ) -> Result<BTreeSet<Entity>, AccessError> {
        if !self.entity_types.contains(entity_type) {
            return Err(AccessError::ElementNotFound(format!(
                "entity type '{entity_type}'"
            )));
        }
        let mut out = BTreeSet::new();
        if let Some(set) = self
            .user_entities
            .get(user)
            .and_then(|per_type| per_type.get(entity_type))
        {
            out.extend(set.iter().cloned());
        }
        for group in self.reachable_groups(user) {
            if let Some(set) = self
                .group_entities
                .get(&group)
                .and_then(|per_type| per_type.get(entity_type))
            {
                out.extend(set.iter().cloned());
            }
        }
        Ok(out)
    }

    /// Union of entities of `entity_type` directly bound to `group`, and
    /// bound to every group reachable by following group-to-group edges
    /// forward from it (the group analogue of `get_accessible_entities`'s
    /// union over `reachable_groups`). Fails with `ElementNotFound` if
    /// `entity_type` is unknown.
    pub fn get_accessible_entities_for_group(
        &self,
        group: &NonLeafId,
        entity_type: &EntityType,
    ) -> Result<BTreeSet<Entity>, AccessError> {
        if !self.entity_types.contains(entity_type) {
            return Err(AccessError::ElementNotFound(format!(
                "entity type '{entity_type}'"
            )));
        }
        let mut out = BTreeSet::new();
        if let Some(set) = self
            .group_entities
            .get(group)
            .and_then(|per_type| per_type.get(entity_type))
        {
            out.extend(set.iter().cloned());
        }
        for inherited in self.graph.reachable_non_leaves_from_non_leaf(group) {
            if let Some(set) = self
                .group_entities
                .get(&inherited)
                .and_then(|per_type| per_type.get(entity_type))
            {
                out.extend(set.iter().cloned());
            }
        }
        Ok(out)
    }

    /// Union of `(component, level)` pairs directly accessible by `user`
    /// and accessible via any reachable group.
    pub fn get_application_components_accessible_by_user(
        &self,
        user: &LeafId,
    ) -> BTreeSet<(ApplicationComponent, AccessLevel)> {
        let mut out = BTreeSet::new();
        if let Some(set) = self.user_component_access.get(user) {
            out.extend(set.iter().cloned());
        }
        for group in self.reachable_groups(user) {
            if let Some(set) = self.group_component_access.get(&group) {
                out.extend(set.iter().cloned());
            }
        }
        out
    }

    /// `(component, level)` pairs accessible by `group`: its own direct
    /// grants, unioned with every group reachable by following
    /// group-to-group edges forward from it (the group analogue of
    /// `get_application_components_accessible_by_user`'s union over
    /// `reachable_groups`).
    pub fn get_application_components_accessible_by_group(
        &self,
        group: &NonLeafId,
    ) -> BTreeSet<(ApplicationComponent, AccessLevel)> {
        let mut out = BTreeSet::new();
        if let Some(set) = self.group_component_access.get(group) {
            out.extend(set.iter().cloned());
        }
        for inherited in self.graph.reachable_non_leaves_from_non_leaf(group) {
            if let Some(set) = self.group_component_access.get(&inherited) {
                out.extend(set.iter().cloned());
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn u(s: &str) -> LeafId {
        LeafId::from(s)
    }
    fn g(s: &str) -> NonLeafId {
        NonLeafId::from(s)
    }

    /// Component access inherited through a group mapping.
    #[test]
    fn scenario_user_inherits_group_component_access() {
        let mut am = AccessManager::new();
        am.add_user(u("alice")).unwrap();
        am.add_group(g("admins")).unwrap();
        am.add_user_to_group_mapping(&u("alice"), &g("admins")).unwrap();
        am.add_group_component_access(&g("admins"), "Settings".into(), "Write".into())
            .unwrap();

        assert!(am.has_access_to_application_component(&u("alice"), &"Settings".into(), &"Write".into()));
        assert!(!am.has_access_to_application_component(&u("bob"), &"Settings".into(), &"Write".into()));
    }

    /// Group-to-group mappings that would create a cycle are rejected.
    #[test]
    fn scenario_circular_group_reference_rejected() {
        let mut am = AccessManager::new();
        for n in ["g1", "g2", "g3"] {
            am.add_group(g(n)).unwrap();
        }
        am.add_group_to_group_mapping(&g("g1"), &g("g2")).unwrap();
        am.add_group_to_group_mapping(&g("g2"), &g("g3")).unwrap();

        let err = am.add_group_to_group_mapping(&g("g3"), &g("g1")).unwrap_err();
        assert!(matches!(err, AccessError::CircularReference { .. }));
    }

    #[test]
    fn group_component_access_unions_across_group_to_group_mappings() {
        let mut am = AccessManager::new();
        for n in ["managers", "leads", "engineers"] {
            am.add_group(g(n)).unwrap();
        }
        am.add_group_to_group_mapping(&g("managers"), &g("leads")).unwrap();
        am.add_group_to_group_mapping(&g("leads"), &g("engineers")).unwrap();

        am.add_group_component_access(&g("managers"), "Payroll".into(), "Read".into())
            .unwrap();
        am.add_group_component_access(&g("engineers"), "Deploys".into(), "Write".into())
            .unwrap();

        let accessible = am.get_application_components_accessible_by_group(&g("managers"));
        assert!(accessible.contains(&("Payroll".into(), "Read".into())));
        assert!(accessible.contains(&("Deploys".into(), "Write".into())));

        // The inherited-from group does not gain the inheriting group's grants.
        let leads_accessible = am.get_application_components_accessible_by_group(&g("leads"));
        assert!(!leads_accessible.contains(&("Payroll".into(), "Read".into())));
        assert!(leads_accessible.contains(&("Deploys".into(), "Write".into())));
    }

    /// Accessible entities union direct and group-inherited bindings.
    #[test]
    fn scenario_accessible_entities_union() {
        let mut am = AccessManager::new();
        am.add_entity_type("Client".into()).unwrap();
        am.add_entity(&"Client".into(), "CoA".into()).unwrap();
        am.add_entity(&"Client".into(), "CoB".into()).unwrap();

        am.add_user(u("u1")).unwrap();
        am.add_group(g("g1")).unwrap();
        am.add_user_to_entity_mapping(&u("u1"), &"Client".into(), &"CoA".into()).unwrap();
        am.add_user_to_group_mapping(&u("u1"), &g("g1")).unwrap();
        am.add_group_to_entity_mapping(&g("g1"), &"Client".into(), &"CoB".into()).unwrap();

        let accessible = am.get_accessible_entities(&u("u1"), &"Client".into()).unwrap();
        assert_eq!(
            accessible,
            BTreeSet::from(["CoA".into(), "CoB".into()])
        );
    }

    /// A group's accessible entities union its own bindings with those of
    /// groups reachable by following group-to-group edges forward from it.
    #[test]
    fn group_accessible_entities_union_across_group_to_group_mappings() {
        let mut am = AccessManager::new();
        am.add_entity_type("Client".into()).unwrap();
        am.add_entity(&"Client".into(), "CoA".into()).unwrap();
        am.add_entity(&"Client".into(), "CoB".into()).unwrap();

        am.add_group(g("managers")).unwrap();
        am.add_group(g("engineers")).unwrap();
        am.add_group_to_group_mapping(&g("managers"), &g("engineers")).unwrap();
        am.add_group_to_entity_mapping(&g("managers"), &"Client".into(), &"CoA".into())
            .unwrap();
        am.add_group_to_entity_mapping(&g("engineers"), &"Client".into(), &"CoB".into())
            .unwrap();

        let accessible = am
            .get_accessible_entities_for_group(&g("managers"), &"Client".into())
            .unwrap();
        assert_eq!(accessible, BTreeSet::from(["CoA".into(), "CoB".into()]));

        // The inherited-from group does not gain the inheriting group's bindings.
        let engineers_accessible = am
            .get_accessible_entities_for_group(&g("engineers"), &"Client".into())
            .unwrap();
        assert_eq!(engineers_accessible, BTreeSet::from(["CoB".into()]));
    }

    #[test]
    fn unknown_entity_type_is_an_error() {
        let am = AccessManager::new();
        let err = am.get_accessible_entities(&u("nobody"), &"Missing".into()).unwrap_err();
        assert!(matches!(err, AccessError::ElementNotFound(_)));
    }

    #[test]
    fn unknown_user_has_access_returns_false_not_error() {
        let mut am = AccessManager::new();
        am.add_entity_type("Client".into()).unwrap();
        let result = am.has_access_to_entity(&u("ghost"), &"Client".into(), &"x".into());
        assert!(!result.unwrap());
    }

    #[test]
    fn remove_entity_type_cascades_to_mappings() {
        let mut am = AccessManager::new();
        am.add_entity_type("Client".into()).unwrap();
        am.add_entity(&"Client".into(), "CoA".into()).unwrap();
        am.add_user(u("u1")).unwrap();
        am.add_user_to_entity_mapping(&u("u1"), &"Client".into(), &"CoA".into()).unwrap();

        am.remove_entity_type(&"Client".into()).unwrap();
        let err = am.get_accessible_entities(&u("u1"), &"Client".into()).unwrap_err();
        assert!(matches!(err, AccessError::ElementNotFound(_)));
    }

    #[test]
    fn duplicate_component_access_fails() {
        let mut am = AccessManager::new();
        am.add_user(u("u1")).unwrap();
        am.add_user_component_access(&u("u1"), "S".into(), "R".into()).unwrap();
        let err = am
            .add_user_component_access(&u("u1"), "S".into(), "R".into())
            .unwrap_err();
        assert!(matches!(err, AccessError::ElementAlreadyExists(_)));
    }
}
