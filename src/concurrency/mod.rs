//! Concurrent AccessManager (component C).
//!
//! Readers go through a `parking_lot::RwLock` and never block each other.
//! Writers additionally acquire a small set of named mutual-exclusion
//! regions before taking the write lock; a mutation that touches several
//! regions always acquires them in `LockSet`'s declaration order, which is
//! fixed, so two writers can never deadlock against each other.

pub mod observer;

use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard, RwLock};

use crate::access_manager::{AccessLevel, AccessManager, ApplicationComponent, Entity, EntityType};
use crate::error::AccessError;
use crate::events::{EventAction, EventPayload, EventSequencer, TemporalEvent};
use crate::graph::{LeafId, NonLeafId};

pub use observer::{MutationObserver, ObserverChain, TracingMutationObserver};

/// Named mutual-exclusion regions, in the fixed order they must be acquired.
/// Each region guards one independent slice of the authorization graph and its auxiliary mappings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LockSet {
    Users,
    Groups,
    UserToGroupMappings,
    GroupToGroupMappings,
    UserComponentAccess,
    GroupComponentAccess,
    EntityTypes,
    Entities,
    UserEntities,
    GroupEntities,
}

/// All ten regions in acquisition order.
pub const LOCK_ORDER: [LockSet; 10] = [
    LockSet::Users,
    LockSet::Groups,
    LockSet::UserToGroupMappings,
    LockSet::GroupToGroupMappings,
    LockSet::UserComponentAccess,
    LockSet::GroupComponentAccess,
    LockSet::EntityTypes,
    LockSet::Entities,
    LockSet::UserEntities,
    LockSet::GroupEntities,
];

#[derive(Default)]
struct Regions {
    users: Mutex<()>,
    groups: Mutex<()>,
    user_to_group_mappings: Mutex<()>,
    group_to_group_mappings: Mutex<()>,
    user_component_access: Mutex<()>,
    group_component_access: Mutex<()>,
    entity_types: Mutex<()>,
    entities: Mutex<()>,
    user_entities: Mutex<()>,
    group_entities: Mutex<()>,
}

impl Regions {
    fn mutex(&self, region: LockSet) -> &Mutex<()> {
        match region {
            LockSet::Users => &self.users,
            LockSet::Groups => &self.groups,
            LockSet::UserToGroupMappings => &self.user_to_group_mappings,
            LockSet::GroupToGroupMappings => &self.group_to_group_mappings,
            LockSet::UserComponentAccess => &self.user_component_access,
            LockSet::GroupComponentAccess => &self.group_component_access,
            LockSet::EntityTypes => &self.entity_types,
            LockSet::Entities => &self.entities,
            LockSet::UserEntities => &self.user_entities,
            LockSet::GroupEntities => &self.group_entities,
        }
    }

    /// Acquire the given regions, deduplicated and sorted into `LOCK_ORDER`,
    /// so that any two mutations touching overlapping region sets always
    /// request their locks in the same global order.
    fn acquire(&self, mut regions: Vec<LockSet>) -> Vec<MutexGuard<'_, ()>> {
        regions.sort();
        regions.dedup();
        regions.into_iter().map(|r| self.mutex(r).lock()).collect()
    }
}

/// Thread-safe wrapper around `AccessManager` enforcing the locking
/// a fixed lock-acquisition order to prevent deadlock, plus event construction for every mutation
/// so the caller can hand the result straight to the persister buffer.
pub struct ConcurrentAccessManager {
    graph: RwLock<AccessManager>,
    regions: Regions,
    sequencer: EventSequencer,
    observers: ObserverChain,
}

impl Default for ConcurrentAccessManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ConcurrentAccessManager {
    /// Create an empty manager with no observers attached.
    pub fn new() -> Self {
        Self {
            graph: RwLock::new(AccessManager::new()),
            regions: Regions::default(),
            sequencer: EventSequencer::new(),
            observers: ObserverChain::new(),
        }
    }

    /// Attach a mutation observer, notified on every write (the
    /// `OnBegin`/`OnEnd`/`OnCancel`/`OnCount`/`OnStatus` interceptor chain).
    pub fn with_observer(mut self, observer: Arc<dyn MutationObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    fn stamp(&self, action: EventAction, payload: EventPayload) -> TemporalEvent {
        let (occurred_time, sequence_number) = self.sequencer.next();
        TemporalEvent {
            event_id: uuid::Uuid::new_v4(),
            action,
            occurred_time,
            sequence_number,
            payload,
        }
    }

    // -- reads: lock-free over the RwLock's read side -----------------------

    pub fn has_access_to_application_component(
        &self,
        user: &LeafId,
        component: &ApplicationComponent,
        level: &AccessLevel,
    ) -> bool {
        self.graph.read().has_access_to_application_component(user, component, level)
    }

    pub fn has_access_to_entity(
        &self,
        user: &LeafId,
        entity_type: &EntityType,
        entity: &Entity,
    ) -> Result<bool, AccessError> {
        self.graph.read().has_access_to_entity(user, entity_type, entity)
    }

    pub fn get_accessible_entities(
        &self,
        user: &LeafId,
        entity_type: &EntityType,
    ) -> Result<std::collections::BTreeSet<Entity>, AccessError> {
        self.graph.read().get_accessible_entities(user, entity_type)
    }

    pub fn get_application_components_accessible_by_user(
        &self,
        user: &LeafId,
    ) -> std::collections::BTreeSet<(ApplicationComponent, AccessLevel)> {
        self.graph.read().get_application_components_accessible_by_user(user)
    }

    pub fn get_application_components_accessible_by_group(
        &self,
        group: &NonLeafId,
    ) -> std::collections::BTreeSet<(ApplicationComponent, AccessLevel)> {
        self.graph.read().get_application_components_accessible_by_group(group)
    }

    pub fn get_accessible_entities_for_group(
        &self,
        group: &NonLeafId,
        entity_type: &EntityType,
    ) -> Result<std::collections::BTreeSet<Entity>, AccessError> {
        self.graph.read().get_accessible_entities_for_group(group, entity_type)
    }

    /// A cloned read-only snapshot, used by the persister buffer (G) to
    /// validate an event before it touches shared state.
    pub fn snapshot(&self) -> AccessManager {
        self.graph.read().clone()
    }

    /// Replay a durable event log into this manager, for startup
    /// rehydration before the service accepts any request. Does not advance
    /// the event sequencer; only future writes through `add_*`/`remove_*`
    /// assign sequence numbers.
    pub fn load_from_events(&self, events: &[TemporalEvent]) -> Result<(), AccessError> {
        let mut guard = self.graph.write();
        for event in events {
            crate::events::apply_event_to(&mut guard, event)?;
        }
        Ok(())
    }

    /// Whether `user` currently exists.
    pub fn has_user(&self, user: &LeafId) -> bool {
        self.graph.read().has_user(user)
    }

    /// Whether `group` currently exists.
    pub fn has_group(&self, group: &NonLeafId) -> bool {
        self.graph.read().has_group(group)
    }

    // -- writes: acquire named regions, then the write lock ------------------

    pub fn add_user(&self, user: LeafId) -> Result<TemporalEvent, AccessError> {
        let _g = self.regions.acquire(vec![LockSet::Users]);
        self.observers.observe("add_user", || {
            self.graph.write().add_user(user.clone())?;
            Ok(self.stamp(EventAction::Add, EventPayload::User { user }))
        })
    }

    pub fn remove_user(&self, user: LeafId) -> Result<TemporalEvent, AccessError> {
        let _g = self.regions.acquire(vec![LockSet::Users, LockSet::UserComponentAccess, LockSet::UserEntities]);
        self.observers.observe("remove_user", || {
            self.graph.write().remove_user(&user)?;
            Ok(self.stamp(EventAction::Remove, EventPayload::User { user }))
        })
    }

    pub fn add_group(&self, group: NonLeafId) -> Result<TemporalEvent, AccessError> {
        let _g = self.regions.acquire(vec![LockSet::Groups]);
        self.observers.observe("add_group", || {
            self.graph.write().add_group(group.clone())?;
            Ok(self.stamp(EventAction::Add, EventPayload::Group { group }))
        })
    }

    pub fn remove_group(&self, group: NonLeafId) -> Result<TemporalEvent, AccessError> {
        let _g = self
            .regions
            .acquire(vec![LockSet::Groups, LockSet::GroupComponentAccess, LockSet::GroupEntities]);
        self.observers.observe("remove_group", || {
            self.graph.write().remove_group(&group)?;
            Ok(self.stamp(EventAction::Remove, EventPayload::Group { group }))
        })
    }

    pub fn add_user_to_group_mapping(
        &self,
        user: LeafId,
        group: NonLeafId,
    ) -> Result<TemporalEvent, AccessError> {
        let _g = self.regions.acquire(vec![LockSet::Users, LockSet::Groups, LockSet::UserToGroupMappings]);
        self.observers.observe("add_user_to_group_mapping", || {
            self.graph.write().add_user_to_group_mapping(&user, &group)?;
            Ok(self.stamp(EventAction::Add, EventPayload::UserToGroup { user, group }))
        })
    }

    pub fn remove_user_to_group_mapping(
        &self,
        user: LeafId,
        group: NonLeafId,
    ) -> Result<TemporalEvent, AccessError> {
        let _g = self.regions.acquire(vec![LockSet::UserToGroupMappings]);
        self.observers.observe("remove_user_to_group_mapping", || {
            self.graph.write().remove_user_to_group_mapping(&user, &group)?;
            Ok(self.stamp(EventAction::Remove, EventPayload::UserToGroup { user, group }))
        })
    }

    pub fn add_group_to_group_mapping(
        &self,
        from: NonLeafId,
        to: NonLeafId,
    ) -> Result<TemporalEvent, AccessError> {
        let _g = self.regions.acquire(vec![LockSet::Groups, LockSet::GroupToGroupMappings]);
        self.observers.observe("add_group_to_group_mapping", || {
            self.graph.write().add_group_to_group_mapping(&from, &to)?;
            Ok(self.stamp(EventAction::Add, EventPayload::GroupToGroup { from, to }))
        })
    }

    pub fn remove_group_to_group_mapping(
        &self,
        from: NonLeafId,
        to: NonLeafId,
    ) -> Result<TemporalEvent, AccessError> {
        let _g = self.regions.acquire(vec![LockSet::GroupToGroupMappings]);
        self.observers.observe("remove_group_to_group_mapping", || {
            self.graph.write().remove_group_to_group_mapping(&from, &to)?;
            Ok(self.stamp(EventAction::Remove, EventPayload::GroupToGroup { from, to }))
        })
    }

    pub fn add_user_component_access(
        &self,
        user: LeafId,
        component: ApplicationComponent,
        level: AccessLevel,
    ) -> Result<TemporalEvent, AccessError> {
        let _g = self.regions.acquire(vec![LockSet::Users, LockSet::UserComponentAccess]);
        self.observers.observe("add_user_component_access", || {
            self.graph
                .write()
                .add_user_component_access(&user, component.clone(), level.clone())?;
            Ok(self.stamp(EventAction::Add, EventPayload::UserComponentAccess { user, component, level }))
        })
    }

    pub fn remove_user_component_access(
        &self,
        user: LeafId,
        component: ApplicationComponent,
        level: AccessLevel,
    ) -> Result<TemporalEvent, AccessError> {
        let _g = self.regions.acquire(vec![LockSet::UserComponentAccess]);
        self.observers.observe("remove_user_component_access", || {
            self.graph
                .write()
                .remove_user_component_access(&user, &component, &level)?;
            Ok(self.stamp(EventAction::Remove, EventPayload::UserComponentAccess { user, component, level }))
        })
    }

    pub fn add_group_component_access(
        &self,
        group: NonLeafId,
        component: ApplicationComponent,
        level: AccessLevel,
    ) -> Result<TemporalEvent, AccessError> {
        let _g = self.regions.acquire(vec![LockSet::Groups, LockSet::GroupComponentAccess]);
        self.observers.observe("add_group_component_access", || {
            self.graph
                .write()
                .add_group_component_access(&group, component.clone(), level.clone())?;
            Ok(self.stamp(EventAction::Add, EventPayload::GroupComponentAccess { group, component, level }))
        })
    }

    pub fn remove_group_component_access(
        &self,
        group: NonLeafId,
        component: ApplicationComponent,
        level: AccessLevel,
    ) -> Result<TemporalEvent, AccessError> {
        let _g = self.regions.acquire(vec![LockSet::GroupComponentAccess]);
        self.observers.observe("remove_group_component_access", || {
            self.graph
                .write()
                .remove_group_component_access(&group, &component, &level)?;
            Ok(self.stamp(EventAction::Remove, EventPayload::GroupComponentAccess { group, component, level }))
        })
    }

    pub fn add_entity_type(&self, entity_type: EntityType) -> Result<TemporalEvent, AccessError> {
        let _g = self.regions.acquire(vec![LockSet::EntityTypes]);
        self.observers.observe("add_entity_type", || {
            self.graph.write().add_entity_type(entity_type.clone())?;
            Ok(self.stamp(EventAction::Add, EventPayload::EntityType { entity_type }))
        })
    }

    pub fn remove_entity_type(&self, entity_type: EntityType) -> Result<TemporalEvent, AccessError> {
        let _g = self.regions.acquire(vec![
            LockSet::EntityTypes,
            LockSet::Entities,
            LockSet::UserEntities,
            LockSet::GroupEntities,
        ]);
        self.observers.observe("remove_entity_type", || {
            self.graph.write().remove_entity_type(&entity_type)?;
            Ok(self.stamp(EventAction::Remove, EventPayload::EntityType { entity_type }))
        })
    }

    pub fn add_entity(&self, entity_type: EntityType, entity: Entity) -> Result<TemporalEvent, AccessError> {
        let _g = self.regions.acquire(vec![LockSet::EntityTypes, LockSet::Entities]);
        self.observers.observe("add_entity", || {
            self.graph.write().add_entity(&entity_type, entity.clone())?;
            Ok(self.stamp(EventAction::Add, EventPayload::Entity { entity_type, entity }))
        })
    }

    pub fn remove_entity(&self, entity_type: EntityType, entity: Entity) -> Result<TemporalEvent, AccessError> {
        let _g = self.regions.acquire(vec![LockSet::Entities, LockSet::UserEntities, LockSet::GroupEntities]);
        self.observers.observe("remove_entity", || {
            self.graph.write().remove_entity(&entity_type, &entity)?;
            Ok(self.stamp(EventAction::Remove, EventPayload::Entity { entity_type, entity }))
        })
    }

    pub fn add_user_to_entity_mapping(
        &self,
        user: LeafId,
        entity_type: EntityType,
        entity: Entity,
    ) -> Result<TemporalEvent, AccessError> {
        let _g = self.regions.acquire(vec![LockSet::Users, LockSet::Entities, LockSet::UserEntities]);
        self.observers.observe("add_user_to_entity_mapping", || {
            self.graph
                .write()
                .add_user_to_entity_mapping(&user, &entity_type, &entity)?;
            Ok(self.stamp(EventAction::Add, EventPayload::UserToEntity { user, entity_type, entity }))
        })
    }

    pub fn remove_user_to_entity_mapping(
        &self,
        user: LeafId,
        entity_type: EntityType,
        entity: Entity,
    ) -> Result<TemporalEvent, AccessError> {
        let _g = self.regions.acquire(vec![LockSet::UserEntities]);
        self.observers.observe("remove_user_to_entity_mapping", || {
            self.graph
                .write()
                .remove_user_to_entity_mapping(&user, &entity_type, &entity)?;
            Ok(self.stamp(EventAction::Remove, EventPayload::UserToEntity { user, entity_type, entity }))
        })
    }

    pub fn add_group_to_entity_mapping(
        &self,
        group: NonLeafId,
        entity_type: EntityType,
        entity: Entity,
    ) -> Result<TemporalEvent, AccessError> {
        let _g = self.regions.acquire(vec![LockSet::Groups, LockSet::Entities, LockSet::GroupEntities]);
        self.observers.observe("add_group_to_entity_mapping", || {
            self.graph
                .write()
                .add_group_to_entity_mapping(&group, &entity_type, &entity)?;
            Ok(self.stamp(EventAction::Add, EventPayload::GroupToEntity { group, entity_type, entity }))
        })
    }

    pub fn remove_group_to_entity_mapping(
        &self,
        group: NonLeafId,
        entity_type: EntityType,
        entity: Entity,
    ) -> Result<TemporalEvent, AccessError> {
        let _g = self.regions.acquire(vec![LockSet::GroupEntities]);
        self.observers.observe("remove_group_to_entity_mapping", || {
            self.graph
                .write()
                .remove_group_to_entity_mapping(&group, &entity_type, &entity)?;
            Ok(self.stamp(EventAction::Remove, EventPayload::GroupToEntity { group, entity_type, entity }))
        })
    }

    /// Dispatch an externally-submitted `(action, payload)` pair to the
    /// matching add/remove method, for callers (the HTTP event endpoint)
    /// that receive events as data rather than calling typed methods.
    pub fn apply(&self, action: EventAction, payload: EventPayload) -> Result<TemporalEvent, AccessError> {
        match (action, payload) {
            (EventAction::Add, EventPayload::User { user }) => self.add_user(user),
            (EventAction::Remove, EventPayload::User { user }) => self.remove_user(user),
            (EventAction::Add, EventPayload::Group { group }) => self.add_group(group),
            (EventAction::Remove, EventPayload::Group { group }) => self.remove_group(group),
            (EventAction::Add, EventPayload::UserToGroup { user, group }) => {
                self.add_user_to_group_mapping(user, group)
            }
            (EventAction::Remove, EventPayload::UserToGroup { user, group }) => {
                self.remove_user_to_group_mapping(user, group)
            }
            (EventAction::Add, EventPayload::GroupToGroup { from, to }) => {
                self.add_group_to_group_mapping(from, to)
            }
            (EventAction::Remove, EventPayload::GroupToGroup { from, to }) => {
                self.remove_group_to_group_mapping(from, to)
            }
            (EventAction::Add, EventPayload::UserComponentAccess { user, component, level }) => {
                self.add_user_component_access(user, component, level)
            }
            (EventAction::Remove, EventPayload::UserComponentAccess { user, component, level }) => {
                self.remove_user_component_access(user, component, level)
            }
            (EventAction::Add, EventPayload::GroupComponentAccess { group, component, level }) => {
                self.add_group_component_access(group, component, level)
            }
            (EventAction::Remove, EventPayload::GroupComponentAccess { group, component, level }) => {
                self.remove_group_component_access(group, component, level)
            }
            (EventAction::Add, EventPayload::EntityType { entity_type }) => self.add_entity_type(entity_type),
            (EventAction::Remove, EventPayload::EntityType { entity_type }) => self.remove_entity_type(entity_type),
            (EventAction::Add, EventPayload::Entity { entity_type, entity }) => {
                self.add_entity(entity_type, entity)
            }
            (EventAction::Remove, EventPayload::Entity { entity_type, entity }) => {
                self.remove_entity(entity_type, entity)
            }
            (EventAction::Add, EventPayload::UserToEntity { user, entity_type, entity }) => {
                self.add_user_to_entity_mapping(user, entity_type, entity)
            }
            (EventAction::Remove, EventPayload::UserToEntity { user, entity_type, entity }) => {
                self.remove_user_to_entity_mapping(user, entity_type, entity)
            }
            (EventAction::Add, EventPayload::GroupToEntity { group, entity_type, entity }) => {
                self.add_group_to_entity_mapping(group, entity_type, entity)
            }
            (EventAction::Remove, EventPayload::GroupToEntity { group, entity_type, entity }) => {
                self.remove_group_to_entity_mapping(group, entity_type, entity)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_and_query_through_lock_layer() {
        let cam = ConcurrentAccessManager::new();
        cam.add_user(LeafId::from("alice")).unwrap();
        cam.add_group(NonLeafId::from("admins")).unwrap();
        cam.add_user_to_group_mapping(LeafId::from("alice"), NonLeafId::from("admins"))
            .unwrap();
        cam.add_group_component_access(
            NonLeafId::from("admins"),
            "Settings".into(),
            "Write".into(),
        )
        .unwrap();

        assert!(cam.has_access_to_application_component(
            &LeafId::from("alice"),
            &"Settings".into(),
            &"Write".into()
        ));
    }

    #[test]
    fn stamped_events_carry_strictly_increasing_sequence_numbers() {
        let cam = ConcurrentAccessManager::new();
        let e1 = cam.add_user(LeafId::from("u1")).unwrap();
        let e2 = cam.add_user(LeafId::from("u2")).unwrap();
        assert!(e2.sequence_number > e1.sequence_number);
    }

    #[test]
    fn concurrent_reads_do_not_block_each_other() {
        use std::sync::Arc;
        let cam = Arc::new(ConcurrentAccessManager::new());
        cam.add_user(LeafId::from("u1")).unwrap();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cam = Arc::clone(&cam);
                std::thread::spawn(move || {
                    cam.get_application_components_accessible_by_user(&LeafId::from("u1"))
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
    }
}
