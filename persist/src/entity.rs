/// A lightweight handle to an entity living in a [`World`](crate::World).
///
/// Layout: `u32 index` + `u64 spawn_tick`.
///
/// - **index**: slot in the entity allocator
/// - **spawn_tick**: allocation counter value when the slot was handed out.
///   A recycled slot gets a new tick, so stale handles never alias a new
///   entity.
///
/// Handles are session-local. They are never written to a persisted
/// document; references between entities are persisted through
/// [`CompositeId`](crate::CompositeId) instead.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Entity {
    index: u32,
    spawn_tick: u64,
}

impl Entity {
    pub(crate) fn new(index: u32, spawn_tick: u64) -> Self {
        Self { index, spawn_tick }
    }

    /// Returns the slot index of this entity.
    pub fn index(&self) -> u32 {
        self.index
    }

    /// Returns the spawn tick of this entity.
    pub fn spawn_tick(&self) -> u64 {
        self.spawn_tick
    }
}

impl std::fmt::Debug for Entity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Entity({}@{})", self.index, self.spawn_tick)
    }
}

impl std::fmt::Display for Entity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Entity({}@{})", self.index, self.spawn_tick)
    }
}

/// Allocates and recycles entity slots with spawn-tick tracking.
///
/// When an entity is freed its slot goes onto a LIFO free list. The next
/// allocation reuses the slot with a fresh tick, invalidating old handles.
pub(crate) struct EntityAllocator {
    spawn_ticks: Vec<u64>,
    alive: Vec<bool>,
    free_list: Vec<u32>,
    count: u32,
    next_tick: u64,
}

impl EntityAllocator {
    pub fn new() -> Self {
        Self {
            spawn_ticks: Vec::new(),
            alive: Vec::new(),
            free_list: Vec::new(),
            count: 0,
            next_tick: 1,
        }
    }

    /// Allocates a new entity, reusing a recycled slot if available.
    pub fn allocate(&mut self) -> Entity {
        let tick = self.next_tick;
        self.next_tick += 1;
        self.count += 1;

        if let Some(index) = self.free_list.pop() {
            let idx = index as usize;
            self.alive[idx] = true;
            self.spawn_ticks[idx] = tick;
            Entity::new(index, tick)
        } else {
            let index = self.spawn_ticks.len() as u32;
            self.spawn_ticks.push(tick);
            self.alive.push(true);
            Entity::new(index, tick)
        }
    }

    /// Frees an entity slot. Returns `false` if the handle is already dead.
    pub fn deallocate(&mut self, entity: Entity) -> bool {
        if !self.is_alive(entity) {
            return false;
        }
        self.alive[entity.index() as usize] = false;
        self.free_list.push(entity.index());
        self.count -= 1;
        true
    }

    pub fn is_alive(&self, entity: Entity) -> bool {
        let idx = entity.index() as usize;
        idx < self.alive.len() && self.alive[idx] && self.spawn_ticks[idx] == entity.spawn_tick()
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    /// Iterates over all alive entities in slot order.
    pub fn iter_alive(&self) -> impl Iterator<Item = Entity> + '_ {
        self.alive
            .iter()
            .enumerate()
            .filter(|(_, alive)| **alive)
            .map(|(idx, _)| Entity::new(idx as u32, self.spawn_ticks[idx]))
    }
}

impl Default for EntityAllocator {
    fn default() -> Self {
        Self::new()
    }
}
