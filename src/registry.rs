//! Id-keyed entity arenas.
//!
//! A registry is an arena with a monotonically increasing index: slots are
//! appended, ids map one-to-one onto slot indices, and a removed entity
//! leaves a permanently empty slot so its id can never alias a later entity.

/// Implemented by the opaque id newtypes that key a registry.
pub trait EntityId: Copy {
    fn from_index(index: usize) -> Self;
    fn index(self) -> usize;
}

macro_rules! impl_entity_id {
    ($($name:ident),*) => {
        $(impl EntityId for crate::types::$name {
            fn from_index(index: usize) -> Self {
                crate::types::$name::from_index(index)
            }
            fn index(self) -> usize {
                crate::types::$name::index(self)
            }
        })*
    };
}

impl_entity_id!(WalletId, TransactionId, BlockId, ListenerId);

/// Growable id-to-slot table. Ids are assigned at creation and never reused.
#[derive(Debug)]
pub struct Registry<I: EntityId, T> {
    slots: Vec<Option<T>>,
    _id: std::marker::PhantomData<I>,
}

impl<I: EntityId, T> Registry<I, T> {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            _id: std::marker::PhantomData,
        }
    }

    /// Insert an entity, returning its freshly assigned id.
    pub fn insert(&mut self, value: T) -> I {
        let id = I::from_index(self.slots.len());
        self.slots.push(Some(value));
        id
    }

    /// Reserve an id without materializing the entity yet. The slot reads as
    /// absent until [`fill`](Self::fill) runs on the mutation path.
    pub fn reserve(&mut self) -> I {
        let id = I::from_index(self.slots.len());
        self.slots.push(None);
        id
    }

    /// Materialize a previously reserved slot. Returns false when the id was
    /// never reserved here.
    pub fn fill(&mut self, id: I, value: T) -> bool {
        match self.slots.get_mut(id.index()) {
            Some(slot @ None) => {
                *slot = Some(value);
                true
            }
            _ => false,
        }
    }

    /// Look up an entity. A miss is a distinct outcome, never an alias.
    pub fn get(&self, id: I) -> Option<&T> {
        self.slots.get(id.index()).and_then(Option::as_ref)
    }

    pub fn get_mut(&mut self, id: I) -> Option<&mut T> {
        self.slots.get_mut(id.index()).and_then(Option::as_mut)
    }

    /// Remove an entity. The slot stays allocated; the id is never reused.
    pub fn remove(&mut self, id: I) -> Option<T> {
        self.slots.get_mut(id.index()).and_then(Option::take)
    }

    pub fn contains(&self, id: I) -> bool {
        self.get(id).is_some()
    }

    /// Whether `id` was ever handed out here, reserved or filled. A reserved
    /// id is a valid operation target before its slot materializes.
    pub fn is_assigned(&self, id: I) -> bool {
        id.index() < self.slots.len()
    }

    /// Iterate live entities in id order.
    pub fn iter(&self) -> impl Iterator<Item = (I, &T)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(index, slot)| slot.as_ref().map(|value| (I::from_index(index), value)))
    }

    /// Number of live entities.
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total ids ever assigned, including removed and reserved ones.
    pub fn assigned(&self) -> usize {
        self.slots.len()
    }
}

impl<I: EntityId, T> Default for Registry<I, T> {
    fn default() -> Self {
        Self::new()
    }
}
