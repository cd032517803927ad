use std::any::TypeId;
use std::collections::HashMap;
use std::sync::Arc;

use once_cell::sync::OnceCell;
use parking_lot::RwLock;

use crate::{MappingError, TypeDescriptor};

/// What a descriptor was built for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Purpose {
    Entity,
    Embedded,
}

/// Cache key: exact type identity, generic arguments and purpose.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DescriptorKey {
    pub(crate) type_id: TypeId,
    pub(crate) arguments: Vec<TypeId>,
    pub(crate) purpose: Purpose,
}

impl DescriptorKey {
    pub fn new(type_id: TypeId, arguments: Vec<TypeId>, purpose: Purpose) -> Self {
        Self {
            type_id,
            arguments,
            purpose,
        }
    }
}

type Slot = Arc<OnceCell<Arc<TypeDescriptor>>>;

/// Get-or-populate cache of type descriptors.
///
/// Each key is populated at most once. Concurrent callers asking for the same
/// key block until the first caller finishes; a failed build leaves the slot
/// empty so no partially built descriptor is ever visible.
#[derive(Default)]
pub struct DescriptorCache {
    slots: RwLock<HashMap<DescriptorKey, Slot>>,
}

impl DescriptorCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &DescriptorKey) -> Option<Arc<TypeDescriptor>> {
        self.slots
            .read()
            .get(key)
            .and_then(|slot| slot.get().cloned())
    }

    pub(crate) fn get_or_try_init<F>(
        &self,
        key: DescriptorKey,
        build: F,
    ) -> Result<Arc<TypeDescriptor>, MappingError>
    where
        F: FnOnce() -> Result<TypeDescriptor, MappingError>,
    {
        let slot = self.slot(key);
        slot.get_or_try_init(|| build().map(Arc::new)).cloned()
    }

    fn slot(&self, key: DescriptorKey) -> Slot {
        if let Some(slot) = self.slots.read().get(&key) {
            return slot.clone();
        }
        self.slots.write().entry(key).or_default().clone()
    }

    /// Number of populated descriptors.
    pub fn len(&self) -> usize {
        self.slots
            .read()
            .values()
            .filter(|slot| slot.get().is_some())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::fixtures::{Address, Contact};
    use crate::Introspector;

    #[test]
    fn test_descriptor_built_once_per_key() {
        let introspector = Introspector::default();
        let first = introspector.introspect::<Contact>().unwrap();
        let second = introspector.introspect::<Contact>().unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        // Contact plus the embedded Address, shared by both sites.
        assert_eq!(introspector.cache().len(), 2);

        let key = DescriptorKey::new(TypeId::of::<Address>(), Vec::new(), Purpose::Embedded);
        let address = introspector.cache().get(&key).unwrap();
        assert!(Arc::ptr_eq(&address, first.embedded()[0].type_descriptor()));
        assert!(Arc::ptr_eq(&address, first.embedded()[1].type_descriptor()));
    }

    #[test]
    fn test_failed_build_leaves_slot_empty() {
        let cache = DescriptorCache::new();
        let key = DescriptorKey::new(TypeId::of::<Contact>(), Vec::new(), Purpose::Entity);

        let result = cache.get_or_try_init(key.clone(), || {
            Err(MappingError::BlankKind { type_name: "Contact" })
        });

        assert!(matches!(result, Err(MappingError::BlankKind { .. })));
        assert!(cache.get(&key).is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_purpose_separates_entries() {
        let entity = DescriptorKey::new(TypeId::of::<Contact>(), Vec::new(), Purpose::Entity);
        let embedded = DescriptorKey::new(TypeId::of::<Contact>(), Vec::new(), Purpose::Embedded);
        let parameterized = DescriptorKey::new(
            TypeId::of::<Contact>(),
            vec![TypeId::of::<i64>()],
            Purpose::Entity,
        );

        assert_ne!(entity, embedded);
        assert_ne!(entity, parameterized);
    }
}
