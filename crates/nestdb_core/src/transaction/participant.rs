//! Collection participants.

use crate::store::CollectionHandle;
use crate::transaction::{AccessType, CollectionKind};
use crate::types::{CollectionId, WorkUnitId};

/// One collection's registration within a work unit.
///
/// Participants are value types: they reference the physical collection
/// through a shared [`CollectionHandle`] and never own it. The only field
/// that changes after registration is the granted access, and it only ever
/// grows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionParticipant {
    handle: CollectionHandle,
    access: AccessType,
    unit: WorkUnitId,
    asserted_kind: Option<CollectionKind>,
    must_exist: bool,
    allow_creation: bool,
}

impl CollectionParticipant {
    pub(crate) fn new(
        handle: CollectionHandle,
        access: AccessType,
        unit: WorkUnitId,
        asserted_kind: Option<CollectionKind>,
        allow_creation: bool,
    ) -> Self {
        Self {
            handle,
            access,
            unit,
            asserted_kind,
            must_exist: !allow_creation,
            allow_creation,
        }
    }

    /// Returns the collection ID.
    #[must_use]
    pub fn id(&self) -> CollectionId {
        self.handle.id()
    }

    /// Returns the collection name.
    #[must_use]
    pub fn name(&self) -> &str {
        self.handle.name()
    }

    /// Returns the physical collection handle.
    #[must_use]
    pub fn handle(&self) -> &CollectionHandle {
        &self.handle
    }

    /// Returns the granted access type.
    #[must_use]
    pub fn access(&self) -> AccessType {
        self.access
    }

    /// Returns the kind of the physical collection.
    #[must_use]
    pub fn kind(&self) -> CollectionKind {
        self.handle.kind()
    }

    /// Returns the kind asserted at registration, if any.
    #[must_use]
    pub fn asserted_kind(&self) -> Option<CollectionKind> {
        self.asserted_kind
    }

    /// Returns the unit this participant belongs to.
    #[must_use]
    pub fn unit(&self) -> WorkUnitId {
        self.unit
    }

    /// Whether the collection had to exist at registration.
    #[must_use]
    pub fn must_exist(&self) -> bool {
        self.must_exist
    }

    /// Whether the collection could have been created at registration.
    #[must_use]
    pub fn allow_creation(&self) -> bool {
        self.allow_creation
    }

    /// Whether the granted access permits document writes.
    #[must_use]
    pub fn can_write(&self) -> bool {
        self.access.is_write_capable()
    }

    /// Raises the granted access to at least `access`. Returns whether the
    /// grant changed.
    pub(crate) fn escalate(&mut self, access: AccessType) -> bool {
        if self.access.covers(access) {
            return false;
        }
        self.access = access;
        true
    }

    pub(crate) fn refresh(&mut self, handle: CollectionHandle) {
        self.handle = handle;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn participant(access: AccessType) -> CollectionParticipant {
        let handle = CollectionHandle::new(CollectionId::new(1), "docs", CollectionKind::Document);
        CollectionParticipant::new(handle, access, WorkUnitId::new(1), None, true)
    }

    #[test]
    fn escalation_only_grows() {
        let mut p = participant(AccessType::Read);
        assert!(p.escalate(AccessType::Write));
        assert_eq!(p.access(), AccessType::Write);

        assert!(!p.escalate(AccessType::Read));
        assert_eq!(p.access(), AccessType::Write);

        assert!(p.escalate(AccessType::Exclusive));
        assert!(p.can_write());
    }

    #[test]
    fn creation_flags_are_complementary() {
        let p = participant(AccessType::Read);
        assert!(p.allow_creation());
        assert!(!p.must_exist());
        assert!(!p.can_write());
    }
}
