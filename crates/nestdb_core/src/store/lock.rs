//! Collection-level lock table.

use crate::error::{CoreError, CoreResult};
use crate::store::LockOwner;
use crate::transaction::AccessType;
use crate::types::CollectionId;
use parking_lot::{Condvar, Mutex};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::trace;

#[derive(Debug, Clone, Copy)]
struct Claim {
    owner: LockOwner,
    access: AccessType,
}

/// Tracks which units hold which claims on which collections.
///
/// Claims of the same transaction context never conflict with each other;
/// between different contexts the [`AccessType::is_compatible_with`]
/// matrix applies. Waiters are woken whenever a claim is released.
#[derive(Debug, Default)]
pub struct LockTable {
    claims: Mutex<HashMap<CollectionId, Vec<Claim>>>,
    released: Condvar,
}

impl LockTable {
    /// Creates an empty lock table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquires a claim, or upgrades the claim `owner` already holds.
    ///
    /// # Errors
    ///
    /// Returns `LockFailed` if a conflicting claim is still held by another
    /// transaction after `timeout`.
    pub fn acquire(
        &self,
        collection: CollectionId,
        owner: LockOwner,
        access: AccessType,
        timeout: Duration,
    ) -> CoreResult<()> {
        let deadline = Instant::now() + timeout;
        let mut claims = self.claims.lock();

        loop {
            let held = claims.entry(collection).or_default();
            let conflict = held
                .iter()
                .find(|c| c.owner.context != owner.context && !c.access.is_compatible_with(access))
                .copied();

            match conflict {
                None => {
                    match held.iter_mut().find(|c| c.owner == owner) {
                        Some(existing) => existing.access = existing.access.max(access),
                        None => held.push(Claim { owner, access }),
                    }
                    trace!(%collection, unit = %owner.unit, %access, "lock granted");
                    return Ok(());
                }
                Some(blocker) => {
                    let timed_out =
                        timeout.is_zero() || self.released.wait_until(&mut claims, deadline).timed_out();
                    if timed_out && Instant::now() >= deadline {
                        trace!(%collection, unit = %owner.unit, %access, "lock wait timed out");
                        return Err(CoreError::LockFailed {
                            collection,
                            access,
                            reason: format!(
                                "{} held by {} ({})",
                                blocker.access, blocker.owner.context, blocker.owner.unit
                            ),
                        });
                    }
                }
            }
        }
    }

    /// Releases the claim `owner` holds on `collection`.
    pub fn release(&self, collection: CollectionId, owner: LockOwner) {
        let mut claims = self.claims.lock();
        if let Some(held) = claims.get_mut(&collection) {
            held.retain(|c| c.owner != owner);
            if held.is_empty() {
                claims.remove(&collection);
            }
            trace!(%collection, unit = %owner.unit, "lock released");
        }
        drop(claims);
        self.released.notify_all();
    }

    /// Returns the claims currently held on a collection.
    #[must_use]
    pub fn holders(&self, collection: CollectionId) -> Vec<(LockOwner, AccessType)> {
        self.claims
            .lock()
            .get(&collection)
            .map(|held| held.iter().map(|c| (c.owner, c.access)).collect())
            .unwrap_or_default()
    }

    /// Returns the number of collections with at least one claim.
    #[must_use]
    pub fn locked_count(&self) -> usize {
        self.claims.lock().len()
    }
}
