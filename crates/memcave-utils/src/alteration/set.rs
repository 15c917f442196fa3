use std::{fmt, hash::Hash};

use indexmap::IndexMap;
use memcave_core::ProcessDriver;

use super::MemoryAlteration;
use crate::injector::{Identifier, Injector};

/// Identifies an alteration inside [`AlterationSets`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AlterationHandle(u64);

/// Named groups of alterations that are toggled together.
///
/// Sets keep their members in insertion order and are created on first
/// use. A set disappears once its last member is removed.
pub struct AlterationSets<S> {
    sets: IndexMap<S, Vec<(AlterationHandle, MemoryAlteration)>>,
    next_handle: u64,
}

impl<S> Default for AlterationSets<S>
where
    S: Eq + Hash + fmt::Debug,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<S> AlterationSets<S>
where
    S: Eq + Hash + fmt::Debug,
{
    /// Creates an empty collection.
    pub fn new() -> Self {
        Self {
            sets: IndexMap::new(),
            next_handle: 0,
        }
    }

    /// Adds an alteration to a set.
    pub fn add(&mut self, set: S, alteration: MemoryAlteration) -> AlterationHandle {
        let handle = AlterationHandle(self.next_handle);
        self.next_handle += 1;

        self.sets.entry(set).or_default().push((handle, alteration));
        handle
    }

    /// Removes an alteration from a set.
    ///
    /// The alteration is returned as is; it is not disabled.
    pub fn remove(&mut self, set: &S, handle: AlterationHandle) -> Option<MemoryAlteration> {
        let members = self.sets.get_mut(set)?;
        let index = members.iter().position(|(h, _)| *h == handle)?;
        let (_, alteration) = members.remove(index);

        if members.is_empty() {
            self.sets.shift_remove(set);
        }

        Some(alteration)
    }

    /// Checks whether a set has any member.
    pub fn contains(&self, set: &S) -> bool {
        self.sets.contains_key(set)
    }

    /// Returns the names of all sets, in creation order.
    pub fn sets(&self) -> impl Iterator<Item = &S> {
        self.sets.keys()
    }

    /// Returns the members of a set, in insertion order.
    pub fn alterations(&self, set: &S) -> impl Iterator<Item = &MemoryAlteration> {
        self.sets
            .get(set)
            .into_iter()
            .flatten()
            .map(|(_, alteration)| alteration)
    }

    /// Enables or disables every member of a set, in insertion order.
    ///
    /// A failing member does not stop the others. Returns `true` only if
    /// every member succeeded; a set with no members succeeds.
    pub fn set_enabled<Driver, C, V>(
        &self,
        set: &S,
        injector: &Injector<Driver, C, V>,
        enabled: bool,
    ) -> bool
    where
        Driver: ProcessDriver,
        C: Identifier,
        V: Identifier,
    {
        let members = match self.sets.get(set) {
            Some(members) => members,
            None => {
                tracing::warn!(?set, "alteration set is empty");
                return true;
            }
        };

        let mut success = true;
        for (handle, alteration) in members {
            if let Err(err) = alteration.set_enabled(injector, enabled) {
                tracing::error!(
                    ?set,
                    ?handle,
                    address = %alteration.address(),
                    enabled,
                    %err,
                    "failed to toggle alteration"
                );
                success = false;
            }
        }

        success
    }
}
