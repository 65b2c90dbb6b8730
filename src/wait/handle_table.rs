/*!
 * Handle Table
 *
 * Arena mapping opaque integer handles to objects. Handles are `index + 1`
 * into a dense slot vector that grows in power-of-two steps.
 *
 * # Delayed Reuse
 *
 * Freed indices go to a FIFO free list and are only handed out again once
 * the list holds at least `HANDLE_REUSE_THRESHOLD` entries. A stale handle
 * therefore keeps failing with `InvalidHandle` for a long while instead of
 * silently aliasing a freshly created object.
 *
 * # Locking
 *
 * The table takes no lock of its own. The owner keeps it behind whatever
 * lock makes "create object + register handle" one critical section.
 */

use crate::core::limits::{HANDLE_REUSE_THRESHOLD, HANDLE_TABLE_INITIAL_CAPACITY};
use crate::core::{Handle, SyncError, SyncResult};
use std::collections::VecDeque;
use tracing::warn;

/// Teardown hook run when an entry's handle is deleted
pub trait TableEntry {
    fn on_delete(&mut self) {}
}

/// Growable handle-indexed arena
pub struct HandleTable<T> {
    slots: Vec<Option<T>>,
    free: VecDeque<usize>,
    live: usize,
}

impl<T: TableEntry> HandleTable<T> {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: VecDeque::new(),
            live: 0,
        }
    }

    /// Store `obj` and return its new handle
    ///
    /// Fails with `ResourceExhausted` if the slot vector cannot grow.
    pub fn new_handle(&mut self, obj: T) -> SyncResult<Handle> {
        if self.free.len() >= HANDLE_REUSE_THRESHOLD {
            if let Some(index) = self.free.pop_front() {
                debug_assert!(self.slots[index].is_none());
                self.slots[index] = Some(obj);
                self.live += 1;
                // Index came from a previously issued handle
                return Handle::from_index(index)
                    .ok_or_else(|| SyncError::ResourceExhausted("handle space".into()));
            }
        }

        let index = self.slots.len();
        let handle = Handle::from_index(index).ok_or_else(|| {
            SyncError::ResourceExhausted(format!("handle index {} out of range", index))
        })?;

        if self.slots.len() == self.slots.capacity() {
            let target = (self.slots.capacity() * 2)
                .max(HANDLE_TABLE_INITIAL_CAPACITY)
                .next_power_of_two();
            self.slots
                .try_reserve_exact(target - self.slots.len())
                .map_err(|e| SyncError::ResourceExhausted(format!("handle table growth: {}", e)))?;
        }

        self.slots.push(Some(obj));
        self.live += 1;
        Ok(handle)
    }

    /// Look up a live handle
    #[inline]
    pub fn get(&self, handle: Handle) -> SyncResult<&T> {
        handle
            .index()
            .and_then(|i| self.slots.get(i))
            .and_then(Option::as_ref)
            .ok_or(SyncError::InvalidHandle(handle.raw()))
    }

    /// Look up a live handle for mutation
    #[inline]
    pub fn get_mut(&mut self, handle: Handle) -> SyncResult<&mut T> {
        handle
            .index()
            .and_then(|i| self.slots.get_mut(i))
            .and_then(Option::as_mut)
            .ok_or(SyncError::InvalidHandle(handle.raw()))
    }

    #[inline]
    pub fn contains(&self, handle: Handle) -> bool {
        self.get(handle).is_ok()
    }

    /// Run the entry's teardown hook, clear the slot, and queue the index
    pub fn delete_handle(&mut self, handle: Handle) -> SyncResult<T> {
        let index = handle
            .index()
            .filter(|&i| matches!(self.slots.get(i), Some(Some(_))))
            .ok_or(SyncError::InvalidHandle(handle.raw()))?;

        let mut obj = self.slots[index]
            .take()
            .ok_or(SyncError::InvalidHandle(handle.raw()))?;
        obj.on_delete();
        self.live -= 1;

        // Losing an index only costs a slot; never fail the delete over it
        if self.free.try_reserve(1).is_ok() {
            self.free.push_back(index);
        } else {
            warn!(handle = %handle, "free list allocation failed; index retired");
        }

        Ok(obj)
    }

    /// Number of live handles
    #[inline]
    pub fn len(&self) -> usize {
        self.live
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    /// Indices waiting on the free list
    #[inline]
    pub fn free_len(&self) -> usize {
        self.free.len()
    }

    /// Allocated slot capacity
    #[inline]
    pub fn capacity(&self) -> usize {
        self.slots.capacity()
    }
}

impl<T: TableEntry> Default for HandleTable<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    struct Entry {
        value: u32,
        deleted: bool,
    }

    impl Entry {
        fn new(value: u32) -> Self {
            Self {
                value,
                deleted: false,
            }
        }
    }

    impl TableEntry for Entry {
        fn on_delete(&mut self) {
            self.deleted = true;
        }
    }

    #[test]
    fn test_handles_start_at_one() {
        let mut table = HandleTable::new();
        let h = table.new_handle(Entry::new(7)).unwrap();
        assert_eq!(h.raw(), 1);
        assert_eq!(table.get(h).unwrap().value, 7);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_reserved_values_are_invalid() {
        let table: HandleTable<Entry> = HandleTable::new();
        assert!(table.get(Handle::INVALID).unwrap_err().is_invalid_handle());
        assert!(table.get(Handle::from_raw(u32::MAX)).is_err());
        assert!(table.get(Handle::from_raw(42)).is_err());
    }

    #[test]
    fn test_delete_runs_teardown_and_invalidates() {
        let mut table = HandleTable::new();
        let h = table.new_handle(Entry::new(1)).unwrap();

        let removed = table.delete_handle(h).unwrap();
        assert!(removed.deleted);
        assert_eq!(table.get(h).unwrap_err(), SyncError::InvalidHandle(h.raw()));
        assert_eq!(table.delete_handle(h).unwrap_err(), SyncError::InvalidHandle(h.raw()));
        assert!(table.is_empty());
    }

    #[test]
    fn test_reuse_is_delayed_until_threshold() {
        let mut table = HandleTable::new();
        let first = table.new_handle(Entry::new(0)).unwrap();
        table.delete_handle(first).unwrap();

        // Below the threshold a fresh index is used
        let second = table.new_handle(Entry::new(1)).unwrap();
        assert_ne!(second, first);
        assert!(table.get(first).is_err());

        let mut handles = Vec::new();
        for i in 0..HANDLE_REUSE_THRESHOLD as u32 {
            handles.push(table.new_handle(Entry::new(i)).unwrap());
        }
        for h in handles {
            table.delete_handle(h).unwrap();
        }
        assert!(table.free_len() >= HANDLE_REUSE_THRESHOLD);

        // Oldest freed index comes back first
        let reused = table.new_handle(Entry::new(99)).unwrap();
        assert_eq!(reused, first);
    }

    #[test]
    fn test_capacity_grows_in_powers_of_two() {
        let mut table = HandleTable::new();
        for i in 0..(HANDLE_TABLE_INITIAL_CAPACITY as u32 + 1) {
            table.new_handle(Entry::new(i)).unwrap();
        }
        assert!(table.capacity().is_power_of_two());
        assert!(table.capacity() >= HANDLE_TABLE_INITIAL_CAPACITY * 2);
    }
}
