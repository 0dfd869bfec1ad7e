use alloc::vec::Vec;

use crate::error::Error;

use super::handle::Handle;

/// The node store: a slot vector with a free list.
///
/// This is the tree's allocator. `try_alloc` constructs an element in place
/// (reusing a freed slot when one exists) and `take` destroys in place,
/// returning the slot to the free list. Allocation is fallible: handle-space
/// exhaustion and a failed backing reservation both surface as
/// [`Error::AllocationFailed`] without touching existing slots.
#[derive(Clone)]
pub(crate) struct Arena<T> {
    slots: Vec<Option<T>>,
    free: Vec<Handle>,
}

impl<T> Arena<T> {
    pub(crate) const fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
        }
    }

    pub(crate) fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: Vec::with_capacity(capacity),
            free: Vec::new(),
        }
    }

    pub(crate) fn capacity(&self) -> usize {
        self.slots.capacity()
    }

    pub(crate) const fn len(&self) -> usize {
        self.slots.len().saturating_sub(self.free.len())
    }

    pub(crate) fn try_alloc(&mut self, element: T) -> Result<Handle, Error> {
        if let Some(h) = self.free.pop() {
            self.slots[h.index()] = Some(element);
            return Ok(h);
        }
        // Strict less-than: Handle::MAX is the largest representable index,
        // so slots.len() must stay at or below Handle::MAX + 1 after push.
        if self.slots.len() > Handle::MAX {
            return Err(Error::AllocationFailed);
        }
        if self.slots.try_reserve(1).is_err() {
            return Err(Error::AllocationFailed);
        }
        self.slots.push(Some(element));
        Ok(Handle::new(self.slots.len() - 1))
    }

    #[inline]
    pub(crate) fn get(&self, handle: Handle) -> &T {
        self.slots[handle.index()].as_ref().expect("`Arena::get()` - `handle` is invalid!")
    }

    #[inline]
    pub(crate) fn get_mut(&mut self, handle: Handle) -> &mut T {
        self.slots[handle.index()].as_mut().expect("`Arena::get_mut()` - `handle` is invalid!")
    }

    pub(crate) fn take(&mut self, handle: Handle) -> T {
        let element = self.slots[handle.index()].take().expect("`Arena::take()` - `handle` is invalid!");
        self.free.push(handle);
        element
    }

    pub(crate) fn clear(&mut self) {
        self.slots.clear();
        self.free.clear();
    }
}
