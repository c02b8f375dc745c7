//! Opaque handles and the arena that owns the contexts behind them.
//!
//! A [`Handle`] is what foreign callers hold between calls. It is never a
//! pointer: it packs an arena tag, a slot index and the slot generation, so
//! a released, foreign or forged handle simply fails to resolve.
//!
//! Layout (most significant first): tag (8 bits) | generation (24 bits) |
//! index (32 bits). Generations start at 1 and the tag is non-zero, so no
//! live handle is ever 0, and the top bit stays clear for a signed `jlong`.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::PkError;

const INDEX_BITS: u32 = 32;
const GENERATION_BITS: u32 = 24;
const GENERATION_MASK: u64 = (1 << GENERATION_BITS) - 1;
const TAG_SHIFT: u32 = INDEX_BITS + GENERATION_BITS;
const MAX_TAG: u8 = 0x7f;

#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Handle(u64);

impl Handle {
    pub const NULL: Handle = Handle(0);

    pub fn from_raw(raw: u64) -> Self {
        Handle(raw)
    }

    pub fn into_raw(self) -> u64 {
        self.0
    }

    pub fn is_null(self) -> bool {
        self.0 == 0
    }

    fn new(tag: u8, generation: u32, index: u32) -> Self {
        Handle(
            (u64::from(tag) << TAG_SHIFT)
                | ((u64::from(generation) & GENERATION_MASK) << INDEX_BITS)
                | u64::from(index),
        )
    }

    fn tag(self) -> u8 {
        (self.0 >> TAG_SHIFT) as u8
    }

    fn generation(self) -> u32 {
        ((self.0 >> INDEX_BITS) & GENERATION_MASK) as u32
    }

    fn index(self) -> usize {
        (self.0 & u64::from(u32::MAX)) as usize
    }
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Handle({:#018x})", self.0)
    }
}

struct Slot<T> {
    generation: u32,
    value: Option<T>,
    /// Set once the generation is exhausted; the slot is never reused.
    retired: bool,
}

struct Slots<T> {
    tag: u8,
    entries: Vec<Slot<T>>,
}

impl<T> Slots<T> {
    /// Stores `value` and returns its handle. Reuses a free slot when one
    /// exists; otherwise grows the storage, reporting `OutOfMemory` if that
    /// fails (in which case `value` is dropped and nothing is registered).
    fn insert(&mut self, value: T) -> Result<Handle, PkError> {
        let free = self
            .entries
            .iter()
            .position(|slot| slot.value.is_none() && !slot.retired);
        if let Some(index) = free {
            let slot = &mut self.entries[index];
            slot.value = Some(value);
            return Ok(Handle::new(self.tag, slot.generation, index as u32));
        }

        let index = u32::try_from(self.entries.len()).map_err(|_| PkError::OutOfMemory)?;
        self.entries
            .try_reserve(1)
            .map_err(|_| PkError::OutOfMemory)?;
        self.entries.push(Slot {
            generation: 1,
            value: Some(value),
            retired: false,
        });
        Ok(Handle::new(self.tag, 1, index))
    }

    fn locate(&self, handle: Handle) -> Option<usize> {
        if handle.is_null() || handle.tag() != self.tag {
            return None;
        }
        let index = handle.index();
        let slot = self.entries.get(index)?;
        if slot.generation != handle.generation() || slot.value.is_none() {
            return None;
        }
        Some(index)
    }

    fn get(&self, handle: Handle) -> Result<&T, PkError> {
        if handle.is_null() {
            return Err(PkError::InvalidArgument("null handle"));
        }
        self.locate(handle)
            .and_then(|index| self.entries[index].value.as_ref())
            .ok_or(PkError::InvalidArgument("invalid handle"))
    }

    /// Takes the value out and retires the handle. A slot whose generation
    /// cannot advance without wrapping is retired for good, so no released
    /// handle ever resolves again.
    fn remove(&mut self, handle: Handle) -> Option<T> {
        let index = self.locate(handle)?;
        let slot = &mut self.entries[index];
        let value = slot.value.take();
        if slot.generation >= GENERATION_MASK as u32 {
            slot.retired = true;
        } else {
            slot.generation += 1;
        }
        value
    }

    fn len(&self) -> usize {
        self.entries
            .iter()
            .filter(|slot| slot.value.is_some())
            .count()
    }
}

/// Arena of contexts addressed by [`Handle`]s carrying this arena's tag.
///
/// The arena lock only covers handle resolution. Each context sits behind
/// its own lock, so a slow operation on one handle never stalls another.
pub struct HandleArena<T> {
    slots: Mutex<Slots<Arc<Mutex<T>>>>,
}

impl<T> HandleArena<T> {
    /// Creates an arena. `tag` distinguishes its handles from those of other
    /// arenas and must be in `1..=0x7f`.
    pub fn new(tag: u8) -> Self {
        assert!(tag != 0 && tag <= MAX_TAG, "arena tag out of range");
        HandleArena {
            slots: Mutex::new(Slots {
                tag,
                entries: Vec::new(),
            }),
        }
    }

    pub fn insert(&self, value: T) -> Result<Handle, PkError> {
        self.slots.lock().insert(Arc::new(Mutex::new(value)))
    }

    /// Resolves a handle to its context. Null and unresolvable handles are
    /// `InvalidArgument`.
    pub fn resolve(&self, handle: Handle) -> Result<Arc<Mutex<T>>, PkError> {
        self.slots.lock().get(handle).map(Arc::clone)
    }

    /// Unregisters the context. Returns `None` for null, stale or foreign
    /// handles, so removing twice is harmless. An operation that resolved
    /// the handle earlier may still hold the context.
    pub fn remove(&self, handle: Handle) -> Option<Arc<Mutex<T>>> {
        self.slots.lock().remove(handle)
    }

    pub fn contains(&self, handle: Handle) -> bool {
        self.slots.lock().locate(handle).is_some()
    }

    /// Number of live contexts.
    pub fn len(&self) -> usize {
        self.slots.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_and_resolve() {
        let arena = HandleArena::new(1);
        let handle = arena.insert("ctx").unwrap();
        assert!(!handle.is_null());
        assert_eq!(*arena.resolve(handle).unwrap().lock(), "ctx");
        assert_eq!(arena.len(), 1);
    }

    #[test]
    fn test_released_handle_is_stale() {
        let arena = HandleArena::new(1);
        let handle = arena.insert(7u32).unwrap();
        let removed = arena.remove(handle).unwrap();
        assert_eq!(*removed.lock(), 7);
        assert!(arena.remove(handle).is_none());
        assert_eq!(
            arena.resolve(handle).unwrap_err(),
            PkError::InvalidArgument("invalid handle")
        );
    }

    #[test]
    fn test_reused_slot_gets_new_generation() {
        let arena = HandleArena::new(1);
        let first = arena.insert(1u32).unwrap();
        arena.remove(first);
        let second = arena.insert(2u32).unwrap();
        assert_ne!(first, second);
        assert!(!arena.contains(first));
        assert_eq!(*arena.resolve(second).unwrap().lock(), 2);
    }

    #[test]
    fn test_exhausted_slot_is_retired() {
        let arena = HandleArena::new(1);
        let early = arena.insert(1u32).unwrap();
        arena.remove(early);

        // Jump the slot to its last generation.
        arena.slots.lock().entries[0].generation = GENERATION_MASK as u32;
        let last = arena.insert(2u32).unwrap();
        assert_eq!(last.index(), 0);
        arena.remove(last);

        let next = arena.insert(3u32).unwrap();
        assert_eq!(next.index(), 1);
        assert!(!arena.contains(early));
        assert!(!arena.contains(last));
        assert!(arena.remove(last).is_none());
        assert_eq!(*arena.resolve(next).unwrap().lock(), 3);
        assert_eq!(arena.len(), 1);
    }

    #[test]
    fn test_foreign_and_null_handles_rejected() {
        let encryption = HandleArena::new(1);
        let decryption = HandleArena::new(2);
        let handle = encryption.insert(()).unwrap();
        decryption.insert(()).unwrap();

        assert!(!decryption.contains(handle));
        assert!(decryption.remove(handle).is_none());
        assert_eq!(decryption.len(), 1);
        assert_eq!(
            encryption.resolve(Handle::NULL).unwrap_err(),
            PkError::InvalidArgument("null handle")
        );
        assert!(encryption.remove(Handle::NULL).is_none());
    }

    #[test]
    fn test_resolved_context_outlives_removal() {
        let arena = HandleArena::new(1);
        let handle = arena.insert(5u32).unwrap();
        let held = arena.resolve(handle).unwrap();
        arena.remove(handle);
        assert!(arena.is_empty());
        assert_eq!(*held.lock(), 5);
    }

    #[test]
    fn test_raw_round_trip() {
        let arena = HandleArena::new(0x7f);
        let handle = arena.insert(()).unwrap();
        let raw = handle.into_raw();
        assert!(raw as i64 > 0);
        assert!(arena.contains(Handle::from_raw(raw)));
    }
}
