//! Root Set - External References Into the Heap
//!
//! Stand-in for thread stacks and static roots: a table of slots, each
//! holding an object address or 0. Marking starts from every non-zero slot
//! and pointer adjustment rewrites every slot through the forwarding facade.

use parking_lot::Mutex;

/// Handle to a slot in a `RootSet`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RootHandle(usize);

impl RootHandle {
    pub fn index(&self) -> usize {
        self.0
    }
}

/// RootSet - registered root slots
#[derive(Debug, Default)]
pub struct RootSet {
    slots: Mutex<Vec<usize>>,
}

impl RootSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a root holding `object`
    pub fn add(&self, object: usize) -> RootHandle {
        let mut slots = self.slots.lock();
        slots.push(object);
        RootHandle(slots.len() - 1)
    }

    /// Current referent of `handle`, 0 once removed
    pub fn get(&self, handle: RootHandle) -> usize {
        self.slots.lock().get(handle.0).copied().unwrap_or(0)
    }

    pub fn set(&self, handle: RootHandle, object: usize) {
        if let Some(slot) = self.slots.lock().get_mut(handle.0) {
            *slot = object;
        }
    }

    /// Clear a root; the slot index is not reused
    pub fn remove(&self, handle: RootHandle) {
        self.set(handle, 0);
    }

    /// Visit every live (non-zero) root
    pub fn for_each<F: FnMut(usize)>(&self, mut f: F) {
        for &object in self.slots.lock().iter() {
            if object != 0 {
                f(object);
            }
        }
    }

    /// Replace every live root with `f(root)`
    pub fn update_all<F: FnMut(usize) -> usize>(&self, mut f: F) {
        for slot in self.slots.lock().iter_mut() {
            if *slot != 0 {
                *slot = f(*slot);
            }
        }
    }

    /// Number of live roots
    pub fn len(&self) -> usize {
        self.slots.lock().iter().filter(|&&o| o != 0).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_remove_update() {
        let roots = RootSet::new();
        let a = roots.add(0x1000);
        let b = roots.add(0x2000);
        assert_eq!(roots.len(), 2);

        roots.remove(a);
        assert_eq!(roots.get(a), 0);
        assert_eq!(roots.len(), 1);

        roots.update_all(|obj| obj - 0x800);
        assert_eq!(roots.get(b), 0x1800);
        assert_eq!(roots.get(a), 0);

        let mut seen = Vec::new();
        roots.for_each(|obj| seen.push(obj));
        assert_eq!(seen, vec![0x1800]);
    }
}
