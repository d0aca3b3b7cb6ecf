//! Generational registry of host callables.
//!
//! A [`Handle`] is an index into a dense slab plus the generation of the slot
//! at registration time. Retiring a handle frees the slot and bumps its
//! generation, so any later use of the same handle is detected instead of
//! reaching whatever callable reuses the slot.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};

use thiserror::Error;

use crate::host::{Callback, CallbackError, HostValue};

/// Opaque reference to a registered host callable.
///
/// Handles are plain data and may travel to I/O threads inside completion
/// closures; the callable itself never leaves the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Handle {
    index: u32,
    generation: u32,
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}v{}", self.index, self.generation)
    }
}

/// How long a registration is expected to live.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifetime {
    /// Retired right after its single invocation.
    OneShot,
    /// Retired when replaced or when the owning session closes.
    Persistent,
}

/// Misuse of the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// The handle was already retired.
    #[error("handle {0} was already retired")]
    Retired(Handle),
    /// Every representable slot index is in use.
    #[error("callback registry exhausted")]
    Exhausted,
}

/// Failure while invoking a registered callable.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvocationError {
    /// The handle does not refer to a live registration.
    #[error("handle {0} is not registered")]
    Stale(Handle),
    /// The callable returned an error.
    #[error("{0}")]
    Raised(#[from] CallbackError),
    /// The callable panicked; the panic was contained.
    #[error("callback panicked: {0}")]
    Panicked(String),
}

struct Registered {
    callback: Callback,
    generation: u32,
    lifetime: Lifetime,
}

struct FreeSlot {
    next: Option<u32>,
    generation: u32,
}

enum Entry {
    Occupied(Registered),
    Free(FreeSlot),
}

/// Slab of host callables with an intrusive free list.
///
/// Grows on demand; freed slots are reused before the slab grows.
#[derive(Default)]
pub struct CallbackRegistry {
    entries: Vec<Entry>,
    free_head: Option<u32>,
    live: usize,
}

impl CallbackRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a callable and returns its handle.
    ///
    /// # Errors
    ///
    /// [`RegistryError::Exhausted`] if `u32::MAX` slots are already live.
    pub fn register(
        &mut self,
        callback: Callback,
        lifetime: Lifetime,
    ) -> Result<Handle, RegistryError> {
        let (index, generation) = match self.free_head {
            Some(index) => {
                let slot = &self.entries[index as usize];
                let (next, generation) = match slot {
                    Entry::Free(free) => (free.next, free.generation),
                    Entry::Occupied(_) => unreachable!("free_head must point to a free slot"),
                };
                self.free_head = next;
                (index, generation)
            }
            None => {
                let index =
                    u32::try_from(self.entries.len()).map_err(|_| RegistryError::Exhausted)?;
                self.entries.push(Entry::Free(FreeSlot {
                    next: None,
                    generation: 0,
                }));
                (index, 0)
            }
        };

        self.entries[index as usize] = Entry::Occupied(Registered {
            callback,
            generation,
            lifetime,
        });
        self.live += 1;

        Ok(Handle { index, generation })
    }

    /// Invokes a live registration, leaving it registered.
    ///
    /// # Errors
    ///
    /// [`InvocationError::Stale`] for a retired handle; otherwise whatever the
    /// callable raised. A panicking callable stays registered and usable.
    pub fn invoke(&mut self, handle: Handle, args: &[HostValue]) -> Result<(), InvocationError> {
        let entry = self
            .occupied_mut(handle)
            .ok_or(InvocationError::Stale(handle))?;
        call_contained(&mut entry.callback, args)
    }

    /// Retires `handle`, then invokes its callable.
    ///
    /// The slot is freed before the call, so the handle is retired exactly
    /// once whether the callable succeeds, fails or panics.
    ///
    /// # Errors
    ///
    /// Same as [`Self::invoke`].
    pub fn invoke_once(
        &mut self,
        handle: Handle,
        args: &[HostValue],
    ) -> Result<(), InvocationError> {
        let mut callback = self
            .take(handle)
            .ok_or(InvocationError::Stale(handle))?;
        call_contained(&mut callback, args)
    }

    /// Retires `handle`, dropping its callable.
    ///
    /// # Errors
    ///
    /// [`RegistryError::Retired`] if the handle was already retired. The
    /// registry is left untouched in that case.
    pub fn retire(&mut self, handle: Handle) -> Result<(), RegistryError> {
        self.take(handle)
            .map(drop)
            .ok_or(RegistryError::Retired(handle))
    }

    /// Retires every live registration. Returns how many were retired.
    pub fn retire_all(&mut self) -> usize {
        let mut retired = 0;
        for index in 0..self.entries.len() {
            let generation = match &self.entries[index] {
                Entry::Occupied(entry) => entry.generation,
                Entry::Free(_) => continue,
            };
            let handle = Handle {
                index: index as u32,
                generation,
            };
            if self.retire(handle).is_ok() {
                retired += 1;
            }
        }
        retired
    }

    /// Returns `true` if `handle` refers to a live registration.
    #[must_use]
    pub fn contains(&self, handle: Handle) -> bool {
        self.occupied(handle).is_some()
    }

    /// Lifetime the handle was registered with, if still live.
    #[must_use]
    pub fn lifetime(&self, handle: Handle) -> Option<Lifetime> {
        self.occupied(handle).map(|entry| entry.lifetime)
    }

    /// Number of live registrations.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.live
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.live == 0
    }

    fn occupied(&self, handle: Handle) -> Option<&Registered> {
        match self.entries.get(handle.index as usize)? {
            Entry::Occupied(entry) if entry.generation == handle.generation => Some(entry),
            _ => None,
        }
    }

    fn occupied_mut(&mut self, handle: Handle) -> Option<&mut Registered> {
        match self.entries.get_mut(handle.index as usize)? {
            Entry::Occupied(entry) if entry.generation == handle.generation => Some(entry),
            _ => None,
        }
    }

    /// Frees the slot behind `handle` and hands back its callable.
    fn take(&mut self, handle: Handle) -> Option<Callback> {
        self.occupied(handle)?;
        let freed = Entry::Free(FreeSlot {
            next: self.free_head,
            generation: handle.generation.wrapping_add(1),
        });
        let previous = std::mem::replace(&mut self.entries[handle.index as usize], freed);
        self.free_head = Some(handle.index);
        self.live -= 1;
        match previous {
            Entry::Occupied(entry) => Some(entry.callback),
            Entry::Free(_) => None,
        }
    }
}

fn call_contained(callback: &mut Callback, args: &[HostValue]) -> Result<(), InvocationError> {
    match panic::catch_unwind(AssertUnwindSafe(|| callback.call(args))) {
        Ok(result) => result.map_err(InvocationError::from),
        Err(payload) => Err(InvocationError::Panicked(panic_message(payload.as_ref()))),
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

impl fmt::Debug for CallbackRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackRegistry")
            .field("live", &self.live)
            .field("slots", &self.entries.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;

    /// Counts drops of the closure it is moved into.
    struct DropCounter(Rc<Cell<u32>>);

    impl Drop for DropCounter {
        fn drop(&mut self) {
            self.0.set(self.0.get() + 1);
        }
    }

    fn counting(calls: &Rc<Cell<u32>>, drops: &Rc<Cell<u32>>) -> Callback {
        let calls = Rc::clone(calls);
        let guard = DropCounter(Rc::clone(drops));
        Callback::infallible(move |_| {
            let _ = &guard;
            calls.set(calls.get() + 1);
        })
    }

    #[test]
    fn test_register_invoke_retire() {
        let calls = Rc::new(Cell::new(0));
        let drops = Rc::new(Cell::new(0));
        let mut registry = CallbackRegistry::new();

        let handle = registry
            .register(counting(&calls, &drops), Lifetime::Persistent)
            .unwrap();
        assert_eq!(registry.lifetime(handle), Some(Lifetime::Persistent));

        registry.invoke(handle, &[]).unwrap();
        registry.invoke(handle, &[]).unwrap();
        assert_eq!(calls.get(), 2);
        assert_eq!(drops.get(), 0);

        registry.retire(handle).unwrap();
        assert_eq!(drops.get(), 1);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_double_retire_is_reported() {
        let mut registry = CallbackRegistry::new();
        let handle = registry
            .register(Callback::infallible(|_| {}), Lifetime::OneShot)
            .unwrap();

        assert_eq!(registry.retire(handle), Ok(()));
        assert_eq!(registry.retire(handle), Err(RegistryError::Retired(handle)));
        assert_eq!(
            registry.invoke(handle, &[]),
            Err(InvocationError::Stale(handle))
        );
    }

    #[test]
    fn test_stale_handle_does_not_reach_reused_slot() {
        let calls = Rc::new(Cell::new(0));
        let drops = Rc::new(Cell::new(0));
        let mut registry = CallbackRegistry::new();

        let old = registry
            .register(Callback::infallible(|_| {}), Lifetime::OneShot)
            .unwrap();
        registry.retire(old).unwrap();

        let new = registry
            .register(counting(&calls, &drops), Lifetime::OneShot)
            .unwrap();
        assert_ne!(old, new);
        assert_eq!(registry.invoke(old, &[]), Err(InvocationError::Stale(old)));
        assert_eq!(registry.retire(old), Err(RegistryError::Retired(old)));
        assert!(registry.contains(new));
        assert_eq!(calls.get(), 0);
    }

    #[test]
    fn test_invoke_once_retires_even_on_failure() {
        let mut registry = CallbackRegistry::new();
        let failing = registry
            .register(Callback::new(|_| Err("nope".into())), Lifetime::OneShot)
            .unwrap();
        let panicking = registry
            .register(Callback::infallible(|_| panic!("boom")), Lifetime::OneShot)
            .unwrap();

        assert_eq!(
            registry.invoke_once(failing, &[]),
            Err(InvocationError::Raised(CallbackError::new("nope")))
        );
        assert_eq!(
            registry.invoke_once(panicking, &[]),
            Err(InvocationError::Panicked("boom".to_string()))
        );
        assert!(!registry.contains(failing));
        assert!(!registry.contains(panicking));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_panic_leaves_other_handles_intact() {
        let calls = Rc::new(Cell::new(0));
        let drops = Rc::new(Cell::new(0));
        let mut registry = CallbackRegistry::new();

        let healthy = registry
            .register(counting(&calls, &drops), Lifetime::Persistent)
            .unwrap();
        let panicking = registry
            .register(Callback::infallible(|_| panic!("boom")), Lifetime::Persistent)
            .unwrap();

        assert!(registry.invoke(panicking, &[]).is_err());
        registry.invoke(healthy, &[]).unwrap();
        assert_eq!(calls.get(), 1);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_retire_all_counts_each_handle_once() {
        let calls = Rc::new(Cell::new(0));
        let drops = Rc::new(Cell::new(0));
        let mut registry = CallbackRegistry::new();

        let handles: Vec<_> = (0..3)
            .map(|_| {
                registry
                    .register(counting(&calls, &drops), Lifetime::OneShot)
                    .unwrap()
            })
            .collect();
        registry.retire(handles[1]).unwrap();

        assert_eq!(registry.retire_all(), 2);
        assert_eq!(drops.get(), 3);
        assert_eq!(calls.get(), 0);
        assert_eq!(registry.retire_all(), 0);
    }
}
