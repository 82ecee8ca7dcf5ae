use std::sync::{Arc, Mutex, MutexGuard, Weak};

type Callback<T> = Arc<dyn Fn(&T) + Send + Sync>;

struct Slots<T> {
    next_id: u64,
    entries: Vec<(u64, Callback<T>)>,
}

fn lock<T>(slots: &Mutex<Slots<T>>) -> MutexGuard<'_, Slots<T>> {
    // a panicking callback must not disable every later registration
    slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Synchronous hook registry; `register` hands back the disposer
pub struct CallbackSet<T> {
    slots: Arc<Mutex<Slots<T>>>,
}

impl<T> Default for CallbackSet<T> {
    fn default() -> Self {
        Self {
            slots: Arc::new(Mutex::new(Slots {
                next_id: 0,
                entries: Vec::new(),
            })),
        }
    }
}

impl<T: 'static> std::fmt::Debug for CallbackSet<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackSet")
            .field("registered", &self.len())
            .finish()
    }
}

impl<T: 'static> CallbackSet<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a callback; it stays registered while the guard lives
    #[must_use = "dropping the guard unregisters the callback immediately"]
    pub fn register<F>(&self, callback: F) -> CallbackGuard
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let id = {
            let mut slots = lock(&self.slots);
            let id = slots.next_id;
            slots.next_id += 1;
            slots.entries.push((id, Arc::new(callback)));
            id
        };

        let weak: Weak<Mutex<Slots<T>>> = Arc::downgrade(&self.slots);
        CallbackGuard {
            dispose: Some(Box::new(move || {
                if let Some(slots) = weak.upgrade() {
                    lock(&slots).entries.retain(|(entry_id, _)| *entry_id != id);
                }
            })),
        }
    }

    /// Call every registered callback in registration order
    pub fn invoke(&self, value: &T) -> usize {
        // snapshot so callbacks may register or drop guards re-entrantly
        let callbacks: Vec<Callback<T>> = lock(&self.slots)
            .entries
            .iter()
            .map(|(_, cb)| cb.clone())
            .collect();

        for callback in &callbacks {
            callback(value);
        }
        callbacks.len()
    }

    pub fn len(&self) -> usize {
        lock(&self.slots).entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Disposer returned by [`CallbackSet::register`]
pub struct CallbackGuard {
    dispose: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl CallbackGuard {
    /// Keep the callback registered for the lifetime of the set
    pub fn forget(mut self) {
        self.dispose = None;
    }
}

impl Drop for CallbackGuard {
    fn drop(&mut self) {
        if let Some(dispose) = self.dispose.take() {
            dispose();
        }
    }
}

impl std::fmt::Debug for CallbackGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackGuard")
            .field("active", &self.dispose.is_some())
            .finish()
    }
}
