//! Typed subscription registries for document and connection events.
//!
//! Callbacks run synchronously in the turn that produced the event and must
//! not re-enter the replica.

/// A list of subscribers for one event type.
pub struct Events<T> {
    subscribers: Vec<Box<dyn Fn(&T) + Send>>,
}

impl<T> Events<T> {
    pub fn new() -> Self {
        Self {
            subscribers: Vec::new(),
        }
    }

    /// Register a callback for every future emission.
    pub fn subscribe<F>(&mut self, f: F)
    where
        F: Fn(&T) + Send + 'static,
    {
        self.subscribers.push(Box::new(f));
    }

    /// Invoke every subscriber with `event`, in registration order.
    pub fn emit(&self, event: &T) {
        for sub in &self.subscribers {
            sub(event);
        }
    }

    pub fn len(&self) -> usize {
        self.subscribers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }
}

impl<T> Default for Events<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for Events<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Events")
            .field("subscribers", &self.subscribers.len())
            .finish()
    }
}
