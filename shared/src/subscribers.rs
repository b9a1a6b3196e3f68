use std::sync::atomic::{AtomicU64, Ordering};

/// Identifies one registration in a [`SubscriberList`]. Handles are unique across
/// all lists in the process, so a handle can be offered to several lists when
/// removing without risk of removing the wrong subscriber.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriberHandle(u64);

static NEXT_HANDLE: AtomicU64 = AtomicU64::new(1);

impl SubscriberHandle {
    fn generate() -> Self {
        Self(NEXT_HANDLE.fetch_add(1, Ordering::Relaxed))
    }
}

/// Ordered collection of subscribers, invoked in registration order
pub struct SubscriberList<S: ?Sized> {
    subscribers: Vec<(SubscriberHandle, Box<S>)>,
}

impl<S: ?Sized> Default for SubscriberList<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: ?Sized> SubscriberList<S> {
    pub fn new() -> Self {
        Self {
            subscribers: Vec::new(),
        }
    }

    pub fn add(&mut self, subscriber: Box<S>) -> SubscriberHandle {
        let handle = SubscriberHandle::generate();
        self.subscribers.push((handle, subscriber));
        handle
    }

    /// Returns whether a subscriber was registered under `handle`
    pub fn remove(&mut self, handle: &SubscriberHandle) -> bool {
        let Some(index) = self
            .subscribers
            .iter()
            .position(|(existing, _)| existing == handle)
        else {
            return false;
        };
        self.subscribers.remove(index);
        true
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Box<S>> {
        self.subscribers.iter_mut().map(|(_, subscriber)| subscriber)
    }

    pub fn len(&self) -> usize {
        self.subscribers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }

    pub fn clear(&mut self) {
        self.subscribers.clear();
    }
}
