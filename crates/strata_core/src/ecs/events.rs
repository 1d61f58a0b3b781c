// events.rs - Component lifecycle notifications
//
// Subscribers receive `&World`, so an Added handler can query the store and
// see the new component right away. Events raised while a handler is running
// (for example a handler that calls `remove_deferred`) are queued and
// delivered in order once the current event has reached every subscriber.

use crate::ecs::{CompIdx, ComponentId, Entity, World};
use std::cell::{Cell, RefCell};
use std::collections::VecDeque;

/// Terminal notification points.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ComponentEventKind {
    Added,
    Removed,
    Deleted,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ComponentEvent {
    pub kind: ComponentEventKind,
    pub entity: Entity,
    pub component: ComponentId,
    pub index: CompIdx,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

/// Which event kinds a subscriber wants.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct EventFilter {
    added: bool,
    removed: bool,
    deleted: bool,
}

impl EventFilter {
    pub const ALL: EventFilter = EventFilter {
        added: true,
        removed: true,
        deleted: true,
    };

    const NONE: EventFilter = EventFilter {
        added: false,
        removed: false,
        deleted: false,
    };

    pub fn only(kind: ComponentEventKind) -> Self {
        Self::NONE.with(kind)
    }

    pub fn with(mut self, kind: ComponentEventKind) -> Self {
        match kind {
            ComponentEventKind::Added => self.added = true,
            ComponentEventKind::Removed => self.removed = true,
            ComponentEventKind::Deleted => self.deleted = true,
        }
        self
    }

    pub fn accepts(&self, kind: ComponentEventKind) -> bool {
        match kind {
            ComponentEventKind::Added => self.added,
            ComponentEventKind::Removed => self.removed,
            ComponentEventKind::Deleted => self.deleted,
        }
    }
}

type Callback = Box<dyn FnMut(&World, &ComponentEvent)>;

struct Subscriber {
    id: SubscriptionId,
    filter: EventFilter,
    callback: Callback,
}

/// Fan-out of component lifecycle events.
#[derive(Default)]
pub struct EventBus {
    subscribers: RefCell<Vec<Subscriber>>,
    queue: RefCell<VecDeque<ComponentEvent>>,
    cancelled: RefCell<Vec<SubscriptionId>>,
    delivering: Cell<bool>,
    next_id: Cell<u64>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&self, filter: EventFilter, callback: F) -> SubscriptionId
    where
        F: FnMut(&World, &ComponentEvent) + 'static,
    {
        let id = SubscriptionId(self.next_id.get());
        self.next_id.set(id.0 + 1);
        self.subscribers.borrow_mut().push(Subscriber {
            id,
            filter,
            callback: Box::new(callback),
        });
        id
    }

    /// Stop delivering to `id`. Safe to call from inside a handler; the
    /// handler finishes the current event but gets nothing after it.
    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.subscribers.borrow_mut().retain(|sub| sub.id != id);
        if self.delivering.get() {
            self.cancelled.borrow_mut().push(id);
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.borrow().len()
    }

    pub(crate) fn emit(&self, world: &World, event: ComponentEvent) {
        self.queue.borrow_mut().push_back(event);
        if self.delivering.get() {
            return;
        }

        self.delivering.set(true);
        loop {
            let Some(event) = self.queue.borrow_mut().pop_front() else {
                break;
            };
            self.deliver(world, &event);
        }
        self.delivering.set(false);
        self.cancelled.borrow_mut().clear();
    }

    fn deliver(&self, world: &World, event: &ComponentEvent) {
        // Handlers may subscribe while we iterate, so run against a detached
        // list and merge newcomers back afterwards.
        let mut active = std::mem::take(&mut *self.subscribers.borrow_mut());
        for sub in active.iter_mut() {
            if !sub.filter.accepts(event.kind) || self.cancelled.borrow().contains(&sub.id) {
                continue;
            }
            (sub.callback)(world, event);
        }

        let mut subscribers = self.subscribers.borrow_mut();
        let newcomers = std::mem::replace(&mut *subscribers, active);
        subscribers.extend(newcomers);
        let cancelled = self.cancelled.borrow();
        subscribers.retain(|sub| !cancelled.contains(&sub.id));
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.subscriber_count())
            .field("queued", &self.queue.borrow().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filters_select_kinds() {
        let filter = EventFilter::only(ComponentEventKind::Added).with(ComponentEventKind::Deleted);
        assert!(filter.accepts(ComponentEventKind::Added));
        assert!(!filter.accepts(ComponentEventKind::Removed));
        assert!(filter.accepts(ComponentEventKind::Deleted));
        assert!(EventFilter::ALL.accepts(ComponentEventKind::Removed));
    }

    #[test]
    fn subscription_ids_are_unique() {
        let bus = EventBus::new();
        let a = bus.subscribe(EventFilter::ALL, |_, _| {});
        let b = bus.subscribe(EventFilter::ALL, |_, _| {});
        assert_ne!(a, b);
        assert_eq!(bus.subscriber_count(), 2);
        bus.unsubscribe(a);
        assert_eq!(bus.subscriber_count(), 1);
    }
}
