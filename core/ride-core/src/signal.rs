//! Observable values with explicit subscribe/unsubscribe.
//!
//! A `Watch<T>` holds a value and notifies listeners when it changes.
//! `subscribe` hands back a `Subscription`; dropping it (or calling
//! `dispose`) removes the listener. Everything here is single-threaded.

use std::cell::RefCell;
use std::rc::{Rc, Weak};

type Listener<T> = Rc<RefCell<dyn FnMut(&T)>>;

struct Inner<T> {
    value: T,
    next_id: u64,
    listeners: Vec<(u64, Listener<T>)>,
}

pub struct Watch<T> {
    inner: Rc<RefCell<Inner<T>>>,
}

impl<T: Clone + PartialEq + 'static> Watch<T> {
    pub fn new(value: T) -> Self {
        Self {
            inner: Rc::new(RefCell::new(Inner {
                value,
                next_id: 0,
                listeners: Vec::new(),
            })),
        }
    }

    pub fn get(&self) -> T {
        self.inner.borrow().value.clone()
    }

    /// Stores `value` and notifies listeners if it differs from the current
    /// one. Returns whether anything changed.
    pub fn set(&self, value: T) -> bool {
        let listeners = {
            let mut inner = self.inner.borrow_mut();
            if inner.value == value {
                return false;
            }
            inner.value = value.clone();
            inner
                .listeners
                .iter()
                .map(|(_, listener)| Rc::clone(listener))
                .collect::<Vec<_>>()
        };
        // Listeners run after the borrow is released so they may read or
        // subscribe to this watch.
        for listener in listeners {
            if let Ok(mut callback) = listener.try_borrow_mut() {
                (&mut *callback)(&value);
            }
        }
        true
    }

    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: FnMut(&T) + 'static,
    {
        subscribe_inner(&self.inner, listener)
    }

    pub fn reader(&self) -> WatchReader<T> {
        WatchReader {
            inner: Rc::clone(&self.inner),
        }
    }

    pub fn listener_count(&self) -> usize {
        self.inner.borrow().listeners.len()
    }
}

/// Read-only handle to a `Watch`.
pub struct WatchReader<T> {
    inner: Rc<RefCell<Inner<T>>>,
}

impl<T> Clone for WatchReader<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: Clone + 'static> WatchReader<T> {
    pub fn get(&self) -> T {
        self.inner.borrow().value.clone()
    }

    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: FnMut(&T) + 'static,
    {
        subscribe_inner(&self.inner, listener)
    }
}

fn subscribe_inner<T: 'static, F>(inner: &Rc<RefCell<Inner<T>>>, listener: F) -> Subscription
where
    F: FnMut(&T) + 'static,
{
    let id = {
        let mut guard = inner.borrow_mut();
        let id = guard.next_id;
        guard.next_id = guard.next_id.wrapping_add(1);
        let listener: Listener<T> = Rc::new(RefCell::new(listener));
        guard.listeners.push((id, listener));
        id
    };
    let weak: Weak<RefCell<Inner<T>>> = Rc::downgrade(inner);
    Subscription::new(move || {
        if let Some(inner) = weak.upgrade() {
            inner
                .borrow_mut()
                .listeners
                .retain(|(listener_id, _)| *listener_id != id);
        }
    })
}

/// Disposer returned by `subscribe`. Unsubscribes on drop.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    dispose: Option<Box<dyn FnOnce()>>,
}

impl Subscription {
    pub fn new<F>(dispose: F) -> Self
    where
        F: FnOnce() + 'static,
    {
        Self {
            dispose: Some(Box::new(dispose)),
        }
    }

    pub fn dispose(mut self) {
        self.run();
    }

    fn run(&mut self) {
        if let Some(dispose) = self.dispose.take() {
            dispose();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.run();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.dispose.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn set_notifies_only_on_change() {
        let watch = Watch::new(false);
        let seen = Rc::new(Cell::new(0));
        let counter = Rc::clone(&seen);
        let _sub = watch.subscribe(move |_| counter.set(counter.get() + 1));

        assert!(watch.set(true));
        assert!(!watch.set(true));
        assert!(watch.set(false));
        assert_eq!(seen.get(), 2);
    }

    #[test]
    fn dispose_removes_listener() {
        let watch = Watch::new(0u32);
        let seen = Rc::new(Cell::new(0u32));
        let sink = Rc::clone(&seen);
        let sub = watch.subscribe(move |value| sink.set(*value));
        assert_eq!(watch.listener_count(), 1);

        sub.dispose();
        assert_eq!(watch.listener_count(), 0);
        watch.set(7);
        assert_eq!(seen.get(), 0);
    }

    #[test]
    fn dropping_subscription_unsubscribes() {
        let watch = Watch::new(0u32);
        {
            let _sub = watch.subscribe(|_| {});
            assert_eq!(watch.listener_count(), 1);
        }
        assert_eq!(watch.listener_count(), 0);
    }

    #[test]
    fn subscription_outliving_watch_is_harmless() {
        let sub = {
            let watch = Watch::new(1u8);
            watch.subscribe(|_| {})
        };
        sub.dispose();
    }

    #[test]
    fn reader_sees_latest_value() {
        let watch = Watch::new("a".to_string());
        let reader = watch.reader();
        watch.set("b".to_string());
        assert_eq!(reader.get(), "b");
    }
}
