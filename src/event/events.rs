use std::fmt;

use crate::event::Event;
use crate::sys;

/// A collection of readiness events filled by [`Poll::poll`].
///
/// The capacity passed to [`Events::with_capacity`] bounds how many events a
/// single poll call can return; a source that stays ready shows up again on
/// the next call (the poller is level triggered), so a small capacity only
/// costs extra wakeups, never lost readiness.
///
/// [`Poll::poll`]: crate::Poll::poll
pub struct Events {
    inner: sys::Events,
}

impl Events {
    /// Returns a new `Events` able to hold up to `capacity` events.
    pub fn with_capacity(capacity: usize) -> Events {
        Events {
            inner: sys::Events::with_capacity(capacity),
        }
    }

    /// Returns the number of events `self` can hold.
    pub fn capacity(&self) -> usize {
        self.inner.capacity()
    }

    /// Returns true if no events were received in the last poll.
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Returns an iterator over the received events.
    pub fn iter(&self) -> Iter<'_> {
        Iter {
            inner: self,
            pos: 0,
        }
    }

    /// Clears the collection, discarding received events.
    ///
    /// [`Poll::poll`] does this for the caller.
    ///
    /// [`Poll::poll`]: crate::Poll::poll
    pub fn clear(&mut self) {
        self.inner.clear();
    }

    pub(crate) fn sys(&mut self) -> &mut sys::Events {
        &mut self.inner
    }
}

/// [`Events`] iterator.
#[derive(Debug, Clone)]
pub struct Iter<'a> {
    inner: &'a Events,
    pos: usize,
}

impl<'a> IntoIterator for &'a Events {
    type Item = &'a Event;
    type IntoIter = Iter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl<'a> Iterator for Iter<'a> {
    type Item = &'a Event;

    fn next(&mut self) -> Option<Self::Item> {
        let ret = self.inner.inner.get(self.pos).map(Event::from_sys_event_ref);
        self.pos += 1;
        ret
    }
}

impl fmt::Debug for Events {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}
