//! Live-resource accounting for pipeline sessions
//!
//! Every resource a session acquires is wrapped in a [`Tracked`] guard. The
//! guard bumps a per-kind counter when created and decrements it, and appends
//! to the release log, when dropped.

use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tracing::trace;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Device,
    Decoder,
    RawFrame,
    WatermarkedFrame,
    FilterGraph,
    Packet,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 6] = [
        ResourceKind::Device,
        ResourceKind::Decoder,
        ResourceKind::RawFrame,
        ResourceKind::WatermarkedFrame,
        ResourceKind::FilterGraph,
        ResourceKind::Packet,
    ];

    pub fn name(self) -> &'static str {
        match self {
            ResourceKind::Device => "device",
            ResourceKind::Decoder => "decoder",
            ResourceKind::RawFrame => "raw frame",
            ResourceKind::WatermarkedFrame => "watermarked frame",
            ResourceKind::FilterGraph => "filter graph",
            ResourceKind::Packet => "packet",
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Default)]
pub struct ResourceTracker {
    live: [AtomicUsize; 6],
    released: Mutex<Vec<ResourceKind>>,
}

impl ResourceTracker {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn live(&self, kind: ResourceKind) -> usize {
        self.live[kind.index()].load(Ordering::Acquire)
    }

    pub fn total_live(&self) -> usize {
        ResourceKind::ALL.iter().map(|kind| self.live(*kind)).sum()
    }

    /// Kinds in the order they were released since the last [`clear_log`](Self::clear_log)
    pub fn released(&self) -> Vec<ResourceKind> {
        self.released
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn clear_log(&self) {
        self.released
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    fn acquire(&self, kind: ResourceKind) {
        self.live[kind.index()].fetch_add(1, Ordering::AcqRel);
        trace!("Acquired {}", kind);
    }

    fn release(&self, kind: ResourceKind) {
        self.live[kind.index()].fetch_sub(1, Ordering::AcqRel);
        self.released
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(kind);
        trace!("Released {}", kind);
    }
}

impl fmt::Debug for ResourceTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for kind in ResourceKind::ALL {
            map.entry(&kind.name(), &self.live(kind));
        }
        map.finish()
    }
}

/// Owned resource registered with a [`ResourceTracker`] for its whole lifetime
pub struct Tracked<T> {
    // Dropped before the tracker is told, so the release log follows the real teardown
    value: Option<T>,
    kind: ResourceKind,
    tracker: Arc<ResourceTracker>,
}

impl<T> Tracked<T> {
    pub fn new(value: T, kind: ResourceKind, tracker: &Arc<ResourceTracker>) -> Self {
        tracker.acquire(kind);
        Self {
            value: Some(value),
            kind,
            tracker: Arc::clone(tracker),
        }
    }

    pub fn kind(&self) -> ResourceKind {
        self.kind
    }
}

impl<T> Deref for Tracked<T> {
    type Target = T;

    fn deref(&self) -> &T {
        match &self.value {
            Some(value) => value,
            None => unreachable!("tracked value is only taken in drop"),
        }
    }
}

impl<T> DerefMut for Tracked<T> {
    fn deref_mut(&mut self) -> &mut T {
        match &mut self.value {
            Some(value) => value,
            None => unreachable!("tracked value is only taken in drop"),
        }
    }
}

impl<T> Drop for Tracked<T> {
    fn drop(&mut self) {
        drop(self.value.take());
        self.tracker.release(self.kind);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_follow_guard_lifetimes() {
        let tracker = ResourceTracker::new();
        let device = Tracked::new(1u8, ResourceKind::Device, &tracker);
        let packet = Tracked::new(vec![0u8; 4], ResourceKind::Packet, &tracker);
        assert_eq!(tracker.live(ResourceKind::Device), 1);
        assert_eq!(tracker.total_live(), 2);
        assert_eq!(packet.len(), 4);

        drop(packet);
        drop(device);
        assert_eq!(tracker.total_live(), 0);
        assert_eq!(
            tracker.released(),
            vec![ResourceKind::Packet, ResourceKind::Device]
        );
    }

    #[test]
    fn deref_mut_reaches_the_value() {
        let tracker = ResourceTracker::new();
        let mut buffer = Tracked::new(Vec::new(), ResourceKind::RawFrame, &tracker);
        buffer.push(3u8);
        assert_eq!(*buffer, vec![3]);
        assert_eq!(buffer.kind(), ResourceKind::RawFrame);
    }
}
