//! Process-wide counters, trimmed from the teacher's per-session statistics
//! table down to a handful of global counts — this service has no
//! `/metrics` route or per-allocation tracking to feed, just enough to log
//! a periodic summary.

use std::sync::atomic::{AtomicUsize, Ordering};

pub trait Number {
    fn add(&self, value: usize);
    fn get(&self) -> usize;
}

#[derive(Default)]
pub struct Count(AtomicUsize);

impl Number for Count {
    fn add(&self, value: usize) {
        self.0.fetch_add(value, Ordering::Relaxed);
    }

    fn get(&self) -> usize {
        self.0.load(Ordering::Relaxed)
    }
}

/// Global, process-lifetime counters.
///
/// # Test
///
/// ```
/// use auth_server::statistics::Statistics;
///
/// let statistics = Statistics::default();
/// statistics.connection_opened();
/// statistics.frame_received();
/// statistics.frame_received();
///
/// assert_eq!(statistics.connections_total(), 1);
/// assert_eq!(statistics.frames_received_total(), 2);
/// ```
#[derive(Default)]
pub struct Statistics {
    connections: Count,
    frames_received: Count,
    frames_sent: Count,
    malformed_frames: Count,
}

impl Statistics {
    pub fn connection_opened(&self) {
        self.connections.add(1);
    }

    pub fn frame_received(&self) {
        self.frames_received.add(1);
    }

    pub fn frame_sent(&self) {
        self.frames_sent.add(1);
    }

    pub fn malformed_frame(&self) {
        self.malformed_frames.add(1);
    }

    pub fn connections_total(&self) -> usize {
        self.connections.get()
    }

    pub fn frames_received_total(&self) -> usize {
        self.frames_received.get()
    }

    pub fn frames_sent_total(&self) -> usize {
        self.frames_sent.get()
    }

    pub fn malformed_frames_total(&self) -> usize {
        self.malformed_frames.get()
    }
}
