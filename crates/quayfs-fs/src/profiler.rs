//! Instrumentation token threaded through the data path.
//!
//! Front-ends hand a [`Profiler`] into `read`/`write`; the filesystem
//! layer and the collaborator record labeled events against it so a
//! slow request can be reconstructed after the fact.

use std::time::{Duration, Instant};

/// Records labeled timestamps over the life of one request.
#[derive(Debug)]
pub struct Profiler {
    origin: Instant,
    events: Vec<(String, Duration)>,
}

impl Profiler {
    /// Creates a profiler whose clock starts now.
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            events: Vec::new(),
        }
    }

    /// Records an event at the current instant.
    pub fn add_event(&mut self, label: &str) {
        let elapsed = self.origin.elapsed();
        self.events.push((label.to_string(), elapsed));
    }

    /// Returns the recorded events in order.
    pub fn events(&self) -> &[(String, Duration)] {
        &self.events
    }
}

impl Default for Profiler {
    fn default() -> Self {
        Self::new()
    }
}
