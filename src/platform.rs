//! Boundary to the host platform: position provider, motion sensors,
//! permission check and clock.
//!
//! All calls are fire-and-forget. Implementations must not block, since they
//! are invoked from the fusion worker.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::types::RawFix;

/// Source of absolute position fixes
pub trait PositionProvider: Send {
    /// Begin (or resume) delivering fixes at roughly the given interval
    fn start_updates(&mut self, interval: Duration);

    fn stop_updates(&mut self);

    /// Last fix the platform cached before the session started
    fn last_known_fix(&self) -> Option<RawFix>;

    /// False when the user switched location services off entirely
    fn is_location_enabled(&self) -> bool {
        true
    }
}

/// Orientation and acceleration sensor registration
pub trait MotionSensors: Send {
    /// Returns false when no orientation sensor exists
    fn register_orientation(&mut self) -> bool;

    /// Returns false when no accelerometer exists
    fn register_accelerometer(&mut self) -> bool;

    fn unregister_all(&mut self);
}

pub trait PermissionGate: Send {
    fn has_location_permission(&self) -> bool;
}

/// Fixed answer, for hosts that check permission before building the engine
#[derive(Clone, Copy, Debug)]
pub struct StaticPermission(pub bool);

impl PermissionGate for StaticPermission {
    fn has_location_permission(&self) -> bool {
        self.0
    }
}

/// Monotonic time source shared by the engine and its producers
pub trait Clock: Send + Sync {
    fn now_nanos(&self) -> i64;
}

/// Wall time since construction, from `Instant`
#[derive(Clone, Debug)]
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self { origin: Instant::now() }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now_nanos(&self) -> i64 {
        i64::try_from(self.origin.elapsed().as_nanos()).unwrap_or(i64::MAX)
    }
}

/// Externally driven clock for replays and tests. Clones share the same time.
#[derive(Clone, Debug, Default)]
pub struct ManualClock {
    nanos: Arc<AtomicI64>,
}

impl ManualClock {
    pub fn new(start_nanos: i64) -> Self {
        Self {
            nanos: Arc::new(AtomicI64::new(start_nanos)),
        }
    }

    pub fn set_nanos(&self, nanos: i64) {
        self.nanos.store(nanos, Ordering::SeqCst);
    }

    pub fn set_millis(&self, millis: i64) {
        self.set_nanos(millis.saturating_mul(1_000_000));
    }

    pub fn advance(&self, by: Duration) {
        let delta = i64::try_from(by.as_nanos()).unwrap_or(i64::MAX);
        self.nanos.fetch_add(delta, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_nanos(&self) -> i64 {
        self.nanos.load(Ordering::SeqCst)
    }
}

/// Everything the engine needs from the host
pub struct Platform {
    pub provider: Box<dyn PositionProvider>,
    pub sensors: Box<dyn MotionSensors>,
    pub permission: Box<dyn PermissionGate>,
    pub clock: Arc<dyn Clock>,
}
