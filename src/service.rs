//! Single-writer actor around [`FusionEngine`].
//!
//! Producers (position provider callbacks, sensor listeners, the host UI) post
//! into one crossbeam queue; a dedicated worker thread drains it and is the only
//! code that touches the engine. Control commands share the queue with sensor
//! input, so everything is applied in arrival order.

use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use crossbeam::channel::{self, Receiver, Sender};
use log::{debug, info, trace, warn};

use crate::engine::{FusionEngine, FusionEvent, FusionSnapshot};
use crate::error::{TrackerError, TrackerResult};
use crate::types::{AccelSample, FusedFix, RawFix, RotationVectorSample};

/// Sensor input accepted by the worker
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum TrackerInput {
    Fix(RawFix),
    /// Raw azimuth in degrees
    Orientation(f64),
    RotationVector(RotationVectorSample),
    Acceleration(AccelSample),
}

enum Command {
    Input(TrackerInput),
    Open {
        outlet: Sender<FusedFix>,
        reply: Sender<TrackerResult<()>>,
    },
    Close {
        reply: Sender<()>,
    },
    SetMotionSensor(bool),
    Snapshot {
        reply: Sender<FusionSnapshot>,
    },
    Shutdown,
}

/// Cloneable producer handle; one per sensor callback is fine
#[derive(Clone)]
pub struct SensorInlet {
    tx: Sender<Command>,
}

impl SensorInlet {
    pub fn post(&self, input: TrackerInput) -> TrackerResult<()> {
        self.tx
            .send(Command::Input(input))
            .map_err(|_| TrackerError::ChannelClosed)
    }
}

pub struct LocationService {
    tx: Sender<Command>,
    last_fused: Arc<Mutex<Option<FusedFix>>>,
    thread_handle: Option<JoinHandle<()>>,
}

impl LocationService {
    /// Move the engine onto a worker thread named `location-fusion`
    pub fn spawn(engine: FusionEngine) -> TrackerResult<Self> {
        let (tx, rx) = channel::unbounded();
        let last_fused = Arc::new(Mutex::new(engine.last_known_fused_fix()));
        let shared = last_fused.clone();

        let thread_handle = thread::Builder::new()
            .name("location-fusion".to_string())
            .spawn(move || run_loop(engine, rx, shared))
            .map_err(|e| TrackerError::Worker(e.to_string()))?;

        info!("location fusion worker started");
        Ok(Self {
            tx,
            last_fused,
            thread_handle: Some(thread_handle),
        })
    }

    pub fn inlet(&self) -> SensorInlet {
        SensorInlet { tx: self.tx.clone() }
    }

    /// Open a session; blocks until the worker has applied it
    pub fn open(&self, outlet: Sender<FusedFix>) -> TrackerResult<()> {
        let (reply, response) = channel::bounded(1);
        self.send(Command::Open { outlet, reply })?;
        response.recv().map_err(|_| TrackerError::ChannelClosed)?
    }

    pub fn close(&self) -> TrackerResult<()> {
        let (reply, response) = channel::bounded(1);
        self.send(Command::Close { reply })?;
        response.recv().map_err(|_| TrackerError::ChannelClosed)
    }

    pub fn set_motion_sensor(&self, enabled: bool) -> TrackerResult<()> {
        self.send(Command::SetMotionSensor(enabled))
    }

    /// Engine state after every command queued before this call
    pub fn snapshot(&self) -> TrackerResult<FusionSnapshot> {
        let (reply, response) = channel::bounded(1);
        self.send(Command::Snapshot { reply })?;
        response.recv().map_err(|_| TrackerError::ChannelClosed)
    }

    /// Latest published fix, readable from any thread without queueing
    pub fn last_known_fused_fix(&self) -> Option<FusedFix> {
        self.last_fused.lock().ok().and_then(|fix| *fix)
    }

    /// Close the session and wait for the worker to exit
    pub fn shutdown(&mut self) {
        let Some(handle) = self.thread_handle.take() else {
            return;
        };
        // worker may already be gone
        let _ = self.tx.send(Command::Shutdown);
        if let Err(e) = handle.join() {
            warn!("location fusion worker panicked: {e:?}");
        }
    }

    fn send(&self, command: Command) -> TrackerResult<()> {
        self.tx.send(command).map_err(|_| TrackerError::ChannelClosed)
    }
}

impl Drop for LocationService {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run_loop(mut engine: FusionEngine, rx: Receiver<Command>, shared: Arc<Mutex<Option<FusedFix>>>) {
    for command in rx.iter() {
        let events = match command {
            Command::Input(input) => apply_input(&mut engine, input),
            Command::Open { outlet, reply } => {
                let (result, events) = match engine.open(outlet) {
                    Ok(events) => (Ok(()), events),
                    Err(e) => (Err(e), Vec::new()),
                };
                let _ = reply.send(result);
                events
            }
            Command::Close { reply } => {
                let events = engine.close();
                let _ = reply.send(());
                events
            }
            Command::SetMotionSensor(enabled) => engine.update_feature_flags(enabled),
            Command::Snapshot { reply } => {
                let _ = reply.send(engine.snapshot());
                Vec::new()
            }
            Command::Shutdown => {
                engine.close();
                break;
            }
        };

        for event in &events {
            trace!("{event:?}");
        }
        if events.iter().any(|e| {
            matches!(
                e,
                FusionEvent::Published { .. } | FusionEvent::SessionOpened { .. }
            )
        }) {
            if let Ok(mut slot) = shared.lock() {
                *slot = engine.last_known_fused_fix();
            }
        }
    }
    debug!("location fusion worker stopped");
}

fn apply_input(engine: &mut FusionEngine, input: TrackerInput) -> Vec<FusionEvent> {
    match input {
        TrackerInput::Fix(fix) => engine.on_raw_fix(&fix),
        TrackerInput::Orientation(azimuth) => {
            engine.on_orientation(azimuth);
            Vec::new()
        }
        TrackerInput::RotationVector(sample) => {
            engine.on_rotation_vector(&sample);
            Vec::new()
        }
        TrackerInput::Acceleration(sample) => engine.on_acceleration(&sample),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TrackerConfig;
    use crate::platform::testing::{mock_platform, ProviderProbe, SensorProbe};
    use crate::platform::ManualClock;
    use crate::types::{FixSource, PowerState};
    use std::time::Duration;

    const TIMEOUT: Duration = Duration::from_secs(2);

    fn service(config: TrackerConfig) -> (LocationService, ProviderProbe, ManualClock) {
        let clock = ManualClock::new(0);
        let provider = ProviderProbe::default();
        let platform = mock_platform(&provider, &SensorProbe::default(), &clock, true);
        let engine = FusionEngine::new(config, platform).unwrap();
        (LocationService::spawn(engine).unwrap(), provider, clock)
    }

    #[test]
    fn test_fix_flows_to_outlet_and_shared_slot() {
        let (service, _provider, _clock) = service(TrackerConfig::default());
        let (tx, rx) = channel::unbounded();
        service.open(tx).unwrap();
        assert!(service.last_known_fused_fix().is_none());

        service
            .inlet()
            .post(TrackerInput::Fix(RawFix::new(40.4, -3.7, 0).with_speed(1.0)))
            .unwrap();
        let fused = rx.recv_timeout(TIMEOUT).unwrap();
        assert_eq!(fused.source, FixSource::Valid);

        // snapshot round trip orders us after the fix
        assert_eq!(service.snapshot().unwrap().published, 1);
        assert_eq!(service.last_known_fused_fix(), Some(fused));
    }

    #[test]
    fn test_open_twice_reports_error() {
        let (service, _provider, _clock) = service(TrackerConfig::default());
        service.open(channel::unbounded().0).unwrap();
        assert_eq!(service.open(channel::unbounded().0), Err(TrackerError::AlreadyOpen));
    }

    #[test]
    fn test_inputs_after_close_are_ignored() {
        let (service, provider, _clock) = service(TrackerConfig::default());
        let (tx, rx) = channel::unbounded();
        service.open(tx).unwrap();
        service.close().unwrap();
        service.close().unwrap();

        service
            .inlet()
            .post(TrackerInput::Fix(RawFix::new(40.4, -3.7, 0)))
            .unwrap();
        assert!(service.snapshot().unwrap().session_id.is_none());
        assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());
        assert_eq!(provider.stops(), 1);
    }

    #[test]
    fn test_motion_sample_wakes_through_queue() {
        let config = TrackerConfig {
            motion_sensor_enabled: true,
            ..TrackerConfig::default()
        };
        let (service, provider, clock) = service(config);
        service.open(channel::unbounded().0).unwrap();

        clock.set_millis(91_000);
        let inlet = service.inlet();
        inlet
            .post(TrackerInput::Fix(RawFix::new(40.4, -3.7, 91_000_000_000)))
            .unwrap();
        assert_eq!(service.snapshot().unwrap().power_state, PowerState::HardSleep);

        inlet
            .post(TrackerInput::Acceleration(AccelSample::new(1.0, 0.0, 0.0, 92_000_000_000)))
            .unwrap();
        let snapshot = service.snapshot().unwrap();
        assert_eq!(snapshot.power_state, PowerState::Active);
        assert_eq!(provider.starts(), 2);
    }

    #[test]
    fn test_disabling_motion_sensor_through_queue() {
        let config = TrackerConfig {
            motion_sensor_enabled: true,
            ..TrackerConfig::default()
        };
        let (service, provider, clock) = service(config);
        service.open(channel::unbounded().0).unwrap();
        clock.set_millis(95_000);
        service
            .inlet()
            .post(TrackerInput::Fix(RawFix::new(40.4, -3.7, 95_000_000_000)))
            .unwrap();

        service.set_motion_sensor(false).unwrap();
        let snapshot = service.snapshot().unwrap();
        assert!(!snapshot.motion_sensor_enabled);
        assert_eq!(snapshot.power_state, PowerState::Active);
        assert!(provider.is_running());
    }

    #[test]
    fn test_orientation_feeds_compass() {
        let (service, _provider, _clock) = service(TrackerConfig::default());
        service.open(channel::unbounded().0).unwrap();
        service.inlet().post(TrackerInput::Orientation(-90.0)).unwrap();
        let bearing = service.snapshot().unwrap().compass_bearing.unwrap();
        assert!((bearing - 270.0).abs() < 1e-9);
    }

    #[test]
    fn test_drop_closes_session_and_inlet() {
        let (service, provider, _clock) = service(TrackerConfig::default());
        service.open(channel::unbounded().0).unwrap();
        let inlet = service.inlet();
        drop(service);

        assert_eq!(provider.stops(), 1);
        assert_eq!(
            inlet.post(TrackerInput::Orientation(0.0)),
            Err(TrackerError::ChannelClosed)
        );
    }
}
