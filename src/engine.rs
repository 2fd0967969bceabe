// engine.rs: location fusion and position-sensor duty cycle
//
// Pure computation over owned state. Fixes and sensor samples come in one at a
// time, fused fixes go out through the outlet channel, and every call reports
// what it did as a list of events. Threading lives in `service`; nothing here
// blocks or spawns.

use chrono::{DateTime, Utc};
use crossbeam::channel::Sender;
use log::{debug, info, trace, warn};
use serde::Serialize;

use crate::confidence::{IgnoredFixCounter, MotionConfidence};
use crate::config::TrackerConfig;
use crate::error::{TrackerError, TrackerResult};
use crate::heading::{azimuth_from_rotation_vector, HeadingFilter};
use crate::motion_gate::MotionGate;
use crate::platform::Platform;
use crate::types::{
    AccelSample, BearingOrigin, FixSource, FusedFix, PowerState, RawFix, RotationVectorSample,
};

// ─── Events ──────────────────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum WakeCause {
    /// Movement timestamp refreshed while the fix stream kept running
    Timer,
    PhysicalMotion,
    GpsConfidence,
    FeatureDisabled,
}

#[derive(Clone, Debug, PartialEq)]
pub enum FusionEvent {
    SessionOpened { session_id: String },
    SessionClosed { session_id: String, published: u64 },
    Published { source: FixSource, bearing_origin: BearingOrigin, distance_m: f64 },
    NoiseDiscarded { ignored: u32, confidence: u8 },
    SuppressedInSoftSleep { confidence: u8 },
    InvalidFix { reason: String },
    SoftSleepEntered { idle_secs: f64 },
    HardSleepEntered { idle_secs: f64 },
    WokeUp { from: PowerState, cause: WakeCause },
    ProviderStopped,
    ProviderResumed,
    BearingModeChanged { compass: bool },
    SensorUnavailable { sensor: &'static str },
    LocationDisabled,
    OutletClosed,
}

// ─── Snapshot ────────────────────────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct FusionSnapshot {
    pub session_id: Option<String>,
    pub power_state: PowerState,
    pub confidence: u8,
    pub ignored_fixes: u32,
    pub compass_bearing: Option<f64>,
    pub compass_mode: bool,
    pub motion_sensor_enabled: bool,
    pub motion_feature_active: bool,
    pub has_compass: bool,
    pub has_accelerometer: bool,
    pub published: u64,
    /// Compass samples smoothed this session
    pub compass_samples: u64,
    /// Accelerometer samples seen by the motion gate, and how many crossed it
    pub accel_samples: u64,
    pub movement_samples: u64,
}

#[derive(Clone, Debug)]
struct SessionInfo {
    session_id: String,
    started_at: DateTime<Utc>,
}

impl SessionInfo {
    fn new() -> Self {
        let started_at = Utc::now();
        SessionInfo {
            session_id: format!("session_{}", started_at.timestamp_millis()),
            started_at,
        }
    }
}

// ─── The fusion engine ───────────────────────────────────────────────────────

pub struct FusionEngine {
    config: TrackerConfig,
    platform: Platform,

    // Session
    session: Option<SessionInfo>,
    outlet: Option<Sender<FusedFix>>,
    published: u64,

    // Duty cycle
    power_state: PowerState,
    last_movement_nanos: i64,
    provider_running: bool,
    motion_sensor_enabled: bool,
    has_compass: bool,
    has_accelerometer: bool,

    // Filtering
    confidence: MotionConfidence,
    ignored: IgnoredFixCounter,
    last_fused: Option<FusedFix>,
    use_compass_mode: bool,

    // Sensors
    heading: HeadingFilter,
    motion_gate: MotionGate,
}

impl FusionEngine {
    pub fn new(config: TrackerConfig, platform: Platform) -> TrackerResult<Self> {
        config.validate()?;
        Ok(Self {
            heading: HeadingFilter::new(config.heading_smoothing),
            motion_gate: MotionGate::new(config.motion_threshold),
            confidence: MotionConfidence::new(config.confidence_max),
            ignored: IgnoredFixCounter::default(),
            motion_sensor_enabled: config.motion_sensor_enabled,
            session: None,
            outlet: None,
            published: 0,
            power_state: PowerState::Active,
            last_movement_nanos: 0,
            provider_running: false,
            has_compass: false,
            has_accelerometer: false,
            last_fused: None,
            use_compass_mode: true,
            platform,
            config,
        })
    }

    // ── Lifecycle ────────────────────────────────────────────────────────

    /// Start a tracking session. Fused fixes are sent to `outlet` until `close`.
    pub fn open(&mut self, outlet: Sender<FusedFix>) -> TrackerResult<Vec<FusionEvent>> {
        if self.session.is_some() {
            return Err(TrackerError::AlreadyOpen);
        }
        if !self.platform.permission.has_location_permission() {
            warn!("location permission not granted, session not started");
            return Err(TrackerError::PermissionDenied);
        }

        let mut events = Vec::new();
        self.reset_session_state();
        self.last_fused = None;
        self.last_movement_nanos = self.now();

        let session = SessionInfo::new();
        info!(
            "{} opened at {} (motion sensor: {})",
            session.session_id,
            session.started_at.to_rfc3339(),
            self.motion_sensor_enabled
        );
        events.push(FusionEvent::SessionOpened { session_id: session.session_id.clone() });
        self.session = Some(session);
        self.outlet = Some(outlet);

        let location_enabled = self.platform.provider.is_location_enabled();
        if !location_enabled {
            warn!("location services disabled, cached fix unavailable");
            events.push(FusionEvent::LocationDisabled);
        }

        self.start_provider();
        events.extend(self.register_sensors());

        if location_enabled {
            match self.platform.provider.last_known_fix() {
                Some(cached) => events.extend(self.seed_from_cache(cached)),
                None => debug!("no cached fix, waiting for the provider"),
            }
        }

        Ok(events)
    }

    /// End the session. Safe to call repeatedly.
    pub fn close(&mut self) -> Vec<FusionEvent> {
        let Some(session) = self.session.take() else {
            return Vec::new();
        };
        if self.provider_running {
            self.platform.provider.stop_updates();
            self.provider_running = false;
        }
        self.platform.sensors.unregister_all();
        self.outlet = None;
        let published = self.published;
        self.reset_session_state();

        info!("{} closed after {} published fixes", session.session_id, published);
        vec![FusionEvent::SessionClosed { session_id: session.session_id, published }]
    }

    pub fn is_open(&self) -> bool {
        self.session.is_some()
    }

    /// Toggle the accelerometer-driven duty cycle at runtime.
    pub fn update_feature_flags(&mut self, motion_sensor_enabled: bool) -> Vec<FusionEvent> {
        let mut events = Vec::new();
        if motion_sensor_enabled == self.motion_sensor_enabled {
            return events;
        }
        self.motion_sensor_enabled = motion_sensor_enabled;
        if self.session.is_none() {
            return events;
        }

        self.platform.sensors.unregister_all();
        events.extend(self.register_sensors());
        self.last_movement_nanos = self.now();

        if !self.motion_feature_active() && self.power_state != PowerState::Active {
            let from = self.power_state;
            if from == PowerState::HardSleep {
                self.start_provider();
                events.push(FusionEvent::ProviderResumed);
            }
            self.power_state = PowerState::Active;
            events.push(FusionEvent::WokeUp { from, cause: WakeCause::FeatureDisabled });
        }
        debug!("settings updated, motion sensor: {}", self.motion_sensor_enabled);
        events
    }

    // ── Sensor feeds ─────────────────────────────────────────────────────

    /// Feed a raw azimuth in degrees; returns the smoothed compass bearing.
    pub fn on_orientation(&mut self, azimuth_deg: f64) -> Option<f64> {
        if self.session.is_none() {
            return None;
        }
        Some(self.heading.update(azimuth_deg))
    }

    pub fn on_rotation_vector(&mut self, sample: &RotationVectorSample) -> Option<f64> {
        let azimuth = azimuth_from_rotation_vector(sample)?;
        self.on_orientation(azimuth)
    }

    /// Feed a linear-acceleration sample (only acted on when the motion feature is active).
    pub fn on_acceleration(&mut self, sample: &AccelSample) -> Vec<FusionEvent> {
        let mut events = Vec::new();
        if self.session.is_none() || !self.motion_feature_active() {
            return events;
        }
        if !self.motion_gate.is_movement(sample) {
            return events;
        }

        self.last_movement_nanos = self.now();
        self.confidence.fill();

        match self.power_state {
            PowerState::HardSleep => {
                debug!("physical motion detected, resuming position updates");
                self.start_provider();
                self.power_state = PowerState::Active;
                events.push(FusionEvent::ProviderResumed);
                events.push(FusionEvent::WokeUp {
                    from: PowerState::HardSleep,
                    cause: WakeCause::PhysicalMotion,
                });
            }
            PowerState::SoftSleep => {
                debug!("physical motion detected, leaving soft sleep");
                self.power_state = PowerState::Active;
                events.push(FusionEvent::WokeUp {
                    from: PowerState::SoftSleep,
                    cause: WakeCause::PhysicalMotion,
                });
            }
            PowerState::Active => {}
        }
        events
    }

    /// Feed a position fix through the duty cycle, bearing fusion and noise filter.
    pub fn on_raw_fix(&mut self, raw: &RawFix) -> Vec<FusionEvent> {
        let mut events = Vec::new();
        if self.session.is_none() {
            trace!("fix after close ignored");
            return events;
        }
        if let Err(e) = raw.validate() {
            warn!("{e}");
            events.push(FusionEvent::InvalidFix { reason: e.to_string() });
            return events;
        }

        let now = self.now();

        // Duty-cycle pre-check
        if self.motion_feature_active() {
            let elapsed = now.saturating_sub(self.last_movement_nanos);
            let idle_secs = elapsed as f64 / 1e9;

            if elapsed > self.config.hard_sleep_timeout_nanos() {
                if self.power_state != PowerState::HardSleep {
                    debug!("no movement for {idle_secs:.0}s, stopping position updates");
                    self.power_state = PowerState::HardSleep;
                    events.push(FusionEvent::HardSleepEntered { idle_secs });
                    if self.provider_running {
                        self.platform.provider.stop_updates();
                        self.provider_running = false;
                        events.push(FusionEvent::ProviderStopped);
                    }
                }
                return events;
            }

            if elapsed > self.config.soft_sleep_timeout_nanos() {
                if self.power_state == PowerState::Active {
                    debug!("no movement for {idle_secs:.0}s, entering soft sleep");
                    self.power_state = PowerState::SoftSleep;
                    events.push(FusionEvent::SoftSleepEntered { idle_secs });
                }
            } else if self.power_state == PowerState::SoftSleep {
                debug!("movement timestamp refreshed, leaving soft sleep");
                self.power_state = PowerState::Active;
                events.push(FusionEvent::WokeUp {
                    from: PowerState::SoftSleep,
                    cause: WakeCause::Timer,
                });
            }
        }

        let mut fix = *raw;
        let mut bearing_origin = if fix.has_bearing() { BearingOrigin::Raw } else { BearingOrigin::None };

        // Bearing from displacement when the provider sent none
        if !fix.has_bearing() {
            if let Some(prev) = self.last_fused {
                if prev.distance_to(&fix) > self.config.bearing_min_distance_m {
                    fix.bearing_deg = Some(prev.bearing_to(&fix));
                    bearing_origin = BearingOrigin::Calculated;
                }
            }
        }
        let gps_bearing = fix.bearing_deg;

        // Compass / GPS bearing hysteresis
        if self.use_compass_mode && fix.speed_mps > self.config.compass_to_gps_speed {
            self.use_compass_mode = false;
            events.push(FusionEvent::BearingModeChanged { compass: false });
        } else if !self.use_compass_mode && fix.speed_mps < self.config.gps_to_compass_speed {
            self.use_compass_mode = true;
            events.push(FusionEvent::BearingModeChanged { compass: true });
        }
        if self.use_compass_mode {
            if let Some(compass) = self.heading.current() {
                fix.bearing_deg = Some(compass);
                bearing_origin = BearingOrigin::Compass;
            }
        }

        // Noise classification
        let distance = self
            .last_fused
            .map(|prev| prev.distance_to(&fix))
            .unwrap_or(f64::INFINITY);
        let is_noise_speed = fix.speed_mps < self.config.noise_speed_threshold;
        let is_significant_distance = distance >= self.config.significant_distance_m;
        let was_moving = self
            .last_fused
            .map(|prev| prev.speed_mps > self.config.noise_speed_threshold)
            .unwrap_or(false);
        let is_just_stopping = was_moving && is_noise_speed;

        if is_noise_speed && !is_significant_distance && !is_just_stopping {
            let confidence = self.confidence.decrement();
            let ignored = self.ignored.increment();
            if self.ignored.exceeds(self.config.max_ignored_fixes)
                && self.power_state != PowerState::SoftSleep
            {
                self.publish(fix, FixSource::Forced, bearing_origin, gps_bearing, &mut events);
            } else {
                trace!(
                    "noise ({ignored}) | speed {:.2} m/s | confidence {confidence}",
                    fix.speed_mps
                );
                events.push(FusionEvent::NoiseDiscarded { ignored, confidence });
            }
            return events;
        }

        if is_just_stopping {
            if let Some(prev) = self.last_fused {
                fix.latitude = prev.latitude;
                fix.longitude = prev.longitude;
            }
        }

        // Confidence buffer
        self.confidence.increment();
        if self.confidence.is_full() && self.motion_feature_active() {
            self.last_movement_nanos = now;
            if self.power_state == PowerState::SoftSleep {
                debug!("{} valid fixes in a row, leaving soft sleep", self.confidence.value());
                self.power_state = PowerState::Active;
                events.push(FusionEvent::WokeUp {
                    from: PowerState::SoftSleep,
                    cause: WakeCause::GpsConfidence,
                });
            }
        }

        // Soft-sleep gate
        if self.power_state == PowerState::SoftSleep && !self.confidence.is_full() {
            events.push(FusionEvent::SuppressedInSoftSleep { confidence: self.confidence.value() });
            return events;
        }

        let source = if is_just_stopping { FixSource::Stop } else { FixSource::Valid };
        self.publish(fix, source, bearing_origin, gps_bearing, &mut events);
        events
    }

    // ── Queries ──────────────────────────────────────────────────────────

    pub fn last_known_fused_fix(&self) -> Option<FusedFix> {
        self.last_fused
    }

    pub fn power_state(&self) -> PowerState {
        self.power_state
    }

    pub fn snapshot(&self) -> FusionSnapshot {
        FusionSnapshot {
            session_id: self.session.as_ref().map(|s| s.session_id.clone()),
            power_state: self.power_state,
            confidence: self.confidence.value(),
            ignored_fixes: self.ignored.count(),
            compass_bearing: self.heading.current(),
            compass_mode: self.use_compass_mode,
            motion_sensor_enabled: self.motion_sensor_enabled,
            motion_feature_active: self.motion_feature_active(),
            has_compass: self.has_compass,
            has_accelerometer: self.has_accelerometer,
            published: self.published,
            compass_samples: self.heading.samples(),
            accel_samples: self.motion_gate.samples(),
            movement_samples: self.motion_gate.movements(),
        }
    }

    // ── Internal helpers ─────────────────────────────────────────────────

    fn now(&self) -> i64 {
        self.platform.clock.now_nanos()
    }

    fn motion_feature_active(&self) -> bool {
        self.motion_sensor_enabled && self.has_accelerometer
    }

    fn start_provider(&mut self) {
        self.platform.provider.start_updates(self.config.update_interval());
        self.provider_running = true;
    }

    fn register_sensors(&mut self) -> Vec<FusionEvent> {
        let mut events = Vec::new();
        self.has_compass = self.platform.sensors.register_orientation();
        if !self.has_compass {
            warn!("{}", TrackerError::SensorUnavailable("orientation".to_string()));
            events.push(FusionEvent::SensorUnavailable { sensor: "orientation" });
        }
        self.has_accelerometer = false;
        if self.motion_sensor_enabled {
            self.has_accelerometer = self.platform.sensors.register_accelerometer();
            if !self.has_accelerometer {
                warn!("{}", TrackerError::SensorUnavailable("accelerometer".to_string()));
                events.push(FusionEvent::SensorUnavailable { sensor: "accelerometer" });
            }
        }
        events
    }

    fn seed_from_cache(&mut self, cached: RawFix) -> Vec<FusionEvent> {
        let mut events = Vec::new();
        if let Err(e) = cached.validate() {
            warn!("cached {e}");
            events.push(FusionEvent::InvalidFix { reason: e.to_string() });
            return events;
        }
        let origin = if cached.has_bearing() { BearingOrigin::Raw } else { BearingOrigin::None };
        self.publish(cached, FixSource::Cache, origin, cached.bearing_deg, &mut events);
        events
    }

    fn publish(
        &mut self,
        fix: RawFix,
        source: FixSource,
        bearing_origin: BearingOrigin,
        gps_bearing: Option<f64>,
        events: &mut Vec<FusionEvent>,
    ) {
        let (distance_m, accel) = match self.last_fused {
            Some(prev) => {
                let dt = (fix.timestamp_nanos - prev.timestamp_nanos) as f64 / 1e9;
                let accel = if dt > 0.0 { (fix.speed_mps - prev.speed_mps) / dt } else { 0.0 };
                (prev.distance_to(&fix), accel)
            }
            None => (0.0, 0.0),
        };

        let fused = FusedFix::from_raw(&fix, source, bearing_origin);
        self.ignored.reset();
        self.last_fused = Some(fused);
        self.published += 1;

        debug!(
            "{:?} | {:.6}, {:.6} | dist {:.2} m | gps({:?}) {} vs compass {} -> used {} | speed {:.2} m/s | accel {:.2} m/s²",
            source,
            fused.latitude,
            fused.longitude,
            distance_m,
            bearing_origin,
            fmt_bearing(gps_bearing),
            fmt_bearing(self.heading.current()),
            fmt_bearing(fused.bearing_deg),
            fused.speed_mps,
            accel,
        );

        let send_failed = self
            .outlet
            .as_ref()
            .map(|outlet| outlet.send(fused).is_err())
            .unwrap_or(false);
        if send_failed {
            warn!("fused fix receiver dropped, publishing to snapshot only");
            self.outlet = None;
            events.push(FusionEvent::OutletClosed);
        }
        events.push(FusionEvent::Published { source, bearing_origin, distance_m });
    }

    fn reset_session_state(&mut self) {
        self.power_state = PowerState::Active;
        self.confidence.reset();
        self.ignored.reset();
        self.use_compass_mode = true;
        self.heading.reset();
        self.motion_gate.reset();
        self.has_compass = false;
        self.has_accelerometer = false;
        self.published = 0;
    }
}

fn fmt_bearing(bearing: Option<f64>) -> String {
    bearing.map(|b| format!("{b:.1}°")).unwrap_or_else(|| "-".to_string())
}
