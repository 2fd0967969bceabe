//! Offline replay of recorded sessions.
//!
//! Logs are JSON (optionally gzip-compressed) with a flat `readings` array; each
//! reading carries a timestamp in seconds and any of a position fix, a linear
//! acceleration, an azimuth or a rotation vector. The replay drives a
//! [`FusionEngine`] on a manual clock so results are deterministic, and honours
//! the engine's provider stop/resume requests by skipping fixes while stopped.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam::channel;
use flate2::read::GzDecoder;
use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::config::TrackerConfig;
use crate::engine::{FusionEngine, FusionEvent};
use crate::error::{TrackerError, TrackerResult};
use crate::platform::{ManualClock, MotionSensors, Platform, PositionProvider, StaticPermission};
use crate::predictor::DeadReckoningPredictor;
use crate::types::{
    distance_m, AccelSample, FixSource, FusedFix, PowerState, RawFix, RotationVectorSample,
};

// ─── Log format ──────────────────────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GpsData {
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub speed: f64,
    #[serde(default)]
    pub bearing: Option<f64>,
    #[serde(default)]
    pub accuracy: f64,
}

impl GpsData {
    fn to_fix(&self, timestamp_nanos: i64) -> RawFix {
        RawFix {
            latitude: self.latitude,
            longitude: self.longitude,
            speed_mps: self.speed,
            bearing_deg: self.bearing,
            accuracy_m: self.accuracy,
            timestamp_nanos,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AccelData {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RotationData {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub w: f64,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    /// Seconds since the start of the recording
    pub timestamp: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gps: Option<GpsData>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accel: Option<AccelData>,
    /// Raw azimuth in degrees
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub orientation: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rotation: Option<RotationData>,
}

impl Reading {
    pub fn timestamp_nanos(&self) -> i64 {
        (self.timestamp * 1e9).round() as i64
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionLog {
    /// Fix the platform had cached before recording started
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cached_fix: Option<GpsData>,
    /// Overrides the configured motion-sensor flag when present
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub motion_sensor: Option<bool>,
    pub readings: Vec<Reading>,
}

impl SessionLog {
    fn has_compass(&self) -> bool {
        self.readings
            .iter()
            .any(|r| r.orientation.is_some() || r.rotation.is_some())
    }

    fn has_accelerometer(&self) -> bool {
        self.readings.iter().any(|r| r.accel.is_some())
    }
}

/// Load a `.json` or `.json.gz` session log
pub fn load_log(path: &Path) -> TrackerResult<SessionLog> {
    let file = File::open(path).map_err(|e| TrackerError::Replay(format!("{}: {e}", path.display())))?;
    let gzipped = path.extension().map(|e| e == "gz").unwrap_or(false);
    parse_log(file, gzipped).map_err(|e| match e {
        TrackerError::Replay(msg) => TrackerError::Replay(format!("{}: {msg}", path.display())),
        other => other,
    })
}

pub fn parse_log<R: Read>(reader: R, gzipped: bool) -> TrackerResult<SessionLog> {
    let parsed = if gzipped {
        serde_json::from_reader(BufReader::new(GzDecoder::new(reader)))
    } else {
        serde_json::from_reader(BufReader::new(reader))
    };
    parsed.map_err(|e| TrackerError::Replay(e.to_string()))
}

// ─── Replay platform ─────────────────────────────────────────────────────────

struct ReplayProvider {
    running: Arc<AtomicBool>,
    cached: Option<RawFix>,
}

impl PositionProvider for ReplayProvider {
    fn start_updates(&mut self, interval: Duration) {
        debug!("replay provider started ({} ms)", interval.as_millis());
        self.running.store(true, Ordering::SeqCst);
    }

    fn stop_updates(&mut self) {
        debug!("replay provider stopped");
        self.running.store(false, Ordering::SeqCst);
    }

    fn last_known_fix(&self) -> Option<RawFix> {
        self.cached
    }
}

struct ReplaySensors {
    has_compass: bool,
    has_accelerometer: bool,
}

impl MotionSensors for ReplaySensors {
    fn register_orientation(&mut self) -> bool {
        self.has_compass
    }

    fn register_accelerometer(&mut self) -> bool {
        self.has_accelerometer
    }

    fn unregister_all(&mut self) {}
}

// ─── Report ──────────────────────────────────────────────────────────────────

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct SourceCounts {
    pub cache: usize,
    pub valid: usize,
    pub stop: usize,
    pub forced: usize,
}

impl SourceCounts {
    pub(crate) fn record(&mut self, source: FixSource) {
        match source {
            FixSource::Cache => self.cache += 1,
            FixSource::Valid => self.valid += 1,
            FixSource::Stop => self.stop += 1,
            FixSource::Forced => self.forced += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.cache + self.valid + self.stop + self.forced
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ReplayReport {
    pub readings: usize,
    pub fixes_in: usize,
    /// Fixes dropped because the engine had stopped the provider
    pub fixes_while_stopped: usize,
    pub published: SourceCounts,
    pub noise_discarded: usize,
    pub suppressed_in_soft_sleep: usize,
    pub invalid: usize,
    pub soft_sleeps: usize,
    pub hard_sleeps: usize,
    pub wake_ups: usize,
    pub final_power_state: PowerState,
    /// Length of the published track
    pub track_length_m: f64,
    /// RMSE between each published fix and the position predicted for it
    pub prediction_rmse_m: Option<f64>,
    pub fused: Vec<FusedFix>,
}

impl ReplayReport {
    fn new(readings: usize) -> Self {
        Self {
            readings,
            fixes_in: 0,
            fixes_while_stopped: 0,
            published: SourceCounts::default(),
            noise_discarded: 0,
            suppressed_in_soft_sleep: 0,
            invalid: 0,
            soft_sleeps: 0,
            hard_sleeps: 0,
            wake_ups: 0,
            final_power_state: PowerState::Active,
            track_length_m: 0.0,
            prediction_rmse_m: None,
            fused: Vec::new(),
        }
    }

    fn tally(&mut self, events: &[FusionEvent]) {
        for event in events {
            match event {
                FusionEvent::Published { source, .. } => self.published.record(*source),
                FusionEvent::NoiseDiscarded { .. } => self.noise_discarded += 1,
                FusionEvent::SuppressedInSoftSleep { .. } => self.suppressed_in_soft_sleep += 1,
                FusionEvent::InvalidFix { .. } => self.invalid += 1,
                FusionEvent::SoftSleepEntered { .. } => self.soft_sleeps += 1,
                FusionEvent::HardSleepEntered { .. } => self.hard_sleeps += 1,
                FusionEvent::WokeUp { .. } => self.wake_ups += 1,
                _ => {}
            }
        }
    }
}

fn rmse(errors: &[f64]) -> Option<f64> {
    if errors.is_empty() {
        return None;
    }
    let sum_sq: f64 = errors.iter().map(|e| e.powi(2)).sum();
    Some((sum_sq / errors.len() as f64).sqrt())
}

// ─── Driver ──────────────────────────────────────────────────────────────────

/// Run a whole session log through a fresh engine
pub fn replay(log: &SessionLog, config: &TrackerConfig) -> TrackerResult<ReplayReport> {
    let mut config = config.clone();
    if let Some(enabled) = log.motion_sensor {
        config.motion_sensor_enabled = enabled;
    }

    let start_nanos = log.readings.first().map(Reading::timestamp_nanos).unwrap_or(0);
    let clock = ManualClock::new(start_nanos);
    let running = Arc::new(AtomicBool::new(false));
    let platform = Platform {
        provider: Box::new(ReplayProvider {
            running: running.clone(),
            cached: log.cached_fix.as_ref().map(|g| g.to_fix(start_nanos)),
        }),
        sensors: Box::new(ReplaySensors {
            has_compass: log.has_compass(),
            has_accelerometer: log.has_accelerometer(),
        }),
        permission: Box::new(StaticPermission(true)),
        clock: Arc::new(clock.clone()),
    };

    let mut predictor = DeadReckoningPredictor::new(&config);
    let mut engine = FusionEngine::new(config, platform)?;
    let (tx, rx) = channel::unbounded();
    let mut report = ReplayReport::new(log.readings.len());
    let mut errors = Vec::new();

    report.tally(&engine.open(tx)?);

    for reading in &log.readings {
        let t = reading.timestamp_nanos();
        clock.set_nanos(t);

        if let Some(rotation) = &reading.rotation {
            let sample = RotationVectorSample::new(rotation.x, rotation.y, rotation.z, rotation.w, t);
            engine.on_rotation_vector(&sample);
        }
        if let Some(azimuth) = reading.orientation {
            engine.on_orientation(azimuth);
        }
        if let Some(accel) = &reading.accel {
            report.tally(&engine.on_acceleration(&AccelSample::new(accel.x, accel.y, accel.z, t)));
        }
        if let Some(gps) = &reading.gps {
            report.fixes_in += 1;
            if running.load(Ordering::SeqCst) {
                report.tally(&engine.on_raw_fix(&gps.to_fix(t)));
            } else {
                report.fixes_while_stopped += 1;
            }
        }

        for fused in rx.try_iter() {
            if let Some((lat, lon)) = predictor.last_known() {
                report.track_length_m += distance_m(lat, lon, fused.latitude, fused.longitude);
                let (p_lat, p_lon) = predictor.predict(fused.timestamp_nanos);
                errors.push(distance_m(p_lat, p_lon, fused.latitude, fused.longitude));
            }
            predictor.update(&fused);
            report.fused.push(fused);
        }
    }

    report.final_power_state = engine.power_state();
    report.tally(&engine.close());
    report.prediction_rmse_m = rmse(&errors);

    info!(
        "replayed {} readings: {} fixes in, {} published ({} forced), final state {:?}",
        report.readings,
        report.fixes_in,
        report.published.total(),
        report.published.forced,
        report.final_power_state
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;

    fn gps(lat: f64, lon: f64, speed: f64) -> GpsData {
        GpsData {
            latitude: lat,
            longitude: lon,
            speed,
            bearing: None,
            accuracy: 5.0,
        }
    }

    fn gps_reading(t: f64, lat: f64, lon: f64, speed: f64) -> Reading {
        Reading {
            timestamp: t,
            gps: Some(gps(lat, lon, speed)),
            ..Reading::default()
        }
    }

    /// 1 Hz walk north at ~1.4 m/s for the given number of seconds
    fn walk(seconds: usize) -> Vec<Reading> {
        (0..seconds)
            .map(|i| gps_reading(i as f64, 40.0 + i as f64 * 1.4 / 111_132.0, -3.0, 1.4))
            .collect()
    }

    #[test]
    fn test_parse_plain_json() {
        let text = r#"{"readings": [
            {"timestamp": 0.0, "gps": {"latitude": 40.0, "longitude": -3.0, "speed": 1.2}},
            {"timestamp": 0.02, "accel": {"x": 0.1, "y": 0.0, "z": 0.2}},
            {"timestamp": 0.04, "orientation": 185.0}
        ]}"#;
        let log = parse_log(text.as_bytes(), false).unwrap();
        assert_eq!(log.readings.len(), 3);
        assert!(log.has_accelerometer());
        assert!(log.has_compass());
        assert_eq!(log.readings[1].timestamp_nanos(), 20_000_000);
    }

    #[test]
    fn test_parse_gzipped_json() {
        let log = SessionLog {
            readings: walk(3),
            ..SessionLog::default()
        };
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder
            .write_all(serde_json::to_string(&log).unwrap().as_bytes())
            .unwrap();
        let bytes = encoder.finish().unwrap();

        let parsed = parse_log(bytes.as_slice(), true).unwrap();
        assert_eq!(parsed, log);
    }

    #[test]
    fn test_malformed_log_is_replay_error() {
        let err = parse_log("{\"readings\": 3}".as_bytes(), false).unwrap_err();
        assert!(matches!(err, TrackerError::Replay(_)));
        assert!(matches!(
            load_log(Path::new("/nonexistent/session.json")),
            Err(TrackerError::Replay(_))
        ));
    }

    #[test]
    fn test_walk_publishes_every_fix() {
        let log = SessionLog {
            readings: walk(30),
            ..SessionLog::default()
        };
        let report = replay(&log, &TrackerConfig::default()).unwrap();
        assert_eq!(report.fixes_in, 30);
        assert_eq!(report.published.valid, 30);
        assert_eq!(report.noise_discarded, 0);
        assert!((report.track_length_m - 29.0 * 1.4).abs() < 0.1);
        // straight line at constant speed, bearing 0 by default
        assert!(report.prediction_rmse_m.unwrap() < 0.05);
    }

    #[test]
    fn test_cached_fix_counted() {
        let log = SessionLog {
            cached_fix: Some(gps(40.0, -3.0, 0.0)),
            readings: walk(2),
            ..SessionLog::default()
        };
        let report = replay(&log, &TrackerConfig::default()).unwrap();
        assert_eq!(report.published.cache, 1);
        assert_eq!(report.fused[0].source, FixSource::Cache);
    }

    #[test]
    fn test_stationary_log_only_heartbeats() {
        let readings = (0..43).map(|i| gps_reading(i as f64, 40.0, -3.0, 0.0)).collect();
        let log = SessionLog {
            readings,
            ..SessionLog::default()
        };
        let report = replay(&log, &TrackerConfig::default()).unwrap();
        // first fix, then a heartbeat after every 21 discarded fixes
        assert_eq!(report.published.valid, 1);
        assert_eq!(report.published.forced, 2);
        assert_eq!(report.noise_discarded, 40);
    }

    #[test]
    fn test_idle_device_stops_provider_until_motion() {
        let mut readings: Vec<Reading> =
            (0..100).map(|i| gps_reading(i as f64, 40.0, -3.0, 0.0)).collect();
        readings.push(Reading {
            timestamp: 100.5,
            accel: Some(AccelData { x: 0.0, y: 1.5, z: 0.0 }),
            ..Reading::default()
        });
        readings.extend((101..104).map(|i| gps_reading(i as f64, 40.0, -3.0, 0.0)));
        let log = SessionLog {
            motion_sensor: Some(true),
            readings,
            ..SessionLog::default()
        };

        let report = replay(&log, &TrackerConfig::default()).unwrap();
        assert_eq!(report.soft_sleeps, 1);
        assert_eq!(report.hard_sleeps, 1);
        // fixes 92..=99 arrive while the provider is stopped
        assert_eq!(report.fixes_while_stopped, 8);
        assert_eq!(report.wake_ups, 1);
        assert_eq!(report.final_power_state, PowerState::Active);
    }

    #[test]
    fn test_rmse() {
        assert_eq!(rmse(&[]), None);
        assert_eq!(rmse(&[3.0, 4.0]), Some((12.5f64).sqrt()));
    }
}
