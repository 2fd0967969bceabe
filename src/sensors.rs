//! Simulated producers for the `simulate` command.
//!
//! Each sensor is a tokio task posting into the service inlet at its own rate,
//! with sin-based mock data following a scripted walk / stand-still plan. Time
//! runs `speedup` times faster than the wall clock so the duty cycle can be
//! watched without waiting minutes for the sleep timeouts.

use std::f64::consts::PI;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crossbeam::channel;
use log::{debug, info, trace};
use serde::{Deserialize, Serialize};
use tokio::time::{interval, Duration, MissedTickBehavior};

use crate::config::TrackerConfig;
use crate::engine::{FusionEngine, FusionSnapshot};
use crate::error::{TrackerError, TrackerResult};
use crate::platform::{Clock, MotionSensors, Platform, PositionProvider, StaticPermission};
use crate::predictor::DeadReckoningPredictor;
use crate::replay::SourceCounts;
use crate::service::{LocationService, SensorInlet, TrackerInput};
use crate::types::{normalize_degrees, AccelSample, FusedFix, RawFix, METERS_PER_DEGREE_LAT};

const GPS_PERIOD: Duration = Duration::from_secs(1);
const ACCEL_PERIOD: Duration = Duration::from_millis(100);
const ORIENTATION_PERIOD: Duration = Duration::from_millis(200);
const RENDER_PERIOD: Duration = Duration::from_millis(100);

// ─── Plan ────────────────────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub enum Activity {
    Walking { speed_mps: f64 },
    Still,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Phase {
    pub activity: Activity,
    pub secs: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SimulationPlan {
    pub origin_lat: f64,
    pub origin_lon: f64,
    pub heading_deg: f64,
    pub phases: Vec<Phase>,
    /// Simulated seconds per wall-clock second
    pub speedup: f64,
}

impl Default for SimulationPlan {
    fn default() -> Self {
        Self {
            origin_lat: 40.4168,
            origin_lon: -3.7038,
            heading_deg: 60.0,
            phases: vec![
                Phase { activity: Activity::Walking { speed_mps: 1.4 }, secs: 60.0 },
                Phase { activity: Activity::Still, secs: 120.0 },
                Phase { activity: Activity::Walking { speed_mps: 1.4 }, secs: 60.0 },
            ],
            speedup: 20.0,
        }
    }
}

impl SimulationPlan {
    pub fn total_secs(&self) -> f64 {
        self.phases.iter().map(|p| p.secs).sum()
    }

    /// Activity at `t` seconds; the last phase extends past the end
    pub fn activity_at(&self, t: f64) -> Activity {
        let mut start = 0.0;
        for phase in &self.phases {
            if t < start + phase.secs {
                return phase.activity;
            }
            start += phase.secs;
        }
        self.phases.last().map(|p| p.activity).unwrap_or(Activity::Still)
    }

    /// Metres walked by `t` seconds
    pub fn distance_at(&self, t: f64) -> f64 {
        let mut start = 0.0;
        let mut distance = 0.0;
        for phase in &self.phases {
            let within = (t - start).clamp(0.0, phase.secs);
            if let Activity::Walking { speed_mps } = phase.activity {
                distance += speed_mps * within;
            }
            start += phase.secs;
        }
        distance
    }

    /// True track position at `t` seconds
    pub fn position_at(&self, t: f64) -> (f64, f64) {
        self.offset(self.distance_at(t), self.heading_deg)
    }

    fn offset(&self, distance_m: f64, bearing_deg: f64) -> (f64, f64) {
        let bearing = bearing_deg.to_radians();
        let lat = self.origin_lat + distance_m * bearing.cos() / METERS_PER_DEGREE_LAT;
        let lon = self.origin_lon
            + distance_m * bearing.sin() / (METERS_PER_DEGREE_LAT * self.origin_lat.to_radians().cos());
        (lat, lon)
    }

    fn real_period(&self, simulated: Duration) -> Duration {
        let secs = simulated.as_secs_f64() / self.speedup.max(1e-3);
        Duration::from_secs_f64(secs).max(Duration::from_millis(1))
    }
}

// ─── Simulated platform ──────────────────────────────────────────────────────

/// Wall clock scaled by the plan's speedup
pub struct ScaledClock {
    origin: Instant,
    speedup: f64,
}

impl ScaledClock {
    pub fn new(speedup: f64) -> Self {
        Self { origin: Instant::now(), speedup }
    }
}

impl Clock for ScaledClock {
    fn now_nanos(&self) -> i64 {
        (self.origin.elapsed().as_secs_f64() * self.speedup * 1e9) as i64
    }
}

struct SimulatedProvider {
    running: Arc<AtomicBool>,
}

impl PositionProvider for SimulatedProvider {
    fn start_updates(&mut self, interval: Duration) {
        info!("[gps] updates requested every {} ms", interval.as_millis());
        self.running.store(true, Ordering::SeqCst);
    }

    fn stop_updates(&mut self) {
        info!("[gps] updates stopped");
        self.running.store(false, Ordering::SeqCst);
    }

    fn last_known_fix(&self) -> Option<RawFix> {
        None
    }
}

struct SimulatedSensors;

impl MotionSensors for SimulatedSensors {
    fn register_orientation(&mut self) -> bool {
        true
    }

    fn register_accelerometer(&mut self) -> bool {
        true
    }

    fn unregister_all(&mut self) {}
}

// ─── Mock data ───────────────────────────────────────────────────────────────

fn mock_fix(plan: &SimulationPlan, t_nanos: i64) -> RawFix {
    let t = t_nanos as f64 / 1e9;
    let (lat, lon) = plan.position_at(t);
    // sub-metre receiver wander
    let north = (t * 0.7).sin() * 0.8 / METERS_PER_DEGREE_LAT;
    let east = (t * 1.3).cos() * 0.8 / (METERS_PER_DEGREE_LAT * lat.to_radians().cos());

    let mut fix = RawFix::new(lat + north, lon + east, t_nanos).with_accuracy(5.0 + (t * 0.1).sin() * 2.0);
    match plan.activity_at(t) {
        Activity::Walking { speed_mps } => {
            fix.speed_mps = (speed_mps + (t * 0.5).sin() * 0.2).max(0.0);
            fix.bearing_deg = Some(normalize_degrees(plan.heading_deg + (t * 0.3).sin() * 3.0));
        }
        Activity::Still => {
            fix.speed_mps = (t * 0.9).sin().abs() * 0.3;
        }
    }
    fix
}

fn mock_accel(plan: &SimulationPlan, t_nanos: i64) -> AccelSample {
    let t = t_nanos as f64 / 1e9;
    let (x, y, z) = match plan.activity_at(t) {
        // ~1.8 Hz step cadence
        Activity::Walking { .. } => (
            (t * 2.0 * PI * 1.8).sin() * 1.2,
            (t * 2.0 * PI * 1.8).cos() * 0.6,
            (t * PI).sin() * 0.3,
        ),
        Activity::Still => ((t * 3.1).sin() * 0.05, (t * 2.3).cos() * 0.05, 0.02),
    };
    AccelSample::new(x, y, z, t_nanos)
}

fn mock_azimuth(plan: &SimulationPlan, t_nanos: i64) -> f64 {
    let t = t_nanos as f64 / 1e9;
    plan.heading_deg + (t * 0.9).sin() * 4.0
}

// ─── Producer loops ──────────────────────────────────────────────────────────

pub async fn gps_loop(
    inlet: SensorInlet,
    plan: Arc<SimulationPlan>,
    clock: Arc<ScaledClock>,
    running: Arc<AtomicBool>,
) {
    let mut ticker = interval(plan.real_period(GPS_PERIOD));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut fix_count = 0u64;

    loop {
        ticker.tick().await;
        if !running.load(Ordering::SeqCst) {
            continue;
        }
        let fix = mock_fix(&plan, clock.now_nanos());
        if inlet.post(TrackerInput::Fix(fix)).is_err() {
            debug!("[gps] inlet closed after {} fixes", fix_count);
            break;
        }
        fix_count += 1;
        if fix_count % 30 == 0 {
            debug!("[gps] {} fixes", fix_count);
        }
    }
}

pub async fn accel_loop(inlet: SensorInlet, plan: Arc<SimulationPlan>, clock: Arc<ScaledClock>) {
    let mut ticker = interval(plan.real_period(ACCEL_PERIOD));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut sample_count = 0u64;

    loop {
        ticker.tick().await;
        let sample = mock_accel(&plan, clock.now_nanos());
        if inlet.post(TrackerInput::Acceleration(sample)).is_err() {
            debug!("[accel] inlet closed after {} samples", sample_count);
            break;
        }
        sample_count += 1;
    }
}

pub async fn orientation_loop(inlet: SensorInlet, plan: Arc<SimulationPlan>, clock: Arc<ScaledClock>) {
    let mut ticker = interval(plan.real_period(ORIENTATION_PERIOD));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        ticker.tick().await;
        let azimuth = mock_azimuth(&plan, clock.now_nanos());
        if inlet.post(TrackerInput::Orientation(azimuth)).is_err() {
            debug!("[orientation] inlet closed");
            break;
        }
    }
}

// ─── Driver ──────────────────────────────────────────────────────────────────

#[derive(Clone, Debug, Serialize)]
pub struct SimulationReport {
    pub simulated_secs: f64,
    pub published: SourceCounts,
    /// Render ticks that produced a dead-reckoned position
    pub frames: u64,
    pub final_state: FusionSnapshot,
    pub last_fix: Option<FusedFix>,
}

/// Run the plan against a live service until the simulated time runs out
pub async fn run_simulation(plan: SimulationPlan, config: TrackerConfig) -> TrackerResult<SimulationReport> {
    let plan = Arc::new(plan);
    let clock = Arc::new(ScaledClock::new(plan.speedup));
    let running = Arc::new(AtomicBool::new(false));
    let platform = Platform {
        provider: Box::new(SimulatedProvider { running: running.clone() }),
        sensors: Box::new(SimulatedSensors),
        permission: Box::new(StaticPermission(true)),
        clock: clock.clone(),
    };

    let mut predictor = DeadReckoningPredictor::new(&config);
    let service = Arc::new(LocationService::spawn(FusionEngine::new(config, platform)?)?);
    let (outlet, fused_rx) = channel::unbounded();
    off_runtime(&service, move |s| s.open(outlet)).await?;

    let inlet = service.inlet();
    let producers = [
        tokio::spawn(gps_loop(inlet.clone(), plan.clone(), clock.clone(), running)),
        tokio::spawn(accel_loop(inlet.clone(), plan.clone(), clock.clone())),
        tokio::spawn(orientation_loop(inlet, plan.clone(), clock.clone())),
    ];

    let mut published = SourceCounts::default();
    let mut frames = 0u64;
    let mut render = interval(plan.real_period(RENDER_PERIOD));
    render.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let end_secs = plan.total_secs();

    loop {
        render.tick().await;
        for fused in fused_rx.try_iter() {
            info!(
                "[fix] t={:.1}s {:?} {:.6}, {:.6} speed {:.2} m/s",
                fused.timestamp_nanos as f64 / 1e9,
                fused.source,
                fused.latitude,
                fused.longitude,
                fused.speed_mps
            );
            published.record(fused.source);
            predictor.update(&fused);
        }

        let now = clock.now_nanos();
        if predictor.last_known().is_some() {
            let (lat, lon) = predictor.predict(now);
            trace!("[render] {:.7}, {:.7}", lat, lon);
            frames += 1;
        }
        if now as f64 / 1e9 >= end_secs {
            break;
        }
    }

    for producer in &producers {
        producer.abort();
    }
    let final_state = off_runtime(&service, |s| s.snapshot()).await?;
    for fused in fused_rx.try_iter() {
        published.record(fused.source);
    }
    off_runtime(&service, |s| s.close()).await?;
    let last_fix = service.last_known_fused_fix();
    // dropping the last handle joins the worker thread
    tokio::task::spawn_blocking(move || drop(service))
        .await
        .map_err(|e| TrackerError::Worker(e.to_string()))?;

    Ok(SimulationReport {
        simulated_secs: clock.now_nanos() as f64 / 1e9,
        published,
        frames,
        final_state,
        last_fix,
    })
}

/// Service calls wait on the worker's reply channel, so they run on the blocking pool
async fn off_runtime<T, F>(service: &Arc<LocationService>, call: F) -> TrackerResult<T>
where
    T: Send + 'static,
    F: FnOnce(&LocationService) -> TrackerResult<T> + Send + 'static,
{
    let service = service.clone();
    tokio::task::spawn_blocking(move || call(&service))
        .await
        .map_err(|e| TrackerError::Worker(e.to_string()))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::distance_m;
    use approx::assert_relative_eq;

    fn short_plan() -> SimulationPlan {
        SimulationPlan {
            phases: vec![
                Phase { activity: Activity::Walking { speed_mps: 2.0 }, secs: 10.0 },
                Phase { activity: Activity::Still, secs: 5.0 },
            ],
            speedup: 100.0,
            ..SimulationPlan::default()
        }
    }

    #[test]
    fn test_plan_timeline() {
        let plan = short_plan();
        assert_relative_eq!(plan.total_secs(), 15.0);
        assert_eq!(plan.activity_at(3.0), Activity::Walking { speed_mps: 2.0 });
        assert_eq!(plan.activity_at(12.0), Activity::Still);
        assert_eq!(plan.activity_at(99.0), Activity::Still);
        assert_relative_eq!(plan.distance_at(5.0), 10.0);
        assert_relative_eq!(plan.distance_at(14.0), 20.0);
    }

    #[test]
    fn test_position_follows_heading() {
        let plan = short_plan();
        let (lat0, lon0) = plan.position_at(0.0);
        let (lat, lon) = plan.position_at(10.0);
        assert!(lat > lat0 && lon > lon0);
        assert!((distance_m(lat0, lon0, lat, lon) - 20.0).abs() < 0.1);
    }

    #[test]
    fn test_mock_accel_separates_walking_from_still() {
        let plan = short_plan();
        let walking_moves = (0..50)
            .map(|i| mock_accel(&plan, i * 100_000_000).magnitude())
            .filter(|m| *m > 0.5)
            .count();
        assert!(walking_moves > 25);
        let still_max = (110..150)
            .map(|i| mock_accel(&plan, i * 100_000_000).magnitude())
            .fold(0.0, f64::max);
        assert!(still_max < 0.1);
    }

    #[test]
    fn test_mock_fix_still_is_slow_without_bearing() {
        let plan = short_plan();
        let fix = mock_fix(&plan, 12_000_000_000);
        assert!(fix.speed_mps <= 0.3);
        assert!(!fix.has_bearing());
        assert!(fix.validate().is_ok());
        let walking = mock_fix(&plan, 2_000_000_000);
        assert!(walking.speed_mps > 1.5);
        assert!(walking.has_bearing());
    }

    #[test]
    fn test_real_period_scales() {
        let plan = short_plan();
        assert_relative_eq!(plan.real_period(Duration::from_secs(1)).as_secs_f64(), 0.01, epsilon = 1e-9);
        assert_eq!(plan.real_period(Duration::from_micros(10)), Duration::from_millis(1));
    }

    #[tokio::test]
    async fn test_simulation_publishes_fixes() {
        let report = run_simulation(short_plan(), TrackerConfig::default()).await.unwrap();
        assert!(report.simulated_secs >= 15.0);
        assert!(report.published.total() > 0);
        assert!(report.last_fix.is_some());
        assert!(report.final_state.session_id.is_some());
    }
}
