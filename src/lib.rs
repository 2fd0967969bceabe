//! Location fusion core: noise-filtered position fixes, compass/GPS bearing
//! fusion, an accelerometer-driven position-sensor duty cycle and a
//! dead-reckoning predictor for smooth rendering between fixes.

pub mod confidence;
pub mod config;
pub mod engine;
pub mod error;
pub mod heading;
pub mod motion_gate;
pub mod platform;
pub mod predictor;
pub mod replay;
pub mod sensors;
pub mod service;
pub mod types;

pub use config::TrackerConfig;
pub use engine::{FusionEngine, FusionEvent, FusionSnapshot, WakeCause};
pub use error::{TrackerError, TrackerResult};
pub use platform::{Clock, MotionSensors, PermissionGate, Platform, PositionProvider};
pub use predictor::DeadReckoningPredictor;
pub use service::{LocationService, SensorInlet, TrackerInput};
pub use types::{AccelSample, BearingOrigin, FixSource, FusedFix, PowerState, RawFix};
