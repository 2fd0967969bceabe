use crate::types::AccelSample;

/// Threshold detector on linear-acceleration magnitude.
///
/// Only answers "did the subject physically move"; the engine decides what
/// that means for the duty cycle.
#[derive(Clone, Debug)]
pub struct MotionGate {
    threshold: f64,
    samples: u64,
    movements: u64,
}

impl MotionGate {
    pub fn new(threshold: f64) -> Self {
        MotionGate {
            threshold,
            samples: 0,
            movements: 0,
        }
    }

    /// True when the sample's magnitude is strictly above the threshold
    pub fn is_movement(&mut self, sample: &AccelSample) -> bool {
        if !sample.is_finite() {
            return false;
        }
        self.samples += 1;
        let moved = sample.magnitude() > self.threshold;
        if moved {
            self.movements += 1;
        }
        moved
    }

    pub fn samples(&self) -> u64 {
        self.samples
    }

    pub fn movements(&self) -> u64 {
        self.movements
    }

    pub fn reset(&mut self) {
        self.samples = 0;
        self.movements = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_below_threshold_is_still() {
        let mut gate = MotionGate::new(0.5);
        assert!(!gate.is_movement(&AccelSample::new(0.1, 0.2, 0.2, 0)));
        assert_eq!(gate.samples(), 1);
        assert_eq!(gate.movements(), 0);
    }

    #[test]
    fn test_threshold_is_exclusive() {
        let mut gate = MotionGate::new(0.5);
        assert!(!gate.is_movement(&AccelSample::new(0.0, 0.5, 0.0, 0)));
        assert!(gate.is_movement(&AccelSample::new(0.0, 0.51, 0.0, 0)));
    }

    #[test]
    fn test_combines_all_axes() {
        let mut gate = MotionGate::new(0.5);
        // each axis alone is below the threshold
        assert!(gate.is_movement(&AccelSample::new(0.4, 0.4, 0.4, 0)));
        assert_eq!(gate.movements(), 1);
    }

    #[test]
    fn test_non_finite_sample_dropped() {
        let mut gate = MotionGate::new(0.5);
        assert!(!gate.is_movement(&AccelSample::new(f64::NAN, 5.0, 0.0, 0)));
        assert_eq!(gate.samples(), 0);
    }

    #[test]
    fn test_reset_clears_counts() {
        let mut gate = MotionGate::new(0.5);
        gate.is_movement(&AccelSample::new(1.0, 0.0, 0.0, 0));
        gate.is_movement(&AccelSample::new(0.1, 0.0, 0.0, 0));
        assert_eq!((gate.samples(), gate.movements()), (2, 1));
        gate.reset();
        assert_eq!((gate.samples(), gate.movements()), (0, 0));
    }
}
