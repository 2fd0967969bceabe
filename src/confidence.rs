/// Bounded counter of consecutive movement evidence from the position sensor.
///
/// Accepted fixes raise it, noise lowers it; both ends clamp.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MotionConfidence {
    value: u8,
    max: u8,
}

impl MotionConfidence {
    pub fn new(max: u8) -> Self {
        MotionConfidence { value: 0, max }
    }

    pub fn increment(&mut self) -> u8 {
        if self.value < self.max {
            self.value += 1;
        }
        self.value
    }

    pub fn decrement(&mut self) -> u8 {
        self.value = self.value.saturating_sub(1);
        self.value
    }

    /// Physical motion counts as full evidence
    pub fn fill(&mut self) {
        self.value = self.max;
    }

    pub fn reset(&mut self) {
        self.value = 0;
    }

    pub fn value(&self) -> u8 {
        self.value
    }

    pub fn is_full(&self) -> bool {
        self.value >= self.max
    }
}

/// Fixes discarded as noise since the last publication
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct IgnoredFixCounter {
    count: u32,
}

impl IgnoredFixCounter {
    pub fn increment(&mut self) -> u32 {
        self.count = self.count.saturating_add(1);
        self.count
    }

    pub fn reset(&mut self) {
        self.count = 0;
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    /// Heartbeat is due once the count exceeds the limit
    pub fn exceeds(&self, limit: u32) -> bool {
        self.count > limit
    }
}
