//! 32-bit wrapping millisecond clock.
//!
//! Timestamps are compared only through [`elapsed_ms`], which subtracts with
//! wraparound, so the counter rolling over after ~49 days is harmless.

use std::time::Instant;

/// Milliseconds since the clock was created, truncated to 32 bits.
#[derive(Debug, Clone, Copy)]
pub struct MillisClock {
    origin: Instant,
}

impl MillisClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }

    pub fn now_ms(&self) -> u32 {
        self.origin.elapsed().as_millis() as u32
    }
}

impl Default for MillisClock {
    fn default() -> Self {
        Self::new()
    }
}

/// Time from `earlier` to `now`, tolerant of one counter wrap.
pub fn elapsed_ms(now: u32, earlier: u32) -> u32 {
    now.wrapping_sub(earlier)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn elapsed_survives_wraparound() {
        assert_eq!(elapsed_ms(100, 40), 60);
        assert_eq!(elapsed_ms(5, u32::MAX - 4), 10);
    }
}
