use std::{
    cmp::Ordering,
    fmt,
    ops::{Add, Sub},
    time::Duration,
};

use serde::{Deserialize, Serialize};

#[cfg(target_os = "macos")]
mod macos;

/// A presentation time expressed as `value / timescale` seconds.
///
/// Comparison and arithmetic are exact across different timescales, so
/// timestamps produced by separate capture sources can be ordered without
/// going through floating point.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct MediaTime {
    pub value: i64,
    pub timescale: i32,
}

impl MediaTime {
    pub const ZERO: Self = Self::new(0, 1);

    pub const fn new(value: i64, timescale: i32) -> Self {
        Self { value, timescale }
    }

    pub fn from_secs_f64(secs: f64, timescale: i32) -> Self {
        Self::new((secs * timescale as f64).round() as i64, timescale)
    }

    pub fn from_duration(duration: Duration, timescale: i32) -> Self {
        let value = div_round(
            duration.as_nanos() as i128 * timescale as i128,
            1_000_000_000,
        );
        Self::new(value as i64, timescale)
    }

    pub fn is_valid(&self) -> bool {
        self.timescale > 0
    }

    pub fn as_secs_f64(&self) -> f64 {
        if !self.is_valid() {
            return 0.0;
        }

        self.value as f64 / self.timescale as f64
    }

    /// Converts to another timescale, rounding to the nearest tick.
    pub fn rescale(self, timescale: i32) -> Self {
        if self.timescale == timescale || !self.is_valid() {
            return Self::new(self.value, timescale);
        }

        let value = div_round(
            self.value as i128 * timescale as i128,
            self.timescale as i128,
        );
        Self::new(value as i64, timescale)
    }

    /// Position of this time on a sample timeline running at `rate` Hz.
    pub fn to_sample_index(self, rate: u32) -> i64 {
        self.rescale(rate as i32).value
    }

    pub fn from_sample_index(index: i64, rate: u32) -> Self {
        Self::new(index, rate as i32)
    }

    /// The `index`th point of a `1/fps` grid anchored at `start`.
    ///
    /// Points are always exactly `1/fps` apart. When `start` cannot share a
    /// timescale with `fps`, it is first rounded onto the finest multiple of
    /// `fps` that fits.
    pub fn frame_at(start: Self, index: u64, fps: u32) -> Self {
        let fps = fps.clamp(1, i32::MAX as u32) as i32;
        let start = start.reduced();
        let timescale = lcm(start.timescale, fps).unwrap_or(i32::MAX / fps * fps);
        let anchor = start.rescale(timescale);

        Self::new(anchor.value + index as i64 * (timescale / fps) as i64, timescale)
    }

    /// The same time with `value / timescale` in lowest terms.
    pub fn reduced(self) -> Self {
        if !self.is_valid() || self.value == 0 {
            return self;
        }

        let divisor = gcd(self.value, self.timescale as i64);
        Self::new(self.value / divisor, (self.timescale as i64 / divisor) as i32)
    }

    /// Number of `1/fps` grid points in `[self, end)`.
    pub fn frames_until(self, end: Self, fps: u32) -> u64 {
        let span = end - self;
        if span.value <= 0 || !span.is_valid() {
            return 0;
        }

        let numerator = span.value as i128 * fps as i128;
        let denominator = span.timescale as i128;
        ((numerator + denominator - 1) / denominator) as u64
    }

    pub fn as_duration(&self) -> Duration {
        Duration::from_secs_f64(self.as_secs_f64().max(0.0))
    }
}

impl Default for MediaTime {
    fn default() -> Self {
        Self::ZERO
    }
}

impl PartialEq for MediaTime {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for MediaTime {}

impl PartialOrd for MediaTime {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for MediaTime {
    fn cmp(&self, other: &Self) -> Ordering {
        let lhs = self.value as i128 * other.timescale.max(1) as i128;
        let rhs = other.value as i128 * self.timescale.max(1) as i128;
        lhs.cmp(&rhs)
    }
}

impl Add for MediaTime {
    type Output = Self;

    fn add(self, rhs: Self) -> Self::Output {
        let (lhs, rhs) = match self.timescale == rhs.timescale {
            true => (self, rhs),
            false => (self.reduced(), rhs.reduced()),
        };
        let timescale = common_timescale(lhs.timescale, rhs.timescale);
        Self::new(
            lhs.rescale(timescale).value + rhs.rescale(timescale).value,
            timescale,
        )
    }
}

impl Sub for MediaTime {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self::Output {
        let (lhs, rhs) = match self.timescale == rhs.timescale {
            true => (self, rhs),
            false => (self.reduced(), rhs.reduced()),
        };
        let timescale = common_timescale(lhs.timescale, rhs.timescale);
        Self::new(
            lhs.rescale(timescale).value - rhs.rescale(timescale).value,
            timescale,
        )
    }
}

impl fmt::Display for MediaTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.4}s", self.as_secs_f64())
    }
}

fn gcd(mut a: i64, mut b: i64) -> i64 {
    while b != 0 {
        (a, b) = (b, a % b);
    }
    a.abs()
}

fn lcm(a: i32, b: i32) -> Option<i32> {
    let (a, b) = (a.max(1) as i64, b.max(1) as i64);
    i32::try_from(a / gcd(a, b) * b).ok()
}

// Falls back to the finer of the two scales when the lcm overflows.
fn common_timescale(a: i32, b: i32) -> i32 {
    if a == b {
        return a;
    }

    lcm(a, b).unwrap_or(a.max(b).max(1))
}

fn div_round(numerator: i128, denominator: i128) -> i128 {
    if numerator >= 0 {
        (numerator + denominator / 2) / denominator
    } else {
        -((-numerator + denominator / 2) / denominator)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compares_across_timescales() {
        assert_eq!(MediaTime::new(1, 2), MediaTime::new(300, 600));
        assert!(MediaTime::new(1, 60) < MediaTime::new(801, 48_000));
        assert!(MediaTime::new(-1, 1000) < MediaTime::ZERO);
        assert_eq!(
            MediaTime::new(5, 30).max(MediaTime::new(9, 60)),
            MediaTime::new(5, 30)
        );
    }

    #[test]
    fn rescale_rounds_to_nearest() {
        assert_eq!(MediaTime::new(1, 3).rescale(1000).value, 333);
        assert_eq!(MediaTime::new(2, 3).rescale(1000).value, 667);
        assert_eq!(MediaTime::new(-2, 3).rescale(1000).value, -667);
    }

    #[test]
    fn sample_index_conversion() {
        assert_eq!(MediaTime::new(600, 600).to_sample_index(48_000), 48_000);
        assert_eq!(
            MediaTime::from_secs_f64(0.05, 1_000_000_000).to_sample_index(48_000),
            2_400
        );
        assert_eq!(MediaTime::from_sample_index(1024, 48_000).as_secs_f64(), 1024.0 / 48_000.0);
    }

    #[test]
    fn grid_points_are_exact() {
        let start = MediaTime::new(3, 600);

        let sixth = MediaTime::frame_at(start, 10, 60) - start;
        assert_eq!(sixth, MediaTime::new(1, 6));

        let a = MediaTime::frame_at(start, 59, 60);
        let b = MediaTime::frame_at(start, 60, 60);
        assert_eq!(b - a, MediaTime::new(1, 60));
    }

    #[test]
    fn grid_is_exact_from_nanosecond_anchor() {
        let start = MediaTime::new(5_000_000_000, 1_000_000_000);
        let step = MediaTime::frame_at(start, 1, 60) - MediaTime::frame_at(start, 0, 60);
        assert_eq!(step, MediaTime::new(1, 60));

        let start = MediaTime::new(5_000_000_001, 1_000_000_000);
        let first = MediaTime::frame_at(start, 0, 60);
        assert!((first.as_secs_f64() - start.as_secs_f64()).abs() < 1e-9);
        for index in [1, 59, 3_600] {
            let step = MediaTime::frame_at(start, index, 60)
                - MediaTime::frame_at(start, index - 1, 60);
            assert_eq!(step, MediaTime::new(1, 60));
        }
        assert_eq!(MediaTime::frame_at(start, 60, 60) - first, MediaTime::new(1, 1));
    }

    #[test]
    fn reduces_before_combining_timescales() {
        let sum = MediaTime::new(5_000_000_000, 1_000_000_000) + MediaTime::new(1, 60);
        assert_eq!(sum, MediaTime::new(301, 60));
        assert_eq!(sum.timescale, 60);
    }

    #[test]
    fn frames_until_rounds_up() {
        let start = MediaTime::ZERO;

        assert_eq!(start.frames_until(MediaTime::new(1, 1), 60), 60);
        assert_eq!(start.frames_until(MediaTime::from_secs_f64(0.35, 1000), 60), 21);
        assert_eq!(start.frames_until(MediaTime::ZERO, 60), 0);
        assert_eq!(MediaTime::new(5, 1).frames_until(MediaTime::new(4, 1), 30), 0);
    }

    #[test]
    fn mixed_timescale_arithmetic() {
        let sum = MediaTime::new(1, 30) + MediaTime::new(1, 48_000);
        assert_eq!(sum, MediaTime::new(1601, 48_000));

        let diff = MediaTime::new(1, 2) - MediaTime::new(1, 3);
        assert_eq!(diff, MediaTime::new(1, 6));
    }

    #[test]
    fn serializes_as_rational() {
        let json = serde_json::to_string(&MediaTime::new(7, 600)).unwrap();
        assert_eq!(json, r#"{"value":7,"timescale":600}"#);
    }
}
