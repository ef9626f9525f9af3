use std::collections::VecDeque;

use reel_timestamp::MediaTime;

use crate::PcmChunk;

pub const MIN_DB: f64 = -96.0;

/// Peak level of a block of float samples in dBFS, clamped to
/// `[MIN_DB, 0.0]`. Silence and empty input read as `MIN_DB`.
pub fn peak_dbfs(samples: &[f32]) -> f64 {
    let peak = samples
        .iter()
        .filter(|s| s.is_finite())
        .fold(0.0f32, |max, s| max.max(s.abs()));

    if peak <= 0.0 {
        return MIN_DB;
    }

    (20.0 * (peak as f64).log10()).clamp(MIN_DB, 0.0)
}

pub fn chunk_peak_dbfs(chunk: &PcmChunk) -> f64 {
    peak_dbfs(&chunk.samples)
}

/// Holds the loudest reading seen over a trailing time window.
pub struct PeakMeter {
    window: MediaTime,
    readings: VecDeque<(MediaTime, f64)>,
}

impl PeakMeter {
    pub fn new(window_secs: f64) -> Self {
        Self {
            window: MediaTime::from_secs_f64(window_secs, 1_000_000),
            readings: VecDeque::new(),
        }
    }

    pub fn push(&mut self, at: MediaTime, db: f64) {
        // Older readings that are quieter can never be the max again.
        while let Some(&(_, last)) = self.readings.back() {
            if last <= db {
                self.readings.pop_back();
            } else {
                break;
            }
        }
        self.readings.push_back((at, db));

        while let Some(&(time, _)) = self.readings.front() {
            if at - time > self.window {
                self.readings.pop_front();
            } else {
                break;
            }
        }
    }

    pub fn max(&self) -> f64 {
        self.readings.front().map(|(_, db)| *db).unwrap_or(MIN_DB)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_scale_is_zero() {
        assert_eq!(peak_dbfs(&[0.0, -1.0, 0.5]), 0.0);
        assert_eq!(peak_dbfs(&[2.0]), 0.0);
    }

    #[test]
    fn half_scale_is_about_minus_six() {
        let db = peak_dbfs(&[0.25, -0.5]);
        assert!((db - -6.0206).abs() < 0.001, "{db}");
    }

    #[test]
    fn silence_hits_floor() {
        assert_eq!(peak_dbfs(&[]), MIN_DB);
        assert_eq!(peak_dbfs(&[0.0; 64]), MIN_DB);
        assert_eq!(peak_dbfs(&[1e-9]), MIN_DB);
        assert_eq!(peak_dbfs(&[f32::NAN]), MIN_DB);
    }

    #[test]
    fn meter_forgets_old_peaks() {
        let mut meter = PeakMeter::new(0.2);
        let at = |ms: i64| MediaTime::new(ms, 1000);

        meter.push(at(0), -3.0);
        meter.push(at(100), -20.0);
        assert_eq!(meter.max(), -3.0);

        meter.push(at(250), -30.0);
        assert_eq!(meter.max(), -20.0);

        meter.push(at(400), -40.0);
        assert_eq!(meter.max(), -30.0);
    }
}
