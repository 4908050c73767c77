use std::time::Instant;

const MAX_DISPLAYED_FPS: f64 = 999.0;

/// Instantaneous frame rate from the gap between consecutive passes.
#[derive(Debug, Default)]
pub struct FpsMeter {
    previous: Option<Instant>,
}

impl FpsMeter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a pass starting at `now`. Returns `None` on the first tick or
    /// when no measurable time has elapsed.
    pub fn tick(&mut self, now: Instant) -> Option<f64> {
        let previous = self.previous.replace(now)?;
        let elapsed = now.saturating_duration_since(previous).as_secs_f64();
        if elapsed <= 0.0 {
            return None;
        }
        Some((1.0 / elapsed).min(MAX_DISPLAYED_FPS))
    }
}

/// Overlay text: whole frames per second, `-` when unknown.
pub fn fps_label(fps: Option<f64>) -> String {
    match fps {
        Some(fps) => format!("FPS {}", fps.trunc() as u32),
        None => "FPS -".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn first_tick_has_no_rate() {
        let mut meter = FpsMeter::new();
        assert_eq!(meter.tick(Instant::now()), None);
        assert_eq!(fps_label(None), "FPS -");
    }

    #[test]
    fn rate_is_inverse_of_gap() {
        let mut meter = FpsMeter::new();
        let start = Instant::now();
        meter.tick(start);
        let fps = meter.tick(start + Duration::from_millis(40)).unwrap();
        assert!((fps - 25.0).abs() < 1e-6);
        assert_eq!(fps_label(Some(fps)), "FPS 25");
    }

    #[test]
    fn zero_gap_is_unknown_and_large_rates_clamp() {
        let mut meter = FpsMeter::new();
        let start = Instant::now();
        meter.tick(start);
        assert_eq!(meter.tick(start), None);
        let fps = meter.tick(start + Duration::from_nanos(10)).unwrap();
        assert_eq!(fps, MAX_DISPLAYED_FPS);
    }
}
