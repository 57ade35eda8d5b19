use log::{log_enabled, warn, Level};
use std::time::{Duration, Instant};

/// Scoped trace span for a pipeline stage. Emits start/end lines at trace
/// level and, when given a slot, adds the elapsed time to it on drop.
pub struct ScopedTimer<'a> {
    label: &'a str,
    start: Instant,
    output: Option<&'a mut Duration>,
}

impl<'a> ScopedTimer<'a> {
    pub fn new(label: &'a str) -> Self {
        if log_enabled!(Level::Trace) {
            log::trace!("⏱️ start {label}");
        }
        Self {
            label,
            start: Instant::now(),
            output: None,
        }
    }

    /// Like [`ScopedTimer::new`] but accumulates into `output`.
    pub fn recording(label: &'a str, output: &'a mut Duration) -> Self {
        let mut timer = Self::new(label);
        timer.output = Some(output);
        timer
    }
}

impl Drop for ScopedTimer<'_> {
    fn drop(&mut self) {
        let elapsed = self.start.elapsed();
        if let Some(output) = self.output.as_deref_mut() {
            *output += elapsed;
        }
        if log_enabled!(Level::Trace) {
            log::trace!("⏱️ end {} ({} µs)", self.label, elapsed.as_micros());
        }
    }
}

/// Registers a warning when frame budget is exceeded.
pub fn warn_if_frame_budget_exceeded(duration: Duration, budget_ms: f32) -> bool {
    let elapsed_ms = duration.as_secs_f32() * 1000.0;
    if elapsed_ms > budget_ms {
        warn!(
            "Step exceeded budget: {:.2} ms > {:.2} ms",
            elapsed_ms, budget_ms
        );
        return true;
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recording_timer_accumulates() {
        let mut slot = Duration::from_millis(3);
        {
            let _timer = ScopedTimer::recording("test", &mut slot);
        }
        assert!(slot >= Duration::from_millis(3));
    }

    #[test]
    fn budget_check_reports_overrun() {
        assert!(warn_if_frame_budget_exceeded(Duration::from_millis(20), 16.6));
        assert!(!warn_if_frame_budget_exceeded(Duration::from_millis(1), 16.6));
    }
}
