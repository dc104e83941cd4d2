/// Clock anchor of one play run.
///
/// Position is `offset + (now - anchor) * rate`, where `rate` is the
/// effective speed of the source.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SessionClock {
    pub anchor: f64,
    pub offset: f64,
    pub rate: f64,
}

impl SessionClock {
    pub fn position_at(&self, now: f64) -> f64 {
        self.offset + (now - self.anchor).max(0.0) * self.rate
    }

    /// Move the anchor to `now`, keeping the position continuous, and
    /// continue at `rate` from there.
    pub fn reanchor(&mut self, now: f64, rate: f64) {
        self.offset = self.position_at(now);
        self.anchor = now;
        self.rate = rate;
    }
}

/// One progress report.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Progress {
    Position(f64),
    /// The run reached the end of the buffer. The tracker stops itself.
    Finished(f64),
}

/// Cooperative per-frame progress loop.
///
/// The loop is bound to the epoch of the run it was scheduled for. Each
/// [`tick`](Self::tick) either reports a position and stays scheduled for
/// the next frame, or reports the end and unschedules itself. A tick for any
/// other epoch is ignored, so a tracker left over from a torn-down run can
/// never report into a newer one.
#[derive(Debug, Default)]
pub struct ProgressTracker {
    scheduled: Option<u64>,
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start (or restart) the loop for the run identified by `epoch`.
    pub fn schedule(&mut self, epoch: u64) {
        self.scheduled = Some(epoch);
    }

    pub fn cancel(&mut self) {
        self.scheduled = None;
    }

    pub fn is_scheduled(&self) -> bool {
        self.scheduled.is_some()
    }

    pub fn scheduled_epoch(&self) -> Option<u64> {
        self.scheduled
    }

    pub fn tick(
        &mut self,
        epoch: u64,
        clock: &SessionClock,
        now: f64,
        duration: f64,
    ) -> Option<Progress> {
        if self.scheduled != Some(epoch) {
            return None;
        }

        let position = clock.position_at(now);
        if position >= duration {
            self.scheduled = None;
            return Some(Progress::Finished(duration));
        }
        Some(Progress::Position(position.max(0.0)))
    }
}

#[cfg(test)]
mod tests {
    use super::{Progress, ProgressTracker, SessionClock};

    fn clock(anchor: f64, offset: f64, rate: f64) -> SessionClock {
        SessionClock {
            anchor,
            offset,
            rate,
        }
    }

    #[test]
    fn position_scales_elapsed_time_by_rate() {
        let run = clock(10.0, 2.0, 1.5);
        assert_eq!(run.position_at(10.0), 2.0);
        assert_eq!(run.position_at(12.0), 5.0);
    }

    #[test]
    fn clock_never_runs_backwards_before_its_anchor() {
        assert_eq!(clock(10.0, 2.0, 1.0).position_at(9.0), 2.0);
    }

    #[test]
    fn reanchor_keeps_position_continuous() {
        let mut run = clock(0.0, 1.0, 1.0);
        run.reanchor(2.0, 2.0);
        assert_eq!(run.position_at(2.0), 3.0);
        assert_eq!(run.position_at(3.0), 5.0);
    }

    #[test]
    fn reports_position_and_stays_scheduled() {
        let mut tracker = ProgressTracker::new();
        tracker.schedule(1);
        let run = clock(0.0, 0.0, 1.0);
        assert_eq!(tracker.tick(1, &run, 0.5, 10.0), Some(Progress::Position(0.5)));
        assert!(tracker.is_scheduled());
    }

    #[test]
    fn finishing_clamps_to_duration_and_unschedules() {
        let mut tracker = ProgressTracker::new();
        tracker.schedule(1);
        let run = clock(0.0, 9.0, 2.0);
        assert_eq!(tracker.tick(1, &run, 1.0, 10.0), Some(Progress::Finished(10.0)));
        assert!(!tracker.is_scheduled());
        assert_eq!(tracker.tick(1, &run, 1.1, 10.0), None);
    }

    #[test]
    fn ignores_ticks_for_other_epochs_and_after_cancel() {
        let mut tracker = ProgressTracker::new();
        tracker.schedule(2);
        let run = clock(0.0, 0.0, 1.0);
        assert_eq!(tracker.tick(1, &run, 0.5, 10.0), None);

        tracker.cancel();
        assert_eq!(tracker.tick(2, &run, 0.5, 10.0), None);
    }
}
