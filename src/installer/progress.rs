//! Progress reporting for install runs.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Phase a per-unit progress event belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitPhase {
    CheckHash,
    Download,
    Extract,
}

impl UnitPhase {
    pub fn name(&self) -> &'static str {
        match self {
            UnitPhase::CheckHash => "Checking",
            UnitPhase::Download => "Downloading",
            UnitPhase::Extract => "Extracting",
        }
    }
}

/// Progress event delivered to the run's observer.
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    /// Per-unit percentage (0.0 ..= 100.0)
    Unit {
        phase: UnitPhase,
        name: String,
        percent: f64,
    },
    /// Aggregate run progress
    Overall { completed: usize, total: usize },
    /// Free-form status line
    Status { message: String },
}

/// Progress callback for GUI/CLI updates
pub type ProgressCallback = Arc<dyn Fn(ProgressEvent) + Send + Sync>;

/// Per-unit percentage reporter handed to transports and extractors.
pub type PercentFn<'a> = dyn Fn(f64) + Send + Sync + 'a;

/// Owned reporter for one unit across all of its phases.
pub type UnitReporter = Arc<dyn Fn(UnitPhase, f64) + Send + Sync>;

/// Run-wide counters. Created at the start of a run and dropped at its end.
#[derive(Debug, Default)]
pub struct PipelineProgress {
    total: AtomicUsize,
    completed: AtomicUsize,
}

impl PipelineProgress {
    pub fn new(total: usize) -> Self {
        Self {
            total: AtomicUsize::new(total),
            completed: AtomicUsize::new(0),
        }
    }

    /// Mark one group fully done; returns the new completed count.
    pub fn complete_one(&self) -> usize {
        self.completed.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::Relaxed)
    }

    pub fn total(&self) -> usize {
        self.total.load(Ordering::Relaxed)
    }

    /// Completed fraction in `0.0..=1.0`; an empty run counts as done.
    pub fn fraction(&self) -> f64 {
        let total = self.total();
        if total == 0 {
            1.0
        } else {
            self.completed() as f64 / total as f64
        }
    }
}

/// Build a reporter for the unit `name` that forwards into the run callback.
pub fn unit_reporter(callback: Option<&ProgressCallback>, name: &str) -> UnitReporter {
    match callback {
        Some(cb) => {
            let cb = Arc::clone(cb);
            let name = name.to_string();
            Arc::new(move |phase, percent| {
                cb(ProgressEvent::Unit {
                    phase,
                    name: name.clone(),
                    percent: percent.clamp(0.0, 100.0),
                })
            })
        }
        None => silent(),
    }
}

/// Reporter that drops every update.
pub fn silent() -> UnitReporter {
    Arc::new(|_, _| {})
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_pipeline_progress_counts() {
        let progress = PipelineProgress::new(4);
        assert_eq!(progress.fraction(), 0.0);
        assert_eq!(progress.complete_one(), 1);
        assert_eq!(progress.complete_one(), 2);
        assert_eq!(progress.completed(), 2);
        assert_eq!(progress.fraction(), 0.5);
        assert_eq!(PipelineProgress::new(0).fraction(), 1.0);
    }

    #[test]
    fn test_unit_reporter_clamps() {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        let cb: ProgressCallback = Arc::new(move |e| sink.lock().unwrap().push(e));

        let report = unit_reporter(Some(&cb), "pack.7z");
        report(UnitPhase::Download, 150.0);
        silent()(UnitPhase::Extract, 10.0);

        let events = events.lock().unwrap();
        assert_eq!(
            events[0],
            ProgressEvent::Unit {
                phase: UnitPhase::Download,
                name: "pack.7z".to_string(),
                percent: 100.0
            }
        );
    }

    fn forward_halfway(on_percent: &PercentFn<'_>) {
        on_percent(50.0);
    }

    #[test]
    fn test_percent_fn_accepts_borrowing_closure() {
        let seen = Mutex::new(Vec::new());
        let report = silent();
        let on_percent = |p: f64| {
            report(UnitPhase::Extract, p);
            seen.lock().unwrap().push(p);
        };

        forward_halfway(&on_percent);
        assert_eq!(*seen.lock().unwrap(), vec![50.0]);
    }
}
