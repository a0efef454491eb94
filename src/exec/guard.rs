/// Wall-clock and output-volume budget checks
use crate::config::types::{ErrorInfo, LimitKind, Policy};
use crate::utils::output::OutputSink;
use std::time::{Duration, Instant};

/// Session budget. Started when the session is opened.
#[derive(Debug, Clone, Copy)]
pub struct Guard {
    started: Instant,
    limit_millis: u64,
    fail_on_output_overflow: bool,
}

impl Guard {
    pub fn start(policy: &Policy) -> Self {
        Self {
            started: Instant::now(),
            limit_millis: policy.max_wall_clock_millis,
            fail_on_output_overflow: policy.fail_on_output_overflow,
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn elapsed_millis(&self) -> u64 {
        u64::try_from(self.started.elapsed().as_millis()).unwrap_or(u64::MAX)
    }

    pub fn limit_millis(&self) -> u64 {
        self.limit_millis
    }

    /// Ok while the run is inside its budget
    pub fn check_budget(&self, sink: &OutputSink) -> Result<(), ErrorInfo> {
        if self.elapsed_millis() > self.limit_millis {
            return Err(ErrorInfo::resource_limit(
                LimitKind::WallClock,
                self.limit_millis,
            ));
        }

        if self.fail_on_output_overflow {
            if let Some(limit) = sink.tripped_limit() {
                let limits = sink.limits();
                let threshold = match limit {
                    LimitKind::OutputBytes => limits.max_bytes,
                    _ => limits.max_lines,
                };
                return Err(ErrorInfo::resource_limit(limit, threshold as u64));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::types::{ErrorKind, OUTPUT_LIMIT_SENTINEL};
    use crate::utils::output::OutputLimits;

    #[test]
    fn test_fresh_guard_passes() {
        let guard = Guard::start(&Policy::default());
        let sink = OutputSink::new(OutputLimits::default());
        assert!(guard.check_budget(&sink).is_ok());
    }

    #[test]
    fn test_zero_budget_trips_after_a_millisecond() {
        let policy = Policy {
            max_wall_clock_millis: 0,
            ..Policy::default()
        };
        let guard = Guard::start(&policy);
        std::thread::sleep(Duration::from_millis(5));

        let sink = OutputSink::new(OutputLimits::default());
        let err = guard.check_budget(&sink).unwrap_err();
        assert_eq!(err.kind, ErrorKind::ResourceLimitExceeded);
        assert_eq!(err.limit.unwrap().limit, LimitKind::WallClock);
        assert!(err.is_guard_trip());
    }

    #[test]
    fn test_overflow_is_ignored_unless_fatal() {
        let mut sink = OutputSink::new(OutputLimits {
            max_lines: 2,
            max_bytes: OUTPUT_LIMIT_SENTINEL.len() + 100,
        });
        sink.push_line("a".into());
        sink.push_line("b".into());
        assert!(sink.is_truncated());

        let lenient = Guard::start(&Policy::default());
        assert!(lenient.check_budget(&sink).is_ok());

        let strict = Guard::start(&Policy {
            fail_on_output_overflow: true,
            ..Policy::default()
        });
        let err = strict.check_budget(&sink).unwrap_err();
        let breach = err.limit.unwrap();
        assert_eq!(breach.limit, LimitKind::OutputLines);
        assert_eq!(breach.threshold, 2);
    }
}
