//! Bounded polling.
//!
//! Interface creation is asynchronous at the driver layer: the kernel ACKs the
//! request but assigns the final name later, with no notification usable at
//! this point in startup. The only observable is "did the registry grow", so
//! the coordinator polls with a hard attempt ceiling. The combinator lives
//! here, separated from the business logic, so it can be exercised with a fake
//! sleeper and fake probes.

use std::time::Duration;

/// Attempt budget and spacing for one polling loop.
#[derive(Debug, Clone)]
pub struct PollConfig {
    pub max_attempts: u32,
    pub interval: Duration,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            interval: Duration::from_millis(500),
        }
    }
}

/// Run `probe` up to `config.max_attempts` times, sleeping `config.interval`
/// between attempts.
///
/// `probe` returns `Ok(Some(value))` when the awaited condition holds,
/// `Ok(None)` to keep waiting, or `Err` to abort immediately. Returns
/// `Ok(None)` once the attempt budget is exhausted; the caller decides what
/// exhaustion means. The probe is invoked exactly `max_attempts` times in the
/// exhaustion case, and there is no sleep after the final attempt.
pub fn poll_until<T, E>(
    config: &PollConfig,
    mut sleep: impl FnMut(Duration),
    mut probe: impl FnMut(u32) -> Result<Option<T>, E>,
) -> Result<Option<T>, E> {
    for attempt in 1..=config.max_attempts {
        if let Some(value) = probe(attempt)? {
            return Ok(Some(value));
        }
        if attempt < config.max_attempts {
            sleep(config.interval);
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(max_attempts: u32) -> PollConfig {
        PollConfig {
            max_attempts,
            interval: Duration::from_millis(250),
        }
    }

    #[test]
    fn succeeds_on_first_attempt_without_sleeping() {
        let mut sleeps = 0;
        let result: Result<_, ()> =
            poll_until(&config(5), |_| sleeps += 1, |attempt| Ok(Some(attempt)));
        assert_eq!(result, Ok(Some(1)));
        assert_eq!(sleeps, 0);
    }

    #[test]
    fn succeeds_once_condition_becomes_true() {
        let mut sleeps = Vec::new();
        let result: Result<_, ()> = poll_until(
            &config(10),
            |d| sleeps.push(d),
            |attempt| Ok((attempt == 4).then_some("appeared")),
        );
        assert_eq!(result, Ok(Some("appeared")));
        // Three waits before the fourth probe.
        assert_eq!(sleeps.len(), 3);
        assert!(sleeps.iter().all(|d| *d == Duration::from_millis(250)));
    }

    #[test]
    fn exhausts_after_exactly_the_configured_attempts() {
        let mut probes = 0;
        let mut sleeps = 0;
        let result: Result<Option<()>, ()> = poll_until(
            &config(7),
            |_| sleeps += 1,
            |_| {
                probes += 1;
                Ok(None)
            },
        );
        assert_eq!(result, Ok(None));
        assert_eq!(probes, 7);
        // No sleep after the final attempt.
        assert_eq!(sleeps, 6);
    }

    #[test]
    fn probe_errors_abort_immediately() {
        let mut probes = 0;
        let result: Result<Option<()>, &str> = poll_until(
            &config(5),
            |_| {},
            |_| {
                probes += 1;
                if probes == 2 {
                    Err("channel broke")
                } else {
                    Ok(None)
                }
            },
        );
        assert_eq!(result, Err("channel broke"));
        assert_eq!(probes, 2);
    }
}
