use std::time::Duration;

use chrono::{DateTime, Utc};

/// Source of time for the build, so retry waits and schedules are testable.
pub trait Clock {
    fn now(&self) -> DateTime<Utc>;
    fn sleep(&self, duration: Duration);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Human-readable duration, e.g. `1 minute and 5 seconds`.
pub fn precise_delta(duration: Duration) -> String {
    let total = duration.as_secs();
    let parts = [
        (total / 86_400, "day"),
        ((total % 86_400) / 3_600, "hour"),
        ((total % 3_600) / 60, "minute"),
        (total % 60, "second"),
    ];
    let words: Vec<String> = parts
        .iter()
        .filter(|(value, _)| *value > 0)
        .map(|(value, unit)| {
            let plural = if *value == 1 { "" } else { "s" };
            format!("{value} {unit}{plural}")
        })
        .collect();

    match words.as_slice() {
        [] => format!("{:.2} seconds", duration.as_secs_f64()),
        [only] => only.clone(),
        [init @ .., last] => format!("{} and {last}", init.join(", ")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn precise_delta_joins_units() {
        assert_eq!(precise_delta(Duration::from_secs(65)), "1 minute and 5 seconds");
        assert_eq!(precise_delta(Duration::from_secs(1)), "1 second");
        assert_eq!(
            precise_delta(Duration::from_secs(3_600 + 120 + 7)),
            "1 hour, 2 minutes and 7 seconds"
        );
        assert_eq!(precise_delta(Duration::from_millis(300)), "0.30 seconds");
        assert_eq!(precise_delta(Duration::ZERO), "0.00 seconds");
    }
}
