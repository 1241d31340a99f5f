//! Virtuelle Ausgabegeräte: Codes, Geräte-Trait, uinput-Backend und die
//! Senke, die Aktionen pro Tick bündelt.

pub mod codes;
pub mod device;
pub mod sink;
pub mod uinput;

pub use codes::{CodeKind, OutputClass, OutputCode};
pub use device::{OutputError, OutputEvent, OutputSettings, VirtualDeviceFactory, VirtualOutput};
pub use sink::OutputSink;
pub use uinput::UinputFactory;

use std::time::{Duration, Instant};

/// Rate-Limiter für wiederholte Versuche
#[derive(Debug, Clone)]
pub struct RateLimiter {
    /// Minimaler Zeitabstand zwischen Versuchen
    min_interval: Duration,

    /// Zeitpunkt des letzten Versuchs
    last_event_time: Option<Instant>,
}

impl RateLimiter {
    /// Der erste Versuch ist sofort erlaubt
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_event_time: None,
        }
    }

    /// Wie `new`, zählt `now` aber schon als Versuch
    pub fn started_at(min_interval: Duration, now: Instant) -> Self {
        Self {
            min_interval,
            last_event_time: Some(now),
        }
    }

    /// Prüft, ob ein neuer Versuch erlaubt ist, und merkt ihn sich
    pub fn should_process(&mut self, now: Instant) -> bool {
        match self.last_event_time {
            Some(last) if now.saturating_duration_since(last) < self.min_interval => false,
            _ => {
                self.last_event_time = Some(now);
                true
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limiter_spaces_attempts() {
        let start = Instant::now();
        let mut limiter = RateLimiter::started_at(Duration::from_secs(1), start);
        assert!(!limiter.should_process(start + Duration::from_millis(500)));
        assert!(limiter.should_process(start + Duration::from_millis(1000)));
        assert!(!limiter.should_process(start + Duration::from_millis(1500)));

        let mut fresh = RateLimiter::new(Duration::from_secs(1));
        assert!(fresh.should_process(start));
    }
}
