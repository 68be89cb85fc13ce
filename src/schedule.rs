/*!
 # Active times

 Turns the lights on and off around a daily time window. The timer only
 reports transitions; the runner decides what switching means.
*/

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{Local, NaiveTime, Timelike};
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, info, instrument, warn};

use crate::{Error, Result};

/// How often the window is re-evaluated
pub const CHECK_INTERVAL: Duration = Duration::from_secs(30);

/// Daily `[start, end)` window, minute resolution
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActiveTimes {
    start: u32,
    end: u32,
}

impl ActiveTimes {
    /// Parse `HH:MM` start and end times
    pub fn parse(start: &str, end: &str) -> Result<Self> {
        Ok(Self {
            start: minute_of_day(parse_time(start)?),
            end: minute_of_day(parse_time(end)?),
        })
    }

    /// Whether the lights may be on at `now`
    ///
    /// A window that does not end after it starts is unsupported and always
    /// reports active.
    pub fn check_times(&self, now: NaiveTime) -> bool {
        if self.end <= self.start {
            return true;
        }
        let now = minute_of_day(now);
        self.start <= now && now < self.end
    }

    pub fn is_valid(&self) -> bool {
        self.end > self.start
    }
}

impl fmt::Display for ActiveTimes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:02}:{:02}-{:02}:{:02}",
            self.start / 60,
            self.start % 60,
            self.end / 60,
            self.end % 60
        )
    }
}

/// Parse a `HH:MM` time of day
pub fn parse_time(value: &str) -> Result<NaiveTime> {
    NaiveTime::parse_from_str(value.trim(), "%H:%M")
        .map_err(|e| Error::InvalidTime(format!("{value}: {e}")))
}

fn minute_of_day(time: NaiveTime) -> u32 {
    time.hour() * 60 + time.minute()
}

type Clock = Arc<dyn Fn() -> NaiveTime + Send + Sync>;

/// Background poller for [`ActiveTimes`]
///
/// Without a window the timer never runs and always reports active.
pub struct ActiveTimer {
    times: Option<ActiveTimes>,
    active: Arc<AtomicBool>,
    clock: Clock,
    task: Option<JoinHandle<()>>,
}

impl fmt::Debug for ActiveTimer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActiveTimer")
            .field("times", &self.times)
            .field("active", &self.is_active())
            .field("running", &self.task.is_some())
            .finish()
    }
}

impl ActiveTimer {
    pub fn new(times: Option<ActiveTimes>) -> Self {
        Self::with_clock(times, || Local::now().time())
    }

    /// Use a custom wall clock instead of local time
    pub fn with_clock<C>(times: Option<ActiveTimes>, clock: C) -> Self
    where
        C: Fn() -> NaiveTime + Send + Sync + 'static,
    {
        if let Some(times) = times.filter(|t| !t.is_valid()) {
            warn!(
                "Active times {} end before they start, lights will always be on",
                times
            );
        }
        Self {
            times,
            active: Arc::new(AtomicBool::new(true)),
            clock: Arc::new(clock),
            task: None,
        }
    }

    /// Last reported state
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Evaluate the window right now, without reporting anything
    pub fn check_times(&self) -> bool {
        self.times
            .map_or(true, |times| times.check_times((self.clock)()))
    }

    /// Start polling, calling `callback` whenever the state flips
    ///
    /// The first check happens immediately.
    #[instrument(skip(self, callback))]
    pub fn start<F>(&mut self, callback: F)
    where
        F: Fn(bool) + Send + 'static,
    {
        let Some(times) = self.times else {
            debug!("Active times disabled");
            return;
        };
        self.stop();

        let active = self.active.clone();
        let clock = self.clock.clone();
        info!("Starting active times timer for {}", times);

        self.task = Some(tokio::spawn(async move {
            let mut interval = time::interval(CHECK_INTERVAL);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                let now = clock();
                let state = times.check_times(now);
                if active.swap(state, Ordering::AcqRel) != state {
                    info!(
                        "Active times: lights {} at {}",
                        if state { "on" } else { "off" },
                        now.format("%H:%M")
                    );
                    callback(state);
                }
            }
        }));
    }

    /// Stop polling
    pub fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for ActiveTimer {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    fn at(value: &str) -> NaiveTime {
        parse_time(value).unwrap()
    }

    #[test]
    fn test_window() {
        let times = ActiveTimes::parse("09:00", "21:00").unwrap();
        assert!(!times.check_times(at("08:59")));
        assert!(times.check_times(at("09:00")));
        assert!(times.check_times(at("20:59")));
        assert!(!times.check_times(at("21:00")));
        assert!(!times.check_times(at("23:30")));
    }

    #[test]
    fn test_inverted_window_fails_open() {
        let times = ActiveTimes::parse("21:00", "09:00").unwrap();
        for hour in 0..24 {
            for minute in [0, 15, 30, 59] {
                let now = NaiveTime::from_hms_opt(hour, minute, 0).unwrap();
                assert!(times.check_times(now), "{now}");
            }
        }

        let same = ActiveTimes::parse("12:00", "12:00").unwrap();
        assert!(same.check_times(at("03:00")));
    }

    #[test]
    fn test_invalid_time() {
        assert!(matches!(
            ActiveTimes::parse("25:00", "09:00"),
            Err(Error::InvalidTime(_))
        ));
        assert!(ActiveTimes::parse("noon", "09:00").is_err());
    }

    #[test]
    fn test_disabled_timer_is_active() {
        let timer = ActiveTimer::new(None);
        assert!(timer.is_active());
        assert!(timer.check_times());
    }

    #[tokio::test(start_paused = true)]
    async fn test_callback_only_on_change() {
        let now = Arc::new(Mutex::new(at("08:00")));
        let calls = Arc::new(Mutex::new(Vec::new()));

        let clock = now.clone();
        let mut timer = ActiveTimer::with_clock(
            Some(ActiveTimes::parse("09:00", "21:00").unwrap()),
            move || *clock.lock(),
        );
        let record = calls.clone();
        timer.start(move |state| record.lock().push(state));

        // First check runs immediately
        time::sleep(Duration::from_millis(1)).await;
        assert_eq!(*calls.lock(), vec![false]);
        assert!(!timer.is_active());

        // Still outside the window, nothing reported
        time::sleep(CHECK_INTERVAL).await;
        assert_eq!(calls.lock().len(), 1);

        *now.lock() = at("09:00");
        time::sleep(CHECK_INTERVAL).await;
        assert_eq!(*calls.lock(), vec![false, true]);
        assert!(timer.is_active());

        timer.stop();
        *now.lock() = at("22:00");
        time::sleep(CHECK_INTERVAL * 2).await;
        assert_eq!(calls.lock().len(), 2);
    }
}
