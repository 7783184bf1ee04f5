//! Control task liveness watchdog.
//!
//! The control task pets the watchdog after every published cycle. If the
//! countdown runs out the watchdog forces `Disarmed` and stops every ESC by
//! calling the comms backend directly. None of this touches a shared-state
//! lock region, so it works while a stalled task holds any of them.
//!
//! [`Watchdog::run`] must execute in a context that preempts the control task;
//! the firmware gives it its own interrupt executor.

use core::cell::Cell;
use core::sync::atomic::{AtomicBool, Ordering};

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::blocking_mutex::Mutex;
use embassy_time::{Duration, Instant, Timer};

use crate::comms::EscComms;
use crate::error::WatchdogTimeout;
use crate::state::{Counters, SharedState, StatusLeds};
use crate::arming::ArmingState;

pub struct Watchdog {
    timeout: Duration,
    /// `None` until started.
    last_pet: Mutex<CriticalSectionRawMutex, Cell<Option<Instant>>>,
    tripped: AtomicBool,
}

impl Watchdog {
    pub const fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            last_pet: Mutex::new(Cell::new(None)),
            tripped: AtomicBool::new(false),
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Begin counting down from `now`.
    pub fn start(&self, now: Instant) {
        self.pet(now);
    }

    pub fn pet(&self, now: Instant) {
        self.last_pet.lock(|t| t.set(Some(now)));
        self.tripped.store(false, Ordering::Release);
    }

    pub fn is_tripped(&self) -> bool {
        self.tripped.load(Ordering::Acquire)
    }

    pub fn expired(&self, now: Instant) -> bool {
        match self.last_pet.lock(|t| t.get()) {
            Some(last) => now.saturating_duration_since(last) > self.timeout,
            None => false,
        }
    }

    pub fn check(&self, now: Instant) -> Result<(), WatchdogTimeout> {
        if self.expired(now) {
            Err(WatchdogTimeout)
        } else {
            Ok(())
        }
    }

    /// Check the countdown and fire the failsafe once per stall.
    pub fn poll(
        &self,
        now: Instant,
        state: &SharedState,
        comms: &dyn EscComms,
    ) -> Result<(), WatchdogTimeout> {
        let result = self.check(now);
        if result.is_err() && !self.tripped.swap(true, Ordering::AcqRel) {
            trip(state, comms);
        }
        result
    }

    pub async fn run(&self, state: &SharedState, comms: &dyn EscComms) -> ! {
        loop {
            Timer::after(state.config.watchdog_poll).await;
            // Trip already handled inside poll.
            let _ = self.poll(Instant::now(), state, comms);
        }
    }
}

/// Forced safe state: `Disarmed`, inactive, failsafe latched, every ESC stopped.
pub fn trip(state: &SharedState, comms: &dyn EscComms) {
    let prev = state.arming.force_disarm();
    state.deactivate();
    state.latch_failsafe();
    Counters::bump(&state.counters.watchdog_trips);

    for esc in state.escs.iter() {
        if comms.stop(esc).is_err() {
            Counters::bump(&state.counters.comms_errors);
        }
    }

    state
        .leds
        .show(StatusLeds::code_for(ArmingState::Disarmed, true));
    crate::log_error!("watchdog expired in {}, all ESCs stopped", prev);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_started_never_expires() {
        let wd = Watchdog::new(Duration::from_millis(10));
        assert!(wd.check(Instant::from_secs(100)).is_ok());
    }

    #[test]
    fn test_expires_only_after_timeout() {
        let wd = Watchdog::new(Duration::from_millis(10));
        wd.start(Instant::from_millis(100));
        assert!(wd.check(Instant::from_millis(110)).is_ok());
        assert_eq!(wd.check(Instant::from_millis(111)), Err(WatchdogTimeout));
        wd.pet(Instant::from_millis(111));
        assert!(wd.check(Instant::from_millis(115)).is_ok());
    }

    #[test]
    fn test_time_going_backwards_is_not_expiry() {
        let wd = Watchdog::new(Duration::from_millis(10));
        wd.start(Instant::from_millis(100));
        assert!(wd.check(Instant::from_millis(50)).is_ok());
    }
}
