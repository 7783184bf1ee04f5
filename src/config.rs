use embassy_time::Duration;

// ── Sizing ────────────────────────────────────────────────────────────────────

/// Number of RC controllers (transmitter/receiver pairs) feeding the robot.
pub const RC_NUMBER_CONTROLLERS: usize = 2;
/// Channels decoded per controller.
pub const RC_NUMBER_CHANNELS: usize = 6;
/// Capacity of the command inbox.
pub const COMMAND_QUEUE_LEN: usize = 8;

pub const DRIVE_ESC_COUNT: usize = 3;
pub const WEAPON_ESC_COUNT: usize = 3;
pub const ESC_COUNT: usize = DRIVE_ESC_COUNT + WEAPON_ESC_COUNT;

// ── RC pulse envelope (µs) ────────────────────────────────────────────────────

pub const RC_PULSE_MIN_US: u16 = 1000;
pub const RC_PULSE_CENTER_US: u16 = 1500;
pub const RC_PULSE_MAX_US: u16 = 2000;

// ── ESC speed envelope (per-mille of full throttle) ───────────────────────────

pub const SPEED_MAX: i16 = 1000;
pub const SPEED_MIN: i16 = -1000;

/// Run-time tunables of the control core.
///
/// All waits in the core are bounded by one of these durations.
#[derive(Clone, Copy, Debug)]
pub struct CoreConfig {
    /// Control task period (ASM + control law).
    pub control_period: Duration,
    /// Output task period (ACA writes).
    pub output_period: Duration,
    /// Longest wait for a command before the control task moves on.
    pub dequeue_timeout: Duration,
    /// Longest wait for any lock region.
    pub lock_timeout: Duration,
    /// Control task stall time after which the watchdog trips.
    pub watchdog_timeout: Duration,
    /// How often the watchdog inspects its countdown.
    pub watchdog_poll: Duration,
    /// Age after which a controller's RC samples are treated as lost.
    pub rc_timeout: Duration,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            control_period: Duration::from_millis(10),
            output_period: Duration::from_millis(5),
            dequeue_timeout: Duration::from_millis(2),
            lock_timeout: Duration::from_millis(2),
            watchdog_timeout: Duration::from_millis(100),
            watchdog_poll: Duration::from_millis(10),
            rc_timeout: Duration::from_millis(500),
        }
    }
}
