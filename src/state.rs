//! Shared coordination state for the controller tasks.
//!
//! One [`SharedState`] exists for the life of the firmware. Cross-task data is
//! split into four lock regions, each an async mutex that owns exactly the
//! data it guards:
//!
//! | region      | writers                  | readers                 |
//! |-------------|--------------------------|-------------------------|
//! | `serial`    | any task reporting status| serial/telemetry task   |
//! | `controls`  | input tasks (own slot)   | control task            |
//! | `outputs`   | control task             | output task             |
//! | `telemetry` | orientation driver, control task | control, telemetry |
//!
//! Rules: hold at most one region at a time, never across another wait, and
//! make every update under a region a single logical write. Acquisition is
//! bounded by `CoreConfig::lock_timeout`.
//!
//! The arming state, mode ids, run flag and latches are atomics: read
//! anywhere, written by the control task (the watchdog may only move them
//! towards safety).
use core::sync::atomic::{AtomicBool, AtomicU32, AtomicU8, Ordering};

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::mutex::{Mutex, MutexGuard};
use embassy_time::{with_timeout, Instant};

use crate::arming::{ArmingCell, ArmingState};
use crate::command::CommandChannel;
use crate::comms::{CommsImplId, EscHandle, EscId};
use crate::config::{
    CoreConfig, ESC_COUNT, RC_NUMBER_CHANNELS, RC_NUMBER_CONTROLLERS, RC_PULSE_CENTER_US,
    RC_PULSE_MIN_US,
};
use crate::error::{LockTimeout, Region};
use crate::input::ChannelLimits;
use crate::watchdog::Watchdog;

pub type RawMutex = CriticalSectionRawMutex;
pub type RegionGuard<'a, T> = MutexGuard<'a, RawMutex, T>;

// ── Controls region ───────────────────────────────────────────────────────────

/// Logical RC channel slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum RcChannel {
    Throttle = 0,
    Steering = 1,
    Weapon = 2,
    Aux1 = 3,
    Aux2 = 4,
    Aux3 = 5,
}

impl RcChannel {
    pub const ALL: [RcChannel; RC_NUMBER_CHANNELS] = [
        Self::Throttle,
        Self::Steering,
        Self::Weapon,
        Self::Aux1,
        Self::Aux2,
        Self::Aux3,
    ];

    #[inline]
    pub const fn index(self) -> usize {
        self as usize
    }
}

/// Clamped channel values of one controller, in µs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RcControls {
    pub channels: [u16; RC_NUMBER_CHANNELS],
}

impl RcControls {
    /// Sticks centred, weapon at minimum.
    pub const NEUTRAL: Self = Self {
        channels: [
            RC_PULSE_CENTER_US,
            RC_PULSE_CENTER_US,
            RC_PULSE_MIN_US,
            RC_PULSE_CENTER_US,
            RC_PULSE_CENTER_US,
            RC_PULSE_CENTER_US,
        ],
    };

    pub fn get(&self, channel: RcChannel) -> u16 {
        self.channels[channel.index()]
    }

    pub fn throttle(&self) -> u16 {
        self.get(RcChannel::Throttle)
    }

    pub fn steering(&self) -> u16 {
        self.get(RcChannel::Steering)
    }

    pub fn weapon(&self) -> u16 {
        self.get(RcChannel::Weapon)
    }
}

impl Default for RcControls {
    fn default() -> Self {
        Self::NEUTRAL
    }
}

/// Last raw (unclamped) sample from one receiver, plus link bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RcReceiver {
    pub raw: [u16; RC_NUMBER_CHANNELS],
    pub last_update: Option<Instant>,
    pub frames: u32,
}

pub struct ControlsRegion {
    pub controls: [RcControls; RC_NUMBER_CONTROLLERS],
    pub receiver: [RcReceiver; RC_NUMBER_CONTROLLERS],
    pub channel_limits: [[ChannelLimits; RC_NUMBER_CHANNELS]; RC_NUMBER_CONTROLLERS],
}

impl ControlsRegion {
    pub const fn new() -> Self {
        Self {
            controls: [RcControls::NEUTRAL; RC_NUMBER_CONTROLLERS],
            receiver: [RcReceiver {
                raw: [0; RC_NUMBER_CHANNELS],
                last_update: None,
                frames: 0,
            }; RC_NUMBER_CONTROLLERS],
            channel_limits: [[ChannelLimits::DEFAULT; RC_NUMBER_CHANNELS]; RC_NUMBER_CONTROLLERS],
        }
    }
}

/// Copy of the controls region taken once per control cycle.
#[derive(Debug, Clone, Copy)]
pub struct ControlsSnapshot {
    pub controls: [RcControls; RC_NUMBER_CONTROLLERS],
    pub receiver: [RcReceiver; RC_NUMBER_CONTROLLERS],
}

// ── Outputs region ────────────────────────────────────────────────────────────

/// Commanded ESC speeds (per-mille), indexed by [`EscId`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OutputsRegion {
    pub speeds: [i16; ESC_COUNT],
    /// Incremented on every publish by the control task.
    pub sequence: u32,
}

impl OutputsRegion {
    pub const fn new() -> Self {
        Self {
            speeds: [0; ESC_COUNT],
            sequence: 0,
        }
    }

    pub fn speed(&self, id: EscId) -> i16 {
        self.speeds[id.index()]
    }
}

// ── Telemetry region ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Orientation {
    #[default]
    Unknown,
    Upright,
    Inverted,
}

impl Orientation {
    /// Operator override encoding: 0 = automatic, 1 = upright, 2 = inverted.
    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(Self::Unknown),
            1 => Some(Self::Upright),
            2 => Some(Self::Inverted),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Euler {
    pub roll: f32,
    pub pitch: f32,
    pub yaw: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct HeadingLock {
    pub enabled: bool,
    /// Target heading, degrees.
    pub target: f32,
    /// Rotation speed, percent of full drive.
    pub speed: u8,
    /// Degrees either side of `target` treated as on-heading.
    pub deadband: u8,
}

impl HeadingLock {
    pub const DEFAULT: Self = Self {
        enabled: false,
        target: 0.0,
        speed: 30,
        deadband: 5,
    };
}

impl Default for HeadingLock {
    fn default() -> Self {
        Self::DEFAULT
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TelemetryRegion {
    pub orientation_detected: Orientation,
    pub orientation_override: Orientation,
    pub orientation: Euler,
    pub inverted: bool,
    pub heading_lock: HeadingLock,
}

impl TelemetryRegion {
    pub const fn new() -> Self {
        Self {
            orientation_detected: Orientation::Unknown,
            orientation_override: Orientation::Unknown,
            orientation: Euler {
                roll: 0.0,
                pitch: 0.0,
                yaw: 0.0,
            },
            inverted: false,
            heading_lock: HeadingLock::DEFAULT,
        }
    }
}

// ── Serial region ─────────────────────────────────────────────────────────────

pub const STATUS_LINE_LEN: usize = 192;

/// Outgoing operator serial link buffer.
pub struct SerialRegion {
    pub tx: heapless::String<STATUS_LINE_LEN>,
}

impl SerialRegion {
    pub const fn new() -> Self {
        Self {
            tx: heapless::String::new(),
        }
    }
}

// ── ESC handles, LEDs, counters ───────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EscBank {
    pub drive: [EscHandle; 3],
    pub weapon: [EscHandle; 3],
}

impl EscBank {
    pub const fn for_backend(comms: CommsImplId) -> Self {
        Self {
            drive: [
                EscHandle::new(EscId::Drive1, comms),
                EscHandle::new(EscId::Drive2, comms),
                EscHandle::new(EscId::Drive3, comms),
            ],
            weapon: [
                EscHandle::new(EscId::Weapon1, comms),
                EscHandle::new(EscId::Weapon2, comms),
                EscHandle::new(EscId::Weapon3, comms),
            ],
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = EscHandle> + '_ {
        self.drive.iter().chain(self.weapon.iter()).copied()
    }

    pub fn get(&self, id: EscId) -> EscHandle {
        let i = id.index();
        if i < 3 {
            self.drive[i]
        } else {
            self.weapon[i - 3]
        }
    }
}

/// Status code shown on the four indicator LEDs, one bit per LED.
pub struct StatusLeds(AtomicU8);

impl StatusLeds {
    pub const ALIVE: u8 = 0b0001;
    pub const DRIVE_ARMED: u8 = 0b0010;
    pub const WEAPON_ARMED: u8 = 0b0100;
    pub const FAULT: u8 = 0b1000;

    pub const fn new() -> Self {
        Self(AtomicU8::new(0))
    }

    pub fn show(&self, code: u8) {
        self.0.store(code & 0x0f, Ordering::Relaxed);
    }

    pub fn code(&self) -> u8 {
        self.0.load(Ordering::Relaxed)
    }

    pub fn code_for(state: ArmingState, fault: bool) -> u8 {
        let mut code = Self::ALIVE;
        if state.drive_enabled() {
            code |= Self::DRIVE_ARMED;
        }
        if state.weapon_enabled() {
            code |= Self::WEAPON_ARMED;
        }
        if fault {
            code |= Self::FAULT;
        }
        code
    }
}

/// Event counters for absorbed, locally recoverable conditions.
#[derive(Default)]
pub struct Counters {
    pub invalid_transitions: AtomicU32,
    pub latched_rejections: AtomicU32,
    pub superseded_commands: AtomicU32,
    pub lock_timeouts: AtomicU32,
    pub watchdog_trips: AtomicU32,
    pub stale_rc_cycles: AtomicU32,
    pub unsupported_reads: AtomicU32,
    pub comms_errors: AtomicU32,
    pub control_cycles: AtomicU32,
}

impl Counters {
    pub const fn new() -> Self {
        Self {
            invalid_transitions: AtomicU32::new(0),
            latched_rejections: AtomicU32::new(0),
            superseded_commands: AtomicU32::new(0),
            lock_timeouts: AtomicU32::new(0),
            watchdog_trips: AtomicU32::new(0),
            stale_rc_cycles: AtomicU32::new(0),
            unsupported_reads: AtomicU32::new(0),
            comms_errors: AtomicU32::new(0),
            control_cycles: AtomicU32::new(0),
        }
    }

    #[inline]
    pub fn bump(counter: &AtomicU32) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn read(counter: &AtomicU32) -> u32 {
        counter.load(Ordering::Relaxed)
    }
}

// ── Shared state ──────────────────────────────────────────────────────────────

pub struct SharedState {
    pub config: CoreConfig,
    pub arming: ArmingCell,
    drive_mode: AtomicU8,
    weapon_mode: AtomicU8,
    active: AtomicBool,
    failsafe_latched: AtomicBool,
    hardware_fault: AtomicBool,

    serial: Mutex<RawMutex, SerialRegion>,
    controls: Mutex<RawMutex, ControlsRegion>,
    outputs: Mutex<RawMutex, OutputsRegion>,
    telemetry: Mutex<RawMutex, TelemetryRegion>,

    pub commands: CommandChannel,
    pub escs: EscBank,
    pub leds: StatusLeds,
    pub counters: Counters,
    pub watchdog: Watchdog,
}

impl SharedState {
    /// Every field at its safe default: zero outputs, `Disarmed`, inactive.
    pub fn new(config: CoreConfig, comms: CommsImplId) -> Self {
        Self {
            config,
            arming: ArmingCell::new(),
            drive_mode: AtomicU8::new(0),
            weapon_mode: AtomicU8::new(0),
            active: AtomicBool::new(false),
            failsafe_latched: AtomicBool::new(false),
            hardware_fault: AtomicBool::new(false),
            serial: Mutex::new(SerialRegion::new()),
            controls: Mutex::new(ControlsRegion::new()),
            outputs: Mutex::new(OutputsRegion::new()),
            telemetry: Mutex::new(TelemetryRegion::new()),
            commands: CommandChannel::new(),
            escs: EscBank::for_backend(comms),
            leds: StatusLeds::new(),
            counters: Counters::new(),
            watchdog: Watchdog::new(config.watchdog_timeout),
        }
    }

    // ── Lock regions ──────────────────────────────────────────────────────────

    async fn acquire<'a, T>(
        &self,
        mutex: &'a Mutex<RawMutex, T>,
        region: Region,
    ) -> Result<RegionGuard<'a, T>, LockTimeout> {
        match with_timeout(self.config.lock_timeout, mutex.lock()).await {
            Ok(guard) => Ok(guard),
            Err(_) => {
                Counters::bump(&self.counters.lock_timeouts);
                crate::log_warn!("lock timeout on {} region", region);
                Err(LockTimeout(region))
            }
        }
    }

    pub async fn lock_serial(&self) -> Result<RegionGuard<'_, SerialRegion>, LockTimeout> {
        self.acquire(&self.serial, Region::Serial).await
    }

    pub async fn lock_controls(&self) -> Result<RegionGuard<'_, ControlsRegion>, LockTimeout> {
        self.acquire(&self.controls, Region::Controls).await
    }

    pub async fn lock_outputs(&self) -> Result<RegionGuard<'_, OutputsRegion>, LockTimeout> {
        self.acquire(&self.outputs, Region::Outputs).await
    }

    pub async fn lock_telemetry(&self) -> Result<RegionGuard<'_, TelemetryRegion>, LockTimeout> {
        self.acquire(&self.telemetry, Region::Telemetry).await
    }

    // ── Flags ─────────────────────────────────────────────────────────────────

    pub fn arming_state(&self) -> ArmingState {
        self.arming.load()
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// true → false is always allowed.
    pub fn deactivate(&self) {
        self.active.store(false, Ordering::SeqCst);
    }

    /// false → true only alongside an approved transition into `armed`.
    ///
    /// Backs out and returns `false` if the watchdog forced `Disarmed` after
    /// the transition was committed. The watchdog disarms before it
    /// deactivates, so either this check sees `Disarmed` or the watchdog's
    /// `deactivate` lands after our store.
    pub(crate) fn activate(&self, armed: ArmingState) -> bool {
        self.active.store(true, Ordering::SeqCst);
        if self.arming.load() == armed {
            return true;
        }
        self.deactivate();
        false
    }

    pub fn failsafe_latched(&self) -> bool {
        self.failsafe_latched.load(Ordering::Acquire)
    }

    pub(crate) fn latch_failsafe(&self) {
        self.failsafe_latched.store(true, Ordering::Release);
    }

    pub(crate) fn clear_failsafe(&self) {
        self.failsafe_latched.store(false, Ordering::Release);
    }

    pub fn hardware_fault(&self) -> bool {
        self.hardware_fault.load(Ordering::Acquire)
    }

    /// Permanent: the system never leaves `Disarmed` afterwards.
    pub fn latch_hardware_fault(&self) {
        self.hardware_fault.store(true, Ordering::Release);
        self.arming.force_disarm();
        self.deactivate();
        self.leds.show(StatusLeds::code_for(ArmingState::Disarmed, true));
    }

    pub fn drive_mode(&self) -> u8 {
        self.drive_mode.load(Ordering::Relaxed)
    }

    pub fn weapon_mode(&self) -> u8 {
        self.weapon_mode.load(Ordering::Relaxed)
    }

    pub(crate) fn set_drive_mode(&self, mode: u8) {
        self.drive_mode.store(mode, Ordering::Relaxed);
    }

    pub(crate) fn set_weapon_mode(&self, mode: u8) {
        self.weapon_mode.store(mode, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use embassy_futures::block_on;
    use embassy_time::Duration;

    fn state() -> SharedState {
        SharedState::new(CoreConfig::default(), CommsImplId::Pwm)
    }

    #[test]
    fn test_new_state_is_safe() {
        let s = state();
        assert_eq!(s.arming_state(), ArmingState::Disarmed);
        assert!(!s.is_active());
        assert!(!s.failsafe_latched());
        assert!(!s.hardware_fault());
        let outputs = block_on(s.lock_outputs()).unwrap();
        assert!(outputs.speeds.iter().all(|&v| v == 0));
        drop(outputs);
        let controls = block_on(s.lock_controls()).unwrap();
        assert!(controls.controls.iter().all(|c| *c == RcControls::NEUTRAL));
        assert!(controls.receiver.iter().all(|r| r.last_update.is_none()));
    }

    #[test]
    fn test_esc_bank_handles_are_tagged_and_ordered() {
        let bank = EscBank::for_backend(CommsImplId::Dshot);
        let ids: Vec<EscId> = bank.iter().map(|h| h.id()).collect();
        assert_eq!(ids, EscId::ALL.to_vec());
        assert!(bank.iter().all(|h| h.comms() == CommsImplId::Dshot));
        assert_eq!(bank.get(EscId::Weapon3).id(), EscId::Weapon3);
    }

    #[test]
    fn test_lock_released_on_scope_exit() {
        let s = state();
        {
            let mut out = block_on(s.lock_outputs()).unwrap();
            out.sequence = 7;
        }
        assert_eq!(block_on(s.lock_outputs()).unwrap().sequence, 7);
    }

    #[test]
    fn test_held_region_times_out_and_is_counted() {
        let mut config = CoreConfig::default();
        config.lock_timeout = Duration::from_millis(1);
        let s = SharedState::new(config, CommsImplId::Pwm);

        let _held = block_on(s.lock_controls()).unwrap();
        assert_eq!(
            block_on(s.lock_controls()).err(),
            Some(LockTimeout(Region::Controls))
        );
        assert_eq!(Counters::read(&s.counters.lock_timeouts), 1);
        // Other regions stay available.
        assert!(block_on(s.lock_outputs()).is_ok());
    }

    #[test]
    fn test_hardware_fault_forces_disarm() {
        let s = state();
        assert!(s.arming.commit(ArmingState::Disarmed, ArmingState::FullyArmed));
        assert!(s.activate(ArmingState::FullyArmed));
        s.latch_hardware_fault();
        assert_eq!(s.arming_state(), ArmingState::Disarmed);
        assert!(!s.is_active());
        assert_eq!(s.leds.code() & StatusLeds::FAULT, StatusLeds::FAULT);
    }

    #[test]
    fn test_activation_backs_out_after_forced_disarm() {
        let s = state();
        assert!(s.arming.commit(ArmingState::Disarmed, ArmingState::FullyArmed));
        // Watchdog fires between commit and activation.
        s.arming.force_disarm();
        s.deactivate();
        assert!(!s.activate(ArmingState::FullyArmed));
        assert_eq!(s.arming_state(), ArmingState::Disarmed);
        assert!(!s.is_active());
    }

    #[test]
    fn test_led_codes() {
        assert_eq!(StatusLeds::code_for(ArmingState::Disarmed, false), 0b0001);
        assert_eq!(StatusLeds::code_for(ArmingState::FullyArmed, false), 0b0111);
        assert_eq!(StatusLeds::code_for(ArmingState::WeaponOnly, true), 0b1101);
    }
}
