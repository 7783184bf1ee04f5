//! Control task: commands in, gated ESC speeds out.
//!
//! Each cycle drains the command inbox, runs the arming state machine, takes
//! one snapshot each of the controls and telemetry regions, runs the control
//! law and publishes gated speeds to the outputs region. The watchdog is only
//! petted once a cycle has published.

use embassy_time::{Duration, Instant, Ticker};
#[allow(unused_imports)]
use micromath::F32Ext;

use crate::arming::{gate, ArmCommand, ArmingState};
use crate::command::{Command, CommandId};
use crate::comms::EscId;
use crate::config::{
    COMMAND_QUEUE_LEN, DRIVE_ESC_COUNT, ESC_COUNT, RC_NUMBER_CONTROLLERS, RC_PULSE_CENTER_US,
    RC_PULSE_MIN_US, SPEED_MAX,
};
use crate::error::{LockTimeout, TransitionError};
use crate::state::{
    ControlsSnapshot, Counters, Orientation, RcControls, SharedState, StatusLeds, TelemetryRegion,
};
use crate::telemetry::effective_orientation;

/// Everything a control law sees in one cycle.
#[derive(Debug, Clone, Copy)]
pub struct ControlInput {
    pub controls: RcControls,
    pub telemetry: TelemetryRegion,
    pub drive_mode: u8,
    pub weapon_mode: u8,
}

/// Ungated speed demand in per-mille, indexed by [`EscId::index`].
pub type Demand = [i16; ESC_COUNT];

pub trait ControlLaw {
    fn compute(&mut self, input: &ControlInput) -> Demand;
}

/// Centred stick (µs) to signed per-mille.
pub fn stick_to_speed(us: u16) -> i16 {
    let v = (i32::from(us) - i32::from(RC_PULSE_CENTER_US)) * 2;
    v.clamp(-i32::from(SPEED_MAX), i32::from(SPEED_MAX)) as i16
}

/// Lever with its rest position at the bottom (µs) to 0..=1000.
pub fn lever_to_speed(us: u16) -> i16 {
    (i32::from(us) - i32::from(RC_PULSE_MIN_US)).clamp(0, i32::from(SPEED_MAX)) as i16
}

/// Wrap any angle into `0..360`.
pub fn wrap_heading(deg: f32) -> f32 {
    let w = deg % 360.0;
    if w < 0.0 {
        w + 360.0
    } else {
        w
    }
}

/// Shortest signed turn from `yaw` to `target`, in `-180..=180`.
pub fn heading_error(target: f32, yaw: f32) -> f32 {
    let err = (target - yaw) % 360.0;
    if err > 180.0 {
        err - 360.0
    } else if err < -180.0 {
        err + 360.0
    } else {
        err
    }
}

/// Tank mix of throttle and steering on the drive ESCs, weapon lever on all
/// weapon ESCs.
///
/// With the steering stick centred and heading lock enabled, steering is
/// replaced by a fixed-rate turn towards the target heading until the error
/// is inside the deadband. An inverted robot mirrors the drive. Mode ids are
/// ignored.
#[derive(Debug, Clone, Copy, Default)]
pub struct DirectMix;

impl ControlLaw for DirectMix {
    fn compute(&mut self, input: &ControlInput) -> Demand {
        let controls = &input.controls;
        let throttle = i32::from(stick_to_speed(controls.throttle()));
        let mut steering = i32::from(stick_to_speed(controls.steering()));

        let lock = input.telemetry.heading_lock;
        if lock.enabled && steering == 0 {
            let err = heading_error(lock.target, input.telemetry.orientation.yaw);
            if err.abs() > f32::from(lock.deadband) {
                let turn = i32::from(lock.speed.min(100)) * 10;
                steering = if err > 0.0 { turn } else { -turn };
            }
        }

        let limit = i32::from(SPEED_MAX);
        let mut left = (throttle + steering).clamp(-limit, limit);
        let mut right = (throttle - steering).clamp(-limit, limit);
        if input.telemetry.inverted {
            (left, right) = (-right, -left);
        }

        let weapon = lever_to_speed(controls.weapon());
        let mut demand = [0; ESC_COUNT];
        demand[EscId::Drive1.index()] = left as i16;
        demand[EscId::Drive2.index()] = right as i16;
        demand[EscId::Drive3.index()] = ((left + right) / 2) as i16;
        for speed in demand[DRIVE_ESC_COUNT..].iter_mut() {
            *speed = weapon;
        }
        demand
    }
}

/// First controller whose link is fresher than `rc_timeout`.
fn live_controls(snapshot: &ControlsSnapshot, now: Instant, rc_timeout: Duration) -> Option<RcControls> {
    (0..RC_NUMBER_CONTROLLERS)
        .find(|&i| {
            snapshot.receiver[i]
                .last_update
                .is_some_and(|t| now.saturating_duration_since(t) <= rc_timeout)
        })
        .map(|i| snapshot.controls[i])
}

pub struct ControlLoop<'a, L> {
    state: &'a SharedState,
    law: L,
}

impl<'a, L: ControlLaw> ControlLoop<'a, L> {
    pub fn new(state: &'a SharedState, law: L) -> Self {
        Self { state, law }
    }

    /// One control cycle. A lock timeout abandons the cycle before the
    /// watchdog is petted.
    pub async fn step(&mut self, now: Instant) -> Result<(), LockTimeout> {
        let state = self.state;

        let mut batch: heapless::Vec<Command, COMMAND_QUEUE_LEN> = heapless::Vec::new();
        if let Some(first) = state.commands.dequeue(state.config.dequeue_timeout).await {
            let _ = batch.push(first);
            state.commands.drain_into(&mut batch);
        }
        self.process_batch(&batch).await;

        let snapshot = {
            let region = state.lock_controls().await?;
            ControlsSnapshot {
                controls: region.controls,
                receiver: region.receiver,
            }
        };
        let telemetry = *state.lock_telemetry().await?;

        let demand = match live_controls(&snapshot, now, state.config.rc_timeout) {
            Some(controls) => self.law.compute(&ControlInput {
                controls,
                telemetry,
                drive_mode: state.drive_mode(),
                weapon_mode: state.weapon_mode(),
            }),
            None => {
                Counters::bump(&state.counters.stale_rc_cycles);
                [0; ESC_COUNT]
            }
        };

        let arming = state.arming_state();
        let mut speeds = [0; ESC_COUNT];
        for id in EscId::ALL {
            speeds[id.index()] = gate(arming, id.class(), demand[id.index()]);
        }
        {
            let mut outputs = state.lock_outputs().await?;
            outputs.speeds = speeds;
            outputs.sequence = outputs.sequence.wrapping_add(1);
        }

        state.watchdog.pet(now);
        let fault = state.hardware_fault() || state.failsafe_latched();
        state.leds.show(StatusLeds::code_for(arming, fault));
        Counters::bump(&state.counters.control_cycles);
        Ok(())
    }

    pub async fn run(&mut self) -> ! {
        let mut ticker = Ticker::every(self.state.config.control_period);
        loop {
            if let Err(e) = self.step(Instant::now()).await {
                crate::log_warn!("control cycle skipped: {}", e);
            }
            ticker.next().await;
        }
    }

    /// A disarm-all anywhere in the batch is applied first; arming commands
    /// queued before it are dropped as superseded.
    async fn process_batch(&self, batch: &[Command]) {
        let cutoff = batch.iter().rposition(Command::is_disarm_all);
        if cutoff.is_some() {
            let _ = self.apply_arming(ArmCommand::DISARM_ALL);
        }

        for (i, cmd) in batch.iter().enumerate() {
            if let Some(pos) = cutoff {
                if i == pos {
                    continue;
                }
                if i < pos && cmd.arm_command().is_some() {
                    Counters::bump(&self.state.counters.superseded_commands);
                    crate::log_debug!("{} superseded by disarm-all", cmd.id);
                    continue;
                }
            }
            self.dispatch(cmd).await;
        }
    }

    async fn dispatch(&self, cmd: &Command) {
        if let Some(arm) = cmd.arm_command() {
            let _ = self.apply_arming(arm);
            return;
        }

        match cmd.id {
            CommandId::AckFailsafe => self.acknowledge_failsafe(),
            CommandId::DriveModeSelect => match cmd.int().and_then(|m| u8::try_from(m).ok()) {
                Some(mode) => self.state.set_drive_mode(mode),
                None => crate::log_warn!("bad drive mode payload"),
            },
            CommandId::WeaponModeSelect => match cmd.int().and_then(|m| u8::try_from(m).ok()) {
                Some(mode) => self.state.set_weapon_mode(mode),
                None => crate::log_warn!("bad weapon mode payload"),
            },
            CommandId::HeadingLockSet
            | CommandId::HeadingLockDisable
            | CommandId::HeadingLockSpeed
            | CommandId::HeadingLockDeadband
            | CommandId::OrientationOverride => {
                if let Err(e) = self.update_telemetry(cmd).await {
                    crate::log_warn!("{} dropped: {}", cmd.id, e);
                }
            }
            CommandId::ArmDrive
            | CommandId::ArmWeapon
            | CommandId::ArmAll
            | CommandId::DisarmDrive
            | CommandId::DisarmWeapon
            | CommandId::DisarmAll
            | CommandId::Stop => {}
        }
    }

    fn apply_arming(&self, command: ArmCommand) -> Result<ArmingState, TransitionError> {
        let result = self.transition(command);
        match result {
            Ok(_) => {}
            Err(TransitionError::Latched) => {
                Counters::bump(&self.state.counters.latched_rejections);
                crate::log_warn!("{} rejected: arming latched off", command);
            }
            Err(e) => {
                Counters::bump(&self.state.counters.invalid_transitions);
                crate::log_warn!("{}", e);
            }
        }
        result
    }

    fn transition(&self, command: ArmCommand) -> Result<ArmingState, TransitionError> {
        let state = self.state;
        if matches!(command, ArmCommand::Arm(_))
            && (state.hardware_fault() || state.failsafe_latched())
        {
            return Err(TransitionError::Latched);
        }

        let from = state.arming.load();
        let to = from.apply(command)?;
        if to == from {
            return Ok(to);
        }
        if !state.arming.commit(from, to) {
            // Watchdog forced Disarmed between load and commit.
            return match command {
                ArmCommand::Arm(_) => Err(TransitionError::Latched),
                ArmCommand::Disarm(_) => Ok(state.arming.load()),
            };
        }

        if to.is_armed() {
            if !state.activate(to) {
                return Err(TransitionError::Latched);
            }
        } else {
            state.deactivate();
        }
        crate::log_info!("arming {} -> {} ({})", from, to, command);
        Ok(to)
    }

    fn acknowledge_failsafe(&self) {
        let state = self.state;
        if state.failsafe_latched() && state.arming_state() == ArmingState::Disarmed {
            state.clear_failsafe();
            crate::log_info!("failsafe acknowledged");
        }
    }

    async fn update_telemetry(&self, cmd: &Command) -> Result<(), LockTimeout> {
        let mut region = self.state.lock_telemetry().await?;
        let lock = &mut region.heading_lock;
        match cmd.id {
            CommandId::HeadingLockSet => {
                if let Some(deg) = cmd.float() {
                    lock.enabled = true;
                    lock.target = wrap_heading(deg);
                }
            }
            CommandId::HeadingLockDisable => lock.enabled = false,
            CommandId::HeadingLockSpeed => {
                if let Some(v) = cmd.int() {
                    lock.speed = v.clamp(0, 100) as u8;
                }
            }
            CommandId::HeadingLockDeadband => {
                if let Some(v) = cmd.int() {
                    lock.deadband = v.clamp(0, 180) as u8;
                }
            }
            CommandId::OrientationOverride => {
                match cmd.int().and_then(Orientation::from_code) {
                    Some(o) => {
                        region.orientation_override = o;
                        region.inverted = effective_orientation(o, region.orientation_detected)
                            == Orientation::Inverted;
                    }
                    None => crate::log_warn!("bad orientation override payload"),
                }
            }
            _ => {}
        }
        Ok(())
    }
}
