//! Recording ESC lines for host tests.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use crate::comms::{DshotLine, PulseOutput};
use crate::config::ESC_COUNT;
use crate::error::CommsError;

#[derive(Default)]
struct LineRecord {
    last: AtomicU32,
    writes: AtomicU32,
    period_us: AtomicU32,
}

/// Shared record of everything written to the six mock lines.
#[derive(Default)]
pub struct MockBus {
    lines: [LineRecord; ESC_COUNT],
    fail: AtomicBool,
}

impl MockBus {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn lines(self: &Arc<Self>) -> [MockLine; ESC_COUNT] {
        core::array::from_fn(|index| MockLine {
            bus: Arc::clone(self),
            index,
        })
    }

    /// Make every subsequent line operation report a hardware fault.
    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn last(&self, index: usize) -> u32 {
        self.lines[index].last.load(Ordering::SeqCst)
    }

    pub fn writes(&self, index: usize) -> u32 {
        self.lines[index].writes.load(Ordering::SeqCst)
    }

    pub fn period_us(&self, index: usize) -> u32 {
        self.lines[index].period_us.load(Ordering::SeqCst)
    }

    fn record(&self, index: usize, value: u32) -> Result<(), CommsError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(CommsError::Hardware);
        }
        let line = &self.lines[index];
        line.last.store(value, Ordering::SeqCst);
        line.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

pub struct MockLine {
    bus: Arc<MockBus>,
    index: usize,
}

impl PulseOutput for MockLine {
    fn set_period_us(&mut self, period_us: u32) -> Result<(), CommsError> {
        if self.bus.fail.load(Ordering::SeqCst) {
            return Err(CommsError::Hardware);
        }
        self.bus.lines[self.index]
            .period_us
            .store(period_us, Ordering::SeqCst);
        Ok(())
    }

    fn set_pulse_us(&mut self, pulse_us: u16) -> Result<(), CommsError> {
        self.bus.record(self.index, u32::from(pulse_us))
    }
}

impl DshotLine for MockLine {
    fn send_frame(&mut self, frame: u16) -> Result<(), CommsError> {
        self.bus.record(self.index, u32::from(frame))
    }
}
