//! CRSF (Crossfire / ExpressLRS) receiver link.
//!
//! Frame layout: `[sync] [len] [type] [payload ..] [crc]` where `len` counts
//! type, payload and CRC. The CRC is CRC-8/DVB-S2 over type and payload.

use crate::config::RC_NUMBER_CHANNELS;
use crate::input::crsf_to_us;
use crate::state::RcChannel;

pub const CRSF_SYNC: u8 = 0xC8;
pub const CRSF_FRAMETYPE_RC_CHANNELS_PACKED: u8 = 0x16;
pub const CRSF_CHANNEL_COUNT: usize = 16;

const RC_CHANNELS_PAYLOAD_LEN: usize = 22;
const MAX_FRAME_LEN: usize = 64;
const LEN_BYTE_MIN: u8 = 2;
const LEN_BYTE_MAX: u8 = (MAX_FRAME_LEN - 2) as u8;

/// CRSF channel feeding each logical RC slot. Transmitter sticks are in AETR
/// order: right stick drives, left stick lever spins the weapon.
pub const CHANNEL_MAP: [usize; RC_NUMBER_CHANNELS] = {
    let mut map = [0; RC_NUMBER_CHANNELS];
    map[RcChannel::Throttle.index()] = 1;
    map[RcChannel::Steering.index()] = 0;
    map[RcChannel::Weapon.index()] = 2;
    map[RcChannel::Aux1.index()] = 4;
    map[RcChannel::Aux2.index()] = 5;
    map[RcChannel::Aux3.index()] = 6;
    map
};

/// Raw 11-bit channel values (172..=1811 in normal use).
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RcChannels {
    pub channels: [u16; CRSF_CHANNEL_COUNT],
}

impl RcChannels {
    /// Logical RC slots in µs, ready for [`crate::input::publish_frame`].
    pub fn to_controls(&self) -> [u16; RC_NUMBER_CHANNELS] {
        CHANNEL_MAP.map(|ch| crsf_to_us(self.channels[ch]))
    }
}

pub fn crc8_dvb_s2(data: &[u8]) -> u8 {
    data.iter().fold(0u8, |mut crc, &b| {
        crc ^= b;
        for _ in 0..8 {
            crc = if crc & 0x80 != 0 { (crc << 1) ^ 0xD5 } else { crc << 1 };
        }
        crc
    })
}

/// 16 channels of 11 bits, little-endian bit order.
fn unpack_channels(payload: &[u8; RC_CHANNELS_PAYLOAD_LEN]) -> RcChannels {
    let mut out = RcChannels::default();
    let mut acc: u32 = 0;
    let mut bits = 0;
    let mut ch = 0;
    for &byte in payload {
        acc |= u32::from(byte) << bits;
        bits += 8;
        while bits >= 11 && ch < CRSF_CHANNEL_COUNT {
            out.channels[ch] = (acc & 0x07FF) as u16;
            acc >>= 11;
            bits -= 11;
            ch += 1;
        }
    }
    out
}

#[derive(Default)]
pub struct CrsfParser {
    frame: heapless::Vec<u8, MAX_FRAME_LEN>,
    frames: u32,
    crc_errors: u32,
}

impl CrsfParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Good RC frames decoded so far.
    pub fn frames(&self) -> u32 {
        self.frames
    }

    pub fn crc_errors(&self) -> u32 {
        self.crc_errors
    }

    pub fn push_byte(&mut self, byte: u8) -> Option<RcChannels> {
        match self.frame.len() {
            0 => {
                if byte == CRSF_SYNC {
                    let _ = self.frame.push(byte);
                }
                return None;
            }
            1 => {
                self.frame.clear();
                if (LEN_BYTE_MIN..=LEN_BYTE_MAX).contains(&byte) {
                    let _ = self.frame.push(CRSF_SYNC);
                    let _ = self.frame.push(byte);
                } else if byte == CRSF_SYNC {
                    // Resync on a repeated sync byte.
                    let _ = self.frame.push(byte);
                }
                return None;
            }
            _ => {}
        }

        let _ = self.frame.push(byte);
        if self.frame.len() < usize::from(self.frame[1]) + 2 {
            return None;
        }
        let decoded = self.decode();
        self.frame.clear();
        decoded
    }

    /// Feed a chunk; returns the last RC frame completed in it.
    pub fn push_bytes(&mut self, data: &[u8]) -> Option<RcChannels> {
        data.iter().fold(None, |last, &b| self.push_byte(b).or(last))
    }

    fn decode(&mut self) -> Option<RcChannels> {
        let (body, crc) = self.frame[2..].split_at(self.frame.len() - 3);
        if crc8_dvb_s2(body) != crc[0] {
            self.crc_errors = self.crc_errors.wrapping_add(1);
            return None;
        }
        let (&kind, payload) = body.split_first()?;
        if kind != CRSF_FRAMETYPE_RC_CHANNELS_PACKED {
            return None;
        }
        let payload: &[u8; RC_CHANNELS_PAYLOAD_LEN] = payload.try_into().ok()?;
        self.frames = self.frames.wrapping_add(1);
        Some(unpack_channels(payload))
    }
}
