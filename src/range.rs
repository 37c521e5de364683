use crate::error::Error;
use num_enum::{IntoPrimitive, TryFromPrimitive};

pub const VOLTAGE_RANGES: usize = 2;
pub const CURRENT_RANGES: usize = 4;

#[derive(Copy, Clone, PartialEq, Eq, Debug, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum VoltageRange {
    Low = 0,
    High = 1,
}

#[derive(Copy, Clone, PartialEq, Eq, Debug, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum CurrentRange {
    Ma2 = 0,
    Ma20 = 1,
    Ma200 = 2,
    Ma2000 = 3,
}

impl VoltageRange {
    #[inline]
    pub fn index(self) -> usize {
        u8::from(self) as usize
    }
}

impl CurrentRange {
    #[inline]
    pub fn index(self) -> usize {
        u8::from(self) as usize
    }
}

/// Operator range lock.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Default)]
pub enum RangeLock {
    /// Select the range from the setpoint.
    #[default]
    Auto,
    /// Always use this range index.
    Fixed(u8),
}

impl RangeLock {
    /// Wire encoding of the parameter layer: 255 is [RangeLock::Auto].
    pub const AUTO_RAW: u8 = 0xFF;

    /// Decode and validate a lock for a channel with `count` ranges.
    pub fn from_raw(raw: u8, count: usize) -> Result<Self, Error> {
        if raw == Self::AUTO_RAW {
            Ok(RangeLock::Auto)
        } else if (raw as usize) < count {
            Ok(RangeLock::Fixed(raw))
        } else {
            Err(Error::RangeOutOfBounds(raw))
        }
    }

    pub fn to_raw(self) -> u8 {
        match self {
            RangeLock::Auto => Self::AUTO_RAW,
            RangeLock::Fixed(r) => r,
        }
    }
}

/// Smallest current range whose ceiling is not exceeded by `amps`.
/// A value above every ceiling selects the highest range.
pub fn select_current_range(ceilings: &[f32; CURRENT_RANGES], amps: f32, lock: RangeLock) -> CurrentRange {
    let index = match lock {
        RangeLock::Fixed(r) => r,
        RangeLock::Auto => {
            let mut r = 0;
            while r < CURRENT_RANGES - 1 && amps > ceilings[r] {
                r += 1;
            }
            r as u8
        }
    };
    CurrentRange::try_from(index).unwrap_or(CurrentRange::Ma2000)
}

/// Voltage range for a constant setpoint.
pub fn select_voltage_range(ceilings: &[f32; VOLTAGE_RANGES], volts: f32, lock: RangeLock) -> VoltageRange {
    let index = match lock {
        RangeLock::Fixed(r) => r,
        RangeLock::Auto if volts > ceilings[0] => 1,
        RangeLock::Auto => 0,
    };
    VoltageRange::try_from(index).unwrap_or(VoltageRange::High)
}

/// Result of scanning the levels of an arbitrary sequence.
#[derive(Copy, Clone, PartialEq, Debug)]
pub struct SequenceExcursion {
    pub range: VoltageRange,
    /// Lowest absolute voltage the sequence reaches.
    pub min_voltage: f32,
}

/// Voltage range that holds the full excursion of a sequence scaled by `setpoint`.
///
/// `levels` yields the normalized levels up to and including the terminator.
pub fn scan_sequence_range(
    ceilings: &[f32; VOLTAGE_RANGES],
    setpoint: f32,
    lock: RangeLock,
    levels: impl Iterator<Item = f32>,
) -> SequenceExcursion {
    let relative_low_ceiling = if setpoint > 0.0 {
        ceilings[0] / setpoint
    } else {
        f32::MAX
    };

    let mut high = false;
    let mut min_level: Option<f32> = None;
    for level in levels {
        if level > relative_low_ceiling {
            high = true;
        }
        min_level = Some(match min_level {
            Some(min) if min <= level => min,
            _ => level,
        });
    }

    let range = match lock {
        RangeLock::Auto if high => VoltageRange::High,
        RangeLock::Auto => VoltageRange::Low,
        RangeLock::Fixed(r) => VoltageRange::try_from(r).unwrap_or(VoltageRange::High),
    };
    SequenceExcursion {
        range,
        min_voltage: min_level.unwrap_or(1.0) * setpoint,
    }
}

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum RangeState {
    /// Blank output, range lines unchanged.
    Settling0,
    /// Blank output, range lines unchanged.
    Settling1,
    /// Blank output with the new range lines. Held for two services.
    Settling2 { second: bool },
    /// Normal output on the applied range.
    Active,
}

/// What the multiplexer does in one service slot of a channel.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum RangeAction {
    /// Output code 0.
    Blank,
    /// Output code 0 and drive the range lines.
    BlankSwitch(u8),
    /// Output the regular code.
    Output,
}

/// Per channel range switch sequencer, owned by the multiplexer interrupt.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct RangeSm {
    applied: Option<u8>,
    state: RangeState,
}

impl RangeSm {
    pub const fn new() -> Self {
        Self {
            applied: None,
            state: RangeState::Settling0,
        }
    }

    pub fn state(&self) -> RangeState {
        self.state
    }

    /// Advance by one service slot of the channel.
    pub fn service(&mut self, target: u8) -> RangeAction {
        if self.applied != Some(target) {
            self.applied = Some(target);
            self.state = RangeState::Settling0;
        }
        match self.state {
            RangeState::Settling0 => {
                self.state = RangeState::Settling1;
                RangeAction::Blank
            }
            RangeState::Settling1 => {
                self.state = RangeState::Settling2 { second: false };
                RangeAction::Blank
            }
            RangeState::Settling2 { second: false } => {
                self.state = RangeState::Settling2 { second: true };
                RangeAction::BlankSwitch(target)
            }
            RangeState::Settling2 { second: true } => {
                self.state = RangeState::Active;
                RangeAction::BlankSwitch(target)
            }
            RangeState::Active => RangeAction::Output,
        }
    }
}

impl Default for RangeSm {
    fn default() -> Self {
        Self::new()
    }
}


// vim: ts=4 sw=4 expandtab
