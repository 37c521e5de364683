//! Arbitrary waveform sequences.
//!
//! A sequence is a list of breakpoints. Each breakpoint is a level relative to the
//! voltage setpoint and the time to ramp linearly to the next breakpoint.
//! A breakpoint with zero duration terminates the sequence.

use crate::{error::Error, hw::Capability};

/// Number of built-in sequences.
pub const ROM_SEQUENCES: usize = 4;

/// Capacity of the uploadable sequence buffer.
pub const RAM_SEQUENCE_LEN: usize = 75;

#[derive(Copy, Clone, PartialEq, Debug)]
pub struct Breakpoint {
    /// Level relative to the voltage setpoint, 0.0 to 1.0.
    pub level: f32,
    /// Ramp time to the next breakpoint. Zero terminates the sequence.
    pub duration_ms: u16,
}

impl Breakpoint {
    /// Padding entry of the sequence buffer.
    pub const DEFAULT: Breakpoint = Breakpoint::new(1.0, 0);

    pub const fn new(level: f32, duration_ms: u16) -> Self {
        Self { level, duration_ms }
    }

    #[inline]
    pub fn is_terminator(&self) -> bool {
        self.duration_ms == 0
    }
}

const fn bp(level: f32, duration_ms: u16) -> Breakpoint {
    Breakpoint::new(level, duration_ms)
}

/// A built-in sequence in variants for both multiplexer granularities.
pub struct RomSequence {
    pub name: &'static str,
    single_dac: &'static [Breakpoint],
    dual_dac: &'static [Breakpoint],
}

impl RomSequence {
    pub fn breakpoints(&self, cap: Capability) -> &'static [Breakpoint] {
        match cap {
            Capability::SingleDac => self.single_dac,
            Capability::DualDac => self.dual_dac,
        }
    }
}

/// Supply dropout test pulse.
const ISO4: &[Breakpoint] = &[
    bp(1.0, 200),
    bp(1.0, 20),
    bp(0.416667, 50),
    bp(0.416667, 10),
    bp(0.666667, 100),
    bp(0.666667, 20),
    bp(1.0, 0),
];

/// Dropout test pulse with sloped edges.
const ISO4M: &[Breakpoint] = &[
    bp(1.0, 200),
    bp(0.916667, 20),
    bp(0.416667, 50),
    bp(0.5, 10),
    bp(0.666667, 100),
    bp(0.75, 20),
    bp(1.0, 0),
];

/// Full wave rectified sine, 1 ms steps.
const GRAETZ_1MS: &[Breakpoint] = &[
    bp(1.0, 1),
    bp(0.9511, 1),
    bp(0.8090, 1),
    bp(0.5878, 1),
    bp(0.3090, 1),
    bp(0.0, 1),
    bp(0.3090, 1),
    bp(0.5878, 1),
    bp(0.8090, 1),
    bp(0.9511, 1),
    bp(1.0, 0),
];

/// Full wave rectified sine, 2 ms steps.
const GRAETZ_2MS: &[Breakpoint] = &[
    bp(1.0, 2),
    bp(0.5878, 2),
    bp(0.0, 2),
    bp(0.5878, 2),
    bp(1.0, 2),
    bp(1.0, 0),
];

/// Three short dips down to 5 V, 8 V and 10 V of a 12 V setpoint, 1 ms steps.
const PEAKS3_1MS: &[Breakpoint] = &[
    bp(1.0, 200),
    bp(1.0, 1),
    bp(0.416667, 1),
    bp(1.0, 10),
    bp(1.0, 1),
    bp(0.666667, 1),
    bp(1.0, 10),
    bp(1.0, 1),
    bp(0.833333, 1),
    bp(1.0, 0),
];

/// Three short dips, 2 ms steps.
const PEAKS3_2MS: &[Breakpoint] = &[
    bp(1.0, 198),
    bp(1.0, 2),
    bp(0.416667, 2),
    bp(1.0, 8),
    bp(1.0, 2),
    bp(0.666667, 2),
    bp(1.0, 8),
    bp(1.0, 2),
    bp(0.833333, 2),
    bp(1.0, 2),
    bp(1.0, 0),
];

pub static ROM: [RomSequence; ROM_SEQUENCES] = [
    RomSequence {
        name: "ISO4",
        single_dac: ISO4,
        dual_dac: ISO4,
    },
    RomSequence {
        name: "ISO4m",
        single_dac: ISO4M,
        dual_dac: ISO4M,
    },
    RomSequence {
        name: "Graetz",
        single_dac: GRAETZ_2MS,
        dual_dac: GRAETZ_1MS,
    },
    RomSequence {
        name: "3Peaks",
        single_dac: PEAKS3_2MS,
        dual_dac: PEAKS3_1MS,
    },
];

pub fn rom_sequence(index: u8, cap: Capability) -> Result<&'static [Breakpoint], Error> {
    ROM.get(index as usize)
        .map(|seq| seq.breakpoints(cap))
        .ok_or(Error::SequenceOutOfBounds(index))
}

/// Iterate a sequence up to and including its terminator.
///
/// A slice without terminator yields all of its entries.
pub fn until_terminator(seq: &[Breakpoint]) -> impl Iterator<Item = &Breakpoint> + '_ {
    let end = seq
        .iter()
        .position(Breakpoint::is_terminator)
        .map_or(seq.len(), |i| i + 1);
    seq[..end].iter()
}

/// The uploadable sequence buffer.
///
/// The buffer may hold several terminator separated sequences.
#[derive(Clone, PartialEq, Debug)]
pub struct RamSequence {
    entries: [Breakpoint; RAM_SEQUENCE_LEN],
}

impl RamSequence {
    pub const fn new() -> Self {
        Self {
            entries: [Breakpoint::DEFAULT; RAM_SEQUENCE_LEN],
        }
    }

    #[inline]
    pub fn entries(&self) -> &[Breakpoint; RAM_SEQUENCE_LEN] {
        &self.entries
    }

    #[inline]
    pub fn entries_mut(&mut self) -> &mut [Breakpoint; RAM_SEQUENCE_LEN] {
        &mut self.entries
    }

    /// Find the start index of sequence number `select`.
    ///
    /// Sequence 0 starts at index 0. Every further sequence starts at
    /// a non-terminator entry that follows a terminator.
    /// A `select` beyond the last sequence selects the last sequence.
    /// Returns the start index and the effective selection.
    pub fn find_start(&self, select: u8) -> (usize, u8) {
        let mut start = 0;
        let mut found = 0;
        for i in 1..RAM_SEQUENCE_LEN {
            if found == select {
                break;
            }
            if self.entries[i - 1].is_terminator() && !self.entries[i].is_terminator() {
                found += 1;
                start = i;
            }
        }
        (start, found)
    }

    /// The sequence starting at `start`.
    pub fn sequence(&self, start: usize) -> &[Breakpoint] {
        &self.entries[start.min(RAM_SEQUENCE_LEN - 1)..]
    }
}

impl Default for RamSequence {
    fn default() -> Self {
        Self::new()
    }
}

/// Persistent storage of the sequence buffer.
///
/// The layout is a fixed size array of breakpoints.
pub trait SequenceStore {
    /// Read slot `slot` into `out`.
    /// Returns [Error::StorageUninitialized], if the slot was never written.
    fn read_sequence(&mut self, slot: u8, out: &mut [Breakpoint; RAM_SEQUENCE_LEN]) -> Result<(), Error>;

    fn write_sequence(&mut self, slot: u8, seq: &[Breakpoint; RAM_SEQUENCE_LEN]) -> Result<(), Error>;
}


// vim: ts=4 sw=4 expandtab
