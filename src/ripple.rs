use crate::{hw::Channel, params::RippleParams};

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum RipplePhase {
    High,
    Low,
}

/// Classification of one ADC sample.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum SampleGate {
    /// No ripple. The sample is valid for the high and the low level.
    Both,
    /// Settled sample of the high level.
    High,
    /// Settled sample of the low level.
    Low,
    /// Sample taken too close to an edge.
    Reject,
}

/// Low level DAC code for a modulation depth in percent.
///
/// Computed in the code domain, rounded to nearest.
#[inline]
pub fn ripple_low_code(high_code: u16, depth: u8) -> u16 {
    let depth = depth.min(100) as u32;
    ((high_code as u32 * (100 - depth) + 50) / 100) as u16
}

/// Two level square wave generator, owned by the multiplexer interrupt.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct Ripple {
    enabled: bool,
    phase: RipplePhase,
    /// Remaining time of the current phase in ms.
    countdown: i16,
    /// Per channel: entered the high phase and no high sample was accepted yet.
    to_high: [bool; 2],
    /// Per channel: entered the low phase and no low sample was accepted yet.
    to_low: [bool; 2],
}

impl Ripple {
    pub const fn new() -> Self {
        Self {
            enabled: false,
            phase: RipplePhase::High,
            countdown: 0,
            to_high: [false; 2],
            to_low: [false; 2],
        }
    }

    #[inline]
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    #[inline]
    pub fn phase(&self) -> RipplePhase {
        self.phase
    }

    #[inline]
    pub fn countdown(&self) -> i16 {
        self.countdown
    }

    /// Output the low level code now.
    #[inline]
    pub fn is_low(&self) -> bool {
        self.enabled && self.phase == RipplePhase::Low
    }

    /// Advance the generator by `step_ms`.
    ///
    /// `cfg` must already be forced off by the publisher while arbitrary mode is active.
    pub fn update(&mut self, cfg: &RippleParams, step_ms: u16) {
        if !cfg.is_enabled() {
            *self = Self::new();
            return;
        }
        if !self.enabled {
            self.enabled = true;
            self.phase = RipplePhase::High;
            self.countdown = cfg.on_ms as i16;
        }

        if self.countdown <= 0 {
            match self.phase {
                RipplePhase::High => {
                    self.phase = RipplePhase::Low;
                    self.countdown = cfg.off_ms as i16;
                    self.to_low = [true; 2];
                }
                RipplePhase::Low => {
                    self.phase = RipplePhase::High;
                    self.countdown = cfg.on_ms as i16;
                    self.to_high = [true; 2];
                }
            }
        }
        self.countdown -= step_ms as i16;
    }

    /// Decide whether a sample of `ch` just acquired is a settled level measurement.
    pub fn gate(&mut self, cfg: &RippleParams, ch: Channel, settle_ms: i16) -> SampleGate {
        if !self.enabled {
            return SampleGate::Both;
        }
        let i = ch.index();
        let on = cfg.on_ms as i16;
        let off = cfg.off_ms as i16;
        match self.phase {
            RipplePhase::High => {
                if on - self.countdown >= settle_ms
                    || self.countdown <= 1
                    || (self.to_high[i] && on < 3)
                {
                    self.to_high[i] = false;
                    SampleGate::High
                } else {
                    SampleGate::Reject
                }
            }
            RipplePhase::Low => {
                if off - self.countdown >= settle_ms
                    || self.countdown <= 1
                    || (self.to_low[i] && off < 3)
                {
                    self.to_low[i] = false;
                    SampleGate::Low
                } else {
                    SampleGate::Reject
                }
            }
        }
    }
}

impl Default for Ripple {
    fn default() -> Self {
        Self::new()
    }
}


// vim: ts=4 sw=4 expandtab
