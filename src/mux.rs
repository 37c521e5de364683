//! Output multiplexer.
//!
//! The multiplexer interrupt runs every 500 us and walks through a 4 phase cycle:
//!
//! | phase | single DAC             | dual DAC                | external ADC         |
//! |-------|------------------------|-------------------------|----------------------|
//! | 0     |                        |                         | current, select U    |
//! | 1     | current output         | voltage + current       |                      |
//! | 2     |                        |                         | voltage, select I    |
//! | 3     | ripple, voltage output | ripple, voltage + curr. |                      |
//!
//! On dual DAC hardware the ripple generator also runs in phase 1.

use crate::{
    arb::{PlaybackTable, Sequencer},
    hw::{Capability, Channel, OutputHw},
    mutex::{IrqCell, IrqCtx, MainCtx, SharedCell},
    params::RippleParams,
    range::{CurrentRange, RangeAction, RangeSm, VoltageRange},
    ripple::{Ripple, SampleGate},
    timer::JobTimers,
};

/// Number of 500 us invocations per multiplex cycle.
pub const MUX_PHASES: u8 = 4;

/// Raw ADC samples of one channel.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Default)]
pub struct RawSample {
    /// Regular sample, or the settled ripple high level.
    pub high: u16,
    /// Settled ripple low level. Equal to `high` without ripple.
    pub low: u16,
}

/// Raw samples of both channels.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Default)]
pub struct RawSamples {
    pub voltage: RawSample,
    pub current: RawSample,
}

/// Range lines as currently driven by the multiplexer.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct ActiveRanges {
    pub voltage: VoltageRange,
    pub current: CurrentRange,
}

/// Published voltage channel target.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct VoltageTarget {
    pub code: u16,
    /// Code of the ripple low level.
    pub low_code: u16,
    pub range: VoltageRange,
    /// Must be [RippleParams::OFF] while arbitrary mode is active.
    pub ripple: RippleParams,
}

/// Published current channel target.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct CurrentTarget {
    pub code: u16,
    pub range: CurrentRange,
}

pub struct Multiplexer {
    // Published by the main loop.
    voltage: SharedCell<VoltageTarget>,
    current: SharedCell<CurrentTarget>,
    output_on: SharedCell<bool>,
    adc_ext: SharedCell<bool>,
    arb: PlaybackTable,

    // Published by the interrupt.
    raw_u: SharedCell<RawSample>,
    raw_i: SharedCell<RawSample>,
    applied_u: SharedCell<VoltageRange>,
    applied_i: SharedCell<CurrentRange>,

    // Interrupt state.
    phase: IrqCell<u8>,
    range_u: IrqCell<RangeSm>,
    range_i: IrqCell<RangeSm>,
    ripple: IrqCell<Ripple>,
    seq: IrqCell<Sequencer>,
    last_code: IrqCell<[Option<u16>; 2]>,
}

impl Multiplexer {
    pub const fn new() -> Self {
        Self {
            voltage: SharedCell::new(VoltageTarget {
                code: 0,
                low_code: 0,
                range: VoltageRange::Low,
                ripple: RippleParams::OFF,
            }),
            current: SharedCell::new(CurrentTarget {
                code: 0,
                range: CurrentRange::Ma2,
            }),
            output_on: SharedCell::new(false),
            adc_ext: SharedCell::new(false),
            arb: PlaybackTable::new(),
            raw_u: SharedCell::new(RawSample { high: 0, low: 0 }),
            raw_i: SharedCell::new(RawSample { high: 0, low: 0 }),
            applied_u: SharedCell::new(VoltageRange::Low),
            applied_i: SharedCell::new(CurrentRange::Ma2),
            phase: IrqCell::new(0),
            range_u: IrqCell::new(RangeSm::new()),
            range_i: IrqCell::new(RangeSm::new()),
            ripple: IrqCell::new(Ripple::new()),
            seq: IrqCell::new(Sequencer::new()),
            last_code: IrqCell::new([None; 2]),
        }
    }

    pub fn set_voltage(&self, m: &MainCtx<'_>, target: VoltageTarget) {
        self.voltage.set(m, target);
    }

    pub fn voltage(&self, m: &MainCtx<'_>) -> VoltageTarget {
        self.voltage.get(m)
    }

    pub fn set_current(&self, m: &MainCtx<'_>, target: CurrentTarget) {
        self.current.set(m, target);
    }

    pub fn current(&self, m: &MainCtx<'_>) -> CurrentTarget {
        self.current.get(m)
    }

    pub fn set_output_on(&self, m: &MainCtx<'_>, on: bool) {
        self.output_on.set(m, on);
    }

    /// Acquire samples with the external 16 bit ADC in the even phases.
    pub fn set_adc_ext(&self, m: &MainCtx<'_>, present: bool) {
        self.adc_ext.set(m, present);
    }

    pub fn playback(&self) -> &PlaybackTable {
        &self.arb
    }

    pub fn raw_samples(&self, m: &MainCtx<'_>) -> RawSamples {
        m.critical(|cs| RawSamples {
            voltage: self.raw_u.get_cs(cs),
            current: self.raw_i.get_cs(cs),
        })
    }

    pub fn active_ranges(&self, m: &MainCtx<'_>) -> ActiveRanges {
        m.critical(|cs| ActiveRanges {
            voltage: self.applied_u.get_cs(cs),
            current: self.applied_i.get_cs(cs),
        })
    }

    /// Run one multiplexer phase. Called every 500 us by the multiplexer interrupt.
    pub fn run(&self, c: &IrqCtx<'_>, cap: Capability, jobs: &JobTimers, hw: &mut impl OutputHw) {
        let phase = self.phase.get(c);

        if phase & 1 != 0 {
            if cap == Capability::DualDac || phase == 3 {
                let mut ripple = self.ripple.get(c);
                ripple.update(&self.voltage.get_irq(c).ripple, cap.step_ms());
                self.ripple.set(c, ripple);
            }

            match cap {
                Capability::SingleDac => {
                    hw.dac_track(Channel::Voltage, false);
                    hw.dac_track(Channel::Current, false);

                    let ch = if phase == 3 {
                        Channel::Voltage
                    } else {
                        Channel::Current
                    };
                    let code = self.channel_code(c, cap, ch, hw);
                    hw.dac_write(ch, code);

                    jobs.irq_advance_1ms(c);
                    hw.poll_encoder();
                    hw.settle_delay();
                    hw.dac_track(ch, true);
                }
                Capability::DualDac => {
                    let mut last = self.last_code.get(c);
                    for ch in [Channel::Voltage, Channel::Current] {
                        let code = self.channel_code(c, cap, ch, hw);
                        if last[ch.index()] != Some(code) {
                            last[ch.index()] = Some(code);
                            hw.dac_write(ch, code);
                        }
                    }
                    self.last_code.set(c, last);

                    jobs.irq_advance_1ms(c);
                    hw.poll_encoder();
                    hw.settle_delay();
                }
            }
        } else if self.adc_ext.get_irq(c) {
            let (ch, next) = if phase == 2 {
                (Channel::Voltage, Channel::Current)
            } else {
                (Channel::Current, Channel::Voltage)
            };
            let raw = hw.adc_acquire();
            self.store_sample(c, cap, ch, raw);
            hw.adc_select(next);
            hw.poll_encoder();
        }

        self.phase.set(c, (phase + 1) % MUX_PHASES);
    }

    /// Code to output on `ch` in this service slot.
    fn channel_code(&self, c: &IrqCtx<'_>, cap: Capability, ch: Channel, hw: &mut impl OutputHw) -> u16 {
        match ch {
            Channel::Voltage => {
                let target = self.voltage.get_irq(c);
                let mut sm = self.range_u.get(c);
                let action = sm.service(target.range.into());
                self.range_u.set(c, sm);

                let out = match action {
                    RangeAction::Blank => 0,
                    RangeAction::BlankSwitch(range) => {
                        hw.set_range(ch, range);
                        self.applied_u.set_irq(c, target.range);
                        0
                    }
                    RangeAction::Output => {
                        let code = self.voltage_code(c, cap, &target);
                        if self.output_on.get_irq(c) { code } else { 0 }
                    }
                };
                if action != RangeAction::Output || !self.arb.config_irq(c).active {
                    // A sequence starting later holds what was really output.
                    let mut seq = self.seq.get(c);
                    seq.seed(out);
                    self.seq.set(c, seq);
                }
                out
            }
            Channel::Current => {
                let target = self.current.get_irq(c);
                let mut sm = self.range_i.get(c);
                let action = sm.service(target.range.into());
                self.range_i.set(c, sm);

                match action {
                    RangeAction::Blank => 0,
                    RangeAction::BlankSwitch(range) => {
                        hw.set_range(ch, range);
                        self.applied_i.set_irq(c, target.range);
                        0
                    }
                    RangeAction::Output => target.code,
                }
            }
        }
    }

    fn voltage_code(&self, c: &IrqCtx<'_>, cap: Capability, target: &VoltageTarget) -> u16 {
        let config = self.arb.config_irq(c);
        let mut seq = self.seq.get(c);
        if self.arb.take_restart_irq(c) {
            seq.restart(&config);
        }

        let code = if config.active {
            seq.next(|i| self.arb.segment_irq(c, i), &config, cap.step_ms())
        } else if self.ripple.get(c).is_low() {
            target.low_code
        } else {
            target.code
        };
        self.seq.set(c, seq);
        code
    }

    fn store_sample(&self, c: &IrqCtx<'_>, cap: Capability, ch: Channel, raw: u16) {
        let mut ripple = self.ripple.get(c);
        let gate = ripple.gate(&self.voltage.get_irq(c).ripple, ch, cap.ripple_settle_ms());
        self.ripple.set(c, ripple);

        let cell = match ch {
            Channel::Voltage => &self.raw_u,
            Channel::Current => &self.raw_i,
        };
        let mut sample = cell.get_irq(c);
        match gate {
            SampleGate::Both => {
                sample.high = raw;
                sample.low = raw;
            }
            SampleGate::High => sample.high = raw,
            SampleGate::Low => sample.low = raw,
            SampleGate::Reject => (),
        }
        cell.set_irq(c, sample);
    }
}

impl Default for Multiplexer {
    fn default() -> Self {
        Self::new()
    }
}


// vim: ts=4 sw=4 expandtab
