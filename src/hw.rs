//! Hardware seams of the core.
//!
//! The core never touches registers. The firmware implements these traits
//! on the real ports and converters, the tests implement them with recorders.

/// Converter architecture of the channel.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum Capability {
    /// One DAC, multiplexed into two sample-and-hold stages.
    SingleDac,
    /// Separate DACs for voltage and current.
    DualDac,
}

impl Capability {
    /// The capability selected at build time.
    pub const CONFIGURED: Capability = if cfg!(feature = "dual-dac") {
        Capability::DualDac
    } else {
        Capability::SingleDac
    };

    /// Time that passes between two services of the same output channel.
    #[inline]
    pub const fn step_ms(self) -> u16 {
        match self {
            Capability::SingleDac => 2,
            Capability::DualDac => 1,
        }
    }

    /// Minimum time after a ripple edge before a sample is trusted.
    #[inline]
    pub const fn ripple_settle_ms(self) -> i16 {
        match self {
            Capability::SingleDac => 25,
            Capability::DualDac => 15,
        }
    }
}

/// Output channel.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum Channel {
    Voltage,
    Current,
}

impl Channel {
    #[inline]
    pub const fn index(self) -> usize {
        match self {
            Channel::Voltage => 0,
            Channel::Current => 1,
        }
    }
}

/// Converters and multiplexer lines driven by the output multiplexer interrupt.
///
/// All methods must complete in bounded time.
pub trait OutputHw {
    /// Shift a code into the DAC of `ch`.
    /// On [Capability::SingleDac] hardware both channels share one DAC.
    fn dac_write(&mut self, ch: Channel, code: u16);

    /// Connect (`true`) or disconnect the sample-and-hold stage of `ch` from the shared DAC.
    /// Only used on [Capability::SingleDac] hardware.
    fn dac_track(&mut self, ch: Channel, track: bool);

    /// Drive the range selection lines of `ch`.
    fn set_range(&mut self, ch: Channel, range: u8);

    /// Run one conversion of the external ADC on the currently selected input.
    fn adc_acquire(&mut self) -> u16;

    /// Switch the external ADC input multiplexer to `ch`.
    fn adc_select(&mut self, ch: Channel);

    /// Extra DAC settle time before a sample-and-hold stage is connected.
    fn settle_delay(&mut self);

    /// Secondary fixed rate task. Runs after every output and acquisition.
    fn poll_encoder(&mut self);
}

/// Channels of the on-chip ADC.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
#[repr(u8)]
pub enum AnalogChannel {
    OutputVoltage = 2,
    OutputCurrent = 3,
    InputVoltage = 4,
}

/// Slow analog inputs read by the cooperative jobs.
pub trait AnalogIn {
    /// Blocking conversion with bounded latency.
    fn read_analog(&mut self, ch: AnalogChannel) -> u16;

    /// Heat sink temperature in degree Celsius, if a sensor is present.
    fn read_temperature(&mut self) -> Option<f32>;
}

/// Input rail relays.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum Relay {
    /// Low voltage input rail.
    LowRail,
    /// High voltage input rail.
    HighRail,
}

impl Relay {
    #[inline]
    pub const fn index(self) -> usize {
        match self {
            Relay::LowRail => 0,
            Relay::HighRail => 1,
        }
    }
}

pub trait RelayPort {
    fn set_relay(&mut self, relay: Relay, on: bool);

    /// Raw state of the regulator's constant current indicator.
    fn current_limit_active(&mut self) -> bool;
}


// vim: ts=4 sw=4 expandtab
