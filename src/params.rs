use crate::{
    arb::ArbMode,
    error::Error,
    hw::Capability,
    range::{CURRENT_RANGES, RangeLock, VOLTAGE_RANGES},
    sequence::ROM_SEQUENCES,
};

pub const RIPPLE_DEPTH_MAX: u8 = 100;
pub const RIPPLE_TIME_MAX_MS: u16 = 30000;
pub const ARB_DELAY_MAX_MS: u16 = 30000;

/// Hardware population options.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct Options {
    /// 16 bit DAC (LTC1655) instead of the 12 bit LTC1257.
    pub dac16: bool,
    /// External 16 bit ADC (LTC1864). Without it the on-chip 10 bit ADC is used.
    pub adc16: bool,
    /// Do not report a blown fuse on low input voltage.
    pub suppress_fuse_msg: bool,
}

/// Calibration and configuration of one channel.
///
/// This is the single authoritative configuration object.
/// It is loaded from and committed to persistent storage through a [ParamStore].
#[derive(Copy, Clone, PartialEq, Debug)]
pub struct Params {
    pub dac_u_offsets: [i16; VOLTAGE_RANGES],
    pub dac_u_scales: [f32; VOLTAGE_RANGES],
    pub dac_i_offsets: [i16; CURRENT_RANGES],
    pub dac_i_scales: [f32; CURRENT_RANGES],
    pub adc_u_offsets: [i16; VOLTAGE_RANGES],
    pub adc_u_scales: [f32; VOLTAGE_RANGES],
    pub adc_i_offsets: [i16; CURRENT_RANGES],
    pub adc_i_scales: [f32; CURRENT_RANGES],
    pub init_voltage: f32,
    pub init_current: f32,
    /// Gain of the amplifier behind the DAC in the high voltage range.
    pub gain_pre: f32,
    /// Gain of the output sense amplifier.
    pub gain_out: f32,
    /// Divider behind the current DAC.
    pub gain_i: f32,
    pub ref_voltage: f32,
    /// Ceiling of each voltage range, ascending.
    pub max_voltage: [f32; VOLTAGE_RANGES],
    /// Shunt resistance of each current range.
    pub r_sense: [f32; CURRENT_RANGES],
    /// Ceiling of each current range, ascending.
    pub max_current: [f32; CURRENT_RANGES],
    pub adc_u_factors: [f32; VOLTAGE_RANGES],
    pub options: Options,
    /// Output voltage above which the high input rail is requested.
    pub relay_voltage: f32,
    pub ripple_on_ms: u16,
    pub ripple_off_ms: u16,
    pub ripple_depth: u8,
    /// Divider of the input voltage sense.
    pub gain_pwr_in: f32,
    pub lock_range_u: RangeLock,
    pub lock_range_i: RangeLock,
    pub output_on: bool,
}

impl Params {
    /// Board with 16 bit DAC and 16 bit ADC.
    pub const DEFAULT_16BIT: Params = Params {
        dac_u_offsets: [10, 10],
        dac_u_scales: [1.0, 1.0],
        dac_i_offsets: [40, 40, 40, 40],
        dac_i_scales: [1.0, 1.0, 1.0, 1.0],
        adc_u_offsets: [-306, -306],
        adc_u_scales: [1.0047, 1.0047],
        adc_i_offsets: [-306, -306, -306, -306],
        adc_i_scales: [1.0047, 1.0047, 1.0047, 1.0047],
        init_voltage: 5.0,
        init_current: 0.02,
        gain_pre: 3.0,
        gain_out: 3.0,
        gain_i: 0.25,
        ref_voltage: 2.5,
        max_voltage: [12.1, 30.0],
        r_sense: [470.0, 47.0, 4.7, 0.47],
        max_current: [0.002, 0.02, 0.2, 2.0],
        adc_u_factors: [2.0, 6.0],
        options: Options {
            dac16: true,
            adc16: true,
            suppress_fuse_msg: false,
        },
        relay_voltage: 12.5,
        ripple_on_ms: 0,
        ripple_off_ms: 0,
        ripple_depth: 0,
        gain_pwr_in: 19.0,
        lock_range_u: RangeLock::Auto,
        lock_range_i: RangeLock::Auto,
        output_on: true,
    };

    /// Board with 12 bit DAC and the on-chip 10 bit ADC.
    pub const DEFAULT_12BIT: Params = Params {
        dac_u_offsets: [5, 5],
        dac_u_scales: [1.0, 1.0],
        dac_i_offsets: [10, 10, 10, 10],
        dac_i_scales: [1.0, 1.0, 1.0, 1.0],
        adc_u_offsets: [0, 0],
        adc_u_scales: [1.0, 1.0],
        adc_i_offsets: [0, 0, 0, 0],
        adc_i_scales: [1.0, 1.0, 1.0, 1.0],
        init_voltage: 5.0,
        init_current: 0.02,
        gain_pre: 5.0,
        gain_out: 3.0,
        gain_i: 0.5,
        ref_voltage: 2.048,
        max_voltage: [6.0, 20.0],
        r_sense: [470.0, 47.0, 4.7, 0.47],
        max_current: [0.002, 0.02, 0.2, 2.0],
        adc_u_factors: [1.0, 5.0],
        options: Options {
            dac16: false,
            adc16: false,
            suppress_fuse_msg: false,
        },
        relay_voltage: 12.5,
        ripple_on_ms: 0,
        ripple_off_ms: 0,
        ripple_depth: 0,
        gain_pwr_in: 19.0,
        lock_range_u: RangeLock::Auto,
        lock_range_i: RangeLock::Auto,
        output_on: true,
    };

    /// Replace locks that name a range the channel does not have by [RangeLock::Auto].
    pub fn sanitize_locks(&mut self) {
        if let RangeLock::Fixed(r) = self.lock_range_u
            && r as usize >= VOLTAGE_RANGES
        {
            self.lock_range_u = RangeLock::Auto;
        }
        if let RangeLock::Fixed(r) = self.lock_range_i
            && r as usize >= CURRENT_RANGES
        {
            self.lock_range_i = RangeLock::Auto;
        }
    }
}

impl Default for Params {
    fn default() -> Self {
        Self::DEFAULT_16BIT
    }
}

/// Persistent storage of the [Params].
pub trait ParamStore {
    /// Load the stored parameters.
    /// Returns [Error::StorageUninitialized], if nothing was committed yet.
    fn load(&mut self) -> Result<Params, Error>;

    fn commit(&mut self, params: &Params) -> Result<(), Error>;
}

/// Ripple modulation request.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Default)]
pub struct RippleParams {
    /// Modulation depth in percent.
    pub depth: u8,
    pub on_ms: u16,
    pub off_ms: u16,
}

impl RippleParams {
    pub const OFF: RippleParams = RippleParams {
        depth: 0,
        on_ms: 0,
        off_ms: 0,
    };

    #[inline]
    pub fn is_enabled(&self) -> bool {
        self.depth != 0 && self.on_ms != 0 && self.off_ms != 0
    }
}

/// Run time regulation state, as set by the command and panel layers.
#[derive(Copy, Clone, PartialEq, Debug)]
pub struct Settings {
    /// Voltage setpoint in volts.
    pub voltage: f32,
    /// Current limit in amperes.
    pub current: f32,
    /// Fraction of the voltage setpoint that is output. Reset on range change.
    pub voltage_mod: f32,
    /// Fraction of the current setpoint that is output. Reset on range change.
    pub current_mod: f32,
    pub ripple: RippleParams,
    pub arb_mode: ArbMode,
    /// Remaining sequence repetitions. 0xFF repeats forever.
    pub arb_repeat: u8,
    pub arb_delay_ms: u16,
    /// Selected sequence within the RAM sequence buffer.
    pub ram_select: u8,
    pub lock_u: RangeLock,
    pub lock_i: RangeLock,
    pub output_on: bool,
}

impl Settings {
    pub const fn new() -> Self {
        Self {
            voltage: 0.0,
            current: 0.0,
            voltage_mod: 1.0,
            current_mod: 1.0,
            ripple: RippleParams::OFF,
            arb_mode: ArbMode::Off,
            arb_repeat: crate::arb::REPEAT_FOREVER,
            arb_delay_ms: 0,
            ram_select: 0,
            lock_u: RangeLock::Auto,
            lock_i: RangeLock::Auto,
            output_on: true,
        }
    }

    pub fn from_params(p: &Params) -> Self {
        Self {
            voltage: p.init_voltage,
            current: p.init_current,
            ripple: RippleParams {
                depth: p.ripple_depth,
                on_ms: p.ripple_on_ms,
                off_ms: p.ripple_off_ms,
            },
            lock_u: p.lock_range_u,
            lock_i: p.lock_range_i,
            output_on: p.output_on,
            ..Self::new()
        }
    }

    /// Store the persistable part of the settings into `p`.
    pub fn store_into(&self, p: &mut Params) {
        p.init_voltage = self.voltage;
        p.init_current = self.current;
        p.ripple_depth = self.ripple.depth;
        p.ripple_on_ms = self.ripple.on_ms;
        p.ripple_off_ms = self.ripple.off_ms;
        p.lock_range_u = self.lock_u;
        p.lock_range_i = self.lock_i;
        p.output_on = self.output_on;
    }

    /// Clamp every field into its legal range.
    pub fn check_limits(&mut self, p: &Params, cap: Capability) {
        let max_u = match self.lock_u {
            RangeLock::Fixed(r) if (r as usize) < VOLTAGE_RANGES => p.max_voltage[r as usize],
            _ => p.max_voltage[VOLTAGE_RANGES - 1],
        };
        let max_i = match self.lock_i {
            RangeLock::Fixed(r) if (r as usize) < CURRENT_RANGES => p.max_current[r as usize],
            _ => p.max_current[CURRENT_RANGES - 1],
        };
        self.voltage = clamp_f32(self.voltage, 0.0, max_u);
        self.current = clamp_f32(self.current, 0.0, max_i);
        self.voltage_mod = clamp_f32(self.voltage_mod, 0.0, 1.0);
        self.current_mod = clamp_f32(self.current_mod, 0.0, 1.0);

        self.ripple.depth = self.ripple.depth.min(RIPPLE_DEPTH_MAX);
        self.ripple.on_ms = self.ripple.on_ms.min(RIPPLE_TIME_MAX_MS);
        self.ripple.off_ms = self.ripple.off_ms.min(RIPPLE_TIME_MAX_MS);
        if cap == Capability::SingleDac {
            // The ripple generator runs in 2 ms steps.
            self.ripple.on_ms = round_up_even(self.ripple.on_ms);
            self.ripple.off_ms = round_up_even(self.ripple.off_ms);
        }

        if let ArbMode::Rom(index) = self.arb_mode {
            self.arb_mode = ArbMode::Rom(index.min(ROM_SEQUENCES as u8 - 1));
        }
        self.arb_delay_ms = self.arb_delay_ms.min(ARB_DELAY_MAX_MS);
    }

    /// Ripple modulation is running.
    #[inline]
    pub fn ripple_active(&self) -> bool {
        self.ripple.is_enabled() && self.arb_mode == ArbMode::Off
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self::new()
    }
}

#[inline]
fn round_up_even(ms: u16) -> u16 {
    ms + (ms & 1)
}

/// Clamp that maps NaN to `min`.
#[inline]
pub fn clamp_f32(value: f32, min: f32, max: f32) -> f32 {
    if value >= min {
        if value <= max { value } else { max }
    } else {
        min
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_check_limits() {
        let p = Params::DEFAULT_16BIT;
        let mut s = Settings::from_params(&p);
        s.voltage = 50.0;
        s.current = -1.0;
        s.voltage_mod = 1.5;
        s.ripple = RippleParams {
            depth: 150,
            on_ms: 40001,
            off_ms: 33,
        };
        s.arb_mode = ArbMode::Rom(9);
        s.arb_delay_ms = 65000;
        s.check_limits(&p, Capability::SingleDac);

        assert_eq!(s.voltage, 30.0);
        assert_eq!(s.current, 0.0);
        assert_eq!(s.voltage_mod, 1.0);
        assert_eq!(s.ripple.depth, 100);
        assert_eq!(s.ripple.on_ms, 30000);
        assert_eq!(s.ripple.off_ms, 34);
        assert_eq!(s.arb_mode, ArbMode::Rom(3));
        assert_eq!(s.arb_delay_ms, 30000);

        // Dual DAC hardware keeps odd times.
        s.ripple.off_ms = 33;
        s.check_limits(&p, Capability::DualDac);
        assert_eq!(s.ripple.off_ms, 33);
    }

    #[test]
    fn test_check_limits_locked_range() {
        let p = Params::DEFAULT_16BIT;
        let mut s = Settings::from_params(&p);
        s.lock_u = RangeLock::Fixed(0);
        s.lock_i = RangeLock::Fixed(1);
        s.voltage = 20.0;
        s.current = 1.0;
        s.check_limits(&p, Capability::DualDac);
        assert_eq!(s.voltage, 12.1);
        assert_eq!(s.current, 0.02);
    }

    #[test]
    fn test_ripple_active() {
        let mut s = Settings::new();
        s.ripple = RippleParams {
            depth: 50,
            on_ms: 100,
            off_ms: 50,
        };
        assert!(s.ripple_active());
        s.arb_mode = ArbMode::Ram;
        assert!(!s.ripple_active());
        s.arb_mode = ArbMode::Off;
        s.ripple.off_ms = 0;
        assert!(!s.ripple_active());
    }

    #[test]
    fn test_settings_round_trip_params() {
        let mut p = Params::DEFAULT_12BIT;
        let mut s = Settings::from_params(&p);
        s.voltage = 7.5;
        s.lock_i = RangeLock::Fixed(2);
        s.output_on = false;
        s.store_into(&mut p);
        assert_eq!(p.init_voltage, 7.5);
        assert_eq!(p.lock_range_i, RangeLock::Fixed(2));
        assert!(!p.output_on);
        assert_eq!(Settings::from_params(&p).voltage, 7.5);
    }

    #[test]
    fn test_sanitize_locks() {
        let mut p = Params::DEFAULT_16BIT;
        p.lock_range_u = RangeLock::Fixed(2);
        p.lock_range_i = RangeLock::Fixed(3);
        p.sanitize_locks();
        assert_eq!(p.lock_range_u, RangeLock::Auto);
        assert_eq!(p.lock_range_i, RangeLock::Fixed(3));
    }
}

// vim: ts=4 sw=4 expandtab
