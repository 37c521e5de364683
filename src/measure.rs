use crate::{
    filter::Filter,
    mutex::{MainCtx, MutexCell},
    mux::{ActiveRanges, RawSamples},
    params::{Params, RippleParams, clamp_f32},
    range::{CurrentRange, VoltageRange},
    scale::Scales,
};

/// Measurement runs to skip after a range switch.
pub const RANGE_SETTLE_RUNS: u8 = 10;

/// Divider of the running means. 4 gives `(3 * mean + x) / 4`.
const MEAN_DIV: f32 = 4.0;

/// Current below this does not count into the energy.
const ENERGY_MIN_CURRENT: f32 = 0.000_01;

/// Energy runs per hour.
const ENERGY_RUNS_PER_HOUR: f32 = 36000.0;

const POWER_MIN: f32 = 0.000_000_1;
const POWER_MAX: f32 = 100_000.0;

#[derive(Copy, Clone, PartialEq, Debug, Default)]
pub struct Measurement {
    pub voltage: f32,
    /// Ripple low level. Equal to `voltage` without ripple.
    pub voltage_low: f32,
    pub current: f32,
    pub current_low: f32,
    pub mean_voltage: f32,
    pub mean_current: f32,
    pub power: f32,
    /// Power averaged over one ripple period.
    pub power_total: f32,
}

#[derive(Copy, Clone, PartialEq, Debug, Default, derive_more::Add, derive_more::AddAssign)]
pub struct Energy {
    pub amp_hours: f32,
    pub watt_hours: f32,
}

impl Energy {
    pub const ZERO: Energy = Energy {
        amp_hours: 0.0,
        watt_hours: 0.0,
    };
}

/// Converts raw samples into physical values.
pub struct Meter {
    last_u: MutexCell<Option<VoltageRange>>,
    last_i: MutexCell<Option<CurrentRange>>,
    wait_u: MutexCell<u8>,
    wait_i: MutexCell<u8>,
    mean_u: Filter,
    mean_i: Filter,
    values: MutexCell<Measurement>,
    energy: MutexCell<Energy>,
}

impl Meter {
    pub const fn new() -> Self {
        Self {
            last_u: MutexCell::new(None),
            last_i: MutexCell::new(None),
            wait_u: MutexCell::new(0),
            wait_i: MutexCell::new(0),
            mean_u: Filter::new(),
            mean_i: Filter::new(),
            values: MutexCell::new(Measurement {
                voltage: 0.0,
                voltage_low: 0.0,
                current: 0.0,
                current_low: 0.0,
                mean_voltage: 0.0,
                mean_current: 0.0,
                power: 0.0,
                power_total: 0.0,
            }),
            energy: MutexCell::new(Energy::ZERO),
        }
    }

    /// Measurement job.
    ///
    /// `ranges` are the ranges the samples were taken with.
    /// `ripple` is the active ripple configuration, if any.
    pub fn run(
        &self,
        m: &MainCtx<'_>,
        p: &Params,
        scales: &Scales,
        ranges: ActiveRanges,
        raw: RawSamples,
        ripple: Option<RippleParams>,
    ) -> Measurement {
        let mut v = self.values.get(m);

        if self.last_u.replace(m, Some(ranges.voltage)) != Some(ranges.voltage) {
            self.wait_u.set(m, RANGE_SETTLE_RUNS);
        }
        if self.last_i.replace(m, Some(ranges.current)) != Some(ranges.current) {
            self.wait_i.set(m, RANGE_SETTLE_RUNS);
        }

        let wait = self.wait_u.get(m);
        if wait > 0 {
            self.wait_u.set(m, wait - 1);
        } else {
            v.voltage = scales.voltage_from_raw(p, ranges.voltage, raw.voltage.high);
            v.voltage_low = scales.voltage_from_raw(p, ranges.voltage, raw.voltage.low);
            v.mean_voltage = self.mean_u.run(m, v.voltage, MEAN_DIV);
        }

        let wait = self.wait_i.get(m);
        if wait > 0 {
            self.wait_i.set(m, wait - 1);
        } else {
            v.current = scales.current_from_raw(p, ranges.current, raw.current.high);
            v.current_low = scales.current_from_raw(p, ranges.current, raw.current.low);
            v.mean_current = self.mean_i.run(m, v.current, MEAN_DIV);
        }

        v.power = v.voltage * v.current;
        let total = match ripple {
            Some(r) => {
                let on = r.on_ms as f32;
                let off = r.off_ms as f32;
                (v.power * on + v.voltage_low * v.current_low * off) / (on + off + 0.0001)
            }
            None => v.power,
        };
        v.power_total = clamp_f32(total, POWER_MIN, POWER_MAX);

        self.values.set(m, v);
        v
    }

    pub fn values(&self, m: &MainCtx<'_>) -> Measurement {
        self.values.get(m)
    }

    /// Energy job. Runs every 100 ms.
    pub fn accumulate_energy(&self, m: &MainCtx<'_>, ripple_active: bool) -> Energy {
        let v = self.values.get(m);
        let mut energy = self.energy.get(m);
        if ripple_active {
            energy = Energy::ZERO;
        } else if v.current > ENERGY_MIN_CURRENT {
            energy += Energy {
                amp_hours: v.current / ENERGY_RUNS_PER_HOUR,
                watt_hours: v.current * v.voltage / ENERGY_RUNS_PER_HOUR,
            };
        }
        self.energy.set(m, energy);
        energy
    }

    pub fn energy(&self, m: &MainCtx<'_>) -> Energy {
        self.energy.get(m)
    }

    pub fn reset_energy(&self, m: &MainCtx<'_>) {
        self.energy.set(m, Energy::ZERO);
    }
}

impl Default for Meter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::mutex::test::main_ctx;
    use crate::mux::RawSample;

    const RANGES: ActiveRanges = ActiveRanges {
        voltage: VoltageRange::Low,
        current: CurrentRange::Ma200,
    };

    fn raw(u: u16, i: u16) -> RawSamples {
        RawSamples {
            voltage: RawSample { high: u, low: u },
            current: RawSample { high: i, low: i },
        }
    }

    #[test]
    fn test_range_settle_wait() {
        let m = main_ctx();
        let p = Params::DEFAULT_16BIT;
        let s = Scales::new(&p);
        let meter = Meter::new();

        // The first runs wait for the ranges to settle.
        for _ in 0..RANGE_SETTLE_RUNS {
            let v = meter.run(&m, &p, &s, RANGES, raw(20000, 20000), None);
            assert_eq!(v.voltage, 0.0);
            assert_eq!(v.current, 0.0);
        }
        let v = meter.run(&m, &p, &s, RANGES, raw(20000, 20000), None);
        let volts = s.voltage_from_raw(&p, VoltageRange::Low, 20000);
        assert_eq!(v.voltage, volts);
        assert_eq!(v.voltage_low, volts);
        assert_eq!(v.mean_voltage, volts / 4.0);
        assert_eq!(v.power, v.voltage * v.current);
        assert_eq!(v.power_total, v.power);

        // A current range switch holds the current values only.
        let switched = ActiveRanges {
            current: CurrentRange::Ma2000,
            ..RANGES
        };
        let before = v.current;
        for _ in 0..RANGE_SETTLE_RUNS {
            let v = meter.run(&m, &p, &s, switched, raw(30000, 30000), None);
            assert_eq!(v.current, before);
            assert_eq!(v.voltage, s.voltage_from_raw(&p, VoltageRange::Low, 30000));
        }
        let v = meter.run(&m, &p, &s, switched, raw(30000, 30000), None);
        assert_eq!(v.current, s.current_from_raw(&p, CurrentRange::Ma2000, 30000));
    }

    #[test]
    fn test_ripple_power() {
        let m = main_ctx();
        let p = Params::DEFAULT_16BIT;
        let s = Scales::new(&p);
        let meter = Meter::new();
        let ripple = RippleParams {
            depth: 50,
            on_ms: 300,
            off_ms: 100,
        };
        let samples = RawSamples {
            voltage: RawSample {
                high: 40000,
                low: 20000,
            },
            current: RawSample {
                high: 30000,
                low: 15000,
            },
        };
        let mut v = Measurement::default();
        for _ in 0..=RANGE_SETTLE_RUNS {
            v = meter.run(&m, &p, &s, RANGES, samples, Some(ripple));
        }
        let low_power = v.voltage_low * v.current_low;
        let expected = (v.power * 300.0 + low_power * 100.0) / 400.0001;
        assert!((v.power_total - expected).abs() < 1e-6);
        assert!(v.power_total < v.power);
        assert!(v.power_total > low_power);
    }

    #[test]
    fn test_energy() {
        let m = main_ctx();
        let p = Params::DEFAULT_16BIT;
        let s = Scales::new(&p);
        let meter = Meter::new();
        let mut v = Measurement::default();
        for _ in 0..=RANGE_SETTLE_RUNS {
            v = meter.run(&m, &p, &s, RANGES, raw(40000, 40000), None);
        }
        assert!(v.current > ENERGY_MIN_CURRENT);

        for _ in 0..10 {
            meter.accumulate_energy(&m, false);
        }
        let e = meter.energy(&m);
        assert!((e.amp_hours - v.current / 3600.0).abs() < 1e-6);
        assert!((e.watt_hours - v.current * v.voltage / 3600.0).abs() < 1e-5);

        // Ripple resets the counters.
        assert_eq!(meter.accumulate_energy(&m, true), Energy::ZERO);
    }
}

// vim: ts=4 sw=4 expandtab
