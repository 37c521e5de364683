use crate::{
    hw::AnalogIn,
    mutex::{MainCtx, MutexCell},
};

/// Overtemperature is set above this heat sink temperature, in degree Celsius.
pub const TEMP_LIMIT_HI: f32 = 80.0;
/// Overtemperature is cleared below this heat sink temperature, in degree Celsius.
pub const TEMP_LIMIT_LO: f32 = 70.0;
/// The temperature is read every n-th run.
pub const TEMP_INTERVAL: u8 = 20;
/// The output must stay this far below the input voltage.
pub const INPUT_HEADROOM: f32 = 2.0;
/// Input voltage below this with the relays on means a blown fuse.
pub const INPUT_LOW: f32 = 7.0;

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum Fault {
    OverTemperature,
    /// The output is too close to the input. The pass transistor may be broken.
    OverVoltage,
    /// Reported only. Does not switch the relays.
    FuseBlown,
}

/// Receiver of fault state transitions.
pub trait FaultSink {
    fn notify_fault(&mut self, fault: Fault, active: bool);
}

/// Channel status.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Default)]
pub struct Status {
    pub over_temperature: bool,
    pub over_voltage: bool,
    pub fuse_blown: bool,
    /// The regulator limits the current.
    pub current_mode: bool,
}

impl Status {
    /// Faults that force the relays off.
    pub fn is_fault(&self) -> bool {
        self.over_temperature || self.over_voltage
    }
}

pub struct FaultInputs {
    pub mean_voltage: f32,
    pub input_voltage: f32,
    pub relays_on: bool,
    pub suppress_fuse_msg: bool,
}

pub struct FaultChecker {
    count: MutexCell<u8>,
    temperature: MutexCell<Option<f32>>,
    status: MutexCell<Status>,
}

impl FaultChecker {
    pub const fn new() -> Self {
        Self {
            count: MutexCell::new(0),
            temperature: MutexCell::new(None),
            status: MutexCell::new(Status {
                over_temperature: false,
                over_voltage: false,
                fuse_blown: false,
                current_mode: false,
            }),
        }
    }

    /// Fault check job. Runs every 100 ms.
    ///
    /// Returns true, if a fault that forces the relays off was cleared.
    pub fn run(
        &self,
        m: &MainCtx<'_>,
        inputs: &FaultInputs,
        analog: &mut impl AnalogIn,
        sink: &mut impl FaultSink,
    ) -> bool {
        let mut st = self.status.get(m);
        let mut cleared = false;

        let count = self.count.get(m) + 1;
        if count >= TEMP_INTERVAL {
            self.count.set(m, 0);
            let temp = analog.read_temperature();
            self.temperature.set(m, temp);
            if let Some(temp) = temp {
                if temp > TEMP_LIMIT_HI {
                    if !st.over_temperature {
                        log::warn!("Overtemperature: {temp:.1} C");
                        sink.notify_fault(Fault::OverTemperature, true);
                    }
                    st.over_temperature = true;
                } else if temp < TEMP_LIMIT_LO && st.over_temperature {
                    log::info!("Temperature ok: {temp:.1} C");
                    sink.notify_fault(Fault::OverTemperature, false);
                    st.over_temperature = false;
                    cleared = true;
                }
            }
        } else {
            self.count.set(m, count);
        }

        let low_input = inputs.input_voltage < INPUT_LOW;

        if inputs.mean_voltage > inputs.input_voltage - INPUT_HEADROOM {
            // A collapsed input is reported as a blown fuse only.
            if !st.over_voltage && !low_input {
                log::warn!(
                    "Overvoltage: Vout {:.2}, Vin {:.2}",
                    inputs.mean_voltage,
                    inputs.input_voltage
                );
                sink.notify_fault(Fault::OverVoltage, true);
            }
            st.over_voltage = true;
        } else if st.over_voltage {
            log::info!("Overvoltage cleared");
            sink.notify_fault(Fault::OverVoltage, false);
            st.over_voltage = false;
            cleared = true;
        }

        // The relays switch with delays, so only check while they are on.
        if inputs.relays_on {
            let fuse_blown = low_input && !inputs.suppress_fuse_msg;
            if fuse_blown != st.fuse_blown {
                if fuse_blown {
                    log::warn!("Fuse blown: Vin {:.2}", inputs.input_voltage);
                }
                sink.notify_fault(Fault::FuseBlown, fuse_blown);
            }
            st.fuse_blown = fuse_blown;
        }

        self.status.set(m, st);
        cleared
    }

    pub fn status(&self, m: &MainCtx<'_>) -> Status {
        self.status.get(m)
    }

    /// Last heat sink temperature read.
    pub fn temperature(&self, m: &MainCtx<'_>) -> Option<f32> {
        self.temperature.get(m)
    }
}

impl Default for FaultChecker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
pub(crate) mod test {
    use super::*;
    use crate::{hw::test::MockAnalog, mutex::test::main_ctx};
    use std::vec::Vec;

    pub struct MockSink {
        pub events: Vec<(Fault, bool)>,
    }

    impl MockSink {
        pub fn new() -> Self {
            Self { events: Vec::new() }
        }
    }

    impl FaultSink for MockSink {
        fn notify_fault(&mut self, fault: Fault, active: bool) {
            self.events.push((fault, active));
        }
    }

    const OK: FaultInputs = FaultInputs {
        mean_voltage: 5.0,
        input_voltage: 24.0,
        relays_on: true,
        suppress_fuse_msg: false,
    };

    /// Run the checker for one temperature interval.
    fn run_interval(f: &FaultChecker, inputs: &FaultInputs, analog: &mut MockAnalog, sink: &mut MockSink) -> bool {
        let m = main_ctx();
        let mut cleared = false;
        for _ in 0..TEMP_INTERVAL {
            cleared |= f.run(&m, inputs, analog, sink);
        }
        cleared
    }

    #[test]
    fn test_overtemperature_hysteresis() {
        let m = main_ctx();
        let f = FaultChecker::new();
        let mut analog = MockAnalog::new();
        let mut sink = MockSink::new();

        analog.temperature = Some(85.0);
        // Only read every 20th run.
        for _ in 0..TEMP_INTERVAL - 1 {
            f.run(&m, &OK, &mut analog, &mut sink);
        }
        assert!(!f.status(&m).over_temperature);
        f.run(&m, &OK, &mut analog, &mut sink);
        assert!(f.status(&m).over_temperature);
        assert!(f.status(&m).is_fault());
        assert_eq!(f.temperature(&m), Some(85.0));

        // Within the hysteresis band.
        analog.temperature = Some(75.0);
        assert!(!run_interval(&f, &OK, &mut analog, &mut sink));
        assert!(f.status(&m).over_temperature);

        analog.temperature = Some(69.0);
        assert!(run_interval(&f, &OK, &mut analog, &mut sink));
        assert!(!f.status(&m).is_fault());

        // Missing sensor keeps the state.
        analog.temperature = None;
        run_interval(&f, &OK, &mut analog, &mut sink);
        assert!(!f.status(&m).over_temperature);

        assert_eq!(
            sink.events,
            [(Fault::OverTemperature, true), (Fault::OverTemperature, false)]
        );
    }

    #[test]
    fn test_overvoltage() {
        let m = main_ctx();
        let f = FaultChecker::new();
        let mut analog = MockAnalog::new();
        let mut sink = MockSink::new();

        let high = FaultInputs {
            mean_voltage: 22.5,
            ..OK
        };
        assert!(!f.run(&m, &high, &mut analog, &mut sink));
        assert!(f.status(&m).over_voltage);
        assert!(!f.run(&m, &high, &mut analog, &mut sink));
        assert!(f.run(&m, &OK, &mut analog, &mut sink));
        assert!(!f.status(&m).over_voltage);
        assert_eq!(sink.events, [(Fault::OverVoltage, true), (Fault::OverVoltage, false)]);
    }

    #[test]
    fn test_overvoltage_low_input() {
        let m = main_ctx();
        let f = FaultChecker::new();
        let mut analog = MockAnalog::new();
        let mut sink = MockSink::new();

        let collapsed = FaultInputs {
            mean_voltage: 5.0,
            input_voltage: 1.0,
            ..OK
        };
        f.run(&m, &collapsed, &mut analog, &mut sink);
        let st = f.status(&m);
        // The relays still go off.
        assert!(st.over_voltage);
        assert!(st.is_fault());
        assert!(st.fuse_blown);
        assert_eq!(sink.events, [(Fault::FuseBlown, true)]);
    }

    #[test]
    fn test_fuse() {
        let m = main_ctx();
        let f = FaultChecker::new();
        let mut analog = MockAnalog::new();
        let mut sink = MockSink::new();

        let low = FaultInputs {
            mean_voltage: 0.0,
            input_voltage: 3.0,
            relays_on: false,
            ..OK
        };
        // Not checked while the relays switch.
        f.run(&m, &low, &mut analog, &mut sink);
        assert!(!f.status(&m).fuse_blown);

        let low = FaultInputs { relays_on: true, ..low };
        f.run(&m, &low, &mut analog, &mut sink);
        let st = f.status(&m);
        assert!(st.fuse_blown);
        // Reported only.
        assert!(!st.is_fault());

        let suppressed = FaultInputs {
            suppress_fuse_msg: true,
            ..low
        };
        f.run(&m, &suppressed, &mut analog, &mut sink);
        assert!(!f.status(&m).fuse_blown);
        assert_eq!(sink.events, [(Fault::FuseBlown, true), (Fault::FuseBlown, false)]);
    }
}

// vim: ts=4 sw=4 expandtab
