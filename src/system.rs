//! The channel.
//!
//! [Dcg] owns all channel state and is meant to live in a `static`.
//! The command and parameter layers call its setters from the main loop,
//! the firmware calls [Dcg::mux_isr] and [Dcg::tick_isr] from the interrupts
//! and runs the cooperative jobs when [Dcg::job_due] says so.

use crate::{
    arb::{ArbConfig, ArbMode, Segment},
    error::Error,
    fault::{FaultChecker, FaultInputs, FaultSink, Status},
    hw::{AnalogChannel, AnalogIn, Capability, Channel, OutputHw, RelayPort},
    measure::{Energy, Measurement, Meter},
    mutex::{IrqCtx, MainCtx, MutexCell, MutexRefCell},
    mux::{ActiveRanges, CurrentTarget, Multiplexer, RawSample, RawSamples, VoltageTarget},
    params::{ParamStore, Params, RippleParams, Settings},
    range::{
        CURRENT_RANGES, RangeLock, VOLTAGE_RANGES, scan_sequence_range, select_current_range,
        select_voltage_range,
    },
    relay::{RailInputs, RelayState, RelaySupervisor},
    ripple::ripple_low_code,
    scale::Scales,
    sequence::{Breakpoint, ROM_SEQUENCES, RamSequence, SequenceStore, rom_sequence, until_terminator},
    timer::{Job, JobTimers, Ticker},
    upload::{LoadState, Loader, StorageDone},
};

pub struct Dcg {
    cap: Capability,
    params: MutexRefCell<Params>,
    settings: MutexCell<Settings>,
    scales: MutexCell<Scales>,
    ram: MutexRefCell<RamSequence>,
    /// Start index of the selected sequence in the RAM sequence buffer.
    ram_start: MutexCell<usize>,
    loader: MutexCell<Loader>,
    /// Restart the playback with the next publish.
    arb_restart: MutexCell<bool>,
    /// Lowest voltage of the playing arbitrary sequence.
    arb_min_voltage: MutexCell<f32>,
    /// Ripple amplitude in volts.
    ripple_voltage: MutexCell<f32>,
    mux: Multiplexer,
    jobs: JobTimers,
    ticker: Ticker,
    meter: Meter,
    faults: FaultChecker,
    relays: RelaySupervisor,
}

impl Dcg {
    pub const fn new(cap: Capability) -> Self {
        Self {
            cap,
            params: MutexRefCell::new(Params::DEFAULT_16BIT),
            settings: MutexCell::new(Settings::new()),
            scales: MutexCell::new(Scales::new(&Params::DEFAULT_16BIT)),
            ram: MutexRefCell::new(RamSequence::new()),
            ram_start: MutexCell::new(0),
            loader: MutexCell::new(Loader::new()),
            arb_restart: MutexCell::new(false),
            arb_min_voltage: MutexCell::new(0.0),
            ripple_voltage: MutexCell::new(0.0),
            mux: Multiplexer::new(),
            jobs: JobTimers::new(),
            ticker: Ticker::new(),
            meter: Meter::new(),
            faults: FaultChecker::new(),
            relays: RelaySupervisor::new(),
        }
    }

    #[inline]
    pub fn capability(&self) -> Capability {
        self.cap
    }

    pub fn ticker(&self) -> &Ticker {
        &self.ticker
    }

    /// Load the parameters, publish the initial output and start the job timers.
    ///
    /// Without valid stored parameters the defaults are used.
    pub fn init(&self, m: &MainCtx<'_>, store: &mut impl ParamStore) {
        if let Err(e) = self.load_params(m, store) {
            log::warn!("Parameters not loaded: {e}");
            let p = *self.params.borrow(m);
            self.apply_params(m, p);
        }
        self.jobs.start(m);
        log::info!("DCG channel started ({:?})", self.cap);
    }

    // Interrupts.

    /// Multiplexer interrupt. Runs every 500 us.
    #[inline]
    pub fn mux_isr(&self, c: &IrqCtx<'_>, hw: &mut impl OutputHw) {
        self.mux.run(c, self.cap, &self.jobs, hw);
    }

    /// Tick timer interrupt. Runs every 100 us.
    #[inline]
    pub fn tick_isr(&self) {
        self.ticker.irq_tick();
    }

    // Cooperative jobs.

    /// Consume the pending flag of `job`.
    pub fn job_due(&self, m: &MainCtx<'_>, job: Job) -> bool {
        self.jobs.test_and_reset(m, job)
    }

    /// Measurement and relay job.
    pub fn job_4ms(&self, m: &MainCtx<'_>, analog: &mut impl AnalogIn, relays: &mut impl RelayPort) -> Measurement {
        let p = self.params.borrow(m);
        let s = self.settings.get(m);
        let scales = self.scales.get(m);

        let raw = if p.options.adc16 {
            self.mux.raw_samples(m)
        } else {
            // The on-chip ADC does not measure the ripple levels.
            let u = analog.read_analog(AnalogChannel::OutputVoltage);
            let i = analog.read_analog(AnalogChannel::OutputCurrent);
            RawSamples {
                voltage: RawSample { high: u, low: u },
                current: RawSample { high: i, low: i },
            }
        };
        let ripple = s.ripple_active().then_some(s.ripple);
        let v = self
            .meter
            .run(m, &p, &scales, self.mux.active_ranges(m), raw, ripple);

        let excursion = if s.arb_mode == ArbMode::Off {
            self.ripple_voltage.get(m)
        } else {
            s.voltage - self.arb_min_voltage.get(m)
        };
        let inputs = RailInputs {
            setpoint: s.voltage,
            mean_voltage: v.mean_voltage,
            excursion,
            threshold: p.relay_voltage,
        };
        self.relays
            .run(m, &inputs, self.faults.status(m).is_fault(), relays);
        v
    }

    /// Energy and fault check job.
    pub fn job_100ms(&self, m: &MainCtx<'_>, analog: &mut impl AnalogIn, sink: &mut impl FaultSink) {
        let p = self.params.borrow(m);
        let s = self.settings.get(m);
        let scales = self.scales.get(m);

        self.meter.accumulate_energy(m, s.ripple_active());

        let input_voltage = scales.input_voltage_from_raw(analog.read_analog(AnalogChannel::InputVoltage));
        let inputs = FaultInputs {
            mean_voltage: self.meter.values(m).mean_voltage,
            input_voltage,
            relays_on: self.relays.state(m) == RelayState::On,
            suppress_fuse_msg: p.options.suppress_fuse_msg,
        };
        if self.faults.run(m, &inputs, analog, sink) {
            self.relays.drop_rail_request(m);
        }
    }

    /// Storage job. Executes a queued persist or recall.
    pub fn service_storage(
        &self,
        m: &MainCtx<'_>,
        store: &mut impl SequenceStore,
    ) -> Option<Result<StorageDone, Error>> {
        let mut loader = self.loader.get(m);
        let done = loader.service(&mut self.ram.borrow_mut(m), store);
        self.loader.set(m, loader);
        if let Some(Ok(StorageDone::Recalled)) = done {
            self.ram_sequence_changed(m);
        }
        done
    }

    // Parameters.

    pub fn params(&self, m: &MainCtx<'_>) -> Params {
        *self.params.borrow(m)
    }

    /// Replace the parameters and reset the settings to their initial values.
    pub fn set_params(&self, m: &MainCtx<'_>, mut p: Params) {
        p.sanitize_locks();
        self.apply_params(m, p);
    }

    fn apply_params(&self, m: &MainCtx<'_>, p: Params) {
        *self.params.borrow_mut(m) = p;
        self.scales.set(m, Scales::new(&p));
        let arb = self.settings.get(m);
        let s = Settings {
            arb_mode: arb.arb_mode,
            arb_repeat: arb.arb_repeat,
            arb_delay_ms: arb.arb_delay_ms,
            ram_select: arb.ram_select,
            ..Settings::from_params(&p)
        };
        self.settings.set(m, s);
        self.mux.set_adc_ext(m, p.options.adc16);
        self.set_level(m);
    }

    pub fn load_params(&self, m: &MainCtx<'_>, store: &mut impl ParamStore) -> Result<(), Error> {
        let p = store.load()?;
        self.set_params(m, p);
        Ok(())
    }

    /// Store the current settings as power-up defaults and commit the parameters.
    pub fn commit_params(&self, m: &MainCtx<'_>, store: &mut impl ParamStore) -> Result<(), Error> {
        let mut p = *self.params.borrow(m);
        self.settings.get(m).store_into(&mut p);
        store.commit(&p)?;
        *self.params.borrow_mut(m) = p;
        log::info!("Parameters committed");
        Ok(())
    }

    // Regulation settings.

    pub fn settings(&self, m: &MainCtx<'_>) -> Settings {
        self.settings.get(m)
    }

    fn update(&self, m: &MainCtx<'_>, f: impl FnOnce(&mut Settings)) {
        let mut s = self.settings.get(m);
        f(&mut s);
        s.check_limits(&self.params.borrow(m), self.cap);
        self.settings.set(m, s);
        self.set_level(m);
    }

    /// Voltage setpoint in volts.
    pub fn set_voltage_target(&self, m: &MainCtx<'_>, volts: f32) {
        self.update(m, |s| s.voltage = volts);
    }

    /// Current limit in amperes.
    pub fn set_current_target(&self, m: &MainCtx<'_>, amps: f32) {
        self.update(m, |s| s.current = amps);
    }

    /// Output the fraction `factor` of the voltage setpoint.
    pub fn set_voltage_modifier(&self, m: &MainCtx<'_>, factor: f32) {
        self.update(m, |s| s.voltage_mod = factor);
    }

    /// Limit to the fraction `factor` of the current setpoint.
    pub fn set_current_modifier(&self, m: &MainCtx<'_>, factor: f32) {
        self.update(m, |s| s.current_mod = factor);
    }

    pub fn set_ripple_params(&self, m: &MainCtx<'_>, depth: u8, on_ms: u16, off_ms: u16) {
        self.update(m, |s| s.ripple = RippleParams { depth, on_ms, off_ms });
    }

    pub fn set_output_enabled(&self, m: &MainCtx<'_>, on: bool) {
        self.update(m, |s| s.output_on = on);
    }

    pub fn set_arbitrary_mode(&self, m: &MainCtx<'_>, mode: ArbMode) -> Result<(), Error> {
        if let ArbMode::Rom(index) = mode
            && index as usize >= ROM_SEQUENCES
        {
            return Err(Error::SequenceOutOfBounds(index));
        }
        if self.settings.get(m).arb_mode != mode {
            log::debug!("Arbitrary mode: {mode:?}");
            self.arb_restart.set(m, true);
        }
        self.update(m, |s| s.arb_mode = mode);
        Ok(())
    }

    /// Number of sequence repetitions. 0xFF repeats forever. Restarts the playback.
    pub fn set_arbitrary_repeat(&self, m: &MainCtx<'_>, count: u8) {
        self.arb_restart.set(m, true);
        self.update(m, |s| s.arb_repeat = count);
    }

    /// Pause after each sequence repetition.
    pub fn set_arbitrary_delay(&self, m: &MainCtx<'_>, ms: u16) {
        self.update(m, |s| s.arb_delay_ms = ms);
    }

    /// Select the n-th sequence of the RAM sequence buffer.
    ///
    /// Returns the effective selection, which is clamped to the last sequence.
    pub fn select_ram_sequence(&self, m: &MainCtx<'_>, select: u8) -> u8 {
        self.update(m, |s| s.ram_select = select);
        self.ram_sequence_changed(m)
    }

    fn ram_sequence_changed(&self, m: &MainCtx<'_>) -> u8 {
        let mut s = self.settings.get(m);
        let (start, select) = self.ram.borrow(m).find_start(s.ram_select);
        self.ram_start.set(m, start);
        s.ram_select = select;
        self.settings.set(m, s);
        if s.arb_mode == ArbMode::Ram {
            self.arb_restart.set(m, true);
        }
        self.set_level(m);
        select
    }

    /// Lock `ch` to range `raw`, or select the range automatically for [RangeLock::AUTO_RAW].
    pub fn lock_range(&self, m: &MainCtx<'_>, ch: Channel, raw: u8) -> Result<(), Error> {
        match ch {
            Channel::Voltage => {
                let lock = RangeLock::from_raw(raw, VOLTAGE_RANGES)?;
                self.update(m, |s| s.lock_u = lock);
            }
            Channel::Current => {
                let lock = RangeLock::from_raw(raw, CURRENT_RANGES)?;
                self.update(m, |s| s.lock_i = lock);
            }
        }
        Ok(())
    }

    // Sequence upload.

    pub fn load_state(&self, m: &MainCtx<'_>) -> LoadState {
        self.loader.get(m).state()
    }

    fn with_loader<R>(
        &self,
        m: &MainCtx<'_>,
        f: impl FnOnce(&mut Loader, &mut RamSequence) -> Result<R, Error>,
    ) -> Result<R, Error> {
        let mut loader = self.loader.get(m);
        let res = f(&mut loader, &mut self.ram.borrow_mut(m));
        if let Err(e) = &res {
            log::debug!("Sequence upload rejected: {e}");
        }
        self.loader.set(m, loader);
        res
    }

    pub fn begin_arbitrary_load(&self, m: &MainCtx<'_>) -> Result<(), Error> {
        self.with_loader(m, |l, _| l.begin())
    }

    pub fn push_arbitrary_sample(&self, m: &MainCtx<'_>, level: f32) -> Result<(), Error> {
        self.with_loader(m, |l, _| l.push_level(level))
    }

    pub fn push_arbitrary_duration(&self, m: &MainCtx<'_>, ms: u16) -> Result<(), Error> {
        self.with_loader(m, |l, ram| l.push_duration(ram, ms))
    }

    pub fn finalize_arbitrary_load(&self, m: &MainCtx<'_>) -> Result<(), Error> {
        self.with_loader(m, |l, ram| l.finalize(ram))?;
        self.ram_sequence_changed(m);
        Ok(())
    }

    /// Queue writing the RAM sequence buffer to persistent storage.
    pub fn persist_arbitrary(&self, m: &MainCtx<'_>) -> Result<(), Error> {
        self.with_loader(m, |l, _| l.persist())
    }

    /// Queue reading the RAM sequence buffer from persistent storage.
    pub fn recall_arbitrary(&self, m: &MainCtx<'_>) -> Result<(), Error> {
        self.with_loader(m, |l, _| l.recall())
    }

    pub fn ram_sequence(&self, m: &MainCtx<'_>) -> RamSequence {
        self.ram.borrow(m).clone()
    }

    // Output.

    /// Recompute the converter codes and ranges from the settings and publish them.
    pub fn set_level(&self, m: &MainCtx<'_>) {
        let p = self.params.borrow(m);
        let scales = self.scales.get(m);
        let mut s = self.settings.get(m);

        let range_i = select_current_range(&p.max_current, s.current, s.lock_i);
        if range_i != self.mux.current(m).range {
            s.current_mod = 1.0;
            log::debug!("Current range: {range_i:?}");
        }
        self.mux.set_current(
            m,
            CurrentTarget {
                code: scales.current_code(&p, range_i, s.current * s.current_mod),
                range: range_i,
            },
        );

        let prev_range_u = self.mux.voltage(m).range;
        if s.arb_mode == ArbMode::Off {
            let range = select_voltage_range(&p.max_voltage, s.voltage, s.lock_u);
            if range != prev_range_u {
                s.voltage_mod = 1.0;
                log::debug!("Voltage range: {range:?}");
            }
            let volts = s.voltage * s.voltage_mod;
            let code = scales.voltage_code(&p, range, volts);
            let ripple = if s.ripple_active() {
                s.ripple
            } else {
                RippleParams::OFF
            };
            self.ripple_voltage.set(
                m,
                if ripple.is_enabled() {
                    volts * ripple.depth as f32 / 100.0
                } else {
                    0.0
                },
            );
            m.critical(|_| {
                self.mux.playback().set_config(m, ArbConfig::OFF, false);
                self.mux.set_voltage(
                    m,
                    VoltageTarget {
                        code,
                        low_code: ripple_low_code(code, ripple.depth),
                        range,
                        ripple,
                    },
                );
            });
        } else {
            let ram = self.ram.borrow(m);
            let seq: &[Breakpoint] = match s.arb_mode {
                ArbMode::Rom(index) => rom_sequence(index, self.cap).unwrap_or_default(),
                _ => ram.sequence(self.ram_start.get(m)),
            };

            let excursion = scan_sequence_range(
                &p.max_voltage,
                s.voltage,
                s.lock_u,
                until_terminator(seq).map(|b| b.level),
            );
            let range = excursion.range;
            if range != prev_range_u {
                s.voltage_mod = 1.0;
                log::debug!("Voltage range: {range:?}");
            }
            self.arb_min_voltage.set(m, excursion.min_voltage);
            self.ripple_voltage.set(m, 0.0);

            let volts = s.voltage * s.voltage_mod;
            let code = scales.voltage_code(&p, range, volts);
            self.mux.set_voltage(
                m,
                VoltageTarget {
                    code,
                    low_code: code,
                    range,
                    ripple: RippleParams::OFF,
                },
            );
            let segments = until_terminator(seq).map(|b| Segment {
                code: scales.voltage_code(&p, range, b.level * volts),
                duration_ms: b.duration_ms,
            });
            let config = ArbConfig {
                active: true,
                repeat: s.arb_repeat,
                delay_ms: s.arb_delay_ms,
            };
            let restart = self.arb_restart.replace(m, false);
            self.mux.playback().publish(m, segments, config, restart);
        }

        self.mux.set_output_on(m, s.output_on);
        self.settings.set(m, s);
    }

    // Readback.

    pub fn raw_samples(&self, m: &MainCtx<'_>) -> RawSamples {
        self.mux.raw_samples(m)
    }

    pub fn active_ranges(&self, m: &MainCtx<'_>) -> ActiveRanges {
        self.mux.active_ranges(m)
    }

    pub fn measurement(&self, m: &MainCtx<'_>) -> Measurement {
        self.meter.values(m)
    }

    pub fn energy(&self, m: &MainCtx<'_>) -> Energy {
        self.meter.energy(m)
    }

    pub fn reset_energy(&self, m: &MainCtx<'_>) {
        self.meter.reset_energy(m);
    }

    pub fn status(&self, m: &MainCtx<'_>) -> Status {
        Status {
            current_mode: self.relays.current_mode(m),
            ..self.faults.status(m)
        }
    }

    pub fn temperature(&self, m: &MainCtx<'_>) -> Option<f32> {
        self.faults.temperature(m)
    }

    pub fn relay_state(&self, m: &MainCtx<'_>) -> RelayState {
        self.relays.state(m)
    }

    /// Lowest voltage of the selected arbitrary sequence.
    pub fn arbitrary_min_voltage(&self, m: &MainCtx<'_>) -> f32 {
        self.arb_min_voltage.get(m)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        fault::test::MockSink,
        hw::{
            Relay,
            test::{MockAnalog, MockHw, MockRelays},
        },
        mutex::test::{irq_ctx, main_ctx},
        range::{CurrentRange, VoltageRange},
        sequence::test::MemStore,
    };

    struct MemParams {
        stored: Option<Params>,
    }

    impl ParamStore for MemParams {
        fn load(&mut self) -> Result<Params, Error> {
            self.stored.ok_or(Error::StorageUninitialized)
        }

        fn commit(&mut self, params: &Params) -> Result<(), Error> {
            self.stored = Some(*params);
            Ok(())
        }
    }

    fn started(cap: Capability) -> Dcg {
        let m = main_ctx();
        let dcg = Dcg::new(cap);
        dcg.init(
            &m,
            &mut MemParams {
                stored: Some(Params::DEFAULT_16BIT),
            },
        );
        dcg
    }

    fn upload(dcg: &Dcg, seq: &[(f32, u16)]) {
        let m = main_ctx();
        dcg.begin_arbitrary_load(&m).unwrap();
        for (level, ms) in seq {
            dcg.push_arbitrary_sample(&m, *level).unwrap();
            dcg.push_arbitrary_duration(&m, *ms).unwrap();
        }
        dcg.finalize_arbitrary_load(&m).unwrap();
    }

    #[test]
    fn test_init_publishes() {
        let m = main_ctx();
        let dcg = started(Capability::SingleDac);
        let p = Params::DEFAULT_16BIT;
        let scales = Scales::new(&p);

        let u = dcg.mux.voltage(&m);
        assert_eq!(u.range, VoltageRange::Low);
        assert_eq!(u.code, scales.voltage_code(&p, VoltageRange::Low, 5.0));
        assert_eq!(u.ripple, RippleParams::OFF);
        let i = dcg.mux.current(&m);
        // 20 mA is exactly the ceiling of the 20 mA range.
        assert_eq!(i.range, CurrentRange::Ma20);
        assert_eq!(i.code, scales.current_code(&p, CurrentRange::Ma20, 0.02));
        assert!(!dcg.mux.playback().config(&m).active);
    }

    #[test]
    fn test_init_without_stored_params() {
        let m = main_ctx();
        let dcg = Dcg::new(Capability::SingleDac);
        dcg.init(&m, &mut MemParams { stored: None });
        assert_eq!(dcg.params(&m), Params::DEFAULT_16BIT);
        assert_eq!(dcg.settings(&m).voltage, 5.0);
    }

    #[test]
    fn test_modifier_reset_on_range_change() {
        let m = main_ctx();
        let dcg = started(Capability::SingleDac);

        dcg.set_voltage_modifier(&m, 0.5);
        dcg.set_voltage_target(&m, 6.0);
        assert_eq!(dcg.settings(&m).voltage_mod, 0.5);
        dcg.set_current_modifier(&m, 0.25);

        dcg.set_voltage_target(&m, 20.0);
        assert_eq!(dcg.mux.voltage(&m).range, VoltageRange::High);
        assert_eq!(dcg.settings(&m).voltage_mod, 1.0);
        assert_eq!(dcg.settings(&m).current_mod, 0.25);

        dcg.set_current_target(&m, 1.5);
        assert_eq!(dcg.mux.current(&m).range, CurrentRange::Ma2000);
        assert_eq!(dcg.settings(&m).current_mod, 1.0);

        // Clamped to the ceiling of the highest range.
        dcg.set_voltage_target(&m, 100.0);
        assert_eq!(dcg.settings(&m).voltage, 30.0);
    }

    #[test]
    fn test_ripple_publish() {
        let m = main_ctx();
        let dcg = started(Capability::SingleDac);
        dcg.set_voltage_target(&m, 10.0);
        dcg.set_ripple_params(&m, 50, 101, 50);

        let u = dcg.mux.voltage(&m);
        // Rounded up to 2 ms steps.
        assert_eq!(u.ripple.on_ms, 102);
        assert_eq!(u.ripple.depth, 50);
        assert_eq!(u.low_code, ripple_low_code(u.code, 50));

        // Arbitrary mode turns the ripple off.
        dcg.set_arbitrary_mode(&m, ArbMode::Rom(0)).unwrap();
        assert_eq!(dcg.mux.voltage(&m).ripple, RippleParams::OFF);
        dcg.set_arbitrary_mode(&m, ArbMode::Off).unwrap();
        assert!(dcg.mux.voltage(&m).ripple.is_enabled());
    }

    #[test]
    fn test_rom_sequence_publish() {
        let m = main_ctx();
        let dcg = started(Capability::DualDac);
        let p = Params::DEFAULT_16BIT;
        let scales = Scales::new(&p);
        dcg.set_voltage_target(&m, 12.0);

        assert_eq!(
            dcg.set_arbitrary_mode(&m, ArbMode::Rom(7)),
            Err(Error::SequenceOutOfBounds(7))
        );
        assert_eq!(dcg.settings(&m).arb_mode, ArbMode::Off);

        dcg.set_arbitrary_mode(&m, ArbMode::Rom(0)).unwrap();
        let table = dcg.mux.playback();
        let config = table.config(&m);
        assert!(config.active);
        assert_eq!(config.repeat, crate::arb::REPEAT_FOREVER);
        assert_eq!(
            table.segment(&m, 0),
            Segment {
                code: scales.voltage_code(&p, VoltageRange::Low, 12.0),
                duration_ms: 200,
            }
        );
        assert_eq!(
            table.segment(&m, 2).code,
            scales.voltage_code(&p, VoltageRange::Low, 0.416667 * 12.0)
        );
        assert_eq!(table.segment(&m, 6).duration_ms, 0);
        assert_eq!(table.segment(&m, 7), Segment::TERMINATOR);
        assert!((dcg.arbitrary_min_voltage(&m) - 5.0).abs() < 1e-3);
    }

    fn run_isr(dcg: &Dcg, hw: &mut MockHw, calls: usize) {
        let c = irq_ctx();
        for _ in 0..calls {
            dcg.mux_isr(&c, hw);
        }
    }

    #[test]
    fn test_halted_sequence_after_constant() {
        let m = main_ctx();
        let dcg = started(Capability::SingleDac);
        let mut hw = MockHw::new();

        // Play a sequence at 10 V, then go back to constant 2 V.
        dcg.set_voltage_target(&m, 10.0);
        dcg.set_arbitrary_mode(&m, ArbMode::Rom(0)).unwrap();
        run_isr(&dcg, &mut hw, 400);
        let code_10v = dcg.mux.playback().segment(&m, 0).code;
        dcg.set_arbitrary_mode(&m, ArbMode::Off).unwrap();
        dcg.set_voltage_target(&m, 2.0);
        run_isr(&dcg, &mut hw, 40);
        let code_2v = dcg.mux.voltage(&m).code;
        assert_eq!(hw.last_dac(Channel::Voltage), Some(code_2v));

        // Arbitrary mode without any repetition.
        dcg.set_arbitrary_repeat(&m, 0);
        dcg.set_arbitrary_mode(&m, ArbMode::Rom(0)).unwrap();
        let first = dcg.mux.playback().segment(&m, 0).code;
        hw.clear();
        run_isr(&dcg, &mut hw, 40);
        let codes = hw.dac_codes(Channel::Voltage);
        assert_eq!(codes.len(), 10);
        assert!(codes.iter().all(|&code| code == first));
        assert!(!codes.contains(&code_10v));
    }

    #[test]
    fn test_single_breakpoint_after_constant() {
        let m = main_ctx();
        let dcg = started(Capability::SingleDac);
        let p = Params::DEFAULT_16BIT;
        let scales = Scales::new(&p);
        let mut hw = MockHw::new();

        dcg.set_voltage_target(&m, 4.0);
        run_isr(&dcg, &mut hw, 40);
        let code_4v = dcg.mux.voltage(&m).code;

        upload(&dcg, &[(0.5, 0)]);
        hw.clear();
        dcg.set_arbitrary_mode(&m, ArbMode::Ram).unwrap();
        run_isr(&dcg, &mut hw, 20);
        let level = scales.voltage_code(&p, VoltageRange::Low, 2.0);
        // The constant code for one slot, then the breakpoint level.
        assert_eq!(hw.dac_codes(Channel::Voltage), [code_4v, level, level, level, level]);
    }

    #[test]
    fn test_ram_sequences() {
        let m = main_ctx();
        let dcg = started(Capability::SingleDac);
        let p = Params::DEFAULT_16BIT;
        let scales = Scales::new(&p);
        dcg.set_voltage_target(&m, 10.0);

        upload(
            &dcg,
            &[(1.0, 100), (0.5, 0), (0.2, 10), (0.8, 10), (0.2, 0)],
        );
        dcg.set_arbitrary_mode(&m, ArbMode::Ram).unwrap();
        assert_eq!(dcg.select_ram_sequence(&m, 1), 1);
        assert_eq!(
            dcg.mux.playback().segment(&m, 0).code,
            scales.voltage_code(&p, VoltageRange::Low, 2.0)
        );
        assert!((dcg.arbitrary_min_voltage(&m) - 2.0).abs() < 1e-4);

        // Clamped to the last sequence.
        assert_eq!(dcg.select_ram_sequence(&m, 9), 1);
        assert_eq!(dcg.settings(&m).ram_select, 1);
        assert_eq!(dcg.select_ram_sequence(&m, 0), 0);
        assert_eq!(dcg.mux.playback().segment(&m, 0).duration_ms, 100);
        assert_eq!(dcg.mux.playback().segment(&m, 1).duration_ms, 0);
    }

    #[test]
    fn test_upload_protocol_errors() {
        let m = main_ctx();
        let dcg = started(Capability::SingleDac);

        assert_eq!(dcg.finalize_arbitrary_load(&m), Err(Error::NotLoading));
        upload(&dcg, &[(0.5, 10)]);
        let ram = dcg.ram_sequence(&m);
        assert_eq!(dcg.finalize_arbitrary_load(&m), Err(Error::NotLoading));
        assert_eq!(dcg.ram_sequence(&m), ram);

        dcg.begin_arbitrary_load(&m).unwrap();
        assert_eq!(dcg.begin_arbitrary_load(&m), Err(Error::LoadBusy));
        assert_eq!(dcg.persist_arbitrary(&m), Err(Error::LoadBusy));
        assert_eq!(dcg.load_state(&m), LoadState::Loading);
    }

    #[test]
    fn test_persist_recall() {
        let m = main_ctx();
        let dcg = started(Capability::SingleDac);
        let mut store = MemStore::new();

        upload(&dcg, &[(0.5, 10), (1.0, 20), (0.5, 0)]);
        let uploaded = dcg.ram_sequence(&m);
        assert_eq!(dcg.service_storage(&m, &mut store), None);

        dcg.persist_arbitrary(&m).unwrap();
        assert_eq!(dcg.recall_arbitrary(&m), Err(Error::LoadBusy));
        assert_eq!(dcg.service_storage(&m, &mut store), Some(Ok(StorageDone::Persisted)));

        upload(&dcg, &[(0.1, 1)]);
        assert_ne!(dcg.ram_sequence(&m), uploaded);

        dcg.recall_arbitrary(&m).unwrap();
        assert_eq!(dcg.service_storage(&m, &mut store), Some(Ok(StorageDone::Recalled)));
        assert_eq!(dcg.ram_sequence(&m), uploaded);
        assert_eq!(dcg.load_state(&m), LoadState::Idle);
    }

    #[test]
    fn test_lock_range() {
        let m = main_ctx();
        let dcg = started(Capability::SingleDac);

        assert_eq!(
            dcg.lock_range(&m, Channel::Current, 4),
            Err(Error::RangeOutOfBounds(4))
        );
        assert_eq!(
            dcg.lock_range(&m, Channel::Voltage, 2),
            Err(Error::RangeOutOfBounds(2))
        );
        assert_eq!(dcg.settings(&m).lock_i, RangeLock::Auto);

        dcg.lock_range(&m, Channel::Current, 3).unwrap();
        assert_eq!(dcg.mux.current(&m).range, CurrentRange::Ma2000);
        dcg.lock_range(&m, Channel::Current, RangeLock::AUTO_RAW).unwrap();
        assert_eq!(dcg.mux.current(&m).range, CurrentRange::Ma20);

        // A locked low voltage range limits the setpoint.
        dcg.lock_range(&m, Channel::Voltage, 0).unwrap();
        dcg.set_voltage_target(&m, 20.0);
        assert_eq!(dcg.settings(&m).voltage, 12.1);
        assert_eq!(dcg.mux.voltage(&m).range, VoltageRange::Low);
    }

    #[test]
    fn test_commit_params() {
        let m = main_ctx();
        let dcg = started(Capability::SingleDac);
        let mut store = MemParams { stored: None };

        dcg.set_voltage_target(&m, 7.5);
        dcg.set_output_enabled(&m, false);
        dcg.commit_params(&m, &mut store).unwrap();
        let stored = store.stored.unwrap();
        assert_eq!(stored.init_voltage, 7.5);
        assert!(!stored.output_on);

        let other = Dcg::new(Capability::SingleDac);
        other.init(&m, &mut store);
        assert_eq!(other.settings(&m).voltage, 7.5);
        assert!(!other.settings(&m).output_on);
    }

    #[test]
    fn test_isr_drives_jobs() {
        let m = main_ctx();
        let c = irq_ctx();
        let dcg = started(Capability::SingleDac);
        let mut hw = MockHw::new();
        hw.adc = [25000, 20000];

        // 4 ms: 4 output slots.
        for _ in 0..7 {
            dcg.mux_isr(&c, &mut hw);
        }
        assert!(!dcg.job_due(&m, Job::Job4ms));
        dcg.mux_isr(&c, &mut hw);
        assert!(dcg.job_due(&m, Job::Job4ms));
        assert!(!dcg.job_due(&m, Job::Job4ms));

        let mut analog = MockAnalog::new();
        let mut relays = MockRelays::new();
        for _ in 0..40 {
            for _ in 0..8 {
                dcg.mux_isr(&c, &mut hw);
            }
            dcg.job_4ms(&m, &mut analog, &mut relays);
        }
        assert_eq!(dcg.raw_samples(&m).voltage.high, 25000);
        assert_eq!(
            dcg.active_ranges(&m),
            ActiveRanges {
                voltage: VoltageRange::Low,
                current: CurrentRange::Ma20,
            }
        );
        let p = Params::DEFAULT_16BIT;
        let scales = Scales::new(&p);
        let v = dcg.measurement(&m);
        assert_eq!(v.voltage, scales.voltage_from_raw(&p, VoltageRange::Low, 25000));
        assert!(v.mean_voltage > 0.0);

        // 5 V output runs from the low rail.
        assert_eq!(dcg.relay_state(&m), RelayState::On);
        assert!(relays.is_on(Relay::LowRail));
        assert!(!relays.is_on(Relay::HighRail));
        assert_eq!(hw.last_dac(Channel::Voltage), Some(dcg.mux.voltage(&m).code));
    }

    #[test]
    fn test_fault_switches_relays_off() {
        let m = main_ctx();
        let dcg = started(Capability::SingleDac);
        let mut analog = MockAnalog::new();
        let mut relays = MockRelays::new();
        let mut sink = MockSink::new();

        // About 27.8 V input.
        analog.raw[AnalogChannel::InputVoltage as usize] = 600;
        for _ in 0..3 {
            dcg.job_4ms(&m, &mut analog, &mut relays);
        }
        assert_eq!(dcg.relay_state(&m), RelayState::On);
        dcg.job_100ms(&m, &mut analog, &mut sink);
        assert!(!dcg.status(&m).is_fault());

        // The input collapses below the output.
        analog.raw[AnalogChannel::InputVoltage as usize] = 0;
        dcg.job_100ms(&m, &mut analog, &mut sink);
        assert!(dcg.status(&m).over_voltage);
        assert!(dcg.status(&m).fuse_blown);
        dcg.job_4ms(&m, &mut analog, &mut relays);
        assert_eq!(relays.state, [false; 2]);

        analog.raw[AnalogChannel::InputVoltage as usize] = 600;
        dcg.job_100ms(&m, &mut analog, &mut sink);
        assert!(!dcg.status(&m).is_fault());
        for _ in 0..4 {
            dcg.job_4ms(&m, &mut analog, &mut relays);
        }
        assert_eq!(dcg.relay_state(&m), RelayState::On);
        assert!(relays.is_on(Relay::LowRail));
    }
}

// vim: ts=4 sw=4 expandtab
