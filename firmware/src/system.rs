use crate::{
    analog::Analog,
    eeprom::Eeprom,
    ports::{PB_RELAY_HIGH, PB_RELAY_LOW, PC_OUTPUT_ENABLE, PD_CURRENT_MODE, PD_LED_ACT, PD_LED_MODE, PORTB, PORTC, PORTD},
};
use dcg::{
    Capability, Dcg, MainCtx, RelayPort,
    fault::{Fault, FaultSink},
    hw::Relay,
    timer::Job,
};

pub static DCG: Dcg = Dcg::new(Capability::CONFIGURED);

/// Relay drivers and the constant current indicator.
struct Relays;

impl RelayPort for Relays {
    fn set_relay(&mut self, relay: Relay, on: bool) {
        match relay {
            Relay::HighRail => PORTB.set_cs(PB_RELAY_HIGH, on),
            Relay::LowRail => PORTB.set_cs(PB_RELAY_LOW, on),
        }
    }

    fn current_limit_active(&mut self) -> bool {
        !PORTD.get(PD_CURRENT_MODE)
    }
}

/// Lights the activity LED while a fault is pending.
struct FaultLed {
    active: u8,
}

impl FaultLed {
    fn mask(fault: Fault) -> u8 {
        match fault {
            Fault::OverTemperature => 1 << 0,
            Fault::OverVoltage => 1 << 1,
            Fault::FuseBlown => 1 << 2,
        }
    }

    fn is_lit(&self) -> bool {
        self.active != 0
    }
}

impl FaultSink for FaultLed {
    fn notify_fault(&mut self, fault: Fault, active: bool) {
        if active {
            self.active |= Self::mask(fault);
        } else {
            self.active &= !Self::mask(fault);
        }
    }
}

pub struct System {
    analog: Analog,
    eeprom: Eeprom,
    relays: Relays,
    faults: FaultLed,
    heartbeat: bool,
}

impl System {
    pub fn new(analog: Analog, eeprom: Eeprom) -> Self {
        Self {
            analog,
            eeprom,
            relays: Relays,
            faults: FaultLed { active: 0 },
            heartbeat: false,
        }
    }

    pub fn init(&mut self, m: &MainCtx<'_>) {
        DCG.init(m, &mut self.eeprom);
        crate::conv::set_dac16(DCG.params(m).options.dac16);
    }

    pub fn run(&mut self, m: &MainCtx<'_>) {
        if DCG.job_due(m, Job::Job4ms) {
            DCG.job_4ms(m, &mut self.analog, &mut self.relays);
            PORTC.set_cs(PC_OUTPUT_ENABLE, DCG.settings(m).output_on);
        }

        if DCG.job_due(m, Job::Job10ms) {
            DCG.service_storage(m, &mut self.eeprom);
        }

        if DCG.job_due(m, Job::Job50ms) {
            PORTD.set_cs(PD_LED_MODE, DCG.status(m).current_mode);
            // Activity LED is active low. Steady on with a fault pending.
            self.heartbeat = !self.heartbeat;
            PORTD.set_cs(PD_LED_ACT, !(self.faults.is_lit() || self.heartbeat));
        }

        if DCG.job_due(m, Job::Job100ms) {
            DCG.job_100ms(m, &mut self.analog, &mut self.faults);
        }
    }
}

// vim: ts=4 sw=4 expandtab
