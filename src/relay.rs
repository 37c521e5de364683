//! Input rail relays.
//!
//! The high rail relay is switched on for output voltages above the relay threshold.
//! Otherwise the low rail relay is used to keep the dissipation of the pass transistor low.
//! Switching is break-before-make with a guard time between the relay operations:
//!
//! ```text
//! Off -> Switching -> On -> Switching -> (Switching ->) On
//! ```

use crate::{
    debounce::Debounce,
    hw::{Relay, RelayPort},
    mutex::{MainCtx, MutexCell},
};

/// Guard time between relay operations, in relay job runs.
pub const RELAY_GUARD_RUNS: u8 = 2;

/// Hysteresis of the rail decision, in volts.
pub const RAIL_HYSTERESIS: f32 = 0.5;

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum RelayState {
    Off,
    /// Waiting for the guard time after a relay operation.
    Switching,
    On,
}

/// Inputs of the rail decision.
#[derive(Copy, Clone, PartialEq, Debug)]
pub struct RailInputs {
    /// Voltage setpoint.
    pub setpoint: f32,
    /// Measured mean output voltage.
    pub mean_voltage: f32,
    /// How far the output legitimately dips below the setpoint.
    /// Ripple amplitude, or setpoint minus the arbitrary sequence minimum.
    pub excursion: f32,
    /// Relay threshold voltage.
    pub threshold: f32,
}

pub struct RelaySupervisor {
    state: MutexCell<RelayState>,
    timer: MutexCell<u8>,
    /// Request for the high rail.
    high_rail: MutexCell<bool>,
    relays: MutexCell<[bool; 2]>,
    current_mode: Debounce<30, 20, 10>,
}

impl RelaySupervisor {
    pub const fn new() -> Self {
        Self {
            state: MutexCell::new(RelayState::Off),
            timer: MutexCell::new(0),
            high_rail: MutexCell::new(false),
            relays: MutexCell::new([false; 2]),
            current_mode: Debounce::new(),
        }
    }

    pub fn state(&self, m: &MainCtx<'_>) -> RelayState {
        self.state.get(m)
    }

    pub fn is_on(&self, m: &MainCtx<'_>, relay: Relay) -> bool {
        self.relays.get(m)[relay.index()]
    }

    pub fn high_rail_requested(&self, m: &MainCtx<'_>) -> bool {
        self.high_rail.get(m)
    }

    /// Debounced constant current indicator.
    pub fn current_mode(&self, m: &MainCtx<'_>) -> bool {
        self.current_mode.get(m)
    }

    /// Fall back to the low rail request.
    pub fn drop_rail_request(&self, m: &MainCtx<'_>) {
        self.high_rail.set(m, false);
    }

    fn switch(&self, m: &MainCtx<'_>, port: &mut impl RelayPort, relay: Relay, on: bool) {
        let mut relays = self.relays.get(m);
        relays[relay.index()] = on;
        self.relays.set(m, relays);
        port.set_relay(relay, on);
        log::debug!("Relay {relay:?}: {}", if on { "on" } else { "off" });
    }

    /// Switch the relay of the requested rail on and start the guard time.
    fn switch_on_requested(&self, m: &MainCtx<'_>, port: &mut impl RelayPort) {
        let relay = if self.high_rail.get(m) {
            Relay::HighRail
        } else {
            Relay::LowRail
        };
        self.switch(m, port, relay, true);
        self.timer.set(m, RELAY_GUARD_RUNS);
        self.state.set(m, RelayState::Switching);
    }

    fn update_request(&self, m: &MainCtx<'_>, inputs: &RailInputs, current_mode: bool) {
        let mut high = self.high_rail.get(m);
        if !current_mode {
            if inputs.setpoint > inputs.threshold {
                high = true;
            } else if inputs.setpoint + RAIL_HYSTERESIS < inputs.threshold {
                high = false;
            }
        }
        // The measured voltage can not reach the setpoint, e.g. in current limitation.
        if inputs.mean_voltage + RAIL_HYSTERESIS < inputs.threshold - inputs.excursion {
            high = false;
        }
        if high != self.high_rail.get(m) {
            log::debug!("Rail request: {}", if high { "high" } else { "low" });
        }
        self.high_rail.set(m, high);
    }

    /// Relay job. Runs every 4 ms.
    pub fn run(&self, m: &MainCtx<'_>, inputs: &RailInputs, fault: bool, port: &mut impl RelayPort) -> RelayState {
        let current_mode = self.current_mode.run(m, port.current_limit_active());
        self.update_request(m, inputs, current_mode);

        let timer = self.timer.get(m).saturating_sub(1);
        self.timer.set(m, timer);

        let relays = self.relays.get(m);
        let any_on = relays.iter().any(|on| *on);

        if fault && any_on {
            log::warn!("Relays off by fault");
            self.switch(m, port, Relay::HighRail, false);
            self.switch(m, port, Relay::LowRail, false);
            self.timer.set(m, RELAY_GUARD_RUNS);
            self.state.set(m, RelayState::Switching);
            return RelayState::Switching;
        }

        match self.state.get(m) {
            RelayState::Off => {
                if !fault {
                    self.switch_on_requested(m, port);
                }
            }
            RelayState::Switching => {
                if timer == 0 {
                    if any_on {
                        self.state.set(m, RelayState::On);
                    } else if fault {
                        self.state.set(m, RelayState::Off);
                    } else {
                        self.switch_on_requested(m, port);
                    }
                }
            }
            RelayState::On => {
                let high = self.high_rail.get(m);
                let wrong = if high { Relay::LowRail } else { Relay::HighRail };
                if relays[wrong.index()] {
                    self.switch(m, port, wrong, false);
                    self.timer.set(m, RELAY_GUARD_RUNS);
                    self.state.set(m, RelayState::Switching);
                }
            }
        }
        self.state.get(m)
    }
}

impl Default for RelaySupervisor {
    fn default() -> Self {
        Self::new()
    }
}


// vim: ts=4 sw=4 expandtab
