#![allow(unused_unsafe)]

use crate::hw::{interrupt, mcu};

#[rustfmt::skip]
macro_rules! impl_port {
    (
        $struct:ident,
        $name:ident,
        $port:ident,
        $pin:ident,
        $ddr:ident,
        $bit0:ident,
        $bit1:ident,
        $bit2:ident,
        $bit3:ident,
        $bit4:ident,
        $bit5:ident,
        $bit6:ident,
        $bit7:ident
    ) => {
        pub struct $struct(());

        /// Single pin access to the port.
        ///
        /// Pins are owned by one context each. The multiplexer interrupt owns the
        /// converter lines, the main loop owns everything else.
        /// The main loop must use `set_cs` on ports that share pins with the interrupt.
        pub static $name: $struct = $struct(());

        impl $struct {
            #[inline(always)]
            fn regs(&self) -> &'static mcu::$port::RegisterBlock {
                // SAFETY: The register block is valid for the program lifetime
                //         and the single pin accessors below do not alias any
                //         other peripheral state.
                unsafe { &*mcu::$name::ptr() }
            }

            #[inline(always)]
            #[allow(dead_code)]
            pub fn get(&self, bit: usize) -> bool {
                let r = self.regs().$pin().read();
                match bit {
                    0 => r.$bit0().bit(),
                    1 => r.$bit1().bit(),
                    2 => r.$bit2().bit(),
                    3 => r.$bit3().bit(),
                    4 => r.$bit4().bit(),
                    5 => r.$bit5().bit(),
                    6 => r.$bit6().bit(),
                    7 => r.$bit7().bit(),
                    _ => false,
                }
            }

            /// Read back the output latch.
            #[inline(always)]
            #[allow(dead_code)]
            pub fn get_latch(&self, bit: usize) -> bool {
                self.regs().$port().read().bits() & (1 << bit) != 0
            }

            #[inline(always)]
            #[allow(dead_code)]
            pub fn set(&self, bit: usize, value: bool) {
                let p = self.regs().$port();
                match bit {
                    0 => p.modify(|_, w| w.$bit0().bit(value)),
                    1 => p.modify(|_, w| w.$bit1().bit(value)),
                    2 => p.modify(|_, w| w.$bit2().bit(value)),
                    3 => p.modify(|_, w| w.$bit3().bit(value)),
                    4 => p.modify(|_, w| w.$bit4().bit(value)),
                    5 => p.modify(|_, w| w.$bit5().bit(value)),
                    6 => p.modify(|_, w| w.$bit6().bit(value)),
                    7 => p.modify(|_, w| w.$bit7().bit(value)),
                    _ => (),
                };
            }

            /// Set a pin from the main loop with the interrupts masked.
            #[inline(always)]
            #[allow(dead_code)]
            pub fn set_cs(&self, bit: usize, value: bool) {
                interrupt::free(|_| self.set(bit, value));
            }

            /// Replace the pins in `mask` by `value`.
            #[inline(always)]
            #[allow(dead_code)]
            pub fn set_masked(&self, mask: u8, value: u8) {
                self.regs().$port().modify(|r, w| {
                    // SAFETY: Every bit pattern is a valid port latch value.
                    unsafe { w.bits((r.bits() & !mask) | (value & mask)) }
                });
            }

            fn setup(&self, ddr: u8, port: u8) {
                // SAFETY: Every bit pattern is a valid port configuration.
                unsafe {
                    self.regs().$port().write(|w| w.bits(port));
                    self.regs().$ddr().write(|w| w.bits(ddr));
                }
            }
        }
    };
}

impl_port!(
    PortA, PORTA, porta, pina, ddra, pa0, pa1, pa2, pa3, pa4, pa5, pa6, pa7
);
impl_port!(
    PortB, PORTB, portb, pinb, ddrb, pb0, pb1, pb2, pb3, pb4, pb5, pb6, pb7
);
impl_port!(
    PortC, PORTC, portc, pinc, ddrc, pc0, pc1, pc2, pc3, pc4, pc5, pc6, pc7
);
impl_port!(
    PortD, PORTD, portd, pind, ddrd, pd0, pd1, pd2, pd3, pd4, pd5, pd6, pd7
);

// PORTB
pub const PB_SCLK: usize = 0;
pub const PB_SDATA: usize = 1;
pub const PB_RELAY_HIGH: usize = 2;
pub const PB_RELAY_LOW: usize = 3;
pub const PB_STRDC: usize = 4;
pub const PB_RANGE_U: usize = 5;
pub const PB_SDATA_IN: usize = 6;
pub const PB_STRADC: usize = 7;

// PORTC
pub const PC_RANGE_I0: usize = 2;
pub const PC_RANGE_I1: usize = 3;
/// Voltage sample-and-hold, 1 = track. Voltage DAC strobe on dual DAC boards.
pub const PC_MPXU: usize = 4;
/// Current sample-and-hold, 0 = track. Current DAC strobe on dual DAC boards.
pub const PC_MPXI: usize = 5;
/// External ADC input: 0 = current, 1 = voltage.
pub const PC_ADC_SEL: usize = 6;
pub const PC_OUTPUT_ENABLE: usize = 7;

// PORTD
/// Activity LED, active low.
pub const PD_LED_ACT: usize = 2;
/// Mode LED, 1 = current mode.
pub const PD_LED_MODE: usize = 3;
/// Constant current indicator of the regulator, active low.
pub const PD_CURRENT_MODE: usize = 4;

fn pin_input(_bit: usize) -> u8 {
    0
}
fn pin_output(bit: usize) -> u8 {
    1 << bit
}
fn pin_low(_bit: usize) -> u8 {
    0
}
fn pin_high(bit: usize) -> u8 {
    1 << bit
}
fn pin_floating(_bit: usize) -> u8 {
    0
}
fn pin_pullup(bit: usize) -> u8 {
    1 << bit
}

/// Configure all pins. Must run with interrupts disabled.
#[rustfmt::skip]
pub fn ports_init(dual_dac: bool) {
    PORTA.setup(
        pin_input(0) | // encoder A
        pin_input(1) | // encoder B
        pin_input(2) | // output voltage, on-chip ADC
        pin_input(3) | // output current, on-chip ADC
        pin_input(4) | // input voltage, on-chip ADC
        pin_input(5) |
        pin_input(6) |
        pin_input(7),
        pin_pullup(0) | // encoder A
        pin_pullup(1) | // encoder B
        pin_floating(2) |
        pin_floating(3) |
        pin_floating(4) |
        pin_floating(5) |
        pin_floating(6) |
        pin_floating(7),
    );
    PORTB.setup(
        pin_output(PB_SCLK) |
        pin_output(PB_SDATA) |
        pin_output(PB_RELAY_HIGH) |
        pin_output(PB_RELAY_LOW) |
        pin_output(PB_STRDC) |
        pin_output(PB_RANGE_U) |
        pin_input(PB_SDATA_IN) |
        pin_output(PB_STRADC),
        pin_high(PB_SCLK) |
        pin_high(PB_SDATA) |
        pin_low(PB_RELAY_HIGH) |
        pin_low(PB_RELAY_LOW) |
        pin_high(PB_STRDC) |
        pin_low(PB_RANGE_U) |
        pin_pullup(PB_SDATA_IN) |
        pin_high(PB_STRADC),
    );
    PORTC.setup(
        pin_input(0) | // TWI SCL
        pin_input(1) | // TWI SDA
        pin_output(PC_RANGE_I0) |
        pin_output(PC_RANGE_I1) |
        pin_output(PC_MPXU) |
        pin_output(PC_MPXI) |
        pin_output(PC_ADC_SEL) |
        pin_output(PC_OUTPUT_ENABLE),
        pin_pullup(0) |
        pin_pullup(1) |
        pin_high(PC_RANGE_I0) |
        pin_high(PC_RANGE_I1) |
        if dual_dac {
            // Both DAC strobes idle high.
            pin_high(PC_MPXU) | pin_high(PC_MPXI)
        } else {
            // Both sample-and-hold stages hold.
            pin_low(PC_MPXU) | pin_high(PC_MPXI)
        } |
        pin_low(PC_ADC_SEL) |
        pin_low(PC_OUTPUT_ENABLE),
    );
    PORTD.setup(
        pin_input(0) | // UART RXD
        pin_output(1) | // UART TXD
        pin_output(PD_LED_ACT) |
        pin_output(PD_LED_MODE) |
        pin_input(PD_CURRENT_MODE) |
        pin_input(5) | // channel address
        pin_input(6) | // channel address
        pin_input(7), // channel address
        pin_pullup(0) |
        pin_high(1) |
        pin_high(PD_LED_ACT) |
        pin_low(PD_LED_MODE) |
        pin_floating(PD_CURRENT_MODE) |
        pin_pullup(5) |
        pin_pullup(6) |
        pin_pullup(7),
    );
}

// vim: ts=4 sw=4 expandtab
