#![allow(unused_unsafe)]

use crate::hw::{F_CPU, mcu};

#[inline(always)]
fn tc2() -> &'static mcu::tc2::RegisterBlock {
    // SAFETY: TC2 is only touched by `timer_init` before the interrupts are
    //         enabled and by the compare interrupt mask below.
    unsafe { &*mcu::TC2::ptr() }
}

#[rustfmt::skip]
pub fn timer_init(tc0: &mcu::TC0) {
    // SAFETY: Plain timer configuration values.
    unsafe {
        // Timer 0: CTC, prescaler 8 -> 100 us period.
        tc0.tccr0a().write(|w| w.bits(1 << 1)); // WGM01
        tc0.tcnt0().write(|w| w.bits(0));
        tc0.ocr0a().write(|w| w.bits((F_CPU / 80_000 - 1) as u8));
        tc0.timsk0().write(|w| w.bits(1 << 1)); // OCIE0A
        tc0.tccr0b().write(|w| w.bits(1 << 1)); // CS01

        // Timer 2: CTC, prescaler 64 -> 500 us period.
        tc2().tccr2a().write(|w| w.bits(1 << 1)); // WGM21
        tc2().tcnt2().write(|w| w.bits(0));
        tc2().ocr2a().write(|w| w.bits((F_CPU / 128_000 - 1) as u8));
        tc2().timsk2().write(|w| w.bits(1 << 1)); // OCIE2A
        tc2().tccr2b().write(|w| w.bits(1 << 2)); // CS22
    }
}

/// Mask or unmask the multiplexer compare interrupt.
#[inline(always)]
pub fn mux_irq_enable(enable: bool) {
    // SAFETY: TIMSK2 only holds interrupt enable bits.
    unsafe {
        tc2()
            .timsk2()
            .write(|w| w.bits(if enable { 1 << 1 } else { 0 }));
    }
}

// vim: ts=4 sw=4 expandtab
