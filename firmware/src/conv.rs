//! Serial DAC and ADC, range lines and sample-and-hold switches.
//!
//! Only the multiplexer interrupt calls into this module.

use crate::{
    hw::delay_us,
    ports::{
        PB_RANGE_U, PB_SCLK, PB_SDATA, PB_SDATA_IN, PB_STRADC, PB_STRDC, PC_ADC_SEL, PC_MPXI, PC_MPXU,
        PC_RANGE_I0, PC_RANGE_I1, PORTB, PORTC,
    },
};
use core::sync::atomic::{AtomicBool, Ordering};
use dcg::{Capability, Channel, OutputHw};

/// The board has the 16 bit LTC1655 instead of the 12 bit LTC1257.
static DAC16: AtomicBool = AtomicBool::new(true);

pub fn set_dac16(dac16: bool) {
    DAC16.store(dac16, Ordering::Relaxed);
}

/// Extra DAC settle time before the sample-and-hold stage tracks again.
const SETTLE_US: u32 = 20;

#[inline(always)]
fn sclk(level: bool) {
    PORTB.set(PB_SCLK, level);
}

#[inline(always)]
fn sdata(level: bool) {
    PORTB.set(PB_SDATA, level);
}

/// Load strobe of the DAC that serves `ch`.
#[inline(always)]
fn strobe(ch: Channel, level: bool) {
    match (Capability::CONFIGURED, ch) {
        (Capability::SingleDac, _) => PORTB.set(PB_STRDC, level),
        (Capability::DualDac, Channel::Voltage) => PORTC.set(PC_MPXU, level),
        (Capability::DualDac, Channel::Current) => PORTC.set(PC_MPXI, level),
    }
}

/// LTC1655: 16 bit, MSB first, data latched on the rising clock edge.
fn shift_out_1655(ch: Channel, code: u16) {
    sclk(false);
    strobe(ch, false);
    for bit in (0..16).rev() {
        sdata(code & (1 << bit) != 0);
        sclk(true);
        sclk(false);
    }
    strobe(ch, true);
}

/// LTC1257: 12 bit, MSB first, loaded by a low pulse on the strobe.
fn shift_out_1257(ch: Channel, code: u16) {
    sclk(true);
    strobe(ch, true);
    for bit in (0..12).rev() {
        sclk(false);
        sdata(code & (1 << bit) != 0);
        sclk(true);
    }
    strobe(ch, false);
    sclk(false);
    strobe(ch, true);
}

/// LTC1864: 16 bit, MSB first.
fn shift_in_1864() -> u16 {
    sclk(true);
    delay_us(4);
    PORTB.set(PB_STRADC, false);
    delay_us(1);
    let mut value = 0;
    for _ in 0..16 {
        sclk(false);
        value <<= 1;
        sclk(true);
        if PORTB.get(PB_SDATA_IN) {
            value |= 1;
        }
    }
    PORTB.set(PB_STRADC, true);
    value
}

/// Hardware access of the multiplexer interrupt.
pub struct MuxHw;

impl OutputHw for MuxHw {
    fn dac_write(&mut self, ch: Channel, code: u16) {
        if DAC16.load(Ordering::Relaxed) {
            shift_out_1655(ch, code);
        } else {
            shift_out_1257(ch, code);
        }
    }

    fn dac_track(&mut self, ch: Channel, track: bool) {
        match ch {
            Channel::Voltage => PORTC.set(PC_MPXU, track),
            Channel::Current => PORTC.set(PC_MPXI, !track),
        }
    }

    fn set_range(&mut self, ch: Channel, range: u8) {
        match ch {
            Channel::Voltage => PORTB.set(PB_RANGE_U, range != 0),
            Channel::Current => {
                // Active low.
                let mask = (1 << PC_RANGE_I0) | (1 << PC_RANGE_I1);
                PORTC.set_masked(mask, !(range << PC_RANGE_I0));
            }
        }
    }

    fn adc_acquire(&mut self) -> u16 {
        // Start a conversion and drop its result.
        sclk(true);
        delay_us(1);
        PORTB.set(PB_STRADC, false);
        delay_us(4);
        PORTB.set(PB_STRADC, true);
        shift_in_1864();

        let mut sum: u32 = 0;
        for _ in 0..4 {
            sum += shift_in_1864() as u32;
        }
        (sum / 4) as u16
    }

    fn adc_select(&mut self, ch: Channel) {
        PORTC.set(PC_ADC_SEL, ch == Channel::Voltage);
    }

    fn settle_delay(&mut self) {
        delay_us(SETTLE_US);
    }

    fn poll_encoder(&mut self) {
        // The front panel is not driven by this firmware.
    }
}

// vim: ts=4 sw=4 expandtab
