#![allow(unused_unsafe)]

use crate::{
    hw::{F_CPU, mcu},
    system::DCG,
};
use dcg::mutex::AnyCtx;

/// LM75 bus address, all address pins low.
const LM75_ADDR: u8 = 0x48;

/// TWI clock.
const SCL_HZ: u32 = 100_000;

/// A bus transfer step is given up after this time.
const TIMEOUT_US: u32 = 2000;

// TWCR bits.
const TWINT: u8 = 1 << 7;
const TWEA: u8 = 1 << 6;
const TWSTA: u8 = 1 << 5;
const TWSTO: u8 = 1 << 4;
const TWEN: u8 = 1 << 2;

// TWSR status codes.
const ST_START: u8 = 0x08;
const ST_SLA_R_ACK: u8 = 0x40;
const ST_DATA_ACK: u8 = 0x50;
const ST_DATA_NACK: u8 = 0x58;

/// Heat sink temperature sensor on the TWI bus.
pub struct Lm75 {
    twi: mcu::TWI,
}

impl Lm75 {
    pub fn new(twi: mcu::TWI) -> Self {
        // SAFETY: Plain bit rate divider, prescaler 1.
        unsafe {
            twi.twsr().write(|w| w.bits(0));
            twi.twbr().write(|w| w.bits(((F_CPU / SCL_HZ - 16) / 2) as u8));
        }
        Self { twi }
    }

    fn command(&mut self, twcr: u8) -> Option<u8> {
        // SAFETY: Plain TWI control value.
        self.twi.twcr().write(|w| unsafe { w.bits(twcr | TWINT | TWEN) });
        let a = AnyCtx::new();
        let start = DCG.ticker().now(&a);
        loop {
            if self.twi.twcr().read().bits() & TWINT != 0 {
                return Some(self.twi.twsr().read().bits() & 0xF8);
            }
            if DCG.ticker().now(&a).micros_since(start) > TIMEOUT_US {
                return None;
            }
        }
    }

    fn stop(&mut self) {
        // SAFETY: Plain TWI control value.
        self.twi
            .twcr()
            .write(|w| unsafe { w.bits(TWINT | TWEN | TWSTO) });
    }

    fn read_raw(&mut self) -> Option<i16> {
        if self.command(TWSTA)? != ST_START {
            return None;
        }
        // SAFETY: Address byte.
        self.twi
            .twdr()
            .write(|w| unsafe { w.bits((LM75_ADDR << 1) | 1) });
        if self.command(0)? != ST_SLA_R_ACK {
            return None;
        }
        if self.command(TWEA)? != ST_DATA_ACK {
            return None;
        }
        let hi = self.twi.twdr().read().bits();
        if self.command(0)? != ST_DATA_NACK {
            return None;
        }
        let lo = self.twi.twdr().read().bits();
        Some(i16::from_be_bytes([hi, lo]))
    }

    /// Temperature in degree Celsius, if the sensor answers.
    pub fn read(&mut self) -> Option<f32> {
        let raw = self.read_raw();
        self.stop();
        // 9 bit two's complement, 0.5 degree per LSB.
        raw.map(|raw| (raw >> 7) as f32 * 0.5)
    }
}

// vim: ts=4 sw=4 expandtab
