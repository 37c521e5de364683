//! Log output on USART0.
//!
//! Only the main loop logs. The transmitter is polled, so the interrupts keep running.
//! Every line starts with the tick count.

#![allow(unused_unsafe)]

use crate::{
    hw::{F_CPU, mcu},
    system::DCG,
};
use dcg::mutex::AnyCtx;
use core::fmt::Write as _;

const BAUD: u32 = 19_200;

// UCSR0A bits.
const UDRE0: u8 = 1 << 5;
// UCSR0B bits.
const TXEN0: u8 = 1 << 3;
// UCSR0C: 8N1.
const UCSZ_8BIT: u8 = 0b0000_0110;

#[inline(always)]
fn usart() -> &'static mcu::usart0::RegisterBlock {
    // SAFETY: The USART is only touched by `debug_init` and the logger.
    //         Both run in main context.
    unsafe { &*mcu::USART0::ptr() }
}

fn tx(data: u8) {
    while usart().ucsr0a().read().bits() & UDRE0 == 0 {}
    // SAFETY: Plain data byte.
    usart().udr0().write(|w| unsafe { w.bits(data) });
}

struct UartWriter;

impl core::fmt::Write for UartWriter {
    fn write_str(&mut self, s: &str) -> core::fmt::Result {
        for b in s.bytes() {
            if b == b'\n' {
                tx(b'\r');
            }
            tx(b);
        }
        Ok(())
    }
}

struct UartLogger;

impl log::Log for UartLogger {
    fn enabled(&self, metadata: &log::Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &log::Record) {
        if self.enabled(record.metadata()) {
            let now = DCG.ticker().now(&AnyCtx::new());
            let _ = writeln!(UartWriter, "{:<10} {}: {}", now.0, record.level(), record.args());
        }
    }

    fn flush(&self) {}
}

static LOGGER: UartLogger = UartLogger;

#[rustfmt::skip]
pub fn debug_init() {
    // SAFETY: Plain baud rate and frame format values.
    unsafe {
        usart().ubrr0().write(|w| w.bits((F_CPU / (16 * BAUD) - 1) as u16));
        usart().ucsr0c().write(|w| w.bits(UCSZ_8BIT));
        usart().ucsr0b().write(|w| w.bits(TXEN0));
    }

    // SAFETY: Called once from main() before the interrupts are enabled.
    if unsafe { log::set_logger_racy(&LOGGER) }.is_ok() {
        log::set_max_level(if cfg!(feature = "debug") {
            log::LevelFilter::Debug
        } else {
            log::LevelFilter::Info
        });
    }
}

// vim: ts=4 sw=4 expandtab
