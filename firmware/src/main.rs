#![no_std]
#![no_main]
#![feature(abi_avr_interrupt)]
#![feature(asm_experimental_arch)]
#![feature(asm_const)]

mod analog;
mod conv;
mod debug;
mod eeprom;
mod hw;
mod ports;
mod system;
mod temp;
mod timer;

use crate::{
    analog::Analog,
    debug::debug_init,
    eeprom::Eeprom,
    hw::{Peripherals, interrupt},
    ports::{PC_OUTPUT_ENABLE, PORTC, ports_init},
    system::{DCG, System},
    temp::Lm75,
    timer::timer_init,
};
use dcg::{Capability, MainCtx};

fn wdt_init() {
    // SAFETY: The asm code only accesses the WDT registers
    //         which are not accessed from anywhere else in the program.
    unsafe {
        // Enable WDT with timeout 250 ms
        core::arch::asm!(
            "ldi {tmp}, 0x18", // WDCE=1, WDE=1
            "sts {WDTCSR}, {tmp}",
            "ldi {tmp}, 0x0C", // WDE=1, WDP2=1, WDP1=0, WDP0=0
            "sts {WDTCSR}, {tmp}",
            tmp = out(reg_upper) _,
            WDTCSR = const 0x60,
            options(nostack, preserves_flags)
        );
    }
}

/// Cheaper Option::unwrap() alternative.
///
/// This is cheaper, because it doesn't call into the panic unwind path.
#[inline(always)]
fn unwrap_option<T>(value: Option<T>) -> T {
    match value {
        Some(value) => value,
        None => reset_system(),
    }
}

/// Reset the system.
#[inline(always)]
fn reset_system() -> ! {
    loop {
        // Wait for the watchdog timer to trigger and reset the system.
        // No interrupt resets the watchdog timer.
    }
}

#[inline(always)]
#[panic_handler]
fn panic(_: &core::panic::PanicInfo) -> ! {
    reset_system();
}

#[avr_device::entry]
fn main() -> ! {
    wdt_init();

    let dp = unwrap_option(Peripherals::take());

    ports_init(Capability::CONFIGURED == Capability::DualDac);
    debug_init();
    timer_init(&dp.TC0);

    let lm75 = Lm75::new(dp.TWI);
    let mut sys = System::new(Analog::new(dp.ADC, lm75), Eeprom::new(dp.EEPROM));

    // SAFETY
    //
    // This is the context handle for the main() function.
    // Holding a reference to this object proves that the holder
    // is running in main() context.
    let m = unsafe { MainCtx::new() };

    sys.init(&m);
    PORTC.set(PC_OUTPUT_ENABLE, DCG.settings(&m).output_on);

    // SAFETY: This must be after construction of MainCtx
    //         and after the channel state has been initialized.
    unsafe { interrupt::enable() };

    loop {
        sys.run(&m);
        avr_device::asm::wdr();
    }
}

// vim: ts=4 sw=4 expandtab
