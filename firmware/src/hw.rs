pub use atmega::{self as mcu, Peripherals};
pub use avr_device::atmega644 as atmega;
pub use avr_device::interrupt;

use crate::{conv::MuxHw, system::DCG, timer::mux_irq_enable};
use dcg::IrqCtx;

/// CPU clock.
pub const F_CPU: u32 = 20_000_000;

/// Tick timer. 100 us.
#[avr_device::interrupt(atmega644)]
fn TIMER0_COMPA() {
    DCG.tick_isr();
}

/// Output multiplexer. 500 us.
///
/// Runs with the global interrupt enabled, so that the tick timer keeps running.
/// Its own compare interrupt is masked to prevent reentry.
#[avr_device::interrupt(atmega644)]
fn TIMER2_COMPA() {
    mux_irq_enable(false);
    // SAFETY: The multiplexer interrupt is masked, so this handler can not nest.
    //         The tick interrupt does not touch any multiplexer state.
    unsafe { interrupt::enable() };
    {
        // SAFETY: We are inside of the multiplexer interrupt handler.
        //         The main loop can not run until we return.
        let c = unsafe { IrqCtx::new() };
        DCG.mux_isr(&c, &mut MuxHw);
    }
    interrupt::disable();
    mux_irq_enable(true);
}

/// Busy wait for `us` microseconds.
#[inline(always)]
pub fn delay_us(us: u32) {
    avr_device::asm::delay_cycles(us * (F_CPU / 1_000_000));
}

// vim: ts=4 sw=4 expandtab
