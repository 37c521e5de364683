use crate::mutex::{AnyCtx, IrqCell, IrqCtx, MainCtx, Mutex, SharedCell};
use core::cell::Cell;

pub const TIMER_TICK_US: u32 = 100; // 100 us per tick.

/// Free running tick counter.
///
/// Incremented by the tick timer interrupt every [TIMER_TICK_US].
/// The counter is read from the main loop and from the multiplexer interrupt,
/// so all accesses take a critical section.
pub struct Ticker {
    ticks: Mutex<Cell<u32>>,
}

impl Ticker {
    pub const fn new() -> Self {
        Self {
            ticks: Mutex::new(Cell::new(0)),
        }
    }

    /// Advance by one tick. Called by the tick timer interrupt.
    #[inline(always)]
    pub fn irq_tick(&self) {
        critical_section::with(|cs| {
            let ticks = self.ticks.borrow(cs);
            ticks.set(ticks.get().wrapping_add(1));
        });
    }

    #[inline(always)]
    pub fn now(&self, _a: &AnyCtx) -> Timestamp {
        Timestamp(critical_section::with(|cs| self.ticks.borrow(cs).get()))
    }
}

impl Default for Ticker {
    fn default() -> Self {
        Self::new()
    }
}

/// Point in time in ticks. Wraps after about five days.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Default)]
pub struct Timestamp(pub u32);

impl Timestamp {
    /// Ticks from `earlier` to `self`. Correct across one counter wrap.
    #[inline]
    pub const fn ticks_since(self, earlier: Timestamp) -> u32 {
        self.0.wrapping_sub(earlier.0)
    }

    /// Microseconds from `earlier` to `self`.
    #[inline]
    pub const fn micros_since(self, earlier: Timestamp) -> u32 {
        self.ticks_since(earlier).saturating_mul(TIMER_TICK_US)
    }
}

/// Cooperative job periods.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
#[repr(u8)]
pub enum Job {
    Job4ms = 1 << 0,
    Job10ms = 1 << 1,
    Job50ms = 1 << 2,
    Job100ms = 1 << 3,
}

impl Job {
    #[inline]
    const fn mask(self) -> u8 {
        self as u8
    }
}

/// Job period flags, derived from the 1 ms output slots of the multiplexer.
pub struct JobTimers {
    active: SharedCell<bool>,
    restart: SharedCell<bool>,
    pending: SharedCell<u8>,
    base4: IrqCell<u8>,
    base10: IrqCell<u8>,
    base100: IrqCell<u8>,
}

impl JobTimers {
    pub const fn new() -> Self {
        Self {
            active: SharedCell::new(false),
            restart: SharedCell::new(false),
            pending: SharedCell::new(0),
            base4: IrqCell::new(0),
            base10: IrqCell::new(0),
            base100: IrqCell::new(0),
        }
    }

    /// Clear all pending flags and start counting from zero.
    pub fn start(&self, m: &MainCtx<'_>) {
        m.critical(|cs| {
            self.pending.set_cs(cs, 0);
            self.restart.set_cs(cs, true);
            self.active.set_cs(cs, true);
        });
    }

    /// Account one millisecond. Called by the multiplexer interrupt.
    pub fn irq_advance_1ms(&self, c: &IrqCtx<'_>) {
        if !self.active.get_irq(c) {
            return;
        }
        if self.restart.replace_irq(c, false) {
            self.base4.set(c, 0);
            self.base10.set(c, 0);
            self.base100.set(c, 0);
        }

        let mut pending = self.pending.get_irq(c);

        let base4 = self.base4.get(c) + 1;
        if base4 >= 4 {
            pending |= Job::Job4ms.mask();
            self.base4.set(c, 0);
        } else {
            self.base4.set(c, base4);
        }

        let base10 = self.base10.get(c) + 1;
        if base10 >= 10 {
            pending |= Job::Job10ms.mask();
            self.base10.set(c, 0);
        } else {
            self.base10.set(c, base10);
        }

        let mut base100 = self.base100.get(c) + 1;
        if base100 >= 100 {
            pending |= Job::Job100ms.mask();
            base100 = 0;
        }
        self.base100.set(c, base100);
        if base100 == 0 || base100 == 50 {
            pending |= Job::Job50ms.mask();
        }

        self.pending.set_irq(c, pending);
    }

    /// Consume the pending flag of `job`.
    pub fn test_and_reset(&self, m: &MainCtx<'_>, job: Job) -> bool {
        m.critical(|cs| {
            let pending = self.pending.get_cs(cs);
            self.pending.set_cs(cs, pending & !job.mask());
            pending & job.mask() != 0
        })
    }
}

impl Default for JobTimers {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::mutex::test::{irq_ctx, main_ctx};

    #[test]
    fn test_ticker() {
        let a = AnyCtx::new();
        let t = Ticker::new();
        let start = t.now(&a);
        assert_eq!(start, Timestamp(0));
        t.irq_tick();
        t.irq_tick();
        assert_eq!(t.now(&a).ticks_since(start), 2);
        assert_eq!(t.now(&a).micros_since(start), 200);
    }

    #[test]
    fn test_timestamp_wrap() {
        let a = Timestamp(u32::MAX - 1);
        let b = Timestamp(2);
        assert_eq!(b.ticks_since(a), 4);
        assert_eq!(b.micros_since(a), 400);
    }

    #[test]
    fn test_job_timers() {
        let m = main_ctx();
        let c = irq_ctx();
        let t = JobTimers::new();

        // Not started.
        for _ in 0..10 {
            t.irq_advance_1ms(&c);
        }
        assert!(!t.test_and_reset(&m, Job::Job4ms));

        t.start(&m);
        let mut count4 = 0;
        let mut count10 = 0;
        let mut count50 = 0;
        let mut count100 = 0;
        for _ in 0..200 {
            t.irq_advance_1ms(&c);
            count4 += t.test_and_reset(&m, Job::Job4ms) as u32;
            count10 += t.test_and_reset(&m, Job::Job10ms) as u32;
            count50 += t.test_and_reset(&m, Job::Job50ms) as u32;
            count100 += t.test_and_reset(&m, Job::Job100ms) as u32;
        }
        assert_eq!(count4, 50);
        assert_eq!(count10, 20);
        assert_eq!(count50, 4);
        assert_eq!(count100, 2);

        // Flags are consumed.
        assert!(!t.test_and_reset(&m, Job::Job100ms));
    }
}

// vim: ts=4 sw=4 expandtab
