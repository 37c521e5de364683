use crate::mutex::{MainCtx, MutexCell};

/// Saturating up/down counter with hysteresis on its output.
///
/// Every active input counts up to `LIMIT`, every inactive input counts down to 0.
/// The output switches on above `ON` and off below `OFF`.
pub struct Debounce<const LIMIT: u8, const ON: u8, const OFF: u8> {
    count: MutexCell<u8>,
    state: MutexCell<bool>,
}

impl<const LIMIT: u8, const ON: u8, const OFF: u8> Debounce<LIMIT, ON, OFF> {
    pub const fn new() -> Self {
        Self {
            count: MutexCell::new(0),
            state: MutexCell::new(false),
        }
    }

    /// Feed one raw input sample and return the debounced state.
    pub fn run(&self, m: &MainCtx<'_>, active: bool) -> bool {
        let count = self.count.get(m);
        let count = if active {
            count.saturating_add(1).min(LIMIT)
        } else {
            count.saturating_sub(1)
        };
        self.count.set(m, count);

        let mut state = self.state.get(m);
        if state && count < OFF {
            state = false;
        }
        if !state && count > ON {
            state = true;
        }
        self.state.set(m, state);
        state
    }

    pub fn get(&self, m: &MainCtx<'_>) -> bool {
        self.state.get(m)
    }

    pub fn count(&self, m: &MainCtx<'_>) -> u8 {
        self.count.get(m)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::mutex::test::main_ctx;

    #[test]
    fn test_hysteresis() {
        let m = main_ctx();
        let d = Debounce::<30, 20, 10>::new();

        for _ in 0..20 {
            assert!(!d.run(&m, true));
        }
        assert!(d.run(&m, true));
        for _ in 0..20 {
            d.run(&m, true);
        }
        assert_eq!(d.count(&m), 30);

        // Stays on down to the lower threshold.
        for _ in 0..20 {
            assert!(d.run(&m, false));
        }
        assert_eq!(d.count(&m), 10);
        assert!(!d.run(&m, false));
        assert!(!d.get(&m));

        // Glitches do not switch it back on.
        for _ in 0..5 {
            assert!(!d.run(&m, true));
            assert!(!d.run(&m, false));
        }
        for _ in 0..20 {
            d.run(&m, false);
        }
        assert_eq!(d.count(&m), 0);
    }
}

// vim: ts=4 sw=4 expandtab
