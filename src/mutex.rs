//! Execution context tokens and the cells that guard state shared between them.
//!
//! There are exactly two execution contexts:
//!
//! - The cooperative main loop, proven by a [MainCtx] reference.
//! - The output multiplexer interrupt, proven by an [IrqCtx] reference.
//!
//! State that only one context touches lives in a [MutexCell] / [MutexRefCell]
//! (main loop) or an [IrqCell] (interrupt). These never disable interrupts.
//!
//! State that crosses the boundary lives in a [SharedCell].
//! The main loop accesses it inside of a critical section, which masks the
//! interrupt and restores the previous interrupt state afterwards.
//! The interrupt can not be preempted by the main loop and therefore
//! accesses it directly with its own token.

use core::cell::{Cell, Ref, RefCell, RefMut};

pub use critical_section::{CriticalSection, Mutex};

macro_rules! define_context {
    ($name:ident) => {
        pub struct $name<'cs>(CriticalSection<'cs>);

        impl<'cs> $name<'cs> {
            /// Create a new context.
            ///
            /// # SAFETY
            ///
            /// This may only be called from the corresponding context.
            /// `MainCtx` may only be constructed from the main loop
            /// and `IrqCtx` may only be constructed from the multiplexer ISR.
            #[inline(always)]
            pub unsafe fn new() -> Self {
                // SAFETY: This cs is used with the low level Mutex primitives.
                //         The IRQ safety is upheld by the context machinery instead.
                //
                //         If a function takes a `MainCtx` argument, it can only be
                //         called from main loop context. Correspondingly for `IrqCtx`.
                //
                //         State crossing the context boundary is only reachable
                //         through `SharedCell`, which takes a real critical section
                //         from the main loop side.
                let cs = unsafe { CriticalSection::new() };
                fence();
                Self(cs)
            }

            /// Get the `CriticalSection` that belongs to this context.
            #[inline(always)]
            pub fn cs(&self) -> CriticalSection<'cs> {
                self.0
            }

            /// Convert this to a generic context.
            #[inline(always)]
            pub fn to_any(&self) -> AnyCtx {
                AnyCtx::new()
            }
        }

        impl<'cs> Drop for $name<'cs> {
            #[inline(always)]
            fn drop(&mut self) {
                fence();
            }
        }
    };
}

define_context!(MainCtx);
define_context!(IrqCtx);

impl MainCtx<'_> {
    /// Run `f` with the multiplexer interrupt masked.
    ///
    /// Use this to publish several [SharedCell]s as one consistent group.
    /// Nesting is allowed. The previous interrupt state is restored on return.
    #[inline(always)]
    pub fn critical<R>(&self, f: impl FnOnce(CriticalSection<'_>) -> R) -> R {
        critical_section::with(f)
    }
}

/// Generic context marker for code that runs in any context.
pub struct AnyCtx(());

impl AnyCtx {
    /// Create a new generic context.
    #[inline(always)]
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        Self(())
    }
}

/// Optimization and reordering fence.
#[inline(always)]
pub fn fence() {
    core::sync::atomic::fence(core::sync::atomic::Ordering::SeqCst);
}

/// Main loop owned `Copy` state.
pub struct MutexCell<T> {
    inner: Mutex<Cell<T>>,
}

impl<T> MutexCell<T> {
    #[inline]
    pub const fn new(inner: T) -> Self {
        Self {
            inner: Mutex::new(Cell::new(inner)),
        }
    }

    #[inline]
    pub fn replace(&self, m: &MainCtx<'_>, inner: T) -> T {
        self.inner.borrow(m.cs()).replace(inner)
    }
}

impl<T: Copy> MutexCell<T> {
    #[inline]
    pub fn get(&self, m: &MainCtx<'_>) -> T {
        self.inner.borrow(m.cs()).get()
    }

    #[inline]
    pub fn set(&self, m: &MainCtx<'_>, inner: T) {
        self.inner.borrow(m.cs()).set(inner);
    }
}

/// Main loop owned state that is too large to be copied around.
pub struct MutexRefCell<T> {
    inner: Mutex<RefCell<T>>,
}

impl<T> MutexRefCell<T> {
    #[inline]
    pub const fn new(value: T) -> Self {
        Self {
            inner: Mutex::new(RefCell::new(value)),
        }
    }

    /// Immutably borrow the value.
    ///
    /// Panics, if the value is mutably borrowed.
    #[inline]
    pub fn borrow<'cs>(&'cs self, m: &MainCtx<'cs>) -> Ref<'cs, T> {
        self.inner.borrow(m.cs()).borrow()
    }

    /// Mutably borrow the value.
    ///
    /// Panics, if the value is already borrowed.
    #[inline]
    pub fn borrow_mut<'cs>(&'cs self, m: &MainCtx<'cs>) -> RefMut<'cs, T> {
        self.inner.borrow(m.cs()).borrow_mut()
    }
}

/// Interrupt owned `Copy` state.
pub struct IrqCell<T> {
    inner: Mutex<Cell<T>>,
}

impl<T> IrqCell<T> {
    #[inline]
    pub const fn new(inner: T) -> Self {
        Self {
            inner: Mutex::new(Cell::new(inner)),
        }
    }
}

impl<T: Copy> IrqCell<T> {
    #[inline(always)]
    pub fn get(&self, c: &IrqCtx<'_>) -> T {
        self.inner.borrow(c.cs()).get()
    }

    #[inline(always)]
    pub fn set(&self, c: &IrqCtx<'_>, inner: T) {
        self.inner.borrow(c.cs()).set(inner);
    }
}

/// State written in one context and read in the other.
pub struct SharedCell<T> {
    inner: Mutex<Cell<T>>,
}

impl<T> SharedCell<T> {
    #[inline]
    pub const fn new(inner: T) -> Self {
        Self {
            inner: Mutex::new(Cell::new(inner)),
        }
    }
}

impl<T: Copy> SharedCell<T> {
    /// Read from the main loop.
    #[inline]
    pub fn get(&self, m: &MainCtx<'_>) -> T {
        m.critical(|cs| self.get_cs(cs))
    }

    /// Write from the main loop.
    #[inline]
    pub fn set(&self, m: &MainCtx<'_>, inner: T) {
        m.critical(|cs| self.set_cs(cs, inner));
    }

    /// Read inside of an already established critical section.
    #[inline(always)]
    pub fn get_cs(&self, cs: CriticalSection<'_>) -> T {
        self.inner.borrow(cs).get()
    }

    /// Write inside of an already established critical section.
    #[inline(always)]
    pub fn set_cs(&self, cs: CriticalSection<'_>, inner: T) {
        self.inner.borrow(cs).set(inner);
    }

    /// Read from the multiplexer interrupt.
    #[inline(always)]
    pub fn get_irq(&self, c: &IrqCtx<'_>) -> T {
        self.get_cs(c.cs())
    }

    /// Write from the multiplexer interrupt.
    #[inline(always)]
    pub fn set_irq(&self, c: &IrqCtx<'_>, inner: T) {
        self.set_cs(c.cs(), inner);
    }

    /// Replace the value from the multiplexer interrupt.
    #[inline(always)]
    pub fn replace_irq(&self, c: &IrqCtx<'_>, inner: T) -> T {
        self.inner.borrow(c.cs()).replace(inner)
    }
}

#[cfg(test)]
pub(crate) mod test {
    use super::*;

    pub fn main_ctx() -> MainCtx<'static> {
        // SAFETY: Host tests run single threaded per test and have no interrupts.
        unsafe { MainCtx::new() }
    }

    pub fn irq_ctx() -> IrqCtx<'static> {
        // SAFETY: Host tests run single threaded per test and have no interrupts.
        unsafe { IrqCtx::new() }
    }

    #[test]
    fn test_shared_cell_crosses_contexts() {
        let m = main_ctx();
        let c = irq_ctx();
        let cell = SharedCell::new(0_u16);

        cell.set(&m, 0x1234);
        assert_eq!(cell.get_irq(&c), 0x1234);
        cell.set_irq(&c, 0xABCD);
        assert_eq!(cell.get(&m), 0xABCD);
        assert_eq!(cell.replace_irq(&c, 7), 0xABCD);
        assert_eq!(cell.get(&m), 7);
    }

    #[test]
    fn test_critical_nests() {
        let m = main_ctx();
        let a = SharedCell::new(1_u8);
        let b = SharedCell::new(2_u8);

        m.critical(|cs| {
            a.set_cs(cs, 10);
            // A nested main loop access inside of the group publish.
            b.set(&m, a.get(&m) + 1);
        });
        assert_eq!(a.get(&m), 10);
        assert_eq!(b.get(&m), 11);
    }

    #[test]
    fn test_ref_cell() {
        let m = main_ctx();
        let cell = MutexRefCell::new([0_u8; 4]);
        cell.borrow_mut(&m)[2] = 5;
        assert_eq!(cell.borrow(&m)[2], 5);
    }
}

// vim: ts=4 sw=4 expandtab
