//! Persistent storage of the parameters and the RAM sequence.
//!
//! Every area starts with a marker word. An area without marker was never written.

use crate::hw::{interrupt, mcu};
use dcg::{
    Error, ParamStore, Params, SequenceStore,
    params::Options,
    range::{CURRENT_RANGES, RangeLock},
    sequence::{Breakpoint, RAM_SEQUENCE_LEN},
};

const MARKER: u16 = 0xAA55;

const PARAMS_ADDR: u16 = 0x000;
const SEQUENCE_ADDR: u16 = 0x200;
const SEQUENCE_SLOTS: u8 = 2;
/// Marker plus 6 bytes per breakpoint.
const SEQUENCE_SIZE: u16 = 2 + 6 * RAM_SEQUENCE_LEN as u16;
const EEPROM_SIZE: u16 = 2048;

// EECR bits.
const EERE: u8 = 1 << 0;
const EEPE: u8 = 1 << 1;

pub struct Eeprom {
    ee: mcu::EEPROM,
}

impl Eeprom {
    pub fn new(ee: mcu::EEPROM) -> Self {
        Self { ee }
    }

    fn wait(&self) {
        while self.ee.eecr().read().bits() & EEPE != 0 {}
    }

    fn read_byte(&self, addr: u16) -> u8 {
        self.wait();
        // SAFETY: Address and read strobe.
        self.ee.eear().write(|w| unsafe { w.bits(addr) });
        self.ee.eecr().write(|w| unsafe { w.bits(EERE) });
        self.ee.eedr().read().bits()
    }

    fn write_byte(&self, addr: u16, value: u8) {
        if self.read_byte(addr) == value {
            return;
        }
        self.wait();
        interrupt::free(|_| {
            // SAFETY: Address and data.
            self.ee.eear().write(|w| unsafe { w.bits(addr) });
            self.ee.eedr().write(|w| unsafe { w.bits(value) });
            // SAFETY: EEPE must follow EEMPE within four cycles.
            //         The asm only touches EECR and runs with interrupts disabled.
            unsafe {
                core::arch::asm!(
                    "sbi {EECR}, 2", // EEMPE
                    "sbi {EECR}, 1", // EEPE
                    EECR = const 0x1F,
                    options(nostack, preserves_flags)
                );
            }
        });
    }

    fn cursor(&mut self, addr: u16) -> Cursor<'_> {
        Cursor { ee: self, addr }
    }
}

struct Cursor<'a> {
    ee: &'a Eeprom,
    addr: u16,
}

impl Cursor<'_> {
    fn put_bytes(&mut self, bytes: &[u8]) {
        for b in bytes {
            if self.addr < EEPROM_SIZE {
                self.ee.write_byte(self.addr, *b);
            }
            self.addr = self.addr.wrapping_add(1);
        }
    }

    fn get_bytes<const N: usize>(&mut self) -> [u8; N] {
        let mut bytes = [0xFF; N];
        for b in bytes.iter_mut() {
            if self.addr < EEPROM_SIZE {
                *b = self.ee.read_byte(self.addr);
            }
            self.addr = self.addr.wrapping_add(1);
        }
        bytes
    }
}

/// Fixed size little endian storage format.
trait Field: Sized {
    fn put(&self, c: &mut Cursor<'_>);
    fn get(c: &mut Cursor<'_>) -> Self;
}

macro_rules! impl_field_num {
    ($($ty:ty),*) => {
        $(
            impl Field for $ty {
                fn put(&self, c: &mut Cursor<'_>) {
                    c.put_bytes(&self.to_le_bytes());
                }

                fn get(c: &mut Cursor<'_>) -> Self {
                    <$ty>::from_le_bytes(c.get_bytes())
                }
            }
        )*
    };
}

impl_field_num!(u8, u16, i16, f32);

impl Field for bool {
    fn put(&self, c: &mut Cursor<'_>) {
        (*self as u8).put(c);
    }

    fn get(c: &mut Cursor<'_>) -> Self {
        u8::get(c) != 0
    }
}

impl Field for RangeLock {
    fn put(&self, c: &mut Cursor<'_>) {
        self.to_raw().put(c);
    }

    fn get(c: &mut Cursor<'_>) -> Self {
        // Locks beyond the channel's ranges are dropped by `Params::sanitize_locks`.
        RangeLock::from_raw(u8::get(c), CURRENT_RANGES).unwrap_or_default()
    }
}

impl<T: Field, const N: usize> Field for [T; N] {
    fn put(&self, c: &mut Cursor<'_>) {
        for v in self {
            v.put(c);
        }
    }

    fn get(c: &mut Cursor<'_>) -> Self {
        core::array::from_fn(|_| T::get(c))
    }
}

impl Field for Breakpoint {
    fn put(&self, c: &mut Cursor<'_>) {
        self.level.put(c);
        self.duration_ms.put(c);
    }

    fn get(c: &mut Cursor<'_>) -> Self {
        let level = f32::get(c);
        Breakpoint::new(level, u16::get(c))
    }
}

impl Field for Params {
    fn put(&self, c: &mut Cursor<'_>) {
        self.dac_u_offsets.put(c);
        self.dac_u_scales.put(c);
        self.dac_i_offsets.put(c);
        self.dac_i_scales.put(c);
        self.adc_u_offsets.put(c);
        self.adc_u_scales.put(c);
        self.adc_i_offsets.put(c);
        self.adc_i_scales.put(c);
        self.init_voltage.put(c);
        self.init_current.put(c);
        self.gain_pre.put(c);
        self.gain_out.put(c);
        self.gain_i.put(c);
        self.ref_voltage.put(c);
        self.max_voltage.put(c);
        self.r_sense.put(c);
        self.max_current.put(c);
        self.adc_u_factors.put(c);
        self.options.dac16.put(c);
        self.options.adc16.put(c);
        self.options.suppress_fuse_msg.put(c);
        self.relay_voltage.put(c);
        self.ripple_on_ms.put(c);
        self.ripple_off_ms.put(c);
        self.ripple_depth.put(c);
        self.gain_pwr_in.put(c);
        self.lock_range_u.put(c);
        self.lock_range_i.put(c);
        self.output_on.put(c);
    }

    fn get(c: &mut Cursor<'_>) -> Self {
        Params {
            dac_u_offsets: Field::get(c),
            dac_u_scales: Field::get(c),
            dac_i_offsets: Field::get(c),
            dac_i_scales: Field::get(c),
            adc_u_offsets: Field::get(c),
            adc_u_scales: Field::get(c),
            adc_i_offsets: Field::get(c),
            adc_i_scales: Field::get(c),
            init_voltage: Field::get(c),
            init_current: Field::get(c),
            gain_pre: Field::get(c),
            gain_out: Field::get(c),
            gain_i: Field::get(c),
            ref_voltage: Field::get(c),
            max_voltage: Field::get(c),
            r_sense: Field::get(c),
            max_current: Field::get(c),
            adc_u_factors: Field::get(c),
            options: Options {
                dac16: Field::get(c),
                adc16: Field::get(c),
                suppress_fuse_msg: Field::get(c),
            },
            relay_voltage: Field::get(c),
            ripple_on_ms: Field::get(c),
            ripple_off_ms: Field::get(c),
            ripple_depth: Field::get(c),
            gain_pwr_in: Field::get(c),
            lock_range_u: Field::get(c),
            lock_range_i: Field::get(c),
            output_on: Field::get(c),
        }
    }
}

/// Read the area at `addr`, if its marker is present.
fn load<T: Field>(ee: &mut Eeprom, addr: u16) -> Result<T, Error> {
    let mut c = ee.cursor(addr);
    if u16::get(&mut c) != MARKER {
        return Err(Error::StorageUninitialized);
    }
    Ok(T::get(&mut c))
}

/// Write the area at `addr`. The marker is written last.
fn store<T: Field>(ee: &mut Eeprom, addr: u16, value: &T) {
    let mut c = ee.cursor(addr);
    0xFFFF_u16.put(&mut c);
    value.put(&mut c);
    ee.cursor(addr).put_bytes(&MARKER.to_le_bytes());
}

impl ParamStore for Eeprom {
    fn load(&mut self) -> Result<Params, Error> {
        load(self, PARAMS_ADDR)
    }

    fn commit(&mut self, params: &Params) -> Result<(), Error> {
        store(self, PARAMS_ADDR, params);
        Ok(())
    }
}

fn sequence_addr(slot: u8) -> Result<u16, Error> {
    if slot < SEQUENCE_SLOTS {
        Ok(SEQUENCE_ADDR + slot as u16 * SEQUENCE_SIZE)
    } else {
        Err(Error::Storage)
    }
}

impl SequenceStore for Eeprom {
    fn read_sequence(&mut self, slot: u8, out: &mut [Breakpoint; RAM_SEQUENCE_LEN]) -> Result<(), Error> {
        *out = load(self, sequence_addr(slot)?)?;
        Ok(())
    }

    fn write_sequence(&mut self, slot: u8, seq: &[Breakpoint; RAM_SEQUENCE_LEN]) -> Result<(), Error> {
        store(self, sequence_addr(slot)?, seq);
        Ok(())
    }
}

// vim: ts=4 sw=4 expandtab
