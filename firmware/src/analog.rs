#![allow(unused_unsafe)]

use crate::{hw::mcu, temp::Lm75};
use dcg::{AnalogIn, hw::AnalogChannel};

/// Conversions averaged per reading.
const OVERSAMPLE: u16 = 4;

/// On-chip ADC and the heat sink sensor.
pub struct Analog {
    adc: mcu::ADC,
    lm75: Lm75,
}

impl Analog {
    #[rustfmt::skip]
    pub fn new(adc: mcu::ADC, lm75: Lm75) -> Self {
        // SAFETY: Disable the digital inputs of the analog pins PA2..PA4.
        adc.didr0().write(|w| unsafe { w.bits(0b0001_1100) });
        Self { adc, lm75 }
    }

    #[rustfmt::skip]
    fn convert(&mut self) -> u16 {
        // ADEN, ADSC, ADIF, prescaler 64.
        // SAFETY: Plain ADC control value.
        self.adc.adcsra().write(|w| unsafe { w.bits(0b1101_0110) });
        while self.adc.adcsra().read().bits() & (1 << 4) == 0 {}
        self.adc.adc().read().bits()
    }
}

impl AnalogIn for Analog {
    fn read_analog(&mut self, ch: AnalogChannel) -> u16 {
        // AREF reference, right adjusted.
        // SAFETY: The channel is one of the single ended inputs 0..7.
        self.adc
            .admux()
            .write(|w| unsafe { w.bits(ch as u8 & 0x07) });

        let mut sum = 0;
        for _ in 0..OVERSAMPLE {
            sum += self.convert();
        }
        (sum + OVERSAMPLE / 2) / OVERSAMPLE
    }

    fn read_temperature(&mut self) -> Option<f32> {
        self.lm75.read()
    }
}

// vim: ts=4 sw=4 expandtab
