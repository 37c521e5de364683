use crate::{
    params::Params,
    range::{CURRENT_RANGES, CurrentRange, VOLTAGE_RANGES, VoltageRange},
};

/// Converter weights derived from the [Params].
#[derive(Copy, Clone, PartialEq, Debug)]
pub struct Scales {
    /// Volts per DAC LSB.
    pub dac_lsb_u: [f32; VOLTAGE_RANGES],
    /// Volts per ADC LSB.
    pub adc_lsb_u: [f32; VOLTAGE_RANGES],
    /// Amperes per DAC LSB.
    pub dac_lsb_i: [f32; CURRENT_RANGES],
    /// Amperes per ADC LSB.
    pub adc_lsb_i: [f32; CURRENT_RANGES],
    /// Volts per on-chip ADC LSB of the input voltage sense.
    pub pwr_in_fac: f32,
    /// Largest DAC code.
    pub dac_max: u16,
}

impl Scales {
    pub const fn new(p: &Params) -> Self {
        let (mut ufac, dac_full) = if p.options.dac16 {
            // The LTC1655 has an internal gain of 2.
            (2.0 * p.ref_voltage, 65536.0)
        } else {
            (p.ref_voltage, 4096.0)
        };
        let adc_full = if p.options.adc16 { 65536.0 } else { 1024.0 };

        let dac_lsb_u = [
            ufac * p.gain_out / (dac_full * p.dac_u_scales[0]),
            ufac * p.gain_pre * p.gain_out / (dac_full * p.dac_u_scales[1]),
        ];
        let mut adc_lsb_u = [0.0; VOLTAGE_RANGES];
        let mut i = 0;
        while i < VOLTAGE_RANGES {
            adc_lsb_u[i] = p.adc_u_factors[i] * p.adc_u_scales[i] * p.ref_voltage * p.gain_out / adc_full;
            i += 1;
        }

        ufac *= p.gain_i;
        let mut dac_lsb_i = [0.0; CURRENT_RANGES];
        let mut adc_lsb_i = [0.0; CURRENT_RANGES];
        let mut i = 0;
        while i < CURRENT_RANGES {
            dac_lsb_i[i] = ufac / p.r_sense[i] / (dac_full * p.dac_i_scales[i]);
            // The current sense amplifier has a gain of 2.
            adc_lsb_i[i] = p.adc_i_scales[i] * p.ref_voltage / (2.0 * p.r_sense[i]) / adc_full;
            i += 1;
        }

        Self {
            dac_lsb_u,
            adc_lsb_u,
            dac_lsb_i,
            adc_lsb_i,
            pwr_in_fac: p.ref_voltage * p.gain_pwr_in / 1024.0,
            dac_max: if p.options.dac16 { 0xFFFF } else { 0x0FFF },
        }
    }

    pub fn voltage_code(&self, p: &Params, range: VoltageRange, volts: f32) -> u16 {
        let r = range.index();
        to_code(volts, self.dac_lsb_u[r], p.dac_u_offsets[r], self.dac_max)
    }

    pub fn current_code(&self, p: &Params, range: CurrentRange, amps: f32) -> u16 {
        let r = range.index();
        to_code(amps, self.dac_lsb_i[r], p.dac_i_offsets[r], self.dac_max)
    }

    pub fn voltage_from_raw(&self, p: &Params, range: VoltageRange, raw: u16) -> f32 {
        let r = range.index();
        (raw as i32 + p.adc_u_offsets[r] as i32) as f32 * self.adc_lsb_u[r]
    }

    pub fn current_from_raw(&self, p: &Params, range: CurrentRange, raw: u16) -> f32 {
        let r = range.index();
        (raw as i32 + p.adc_i_offsets[r] as i32) as f32 * self.adc_lsb_i[r]
    }

    pub fn input_voltage_from_raw(&self, raw: u16) -> f32 {
        raw as f32 * self.pwr_in_fac
    }
}

/// Convert a physical value into a DAC code, clamped to the converter range.
fn to_code(value: f32, lsb: f32, offset: i16, max: u16) -> u16 {
    let code = (value / lsb + 0.5) as i32 + offset as i32;
    code.clamp(0, max as i32) as u16
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_scales_16bit() {
        let p = Params::DEFAULT_16BIT;
        let s = Scales::new(&p);
        assert_eq!(s.dac_max, 0xFFFF);
        // 5 V * 3 / 65536
        assert!((s.dac_lsb_u[0] - 15.0 / 65536.0).abs() < 1e-9);
        assert!((s.dac_lsb_u[1] - 45.0 / 65536.0).abs() < 1e-9);

        // 5 V in the low range.
        let code = s.voltage_code(&p, VoltageRange::Low, 5.0);
        assert_eq!(code, 21845 + 10);
        // Clamped at the top.
        assert_eq!(s.voltage_code(&p, VoltageRange::Low, 100.0), 0xFFFF);
        // Clamped at the bottom.
        assert_eq!(s.voltage_code(&p, VoltageRange::Low, -1.0), 0);
        // Zero volts outputs the offset.
        assert_eq!(s.voltage_code(&p, VoltageRange::Low, 0.0), 10);
    }

    #[test]
    fn test_scales_12bit() {
        let p = Params::DEFAULT_12BIT;
        let s = Scales::new(&p);
        assert_eq!(s.dac_max, 0x0FFF);
        assert_eq!(s.current_code(&p, CurrentRange::Ma2000, 10.0), 0x0FFF);
        assert!(s.current_code(&p, CurrentRange::Ma2000, 1.0) < 0x0FFF);
    }

    #[test]
    fn test_measurement_conversion() {
        let p = Params::DEFAULT_16BIT;
        let s = Scales::new(&p);
        // The raw offset is compensated.
        assert_eq!(s.voltage_from_raw(&p, VoltageRange::Low, 306), 0.0);
        let v = s.voltage_from_raw(&p, VoltageRange::Low, 306 + 10000);
        assert!((v - 10000.0 * s.adc_lsb_u[0]).abs() < 1e-6);
        assert!(s.current_from_raw(&p, CurrentRange::Ma2, 0) < 0.0);
        assert!((s.input_voltage_from_raw(1024) - 2.5 * 19.0).abs() < 1e-4);
    }
}

// vim: ts=4 sw=4 expandtab
