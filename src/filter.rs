use crate::mutex::{MainCtx, MutexCell};

/// First order low pass.
///
/// With `div` = 4 each run computes `(3 * out + input) / 4`.
pub struct Filter {
    buf: MutexCell<f32>,
    out: MutexCell<f32>,
}

impl Filter {
    pub const fn new() -> Self {
        Self {
            buf: MutexCell::new(0.0),
            out: MutexCell::new(0.0),
        }
    }

    pub fn reset(&self, m: &MainCtx<'_>) {
        self.buf.set(m, 0.0);
        self.out.set(m, 0.0);
    }

    pub fn run(&self, m: &MainCtx<'_>, input: f32, div: f32) -> f32 {
        let mut buf = self.buf.get(m);
        buf -= self.out.get(m);
        buf += input;
        self.buf.set(m, buf);

        let out = buf / div;
        self.out.set(m, out);

        out
    }

    pub fn get(&self, m: &MainCtx<'_>) -> f32 {
        self.out.get(m)
    }
}


// vim: ts=4 sw=4 expandtab
