use crate::mutex::{IrqCtx, MainCtx, SharedCell};

/// Repeat count that never runs out.
pub const REPEAT_FOREVER: u8 = 0xFF;

/// Capacity of the playback table.
pub const PLAYBACK_LEN: usize = 50;

/// Source of the arbitrary waveform.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Default)]
pub enum ArbMode {
    /// Constant or ripple output.
    #[default]
    Off,
    /// Built-in sequence with this index.
    Rom(u8),
    /// Selected sequence of the uploadable buffer.
    Ram,
}

/// One breakpoint converted into the DAC code domain.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct Segment {
    pub code: u16,
    /// Zero terminates the table.
    pub duration_ms: u16,
}

impl Segment {
    pub const TERMINATOR: Segment = Segment {
        code: 0,
        duration_ms: 0,
    };
}

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct ArbConfig {
    pub active: bool,
    pub repeat: u8,
    pub delay_ms: u16,
}

impl ArbConfig {
    pub const OFF: ArbConfig = ArbConfig {
        active: false,
        repeat: REPEAT_FOREVER,
        delay_ms: 0,
    };
}

/// Published sequence in DAC codes. Written by the main loop, played by the interrupt.
pub struct PlaybackTable {
    segments: [SharedCell<Segment>; PLAYBACK_LEN],
    config: SharedCell<ArbConfig>,
    restart: SharedCell<bool>,
}

impl PlaybackTable {
    pub const fn new() -> Self {
        Self {
            segments: [const { SharedCell::new(Segment::TERMINATOR) }; PLAYBACK_LEN],
            config: SharedCell::new(ArbConfig::OFF),
            restart: SharedCell::new(false),
        }
    }

    /// Publish a new table.
    ///
    /// Every entry is published on its own. The last entry is always a terminator,
    /// so the interrupt never runs past the table, even while it is being rewritten.
    /// With `restart` the playback cursor starts over at the next service slot.
    pub fn publish(
        &self,
        m: &MainCtx<'_>,
        segments: impl Iterator<Item = Segment>,
        config: ArbConfig,
        restart: bool,
    ) {
        let mut segments = segments.fuse();
        let mut terminated = false;
        for (i, slot) in self.segments.iter().enumerate() {
            let seg = if terminated {
                Segment::TERMINATOR
            } else {
                match segments.next() {
                    Some(seg) if i < PLAYBACK_LEN - 1 && seg.duration_ms != 0 => seg,
                    Some(seg) => {
                        terminated = true;
                        Segment {
                            code: seg.code,
                            duration_ms: 0,
                        }
                    }
                    None => {
                        terminated = true;
                        Segment::TERMINATOR
                    }
                }
            };
            slot.set(m, seg);
        }
        m.critical(|cs| {
            self.config.set_cs(cs, config);
            if restart {
                self.restart.set_cs(cs, true);
            }
        });
    }

    pub fn set_config(&self, m: &MainCtx<'_>, config: ArbConfig, restart: bool) {
        m.critical(|cs| {
            self.config.set_cs(cs, config);
            if restart {
                self.restart.set_cs(cs, true);
            }
        });
    }

    pub fn config(&self, m: &MainCtx<'_>) -> ArbConfig {
        self.config.get(m)
    }

    #[inline(always)]
    pub fn config_irq(&self, c: &IrqCtx<'_>) -> ArbConfig {
        self.config.get_irq(c)
    }

    #[inline(always)]
    pub fn take_restart_irq(&self, c: &IrqCtx<'_>) -> bool {
        self.restart.replace_irq(c, false)
    }

    #[inline(always)]
    pub fn segment_irq(&self, c: &IrqCtx<'_>, index: usize) -> Segment {
        self.segments[index.min(PLAYBACK_LEN - 1)].get_irq(c)
    }

    pub fn segment(&self, m: &MainCtx<'_>, index: usize) -> Segment {
        self.segments[index.min(PLAYBACK_LEN - 1)].get(m)
    }
}

impl Default for PlaybackTable {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of the playback cursor.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct Cursor {
    pub index: usize,
    pub elapsed_ms: u16,
    pub delay_ms: u16,
    pub repeats: u8,
}

/// Playback cursor, owned by the multiplexer interrupt.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct Sequencer {
    cursor: Cursor,
    /// Last output code. Held during the post delay and while halted.
    hold: u16,
    /// The cursor has moved since the last restart.
    started: bool,
}

impl Sequencer {
    pub const fn new() -> Self {
        Self {
            cursor: Cursor {
                index: 0,
                elapsed_ms: 0,
                delay_ms: 0,
                repeats: 0,
            },
            hold: 0,
            started: false,
        }
    }

    #[inline]
    pub fn cursor(&self) -> Cursor {
        self.cursor
    }

    /// Start over at the first breakpoint. The held output code is kept.
    pub fn restart(&mut self, config: &ArbConfig) {
        self.cursor = Cursor {
            index: 0,
            elapsed_ms: 0,
            delay_ms: 0,
            repeats: config.repeat,
        };
        self.started = false;
    }

    /// Set the code that is held until the playback produces its own.
    ///
    /// Called with the code actually output while no sequence plays.
    #[inline]
    pub fn seed(&mut self, code: u16) {
        self.hold = code;
    }

    /// Compute the code for this service slot and advance by `step_ms`.
    pub fn next(&mut self, segment: impl Fn(usize) -> Segment, config: &ArbConfig, step_ms: u16) -> u16 {
        let cur = &mut self.cursor;
        let seg = segment(cur.index);

        if cur.repeats == 0 {
            // Halted. Without any playback since the restart the first level is output.
            return if self.started { self.hold } else { seg.code };
        }
        self.started = true;

        let out;
        if seg.duration_ms == 0 {
            // The table starts with a terminator. Hold the previous code for
            // this slot, then output the terminator level steadily.
            out = self.hold;
            self.hold = seg.code;
            cur.index = 0;
            cur.elapsed_ms = 0;
            return out;
        } else if cur.delay_ms > 0 {
            cur.delay_ms = cur.delay_ms.saturating_sub(step_ms);
            out = self.hold;
        } else {
            let next = segment(cur.index + 1);
            let span = next.code as i32 - seg.code as i32;
            let code = seg.code as i32 + span * cur.elapsed_ms as i32 / seg.duration_ms as i32;
            out = code as u16;
            self.hold = out;
            cur.elapsed_ms = cur.elapsed_ms.saturating_add(step_ms);

            // Consume whole segments and carry the remainder into the next one.
            loop {
                let dur = segment(cur.index).duration_ms;
                if cur.elapsed_ms < dur {
                    break;
                }
                cur.elapsed_ms -= dur;
                cur.index += 1;
                let seg = segment(cur.index);
                if seg.duration_ms == 0 {
                    self.hold = seg.code;
                    cur.index = 0;
                    cur.elapsed_ms = 0;
                    cur.delay_ms = config.delay_ms;
                    if cur.repeats != REPEAT_FOREVER {
                        cur.repeats -= 1;
                    }
                    break;
                }
            }
        }
        out
    }
}

impl Default for Sequencer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::mutex::test::{irq_ctx, main_ctx};
    use std::vec::Vec;

    fn table(segs: &[(u16, u16)]) -> Vec<Segment> {
        let mut t: Vec<Segment> = segs
            .iter()
            .map(|&(code, duration_ms)| Segment { code, duration_ms })
            .collect();
        t.resize(PLAYBACK_LEN, Segment::TERMINATOR);
        t
    }

    fn config(repeat: u8, delay_ms: u16) -> ArbConfig {
        ArbConfig {
            active: true,
            repeat,
            delay_ms,
        }
    }

    /// Codes of the ISO4 pulse at 12 V with 1 mV per LSB.
    fn iso4_table() -> Vec<Segment> {
        table(&[
            (12000, 200),
            (12000, 20),
            (5000, 50),
            (5000, 10),
            (8000, 100),
            (8000, 20),
            (12000, 0),
        ])
    }

    #[test]
    fn test_breakpoints_exact() {
        let t = iso4_table();
        let cfg = config(REPEAT_FOREVER, 0);
        let mut s = Sequencer::new();
        s.restart(&cfg);

        let period: u32 = 200 + 20 + 50 + 10 + 100 + 20;
        let mut wraps = 0;
        let mut prev_index = 0;
        for _ in 0..(2 * period) {
            let cur = s.cursor();
            let out = s.next(|i| t[i], &cfg, 1);
            if cur.elapsed_ms == 0 {
                // No interpolation error at a breakpoint.
                assert_eq!(out, t[cur.index].code);
            }
            if s.cursor().index < prev_index {
                // Back to the start after the terminator.
                assert_eq!(s.cursor().index, 0);
                assert_eq!(s.cursor().elapsed_ms, 0);
                wraps += 1;
            }
            prev_index = s.cursor().index;
        }
        assert_eq!(wraps, 2);
        assert_eq!(s.cursor().repeats, REPEAT_FOREVER);
    }

    #[test]
    fn test_interpolation() {
        let t = table(&[(1000, 10), (2000, 0)]);
        let cfg = config(REPEAT_FOREVER, 0);
        let mut s = Sequencer::new();
        s.restart(&cfg);
        let out: Vec<u16> = (0..12).map(|_| s.next(|i| t[i], &cfg, 1)).collect();
        assert_eq!(
            out,
            [1000, 1100, 1200, 1300, 1400, 1500, 1600, 1700, 1800, 1900, 1000, 1100]
        );

        // Falling ramp with 2 ms steps.
        let t = table(&[(2000, 4), (1000, 0)]);
        let mut s = Sequencer::new();
        s.restart(&cfg);
        let out: Vec<u16> = (0..4).map(|_| s.next(|i| t[i], &cfg, 2)).collect();
        assert_eq!(out, [2000, 1500, 2000, 1500]);
    }

    #[test]
    fn test_remainder_carry() {
        // 1 ms segments played with 2 ms steps skip every other breakpoint.
        let t = table(&[(100, 1), (200, 1), (300, 1), (400, 1), (0, 0)]);
        let cfg = config(REPEAT_FOREVER, 0);
        let mut s = Sequencer::new();
        s.restart(&cfg);
        let out: Vec<u16> = (0..4).map(|_| s.next(|i| t[i], &cfg, 2)).collect();
        assert_eq!(out, [100, 300, 100, 300]);
    }

    #[test]
    fn test_repeat_and_delay() {
        let t = table(&[(1000, 2), (3000, 2), (2000, 0)]);
        let cfg = config(2, 3);
        let mut s = Sequencer::new();
        s.restart(&cfg);
        let out: Vec<u16> = (0..16).map(|_| s.next(|i| t[i], &cfg, 1)).collect();
        assert_eq!(
            out,
            [
                // First run.
                1000, 2000, 3000, 2500,
                // Post delay holds the end level.
                2000, 2000, 2000,
                // Second run.
                1000, 2000, 3000, 2500,
                // Halted on the end level.
                2000, 2000, 2000, 2000, 2000,
            ]
        );
        assert_eq!(s.cursor().repeats, 0);

        // A new repeat count resumes playback.
        let cfg = config(1, 0);
        s.restart(&cfg);
        assert_eq!(s.next(|i| t[i], &cfg, 1), 1000);
    }

    #[test]
    fn test_zero_repeat_holds() {
        let t = table(&[(1000, 2), (3000, 0)]);
        let cfg = config(0, 0);
        let mut s = Sequencer::new();
        s.seed(4321);
        s.restart(&cfg);
        // Halted from the start: the first level, not the seeded code.
        assert_eq!(s.next(|i| t[i], &cfg, 1), 1000);
        assert_eq!(s.next(|i| t[i], &cfg, 1), 1000);
        assert_eq!(s.cursor().index, 0);
    }

    #[test]
    fn test_single_breakpoint() {
        // The table starts with the terminator.
        let t = table(&[(1234, 0)]);
        let cfg = config(REPEAT_FOREVER, 0);
        let mut s = Sequencer::new();
        s.restart(&cfg);
        s.seed(777);
        // Previous code for one slot, then the level steadily.
        assert_eq!(s.next(|i| t[i], &cfg, 2), 777);
        for _ in 0..10 {
            assert_eq!(s.next(|i| t[i], &cfg, 2), 1234);
        }
        assert_eq!(s.cursor().index, 0);
    }

    #[test]
    fn test_table_publish() {
        let m = main_ctx();
        let c = irq_ctx();
        let pt = PlaybackTable::new();

        let segs = (0..80).map(|i| Segment {
            code: i,
            duration_ms: 5,
        });
        pt.publish(&m, segs, config(3, 7), true);
        // Too long: cut and terminated in the last entry.
        assert_eq!(pt.segment(&m, PLAYBACK_LEN - 2).duration_ms, 5);
        assert_eq!(
            pt.segment(&m, PLAYBACK_LEN - 1),
            Segment {
                code: (PLAYBACK_LEN - 1) as u16,
                duration_ms: 0
            }
        );
        assert!(pt.take_restart_irq(&c));
        assert!(!pt.take_restart_irq(&c));
        assert_eq!(pt.config_irq(&c), config(3, 7));

        // A shorter table clears the rest.
        let segs = [
            Segment {
                code: 5,
                duration_ms: 1,
            },
            Segment {
                code: 6,
                duration_ms: 0,
            },
            Segment {
                code: 7,
                duration_ms: 3,
            },
        ];
        pt.publish(&m, segs.into_iter(), config(3, 7), false);
        assert!(!pt.take_restart_irq(&c));
        assert_eq!(pt.segment_irq(&c, 1), segs[1]);
        assert_eq!(pt.segment_irq(&c, 2), Segment::TERMINATOR);
        assert_eq!(pt.segment_irq(&c, PLAYBACK_LEN - 2), Segment::TERMINATOR);
    }
}

// vim: ts=4 sw=4 expandtab
