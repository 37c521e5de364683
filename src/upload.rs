//! Upload protocol of the sequence buffer.
//!
//! The command layer writes a sequence breakpoint by breakpoint:
//!
//! ```text
//! begin
//! push_level, push_duration    (once per breakpoint)
//! finalize
//! ```
//!
//! `persist` and `recall` queue a transfer between the buffer and persistent
//! storage. The transfer itself runs later in the cooperative storage job.
//! Only one operation can be in flight at a time.

use crate::{
    error::Error,
    params::clamp_f32,
    sequence::{Breakpoint, RAM_SEQUENCE_LEN, RamSequence, SequenceStore},
};

/// Persistent storage slot of the sequence buffer.
pub const SEQUENCE_SLOT: u8 = 0;

/// Longest breakpoint duration accepted from the command layer.
pub const DURATION_MAX_MS: u16 = 65000;

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum LoadState {
    Idle,
    Loading,
    /// Write to persistent storage is queued.
    Persisting,
    /// Read from persistent storage is queued.
    Recalling,
}

/// Completed storage job.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum StorageDone {
    Persisted,
    Recalled,
}

#[derive(Copy, Clone, PartialEq, Debug)]
pub struct Loader {
    state: LoadState,
    /// Write cursor into the sequence buffer.
    index: usize,
    /// Level written for the breakpoint at `index` that has no duration yet.
    pending_level: Option<f32>,
}

impl Loader {
    pub const fn new() -> Self {
        Self {
            state: LoadState::Idle,
            index: 0,
            pending_level: None,
        }
    }

    #[inline]
    pub fn state(&self) -> LoadState {
        self.state
    }

    fn busy_error(&self) -> Error {
        match self.state {
            LoadState::Idle => Error::NotLoading,
            _ => Error::LoadBusy,
        }
    }

    fn expect_idle(&self) -> Result<(), Error> {
        match self.state {
            LoadState::Idle => Ok(()),
            _ => Err(Error::LoadBusy),
        }
    }

    fn expect_loading(&self) -> Result<(), Error> {
        match self.state {
            LoadState::Loading => Ok(()),
            _ => Err(self.busy_error()),
        }
    }

    /// Start a new upload. Resets the write cursor.
    pub fn begin(&mut self) -> Result<(), Error> {
        self.expect_idle()?;
        self.state = LoadState::Loading;
        self.index = 0;
        self.pending_level = None;
        log::debug!("sequence upload started");
        Ok(())
    }

    /// Level of the next breakpoint, clamped to 0.0 ..= 1.0.
    pub fn push_level(&mut self, level: f32) -> Result<(), Error> {
        self.expect_loading()?;
        self.pending_level = Some(clamp_f32(level, 0.0, 1.0));
        Ok(())
    }

    /// Duration of the next breakpoint. Completes the breakpoint.
    ///
    /// Without a preceding level the breakpoint gets level 1.0.
    /// Breakpoints beyond the buffer capacity are dropped.
    pub fn push_duration(&mut self, ram: &mut RamSequence, duration_ms: u16) -> Result<(), Error> {
        self.expect_loading()?;
        let level = self.pending_level.take().unwrap_or(1.0);
        if self.index < RAM_SEQUENCE_LEN {
            ram.entries_mut()[self.index] = Breakpoint::new(level, duration_ms.min(DURATION_MAX_MS));
            self.index += 1;
        }
        Ok(())
    }

    /// Finish the upload.
    ///
    /// A level without duration is dropped. The sequence is terminated and
    /// the remaining buffer is padded with default breakpoints.
    pub fn finalize(&mut self, ram: &mut RamSequence) -> Result<(), Error> {
        self.expect_loading()?;
        if self.pending_level.take().is_some() {
            log::debug!("sequence upload: dropped unpaired level");
        }

        let entries = ram.entries_mut();
        for entry in entries[self.index..].iter_mut() {
            *entry = Breakpoint::DEFAULT;
        }
        if self.index == RAM_SEQUENCE_LEN {
            entries[RAM_SEQUENCE_LEN - 1].duration_ms = 0;
        }

        log::debug!("sequence upload finished: {} breakpoints", self.index);
        self.state = LoadState::Idle;
        self.index = 0;
        Ok(())
    }

    /// Queue writing the sequence buffer to persistent storage.
    pub fn persist(&mut self) -> Result<(), Error> {
        self.expect_idle()?;
        self.state = LoadState::Persisting;
        Ok(())
    }

    /// Queue reading the sequence buffer from persistent storage.
    pub fn recall(&mut self) -> Result<(), Error> {
        self.expect_idle()?;
        self.state = LoadState::Recalling;
        Ok(())
    }

    /// Run a queued storage transfer.
    ///
    /// Returns `None`, if nothing was queued.
    /// The loader is idle afterwards, even if the transfer failed.
    /// A failed recall leaves the buffer unchanged.
    pub fn service(
        &mut self,
        ram: &mut RamSequence,
        store: &mut impl SequenceStore,
    ) -> Option<Result<StorageDone, Error>> {
        let result = match self.state {
            LoadState::Idle | LoadState::Loading => return None,
            LoadState::Persisting => store
                .write_sequence(SEQUENCE_SLOT, ram.entries())
                .map(|()| StorageDone::Persisted),
            LoadState::Recalling => {
                let mut buf = [Breakpoint::DEFAULT; RAM_SEQUENCE_LEN];
                store.read_sequence(SEQUENCE_SLOT, &mut buf).map(|()| {
                    sanitize(&mut buf);
                    *ram.entries_mut() = buf;
                    StorageDone::Recalled
                })
            }
        };
        self.state = LoadState::Idle;
        match &result {
            Ok(done) => log::info!("sequence storage: {done:?}"),
            Err(e) => log::info!("sequence storage failed: {e}"),
        }
        Some(result)
    }
}

impl Default for Loader {
    fn default() -> Self {
        Self::new()
    }
}

/// Restore the buffer invariants on data from storage.
fn sanitize(buf: &mut [Breakpoint; RAM_SEQUENCE_LEN]) {
    for entry in buf.iter_mut() {
        entry.level = clamp_f32(entry.level, 0.0, 1.0);
        entry.duration_ms = entry.duration_ms.min(DURATION_MAX_MS);
    }
    buf[RAM_SEQUENCE_LEN - 1].duration_ms = 0;
}


// vim: ts=4 sw=4 expandtab
