/// Errors reported to the command and parameter layer.
///
/// A call that returns an error did not change any state.
#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error("Sequence load or storage operation already in progress")]
    LoadBusy,
    #[error("No sequence load in progress")]
    NotLoading,
    #[error("Range index {0} out of bounds")]
    RangeOutOfBounds(u8),
    #[error("Sequence index {0} out of bounds")]
    SequenceOutOfBounds(u8),
    #[error("Persistent storage is not initialized")]
    StorageUninitialized,
    #[error("Persistent storage access failed")]
    Storage,
}

// vim: ts=4 sw=4 expandtab
