//! Real time output core of one DCG bench power supply channel.
//!
//! The crate drives the voltage and current DACs of one channel from a
//! 500 us multiplexer interrupt, samples the external ADC, plays arbitrary
//! waveform sequences and ripple, and supervises the input rail relays
//! and the channel faults from cooperative main loop jobs.
//!
//! The hardware is reached through the traits in [hw].
//! [Dcg] ties everything together.

#![cfg_attr(not(test), no_std)]

pub mod arb;
pub mod debounce;
pub mod error;
pub mod fault;
pub mod filter;
pub mod hw;
pub mod measure;
pub mod mutex;
pub mod mux;
pub mod params;
pub mod range;
pub mod relay;
pub mod ripple;
pub mod scale;
pub mod sequence;
pub mod system;
pub mod timer;
pub mod upload;

pub use crate::{
    error::Error,
    hw::{AnalogIn, Capability, Channel, OutputHw, RelayPort},
    mutex::{IrqCtx, MainCtx},
    params::{ParamStore, Params},
    sequence::SequenceStore,
    system::Dcg,
};

// vim: ts=4 sw=4 expandtab
