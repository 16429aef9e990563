//! BITalino EOG acquisition driver and record format.
//!
//! This crate talks to a BITalino biosignal board over a serial link, streams
//! two analog channels (horizontal and vertical electro-oculography) and
//! stores them in a compact big-endian record file.
//!
//! # Acquisition flow
//!
//! 1. Open the device with [`Bitalino::open`] (or [`Bitalino::attach`] a transport)
//! 2. [`Bitalino::initialize`] detects the firmware and records the EOG channels
//! 3. [`Bitalino::start`], then repeatedly [`Bitalino::read`] batches and
//!    append them with [`Record::add_samples`]
//! 4. [`Bitalino::stop`], [`Record::close`], [`Bitalino::close`]
//!
//! Frames that fail their checksum are kept in the stream as
//! [`Sample::INVALID`] so indices stay aligned with time.

mod bitalino;
mod config;
mod crc;
mod errors;
pub mod logging;
pub mod record;
mod sample;
pub mod serial;

#[cfg(test)]
mod mock;

pub use bitalino::{
    available_channels, battery_percent, channel_command, Bitalino, DeviceStatus, DriverState,
    EogChannels, Firmware, OperatingState, SamplingRate, StatusLayout, StopOutcome,
    BATTERY_MAX_VALUE, BATTERY_MIN_VALUE,
};
pub use config::DeviceConfig;
pub use crc::{crc, verify_packet};
pub use errors::*;
pub use record::Record;
pub use sample::Sample;
pub use serial::{list_ports, Transport};
