//! BITalino device driver for EOG acquisition.
//!
//! The driver owns the connection and a [`DriverState`] describing where the
//! device is in its `Disconnected -> Idle -> Recording` lifecycle. Every
//! operation checks that state before touching the wire, so a rejected call
//! never sends a byte.
//!
//! Two horizontal/vertical analog channels are streamed as 4-byte frames:
//!
//! ```text
//! byte 0: V7 V6 V5 V4 V3 V2 V1 V0
//! byte 1: H5 H4 H3 H2 H1 H0 V9 V8
//! byte 2: D  D  D  D  H9 H8 H7 H6
//! byte 3: S  S  S  S  C  C  C  C     (sequence, checksum)
//! ```
//!
//! A frame whose checksum does not match is reported as [`Sample::INVALID`]
//! rather than failing the whole batch.

use std::fmt;
use std::thread;
use std::time::Duration;

use log::{debug, info, warn};

use crate::config::{DeviceConfig, DEFAULT_COMMAND_DELAY_MS};
use crate::crc;
use crate::errors::{DriverError, Result};
use crate::sample::Sample;
use crate::serial::{self, Transport};

// ============================================================================
// Constants
// ============================================================================

// BITalino protocol commands
const CMD_STOP: u8 = 0x00;
const CMD_VERSION: u8 = 0x07;
const CMD_STATUS: u8 = 0x0B;
const CMD_RESET: u8 = 0xFF;

/// Raw battery reading treated as empty. Also the threshold set on initialize.
pub const BATTERY_MIN_VALUE: u16 = 30;
/// Raw battery reading treated as full.
pub const BATTERY_MAX_VALUE: u16 = 650;

const MAX_BATTERY_THRESHOLD: u8 = 63;
const MAX_ACTIVE_CHANNELS: usize = 4;
const MAX_CHANNEL_ID: u8 = 5;
const FRAME_SIZE: usize = 4;
/// Upper bound on the frames reserved up front by `read()`.
const READ_PREALLOC_FRAMES: usize = 4096;

// ============================================================================
// Data Types
// ============================================================================

/// Supported sampling rates for BITalino acquisition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SamplingRate {
    Hz1 = 1,
    Hz10 = 10,
    Hz100 = 100,
    #[default]
    Hz1000 = 1000,
}

impl SamplingRate {
    pub const ALL: [SamplingRate; 4] = [
        SamplingRate::Hz1,
        SamplingRate::Hz10,
        SamplingRate::Hz100,
        SamplingRate::Hz1000,
    ];

    /// Set-rate command byte.
    pub fn opcode(self) -> u8 {
        match self {
            SamplingRate::Hz1 => 0x03,
            SamplingRate::Hz10 => 0x43,
            SamplingRate::Hz100 => 0x83,
            SamplingRate::Hz1000 => 0xC3,
        }
    }

    pub fn hz(self) -> u16 {
        self as u16
    }

    /// Parse a rate in Hz. Only the four device rates are accepted.
    pub fn from_u16_checked(value: u16) -> Result<Self> {
        SamplingRate::ALL
            .into_iter()
            .find(|rate| rate.hz() == value)
            .ok_or_else(|| {
                DriverError::InvalidArgument(format!(
                    "sampling rate {value} Hz is not supported (1, 10, 100, 1000)"
                ))
            })
    }
}

/// Where the driver is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OperatingState {
    #[default]
    Disconnected,
    Idle,
    Recording,
}

impl fmt::Display for OperatingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OperatingState::Disconnected => "disconnected",
            OperatingState::Idle => "idle",
            OperatingState::Recording => "recording",
        };
        f.write_str(name)
    }
}

/// Outcome of [`Bitalino::stop`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// Acquisition was running and has been stopped.
    Stopped,
    /// The device was already idle.
    AlreadyStopped,
}

/// Byte offsets of the status reply fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusLayout {
    pub len: usize,
    /// Little-endian A1..A6.
    pub analog: [usize; 6],
    /// Little-endian raw battery reading.
    pub battery: usize,
    pub threshold: usize,
    /// Digital flags in the high nibble, checksum in the low nibble.
    pub digital: usize,
}

/// Bit positions of I1, I2, O1, O2 in the digital byte.
const DIGITAL_BITS: [u8; 4] = [7, 6, 5, 4];

struct FirmwareProfile {
    status: StatusLayout,
    /// Send the reset opcode when `stop()` is called while already idle.
    reset_when_idle: bool,
}

static LEGACY_PROFILE: FirmwareProfile = FirmwareProfile {
    status: StatusLayout {
        len: 16,
        analog: [0, 2, 4, 6, 8, 10],
        battery: 12,
        threshold: 14,
        digital: 15,
    },
    reset_when_idle: true,
};

static V5_2_PROFILE: FirmwareProfile = FirmwareProfile {
    status: StatusLayout {
        len: 17,
        analog: [0, 2, 4, 6, 8, 10],
        battery: 12,
        threshold: 14,
        digital: 16,
    },
    reset_when_idle: false,
};

/// Firmware revisions with distinct wire behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Firmware {
    #[default]
    Legacy,
    V5_2,
}

impl Firmware {
    /// Classify the version token returned by [`Bitalino::version`].
    pub fn from_version(version: &str) -> Self {
        if version == "v5.2" {
            Firmware::V5_2
        } else {
            Firmware::Legacy
        }
    }

    pub fn status_layout(self) -> StatusLayout {
        self.profile().status
    }

    pub fn resets_when_idle(self) -> bool {
        self.profile().reset_when_idle
    }

    fn profile(self) -> &'static FirmwareProfile {
        match self {
            Firmware::Legacy => &LEGACY_PROFILE,
            Firmware::V5_2 => &V5_2_PROFILE,
        }
    }
}

/// Point-in-time device snapshot returned by [`Bitalino::status`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceStatus {
    /// Analog channel values A1-A6.
    pub analog: [u16; 6],
    /// Battery channel raw value.
    pub battery: u16,
    /// Current battery threshold setting (0-63).
    pub battery_threshold: u8,
    /// Digital channel states [I1, I2, O1, O2].
    pub digital: [u8; 4],
}

impl DeviceStatus {
    /// Remaining battery as a percentage of the usable range.
    pub fn battery_percent(&self) -> u8 {
        battery_percent(self.battery)
    }
}

/// Map a raw battery reading onto 0-100%.
///
/// Readings are clamped to `BATTERY_MIN_VALUE..=BATTERY_MAX_VALUE` first.
pub fn battery_percent(raw: u16) -> u8 {
    let clamped = raw.clamp(BATTERY_MIN_VALUE, BATTERY_MAX_VALUE);
    let span = f64::from(BATTERY_MAX_VALUE - BATTERY_MIN_VALUE);
    let percent = (f64::from(clamped - BATTERY_MIN_VALUE) / span * 100.0).round();
    percent as u8
}

/// Analog channels carrying the two EOG derivations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EogChannels {
    pub horizontal: u8,
    pub vertical: u8,
}

/// Everything the driver knows about the device, owned by [`Bitalino`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriverState {
    pub operating: OperatingState,
    /// Version token from the last successful `initialize()`.
    pub version: Option<String>,
    pub firmware: Firmware,
    pub channels: Option<EogChannels>,
    pub sampling_rate: SamplingRate,
    /// Index assigned to the next frame read.
    pub counter: u32,
}

impl DriverState {
    pub fn new(sampling_rate: SamplingRate) -> Self {
        Self {
            operating: OperatingState::Disconnected,
            version: None,
            firmware: Firmware::default(),
            channels: None,
            sampling_rate,
            counter: 0,
        }
    }

    /// Connected and not acquiring.
    pub fn ensure_idle(&self, operation: &'static str) -> Result<()> {
        self.ensure(operation, OperatingState::Idle)
    }

    pub fn ensure_recording(&self, operation: &'static str) -> Result<()> {
        self.ensure(operation, OperatingState::Recording)
    }

    pub fn ensure_connected(&self, operation: &'static str) -> Result<()> {
        if self.operating == OperatingState::Disconnected {
            return Err(self.rejected(operation));
        }
        Ok(())
    }

    fn ensure(&self, operation: &'static str, required: OperatingState) -> Result<()> {
        if self.operating != required {
            return Err(self.rejected(operation));
        }
        Ok(())
    }

    fn rejected(&self, operation: &'static str) -> DriverError {
        DriverError::InvalidState {
            operation,
            state: self.operating,
        }
    }
}

/// Build the channel-selection command byte.
///
/// Takes 1-4 distinct analog channel identifiers (0-5).
pub fn channel_command(channels: &[u8]) -> Result<u8> {
    if channels.is_empty() {
        return Err(DriverError::InvalidArgument(
            "at least one channel must be selected".into(),
        ));
    }
    if channels.len() > MAX_ACTIVE_CHANNELS {
        return Err(DriverError::InvalidArgument(format!(
            "at most {MAX_ACTIVE_CHANNELS} channels can be selected, got {}",
            channels.len()
        )));
    }

    let mut cmd: u8 = 0x01;
    for (i, &channel) in channels.iter().enumerate() {
        if channel > MAX_CHANNEL_ID {
            return Err(DriverError::InvalidArgument(format!(
                "channel {channel} out of range (0-{MAX_CHANNEL_ID})"
            )));
        }
        if channels[..i].contains(&channel) {
            return Err(DriverError::InvalidArgument(format!(
                "channel {channel} selected twice"
            )));
        }
        cmd |= 1 << (2 + channel);
    }
    Ok(cmd)
}

/// Analog channel identifiers accepted by [`Bitalino::set_channels`].
pub fn available_channels() -> Vec<u8> {
    (0..=MAX_CHANNEL_ID).collect()
}

// ============================================================================
// Bitalino Driver
// ============================================================================

/// BITalino device driver.
///
/// # Example
/// ```ignore
/// let mut device = Bitalino::open(&DeviceConfig::default())?;
/// device.initialize(1, 2)?;
/// device.start()?;
/// let samples = device.read(100)?;
/// device.stop()?;
/// device.close();
/// ```
pub struct Bitalino {
    transport: Option<Box<dyn Transport>>,
    state: DriverState,
    command_delay: Duration,
}

impl Bitalino {
    pub const NAME: &'static str = "BITalino";

    // ------------------------------------------------------------------------
    // Constructors
    // ------------------------------------------------------------------------

    /// Create a disconnected driver that will acquire at `sampling_rate`.
    pub fn new(sampling_rate: SamplingRate) -> Self {
        Self {
            transport: None,
            state: DriverState::new(sampling_rate),
            command_delay: Duration::from_millis(DEFAULT_COMMAND_DELAY_MS),
        }
    }

    /// Create a driver and connect it to the serial port named in `config`.
    pub fn open(config: &DeviceConfig) -> Result<Self> {
        let rate = SamplingRate::from_u16_checked(config.sampling_rate)?;
        let mut device = Self::new(rate).with_command_delay(config.command_delay());
        device.connect(&config.port, config.baud_rate)?;
        Ok(device)
    }

    /// Override the settle time applied after each command byte.
    pub fn with_command_delay(mut self, delay: Duration) -> Self {
        self.command_delay = delay;
        self
    }

    /// Open a serial port (8N1) and move to `Idle`.
    pub fn connect(&mut self, port: &str, baud_rate: u32) -> Result<()> {
        self.state.ensure("connect", OperatingState::Disconnected)?;
        let transport = serial::open(port, baud_rate)?;
        self.attach(transport)?;
        info!("connected: port={}, baud_rate={}", port, baud_rate);
        Ok(())
    }

    /// Use an already-open transport and move to `Idle`.
    pub fn attach<T: Transport + 'static>(&mut self, transport: T) -> Result<()> {
        self.state.ensure("attach", OperatingState::Disconnected)?;
        self.transport = Some(Box::new(transport));
        self.state.operating = OperatingState::Idle;
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------------

    pub fn state(&self) -> &DriverState {
        &self.state
    }

    pub fn operating_state(&self) -> OperatingState {
        self.state.operating
    }

    pub fn firmware(&self) -> Firmware {
        self.state.firmware
    }

    pub fn sampling_rate(&self) -> SamplingRate {
        self.state.sampling_rate
    }

    /// Change the rate applied by the next `start()`.
    pub fn configure_sample_rate(&mut self, rate: SamplingRate) -> Result<()> {
        if self.state.operating == OperatingState::Recording {
            return Err(self.state.rejected("configure sample rate"));
        }
        self.state.sampling_rate = rate;
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Device Commands
    // ------------------------------------------------------------------------

    /// Query the firmware version token (e.g. `"v5.2"` from `"BITalino_v5.2"`).
    pub fn version(&mut self) -> Result<String> {
        self.state.ensure_idle("query version")?;
        self.send_command(CMD_VERSION)?;
        let raw = self.transport_mut()?.recv_until(b'\n')?;
        let version = parse_version(&raw)?;
        debug!("device version: {}", version);
        Ok(version)
    }

    /// Read a status snapshot. The reply layout follows the detected firmware.
    ///
    /// # Errors
    /// Returns [`DriverError::Crc`] if the reply fails its checksum.
    pub fn status(&mut self) -> Result<DeviceStatus> {
        self.state.ensure_idle("query status")?;
        let layout = self.state.firmware.status_layout();
        self.send_command(CMD_STATUS)?;
        let packet = self.transport_mut()?.recv_exact(layout.len)?;
        debug!("status response raw data: {:02X?}", packet);
        let status = decode_status(&packet, &layout)?;
        debug!(
            "device status: analog={:?}, battery={}, threshold={}, digital={:?}",
            status.analog, status.battery, status.battery_threshold, status.digital
        );
        Ok(status)
    }

    /// Battery charge in percent, derived from a fresh status snapshot.
    pub fn battery(&mut self) -> Result<u8> {
        self.state.ensure_idle("query battery")?;
        Ok(self.status()?.battery_percent())
    }

    /// Send the set-rate command for `rate` Hz (1, 10, 100 or 1000).
    pub fn set_sample_rate(&mut self, rate: u16) -> Result<()> {
        self.state.ensure_idle("set sample rate")?;
        let rate = SamplingRate::from_u16_checked(rate)?;
        self.send_single(rate.opcode())?;
        debug!("sampling rate set: rate={}Hz", rate.hz());
        Ok(())
    }

    /// Select 1-4 distinct analog channels (0-5) for acquisition.
    pub fn set_channels(&mut self, channels: &[u8]) -> Result<()> {
        self.state.ensure_idle("set channels")?;
        let cmd = channel_command(channels)?;
        self.send_single(cmd)?;
        debug!("channels set: channels={:?}, cmd={:#04X}", channels, cmd);
        Ok(())
    }

    /// Set the battery threshold level (0-63).
    ///
    /// When battery voltage drops below this threshold, the device LED will blink.
    pub fn set_battery_threshold(&mut self, threshold: u8) -> Result<()> {
        self.state.ensure_connected("set battery threshold")?;
        if threshold > MAX_BATTERY_THRESHOLD {
            return Err(DriverError::InvalidArgument(format!(
                "battery threshold {threshold} out of range (0-{MAX_BATTERY_THRESHOLD})"
            )));
        }
        // Command format: <threshold (6 bits)> 0 0
        self.send_command(threshold << 2)?;
        debug!("battery threshold set: threshold={}", threshold);
        Ok(())
    }

    /// Handshake with the device: detect firmware and arm the battery threshold.
    ///
    /// The channels, version and firmware are only recorded once every step
    /// has succeeded.
    pub fn initialize(&mut self, horizontal_channel: u8, vertical_channel: u8) -> Result<()> {
        self.state.ensure_idle("initialize")?;

        let version = self.version()?;
        let firmware = Firmware::from_version(&version);
        self.set_battery_threshold(BATTERY_MIN_VALUE as u8)?;

        self.state.channels = Some(EogChannels {
            horizontal: horizontal_channel,
            vertical: vertical_channel,
        });
        self.state.firmware = firmware;
        self.state.version = Some(version);

        info!(
            "initialized {}: version={:?}, firmware={:?}, horizontal={}, vertical={}",
            Self::NAME,
            self.state.version,
            firmware,
            horizontal_channel,
            vertical_channel
        );
        Ok(())
    }

    /// Apply the configured rate and EOG channels, then start streaming.
    ///
    /// The frame counter restarts at zero. On failure the driver stays idle
    /// and keeps its previous counter.
    pub fn start(&mut self) -> Result<()> {
        self.state.ensure_idle("start")?;
        let channels = self.state.channels.ok_or_else(|| {
            DriverError::InvalidArgument("channels not configured, call initialize() first".into())
        })?;

        let rate = self.state.sampling_rate;
        self.set_sample_rate(rate.hz())?;
        self.set_channels(&[channels.horizontal, channels.vertical])?;

        self.state.counter = 0;
        self.state.operating = OperatingState::Recording;
        info!(
            "started acquisition: rate={}Hz, horizontal={}, vertical={}",
            rate.hz(),
            channels.horizontal,
            channels.vertical
        );
        Ok(())
    }

    /// Stop data acquisition.
    ///
    /// When already idle, firmware other than v5.2 is sent a reset byte.
    pub fn stop(&mut self) -> Result<StopOutcome> {
        match self.state.operating {
            OperatingState::Disconnected => Err(self.state.rejected("stop")),
            OperatingState::Recording => {
                self.send_command(CMD_STOP)?;
                self.state.operating = OperatingState::Idle;
                info!("stopped acquisition: frames={}", self.state.counter);
                Ok(StopOutcome::Stopped)
            }
            OperatingState::Idle => {
                if self.state.firmware.resets_when_idle() {
                    self.send_command(CMD_RESET)?;
                    debug!("already stopped, reset sent: firmware={:?}", self.state.firmware);
                }
                Ok(StopOutcome::AlreadyStopped)
            }
        }
    }

    /// Read `n` frames.
    ///
    /// Frames failing their checksum come back as [`Sample::INVALID`]; the
    /// frame counter advances for every frame either way. Transport errors
    /// abort the batch.
    pub fn read(&mut self, n: usize) -> Result<Vec<Sample>> {
        self.state.ensure_recording("read")?;

        let mut samples = Vec::with_capacity(n.min(READ_PREALLOC_FRAMES));
        let mut frame = [0u8; FRAME_SIZE];
        let mut crc_errors = 0usize;

        for _ in 0..n {
            self.transport_mut()?.recv_into(&mut frame)?;
            let sample = decode_frame(&frame, self.state.counter);
            if !sample.is_valid() {
                crc_errors += 1;
            }
            samples.push(sample);
            self.state.counter = self.state.counter.wrapping_add(1);
        }

        if crc_errors > 0 {
            warn!(
                "CRC errors in batch: {} of {} frames (suppressing per-frame logs)",
                crc_errors, n
            );
        }
        Ok(samples)
    }

    /// Stop if recording (best effort) and release the transport.
    pub fn close(&mut self) {
        if self.state.operating == OperatingState::Recording {
            if let Err(e) = self.stop() {
                warn!("stop during close failed: {}", e);
            }
        }
        if self.transport.take().is_some() {
            info!("connection closed");
        }
        self.state = DriverState::new(self.state.sampling_rate);
    }

    // ------------------------------------------------------------------------
    // Internal Methods
    // ------------------------------------------------------------------------

    fn transport_mut(&mut self) -> Result<&mut (dyn Transport + 'static)> {
        let state = self.state.operating;
        self.transport.as_deref_mut().ok_or(DriverError::InvalidState {
            operation: "communicate",
            state,
        })
    }

    /// Send a command byte, returning how many bytes the transport accepted.
    fn send_command(&mut self, cmd: u8) -> Result<usize> {
        let sent = self.transport_mut()?.send(&[cmd])?;
        if !self.command_delay.is_zero() {
            thread::sleep(self.command_delay);
        }
        Ok(sent)
    }

    /// Send a command byte that must be accepted in full.
    fn send_single(&mut self, cmd: u8) -> Result<()> {
        let sent = self.send_command(cmd)?;
        if sent != 1 {
            return Err(DriverError::Protocol(format!(
                "command {cmd:#04X}: transport accepted {sent} bytes"
            )));
        }
        Ok(())
    }
}

// ============================================================================
// Decoding
// ============================================================================

fn parse_version(raw: &[u8]) -> Result<String> {
    let text = String::from_utf8_lossy(raw);
    text.split('_')
        .nth(1)
        .map(|token| token.trim_matches(|c: char| c.is_whitespace() || c == '\0'))
        .filter(|token| !token.is_empty())
        .map(str::to_owned)
        .ok_or_else(|| DriverError::Protocol(format!("malformed version reply: {:?}", text)))
}

fn decode_status(packet: &[u8], layout: &StatusLayout) -> Result<DeviceStatus> {
    if packet.len() != layout.len {
        return Err(DriverError::Protocol(format!(
            "status reply has {} bytes, expected {}",
            packet.len(),
            layout.len
        )));
    }
    if !crc::verify_packet(packet) {
        return Err(DriverError::Crc);
    }

    let le16 = |offset: usize| u16::from_le_bytes([packet[offset], packet[offset + 1]]);
    let flags = packet[layout.digital];

    Ok(DeviceStatus {
        analog: layout.analog.map(le16),
        battery: le16(layout.battery),
        battery_threshold: packet[layout.threshold],
        digital: DIGITAL_BITS.map(|bit| (flags >> bit) & 0x01),
    })
}

fn decode_frame(frame: &[u8; FRAME_SIZE], index: u32) -> Sample {
    if !crc::verify_packet(frame) {
        return Sample::INVALID;
    }
    let horizontal = (u32::from(frame[2] & 0x0F) << 6) | u32::from(frame[1] >> 2);
    let vertical = (u32::from(frame[1] & 0x03) << 8) | u32::from(frame[0]);
    Sample::new(index, horizontal, vertical)
}
