//! Device I/O boundary.
//!
//! The kernel IIO layer (sysfs attributes plus a scan-buffer character
//! device) is a collaborator, not part of the engine. [`IioDevice`] is
//! its published shape; the engine drives it and decodes its scan
//! records, nothing more. [`MockIioDevice`] is the deterministic
//! in-memory implementation the tests run against.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};

use hal_types::{Duration, SensorKind, Timestamp};

use crate::error::HalError;
use crate::Result;

/// Layout of one channel inside a packed scan record.
///
/// Mirrors the kernel's `scan_elements` description: a fixed-width field
/// with a used-bit count, right shift, signedness, endianness, and an
/// affine (offset, scale) pair applied after extraction.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelSpec {
    /// Channel name, e.g. `in_accel_x`.
    pub name: String,
    /// Field width in bytes: 1, 2, 4, or 8.
    pub bytes: u8,
    /// Bits of the field actually carrying data.
    pub bits_used: u8,
    /// Right shift applied after endianness conversion.
    pub shift: u8,
    /// Whether the extracted value is two's-complement signed.
    pub signed: bool,
    /// Whether the field is big-endian on the wire.
    pub big_endian: bool,
    /// Offset added to the raw value before scaling.
    pub offset: f32,
    /// Scale multiplied after the offset.
    pub scale: f32,
}

impl ChannelSpec {
    /// Creates a little-endian signed 16-bit channel, the common MEMS case.
    #[must_use]
    pub fn le16(name: impl Into<String>, scale: f32) -> Self {
        Self {
            name: name.into(),
            bytes: 2,
            bits_used: 16,
            shift: 0,
            signed: true,
            big_endian: false,
            offset: 0.0,
            scale,
        }
    }

    /// Decodes this channel from its field bytes.
    ///
    /// Performs endianness conversion, shift, masking to the used bit
    /// count, two's-complement sign extension, then the affine transform
    /// `(raw + offset) * scale`.
    ///
    /// # Errors
    ///
    /// Returns [`HalError::DeviceIo`] when `field` is shorter than the
    /// declared byte width or the width is unsupported.
    pub fn decode(&self, field: &[u8]) -> Result<f32> {
        let width = self.bytes as usize;
        if field.len() < width {
            return Err(HalError::device_io(format!(
                "channel '{}': field has {} bytes, expected {}",
                self.name,
                field.len(),
                width
            )));
        }

        let mut raw: u64 = 0;
        if self.big_endian {
            for byte in &field[..width] {
                raw = (raw << 8) | u64::from(*byte);
            }
        } else {
            for byte in field[..width].iter().rev() {
                raw = (raw << 8) | u64::from(*byte);
            }
        }

        if !matches!(width, 1 | 2 | 4 | 8) {
            return Err(HalError::device_io(format!(
                "channel '{}': unsupported width {width}",
                self.name
            )));
        }

        raw >>= self.shift;
        let bits = u32::from(self.bits_used.min(64));
        if bits < 64 {
            raw &= (1u64 << bits) - 1;
        }

        #[allow(clippy::cast_precision_loss, clippy::cast_possible_wrap)]
        let value = if self.signed && bits > 0 && bits < 64 && (raw >> (bits - 1)) & 1 == 1 {
            // Two's-complement sign extension.
            (raw as i64 - (1i64 << bits)) as f32
        } else {
            raw as f32
        };

        Ok((value + self.offset) * self.scale)
    }
}

/// One packed scan record read from a device buffer.
#[derive(Debug, Clone, PartialEq)]
pub struct RawScan {
    /// Channel-packed payload; fields laid out in channel order.
    pub bytes: Vec<u8>,
    /// Hardware FIFO timestamp of the record.
    pub timestamp: Timestamp,
}

/// Outcome of a device self-test command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelfTestOutcome {
    /// The device passed its self-test.
    Passed,
    /// The device failed its self-test.
    Failed,
    /// The driver exposes no self-test command.
    NotSupported,
}

/// The opaque driver I/O interface.
///
/// One instance per discovered IIO device. All methods are callable from
/// any thread; blocking is confined to [`IioDevice::read_scan`].
pub trait IioDevice: Send + Sync {
    /// Quantity this device reports.
    fn kind(&self) -> SensorKind;
    /// Device name from the driver.
    fn name(&self) -> &str;
    /// Module id grouping co-packaged devices.
    fn module_id(&self) -> u16;
    /// Scan-element layout, in payload order.
    fn channels(&self) -> Vec<ChannelSpec>;
    /// Supported sampling frequencies in Hz, ascending.
    fn available_rates_hz(&self) -> Vec<f32>;
    /// Largest representable value.
    fn max_range(&self) -> f32;
    /// Smallest distinguishable value change.
    fn resolution(&self) -> f32;
    /// Streaming current draw in mA.
    fn power_ma(&self) -> f32;
    /// Hardware FIFO capacity in samples (0 = no FIFO).
    fn fifo_max(&self) -> u32;
    /// FIFO slots reserved for this device.
    fn fifo_reserved(&self) -> u32 {
        0
    }

    /// Enables or disables the device buffer.
    ///
    /// # Errors
    ///
    /// Returns [`HalError::DeviceIo`] on a failed driver write.
    fn set_enabled(&self, on: bool) -> Result<()>;

    /// Writes the sampling frequency.
    ///
    /// # Errors
    ///
    /// Returns [`HalError::DeviceIo`] on a failed driver write.
    fn set_rate_hz(&self, hz: f64) -> Result<()>;

    /// Writes the FIFO watermark.
    ///
    /// # Errors
    ///
    /// Returns [`HalError::DeviceIo`] on a failed driver write.
    fn set_watermark(&self, samples: u32) -> Result<()>;

    /// Requests an immediate hardware FIFO flush.
    ///
    /// # Errors
    ///
    /// Returns [`HalError::DeviceIo`] on a failed driver write.
    fn flush(&self) -> Result<()>;

    /// Blocks for the next scan record, up to `timeout`.
    ///
    /// Returns `Ok(None)` on timeout so the polling thread can check its
    /// running flag.
    ///
    /// # Errors
    ///
    /// Returns [`HalError::DeviceIo`] on a failed read.
    fn read_scan(&self, timeout: Duration) -> Result<Option<RawScan>>;

    /// Runs the driver's self-test command, when it has one.
    ///
    /// # Errors
    ///
    /// Returns [`HalError::DeviceIo`] when the command itself fails.
    fn self_test(&self) -> Result<SelfTestOutcome> {
        Ok(SelfTestOutcome::NotSupported)
    }
}

/// Deterministic in-memory device for tests and simulation.
///
/// Scans are injected with [`MockIioDevice::inject_scan`]; driver writes
/// are recorded and queryable.
pub struct MockIioDevice {
    kind: SensorKind,
    name: String,
    module_id: u16,
    channels: Vec<ChannelSpec>,
    rates_hz: Vec<f32>,
    max_range: f32,
    resolution: f32,
    fifo_max: u32,
    scan_tx: Sender<RawScan>,
    scan_rx: Receiver<RawScan>,
    enabled: AtomicBool,
    rate_writes: Mutex<Vec<f64>>,
    watermark_writes: Mutex<Vec<u32>>,
    flush_count: Mutex<u32>,
}

impl MockIioDevice {
    /// Creates a mock 3-axis device with signed 16-bit LE channels.
    #[must_use]
    pub fn three_axis(kind: SensorKind, name: impl Into<String>, module_id: u16, scale: f32) -> Self {
        let (scan_tx, scan_rx) = bounded(1024);
        Self {
            kind,
            name: name.into(),
            module_id,
            channels: vec![
                ChannelSpec::le16("x", scale),
                ChannelSpec::le16("y", scale),
                ChannelSpec::le16("z", scale),
            ],
            rates_hz: vec![13.0, 26.0, 52.0, 104.0, 208.0, 416.0],
            max_range: 156.9,
            resolution: scale,
            fifo_max: 128,
            scan_tx,
            scan_rx,
            enabled: AtomicBool::new(false),
            rate_writes: Mutex::new(Vec::new()),
            watermark_writes: Mutex::new(Vec::new()),
            flush_count: Mutex::new(0),
        }
    }

    /// Queues a scan record for the polling thread.
    pub fn inject_scan(&self, scan: RawScan) {
        let _ = self.scan_tx.send(scan);
    }

    /// Builds and queues a 3-axis scan from raw i16 values.
    pub fn inject_xyz(&self, x: i16, y: i16, z: i16, timestamp: Timestamp) {
        let mut bytes = Vec::with_capacity(6);
        bytes.extend_from_slice(&x.to_le_bytes());
        bytes.extend_from_slice(&y.to_le_bytes());
        bytes.extend_from_slice(&z.to_le_bytes());
        self.inject_scan(RawScan { bytes, timestamp });
    }

    /// Whether the buffer is currently enabled.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    /// Sampling frequencies written so far.
    #[must_use]
    pub fn rate_writes(&self) -> Vec<f64> {
        self.rate_writes.lock().map(|g| g.clone()).unwrap_or_default()
    }

    /// FIFO watermarks written so far.
    #[must_use]
    pub fn watermark_writes(&self) -> Vec<u32> {
        self.watermark_writes
            .lock()
            .map(|g| g.clone())
            .unwrap_or_default()
    }

    /// Number of hardware flushes requested so far.
    #[must_use]
    pub fn flushes(&self) -> u32 {
        self.flush_count.lock().map(|g| *g).unwrap_or(0)
    }
}

impl IioDevice for MockIioDevice {
    fn kind(&self) -> SensorKind {
        self.kind
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn module_id(&self) -> u16 {
        self.module_id
    }

    fn channels(&self) -> Vec<ChannelSpec> {
        self.channels.clone()
    }

    fn available_rates_hz(&self) -> Vec<f32> {
        self.rates_hz.clone()
    }

    fn max_range(&self) -> f32 {
        self.max_range
    }

    fn resolution(&self) -> f32 {
        self.resolution
    }

    fn power_ma(&self) -> f32 {
        0.15
    }

    fn fifo_max(&self) -> u32 {
        self.fifo_max
    }

    fn set_enabled(&self, on: bool) -> Result<()> {
        self.enabled.store(on, Ordering::SeqCst);
        Ok(())
    }

    fn set_rate_hz(&self, hz: f64) -> Result<()> {
        if let Ok(mut writes) = self.rate_writes.lock() {
            writes.push(hz);
        }
        Ok(())
    }

    fn set_watermark(&self, samples: u32) -> Result<()> {
        if let Ok(mut writes) = self.watermark_writes.lock() {
            writes.push(samples);
        }
        Ok(())
    }

    fn flush(&self) -> Result<()> {
        if let Ok(mut count) = self.flush_count.lock() {
            *count += 1;
        }
        Ok(())
    }

    fn read_scan(&self, timeout: Duration) -> Result<Option<RawScan>> {
        match self
            .scan_rx
            .recv_timeout(std::time::Duration::from_nanos(timeout.as_nanos()))
        {
            Ok(scan) => Ok(Some(scan)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => {
                Err(HalError::device_io("scan source disconnected"))
            }
        }
    }

    fn self_test(&self) -> Result<SelfTestOutcome> {
        Ok(SelfTestOutcome::Passed)
    }
}

/// Decodes one scan record into per-channel values.
///
/// Fields are consumed in channel order; trailing payload bytes (e.g. a
/// packed timestamp the caller already extracted) are ignored.
///
/// # Errors
///
/// Returns [`HalError::DeviceIo`] when the payload is shorter than the
/// channel layout requires.
pub fn decode_scan(channels: &[ChannelSpec], scan: &RawScan) -> Result<Vec<f32>> {
    let mut values = Vec::with_capacity(channels.len());
    let mut cursor = 0usize;
    for spec in channels {
        let width = spec.bytes as usize;
        let field = scan
            .bytes
            .get(cursor..cursor + width)
            .ok_or_else(|| HalError::device_io(format!("scan truncated at channel '{}'", spec.name)))?;
        values.push(spec.decode(field)?);
        cursor += width;
    }
    Ok(values)
}
