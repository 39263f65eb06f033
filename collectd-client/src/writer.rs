use bytes::Bytes;
use thiserror::Error;
use tracing::debug;

use crate::{MAX_PACKET_SIZE, SEND_INTERVAL};

/// Type code for the host string field.
pub const TYPE_HOST: u16 = 0x0000;
/// Type code for the time numeric field.
pub const TYPE_TIME: u16 = 0x0001;
/// Type code for the plugin string field.
pub const TYPE_PLUGIN: u16 = 0x0002;
/// Type code for the plugin instance string field.
pub const TYPE_PLUGIN_INSTANCE: u16 = 0x0003;
/// Type code for the type string field.
pub const TYPE_TYPE: u16 = 0x0004;
/// Type code for the type instance string field.
pub const TYPE_TYPE_INSTANCE: u16 = 0x0005;
/// Type code for the value list field.
pub const TYPE_VALUES: u16 = 0x0006;
/// Type code for the interval numeric field.
pub const TYPE_INTERVAL: u16 = 0x0007;

/// The `type` field value sent with every value list.
///
/// Everything this crate emits is an instantaneous floating-point measurement, so the collectd
/// type is always `gauge`.
pub const PLUGIN_TYPE: &str = "gauge";

// Value kind inside a value list. The protocol also defines counter (0), derive (2) and
// absolute (3) kinds, but this client never produces them.
const VALUE_GAUGE: u8 = 1;

// Header-inclusive lengths: a numeric field is 4 bytes of header plus an 8-byte big-endian
// integer; a value list carrying a single value is 4 bytes of header, a 2-byte count, a 1-byte
// kind and an 8-byte little-endian double.
const NUMERIC_FIELD_LEN: u16 = 12;
const SINGLE_VALUE_FIELD_LEN: u16 = 15;

/// Errors that could occur while encoding protocol fields.
#[derive(Debug, Error)]
pub enum EncodeError {
    /// A string was too long for the field's 16-bit length header.
    #[error("string of {len} bytes does not fit a 16-bit field length")]
    StringTooLong {
        /// Byte length of the offending string.
        len: usize,
    },

    /// A timestamp exceeded the signed 64-bit range of the time field.
    #[error("timestamp {timestamp} does not fit a signed 64-bit time field")]
    TimestampOutOfRange {
        /// The offending unix timestamp.
        timestamp: u64,
    },
}

fn put_numeric(buf: &mut Vec<u8>, type_code: u16, value: i64) {
    buf.extend_from_slice(&type_code.to_be_bytes());
    buf.extend_from_slice(&NUMERIC_FIELD_LEN.to_be_bytes());
    buf.extend_from_slice(&value.to_be_bytes());
}

fn put_string(buf: &mut Vec<u8>, type_code: u16, value: &str) -> Result<(), EncodeError> {
    // Field length is header-inclusive: 4 bytes of header, the string bytes, a trailing NUL.
    let field_len = u16::try_from(5 + value.len())
        .map_err(|_| EncodeError::StringTooLong { len: value.len() })?;
    buf.extend_from_slice(&type_code.to_be_bytes());
    buf.extend_from_slice(&field_len.to_be_bytes());
    buf.extend_from_slice(value.as_bytes());
    buf.push(0);
    Ok(())
}

fn put_value(buf: &mut Vec<u8>, name: &str, value: f64) -> Result<(), EncodeError> {
    put_string(buf, TYPE_TYPE_INSTANCE, name)?;
    buf.extend_from_slice(&TYPE_VALUES.to_be_bytes());
    buf.extend_from_slice(&SINGLE_VALUE_FIELD_LEN.to_be_bytes());
    buf.extend_from_slice(&1u16.to_be_bytes());
    buf.push(VALUE_GAUGE);
    buf.extend_from_slice(&value.to_le_bytes());
    Ok(())
}

fn put_header(
    buf: &mut Vec<u8>,
    timestamp: u64,
    source_host: &str,
    plugin_instance: &str,
    plugin_name: &str,
) -> Result<(), EncodeError> {
    let timestamp =
        i64::try_from(timestamp).map_err(|_| EncodeError::TimestampOutOfRange { timestamp })?;
    put_string(buf, TYPE_HOST, source_host)?;
    put_numeric(buf, TYPE_TIME, timestamp);
    put_string(buf, TYPE_PLUGIN, plugin_name)?;
    put_string(buf, TYPE_PLUGIN_INSTANCE, plugin_instance)?;
    put_string(buf, TYPE_TYPE, PLUGIN_TYPE)?;
    put_numeric(buf, TYPE_INTERVAL, SEND_INTERVAL.as_secs() as i64);
    Ok(())
}

/// Encodes a numeric field: type code and header-inclusive length as big-endian 16-bit
/// integers, followed by the value as a big-endian signed 64-bit integer.
pub fn encode_numeric(type_code: u16, value: i64) -> Vec<u8> {
    let mut buf = Vec::with_capacity(NUMERIC_FIELD_LEN as usize);
    put_numeric(&mut buf, type_code, value);
    buf
}

/// Encodes a NUL-terminated string field.
///
/// # Errors
///
/// Returns an error if the string is too long for the field's 16-bit length header.
pub fn encode_string(type_code: u16, value: &str) -> Result<Vec<u8>, EncodeError> {
    let mut buf = Vec::with_capacity(5 + value.len());
    put_string(&mut buf, type_code, value)?;
    Ok(buf)
}

/// Encodes one named value: a type instance field carrying the stat name, immediately followed
/// by a value list holding a single gauge entry as a little-endian double.
///
/// # Errors
///
/// Returns an error if the stat name is too long for the field's 16-bit length header.
pub fn encode_value(name: &str, value: f64) -> Result<Vec<u8>, EncodeError> {
    let mut buf = Vec::with_capacity(5 + name.len() + SINGLE_VALUE_FIELD_LEN as usize);
    put_value(&mut buf, name, value)?;
    Ok(buf)
}

/// Encodes the packet header: host, time, plugin, plugin instance, type and interval fields, in
/// that fixed order. Every packet starts with one copy of this header.
///
/// # Errors
///
/// Returns an error if the timestamp exceeds the signed 64-bit range of the time field, or if
/// any of the identity strings is too long for its field.
pub fn encode_header(
    timestamp: u64,
    source_host: &str,
    plugin_instance: &str,
    plugin_name: &str,
) -> Result<Vec<u8>, EncodeError> {
    let mut buf = Vec::new();
    put_header(&mut buf, timestamp, source_host, plugin_instance, plugin_name)?;
    Ok(buf)
}

/// Writes value fields into header-seeded, size-bounded packets.
///
/// The collectd network protocol caps a packet at [`MAX_PACKET_SIZE`] bytes, and every packet
/// must open with the full header so the server can attribute the values that follow. The
/// writer encodes the header once, then greedily appends value fields to the current packet,
/// closing it and seeding a fresh one with a copy of the header whenever the next field would
/// not fit. A field that cannot fit in a packet even on its own is discarded.
pub(crate) struct PayloadWriter {
    max_packet_len: usize,
    header_buf: Vec<u8>,
    value_buf: Vec<u8>,
    packets_buf: Vec<u8>,
    offsets: Vec<usize>,
}

impl PayloadWriter {
    /// Creates a new `PayloadWriter`, encoding the shared packet header up front.
    pub fn new(
        max_packet_len: usize,
        timestamp: u64,
        source_host: &str,
        plugin_instance: &str,
        plugin_name: &str,
    ) -> Result<Self, EncodeError> {
        let mut header_buf = Vec::new();
        put_header(&mut header_buf, timestamp, source_host, plugin_instance, plugin_name)?;

        Ok(Self {
            max_packet_len,
            header_buf,
            value_buf: Vec::new(),
            packets_buf: Vec::new(),
            offsets: Vec::new(),
        })
    }

    fn last_offset(&self) -> usize {
        self.offsets.last().copied().unwrap_or(0)
    }

    /// Returns the number of bytes in the current, not-yet-finalized packet.
    fn current_packet_len(&self) -> usize {
        self.packets_buf.len() - self.last_offset()
    }

    /// Writes a single named value into the current packet, splitting to a new packet when the
    /// current one is full.
    ///
    /// Returns `false` if the value was discarded because no packet could ever carry it.
    pub fn write_value(&mut self, name: &str, value: f64) -> bool {
        self.value_buf.clear();
        if put_value(&mut self.value_buf, name, value).is_err() {
            return false;
        }

        // A field that exceeds the packet bound even with just the header in front of it can
        // never be sent, regardless of how the remaining fields are packed.
        if self.header_buf.len() + self.value_buf.len() > self.max_packet_len {
            return false;
        }

        let current_packet_len = self.current_packet_len();
        if current_packet_len == 0 {
            // First surviving field: open the first packet.
            self.packets_buf.extend_from_slice(&self.header_buf);
        } else if current_packet_len + self.value_buf.len() > self.max_packet_len {
            // Close the current packet and seed the next one with a fresh header copy.
            self.offsets.push(self.packets_buf.len());
            self.packets_buf.extend_from_slice(&self.header_buf);
        }

        self.packets_buf.extend_from_slice(&self.value_buf);
        true
    }

    /// Consumes the writer, returning the finished packets.
    ///
    /// Packets are sliced out of a single shared buffer, so this does not copy payload bytes.
    pub fn into_packets(self) -> Vec<Bytes> {
        let buf = Bytes::from(self.packets_buf);
        let mut packets = Vec::with_capacity(self.offsets.len() + 1);
        let mut start = 0;
        for offset in self.offsets {
            packets.push(buf.slice(start..offset));
            start = offset;
        }
        if start < buf.len() {
            packets.push(buf.slice(start..));
        }
        packets
    }
}

/// Packs a collection of named values into one or more size-bounded packets, each ready to be
/// sent as a single UDP datagram.
///
/// Values are laid out in the iteration order of `stats`. A value whose encoded field cannot
/// fit in a [`MAX_PACKET_SIZE`]-byte packet alongside the header is dropped; when nothing
/// survives, no packets are produced.
///
/// # Errors
///
/// Returns an error if the packet header cannot be encoded from the given timestamp and
/// identity strings.
pub fn pack_messages<'a, I>(
    stats: I,
    timestamp: u64,
    source_host: &str,
    plugin_instance: &str,
    plugin_name: &str,
) -> Result<Vec<Bytes>, EncodeError>
where
    I: IntoIterator<Item = (&'a str, f64)>,
{
    let mut writer =
        PayloadWriter::new(MAX_PACKET_SIZE, timestamp, source_host, plugin_instance, plugin_name)?;

    for (name, value) in stats {
        if !writer.write_value(name, value) {
            debug!(stat = name, "Dropping stat too large to fit in a single packet.");
        }
    }

    Ok(writer.into_packets())
}
