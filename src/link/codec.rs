//! Frame encoding and decoding for the display link.
//!
//! Three frame kinds travel over the wire. Multi-byte integers are little-endian.
//!
//! ```text
//! sync    (device→host)  SOH lineLen EOT
//! command (device→host)  SOH version cmd len ETB        -- host ACK --
//!                        STX payload[len] ETX EOT        -- host ACK/NAK --
//! message (host→device)  SOH VERSION type kind id:u16 len:u16 ETB   -- device ACK/CAN --
//!                        STX text[len] ETX EOT                      -- device ACK/CAN --
//! ```
//!
//! There is no checksum; the delimiter octets are the only structural check.
//! Everything here is pure: the engine owns all I/O.
use bytes::{Buf, BufMut, BytesMut};

use super::control::{describe, EOT, ETB, ETX, SOH, STX, VERSION};
use super::error::{LinkError, LinkResult};
use crate::store::{LogEntry, Severity};

/// Length of the handshake frame `SOH lineLen EOT`.
pub const SYNC_FRAME_LEN: usize = 3;
/// Command header bytes following the leading SOH: version, cmd, len, ETB.
pub const COMMAND_HEADER_LEN: usize = 4;
/// STX + ETX + EOT wrapped around a payload.
pub const PAYLOAD_ENVELOPE_LEN: usize = 3;
pub const MESSAGE_HEADER_LEN: usize = 9;
/// Largest payload a message header can describe.
pub const MAX_MESSAGE_PAYLOAD: usize = u16::MAX as usize;

pub const CMD_PAGE: u8 = b'P';
pub const CMD_EXPAND: u8 = b'E';
pub const CMD_RESUME: u8 = b'R';

fn expect_octet(found: u8, expected: u8, what: &str) -> LinkResult<()> {
    if found != expected {
        return Err(LinkError::violation(format!(
            "{} expected {}, got {}",
            what,
            describe(expected),
            describe(found)
        )));
    }
    Ok(())
}

/// Validate the handshake frame and return the device line length.
pub fn decode_sync_frame(frame: &[u8]) -> LinkResult<u8> {
    if frame.len() != SYNC_FRAME_LEN {
        return Err(LinkError::violation(format!(
            "sync frame is {} bytes",
            frame.len()
        )));
    }
    expect_octet(frame[0], SOH, "sync frame start")?;
    expect_octet(frame[2], EOT, "sync frame end")?;
    Ok(frame[1])
}

/// Header of a device command, as read after its leading SOH.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandHeader {
    pub version: u8,
    pub code: u8,
    pub payload_len: u8,
}

impl CommandHeader {
    pub fn decode(bytes: &[u8]) -> LinkResult<Self> {
        if bytes.len() != COMMAND_HEADER_LEN {
            return Err(LinkError::violation(format!(
                "command header is {} bytes",
                bytes.len()
            )));
        }
        expect_octet(bytes[3], ETB, "command header end")?;
        Ok(Self {
            version: bytes[0],
            code: bytes[1],
            payload_len: bytes[2],
        })
    }

    /// Bytes to read for the payload including its envelope.
    pub fn body_len(&self) -> usize {
        self.payload_len as usize + PAYLOAD_ENVELOPE_LEN
    }

    /// Check `STX payload ETX EOT` and return the payload.
    pub fn payload<'a>(&self, body: &'a [u8]) -> LinkResult<&'a [u8]> {
        let len = self.payload_len as usize;
        if body.len() != self.body_len() {
            return Err(LinkError::violation(format!(
                "command body is {} bytes, expected {}",
                body.len(),
                self.body_len()
            )));
        }
        expect_octet(body[0], STX, "command payload start")?;
        expect_octet(body[len + 1], ETX, "command payload end")?;
        expect_octet(body[len + 2], EOT, "command terminator")?;
        Ok(&body[1..len + 1])
    }
}

/// A decoded device command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Show `count` entries starting at index `start`.
    Page { start: u16, count: u8 },
    /// Show one entry with its long message.
    Expand { id: u16 },
    /// Return to live scrolling.
    Resume,
    /// Reserved for future firmware; ignored by the host.
    Unknown { code: u8 },
}

impl Command {
    /// Interpret a command payload. A payload too short for its command is a violation.
    pub fn parse(code: u8, payload: &[u8]) -> LinkResult<Self> {
        let mut buf = payload;
        match code {
            CMD_PAGE => {
                if buf.len() < 3 {
                    return Err(LinkError::violation(format!(
                        "page command needs 3 payload bytes, got {}",
                        buf.len()
                    )));
                }
                let start = buf.get_u16_le();
                let count = buf.get_u8();
                Ok(Command::Page { start, count })
            }
            CMD_EXPAND => {
                if buf.len() < 2 {
                    return Err(LinkError::violation(format!(
                        "expand command needs 2 payload bytes, got {}",
                        buf.len()
                    )));
                }
                Ok(Command::Expand {
                    id: buf.get_u16_le(),
                })
            }
            // Resume carries a dummy byte.
            CMD_RESUME => Ok(Command::Resume),
            other => Ok(Command::Unknown { code: other }),
        }
    }

    /// Encode the full device-side frame (header and body) for this command.
    /// The host never sends commands; this serves device simulators and tests.
    pub fn encode(&self) -> Vec<u8> {
        let (code, payload): (u8, Vec<u8>) = match *self {
            Command::Page { start, count } => {
                let mut p = Vec::with_capacity(3);
                p.put_u16_le(start);
                p.put_u8(count);
                (CMD_PAGE, p)
            }
            Command::Expand { id } => (CMD_EXPAND, id.to_le_bytes().to_vec()),
            Command::Resume => (CMD_RESUME, vec![0]),
            Command::Unknown { code } => (code, Vec::new()),
        };
        // At most three payload bytes, so the length always fits.
        command_frame(code, payload.len() as u8, &payload)
    }
}

/// Build a raw command frame `SOH VERSION code len ETB STX payload ETX EOT`.
///
/// The length field is one octet, so payloads over 255 bytes are rejected.
pub fn encode_command(code: u8, payload: &[u8]) -> LinkResult<Vec<u8>> {
    let len = u8::try_from(payload.len()).map_err(|_| {
        LinkError::violation(format!(
            "command payload of {} bytes exceeds {}",
            payload.len(),
            u8::MAX
        ))
    })?;
    Ok(command_frame(code, len, payload))
}

fn command_frame(code: u8, len: u8, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(1 + COMMAND_HEADER_LEN + payload.len() + PAYLOAD_ENVELOPE_LEN);
    out.extend_from_slice(&[SOH, VERSION, code, len, ETB, STX]);
    out.extend_from_slice(payload);
    out.extend_from_slice(&[ETX, EOT]);
    out
}

/// How much of an entry a message carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Short = 1,
    Expanded = 2,
}

impl MessageKind {
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            1 => Some(MessageKind::Short),
            2 => Some(MessageKind::Expanded),
            _ => None,
        }
    }
}

/// A host→device message ready to be framed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageFrame {
    pub kind: MessageKind,
    pub severity: Severity,
    pub id: u16,
    pub text: Vec<u8>,
}

impl MessageFrame {
    /// Scroll/page rendering, truncated to the device line length.
    pub fn short(entry: &LogEntry, line_len: u8) -> Self {
        let line = entry.short_line();
        Self {
            kind: MessageKind::Short,
            severity: entry.severity,
            id: entry.id,
            text: truncate_utf8(&line, line_len as usize).as_bytes().to_vec(),
        }
    }

    /// Expanded-view rendering with the long message.
    pub fn expanded(entry: &LogEntry) -> Self {
        let text = entry.expanded_text();
        Self {
            kind: MessageKind::Expanded,
            severity: entry.severity,
            id: entry.id,
            text: truncate_utf8(&text, MAX_MESSAGE_PAYLOAD).as_bytes().to_vec(),
        }
    }

    pub fn header(&self) -> [u8; MESSAGE_HEADER_LEN] {
        let mut buf = BytesMut::with_capacity(MESSAGE_HEADER_LEN);
        buf.put_u8(SOH);
        buf.put_u8(VERSION);
        buf.put_u8(self.severity.type_char());
        buf.put_u8(self.kind as u8);
        buf.put_u16_le(self.id);
        buf.put_u16_le(self.text.len() as u16);
        buf.put_u8(ETB);
        let mut header = [0u8; MESSAGE_HEADER_LEN];
        header.copy_from_slice(&buf);
        header
    }

    pub fn body(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.text.len() + PAYLOAD_ENVELOPE_LEN);
        out.push(STX);
        out.extend_from_slice(&self.text);
        out.push(ETX);
        out.push(EOT);
        out
    }
}

/// Fields of a message header, decoded the way the device firmware reads them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageHeader {
    pub version: u8,
    pub type_char: u8,
    pub kind: MessageKind,
    pub id: u16,
    pub payload_len: u16,
}

impl MessageHeader {
    pub fn decode(bytes: &[u8]) -> LinkResult<Self> {
        if bytes.len() != MESSAGE_HEADER_LEN {
            return Err(LinkError::violation(format!(
                "message header is {} bytes",
                bytes.len()
            )));
        }
        expect_octet(bytes[0], SOH, "message header start")?;
        expect_octet(bytes[8], ETB, "message header end")?;
        let mut buf = &bytes[1..8];
        let version = buf.get_u8();
        let type_char = buf.get_u8();
        let kind = MessageKind::from_byte(buf.get_u8())
            .ok_or_else(|| LinkError::violation(format!("unknown message kind {}", bytes[3])))?;
        let id = buf.get_u16_le();
        let payload_len = buf.get_u16_le();
        Ok(Self {
            version,
            type_char,
            kind,
            id,
            payload_len,
        })
    }
}

/// Longest prefix of `s` no longer than `max_bytes` that ends on a char boundary.
pub fn truncate_utf8(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }
    let mut cut = max_bytes;
    while cut > 0 && !s.is_char_boundary(cut) {
        cut -= 1;
    }
    &s[..cut]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::control::{ACK, ENQ};
    use crate::store::LogStore;

    #[test]
    fn sync_frame_yields_line_length() {
        assert_eq!(decode_sync_frame(&[SOH, 24, EOT]).unwrap(), 24);
        assert!(decode_sync_frame(&[SOH, 24, ETX]).is_err());
        assert!(decode_sync_frame(&[ACK, 24, EOT]).is_err());
        assert!(decode_sync_frame(&[SOH, 24]).is_err());
    }

    #[test]
    fn message_header_layout_is_bit_exact() {
        let mut store = LogStore::new();
        for _ in 0..0x0102 {
            store.append("x", "y", "z", Severity::Info);
        }
        let entry = store.append("net", "link up", "long", Severity::Warn);
        let frame = MessageFrame::short(&entry, 19);
        assert_eq!(entry.id, 0x0102);
        assert_eq!(
            frame.header(),
            [SOH, VERSION, b'W', 1, 0x02, 0x01, 11, 0x00, ETB]
        );
        assert_eq!(frame.body(), b"\x02net-link up\x03\x04".to_vec());
    }

    #[test]
    fn short_message_truncates_to_line_length() {
        let mut store = LogStore::new();
        let entry = store.append("sensor", "temperature high", "", Severity::Error);
        let frame = MessageFrame::short(&entry, 10);
        assert_eq!(frame.text, b"sensor-tem".to_vec());
        assert_eq!(frame.header()[7..9], [0x00, ETB]);
        assert_eq!(frame.header()[6], 10);
    }

    #[test]
    fn expanded_message_carries_long_text() {
        let mut store = LogStore::new();
        let entry = store.append("db", "slow", "query took 1200ms", Severity::Debug);
        let frame = MessageFrame::expanded(&entry);
        assert_eq!(frame.kind, MessageKind::Expanded);
        assert_eq!(frame.text, b"db-slow: query took 1200ms".to_vec());
        let header = MessageHeader::decode(&frame.header()).unwrap();
        assert_eq!(header.kind, MessageKind::Expanded);
        assert_eq!(header.type_char, b'D');
        assert_eq!(header.payload_len as usize, frame.text.len());
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        // "é" is two bytes; a cut at 2 would split it.
        assert_eq!(truncate_utf8("aé", 2), "a");
        assert_eq!(truncate_utf8("aé", 3), "aé");
        assert_eq!(truncate_utf8("", 0), "");
    }

    #[test]
    fn command_header_requires_etb() {
        let header = CommandHeader::decode(&[VERSION, b'P', 3, ETB]).unwrap();
        assert_eq!(header.code, b'P');
        assert_eq!(header.body_len(), 6);
        assert!(CommandHeader::decode(&[VERSION, b'P', 3, EOT]).is_err());
    }

    #[test]
    fn command_payload_envelope_is_checked() {
        let header = CommandHeader::decode(&[VERSION, b'E', 2, ETB]).unwrap();
        assert_eq!(header.payload(&[STX, 7, 0, ETX, EOT]).unwrap(), &[7, 0]);
        assert!(header.payload(&[STX, 7, 0, ETX, ENQ]).is_err());
        assert!(header.payload(&[ENQ, 7, 0, ETX, EOT]).is_err());
        assert!(header.payload(&[STX, 7, ETX, EOT]).is_err());
    }

    #[test]
    fn parses_known_commands() {
        assert_eq!(
            Command::parse(b'P', &[0x02, 0x00, 3]).unwrap(),
            Command::Page { start: 2, count: 3 }
        );
        assert_eq!(
            Command::parse(b'E', &[0x34, 0x12]).unwrap(),
            Command::Expand { id: 0x1234 }
        );
        assert_eq!(Command::parse(b'R', &[0]).unwrap(), Command::Resume);
        assert_eq!(
            Command::parse(b'Z', &[]).unwrap(),
            Command::Unknown { code: b'Z' }
        );
        assert!(Command::parse(b'P', &[1, 0]).is_err());
        assert!(Command::parse(b'E', &[1]).is_err());
    }

    #[test]
    fn encoded_command_decodes_back() {
        let raw = Command::Page { start: 0x0105, count: 4 }.encode();
        assert_eq!(raw[0], SOH);
        let header = CommandHeader::decode(&raw[1..5]).unwrap();
        let payload = header.payload(&raw[5..]).unwrap();
        assert_eq!(
            Command::parse(header.code, payload).unwrap(),
            Command::Page { start: 0x0105, count: 4 }
        );
    }

    #[test]
    fn command_payload_length_must_fit_one_octet() {
        let raw = encode_command(b'X', &[0xAA; 255]).unwrap();
        assert_eq!(raw[3], 255);
        assert_eq!(raw.len(), 1 + COMMAND_HEADER_LEN + 255 + PAYLOAD_ENVELOPE_LEN);

        let err = encode_command(b'X', &[0xAA; 256]).unwrap_err();
        assert!(matches!(err, LinkError::Violation(_)));
    }
}
