//! Control octets shared with the display firmware. Values must not change.

/// Enquiry: the device asks the host to start a session.
pub const ENQ: u8 = 0x05;
/// Synchronize: host answer to ENQ.
pub const SYN: u8 = 0x16;
pub const ACK: u8 = 0x06;
pub const NAK: u8 = 0x15;
/// Cancel: the device declines the message being offered.
pub const CAN: u8 = 0x18;

/// Start of header.
pub const SOH: u8 = 0x01;
/// Start of text (payload).
pub const STX: u8 = 0x02;
/// End of text (payload).
pub const ETX: u8 = 0x03;
/// End of transmission.
pub const EOT: u8 = 0x04;
/// End of transmission block (header terminator).
pub const ETB: u8 = 0x17;

/// Protocol revision carried in every host message header.
pub const VERSION: u8 = 0x01;

/// Human-readable name of a control octet, for logs.
pub fn name(byte: u8) -> Option<&'static str> {
    Some(match byte {
        ENQ => "ENQ",
        SYN => "SYN",
        ACK => "ACK",
        NAK => "NAK",
        CAN => "CAN",
        SOH => "SOH",
        STX => "STX",
        ETX => "ETX",
        EOT => "EOT",
        ETB => "ETB",
        _ => return None,
    })
}

/// `name(byte)` or the byte as hex.
pub fn describe(byte: u8) -> String {
    match name(byte) {
        Some(n) => n.to_string(),
        None => format!("0x{:02x}", byte),
    }
}
