//! Byte-level vocabulary of the Optolink serial link

/// End of transmission, resets the controller's link state
pub const EOT: u8 = 0x04;
/// Enquiry, sent by an idle controller about once per second
pub const ENQ: u8 = 0x05;
/// Positive acknowledge
pub const ACK: u8 = 0x06;
/// Negative acknowledge
pub const NAK: u8 = 0x15;
/// First byte of the three-byte synchronization sequence
pub const SYN: u8 = 0x16;
/// Start-of-telegram marker
pub const TELEGRAM_START: u8 = 0x41;

/// Synchronization sequence establishing the 0x41-framed protocol
pub const SYNC_SEQ: [u8; 3] = [SYN, 0x00, 0x00];

/// Human-readable name of a received byte for log output
///
/// Control characters are shown by their ASCII mnemonic so that log lines
/// like "Received NAK (21) while unsynced" stay legible.
pub fn control_name(byte: u8) -> String {
    const NAMES: [&str; 33] = [
        "NUL", "SOH", "STX", "ETX", "EOT", "ENQ", "ACK", "BEL", "BS", "HT", "LF", "VT", "FF",
        "CR", "SO", "SI", "DLE", "DC1", "DC2", "DC3", "DC4", "NAK", "SYN", "ETB", "CAN", "EM",
        "SUB", "ESC", "FS", "GS", "RS", "US", "Space",
    ];
    match byte {
        0..=32 => format!("{} ({})", NAMES[byte as usize], byte),
        127 => format!("DEL ({})", byte),
        _ => format!("char #{}", byte),
    }
}
