//! Encoding and best-effort decoding of characteristic payloads.
//!
//! The remote device's binary framing is unknown ahead of time, so
//! [`analyze`] emits every plausible interpretation of a payload instead of
//! committing to one. The consuming layer picks whichever view it trusts.

use crate::gatt::ids;
use uuid::Uuid;

/// Heart Rate Measurement per the Heart Rate Service: a zero flags byte
/// (16-bit value format, no sensor-contact bit) followed by the measurement
/// as little-endian. Out-of-range inputs alias modulo 65536, mirroring the
/// fixed-width protocol field.
pub fn encode_heart_rate(bpm: u32) -> Vec<u8> {
    let value = bpm & 0xFFFF;
    vec![0x00, (value & 0xFF) as u8, ((value >> 8) & 0xFF) as u8]
}

/// Single-byte value, masked to 0-255. Used for the battery level.
pub fn encode_u8(value: u32) -> Vec<u8> {
    vec![(value & 0xFF) as u8]
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayloadAnalysis {
    pub size: usize,
    /// Uppercase hex, one space-separated pair per byte.
    pub hex: String,
    /// Decimal per byte, space-separated.
    pub decimal: String,
    /// Binary per byte, 8-bit zero-padded, space-separated.
    pub binary: String,
    /// Present only when every byte is printable ASCII or tab/LF/CR.
    pub text: Option<String>,
    /// Size-keyed numeric interpretation; absent for sizes other than 1/2/4.
    pub numeric: Option<NumericView>,
    /// Domain-specific hint for known vendor characteristics.
    pub hint: Option<PayloadHint>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NumericView {
    Byte { unsigned: u8, signed: i8 },
    Word { little_endian: u16, big_endian: u16 },
    DoubleWord { little_endian: u32, big_endian: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadHint {
    /// First byte of a vendor treadmill-data payload carries the command.
    TreadmillCommand(u8),
}

/// Total over all inputs; never fails, never surfaces mojibake.
pub fn analyze(data: &[u8], characteristic: Uuid) -> PayloadAnalysis {
    let numeric = match data {
        [b] => Some(NumericView::Byte {
            unsigned: *b,
            signed: *b as i8,
        }),
        [a, b] => Some(NumericView::Word {
            little_endian: u16::from_le_bytes([*a, *b]),
            big_endian: u16::from_be_bytes([*a, *b]),
        }),
        [a, b, c, d] => Some(NumericView::DoubleWord {
            little_endian: u32::from_le_bytes([*a, *b, *c, *d]),
            big_endian: u32::from_be_bytes([*a, *b, *c, *d]),
        }),
        _ => None,
    };

    let hint = if characteristic == *ids::TREADMILL_DATA {
        data.first().map(|first| PayloadHint::TreadmillCommand(*first))
    } else {
        None
    };

    PayloadAnalysis {
        size: data.len(),
        hex: hex_string(data),
        decimal: per_byte(data, |b| b.to_string()),
        binary: per_byte(data, |b| format!("{:08b}", b)),
        text: printable_text(data),
        numeric,
        hint,
    }
}

pub fn hex_string(data: &[u8]) -> String {
    per_byte(data, |b| format!("{:02X}", b))
}

/// The string surfaced in data events: the decoded text when the payload is
/// fully printable, otherwise a placeholder naming the size.
pub fn display_text(data: &[u8]) -> String {
    printable_text(data).unwrap_or_else(|| format!("binary data ({} bytes)", data.len()))
}

fn per_byte<F: Fn(u8) -> String>(data: &[u8], format: F) -> String {
    data.iter()
        .map(|b| format(*b))
        .collect::<Vec<_>>()
        .join(" ")
}

fn is_readable(byte: u8) -> bool {
    (0x20..=0x7E).contains(&byte) || byte == b'\t' || byte == b'\n' || byte == b'\r'
}

fn printable_text(data: &[u8]) -> Option<String> {
    if !data.iter().all(|b| is_readable(*b)) {
        return None;
    }
    match String::from_utf8(data.to_vec()) {
        Ok(text) if !text.trim().is_empty() => Some(text),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::uuid::ShortUuid;

    #[test]
    fn heart_rate_is_flags_then_little_endian() {
        assert_eq!(encode_heart_rate(75), vec![0x00, 0x4B, 0x00]);
        assert_eq!(encode_heart_rate(0), vec![0x00, 0x00, 0x00]);
        assert_eq!(encode_heart_rate(0xFFFF), vec![0x00, 0xFF, 0xFF]);
        assert_eq!(encode_heart_rate(513), vec![0x00, 0x01, 0x02]);
    }

    #[test]
    fn heart_rate_aliases_modulo_16_bits() {
        assert_eq!(encode_heart_rate(65536 + 75), encode_heart_rate(75));
    }

    #[test]
    fn encode_u8_masks_to_one_byte() {
        assert_eq!(encode_u8(85), vec![85]);
        assert_eq!(encode_u8(0x1FF), vec![0xFF]);
    }

    #[test]
    fn analyze_is_total_on_empty_input() {
        let analysis = analyze(&[], Uuid::nil());
        assert_eq!(analysis.size, 0);
        assert_eq!(analysis.hex, "");
        assert_eq!(analysis.decimal, "");
        assert_eq!(analysis.binary, "");
        assert_eq!(analysis.text, None);
        assert_eq!(analysis.numeric, None);
    }

    #[test]
    fn analyze_raw_views() {
        let analysis = analyze(&[0x01, 0xFF], Uuid::nil());
        assert_eq!(analysis.hex, "01 FF");
        assert_eq!(analysis.decimal, "1 255");
        assert_eq!(analysis.binary, "00000001 11111111");
    }

    #[test]
    fn text_view_is_all_or_nothing() {
        assert_eq!(
            analyze(&[0x48, 0x69], Uuid::nil()).text,
            Some("Hi".to_string())
        );
        assert_eq!(analyze(&[0x00, 0xFF], Uuid::nil()).text, None);
        assert_eq!(display_text(&[0x00, 0xFF]), "binary data (2 bytes)");
        assert_eq!(display_text(&[0x48, 0x69]), "Hi");
    }

    #[test]
    fn numeric_views_by_size() {
        match analyze(&[0x01], Uuid::nil()).numeric {
            Some(NumericView::Byte { unsigned, signed }) => {
                assert_eq!(unsigned, 1);
                assert_eq!(signed, 1);
            }
            other => panic!("unexpected numeric view: {:?}", other),
        }
        match analyze(&[0xFF], Uuid::nil()).numeric {
            Some(NumericView::Byte { signed, .. }) => assert_eq!(signed, -1),
            other => panic!("unexpected numeric view: {:?}", other),
        }
        match analyze(&[0x01, 0x02], Uuid::nil()).numeric {
            Some(NumericView::Word {
                little_endian,
                big_endian,
            }) => {
                assert_eq!(little_endian, 513);
                assert_eq!(big_endian, 258);
            }
            other => panic!("unexpected numeric view: {:?}", other),
        }
        match analyze(&[0x01, 0x00, 0x00, 0x00], Uuid::nil()).numeric {
            Some(NumericView::DoubleWord {
                little_endian,
                big_endian,
            }) => {
                assert_eq!(little_endian, 1);
                assert_eq!(big_endian, 0x01000000);
            }
            other => panic!("unexpected numeric view: {:?}", other),
        }
        assert_eq!(analyze(&[1, 2, 3], Uuid::nil()).numeric, None);
    }

    #[test]
    fn treadmill_hint_exposes_command_byte() {
        let analysis = analyze(&[0x07, 0x01], *ids::TREADMILL_DATA);
        assert_eq!(analysis.hint, Some(PayloadHint::TreadmillCommand(0x07)));

        let other = analyze(&[0x07, 0x01], Uuid::from_short(0x2A37));
        assert_eq!(other.hint, None);
    }
}
