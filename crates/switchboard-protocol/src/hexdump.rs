//! Hex/ASCII rendering of raw frames for trace logging.

use core::fmt::Write;

const WIDTH: usize = 16;

/// Render `bytes` as offset, hex and printable-ASCII columns, 16 bytes a row.
///
/// ```text
/// 00000000  7b 22 74 79 70 65 22 3a  22 70 69 6e 67 22 7d     |{"type":"ping"}|
/// ```
pub fn hexdump(bytes: &[u8]) -> String {
    let mut out = String::new();
    for (row, chunk) in bytes.chunks(WIDTH).enumerate() {
        let _ = write!(out, "{:08x} ", row.saturating_mul(WIDTH));
        for col in 0..WIDTH {
            if col == WIDTH / 2 {
                out.push(' ');
            }
            let cell = chunk
                .get(col)
                .map_or_else(|| "   ".to_owned(), |b| format!(" {b:02x}"));
            out.push_str(&cell);
        }
        out.push_str("  |");
        out.extend(chunk.iter().map(|&b| {
            if b.is_ascii_graphic() || b == b' ' {
                char::from(b)
            } else {
                '.'
            }
        }));
        out.push_str("|\n");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_frame_is_padded() {
        let dump = hexdump(br#"{"type":"ping"}"#);
        assert_eq!(
            dump,
            "00000000  7b 22 74 79 70 65 22 3a  22 70 69 6e 67 22 7d     |{\"type\":\"ping\"}|\n"
        );
    }

    #[test]
    fn rows_advance_offset_and_mask_control_bytes() {
        let bytes: Vec<u8> = (0_u8..20).collect();
        let dump = hexdump(&bytes);
        let lines: Vec<&str> = dump.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines.iter().any(|l| l.starts_with("00000010 ")));
        assert!(dump.contains("|....|"));
    }

    #[test]
    fn empty_input_renders_nothing() {
        assert!(hexdump(&[]).is_empty());
    }
}
