//! Guest text encoding.
//!
//! Guest filenames arrive in a superset of ASCII (CP932) where lead bytes
//! `0x81..=0x9F` and `0xE0..=0xEF` open a 2-byte sequence. Guest names are
//! treated as opaque bytes plus that one structural rule; Unicode semantics
//! only enter when converting to and from host (UTF-8) names.

use encoding_rs::SHIFT_JIS;

/// True when `b` opens a 2-byte sequence in the guest encoding.
pub(crate) fn is_lead_byte(b: u8) -> bool {
    matches!(b, 0x81..=0x9F | 0xE0..=0xEF)
}

/// Decodes guest bytes to a host string. `None` on malformed input.
pub(crate) fn to_host(bytes: &[u8]) -> Option<String> {
    let (text, had_errors) = SHIFT_JIS.decode_without_bom_handling(bytes);
    if had_errors { None } else { Some(text.into_owned()) }
}

/// Encodes a host string as guest bytes. `None` when unrepresentable.
pub(crate) fn to_guest(text: &str) -> Option<Vec<u8>> {
    let (bytes, _, had_errors) = SHIFT_JIS.encode(text);
    if had_errors { None } else { Some(bytes.into_owned()) }
}

/// Lower-cases ASCII letters in place, skipping the trailing byte of every
/// 2-byte sequence so it is never case-folded.
pub(crate) fn fold_case(buf: &mut [u8]) {
    let mut i = 0;
    while i < buf.len() {
        if is_lead_byte(buf[i]) {
            i += 2;
            continue;
        }
        buf[i].make_ascii_lowercase();
        i += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ascii_round_trip() {
        assert_eq!(to_host(b"HELLO.TXT").unwrap(), "HELLO.TXT");
        assert_eq!(to_guest("HELLO.TXT").unwrap(), b"HELLO.TXT");
    }

    #[test]
    fn two_byte_sequences_survive() {
        // katakana KA in the guest encoding
        let guest = [0x83, 0x4a];
        let host = to_host(&guest).unwrap();
        assert_eq!(host, "\u{30ab}");
        assert_eq!(to_guest(&host).unwrap(), guest);
    }

    #[test]
    fn malformed_input_is_rejected() {
        assert!(to_host(&[0x83]).is_none());
        assert!(to_guest("\u{2603}").is_none());
    }

    #[test]
    fn case_fold_skips_continuation_bytes() {
        // 0x83 0x41 would read as "A" if the trail byte were folded
        let mut buf = [b'A', 0x83, 0x41, b'B'];
        fold_case(&mut buf);
        assert_eq!(buf, [b'a', 0x83, 0x41, b'b']);
    }
}
