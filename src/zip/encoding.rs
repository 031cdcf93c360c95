//! Name and comment codec.
//!
//! Headers without the UTF-8 flag (bit 11) hold names in the legacy IBM
//! code page 437. Names that cannot be expressed in CP437 are written as
//! UTF-8 with the flag set.

/// Encoding used for names and comments that do not carry the UTF-8 flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TextEncoding {
    #[default]
    Cp437,
    Utf8,
}

/// Code page 437, bytes 0x80..=0xFF.
const CP437_HIGH: [char; 128] = [
    'Ç', 'ü', 'é', 'â', 'ä', 'à', 'å', 'ç', 'ê', 'ë', 'è', 'ï', 'î', 'ì', 'Ä', 'Å', //
    'É', 'æ', 'Æ', 'ô', 'ö', 'ò', 'û', 'ù', 'ÿ', 'Ö', 'Ü', '¢', '£', '¥', '₧', 'ƒ', //
    'á', 'í', 'ó', 'ú', 'ñ', 'Ñ', 'ª', 'º', '¿', '⌐', '¬', '½', '¼', '¡', '«', '»', //
    '░', '▒', '▓', '│', '┤', '╡', '╢', '╖', '╕', '╣', '║', '╗', '╝', '╜', '╛', '┐', //
    '└', '┴', '┬', '├', '─', '┼', '╞', '╟', '╚', '╔', '╩', '╦', '╠', '═', '╬', '╧', //
    '╨', '╤', '╥', '╙', '╘', '╒', '╓', '╫', '╪', '┘', '┌', '█', '▄', '▌', '▐', '▀', //
    'α', 'ß', 'Γ', 'π', 'Σ', 'σ', 'µ', 'τ', 'Φ', 'Θ', 'Ω', 'δ', '∞', 'φ', 'ε', '∩', //
    '≡', '±', '≥', '≤', '⌠', '⌡', '÷', '≈', '°', '∙', '·', '√', 'ⁿ', '²', '■', '\u{a0}',
];

fn cp437_decode(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|&b| {
            if b < 0x80 {
                b as char
            } else {
                CP437_HIGH[(b - 0x80) as usize]
            }
        })
        .collect()
}

fn cp437_encode(text: &str) -> Option<Vec<u8>> {
    text.chars()
        .map(|c| {
            if c.is_ascii() {
                Some(c as u8)
            } else {
                CP437_HIGH
                    .iter()
                    .position(|&h| h == c)
                    .map(|i| 0x80 + i as u8)
            }
        })
        .collect()
}

/// Decode header bytes; `utf8_flag` is bit 11 of the general purpose flags.
pub fn decode(bytes: &[u8], utf8_flag: bool, fallback: TextEncoding) -> String {
    if utf8_flag || fallback == TextEncoding::Utf8 {
        match std::str::from_utf8(bytes) {
            Ok(s) => s.to_owned(),
            // Mislabelled archives exist; keep the bytes readable.
            Err(_) => cp437_decode(bytes),
        }
    } else {
        cp437_decode(bytes)
    }
}

/// Encode a name or comment, returning the bytes and whether the UTF-8
/// flag must be set.
///
/// Pure ASCII never sets the flag. With `force_utf8` (or a UTF-8 default)
/// any non-ASCII text is written as flagged UTF-8; otherwise CP437 is tried
/// first.
pub fn encode(text: &str, fallback: TextEncoding, force_utf8: bool) -> (Vec<u8>, bool) {
    if text.is_ascii() {
        return (text.as_bytes().to_vec(), false);
    }
    if !force_utf8 && fallback == TextEncoding::Cp437 {
        if let Some(bytes) = cp437_encode(text) {
            return (bytes, false);
        }
    }
    (text.as_bytes().to_vec(), true)
}
