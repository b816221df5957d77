//! Serialization of HDUs into the FITS block format.

use super::header::{HeaderCard, HeaderValue, CARD_LENGTH};
use super::model::Hdu;
use tracing::debug;

/// Size of a FITS logical record.
pub const BLOCK_SIZE: usize = 2880;

/// Keywords the writer owns. User cards with these names are dropped.
const RESERVED_KEYWORDS: [&str; 15] = [
    "SIMPLE", "BITPIX", "NAXIS", "NAXIS1", "NAXIS2", "EXTEND", "XTENSION", "PCOUNT", "GCOUNT",
    "BZERO", "BSCALE", "EXTNAME", "CHECKSUM", "DATASUM", "END",
];

const CHECKSUM_PLACEHOLDER: &str = "0000000000000000";

/// Encode a list of HDUs as a FITS file. The first HDU is the primary one.
pub fn encode_hdus(hdus: &[Hdu], checksum: bool) -> Vec<u8> {
    let mut output = Vec::new();
    for (index, hdu) in hdus.iter().enumerate() {
        output.extend(encode_hdu(hdu, index == 0, checksum));
    }
    output
}

/// Encode a single HDU (header and data, padded to full blocks).
pub fn encode_hdu(hdu: &Hdu, primary: bool, checksum: bool) -> Vec<u8> {
    let data = encode_data(hdu);
    let mut cards = structural_cards(hdu, primary);

    for card in hdu.header.iter() {
        if RESERVED_KEYWORDS.contains(&card.keyword.as_str()) {
            debug!("Dropping reserved keyword {} from user header", card.keyword);
            continue;
        }
        cards.push(card.clone());
    }

    let datasum = if checksum {
        let sum = ones_complement_sum(&data, 0);
        cards.push(HeaderCard::new("CHECKSUM", CHECKSUM_PLACEHOLDER, "HDU checksum"));
        cards.push(HeaderCard::new("DATASUM", sum.to_string(), "data unit checksum"));
        Some(sum)
    } else {
        None
    };

    let mut header = encode_header(&cards);

    if let Some(datasum) = datasum {
        let sum = ones_complement_sum(&header, datasum);
        let encoded = encode_checksum(!sum);
        if let Some(offset) = find_card(&header, "CHECKSUM") {
            let start = offset + 11;
            header[start..start + 16].copy_from_slice(&encoded);
        }
    }

    header.extend(data);
    header
}

fn structural_cards(hdu: &Hdu, primary: bool) -> Vec<HeaderCard> {
    let mut cards = Vec::new();
    if primary {
        cards.push(HeaderCard::new("SIMPLE", true, "conforms to FITS standard"));
    } else {
        cards.push(HeaderCard::new("XTENSION", "IMAGE", "Image extension"));
    }
    cards.push(HeaderCard::new("BITPIX", 16, "array data type"));

    match &hdu.data {
        Some(data) => {
            cards.push(HeaderCard::new("NAXIS", 2, "number of array dimensions"));
            cards.push(HeaderCard::new("NAXIS1", data.width as i64, ""));
            cards.push(HeaderCard::new("NAXIS2", data.height as i64, ""));
        }
        None => cards.push(HeaderCard::new("NAXIS", 0, "number of array dimensions")),
    }

    if primary {
        cards.push(HeaderCard::new("EXTEND", true, ""));
    } else {
        cards.push(HeaderCard::new("PCOUNT", 0, "number of parameters"));
        cards.push(HeaderCard::new("GCOUNT", 1, "number of groups"));
        if let Some(name) = &hdu.name {
            cards.push(HeaderCard::new("EXTNAME", name.as_str(), "extension name"));
        }
    }

    if hdu.data.is_some() {
        cards.push(HeaderCard::new("BZERO", 32768, "offset data range to that of unsigned short"));
        cards.push(HeaderCard::new("BSCALE", 1, "default scaling factor"));
    }
    cards
}

fn encode_header(cards: &[HeaderCard]) -> Vec<u8> {
    let mut header = String::with_capacity(BLOCK_SIZE);
    for card in cards {
        header.push_str(&ascii_only(&card.to_record()));
    }
    header.push_str(&format!("{:<80}", "END"));

    let mut bytes = header.into_bytes();
    pad_to_block(&mut bytes, b' ');
    bytes
}

/// FITS headers are restricted to printable ASCII.
fn ascii_only(record: &str) -> String {
    let record: String = record
        .chars()
        .map(|c| if c.is_ascii() && !c.is_ascii_control() { c } else { '?' })
        .collect();
    format!("{:<80}", record)
}

fn encode_data(hdu: &Hdu) -> Vec<u8> {
    let Some(data) = &hdu.data else {
        return Vec::new();
    };

    let mut bytes = Vec::with_capacity(data.pixels.len() * 2);
    for pixel in &data.pixels {
        // Unsigned values are stored as signed shorts offset by BZERO.
        bytes.extend_from_slice(&(pixel ^ 0x8000).to_be_bytes());
    }
    pad_to_block(&mut bytes, 0);
    bytes
}

fn pad_to_block(bytes: &mut Vec<u8>, fill: u8) {
    let remainder = bytes.len() % BLOCK_SIZE;
    if remainder != 0 {
        bytes.resize(bytes.len() + BLOCK_SIZE - remainder, fill);
    }
}

fn find_card(header: &[u8], keyword: &str) -> Option<usize> {
    let prefix = format!("{:<8}=", keyword);
    header
        .chunks(CARD_LENGTH)
        .position(|record| record.starts_with(prefix.as_bytes()))
        .map(|index| index * CARD_LENGTH)
}

/// 32-bit ones' complement sum of big-endian words, added to `initial`.
pub fn ones_complement_sum(bytes: &[u8], initial: u32) -> u32 {
    let mut sum = initial as u64;
    for word in bytes.chunks(4) {
        let mut buffer = [0u8; 4];
        buffer[..word.len()].copy_from_slice(word);
        sum += u32::from_be_bytes(buffer) as u64;
        if sum > u32::MAX as u64 {
            sum = (sum & 0xFFFF_FFFF) + (sum >> 32);
        }
    }
    sum as u32
}

/// ASCII encoding of a checksum value, as used by the CHECKSUM keyword.
pub fn encode_checksum(value: u32) -> [u8; 16] {
    const EXCLUDED: [u8; 13] = [
        0x3a, 0x3b, 0x3c, 0x3d, 0x3e, 0x3f, 0x40, 0x5b, 0x5c, 0x5d, 0x5e, 0x5f, 0x60,
    ];
    const OFFSET: u8 = 0x30;

    let mut ascii = [0u8; 16];
    for byte_index in 0..4 {
        let byte = ((value >> (24 - 8 * byte_index)) & 0xFF) as u8;
        let quotient = byte / 4 + OFFSET;
        let remainder = byte % 4;

        let mut chars = [quotient; 4];
        chars[0] += remainder;

        loop {
            let mut adjusted = false;
            for excluded in EXCLUDED {
                for pair in [0, 2] {
                    if chars[pair] == excluded || chars[pair + 1] == excluded {
                        chars[pair] += 1;
                        chars[pair + 1] -= 1;
                        adjusted = true;
                    }
                }
            }
            if !adjusted {
                break;
            }
        }

        for (slot, value) in chars.iter().enumerate() {
            ascii[4 * slot + byte_index] = *value;
        }
    }

    // The card value starts one byte past a word boundary.
    let mut rotated = [0u8; 16];
    for (index, slot) in rotated.iter_mut().enumerate() {
        *slot = ascii[(index + 15) % 16];
    }
    rotated
}

/// Whether a serialized HDU (header plus data) has a valid CHECKSUM.
pub fn verify_hdu(bytes: &[u8]) -> bool {
    ones_complement_sum(bytes, 0) == u32::MAX
}

/// Value of a keyword in an encoded header, if present.
pub fn read_keyword(header: &[u8], keyword: &str) -> Option<HeaderValue> {
    let offset = find_card(header, keyword)?;
    let record = std::str::from_utf8(&header[offset..offset + CARD_LENGTH]).ok()?;
    let field = record.get(10..)?.trim_start();

    if let Some(quoted) = field.strip_prefix('\'') {
        let mut value = String::new();
        let mut chars = quoted.chars().peekable();
        while let Some(c) = chars.next() {
            if c == '\'' {
                if chars.peek() == Some(&'\'') {
                    chars.next();
                    value.push('\'');
                } else {
                    break;
                }
            } else {
                value.push(c);
            }
        }
        return Some(HeaderValue::Str(value.trim_end().to_string()));
    }

    let token = field.split('/').next().unwrap_or_default().trim();
    let value = match token {
        "" => HeaderValue::Null,
        "T" => HeaderValue::Bool(true),
        "F" => HeaderValue::Bool(false),
        other => match other.parse::<i64>() {
            Ok(int) => HeaderValue::Int(int),
            Err(_) => HeaderValue::Float(other.parse().ok()?),
        },
    };
    Some(value)
}
