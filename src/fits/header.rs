use serde::{Deserialize, Serialize};
use std::fmt;

/// Length of a FITS header record.
pub const CARD_LENGTH: usize = 80;

/// A typed header value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum HeaderValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    /// Undefined value; the value field is left blank.
    Null,
}

impl HeaderValue {
    /// Render the value as it appears in the value field of a card.
    pub fn to_fits(&self) -> String {
        match self {
            HeaderValue::Bool(value) => format!("{:>20}", if *value { "T" } else { "F" }),
            HeaderValue::Int(value) => format!("{:>20}", value),
            HeaderValue::Float(value) => {
                if value.is_finite() {
                    format!("{:>20}", format_float(*value))
                } else {
                    String::new()
                }
            }
            HeaderValue::Str(value) => format!("'{:<8}'", escape_string(value)),
            HeaderValue::Null => String::new(),
        }
    }

    /// The value as plain text, without FITS quoting.
    pub fn as_text(&self) -> String {
        match self {
            HeaderValue::Bool(value) => value.to_string(),
            HeaderValue::Int(value) => value.to_string(),
            HeaderValue::Float(value) => format_float(*value),
            HeaderValue::Str(value) => value.clone(),
            HeaderValue::Null => String::new(),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, HeaderValue::Null)
    }
}

/// Longest escaped string that fits between the quotes of a single record.
const MAX_STRING_LENGTH: usize = CARD_LENGTH - 12;

/// Double the quotes, clipping so the closing quote stays on the record.
/// A doubled quote is never split.
fn escape_string(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len().min(MAX_STRING_LENGTH));
    for c in value.chars() {
        let width = if c == '\'' { 2 } else { c.len_utf8() };
        if escaped.len() + width > MAX_STRING_LENGTH {
            break;
        }
        if c == '\'' {
            escaped.push_str("''");
        } else {
            escaped.push(c);
        }
    }
    escaped
}

/// Floats always carry a decimal point or exponent so they read back as reals.
fn format_float(value: f64) -> String {
    format!("{:?}", value).replace('e', "E")
}

impl fmt::Display for HeaderValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_text())
    }
}

impl From<bool> for HeaderValue {
    fn from(value: bool) -> Self {
        HeaderValue::Bool(value)
    }
}

impl From<i64> for HeaderValue {
    fn from(value: i64) -> Self {
        HeaderValue::Int(value)
    }
}

impl From<i32> for HeaderValue {
    fn from(value: i32) -> Self {
        HeaderValue::Int(value as i64)
    }
}

impl From<u32> for HeaderValue {
    fn from(value: u32) -> Self {
        HeaderValue::Int(value as i64)
    }
}

impl From<f64> for HeaderValue {
    fn from(value: f64) -> Self {
        HeaderValue::Float(value)
    }
}

impl From<&str> for HeaderValue {
    fn from(value: &str) -> Self {
        HeaderValue::Str(value.to_string())
    }
}

impl From<String> for HeaderValue {
    fn from(value: String) -> Self {
        HeaderValue::Str(value)
    }
}

impl<T: Into<HeaderValue>> From<Option<T>> for HeaderValue {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(HeaderValue::Null)
    }
}

/// An evaluated header record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeaderCard {
    pub keyword: String,
    pub value: HeaderValue,
    pub comment: String,
}

impl HeaderCard {
    pub fn new(keyword: &str, value: impl Into<HeaderValue>, comment: &str) -> Self {
        Self {
            keyword: keyword.to_uppercase(),
            value: value.into(),
            comment: comment.to_string(),
        }
    }

    /// A `COMMENT` record.
    pub fn comment(text: &str) -> Self {
        Self {
            keyword: "COMMENT".to_string(),
            value: HeaderValue::Str(text.to_string()),
            comment: String::new(),
        }
    }

    pub fn is_commentary(&self) -> bool {
        matches!(self.keyword.as_str(), "COMMENT" | "HISTORY" | "")
    }

    /// Format as an 80-character record. Overlong comments are truncated.
    pub fn to_record(&self) -> String {
        let mut record = if self.is_commentary() {
            format!("{:<8}{}", self.keyword, self.value.as_text())
        } else {
            let mut record = format!("{:<8}= {}", self.keyword, self.value.to_fits());
            if !self.comment.is_empty() {
                if record.len() < 30 {
                    record = format!("{:<30}", record);
                }
                record.push_str(" / ");
                record.push_str(&self.comment);
            }
            record
        };

        if record.len() > CARD_LENGTH {
            let mut end = CARD_LENGTH;
            while !record.is_char_boundary(end) {
                end -= 1;
            }
            record.truncate(end);
        }
        format!("{:<80}", record)
    }
}

/// An ordered list of header records.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Header {
    cards: Vec<HeaderCard>,
}

impl Header {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, card: HeaderCard) {
        self.cards.push(card);
    }

    pub fn insert(&mut self, index: usize, card: HeaderCard) {
        let index = index.min(self.cards.len());
        self.cards.insert(index, card);
    }

    pub fn extend(&mut self, other: Header) {
        self.cards.extend(other.cards);
    }

    /// First card with this keyword.
    pub fn get(&self, keyword: &str) -> Option<&HeaderCard> {
        let keyword = keyword.to_uppercase();
        self.cards.iter().find(|card| card.keyword == keyword)
    }

    /// Value of the first card with this keyword.
    pub fn value(&self, keyword: &str) -> Option<&HeaderValue> {
        self.get(keyword).map(|card| &card.value)
    }

    /// Remove every card with this keyword.
    pub fn remove(&mut self, keyword: &str) {
        let keyword = keyword.to_uppercase();
        self.cards.retain(|card| card.keyword != keyword);
    }

    pub fn cards(&self) -> &[HeaderCard] {
        &self.cards
    }

    pub fn len(&self) -> usize {
        self.cards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cards.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &HeaderCard> {
        self.cards.iter()
    }
}

impl FromIterator<HeaderCard> for Header {
    fn from_iter<I: IntoIterator<Item = HeaderCard>>(iter: I) -> Self {
        Self {
            cards: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_layout() {
        let record = HeaderCard::new("exptime", 1.0, "Exposure time [s]").to_record();
        assert_eq!(record.len(), 80);
        assert!(record.starts_with("EXPTIME =                  1.0 / Exposure time [s]"));

        let record = HeaderCard::new("SIMPLE", true, "").to_record();
        assert_eq!(&record[..30], "SIMPLE  =                    T");
    }

    #[test]
    fn test_string_values_are_quoted_and_padded() {
        let record = HeaderCard::new("IMAGETYP", "bias", "").to_record();
        assert!(record.starts_with("IMAGETYP= 'bias    '"));

        let record = HeaderCard::new("OBSERVER", "O'Neil", "").to_record();
        assert!(record.starts_with("OBSERVER= 'O''Neil '"));
    }

    #[test]
    fn test_long_strings_keep_closing_quote() {
        let record = HeaderCard::new("FILENAME", "x".repeat(100), "").to_record();
        assert_eq!(record.len(), 80);
        assert_eq!(record, format!("FILENAME= '{}'", "x".repeat(68)));

        let record = HeaderCard::new("FILENAME", "x".repeat(100), "Image file").to_record();
        assert!(record.ends_with("x'"));

        // A quote that would straddle the limit is dropped whole.
        let value = format!("{}'y", "x".repeat(67));
        let record = HeaderCard::new("OBSERVER", value, "").to_record();
        assert_eq!(record.trim_end(), format!("OBSERVER= '{}'", "x".repeat(67)));

        let value = format!("{}'y", "x".repeat(66));
        let record = HeaderCard::new("OBSERVER", value, "").to_record();
        assert_eq!(record.trim_end(), format!("OBSERVER= '{}'''", "x".repeat(66)));
    }

    #[test]
    fn test_null_and_commentary() {
        let record = HeaderCard::new("STACKFUN", HeaderValue::Null, "Stacking").to_record();
        assert!(record.starts_with("STACKFUN= "));
        assert!(record.contains("/ Stacking"));

        let record = HeaderCard::comment("#### sensor ####").to_record();
        assert!(record.starts_with("COMMENT #### sensor ####"));
    }

    #[test]
    fn test_long_comment_truncated() {
        let comment = "x".repeat(120);
        assert_eq!(HeaderCard::new("A", 1, &comment).to_record().len(), 80);
    }

    #[test]
    fn test_float_formatting() {
        assert_eq!(HeaderValue::Float(2.0).as_text(), "2.0");
        assert_eq!(HeaderValue::Float(0.25).as_text(), "0.25");
        assert_eq!(HeaderValue::Float(1e-30).as_text(), "1E-30");
        assert_eq!(HeaderValue::Float(f64::NAN).to_fits(), "");
    }

    #[test]
    fn test_header_lookup() {
        let mut header = Header::new();
        header.push(HeaderCard::new("CAMNAME", "sim1", ""));
        header.insert(0, HeaderCard::comment("start"));
        assert_eq!(header.value("camname"), Some(&HeaderValue::from("sim1")));
        assert_eq!(header.cards()[0].keyword, "COMMENT");
        header.remove("CAMNAME");
        assert!(header.get("CAMNAME").is_none());
    }
}
