//! Lazily evaluated FITS data model and the writer that serializes it.

mod card;
mod header;
mod model;
mod writer;
#[cfg(test)]
mod tests;

pub use card::{
    autocast, default_card, Card, CardGroup, CardType, CardValue, Context, EvalContext, MacroCard,
    DEFAULT_CARD_NAMES,
};
pub use header::{Header, HeaderCard, HeaderValue, CARD_LENGTH};
pub use model::{
    basic_fits_model, basic_header_model, CardDescription, Extension, ExtensionData, FitsModel,
    Hdu, HeaderItem, HeaderModel,
};
pub use writer::{
    encode_checksum, encode_hdu, encode_hdus, ones_complement_sum, read_keyword, verify_hdu,
    BLOCK_SIZE,
};
