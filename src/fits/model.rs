use super::card::{Card, CardGroup, Context, EvalContext, MacroCard};
use super::header::{Header, HeaderCard};
use crate::error::Result;
use crate::exposure::{Exposure, ImageData};
use serde::Serialize;
use std::sync::Arc;

/// One entry of a header model.
#[derive(Debug, Clone)]
pub enum HeaderItem {
    Card(Card),
    Group(CardGroup),
    Macro(Arc<dyn MacroCard>),
}

impl From<Card> for HeaderItem {
    fn from(card: Card) -> Self {
        HeaderItem::Card(card)
    }
}

impl From<CardGroup> for HeaderItem {
    fn from(group: CardGroup) -> Self {
        HeaderItem::Group(group)
    }
}

impl From<Arc<dyn MacroCard>> for HeaderItem {
    fn from(macro_card: Arc<dyn MacroCard>) -> Self {
        HeaderItem::Macro(macro_card)
    }
}

impl From<&str> for HeaderItem {
    fn from(name: &str) -> Self {
        HeaderItem::Card(Card::named(name))
    }
}

/// Row of [`HeaderModel::describe`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CardDescription {
    pub name: String,
    pub value: String,
    pub comment: String,
}

/// The cards that make up the header of an HDU.
#[derive(Debug, Clone, Default)]
pub struct HeaderModel {
    items: Vec<HeaderItem>,
}

impl HeaderModel {
    pub fn new<I, T>(items: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<HeaderItem>,
    {
        Self {
            items: items.into_iter().map(Into::into).collect(),
        }
    }

    pub fn push(&mut self, item: impl Into<HeaderItem>) {
        self.items.push(item.into());
    }

    pub fn insert(&mut self, index: usize, item: impl Into<HeaderItem>) {
        let index = index.min(self.items.len());
        self.items.insert(index, item.into());
    }

    pub fn items(&self) -> &[HeaderItem] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Evaluate every card for the exposure.
    pub fn to_header(&self, exposure: &Exposure, context: &Context) -> Result<Header> {
        let ctx = EvalContext::new(exposure, context);
        let mut header = Header::new();
        for item in &self.items {
            match item {
                HeaderItem::Card(card) => header.push(card.evaluate(&ctx)?),
                HeaderItem::Group(group) => header.extend(group.to_header(&ctx, None)?),
                HeaderItem::Macro(macro_card) => header.extend(macro_card.to_header(&ctx, None)?),
            }
        }
        Ok(header)
    }

    /// A table-like listing of the model, without evaluating it.
    pub fn describe(&self) -> Vec<CardDescription> {
        let describe_card = |card: &Card| CardDescription {
            name: card.name().to_uppercase(),
            value: card.value().to_string(),
            comment: card.comment().to_string(),
        };

        let mut rows = Vec::new();
        for item in &self.items {
            match item {
                HeaderItem::Card(card) => rows.push(describe_card(card)),
                HeaderItem::Group(group) => rows.extend(group.cards().iter().map(describe_card)),
                HeaderItem::Macro(macro_card) => rows.push(CardDescription {
                    name: "### MACRO".to_string(),
                    value: macro_card.name().unwrap_or("unnamed").to_string(),
                    comment: String::new(),
                }),
            }
        }
        rows
    }
}

/// Where the data of an extension comes from.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum ExtensionData {
    /// The exposure image.
    Raw,
    /// No data.
    None,
    /// The exposure image if this is the primary HDU, otherwise nothing.
    #[default]
    Primary,
    /// A fixed array.
    Array(ImageData),
}

/// An evaluated HDU, ready to be written.
#[derive(Debug, Clone, PartialEq)]
pub struct Hdu {
    pub name: Option<String>,
    pub data: Option<ImageData>,
    pub header: Header,
}

impl Hdu {
    pub fn new(name: Option<&str>, data: Option<ImageData>, header: Header) -> Self {
        Self {
            name: name.map(str::to_string),
            data,
            header,
        }
    }

    pub fn push_card(&mut self, card: HeaderCard) {
        self.header.push(card);
    }
}

/// Model of one FITS extension.
#[derive(Debug, Clone, Default)]
pub struct Extension {
    pub data: ExtensionData,
    pub header_model: Option<HeaderModel>,
    pub name: Option<String>,
}

impl Extension {
    pub fn new(data: ExtensionData, header_model: Option<HeaderModel>, name: Option<&str>) -> Self {
        Self {
            data,
            header_model,
            name: name.map(str::to_string),
        }
    }

    /// An extension holding the raw image.
    pub fn raw(name: &str) -> Self {
        Self::new(ExtensionData::Raw, None, Some(name))
    }

    pub fn with_header_model(mut self, header_model: HeaderModel) -> Self {
        self.header_model = Some(header_model);
        self
    }

    /// Evaluate the extension. The primary HDU carries no name.
    pub fn to_hdu(&self, exposure: &Exposure, primary: bool, context: &Context) -> Result<Hdu> {
        let header = match &self.header_model {
            Some(model) => model.to_header(exposure, context)?,
            None => Header::new(),
        };
        let name = if primary { None } else { self.name.as_deref() };
        Ok(Hdu::new(name, self.data(exposure, primary), header))
    }

    fn data(&self, exposure: &Exposure, primary: bool) -> Option<ImageData> {
        match &self.data {
            ExtensionData::Raw => exposure.data.clone(),
            ExtensionData::None => None,
            ExtensionData::Primary if primary => exposure.data.clone(),
            ExtensionData::Primary => None,
            ExtensionData::Array(data) => Some(data.clone()),
        }
    }
}

/// Model of a whole FITS file. Never empty.
#[derive(Debug, Clone)]
pub struct FitsModel {
    extensions: Vec<Extension>,
}

impl FitsModel {
    /// Create a model. An empty list yields a single raw `DATA` extension.
    pub fn new(extensions: Vec<Extension>) -> Self {
        let mut extensions = extensions;
        if extensions.is_empty() {
            extensions.push(Extension::raw("DATA"));
        }
        Self { extensions }
    }

    pub fn extensions(&self) -> &[Extension] {
        &self.extensions
    }

    pub fn push(&mut self, extension: Extension) {
        self.extensions.push(extension);
    }

    /// Evaluate every extension. The first one becomes the primary HDU.
    pub fn to_hdus(&self, exposure: &Exposure, context: &Context) -> Result<Vec<Hdu>> {
        self.extensions
            .iter()
            .enumerate()
            .map(|(index, extension)| extension.to_hdu(exposure, index == 0, context))
            .collect()
    }
}

impl Default for FitsModel {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

/// Camera and exposure cards plus the observation date in TAI.
pub fn basic_header_model() -> HeaderModel {
    let mut model = HeaderModel::new([
        "VCAM", "BASECAMV", "CAMNAME", "CAMUID", "IMAGETYP", "EXPTIME", "EXPTIMEN", "STACK",
        "STACKFUN",
    ]);
    model.push(Card::new("TIMESYS", "TAI", "The time scale system"));
    model.push(Card::new(
        "DATE-OBS",
        "{exposure.obstime.tai}",
        "Date (in TIMESYS) the exposure started",
    ));
    model
}

/// A single primary HDU with the raw image and [`basic_header_model`].
pub fn basic_fits_model() -> FitsModel {
    FitsModel::new(vec![
        Extension::raw("PRIMARY").with_header_model(basic_header_model())
    ])
}
