use super::header::{Header, HeaderCard, HeaderValue};
use crate::error::{BasecamError, Result};
use crate::exposure::Exposure;
use regex::Regex;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, OnceLock};
use tracing::warn;

/// Extra values available to card templates, keyed by placeholder name.
pub type Context = HashMap<String, HeaderValue>;

type CardFn = Arc<dyn Fn(&EvalContext<'_>) -> Result<HeaderValue> + Send + Sync>;

/// Everything a card can refer to while it is evaluated.
pub struct EvalContext<'a> {
    exposure: &'a Exposure,
    context: &'a Context,
}

impl<'a> EvalContext<'a> {
    pub fn new(exposure: &'a Exposure, context: &'a Context) -> Self {
        Self { exposure, context }
    }

    pub fn exposure(&self) -> &Exposure {
        self.exposure
    }

    /// Resolve a placeholder. Context entries shadow the built-in keys.
    /// Returns `None` for unknown keys and `Null` for known keys without a
    /// value.
    pub fn lookup(&self, key: &str) -> Option<HeaderValue> {
        if let Some(value) = self.context.get(key) {
            return Some(value.clone());
        }

        let exposure = self.exposure;
        if let Some(field) = key.strip_prefix("camera.") {
            let camera = exposure.camera.as_ref()?;
            return match field {
                "name" => Some(camera.name.clone().into()),
                "uid" => Some(camera.uid.clone().into()),
                "version" => Some(camera.version.clone().into()),
                _ => None,
            };
        }

        let value = match key {
            "basecam.version" => HeaderValue::from(env!("CARGO_PKG_VERSION")),
            "exposure.exptime" => exposure.exptime.into(),
            "exposure.exptime_n" => exposure.exptime_n.into(),
            "exposure.stack" => exposure.stack.into(),
            "exposure.stack_function" => exposure.stack_function.clone().into(),
            "exposure.image_type" => exposure.image_type.map(|t| t.as_str()).into(),
            "exposure.obstime" => exposure.obstime_isot().into(),
            "exposure.obstime.tai" => exposure.obstime_tai_isot().into(),
            "exposure.filename" => exposure
                .filename
                .as_ref()
                .and_then(|path| path.file_name())
                .map(|name| name.to_string_lossy().into_owned())
                .into(),
            _ => return None,
        };
        Some(value)
    }
}

fn placeholder_regex() -> &'static Regex {
    static PLACEHOLDER: OnceLock<Regex> = OnceLock::new();
    PLACEHOLDER.get_or_init(|| {
        Regex::new(r"\{([A-Za-z0-9_][A-Za-z0-9_.\-]*)\}").expect("Invalid regex pattern")
    })
}

/// The value of a card before evaluation.
#[derive(Clone)]
pub enum CardValue {
    Literal(HeaderValue),
    /// A string whose `{placeholders}` are filled at evaluation time.
    Template(String),
    Callable(CardFn),
}

impl fmt::Debug for CardValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CardValue::Literal(value) => f.debug_tuple("Literal").field(value).finish(),
            CardValue::Template(template) => f.debug_tuple("Template").field(template).finish(),
            CardValue::Callable(_) => f.write_str("Callable(..)"),
        }
    }
}

impl fmt::Display for CardValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CardValue::Literal(value) => write!(f, "{}", value),
            CardValue::Template(template) => f.write_str(template),
            CardValue::Callable(_) => f.write_str("<callable>"),
        }
    }
}

impl From<&str> for CardValue {
    fn from(value: &str) -> Self {
        CardValue::Template(value.to_string())
    }
}

impl From<String> for CardValue {
    fn from(value: String) -> Self {
        CardValue::Template(value)
    }
}

impl From<HeaderValue> for CardValue {
    fn from(value: HeaderValue) -> Self {
        CardValue::Literal(value)
    }
}

macro_rules! literal_card_value {
    ($($ty:ty),*) => {
        $(impl From<$ty> for CardValue {
            fn from(value: $ty) -> Self {
                CardValue::Literal(value.into())
            }
        })*
    };
}

literal_card_value!(bool, i32, i64, u32, f64);

/// Target type a card value is cast to after evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CardType {
    Bool,
    Int,
    Float,
    Str,
}

impl CardType {
    fn cast(self, name: &str, value: HeaderValue) -> Result<HeaderValue> {
        let failed = |value: &HeaderValue| {
            BasecamError::card(format!(
                "cannot cast value {:?} of card {} to {:?}",
                value, name, self
            ))
        };

        let cast = match (self, &value) {
            (_, HeaderValue::Null) => HeaderValue::Null,
            (CardType::Str, other) => HeaderValue::Str(other.as_text()),
            (CardType::Bool, HeaderValue::Bool(b)) => HeaderValue::Bool(*b),
            (CardType::Bool, HeaderValue::Int(i)) => HeaderValue::Bool(*i != 0),
            (CardType::Bool, HeaderValue::Float(x)) => HeaderValue::Bool(*x != 0.0),
            (CardType::Bool, HeaderValue::Str(s)) => HeaderValue::Bool(!s.is_empty()),
            (CardType::Int, HeaderValue::Bool(b)) => HeaderValue::Int(*b as i64),
            (CardType::Int, HeaderValue::Int(i)) => HeaderValue::Int(*i),
            (CardType::Int, HeaderValue::Float(x)) => HeaderValue::Int(x.trunc() as i64),
            (CardType::Int, HeaderValue::Str(s)) => {
                HeaderValue::Int(s.trim().parse().map_err(|_| failed(&value))?)
            }
            (CardType::Float, HeaderValue::Bool(b)) => HeaderValue::Float(*b as i64 as f64),
            (CardType::Float, HeaderValue::Int(i)) => HeaderValue::Float(*i as f64),
            (CardType::Float, HeaderValue::Float(x)) => HeaderValue::Float(*x),
            (CardType::Float, HeaderValue::Str(s)) => {
                HeaderValue::Float(s.trim().parse().map_err(|_| failed(&value))?)
            }
        };
        Ok(cast)
    }
}

/// Convert strings that look like booleans or numbers.
pub fn autocast(value: HeaderValue) -> HeaderValue {
    let HeaderValue::Str(text) = &value else {
        return value;
    };

    if text.eq_ignore_ascii_case("true") {
        HeaderValue::Bool(true)
    } else if text.eq_ignore_ascii_case("false") {
        HeaderValue::Bool(false)
    } else if let Ok(int) = text.parse::<i64>() {
        HeaderValue::Int(int)
    } else if let Some(float) = text.parse::<f64>().ok().filter(|x| x.is_finite()) {
        HeaderValue::Float(float)
    } else {
        value
    }
}

/// A header entry evaluated lazily against an exposure.
#[derive(Debug, Clone)]
pub struct Card {
    name: String,
    value: CardValue,
    comment: String,
    default: Option<HeaderValue>,
    card_type: Option<CardType>,
    autocast: bool,
}

impl Card {
    /// Create a card. Names longer than 8 characters are trimmed.
    pub fn new(name: &str, value: impl Into<CardValue>, comment: &str) -> Self {
        let mut name = name.to_string();
        if name.chars().count() > 8 {
            warn!("Trimming card name {} to 8 characters", name);
            name = name.chars().take(8).collect();
        }

        Self {
            name,
            value: value.into(),
            comment: comment.to_string(),
            default: None,
            card_type: None,
            autocast: true,
        }
    }

    /// A card with a value computed when the card is evaluated.
    pub fn callable<F>(name: &str, func: F, comment: &str) -> Self
    where
        F: Fn(&EvalContext<'_>) -> Result<HeaderValue> + Send + Sync + 'static,
    {
        Self::new(name, CardValue::Callable(Arc::new(func)), comment)
    }

    /// The default card of that name, or an empty card.
    pub fn named(name: &str) -> Self {
        default_card(name).unwrap_or_else(|| Self::new(name, "", ""))
    }

    /// Value used when evaluation fails or yields no value.
    pub fn with_default(mut self, default: impl Into<HeaderValue>) -> Self {
        self.default = Some(default.into());
        self
    }

    pub fn with_type(mut self, card_type: CardType) -> Self {
        self.card_type = Some(card_type);
        self
    }

    pub fn with_autocast(mut self, autocast: bool) -> Self {
        self.autocast = autocast;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn value(&self) -> &CardValue {
        &self.value
    }

    pub fn comment(&self) -> &str {
        &self.comment
    }

    pub fn default_value(&self) -> Option<&HeaderValue> {
        self.default.as_ref()
    }

    /// Evaluate the card for the exposure in `ctx`.
    pub fn evaluate(&self, ctx: &EvalContext<'_>) -> Result<HeaderCard> {
        let rendered = match (self.evaluate_value(ctx), &self.default) {
            (Ok(HeaderValue::Null), Some(default)) => default.clone(),
            (Ok(value), _) => value,
            (Err(e), Some(default)) => {
                warn!("Failed evaluating card ({}, {}): {}", self.name, self.value, e);
                default.clone()
            }
            (Err(e), None) => return Err(e),
        };

        let value = match self.card_type {
            Some(card_type) => card_type.cast(&self.name, rendered)?,
            None if self.autocast => autocast(rendered),
            None => rendered,
        };

        Ok(HeaderCard::new(&self.name, value, &self.comment))
    }

    fn evaluate_value(&self, ctx: &EvalContext<'_>) -> Result<HeaderValue> {
        match &self.value {
            CardValue::Literal(value) => Ok(value.clone()),
            CardValue::Template(template) => render_template(template, ctx),
            CardValue::Callable(func) => func(ctx),
        }
    }
}

impl<V: Into<CardValue>> From<(&str, V)> for Card {
    fn from((name, value): (&str, V)) -> Self {
        Card::new(name, value, "")
    }
}

impl<V: Into<CardValue>> From<(&str, V, &str)> for Card {
    fn from((name, value, comment): (&str, V, &str)) -> Self {
        Card::new(name, value, comment)
    }
}

/// Fill the placeholders of a template. A template made of a single
/// placeholder keeps the type of the resolved value.
fn render_template(template: &str, ctx: &EvalContext<'_>) -> Result<HeaderValue> {
    let regex = placeholder_regex();

    let mut values = HashMap::new();
    for captures in regex.captures_iter(template) {
        let key = &captures[1];
        let value = ctx.lookup(key).ok_or_else(|| {
            BasecamError::card(format!("the context does not include placeholder {{{}}}", key))
        })?;
        values.insert(key.to_string(), value);
    }

    if values.is_empty() {
        return Ok(HeaderValue::Str(template.to_string()));
    }

    if values.len() == 1 {
        if let Some(whole) = regex.captures(template) {
            if &whole[0] == template {
                return Ok(values.remove(&whole[1]).unwrap_or(HeaderValue::Null));
            }
        }
    }

    let rendered = regex.replace_all(template, |captures: &regex::Captures<'_>| {
        values
            .get(&captures[1])
            .map(HeaderValue::as_text)
            .unwrap_or_default()
    });
    Ok(HeaderValue::Str(rendered.into_owned()))
}

/// Names of the built-in cards.
pub const DEFAULT_CARD_NAMES: [&str; 10] = [
    "EXPTIME", "EXPTIMEN", "STACK", "STACKFUN", "IMAGETYP", "OBSTIME", "CAMNAME", "CAMUID",
    "VCAM", "BASECAMV",
];

/// Built-in card by name, case-insensitive.
pub fn default_card(name: &str) -> Option<Card> {
    let card = match name.to_uppercase().as_str() {
        "EXPTIME" => Card::new(
            "EXPTIME",
            "{exposure.exptime}",
            "Exposure time of single integration [s]",
        ),
        "EXPTIMEN" => Card::new("EXPTIMEN", "{exposure.exptime_n}", "Total exposure time [s]"),
        "STACK" => Card::new("STACK", "{exposure.stack}", "Number of stacked frames")
            .with_default(1),
        "STACKFUN" => Card::new(
            "STACKFUN",
            "{exposure.stack_function}",
            "Function used for stacking",
        )
        .with_default("NA"),
        "IMAGETYP" => Card::new("IMAGETYP", "{exposure.image_type}", "The image type of the file"),
        "OBSTIME" => Card::new(
            "OBSTIME",
            "{exposure.obstime.tai}",
            "Time of the start of the exposure [TAI]",
        ),
        "CAMNAME" => Card::new("CAMNAME", "{camera.name}", "Camera name").with_default("NA"),
        "CAMUID" => Card::new("CAMUID", "{camera.uid}", "Camera UID").with_default("NA"),
        "VCAM" => Card::new("VCAM", "{camera.version}", "Version of the camera library")
            .with_default("NA"),
        "BASECAMV" => Card::new("BASECAMV", "{basecam.version}", "Version of basecam"),
        _ => return None,
    };
    Some(card)
}

/// A named list of cards evaluated together.
#[derive(Debug, Clone, Default)]
pub struct CardGroup {
    name: Option<String>,
    use_group_title: bool,
    cards: Vec<Card>,
}

impl CardGroup {
    pub fn new<I, C>(cards: I) -> Self
    where
        I: IntoIterator<Item = C>,
        C: Into<Card>,
    {
        Self {
            name: None,
            use_group_title: true,
            cards: cards.into_iter().map(Into::into).collect(),
        }
    }

    pub fn with_name(mut self, name: &str) -> Self {
        self.name = Some(name.to_string());
        self
    }

    pub fn with_group_title(mut self, use_group_title: bool) -> Self {
        self.use_group_title = use_group_title;
        self
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn cards(&self) -> &[Card] {
        &self.cards
    }

    pub fn push(&mut self, card: impl Into<Card>) {
        self.cards.push(card.into());
    }

    pub fn insert(&mut self, index: usize, card: impl Into<Card>) {
        let index = index.min(self.cards.len());
        self.cards.insert(index, card.into());
    }

    pub fn evaluate(&self, ctx: &EvalContext<'_>) -> Result<Vec<HeaderCard>> {
        self.cards.iter().map(|card| card.evaluate(ctx)).collect()
    }

    /// Evaluate the group. `use_group_title` overrides the group setting.
    pub fn to_header(&self, ctx: &EvalContext<'_>, use_group_title: Option<bool>) -> Result<Header> {
        let mut header: Header = self.evaluate(ctx)?.into_iter().collect();
        if use_group_title.unwrap_or(self.use_group_title) {
            if let Some(name) = &self.name {
                header.insert(0, group_banner(name));
            }
        }
        Ok(header)
    }
}

pub(crate) fn group_banner(name: &str) -> HeaderCard {
    HeaderCard::comment(&format!("{:#^30}", format!(" {} ", name)))
}

/// A generator of header cards computed from the exposure.
pub trait MacroCard: fmt::Debug + Send + Sync {
    /// Title used for the COMMENT banner.
    fn name(&self) -> Option<&str> {
        None
    }

    fn use_group_title(&self) -> bool {
        true
    }

    /// Produce the cards for this exposure.
    fn cards(&self, ctx: &EvalContext<'_>) -> Result<Vec<HeaderCard>>;

    fn to_header(&self, ctx: &EvalContext<'_>, use_group_title: Option<bool>) -> Result<Header> {
        let mut header: Header = self.cards(ctx)?.into_iter().collect();
        if use_group_title.unwrap_or_else(|| self.use_group_title()) {
            if let Some(name) = self.name() {
                header.insert(0, group_banner(name));
            }
        }
        Ok(header)
    }
}
