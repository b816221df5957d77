use super::*;
use crate::error::Result;
use crate::exposure::{CameraIdentity, Exposure, ImageData, ImageType};
use chrono::{TimeZone, Utc};
use std::sync::Arc;

fn test_exposure() -> Exposure {
    let camera = CameraIdentity {
        name: "sim1".to_string(),
        uid: Some("DEV_0001".to_string()),
        version: Some("1.2.3".to_string()),
    };
    let mut exposure = Exposure::new(Some(camera), None);
    exposure.exptime = Some(2.5);
    exposure.exptime_n = Some(2.5);
    exposure.image_type = Some(ImageType::Object);
    exposure.set_obstime(Utc.with_ymd_and_hms(2020, 1, 10, 12, 0, 0).unwrap());
    exposure.data = Some(ImageData::new(3, 2, vec![0, 1, 2, 1000, 32768, 65535]).unwrap());
    exposure
}

fn evaluate(card: &Card, exposure: &Exposure, context: &Context) -> Result<HeaderCard> {
    card.evaluate(&EvalContext::new(exposure, context))
}

#[test]
fn test_card_name_trimmed() {
    let card = Card::new("VERYLONGNAME", 1, "");
    assert_eq!(card.name(), "VERYLONG");
}

#[test]
fn test_default_cards() {
    let exposure = test_exposure();
    let context = Context::new();

    for name in DEFAULT_CARD_NAMES {
        assert!(default_card(name).is_some(), "missing default card {}", name);
    }

    let exptime = evaluate(&Card::named("exptime"), &exposure, &context).unwrap();
    assert_eq!(exptime.keyword, "EXPTIME");
    assert_eq!(exptime.value, HeaderValue::Float(2.5));
    assert_eq!(exptime.comment, "Exposure time of single integration [s]");

    let camuid = evaluate(&Card::named("CAMUID"), &exposure, &context).unwrap();
    assert_eq!(camuid.value, HeaderValue::from("DEV_0001"));

    let imagetyp = evaluate(&Card::named("IMAGETYP"), &exposure, &context).unwrap();
    assert_eq!(imagetyp.value, HeaderValue::from("object"));

    let obstime = evaluate(&Card::named("OBSTIME"), &exposure, &context).unwrap();
    assert_eq!(obstime.value, HeaderValue::from("2020-01-10T12:00:37.000"));
}

#[test]
fn test_defaults_fill_missing_values() {
    let mut exposure = test_exposure();
    exposure.camera = None;
    let context = Context::new();

    let camname = evaluate(&Card::named("CAMNAME"), &exposure, &context).unwrap();
    assert_eq!(camname.value, HeaderValue::from("NA"));

    let stackfun = evaluate(&Card::named("STACKFUN"), &exposure, &context).unwrap();
    assert_eq!(stackfun.value, HeaderValue::from("NA"));

    // No default: an unknown placeholder is an error.
    let card = Card::new("OBSERVER", "{observer}", "");
    assert!(evaluate(&card, &exposure, &context).is_err());
}

#[test]
fn test_template_with_context_and_autocast() {
    let exposure = test_exposure();
    let mut context = Context::new();
    context.insert("observer".to_string(), HeaderValue::from("Jane"));
    context.insert("ccdtemp".to_string(), HeaderValue::from("-20.5"));

    let card = Card::new("OBSERVER", "{observer} at {camera.name}", "Observer");
    let evaluated = evaluate(&card, &exposure, &context).unwrap();
    assert_eq!(evaluated.value, HeaderValue::from("Jane at sim1"));

    let card = Card::new("CCDTEMP", "{ccdtemp}", "");
    let evaluated = evaluate(&card, &exposure, &context).unwrap();
    assert_eq!(evaluated.value, HeaderValue::Float(-20.5));

    let card = Card::new("CCDTEMP", "{ccdtemp}", "").with_autocast(false);
    let evaluated = evaluate(&card, &exposure, &context).unwrap();
    assert_eq!(evaluated.value, HeaderValue::from("-20.5"));

    assert_eq!(autocast(HeaderValue::from("TRUE")), HeaderValue::Bool(true));
    assert_eq!(autocast(HeaderValue::from("12")), HeaderValue::Int(12));
    assert_eq!(autocast(HeaderValue::from("sim1")), HeaderValue::from("sim1"));
}

#[test]
fn test_card_type_cast() {
    let exposure = test_exposure();
    let context = Context::new();

    let card = Card::new("EXPTIME", "{exposure.exptime}", "").with_type(CardType::Int);
    assert_eq!(evaluate(&card, &exposure, &context).unwrap().value, HeaderValue::Int(2));

    let card = Card::new("STACK", "{exposure.stack}", "").with_type(CardType::Str);
    assert_eq!(evaluate(&card, &exposure, &context).unwrap().value, HeaderValue::from("1"));

    let card = Card::new("BAD", "abc", "").with_type(CardType::Float);
    assert!(evaluate(&card, &exposure, &context).is_err());
}

#[test]
fn test_callable_card() {
    let exposure = test_exposure();
    let context = Context::new();

    let card = Card::callable(
        "MEAN",
        |ctx: &EvalContext<'_>| {
            let data = ctx.exposure().data.as_ref().map(|d| d.mean());
            Ok(HeaderValue::from(data))
        },
        "Mean value",
    );
    let evaluated = evaluate(&card, &exposure, &context).unwrap();
    assert!(matches!(evaluated.value, HeaderValue::Float(_)));

    let failing = Card::callable(
        "FAIL",
        |_: &EvalContext<'_>| Err(crate::error::BasecamError::card("boom")),
        "",
    )
    .with_default(-999);
    let evaluated = evaluate(&failing, &exposure, &context).unwrap();
    assert_eq!(evaluated.value, HeaderValue::Int(-999));
}

#[test]
fn test_card_group_banner() {
    let exposure = test_exposure();
    let context = Context::new();
    let ctx = EvalContext::new(&exposure, &context);

    let group = CardGroup::new([("TELESCOP", "APO-2.5"), ("OBSERVAT", "APO")]).with_name("site");
    let header = group.to_header(&ctx, None).unwrap();
    assert_eq!(header.len(), 3);
    assert_eq!(header.cards()[0].keyword, "COMMENT");
    assert_eq!(header.cards()[0].value.as_text(), "############ site ############");

    let header = group.to_header(&ctx, Some(false)).unwrap();
    assert_eq!(header.len(), 2);
}

#[derive(Debug)]
struct SensorMacro;

impl MacroCard for SensorMacro {
    fn name(&self) -> Option<&str> {
        Some("sensor")
    }

    fn cards(&self, _ctx: &EvalContext<'_>) -> Result<Vec<HeaderCard>> {
        Ok(vec![
            HeaderCard::new("CCDTEMP", -20.0, "Sensor temperature"),
            HeaderCard::new("GAIN", 1.5, "Gain [e-/ADU]"),
        ])
    }
}

#[test]
fn test_header_model() {
    let exposure = test_exposure();
    let context = Context::new();

    let mut model = HeaderModel::new(["EXPTIME", "CAMNAME"]);
    model.push(Card::new("TELESCOP", "APO-2.5", "The telescope"));
    model.push(Arc::new(SensorMacro) as Arc<dyn MacroCard>);
    model.insert(0, CardGroup::new([("ORIGIN", "basecam")]).with_group_title(false));

    let header = model.to_header(&exposure, &context).unwrap();
    let keywords: Vec<&str> = header.iter().map(|card| card.keyword.as_str()).collect();
    assert_eq!(
        keywords,
        ["ORIGIN", "EXPTIME", "CAMNAME", "TELESCOP", "COMMENT", "CCDTEMP", "GAIN"]
    );

    let description = model.describe();
    assert_eq!(description.len(), 5);
    assert_eq!(description[1].name, "EXPTIME");
    assert_eq!(description[1].value, "{exposure.exptime}");
    assert_eq!(description[4].name, "### MACRO");
}

#[test]
fn test_fits_model_extensions() {
    let exposure = test_exposure();
    let context = Context::new();

    let model = FitsModel::new(vec![]);
    assert_eq!(model.extensions().len(), 1);
    assert_eq!(model.extensions()[0].name.as_deref(), Some("DATA"));

    let model = FitsModel::new(vec![
        Extension::new(ExtensionData::Primary, None, Some("PRIMARY")),
        Extension::new(ExtensionData::Primary, None, Some("SECOND")),
        Extension::new(ExtensionData::None, None, Some("EMPTY")),
        Extension::new(ExtensionData::Array(ImageData::filled(2, 2, 7)), None, Some("FIXED")),
    ]);
    let hdus = model.to_hdus(&exposure, &context).unwrap();
    assert_eq!(hdus.len(), 4);
    assert!(hdus[0].name.is_none());
    assert!(hdus[0].data.is_some());
    assert_eq!(hdus[1].name.as_deref(), Some("SECOND"));
    assert!(hdus[1].data.is_none());
    assert!(hdus[2].data.is_none());
    assert_eq!(hdus[3].data.as_ref().unwrap().pixels, vec![7; 4]);
}

#[test]
fn test_basic_fits_model() {
    let exposure = test_exposure();
    let hdus = basic_fits_model().to_hdus(&exposure, &Context::new()).unwrap();
    assert_eq!(hdus.len(), 1);

    let header = &hdus[0].header;
    assert_eq!(header.value("TIMESYS"), Some(&HeaderValue::from("TAI")));
    assert_eq!(
        header.value("DATE-OBS"),
        Some(&HeaderValue::from("2020-01-10T12:00:37.000"))
    );
    assert_eq!(header.value("VCAM"), Some(&HeaderValue::from("1.2.3")));
    assert_eq!(
        header.value("BASECAMV"),
        Some(&HeaderValue::from(env!("CARGO_PKG_VERSION")))
    );
    assert_eq!(header.value("STACK"), Some(&HeaderValue::Int(1)));
}

#[test]
fn test_encoded_layout() {
    let exposure = test_exposure();
    let hdus = basic_fits_model().to_hdus(&exposure, &Context::new()).unwrap();
    let bytes = encode_hdus(&hdus, false);

    assert_eq!(bytes.len() % BLOCK_SIZE, 0);
    assert!(bytes.starts_with(b"SIMPLE  =                    T"));
    assert_eq!(read_keyword(&bytes, "BITPIX"), Some(HeaderValue::Int(16)));
    assert_eq!(read_keyword(&bytes, "NAXIS1"), Some(HeaderValue::Int(3)));
    assert_eq!(read_keyword(&bytes, "NAXIS2"), Some(HeaderValue::Int(2)));
    assert_eq!(read_keyword(&bytes, "BZERO"), Some(HeaderValue::Int(32768)));
    assert_eq!(read_keyword(&bytes, "EXPTIME"), Some(HeaderValue::Float(2.5)));
    assert_eq!(read_keyword(&bytes, "CAMNAME"), Some(HeaderValue::from("sim1")));
    assert!(read_keyword(&bytes, "CHECKSUM").is_none());

    // Data starts right after the single header block.
    let data = &bytes[BLOCK_SIZE..BLOCK_SIZE + 12];
    assert_eq!(&data[0..2], &[0x80, 0x00]);
    assert_eq!(&data[2..4], &[0x80, 0x01]);
    assert_eq!(&data[8..10], &[0x00, 0x00]);
    assert_eq!(&data[10..12], &[0x7f, 0xff]);
}

#[test]
fn test_extension_headers() {
    let exposure = test_exposure();
    let model = FitsModel::new(vec![
        Extension::new(ExtensionData::None, None, None),
        Extension::raw("RAW"),
    ]);
    let hdus = model.to_hdus(&exposure, &Context::new()).unwrap();

    let primary = encode_hdu(&hdus[0], true, false);
    assert_eq!(primary.len(), BLOCK_SIZE);
    assert_eq!(read_keyword(&primary, "NAXIS"), Some(HeaderValue::Int(0)));
    assert!(read_keyword(&primary, "BZERO").is_none());

    let extension = encode_hdu(&hdus[1], false, false);
    assert!(extension.starts_with(b"XTENSION= 'IMAGE   '"));
    assert_eq!(read_keyword(&extension, "PCOUNT"), Some(HeaderValue::Int(0)));
    assert_eq!(read_keyword(&extension, "GCOUNT"), Some(HeaderValue::Int(1)));
    assert_eq!(read_keyword(&extension, "EXTNAME"), Some(HeaderValue::from("RAW")));
}

#[test]
fn test_reserved_user_cards_are_dropped() {
    let mut header = Header::new();
    header.push(HeaderCard::new("BITPIX", 8, ""));
    header.push(HeaderCard::new("OBSERVER", "Jane", ""));
    let hdu = Hdu::new(None, None, header);

    let bytes = encode_hdu(&hdu, true, false);
    assert_eq!(read_keyword(&bytes, "BITPIX"), Some(HeaderValue::Int(16)));
    assert_eq!(read_keyword(&bytes, "OBSERVER"), Some(HeaderValue::from("Jane")));
}

#[test]
fn test_checksum() {
    let exposure = test_exposure();
    let hdus = basic_fits_model().to_hdus(&exposure, &Context::new()).unwrap();
    let bytes = encode_hdu(&hdus[0], true, true);

    assert!(verify_hdu(&bytes));

    let datasum = ones_complement_sum(&bytes[BLOCK_SIZE..], 0);
    assert_eq!(
        read_keyword(&bytes, "DATASUM"),
        Some(HeaderValue::Str(datasum.to_string()))
    );

    let checksum = read_keyword(&bytes, "CHECKSUM").unwrap().as_text();
    assert_eq!(checksum.len(), 16);
    assert!(checksum.bytes().all(|b| b.is_ascii_alphanumeric()));

    let mut corrupted = bytes.clone();
    corrupted[BLOCK_SIZE] ^= 0x01;
    assert!(!verify_hdu(&corrupted));
}

#[test]
fn test_checksum_encoding_of_zero_sum() {
    // A zero value encodes as sixteen ASCII zeros.
    assert_eq!(&encode_checksum(0), b"0000000000000000");
}
