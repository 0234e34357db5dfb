//! Pull-parser wrapper and attribute helpers for the SpreadsheetML parts of `.xlsx` packages.

use crate::error::IngestError;
use quick_xml::escape::resolve_xml_entity;
use quick_xml::events::attributes::Attribute;
use quick_xml::events::BytesRef;
use quick_xml::events::BytesStart;
use quick_xml::events::Event;
use quick_xml::Reader;
use std::borrow::Cow;
use std::io::BufRead;
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum XmlError {
    #[error("Unknown XML entity '&{0};'")]
    ParseEntityError(String),

    #[error("Attribute value '{0}' has an unexpected format")]
    ParseAttributeValueError(String),
}

/// Event reader that reuses one buffer across events.
/// Empty elements are expanded so `<c/>` yields a matching Start and End.
pub(crate) struct XmlReader<R: BufRead> {
    reader: Reader<R>,
    buffer: Vec<u8>,
}

impl<R: BufRead> XmlReader<R> {
    pub(crate) fn new(source: R) -> XmlReader<R> {
        let mut reader = Reader::from_reader(source);
        let config = reader.config_mut();
        config.check_comments = false;
        config.check_end_names = false;
        config.expand_empty_elements = true;
        config.trim_text(false);

        XmlReader {
            reader,
            buffer: Vec::with_capacity(1024),
        }
    }

    pub(crate) fn next(&'_ mut self) -> Result<Option<Event<'_>>, IngestError> {
        self.buffer.clear();
        match self.reader.read_event_into(&mut self.buffer)? {
            Event::Eof => Ok(None),
            event => Ok(Some(event)),
        }
    }
}

pub(crate) trait XmlAttributeHelper<'a> {
    fn get_value(&self) -> Result<Cow<'a, str>, IngestError>;
}

impl<'a> XmlAttributeHelper<'a> for Attribute<'a> {
    fn get_value(&self) -> Result<Cow<'a, str>, IngestError> {
        Ok(self.unescape_value()?)
    }
}

pub(crate) trait XmlNodeHelper<'a> {
    /// Unescaped value of the named attribute, if present.
    fn get_attribute_value(&'a self, name: &str) -> Result<Option<Cow<'a, str>>, IngestError>;

    /// Parses the named attribute; an unparsable value is an error, a missing one is `None`.
    fn parse_attribute_value<T: FromStr>(&'a self, name: &str) -> Result<Option<T>, IngestError>;
}

impl<'a> XmlNodeHelper<'a> for BytesStart<'a> {
    fn get_attribute_value(&'a self, name: &str) -> Result<Option<Cow<'a, str>>, IngestError> {
        self.try_get_attribute(name)?
            .map(|attribute| attribute.get_value())
            .transpose()
    }

    fn parse_attribute_value<T: FromStr>(&'a self, name: &str) -> Result<Option<T>, IngestError> {
        match self.get_attribute_value(name)? {
            Some(value) if !value.is_empty() => value
                .parse()
                .map(Some)
                .map_err(|_| XmlError::ParseAttributeValueError(value.to_string()).into()),
            _ => Ok(None),
        }
    }
}

pub(crate) trait XmlTextContextHelper {
    /// Appends the text behind an entity or character reference such as `&amp;` or `&#x11F;`.
    fn push_bytes_ref(&mut self, bytes: &BytesRef) -> Result<(), IngestError>;
}

impl XmlTextContextHelper for String {
    fn push_bytes_ref(&mut self, bytes: &BytesRef) -> Result<(), IngestError> {
        let raw = bytes.xml_content()?;
        if let Some(number) = raw.strip_prefix('#') {
            let code = match number.strip_prefix('x') {
                Some(hex) => u32::from_str_radix(hex, 16)?,
                None => number.parse::<u32>()?,
            };
            if let Some(character) = char::from_u32(code) {
                self.push(character);
            }
        } else if let Some(entity) = resolve_xml_entity(&raw) {
            self.push_str(entity);
        } else {
            Err(XmlError::ParseEntityError(raw.to_string()))?;
        }
        Ok(())
    }
}

#[macro_export]
macro_rules! match_xml_events {
    ($reader:expr => { $($arms:tt)* }) => {
        while let Some(result) = $reader.next()? {
            match result {
                Event::Eof => break,
                $($arms)*
                _ => (),
            }
        }
    };
}
