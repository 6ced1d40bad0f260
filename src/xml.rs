//! XML topology documents.
//!
//! iiod describes its devices with an XML document (the reply to `PRINT`);
//! the same format can be loaded from a file to build an offline context
//! with [`create_context_from_xml`]. [`parse`] and [`to_xml`] convert
//! between the document and a [`ContextDesc`] without losing any field.

use std::path::Path;
use std::sync::Arc;

use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};
use tracing::{debug, warn};

use crate::backend::Backend;
use crate::channel::{ChannelAttr, ChannelDesc, DataFormat};
use crate::context::{Context, ContextDesc};
use crate::device::DeviceDesc;
use crate::error::{IioError, Result};

const DOCTYPE: &str = "context [\
<!ELEMENT context (device | context-attribute)*>\
<!ELEMENT context-attribute EMPTY>\
<!ELEMENT device (channel | attribute | debug-attribute | buffer-attribute)*>\
<!ELEMENT channel (scan-element?, attribute*)>\
<!ELEMENT attribute EMPTY>\
<!ELEMENT scan-element EMPTY>\
<!ELEMENT debug-attribute EMPTY>\
<!ELEMENT buffer-attribute EMPTY>\
<!ATTLIST context name CDATA #REQUIRED description CDATA #IMPLIED>\
<!ATTLIST context-attribute name CDATA #REQUIRED value CDATA #REQUIRED>\
<!ATTLIST device id CDATA #REQUIRED name CDATA #IMPLIED label CDATA #IMPLIED>\
<!ATTLIST channel id CDATA #REQUIRED type (input|output) #REQUIRED name CDATA #IMPLIED>\
<!ATTLIST scan-element index CDATA #REQUIRED format CDATA #REQUIRED scale CDATA #IMPLIED>\
<!ATTLIST attribute name CDATA #REQUIRED filename CDATA #IMPLIED>\
<!ATTLIST debug-attribute name CDATA #REQUIRED>\
<!ATTLIST buffer-attribute name CDATA #REQUIRED>\
]";

fn xml_error(message: impl Into<String>) -> IioError {
    IioError::Xml {
        message: message.into(),
    }
}

// =============================================================================
// Parsing
// =============================================================================

struct Attrs(Vec<(String, String)>);

impl Attrs {
    fn of(e: &BytesStart<'_>) -> Result<Self> {
        let mut attrs = Vec::new();
        for attr in e.attributes() {
            let attr = attr.map_err(|err| xml_error(err.to_string()))?;
            let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
            let value = attr
                .unescape_value()
                .map_err(|err| xml_error(err.to_string()))?
                .into_owned();
            attrs.push((key, value));
        }
        Ok(Self(attrs))
    }

    fn get(&self, key: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    fn require(&self, key: &str, element: &str) -> Result<&str> {
        self.get(key)
            .ok_or_else(|| xml_error(format!("<{element}> without '{key}'")))
    }
}

#[derive(Default)]
struct Parser {
    ctx: Option<ContextDesc>,
    device: Option<DeviceDesc>,
    channel: Option<ChannelDesc>,
    finished: bool,
    skip_depth: usize,
}

impl Parser {
    fn start(&mut self, e: &BytesStart<'_>, empty: bool) -> Result<()> {
        if self.skip_depth > 0 {
            if !empty {
                self.skip_depth += 1;
            }
            return Ok(());
        }

        let name = e.name();
        let element = String::from_utf8_lossy(name.as_ref()).into_owned();
        let attrs = Attrs::of(e)?;

        match element.as_str() {
            "context" => {
                if self.ctx.is_some() || self.finished {
                    return Err(xml_error("nested <context>"));
                }
                let mut ctx = ContextDesc::new(attrs.get("name").unwrap_or("xml"));
                ctx.description = attrs.get("description").unwrap_or_default().to_string();
                self.ctx = Some(ctx);
            }
            "context-attribute" => {
                let ctx = self.ctx.as_mut().ok_or_else(|| misplaced(&element))?;
                let key = attrs.require("name", &element)?;
                let value = attrs.require("value", &element)?;
                ctx.set_attr(key, value);
            }
            "device" => {
                if self.ctx.is_none() || self.device.is_some() {
                    return Err(misplaced(&element));
                }
                let mut dev = DeviceDesc::new(attrs.require("id", &element)?);
                dev.name = attrs.get("name").map(str::to_string);
                dev.label = attrs.get("label").map(str::to_string);
                self.device = Some(dev);
            }
            "channel" => {
                if self.device.is_none() || self.channel.is_some() {
                    return Err(misplaced(&element));
                }
                let is_output = match attrs.get("type") {
                    Some("output") => true,
                    Some("input") => false,
                    other => {
                        return Err(xml_error(format!("invalid channel type {other:?}")));
                    }
                };
                let mut chn = ChannelDesc::new(attrs.require("id", &element)?, is_output);
                chn.name = attrs.get("name").map(str::to_string);
                self.channel = Some(chn);
            }
            "scan-element" => {
                let chn = self.channel.as_mut().ok_or_else(|| misplaced(&element))?;
                let index = attrs.require("index", &element)?;
                let index: u32 = index
                    .parse()
                    .map_err(|_| xml_error(format!("invalid scan index '{index}'")))?;
                let mut format: DataFormat = attrs
                    .require("format", &element)?
                    .parse()
                    .map_err(|e: IioError| xml_error(e.to_string()))?;
                if let Some(scale) = attrs.get("scale") {
                    format.scale = Some(
                        scale
                            .parse()
                            .map_err(|_| xml_error(format!("invalid scale '{scale}'")))?,
                    );
                }
                chn.scan_index = Some(index);
                chn.format = format;
            }
            "attribute" => {
                let name = attrs.require("name", &element)?;
                if let Some(chn) = self.channel.as_mut() {
                    chn.attrs.push(ChannelAttr {
                        name: name.to_string(),
                        filename: attrs.get("filename").map(str::to_string),
                    });
                } else if let Some(dev) = self.device.as_mut() {
                    dev.attrs.push(name.to_string());
                } else {
                    return Err(misplaced(&element));
                }
            }
            "debug-attribute" | "buffer-attribute" => {
                let name = attrs.require("name", &element)?.to_string();
                let dev = match (&self.channel, self.device.as_mut()) {
                    (None, Some(dev)) => dev,
                    _ => return Err(misplaced(&element)),
                };
                if element == "debug-attribute" {
                    dev.debug_attrs.push(name);
                } else {
                    dev.buffer_attrs.push(name);
                }
            }
            _ => {
                warn!(element = %element, "Skipping unknown element in topology document");
                if !empty {
                    self.skip_depth = 1;
                }
                return Ok(());
            }
        }

        if empty {
            self.end(name.as_ref())?;
        }
        Ok(())
    }

    fn end(&mut self, name: &[u8]) -> Result<()> {
        if self.skip_depth > 0 {
            self.skip_depth -= 1;
            return Ok(());
        }
        match name {
            b"channel" => {
                if let (Some(chn), Some(dev)) = (self.channel.take(), self.device.as_mut()) {
                    dev.channels.push(chn);
                }
            }
            b"device" => {
                if let (Some(dev), Some(ctx)) = (self.device.take(), self.ctx.as_mut()) {
                    ctx.devices.push(dev);
                }
            }
            b"context" => self.finished = true,
            _ => {}
        }
        Ok(())
    }
}

fn misplaced(element: &str) -> IioError {
    xml_error(format!("<{element}> is not allowed here"))
}

/// Parse a topology document.
///
/// Unknown elements are skipped with a warning; missing required
/// attributes, a root other than `<context>` or a malformed format string
/// are errors.
pub fn parse(xml: &str) -> Result<ContextDesc> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    let mut parser = Parser::default();
    loop {
        match reader.read_event()? {
            Event::Start(e) => {
                if parser.ctx.is_none() && e.name().as_ref() != b"context" {
                    return Err(xml_error("root element is not <context>"));
                }
                parser.start(&e, false)?;
            }
            Event::Empty(e) => {
                if parser.ctx.is_none() && e.name().as_ref() != b"context" {
                    return Err(xml_error("root element is not <context>"));
                }
                parser.start(&e, true)?;
            }
            Event::End(e) => parser.end(e.name().as_ref())?,
            Event::Eof => break,
            _ => {}
        }
    }

    match parser.ctx {
        Some(ctx) if parser.finished => {
            debug!(devices = ctx.devices.len(), "Parsed topology document");
            Ok(ctx)
        }
        Some(_) => Err(xml_error("unterminated <context>")),
        None => Err(xml_error("no <context> element")),
    }
}

// =============================================================================
// Serialisation
// =============================================================================

fn emit<W: std::io::Write>(writer: &mut Writer<W>, event: Event<'_>) -> Result<()> {
    writer
        .write_event(event)
        .map_err(|e| xml_error(e.to_string()))
}

fn write_channel<W: std::io::Write>(writer: &mut Writer<W>, chn: &ChannelDesc) -> Result<()> {
    let mut el = BytesStart::new("channel");
    el.push_attribute(("id", chn.id.as_str()));
    if let Some(name) = &chn.name {
        el.push_attribute(("name", name.as_str()));
    }
    el.push_attribute(("type", if chn.is_output { "output" } else { "input" }));
    emit(writer, Event::Start(el))?;

    if let Some(index) = chn.scan_index {
        let index = index.to_string();
        let format = chn.format.to_string();
        let mut el = BytesStart::new("scan-element");
        el.push_attribute(("index", index.as_str()));
        el.push_attribute(("format", format.as_str()));
        let scale = chn.format.scale.map(|s| s.to_string());
        if let Some(scale) = &scale {
            el.push_attribute(("scale", scale.as_str()));
        }
        emit(writer, Event::Empty(el))?;
    }

    for attr in &chn.attrs {
        let mut el = BytesStart::new("attribute");
        el.push_attribute(("name", attr.name.as_str()));
        if let Some(filename) = &attr.filename {
            el.push_attribute(("filename", filename.as_str()));
        }
        emit(writer, Event::Empty(el))?;
    }

    emit(writer, Event::End(BytesEnd::new("channel")))
}

fn write_device<W: std::io::Write>(writer: &mut Writer<W>, dev: &DeviceDesc) -> Result<()> {
    let mut el = BytesStart::new("device");
    el.push_attribute(("id", dev.id.as_str()));
    if let Some(name) = &dev.name {
        el.push_attribute(("name", name.as_str()));
    }
    if let Some(label) = &dev.label {
        el.push_attribute(("label", label.as_str()));
    }
    emit(writer, Event::Start(el))?;

    for chn in &dev.channels {
        write_channel(writer, chn)?;
    }
    let tables = [
        ("attribute", &dev.attrs),
        ("debug-attribute", &dev.debug_attrs),
        ("buffer-attribute", &dev.buffer_attrs),
    ];
    for (tag, names) in tables {
        for name in names {
            let mut el = BytesStart::new(tag);
            el.push_attribute(("name", name.as_str()));
            emit(writer, Event::Empty(el))?;
        }
    }

    emit(writer, Event::End(BytesEnd::new("device")))
}

/// Serialise a topology into a document [`parse`] accepts.
pub fn to_xml(desc: &ContextDesc) -> Result<String> {
    let mut writer = Writer::new(Vec::new());
    emit(
        &mut writer,
        Event::Decl(BytesDecl::new("1.0", Some("utf-8"), None)),
    )?;
    emit(&mut writer, Event::DocType(BytesText::from_escaped(DOCTYPE)))?;

    let mut root = BytesStart::new("context");
    root.push_attribute(("name", desc.name.as_str()));
    if !desc.description.is_empty() {
        root.push_attribute(("description", desc.description.as_str()));
    }
    emit(&mut writer, Event::Start(root))?;

    for (key, value) in &desc.attrs {
        let mut el = BytesStart::new("context-attribute");
        el.push_attribute(("name", key.as_str()));
        el.push_attribute(("value", value.as_str()));
        emit(&mut writer, Event::Empty(el))?;
    }
    for dev in &desc.devices {
        write_device(&mut writer, dev)?;
    }
    emit(&mut writer, Event::End(BytesEnd::new("context")))?;

    String::from_utf8(writer.into_inner()).map_err(|e| xml_error(e.to_string()))
}

// =============================================================================
// Offline backend
// =============================================================================

/// Backend of a context built from a document alone.
///
/// It knows the topology and nothing else: every I/O operation reports
/// [`IioError::NotSupported`].
#[derive(Debug, Default)]
pub struct XmlBackend;

impl Backend for XmlBackend {
    fn name(&self) -> &str {
        "xml"
    }
}

/// Build an offline context from a document held in memory.
pub fn create_context_from_xml(xml: &str) -> Result<Context> {
    let mut desc = parse(xml)?;
    desc.name = "xml".to_string();
    Context::with_xml(Arc::new(XmlBackend), desc, Some(xml.to_string()))
}

/// Build an offline context from a document on disk.
pub fn create_context_from_file(path: impl AsRef<Path>) -> Result<Context> {
    let path = path.as_ref();
    let xml = std::fs::read_to_string(path)?;
    debug!(path = %path.display(), "Loading topology document");
    create_context_from_xml(&xml)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<!DOCTYPE context [<!ELEMENT context (device)*>]>
<context name="network" description="Linux analog 6.1">
  <context-attribute name="hw_model" value="Board &amp; Co" />
  <device id="iio:device0" name="ad7476" label="adc0">
    <channel id="voltage0" type="input">
      <scan-element index="0" format="le:s12/16&gt;&gt;4" scale="0.805664" />
      <attribute name="raw" filename="in_voltage0_raw" />
    </channel>
    <channel id="timestamp" type="input">
      <scan-element index="1" format="le:S64/64&gt;&gt;0" />
    </channel>
    <attribute name="sampling_frequency" />
    <debug-attribute name="direct_reg_access" />
    <buffer-attribute name="length" />
  </device>
  <device id="trigger0" name="sysfstrig0" />
</context>"#;

    #[test]
    fn test_parse_sample() {
        let ctx = parse(SAMPLE).unwrap();
        assert_eq!(ctx.name, "network");
        assert_eq!(ctx.description, "Linux analog 6.1");
        assert_eq!(ctx.attrs, vec![("hw_model".to_string(), "Board & Co".to_string())]);
        assert_eq!(ctx.devices.len(), 2);

        let dev = &ctx.devices[0];
        assert_eq!(dev.id, "iio:device0");
        assert_eq!(dev.name.as_deref(), Some("ad7476"));
        assert_eq!(dev.label.as_deref(), Some("adc0"));
        assert_eq!(dev.attrs, vec!["sampling_frequency"]);
        assert_eq!(dev.debug_attrs, vec!["direct_reg_access"]);
        assert_eq!(dev.buffer_attrs, vec!["length"]);

        let chn = &dev.channels[0];
        assert_eq!(chn.scan_index, Some(0));
        assert_eq!(chn.format.bits, 12);
        assert_eq!(chn.format.length, 16);
        assert_eq!(chn.format.shift, 4);
        assert!(chn.format.is_signed);
        assert_eq!(chn.format.scale, Some(0.805664));
        assert_eq!(chn.attrs[0].filename.as_deref(), Some("in_voltage0_raw"));

        let trig = &ctx.devices[1];
        assert_eq!(trig.id, "trigger0");
        assert!(trig.channels.is_empty());
    }

    #[test]
    fn test_round_trip() {
        let first = parse(SAMPLE).unwrap();
        let xml = to_xml(&first).unwrap();
        let second = parse(&xml).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_missing_id_is_error() {
        let xml = r#"<context name="x"><device name="nope" /></context>"#;
        let err = parse(xml).unwrap_err();
        assert!(matches!(err, IioError::Xml { .. }));
    }

    #[test]
    fn test_wrong_root_is_error() {
        assert!(parse("<topology />").is_err());
        assert!(parse("").is_err());
    }

    #[test]
    fn test_unknown_elements_are_skipped() {
        let xml = r#"<context name="x">
            <vendor-blob><device id="hidden" /></vendor-blob>
            <device id="iio:device3" />
        </context>"#;
        let ctx = parse(xml).unwrap();
        assert_eq!(ctx.devices.len(), 1);
        assert_eq!(ctx.devices[0].id, "iio:device3");
    }

    #[test]
    fn test_bad_channel_type() {
        let xml = r#"<context name="x"><device id="d"><channel id="c" type="sideways" /></device></context>"#;
        assert!(parse(xml).is_err());
    }

    #[test]
    fn test_xml_context_has_no_io() {
        let ctx = create_context_from_xml(SAMPLE).unwrap();
        assert_eq!(ctx.name(), "xml");
        let dev = ctx.find_device("ad7476").unwrap();
        assert!(dev.read_attr("sampling_frequency").unwrap_err().is_not_supported());
        assert_eq!(ctx.xml().unwrap(), SAMPLE);
    }
}
