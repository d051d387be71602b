//! FHIR XML to JSON conversion and back.
//!
//! FHIR XML keeps primitive data in `value` attributes and repeats elements
//! instead of using sequences, so the conversion is structural rather than a
//! generic XML-to-JSON dump. Only the shapes the gateway touches need to
//! survive the round trip; narrative `div` blocks are carried as raw XHTML
//! strings.

use quick_xml::events::attributes::AttrError;
use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};
use serde_json::{Map, Value};
use thiserror::Error;

pub const FHIR_NS: &str = "http://hl7.org/fhir";
const XHTML_NS: &str = "http://www.w3.org/1999/xhtml";

/// Elements that are list-valued in FHIR JSON even when a document carries
/// a single occurrence.
const ARRAY_ELEMENTS: &[&str] = &[
    "address",
    "basedOn",
    "category",
    "coding",
    "communication",
    "component",
    "contact",
    "contained",
    "derivedFrom",
    "entry",
    "extension",
    "generalPractitioner",
    "given",
    "hasMember",
    "identifier",
    "interpretation",
    "issue",
    "line",
    "link",
    "modifierExtension",
    "name",
    "note",
    "performer",
    "photo",
    "prefix",
    "profile",
    "security",
    "suffix",
    "tag",
    "telecom",
];

#[derive(Debug, Error)]
pub enum XmlError {
    #[error("malformed XML: {0}")]
    Parse(#[from] quick_xml::Error),
    #[error("malformed XML attribute: {0}")]
    Attribute(#[from] AttrError),
    #[error("document contains no root element")]
    EmptyDocument,
    #[error("unbalanced element tree")]
    Unbalanced,
    #[error("content after the document root")]
    TrailingContent,
    #[error("document has no resourceType to name the root element")]
    MissingResourceType,
}

/// Element being assembled while its children are still open.
struct Frame {
    name: String,
    value_attr: Option<String>,
    fields: Map<String, Value>,
    has_children: bool,
}

/// Parses a FHIR XML document into the equivalent FHIR JSON value. The root
/// element name becomes `resourceType`.
pub fn from_xml(input: &[u8]) -> Result<Value, XmlError> {
    let mut reader = Reader::from_reader(input);
    reader.config_mut().trim_text(true);

    let mut stack: Vec<Frame> = Vec::new();
    let mut root: Option<Value> = None;

    loop {
        match reader.read_event()? {
            Event::Start(element) => {
                if root.is_some() && stack.is_empty() {
                    return Err(XmlError::TrailingContent);
                }
                // Narrative is opaque XHTML; capture it verbatim instead of
                // converting its markup.
                if element.local_name().as_ref() == b"div" && !stack.is_empty() {
                    // read_to_end reports u64 offsets; the input is a slice.
                    let span = reader.read_to_end(element.name())?;
                    let inner =
                        String::from_utf8_lossy(&input[span.start as usize..span.end as usize]);
                    let html = format!("<div xmlns=\"{XHTML_NS}\">{}</div>", inner.trim());
                    if let Some(parent) = stack.last_mut() {
                        parent.has_children = true;
                        append_field(&mut parent.fields, "div", Value::String(html));
                    }
                    continue;
                }
                stack.push(open_frame(&element)?);
            }
            Event::Empty(element) => {
                if root.is_some() && stack.is_empty() {
                    return Err(XmlError::TrailingContent);
                }
                stack.push(open_frame(&element)?);
                close_frame(&mut stack, &mut root)?;
            }
            Event::End(_) => {
                close_frame(&mut stack, &mut root)?;
            }
            // FHIR XML carries data in attributes; free text only occurs
            // inside xhtml, which is consumed above.
            Event::Text(_) | Event::CData(_) => {}
            Event::Decl(_) | Event::Comment(_) | Event::PI(_) | Event::DocType(_) => {}
            Event::Eof => break,
        }
    }

    if !stack.is_empty() {
        return Err(XmlError::Unbalanced);
    }
    root.ok_or(XmlError::EmptyDocument)
}

/// Serializes a FHIR JSON value back to XML. The document must carry a
/// string `resourceType` for the root element name.
pub fn to_xml(doc: &Value) -> Result<Vec<u8>, XmlError> {
    let Some(fields) = doc.as_object() else {
        return Err(XmlError::MissingResourceType);
    };
    let Some(resource_type) = fields.get("resourceType").and_then(Value::as_str) else {
        return Err(XmlError::MissingResourceType);
    };

    let mut writer = Writer::new(Vec::new());
    write_resource(&mut writer, resource_type, fields, true)?;
    Ok(writer.into_inner())
}

fn element_name(element: &BytesStart) -> String {
    String::from_utf8_lossy(element.local_name().as_ref()).into_owned()
}

fn open_frame(element: &BytesStart) -> Result<Frame, XmlError> {
    let mut frame = Frame {
        name: element_name(element),
        value_attr: None,
        fields: Map::new(),
        has_children: false,
    };
    for attribute in element.attributes() {
        let attribute = attribute?;
        if attribute.key.as_ref().starts_with(b"xmlns") {
            continue;
        }
        let key = String::from_utf8_lossy(attribute.key.local_name().as_ref()).into_owned();
        let value = attribute.unescape_value()?.into_owned();
        if key == "value" {
            frame.value_attr = Some(value);
        } else {
            frame.fields.insert(key, Value::String(value));
        }
    }
    Ok(frame)
}

fn close_frame(stack: &mut Vec<Frame>, root: &mut Option<Value>) -> Result<(), XmlError> {
    let Some(frame) = stack.pop() else {
        return Err(XmlError::Unbalanced);
    };

    if let Some(parent) = stack.last_mut() {
        let name = frame.name.clone();
        let value = finish_frame(frame);
        parent.has_children = true;
        append_field(&mut parent.fields, &name, value);
        return Ok(());
    }

    // Root element: its tag is the resourceType.
    let name = frame.name.clone();
    let fields = match finish_frame(frame) {
        Value::Object(fields) => fields,
        Value::String(value) => {
            let mut fields = Map::new();
            fields.insert("value".to_string(), Value::String(value));
            fields
        }
        _ => Map::new(),
    };
    let mut doc = Map::new();
    doc.insert("resourceType".to_string(), Value::String(name));
    doc.extend(fields);
    *root = Some(Value::Object(doc));
    Ok(())
}

fn finish_frame(frame: Frame) -> Value {
    let Frame {
        value_attr,
        mut fields,
        has_children,
        ..
    } = frame;

    if !has_children && fields.is_empty() {
        return match value_attr {
            Some(value) => Value::String(value),
            None => Value::Object(Map::new()),
        };
    }

    if let Some(value) = value_attr {
        fields.insert("value".to_string(), Value::String(value));
    }

    // <resource><Observation>..</Observation></resource> wrappers fold the
    // inner element name into a resourceType discriminator.
    let wrapped = if fields.len() == 1 {
        fields
            .iter()
            .next()
            .filter(|(key, value)| {
                key.starts_with(|c: char| c.is_ascii_uppercase()) && value.is_object()
            })
            .map(|(key, _)| key.clone())
    } else {
        None
    };
    if let Some(key) = wrapped
        && let Some(Value::Object(inner)) = fields.remove(&key)
    {
        let mut resource = Map::new();
        resource.insert("resourceType".to_string(), Value::String(key));
        resource.extend(inner);
        return Value::Object(resource);
    }

    Value::Object(fields)
}

/// Inserts a child field, promoting repeated or known-repeating elements to
/// arrays.
fn append_field(fields: &mut Map<String, Value>, key: &str, value: Value) {
    match fields.get_mut(key) {
        Some(Value::Array(items)) => items.push(value),
        Some(existing) => {
            let first = existing.take();
            *existing = Value::Array(vec![first, value]);
        }
        None if ARRAY_ELEMENTS.contains(&key) => {
            fields.insert(key.to_string(), Value::Array(vec![value]));
        }
        None => {
            fields.insert(key.to_string(), value);
        }
    }
}

fn write_resource(
    writer: &mut Writer<Vec<u8>>,
    name: &str,
    fields: &Map<String, Value>,
    with_namespace: bool,
) -> Result<(), XmlError> {
    let mut start = BytesStart::new(name);
    if with_namespace {
        start.push_attribute(("xmlns", FHIR_NS));
    }
    writer.write_event(Event::Start(start))?;
    for (key, value) in fields {
        if key == "resourceType" {
            continue;
        }
        write_element(writer, key, value)?;
    }
    writer.write_event(Event::End(BytesEnd::new(name)))?;
    Ok(())
}

fn write_element(writer: &mut Writer<Vec<u8>>, name: &str, value: &Value) -> Result<(), XmlError> {
    match value {
        Value::Array(items) => {
            for item in items {
                write_element(writer, name, item)?;
            }
            Ok(())
        }
        Value::Null => Ok(()),
        Value::String(raw) if name == "div" => {
            // Stored as a complete xhtml element; emit verbatim.
            writer.write_event(Event::Text(BytesText::from_escaped(raw.as_str())))?;
            Ok(())
        }
        Value::String(value) => write_primitive(writer, name, value),
        Value::Bool(value) => write_primitive(writer, name, if *value { "true" } else { "false" }),
        Value::Number(value) => write_primitive(writer, name, &value.to_string()),
        Value::Object(fields) => write_complex(writer, name, fields),
    }
}

fn write_primitive(writer: &mut Writer<Vec<u8>>, name: &str, value: &str) -> Result<(), XmlError> {
    let mut element = BytesStart::new(name);
    element.push_attribute(("value", value));
    writer.write_event(Event::Empty(element))?;
    Ok(())
}

/// An extended primitive carries its `value` in an attribute next to
/// `extension` or `id` children. Complex types such as Identifier or
/// ContactPoint also have a `value` field, but theirs is a child element.
fn is_extended_primitive(fields: &Map<String, Value>) -> bool {
    fields.len() > 1
        && fields.keys().all(|key| {
            matches!(
                key.as_str(),
                "value" | "extension" | "modifierExtension" | "id"
            )
        })
}

fn write_complex(
    writer: &mut Writer<Vec<u8>>,
    name: &str,
    fields: &Map<String, Value>,
) -> Result<(), XmlError> {
    // Nested resources regain their type wrapper element.
    if let Some(resource_type) = fields.get("resourceType").and_then(Value::as_str) {
        writer.write_event(Event::Start(BytesStart::new(name)))?;
        write_resource(writer, resource_type, fields, false)?;
        writer.write_event(Event::End(BytesEnd::new(name)))?;
        return Ok(());
    }

    let mut start = BytesStart::new(name);
    let mut inlined: Vec<&str> = Vec::new();
    if let Some(Value::String(value)) = fields.get("value")
        && is_extended_primitive(fields)
    {
        start.push_attribute(("value", value.as_str()));
        inlined.push("value");
    }
    if (name == "extension" || name == "modifierExtension")
        && let Some(Value::String(url)) = fields.get("url")
    {
        start.push_attribute(("url", url.as_str()));
        inlined.push("url");
    }

    if fields.keys().all(|key| inlined.contains(&key.as_str())) {
        writer.write_event(Event::Empty(start))?;
        return Ok(());
    }

    writer.write_event(Event::Start(start))?;
    for (key, value) in fields {
        if inlined.contains(&key.as_str()) {
            continue;
        }
        write_element(writer, key, value)?;
    }
    writer.write_event(Event::End(BytesEnd::new(name)))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_json_diff::assert_json_eq;
    use serde_json::json;

    const OBSERVATION: &str = r#"<Observation xmlns="http://hl7.org/fhir">
        <status value="final"/>
        <code>
            <coding>
                <system value="http://loinc.org"/>
                <code value="718-7"/>
            </coding>
        </code>
    </Observation>"#;

    #[test]
    fn primitive_values_come_from_attributes() {
        let doc = from_xml(OBSERVATION.as_bytes()).unwrap();
        assert_json_eq!(
            doc,
            json!({
                "resourceType": "Observation",
                "status": "final",
                "code": {
                    "coding": [{"system": "http://loinc.org", "code": "718-7"}],
                },
            })
        );
    }

    #[test]
    fn known_repeating_elements_become_arrays_even_when_single() {
        let doc = from_xml(OBSERVATION.as_bytes()).unwrap();
        assert!(doc["code"]["coding"].is_array());
    }

    #[test]
    fn repeated_elements_promote_to_arrays() {
        let xml = r#"<Observation xmlns="http://hl7.org/fhir">
            <code>
                <coding><code value="a"/></coding>
                <coding><code value="b"/></coding>
            </code>
        </Observation>"#;
        let doc = from_xml(xml.as_bytes()).unwrap();
        assert_eq!(doc["code"]["coding"].as_array().map(Vec::len), Some(2));
        assert_eq!(doc["code"]["coding"][1]["code"], json!("b"));
    }

    #[test]
    fn entry_resource_wrapper_folds_into_resource_type() {
        let xml = r#"<Bundle xmlns="http://hl7.org/fhir">
            <type value="collection"/>
            <entry>
                <resource>
                    <Observation>
                        <status value="final"/>
                    </Observation>
                </resource>
            </entry>
        </Bundle>"#;
        let doc = from_xml(xml.as_bytes()).unwrap();
        assert_json_eq!(
            doc,
            json!({
                "resourceType": "Bundle",
                "type": "collection",
                "entry": [{"resource": {"resourceType": "Observation", "status": "final"}}],
            })
        );
    }

    #[test]
    fn narrative_div_is_carried_verbatim() {
        let xml = r#"<Patient xmlns="http://hl7.org/fhir">
            <text>
                <status value="generated"/>
                <div xmlns="http://www.w3.org/1999/xhtml"><p>Hello &amp; welcome</p></div>
            </text>
        </Patient>"#;
        let doc = from_xml(xml.as_bytes()).unwrap();
        assert_eq!(doc["text"]["status"], json!("generated"));
        assert_eq!(
            doc["text"]["div"],
            json!("<div xmlns=\"http://www.w3.org/1999/xhtml\"><p>Hello &amp; welcome</p></div>")
        );
    }

    #[test]
    fn narrative_div_with_nested_markup_keeps_following_siblings() {
        let xml = r#"<Patient xmlns="http://hl7.org/fhir">
            <text>
                <status value="generated"/>
                <div xmlns="http://www.w3.org/1999/xhtml"><p>Weight <b>72</b> kg</p><p>stable</p></div>
            </text>
            <active value="true"/>
        </Patient>"#;
        let doc = from_xml(xml.as_bytes()).unwrap();
        assert_eq!(
            doc["text"]["div"],
            json!(
                "<div xmlns=\"http://www.w3.org/1999/xhtml\"><p>Weight <b>72</b> kg</p><p>stable</p></div>"
            )
        );
        // Parsing resumes after the narrative block.
        assert_eq!(doc["active"], json!("true"));
    }

    #[test]
    fn identifier_value_round_trips_as_child_element() {
        let xml = r#"<Patient xmlns="http://hl7.org/fhir">
            <identifier>
                <system value="urn:acme:mrn"/>
                <value value="12345"/>
            </identifier>
            <telecom>
                <system value="phone"/>
                <value value="555-0100"/>
            </telecom>
        </Patient>"#;
        let doc = from_xml(xml.as_bytes()).unwrap();
        assert_eq!(doc["identifier"][0]["value"], json!("12345"));

        let serialized = String::from_utf8(to_xml(&doc).unwrap()).unwrap();
        assert!(serialized.contains(
            "<identifier><system value=\"urn:acme:mrn\"/><value value=\"12345\"/></identifier>"
        ));
        assert!(serialized.contains(
            "<telecom><system value=\"phone\"/><value value=\"555-0100\"/></telecom>"
        ));
        assert!(!serialized.contains("<identifier value="));

        let reparsed = from_xml(serialized.as_bytes()).unwrap();
        assert_json_eq!(doc, reparsed);
    }

    #[test]
    fn extended_primitive_keeps_its_value_attribute() {
        let xml = r#"<Patient xmlns="http://hl7.org/fhir">
            <birthDate value="1970-03-30">
                <extension url="http://example.org/accuracy">
                    <valueCode value="month"/>
                </extension>
            </birthDate>
        </Patient>"#;
        let doc = from_xml(xml.as_bytes()).unwrap();
        assert_eq!(doc["birthDate"]["value"], json!("1970-03-30"));

        let serialized = String::from_utf8(to_xml(&doc).unwrap()).unwrap();
        assert!(serialized.contains("<birthDate value=\"1970-03-30\">"));

        let reparsed = from_xml(serialized.as_bytes()).unwrap();
        assert_json_eq!(doc, reparsed);
    }

    #[test]
    fn extension_url_attribute_becomes_field() {
        let xml = r#"<Patient xmlns="http://hl7.org/fhir">
            <extension url="http://example.org/weight">
                <valueDecimal value="72"/>
            </extension>
        </Patient>"#;
        let doc = from_xml(xml.as_bytes()).unwrap();
        assert_eq!(doc["extension"][0]["url"], json!("http://example.org/weight"));
        assert_eq!(doc["extension"][0]["valueDecimal"], json!("72"));
    }

    #[test]
    fn round_trip_preserves_structure() {
        let xml = r#"<Bundle xmlns="http://hl7.org/fhir">
            <type value="transaction"/>
            <entry>
                <resource>
                    <Observation>
                        <meta>
                            <profile value="http://example.org/p"/>
                        </meta>
                        <status value="final"/>
                        <code>
                            <coding>
                                <system value="http://loinc.org"/>
                                <code value="2339-0"/>
                            </coding>
                        </code>
                    </Observation>
                </resource>
            </entry>
        </Bundle>"#;
        let first = from_xml(xml.as_bytes()).unwrap();
        let serialized = to_xml(&first).unwrap();
        let second = from_xml(&serialized).unwrap();
        assert_json_eq!(first, second);
    }

    #[test]
    fn round_trip_escapes_special_characters() {
        let doc = json!({
            "resourceType": "Observation",
            "status": "a < b & \"c\"",
        });
        let serialized = to_xml(&doc).unwrap();
        let parsed = from_xml(&serialized).unwrap();
        assert_eq!(parsed["status"], json!("a < b & \"c\""));
    }

    #[test]
    fn serializer_writes_value_attributes_and_namespace() {
        let doc = json!({
            "resourceType": "Observation",
            "status": "final",
        });
        let xml = String::from_utf8(to_xml(&doc).unwrap()).unwrap();
        assert!(xml.starts_with("<Observation xmlns=\"http://hl7.org/fhir\">"));
        assert!(xml.contains("<status value=\"final\"/>"));
    }

    #[test]
    fn serializer_requires_resource_type() {
        assert!(matches!(
            to_xml(&json!({"status": "final"})),
            Err(XmlError::MissingResourceType)
        ));
        assert!(matches!(
            to_xml(&json!(["not", "an", "object"])),
            Err(XmlError::MissingResourceType)
        ));
    }

    #[test]
    fn empty_input_is_rejected() {
        assert!(matches!(from_xml(b""), Err(XmlError::EmptyDocument)));
    }

    #[test]
    fn trailing_root_is_rejected() {
        let err = from_xml(b"<Bundle></Bundle><Bundle></Bundle>").unwrap_err();
        assert!(matches!(err, XmlError::TrailingContent));
    }

    #[test]
    fn unbalanced_markup_is_rejected() {
        assert!(from_xml(b"<Bundle><entry></Bundle>").is_err());
    }
}
