//! XML document decoder.
//!
//! Turns one raw topic payload into a positional [`Record`] against the fixed
//! [`RecordSchema`]. Decoding is pure and synchronous; the coordinator fans
//! it out across a worker pool.

use chrono::{DateTime, Utc};
use quick_xml::events::Event;
use quick_xml::Reader;

use siphon_types::error::IngestError;
use siphon_types::record::{FieldValue, Record};
use siphon_types::schema::{FieldKind, RecordSchema};

/// Maximum payload bytes kept in quarantine snippets.
const SNIPPET_MAX_BYTES: usize = 160;

/// Decode a single XML document into a record.
///
/// The document must be a single `<record_element>` root whose children are
/// flat `<field>value</field>` elements named after schema fields. Unknown
/// elements, nested structure, type violations, and missing required fields
/// all fail the document as a whole.
///
/// # Errors
///
/// Returns a record-scoped [`IngestError`] describing the first violation.
pub fn decode(schema: &RecordSchema, payload: &[u8]) -> Result<Record, IngestError> {
    let mut reader = Reader::from_reader(payload);
    reader.config_mut().trim_text(true);

    let mut values: Vec<Option<FieldValue>> = vec![None; schema.field_count()];
    let mut buf = Vec::new();
    let mut depth = 0usize;
    let mut root_closed = false;
    // Index and accumulated text of the field element currently open.
    let mut current: Option<(usize, String)> = None;

    loop {
        let event = reader
            .read_event_into(&mut buf)
            .map_err(|e| IngestError::decode("MALFORMED_XML", format!("XML parse error: {e}")))?;

        match event {
            Event::Start(e) => {
                let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                match depth {
                    0 => {
                        if root_closed {
                            return Err(IngestError::decode(
                                "MALFORMED_XML",
                                "multiple root elements in document",
                            ));
                        }
                        if name != schema.record_element {
                            return Err(IngestError::decode(
                                "UNEXPECTED_ROOT",
                                format!(
                                    "expected root element '{}', found '{}'",
                                    schema.record_element, name
                                ),
                            ));
                        }
                    }
                    1 => {
                        let idx = schema.field_index(&name).ok_or_else(|| {
                            IngestError::decode(
                                "UNKNOWN_FIELD",
                                format!("element '{name}' is not a schema field"),
                            )
                        })?;
                        if values[idx].is_some() {
                            return Err(IngestError::decode(
                                "DUPLICATE_FIELD",
                                format!("field '{name}' appears more than once"),
                            ));
                        }
                        current = Some((idx, String::new()));
                    }
                    _ => {
                        return Err(IngestError::decode(
                            "MALFORMED_XML",
                            format!("unexpected nested element '{name}'"),
                        ));
                    }
                }
                depth += 1;
            }
            Event::Empty(e) => {
                let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                match depth {
                    // Self-closed root: a document with no fields at all.
                    0 => {
                        if root_closed {
                            return Err(IngestError::decode(
                                "MALFORMED_XML",
                                "multiple root elements in document",
                            ));
                        }
                        if name != schema.record_element {
                            return Err(IngestError::decode(
                                "UNEXPECTED_ROOT",
                                format!(
                                    "expected root element '{}', found '{}'",
                                    schema.record_element, name
                                ),
                            ));
                        }
                        root_closed = true;
                    }
                    // Self-closed field: present but valueless, stays NULL.
                    1 => {
                        if schema.field_index(&name).is_none() {
                            return Err(IngestError::decode(
                                "UNKNOWN_FIELD",
                                format!("element '{name}' is not a schema field"),
                            ));
                        }
                    }
                    _ => {
                        return Err(IngestError::decode(
                            "MALFORMED_XML",
                            format!("unexpected nested element '{name}'"),
                        ));
                    }
                }
            }
            Event::Text(t) => {
                if let Some((_, text)) = current.as_mut() {
                    let unescaped = t.unescape().map_err(|e| {
                        IngestError::decode("MALFORMED_XML", format!("bad character data: {e}"))
                    })?;
                    text.push_str(&unescaped);
                } else if depth == 1 {
                    return Err(IngestError::decode(
                        "MALFORMED_XML",
                        "loose text outside field elements",
                    ));
                }
            }
            Event::CData(t) => {
                if let Some((_, text)) = current.as_mut() {
                    text.push_str(&String::from_utf8_lossy(t.as_ref()));
                }
            }
            Event::End(_) => {
                depth = depth.saturating_sub(1);
                if let Some((idx, text)) = current.take() {
                    values[idx] = Some(parse_value(schema.fields[idx].kind, &schema.fields[idx].name, &text)?);
                }
                if depth == 0 {
                    root_closed = true;
                }
            }
            Event::Eof => break,
            // Declarations, comments, processing instructions.
            _ => {}
        }
        buf.clear();
    }

    if !root_closed || depth != 0 {
        return Err(IngestError::decode(
            "MALFORMED_XML",
            "document ended before root element closed",
        ));
    }

    for (idx, field) in schema.fields.iter().enumerate() {
        if field.required && values[idx].is_none() {
            return Err(IngestError::decode(
                "MISSING_FIELD",
                format!("required field '{}' is absent", field.name),
            ));
        }
    }

    Ok(Record::new(values))
}

fn parse_value(kind: FieldKind, name: &str, raw: &str) -> Result<FieldValue, IngestError> {
    let trimmed = raw.trim();
    match kind {
        FieldKind::Text => Ok(FieldValue::Text(raw.to_string())),
        FieldKind::Integer => trimmed
            .parse::<i64>()
            .map(FieldValue::Integer)
            .map_err(|_| {
                IngestError::decode(
                    "INVALID_INTEGER",
                    format!("field '{name}': '{trimmed}' is not an integer"),
                )
            }),
        FieldKind::Float => trimmed.parse::<f64>().map(FieldValue::Float).map_err(|_| {
            IngestError::decode(
                "INVALID_FLOAT",
                format!("field '{name}': '{trimmed}' is not a number"),
            )
        }),
        FieldKind::Timestamp => DateTime::parse_from_rfc3339(trimmed)
            .map(|dt| FieldValue::Timestamp(dt.with_timezone(&Utc)))
            .map_err(|e| {
                IngestError::decode(
                    "INVALID_TIMESTAMP",
                    format!("field '{name}': '{trimmed}' is not RFC 3339: {e}"),
                )
            }),
    }
}

/// Truncated, lossy payload view for quarantine entries.
pub fn payload_snippet(payload: &[u8]) -> String {
    let end = payload.len().min(SNIPPET_MAX_BYTES);
    String::from_utf8_lossy(&payload[..end]).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use siphon_types::schema::FieldSpec;

    fn test_schema() -> RecordSchema {
        RecordSchema {
            record_element: "record".to_string(),
            fields: vec![
                FieldSpec::new("name", FieldKind::Text).required(),
                FieldSpec::new("count", FieldKind::Integer),
                FieldSpec::new("ratio", FieldKind::Float),
                FieldSpec::new("seen_at", FieldKind::Timestamp),
            ],
        }
    }

    #[test]
    fn decodes_full_record() {
        let schema = test_schema();
        let xml = b"<record>\
            <name>alpha</name>\
            <count>42</count>\
            <ratio>0.5</ratio>\
            <seen_at>2024-03-01T12:00:00Z</seen_at>\
        </record>";
        let record = decode(&schema, xml).unwrap();
        assert_eq!(record.values[0], Some(FieldValue::Text("alpha".to_string())));
        assert_eq!(record.values[1], Some(FieldValue::Integer(42)));
        assert_eq!(record.values[2], Some(FieldValue::Float(0.5)));
        assert_eq!(
            record.values[3],
            Some(FieldValue::Timestamp(
                Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
            ))
        );
    }

    #[test]
    fn absent_optional_fields_decode_to_none() {
        let schema = test_schema();
        let record = decode(&schema, b"<record><name>x</name></record>").unwrap();
        assert_eq!(record.values[1], None);
        assert_eq!(record.values[2], None);
        assert_eq!(record.values[3], None);
    }

    #[test]
    fn field_order_in_document_does_not_matter() {
        let schema = test_schema();
        let record =
            decode(&schema, b"<record><count>1</count><name>x</name></record>").unwrap();
        assert_eq!(record.values[0], Some(FieldValue::Text("x".to_string())));
        assert_eq!(record.values[1], Some(FieldValue::Integer(1)));
    }

    #[test]
    fn missing_required_field_fails() {
        let schema = test_schema();
        let err = decode(&schema, b"<record><count>1</count></record>").unwrap_err();
        assert_eq!(err.code, "MISSING_FIELD");
    }

    #[test]
    fn unknown_element_fails() {
        let schema = test_schema();
        let err = decode(&schema, b"<record><name>x</name><bogus>1</bogus></record>").unwrap_err();
        assert_eq!(err.code, "UNKNOWN_FIELD");
    }

    #[test]
    fn wrong_root_fails() {
        let schema = test_schema();
        let err = decode(&schema, b"<row><name>x</name></row>").unwrap_err();
        assert_eq!(err.code, "UNEXPECTED_ROOT");
    }

    #[test]
    fn truncated_document_fails() {
        let schema = test_schema();
        let err = decode(&schema, b"<record><name>x</name>").unwrap_err();
        assert_eq!(err.code, "MALFORMED_XML");
    }

    #[test]
    fn bad_integer_fails() {
        let schema = test_schema();
        let err =
            decode(&schema, b"<record><name>x</name><count>abc</count></record>").unwrap_err();
        assert_eq!(err.code, "INVALID_INTEGER");
    }

    #[test]
    fn bad_timestamp_fails() {
        let schema = test_schema();
        let err = decode(
            &schema,
            b"<record><name>x</name><seen_at>yesterday</seen_at></record>",
        )
        .unwrap_err();
        assert_eq!(err.code, "INVALID_TIMESTAMP");
    }

    #[test]
    fn duplicate_field_fails() {
        let schema = test_schema();
        let err = decode(
            &schema,
            b"<record><name>x</name><name>y</name></record>",
        )
        .unwrap_err();
        assert_eq!(err.code, "DUPLICATE_FIELD");
    }

    #[test]
    fn nested_elements_fail() {
        let schema = test_schema();
        let err = decode(
            &schema,
            b"<record><name><inner>x</inner></name></record>",
        )
        .unwrap_err();
        assert_eq!(err.code, "MALFORMED_XML");
    }

    #[test]
    fn self_closed_field_stays_null() {
        let schema = test_schema();
        let record = decode(&schema, b"<record><name>x</name><count/></record>").unwrap();
        assert_eq!(record.values[1], None);
    }

    #[test]
    fn escaped_text_is_unescaped() {
        let schema = test_schema();
        let record =
            decode(&schema, b"<record><name>a &amp; b</name></record>").unwrap();
        assert_eq!(record.values[0], Some(FieldValue::Text("a & b".to_string())));
    }

    #[test]
    fn empty_payload_fails() {
        let schema = test_schema();
        let err = decode(&schema, b"").unwrap_err();
        assert_eq!(err.code, "MALFORMED_XML");
    }

    #[test]
    fn snippet_truncates_long_payloads() {
        let payload = vec![b'x'; 1000];
        let snippet = payload_snippet(&payload);
        assert_eq!(snippet.len(), 160);
    }
}
