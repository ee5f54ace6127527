//! Filtered XMLTV export
//!
//! Non-streaming rewrite of an already-small, already-validated guide:
//! keeps only the channel and programme elements whose channel id passes
//! the filter, reorders the kept channels by a caller-supplied ordering,
//! and carries every kept element through event-for-event so its markup
//! survives unchanged. Programmes keep document order.

use std::collections::{HashMap, HashSet};
use std::io::Cursor;

use quick_xml::events::Event;
use quick_xml::{Reader, Writer};

use crate::errors::{IngestError, IngestResult};

pub fn filter_xmltv(
    input: &str,
    keep_ids: &HashSet<String>,
    channel_order: &[String],
) -> IngestResult<String> {
    let order: HashMap<&str, usize> = channel_order
        .iter()
        .enumerate()
        .map(|(i, id)| (id.as_str(), i))
        .collect();

    let mut reader = Reader::from_str(input);
    reader.config_mut().trim_text(false);

    let mut prelude = Writer::new(Cursor::new(Vec::new()));
    let mut channels: Vec<(usize, usize, Vec<u8>)> = Vec::new();
    let mut programmes = Writer::new(Cursor::new(Vec::new()));
    let mut saw_root = false;
    let mut seq = 0usize;

    loop {
        match reader.read_event().map_err(map_xml_error)? {
            Event::Eof => break,

            Event::Start(e) if e.local_name().as_ref() == b"tv" => {
                saw_root = true;
                prelude.write_event(Event::Start(e)).map_err(map_io)?;
            }
            Event::End(e) if e.local_name().as_ref() == b"tv" => {}

            Event::Start(e) if e.local_name().as_ref() == b"channel" => {
                let id = attribute_value(&e, b"id");
                let mut element = Writer::new(Cursor::new(Vec::new()));
                element.write_event(Event::Start(e)).map_err(map_io)?;
                copy_element(&mut reader, &mut element, b"channel")?;
                if let Some(id) = id.filter(|id| keep_ids.contains(id)) {
                    let position = order.get(id.as_str()).copied().unwrap_or(usize::MAX);
                    channels.push((position, seq, element.into_inner().into_inner()));
                    seq += 1;
                }
            }
            Event::Empty(e) if e.local_name().as_ref() == b"channel" => {
                if let Some(id) = attribute_value(&e, b"id").filter(|id| keep_ids.contains(id)) {
                    let position = order.get(id.as_str()).copied().unwrap_or(usize::MAX);
                    let mut element = Writer::new(Cursor::new(Vec::new()));
                    element.write_event(Event::Empty(e)).map_err(map_io)?;
                    channels.push((position, seq, element.into_inner().into_inner()));
                    seq += 1;
                }
            }

            Event::Start(e) if e.local_name().as_ref() == b"programme" => {
                let keep = attribute_value(&e, b"channel")
                    .is_some_and(|id| keep_ids.contains(&id));
                if keep {
                    programmes.write_event(Event::Start(e)).map_err(map_io)?;
                    copy_element(&mut reader, &mut programmes, b"programme")?;
                } else {
                    let mut discard = Writer::new(Cursor::new(Vec::new()));
                    copy_element(&mut reader, &mut discard, b"programme")?;
                }
            }
            Event::Empty(e) if e.local_name().as_ref() == b"programme" => {
                if attribute_value(&e, b"channel").is_some_and(|id| keep_ids.contains(&id)) {
                    programmes.write_event(Event::Empty(e)).map_err(map_io)?;
                }
            }

            // Inter-element whitespace at the top level is regenerated,
            // not preserved
            Event::Text(e) if !saw_root || e.iter().all(u8::is_ascii_whitespace) => {
                if !saw_root {
                    prelude.write_event(Event::Text(e)).map_err(map_io)?;
                }
            }

            other if !saw_root => {
                prelude.write_event(other).map_err(map_io)?;
            }
            _ => {}
        }
    }

    if !saw_root {
        return Err(IngestError::malformed(
            "document root is not <tv>; refusing to export",
        ));
    }

    channels.sort_by_key(|(position, seq, _)| (*position, *seq));

    let mut output = prelude.into_inner().into_inner();
    output.push(b'\n');
    for (_, _, element) in channels {
        output.extend_from_slice(&element);
        output.push(b'\n');
    }
    output.extend_from_slice(&programmes.into_inner().into_inner());
    output.extend_from_slice(b"</tv>\n");

    String::from_utf8(output)
        .map_err(|_| IngestError::malformed("exported document is not valid UTF-8"))
}

/// Copy every event up to and including the matching end tag
fn copy_element<W: std::io::Write>(
    reader: &mut Reader<&[u8]>,
    writer: &mut Writer<W>,
    name: &[u8],
) -> IngestResult<()> {
    let mut depth = 1usize;
    loop {
        let event = reader.read_event().map_err(map_xml_error)?;
        match &event {
            Event::Start(e) if e.local_name().as_ref() == name => depth += 1,
            Event::End(e) if e.local_name().as_ref() == name => {
                depth -= 1;
                if depth == 0 {
                    writer.write_event(event).map_err(map_io)?;
                    return Ok(());
                }
            }
            Event::Eof => {
                return Err(IngestError::malformed(format!(
                    "element <{}> is not closed",
                    String::from_utf8_lossy(name)
                )));
            }
            _ => {}
        }
        writer.write_event(event).map_err(map_io)?;
    }
}

fn attribute_value(element: &quick_xml::events::BytesStart, key: &[u8]) -> Option<String> {
    element
        .attributes()
        .flatten()
        .find(|attr| attr.key.as_ref() == key)
        .and_then(|attr| String::from_utf8(attr.value.into_owned()).ok())
}

fn map_xml_error(error: quick_xml::Error) -> IngestError {
    IngestError::malformed(format!("XML parsing error: {error}"))
}

fn map_io(error: std::io::Error) -> IngestError {
    IngestError::internal(format!("XML write failed: {error}"))
}
