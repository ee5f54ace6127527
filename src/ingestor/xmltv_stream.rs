//! Incremental XMLTV channel extraction
//!
//! Pull parser over any `BufRead`, emitting one [`EpgChannelRecord`] per
//! closed `<channel>` element. Memory use is bounded by the text
//! accumulated for the currently open element, never by document size,
//! so multi-gigabyte guides parse in constant memory.
//!
//! The parser is feed-tolerant, not schema-strict: channels without an
//! id attribute or without display-name text are skipped silently, and
//! unknown elements are ignored. The only hard requirement is the `<tv>`
//! root.

use std::collections::HashMap;
use std::io::BufRead;

use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};
use tracing::debug;

use crate::errors::{IngestError, IngestResult};
use crate::models::EpgChannelRecord;

/// Iterator of channel records over a streaming XMLTV document
pub struct XmltvChannelReader<R: BufRead> {
    reader: Reader<R>,
    buf: Vec<u8>,
    saw_root: bool,
    finished: bool,
    skipped: u64,
}

/// State for the channel element currently being assembled
struct OpenChannel {
    channel_id: String,
    display_name: Option<String>,
    /// Text accumulated while inside a display-name element
    name_text: Option<String>,
    logo_url: Option<String>,
}

impl<R: BufRead> XmltvChannelReader<R> {
    pub fn new(source: R) -> Self {
        let mut reader = Reader::from_reader(source);
        reader.config_mut().trim_text(false);
        Self {
            reader,
            buf: Vec::new(),
            saw_root: false,
            finished: false,
            skipped: 0,
        }
    }

    /// Channels dropped for missing id or display-name
    pub fn skipped(&self) -> u64 {
        self.skipped
    }

    /// Collect every remaining channel, propagating the first error
    pub fn collect_channels(mut self) -> IngestResult<Vec<EpgChannelRecord>> {
        let mut channels = Vec::new();
        while let Some(record) = self.next_channel()? {
            channels.push(record);
        }
        Ok(channels)
    }

    /// Advance the underlying parser until the next complete channel
    /// element closes, or the document ends
    pub fn next_channel(&mut self) -> IngestResult<Option<EpgChannelRecord>> {
        if self.finished {
            return Ok(None);
        }

        let mut open: Option<OpenChannel> = None;

        loop {
            self.buf.clear();
            let event = self
                .reader
                .read_event_into(&mut self.buf)
                .map_err(classify_parse_error)?;

            match event {
                Event::Start(ref e) => {
                    let name = e.local_name();
                    let name = name.as_ref();
                    if !self.saw_root {
                        if name != b"tv" {
                            return Err(IngestError::malformed(
                                "document root is not <tv>; this is not an XMLTV guide",
                            ));
                        }
                        self.saw_root = true;
                        continue;
                    }

                    match name {
                        b"channel" => {
                            let attrs = parse_attributes(e);
                            open = Some(OpenChannel {
                                channel_id: attrs.get("id").cloned().unwrap_or_default(),
                                display_name: None,
                                name_text: None,
                                logo_url: None,
                            });
                        }
                        b"display-name" => {
                            if let Some(ref mut channel) = open
                                && channel.display_name.is_none()
                            {
                                channel.name_text = Some(String::new());
                            }
                        }
                        b"icon" => {
                            if let Some(ref mut channel) = open
                                && channel.logo_url.is_none()
                            {
                                let attrs = parse_attributes(e);
                                if let Some(src) = attrs.get("src") {
                                    channel.logo_url = Some(src.clone());
                                }
                            }
                        }
                        _ => {}
                    }
                }

                Event::Empty(ref e) => {
                    if e.local_name().as_ref() == b"icon"
                        && let Some(ref mut channel) = open
                        && channel.logo_url.is_none()
                    {
                        let attrs = parse_attributes(e);
                        if let Some(src) = attrs.get("src") {
                            channel.logo_url = Some(src.clone());
                        }
                    }
                }

                Event::Text(ref e) => {
                    if let Some(ref mut channel) = open
                        && let Some(ref mut text) = channel.name_text
                    {
                        let decoded = e
                            .decode()
                            .map_err(|e| {
                                IngestError::malformed(format!("undecodable text payload: {e}"))
                            })?;
                        text.push_str(&decoded);
                    }
                }

                Event::CData(ref e) => {
                    if let Some(ref mut channel) = open
                        && let Some(ref mut text) = channel.name_text
                    {
                        let decoded = String::from_utf8_lossy(e);
                        text.push_str(&decoded);
                    }
                }

                Event::End(ref e) => match e.local_name().as_ref() {
                    b"display-name" => {
                        if let Some(ref mut channel) = open
                            && let Some(text) = channel.name_text.take()
                        {
                            let trimmed = text.trim();
                            if !trimmed.is_empty() {
                                channel.display_name = Some(trimmed.to_string());
                            }
                        }
                    }
                    b"channel" => {
                        if let Some(channel) = open.take() {
                            match self.complete_channel(channel) {
                                Some(record) => return Ok(Some(record)),
                                None => {
                                    self.skipped += 1;
                                }
                            }
                        }
                    }
                    _ => {}
                },

                Event::Eof => {
                    self.finished = true;
                    if !self.saw_root {
                        return Err(IngestError::malformed(
                            "document ended before any markup; this is not an XMLTV guide",
                        ));
                    }
                    return Ok(None);
                }

                // Comments, processing instructions, declarations
                _ => {}
            }
        }
    }

    fn complete_channel(&self, channel: OpenChannel) -> Option<EpgChannelRecord> {
        if channel.channel_id.is_empty() {
            debug!("skipping channel without id attribute");
            return None;
        }
        let display_name = match channel.display_name {
            Some(name) => name,
            None => {
                debug!(channel_id = %channel.channel_id, "skipping channel without display-name");
                return None;
            }
        };
        Some(EpgChannelRecord {
            channel_id: channel.channel_id,
            display_name,
            logo_url: channel.logo_url,
        })
    }
}

fn classify_parse_error(error: quick_xml::Error) -> IngestError {
    match error {
        quick_xml::Error::Io(io) => match io.kind() {
            std::io::ErrorKind::TimedOut => IngestError::StallTimeout {
                url: "<stream>".to_string(),
                idle_secs: 0,
            },
            _ => IngestError::internal(format!("read failed during parse: {io}")),
        },
        other => IngestError::malformed(format!("XML parsing error: {other}")),
    }
}

fn parse_attributes(element: &BytesStart) -> HashMap<String, String> {
    let mut attrs = HashMap::new();
    for attr in element.attributes().flatten() {
        if let (Ok(key), Ok(value)) = (
            std::str::from_utf8(attr.key.as_ref()),
            std::str::from_utf8(&attr.value),
        ) {
            attrs.insert(key.to_string(), value.to_string());
        }
    }
    attrs
}
