// Extraction of embedded notes and thumbnail from project documents

use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine;
use quick_xml::events::Event;
use quick_xml::Reader;

use crate::error::{StorageError, StorageResult};

/// Derivable fields embedded in a project document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedDocument {
    /// Text of the project's `<notes>` element, if present (may be empty).
    pub notes: Option<String>,
    /// Decoded bytes of the project's `<thumbnail>` data URL.
    pub thumbnail: Option<Vec<u8>>,
}

/// Pure function from a document to its derivable fields.
pub trait DocumentParser: Send + Sync {
    fn parse(&self, document: &[u8]) -> StorageResult<ParsedDocument>;
}

/// Parser for Snap! project XML.
///
/// Reads only the direct `<notes>` and `<thumbnail>` children of the first
/// `<project>` element, which may be the root or sit inside a `<snapdata>`
/// wrapper. Notes of nested scenes are ignored.
#[derive(Debug, Clone, Copy, Default)]
pub struct XmlDocumentParser;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    Notes,
    Thumbnail,
}

impl Field {
    fn from_name(name: &[u8]) -> Option<Field> {
        match name {
            b"notes" => Some(Field::Notes),
            b"thumbnail" => Some(Field::Thumbnail),
            _ => None,
        }
    }
}

impl ParsedDocument {
    fn set(&mut self, field: Field, text: String) {
        match field {
            Field::Notes if self.notes.is_none() => self.notes = Some(text),
            Field::Thumbnail if self.thumbnail.is_none() => {
                self.thumbnail = decode_data_url(&text);
            }
            _ => {}
        }
    }
}

impl DocumentParser for XmlDocumentParser {
    fn parse(&self, document: &[u8]) -> StorageResult<ParsedDocument> {
        let mut reader = Reader::from_reader(document);
        let mut buf = Vec::new();
        let mut parsed = ParsedDocument::default();

        let mut depth: usize = 0;
        let mut project_depth: Option<usize> = None;
        let mut capture: Option<(Field, String)> = None;

        loop {
            let event = reader
                .read_event_into(&mut buf)
                .map_err(|e| StorageError::MalformedDocument(e.to_string()))?;

            match event {
                Event::Start(start) => {
                    depth += 1;
                    let name = start.local_name();
                    match project_depth {
                        None if name.as_ref() == b"project" => project_depth = Some(depth),
                        Some(project) if depth == project + 1 && capture.is_none() => {
                            capture = Field::from_name(name.as_ref()).map(|f| (f, String::new()));
                        }
                        _ => {}
                    }
                }
                Event::Empty(empty) => {
                    if project_depth == Some(depth) {
                        if let Some(field) = Field::from_name(empty.local_name().as_ref()) {
                            parsed.set(field, String::new());
                        }
                    }
                }
                Event::Text(text) => {
                    if let Some((_, value)) = capture.as_mut() {
                        let unescaped = text
                            .unescape()
                            .map_err(|e| StorageError::MalformedDocument(e.to_string()))?;
                        value.push_str(&unescaped);
                    }
                }
                Event::CData(cdata) => {
                    if let Some((_, value)) = capture.as_mut() {
                        value.push_str(&String::from_utf8_lossy(&cdata.into_inner()));
                    }
                }
                Event::End(_) => {
                    if let Some(project) = project_depth {
                        if depth == project + 1 {
                            if let Some((field, value)) = capture.take() {
                                parsed.set(field, value);
                            }
                        }
                        if depth == project {
                            break;
                        }
                    }
                    depth = depth.saturating_sub(1);
                }
                Event::Eof => break,
                _ => {}
            }
            buf.clear();
        }

        Ok(parsed)
    }
}

/// Decodes a `data:<mime>;base64,<payload>` URL, or bare base64, into bytes.
///
/// Returns `None` for empty input, non-base64 data URLs and undecodable
/// payloads.
pub fn decode_data_url(value: &str) -> Option<Vec<u8>> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }

    let payload = match value.strip_prefix("data:") {
        Some(rest) => {
            let (meta, data) = rest.split_once(',')?;
            if !meta.ends_with(";base64") {
                tracing::debug!(meta, "ignoring non-base64 data URL");
                return None;
            }
            data
        }
        None => value,
    };

    let compact: String = payload.split_whitespace().collect();
    match BASE64_STANDARD.decode(compact.as_bytes()) {
        Ok(bytes) if !bytes.is_empty() => Some(bytes),
        Ok(_) => None,
        Err(e) => {
            tracing::debug!(error = %e, "undecodable thumbnail payload");
            None
        }
    }
}

/// Encodes bytes as a base64 data URL with the given MIME type.
pub fn encode_data_url(mime: &str, bytes: &[u8]) -> String {
    format!("data:{};base64,{}", mime, BASE64_STANDARD.encode(bytes))
}
