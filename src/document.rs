use crate::error::{RagError, Result};
use log::{debug, info, warn};
use mime_guess::from_path;
use serde::{Deserialize, Serialize};
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;

/// A raw file handed to the pipeline, as received from an upload or read back
/// from the documents directory.
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub name: String,
    pub bytes: Vec<u8>,
}

impl UploadedFile {
    pub fn new(name: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        UploadedFile {
            name: name.into(),
            bytes: bytes.into(),
        }
    }
}

/// The closed set of formats the loader understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentFormat {
    Text,
    Pdf,
    Csv,
}

impl DocumentFormat {
    /// Detect the format from the file name's extension.
    pub fn from_file_name(file_name: &str) -> Result<Self> {
        let extension = Path::new(file_name)
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase);

        match extension.as_deref() {
            Some("txt") => Ok(DocumentFormat::Text),
            Some("pdf") => Ok(DocumentFormat::Pdf),
            Some("csv") => Ok(DocumentFormat::Csv),
            _ => Err(RagError::UnsupportedFormat {
                file_name: file_name.to_string(),
            }),
        }
    }
}

/// A parsed document. Only lives for the duration of one rebuild.
#[derive(Debug, Clone)]
pub struct Document {
    /// Identifier unique within one knowledge-base generation
    pub id: String,
    /// The uploaded file name
    pub file_name: String,
    pub format: DocumentFormat,
    /// MIME type guessed from the file name, recorded for display
    pub mime_type: String,
    /// Extracted plain text
    pub text: String,
}

impl Document {
    /// Parse an uploaded file into a document.
    pub fn load(id: impl Into<String>, file: &UploadedFile) -> Result<Self> {
        let format = DocumentFormat::from_file_name(&file.name)?;
        let mime_type = from_path(&file.name).first_or_octet_stream().to_string();
        debug!("Detected MIME type for {}: {}", file.name, mime_type);

        let text = read_document_content(&file.name, &file.bytes, format)?;

        Ok(Document {
            id: id.into(),
            file_name: file.name.clone(),
            format,
            mime_type,
            text,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.text.trim().is_empty()
    }
}

/// Extract plain text from raw bytes according to the document format.
pub fn read_document_content(file_name: &str, bytes: &[u8], format: DocumentFormat) -> Result<String> {
    match format {
        DocumentFormat::Text => {
            info!("Processing text document: {}", file_name);
            Ok(decode_text(bytes))
        }

        DocumentFormat::Pdf => {
            info!("Processing PDF document: {}", file_name);
            let content = extract_pdf(file_name, bytes)?;

            // PDF extraction can sometimes include excessive whitespace
            let cleaned_content = normalize_whitespace(&content);

            if cleaned_content.is_empty() {
                warn!("Extracted PDF content of {} is empty", file_name);
            }

            Ok(cleaned_content)
        }

        DocumentFormat::Csv => {
            info!("Processing CSV document: {}", file_name);
            csv_to_text(file_name, bytes)
        }
    }
}

/// UTF-8 first, Latin-1 otherwise. Every byte maps to a code point in Latin-1
/// so this never fails.
fn decode_text(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(text) => text.to_string(),
        Err(_) => {
            debug!("Text is not valid UTF-8, decoding as Latin-1");
            bytes.iter().map(|&b| b as char).collect()
        }
    }
}

fn extract_pdf(file_name: &str, bytes: &[u8]) -> Result<String> {
    let parse_error = |reason: String| RagError::Parse {
        file_name: file_name.to_string(),
        reason,
    };

    // The PDF backend panics on some malformed inputs; one bad file must not
    // take the whole rebuild down.
    match panic::catch_unwind(AssertUnwindSafe(|| pdf_extract::extract_text_from_mem(bytes))) {
        Ok(Ok(text)) => Ok(text),
        Ok(Err(e)) => Err(parse_error(e.to_string())),
        Err(_) => Err(parse_error("PDF parser panicked".to_string())),
    }
}

/// One line per record, fields joined with ", " in column order.
fn csv_to_text(file_name: &str, bytes: &[u8]) -> Result<String> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(bytes);

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|e| RagError::Parse {
            file_name: file_name.to_string(),
            reason: e.to_string(),
        })?;
        let fields: Vec<&str> = record.iter().map(str::trim).collect();
        rows.push(fields.join(", "));
    }

    debug!("Read {} CSV rows from {}", rows.len(), file_name);
    Ok(rows.join("\n"))
}

/// Normalize whitespace in text (remove multiple consecutive spaces, newlines, etc.)
fn normalize_whitespace(text: &str) -> String {
    let result = text.replace('\r', "");

    let mut prev_char = ' ';
    let mut newline_count = 0;
    let mut normalized = String::with_capacity(result.len());

    for c in result.chars() {
        if c == '\n' {
            newline_count += 1;
        } else {
            if newline_count > 0 {
                // at most one blank line between paragraphs
                if newline_count >= 2 {
                    normalized.push_str("\n\n");
                } else {
                    normalized.push('\n');
                }
                newline_count = 0;
                prev_char = '\n';
            }

            if !(c == ' ' && (prev_char == ' ' || prev_char == '\n')) {
                normalized.push(c);
            }

            prev_char = c;
        }
    }

    normalized.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_whitespace() {
        let text = "This  has   multiple    spaces.\n\n\nAnd multiple newlines.\r\nAnd Windows line endings.";
        let expected =
            "This has multiple spaces.\n\nAnd multiple newlines.\nAnd Windows line endings.";
        assert_eq!(normalize_whitespace(text), expected);
    }

    #[test]
    fn test_format_detection() {
        assert_eq!(
            DocumentFormat::from_file_name("notes.txt").unwrap(),
            DocumentFormat::Text
        );
        assert_eq!(
            DocumentFormat::from_file_name("Report.PDF").unwrap(),
            DocumentFormat::Pdf
        );
        assert_eq!(
            DocumentFormat::from_file_name("table.csv").unwrap(),
            DocumentFormat::Csv
        );
    }

    #[test]
    fn test_unsupported_extension() {
        for name in ["deck.pptx", "server.log", "no_extension"] {
            let err = DocumentFormat::from_file_name(name).unwrap_err();
            assert!(matches!(err, RagError::UnsupportedFormat { .. }), "{name}");
        }
    }

    #[test]
    fn test_text_utf8_and_latin1() {
        let utf8 = UploadedFile::new("a.txt", "Crème brûlée".as_bytes());
        assert_eq!(Document::load("d0", &utf8).unwrap().text, "Crème brûlée");

        // 0xE9 is 'é' in Latin-1 and invalid on its own in UTF-8
        let latin1 = UploadedFile::new("b.txt", vec![b'c', b'a', b'f', 0xE9]);
        assert_eq!(Document::load("d1", &latin1).unwrap().text, "café");
    }

    #[test]
    fn test_csv_rows_become_lines() {
        let file = UploadedFile::new(
            "cities.csv",
            "country,capital\nFrance,Paris\n\"Germany\", Berlin\nJapan,Tokyo,extra\n",
        );
        let doc = Document::load("d0", &file).unwrap();
        assert_eq!(doc.format, DocumentFormat::Csv);
        assert_eq!(doc.mime_type, "text/csv");
        assert_eq!(
            doc.text,
            "country, capital\nFrance, Paris\nGermany, Berlin\nJapan, Tokyo, extra"
        );
    }

    #[test]
    fn test_csv_invalid_utf8_is_parse_error() {
        let file = UploadedFile::new("bad.csv", vec![b'a', b',', 0xFF, 0xFE, b'\n']);
        let err = Document::load("d0", &file).unwrap_err();
        assert!(matches!(err, RagError::Parse { .. }));
    }

    #[test]
    fn test_corrupt_pdf_is_parse_error() {
        let file = UploadedFile::new("broken.pdf", b"not a pdf".to_vec());
        let err = Document::load("d0", &file).unwrap_err();
        assert!(matches!(err, RagError::Parse { .. }));
    }

    #[test]
    fn test_whitespace_only_document_is_empty() {
        let doc = Document::load("d0", &UploadedFile::new("blank.txt", "  \n\t ")).unwrap();
        assert!(doc.is_empty());
    }
}
