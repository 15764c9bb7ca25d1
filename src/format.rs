//! Document formats understood by the orchestrator.
//!
//! A format is identified by its file extension. The registry only ever
//! compares [`DocumentFormat`] values, so user-supplied extensions are parsed
//! exactly once, here, and unknown ones become
//! [`ConvertError::UnsupportedFormat`] before anything touches the disk.

use crate::error::ConvertError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

/// A document format, keyed by canonical file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentFormat {
    Pdf,
    Docx,
    Doc,
    Rtf,
    Odt,
    Xlsx,
    Pptx,
    // Source-only office formats.
    Txt,
    Html,
    Csv,
    Xls,
    Ppt,
    Ods,
    Odp,
}

impl DocumentFormat {
    /// Every format the orchestrator can produce.
    pub const TARGETS: &'static [DocumentFormat] = &[
        DocumentFormat::Pdf,
        DocumentFormat::Docx,
        DocumentFormat::Doc,
        DocumentFormat::Rtf,
        DocumentFormat::Odt,
        DocumentFormat::Xlsx,
        DocumentFormat::Pptx,
    ];

    /// Every format the orchestrator accepts as input.
    pub const SOURCES: &'static [DocumentFormat] = &[
        DocumentFormat::Pdf,
        DocumentFormat::Docx,
        DocumentFormat::Doc,
        DocumentFormat::Rtf,
        DocumentFormat::Odt,
        DocumentFormat::Xlsx,
        DocumentFormat::Pptx,
        DocumentFormat::Txt,
        DocumentFormat::Html,
        DocumentFormat::Csv,
        DocumentFormat::Xls,
        DocumentFormat::Ppt,
        DocumentFormat::Ods,
        DocumentFormat::Odp,
    ];

    /// Canonical lowercase extension without the dot.
    pub fn extension(self) -> &'static str {
        match self {
            DocumentFormat::Pdf => "pdf",
            DocumentFormat::Docx => "docx",
            DocumentFormat::Doc => "doc",
            DocumentFormat::Rtf => "rtf",
            DocumentFormat::Odt => "odt",
            DocumentFormat::Xlsx => "xlsx",
            DocumentFormat::Pptx => "pptx",
            DocumentFormat::Txt => "txt",
            DocumentFormat::Html => "html",
            DocumentFormat::Csv => "csv",
            DocumentFormat::Xls => "xls",
            DocumentFormat::Ppt => "ppt",
            DocumentFormat::Ods => "ods",
            DocumentFormat::Odp => "odp",
        }
    }

    /// MIME type used for the `Content-Type` of a converted download.
    pub fn mime_type(self) -> &'static str {
        match self {
            DocumentFormat::Pdf => "application/pdf",
            DocumentFormat::Docx => {
                "application/vnd.openxmlformats-officedocument.wordprocessingml.document"
            }
            DocumentFormat::Doc => "application/msword",
            DocumentFormat::Rtf => "application/rtf",
            DocumentFormat::Odt => "application/vnd.oasis.opendocument.text",
            DocumentFormat::Xlsx => {
                "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet"
            }
            DocumentFormat::Pptx => {
                "application/vnd.openxmlformats-officedocument.presentationml.presentation"
            }
            DocumentFormat::Txt => "text/plain",
            DocumentFormat::Html => "text/html",
            DocumentFormat::Csv => "text/csv",
            DocumentFormat::Xls => "application/vnd.ms-excel",
            DocumentFormat::Ppt => "application/vnd.ms-powerpoint",
            DocumentFormat::Ods => "application/vnd.oasis.opendocument.spreadsheet",
            DocumentFormat::Odp => "application/vnd.oasis.opendocument.presentation",
        }
    }

    /// Leading magic bytes of a well-formed file, if the format has any.
    ///
    /// OOXML and ODF files are ZIP containers; DOC/XLS/PPT are OLE2
    /// compound files. Text formats have no reliable signature.
    pub fn signature(self) -> Option<&'static [u8]> {
        match self {
            DocumentFormat::Pdf => Some(b"%PDF-"),
            DocumentFormat::Docx
            | DocumentFormat::Xlsx
            | DocumentFormat::Pptx
            | DocumentFormat::Odt
            | DocumentFormat::Ods
            | DocumentFormat::Odp => Some(b"PK\x03\x04"),
            DocumentFormat::Doc | DocumentFormat::Xls | DocumentFormat::Ppt => {
                Some(&[0xD0, 0xCF, 0x11, 0xE0, 0xA1, 0xB1, 0x1A, 0xE1])
            }
            DocumentFormat::Rtf => Some(b"{\\rtf"),
            DocumentFormat::Txt | DocumentFormat::Html | DocumentFormat::Csv => None,
        }
    }

    /// `true` if `bytes` start with this format's signature (or it has none).
    pub fn matches_signature(self, bytes: &[u8]) -> bool {
        self.signature().map_or(true, |sig| bytes.starts_with(sig))
    }

    /// Whether the format is a word-processing document.
    pub fn is_text_document(self) -> bool {
        matches!(
            self,
            DocumentFormat::Docx
                | DocumentFormat::Doc
                | DocumentFormat::Rtf
                | DocumentFormat::Odt
        )
    }

    /// Parse the extension of a file name (`"Report.PDF"` → `Pdf`).
    pub fn from_file_name(name: &str) -> Result<Self, ConvertError> {
        let ext = Path::new(name)
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("");
        ext.parse()
    }
}

impl FromStr for DocumentFormat {
    type Err = ConvertError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let ext = s.trim().trim_start_matches('.').to_ascii_lowercase();
        let format = match ext.as_str() {
            "pdf" => DocumentFormat::Pdf,
            "docx" => DocumentFormat::Docx,
            "doc" => DocumentFormat::Doc,
            "rtf" => DocumentFormat::Rtf,
            "odt" => DocumentFormat::Odt,
            "xlsx" => DocumentFormat::Xlsx,
            "pptx" => DocumentFormat::Pptx,
            "txt" => DocumentFormat::Txt,
            "html" | "htm" => DocumentFormat::Html,
            "csv" => DocumentFormat::Csv,
            "xls" => DocumentFormat::Xls,
            "ppt" => DocumentFormat::Ppt,
            "ods" => DocumentFormat::Ods,
            "odp" => DocumentFormat::Odp,
            _ => {
                return Err(ConvertError::UnsupportedFormat {
                    source_ext: ext.clone(),
                    target: ext,
                })
            }
        };
        Ok(format)
    }
}

impl fmt::Display for DocumentFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_is_case_insensitive_and_tolerates_dot() {
        assert_eq!("PDF".parse::<DocumentFormat>().unwrap(), DocumentFormat::Pdf);
        assert_eq!(".docx".parse::<DocumentFormat>().unwrap(), DocumentFormat::Docx);
        assert_eq!("htm".parse::<DocumentFormat>().unwrap(), DocumentFormat::Html);
        assert!("xml".parse::<DocumentFormat>().is_err());
        assert!("".parse::<DocumentFormat>().is_err());
    }

    #[test]
    fn from_file_name_uses_last_extension() {
        assert_eq!(
            DocumentFormat::from_file_name("archive.tar.pdf").unwrap(),
            DocumentFormat::Pdf
        );
        assert_eq!(
            DocumentFormat::from_file_name("Slide.PPTX").unwrap(),
            DocumentFormat::Pptx
        );
        assert!(DocumentFormat::from_file_name("README").is_err());
    }

    #[test]
    fn every_target_is_also_a_source() {
        for t in DocumentFormat::TARGETS {
            assert!(DocumentFormat::SOURCES.contains(t), "{t} missing from SOURCES");
        }
    }

    #[test]
    fn signatures() {
        assert!(DocumentFormat::Pdf.matches_signature(b"%PDF-1.7\n"));
        assert!(!DocumentFormat::Pdf.matches_signature(b"PK\x03\x04"));
        assert!(DocumentFormat::Docx.matches_signature(b"PK\x03\x04rest"));
        assert!(DocumentFormat::Rtf.matches_signature(b"{\\rtf1\\ansi"));
        assert!(DocumentFormat::Txt.matches_signature(b"anything"));
    }

    #[test]
    fn mime_types_are_never_empty() {
        for f in DocumentFormat::SOURCES {
            assert!(!f.mime_type().is_empty());
        }
    }

    #[test]
    fn text_documents_are_word_processing_targets() {
        let text: Vec<_> = DocumentFormat::SOURCES
            .iter()
            .copied()
            .filter(|f| f.is_text_document())
            .collect();
        assert_eq!(
            text,
            [DocumentFormat::Docx, DocumentFormat::Doc, DocumentFormat::Rtf, DocumentFormat::Odt]
        );
        for f in text {
            assert!(DocumentFormat::TARGETS.contains(&f));
        }
    }
}
