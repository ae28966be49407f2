// src/pipeline/extract.rs

//! Multi-format text extraction.
//!
//! Dispatches on the declared MIME type to produce raw plain text: HTML gets
//! a structural walk that keeps meaningful line and indentation structure,
//! PDF uses the embedded text layer with OCR as the fallback, DOCX is read
//! from the OOXML archive, RTF through a minimal control-word stripper. DOC
//! has no direct extractor; the scraper is asked for an alternate rendition
//! instead. Normalization of the extracted text happens later in
//! [`clean`](crate::pipeline::clean).

use std::io::Read;
use std::sync::Arc;

use quick_xml::events::Event;
use scraper::{ElementRef, Html, Selector};

use crate::error::{AppError, Result};
use crate::models::Document;
use crate::pipeline::clean::cp1252_byte_to_char;
use crate::services::{Coordinator, DocEntry, OcrEngine, RawDocument, Scraper};

pub const MIME_HTML: &str = "text/html";
pub const MIME_PDF: &str = "application/pdf";
pub const MIME_DOCX: &str =
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document";
pub const MIME_DOC: &str = "application/msword";
pub const MIME_RTF: &str = "application/rtf";

/// A PDF text layer with fewer alphabetic characters than this is treated as
/// absent; scanned documents often carry a few stray glyphs.
const TEXT_LAYER_MIN_ALPHABETIC: usize = 9;

/// Cap on a decompressed OOXML entry, against zip bombs.
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

/// Raw extraction output, before normalization.
#[derive(Debug, Clone)]
pub struct ExtractedText {
    pub text: String,
    /// MIME of the rendition the text actually came from
    pub mime: String,
    pub warnings: Vec<String>,
}

/// Dispatches fetched content to the per-format extractors.
pub struct Extractor {
    coordinator: Arc<Coordinator>,
    ocr: Option<Arc<dyn OcrEngine>>,
}

impl Extractor {
    pub fn new(coordinator: Arc<Coordinator>, ocr: Option<Arc<dyn OcrEngine>>) -> Self {
        Self { coordinator, ocr }
    }

    /// Extract plain text from a fetched document.
    ///
    /// A DOC rendition triggers one `fetch_alternate` round-trip through the
    /// scraper; that call happens inside the caller's fetch permit, so it
    /// never consumes extra concurrency.
    pub async fn extract(
        &self,
        scraper: &dyn Scraper,
        entry: &DocEntry,
        raw: RawDocument,
        artifact_selectors: &[String],
    ) -> Result<ExtractedText> {
        let mut warnings = Vec::new();
        let mut mime = normalize_mime(&raw.mime);
        let mut bytes = raw.bytes;

        if mime == MIME_DOC {
            match scraper.fetch_alternate(entry).await? {
                Some(alternate) => {
                    let alt_mime = normalize_mime(&alternate.mime);
                    if alt_mime == MIME_DOC {
                        return Err(AppError::NoExtractableFormat(
                            "alternate rendition is also DOC".to_string(),
                        ));
                    }
                    warnings
                        .push(format!("only DOC available; extracted {alt_mime} alternate"));
                    mime = alt_mime;
                    bytes = alternate.bytes;
                }
                None => {
                    return Err(AppError::NoExtractableFormat(
                        "only a DOC rendition is available".to_string(),
                    ));
                }
            }
        }

        let text = match mime.as_str() {
            MIME_HTML | "application/xhtml+xml" => {
                html_to_text(&String::from_utf8_lossy(&bytes), artifact_selectors)
            }
            MIME_PDF => self.pdf_to_text(bytes).await?,
            MIME_DOCX => docx_to_text(&bytes)?,
            MIME_RTF | "text/rtf" | "application/x-rtf" => rtf_to_text(&bytes)?,
            "text/plain" => String::from_utf8_lossy(&bytes).into_owned(),
            other => {
                return Err(AppError::NoExtractableFormat(format!(
                    "unsupported content type '{other}'"
                )));
            }
        };

        Ok(ExtractedText {
            text,
            mime,
            warnings,
        })
    }

    /// PDF text-layer extraction, falling back to OCR under the global OCR
    /// permit bound. Both run on the blocking pool; the permit is held for
    /// the whole OCR call.
    async fn pdf_to_text(&self, bytes: Vec<u8>) -> Result<String> {
        let layer_bytes = bytes.clone();
        let layer =
            tokio::task::spawn_blocking(move || pdf_extract::extract_text_from_mem(&layer_bytes))
                .await
                .map_err(|e| AppError::parse(format!("PDF text extraction aborted: {e}")))?
                .map_err(|e| AppError::parse(format!("PDF text extraction failed: {e}")))?;

        if Document::alphabetic_len(&layer) >= TEXT_LAYER_MIN_ALPHABETIC {
            return Ok(layer);
        }

        let Some(engine) = &self.ocr else {
            return Err(AppError::NoExtractableFormat(
                "PDF has no text layer and no OCR engine is configured".to_string(),
            ));
        };

        let _permit = self.coordinator.ocr_permit().await?;
        let engine = Arc::clone(engine);
        tokio::task::spawn_blocking(move || engine.pdf_to_text(&bytes))
            .await
            .map_err(|e| AppError::Ocr(format!("OCR task aborted: {e}")))?
            .map_err(AppError::Ocr)
    }
}

fn normalize_mime(raw: &str) -> String {
    raw.split(';').next().unwrap_or(raw).trim().to_ascii_lowercase()
}

// ---------------------------------------------------------------------------
// HTML
// ---------------------------------------------------------------------------

/// Tags whose content never contributes document text.
const SKIP_TAGS: &[&str] = &[
    "script", "style", "noscript", "head", "title", "template", "iframe", "svg", "nav", "button",
    "select",
];

/// Extract structural text from HTML.
///
/// Block elements break lines, paragraphs and headings get a blank line,
/// blockquotes indent their content, list items get a bullet. Elements
/// matching `artifact_selectors` (source-injected chrome such as inline
/// history notes) are dropped before any text is taken.
pub fn html_to_text(html: &str, artifact_selectors: &[String]) -> String {
    let document = Html::parse_document(html);

    let mut strip = Vec::new();
    for raw in artifact_selectors {
        match Selector::parse(raw) {
            Ok(selector) => strip.push(selector),
            Err(e) => log::warn!("Ignoring invalid artifact selector '{raw}': {e:?}"),
        }
    }

    let mut walker = TextWalker {
        out: String::new(),
        strip: &strip,
        quote_depth: 0,
        list_depth: 0,
        pre: false,
    };
    walker.walk(document.root_element());
    walker.out
}

struct TextWalker<'a> {
    out: String,
    strip: &'a [Selector],
    quote_depth: usize,
    list_depth: usize,
    pre: bool,
}

impl TextWalker<'_> {
    fn indent(&self) -> String {
        "    ".repeat(self.quote_depth)
    }

    fn at_line_start(&self) -> bool {
        self.out.is_empty() || self.out.ends_with('\n')
    }

    fn trim_line_end(&mut self) {
        while self.out.ends_with(' ') || self.out.ends_with('\t') {
            self.out.pop();
        }
    }

    fn end_line(&mut self) {
        self.trim_line_end();
        if !self.at_line_start() {
            self.out.push('\n');
        }
    }

    fn end_paragraph(&mut self) {
        self.end_line();
        if !self.out.is_empty() && !self.out.ends_with("\n\n") {
            self.out.push('\n');
        }
    }

    fn write_text(&mut self, text: &str) {
        if self.pre {
            self.out.push_str(text);
            return;
        }

        let leading_ws = text.chars().next().is_some_and(|c| c.is_whitespace());
        let trailing_ws = text.chars().last().is_some_and(|c| c.is_whitespace());
        let mut words = text.split_whitespace();

        let Some(first) = words.next() else {
            // Whitespace-only node separates adjacent inline runs.
            if !self.at_line_start() && !self.out.ends_with(' ') {
                self.out.push(' ');
            }
            return;
        };

        if self.at_line_start() {
            let indent = self.indent();
            self.out.push_str(&indent);
        } else if leading_ws && !self.out.ends_with(' ') {
            self.out.push(' ');
        }
        self.out.push_str(first);
        for word in words {
            self.out.push(' ');
            self.out.push_str(word);
        }
        if trailing_ws {
            self.out.push(' ');
        }
    }

    fn walk(&mut self, element: ElementRef<'_>) {
        for child in element.children() {
            if let Some(el) = ElementRef::wrap(child) {
                let tag = el.value().name();
                if SKIP_TAGS.contains(&tag) || self.strip.iter().any(|s| s.matches(&el)) {
                    continue;
                }
                match tag {
                    "br" => {
                        self.trim_line_end();
                        self.out.push('\n');
                    }
                    "hr" => self.end_paragraph(),
                    "p" | "h1" | "h2" | "h3" | "h4" | "h5" | "h6" | "table" => {
                        self.end_paragraph();
                        self.walk(el);
                        self.end_paragraph();
                    }
                    "blockquote" => {
                        self.end_paragraph();
                        self.quote_depth += 1;
                        self.walk(el);
                        self.quote_depth -= 1;
                        self.end_paragraph();
                    }
                    "pre" => {
                        self.end_paragraph();
                        self.pre = true;
                        self.walk(el);
                        self.pre = false;
                        self.end_paragraph();
                    }
                    "ul" | "ol" => {
                        self.end_line();
                        self.list_depth += 1;
                        self.walk(el);
                        self.list_depth -= 1;
                        self.end_line();
                    }
                    "li" => {
                        self.end_line();
                        let marker = format!(
                            "{}{}- ",
                            self.indent(),
                            "  ".repeat(self.list_depth.saturating_sub(1))
                        );
                        self.out.push_str(&marker);
                        self.walk(el);
                        self.end_line();
                    }
                    "td" | "th" => {
                        if !self.at_line_start() && !self.out.ends_with('\t') {
                            self.out.push('\t');
                        }
                        self.walk(el);
                    }
                    "tr" | "div" | "section" | "article" | "header" | "footer" | "main"
                    | "aside" | "address" | "figure" | "figcaption" | "form" | "fieldset"
                    | "dt" | "dd" | "center" => {
                        self.end_line();
                        self.walk(el);
                        self.end_line();
                    }
                    _ => self.walk(el),
                }
            } else if let scraper::Node::Text(text) = child.value() {
                self.write_text(&text.text);
            }
        }
    }
}

// ---------------------------------------------------------------------------
// DOCX
// ---------------------------------------------------------------------------

fn docx_to_text(bytes: &[u8]) -> Result<String> {
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes))
        .map_err(|e| AppError::parse(format!("DOCX archive: {e}")))?;
    let mut xml = Vec::new();
    {
        let entry = archive
            .by_name("word/document.xml")
            .map_err(|e| AppError::parse(format!("DOCX has no word/document.xml: {e}")))?;
        entry
            .take(MAX_XML_ENTRY_BYTES)
            .read_to_end(&mut xml)
            .map_err(|e| AppError::parse(format!("DOCX entry read: {e}")))?;
    }
    if xml.len() as u64 >= MAX_XML_ENTRY_BYTES {
        return Err(AppError::parse("DOCX document.xml exceeds size limit"));
    }
    document_xml_to_text(&xml)
}

/// Concatenate `w:t` runs, breaking lines on paragraph ends and explicit
/// breaks.
fn document_xml_to_text(xml: &[u8]) -> Result<String> {
    let mut out = String::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut in_text_run = false;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                if e.local_name().as_ref() == b"t" {
                    in_text_run = true;
                }
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_text_run = false,
                b"p" => out.push('\n'),
                _ => {}
            },
            Ok(Event::Empty(e)) => match e.local_name().as_ref() {
                b"br" | b"cr" => out.push('\n'),
                b"tab" => out.push('\t'),
                _ => {}
            },
            Ok(Event::Text(t)) if in_text_run => {
                let text = t
                    .unescape()
                    .map_err(|e| AppError::parse(format!("DOCX text run: {e}")))?;
                out.push_str(text.as_ref());
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(AppError::parse(format!("DOCX markup: {e}"))),
            _ => {}
        }
        buf.clear();
    }
    Ok(out)
}

// ---------------------------------------------------------------------------
// RTF
// ---------------------------------------------------------------------------

/// Destination groups whose content is formatting data, not document text.
const RTF_SKIP_DESTINATIONS: &[&str] = &[
    "fonttbl",
    "colortbl",
    "stylesheet",
    "info",
    "pict",
    "themedata",
    "listtable",
    "generator",
    "fldinst",
];

/// Minimal RTF to plain text: drops control words and formatting
/// destinations, keeps text, paragraph breaks, tabs and escaped characters.
fn rtf_to_text(bytes: &[u8]) -> Result<String> {
    let src = String::from_utf8_lossy(bytes);
    if !src.trim_start().starts_with("{\\rtf") {
        return Err(AppError::parse("not an RTF document"));
    }

    let mut out = String::new();
    let mut chars = src.chars().peekable();
    // One skip flag per open group; inner groups inherit the outer state.
    let mut groups: Vec<bool> = Vec::new();

    while let Some(c) = chars.next() {
        let skipping = *groups.last().unwrap_or(&false);
        match c {
            '{' => groups.push(skipping),
            '}' => {
                groups.pop();
            }
            '\\' => match chars.peek() {
                Some('\'') => {
                    chars.next();
                    let hi = chars.next();
                    let lo = chars.next();
                    if let (Some(hi), Some(lo)) = (hi, lo) {
                        if let Ok(byte) = u8::from_str_radix(&format!("{hi}{lo}"), 16) {
                            if !skipping {
                                out.push(cp1252_byte_to_char(byte));
                            }
                        }
                    }
                }
                Some(&symbol) if !symbol.is_ascii_alphabetic() => {
                    chars.next();
                    if !skipping {
                        match symbol {
                            '\\' | '{' | '}' => out.push(symbol),
                            '~' => out.push(' '),
                            _ => {}
                        }
                    }
                    if symbol == '*' {
                        if let Some(flag) = groups.last_mut() {
                            *flag = true;
                        }
                    }
                }
                _ => {
                    let mut word = String::new();
                    while let Some(&ch) = chars.peek() {
                        if ch.is_ascii_alphabetic() {
                            word.push(ch);
                            chars.next();
                        } else {
                            break;
                        }
                    }
                    let mut param = String::new();
                    if chars.peek() == Some(&'-') {
                        param.push('-');
                        chars.next();
                    }
                    while let Some(&ch) = chars.peek() {
                        if ch.is_ascii_digit() {
                            param.push(ch);
                            chars.next();
                        } else {
                            break;
                        }
                    }
                    // A single space after a control word is its delimiter.
                    if chars.peek() == Some(&' ') {
                        chars.next();
                    }

                    if RTF_SKIP_DESTINATIONS.contains(&word.as_str()) {
                        if let Some(flag) = groups.last_mut() {
                            *flag = true;
                        }
                    } else if !skipping {
                        match word.as_str() {
                            "par" | "line" | "sect" | "page" => out.push('\n'),
                            "tab" => out.push('\t'),
                            "u" => {
                                if let Ok(n) = param.parse::<i32>() {
                                    let code = n.rem_euclid(65536) as u32;
                                    if let Some(ch) = char::from_u32(code) {
                                        out.push(ch);
                                    }
                                }
                                // Consume the fallback character, if any.
                                if chars
                                    .peek()
                                    .is_some_and(|&ch| ch != '\\' && ch != '{' && ch != '}')
                                {
                                    chars.next();
                                }
                            }
                            _ => {}
                        }
                    }
                }
            },
            '\n' | '\r' => {}
            _ => {
                if !skipping {
                    out.push(c);
                }
            }
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use async_trait::async_trait;

    use super::*;
    use crate::services::SourceDescriptor;

    struct NoAlternates;

    #[async_trait]
    impl Scraper for NoAlternates {
        fn descriptor(&self) -> SourceDescriptor {
            SourceDescriptor::new("test_source")
        }

        async fn list_documents(&self) -> Result<Vec<DocEntry>> {
            Ok(Vec::new())
        }

        async fn fetch_document(&self, entry: &DocEntry) -> Result<RawDocument> {
            Err(AppError::not_found(entry.id.clone()))
        }
    }

    struct DocxAlternate;

    #[async_trait]
    impl Scraper for DocxAlternate {
        fn descriptor(&self) -> SourceDescriptor {
            SourceDescriptor::new("test_source")
        }

        async fn list_documents(&self) -> Result<Vec<DocEntry>> {
            Ok(Vec::new())
        }

        async fn fetch_document(&self, entry: &DocEntry) -> Result<RawDocument> {
            Err(AppError::not_found(entry.id.clone()))
        }

        async fn fetch_alternate(&self, _entry: &DocEntry) -> Result<Option<RawDocument>> {
            Ok(Some(RawDocument::new(
                docx_bytes(&["Reasons for judgment"]),
                MIME_DOCX,
            )))
        }
    }

    fn extractor() -> Extractor {
        Extractor::new(Arc::new(Coordinator::new(1)), None)
    }

    fn docx_bytes(paragraphs: &[&str]) -> Vec<u8> {
        let mut writer = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
        writer
            .start_file("word/document.xml", zip::write::SimpleFileOptions::default())
            .unwrap();
        let mut xml = String::from(
            r#"<?xml version="1.0"?><w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main"><w:body>"#,
        );
        for paragraph in paragraphs {
            xml.push_str(&format!("<w:p><w:r><w:t>{paragraph}</w:t></w:r></w:p>"));
        }
        xml.push_str("</w:body></w:document>");
        writer.write_all(xml.as_bytes()).unwrap();
        writer.finish().unwrap().into_inner()
    }

    #[test]
    fn html_paragraphs_and_stripping() {
        let html = r#"<html><head><script>var x = 1;</script></head><body>
            <div class="history-note">Inserted by Act 5 of 2001</div>
            <h1>Evidence Act 1995</h1>
            <p>An Act about the law of evidence.</p>
            <p>Part 1 <b>Preliminary</b></p>
        </body></html>"#;

        let text = html_to_text(html, &["div.history-note".to_string()]);
        assert!(!text.contains("var x"));
        assert!(!text.contains("Inserted by Act 5"));
        assert!(text.contains("Evidence Act 1995\n\nAn Act about the law of evidence."));
        assert!(text.contains("Part 1 Preliminary"));
    }

    #[test]
    fn html_list_items_get_bullets() {
        let html = "<ul><li>First order</li><li>Second order</li></ul>";
        assert_eq!(
            html_to_text(html, &[]).trim(),
            "- First order\n- Second order"
        );
    }

    #[test]
    fn html_blockquote_indents() {
        let html = "<p>The court held:</p><blockquote>The appeal is dismissed.</blockquote>";
        assert_eq!(
            html_to_text(html, &[]).trim(),
            "The court held:\n\n    The appeal is dismissed."
        );
    }

    #[test]
    fn html_br_breaks_lines() {
        let html = "<p>Heard: 1 May 2024<br>Decided: 3 May 2024</p>";
        assert_eq!(
            html_to_text(html, &[]).trim(),
            "Heard: 1 May 2024\nDecided: 3 May 2024"
        );
    }

    #[test]
    fn html_table_cells_are_tab_separated() {
        let html = "<table><tr><td>Citation</td><td>[2024] HCA 1</td></tr></table>";
        assert_eq!(
            html_to_text(html, &[]).trim(),
            "Citation\t[2024] HCA 1"
        );
    }

    #[test]
    fn rtf_text_and_paragraphs() {
        let rtf = r"{\rtf1\ansi{\fonttbl{\f0 Times New Roman;}}\f0\fs24 Notice of filing\par Filed: 1 May 2024}";
        let text = rtf_to_text(rtf.as_bytes()).unwrap();
        assert_eq!(text, "Notice of filing\nFiled: 1 May 2024");
    }

    #[test]
    fn rtf_hex_escapes_decode_as_cp1252() {
        let rtf = r"{\rtf1 the court\'92s view}";
        assert_eq!(rtf_to_text(rtf.as_bytes()).unwrap(), "the court\u{2019}s view");
    }

    #[test]
    fn rtf_rejects_non_rtf_bytes() {
        assert!(matches!(
            rtf_to_text(b"plain text"),
            Err(AppError::Parse(_))
        ));
    }

    #[test]
    fn docx_paragraph_extraction() {
        let bytes = docx_bytes(&["Order 1: appeal allowed", "Order 2: costs reserved"]);
        let text = docx_to_text(&bytes).unwrap();
        assert_eq!(
            text.trim(),
            "Order 1: appeal allowed\nOrder 2: costs reserved"
        );
    }

    #[test]
    fn docx_rejects_non_zip_bytes() {
        assert!(matches!(docx_to_text(b"not a zip"), Err(AppError::Parse(_))));
    }

    #[tokio::test]
    async fn unsupported_mime_is_not_extractable() {
        let raw = RawDocument::new(b"\x00\x01".to_vec(), "application/octet-stream");
        let result = extractor()
            .extract(&NoAlternates, &DocEntry::new("d1"), raw, &[])
            .await;
        assert!(matches!(result, Err(AppError::NoExtractableFormat(_))));
    }

    #[tokio::test]
    async fn doc_without_alternate_is_not_extractable() {
        let raw = RawDocument::new(b"\xd0\xcf\x11\xe0".to_vec(), MIME_DOC);
        let result = extractor()
            .extract(&NoAlternates, &DocEntry::new("d1"), raw, &[])
            .await;
        assert!(matches!(result, Err(AppError::NoExtractableFormat(_))));
    }

    #[tokio::test]
    async fn doc_with_alternate_extracts_and_warns() {
        let raw = RawDocument::new(b"\xd0\xcf\x11\xe0".to_vec(), MIME_DOC);
        let extracted = extractor()
            .extract(&DocxAlternate, &DocEntry::new("d1"), raw, &[])
            .await
            .unwrap();
        assert_eq!(extracted.mime, MIME_DOCX);
        assert!(extracted.text.contains("Reasons for judgment"));
        assert_eq!(extracted.warnings.len(), 1);
        assert!(extracted.warnings[0].contains("only DOC available"));
    }

    #[tokio::test]
    async fn truncated_pdf_is_a_parse_error() {
        let raw = RawDocument::new(b"%PDF-1.7 garbage".to_vec(), MIME_PDF);
        let result = extractor()
            .extract(&NoAlternates, &DocEntry::new("d1"), raw, &[])
            .await;
        assert!(matches!(result, Err(AppError::Parse(_))));
    }

    #[test]
    fn mime_parameters_are_ignored() {
        assert_eq!(normalize_mime("text/html; charset=utf-8"), "text/html");
        assert_eq!(normalize_mime("Application/PDF"), "application/pdf");
    }
}
