// src/pipeline/clean.rs

//! Text normalization applied after raw extraction.
//!
//! Order matters: charset repair must run before any other cleaning, since
//! mojibake sequences contain characters the later passes would mangle.

use std::sync::OnceLock;

use regex::Regex;

/// Windows-1252 byte values for the 0x80..=0x9F block, indexed by offset.
/// `None` marks the five unassigned positions.
const CP1252_HIGH: [Option<char>; 32] = [
    Some('\u{20AC}'), // 0x80 €
    None,             // 0x81
    Some('\u{201A}'), // 0x82 ‚
    Some('\u{0192}'), // 0x83 ƒ
    Some('\u{201E}'), // 0x84 „
    Some('\u{2026}'), // 0x85 …
    Some('\u{2020}'), // 0x86 †
    Some('\u{2021}'), // 0x87 ‡
    Some('\u{02C6}'), // 0x88 ˆ
    Some('\u{2030}'), // 0x89 ‰
    Some('\u{0160}'), // 0x8A Š
    Some('\u{2039}'), // 0x8B ‹
    Some('\u{0152}'), // 0x8C Œ
    None,             // 0x8D
    Some('\u{017D}'), // 0x8E Ž
    None,             // 0x8F
    None,             // 0x90
    Some('\u{2018}'), // 0x91 '
    Some('\u{2019}'), // 0x92 '
    Some('\u{201C}'), // 0x93 "
    Some('\u{201D}'), // 0x94 "
    Some('\u{2022}'), // 0x95 •
    Some('\u{2013}'), // 0x96 –
    Some('\u{2014}'), // 0x97 —
    Some('\u{02DC}'), // 0x98 ˜
    Some('\u{2122}'), // 0x99 ™
    Some('\u{0161}'), // 0x9A š
    Some('\u{203A}'), // 0x9B ›
    Some('\u{0153}'), // 0x9C œ
    None,             // 0x9D
    Some('\u{017E}'), // 0x9E ž
    Some('\u{0178}'), // 0x9F Ÿ
];

/// Decode one windows-1252 byte.
pub(crate) fn cp1252_byte_to_char(byte: u8) -> char {
    match byte {
        0x80..=0x9F => CP1252_HIGH[(byte - 0x80) as usize].unwrap_or('\u{FFFD}'),
        _ => byte as char,
    }
}

/// Encode a char as a windows-1252 byte, if it has one.
fn char_to_cp1252(c: char) -> Option<u8> {
    match c {
        '\u{0}'..='\u{7F}' => Some(c as u8),
        '\u{A0}'..='\u{FF}' => Some(c as u8),
        _ => CP1252_HIGH
            .iter()
            .position(|&entry| entry == Some(c))
            .map(|offset| 0x80 + offset as u8),
    }
}

/// Leading bytes of multi-byte UTF-8 sequences, as windows-1252 shows them.
fn has_mojibake_markers(text: &str) -> bool {
    text.chars()
        .any(|c| matches!(c, '\u{C2}'..='\u{C3}' | '\u{E0}'..='\u{EF}' | '\u{F0}'..='\u{F4}'))
}

/// One round of mojibake reversal: re-encode as windows-1252 and decode as
/// UTF-8. Returns `None` unless every char round-trips and the result is
/// valid UTF-8 that actually shrank (i.e. multi-byte sequences were healed).
fn undo_cp1252_pass(text: &str) -> Option<String> {
    let bytes: Option<Vec<u8>> = text.chars().map(char_to_cp1252).collect();
    let repaired = String::from_utf8(bytes?).ok()?;
    (repaired.chars().count() < text.chars().count()).then_some(repaired)
}

/// Repair text that was decoded with the wrong charset.
///
/// Handles UTF-8 content mis-read as windows-1252 (including the
/// double-encoded case) and normalizes non-breaking spaces.
pub fn repair_encoding(text: &str) -> String {
    let mut result = text.to_string();

    // Double-encoded text needs a second pass.
    for _ in 0..2 {
        if !has_mojibake_markers(&result) {
            break;
        }
        match undo_cp1252_pass(&result) {
            Some(repaired) => result = repaired,
            None => break,
        }
    }

    result.replace('\u{A0}', " ")
}

/// Strip all control characters except newline and tab.
pub fn strip_control_chars(text: &str) -> String {
    text.chars()
        .filter(|&c| !c.is_control() || c == '\n' || c == '\t')
        .collect()
}

fn trailing_ws_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?m)[ \t]+$").expect("static regex"))
}

fn blank_run_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\n{3,}").expect("static regex"))
}

/// Tidy line structure without destroying intentional indentation: right-trim
/// every line, collapse runs of blank lines to a single blank line, and drop
/// blank lines at the start and end of the text. Leading whitespace on
/// content lines is left alone.
pub fn tidy_whitespace(text: &str) -> String {
    let text = trailing_ws_re().replace_all(text, "");
    let text = blank_run_re().replace_all(&text, "\n\n");
    text.trim_matches('\n').to_string()
}

/// Full normalization pass, in the required order.
pub fn clean_text(text: &str) -> String {
    let repaired = repair_encoding(text);
    let stripped = strip_control_chars(&repaired);
    tidy_whitespace(&stripped)
}
