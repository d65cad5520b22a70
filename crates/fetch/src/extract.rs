//! Paragraph text extraction from fetched HTML bodies.

use chardetng::EncodingDetector;
use scraper::{Html, Selector};

/// Assembled text content of one page.
#[derive(Debug)]
pub struct ExtractedText {
    /// Newline-terminated concatenation of every paragraph that passed the
    /// filters.
    pub text: String,
    /// Characters of paragraph text seen on the page, filtered or not.
    pub char_count: u64,
    /// Whether every paragraph decoded as recognizable text.
    pub all_recognized: bool,
}

/// Collect the text of every paragraph-level element.
///
/// A paragraph contributes to the blob only if it decodes as a recognized
/// character encoding and carries at least one character; `char_count`
/// still counts everything seen, which is what the work record reports.
pub fn extract_paragraphs(body: &str) -> ExtractedText {
    let doc = Html::parse_document(body);
    let p_sel = Selector::parse("p").expect("static selector");

    let mut text = String::new();
    let mut char_count: u64 = 0;
    let mut all_recognized = true;

    for el in doc.select(&p_sel) {
        let paragraph: String = el.text().collect();
        char_count += paragraph.chars().count() as u64;

        let recognized = is_recognized_text(&paragraph);
        if !recognized {
            all_recognized = false;
        }
        if recognized && !paragraph.is_empty() {
            text.push_str(&paragraph);
            text.push('\n');
        }
    }

    ExtractedText {
        text,
        char_count,
        all_recognized,
    }
}

/// Whether the bytes sniff as a recognized character encoding and decode
/// cleanly under it. Empty input has no detectable encoding.
fn is_recognized_text(text: &str) -> bool {
    if text.is_empty() {
        return false;
    }
    let mut detector = EncodingDetector::new();
    detector.feed(text.as_bytes(), true);
    let encoding = detector.guess(None, true);
    let (_, _, malformed) = encoding.decode(text.as_bytes());
    !malformed
}
