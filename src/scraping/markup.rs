//! Cell markup normalisation for the AADT table.

use std::sync::OnceLock;

use regex::Regex;
use scraper::Html;

static FOOTNOTE_RE: OnceLock<Regex> = OnceLock::new();

fn footnote_re() -> &'static Regex {
    FOOTNOTE_RE.get_or_init(|| {
        Regex::new(r"(?is)<sup\b[^>]*>.*?</sup\s*>").expect("valid footnote pattern")
    })
}

/// Remove `<sup>…</sup>` annotations (estimate / adjustment flags).
pub fn strip_footnotes(html: &str) -> String {
    footnote_re().replace_all(html, "").into_owned()
}

/// Visible text of an HTML fragment: tags dropped, entities decoded,
/// whitespace collapsed.
pub fn fragment_text(html: &str) -> String {
    let fragment = Html::parse_fragment(html);
    let text: String = fragment.root_element().text().collect();
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Count value as stored: footnotes stripped, then reduced to text.
pub fn count_text(html: &str) -> String {
    fragment_text(&strip_footnotes(html))
}
