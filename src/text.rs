//! Pure text-cleaning helpers: whitespace normalization, URL extraction
//! and validation, HTML sanitization, and street address parsing.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;

static WHITESPACE_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s\s+").unwrap());

static HREF_ATTR: Lazy<Regex> = Lazy::new(|| Regex::new(r#"href=["'](.*?)["']"#).unwrap());

static IMG_SRC_ATTR: Lazy<Regex> = Lazy::new(|| Regex::new(r#"src="(.*?)""#).unwrap());

/// Street addresses as the feed writes them: street and number, an optional
/// Espoo postal code (02xxx) and an optional locality suffix.
static STREET_ADDRESS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)^([a-zàáâãäåæçèéêëìíîïðñòóôõö÷øùúûüýþÿ \-]*[0-9 \-]* ?[a-z]{0,2}),? *(0?2[0-9]{3})? *(espoo|esbo)?",
    )
    .unwrap()
});

/// Inline tags allowed to survive in event descriptions.
const DESCRIPTION_TAGS: [&str; 11] = [
    "u", "b", "h2", "h3", "em", "ul", "li", "strong", "br", "p", "a",
];

/// Normalize whitespace: drop non-breaking spaces and control separators,
/// collapse runs of whitespace, trim the ends.
pub fn clean_text(text: &str, strip_newlines: bool) -> String {
    let mut text = text.replace('\u{a0}', " ").replace('\u{1f}', "");
    if strip_newlines {
        text = text.replace('\r', "").replace('\n', " ");
    }
    WHITESPACE_RUN.replace_all(&text, " ").trim().to_string()
}

/// Validate a URL, prepending a scheme for bare `www.` style values.
/// Returns `None` for text that does not parse as an absolute URL.
pub fn clean_url(url: &str) -> Option<String> {
    let mut url = clean_text(url, true);
    if url.is_empty() {
        return None;
    }
    if !url.contains("://") {
        url = format!("http://{}", url);
    }
    match reqwest::Url::parse(&url) {
        Ok(parsed) if parsed.host_str().is_some() => Some(url),
        _ => None,
    }
}

/// Extract the URL from an html fragment if any, and return it cleaned if valid.
pub fn find_url(markup: &str) -> Option<String> {
    let url = HREF_ATTR
        .captures(markup)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
        .unwrap_or(markup);
    clean_url(url)
}

/// First image source in an html fragment, if any.
pub fn find_image_src(markup: &str) -> Option<String> {
    IMG_SRC_ATTR
        .captures(markup)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

/// Reduce an html description to the allow-listed inline tags, dropping
/// everything else while keeping the text content.
pub fn sanitize_description(html: &str) -> String {
    let tags: HashSet<&str> = DESCRIPTION_TAGS.iter().copied().collect();
    let cleaned = ammonia::Builder::default()
        .tags(tags)
        .clean(html)
        .to_string();
    clean_text(&cleaned, false)
}

/// Strip all markup, keeping only text content.
pub fn strip_tags(html: &str) -> String {
    ammonia::Builder::empty().clean(html).to_string()
}

/// Components of a loosely structured street address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressParts {
    pub street_address: String,
    pub postal_code: String,
    pub address_locality: String,
}

/// Parse a raw address string into street, postal code and locality.
/// Returns `None` when the text does not resemble an address at all; a
/// matched address may still carry an empty street, which callers must
/// treat as unresolvable.
pub fn parse_street_address(address: &str) -> Option<AddressParts> {
    let captures = STREET_ADDRESS.captures(address.trim())?;
    let street = captures.get(1).map(|m| m.as_str()).unwrap_or("");
    Some(AddressParts {
        street_address: clean_text(street, true),
        postal_code: captures
            .get(2)
            .map(|m| m.as_str().to_string())
            .unwrap_or_default(),
        address_locality: captures
            .get(3)
            .map(|m| m.as_str().to_string())
            .unwrap_or_default(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_text_collapses_whitespace() {
        assert_eq!(clean_text("  foo \u{a0} bar  ", false), "foo bar");
        assert_eq!(clean_text("foo\r\nbar", true), "foo bar");
    }

    #[test]
    fn clean_url_accepts_bare_hosts() {
        assert_eq!(
            clean_url("www.espoo.fi/tapahtumat").as_deref(),
            Some("http://www.espoo.fi/tapahtumat")
        );
        assert_eq!(
            clean_url("https://example.com/x").as_deref(),
            Some("https://example.com/x")
        );
        assert_eq!(clean_url(""), None);
    }

    #[test]
    fn find_url_prefers_href() {
        let markup = r#"<a href="http://example.com/tickets">Buy</a>"#;
        assert_eq!(
            find_url(markup).as_deref(),
            Some("http://example.com/tickets")
        );
        assert_eq!(
            find_url("http://example.com/plain").as_deref(),
            Some("http://example.com/plain")
        );
    }

    #[test]
    fn sanitize_keeps_inline_tags_only() {
        let html = "<script>alert(1)</script><p>Hello <strong>world</strong></p>";
        let cleaned = sanitize_description(html);
        assert!(cleaned.contains("<strong>world</strong>"));
        assert!(!cleaned.contains("script"));
    }

    #[test]
    fn strip_tags_keeps_text() {
        assert_eq!(strip_tags("<p>Konsertti <em>nyt</em></p>"), "Konsertti nyt");
    }

    #[test]
    fn full_address_parses_into_components() {
        let parts = parse_street_address("Kamreerintie 2, 02100 Espoo").unwrap();
        assert_eq!(parts.street_address, "Kamreerintie 2");
        assert_eq!(parts.postal_code, "02100");
        assert_eq!(parts.address_locality, "Espoo");
    }

    #[test]
    fn postal_code_and_locality_are_optional() {
        let parts = parse_street_address("Ahertajantie 5 B").unwrap();
        assert_eq!(parts.street_address, "Ahertajantie 5 B");
        assert_eq!(parts.postal_code, "");
        assert_eq!(parts.address_locality, "");
    }

    #[test]
    fn junk_yields_empty_street() {
        let parts = parse_street_address("???").unwrap();
        assert_eq!(parts.street_address, "");
    }
}
