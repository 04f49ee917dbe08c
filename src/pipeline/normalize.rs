//! Content normalizer: newsletter HTML in, display fragment and excerpt out.

use std::sync::LazyLock;

use kuchiki::NodeRef;
use kuchiki::traits::*;
use regex::Regex;
use tracing::debug;

use crate::error::NormalizeError;
use crate::pipeline::dedup::message_identity;
use crate::pipeline::types::{NormalizedDocument, RawMessage};

/// Footer / boilerplate text found in newsletter templates (English and French).
static FOOTER_HINTS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)unsubscribe|email preferences|manage your (email|subscription)|view (this email )?in (your )?browser|you are receiving this|to stop receiving|d[ée]sinscri(re|ption)|d[ée]sabonner|voir (la version|cet e-?mail) (en ligne|dans (votre|le) navigateur)|vous recevez cet e-?mail|g[ée]rer (mes|vos) pr[ée]f[ée]rences",
    )
    .expect("footer hint pattern is valid")
});

/// Phrases that also show up in articles; they only count next to a real hint.
static WEAK_FOOTER_HINTS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)opt[ -]?out|preferences|pr[ée]f[ée]rences|privacy policy|confidentialit[ée]")
        .expect("weak footer hint pattern is valid")
});

/// Produces [`NormalizedDocument`]s from raw messages.
#[derive(Debug, Clone)]
pub struct ContentNormalizer {
    /// Excerpt bound in characters; 0 disables truncation.
    max_excerpt_chars: usize,
}

impl ContentNormalizer {
    pub fn new(max_excerpt_chars: usize) -> Self {
        Self { max_excerpt_chars }
    }

    pub fn normalize(&self, msg: &RawMessage) -> Result<NormalizedDocument, NormalizeError> {
        let identity = message_identity(&msg.subject, &msg.date);

        if !msg.body_html.trim().is_empty() {
            // Footer stripping is heuristic; it must never be what empties a message.
            for strip_footers in [true, false] {
                let document = kuchiki::parse_html().one(msg.body_html.as_str());
                clean_document(&document, strip_footers);
                // Text first: unwrapping divs and cells below erases block boundaries.
                let text = collapse_whitespace(&block_text(&document));
                if text.is_empty() {
                    continue;
                }
                if !strip_footers {
                    debug!(%identity, "Footer heuristic removed all content, keeping footers");
                }
                sanitize_allowed_elements(&document);
                return Ok(NormalizedDocument {
                    identity,
                    excerpt_text: truncate_chars(&text, self.max_excerpt_chars),
                    display_html: extract_body_html(&document),
                    image: lead_image(&document),
                });
            }
        }

        let text = msg.body_text.trim();
        if text.is_empty() {
            return Err(NormalizeError::EmptyBody);
        }
        Ok(NormalizedDocument {
            identity,
            excerpt_text: truncate_chars(&collapse_whitespace(text), self.max_excerpt_chars),
            display_html: text_to_html(text),
            image: None,
        })
    }
}

fn clean_document(document: &NodeRef, strip_footers: bool) {
    remove_html_comments(document);
    remove_elements_by_selector(
        document,
        "head, script, style, meta, link, title, noscript, iframe, form, header, footer, nav",
    );
    remove_webmail_chrome(document);
    remove_hidden_elements(document);
    remove_tracking_pixels(document);
    if strip_footers {
        remove_footer_blocks(document);
    }
}

fn remove_html_comments(document: &NodeRef) {
    let nodes: Vec<NodeRef> = document.descendants().collect();
    for node in nodes {
        if node.as_comment().is_some() {
            node.detach();
        }
    }
}

fn remove_elements_by_selector(document: &NodeRef, selector: &str) {
    if let Ok(nodes) = document.select(selector) {
        let nodes: Vec<_> = nodes.collect();
        for node in nodes {
            node.as_node().detach();
        }
    }
}

/// Forwarded newsletters carry Gmail quote wrappers and signatures.
fn remove_webmail_chrome(document: &NodeRef) {
    let nodes: Vec<NodeRef> = document.descendants().collect();
    for node in nodes {
        let Some(element) = node.as_element() else {
            continue;
        };
        let attrs = element.attributes.borrow();
        let is_chrome = ["class", "id"].iter().any(|key| {
            attrs.get(*key).is_some_and(|v| {
                let v = v.to_ascii_lowercase();
                v.contains("gmail_signature") || v.contains("gmail_attr")
            })
        });
        drop(attrs);
        if is_chrome {
            node.detach();
        }
    }
}

fn remove_hidden_elements(document: &NodeRef) {
    let nodes: Vec<NodeRef> = document.descendants().collect();
    for node in nodes {
        let Some(element) = node.as_element() else {
            continue;
        };
        if is_hidden_element(element) {
            node.detach();
        }
    }
}

fn remove_tracking_pixels(document: &NodeRef) {
    let nodes: Vec<NodeRef> = document.descendants().collect();
    for node in nodes {
        let Some(element) = node.as_element() else {
            continue;
        };
        if element.name.local.as_ref() == "img" && is_tracking_pixel(element) {
            node.detach();
        }
    }
}

/// Drops blocks marked as footers, and the innermost small blocks whose
/// text reads like one.
///
/// A wrapper that holds articles plus an unsubscribe line is kept; the
/// line's own block goes instead.
fn remove_footer_blocks(document: &NodeRef) {
    let candidates: Vec<NodeRef> = document
        .descendants()
        .filter(|node| {
            node.as_element()
                .is_some_and(|e| is_footer_candidate(e.name.local.as_ref()))
        })
        .collect();
    for node in candidates {
        let Some(element) = node.as_element() else {
            continue;
        };
        if has_footer_marker(element) {
            node.detach();
            continue;
        }
        if !reads_like_footer(&node) {
            continue;
        }
        let has_footer_child = node.descendants().skip(1).any(|inner| {
            inner
                .as_element()
                .is_some_and(|e| is_footer_candidate(e.name.local.as_ref()))
                && reads_like_footer(&inner)
        });
        if !has_footer_child {
            node.detach();
        }
    }
}

fn reads_like_footer(node: &NodeRef) -> bool {
    let text = node.text_contents();
    // A wrapper table cell holding the whole newsletter also mentions
    // "unsubscribe" somewhere.
    text.chars().count() <= 400 && footer_hint_score(&text) >= 2
}

/// Strong hints count two, weak ones one.
fn footer_hint_score(text: &str) -> usize {
    2 * FOOTER_HINTS.find_iter(text).count() + WEAK_FOOTER_HINTS.find_iter(text).count()
}

fn sanitize_allowed_elements(document: &NodeRef) {
    let nodes: Vec<NodeRef> = document.descendants().collect();
    for node in nodes {
        let Some(element) = node.as_element() else {
            continue;
        };
        let tag = element.name.local.as_ref();
        if !is_allowed_tag(tag) {
            unwrap_node(&node);
            continue;
        }
        prune_attributes(tag, element);
    }
}

fn extract_body_html(document: &NodeRef) -> String {
    if let Ok(mut bodies) = document.select("body")
        && let Some(body) = bodies.next()
    {
        let mut out = String::new();
        for child in body.as_node().children() {
            out.push_str(&child.to_string());
        }
        return out.trim().to_string();
    }
    document.to_string()
}

/// Text with a separator at every block boundary, so `<p>a</p><p>b</p>`
/// reads "a b" rather than "ab".
fn block_text(document: &NodeRef) -> String {
    let mut out = String::new();
    push_text(document, &mut out);
    out
}

fn push_text(node: &NodeRef, out: &mut String) {
    if let Some(text) = node.as_text() {
        out.push_str(&text.borrow());
        return;
    }
    let is_block = node
        .as_element()
        .is_some_and(|e| is_block_tag(e.name.local.as_ref()));
    if is_block {
        out.push(' ');
    }
    for child in node.children() {
        push_text(&child, out);
    }
    if is_block {
        out.push(' ');
    }
}

fn lead_image(document: &NodeRef) -> Option<String> {
    let images = document.select("img[src]").ok()?;
    for img in images {
        let attrs = img.attributes.borrow();
        if let Some(src) = attrs.get("src") {
            let src = src.trim();
            let lower = src.to_ascii_lowercase();
            if lower.starts_with("https://") || lower.starts_with("http://") {
                return Some(src.to_string());
            }
        }
    }
    None
}

fn unwrap_node(node: &NodeRef) {
    if node.parent().is_none() {
        return;
    }
    let children: Vec<NodeRef> = node.children().collect();
    for child in children {
        node.insert_before(child);
    }
    node.detach();
}

fn is_allowed_tag(tag: &str) -> bool {
    matches!(
        tag,
        "html"
            | "body"
            | "p"
            | "br"
            | "hr"
            | "a"
            | "img"
            | "ul"
            | "ol"
            | "li"
            | "strong"
            | "em"
            | "b"
            | "i"
            | "u"
            | "blockquote"
            | "h1"
            | "h2"
            | "h3"
            | "h4"
            | "h5"
            | "h6"
    )
}

fn is_block_tag(tag: &str) -> bool {
    matches!(
        tag,
        "p" | "br"
            | "hr"
            | "div"
            | "li"
            | "ul"
            | "ol"
            | "blockquote"
            | "h1"
            | "h2"
            | "h3"
            | "h4"
            | "h5"
            | "h6"
            | "table"
            | "tr"
            | "td"
            | "th"
            | "section"
            | "article"
    )
}

fn is_footer_candidate(tag: &str) -> bool {
    matches!(
        tag,
        "div" | "p" | "span" | "td" | "li" | "section" | "table" | "center"
    )
}

fn has_footer_marker(element: &kuchiki::ElementData) -> bool {
    let attrs = element.attributes.borrow();
    ["class", "id"].iter().any(|key| {
        attrs.get(*key).is_some_and(|value| {
            let lower = value.to_ascii_lowercase();
            lower.contains("footer") || lower.contains("unsubscribe")
        })
    })
}

fn is_hidden_element(element: &kuchiki::ElementData) -> bool {
    let attrs = element.attributes.borrow();
    if attrs.contains("hidden") {
        return true;
    }
    if attrs
        .get("aria-hidden")
        .is_some_and(|v| v.trim().eq_ignore_ascii_case("true"))
    {
        return true;
    }
    attrs.get("style").is_some_and(style_contains_hidden)
}

fn is_tracking_pixel(element: &kuchiki::ElementData) -> bool {
    let attrs = element.attributes.borrow();
    if attrs.get("style").is_some_and(style_contains_hidden) {
        return true;
    }
    let src = attrs.get("src").unwrap_or("").to_ascii_lowercase();
    if ["tracking", "pixel", "beacon", "open.gif", "/open/"]
        .iter()
        .any(|marker| src.contains(marker))
    {
        return true;
    }
    let width = attrs.get("width").and_then(parse_dimension).or_else(|| {
        attrs
            .get("style")
            .and_then(|style| style_dimension(style, "width"))
    });
    let height = attrs.get("height").and_then(parse_dimension).or_else(|| {
        attrs
            .get("style")
            .and_then(|style| style_dimension(style, "height"))
    });
    match (width, height) {
        (Some(w), Some(h)) => w <= 1 && h <= 1,
        (Some(d), None) | (None, Some(d)) => d <= 1,
        (None, None) => false,
    }
}

fn style_contains_hidden(style: &str) -> bool {
    let normalized: String = style
        .to_ascii_lowercase()
        .chars()
        .filter(|ch| !ch.is_whitespace())
        .collect();
    normalized.contains("display:none")
        || normalized.contains("visibility:hidden")
        || normalized.contains("opacity:0;")
        || normalized.ends_with("opacity:0")
        || normalized.contains("max-height:0")
}

fn style_dimension(style: &str, key: &str) -> Option<u32> {
    style.split(';').find_map(|part| {
        let (name, value) = part.split_once(':')?;
        (name.trim().eq_ignore_ascii_case(key))
            .then(|| parse_dimension(value))
            .flatten()
    })
}

fn parse_dimension(raw: &str) -> Option<u32> {
    let digits: String = raw
        .trim()
        .chars()
        .take_while(|ch| ch.is_ascii_digit())
        .collect();
    digits.parse().ok()
}

fn prune_attributes(tag: &str, element: &kuchiki::ElementData) {
    let mut attrs = element.attributes.borrow_mut();
    let to_remove: Vec<_> = attrs
        .map
        .keys()
        .filter(|name| {
            let local = name.local.as_ref();
            let keep = match tag {
                "a" => local == "href",
                "img" => matches!(local, "src" | "alt"),
                _ => false,
            };
            !keep
        })
        .cloned()
        .collect();
    for name in to_remove {
        attrs.map.remove(&name);
    }

    let attr = match tag {
        "a" => "href",
        "img" => "src",
        _ => return,
    };
    if attrs.get(attr).is_some_and(|v| !is_safe_url(v)) {
        attrs.remove(attr);
    }
}

fn is_safe_url(value: &str) -> bool {
    let lower = value.trim().to_ascii_lowercase();
    !lower.is_empty()
        && !(lower.starts_with("javascript:")
            || lower.starts_with("vbscript:")
            || lower.starts_with("data:text"))
}

fn text_to_html(text: &str) -> String {
    text.split("\n\n")
        .map(str::trim)
        .filter(|para| !para.is_empty())
        .map(|para| format!("<p>{}</p>", escape_html(para).replace('\n', "<br>")))
        .collect::<Vec<_>>()
        .join("\n")
}

fn escape_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for ch in input.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(ch),
        }
    }
    out
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// First `max` characters, never splitting a code point. `max == 0` keeps everything.
fn truncate_chars(text: &str, max: usize) -> String {
    if max == 0 {
        return text.to_string();
    }
    match text.char_indices().nth(max) {
        Some((byte_idx, _)) => text[..byte_idx].trim_end().to_string(),
        None => text.to_string(),
    }
}
