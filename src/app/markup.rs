//! Serializes scraper trees back to markup.
//!
//! scraper's own `html()` cannot drop subtrees or edit attributes, so the
//! scraper, layout splitter and exporter all go through [`Serializer`].

use std::borrow::Cow;
use std::collections::HashSet;

use ego_tree::{NodeId, NodeRef};
use scraper::{ElementRef, Html, Node, Selector};
use tracing::warn;
use url::Url;

const VOID_ELEMENTS: [&str; 14] = [
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "param",
    "source", "track", "wbr",
];

const RAW_TEXT_ELEMENTS: [&str; 2] = ["script", "style"];

#[derive(Debug, Default, Clone)]
pub struct Serializer {
    skip: Vec<Selector>,
    skip_nodes: HashSet<NodeId>,
    absolute_base: Option<Url>,
    xhtml: bool,
}

impl Serializer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drops every element matching `selectors` (a selector list), at any depth.
    pub fn skip_matching(mut self, selectors: &str) -> Self {
        match Selector::parse(selectors) {
            Ok(selector) => self.skip.push(selector),
            Err(err) => warn!(selectors, error = %err, "ignoring invalid skip selector"),
        }
        self
    }

    pub fn skip_nodes(mut self, ids: impl IntoIterator<Item = NodeId>) -> Self {
        self.skip_nodes.extend(ids);
        self
    }

    /// Resolves root-relative `a[href]` and `img[src]` values against `base`.
    pub fn absolute_urls(mut self, base: &str) -> Self {
        match Url::parse(base) {
            Ok(base) => self.absolute_base = Some(base),
            Err(err) => warn!(base, error = %err, "ignoring invalid base URL"),
        }
        self
    }

    /// Emits self-closing void elements and drops comments.
    pub fn xhtml(mut self) -> Self {
        self.xhtml = true;
        self
    }

    pub fn inner(&self, element: ElementRef) -> String {
        let mut out = String::new();
        self.write_children(*element, &mut out, false);
        out
    }

    pub fn outer(&self, element: ElementRef) -> String {
        let mut out = String::new();
        self.write_element(element, &mut out);
        out
    }

    fn write_children(&self, node: NodeRef<Node>, out: &mut String, raw_text: bool) {
        for child in node.children() {
            self.write_node(child, out, raw_text);
        }
    }

    fn write_node(&self, node: NodeRef<Node>, out: &mut String, raw_text: bool) {
        match node.value() {
            Node::Text(text) => {
                let text: &str = text;
                if raw_text {
                    out.push_str(text);
                } else {
                    out.push_str(&html_escape::encode_text(text));
                }
            }
            Node::Comment(comment) => {
                if !self.xhtml {
                    let comment: &str = comment;
                    out.push_str("<!--");
                    out.push_str(comment);
                    out.push_str("-->");
                }
            }
            Node::Element(_) => {
                if let Some(element) = ElementRef::wrap(node) {
                    self.write_element(element, out);
                }
            }
            Node::Document | Node::Fragment => self.write_children(node, out, raw_text),
            _ => {}
        }
    }

    fn write_element(&self, element: ElementRef, out: &mut String) {
        if self.is_skipped(&element) {
            return;
        }

        let name = element.value().name();
        out.push('<');
        out.push_str(name);
        for (attr, value) in element.value().attrs() {
            let value = self.rewrite_attr(name, attr, value);
            out.push(' ');
            out.push_str(attr);
            out.push_str("=\"");
            out.push_str(&html_escape::encode_double_quoted_attribute(&value));
            out.push('"');
        }

        if VOID_ELEMENTS.contains(&name) {
            out.push_str(if self.xhtml { " />" } else { ">" });
            return;
        }
        out.push('>');

        let raw_text = !self.xhtml && RAW_TEXT_ELEMENTS.contains(&name);
        self.write_children(*element, out, raw_text);

        out.push_str("</");
        out.push_str(name);
        out.push('>');
    }

    fn is_skipped(&self, element: &ElementRef) -> bool {
        self.skip_nodes.contains(&element.id())
            || self.skip.iter().any(|selector| selector.matches(element))
    }

    fn rewrite_attr<'v>(&self, element: &str, attr: &str, value: &'v str) -> Cow<'v, str> {
        let Some(base) = self.absolute_base.as_ref() else {
            return Cow::Borrowed(value);
        };
        let rewritable = matches!((element, attr), ("a", "href") | ("img", "src"));
        if !rewritable || !value.starts_with('/') {
            return Cow::Borrowed(value);
        }
        match base.join(value) {
            Ok(resolved) => Cow::Owned(resolved.into()),
            Err(_) => Cow::Borrowed(value),
        }
    }
}

/// The implicit root of a parsed fragment (its synthetic `<html>` element).
pub fn fragment_root(fragment: &Html) -> ElementRef<'_> {
    fragment.root_element()
}

pub fn select_first<'a>(doc: &'a Html, selector: &str) -> Option<ElementRef<'a>> {
    let selector = Selector::parse(selector).ok()?;
    doc.select(&selector).next()
}

pub fn element_text(element: ElementRef) -> String {
    normalize_text(&element.text().collect::<String>())
}

pub fn normalize_text(input: &str) -> String {
    input.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fragment_inner(markup: &str, serializer: &Serializer) -> String {
        let fragment = Html::parse_fragment(markup);
        serializer.inner(fragment_root(&fragment))
    }

    #[test]
    fn plain_serialization_round_trips_simple_markup() {
        let markup = r#"<p class="lead">Mars &amp; <b>Phobos</b></p><img src="a.png">"#;
        assert_eq!(fragment_inner(markup, &Serializer::new()), markup);
    }

    #[test]
    fn rewrites_root_relative_links_and_images_only() {
        let markup = concat!(
            r#"<a href="/page/Mars">Mars</a>"#,
            r#"<a href="https://x.org/y">ext</a>"#,
            r##"<a href="#cite">cite</a>"##,
            r#"<img src="/img/mars.png">"#,
            r#"<img src="//cdn.example.org/p.png">"#,
            r#"<link href="/style.css">"#,
        );
        let out = fragment_inner(
            markup,
            &Serializer::new().absolute_urls("https://grokipedia.com/"),
        );
        assert!(out.contains(r#"href="https://grokipedia.com/page/Mars""#));
        assert!(out.contains(r#"href="https://x.org/y""#));
        assert!(out.contains(r##"href="#cite""##));
        assert!(out.contains(r#"src="https://grokipedia.com/img/mars.png""#));
        assert!(out.contains(r#"src="https://cdn.example.org/p.png""#));
        assert!(out.contains(r#"href="/style.css""#));
    }

    #[test]
    fn skips_matching_subtrees_at_any_depth() {
        let markup = r#"<div><p>keep</p><div id="toc"><ul><li>x</li></ul></div><span class="mw-editsection">[edit]</span></div>"#;
        let out = fragment_inner(
            markup,
            &Serializer::new().skip_matching("#toc, .mw-editsection"),
        );
        assert_eq!(out, "<div><p>keep</p></div>");
    }

    #[test]
    fn xhtml_mode_self_closes_void_elements_and_drops_comments() {
        let out = fragment_inner("<p>a<br>b<!-- note --></p><hr>", &Serializer::new().xhtml());
        assert_eq!(out, "<p>a<br />b</p><hr />");
    }

    #[test]
    fn style_contents_are_not_escaped() {
        let out = fragment_inner("<style>a > b { color: red; }</style>", &Serializer::new());
        assert_eq!(out, "<style>a > b { color: red; }</style>");
    }

    #[test]
    fn attribute_quotes_are_escaped() {
        let out = fragment_inner(r#"<a title='say "hi"'>x</a>"#, &Serializer::new());
        assert_eq!(out, r#"<a title="say &quot;hi&quot;">x</a>"#);
    }
}
