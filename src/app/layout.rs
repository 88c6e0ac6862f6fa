use scraper::{CaseSensitivity, ElementRef, Html};

use super::markup::{Serializer, fragment_root};

const CONTENT_ROOT_CLASS: &str = "mw-parser-output";

/// Class markers of blocks rendered in the side column.
pub const SIDE_BLOCK_CLASSES: [&str; 6] = [
    "infobox",
    "thumb",
    "tright",
    "floatright",
    "float-right",
    "sidebar",
];

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SplitArticle {
    pub main_html: String,
    pub side_blocks: Vec<String>,
}

/// Partitions article markup into the main flow and side-column blocks.
///
/// Only direct children of the content root are considered, so an infobox
/// nested inside prose stays where it is.
pub fn split_article(markup: &str) -> SplitArticle {
    let fragment = Html::parse_fragment(markup);
    let top = fragment_root(&fragment);
    // A wrapper nested deeper than the top level is ordinary content.
    let root = top
        .children()
        .filter_map(ElementRef::wrap)
        .find(|child| {
            child
                .value()
                .has_class(CONTENT_ROOT_CLASS, CaseSensitivity::CaseSensitive)
        })
        .unwrap_or(top);

    let side = root
        .children()
        .filter_map(ElementRef::wrap)
        .filter(is_side_block)
        .collect::<Vec<_>>();

    let plain = Serializer::new();
    let side_blocks = side.iter().map(|block| plain.outer(*block)).collect();
    let main_html = Serializer::new()
        .skip_nodes(side.iter().map(|block| block.id()))
        .inner(root);

    SplitArticle {
        main_html,
        side_blocks,
    }
}

fn is_side_block(element: &ElementRef) -> bool {
    element
        .value()
        .classes()
        .any(|class| SIDE_BLOCK_CLASSES.contains(&class))
}

#[cfg(test)]
mod tests {
    use super::*;

    const ARTICLE: &str = r#"<div class="mw-parser-output">
<table class="infobox vcard"><tr><td>Mass: 6.4e23 kg</td></tr></table>
<p>Mars is the fourth planet.</p>
<div class="thumb tright"><div class="thumbinner"><img src="https://grokipedia.com/m.png"></div></div>
<p>It has two moons.</p>
<div class="note"><table class="infobox"><tr><td>nested</td></tr></table></div>
<div class="sidebar"><ul><li>Solar System</li></ul></div>
</div>"#;

    #[test]
    fn extracts_direct_side_children_in_source_order() {
        let split = split_article(ARTICLE);
        assert_eq!(split.side_blocks.len(), 3);
        assert!(split.side_blocks[0].starts_with(r#"<table class="infobox vcard">"#));
        assert!(split.side_blocks[1].starts_with(r#"<div class="thumb tright">"#));
        assert!(split.side_blocks[2].starts_with(r#"<div class="sidebar">"#));

        assert!(split.main_html.contains("Mars is the fourth planet."));
        assert!(split.main_html.contains("It has two moons."));
        assert!(!split.main_html.contains("Mass: 6.4e23 kg"));
        assert!(!split.main_html.contains("thumbinner"));
    }

    #[test]
    fn nested_markers_stay_in_the_main_flow() {
        let split = split_article(ARTICLE);
        assert!(split.main_html.contains("nested"));
        assert!(split.side_blocks.iter().all(|block| !block.contains("nested")));
    }

    #[test]
    fn rerunning_on_main_html_extracts_nothing_more() {
        let first = split_article(ARTICLE);
        let second = split_article(&first.main_html);
        assert!(second.side_blocks.is_empty());
        assert_eq!(second.main_html, first.main_html);
    }

    #[test]
    fn extracted_blocks_never_contain_other_extracted_blocks() {
        let markup = r#"<div class="infobox"><div class="thumb">inner</div></div><p>text</p>"#;
        let split = split_article(markup);
        assert_eq!(split.side_blocks.len(), 1);
        assert!(split.side_blocks[0].contains("inner"));
        assert_eq!(split.main_html, "<p>text</p>");
    }

    #[test]
    fn falls_back_to_fragment_root_without_wrapper() {
        let split = split_article(r#"<p>a</p><div class="floatright">b</div>"#);
        assert_eq!(split.main_html, "<p>a</p>");
        assert_eq!(split.side_blocks, vec![r#"<div class="floatright">b</div>"#]);
    }

    #[test]
    fn nested_wrapper_does_not_replace_the_root() {
        let markup = concat!(
            "<p>Intro paragraph.</p>",
            r#"<table class="infobox"><tr><td>facts</td></tr></table>"#,
            r#"<div class="hatnote"><div class="mw-parser-output"><span>note</span></div></div>"#,
            "<p>Closing paragraph.</p>",
        );
        let split = split_article(markup);
        assert_eq!(split.side_blocks.len(), 1);
        assert!(split.side_blocks[0].contains("facts"));
        assert!(split.main_html.starts_with("<p>Intro paragraph.</p>"));
        assert!(split.main_html.contains("<span>note</span>"));
        assert!(split.main_html.ends_with("<p>Closing paragraph.</p>"));
    }
}
