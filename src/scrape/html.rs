//! Positional element lookup, the way the upstream pages are addressed.
//!
//! The catalog's markup carries almost no ids or semantic classes, so pages
//! are navigated by structural paths such as
//! `body/div[2]/div[2]/div/div[2]`. A [`Step`] is one segment of such a path.

use scraper::{ElementRef, Node};

/// One segment of a structural path, relative to the current element.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Step {
    /// The n-th (1-based) child element with this tag name
    Nth(&'static str, usize),
    /// Any child element with this tag name; the first one for which the
    /// rest of the path resolves wins
    Any(&'static str),
}

/// Resolves `path` starting at `start`. Returns `None` if any step is missing.
pub(crate) fn find_path<'a>(start: ElementRef<'a>, path: &[Step]) -> Option<ElementRef<'a>> {
    let Some((step, rest)) = path.split_first() else {
        return Some(start);
    };
    match *step {
        Step::Nth(tag, n) => child_elements(start, tag)
            .nth(n.checked_sub(1)?)
            .and_then(|child| find_path(child, rest)),
        Step::Any(tag) => child_elements(start, tag).find_map(|child| find_path(child, rest)),
    }
}

fn child_elements<'a>(
    parent: ElementRef<'a>,
    tag: &'static str,
) -> impl Iterator<Item = ElementRef<'a>> + 'a {
    parent
        .children()
        .filter_map(ElementRef::wrap)
        .filter(move |child| child.value().name() == tag)
}

/// Concatenated descendant text with runs of whitespace collapsed to one space.
pub(crate) fn clean_text(element: ElementRef<'_>) -> String {
    collapse_whitespace(&element.text().collect::<String>())
}

/// Text of the element's direct text-node children, one entry per node.
/// Child elements (`<br>`, `<a>`, ...) are skipped.
pub(crate) fn direct_text_nodes(element: ElementRef<'_>) -> Vec<String> {
    element
        .children()
        .filter_map(|child| match child.value() {
            Node::Text(text) => Some(collapse_whitespace(text)),
            _ => None,
        })
        .collect()
}

pub(crate) fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

pub(crate) fn has_class(element: ElementRef<'_>, class: &str) -> bool {
    element.value().classes().any(|c| c == class)
}
