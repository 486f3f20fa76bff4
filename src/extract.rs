use scraper::Html;

/// Elements whose text never reaches a reader.
const SKIPPED_ELEMENTS: [&str; 4] = ["script", "style", "noscript", "template"];

/// Splits the visible text of an HTML document into whitespace-delimited
/// tokens, in document order.
pub fn page_tokens(html: &str) -> Vec<String> {
    let document = Html::parse_document(html);
    let mut tokens = Vec::new();

    for node in document.root_element().descendants() {
        let Some(text) = node.value().as_text() else {
            continue;
        };

        let hidden = node
            .parent()
            .and_then(|parent| parent.value().as_element())
            .is_some_and(|element| SKIPPED_ELEMENTS.iter().any(|name| *name == element.name()));
        if hidden {
            continue;
        }

        tokens.extend(text.split_whitespace().map(str::to_string));
    }

    tokens
}
