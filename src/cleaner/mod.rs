//! HTML to markdown reduction
//!
//! Pure functions that reduce a fetched page to clean markdown before it
//! goes anywhere near the LLM. Markdown cuts the token count by more than
//! half against raw HTML while preserving the text, structure, links, and
//! emphasis the extraction needs. Images and scripted content are dropped.

use scraper::node::Node;
use scraper::{Html, Selector};
use serde_json::{json, Value};

/// Tags whose entire subtree is dropped
const SKIPPED_TAGS: &[&str] = &[
    "script", "style", "noscript", "template", "head", "iframe", "svg", "img",
    "picture", "video", "audio", "canvas", "object",
];

#[derive(Debug, Clone, Copy, Default)]
struct RenderCtx {
    /// Inside <pre>: whitespace is preserved verbatim
    preformatted: bool,
    /// Nesting depth for list indentation
    list_depth: usize,
}

/// Convert HTML to clean markdown
///
/// Returns an empty string for empty or text-free input; the Fetch stage
/// treats that as a failure.
pub fn to_markdown(html: &str) -> String {
    if html.trim().is_empty() {
        return String::new();
    }

    let document = Html::parse_document(html);
    let mut rendered = String::new();
    for child in document.tree.root().children() {
        rendered.push_str(&render_node(child, RenderCtx::default()));
    }

    tidy(&rendered)
}

/// Extract lightweight page metadata (title, description, language)
pub fn page_metadata(html: &str) -> Value {
    let document = Html::parse_document(html);

    let title_selector = Selector::parse("title").expect("static selector");
    let title = document
        .select(&title_selector)
        .next()
        .map(|el| el.text().collect::<String>().trim().to_string())
        .filter(|t| !t.is_empty());

    let description = select_meta(&document, "meta[name=\"description\"]")
        .or_else(|| select_meta(&document, "meta[property=\"og:description\"]"));

    let html_selector = Selector::parse("html").expect("static selector");
    let language = document
        .select(&html_selector)
        .next()
        .and_then(|el| el.value().attr("lang"))
        .map(str::to_string);

    json!({
        "title": title,
        "description": description,
        "language": language,
    })
}

fn select_meta(document: &Html, selector: &str) -> Option<String> {
    let selector = Selector::parse(selector).ok()?;
    document
        .select(&selector)
        .next()
        .and_then(|el| el.value().attr("content"))
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty())
}

fn render_node(node: ego_tree::NodeRef<'_, Node>, ctx: RenderCtx) -> String {
    match node.value() {
        Node::Text(text) => {
            if ctx.preformatted {
                text.to_string()
            } else {
                collapse_whitespace(&text)
            }
        }
        Node::Element(element) => render_element(node, element.name(), ctx),
        _ => String::new(),
    }
}

fn render_children(node: ego_tree::NodeRef<'_, Node>, ctx: RenderCtx) -> String {
    node.children().map(|child| render_node(child, ctx)).collect()
}

fn render_element(node: ego_tree::NodeRef<'_, Node>, tag: &str, ctx: RenderCtx) -> String {
    if SKIPPED_TAGS.contains(&tag) {
        return String::new();
    }

    match tag {
        "h1" | "h2" | "h3" | "h4" | "h5" | "h6" => {
            let level = tag[1..].parse::<usize>().unwrap_or(1);
            let text = render_children(node, ctx);
            let text = text.trim();
            if text.is_empty() {
                String::new()
            } else {
                format!("\n\n{} {}\n\n", "#".repeat(level), text)
            }
        }
        "p" | "div" | "section" | "article" | "main" | "header" | "footer" | "aside"
        | "nav" | "figure" | "figcaption" | "details" | "summary" => {
            format!("\n\n{}\n\n", render_children(node, ctx).trim())
        }
        "br" => "\n".to_string(),
        "hr" => "\n\n---\n\n".to_string(),
        "ul" | "ol" => render_list(node, tag == "ol", ctx),
        "li" => render_children(node, ctx),
        "a" => render_link(node, ctx),
        "strong" | "b" => wrap_inline(node, ctx, "**"),
        "em" | "i" => wrap_inline(node, ctx, "*"),
        "code" if !ctx.preformatted => {
            let text = render_children(node, ctx);
            if text.trim().is_empty() {
                String::new()
            } else {
                format!("`{}`", text.trim())
            }
        }
        "pre" => {
            let inner = render_children(
                node,
                RenderCtx {
                    preformatted: true,
                    ..ctx
                },
            );
            format!("\n\n```\n{}\n```\n\n", inner.trim_matches('\n'))
        }
        "blockquote" => {
            let inner = tidy(&render_children(node, ctx));
            let quoted: Vec<String> = inner.lines().map(|l| format!("> {l}")).collect();
            format!("\n\n{}\n\n", quoted.join("\n"))
        }
        "tr" => {
            let cells: Vec<String> = node
                .children()
                .filter_map(|child| match child.value() {
                    Node::Element(el) if el.name() == "td" || el.name() == "th" => {
                        Some(render_children(child, ctx).trim().to_string())
                    }
                    _ => None,
                })
                .collect();
            format!("{}\n", cells.join(" | "))
        }
        "table" | "thead" | "tbody" | "tfoot" => {
            format!("\n\n{}\n\n", render_children(node, ctx).trim())
        }
        _ => render_children(node, ctx),
    }
}

fn render_list(node: ego_tree::NodeRef<'_, Node>, ordered: bool, ctx: RenderCtx) -> String {
    let item_ctx = RenderCtx {
        list_depth: ctx.list_depth + 1,
        ..ctx
    };
    let indent = "  ".repeat(ctx.list_depth);

    let mut out = String::from("\n\n");
    let mut index = 0usize;
    for child in node.children() {
        let is_item = matches!(child.value(), Node::Element(el) if el.name() == "li");
        if !is_item {
            continue;
        }
        index += 1;
        let text = render_node(child, item_ctx);
        let text = text.trim();
        if text.is_empty() {
            continue;
        }
        let marker = if ordered {
            format!("{index}. ")
        } else {
            "- ".to_string()
        };
        out.push_str(&format!("{indent}{marker}{text}\n"));
    }
    out.push('\n');
    out
}

fn render_link(node: ego_tree::NodeRef<'_, Node>, ctx: RenderCtx) -> String {
    let text = render_children(node, ctx);
    let text = text.trim();
    let href = match node.value() {
        Node::Element(el) => el.attr("href"),
        _ => None,
    };

    match href {
        Some(href) if !text.is_empty() && !href.starts_with('#') && !href.is_empty() => {
            format!("[{text}]({href})")
        }
        _ => text.to_string(),
    }
}

fn wrap_inline(node: ego_tree::NodeRef<'_, Node>, ctx: RenderCtx, marker: &str) -> String {
    let text = render_children(node, ctx);
    let text = text.trim();
    if text.is_empty() {
        String::new()
    } else {
        format!("{marker}{text}{marker}")
    }
}

/// Collapse runs of whitespace into single spaces, preserving word breaks
///
/// Edge whitespace survives as one space so adjacent inline nodes keep
/// their separation; block-level rendering trims it away.
fn collapse_whitespace(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut last_was_space = false;
    for c in text.chars() {
        if c.is_whitespace() {
            if !last_was_space {
                out.push(' ');
            }
            last_was_space = true;
        } else {
            out.push(c);
            last_was_space = false;
        }
    }
    out
}

/// Final cleanup: strip trailing spaces, cap blank runs at one empty line
///
/// Leading whitespace is left alone: list indentation and preformatted
/// blocks depend on it.
fn tidy(rendered: &str) -> String {
    let mut lines: Vec<&str> = Vec::new();
    let mut blank_run = 0usize;

    for line in rendered.lines().map(str::trim_end) {
        if line.is_empty() {
            blank_run += 1;
            if blank_run > 1 {
                continue;
            }
            lines.push("");
        } else {
            blank_run = 0;
            lines.push(line);
        }
    }

    lines.join("\n").trim().to_string()
}
