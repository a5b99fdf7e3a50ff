//! Structural pass over the tree-sitter HTML tree.
//!
//! Finds script/style elements, event-handler attributes, `javascript:` URI
//! attributes, external script/stylesheet references (including `@import`
//! inside style elements) and inline `style` attributes. ERROR nodes from
//! malformed markup are walked like any other node, so whatever the parser
//! could place is still reported.

use once_cell::sync::Lazy;
use regex::Regex;
use tree_sitter::Node;

use super::common::{
    is_event_handler, is_pseudo_protocol, is_remote_target, is_uri_attribute, node_end_line,
    node_start_line, node_text,
};
use super::{
    BlockKind, CodeBlock, ExternalReference, InlineStyle, Locality, Locus, Origin, ReferenceKind,
};

static CSS_IMPORT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)@import\s+(?:url\(\s*)?['"]?([^'"()\s;]+)"#).unwrap()
});

static SERVER_MARKUP: Lazy<Regex> = Lazy::new(|| Regex::new(r"<%|<\?|@[A-Za-z_(]").unwrap());

/// Blocks and references found by one structural pass.
#[derive(Debug, Default)]
pub struct StructuralPass {
    pub blocks: Vec<CodeBlock>,
    pub references: Vec<ExternalReference>,
    pub inline_styles: Vec<InlineStyle>,
}

/// One attribute of a start tag.
struct Attr<'a> {
    name: &'a str,
    value: Option<&'a str>,
    node: Node<'a>,
}

pub fn structural_pass(source_path: &str, source: &str, root: Node) -> StructuralPass {
    let mut pass = StructuralPass::default();
    walk(root, source_path, source, &mut pass);
    pass
}

fn walk(node: Node, source_path: &str, source: &str, pass: &mut StructuralPass) {
    match node.kind() {
        "script_element" => visit_element(node, BlockKind::ScriptBlock, source_path, source, pass),
        "style_element" => visit_element(node, BlockKind::StyleBlock, source_path, source, pass),
        "start_tag" | "self_closing_tag" => visit_tag(node, source_path, source, pass),
        _ => {}
    }

    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        walk(child, source_path, source, pass);
    }
}

// ============ Elements ============

fn visit_element(
    node: Node,
    kind: BlockKind,
    source_path: &str,
    source: &str,
    pass: &mut StructuralPass,
) {
    let mut start_tag = None;
    let mut body = None;
    let mut closed = false;

    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        match child.kind() {
            "start_tag" => start_tag = Some(child),
            "raw_text" => body = Some(child),
            "end_tag" if !child.is_missing() && child.end_byte() > child.start_byte() => {
                closed = true
            }
            _ => {}
        }
    }

    let attrs = start_tag.map(|t| attributes(t, source)).unwrap_or_default();

    if kind == BlockKind::ScriptBlock {
        if let Some(src) = attr_value(&attrs, "src") {
            pass.references.push(reference(
                source_path,
                node_start_line(node),
                ReferenceKind::Script,
                src,
            ));
            return;
        }
        if attr_value(&attrs, "runat").is_some_and(|v| v.trim().eq_ignore_ascii_case("server")) {
            log::debug!(
                "{}:{}: server-side script skipped",
                source_path,
                node_start_line(node)
            );
            return;
        }
    }

    if kind == BlockKind::StyleBlock {
        if let Some(body) = body {
            style_imports(body, source_path, source, pass);
        }
    }

    let start_line = node_start_line(node);
    pass.blocks.push(CodeBlock {
        source_path: source_path.to_string(),
        start_line,
        end_line: node_end_line(node).max(start_line),
        kind,
        raw_text: body.map(|b| node_text(b, source)).unwrap_or("").to_string(),
        origin: Origin::StructuralMatch,
        attribute: None,
        locus: Locus {
            element: closed.then(|| node.start_byte()..node.end_byte()),
            anchor_line: start_line,
        },
    });
}

/// `@import` rules inside a style element are stylesheet references.
fn style_imports(body: Node, source_path: &str, source: &str, pass: &mut StructuralPass) {
    let css = node_text(body, source);
    let first_line = node_start_line(body);
    for caps in CSS_IMPORT.captures_iter(css) {
        let (Some(whole), Some(target)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        let line = first_line + css[..whole.start()].matches('\n').count();
        pass.references.push(reference(
            source_path,
            line,
            ReferenceKind::Stylesheet,
            target.as_str(),
        ));
    }
}

// ============ Tags ============

fn visit_tag(tag: Node, source_path: &str, source: &str, pass: &mut StructuralPass) {
    let attrs = attributes(tag, source);
    let anchor_line = node_start_line(tag);

    for attr in &attrs {
        if attr.name.eq_ignore_ascii_case("style") {
            if let Some(value) = attr.value.filter(|v| !v.trim().is_empty()) {
                pass.inline_styles.push(InlineStyle {
                    source_path: source_path.to_string(),
                    line: node_start_line(attr.node),
                    element: tag_name(tag, source).unwrap_or("").to_string(),
                    value: value.to_string(),
                    server_templated: SERVER_MARKUP.is_match(value),
                });
            }
            continue;
        }
        let kind = if is_event_handler(attr.name) {
            BlockKind::EventHandlerAttribute
        } else if is_uri_attribute(attr.name) && attr.value.is_some_and(is_pseudo_protocol) {
            BlockKind::PseudoProtocolUri
        } else {
            continue;
        };

        let start_line = node_start_line(attr.node);
        pass.blocks.push(CodeBlock {
            source_path: source_path.to_string(),
            start_line,
            end_line: node_end_line(attr.node).max(start_line),
            kind,
            raw_text: attr.value.unwrap_or("").to_string(),
            origin: Origin::StructuralMatch,
            attribute: Some(attr.name.to_string()),
            locus: Locus {
                element: None,
                anchor_line,
            },
        });
    }

    if tag_name(tag, source).is_some_and(|n| n.eq_ignore_ascii_case("link")) {
        let is_stylesheet = attr_value(&attrs, "rel").is_some_and(|rel| {
            rel.split_whitespace()
                .any(|r| r.eq_ignore_ascii_case("stylesheet"))
        });
        if let (true, Some(href)) = (is_stylesheet, attr_value(&attrs, "href")) {
            pass.references.push(reference(
                source_path,
                anchor_line,
                ReferenceKind::Stylesheet,
                href,
            ));
        }
    }
}

fn tag_name<'a>(tag: Node, source: &'a str) -> Option<&'a str> {
    let mut cursor = tag.walk();
    let name = tag
        .children(&mut cursor)
        .find(|c| c.kind() == "tag_name")
        .map(|c| node_text(c, source));
    name
}

fn attributes<'a>(tag: Node<'a>, source: &'a str) -> Vec<Attr<'a>> {
    let mut attrs = Vec::new();
    let mut cursor = tag.walk();
    for attr in tag.children(&mut cursor) {
        if attr.kind() != "attribute" {
            continue;
        }
        let mut name = None;
        let mut value = None;
        let mut inner = attr.walk();
        for part in attr.children(&mut inner) {
            match part.kind() {
                "attribute_name" => name = Some(node_text(part, source)),
                "attribute_value" => value = Some(node_text(part, source)),
                "quoted_attribute_value" => {
                    let mut quoted = part.walk();
                    let text = part
                        .children(&mut quoted)
                        .find(|c| c.kind() == "attribute_value")
                        .map(|c| node_text(c, source))
                        .unwrap_or("");
                    value = Some(text);
                }
                _ => {}
            }
        }
        if let Some(name) = name {
            attrs.push(Attr {
                name,
                value,
                node: attr,
            });
        }
    }
    attrs
}

fn attr_value<'a>(attrs: &[Attr<'a>], name: &str) -> Option<&'a str> {
    attrs
        .iter()
        .find(|a| a.name.eq_ignore_ascii_case(name))
        .and_then(|a| a.value)
}

fn reference(
    source_path: &str,
    line: usize,
    kind: ReferenceKind,
    target: &str,
) -> ExternalReference {
    ExternalReference {
        source_path: source_path.to_string(),
        line,
        kind,
        target: target.trim().to_string(),
        locality: if is_remote_target(target) {
            Locality::Remote
        } else {
            Locality::Local
        },
    }
}
