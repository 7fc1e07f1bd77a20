//! Namespace-aware lookups over an `xmltree` document.

use xmltree::{Element, XMLNode};

pub(crate) fn is(element: &Element, namespace: &str, name: &str) -> bool {
    element.name == name && element.namespace.as_deref() == Some(namespace)
}

/// First direct child with the given namespace and local name.
pub(crate) fn child<'a>(element: &'a Element, namespace: &str, name: &str) -> Option<&'a Element> {
    element.children.iter().find_map(|node| match node {
        XMLNode::Element(e) if is(e, namespace, name) => Some(e),
        _ => None,
    })
}

/// First descendant (document order, excluding `element` itself) matching the name.
pub(crate) fn descendant<'a>(
    element: &'a Element,
    namespace: &str,
    name: &str,
) -> Option<&'a Element> {
    for node in &element.children {
        if let XMLNode::Element(e) = node {
            if is(e, namespace, name) {
                return Some(e);
            }
            if let Some(found) = descendant(e, namespace, name) {
                return Some(found);
            }
        }
    }
    None
}

/// Every descendant matching the name, in document order.
pub(crate) fn descendants<'a>(
    element: &'a Element,
    namespace: &str,
    name: &str,
    out: &mut Vec<&'a Element>,
) {
    for node in &element.children {
        if let XMLNode::Element(e) = node {
            if is(e, namespace, name) {
                out.push(e);
            }
            descendants(e, namespace, name, out);
        }
    }
}

/// Trimmed text content, `None` when empty.
pub(crate) fn text(element: Option<&Element>) -> Option<String> {
    let text = element?.get_text()?;
    let trimmed = text.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}
