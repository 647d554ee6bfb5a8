//! Canonical XML 1.0 (inclusive), with or without comments.

use std::fmt::Write as _;

use super::{
    algorithms::{
        C14N_EXCLUSIVE, C14N_EXCLUSIVE_WITH_COMMENTS, C14N_INCLUSIVE, C14N_INCLUSIVE_WITH_COMMENTS,
    },
    dom::{
        Attribute, Document, Element, NamespaceMap, Node, XML_NAMESPACE,
        write_processing_instruction,
    },
};
use crate::{CryptoError, error::result::CryptoResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CanonicalizationMethod {
    Inclusive,
    InclusiveWithComments,
}

impl CanonicalizationMethod {
    pub fn from_uri(uri: &str) -> CryptoResult<Self> {
        match uri {
            C14N_INCLUSIVE => Ok(Self::Inclusive),
            C14N_INCLUSIVE_WITH_COMMENTS => Ok(Self::InclusiveWithComments),
            C14N_EXCLUSIVE | C14N_EXCLUSIVE_WITH_COMMENTS => Err(CryptoError::NotSupported(
                "exclusive XML canonicalization is not supported".to_owned(),
            )),
            other => Err(CryptoError::NotSupported(format!(
                "unknown canonicalization method: {other}"
            ))),
        }
    }

    #[must_use]
    pub const fn uri(self) -> &'static str {
        match self {
            Self::Inclusive => C14N_INCLUSIVE,
            Self::InclusiveWithComments => C14N_INCLUSIVE_WITH_COMMENTS,
        }
    }

    #[must_use]
    pub const fn with_comments(self) -> bool {
        matches!(self, Self::InclusiveWithComments)
    }
}

/// Serializes a document or a subtree into its canonical form.
///
/// An excluded element (the enveloped signature) is skipped together with
/// its whole subtree.
pub struct Canonicalizer<'a> {
    with_comments: bool,
    excluded: Option<&'a Element>,
}

impl<'a> Canonicalizer<'a> {
    #[must_use]
    pub const fn new(with_comments: bool) -> Self {
        Self {
            with_comments,
            excluded: None,
        }
    }

    #[must_use]
    pub const fn excluding(mut self, element: &'a Element) -> Self {
        self.excluded = Some(element);
        self
    }

    /// Canonical form of the whole document
    #[must_use]
    pub fn document(&self, document: &Document) -> String {
        let mut out = String::new();
        for node in &document.prolog {
            if self.write_node(node, &NamespaceMap::default(), &mut out) {
                out.push('\n');
            }
        }
        let empty = NamespaceMap::default();
        self.write_element(&document.root, &empty, &empty, &[], &mut out);
        for node in &document.epilog {
            let mut buffer = String::from("\n");
            if self.write_node(node, &NamespaceMap::default(), &mut buffer) {
                out.push_str(&buffer);
            }
        }
        out
    }

    /// Canonical form of the subtree rooted at the last element of `path`,
    /// `path` being the ancestor chain starting at the document root.
    ///
    /// The apex carries every namespace in scope and the `xml:*` attributes
    /// inherited from its ancestors.
    #[must_use]
    pub fn subtree(&self, path: &[&Element]) -> String {
        let mut out = String::new();
        let Some((apex, ancestors)) = path.split_last() else {
            return out;
        };
        let ancestors_scope = NamespaceMap::in_scope(ancestors);
        let mut inherited: Vec<&Attribute> = vec![];
        for ancestor in ancestors.iter().rev() {
            for attribute in &ancestor.attributes {
                if attribute.namespace.as_deref() == Some(XML_NAMESPACE)
                    && !inherited
                        .iter()
                        .any(|a| a.local_name == attribute.local_name)
                {
                    inherited.push(attribute);
                }
            }
        }
        self.write_element(
            apex,
            &ancestors_scope,
            &NamespaceMap::default(),
            &inherited,
            &mut out,
        );
        out
    }

    fn is_excluded(&self, element: &Element) -> bool {
        self.excluded.is_some_and(|e| std::ptr::eq(e, element))
    }

    /// Returns `false` when nothing was written
    fn write_node(&self, node: &Node, scope: &NamespaceMap, out: &mut String) -> bool {
        match node {
            Node::Element(element) => {
                if self.is_excluded(element) {
                    return false;
                }
                self.write_element(element, scope, scope, &[], out);
            }
            Node::Text(text) => escape_text(text, out),
            Node::Comment(comment) => {
                if !self.with_comments {
                    return false;
                }
                let _ = write!(out, "<!--{comment}-->");
            }
            Node::ProcessingInstruction { target, content } => {
                write_processing_instruction(target, content, out);
            }
        }
        true
    }

    fn write_element(
        &self,
        element: &Element,
        parent_scope: &NamespaceMap,
        rendered: &NamespaceMap,
        inherited_attributes: &[&Attribute],
        out: &mut String,
    ) {
        if self.is_excluded(element) {
            return;
        }
        let mut scope = parent_scope.clone();
        scope.extend_with(element);

        let name = element.qualified_name();
        out.push('<');
        out.push_str(&name);

        if rendered.get("").is_some_and(|u| !u.is_empty()) && !scope.contains_prefix("") {
            out.push_str(" xmlns=\"\"");
        }
        for (prefix, uri) in scope.iter() {
            if prefix == "xml" || rendered.get(prefix) == Some(uri) {
                continue;
            }
            if prefix.is_empty() {
                out.push_str(" xmlns=\"");
            } else {
                let _ = write!(out, " xmlns:{prefix}=\"");
            }
            escape_attribute(uri, out);
            out.push('"');
        }

        let mut attributes: Vec<&Attribute> = element.attributes.iter().collect();
        for inherited in inherited_attributes {
            if !attributes
                .iter()
                .any(|a| a.namespace == inherited.namespace && a.local_name == inherited.local_name)
            {
                attributes.push(*inherited);
            }
        }
        attributes.sort_by(|a, b| {
            (a.namespace.as_deref().unwrap_or_default(), &a.local_name)
                .cmp(&(b.namespace.as_deref().unwrap_or_default(), &b.local_name))
        });
        for attribute in attributes {
            let _ = write!(out, " {}=\"", attribute.qualified_name());
            escape_attribute(&attribute.value, out);
            out.push('"');
        }
        out.push('>');

        for child in &element.children {
            self.write_node(child, &scope, out);
        }
        let _ = write!(out, "</{name}>");
    }
}

/// Text node escaping of Canonical XML
pub(crate) fn escape_text(text: &str, out: &mut String) {
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '\r' => out.push_str("&#xD;"),
            c => out.push(c),
        }
    }
}

/// Attribute value escaping of Canonical XML
pub(crate) fn escape_attribute(value: &str, out: &mut String) {
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '"' => out.push_str("&quot;"),
            '\t' => out.push_str("&#x9;"),
            '\n' => out.push_str("&#xA;"),
            '\r' => out.push_str("&#xD;"),
            c => out.push(c),
        }
    }
}
