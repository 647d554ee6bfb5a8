//! A small owned XML tree.
//!
//! The tree keeps exactly what canonicalization needs: qualified names with
//! their resolved namespaces, namespace declarations per element, attributes
//! with normalized values, text, comments and processing instructions.

use std::{collections::BTreeMap, fmt::Write as _, str::FromStr};

use quick_xml::{
    Reader,
    events::{BytesStart, Event},
};

use super::c14n::{escape_attribute, escape_text};
use crate::{CryptoError, crypto_ensure, error::result::CryptoResult};

pub const XML_NAMESPACE: &str = "http://www.w3.org/XML/1998/namespace";

const MAX_DEPTH: usize = 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamespaceDeclaration {
    /// `None` for the default namespace
    pub prefix: Option<String>,
    pub uri: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    pub prefix: Option<String>,
    pub local_name: String,
    pub namespace: Option<String>,
    pub value: String,
}

impl Attribute {
    #[must_use]
    pub fn qualified_name(&self) -> String {
        qualified_name(self.prefix.as_deref(), &self.local_name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    Element(Element),
    Text(String),
    Comment(String),
    ProcessingInstruction { target: String, content: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Element {
    pub prefix: Option<String>,
    pub local_name: String,
    pub namespace: Option<String>,
    pub namespace_declarations: Vec<NamespaceDeclaration>,
    pub attributes: Vec<Attribute>,
    pub children: Vec<Node>,
}

impl Element {
    /// An unprefixed element in `namespace`, without any declaration
    #[must_use]
    pub fn new(local_name: &str, namespace: Option<&str>) -> Self {
        Self {
            prefix: None,
            local_name: local_name.to_owned(),
            namespace: namespace.map(str::to_owned),
            namespace_declarations: vec![],
            attributes: vec![],
            children: vec![],
        }
    }

    /// Declare `namespace` as the default namespace on this element
    #[must_use]
    pub fn declaring_default_namespace(mut self) -> Self {
        if let Some(uri) = self.namespace.clone() {
            self.namespace_declarations.push(NamespaceDeclaration { prefix: None, uri });
        }
        self
    }

    #[must_use]
    pub fn with_attribute(mut self, local_name: &str, value: &str) -> Self {
        self.attributes.push(Attribute {
            prefix: None,
            local_name: local_name.to_owned(),
            namespace: None,
            value: value.to_owned(),
        });
        self
    }

    #[must_use]
    pub fn with_child(mut self, child: Self) -> Self {
        self.children.push(Node::Element(child));
        self
    }

    #[must_use]
    pub fn with_text(mut self, text: &str) -> Self {
        self.children.push(Node::Text(text.to_owned()));
        self
    }

    #[must_use]
    pub fn qualified_name(&self) -> String {
        qualified_name(self.prefix.as_deref(), &self.local_name)
    }

    #[must_use]
    pub fn is(&self, namespace: &str, local_name: &str) -> bool {
        self.local_name == local_name && self.namespace.as_deref() == Some(namespace)
    }

    /// Value of the unqualified attribute `local_name`
    #[must_use]
    pub fn attribute(&self, local_name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|a| a.namespace.is_none() && a.local_name == local_name)
            .map(|a| a.value.as_str())
    }

    pub fn child_elements(&self) -> impl Iterator<Item = &Self> {
        self.children.iter().filter_map(|node| match node {
            Node::Element(element) => Some(element),
            _ => None,
        })
    }

    pub fn children_named<'a, 'n>(
        &'a self,
        namespace: &'n str,
        local_name: &'n str,
    ) -> impl Iterator<Item = &'a Self> + use<'a, 'n> {
        self.child_elements()
            .filter(move |e| e.is(namespace, local_name))
    }

    #[must_use]
    pub fn first_child(&self, namespace: &str, local_name: &str) -> Option<&Self> {
        self.child_elements().find(|e| e.is(namespace, local_name))
    }

    /// Concatenation of all descendant text
    #[must_use]
    pub fn text_content(&self) -> String {
        let mut out = String::new();
        self.collect_text(&mut out);
        out
    }

    fn collect_text(&self, out: &mut String) {
        for child in &self.children {
            match child {
                Node::Text(text) => out.push_str(text),
                Node::Element(element) => element.collect_text(out),
                _ => {}
            }
        }
    }

    /// Ancestor chain, starting with `self`, of the first element in document
    /// order matching `namespace` and `local_name`
    #[must_use]
    pub fn path_to_first(&self, namespace: &str, local_name: &str) -> Option<Vec<&Self>> {
        self.path_to(&|e: &Self| e.is(namespace, local_name))
    }

    /// Ancestor chain, starting with `self`, of the element carrying an
    /// `Id`, `ID` or `id` attribute equal to `id`.
    ///
    /// Fails when more than one element carries that identifier.
    pub fn path_to_id(&self, id: &str) -> CryptoResult<Option<Vec<&Self>>> {
        let has_id = |e: &Self| {
            ["Id", "ID", "id"]
                .iter()
                .any(|name| e.attribute(name) == Some(id))
        };
        let mut count = 0;
        self.count_matching(&has_id, &mut count);
        crypto_ensure!(
            count <= 1,
            CryptoError::MalformedXml(format!("the identifier '{id}' is not unique"))
        );
        Ok(self.path_to(&has_id))
    }

    fn count_matching(&self, predicate: &dyn Fn(&Self) -> bool, count: &mut usize) {
        if predicate(self) {
            *count += 1;
        }
        for child in self.child_elements() {
            child.count_matching(predicate, count);
        }
    }

    fn path_to(&self, predicate: &dyn Fn(&Self) -> bool) -> Option<Vec<&Self>> {
        if predicate(self) {
            return Some(vec![self]);
        }
        self.child_elements().find_map(|child| {
            child.path_to(predicate).map(|mut path| {
                path.insert(0, self);
                path
            })
        })
    }

    fn write_xml(&self, out: &mut String) {
        let name = self.qualified_name();
        out.push('<');
        out.push_str(&name);
        for declaration in &self.namespace_declarations {
            match &declaration.prefix {
                None => out.push_str(" xmlns=\""),
                Some(prefix) => {
                    let _ = write!(out, " xmlns:{prefix}=\"");
                }
            }
            escape_attribute(&declaration.uri, out);
            out.push('"');
        }
        for attribute in &self.attributes {
            let _ = write!(out, " {}=\"", attribute.qualified_name());
            escape_attribute(&attribute.value, out);
            out.push('"');
        }
        if self.children.is_empty() {
            out.push_str("/>");
            return;
        }
        out.push('>');
        for child in &self.children {
            child.write_xml(out);
        }
        let _ = write!(out, "</{name}>");
    }

    fn from_start(start: &BytesStart<'_>, scope: &mut NamespaceMap) -> CryptoResult<Self> {
        let name = std::str::from_utf8(start.name().as_ref())?.to_owned();
        let mut namespace_declarations = vec![];
        let mut raw_attributes = vec![];
        for attribute in start.attributes() {
            let attribute = attribute?;
            let key = std::str::from_utf8(attribute.key.as_ref())?;
            let value = normalize_attribute_value(&attribute.value)?;
            match split_qualified_name(key) {
                (None, "xmlns") => namespace_declarations.push(NamespaceDeclaration {
                    prefix: None,
                    uri: value,
                }),
                (Some("xmlns"), prefix) => namespace_declarations.push(NamespaceDeclaration {
                    prefix: Some(prefix.to_owned()),
                    uri: value,
                }),
                (prefix, local_name) => raw_attributes.push((
                    prefix.map(str::to_owned),
                    local_name.to_owned(),
                    value,
                )),
            }
        }
        for declaration in &namespace_declarations {
            scope.declare(declaration.prefix.as_deref(), &declaration.uri);
        }

        let (prefix, local_name) = split_qualified_name(&name);
        let namespace = match prefix {
            None => scope.default_namespace().map(str::to_owned),
            Some(prefix) => Some(scope.resolve_prefix(prefix)?.to_owned()),
        };
        let attributes = raw_attributes
            .into_iter()
            .map(|(prefix, local_name, value)| {
                let namespace = match &prefix {
                    None => None,
                    Some(prefix) => Some(scope.resolve_prefix(prefix)?.to_owned()),
                };
                Ok(Attribute {
                    prefix,
                    local_name,
                    namespace,
                    value,
                })
            })
            .collect::<CryptoResult<Vec<_>>>()?;

        Ok(Self {
            prefix: prefix.map(str::to_owned),
            local_name: local_name.to_owned(),
            namespace,
            namespace_declarations,
            attributes,
            children: vec![],
        })
    }
}

impl Node {
    fn write_xml(&self, out: &mut String) {
        match self {
            Self::Element(element) => element.write_xml(out),
            Self::Text(text) => escape_text(text, out),
            Self::Comment(comment) => {
                let _ = write!(out, "<!--{comment}-->");
            }
            Self::ProcessingInstruction { target, content } => {
                write_processing_instruction(target, content, out);
            }
        }
    }
}

pub(crate) fn write_processing_instruction(target: &str, content: &str, out: &mut String) {
    out.push_str("<?");
    out.push_str(target);
    if !content.is_empty() {
        out.push(' ');
        out.push_str(content);
    }
    out.push_str("?>");
}

/// A parsed XML document
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    /// Comments and processing instructions before the root element
    pub prolog: Vec<Node>,
    pub root: Element,
    /// Comments and processing instructions after the root element
    pub epilog: Vec<Node>,
}

impl Document {
    pub fn parse(xml: &str) -> CryptoResult<Self> {
        let normalized = normalize_line_endings(xml);
        let mut reader = Reader::from_str(&normalized);
        let mut builder = TreeBuilder::default();
        loop {
            match reader.read_event()? {
                Event::Start(start) => builder.open(&start)?,
                Event::Empty(start) => {
                    builder.open(&start)?;
                    builder.close()?;
                }
                Event::End(_) => builder.close()?,
                Event::Text(text) => builder.text(&text.unescape()?)?,
                Event::CData(cdata) => {
                    builder.text(&String::from_utf8(cdata.into_inner().into_owned())?)?;
                }
                Event::Comment(comment) => builder.attach(Node::Comment(String::from_utf8(
                    comment.into_inner().into_owned(),
                )?))?,
                Event::PI(pi) => builder.attach(Node::ProcessingInstruction {
                    target: std::str::from_utf8(pi.target())?.to_owned(),
                    content: std::str::from_utf8(pi.content())?.trim_start().to_owned(),
                })?,
                Event::Decl(_) | Event::DocType(_) => {}
                Event::Eof => break,
            }
        }
        builder.finish()
    }

    /// Serialize the document, preceded by an XML declaration
    #[must_use]
    pub fn to_xml_string(&self) -> String {
        let mut out = String::from(r#"<?xml version="1.0" encoding="UTF-8"?>"#);
        for node in &self.prolog {
            node.write_xml(&mut out);
        }
        self.root.write_xml(&mut out);
        for node in &self.epilog {
            node.write_xml(&mut out);
        }
        out
    }
}

impl FromStr for Document {
    type Err = CryptoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

#[derive(Default)]
struct TreeBuilder {
    stack: Vec<(Element, NamespaceMap)>,
    prolog: Vec<Node>,
    root: Option<Element>,
    epilog: Vec<Node>,
}

impl TreeBuilder {
    fn open(&mut self, start: &BytesStart<'_>) -> CryptoResult<()> {
        crypto_ensure!(
            self.stack.len() < MAX_DEPTH,
            CryptoError::MalformedXml(format!("elements are nested deeper than {MAX_DEPTH}"))
        );
        crypto_ensure!(
            self.root.is_none() || !self.stack.is_empty(),
            CryptoError::MalformedXml("more than one root element".to_owned())
        );
        let mut scope = self
            .stack
            .last()
            .map(|(_, scope)| scope.clone())
            .unwrap_or_default();
        let element = Element::from_start(start, &mut scope)?;
        self.stack.push((element, scope));
        Ok(())
    }

    fn close(&mut self) -> CryptoResult<()> {
        let (element, _) = self
            .stack
            .pop()
            .ok_or_else(|| CryptoError::MalformedXml("unexpected end tag".to_owned()))?;
        if self.stack.is_empty() {
            crypto_ensure!(
                self.root.is_none(),
                CryptoError::MalformedXml("more than one root element".to_owned())
            );
            self.root = Some(element);
            return Ok(());
        }
        self.attach(Node::Element(element))
    }

    fn text(&mut self, text: &str) -> CryptoResult<()> {
        if let Some((parent, _)) = self.stack.last_mut() {
            if let Some(Node::Text(previous)) = parent.children.last_mut() {
                previous.push_str(text);
            } else {
                parent.children.push(Node::Text(text.to_owned()));
            }
            return Ok(());
        }
        crypto_ensure!(
            text.chars().all(char::is_whitespace),
            CryptoError::MalformedXml("text content outside of the root element".to_owned())
        );
        Ok(())
    }

    fn attach(&mut self, node: Node) -> CryptoResult<()> {
        match (self.stack.last_mut(), &self.root) {
            (Some((parent, _)), _) => parent.children.push(node),
            (None, None) => self.prolog.push(node),
            (None, Some(_)) => self.epilog.push(node),
        }
        Ok(())
    }

    fn finish(self) -> CryptoResult<Document> {
        crypto_ensure!(
            self.stack.is_empty(),
            CryptoError::MalformedXml("unexpected end of document".to_owned())
        );
        let root = self
            .root
            .ok_or_else(|| CryptoError::MalformedXml("the document has no root element".to_owned()))?;
        Ok(Document {
            prolog: self.prolog,
            root,
            epilog: self.epilog,
        })
    }
}

/// In-scope namespaces, keyed by prefix (`""` for the default namespace)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct NamespaceMap(BTreeMap<String, String>);

impl NamespaceMap {
    /// Namespaces in scope on the last element of `path`, `path` starting at the root
    pub(crate) fn in_scope(path: &[&Element]) -> Self {
        let mut map = Self::default();
        for element in path {
            map.extend_with(element);
        }
        map
    }

    pub(crate) fn extend_with(&mut self, element: &Element) {
        for declaration in &element.namespace_declarations {
            self.declare(declaration.prefix.as_deref(), &declaration.uri);
        }
    }

    fn declare(&mut self, prefix: Option<&str>, uri: &str) {
        match prefix {
            None if uri.is_empty() => {
                self.0.remove("");
            }
            prefix => {
                self.0
                    .insert(prefix.unwrap_or_default().to_owned(), uri.to_owned());
            }
        }
    }

    fn default_namespace(&self) -> Option<&str> {
        self.0.get("").map(String::as_str)
    }

    fn resolve_prefix(&self, prefix: &str) -> CryptoResult<&str> {
        if prefix == "xml" {
            return Ok(XML_NAMESPACE);
        }
        self.0
            .get(prefix)
            .map(String::as_str)
            .ok_or_else(|| CryptoError::MalformedXml(format!("unbound namespace prefix '{prefix}'")))
    }

    pub(crate) fn get(&self, prefix: &str) -> Option<&str> {
        self.0.get(prefix).map(String::as_str)
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(p, u)| (p.as_str(), u.as_str()))
    }

    pub(crate) fn contains_prefix(&self, prefix: &str) -> bool {
        self.0.contains_key(prefix)
    }
}

fn qualified_name(prefix: Option<&str>, local_name: &str) -> String {
    match prefix {
        Some(prefix) => format!("{prefix}:{local_name}"),
        None => local_name.to_owned(),
    }
}

fn split_qualified_name(name: &str) -> (Option<&str>, &str) {
    match name.split_once(':') {
        Some((prefix, local_name)) => (Some(prefix), local_name),
        None => (None, name),
    }
}

fn normalize_line_endings(xml: &str) -> String {
    xml.replace("\r\n", "\n").replace('\r', "\n")
}

/// Attribute value normalization: literal whitespace becomes a space
/// before character and entity references are expanded
fn normalize_attribute_value(raw: &[u8]) -> CryptoResult<String> {
    let raw = std::str::from_utf8(raw)?;
    let spaced: String = raw
        .chars()
        .map(|c| if matches!(c, '\t' | '\n' | '\r') { ' ' } else { c })
        .collect();
    Ok(quick_xml::escape::unescape(&spaced)?.into_owned())
}
