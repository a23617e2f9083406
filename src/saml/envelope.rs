//! Structural read of a `samlp:Response` ahead of signature verification.
//!
//! Signature cryptography belongs to samael (xmlsec). This pass only looks at
//! the envelope: who issued it and when, its status, and where each
//! `ds:Signature` sits relative to the element its reference names. It never
//! hands claims to anyone; those come from the verified assertion.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use quick_xml::{
    NsReader, Reader,
    events::{BytesStart, Event},
    name::{Namespace, ResolveResult},
};

pub const PROTOCOL_NS: &str = "urn:oasis:names:tc:SAML:2.0:protocol";
pub const ASSERTION_NS: &str = "urn:oasis:names:tc:SAML:2.0:assertion";
pub const DSIG_NS: &str = "http://www.w3.org/2000/09/xmldsig#";
pub const STATUS_SUCCESS: &str = "urn:oasis:names:tc:SAML:2.0:status:Success";

const ALLOWED_TRANSFORMS: &[&str] = &[
    "http://www.w3.org/2000/09/xmldsig#enveloped-signature",
    "http://www.w3.org/2001/10/xml-exc-c14n#",
    "http://www.w3.org/2001/10/xml-exc-c14n#WithComments",
];

/// Attributes treated as XML IDs.
const ID_ATTRIBUTES: &[&str] = &["ID", "Id", "AssertionID"];

#[derive(Debug, thiserror::Error)]
pub enum EnvelopeError {
    #[error("XML syntax error: {0}")]
    Syntax(String),

    #[error("DOCTYPE declarations are not allowed")]
    Doctype,

    #[error("Document is not a SAML Response")]
    NotAResponse,
}

fn syntax(e: impl std::fmt::Display) -> EnvelopeError {
    EnvelopeError::Syntax(e.to_string())
}

/// The element a `ds:Signature` is a direct child of.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignedElement {
    Response,
    Assertion,
    Other,
}

#[derive(Debug, Clone)]
pub struct SignatureSite {
    pub parent: SignedElement,
    /// `ID` of the enclosing element.
    pub parent_id: Option<String>,
    /// `URI` of every `Reference` in `SignedInfo`.
    pub references: Vec<String>,
    pub transforms: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct Envelope {
    pub id: Option<String>,
    pub issuer: Option<String>,
    pub issue_instant: Option<DateTime<Utc>>,
    pub destination: Option<String>,
    /// Top-level `StatusCode` value.
    pub status: Option<String>,
    /// Assertions that are direct children of the response.
    pub assertions: usize,
    /// Assertions anywhere else in the document.
    pub nested_assertions: usize,
    pub encrypted_assertions: usize,
    pub duplicate_ids: Vec<String>,
    pub signatures: Vec<SignatureSite>,
}

impl Envelope {
    /// Read the envelope of a decoded `SAMLResponse`.
    pub fn scan(xml: &str) -> Result<Self, EnvelopeError> {
        let mut reader = NsReader::from_str(xml);
        reader.config_mut().trim_text(true);

        let mut scanner = Scanner::default();
        loop {
            let (namespace, event) = reader.read_resolved_event().map_err(syntax)?;
            let namespace = match namespace {
                ResolveResult::Bound(Namespace(ns)) => Some(String::from_utf8_lossy(ns).into_owned()),
                _ => None,
            };
            match event {
                Event::DocType(_) => return Err(EnvelopeError::Doctype),
                Event::Start(start) => scanner.open(namespace, &start)?,
                Event::Empty(start) => {
                    scanner.open(namespace, &start)?;
                    scanner.close();
                }
                Event::End(_) => scanner.close(),
                Event::Text(text) => scanner.text(&text.unescape().map_err(syntax)?),
                Event::CData(data) => scanner.text(&String::from_utf8_lossy(&data)),
                Event::Eof => break,
                Event::Comment(_) | Event::PI(_) | Event::Decl(_) => {}
            }
        }

        if !scanner.root_seen {
            return Err(EnvelopeError::NotAResponse);
        }
        if !scanner.stack.is_empty() {
            return Err(EnvelopeError::Syntax("unclosed element at end of input".into()));
        }
        Ok(scanner.envelope)
    }

    /// Where signatures may sit and what they may cover.
    ///
    /// The response carries exactly one assertion, directly under the root,
    /// and either the response or that assertion is signed. Every signature
    /// is enveloped in the element its single reference names and uses only
    /// the enveloped-signature and exclusive c14n transforms. Anything else
    /// (an unsigned assertion next to a signed one, a signature relocated
    /// away from the element it covers) is rejected here, before samael
    /// decides which nodes are signed.
    pub fn check_signature_placement(&self) -> Result<(), String> {
        if let Some(id) = self.duplicate_ids.first() {
            return Err(format!("ID '{id}' occurs more than once"));
        }
        if self.encrypted_assertions > 0 {
            return Err("encrypted assertions are not supported".into());
        }
        if self.nested_assertions > 0 {
            return Err("assertion found outside the response root".into());
        }
        match self.assertions {
            0 => return Err("response carries no assertion".into()),
            1 => {}
            n => return Err(format!("response carries {n} assertions, expected one")),
        }

        for site in &self.signatures {
            let [reference] = site.references.as_slice() else {
                return Err(format!(
                    "signature has {} references, expected one",
                    site.references.len()
                ));
            };
            let target = reference
                .strip_prefix('#')
                .filter(|id| !id.is_empty())
                .ok_or_else(|| format!("signature reference '{reference}' is not an ID"))?;
            if site.parent_id.as_deref() != Some(target) {
                return Err(format!(
                    "signature references '{reference}' but is not enveloped in that element"
                ));
            }
            if site.parent == SignedElement::Other {
                return Err("signature covers neither the response nor its assertion".into());
            }
            if let Some(transform) = site
                .transforms
                .iter()
                .find(|t| !ALLOWED_TRANSFORMS.contains(&t.as_str()))
            {
                return Err(format!("signature transform '{transform}' is not accepted"));
            }
        }

        let signed = |element| self.signatures.iter().any(|s| s.parent == element);
        if !signed(SignedElement::Response) && !signed(SignedElement::Assertion) {
            return Err("neither the response nor its assertion is signed".into());
        }
        Ok(())
    }
}

/// Local name of the root element.
///
/// Fails on a DOCTYPE before the root and on input with no root element.
pub fn root_local_name(xml: &str) -> Result<String, EnvelopeError> {
    let mut reader = Reader::from_str(xml);
    loop {
        match reader.read_event().map_err(syntax)? {
            Event::DocType(_) => return Err(EnvelopeError::Doctype),
            Event::Start(start) | Event::Empty(start) => {
                return Ok(String::from_utf8_lossy(start.local_name().as_ref()).into_owned());
            }
            Event::Eof => return Err(EnvelopeError::Syntax("document has no root element".into())),
            _ => {}
        }
    }
}

struct Frame {
    namespace: Option<String>,
    local_name: String,
    id: Option<String>,
}

impl Frame {
    fn is(&self, namespace: &str, local_name: &str) -> bool {
        self.local_name == local_name && self.namespace.as_deref() == Some(namespace)
    }
}

#[derive(Default)]
struct Scanner {
    envelope: Envelope,
    stack: Vec<Frame>,
    /// Indices into `envelope.signatures` of the open `ds:Signature`s.
    open_signatures: Vec<usize>,
    ids: HashSet<String>,
    root_seen: bool,
}

impl Scanner {
    fn open(&mut self, namespace: Option<String>, start: &BytesStart<'_>) -> Result<(), EnvelopeError> {
        if self.stack.is_empty() && self.root_seen {
            return Err(EnvelopeError::Syntax("more than one root element".into()));
        }

        let mut attributes = HashMap::new();
        for attr in start.attributes() {
            let attr = attr.map_err(syntax)?;
            let key = attr.key.as_ref();
            if key.contains(&b':') || key == b"xmlns" {
                continue;
            }
            let value = attr.unescape_value().map_err(syntax)?.into_owned();
            attributes.insert(String::from_utf8_lossy(key).into_owned(), value);
        }

        let mut id = None;
        for name in ID_ATTRIBUTES {
            if let Some(value) = attributes.get(*name) {
                if !self.ids.insert(value.clone()) {
                    self.envelope.duplicate_ids.push(value.clone());
                }
                id = Some(value.clone());
            }
        }

        let frame = Frame {
            namespace,
            local_name: String::from_utf8_lossy(start.local_name().as_ref()).into_owned(),
            id,
        };
        let depth = self.stack.len();

        if depth == 0 {
            if !frame.is(PROTOCOL_NS, "Response") {
                return Err(EnvelopeError::NotAResponse);
            }
            self.root_seen = true;
            self.envelope.id = frame.id.clone();
            self.envelope.destination = attributes.get("Destination").cloned();
            self.envelope.issue_instant = attributes
                .get("IssueInstant")
                .map(|t| DateTime::parse_from_rfc3339(t).map(|t| t.with_timezone(&Utc)))
                .transpose()
                .map_err(|e| EnvelopeError::Syntax(format!("invalid IssueInstant: {e}")))?;
        }

        if frame.is(ASSERTION_NS, "Assertion") {
            if depth == 1 {
                self.envelope.assertions += 1;
            } else {
                self.envelope.nested_assertions += 1;
            }
        }
        if frame.is(ASSERTION_NS, "EncryptedAssertion") {
            self.envelope.encrypted_assertions += 1;
        }
        if depth == 2
            && frame.is(PROTOCOL_NS, "StatusCode")
            && self.stack[1].is(PROTOCOL_NS, "Status")
            && self.envelope.status.is_none()
        {
            self.envelope.status = attributes.get("Value").cloned();
        }

        if frame.is(DSIG_NS, "Signature") {
            if let Some(parent) = self.stack.last() {
                let kind = if depth == 1 {
                    SignedElement::Response
                } else if depth == 2 && parent.is(ASSERTION_NS, "Assertion") {
                    SignedElement::Assertion
                } else {
                    SignedElement::Other
                };
                self.open_signatures.push(self.envelope.signatures.len());
                self.envelope.signatures.push(SignatureSite {
                    parent: kind,
                    parent_id: parent.id.clone(),
                    references: Vec::new(),
                    transforms: Vec::new(),
                });
            }
        } else if let Some(&index) = self.open_signatures.last() {
            let in_signed_info = self.stack.iter().any(|f| f.is(DSIG_NS, "SignedInfo"));
            let site = &mut self.envelope.signatures[index];
            if frame.is(DSIG_NS, "Reference")
                && self.stack.last().is_some_and(|p| p.is(DSIG_NS, "SignedInfo"))
            {
                site.references
                    .push(attributes.get("URI").cloned().unwrap_or_default());
            } else if frame.is(DSIG_NS, "Transform") && in_signed_info {
                site.transforms
                    .push(attributes.get("Algorithm").cloned().unwrap_or_default());
            }
        }

        self.stack.push(frame);
        Ok(())
    }

    fn close(&mut self) {
        if let Some(frame) = self.stack.pop()
            && frame.is(DSIG_NS, "Signature")
        {
            self.open_signatures.pop();
        }
    }

    fn text(&mut self, text: &str) {
        if self.stack.len() == 2 && self.stack[1].is(ASSERTION_NS, "Issuer") {
            self.envelope
                .issuer
                .get_or_insert_with(String::new)
                .push_str(text);
        }
    }
}
