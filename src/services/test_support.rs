//! Simulated IdP for service tests.

use base64::{Engine, engine::general_purpose::STANDARD};
use chrono::{SecondsFormat, Utc};
use openssl::{
    pkey::{PKey, Private},
    x509::X509,
};
use regex::Regex;
use samael::{
    crypto::CertificateDer,
    idp::{IdentityProvider, response_builder::ResponseAttribute, sp_extractor::RequiredAttribute},
    schema::{Assertion, Response},
    traits::ToXml,
};

use crate::saml::{
    credentials::tests::test_key_and_cert,
    envelope::{ASSERTION_NS, PROTOCOL_NS, STATUS_SUCCESS},
    metadata::tests::idp_metadata_xml,
};

pub(crate) const SP_ENTITY_ID: &str = "https://sp.example.com";
pub(crate) const ACS_URL: &str = "https://sp.example.com/acs";
pub(crate) const REDIRECT_URI: &str = "https://app.example.com/auth/callback";

/// What the simulated IdP asserts.
#[derive(Debug, Clone)]
pub(crate) struct ResponseParams {
    pub name_id: String,
    pub audience: String,
    pub attributes: Vec<(String, String)>,
}

impl Default for ResponseParams {
    fn default() -> Self {
        Self {
            name_id: "alice@example.com".to_string(),
            audience: SP_ENTITY_ID.to_string(),
            attributes: vec![(
                "http://schemas.xmlsoap.org/ws/2005/05/identity/claims/name".to_string(),
                "Alice".to_string(),
            )],
        }
    }
}

/// An IdP with its own signing key.
pub(crate) struct TestIdp {
    pub entity_id: String,
    pub key: PKey<Private>,
    pub cert: X509,
}

impl TestIdp {
    pub fn new(entity_id: &str) -> Self {
        let (key, cert) = test_key_and_cert();
        Self {
            entity_id: entity_id.to_string(),
            key,
            cert,
        }
    }

    /// The same entity id with a different key.
    pub fn impostor(&self) -> Self {
        Self::new(&self.entity_id)
    }

    pub fn sso_url(&self) -> String {
        format!("{}/sso", self.entity_id)
    }

    pub fn metadata_xml(&self) -> String {
        idp_metadata_xml(&self.entity_id, &self.sso_url(), &self.cert)
    }

    /// Base64 `SAMLResponse` as posted to the ACS.
    pub fn response(&self, params: &ResponseParams) -> String {
        encode(&self.response_xml(params))
    }

    /// Response with both the response and its assertion signed by this IdP.
    pub fn response_xml(&self, params: &ResponseParams) -> String {
        let rsa_der = self.key.rsa().unwrap().private_key_to_der().unwrap();
        let idp = IdentityProvider::from_rsa_private_key_der(&rsa_der).unwrap();
        let cert_der = CertificateDer::from(self.cert.to_der().unwrap());

        let attributes: Vec<ResponseAttribute> = params
            .attributes
            .iter()
            .map(|(name, value)| ResponseAttribute {
                required_attribute: RequiredAttribute {
                    name: name.clone(),
                    format: None,
                },
                value: value.as_str(),
            })
            .collect();

        idp.sign_authn_response(
            &cert_der,
            &params.name_id,
            &params.audience,
            ACS_URL,
            &self.entity_id,
            "_request",
            &attributes,
        )
        .unwrap()
        .to_string()
        .unwrap()
    }
}

pub(crate) fn encode(xml: &str) -> String {
    STANDARD.encode(xml)
}

/// Remove every `ds:Signature` element.
pub(crate) fn strip_signatures(xml: &str) -> String {
    signature_pattern().replace_all(xml, "").into_owned()
}

/// The first `ds:Signature` element in document order.
pub(crate) fn first_signature(xml: &str) -> String {
    signature_pattern().find(xml).unwrap().as_str().to_string()
}

fn signature_pattern() -> Regex {
    Regex::new(r"(?s)<(?:\w+:)?Signature[\s>].*?</(?:\w+:)?Signature>").unwrap()
}

/// Parse an unsigned assertion whose body after `Issuer` is `body`.
pub(crate) fn parse_assertion(body: &str) -> Assertion {
    let instant = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
    let xml = format!(
        concat!(
            r#"<samlp:Response xmlns:samlp="{protocol}" xmlns:saml="{assertion}" ID="_r" Version="2.0" IssueInstant="{instant}">"#,
            r#"<saml:Issuer>urn:idp</saml:Issuer>"#,
            r#"<samlp:Status><samlp:StatusCode Value="{status}"/></samlp:Status>"#,
            r#"<saml:Assertion ID="_a" Version="2.0" IssueInstant="{instant}">"#,
            r#"<saml:Issuer>urn:idp</saml:Issuer>{body}</saml:Assertion>"#,
            r#"</samlp:Response>"#,
        ),
        protocol = PROTOCOL_NS,
        assertion = ASSERTION_NS,
        status = STATUS_SUCCESS,
        instant = instant,
        body = body,
    );
    xml.parse::<Response>().unwrap().assertion.unwrap()
}
