//! IdP metadata (`md:EntityDescriptor`) consumption.

use base64::{Engine, engine::general_purpose::STANDARD};
use openssl::x509::X509;
use quick_xml::escape::escape;
use samael::metadata::{EntityDescriptor, HTTP_REDIRECT_BINDING};

use super::envelope::{EnvelopeError, root_local_name};

#[derive(Debug, thiserror::Error)]
pub enum MetadataError {
    #[error("Invalid metadata XML: {0}")]
    Xml(String),

    #[error("Metadata does not contain an EntityDescriptor with an IDPSSODescriptor")]
    MissingIdpDescriptor,

    #[error("EntityDescriptor has no entityID")]
    MissingEntityId,

    #[error("No SingleSignOnService with the HTTP-Redirect binding")]
    MissingRedirectEndpoint,

    #[error("No usable signing certificate")]
    MissingSigningCertificate,

    #[error("Signing certificate is not a valid X.509 certificate")]
    InvalidCertificate,
}

impl From<EnvelopeError> for MetadataError {
    fn from(e: EnvelopeError) -> Self {
        MetadataError::Xml(e.to_string())
    }
}

/// What the bridge needs from an IdP's metadata document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdpMetadata {
    pub entity_id: String,
    /// Location of the first HTTP-Redirect `SingleSignOnService`.
    pub sso_redirect_url: String,
    /// Base64 DER of the signing certificate with all whitespace removed.
    pub signing_certificate: String,
}

/// Parse IdP metadata rooted at an `EntityDescriptor`.
pub fn parse_idp_metadata(text: &str) -> Result<IdpMetadata, MetadataError> {
    if root_local_name(text)? != "EntityDescriptor" {
        return Err(MetadataError::MissingIdpDescriptor);
    }
    let entity: EntityDescriptor =
        samael::metadata::de::from_str(text).map_err(|e| MetadataError::Xml(e.to_string()))?;

    let descriptors = entity
        .idp_sso_descriptors
        .as_deref()
        .filter(|d| !d.is_empty())
        .ok_or(MetadataError::MissingIdpDescriptor)?;

    let entity_id = entity
        .entity_id
        .as_deref()
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .ok_or(MetadataError::MissingEntityId)?
        .to_string();

    let sso_redirect_url = descriptors
        .iter()
        .find_map(|descriptor| {
            descriptor
                .single_sign_on_services
                .iter()
                .find(|s| s.binding == HTTP_REDIRECT_BINDING)
                .map(|s| s.location.trim().to_string())
                .filter(|l| !l.is_empty())
        })
        .ok_or(MetadataError::MissingRedirectEndpoint)?;

    let signing_certificate = descriptors
        .iter()
        .flat_map(|d| d.key_descriptors.iter())
        .filter(|k| {
            k.key_use
                .as_deref()
                .is_none_or(|u| u.eq_ignore_ascii_case("signing"))
        })
        .filter_map(|k| k.key_info.x509_data.as_ref())
        .flat_map(|data| data.certificates.iter())
        .map(|cert| cert.chars().filter(|c| !c.is_whitespace()).collect::<String>())
        .find(|cert| !cert.is_empty())
        .ok_or(MetadataError::MissingSigningCertificate)?;

    parse_certificate(&signing_certificate)?;

    Ok(IdpMetadata {
        entity_id,
        sso_redirect_url,
        signing_certificate,
    })
}

/// Decode a base64 DER certificate as stored on a SAML client.
pub fn parse_certificate(encoded: &str) -> Result<X509, MetadataError> {
    let compact: String = encoded.chars().filter(|c| !c.is_whitespace()).collect();
    let der = STANDARD
        .decode(compact)
        .map_err(|_| MetadataError::InvalidCertificate)?;
    X509::from_der(&der).map_err(|_| MetadataError::InvalidCertificate)
}

/// samael view of a stored client's IdP: one signing key and the redirect
/// SSO endpoint.
pub fn idp_entity_descriptor(
    entity_id: &str,
    sso_url: &str,
    signing_certificate: &str,
) -> Result<EntityDescriptor, MetadataError> {
    let xml = format!(
        r#"<md:EntityDescriptor xmlns:md="urn:oasis:names:tc:SAML:2.0:metadata" entityID="{entity_id}">
    <md:IDPSSODescriptor protocolSupportEnumeration="urn:oasis:names:tc:SAML:2.0:protocol">
        <md:KeyDescriptor use="signing">
            <ds:KeyInfo xmlns:ds="http://www.w3.org/2000/09/xmldsig#">
                <ds:X509Data>
                    <ds:X509Certificate>{certificate}</ds:X509Certificate>
                </ds:X509Data>
            </ds:KeyInfo>
        </md:KeyDescriptor>
        <md:SingleSignOnService Binding="{binding}" Location="{sso_url}"/>
    </md:IDPSSODescriptor>
</md:EntityDescriptor>"#,
        entity_id = escape(entity_id),
        certificate = escape(signing_certificate),
        binding = HTTP_REDIRECT_BINDING,
        sso_url = escape(sso_url),
    );
    samael::metadata::de::from_str(&xml).map_err(|e| MetadataError::Xml(e.to_string()))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::saml::credentials::tests::test_key_and_cert;

    /// IdP metadata for `cert` with one redirect SSO endpoint.
    pub(crate) fn idp_metadata_xml(entity_id: &str, sso_url: &str, cert: &X509) -> String {
        let encoded = STANDARD.encode(cert.to_der().unwrap());
        // Wrap like real metadata does
        let wrapped: Vec<String> = encoded
            .as_bytes()
            .chunks(64)
            .map(|c| String::from_utf8_lossy(c).into_owned())
            .collect();
        format!(
            r#"<?xml version="1.0"?>
<md:EntityDescriptor xmlns:md="urn:oasis:names:tc:SAML:2.0:metadata" entityID="{entity_id}">
  <md:IDPSSODescriptor protocolSupportEnumeration="urn:oasis:names:tc:SAML:2.0:protocol">
    <md:KeyDescriptor use="encryption">
      <ds:KeyInfo xmlns:ds="http://www.w3.org/2000/09/xmldsig#"><ds:X509Data><ds:X509Certificate>bm90LWEtY2VydA==</ds:X509Certificate></ds:X509Data></ds:KeyInfo>
    </md:KeyDescriptor>
    <md:KeyDescriptor use="signing">
      <ds:KeyInfo xmlns:ds="http://www.w3.org/2000/09/xmldsig#">
        <ds:X509Data>
          <ds:X509Certificate>
{cert}
          </ds:X509Certificate>
        </ds:X509Data>
      </ds:KeyInfo>
    </md:KeyDescriptor>
    <md:SingleSignOnService Binding="urn:oasis:names:tc:SAML:2.0:bindings:HTTP-POST" Location="{sso_url}/post"/>
    <md:SingleSignOnService Binding="urn:oasis:names:tc:SAML:2.0:bindings:HTTP-Redirect" Location="{sso_url}"/>
  </md:IDPSSODescriptor>
</md:EntityDescriptor>"#,
            entity_id = entity_id,
            sso_url = sso_url,
            cert = wrapped.join("\n"),
        )
    }

    #[test]
    fn test_parse_metadata() {
        let (_, cert) = test_key_and_cert();
        let xml = idp_metadata_xml("https://idp.example.com", "https://idp.example.com/sso", &cert);

        let metadata = parse_idp_metadata(&xml).unwrap();
        assert_eq!(metadata.entity_id, "https://idp.example.com");
        assert_eq!(metadata.sso_redirect_url, "https://idp.example.com/sso");
        assert_eq!(
            metadata.signing_certificate,
            STANDARD.encode(cert.to_der().unwrap())
        );
    }

    #[test]
    fn test_key_descriptor_without_use_qualifies() {
        let (_, cert) = test_key_and_cert();
        let xml = idp_metadata_xml("urn:idp", "https://idp.example.com/sso", &cert)
            .replace(r#"<md:KeyDescriptor use="signing">"#, "<md:KeyDescriptor>");
        assert!(parse_idp_metadata(&xml).is_ok());
    }

    #[test]
    fn test_missing_redirect_binding() {
        let (_, cert) = test_key_and_cert();
        let xml = idp_metadata_xml("urn:idp", "https://idp.example.com/sso", &cert)
            .replace("bindings:HTTP-Redirect", "bindings:SOAP");
        assert!(matches!(
            parse_idp_metadata(&xml),
            Err(MetadataError::MissingRedirectEndpoint)
        ));
    }

    #[test]
    fn test_only_encryption_key() {
        let (_, cert) = test_key_and_cert();
        let xml = idp_metadata_xml("urn:idp", "https://idp.example.com/sso", &cert)
            .replace(r#"use="signing""#, r#"use="encryption""#);
        assert!(matches!(
            parse_idp_metadata(&xml),
            Err(MetadataError::MissingSigningCertificate)
        ));
    }

    #[test]
    fn test_garbage_certificate() {
        let xml = r#"<md:EntityDescriptor xmlns:md="urn:oasis:names:tc:SAML:2.0:metadata" entityID="urn:idp">
  <md:IDPSSODescriptor protocolSupportEnumeration="urn:oasis:names:tc:SAML:2.0:protocol">
    <md:KeyDescriptor><ds:KeyInfo xmlns:ds="http://www.w3.org/2000/09/xmldsig#"><ds:X509Data><ds:X509Certificate>Zm9v</ds:X509Certificate></ds:X509Data></ds:KeyInfo></md:KeyDescriptor>
    <md:SingleSignOnService Binding="urn:oasis:names:tc:SAML:2.0:bindings:HTTP-Redirect" Location="https://idp/sso"/>
  </md:IDPSSODescriptor>
</md:EntityDescriptor>"#;
        assert!(matches!(
            parse_idp_metadata(xml),
            Err(MetadataError::InvalidCertificate)
        ));
    }

    #[test]
    fn test_not_metadata() {
        assert!(matches!(
            parse_idp_metadata("<html><body/></html>"),
            Err(MetadataError::MissingIdpDescriptor)
        ));
        assert!(matches!(
            parse_idp_metadata("garbage"),
            Err(MetadataError::Xml(_))
        ));
        assert!(matches!(
            parse_idp_metadata(r#"<!DOCTYPE md [<!ENTITY x "y">]><md:EntityDescriptor xmlns:md="urn:oasis:names:tc:SAML:2.0:metadata"/>"#),
            Err(MetadataError::Xml(_))
        ));
    }

    #[test]
    fn test_stored_client_round_trips_through_samael() {
        let (_, cert) = test_key_and_cert();
        let encoded = STANDARD.encode(cert.to_der().unwrap());
        let descriptor =
            idp_entity_descriptor("https://idp.example.com/?a=1&b=2", "https://idp/sso", &encoded)
                .unwrap();
        assert_eq!(
            descriptor.entity_id.as_deref(),
            Some("https://idp.example.com/?a=1&b=2")
        );
        let sso = &descriptor.idp_sso_descriptors.as_ref().unwrap()[0];
        assert_eq!(sso.single_sign_on_services[0].location, "https://idp/sso");
    }
}
