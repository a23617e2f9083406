//! Assertion consumer: verification of IdP responses and hand-off of the
//! extracted claims to the code exchange.

use std::sync::Arc;

use base64::{Engine, engine::general_purpose::STANDARD};
use chrono::{DateTime, Duration, Utc};
use samael::{schema::Assertion, service_provider::ServiceProvider};
use url::Url;

use super::{
    ClientRegistry, RelayStateTracker,
    certificates::Clock,
    claims::extract_claims,
    relay_state::random_token,
};
use crate::{
    db::DbPool,
    models::{ClaimsRecord, SamlClient, Tenant},
    saml::{
        SamlError, SamlResult,
        envelope::{Envelope, STATUS_SUCCESS},
        metadata::idp_entity_descriptor,
    },
};

/// Handles IdP callbacks for both SP- and IdP-initiated logins.
#[derive(Clone)]
pub struct ResponseVerifier {
    db: Arc<DbPool>,
    clients: ClientRegistry,
    relay_states: RelayStateTracker,
    clock_skew: Duration,
    clock: Clock,
}

impl ResponseVerifier {
    pub fn new(
        db: Arc<DbPool>,
        clients: ClientRegistry,
        relay_states: RelayStateTracker,
        clock_skew: Duration,
        clock: Clock,
    ) -> Self {
        Self {
            db,
            clients,
            relay_states,
            clock_skew,
            clock,
        }
    }

    /// Verify `saml_response` and return the caller's redirect URL with a
    /// one-time `code` (and the caller's `state`, if any) appended.
    ///
    /// With a relay state the login must have been started through
    /// [`super::RequestBuilder`]; without one the client is found by the
    /// response issuer and must allow IdP-initiated login.
    #[tracing::instrument(name = "saml.callback", skip_all, fields(tenant = %tenant))]
    pub async fn handle_callback(
        &self,
        tenant: &Tenant,
        saml_response: &str,
        relay_state: Option<&str>,
    ) -> SamlResult<String> {
        let encoded: String = saml_response.chars().filter(|c| !c.is_whitespace()).collect();
        let xml = STANDARD
            .decode(&encoded)
            .map_err(|e| SamlError::MalformedResponse(format!("invalid base64: {e}")))
            .and_then(|bytes| {
                String::from_utf8(bytes)
                    .map_err(|_| SamlError::MalformedResponse("response is not UTF-8".into()))
            })?;
        let envelope =
            Envelope::scan(&xml).map_err(|e| SamlError::MalformedResponse(e.to_string()))?;

        let relay_state = relay_state.filter(|s| !s.is_empty());
        let (client, redirect_uri, caller_state) = match relay_state {
            Some(relay_state) => {
                let record = self
                    .relay_states
                    .resolve(tenant, relay_state)
                    .await?
                    .ok_or(SamlError::InvalidRelayState)?;
                let client = self
                    .clients
                    .get(tenant, &record.client_id)
                    .await?
                    .ok_or_else(|| {
                        SamlError::InvalidClient(format!("Unknown client '{}'", record.client_id))
                    })?;
                (client, record.redirect_uri, record.caller_state)
            }
            None => {
                let issuer = envelope
                    .issuer
                    .as_deref()
                    .map(str::trim)
                    .filter(|i| !i.is_empty())
                    .ok_or_else(|| {
                        SamlError::InvalidClient("Response does not name its issuer".into())
                    })?;
                let client = self
                    .clients
                    .get_by_idp_entity_id(tenant, issuer)
                    .await?
                    .ok_or_else(|| {
                        SamlError::InvalidClient(format!("No client for IdP '{issuer}'"))
                    })?;
                if !client.allow_idp_initiated_login {
                    return Err(SamlError::IdpInitiatedLoginDisallowed);
                }
                let redirect_uri = client.default_redirect_uri.clone();
                (client, redirect_uri, None)
            }
        };

        let assertion = verify_response(
            &encoded,
            &envelope,
            &client,
            (self.clock)(),
            self.clock_skew,
        )
        .map_err(SamlError::VerificationFailed)?;

        let claims = extract_claims(&assertion);
        let code = random_token();
        self.db
            .saml_claims()
            .create(
                tenant,
                ClaimsRecord {
                    code: code.clone(),
                    client_id: client.client_id.clone(),
                    claims,
                    created_at: Utc::now(),
                },
            )
            .await?;

        let mut url = Url::parse(&redirect_uri)
            .map_err(|e| SamlError::Internal(format!("invalid redirect URI: {e}")))?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("code", &code);
            if let Some(state) = &caller_state {
                query.append_pair("state", state);
            }
        }

        tracing::info!(
            client_id = %client.client_id,
            idp_initiated = relay_state.is_none(),
            "SAML response accepted"
        );
        Ok(url.into())
    }
}

/// All checks on a posted response; only the assertion samael verified
/// against the client's IdP key is returned.
///
/// The error names the failed check for logging; callers must not return it
/// to the client.
pub fn verify_response(
    encoded: &str,
    envelope: &Envelope,
    client: &SamlClient,
    now: DateTime<Utc>,
    clock_skew: Duration,
) -> Result<Assertion, String> {
    envelope.check_signature_placement()?;
    check_envelope(envelope, now, clock_skew)?;

    let idp_metadata = idp_entity_descriptor(
        &client.idp_entity_id,
        &client.sso_login_url,
        &client.idp_signing_certificate,
    )
    .map_err(|e| format!("stored IdP for client {} is unusable: {e}", client.client_id))?;

    // Relay state is ours, so InResponseTo is not pinned to a request id.
    let sp = ServiceProvider {
        entity_id: Some(client.sp_entity_id.clone()),
        acs_url: envelope.destination.clone(),
        idp_metadata,
        allow_idp_initiated: true,
        max_issue_delay: clock_skew,
        ..ServiceProvider::default()
    };
    let assertion = sp
        .parse_base64_response(encoded, None)
        .map_err(|e| format!("signature verification failed: {e}"))?;

    check_assertion(&assertion, &client.sp_entity_id, now)?;
    Ok(assertion)
}

/// Response status and `IssueInstant` against our own clock.
fn check_envelope(envelope: &Envelope, now: DateTime<Utc>, clock_skew: Duration) -> Result<(), String> {
    if let Some(status) = &envelope.status
        && status != STATUS_SUCCESS
    {
        return Err(format!("response status is {status}"));
    }

    if let Some(issued) = envelope.issue_instant
        && (issued > now + clock_skew || issued < now - clock_skew)
    {
        return Err(format!("response IssueInstant {issued} outside allowed skew"));
    }
    Ok(())
}

/// Validity window and audience of the verified assertion. The window is
/// strict; skew only applies to `IssueInstant`.
fn check_assertion(assertion: &Assertion, sp_entity_id: &str, now: DateTime<Utc>) -> Result<(), String> {
    let conditions = assertion.conditions.as_ref();

    if let Some(not_before) = conditions.and_then(|c| c.not_before)
        && now < not_before
    {
        return Err(format!("assertion not valid before {not_before}"));
    }
    if let Some(not_on_or_after) = conditions.and_then(|c| c.not_on_or_after)
        && now >= not_on_or_after
    {
        return Err(format!("assertion expired at {not_on_or_after}"));
    }

    let audience_matches = conditions
        .and_then(|c| c.audience_restrictions.as_ref())
        .into_iter()
        .flatten()
        .flat_map(|restriction| restriction.audience.iter())
        .any(|audience| audience.trim() == sp_entity_id);
    if !audience_matches {
        return Err(format!("no audience matches {sp_entity_id}"));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use regex::Regex;

    use super::*;
    use crate::{
        models::SamlClientInput,
        services::{
            Services, system_clock,
            test_support::{
                ACS_URL, REDIRECT_URI, ResponseParams, SP_ENTITY_ID, TestIdp, encode,
                first_signature, parse_assertion, strip_signatures,
            },
        },
    };

    struct Fixture {
        services: Services,
        idp: TestIdp,
        client_id: String,
        tenant: Tenant,
    }

    async fn fixture(allow_idp_initiated: bool) -> Fixture {
        fixture_with_clock(allow_idp_initiated, system_clock()).await
    }

    async fn fixture_with_clock(allow_idp_initiated: bool, clock: Clock) -> Fixture {
        let services = Services::for_tests_with_clock(clock);
        let idp = TestIdp::new("https://idp.example.com");
        let tenant = Tenant::default();
        let client_id = services
            .clients
            .create_or_update(
                &tenant,
                SamlClientInput {
                    client_id: Some("client-1".into()),
                    client_secret: None,
                    sp_entity_id: SP_ENTITY_ID.into(),
                    default_redirect_uri: "https://app.example.com/default#frag".into(),
                    redirect_uris: vec![
                        REDIRECT_URI.into(),
                        "https://app.example.com/cb?existing=1#section".into(),
                    ],
                    metadata_xml: Some(idp.metadata_xml()),
                    metadata_url: None,
                    allow_idp_initiated_login: allow_idp_initiated,
                    enable_request_signing: false,
                },
            )
            .await
            .unwrap()
            .client_id;
        Fixture {
            services,
            idp,
            client_id,
            tenant,
        }
    }

    impl Fixture {
        async fn relay_state(&self, redirect_uri: &str, state: Option<&str>) -> String {
            let url = self
                .services
                .requests
                .build_redirect_url(
                    &self.tenant,
                    &self.client_id,
                    redirect_uri,
                    state.map(String::from),
                    ACS_URL,
                )
                .await
                .unwrap();
            query(&url, "RelayState").unwrap()
        }

        async fn callback(
            &self,
            response: &str,
            relay_state: Option<&str>,
        ) -> SamlResult<String> {
            self.services
                .callbacks
                .handle_callback(&self.tenant, response, relay_state)
                .await
        }

        async fn codes_issued(&self) -> u64 {
            self.services
                .db
                .saml_claims()
                .delete_created_before(Utc::now() + Duration::days(1))
                .await
                .unwrap()
        }
    }

    fn query(url: &str, name: &str) -> Option<String> {
        Url::parse(url)
            .unwrap()
            .query_pairs()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.into_owned())
    }

    fn assertion_id(xml: &str) -> String {
        Regex::new(r#"<(?:\w+:)?Assertion\b[^>]*?\sID="([^"]+)""#)
            .unwrap()
            .captures(xml)
            .unwrap()[1]
            .to_string()
    }

    #[tokio::test]
    async fn test_sp_initiated_round_trip() {
        let f = fixture(false).await;
        let relay_state = f.relay_state(REDIRECT_URI, Some("xyz")).await;
        let response = f.idp.response(&ResponseParams::default());

        let redirect = f.callback(&response, Some(&relay_state)).await.unwrap();
        assert!(redirect.starts_with(REDIRECT_URI));
        assert_eq!(query(&redirect, "state").as_deref(), Some("xyz"));

        let code = query(&redirect, "code").unwrap();
        let record = f
            .services
            .db
            .saml_claims()
            .take(&f.tenant, &code)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.client_id, f.client_id);
        assert_eq!(record.claims["NameID"], vec!["alice@example.com"]);
        assert_eq!(
            record.claims["http://schemas.xmlsoap.org/ws/2005/05/identity/claims/name"],
            vec!["Alice"]
        );
    }

    #[tokio::test]
    async fn test_line_wrapped_response_accepted() {
        let f = fixture(false).await;
        let relay_state = f.relay_state(REDIRECT_URI, None).await;
        let wrapped: Vec<String> = f
            .idp
            .response(&ResponseParams::default())
            .as_bytes()
            .chunks(76)
            .map(|c| String::from_utf8_lossy(c).into_owned())
            .collect();
        let redirect = f
            .callback(&wrapped.join("\r\n"), Some(&relay_state))
            .await
            .unwrap();
        assert!(query(&redirect, "code").is_some());
        assert!(query(&redirect, "state").is_none());
    }

    #[tokio::test]
    async fn test_existing_query_and_fragment_preserved() {
        let f = fixture(false).await;
        let uri = "https://app.example.com/cb?existing=1#section";
        let relay_state = f.relay_state(uri, Some("s")).await;
        let redirect = f
            .callback(&f.idp.response(&ResponseParams::default()), Some(&relay_state))
            .await
            .unwrap();

        let parsed = Url::parse(&redirect).unwrap();
        assert_eq!(parsed.fragment(), Some("section"));
        assert_eq!(query(&redirect, "existing").as_deref(), Some("1"));
        assert!(parsed.query().unwrap().starts_with("existing=1&code="));
    }

    #[tokio::test]
    async fn test_wrong_key_rejected() {
        let f = fixture(false).await;
        let relay_state = f.relay_state(REDIRECT_URI, None).await;
        let response = f.idp.impostor().response(&ResponseParams::default());
        assert!(matches!(
            f.callback(&response, Some(&relay_state)).await,
            Err(SamlError::VerificationFailed(_))
        ));
    }

    #[tokio::test]
    async fn test_unsigned_response_rejected() {
        let f = fixture(false).await;
        let relay_state = f.relay_state(REDIRECT_URI, None).await;
        let xml = strip_signatures(&f.idp.response_xml(&ResponseParams::default()));
        assert!(matches!(
            f.callback(&encode(&xml), Some(&relay_state)).await,
            Err(SamlError::VerificationFailed(_))
        ));
    }

    #[tokio::test]
    async fn test_tampered_assertion_rejected() {
        let f = fixture(false).await;
        let relay_state = f.relay_state(REDIRECT_URI, None).await;
        let xml = f
            .idp
            .response_xml(&ResponseParams::default())
            .replace("alice@example.com", "mallory@example.com");
        assert!(matches!(
            f.callback(&encode(&xml), Some(&relay_state)).await,
            Err(SamlError::VerificationFailed(_))
        ));
    }

    #[tokio::test]
    async fn test_unsigned_assertion_injected_before_signed_one_rejected() {
        let f = fixture(false).await;
        let relay_state = f.relay_state(REDIRECT_URI, None).await;
        let xml = f.idp.response_xml(&ResponseParams::default());

        let forged = format!(
            concat!(
                r#"<saml:Assertion xmlns:saml="urn:oasis:names:tc:SAML:2.0:assertion" ID="_forged" Version="2.0" IssueInstant="{now}">"#,
                r#"<saml:Issuer>https://idp.example.com</saml:Issuer>"#,
                r#"<saml:Subject><saml:NameID>victim@example.com</saml:NameID></saml:Subject>"#,
                r#"<saml:Conditions><saml:AudienceRestriction><saml:Audience>{audience}</saml:Audience></saml:AudienceRestriction></saml:Conditions>"#,
                r#"</saml:Assertion>"#,
            ),
            now = Utc::now().format("%Y-%m-%dT%H:%M:%SZ"),
            audience = SP_ENTITY_ID,
        );
        let at = Regex::new(r"<(?:\w+:)?Assertion[\s>]")
            .unwrap()
            .find(&xml)
            .unwrap()
            .start();
        let injected = format!("{}{forged}{}", &xml[..at], &xml[at..]);

        assert!(matches!(
            f.callback(&encode(&injected), Some(&relay_state)).await,
            Err(SamlError::VerificationFailed(_))
        ));
        assert_eq!(f.codes_issued().await, 0);
    }

    #[tokio::test]
    async fn test_response_signature_pointing_at_assertion_rejected() {
        let f = fixture(false).await;
        let relay_state = f.relay_state(REDIRECT_URI, None).await;
        let xml = f.idp.response_xml(&ResponseParams::default());

        let target = assertion_id(&xml);
        let signature = Regex::new(r##"URI="#[^"]*""##)
            .unwrap()
            .replace(&first_signature(&xml), format!(r##"URI="#{target}""##).as_str())
            .into_owned();
        let unsigned = strip_signatures(&xml);
        let issuer_end = Regex::new(r"</(?:\w+:)?Issuer>")
            .unwrap()
            .find(&unsigned)
            .unwrap()
            .end();
        let relocated = format!(
            "{}{signature}{}",
            &unsigned[..issuer_end],
            &unsigned[issuer_end..]
        );

        assert!(matches!(
            f.callback(&encode(&relocated), Some(&relay_state)).await,
            Err(SamlError::VerificationFailed(_))
        ));
        assert_eq!(f.codes_issued().await, 0);
    }

    #[tokio::test]
    async fn test_clock_outside_issue_window_rejected() {
        for offset in [Duration::hours(2), -Duration::hours(2)] {
            let clock: Clock = Arc::new(move || Utc::now() + offset);
            let f = fixture_with_clock(false, clock).await;
            let relay_state = f.relay_state(REDIRECT_URI, None).await;
            let response = f.idp.response(&ResponseParams::default());
            assert!(
                matches!(
                    f.callback(&response, Some(&relay_state)).await,
                    Err(SamlError::VerificationFailed(_))
                ),
                "{offset}"
            );
        }
    }

    #[tokio::test]
    async fn test_wrong_audience_rejected() {
        let f = fixture(false).await;
        let relay_state = f.relay_state(REDIRECT_URI, None).await;
        let response = f.idp.response(&ResponseParams {
            audience: "https://other-sp.example.com".into(),
            ..ResponseParams::default()
        });
        assert!(matches!(
            f.callback(&response, Some(&relay_state)).await,
            Err(SamlError::VerificationFailed(_))
        ));
    }

    #[tokio::test]
    async fn test_unknown_relay_state_and_malformed_input() {
        let f = fixture(false).await;
        let response = f.idp.response(&ResponseParams::default());
        assert!(matches!(
            f.callback(&response, Some("not-a-relay-state")).await,
            Err(SamlError::InvalidRelayState)
        ));
        assert!(matches!(
            f.callback("%%%not-base64", None).await,
            Err(SamlError::MalformedResponse(_))
        ));
        assert!(matches!(
            f.callback(&encode("<!DOCTYPE x [<!ENTITY a \"b\">]><x/>"), None).await,
            Err(SamlError::MalformedResponse(_))
        ));
        assert!(matches!(
            f.callback(&STANDARD.encode([0xff, 0xfe, 0x00]), None).await,
            Err(SamlError::MalformedResponse(_))
        ));
    }

    #[tokio::test]
    async fn test_relay_state_binds_to_its_own_client() {
        let f = fixture(false).await;
        let relay_state = f.relay_state(REDIRECT_URI, Some("mine")).await;

        // A second client with a different IdP on the same tenant
        let other_idp = TestIdp::new("https://other-idp.example.com");
        f.services
            .clients
            .create_or_update(
                &f.tenant,
                SamlClientInput {
                    client_id: Some("client-2".into()),
                    client_secret: None,
                    sp_entity_id: SP_ENTITY_ID.into(),
                    default_redirect_uri: "https://other.example.com/cb".into(),
                    redirect_uris: vec!["https://other.example.com/cb".into()],
                    metadata_xml: Some(other_idp.metadata_xml()),
                    metadata_url: None,
                    allow_idp_initiated_login: true,
                    enable_request_signing: false,
                },
            )
            .await
            .unwrap();

        // The relay state belongs to client-1, so client-2's IdP cannot use it
        let foreign = other_idp.response(&ResponseParams::default());
        assert!(matches!(
            f.callback(&foreign, Some(&relay_state)).await,
            Err(SamlError::VerificationFailed(_))
        ));

        let redirect = f
            .callback(&f.idp.response(&ResponseParams::default()), Some(&relay_state))
            .await
            .unwrap();
        assert!(redirect.starts_with(REDIRECT_URI));
        assert_eq!(query(&redirect, "state").as_deref(), Some("mine"));
    }

    #[tokio::test]
    async fn test_idp_initiated_login() {
        let allowed = fixture(true).await;
        let redirect = allowed
            .callback(&allowed.idp.response(&ResponseParams::default()), None)
            .await
            .unwrap();
        let parsed = Url::parse(&redirect).unwrap();
        assert_eq!(parsed.path(), "/default");
        assert_eq!(parsed.fragment(), Some("frag"));
        assert!(query(&redirect, "code").is_some());
        assert!(query(&redirect, "state").is_none());

        // An empty relay state is treated as absent
        assert!(
            allowed
                .callback(&allowed.idp.response(&ResponseParams::default()), Some(""))
                .await
                .is_ok()
        );
    }

    #[tokio::test]
    async fn test_idp_initiated_login_disallowed() {
        let f = fixture(false).await;
        let response = f.idp.response(&ResponseParams::default());
        assert!(matches!(
            f.callback(&response, None).await,
            Err(SamlError::IdpInitiatedLoginDisallowed)
        ));

        let unknown = TestIdp::new("https://unknown-idp.example.com");
        assert!(matches!(
            f.callback(&unknown.response(&ResponseParams::default()), None).await,
            Err(SamlError::InvalidClient(_))
        ));
    }

    #[tokio::test]
    async fn test_relay_state_survives_callback() {
        let f = fixture(false).await;
        let relay_state = f.relay_state(REDIRECT_URI, None).await;
        for _ in 0..2 {
            f.callback(&f.idp.response(&ResponseParams::default()), Some(&relay_state))
                .await
                .unwrap();
        }
    }

    fn envelope(issue_instant: &str, status: &str) -> Envelope {
        Envelope::scan(&format!(
            concat!(
                r#"<samlp:Response xmlns:samlp="urn:oasis:names:tc:SAML:2.0:protocol" ID="_r" Version="2.0"{issue_instant}>"#,
                r#"<samlp:Status><samlp:StatusCode Value="{status}"/></samlp:Status>"#,
                r#"</samlp:Response>"#,
            ),
            issue_instant = issue_instant,
            status = status,
        ))
        .unwrap()
    }

    fn conditions(attrs: &str, audience: Option<&str>) -> Assertion {
        let restriction = audience
            .map(|a| {
                format!(
                    "<saml:AudienceRestriction><saml:Audience>{a}</saml:Audience></saml:AudienceRestriction>"
                )
            })
            .unwrap_or_default();
        parse_assertion(&format!("<saml:Conditions{attrs}>{restriction}</saml:Conditions>"))
    }

    fn at(s: &str) -> DateTime<Utc> {
        s.parse().unwrap()
    }

    #[test]
    fn test_check_envelope_status_and_skew() {
        let now = at("2030-01-01T00:00:00Z");
        let skew = Duration::seconds(300);

        assert!(check_envelope(&envelope(r#" IssueInstant="2030-01-01T00:04:59Z""#, STATUS_SUCCESS), now, skew).is_ok());
        assert!(check_envelope(&envelope(r#" IssueInstant="2029-12-31T23:55:00Z""#, STATUS_SUCCESS), now, skew).is_ok());
        assert!(check_envelope(&envelope(r#" IssueInstant="2030-01-01T00:05:01Z""#, STATUS_SUCCESS), now, skew).is_err());
        assert!(check_envelope(&envelope(r#" IssueInstant="2029-12-31T23:54:59Z""#, STATUS_SUCCESS), now, skew).is_err());
        assert!(check_envelope(&envelope("", STATUS_SUCCESS), now, skew).is_ok());

        let reason = check_envelope(
            &envelope("", "urn:oasis:names:tc:SAML:2.0:status:Requester"),
            now,
            skew,
        )
        .unwrap_err();
        assert!(reason.contains("Requester"), "{reason}");
    }

    #[test]
    fn test_check_assertion_window_is_strict() {
        let window = r#" NotBefore="2030-01-01T00:00:00Z" NotOnOrAfter="2030-01-01T01:00:00Z""#;
        let assertion = conditions(window, Some(SP_ENTITY_ID));

        assert!(check_assertion(&assertion, SP_ENTITY_ID, at("2030-01-01T00:00:00Z")).is_ok());
        assert!(check_assertion(&assertion, SP_ENTITY_ID, at("2030-01-01T00:59:59Z")).is_ok());
        assert!(check_assertion(&assertion, SP_ENTITY_ID, at("2029-12-31T23:59:59Z")).is_err());
        assert!(check_assertion(&assertion, SP_ENTITY_ID, at("2030-01-01T01:00:00Z")).is_err());
    }

    #[test]
    fn test_check_assertion_requires_matching_audience() {
        let now = at("2030-01-01T00:00:00Z");
        assert!(check_assertion(&conditions("", Some(SP_ENTITY_ID)), SP_ENTITY_ID, now).is_ok());
        assert!(check_assertion(&conditions("", Some("https://other-sp.example.com")), SP_ENTITY_ID, now).is_err());
        assert!(check_assertion(&conditions("", None), SP_ENTITY_ID, now).is_err());
        assert!(check_assertion(&parse_assertion(""), SP_ENTITY_ID, now).is_err());
    }
}
