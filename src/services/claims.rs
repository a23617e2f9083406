//! Flattening of a verified assertion into claims.

use samael::schema::Assertion;

use crate::models::Claims;

pub const NAME_ID_CLAIM: &str = "NameID";
pub const NAME_ID_FORMAT_CLAIM: &str = "NameIDFormat";

/// Collect `NameID`, its format, and every attribute of the assertion.
///
/// Attribute values are trimmed and blank values dropped; an attribute left
/// without values contributes nothing. Values for a name that appears in
/// several attributes are appended in document order.
pub fn extract_claims(assertion: &Assertion) -> Claims {
    let mut claims = Claims::new();

    if let Some(name_id) = assertion.subject.as_ref().and_then(|s| s.name_id.as_ref()) {
        push(&mut claims, NAME_ID_CLAIM, [name_id.value.trim().to_string()]);
        if let Some(format) = &name_id.format {
            push(&mut claims, NAME_ID_FORMAT_CLAIM, [format.clone()]);
        }
    }

    let attributes = assertion
        .attribute_statements
        .iter()
        .flatten()
        .flat_map(|statement| statement.attributes.iter());
    for attribute in attributes {
        let Some(name) = attribute.name.as_deref() else {
            continue;
        };
        let values: Vec<String> = attribute
            .values
            .iter()
            .filter_map(|v| v.value.as_deref())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(String::from)
            .collect();
        if !values.is_empty() {
            push(&mut claims, name, values);
        }
    }

    claims
}

fn push(claims: &mut Claims, name: &str, values: impl IntoIterator<Item = String>) {
    claims.entry(name.to_string()).or_default().extend(values);
}

/// First value of `name`, if any.
pub fn first_value<'a>(claims: &'a Claims, name: &str) -> Option<&'a str> {
    claims.get(name)?.first().map(String::as_str)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::test_support::parse_assertion;

    fn attribute(name: &str, values: &[&str]) -> String {
        let values: String = values
            .iter()
            .map(|v| format!("<saml:AttributeValue>{v}</saml:AttributeValue>"))
            .collect();
        format!(r#"<saml:Attribute Name="{name}">{values}</saml:Attribute>"#)
    }

    fn assertion(name_id: &str, statements: &[Vec<String>]) -> Assertion {
        let statements: String = statements
            .iter()
            .map(|attrs| format!("<saml:AttributeStatement>{}</saml:AttributeStatement>", attrs.concat()))
            .collect();
        parse_assertion(&format!("{name_id}{statements}"))
    }

    #[test]
    fn test_name_id_and_attributes() {
        let claims = extract_claims(&assertion(
            r#"<saml:Subject><saml:NameID Format="urn:oasis:names:tc:SAML:1.1:nameid-format:emailAddress">alice@example.com</saml:NameID></saml:Subject>"#,
            &[vec![
                attribute("groups", &["admins", " staff "]),
                attribute("dept", &["eng"]),
            ]],
        ));

        assert_eq!(claims["NameID"], vec!["alice@example.com"]);
        assert_eq!(
            claims["NameIDFormat"],
            vec!["urn:oasis:names:tc:SAML:1.1:nameid-format:emailAddress"]
        );
        assert_eq!(claims["groups"], vec!["admins", "staff"]);
        assert_eq!(first_value(&claims, "dept"), Some("eng"));
    }

    #[test]
    fn test_blank_values_dropped() {
        let claims = extract_claims(&assertion(
            "<saml:Subject><saml:NameID>alice</saml:NameID></saml:Subject>",
            &[vec![
                attribute("empty", &["", "   "]),
                attribute("mixed", &["", "x"]),
            ]],
        ));
        assert!(!claims.contains_key("empty"));
        assert!(!claims.contains_key("NameIDFormat"));
        assert_eq!(claims["mixed"], vec!["x"]);
    }

    #[test]
    fn test_repeated_attributes_append() {
        let claims = extract_claims(&assertion(
            "<saml:Subject><saml:NameID>alice</saml:NameID></saml:Subject>",
            &[
                vec![attribute("role", &["reader"])],
                vec![attribute("role", &["writer"]), attribute("role", &["admin"])],
            ],
        ));
        assert_eq!(claims["NameID"], vec!["alice"]);
        assert_eq!(claims["role"], vec!["reader", "writer", "admin"]);
    }

    #[test]
    fn test_no_subject_or_attributes() {
        assert!(extract_claims(&assertion("", &[])).is_empty());
        assert_eq!(first_value(&Claims::new(), "NameID"), None);
    }
}
