use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Claim name to ordered values. `NameID` and `NameIDFormat` are always
/// present when the assertion carried them.
pub type Claims = BTreeMap<String, Vec<String>>;

/// Correlates an outgoing AuthnRequest with its callback.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayStateRecord {
    pub relay_state: String,
    pub client_id: String,
    pub caller_state: Option<String>,
    pub redirect_uri: String,
    pub created_at: DateTime<Utc>,
}

/// Claims of a verified SSO exchange, redeemable once by `code`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimsRecord {
    pub code: String,
    pub client_id: String,
    pub claims: Claims,
    pub created_at: DateTime<Utc>,
}
