mod common;
mod key_value;
mod saml_clients;
mod saml_sessions;

pub use key_value::SqliteKeyValueRepo;
pub use saml_clients::SqliteSamlClientRepo;
pub use saml_sessions::{SqliteRelayStateRepo, SqliteSamlClaimsRepo};
