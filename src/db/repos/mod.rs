mod key_value;
mod saml_clients;
mod saml_sessions;

pub use key_value::*;
pub use saml_clients::*;
pub use saml_sessions::*;
