mod saml_client;
mod saml_session;
mod validators;

pub use saml_client::*;
pub use saml_session::*;
