pub mod health;
pub mod saml;
