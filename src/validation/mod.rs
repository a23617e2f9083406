//! Validation of user-supplied input that drives outbound requests.

pub mod url;
