//! In-process repositories for `type = "none"` deployments and tests.
//!
//! State lives for the lifetime of the process and is not shared between
//! processes.

mod key_value;
mod saml_clients;
mod saml_sessions;

pub use key_value::MemoryKeyValueRepo;
pub use saml_clients::MemorySamlClientRepo;
pub use saml_sessions::{MemoryRelayStateRepo, MemorySamlClaimsRepo};
