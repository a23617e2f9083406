//! SAML 2.0 building blocks on top of samael: IdP metadata, the response
//! envelope check and SP credentials.

pub mod credentials;
pub mod envelope;
pub mod error;
pub mod metadata;

use std::sync::atomic::{AtomicBool, Ordering};

pub use error::{ErrorResponse, SamlError, SamlResult};
use parking_lot::Mutex;

static INITIALIZED: AtomicBool = AtomicBool::new(false);
static INIT_LOCK: Mutex<()> = Mutex::new(());

/// One-time process-wide crypto library setup.
///
/// Cheap after the first call; safe to call from any thread.
pub fn ensure_initialized() {
    if INITIALIZED.load(Ordering::Acquire) {
        return;
    }
    let _guard = INIT_LOCK.lock();
    if INITIALIZED.load(Ordering::Relaxed) {
        return;
    }
    openssl::init();
    tracing::debug!("Crypto library initialized");
    INITIALIZED.store(true, Ordering::Release);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ensure_initialized_is_idempotent() {
        let handles: Vec<_> = (0..8)
            .map(|_| std::thread::spawn(ensure_initialized))
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        ensure_initialized();
        assert!(INITIALIZED.load(Ordering::Acquire));
    }
}
