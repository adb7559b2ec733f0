//! gatehouse-core: shared library for the gatehouse tunnel admission gateway.
//!
//! Provides the host identity (Ed25519 key + OpenSSH fingerprint), the
//! credential store and its JSON file loader, handshake message types and
//! their CBOR codec.

pub mod codec;
pub mod error;
pub mod identity;
pub mod messages;
pub mod users;

// Re-export commonly used items at crate root.
pub use codec::{cbor_decode, cbor_encode};
pub use error::{GateError, GateResult};
pub use identity::{fingerprint_key, verify_host_signature, HostIdentity};
pub use messages::{HandshakeMessage, AUTH_FAIL_REASON, PROTOCOL_VERSION};
pub use users::{parse_auth, CredentialLoader, CredentialStore, JsonFileLoader, Lookup, User, ALLOW_ALL};
