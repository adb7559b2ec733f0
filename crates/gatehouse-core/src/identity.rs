//! Long-term host identity: an Ed25519 key pair and its OpenSSH fingerprint.
//!
//! The secret key is drawn from the OS RNG, derived from a seed
//! (`SHA-256(seed)` becomes the secret), or loaded from an OpenSSH private
//! key file. The fingerprint is `SHA256:<base64>` over the public key only,
//! the same string `ssh-keygen -l` prints.

use crate::error::{GateError, GateResult};
use crate::messages::PROTOCOL_VERSION;
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};
use ssh_key::public::{Ed25519PublicKey, KeyData};
use ssh_key::{HashAlg, PrivateKey};
use std::fmt;
use std::path::Path;

/// The server's host key plus its precomputed fingerprint.
pub struct HostIdentity {
    signing_key: SigningKey,
    fingerprint: String,
}

impl HostIdentity {
    /// Generate the host key.
    ///
    /// An empty `seed` draws fresh key material per call; a non-empty seed
    /// always yields the same key and fingerprint.
    pub fn generate(seed: &str) -> GateResult<Self> {
        let secret: [u8; 32] = if seed.is_empty() {
            let mut bytes = [0u8; 32];
            OsRng
                .try_fill_bytes(&mut bytes)
                .map_err(|e| GateError::Identity(format!("failed to generate key: {e}")))?;
            bytes
        } else {
            Sha256::digest(seed.as_bytes()).into()
        };
        Ok(Self::from_secret(secret))
    }

    /// Load an unencrypted OpenSSH Ed25519 private key.
    pub fn from_openssh(pem: &str) -> GateResult<Self> {
        let key = PrivateKey::from_openssh(pem)
            .map_err(|e| GateError::Identity(format!("failed to parse key: {e}")))?;
        if key.is_encrypted() {
            return Err(GateError::Identity("encrypted host keys are not supported".into()));
        }
        let keypair = key
            .key_data()
            .ed25519()
            .ok_or_else(|| GateError::Identity("host key is not ed25519".into()))?;
        Ok(Self::from_secret(keypair.private.to_bytes()))
    }

    /// Read and parse an OpenSSH private key file.
    pub fn from_file(path: &Path) -> GateResult<Self> {
        let pem = std::fs::read_to_string(path).map_err(|e| {
            GateError::Identity(format!("cannot read key {}: {e}", path.display()))
        })?;
        Self::from_openssh(&pem)
    }

    fn from_secret(secret: [u8; 32]) -> Self {
        let signing_key = SigningKey::from_bytes(&secret);
        let fingerprint = fingerprint_key(&signing_key.verifying_key().to_bytes());
        Self {
            signing_key,
            fingerprint,
        }
    }

    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    /// Raw 32-byte public key.
    pub fn public_key(&self) -> [u8; 32] {
        self.signing_key.verifying_key().to_bytes()
    }

    /// Sign the handshake transcript for `session_id`.
    pub fn sign(&self, session_id: &str) -> Vec<u8> {
        let transcript = build_transcript(session_id);
        self.signing_key.sign(&transcript).to_bytes().to_vec()
    }
}

impl fmt::Debug for HostIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostIdentity")
            .field("fingerprint", &self.fingerprint)
            .finish_non_exhaustive()
    }
}

/// OpenSSH-style SHA-256 fingerprint of a raw Ed25519 public key.
pub fn fingerprint_key(public_key: &[u8; 32]) -> String {
    KeyData::Ed25519(Ed25519PublicKey(*public_key))
        .fingerprint(HashAlg::Sha256)
        .to_string()
}

/// Check that `signature` over the transcript for `session_id` was made by
/// the holder of `public_key`.
pub fn verify_host_signature(
    public_key: &[u8],
    session_id: &str,
    signature: &[u8],
) -> GateResult<()> {
    let vk_bytes: [u8; 32] = public_key
        .try_into()
        .map_err(|_| GateError::InvalidMessage("invalid host key length".into()))?;
    let verifying_key = VerifyingKey::from_bytes(&vk_bytes)
        .map_err(|e| GateError::InvalidMessage(format!("invalid host key: {e}")))?;
    let sig = Signature::from_slice(signature)
        .map_err(|e| GateError::InvalidMessage(format!("invalid signature: {e}")))?;
    verifying_key
        .verify(&build_transcript(session_id), &sig)
        .map_err(|_| GateError::InvalidMessage("host signature verification failed".into()))
}

/// `SHA-256(PROTOCOL_VERSION || 0x00 || session_id)`
fn build_transcript(session_id: &str) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(PROTOCOL_VERSION.as_bytes());
    hasher.update(b"\0");
    hasher.update(session_id.as_bytes());
    hasher.finalize().to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seeded_keys_are_deterministic() {
        let a = HostIdentity::generate("abc").unwrap();
        let b = HostIdentity::generate("abc").unwrap();
        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_eq!(a.public_key(), b.public_key());
    }

    #[test]
    fn different_seeds_differ() {
        let a = HostIdentity::generate("abc").unwrap();
        let b = HostIdentity::generate("xyz").unwrap();
        assert_ne!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn empty_seed_is_random() {
        let a = HostIdentity::generate("").unwrap();
        let b = HostIdentity::generate("").unwrap();
        assert_ne!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn fingerprint_is_openssh_sha256() {
        let id = HostIdentity::generate("abc").unwrap();
        assert!(id.fingerprint().starts_with("SHA256:"));
        assert_eq!(id.fingerprint(), fingerprint_key(&id.public_key()));
    }

    #[test]
    fn debug_hides_secret() {
        let id = HostIdentity::generate("abc").unwrap();
        let dbg = format!("{id:?}");
        assert!(dbg.contains("SHA256:"));
        assert!(!dbg.contains("signing_key"));
    }

    #[test]
    fn signature_roundtrip() {
        let id = HostIdentity::generate("abc").unwrap();
        let sig = id.sign("session-1");
        assert!(verify_host_signature(&id.public_key(), "session-1", &sig).is_ok());
        assert!(verify_host_signature(&id.public_key(), "session-2", &sig).is_err());

        let other = HostIdentity::generate("xyz").unwrap();
        assert!(verify_host_signature(&other.public_key(), "session-1", &sig).is_err());
    }

    #[test]
    fn garbage_key_file_is_identity_error() {
        let err = HostIdentity::from_openssh("not a key").unwrap_err();
        assert!(matches!(err, GateError::Identity(_)));
    }

    #[test]
    fn missing_key_file_is_identity_error() {
        let err = HostIdentity::from_file(Path::new("/nonexistent/gatehouse_key")).unwrap_err();
        assert!(matches!(err, GateError::Identity(_)));
    }
}
