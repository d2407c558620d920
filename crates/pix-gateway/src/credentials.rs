//! Gateway identity credentials for the registration handshake.
//!
//! The gateway owns a long-lived Ed25519 keypair. The private key is
//! generated on first startup, persisted as a 32-byte seed file, and
//! loaded unchanged afterwards; it never leaves the process. The identity
//! message is signed exactly once at construction — the signature only
//! proves the gateway's long-term identity, so it is reused verbatim for
//! every handshake.

use std::io;
use std::net::IpAddr;
use std::path::{Path, PathBuf};

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use ed25519_dalek::{Signer, SigningKey, VerifyingKey};
use pix_proto::{HandshakeResponse, ValidatorId};
use rand::rngs::OsRng;
use thiserror::Error;
use tracing::info;

use crate::registry::ValidatorRegistry;
use crate::stake::StakeSnapshot;

/// The fixed message every handshake signature covers.
pub const IDENTITY_MESSAGE: &str = "image-generating-subnet";

/// Errors from credential loading or issuance.
#[derive(Debug, Error)]
pub enum CredentialError {
    /// The handshake carried an empty callback postfix.
    #[error("postfix must not be empty")]
    EmptyPostfix,

    /// The uid does not resolve to a member of the current stake snapshot.
    #[error("uid {0} does not resolve to a known validator")]
    UnknownUid(u64),

    /// The key file could not be read or written.
    #[error("key file {path}: {source}")]
    KeyIo {
        /// Path of the key file.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: io::Error,
    },

    /// The key file exists but is not a 32-byte Ed25519 seed.
    #[error("key file {0} is not a 32-byte Ed25519 seed")]
    MalformedKey(PathBuf),
}

/// Issues the gateway's identity proof and registers handshaking
/// validators.
#[derive(Debug)]
pub struct CredentialIssuer {
    signing_key: SigningKey,
    public_key_b64: String,
    signature_b64: String,
}

impl CredentialIssuer {
    /// Build an issuer around an existing signing key.
    #[must_use]
    pub fn new(signing_key: SigningKey) -> Self {
        let public_key_b64 = BASE64.encode(signing_key.verifying_key().as_bytes());
        let signature = signing_key.sign(IDENTITY_MESSAGE.as_bytes());
        let signature_b64 = BASE64.encode(signature.to_bytes());
        Self {
            signing_key,
            public_key_b64,
            signature_b64,
        }
    }

    /// Load the signing key from `path`, generating and persisting a fresh
    /// one if the file does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or written, or holds
    /// something other than a 32-byte seed.
    pub fn load_or_generate(path: &Path) -> Result<Self, CredentialError> {
        let signing_key = match std::fs::read(path) {
            Ok(bytes) => {
                let seed: [u8; 32] = bytes
                    .try_into()
                    .map_err(|_| CredentialError::MalformedKey(path.to_path_buf()))?;
                SigningKey::from_bytes(&seed)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                info!(path = %path.display(), "generating gateway signing key");
                let signing_key = SigningKey::generate(&mut OsRng);
                std::fs::write(path, signing_key.to_bytes()).map_err(|source| {
                    CredentialError::KeyIo {
                        path: path.to_path_buf(),
                        source,
                    }
                })?;
                signing_key
            }
            Err(source) => {
                return Err(CredentialError::KeyIo {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };
        Ok(Self::new(signing_key))
    }

    /// Base64 public key, sent as the `authorization` field of every
    /// forward and probe.
    #[must_use]
    pub fn public_key_b64(&self) -> &str {
        &self.public_key_b64
    }

    /// The verifying key, for callers that check signatures themselves.
    #[must_use]
    pub fn verifying_key(&self) -> VerifyingKey {
        self.signing_key.verifying_key()
    }

    /// The precomputed identity proof.
    #[must_use]
    pub fn handshake(&self) -> HandshakeResponse {
        HandshakeResponse {
            message: IDENTITY_MESSAGE.to_string(),
            signature: self.signature_b64.clone(),
        }
    }

    /// Answer a registration handshake.
    ///
    /// Resolves the caller's identity from its membership ordinal, builds
    /// the callback endpoint as `http://{requester_ip}{postfix}`, registers
    /// it, and returns the fixed identity proof.
    ///
    /// # Errors
    ///
    /// Returns an invalid-handshake error when the postfix is empty or the
    /// uid does not resolve in the current stake snapshot.
    pub fn issue(
        &self,
        registry: &ValidatorRegistry,
        snapshot: &StakeSnapshot,
        uid: u64,
        requester_ip: IpAddr,
        postfix: &str,
    ) -> Result<HandshakeResponse, CredentialError> {
        if postfix.is_empty() {
            return Err(CredentialError::EmptyPostfix);
        }
        let id: ValidatorId = snapshot
            .resolve_uid(uid)
            .ok_or(CredentialError::UnknownUid(uid))?
            .clone();

        let endpoint = format!("http://{requester_ip}{postfix}");
        info!(validator = %id, uid, endpoint = %endpoint, "handshake accepted");
        registry.register(id, endpoint);

        Ok(self.handshake())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::{Signature, Verifier};

    fn issuer() -> CredentialIssuer {
        CredentialIssuer::new(SigningKey::from_bytes(&[7u8; 32]))
    }

    fn snapshot() -> StakeSnapshot {
        StakeSnapshot::new(vec![
            (ValidatorId::from("hotkey-0"), 10.0),
            (ValidatorId::from("hotkey-1"), 5.0),
        ])
    }

    #[test]
    fn signature_verifies_against_public_key() {
        let issuer = issuer();
        let handshake = issuer.handshake();

        let sig_bytes: [u8; 64] = BASE64
            .decode(&handshake.signature)
            .expect("base64")
            .try_into()
            .expect("64 bytes");
        let signature = Signature::from_bytes(&sig_bytes);

        issuer
            .verifying_key()
            .verify(handshake.message.as_bytes(), &signature)
            .expect("signature must verify");
        assert_eq!(handshake.message, IDENTITY_MESSAGE);
    }

    #[test]
    fn empty_postfix_is_rejected() {
        let issuer = issuer();
        let registry = ValidatorRegistry::new();
        let result = issuer.issue(&registry, &snapshot(), 0, "10.0.0.9".parse().expect("ip"), "");
        assert!(matches!(result, Err(CredentialError::EmptyPostfix)));
        assert!(registry.is_empty(), "nothing registered on failure");
    }

    #[test]
    fn unresolvable_uid_is_rejected() {
        let issuer = issuer();
        let registry = ValidatorRegistry::new();
        let result = issuer.issue(
            &registry,
            &snapshot(),
            42,
            "10.0.0.9".parse().expect("ip"),
            ":8000/gen",
        );
        assert!(matches!(result, Err(CredentialError::UnknownUid(42))));
    }

    #[test]
    fn issue_registers_callback_endpoint() {
        let issuer = issuer();
        let registry = ValidatorRegistry::new();
        let response = issuer
            .issue(
                &registry,
                &snapshot(),
                1,
                "10.0.0.9".parse().expect("ip"),
                ":8000/gen",
            )
            .expect("issue");

        assert_eq!(response.message, IDENTITY_MESSAGE);
        let record = registry.get(&ValidatorId::from("hotkey-1")).expect("record");
        assert_eq!(record.endpoint, "http://10.0.0.9:8000/gen");
        assert!(record.active);
    }

    #[test]
    fn repeated_handshake_keeps_one_record() {
        let issuer = issuer();
        let registry = ValidatorRegistry::new();
        let ip: IpAddr = "10.0.0.9".parse().expect("ip");

        issuer
            .issue(&registry, &snapshot(), 0, ip, ":8000/gen")
            .expect("first");
        issuer
            .issue(&registry, &snapshot(), 0, ip, ":9000/gen")
            .expect("second");

        assert_eq!(registry.len(), 1);
        let record = registry.get(&ValidatorId::from("hotkey-0")).expect("record");
        assert_eq!(record.endpoint, "http://10.0.0.9:9000/gen");
    }

    #[test]
    fn key_survives_restart_unchanged() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("gateway.key");

        let first = CredentialIssuer::load_or_generate(&path).expect("generate");
        let second = CredentialIssuer::load_or_generate(&path).expect("reload");

        assert_eq!(first.public_key_b64(), second.public_key_b64());
        assert_eq!(first.handshake().signature, second.handshake().signature);
    }

    #[test]
    fn malformed_key_file_is_an_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("gateway.key");
        std::fs::write(&path, b"short").expect("write");

        let result = CredentialIssuer::load_or_generate(&path);
        assert!(matches!(result, Err(CredentialError::MalformedKey(_))));
    }
}
