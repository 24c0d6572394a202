//! Signed DID document attachment.
//!
//! A [`SignedAttachment`] wraps a serialized DID document in a detached-JWS
//! style envelope: base64url payload, base64url protected header naming the
//! signer key, and an Ed25519 signature over `protected || '.' || payload`.
//! Signing goes through the wallet collaborator, which holds the private key;
//! verification is pure and works from the embedded public key alone.
//!
//! The envelope authenticates the document, nothing more. Callers compare the
//! returned document's DID and keys against the expected counterparty
//! identity themselves.

use base64::URL_SAFE_NO_PAD;
use ed25519_dalek::{Signature, Verifier, VerifyingKey};

use rst_common::standard::serde::{self, Deserialize, Serialize};
use rst_common::standard::serde_json;

use super::diddoc::DidDocument;
use super::types::{DidExchangeError, Verkey, WalletBuilder};

const JWS_ALG_EDDSA: &str = "EdDSA";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(crate = "self::serde")]
struct ProtectedHeader {
    alg: String,
    signer: String,
}

/// A signed envelope carrying a serialized DID document
///
/// Owned exclusively by the protocol message that carries it; never persisted
/// independently of the connection record it was exchanged on
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(crate = "self::serde")]
pub struct SignedAttachment {
    payload: String,
    protected: String,
    signature: String,
}

impl SignedAttachment {
    /// Wrap `doc` in a signed envelope, obtaining the detached signature from
    /// the wallet behind `signer`
    ///
    /// Deterministic given identical document and key (RFC 8032 signatures
    /// carry no nonce)
    pub async fn sign<TWallet>(
        doc: &DidDocument,
        signer: Verkey,
        wallet: &TWallet,
    ) -> Result<Self, DidExchangeError>
    where
        TWallet: WalletBuilder,
    {
        let payload_bytes = serde_json::to_vec(doc)
            .map_err(|err| DidExchangeError::AttachmentError(err.to_string()))?;
        let payload = base64::encode_config(payload_bytes, URL_SAFE_NO_PAD);

        let header = ProtectedHeader {
            alg: JWS_ALG_EDDSA.to_string(),
            signer: signer.as_str().to_string(),
        };
        let header_bytes = serde_json::to_vec(&header)
            .map_err(|err| DidExchangeError::AttachmentError(err.to_string()))?;
        let protected = base64::encode_config(header_bytes, URL_SAFE_NO_PAD);

        let signing_input = format!("{}.{}", protected, payload);
        let signature = wallet.sign(signer, signing_input.into_bytes()).await?;

        Ok(Self {
            payload,
            protected,
            signature: base64::encode_config(signature, URL_SAFE_NO_PAD),
        })
    }

    /// The signer key embedded in the protected header
    pub fn signer(&self) -> Result<Verkey, DidExchangeError> {
        let header = self.decode_header()?;
        Ok(Verkey::from(header.signer))
    }

    /// Validate the envelope and return the parsed document
    ///
    /// The signature is checked against the embedded signer key. When
    /// `expected_signer` is given the embedded key must match it as well,
    /// which is how a requester pins the response attachment to the
    /// invitation key
    pub fn verify(
        &self,
        expected_signer: Option<&Verkey>,
    ) -> Result<DidDocument, DidExchangeError> {
        let header = self.decode_header()?;
        if header.alg != JWS_ALG_EDDSA {
            return Err(DidExchangeError::AttachmentError(format!(
                "unsupported signature algorithm: {}",
                header.alg
            )));
        }

        if let Some(expected) = expected_signer {
            if expected.as_str() != header.signer {
                return Err(DidExchangeError::AttachmentError(
                    "signer key does not match the expected key".to_string(),
                ));
            }
        }

        let key_bytes = bs58::decode(&header.signer)
            .into_vec()
            .map_err(|err| DidExchangeError::AttachmentError(err.to_string()))?;
        let key_bytes: [u8; 32] = key_bytes.try_into().map_err(|_| {
            DidExchangeError::AttachmentError("invalid signer key length".to_string())
        })?;
        let verifying_key = VerifyingKey::from_bytes(&key_bytes)
            .map_err(|err| DidExchangeError::AttachmentError(err.to_string()))?;

        let signature_bytes = base64::decode_config(&self.signature, URL_SAFE_NO_PAD)
            .map_err(|err| DidExchangeError::AttachmentError(err.to_string()))?;
        let signature_bytes: [u8; 64] = signature_bytes.try_into().map_err(|_| {
            DidExchangeError::AttachmentError("invalid signature length".to_string())
        })?;
        let signature = Signature::from_bytes(&signature_bytes);

        let signing_input = format!("{}.{}", self.protected, self.payload);
        verifying_key
            .verify(signing_input.as_bytes(), &signature)
            .map_err(|_| {
                DidExchangeError::AttachmentError("signature verification failed".to_string())
            })?;

        let doc_bytes = base64::decode_config(&self.payload, URL_SAFE_NO_PAD)
            .map_err(|err| DidExchangeError::AttachmentError(err.to_string()))?;
        serde_json::from_slice(&doc_bytes)
            .map_err(|err| DidExchangeError::AttachmentError(err.to_string()))
    }

    fn decode_header(&self) -> Result<ProtectedHeader, DidExchangeError> {
        let header_bytes = base64::decode_config(&self.protected, URL_SAFE_NO_PAD)
            .map_err(|err| DidExchangeError::AttachmentError(err.to_string()))?;
        serde_json::from_slice(&header_bytes)
            .map_err(|err| DidExchangeError::AttachmentError(err.to_string()))
    }
}
