//! Legacy-format DID document model.
//!
//! The DID-Exchange handshake carries DID documents in the legacy
//! did-communication layout: a `publicKey` array of base58 Ed25519 keys and a
//! single service entry with `recipientKeys`, `routingKeys` and a
//! `serviceEndpoint`. This module owns that wire shape and the builder the
//! manager uses to describe the local side of a connection.

use rst_common::standard::serde::{self, Deserialize, Serialize};
use rst_common::standard::serde_json;

use rstdev_domain::entity::ToJSON;
use rstdev_domain::BaseError;

use super::types::{DidExchangeError, DidValue, Verkey};

pub const DID_DOC_CONTEXT: &str = "https://w3id.org/did/v1";
pub const KEY_TYPE_ED25519: &str = "Ed25519VerificationKey2018";
pub const SERVICE_TYPE_DIDCOMM: &str = "did-communication";

/// A verification key entry of the legacy document layout
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(crate = "self::serde")]
pub struct PublicKey {
    id: String,

    #[serde(rename = "type")]
    key_type: String,

    controller: String,

    #[serde(rename = "publicKeyBase58")]
    public_key_base58: String,
}

impl PublicKey {
    pub fn get_id(&self) -> &str {
        &self.id
    }

    pub fn get_public_key_base58(&self) -> &str {
        &self.public_key_base58
    }
}

/// The connection's communication service entry
///
/// Recipient keys are fully qualified references into the document's
/// `publicKey` array; routing keys are mediator-provided and forwarded
/// unmodified
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(crate = "self::serde")]
pub struct Service {
    id: String,

    #[serde(rename = "type")]
    service_type: String,

    priority: u32,

    #[serde(rename = "recipientKeys")]
    recipient_keys: Vec<String>,

    #[serde(rename = "routingKeys", default, skip_serializing_if = "Vec::is_empty")]
    routing_keys: Vec<String>,

    #[serde(rename = "serviceEndpoint")]
    service_endpoint: String,
}

impl Service {
    pub fn get_recipient_keys(&self) -> &[String] {
        &self.recipient_keys
    }

    pub fn get_routing_keys(&self) -> &[String] {
        &self.routing_keys
    }

    pub fn get_service_endpoint(&self) -> &str {
        &self.service_endpoint
    }
}

/// `DidDocument` describes an identity's keys and service endpoints in the
/// legacy layout exchanged during the handshake
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(crate = "self::serde")]
pub struct DidDocument {
    #[serde(rename = "@context")]
    context: String,

    id: String,

    #[serde(rename = "publicKey")]
    public_key: Vec<PublicKey>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    authentication: Vec<String>,

    service: Vec<Service>,
}

impl DidDocument {
    pub fn builder() -> DidDocumentBuilder {
        DidDocumentBuilder::new()
    }

    pub fn get_id(&self) -> &str {
        &self.id
    }

    pub fn get_public_keys(&self) -> &[PublicKey] {
        &self.public_key
    }

    pub fn get_services(&self) -> &[Service] {
        &self.service
    }

    /// The raw base58 value of the document's first recipient key, the key a
    /// counterparty addresses messages to
    pub fn first_recipient_key(&self) -> Option<Verkey> {
        self.public_key
            .first()
            .map(|pk| Verkey::from(pk.public_key_base58.clone()))
    }

    /// The endpoint of the document's single communication service
    pub fn service_endpoint(&self) -> Option<String> {
        self.service
            .first()
            .map(|svc| svc.service_endpoint.clone())
    }

    pub fn routing_keys(&self) -> Vec<Verkey> {
        self.service
            .first()
            .map(|svc| {
                svc.routing_keys
                    .iter()
                    .map(|key| Verkey::from(key.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }
}

impl ToJSON for DidDocument {
    fn to_json(&self) -> Result<String, BaseError> {
        serde_json::to_string(self).map_err(|err| BaseError::ToJSONError(err.to_string()))
    }
}

/// `DidDocumentBuilder` constructs the local DID document for a connection:
/// exactly one did-communication service carrying the given endpoint, the
/// recipient keys as fully qualified references, and any mediator routing
/// keys forwarded unmodified
///
/// Construction is independent of the peer identity scheme; public-ledger
/// DIDs and locally generated peer DIDs pass through the same path
#[derive(Debug, Default)]
pub struct DidDocumentBuilder {
    did: Option<DidValue>,
    endpoint: Option<String>,
    recipient_keys: Vec<Verkey>,
    routing_keys: Vec<Verkey>,
}

impl DidDocumentBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_did<T: Into<DidValue>>(mut self, did: T) -> Self {
        self.did = Some(did.into());
        self
    }

    pub fn with_endpoint<T: Into<String>>(mut self, endpoint: T) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    pub fn with_recipient_key<T: Into<Verkey>>(mut self, key: T) -> Self {
        self.recipient_keys.push(key.into());
        self
    }

    pub fn with_routing_keys(mut self, keys: Vec<Verkey>) -> Self {
        self.routing_keys = keys;
        self
    }

    pub fn build(self) -> Result<DidDocument, DidExchangeError> {
        let did = self
            .did
            .ok_or_else(|| DidExchangeError::BuildError("document DID is required".to_string()))?;
        let endpoint = self.endpoint.ok_or_else(|| {
            DidExchangeError::BuildError("service endpoint is required".to_string())
        })?;

        if self.recipient_keys.is_empty() {
            return Err(DidExchangeError::BuildError(
                "no recipient key available".to_string(),
            ));
        }

        let public_key: Vec<PublicKey> = self
            .recipient_keys
            .iter()
            .enumerate()
            .map(|(idx, key)| PublicKey {
                id: format!("{}#keys-{}", did.as_str(), idx + 1),
                key_type: KEY_TYPE_ED25519.to_string(),
                controller: did.as_str().to_string(),
                public_key_base58: key.as_str().to_string(),
            })
            .collect();

        let recipient_refs = public_key.iter().map(|pk| pk.id.clone()).collect();
        let service = Service {
            id: format!("{}#did-communication", did.as_str()),
            service_type: SERVICE_TYPE_DIDCOMM.to_string(),
            priority: 0,
            recipient_keys: recipient_refs,
            routing_keys: self
                .routing_keys
                .iter()
                .map(|key| key.as_str().to_string())
                .collect(),
            service_endpoint: endpoint,
        };

        let authentication = public_key.iter().map(|pk| pk.id.clone()).collect();

        Ok(DidDocument {
            context: DID_DOC_CONTEXT.to_string(),
            id: did.as_str().to_string(),
            public_key,
            authentication,
            service: vec![service],
        })
    }
}
