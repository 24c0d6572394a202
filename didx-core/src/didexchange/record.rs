//! Connection record entity.
//!
//! A [`ConnectionRecord`] is the central entity of the DID-Exchange domain: it
//! tracks one pairwise connection through the handshake lifecycle, holding the
//! key material references, counterparty identity, correlation identifiers and
//! open metadata the protocol handlers need.
//!
//! State transitions are enforced here, on the entity itself: handlers build
//! the fully updated record through the mutators and a single guarded
//! [`ConnectionRecord::update_state`], then persist it with one repository
//! `save`. The record carries a `version` counter bumped on every mutation so
//! the storage layer can reject stale writes (optimistic concurrency).

use std::collections::HashMap;

use rst_common::standard::chrono::{DateTime, Utc};
use rst_common::standard::serde::{self, Deserialize, Serialize};
use rst_common::standard::serde_json;
use rst_common::standard::serde_json::Value;

use rstdev_domain::entity::ToJSON;
use rstdev_domain::BaseError;

use super::types::{
    Accept, ConnectionID, DidExchangeError, DidValue, RecordEntityAccessor, Role, State, ThreadID,
    Verkey,
};

/// Metadata key for routing keys pending mediation registration
pub const METADATA_ROUTING_KEYS: &str = "routing_keys";

/// Metadata key flagging a record that came in through an implicit invitation
pub const METADATA_IMPLICIT_INVITATION: &str = "implicit_invitation";

/// Metadata key holding the reason a record was abandoned
pub const METADATA_ABANDON_REASON: &str = "abandon_reason";

/// `ConnectionRecord` is the main entity data structure of the DID-Exchange
/// domain
///
/// A record is created when an invitation is issued or received (or when an
/// implicit request arrives against our public DID) and is mutated by each
/// protocol-message handler until it reaches a terminal state. Terminal
/// records persist for audit; deletion is an external concern.
///
/// Invariants enforced here:
/// - state transitions follow [`State::can_transition_to`] and never move
///   backward; the only sideways exit is [`ConnectionRecord::abandon`]
/// - `their_did` is only assigned by handlers after attachment verification
///   or trusted ledger resolution; the entity never invents it
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(crate = "self::serde")]
pub struct ConnectionRecord {
    /// Unique identifier for this connection, generated on creation
    connection_id: ConnectionID,

    /// Which side of the handshake this party plays
    role: Role,

    /// Current lifecycle state
    state: State,

    /// Key that signed/authenticated the invitation; the requester verifies
    /// the response attachment against it
    invitation_key: Option<Verkey>,

    /// Our DID for this connection, once assigned
    my_did: Option<DidValue>,

    /// Counterparty DID; set only after signature verification of their DID
    /// document attachment or trusted ledger resolution
    their_did: Option<DidValue>,

    /// Counterparty verification key taken from their DID document or the
    /// ledger
    their_verkey: Option<Verkey>,

    /// Counterparty service endpoint
    their_endpoint: Option<String>,

    /// Counterparty label; human-readable, non-authoritative
    their_label: Option<String>,

    /// Local alias for this connection; human-readable, non-authoritative
    alias: Option<String>,

    /// Message id of the invitation this record answers, used as the parent
    /// thread id
    invitation_msg_id: Option<ThreadID>,

    /// Thread id of the handshake request; the post-request lookup key
    request_id: Option<ThreadID>,

    /// Whether handlers proceed without operator confirmation
    accept: Accept,

    /// Open key-value store for protocol-specific auxiliary data
    metadata: HashMap<String, Value>,

    /// Optimistic-concurrency counter, bumped on every mutation
    version: u64,

    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl ConnectionRecord {
    pub fn builder() -> RecordBuilder {
        RecordBuilder::new()
    }

    fn touch(&mut self) {
        self.version += 1;
        self.updated_at = Utc::now();
    }

    /// Advance the record to `next`, validating the transition against the
    /// lifecycle table
    ///
    /// Returns [`DidExchangeError::InvalidState`] for any out-of-table
    /// transition, including attempts to leave a terminal state
    pub fn update_state(&mut self, next: State) -> Result<(), DidExchangeError> {
        if !self.state.can_transition_to(&next) {
            return Err(DidExchangeError::InvalidState(format!(
                "illegal transition {} -> {}",
                self.state.as_str(),
                next.as_str()
            )));
        }

        self.state = next;
        self.touch();
        Ok(())
    }

    /// Abandon the record with a reason
    ///
    /// Idempotent: abandoning an already-abandoned record is a no-op, so a
    /// redelivered problem report transitions a record exactly once. A
    /// completed connection cannot be abandoned
    pub fn abandon(&mut self, reason: &str) -> Result<(), DidExchangeError> {
        if self.state == State::Abandoned {
            return Ok(());
        }

        self.update_state(State::Abandoned)?;
        self.metadata.insert(
            METADATA_ABANDON_REASON.to_string(),
            Value::String(reason.to_string()),
        );
        Ok(())
    }

    pub fn set_my_did(&mut self, did: DidValue) {
        self.my_did = Some(did);
        self.touch();
    }

    pub fn set_their_did(&mut self, did: DidValue) {
        self.their_did = Some(did);
        self.touch();
    }

    pub fn set_their_verkey(&mut self, verkey: Verkey) {
        self.their_verkey = Some(verkey);
        self.touch();
    }

    pub fn set_their_endpoint(&mut self, endpoint: String) {
        self.their_endpoint = Some(endpoint);
        self.touch();
    }

    pub fn set_their_label(&mut self, label: String) {
        self.their_label = Some(label);
        self.touch();
    }

    pub fn set_alias(&mut self, alias: String) {
        self.alias = Some(alias);
        self.touch();
    }

    pub fn set_request_id(&mut self, request_id: ThreadID) {
        self.request_id = Some(request_id);
        self.touch();
    }

    pub fn set_accept(&mut self, accept: Accept) {
        self.accept = accept;
        self.touch();
    }

    pub fn set_metadata(&mut self, key: &str, value: Value) {
        self.metadata.insert(key.to_string(), value);
        self.touch();
    }

    pub fn remove_metadata(&mut self, key: &str) -> Option<Value> {
        let removed = self.metadata.remove(key);
        if removed.is_some() {
            self.touch();
        }

        removed
    }
}

impl RecordEntityAccessor for ConnectionRecord {
    fn get_connection_id(&self) -> ConnectionID {
        self.connection_id.clone()
    }

    fn get_role(&self) -> Role {
        self.role
    }

    fn get_state(&self) -> State {
        self.state
    }

    fn get_invitation_key(&self) -> Option<Verkey> {
        self.invitation_key.clone()
    }

    fn get_my_did(&self) -> Option<DidValue> {
        self.my_did.clone()
    }

    fn get_their_did(&self) -> Option<DidValue> {
        self.their_did.clone()
    }

    fn get_their_verkey(&self) -> Option<Verkey> {
        self.their_verkey.clone()
    }

    fn get_their_endpoint(&self) -> Option<String> {
        self.their_endpoint.clone()
    }

    fn get_their_label(&self) -> Option<String> {
        self.their_label.clone()
    }

    fn get_alias(&self) -> Option<String> {
        self.alias.clone()
    }

    fn get_invitation_msg_id(&self) -> Option<ThreadID> {
        self.invitation_msg_id.clone()
    }

    fn get_request_id(&self) -> Option<ThreadID> {
        self.request_id.clone()
    }

    fn get_accept(&self) -> Accept {
        self.accept
    }

    fn get_metadata(&self, key: &str) -> Option<Value> {
        self.metadata.get(key).cloned()
    }

    fn get_version(&self) -> u64 {
        self.version
    }

    fn get_created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    fn get_updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }
}

impl ToJSON for ConnectionRecord {
    fn to_json(&self) -> Result<String, BaseError> {
        serde_json::to_string(self).map_err(|err| BaseError::ToJSONError(err.to_string()))
    }
}

impl TryInto<Vec<u8>> for ConnectionRecord {
    type Error = DidExchangeError;

    fn try_into(self) -> Result<Vec<u8>, Self::Error> {
        serde_json::to_vec(&self).map_err(|err| DidExchangeError::EntityError(err.to_string()))
    }
}

impl TryFrom<Vec<u8>> for ConnectionRecord {
    type Error = DidExchangeError;

    fn try_from(bytes: Vec<u8>) -> Result<Self, Self::Error> {
        serde_json::from_slice(&bytes).map_err(|err| DidExchangeError::EntityError(err.to_string()))
    }
}

/// `RecordBuilder` provides fluent construction of [`ConnectionRecord`]
/// entities
///
/// The role is required; everything else is optional. State defaults to
/// [`State::Invitation`], the connection id is generated when not provided
#[derive(Debug, Default)]
pub struct RecordBuilder {
    connection_id: Option<ConnectionID>,
    role: Option<Role>,
    state: Option<State>,
    invitation_key: Option<Verkey>,
    my_did: Option<DidValue>,
    their_did: Option<DidValue>,
    their_label: Option<String>,
    alias: Option<String>,
    invitation_msg_id: Option<ThreadID>,
    accept: Option<Accept>,
    metadata: HashMap<String, Value>,
}

impl RecordBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_connection_id(mut self, connection_id: ConnectionID) -> Self {
        self.connection_id = Some(connection_id);
        self
    }

    pub fn with_role(mut self, role: Role) -> Self {
        self.role = Some(role);
        self
    }

    pub fn with_state(mut self, state: State) -> Self {
        self.state = Some(state);
        self
    }

    pub fn with_invitation_key<T: Into<Verkey>>(mut self, invitation_key: T) -> Self {
        self.invitation_key = Some(invitation_key.into());
        self
    }

    pub fn with_my_did<T: Into<DidValue>>(mut self, my_did: T) -> Self {
        self.my_did = Some(my_did.into());
        self
    }

    pub fn with_their_did<T: Into<DidValue>>(mut self, their_did: T) -> Self {
        self.their_did = Some(their_did.into());
        self
    }

    pub fn with_their_label<T: Into<String>>(mut self, their_label: T) -> Self {
        self.their_label = Some(their_label.into());
        self
    }

    pub fn with_alias<T: Into<String>>(mut self, alias: T) -> Self {
        self.alias = Some(alias.into());
        self
    }

    pub fn with_invitation_msg_id<T: Into<ThreadID>>(mut self, invitation_msg_id: T) -> Self {
        self.invitation_msg_id = Some(invitation_msg_id.into());
        self
    }

    pub fn with_accept(mut self, accept: Accept) -> Self {
        self.accept = Some(accept);
        self
    }

    pub fn with_metadata(mut self, key: &str, value: Value) -> Self {
        self.metadata.insert(key.to_string(), value);
        self
    }

    pub fn build(self) -> Result<ConnectionRecord, DidExchangeError> {
        let role = self
            .role
            .ok_or_else(|| DidExchangeError::EntityError("record role is required".to_string()))?;

        let now = Utc::now();
        Ok(ConnectionRecord {
            connection_id: self.connection_id.unwrap_or_else(ConnectionID::generate),
            role,
            state: self.state.unwrap_or(State::Invitation),
            invitation_key: self.invitation_key,
            my_did: self.my_did,
            their_did: self.their_did,
            their_verkey: None,
            their_endpoint: None,
            their_label: self.their_label,
            alias: self.alias,
            invitation_msg_id: self.invitation_msg_id,
            request_id: None,
            accept: self.accept.unwrap_or_default(),
            metadata: self.metadata,
            version: 0,
            created_at: now,
            updated_at: now,
        })
    }
}
