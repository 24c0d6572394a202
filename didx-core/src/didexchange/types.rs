use std::fmt::Debug;

use derive_more::{AsRef, From, Into};
use the_newtype::Newtype;

use rst_common::standard::async_trait::async_trait;
use rst_common::standard::chrono::{DateTime, Utc};
use rst_common::standard::serde::{self, Deserialize, Serialize};
use rst_common::standard::serde_json::Value;
use rst_common::standard::uuid::Uuid;
use rst_common::with_errors::thiserror::{self, Error};

use rstdev_domain::entity::ToJSON;

use super::message::{
    Complete, Invitation, MessageReceipt, OutboundMessage, ProblemReport, Request, Response,
};

/// `DidExchangeError` is the base error type for the DID-Exchange domain
///
/// Every failure a protocol-message handler can surface to its caller is a
/// variant here. The transport layer is responsible for converting these into
/// problem reports or operator-facing errors; the core never maps them itself
#[derive(Debug, PartialEq, Error, Serialize, Deserialize, Clone)]
#[serde(crate = "self::serde")]
pub enum DidExchangeError {
    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("unsolicited connection requests are not enabled")]
    UnsolicitedNotAllowed,

    #[error("cannot create a connection to our own public DID")]
    SelfConnection,

    #[error("no public DID configured in the wallet")]
    MissingPublicDid,

    #[error("connection already exists for DID: {0}")]
    ConnectionExists(String),

    #[error("invalid invitation: {0}")]
    InvalidInvitation(String),

    #[error("attachment error: {0}")]
    AttachmentError(String),

    #[error("DID mismatch: expected {expected}, found {found}")]
    DidMismatch { expected: String, found: String },

    #[error("request carries no DID")]
    NoDidInRequest,

    #[error("response carries no DID")]
    NoDidInResponse,

    #[error("record not found: {0}")]
    RecordNotFound(String),

    #[error("problem report is missing a description code")]
    MissingDescription,

    #[error("unrecognized problem report code: {0}")]
    UnrecognizedCode(String),

    #[error("wallet error: {0}")]
    WalletError(String),

    #[error("resolver error: {0}")]
    ResolverError(String),

    #[error("routing error: {0}")]
    RoutingError(String),

    #[error("responder error: {0}")]
    ResponderError(String),

    #[error("storage error: {0}")]
    StorageError(String),

    #[error("entity error: {0}")]
    EntityError(String),

    #[error("diddoc build error: {0}")]
    BuildError(String),
}

/// `State` represents a connection record's position in the DID-Exchange
/// lifecycle
///
/// Transitions are monotonic: a record only ever moves forward through the
/// table encoded by [`State::can_transition_to`], except that any non-terminal
/// state may fall into [`State::Abandoned`]. `Completed` and `Abandoned` are
/// terminal
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(crate = "self::serde")]
#[serde(rename_all = "lowercase")]
pub enum State {
    Invitation,
    Request,
    Response,
    Completed,
    Abandoned,
}

impl State {
    /// Legal forward transitions. Backward movement is never allowed; the
    /// only sideways exit is into `Abandoned` from a non-terminal state
    pub fn can_transition_to(&self, next: &State) -> bool {
        matches!(
            (self, next),
            (State::Invitation, State::Request)
                | (State::Invitation, State::Abandoned)
                | (State::Request, State::Response)
                | (State::Request, State::Completed)
                | (State::Request, State::Abandoned)
                | (State::Response, State::Completed)
                | (State::Response, State::Abandoned)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, State::Completed | State::Abandoned)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            State::Invitation => "invitation",
            State::Request => "request",
            State::Response => "response",
            State::Completed => "completed",
            State::Abandoned => "abandoned",
        }
    }
}

/// `Role` is the side of the handshake this party plays for a given record
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(crate = "self::serde")]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Requester,
    Responder,
}

/// `Accept` governs whether a request or response proceeds without operator
/// confirmation
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(crate = "self::serde")]
#[serde(rename_all = "lowercase")]
pub enum Accept {
    #[default]
    Manual,
    Auto,
}

/// `ProblemReportReason` is the closed set of codes a DID-Exchange problem
/// report may carry. Anything outside this set is rejected with
/// [`DidExchangeError::UnrecognizedCode`]
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(crate = "self::serde")]
pub enum ProblemReportReason {
    InvitationNotAccepted,
    RequestNotAccepted,
    RequestProcessingError,
    ResponseNotAccepted,
    ResponseProcessingError,
    CompleteRejected,
    Abandoned,
}

impl ProblemReportReason {
    pub fn as_code(&self) -> &'static str {
        match self {
            ProblemReportReason::InvitationNotAccepted => "invitation_not_accepted",
            ProblemReportReason::RequestNotAccepted => "request_not_accepted",
            ProblemReportReason::RequestProcessingError => "request_processing_error",
            ProblemReportReason::ResponseNotAccepted => "response_not_accepted",
            ProblemReportReason::ResponseProcessingError => "response_processing_error",
            ProblemReportReason::CompleteRejected => "complete_rejected",
            ProblemReportReason::Abandoned => "abandoned",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "invitation_not_accepted" => Some(ProblemReportReason::InvitationNotAccepted),
            "request_not_accepted" => Some(ProblemReportReason::RequestNotAccepted),
            "request_processing_error" => Some(ProblemReportReason::RequestProcessingError),
            "response_not_accepted" => Some(ProblemReportReason::ResponseNotAccepted),
            "response_processing_error" => Some(ProblemReportReason::ResponseProcessingError),
            "complete_rejected" => Some(ProblemReportReason::CompleteRejected),
            "abandoned" => Some(ProblemReportReason::Abandoned),
            _ => None,
        }
    }
}

/// Unique identifier for a connection record
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Newtype, From, Into, AsRef)]
#[serde(crate = "self::serde")]
pub struct ConnectionID(String);

impl ConnectionID {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Message/thread correlation identifier linking a request to its eventual
/// response and complete messages
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Newtype, From, Into, AsRef)]
#[serde(crate = "self::serde")]
pub struct ThreadID(String);

impl ThreadID {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// A DID value, either ledger-anchored or locally generated
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Newtype, From, Into, AsRef)]
#[serde(crate = "self::serde")]
pub struct DidValue(String);

impl DidValue {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// A base58-encoded Ed25519 verification key
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Newtype, From, Into, AsRef)]
#[serde(crate = "self::serde")]
pub struct Verkey(String);

impl Verkey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// `DidInfo` couples a DID with its current verification key, as held by the
/// wallet collaborator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(crate = "self::serde")]
pub struct DidInfo {
    pub did: DidValue,
    pub verkey: Verkey,
}

/// `DidExchangeConfig` carries the policy knobs that would otherwise live in
/// ambient settings. It is handed to the manager once at construction; every
/// handler is then a pure function of (record, message, config, collaborators)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(crate = "self::serde")]
pub struct DidExchangeConfig {
    /// Label presented to counterparties when none is given per call
    pub my_label: String,

    /// Endpoint advertised when neither the caller nor a mediator supplies one
    pub my_endpoint: String,

    /// Whether invitations bound to a public DID may be answered at all
    pub public_invites: bool,

    /// Whether a request with no matching invitation may be accepted against
    /// our public DID
    pub implicit_invites: bool,

    /// Default accept policy when a call does not override it
    pub auto_accept: Accept,

    /// Emit a proactive feature-discovery disclosure once a connection
    /// completes
    pub auto_disclose_features: bool,
}

impl Default for DidExchangeConfig {
    fn default() -> Self {
        Self {
            my_label: "didx-agent".to_string(),
            my_endpoint: "http://localhost:8080".to_string(),
            public_invites: false,
            implicit_invites: false,
            auto_accept: Accept::Manual,
            auto_disclose_features: false,
        }
    }
}

/// `RecordEntityAccessor` is a special trait used to access the connection
/// record entity property fields
///
/// The entity protects its properties from direct manipulation; everything
/// outside the entity module reads them through this trait
pub trait RecordEntityAccessor:
    Clone + Debug + ToJSON + TryInto<Vec<u8>> + TryFrom<Vec<u8>>
{
    fn get_connection_id(&self) -> ConnectionID;
    fn get_role(&self) -> Role;
    fn get_state(&self) -> State;
    fn get_invitation_key(&self) -> Option<Verkey>;
    fn get_my_did(&self) -> Option<DidValue>;
    fn get_their_did(&self) -> Option<DidValue>;
    fn get_their_verkey(&self) -> Option<Verkey>;
    fn get_their_endpoint(&self) -> Option<String>;
    fn get_their_label(&self) -> Option<String>;
    fn get_alias(&self) -> Option<String>;
    fn get_invitation_msg_id(&self) -> Option<ThreadID>;
    fn get_request_id(&self) -> Option<ThreadID>;
    fn get_accept(&self) -> Accept;
    fn get_metadata(&self, key: &str) -> Option<Value>;
    fn get_version(&self) -> u64;
    fn get_created_at(&self) -> DateTime<Utc>;
    fn get_updated_at(&self) -> DateTime<Utc>;
}

/// `WalletBuilder` abstracts the wallet capability: local DID management and
/// signing with a held private key. Key storage and the signing primitive
/// itself are outside this core
#[async_trait]
pub trait WalletBuilder: Send + Sync {
    async fn get_public_did(&self) -> Result<Option<DidInfo>, DidExchangeError>;
    async fn create_local_did(&self, seed: Option<Vec<u8>>) -> Result<DidInfo, DidExchangeError>;
    async fn get_local_did(&self, did: DidValue) -> Result<DidInfo, DidExchangeError>;

    /// Produce a raw Ed25519 signature over `message` with the private key
    /// behind `verkey`
    async fn sign(&self, verkey: Verkey, message: Vec<u8>) -> Result<Vec<u8>, DidExchangeError>;
}

/// `LedgerBuilder` is the narrow ledger-resolution capability this core
/// consumes: DID to key/endpoint lookup plus the public-DID posture check
///
/// Implementations own their own deadlines; the core imposes no timeout on
/// these calls, so an implementation that can hang must bound itself
#[async_trait]
pub trait LedgerBuilder: Send + Sync {
    async fn get_endpoint_for_did(
        &self,
        did: DidValue,
    ) -> Result<Option<String>, DidExchangeError>;
    async fn get_key_for_did(&self, did: DidValue) -> Result<Option<Verkey>, DidExchangeError>;
    async fn is_did_public(&self, did: DidValue) -> Result<bool, DidExchangeError>;
}

/// `RouteBuilder` abstracts mediation/routing: the routing keys and endpoint a
/// mediator contributes to our DID document, and the registration calls that
/// set up forwarding for a connection
#[async_trait]
pub trait RouteBuilder: Send + Sync {
    /// Resolve the routing keys and endpoint for the given mediation record,
    /// when one applies
    async fn routing_info(
        &self,
        mediation_id: Option<String>,
    ) -> Result<(Vec<Verkey>, Option<String>), DidExchangeError>;

    async fn mediation_record_for_connection(
        &self,
        connection_id: ConnectionID,
    ) -> Result<Option<String>, DidExchangeError>;

    async fn route_connection_as_invitee(
        &self,
        connection_id: ConnectionID,
        mediation_id: Option<String>,
    ) -> Result<(), DidExchangeError>;

    async fn route_connection_as_inviter(
        &self,
        connection_id: ConnectionID,
        mediation_id: Option<String>,
    ) -> Result<(), DidExchangeError>;
}

/// `ResponderBuilder` dispatches an outbound protocol message through the
/// transport layer. Fire-and-forget from the core's perspective
#[async_trait]
pub trait ResponderBuilder: Send + Sync {
    async fn send(
        &self,
        message: OutboundMessage,
        connection_id: ConnectionID,
    ) -> Result<(), DidExchangeError>;
}

/// `DiscoveryBuilder` triggers a proactive feature-discovery disclosure for a
/// freshly completed connection, when configured
#[async_trait]
pub trait DiscoveryBuilder: Send + Sync {
    async fn proactive_disclose(
        &self,
        connection_id: ConnectionID,
    ) -> Result<(), DidExchangeError>;
}

/// `RepoRecordBuilder` is the connection record repository abstraction,
/// implementing the repository pattern over whatever storage backend hosts
/// the records
///
/// Lookup must resolve a single record whether addressed by invitation key
/// (pre-request) or request thread id (post-request). `save` is expected to
/// reject a record whose version is stale against the stored one, which is
/// how concurrent duplicate deliveries of the same message are serialized
#[async_trait]
pub trait RepoRecordBuilder: Send + Sync {
    type EntityAccessor: RecordEntityAccessor;

    async fn save(&self, record: &Self::EntityAccessor) -> Result<(), DidExchangeError>;

    async fn get_record(
        &self,
        connection_id: ConnectionID,
    ) -> Result<Self::EntityAccessor, DidExchangeError>;

    async fn find_by_invitation_key(
        &self,
        invitation_key: Verkey,
    ) -> Result<Option<Self::EntityAccessor>, DidExchangeError>;

    async fn find_by_request_id(
        &self,
        request_id: ThreadID,
    ) -> Result<Option<Self::EntityAccessor>, DidExchangeError>;

    async fn find_by_their_did(
        &self,
        their_did: DidValue,
    ) -> Result<Vec<Self::EntityAccessor>, DidExchangeError>;
}

/// `DidExchangeAPI` is the main entrypoint to the DID-Exchange domain: the
/// protocol operations a transport/message-handling layer calls into
#[async_trait]
pub trait DidExchangeAPI {
    type EntityAccessor: RecordEntityAccessor;

    /// Materialize an `Invitation`-state record from a received out-of-band
    /// invitation, auto-advancing to `Request` when policy allows
    async fn receive_invitation(
        &self,
        invitation: Invitation,
        alias: Option<String>,
        auto_accept: Option<bool>,
        mediation_id: Option<String>,
    ) -> Result<Self::EntityAccessor, DidExchangeError>;

    /// First-contact request against a counterparty's public DID, with no
    /// prior invitation
    async fn create_request_implicit(
        &self,
        their_public_did: DidValue,
        my_label: Option<String>,
        my_endpoint: Option<String>,
        mediation_id: Option<String>,
        use_public_did: bool,
        alias: Option<String>,
        auto_accept: Option<bool>,
    ) -> Result<Self::EntityAccessor, DidExchangeError>;

    /// Build and record the signed handshake request for an existing
    /// `Invitation`-state record
    async fn create_request(
        &self,
        record: Self::EntityAccessor,
        my_label: Option<String>,
        my_endpoint: Option<String>,
        mediation_id: Option<String>,
        use_public_did: bool,
    ) -> Result<(Self::EntityAccessor, Request), DidExchangeError>;

    /// Process an inbound handshake request addressed to `recipient_verkey`
    /// (and, for implicit requests, `recipient_did`)
    async fn receive_request(
        &self,
        request: Request,
        recipient_did: Option<DidValue>,
        recipient_verkey: Verkey,
        my_endpoint: Option<String>,
        alias: Option<String>,
        auto_accept: Option<bool>,
    ) -> Result<Self::EntityAccessor, DidExchangeError>;

    /// Build and record the signed handshake response for a `Request`-state
    /// record
    async fn create_response(
        &self,
        record: Self::EntityAccessor,
        my_endpoint: Option<String>,
        mediation_id: Option<String>,
        use_public_did: bool,
    ) -> Result<(Self::EntityAccessor, Response), DidExchangeError>;

    /// Process the counterparty's handshake response, completing our side
    async fn accept_response(
        &self,
        response: Response,
        receipt: MessageReceipt,
    ) -> Result<Self::EntityAccessor, DidExchangeError>;

    /// Process the counterparty's complete message, completing our side
    async fn accept_complete(
        &self,
        complete: Complete,
        receipt: MessageReceipt,
    ) -> Result<Self::EntityAccessor, DidExchangeError>;

    /// Abandon a not-yet-completed connection, returning the problem report
    /// to send to the peer
    async fn reject(
        &self,
        record: Self::EntityAccessor,
        reason: String,
    ) -> Result<(Self::EntityAccessor, ProblemReport), DidExchangeError>;

    /// Process an inbound problem report, abandoning the record with the
    /// report's reason
    async fn receive_problem_report(
        &self,
        record: Self::EntityAccessor,
        report: ProblemReport,
    ) -> Result<Self::EntityAccessor, DidExchangeError>;
}

/// `UsecaseBuilder` is a trait behavior that exposes the collaborator
/// implementations behind a [`DidExchangeAPI`] implementation
pub trait UsecaseBuilder<TEntityAccessor>: DidExchangeAPI<EntityAccessor = TEntityAccessor>
where
    TEntityAccessor: RecordEntityAccessor,
{
    type RepoImplementer: RepoRecordBuilder<EntityAccessor = TEntityAccessor>;
    type WalletImplementer: WalletBuilder;
    type LedgerImplementer: LedgerBuilder;
    type RouteImplementer: RouteBuilder;
    type ResponderImplementer: ResponderBuilder;
    type DiscoveryImplementer: DiscoveryBuilder;

    fn repo(&self) -> &Self::RepoImplementer;
    fn wallet(&self) -> &Self::WalletImplementer;
    fn ledger(&self) -> &Self::LedgerImplementer;
    fn route(&self) -> &Self::RouteImplementer;
    fn responder(&self) -> &Self::ResponderImplementer;
    fn discovery(&self) -> &Self::DiscoveryImplementer;
}
