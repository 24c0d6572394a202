//! DID-Exchange wire messages.
//!
//! Four protocol messages travel between the two agents: `Request`,
//! `Response`, `Complete` and `ProblemReport`, threaded together through the
//! decorator fields of [`Thread`]. The out-of-band [`Invitation`] precedes the
//! protocol proper and is consumed, never produced, by this domain.
//!
//! Field names follow the DIDComm v1 conventions (`@type`, `@id`, `~thread`,
//! `did_doc~attach`); everything here is plain data with no behavior beyond
//! construction and serialization.

use rst_common::standard::serde::{self, Deserialize, Serialize};
use rst_common::standard::serde_json;

use rstdev_domain::entity::ToJSON;
use rstdev_domain::BaseError;

use super::attachment::SignedAttachment;
use super::types::{DidValue, ProblemReportReason, ThreadID, Verkey};

pub const MSG_TYPE_REQUEST: &str = "https://didcomm.org/didexchange/1.0/request";
pub const MSG_TYPE_RESPONSE: &str = "https://didcomm.org/didexchange/1.0/response";
pub const MSG_TYPE_COMPLETE: &str = "https://didcomm.org/didexchange/1.0/complete";
pub const MSG_TYPE_PROBLEM_REPORT: &str = "https://didcomm.org/didexchange/1.0/problem_report";
pub const MSG_TYPE_INVITATION: &str = "https://didcomm.org/out-of-band/1.1/invitation";

/// The `~thread` decorator correlating a message with the request that opened
/// the exchange (`thid`) and, for invited connections, the invitation that
/// preceded it (`pthid`)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(crate = "self::serde")]
pub struct Thread {
    thid: ThreadID,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pthid: Option<ThreadID>,
}

impl Thread {
    pub fn new(thid: ThreadID) -> Self {
        Self { thid, pthid: None }
    }

    pub fn with_pthid(mut self, pthid: ThreadID) -> Self {
        self.pthid = Some(pthid);
        self
    }

    pub fn get_thid(&self) -> ThreadID {
        self.thid.clone()
    }

    pub fn get_pthid(&self) -> Option<ThreadID> {
        self.pthid.clone()
    }
}

/// The handshake request sent by the requester
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(crate = "self::serde")]
pub struct Request {
    #[serde(rename = "@type")]
    msg_type: String,

    #[serde(rename = "@id")]
    id: ThreadID,

    #[serde(rename = "~thread", default, skip_serializing_if = "Option::is_none")]
    thread: Option<Thread>,

    label: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    did: Option<DidValue>,

    #[serde(
        rename = "did_doc~attach",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    did_doc_attach: Option<SignedAttachment>,
}

impl Request {
    pub fn new(label: String) -> Self {
        Self {
            msg_type: MSG_TYPE_REQUEST.to_string(),
            id: ThreadID::generate(),
            thread: None,
            label,
            did: None,
            did_doc_attach: None,
        }
    }

    pub fn with_thread(mut self, thread: Thread) -> Self {
        self.thread = Some(thread);
        self
    }

    pub fn with_did(mut self, did: DidValue) -> Self {
        self.did = Some(did);
        self
    }

    pub fn with_did_doc_attach(mut self, attach: SignedAttachment) -> Self {
        self.did_doc_attach = Some(attach);
        self
    }

    pub fn get_id(&self) -> ThreadID {
        self.id.clone()
    }

    pub fn get_thread(&self) -> Option<Thread> {
        self.thread.clone()
    }

    /// The thread id a responder files this request under: the explicit
    /// `thid` when threaded, the message id otherwise
    pub fn thread_id(&self) -> ThreadID {
        self.thread
            .as_ref()
            .map(|thread| thread.get_thid())
            .unwrap_or_else(|| self.id.clone())
    }

    pub fn get_label(&self) -> &str {
        &self.label
    }

    pub fn get_did(&self) -> Option<DidValue> {
        self.did.clone()
    }

    pub fn get_did_doc_attach(&self) -> Option<&SignedAttachment> {
        self.did_doc_attach.as_ref()
    }
}

impl ToJSON for Request {
    fn to_json(&self) -> Result<String, BaseError> {
        serde_json::to_string(self).map_err(|err| BaseError::ToJSONError(err.to_string()))
    }
}

/// The handshake response sent by the responder, threaded to the request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(crate = "self::serde")]
pub struct Response {
    #[serde(rename = "@type")]
    msg_type: String,

    #[serde(rename = "@id")]
    id: ThreadID,

    #[serde(rename = "~thread")]
    thread: Thread,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    did: Option<DidValue>,

    #[serde(
        rename = "did_doc~attach",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    did_doc_attach: Option<SignedAttachment>,
}

impl Response {
    pub fn new(thread: Thread) -> Self {
        Self {
            msg_type: MSG_TYPE_RESPONSE.to_string(),
            id: ThreadID::generate(),
            thread,
            did: None,
            did_doc_attach: None,
        }
    }

    pub fn with_did(mut self, did: DidValue) -> Self {
        self.did = Some(did);
        self
    }

    pub fn with_did_doc_attach(mut self, attach: SignedAttachment) -> Self {
        self.did_doc_attach = Some(attach);
        self
    }

    pub fn get_id(&self) -> ThreadID {
        self.id.clone()
    }

    pub fn get_thread(&self) -> &Thread {
        &self.thread
    }

    pub fn get_did(&self) -> Option<DidValue> {
        self.did.clone()
    }

    pub fn get_did_doc_attach(&self) -> Option<&SignedAttachment> {
        self.did_doc_attach.as_ref()
    }
}

impl ToJSON for Response {
    fn to_json(&self) -> Result<String, BaseError> {
        serde_json::to_string(self).map_err(|err| BaseError::ToJSONError(err.to_string()))
    }
}

/// The requester's acknowledgement that closes the handshake
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(crate = "self::serde")]
pub struct Complete {
    #[serde(rename = "@type")]
    msg_type: String,

    #[serde(rename = "@id")]
    id: ThreadID,

    #[serde(rename = "~thread")]
    thread: Thread,
}

impl Complete {
    pub fn new(thread: Thread) -> Self {
        Self {
            msg_type: MSG_TYPE_COMPLETE.to_string(),
            id: ThreadID::generate(),
            thread,
        }
    }

    pub fn get_id(&self) -> ThreadID {
        self.id.clone()
    }

    pub fn get_thread(&self) -> &Thread {
        &self.thread
    }
}

impl ToJSON for Complete {
    fn to_json(&self) -> Result<String, BaseError> {
        serde_json::to_string(self).map_err(|err| BaseError::ToJSONError(err.to_string()))
    }
}

/// Human- and machine-readable problem description carried by a
/// [`ProblemReport`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(crate = "self::serde")]
pub struct Description {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub en: Option<String>,
}

/// A report that one side has abandoned the exchange and why
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(crate = "self::serde")]
pub struct ProblemReport {
    #[serde(rename = "@type")]
    msg_type: String,

    #[serde(rename = "@id")]
    id: ThreadID,

    #[serde(rename = "~thread", default, skip_serializing_if = "Option::is_none")]
    thread: Option<Thread>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    description: Option<Description>,
}

impl ProblemReport {
    pub fn new(reason: ProblemReportReason, explain: String, thread: Option<Thread>) -> Self {
        Self {
            msg_type: MSG_TYPE_PROBLEM_REPORT.to_string(),
            id: ThreadID::generate(),
            thread,
            description: Some(Description {
                code: Some(reason.as_code().to_string()),
                en: Some(explain),
            }),
        }
    }

    /// A report exactly as it arrived off the wire, description and all
    pub fn from_description(description: Option<Description>, thread: Option<Thread>) -> Self {
        Self {
            msg_type: MSG_TYPE_PROBLEM_REPORT.to_string(),
            id: ThreadID::generate(),
            thread,
            description,
        }
    }

    pub fn get_id(&self) -> ThreadID {
        self.id.clone()
    }

    pub fn get_thread(&self) -> Option<Thread> {
        self.thread.clone()
    }

    pub fn get_description(&self) -> Option<&Description> {
        self.description.as_ref()
    }
}

impl ToJSON for ProblemReport {
    fn to_json(&self) -> Result<String, BaseError> {
        serde_json::to_string(self).map_err(|err| BaseError::ToJSONError(err.to_string()))
    }
}

/// An out-of-band invitation as received from a counterparty
///
/// Two forms are usable: an inline service (recipient keys plus endpoint,
/// with optional routing keys) or a public DID the service is resolved from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(crate = "self::serde")]
pub struct Invitation {
    #[serde(rename = "@type")]
    msg_type: String,

    #[serde(rename = "@id")]
    id: ThreadID,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    label: Option<String>,

    #[serde(
        rename = "recipientKeys",
        default,
        skip_serializing_if = "Vec::is_empty"
    )]
    recipient_keys: Vec<Verkey>,

    #[serde(rename = "routingKeys", default, skip_serializing_if = "Vec::is_empty")]
    routing_keys: Vec<Verkey>,

    #[serde(
        rename = "serviceEndpoint",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    service_endpoint: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    did: Option<DidValue>,
}

impl Invitation {
    /// An invitation carrying an inline service definition
    pub fn new_inline(
        label: Option<String>,
        recipient_keys: Vec<Verkey>,
        service_endpoint: String,
    ) -> Self {
        Self {
            msg_type: MSG_TYPE_INVITATION.to_string(),
            id: ThreadID::generate(),
            label,
            recipient_keys,
            routing_keys: Vec::new(),
            service_endpoint: Some(service_endpoint),
            did: None,
        }
    }

    /// An invitation referencing a public DID whose service the invitee
    /// resolves itself
    pub fn new_public(label: Option<String>, did: DidValue) -> Self {
        Self {
            msg_type: MSG_TYPE_INVITATION.to_string(),
            id: ThreadID::generate(),
            label,
            recipient_keys: Vec::new(),
            routing_keys: Vec::new(),
            service_endpoint: None,
            did: Some(did),
        }
    }

    pub fn with_routing_keys(mut self, keys: Vec<Verkey>) -> Self {
        self.routing_keys = keys;
        self
    }

    pub fn get_id(&self) -> ThreadID {
        self.id.clone()
    }

    pub fn get_label(&self) -> Option<String> {
        self.label.clone()
    }

    pub fn get_recipient_keys(&self) -> &[Verkey] {
        &self.recipient_keys
    }

    pub fn get_routing_keys(&self) -> &[Verkey] {
        &self.routing_keys
    }

    pub fn get_service_endpoint(&self) -> Option<String> {
        self.service_endpoint.clone()
    }

    pub fn get_did(&self) -> Option<DidValue> {
        self.did.clone()
    }

    /// An invitation is actionable when it carries either a complete inline
    /// service or a public DID
    pub fn has_usable_service(&self) -> bool {
        self.did.is_some() || (!self.recipient_keys.is_empty() && self.service_endpoint.is_some())
    }
}

impl ToJSON for Invitation {
    fn to_json(&self) -> Result<String, BaseError> {
        serde_json::to_string(self).map_err(|err| BaseError::ToJSONError(err.to_string()))
    }
}

/// `OutboundMessage` is the closed set of protocol messages the core hands to
/// the responder collaborator for delivery
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(crate = "self::serde")]
#[serde(untagged)]
pub enum OutboundMessage {
    Request(Request),
    Response(Response),
    Complete(Complete),
    ProblemReport(ProblemReport),
}

/// Delivery context attached to an inbound message by the transport layer
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MessageReceipt {
    pub sender_did: Option<DidValue>,
    pub recipient_did: Option<DidValue>,
    pub recipient_verkey: Option<Verkey>,
}
