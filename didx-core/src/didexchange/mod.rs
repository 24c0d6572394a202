//! # DID-Exchange Module
//!
//! The `didexchange` module implements the pairwise connection handshake: two
//! agents exchange DIDs and DID documents to establish a mutually
//! authenticated connection, starting from an out-of-band invitation or
//! directly against a public DID.
//!
//! ## Module Structure
//!
//! - [`types`] - Core data types, identifiers, collaborator traits and the
//!   [`types::DidExchangeAPI`] entrypoint
//! - [`record`] - The connection record entity with its state machine
//! - [`message`] - Wire messages (`Request`, `Response`, `Complete`,
//!   `ProblemReport`) and the out-of-band `Invitation`
//! - [`diddoc`] - The legacy-format DID document and its builder
//! - [`attachment`] - The signed DID document envelope
//! - [`usecase`] - The protocol manager tying the operations to their
//!   collaborators
//!
//! ## Connection Workflow
//!
//! ### 1. **Invitation** (`receive_invitation`)
//! ```text
//! Alice receives Bob's out-of-band invitation
//! ├── Validates the invitation carries a usable service
//! ├── Saves a Requester record in Invitation state
//! └── Auto-advances to the request when policy allows
//! ```
//!
//! ### 2. **Request** (`create_request` / `receive_request`)
//! ```text
//! Alice sends a connection request
//! ├── Generates a local DID (or reuses the public one)
//! ├── Attaches her DID document, signed with the fresh key
//! ├── Threads the request to the invitation (pthid)
//! └── Record moves to Request state
//!
//! Bob receives the request
//! ├── Locates the invitation by the recipient verkey
//! ├── Verifies the attached DID document signature
//! ├── Records Alice's DID, verkey and endpoint
//! └── Record moves to Request state
//! ```
//!
//! ### 3. **Response** (`create_response` / `accept_response`)
//! ```text
//! Bob answers with a connection response
//! ├── Signs his DID document with the invitation key
//! ├── Threads the response to the request (thid)
//! └── Record moves to Response state
//!
//! Alice accepts the response
//! ├── Verifies the attachment against the stored invitation key
//! ├── Records Bob's connection DID, verkey and endpoint
//! ├── Sends the complete message
//! └── Record moves to Completed state
//! ```
//!
//! ### 4. **Complete** (`accept_complete`)
//! ```text
//! Bob receives the complete message
//! └── Record moves to Completed state; the connection is established
//! ```
//!
//! Either side may abandon a not-yet-completed exchange through `reject`,
//! which emits a problem report; `receive_problem_report` applies the
//! counterparty's abandonment locally.
//!
//! ## Integration Points
//!
//! The manager is generic over six collaborator traits from [`types`]: the
//! record repository, the wallet, the ledger resolver, the mediation router,
//! the outbound responder and feature discovery. Implementations live outside
//! this crate; everything here is transport- and storage-agnostic.

pub mod attachment;
pub mod diddoc;
pub mod message;
pub mod record;
pub mod types;
pub mod usecase;
