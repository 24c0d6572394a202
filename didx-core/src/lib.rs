//! `didx-core` holds the core business logic of the DID-Exchange pairwise
//! connection protocol, following the framework of `SSI (Self Sovereign
//! Identity)` based on `DID Framework`
//!
//! The crate models the handshake between two agents, `Alice` and `Bob`.
//! `Alice` wants to connect to `Bob`, so she takes an invitation `Bob`
//! published (or his public DID) and sends a connection request through her
//! agent to his. `Bob` is able to decide to reject or approve the request;
//! once he responds and `Alice` acknowledges with a complete message, both
//! sides hold each other's DID, verification key and endpoint, and the
//! connection is established.
//!
//! This crate is the domain layer only: it defines the entities, wire
//! messages and protocol operations, and declares the collaborator traits
//! (storage, wallet, ledger, routing, transport) that a host agent must
//! implement around it.
pub mod didexchange;
