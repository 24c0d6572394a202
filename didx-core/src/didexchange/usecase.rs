//! DID-Exchange protocol manager.
//!
//! [`Usecase`] implements [`DidExchangeAPI`] over the collaborator traits from
//! [`super::types`]: the record repository, the wallet, the ledger resolver,
//! the mediation router, the outbound responder and feature discovery. Each
//! operation loads or receives a record, validates the inbound message against
//! it, mutates the entity and persists it with a single `save`.
//!
//! Concurrency is optimistic: handlers never lock. A concurrent duplicate of
//! the same message loses the `save` race on the record's version counter and
//! surfaces a storage error to its caller; the winner's effect stands.

use rst_common::standard::async_trait::async_trait;
use rst_common::standard::serde_json::Value;
use rst_common::with_tracing::tracing;

use super::attachment::SignedAttachment;
use super::diddoc::DidDocument;
use super::message::{
    Complete, Invitation, MessageReceipt, OutboundMessage, ProblemReport, Request, Response,
    Thread,
};
use super::record::{ConnectionRecord, METADATA_IMPLICIT_INVITATION, METADATA_ROUTING_KEYS};
use super::types::{
    Accept, DidExchangeAPI, DidExchangeConfig, DidExchangeError, DidInfo, DidValue,
    DiscoveryBuilder, LedgerBuilder, ProblemReportReason, RecordEntityAccessor, RepoRecordBuilder,
    ResponderBuilder, Role, RouteBuilder, State, UsecaseBuilder, Verkey, WalletBuilder,
};

/// `Usecase` glues the DID-Exchange operations to their collaborator
/// implementations
///
/// All policy comes in through [`DidExchangeConfig`] at construction; the
/// operations themselves read no ambient settings
#[derive(Clone)]
pub struct Usecase<TRepo, TWallet, TLedger, TRoute, TResponder, TDiscovery>
where
    TRepo: RepoRecordBuilder<EntityAccessor = ConnectionRecord>,
    TWallet: WalletBuilder,
    TLedger: LedgerBuilder,
    TRoute: RouteBuilder,
    TResponder: ResponderBuilder,
    TDiscovery: DiscoveryBuilder,
{
    config: DidExchangeConfig,
    repo: TRepo,
    wallet: TWallet,
    ledger: TLedger,
    route: TRoute,
    responder: TResponder,
    discovery: TDiscovery,
}

impl<TRepo, TWallet, TLedger, TRoute, TResponder, TDiscovery>
    Usecase<TRepo, TWallet, TLedger, TRoute, TResponder, TDiscovery>
where
    TRepo: RepoRecordBuilder<EntityAccessor = ConnectionRecord>,
    TWallet: WalletBuilder,
    TLedger: LedgerBuilder,
    TRoute: RouteBuilder,
    TResponder: ResponderBuilder,
    TDiscovery: DiscoveryBuilder,
{
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: DidExchangeConfig,
        repo: TRepo,
        wallet: TWallet,
        ledger: TLedger,
        route: TRoute,
        responder: TResponder,
        discovery: TDiscovery,
    ) -> Self {
        Self {
            config,
            repo,
            wallet,
            ledger,
            route,
            responder,
            discovery,
        }
    }

    fn resolve_accept(&self, auto_accept: Option<bool>) -> Accept {
        match auto_accept {
            Some(true) => Accept::Auto,
            Some(false) => Accept::Manual,
            None => self.config.auto_accept,
        }
    }

    /// Endpoint precedence: mediator, then the per-call override, then the
    /// configured default
    fn resolve_endpoint(&self, mediator: Option<String>, per_call: Option<String>) -> String {
        mediator
            .or(per_call)
            .unwrap_or_else(|| self.config.my_endpoint.clone())
    }

    /// The DID this side uses for a connection: the configured public DID
    /// when asked for, otherwise the record's existing local DID or a freshly
    /// generated one
    async fn assign_my_did(
        &self,
        record: &ConnectionRecord,
        use_public_did: bool,
    ) -> Result<DidInfo, DidExchangeError> {
        if use_public_did {
            return self
                .wallet
                .get_public_did()
                .await?
                .ok_or(DidExchangeError::MissingPublicDid);
        }

        match record.get_my_did() {
            Some(did) => self.wallet.get_local_did(did).await,
            None => self.wallet.create_local_did(None).await,
        }
    }

    async fn build_signed_doc(
        &self,
        info: &DidInfo,
        endpoint: String,
        routing_keys: Vec<Verkey>,
        signer: Verkey,
    ) -> Result<SignedAttachment, DidExchangeError> {
        let doc = DidDocument::builder()
            .with_did(info.did.clone())
            .with_endpoint(endpoint)
            .with_recipient_key(info.verkey.clone())
            .with_routing_keys(routing_keys)
            .build()?;

        SignedAttachment::sign(&doc, signer, &self.wallet).await
    }

    /// Apply the counterparty identity asserted by an inbound request or
    /// response to the record
    ///
    /// A signed attachment is authoritative once verified; a bare DID is only
    /// trusted after the ledger confirms it is public and resolves its key
    async fn apply_their_identity(
        &self,
        record: &mut ConnectionRecord,
        did: DidValue,
        attach: Option<&SignedAttachment>,
        expected_signer: Option<&Verkey>,
    ) -> Result<(), DidExchangeError> {
        match attach {
            Some(attach) => {
                let doc = attach.verify(expected_signer)?;
                if doc.get_id() != did.as_str() {
                    return Err(DidExchangeError::DidMismatch {
                        expected: did.as_str().to_string(),
                        found: doc.get_id().to_string(),
                    });
                }

                record.set_their_did(did);
                if let Some(verkey) = doc.first_recipient_key() {
                    record.set_their_verkey(verkey);
                }
                if let Some(endpoint) = doc.service_endpoint() {
                    record.set_their_endpoint(endpoint);
                }
            }
            None => {
                let anchored = self.ledger.is_did_public(did.clone()).await?;
                if !anchored {
                    return Err(DidExchangeError::ResolverError(format!(
                        "DID {} carries no DID document and is not public",
                        did.as_str()
                    )));
                }

                let verkey = self
                    .ledger
                    .get_key_for_did(did.clone())
                    .await?
                    .ok_or_else(|| {
                        DidExchangeError::ResolverError(format!(
                            "no key found for DID {}",
                            did.as_str()
                        ))
                    })?;
                let endpoint = self.ledger.get_endpoint_for_did(did.clone()).await?;

                record.set_their_did(did);
                record.set_their_verkey(verkey);
                if let Some(endpoint) = endpoint {
                    record.set_their_endpoint(endpoint);
                }
            }
        }

        Ok(())
    }
}

impl<TRepo, TWallet, TLedger, TRoute, TResponder, TDiscovery> UsecaseBuilder<ConnectionRecord>
    for Usecase<TRepo, TWallet, TLedger, TRoute, TResponder, TDiscovery>
where
    TRepo: RepoRecordBuilder<EntityAccessor = ConnectionRecord>,
    TWallet: WalletBuilder,
    TLedger: LedgerBuilder,
    TRoute: RouteBuilder,
    TResponder: ResponderBuilder,
    TDiscovery: DiscoveryBuilder,
{
    type RepoImplementer = TRepo;
    type WalletImplementer = TWallet;
    type LedgerImplementer = TLedger;
    type RouteImplementer = TRoute;
    type ResponderImplementer = TResponder;
    type DiscoveryImplementer = TDiscovery;

    fn repo(&self) -> &Self::RepoImplementer {
        &self.repo
    }

    fn wallet(&self) -> &Self::WalletImplementer {
        &self.wallet
    }

    fn ledger(&self) -> &Self::LedgerImplementer {
        &self.ledger
    }

    fn route(&self) -> &Self::RouteImplementer {
        &self.route
    }

    fn responder(&self) -> &Self::ResponderImplementer {
        &self.responder
    }

    fn discovery(&self) -> &Self::DiscoveryImplementer {
        &self.discovery
    }
}

#[async_trait]
impl<TRepo, TWallet, TLedger, TRoute, TResponder, TDiscovery> DidExchangeAPI
    for Usecase<TRepo, TWallet, TLedger, TRoute, TResponder, TDiscovery>
where
    TRepo: RepoRecordBuilder<EntityAccessor = ConnectionRecord>,
    TWallet: WalletBuilder,
    TLedger: LedgerBuilder,
    TRoute: RouteBuilder,
    TResponder: ResponderBuilder,
    TDiscovery: DiscoveryBuilder,
{
    type EntityAccessor = ConnectionRecord;

    async fn receive_invitation(
        &self,
        invitation: Invitation,
        alias: Option<String>,
        auto_accept: Option<bool>,
        mediation_id: Option<String>,
    ) -> Result<ConnectionRecord, DidExchangeError> {
        if !invitation.has_usable_service() {
            return Err(DidExchangeError::InvalidInvitation(
                "invitation carries no usable service".to_string(),
            ));
        }

        let accept = self.resolve_accept(auto_accept);

        // resolve the invitation key and endpoint: inline service first,
        // public-DID form through the ledger
        let (invitation_key, their_endpoint, their_did) = match invitation.get_did() {
            Some(did) => {
                let key = self
                    .ledger
                    .get_key_for_did(did.clone())
                    .await?
                    .ok_or_else(|| {
                        DidExchangeError::InvalidInvitation(format!(
                            "no key found for invitation DID {}",
                            did.as_str()
                        ))
                    })?;
                let endpoint = self
                    .ledger
                    .get_endpoint_for_did(did.clone())
                    .await?
                    .ok_or_else(|| {
                        DidExchangeError::InvalidInvitation(format!(
                            "no endpoint found for invitation DID {}",
                            did.as_str()
                        ))
                    })?;

                (key, endpoint, Some(did))
            }
            None => {
                let key = invitation.get_recipient_keys()[0].clone();
                let endpoint = invitation.get_service_endpoint().ok_or_else(|| {
                    DidExchangeError::InvalidInvitation(
                        "invitation carries no service endpoint".to_string(),
                    )
                })?;

                (key, endpoint, None)
            }
        };

        let mut builder = ConnectionRecord::builder()
            .with_role(Role::Requester)
            .with_state(State::Invitation)
            .with_invitation_key(invitation_key)
            .with_invitation_msg_id(invitation.get_id())
            .with_accept(accept);

        if let Some(label) = invitation.get_label() {
            builder = builder.with_their_label(label);
        }

        if let Some(alias) = alias {
            builder = builder.with_alias(alias);
        }

        if let Some(did) = their_did {
            builder = builder.with_their_did(did);
        }

        if !invitation.get_routing_keys().is_empty() {
            let keys = invitation
                .get_routing_keys()
                .iter()
                .map(|key| Value::String(key.as_str().to_string()))
                .collect();
            builder = builder.with_metadata(METADATA_ROUTING_KEYS, Value::Array(keys));
        }

        let mut record = builder.build()?;
        record.set_their_endpoint(their_endpoint);
        self.repo.save(&record).await?;

        tracing::info!(
            connection_id = record.get_connection_id().as_str(),
            "received out-of-band invitation"
        );

        if accept == Accept::Auto {
            let (record, request) = self
                .create_request(record, None, None, mediation_id, false)
                .await?;
            self.responder
                .send(
                    OutboundMessage::Request(request),
                    record.get_connection_id(),
                )
                .await?;
            return Ok(record);
        }

        Ok(record)
    }

    async fn create_request_implicit(
        &self,
        their_public_did: DidValue,
        my_label: Option<String>,
        my_endpoint: Option<String>,
        mediation_id: Option<String>,
        use_public_did: bool,
        alias: Option<String>,
        auto_accept: Option<bool>,
    ) -> Result<ConnectionRecord, DidExchangeError> {
        let public_info = self.wallet.get_public_did().await?;
        if let Some(info) = &public_info {
            if info.did == their_public_did {
                return Err(DidExchangeError::SelfConnection);
            }
        }

        if use_public_did && public_info.is_none() {
            return Err(DidExchangeError::MissingPublicDid);
        }

        let existing = self
            .repo
            .find_by_their_did(their_public_did.clone())
            .await?;
        if existing
            .iter()
            .any(|rec| matches!(rec.get_state(), State::Response | State::Completed))
        {
            return Err(DidExchangeError::ConnectionExists(
                their_public_did.as_str().to_string(),
            ));
        }

        let their_verkey = self
            .ledger
            .get_key_for_did(their_public_did.clone())
            .await?
            .ok_or_else(|| {
                DidExchangeError::ResolverError(format!(
                    "no key found for DID {}",
                    their_public_did.as_str()
                ))
            })?;
        let their_endpoint = self
            .ledger
            .get_endpoint_for_did(their_public_did.clone())
            .await?
            .ok_or_else(|| {
                DidExchangeError::ResolverError(format!(
                    "no endpoint found for DID {}",
                    their_public_did.as_str()
                ))
            })?;

        let mut builder = ConnectionRecord::builder()
            .with_role(Role::Requester)
            .with_state(State::Invitation)
            .with_their_did(their_public_did)
            .with_accept(self.resolve_accept(auto_accept))
            .with_metadata(METADATA_IMPLICIT_INVITATION, Value::Bool(true));

        if let Some(alias) = alias {
            builder = builder.with_alias(alias);
        }

        let mut record = builder.build()?;
        record.set_their_verkey(their_verkey);
        record.set_their_endpoint(their_endpoint);

        let (record, request) = self
            .create_request(record, my_label, my_endpoint, mediation_id, use_public_did)
            .await?;
        self.responder
            .send(
                OutboundMessage::Request(request),
                record.get_connection_id(),
            )
            .await?;

        tracing::info!(
            connection_id = record.get_connection_id().as_str(),
            "created implicit connection request"
        );

        Ok(record)
    }

    async fn create_request(
        &self,
        mut record: ConnectionRecord,
        my_label: Option<String>,
        my_endpoint: Option<String>,
        mediation_id: Option<String>,
        use_public_did: bool,
    ) -> Result<(ConnectionRecord, Request), DidExchangeError> {
        if record.get_state() != State::Invitation {
            return Err(DidExchangeError::InvalidState(
                "connection is not in invitation state".to_string(),
            ));
        }

        let (routing_keys, mediator_endpoint) =
            self.route.routing_info(mediation_id.clone()).await?;
        let endpoint = self.resolve_endpoint(mediator_endpoint, my_endpoint);

        let info = self.assign_my_did(&record, use_public_did).await?;
        record.set_my_did(info.did.clone());

        let label = my_label.unwrap_or_else(|| self.config.my_label.clone());
        let mut request = Request::new(label).with_did(info.did.clone());

        if !use_public_did {
            let attach = self
                .build_signed_doc(&info, endpoint, routing_keys, info.verkey.clone())
                .await?;
            request = request.with_did_doc_attach(attach);
        }

        if let Some(invitation_msg_id) = record.get_invitation_msg_id() {
            let thread = Thread::new(request.get_id()).with_pthid(invitation_msg_id);
            request = request.with_thread(thread);
        }

        record.set_request_id(request.get_id());
        record.update_state(State::Request)?;
        self.repo.save(&record).await?;

        self.route
            .route_connection_as_invitee(record.get_connection_id(), mediation_id)
            .await?;

        tracing::info!(
            connection_id = record.get_connection_id().as_str(),
            request_id = request.get_id().as_str(),
            "created connection request"
        );

        Ok((record, request))
    }

    async fn receive_request(
        &self,
        request: Request,
        recipient_did: Option<DidValue>,
        recipient_verkey: Verkey,
        my_endpoint: Option<String>,
        alias: Option<String>,
        auto_accept: Option<bool>,
    ) -> Result<ConnectionRecord, DidExchangeError> {
        // a redelivered request must not spawn a second record
        if let Some(existing) = self.repo.find_by_request_id(request.thread_id()).await? {
            tracing::info!(
                connection_id = existing.get_connection_id().as_str(),
                "ignoring duplicate connection request"
            );
            return Ok(existing);
        }

        let accept = self.resolve_accept(auto_accept);
        let mut record = match self
            .repo
            .find_by_invitation_key(recipient_verkey.clone())
            .await?
        {
            Some(record) => {
                if record.get_state() != State::Invitation {
                    return Err(DidExchangeError::InvalidState(
                        "invitation is no longer awaiting a request".to_string(),
                    ));
                }

                record
            }
            None => {
                // no invitation on file: only acceptable as an implicit
                // request against our public DID, when policy allows
                if !self.config.public_invites || !self.config.implicit_invites {
                    return Err(DidExchangeError::UnsolicitedNotAllowed);
                }

                let recipient_did =
                    recipient_did.ok_or(DidExchangeError::UnsolicitedNotAllowed)?;
                let info = match self.wallet.get_public_did().await? {
                    Some(info) if info.did == recipient_did => info,
                    _ => return Err(DidExchangeError::UnsolicitedNotAllowed),
                };

                ConnectionRecord::builder()
                    .with_role(Role::Responder)
                    .with_state(State::Invitation)
                    .with_invitation_key(info.verkey)
                    .with_metadata(METADATA_IMPLICIT_INVITATION, Value::Bool(true))
                    .build()?
            }
        };

        record.set_accept(accept);
        if let Some(alias) = alias {
            record.set_alias(alias);
        }

        let their_did = request.get_did().ok_or(DidExchangeError::NoDidInRequest)?;
        self.apply_their_identity(&mut record, their_did, request.get_did_doc_attach(), None)
            .await?;

        record.set_their_label(request.get_label().to_string());
        record.set_request_id(request.thread_id());
        record.update_state(State::Request)?;
        self.repo.save(&record).await?;

        tracing::info!(
            connection_id = record.get_connection_id().as_str(),
            "received connection request"
        );

        if accept == Accept::Auto {
            let mediation_id = self
                .route
                .mediation_record_for_connection(record.get_connection_id())
                .await?;
            let (record, response) = self
                .create_response(record, my_endpoint, mediation_id, false)
                .await?;
            self.responder
                .send(
                    OutboundMessage::Response(response),
                    record.get_connection_id(),
                )
                .await?;
            return Ok(record);
        }

        Ok(record)
    }

    async fn create_response(
        &self,
        mut record: ConnectionRecord,
        my_endpoint: Option<String>,
        mediation_id: Option<String>,
        use_public_did: bool,
    ) -> Result<(ConnectionRecord, Response), DidExchangeError> {
        if record.get_role() != Role::Responder {
            return Err(DidExchangeError::InvalidState(
                "only the responder side can create a response".to_string(),
            ));
        }

        if record.get_state() != State::Request {
            return Err(DidExchangeError::InvalidState(
                "connection is not in request state".to_string(),
            ));
        }

        let request_id = record.get_request_id().ok_or_else(|| {
            DidExchangeError::EntityError("record has no request thread".to_string())
        })?;

        let (routing_keys, mediator_endpoint) =
            self.route.routing_info(mediation_id.clone()).await?;
        let endpoint = self.resolve_endpoint(mediator_endpoint, my_endpoint);

        let info = self.assign_my_did(&record, use_public_did).await?;
        record.set_my_did(info.did.clone());

        let mut thread = Thread::new(request_id);
        if let Some(invitation_msg_id) = record.get_invitation_msg_id() {
            thread = thread.with_pthid(invitation_msg_id);
        }

        let mut response = Response::new(thread).with_did(info.did.clone());

        if !use_public_did {
            // the response attachment must be signed with the invitation key
            // so the requester can tie it back to the invitation
            let signer = record.get_invitation_key().ok_or_else(|| {
                DidExchangeError::EntityError("record has no invitation key".to_string())
            })?;
            let attach = self
                .build_signed_doc(&info, endpoint, routing_keys, signer)
                .await?;
            response = response.with_did_doc_attach(attach);
        }

        record.update_state(State::Response)?;
        self.repo.save(&record).await?;

        self.route
            .route_connection_as_inviter(record.get_connection_id(), mediation_id)
            .await?;

        tracing::info!(
            connection_id = record.get_connection_id().as_str(),
            "created connection response"
        );

        Ok((record, response))
    }

    async fn accept_response(
        &self,
        response: Response,
        receipt: MessageReceipt,
    ) -> Result<ConnectionRecord, DidExchangeError> {
        let thid = response.get_thread().get_thid();
        let record = match self.repo.find_by_request_id(thid.clone()).await? {
            Some(record) => Some(record),
            None => match &receipt.sender_did {
                Some(sender) => self
                    .repo
                    .find_by_their_did(sender.clone())
                    .await?
                    .into_iter()
                    .next(),
                None => None,
            },
        };

        let mut record = record.ok_or_else(|| {
            DidExchangeError::RecordNotFound(
                "no corresponding connection request found".to_string(),
            )
        })?;

        if record.get_state() == State::Completed {
            tracing::info!(
                connection_id = record.get_connection_id().as_str(),
                "ignoring duplicate connection response"
            );
            return Ok(record);
        }

        if record.get_state() != State::Request {
            return Err(DidExchangeError::InvalidState(
                "connection is not in request state".to_string(),
            ));
        }

        let invitation_key = record.get_invitation_key();
        match (response.get_did_doc_attach(), response.get_did()) {
            (Some(attach), did) => {
                let did = did.ok_or(DidExchangeError::NoDidInResponse)?;
                self.apply_their_identity(
                    &mut record,
                    did,
                    Some(attach),
                    invitation_key.as_ref(),
                )
                .await?;
            }
            (None, Some(did)) => {
                self.apply_their_identity(&mut record, did, None, None)
                    .await?;
            }
            (None, None) => return Err(DidExchangeError::NoDidInResponse),
        }

        record.update_state(State::Completed)?;
        self.repo.save(&record).await?;

        let mut thread = Thread::new(thid);
        if let Some(invitation_msg_id) = record.get_invitation_msg_id() {
            thread = thread.with_pthid(invitation_msg_id);
        }

        self.responder
            .send(
                OutboundMessage::Complete(Complete::new(thread)),
                record.get_connection_id(),
            )
            .await?;

        tracing::info!(
            connection_id = record.get_connection_id().as_str(),
            "connection completed"
        );

        if self.config.auto_disclose_features {
            if let Err(err) = self
                .discovery
                .proactive_disclose(record.get_connection_id())
                .await
            {
                // disclosure is best-effort and must not undo the handshake
                tracing::warn!(
                    connection_id = record.get_connection_id().as_str(),
                    error = %err,
                    "proactive feature disclosure failed"
                );
            }
        }

        Ok(record)
    }

    async fn accept_complete(
        &self,
        complete: Complete,
        _receipt: MessageReceipt,
    ) -> Result<ConnectionRecord, DidExchangeError> {
        let thid = complete.get_thread().get_thid();
        let mut record = self
            .repo
            .find_by_request_id(thid)
            .await?
            .ok_or_else(|| {
                DidExchangeError::RecordNotFound(
                    "no corresponding connection request found".to_string(),
                )
            })?;

        if record.get_state() == State::Completed {
            tracing::info!(
                connection_id = record.get_connection_id().as_str(),
                "ignoring duplicate complete message"
            );
            return Ok(record);
        }

        record.update_state(State::Completed)?;
        self.repo.save(&record).await?;

        tracing::info!(
            connection_id = record.get_connection_id().as_str(),
            "connection completed"
        );

        Ok(record)
    }

    async fn reject(
        &self,
        mut record: ConnectionRecord,
        reason: String,
    ) -> Result<(ConnectionRecord, ProblemReport), DidExchangeError> {
        let code = match record.get_state() {
            State::Invitation => ProblemReportReason::InvitationNotAccepted,
            State::Request => ProblemReportReason::RequestNotAccepted,
            state => {
                return Err(DidExchangeError::InvalidState(format!(
                    "cannot reject connection in {} state",
                    state.as_str()
                )))
            }
        };

        record.abandon(&reason)?;
        self.repo.save(&record).await?;

        let thread = record.get_request_id().map(Thread::new);
        let report = ProblemReport::new(code, reason, thread);

        tracing::info!(
            connection_id = record.get_connection_id().as_str(),
            code = code.as_code(),
            "connection rejected"
        );

        Ok((record, report))
    }

    async fn receive_problem_report(
        &self,
        mut record: ConnectionRecord,
        report: ProblemReport,
    ) -> Result<ConnectionRecord, DidExchangeError> {
        let description = report
            .get_description()
            .ok_or(DidExchangeError::MissingDescription)?;
        let code = description
            .code
            .clone()
            .ok_or(DidExchangeError::MissingDescription)?;

        let reason = ProblemReportReason::from_code(&code)
            .ok_or(DidExchangeError::UnrecognizedCode(code))?;

        let explain = description
            .en
            .clone()
            .unwrap_or_else(|| reason.as_code().to_string());

        record.abandon(&explain)?;
        self.repo.save(&record).await?;

        tracing::info!(
            connection_id = record.get_connection_id().as_str(),
            code = reason.as_code(),
            "connection abandoned by problem report"
        );

        Ok(record)
    }
}
