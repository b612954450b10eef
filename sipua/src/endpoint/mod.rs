//! SIP Endpoint.
//!
//! The endpoint ties the layers together: it owns the transport
//! multiplexer, the transaction and dialog registries, the shared timer
//! wheel, and the AOR registry routing out-of-dialog requests to
//! [`Party`](crate::Party) handles.

pub mod builder;

pub use builder::Builder;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock, Weak};

use sipua_util::DnsResolver;

use crate::dialog::{DialogKey, DialogLayer};
use crate::error::Result;
use crate::headers::Headers;
use crate::message::{SipMethod, StatusCode};
use crate::scheduler::TimerWheel;
use crate::transaction::{
    InvServerTransaction, ServerTransaction, ServerTsx, State, TimerConfig, TransactionLayer, TsxKey,
};
use crate::transport::{IncomingRequest, IncomingResponse, TransportLayer};

struct Inner {
    /// The endpoint name, for logs.
    name: String,
    /// The transport layer.
    transport: TransportLayer,
    /// The transaction layer.
    transactions: TransactionLayer,
    /// The dialog layer.
    dialogs: DialogLayer,
    /// The shared retry scheduler.
    wheel: TimerWheel,
    /// Base timer values for transactions created here.
    timers: TimerConfig,
    /// Lazy DNS resolver; only touched when a URI host needs
    /// resolution.
    resolver: OnceLock<DnsResolver>,
    /// Parties by address-of-record.
    parties: Mutex<HashMap<String, Weak<crate::party::PartyInner>>>,
}

/// The SIP endpoint.
///
/// One per process is typical, but nothing prevents several; every
/// Party receives its endpoint explicitly.
#[derive(Clone)]
pub struct Endpoint(Arc<Inner>);

impl Endpoint {
    /// Returns a builder to create an `Endpoint`.
    pub fn builder() -> Builder {
        Builder::default()
    }

    pub(crate) fn from_parts(name: String, timers: TimerConfig) -> Endpoint {
        let wheel = TimerWheel::new();
        let transport = TransportLayer::new(wheel.clone());

        let endpoint = Endpoint(Arc::new(Inner {
            name,
            transport,
            transactions: TransactionLayer::default(),
            dialogs: DialogLayer::default(),
            wheel,
            timers,
            resolver: OnceLock::new(),
            parties: Mutex::new(HashMap::new()),
        }));

        // The demultiplexer runs for the life of the endpoint.
        let demux = endpoint.clone();
        tokio::spawn(async move {
            if let Err(err) = demux.0.transport.handle_events(&demux).await {
                log::warn!("Transport demultiplexer stopped: {err}");
            }
        });

        endpoint
    }

    /// The endpoint name.
    pub fn name(&self) -> &str {
        &self.0.name
    }

    /// The base timer values transactions start from.
    pub fn timers(&self) -> TimerConfig {
        self.0.timers
    }

    /// How many inbound datagrams failed to parse.
    pub fn parse_failures(&self) -> usize {
        self.0.transport.parse_failure_count()
    }

    /// How many inbound responses matched no transaction or dialog.
    pub fn orphan_responses(&self) -> usize {
        self.0.transport.orphan_response_count()
    }

    pub(crate) fn transport(&self) -> &TransportLayer {
        &self.0.transport
    }

    pub(crate) fn transactions(&self) -> &TransactionLayer {
        &self.0.transactions
    }

    pub(crate) fn dialogs(&self) -> &DialogLayer {
        &self.0.dialogs
    }

    pub(crate) fn wheel(&self) -> &TimerWheel {
        &self.0.wheel
    }

    pub(crate) fn resolver(&self) -> &DnsResolver {
        self.0.resolver.get_or_init(DnsResolver::default)
    }

    pub(crate) fn register_party(&self, aor: &str, party: Weak<crate::party::PartyInner>) {
        log::debug!("Registered party {aor}");
        self.0.parties.lock().expect("Lock failed").insert(aor.to_owned(), party);
    }

    pub(crate) fn unregister_party(&self, aor: &str) {
        log::debug!("Unregistered party {aor}");
        self.0.parties.lock().expect("Lock failed").remove(aor);
    }

    pub(crate) fn find_party(&self, aor: &str) -> Option<Arc<crate::party::PartyInner>> {
        self.0
            .parties
            .lock()
            .expect("Lock failed")
            .get(aor)
            .and_then(Weak::upgrade)
    }

    /// Routes an inbound request.
    ///
    /// Order: existing transaction (retransmissions, ACK absorption),
    /// then CANCEL and ACK specials, then in-dialog requests by dialog
    /// id, then out-of-dialog requests by request-URI AOR.
    pub(crate) async fn process_request(&self, request: IncomingRequest<'_>) -> Result<()> {
        if self.0.transactions.handle_request(&request).await? {
            return Ok(());
        }

        let method = *request.method();

        match method {
            SipMethod::Cancel => self.on_cancel(request).await,
            SipMethod::Ack => {
                // An ACK for a 2xx: route to the dialog; the INVITE
                // server transaction is already gone.
                let to_tag = request.to().tag().map(str::to_owned);
                let from_tag = request.from().tag().map(str::to_owned);

                if let (Some(to_tag), Some(from_tag)) = (to_tag, from_tag) {
                    if let Some(dialog) = self
                        .0
                        .dialogs
                        .resolve_uas(request.call_id().as_str(), &to_tag, &from_tag)
                    {
                        dialog.on_ack(&request);
                        return Ok(());
                    }
                }

                log::debug!("Dropped ACK matching no dialog from /{}", request.addr());
                Ok(())
            }
            _ => {
                if let Some(to_tag) = request.to().tag().map(str::to_owned) {
                    // In-dialog request: our tag is in To, the peer's in
                    // From.
                    let from_tag = request.from().tag().map(str::to_owned).unwrap_or_default();
                    match self.0.dialogs.resolve_uas(request.call_id().as_str(), &to_tag, &from_tag) {
                        Some(dialog) => dialog.recv_request(&request).await,
                        None => {
                            // RFC 3261 §12.2.2: no matching dialog, 481.
                            let code = StatusCode::CallOrTransactionDoesNotExist;
                            if request.is_method(&SipMethod::Invite) {
                                let tsx = InvServerTransaction::new(self, &request, self.0.timers, None);
                                tsx.respond(code, None, Headers::new(), None).await?;
                            } else {
                                let tsx = ServerTransaction::new(self, &request, self.0.timers, None);
                                tsx.respond(code, None, Headers::new(), None).await?;
                            }
                            Ok(())
                        }
                    }
                } else {
                    self.on_out_of_dialog(request).await
                }
            }
        }
    }

    async fn on_out_of_dialog(&self, request: IncomingRequest<'_>) -> Result<()> {
        let aor = request.request().req_line.uri.aor();

        match self.find_party(&aor) {
            Some(party) => crate::party::PartyInner::on_out_of_dialog_request(party, self, request).await,
            None => {
                log::debug!("No party registered for {aor}");
                if request.is_method(&SipMethod::Invite) {
                    let tsx = InvServerTransaction::new(self, &request, self.0.timers, None);
                    tsx.respond(StatusCode::NotFound, None, Headers::new(), None).await?;
                } else {
                    let tsx = ServerTransaction::new(self, &request, self.0.timers, None);
                    tsx.respond(StatusCode::NotFound, None, Headers::new(), None).await?;
                }
                Ok(())
            }
        }
    }

    /// CANCEL handling (RFC 3261 §9.2): the CANCEL gets its own
    /// transaction and a 200 regardless; when it matches an INVITE
    /// server transaction still in Proceeding, that INVITE is answered
    /// 487.
    async fn on_cancel(&self, request: IncomingRequest<'_>) -> Result<()> {
        let cancel_tsx = ServerTransaction::new(self, &request, self.0.timers, None);
        cancel_tsx.respond(StatusCode::Ok, None, Headers::new(), None).await?;

        let target_key = TsxKey::cancel_target(&request.request_headers);

        let Some(ServerTsx::Invite(invite_tsx)) = self.0.transactions.find_server(&target_key) else {
            log::debug!("CANCEL matched no INVITE transaction");
            return Ok(());
        };

        match invite_tsx.dialog_key() {
            Some(dialog_key) => {
                if let Some(dialog) = self.0.dialogs.find_sibling(&dialog_key) {
                    dialog.on_cancelled().await?;
                }
            }
            None => {
                if invite_tsx.state() == State::Proceeding {
                    invite_tsx
                        .respond(StatusCode::RequestTerminated, None, Headers::new(), None)
                        .await?;
                }
            }
        }

        Ok(())
    }

    /// Routes an inbound response. Returns `false` for orphans.
    pub(crate) async fn process_response(&self, response: IncomingResponse<'_>) -> Result<bool> {
        if self.0.transactions.handle_response(&response).await? {
            return Ok(true);
        }

        // A retransmitted 2xx whose INVITE transaction already
        // terminated: the dialog repeats the ACK.
        if response.code().is_success() && matches!(response.request_headers.cseq.method(), SipMethod::Invite) {
            let local_tag = response.request_headers.from.tag().map(str::to_owned);
            let remote_tag = response.request_headers.to.tag().map(str::to_owned);

            if let Some(local_tag) = local_tag {
                let key = DialogKey {
                    call_id: response.request_headers.call_id.as_str().into(),
                    local_tag: local_tag.as_str().into(),
                };

                if let Some(dialog) = self.0.dialogs.resolve_uac(&key, remote_tag.as_deref()) {
                    dialog.recv_invite_response(&response).await;
                    return Ok(true);
                }
            }
        }

        Ok(false)
    }
}
