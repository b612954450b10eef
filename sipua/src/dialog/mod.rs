//! SIP Dialog Layer (RFC 3261 §12).
//!
//! A dialog is the peer-to-peer relationship created by an INVITE and
//! its 2xx/ACK exchange, identified by (Call-ID, local tag, remote tag).
//! The dialog owns CSeq discipline in both directions, the route set,
//! and construction of every in-dialog request.
//!
//! ```text
//! UAC (Caller)                 UAS (Receiver)
//!     |--- INVITE ----------->|
//!     |<--- 180 Ringing ------|    // early dialog
//!     |<--- 200 OK -----------|    // dialog confirmed
//!     |--- ACK -------------->|
//!     |--- BYE -------------->|
//!     |<--- 200 OK -----------|    // dialog terminated
//! ```

mod invite;

pub(crate) use invite::DialogConfig;

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use bytes::Bytes;
use sipua_util::ArcStr;

use crate::error::{DialogError, Result, TransactionError};
use crate::fsm::{Fsm, ObservedFsm};
use crate::headers::{Allow, CallId, CSeq, Contact, ContentType, Header, Headers, MaxForwards, Route, To, Via};
use crate::message::{Host, Request, RequestLine, SipMethod, SipUri, StatusCode, Uri};
use crate::scheduler::TimerHandle;
use crate::transaction::{ClientTransaction, InvServerTransaction, Role, ServerTransaction, TimerConfig};
use crate::transport::{IncomingRequest, IncomingResponse, OutgoingRequest, Transport};
use crate::{Authenticator, Endpoint, SdpSession};

/// The dialog-identifying pair known before the remote tag is learned.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DialogKey {
    pub call_id: ArcStr,
    pub local_tag: ArcStr,
}

/// Unique identifier of a SIP dialog: Call-ID plus both tags. Early
/// dialogs carry an empty remote tag until the first tagged response.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DialogId {
    pub call_id: ArcStr,
    pub local_tag: ArcStr,
    pub remote_tag: ArcStr,
}

impl DialogId {
    pub fn key(&self) -> DialogKey {
        DialogKey {
            call_id: self.call_id.clone(),
            local_tag: self.local_tag.clone(),
        }
    }
}

impl std::fmt::Display for DialogId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.call_id, self.local_tag, self.remote_tag)
    }
}

/// The states a dialog passes through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DialogState {
    /// Created, no tagged response yet.
    Initial,
    /// A tagged provisional response was exchanged.
    Early,
    /// The 2xx/ACK exchange happened.
    Confirmed,
    /// Ended by BYE, CANCEL or a failure response.
    Terminated,
    /// Sink state: a lower layer failed; `last_error` says why.
    Error,
}

impl DialogState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, DialogState::Terminated | DialogState::Error)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum DialogInput {
    /// A tagged provisional response was sent or received.
    EarlyTagged,
    /// A 2xx was sent or received.
    Accept,
    /// A failure final was sent or received for the INVITE.
    Reject,
    /// A BYE was sent or received.
    Bye,
    /// A lower layer failed.
    Fail,
}

fn dialog_fsm() -> Fsm<DialogState, DialogInput, ()> {
    use DialogInput::*;
    use DialogState::*;

    Fsm::new(Initial)
        .route(Initial, EarlyTagged, Early, None)
        .route(Early, EarlyTagged, Early, None)
        .route(Initial, Accept, Confirmed, None)
        .route(Early, Accept, Confirmed, None)
        .route(Confirmed, Accept, Confirmed, None)
        .route(Initial, Reject, Terminated, None)
        .route(Early, Reject, Terminated, None)
        .route(Confirmed, Bye, Terminated, None)
        .route(Initial, Fail, Error, None)
        .route(Early, Fail, Error, None)
        .route(Confirmed, Fail, Error, None)
        .terminal(Terminated)
        .terminal(Error)
}

/// State of the dialog-owned 2xx retransmission (UAS side): the INVITE
/// server transaction dies on a 2xx, so the dialog repeats the response
/// until the ACK arrives.
pub(crate) struct PendingOk {
    pub buf: Bytes,
    pub addr: SocketAddr,
    pub interval: Duration,
    pub elapsed: Duration,
    pub timer: Option<TimerHandle>,
}

pub(crate) struct DialogInner {
    pub(crate) endpoint: Endpoint,
    pub(crate) role: Role,
    pub(crate) call_id: ArcStr,
    pub(crate) local_tag: ArcStr,
    pub(crate) remote_tag: Mutex<ArcStr>,
    pub(crate) fsm: ObservedFsm<DialogState, DialogInput, ()>,
    // Next CSeq to send; strictly monotonic per direction.
    pub(crate) local_seq: AtomicU32,
    // Highest CSeq received; 0 until the first in-dialog request.
    pub(crate) remote_seq: AtomicU32,
    pub(crate) local_uri: Uri<'static>,
    pub(crate) remote_uri: Uri<'static>,
    pub(crate) local_contact: Uri<'static>,
    pub(crate) remote_target: Mutex<Uri<'static>>,
    // Ordered route set; UAC stores Record-Routes reversed, UAS in
    // arrival order.
    pub(crate) route_set: Mutex<Vec<Uri<'static>>>,
    pub(crate) secure: bool,
    pub(crate) party: Mutex<Option<Weak<crate::party::PartyInner>>>,
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) timers: TimerConfig,
    pub(crate) max_forwards: u32,
    // The branch and CSeq of the pending INVITE, reused by CANCEL/ACK.
    pub(crate) invite_branch: Mutex<Option<String>>,
    pub(crate) invite_cseq: AtomicU32,
    pub(crate) uas_invite_tsx: Mutex<Option<InvServerTransaction>>,
    // The frozen ACK for the 2xx, repeated when the 2xx is
    // retransmitted.
    pub(crate) last_ack: Mutex<Option<Bytes>>,
    pub(crate) pending_ok: Mutex<Option<PendingOk>>,
    pub(crate) ack_received: AtomicBool,
    pub(crate) auth_retried: AtomicBool,
    pub(crate) sdp: Option<Arc<dyn SdpSession>>,
    pub(crate) authenticator: Option<Arc<dyn Authenticator>>,
    pub(crate) remote_offer: Mutex<Option<Bytes>>,
    pub(crate) last_error: Mutex<Option<DialogError>>,
}

/// A SIP dialog handle. Cheap to clone; all clones share state.
#[derive(Clone)]
pub struct Dialog {
    pub(crate) inner: Arc<DialogInner>,
}

impl Dialog {
    /// The dialog identifier. The remote tag is empty while the dialog
    /// is early.
    pub fn id(&self) -> DialogId {
        DialogId {
            call_id: self.inner.call_id.clone(),
            local_tag: self.inner.local_tag.clone(),
            remote_tag: self.inner.remote_tag.lock().expect("Lock failed").clone(),
        }
    }

    pub(crate) fn key(&self) -> DialogKey {
        DialogKey {
            call_id: self.inner.call_id.clone(),
            local_tag: self.inner.local_tag.clone(),
        }
    }

    /// The current dialog state.
    pub fn state(&self) -> DialogState {
        self.inner.fsm.state()
    }

    /// The role this side plays in the dialog.
    pub fn role(&self) -> Role {
        self.inner.role
    }

    /// The Call-ID of the dialog.
    pub fn call_id(&self) -> &ArcStr {
        &self.inner.call_id
    }

    /// Why the dialog entered [`DialogState::Error`], if it did.
    pub fn last_error(&self) -> Option<DialogError> {
        self.inner.last_error.lock().expect("Lock failed").clone()
    }

    /// Waits until the dialog state satisfies `predicate`, up to
    /// `deadline`. Holds no dialog lock while waiting.
    pub async fn wait_for_state<F>(&self, predicate: F, deadline: Duration) -> Option<DialogState>
    where
        F: FnMut(&DialogState) -> bool,
    {
        self.inner.fsm.wait_for_state(predicate, deadline).await
    }

    /// Ends the dialog. Asynchronous: the call returns after posting;
    /// completion is observed through the state reaching a terminal
    /// state.
    ///
    /// A confirmed dialog is ended with BYE, an early client dialog
    /// with CANCEL.
    pub fn terminate(&self) {
        let dialog = self.clone();
        tokio::spawn(async move {
            let result = match dialog.state() {
                DialogState::Confirmed => dialog.bye().await,
                DialogState::Early | DialogState::Initial if dialog.inner.role == Role::UAC => dialog.cancel().await,
                DialogState::Early | DialogState::Initial => dialog.reject(StatusCode::Decline).await,
                _ => Ok(()),
            };

            if let Err(err) = result {
                log::debug!("terminate() failed on {}: {}", dialog.id(), err);
            }
        });
    }

    /// Sends a BYE, terminating a confirmed dialog.
    pub async fn bye(&self) -> Result<()> {
        self.expect_state(DialogState::Confirmed, "Confirmed")?;

        let cseq = self.next_local_cseq();
        let request = self.new_in_dialog_request(SipMethod::Bye, cseq, crate::generate_branch());
        let outgoing = self.to_outgoing(request).await?;

        ClientTransaction::send(outgoing, &self.inner.endpoint, self.inner.timers, Some(self.key())).await?;

        // The session ends as soon as the BYE is passed down; the 200
        // merely completes the transaction.
        self.transition(DialogInput::Bye);
        Ok(())
    }

    /// Sends an in-dialog OPTIONS keep-alive query.
    pub async fn options(&self) -> Result<()> {
        self.expect_state(DialogState::Confirmed, "Confirmed")?;

        let cseq = self.next_local_cseq();
        let request = self.new_in_dialog_request(SipMethod::Options, cseq, crate::generate_branch());
        let outgoing = self.to_outgoing(request).await?;

        ClientTransaction::send(outgoing, &self.inner.endpoint, self.inner.timers, Some(self.key())).await?;
        Ok(())
    }

    pub(crate) fn expect_state(&self, expected: DialogState, name: &'static str) -> Result<()> {
        let actual = self.state();
        if actual != expected {
            return Err(DialogError::NotInState {
                expected: name,
                actual: state_name(actual),
            }
            .into());
        }
        Ok(())
    }

    /// Allocates the next local CSeq. ACK and CANCEL bypass this and
    /// reuse the INVITE's number.
    pub(crate) fn next_local_cseq(&self) -> u32 {
        self.inner.local_seq.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Feeds the dialog FSM, notifying the owning party of the change.
    pub(crate) fn transition(&self, input: DialogInput) -> bool {
        match self.inner.fsm.feed(input) {
            Ok(transition) => {
                if !transition.is_self_loop() {
                    log::debug!("Dialog {} [{:?} -> {:?}]", self.id(), transition.from, transition.to);
                    self.notify_state(transition.from, transition.to);
                }
                true
            }
            Err(rejected) => {
                log::trace!("Dialog {}: ignored input: {}", self.id(), rejected);
                false
            }
        }
    }

    pub(crate) fn fail(&self, err: DialogError) {
        *self.inner.last_error.lock().expect("Lock failed") = Some(err);
        self.transition(DialogInput::Fail);
    }

    fn notify_state(&self, old: DialogState, new: DialogState) {
        let party = self.inner.party.lock().expect("Lock failed").clone();
        let Some(party) = party.and_then(|weak| weak.upgrade()) else {
            return;
        };

        let dialog = self.clone();
        // Callbacks run with no dialog lock held.
        tokio::spawn(async move {
            crate::party::PartyInner::on_dialog_state(&party, &dialog, old, new).await;

            if new.is_terminal() {
                party.forget_dialog(&dialog.id());
                dialog.inner.endpoint.dialogs().remove(&dialog.id());
            }
        });
    }

    /// Constructs an in-dialog request per RFC 3261 §12.2.1.1: the
    /// Request-URI is the first route when it is strict (no `lr`),
    /// otherwise the remote target; the Route header carries the
    /// remaining set.
    pub(crate) fn new_in_dialog_request(&self, method: SipMethod, cseq: u32, branch: String) -> Request<'static> {
        let routes = self.inner.route_set.lock().expect("Lock failed").clone();
        let remote_target = self.inner.remote_target.lock().expect("Lock failed").clone();

        let (uri, route_uris): (Uri<'static>, Vec<Uri<'static>>) = match routes.first() {
            Some(first) if !first.lr_param => (first.clone(), routes[1..].to_vec()),
            _ => (remote_target, routes),
        };

        let mut headers = Headers::with_capacity(8 + route_uris.len());

        let sent_by = self.inner.transport.addr().into();
        headers.push(Header::Via(Via::new_udp(sent_by, Some(branch))));
        headers.push(Header::MaxForwards(MaxForwards::new(self.inner.max_forwards)));

        let mut from = crate::headers::From::new(SipUri::Uri(self.inner.local_uri.clone()));
        from.set_tag(Some(self.inner.local_tag.to_string()));
        headers.push(Header::From(from));

        let mut to = To::new(SipUri::Uri(self.inner.remote_uri.clone()));
        let remote_tag = self.inner.remote_tag.lock().expect("Lock failed").clone();
        if !remote_tag.is_empty() {
            to.set_tag(Some(remote_tag.to_string()));
        }
        headers.push(Header::To(to));

        headers.push(Header::CallId(CallId::new(self.inner.call_id.to_string())));
        headers.push(Header::CSeq(CSeq::new(cseq, method)));

        for route in route_uris {
            headers.push(Header::Route(Route::new(route)));
        }

        if matches!(method, SipMethod::Invite) {
            headers.push(Header::Contact(Contact::new(SipUri::Uri(self.inner.local_contact.clone()))));
        }
        headers.push(Header::Allow(Allow::dialog_methods()));

        Request {
            req_line: RequestLine { method, uri },
            headers,
            body: None,
        }
    }

    /// Resolves where the next in-dialog request goes: the first route
    /// when one exists, otherwise the remote target.
    pub(crate) async fn destination(&self) -> Result<SocketAddr> {
        let next_hop = {
            let routes = self.inner.route_set.lock().expect("Lock failed");
            match routes.first() {
                Some(route) => route.clone(),
                None => self.inner.remote_target.lock().expect("Lock failed").clone(),
            }
        };

        let port = next_hop.host_port.port_or_default();
        let ip = match &next_hop.host_port.host {
            Host::IpAddr(ip) => *ip,
            Host::DomainName(name) => self.inner.endpoint.resolver().resolve(name).await?,
        };

        Ok(SocketAddr::new(ip, port))
    }

    pub(crate) async fn to_outgoing(&self, request: Request<'static>) -> Result<OutgoingRequest<'static>> {
        let addr = self.destination().await?;

        Ok(OutgoingRequest {
            msg: request,
            addr,
            buf: None,
            transport: self.inner.transport.clone(),
        })
    }

    /// Handles an inbound request that matched this dialog.
    pub(crate) async fn recv_request(&self, request: &IncomingRequest<'_>) -> Result<()> {
        let method = *request.method();
        let cseq = request.cseq().cseq();

        if !matches!(method, SipMethod::Ack) {
            // Remote CSeq must not regress (RFC 3261 §12.2.2).
            let last = self.inner.remote_seq.load(Ordering::SeqCst);
            if last != 0 && cseq < last {
                log::debug!("Dialog {}: CSeq regression ({cseq} < {last})", self.id());
                let tsx = ServerTransaction::new(&self.inner.endpoint, request, self.inner.timers, Some(self.key()));
                tsx.respond(
                    StatusCode::ServerInternalError,
                    Some(&self.inner.local_tag),
                    Headers::new(),
                    None,
                )
                .await?;
                return Err(DialogError::CSeqRegression { got: cseq, last }.into());
            }
            self.inner.remote_seq.store(cseq, Ordering::SeqCst);
        }

        match method {
            SipMethod::Ack => {
                self.on_ack(request);
                Ok(())
            }
            SipMethod::Bye => {
                let tsx = ServerTransaction::new(&self.inner.endpoint, request, self.inner.timers, Some(self.key()));
                tsx.respond(StatusCode::Ok, Some(&self.inner.local_tag), Headers::new(), None)
                    .await?;

                self.stop_ok_retransmission();
                self.transition(DialogInput::Bye);
                Ok(())
            }
            SipMethod::Invite => self.recv_reinvite(request).await,
            SipMethod::Options => {
                let tsx = ServerTransaction::new(&self.inner.endpoint, request, self.inner.timers, Some(self.key()));
                let mut extra = Headers::new();
                extra.push(Header::Allow(Allow::dialog_methods()));
                tsx.respond(StatusCode::Ok, Some(&self.inner.local_tag), extra, None).await?;
                Ok(())
            }
            _ => {
                let tsx = ServerTransaction::new(&self.inner.endpoint, request, self.inner.timers, Some(self.key()));
                tsx.respond(StatusCode::NotImplemented, Some(&self.inner.local_tag), Headers::new(), None)
                    .await?;
                Ok(())
            }
        }
    }

    /// A re-INVITE: refresh the remote target and answer with the
    /// current session description.
    async fn recv_reinvite(&self, request: &IncomingRequest<'_>) -> Result<()> {
        if self.state() != DialogState::Confirmed {
            let tsx = InvServerTransaction::new(&self.inner.endpoint, request, self.inner.timers, Some(self.key()));
            tsx.respond(
                StatusCode::ServerInternalError,
                Some(&self.inner.local_tag),
                Headers::new(),
                None,
            )
            .await?;
            return Err(DialogError::InvalidRequest.into());
        }

        if let Some(contact) = request
            .request()
            .headers
            .find_map(|h| if let Header::Contact(c) = h { Some(c) } else { None })
        {
            *self.inner.remote_target.lock().expect("Lock failed") = contact.uri().clone().into_owned();
        }

        let tsx = InvServerTransaction::new(&self.inner.endpoint, request, self.inner.timers, Some(self.key()));
        *self.inner.uas_invite_tsx.lock().expect("Lock failed") = Some(tsx.clone());
        self.inner.ack_received.store(false, Ordering::SeqCst);

        let body = match (&self.inner.sdp, request.request().body.as_deref()) {
            (Some(sdp), Some(offer)) => Some(sdp.answer(offer)?),
            (Some(sdp), None) => Some(sdp.offer()),
            _ => None,
        };

        let mut extra = Headers::new();
        extra.push(Header::Contact(Contact::new(SipUri::Uri(self.inner.local_contact.clone()))));
        if body.is_some() {
            extra.push(Header::ContentType(ContentType::new_sdp()));
        }

        let buf = tsx
            .respond(StatusCode::Ok, Some(&self.inner.local_tag), extra, body)
            .await?;
        self.start_ok_retransmission(buf, tsx.addr());

        Ok(())
    }

    pub(crate) fn on_tsx_error(&self, err: TransactionError) {
        let mapped = match err {
            TransactionError::TimeoutB | TransactionError::TimeoutF => DialogError::TransactionTimeout,
            TransactionError::NoAck => DialogError::TransactionTimeout,
            other => DialogError::Transport(other.to_string()),
        };
        self.fail(mapped);
    }
}

pub(crate) fn state_name(state: DialogState) -> &'static str {
    match state {
        DialogState::Initial => "Initial",
        DialogState::Early => "Early",
        DialogState::Confirmed => "Confirmed",
        DialogState::Terminated => "Terminated",
        DialogState::Error => "Error",
    }
}

/// Captures the route set from Record-Route headers. The UAC stores
/// them reversed from the 2xx; the UAS keeps arrival order.
pub(crate) fn route_set_from_headers(headers: &Headers<'_>, reversed: bool) -> Vec<Uri<'static>> {
    let mut routes: Vec<Uri<'static>> = headers
        .iter()
        .filter_map(|header| {
            if let Header::RecordRoute(route) = header {
                Some(route.uri().clone().into_owned())
            } else {
                None
            }
        })
        .collect();

    if reversed {
        routes.reverse();
    }
    routes
}

/// Every dialog the endpoint knows, indexed by full id.
#[derive(Default)]
pub struct DialogLayer {
    dialogs: Mutex<HashMap<DialogId, Dialog>>,
}

impl DialogLayer {
    pub(crate) fn insert(&self, dialog: Dialog) {
        self.dialogs.lock().expect("Lock failed").insert(dialog.id(), dialog);
    }

    pub(crate) fn remove(&self, id: &DialogId) -> Option<Dialog> {
        self.dialogs.lock().expect("Lock failed").remove(id)
    }

    pub(crate) fn len(&self) -> usize {
        self.dialogs.lock().expect("Lock failed").len()
    }

    /// Exact lookup by full id.
    pub(crate) fn find(&self, id: &DialogId) -> Option<Dialog> {
        self.dialogs.lock().expect("Lock failed").get(id).cloned()
    }

    /// Re-keys a dialog after its remote tag was learned.
    pub(crate) fn promote(&self, old_id: &DialogId, dialog: Dialog) {
        let mut dialogs = self.dialogs.lock().expect("Lock failed");
        dialogs.remove(old_id);
        dialogs.insert(dialog.id(), dialog);
    }

    /// Resolves the dialog a response belongs to: the exact id first,
    /// then the still-untagged early dialog.
    pub(crate) fn resolve_uac(&self, key: &DialogKey, remote_tag: Option<&str>) -> Option<Dialog> {
        let dialogs = self.dialogs.lock().expect("Lock failed");

        if let Some(tag) = remote_tag {
            let id = DialogId {
                call_id: key.call_id.clone(),
                local_tag: key.local_tag.clone(),
                remote_tag: tag.into(),
            };
            if let Some(dialog) = dialogs.get(&id) {
                return Some(dialog.clone());
            }
        }

        let early = DialogId {
            call_id: key.call_id.clone(),
            local_tag: key.local_tag.clone(),
            remote_tag: ArcStr::default(),
        };
        dialogs.get(&early).cloned()
    }

    /// Any dialog sharing (Call-ID, local tag); used to fork a new
    /// dialog when a second 2xx arrives with a fresh remote tag.
    pub(crate) fn find_sibling(&self, key: &DialogKey) -> Option<Dialog> {
        let dialogs = self.dialogs.lock().expect("Lock failed");

        dialogs
            .iter()
            .find(|(id, _)| id.call_id == key.call_id && id.local_tag == key.local_tag)
            .map(|(_, dialog)| dialog.clone())
    }

    /// Resolves the dialog for an inbound in-dialog request: the To tag
    /// is our local tag, the From tag the remote one.
    pub(crate) fn resolve_uas(&self, call_id: &str, to_tag: &str, from_tag: &str) -> Option<Dialog> {
        let id = DialogId {
            call_id: call_id.into(),
            local_tag: to_tag.into(),
            remote_tag: from_tag.into(),
        };
        self.find(&id)
    }

    /// Delivery point for INVITE client transaction responses.
    pub(crate) async fn on_invite_response(&self, key: &DialogKey, response: &IncomingResponse<'_>) {
        let remote_tag = response.request_headers.to.tag();

        let dialog = match self.resolve_uac(key, remote_tag) {
            Some(dialog) => dialog,
            None => {
                // A second 2xx from a forked INVITE establishes its own
                // dialog.
                if response.code().is_success() {
                    if let (Some(sibling), Some(tag)) = (self.find_sibling(key), remote_tag) {
                        match sibling.fork(tag, response).await {
                            Ok(forked) => forked,
                            Err(err) => {
                                log::debug!("Failed to fork dialog for tag {tag}: {err}");
                                return;
                            }
                        }
                    } else {
                        return;
                    }
                } else {
                    return;
                }
            }
        };

        dialog.recv_invite_response(response).await;
    }

    /// Delivery point for non-INVITE client transaction responses.
    pub(crate) async fn on_non_invite_response(&self, key: &DialogKey, response: &IncomingResponse<'_>) {
        let remote_tag = response.request_headers.to.tag();
        let Some(dialog) = self.resolve_uac(key, remote_tag) else {
            return;
        };

        dialog.recv_non_invite_response(response).await;
    }

    /// Delivery point for transaction failures (timeouts, unreachable).
    pub(crate) async fn on_transaction_error(&self, key: &DialogKey, err: TransactionError) {
        let Some(dialog) = self.resolve_uac(key, None).or_else(|| self.find_sibling(key)) else {
            return;
        };

        dialog.on_tsx_error(err);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::mock;
    use std::sync::Weak;

    fn uac_dialog() -> (Endpoint, Dialog) {
        let endpoint = mock::default_endpoint();

        let config = DialogConfig {
            transport: mock::mock_transport(),
            timers: endpoint.timers(),
            max_forwards: 70,
            sdp: None,
            authenticator: None,
        };

        let dialog = Dialog::new_uac(
            &endpoint,
            Weak::new(),
            Uri::from_static("sip:alice@atlanta.com").unwrap(),
            Uri::from_static("sip:bob@127.0.0.1:5060").unwrap(),
            Uri::from_static("sip:alice@127.0.0.1:5060").unwrap(),
            config,
        );

        endpoint.dialogs().insert(dialog.clone());

        (endpoint, dialog)
    }

    #[tokio::test]
    async fn test_local_cseq_is_strictly_monotonic() {
        let (_endpoint, dialog) = uac_dialog();

        let first = dialog.next_local_cseq();
        let second = dialog.next_local_cseq();
        let third = dialog.next_local_cseq();

        assert!(first < second && second < third);
    }

    #[tokio::test]
    async fn test_loose_route_keeps_remote_target_as_request_uri() {
        let (_endpoint, dialog) = uac_dialog();

        let proxy = Uri::from_static("sip:proxy.example.com;lr").unwrap();
        *dialog.inner.route_set.lock().unwrap() = vec![proxy.clone()];

        let request = dialog.new_in_dialog_request(SipMethod::Bye, 2, crate::generate_branch());

        assert_eq!(request.req_line.uri.host_port.host_as_str(), "127.0.0.1");

        let routes: Vec<_> = request
            .headers
            .iter()
            .filter(|h| matches!(h, Header::Route(_)))
            .collect();
        assert_eq!(routes.len(), 1);
    }

    #[tokio::test]
    async fn test_strict_route_becomes_request_uri() {
        let (_endpoint, dialog) = uac_dialog();

        let strict = Uri::from_static("sip:old-proxy.example.com").unwrap();
        let second = Uri::from_static("sip:p2.example.com;lr").unwrap();
        *dialog.inner.route_set.lock().unwrap() = vec![strict, second];

        let request = dialog.new_in_dialog_request(SipMethod::Bye, 2, crate::generate_branch());

        assert_eq!(request.req_line.uri.host_port.host_as_str(), "old-proxy.example.com");

        let routes: Vec<_> = request
            .headers
            .iter()
            .filter(|h| matches!(h, Header::Route(_)))
            .collect();
        assert_eq!(routes.len(), 1);
    }

    #[tokio::test]
    async fn test_tagged_provisional_promotes_early_dialog() {
        let (endpoint, dialog) = uac_dialog();
        assert_eq!(dialog.state(), DialogState::Initial);

        let ringing = mock::incoming_response_tagged(StatusCode::Ringing, SipMethod::Invite, "remote9");
        dialog.recv_invite_response(&ringing).await;

        assert_eq!(dialog.state(), DialogState::Early);
        assert_eq!(dialog.id().remote_tag, "remote9");

        // The layer now resolves the dialog under its full id.
        let resolved = endpoint.dialogs().resolve_uac(&dialog.key(), Some("remote9"));
        assert!(resolved.is_some());
        assert_eq!(endpoint.dialogs().len(), 1);
    }

    #[tokio::test]
    async fn test_untagged_100_advances_nothing() {
        let (_endpoint, dialog) = uac_dialog();

        let trying = mock::incoming_response(StatusCode::Trying, SipMethod::Invite);
        dialog.recv_invite_response(&trying).await;

        assert_eq!(dialog.state(), DialogState::Initial);
    }

    #[tokio::test]
    async fn test_2xx_confirms_and_captures_route_set() {
        let (_endpoint, dialog) = uac_dialog();

        let mut ok = mock::incoming_response_tagged(StatusCode::Ok, SipMethod::Invite, "remote2");
        ok.response.headers.push(Header::RecordRoute(crate::headers::RecordRoute::new(
            Uri::from_static("sip:10.0.0.1;lr").unwrap(),
        )));
        ok.response.headers.push(Header::RecordRoute(crate::headers::RecordRoute::new(
            Uri::from_static("sip:10.0.0.2;lr").unwrap(),
        )));

        dialog.recv_invite_response(&ok).await;

        assert_eq!(dialog.state(), DialogState::Confirmed);

        // The UAC stores the Record-Route set reversed.
        let routes = dialog.inner.route_set.lock().unwrap().clone();
        assert_eq!(routes.len(), 2);
        assert_eq!(routes[0].host_port.host_as_str(), "10.0.0.2");
        assert_eq!(routes[1].host_port.host_as_str(), "10.0.0.1");
    }

    #[tokio::test]
    async fn test_failure_terminates_dialog() {
        let (_endpoint, dialog) = uac_dialog();

        let busy = mock::incoming_response_tagged(StatusCode::BusyHere, SipMethod::Invite, "r");
        dialog.recv_invite_response(&busy).await;

        assert_eq!(dialog.state(), DialogState::Terminated);
        assert_eq!(dialog.last_error(), None);
    }

    #[tokio::test]
    async fn test_transaction_timeout_is_an_error_state() {
        let (_endpoint, dialog) = uac_dialog();

        dialog.on_tsx_error(TransactionError::TimeoutB);

        assert_eq!(dialog.state(), DialogState::Error);
        assert_eq!(dialog.last_error(), Some(DialogError::TransactionTimeout));
    }

    #[tokio::test]
    async fn test_bye_requires_confirmed() {
        let (_endpoint, dialog) = uac_dialog();

        let err = dialog.bye().await.unwrap_err();

        assert_matches!(
            err,
            crate::Error::Dialog(DialogError::NotInState {
                expected: "Confirmed",
                ..
            })
        );
    }

    struct StaticSdp;

    impl crate::SdpSession for StaticSdp {
        fn offer(&self) -> Bytes {
            Bytes::from_static(b"v=0\r\no=- 0 0 IN IP4 127.0.0.1\r\ns=-\r\n")
        }

        fn answer(&self, _offer: &[u8]) -> crate::Result<Bytes> {
            Ok(self.offer())
        }

        fn remote_description(&self, _sdp: &[u8]) {}
    }

    #[tokio::test]
    async fn test_invite_carries_sdp_offer() {
        let endpoint = mock::default_endpoint();
        let transport = mock::mock_transport();

        let config = DialogConfig {
            transport: transport.clone(),
            timers: endpoint.timers(),
            max_forwards: 70,
            sdp: Some(Arc::new(StaticSdp)),
            authenticator: None,
        };

        let dialog = Dialog::new_uac(
            &endpoint,
            Weak::new(),
            Uri::from_static("sip:alice@atlanta.com").unwrap(),
            Uri::from_static("sip:bob@127.0.0.1:5060").unwrap(),
            Uri::from_static("sip:alice@127.0.0.1:5060").unwrap(),
            config,
        );
        endpoint.dialogs().insert(dialog.clone());

        dialog.send_invite().await.unwrap();

        let sent = mock::sent_datagrams(&transport);
        let invite = String::from_utf8_lossy(&sent[0]).to_string();

        assert!(invite.starts_with("INVITE "));
        assert!(invite.contains("Content-Type: application/sdp"));
        assert!(invite.contains("v=0"));
    }

    struct CannedCredentials;

    impl crate::Authenticator for CannedCredentials {
        fn authorize(&self, _challenge: &str, _method: &SipMethod, _uri: &Uri) -> Option<String> {
            Some("Digest username=\"alice\", response=\"deadbeef\"".to_owned())
        }
    }

    #[tokio::test]
    async fn test_401_triggers_one_credential_retry() {
        let endpoint = mock::default_endpoint();
        let transport = mock::mock_transport();

        let config = DialogConfig {
            transport: transport.clone(),
            timers: endpoint.timers(),
            max_forwards: 70,
            sdp: None,
            authenticator: Some(Arc::new(CannedCredentials)),
        };

        let dialog = Dialog::new_uac(
            &endpoint,
            Weak::new(),
            Uri::from_static("sip:alice@atlanta.com").unwrap(),
            Uri::from_static("sip:bob@127.0.0.1:5060").unwrap(),
            Uri::from_static("sip:alice@127.0.0.1:5060").unwrap(),
            config,
        );
        endpoint.dialogs().insert(dialog.clone());
        dialog.send_invite().await.unwrap();

        let first_cseq = dialog.inner.invite_cseq.load(Ordering::SeqCst);

        let mut challenge = mock::incoming_response_tagged(StatusCode::Unauthorized, SipMethod::Invite, "r");
        challenge.response.headers.push(Header::Other(crate::headers::OtherHeader {
            name: "WWW-Authenticate".into(),
            value: "Digest realm=\"atlanta.com\", nonce=\"84a4cc6f\"".into(),
        }));

        dialog.recv_invite_response(&challenge).await;

        // The dialog is still alive; a second INVITE went out with
        // credentials and a higher CSeq.
        assert!(!dialog.state().is_terminal());
        assert!(dialog.inner.invite_cseq.load(Ordering::SeqCst) > first_cseq);

        let sent = mock::sent_datagrams(&transport);
        let retry = String::from_utf8_lossy(&sent[sent.len() - 1]).to_string();
        assert!(retry.starts_with("INVITE "));
        assert!(retry.contains("Authorization: Digest username=\"alice\""));

        // A second challenge is not retried again.
        dialog.recv_invite_response(&challenge).await;
        assert_eq!(dialog.state(), DialogState::Terminated);
    }
}
