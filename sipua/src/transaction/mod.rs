//! SIP Transaction Layer.
//!
//! The four RFC 3261 §17 state machines. Each transaction owns a small
//! FSM validating its transitions, arms its timers on the endpoint's
//! shared wheel, and keeps the exact bytes it last sent so
//! retransmissions repeat them verbatim.

use std::cmp;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use bytes::Bytes;

use crate::dialog::DialogKey;
use crate::error::{Result, TransactionError, TransportError};
use crate::fsm::{Fsm, ObservedFsm, Transition};
use crate::message::StatusCode;
use crate::scheduler::TimerHandle;
use crate::transport::{
    IncomingRequest, IncomingResponse, OutgoingRequest, OutgoingResponse, ToBytes, Transport, TransportLayer,
};
use crate::Endpoint;

pub(crate) mod client;
pub(crate) mod inv_client;
pub(crate) mod inv_server;
pub(crate) mod key;
pub(crate) mod server;

pub use client::ClientTransaction;
pub use inv_client::InvClientTransaction;
pub use inv_server::InvServerTransaction;
pub use key::TsxKey;
pub use server::ServerTransaction;

/// The RFC 3261 base timers, overridable for tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerConfig {
    /// Estimated round-trip time; the baseline retransmission interval.
    pub t1: Duration,
    /// Cap for retransmission back-off.
    pub t2: Duration,
    /// Maximum time a message stays in the network.
    pub t4: Duration,
}

impl TimerConfig {
    pub fn new(t1: Duration, t2: Duration, t4: Duration) -> Self {
        Self { t1, t2, t4 }
    }

    /// Timer B/F/H/J: the overall transaction timeout, 64·T1.
    pub fn timeout(&self) -> Duration {
        self.t1 * 64
    }

    /// Timer D: at least 32 s for UDP.
    pub fn linger_d(&self) -> Duration {
        cmp::max(Duration::from_secs(32), self.timeout())
    }
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self {
            t1: Duration::from_millis(500),
            t2: Duration::from_secs(4),
            t4: Duration::from_secs(5),
        }
    }
}

/// The possible roles of a SIP transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// User agent client: the side that sent the request.
    UAC,
    /// User agent server: the side that received it.
    UAS,
}

/// The states of the four §17 machines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum State {
    /// INVITE client before any response.
    #[default]
    Calling,
    /// Non-INVITE transaction before any response.
    Trying,
    /// A provisional response was seen (or, UAS, the request arrived).
    Proceeding,
    /// A final response was seen or sent; absorbing retransmissions.
    Completed,
    /// INVITE server after the ACK arrived.
    Confirmed,
    /// Done; the transaction is removed once its linger ends.
    Terminated,
}

/// Everything that can drive a transaction FSM.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum TsxInput {
    /// Inbound 1xx.
    Provisional,
    /// Inbound 2xx.
    Success,
    /// Inbound 3xx-6xx.
    Failure,
    /// TU sends a 1xx.
    SendProvisional,
    /// TU sends a 2xx.
    SendSuccess,
    /// TU sends a 3xx-6xx.
    SendFailure,
    /// Inbound ACK (INVITE server).
    Ack,
    /// The peer retransmitted the request.
    RequestRetrans,
    /// Retransmission timer fired (A/E/G).
    Retransmit,
    /// Overall timeout fired (B/F/H).
    Timeout,
    /// Linger timer fired (D/I/J/K).
    Linger,
    /// The transport reported a terminal error.
    TransportFailed,
}

/// Action tags attached to FSM edges.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TsxAction {
    /// Hand the message to the dialog layer.
    Deliver,
    /// Generate an ACK for a non-2xx final and deliver it upward.
    AckAndDeliver,
    /// Generate an ACK only; the response is absorbed.
    AckOnly,
    /// Resend the last message verbatim.
    Retransmit,
}

type TsxFsm = ObservedFsm<State, TsxInput, TsxAction>;

struct Inner {
    /// The role of the transaction (UAC or UAS).
    role: Role,
    /// The endpoint this transaction belongs to.
    endpoint: Endpoint,
    /// The key identifying the transaction.
    key: TsxKey,
    /// The transport used for sending.
    transport: Arc<dyn Transport>,
    /// The remote address.
    addr: SocketAddr,
    /// State machine; all transitions flow through here.
    fsm: TsxFsm,
    /// Timer base values.
    timers: TimerConfig,
    /// The last status code sent or received.
    status_code: RwLock<Option<StatusCode>>,
    /// The retransmission count.
    retransmit_count: AtomicUsize,
    /// The exact bytes last sent; retransmissions reuse them.
    last_msg: Mutex<Option<Bytes>>,
    /// Current retransmission back-off interval.
    retrans_interval: Mutex<Duration>,
    /// Armed timer handles.
    retrans_timer: Mutex<Option<TimerHandle>>,
    timeout_timer: Mutex<Option<TimerHandle>>,
    linger_timer: Mutex<Option<TimerHandle>>,
    /// The dialog this transaction reports to, by key.
    dialog: Mutex<Option<DialogKey>>,
    /// Why the transaction terminated, when abnormal.
    last_error: Mutex<Option<TransactionError>>,
}

/// The shared core of all four transaction kinds.
#[derive(Clone)]
pub struct TransactionInner(Arc<Inner>);

impl TransactionInner {
    fn builder() -> Builder {
        Default::default()
    }

    pub(crate) fn new_uac(
        request: &OutgoingRequest<'_>,
        endpoint: &Endpoint,
        key: TsxKey,
        fsm: Fsm<State, TsxInput, TsxAction>,
        timers: TimerConfig,
    ) -> Self {
        let mut builder = Self::builder();

        builder.key(key);
        builder.role(Role::UAC);
        builder.endpoint(endpoint.clone());
        builder.transport(request.transport.clone());
        builder.addr(request.addr);
        builder.fsm(fsm);
        builder.timers(timers);

        let tsx = builder.build();

        log::trace!("Transaction created [{:?}] ({:?})", tsx.0.role, tsx.0.key);

        tsx
    }

    pub(crate) fn new_uas(
        request: &IncomingRequest<'_>,
        endpoint: &Endpoint,
        key: TsxKey,
        fsm: Fsm<State, TsxInput, TsxAction>,
        timers: TimerConfig,
    ) -> Self {
        let mut builder = Self::builder();

        builder.key(key);
        builder.role(Role::UAS);
        builder.endpoint(endpoint.clone());
        builder.transport(request.transport.clone());
        builder.addr(response_addr(request));
        builder.fsm(fsm);
        builder.timers(timers);

        let tsx = builder.build();

        log::trace!("Transaction created [{:?}] ({:?})", tsx.0.role, tsx.0.key);

        tsx
    }

    pub(crate) fn key(&self) -> &TsxKey {
        &self.0.key
    }

    pub(crate) fn endpoint(&self) -> &Endpoint {
        &self.0.endpoint
    }

    pub(crate) fn transport(&self) -> &Arc<dyn Transport> {
        &self.0.transport
    }

    pub(crate) fn addr(&self) -> SocketAddr {
        self.0.addr
    }

    pub(crate) fn timers(&self) -> TimerConfig {
        self.0.timers
    }

    /// Checks if the transport is reliable.
    #[inline]
    pub fn reliable(&self) -> bool {
        self.0.transport.reliable()
    }

    /// Retrieves the current state of the transaction.
    #[inline]
    pub fn state(&self) -> State {
        self.0.fsm.state()
    }

    /// Gets the count of retransmissions.
    #[inline]
    pub fn retrans_count(&self) -> u32 {
        self.0.retransmit_count.load(Ordering::SeqCst) as u32
    }

    /// Retrieves the last status code sent or received.
    #[inline]
    pub fn last_status_code(&self) -> Option<StatusCode> {
        *self.0.status_code.read().expect("Lock failed")
    }

    /// The error the transaction terminated with, if any.
    pub fn last_error(&self) -> Option<TransactionError> {
        self.0.last_error.lock().expect("Lock failed").clone()
    }

    /// Waits until the transaction state satisfies the predicate.
    pub async fn wait_for_state<F>(&self, predicate: F, deadline: Duration) -> Option<State>
    where
        F: FnMut(&State) -> bool,
    {
        self.0.fsm.wait_for_state(predicate, deadline).await
    }

    pub(crate) fn set_dialog(&self, dialog: DialogKey) {
        *self.0.dialog.lock().expect("Lock failed") = Some(dialog);
    }

    pub(crate) fn dialog_key(&self) -> Option<DialogKey> {
        self.0.dialog.lock().expect("Lock failed").clone()
    }

    #[inline]
    fn set_last_status_code(&self, code: StatusCode) {
        *self.0.status_code.write().expect("Lock failed") = Some(code);
    }

    pub(crate) fn set_last_error(&self, err: TransactionError) {
        *self.0.last_error.lock().expect("Lock failed") = Some(err);
    }

    fn set_last_msg(&self, msg: Bytes) {
        *self.0.last_msg.lock().expect("Lock failed") = Some(msg);
    }

    pub(crate) fn last_msg(&self) -> Option<Bytes> {
        self.0.last_msg.lock().expect("Lock failed").clone()
    }

    #[inline]
    fn add_retrans_count(&self) -> u32 {
        self.0.retransmit_count.fetch_add(1, Ordering::SeqCst) as u32 + 1
    }

    /// Feeds an input into the FSM.
    ///
    /// Returns the transition taken and its action, or `None` if the
    /// input is not legal in the current state (e.g. a stale timer).
    pub(crate) fn feed(&self, input: TsxInput) -> Option<(Transition<State>, Option<TsxAction>)> {
        let mut taken = None;
        let result = self.0.fsm.feed_with(input, |transition, action| {
            taken = Some((*transition, action));
        });

        match result {
            Ok(transition) => {
                if !transition.is_self_loop() {
                    log::trace!(
                        "State changed [{:?} -> {:?}] ({:?})",
                        transition.from,
                        transition.to,
                        self.0.key
                    );
                }
                if transition.to == State::Terminated {
                    self.on_terminated();
                }
                taken
            }
            Err(rejected) => {
                log::trace!("Ignored input: {rejected} ({:?})", self.0.key);
                None
            }
        }
    }

    /// Cancels timers and unregisters the transaction.
    pub(crate) fn on_terminated(&self) {
        let wheel = self.0.endpoint.wheel();
        for slot in [&self.0.retrans_timer, &self.0.timeout_timer, &self.0.linger_timer] {
            if let Some(handle) = slot.lock().expect("Lock failed").take() {
                wheel.cancel(&handle);
            }
        }

        let layer = self.0.endpoint.transactions();
        match self.0.role {
            Role::UAC => {
                layer.remove_client(&self.0.key);
            }
            Role::UAS => {
                layer.remove_server(&self.0.key);
            }
        }
    }

    /// Resends the last message verbatim.
    pub(crate) async fn retransmit(&self) -> Result<u32> {
        let Some(msg) = self.last_msg() else {
            return Err(crate::error::TransportError::SendFailed {
                addr: self.0.addr.to_string(),
                reason: "No message to retransmit".into(),
            }
            .into());
        };

        TransportLayer::send_buf(&self.0.transport, &msg, &self.0.addr).await?;
        Ok(self.add_retrans_count())
    }

    pub(crate) async fn tsx_send_request(&self, msg: &mut OutgoingRequest<'_>) -> Result<()> {
        log::debug!("=> Request {} to /{}", msg.msg.req_line.method, msg.addr);
        let buf = match msg.buf.take() {
            Some(buf) => buf,
            None => msg.to_bytes()?,
        };

        let sent = TransportLayer::send_buf(&self.0.transport, &buf, &self.0.addr).await;
        self.set_last_msg(buf);
        sent?;

        Ok(())
    }

    pub(crate) async fn tsx_send_response(&self, msg: &mut OutgoingResponse<'_>) -> Result<()> {
        let code = msg.status_code();
        log::debug!("=> Response {} {}", code.into_i32(), msg.reason());
        let buf = match msg.buf.take() {
            Some(buf) => buf,
            None => msg.to_bytes()?,
        };

        let sent = TransportLayer::send_buf(&self.0.transport, &buf, &self.0.addr).await;
        self.set_last_status_code(code);
        self.set_last_msg(buf);
        sent?;

        Ok(())
    }

    /// Arms the retransmission timer (A/E/G) at `initial`, doubling up
    /// to T2 on every fire.
    pub(crate) fn arm_retransmit(&self, initial: Duration) {
        *self.0.retrans_interval.lock().expect("Lock failed") = initial;
        self.schedule_retrans(initial);
    }

    fn schedule_retrans(&self, delay: Duration) {
        let tsx = self.clone();
        let handle = self.0.endpoint.wheel().schedule(delay, move || {
            let inner = tsx.clone();
            tokio::spawn(async move { inner.on_retrans_timer().await });
        });
        *self.0.retrans_timer.lock().expect("Lock failed") = Some(handle);
    }

    async fn on_retrans_timer(&self) {
        let Some((_, Some(TsxAction::Retransmit))) = self.feed(TsxInput::Retransmit) else {
            return;
        };

        match self.retransmit().await {
            Ok(count) => {
                log::trace!("Retransmission #{count} ({:?})", self.0.key);
            }
            Err(crate::Error::Transport(TransportError::Unreachable(addr))) => {
                // ICMP unreachable is terminal for the transaction; it
                // does not restart, it accelerates termination.
                let err = TransactionError::Unreachable(addr);
                if self.feed(TsxInput::TransportFailed).is_some() {
                    self.set_last_error(err.clone());
                    self.notify_error(err);
                }
                return;
            }
            Err(err) => {
                log::info!("Failed to retransmit: {err}");
            }
        }

        let next = {
            let mut interval = self.0.retrans_interval.lock().expect("Lock failed");
            *interval = cmp::min(*interval * 2, self.0.timers.t2);
            *interval
        };
        self.schedule_retrans(next);
    }

    /// Arms the overall timeout (B/F/H). On expiry the transaction
    /// terminates carrying `err` and the owning dialog is informed.
    pub(crate) fn arm_timeout(&self, delay: Duration, err: TransactionError) {
        let tsx = self.clone();
        let handle = self.0.endpoint.wheel().schedule(delay, move || {
            if tsx.feed(TsxInput::Timeout).is_some() {
                tsx.set_last_error(err.clone());
                tsx.notify_error(err.clone());
            }
        });
        *self.0.timeout_timer.lock().expect("Lock failed") = Some(handle);
    }

    /// Arms the linger timer (D/I/J/K) that ends the absorb period.
    pub(crate) fn arm_linger(&self, delay: Duration) {
        let tsx = self.clone();
        let handle = self.0.endpoint.wheel().schedule(delay, move || {
            tsx.feed(TsxInput::Linger);
        });
        *self.0.linger_timer.lock().expect("Lock failed") = Some(handle);
    }

    pub(crate) fn cancel_retransmit(&self) {
        if let Some(handle) = self.0.retrans_timer.lock().expect("Lock failed").take() {
            self.0.endpoint.wheel().cancel(&handle);
        }
    }

    pub(crate) fn cancel_timeout(&self) {
        if let Some(handle) = self.0.timeout_timer.lock().expect("Lock failed").take() {
            self.0.endpoint.wheel().cancel(&handle);
        }
    }

    /// Reports a terminal failure to the owning dialog.
    pub(crate) fn notify_error(&self, err: TransactionError) {
        if let Some(dialog_key) = self.dialog_key() {
            let endpoint = self.0.endpoint.clone();
            tokio::spawn(async move {
                endpoint.dialogs().on_transaction_error(&dialog_key, err).await;
            });
        }
    }
}

/// What a UAS needs from the request it answers, detached from the
/// datagram buffer so responses can be produced later.
pub(crate) struct UasContext {
    vias: Vec<crate::headers::Via<'static>>,
    record_routes: Vec<crate::headers::RecordRoute<'static>>,
    from: crate::headers::From<'static>,
    to: crate::headers::To<'static>,
    call_id: crate::headers::CallId<'static>,
    cseq: crate::headers::CSeq,
}

impl UasContext {
    pub(crate) fn from_request(request: &IncomingRequest<'_>) -> Self {
        use crate::headers::Header;

        // The topmost Via comes from the extracted copy, which carries
        // the received parameter; the rest follow in order.
        let mut vias = vec![request.request_headers.via.clone().into_owned()];
        vias.extend(
            request
                .request()
                .headers
                .iter()
                .filter_map(|h| if let Header::Via(v) = h { Some(v) } else { None })
                .skip(1)
                .map(|v| v.clone().into_owned()),
        );

        let record_routes = request
            .request()
            .headers
            .iter()
            .filter_map(|h| if let Header::RecordRoute(rr) = h { Some(rr) } else { None })
            .map(|rr| rr.clone().into_owned())
            .collect();

        Self {
            vias,
            record_routes,
            from: request.request_headers.from.clone().into_owned(),
            to: request.request_headers.to.clone().into_owned(),
            call_id: request.request_headers.call_id.clone().into_owned(),
            cseq: request.request_headers.cseq,
        }
    }

    /// Builds a response echoing the request's identification headers
    /// (RFC 3261 §8.2.6): the Via stack, Record-Routes, Call-ID, From,
    /// To and CSeq.
    ///
    /// A To tag is added for every response above 100; `to_tag` wins,
    /// otherwise the topmost branch serves as a stable fallback.
    pub(crate) fn new_response(&self, code: StatusCode, to_tag: Option<&str>) -> crate::message::Response<'static> {
        use crate::headers::Header;
        use crate::message::{Response, StatusLine};

        let mut headers = crate::headers::Headers::with_capacity(self.vias.len() + 6);

        for via in &self.vias {
            headers.push(Header::Via(via.clone()));
        }
        for rr in &self.record_routes {
            headers.push(Header::RecordRoute(rr.clone()));
        }

        headers.push(Header::CallId(self.call_id.clone()));
        headers.push(Header::From(self.from.clone()));

        let mut to = self.to.clone();
        if to.tag().is_none() && code.into_i32() > 100 {
            match to_tag {
                Some(tag) => to.set_tag(Some(tag.to_owned())),
                None => {
                    let branch = self.vias[0].branch().map(str::to_owned);
                    to.set_tag(branch);
                }
            }
        }
        headers.push(Header::To(to));
        headers.push(Header::CSeq(self.cseq));

        Response {
            status_line: StatusLine::new(code, code.reason()),
            headers,
            body: None,
        }
    }

}

/// Picks where responses to this request go (RFC 3261 §18.2.2 plus the
/// rport extension of RFC 3581).
fn response_addr(request: &IncomingRequest<'_>) -> SocketAddr {
    let via = &request.request_headers.via;
    let source = request.packet.addr;

    let ip = via.received().unwrap_or_else(|| source.ip());
    let port = match via.rport() {
        Some(rport) => rport,
        None => via.sent_by().port.unwrap_or_else(|| source.port()),
    };

    SocketAddr::new(ip, port)
}

#[derive(Default)]
/// Builder for the shared transaction core.
pub(crate) struct Builder {
    role: Option<Role>,
    endpoint: Option<Endpoint>,
    key: Option<TsxKey>,
    transport: Option<Arc<dyn Transport>>,
    addr: Option<SocketAddr>,
    fsm: Option<TsxFsm>,
    timers: Option<TimerConfig>,
}

impl Builder {
    pub fn role(&mut self, role: Role) -> &mut Self {
        self.role = Some(role);
        self
    }

    pub fn endpoint(&mut self, endpoint: Endpoint) -> &mut Self {
        self.endpoint = Some(endpoint);
        self
    }

    pub fn key(&mut self, key: TsxKey) -> &mut Self {
        self.key = Some(key);
        self
    }

    pub fn transport(&mut self, transport: Arc<dyn Transport>) -> &mut Self {
        self.transport = Some(transport);
        self
    }

    pub fn addr(&mut self, addr: SocketAddr) -> &mut Self {
        self.addr = Some(addr);
        self
    }

    pub fn fsm(&mut self, fsm: Fsm<State, TsxInput, TsxAction>) -> &mut Self {
        self.fsm = Some(ObservedFsm::new(fsm));
        self
    }

    pub fn timers(&mut self, timers: TimerConfig) -> &mut Self {
        self.timers = Some(timers);
        self
    }

    pub fn build(self) -> TransactionInner {
        let timers = self.timers.unwrap_or_default();
        let inner = Inner {
            role: self.role.expect("Role is required"),
            endpoint: self.endpoint.expect("Endpoint is required"),
            key: self.key.expect("Key is required"),
            transport: self.transport.expect("Transport is required"),
            addr: self.addr.expect("Address is required"),
            fsm: self.fsm.expect("Fsm is required"),
            timers,
            status_code: Default::default(),
            retransmit_count: Default::default(),
            last_msg: Default::default(),
            retrans_interval: Mutex::new(timers.t1),
            retrans_timer: Default::default(),
            timeout_timer: Default::default(),
            linger_timer: Default::default(),
            dialog: Default::default(),
            last_error: Default::default(),
        };

        TransactionInner(Arc::new(inner))
    }
}

/// A client transaction, either INVITE or non-INVITE.
#[derive(Clone)]
pub enum ClientTsx {
    /// A non-INVITE client transaction.
    NonInvite(ClientTransaction),
    /// An INVITE client transaction.
    Invite(InvClientTransaction),
}

impl ClientTsx {
    pub(crate) async fn receive(&self, response: &IncomingResponse<'_>) -> Result<bool> {
        match self {
            ClientTsx::NonInvite(tsx) => tsx.receive(response).await,
            ClientTsx::Invite(tsx) => tsx.receive(response).await,
        }
    }
}

/// A server transaction, either INVITE or non-INVITE.
#[derive(Clone)]
pub enum ServerTsx {
    /// A non-INVITE server transaction.
    NonInvite(ServerTransaction),
    /// An INVITE server transaction.
    Invite(InvServerTransaction),
}

impl ServerTsx {
    pub(crate) fn key(&self) -> &TsxKey {
        match self {
            ServerTsx::NonInvite(tsx) => tsx.key(),
            ServerTsx::Invite(tsx) => tsx.key(),
        }
    }

    pub(crate) async fn receive_request(&self, request: &IncomingRequest<'_>) -> Result<()> {
        match self {
            ServerTsx::NonInvite(tsx) => tsx.receive_request(request).await,
            ServerTsx::Invite(tsx) => tsx.receive_request(request).await,
        }
    }
}

impl From<ServerTransaction> for ServerTsx {
    fn from(tsx: ServerTransaction) -> Self {
        ServerTsx::NonInvite(tsx)
    }
}

impl From<InvServerTransaction> for ServerTsx {
    fn from(tsx: InvServerTransaction) -> Self {
        ServerTsx::Invite(tsx)
    }
}

/// The transaction layer: every live client and server transaction,
/// indexed by key.
///
/// Lookups are frequent and insertions rare, so both maps sit behind a
/// readers/writer lock.
#[derive(Default)]
pub struct TransactionLayer {
    client_transactions: RwLock<std::collections::HashMap<TsxKey, ClientTsx>>,
    server_transactions: RwLock<std::collections::HashMap<TsxKey, ServerTsx>>,
}

impl TransactionLayer {
    /// Removes a server transaction.
    #[inline]
    pub(crate) fn remove_server(&self, key: &TsxKey) -> Option<ServerTsx> {
        self.server_transactions.write().expect("Lock failed").remove(key)
    }

    /// Removes a client transaction.
    #[inline]
    pub(crate) fn remove_client(&self, key: &TsxKey) -> Option<ClientTsx> {
        self.client_transactions.write().expect("Lock failed").remove(key)
    }

    #[inline]
    pub(crate) fn insert_client(&self, key: TsxKey, tsx: ClientTsx) {
        self.client_transactions.write().expect("Lock failed").insert(key, tsx);
    }

    #[inline]
    pub(crate) fn insert_server(&self, key: TsxKey, tsx: ServerTsx) {
        self.server_transactions.write().expect("Lock failed").insert(key, tsx);
    }

    pub(crate) fn find_server(&self, key: &TsxKey) -> Option<ServerTsx> {
        self.server_transactions.read().expect("Lock failed").get(key).cloned()
    }

    pub(crate) fn find_client(&self, key: &TsxKey) -> Option<ClientTsx> {
        self.client_transactions.read().expect("Lock failed").get(key).cloned()
    }

    pub(crate) fn client_count(&self) -> usize {
        self.client_transactions.read().expect("Lock failed").len()
    }

    pub(crate) fn server_count(&self) -> usize {
        self.server_transactions.read().expect("Lock failed").len()
    }

    /// Routes an inbound response to its client transaction.
    ///
    /// Returns `false` for orphans.
    pub(crate) async fn handle_response(&self, response: &IncomingResponse<'_>) -> Result<bool> {
        let Some(key) = TsxKey::client_for_response(&response.request_headers) else {
            return Ok(false);
        };

        let Some(client_tsx) = self.find_client(&key) else {
            return Ok(false);
        };

        client_tsx.receive(response).await
    }

    /// Routes an inbound request to an existing server transaction
    /// (a retransmission, or an ACK absorbing a non-2xx final).
    ///
    /// Returns `false` when no transaction matches.
    pub(crate) async fn handle_request(&self, request: &IncomingRequest<'_>) -> Result<bool> {
        let key = TsxKey::server_for_request(&request.request_headers, *request.method());

        let Some(server_tsx) = self.find_server(&key) else {
            return Ok(false);
        };

        server_tsx.receive_request(request).await?;
        Ok(true)
    }
}
