//! INVITE session establishment and teardown.
//!
//! The UAC half: sending the INVITE, promoting the early dialog on
//! tagged responses, ACKing the 2xx, CANCEL, and the credential retry.
//! The UAS half: answering through the INVITE server transaction and
//! retransmitting the 2xx until the ACK arrives.

use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex, Weak};

use bytes::Bytes;
use rand::Rng;
use sipua_util::ArcStr;

use super::{dialog_fsm, route_set_from_headers, Dialog, DialogInner, DialogInput, DialogState, PendingOk};
use crate::error::{DialogError, Result};
use crate::fsm::ObservedFsm;
use crate::headers::{Allow, CallId, CSeq, Contact, ContentType, Header, Headers, MaxForwards, SipHeaderParse, To, Via};
use crate::message::{Request, RequestLine, SipMethod, SipUri, StatusCode, Uri};
use crate::transaction::{ClientTransaction, InvClientTransaction, InvServerTransaction, Role, TimerConfig};
use crate::transport::{IncomingRequest, IncomingResponse, ToBytes, Transport, TransportLayer};
use crate::{Authenticator, Endpoint, SdpSession};

const AUTHENTICATE_HEADERS: [&str; 2] = ["WWW-Authenticate", "Proxy-Authenticate"];

/// Everything a dialog inherits from the Party that owns it.
pub(crate) struct DialogConfig {
    pub transport: Arc<dyn Transport>,
    pub timers: TimerConfig,
    pub max_forwards: u32,
    pub sdp: Option<Arc<dyn SdpSession>>,
    pub authenticator: Option<Arc<dyn Authenticator>>,
}

impl Dialog {
    /// Creates the client half of an INVITE dialog. The INVITE itself
    /// goes out through [`Dialog::send_invite`].
    pub(crate) fn new_uac(
        endpoint: &Endpoint,
        party: Weak<crate::party::PartyInner>,
        local_uri: Uri<'static>,
        remote_uri: Uri<'static>,
        local_contact: Uri<'static>,
        config: DialogConfig,
    ) -> Dialog {
        // The UAC picks the initial CSeq; keep it well below 2^31.
        let initial_cseq: u32 = rand::rng().random_range(1..0x7FFF);

        let inner = DialogInner {
            endpoint: endpoint.clone(),
            role: Role::UAC,
            call_id: crate::generate_call_id(),
            local_tag: crate::generate_tag(),
            remote_tag: Mutex::new(ArcStr::default()),
            fsm: ObservedFsm::new(dialog_fsm()),
            local_seq: initial_cseq.into(),
            remote_seq: 0.into(),
            remote_target: Mutex::new(remote_uri.clone()),
            local_uri,
            remote_uri,
            local_contact,
            route_set: Mutex::new(Vec::new()),
            secure: false,
            party: Mutex::new(Some(party)),
            transport: config.transport,
            timers: config.timers,
            max_forwards: config.max_forwards,
            invite_branch: Mutex::new(None),
            invite_cseq: 0.into(),
            uas_invite_tsx: Mutex::new(None),
            last_ack: Mutex::new(None),
            pending_ok: Mutex::new(None),
            ack_received: false.into(),
            auth_retried: false.into(),
            sdp: config.sdp,
            authenticator: config.authenticator,
            remote_offer: Mutex::new(None),
            last_error: Mutex::new(None),
        };

        Dialog { inner: Arc::new(inner) }
    }

    /// Creates the server half from a dialog-establishing request.
    pub(crate) fn new_uas(
        endpoint: &Endpoint,
        party: Weak<crate::party::PartyInner>,
        request: &IncomingRequest<'_>,
        config: DialogConfig,
    ) -> Result<Dialog> {
        let method = request.method();
        if !method.can_establish_a_dialog() {
            return Err(DialogError::InvalidRequest.into());
        }

        let Some(from_tag) = request.from().tag() else {
            return Err(DialogError::MissingHeader("From tag").into());
        };

        // The peer's Contact is our remote target for every in-dialog
        // request.
        let Some(contact) = request
            .request()
            .headers
            .find_map(|h| if let Header::Contact(c) = h { Some(c) } else { None })
        else {
            return Err(DialogError::MissingHeader(Contact::NAME).into());
        };

        let remote_offer = request.request().body.as_deref().map(Bytes::copy_from_slice);

        let inner = DialogInner {
            endpoint: endpoint.clone(),
            role: Role::UAS,
            call_id: request.call_id().as_str().into(),
            local_tag: crate::generate_tag(),
            remote_tag: Mutex::new(from_tag.into()),
            fsm: ObservedFsm::new(dialog_fsm()),
            // Our own CSeq space is independent of the peer's.
            local_seq: rand::rng().random_range(1..0x7FFF_u32).into(),
            remote_seq: request.cseq().cseq().into(),
            local_uri: request.to().addr().uri().clone().into_owned(),
            remote_uri: request.from().addr().uri().clone().into_owned(),
            local_contact: config
                .transport
                .addr()
                .into_contact_uri(request.to().addr().uri().username()),
            remote_target: Mutex::new(contact.uri().clone().into_owned()),
            // The UAS keeps Record-Routes in arrival order.
            route_set: Mutex::new(route_set_from_headers(&request.request().headers, false)),
            secure: false,
            party: Mutex::new(Some(party)),
            transport: config.transport,
            timers: config.timers,
            max_forwards: config.max_forwards,
            invite_branch: Mutex::new(None),
            invite_cseq: request.cseq().cseq().into(),
            uas_invite_tsx: Mutex::new(None),
            last_ack: Mutex::new(None),
            pending_ok: Mutex::new(None),
            ack_received: false.into(),
            auth_retried: false.into(),
            sdp: config.sdp,
            authenticator: config.authenticator,
            remote_offer: Mutex::new(remote_offer),
            last_error: Mutex::new(None),
        };

        Ok(Dialog { inner: Arc::new(inner) })
    }

    pub(crate) fn attach_uas_tsx(&self, tsx: InvServerTransaction) {
        *self.inner.uas_invite_tsx.lock().expect("Lock failed") = Some(tsx);
    }

    /// Builds and sends the initial INVITE, creating its client
    /// transaction.
    pub(crate) async fn send_invite(&self) -> Result<()> {
        self.expect_state(DialogState::Initial, "Initial")?;

        let branch = crate::generate_branch();
        let cseq = self.next_local_cseq();

        self.inner.invite_cseq.store(cseq, Ordering::SeqCst);
        *self.inner.invite_branch.lock().expect("Lock failed") = Some(branch.clone());

        let mut request = self.new_in_dialog_request(SipMethod::Invite, cseq, branch);

        if let Some(sdp) = &self.inner.sdp {
            let offer = sdp.offer();
            request.headers.push(Header::ContentType(ContentType::new_sdp()));
            request.body = Some(std::borrow::Cow::Owned(offer.to_vec()));
        }

        let outgoing = self.to_outgoing(request).await?;

        InvClientTransaction::send(outgoing, &self.inner.endpoint, self.inner.timers, Some(self.key())).await?;

        Ok(())
    }

    /// Sends a re-INVITE, refreshing the session within a confirmed
    /// dialog. An ordinary in-dialog request: fresh branch, incremented
    /// CSeq.
    pub async fn reinvite(&self) -> Result<()> {
        self.expect_state(DialogState::Confirmed, "Confirmed")?;

        let branch = crate::generate_branch();
        let cseq = self.next_local_cseq();

        self.inner.invite_cseq.store(cseq, Ordering::SeqCst);
        *self.inner.invite_branch.lock().expect("Lock failed") = Some(branch.clone());
        // The new exchange gets its own ACK.
        *self.inner.last_ack.lock().expect("Lock failed") = None;

        let mut request = self.new_in_dialog_request(SipMethod::Invite, cseq, branch);

        if let Some(sdp) = &self.inner.sdp {
            request.headers.push(Header::ContentType(ContentType::new_sdp()));
            request.body = Some(std::borrow::Cow::Owned(sdp.offer().to_vec()));
        }

        let outgoing = self.to_outgoing(request).await?;
        InvClientTransaction::send(outgoing, &self.inner.endpoint, self.inner.timers, Some(self.key())).await?;

        Ok(())
    }

    /// Learns the remote tag, re-keying the dialog in the layer.
    fn set_remote_tag(&self, tag: &str) {
        let old_id = {
            let mut remote_tag = self.inner.remote_tag.lock().expect("Lock failed");
            if !remote_tag.is_empty() {
                return;
            }
            let old_id = super::DialogId {
                call_id: self.inner.call_id.clone(),
                local_tag: self.inner.local_tag.clone(),
                remote_tag: remote_tag.clone(),
            };
            *remote_tag = tag.into();
            old_id
        };

        self.inner.endpoint.dialogs().promote(&old_id, self.clone());
    }

    /// Handles a response to our INVITE, delivered by its client
    /// transaction (or, for 2xx retransmissions, straight from the
    /// transport).
    pub(crate) async fn recv_invite_response(&self, response: &IncomingResponse<'_>) {
        let code = response.code();
        let remote_tag = response.request_headers.to.tag().map(str::to_owned);

        if code.is_provisional() {
            // A 100 advances nothing; an untagged provisional cannot
            // identify a dialog either.
            if code == StatusCode::Trying {
                return;
            }
            if let Some(tag) = remote_tag {
                self.set_remote_tag(&tag);
                self.transition(DialogInput::EarlyTagged);
            }
            return;
        }

        if code.is_success() {
            if let Some(tag) = &remote_tag {
                self.set_remote_tag(tag);
            }

            // The UAC records the Record-Route set reversed from the
            // 2xx and retargets to the peer's Contact.
            let routes = route_set_from_headers(&response.response().headers, true);
            *self.inner.route_set.lock().expect("Lock failed") = routes;

            if let Some(contact) = response
                .response()
                .headers
                .find_map(|h| if let Header::Contact(c) = h { Some(c) } else { None })
            {
                *self.inner.remote_target.lock().expect("Lock failed") = contact.uri().clone().into_owned();
            }

            if let (Some(sdp), Some(body)) = (&self.inner.sdp, response.response().body.as_deref()) {
                sdp.remote_description(body);
            }

            self.transition(DialogInput::Accept);

            if let Err(err) = self.send_ack().await {
                log::warn!("Failed to ACK 2xx on {}: {}", self.id(), err);
            }
            return;
        }

        // Failure final. A credential challenge gets one retry when a
        // collaborator is installed.
        if matches!(code, StatusCode::Unauthorized | StatusCode::ProxyAuthenticationRequired)
            && self.inner.authenticator.is_some()
            && !self.inner.auth_retried.swap(true, Ordering::SeqCst)
        {
            match self.retry_with_auth(response).await {
                Ok(()) => return,
                Err(err) => log::debug!("Credential retry failed on {}: {}", self.id(), err),
            }
        }

        self.transition(DialogInput::Reject);
    }

    pub(crate) async fn recv_non_invite_response(&self, response: &IncomingResponse<'_>) {
        let method = response.request_headers.cseq.method();
        let code = response.code();

        log::debug!("Dialog {}: {} answered {}", self.id(), method, code.into_i32());
    }

    /// ACKs the 2xx. The ACK is its own transactionless message with a
    /// fresh branch but the INVITE's CSeq number.
    async fn send_ack(&self) -> Result<()> {
        let buf = {
            let last_ack = self.inner.last_ack.lock().expect("Lock failed");
            last_ack.clone()
        };

        let buf = match buf {
            // A retransmitted 2xx gets the identical ACK again.
            Some(buf) => buf,
            None => {
                let cseq = self.inner.invite_cseq.load(Ordering::SeqCst);
                let mut request = self.new_in_dialog_request(SipMethod::Ack, cseq, crate::generate_branch());
                request.headers.push(Header::Allow(Allow::dialog_methods()));

                let outgoing = self.to_outgoing(request).await?;
                let buf = outgoing.to_bytes()?;
                *self.inner.last_ack.lock().expect("Lock failed") = Some(buf.clone());
                buf
            }
        };

        let addr = self.destination().await?;
        TransportLayer::send_buf(&self.inner.transport, &buf, &addr).await?;
        Ok(())
    }

    /// Cancels a pending INVITE (RFC 3261 §9.1): identical Request-URI,
    /// Call-ID, From, To and CSeq number, same top Via branch, method
    /// CANCEL.
    pub async fn cancel(&self) -> Result<()> {
        if !matches!(self.state(), DialogState::Initial | DialogState::Early) {
            return Err(DialogError::NotInState {
                expected: "Early",
                actual: super::state_name(self.state()),
            }
            .into());
        }

        let branch = self
            .inner
            .invite_branch
            .lock()
            .expect("Lock failed")
            .clone()
            .ok_or(DialogError::InvalidRequest)?;
        let cseq = self.inner.invite_cseq.load(Ordering::SeqCst);

        let mut headers = Headers::with_capacity(6);
        let sent_by = self.inner.transport.addr().into();
        headers.push(Header::Via(Via::new_udp(sent_by, Some(branch))));
        headers.push(Header::MaxForwards(MaxForwards::new(self.inner.max_forwards)));

        let mut from = crate::headers::From::new(SipUri::Uri(self.inner.local_uri.clone()));
        from.set_tag(Some(self.inner.local_tag.to_string()));
        headers.push(Header::From(from));

        // The CANCEL copies the INVITE's To, which had no tag yet.
        headers.push(Header::To(To::new(SipUri::Uri(self.inner.remote_uri.clone()))));
        headers.push(Header::CallId(CallId::new(self.inner.call_id.to_string())));
        headers.push(Header::CSeq(CSeq::new(cseq, SipMethod::Cancel)));

        let request = Request {
            req_line: RequestLine {
                method: SipMethod::Cancel,
                uri: self.inner.remote_uri.clone(),
            },
            headers,
            body: None,
        };

        let outgoing = self.to_outgoing(request).await?;
        ClientTransaction::send(outgoing, &self.inner.endpoint, self.inner.timers, Some(self.key())).await?;

        // The dialog ends when the 487 arrives on the INVITE.
        Ok(())
    }

    /// Sends a 180 Ringing, moving the dialog to Early.
    pub async fn ring(&self) -> Result<()> {
        let tsx = self.uas_tsx()?;

        tsx.respond(StatusCode::Ringing, Some(&self.inner.local_tag), Headers::new(), None)
            .await?;
        self.transition(DialogInput::EarlyTagged);
        Ok(())
    }

    /// Accepts the INVITE with a 200 OK, answering the offer through
    /// the session collaborator when one is installed.
    ///
    /// The INVITE server transaction terminates on the 2xx, so the
    /// dialog itself retransmits the response until the ACK arrives.
    pub async fn accept(&self) -> Result<()> {
        if !matches!(self.state(), DialogState::Initial | DialogState::Early) {
            return Err(DialogError::NotInState {
                expected: "Early",
                actual: super::state_name(self.state()),
            }
            .into());
        }

        let tsx = self.uas_tsx()?;

        let body = match &self.inner.sdp {
            Some(sdp) => {
                let offer = self.inner.remote_offer.lock().expect("Lock failed").clone();
                match offer {
                    Some(offer) => Some(sdp.answer(&offer)?),
                    None => Some(sdp.offer()),
                }
            }
            None => None,
        };

        let mut extra = Headers::new();
        extra.push(Header::Contact(Contact::new(SipUri::Uri(self.inner.local_contact.clone()))));
        extra.push(Header::Allow(Allow::dialog_methods()));
        if body.is_some() {
            extra.push(Header::ContentType(ContentType::new_sdp()));
        }

        let buf = tsx
            .respond(StatusCode::Ok, Some(&self.inner.local_tag), extra, body)
            .await?;

        self.transition(DialogInput::Accept);
        self.start_ok_retransmission(buf, tsx.addr());
        Ok(())
    }

    /// Rejects the INVITE with a failure status.
    pub async fn reject(&self, code: StatusCode) -> Result<()> {
        assert!(code.is_failure(), "reject takes a 3xx-6xx status");

        let tsx = self.uas_tsx()?;

        tsx.respond(code, Some(&self.inner.local_tag), Headers::new(), None).await?;
        self.transition(DialogInput::Reject);
        Ok(())
    }

    /// The peer CANCELled our pending INVITE: answer it with a 487 and
    /// end the dialog.
    pub(crate) async fn on_cancelled(&self) -> Result<()> {
        let tsx = self.uas_tsx()?;

        if tsx.state() == crate::transaction::State::Proceeding {
            tsx.respond(
                StatusCode::RequestTerminated,
                Some(&self.inner.local_tag),
                Headers::new(),
                None,
            )
            .await?;
            self.transition(DialogInput::Reject);
        }

        Ok(())
    }

    /// The ACK completing our 2xx arrived.
    pub(crate) fn on_ack(&self, request: &IncomingRequest<'_>) {
        self.inner.ack_received.store(true, Ordering::SeqCst);
        self.stop_ok_retransmission();

        if let (Some(sdp), Some(body)) = (&self.inner.sdp, request.request().body.as_deref()) {
            sdp.remote_description(body);
        }
    }

    fn uas_tsx(&self) -> Result<InvServerTransaction> {
        self.inner
            .uas_invite_tsx
            .lock()
            .expect("Lock failed")
            .clone()
            .ok_or_else(|| DialogError::InvalidRequest.into())
    }

    /// Repeats the 2xx at T1 doubling up to T2 until the ACK arrives,
    /// giving up after 64·T1.
    pub(crate) fn start_ok_retransmission(&self, buf: Bytes, addr: std::net::SocketAddr) {
        self.inner.ack_received.store(false, Ordering::SeqCst);

        {
            let mut pending = self.inner.pending_ok.lock().expect("Lock failed");
            *pending = Some(PendingOk {
                buf,
                addr,
                interval: self.inner.timers.t1,
                elapsed: std::time::Duration::ZERO,
                timer: None,
            });
        }

        self.schedule_ok_retransmission(self.inner.timers.t1);
    }

    fn schedule_ok_retransmission(&self, delay: std::time::Duration) {
        let dialog = self.clone();
        let handle = self.inner.endpoint.wheel().schedule(delay, move || {
            let dialog = dialog.clone();
            tokio::spawn(async move { dialog.ok_retransmission_tick().await });
        });

        if let Some(pending) = self.inner.pending_ok.lock().expect("Lock failed").as_mut() {
            pending.timer = Some(handle);
        }
    }

    async fn ok_retransmission_tick(&self) {
        if self.inner.ack_received.load(Ordering::SeqCst) || self.state().is_terminal() {
            self.stop_ok_retransmission();
            return;
        }

        let (buf, addr, next, give_up) = {
            let mut guard = self.inner.pending_ok.lock().expect("Lock failed");
            let Some(pending) = guard.as_mut() else {
                return;
            };

            pending.elapsed += pending.interval;
            let give_up = pending.elapsed >= self.inner.timers.timeout();
            pending.interval = std::cmp::min(pending.interval * 2, self.inner.timers.t2);

            (pending.buf.clone(), pending.addr, pending.interval, give_up)
        };

        if give_up {
            // No ACK for 64·T1; the session never completed.
            self.stop_ok_retransmission();
            self.fail(DialogError::TransactionTimeout);
            return;
        }

        if let Err(err) = TransportLayer::send_buf(&self.inner.transport, &buf, &addr).await {
            log::info!("Failed to retransmit 2xx on {}: {}", self.id(), err);
        }

        self.schedule_ok_retransmission(next);
    }

    pub(crate) fn stop_ok_retransmission(&self) {
        if let Some(pending) = self.inner.pending_ok.lock().expect("Lock failed").take() {
            if let Some(timer) = pending.timer {
                self.inner.endpoint.wheel().cancel(&timer);
            }
        }
    }

    /// A second 2xx with a fresh remote tag: a forked INVITE. Each such
    /// 2xx establishes its own dialog.
    pub(crate) async fn fork(&self, remote_tag: &str, response: &IncomingResponse<'_>) -> Result<Dialog> {
        let src = &self.inner;

        let inner = DialogInner {
            endpoint: src.endpoint.clone(),
            role: src.role,
            call_id: src.call_id.clone(),
            local_tag: src.local_tag.clone(),
            remote_tag: Mutex::new(remote_tag.into()),
            fsm: ObservedFsm::new(dialog_fsm()),
            local_seq: src.local_seq.load(Ordering::SeqCst).into(),
            remote_seq: 0.into(),
            local_uri: src.local_uri.clone(),
            remote_uri: src.remote_uri.clone(),
            local_contact: src.local_contact.clone(),
            remote_target: Mutex::new(src.remote_target.lock().expect("Lock failed").clone()),
            route_set: Mutex::new(route_set_from_headers(&response.response().headers, true)),
            secure: src.secure,
            party: Mutex::new(src.party.lock().expect("Lock failed").clone()),
            transport: src.transport.clone(),
            timers: src.timers,
            max_forwards: src.max_forwards,
            invite_branch: Mutex::new(src.invite_branch.lock().expect("Lock failed").clone()),
            invite_cseq: src.invite_cseq.load(Ordering::SeqCst).into(),
            uas_invite_tsx: Mutex::new(None),
            last_ack: Mutex::new(None),
            pending_ok: Mutex::new(None),
            ack_received: false.into(),
            auth_retried: true.into(),
            sdp: src.sdp.clone(),
            authenticator: src.authenticator.clone(),
            remote_offer: Mutex::new(None),
            last_error: Mutex::new(None),
        };

        let dialog = Dialog { inner: Arc::new(inner) };

        if let Some(contact) = response
            .response()
            .headers
            .find_map(|h| if let Header::Contact(c) = h { Some(c) } else { None })
        {
            *dialog.inner.remote_target.lock().expect("Lock failed") = contact.uri().clone().into_owned();
        }

        dialog.inner.endpoint.dialogs().insert(dialog.clone());
        if let Some(party) = dialog
            .inner
            .party
            .lock()
            .expect("Lock failed")
            .clone()
            .and_then(|weak| weak.upgrade())
        {
            party.remember_dialog(dialog.clone());
        }

        log::debug!("Forked dialog {} from {}", dialog.id(), self.id());
        Ok(dialog)
    }

    /// Reissues the INVITE once with an Authorization header produced
    /// by the credential collaborator: same Call-ID, incremented CSeq,
    /// fresh branch.
    async fn retry_with_auth(&self, response: &IncomingResponse<'_>) -> Result<()> {
        let authenticator = self
            .inner
            .authenticator
            .clone()
            .ok_or(DialogError::InvalidRequest)?;

        let challenge = response
            .response()
            .headers
            .find_map(|h| {
                if let Header::Other(other) = h {
                    if AUTHENTICATE_HEADERS.iter().any(|name| other.name.eq_ignore_ascii_case(name)) {
                        return Some(other);
                    }
                }
                None
            })
            .map(|other| other.value.to_string())
            .ok_or(DialogError::MissingHeader("WWW-Authenticate"))?;

        let target = self.inner.remote_uri.clone();
        let authorization = authenticator
            .authorize(&challenge, &SipMethod::Invite, &target)
            .ok_or(DialogError::InvalidRequest)?;

        let branch = crate::generate_branch();
        let cseq = self.next_local_cseq();

        self.inner.invite_cseq.store(cseq, Ordering::SeqCst);
        *self.inner.invite_branch.lock().expect("Lock failed") = Some(branch.clone());

        let mut request = self.new_in_dialog_request(SipMethod::Invite, cseq, branch);
        request.headers.push(Header::Other(crate::headers::OtherHeader {
            name: "Authorization".into(),
            value: authorization.into(),
        }));

        if let Some(sdp) = &self.inner.sdp {
            request.headers.push(Header::ContentType(ContentType::new_sdp()));
            request.body = Some(std::borrow::Cow::Owned(sdp.offer().to_vec()));
        }

        let outgoing = self.to_outgoing(request).await?;
        InvClientTransaction::send(outgoing, &self.inner.endpoint, self.inner.timers, Some(self.key())).await?;

        Ok(())
    }
}

/// Builds the Contact URI advertised by a local socket.
trait IntoContactUri {
    fn into_contact_uri(self, user: Option<&str>) -> Uri<'static>;
}

impl IntoContactUri for std::net::SocketAddr {
    fn into_contact_uri(self, user: Option<&str>) -> Uri<'static> {
        let user = user.unwrap_or("sipua").to_owned();
        Uri::sip(user, self.into())
    }
}
