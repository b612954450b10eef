//! The user-facing side of the stack.
//!
//! A [`Party`] is one local user agent identity: it binds (or shares) a
//! UDP socket, registers its address-of-record so inbound requests
//! reach it, and starts or accepts INVITE dialogs.

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::{Arc, Mutex};

use crate::dialog::{Dialog, DialogConfig, DialogId, DialogState};
use crate::error::{DialogError, Result};
use crate::headers::{Allow, Header, Headers};
use crate::message::{HostPort, SipMethod, StatusCode, Uri};
use crate::transaction::{InvServerTransaction, ServerTransaction, TimerConfig};
use crate::transport::{IncomingRequest, PortFilter, Transport};
use crate::{Authenticator, Endpoint, SdpSession};

/// Callbacks a Party delivers to its owner.
///
/// Callbacks run on the stack's tasks with no internal lock held; they
/// may call back into the dialog freely.
#[async_trait::async_trait]
#[allow(unused_variables)]
pub trait PartyHandler: Sync + Send + 'static {
    /// A dialog-creating INVITE arrived for this Party's AOR. The
    /// dialog has already answered 100 Trying; accept, ring or reject
    /// it from here (or later, from another task).
    async fn on_inbound_invite(&self, dialog: &Dialog) {}

    /// A dialog owned by this Party changed state.
    async fn on_dialog_state(&self, dialog: &Dialog, old: DialogState, new: DialogState) {}
}

/// Configuration a Party starts from.
///
/// The identity fields are mutually derivable: setting the AOR or the
/// full URI populates username and host, and vice versa. Parsing
/// happens in the typed setters; nothing is interpreted at use time.
#[derive(Default, Clone)]
pub struct PartyConfig {
    username: Option<String>,
    host: Option<String>,
    listen_addr: Option<IpAddr>,
    listen_port: Option<u16>,
    port_filter: Option<Arc<PortFilter>>,
    exclusive_socket: bool,
    timers: Option<TimerConfig>,
    max_forwards: Option<u32>,
}

impl PartyConfig {
    pub fn new() -> Self {
        Default::default()
    }

    /// Sets the identity from an address-of-record, `user@host`.
    pub fn with_aor(mut self, aor: &str) -> Result<Self> {
        let Some((user, host)) = aor.split_once('@') else {
            return Err(DialogError::InvalidRequest.into());
        };

        self.username = Some(user.to_owned());
        self.host = Some(host.to_owned());
        Ok(self)
    }

    /// Sets the identity from a full SIP URI string; the string is
    /// parsed through the codec.
    pub fn with_uri(mut self, uri: &str) -> Result<Self> {
        let uri = Uri::parse_owned(uri)?;

        self.username = uri.username().map(str::to_owned);
        self.host = Some(uri.host_port.host.to_string());
        Ok(self)
    }

    pub fn with_username<T: AsRef<str>>(mut self, username: T) -> Self {
        self.username = Some(username.as_ref().to_owned());
        self
    }

    pub fn with_host<T: AsRef<str>>(mut self, host: T) -> Self {
        self.host = Some(host.as_ref().to_owned());
        self
    }

    pub fn with_listen_addr(mut self, addr: IpAddr) -> Self {
        self.listen_addr = Some(addr);
        self
    }

    pub fn with_listen_port(mut self, port: u16) -> Self {
        self.listen_port = Some(port);
        self
    }

    /// Restricts which locally chosen ports are acceptable when the
    /// port is left to the OS.
    pub fn with_port_filter<F>(mut self, filter: F) -> Self
    where
        F: Fn(u16) -> bool + Send + Sync + 'static,
    {
        self.port_filter = Some(Arc::new(filter));
        self
    }

    /// Demands a socket of its own instead of sharing one.
    pub fn with_exclusive_socket(mut self) -> Self {
        self.exclusive_socket = true;
        self
    }

    /// Overrides T1/T2/T4 for transactions this Party creates.
    pub fn with_timers(mut self, timers: TimerConfig) -> Self {
        self.timers = Some(timers);
        self
    }

    pub fn with_max_forwards(mut self, max_forwards: u32) -> Self {
        self.max_forwards = Some(max_forwards);
        self
    }

    /// The configured username, if any.
    pub fn username(&self) -> Option<&str> {
        self.username.as_deref()
    }

    /// The configured host, if any.
    pub fn host(&self) -> Option<&str> {
        self.host.as_deref()
    }

    /// The address-of-record derived from username and host.
    pub fn aor(&self) -> Option<String> {
        match (&self.username, &self.host) {
            (Some(user), Some(host)) => Some(format!("{user}@{host}")),
            _ => None,
        }
    }

    /// The full URI derived from the identity fields.
    pub fn uri(&self) -> Option<Uri<'static>> {
        let host = self.host.as_ref()?;
        let host_port: HostPort = host.parse().ok()?;

        Some(match &self.username {
            Some(user) => Uri::sip(user.clone(), host_port),
            None => Uri::without_params(crate::message::Scheme::Sip, None, host_port),
        })
    }
}

pub(crate) struct PartyInner {
    pub(crate) endpoint: Endpoint,
    pub(crate) config: Mutex<PartyConfig>,
    pub(crate) handler: Box<dyn PartyHandler>,
    pub(crate) sdp: Mutex<Option<Arc<dyn SdpSession>>>,
    pub(crate) authenticator: Mutex<Option<Arc<dyn Authenticator>>>,
    pub(crate) dialogs: Mutex<HashMap<DialogId, Dialog>>,
    pub(crate) socket: Mutex<Option<Arc<dyn Transport>>>,
    pub(crate) registered_aor: Mutex<Option<String>>,
}

/// One local user agent identity bound to an [`Endpoint`].
#[derive(Clone)]
pub struct Party {
    inner: Arc<PartyInner>,
}

impl Party {
    /// Creates a Party on the given endpoint. Nothing touches the
    /// network until [`Party::listen`] or [`Party::invite`].
    pub fn new(endpoint: &Endpoint, config: PartyConfig, handler: impl PartyHandler) -> Party {
        Party {
            inner: Arc::new(PartyInner {
                endpoint: endpoint.clone(),
                config: Mutex::new(config),
                handler: Box::new(handler),
                sdp: Mutex::new(None),
                authenticator: Mutex::new(None),
                dialogs: Mutex::new(HashMap::new()),
                socket: Mutex::new(None),
                registered_aor: Mutex::new(None),
            }),
        }
    }

    /// Installs the session-description collaborator used at the
    /// INVITE offer/answer boundaries.
    pub fn set_sdp_session(&self, sdp: Arc<dyn SdpSession>) {
        *self.inner.sdp.lock().expect("Lock failed") = Some(sdp);
    }

    /// Installs the credential collaborator consulted on 401/407.
    pub fn set_authenticator(&self, authenticator: Arc<dyn Authenticator>) {
        *self.inner.authenticator.lock().expect("Lock failed") = Some(authenticator);
    }

    /// The Party's current configuration snapshot.
    pub fn config(&self) -> PartyConfig {
        self.inner.config.lock().expect("Lock failed").clone()
    }

    /// Replaces the configuration. Identity changes take effect on the
    /// next `listen`.
    pub fn set_config(&self, config: PartyConfig) {
        *self.inner.config.lock().expect("Lock failed") = config;
    }

    /// Binds (or reuses) a UDP socket and registers this Party's AOR so
    /// inbound requests whose request-URI matches are routed here.
    ///
    /// Returns the local socket address.
    pub async fn listen(&self) -> Result<SocketAddr> {
        let (addr, port, filter, exclusive, aor) = {
            let config = self.inner.config.lock().expect("Lock failed");
            (
                config.listen_addr,
                config.listen_port,
                config.port_filter.clone(),
                config.exclusive_socket,
                config.aor(),
            )
        };

        let transport = self
            .inner
            .endpoint
            .transport()
            .acquire_udp(addr, port, filter.as_ref(), exclusive)
            .await?;
        let local = transport.addr();

        *self.inner.socket.lock().expect("Lock failed") = Some(transport);

        if let Some(aor) = aor {
            self.inner.endpoint.register_party(&aor, Arc::downgrade(&self.inner));
            *self.inner.registered_aor.lock().expect("Lock failed") = Some(aor);
        }

        Ok(local)
    }

    /// Starts an INVITE dialog towards `target` (a URI string, parsed
    /// through the codec).
    ///
    /// Asynchronous beyond the initial send: progress is observed on
    /// the returned [`Dialog`].
    pub async fn invite(&self, target: &str) -> Result<Dialog> {
        let target = Uri::parse_owned(target)?;
        self.invite_uri(target).await
    }

    /// Starts an INVITE dialog towards an already-parsed target URI.
    pub async fn invite_uri(&self, target: Uri<'static>) -> Result<Dialog> {
        if self.inner.socket.lock().expect("Lock failed").is_none() {
            self.listen().await?;
        }

        let transport = self
            .inner
            .socket
            .lock()
            .expect("Lock failed")
            .clone()
            .expect("listen() bound a socket");

        let (local_uri, username, dialog_config) = self.dialog_setup(&transport);
        let contact = Uri::sip(username, transport.addr().into());

        let dialog = Dialog::new_uac(
            &self.inner.endpoint,
            Arc::downgrade(&self.inner),
            local_uri,
            target,
            contact,
            dialog_config,
        );

        self.inner.endpoint.dialogs().insert(dialog.clone());
        self.inner.remember_dialog(dialog.clone());

        dialog.send_invite().await?;

        Ok(dialog)
    }

    /// Accepts an inbound INVITE dialog with a 200 OK.
    pub async fn accept(&self, dialog: &Dialog) -> Result<()> {
        dialog.accept().await
    }

    /// Rejects an inbound INVITE dialog with a failure status.
    pub async fn reject(&self, dialog: &Dialog, code: StatusCode) -> Result<()> {
        dialog.reject(code).await
    }

    /// The dialogs currently owned by this Party.
    pub fn dialogs(&self) -> Vec<Dialog> {
        self.inner.dialogs.lock().expect("Lock failed").values().cloned().collect()
    }

    /// Unregisters the AOR, BYEs every confirmed dialog and releases
    /// the socket reference.
    pub async fn terminate(&self) -> Result<()> {
        if let Some(aor) = self.inner.registered_aor.lock().expect("Lock failed").take() {
            self.inner.endpoint.unregister_party(&aor);
        }

        for dialog in self.dialogs() {
            if !dialog.state().is_terminal() {
                dialog.terminate();
            }
        }

        if let Some(socket) = self.inner.socket.lock().expect("Lock failed").take() {
            self.inner.endpoint.transport().release(socket.key());
        }

        Ok(())
    }

    fn dialog_setup(&self, transport: &Arc<dyn Transport>) -> (Uri<'static>, String, DialogConfig) {
        let config = self.inner.config.lock().expect("Lock failed");

        let username = config.username().unwrap_or("anonymous").to_owned();
        let local_uri = config.uri().unwrap_or_else(|| {
            // No identity configured; advertise the socket address.
            Uri::sip(username.clone(), transport.addr().into())
        });

        let dialog_config = DialogConfig {
            transport: transport.clone(),
            timers: config.timers.unwrap_or_else(|| self.inner.endpoint.timers()),
            max_forwards: config.max_forwards.unwrap_or(70),
            sdp: self.inner.sdp.lock().expect("Lock failed").clone(),
            authenticator: self.inner.authenticator.lock().expect("Lock failed").clone(),
        };

        (local_uri, username, dialog_config)
    }
}

impl PartyInner {
    pub(crate) fn remember_dialog(&self, dialog: Dialog) {
        self.dialogs.lock().expect("Lock failed").insert(dialog.id(), dialog);
    }

    pub(crate) fn forget_dialog(&self, id: &DialogId) {
        let mut dialogs = self.dialogs.lock().expect("Lock failed");
        // The id may have been re-keyed since insertion; fall back to
        // matching by key.
        if dialogs.remove(id).is_none() {
            dialogs.retain(|known, _| !(known.call_id == id.call_id && known.local_tag == id.local_tag));
        }
    }

    pub(crate) async fn on_dialog_state(party: &Arc<PartyInner>, dialog: &Dialog, old: DialogState, new: DialogState) {
        party.handler.on_dialog_state(dialog, old, new).await;
    }

    /// An out-of-dialog request whose request-URI matched this Party.
    pub(crate) async fn on_out_of_dialog_request(
        party: Arc<PartyInner>,
        endpoint: &Endpoint,
        request: IncomingRequest<'_>,
    ) -> Result<()> {
        let timers = {
            let config = party.config.lock().expect("Lock failed");
            config.timers.unwrap_or_else(|| endpoint.timers())
        };

        match *request.method() {
            SipMethod::Invite => Self::on_inbound_invite(party, endpoint, request, timers).await,
            SipMethod::Options => {
                let tsx = ServerTransaction::new(endpoint, &request, timers, None);
                let mut extra = Headers::new();
                extra.push(Header::Allow(Allow::dialog_methods()));
                tsx.respond(StatusCode::Ok, None, extra, None).await?;
                Ok(())
            }
            _ => {
                // REGISTER and friends are recognized but not served.
                let tsx = ServerTransaction::new(endpoint, &request, timers, None);
                tsx.respond(StatusCode::NotImplemented, None, Headers::new(), None).await?;
                Ok(())
            }
        }
    }

    async fn on_inbound_invite(
        party: Arc<PartyInner>,
        endpoint: &Endpoint,
        request: IncomingRequest<'_>,
        timers: TimerConfig,
    ) -> Result<()> {
        let dialog_config = {
            let config = party.config.lock().expect("Lock failed");
            DialogConfig {
                transport: request.transport.clone(),
                timers,
                max_forwards: config.max_forwards.unwrap_or(70),
                sdp: party.sdp.lock().expect("Lock failed").clone(),
                authenticator: party.authenticator.lock().expect("Lock failed").clone(),
            }
        };

        let dialog = match Dialog::new_uas(endpoint, Arc::downgrade(&party), &request, dialog_config) {
            Ok(dialog) => dialog,
            Err(err) => {
                // The INVITE cannot establish a dialog (no From tag, no
                // Contact); answer 400 and report the reason.
                let tsx = InvServerTransaction::new(endpoint, &request, timers, None);
                tsx.respond(StatusCode::BadRequest, None, Headers::new(), None).await?;
                return Err(err);
            }
        };

        let tsx = InvServerTransaction::new(endpoint, &request, timers, Some(dialog.key()));
        dialog.attach_uas_tsx(tsx.clone());

        endpoint.dialogs().insert(dialog.clone());
        party.remember_dialog(dialog.clone());

        tsx.respond(StatusCode::Trying, None, Headers::new(), None).await?;

        party.handler.on_inbound_invite(&dialog).await;

        Ok(())
    }
}
