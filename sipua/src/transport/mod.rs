//! SIP Transport Layer.
//!
//! Owns the UDP sockets, serializes outbound messages, parses inbound
//! datagrams and routes them to the rest of the stack. Sockets are
//! reference-counted across [`Party`](crate::Party) handles and closed
//! only when unused and a linger period has passed.

use std::borrow::Cow;
use std::collections::HashMap;
use std::io::Write;
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use bytes::{BufMut, Bytes, BytesMut};
use tokio::sync::mpsc;

use crate::error::{Error, Result, SipParseError, TransportError};
use crate::headers::{CSeq, CallId, ContentLength, From as FromHdr, Header, Headers, SipHeaderParse, To, Via};
use crate::message::{Request, Response, SipMethod, SipMsg, StatusCode, StatusLine, TransportKind};
use crate::parser::Parser;
use crate::scheduler::TimerWheel;

pub mod udp;

pub use udp::UdpTransport;

/// How long an unreferenced socket stays open before the layer closes
/// it, so a Party churn does not rebind ports.
const SOCKET_LINGER: Duration = Duration::from_millis(500);

/// How many times a bind with an any-port request is retried against the
/// caller's port predicate.
const BIND_ATTEMPTS: usize = 20;

/// Delay before the single retry after a send returned `WouldBlock`.
const SEND_RETRY_DELAY: Duration = Duration::from_millis(20);

/// A predicate over locally chosen ports.
pub type PortFilter = dyn Fn(u16) -> bool + Send + Sync;

/// Abstraction over a SIP transport implementation.
#[async_trait::async_trait]
pub trait Transport: Sync + Send + 'static {
    /// Sends a buffer to the specified remote socket address.
    ///
    /// Returns the number of bytes sent or an I/O error.
    async fn send(&self, buf: &[u8], addr: &SocketAddr) -> Result<usize>;

    /// Returns the transport kind (e.g., UDP, TCP, TLS).
    fn tp_kind(&self) -> TransportKind;

    /// Returns the local socket address bound to this transport.
    fn addr(&self) -> SocketAddr;

    /// Checks if the provided address belongs to the same IP address
    /// family (IPv4 vs IPv6) as the local socket address.
    fn is_same_af(&self, addr: &SocketAddr) -> bool {
        let our_addr = self.addr();

        (addr.is_ipv4() && our_addr.is_ipv4()) || (addr.is_ipv6() && our_addr.is_ipv6())
    }

    /// Returns the local transport name.
    fn local_name(&self) -> Cow<'_, str>;

    /// Returns `true` if the transport is reliable (e.g., TCP or TLS).
    fn reliable(&self) -> bool;

    /// Returns `true` if the transport is secure (e.g., TLS).
    fn secure(&self) -> bool;

    /// Stops the receive loop, letting the socket close.
    fn shutdown(&self) {}

    /// Test hook: the datagrams sent so far, when the transport records
    /// them.
    #[cfg(test)]
    fn sent_log(&self) -> Option<Vec<Bytes>> {
        None
    }

    /// Returns the key that uniquely identifies this transport.
    fn key(&self) -> TransportKey {
        TransportKey::new(self.addr(), self.tp_kind())
    }
}

/// Identifies a transport connection in the layer's socket map.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct TransportKey {
    addr: SocketAddr,
    kind: TransportKind,
}

impl TransportKey {
    pub fn new(addr: SocketAddr, kind: TransportKind) -> Self {
        TransportKey { addr, kind }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }
}

/// The raw binary content of a packet or message body.
#[derive(Clone)]
pub struct Payload(pub(crate) Bytes);

impl Payload {
    #[inline]
    pub fn new(bytes: Bytes) -> Self {
        Payload(bytes)
    }

    /// Returns the raw byte buffer of this payload.
    pub fn buf(&self) -> &[u8] {
        &self.0
    }
}

/// A datagram as it came off the wire.
#[derive(Clone)]
pub struct Packet {
    /// The packet payload.
    pub payload: Payload,
    /// The address of the sender.
    pub addr: SocketAddr,
    /// The time the packet was received.
    pub time: SystemTime,
}

/// Converts a message into its wire bytes.
pub trait ToBytes: Sized {
    fn to_bytes(&self) -> Result<Bytes>;
}

fn write_msg_tail(buf_writer: &mut bytes::buf::Writer<BytesMut>, headers: &Headers<'_>, body: Option<&[u8]>) -> Result<()> {
    for header in headers.iter() {
        write!(buf_writer, "{header}\r\n")?;
    }

    // Emit Content-Length when the caller did not place one.
    let has_content_length = headers.iter().any(|h| matches!(h, Header::ContentLength(_)));
    if !has_content_length {
        let len = body.map(|b| b.len()).unwrap_or(0);
        write!(buf_writer, "{}: {}\r\n", ContentLength::NAME, len)?;
    }

    write!(buf_writer, "\r\n")?;
    if let Some(body) = body {
        buf_writer.write_all(body)?;
    }

    Ok(())
}

/// An outbound SIP request.
pub struct OutgoingRequest<'a> {
    /// The SIP request message.
    pub msg: Request<'a>,
    /// The address to send the request to.
    pub addr: SocketAddr,
    /// The serialized message, once frozen. Retransmissions reuse these
    /// exact bytes.
    pub buf: Option<Bytes>,
    /// The transport to use for sending the request.
    pub transport: Arc<dyn Transport>,
}

impl ToBytes for OutgoingRequest<'_> {
    fn to_bytes(&self) -> Result<Bytes> {
        let estimated_message_size = if self.msg.body.is_none() { 800 } else { 1500 };
        let buf = BytesMut::with_capacity(estimated_message_size);
        let mut buf_writer = buf.writer();

        write!(buf_writer, "{}", &self.msg.req_line)?;
        write_msg_tail(&mut buf_writer, &self.msg.headers, self.msg.body.as_deref())?;

        Ok(buf_writer.into_inner().freeze())
    }
}

/// An outbound SIP response.
pub struct OutgoingResponse<'a> {
    /// The SIP response message.
    pub response: Response<'a>,
    /// The address to send the response to.
    pub addr: SocketAddr,
    /// The serialized message, once frozen.
    pub buf: Option<Bytes>,
    /// The transport to use for sending the response.
    pub transport: Arc<dyn Transport>,
}

impl<'a> OutgoingResponse<'a> {
    /// Returns the response status code.
    pub fn status_code(&self) -> StatusCode {
        self.response.status_line.code
    }

    /// Returns the reason phrase.
    pub fn reason(&self) -> &str {
        &self.response.status_line.reason
    }

    /// Appends headers to the response.
    pub fn append_headers(&mut self, other: &mut Headers<'a>) {
        self.response.append_headers(other);
    }

    /// Returns `true` if this is a provisional response.
    pub fn is_provisional(&self) -> bool {
        self.response.status_line.code.is_provisional()
    }

    /// Sets the message body.
    pub fn set_body(&mut self, body: Cow<'a, [u8]>) {
        self.response.body = Some(body);
    }

    pub fn headers_mut(&mut self) -> &mut Headers<'a> {
        &mut self.response.headers
    }
}

impl ToBytes for OutgoingResponse<'_> {
    fn to_bytes(&self) -> Result<Bytes> {
        let estimated_message_size = if self.response.body.is_none() { 800 } else { 1500 };
        let buf = BytesMut::with_capacity(estimated_message_size);
        let mut buf_writer = buf.writer();

        write!(buf_writer, "{}", &self.response.status_line)?;
        write_msg_tail(&mut buf_writer, &self.response.headers, self.response.body.as_deref())?;

        Ok(buf_writer.into_inner().freeze())
    }
}

/// The mandatory headers of an inbound message, pulled out once at
/// demux time so every layer above can reach them without searching.
#[derive(Debug, Clone)]
pub(crate) struct RequestHeaders<'a> {
    /// The topmost Via header.
    pub via: Via<'a>,
    /// The From header.
    pub from: FromHdr<'a>,
    /// The CSeq header.
    pub cseq: CSeq,
    /// The Call-ID header.
    pub call_id: CallId<'a>,
    /// The To header.
    pub to: To<'a>,
}

impl RequestHeaders<'_> {
    pub(crate) fn into_owned(self) -> RequestHeaders<'static> {
        RequestHeaders {
            via: self.via.into_owned(),
            from: self.from.into_owned(),
            cseq: self.cseq,
            call_id: self.call_id.into_owned(),
            to: self.to.into_owned(),
        }
    }
}

/// A received SIP request.
pub struct IncomingRequest<'req> {
    /// The SIP request message.
    pub(crate) request: Request<'req>,
    /// The transport the request arrived on.
    pub(crate) transport: Arc<dyn Transport>,
    /// The packet that carried the request.
    pub(crate) packet: Packet,
    /// The mandatory headers extracted from the request.
    pub(crate) request_headers: RequestHeaders<'req>,
}

impl IncomingRequest<'_> {
    /// Returns the `To` header of the request.
    pub fn to(&self) -> &To {
        &self.request_headers.to
    }

    /// Returns the `From` header of the request.
    pub fn from(&self) -> &FromHdr {
        &self.request_headers.from
    }

    /// Returns the `Call-ID` header of the request.
    pub fn call_id(&self) -> &CallId {
        &self.request_headers.call_id
    }

    /// Returns the `CSeq` header of the request.
    pub fn cseq(&self) -> &CSeq {
        &self.request_headers.cseq
    }

    /// Returns `true` if the request method matches.
    #[inline(always)]
    pub fn is_method(&self, method: &SipMethod) -> bool {
        self.request.method() == method
    }

    /// Returns the request method.
    pub fn method(&self) -> &SipMethod {
        self.request.method()
    }

    /// The source address of the packet.
    pub fn addr(&self) -> &SocketAddr {
        &self.packet.addr
    }

    pub(crate) fn request(&self) -> &Request<'_> {
        &self.request
    }
}

/// A received SIP response.
pub struct IncomingResponse<'r> {
    /// The SIP response message.
    pub(crate) response: Response<'r>,
    /// The transport the response arrived on.
    #[allow(dead_code)]
    pub(crate) transport: Arc<dyn Transport>,
    /// The packet that carried the response.
    pub(crate) packet: Packet,
    /// The mandatory headers extracted from the response.
    pub(crate) request_headers: RequestHeaders<'r>,
}

impl IncomingResponse<'_> {
    /// Returns the response status code.
    pub fn code(&self) -> StatusCode {
        self.response.code()
    }

    /// The source address of the packet.
    pub fn addr(&self) -> &SocketAddr {
        &self.packet.addr
    }

    pub(crate) fn response(&self) -> &Response<'_> {
        &self.response
    }
}

pub(crate) enum TransportEvent {
    /// A packet was received.
    Packet {
        transport: Arc<dyn Transport>,
        packet: Packet,
    },
    /// A lingered socket may now be closed.
    Linger(TransportKey),
}

pub(crate) type TransportTx = mpsc::Sender<TransportEvent>;
type TransportRx = mpsc::Receiver<TransportEvent>;

struct SocketSlot {
    transport: Arc<dyn Transport>,
    /// Number of parties holding this socket.
    refs: usize,
    /// Set when `refs` hit zero; bumped on re-acquire so a stale linger
    /// timer does not close a busy socket.
    generation: u64,
    exclusive: bool,
}

/// Transport layer: the socket map and the inbound demultiplexer.
pub struct TransportLayer {
    /// Sockets indexed by their unique keys.
    sockets: Mutex<HashMap<TransportKey, SocketSlot>>,
    /// The sender used by receive loops to post events.
    transport_tx: TransportTx,
    /// The receiver side, taken once by `handle_events`.
    transport_rx: Mutex<Option<TransportRx>>,
    /// The wheel used for linger timers.
    wheel: TimerWheel,
    /// Datagrams that failed to parse.
    parse_failures: AtomicUsize,
    /// Responses that matched no transaction.
    orphan_responses: AtomicUsize,
}

impl TransportLayer {
    pub(crate) fn new(wheel: TimerWheel) -> Self {
        let (transport_tx, transport_rx) = mpsc::channel(1_000);
        let transport_rx = Mutex::new(Some(transport_rx));

        Self {
            transport_tx,
            transport_rx,
            wheel,
            sockets: Default::default(),
            parse_failures: AtomicUsize::new(0),
            orphan_responses: AtomicUsize::new(0),
        }
    }

    pub(crate) fn sender(&self) -> &TransportTx {
        &self.transport_tx
    }

    pub(crate) fn socket_count(&self) -> usize {
        self.sockets.lock().expect("Lock failed").len()
    }

    pub(crate) fn parse_failure_count(&self) -> usize {
        self.parse_failures.load(Ordering::SeqCst)
    }

    pub(crate) fn orphan_response_count(&self) -> usize {
        self.orphan_responses.load(Ordering::SeqCst)
    }

    /// Acquires a UDP socket for a listener.
    ///
    /// An existing non-exclusive socket whose local address satisfies
    /// the request is reused and its reference count bumped. Otherwise
    /// a new socket is bound: an explicit port exactly once, port 0 (or
    /// none) retried up to 20 times until the chosen port satisfies
    /// `filter`.
    pub(crate) async fn acquire_udp(
        &self,
        addr: Option<IpAddr>,
        port: Option<u16>,
        filter: Option<&Arc<PortFilter>>,
        exclusive: bool,
    ) -> Result<Arc<dyn Transport>> {
        if !exclusive {
            let mut sockets = self.sockets.lock().expect("Lock failed");
            let reusable = sockets.values_mut().find(|slot| {
                if slot.exclusive || slot.transport.tp_kind() != TransportKind::Udp {
                    return false;
                }
                let local = slot.transport.addr();
                if let Some(addr) = addr {
                    if local.ip() != addr {
                        return false;
                    }
                }
                if let Some(port) = port {
                    if local.port() != port {
                        return false;
                    }
                }
                if let Some(filter) = filter {
                    if !filter(local.port()) {
                        return false;
                    }
                }
                true
            });

            if let Some(slot) = reusable {
                slot.refs += 1;
                slot.generation += 1;
                return Ok(slot.transport.clone());
            }
        }

        let transport = self.bind_udp(addr, port, filter).await?;
        let key = transport.key();

        self.sockets.lock().expect("Lock failed").insert(
            key,
            SocketSlot {
                transport: transport.clone(),
                refs: 1,
                generation: 0,
                exclusive,
            },
        );

        Ok(transport)
    }

    async fn bind_udp(
        &self,
        addr: Option<IpAddr>,
        port: Option<u16>,
        filter: Option<&Arc<PortFilter>>,
    ) -> Result<Arc<dyn Transport>> {
        let ip = addr.unwrap_or_else(|| IpAddr::from([0u8, 0, 0, 0]));

        // An explicit port is bound exactly once; "any port" first tries
        // the default SIP port, then lets the OS choose under the
        // caller's predicate.
        let candidates: Vec<u16> = match port {
            Some(port) => vec![port],
            None => vec![5060, 0],
        };

        let mut last_err = None;
        for candidate in candidates {
            let attempts = if candidate == 0 { BIND_ATTEMPTS } else { 1 };

            // A fixed candidate the predicate rejects is not worth
            // binding at all.
            if candidate != 0 {
                if let Some(filter) = filter {
                    if !filter(candidate) {
                        continue;
                    }
                }
            }

            for _ in 0..attempts {
                match UdpTransport::bind(SocketAddr::new(ip, candidate), self.transport_tx.clone()).await {
                    Ok(transport) => {
                        let chosen = transport.addr().port();
                        if candidate == 0 {
                            if let Some(filter) = filter {
                                if !filter(chosen) {
                                    transport.shutdown();
                                    continue;
                                }
                            }
                        }
                        return Ok(Arc::new(transport));
                    }
                    Err(err) => last_err = Some(err),
                }
            }
        }

        Err(TransportError::BindFailed {
            addr: ip.to_string(),
            reason: last_err.map(|e| e.to_string()).unwrap_or_else(|| "no usable port".into()),
        }
        .into())
    }

    /// Releases one reference to a socket. The underlying socket closes
    /// only when the count reaches zero and the linger elapses without a
    /// re-acquire.
    pub(crate) fn release(&self, key: TransportKey) {
        let mut sockets = self.sockets.lock().expect("Lock failed");

        let Some(slot) = sockets.get_mut(&key) else {
            return;
        };

        slot.refs = slot.refs.saturating_sub(1);
        if slot.refs > 0 {
            return;
        }

        slot.generation += 1;
        let tx = self.transport_tx.clone();
        self.wheel.schedule(SOCKET_LINGER, move || {
            let _ = tx.try_send(TransportEvent::Linger(key));
        });
    }

    fn close_if_unused(&self, key: TransportKey) {
        let mut sockets = self.sockets.lock().expect("Lock failed");

        if let Some(slot) = sockets.get(&key) {
            if slot.refs == 0 {
                let slot = sockets.remove(&key).expect("checked above");
                slot.transport.shutdown();
                log::debug!("Closed lingered socket {}", key.addr());
            }
        }
    }

    /// Sends `buf` through `transport`, retrying once after 20 ms on
    /// `WouldBlock` and mapping unreachable errors to a terminal
    /// [`TransportError`].
    pub(crate) async fn send_buf(transport: &Arc<dyn Transport>, buf: &[u8], addr: &SocketAddr) -> Result<usize> {
        match transport.send(buf, addr).await {
            Ok(sent) => Ok(sent),
            Err(Error::Io(err)) if err.kind() == std::io::ErrorKind::WouldBlock => {
                tokio::time::sleep(SEND_RETRY_DELAY).await;
                transport.send(buf, addr).await
            }
            // ENETUNREACH / EHOSTUNREACH surface as terminal transport
            // errors to the owning transaction.
            Err(Error::Io(err)) if matches!(err.raw_os_error(), Some(101) | Some(113)) => {
                Err(TransportError::Unreachable(addr.to_string()).into())
            }
            Err(err) => Err(err),
        }
    }

    /// Runs the demultiplexer until every socket sender is gone.
    pub(crate) async fn handle_events(&self, endpoint: &crate::Endpoint) -> Result<()> {
        let mut rx = self
            .transport_rx
            .lock()
            .expect("Lock failed")
            .take()
            .expect("handle_events may only run once");

        while let Some(evt) = rx.recv().await {
            match evt {
                TransportEvent::Packet { transport, packet } => {
                    // Processed in arrival order: inputs to a given
                    // transaction stay FIFO.
                    let addr = packet.addr;
                    if let Err(err) = self.on_received_packet(transport, packet, endpoint).await {
                        log::debug!("Dropped packet from {}: {}", addr, err);
                    }
                }
                TransportEvent::Linger(key) => {
                    self.close_if_unused(key);
                }
            }
        }

        Ok(())
    }

    async fn on_received_packet(
        &self,
        transport: Arc<dyn Transport>,
        packet: Packet,
        endpoint: &crate::Endpoint,
    ) -> Result<()> {
        let payload = packet.payload.clone();
        let bytes = payload.buf();

        // Keep-alive pings.
        if bytes == b"\r\n\r\n" {
            transport.send(b"\r\n", &packet.addr).await?;
            return Ok(());
        } else if bytes == b"\r\n" {
            return Ok(());
        }

        // Parse the datagram.
        let mut parser = Parser::new(bytes);
        let mut msg = match parser.parse_sip_msg() {
            Ok(parsed_msg) => parsed_msg,
            Err(err) => {
                self.parse_failures.fetch_add(1, Ordering::SeqCst);
                log::warn!(
                    "Failed to parse {} bytes from {} {}: {}",
                    bytes.len(),
                    transport.tp_kind(),
                    packet.addr,
                    err
                );

                if let Error::Parse(parse_err) = &err {
                    self.maybe_reject(parse_err, None, &transport, &packet).await;
                }

                return Err(err);
            }
        };

        // Pull out the mandatory headers.
        let request_headers = match extract_request_headers(&msg) {
            Ok(headers) => headers,
            Err(parse_err) => {
                self.parse_failures.fetch_add(1, Ordering::SeqCst);
                // Only requests are answered; a broken response is
                // silently dropped.
                if matches!(msg, SipMsg::Request(_)) {
                    self.maybe_reject(&parse_err, Some(&msg), &transport, &packet).await;
                }
                return Err(parse_err.into());
            }
        };

        let mut request_headers = request_headers;
        // RFC 3581 §4: the server MUST insert a "received" parameter
        // with the source IP the request came from.
        request_headers.via.set_received(packet.addr.ip());

        match msg {
            SipMsg::Request(request) => {
                log::debug!("<= Request {} from /{}", request.method(), packet.addr);
                let request = IncomingRequest {
                    request,
                    transport,
                    packet,
                    request_headers,
                };
                endpoint.process_request(request).await
            }
            SipMsg::Response(response) => {
                log::debug!(
                    "<= Response ({} {}) from /{}",
                    response.code().into_i32(),
                    response.reason(),
                    packet.addr
                );
                let response = IncomingResponse {
                    response,
                    transport,
                    packet,
                    request_headers,
                };
                if !endpoint.process_response(response).await? {
                    self.orphan_responses.fetch_add(1, Ordering::SeqCst);
                }
                Ok(())
            }
        }
    }

    /// Answers a recoverable parse failure with a single minimal 4xx.
    /// Never retransmitted; the transaction layer is not involved.
    async fn maybe_reject(
        &self,
        err: &SipParseError,
        msg: Option<&SipMsg<'_>>,
        transport: &Arc<dyn Transport>,
        packet: &Packet,
    ) {
        if !err.recoverable || err.suggested_status >= 500 {
            return;
        }

        let code: StatusCode = err.suggested_status.into();
        let mut headers = Headers::new();

        // Mirror back whatever identification headers the sender gave
        // us, so it can correlate the rejection.
        if let Some(msg) = msg {
            for header in msg.headers().iter() {
                match header {
                    Header::Via(_) | Header::From(_) | Header::To(_) | Header::CallId(_) | Header::CSeq(_) => {
                        headers.push(header.clone());
                    }
                    _ => {}
                }
            }
        }

        let response = OutgoingResponse {
            response: Response {
                status_line: StatusLine::new(code, code.reason()),
                headers,
                body: None,
            },
            addr: packet.addr,
            buf: None,
            transport: transport.clone(),
        };

        match response.to_bytes() {
            Ok(buf) => {
                if let Err(send_err) = transport.send(&buf, &packet.addr).await {
                    log::debug!("Failed to send {} to {}: {}", code, packet.addr, send_err);
                } else {
                    log::debug!("=> Response {} {} (stateless reject)", code.into_i32(), code.reason());
                }
            }
            Err(encode_err) => log::debug!("Failed to encode reject: {}", encode_err),
        }
    }
}

fn extract_request_headers<'a>(msg: &SipMsg<'a>) -> std::result::Result<RequestHeaders<'a>, SipParseError> {
    let mut via: Option<Via> = None;
    let mut cseq: Option<CSeq> = None;
    let mut from: Option<FromHdr> = None;
    let mut call_id: Option<CallId> = None;
    let mut to: Option<To> = None;

    for header in msg.headers().iter() {
        match header {
            Header::Via(v) if via.is_none() => via = Some(v.clone()),
            Header::From(f) => from = Some(f.clone()),
            Header::To(t) => to = Some(t.clone()),
            Header::CallId(c) => call_id = Some(c.clone()),
            Header::CSeq(c) => cseq = Some(*c),
            _ => (),
        }
    }

    let Some(via) = via else {
        return Err(SipParseError::missing_header(Via::NAME));
    };
    let Some(from) = from else {
        return Err(SipParseError::missing_header(FromHdr::NAME));
    };
    let Some(to) = to else {
        return Err(SipParseError::missing_header(To::NAME));
    };
    let Some(call_id) = call_id else {
        return Err(SipParseError::missing_header(CallId::NAME));
    };
    let Some(cseq) = cseq else {
        return Err(SipParseError::missing_header(CSeq::NAME));
    };

    Ok(RequestHeaders {
        via,
        cseq,
        call_id,
        from,
        to,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::mock_transport;

    #[tokio::test]
    async fn test_acquire_reuses_socket_across_listeners() {
        let wheel = TimerWheel::new();
        let layer = TransportLayer::new(wheel);

        let ip: IpAddr = "127.0.0.1".parse().unwrap();
        let first = layer.acquire_udp(Some(ip), None, None, false).await.unwrap();
        let second = layer.acquire_udp(Some(ip), None, None, false).await.unwrap();

        assert_eq!(first.addr(), second.addr());
        assert_eq!(layer.socket_count(), 1);
    }

    #[tokio::test]
    async fn test_acquire_exclusive_binds_new_socket() {
        let wheel = TimerWheel::new();
        let layer = TransportLayer::new(wheel);

        let ip: IpAddr = "127.0.0.1".parse().unwrap();
        let first = layer.acquire_udp(Some(ip), None, None, false).await.unwrap();
        let second = layer.acquire_udp(Some(ip), None, None, true).await.unwrap();

        assert_ne!(first.addr().port(), second.addr().port());
        assert_eq!(layer.socket_count(), 2);
    }

    #[tokio::test]
    async fn test_port_filter_is_honored() {
        let wheel = TimerWheel::new();
        let layer = TransportLayer::new(wheel);

        let ip: IpAddr = "127.0.0.1".parse().unwrap();
        let filter: Arc<PortFilter> = Arc::new(|port| port % 2 == 0);
        let transport = layer.acquire_udp(Some(ip), None, Some(&filter), false).await.unwrap();

        assert_eq!(transport.addr().port() % 2, 0);
    }

    #[tokio::test]
    async fn test_release_keeps_socket_while_referenced() {
        let wheel = TimerWheel::new();
        let layer = TransportLayer::new(wheel);

        let ip: IpAddr = "127.0.0.1".parse().unwrap();
        let first = layer.acquire_udp(Some(ip), None, None, false).await.unwrap();
        let _second = layer.acquire_udp(Some(ip), None, None, false).await.unwrap();

        layer.release(first.key());
        assert_eq!(layer.socket_count(), 1);
    }

    #[test]
    fn test_parse_serialize_roundtrip() {
        let wire = concat!(
            "INVITE sip:bob@biloxi.com SIP/2.0\r\n",
            "Via: SIP/2.0/UDP pc33.atlanta.com:5060;branch=z9hG4bK776asdhds\r\n",
            "Max-Forwards: 70\r\n",
            "To: <sip:bob@biloxi.com>\r\n",
            "From: <sip:alice@atlanta.com>;tag=1928301774\r\n",
            "Call-ID: a84b4c76e66710\r\n",
            "CSeq: 314159 INVITE\r\n",
            "Contact: <sip:alice@pc33.atlanta.com>\r\n",
            "Record-Route: <sip:p1.atlanta.com;lr>\r\n",
            "X-Custom: opaque; stays=verbatim\r\n",
            "Content-Length: 0\r\n\r\n",
        );

        let mut parser = Parser::new(wire.as_bytes());
        let first = parser.parse_sip_msg().unwrap();
        let SipMsg::Request(request) = first else {
            panic!("expected a request");
        };

        let transport = mock_transport();
        let outgoing = OutgoingRequest {
            msg: request,
            addr: transport.addr(),
            buf: None,
            transport,
        };
        let bytes = outgoing.to_bytes().unwrap();

        // Reparsing the serialized form yields the same message.
        let mut reparser = Parser::new(&bytes);
        let second = reparser.parse_sip_msg().unwrap();
        let reparsed = second.as_request().unwrap();

        assert_eq!(reparsed.req_line, outgoing.msg.req_line);
        assert_eq!(reparsed.headers, outgoing.msg.headers);
        assert_eq!(reparsed.body, outgoing.msg.body);
    }

    #[test]
    fn test_request_serialization_appends_content_length() {
        let (msg, _) = crate::test_utils::invite_request_parts();
        let transport = mock_transport();

        let outgoing = OutgoingRequest {
            msg,
            addr: transport.addr(),
            buf: None,
            transport,
        };

        let bytes = outgoing.to_bytes().unwrap();
        let text = String::from_utf8_lossy(&bytes);

        assert!(text.starts_with("INVITE "));
        assert!(text.contains("Content-Length: 0\r\n"));
        assert!(text.ends_with("\r\n\r\n"));
    }
}
