//! Shared test fixtures: a recording mock transport and canned
//! messages.

use std::net::SocketAddr;
use std::sync::Arc;

use crate::headers::{CSeq, CallId, Contact, Header, Headers, SipHeaderParse};
use crate::message::{Request, RequestLine, SipMethod, Uri};
use crate::transport::Transport;

pub(crate) use mock::mock_transport;

/// A canned INVITE request plus the address it targets.
pub(crate) fn invite_request_parts() -> (Request<'static>, SocketAddr) {
    let request = mock::request_msg(SipMethod::Invite);
    (request, "127.0.0.1:5060".parse().unwrap())
}

pub(crate) mod mock {
    use super::*;
    use std::sync::Mutex;
    use std::time::SystemTime;

    use bytes::Bytes;

    use crate::endpoint::Endpoint;
    use crate::message::{Response, StatusCode, StatusLine, TransportKind};
    use crate::transport::{IncomingRequest, IncomingResponse, OutgoingRequest, Packet, Payload, RequestHeaders};

    /// A transport that never touches the network and records every
    /// datagram handed to it.
    pub(crate) struct MockUdpTransport {
        sent: Mutex<Vec<Bytes>>,
    }

    impl MockUdpTransport {
        pub(crate) fn new() -> Arc<Self> {
            Arc::new(Self {
                sent: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait::async_trait]
    impl Transport for MockUdpTransport {
        async fn send(&self, buf: &[u8], _addr: &SocketAddr) -> crate::Result<usize> {
            self.sent.lock().expect("Lock failed").push(Bytes::copy_from_slice(buf));
            Ok(buf.len())
        }

        fn tp_kind(&self) -> TransportKind {
            TransportKind::Udp
        }

        fn addr(&self) -> SocketAddr {
            "127.0.0.1:5060".parse().unwrap()
        }

        fn reliable(&self) -> bool {
            false
        }

        fn secure(&self) -> bool {
            false
        }

        fn local_name(&self) -> std::borrow::Cow<'_, str> {
            std::borrow::Cow::Borrowed("127.0.0.1:5060")
        }

        fn sent_log(&self) -> Option<Vec<Bytes>> {
            Some(self.sent.lock().expect("Lock failed").clone())
        }
    }

    pub(crate) fn mock_transport() -> Arc<dyn Transport> {
        MockUdpTransport::new()
    }

    /// The datagrams a mock transport has sent.
    pub(crate) fn sent_datagrams(transport: &Arc<dyn Transport>) -> Vec<Bytes> {
        transport.sent_log().unwrap_or_default()
    }

    /// An endpoint with default layers and timers.
    pub(crate) fn default_endpoint() -> Endpoint {
        Endpoint::builder().with_name("test-endpoint").build()
    }

    fn base_headers(method: SipMethod) -> (crate::headers::Via<'static>, Headers<'static>) {
        let via = crate::headers::Via::from_bytes(
            "SIP/2.0/UDP 127.0.0.1:5060;branch=z9hG4bK3060200;received=127.0.0.1".as_bytes(),
        )
        .unwrap()
        .into_owned();
        let from = crate::headers::From::from_bytes("Alice <sip:alice@127.0.0.1:5060>;tag=9fxced76sl".as_bytes())
            .unwrap()
            .into_owned();
        let to = crate::headers::To::from_bytes("Bob <sip:bob@127.0.0.1:5060>".as_bytes())
            .unwrap()
            .into_owned();
        let contact = Contact::from_bytes("<sip:alice@127.0.0.1:5060>".as_bytes()).unwrap().into_owned();

        let mut headers = Headers::with_capacity(6);
        headers.push(Header::Via(via.clone()));
        headers.push(Header::From(from));
        headers.push(Header::To(to));
        headers.push(Header::CallId(CallId::new("bs9ki9iqbee8k5kal8mpqb")));
        headers.push(Header::CSeq(CSeq::new(1, method)));
        headers.push(Header::Contact(contact));

        (via, headers)
    }

    pub(crate) fn request_msg(method: SipMethod) -> Request<'static> {
        let uri = Uri::from_static("sip:bob@127.0.0.1:5060").unwrap();
        let (_, headers) = base_headers(method);

        Request {
            req_line: RequestLine { method, uri },
            headers,
            body: None,
        }
    }

    fn request_headers(method: SipMethod) -> RequestHeaders<'static> {
        let (via, headers) = base_headers(method);

        let from = headers
            .find_map(|h| if let Header::From(f) = h { Some(f) } else { None })
            .unwrap()
            .clone();
        let to = headers
            .find_map(|h| if let Header::To(t) = h { Some(t) } else { None })
            .unwrap()
            .clone();

        RequestHeaders {
            via,
            from,
            cseq: CSeq::new(1, method),
            call_id: CallId::new("bs9ki9iqbee8k5kal8mpqb"),
            to,
        }
    }

    pub(crate) fn outgoing_request(method: SipMethod) -> OutgoingRequest<'static> {
        let transport = mock_transport();

        OutgoingRequest {
            msg: request_msg(method),
            addr: transport.addr(),
            buf: None,
            transport,
        }
    }

    pub(crate) fn incoming_request(method: SipMethod) -> IncomingRequest<'static> {
        let transport = mock_transport();
        let packet = Packet {
            payload: Payload::new(Bytes::new()),
            addr: transport.addr(),
            time: SystemTime::now(),
        };

        IncomingRequest {
            request: request_msg(method),
            transport,
            packet,
            request_headers: request_headers(method),
        }
    }

    pub(crate) fn incoming_response(code: StatusCode, method: SipMethod) -> IncomingResponse<'static> {
        let transport = mock_transport();
        let (_, headers) = base_headers(method);

        let mut response = Response::new(StatusLine::new(code, code.reason()));
        response.headers = headers;

        IncomingResponse {
            response,
            packet: Packet {
                payload: Payload::new(Bytes::new()),
                addr: transport.addr(),
                time: SystemTime::now(),
            },
            transport,
            request_headers: request_headers(method),
        }
    }

    /// A response whose To header carries the given remote tag, as a
    /// dialog-establishing answer would.
    pub(crate) fn incoming_response_tagged(code: StatusCode, method: SipMethod, tag: &str) -> IncomingResponse<'static> {
        let mut incoming = incoming_response(code, method);

        incoming.request_headers.to.set_tag(Some(tag.to_owned()));
        for header in incoming.response.headers.iter_mut() {
            if let Header::To(to) = header {
                to.set_tag(Some(tag.to_owned()));
            }
        }

        incoming
    }
}
