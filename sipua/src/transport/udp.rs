//! SIP UDP Transport.
//!
//! Binds a UDP socket and feeds received datagrams into the transport
//! layer's event channel.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::SystemTime;

use tokio::net::{ToSocketAddrs, UdpSocket};
use tokio_util::sync::CancellationToken;

use super::{Packet, Payload, Transport, TransportEvent, TransportTx};
use crate::error::Result;
use crate::message::TransportKind;

#[derive(Debug)]
struct Inner {
    sock: UdpSocket,
    addr: SocketAddr,
    local_name: String,
    closed: CancellationToken,
}

/// UDP transport implementation.
#[derive(Debug, Clone)]
pub struct UdpTransport(Arc<Inner>);

impl UdpTransport {
    /// Binds a UDP socket to the specified address and spawns its
    /// receive loop posting into `sender`.
    pub(crate) async fn bind<A: ToSocketAddrs>(addr: A, sender: TransportTx) -> Result<Self> {
        let sock = UdpSocket::bind(addr).await?;

        let addr = sock.local_addr()?;
        let local_name = crate::get_local_name(&addr);

        let udp = Self(Arc::new(Inner {
            sock,
            addr,
            local_name,
            closed: CancellationToken::new(),
        }));

        log::debug!("SIP {} transport listening on {}", TransportKind::Udp, udp.0.addr);

        tokio::spawn(Self::recv_loop(udp.clone(), sender));

        Ok(udp)
    }

    async fn recv_loop(udp: UdpTransport, sender: TransportTx) -> Result<()> {
        // Large enough for any UDP SIP message that is not fragmented.
        let mut buf = vec![0u8; 4000];
        let transport: Arc<dyn Transport> = Arc::new(udp.clone());

        loop {
            let (len, addr) = tokio::select! {
                received = udp.0.sock.recv_from(&mut buf) => received?,
                _ = udp.0.closed.cancelled() => return Ok(()),
            };

            let datagram = bytes::Bytes::copy_from_slice(&buf[..len]);

            let packet = Packet {
                payload: Payload::new(datagram),
                addr,
                time: SystemTime::now(),
            };

            sender
                .send(TransportEvent::Packet {
                    transport: transport.clone(),
                    packet,
                })
                .await
                .map_err(|_| crate::Error::ChannelClosed)?;
        }
    }
}

#[async_trait::async_trait]
impl Transport for UdpTransport {
    async fn send(&self, buf: &[u8], addr: &SocketAddr) -> Result<usize> {
        Ok(self.0.sock.send_to(buf, addr).await?)
    }

    fn tp_kind(&self) -> TransportKind {
        TransportKind::Udp
    }

    fn reliable(&self) -> bool {
        false
    }

    fn secure(&self) -> bool {
        false
    }

    fn addr(&self) -> SocketAddr {
        self.0.addr
    }

    fn local_name(&self) -> std::borrow::Cow<'_, str> {
        std::borrow::Cow::Borrowed(&self.0.local_name)
    }

    fn shutdown(&self) {
        self.0.closed.cancel();
    }
}

#[cfg(test)]
mod tests {
    use tokio::sync::mpsc;

    use super::*;

    const MSG_TEST: &[u8] = b"REGISTER sip:registrar.biloxi.com SIP/2.0\r\n\
        Via: SIP/2.0/UDP bobspc.biloxi.com:5060;branch=z9hG4bKnashds7\r\n\
        Max-Forwards: 70\r\n\
        To: Bob <sip:bob@biloxi.com>\r\n\
        From: Bob <sip:bob@biloxi.com>;tag=456248\r\n\
        Call-ID: 843817637684230@998sdasdh09\r\n\
        CSeq: 1826 REGISTER\r\n\
        Contact: <sip:bob@192.0.2.4>\r\n\
        Expires: 7200\r\n\
        Content-Length: 0\r\n\r\n";

    #[tokio::test]
    async fn test_recv_msg() {
        let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
        let (tx, mut rx) = mpsc::channel(1);

        let udp = UdpTransport::bind(addr, tx).await.unwrap();
        let client = UdpSocket::bind(addr).await.unwrap();

        client.send_to(MSG_TEST, udp.addr()).await.unwrap();

        let TransportEvent::Packet { transport: _, packet } = rx.recv().await.unwrap() else {
            unreachable!();
        };

        assert_eq!(packet.payload.buf(), MSG_TEST);

        let client_addr = client.local_addr().unwrap();
        assert_eq!(packet.addr, client_addr);
    }

    #[tokio::test]
    async fn test_send_msg() {
        let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
        let (tx, _rx) = mpsc::channel(1);

        let udp = UdpTransport::bind(addr, tx).await.unwrap();
        let client = UdpSocket::bind(addr).await.unwrap();

        let client_addr = client.local_addr().unwrap();

        udp.send(MSG_TEST, &client_addr).await.unwrap();

        let mut buf = [0; MSG_TEST.len()];
        let len = client.recv(&mut buf).await.unwrap();

        assert!(len == MSG_TEST.len());
        assert_eq!(&buf[..len], MSG_TEST);
    }

    #[tokio::test]
    async fn test_shutdown_stops_recv_loop() {
        let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
        let (tx, mut rx) = mpsc::channel(1);

        let udp = UdpTransport::bind(addr, tx).await.unwrap();
        udp.shutdown();

        // The loop exits, dropping its sender side.
        assert!(rx.recv().await.is_none());
    }
}
