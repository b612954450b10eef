//! End-to-end call flows over loopback UDP.

use std::time::Duration;

use async_trait::async_trait;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;

use sipua::dialog::{Dialog, DialogState};
use sipua::message::StatusCode;
use sipua::transaction::TimerConfig;
use sipua::{DialogError, Endpoint, Party, PartyConfig, PartyHandler};

const WAIT: Duration = Duration::from_secs(5);

/// Rings, then answers every inbound INVITE.
struct AutoAnswer {
    dialogs: mpsc::UnboundedSender<Dialog>,
}

#[async_trait]
impl PartyHandler for AutoAnswer {
    async fn on_inbound_invite(&self, dialog: &Dialog) {
        dialog.ring().await.expect("ring");
        dialog.accept().await.expect("accept");
        let _ = self.dialogs.send(dialog.clone());
    }
}

/// Rings and leaves the call pending forever.
struct RingOnly {
    dialogs: mpsc::UnboundedSender<Dialog>,
}

#[async_trait]
impl PartyHandler for RingOnly {
    async fn on_inbound_invite(&self, dialog: &Dialog) {
        dialog.ring().await.expect("ring");
        let _ = self.dialogs.send(dialog.clone());
    }
}

/// Reports which party got the INVITE.
struct TagInvite {
    index: usize,
    hits: mpsc::UnboundedSender<usize>,
}

#[async_trait]
impl PartyHandler for TagInvite {
    async fn on_inbound_invite(&self, _dialog: &Dialog) {
        let _ = self.hits.send(self.index);
    }
}

struct Quiet;

impl PartyHandler for Quiet {}

fn loopback_config(aor: &str) -> PartyConfig {
    PartyConfig::new()
        .with_aor(aor)
        .expect("valid aor")
        .with_listen_addr("127.0.0.1".parse().unwrap())
        .with_listen_port(0)
}

#[tokio::test]
async fn basic_call_confirms_and_terminates() {
    let endpoint_a = Endpoint::builder().with_name("a").build();
    let endpoint_b = Endpoint::builder().with_name("b").build();

    let (tx, mut inbound) = mpsc::unbounded_channel();
    let bob = Party::new(&endpoint_b, loopback_config("bob@127.0.0.1"), AutoAnswer { dialogs: tx });
    let bob_addr = bob.listen().await.unwrap();

    let alice = Party::new(&endpoint_a, loopback_config("alice@127.0.0.1"), Quiet);
    alice.listen().await.unwrap();

    let dialog = alice
        .invite(&format!("sip:bob@127.0.0.1:{}", bob_addr.port()))
        .await
        .unwrap();

    let confirmed = dialog.wait_for_state(|s| *s == DialogState::Confirmed, WAIT).await;
    assert_eq!(confirmed, Some(DialogState::Confirmed));

    let bob_dialog = inbound.recv().await.unwrap();
    let bob_confirmed = bob_dialog.wait_for_state(|s| *s == DialogState::Confirmed, WAIT).await;
    assert_eq!(bob_confirmed, Some(DialogState::Confirmed));

    dialog.bye().await.unwrap();

    assert_eq!(dialog.state(), DialogState::Terminated);
    let ended = bob_dialog
        .wait_for_state(|s| *s == DialogState::Terminated, WAIT)
        .await;
    assert_eq!(ended, Some(DialogState::Terminated));
}

#[tokio::test]
async fn lost_invite_is_retransmitted_with_identical_bytes() {
    let endpoint_a = Endpoint::builder().build();
    let endpoint_b = Endpoint::builder().build();

    let (tx, _inbound) = mpsc::unbounded_channel();
    let bob = Party::new(&endpoint_b, loopback_config("bob@127.0.0.1"), AutoAnswer { dialogs: tx });
    let bob_addr = bob.listen().await.unwrap();

    // A relay in front of Bob that drops the first datagram and
    // reports the bytes it saw.
    let relay = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let relay_addr = relay.local_addr().unwrap();
    let (seen_tx, mut seen) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        let mut buf = vec![0u8; 4000];
        let mut dropped = false;

        loop {
            let Ok((len, _from)) = relay.recv_from(&mut buf).await else {
                return;
            };
            let datagram = buf[..len].to_vec();
            let _ = seen_tx.send(datagram.clone());

            if !dropped {
                dropped = true;
                continue;
            }
            let _ = relay.send_to(&datagram, bob_addr).await;
        }
    });

    // Faster timers so the retransmission shows up quickly.
    let timers = TimerConfig::new(
        Duration::from_millis(100),
        Duration::from_millis(400),
        Duration::from_millis(500),
    );
    let alice = Party::new(
        &endpoint_a,
        loopback_config("alice@127.0.0.1").with_timers(timers),
        Quiet,
    );
    alice.listen().await.unwrap();

    let dialog = alice
        .invite(&format!("sip:bob@127.0.0.1:{}", relay_addr.port()))
        .await
        .unwrap();

    let confirmed = dialog.wait_for_state(|s| *s == DialogState::Confirmed, WAIT).await;
    assert_eq!(confirmed, Some(DialogState::Confirmed));

    // The second INVITE repeated the first byte for byte.
    let first = seen.recv().await.unwrap();
    let second = seen.recv().await.unwrap();
    assert_eq!(first, second);
}

#[tokio::test]
async fn silent_peer_times_out_with_error() {
    let endpoint = Endpoint::builder().build();

    // A socket that never answers.
    let silent = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let silent_addr = silent.local_addr().unwrap();

    let timers = TimerConfig::new(
        Duration::from_millis(50),
        Duration::from_millis(200),
        Duration::from_millis(250),
    );
    let alice = Party::new(
        &endpoint,
        loopback_config("alice@127.0.0.1").with_timers(timers),
        Quiet,
    );
    alice.listen().await.unwrap();

    let dialog = alice
        .invite(&format!("sip:void@127.0.0.1:{}", silent_addr.port()))
        .await
        .unwrap();

    // Timer B at 64·T1 = 3.2 s.
    let errored = dialog
        .wait_for_state(|s| *s == DialogState::Error, Duration::from_secs(10))
        .await;

    assert_eq!(errored, Some(DialogState::Error));
    assert_eq!(dialog.last_error(), Some(DialogError::TransactionTimeout));
}

#[tokio::test]
async fn cancel_race_terminates_both_sides() {
    let endpoint_a = Endpoint::builder().build();
    let endpoint_b = Endpoint::builder().build();

    let (tx, mut inbound) = mpsc::unbounded_channel();
    let bob = Party::new(&endpoint_b, loopback_config("bob@127.0.0.1"), RingOnly { dialogs: tx });
    let bob_addr = bob.listen().await.unwrap();

    let alice = Party::new(&endpoint_a, loopback_config("alice@127.0.0.1"), Quiet);
    alice.listen().await.unwrap();

    let dialog = alice
        .invite(&format!("sip:bob@127.0.0.1:{}", bob_addr.port()))
        .await
        .unwrap();

    // Wait for the 180 before cancelling.
    let early = dialog.wait_for_state(|s| *s == DialogState::Early, WAIT).await;
    assert_eq!(early, Some(DialogState::Early));

    dialog.cancel().await.unwrap();

    // The 487 terminates the caller side.
    let ended = dialog.wait_for_state(|s| *s == DialogState::Terminated, WAIT).await;
    assert_eq!(ended, Some(DialogState::Terminated));

    // The callee's dialog ends too.
    let bob_dialog = inbound.recv().await.unwrap();
    let bob_ended = bob_dialog
        .wait_for_state(|s| *s == DialogState::Terminated, WAIT)
        .await;
    assert_eq!(bob_ended, Some(DialogState::Terminated));
}

#[tokio::test]
async fn parties_share_one_socket_and_route_by_aor() {
    let endpoint = Endpoint::builder().build();
    let (hits_tx, mut hits) = mpsc::unbounded_channel();

    let mut parties = Vec::new();
    let mut addrs = Vec::new();

    for index in 0..100 {
        // No explicit port: everyone shares whatever the first Party
        // bound.
        let config = PartyConfig::new()
            .with_aor(&format!("p{index}@127.0.0.1"))
            .unwrap()
            .with_listen_addr("127.0.0.1".parse().unwrap());

        let party = Party::new(
            &endpoint,
            config,
            TagInvite {
                index,
                hits: hits_tx.clone(),
            },
        );
        addrs.push(party.listen().await.unwrap());
        parties.push(party);
    }

    // Exactly one socket serves them all.
    assert!(addrs.windows(2).all(|pair| pair[0] == pair[1]));

    // An INVITE addressed to p42 reaches p42 alone.
    let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let client_addr = client.local_addr().unwrap();
    let invite = format!(
        "INVITE sip:p42@127.0.0.1 SIP/2.0\r\n\
         Via: SIP/2.0/UDP {client_addr};branch=z9hG4bKsharedsock42\r\n\
         Max-Forwards: 70\r\n\
         To: <sip:p42@127.0.0.1>\r\n\
         From: <sip:probe@127.0.0.1>;tag=probe42\r\n\
         Call-ID: shared-socket-42\r\n\
         CSeq: 1 INVITE\r\n\
         Contact: <sip:probe@{client_addr}>\r\n\
         Content-Length: 0\r\n\r\n"
    );
    client.send_to(invite.as_bytes(), addrs[0]).await.unwrap();

    let hit = tokio::time::timeout(WAIT, hits.recv()).await.unwrap().unwrap();
    assert_eq!(hit, 42);

    // Nobody else was notified.
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(hits.try_recv().is_err());
}

#[tokio::test]
async fn missing_call_id_gets_a_400() {
    let endpoint = Endpoint::builder().build();

    let bob = Party::new(&endpoint, loopback_config("bob@127.0.0.1"), Quiet);
    let bob_addr = bob.listen().await.unwrap();

    let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let client_addr = client.local_addr().unwrap();

    let broken = format!(
        "INVITE sip:bob@127.0.0.1 SIP/2.0\r\n\
         Via: SIP/2.0/UDP {client_addr};branch=z9hG4bKnocallid\r\n\
         Max-Forwards: 70\r\n\
         To: <sip:bob@127.0.0.1>\r\n\
         From: <sip:probe@127.0.0.1>;tag=x1\r\n\
         CSeq: 1 INVITE\r\n\
         Content-Length: 0\r\n\r\n"
    );
    client.send_to(broken.as_bytes(), bob_addr).await.unwrap();

    let mut buf = vec![0u8; 2000];
    let (len, _) = tokio::time::timeout(WAIT, client.recv_from(&mut buf))
        .await
        .expect("a reply arrives")
        .unwrap();

    let reply = String::from_utf8_lossy(&buf[..len]).to_string();
    assert!(reply.starts_with("SIP/2.0 400 "), "got: {reply}");

    // One counted failure; nothing was retransmitted.
    assert_eq!(endpoint.parse_failures(), 1);
}

#[tokio::test]
async fn options_out_of_dialog_is_answered_with_allow() {
    let endpoint = Endpoint::builder().build();

    let bob = Party::new(&endpoint, loopback_config("bob@127.0.0.1"), Quiet);
    let bob_addr = bob.listen().await.unwrap();

    let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let client_addr = client.local_addr().unwrap();

    let options = format!(
        "OPTIONS sip:bob@127.0.0.1 SIP/2.0\r\n\
         Via: SIP/2.0/UDP {client_addr};branch=z9hG4bKopts1\r\n\
         Max-Forwards: 70\r\n\
         To: <sip:bob@127.0.0.1>\r\n\
         From: <sip:probe@127.0.0.1>;tag=o1\r\n\
         Call-ID: options-probe-1\r\n\
         CSeq: 7 OPTIONS\r\n\
         Content-Length: 0\r\n\r\n"
    );
    client.send_to(options.as_bytes(), bob_addr).await.unwrap();

    let mut buf = vec![0u8; 2000];
    let (len, _) = tokio::time::timeout(WAIT, client.recv_from(&mut buf))
        .await
        .expect("a reply arrives")
        .unwrap();

    let reply = String::from_utf8_lossy(&buf[..len]).to_string();
    assert!(reply.starts_with("SIP/2.0 200 "), "got: {reply}");
    assert!(reply.contains("Allow: INVITE, ACK, BYE, CANCEL, OPTIONS"), "got: {reply}");
}

#[tokio::test]
async fn terminate_byes_confirmed_dialogs() {
    let endpoint_a = Endpoint::builder().build();
    let endpoint_b = Endpoint::builder().build();

    let (tx, mut inbound) = mpsc::unbounded_channel();
    let bob = Party::new(&endpoint_b, loopback_config("bob@127.0.0.1"), AutoAnswer { dialogs: tx });
    let bob_addr = bob.listen().await.unwrap();

    let alice = Party::new(&endpoint_a, loopback_config("alice@127.0.0.1"), Quiet);
    alice.listen().await.unwrap();

    let dialog = alice
        .invite(&format!("sip:bob@127.0.0.1:{}", bob_addr.port()))
        .await
        .unwrap();
    dialog
        .wait_for_state(|s| *s == DialogState::Confirmed, WAIT)
        .await
        .expect("confirmed");

    let bob_dialog = inbound.recv().await.unwrap();

    alice.terminate().await.unwrap();

    let ended = dialog.wait_for_state(|s| *s == DialogState::Terminated, WAIT).await;
    assert_eq!(ended, Some(DialogState::Terminated));

    let bob_ended = bob_dialog
        .wait_for_state(|s| *s == DialogState::Terminated, WAIT)
        .await;
    assert_eq!(bob_ended, Some(DialogState::Terminated));
}

#[tokio::test]
async fn reject_propagates_failure_to_caller() {
    let endpoint_a = Endpoint::builder().build();
    let endpoint_b = Endpoint::builder().build();

    struct Decliner;

    #[async_trait]
    impl PartyHandler for Decliner {
        async fn on_inbound_invite(&self, dialog: &Dialog) {
            dialog.reject(StatusCode::BusyHere).await.expect("reject");
        }
    }

    let bob = Party::new(&endpoint_b, loopback_config("bob@127.0.0.1"), Decliner);
    let bob_addr = bob.listen().await.unwrap();

    let alice = Party::new(&endpoint_a, loopback_config("alice@127.0.0.1"), Quiet);
    alice.listen().await.unwrap();

    let dialog = alice
        .invite(&format!("sip:bob@127.0.0.1:{}", bob_addr.port()))
        .await
        .unwrap();

    let ended = dialog.wait_for_state(|s| *s == DialogState::Terminated, WAIT).await;
    assert_eq!(ended, Some(DialogState::Terminated));
}
