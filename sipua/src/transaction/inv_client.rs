use std::sync::Arc;
use std::ops::Deref;

use crate::dialog::DialogKey;
use crate::error::{Result, TransactionError};
use crate::fsm::Fsm;
use crate::headers::{self, CSeq, Header, Headers, MaxForwards};
use crate::message::{Request, RequestLine, SipMethod, Uri};
use crate::transaction::{State, TimerConfig, TransactionInner, TsxAction, TsxInput, TsxKey};
use crate::transport::{IncomingResponse, OutgoingRequest};
use crate::Endpoint;

/// The parts of the original INVITE needed to build its ACK.
struct OriginalRequest {
    uri: Uri<'static>,
    via: headers::Via<'static>,
    from: headers::From<'static>,
    cseq: CSeq,
    call_id: headers::CallId<'static>,
}

/// An INVITE client transaction (RFC 3261 §17.1.1).
#[derive(Clone)]
pub struct InvClientTransaction {
    transaction: TransactionInner,
    request: Arc<OriginalRequest>,
}

fn invite_client_fsm() -> Fsm<State, TsxInput, TsxAction> {
    use State::*;
    use TsxAction::*;
    use TsxInput::*;

    Fsm::new(Calling)
        .route(Calling, Provisional, Proceeding, Some(Deliver))
        .route(Proceeding, Provisional, Proceeding, Some(Deliver))
        .route(Calling, Success, Terminated, Some(Deliver))
        .route(Proceeding, Success, Terminated, Some(Deliver))
        .route(Calling, Failure, Completed, Some(AckAndDeliver))
        .route(Proceeding, Failure, Completed, Some(AckAndDeliver))
        .route(Completed, Failure, Completed, Some(AckOnly))
        .route(Calling, TsxInput::Retransmit, Calling, Some(TsxAction::Retransmit))
        .route(Calling, Timeout, Terminated, None)
        .route(Completed, Linger, Terminated, None)
        .route(Calling, TransportFailed, Terminated, None)
        .route(Proceeding, TransportFailed, Terminated, None)
        .terminal(Terminated)
}

impl InvClientTransaction {
    /// Sends the INVITE and creates its client transaction.
    ///
    /// Timer A starts retransmitting for unreliable transports; Timer B
    /// bounds the whole transaction at 64·T1.
    pub(crate) async fn send(
        mut request: OutgoingRequest<'_>,
        endpoint: &Endpoint,
        timers: TimerConfig,
        dialog: Option<DialogKey>,
    ) -> Result<InvClientTransaction> {
        let tsx_layer = endpoint.transactions();
        let method = *request.msg.method();

        assert!(
            matches!(method, SipMethod::Invite),
            "Invalid method for client INVITE transaction: expected INVITE, got: {}",
            method
        );

        let mut via = None;
        let mut cseq = None;
        let mut call_id = None;
        let mut from = None;

        for header in request.msg.headers.iter() {
            match header {
                Header::From(f) => from = Some(f.clone()),
                Header::Via(v) => via = Some(v.clone()),
                Header::CallId(c) => call_id = Some(c.clone()),
                Header::CSeq(c) => cseq = Some(*c),
                _ => continue,
            }
        }

        let via = via.expect("INVITE carries a Via").into_owned();
        let branch = via.branch().expect("Via carries a branch").to_owned();
        let cseq = cseq.expect("INVITE carries a CSeq");
        let call_id = call_id.expect("INVITE carries a Call-ID").into_owned();
        let from = from.expect("INVITE carries a From").into_owned();

        let key = TsxKey::client(&branch, SipMethod::Invite);
        let transaction = TransactionInner::new_uac(&request, endpoint, key.clone(), invite_client_fsm(), timers);

        if let Some(dialog) = dialog {
            transaction.set_dialog(dialog);
        }

        transaction.tsx_send_request(&mut request).await?;

        let uri = request.msg.req_line.uri.clone().into_owned();
        let original = Arc::new(OriginalRequest {
            uri,
            via,
            cseq,
            call_id,
            from,
        });

        let uac_inv = InvClientTransaction {
            transaction,
            request: original,
        };

        tsx_layer.insert_client(key, super::ClientTsx::Invite(uac_inv.clone()));

        if !uac_inv.reliable() {
            uac_inv.arm_retransmit(timers.t1);
        }
        uac_inv.arm_timeout(timers.timeout(), TransactionError::TimeoutB);

        Ok(uac_inv)
    }

    pub(crate) async fn receive(&self, response: &IncomingResponse<'_>) -> Result<bool> {
        let code = response.code();
        self.transaction.set_last_status_code(code);

        let input = if code.is_provisional() {
            TsxInput::Provisional
        } else if code.is_success() {
            TsxInput::Success
        } else {
            TsxInput::Failure
        };

        let Some((transition, action)) = self.feed(input) else {
            // Stale or absorbed; nothing more to do.
            return Ok(true);
        };

        match action {
            Some(TsxAction::Deliver) => {
                if transition.from == State::Calling {
                    self.cancel_retransmit();
                }
                if code.is_final() {
                    self.cancel_timeout();
                }
                self.deliver(response).await;
            }
            Some(TsxAction::AckAndDeliver) => {
                self.cancel_retransmit();
                self.cancel_timeout();

                let mut ack = self.create_ack(response);
                self.tsx_send_request(&mut ack).await?;

                // Timer D: absorb final-response retransmissions.
                self.arm_linger(self.timers().linger_d());
                self.deliver(response).await;
            }
            Some(TsxAction::AckOnly) => {
                // 17.1.1.2: retransmitted finals re-trigger the ACK but
                // are not passed up to the TU.
                self.retransmit().await?;
            }
            _ => (),
        }

        Ok(true)
    }

    async fn deliver(&self, response: &IncomingResponse<'_>) {
        if let Some(dialog_key) = self.dialog_key() {
            self.endpoint().dialogs().on_invite_response(&dialog_key, response).await;
        }
    }

    /// Builds the ACK for a non-2xx final response (RFC 3261 §17.1.1.3):
    /// same branch, Request-URI and CSeq number as the INVITE, To taken
    /// from the response.
    fn create_ack<'a>(&self, response: &'a IncomingResponse<'a>) -> OutgoingRequest<'a> {
        let to = response
            .response()
            .headers
            .find_map(|h| if let Header::To(to) = h { Some(to) } else { None })
            .cloned()
            .unwrap_or_else(|| response.request_headers.to.clone());

        let cseq = CSeq {
            method: SipMethod::Ack,
            ..self.request.cseq
        };

        let original = &self.request;
        let mut ack_hdrs = Headers::with_capacity(6);

        ack_hdrs.push(Header::Via(original.via.clone()));
        ack_hdrs.push(Header::MaxForwards(MaxForwards::default()));
        ack_hdrs.push(Header::From(original.from.clone()));
        ack_hdrs.push(Header::To(to.into_owned()));
        ack_hdrs.push(Header::CallId(original.call_id.clone()));
        ack_hdrs.push(Header::CSeq(cseq));

        OutgoingRequest {
            msg: Request {
                req_line: RequestLine {
                    method: SipMethod::Ack,
                    uri: self.request.uri.clone(),
                },
                headers: ack_hdrs,
                body: None,
            },
            addr: self.addr(),
            buf: None,
            transport: self.transport().clone(),
        }
    }
}

impl Deref for InvClientTransaction {
    type Target = TransactionInner;

    fn deref(&self) -> &Self::Target {
        &self.transaction
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::StatusCode;
    use crate::test_utils::mock;
    use tokio::time::{self, Duration};

    #[tokio::test]
    async fn test_state_calling() {
        let endpoint = mock::default_endpoint();
        let request = mock::outgoing_request(SipMethod::Invite);

        let uac_inv = InvClientTransaction::send(request, &endpoint, endpoint.timers(), None)
            .await
            .unwrap();

        assert_eq!(uac_inv.state(), State::Calling);
    }

    #[tokio::test]
    async fn test_state_proceeding() {
        let endpoint = mock::default_endpoint();
        let request = mock::outgoing_request(SipMethod::Invite);
        let response = mock::incoming_response(StatusCode::Trying, SipMethod::Invite);

        let uac_inv = InvClientTransaction::send(request, &endpoint, endpoint.timers(), None)
            .await
            .unwrap();

        uac_inv.receive(&response).await.unwrap();

        assert_eq!(uac_inv.state(), State::Proceeding);
    }

    #[tokio::test]
    async fn test_state_completed_on_failure() {
        let endpoint = mock::default_endpoint();
        let request = mock::outgoing_request(SipMethod::Invite);
        let response = mock::incoming_response(StatusCode::BusyHere, SipMethod::Invite);

        let uac_inv = InvClientTransaction::send(request, &endpoint, endpoint.timers(), None)
            .await
            .unwrap();

        uac_inv.receive(&response).await.unwrap();

        assert_eq!(uac_inv.last_status_code(), Some(StatusCode::BusyHere));
        assert_eq!(uac_inv.state(), State::Completed);
    }

    #[tokio::test]
    async fn test_2xx_terminates_immediately() {
        let endpoint = mock::default_endpoint();
        let request = mock::outgoing_request(SipMethod::Invite);
        let response = mock::incoming_response(StatusCode::Ok, SipMethod::Invite);

        let uac_inv = InvClientTransaction::send(request, &endpoint, endpoint.timers(), None)
            .await
            .unwrap();

        uac_inv.receive(&response).await.unwrap();

        // ACK for a 2xx belongs to the TU, not this transaction.
        assert_eq!(uac_inv.state(), State::Terminated);
        assert_eq!(endpoint.transactions().client_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_a_doubles_and_caps_at_t2() {
        let endpoint = mock::default_endpoint();
        let request = mock::outgoing_request(SipMethod::Invite);

        let uac_inv = InvClientTransaction::send(request, &endpoint, endpoint.timers(), None)
            .await
            .unwrap();

        assert!(uac_inv.retrans_count() == 0);
        assert_eq!(uac_inv.state(), State::Calling);

        time::sleep(Duration::from_millis(500 + 10)).await;
        assert!(uac_inv.retrans_count() == 1);

        time::sleep(Duration::from_secs(1) + Duration::from_millis(10)).await;
        assert!(uac_inv.retrans_count() == 2);

        time::sleep(Duration::from_secs(2) + Duration::from_millis(10)).await;
        assert!(uac_inv.retrans_count() == 3);

        time::sleep(Duration::from_secs(4) + Duration::from_millis(10)).await;
        assert!(uac_inv.retrans_count() == 4);

        time::sleep(Duration::from_secs(4) + Duration::from_millis(10)).await;
        assert!(uac_inv.retrans_count() == 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retransmission_reuses_exact_bytes() {
        let endpoint = mock::default_endpoint();
        let request = mock::outgoing_request(SipMethod::Invite);

        let uac_inv = InvClientTransaction::send(request, &endpoint, endpoint.timers(), None)
            .await
            .unwrap();

        time::sleep(Duration::from_millis(500 + 10)).await;

        let sent = mock::sent_datagrams(uac_inv.transport());
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0], sent[1]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_b_terminates_with_timeout() {
        let endpoint = mock::default_endpoint();
        let request = mock::outgoing_request(SipMethod::Invite);

        let uac_inv = InvClientTransaction::send(request, &endpoint, endpoint.timers(), None)
            .await
            .unwrap();

        assert_eq!(uac_inv.state(), State::Calling);

        time::sleep(endpoint.timers().timeout() + Duration::from_millis(10)).await;

        assert_eq!(uac_inv.state(), State::Terminated);
        assert_eq!(uac_inv.last_error(), Some(TransactionError::TimeoutB));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_d_after_failure() {
        let endpoint = mock::default_endpoint();
        let request = mock::outgoing_request(SipMethod::Invite);
        let response = mock::incoming_response(StatusCode::BusyHere, SipMethod::Invite);

        let uac_inv = InvClientTransaction::send(request, &endpoint, endpoint.timers(), None)
            .await
            .unwrap();

        uac_inv.receive(&response).await.unwrap();
        assert_eq!(uac_inv.state(), State::Completed);

        time::sleep(endpoint.timers().linger_d() + Duration::from_millis(10)).await;

        assert_eq!(uac_inv.state(), State::Terminated);
    }

    #[tokio::test]
    async fn test_failure_triggers_ack() {
        let endpoint = mock::default_endpoint();
        let request = mock::outgoing_request(SipMethod::Invite);
        let response = mock::incoming_response(StatusCode::BusyHere, SipMethod::Invite);

        let uac_inv = InvClientTransaction::send(request, &endpoint, endpoint.timers(), None)
            .await
            .unwrap();

        uac_inv.receive(&response).await.unwrap();

        let sent = mock::sent_datagrams(uac_inv.transport());
        let last = String::from_utf8_lossy(&sent[sent.len() - 1]).to_string();

        assert!(last.starts_with("ACK "));
        assert!(last.contains("CSeq: 1 ACK"));
    }

    #[tokio::test]
    async fn test_retransmitted_failure_is_absorbed_with_ack() {
        let endpoint = mock::default_endpoint();
        let request = mock::outgoing_request(SipMethod::Invite);
        let response = mock::incoming_response(StatusCode::BusyHere, SipMethod::Invite);

        let uac_inv = InvClientTransaction::send(request, &endpoint, endpoint.timers(), None)
            .await
            .unwrap();

        uac_inv.receive(&response).await.unwrap();
        let before = mock::sent_datagrams(uac_inv.transport()).len();

        // The peer retransmits the final response.
        uac_inv.receive(&response).await.unwrap();

        let sent = mock::sent_datagrams(uac_inv.transport());
        assert_eq!(sent.len(), before + 1);
        assert_eq!(sent[before - 1], sent[before]);
        assert_eq!(uac_inv.state(), State::Completed);
    }
}
