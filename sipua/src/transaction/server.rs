use std::ops::Deref;
use std::sync::Arc;

use bytes::Bytes;

use crate::dialog::DialogKey;
use crate::error::{Result, TransactionError};
use crate::fsm::Fsm;
use crate::headers::Headers;
use crate::message::{SipMethod, StatusCode};
use crate::transaction::{State, TimerConfig, TransactionInner, TsxAction, TsxInput, TsxKey, UasContext};
use crate::transport::{IncomingRequest, OutgoingResponse, ToBytes};
use crate::Endpoint;

/// A non-INVITE server transaction (RFC 3261 §17.2.2).
#[derive(Clone)]
pub struct ServerTransaction {
    transaction: TransactionInner,
    context: Arc<UasContext>,
}

fn non_invite_server_fsm() -> Fsm<State, TsxInput, TsxAction> {
    use State::*;
    use TsxAction::*;
    use TsxInput::*;

    Fsm::new(Trying)
        .route(Trying, SendProvisional, Proceeding, None)
        .route(Proceeding, SendProvisional, Proceeding, None)
        .route(Trying, SendSuccess, Completed, None)
        .route(Trying, SendFailure, Completed, None)
        .route(Proceeding, SendSuccess, Completed, None)
        .route(Proceeding, SendFailure, Completed, None)
        // Before any response exists there is nothing to repeat.
        .route(Trying, RequestRetrans, Trying, None)
        .route(Proceeding, RequestRetrans, Proceeding, Some(TsxAction::Retransmit))
        .route(Completed, RequestRetrans, Completed, Some(TsxAction::Retransmit))
        .route(Completed, Linger, Terminated, None)
        .route(Trying, TransportFailed, Terminated, None)
        .route(Proceeding, TransportFailed, Terminated, None)
        .route(Completed, TransportFailed, Terminated, None)
        .terminal(Terminated)
}

impl ServerTransaction {
    pub(crate) fn new(
        endpoint: &Endpoint,
        request: &IncomingRequest<'_>,
        timers: TimerConfig,
        dialog: Option<DialogKey>,
    ) -> Self {
        let method = *request.method();

        assert!(
            !matches!(method, SipMethod::Invite | SipMethod::Ack),
            "Invalid method for non-INVITE server transaction: {}",
            method
        );

        let key = TsxKey::server_for_request(&request.request_headers, method);
        let transaction = TransactionInner::new_uas(request, endpoint, key.clone(), non_invite_server_fsm(), timers);

        if let Some(dialog) = dialog {
            transaction.set_dialog(dialog);
        }

        let tsx = ServerTransaction {
            transaction,
            context: Arc::new(UasContext::from_request(request)),
        };

        endpoint
            .transactions()
            .insert_server(key, super::ServerTsx::NonInvite(tsx.clone()));

        tsx
    }

    pub(crate) fn context(&self) -> &UasContext {
        &self.context
    }

    /// Sends a response through this transaction. A final response
    /// starts Timer J, absorbing request retransmissions for 64·T1.
    pub(crate) async fn respond(
        &self,
        code: StatusCode,
        to_tag: Option<&str>,
        mut extra_headers: Headers<'static>,
        body: Option<Bytes>,
    ) -> Result<Bytes> {
        let mut response = self.context.new_response(code, to_tag);
        response.headers.append(&mut extra_headers);

        let mut outgoing = OutgoingResponse {
            response,
            addr: self.addr(),
            buf: None,
            transport: self.transport().clone(),
        };
        if let Some(body) = body {
            outgoing.set_body(std::borrow::Cow::Owned(body.to_vec()));
        }

        let buf = outgoing.to_bytes()?;
        outgoing.buf = Some(buf.clone());

        let input = if code.is_provisional() {
            TsxInput::SendProvisional
        } else {
            match code.is_success() {
                true => TsxInput::SendSuccess,
                false => TsxInput::SendFailure,
            }
        };

        let Some((transition, _)) = self.feed(input) else {
            return Err(TransactionError::InvalidState {
                state: "Completed",
                input: "respond",
            }
            .into());
        };

        self.tsx_send_response(&mut outgoing).await?;

        if transition.to == State::Completed {
            self.arm_linger(self.timers().timeout());
        }

        Ok(buf)
    }

    pub(crate) async fn receive_request(&self, _request: &IncomingRequest<'_>) -> Result<()> {
        if let Some((_, Some(TsxAction::Retransmit))) = self.feed(TsxInput::RequestRetrans) {
            if self.last_msg().is_some() {
                self.retransmit().await?;
            }
        }

        Ok(())
    }
}

impl Deref for ServerTransaction {
    type Target = TransactionInner;

    fn deref(&self) -> &Self::Target {
        &self.transaction
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::mock;
    use tokio::time::{self, Duration};

    #[tokio::test]
    async fn test_final_goes_to_completed() {
        let endpoint = mock::default_endpoint();
        let request = mock::incoming_request(SipMethod::Options);

        let tsx = ServerTransaction::new(&endpoint, &request, endpoint.timers(), None);
        assert_eq!(tsx.state(), State::Trying);

        tsx.respond(StatusCode::Ok, None, Headers::new(), None).await.unwrap();
        assert_eq!(tsx.state(), State::Completed);
    }

    #[tokio::test]
    async fn test_request_retransmission_repeats_final() {
        let endpoint = mock::default_endpoint();
        let request = mock::incoming_request(SipMethod::Options);

        let tsx = ServerTransaction::new(&endpoint, &request, endpoint.timers(), None);
        tsx.respond(StatusCode::Ok, None, Headers::new(), None).await.unwrap();

        let before = mock::sent_datagrams(tsx.transport()).len();
        tsx.receive_request(&request).await.unwrap();

        let sent = mock::sent_datagrams(tsx.transport());
        assert_eq!(sent.len(), before + 1);
        assert_eq!(sent[before - 1], sent[before]);
    }

    #[tokio::test]
    async fn test_retransmission_before_response_sends_nothing() {
        let endpoint = mock::default_endpoint();
        let request = mock::incoming_request(SipMethod::Options);

        let tsx = ServerTransaction::new(&endpoint, &request, endpoint.timers(), None);

        tsx.receive_request(&request).await.unwrap();

        assert!(mock::sent_datagrams(tsx.transport()).is_empty());
        assert_eq!(tsx.state(), State::Trying);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_j_terminates() {
        let endpoint = mock::default_endpoint();
        let request = mock::incoming_request(SipMethod::Options);

        let tsx = ServerTransaction::new(&endpoint, &request, endpoint.timers(), None);
        tsx.respond(StatusCode::Ok, None, Headers::new(), None).await.unwrap();

        time::sleep(endpoint.timers().timeout() + Duration::from_millis(10)).await;

        assert_eq!(tsx.state(), State::Terminated);
        assert_eq!(endpoint.transactions().server_count(), 0);
    }
}
