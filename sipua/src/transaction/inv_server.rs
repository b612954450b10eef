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

/// An INVITE server transaction (RFC 3261 §17.2.1).
///
/// A 2xx terminates the transaction immediately; retransmitting the 2xx
/// until the ACK arrives is the dialog's job. Failure finals are
/// retransmitted here under Timer G until the ACK, Timer H bounding the
/// wait.
#[derive(Clone)]
pub struct InvServerTransaction {
    transaction: TransactionInner,
    context: Arc<UasContext>,
}

fn invite_server_fsm() -> Fsm<State, TsxInput, TsxAction> {
    use State::*;
    use TsxAction::*;
    use TsxInput::*;

    Fsm::new(Proceeding)
        .route(Proceeding, SendProvisional, Proceeding, None)
        .route(Proceeding, SendSuccess, Terminated, None)
        .route(Proceeding, SendFailure, Completed, None)
        .route(Proceeding, RequestRetrans, Proceeding, Some(TsxAction::Retransmit))
        .route(Completed, RequestRetrans, Completed, Some(TsxAction::Retransmit))
        .route(Completed, TsxInput::Retransmit, Completed, Some(TsxAction::Retransmit))
        .route(Completed, Ack, Confirmed, None)
        .route(Confirmed, Ack, Confirmed, None)
        .route(Completed, Timeout, Terminated, None)
        .route(Confirmed, Linger, Terminated, None)
        .route(Proceeding, TransportFailed, Terminated, None)
        .route(Completed, TransportFailed, Terminated, None)
        .terminal(Terminated)
}

impl InvServerTransaction {
    pub(crate) fn new(
        endpoint: &Endpoint,
        request: &IncomingRequest<'_>,
        timers: TimerConfig,
        dialog: Option<DialogKey>,
    ) -> Self {
        let method = request.method();

        assert!(
            matches!(method, SipMethod::Invite),
            "Expected INVITE for server INVITE transaction, got: {}",
            method
        );

        let key = TsxKey::server_for_request(&request.request_headers, SipMethod::Invite);
        let transaction = TransactionInner::new_uas(request, endpoint, key.clone(), invite_server_fsm(), timers);

        if let Some(dialog) = dialog {
            transaction.set_dialog(dialog);
        }

        let uas_inv = InvServerTransaction {
            transaction,
            context: Arc::new(UasContext::from_request(request)),
        };

        endpoint
            .transactions()
            .insert_server(key, super::ServerTsx::Invite(uas_inv.clone()));

        uas_inv
    }

    pub(crate) fn context(&self) -> &UasContext {
        &self.context
    }

    /// Sends a response through this transaction.
    ///
    /// Returns the frozen wire bytes so the caller (the dialog, for a
    /// 2xx) can retransmit them verbatim.
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
        } else if code.is_success() {
            TsxInput::SendSuccess
        } else {
            TsxInput::SendFailure
        };

        // Validate before touching the wire so an illegal respond (e.g.
        // a second final) is rejected cleanly.
        let Some((transition, _)) = self.feed(input) else {
            return Err(TransactionError::InvalidState {
                state: "Completed",
                input: "respond",
            }
            .into());
        };

        self.tsx_send_response(&mut outgoing).await?;

        if transition.to == State::Completed {
            // Timer G retransmits the failure until the ACK; Timer H
            // gives up on the ACK at 64·T1.
            if !self.reliable() {
                self.arm_retransmit(self.timers().t1);
            }
            self.arm_timeout(self.timers().timeout(), TransactionError::NoAck);
        }

        Ok(buf)
    }

    pub(crate) async fn receive_request(&self, request: &IncomingRequest<'_>) -> Result<()> {
        if request.is_method(&SipMethod::Ack) {
            let Some((transition, _)) = self.feed(TsxInput::Ack) else {
                return Ok(());
            };

            if transition.from == State::Completed {
                self.cancel_retransmit();
                self.cancel_timeout();
                // Timer I: absorb ACK retransmissions for T4.
                self.arm_linger(self.timers().t4);
            }
            return Ok(());
        }

        // A retransmitted INVITE; repeat the last response, when one
        // was already sent.
        if let Some((_, Some(TsxAction::Retransmit))) = self.feed(TsxInput::RequestRetrans) {
            if self.last_msg().is_some() {
                self.retransmit().await?;
            }
        }

        Ok(())
    }
}

impl Deref for InvServerTransaction {
    type Target = TransactionInner;

    fn deref(&self) -> &Self::Target {
        &self.transaction
    }
}
