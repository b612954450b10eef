use std::ops::Deref;

use crate::dialog::DialogKey;
use crate::error::{Result, TransactionError};
use crate::fsm::Fsm;
use crate::headers::Header;
use crate::message::SipMethod;
use crate::transaction::{State, TimerConfig, TransactionInner, TsxAction, TsxInput, TsxKey};
use crate::transport::{IncomingResponse, OutgoingRequest};
use crate::Endpoint;

/// A non-INVITE client transaction (RFC 3261 §17.1.2).
#[derive(Clone)]
pub struct ClientTransaction {
    transaction: TransactionInner,
}

fn non_invite_client_fsm() -> Fsm<State, TsxInput, TsxAction> {
    use State::*;
    use TsxAction::*;
    use TsxInput::*;

    Fsm::new(Trying)
        .route(Trying, Provisional, Proceeding, Some(Deliver))
        .route(Proceeding, Provisional, Proceeding, Some(Deliver))
        .route(Trying, Success, Completed, Some(Deliver))
        .route(Proceeding, Success, Completed, Some(Deliver))
        .route(Trying, Failure, Completed, Some(Deliver))
        .route(Proceeding, Failure, Completed, Some(Deliver))
        .route(Completed, Success, Completed, None)
        .route(Completed, Failure, Completed, None)
        .route(Trying, TsxInput::Retransmit, Trying, Some(TsxAction::Retransmit))
        .route(Proceeding, TsxInput::Retransmit, Proceeding, Some(TsxAction::Retransmit))
        .route(Trying, Timeout, Terminated, None)
        .route(Proceeding, Timeout, Terminated, None)
        .route(Completed, Linger, Terminated, None)
        .route(Trying, TransportFailed, Terminated, None)
        .route(Proceeding, TransportFailed, Terminated, None)
        .terminal(Terminated)
}

impl ClientTransaction {
    /// Sends a non-INVITE request and creates its client transaction.
    ///
    /// Timer E retransmits for unreliable transports; Timer F bounds
    /// the transaction at 64·T1.
    pub(crate) async fn send(
        mut request: OutgoingRequest<'_>,
        endpoint: &Endpoint,
        timers: TimerConfig,
        dialog: Option<DialogKey>,
    ) -> Result<ClientTransaction> {
        let method = *request.msg.method();

        assert!(
            !matches!(method, SipMethod::Invite | SipMethod::Ack),
            "Invalid method for non-INVITE client transaction: {}",
            method
        );

        let branch = request
            .msg
            .headers
            .find_map(|h| if let Header::Via(via) = h { Some(via) } else { None })
            .and_then(|via| via.branch())
            .expect("request carries a Via with a branch")
            .to_owned();

        let key = TsxKey::client(&branch, method);
        let transaction = TransactionInner::new_uac(&request, endpoint, key.clone(), non_invite_client_fsm(), timers);

        if let Some(dialog) = dialog {
            transaction.set_dialog(dialog);
        }

        transaction.tsx_send_request(&mut request).await?;

        let tsx = ClientTransaction { transaction };

        endpoint
            .transactions()
            .insert_client(key, super::ClientTsx::NonInvite(tsx.clone()));

        if !tsx.reliable() {
            tsx.arm_retransmit(timers.t1);
        }
        tsx.arm_timeout(timers.timeout(), TransactionError::TimeoutF);

        Ok(tsx)
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
            return Ok(true);
        };

        if let Some(TsxAction::Deliver) = action {
            if code.is_final() {
                self.cancel_retransmit();
                self.cancel_timeout();
                // Timer K: absorb response retransmissions for T4.
                self.arm_linger(self.timers().t4);
            }

            if let Some(dialog_key) = self.dialog_key() {
                self.endpoint()
                    .dialogs()
                    .on_non_invite_response(&dialog_key, response)
                    .await;
            }
        }

        let _ = transition;
        Ok(true)
    }
}

impl Deref for ClientTransaction {
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
    async fn test_trying_then_proceeding_then_completed() {
        let endpoint = mock::default_endpoint();
        let request = mock::outgoing_request(SipMethod::Options);

        let tsx = ClientTransaction::send(request, &endpoint, endpoint.timers(), None)
            .await
            .unwrap();
        assert_eq!(tsx.state(), State::Trying);

        let provisional = mock::incoming_response(StatusCode::Trying, SipMethod::Options);
        tsx.receive(&provisional).await.unwrap();
        assert_eq!(tsx.state(), State::Proceeding);

        let ok = mock::incoming_response(StatusCode::Ok, SipMethod::Options);
        tsx.receive(&ok).await.unwrap();
        assert_eq!(tsx.state(), State::Completed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_e_retransmits() {
        let endpoint = mock::default_endpoint();
        let request = mock::outgoing_request(SipMethod::Options);

        let tsx = ClientTransaction::send(request, &endpoint, endpoint.timers(), None)
            .await
            .unwrap();

        time::sleep(Duration::from_millis(500 + 10)).await;
        assert_eq!(tsx.retrans_count(), 1);

        time::sleep(Duration::from_secs(1) + Duration::from_millis(10)).await;
        assert_eq!(tsx.retrans_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_f_times_out() {
        let endpoint = mock::default_endpoint();
        let request = mock::outgoing_request(SipMethod::Options);

        let tsx = ClientTransaction::send(request, &endpoint, endpoint.timers(), None)
            .await
            .unwrap();

        time::sleep(endpoint.timers().timeout() + Duration::from_millis(10)).await;

        assert_eq!(tsx.state(), State::Terminated);
        assert_eq!(tsx.last_error(), Some(TransactionError::TimeoutF));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_k_terminates_after_final() {
        let endpoint = mock::default_endpoint();
        let request = mock::outgoing_request(SipMethod::Options);
        let ok = mock::incoming_response(StatusCode::Ok, SipMethod::Options);

        let tsx = ClientTransaction::send(request, &endpoint, endpoint.timers(), None)
            .await
            .unwrap();

        tsx.receive(&ok).await.unwrap();
        assert_eq!(tsx.state(), State::Completed);

        time::sleep(endpoint.timers().t4 + Duration::from_millis(10)).await;
        assert_eq!(tsx.state(), State::Terminated);
        assert_eq!(endpoint.transactions().client_count(), 0);
    }

    #[tokio::test]
    async fn test_final_retransmission_is_absorbed() {
        let endpoint = mock::default_endpoint();
        let request = mock::outgoing_request(SipMethod::Options);
        let ok = mock::incoming_response(StatusCode::Ok, SipMethod::Options);

        let tsx = ClientTransaction::send(request, &endpoint, endpoint.timers(), None)
            .await
            .unwrap();

        tsx.receive(&ok).await.unwrap();
        let before = mock::sent_datagrams(tsx.transport()).len();

        tsx.receive(&ok).await.unwrap();

        // Nothing is sent or delivered for the retransmission.
        assert_eq!(mock::sent_datagrams(tsx.transport()).len(), before);
        assert_eq!(tsx.state(), State::Completed);
    }
}
