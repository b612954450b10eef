use sipua_util::ArcStr;

use crate::message::{HostPort, SipMethod};
use crate::transport::RequestHeaders;
use crate::BRANCH_COOKIE;

/// Identifies a transaction while it exists (RFC 3261 §17.1.3/§17.2.3).
///
/// Client transactions match on the branch of the Via they inserted plus
/// the CSeq method; server transactions additionally match on the Via
/// sent-by, and a CANCEL forms its own transaction distinct from the
/// INVITE it targets.
#[derive(PartialEq, Eq, Hash, Clone, Debug)]
pub enum TsxKey {
    Client(ClientKey),
    Server(ServerKey),
}

#[derive(PartialEq, Eq, Hash, Clone, Debug)]
pub struct ClientKey {
    branch: ArcStr,
    method: SipMethod,
}

#[derive(PartialEq, Eq, Hash, Clone, Debug)]
pub struct ServerKey {
    branch: ArcStr,
    sent_by: HostPort,
    method: SipMethod,
}

impl TsxKey {
    /// Client key from the branch this stack generated and the request
    /// method.
    pub fn client(branch: &str, method: SipMethod) -> Self {
        TsxKey::Client(ClientKey {
            branch: branch.into(),
            method: normalize(method),
        })
    }

    /// Client key matching an inbound response: branch of the top Via
    /// plus the CSeq method.
    pub(crate) fn client_for_response(headers: &RequestHeaders<'_>) -> Option<Self> {
        let branch = headers.via.branch()?;

        Some(TsxKey::Client(ClientKey {
            branch: branch.into(),
            method: normalize(*headers.cseq.method()),
        }))
    }

    /// Server key for an inbound request.
    ///
    /// An ACK matches the INVITE transaction it acknowledges; every
    /// other method, CANCEL included, keys on itself.
    pub(crate) fn server_for_request(headers: &RequestHeaders<'_>, method: SipMethod) -> Self {
        let branch: ArcStr = headers.via.branch().unwrap_or_default().into();

        if !branch.starts_with(BRANCH_COOKIE) {
            log::debug!("Branch '{branch}' lacks the RFC 3261 magic cookie");
        }

        TsxKey::Server(ServerKey {
            branch,
            sent_by: headers.via.sent_by().clone(),
            method: normalize(method),
        })
    }

    /// The key of the INVITE server transaction a CANCEL targets: same
    /// branch and sent-by, method INVITE.
    pub(crate) fn cancel_target(headers: &RequestHeaders<'_>) -> Self {
        Self::server_for_request(headers, SipMethod::Invite)
    }
}

// RFC 3261 §17.2.3: for matching purposes an ACK carries the method of
// the INVITE it acknowledges.
fn normalize(method: SipMethod) -> SipMethod {
    match method {
        SipMethod::Ack => SipMethod::Invite,
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ack_matches_invite_key() {
        assert_eq!(
            TsxKey::client("z9hG4bK42", SipMethod::Ack),
            TsxKey::client("z9hG4bK42", SipMethod::Invite)
        );
    }

    #[test]
    fn test_cancel_key_differs_from_invite_key() {
        assert_ne!(
            TsxKey::client("z9hG4bK42", SipMethod::Cancel),
            TsxKey::client("z9hG4bK42", SipMethod::Invite)
        );
    }
}
