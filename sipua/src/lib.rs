//! # sipua
//!
//! A SIP (RFC 3261) user-agent core over UDP: message codec, transaction
//! state machines, dialogs and a user-facing [`Party`] handle.
//!
//! The crate is organized by protocol layer. [`parser`] and [`message`]
//! round-trip wire bytes, [`transaction`] implements the four RFC 3261 §17
//! state machines, [`dialog`] tracks RFC 3261 §12 dialog state and builds
//! in-dialog requests, and [`transport`] owns the UDP sockets and routes
//! inbound datagrams. Everything is tied together by an [`Endpoint`];
//! applications interact through [`Party`] handles bound to it.

pub mod dialog;
pub mod endpoint;
pub mod fsm;
pub mod headers;
pub mod message;
pub mod parser;
pub mod party;
pub mod scheduler;
pub mod transaction;
pub mod transport;

pub(crate) mod macros;

mod error;

pub use endpoint::Endpoint;
pub use error::{
    DialogError, Error, ParseErrorKind, ProtocolError, Result, SipParseError, TransactionError, TransportError,
};
pub use party::{Party, PartyConfig, PartyHandler};

#[cfg(test)]
#[macro_use]
extern crate assert_matches;

#[cfg(test)]
pub(crate) mod test_utils;

use std::net::SocketAddr;

use rand::{distr::Alphanumeric, Rng};

/// The magic cookie every RFC 3261 branch parameter starts with.
pub const BRANCH_COOKIE: &str = "z9hG4bK";

/// Collaborator interface for session description negotiation.
///
/// The core carries SDP bodies opaquely; an installed `SdpSession` is
/// invoked at the INVITE and ACK/2xx boundaries to produce and consume
/// them.
pub trait SdpSession: Sync + Send + 'static {
    /// Produce the local session description offered in an INVITE.
    fn offer(&self) -> bytes::Bytes;

    /// Answer a remote offer. The result becomes the 2xx body.
    fn answer(&self, offer: &[u8]) -> Result<bytes::Bytes>;

    /// Install the remote description taken from a 2xx or ACK body.
    fn remote_description(&self, sdp: &[u8]);
}

/// Collaborator interface for credential handling.
///
/// Given the value of a `WWW-Authenticate`/`Proxy-Authenticate` challenge,
/// returns the `Authorization` header value to retry with, or `None` to
/// give up. The core reissues the request once with an incremented CSeq
/// and the same Call-ID.
pub trait Authenticator: Sync + Send + 'static {
    fn authorize(&self, challenge: &str, method: &message::SipMethod, uri: &message::Uri) -> Option<String>;
}

/// Generates a random tag suitable for `From`/`To` tags.
pub(crate) fn generate_tag() -> sipua_util::ArcStr {
    let tag: String = rand::rng().sample_iter(&Alphanumeric).take(10).map(char::from).collect();

    tag.into()
}

/// Generates a branch parameter with the RFC 3261 magic cookie.
pub(crate) fn generate_branch() -> String {
    let suffix: String = rand::rng().sample_iter(&Alphanumeric).take(12).map(char::from).collect();

    format!("{}{}", BRANCH_COOKIE, suffix)
}

/// Generates a new Call-ID value.
pub(crate) fn generate_call_id() -> sipua_util::ArcStr {
    uuid::Uuid::new_v4().to_string().into()
}

pub(crate) fn get_local_name(addr: &SocketAddr) -> String {
    let ip = local_ip_address::local_ip().unwrap_or(addr.ip());

    format!("{}:{}", ip, addr.port())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_branch_carries_magic_cookie() {
        let branch = generate_branch();

        assert!(branch.starts_with(BRANCH_COOKIE));
        assert!(branch.len() > BRANCH_COOKIE.len());
    }

    #[test]
    fn test_generated_tags_differ() {
        assert_ne!(generate_tag(), generate_tag());
    }
}
