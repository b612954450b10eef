use std::fmt;

/// The transport a message travels over, as named in `Via` and the
/// `transport` URI parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TransportKind {
    /// UDP transport.
    #[default]
    Udp,
    /// TCP transport.
    Tcp,
    /// TLS transport.
    Tls,
    /// SCTP transport.
    Sctp,
}

impl TransportKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransportKind::Udp => "UDP",
            TransportKind::Tcp => "TCP",
            TransportKind::Tls => "TLS",
            TransportKind::Sctp => "SCTP",
        }
    }

    /// Returns `true` when the transport guarantees delivery and the
    /// retransmission timers are disabled.
    pub fn reliable(&self) -> bool {
        !matches!(self, TransportKind::Udp)
    }
}

impl From<&[u8]> for TransportKind {
    fn from(value: &[u8]) -> Self {
        if value.eq_ignore_ascii_case(b"TCP") {
            TransportKind::Tcp
        } else if value.eq_ignore_ascii_case(b"TLS") {
            TransportKind::Tls
        } else if value.eq_ignore_ascii_case(b"SCTP") {
            TransportKind::Sctp
        } else {
            TransportKind::Udp
        }
    }
}

impl From<&str> for TransportKind {
    fn from(value: &str) -> Self {
        value.as_bytes().into()
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
