use std::borrow::Cow;
use std::fmt;
use std::net::{IpAddr, SocketAddr};

use sipua_util::ArcStr;

use crate::error::Result;
use crate::message::{Params, SipMethod, TransportKind};
use crate::parser::Parser;

/// A URI scheme understood by this stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Scheme {
    /// `sip:` scheme.
    #[default]
    Sip,
    /// `sips:` scheme.
    Sips,
    /// `tel:` scheme.
    Tel,
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scheme::Sip => write!(f, "sip"),
            Scheme::Sips => write!(f, "sips"),
            Scheme::Tel => write!(f, "tel"),
        }
    }
}

/// A host: either resolved to an address or a name awaiting DNS.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Host {
    /// A resolved IP address.
    IpAddr(IpAddr),
    /// A domain name that still needs resolution.
    DomainName(ArcStr),
}

impl Host {
    pub fn as_str(&self) -> Cow<'_, str> {
        match self {
            Host::IpAddr(addr) => Cow::Owned(addr.to_string()),
            Host::DomainName(name) => Cow::Borrowed(name),
        }
    }

    pub fn is_ip_addr(&self) -> bool {
        matches!(self, Host::IpAddr(_))
    }
}

impl Default for Host {
    fn default() -> Self {
        Host::DomainName(ArcStr::default())
    }
}

impl std::str::FromStr for Host {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(match s.parse() {
            Ok(addr) => Host::IpAddr(addr),
            Err(_) => Host::DomainName(s.into()),
        })
    }
}

impl fmt::Display for Host {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Host::IpAddr(IpAddr::V6(addr)) => write!(f, "[{addr}]"),
            Host::IpAddr(addr) => write!(f, "{addr}"),
            Host::DomainName(name) => write!(f, "{name}"),
        }
    }
}

/// A host with an optional port.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct HostPort {
    pub host: Host,
    pub port: Option<u16>,
}

impl HostPort {
    pub fn new(host: Host, port: Option<u16>) -> Self {
        Self { host, port }
    }

    pub fn host_as_str(&self) -> Cow<'_, str> {
        self.host.as_str()
    }

    pub fn is_ip_addr(&self) -> bool {
        self.host.is_ip_addr()
    }

    /// The port to use on the wire, defaulting to 5060.
    pub fn port_or_default(&self) -> u16 {
        self.port.unwrap_or(5060)
    }
}

impl From<SocketAddr> for HostPort {
    fn from(addr: SocketAddr) -> Self {
        Self {
            host: Host::IpAddr(addr.ip()),
            port: Some(addr.port()),
        }
    }
}

impl std::str::FromStr for HostPort {
    type Err = crate::error::Error;

    fn from_str(s: &str) -> Result<Self> {
        Parser::new(s.as_bytes()).parse_host_port()
    }
}

impl fmt::Display for HostPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.host)?;
        if let Some(port) = self.port {
            write!(f, ":{port}")?;
        }
        Ok(())
    }
}

/// The userinfo part of a URI.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct UriUser<'a> {
    pub user: Cow<'a, str>,
    pub pass: Option<Cow<'a, str>>,
}

impl UriUser<'_> {
    pub fn into_owned(self) -> UriUser<'static> {
        UriUser {
            user: Cow::Owned(self.user.into_owned()),
            pass: self.pass.map(|p| Cow::Owned(p.into_owned())),
        }
    }
}

impl fmt::Display for UriUser<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.user)?;
        if let Some(pass) = &self.pass {
            write!(f, ":{pass}")?;
        }
        Ok(())
    }
}

/// A parsed SIP URI.
///
/// Well-known URI parameters (`user`, `method`, `transport`, `ttl`, `lr`,
/// `maddr`) are lifted into typed fields; everything else is kept in
/// `params` in arrival order. `hdr_params` holds the `?`-delimited URI
/// headers.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Uri<'a> {
    pub scheme: Scheme,
    pub user: Option<UriUser<'a>>,
    pub host_port: HostPort,
    pub user_param: Option<Cow<'a, str>>,
    pub method_param: Option<SipMethod>,
    pub transport_param: Option<TransportKind>,
    pub ttl_param: Option<u8>,
    pub lr_param: bool,
    pub maddr_param: Option<Host>,
    pub params: Option<Params<'a>>,
    pub hdr_params: Option<Params<'a>>,
}

impl<'a> Uri<'a> {
    /// Creates a URI from scheme, user and host without parameters.
    pub fn without_params(scheme: Scheme, user: Option<UriUser<'a>>, host_port: HostPort) -> Self {
        Uri {
            scheme,
            user,
            host_port,
            ..Default::default()
        }
    }

    /// Creates a plain `sip:user@host` URI.
    pub fn sip<U: Into<Cow<'a, str>>>(user: U, host_port: HostPort) -> Self {
        Self::without_params(
            Scheme::Sip,
            Some(UriUser {
                user: user.into(),
                pass: None,
            }),
            host_port,
        )
    }

    /// Parses a URI from a static string.
    pub fn from_static(src: &'static str) -> Result<Uri<'static>> {
        Parser::new(src.as_bytes()).parse_uri(true)
    }

    /// Parses an owned URI from any string.
    pub fn parse_owned(src: &str) -> Result<Uri<'static>> {
        Ok(Parser::new(src.as_bytes()).parse_uri(true)?.into_owned())
    }

    /// The username part, if any.
    pub fn username(&self) -> Option<&str> {
        self.user.as_ref().map(|u| u.user.as_ref())
    }

    /// The `user@host` address-of-record of this URI.
    pub fn aor(&self) -> String {
        match self.username() {
            Some(user) => format!("{}@{}", user, self.host_port.host),
            None => self.host_port.host.to_string(),
        }
    }

    /// Returns `true` when this URI can go on the wire: it has a scheme
    /// and a non-empty host.
    pub fn is_wire_ready(&self) -> bool {
        match &self.host_port.host {
            Host::DomainName(name) => !name.is_empty() || matches!(self.scheme, Scheme::Tel),
            Host::IpAddr(_) => true,
        }
    }

    pub fn into_owned(self) -> Uri<'static> {
        Uri {
            scheme: self.scheme,
            user: self.user.map(UriUser::into_owned),
            host_port: self.host_port,
            user_param: self.user_param.map(|p| Cow::Owned(p.into_owned())),
            method_param: self.method_param,
            transport_param: self.transport_param,
            ttl_param: self.ttl_param,
            lr_param: self.lr_param,
            maddr_param: self.maddr_param,
            params: self.params.map(Params::into_owned),
            hdr_params: self.hdr_params.map(Params::into_owned),
        }
    }
}

impl fmt::Display for Uri<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:", self.scheme)?;

        if let Some(user) = &self.user {
            write!(f, "{user}")?;
            if !matches!(self.scheme, Scheme::Tel) {
                write!(f, "@")?;
            }
        }
        if !matches!(self.scheme, Scheme::Tel) {
            write!(f, "{}", self.host_port)?;
        }

        if let Some(user_param) = &self.user_param {
            write!(f, ";user={user_param}")?;
        }
        if let Some(method) = &self.method_param {
            write!(f, ";method={method}")?;
        }
        if let Some(transport) = &self.transport_param {
            write!(f, ";transport={}", transport.as_str().to_ascii_lowercase())?;
        }
        if let Some(ttl) = &self.ttl_param {
            write!(f, ";ttl={ttl}")?;
        }
        if self.lr_param {
            write!(f, ";lr")?;
        }
        if let Some(maddr) = &self.maddr_param {
            write!(f, ";maddr={maddr}")?;
        }
        if let Some(params) = &self.params {
            write!(f, ";{params}")?;
        }
        if let Some(hdr_params) = &self.hdr_params {
            write!(f, "?")?;
            hdr_params.fmt_with(f, '&')?;
        }

        Ok(())
    }
}

/// A display name paired with an angle-quoted URI, e.g.
/// `Alice <sip:alice@atlanta.com>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NameAddr<'a> {
    pub display: Option<Cow<'a, str>>,
    pub uri: Uri<'a>,
}

impl NameAddr<'_> {
    pub fn into_owned(self) -> NameAddr<'static> {
        NameAddr {
            display: self.display.map(|d| Cow::Owned(d.into_owned())),
            uri: self.uri.into_owned(),
        }
    }
}

impl fmt::Display for NameAddr<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(display) = &self.display {
            // RFC 3261 forbids LWS between a quoted display name and '<'.
            write!(f, "\"{display}\"")?;
        }
        write!(f, "<{}>", self.uri)
    }
}

/// Either a bare [`Uri`] or a [`NameAddr`], as allowed by address headers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SipUri<'a> {
    /// A bare URI.
    Uri(Uri<'a>),
    /// A name-addr with angle brackets.
    NameAddr(NameAddr<'a>),
}

impl<'a> SipUri<'a> {
    pub fn scheme(&self) -> Scheme {
        self.uri().scheme
    }

    /// The inner URI regardless of form.
    pub fn uri(&self) -> &Uri<'a> {
        match self {
            SipUri::Uri(uri) => uri,
            SipUri::NameAddr(addr) => &addr.uri,
        }
    }

    pub fn user(&self) -> Option<&UriUser<'a>> {
        self.uri().user.as_ref()
    }

    pub fn host_port(&self) -> &HostPort {
        &self.uri().host_port
    }

    pub fn params(&self) -> Option<&Params<'a>> {
        self.uri().params.as_ref()
    }

    pub fn header_params(&self) -> Option<&Params<'a>> {
        self.uri().hdr_params.as_ref()
    }

    pub fn into_owned(self) -> SipUri<'static> {
        match self {
            SipUri::Uri(uri) => SipUri::Uri(uri.into_owned()),
            SipUri::NameAddr(addr) => SipUri::NameAddr(addr.into_owned()),
        }
    }
}

impl<'a> From<Uri<'a>> for SipUri<'a> {
    fn from(uri: Uri<'a>) -> Self {
        SipUri::Uri(uri)
    }
}

impl fmt::Display for SipUri<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SipUri::Uri(uri) => write!(f, "{uri}"),
            SipUri::NameAddr(addr) => write!(f, "{addr}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_roundtrip() {
        let src = "sip:bob@biloxi.com:5060;transport=udp;foo=bar";
        let uri = Parser::new(src.as_bytes()).parse_uri(true).unwrap();

        assert_eq!(uri.to_string(), src);
    }

    #[test]
    fn test_aor() {
        let uri = Uri::from_static("sip:alice@atlanta.com").unwrap();

        assert_eq!(uri.aor(), "alice@atlanta.com");
    }

    #[test]
    fn test_ipv6_host_display_is_bracketed() {
        let host: Host = "2620:0:2ef0::32b7".parse().unwrap();
        let hp = HostPort::new(host, Some(5060));

        assert_eq!(hp.to_string(), "[2620:0:2ef0::32b7]:5060");
    }

    #[test]
    fn test_wire_ready_requires_host() {
        let empty = Uri::default();
        assert!(!empty.is_wire_ready());

        let ok = Uri::from_static("sip:h.example.com").unwrap();
        assert!(ok.is_wire_ready());
    }
}
