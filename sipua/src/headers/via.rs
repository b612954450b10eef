use core::fmt;
use std::borrow::Cow;
use std::net::IpAddr;
use std::str;

use sipua_util::util::is_valid_port;

use crate::error::Result;
use crate::headers::SipHeaderParse;
use crate::macros::{parse_error, parse_param};
use crate::message::{Host, HostPort, Params, TransportKind};
use crate::parser::{self, Parser, SIPV2};

const MADDR_PARAM: &str = "maddr";
const BRANCH_PARAM: &str = "branch";
const TTL_PARAM: &str = "ttl";
const RPORT_PARAM: &str = "rport";
const RECEIVED_PARAM: &str = "received";

/// The `Via` SIP header.
///
/// Indicates the path taken by the request so far and the path that
/// should be followed in routing responses.
///
/// # Examples
/// ```
/// # use sipua::headers::Via;
///
/// let via = Via::new_udp("server10.biloxi.com".parse().unwrap(), Some("z9hG4bKnashds8"));
///
/// assert_eq!(
///     via.to_string(),
///     "Via: SIP/2.0/UDP server10.biloxi.com;branch=z9hG4bKnashds8",
/// );
/// ```
#[derive(Debug, PartialEq, Eq, Default, Clone)]
pub struct Via<'a> {
    transport: TransportKind,
    sent_by: HostPort,
    ttl: Option<Cow<'a, str>>,
    maddr: Option<Host>,
    received: Option<IpAddr>,
    branch: Option<Cow<'a, str>>,
    rport: Option<u16>,
    params: Option<Params<'a>>,
}

impl<'a> Via<'a> {
    /// Creates a new `Via` header with UDP transport and an optional
    /// branch.
    pub fn new_udp<B: Into<Cow<'a, str>>>(sent_by: HostPort, branch: Option<B>) -> Self {
        Self {
            transport: TransportKind::Udp,
            sent_by,
            branch: branch.map(Into::into),
            ..Default::default()
        }
    }

    /// Set the `received` parameter.
    pub fn set_received(&mut self, received: IpAddr) {
        self.received = Some(received);
    }

    /// Returns the `received` parameter.
    pub fn received(&self) -> Option<IpAddr> {
        self.received
    }

    /// Returns the transport named in the header.
    pub fn transport(&self) -> TransportKind {
        self.transport
    }

    /// Returns the `rport` parameter.
    pub fn rport(&self) -> Option<u16> {
        self.rport
    }

    /// Set the sent-by field.
    pub fn set_sent_by(&mut self, sent_by: HostPort) {
        self.sent_by = sent_by;
    }

    /// Returns the branch parameter.
    pub fn branch(&self) -> Option<&str> {
        self.branch.as_deref()
    }

    /// Returns the sent-by field.
    pub fn sent_by(&self) -> &HostPort {
        &self.sent_by
    }

    /// Returns the `maddr` parameter.
    pub fn maddr(&self) -> Option<&Host> {
        self.maddr.as_ref()
    }

    pub fn into_owned(self) -> Via<'static> {
        Via {
            transport: self.transport,
            sent_by: self.sent_by,
            ttl: self.ttl.map(|t| Cow::Owned(t.into_owned())),
            maddr: self.maddr,
            received: self.received,
            branch: self.branch.map(|b| Cow::Owned(b.into_owned())),
            rport: self.rport,
            params: self.params.map(Params::into_owned),
        }
    }
}

impl fmt::Display for Via<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}/{} {}", Via::NAME, SIPV2, self.transport, self.sent_by)?;

        if let Some(rport) = self.rport {
            write!(f, ";rport={rport}")?;
        }
        if let Some(received) = &self.received {
            write!(f, ";received={received}")?;
        }
        if let Some(ttl) = &self.ttl {
            write!(f, ";ttl={ttl}")?;
        }
        if let Some(maddr) = &self.maddr {
            write!(f, ";maddr={maddr}")?;
        }
        if let Some(branch) = &self.branch {
            write!(f, ";branch={branch}")?;
        }
        if let Some(params) = &self.params {
            write!(f, ";{params}")?;
        }

        Ok(())
    }
}

impl<'a> SipHeaderParse<'a> for Via<'a> {
    const NAME: &'static str = "Via";
    const SHORT_NAME: &'static str = "v";

    /*
     * Via               =  ( "Via" / "v" ) HCOLON via-parm *(COMMA via-parm)
     * via-parm          =  sent-protocol LWS sent-by *( SEMI via-params )
     * via-params        =  via-ttl / via-maddr
     *                      / via-received / via-branch
     *                      / via-extension
     * sent-protocol     =  protocol-name SLASH protocol-version
     *                      SLASH transport
     * sent-by           =  host [ COLON port ]
     */
    fn parse(parser: &mut Parser<'a>) -> Result<Self> {
        parser.parse_sip_v2()?;
        parser.must_read(b'/')?;

        let b = parser.read_until_byte(b' ');
        let transport = b.into();

        parser.ws();

        let sent_by = parser.parse_host_port()?;
        let mut branch = None;
        let mut ttl = None;
        let mut maddr = None;
        let mut received = None;
        let mut rport_p = None;
        let params = parse_param!(
            parser,
            parser::parse_via_param,
            BRANCH_PARAM = branch,
            TTL_PARAM = ttl,
            MADDR_PARAM = maddr,
            RECEIVED_PARAM = received,
            RPORT_PARAM = rport_p
        );
        let received = received.and_then(|r: Cow<str>| r.parse().ok());
        let maddr = maddr.map(|a: Cow<str>| match a.parse() {
            Ok(addr) => Host::IpAddr(addr),
            Err(_) => Host::DomainName(a.as_ref().into()),
        });

        let rport = if let Some(rport) = rport_p
            .filter(|rport: &Cow<str>| !rport.is_empty())
            .and_then(|rport| rport.parse().ok())
        {
            if is_valid_port(rport) {
                Some(rport)
            } else {
                return parse_error!("Via param rport is invalid!");
            }
        } else {
            None
        };

        Ok(Via {
            transport,
            sent_by,
            params,
            ttl,
            maddr,
            received,
            branch,
            rport,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::net::{IpAddr, Ipv4Addr};

    use super::*;

    #[test]
    fn test_parse() {
        let src = b"SIP/2.0/UDP bobspc.biloxi.com:5060;received=192.0.2.4\r\n";
        let mut parser = Parser::new(src);
        let via = Via::parse(&mut parser).unwrap();

        assert_eq!(via.transport, TransportKind::Udp);
        assert_eq!(
            via.sent_by,
            HostPort {
                host: Host::DomainName("bobspc.biloxi.com".into()),
                port: Some(5060)
            }
        );
        assert_eq!(via.received, Some("192.0.2.4".parse().unwrap()));

        let src = b"SIP/2.0/UDP 192.0.2.1:5060 ;received=192.0.2.207 \
        ;branch=z9hG4bK77asjd\r\n";
        let mut parser = Parser::new(src);
        let via = Via::parse(&mut parser).unwrap();

        assert_eq!(via.transport, TransportKind::Udp);
        assert_eq!(
            via.sent_by,
            HostPort {
                host: Host::IpAddr(IpAddr::V4(Ipv4Addr::new(192, 0, 2, 1))),
                port: Some(5060)
            }
        );
        assert_eq!(via.received, Some("192.0.2.207".parse().unwrap()));
        assert_eq!(via.branch(), Some("z9hG4bK77asjd"));
    }

    #[test]
    fn test_display_with_rport_and_branch() {
        let mut via = Via::new_udp("10.1.1.1:5060".parse().unwrap(), Some("z9hG4bKa1"));
        via.rport = Some(40022);
        via.set_received("10.1.1.9".parse().unwrap());

        assert_eq!(
            via.to_string(),
            "Via: SIP/2.0/UDP 10.1.1.1:5060;rport=40022;received=10.1.1.9;branch=z9hG4bKa1"
        );
    }
}
