use core::fmt;

use crate::error::Result;
use crate::headers::SipHeaderParse;
use crate::macros::parse_header_param;
use crate::message::{NameAddr, Params, Uri};
use crate::parser::Parser;

/// The `Record-Route` SIP header.
///
/// Inserted by proxies wanting to stay on the path of subsequent
/// in-dialog requests; both ends copy it into their route set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordRoute<'a> {
    pub addr: NameAddr<'a>,
    pub params: Option<Params<'a>>,
}

impl<'a> RecordRoute<'a> {
    pub fn new(uri: Uri<'a>) -> Self {
        Self {
            addr: NameAddr { display: None, uri },
            params: None,
        }
    }

    /// Returns the recorded URI.
    pub fn uri(&self) -> &Uri<'a> {
        &self.addr.uri
    }

    pub fn into_owned(self) -> RecordRoute<'static> {
        RecordRoute {
            addr: self.addr.into_owned(),
            params: self.params.map(Params::into_owned),
        }
    }
}

impl fmt::Display for RecordRoute<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", RecordRoute::NAME, self.addr)?;
        if let Some(params) = &self.params {
            write!(f, ";{params}")?;
        }
        Ok(())
    }
}

impl<'a> SipHeaderParse<'a> for RecordRoute<'a> {
    const NAME: &'static str = "Record-Route";

    /*
     * Record-Route  =  "Record-Route" HCOLON rec-route *(COMMA rec-route)
     * rec-route     =  name-addr *( SEMI rr-param )
     */
    fn parse(parser: &mut Parser<'a>) -> Result<Self> {
        let addr = parser.parse_name_addr()?;
        let params = parse_header_param!(parser);

        Ok(RecordRoute { addr, params })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse() {
        let src = b"<sip:p1.example.com;lr>\r\n";
        let rr = RecordRoute::from_bytes(src).unwrap();

        assert_eq!(rr.uri().host_port.host_as_str(), "p1.example.com");
    }
}
