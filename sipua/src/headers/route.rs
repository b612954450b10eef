use core::fmt;

use crate::error::Result;
use crate::headers::SipHeaderParse;
use crate::macros::parse_header_param;
use crate::message::{NameAddr, Params, Uri};
use crate::parser::Parser;

/// The `Route` SIP header.
///
/// Forces a request through the listed set of proxies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route<'a> {
    pub addr: NameAddr<'a>,
    pub params: Option<Params<'a>>,
}

impl<'a> Route<'a> {
    pub fn new(uri: Uri<'a>) -> Self {
        Self {
            addr: NameAddr { display: None, uri },
            params: None,
        }
    }

    /// Returns the route URI.
    pub fn uri(&self) -> &Uri<'a> {
        &self.addr.uri
    }

    pub fn into_owned(self) -> Route<'static> {
        Route {
            addr: self.addr.into_owned(),
            params: self.params.map(Params::into_owned),
        }
    }
}

impl fmt::Display for Route<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", Route::NAME, self.addr)?;
        if let Some(params) = &self.params {
            write!(f, ";{params}")?;
        }
        Ok(())
    }
}

impl<'a> SipHeaderParse<'a> for Route<'a> {
    const NAME: &'static str = "Route";

    /*
     * Route        =  "Route" HCOLON route-param *(COMMA route-param)
     * route-param  =  name-addr *( SEMI rr-param )
     */
    fn parse(parser: &mut Parser<'a>) -> Result<Self> {
        let addr = parser.parse_name_addr()?;
        let params = parse_header_param!(parser);

        Ok(Route { addr, params })
    }
}
