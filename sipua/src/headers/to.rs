use core::fmt;
use std::borrow::Cow;

use crate::error::Result;
use crate::headers::{SipHeaderParse, TAG_PARAM};
use crate::macros::parse_header_param;
use crate::message::{Params, SipUri};
use crate::parser::Parser;

/// The `To` SIP header.
///
/// Specifies the logical recipient of the request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct To<'a> {
    addr: SipUri<'a>,
    tag: Option<Cow<'a, str>>,
    params: Option<Params<'a>>,
}

impl<'a> To<'a> {
    pub fn new(addr: SipUri<'a>) -> Self {
        Self {
            addr,
            tag: None,
            params: None,
        }
    }

    /// Returns the address of this header.
    pub fn addr(&self) -> &SipUri<'a> {
        &self.addr
    }

    /// Returns the `tag` parameter.
    pub fn tag(&self) -> Option<&str> {
        self.tag.as_deref()
    }

    /// Sets the `tag` parameter.
    pub fn set_tag<T: Into<Cow<'a, str>>>(&mut self, tag: Option<T>) {
        self.tag = tag.map(Into::into);
    }

    pub fn into_owned(self) -> To<'static> {
        To {
            addr: self.addr.into_owned(),
            tag: self.tag.map(|t| Cow::Owned(t.into_owned())),
            params: self.params.map(Params::into_owned),
        }
    }
}

impl fmt::Display for To<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", To::NAME, self.addr)?;
        if let Some(tag) = &self.tag {
            write!(f, ";tag={tag}")?;
        }
        if let Some(params) = &self.params {
            write!(f, ";{params}")?;
        }
        Ok(())
    }
}

impl<'a> SipHeaderParse<'a> for To<'a> {
    const NAME: &'static str = "To";
    const SHORT_NAME: &'static str = "t";

    /*
     * To       =  ( "To" / "t" ) HCOLON ( name-addr / addr-spec )
     *             *( SEMI to-param )
     * to-param =  tag-param / generic-param
     */
    fn parse(parser: &mut Parser<'a>) -> Result<Self> {
        let addr = parser.parse_sip_uri(false)?;
        let mut tag = None;
        let params = parse_header_param!(parser, TAG_PARAM = tag);

        Ok(To { addr, tag, params })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_without_tag() {
        let src = b"Bob <sip:bob@biloxi.com>\r\n";
        let to = To::from_bytes(src).unwrap();

        assert_eq!(to.tag(), None);
        assert_eq!(to.addr.user().unwrap().user, "bob");
    }

    #[test]
    fn test_set_tag() {
        let src = b"<sip:bob@biloxi.com>";
        let mut to = To::from_bytes(src).unwrap();

        to.set_tag(Some("314159"));

        assert_eq!(to.to_string(), "To: <sip:bob@biloxi.com>;tag=314159");
    }
}
