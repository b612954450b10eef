use core::fmt;
use std::borrow::Cow;

use crate::error::Result;
use crate::headers::{SipHeaderParse, TAG_PARAM};
use crate::macros::parse_header_param;
use crate::message::{Params, SipUri};
use crate::parser::Parser;

/// The `From` SIP header.
///
/// Indicates the initiator of the request.
///
/// # Examples
///
/// ```
/// # use sipua::headers::{From, SipHeaderParse};
/// let from = From::from_bytes(b"Alice <sip:alice@atlanta.com>;tag=1928301774").unwrap();
///
/// assert_eq!(from.tag(), Some("1928301774"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct From<'a> {
    addr: SipUri<'a>,
    tag: Option<Cow<'a, str>>,
    params: Option<Params<'a>>,
}

impl<'a> From<'a> {
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

    pub fn into_owned(self) -> From<'static> {
        From {
            addr: self.addr.into_owned(),
            tag: self.tag.map(|t| Cow::Owned(t.into_owned())),
            params: self.params.map(Params::into_owned),
        }
    }
}

impl fmt::Display for From<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", From::NAME, self.addr)?;
        if let Some(tag) = &self.tag {
            write!(f, ";tag={tag}")?;
        }
        if let Some(params) = &self.params {
            write!(f, ";{params}")?;
        }
        Ok(())
    }
}

impl<'a> SipHeaderParse<'a> for From<'a> {
    const NAME: &'static str = "From";
    const SHORT_NAME: &'static str = "f";

    /*
     * From     =  ( "From" / "f" ) HCOLON from-spec
     * from-spec = ( name-addr / addr-spec ) *( SEMI from-param )
     * from-param = tag-param / generic-param
     */
    fn parse(parser: &mut Parser<'a>) -> Result<Self> {
        // In the addr-spec form, parameters after the URI belong to the
        // header, not the URI.
        let addr = parser.parse_sip_uri(false)?;
        let mut tag = None;
        let params = parse_header_param!(parser, TAG_PARAM = tag);

        Ok(From { addr, tag, params })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Scheme;

    #[test]
    fn test_parse_name_addr_with_tag() {
        let src = b"Alice <sip:alice@atlanta.com>;tag=1928301774\r\n";
        let from = From::from_bytes(src).unwrap();

        assert_eq!(from.tag(), Some("1928301774"));
        assert_eq!(from.addr.scheme(), Scheme::Sip);
        assert_eq!(from.addr.user().unwrap().user, "alice");
    }

    #[test]
    fn test_parse_addr_spec_keeps_tag_out_of_uri() {
        let src = b"sip:bob@biloxi.com;tag=456248\r\n";
        let from = From::from_bytes(src).unwrap();

        assert_eq!(from.tag(), Some("456248"));
        assert!(from.addr.uri().params.is_none());
    }

    #[test]
    fn test_display() {
        let src = b"Bob <sip:bob@biloxi.com>;tag=a6c85cf";
        let from = From::from_bytes(src).unwrap();

        assert_eq!(from.to_string(), "From: \"Bob\"<sip:bob@biloxi.com>;tag=a6c85cf");
    }
}
