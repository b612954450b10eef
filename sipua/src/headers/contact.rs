use core::fmt;

use crate::error::Result;
use crate::headers::SipHeaderParse;
use crate::macros::parse_header_param;
use crate::message::{Params, SipUri, Uri};
use crate::parser::Parser;

/// The `Contact` SIP header.
///
/// Carries a URI at which the sender can be reached directly; inside a
/// dialog it becomes the peer's remote target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Contact<'a> {
    addr: SipUri<'a>,
    params: Option<Params<'a>>,
}

impl<'a> Contact<'a> {
    pub fn new(addr: SipUri<'a>) -> Self {
        Self { addr, params: None }
    }

    /// Returns the address of this header.
    pub fn addr(&self) -> &SipUri<'a> {
        &self.addr
    }

    /// Returns the contact URI regardless of form.
    pub fn uri(&self) -> &Uri<'a> {
        self.addr.uri()
    }

    pub fn into_owned(self) -> Contact<'static> {
        Contact {
            addr: self.addr.into_owned(),
            params: self.params.map(Params::into_owned),
        }
    }
}

impl fmt::Display for Contact<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", Contact::NAME, self.addr)?;
        if let Some(params) = &self.params {
            write!(f, ";{params}")?;
        }
        Ok(())
    }
}

impl<'a> SipHeaderParse<'a> for Contact<'a> {
    const NAME: &'static str = "Contact";
    const SHORT_NAME: &'static str = "m";

    /*
     * Contact        =  ("Contact" / "m" ) HCOLON
     *                   ( STAR / (contact-param *(COMMA contact-param)))
     * contact-param  =  (name-addr / addr-spec) *(SEMI contact-params)
     */
    fn parse(parser: &mut Parser<'a>) -> Result<Self> {
        let addr = parser.parse_sip_uri(false)?;
        let params = parse_header_param!(parser);

        Ok(Contact { addr, params })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse() {
        let src = b"<sip:alice@pc33.atlanta.com>\r\n";
        let contact = Contact::from_bytes(src).unwrap();

        assert_eq!(contact.uri().aor(), "alice@pc33.atlanta.com");
    }

    #[test]
    fn test_parse_with_params() {
        let src = b"<sip:bob@192.0.2.4>;expires=3600";
        let contact = Contact::from_bytes(src).unwrap();

        assert_eq!(contact.params.as_ref().unwrap().get("expires"), Some(Some("3600")));
    }
}
