use core::fmt;
use std::borrow::Cow;

use crate::error::Result;
use crate::headers::SipHeaderParse;
use crate::macros::parse_header_param;
use crate::message::Params;
use crate::parser::Parser;

/// The `Content-Type` SIP header.
///
/// The media type of the message body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentType<'a> {
    mtype: Cow<'a, str>,
    subtype: Cow<'a, str>,
    params: Option<Params<'a>>,
}

impl<'a> ContentType<'a> {
    pub fn new<M, S>(mtype: M, subtype: S) -> Self
    where
        M: Into<Cow<'a, str>>,
        S: Into<Cow<'a, str>>,
    {
        Self {
            mtype: mtype.into(),
            subtype: subtype.into(),
            params: None,
        }
    }

    /// The `application/sdp` media type carried by offer/answer bodies.
    pub fn new_sdp() -> Self {
        Self::new("application", "sdp")
    }

    /// Returns `true` for `application/sdp`.
    pub fn is_sdp(&self) -> bool {
        self.mtype.eq_ignore_ascii_case("application") && self.subtype.eq_ignore_ascii_case("sdp")
    }

    pub fn into_owned(self) -> ContentType<'static> {
        ContentType {
            mtype: Cow::Owned(self.mtype.into_owned()),
            subtype: Cow::Owned(self.subtype.into_owned()),
            params: self.params.map(Params::into_owned),
        }
    }
}

impl fmt::Display for ContentType<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}/{}", ContentType::NAME, self.mtype, self.subtype)?;
        if let Some(params) = &self.params {
            write!(f, ";{params}")?;
        }
        Ok(())
    }
}

impl<'a> SipHeaderParse<'a> for ContentType<'a> {
    const NAME: &'static str = "Content-Type";
    const SHORT_NAME: &'static str = "c";

    /*
     * Content-Type     =  ( "Content-Type" / "c" ) HCOLON media-type
     * media-type       =  m-type SLASH m-subtype *(SEMI m-parameter)
     */
    fn parse(parser: &mut Parser<'a>) -> Result<Self> {
        let mtype = parser.parse_token()?;
        parser.must_read(b'/')?;
        let subtype = parser.parse_token()?;
        let params = parse_header_param!(parser);

        Ok(ContentType {
            mtype: mtype.into(),
            subtype: subtype.into(),
            params,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse() {
        let ctype = ContentType::from_bytes(b"application/sdp\r\n").unwrap();

        assert!(ctype.is_sdp());
        assert_eq!(ctype.to_string(), "Content-Type: application/sdp");
    }
}
