use core::fmt;
use std::borrow::Cow;

use crate::error::Result;
use crate::headers::SipHeaderParse;
use crate::parser::Parser;

/// The `Call-ID` SIP header.
///
/// Uniquely identifies a particular invitation or all registrations of a
/// particular client.
///
/// # Examples
///
/// ```
/// # use sipua::headers::CallId;
/// let cid = CallId::new("a84b4c76e66710@pc33.atlanta.com");
///
/// assert_eq!(cid.to_string(), "Call-ID: a84b4c76e66710@pc33.atlanta.com");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CallId<'a>(Cow<'a, str>);

impl<'a> CallId<'a> {
    pub fn new<T: Into<Cow<'a, str>>>(id: T) -> Self {
        Self(id.into())
    }

    /// Returns the Call-ID value.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_owned(self) -> CallId<'static> {
        CallId(Cow::Owned(self.0.into_owned()))
    }
}

impl fmt::Display for CallId<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", CallId::NAME, self.0)
    }
}

impl<'a> SipHeaderParse<'a> for CallId<'a> {
    const NAME: &'static str = "Call-ID";
    const SHORT_NAME: &'static str = "i";

    /*
     * Call-ID  =  ( "Call-ID" / "i" ) HCOLON callid
     * callid   =  word [ "@" word ]
     */
    fn parse(parser: &mut Parser<'a>) -> Result<Self> {
        let id = parser.parse_header_str()?;

        Ok(CallId(id.trim_end().into()))
    }
}
