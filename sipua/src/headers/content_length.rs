use core::fmt;

use crate::error::Result;
use crate::headers::SipHeaderParse;
use crate::parser::Parser;

/// The `Content-Length` SIP header.
///
/// The size of the message body in bytes.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Default)]
pub struct ContentLength(u32);

impl ContentLength {
    pub fn new(value: u32) -> Self {
        Self(value)
    }

    pub fn as_u32(&self) -> u32 {
        self.0
    }
}

impl From<u32> for ContentLength {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

impl fmt::Display for ContentLength {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", ContentLength::NAME, self.0)
    }
}

impl<'a> SipHeaderParse<'a> for ContentLength {
    const NAME: &'static str = "Content-Length";
    const SHORT_NAME: &'static str = "l";

    /*
     * Content-Length  =  ( "Content-Length" / "l" ) HCOLON 1*DIGIT
     */
    fn parse(parser: &mut Parser<'a>) -> Result<Self> {
        Ok(ContentLength(parser.parse_u32()?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse() {
        let clen = ContentLength::from_bytes(b"349\r\n").unwrap();

        assert_eq!(clen.as_u32(), 349);
    }
}
