use core::fmt;

use crate::error::Result;
use crate::headers::SipHeaderParse;
use crate::parser::Parser;

/// The `Expires` SIP header.
///
/// The relative time after which the message or content expires, in
/// seconds.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct Expires(u32);

impl Expires {
    pub fn new(value: u32) -> Self {
        Self(value)
    }

    pub fn as_u32(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for Expires {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", Expires::NAME, self.0)
    }
}

impl<'a> SipHeaderParse<'a> for Expires {
    const NAME: &'static str = "Expires";

    /*
     * Expires  =  "Expires" HCOLON delta-seconds
     */
    fn parse(parser: &mut Parser<'a>) -> Result<Self> {
        Ok(Expires(parser.parse_u32()?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse() {
        let expires = Expires::from_bytes(b"7200\r\n").unwrap();

        assert_eq!(expires.as_u32(), 7200);
    }
}
