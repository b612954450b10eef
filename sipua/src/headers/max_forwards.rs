use core::fmt;

use crate::error::Result;
use crate::headers::SipHeaderParse;
use crate::parser::Parser;

/// The `Max-Forwards` SIP header.
///
/// Limits the number of hops a request can make on the way to its
/// destination.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct MaxForwards(u32);

impl MaxForwards {
    pub fn new(value: u32) -> Self {
        Self(value)
    }

    pub fn as_u32(&self) -> u32 {
        self.0
    }
}

impl Default for MaxForwards {
    fn default() -> Self {
        Self(70)
    }
}

impl fmt::Display for MaxForwards {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", MaxForwards::NAME, self.0)
    }
}

impl<'a> SipHeaderParse<'a> for MaxForwards {
    const NAME: &'static str = "Max-Forwards";

    /*
     * Max-Forwards  =  "Max-Forwards" HCOLON 1*DIGIT
     */
    fn parse(parser: &mut Parser<'a>) -> Result<Self> {
        Ok(MaxForwards(parser.parse_u32()?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse() {
        let m = MaxForwards::from_bytes(b"70\r\n").unwrap();

        assert_eq!(m.as_u32(), 70);
        assert_eq!(m.to_string(), "Max-Forwards: 70");
    }
}
