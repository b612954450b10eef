use core::fmt;

use crate::error::Result;
use crate::headers::SipHeaderParse;
use crate::message::SipMethod;
use crate::parser::Parser;

/// The `CSeq` SIP header.
///
/// Orders transactions within a dialog and matches responses to
/// requests.
///
/// # Examples
///
/// ```
/// # use sipua::{headers::CSeq, message::SipMethod};
/// let cseq = CSeq::new(1, SipMethod::Options);
///
/// assert_eq!(cseq.to_string(), "CSeq: 1 OPTIONS");
/// ```
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct CSeq {
    pub cseq: u32,
    pub method: SipMethod,
}

impl CSeq {
    /// Creates a new `CSeq` instance.
    pub fn new(cseq: u32, method: SipMethod) -> Self {
        Self { cseq, method }
    }

    /// Returns the sequence number.
    pub fn cseq(&self) -> u32 {
        self.cseq
    }

    /// Returns the method associated with the sequence number.
    pub fn method(&self) -> &SipMethod {
        &self.method
    }
}

impl fmt::Display for CSeq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {} {}", CSeq::NAME, self.cseq, self.method)
    }
}

impl<'a> SipHeaderParse<'a> for CSeq {
    const NAME: &'static str = "CSeq";

    /*
     * CSeq  =  "CSeq" HCOLON 1*DIGIT LWS Method
     */
    fn parse(parser: &mut Parser<'a>) -> Result<CSeq> {
        let cseq = parser.parse_u32()?;

        parser.ws();
        let b_method = parser.alphabetic();
        let method = SipMethod::from(b_method);

        Ok(CSeq { cseq, method })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse() {
        let src = b"4711 INVITE\r\n";
        let mut parser = Parser::new(src);
        let cseq = CSeq::parse(&mut parser).unwrap();

        assert_eq!(parser.remaining(), b"\r\n");
        assert_eq!(cseq.method, SipMethod::Invite);
        assert_eq!(cseq.cseq, 4711);
    }
}
