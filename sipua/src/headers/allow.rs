use core::fmt;

use crate::error::Result;
use crate::headers::SipHeaderParse;
use crate::macros::comma_sep;
use crate::message::SipMethod;
use crate::parser::Parser;

/// The `Allow` SIP header.
///
/// Lists the methods supported by the user agent generating the message.
#[derive(Debug, PartialEq, Eq, Clone, Default)]
pub struct Allow(Vec<SipMethod>);

impl Allow {
    pub fn new(methods: Vec<SipMethod>) -> Self {
        Self(methods)
    }

    /// The methods this stack implements.
    pub fn dialog_methods() -> Self {
        Self(vec![
            SipMethod::Invite,
            SipMethod::Ack,
            SipMethod::Bye,
            SipMethod::Cancel,
            SipMethod::Options,
        ])
    }

    pub fn contains(&self, method: &SipMethod) -> bool {
        self.0.contains(method)
    }

    pub fn iter(&self) -> impl Iterator<Item = &SipMethod> {
        self.0.iter()
    }
}

impl fmt::Display for Allow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: ", Allow::NAME)?;
        let mut first = true;
        for method in &self.0 {
            if !first {
                write!(f, ", ")?;
            }
            first = false;
            write!(f, "{method}")?;
        }
        Ok(())
    }
}

impl<'a> SipHeaderParse<'a> for Allow {
    const NAME: &'static str = "Allow";

    /*
     * Allow  =  "Allow" HCOLON [Method *(COMMA Method)]
     */
    fn parse(parser: &mut Parser<'a>) -> Result<Self> {
        let mut methods = Vec::new();

        comma_sep!(parser => {
            let method = parser.alphabetic();
            if !method.is_empty() {
                methods.push(SipMethod::from(method));
            }
        });

        Ok(Allow(methods))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse() {
        let allow = Allow::from_bytes(b"INVITE, ACK, OPTIONS, CANCEL, BYE\r\n").unwrap();

        assert!(allow.contains(&SipMethod::Invite));
        assert!(allow.contains(&SipMethod::Bye));
        assert!(!allow.contains(&SipMethod::Register));
        assert_eq!(allow.to_string(), "Allow: INVITE, ACK, OPTIONS, CANCEL, BYE");
    }
}
