//! SIP Parser.
//!
//! Turns datagram bytes into [`SipMsg`] values. Parsing is zero-copy:
//! the resulting message borrows from the input buffer unless a header
//! arrived folded over multiple lines.

use std::borrow::Cow;
use std::str;

use sipua_util::util::{is_alphabetic, is_digit, is_newline, is_space};
use sipua_util::{Position, Scanner};

use crate::error::{Error, ParseErrorKind, Result, SipParseError};
use crate::headers::*;
use crate::macros::{b_map, comma_sep, parse_param};
use crate::message::{
    Host, HostPort, NameAddr, Param, Params, Request, RequestLine, Response, Scheme, SipMethod, SipMsg, SipUri,
    StatusLine, Uri, UriUser,
};

pub(crate) const SIPV2: &str = "SIP/2.0";

const B_SIPV2: &[u8] = SIPV2.as_bytes();
const USER_PARAM: &str = "user";
const METHOD_PARAM: &str = "method";
const TRANSPORT_PARAM: &str = "transport";
const TTL_PARAM: &str = "ttl";
const LR_PARAM: &str = "lr";
const MADDR_PARAM: &str = "maddr";
const SIP: &[u8] = b"sip";
const TEL: &[u8] = b"tel";
const ALPHA_NUM: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
const UNRESERVED: &[u8] = b"-_.!~*'()%";
const ESCAPED: &[u8] = b"%";
const USER_UNRESERVED: &[u8] = b"&=+$,;?/";
const TOKEN: &[u8] = b"-.!%*_`'~+";
const PASS: &[u8] = b"&=+$,";
const HOST: &[u8] = b"_-.";

// For reading the user part in a uri.
b_map!(USER_MAP => ALPHA_NUM, UNRESERVED, USER_UNRESERVED, ESCAPED);
// For reading the password in a uri.
b_map!(PASS_MAP => ALPHA_NUM, UNRESERVED, ESCAPED, PASS);
// For reading the host in a uri.
b_map!(HOST_MAP => ALPHA_NUM, HOST);
// For reading a parameter in a uri.
b_map!(PARAM_MAP => b"[]/:&+$", ALPHA_NUM, UNRESERVED, ESCAPED);
// For reading a header parameter in a uri.
b_map!(HDR_MAP => b"[]/?:+$", ALPHA_NUM, UNRESERVED, ESCAPED);
// For reading a token.
b_map!(TOKEN_MAP => ALPHA_NUM, TOKEN);
// For reading a via parameter.
b_map!(VIA_PARAM_MAP => b"[:]", ALPHA_NUM, TOKEN);

/// A type for parsing SIP messages.
///
/// Provides methods for parsing the components of SIP messages: start
/// lines, headers, URIs and parameters.
pub struct Parser<'buf> {
    scanner: Scanner<'buf>,
}

impl<'buf> Parser<'buf> {
    /// Create a new `Parser` over the given slice.
    pub fn new(buf: &'buf [u8]) -> Self {
        Self {
            scanner: Scanner::new(buf),
        }
    }

    /// Parse a buffer of bytes into a [`SipMsg`].
    ///
    /// # Example
    ///
    /// ```rust
    /// use sipua::parser::Parser;
    /// use sipua::headers::{Header, ContentLength};
    ///
    /// let buf = b"SIP/2.0 200 OK\r\nContent-Length: 0\r\n\r\n";
    /// let mut parser = Parser::new(buf);
    /// let result = parser.parse_sip_msg().unwrap();
    /// let response = result.as_response().unwrap();
    /// assert_eq!(response.code().into_i32(), 200);
    /// assert_eq!(response.reason(), "OK");
    /// assert_eq!(response.headers.len(), 1);
    /// assert_eq!(response.headers[0], Header::ContentLength(0.into()));
    /// ```
    pub fn parse_sip_msg(&mut self) -> Result<SipMsg<'buf>> {
        // Parse the start line and initialize the message with empty
        // headers and body.
        let mut msg = self.parse_start_line()?;
        let mut content_length: Option<u32> = None;

        let headers = msg.headers_mut();

        'headers: loop {
            // Header name.
            let name = self.parse_token()?;

            self.ws();

            let Some(b':') = self.advance() else {
                return self.parse_error("Missing ':' after header name");
            };

            self.ws();

            if Via::matches_name(name) {
                comma_sep!(self => {
                    let header = crate::macros::parse_header!(Via, self);
                    headers.push(Header::Via(header));
                });
            } else if From::matches_name(name) {
                let header = crate::macros::parse_header!(From, self);
                headers.push(Header::From(header));
            } else if To::matches_name(name) {
                let header = crate::macros::parse_header!(To, self);
                headers.push(Header::To(header));
            } else if CallId::matches_name(name) {
                let header = crate::macros::parse_header!(CallId, self);
                headers.push(Header::CallId(header));
            } else if CSeq::matches_name(name) {
                let header = crate::macros::parse_header!(CSeq, self);
                headers.push(Header::CSeq(header));
            } else if Contact::matches_name(name) {
                comma_sep!(self => {
                    let header = crate::macros::parse_header!(Contact, self);
                    headers.push(Header::Contact(header));
                });
            } else if MaxForwards::matches_name(name) {
                let header = crate::macros::parse_header!(MaxForwards, self);
                headers.push(Header::MaxForwards(header));
            } else if ContentLength::matches_name(name) {
                let header = crate::macros::parse_header!(ContentLength, self);
                content_length = Some(header.as_u32());
                headers.push(Header::ContentLength(header));
            } else if ContentType::matches_name(name) {
                let header = crate::macros::parse_header!(ContentType, self);
                headers.push(Header::ContentType(header));
            } else if Route::matches_name(name) {
                comma_sep!(self => {
                    let header = crate::macros::parse_header!(Route, self);
                    headers.push(Header::Route(header));
                });
            } else if RecordRoute::matches_name(name) {
                comma_sep!(self => {
                    let header = crate::macros::parse_header!(RecordRoute, self);
                    headers.push(Header::RecordRoute(header));
                });
            } else if Expires::matches_name(name) {
                let header = crate::macros::parse_header!(Expires, self);
                headers.push(Header::Expires(header));
            } else if Allow::matches_name(name) {
                let header = crate::macros::parse_header!(Allow, self);
                headers.push(Header::Allow(header));
            } else {
                // Not structurally understood; keep it verbatim.
                let value = self.parse_header_value()?;

                headers.push(Header::Other(OtherHeader {
                    name: name.into(),
                    value,
                }));
            }

            if !matches!(self.peek(), Some(b'\r') | Some(b'\n')) {
                return self.parse_error("Missing CRLF at header end");
            }

            // Consume this line ending.
            self.scanner.consume_if(|b| b == b'\r');
            self.scanner.consume_if(|b| b == b'\n');

            if matches!(self.peek(), Some(b'\r') | Some(b'\n') | None) {
                break 'headers;
            }
        }

        // Blank line separating headers from the body. Consumed exactly
        // once; a body may itself start with CRLF.
        self.consume_line_ending();

        let rem = self.scanner.remaining();
        match content_length {
            Some(0) => {}
            Some(len) => {
                let len = len as usize;
                if rem.len() < len {
                    return self.parse_error_kind(
                        ParseErrorKind::Truncated,
                        format!("Body shorter than Content-Length ({} < {})", rem.len(), len),
                    );
                }
                msg.set_body(Some(Cow::Borrowed(&rem[..len])));
            }
            // Without Content-Length the rest of the datagram is the body.
            None if !rem.is_empty() => msg.set_body(Some(Cow::Borrowed(rem))),
            None => {}
        }

        Ok(msg)
    }

    pub(crate) fn parse_error<T, S>(&self, msg: S) -> Result<T>
    where
        S: AsRef<str>,
    {
        self.parse_error_kind(ParseErrorKind::Malformed, msg)
    }

    pub(crate) fn parse_error_kind<T, S>(&self, kind: ParseErrorKind, msg: S) -> Result<T>
    where
        S: AsRef<str>,
    {
        let pos = self.position();

        Err(Error::Parse(
            SipParseError::new(kind, msg.as_ref()).at(pos.line(), pos.col(), self.scanner.offset()),
        ))
    }

    /// Read a header value up to the line ending, unfolding continuation
    /// lines (a line starting with SP or HT continues the previous one).
    pub(crate) fn parse_header_value(&mut self) -> Result<Cow<'buf, str>> {
        let first = self.scanner.read_while(|b| !is_newline(b));
        let first = str::from_utf8(first)?.trim_end();

        if !self.at_fold() {
            return Ok(Cow::Borrowed(first));
        }

        let mut value = String::from(first);
        while self.at_fold() {
            self.consume_line_ending();
            self.scanner.read_while(is_space);

            let cont = self.scanner.read_while(|b| !is_newline(b));
            value.push(' ');
            value.push_str(str::from_utf8(cont)?.trim_end());
        }

        Ok(Cow::Owned(value))
    }

    pub(crate) fn parse_header_str(&mut self) -> Result<&'buf str> {
        let bytes = self.scanner.read_while(|b| !is_newline(b));

        Ok(str::from_utf8(bytes)?)
    }

    // True when the scanner sits on a line ending that is followed by
    // SP or HT, i.e. a folded continuation.
    fn at_fold(&self) -> bool {
        match self.peek() {
            Some(b'\r') => {
                matches!(self.scanner.peek_at(1), Some(b'\n')) && matches!(self.scanner.peek_at(2), Some(b' ' | b'\t'))
            }
            Some(b'\n') => matches!(self.scanner.peek_at(1), Some(b' ' | b'\t')),
            _ => false,
        }
    }

    fn consume_line_ending(&mut self) {
        self.scanner.consume_if(|b| b == b'\r');
        self.scanner.consume_if(|b| b == b'\n');
    }

    /// Read linear whitespace: spaces, tabs, and folded line endings.
    #[inline]
    pub(crate) fn ws(&mut self) {
        loop {
            self.scanner.read_while(is_space);
            if self.at_fold() {
                self.consume_line_ending();
            } else {
                break;
            }
        }
    }

    // Read newline characters.
    #[inline]
    pub(crate) fn new_line(&mut self) {
        self.scanner.read_while(is_newline);
    }

    // Read alphabetic characters.
    #[inline]
    pub(crate) fn alphabetic(&mut self) -> &'buf [u8] {
        self.scanner.read_while(is_alphabetic)
    }

    // SIP version.
    #[inline]
    pub(crate) fn parse_sip_v2(&mut self) -> Result<()> {
        Ok(self.scanner.matches_slice(B_SIPV2)?)
    }

    // SIP Request-Line.
    pub(crate) fn parse_request_line(&mut self) -> Result<RequestLine<'buf>> {
        let method_byte = self.alphabetic();
        let method = SipMethod::from(method_byte);

        self.ws();
        let uri = self.parse_uri(true)?;
        self.ws();

        self.parse_sip_v2()?;
        self.new_line();

        Ok(RequestLine { method, uri })
    }

    // SIP Status-Line.
    pub(crate) fn parse_status_line(&mut self) -> Result<StatusLine<'buf>> {
        self.parse_sip_v2()?;

        self.ws();
        let digits = self.scanner.read_while(is_digit);
        self.ws();

        let code = digits.into();

        let reason_byte = self.scanner.read_while(|b| !is_newline(b));
        let reason = str::from_utf8(reason_byte)?;

        self.new_line();

        Ok(StatusLine::new(code, reason))
    }

    fn parse_scheme(&mut self) -> Result<Scheme> {
        let (scheme_b, colon) = self.scanner.peek_while(is_token);

        let Some(b':') = colon else {
            return self.parse_error_kind(ParseErrorKind::BadUri, "Missing ':' in uri");
        };

        let scheme = if scheme_b.eq_ignore_ascii_case(SIP) {
            Scheme::Sip
        } else if scheme_b.eq_ignore_ascii_case(b"sips") {
            Scheme::Sips
        } else if scheme_b.eq_ignore_ascii_case(TEL) {
            Scheme::Tel
        } else {
            let pos = self.position();
            return Err(Error::Parse(
                SipParseError::new(
                    ParseErrorKind::BadUri,
                    format!("Unsupported URI scheme: {}", String::from_utf8_lossy(scheme_b)),
                )
                .at(pos.line(), pos.col(), self.scanner.offset())
                .with_status(416),
            ));
        };

        // Take the scheme and the ':' character.
        self.scanner.bump_n(scheme_b.len() + 1);

        Ok(scheme)
    }

    fn exists_user_part_in_uri(&self) -> bool {
        let rem = self.scanner.remaining();

        rem.iter()
            .take_while(|&&b| !matches!(b, b' ' | b'>' | b',' | b';' | b'?') && !is_newline(b))
            .any(|&b| b == b'@')
    }

    // The userinfo in a SIP uri.
    pub(crate) fn parse_user_info(&mut self) -> Result<Option<UriUser<'buf>>> {
        // Checks if the uri has a user part at all.
        if !self.exists_user_part_in_uri() {
            return Ok(None);
        }

        let user = self.read_user_str();
        let pass = if let Some(b':') = self.scanner.consume_if(|b| b == b':') {
            Some(Cow::Borrowed(self.read_pass_str()))
        } else {
            None
        };

        // Take '@'.
        self.advance();

        Ok(Some(UriUser {
            user: user.into(),
            pass,
        }))
    }

    pub(crate) fn parse_host_port(&mut self) -> Result<HostPort> {
        let host = match self.scanner.peek() {
            Some(b'[') => {
                // An IPv6 host; the '[' and ']' are not part of it.
                self.advance();
                let host = self.scanner.read_while(|b| b != b']');
                let host = str::from_utf8(host)?;
                self.advance();

                match host.parse() {
                    Ok(addr) => Host::IpAddr(addr),
                    Err(_) => return self.parse_error_kind(ParseErrorKind::BadUri, "Invalid IPv6 host"),
                }
            }
            _ => {
                let host = self.read_host_str();

                if host.is_empty() {
                    return self.parse_error_kind(ParseErrorKind::BadUri, "Empty host");
                }
                match host.parse() {
                    Ok(addr) => Host::IpAddr(addr),
                    Err(_) => Host::DomainName(host.into()),
                }
            }
        };

        let port = self.parse_port()?;

        Ok(HostPort { host, port })
    }

    fn parse_port(&mut self) -> Result<Option<u16>> {
        let Some(b':') = self.scanner.consume_if(|b| b == b':') else {
            return Ok(None);
        };
        let digits = self.scanner.read_u16()?;

        Ok(Some(digits))
    }

    // Parse a URI.
    //
    // With `parse_params == false` the `;`-parameters after the host are
    // left unconsumed; address headers use this so their own parameters
    // are not swallowed by the URI.
    pub(crate) fn parse_uri(&mut self, parse_params: bool) -> Result<Uri<'buf>> {
        let scheme = self.parse_scheme()?;

        if matches!(scheme, Scheme::Tel) {
            return self.parse_tel_uri(parse_params);
        }

        let user = self.parse_user_info()?;
        let host_port = self.parse_host_port()?;

        if !parse_params {
            return Ok(Uri::without_params(scheme, user, host_port));
        }

        // SIP uri parameters.
        let mut user_param = None;
        let mut method_param = None;
        let mut transport_param = None;
        let mut ttl_param = None;
        let mut lr_param = None;
        let mut maddr_param = None;

        let params = parse_param!(
            self,
            parse_uri_param,
            USER_PARAM = user_param,
            METHOD_PARAM = method_param,
            TRANSPORT_PARAM = transport_param,
            TTL_PARAM = ttl_param,
            LR_PARAM = lr_param,
            MADDR_PARAM = maddr_param
        );

        let transport_param = transport_param.map(|s: Cow<str>| s.as_ref().into());
        let ttl_param = ttl_param.and_then(|ttl: Cow<str>| ttl.parse().ok());
        let lr_param = lr_param.is_some();
        let method_param = method_param.map(|p: Cow<str>| p.as_bytes().into());
        let maddr_param = maddr_param.map(|m: Cow<str>| match m.parse() {
            Ok(addr) => Host::IpAddr(addr),
            Err(_) => Host::DomainName(m.as_ref().into()),
        });

        let hdr_params = if let Some(b'?') = self.scanner.consume_if(|b| b == b'?') {
            // The uri has header parameters.
            Some(self.parse_header_params_in_sip_uri()?)
        } else {
            None
        };

        Ok(Uri {
            scheme,
            user,
            host_port,
            user_param,
            method_param,
            transport_param,
            ttl_param,
            lr_param,
            maddr_param,
            params,
            hdr_params,
        })
    }

    fn parse_tel_uri(&mut self, parse_params: bool) -> Result<Uri<'buf>> {
        let number = self
            .scanner
            .read_while(|b| !matches!(b, b';' | b'>' | b' ' | b',' | b'?') && !is_newline(b));

        if number.is_empty() {
            return self.parse_error_kind(ParseErrorKind::BadUri, "Empty tel number");
        }

        let user = Some(UriUser {
            user: Cow::Borrowed(str::from_utf8(number)?),
            pass: None,
        });

        let mut uri = Uri::without_params(Scheme::Tel, user, HostPort::default());

        if parse_params {
            uri.params = crate::macros::parse_header_param!(self);
        }

        Ok(uri)
    }

    fn parse_header_params_in_sip_uri(&mut self) -> Result<Params<'buf>> {
        let mut params = Params::new();

        loop {
            let param = self.parse_hdr_in_uri()?;
            params.push(param);

            if self.scanner.consume_if(|b| b == b'&').is_none() {
                break;
            }
        }
        Ok(params)
    }

    // Parse the start line.
    fn parse_start_line(&mut self) -> Result<SipMsg<'buf>> {
        // Probably enough for most messages.
        let probable_number_of_headers = 10;

        if self.scanner.starts_with(B_SIPV2) {
            // A status line, e.g. "SIP/2.0 200 OK".
            let status_line = match self.parse_status_line() {
                Ok(line) => line,
                Err(_) => {
                    return Err(Error::Parse(SipParseError::not_sip("Error parsing 'Status Line'")));
                }
            };
            let headers = Headers::with_capacity(probable_number_of_headers);

            Ok(SipMsg::Response(Response {
                status_line,
                headers,
                body: None,
            }))
        } else {
            // A request line, e.g. "OPTIONS sip:localhost SIP/2.0".
            let req_line = match self.parse_request_line() {
                Ok(line) => line,
                Err(_) => {
                    return Err(Error::Parse(SipParseError::not_sip("Error parsing 'Request Line'")));
                }
            };
            let headers = Headers::with_capacity(probable_number_of_headers);

            Ok(SipMsg::Request(Request {
                req_line,
                headers,
                body: None,
            }))
        }
    }

    fn parse_display_name(&mut self) -> Result<Option<&'buf str>> {
        match self.scanner.lookahead()? {
            b'"' => {
                self.advance(); // consume '"'
                let name = self.scanner.read_while(|b| b != b'"');
                self.advance(); // consume closing '"'
                Ok(Some(str::from_utf8(name)?))
            }
            b'<' => Ok(None), // no display name
            _ => {
                let name = self.parse_token()?;
                self.ws();
                Ok(Some(name))
            }
        }
    }

    #[inline]
    pub(crate) fn parse_token(&mut self) -> Result<&'buf str> {
        if let Some(b'"') = self.scanner.consume_if(|b| b == b'"') {
            let value = self.scanner.read_while(|b| b != b'"');
            self.advance();

            Ok(str::from_utf8(value)?)
        } else {
            // `is_token` only accepts bytes that are valid UTF-8.
            Ok(self.read_token_str())
        }
    }

    // Parse a SIP uri in either bare or name-addr form.
    pub(crate) fn parse_sip_uri(&mut self, parse_params: bool) -> Result<SipUri<'buf>> {
        self.ws();

        match self.scanner.peek_n(3) {
            Some(b) if b.eq_ignore_ascii_case(SIP) || b.eq_ignore_ascii_case(TEL) => {
                let uri = self.parse_uri(parse_params)?;
                Ok(SipUri::Uri(uri))
            }
            _ => {
                let addr = self.parse_name_addr()?;
                Ok(SipUri::NameAddr(addr))
            }
        }
    }

    #[inline]
    pub(crate) fn advance(&mut self) -> Option<u8> {
        self.scanner.next()
    }

    #[inline]
    pub(crate) fn read_until_byte(&mut self, byte: u8) -> &'buf [u8] {
        self.scanner.take_until(byte)
    }

    #[inline]
    pub(crate) fn peek(&self) -> Option<&u8> {
        self.scanner.peek()
    }

    #[inline]
    pub(crate) fn position(&self) -> &Position {
        self.scanner.position()
    }

    #[inline]
    pub(crate) fn remaining(&self) -> &[u8] {
        self.scanner.remaining()
    }

    #[inline]
    pub(crate) fn parse_u32(&mut self) -> Result<u32> {
        Ok(self.scanner.read_u32()?)
    }

    #[inline]
    pub(crate) fn must_read(&mut self, b: u8) -> Result<()> {
        Ok(self.scanner.must_read(b)?)
    }

    pub(crate) fn parse_name_addr(&mut self) -> Result<NameAddr<'buf>> {
        self.ws();
        let display = self.parse_display_name()?;
        self.ws();

        // must be a '<'
        let Some(b'<') = self.scanner.next() else {
            return self.parse_error("Expected '<' in NameAddr");
        };

        let uri = self.parse_uri(true)?;

        // must be a '>'
        let Some(b'>') = self.scanner.next() else {
            return self.parse_error("Expected '>' in NameAddr");
        };

        Ok(NameAddr {
            display: display.map(Cow::Borrowed),
            uri,
        })
    }

    #[inline]
    pub(crate) unsafe fn read_as_str(&mut self, func: impl Fn(u8) -> bool) -> &'buf str {
        self.scanner.read_as_str(func)
    }

    #[inline]
    fn read_user_str(&mut self) -> &'buf str {
        unsafe { self.read_as_str(is_user) }
    }

    #[inline]
    fn read_pass_str(&mut self) -> &'buf str {
        unsafe { self.read_as_str(is_pass) }
    }

    #[inline]
    fn read_host_str(&mut self) -> &'buf str {
        unsafe { self.read_as_str(is_host) }
    }

    #[inline]
    fn read_token_str(&mut self) -> &'buf str {
        unsafe { self.read_as_str(is_token) }
    }

    pub(crate) unsafe fn parse_param_unchecked<F>(&mut self, func: F) -> Result<Param<'buf>>
    where
        F: Fn(u8) -> bool,
    {
        self.ws();

        let name = unsafe { self.scanner.read_as_str(&func) };

        let Some(b'=') = self.scanner.peek() else {
            return Ok(Param {
                name: name.into(),
                value: None,
            });
        };

        self.advance();

        let value = if let Some(b'"') = self.scanner.peek() {
            self.advance();
            let value = self.scanner.read_while(|b| b != b'"');
            self.advance();

            str::from_utf8(value)?
        } else {
            unsafe { self.scanner.read_as_str(func) }
        };

        Ok(Param {
            name: name.into(),
            value: Some(value.into()),
        })
    }

    // Parse a parameter (";" pname ["=" pvalue]).
    pub(crate) fn parse_param(&mut self) -> Result<Param<'buf>> {
        unsafe { self.parse_param_unchecked(is_token) }
    }

    #[inline]
    fn parse_hdr_in_uri(&mut self) -> Result<Param<'buf>> {
        // SAFETY: `is_hdr_uri` only accepts ASCII bytes, which are always
        // valid UTF-8.
        unsafe { self.parse_param_unchecked(is_hdr_uri) }
    }
}

#[inline(always)]
fn is_user(b: u8) -> bool {
    USER_MAP[b as usize]
}

#[inline(always)]
fn is_pass(b: u8) -> bool {
    PASS_MAP[b as usize]
}

#[inline(always)]
fn is_param(b: u8) -> bool {
    PARAM_MAP[b as usize]
}

#[inline(always)]
fn is_hdr_uri(b: u8) -> bool {
    HDR_MAP[b as usize]
}

#[inline(always)]
pub(crate) fn is_host(b: u8) -> bool {
    HOST_MAP[b as usize]
}

#[inline(always)]
pub(crate) fn is_token(b: u8) -> bool {
    TOKEN_MAP[b as usize]
}

#[inline(always)]
pub(crate) fn is_via_param(b: u8) -> bool {
    VIA_PARAM_MAP[b as usize]
}

#[inline]
pub(crate) fn parse_via_param<'a>(parser: &mut Parser<'a>) -> Result<Param<'a>> {
    // SAFETY: `is_via_param` only accepts ASCII bytes, which are always
    // valid UTF-8.
    unsafe { parser.parse_param_unchecked(is_via_param) }
}

fn parse_uri_param<'a>(parser: &mut Parser<'a>) -> Result<Param<'a>> {
    // SAFETY: `is_param` only accepts ASCII bytes, which are always
    // valid UTF-8.
    let mut param = unsafe { parser.parse_param_unchecked(is_param)? };

    if param.name == LR_PARAM && param.value.is_none() {
        param.value = Some("".into());
    }

    Ok(param)
}

#[cfg(test)]
mod tests {
    use std::borrow::Cow;

    use super::*;
    use crate::message::StatusCode;

    #[test]
    fn test_uri_1() {
        let src = "sip:bob@biloxi.com";
        let parser = &mut Parser::new(src.as_bytes());

        let parsed = parser.parse_sip_uri(true).unwrap();

        assert_eq!(parsed.user().unwrap().user, "bob");
        assert_eq!(parsed.user().unwrap().pass, None);
        assert_eq!(parsed.host_port().host_as_str(), "biloxi.com");
        assert_eq!(parsed.host_port().port, None);
    }

    #[test]
    fn test_uri_2() {
        let src = "sip:bob@192.0.2.201";
        let parser = &mut Parser::new(src.as_bytes());

        let parsed = parser.parse_sip_uri(true).unwrap();

        assert_eq!(parsed.user().unwrap().user, "bob");
        assert!(parsed.host_port().is_ip_addr());
        assert_eq!(parsed.host_port().host_as_str(), "192.0.2.201");
    }

    #[test]
    fn test_uri_3() {
        let src = "sip:bob@[2620:0:2ef0:7070:250:60ff:fe03:32b7]";
        let parser = &mut Parser::new(src.as_bytes());

        let parsed = parser.parse_sip_uri(true).unwrap();

        assert_eq!(parsed.user().unwrap().user, "bob");
        assert_eq!(parsed.host_port().host_as_str(), "2620:0:2ef0:7070:250:60ff:fe03:32b7");
        assert_eq!(parsed.host_port().port, None);
    }

    #[test]
    fn test_uri_4() {
        let src = "sip:bob:pass@biloxi.com:5060";
        let parser = &mut Parser::new(src.as_bytes());

        let parsed = parser.parse_sip_uri(true).unwrap();

        assert_eq!(parsed.user().unwrap().user, "bob");
        assert_eq!(parsed.user().unwrap().pass, Some(Cow::Borrowed("pass")));
        assert_eq!(parsed.host_port().host_as_str(), "biloxi.com");
        assert_eq!(parsed.host_port().port, Some(5060));
    }

    #[test]
    fn test_uri_5() {
        let src = "sip:biloxi.com";
        let parser = &mut Parser::new(src.as_bytes());

        let parsed = parser.parse_sip_uri(true).unwrap();

        assert_eq!(parsed.scheme(), Scheme::Sip);
        assert!(parsed.user().is_none());
        assert_eq!(parsed.host_port().host_as_str(), "biloxi.com");
    }

    #[test]
    fn test_uri_params() {
        let src = "sip:bob@biloxi.com:5060;baz=bar;foo;a=b";
        let parser = &mut Parser::new(src.as_bytes());

        let parsed = parser.parse_sip_uri(true).unwrap();

        assert_eq!(parsed.params().unwrap().get("baz").unwrap().unwrap(), "bar");
        assert_eq!(parsed.params().unwrap().get("foo"), Some(None));
        assert_eq!(parsed.params().unwrap().get("a").unwrap().unwrap(), "b");
    }

    #[test]
    fn test_uri_lr_and_transport_params_are_typed() {
        let src = "sip:proxy.biloxi.com;transport=udp;lr";
        let parser = &mut Parser::new(src.as_bytes());

        let parsed = parser.parse_uri(true).unwrap();

        assert!(parsed.lr_param);
        assert_eq!(parsed.transport_param, Some(crate::message::TransportKind::Udp));
    }

    #[test]
    fn test_uri_header_params() {
        let src = "sip:bob@biloxi.com:5060?baz=bar&foo=&a=b";
        let parser = &mut Parser::new(src.as_bytes());

        let parsed = parser.parse_sip_uri(true).unwrap();

        assert_eq!(parsed.header_params().unwrap().get("baz").unwrap().unwrap(), "bar");
        assert_eq!(parsed.header_params().unwrap().get("foo"), Some(Some("")));
        assert_eq!(parsed.header_params().unwrap().get("a").unwrap().unwrap(), "b");
    }

    #[test]
    fn test_uri_params_and_header_params() {
        let src = "sip:bob@biloxi.com;foo?bar=baz";
        let parser = &mut Parser::new(src.as_bytes());

        let parsed = parser.parse_sip_uri(true).unwrap();

        assert_eq!(parsed.params().unwrap().get("foo"), Some(None));
        assert_eq!(parsed.header_params().unwrap().get("bar").unwrap().unwrap(), "baz");
    }

    #[test]
    fn test_tel_uri() {
        let src = "tel:+1-972-555-2222";
        let parser = &mut Parser::new(src.as_bytes());

        let parsed = parser.parse_uri(true).unwrap();

        assert_eq!(parsed.scheme, Scheme::Tel);
        assert_eq!(parsed.username(), Some("+1-972-555-2222"));
    }

    #[test]
    fn test_unknown_scheme_suggests_416() {
        let src = "http://example.com/";
        let parser = &mut Parser::new(src.as_bytes());

        let err = parser.parse_uri(true).unwrap_err();
        let Error::Parse(err) = err else { panic!("wrong error") };

        assert_eq!(err.kind, ParseErrorKind::BadUri);
        assert_eq!(err.suggested_status, 416);
    }

    #[test]
    fn test_host_port() {
        let src = "example.com:5060";
        let parser = &mut Parser::new(src.as_bytes());

        let parsed = parser.parse_host_port().unwrap();

        assert_eq!(parsed.host, Host::DomainName("example.com".into()));
        assert_eq!(parsed.port, Some(5060));
    }

    #[test]
    fn test_parse_request_without_body() {
        let raw_msg = concat!(
            "INVITE sip:bob@example.com SIP/2.0\r\n",
            "Via: SIP/2.0/UDP pc33.atlanta.com;branch=z9hG4bK776asdhds\r\n",
            "Max-Forwards: 70\r\n",
            "To: Bob <sip:bob@example.com>\r\n",
            "From: Alice <sip:alice@example.com>;tag=1928301774\r\n",
            "Call-ID: a84b4c76e66710\r\n",
            "CSeq: 314159 INVITE\r\n",
            "Content-Length: 0\r\n\r\n"
        );

        let mut parser = Parser::new(raw_msg.as_bytes());
        let sip_msg = parser.parse_sip_msg().unwrap();
        let request = sip_msg.as_request().unwrap();

        let expected_uri = Uri::from_static("sip:bob@example.com").unwrap();
        let expected_headers = crate::headers![
            Header::Via(Via::new_udp("pc33.atlanta.com".parse().unwrap(), Some("z9hG4bK776asdhds"))),
            Header::MaxForwards(MaxForwards::new(70)),
            Header::To(To::from_bytes(b"Bob <sip:bob@example.com>").unwrap()),
            Header::From(From::from_bytes(b"Alice <sip:alice@example.com>;tag=1928301774").unwrap()),
            Header::CallId(CallId::new("a84b4c76e66710")),
            Header::CSeq(CSeq::new(314159, SipMethod::Invite)),
            Header::ContentLength(ContentLength::default()),
        ];

        assert_eq!(request.method(), &SipMethod::Invite);
        assert_eq!(request.req_line.uri, expected_uri);
        assert_eq!(request.headers, expected_headers);
        assert!(request.body.is_none());
    }

    #[test]
    fn test_parse_request_with_body() {
        let raw_msg = concat!(
            "INVITE sip:bob@biloxi.com SIP/2.0\r\n",
            "Via: SIP/2.0/UDP pc33.atlanta.com;branch=z9hG4bK776asdhds\r\n",
            "Max-Forwards: 70\r\n",
            "To: Bob <sip:bob@biloxi.com>\r\n",
            "From: Alice <sip:alice@atlanta.com>;tag=1928301774\r\n",
            "Call-ID: a84b4c76e66710@pc33.atlanta.com\r\n",
            "CSeq: 314159 INVITE\r\n",
            "Contact: <sip:alice@pc33.atlanta.com>\r\n",
            "Content-Type: application/sdp\r\n",
            "Content-Length: 4\r\n",
            "\r\n",
            "Test\r\n",
        );

        let mut parser = Parser::new(raw_msg.as_bytes());
        let sip_msg = parser.parse_sip_msg().unwrap();
        let request = sip_msg.as_request().unwrap();

        assert_eq!(request.method(), &SipMethod::Invite);
        // Content-Length bounds the body, the trailing CRLF is ignored.
        assert_eq!(request.body.as_deref(), Some("Test".as_bytes()));
    }

    #[test]
    fn test_parse_response_without_body() {
        let raw_msg = concat!(
            "SIP/2.0 200 OK\r\n",
            "Via: SIP/2.0/UDP pc33.atlanta.com;branch=z9hG4bK776asdhds\r\n",
            "To: Bob <sip:bob@example.com>;tag=8321234356\r\n",
            "From: Alice <sip:alice@example.com>;tag=1928301774\r\n",
            "Call-ID: a84b4c76e66710\r\n",
            "CSeq: 314159 INVITE\r\n",
            "Content-Length: 0\r\n\r\n"
        );

        let mut parser = Parser::new(raw_msg.as_bytes());
        let msg = parser.parse_sip_msg().unwrap();
        let msg = msg.as_response().unwrap();

        assert_eq!(msg.code(), StatusCode::Ok);
        assert_eq!(msg.reason(), "OK");
        assert_eq!(msg.headers.len(), 6);
        assert!(msg.body.is_none());
    }

    #[test]
    fn test_parse_tolerates_lf_only_line_endings() {
        let raw_msg = concat!(
            "OPTIONS sip:carol@chicago.com SIP/2.0\n",
            "Via: SIP/2.0/UDP pc33.atlanta.com;branch=z9hG4bKhjhs8ass877\n",
            "Max-Forwards: 70\n",
            "To: <sip:carol@chicago.com>\n",
            "From: Alice <sip:alice@atlanta.com>;tag=1928301774\n",
            "Call-ID: a84b4c76e66710\n",
            "CSeq: 63104 OPTIONS\n",
            "Content-Length: 0\n\n"
        );

        let mut parser = Parser::new(raw_msg.as_bytes());
        let msg = parser.parse_sip_msg().unwrap();
        let request = msg.as_request().unwrap();

        assert_eq!(request.method(), &SipMethod::Options);
        assert_eq!(request.headers.len(), 7);
    }

    #[test]
    fn test_parse_unfolds_continuation_lines() {
        let raw_msg = concat!(
            "OPTIONS sip:carol@chicago.com SIP/2.0\r\n",
            "Via: SIP/2.0/UDP pc33.atlanta.com;branch=z9hG4bKhjhs8ass877\r\n",
            "To: <sip:carol@chicago.com>\r\n",
            "From: <sip:alice@atlanta.com>;tag=19\r\n",
            "Call-ID: a84b4c76e66710\r\n",
            "CSeq: 63104 OPTIONS\r\n",
            "Subject: I know you're there,\r\n",
            " pick up the phone\r\n",
            "Content-Length: 0\r\n\r\n"
        );

        let mut parser = Parser::new(raw_msg.as_bytes());
        let msg = parser.parse_sip_msg().unwrap();
        let request = msg.as_request().unwrap();

        let subject = request
            .headers
            .find_map(|h| if let Header::Other(o) = h { Some(o) } else { None })
            .unwrap();

        assert_eq!(subject.name, "Subject");
        assert_eq!(subject.value, "I know you're there, pick up the phone");
    }

    #[test]
    fn test_parse_short_form_header_names() {
        let raw_msg = concat!(
            "OPTIONS sip:carol@chicago.com SIP/2.0\r\n",
            "v: SIP/2.0/UDP pc33.atlanta.com;branch=z9hG4bKhjhs8\r\n",
            "t: <sip:carol@chicago.com>\r\n",
            "f: <sip:alice@atlanta.com>;tag=19\r\n",
            "i: a84b4c76e66710\r\n",
            "CSeq: 63104 OPTIONS\r\n",
            "l: 0\r\n\r\n"
        );

        let mut parser = Parser::new(raw_msg.as_bytes());
        let msg = parser.parse_sip_msg().unwrap();
        let request = msg.as_request().unwrap();

        assert!(matches!(request.headers[0], Header::Via(_)));
        assert!(matches!(request.headers[1], Header::To(_)));
        assert!(matches!(request.headers[2], Header::From(_)));
        assert!(matches!(request.headers[3], Header::CallId(_)));
        assert!(matches!(request.headers[5], Header::ContentLength(_)));
    }

    #[test]
    fn test_parse_truncated_body() {
        let raw_msg = concat!(
            "INVITE sip:bob@biloxi.com SIP/2.0\r\n",
            "Via: SIP/2.0/UDP pc33.atlanta.com;branch=z9hG4bK776asdhds\r\n",
            "Call-ID: a84b4c76e66710\r\n",
            "CSeq: 314159 INVITE\r\n",
            "Content-Length: 100\r\n",
            "\r\n",
            "short",
        );

        let mut parser = Parser::new(raw_msg.as_bytes());
        let err = parser.parse_sip_msg().unwrap_err();
        let Error::Parse(err) = err else { panic!("wrong error") };

        assert_eq!(err.kind, ParseErrorKind::Truncated);
        assert!(err.recoverable);
    }

    #[test]
    fn test_parse_request_with_invalid_uri() {
        let raw_msg = concat!(
            "INVITE bob@biloxi.com SIP/2.0\r\n",
            "Via: SIP/2.0/UDP pc33.atlanta.com;branch=z9hG4bK776asdhds\r\n",
            "Content-Length: 0\r\n\r\n",
        );

        let mut parser = Parser::new(raw_msg.as_bytes());
        let err = parser.parse_sip_msg().unwrap_err();
        let Error::Parse(err) = err else { panic!("wrong error") };

        // A broken start line is not recognizably SIP; never answered.
        assert!(!err.recoverable);
    }

    #[test]
    fn test_parse_multi_value_via_splits_on_comma() {
        let raw_msg = concat!(
            "SIP/2.0 180 Ringing\r\n",
            "Via: SIP/2.0/UDP p1.com;branch=z9hG4bKa, SIP/2.0/UDP p2.com;branch=z9hG4bKb\r\n",
            "To: <sip:bob@biloxi.com>;tag=a\r\n",
            "From: <sip:alice@atlanta.com>;tag=b\r\n",
            "Call-ID: x\r\n",
            "CSeq: 1 INVITE\r\n",
            "Content-Length: 0\r\n\r\n"
        );

        let mut parser = Parser::new(raw_msg.as_bytes());
        let msg = parser.parse_sip_msg().unwrap();
        let response = msg.as_response().unwrap();

        let vias: Vec<_> = response
            .headers
            .iter()
            .filter(|h| matches!(h, Header::Via(_)))
            .collect();

        assert_eq!(vias.len(), 2);
    }

    #[test]
    fn test_comma_inside_quoted_string_is_not_a_separator() {
        let raw_msg = concat!(
            "SIP/2.0 200 OK\r\n",
            "Via: SIP/2.0/UDP p1.com;branch=z9hG4bKa\r\n",
            "Record-Route: \"Proxy, One\" <sip:p1.com;lr>, <sip:p2.com;lr>\r\n",
            "To: <sip:bob@biloxi.com>;tag=a\r\n",
            "From: <sip:alice@atlanta.com>;tag=b\r\n",
            "Call-ID: x\r\n",
            "CSeq: 1 INVITE\r\n",
            "Content-Length: 0\r\n\r\n"
        );

        let mut parser = Parser::new(raw_msg.as_bytes());
        let msg = parser.parse_sip_msg().unwrap();
        let response = msg.as_response().unwrap();

        let routes: Vec<_> = response
            .headers
            .iter()
            .filter(|h| matches!(h, Header::RecordRoute(_)))
            .collect();

        assert_eq!(routes.len(), 2);
    }
}
