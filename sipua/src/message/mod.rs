//! SIP Message types.
//!
//! The module provides the [`SipMsg`] enum that represents a SIP message,
//! either a [`Request`] or a [`Response`], plus the types both are built
//! from: methods, status codes, URIs and parameters.

use std::borrow::Cow;

use enum_as_inner::EnumAsInner;

use crate::headers::Headers;
use crate::parser::SIPV2;

mod code;
mod method;
mod params;
mod protocol;
mod uri;

pub use code::*;
pub use method::*;
pub use params::*;
pub use protocol::*;
pub use uri::*;

/// A SIP message, either Request or Response.
#[derive(Debug, EnumAsInner)]
pub enum SipMsg<'m> {
    /// A SIP Request.
    Request(Request<'m>),
    /// A SIP Response.
    Response(Response<'m>),
}

impl<'m> SipMsg<'m> {
    /// Returns a reference to the headers of the message.
    pub fn headers(&self) -> &Headers<'m> {
        match self {
            SipMsg::Request(req) => &req.headers,
            SipMsg::Response(res) => &res.headers,
        }
    }

    /// Returns a mutable reference to the headers of the message.
    pub fn headers_mut(&mut self) -> &mut Headers<'m> {
        match self {
            SipMsg::Request(req) => &mut req.headers,
            SipMsg::Response(res) => &mut res.headers,
        }
    }

    /// Returns the message body, if present.
    pub fn body(&self) -> Option<&[u8]> {
        match self {
            SipMsg::Request(request) => request.body.as_deref(),
            SipMsg::Response(response) => response.body.as_deref(),
        }
    }

    /// Sets the body of the message. `None` removes it.
    pub fn set_body(&mut self, body: Option<Cow<'m, [u8]>>) {
        match self {
            SipMsg::Request(req) => req.body = body,
            SipMsg::Response(res) => res.body = body,
        }
    }
}

impl<'m> From<Request<'m>> for SipMsg<'m> {
    fn from(value: Request<'m>) -> Self {
        SipMsg::Request(value)
    }
}

impl<'m> From<Response<'m>> for SipMsg<'m> {
    fn from(value: Response<'m>) -> Self {
        SipMsg::Response(value)
    }
}

/// Represents a SIP Request-Line: the method plus the Request-URI naming
/// the target of the request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestLine<'a> {
    /// The SIP method associated with the request (e.g., INVITE, BYE).
    pub method: SipMethod,
    /// The Request-URI indicating the target of the request.
    pub uri: Uri<'a>,
}

impl std::fmt::Display for RequestLine<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {} {SIPV2}\r\n", self.method, self.uri)
    }
}

/// A parsed SIP Request.
#[derive(Debug)]
pub struct Request<'r> {
    /// The Request-Line of the SIP message.
    pub req_line: RequestLine<'r>,
    /// All headers present in the SIP message.
    pub headers: Headers<'r>,
    /// The body of the SIP message, if present.
    pub body: Option<Cow<'r, [u8]>>,
}

impl<'r> Request<'r> {
    /// Creates a new SIP `Request` with empty headers and no body.
    pub fn new(method: SipMethod, uri: Uri<'r>) -> Self {
        Request {
            req_line: RequestLine { method, uri },
            headers: Default::default(),
            body: None,
        }
    }

    /// Creates a new `Request` with the given headers.
    #[inline]
    pub const fn new_with_headers(method: SipMethod, uri: Uri<'r>, headers: Headers<'r>) -> Self {
        Self {
            req_line: RequestLine { method, uri },
            headers,
            body: None,
        }
    }

    /// Returns the SIP method of the request.
    pub fn method(&self) -> &SipMethod {
        &self.req_line.method
    }

    /// Converts this `Request` into an owned version of itself, detached
    /// from the datagram buffer it was parsed from.
    pub fn into_owned(self) -> Request<'static> {
        Request {
            req_line: RequestLine {
                method: self.req_line.method,
                uri: self.req_line.uri.into_owned(),
            },
            headers: self.headers.into_owned(),
            body: self.body.map(|b| Cow::Owned(b.into_owned())),
        }
    }
}

/// Represents a SIP Status-Line: the status code plus a reason phrase
/// explaining the result of the request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusLine<'a> {
    /// The SIP status code associated with the response (e.g., 200, 404).
    pub code: StatusCode,
    /// The reason phrase explaining the status code (e.g., "OK").
    pub reason: Cow<'a, str>,
}

impl<'a> StatusLine<'a> {
    /// Creates a new `StatusLine` from the given [`StatusCode`] and reason.
    pub fn new<R: Into<Cow<'a, str>>>(code: StatusCode, reason: R) -> Self {
        StatusLine {
            code,
            reason: reason.into(),
        }
    }
}

impl std::fmt::Display for StatusLine<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{SIPV2} {} {}\r\n", self.code.into_i32(), self.reason)
    }
}

/// A parsed SIP Response.
#[derive(Debug)]
pub struct Response<'a> {
    /// The Status-Line of the SIP message.
    pub status_line: StatusLine<'a>,
    /// All headers present in the SIP message.
    pub headers: Headers<'a>,
    /// The body of the SIP message, if present.
    pub body: Option<Cow<'a, [u8]>>,
}

impl<'a> Response<'a> {
    /// Creates a new SIP `Response` with empty headers and no body.
    pub fn new(status_line: StatusLine<'a>) -> Self {
        Self {
            status_line,
            headers: Default::default(),
            body: None,
        }
    }

    /// Creates a `Response` with the default reason phrase for `code`.
    pub fn from_code(code: StatusCode) -> Self {
        Self::new(StatusLine::new(code, code.reason()))
    }

    /// Returns the response status code.
    pub fn code(&self) -> StatusCode {
        self.status_line.code
    }

    /// Returns the reason phrase.
    pub fn reason(&self) -> &str {
        &self.status_line.reason
    }

    /// Creates a new `Response` with the given `Status-Line` and headers.
    pub const fn new_with_headers(status_line: StatusLine<'a>, headers: Headers<'a>) -> Self {
        Self {
            status_line,
            headers,
            body: None,
        }
    }

    /// Sets the headers of the response, replacing any existing headers.
    pub fn set_headers(&mut self, headers: Headers<'a>) {
        self.headers = headers;
    }

    /// Appends headers from another collection, leaving `other` empty.
    pub fn append_headers(&mut self, other: &mut Headers<'a>) {
        self.headers.append(other);
    }

    /// Converts this `Response` into an owned version of itself.
    pub fn into_owned(self) -> Response<'static> {
        Response {
            status_line: StatusLine {
                code: self.status_line.code,
                reason: Cow::Owned(self.status_line.reason.into_owned()),
            },
            headers: self.headers.into_owned(),
            body: self.body.map(|b| Cow::Owned(b.into_owned())),
        }
    }
}
