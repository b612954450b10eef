use std::fmt;

/// A SIP response status code.
///
/// Named variants cover the codes this stack generates or branches on;
/// everything else round-trips through [`StatusCode::Code`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusCode {
    /// 100 Trying.
    Trying,
    /// 180 Ringing.
    Ringing,
    /// 183 Session Progress.
    SessionProgress,
    /// 200 OK.
    Ok,
    /// 400 Bad Request.
    BadRequest,
    /// 401 Unauthorized.
    Unauthorized,
    /// 403 Forbidden.
    Forbidden,
    /// 404 Not Found.
    NotFound,
    /// 407 Proxy Authentication Required.
    ProxyAuthenticationRequired,
    /// 408 Request Timeout.
    RequestTimeout,
    /// 415 Unsupported Media Type.
    UnsupportedMediaType,
    /// 416 Unsupported URI Scheme.
    UnsupportedUriScheme,
    /// 480 Temporarily Unavailable.
    TemporarilyUnavailable,
    /// 481 Call/Transaction Does Not Exist.
    CallOrTransactionDoesNotExist,
    /// 486 Busy Here.
    BusyHere,
    /// 487 Request Terminated.
    RequestTerminated,
    /// 500 Server Internal Error.
    ServerInternalError,
    /// 501 Not Implemented.
    NotImplemented,
    /// 503 Service Unavailable.
    ServiceUnavailable,
    /// 603 Decline.
    Decline,
    /// Any other status code.
    Code(u16),
}

impl StatusCode {
    /// Returns the numeric status code.
    pub fn into_i32(self) -> i32 {
        self.as_u16() as i32
    }

    /// Returns the numeric status code.
    pub fn as_u16(self) -> u16 {
        match self {
            StatusCode::Trying => 100,
            StatusCode::Ringing => 180,
            StatusCode::SessionProgress => 183,
            StatusCode::Ok => 200,
            StatusCode::BadRequest => 400,
            StatusCode::Unauthorized => 401,
            StatusCode::Forbidden => 403,
            StatusCode::NotFound => 404,
            StatusCode::ProxyAuthenticationRequired => 407,
            StatusCode::RequestTimeout => 408,
            StatusCode::UnsupportedMediaType => 415,
            StatusCode::UnsupportedUriScheme => 416,
            StatusCode::TemporarilyUnavailable => 480,
            StatusCode::CallOrTransactionDoesNotExist => 481,
            StatusCode::BusyHere => 486,
            StatusCode::RequestTerminated => 487,
            StatusCode::ServerInternalError => 500,
            StatusCode::NotImplemented => 501,
            StatusCode::ServiceUnavailable => 503,
            StatusCode::Decline => 603,
            StatusCode::Code(code) => code,
        }
    }

    /// The default reason phrase for this status code.
    pub fn reason(&self) -> &'static str {
        match self {
            StatusCode::Trying => "Trying",
            StatusCode::Ringing => "Ringing",
            StatusCode::SessionProgress => "Session Progress",
            StatusCode::Ok => "OK",
            StatusCode::BadRequest => "Bad Request",
            StatusCode::Unauthorized => "Unauthorized",
            StatusCode::Forbidden => "Forbidden",
            StatusCode::NotFound => "Not Found",
            StatusCode::ProxyAuthenticationRequired => "Proxy Authentication Required",
            StatusCode::RequestTimeout => "Request Timeout",
            StatusCode::UnsupportedMediaType => "Unsupported Media Type",
            StatusCode::UnsupportedUriScheme => "Unsupported URI Scheme",
            StatusCode::TemporarilyUnavailable => "Temporarily Unavailable",
            StatusCode::CallOrTransactionDoesNotExist => "Call/Transaction Does Not Exist",
            StatusCode::BusyHere => "Busy Here",
            StatusCode::RequestTerminated => "Request Terminated",
            StatusCode::ServerInternalError => "Server Internal Error",
            StatusCode::NotImplemented => "Not Implemented",
            StatusCode::ServiceUnavailable => "Service Unavailable",
            StatusCode::Decline => "Decline",
            StatusCode::Code(_) => "Unknown",
        }
    }

    /// Returns `true` for 1xx responses.
    pub fn is_provisional(&self) -> bool {
        matches!(self.as_u16(), 100..=199)
    }

    /// Returns `true` for 2xx responses.
    pub fn is_success(&self) -> bool {
        matches!(self.as_u16(), 200..=299)
    }

    /// Returns `true` for any final (non-1xx) response.
    pub fn is_final(&self) -> bool {
        self.as_u16() >= 200
    }

    /// Returns `true` for 3xx-6xx responses.
    pub fn is_failure(&self) -> bool {
        self.as_u16() >= 300
    }
}

impl From<u16> for StatusCode {
    fn from(code: u16) -> Self {
        match code {
            100 => StatusCode::Trying,
            180 => StatusCode::Ringing,
            183 => StatusCode::SessionProgress,
            200 => StatusCode::Ok,
            400 => StatusCode::BadRequest,
            401 => StatusCode::Unauthorized,
            403 => StatusCode::Forbidden,
            404 => StatusCode::NotFound,
            407 => StatusCode::ProxyAuthenticationRequired,
            408 => StatusCode::RequestTimeout,
            415 => StatusCode::UnsupportedMediaType,
            416 => StatusCode::UnsupportedUriScheme,
            480 => StatusCode::TemporarilyUnavailable,
            481 => StatusCode::CallOrTransactionDoesNotExist,
            486 => StatusCode::BusyHere,
            487 => StatusCode::RequestTerminated,
            500 => StatusCode::ServerInternalError,
            501 => StatusCode::NotImplemented,
            503 => StatusCode::ServiceUnavailable,
            603 => StatusCode::Decline,
            other => StatusCode::Code(other),
        }
    }
}

impl From<i32> for StatusCode {
    fn from(code: i32) -> Self {
        (code as u16).into()
    }
}

impl From<&[u8]> for StatusCode {
    fn from(digits: &[u8]) -> Self {
        let code: u16 = std::str::from_utf8(digits)
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(0);

        code.into()
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_u16())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_codes_canonicalize() {
        assert_eq!(StatusCode::from(200u16), StatusCode::Ok);
        assert_eq!(StatusCode::from(487u16), StatusCode::RequestTerminated);
        assert_eq!(StatusCode::from(799u16), StatusCode::Code(799));
    }

    #[test]
    fn test_classification() {
        assert!(StatusCode::Ringing.is_provisional());
        assert!(StatusCode::Ok.is_success());
        assert!(StatusCode::Ok.is_final());
        assert!(!StatusCode::Ok.is_failure());
        assert!(StatusCode::BusyHere.is_failure());
    }
}
