macro_rules! b_map {
    ($name:ident => $( $slice:expr ),+) => {
        const $name: [bool; 256] = {
            let mut arr = [false; 256];
            $(
                let slice = $slice;
                let mut i = 0;
                while i < slice.len() {
                    arr[slice[i] as usize] = true;
                    i += 1;
                }
            )*
            arr
        };
    };
}

macro_rules! parse_header_param {
    ($parser:ident) => (
        $crate::macros::parse_param!(
            $parser,
            $crate::parser::Parser::parse_param,
        )
    );

    ($parser:ident, $($name:ident = $var:expr),*) => (
        $crate::macros::parse_param!(
            $parser,
            $crate::parser::Parser::parse_param,
            $($name = $var),*
        )
    );
}

macro_rules! parse_param {
    (
        $parser:ident,
        $func:expr,
        $($name:ident = $var:expr),*
    ) =>  {{
        $parser.ws();
        match $parser.peek() {
            Some(b';') => {
                let mut params = $crate::message::Params::new();
                while let Some(b';') = $parser.peek() {
                        // take ';' character
                        $parser.advance();
                        let param = $func($parser)?;
                        $(
                            if param.name == $name {
                                $var = param.value;
                                $parser.ws();
                                continue;
                            }
                        )*
                        params.push(param);
                        $parser.ws();
                    }
                    if params.is_empty() {
                        None
                    } else {
                        Some(params)
                    }
                },
                _ => {
                    None
                }
            }
        }};
    }

macro_rules! comma_sep {
    ($parser:ident => $body:expr) => {{
        $parser.ws();
        $body

        while let Some(b',') = $parser.peek() {
            $parser.advance();
            $parser.ws();
            $body
        }
    }};
}

macro_rules! parse_error {
    ($message:expr) => {{
        Err($crate::error::Error::Parse($crate::error::SipParseError::new(
            $crate::error::ParseErrorKind::Malformed,
            $message,
        )))
    }};
    ($kind:expr, $message:expr) => {{
        Err($crate::error::Error::Parse($crate::error::SipParseError::new(
            $kind, $message,
        )))
    }};
}

macro_rules! parse_header {
    ($header:ident, $parser:ident) => {{
        match $header::parse($parser) {
            Ok(header) => header,
            Err(_) => {
                return $parser.parse_error(format!("Error parsing '{}' header", $header::NAME));
            }
        }
    }};
}

/// Builds a [`Headers`](crate::headers::Headers) collection from a list of
/// [`Header`](crate::headers::Header) values.
#[macro_export]
macro_rules! headers {
    ($($header:expr),* $(,)?) => {{
        let headers: Vec<$crate::headers::Header> = vec![$($header),*];
        $crate::headers::Headers::from(headers)
    }};
}

#[macro_export]
macro_rules! filter_map_header {
    ($hdrs:expr, $header:ident) => {
        $hdrs.filter_map(|hdr| {
            if let $crate::headers::Header::$header(v) = hdr {
                Some(v)
            } else {
                None
            }
        })
    };
}

#[macro_export]
macro_rules! find_map_header {
    ($hdrs:expr, $header:ident) => {
        $hdrs.find_map(|hdr| {
            if let $crate::headers::Header::$header(v) = hdr {
                Some(v)
            } else {
                None
            }
        })
    };
}

pub(crate) use b_map;
pub(crate) use comma_sep;
pub(crate) use parse_error;
pub(crate) use parse_header;
pub(crate) use parse_header_param;
pub(crate) use parse_param;
