use std::fmt;
use std::io;
use std::num::ParseIntError;
use std::str::Utf8Error;

use quick_error::quick_error;

quick_error! {
    /// Error produced while reading a request off the wire.
    ///
    /// Note, you should not make an exhaustive match over the enum.
    /// More errors will be added at will. Use the `HttpError` trait to
    /// map one onto a response status instead.
    #[derive(Debug)]
    pub enum ParseError {
        HeadersTooLarge {
            display("headers are larger than the configured limit")
        }
        BadHeaders(e: httparse::Error) {
            from()
            display("error parsing headers: {:?}", e)
        }
        InvalidChunkSize {
            display("error parsing chunk size")
        }
        DuplicateContentLength {
            display("duplicate `Content-Length` header in request")
        }
        ConflictingBodyHeaders {
            display("both `Content-Length` and `Transfer-Encoding` \
                     present in request")
        }
        BadContentLength(e: ParseIntError) {
            from()
            display("error parsing `Content-Length` header: {}", e)
        }
        BadUtf8(e: Utf8Error) {
            from()
            display("bad utf8 in one of the crucial headers: {}", e)
        }
        BadMethod(token: String) {
            display("unrecognized request method: {:?}", token)
        }
        BadVersion {
            display("unsupported HTTP version")
        }
        BadUrl {
            display("request target is not a valid url")
        }
        PayloadTooLarge {
            display("payload is larger than is allowed by server settings")
        }
        PrematureEndOfStream {
            display("premature end of stream")
        }
    }
}

impl From<httparse::InvalidChunkSize> for ParseError {
    fn from(_: httparse::InvalidChunkSize) -> ParseError {
        ParseError::InvalidChunkSize
    }
}

/// A trait which represents an error which can be formatted as an HTTP
/// error page.
pub trait HttpError {
    /// Return HTTP status code and status text.
    ///
    /// The status text and code are also printed on the error page
    /// itself.
    fn http_status(&self) -> (u16, &'static str);
}

impl HttpError for ParseError {
    fn http_status(&self) -> (u16, &'static str) {
        use self::ParseError::*;
        match *self {
            HeadersTooLarge => (431, "Request Header Fields Too Large"),
            BadHeaders(_) => (400, "Bad Request"),
            InvalidChunkSize => (400, "Bad Request"),
            DuplicateContentLength => (400, "Bad Request"),
            ConflictingBodyHeaders => (400, "Bad Request"),
            BadContentLength(_) => (400, "Bad Request"),
            BadUtf8(_) => (400, "Bad Request"),
            BadMethod(_) => (400, "Bad Request"),
            BadVersion => (505, "HTTP Version Not Supported"),
            BadUrl => (400, "Bad Request"),
            PayloadTooLarge => (413, "Payload Too Large"),
            PrematureEndOfStream => (400, "Bad Request"),
        }
    }
}

/// Error passed along a dispatch chain by handlers, policies and
/// streaming callbacks.
///
/// Carries an optional status hint (a policy denial defaults to 403, a
/// handler error to 500 when the hint is absent) and an optional stack
/// description for error pages.
#[derive(Debug, Clone)]
pub struct HandlerError {
    message: String,
    status: Option<u16>,
    stack: Option<String>,
}

impl HandlerError {
    pub fn new<S: Into<String>>(message: S) -> HandlerError {
        HandlerError {
            message: message.into(),
            status: None,
            stack: None,
        }
    }

    /// Attach a status hint overriding the stage default.
    pub fn with_status(mut self, status: u16) -> HandlerError {
        self.status = Some(status);
        self
    }

    pub fn with_stack<S: Into<String>>(mut self, stack: S) -> HandlerError {
        self.stack = Some(stack.into());
        self
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn status(&self) -> Option<u16> {
        self.status
    }

    pub fn stack(&self) -> Option<&str> {
        self.stack.as_deref()
    }
}

impl fmt::Display for HandlerError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for HandlerError {}

impl From<&str> for HandlerError {
    fn from(s: &str) -> HandlerError {
        HandlerError::new(s)
    }
}

impl From<String> for HandlerError {
    fn from(s: String) -> HandlerError {
        HandlerError::new(s)
    }
}

impl From<io::Error> for HandlerError {
    fn from(e: io::Error) -> HandlerError {
        HandlerError::new(e.to_string())
    }
}

impl From<ParseError> for HandlerError {
    fn from(e: ParseError) -> HandlerError {
        let (status, _) = e.http_status();
        HandlerError::new(e.to_string()).with_status(status)
    }
}
