use std::fmt::{self, Display};

/// Represents a version of the HTTP spec.
///
/// HTTP/0.9 is only of historic importance; most requests that appear to
/// be HTTP/0.9 are malformed HTTP/1.0 requests and are rejected.
#[derive(Copy, Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum Version {
    /// HTTP/1.0 protocol version.
    Http10,
    /// HTTP/1.1 protocol version as described in RFC7230 and others.
    Http11,
}

impl Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        use self::Version::*;
        f.write_str(match *self {
            Http10 => "HTTP/1.0",
            Http11 => "HTTP/1.1",
        })
    }
}
