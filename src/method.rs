use std::fmt::{self, Display};
use std::str::FromStr;

/// HTTP request method.
///
/// `All` is the pseudo-verb used when registering a route for every
/// method; it never appears on the wire.
#[derive(Copy, Clone, Debug, Eq, Hash, PartialEq)]
pub enum Method {
    Get,
    Head,
    Post,
    Put,
    Delete,
    Options,
    Trace,
    Connect,
    Patch,
    All,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        use self::Method::*;
        match *self {
            Get => "GET",
            Head => "HEAD",
            Post => "POST",
            Put => "PUT",
            Delete => "DELETE",
            Options => "OPTIONS",
            Trace => "TRACE",
            Connect => "CONNECT",
            Patch => "PATCH",
            All => "ALL",
        }
    }
}

impl Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The method token was not recognized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownMethod(pub String);

impl FromStr for Method {
    type Err = UnknownMethod;
    fn from_str(s: &str) -> Result<Method, UnknownMethod> {
        use self::Method::*;
        let m = match s.len() {
            3 if s.eq_ignore_ascii_case("get") => Get,
            3 if s.eq_ignore_ascii_case("put") => Put,
            3 if s.eq_ignore_ascii_case("all") => All,
            4 if s.eq_ignore_ascii_case("head") => Head,
            4 if s.eq_ignore_ascii_case("post") => Post,
            5 if s.eq_ignore_ascii_case("patch") => Patch,
            5 if s.eq_ignore_ascii_case("trace") => Trace,
            6 if s.eq_ignore_ascii_case("delete") => Delete,
            7 if s.eq_ignore_ascii_case("options") => Options,
            7 if s.eq_ignore_ascii_case("connect") => Connect,
            _ => return Err(UnknownMethod(s.to_string())),
        };
        Ok(m)
    }
}
