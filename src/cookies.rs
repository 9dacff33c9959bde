//! Cookie parsing and `Set-Cookie` serialization.

use std::fmt::Write;

use crate::headers::HeaderMap;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SameSite {
    Strict,
    Lax,
    None,
}

impl SameSite {
    fn as_str(&self) -> &'static str {
        match *self {
            SameSite::Strict => "Strict",
            SameSite::Lax => "Lax",
            SameSite::None => "None",
        }
    }
}

/// An outgoing cookie with its attributes.
#[derive(Debug, Clone)]
pub struct Cookie {
    pub name: String,
    pub value: String,
    pub path: Option<String>,
    pub domain: Option<String>,
    pub expires: Option<String>,
    pub max_age: Option<i64>,
    pub secure: bool,
    pub http_only: bool,
    pub same_site: Option<SameSite>,
}

impl Cookie {
    pub fn new<N: Into<String>, V: Into<String>>(name: N, value: V)
        -> Cookie
    {
        Cookie {
            name: name.into(),
            value: value.into(),
            path: None,
            domain: None,
            expires: None,
            max_age: None,
            secure: false,
            http_only: false,
            same_site: None,
        }
    }

    pub fn path<S: Into<String>>(mut self, path: S) -> Cookie {
        self.path = Some(path.into());
        self
    }

    pub fn domain<S: Into<String>>(mut self, domain: S) -> Cookie {
        self.domain = Some(domain.into());
        self
    }

    pub fn expires<S: Into<String>>(mut self, expires: S) -> Cookie {
        self.expires = Some(expires.into());
        self
    }

    pub fn max_age(mut self, seconds: i64) -> Cookie {
        self.max_age = Some(seconds);
        self
    }

    pub fn secure(mut self) -> Cookie {
        self.secure = true;
        self
    }

    pub fn http_only(mut self) -> Cookie {
        self.http_only = true;
        self
    }

    pub fn same_site(mut self, policy: SameSite) -> Cookie {
        self.same_site = Some(policy);
        self
    }

    /// Serialized `Set-Cookie` value.
    pub fn serialize(&self) -> String {
        let mut out = format!("{}={}", self.name, self.value);
        if let Some(ref path) = self.path {
            write!(out, "; Path={}", path).unwrap();
        }
        if let Some(ref domain) = self.domain {
            write!(out, "; Domain={}", domain).unwrap();
        }
        if let Some(ref expires) = self.expires {
            write!(out, "; Expires={}", expires).unwrap();
        }
        if let Some(max_age) = self.max_age {
            write!(out, "; Max-Age={}", max_age).unwrap();
        }
        if self.secure {
            out.push_str("; Secure");
        }
        if self.http_only {
            out.push_str("; HttpOnly");
        }
        if let Some(policy) = self.same_site {
            write!(out, "; SameSite={}", policy.as_str()).unwrap();
        }
        out
    }
}

/// Outgoing cookies of one response, serialized into `Set-Cookie`
/// headers when the response starts.
#[derive(Debug, Default)]
pub struct CookieJar {
    cookies: Vec<Cookie>,
}

impl CookieJar {
    pub fn new() -> CookieJar {
        CookieJar { cookies: Vec::new() }
    }

    /// Add or replace (by name) an outgoing cookie.
    pub fn set(&mut self, cookie: Cookie) {
        self.cookies.retain(|c| c.name != cookie.name);
        self.cookies.push(cookie);
    }

    /// Instruct the client to drop a cookie.
    pub fn clear(&mut self, name: &str) {
        self.set(Cookie::new(name, "").max_age(0));
    }

    pub fn is_empty(&self) -> bool {
        self.cookies.is_empty()
    }

    pub(crate) fn write_headers(&self, headers: &mut HeaderMap) {
        for cookie in &self.cookies {
            headers.add("Set-Cookie", cookie.serialize());
        }
    }
}

/// Parse a request `Cookie` header into `(name, value)` pairs.
pub fn parse_cookie_header(value: &str) -> Vec<(String, String)> {
    let mut out = Vec::new();
    for pair in value.split(';') {
        let pair = pair.trim();
        if pair.is_empty() {
            continue;
        }
        match pair.find('=') {
            Some(eq) => out.push((
                pair[..eq].trim().to_string(),
                pair[eq + 1..].trim().to_string(),
            )),
            None => out.push((pair.to_string(), String::new())),
        }
    }
    out
}

#[cfg(test)]
mod test {
    use super::{parse_cookie_header, Cookie, CookieJar, SameSite};
    use crate::headers::HeaderMap;

    #[test]
    fn parse_pairs() {
        let pairs = parse_cookie_header("sid=abc123; theme=dark; flag");
        assert_eq!(pairs[0], ("sid".to_string(), "abc123".to_string()));
        assert_eq!(pairs[1], ("theme".to_string(), "dark".to_string()));
        assert_eq!(pairs[2], ("flag".to_string(), String::new()));
    }

    #[test]
    fn serialize_attributes() {
        let c = Cookie::new("sid", "abc")
            .path("/")
            .domain("example.com")
            .max_age(3600)
            .secure()
            .http_only()
            .same_site(SameSite::Lax);
        assert_eq!(
            c.serialize(),
            "sid=abc; Path=/; Domain=example.com; Max-Age=3600; \
             Secure; HttpOnly; SameSite=Lax"
        );
    }

    #[test]
    fn jar_replaces_by_name_and_writes_headers() {
        let mut jar = CookieJar::new();
        jar.set(Cookie::new("a", "1"));
        jar.set(Cookie::new("a", "2"));
        jar.set(Cookie::new("b", "3"));
        let mut headers = HeaderMap::new();
        jar.write_headers(&mut headers);
        assert_eq!(headers.list("Set-Cookie"), ["a=2", "b=3"]);
    }
}
