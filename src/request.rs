//! The per-exchange request object. Read-only to handlers; cloning
//! shares the underlying exchange.

use std::rc::Rc;

use url::Url;

use crate::cookies::parse_cookie_header;
use crate::headers::{AcceptEncoding, AcceptLanguage, Header, HeaderMap};
use crate::method::Method;
use crate::params::{parse_query, Params};
use crate::version::Version;

#[derive(Clone)]
pub struct Request {
    inner: Rc<RequestInner>,
}

struct RequestInner {
    id: u64,
    method: Method,
    version: Version,
    url: Url,
    raw_path: String,
    headers: HeaderMap,
    params: Params,
    query: Params,
    cookies: Vec<(String, String)>,
    body: Vec<u8>,
}

impl Request {
    pub(crate) fn new(id: u64, method: Method, version: Version, url: Url,
                      raw_path: String, headers: HeaderMap, params: Params,
                      body: Vec<u8>)
        -> Request
    {
        let query = parse_query(url.query().unwrap_or(""));
        let cookies = headers
            .list("Cookie")
            .iter()
            .flat_map(|v| parse_cookie_header(v))
            .collect();
        Request {
            inner: Rc::new(RequestInner {
                id,
                method,
                version,
                url,
                raw_path,
                headers,
                params,
                query,
                cookies,
                body,
            }),
        }
    }

    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn method(&self) -> Method {
        self.inner.method
    }

    pub fn version(&self) -> Version {
        self.inner.version
    }

    pub fn url(&self) -> &Url {
        &self.inner.url
    }

    /// Path portion of the request target, as received.
    pub fn path(&self) -> &str {
        &self.inner.raw_path
    }

    pub fn raw_query(&self) -> &str {
        self.inner.url.query().unwrap_or("")
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.inner.headers
    }

    /// View over one header value, `None` when absent.
    pub fn header<'a>(&'a self, name: &'a str) -> Option<Header<'a>> {
        self.inner.headers.header(name)
    }

    /// Route parameter captured by the matched pattern, URI-decoded.
    pub fn param(&self, name: &str) -> Option<&str> {
        self.inner.params.get(name)
    }

    pub fn param_or<'a>(&'a self, name: &str, default: &'a str) -> &'a str {
        self.inner.params.get_or(name, default)
    }

    pub fn params(&self) -> &Params {
        &self.inner.params
    }

    /// Query-string parameter, URI-decoded. Repeats keep source order.
    pub fn query(&self, name: &str) -> Option<&str> {
        self.inner.query.get(name)
    }

    pub fn query_or<'a>(&'a self, name: &str, default: &'a str) -> &'a str {
        self.inner.query.get_or(name, default)
    }

    pub fn query_params(&self) -> &Params {
        &self.inner.query
    }

    pub fn cookie(&self, name: &str) -> Option<&str> {
        self.inner
            .cookies
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn cookies(&self) -> &[(String, String)] {
        &self.inner.cookies
    }

    pub fn body(&self) -> &[u8] {
        &self.inner.body
    }

    pub fn body_str(&self) -> std::borrow::Cow<str> {
        String::from_utf8_lossy(&self.inner.body)
    }

    /// Parsed `Accept-Encoding`, weight-sorted; empty when the header
    /// is absent.
    pub fn accept_encodings(&self) -> Vec<AcceptEncoding> {
        self.header("Accept-Encoding")
            .map(|h| h.accept_encodings())
            .unwrap_or_default()
    }

    pub fn accept_languages(&self) -> Vec<AcceptLanguage> {
        self.header("Accept-Language")
            .map(|h| h.accept_languages())
            .unwrap_or_default()
    }
}

impl std::fmt::Debug for Request {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("Request")
            .field("id", &self.inner.id)
            .field("method", &self.inner.method)
            .field("path", &self.inner.raw_path)
            .finish()
    }
}
