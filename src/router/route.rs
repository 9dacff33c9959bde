//! A single route: a compiled path pattern bound to handler and policy
//! chains.
//!
//! Pattern grammar, per `/`-separated segment:
//!
//! - literal — matches itself case-insensitively
//! - `*` — matches exactly one segment
//! - `**` — matches the remainder
//! - `:name` — required parameter capturing one segment
//! - `:[name]` — optional parameter; the whole `/segment` may be absent
//! - `:name(re)` / `:[name(re)]` — parameter with an explicit regex
//!   body (the default body is `[^/\n]+`)
//!
//! Optional segments can only form a contiguous tail: each one wraps
//! the rest of the pattern recursively, so `/a/:[b]/:[c]` accepts
//! `/a`, `/a/x` and `/a/x/y`.

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use regex::{Regex, RegexBuilder};

use crate::params::{uri_decode, Params};
use crate::router::policy::FilterPolicy;
use crate::router::Router;
use crate::server::pipeline::Handler;

const DEFAULT_PARAM_BODY: &str = "[^/\n]+";

struct RouteSeg {
    pattern: String,
    param: Option<String>,
    optional: bool,
}

pub struct Route {
    router: RefCell<Weak<Router>>,
    path: String,
    re: Option<Regex>,
    re_pattern: String,
    param_names: Vec<String>,
    handlers: RefCell<Vec<Handler>>,
    policies: RefCell<Vec<FilterPolicy>>,
}

impl Route {
    /// Compile a pattern into a route.
    ///
    /// # Panics
    ///
    /// Panics when the generated regex does not compile (bad explicit
    /// parameter body, or a parameter name that is not a valid capture
    /// group name). Routes are registered at startup, so this is a
    /// programming error rather than a runtime condition.
    pub(crate) fn new(router: &Rc<Router>, path: &str) -> Rc<Route> {
        let (re, re_pattern, param_names) = compile_pattern(path);
        Rc::new(Route {
            router: RefCell::new(Rc::downgrade(router)),
            path: path.to_string(),
            re,
            re_pattern,
            param_names,
            handlers: RefCell::new(Vec::new()),
            policies: RefCell::new(Vec::new()),
        })
    }

    /// A route with no pattern; it matches anything. Used for file
    /// results and for the miss path.
    pub(crate) fn null(router: &Rc<Router>) -> Rc<Route> {
        Rc::new(Route {
            router: RefCell::new(Rc::downgrade(router)),
            path: String::new(),
            re: None,
            re_pattern: String::new(),
            param_names: Vec::new(),
            handlers: RefCell::new(Vec::new()),
            policies: RefCell::new(Vec::new()),
        })
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn pattern(&self) -> &str {
        &self.re_pattern
    }

    pub fn param_names(&self) -> &[String] {
        &self.param_names
    }

    pub fn router(&self) -> Option<Rc<Router>> {
        self.router.borrow().upgrade()
    }

    pub(crate) fn reparent(&self, router: &Rc<Router>) {
        *self.router.borrow_mut() = Rc::downgrade(router);
    }

    pub fn has_handlers(&self) -> bool {
        !self.handlers.borrow().is_empty()
    }

    pub fn has_policies(&self) -> bool {
        !self.policies.borrow().is_empty()
    }

    pub fn register_handler(&self, handler: Handler) -> &Route {
        self.handlers.borrow_mut().push(handler);
        self
    }

    pub fn register_policy(&self, policy: FilterPolicy) -> &Route {
        self.policies.borrow_mut().push(policy);
        self
    }

    pub(crate) fn handlers(&self) -> Vec<Handler> {
        self.handlers.borrow().clone()
    }

    pub(crate) fn policies(&self) -> Vec<FilterPolicy> {
        self.policies.borrow().clone()
    }

    /// Match a local url (starting with `/`) against the pattern,
    /// extracting URI-decoded parameters.
    pub fn matches(&self, local_url: &str) -> Option<Params> {
        let re = match self.re {
            Some(ref re) => re,
            None => return Some(Params::new()),
        };
        let caps = re.captures(local_url)?;
        let mut params = Params::new();
        for name in &self.param_names {
            if let Some(m) = caps.name(name) {
                if !m.as_str().is_empty() {
                    params.insert(name.clone(), uri_decode(m.as_str()));
                }
            }
        }
        Some(params)
    }
}

/// Split a route path into segments, collapsing empty ones.
fn split_segments(path: &str) -> Vec<RouteSeg> {
    path.split('/')
        .filter(|s| !s.is_empty())
        .map(|seg| {
            if let Some(body) = seg.strip_prefix(':') {
                let (body, optional) = match body
                    .strip_prefix('[')
                    .and_then(|b| b.strip_suffix(']'))
                {
                    Some(inner) => (inner, true),
                    None => (body, false),
                };
                let (name, re) = match body.find('(') {
                    Some(open) => {
                        let close = body.rfind(')').unwrap_or(body.len());
                        (&body[..open], &body[open + 1..close])
                    }
                    None => (body, DEFAULT_PARAM_BODY),
                };
                RouteSeg {
                    pattern: format!("(?P<{}>{})", name, re),
                    param: Some(name.to_string()),
                    optional,
                }
            } else {
                RouteSeg {
                    pattern: match seg {
                        "*" => DEFAULT_PARAM_BODY.to_string(),
                        "**" => ".+".to_string(),
                        _ => regex::escape(seg),
                    },
                    param: None,
                    optional: false,
                }
            }
        })
        .collect()
}

/// Build the anchored regex source. Optional segments wrap the rest of
/// the pattern so they can only be omitted from the tail inward.
fn build_re(segs: &[RouteSeg], idx: usize) -> String {
    if idx == segs.len() {
        return String::new();
    }
    let seg = &segs[idx];
    let rest = build_re(segs, idx + 1);
    if seg.optional {
        format!("($|/$|/{}{})", seg.pattern, rest)
    } else {
        format!("/{}{}", seg.pattern, rest)
    }
}

fn compile_pattern(path: &str)
    -> (Option<Regex>, String, Vec<String>)
{
    if path.is_empty() {
        return (None, String::new(), Vec::new());
    }
    let segs = split_segments(path);
    let param_names = segs
        .iter()
        .filter_map(|s| s.param.clone())
        .collect::<Vec<_>>();
    let source = format!("^{}($|/$)", build_re(&segs, 0));
    let re = RegexBuilder::new(&source)
        .case_insensitive(true)
        .build()
        .unwrap_or_else(|e| {
            panic!("route pattern {:?} compiled to invalid regex {:?}: {}",
                   path, source, e)
        });
    (Some(re), source, param_names)
}

#[cfg(test)]
mod test {
    use super::compile_pattern;
    use crate::params::Params;

    fn matches(pattern: &str, url: &str) -> Option<Params> {
        let (re, _, names) = compile_pattern(pattern);
        let re = re.unwrap();
        let caps = re.captures(url)?;
        let mut params = Params::new();
        for name in &names {
            if let Some(m) = caps.name(name) {
                if !m.as_str().is_empty() {
                    params.insert(name.clone(),
                                  crate::params::uri_decode(m.as_str()));
                }
            }
        }
        Some(params)
    }

    #[test]
    fn literal_segments() {
        assert!(matches("/users/list", "/users/list").is_some());
        assert!(matches("/users/list", "/USERS/LIST").is_some());
        assert!(matches("/users/list", "/users/list/").is_some());
        assert!(matches("/users/list", "/users").is_none());
        assert!(matches("/users/list", "/users/list/all").is_none());
    }

    #[test]
    fn literal_segments_match_themselves_only() {
        assert!(matches("/file.txt", "/file.txt").is_some());
        assert!(matches("/file.txt", "/fileXtxt").is_none());
    }

    #[test]
    fn required_param() {
        let params = matches("/echo/:val", "/echo/hello").unwrap();
        assert_eq!(params.get("val"), Some("hello"));
        assert!(matches("/echo/:val", "/echo").is_none());
        assert!(matches("/echo/:val", "/echo/a/b").is_none());
    }

    #[test]
    fn params_are_uri_decoded() {
        let params = matches("/echo/:val", "/echo/a%20b").unwrap();
        assert_eq!(params.get("val"), Some("a b"));
    }

    #[test]
    fn optional_param_tail() {
        let pat = "/download-file/:[filename]";
        let params = matches(pat, "/download-file/report.pdf").unwrap();
        assert_eq!(params.get("filename"), Some("report.pdf"));
        let params = matches(pat, "/download-file").unwrap();
        assert_eq!(params.get("filename"), None);
        let params = matches(pat, "/download-file/").unwrap();
        assert_eq!(params.get("filename"), None);
    }

    #[test]
    fn optional_params_nest() {
        let pat = "/a/:[b]/:[c]";
        assert!(matches(pat, "/a").is_some());
        let params = matches(pat, "/a/x").unwrap();
        assert_eq!(params.get("b"), Some("x"));
        assert_eq!(params.get("c"), None);
        let params = matches(pat, "/a/x/y").unwrap();
        assert_eq!(params.get("b"), Some("x"));
        assert_eq!(params.get("c"), Some("y"));
    }

    #[test]
    fn explicit_param_regex() {
        let pat = "/order/:id([0-9]+)";
        let params = matches(pat, "/order/42").unwrap();
        assert_eq!(params.get("id"), Some("42"));
        assert!(matches(pat, "/order/abc").is_none());
    }

    #[test]
    fn star_segments() {
        assert!(matches("/files/*", "/files/a").is_some());
        assert!(matches("/files/*", "/files/a/b").is_none());
        assert!(matches("/files/**", "/files/a/b/c").is_some());
    }

    #[test]
    fn round_trip_params() {
        // re-feeding extracted values into the pattern shape yields the
        // same parameter map
        let params = matches("/u/:name/:age", "/u/ana/30").unwrap();
        let rebuilt = format!("/u/{}/{}", params.get("name").unwrap(),
                              params.get("age").unwrap());
        let again = matches("/u/:name/:age", &rebuilt).unwrap();
        assert_eq!(again.get("name"), params.get("name"));
        assert_eq!(again.get("age"), params.get("age"));
    }
}
