//! Hierarchical router: each node groups routes and child routers under
//! a path prefix, and carries pre/post handler chains and filter
//! policies that apply to everything dispatched below it.

mod files;
mod policy;
mod route;

pub use self::policy::{FilterPolicy, FilterRule, FilterRuleCtx, FilterType,
                       PolicyCb};
pub use self::route::Route;

use std::cell::RefCell;
use std::collections::HashMap;
use std::path::PathBuf;
use std::rc::{Rc, Weak};

use log::info;

use crate::method::Method;
use crate::params::Params;
use crate::server::pipeline::{Handler, Next};
use crate::request::Request;
use crate::response::Response;

/// When a `use_when` handler runs relative to the route handlers.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum UseWhen {
    Before,
    After,
    BeforeAndAfter,
}

pub(crate) enum RouterKind {
    Dispatch,
    Files { base: PathBuf },
}

/// What URL resolution produced.
pub(crate) enum RouteTarget {
    /// A route with handler chains.
    Handlers(Rc<Route>),
    /// A file under a file router's base directory.
    File { router: Rc<Router>, path: PathBuf, found: bool },
}

/// A matched route plus the parameters extracted from the URL.
pub struct RouteMatch {
    pub(crate) target: RouteTarget,
    pub(crate) params: Params,
}

impl RouteMatch {
    pub fn route(&self) -> Option<&Rc<Route>> {
        match self.target {
            RouteTarget::Handlers(ref rt) => Some(rt),
            RouteTarget::File { .. } => None,
        }
    }

    pub fn params(&self) -> &Params {
        &self.params
    }
}

pub struct Router {
    path: String,
    pub(crate) kind: RouterKind,
    self_weak: Weak<Router>,
    parent: RefCell<Weak<Router>>,
    /// Children sorted by path length descending; stable w.r.t.
    /// registration order among equal lengths.
    children: RefCell<Vec<Rc<Router>>>,
    verbs: RefCell<HashMap<Method, Vec<Rc<Route>>>>,
    pre_handlers: RefCell<Vec<Handler>>,
    post_handlers: RefCell<Vec<Handler>>,
    policies: RefCell<Vec<FilterPolicy>>,
    router_index: RefCell<Option<String>>,
}

impl Router {
    /// A router mounted at `path`. The root router uses `"/"`.
    pub fn new(path: &str) -> Rc<Router> {
        Router::with_kind(path, RouterKind::Dispatch)
    }

    pub(crate) fn with_kind(path: &str, kind: RouterKind) -> Rc<Router> {
        Rc::new_cyclic(|weak| Router {
            path: norm_path(path),
            kind,
            self_weak: weak.clone(),
            parent: RefCell::new(Weak::new()),
            children: RefCell::new(Vec::new()),
            verbs: RefCell::new(HashMap::new()),
            pre_handlers: RefCell::new(Vec::new()),
            post_handlers: RefCell::new(Vec::new()),
            policies: RefCell::new(Vec::new()),
            router_index: RefCell::new(None),
        })
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn parent(&self) -> Option<Rc<Router>> {
        self.parent.borrow().upgrade()
    }

    pub fn full_path(&self) -> String {
        match self.parent() {
            // parent paths end with "/", ours starts with one
            Some(p) => {
                let mut fp = p.full_path();
                fp.pop();
                fp + &self.path
            }
            None => self.path.clone(),
        }
    }

    /// Value substituted for a bare `/` request below this router.
    pub fn router_index(&self, index: &str) -> &Router {
        let mut idx = index.to_string();
        if !idx.starts_with('/') {
            idx.insert(0, '/');
        }
        *self.router_index.borrow_mut() = Some(idx);
        self
    }

    // == registration DSL ==

    pub fn all<F>(&self, path: &str, f: F) -> &Router
        where F: Fn(Request, Response, Next) + 'static
    {
        self.register_route_handler(Method::All, path, Rc::new(f), None)
    }

    pub fn get<F>(&self, path: &str, f: F) -> &Router
        where F: Fn(Request, Response, Next) + 'static
    {
        self.register_route_handler(Method::Get, path, Rc::new(f), None)
    }

    pub fn head<F>(&self, path: &str, f: F) -> &Router
        where F: Fn(Request, Response, Next) + 'static
    {
        self.register_route_handler(Method::Head, path, Rc::new(f), None)
    }

    pub fn post<F>(&self, path: &str, f: F) -> &Router
        where F: Fn(Request, Response, Next) + 'static
    {
        self.register_route_handler(Method::Post, path, Rc::new(f), None)
    }

    pub fn put<F>(&self, path: &str, f: F) -> &Router
        where F: Fn(Request, Response, Next) + 'static
    {
        self.register_route_handler(Method::Put, path, Rc::new(f), None)
    }

    pub fn del<F>(&self, path: &str, f: F) -> &Router
        where F: Fn(Request, Response, Next) + 'static
    {
        self.register_route_handler(Method::Delete, path, Rc::new(f), None)
    }

    pub fn options<F>(&self, path: &str, f: F) -> &Router
        where F: Fn(Request, Response, Next) + 'static
    {
        self.register_route_handler(Method::Options, path, Rc::new(f), None)
    }

    pub fn trace<F>(&self, path: &str, f: F) -> &Router
        where F: Fn(Request, Response, Next) + 'static
    {
        self.register_route_handler(Method::Trace, path, Rc::new(f), None)
    }

    pub fn connect<F>(&self, path: &str, f: F) -> &Router
        where F: Fn(Request, Response, Next) + 'static
    {
        self.register_route_handler(Method::Connect, path, Rc::new(f), None)
    }

    pub fn patch<F>(&self, path: &str, f: F) -> &Router
        where F: Fn(Request, Response, Next) + 'static
    {
        self.register_route_handler(Method::Patch, path, Rc::new(f), None)
    }

    /// Full registration form: method, path, handler and an optional
    /// route policy.
    ///
    /// # Panics
    ///
    /// Panics when `path` compiles to an invalid pattern, or when this
    /// is a file router.
    pub fn register_route_handler(&self, method: Method, path: &str,
                                  handler: Handler,
                                  policy: Option<FilterPolicy>)
        -> &Router
    {
        if matches!(self.kind, RouterKind::Files { .. }) {
            panic!("can't add route handlers on a file router");
        }
        info!("registering route [{}] '{}' on '{}'",
              method, path, self.path);
        let route = self.register_route(method, path);
        if let Some(policy) = policy {
            route.register_policy(policy);
        }
        route.register_handler(handler);
        self
    }

    /// Attach a pre and/or post handler at this router's level.
    pub fn use_when<F>(&self, when: UseWhen, f: F) -> &Router
        where F: Fn(Request, Response, Next) + 'static
    {
        let handler: Handler = Rc::new(f);
        if matches!(when, UseWhen::Before | UseWhen::BeforeAndAfter) {
            self.pre_handlers.borrow_mut().push(handler.clone());
        }
        if matches!(when, UseWhen::After | UseWhen::BeforeAndAfter) {
            self.post_handlers.borrow_mut().push(handler);
        }
        self
    }

    /// Attach a policy at this router's level.
    pub fn register_policy(&self, policy: FilterPolicy) -> &Router {
        info!("registering policy on router '{}'", self.path);
        self.policies.borrow_mut().push(policy);
        self
    }

    /// Attach a policy at route granularity, registering the route if
    /// it does not exist yet.
    pub fn register_route_policy(&self, method: Method, path: &str,
                                 policy: FilterPolicy)
        -> &Router
    {
        info!("registering policy on route [{}] '{}'", method, path);
        let route = self.register_route(method, path);
        route.register_policy(policy);
        self
    }

    /// Mount `child` under this router. A child moving from another
    /// parent is detached from the old parent first.
    ///
    /// # Panics
    ///
    /// Panics when the child has the root path.
    pub fn register_router(&self, child: Rc<Router>) -> &Router {
        if child.path == "/" {
            panic!("invalid path '/', can't mount a router with root path");
        }
        info!("registering router '{}' under '{}'",
              child.path, self.path);
        if let Some(old) = child.parent() {
            old.children
                .borrow_mut()
                .retain(|c| !Rc::ptr_eq(c, &child));
        }
        *child.parent.borrow_mut() = self.self_weak.clone();
        let mut children = self.children.borrow_mut();
        children.push(child);
        children.sort_by(|a, b| b.path.len().cmp(&a.path.len()));
        self
    }

    /// Exact-path lookup of a registered route.
    pub fn resolve_route(&self, method: Method, path: &str)
        -> Option<Rc<Route>>
    {
        self.verbs
            .borrow()
            .get(&method)
            .and_then(|routes| {
                routes.iter().find(|r| r.path() == path).cloned()
            })
    }

    /// Resolve a request URL to a route, descending into child routers
    /// first (longest path wins, then registration order).
    pub fn resolve_url(&self, method: Method, url: &str)
        -> Option<RouteMatch>
    {
        if let RouterKind::Files { ref base } = self.kind {
            let self_rc = self
                .self_rc()
                .expect("routers are always held by an Rc");
            return Some(files::resolve_file(&self_rc, base, url));
        }

        // mount prefix without the trailing slash; "" for the root
        let mount = &self.path[..self.path.len() - 1];
        if !url.starts_with(mount) {
            return None;
        }
        let local = &url[mount.len()..];

        if local.len() > 1 {
            let matched = self
                .children
                .borrow()
                .iter()
                .find(|c| local.starts_with(c.path.as_str()))
                .cloned();
            if let Some(child) = matched {
                return child.resolve_url(method, local);
            }
        }

        let index = self.router_index.borrow();
        let local: &str = if local.is_empty() || local == "/" {
            match *index {
                Some(ref idx) => idx,
                None => local,
            }
        } else {
            local
        };

        let verbs = self.verbs.borrow();
        if let Some(routes) = verbs.get(&method) {
            for route in routes {
                if !route.has_handlers() {
                    continue;
                }
                if let Some(params) = route.matches(local) {
                    return Some(RouteMatch {
                        target: RouteTarget::Handlers(route.clone()),
                        params,
                    });
                }
            }
        }
        drop(verbs);
        drop(index);

        if method != Method::All {
            return self.resolve_url(Method::All, url);
        }
        None
    }

    fn register_route(&self, method: Method, path: &str) -> Rc<Route> {
        if let Some(existing) = self.resolve_route(method, path) {
            return existing;
        }
        let self_rc = self
            .self_rc()
            .expect("routes can only be registered on an Rc-held router");
        let route = Route::new(&self_rc, path);
        self.verbs
            .borrow_mut()
            .entry(method)
            .or_insert_with(Vec::new)
            .push(route.clone());
        route
    }

    fn self_rc(&self) -> Option<Rc<Router>> {
        self.self_weak.upgrade()
    }

    pub(crate) fn pre_handlers(&self) -> Vec<Handler> {
        self.pre_handlers.borrow().clone()
    }

    pub(crate) fn post_handlers(&self) -> Vec<Handler> {
        self.post_handlers.borrow().clone()
    }

    pub(crate) fn policies(&self) -> Vec<FilterPolicy> {
        self.policies.borrow().clone()
    }

    /// Ancestors from the root down to (and including) this router.
    pub(crate) fn chain_from_root(&self) -> Vec<Rc<Router>> {
        let mut chain =
            vec![self.self_rc().expect("routers are always held by an Rc")];
        let mut cur = self.parent();
        while let Some(p) = cur {
            cur = p.parent();
            chain.push(p);
        }
        chain.reverse();
        chain
    }
}

/// Normalize a router path: collapse `//`, ensure one leading and one
/// trailing slash. The root path stays `"/"`.
fn norm_path(path: &str) -> String {
    if path.is_empty() || path == "/" {
        return "/".to_string();
    }
    let mut p = path.to_string();
    while p.contains("//") {
        p = p.replace("//", "/");
    }
    if !p.starts_with('/') {
        p.insert(0, '/');
    }
    if !p.ends_with('/') {
        p.push('/');
    }
    p
}
