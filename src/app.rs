//! The application object: a root router plus the serving glue.

use std::io;
use std::rc::Rc;

use crate::config::ServerConfig;
use crate::method::Method;
use crate::request::Request;
use crate::response::Response;
use crate::router::{FilterPolicy, Router, UseWhen};
use crate::server::pipeline::{Handler, Next};
use crate::server::reactor::{LoopHandle, Worker};

/// The root of a served application. Registration calls delegate to
/// the root router; `listen` runs the reactor on the calling thread.
pub struct App {
    router: Rc<Router>,
    cfg: Rc<ServerConfig>,
    timers: LoopHandle,
}

impl App {
    pub fn new() -> App {
        App::with_config(ServerConfig::default())
    }

    pub fn with_config(cfg: ServerConfig) -> App {
        App {
            router: Router::new("/"),
            cfg: Rc::new(cfg),
            timers: LoopHandle::new(),
        }
    }

    pub fn router(&self) -> &Rc<Router> {
        &self.router
    }

    pub fn config(&self) -> &Rc<ServerConfig> {
        &self.cfg
    }

    /// Timer handle for handlers that need to schedule work back onto
    /// the reactor.
    pub fn loop_handle(&self) -> LoopHandle {
        self.timers.clone()
    }

    pub fn all<F>(&self, path: &str, f: F) -> &App
        where F: Fn(Request, Response, Next) + 'static
    {
        self.router.all(path, f);
        self
    }

    pub fn get<F>(&self, path: &str, f: F) -> &App
        where F: Fn(Request, Response, Next) + 'static
    {
        self.router.get(path, f);
        self
    }

    pub fn head<F>(&self, path: &str, f: F) -> &App
        where F: Fn(Request, Response, Next) + 'static
    {
        self.router.head(path, f);
        self
    }

    pub fn post<F>(&self, path: &str, f: F) -> &App
        where F: Fn(Request, Response, Next) + 'static
    {
        self.router.post(path, f);
        self
    }

    pub fn put<F>(&self, path: &str, f: F) -> &App
        where F: Fn(Request, Response, Next) + 'static
    {
        self.router.put(path, f);
        self
    }

    pub fn del<F>(&self, path: &str, f: F) -> &App
        where F: Fn(Request, Response, Next) + 'static
    {
        self.router.del(path, f);
        self
    }

    pub fn options<F>(&self, path: &str, f: F) -> &App
        where F: Fn(Request, Response, Next) + 'static
    {
        self.router.options(path, f);
        self
    }

    pub fn trace<F>(&self, path: &str, f: F) -> &App
        where F: Fn(Request, Response, Next) + 'static
    {
        self.router.trace(path, f);
        self
    }

    pub fn connect<F>(&self, path: &str, f: F) -> &App
        where F: Fn(Request, Response, Next) + 'static
    {
        self.router.connect(path, f);
        self
    }

    pub fn patch<F>(&self, path: &str, f: F) -> &App
        where F: Fn(Request, Response, Next) + 'static
    {
        self.router.patch(path, f);
        self
    }

    pub fn register_route_handler(&self, method: Method, path: &str,
                                  handler: Handler,
                                  policy: Option<FilterPolicy>)
        -> &App
    {
        self.router
            .register_route_handler(method, path, handler, policy);
        self
    }

    pub fn use_when<F>(&self, when: UseWhen, f: F) -> &App
        where F: Fn(Request, Response, Next) + 'static
    {
        self.router.use_when(when, f);
        self
    }

    pub fn register_router(&self, child: Rc<Router>) -> &App {
        self.router.register_router(child);
        self
    }

    pub fn register_policy(&self, policy: FilterPolicy) -> &App {
        self.router.register_policy(policy);
        self
    }

    pub fn register_route_policy(&self, method: Method, path: &str,
                                 policy: FilterPolicy)
        -> &App
    {
        self.router.register_route_policy(method, path, policy);
        self
    }

    pub fn router_index(&self, index: &str) -> &App {
        self.router.router_index(index);
        self
    }

    /// Bind a worker without running it; embedding code drives `turn`
    /// itself.
    pub fn bind(&self, addr: &str) -> io::Result<Worker> {
        Worker::bind(addr, self.router.clone(), self.cfg.clone(),
                     self.timers.clone())
    }

    /// Serve forever on the calling thread.
    pub fn listen(&self, addr: &str) -> io::Result<()> {
        self.bind(addr)?.run()
    }
}

impl Default for App {
    fn default() -> App {
        App::new()
    }
}
