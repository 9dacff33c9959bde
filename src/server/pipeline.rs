//! The dispatch pipeline: validate access, pre-handlers, route
//! handlers, post-handlers, end.
//!
//! Every stage is asynchronous and short-circuiting. Stages advance
//! through `Next` continuations that are consumed on invocation, so a
//! handler cannot fire its continuation twice; the compiler enforces
//! the exactly-once contract the pipeline depends on.

use std::path::PathBuf;
use std::rc::Rc;

use log::trace;

use crate::error::HandlerError;
use crate::request::Request;
use crate::response::Response;
use crate::router::{FilterPolicy, FilterRuleCtx, FilterType, PolicyCb,
                    RouteTarget, Router};

/// Continuation handed to every handler. `ok()` advances the pipeline,
/// `fail()` aborts the current stage and routes the error through the
/// post-handlers. May be stored and fired later from a reactor
/// callback to suspend the pipeline.
pub struct Next {
    cb: Box<dyn FnOnce(Option<HandlerError>)>,
}

impl Next {
    pub(crate) fn new<F>(f: F) -> Next
        where F: FnOnce(Option<HandlerError>) + 'static
    {
        Next { cb: Box::new(f) }
    }

    pub fn ok(self) {
        (self.cb)(None)
    }

    pub fn fail<E: Into<HandlerError>>(self, err: E) {
        (self.cb)(Some(err.into()))
    }

    pub fn call(self, err: Option<HandlerError>) {
        (self.cb)(err)
    }
}

/// A route, pre or post handler.
pub type Handler = Rc<dyn Fn(Request, Response, Next)>;

pub(crate) struct Dispatch {
    req: Request,
    res: Response,
    target: Option<RouteTarget>,
    /// Router chain from the root down to the matched leaf.
    routers: Vec<Rc<Router>>,
}

impl Dispatch {
    /// Run the full pipeline for a resolved (or missed) route.
    pub(crate) fn run(root: &Rc<Router>, req: Request, res: Response,
                      target: Option<RouteTarget>)
    {
        let routers = match target {
            Some(RouteTarget::Handlers(ref rt)) => rt
                .router()
                .map(|r| r.chain_from_root())
                .unwrap_or_else(|| vec![root.clone()]),
            Some(RouteTarget::File { ref router, .. }) => {
                router.chain_from_root()
            }
            None => vec![root.clone()],
        };
        let d = Rc::new(Dispatch { req, res, target, routers });
        trace!("[{}] dispatching {} {}", d.res.id(), d.req.method(),
               d.req.path());
        if d.target.is_none() {
            // route miss: 404 through the post-handler pipeline so
            // centralized error pages can format it
            d.res.set_error(
                HandlerError::new("not found").with_status(404),
            );
            return Self::post_stage(d, 0, 0);
        }
        Self::validate_stage(d)
    }

    /// Stage 1: policies, outermost router first, then the route's
    /// own.
    fn validate_stage(d: Rc<Dispatch>) {
        let mut policies: Vec<FilterPolicy> = Vec::new();
        for router in &d.routers {
            policies.extend(router.policies());
        }
        if let Some(RouteTarget::Handlers(ref rt)) = d.target {
            policies.extend(rt.policies());
        }
        Self::run_policies(d, Rc::new(policies), 0)
    }

    fn run_policies(d: Rc<Dispatch>, policies: Rc<Vec<FilterPolicy>>,
                    idx: usize)
    {
        let policy = match policies.get(idx) {
            None => return Self::pre_stage(d, 0, 0),
            Some(p) => p.clone(),
        };
        let ctx = FilterRuleCtx::new(Some(d.req.clone()),
                                     Some(d.res.clone()));
        let chain = policies.clone();
        let d2 = d.clone();
        policy.validate(
            FilterType::Access,
            ctx,
            PolicyCb::new(move |err| match err {
                Some(e) => {
                    let status = e.status().unwrap_or(403);
                    d2.res.set_error_with_status(e, status);
                    Self::post_stage(d2, 0, 0)
                }
                None => Self::run_policies(d2, chain, idx + 1),
            }),
        )
    }

    /// Stage 2: pre-handlers, root to leaf. A handler that starts the
    /// response short-circuits the rest of the stage.
    fn pre_stage(d: Rc<Dispatch>, mut ri: usize, mut hi: usize) {
        if d.res.started() {
            return Self::handler_stage(d);
        }
        let handler = loop {
            match d.routers.get(ri) {
                None => return Self::handler_stage(d),
                Some(router) => {
                    let pres = router.pre_handlers();
                    match pres.get(hi) {
                        Some(h) => break h.clone(),
                        None => {
                            ri += 1;
                            hi = 0;
                        }
                    }
                }
            }
        };
        let d2 = d.clone();
        let next = Next::new(move |err| match err {
            Some(e) => {
                d2.res.set_error(e);
                Self::post_stage(d2, 0, 0)
            }
            None => Self::pre_stage(d2, ri, hi + 1),
        });
        handler(d.req.clone(), d.res.clone(), next)
    }

    /// Stage 3: the matched route's handler chain, or the file
    /// transfer for a file route.
    fn handler_stage(d: Rc<Dispatch>) {
        enum Target {
            Chain(Vec<Handler>),
            File(PathBuf, bool),
        }
        let target = match d.target {
            Some(RouteTarget::Handlers(ref rt)) => {
                Target::Chain(rt.handlers())
            }
            Some(RouteTarget::File { ref path, found, .. }) => {
                Target::File(path.clone(), found)
            }
            None => unreachable!("dispatch without target ran handlers"),
        };
        match target {
            Target::Chain(handlers) => {
                if handlers.is_empty() {
                    d.res.set_error(HandlerError::new(
                        "executing a route without any handler",
                    ));
                    return Self::post_stage(d, 0, 0);
                }
                Self::run_handlers(d, Rc::new(handlers), 0)
            }
            Target::File(path, found) => {
                if d.res.started() {
                    return Self::post_stage(d, 0, 0);
                }
                if !found {
                    d.res.set_error(
                        HandlerError::new("not found").with_status(404),
                    );
                    return Self::post_stage(d, 0, 0);
                }
                let d2 = d.clone();
                d.res.send_file_opts(
                    &path,
                    None,
                    Some(Box::new(move |err| {
                        if let Some(e) = err {
                            d2.res.set_error(e);
                        }
                        Self::post_stage(d2, 0, 0)
                    })),
                )
            }
        }
    }

    fn run_handlers(d: Rc<Dispatch>, handlers: Rc<Vec<Handler>>,
                    idx: usize)
    {
        if d.res.ended() {
            return Self::post_stage(d, 0, 0);
        }
        let handler = match handlers.get(idx) {
            None => return Self::post_stage(d, 0, 0),
            Some(h) => h.clone(),
        };
        let chain = handlers.clone();
        let d2 = d.clone();
        let next = Next::new(move |err| match err {
            Some(e) => {
                d2.res.set_error(e);
                Self::post_stage(d2, 0, 0)
            }
            None => Self::run_handlers(d2, chain, idx + 1),
        });
        handler(d.req.clone(), d.res.clone(), next)
    }

    /// Stage 4: post-handlers, root to leaf. These run on the error
    /// path too, so error rendering stays centralized.
    fn post_stage(d: Rc<Dispatch>, mut ri: usize, mut hi: usize) {
        let handler = loop {
            match d.routers.get(ri) {
                None => return Self::finalize(d),
                Some(router) => {
                    let posts = router.post_handlers();
                    match posts.get(hi) {
                        Some(h) => break h.clone(),
                        None => {
                            ri += 1;
                            hi = 0;
                        }
                    }
                }
            }
        };
        let d2 = d.clone();
        let next = Next::new(move |err| {
            if let Some(e) = err {
                d2.res.set_error(e);
                return Self::finalize(d2);
            }
            if d2.res.ended() {
                return Self::finalize(d2);
            }
            Self::post_stage(d2, ri, hi + 1)
        });
        handler(d.req.clone(), d.res.clone(), next)
    }

    /// Stage 5: if nothing ended the response, the default error page
    /// (when an error is pending) or a bare end does. An in-flight
    /// file transfer finishes on its own schedule; the connection
    /// transitions when its last chunk goes out.
    fn finalize(d: Rc<Dispatch>) {
        if !d.res.ended() && !d.res.is_streaming() {
            if d.res.has_error() {
                d.res.render_error_page();
            } else {
                d.res.end();
            }
        }
        trace!("[{}] dispatch complete", d.res.id());
        d.res.after_dispatch();
    }
}
