//! Filter policies: user-supplied asynchronous access hooks that may
//! suspend dispatch until they call back.

use std::cell::RefCell;
use std::rc::Rc;

use crate::error::HandlerError;
use crate::request::Request;
use crate::response::Response;

/// What a filter rule applies to. Only access filtering exists today.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum FilterType {
    Access,
}

/// Everything a rule may inspect. Either handle may be absent when the
/// rule fires before the exchange is fully bound.
#[derive(Clone, Default)]
pub struct FilterRuleCtx {
    pub req: Option<Request>,
    pub res: Option<Response>,
}

impl FilterRuleCtx {
    pub fn new(req: Option<Request>, res: Option<Response>) -> FilterRuleCtx {
        FilterRuleCtx { req, res }
    }
}

/// Continuation handed to a rule. Consumed on invocation, so a rule
/// cannot call back twice; dropping it without calling stalls the
/// dispatch, which is a rule bug.
pub struct PolicyCb {
    cb: Box<dyn FnOnce(Option<HandlerError>)>,
}

impl PolicyCb {
    pub(crate) fn new<F>(f: F) -> PolicyCb
        where F: FnOnce(Option<HandlerError>) + 'static
    {
        PolicyCb { cb: Box::new(f) }
    }

    /// Let the request through.
    pub fn pass(self) {
        (self.cb)(None)
    }

    /// Reject the request. Denials without a status hint surface as
    /// 403.
    pub fn deny<E: Into<HandlerError>>(self, err: E) {
        (self.cb)(Some(err.into()))
    }

    pub fn call(self, err: Option<HandlerError>) {
        (self.cb)(err)
    }
}

type RuleFn = Rc<dyn Fn(FilterRuleCtx, PolicyCb)>;

/// One typed rule inside a policy.
#[derive(Clone)]
pub struct FilterRule {
    kind: FilterType,
    func: RuleFn,
}

impl FilterRule {
    pub fn access<F>(f: F) -> FilterRule
        where F: Fn(FilterRuleCtx, PolicyCb) + 'static
    {
        FilterRule { kind: FilterType::Access, func: Rc::new(f) }
    }

    pub fn kind(&self) -> FilterType {
        self.kind
    }
}

/// A composite of rules attached to a router or a route. Cloning
/// shares the rule list.
#[derive(Clone, Default)]
pub struct FilterPolicy {
    rules: Rc<RefCell<Vec<FilterRule>>>,
}

impl FilterPolicy {
    pub fn new() -> FilterPolicy {
        FilterPolicy { rules: Rc::new(RefCell::new(Vec::new())) }
    }

    /// Convenience constructor for a single-rule access policy.
    pub fn access<F>(f: F) -> FilterPolicy
        where F: Fn(FilterRuleCtx, PolicyCb) + 'static
    {
        let policy = FilterPolicy::new();
        policy.add_rule(FilterRule::access(f));
        policy
    }

    pub fn add_rule(&self, rule: FilterRule) -> &FilterPolicy {
        self.rules.borrow_mut().push(rule);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.rules.borrow().is_empty()
    }

    /// Run every rule of `kind` in registration order. The chain is
    /// asynchronous: a rule may hold its `PolicyCb` and fire it from a
    /// reactor callback. The first error aborts the rest.
    pub fn validate(&self, kind: FilterType, ctx: FilterRuleCtx,
                    cb: PolicyCb)
    {
        validate_from(self.clone(), kind, ctx, 0, cb)
    }
}

fn validate_from(policy: FilterPolicy, kind: FilterType, ctx: FilterRuleCtx,
                 idx: usize, cb: PolicyCb)
{
    let next = {
        let rules = policy.rules.borrow();
        rules
            .iter()
            .enumerate()
            .skip(idx)
            .find(|(_, r)| r.kind == kind)
            .map(|(i, r)| (i, r.func.clone()))
    };
    match next {
        None => cb.pass(),
        Some((i, func)) => {
            let chain_ctx = ctx.clone();
            func(
                ctx,
                PolicyCb::new(move |err| match err {
                    Some(e) => cb.call(Some(e)),
                    None => {
                        validate_from(policy, kind, chain_ctx, i + 1, cb)
                    }
                }),
            )
        }
    }
}
