//! An evented MVC web server core.
//!
//! The crate is built around a single-threaded reactor: every
//! connection is a protocol state machine driven by poll callbacks, a
//! hierarchical router resolves URLs through compiled regex patterns
//! and pluggable filter policies, and responses stream through the
//! connection's output buffer with pause/resume backpressure.
//!
//! ```no_run
//! use emvc::App;
//!
//! let app = App::new();
//! app.get("/echo/:val", |req, res, next| {
//!     res.status(200).send(req.param_or("val", ""));
//!     next.ok();
//! });
//! app.listen("127.0.0.1:8080").unwrap();
//! ```

mod app;
pub mod buffer;
mod config;
mod cookies;
mod error;
mod headers;
mod method;
mod params;
mod request;
mod response;
pub mod router;
pub mod server;
mod status;
mod version;

pub use crate::app::App;
pub use crate::config::ServerConfig;
pub use crate::cookies::{parse_cookie_header, Cookie, CookieJar, SameSite};
pub use crate::error::{HandlerError, HttpError, ParseError};
pub use crate::headers::{AcceptEncoding, AcceptLanguage, EncodingKind,
                         Header, HeaderMap};
pub use crate::method::Method;
pub use crate::params::Params;
pub use crate::request::Request;
pub use crate::response::{DataValue, Response};
pub use crate::router::{FilterPolicy, FilterRule, FilterRuleCtx,
                        FilterType, PolicyCb, Route, RouteMatch, Router,
                        UseWhen};
pub use crate::server::{Handler, LoopHandle, Next, Worker};
pub use crate::status::{is_redirect_status, reason_phrase};
pub use crate::version::Version;
