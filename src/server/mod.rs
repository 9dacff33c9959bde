//! HTTP server implementation
//!
//! Currently there is only an HTTP/1.x implementation; the connection
//! state machine, the parser driver and the dispatch pipeline all live
//! here.

pub(crate) mod connection;
pub(crate) mod parser;
pub(crate) mod pipeline;
pub(crate) mod reactor;

pub use self::connection::{ConnFlag, ConnFlags, Connection, Stream};
pub use self::parser::MAX_HEADERS_NUM;
pub use self::pipeline::{Handler, Next};
pub use self::reactor::{LoopHandle, TimerToken, Worker};
