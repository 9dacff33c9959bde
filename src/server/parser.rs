//! Incremental HTTP/1.x parser driver.
//!
//! Owns the per-message parse state of one connection: head, body
//! progress, completion. The head itself is parsed by httparse once the
//! `\r\n\r\n` delimiter is buffered; body framing (fixed length or
//! chunked) is tracked here. On head completion the route is resolved
//! and the response object is created; the request is materialized at
//! message completion, when dispatch takes the parts out with
//! `take_for_exec`.

use std::cell::RefCell;
use std::cmp::min;
use std::rc::{Rc, Weak};
use std::str::{self, FromStr};

use log::trace;
use url::Url;

use crate::buffer::find_substr;
use crate::config::ServerConfig;
use crate::error::ParseError;
use crate::headers::HeaderMap;
use crate::method::Method;
use crate::response::Response;
use crate::router::{RouteMatch, Router};
use crate::version::Version;

use super::connection::ConnCtl;

/// Note httparse requires we preallocate an array of this size, so be
/// wise.
pub const MAX_HEADERS_NUM: usize = 256;

/// Connection-owned context handed into `parse`.
pub(crate) struct ParseCtx<'a> {
    pub conn: &'a Weak<RefCell<dyn ConnCtl>>,
    pub router: &'a Rc<Router>,
    pub conn_id: u64,
}

/// Everything collected for one message before dispatch runs.
pub(crate) struct Pending {
    pub method: Method,
    pub version: Version,
    pub url: Url,
    pub raw_path: String,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
    pub keep_alive: bool,
}

enum ParseState {
    Head,
    Body(BodyProgress),
    Done,
}

enum BodyProgress {
    /// Fixed-size body (bytes left).
    Fixed(u64),
    /// Expecting a chunk-size line.
    ChunkHead,
    /// Inside a chunk (bytes left).
    ChunkData(u64),
    /// Expecting the CRLF closing a chunk's payload.
    ChunkDataEnd,
    /// Expecting the CRLF closing the terminating zero chunk.
    ChunkEnd,
}

pub(crate) struct ConnParser {
    cfg: Rc<ServerConfig>,
    state: ParseState,
    pending: Option<Pending>,
    route: Option<RouteMatch>,
    res: Option<Response>,
    completed: bool,
    executed: bool,
}

impl ConnParser {
    pub fn new(cfg: Rc<ServerConfig>) -> ConnParser {
        ConnParser {
            cfg,
            state: ParseState::Head,
            pending: None,
            route: None,
            res: None,
            completed: false,
            executed: false,
        }
    }

    pub fn completed(&self) -> bool {
        self.completed
    }

    pub fn executed(&self) -> bool {
        self.executed
    }

    /// The current response, when a head has been parsed this cycle.
    pub fn response(&self) -> Option<&Response> {
        self.res.as_ref()
    }

    pub fn res_paused(&self) -> bool {
        self.res.as_ref().map(|r| r.paused()).unwrap_or(false)
    }

    pub fn res_ended(&self) -> bool {
        self.res.as_ref().map(|r| r.ended()).unwrap_or(false)
    }

    /// Keep-alive decision of the current message, once its head is
    /// parsed.
    pub fn keepalive_hint(&self) -> Option<bool> {
        self.pending.as_ref().map(|p| p.keep_alive)
    }

    /// Prepare for the next pipelined message. Only called after the
    /// current response has ended.
    pub fn reset(&mut self) {
        self.state = ParseState::Head;
        self.pending = None;
        self.route = None;
        self.res = None;
        self.completed = false;
        self.executed = false;
    }

    /// Take the completed message out for dispatch. Returns `None`
    /// unless a message is complete and not yet dispatched. The
    /// response stays behind for connection-level checks.
    pub fn take_for_exec(&mut self)
        -> Option<(Pending, Option<RouteMatch>, Response)>
    {
        if !self.completed || self.executed {
            return None;
        }
        self.executed = true;
        let pending = self.pending.take()?;
        let res = self.res.clone()?;
        Some((pending, self.route.take(), res))
    }

    /// Consume bytes from the connection's input buffer. Returns the
    /// number of bytes consumed; bytes past a completed message are
    /// left for the next cycle. Partial heads and chunk-size lines are
    /// also left unconsumed until complete.
    pub fn parse(&mut self, data: &[u8], ctx: &ParseCtx)
        -> Result<usize, ParseError>
    {
        let mut consumed = 0;
        loop {
            let rest = &data[consumed..];
            match self.state {
                ParseState::Done => break,
                ParseState::Head => {
                    let pos = match find_substr(rest, b"\r\n\r\n") {
                        Some(pos) => pos,
                        None => {
                            if rest.len() > self.cfg.max_headers_size {
                                return Err(ParseError::HeadersTooLarge);
                            }
                            break;
                        }
                    };
                    let head_len = pos + 4;
                    if head_len > self.cfg.max_headers_size {
                        return Err(ParseError::HeadersTooLarge);
                    }
                    let progress =
                        self.parse_head(&rest[..head_len], ctx)?;
                    consumed += head_len;
                    match progress {
                        BodyProgress::Fixed(0) => self.complete(),
                        progress => {
                            self.state = ParseState::Body(progress);
                        }
                    }
                }
                ParseState::Body(BodyProgress::Fixed(left)) => {
                    let take = min(left, rest.len() as u64) as usize;
                    if take == 0 {
                        break;
                    }
                    self.append_body(&rest[..take])?;
                    consumed += take;
                    let left = left - take as u64;
                    if left == 0 {
                        self.complete();
                    } else {
                        self.state =
                            ParseState::Body(BodyProgress::Fixed(left));
                    }
                }
                ParseState::Body(BodyProgress::ChunkHead) => {
                    match httparse::parse_chunk_size(rest)? {
                        httparse::Status::Partial => break,
                        httparse::Status::Complete((off, 0)) => {
                            consumed += off;
                            self.state =
                                ParseState::Body(BodyProgress::ChunkEnd);
                        }
                        httparse::Status::Complete((off, size)) => {
                            consumed += off;
                            self.state = ParseState::Body(
                                BodyProgress::ChunkData(size),
                            );
                        }
                    }
                }
                ParseState::Body(BodyProgress::ChunkData(left)) => {
                    let take = min(left, rest.len() as u64) as usize;
                    if take == 0 {
                        break;
                    }
                    self.append_body(&rest[..take])?;
                    consumed += take;
                    let left = left - take as u64;
                    self.state = ParseState::Body(if left == 0 {
                        BodyProgress::ChunkDataEnd
                    } else {
                        BodyProgress::ChunkData(left)
                    });
                }
                ParseState::Body(BodyProgress::ChunkDataEnd) => {
                    if rest.len() < 2 {
                        break;
                    }
                    if &rest[..2] != b"\r\n" {
                        return Err(ParseError::InvalidChunkSize);
                    }
                    consumed += 2;
                    self.state = ParseState::Body(BodyProgress::ChunkHead);
                }
                ParseState::Body(BodyProgress::ChunkEnd) => {
                    if rest.len() < 2 {
                        break;
                    }
                    if &rest[..2] != b"\r\n" {
                        return Err(ParseError::InvalidChunkSize);
                    }
                    consumed += 2;
                    self.complete();
                }
            }
        }
        Ok(consumed)
    }

    fn complete(&mut self) {
        trace!("message complete ({} body bytes)",
               self.pending.as_ref().map(|p| p.body.len()).unwrap_or(0));
        self.completed = true;
        self.state = ParseState::Done;
    }

    fn append_body(&mut self, bytes: &[u8]) -> Result<(), ParseError> {
        let pending = self
            .pending
            .as_mut()
            .expect("body bytes before head completion");
        if pending.body.len() + bytes.len() > self.cfg.max_body_size {
            return Err(ParseError::PayloadTooLarge);
        }
        pending.body.extend_from_slice(bytes);
        Ok(())
    }

    fn parse_head(&mut self, head: &[u8], ctx: &ParseCtx)
        -> Result<BodyProgress, ParseError>
    {
        let mut header_arr = [httparse::EMPTY_HEADER; MAX_HEADERS_NUM];
        let mut raw = httparse::Request::new(&mut header_arr);
        match raw.parse(head) {
            Ok(httparse::Status::Complete(_)) => {}
            // the delimiter is already buffered
            Ok(httparse::Status::Partial) => unreachable!(),
            Err(e) => return Err(e.into()),
        }

        let version = match raw.version {
            Some(0) => Version::Http10,
            Some(1) => Version::Http11,
            _ => return Err(ParseError::BadVersion),
        };
        let method_tok = raw.method.unwrap_or("");
        let method = Method::from_str(method_tok)
            .map_err(|e| ParseError::BadMethod(e.0))?;
        if method == Method::All {
            // pseudo-verb, never valid on the wire
            return Err(ParseError::BadMethod(method_tok.to_string()));
        }
        let path = raw.path.unwrap_or("/").to_string();

        let mut headers = HeaderMap::new();
        for h in raw.headers.iter() {
            headers.add(h.name, str::from_utf8(h.value)?);
        }

        let te_chunked = headers
            .header("Transfer-Encoding")
            .map(|h| h.flag("chunked"))
            .unwrap_or(false);
        let cl_list = headers.list("Content-Length");
        if te_chunked && !cl_list.is_empty() {
            return Err(ParseError::ConflictingBodyHeaders);
        }
        let content_length = match cl_list.first() {
            None => 0,
            Some(first) => {
                let first = first.trim().parse::<u64>()?;
                for other in &cl_list[1..] {
                    if other.trim().parse::<u64>().ok() != Some(first) {
                        return Err(ParseError::DuplicateContentLength);
                    }
                }
                first
            }
        };
        if content_length > self.cfg.max_body_size as u64 {
            return Err(ParseError::PayloadTooLarge);
        }

        let conn_hdr = headers.header("Connection");
        let keep_alive = match version {
            Version::Http11 => {
                !conn_hdr.map(|h| h.flag("close")).unwrap_or(false)
            }
            Version::Http10 => {
                conn_hdr.map(|h| h.flag("keep-alive")).unwrap_or(false)
            }
        };

        let raw_path = path
            .split('?')
            .next()
            .unwrap_or("/")
            .to_string();
        let url = if path.starts_with('/') {
            let host = headers.get("Host").unwrap_or("localhost");
            Url::parse(&format!("http://{}{}", host, path))
                .map_err(|_| ParseError::BadUrl)?
        } else {
            Url::parse(&path).map_err(|_| ParseError::BadUrl)?
        };

        trace!("[{}] head complete: {} {} {}",
               ctx.conn_id, method, raw_path, version);

        self.route = ctx.router.resolve_url(method, &raw_path);
        self.res = Some(Response::new(ctx.conn_id, ctx.conn.clone(),
                                      version));
        self.pending = Some(Pending {
            method,
            version,
            url,
            raw_path,
            headers,
            body: Vec::new(),
            keep_alive,
        });

        Ok(if te_chunked {
            BodyProgress::ChunkHead
        } else {
            BodyProgress::Fixed(content_length)
        })
    }
}
