//! The per-exchange response object.
//!
//! A `Response` is a shared handle; handlers and suspended callbacks
//! clone it freely. It writes through the owning connection's output
//! buffer and keeps the write-side state machine: headers are mutable
//! only until `started`, body bytes may only follow `started`, and
//! nothing may follow `ended`.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fmt::Write as _;
use std::fs;
use std::path::Path;
use std::rc::{Rc, Weak};

use log::{debug, error, warn};
use serde::Serialize;

use crate::cookies::CookieJar;
use crate::error::HandlerError;
use crate::headers::{EncodingKind, HeaderMap};
use crate::request::Request;
use crate::router::Route;
use crate::server::connection::{ConnCtl, ConnFlag, ContentCoding,
                                FileDoneCb, FilePump, FileStream};
use crate::status::{is_redirect_status, reason_phrase};
use crate::version::Version;

/// A value attached to the response data map, shared between handlers
/// and views.
#[derive(Debug, Clone, PartialEq)]
pub enum DataValue {
    Str(String),
    Int(i64),
    Bool(bool),
    Json(serde_json::Value),
    List(Vec<DataValue>),
    Map(HashMap<String, DataValue>),
    Bytes(Vec<u8>),
}

impl DataValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            DataValue::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            DataValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            DataValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_json(&self) -> Option<&serde_json::Value> {
        match self {
            DataValue::Json(v) => Some(v),
            _ => None,
        }
    }
}

impl From<&str> for DataValue {
    fn from(s: &str) -> DataValue {
        DataValue::Str(s.to_string())
    }
}

impl From<String> for DataValue {
    fn from(s: String) -> DataValue {
        DataValue::Str(s)
    }
}

impl From<i64> for DataValue {
    fn from(i: i64) -> DataValue {
        DataValue::Int(i)
    }
}

impl From<bool> for DataValue {
    fn from(b: bool) -> DataValue {
        DataValue::Bool(b)
    }
}

impl From<serde_json::Value> for DataValue {
    fn from(v: serde_json::Value) -> DataValue {
        DataValue::Json(v)
    }
}

#[derive(Clone)]
pub struct Response {
    inner: Rc<ResponseInner>,
}

struct ResponseInner {
    id: u64,
    conn: Weak<RefCell<dyn ConnCtl>>,
    version: Version,
    headers: RefCell<HeaderMap>,
    cookies: RefCell<CookieJar>,
    status: Cell<Option<u16>>,
    ctype: RefCell<String>,
    enc: RefCell<String>,
    started: Cell<bool>,
    ended: Cell<bool>,
    chunked: Cell<bool>,
    event_started: Cell<bool>,
    paused: Cell<bool>,
    resuming: Cell<bool>,
    resume_cb: RefCell<Option<Box<dyn FnOnce(Option<HandlerError>)>>>,
    data: RefCell<HashMap<String, DataValue>>,
    err: RefCell<Option<HandlerError>>,
    err_status: Cell<u16>,
    req: RefCell<Option<Request>>,
    route: RefCell<Option<Rc<Route>>>,
}

impl Response {
    pub(crate) fn new(id: u64, conn: Weak<RefCell<dyn ConnCtl>>,
                      version: Version)
        -> Response
    {
        Response {
            inner: Rc::new(ResponseInner {
                id,
                conn,
                version,
                headers: RefCell::new(HeaderMap::new()),
                cookies: RefCell::new(CookieJar::new()),
                status: Cell::new(None),
                ctype: RefCell::new(String::new()),
                enc: RefCell::new(String::new()),
                started: Cell::new(false),
                ended: Cell::new(false),
                chunked: Cell::new(false),
                event_started: Cell::new(false),
                paused: Cell::new(false),
                resuming: Cell::new(false),
                resume_cb: RefCell::new(None),
                data: RefCell::new(HashMap::new()),
                err: RefCell::new(None),
                err_status: Cell::new(0),
                req: RefCell::new(None),
                route: RefCell::new(None),
            }),
        }
    }

    pub(crate) fn bind(&self, req: Request, route: Option<Rc<Route>>) {
        *self.inner.req.borrow_mut() = Some(req);
        *self.inner.route.borrow_mut() = route;
    }

    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn version(&self) -> Version {
        self.inner.version
    }

    pub fn req(&self) -> Option<Request> {
        self.inner.req.borrow().clone()
    }

    pub fn route(&self) -> Option<Rc<Route>> {
        self.inner.route.borrow().clone()
    }

    pub fn started(&self) -> bool {
        self.inner.started.get()
    }

    pub fn ended(&self) -> bool {
        self.inner.ended.get()
    }

    pub fn paused(&self) -> bool {
        self.inner.paused.get()
    }

    // == head phase ==

    pub fn status(&self, code: u16) -> &Response {
        self.inner.status.set(Some(code));
        self
    }

    pub fn get_status(&self) -> u16 {
        self.inner.status.get().unwrap_or(200)
    }

    pub fn encoding(&self, enc: &str) -> &Response {
        *self.inner.enc.borrow_mut() = enc.to_string();
        self
    }

    pub fn has_encoding(&self) -> bool {
        !self.inner.enc.borrow().is_empty()
    }

    /// Set the content type, with an optional charset. Writes the
    /// `Content-Type` header.
    pub fn content_type(&self, ctype: &str, enc: Option<&str>)
        -> &Response
    {
        *self.inner.ctype.borrow_mut() = ctype.to_string();
        if let Some(enc) = enc {
            *self.inner.enc.borrow_mut() = enc.to_string();
        }
        let enc = self.inner.enc.borrow();
        let value = if enc.is_empty() {
            ctype.to_string()
        } else {
            format!("{}; charset={}", ctype, enc)
        };
        self.inner.headers.borrow_mut().set("Content-Type", value);
        self
    }

    pub fn has_type(&self) -> bool {
        !self.inner.ctype.borrow().is_empty()
    }

    /// Writable header map. Mutations have no effect once the response
    /// has started (the head is already serialized).
    pub fn headers(&self) -> std::cell::RefMut<HeaderMap> {
        self.inner.headers.borrow_mut()
    }

    pub fn cookies(&self) -> std::cell::RefMut<CookieJar> {
        self.inner.cookies.borrow_mut()
    }

    // == body phase ==

    /// Send a complete fixed-length body and end the response.
    pub fn send<B: AsRef<[u8]>>(&self, body: B) {
        let body = body.as_ref();
        if self.paused() {
            self.resume();
        }
        if self.ended() {
            error!("[{}] send() on an ended response", self.inner.id);
            return;
        }
        if !self.has_type() {
            self.content_type("text/plain", Some("utf-8"));
        }
        self.inner
            .headers
            .borrow_mut()
            .set("Content-Length", body.len().to_string());
        self.reply_start();
        self.reply_raw(body);
        self.end();
    }

    /// Send the canonical reason phrase of `code` as the body.
    pub fn send_status(&self, code: u16) {
        self.status(code).send(reason_phrase(code));
    }

    pub fn html<B: AsRef<str>>(&self, body: B) {
        self.encoding("utf-8").content_type("text/html", None);
        self.send(body.as_ref());
    }

    pub fn json<T: Serialize>(&self, value: &T) {
        match serde_json::to_string(value) {
            Ok(body) => {
                self.encoding("utf-8")
                    .content_type("application/json", None);
                self.send(body);
            }
            Err(e) => {
                self.set_error(
                    HandlerError::new(e.to_string()).with_status(500),
                );
            }
        }
    }

    /// JSONP: the payload wrapped in a guarded callback invocation.
    /// U+2028 and U+2029 are escaped because they are valid JSON but
    /// not valid JavaScript string content.
    pub fn jsonp<T: Serialize>(&self, value: &T) {
        self.jsonp_with(value, "callback")
    }

    pub fn jsonp_with<T: Serialize>(&self, value: &T, cb_name: &str) {
        let json = match serde_json::to_string(value) {
            Ok(s) => s,
            Err(e) => {
                self.set_error(
                    HandlerError::new(e.to_string()).with_status(500),
                );
                return;
            }
        };
        if !self.has_encoding() {
            self.encoding("utf-8");
        }
        if !self.has_type() {
            self.inner
                .headers
                .borrow_mut()
                .set("X-Content-Type-Options", "nosniff");
            self.content_type("text/javascript", None);
        }
        let json = json
            .replace('\u{2028}', "\\u2028")
            .replace('\u{2029}', "\\u2029");
        let body = format!(
            "/**/ typeof {} === 'function' && {}({});",
            cb_name, cb_name, json
        );
        self.send(body);
    }

    /// Redirect with a whitelisted status (302 by default).
    pub fn redirect(&self, location: &str, status: Option<u16>)
        -> Result<(), HandlerError>
    {
        let code = status.unwrap_or(302);
        if !is_redirect_status(code) {
            return Err(HandlerError::new(format!(
                "invalid redirection status: {}", code
            )));
        }
        self.inner.headers.borrow_mut().set("Location", location);
        self.send_status(code);
        Ok(())
    }

    // == file transfer ==

    /// Stream a file as a chunked body, compressing on the fly when
    /// the request accepts gzip or deflate. The optional callback
    /// fires when the last chunk has been produced (or on failure).
    pub fn send_file<P: AsRef<Path>>(&self, path: P) {
        self.send_file_opts(path, None, None)
    }

    pub fn send_file_cb<P, F>(&self, path: P, cb: F)
        where P: AsRef<Path>, F: FnOnce(Option<HandlerError>) + 'static
    {
        self.send_file_opts(path, None, Some(Box::new(cb)))
    }

    pub(crate) fn send_file_opts<P: AsRef<Path>>(
        &self, path: P, enc: Option<&str>, cb: Option<FileDoneCb>)
    {
        let path = path.as_ref();
        let conn = match self.conn() {
            Some(conn) => conn,
            None => return,
        };
        let file = match fs::File::open(path) {
            Ok(f) => f,
            Err(e) => {
                let err = HandlerError::new(format!(
                    "can't open {:?}: {}", path, e
                ))
                .with_status(404);
                match cb {
                    Some(cb) => cb(Some(err)),
                    None => self.set_error(err),
                }
                return;
            }
        };

        let threshold = conn.borrow().compression_threshold();
        let coding = self
            .req()
            .map(|req| pick_coding(&req, threshold))
            .unwrap_or(ContentCoding::Identity);

        {
            let mut headers = self.inner.headers.borrow_mut();
            headers.remove("Content-Length");
            headers.set("Transfer-Encoding", "chunked");
            match coding {
                ContentCoding::Gzip => {
                    headers.set("Content-Encoding", "gzip");
                }
                ContentCoding::Deflate => {
                    headers.set("Content-Encoding", "deflate");
                }
                ContentCoding::Identity => {}
            }
        }
        if !self.has_type() {
            match enc {
                Some(enc) => {
                    self.content_type("application/octet-stream",
                                      Some(enc));
                }
                None => {
                    self.content_type("application/octet-stream", None);
                }
            }
        }
        debug!("[{}] streaming {:?} ({:?})", self.inner.id, path, coding);
        self.reply_start();

        let stream = FileStream::new(file, coding, self.clone(), cb);
        conn.borrow_mut().start_file(stream);
        let pumped = conn.borrow_mut().pump_file();
        if let FilePump::Done(err, cb) = pumped {
            if let Some(ref e) = err {
                self.set_error(e.clone());
            }
            if let Some(cb) = cb {
                cb(err);
            }
        }
    }

    /// `send_file` with a `Content-Disposition: attachment` header.
    pub fn download<P: AsRef<Path>>(&self, path: P,
                                    filename: Option<&str>)
    {
        self.download_opts(path, filename, None, None)
    }

    pub(crate) fn download_opts<P: AsRef<Path>>(
        &self, path: P, filename: Option<&str>, enc: Option<&str>,
        cb: Option<FileDoneCb>)
    {
        let path = path.as_ref();
        let name = filename
            .map(|s| s.to_string())
            .or_else(|| {
                path.file_name().map(|n| n.to_string_lossy().into_owned())
            })
            .unwrap_or_default();
        self.inner.headers.borrow_mut().set(
            "Content-Disposition",
            format!("attachment; filename={}", name),
        );
        self.send_file_opts(path, enc, cb);
    }

    // == server-sent events ==

    /// Emit one SSE event. The first event switches the response into
    /// a chunked `text/event-stream`.
    pub fn send_event(&self, event: &str, data: &str, id: &str) {
        let mut msg = String::new();
        if !event.is_empty() {
            writeln!(msg, "event: {}", event).unwrap();
        }
        for line in data.lines() {
            writeln!(msg, "data: {}", line).unwrap();
        }
        if !id.is_empty() {
            writeln!(msg, "id: {}", id).unwrap();
        }
        msg.push('\n');
        self.send_event_raw(&msg);
    }

    pub fn send_event_message(&self, message: &str) {
        let mut msg = String::new();
        for line in message.lines() {
            writeln!(msg, "data: {}", line).unwrap();
        }
        msg.push('\n');
        self.send_event_raw(&msg);
    }

    pub fn send_event_comment(&self, comment: &str) {
        self.send_event_raw(&format!(": {}\n\n", comment));
    }

    fn send_event_raw(&self, payload: &str) {
        if self.ended() {
            error!("[{}] send_event() on an ended response",
                   self.inner.id);
            return;
        }
        if !self.inner.event_started.get() {
            self.inner.event_started.set(true);
            {
                let mut headers = self.inner.headers.borrow_mut();
                headers.remove("Content-Length");
                headers.set("Transfer-Encoding", "chunked");
                headers.set("Cache-Control", "no-cache");
            }
            self.content_type("text/event-stream", Some("utf-8"));
            self.reply_start();
        }
        self.write_chunk(payload.as_bytes());
        if let Some(conn) = self.conn() {
            conn.borrow_mut().try_flush();
        }
    }

    // == pause / resume ==

    /// Suspend inbound processing on the owning connection until
    /// `resume` is called.
    pub fn pause(&self) {
        if self.paused() {
            return;
        }
        debug!("[{}] pausing", self.inner.id);
        self.inner.paused.set(true);
        if let Some(conn) = self.conn() {
            conn.borrow_mut().set_flag(ConnFlag::Paused);
        }
    }

    /// Schedule a resume. The actual transition happens on a zero
    /// delay reactor timer, never inline with the caller's stack.
    pub fn resume(&self) {
        if !self.paused() || self.inner.resuming.get() {
            warn!(
                "[{}] should not resume, paused: {}, resuming: {}",
                self.inner.id,
                self.paused(),
                self.inner.resuming.get()
            );
            return;
        }
        self.inner.resuming.set(true);
        if let Some(conn) = self.conn() {
            conn.borrow_mut().schedule_resume();
        }
    }

    /// `resume` with a callback invoked when the connection is back on
    /// a reactor callback.
    pub fn resume_with<F>(&self, cb: F)
        where F: FnOnce(Option<HandlerError>) + 'static
    {
        if !self.paused() || self.inner.resuming.get() {
            warn!(
                "[{}] should not resume, paused: {}, resuming: {}",
                self.inner.id,
                self.paused(),
                self.inner.resuming.get()
            );
            return;
        }
        *self.inner.resume_cb.borrow_mut() = Some(Box::new(cb));
        self.resume();
    }

    /// Called by the connection from the resume timer.
    pub(crate) fn finish_resume(&self) {
        if !self.paused() {
            return;
        }
        self.inner.paused.set(false);
        self.inner.resuming.set(false);
        if let Some(cb) = self.inner.resume_cb.borrow_mut().take() {
            cb(None);
        }
    }

    // == end phase ==

    /// Whether the connection is mid-way through streaming a file for
    /// this response.
    pub(crate) fn is_streaming(&self) -> bool {
        self.conn()
            .map(|c| c.borrow().flag_is(ConnFlag::SendingFile))
            .unwrap_or(false)
    }

    /// End the response. Starting it first if needed; a chunked body
    /// gets its terminator.
    pub fn end(&self) {
        if self.is_streaming() {
            warn!("[{}] end() ignored, file transfer in flight",
                  self.inner.id);
            return;
        }
        if !self.started() {
            if !self.has_type() {
                self.encoding("utf-8")
                    .content_type("text/plain", None);
            }
            self.reply_start();
        }
        if self.ended() {
            error!("[{}] must not end, already ended", self.inner.id);
            return;
        }
        if self.inner.chunked.get() {
            if let Some(conn) = self.conn() {
                conn.borrow_mut().out_write(b"0\r\n\r\n");
            }
        }
        self.inner.ended.set(true);
        if let Some(conn) = self.conn() {
            conn.borrow_mut().try_flush();
        }
    }

    // == error state ==

    pub fn has_error(&self) -> bool {
        self.inner.err.borrow().is_some()
    }

    pub fn get_error(&self) -> Option<HandlerError> {
        self.inner.err.borrow().clone()
    }

    pub fn get_error_status(&self) -> u16 {
        match self.inner.err_status.get() {
            0 => 500,
            s => s,
        }
    }

    /// Record an error; the status comes from the error's hint, 500
    /// otherwise. Mirrored into the data map for templates.
    pub fn set_error(&self, err: HandlerError) {
        let status = err.status().unwrap_or(500);
        self.set_error_with_status(err, status)
    }

    pub fn set_error_with_status(&self, err: HandlerError, status: u16) {
        self.inner.err_status.set(status);
        self.set_data("_err_status", DataValue::Int(status as i64));
        self.set_data("_err_status_desc",
                      DataValue::from(reason_phrase(status)));
        self.set_data("_err_message", DataValue::from(err.message()));
        self.set_data("_err_has_stack",
                      DataValue::Bool(err.stack().is_some()));
        if let Some(stack) = err.stack() {
            self.set_data("_err_stack", DataValue::from(stack));
        }
        *self.inner.err.borrow_mut() = Some(err);
    }

    pub fn clear_error(&self) {
        if !self.has_error() {
            return;
        }
        debug!("[{}] clearing current error", self.inner.id);
        *self.inner.err.borrow_mut() = None;
        self.inner.err_status.set(0);
        for key in &["_err_status", "_err_status_desc", "_err_message",
                     "_err_has_stack", "_err_stack"]
        {
            self.clear_data(key);
        }
    }

    /// Record `err` and render the error page immediately.
    pub fn error<E: Into<HandlerError>>(&self, err: E) {
        self.set_error(err.into());
        self.render_error_page();
    }

    /// Render the recorded error as a response.
    ///
    /// # Panics
    ///
    /// Panics when no error was set.
    pub fn send_error(&self) {
        assert!(self.has_error(), "no error was set");
        self.render_error_page();
    }

    pub(crate) fn render_error_page(&self) {
        if self.ended() {
            return;
        }
        if self.started() {
            // too late for a status line, close out what we have
            self.end();
            return;
        }
        let status = self.get_error_status();
        let message = self
            .get_error()
            .map(|e| e.message().to_string())
            .unwrap_or_default();
        let mut body = format!(
            "<h1>{} {}</h1>\n<p>{}</p>\n",
            status,
            reason_phrase(status),
            message
        );
        if let Some(stack) = self.get_error().and_then(|e| {
            e.stack().map(|s| s.to_string())
        }) {
            write!(body, "<pre>{}</pre>\n", stack).unwrap();
        }
        self.status(status);
        self.html(body);
    }

    // == data map ==

    pub fn set_data<V: Into<DataValue>>(&self, name: &str, value: V) {
        self.inner
            .data
            .borrow_mut()
            .insert(name.to_string(), value.into());
    }

    pub fn get_data(&self, name: &str) -> Option<DataValue> {
        self.inner.data.borrow().get(name).cloned()
    }

    pub fn clear_data(&self, name: &str) {
        self.inner.data.borrow_mut().remove(name);
    }

    // == internals ==

    fn conn(&self) -> Option<Rc<RefCell<dyn ConnCtl>>> {
        self.inner.conn.upgrade()
    }

    /// Serialize the status line and headers. Must happen exactly once
    /// before any body byte.
    pub(crate) fn reply_start(&self) {
        if self.started() {
            error!("[{}] must not reply_start, already started",
                   self.inner.id);
            return;
        }
        self.prepare_headers();
        self.inner.started.set(true);
    }

    fn prepare_headers(&self) {
        let conn = match self.conn() {
            Some(conn) => conn,
            None => return,
        };
        let status = self.get_status();
        let mut head = format!(
            "{} {} {}\r\n",
            self.inner.version,
            status,
            reason_phrase(status)
        );

        let mut headers = self.inner.headers.borrow_mut();
        let chunked = headers
            .header("Transfer-Encoding")
            .map(|h| h.flag("chunked"))
            .unwrap_or(false);
        self.inner.chunked.set(chunked);
        if !chunked && !headers.exists("Content-Length") {
            headers.set("Content-Length", "0");
        }
        let mut conn_ref = conn.borrow_mut();
        if !headers.exists("Connection") {
            let value = if conn_ref.flag_is(ConnFlag::KeepAlive) {
                "keep-alive"
            } else {
                "close"
            };
            headers.set("Connection", value);
        }
        self.inner.cookies.borrow().write_headers(&mut headers);

        for (name, value) in headers.iter() {
            write!(head, "{}: {}\r\n", name, value).unwrap();
        }
        head.push_str("\r\n");
        conn_ref.out_write(head.as_bytes());
    }

    /// Append body bytes: raw for fixed-length responses, framed for
    /// chunked ones.
    pub(crate) fn reply_raw(&self, data: &[u8]) {
        if self.inner.chunked.get() {
            self.write_chunk(data);
            return;
        }
        if let Some(conn) = self.conn() {
            conn.borrow_mut().out_write(data);
        }
    }

    fn write_chunk(&self, data: &[u8]) {
        if data.is_empty() {
            return;
        }
        if let Some(conn) = self.conn() {
            let mut conn = conn.borrow_mut();
            conn.out_write(format!("{:x}\r\n", data.len()).as_bytes());
            conn.out_write(data);
            conn.out_write(b"\r\n");
        }
    }

    /// Flag the response as ended without touching the connection;
    /// used by the file streamer which already owns the connection
    /// borrow.
    pub(crate) fn mark_ended(&self) {
        self.inner.ended.set(true);
    }

    /// Run the connection's end-of-exchange transition (keep-alive
    /// reset or close).
    pub(crate) fn after_dispatch(&self) {
        if let Some(conn) = self.conn() {
            conn.borrow_mut().after_response();
        }
    }
}

impl std::fmt::Debug for Response {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("Response")
            .field("id", &self.inner.id)
            .field("status", &self.get_status())
            .field("started", &self.started())
            .field("ended", &self.ended())
            .finish()
    }
}

/// Gzip wins whenever the client accepts it above the threshold,
/// deflate is the fallback; clients that only send `*` get an identity
/// body.
fn pick_coding(req: &Request, threshold: f32) -> ContentCoding {
    let mut deflate = false;
    for enc in req.accept_encodings() {
        if enc.weight <= threshold {
            continue;
        }
        match enc.kind {
            EncodingKind::Gzip => return ContentCoding::Gzip,
            EncodingKind::Deflate => deflate = true,
            EncodingKind::Star | EncodingKind::Unsupported => {}
        }
    }
    if deflate {
        ContentCoding::Deflate
    } else {
        ContentCoding::Identity
    }
}
