//! The connection-level protocol state machine.
//!
//! A connection owns the accepted socket, both buffers, the parser and
//! the current exchange. All entry points (`on_read`, `on_write`,
//! `on_resume`, `on_error`) are invoked from reactor callbacks only,
//! and never re-entrantly: dispatch runs with no outstanding borrow of
//! the connection, so handlers are free to write through it.

use std::cell::RefCell;
use std::fs;
use std::io::{self, Read, Write};
use std::rc::{Rc, Weak};
use std::time::{Duration, Instant};

use flate2::write::{GzEncoder, ZlibEncoder};
use flate2::Compression;
use log::{debug, error, trace};

use crate::buffer::Buf;
use crate::config::ServerConfig;
use crate::error::{HandlerError, HttpError, ParseError};
use crate::params::Params;
use crate::request::Request;
use crate::router::{RouteTarget, Router};

use super::parser::{ConnParser, ParseCtx};
use super::pipeline::Dispatch;
use super::reactor::{LoopHandle, TimerToken};

/// Connection state bits. Multiple may hold at once.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ConnFlag {
    Error = 0x01,
    Paused = 0x02,
    Waiting = 0x04,
    Connected = 0x08,
    KeepAlive = 0x10,
    SendingFile = 0x20,
    WaitRelease = 0x40,
}

#[derive(Debug, Copy, Clone, Default)]
pub struct ConnFlags(u8);

impl ConnFlags {
    pub fn is(&self, f: ConnFlag) -> bool {
        self.0 & f as u8 != 0
    }

    pub fn set(&mut self, f: ConnFlag) {
        self.0 |= f as u8;
    }

    pub fn unset(&mut self, f: ConnFlag) {
        self.0 &= !(f as u8);
    }
}

/// The byte stream a connection owns. TLS termination happens below
/// this seam, so the connection only ever sees plaintext.
pub trait Stream: Read + Write + 'static {}

impl<T: Read + Write + 'static> Stream for T {}

/// Chosen content coding for a file transfer.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) enum ContentCoding {
    Identity,
    Gzip,
    Deflate,
}

pub(crate) type FileDoneCb = Box<dyn FnOnce(Option<HandlerError>)>;

/// Result of pumping the in-flight file transfer.
pub(crate) enum FilePump {
    /// No transfer in progress.
    Idle,
    /// Output buffer above the watermark; the reactor calls back.
    Blocked,
    /// Transfer finished. The callback must be fired by the caller,
    /// outside the connection borrow.
    Done(Option<HandlerError>, Option<FileDoneCb>),
}

enum ChunkEncoder {
    Identity,
    Gzip(Option<GzEncoder<Vec<u8>>>),
    Deflate(Option<ZlibEncoder<Vec<u8>>>),
}

impl ChunkEncoder {
    /// Feed one source chunk through the stream. A sync flush after
    /// every chunk keeps each emitted chunk independently decodable.
    fn feed(&mut self, data: &[u8]) -> io::Result<Vec<u8>> {
        match self {
            ChunkEncoder::Identity => Ok(data.to_vec()),
            ChunkEncoder::Gzip(enc) => {
                let enc = enc.as_mut().expect("encoder already finished");
                enc.write_all(data)?;
                enc.flush()?;
                Ok(std::mem::take(enc.get_mut()))
            }
            ChunkEncoder::Deflate(enc) => {
                let enc = enc.as_mut().expect("encoder already finished");
                enc.write_all(data)?;
                enc.flush()?;
                Ok(std::mem::take(enc.get_mut()))
            }
        }
    }

    fn finish(&mut self) -> io::Result<Vec<u8>> {
        match self {
            ChunkEncoder::Identity => Ok(Vec::new()),
            ChunkEncoder::Gzip(enc) => {
                enc.take().expect("encoder already finished").finish()
            }
            ChunkEncoder::Deflate(enc) => {
                enc.take().expect("encoder already finished").finish()
            }
        }
    }
}

/// State of an in-flight chunked file transfer.
pub(crate) struct FileStream {
    file: fs::File,
    encoder: ChunkEncoder,
    res: crate::response::Response,
    cb: Option<FileDoneCb>,
}

impl FileStream {
    pub(crate) fn new(file: fs::File, coding: ContentCoding,
                      res: crate::response::Response,
                      cb: Option<FileDoneCb>)
        -> FileStream
    {
        let encoder = match coding {
            ContentCoding::Identity => ChunkEncoder::Identity,
            ContentCoding::Gzip => ChunkEncoder::Gzip(Some(
                GzEncoder::new(Vec::new(), Compression::default()),
            )),
            ContentCoding::Deflate => ChunkEncoder::Deflate(Some(
                ZlibEncoder::new(Vec::new(), Compression::default()),
            )),
        };
        FileStream { file, encoder, res, cb }
    }
}

/// Object-safe facade the response writes through. Implemented by
/// `Connection<S>` for every stream type.
pub(crate) trait ConnCtl {
    fn flag_is(&self, f: ConnFlag) -> bool;
    fn set_flag(&mut self, f: ConnFlag);
    fn out_write(&mut self, data: &[u8]);
    fn try_flush(&mut self);
    fn schedule_resume(&mut self);
    fn start_file(&mut self, fs: FileStream);
    fn pump_file(&mut self) -> FilePump;
    fn after_response(&mut self);
    fn compression_threshold(&self) -> f32;
}

pub struct Connection<S: Stream> {
    id: u64,
    sock: S,
    inbuf: Buf,
    outbuf: Buf,
    flags: ConnFlags,
    parser: ConnParser,
    router: Rc<Router>,
    cfg: Rc<ServerConfig>,
    timers: LoopHandle,
    file: Option<FileStream>,
    self_weak: Weak<RefCell<Connection<S>>>,
    resume_timer: Option<TimerToken>,
    on_close: Option<Box<dyn Fn(u64)>>,
    closed: bool,
    last_activity: Instant,
}

impl<S: Stream> Connection<S> {
    pub fn create(id: u64, sock: S, router: Rc<Router>,
                  cfg: Rc<ServerConfig>, timers: LoopHandle,
                  on_close: Option<Box<dyn Fn(u64)>>)
        -> Rc<RefCell<Connection<S>>>
    {
        let conn = Rc::new_cyclic(|weak| {
            let mut flags = ConnFlags::default();
            flags.set(ConnFlag::Connected);
            RefCell::new(Connection {
                id,
                sock,
                inbuf: Buf::new(),
                outbuf: Buf::new(),
                flags,
                parser: ConnParser::new(cfg.clone()),
                router,
                cfg,
                timers,
                file: None,
                self_weak: weak.clone(),
                resume_timer: None,
                on_close,
                closed: false,
                last_activity: Instant::now(),
            })
        });
        trace!("[{}] connection created", id);
        conn
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn flags(&self) -> ConnFlags {
        self.flags
    }

    pub(crate) fn sock_mut(&mut self) -> &mut S {
        &mut self.sock
    }

    /// Whether the reactor should keep read interest.
    pub fn wants_read(&self) -> bool {
        !self.closed && !self.flags.is(ConnFlag::Paused)
    }

    /// Whether the reactor should keep write interest.
    pub fn wants_write(&self) -> bool {
        !self.closed
            && (!self.outbuf.is_empty()
                || self.flags.is(ConnFlag::SendingFile))
    }

    pub fn idle_expired(&self, now: Instant) -> bool {
        !self.closed
            && now.duration_since(self.last_activity)
                >= self.cfg.keep_alive_timeout
    }

    /// Inbound event: drain the socket, drive the parser, dispatch a
    /// completed message.
    pub fn on_read(me: &Rc<RefCell<Connection<S>>>) {
        let do_exec = {
            let mut c = me.borrow_mut();
            if c.closed {
                return;
            }
            if c.flags.is(ConnFlag::Paused) {
                // remember that inbound work is pending; the resume
                // path picks it up (the poll edge is gone by then)
                c.flags.set(ConnFlag::Waiting);
                return;
            }
            c.last_activity = Instant::now();

            let mut eof = false;
            let max = c.cfg.read_buf_size;
            loop {
                let Connection { ref mut inbuf, ref mut sock, .. } = *c;
                match inbuf.read_from(sock, max) {
                    Ok(0) => {
                        eof = true;
                        break;
                    }
                    Ok(_) => continue,
                    Err(ref e)
                        if e.kind() == io::ErrorKind::WouldBlock =>
                    {
                        break;
                    }
                    Err(ref e)
                        if e.kind() == io::ErrorKind::Interrupted =>
                    {
                        continue;
                    }
                    Err(e) => {
                        debug!("[{}] read error: {}", c.id, e);
                        c.flags.set(ConnFlag::Error);
                        c.close();
                        return;
                    }
                }
            }

            if c.parser.completed() && c.parser.res_ended() {
                c.parser.reset();
            }

            if c.inbuf.is_empty() {
                if eof {
                    c.close();
                }
                return;
            }

            let parse_result = {
                let Connection {
                    ref inbuf,
                    ref mut parser,
                    ref router,
                    ref self_weak,
                    id,
                    ..
                } = *c;
                let ctl: Weak<RefCell<dyn ConnCtl>> = self_weak.clone();
                let ctx = ParseCtx {
                    conn: &ctl,
                    router,
                    conn_id: id,
                };
                parser.parse(inbuf.pull_up(), &ctx)
            };
            match parse_result {
                Ok(nread) => c.inbuf.consume(nread),
                Err(e) => {
                    c.reject(e);
                    return;
                }
            }

            if let Some(keep) = c.parser.keepalive_hint() {
                if keep {
                    c.flags.set(ConnFlag::KeepAlive);
                } else {
                    c.flags.unset(ConnFlag::KeepAlive);
                }
            }

            if eof {
                c.flags.unset(ConnFlag::KeepAlive);
                if !c.parser.completed() {
                    // peer went away mid-message
                    c.close();
                    return;
                }
            }

            if c.parser.res_paused() {
                return;
            }

            if !c.inbuf.is_empty() && c.parser.completed() {
                // pipelined bytes wait until the current response ends
                c.flags.set(ConnFlag::Waiting);
            }

            c.parser.completed() && !c.parser.executed()
        };
        if do_exec {
            Self::exec(me);
        }
    }

    /// Outbound event: flush, resume reads, push file chunks, finish
    /// the exchange once everything is written.
    pub fn on_write(me: &Rc<RefCell<Connection<S>>>) {
        enum After {
            Fall,
            Read,
            Pump,
        }
        let after = {
            let mut c = me.borrow_mut();
            if c.closed || c.flags.is(ConnFlag::Paused) {
                return;
            }
            c.last_activity = Instant::now();
            c.try_flush();
            if c.closed {
                return;
            }
            if c.flags.is(ConnFlag::Waiting) {
                c.flags.unset(ConnFlag::Waiting);
                if !c.inbuf.is_empty() {
                    After::Read
                } else {
                    After::Fall
                }
            } else if c.flags.is(ConnFlag::SendingFile) {
                After::Pump
            } else {
                After::Fall
            }
        };
        match after {
            After::Read => return Self::on_read(me),
            After::Pump => {
                let pumped = me.borrow_mut().pump_file();
                if let FilePump::Done(err, cb) = pumped {
                    if let Some(cb) = cb {
                        cb(err);
                    }
                }
            }
            After::Fall => {}
        }

        let mut c = me.borrow_mut();
        if c.closed || !c.parser.res_ended() {
            return;
        }
        if !c.outbuf.is_empty() {
            return;
        }
        if c.flags.is(ConnFlag::Error) {
            c.close();
            return;
        }
        if c.flags.is(ConnFlag::KeepAlive) {
            c.parser.reset();
            if c.flags.is(ConnFlag::Waiting) {
                c.schedule_resume();
            }
        } else {
            c.close();
        }
    }

    /// Deferred-resume timer fired.
    pub fn on_resume(me: &Rc<RefCell<Connection<S>>>) {
        let res = {
            let mut c = me.borrow_mut();
            if c.closed {
                return;
            }
            debug!("[{}] resuming", c.id);
            c.resume_timer = None;
            c.flags.unset(ConnFlag::Paused);
            if c.flags.is(ConnFlag::WaitRelease) {
                c.close();
                return;
            }
            c.parser.response().cloned()
        };
        if let Some(res) = res {
            res.finish_resume();
        }

        enum After {
            Nothing,
            Exec,
            Read,
        }
        let after = {
            let mut c = me.borrow_mut();
            if c.closed {
                return;
            }
            if !c.outbuf.is_empty() {
                c.flags.set(ConnFlag::Waiting);
                After::Nothing
            } else {
                c.flags.unset(ConnFlag::Waiting);
                if c.parser.completed() && !c.parser.executed() {
                    After::Exec
                } else {
                    // always re-attempt a read: bytes that arrived
                    // while paused produced no new poll edge
                    After::Read
                }
            }
        };
        match after {
            After::Exec => Self::exec(me),
            After::Read => Self::on_read(me),
            After::Nothing => {}
        }
    }

    /// Connection-level event from the reactor: timeout or transport
    /// error.
    pub fn on_error(me: &Rc<RefCell<Connection<S>>>, timeout: bool) {
        let mut c = me.borrow_mut();
        if c.closed {
            return;
        }
        if timeout {
            debug!("[{}] timeout, closing", c.id);
            c.close();
            return;
        }
        c.flags.set(ConnFlag::Error);
        c.flags.unset(ConnFlag::Connected);
        if c.flags.is(ConnFlag::Paused) {
            c.flags.set(ConnFlag::WaitRelease);
        } else {
            c.close();
        }
    }

    /// Resolve and dispatch the completed message. Runs with no
    /// outstanding borrow so handlers can write through the
    /// connection.
    fn exec(me: &Rc<RefCell<Connection<S>>>) {
        let (pending, rmatch, res, router) = {
            let mut c = me.borrow_mut();
            match c.parser.take_for_exec() {
                None => return,
                Some((pending, rmatch, res)) => {
                    (pending, rmatch, res, c.router.clone())
                }
            }
        };
        let (params, target) = match rmatch {
            Some(m) => (m.params, Some(m.target)),
            None => (Params::new(), None),
        };
        let req = Request::new(
            res.id(),
            pending.method,
            pending.version,
            pending.url,
            pending.raw_path,
            pending.headers,
            params,
            pending.body,
        );
        let route = match target {
            Some(RouteTarget::Handlers(ref rt)) => Some(rt.clone()),
            _ => None,
        };
        res.bind(req.clone(), route);
        Dispatch::run(&router, req, res, target);
    }

    /// Respond to a malformed message and arrange for close.
    fn reject(&mut self, err: ParseError) {
        let (status, reason) = err.http_status();
        error!("[{}] parse error: {}", self.id, err);
        self.flags.set(ConnFlag::Error);
        self.flags.unset(ConnFlag::KeepAlive);
        let started = self
            .parser
            .response()
            .map(|r| r.started())
            .unwrap_or(false);
        if !started {
            let body = format!("<h1>{} {}</h1>\n<p>{}</p>\n",
                               status, reason, err);
            let head = format!(
                "HTTP/1.1 {} {}\r\n\
                 Content-Type: text/html; charset=utf-8\r\n\
                 Content-Length: {}\r\n\
                 Connection: close\r\n\r\n",
                status, reason, body.len()
            );
            self.outbuf.extend(head.as_bytes());
            self.outbuf.extend(body.as_bytes());
        }
        self.try_flush();
        if self.outbuf.is_empty() {
            self.close();
        }
    }

    fn write_chunk_frame(&mut self, data: &[u8]) {
        if data.is_empty() {
            return;
        }
        self.outbuf
            .extend(format!("{:x}\r\n", data.len()).as_bytes());
        self.outbuf.extend(data);
        self.outbuf.extend(b"\r\n");
    }

    /// End the chunked stream and tear the transfer down, reporting
    /// `err` to the completion callback.
    fn abort_file(&mut self, err: HandlerError) -> FilePump {
        self.outbuf.extend(b"0\r\n\r\n");
        self.flags.unset(ConnFlag::SendingFile);
        self.flags.set(ConnFlag::Error);
        self.flags.unset(ConnFlag::KeepAlive);
        let mut fs = self.file.take().expect("no file transfer");
        fs.res.mark_ended();
        fs.res.set_error(err.clone());
        self.try_flush();
        FilePump::Done(Some(err), fs.cb.take())
    }

    /// Idempotent close: flush what we can, cancel the resume timer,
    /// drop the transfer state and deregister from the worker.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        trace!("[{}] closing", self.id);
        {
            let Connection { ref mut outbuf, ref mut sock, .. } = *self;
            let _ = outbuf.write_to(&mut *sock);
            let _ = sock.flush();
        }
        if let Some(token) = self.resume_timer.take() {
            self.timers.cancel(token);
        }
        self.parser.reset();
        self.file = None;
        self.flags.unset(ConnFlag::Connected);
        if let Some(cb) = self.on_close.take() {
            cb(self.id);
        }
    }
}

impl<S: Stream> ConnCtl for Connection<S> {
    fn flag_is(&self, f: ConnFlag) -> bool {
        self.flags.is(f)
    }

    fn set_flag(&mut self, f: ConnFlag) {
        self.flags.set(f);
    }

    fn out_write(&mut self, data: &[u8]) {
        if self.closed {
            return;
        }
        self.outbuf.extend(data);
    }

    fn try_flush(&mut self) {
        if self.closed {
            return;
        }
        let result = {
            let Connection { ref mut outbuf, ref mut sock, .. } = *self;
            outbuf
                .write_to(&mut *sock)
                .and_then(|_| sock.flush())
        };
        if let Err(e) = result {
            debug!("[{}] write error: {}", self.id, e);
            self.flags.set(ConnFlag::Error);
            self.flags.unset(ConnFlag::Connected);
            if self.flags.is(ConnFlag::Paused) {
                self.flags.set(ConnFlag::WaitRelease);
            } else {
                self.close();
            }
        }
    }

    fn schedule_resume(&mut self) {
        if self.closed || self.resume_timer.is_some() {
            return;
        }
        let weak = self.self_weak.clone();
        let token = self.timers.set_timeout(
            Duration::from_millis(0),
            move || {
                if let Some(rc) = weak.upgrade() {
                    Connection::on_resume(&rc);
                }
            },
        );
        self.resume_timer = Some(token);
    }

    fn start_file(&mut self, fs: FileStream) {
        self.file = Some(fs);
        self.flags.set(ConnFlag::SendingFile);
    }

    fn pump_file(&mut self) -> FilePump {
        if self.file.is_none() || !self.flags.is(ConnFlag::SendingFile) {
            return FilePump::Idle;
        }
        loop {
            if self.closed {
                self.flags.unset(ConnFlag::SendingFile);
                let mut fs = self.file.take().expect("no file transfer");
                fs.res.mark_ended();
                return FilePump::Done(
                    Some(HandlerError::new("connection closed during \
                                            file transfer")),
                    fs.cb.take(),
                );
            }
            if self.outbuf.len() >= self.cfg.out_watermark {
                self.try_flush();
                if self.outbuf.len() >= self.cfg.out_watermark {
                    return FilePump::Blocked;
                }
                continue;
            }

            let mut buf = vec![0u8; self.cfg.read_buf_size];
            let nread = {
                let fs = self.file.as_mut().expect("no file transfer");
                match fs.file.read(&mut buf) {
                    Ok(n) => n,
                    Err(ref e)
                        if e.kind() == io::ErrorKind::Interrupted =>
                    {
                        continue;
                    }
                    Err(e) => {
                        return self.abort_file(
                            HandlerError::new(format!(
                                "file read failed: {}", e
                            ))
                            .with_status(500),
                        );
                    }
                }
            };

            if nread > 0 {
                let encoded = {
                    let fs =
                        self.file.as_mut().expect("no file transfer");
                    fs.encoder.feed(&buf[..nread])
                };
                match encoded {
                    Ok(bytes) => self.write_chunk_frame(&bytes),
                    Err(e) => {
                        error!("[{}] deflate failed: {}", self.id, e);
                        return self.abort_file(
                            HandlerError::new(format!(
                                "deflate failed: {}", e
                            ))
                            .with_status(500),
                        );
                    }
                }
                self.try_flush();
            } else {
                let tail = {
                    let fs =
                        self.file.as_mut().expect("no file transfer");
                    fs.encoder.finish()
                };
                match tail {
                    Ok(bytes) => self.write_chunk_frame(&bytes),
                    Err(e) => {
                        error!("[{}] deflate failed: {}", self.id, e);
                        return self.abort_file(
                            HandlerError::new(format!(
                                "deflate failed: {}", e
                            ))
                            .with_status(500),
                        );
                    }
                }
                self.outbuf.extend(b"0\r\n\r\n");
                self.flags.unset(ConnFlag::SendingFile);
                let mut fs = self.file.take().expect("no file transfer");
                fs.res.mark_ended();
                self.try_flush();
                trace!("[{}] file transfer complete", self.id);
                return FilePump::Done(None, fs.cb.take());
            }
        }
    }

    fn after_response(&mut self) {
        if self.closed || self.flags.is(ConnFlag::SendingFile) {
            return;
        }
        if !self.parser.res_ended() {
            return;
        }
        self.try_flush();
        if self.closed || !self.outbuf.is_empty() {
            return;
        }
        if self.flags.is(ConnFlag::Error) {
            self.close();
            return;
        }
        if self.flags.is(ConnFlag::KeepAlive) {
            self.parser.reset();
            if self.flags.is(ConnFlag::Waiting) {
                self.schedule_resume();
            }
        } else {
            self.close();
        }
    }

    fn compression_threshold(&self) -> f32 {
        self.cfg.compression_threshold
    }
}
