//! Shared test harness: an in-memory stream and a hand-driven loop.

extern crate emvc;

use std::cell::RefCell;
use std::io::{self, Read, Write};
use std::rc::Rc;

use emvc::server::{ConnFlag, Connection, LoopHandle};
use emvc::{Router, ServerConfig};

/// In-memory duplex: tests append inbound bytes to `input`, the
/// connection writes the response into `output`.
#[derive(Clone, Default)]
pub struct MockStream {
    pub input: Rc<RefCell<Vec<u8>>>,
    pub output: Rc<RefCell<Vec<u8>>>,
}

impl Read for MockStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut input = self.input.borrow_mut();
        if input.is_empty() {
            return Err(io::ErrorKind::WouldBlock.into());
        }
        let n = buf.len().min(input.len());
        buf[..n].copy_from_slice(&input[..n]);
        input.drain(..n);
        Ok(n)
    }
}

impl Write for MockStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.output.borrow_mut().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

pub struct Harness {
    pub conn: Rc<RefCell<Connection<MockStream>>>,
    pub input: Rc<RefCell<Vec<u8>>>,
    pub output: Rc<RefCell<Vec<u8>>>,
    pub timers: LoopHandle,
}

impl Harness {
    pub fn new(router: Rc<Router>) -> Harness {
        Harness::with_config(router, ServerConfig::default())
    }

    pub fn with_config(router: Rc<Router>, cfg: ServerConfig)
        -> Harness
    {
        let stream = MockStream::default();
        let input = stream.input.clone();
        let output = stream.output.clone();
        let timers = LoopHandle::new();
        let conn = Connection::create(
            1,
            stream,
            router,
            Rc::new(cfg),
            timers.clone(),
            None,
        );
        Harness { conn, input, output, timers }
    }

    /// Feed bytes as if the peer sent them, then settle the loop.
    pub fn push(&self, bytes: &[u8]) {
        self.input.borrow_mut().extend_from_slice(bytes);
        Connection::on_read(&self.conn);
        self.drive();
    }

    /// Fire timers and write events until nothing moves.
    pub fn drive(&self) {
        for _ in 0..64 {
            let fired = self.timers.fire_due();
            let busy = {
                let c = self.conn.borrow();
                !c.is_closed() && c.flags().is(ConnFlag::SendingFile)
            };
            if !self.conn.borrow().is_closed() {
                Connection::on_write(&self.conn);
            }
            if fired == 0 && !busy {
                break;
            }
        }
    }

    pub fn output_string(&self) -> String {
        String::from_utf8_lossy(&self.output.borrow()).into_owned()
    }

    pub fn take_output(&self) -> Vec<u8> {
        std::mem::take(&mut *self.output.borrow_mut())
    }

    pub fn closed(&self) -> bool {
        self.conn.borrow().is_closed()
    }
}

pub fn split_response(raw: &[u8]) -> (String, Vec<u8>) {
    let pos = raw
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .expect("no header/body delimiter in response");
    (
        String::from_utf8_lossy(&raw[..pos]).into_owned(),
        raw[pos + 4..].to_vec(),
    )
}

/// Reassemble a chunked body; asserts on framing and the terminator.
pub fn dechunk(mut body: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    loop {
        let line_end = body
            .windows(2)
            .position(|w| w == b"\r\n")
            .expect("no chunk size line");
        let size_str =
            std::str::from_utf8(&body[..line_end]).expect("bad size");
        let size =
            usize::from_str_radix(size_str.trim(), 16).expect("bad hex");
        body = &body[line_end + 2..];
        if size == 0 {
            assert_eq!(&body[..2], b"\r\n", "missing final CRLF");
            return out;
        }
        out.extend_from_slice(&body[..size]);
        assert_eq!(&body[size..size + 2], b"\r\n",
                   "missing chunk data CRLF");
        body = &body[size + 2..];
    }
}
