//! Scripted in-memory transport for driver tests.

use std::collections::VecDeque;
use std::io::{self, ErrorKind, Read, Write};
use std::sync::{Arc, Mutex};

#[derive(Default)]
struct Wire {
    replies: VecDeque<u8>,
    sent: Vec<u8>,
    pending_timeouts: usize,
    accept_writes: bool,
    writes_before_error: Option<usize>,
}

/// Device side of a [`MockTransport`], kept by the test after the transport
/// has been handed to the driver.
#[derive(Clone)]
pub struct MockHandle {
    wire: Arc<Mutex<Wire>>,
}

impl MockHandle {
    /// Queue bytes for the driver to read.
    pub fn reply(&self, bytes: &[u8]) {
        self.wire.lock().unwrap().replies.extend(bytes);
    }

    /// Every byte the driver has written so far.
    pub fn sent(&self) -> Vec<u8> {
        self.wire.lock().unwrap().sent.clone()
    }

    /// Make the next `n` reads fail with `TimedOut`.
    pub fn inject_timeouts(&self, n: usize) {
        self.wire.lock().unwrap().pending_timeouts = n;
    }

    /// Let `n` more writes through, then fail every write with `BrokenPipe`.
    pub fn fail_writes_after(&self, n: usize) {
        self.wire.lock().unwrap().writes_before_error = Some(n);
    }

    /// When false, writes report zero bytes accepted.
    pub fn accept_writes(&self, accept: bool) {
        self.wire.lock().unwrap().accept_writes = accept;
    }
}

pub struct MockTransport {
    wire: Arc<Mutex<Wire>>,
}

impl MockTransport {
    pub fn with_replies(replies: &[u8]) -> (Self, MockHandle) {
        let wire = Arc::new(Mutex::new(Wire {
            replies: replies.iter().copied().collect(),
            accept_writes: true,
            ..Wire::default()
        }));
        (
            MockTransport {
                wire: Arc::clone(&wire),
            },
            MockHandle { wire },
        )
    }
}

impl Read for MockTransport {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut wire = self.wire.lock().unwrap();
        if wire.pending_timeouts > 0 {
            wire.pending_timeouts -= 1;
            return Err(io::Error::new(ErrorKind::TimedOut, "mock timeout"));
        }
        let mut n = 0;
        while n < buf.len() {
            match wire.replies.pop_front() {
                Some(byte) => {
                    buf[n] = byte;
                    n += 1;
                }
                None => break,
            }
        }
        Ok(n)
    }
}

impl Write for MockTransport {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut wire = self.wire.lock().unwrap();
        match wire.writes_before_error {
            Some(0) => return Err(io::Error::new(ErrorKind::BrokenPipe, "mock write failure")),
            Some(n) => wire.writes_before_error = Some(n - 1),
            None => {}
        }
        if !wire.accept_writes {
            return Ok(0);
        }
        wire.sent.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
