// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! A framed message channel over one connected descriptor.
//!
//! One outstanding read, one outstanding write. The read handler is
//! one-shot: it is consumed by the next decoded message and must be
//! re-installed for the message after that. I/O errors always close the
//! channel and are reported to the error callback as a POSIX errno:
//! peer hangup at a message boundary is ECONNRESET, hangup mid-message
//! ECONNABORTED, a malformed frame EBADMSG, an oversize frame EMSGSIZE.

use std::cell::RefCell;
use std::os::fd::{AsRawFd, OwnedFd};
use std::rc::Rc;

use bytes::BytesMut;
use fw_reactor::{IoEvent, ReactorHandle};
use nix::errno::Errno;

use crate::frame::{encode_frame, Payload, Registry, HEADER_LEN};
use crate::{WireError, DEFAULT_MAX_MESSAGE_SIZE};

/// Handle to a channel. Clones share the same underlying connection;
/// the connection closes when the last clone drops (or on `close`).
pub struct Channel<M> {
    core: Rc<RefCell<Core<M>>>,
}

impl<M> Clone for Channel<M> {
    fn clone(&self) -> Self {
        Self {
            core: Rc::clone(&self.core),
        }
    }
}

struct Core<M> {
    fd: Option<OwnedFd>,
    reactor: ReactorHandle,
    registry: Rc<Registry<M>>,
    max_message_size: usize,
    rbuf: BytesMut,
    /// Total frame size once the header has been read.
    rsize: Option<usize>,
    wbuf: BytesMut,
    wpos: usize,
    read_handler: Option<Box<dyn FnOnce(M)>>,
    write_done: Option<Box<dyn FnOnce()>>,
    error_handler: Option<Box<dyn FnMut(i32)>>,
}

enum ReadOutcome<M> {
    /// Nothing to do (no handler installed, or channel closed).
    Idle,
    /// Frame incomplete; wait for more data.
    Pending,
    Message(M),
    Failed(i32),
}

enum WriteOutcome {
    Idle,
    Pending,
    Flushed,
    Failed(i32),
}

impl<M: Payload> Channel<M> {
    /// Wrap a connected descriptor. The fd is registered with the
    /// reactor and switched to non-blocking mode.
    pub fn new(
        fd: OwnedFd,
        reactor: &ReactorHandle,
        registry: Rc<Registry<M>>,
    ) -> Result<Self, WireError> {
        let raw = fd.as_raw_fd();
        let core = Rc::new(RefCell::new(Core {
            fd: Some(fd),
            reactor: reactor.clone(),
            registry,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            rbuf: BytesMut::new(),
            rsize: None,
            wbuf: BytesMut::new(),
            wpos: 0,
            read_handler: None,
            write_done: None,
            error_handler: None,
        }));
        let weak = Rc::downgrade(&core);
        reactor.add(raw, move |event| {
            if let Some(core) = weak.upgrade() {
                Self::io_handler(&core, event);
            }
        })?;
        Ok(Self { core })
    }

    /// Install the handler for the next decoded message. Fails if one
    /// is already waiting.
    pub fn set_read_handler(&self, handler: impl FnOnce(M) + 'static) -> Result<(), WireError> {
        let mut core = self.core.borrow_mut();
        if core.fd.is_none() {
            tracing::warn!("set_read_handler called on closed channel");
            return Ok(());
        }
        if core.read_handler.is_some() {
            return Err(WireError::ReadBusy);
        }
        core.rbuf.clear();
        core.rsize = None;
        core.read_handler = Some(Box::new(handler));
        core.update_interest();
        Ok(())
    }

    /// Install the error callback. Called with a POSIX errno after the
    /// channel has closed itself.
    pub fn set_error_handler(&self, handler: impl FnMut(i32) + 'static) {
        let mut core = self.core.borrow_mut();
        if core.fd.is_none() {
            tracing::warn!("set_error_handler called on closed channel");
            return;
        }
        core.error_handler = Some(Box::new(handler));
    }

    /// Serialise and send one message; `done` runs once the frame is
    /// fully written. Fails if another write is still in flight.
    pub fn write(&self, msg: &M, done: impl FnOnce() + 'static) -> Result<(), WireError> {
        let mut core = self.core.borrow_mut();
        if core.fd.is_none() {
            tracing::warn!("write called on closed channel");
            return Ok(());
        }
        if core.write_done.is_some() {
            return Err(WireError::WriteBusy);
        }
        core.wbuf = encode_frame(msg);
        core.wpos = 0;
        core.write_done = Some(Box::new(done));
        // The flush happens on the writability check queued by the
        // interest change, never synchronously inside write().
        core.update_interest();
        Ok(())
    }

    /// Bound on the size of received frames; larger ones fail the
    /// channel with EMSGSIZE.
    pub fn set_max_message_size(&self, max: usize) {
        self.core.borrow_mut().max_message_size = max;
    }

    pub fn is_closed(&self) -> bool {
        self.core.borrow().fd.is_none()
    }

    /// Close the channel and remove its fd from the reactor.
    /// Idempotent.
    pub fn close(&self) {
        self.core.borrow_mut().close();
    }

    fn io_handler(core: &Rc<RefCell<Core<M>>>, event: IoEvent) {
        match event {
            IoEvent::In => Self::on_readable(core),
            IoEvent::Out => Self::on_writable(core),
            IoEvent::Error(code) => Self::fail(core, code),
        }
    }

    fn on_readable(core: &Rc<RefCell<Core<M>>>) {
        let outcome = core.borrow_mut().fill_read();
        match outcome {
            ReadOutcome::Idle | ReadOutcome::Pending => {}
            ReadOutcome::Failed(code) => Self::fail(core, code),
            ReadOutcome::Message(msg) => {
                // The handler is taken out before the call so it can
                // immediately write or re-arm on this same channel.
                let handler = core.borrow_mut().read_handler.take();
                if let Some(handler) = handler {
                    handler(msg);
                }
                core.borrow_mut().update_interest();
            }
        }
    }

    fn on_writable(core: &Rc<RefCell<Core<M>>>) {
        let outcome = core.borrow_mut().flush_write();
        match outcome {
            WriteOutcome::Idle | WriteOutcome::Pending => {}
            WriteOutcome::Failed(code) => Self::fail(core, code),
            WriteOutcome::Flushed => {
                let done = {
                    let mut c = core.borrow_mut();
                    let done = c.write_done.take();
                    c.update_interest();
                    done
                };
                if let Some(done) = done {
                    done();
                }
            }
        }
    }

    /// Close the channel and notify the error callback.
    fn fail(core: &Rc<RefCell<Core<M>>>, code: i32) {
        let handler = {
            let mut c = core.borrow_mut();
            if c.fd.is_none() {
                return;
            }
            if code == libc::ECONNRESET {
                tracing::debug!("peer closed the connection");
            } else {
                tracing::error!(code, "channel error: {}", Errno::from_raw(code));
            }
            c.close();
            c.error_handler.take()
        };
        if let Some(mut handler) = handler {
            handler(code);
        }
    }
}

impl<M: Payload> Core<M> {
    fn fill_read(&mut self) -> ReadOutcome<M> {
        if self.read_handler.is_none() {
            return ReadOutcome::Idle;
        }
        loop {
            let Some(fd) = &self.fd else {
                return ReadOutcome::Idle;
            };
            let target = self.rsize.unwrap_or(HEADER_LEN);
            if self.rbuf.len() == target {
                match self.rsize {
                    None => {
                        // Header complete: validate the advertised size.
                        let mut header = [0u8; HEADER_LEN];
                        header.copy_from_slice(&self.rbuf[..HEADER_LEN]);
                        let size = u64::from_le_bytes(header) as usize;
                        if size <= HEADER_LEN {
                            tracing::error!(size, "malformed frame header");
                            return ReadOutcome::Failed(libc::EBADMSG);
                        }
                        if size > self.max_message_size {
                            tracing::error!(
                                size,
                                max = self.max_message_size,
                                "incoming message too large"
                            );
                            return ReadOutcome::Failed(libc::EMSGSIZE);
                        }
                        self.rsize = Some(size);
                        continue;
                    }
                    Some(_) => {
                        // Full frame present: decode kind and body.
                        let mut buf = std::mem::take(&mut self.rbuf);
                        self.rsize = None;
                        let tagged = buf.split_off(HEADER_LEN).freeze();
                        match self.registry.decode(tagged) {
                            Ok(msg) => return ReadOutcome::Message(msg),
                            Err(e) => {
                                tracing::error!(error = %e, "failed to decode frame");
                                return ReadOutcome::Failed(libc::EBADMSG);
                            }
                        }
                    }
                }
            }
            let mut chunk = [0u8; 65536];
            let want = std::cmp::min(target - self.rbuf.len(), chunk.len());
            match nix::unistd::read(fd.as_raw_fd(), &mut chunk[..want]) {
                Ok(0) => {
                    // EOF: clean between messages, abort mid-message.
                    let code = if self.rbuf.is_empty() {
                        libc::ECONNRESET
                    } else {
                        tracing::warn!("peer closed the connection mid-message");
                        libc::ECONNABORTED
                    };
                    return ReadOutcome::Failed(code);
                }
                Ok(n) => {
                    self.rbuf.extend_from_slice(&chunk[..n]);
                    if n < want {
                        // Kernel buffer drained; wait for the next edge.
                        return ReadOutcome::Pending;
                    }
                }
                Err(Errno::EAGAIN) => return ReadOutcome::Pending,
                Err(Errno::EINTR) => continue,
                Err(e) => {
                    tracing::warn!(error = %e, "read failed");
                    return ReadOutcome::Failed(e as i32);
                }
            }
        }
    }

    fn flush_write(&mut self) -> WriteOutcome {
        if self.write_done.is_none() {
            return WriteOutcome::Idle;
        }
        loop {
            let Some(fd) = &self.fd else {
                return WriteOutcome::Idle;
            };
            if self.wpos == self.wbuf.len() {
                self.wbuf = BytesMut::new();
                self.wpos = 0;
                return WriteOutcome::Flushed;
            }
            match nix::unistd::write(fd, &self.wbuf[self.wpos..]) {
                Ok(n) => self.wpos += n,
                Err(Errno::EAGAIN) => return WriteOutcome::Pending,
                Err(Errno::EINTR) => continue,
                Err(e) => {
                    tracing::warn!(error = %e, "write failed");
                    return WriteOutcome::Failed(e as i32);
                }
            }
        }
    }

    fn update_interest(&mut self) {
        let Some(fd) = &self.fd else {
            return;
        };
        let want_in = self.read_handler.is_some();
        let want_out = self.write_done.is_some();
        if let Err(e) = self.reactor.set_events(fd.as_raw_fd(), want_in, want_out) {
            tracing::warn!(error = %e, "adjusting channel interest failed");
        }
    }

    fn close(&mut self) {
        if let Some(fd) = self.fd.take() {
            self.reactor.remove(fd.as_raw_fd(), false);
            // dropping the OwnedFd closes it
        }
        self.read_handler = None;
        self.write_done = None;
    }
}

impl<M> Drop for Core<M> {
    fn drop(&mut self) {
        if let Some(fd) = self.fd.take() {
            self.reactor.remove(fd.as_raw_fd(), false);
        }
    }
}

#[cfg(test)]
#[path = "channel_tests.rs"]
mod tests;
