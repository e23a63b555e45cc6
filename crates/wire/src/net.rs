// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! TCP plumbing: the listening acceptor, outgoing connections, and the
//! socketpair used by the local fork runner.

use std::cell::RefCell;
use std::io;
use std::net::{TcpListener, TcpStream};
use std::os::fd::{AsRawFd, OwnedFd};
use std::rc::Rc;

use fw_reactor::{IoEvent, ReactorHandle};

use crate::WireError;

/// Connect to `host:port`; an empty host means loopback. The returned
/// descriptor has TCP_NODELAY set and is ready to wrap in a channel.
pub fn connect_to(host: &str, port: u16) -> Result<OwnedFd, WireError> {
    let host = if host.is_empty() { "localhost" } else { host };
    let stream = TcpStream::connect((host, port))?;
    stream.set_nodelay(true)?;
    Ok(stream.into())
}

/// A connected AF_UNIX stream pair, one end per process after a fork.
pub fn socketpair_stream() -> Result<(OwnedFd, OwnedFd), WireError> {
    use nix::sys::socket::{socketpair, AddressFamily, SockFlag, SockType};
    let (a, b) = socketpair(
        AddressFamily::Unix,
        SockType::Stream,
        None,
        SockFlag::empty(),
    )?;
    Ok((a, b))
}

/// Accepts worker connections on a listening TCP socket and hands each
/// accepted descriptor to a callback. An error on the listening socket
/// stops the acceptor; established connections are unaffected.
pub struct TcpAcceptor {
    reactor: ReactorHandle,
    listener: Rc<RefCell<Option<TcpListener>>>,
}

impl TcpAcceptor {
    pub fn new(reactor: &ReactorHandle) -> Self {
        Self {
            reactor: reactor.clone(),
            listener: Rc::new(RefCell::new(None)),
        }
    }

    /// Bind `addr:port` (`"*"` listens on all interfaces) and start
    /// accepting. Each new connection gets TCP_NODELAY and is passed to
    /// `on_connection`.
    pub fn start(
        &mut self,
        addr: &str,
        port: u16,
        mut on_connection: impl FnMut(OwnedFd) + 'static,
    ) -> Result<(), WireError> {
        let bind_addr = if addr == "*" { "0.0.0.0" } else { addr };
        let listener = TcpListener::bind((bind_addr, port))?;
        listener.set_nonblocking(true)?;
        let raw = listener.as_raw_fd();
        *self.listener.borrow_mut() = Some(listener);

        let slot = Rc::clone(&self.listener);
        let reactor = self.reactor.clone();
        self.reactor.add(raw, move |event| match event {
            IoEvent::In => loop {
                let accepted = match slot.borrow().as_ref() {
                    Some(listener) => listener.accept(),
                    None => return,
                };
                match accepted {
                    Ok((stream, peer)) => {
                        if let Err(e) = stream.set_nodelay(true) {
                            tracing::warn!(error = %e, "setting TCP_NODELAY failed");
                        }
                        tracing::info!(%peer, "new worker connection");
                        on_connection(stream.into());
                    }
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => return,
                    Err(e) => {
                        tracing::warn!(error = %e, "accept failed");
                        return;
                    }
                }
            },
            IoEvent::Out => {}
            IoEvent::Error(code) => {
                tracing::error!(code, "error on listening socket; stopping acceptor");
                reactor.remove(raw, false);
                *slot.borrow_mut() = None;
            }
        })?;
        self.reactor.set_events(raw, true, false)?;
        Ok(())
    }

    /// Stop accepting and close the listening socket. Idempotent.
    pub fn stop(&mut self) {
        let Some(listener) = self.listener.borrow_mut().take() else {
            return;
        };
        self.reactor.remove(listener.as_raw_fd(), false);
        // dropping the listener closes the socket
    }
}

impl Drop for TcpAcceptor {
    fn drop(&mut self) {
        self.stop();
    }
}
