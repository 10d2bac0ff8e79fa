//! The reactor-driven SMTP engine, per `spec.md` §4.2 and §5.
//!
//! `Server` owns the `Reactor`, the `Metrics` registry, the loaded VRFY
//! table, and (when a transform command is configured) the
//! `TransformDispatcher`. `Resource` is the reactor's generic payload type:
//! the two passive listeners, the UDP control socket, and one
//! `(TcpStream, Connection)` pair per accepted client.

use crate::config::Config;
use crate::connection::{Connection, OpenMessage};
use crate::control;
use crate::maildrop;
use crate::metrics::Metrics;
use crate::net;
use crate::reactor::{Interest, Reactor, Registrable, TypeTag};
use crate::smtp::parser::{self, Action, DataLineOutcome, ParserState};
use crate::smtp::vrfy::VerifyTable;
use crate::transform::TransformDispatcher;
use anyhow::{Context, Result};
use log::{error, info, warn};
use mio::event::Source;
use mio::net::{TcpListener as MioTcpListener, TcpStream as MioTcpStream, UdpSocket as MioUdpSocket};
use std::io::{ErrorKind, Read, Write};
use std::net::SocketAddr;
use std::os::fd::{AsRawFd, RawFd};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Longest line accepted before a connection is torn down as abusive; not
/// named by `spec.md` but required to bound memory for a buffer that
/// otherwise grows unboundedly on a peer that never sends CRLF.
const MAX_LINE_LEN: usize = 64 * 1024;

static SHUTDOWN_REQUESTED: AtomicBool = AtomicBool::new(false);

extern "C" fn handle_sigint(_: nix::libc::c_int) {
    SHUTDOWN_REQUESTED.store(true, Ordering::SeqCst);
}

fn install_sigint_handler() -> Result<()> {
    use nix::sys::signal::{sigaction, SaFlags, SigAction, SigHandler, SigSet, Signal};
    unsafe {
        sigaction(
            Signal::SIGINT,
            &SigAction::new(SigHandler::Handler(handle_sigint), SaFlags::empty(), SigSet::empty()),
        )
    }
    .context("installing SIGINT handler")?;
    Ok(())
}

/// The reactor's per-fd payload, one variant per `TypeTag`.
enum Resource {
    PassiveV4(MioTcpListener),
    PassiveV6(MioTcpListener),
    Control(MioUdpSocket),
    Client { stream: MioTcpStream, conn: Connection },
}

impl Registrable for Resource {
    fn raw_fd(&self) -> RawFd {
        match self {
            Resource::PassiveV4(l) | Resource::PassiveV6(l) => l.as_raw_fd(),
            Resource::Control(s) => s.as_raw_fd(),
            Resource::Client { stream, .. } => stream.as_raw_fd(),
        }
    }

    fn source(&mut self) -> &mut dyn Source {
        match self {
            Resource::PassiveV4(l) | Resource::PassiveV6(l) => l,
            Resource::Control(s) => s,
            Resource::Client { stream, .. } => stream,
        }
    }
}

enum WriteStep {
    Idle(bool),
    Wrote(std::io::Result<usize>),
}

pub struct Server {
    config: Config,
    domain: String,
    reactor: Reactor<Resource>,
    metrics: Metrics,
    vrfy: VerifyTable,
    transform: Option<TransformDispatcher>,
    smtp_local_addr: SocketAddr,
    mgmt_local_addr: SocketAddr,
}

impl Server {
    pub fn new(config: Config) -> Result<Self> {
        let smtp_addr: SocketAddr = format!("0.0.0.0:{}", config.smtp_port)
            .parse()
            .context("building SMTP bind address")?;
        let mgmt_addr: SocketAddr = format!("0.0.0.0:{}", config.mgmt_port)
            .parse()
            .context("building control-plane bind address")?;

        let listener = net::bind_tcp_listener(smtp_addr)?;
        let control_socket = net::bind_udp_socket(mgmt_addr)?;
        let smtp_local_addr = listener.local_addr().context("reading SMTP listener local address")?;
        let mgmt_local_addr = control_socket
            .local_addr()
            .context("reading control-plane socket local address")?;

        let mut reactor: Reactor<Resource> = Reactor::new(256).context("creating reactor")?;
        reactor
            .register(Resource::PassiveV4(listener), Interest::READ, TypeTag::PassiveV4)
            .context("registering SMTP listener")?;
        reactor
            .register(Resource::Control(control_socket), Interest::READ, TypeTag::ControlUdp)
            .context("registering control-plane socket")?;

        let vrfy = VerifyTable::load(config.vrfy_file.as_deref()).context("loading verify file")?;

        let mut metrics = Metrics::new();
        let transform = match &config.transform_cmd {
            Some(cmd) => {
                let exe = std::env::current_exe()
                    .context("resolving current executable path for transform worker re-exec")?;
                metrics.set_transform_enabled(true);
                Some(
                    TransformDispatcher::spawn(&exe.to_string_lossy(), cmd, &config.maildir.to_string_lossy())
                        .context("spawning transform worker pool")?,
                )
            }
            None => None,
        };

        Ok(Server {
            domain: config.domain.clone(),
            config,
            reactor,
            metrics,
            vrfy,
            transform,
            smtp_local_addr,
            mgmt_local_addr,
        })
    }

    /// The SMTP listener's actual bound address (useful when `Config.smtp_port`
    /// is `0` and the OS assigns an ephemeral port, e.g. in tests).
    pub fn smtp_local_addr(&self) -> SocketAddr {
        self.smtp_local_addr
    }

    /// The control-plane socket's actual bound address.
    pub fn mgmt_local_addr(&self) -> SocketAddr {
        self.mgmt_local_addr
    }

    /// Runs the reactor loop until SIGINT is observed, then shuts down
    /// transform workers and returns. Registered sockets close as `self`
    /// (and its `Reactor`'s registration table) drops.
    pub fn run(mut self) -> Result<()> {
        install_sigint_handler()?;
        info!(
            "smtpd listening: smtp port {} / mgmt port {} / domain {}",
            self.config.smtp_port, self.config.mgmt_port, self.domain
        );

        while !SHUTDOWN_REQUESTED.load(Ordering::SeqCst) {
            if let Err(e) = self.reactor.wait(Some(Duration::from_millis(500))) {
                error!("reactor wait failed, shutting down: {}", e);
                break;
            }
            while let Some((fd, tag)) = self.reactor.next_read() {
                self.handle_readable(fd, tag);
            }
            while let Some((fd, tag)) = self.reactor.next_write() {
                self.handle_writable(fd, tag);
            }
        }

        info!("SIGINT received, shutting down");
        if let Some(dispatcher) = self.transform.as_mut() {
            dispatcher.shutdown();
        }
        Ok(())
    }

    fn handle_readable(&mut self, fd: RawFd, tag: TypeTag) {
        match tag {
            TypeTag::PassiveV4 | TypeTag::PassiveV6 => self.accept_loop(fd),
            TypeTag::TcpClient => self.client_readable(fd),
            TypeTag::ControlUdp => self.control_readable(fd),
        }
    }

    fn handle_writable(&mut self, fd: RawFd, tag: TypeTag) {
        if tag == TypeTag::TcpClient {
            self.client_writable(fd);
        }
    }

    fn accept_loop(&mut self, fd: RawFd) {
        loop {
            let accepted = match self.reactor.get_mut(fd) {
                Some(Resource::PassiveV4(l)) | Some(Resource::PassiveV6(l)) => l.accept(),
                _ => return,
            };
            match accepted {
                Ok((stream, peer)) => {
                    if let Err(e) = self.register_client(stream, peer) {
                        warn!("failed to register accepted client {}: {}", peer, e);
                    }
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) => {
                    warn!("accept() on passive socket failed: {}", e);
                    break;
                }
            }
        }
    }

    fn register_client(&mut self, stream: MioTcpStream, peer: SocketAddr) -> Result<()> {
        let fd = stream.as_raw_fd();
        let mut conn = Connection::new(fd, peer);
        conn.queue_write(format!("220 {} Service ready\r\n", self.domain).as_bytes());
        self.reactor
            .register(Resource::Client { stream, conn }, Interest::WRITE, TypeTag::TcpClient)
            .context("registering client connection")?;
        self.metrics.record_connect();
        Ok(())
    }

    fn client_readable(&mut self, fd: RawFd) {
        let mut buf = [0u8; 4096];
        loop {
            let read_result = match self.reactor.get_mut(fd) {
                Some(Resource::Client { stream, .. }) => stream.read(&mut buf),
                _ => return,
            };
            match read_result {
                Ok(0) => {
                    self.teardown_client(fd);
                    return;
                }
                Ok(n) => {
                    if let Some(Resource::Client { conn, .. }) = self.reactor.get_mut(fd) {
                        conn.inbound.extend_from_slice(&buf[..n]);
                    }
                    self.metrics.record_bytes(n as u64);
                    self.drain_inbound_lines(fd);
                    if self.reactor.get_mut(fd).is_none() {
                        return;
                    }
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => return,
                Err(_) => {
                    self.teardown_client(fd);
                    return;
                }
            }
        }
    }

    fn drain_inbound_lines(&mut self, fd: RawFd) {
        loop {
            let extracted = match self.reactor.get_mut(fd) {
                Some(Resource::Client { conn, .. }) => match find_crlf_line(&conn.inbound) {
                    Some((line, consumed)) => {
                        conn.inbound.drain(..consumed);
                        Some((conn.state, Some(line)))
                    }
                    None if conn.inbound.len() > MAX_LINE_LEN => Some((conn.state, None)),
                    None => None,
                },
                None => return,
            };

            let (state, line) = match extracted {
                Some(pair) => pair,
                None => return,
            };
            let line = match line {
                Some(l) => l,
                None => {
                    warn!("client {} exceeded max line length, closing", fd);
                    self.teardown_client(fd);
                    return;
                }
            };

            if state == ParserState::InData {
                self.handle_data_line(fd, &line);
            } else {
                let text = String::from_utf8_lossy(&line).into_owned();
                self.handle_command_line(fd, &text);
            }

            if self.reactor.get_mut(fd).is_none() {
                return;
            }
        }
    }

    fn handle_command_line(&mut self, fd: RawFd, line: &str) {
        let domain = self.domain.clone();
        let outcome = {
            let conn = match self.reactor.get_mut(fd) {
                Some(Resource::Client { conn, .. }) => conn,
                _ => return,
            };
            parser::step(conn, &domain, &self.vrfy, line)
        };

        if outcome.action == Action::OpenData {
            self.open_data_file(fd);
        }

        if let Some(Resource::Client { conn, .. }) = self.reactor.get_mut(fd) {
            conn.queue_write(outcome.reply.as_bytes());
        }
        self.request_writable(fd);
    }

    fn handle_data_line(&mut self, fd: RawFd, raw_line: &[u8]) {
        match parser::step_data_line(raw_line) {
            DataLineOutcome::Append(bytes) => {
                let write_result = match self.reactor.get_mut(fd) {
                    Some(Resource::Client { conn, .. }) => {
                        conn.message.as_mut().map(|m| m.file.write_all(&bytes))
                    }
                    None => return,
                };
                if let Some(Err(e)) = write_result {
                    warn!("I/O error writing message body for fd {}: {}", fd, e);
                    self.fail_data(fd);
                }
            }
            DataLineOutcome::End => self.finalize_data(fd),
        }
    }

    fn open_data_file(&mut self, fd: RawFd) {
        let maildir = self.config.maildir.clone();
        let outcome = match self.reactor.get_mut(fd) {
            Some(Resource::Client { conn, .. }) => {
                let filename = conn.next_message_filename();
                maildrop::create_temp_file(&maildir, &filename).map(|file| {
                    conn.message = Some(OpenMessage { file, filename });
                })
            }
            None => return,
        };
        if let Err(e) = outcome {
            warn!("failed to open message temp file: {}", e);
            self.fail_data(fd);
        }
    }

    /// Transient I/O failure on the open message file: reply `451`, clear
    /// the envelope, and return to `PostGreeting` (§4.3 "End of DATA").
    fn fail_data(&mut self, fd: RawFd) {
        if let Some(Resource::Client { conn, .. }) = self.reactor.get_mut(fd) {
            conn.reset_transaction();
            conn.state = ParserState::PostGreeting;
            conn.queue_write(b"451 Requested action aborted: error in processing\r\n");
        }
        self.request_writable(fd);
    }

    fn finalize_data(&mut self, fd: RawFd) {
        let staged = match self.reactor.get_mut(fd) {
            Some(Resource::Client { conn, .. }) => match conn.message.take() {
                Some(message) => {
                    drop(message.file);
                    let use_transform = self.metrics.transform_enabled() && conn.transform_flag;
                    Some((message.filename, conn.envelope.recipients.clone(), use_transform))
                }
                None => None,
            },
            None => return,
        };

        let (filename, recipients, use_transform) = match staged {
            Some(s) => s,
            None => {
                self.fail_data(fd);
                return;
            }
        };

        let maildir = self.config.maildir.clone();
        let src_path = maildir.join(&filename);
        let mut all_ok = true;
        for recipient in &recipients {
            let success = if use_transform {
                match self.transform.as_mut() {
                    Some(dispatcher) => dispatcher.dispatch(recipient, &filename).unwrap_or(false),
                    None => false,
                }
            } else {
                maildrop::store_verbatim(&maildir, recipient, &filename, &src_path).is_ok()
            };
            if !success {
                all_ok = false;
            }
        }
        let _ = std::fs::remove_file(&src_path);

        if let Some(Resource::Client { conn, .. }) = self.reactor.get_mut(fd) {
            conn.reset_transaction();
            conn.state = ParserState::PostGreeting;
            conn.queue_write(if all_ok {
                b"250 Ok. Queued\r\n"
            } else {
                b"451 Requested action aborted: error in processing\r\n"
            });
        }
        self.request_writable(fd);
    }

    fn client_writable(&mut self, fd: RawFd) {
        loop {
            let step = match self.reactor.get_mut(fd) {
                Some(Resource::Client { stream, conn }) => {
                    if conn.outbound.is_empty() {
                        WriteStep::Idle(conn.state == ParserState::Terminal)
                    } else {
                        let slice = conn.outbound.make_contiguous();
                        WriteStep::Wrote(stream.write(slice))
                    }
                }
                None => return,
            };

            match step {
                WriteStep::Idle(terminal) => {
                    if terminal {
                        self.teardown_client(fd);
                    } else {
                        let _ = self.reactor.modify_interest(fd, Interest::READ);
                    }
                    return;
                }
                WriteStep::Wrote(Ok(0)) => {
                    self.teardown_client(fd);
                    return;
                }
                WriteStep::Wrote(Ok(n)) => {
                    if let Some(Resource::Client { conn, .. }) = self.reactor.get_mut(fd) {
                        conn.outbound.drain(..n);
                    }
                }
                WriteStep::Wrote(Err(e)) if e.kind() == ErrorKind::WouldBlock => return,
                WriteStep::Wrote(Err(_)) => {
                    self.teardown_client(fd);
                    return;
                }
            }
        }
    }

    fn request_writable(&mut self, fd: RawFd) {
        if let Some(current) = self.reactor.interest(fd) {
            let _ = self.reactor.modify_interest(fd, current.union(Interest::WRITE));
        }
    }

    fn teardown_client(&mut self, fd: RawFd) {
        if self.reactor.deregister(fd, Interest::BOTH, true).is_some() {
            // Resource handed back instead of dropped internally; drop it
            // here to close the socket.
        }
        self.metrics.record_disconnect();
    }

    fn control_readable(&mut self, fd: RawFd) {
        let mut buf = [0u8; 64];
        loop {
            let recv = match self.reactor.get_mut(fd) {
                Some(Resource::Control(socket)) => socket.recv_from(&mut buf),
                _ => return,
            };
            match recv {
                Ok((n, peer)) => {
                    let response = control::handle_datagram(&buf[..n], &mut self.metrics);
                    if let Some(Resource::Control(socket)) = self.reactor.get_mut(fd) {
                        if let Err(e) = socket.send_to(&response.encode(), peer) {
                            warn!("control-plane send_to {} failed: {}", peer, e);
                        }
                    }
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) => {
                    warn!("control socket recv error: {}", e);
                    break;
                }
            }
        }
    }
}

/// Finds the first CRLF-terminated line in `buf`, returning the line
/// (without the CRLF) and the number of bytes to drain including it.
fn find_crlf_line(buf: &[u8]) -> Option<(Vec<u8>, usize)> {
    let pos = buf.windows(2).position(|w| w == b"\r\n")?;
    Some((buf[..pos].to_vec(), pos + 2))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn find_crlf_line_splits_at_first_terminator() {
        let buf = b"HELO a.b\r\nMAIL FROM".to_vec();
        let (line, consumed) = find_crlf_line(&buf).unwrap();
        assert_eq!(line, b"HELO a.b");
        assert_eq!(consumed, 10);
    }

    #[test]
    fn find_crlf_line_is_none_without_terminator() {
        assert!(find_crlf_line(b"no terminator here").is_none());
    }
}
