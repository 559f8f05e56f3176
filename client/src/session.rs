//! The client's half of the peer protocol: one connected UDP socket plus
//! the SYNC request backoff bookkeeping.

use std::io::ErrorKind;
use std::net::UdpSocket;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::Context;

use tandem_core::constants::MAX_DATAGRAM;
use tandem_core::error::SyncError;
use tandem_core::frame;
use tandem_core::protocol::{ChangeEntry, ClientMessage, Directive};

/// Artificial delay applied before every send when TEST_LATENCY is on.
const TEST_LATENCY_DELAY: Duration = Duration::from_millis(250);

const BOOTSTRAP_TIMEOUT: Duration = Duration::from_secs(30);

pub struct ServerLink {
    socket: UdpSocket,
    series: u64,
    poll_interval: Duration,
    sync_interval: Duration,
    backoff: Duration,
    last_sync_request: Instant,
    test_latency: bool,
}

impl ServerLink {
    pub fn connect(
        hostname: &str,
        port: u16,
        series: u64,
        poll_interval: Duration,
        sync_interval: Duration,
        test_latency: bool,
    ) -> anyhow::Result<ServerLink> {
        let socket = UdpSocket::bind(("0.0.0.0", 0)).context("binding the peer socket")?;
        socket
            .connect((hostname, port))
            .with_context(|| format!("resolving {hostname}:{port}"))?;
        socket
            .set_read_timeout(Some(poll_interval))
            .context("setting the peer read timeout")?;

        Ok(ServerLink {
            socket,
            series,
            poll_interval,
            sync_interval,
            backoff: sync_interval,
            last_sync_request: Instant::now() - sync_interval,
            test_latency,
        })
    }

    pub fn series(&self) -> u64 {
        self.series
    }

    fn send(&self, payload: &str) -> Result<(), SyncError> {
        if self.test_latency {
            thread::sleep(TEST_LATENCY_DELAY);
        }
        let datagram = frame::encode(payload)?;
        self.socket
            .send(&datagram)
            .map_err(SyncError::PeerUnreachable)?;
        Ok(())
    }

    pub fn send_message(&self, message: &ClientMessage) -> Result<(), SyncError> {
        self.send(&message.emit())
    }

    /// One receive attempt. `Ok(None)` means the tick's receive window
    /// passed without traffic.
    pub fn receive_directive(&self) -> Result<Option<Directive>, SyncError> {
        let mut buf = [0u8; MAX_DATAGRAM];
        match self.socket.recv(&mut buf) {
            Ok(received) => {
                let text = frame::decode(&buf[..received])?;
                Ok(Some(Directive::parse(&text)?))
            }
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => Ok(None),
            Err(e) => Err(SyncError::PeerUnreachable(e)),
        }
    }

    /// Create or join a session. The server gets a generous window to
    /// answer; anything but `Success` is fatal.
    pub fn bootstrap(&self, create: bool, session: &str) -> anyhow::Result<()> {
        let message = if create {
            ClientMessage::New { session: session.to_string(), series: self.series }
        } else {
            ClientMessage::Join { session: session.to_string(), series: self.series }
        };
        self.send_message(&message)
            .context("sending the session request")?;

        self.socket
            .set_read_timeout(Some(BOOTSTRAP_TIMEOUT))
            .context("widening the bootstrap timeout")?;
        let reply = self.receive_directive();
        self.socket
            .set_read_timeout(Some(self.poll_interval))
            .context("restoring the poll timeout")?;

        match reply.context("waiting for the session reply")? {
            Some(Directive::Success) => {
                log::info!(
                    "{} session {session:?} as member series {}",
                    if create { "created" } else { "joined" },
                    self.series
                );
                Ok(())
            }
            Some(Directive::Error(text)) => anyhow::bail!("server refused: {text}"),
            Some(other) => anyhow::bail!("unexpected session reply: {other:?}"),
            None => anyhow::bail!("no reply from the server"),
        }
    }

    /// Retransmit the change queue, halving the batch until the plain text
    /// fits in a datagram. Halving uses integer division, so it always
    /// terminates.
    pub fn send_change_queue(&self, entries: &[ChangeEntry]) -> Result<(), SyncError> {
        let mut batch = entries.len();
        while batch > 0 {
            let message = ClientMessage::Log {
                series: self.series,
                entries: entries[..batch].to_vec(),
            };
            let text = message.emit();
            if text.len() < MAX_DATAGRAM {
                return self.send(&text);
            }
            batch /= 2;
        }
        Err(SyncError::PeerProtocolError(
            "a single change entry exceeds the datagram limit".to_string(),
        ))
    }

    /// Send a SYNC request if the backoff window has elapsed. `forced`
    /// appends the `!` that demands an immediate reply.
    pub fn maybe_request_sync(&mut self, forced: bool) -> Result<(), SyncError> {
        if self.last_sync_request.elapsed() > self.backoff {
            self.send_message(&ClientMessage::SyncRequest { series: self.series, forced })?;
            self.last_sync_request = Instant::now();
        }
        Ok(())
    }

    /// Backoff bookkeeping: stretch 1.5x per quiet tick (capped at ten sync
    /// intervals), snap back to the base interval on any directive.
    pub fn note_tick(&mut self, directive_seen: bool) {
        if directive_seen {
            self.backoff = self.sync_interval;
        } else {
            self.backoff = self.backoff.mul_f64(1.5).min(self.sync_interval * 10);
        }
    }

    #[cfg(test)]
    fn backoff(&self) -> Duration {
        self.backoff
    }
}
