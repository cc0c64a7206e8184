//! ICMP Echo Prober - Raw Socket Round-Trip Measurement
//!
//! Sends a fixed number of ICMP (or ICMPv6) echo requests to one target
//! over a pnet layer-4 transport channel and times the matching replies.
//! Each probe run opens its own raw socket and filters the shared ICMP
//! stream by source address, a random identifier and the sequence number.
//!
//! Raw sockets require `CAP_NET_RAW`; without it the run fails with
//! [`ProbeError::Socket`] and the scheduler skips the target.

use std::collections::HashMap;
use std::io;
use std::net::IpAddr;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use pnet::packet::Packet;
use pnet::packet::icmp::{self, IcmpCode, IcmpPacket, IcmpTypes};
use pnet::packet::icmpv6::{Icmpv6Code, Icmpv6Packet, Icmpv6Types};
use pnet::packet::ip::IpNextHeaderProtocols;
use pnet::transport::{self, TransportChannelType, TransportProtocol};
use tracing::{debug, instrument};

use crate::config::ProbeConfig;
use crate::domain::probe::ProbeResult;
use crate::domain::target::Target;
use crate::ports::prober::{ProbeError, Prober};

const TRANSPORT_BUFFER_SIZE: usize = 4096;
const ECHO_HEADER_LEN: usize = 8;
const ECHO_PAYLOAD_LEN: usize = 24;

/// Timing of one probe run.
#[derive(Debug, Clone, Copy)]
pub struct IcmpProberConfig {
    /// Spacing between echo requests.
    pub sample_interval: Duration,
    /// Wait for outstanding replies after the last request.
    pub reply_timeout: Duration,
}

impl From<&ProbeConfig> for IcmpProberConfig {
    fn from(config: &ProbeConfig) -> Self {
        Self {
            sample_interval: config.sample_interval(),
            reply_timeout: config.reply_timeout(),
        }
    }
}

/// An echo reply seen on the raw socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct EchoReply {
    source: IpAddr,
    identifier: u16,
    sequence: u16,
}

/// Request/reply bookkeeping of one run.
#[derive(Debug)]
struct EchoSession {
    target: IpAddr,
    identifier: u16,
    outstanding: HashMap<u16, Instant>,
    rtts: Vec<Duration>,
}

impl EchoSession {
    fn new(target: IpAddr, identifier: u16) -> Self {
        Self {
            target,
            identifier,
            outstanding: HashMap::new(),
            rtts: Vec::new(),
        }
    }

    fn on_sent(&mut self, sequence: u16, at: Instant) {
        self.outstanding.insert(sequence, at);
    }

    /// Match a reply; duplicates, foreign and unknown replies are ignored.
    fn on_reply(&mut self, reply: &EchoReply, at: Instant) -> bool {
        if reply.source != self.target || reply.identifier != self.identifier {
            return false;
        }
        match self.outstanding.remove(&reply.sequence) {
            Some(sent_at) => {
                self.rtts.push(at.saturating_duration_since(sent_at));
                true
            }
            None => false,
        }
    }

    fn all_answered(&self) -> bool {
        self.outstanding.is_empty()
    }
}

/// Drive one echo run: send, then collect replies until the next send
/// (or until `reply_timeout` after the last one).
fn run_session<S, R>(
    target: IpAddr,
    identifier: u16,
    sample_count: u32,
    config: IcmpProberConfig,
    mut send: S,
    mut recv: R,
) -> Vec<Duration>
where
    S: FnMut(u16) -> io::Result<()>,
    R: FnMut(Duration) -> io::Result<Option<EchoReply>>,
{
    let mut session = EchoSession::new(target, identifier);

    for n in 0..sample_count {
        let Ok(sequence) = u16::try_from(n) else {
            break;
        };
        match send(sequence) {
            Ok(()) => session.on_sent(sequence, Instant::now()),
            Err(e) => debug!(target = %target, sequence, error = %e, "Echo request not sent"),
        }

        let is_last = n + 1 == sample_count;
        let wait = if is_last {
            config.reply_timeout
        } else {
            config.sample_interval
        };
        let deadline = Instant::now() + wait;

        loop {
            let now = Instant::now();
            if now >= deadline || (is_last && session.all_answered()) {
                break;
            }
            match recv(deadline - now) {
                Ok(Some(reply)) => {
                    session.on_reply(&reply, Instant::now());
                }
                Ok(None) => {}
                Err(e) => {
                    debug!(target = %target, error = %e, "Echo receive failed");
                    std::thread::sleep(deadline.saturating_duration_since(Instant::now()));
                    break;
                }
            }
        }
    }

    session.rtts
}

fn echo_request_v4(identifier: u16, sequence: u16) -> Option<Vec<u8>> {
    let mut buf = vec![0u8; ECHO_HEADER_LEN + ECHO_PAYLOAD_LEN];
    {
        let mut echo = icmp::echo_request::MutableEchoRequestPacket::new(&mut buf)?;
        echo.set_icmp_type(IcmpTypes::EchoRequest);
        echo.set_icmp_code(IcmpCode(0));
        echo.set_identifier(identifier);
        echo.set_sequence_number(sequence);
        echo.set_checksum(0);
    }
    let checksum = icmp::checksum(&IcmpPacket::new(&buf)?);
    icmp::echo_request::MutableEchoRequestPacket::new(&mut buf)?.set_checksum(checksum);
    Some(buf)
}

/// ICMPv6 checksums cover a pseudo-header; the kernel fills them in on raw sockets.
fn echo_request_v6(identifier: u16, sequence: u16) -> Option<Vec<u8>> {
    let mut buf = vec![0u8; ECHO_HEADER_LEN + ECHO_PAYLOAD_LEN];
    {
        let mut echo = pnet::packet::icmpv6::echo_request::MutableEchoRequestPacket::new(&mut buf)?;
        echo.set_icmpv6_type(Icmpv6Types::EchoRequest);
        echo.set_icmpv6_code(Icmpv6Code(0));
        echo.set_identifier(identifier);
        echo.set_sequence_number(sequence);
        echo.set_checksum(0);
    }
    Some(buf)
}

fn parse_reply_v4(packet: &IcmpPacket<'_>, source: IpAddr) -> Option<EchoReply> {
    if packet.get_icmp_type() != IcmpTypes::EchoReply {
        return None;
    }
    let reply = icmp::echo_reply::EchoReplyPacket::new(packet.packet())?;
    Some(EchoReply {
        source,
        identifier: reply.get_identifier(),
        sequence: reply.get_sequence_number(),
    })
}

fn parse_reply_v6(packet: &Icmpv6Packet<'_>, source: IpAddr) -> Option<EchoReply> {
    if packet.get_icmpv6_type() != Icmpv6Types::EchoReply {
        return None;
    }
    let reply = pnet::packet::icmpv6::echo_reply::EchoReplyPacket::new(packet.packet())?;
    Some(EchoReply {
        source,
        identifier: reply.get_identifier(),
        sequence: reply.get_sequence_number(),
    })
}

fn channel_type(target: IpAddr) -> TransportChannelType {
    match target {
        IpAddr::V4(_) => TransportChannelType::Layer4(TransportProtocol::Ipv4(
            IpNextHeaderProtocols::Icmp,
        )),
        IpAddr::V6(_) => TransportChannelType::Layer4(TransportProtocol::Ipv6(
            IpNextHeaderProtocols::Icmpv6,
        )),
    }
}

fn malformed() -> io::Error {
    io::Error::other("echo request buffer too small")
}

/// Blocking echo run on a fresh raw socket.
fn echo_blocking(
    target: IpAddr,
    sample_count: u32,
    config: IcmpProberConfig,
) -> Result<Vec<Duration>, ProbeError> {
    let (mut tx, mut rx) = transport::transport_channel(TRANSPORT_BUFFER_SIZE, channel_type(target))
        .map_err(|e| ProbeError::Socket(e.to_string()))?;
    let identifier: u16 = rand::random();

    let rtts = match target {
        IpAddr::V4(_) => {
            let mut replies = transport::icmp_packet_iter(&mut rx);
            run_session(
                target,
                identifier,
                sample_count,
                config,
                |sequence| {
                    let buf = echo_request_v4(identifier, sequence).ok_or_else(malformed)?;
                    let packet = IcmpPacket::new(&buf).ok_or_else(malformed)?;
                    tx.send_to(packet, target).map(|_| ())
                },
                |timeout| {
                    Ok(replies
                        .next_with_timeout(timeout)?
                        .and_then(|(packet, source)| parse_reply_v4(&packet, source)))
                },
            )
        }
        IpAddr::V6(_) => {
            let mut replies = transport::icmpv6_packet_iter(&mut rx);
            run_session(
                target,
                identifier,
                sample_count,
                config,
                |sequence| {
                    let buf = echo_request_v6(identifier, sequence).ok_or_else(malformed)?;
                    let packet = Icmpv6Packet::new(&buf).ok_or_else(malformed)?;
                    tx.send_to(packet, target).map(|_| ())
                },
                |timeout| {
                    Ok(replies
                        .next_with_timeout(timeout)?
                        .and_then(|(packet, source)| parse_reply_v6(&packet, source)))
                },
            )
        }
    };

    Ok(rtts)
}

/// ICMP echo prober for IPv4 and IPv6 targets.
#[derive(Debug, Clone)]
pub struct IcmpProber {
    config: IcmpProberConfig,
}

impl IcmpProber {
    /// Create a prober with the given run timing.
    pub fn new(config: IcmpProberConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Prober for IcmpProber {
    #[instrument(skip(self, target), fields(target = %target))]
    async fn probe(
        &self,
        target: &Target,
        sample_count: u32,
        sequence: u64,
    ) -> Result<ProbeResult, ProbeError> {
        let ip = target.ip().map_err(|e| ProbeError::InvalidAddress {
            target: target.to_string(),
            reason: e.to_string(),
        })?;

        let config = self.config;
        let rtts = tokio::task::spawn_blocking(move || echo_blocking(ip, sample_count, config))
            .await
            .map_err(|e| ProbeError::Task(e.to_string()))??;

        Ok(ProbeResult::from_samples(
            target.clone(),
            sample_count,
            &rtts,
            sequence,
        ))
    }
}
