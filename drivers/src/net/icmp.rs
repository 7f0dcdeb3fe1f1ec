//! ICMP echo and error message handling (RFC 792).
//!
//! Echo requests addressed to a configured interface are answered in-kernel.
//! Echo requests we originate (e.g. for a future `ping` syscall) are tracked
//! in a small fixed-size outstanding-ping table and matched against replies
//! by `(id, seq, dest)`; callers poll for completion rather than being
//! invoked back, since there is no callback-dispatch mechanism at this layer.
//!
//! Error messages (destination unreachable, time exceeded, parameter
//! problem) quote the offending datagram's IP header plus the first 8 bytes
//! of its L4 payload, per RFC 792. They are never generated in response to
//! another ICMP message, nor toward a broadcast/multicast destination.

use slopos_lib::{IrqMutex, klog_debug};

use super::netstack::NET_STACK;
use super::packetbuf::PacketBuf;
use super::types::{DevIndex, IpProtocol, Ipv4Addr, NetError};

pub const ICMP_TYPE_ECHO_REPLY: u8 = 0;
pub const ICMP_TYPE_DEST_UNREACHABLE: u8 = 3;
pub const ICMP_TYPE_SOURCE_QUENCH: u8 = 4;
pub const ICMP_TYPE_REDIRECT: u8 = 5;
pub const ICMP_TYPE_ECHO_REQUEST: u8 = 8;
pub const ICMP_TYPE_TIME_EXCEEDED: u8 = 11;
pub const ICMP_TYPE_PARAM_PROBLEM: u8 = 12;

pub const CODE_NET_UNREACHABLE: u8 = 0;
pub const CODE_HOST_UNREACHABLE: u8 = 1;
pub const CODE_PROTO_UNREACHABLE: u8 = 2;
pub const CODE_PORT_UNREACHABLE: u8 = 3;
pub const CODE_FRAG_NEEDED: u8 = 4;

pub const CODE_TTL_EXCEEDED: u8 = 0;
pub const CODE_REASSEMBLY_TIMEOUT: u8 = 1;

/// Fixed 8-byte ICMP header: type, code, checksum, then a 4-byte field whose
/// meaning depends on the message type (id/seq for echo, unused for errors).
pub const ICMP_HEADER_LEN: usize = 8;

/// Bytes of the offending datagram's L4 payload quoted in error messages.
const QUOTE_LEN: usize = 8;

const MAX_OUTSTANDING_PINGS: usize = 16;

#[derive(Clone, Copy)]
struct PingEntry {
    id: u16,
    seq: u16,
    dest: Ipv4Addr,
    sent_tick: u64,
    rtt_ticks: Option<u64>,
}

struct PingTable {
    slots: [Option<PingEntry>; MAX_OUTSTANDING_PINGS],
}

impl PingTable {
    const fn new() -> Self {
        Self {
            slots: [None; MAX_OUTSTANDING_PINGS],
        }
    }

    fn insert(&mut self, id: u16, seq: u16, dest: Ipv4Addr, sent_tick: u64) -> Result<(), NetError> {
        for slot in &mut self.slots {
            if slot.is_none() {
                *slot = Some(PingEntry {
                    id,
                    seq,
                    dest,
                    sent_tick,
                    rtt_ticks: None,
                });
                return Ok(());
            }
        }
        Err(NetError::NoBufferSpace)
    }

    /// Mark the outstanding entry matching `(id, seq, src)` complete, recording
    /// the round-trip time. Returns `true` if a match was found.
    fn complete(&mut self, id: u16, seq: u16, src: Ipv4Addr, now_tick: u64) -> bool {
        for slot in &mut self.slots {
            if let Some(entry) = slot
                && entry.id == id
                && entry.seq == seq
                && entry.dest == src
                && entry.rtt_ticks.is_none()
            {
                entry.rtt_ticks = Some(now_tick.saturating_sub(entry.sent_tick));
                return true;
            }
        }
        false
    }

    /// Remove and return the RTT (in 10ms ticks) of a completed ping.
    /// Returns `None` if the entry is unknown or still outstanding.
    fn poll(&mut self, id: u16, seq: u16, dest: Ipv4Addr) -> Option<u64> {
        for slot in &mut self.slots {
            if let Some(entry) = slot
                && entry.id == id
                && entry.seq == seq
                && entry.dest == dest
            {
                if let Some(rtt) = entry.rtt_ticks {
                    *slot = None;
                    return Some(rtt);
                }
                return None;
            }
        }
        None
    }
}

static PING_TABLE: IrqMutex<PingTable> = IrqMutex::new(PingTable::new());

/// Handle an incoming ICMP message. Called from [`super::ipv4::handle_rx`]
/// after IP header validation and L4 offset setup.
pub fn handle_rx(dev: DevIndex, src_ip: [u8; 4], dst_ip: [u8; 4], data: &[u8]) {
    if data.len() < ICMP_HEADER_LEN {
        klog_debug!(
            "icmp: message too short ({} < {})",
            data.len(),
            ICMP_HEADER_LEN
        );
        return;
    }

    let icmp_type = data[0];
    let code = data[1];

    match icmp_type {
        ICMP_TYPE_ECHO_REQUEST => handle_echo_request(dev, src_ip, dst_ip, data),
        ICMP_TYPE_ECHO_REPLY => handle_echo_reply(src_ip, data),
        ICMP_TYPE_DEST_UNREACHABLE | ICMP_TYPE_TIME_EXCEEDED | ICMP_TYPE_PARAM_PROBLEM => {
            klog_debug!(
                "icmp: type={} code={} from {} — error report noted, no action taken",
                icmp_type,
                code,
                Ipv4Addr(src_ip)
            );
        }
        ICMP_TYPE_SOURCE_QUENCH | ICMP_TYPE_REDIRECT => {
            klog_debug!(
                "icmp: type={} from {} accepted, no-op",
                icmp_type,
                Ipv4Addr(src_ip)
            );
        }
        other => {
            klog_debug!("icmp: unhandled type {} from {}", other, Ipv4Addr(src_ip));
        }
    }
}

fn handle_echo_request(dev: DevIndex, src_ip: [u8; 4], dst_ip: [u8; 4], data: &[u8]) {
    let _ = dst_ip;
    let Some(local_ip) = NET_STACK.our_ip(dev) else {
        klog_debug!("icmp: echo request on unconfigured dev {}", dev);
        return;
    };

    if let Err(e) = send_echo_reply(local_ip, Ipv4Addr(src_ip), data) {
        klog_debug!("icmp: echo reply to {} failed: {}", Ipv4Addr(src_ip), e);
    }
}

fn handle_echo_reply(src_ip: [u8; 4], data: &[u8]) {
    let id = u16::from_be_bytes([data[4], data[5]]);
    let seq = u16::from_be_bytes([data[6], data[7]]);
    let now_tick = slopos_lib::kernel_services::platform::timer_ticks();

    if PING_TABLE
        .lock()
        .complete(id, seq, Ipv4Addr(src_ip), now_tick)
    {
        klog_debug!(
            "icmp: echo reply from {} id={} seq={}",
            Ipv4Addr(src_ip),
            id,
            seq
        );
    } else {
        klog_debug!(
            "icmp: unmatched echo reply from {} id={} seq={}",
            Ipv4Addr(src_ip),
            id,
            seq
        );
    }
}

/// Send an echo request and record it in the outstanding-ping table.  Use
/// [`poll_echo_result`] to retrieve the round-trip time once a reply lands.
pub fn send_echo_request(
    local_ip: Ipv4Addr,
    dst_ip: Ipv4Addr,
    id: u16,
    seq: u16,
    payload: &[u8],
) -> Result<(), NetError> {
    let now_tick = slopos_lib::kernel_services::platform::timer_ticks();
    PING_TABLE.lock().insert(id, seq, dst_ip, now_tick)?;

    let mut pkt = PacketBuf::alloc().ok_or(NetError::NoBufferSpace)?;
    pkt.append(payload)?;
    {
        let hdr = pkt.push_header(ICMP_HEADER_LEN)?;
        hdr[0] = ICMP_TYPE_ECHO_REQUEST;
        hdr[1] = 0;
        hdr[2..4].copy_from_slice(&0u16.to_be_bytes());
        hdr[4..6].copy_from_slice(&id.to_be_bytes());
        hdr[6..8].copy_from_slice(&seq.to_be_bytes());
    }

    send_icmp_packet(local_ip, dst_ip, pkt)
}

/// Round-trip time in 10ms ticks for a completed ping, or `None` if the
/// reply hasn't arrived (or the id/seq/dest is unknown).
pub fn poll_echo_result(id: u16, seq: u16, dest: Ipv4Addr) -> Option<u64> {
    PING_TABLE.lock().poll(id, seq, dest)
}

/// Build and transmit an echo reply carrying the same id/seq/payload as the
/// request (RFC 792 §3 — echo data is reflected unchanged).
fn send_echo_reply(local_ip: Ipv4Addr, dst_ip: Ipv4Addr, echo_request: &[u8]) -> Result<(), NetError> {
    let mut pkt = PacketBuf::alloc().ok_or(NetError::NoBufferSpace)?;
    pkt.append(&echo_request[ICMP_HEADER_LEN..])?;
    {
        let hdr = pkt.push_header(ICMP_HEADER_LEN)?;
        hdr[0] = ICMP_TYPE_ECHO_REPLY;
        hdr[1] = 0;
        hdr[2..4].copy_from_slice(&0u16.to_be_bytes());
        hdr[4..8].copy_from_slice(&echo_request[4..8]);
    }

    send_icmp_packet(local_ip, dst_ip, pkt)
}

/// Build and transmit an ICMP error message quoting the offending datagram.
///
/// `ip_header` is the original IPv4 header (including options, if any) of
/// the datagram that triggered the error; `l4_prefix` is up to the first 8
/// bytes of its L4 payload. Suppressed for ICMP-on-ICMP (never report an
/// error about an error) and toward broadcast/multicast destinations.
pub fn send_error(
    dev: DevIndex,
    icmp_type: u8,
    code: u8,
    dst_ip: Ipv4Addr,
    offending_protocol: u8,
    ip_header: &[u8],
    l4_prefix: &[u8],
) -> Result<(), NetError> {
    if offending_protocol == IpProtocol::Icmp.as_u8() {
        return Ok(());
    }
    if dst_ip.is_broadcast() || dst_ip.is_multicast() {
        return Ok(());
    }

    let local_ip = NET_STACK.our_ip(dev).ok_or(NetError::NetworkUnreachable)?;
    let quote_len = l4_prefix.len().min(QUOTE_LEN);

    let mut pkt = PacketBuf::alloc().ok_or(NetError::NoBufferSpace)?;
    pkt.append(ip_header)?;
    pkt.append(&l4_prefix[..quote_len])?;
    {
        let hdr = pkt.push_header(ICMP_HEADER_LEN)?;
        hdr[0] = icmp_type;
        hdr[1] = code;
        hdr[2..4].copy_from_slice(&0u16.to_be_bytes());
        hdr[4..8].copy_from_slice(&0u32.to_be_bytes());
    }

    send_icmp_packet(local_ip, dst_ip, pkt)
}

/// Wrap an ICMP message (header already pushed) in IP and Ethernet headers
/// and hand it to route-aware egress. Mirrors the TX-build pattern used by
/// `udp::udp_sendto` and `socket::socket_send_tcp_segment`.
fn send_icmp_packet(local_ip: Ipv4Addr, dst_ip: Ipv4Addr, mut pkt: PacketBuf) -> Result<(), NetError> {
    let icmp_len = pkt.len() as u16;
    let total_len = super::IPV4_HEADER_LEN as u16 + icmp_len;
    {
        let ip_hdr = pkt.push_header(super::IPV4_HEADER_LEN)?;
        ip_hdr[0] = 0x45;
        ip_hdr[1] = 0;
        ip_hdr[2..4].copy_from_slice(&total_len.to_be_bytes());
        ip_hdr[4..6].copy_from_slice(&0u16.to_be_bytes());
        ip_hdr[6..8].copy_from_slice(&0u16.to_be_bytes());
        ip_hdr[8] = 64;
        ip_hdr[9] = super::IPPROTO_ICMP;
        ip_hdr[10..12].copy_from_slice(&0u16.to_be_bytes());
        ip_hdr[12..16].copy_from_slice(local_ip.as_bytes());
        ip_hdr[16..20].copy_from_slice(dst_ip.as_bytes());
        let checksum = super::ipv4_header_checksum(ip_hdr);
        ip_hdr[10..12].copy_from_slice(&checksum.to_be_bytes());
    }
    {
        let eth_hdr = pkt.push_header(super::ETH_HEADER_LEN)?;
        eth_hdr[0..6].copy_from_slice(&super::ETH_BROADCAST);
        eth_hdr[6..12].copy_from_slice(&crate::virtio_net::virtio_net_mac().unwrap_or([0; 6]));
        eth_hdr[12..14].copy_from_slice(&super::ETHERTYPE_IPV4.to_be_bytes());
    }

    let head = pkt.head();
    pkt.set_l2(head);
    pkt.set_l3(head + super::ETH_HEADER_LEN as u16);
    pkt.set_l4(head + (super::ETH_HEADER_LEN + super::IPV4_HEADER_LEN) as u16);

    let icmp_checksum = pkt.compute_icmp_checksum();
    let icmp_start = super::ETH_HEADER_LEN + super::IPV4_HEADER_LEN;
    let frame = pkt.payload_mut();
    frame[icmp_start + 2..icmp_start + 4].copy_from_slice(&icmp_checksum.to_be_bytes());

    super::ipv4::send(dst_ip, pkt)
}
