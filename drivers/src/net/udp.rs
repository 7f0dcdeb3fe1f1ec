use slopos_abi::net::MAX_SOCKETS;
use slopos_lib::{IrqMutex, klog_debug};

use super::packetbuf::{HEADROOM, PacketBuf};
use super::types::{Ipv4Addr, NetError, PacketPriority, Port};

/// Largest UDP payload a datagram may carry (65,535 - 8 byte UDP header - the
/// smallest possible IP header already accounted for by the caller).
pub const UDP_MAX_PAYLOAD: usize = 65_507;

#[derive(Clone, Copy)]
struct UdpDemuxEntry {
    local_ip: Ipv4Addr,
    local_port: Port,
    sock_idx: u32,
    reuse_port: bool,
    remote_ip: Option<Ipv4Addr>,
    remote_port: Option<Port>,
}

pub struct UdpDemuxTable {
    entries: [Option<UdpDemuxEntry>; MAX_SOCKETS],
}

impl UdpDemuxTable {
    pub const fn new() -> Self {
        Self {
            entries: [None; MAX_SOCKETS],
        }
    }

    /// Bind-collision rules: two sockets may share a (ip, port) only if both
    /// set ReusePort, or the addresses differ, or the existing socket has a
    /// wildcard local ip and the new bind sets ReuseAddr.
    pub fn register(
        &mut self,
        local_ip: Ipv4Addr,
        local_port: Port,
        sock_idx: u32,
        reuse_addr: bool,
        reuse_port: bool,
    ) -> Result<(), NetError> {
        for entry in self.entries.iter().flatten() {
            if entry.local_ip != local_ip || entry.local_port != local_port {
                continue;
            }
            let both_reuse_port = reuse_port && entry.reuse_port;
            let wildcard_reuse_addr = entry.local_ip == Ipv4Addr::UNSPECIFIED && reuse_addr;
            if !both_reuse_port && !wildcard_reuse_addr {
                return Err(NetError::AddressInUse);
            }
        }

        for slot in &mut self.entries {
            if slot.is_none() {
                *slot = Some(UdpDemuxEntry {
                    local_ip,
                    local_port,
                    sock_idx,
                    reuse_port,
                    remote_ip: None,
                    remote_port: None,
                });
                return Ok(());
            }
        }

        Err(NetError::NoBufferSpace)
    }

    pub fn unregister(&mut self, local_ip: Ipv4Addr, local_port: Port, sock_idx: u32) {
        for slot in &mut self.entries {
            if let Some(entry) = slot
                && entry.local_ip == local_ip
                && entry.local_port == local_port
                && entry.sock_idx == sock_idx
            {
                *slot = None;
            }
        }
    }

    /// Record the peer a bound socket has `connect()`-ed to, so RX lookup can
    /// prefer it over a wildcard or unconnected bind. A connected entry only
    /// ever matches datagrams from that exact peer.
    pub fn set_peer(
        &mut self,
        local_ip: Ipv4Addr,
        local_port: Port,
        sock_idx: u32,
        remote_ip: Option<Ipv4Addr>,
        remote_port: Option<Port>,
    ) {
        for slot in &mut self.entries {
            if let Some(entry) = slot
                && entry.local_ip == local_ip
                && entry.local_port == local_port
                && entry.sock_idx == sock_idx
            {
                entry.remote_ip = remote_ip;
                entry.remote_port = remote_port;
                return;
            }
        }
    }

    /// Most specific match wins: exact local ip beats wildcard, and a
    /// connected entry only matches its own peer (never a stranger), so it
    /// outranks an unconnected wildcard bind on the same port.
    pub fn lookup(&self, src_ip: Ipv4Addr, src_port: Port, dst_ip: Ipv4Addr, dst_port: Port) -> Option<u32> {
        for entry in self.entries.iter().flatten() {
            if entry.remote_ip == Some(src_ip)
                && entry.remote_port == Some(src_port)
                && entry.local_ip == dst_ip
                && entry.local_port == dst_port
            {
                return Some(entry.sock_idx);
            }
        }

        for entry in self.entries.iter().flatten() {
            if entry.remote_ip == Some(src_ip)
                && entry.remote_port == Some(src_port)
                && entry.local_ip == Ipv4Addr::UNSPECIFIED
                && entry.local_port == dst_port
            {
                return Some(entry.sock_idx);
            }
        }

        for entry in self.entries.iter().flatten() {
            if entry.remote_ip.is_none() && entry.local_ip == dst_ip && entry.local_port == dst_port {
                return Some(entry.sock_idx);
            }
        }

        for entry in self.entries.iter().flatten() {
            if entry.remote_ip.is_none()
                && entry.local_ip == Ipv4Addr::UNSPECIFIED
                && entry.local_port == dst_port
            {
                return Some(entry.sock_idx);
            }
        }

        None
    }

    pub fn clear(&mut self) {
        self.entries = [None; MAX_SOCKETS];
    }
}

pub static UDP_DEMUX: IrqMutex<UdpDemuxTable> = IrqMutex::new(UdpDemuxTable::new());

/// Demux an incoming UDP datagram to a bound socket. Returns `true` if a
/// socket matched (or the DNS resolver intercepted the reply), `false` if
/// the datagram was dropped for lack of a bound socket — the caller uses
/// this to decide whether to raise ICMP port-unreachable.
pub fn handle_rx(src_ip: [u8; 4], dst_ip: [u8; 4], data: &[u8]) -> bool {
    let Some((src_port, dst_port, udp_payload)) = super::parse_udp_header(data) else {
        return true;
    };

    if src_port == super::dns::DNS_PORT {
        crate::virtio_net::dns_intercept_response(udp_payload);
        return true;
    }

    let sock_idx = UDP_DEMUX
        .lock()
        .lookup(Ipv4Addr(src_ip), Port(src_port), Ipv4Addr(dst_ip), Port(dst_port));
    if let Some(sock_idx) = sock_idx {
        super::socket::socket_deliver_udp(sock_idx, src_ip, src_port, udp_payload);
        return true;
    }

    klog_debug!(
        "udp: drop no socket for {}.{}.{}.{}:{}",
        dst_ip[0],
        dst_ip[1],
        dst_ip[2],
        dst_ip[3],
        dst_port
    );
    false
}

pub fn udp_bind(
    sock_idx: u32,
    local_ip: Ipv4Addr,
    local_port: Port,
    reuse_addr: bool,
    reuse_port: bool,
) -> Result<(), NetError> {
    UDP_DEMUX
        .lock()
        .register(local_ip, local_port, sock_idx, reuse_addr, reuse_port)
}

pub fn udp_unbind(sock_idx: u32, local_ip: Ipv4Addr, local_port: Port) {
    UDP_DEMUX.lock().unregister(local_ip, local_port, sock_idx);
}

/// Record the remote peer a bound UDP socket has connected to (or clear it
/// on disconnect), so RX demux can give it priority over wildcard binds.
pub fn udp_set_peer(
    sock_idx: u32,
    local_ip: Ipv4Addr,
    local_port: Port,
    remote: Option<(Ipv4Addr, Port)>,
) {
    let (remote_ip, remote_port) = match remote {
        Some((ip, port)) => (Some(ip), Some(port)),
        None => (None, None),
    };
    UDP_DEMUX
        .lock()
        .set_peer(local_ip, local_port, sock_idx, remote_ip, remote_port);
}

pub fn udp_sendto(
    local_ip: [u8; 4],
    dst_ip: [u8; 4],
    local_port: u16,
    dst_port: u16,
    payload: &[u8],
) -> Result<usize, NetError> {
    if payload.len() > UDP_MAX_PAYLOAD {
        return Err(NetError::InvalidArgument);
    }

    let needed = super::ETH_HEADER_LEN + super::IPV4_HEADER_LEN + 8 + payload.len();
    let mut pkt = PacketBuf::alloc_sized(needed, HEADROOM as usize, PacketPriority::Normal)?;
    pkt.append(payload)?;

    let udp_len = (8 + payload.len()) as u16;
    {
        let udp_hdr = pkt.push_header(8)?;
        udp_hdr[0..2].copy_from_slice(&local_port.to_be_bytes());
        udp_hdr[2..4].copy_from_slice(&dst_port.to_be_bytes());
        udp_hdr[4..6].copy_from_slice(&udp_len.to_be_bytes());
        udp_hdr[6..8].copy_from_slice(&0u16.to_be_bytes());
    }

    let total_len = (super::IPV4_HEADER_LEN + udp_len as usize) as u16;
    {
        let ip_hdr = pkt.push_header(super::IPV4_HEADER_LEN)?;
        ip_hdr[0] = 0x45;
        ip_hdr[1] = 0;
        ip_hdr[2..4].copy_from_slice(&total_len.to_be_bytes());
        ip_hdr[4..6].copy_from_slice(&0u16.to_be_bytes());
        ip_hdr[6..8].copy_from_slice(&0u16.to_be_bytes());
        ip_hdr[8] = 64;
        ip_hdr[9] = super::IPPROTO_UDP;
        ip_hdr[10..12].copy_from_slice(&0u16.to_be_bytes());
        ip_hdr[12..16].copy_from_slice(&local_ip);
        ip_hdr[16..20].copy_from_slice(&dst_ip);
        let checksum = super::ipv4_header_checksum(ip_hdr);
        ip_hdr[10..12].copy_from_slice(&checksum.to_be_bytes());
    }

    {
        let eth_hdr = pkt.push_header(super::ETH_HEADER_LEN)?;
        eth_hdr[0..6].copy_from_slice(&[0xff; 6]);
        eth_hdr[6..12].copy_from_slice(&crate::virtio_net::virtio_net_mac().unwrap_or([0; 6]));
        eth_hdr[12..14].copy_from_slice(&super::ETHERTYPE_IPV4.to_be_bytes());
    }

    let head = pkt.head();
    pkt.set_l2(head);
    pkt.set_l3(head + super::ETH_HEADER_LEN as u16);
    pkt.set_l4(head + (super::ETH_HEADER_LEN + super::IPV4_HEADER_LEN) as u16);

    let udp_checksum = pkt.compute_udp_checksum(Ipv4Addr(local_ip), Ipv4Addr(dst_ip));
    let udp_start = super::ETH_HEADER_LEN + super::IPV4_HEADER_LEN;
    let frame = pkt.payload_mut();
    frame[udp_start + 6..udp_start + 8].copy_from_slice(&udp_checksum.to_be_bytes());

    super::ipv4::send(Ipv4Addr(dst_ip), pkt).map_err(|_| NetError::NetworkUnreachable)?;
    Ok(payload.len())
}
