//! IPv4 ingress and egress handlers.
//!
//! # Ingress (Phase 1D)
//!
//! [`handle_rx`] is the single entry point for all received IPv4 packets after
//! Ethernet demux.  It validates the IP header (version, length, checksum, TTL),
//! sets the L4 layer offset on the [`PacketBuf`], and dispatches to the
//! appropriate protocol handler (TCP, UDP, ICMP).
//!
//! # Egress (Phase 3B)
//!
//! [`send`] is the route-aware egress entry point.  It performs a routing table
//! lookup to determine the outgoing device and next hop, then either transmits
//! directly (broadcast/multicast/loopback) or delegates to the neighbor cache
//! for ARP resolution.
//!
//! [`send_via`] is the lower-level egress path for callers that already have a
//! [`DeviceHandle`] and know the next hop (e.g., timer-driven retransmits).
//!
//! # Scope
//!
//! - Full IPv4 header validation
//! - Destination filtering: local, broadcast, or multicast only (no forwarding)
//! - Protocol dispatch to TCP/UDP/ICMP handlers
//! - DNS response interception for the in-kernel resolver
//! - ICMP protocol/port-unreachable generation for undeliverable datagrams

extern crate alloc;

use slopos_lib::klog_debug;

use super::netstack::NET_STACK;
use super::socket;
use super::tcp;
use super::types::{DevIndex, IpProtocol, Ipv4Addr};
use crate::net::{self as net, NetError, packetbuf::PacketBuf};

/// Snapshot of an incoming datagram's IP header and the first 8 bytes of its
/// L4 payload, captured before the IP header is pulled off the buffer. Used
/// to quote the offending datagram in ICMP error messages (RFC 792).
struct OffendingDatagram {
    ip_header: [u8; 60],
    ip_header_len: usize,
    quote: [u8; 8],
    quote_len: usize,
}

/// Handle an incoming IPv4 packet.
///
/// Called from [`super::ingress::net_rx`] after Ethernet demux.  The packet's
/// `head` points at the first byte of the IP header (Ethernet header has been
/// consumed via [`PacketBuf::pull_header`]).
///
/// # Validation
///
/// 1. IP version must be 4
/// 2. IHL ≥ 5 (header length ≥ 20 bytes)
/// 3. Total length ≤ packet size
/// 4. Header checksum must verify (unless device has `CHECKSUM_RX`)
/// 5. TTL > 0 (we don't forward, so TTL=0 is always dropped)
///
/// Packets failing any check are silently dropped with a debug log.
pub fn handle_rx(dev: DevIndex, mut pkt: PacketBuf, checksum_rx: bool) {
    // Extract all fields we need while borrowing the payload immutably.
    // We must drop this borrow before calling pkt.set_l4() / pkt.pull_header().
    let (proto, src_ip, dst_ip, ihl, id, frag_offset, more_fragments, offending) = {
        let ip_data = pkt.payload();
        if ip_data.len() < net::IPV4_HEADER_LEN {
            klog_debug!(
                "ipv4: packet too short ({} < {})",
                ip_data.len(),
                net::IPV4_HEADER_LEN
            );
            return;
        }

        // Version must be 4.
        let version = (ip_data[0] >> 4) & 0x0F;
        if version != 4 {
            klog_debug!("ipv4: bad version {}", version);
            return;
        }

        // Internet Header Length (in 32-bit words).
        let ihl = ((ip_data[0] & 0x0F) as usize) * 4;
        if ihl < net::IPV4_HEADER_LEN || ip_data.len() < ihl {
            klog_debug!("ipv4: bad IHL {} (packet len {})", ihl, ip_data.len());
            return;
        }

        // Total length sanity check.
        let total_len = u16::from_be_bytes([ip_data[2], ip_data[3]]) as usize;
        if total_len > ip_data.len() {
            klog_debug!(
                "ipv4: total_len {} > packet len {}",
                total_len,
                ip_data.len()
            );
            return;
        }

        // Header checksum verification (skip if device already verified).
        if !checksum_rx && net::ipv4_header_checksum(&ip_data[..ihl]) != 0 {
            klog_debug!("ipv4: bad header checksum");
            return;
        }

        // TTL check — we don't forward, so TTL=0 is always invalid.
        let ttl = ip_data[8];
        if ttl == 0 {
            klog_debug!("ipv4: TTL=0, dropping");
            return;
        }

        let proto = ip_data[9];
        let src_ip: [u8; 4] = ip_data[12..16].try_into().unwrap_or([0; 4]);
        let dst_ip: [u8; 4] = ip_data[16..20].try_into().unwrap_or([0; 4]);

        let id = u16::from_be_bytes([ip_data[4], ip_data[5]]);
        let flags_and_offset = u16::from_be_bytes([ip_data[6], ip_data[7]]);
        let more_fragments = (flags_and_offset & 0x2000) != 0;
        let frag_offset = ((flags_and_offset & 0x1FFF) as usize) * 8;

        let mut ip_header = [0u8; 60];
        let ip_header_len = ihl.min(ip_header.len());
        ip_header[..ip_header_len].copy_from_slice(&ip_data[..ip_header_len]);

        let mut quote = [0u8; 8];
        let quote_len = ip_data.len().saturating_sub(ihl).min(quote.len());
        quote[..quote_len].copy_from_slice(&ip_data[ihl..ihl + quote_len]);

        let offending = OffendingDatagram {
            ip_header,
            ip_header_len,
            quote,
            quote_len,
        };

        (
            proto,
            src_ip,
            dst_ip,
            ihl,
            id,
            frag_offset,
            more_fragments,
            offending,
        )
    };
    // Immutable borrow of pkt dropped here.

    // Destination filtering: we don't forward, so only accept traffic
    // addressed to one of our interfaces, or to broadcast/multicast.
    let dst = Ipv4Addr(dst_ip);
    if !NET_STACK.is_our_addr(dst) && !dst.is_broadcast() && !dst.is_multicast() {
        klog_debug!("ipv4: {} not local, dropping (no forwarding)", dst);
        return;
    }

    // Set L4 offset (absolute position: current head + IHL).
    pkt.set_l4(pkt.head() + ihl as u16);

    // Pull the IP header so payload() now points at this fragment's data.
    if pkt.pull_header(ihl).is_err() {
        return;
    }

    // Fragmented datagrams (MF set, or a nonzero fragment offset) go through
    // reassembly first; the reassembled bytes replace this fragment's own
    // payload before protocol dispatch. Unfragmented datagrams (the common
    // case) skip the reassembly table entirely.
    let reassembled;
    let l4_data: &[u8] = if more_fragments || frag_offset != 0 {
        let key = super::reassembly::FragmentKey {
            id,
            saddr: Ipv4Addr(src_ip),
            daddr: Ipv4Addr(dst_ip),
            protocol: proto,
        };
        match super::reassembly::insert(key, frag_offset, more_fragments, pkt.payload()) {
            Some(body) => {
                reassembled = body;
                &reassembled
            }
            None => return,
        }
    } else {
        pkt.payload()
    };

    // Dispatch to L4 protocol handler.
    match IpProtocol::from_u8(proto) {
        Some(IpProtocol::Tcp) => dispatch_tcp(src_ip, dst_ip, l4_data),
        Some(IpProtocol::Udp) => dispatch_udp(dev, src_ip, dst_ip, l4_data, &offending),
        Some(IpProtocol::Icmp) => {
            super::icmp::handle_rx(dev, src_ip, dst_ip, l4_data);
        }
        None => {
            klog_debug!("ipv4: unknown protocol {}, dropping", proto);
            let _ = super::icmp::send_error(
                dev,
                super::icmp::ICMP_TYPE_DEST_UNREACHABLE,
                super::icmp::CODE_PROTO_UNREACHABLE,
                Ipv4Addr(src_ip),
                proto,
                &offending.ip_header[..offending.ip_header_len],
                &offending.quote[..offending.quote_len],
            );
        }
    }
}

// =============================================================================
// L4 dispatch helpers
// =============================================================================

/// Dispatch a TCP segment to the TCP state machine and socket layer.
///
/// Mirrors the logic previously in `dispatch_rx_frame()` in `virtio_net.rs`.
fn dispatch_tcp(src_ip: [u8; 4], dst_ip: [u8; 4], ip_payload: &[u8]) {
    let Some(hdr) = tcp::parse_header(ip_payload) else {
        return;
    };
    let hdr_len = hdr.header_len();
    if hdr_len < tcp::TCP_HEADER_LEN || ip_payload.len() < hdr_len {
        return;
    }
    let options = &ip_payload[tcp::TCP_HEADER_LEN..hdr_len];
    let payload = &ip_payload[hdr_len..];
    let now_ms = slopos_lib::clock::uptime_ms();

    let result = tcp::tcp_input(src_ip, dst_ip, &hdr, options, payload, now_ms);

    if let Some(seg) = result.response {
        let _ = socket::socket_send_tcp_segment(&seg, &[]);
    }
    socket::socket_notify_tcp_activity(&result);
}

/// Dispatch a UDP datagram to the socket layer, with DNS interception.
///
/// Mirrors the logic previously in `dispatch_rx_frame()` in `virtio_net.rs`.
/// Generates an ICMP port-unreachable if no socket is bound to the
/// destination, unless the datagram was itself broadcast or multicast.
fn dispatch_udp(
    dev: DevIndex,
    src_ip: [u8; 4],
    dst_ip: [u8; 4],
    data: &[u8],
    offending: &OffendingDatagram,
) {
    let delivered = super::udp::handle_rx(src_ip, dst_ip, data);
    if !delivered {
        let dst = Ipv4Addr(dst_ip);
        if !dst.is_broadcast() && !dst.is_multicast() {
            let _ = super::icmp::send_error(
                dev,
                super::icmp::ICMP_TYPE_DEST_UNREACHABLE,
                super::icmp::CODE_PORT_UNREACHABLE,
                Ipv4Addr(src_ip),
                net::IPPROTO_UDP,
                &offending.ip_header[..offending.ip_header_len],
                &offending.quote[..offending.quote_len],
            );
        }
    }
}

// =============================================================================
// Phase 3B — Route-aware IPv4 egress
// =============================================================================

/// Route-aware IPv4 send.
///
/// Performs a routing table lookup to determine the outgoing device and next
/// hop, selects the source IP from the outgoing interface, then sends through
/// the neighbor cache (or directly for loopback/broadcast/multicast).
///
/// This is the primary egress entry point for the socket layer (Phase 4+).
/// For callers that already hold a [`DeviceHandle`], use [`send_via`] instead.
pub fn send(dst_ip: super::types::Ipv4Addr, pkt: PacketBuf) -> Result<(), NetError> {
    use super::netdev::DEVICE_REGISTRY;
    use super::route::ROUTE_TABLE;

    let (dev, next_hop) = ROUTE_TABLE.lookup(dst_ip).ok_or_else(|| {
        klog_debug!("ipv4::send: no route to {}", dst_ip);
        NetError::NetworkUnreachable
    })?;

    let mtu = DEVICE_REGISTRY.mtu_by_index(dev).unwrap_or(1500);
    let fragments = fragment_if_needed(mtu, pkt)?;

    for frag in fragments {
        // Loopback: skip neighbor resolution entirely — no ARP on lo.
        if next_hop.is_loopback() || dst_ip.is_loopback() {
            DEVICE_REGISTRY.tx_by_index(dev, frag)?;
            continue;
        }

        // Broadcast/multicast: skip neighbor resolution, TX directly.
        if dst_ip.is_broadcast() || dst_ip.is_multicast() {
            DEVICE_REGISTRY.tx_by_index(dev, frag)?;
            continue;
        }

        // Unicast on a physical device: neighbor cache resolution.
        send_on_device(dev, next_hop, frag)?;
    }

    Ok(())
}

/// Split an outgoing IPv4 packet into MTU-sized fragments when its IP
/// datagram exceeds `mtu`. `pkt` must already carry the Ethernet + IP
/// headers with `l2`/`l3` offsets set, the TX-build convention shared by
/// `udp::udp_sendto`, `socket::socket_send_tcp_segment`, and `icmp`'s senders.
///
/// Per-fragment chunk size is `(mtu - header_len)` rounded down to a
/// multiple of 8, as required by the 3-bit-aligned fragment-offset field.
/// Returns the original packet unsplit when no fragmentation is needed, and
/// `Err(InvalidArgument)` if the datagram is oversized but carries the
/// don't-fragment flag.
fn fragment_if_needed(mtu: u32, pkt: PacketBuf) -> Result<alloc::vec::Vec<PacketBuf>, NetError> {
    use alloc::vec::Vec;

    let head = pkt.head();
    let l3_rel = pkt.l3_offset().saturating_sub(head) as usize;
    let frame = pkt.payload();
    let ip_total_len = frame.len().saturating_sub(l3_rel);

    if ip_total_len <= mtu as usize || frame.len() < l3_rel + net::IPV4_HEADER_LEN {
        return Ok({
            let mut v = Vec::new();
            v.push(pkt);
            v
        });
    }

    let header_len = ((frame[l3_rel] & 0x0F) as usize) * 4;
    if header_len < net::IPV4_HEADER_LEN || l3_rel + header_len > frame.len() {
        let mut v = Vec::new();
        v.push(pkt);
        return Ok(v);
    }

    let dont_fragment = (frame[l3_rel + 6] & 0x40) != 0;
    if dont_fragment {
        klog_debug!(
            "ipv4::send: datagram ({} bytes) exceeds mtu {} but DF set, dropping",
            ip_total_len,
            mtu
        );
        return Err(NetError::InvalidArgument);
    }

    let eth_header: Vec<u8> = frame[..l3_rel].to_vec();
    let mut ip_header = [0u8; 60];
    ip_header[..header_len].copy_from_slice(&frame[l3_rel..l3_rel + header_len]);
    let id = u16::from_be_bytes([ip_header[4], ip_header[5]]);
    let body: Vec<u8> = frame[l3_rel + header_len..].to_vec();
    drop(pkt);

    let chunk = (mtu as usize).saturating_sub(header_len) / 8 * 8;
    if chunk == 0 {
        return Err(NetError::InvalidArgument);
    }

    let mut fragments = Vec::new();
    let mut offset = 0usize;
    while offset < body.len() {
        let end = (offset + chunk).min(body.len());
        let more = end < body.len();

        let mut frag = PacketBuf::alloc().ok_or(NetError::NoBufferSpace)?;
        frag.append(&body[offset..end])?;
        {
            let hdr = frag.push_header(header_len)?;
            hdr.copy_from_slice(&ip_header[..header_len]);
            let frag_total = (header_len + (end - offset)) as u16;
            hdr[2..4].copy_from_slice(&frag_total.to_be_bytes());
            let frag_off_units = (offset / 8) as u16;
            let flags_and_offset = (frag_off_units & 0x1FFF) | if more { 0x2000 } else { 0 };
            hdr[6..8].copy_from_slice(&flags_and_offset.to_be_bytes());
            hdr[10..12].copy_from_slice(&0u16.to_be_bytes());
            let checksum = net::ipv4_header_checksum(hdr);
            hdr[10..12].copy_from_slice(&checksum.to_be_bytes());
        }
        {
            let eth_hdr = frag.push_header(eth_header.len())?;
            eth_hdr.copy_from_slice(&eth_header);
        }

        let fh = frag.head();
        frag.set_l2(fh);
        frag.set_l3(fh + eth_header.len() as u16);
        fragments.push(frag);

        offset = end;
    }

    klog_debug!(
        "ipv4::send: fragmented id={} ({} bytes) into {} fragments (mtu={}, chunk={})",
        id,
        ip_total_len,
        fragments.len(),
        mtu,
        chunk
    );

    Ok(fragments)
}

/// Send an IPv4 packet through a specific device via neighbor cache.
///
/// This is the handle-based egress path from Phase 2C.3, preserved for callers
/// that already have a [`DeviceHandle`] (e.g., timer-driven ARP retransmit).
/// For route-aware sending, prefer [`send`].
pub fn send_via(
    handle: &super::netdev::DeviceHandle,
    dst_ip: super::types::Ipv4Addr,
    pkt: PacketBuf,
) -> Result<(), NetError> {
    use super::arp;
    use super::neighbor::{NEIGHBOR_CACHE, ResolveOutcome};

    let dev = handle.index();
    let next_hop = dst_ip;

    // Broadcast/multicast: skip neighbor resolution, TX directly.
    if dst_ip.is_broadcast() || dst_ip.is_multicast() {
        if let Err(e) = handle.tx(pkt) {
            klog_debug!("ipv4::send_via: broadcast tx failed: {}", e);
            return Err(e);
        }
        return Ok(());
    }

    match NEIGHBOR_CACHE.resolve(dev, next_hop, pkt) {
        ResolveOutcome::Resolved {
            mac,
            mut pkt,
            action,
        } => {
            arp::set_dst_mac_in_eth_header(&mut pkt, mac);
            if let Some(act) = action {
                arp::execute_neighbor_action(handle, act);
            }
            if let Err(e) = handle.tx(pkt) {
                klog_debug!("ipv4::send_via: tx failed: {}", e);
                return Err(e);
            }
            Ok(())
        }
        ResolveOutcome::Queued => Ok(()),
        ResolveOutcome::ArpNeeded(action) => {
            arp::execute_neighbor_action(handle, action);
            Ok(())
        }
        ResolveOutcome::Failed(e) => {
            klog_debug!(
                "ipv4::send_via: neighbor resolution failed for {}: {}",
                dst_ip,
                e
            );
            Err(e)
        }
    }
}

/// Internal: send a unicast packet on a specific device via neighbor cache.
///
/// Uses `DEVICE_REGISTRY` for TX (takes registry lock briefly).  This is the
/// code path used by the route-aware [`send`] function for non-loopback,
/// non-broadcast unicast traffic.
fn send_on_device(
    dev: DevIndex,
    next_hop: super::types::Ipv4Addr,
    pkt: PacketBuf,
) -> Result<(), NetError> {
    use super::arp;
    use super::neighbor::{NEIGHBOR_CACHE, ResolveOutcome};
    use super::netdev::DEVICE_REGISTRY;

    match NEIGHBOR_CACHE.resolve(dev, next_hop, pkt) {
        ResolveOutcome::Resolved {
            mac,
            mut pkt,
            action,
        } => {
            arp::set_dst_mac_in_eth_header(&mut pkt, mac);
            if let Some(act) = action {
                execute_neighbor_action_via_registry(dev, act);
            }
            DEVICE_REGISTRY.tx_by_index(dev, pkt)
        }
        ResolveOutcome::Queued => Ok(()),
        ResolveOutcome::ArpNeeded(action) => {
            execute_neighbor_action_via_registry(dev, action);
            Ok(())
        }
        ResolveOutcome::Failed(e) => {
            klog_debug!(
                "ipv4::send: neighbor resolution failed for {}: {}",
                next_hop,
                e
            );
            Err(e)
        }
    }
}

/// Execute a neighbor action (ARP request, flush pending) via the device
/// registry, without requiring a [`DeviceHandle`].
fn execute_neighbor_action_via_registry(_dev: DevIndex, action: super::neighbor::NeighborAction) {
    use super::arp;
    use super::netdev::DEVICE_REGISTRY;

    match action {
        super::neighbor::NeighborAction::SendArpRequest { dev, target_ip } => {
            // Build and send ARP request via registry.
            arp::send_request_via_registry(dev, target_ip);
        }
        super::neighbor::NeighborAction::FlushPending {
            packets,
            dst_mac,
            dev,
        } => {
            for mut pkt in packets {
                arp::set_dst_mac_in_eth_header(&mut pkt, dst_mac);
                let _ = DEVICE_REGISTRY.tx_by_index(dev, pkt);
            }
        }
        super::neighbor::NeighborAction::TransmitPacket { pkt } => {
            // Single packet TX — use default device (dev 1 = VirtIO).
            let _ = DEVICE_REGISTRY.tx_by_index(DevIndex(1), pkt);
        }
        super::neighbor::NeighborAction::None => {}
    }
}
