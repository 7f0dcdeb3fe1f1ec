use slopos_abi::net::MAX_SOCKETS;
use slopos_lib::testing::TestResult;
use slopos_lib::{assert_eq_test, assert_test, fail, pass};

use super::types::{Ipv4Addr, NetError, Port};
use super::udp::UDP_DEMUX;

fn reset() {
    UDP_DEMUX.lock().clear();
}

pub fn test_udp_demux_register_lookup() -> TestResult {
    reset();

    let mut demux = UDP_DEMUX.lock();
    let rc = demux.register(Ipv4Addr([10, 0, 0, 1]), Port(5000), 3, false, false);
    assert_test!(rc.is_ok(), "register succeeds");

    assert_eq_test!(
        demux.lookup(Ipv4Addr([9, 9, 9, 9]), Port(1), Ipv4Addr([10, 0, 0, 1]), Port(5000)),
        Some(3),
        "lookup returns socket index"
    );
    assert_eq_test!(
        demux.lookup(Ipv4Addr([9, 9, 9, 9]), Port(1), Ipv4Addr([10, 0, 0, 1]), Port(5001)),
        None,
        "lookup misses wrong port"
    );

    pass!()
}

pub fn test_udp_demux_inaddr_any() -> TestResult {
    reset();

    let mut demux = UDP_DEMUX.lock();
    let rc = demux.register(Ipv4Addr::UNSPECIFIED, Port(6000), 7, false, false);
    assert_test!(rc.is_ok(), "wildcard register succeeds");

    assert_eq_test!(
        demux.lookup(Ipv4Addr([1, 1, 1, 1]), Port(1), Ipv4Addr([10, 1, 2, 3]), Port(6000)),
        Some(7),
        "wildcard match works"
    );
    assert_eq_test!(
        demux.lookup(Ipv4Addr([1, 1, 1, 1]), Port(1), Ipv4Addr([192, 168, 4, 9]), Port(6000)),
        Some(7),
        "wildcard matches any destination ip"
    );

    pass!()
}

pub fn test_udp_demux_exact_over_wildcard() -> TestResult {
    reset();

    let mut demux = UDP_DEMUX.lock();
    let rc_a = demux.register(Ipv4Addr([10, 0, 0, 1]), Port(7000), 11, false, false);
    let rc_b = demux.register(Ipv4Addr::UNSPECIFIED, Port(7000), 12, false, false);
    assert_test!(rc_a.is_ok() && rc_b.is_ok(), "both registrations succeed");

    assert_eq_test!(
        demux.lookup(Ipv4Addr([1, 1, 1, 1]), Port(1), Ipv4Addr([10, 0, 0, 1]), Port(7000)),
        Some(11),
        "exact ip wins over wildcard"
    );
    assert_eq_test!(
        demux.lookup(Ipv4Addr([1, 1, 1, 1]), Port(1), Ipv4Addr([10, 0, 0, 2]), Port(7000)),
        Some(12),
        "wildcard handles non-exact destination"
    );

    pass!()
}

pub fn test_udp_demux_reuse_addr_requires_wildcard() -> TestResult {
    reset();

    let mut demux = UDP_DEMUX.lock();
    let first = demux.register(Ipv4Addr([10, 0, 0, 1]), Port(8000), 20, false, false);
    assert_test!(first.is_ok(), "initial register succeeds");

    let exact_clash = demux.register(Ipv4Addr([10, 0, 0, 1]), Port(8000), 21, true, false);
    assert_eq_test!(
        exact_clash,
        Err(NetError::AddressInUse),
        "reuseaddr alone does not let two exact-address binds coexist"
    );

    demux.clear();
    let wildcard_first = demux.register(Ipv4Addr::UNSPECIFIED, Port(8001), 22, false, false);
    assert_test!(wildcard_first.is_ok(), "wildcard bind succeeds");

    let reuse_over_wildcard = demux.register(Ipv4Addr::UNSPECIFIED, Port(8001), 23, true, false);
    assert_test!(
        reuse_over_wildcard.is_ok(),
        "reuseaddr lets a new bind coexist with an existing wildcard bind"
    );

    pass!()
}

pub fn test_udp_demux_reuse_port() -> TestResult {
    reset();

    let mut demux = UDP_DEMUX.lock();
    let first = demux.register(Ipv4Addr([10, 0, 0, 1]), Port(8100), 24, false, true);
    assert_test!(first.is_ok(), "first reuseport bind succeeds");

    let second = demux.register(Ipv4Addr([10, 0, 0, 1]), Port(8100), 25, false, true);
    assert_test!(
        second.is_ok(),
        "two sockets with reuseport both set may share the exact address"
    );

    let third = demux.register(Ipv4Addr([10, 0, 0, 1]), Port(8100), 26, false, false);
    assert_eq_test!(
        third,
        Err(NetError::AddressInUse),
        "a non-reuseport bind cannot join a reuseport group"
    );

    pass!()
}

pub fn test_udp_demux_unregister() -> TestResult {
    reset();

    let mut demux = UDP_DEMUX.lock();
    let rc = demux.register(Ipv4Addr([10, 0, 0, 1]), Port(9000), 30, false, false);
    assert_test!(rc.is_ok(), "register succeeds");

    demux.unregister(Ipv4Addr([10, 0, 0, 1]), Port(9000), 30);
    assert_eq_test!(
        demux.lookup(Ipv4Addr([1, 1, 1, 1]), Port(1), Ipv4Addr([10, 0, 0, 1]), Port(9000)),
        None,
        "lookup is empty after unregister"
    );

    pass!()
}

pub fn test_udp_demux_clear() -> TestResult {
    reset();

    let mut demux = UDP_DEMUX.lock();
    let _ = demux.register(Ipv4Addr([10, 0, 0, 1]), Port(9100), 31, false, false);
    let _ = demux.register(Ipv4Addr([10, 0, 0, 2]), Port(9101), 32, false, false);
    let _ = demux.register(Ipv4Addr::UNSPECIFIED, Port(9102), 33, false, false);

    demux.clear();

    assert_eq_test!(
        demux.lookup(Ipv4Addr([1, 1, 1, 1]), Port(1), Ipv4Addr([10, 0, 0, 1]), Port(9100)),
        None,
        "first entry removed"
    );
    assert_eq_test!(
        demux.lookup(Ipv4Addr([1, 1, 1, 1]), Port(1), Ipv4Addr([10, 0, 0, 2]), Port(9101)),
        None,
        "second entry removed"
    );
    assert_eq_test!(
        demux.lookup(Ipv4Addr([1, 1, 1, 1]), Port(1), Ipv4Addr([8, 8, 8, 8]), Port(9102)),
        None,
        "wildcard entry removed"
    );

    pass!()
}

pub fn test_udp_demux_overflow() -> TestResult {
    reset();

    let mut demux = UDP_DEMUX.lock();
    for idx in 0..MAX_SOCKETS {
        let port = 10_000u16 + idx as u16;
        let rc = demux.register(Ipv4Addr([10, 0, 0, 1]), Port(port), idx as u32, false, false);
        if rc.is_err() {
            return fail!("register failed before table became full");
        }
    }

    let overflow = demux.register(Ipv4Addr([10, 0, 0, 1]), Port(20_000), 999, false, false);
    assert_eq_test!(
        overflow,
        Err(NetError::NoBufferSpace),
        "register fails when table is full"
    );

    pass!()
}

pub fn test_udp_demux_connected_peer_wins_over_wildcard() -> TestResult {
    reset();

    let mut demux = UDP_DEMUX.lock();
    let wildcard = demux.register(Ipv4Addr::UNSPECIFIED, Port(11_000), 40, false, false);
    assert_test!(wildcard.is_ok(), "wildcard bind succeeds");

    let connected = demux.register(Ipv4Addr::UNSPECIFIED, Port(11_000), 41, true, false);
    assert_test!(
        connected.is_ok(),
        "second wildcard bind coexists via reuseaddr"
    );
    demux.set_peer(
        Ipv4Addr::UNSPECIFIED,
        Port(11_000),
        41,
        Some(Ipv4Addr([7, 7, 7, 7])),
        Some(Port(9999)),
    );

    assert_eq_test!(
        demux.lookup(Ipv4Addr([7, 7, 7, 7]), Port(9999), Ipv4Addr([10, 0, 0, 1]), Port(11_000)),
        Some(41),
        "connected socket wins over the plain wildcard bind for its own peer"
    );
    assert_eq_test!(
        demux.lookup(Ipv4Addr([8, 8, 8, 8]), Port(1234), Ipv4Addr([10, 0, 0, 1]), Port(11_000)),
        Some(40),
        "traffic from a stranger still falls back to the unconnected wildcard bind"
    );

    pass!()
}

slopos_lib::define_test_suite!(
    udp_demux,
    [
        test_udp_demux_register_lookup,
        test_udp_demux_inaddr_any,
        test_udp_demux_exact_over_wildcard,
        test_udp_demux_reuse_addr_requires_wildcard,
        test_udp_demux_reuse_port,
        test_udp_demux_unregister,
        test_udp_demux_clear,
        test_udp_demux_overflow,
        test_udp_demux_connected_peer_wins_over_wildcard,
    ]
);
