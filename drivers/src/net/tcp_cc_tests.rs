use slopos_lib::testing::TestResult;
use slopos_lib::{assert_eq_test, assert_test, pass};

use super::tcp_cc::{CongestionAlgorithm, CongestionCaState, CongestionState, TCP_INIT_CWND};

pub fn test_initial_cwnd_is_ten_segments() -> TestResult {
    let cc = CongestionState::new(CongestionAlgorithm::Reno, 1460);
    assert_eq_test!(cc.cwnd, TCP_INIT_CWND * 1460, "initial cwnd is 10 MSS");
    assert_eq_test!(cc.ca_state, CongestionCaState::Open, "starts in Open");
    pass!()
}

pub fn test_reno_slow_start_grows_by_acked_bytes() -> TestResult {
    let mut cc = CongestionState::new(CongestionAlgorithm::Reno, 1460);
    let before = cc.cwnd;
    cc.on_ack(1460, 1460, 1, 0);
    assert_eq_test!(cc.cwnd, before + 1460, "slow start grows by full segment");
    pass!()
}

pub fn test_three_dup_acks_enter_recovery_and_halve_cwnd() -> TestResult {
    let mut cc = CongestionState::new(CongestionAlgorithm::Reno, 1460);
    cc.cwnd = 20 * 1460;
    assert_test!(!cc.on_dup_ack(1460), "1st dup-ack does not trigger recovery");
    assert_test!(!cc.on_dup_ack(1460), "2nd dup-ack does not trigger recovery");
    assert_test!(cc.on_dup_ack(1460), "3rd dup-ack triggers fast retransmit");
    assert_eq_test!(cc.ca_state, CongestionCaState::Recovery, "now in Recovery");
    assert_eq_test!(cc.ssthresh, 10 * 1460, "ssthresh halved");
    assert_eq_test!(cc.cwnd, 10 * 1460 + 3 * 1460, "cwnd = ssthresh + 3*mss");
    pass!()
}

pub fn test_rto_collapses_window_to_one_segment() -> TestResult {
    let mut cc = CongestionState::new(CongestionAlgorithm::Reno, 1460);
    cc.cwnd = 20 * 1460;
    cc.on_rto(1460);
    assert_eq_test!(cc.cwnd, 1460, "cwnd collapses to 1 segment on RTO");
    assert_eq_test!(cc.ca_state, CongestionCaState::Loss, "enters Loss");
    pass!()
}

pub fn test_newreno_stays_in_recovery_on_partial_ack() -> TestResult {
    let mut cc = CongestionState::new(CongestionAlgorithm::NewReno, 1460);
    cc.cwnd = 20 * 1460;
    cc.on_dup_ack(1460);
    cc.on_dup_ack(1460);
    cc.on_dup_ack(1460);
    cc.recover = 10_000;

    // Partial ACK: snd_una_after is still before `recover`.
    cc.on_ack(1460, 1460, 5_000, 100);
    assert_eq_test!(
        cc.ca_state,
        CongestionCaState::Recovery,
        "partial ACK stays in Recovery"
    );

    // Full ACK reaching recover: Recovery ends.
    cc.on_ack(1460, 1460, 10_000, 200);
    assert_eq_test!(cc.ca_state, CongestionCaState::Open, "recover reached, Recovery ends");
    pass!()
}

pub fn test_cubic_cwnd_never_drops_below_reno_estimate() -> TestResult {
    let mut cc = CongestionState::new(CongestionAlgorithm::Cubic, 1460);
    cc.enter_recovery(1460, None);
    let after_loss = cc.cwnd;
    cc.on_ack(1460, 1460, 1, 1000);
    assert_test!(
        cc.cwnd >= after_loss,
        "cubic window does not shrink further on ack after loss"
    );
    pass!()
}

pub fn test_bbr_sizes_cwnd_from_bdp_once_sampled() -> TestResult {
    let mut cc = CongestionState::new(CongestionAlgorithm::Bbr, 1460);
    cc.bbr_sample_rtt(50);
    cc.on_ack(1460, 1460, 1, 1);
    assert_test!(cc.cwnd > 0, "bbr cwnd is positive once rtt+bw are sampled");
    pass!()
}
