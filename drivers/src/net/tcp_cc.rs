//! Pluggable TCP congestion control.
//!
//! All four algorithms share one state block ([`CongestionState`]) so the
//! socket layer does not need to know which algorithm is active.  The active
//! algorithm is selected per-connection via [`CongestionAlgorithm`] and
//! dispatched through a single `match` rather than a vtable — the hot path
//! (one call per ACK) stays inline and allocation-free.

/// Congestion avoidance state, RFC 5681 §2 naming.
///
/// `Open` is the default numbering used here: the original `TCP_CA_*` symbol
/// set this was distilled from did not survive, so the conventional Linux
/// ordering (Open, Disorder, Recovery, Loss) is used instead.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CongestionCaState {
    /// No loss signalled since the last RTT; normal slow-start/CA.
    Open,
    /// Dup-ACKs seen but below the fast-retransmit threshold.
    Disorder,
    /// Fast retransmit/recovery in progress (3 dup-ACKs or partial ACK).
    Recovery,
    /// RTO fired; window collapsed to one segment.
    Loss,
}

/// Congestion control algorithm selector.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CongestionAlgorithm {
    Reno,
    NewReno,
    Cubic,
    Bbr,
}

/// Initial congestion window, in segments (RFC 6928 default).
pub const TCP_INIT_CWND: u32 = 10;

/// CUBIC's additive-increase/multiplicative-decrease constant.
const CUBIC_BETA_NUM: u32 = 7;
const CUBIC_BETA_DEN: u32 = 10;
/// CUBIC scaling constant `C` in 1/1024 fixed point (C = 0.4).
const CUBIC_C_Q10: u64 = 410;

/// BBR pacing-gain cycle for ProbeBW, in 1/256 fixed point.
const BBR_PACING_GAIN_CYCLE_Q8: [u32; 8] = [320, 192, 256, 256, 256, 256, 256, 256];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BbrMode {
    Startup,
    Drain,
    ProbeBw,
    ProbeRtt,
}

/// Shared congestion-control state for one TCP connection.
///
/// `cwnd` and the MSS are expressed in bytes; `ssthresh` is bytes too.
/// `dup_acks` counts consecutive duplicate ACKs since the last new ACK.
#[derive(Clone, Copy, Debug)]
pub struct CongestionState {
    pub algorithm: CongestionAlgorithm,
    pub ca_state: CongestionCaState,
    pub cwnd: u32,
    pub ssthresh: u32,
    /// `snd_nxt` at the moment Recovery was entered (RFC 6582 `recover`).
    pub recover: u32,
    pub dup_acks: u8,

    // CUBIC
    cubic_w_max: u32,
    cubic_epoch_start_ms: u64,
    cubic_origin_point: u32,

    // BBR
    bbr_mode: BbrMode,
    bbr_min_rtt_ms: u32,
    bbr_max_bw_bytes_per_ms: u32,
    bbr_round_count: u32,
    bbr_cycle_index: usize,
}

impl CongestionState {
    pub const fn new(algorithm: CongestionAlgorithm, mss: u32) -> Self {
        Self {
            algorithm,
            ca_state: CongestionCaState::Open,
            cwnd: TCP_INIT_CWND * mss,
            ssthresh: u32::MAX,
            recover: 0,
            dup_acks: 0,
            cubic_w_max: 0,
            cubic_epoch_start_ms: 0,
            cubic_origin_point: 0,
            bbr_mode: BbrMode::Startup,
            bbr_min_rtt_ms: u32::MAX,
            bbr_max_bw_bytes_per_ms: 0,
            bbr_round_count: 0,
            bbr_cycle_index: 0,
        }
    }

    fn in_slow_start(&self) -> bool {
        self.cwnd < self.ssthresh
    }

    /// A new (non-duplicate) ACK advanced `snd_una` by `acked_bytes`.
    ///
    /// `snd_nxt` is passed so NewReno can decide when Recovery ends
    /// (`snd_una >= recover`).
    pub fn on_ack(&mut self, acked_bytes: u32, mss: u32, snd_una_after: u32, now_ms: u64) {
        self.dup_acks = 0;

        if self.ca_state == CongestionCaState::Recovery {
            match self.algorithm {
                CongestionAlgorithm::Reno => {
                    // Reno exits Recovery on the first new ACK.
                    self.ca_state = CongestionCaState::Open;
                }
                CongestionAlgorithm::NewReno | CongestionAlgorithm::Cubic | CongestionAlgorithm::Bbr => {
                    if !super::tcp::seq_lt(snd_una_after, self.recover) {
                        self.ca_state = CongestionCaState::Open;
                    }
                    // else: partial ACK, stay in Recovery — caller retransmits
                    // the next unacked segment.
                    return;
                }
            }
        }

        match self.algorithm {
            CongestionAlgorithm::Reno | CongestionAlgorithm::NewReno => {
                if self.in_slow_start() {
                    self.cwnd = self.cwnd.saturating_add(acked_bytes);
                } else {
                    // Congestion avoidance: cwnd += mss*mss/cwnd per ACK.
                    let inc = ((mss as u64 * mss as u64) / self.cwnd.max(1) as u64) as u32;
                    self.cwnd = self.cwnd.saturating_add(inc.max(1));
                }
            }
            CongestionAlgorithm::Cubic => self.cubic_on_ack(mss, now_ms),
            CongestionAlgorithm::Bbr => self.bbr_on_ack(acked_bytes, now_ms),
        }
    }

    /// A duplicate ACK arrived.  Returns `true` if this triggers fast
    /// retransmit (3rd dup-ACK, entering Recovery).
    pub fn on_dup_ack(&mut self, mss: u32) -> bool {
        if self.ca_state == CongestionCaState::Recovery {
            // Already in recovery: NewReno inflates cwnd by one segment per
            // further dup-ACK (RFC 5681 §3.2 step 3.a), others hold steady.
            if matches!(self.algorithm, CongestionAlgorithm::Reno) {
                self.cwnd = self.cwnd.saturating_add(mss);
            }
            return false;
        }

        self.dup_acks = self.dup_acks.saturating_add(1);
        if self.dup_acks < 3 {
            self.ca_state = CongestionCaState::Disorder;
            return false;
        }

        self.enter_recovery(mss, None)
    }

    /// Enter Recovery (fast retransmit).  `snd_nxt` records the recovery
    /// point for NewReno's partial-ACK handling.
    pub fn enter_recovery(&mut self, mss: u32, snd_nxt: Option<u32>) -> bool {
        match self.algorithm {
            CongestionAlgorithm::Reno | CongestionAlgorithm::NewReno => {
                self.ssthresh = (self.cwnd / 2).max(2 * mss);
                self.cwnd = self.ssthresh + 3 * mss;
            }
            CongestionAlgorithm::Cubic => {
                self.cubic_w_max = self.cwnd;
                self.ssthresh = ((self.cwnd as u64 * CUBIC_BETA_NUM as u64) / CUBIC_BETA_DEN as u64)
                    .max(2 * mss as u64) as u32;
                self.cwnd = self.ssthresh;
            }
            CongestionAlgorithm::Bbr => {
                // BBR does not react to dup-ACKs the way loss-based CC does;
                // it relies on min_rtt/max_bw sampling instead.  Recovery is
                // tracked only for retransmit bookkeeping.
            }
        }
        self.ca_state = CongestionCaState::Recovery;
        if let Some(nxt) = snd_nxt {
            self.recover = nxt;
        }
        true
    }

    /// RTO fired: collapse the window per RFC 5681 §4.1.
    pub fn on_rto(&mut self, mss: u32) {
        self.ssthresh = (self.cwnd / 2).max(2 * mss);
        self.cwnd = mss;
        self.ca_state = CongestionCaState::Loss;
        self.dup_acks = 0;
        if self.algorithm == CongestionAlgorithm::Cubic {
            self.cubic_w_max = self.ssthresh;
            self.cubic_epoch_start_ms = 0;
        }
    }

    fn cubic_on_ack(&mut self, mss: u32, now_ms: u64) {
        if self.in_slow_start() {
            self.cwnd = self.cwnd.saturating_add(mss);
            return;
        }

        if self.cubic_epoch_start_ms == 0 {
            self.cubic_epoch_start_ms = now_ms;
            self.cubic_origin_point = if self.cubic_w_max > self.cwnd {
                self.cwnd
            } else {
                self.cubic_w_max
            };
        }

        let t_ms = now_ms.saturating_sub(self.cubic_epoch_start_ms);
        // K = cbrt(w_max * (1-beta) / C), computed in mss units to keep the
        // integer cube root well-scaled.
        let w_max_mss = (self.cubic_w_max / mss.max(1)).max(1) as u64;
        let k_cubed_q10 = (w_max_mss * (CUBIC_BETA_DEN as u64 - CUBIC_BETA_NUM as u64) * 1024)
            / (CUBIC_BETA_DEN as u64 * CUBIC_C_Q10);
        let k_ms = icbrt(k_cubed_q10) * 1000 / 10; // scale Q10 cube root back to ms, roughly

        let delta_ms = (t_ms as i64) - (k_ms as i64);
        let delta_s_q10 = (delta_ms * 1024) / 1000;
        let cubic_term = (delta_s_q10 * delta_s_q10 * delta_s_q10) / (1024 * 1024);
        let w_cubic_mss =
            (w_max_mss as i64) + (CUBIC_C_Q10 as i64 * cubic_term) / 1024;
        let w_cubic = (w_cubic_mss.max(1) as u64 * mss as u64) as u32;

        // TCP-friendly region: never fall below Reno's estimate.
        let w_reno = self.cwnd.saturating_add(mss);
        self.cwnd = w_cubic.max(w_reno);
    }

    fn bbr_on_ack(&mut self, acked_bytes: u32, now_ms: u64) {
        // Minimal BBR: track min_rtt/max_bw and size cwnd as 2x the
        // bandwidth-delay product once both samples exist.  Mode transitions
        // are driven by round-trip counting, not by this single callback in
        // v1 — `bbr_round_count` is a clock driven by the caller via
        // `advance_round`.
        if now_ms > 0 {
            let bw = acked_bytes; // caller rate-limits calls to ~1/RTT
            if bw > self.bbr_max_bw_bytes_per_ms {
                self.bbr_max_bw_bytes_per_ms = bw;
            }
        }
        if self.bbr_min_rtt_ms != u32::MAX && self.bbr_max_bw_bytes_per_ms > 0 {
            let bdp = self.bbr_max_bw_bytes_per_ms.saturating_mul(self.bbr_min_rtt_ms);
            self.cwnd = bdp.saturating_mul(2).max(4 * acked_bytes.max(1));
        } else {
            self.cwnd = self.cwnd.saturating_add(acked_bytes);
        }
    }

    /// Feed a fresh RTT sample into BBR's min-RTT tracker (min over ≥10s,
    /// approximated here as min-ever with periodic reset left to the caller).
    pub fn bbr_sample_rtt(&mut self, rtt_ms: u32) {
        if rtt_ms < self.bbr_min_rtt_ms {
            self.bbr_min_rtt_ms = rtt_ms;
        }
    }

    /// Advance BBR's round-trip counter and rotate the ProbeBW pacing-gain
    /// cycle.  Returns the active pacing gain in Q8 fixed point.
    pub fn bbr_advance_round(&mut self) -> u32 {
        self.bbr_round_count = self.bbr_round_count.wrapping_add(1);
        match self.bbr_mode {
            BbrMode::Startup if self.bbr_round_count >= 3 => {
                self.bbr_mode = BbrMode::Drain;
                256 * 100 / 289 // 1/2.89 in Q8
            }
            BbrMode::Startup => 289 * 256 / 100, // 2.89 in Q8
            BbrMode::Drain => {
                self.bbr_mode = BbrMode::ProbeBw;
                256
            }
            BbrMode::ProbeBw => {
                self.bbr_cycle_index = (self.bbr_cycle_index + 1) % BBR_PACING_GAIN_CYCLE_Q8.len();
                BBR_PACING_GAIN_CYCLE_Q8[self.bbr_cycle_index]
            }
            BbrMode::ProbeRtt => {
                self.bbr_mode = BbrMode::ProbeBw;
                256
            }
        }
    }
}

/// Integer cube root, used by the CUBIC window function.  Good enough for
/// the small magnitudes involved (K is on the order of single-digit seconds).
fn icbrt(n: u64) -> u64 {
    if n == 0 {
        return 0;
    }
    let mut x = 1u64;
    while x * x * x <= n {
        x += 1;
    }
    x.saturating_sub(1).max(1)
}

