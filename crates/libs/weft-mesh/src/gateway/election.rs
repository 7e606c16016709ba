//! Bridge failover election.
//!
//! Candidates broadcast `(rssi, uptime, free memory, id)` tuples; the winner
//! is the best router signal, with uptime, memory, then lower node id as
//! deterministic tie-breaks. A lone candidate below the minimum RSSI is
//! rejected so one badly placed node cannot claim the gateway role.

/// One node's claim during an election round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ElectionCandidate {
    pub node_id: u32,
    pub router_rssi: i8,
    pub uptime: u32,
    pub free_memory: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ElectionState {
    #[default]
    Idle,
    Scanning,
    Collecting,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElectionOutcome {
    Winner(ElectionCandidate),
    /// Single candidate under the RSSI floor; the mesh stays bridgeless.
    RejectedBelowThreshold(ElectionCandidate),
    NoCandidates,
}

pub const DEFAULT_MIN_RSSI_DBM: i8 = -80;
pub const DEFAULT_ELECTION_TIMEOUT_MS: u32 = 5_000;
pub const ROLE_CHANGE_COOLDOWN_MS: u64 = 60_000;

pub struct ElectionManager {
    state: ElectionState,
    candidates: Vec<ElectionCandidate>,
    min_rssi_dbm: i8,
    timeout_ms: u32,
    last_role_change_ms: Option<u64>,
}

impl Default for ElectionManager {
    fn default() -> Self {
        Self {
            state: ElectionState::Idle,
            candidates: Vec::new(),
            min_rssi_dbm: DEFAULT_MIN_RSSI_DBM,
            timeout_ms: DEFAULT_ELECTION_TIMEOUT_MS,
            last_role_change_ms: None,
        }
    }
}

impl ElectionManager {
    pub fn state(&self) -> ElectionState {
        self.state
    }

    pub fn timeout_ms(&self) -> u32 {
        self.timeout_ms
    }

    pub fn set_timeout_ms(&mut self, timeout_ms: u32) {
        self.timeout_ms = timeout_ms;
    }

    pub fn min_rssi_dbm(&self) -> i8 {
        self.min_rssi_dbm
    }

    /// Configurable floor, clamped to the sane dBm range.
    pub fn set_min_rssi_dbm(&mut self, threshold: i8) {
        self.min_rssi_dbm = threshold.clamp(-100, -30);
    }

    /// Try to open an election round. Fails while one is already running or
    /// inside the post-role-change cooldown.
    pub fn begin(&mut self, now_ms: u64) -> bool {
        if self.state != ElectionState::Idle {
            log::debug!("election: already in progress");
            return false;
        }
        if let Some(last) = self.last_role_change_ms {
            if now_ms.wrapping_sub(last) < ROLE_CHANGE_COOLDOWN_MS {
                log::debug!("election: throttled, too soon after last role change");
                return false;
            }
        }
        self.state = ElectionState::Scanning;
        self.candidates.clear();
        true
    }

    /// Scan failed or eligibility vanished; back to idle.
    pub fn abort(&mut self) {
        self.state = ElectionState::Idle;
        self.candidates.clear();
    }

    /// Scan succeeded; candidacies are now accepted until evaluation.
    pub fn start_collecting(&mut self) {
        self.state = ElectionState::Collecting;
    }

    /// Register a candidacy; duplicates by node id are ignored.
    pub fn add_candidate(&mut self, candidate: ElectionCandidate) {
        if self.state != ElectionState::Collecting {
            log::debug!("election: not collecting, ignoring candidate {}", candidate.node_id);
            return;
        }
        if self.candidates.iter().any(|known| known.node_id == candidate.node_id) {
            return;
        }
        log::debug!(
            "election: candidate {} (rssi {} dBm)",
            candidate.node_id,
            candidate.router_rssi
        );
        self.candidates.push(candidate);
    }

    pub fn candidate_count(&self) -> usize {
        self.candidates.len()
    }

    /// Close the round and pick the outcome. Always returns to idle.
    pub fn evaluate(&mut self) -> ElectionOutcome {
        let candidates = std::mem::take(&mut self.candidates);
        self.state = ElectionState::Idle;

        let Some(&winner) = candidates.iter().reduce(|best, challenger| {
            if Self::beats(challenger, best) {
                challenger
            } else {
                best
            }
        }) else {
            return ElectionOutcome::NoCandidates;
        };

        if candidates.len() == 1 && winner.router_rssi < self.min_rssi_dbm {
            log::info!(
                "election: sole candidate {} below threshold ({} < {} dBm), no bridge",
                winner.node_id,
                winner.router_rssi,
                self.min_rssi_dbm
            );
            return ElectionOutcome::RejectedBelowThreshold(winner);
        }

        log::info!(
            "election: winner {} (rssi {} dBm, uptime {} ms)",
            winner.node_id,
            winner.router_rssi,
            winner.uptime
        );
        ElectionOutcome::Winner(winner)
    }

    pub fn record_role_change(&mut self, now_ms: u64) {
        self.last_role_change_ms = Some(now_ms);
    }

    /// Strict "better bridge than" ordering: RSSI, uptime, free memory, then
    /// lower node id.
    fn beats(a: &ElectionCandidate, b: &ElectionCandidate) -> bool {
        (a.router_rssi, a.uptime, a.free_memory, std::cmp::Reverse(a.node_id))
            > (b.router_rssi, b.uptime, b.free_memory, std::cmp::Reverse(b.node_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(node_id: u32, rssi: i8, uptime: u32, memory: u32) -> ElectionCandidate {
        ElectionCandidate { node_id, router_rssi: rssi, uptime, free_memory: memory }
    }

    fn collecting() -> ElectionManager {
        let mut manager = ElectionManager::default();
        assert!(manager.begin(ROLE_CHANGE_COOLDOWN_MS));
        manager.start_collecting();
        manager
    }

    #[test]
    fn best_rssi_wins() {
        let mut manager = collecting();
        manager.add_candidate(candidate(1000, -70, 5_000, 32_000));
        manager.add_candidate(candidate(2000, -55, 1_000, 16_000));
        manager.add_candidate(candidate(3000, -62, 9_000, 64_000));
        assert_eq!(manager.evaluate(), ElectionOutcome::Winner(candidate(2000, -55, 1_000, 16_000)));
    }

    #[test]
    fn rssi_tie_breaks_on_uptime_then_memory_then_id() {
        let mut manager = collecting();
        manager.add_candidate(candidate(1000, -63, 10_000, 32_000));
        manager.add_candidate(candidate(2000, -63, 20_000, 16_000));
        match manager.evaluate() {
            ElectionOutcome::Winner(winner) => assert_eq!(winner.node_id, 2000),
            other => panic!("unexpected outcome: {other:?}"),
        }

        let mut manager = collecting();
        manager.add_candidate(candidate(1000, -63, 10_000, 32_000));
        manager.add_candidate(candidate(2000, -63, 10_000, 48_000));
        match manager.evaluate() {
            ElectionOutcome::Winner(winner) => assert_eq!(winner.node_id, 2000),
            other => panic!("unexpected outcome: {other:?}"),
        }

        let mut manager = collecting();
        manager.add_candidate(candidate(2000, -63, 10_000, 32_000));
        manager.add_candidate(candidate(1000, -63, 10_000, 32_000));
        match manager.evaluate() {
            ElectionOutcome::Winner(winner) => assert_eq!(winner.node_id, 1000),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn evaluation_is_deterministic_across_insertion_orders() {
        let set = [
            candidate(1000, -70, 5_000, 32_000),
            candidate(2000, -70, 5_000, 32_000),
            candidate(3000, -70, 9_000, 1_000),
        ];
        let mut winners = Vec::new();
        for rotation in 0..set.len() {
            let mut manager = collecting();
            for index in 0..set.len() {
                manager.add_candidate(set[(rotation + index) % set.len()]);
            }
            match manager.evaluate() {
                ElectionOutcome::Winner(winner) => winners.push(winner.node_id),
                other => panic!("unexpected outcome: {other:?}"),
            }
        }
        assert_eq!(winners, vec![3000, 3000, 3000]);
    }

    #[test]
    fn sole_candidate_below_threshold_is_rejected() {
        let mut manager = collecting();
        manager.add_candidate(candidate(1000, -92, 5_000, 32_000));
        assert!(matches!(
            manager.evaluate(),
            ElectionOutcome::RejectedBelowThreshold(winner) if winner.node_id == 1000
        ));
    }

    #[test]
    fn multiple_weak_candidates_still_produce_a_winner() {
        let mut manager = collecting();
        manager.add_candidate(candidate(1000, -92, 5_000, 32_000));
        manager.add_candidate(candidate(2000, -88, 5_000, 32_000));
        match manager.evaluate() {
            ElectionOutcome::Winner(winner) => assert_eq!(winner.node_id, 2000),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn empty_round_yields_no_candidates() {
        let mut manager = collecting();
        assert_eq!(manager.evaluate(), ElectionOutcome::NoCandidates);
        assert_eq!(manager.state(), ElectionState::Idle);
    }

    #[test]
    fn cooldown_throttles_back_to_back_elections() {
        let mut manager = ElectionManager::default();
        manager.record_role_change(100_000);
        assert!(!manager.begin(100_000 + ROLE_CHANGE_COOLDOWN_MS - 1));
        assert!(manager.begin(100_000 + ROLE_CHANGE_COOLDOWN_MS));
    }

    #[test]
    fn duplicate_candidacies_are_ignored() {
        let mut manager = collecting();
        manager.add_candidate(candidate(1000, -70, 5_000, 32_000));
        manager.add_candidate(candidate(1000, -40, 9_000, 64_000));
        assert_eq!(manager.candidate_count(), 1);
    }

    #[test]
    fn threshold_is_clamped_to_sane_range() {
        let mut manager = ElectionManager::default();
        manager.set_min_rssi_dbm(-120);
        assert_eq!(manager.min_rssi_dbm(), -100);
        manager.set_min_rssi_dbm(-10);
        assert_eq!(manager.min_rssi_dbm(), -30);
    }
}
