//! The consensus core: roles, timers, the two RAFT RPCs, commit advancement,
//! and the apply loop.
//!
//! A single lock in `ConsensusState` is the whole of the mutual-exclusion
//! contract: any number of concurrent callers (peer reply threads, the RPC
//! transport, the HTTP front, and the ticker) can drive it independently, and
//! no critical section here ever performs I/O.

pub mod log;
pub mod peer;
pub mod state_machine;

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use rand::Rng;

use crate::common::TICK_INTERVAL_MS;
use crate::config::NodeConfig;
use crate::rpc::messages::{AppendEntriesArgs, AppendEntriesReply, RequestVoteArgs, RequestVoteReply};
use crate::rpc::RpcHandler;
use crate::server::log::{Entry, Log};
use crate::server::peer::{PeerCommand, PeerHandle};
use crate::server::state_machine::{ChatStateMachine, CommittedMessage};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Follower,
    Candidate,
    Leader,
}

/// Everything the single lock guards: term, votedFor, role, log, commit
/// index, leader id, and the per-peer replication indices.
struct ConsensusState {
    role: Role,
    current_term: u64,
    voted_for: Option<String>,
    leader_id: Option<String>,
    log: Log,
    commit_index: u64,
    last_applied: u64,
    next_index: HashMap<String, u64>,
    match_index: HashMap<String, u64>,
    election_deadline: Instant,
    last_heartbeat: Instant,
    votes_received: HashSet<String>,
}

/// Result of `handle_client_command`.
pub enum ClientCommandResult {
    Ok { index: u64 },
    NotLeader { leader: Option<String> },
}

/// The consensus core for one node. Owns the log and the role/term state,
/// but not the network: peer threads and the RPC transport are handed an
/// `Arc<Consensus>` and call back into it.
pub struct Consensus {
    id: String,
    peers: HashMap<String, PeerHandle>,
    cluster_size: usize,
    election_timeout_range: (u64, u64),
    heartbeat_interval: Duration,
    state: Mutex<ConsensusState>,
    state_machine: Mutex<ChatStateMachine>,
}

impl Consensus {
    /// Constructs the consensus core and spawns one background thread per
    /// peer. Does not start the ticker or the RPC listener; callers (`main`)
    /// wire those up once the `Arc` exists.
    pub fn new(config: &NodeConfig, rpc_timeout: Duration) -> Arc<Consensus> {
        let id = config.node_id.clone();
        let (min_ms, max_ms) = config.election_timeout_range();
        let now = Instant::now();

        // Peer threads need to call back into `Consensus` once their RPC
        // replies arrive, but `Consensus` itself owns the `PeerHandle`s
        // used to reach those threads. `Arc::new_cyclic` breaks the cycle:
        // each peer thread gets a `Weak<Consensus>` it upgrades per call,
        // so it never keeps the node alive past its own lifetime.
        Arc::new_cyclic(|weak| {
            let mut peers = HashMap::new();
            for peer in config.others() {
                let handle = peer::spawn(peer.id.clone(), peer.raft_addr, weak.clone(), rpc_timeout);
                peers.insert(peer.id.clone(), handle);
            }

            Consensus {
                id: id.clone(),
                peers,
                cluster_size: config.cluster_size(),
                election_timeout_range: (min_ms, max_ms),
                heartbeat_interval: Duration::from_millis(config.heartbeat_interval_ms),
                state: Mutex::new(ConsensusState {
                    role: Role::Follower,
                    current_term: 0,
                    voted_for: None,
                    leader_id: None,
                    log: Log::new(),
                    commit_index: 0,
                    last_applied: 0,
                    next_index: HashMap::new(),
                    match_index: HashMap::new(),
                    election_deadline: now + random_election_timeout(min_ms, max_ms),
                    last_heartbeat: now,
                    votes_received: HashSet::new(),
                }),
                state_machine: Mutex::new(ChatStateMachine::new()),
            }
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Starts the background ticker that drives election timeouts,
    /// heartbeats, and the apply loop.
    pub fn spawn_ticker(self: &Arc<Consensus>) -> thread::JoinHandle<()> {
        let consensus = self.clone();
        thread::spawn(move || consensus.run_ticker())
    }

    fn run_ticker(self: Arc<Consensus>) {
        loop {
            thread::sleep(Duration::from_millis(TICK_INTERVAL_MS));
            self.tick();
        }
    }

    fn tick(&self) {
        let now = Instant::now();
        let (role, election_expired, heartbeat_due) = {
            let mut state = self.state.lock().unwrap();
            let election_expired = now >= state.election_deadline;
            let heartbeat_due =
                state.role == Role::Leader && now.duration_since(state.last_heartbeat) >= self.heartbeat_interval;
            if heartbeat_due {
                state.last_heartbeat = now;
            }
            (state.role, election_expired, heartbeat_due)
        };
        match role {
            Role::Leader => {
                if heartbeat_due {
                    self.send_heartbeats();
                }
            }
            Role::Follower | Role::Candidate => {
                if election_expired {
                    self.start_election();
                }
            }
        }
        self.apply_pending();
    }

    // ---- client entry point -------------------------------------------

    /// Appends `command` to the log if this node is leader, otherwise
    /// reports who the leader is (if known) so the caller can redirect.
    pub fn handle_client_command(&self, command: serde_json::Value) -> ClientCommandResult {
        let mut state = self.state.lock().unwrap();
        if state.role != Role::Leader {
            return ClientCommandResult::NotLeader { leader: state.leader_id.clone() };
        }
        let index = state.log.last_index() + 1;
        let term = state.current_term;
        state.log.append(vec![Entry { index, term, command }]);
        drop(state);
        self.replicate_to_all();
        ClientCommandResult::Ok { index }
    }

    // ---- RequestVote -----------------------------------------------------

    pub fn handle_request_vote(&self, args: RequestVoteArgs) -> RequestVoteReply {
        let mut state = self.state.lock().unwrap();

        if args.term > state.current_term {
            step_down(&mut state, args.term);
        }

        if args.term < state.current_term {
            return RequestVoteReply { term: state.current_term, vote_granted: false };
        }

        let can_vote = matches!(&state.voted_for, None) || state.voted_for.as_deref() == Some(&args.candidate_id);
        let log_ok = state.log.is_candidate_log_up_to_date(args.last_log_term, args.last_log_index);

        let vote_granted = can_vote && log_ok;
        if vote_granted {
            state.voted_for = Some(args.candidate_id.clone());
            reset_election_deadline(&mut state, self.election_timeout_range);
        }

        RequestVoteReply { term: state.current_term, vote_granted }
    }

    // ---- AppendEntries ----------------------------------------------------

    pub fn handle_append_entries(&self, args: AppendEntriesArgs) -> AppendEntriesReply {
        let mut state = self.state.lock().unwrap();

        if args.term < state.current_term {
            return AppendEntriesReply {
                term: state.current_term,
                success: false,
                match_index: 0,
                conflict_term: None,
                conflict_index: None,
            };
        }

        if args.term > state.current_term {
            step_down(&mut state, args.term);
        } else if state.role == Role::Candidate {
            state.role = Role::Follower;
        }

        state.leader_id = Some(args.leader_id.clone());
        reset_election_deadline(&mut state, self.election_timeout_range);

        if args.prev_log_index > 0 {
            match state.log.get(args.prev_log_index) {
                Some(entry) if entry.term == args.prev_log_term => {}
                Some(conflicting) => {
                    let conflict_term = conflicting.term;
                    let conflict_index = first_index_of_term(&state.log, conflict_term);
                    return AppendEntriesReply {
                        term: state.current_term,
                        success: false,
                        match_index: 0,
                        conflict_term: Some(conflict_term),
                        conflict_index: Some(conflict_index),
                    };
                }
                None => {
                    let conflict_index = state.log.last_index() + 1;
                    return AppendEntriesReply {
                        term: state.current_term,
                        success: false,
                        match_index: 0,
                        conflict_term: None,
                        conflict_index: Some(conflict_index),
                    };
                }
            }
        }

        let match_index = state.log.merge(args.prev_log_index, &args.entries);

        state.commit_index = state.commit_index.max(args.leader_commit.min(match_index));

        AppendEntriesReply {
            term: state.current_term,
            success: true,
            match_index,
            conflict_term: None,
            conflict_index: None,
        }
    }

    // ---- peer reply handlers ----------------------------------------------

    /// Called back from a peer's background thread once a RequestVote reply
    /// (or failure) comes in.
    pub fn on_request_vote_reply(&self, peer_id: &str, sent_term: u64, reply: RequestVoteReply) {
        let mut state = self.state.lock().unwrap();

        if reply.term > state.current_term {
            step_down(&mut state, reply.term);
            return;
        }
        if state.role != Role::Candidate || sent_term != state.current_term || !reply.vote_granted {
            return;
        }

        state.votes_received.insert(peer_id.to_string());
        let votes = state.votes_received.len() + 1; // +1 for our own vote
        let majority = self.cluster_size / 2 + 1;
        if votes >= majority {
            self.become_leader(&mut state);
        }
    }

    /// Called back once an AppendEntries reply (or failure) comes in.
    pub fn on_append_entries_reply(&self, peer_id: &str, sent_term: u64, reply: AppendEntriesReply) {
        let mut state = self.state.lock().unwrap();

        if reply.term > state.current_term {
            step_down(&mut state, reply.term);
            return;
        }
        if state.role != Role::Leader || sent_term != state.current_term {
            return;
        }

        if reply.success {
            state.match_index.insert(peer_id.to_string(), reply.match_index);
            state.next_index.insert(peer_id.to_string(), reply.match_index + 1);
            self.recompute_commit_index(&mut state);
        } else {
            let next = back_up_next_index(&state, peer_id, reply.conflict_term, reply.conflict_index);
            state.next_index.insert(peer_id.to_string(), next);
        }
    }

    // ---- elections ---------------------------------------------------------

    fn start_election(&self) {
        let (term, args, peer_ids) = {
            let mut state = self.state.lock().unwrap();
            state.role = Role::Candidate;
            state.current_term += 1;
            state.voted_for = Some(self.id.clone());
            state.votes_received.clear();
            reset_election_deadline(&mut state, self.election_timeout_range);

            let args = RequestVoteArgs {
                term: state.current_term,
                candidate_id: self.id.clone(),
                last_log_index: state.log.last_index(),
                last_log_term: state.log.last_term(),
            };
            (state.current_term, args, self.peers.keys().cloned().collect::<Vec<_>>())
        };

        ::log::debug!("{} starting election for term {term}", self.id);
        // A lone node (cluster_size == 1) wins immediately; no peers to hear from.
        if peer_ids.is_empty() && self.cluster_size == 1 {
            let mut state = self.state.lock().unwrap();
            if state.role == Role::Candidate && state.current_term == term {
                self.become_leader(&mut state);
            }
            return;
        }
        for peer_id in peer_ids {
            if let Some(handle) = self.peers.get(&peer_id) {
                handle.send(PeerCommand::SendRequestVote(args.clone()));
            }
        }
    }

    fn become_leader(&self, state: &mut ConsensusState) {
        state.role = Role::Leader;
        state.leader_id = Some(self.id.clone());
        let next = state.log.last_index() + 1;
        for peer_id in self.peers.keys() {
            state.next_index.insert(peer_id.clone(), next);
            state.match_index.insert(peer_id.clone(), 0);
        }
        // Send the first heartbeat on the very next tick rather than waiting
        // out a full heartbeat interval.
        state.last_heartbeat = Instant::now() - self.heartbeat_interval;
        ::log::debug!("{} became leader for term {}", self.id, state.current_term);
    }

    // ---- replication --------------------------------------------------------

    fn send_heartbeats(&self) {
        self.replicate_to_all();
    }

    fn replicate_to_all(&self) {
        for peer_id in self.peers.keys().cloned().collect::<Vec<_>>() {
            self.replicate_to_peer(&peer_id);
        }
    }

    /// Builds and sends one AppendEntries to `peer_id` from the current
    /// `next_index`, without holding the lock during the actual send.
    fn replicate_to_peer(&self, peer_id: &str) {
        let args = {
            let state = self.state.lock().unwrap();
            if state.role != Role::Leader {
                return;
            }
            let next_index = *state.next_index.get(peer_id).unwrap_or(&(state.log.last_index() + 1));
            let prev_log_index = next_index.saturating_sub(1);
            let prev_log_term = state.log.term_at(prev_log_index).unwrap_or(0);
            let entries = state.log.entries_from(prev_log_index);
            AppendEntriesArgs {
                term: state.current_term,
                leader_id: self.id.clone(),
                prev_log_index,
                prev_log_term,
                entries,
                leader_commit: state.commit_index,
            }
        };
        if let Some(handle) = self.peers.get(peer_id) {
            handle.send(PeerCommand::SendAppendEntries(args));
        }
    }

    fn recompute_commit_index(&self, state: &mut ConsensusState) {
        if state.role != Role::Leader {
            return;
        }
        let mut indices: Vec<u64> = state.match_index.values().copied().collect();
        indices.push(state.log.last_index()); // the leader's own match index
        indices.sort_unstable_by(|a, b| b.cmp(a));

        let majority = self.cluster_size / 2 + 1;
        if majority == 0 || indices.len() < majority {
            return;
        }
        let candidate_n = indices[majority - 1];
        if candidate_n > state.commit_index {
            if let Some(term) = state.log.term_at(candidate_n) {
                if term == state.current_term {
                    state.commit_index = candidate_n;
                }
            }
        }
    }

    fn apply_pending(&self) {
        loop {
            let next = {
                let mut state = self.state.lock().unwrap();
                if state.last_applied >= state.commit_index {
                    return;
                }
                state.last_applied += 1;
                match state.log.get(state.last_applied) {
                    Some(entry) => entry,
                    None => return,
                }
            };
            self.state_machine.lock().unwrap().apply(&next);
        }
    }

    pub fn snapshot_messages(&self) -> Vec<CommittedMessage> {
        self.state_machine.lock().unwrap().snapshot_messages()
    }
}

impl RpcHandler for Consensus {
    fn handle_request_vote(&self, args: RequestVoteArgs) -> RequestVoteReply {
        Consensus::handle_request_vote(self, args)
    }

    fn handle_append_entries(&self, args: AppendEntriesArgs) -> AppendEntriesReply {
        Consensus::handle_append_entries(self, args)
    }
}

fn step_down(state: &mut ConsensusState, new_term: u64) {
    state.current_term = new_term;
    state.role = Role::Follower;
    state.voted_for = None;
    state.votes_received.clear();
}

fn reset_election_deadline(state: &mut ConsensusState, range: (u64, u64)) {
    state.election_deadline = Instant::now() + random_election_timeout(range.0, range.1);
}

fn random_election_timeout(min_ms: u64, max_ms: u64) -> Duration {
    let ms = rand::thread_rng().gen_range(min_ms..=max_ms);
    Duration::from_millis(ms)
}

/// Finds the first index in the log holding `term`, for the conflicting-term
/// back-up hint returned to a follower that rejects an AppendEntries.
fn first_index_of_term(log: &Log, term: u64) -> u64 {
    let mut index = 1;
    while index <= log.last_index() {
        if log.term_at(index) == Some(term) {
            return index;
        }
        index += 1;
    }
    index
}

/// Applies the AppendEntries conflict hints to compute the leader's next
/// guess at `nextIndex[peer]`, skipping whole conflicting terms at once
/// instead of backing off one index per round trip.
fn back_up_next_index(
    state: &ConsensusState,
    peer_id: &str,
    conflict_term: Option<u64>,
    conflict_index: Option<u64>,
) -> u64 {
    let current = *state.next_index.get(peer_id).unwrap_or(&1);
    match (conflict_term, conflict_index) {
        (Some(term), _) => {
            // Back up to just after our own last entry with that term, or to
            // the follower's reported conflict_index if we have none.
            let mut last_with_term = None;
            let mut idx = state.log.last_index();
            while idx > 0 {
                if state.log.term_at(idx) == Some(term) {
                    last_with_term = Some(idx);
                    break;
                }
                idx -= 1;
            }
            match last_with_term {
                Some(idx) => idx + 1,
                None => conflict_index.unwrap_or(1).max(1),
            }
        }
        (None, Some(index)) => index.max(1),
        (None, None) => current.saturating_sub(1).max(1),
    }
}
