//! Wire types for the two RAFT RPCs.
//!
//! Framing is length-prefixed JSON (a 4-byte big-endian length followed by
//! the UTF-8 JSON body) — no code generation step needed, and every field
//! the RPCs carry (terms, indices) is already expressed as JSON elsewhere in
//! this crate (the HTTP front, the log).

use serde::{Deserialize, Serialize};

use crate::server::log::Entry;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestVoteArgs {
    pub term: u64,
    pub candidate_id: String,
    pub last_log_index: u64,
    pub last_log_term: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestVoteReply {
    pub term: u64,
    pub vote_granted: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppendEntriesArgs {
    pub term: u64,
    pub leader_id: String,
    pub prev_log_index: u64,
    pub prev_log_term: u64,
    pub entries: Vec<Entry>,
    pub leader_commit: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppendEntriesReply {
    pub term: u64,
    pub success: bool,
    /// Index of the last entry now in the log covering this request, when
    /// `success` is true. Meaningless when `success` is false.
    pub match_index: u64,
    /// Conflicting-term back-up hint. `None` unless `success` is false and
    /// the follower found a conflicting entry at `prev_log_index`.
    #[serde(default)]
    pub conflict_term: Option<u64>,
    #[serde(default)]
    pub conflict_index: Option<u64>,
}

/// Every request this transport carries, tagged by `kind` on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum RpcRequest {
    RequestVote(RequestVoteArgs),
    AppendEntries(AppendEntriesArgs),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum RpcReply {
    RequestVote(RequestVoteReply),
    AppendEntries(AppendEntriesReply),
}
