//! Per-peer background thread.
//!
//! One thread per cluster member: the consensus core never blocks on
//! network I/O, it only ever drops a message into this thread's channel.
//! Replies are delivered back into [`Consensus`] directly through a weak
//! back-reference, rather than through a central dispatch channel — see
//! DESIGN.md for the reasoning. There is no dynamic membership; the peer
//! set is fixed for the lifetime of the process.

use std::net::SocketAddr;
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::Weak;
use std::thread;
use std::time::Duration;

use log::debug;

use crate::rpc::client;
use crate::rpc::messages::{AppendEntriesArgs, RequestVoteArgs, RpcReply, RpcRequest};
use crate::server::Consensus;

/// Messages the consensus core pushes into a peer's outbound queue.
pub enum PeerCommand {
    SendRequestVote(RequestVoteArgs),
    SendAppendEntries(AppendEntriesArgs),
}

/// Handle the consensus core uses to talk to a peer's background thread.
pub struct PeerHandle {
    pub id: String,
    pub addr: SocketAddr,
    tx: Sender<PeerCommand>,
}

impl PeerHandle {
    /// Never blocks. The peer thread applies backpressure by simply being
    /// busy; a stale in-flight RPC is harmless since replies carry the term
    /// they were sent with.
    pub fn send(&self, command: PeerCommand) {
        let _ = self.tx.send(command);
    }
}

/// Spawns the background thread for one peer and returns a handle to it.
///
/// `consensus` is a [`Weak`] reference: the peer thread must never be the
/// thing keeping the node alive, since the node is what owns the channel
/// this thread reads from.
///
/// # Panics
/// Panics if the OS fails to create a new thread.
pub fn spawn(id: String, addr: SocketAddr, consensus: Weak<Consensus>, rpc_timeout: Duration) -> PeerHandle {
    let (tx, rx) = channel();
    let peer_id = id.clone();
    thread::spawn(move || peer_main(peer_id, addr, rx, consensus, rpc_timeout));
    PeerHandle { id, addr, tx }
}

fn peer_main(
    peer_id: String,
    addr: SocketAddr,
    rx: Receiver<PeerCommand>,
    consensus: Weak<Consensus>,
    rpc_timeout: Duration,
) {
    while let Ok(command) = rx.recv() {
        let Some(consensus) = consensus.upgrade() else { break };
        match command {
            PeerCommand::SendRequestVote(args) => send_request_vote(&peer_id, addr, args, &consensus, rpc_timeout),
            PeerCommand::SendAppendEntries(args) => {
                send_append_entries(&peer_id, addr, args, &consensus, rpc_timeout)
            }
        }
    }
}

fn send_request_vote(peer_id: &str, addr: SocketAddr, args: RequestVoteArgs, consensus: &Consensus, timeout: Duration) {
    let sent_term = args.term;
    let request = RpcRequest::RequestVote(args);
    match client::call(addr, &request, timeout) {
        Ok(RpcReply::RequestVote(reply)) => {
            consensus.on_request_vote_reply(peer_id, sent_term, reply);
        }
        Ok(_) => debug!("peer {peer_id} replied with the wrong RPC kind"),
        Err(e) => debug!("request_vote to {peer_id} failed: {e}"),
    }
}

fn send_append_entries(
    peer_id: &str,
    addr: SocketAddr,
    args: AppendEntriesArgs,
    consensus: &Consensus,
    timeout: Duration,
) {
    let sent_term = args.term;
    let request = RpcRequest::AppendEntries(args);
    match client::call(addr, &request, timeout) {
        Ok(RpcReply::AppendEntries(reply)) => {
            consensus.on_append_entries_reply(peer_id, sent_term, reply);
        }
        Ok(_) => debug!("peer {peer_id} replied with the wrong RPC kind"),
        Err(e) => debug!("append_entries to {peer_id} failed: {e}"),
    }
}
