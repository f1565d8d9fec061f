//! The RAFT transport: a TCP listener per node that accepts RequestVote and
//! AppendEntries RPCs from peers and dispatches them to the consensus core.
//!
//! Peer calls (leader → follower) go through [`client::call`]; this module
//! is the receiving side, dispatching on a tagged JSON request enum.

pub mod client;
pub mod framing;
pub mod messages;

use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::thread;

use log::debug;

use crate::error::TransportError;
use messages::{AppendEntriesArgs, AppendEntriesReply, RequestVoteArgs, RequestVoteReply, RpcReply, RpcRequest};

/// Implemented by the consensus core; the transport layer only knows how to
/// decode a request and encode whatever this returns.
pub trait RpcHandler: Send + Sync {
    fn handle_request_vote(&self, args: RequestVoteArgs) -> RequestVoteReply;
    fn handle_append_entries(&self, args: AppendEntriesArgs) -> AppendEntriesReply;
}

pub struct Transport {
    listener: TcpListener,
}

impl Transport {
    /// Binds `addr`. Bind failure is one of the only two errors fatal to
    /// process startup — the other is config parsing.
    pub fn bind(addr: SocketAddr) -> std::io::Result<Transport> {
        let listener = TcpListener::bind(addr)?;
        Ok(Transport { listener })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Runs the accept loop on a background thread, dispatching each
    /// connection to `handler`. Never returns an error to the caller after
    /// startup: per-connection failures are logged and dropped, since no
    /// single RPC failure should ever be fatal to the process.
    pub fn serve(self, handler: Arc<dyn RpcHandler>) -> thread::JoinHandle<()> {
        thread::spawn(move || {
            for incoming in self.listener.incoming() {
                match incoming {
                    Ok(stream) => {
                        let handler = handler.clone();
                        thread::spawn(move || handle_connection(stream, handler));
                    }
                    Err(e) => debug!("accept() failed: {e}"),
                }
            }
        })
    }
}

fn handle_connection(stream: TcpStream, handler: Arc<dyn RpcHandler>) {
    let addr = match stream.peer_addr() {
        Ok(addr) => addr,
        Err(_) => return,
    };
    if let Err(e) = handle_one_request(stream, addr, handler.as_ref()) {
        debug!("rpc from {addr} failed: {e}");
    }
}

fn handle_one_request(mut stream: TcpStream, addr: SocketAddr, handler: &dyn RpcHandler) -> Result<(), TransportError> {
    let body = framing::read_frame(&mut stream, addr)?;
    let request: RpcRequest =
        serde_json::from_slice(&body).map_err(|source| TransportError::Decode { addr, source })?;

    let reply = match request {
        RpcRequest::RequestVote(args) => RpcReply::RequestVote(handler.handle_request_vote(args)),
        RpcRequest::AppendEntries(args) => RpcReply::AppendEntries(handler.handle_append_entries(args)),
    };

    let reply_bytes = serde_json::to_vec(&reply).expect("RpcReply always serializes");
    framing::write_frame(&mut stream, addr, &reply_bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    struct EchoTermHandler;

    impl RpcHandler for EchoTermHandler {
        fn handle_request_vote(&self, args: RequestVoteArgs) -> RequestVoteReply {
            RequestVoteReply { term: args.term, vote_granted: true }
        }

        fn handle_append_entries(&self, args: AppendEntriesArgs) -> AppendEntriesReply {
            AppendEntriesReply {
                term: args.term,
                success: true,
                match_index: args.prev_log_index,
                conflict_term: None,
                conflict_index: None,
            }
        }
    }

    #[test]
    fn serves_request_vote() {
        let transport = Transport::bind("127.0.0.1:0".parse().unwrap()).unwrap();
        let addr = transport.local_addr().unwrap();
        let _handle = transport.serve(Arc::new(EchoTermHandler));

        let request = RpcRequest::RequestVote(RequestVoteArgs {
            term: 42,
            candidate_id: "n0".into(),
            last_log_index: 0,
            last_log_term: 0,
        });
        let reply = client::call(addr, &request, Duration::from_secs(1)).unwrap();
        match reply {
            RpcReply::RequestVote(r) => {
                assert_eq!(r.term, 42);
                assert!(r.vote_granted);
            }
            _ => panic!("wrong reply variant"),
        }
    }
}
