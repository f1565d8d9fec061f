//! Blocking RPC client used by each peer thread in `server::peer` to send a
//! single RequestVote or AppendEntries and wait for the matching reply.
//!
//! A fresh connection is opened per call. RAFT RPCs are infrequent relative
//! to heartbeat interval (tens of milliseconds), so connection setup cost is
//! not a concern; what matters is that a single slow or dead peer can never
//! block the caller for longer than `timeout`.

use std::net::{SocketAddr, TcpStream};
use std::time::Duration;

use crate::error::TransportError;
use crate::rpc::framing::{read_frame, write_frame};
use crate::rpc::messages::{RpcReply, RpcRequest};

/// Sends `request` to `addr` and returns the decoded reply, or a
/// [`TransportError`] if the connection, write, read, or decode fails —
/// callers treat all of these identically as "no reply".
pub fn call(addr: SocketAddr, request: &RpcRequest, timeout: Duration) -> Result<RpcReply, TransportError> {
    let mut stream =
        TcpStream::connect_timeout(&addr, timeout).map_err(|source| TransportError::Connect { addr, source })?;
    stream
        .set_read_timeout(Some(timeout))
        .and_then(|_| stream.set_write_timeout(Some(timeout)))
        .map_err(|source| TransportError::Io { addr, source })?;

    let body = serde_json::to_vec(request).expect("RpcRequest always serializes");
    write_frame(&mut stream, addr, &body)?;

    let reply_bytes = read_frame(&mut stream, addr)?;
    serde_json::from_slice(&reply_bytes).map_err(|source| TransportError::Decode { addr, source })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::messages::{RequestVoteArgs, RequestVoteReply};
    use std::io::{Read, Write};
    use std::net::TcpListener;
    use std::thread;

    #[test]
    fn call_round_trips_through_a_fake_server() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let handle = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut len_buf = [0u8; 4];
            stream.read_exact(&mut len_buf).unwrap();
            let len = u32::from_be_bytes(len_buf) as usize;
            let mut body = vec![0u8; len];
            stream.read_exact(&mut body).unwrap();
            let _req: RpcRequest = serde_json::from_slice(&body).unwrap();

            let reply = RpcReply::RequestVote(RequestVoteReply { term: 7, vote_granted: true });
            let reply_bytes = serde_json::to_vec(&reply).unwrap();
            stream.write_all(&(reply_bytes.len() as u32).to_be_bytes()).unwrap();
            stream.write_all(&reply_bytes).unwrap();
        });

        let request = RpcRequest::RequestVote(RequestVoteArgs {
            term: 7,
            candidate_id: "n0".into(),
            last_log_index: 0,
            last_log_term: 0,
        });
        let reply = call(addr, &request, Duration::from_secs(1)).unwrap();
        match reply {
            RpcReply::RequestVote(r) => {
                assert_eq!(r.term, 7);
                assert!(r.vote_granted);
            }
            _ => panic!("wrong reply variant"),
        }
        handle.join().unwrap();
    }

    #[test]
    fn call_to_dead_port_fails_fast() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener); // nobody is listening now

        let request = RpcRequest::RequestVote(RequestVoteArgs {
            term: 1,
            candidate_id: "n0".into(),
            last_log_index: 0,
            last_log_term: 0,
        });
        let result = call(addr, &request, Duration::from_millis(200));
        assert!(result.is_err());
    }
}
