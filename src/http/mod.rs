//! The thin HTTP front: three endpoints, leader-aware write dispatch, and
//! follower redirects.
//!
//! `axum`'s extractor model (`State`, `Json`, raw `Value` bodies) is a close
//! match for a front end that must forward request bodies opaquely to the
//! consensus core without ever parsing them itself.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};

use crate::config::NodeConfig;
use crate::server::{ClientCommandResult, Consensus};

#[derive(Clone)]
struct AppState {
    consensus: Arc<Consensus>,
    config: Arc<NodeConfig>,
}

pub fn router(consensus: Arc<Consensus>, config: Arc<NodeConfig>) -> Router {
    let state = AppState { consensus, config };
    Router::new()
        .route("/health", get(health))
        .route("/messages", get(messages))
        .route("/chat", post(chat))
        .with_state(state)
}

async fn health() -> &'static str {
    "OK"
}

async fn messages(State(state): State<AppState>) -> Json<Vec<crate::server::state_machine::CommittedMessage>> {
    Json(state.consensus.snapshot_messages())
}

async fn chat(State(state): State<AppState>, Json(body): Json<serde_json::Value>) -> Response {
    match state.consensus.handle_client_command(body) {
        ClientCommandResult::Ok { index } => {
            Json(serde_json::json!({"status": "ok", "index": index})).into_response()
        }
        ClientCommandResult::NotLeader { leader: Some(leader_id) } => {
            match redirect_location(&state.config, &leader_id) {
                Some(location) => (StatusCode::FOUND, [(header::LOCATION, location)]).into_response(),
                None => StatusCode::FOUND.into_response(),
            }
        }
        ClientCommandResult::NotLeader { leader: None } => StatusCode::FOUND.into_response(),
    }
}

/// Where to redirect a client when the node handling `/chat` isn't leader
/// but knows who is.
fn redirect_location(config: &NodeConfig, leader_id: &str) -> Option<String> {
    if let Some(public) = &config.public {
        return Some(format!("{}://{}/chat", public.scheme, public.host));
    }
    let addr: SocketAddr = config.http_addr_of(leader_id)?;
    Some(format!("http://{addr}/chat"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{NodeConfig, PeerConfig, PublicEndpoint};

    fn sample_config() -> NodeConfig {
        NodeConfig {
            node_id: "n0".into(),
            peers: vec![
                PeerConfig {
                    id: "n0".into(),
                    raft_addr: "127.0.0.1:9000".parse().unwrap(),
                    http_addr: "127.0.0.1:8000".parse().unwrap(),
                },
                PeerConfig {
                    id: "n1".into(),
                    raft_addr: "127.0.0.1:9001".parse().unwrap(),
                    http_addr: "127.0.0.1:8001".parse().unwrap(),
                },
            ],
            public: None,
            election_timeout_min_ms: 150,
            election_timeout_max_ms: 300,
            heartbeat_interval_ms: 50,
        }
    }

    #[test]
    fn local_mode_redirects_to_leader_http_addr() {
        let config = sample_config();
        let location = redirect_location(&config, "n1").unwrap();
        assert_eq!(location, "http://127.0.0.1:8001/chat");
    }

    #[test]
    fn public_mode_redirects_to_public_host() {
        let mut config = sample_config();
        config.public = Some(PublicEndpoint { host: "chat.example.com".into(), scheme: "https".into() });
        let location = redirect_location(&config, "n1").unwrap();
        assert_eq!(location, "https://chat.example.com/chat");
    }

    #[test]
    fn unknown_leader_id_has_no_location() {
        let config = sample_config();
        assert!(redirect_location(&config, "ghost").is_none());
    }
}
