//! WebSocket endpoint for the live channel.
//!
//! Frames are JSON text. The server opens with `connected`, then forwards
//! room events; clients send `update_estimate` messages, which are checked
//! against the stored estimate and relayed to the other editors.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    http::StatusCode,
    response::Response,
};
use tracing::{debug, info, warn};

use crate::live::{ClientMessage, LiveEvent};
use crate::models::{apply_update, LiveUpdate, MergeOutcome};

use super::handlers::{internal_error, not_found};
use super::AppState;

pub async fn live_socket(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, (StatusCode, String)> {
    if state.db.get_estimate(&id).map_err(internal_error)?.is_none() {
        return Err(not_found("Estimate"));
    }
    Ok(ws.on_upgrade(move |socket| run_session(socket, state, id)))
}

async fn run_session(mut socket: WebSocket, state: AppState, estimate_id: String) {
    let mut subscription = state.hub.join(&estimate_id);
    let client_id = subscription.client_id().to_string();
    info!(%estimate_id, %client_id, "editor connected");

    let hello = LiveEvent::Connected {
        client_id: client_id.clone(),
        estimate_id: estimate_id.clone(),
        active_editors: state.hub.active_editors(&estimate_id),
    };

    if send_event(&mut socket, &hello).await.is_ok() {
        loop {
            tokio::select! {
                incoming = socket.recv() => match incoming {
                    Some(Ok(Message::Text(text))) => {
                        let reply =
                            handle_message(&state, &estimate_id, &client_id, text.as_str());
                        if let Some(reply) = reply {
                            if send_event(&mut socket, &reply).await.is_err() {
                                break;
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        debug!(%client_id, "live socket error: {}", e);
                        break;
                    }
                },
                event = subscription.recv() => match event {
                    Some(event) => {
                        if send_event(&mut socket, &event).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                },
            }
        }
    }

    state.hub.leave(&estimate_id, &client_id);
    info!(%estimate_id, %client_id, "editor disconnected");
}

async fn send_event(socket: &mut WebSocket, event: &LiveEvent) -> anyhow::Result<()> {
    let text = serde_json::to_string(event)?;
    socket.send(Message::Text(text.into())).await?;
    Ok(())
}

/// Process one frame from `client_id`. Returns the reply for the sender, if
/// any; accepted updates go to the rest of the room instead.
fn handle_message(
    state: &AppState,
    estimate_id: &str,
    client_id: &str,
    text: &str,
) -> Option<LiveEvent> {
    let update = match serde_json::from_str::<ClientMessage>(text) {
        Ok(ClientMessage::UpdateEstimate { update }) => update,
        Err(e) => {
            warn!(client_id, "Rejected live message: {}", e);
            return Some(LiveEvent::Error {
                message: format!("invalid message: {}", e),
            });
        }
    };

    if let Err(message) = check_update(state, estimate_id, &update) {
        warn!(
            client_id,
            kind = %update.kind,
            action = %update.action,
            "Rejected live update: {}",
            message
        );
        return Some(LiveEvent::Error { message });
    }

    state.hub.relay(estimate_id, client_id, update);
    None
}

/// Dry-run `update` against the stored estimate. Updates that merge or are
/// harmlessly ignored pass; malformed ones are refused.
fn check_update(
    state: &AppState,
    estimate_id: &str,
    update: &LiveUpdate,
) -> Result<(), String> {
    let mut estimate = match state.db.get_estimate(estimate_id) {
        Ok(Some(estimate)) => estimate,
        Ok(None) => return Err("estimate no longer exists".to_string()),
        Err(e) => {
            tracing::error!(estimate_id, "Failed to load estimate: {:#}", e);
            return Err("internal error".to_string());
        }
    };

    match apply_update(&mut estimate, update) {
        Ok(outcome) => {
            if outcome == MergeOutcome::Ignored {
                debug!(
                    estimate_id,
                    kind = %update.kind,
                    "live update targets a node the server does not have"
                );
            }
            Ok(())
        }
        Err(e) => Err(e.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::models::{CreateEstimateInput, EntityKind, UpdateAction};
    use crate::tracker::TrackerConfig;
    use serde_json::json;

    fn state_with_estimate() -> (AppState, String) {
        let db = Database::open_memory().unwrap();
        db.migrate().unwrap();
        let estimate = db.create_estimate(CreateEstimateInput::default()).unwrap();
        (
            AppState::with_tracker(db, TrackerConfig::default()),
            estimate.id,
        )
    }

    #[test]
    fn valid_updates_are_relayed_to_others() {
        let (state, id) = state_with_estimate();
        let sender = state.hub.join(&id);
        let mut other = state.hub.join(&id);

        let frame = json!({
            "event": "update_estimate",
            "type": "epic",
            "action": "add",
            "data": { "id": "e1", "name": "Checkout", "stories": [] }
        })
        .to_string();
        assert_eq!(handle_message(&state, &id, sender.client_id(), &frame), None);

        tokio_test::block_on(async {
            match other.recv().await {
                Some(LiveEvent::EstimateUpdated { update, client_id, .. }) => {
                    assert_eq!(client_id, sender.client_id());
                    assert_eq!(update.kind, EntityKind::Epic);
                    assert_eq!(update.action, UpdateAction::Add);
                }
                event => panic!("expected estimate_updated, got {event:?}"),
            }
        });
    }

    #[test]
    fn malformed_frames_get_an_error_reply() {
        let (state, id) = state_with_estimate();
        let sender = state.hub.join(&id);

        let reply = handle_message(&state, &id, sender.client_id(), "not json");
        assert!(matches!(reply, Some(LiveEvent::Error { .. })));

        let missing_id = json!({
            "event": "update_estimate",
            "type": "story",
            "action": "delete",
            "data": {}
        })
        .to_string();
        match handle_message(&state, &id, sender.client_id(), &missing_id) {
            Some(LiveEvent::Error { message }) => assert!(message.contains("`id`")),
            other => panic!("expected error reply, got {other:?}"),
        }
    }

    #[test]
    fn updates_for_unknown_nodes_still_relay() {
        let (state, id) = state_with_estimate();
        let sender = state.hub.join(&id);
        let _other = state.hub.join(&id);

        let frame = json!({
            "event": "update_estimate",
            "type": "task",
            "action": "update",
            "data": { "id": "elsewhere", "name": "Only on the client" }
        })
        .to_string();
        assert_eq!(handle_message(&state, &id, sender.client_id(), &frame), None);
    }
}
