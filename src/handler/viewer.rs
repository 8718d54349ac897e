use axum::{
    extract::{State, WebSocketUpgrade, ws::WebSocket},
    response::Response,
};

use crate::{
    api::RelayState,
    signaling::{channel::WsChannel, session::{SessionSlot, SignalingSession}},
    transport::Transport,
};

pub async fn ws_handler<T: Transport>(
    ws: WebSocketUpgrade,
    State(state): State<RelayState<T>>,
) -> Response {
    ws.on_upgrade(move |socket| serve_viewer(socket, state))
}

/// One viewer connection, from offer to disconnect.
async fn serve_viewer<T: Transport>(socket: WebSocket, state: RelayState<T>) {
    let cancel = state.shutdown.child_token();
    let slot = SessionSlot::new();
    let id = slot.id();
    // listed and kickable from here on, offer or not
    state.sessions.add(id, slot.subscribe(), cancel.clone()).await;

    let session = match SignalingSession::create(
        state.transport.as_ref(),
        &state.origin,
        slot,
        WsChannel::new(socket),
        state.options,
        cancel,
    )
    .await
    {
        Ok(session) => session,
        Err(e) => {
            log::warn!("viewer negotiation failed: {:#}", e);
            state.sessions.remove(&id).await;
            return;
        }
    };

    let final_state = session.run().await;
    state.sessions.remove(&id).await;
    log::info!("session {} ended {}", id, final_state);
}
