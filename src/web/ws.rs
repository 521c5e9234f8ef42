use futures::{SinkExt, StreamExt};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use warp::ws::{Message, WebSocket};

use crate::realtime::{RealtimeBroadcaster, Topic};

/// Commands a connected client may send.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum ClientCommand {
    Subscribe { topic: Topic },
    Unsubscribe { topic: Topic },
}

pub async fn handle_socket(socket: WebSocket, broadcaster: Arc<RealtimeBroadcaster>) {
    let (mut sink, mut stream) = socket.split();
    let mut subscriber = broadcaster.register().await;
    let id = subscriber.id;
    info!("Realtime client {} connected", id);

    let forward = tokio::spawn(async move {
        while let Some(envelope) = subscriber.recv().await {
            let text = match serde_json::to_string(&envelope) {
                Ok(text) => text,
                Err(e) => {
                    warn!("Failed to encode realtime message: {}", e);
                    continue;
                }
            };
            if sink.send(Message::text(text)).await.is_err() {
                break;
            }
        }
        // Queue closed by the broadcaster: the client fell behind and must resync.
        let _ = sink.close().await;
    });

    while let Some(message) = stream.next().await {
        let message = match message {
            Ok(message) => message,
            Err(e) => {
                debug!("Realtime client {} errored: {}", id, e);
                break;
            }
        };
        if message.is_close() {
            break;
        }
        let Ok(text) = message.to_str() else {
            continue;
        };

        match serde_json::from_str::<ClientCommand>(text) {
            Ok(ClientCommand::Subscribe { topic }) => {
                if let Err(e) = broadcaster.subscribe(id, topic).await {
                    warn!("Realtime client {} could not subscribe: {}", id, e);
                }
            }
            Ok(ClientCommand::Unsubscribe { topic }) => broadcaster.unsubscribe(id, &topic).await,
            Err(e) => debug!("Ignoring malformed command from client {}: {}", id, e),
        }
    }

    broadcaster.disconnect(id).await;
    forward.abort();
    info!("Realtime client {} disconnected", id);
}
