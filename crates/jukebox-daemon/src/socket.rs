use crate::core::DaemonEvent;
use crate::session::Session;
use crate::BroadcastMessage;
use jukebox_proto::protocol::{Broadcast, Message, PROTOCOL_VERSION};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tracing::{error, info, warn};

pub fn start_server(
    bind_address: String,
    port: u16,
    session: Arc<Session>,
    event_tx: mpsc::Sender<DaemonEvent>,
    broadcast_tx: broadcast::Sender<BroadcastMessage>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let addr = format!("{}:{}", bind_address, port);

        let listener = match TcpListener::bind(&addr).await {
            Ok(l) => l,
            Err(e) => {
                error!("Failed to bind TCP socket {}: {}", addr, e);
                return;
            }
        };

        info!("TCP server listening at {}", addr);
        serve(listener, session, event_tx, broadcast_tx).await;
    })
}

async fn serve(
    listener: TcpListener,
    session: Arc<Session>,
    event_tx: mpsc::Sender<DaemonEvent>,
    broadcast_tx: broadcast::Sender<BroadcastMessage>,
) {
    let mut client_id = 0usize;
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                client_id += 1;
                let id = client_id;
                info!("Client {} connected from {}", id, peer);

                let session = session.clone();
                let evt_tx = event_tx.clone();
                let bcast_rx = broadcast_tx.subscribe();
                tokio::spawn(async move {
                    handle_client(stream, session, id, evt_tx, bcast_rx).await;
                    info!("Client {} disconnected", id);
                });
            }
            Err(e) => {
                error!("Failed to accept connection: {}", e);
            }
        }
    }
}

async fn handle_client(
    stream: TcpStream,
    session: Arc<Session>,
    client_id: usize,
    event_tx: mpsc::Sender<DaemonEvent>,
    mut broadcast_rx: broadcast::Receiver<BroadcastMessage>,
) {
    let (mut read_half, mut write_half) = stream.into_split();
    let mut tmp = [0u8; 4096];
    let mut read_buf: Vec<u8> = Vec::new();

    // Send Hello with current state snapshot on connect
    if let Ok(encoded) = encode_hello(&session).await {
        if write_half.write_all(&encoded).await.is_err() {
            return;
        }
    }

    loop {
        tokio::select! {
            result = read_half.read(&mut tmp) => {
                match result {
                    Ok(0) => {
                        info!("Client {} closed connection", client_id);
                        break;
                    }
                    Ok(n) => {
                        read_buf.extend_from_slice(&tmp[..n]);

                        loop {
                            match Message::decode(&read_buf) {
                                Ok(Some((Message::Command(cmd), consumed))) => {
                                    read_buf.drain(..consumed);
                                    info!("Client {} sent command: {:?}", client_id, cmd);

                                    if event_tx.send(DaemonEvent::ClientCommand(cmd)).await.is_err() {
                                        warn!("DaemonEvent channel closed");
                                        return;
                                    }
                                }
                                Ok(Some((_, consumed))) => {
                                    read_buf.drain(..consumed);
                                }
                                Ok(None) => break,
                                Err(e) => {
                                    warn!("Client {} sent a corrupt frame: {}", client_id, e);
                                    return;
                                }
                            }
                        }
                    }
                    Err(e) => {
                        error!("Read error from client {}: {}", client_id, e);
                        break;
                    }
                }
            }

            msg = broadcast_rx.recv() => {
                let encoded = match msg {
                    Ok(BroadcastMessage::StateUpdated) => encode_state(&session).await,
                    Ok(BroadcastMessage::Status(message)) => {
                        Message::Broadcast(Broadcast::Status { message }).encode()
                    }
                    Ok(BroadcastMessage::Log(message)) => {
                        Message::Broadcast(Broadcast::Log { message }).encode()
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("Client {} missed {} broadcast messages", client_id, n);
                        encode_state(&session).await
                    }
                    Err(_) => break,
                };
                if let Ok(encoded) = encoded {
                    if write_half.write_all(&encoded).await.is_err() {
                        break;
                    }
                }
            }
        }
    }
}

async fn encode_hello(session: &Session) -> anyhow::Result<Vec<u8>> {
    let state = session.snapshot().await;
    Message::Broadcast(Broadcast::Hello {
        protocol_version: PROTOCOL_VERSION,
        daemon_rev: state.rev,
        state,
    })
    .encode()
}

async fn encode_state(session: &Session) -> anyhow::Result<Vec<u8>> {
    let state = session.snapshot().await;
    Message::Broadcast(Broadcast::State { data: state }).encode()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeChat, FakeSink};
    use jukebox_proto::protocol::Command;
    use std::time::Duration;
    use tempfile::TempDir;

    async fn read_frame(stream: &mut TcpStream, buf: &mut Vec<u8>) -> Message {
        let mut tmp = [0u8; 4096];
        loop {
            if let Some((msg, consumed)) = Message::decode(buf).unwrap() {
                buf.drain(..consumed);
                return msg;
            }
            let n = stream.read(&mut tmp).await.unwrap();
            assert!(n > 0, "daemon closed the connection");
            buf.extend_from_slice(&tmp[..n]);
        }
    }

    #[tokio::test]
    async fn client_gets_hello_and_commands_are_forwarded() {
        let root = TempDir::new().unwrap();
        let (broadcast_tx, _) = broadcast::channel(16);
        let session = Arc::new(Session::new(
            "socket",
            root.path(),
            Arc::new(FakeSink::new()),
            Arc::new(FakeChat::new()),
            Duration::from_millis(10),
            broadcast_tx.clone(),
        ));
        let (event_tx, mut event_rx) = mpsc::channel(8);
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(serve(listener, session, event_tx, broadcast_tx.clone()));

        let mut client = TcpStream::connect(addr).await.unwrap();
        let mut buf = Vec::new();
        match read_frame(&mut client, &mut buf).await {
            Message::Broadcast(Broadcast::Hello {
                protocol_version, ..
            }) => assert_eq!(protocol_version, PROTOCOL_VERSION),
            other => panic!("expected Hello, got {:?}", other),
        }

        let frame = Message::Command(Command::Skip { arg: None }).encode().unwrap();
        client.write_all(&frame).await.unwrap();
        match event_rx.recv().await.unwrap() {
            DaemonEvent::ClientCommand(cmd) => assert_eq!(cmd, Command::Skip { arg: None }),
            other => panic!("unexpected {:?}", other),
        }

        broadcast_tx
            .send(BroadcastMessage::Status("Track skipped".into()))
            .unwrap();
        match read_frame(&mut client, &mut buf).await {
            Message::Broadcast(Broadcast::Status { message }) => {
                assert_eq!(message, "Track skipped")
            }
            other => panic!("expected Status, got {:?}", other),
        }
    }
}
