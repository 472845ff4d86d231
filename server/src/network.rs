//! Server network layer: TCP transport and the scheduler that drives the authority

use crate::authority::{AuthoritySystem, Outgoing};
use crate::client_manager::{ClientManager, CLIENT_TIMEOUT};
use log::{debug, error, info, warn};
use shared::{
    read_packet, write_packet, CharacterMotor, ConnectionId, Packet, SimulationConfig,
    PROTOCOL_VERSION,
};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout};

pub type ServerError = Box<dyn std::error::Error + Send + Sync>;

/// How long a rejected connection is kept open for the peer to read the reason
const REJECT_LINGER: Duration = Duration::from_secs(1);

/// Messages sent from per-connection reader tasks to the main server loop
#[derive(Debug)]
pub enum ServerMessage {
    PacketReceived {
        client_id: ConnectionId,
        packet: Packet,
    },
    ConnectionClosed {
        client_id: ConnectionId,
    },
}

/// Main server coordinating the transport and the authoritative simulation
///
/// All simulation work happens on the task that calls `run`; reader and
/// writer tasks only move packets in and out.
pub struct Server {
    listener: TcpListener,
    clients: ClientManager,
    authority: AuthoritySystem,

    server_tx: mpsc::UnboundedSender<ServerMessage>,
    server_rx: mpsc::UnboundedReceiver<ServerMessage>,
}

impl Server {
    pub async fn new(
        addr: &str,
        config: SimulationConfig,
        motor: Box<dyn CharacterMotor>,
        max_clients: usize,
    ) -> Result<Self, ServerError> {
        let authority = AuthoritySystem::new(config, motor)?;

        let listener = TcpListener::bind(addr).await?;
        info!("Server listening on {}", listener.local_addr()?);

        let (server_tx, server_rx) = mpsc::unbounded_channel();

        Ok(Server {
            listener,
            clients: ClientManager::new(max_clients),
            authority,
            server_tx,
            server_rx,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn authority(&self) -> &AuthoritySystem {
        &self.authority
    }

    fn accept_connection(&mut self, stream: TcpStream, addr: SocketAddr) {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();

        let Some(client_id) = self.clients.add_client(addr, outbound_tx) else {
            warn!("Rejecting {}: server full", addr);
            tokio::spawn(async move {
                let mut stream = stream;
                let packet = Packet::Disconnected {
                    reason: "Server full".to_string(),
                };
                if let Err(e) = write_packet(&mut stream, &packet).await {
                    debug!("Failed to notify rejected client {}: {}", addr, e);
                    return;
                }

                // Closing with unread bytes would reset the connection before the
                // reason is read, so wait for the peer to hang up first
                let _ = stream.shutdown().await;
                let mut sink = [0u8; 256];
                let _ = timeout(REJECT_LINGER, async {
                    while let Ok(n) = stream.read(&mut sink).await {
                        if n == 0 {
                            break;
                        }
                    }
                })
                .await;
            });
            return;
        };

        if let Err(e) = stream.set_nodelay(true) {
            warn!("Failed to disable Nagle for client {}: {}", client_id, e);
        }

        let (read_half, write_half) = stream.into_split();
        let reader = Self::spawn_reader(client_id, read_half, self.server_tx.clone());
        self.clients.attach_reader(client_id, reader.abort_handle());
        Self::spawn_writer(client_id, write_half, outbound_rx);
    }

    /// Spawns task that forwards every framed packet from one client to the main loop
    fn spawn_reader(
        client_id: ConnectionId,
        mut read_half: OwnedReadHalf,
        server_tx: mpsc::UnboundedSender<ServerMessage>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                match read_packet(&mut read_half).await {
                    Ok(Some(packet)) => {
                        if server_tx
                            .send(ServerMessage::PacketReceived { client_id, packet })
                            .is_err()
                        {
                            return;
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        warn!("Error reading from client {}: {}", client_id, e);
                        break;
                    }
                }
            }

            let _ = server_tx.send(ServerMessage::ConnectionClosed { client_id });
        })
    }

    /// Spawns task that drains one client's outbound queue onto its socket
    fn spawn_writer(
        client_id: ConnectionId,
        mut write_half: OwnedWriteHalf,
        mut outbound_rx: mpsc::UnboundedReceiver<Packet>,
    ) {
        tokio::spawn(async move {
            while let Some(packet) = outbound_rx.recv().await {
                if let Err(e) = write_packet(&mut write_half, &packet).await {
                    error!("Failed to send packet to client {}: {}", client_id, e);
                    break;
                }
            }
        });
    }

    /// Processes one incoming packet from a known connection
    fn handle_packet(&mut self, client_id: ConnectionId, packet: Packet) {
        if !self.clients.touch(client_id) {
            debug!("Ignoring packet from removed client {}", client_id);
            return;
        }

        match packet {
            Packet::Connect { client_version } => {
                if client_version != PROTOCOL_VERSION {
                    warn!(
                        "Client {} speaks version {}, expected {}",
                        client_id, client_version, PROTOCOL_VERSION
                    );
                    self.clients.send_to(
                        client_id,
                        Packet::Disconnected {
                            reason: "Protocol version mismatch".to_string(),
                        },
                    );
                    self.disconnect_client(client_id);
                    return;
                }

                if self.clients.is_registered(client_id) {
                    warn!("Client {} sent a second connect", client_id);
                } else {
                    self.authority.register(client_id);
                    self.clients.mark_registered(client_id);
                }

                let config = self.authority.config();
                let response = Packet::Connected {
                    client_id,
                    tick_rate: config.tick_rate,
                    update_rate: config.update_rate,
                    motor: self.authority.motor_kind(),
                    spawn: self
                        .authority
                        .state(client_id)
                        .copied()
                        .unwrap_or_default(),
                };
                self.clients.send_to(client_id, response);
            }

            Packet::Input(input) => {
                self.authority.receive_input(client_id, input);
            }

            Packet::Disconnect => {
                self.disconnect_client(client_id);
            }

            _ => {
                warn!("Unexpected packet type from client {}", client_id);
            }
        }
    }

    /// Removes the connection and its entity, discarding any buffered inputs
    fn disconnect_client(&mut self, client_id: ConnectionId) {
        self.clients.remove_client(&client_id);
        self.authority.unregister(client_id);
    }

    fn dispatch_results(&self, outgoing: Vec<Outgoing>) {
        for (client_id, result) in outgoing {
            self.clients.send_to(client_id, Packet::Result(result));
        }
    }

    /// Main server loop coordinating all operations
    pub async fn run(&mut self) -> Result<(), ServerError> {
        let mut update_interval = interval(self.authority.config().update_interval());
        let mut timeout_interval = interval(Duration::from_secs(1));
        let report_every = u64::from(self.authority.config().update_rate) * 5;
        let mut updates: u64 = 0;

        info!("Server started successfully");

        loop {
            tokio::select! {
                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((stream, addr)) => self.accept_connection(stream, addr),
                        Err(e) => error!("Error accepting connection: {}", e),
                    }
                },

                message = self.server_rx.recv() => {
                    match message {
                        Some(ServerMessage::PacketReceived { client_id, packet }) => {
                            self.handle_packet(client_id, packet);
                        },
                        Some(ServerMessage::ConnectionClosed { client_id }) => {
                            self.disconnect_client(client_id);
                        },
                        None => {
                            info!("Server shutting down");
                            break;
                        }
                    }
                },

                _ = update_interval.tick() => {
                    let outgoing = self.authority.fixed_update();
                    self.dispatch_results(outgoing);

                    updates += 1;
                    if updates % report_every == 0 && !self.clients.is_empty() {
                        debug!(
                            "Tick {}: {} clients, {} entities",
                            self.authority.current_tick(),
                            self.clients.len(),
                            self.authority.connection_count()
                        );
                    }
                },

                _ = timeout_interval.tick() => {
                    for client_id in self.clients.check_timeouts(CLIENT_TIMEOUT) {
                        self.authority.unregister(client_id);
                    }
                },
            }
        }

        Ok(())
    }
}
