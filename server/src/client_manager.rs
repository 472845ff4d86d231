//! Transport-side bookkeeping for connected clients
//!
//! This module tracks the network half of every client session:
//! - Connection identity assignment and capacity enforcement
//! - The outbound packet queue feeding each connection's writer task
//! - Activity timestamps for idle timeout detection
//! - The reader task, stopped once the client is removed
//!
//! Simulation state (input buffers and authoritative poses) is owned by the
//! `AuthoritySystem`; the client manager only knows how to reach a client.

use log::{debug, info};
use shared::{ConnectionId, Packet};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::AbortHandle;

/// Idle time after which a client is considered gone
pub const CLIENT_TIMEOUT: Duration = Duration::from_secs(5);

/// Represents one connected client
///
/// Each client maintains:
/// - Connection metadata (ID, address, last activity)
/// - A sender into its dedicated writer task
/// - Whether its entity has been registered with the authority
#[derive(Debug)]
pub struct Client {
    /// Unique client identifier assigned by the server
    pub id: ConnectionId,
    /// Remote address, kept for logging
    pub addr: SocketAddr,
    /// Last time we received any packet from this client
    pub last_seen: Instant,
    /// True once the handshake completed and the entity exists
    pub registered: bool,
    outbound: mpsc::UnboundedSender<Packet>,
    reader: Option<AbortHandle>,
}

impl Client {
    /// Creates a new client with the given ID, address and outbound queue
    pub fn new(id: ConnectionId, addr: SocketAddr, outbound: mpsc::UnboundedSender<Packet>) -> Self {
        Self {
            id,
            addr,
            last_seen: Instant::now(),
            registered: false,
            outbound,
            reader: None,
        }
    }

    /// Queues a packet for the writer task
    ///
    /// Fire-and-forget: returns false only if the writer has already shut down.
    pub fn send(&self, packet: Packet) -> bool {
        self.outbound.send(packet).is_ok()
    }

    /// Stops the task reading from this client's socket
    fn stop_reader(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
    }

    /// Checks if the client has exceeded the connection timeout
    pub fn is_timed_out(&self, timeout: Duration) -> bool {
        self.last_seen.elapsed() > timeout
    }
}

/// Manages all connected clients
///
/// The ClientManager provides centralized control over client connections
/// and enforces server capacity limits. Client IDs start from 1 and are
/// never reused within a server run.
pub struct ClientManager {
    /// Connected clients indexed by their unique ID
    clients: HashMap<ConnectionId, Client>,
    /// Next available client ID for new connections
    next_client_id: ConnectionId,
    /// Maximum number of concurrent clients allowed
    max_clients: usize,
}

impl ClientManager {
    /// Creates a new client manager with the specified capacity limit
    pub fn new(max_clients: usize) -> Self {
        Self {
            clients: HashMap::new(),
            next_client_id: 1,
            max_clients,
        }
    }

    /// Attempts to add a new client connection
    ///
    /// Returns Some(client_id) if successful, None if server is at capacity.
    pub fn add_client(
        &mut self,
        addr: SocketAddr,
        outbound: mpsc::UnboundedSender<Packet>,
    ) -> Option<ConnectionId> {
        if self.clients.len() >= self.max_clients {
            return None;
        }

        let client_id = self.next_client_id;
        self.next_client_id += 1;

        info!("Client {} connected from {}", client_id, addr);
        self.clients
            .insert(client_id, Client::new(client_id, addr, outbound));

        Some(client_id)
    }

    /// Hands over the reader task so removal can stop it
    pub fn attach_reader(&mut self, client_id: ConnectionId, reader: AbortHandle) -> bool {
        match self.clients.get_mut(&client_id) {
            Some(client) => {
                client.reader = Some(reader);
                true
            }
            None => {
                reader.abort();
                false
            }
        }
    }

    /// Removes a client from the server
    ///
    /// Dropping the client drops its outbound sender, which ends its writer
    /// task once the queue is flushed. The reader task is aborted. Returns
    /// true if the client was found and removed.
    pub fn remove_client(&mut self, client_id: &ConnectionId) -> bool {
        if let Some(mut client) = self.clients.remove(client_id) {
            client.stop_reader();
            info!("Client {} disconnected", client.id);
            true
        } else {
            false
        }
    }

    pub fn get(&self, client_id: ConnectionId) -> Option<&Client> {
        self.clients.get(&client_id)
    }

    /// Refreshes the activity timestamp. Returns false for unknown clients.
    pub fn touch(&mut self, client_id: ConnectionId) -> bool {
        match self.clients.get_mut(&client_id) {
            Some(client) => {
                client.last_seen = Instant::now();
                true
            }
            None => false,
        }
    }

    /// Marks the client as having a registered entity
    pub fn mark_registered(&mut self, client_id: ConnectionId) -> bool {
        match self.clients.get_mut(&client_id) {
            Some(client) => {
                client.registered = true;
                true
            }
            None => false,
        }
    }

    pub fn is_registered(&self, client_id: ConnectionId) -> bool {
        self.clients
            .get(&client_id)
            .map_or(false, |client| client.registered)
    }

    /// Queues a packet for one client. Unknown or closed clients are ignored.
    pub fn send_to(&self, client_id: ConnectionId, packet: Packet) -> bool {
        match self.clients.get(&client_id) {
            Some(client) => client.send(packet),
            None => {
                debug!("Dropping packet for unknown client {}", client_id);
                false
            }
        }
    }

    /// Checks for and removes timed-out clients
    ///
    /// Each one is told why before its queue is closed. Returns the removed
    /// client IDs so the authority can discard their entities as well.
    pub fn check_timeouts(&mut self, timeout: Duration) -> Vec<ConnectionId> {
        let timed_out: Vec<ConnectionId> = self
            .clients
            .iter()
            .filter(|(_, client)| client.is_timed_out(timeout))
            .map(|(id, _)| *id)
            .collect();

        for client_id in &timed_out {
            info!("Client {} timed out", client_id);
            self.send_to(
                *client_id,
                Packet::Disconnected {
                    reason: "Timed out".to_string(),
                },
            );
            self.remove_client(client_id);
        }

        timed_out
    }

    /// Returns the number of currently connected clients
    pub fn len(&self) -> usize {
        self.clients.len()
    }

    /// Returns true if no clients are currently connected
    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}
