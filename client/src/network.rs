//! Client network layer: handshake, adaptive-cadence tick loop and simulated latency

use crate::flow_control::FlowState;
use crate::game::LocalPlayer;
use crate::input::InputSource;
use log::{debug, error, info, warn};
use shared::{
    read_packet, write_packet, CharacterState, ConnectionId, FlowControlConfig, MotorKind, Packet,
    SimulationConfig, PROTOCOL_VERSION,
};
use std::time::Duration;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, sleep_until, Instant, Interval, MissedTickBehavior};

pub type ClientError = Box<dyn std::error::Error + Send + Sync>;

/// Packet waiting in a delay line together with the instant it may pass
type Delayed = (Instant, Packet);

/// Settings that do not come from the server handshake
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Motor the caller insists on. `None` follows whatever the server runs.
    pub motor: Option<MotorKind>,
    pub flow: FlowControlConfig,
    /// Round-trip latency to simulate, split evenly between both directions
    pub fake_ping_ms: u64,
    /// Stop after this many local ticks
    pub max_ticks: Option<u64>,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            motor: None,
            flow: FlowControlConfig::default(),
            fake_ping_ms: 0,
            max_ticks: None,
        }
    }
}

/// Summary of one session, returned when the tick loop ends
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClientStats {
    pub inputs_sent: u64,
    pub results_received: u64,
    pub corrections: u64,
    pub cadence_changes: u64,
    /// Inputs sent but not yet acknowledged
    pub unconfirmed: usize,
    pub final_flow_state: FlowState,
    pub display_state: CharacterState,
    pub confirmed_state: CharacterState,
}

pub struct Client {
    client_id: ConnectionId,
    player: LocalPlayer,
    outbound: mpsc::UnboundedSender<Delayed>,
    inbound: mpsc::UnboundedReceiver<Packet>,
    writer: JoinHandle<()>,
    one_way_delay: Duration,
    max_ticks: Option<u64>,
    inputs_sent: u64,
    cadence_changes: u64,
}

impl Client {
    /// Connects, completes the handshake and starts the transport tasks
    ///
    /// Tick rate, update rate and motor are taken from the server so the
    /// local replay uses the same stepping function as the authority. A
    /// pinned motor that differs from the server's fails the handshake.
    pub async fn connect(
        server_addr: &str,
        input: Box<dyn InputSource>,
        options: ClientOptions,
    ) -> Result<Self, ClientError> {
        info!("Connecting to server at {}...", server_addr);
        let mut stream = TcpStream::connect(server_addr).await?;
        stream.set_nodelay(true)?;

        write_packet(
            &mut stream,
            &Packet::Connect {
                client_version: PROTOCOL_VERSION,
            },
        )
        .await?;

        let (client_id, config, motor, spawn) = match read_packet(&mut stream).await? {
            Some(Packet::Connected {
                client_id,
                tick_rate,
                update_rate,
                motor,
                spawn,
            }) => {
                if let Some(expected) = options.motor {
                    if expected != motor {
                        let _ = write_packet(&mut stream, &Packet::Disconnect).await;
                        return Err(format!(
                            "Motor mismatch: server runs {}, client expects {}",
                            motor, expected
                        )
                        .into());
                    }
                }

                let config = SimulationConfig {
                    tick_rate,
                    update_rate,
                    flow: options.flow,
                    ..Default::default()
                };
                config.validate()?;
                (client_id, config, motor, spawn)
            }
            Some(Packet::Disconnected { reason }) => {
                return Err(format!("Connection refused: {}", reason).into());
            }
            Some(other) => {
                return Err(format!("Unexpected handshake reply: {:?}", other).into());
            }
            None => return Err("Server closed the connection during handshake".into()),
        };

        info!(
            "Connected! Client ID: {} ({}Hz tick / {}Hz update, {} motor)",
            client_id, config.tick_rate, config.update_rate, motor
        );

        let one_way_delay = Duration::from_millis(options.fake_ping_ms / 2);
        let (read_half, write_half) = stream.into_split();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();

        let writer = spawn_writer(write_half, outbound_rx);
        spawn_reader(read_half, inbound_tx, one_way_delay);

        let player = LocalPlayer::new(&config, motor.build(), input, spawn);

        Ok(Client {
            client_id,
            player,
            outbound: outbound_tx,
            inbound: inbound_rx,
            writer,
            one_way_delay,
            max_ticks: options.max_ticks,
            inputs_sent: 0,
            cadence_changes: 0,
        })
    }

    pub fn client_id(&self) -> ConnectionId {
        self.client_id
    }

    pub fn player(&self) -> &LocalPlayer {
        &self.player
    }

    pub fn player_mut(&mut self) -> &mut LocalPlayer {
        &mut self.player
    }

    fn send(&self, packet: Packet) -> bool {
        let due = Instant::now() + self.one_way_delay;
        self.outbound.send((due, packet)).is_ok()
    }

    fn tick_interval(&self) -> Interval {
        let period = self.player.tick_interval();
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        ticker
    }

    /// Runs the local tick loop until the server goes away or `max_ticks` is reached
    pub async fn run(&mut self) -> Result<ClientStats, ClientError> {
        let mut ticker = self.tick_interval();

        loop {
            tokio::select! {
                packet = self.inbound.recv() => {
                    let Some(packet) = packet else {
                        info!("Server closed the connection");
                        break;
                    };

                    match packet {
                        Packet::Result(result) => {
                            if let Some(change) = self.player.on_result(&result) {
                                self.cadence_changes += 1;
                                info!(
                                    "Flow {} (depth {}): cadence {}Hz -> {}Hz",
                                    change.state, result.buffer_depth,
                                    change.previous_hz, change.cadence_hz
                                );
                                ticker = self.tick_interval();
                            }
                        }
                        Packet::Disconnected { reason } => {
                            warn!("Disconnected: {}", reason);
                            break;
                        }
                        _ => warn!("Unexpected packet type"),
                    }
                }

                _ = ticker.tick() => {
                    let input = self.player.step();
                    if !self.send(Packet::Input(input)) {
                        error!("Writer task stopped, ending session");
                        break;
                    }
                    self.inputs_sent += 1;

                    if self.max_ticks.is_some_and(|max| input.tick >= max) {
                        debug!("Reached tick limit {}", input.tick);
                        break;
                    }
                }
            }
        }

        Ok(self.stats())
    }

    /// Keeps reconciling until every sent input is acknowledged
    ///
    /// Stops early when no result arrives within `idle`.
    pub async fn drain(&mut self, idle: Duration) -> ClientStats {
        while !self.player.engine().unconfirmed().is_empty() {
            match tokio::time::timeout(idle, self.inbound.recv()).await {
                Ok(Some(Packet::Result(result))) => {
                    if self.player.on_result(&result).is_some() {
                        self.cadence_changes += 1;
                    }
                }
                Ok(Some(_)) => {}
                Ok(None) | Err(_) => break,
            }
        }
        self.stats()
    }

    /// Sends a disconnect notice and waits until the writer has flushed it
    pub async fn disconnect(self) {
        self.send(Packet::Disconnect);
        drop(self.outbound);
        if let Err(e) = self.writer.await {
            warn!("Writer task failed: {}", e);
        }
    }

    fn stats(&self) -> ClientStats {
        ClientStats {
            inputs_sent: self.inputs_sent,
            results_received: self.player.results_received(),
            corrections: self.player.engine().corrections(),
            cadence_changes: self.cadence_changes,
            unconfirmed: self.player.engine().unconfirmed().len(),
            final_flow_state: self.player.flow().state(),
            display_state: *self.player.display_state(),
            confirmed_state: *self.player.confirmed_state(),
        }
    }
}

/// Spawns task that holds each outbound packet until its due time, then writes it
fn spawn_writer(
    mut write_half: OwnedWriteHalf,
    mut outbound_rx: mpsc::UnboundedReceiver<Delayed>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some((due, packet)) = outbound_rx.recv().await {
            sleep_until(due).await;
            if let Err(e) = write_packet(&mut write_half, &packet).await {
                error!("Failed to send packet: {}", e);
                break;
            }
        }
    })
}

/// Spawns the socket reader and, with simulated latency, a delay stage behind it
///
/// Packets are stamped when read so a slow consumer never adds to the delay.
fn spawn_reader(
    mut read_half: OwnedReadHalf,
    inbound_tx: mpsc::UnboundedSender<Packet>,
    one_way_delay: Duration,
) {
    let (delay_tx, mut delay_rx) = mpsc::unbounded_channel::<Delayed>();

    tokio::spawn(async move {
        loop {
            match read_packet(&mut read_half).await {
                Ok(Some(packet)) => {
                    let due = Instant::now() + one_way_delay;
                    if delay_tx.send((due, packet)).is_err() {
                        break;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    warn!("Error reading from server: {}", e);
                    break;
                }
            }
        }
    });

    tokio::spawn(async move {
        while let Some((due, packet)) = delay_rx.recv().await {
            sleep_until(due).await;
            if inbound_tx.send(packet).is_err() {
                break;
            }
        }
    });
}
