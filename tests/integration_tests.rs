//! Integration tests for the predicted client against the authoritative server
//!
//! These tests drive both halves together, in-process over simulated links
//! and over a real TCP loopback connection.

use client::flow_control::FlowState;
use client::game::LocalPlayer;
use client::input::{InputSource, RandomWalk, ScriptedInput};
use client::network::{Client, ClientOptions};
use assert_approx_eq::assert_approx_eq;
use client::prediction::PredictionEngine;
use server::authority::AuthoritySystem;
use server::network::Server;
use shared::{CharacterMotor, ClientInput, MotorKind, ServerResult, SimulationConfig, Tick};
use std::collections::VecDeque;
use std::time::Duration;
use tokio_test::assert_ok;

/// In-order link that delivers each message a fixed number of steps after it was sent
struct DelayLine<T> {
    delay: u64,
    queue: VecDeque<(u64, T)>,
}

impl<T> DelayLine<T> {
    fn new(delay: u64) -> Self {
        Self {
            delay,
            queue: VecDeque::new(),
        }
    }

    fn send(&mut self, now: u64, message: T) {
        self.queue.push_back((now + self.delay, message));
    }

    fn deliver(&mut self, now: u64) -> Vec<T> {
        let mut delivered = Vec::new();
        while self.queue.front().is_some_and(|(due, _)| *due <= now) {
            if let Some((_, message)) = self.queue.pop_front() {
                delivered.push(message);
            }
        }
        delivered
    }
}

fn strafe_right() -> Box<dyn InputSource> {
    Box::new(ScriptedInput::new(vec![ClientInput {
        horizontal: 1.0,
        ..Default::default()
    }]))
}

/// Runs one client against the authority, one update step per loop iteration
///
/// The client samples for `active_steps` steps; the loop then keeps running
/// until every result has been delivered.
fn run_session(
    authority: &mut AuthoritySystem,
    player: &mut LocalPlayer,
    id: u32,
    active_steps: u64,
    latency_steps: u64,
) {
    let mut uplink: DelayLine<ClientInput> = DelayLine::new(latency_steps);
    let mut downlink: DelayLine<ServerResult> = DelayLine::new(latency_steps);

    for step in 0..active_steps * 3 + latency_steps * 4 {
        if step < active_steps {
            let input = player.step();
            uplink.send(step, input);
        }

        for input in uplink.deliver(step) {
            authority.receive_input(id, input);
        }

        for (target, result) in authority.fixed_update() {
            if target == id {
                downlink.send(step, result);
            }
        }

        for result in downlink.deliver(step) {
            player.on_result(&result);
        }
    }
}

/// RECONCILIATION TESTS
mod reconciliation_tests {
    use super::*;

    /// Matching simulations never correct and end on the authoritative state
    #[test]
    fn prediction_converges_without_corrections() {
        let config = SimulationConfig::default();
        let mut authority =
            AuthoritySystem::new(config.clone(), MotorKind::Kinematic.build()).unwrap();
        authority.register(1);
        let spawn = *authority.state(1).unwrap();

        let mut player = LocalPlayer::new(
            &config,
            MotorKind::Kinematic.build(),
            Box::new(RandomWalk::new(42)),
            spawn,
        );

        run_session(&mut authority, &mut player, 1, 300, 6);

        assert_eq!(player.results_received(), 300);
        assert!(player.engine().unconfirmed().is_empty());
        assert_eq!(player.display_state(), authority.state(1).unwrap());
        assert_eq!(player.engine().corrections(), 0);
    }

    /// Server-only effects are corrected and the client still converges
    #[test]
    fn server_collision_corrects_prediction() {
        let config = SimulationConfig::default();
        let mut authority =
            AuthoritySystem::new(config.clone(), MotorKind::Kinematic.build()).unwrap();
        authority.register(1);
        authority.register(2);
        let spawn = *authority.state(1).unwrap();
        let blocker = *authority.state(2).unwrap();
        assert!(blocker.position.x > spawn.position.x);

        let mut player = LocalPlayer::new(
            &config,
            MotorKind::Kinematic.build(),
            strafe_right(),
            spawn,
        );

        run_session(&mut authority, &mut player, 1, 120, 4);

        let authoritative = authority.state(1).unwrap();
        assert!(player.engine().corrections() > 0);
        assert!(player.engine().unconfirmed().is_empty());
        // Idle sub-steps may still nudge the pair apart after the last result
        assert_approx_eq!(player.display_state().distance(authoritative), 0.0, 1e-3);
        assert!(authoritative.position.x < authority.state(2).unwrap().position.x);
    }

    /// Ticks [100, 101, 102] acknowledged up to 101 leave only 102 to replay
    #[test]
    fn partial_acknowledgement_replays_remaining_input() {
        let config = SimulationConfig::default();
        let motor = MotorKind::Planar.build();
        let mut authority =
            AuthoritySystem::new(config.clone(), MotorKind::Planar.build()).unwrap();
        authority.register(1);
        let spawn = *authority.state(1).unwrap();

        let mut engine = PredictionEngine::new(MotorKind::Planar.build(), spawn, config.update_dt());

        let inputs: Vec<ClientInput> = [100, 101, 102]
            .iter()
            .map(|&tick| ClientInput {
                vertical: 1.0,
                horizontal: 0.5,
                ..ClientInput::idle(tick, 0.0)
            })
            .collect();
        for input in &inputs {
            engine.record_input(*input);
            authority.receive_input(1, *input);
        }

        let results: Vec<ServerResult> = (0..2)
            .flat_map(|_| authority.substep())
            .map(|(_, result)| result)
            .collect();
        assert_eq!(results[1].tick, 101);
        engine.apply_result(&results[0]);
        engine.apply_result(&results[1]);

        let remaining: Vec<Tick> = engine.unconfirmed().iter().map(|i| i.tick).collect();
        assert_eq!(remaining, vec![102]);
        let expected = motor.advance(&results[1].state, &inputs[2], config.update_dt());
        assert_eq!(*engine.predicted_state(), expected);
    }
}

/// SERVER LOOP TESTS
mod server_loop_tests {
    use super::*;

    /// Consuming from a buffer of depth D reports D - 1
    #[test]
    fn reported_depth_is_depth_after_consumption() {
        for depth in 1..=12u64 {
            let mut authority =
                AuthoritySystem::new(SimulationConfig::default(), MotorKind::Planar.build())
                    .unwrap();
            authority.register(1);
            for tick in 1..=depth {
                authority.receive_input(1, ClientInput::idle(tick, 0.0));
            }

            let results = authority.substep();
            assert_eq!(results.len(), 1);
            assert_eq!(u64::from(results[0].1.buffer_depth), depth - 1);
        }
    }

    /// 30 Hz tick over 60 Hz update runs exactly two sub-steps per tick period
    #[test]
    fn two_substeps_per_tick_period() {
        let mut authority =
            AuthoritySystem::new(SimulationConfig::default(), MotorKind::Kinematic.build())
                .unwrap();
        authority.register(1);
        for tick in 1..=10 {
            authority.receive_input(1, ClientInput::idle(tick, 0.0));
        }

        // One tick period at 30 Hz spans two update steps at 60 Hz
        for period in 1..=3u64 {
            let results: Vec<_> = (0..2).flat_map(|_| authority.fixed_update()).collect();
            assert_eq!(results.len(), 2);
            assert_eq!(authority.current_tick(), period * 2);
        }
    }

    /// A starved entity produces nothing and keeps its state while others advance
    #[test]
    fn starvation_is_isolated_per_connection() {
        let mut authority =
            AuthoritySystem::new(SimulationConfig::default(), MotorKind::Planar.build())
                .unwrap();
        authority.register(1);
        authority.register(2);
        let idle_state = *authority.state(2).unwrap();

        for tick in 1..=4 {
            authority.receive_input(
                1,
                ClientInput {
                    vertical: 1.0,
                    ..ClientInput::idle(tick, 0.0)
                },
            );
        }

        let results = authority.run_tick();
        assert!(results.iter().all(|(id, _)| *id == 1));
        assert_eq!(*authority.state(2).unwrap(), idle_state);
    }
}

/// FLOW CONTROL TESTS
mod flow_control_tests {
    use super::*;

    /// A backlog slows the client down until the queue is back inside the band
    #[test]
    fn backlog_drains_through_slow_down() {
        let config = SimulationConfig::default();
        let mut authority =
            AuthoritySystem::new(config.clone(), MotorKind::Planar.build()).unwrap();
        authority.register(1);
        let spawn = *authority.state(1).unwrap();
        let mut player =
            LocalPlayer::new(&config, MotorKind::Planar.build(), strafe_right(), spawn);

        // Lag spike: a burst of inputs lands at once
        for _ in 0..14 {
            let input = player.step();
            authority.receive_input(1, input);
        }

        let server_period = 1.0 / f64::from(config.update_rate);
        let mut next_server = 0.0;
        let mut next_client = 0.0;
        let mut seen = Vec::new();

        let mut now = 0.0;
        while now < 6.0 {
            if now >= next_client {
                let input = player.step();
                authority.receive_input(1, input);
                next_client += player.tick_interval().as_secs_f64();
            }
            if now >= next_server {
                for (_, result) in authority.fixed_update() {
                    player.on_result(&result);
                    seen.push(player.flow().state());
                }
                next_server += server_period;
            }
            now += 0.001;
        }

        assert!(seen.contains(&FlowState::SlowDown));
        assert_eq!(seen.last(), Some(&FlowState::Normal));
        let depth = authority.buffer_depth(1).unwrap();
        assert!(depth <= 8, "queue still {} deep", depth);
    }
}

/// NETWORK TESTS
mod network_tests {
    use super::*;

    async fn start_server(max_clients: usize, motor: MotorKind) -> String {
        let mut server = Server::new(
            "127.0.0.1:0",
            SimulationConfig::default(),
            motor.build(),
            max_clients,
        )
        .await
        .unwrap();
        let addr = server.local_addr().unwrap().to_string();

        tokio::spawn(async move {
            let _ = server.run().await;
        });

        addr
    }

    /// Every input sent over TCP is answered and the client ends on the server's state
    #[tokio::test]
    async fn tcp_session_converges() {
        let addr = start_server(4, MotorKind::Kinematic).await;

        let options = ClientOptions {
            fake_ping_ms: 40,
            max_ticks: Some(60),
            ..Default::default()
        };
        let mut client = Client::connect(&addr, Box::new(ScriptedInput::patrol()), options)
            .await
            .unwrap();

        let sent = assert_ok!(client.run().await);
        assert_eq!(sent.inputs_sent, 60);

        let stats = client.drain(Duration::from_secs(2)).await;
        assert_eq!(stats.results_received, 60);
        assert_eq!(stats.unconfirmed, 0);
        assert_eq!(stats.display_state, stats.confirmed_state);

        client.disconnect().await;
    }

    /// Capacity is enforced at connection time
    #[tokio::test]
    async fn second_client_rejected_when_full() {
        let addr = start_server(1, MotorKind::Kinematic).await;

        let first = Client::connect(&addr, strafe_right(), ClientOptions::default())
            .await
            .unwrap();

        let second = Client::connect(&addr, strafe_right(), ClientOptions::default()).await;
        let message = second.err().unwrap().to_string();
        assert!(message.contains("Server full"), "unexpected error: {}", message);

        first.disconnect().await;
    }

    /// A default client replays with whichever motor the server announces
    #[tokio::test]
    async fn client_adopts_server_motor() {
        let addr = start_server(2, MotorKind::Planar).await;

        let options = ClientOptions {
            max_ticks: Some(30),
            ..Default::default()
        };
        let mut client = Client::connect(&addr, Box::new(ScriptedInput::patrol()), options)
            .await
            .unwrap();
        assert_eq!(client.player().engine().motor().kind(), MotorKind::Planar);

        assert_ok!(client.run().await);
        let stats = client.drain(Duration::from_secs(2)).await;
        assert_eq!(stats.results_received, 30);
        assert_eq!(stats.corrections, 0);
        assert_eq!(stats.display_state, stats.confirmed_state);

        client.disconnect().await;
    }

    /// Pinning a different motor than the server runs fails the handshake
    #[tokio::test]
    async fn pinned_motor_mismatch_is_rejected() {
        let addr = start_server(2, MotorKind::Planar).await;

        let options = ClientOptions {
            motor: Some(MotorKind::Kinematic),
            ..Default::default()
        };
        let result = Client::connect(&addr, strafe_right(), options).await;
        let message = result.err().unwrap().to_string();
        assert!(message.contains("Motor mismatch"), "unexpected error: {}", message);
    }
}
