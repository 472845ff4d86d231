//! Types and stepping functions shared by the authority server and the predicting client
//!
//! Anything both roles must agree on bit-for-bit lives here: the input and
//! result model, the frame clock, the character motors used for both the
//! authoritative step and the client replay, configuration, and the wire
//! protocol.

pub mod clock;
pub mod config;
pub mod motor;
pub mod protocol;
pub mod types;

pub use clock::FrameClock;
pub use config::{
    Band, BufferTargetBand, ConfigError, FlowControlConfig, SimulationConfig, SubstepRounding,
};
pub use motor::{CharacterMotor, KinematicMotor, MotorKind, PlanarMotor};
pub use protocol::{read_packet, write_packet, Packet, ProtocolError, PROTOCOL_VERSION};
pub use types::{CharacterState, ClientInput, ConnectionId, ServerResult, Tick};
