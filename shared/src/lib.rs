//! Types shared by the relay and every participant: math values, the wire
//! codec, the message catalog and the relay envelope.

use serde::{Deserialize, Serialize};
use std::ops::{Add, Mul, Sub};

pub mod codec;
pub mod messages;

pub use codec::{DecodeError, EncodeError, PayloadReader, PayloadWriter};
pub use messages::{AudioClip, Material, MeshKind, Message, MessageType, ObjectKind};

pub const PROTOCOL_VERSION: u32 = 1;
pub const DEFAULT_PORT: u16 = 20602;
pub const MAX_DATAGRAM_SIZE: usize = 2048;
pub const HEARTBEAT_INTERVAL_MS: u64 = 1000;
pub const PEER_TIMEOUT_SECS: u64 = 5;

/// Peer id that means "nobody" (no master claimed yet).
pub const NO_PEER: i64 = 0;

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Default)]
pub struct Vec3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vec3 {
    pub const ZERO: Vec3 = Vec3::new(0.0, 0.0, 0.0);
    pub const ONE: Vec3 = Vec3::new(1.0, 1.0, 1.0);

    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    pub const fn splat(v: f32) -> Self {
        Self::new(v, v, v)
    }

    pub fn length(&self) -> f32 {
        (self.x * self.x + self.y * self.y + self.z * self.z).sqrt()
    }
}

impl Add for Vec3 {
    type Output = Vec3;

    fn add(self, rhs: Vec3) -> Vec3 {
        Vec3::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
    }
}

impl Sub for Vec3 {
    type Output = Vec3;

    fn sub(self, rhs: Vec3) -> Vec3 {
        Vec3::new(self.x - rhs.x, self.y - rhs.y, self.z - rhs.z)
    }
}

impl Mul<f32> for Vec3 {
    type Output = Vec3;

    fn mul(self, rhs: f32) -> Vec3 {
        Vec3::new(self.x * rhs, self.y * rhs, self.z * rhs)
    }
}

/// Rotation quaternion, stored and sent in x, y, z, w order.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq)]
pub struct Quat {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub w: f32,
}

impl Quat {
    pub const IDENTITY: Quat = Quat::new(0.0, 0.0, 0.0, 1.0);

    pub const fn new(x: f32, y: f32, z: f32, w: f32) -> Self {
        Self { x, y, z, w }
    }

    /// Rotation of `degrees` around the vertical (y) axis.
    pub fn from_yaw_degrees(degrees: f32) -> Self {
        let half = degrees.to_radians() / 2.0;
        Quat::new(0.0, half.sin(), 0.0, half.cos())
    }

    pub fn norm(&self) -> f32 {
        (self.x * self.x + self.y * self.y + self.z * self.z + self.w * self.w).sqrt()
    }
}

impl Default for Quat {
    fn default() -> Self {
        Quat::IDENTITY
    }
}

/// Envelope exchanged between a participant and the relay.
///
/// Message payloads travel opaquely inside `Broadcast`/`Forward`; the relay
/// never looks into them.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub enum Packet {
    Connect {
        client_version: u32,
    },
    Broadcast {
        sequence: u32,
        payload: Vec<u8>,
    },
    Heartbeat,
    Disconnect,

    Connected {
        peer_id: i64,
        peers: Vec<i64>,
    },
    Forward {
        sender: i64,
        sequence: u32,
        payload: Vec<u8>,
    },
    PeerJoined {
        peer_id: i64,
    },
    PeerLeft {
        peer_id: i64,
    },
    Disconnected {
        reason: String,
    },
}

/// True when `sequence` is newer than `last`, tolerating u32 wraparound.
pub fn sequence_newer(sequence: u32, last: u32) -> bool {
    let diff = sequence.wrapping_sub(last);
    diff != 0 && diff < u32::MAX / 2
}
