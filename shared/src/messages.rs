//! Message type catalog and the typed messages carried in payloads.
//!
//! Every payload starts with the same header:
//!
//! ```text
//! +---------+----------------+----------------------+
//! | type u8 | sender i64 LE  | type-specific fields |
//! +---------+----------------+----------------------+
//! ```
//!
//! Type tags start at [`USER_MESSAGE_ID_START`]; the range below it belongs
//! to the transport. Ordinals are stable: new types are only appended.

use crate::codec::{DecodeError, EncodeError, PayloadReader, PayloadWriter};
use crate::{Quat, Vec3};

/// First tag available to application messages.
pub const USER_MESSAGE_ID_START: u8 = 134;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    ClaimMaster = USER_MESSAGE_ID_START,
    TargetReached,
    InitializeGame,
    TerminateGame,
    StartRound,
    EndPrelude,
    EndInterlude,
    EndRound,
    RoundInterval,
    PlayClip,
    StopClip,
    Spawn,
    Destroy,
    SetPosition,
    SetRotation,
    SetScale,
    ApplyVelocity,
    ApplyAngularVelocity,
    ChangeVisual,
    LoadVisualByName,
    ChangeMesh,
    SetActive,
    ShowGallery,
    ShowLobby,
}

impl MessageType {
    pub const ALL: [MessageType; 24] = [
        MessageType::ClaimMaster,
        MessageType::TargetReached,
        MessageType::InitializeGame,
        MessageType::TerminateGame,
        MessageType::StartRound,
        MessageType::EndPrelude,
        MessageType::EndInterlude,
        MessageType::EndRound,
        MessageType::RoundInterval,
        MessageType::PlayClip,
        MessageType::StopClip,
        MessageType::Spawn,
        MessageType::Destroy,
        MessageType::SetPosition,
        MessageType::SetRotation,
        MessageType::SetScale,
        MessageType::ApplyVelocity,
        MessageType::ApplyAngularVelocity,
        MessageType::ChangeVisual,
        MessageType::LoadVisualByName,
        MessageType::ChangeMesh,
        MessageType::SetActive,
        MessageType::ShowGallery,
        MessageType::ShowLobby,
    ];

    pub const COUNT: usize = Self::ALL.len();

    pub fn tag(self) -> u8 {
        self as u8
    }

    /// Position of this type in [`MessageType::ALL`], usable as a table index.
    pub fn index(self) -> usize {
        (self as u8 - USER_MESSAGE_ID_START) as usize
    }

    /// Maps a wire tag back to a type. Tags outside the catalog yield `None`.
    pub fn from_tag(tag: u8) -> Option<Self> {
        let index = tag.checked_sub(USER_MESSAGE_ID_START)? as usize;
        Self::ALL.get(index).copied()
    }

    /// Game-flow messages that only the master originates.
    pub fn is_game_flow(self) -> bool {
        matches!(
            self,
            MessageType::InitializeGame
                | MessageType::TerminateGame
                | MessageType::StartRound
                | MessageType::EndPrelude
                | MessageType::EndInterlude
                | MessageType::EndRound
                | MessageType::RoundInterval
        )
    }
}

/// Declares a catalog enum carried on the wire as an `i32` index.
macro_rules! wire_enum {
    ($(#[$meta:meta])* $name:ident, $label:literal { $($variant:ident = $value:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[repr(i32)]
        pub enum $name {
            $($variant = $value),+
        }

        impl $name {
            pub fn index(self) -> i32 {
                self as i32
            }
        }

        impl TryFrom<i32> for $name {
            type Error = DecodeError;

            fn try_from(value: i32) -> Result<Self, Self::Error> {
                match value {
                    $($value => Ok($name::$variant),)+
                    _ => Err(DecodeError::UnknownVariant { kind: $label, value }),
                }
            }
        }
    };
}

wire_enum!(
    /// Prefab an object is instantiated from.
    ObjectKind, "object kind" {
        Player = 0,
        Target = 1,
        Wardrobe = 2,
        Bullet = 3,
        Wardrobe2 = 4,
        Gallery = 5,
    }
);

wire_enum!(
    /// Preset materials; resources loaded by name are carried separately.
    Material, "material" {
        Normal = 0,
        GameMaster = 1,
        Dead = 2,
        Survived = 3,
        Collided = 4,
    }
);

wire_enum!(
    MeshKind, "mesh" {
        Cube = 0,
        Sphere = 1,
        Capsule = 2,
    }
);

wire_enum!(
    AudioClip, "audio clip" {
        Pop = 0,
        Success = 1,
        Fail = 2,
        Ribbit = 3,
        Dink = 4,
    }
);

#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    ClaimMaster,
    TargetReached {
        participant_id: i64,
    },
    InitializeGame,
    TerminateGame,
    StartRound {
        target_position: Vec3,
        target_rotation: Quat,
    },
    EndPrelude,
    EndInterlude,
    EndRound,
    RoundInterval,
    PlayClip {
        source_id: String,
        clip: AudioClip,
    },
    StopClip {
        source_id: String,
    },
    Spawn {
        object_id: String,
        kind: ObjectKind,
    },
    Destroy {
        object_id: String,
    },
    SetPosition {
        object_id: String,
        position: Vec3,
    },
    SetRotation {
        object_id: String,
        rotation: Quat,
    },
    SetScale {
        object_id: String,
        scale: Vec3,
    },
    ApplyVelocity {
        object_id: String,
        velocity: Vec3,
    },
    ApplyAngularVelocity {
        object_id: String,
        angular_velocity: Vec3,
    },
    ChangeVisual {
        object_id: String,
        material: Material,
    },
    LoadVisualByName {
        object_id: String,
        resource: String,
    },
    ChangeMesh {
        object_id: String,
        mesh: MeshKind,
    },
    SetActive {
        object_id: String,
        active: bool,
    },
    ShowGallery,
    ShowLobby,
}

impl Message {
    pub fn message_type(&self) -> MessageType {
        match self {
            Message::ClaimMaster => MessageType::ClaimMaster,
            Message::TargetReached { .. } => MessageType::TargetReached,
            Message::InitializeGame => MessageType::InitializeGame,
            Message::TerminateGame => MessageType::TerminateGame,
            Message::StartRound { .. } => MessageType::StartRound,
            Message::EndPrelude => MessageType::EndPrelude,
            Message::EndInterlude => MessageType::EndInterlude,
            Message::EndRound => MessageType::EndRound,
            Message::RoundInterval => MessageType::RoundInterval,
            Message::PlayClip { .. } => MessageType::PlayClip,
            Message::StopClip { .. } => MessageType::StopClip,
            Message::Spawn { .. } => MessageType::Spawn,
            Message::Destroy { .. } => MessageType::Destroy,
            Message::SetPosition { .. } => MessageType::SetPosition,
            Message::SetRotation { .. } => MessageType::SetRotation,
            Message::SetScale { .. } => MessageType::SetScale,
            Message::ApplyVelocity { .. } => MessageType::ApplyVelocity,
            Message::ApplyAngularVelocity { .. } => MessageType::ApplyAngularVelocity,
            Message::ChangeVisual { .. } => MessageType::ChangeVisual,
            Message::LoadVisualByName { .. } => MessageType::LoadVisualByName,
            Message::ChangeMesh { .. } => MessageType::ChangeMesh,
            Message::SetActive { .. } => MessageType::SetActive,
            Message::ShowGallery => MessageType::ShowGallery,
            Message::ShowLobby => MessageType::ShowLobby,
        }
    }

    /// Encodes the full payload: header followed by this message's fields.
    pub fn encode(&self, sender: i64) -> Result<Vec<u8>, EncodeError> {
        let mut writer = PayloadWriter::new();
        writer.write_u8(self.message_type().tag()).write_i64(sender);

        match self {
            Message::TargetReached { participant_id } => {
                writer.write_i64(*participant_id);
            }
            Message::StartRound {
                target_position,
                target_rotation,
            } => {
                writer
                    .write_vec3(*target_position)
                    .write_quat(*target_rotation);
            }
            Message::PlayClip { source_id, clip } => {
                writer.write_str(source_id).write_i32(clip.index());
            }
            Message::StopClip { source_id } => {
                writer.write_str(source_id);
            }
            Message::Spawn { object_id, kind } => {
                writer.write_str(object_id).write_i32(kind.index());
            }
            Message::Destroy { object_id } => {
                writer.write_str(object_id);
            }
            Message::SetPosition {
                object_id,
                position: value,
            }
            | Message::SetScale {
                object_id,
                scale: value,
            }
            | Message::ApplyVelocity {
                object_id,
                velocity: value,
            }
            | Message::ApplyAngularVelocity {
                object_id,
                angular_velocity: value,
            } => {
                writer.write_str(object_id).write_vec3(*value);
            }
            Message::SetRotation {
                object_id,
                rotation,
            } => {
                writer.write_str(object_id).write_quat(*rotation);
            }
            Message::ChangeVisual {
                object_id,
                material,
            } => {
                writer.write_str(object_id).write_i32(material.index());
            }
            Message::LoadVisualByName {
                object_id,
                resource,
            } => {
                writer.write_str(object_id).write_str(resource);
            }
            Message::ChangeMesh { object_id, mesh } => {
                writer.write_str(object_id).write_i32(mesh.index());
            }
            Message::SetActive { object_id, active } => {
                writer.write_str(object_id).write_i32(i32::from(*active));
            }
            Message::ClaimMaster
            | Message::InitializeGame
            | Message::TerminateGame
            | Message::EndPrelude
            | Message::EndInterlude
            | Message::EndRound
            | Message::RoundInterval
            | Message::ShowGallery
            | Message::ShowLobby => {}
        }

        writer.finish()
    }

    /// Decodes the fields that follow the header for a message of type `ty`.
    pub fn decode_body(
        ty: MessageType,
        reader: &mut PayloadReader<'_>,
    ) -> Result<Message, DecodeError> {
        let message = match ty {
            MessageType::ClaimMaster => Message::ClaimMaster,
            MessageType::TargetReached => Message::TargetReached {
                participant_id: reader.read_i64()?,
            },
            MessageType::InitializeGame => Message::InitializeGame,
            MessageType::TerminateGame => Message::TerminateGame,
            MessageType::StartRound => Message::StartRound {
                target_position: reader.read_vec3()?,
                target_rotation: reader.read_quat()?,
            },
            MessageType::EndPrelude => Message::EndPrelude,
            MessageType::EndInterlude => Message::EndInterlude,
            MessageType::EndRound => Message::EndRound,
            MessageType::RoundInterval => Message::RoundInterval,
            MessageType::PlayClip => Message::PlayClip {
                source_id: reader.read_string()?,
                clip: AudioClip::try_from(reader.read_i32()?)?,
            },
            MessageType::StopClip => Message::StopClip {
                source_id: reader.read_string()?,
            },
            MessageType::Spawn => Message::Spawn {
                object_id: reader.read_string()?,
                kind: ObjectKind::try_from(reader.read_i32()?)?,
            },
            MessageType::Destroy => Message::Destroy {
                object_id: reader.read_string()?,
            },
            MessageType::SetPosition => Message::SetPosition {
                object_id: reader.read_string()?,
                position: reader.read_vec3()?,
            },
            MessageType::SetRotation => Message::SetRotation {
                object_id: reader.read_string()?,
                rotation: reader.read_quat()?,
            },
            MessageType::SetScale => Message::SetScale {
                object_id: reader.read_string()?,
                scale: reader.read_vec3()?,
            },
            MessageType::ApplyVelocity => Message::ApplyVelocity {
                object_id: reader.read_string()?,
                velocity: reader.read_vec3()?,
            },
            MessageType::ApplyAngularVelocity => Message::ApplyAngularVelocity {
                object_id: reader.read_string()?,
                angular_velocity: reader.read_vec3()?,
            },
            MessageType::ChangeVisual => Message::ChangeVisual {
                object_id: reader.read_string()?,
                material: Material::try_from(reader.read_i32()?)?,
            },
            MessageType::LoadVisualByName => Message::LoadVisualByName {
                object_id: reader.read_string()?,
                resource: reader.read_string()?,
            },
            MessageType::ChangeMesh => Message::ChangeMesh {
                object_id: reader.read_string()?,
                mesh: MeshKind::try_from(reader.read_i32()?)?,
            },
            MessageType::SetActive => Message::SetActive {
                object_id: reader.read_string()?,
                active: reader.read_i32()? != 0,
            },
            MessageType::ShowGallery => Message::ShowGallery,
            MessageType::ShowLobby => Message::ShowLobby,
        };
        Ok(message)
    }

    /// Decodes a complete payload into `(sender, message)`.
    ///
    /// Returns `Ok(None)` for a tag outside the catalog so callers can ignore
    /// messages from newer peers.
    pub fn decode(payload: &[u8]) -> Result<Option<(i64, Message)>, DecodeError> {
        let mut reader = PayloadReader::new(payload);
        let Some(ty) = MessageType::from_tag(reader.read_u8()?) else {
            return Ok(None);
        };
        let sender = reader.read_i64()?;
        let message = Message::decode_body(ty, &mut reader)?;
        Ok(Some((sender, message)))
    }
}
