//! Replicated object registry
//!
//! A table from object id to transform and visual state. Every mutator takes
//! an [`Outbound`] sink: local calls pass the session sender so the change is
//! mirrored to every peer, received messages pass [`NoBroadcast`](crate::dispatcher::NoBroadcast).
//!
//! Updates for an id that is not live are dropped. Delivery is unordered
//! across senders, so an update can legitimately arrive before its spawn or
//! after its destroy; neither case is an error.

use crate::dispatcher::Outbound;
use log::{debug, warn};
use shared::{AudioClip, Material, MeshKind, Message, ObjectKind, Quat, Vec3};
use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("object '{0}' already exists")]
    DuplicateId(String),
}

/// Appearance of an object: a preset material or a resource loaded by name.
#[derive(Debug, Clone, PartialEq)]
pub enum Visual {
    Preset(Material),
    Resource(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ObjectRecord {
    pub id: String,
    pub kind: ObjectKind,
    pub position: Vec3,
    pub rotation: Quat,
    pub scale: Vec3,
    pub velocity: Vec3,
    pub angular_velocity: Vec3,
    pub visual: Visual,
    pub mesh: MeshKind,
    pub active: bool,
}

impl ObjectRecord {
    pub fn new(id: &str, kind: ObjectKind) -> Self {
        Self {
            id: id.to_string(),
            kind,
            position: Vec3::ZERO,
            rotation: Quat::IDENTITY,
            scale: Vec3::ONE,
            velocity: Vec3::ZERO,
            angular_velocity: Vec3::ZERO,
            visual: Visual::Preset(Material::Normal),
            mesh: MeshKind::Cube,
            active: true,
        }
    }
}

/// Engine side of the registry: rendering, physics and audio.
///
/// Called after the registry has updated its own record. Every method
/// defaults to doing nothing.
#[allow(unused_variables)]
pub trait SceneHooks {
    fn instantiate(&mut self, id: &str, kind: ObjectKind) {}
    fn release(&mut self, id: &str) {}
    fn transform_changed(&mut self, id: &str, record: &ObjectRecord) {}
    fn velocity(&mut self, id: &str, velocity: Vec3) {}
    fn angular_velocity(&mut self, id: &str, angular_velocity: Vec3) {}
    fn visual_changed(&mut self, id: &str, visual: &Visual) {}
    fn mesh_changed(&mut self, id: &str, mesh: MeshKind) {}
    fn active_changed(&mut self, id: &str, active: bool) {}
    fn play_clip(&mut self, id: &str, clip: AudioClip) {}
    fn stop_clip(&mut self, id: &str) {}
    fn show_gallery(&mut self) {}
    fn show_lobby(&mut self) {}
}

/// Hooks for a headless participant.
#[derive(Debug, Default)]
pub struct Headless;

impl SceneHooks for Headless {}

pub struct Registry {
    objects: HashMap<String, ObjectRecord>,
    hooks: Box<dyn SceneHooks>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    pub fn new() -> Self {
        Self::with_hooks(Box::new(Headless))
    }

    pub fn with_hooks(hooks: Box<dyn SceneHooks>) -> Self {
        Self {
            objects: HashMap::new(),
            hooks,
        }
    }

    pub fn get(&self, id: &str) -> Option<&ObjectRecord> {
        self.objects.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.objects.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Live object ids, sorted.
    pub fn ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.objects.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }

    /// Creates a record. A live id is rejected before anything is sent.
    pub fn spawn(
        &mut self,
        id: &str,
        kind: ObjectKind,
        out: &mut dyn Outbound,
    ) -> Result<(), RegistryError> {
        if self.objects.contains_key(id) {
            return Err(RegistryError::DuplicateId(id.to_string()));
        }

        out.send(Message::Spawn {
            object_id: id.to_string(),
            kind,
        });

        debug!("Spawned {} ({:?})", id, kind);
        self.objects.insert(id.to_string(), ObjectRecord::new(id, kind));
        self.hooks.instantiate(id, kind);
        Ok(())
    }

    /// Removes a record. Returns false if it was not live.
    pub fn destroy(&mut self, id: &str, out: &mut dyn Outbound) -> bool {
        out.send(Message::Destroy {
            object_id: id.to_string(),
        });

        if self.objects.remove(id).is_some() {
            debug!("Destroyed {}", id);
            self.hooks.release(id);
            true
        } else {
            false
        }
    }

    pub fn set_position(&mut self, id: &str, position: Vec3, out: &mut dyn Outbound) {
        out.send(Message::SetPosition {
            object_id: id.to_string(),
            position,
        });

        if let Some(record) = self.objects.get_mut(id) {
            record.position = position;
            self.hooks.transform_changed(id, record);
        }
    }

    pub fn set_rotation(&mut self, id: &str, rotation: Quat, out: &mut dyn Outbound) {
        out.send(Message::SetRotation {
            object_id: id.to_string(),
            rotation,
        });

        if let Some(record) = self.objects.get_mut(id) {
            record.rotation = rotation;
            self.hooks.transform_changed(id, record);
        }
    }

    pub fn set_scale(&mut self, id: &str, scale: Vec3, out: &mut dyn Outbound) {
        out.send(Message::SetScale {
            object_id: id.to_string(),
            scale,
        });

        if let Some(record) = self.objects.get_mut(id) {
            record.scale = scale;
            self.hooks.transform_changed(id, record);
        }
    }

    pub fn apply_velocity(&mut self, id: &str, velocity: Vec3, out: &mut dyn Outbound) {
        out.send(Message::ApplyVelocity {
            object_id: id.to_string(),
            velocity,
        });

        if let Some(record) = self.objects.get_mut(id) {
            record.velocity = velocity;
            self.hooks.velocity(id, velocity);
        }
    }

    pub fn apply_angular_velocity(
        &mut self,
        id: &str,
        angular_velocity: Vec3,
        out: &mut dyn Outbound,
    ) {
        out.send(Message::ApplyAngularVelocity {
            object_id: id.to_string(),
            angular_velocity,
        });

        if let Some(record) = self.objects.get_mut(id) {
            record.angular_velocity = angular_velocity;
            self.hooks.angular_velocity(id, angular_velocity);
        }
    }

    pub fn change_visual(&mut self, id: &str, material: Material, out: &mut dyn Outbound) {
        out.send(Message::ChangeVisual {
            object_id: id.to_string(),
            material,
        });
        self.set_visual(id, Visual::Preset(material));
    }

    pub fn load_visual(&mut self, id: &str, resource: &str, out: &mut dyn Outbound) {
        out.send(Message::LoadVisualByName {
            object_id: id.to_string(),
            resource: resource.to_string(),
        });
        self.set_visual(id, Visual::Resource(resource.to_string()));
    }

    fn set_visual(&mut self, id: &str, visual: Visual) {
        if let Some(record) = self.objects.get_mut(id) {
            self.hooks.visual_changed(id, &visual);
            record.visual = visual;
        }
    }

    pub fn change_mesh(&mut self, id: &str, mesh: MeshKind, out: &mut dyn Outbound) {
        out.send(Message::ChangeMesh {
            object_id: id.to_string(),
            mesh,
        });

        if let Some(record) = self.objects.get_mut(id) {
            record.mesh = mesh;
            self.hooks.mesh_changed(id, mesh);
        }
    }

    pub fn set_active(&mut self, id: &str, active: bool, out: &mut dyn Outbound) {
        out.send(Message::SetActive {
            object_id: id.to_string(),
            active,
        });

        if let Some(record) = self.objects.get_mut(id) {
            record.active = active;
            self.hooks.active_changed(id, active);
        }
    }

    /// Plays `clip` on the object `source_id`, if it is live.
    pub fn play_clip(&mut self, source_id: &str, clip: AudioClip, out: &mut dyn Outbound) {
        out.send(Message::PlayClip {
            source_id: source_id.to_string(),
            clip,
        });

        if self.objects.contains_key(source_id) {
            self.hooks.play_clip(source_id, clip);
        }
    }

    pub fn stop_clip(&mut self, source_id: &str, out: &mut dyn Outbound) {
        out.send(Message::StopClip {
            source_id: source_id.to_string(),
        });

        if self.objects.contains_key(source_id) {
            self.hooks.stop_clip(source_id);
        }
    }

    pub fn show_gallery(&mut self, out: &mut dyn Outbound) {
        out.send(Message::ShowGallery);
        self.hooks.show_gallery();
    }

    pub fn show_lobby(&mut self, out: &mut dyn Outbound) {
        out.send(Message::ShowLobby);
        self.hooks.show_lobby();
    }

    /// Applies a received object message without re-broadcasting it.
    ///
    /// Returns false for messages that are not object messages.
    pub fn apply(&mut self, message: Message) -> bool {
        let out: &mut dyn Outbound = &mut crate::dispatcher::NoBroadcast;

        match message {
            Message::Spawn { object_id, kind } => {
                // A replayed spawn for a live id must not duplicate the record
                if let Err(e) = self.spawn(&object_id, kind, out) {
                    warn!("Ignoring received spawn: {}", e);
                }
            }
            Message::Destroy { object_id } => {
                self.destroy(&object_id, out);
            }
            Message::SetPosition {
                object_id,
                position,
            } => self.set_position(&object_id, position, out),
            Message::SetRotation {
                object_id,
                rotation,
            } => self.set_rotation(&object_id, rotation, out),
            Message::SetScale { object_id, scale } => self.set_scale(&object_id, scale, out),
            Message::ApplyVelocity {
                object_id,
                velocity,
            } => self.apply_velocity(&object_id, velocity, out),
            Message::ApplyAngularVelocity {
                object_id,
                angular_velocity,
            } => self.apply_angular_velocity(&object_id, angular_velocity, out),
            Message::ChangeVisual {
                object_id,
                material,
            } => self.change_visual(&object_id, material, out),
            Message::LoadVisualByName {
                object_id,
                resource,
            } => self.load_visual(&object_id, &resource, out),
            Message::ChangeMesh { object_id, mesh } => self.change_mesh(&object_id, mesh, out),
            Message::SetActive { object_id, active } => {
                self.set_active(&object_id, active, out)
            }
            Message::PlayClip { source_id, clip } => self.play_clip(&source_id, clip, out),
            Message::StopClip { source_id } => self.stop_clip(&source_id, out),
            Message::ShowGallery => self.show_gallery(out),
            Message::ShowLobby => self.show_lobby(out),
            _ => return false,
        }

        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatcher::NoBroadcast;
    use assert_approx_eq::assert_approx_eq;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[derive(Clone, Default)]
    struct Recorder {
        calls: Rc<RefCell<Vec<String>>>,
    }

    impl SceneHooks for Recorder {
        fn instantiate(&mut self, id: &str, kind: ObjectKind) {
            self.calls.borrow_mut().push(format!("instantiate {} {:?}", id, kind));
        }

        fn release(&mut self, id: &str) {
            self.calls.borrow_mut().push(format!("release {}", id));
        }

        fn visual_changed(&mut self, id: &str, visual: &Visual) {
            self.calls.borrow_mut().push(format!("visual {} {:?}", id, visual));
        }

        fn play_clip(&mut self, id: &str, clip: AudioClip) {
            self.calls.borrow_mut().push(format!("play {} {:?}", id, clip));
        }
    }

    #[test]
    fn test_spawn_creates_default_record() {
        let mut registry = Registry::new();
        let mut out = Vec::new();

        registry.spawn("crate1", ObjectKind::Wardrobe, &mut out).unwrap();

        let record = registry.get("crate1").unwrap();
        assert_eq!(record.kind, ObjectKind::Wardrobe);
        assert_eq!(record.position, Vec3::ZERO);
        assert_eq!(record.rotation, Quat::IDENTITY);
        assert_eq!(record.scale, Vec3::ONE);
        assert_eq!(record.visual, Visual::Preset(Material::Normal));
        assert!(record.active);
        assert_eq!(
            out,
            vec![Message::Spawn {
                object_id: "crate1".to_string(),
                kind: ObjectKind::Wardrobe,
            }]
        );
    }

    #[test]
    fn test_duplicate_spawn_rejected_before_broadcast() {
        let mut registry = Registry::new();
        registry.spawn("a", ObjectKind::Bullet, &mut NoBroadcast).unwrap();

        let mut out = Vec::new();
        let result = registry.spawn("a", ObjectKind::Target, &mut out);

        assert_eq!(result, Err(RegistryError::DuplicateId("a".to_string())));
        assert!(out.is_empty());
        assert_eq!(registry.get("a").unwrap().kind, ObjectKind::Bullet);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_destroy_twice() {
        let mut registry = Registry::new();
        registry.spawn("a", ObjectKind::Bullet, &mut NoBroadcast).unwrap();

        assert!(registry.destroy("a", &mut NoBroadcast));
        assert!(!registry.destroy("a", &mut NoBroadcast));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_update_for_unknown_id_is_dropped() {
        let mut registry = Registry::new();
        registry.set_position("ghost", Vec3::splat(1.0), &mut NoBroadcast);
        registry.change_mesh("ghost", MeshKind::Sphere, &mut NoBroadcast);
        assert!(registry.get("ghost").is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_mutators_update_record() {
        let mut registry = Registry::new();
        let out: &mut dyn Outbound = &mut NoBroadcast;
        registry.spawn("p", ObjectKind::Player, out).unwrap();

        registry.set_position("p", Vec3::new(1.0, 2.0, 3.0), out);
        registry.set_rotation("p", Quat::from_yaw_degrees(90.0), out);
        registry.set_scale("p", Vec3::splat(0.2), out);
        registry.apply_velocity("p", Vec3::new(0.0, 1.0, 0.0), out);
        registry.apply_angular_velocity("p", Vec3::new(0.0, 0.0, 1.0), out);
        registry.change_mesh("p", MeshKind::Capsule, out);
        registry.set_active("p", false, out);

        let record = registry.get("p").unwrap();
        assert_eq!(record.position, Vec3::new(1.0, 2.0, 3.0));
        assert_approx_eq!(record.rotation.norm(), 1.0);
        assert_approx_eq!(record.scale.x, 0.2);
        assert_eq!(record.velocity, Vec3::new(0.0, 1.0, 0.0));
        assert_eq!(record.angular_velocity, Vec3::new(0.0, 0.0, 1.0));
        assert_eq!(record.mesh, MeshKind::Capsule);
        assert!(!record.active);
    }

    #[test]
    fn test_last_position_wins() {
        let mut registry = Registry::new();
        registry.spawn("p", ObjectKind::Player, &mut NoBroadcast).unwrap();

        let p1 = Message::SetPosition {
            object_id: "p".to_string(),
            position: Vec3::new(1.0, 0.0, 0.0),
        };
        let p2 = Message::SetPosition {
            object_id: "p".to_string(),
            position: Vec3::new(2.0, 0.0, 0.0),
        };
        registry.apply(p1.clone());
        registry.apply(p1);
        registry.apply(p2.clone());
        registry.apply(p2);

        assert_eq!(registry.get("p").unwrap().position, Vec3::new(2.0, 0.0, 0.0));
    }

    #[test]
    fn test_visual_variants() {
        let mut registry = Registry::new();
        let out: &mut dyn Outbound = &mut NoBroadcast;
        registry.spawn("p", ObjectKind::Player, out).unwrap();

        registry.load_visual("p", "Materials/Gold", out);
        assert_eq!(
            registry.get("p").unwrap().visual,
            Visual::Resource("Materials/Gold".to_string())
        );

        registry.change_visual("p", Material::Dead, out);
        assert_eq!(registry.get("p").unwrap().visual, Visual::Preset(Material::Dead));
    }

    #[test]
    fn test_hooks_follow_record_changes() {
        let recorder = Recorder::default();
        let calls = Rc::clone(&recorder.calls);
        let mut registry = Registry::with_hooks(Box::new(recorder));
        let out: &mut dyn Outbound = &mut NoBroadcast;

        registry.spawn("t", ObjectKind::Target, out).unwrap();
        registry.change_visual("t", Material::Collided, out);
        registry.play_clip("t", AudioClip::Success, out);
        registry.play_clip("missing", AudioClip::Fail, out);
        registry.destroy("t", out);

        assert_eq!(
            *calls.borrow(),
            vec![
                "instantiate t Target".to_string(),
                "visual t Preset(Collided)".to_string(),
                "play t Success".to_string(),
                "release t".to_string(),
            ]
        );
    }

    #[test]
    fn test_apply_ignores_game_flow() {
        let mut registry = Registry::new();
        assert!(!registry.apply(Message::EndPrelude));
        assert!(registry.apply(Message::ShowLobby));
    }

    #[test]
    fn test_ids_sorted() {
        let mut registry = Registry::new();
        let out: &mut dyn Outbound = &mut NoBroadcast;
        registry.spawn("b", ObjectKind::Bullet, out).unwrap();
        registry.spawn("a", ObjectKind::Bullet, out).unwrap();
        assert_eq!(registry.ids(), vec!["a", "b"]);
    }
}
