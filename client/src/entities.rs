//! Entity stream parsing and the in-memory scene delta.
//!
//! The entity service speaks a simpler dialect than the domain handshake:
//! one mutation record per datagram, discriminated by its leading byte, with
//! little-endian numeric fields. The scene delta keeps the authoritative
//! entity map plus changelists that the renderer drains once per frame.

use bytes::Buf;
use glam::{Quat, Vec3};
use num_enum::TryFromPrimitive;
use rustc_hash::FxHashMap;
use tracing::debug;

use protocol::stream::try_get_u8;
use protocol::WireError;

pub const RECORD_ADD: u8 = 0x10;
pub const RECORD_EDIT: u8 = 0x11;
pub const RECORD_ERASE: u8 = 0x12;
pub const RECORD_BULK_DATA: u8 = 0x41;

pub const EDIT_POSITION: u8 = 0x01;
pub const EDIT_ROTATION: u8 = 0x02;
pub const EDIT_DIMENSIONS: u8 = 0x04;

#[derive(Clone, Copy, Eq, PartialEq, Hash, Debug, TryFromPrimitive)]
#[repr(u8)]
pub enum EntityKind {
    Unknown = 0,
    Box = 1,
    Sphere = 2,
    Model = 3,
    Shape = 4,
    Light = 5,
    Text = 6,
    Zone = 7,
    Web = 8,
    ParticleEffect = 9,
    Line = 10,
    PolyLine = 11,
    Grid = 12,
    Gizmo = 13,
    Material = 14,
}

#[derive(Clone, Debug, PartialEq)]
pub struct EntityRecord {
    pub id: u64,
    pub name: String,
    pub position: Vec3,
    pub rotation: Quat,
    pub dimensions: Vec3,
    pub model_ref: String,
    pub texture_ref: String,
    /// RGB, 0..1 range.
    pub color: Vec3,
    pub kind: EntityKind,
    pub alpha: f32,
}

/// What a single ingested datagram did to the scene.
#[derive(Clone, Copy, Eq, PartialEq, Debug)]
pub enum Applied {
    Upserted(u64),
    Edited(u64),
    Erased(u64),
    /// Unknown record kind, or a mutation for an id the scene never saw.
    Ignored,
}

#[derive(Default)]
pub struct EntityStream {
    entities: FxHashMap<u64, EntityRecord>,
    updated: Vec<u64>,
    deleted: Vec<u64>,
}

impl EntityStream {
    pub fn new() -> EntityStream {
        EntityStream::default()
    }

    pub fn entities(&self) -> &FxHashMap<u64, EntityRecord> {
        &self.entities
    }

    pub fn get(&self, id: u64) -> Option<&EntityRecord> {
        self.entities.get(&id)
    }

    /// Applies one mutation record. A truncated record is discarded without
    /// touching the scene; an unknown record kind is logged and ignored so
    /// new server-side kinds cannot desynchronize the client.
    pub fn ingest(&mut self, datagram: &[u8]) -> Result<Applied, WireError> {
        let mut buf = datagram;
        let kind = try_get_u8(&mut buf, "record kind")?;
        match kind {
            RECORD_ADD | RECORD_BULK_DATA => self.apply_add(&mut buf),
            RECORD_EDIT => self.apply_edit(&mut buf),
            RECORD_ERASE => self.apply_erase(&mut buf),
            other => {
                debug!("ignoring entity record with unknown kind {:#04x}", other);
                Ok(Applied::Ignored)
            }
        }
    }

    /// Used by simulation mode to place entities without wire traffic.
    pub fn seed(&mut self, record: EntityRecord) {
        let id = record.id;
        self.entities.insert(id, record);
        self.updated.push(id);
    }

    /// Drains the updated-entity changelist, returning snapshots. Empty when
    /// nothing changed since the last call - never an error.
    pub fn consume_updated_entities(&mut self) -> Vec<EntityRecord> {
        let ids = std::mem::take(&mut self.updated);
        ids.into_iter()
            .filter_map(|id| self.entities.get(&id).cloned())
            .collect()
    }

    /// Drains the deleted-id changelist.
    pub fn consume_deleted_entity_ids(&mut self) -> Vec<u64> {
        std::mem::take(&mut self.deleted)
    }

    fn apply_add(&mut self, buf: &mut impl Buf) -> Result<Applied, WireError> {
        let id = take_u64_le(buf, "entity id")?;
        let mut name = take_cstr(buf);
        let position = take_vec3(buf, "position")?;
        let rotation = take_quat(buf, "rotation")?;
        let dimensions = take_vec3(buf, "dimensions")?;
        let model_ref = take_cstr(buf);
        let texture_ref = take_cstr(buf);
        let color = take_vec3(buf, "color")?;
        let kind = if buf.has_remaining() {
            EntityKind::try_from(buf.get_u8()).unwrap_or(EntityKind::Box)
        } else {
            EntityKind::Box
        };

        if name.is_empty() {
            name = format!("Entity_{}", id);
        }

        self.entities.insert(
            id,
            EntityRecord {
                id,
                name,
                position,
                rotation,
                dimensions,
                model_ref,
                texture_ref,
                color,
                kind,
                alpha: 1.0,
            },
        );
        self.updated.push(id);
        Ok(Applied::Upserted(id))
    }

    fn apply_edit(&mut self, buf: &mut impl Buf) -> Result<Applied, WireError> {
        let id = take_u64_le(buf, "entity id")?;
        let flags = try_get_u8(buf, "edit flags")?;

        // fields follow in this fixed order, each present only if flagged;
        // parse them all before deciding whether the id is known
        let position = (flags & EDIT_POSITION != 0)
            .then(|| take_vec3(buf, "position"))
            .transpose()?;
        let rotation = (flags & EDIT_ROTATION != 0)
            .then(|| take_quat(buf, "rotation"))
            .transpose()?;
        let dimensions = (flags & EDIT_DIMENSIONS != 0)
            .then(|| take_vec3(buf, "dimensions"))
            .transpose()?;

        let Some(entity) = self.entities.get_mut(&id) else {
            debug!("edit for unknown entity {}, ignoring", id);
            return Ok(Applied::Ignored);
        };
        if let Some(position) = position {
            entity.position = position;
        }
        if let Some(rotation) = rotation {
            entity.rotation = rotation;
        }
        if let Some(dimensions) = dimensions {
            entity.dimensions = dimensions;
        }
        self.updated.push(id);
        Ok(Applied::Edited(id))
    }

    fn apply_erase(&mut self, buf: &mut impl Buf) -> Result<Applied, WireError> {
        let id = take_u64_le(buf, "entity id")?;
        if self.entities.remove(&id).is_some() {
            self.deleted.push(id);
            Ok(Applied::Erased(id))
        } else {
            debug!("erase for unknown entity {}, ignoring", id);
            Ok(Applied::Ignored)
        }
    }
}

fn take_u64_le(buf: &mut impl Buf, what: &'static str) -> Result<u64, WireError> {
    if buf.remaining() < 8 {
        return Err(WireError::Truncated(what));
    }
    Ok(buf.get_u64_le())
}

fn take_f32_le(buf: &mut impl Buf, what: &'static str) -> Result<f32, WireError> {
    if buf.remaining() < 4 {
        return Err(WireError::Truncated(what));
    }
    Ok(buf.get_f32_le())
}

fn take_vec3(buf: &mut impl Buf, what: &'static str) -> Result<Vec3, WireError> {
    Ok(Vec3::new(
        take_f32_le(buf, what)?,
        take_f32_le(buf, what)?,
        take_f32_le(buf, what)?,
    ))
}

/// Rotations travel as x,y,z,w.
fn take_quat(buf: &mut impl Buf, what: &'static str) -> Result<Quat, WireError> {
    let x = take_f32_le(buf, what)?;
    let y = take_f32_le(buf, what)?;
    let z = take_f32_le(buf, what)?;
    let w = take_f32_le(buf, what)?;
    Ok(Quat::from_xyzw(x, y, z, w))
}

/// Null-terminated string; end-of-buffer terminates too, so a name that
/// runs to the end of a record still parses.
fn take_cstr(buf: &mut impl Buf) -> String {
    let mut bytes = Vec::new();
    while buf.has_remaining() {
        let b = buf.get_u8();
        if b == 0 {
            break;
        }
        bytes.push(b);
    }
    String::from_utf8_lossy(&bytes).into_owned()
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    /// Serializes an add record the way the entity service does.
    pub fn add_record(
        id: u64,
        name: &str,
        position: [f32; 3],
        rotation: [f32; 4],
        dimensions: [f32; 3],
        model_ref: &str,
        texture_ref: &str,
        color: [f32; 3],
        kind: Option<u8>,
    ) -> Vec<u8> {
        let mut out = vec![RECORD_ADD];
        out.extend_from_slice(&id.to_le_bytes());
        out.extend_from_slice(name.as_bytes());
        out.push(0);
        for f in position {
            out.extend_from_slice(&f.to_le_bytes());
        }
        for f in rotation {
            out.extend_from_slice(&f.to_le_bytes());
        }
        for f in dimensions {
            out.extend_from_slice(&f.to_le_bytes());
        }
        out.extend_from_slice(model_ref.as_bytes());
        out.push(0);
        out.extend_from_slice(texture_ref.as_bytes());
        out.push(0);
        for f in color {
            out.extend_from_slice(&f.to_le_bytes());
        }
        if let Some(kind) = kind {
            out.push(kind);
        }
        out
    }

    pub fn chair_record() -> Vec<u8> {
        add_record(
            12345,
            "Chair",
            [1.0, 2.0, 3.0],
            [0.0, 0.0, 0.0, 1.0],
            [0.5, 0.5, 0.5],
            "",
            "",
            [1.0, 0.0, 0.0],
            Some(1),
        )
    }
}
