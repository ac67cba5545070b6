//! Binary scene document format
//!
//! A document is a 12-byte header followed by a sequence of chunks:
//!
//! ```text
//! header: magic  u32  = 0x454E4353 ("SCNE", little-endian)
//!         major  u16    format major version
//!         minor  u16    format minor version
//!         length u32    total chunk bytes after this header
//! chunk:  kind   u32
//!         length u32    payload bytes
//!         payload       RON, schema per kind
//! ```
//!
//! The stream machine ([`crate::stream`]) only sees the (kind, length)
//! framing; payload semantics live here. Chunk payloads are RON so
//! documents stay diffable while the framing stays fixed-size and
//! restartable.

use bytemuck::{Pod, Zeroable};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::resources::{ResourceHandle, ResourceKind, ResourceRecord};
use crate::scene::lifecycle;
use crate::scene::{
    ComponentRef, ComponentRegistry, ObjectId, PropertyValue, Scene, SceneError,
};

/// `"SCNE"` interpreted as a little-endian u32
pub const MAGIC: u32 = 0x454E4353;
/// Format major version written and accepted by this engine
pub const FORMAT_MAJOR: u16 = 1;
/// Format minor version written by this engine
pub const FORMAT_MINOR: u16 = 0;
/// Size of [`DocumentHeader`] on the wire
pub const HEADER_SIZE: usize = 12;
/// Size of [`ChunkHeader`] on the wire
pub const CHUNK_HEADER_SIZE: usize = 8;

/// Chunk kind: resource table entries
pub const CHUNK_RESOURCES: u32 = 1;
/// Chunk kind: object records
pub const CHUNK_OBJECTS: u32 = 2;
/// Chunk kind: component records
pub const CHUNK_COMPONENTS: u32 = 3;

/// Document format and deserialization errors
#[derive(Debug, Error)]
pub enum DocumentError {
    /// Header did not start with [`MAGIC`]
    #[error("bad magic 0x{0:08X}, expected 0x{MAGIC:08X} (\"SCNE\")")]
    BadMagic(u32),

    /// Document was written by an incompatible engine
    #[error(
        "unsupported format version {major}.{minor}, engine speaks \
         {FORMAT_MAJOR}.{FORMAT_MINOR}"
    )]
    VersionMismatch {
        /// Major version found in the header
        major: u16,
        /// Minor version found in the header
        minor: u16,
    },

    /// Chunk kind this engine does not know
    #[error("unknown chunk kind {0}")]
    UnknownChunk(u32),

    /// Chunk payload failed to parse
    #[error("malformed chunk payload: {0}")]
    Payload(#[from] ron::error::SpannedError),

    /// Chunk payload failed to serialize (builder side)
    #[error("chunk serialization failed: {0}")]
    Serialize(#[from] ron::Error),

    /// An entry referenced an object slot the document never declared
    #[error("entry references undeclared object slot {0}")]
    BadObjectSlot(i32),

    /// Scene population failure (unknown component type, bad property, …)
    #[error(transparent)]
    Scene(#[from] SceneError),
}

/// On-wire document header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
#[repr(C)]
pub struct DocumentHeader {
    /// Must equal [`MAGIC`]
    pub magic: u32,
    /// Format major version
    pub major: u16,
    /// Format minor version
    pub minor: u16,
    /// Total chunk bytes following this header
    pub total_length: u32,
}

/// On-wire chunk header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
#[repr(C)]
pub struct ChunkHeader {
    /// One of the `CHUNK_*` constants
    pub kind: u32,
    /// Payload byte length
    pub length: u32,
}

/// One framed chunk, as produced by the stream machine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// One of the `CHUNK_*` constants
    pub kind: u32,
    /// Raw payload bytes
    pub payload: Vec<u8>,
}

/// One resource table entry in a resources chunk
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceEntry {
    /// Which table the entry lands in
    pub kind: ResourceKind,
    /// Authoring-time name
    pub name: Option<String>,
}

/// One object record in an objects chunk
///
/// Objects are declared in creation order; `parent` is the slot of an
/// earlier entry, or -1 for a root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectEntry {
    /// Authoring-time name
    pub name: Option<String>,
    /// Parent slot, -1 for roots
    pub parent: i32,
    /// Own requested-active flag
    pub enabled: bool,
}

/// A property value on the wire
///
/// Object references are document-local slots; resource references are
/// (kind, index) pairs into the tables a resources chunk declared.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ValueEntry {
    /// Scalar number
    Number(f64),
    /// Scalar flag
    Bool(bool),
    /// String value
    Text(String),
    /// Object slot reference
    Object(i32),
    /// Null object reference
    NullObject,
    /// Resource reference
    Resource(ResourceKind, u32),
    /// Null resource reference
    NullResource,
}

/// One authored property in a component entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyEntry {
    /// Declared property name
    pub name: String,
    /// Authored value
    pub value: ValueEntry,
}

/// One component record in a components chunk
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentEntry {
    /// Registered component type name
    pub type_name: String,
    /// Owning object slot
    pub object: i32,
    /// Own requested-active flag
    pub active: bool,
    /// Authored values; unnamed properties keep their declared defaults
    pub values: Vec<PropertyEntry>,
}

/// A fully decoded document, ready to populate a scene
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DocumentData {
    /// Resource table entries, in declaration order
    pub resources: Vec<ResourceEntry>,
    /// Object records, in creation order
    pub objects: Vec<ObjectEntry>,
    /// Component records, in creation order
    pub components: Vec<ComponentEntry>,
}

/// Decode framed chunks into [`DocumentData`]
///
/// Later chunks of the same kind extend earlier ones, so a writer may
/// split large tables across chunks.
pub fn decode(chunks: &[Chunk]) -> Result<DocumentData, DocumentError> {
    let mut data = DocumentData::default();
    for chunk in chunks {
        match chunk.kind {
            CHUNK_RESOURCES => {
                let entries: Vec<ResourceEntry> = ron::de::from_bytes(&chunk.payload)?;
                data.resources.extend(entries);
            }
            CHUNK_OBJECTS => {
                let entries: Vec<ObjectEntry> = ron::de::from_bytes(&chunk.payload)?;
                data.objects.extend(entries);
            }
            CHUNK_COMPONENTS => {
                let entries: Vec<ComponentEntry> = ron::de::from_bytes(&chunk.payload)?;
                data.components.extend(entries);
            }
            other => return Err(DocumentError::UnknownChunk(other)),
        }
    }
    Ok(data)
}

impl DocumentData {
    /// Populate an empty scene from this document
    ///
    /// Objects are created first (parents resolved against earlier slots),
    /// then resources, then components through the full creation
    /// lifecycle. Returns the created components in creation order.
    pub fn populate(
        &self,
        scene: &mut Scene,
        registry: &ComponentRegistry,
        scene_active: bool,
    ) -> Result<Vec<ComponentRef>, DocumentError> {
        let mut object_ids = Vec::with_capacity(self.objects.len());
        for entry in &self.objects {
            let parent = resolve_slot(entry.parent, &object_ids)?;
            let id = scene.create_object(parent, entry.name.clone(), entry.enabled)?;
            object_ids.push(id);
        }

        for entry in &self.resources {
            let record = match &entry.name {
                Some(name) => ResourceRecord::named(name.clone()),
                None => ResourceRecord::default(),
            };
            scene.resources_mut().table_mut(entry.kind).push(record);
        }

        let mut created = Vec::with_capacity(self.components.len());
        for entry in &self.components {
            let ty = registry
                .get(&entry.type_name)
                .ok_or_else(|| SceneError::UnknownComponentType(entry.type_name.clone()))?;
            let object = resolve_slot(entry.object, &object_ids)?;
            if object.is_none() {
                return Err(DocumentError::BadObjectSlot(entry.object));
            }

            let mut values = Vec::with_capacity(entry.values.len());
            for property in &entry.values {
                let index = ty.property_index(&property.name).ok_or_else(|| {
                    SceneError::NoSuchProperty {
                        type_name: ty.name.clone(),
                        property: property.name.clone(),
                    }
                })?;
                let value = match &property.value {
                    ValueEntry::Number(n) => PropertyValue::Number(*n),
                    ValueEntry::Bool(b) => PropertyValue::Bool(*b),
                    ValueEntry::Text(s) => PropertyValue::Text(s.clone()),
                    ValueEntry::NullObject => PropertyValue::Object(None),
                    ValueEntry::Object(slot) => {
                        let target = resolve_slot(*slot, &object_ids)?;
                        if target.is_none() {
                            return Err(DocumentError::BadObjectSlot(*slot));
                        }
                        PropertyValue::Object(Some(target))
                    }
                    ValueEntry::NullResource => PropertyValue::Resource(None),
                    ValueEntry::Resource(kind, index) => {
                        // Handle must point into a declared slot.
                        scene.resources().table(*kind).get(*index).map_err(SceneError::from)?;
                        PropertyValue::Resource(Some(ResourceHandle::new(
                            *kind, *index,
                            scene.id(),
                        )))
                    }
                };
                if !value.matches(ty.properties[index].kind) {
                    return Err(SceneError::PropertyTypeMismatch {
                        type_name: ty.name.clone(),
                        property: property.name.clone(),
                    }
                    .into());
                }
                values.push((index, value));
            }

            let comp = lifecycle::create_component_with_values(
                scene,
                scene_active,
                &ty,
                object,
                entry.active,
                values,
            )?;
            created.push(comp);
        }
        Ok(created)
    }
}

fn resolve_slot(slot: i32, object_ids: &[ObjectId]) -> Result<ObjectId, DocumentError> {
    if slot < 0 {
        return Ok(ObjectId::NONE);
    }
    object_ids
        .get(slot as usize)
        .copied()
        .ok_or(DocumentError::BadObjectSlot(slot))
}

/// Byte-stream writer for documents; the encoding twin of [`decode`]
///
/// Used by authoring tools and tests to produce valid streams.
#[derive(Debug, Clone, Default)]
pub struct DocumentBuilder {
    data: DocumentData,
    version: (u16, u16),
}

impl DocumentBuilder {
    /// Builder for an empty document at the current format version
    pub fn new() -> Self {
        Self {
            data: DocumentData::default(),
            version: (FORMAT_MAJOR, FORMAT_MINOR),
        }
    }

    /// Override the header version (compatibility testing)
    pub fn with_version(mut self, major: u16, minor: u16) -> Self {
        self.version = (major, minor);
        self
    }

    /// Add a resource table entry
    pub fn resource(mut self, kind: ResourceKind, name: impl Into<String>) -> Self {
        self.data.resources.push(ResourceEntry {
            kind,
            name: Some(name.into()),
        });
        self
    }

    /// Add an object record; returns the builder (slots are sequential)
    pub fn object(mut self, name: Option<&str>, parent: i32, enabled: bool) -> Self {
        self.data.objects.push(ObjectEntry {
            name: name.map(str::to_string),
            parent,
            enabled,
        });
        self
    }

    /// Add a component record
    pub fn component(
        mut self,
        type_name: impl Into<String>,
        object: i32,
        active: bool,
        values: Vec<(&str, ValueEntry)>,
    ) -> Self {
        self.data.components.push(ComponentEntry {
            type_name: type_name.into(),
            object,
            active,
            values: values
                .into_iter()
                .map(|(name, value)| PropertyEntry {
                    name: name.to_string(),
                    value,
                })
                .collect(),
        });
        self
    }

    /// Serialize to the on-wire byte layout
    pub fn encode(&self) -> Result<Vec<u8>, DocumentError> {
        let mut chunks = Vec::new();
        if !self.data.resources.is_empty() {
            chunks.push((CHUNK_RESOURCES, ron::ser::to_string(&self.data.resources)?));
        }
        if !self.data.objects.is_empty() {
            chunks.push((CHUNK_OBJECTS, ron::ser::to_string(&self.data.objects)?));
        }
        if !self.data.components.is_empty() {
            chunks.push((CHUNK_COMPONENTS, ron::ser::to_string(&self.data.components)?));
        }

        let total: usize = chunks
            .iter()
            .map(|(_, payload)| CHUNK_HEADER_SIZE + payload.len())
            .sum();
        let header = DocumentHeader {
            magic: MAGIC,
            major: self.version.0,
            minor: self.version.1,
            total_length: total as u32,
        };

        let mut bytes = Vec::with_capacity(HEADER_SIZE + total);
        bytes.extend_from_slice(bytemuck::bytes_of(&header));
        for (kind, payload) in &chunks {
            let chunk_header = ChunkHeader {
                kind: *kind,
                length: payload.len() as u32,
            };
            bytes.extend_from_slice(bytemuck::bytes_of(&chunk_header));
            bytes.extend_from_slice(payload.as_bytes());
        }
        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::{
        ComponentTypeDecl, LifecycleState, PropertyDescriptor, PropertyKind, SceneId,
    };

    fn registry() -> ComponentRegistry {
        let mut registry = ComponentRegistry::new();
        registry
            .register(ComponentTypeDecl::data(
                "sprite",
                vec![
                    PropertyDescriptor::new("texture", PropertyKind::Resource(ResourceKind::Texture)),
                    PropertyDescriptor::new("anchor", PropertyKind::Object),
                    PropertyDescriptor::new("layer", PropertyKind::Number),
                ],
            ))
            .unwrap();
        registry
    }

    fn sample_builder() -> DocumentBuilder {
        DocumentBuilder::new()
            .resource(ResourceKind::Texture, "atlas")
            .object(Some("root"), -1, true)
            .object(Some("icon"), 0, true)
            .component(
                "sprite",
                1,
                true,
                vec![
                    ("texture", ValueEntry::Resource(ResourceKind::Texture, 0)),
                    ("anchor", ValueEntry::Object(0)),
                    ("layer", ValueEntry::Number(3.0)),
                ],
            )
    }

    #[test]
    fn test_header_layout_is_twelve_bytes() {
        assert_eq!(std::mem::size_of::<DocumentHeader>(), HEADER_SIZE);
        assert_eq!(std::mem::size_of::<ChunkHeader>(), CHUNK_HEADER_SIZE);

        let bytes = sample_builder().encode().unwrap();
        // "SCNE" little-endian.
        assert_eq!(&bytes[0..4], &[0x53, 0x43, 0x4E, 0x45]);
        let header: DocumentHeader = bytemuck::pod_read_unaligned(&bytes[..HEADER_SIZE]);
        assert_eq!(header.major, FORMAT_MAJOR);
        assert_eq!(header.total_length as usize, bytes.len() - HEADER_SIZE);
    }

    #[test]
    fn test_decode_rejects_unknown_chunk_kind() {
        let chunks = [Chunk {
            kind: 77,
            payload: b"[]".to_vec(),
        }];
        assert!(matches!(
            decode(&chunks),
            Err(DocumentError::UnknownChunk(77))
        ));
    }

    #[test]
    fn test_populate_builds_scene_with_lifecycle() {
        let registry = registry();
        let data = sample_builder().data;
        let mut scene = Scene::new(SceneId::from_index(0), "doc");

        let created = data.populate(&mut scene, &registry, true).unwrap();

        assert_eq!(scene.object_count(), 2);
        let root = scene.root_objects()[0];
        assert_eq!(scene.object(root).unwrap().name(), Some("root"));
        let icon = scene.object(root).unwrap().children()[0];
        assert_eq!(scene.object(icon).unwrap().name(), Some("icon"));

        let comp = created[0];
        assert_eq!(scene.component(comp).unwrap().state(), LifecycleState::Active);
        assert_eq!(
            scene.property(comp, "anchor").unwrap(),
            PropertyValue::Object(Some(root))
        );
        assert_eq!(
            scene.property(comp, "texture").unwrap(),
            PropertyValue::Resource(Some(ResourceHandle::new(
                ResourceKind::Texture,
                0,
                scene.id()
            )))
        );
    }

    #[test]
    fn test_populate_rejects_unknown_type_and_bad_slots() {
        let registry = registry();
        let mut scene = Scene::new(SceneId::from_index(0), "doc");
        let data = DocumentBuilder::new()
            .object(None, -1, true)
            .component("ghost", 0, true, vec![])
            .data;
        assert!(matches!(
            data.populate(&mut scene, &registry, false),
            Err(DocumentError::Scene(SceneError::UnknownComponentType(_)))
        ));

        let mut scene = Scene::new(SceneId::from_index(1), "doc");
        let data = DocumentBuilder::new()
            .object(None, 5, true)
            .data;
        assert!(matches!(
            data.populate(&mut scene, &registry, false),
            Err(DocumentError::BadObjectSlot(5))
        ));
    }

    #[test]
    fn test_populate_validates_resource_references() {
        let registry = registry();
        let mut scene = Scene::new(SceneId::from_index(0), "doc");
        let data = DocumentBuilder::new()
            .object(None, -1, true)
            .component(
                "sprite",
                0,
                false,
                vec![("texture", ValueEntry::Resource(ResourceKind::Texture, 4))],
            )
            .data;
        assert!(data.populate(&mut scene, &registry, false).is_err());
    }

    #[test]
    fn test_encode_decode_round_trip() {
        let builder = sample_builder();
        let bytes = builder.encode().unwrap();

        // Reframe by hand, the way the stream machine would.
        let mut chunks = Vec::new();
        let mut offset = HEADER_SIZE;
        while offset < bytes.len() {
            let header: ChunkHeader =
                bytemuck::pod_read_unaligned(&bytes[offset..offset + CHUNK_HEADER_SIZE]);
            offset += CHUNK_HEADER_SIZE;
            chunks.push(Chunk {
                kind: header.kind,
                payload: bytes[offset..offset + header.length as usize].to_vec(),
            });
            offset += header.length as usize;
        }

        let decoded = decode(&chunks).unwrap();
        assert_eq!(decoded, builder.data);
    }
}
