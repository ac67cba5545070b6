//! Resource tables, handles, and merge-time index remapping
//!
//! Every engine resource (mesh, material, texture, animation, skin,
//! animation player) lives in an arena-style [`ResourceTable`] with dense,
//! monotonically increasing slot indices. A [`ResourceHandle`] is only
//! meaningful against the table that issued it; copying an object graph into
//! another scene therefore translates every handle index through a
//! [`RemapTable`] built for that merge (see [`crate::scene::merge`]).

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::scene::SceneId;

/// Resource table errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResourceError {
    /// Index past the end of the table
    #[error("{kind} index {index} out of range")]
    OutOfRange {
        /// Table kind
        kind: ResourceKind,
        /// Offending index
        index: u32,
    },

    /// Access to a released slot
    #[error("{kind} {index} has been destroyed")]
    Destroyed {
        /// Table kind
        kind: ResourceKind,
        /// Offending index
        index: u32,
    },

    /// Index missing from a merge remap table
    #[error("{kind} index {index} has no remap entry")]
    Unmapped {
        /// Table kind
        kind: ResourceKind,
        /// Offending index
        index: u32,
    },
}

/// The kinds of resource table a scene carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResourceKind {
    /// Vertex/index geometry
    Mesh,
    /// Surface description
    Material,
    /// Image data
    Texture,
    /// Keyframe animation clip
    Animation,
    /// Skeleton binding
    Skin,
    /// Per-instance animation sampling state
    AnimationPlayer,
}

impl ResourceKind {
    /// Number of resource kinds
    pub const COUNT: usize = 6;

    /// All kinds, in table order
    pub const ALL: [Self; Self::COUNT] = [
        Self::Mesh,
        Self::Material,
        Self::Texture,
        Self::Animation,
        Self::Skin,
        Self::AnimationPlayer,
    ];

    /// Whether this kind is shared engine-wide rather than per document
    ///
    /// Shared kinds (meshes, materials, textures) back every document that
    /// references them; document-local kinds (animations, skins) persist
    /// across merges but belong to one document.
    pub fn is_shared(self) -> bool {
        matches!(self, Self::Mesh | Self::Material | Self::Texture)
    }

    /// Whether this kind is freshly allocated per placed instance
    pub fn is_per_instance(self) -> bool {
        matches!(self, Self::AnimationPlayer)
    }
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Mesh => "mesh",
            Self::Material => "material",
            Self::Texture => "texture",
            Self::Animation => "animation",
            Self::Skin => "skin",
            Self::AnimationPlayer => "animation player",
        };
        f.write_str(name)
    }
}

/// Opaque (kind, index) pair tagged with the scene that issued it
///
/// The `owner` tag is provenance only: merge validation uses it to reject
/// handles that belong to a different document than the one supplying a
/// subgraph, before anything is mutated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ResourceHandle {
    /// Which table the index points into
    pub kind: ResourceKind,
    /// Slot index within the owning table
    pub index: u32,
    /// Scene whose table issued this handle
    pub owner: SceneId,
}

impl ResourceHandle {
    /// Create a handle against the given scene's table
    pub fn new(kind: ResourceKind, index: u32, owner: SceneId) -> Self {
        Self { kind, index, owner }
    }
}

/// Payload of a resource slot
///
/// The core only bookkeeps resources; their heavy data lives behind the
/// native runtime boundary, so a record is little more than a label.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourceRecord {
    /// Authoring-time name, if any
    pub name: Option<String>,
}

impl ResourceRecord {
    /// Create a named record
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
        }
    }
}

/// Arena-style table with monotonically increasing slot indices
///
/// Released slots are tombstoned, never reused: `count()` therefore only
/// grows, which is what the merge offset math relies on.
#[derive(Debug, Clone)]
pub struct ResourceTable<T> {
    kind: ResourceKind,
    slots: Vec<Option<T>>,
}

impl<T> ResourceTable<T> {
    /// Create an empty table for the given kind
    pub fn new(kind: ResourceKind) -> Self {
        Self {
            kind,
            slots: Vec::new(),
        }
    }

    /// Kind of resource stored here
    pub fn kind(&self) -> ResourceKind {
        self.kind
    }

    /// Total slot count, tombstones included
    pub fn count(&self) -> u32 {
        self.slots.len() as u32
    }

    /// Number of live (non-released) slots
    pub fn live_count(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    /// Append a record, returning its slot index
    pub fn push(&mut self, value: T) -> u32 {
        let index = self.slots.len() as u32;
        self.slots.push(Some(value));
        index
    }

    /// Access a live slot
    pub fn get(&self, index: u32) -> Result<&T, ResourceError> {
        match self.slots.get(index as usize) {
            Some(Some(value)) => Ok(value),
            Some(None) => Err(ResourceError::Destroyed {
                kind: self.kind,
                index,
            }),
            None => Err(ResourceError::OutOfRange {
                kind: self.kind,
                index,
            }),
        }
    }

    /// Mutable access to a live slot
    pub fn get_mut(&mut self, index: u32) -> Result<&mut T, ResourceError> {
        match self.slots.get_mut(index as usize) {
            Some(Some(value)) => Ok(value),
            Some(None) => Err(ResourceError::Destroyed {
                kind: self.kind,
                index,
            }),
            None => Err(ResourceError::OutOfRange {
                kind: self.kind,
                index,
            }),
        }
    }

    /// Tombstone a slot, returning its record
    ///
    /// The index is never reused; later accessors fail with
    /// [`ResourceError::Destroyed`].
    pub fn release(&mut self, index: u32) -> Result<T, ResourceError> {
        match self.slots.get_mut(index as usize) {
            Some(slot) => slot.take().ok_or(ResourceError::Destroyed {
                kind: self.kind,
                index,
            }),
            None => Err(ResourceError::OutOfRange {
                kind: self.kind,
                index,
            }),
        }
    }

    /// Raw slot view, tombstones included; used by merge copying
    pub fn raw_slots(&self) -> &[Option<T>] {
        &self.slots
    }
}

impl<T: Clone> ResourceTable<T> {
    /// Append every slot of `other` slot-for-slot, tombstones preserved
    ///
    /// Preserving tombstones keeps the copy positional: source index `i`
    /// lands at `self.count()` (pre-append) `+ i`.
    pub fn append_table(&mut self, other: &Self) {
        self.slots.extend(other.slots.iter().cloned());
    }
}

/// The full set of per-scene resource tables, one per [`ResourceKind`]
#[derive(Debug, Clone)]
pub struct SceneResources {
    tables: [ResourceTable<ResourceRecord>; ResourceKind::COUNT],
}

impl SceneResources {
    /// Create empty tables for every kind
    pub fn new() -> Self {
        Self {
            tables: [
                ResourceTable::new(ResourceKind::Mesh),
                ResourceTable::new(ResourceKind::Material),
                ResourceTable::new(ResourceKind::Texture),
                ResourceTable::new(ResourceKind::Animation),
                ResourceTable::new(ResourceKind::Skin),
                ResourceTable::new(ResourceKind::AnimationPlayer),
            ],
        }
    }

    /// Table for the given kind
    pub fn table(&self, kind: ResourceKind) -> &ResourceTable<ResourceRecord> {
        &self.tables[kind as usize]
    }

    /// Mutable table for the given kind
    pub fn table_mut(&mut self, kind: ResourceKind) -> &mut ResourceTable<ResourceRecord> {
        &mut self.tables[kind as usize]
    }
}

impl Default for SceneResources {
    fn default() -> Self {
        Self::new()
    }
}

/// Whether a merge re-enters the document the data already lives in, or
/// brings a distinct document's subgraph across
///
/// This single bit decides which resource kinds are offset during
/// retargeting, so it is computed once (source scene == destination scene)
/// and then drives the explicit policy table in [`RemapTable::for_merge`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeKind {
    /// Source and destination are different documents
    DistinctDocument,
    /// A document's own subgraph is re-entered into itself
    SelfInstantiate,
}

/// How one resource kind's indices translate during a merge
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemapPolicy {
    /// `index + offset`: the destination's pre-merge count for this kind
    Offset(u32),
    /// Index is already valid in the destination
    Identity,
    /// Explicit per-index mapping (freshly allocated per-instance slots)
    Map(HashMap<u32, u32>),
}

/// Per-kind index translation for one merge operation
///
/// Remapping is a pure function over `(kind, index)` once the table is
/// built, which keeps the error-prone offset rules independently testable.
#[derive(Debug, Clone)]
pub struct RemapTable {
    policies: [RemapPolicy; ResourceKind::COUNT],
}

impl RemapTable {
    /// Build the policy table for a merge
    ///
    /// * `DistinctDocument`: every kind offsets by the destination's
    ///   pre-merge count (the source tables are appended slot-for-slot).
    /// * `SelfInstantiate`: the backing stores are already shared, so every
    ///   kind is identity except per-instance kinds, which receive the
    ///   fresh-slot mapping in `player_map`.
    pub fn for_merge(
        merge: MergeKind,
        dest_counts: &[u32; ResourceKind::COUNT],
        player_map: HashMap<u32, u32>,
    ) -> Self {
        let mut policies: [RemapPolicy; ResourceKind::COUNT] =
            std::array::from_fn(|_| RemapPolicy::Identity);
        for kind in ResourceKind::ALL {
            policies[kind as usize] = match merge {
                MergeKind::DistinctDocument => RemapPolicy::Offset(dest_counts[kind as usize]),
                MergeKind::SelfInstantiate if kind.is_per_instance() => {
                    RemapPolicy::Map(player_map.clone())
                }
                MergeKind::SelfInstantiate => RemapPolicy::Identity,
            };
        }
        Self { policies }
    }

    /// Translate one index
    pub fn remap(&self, kind: ResourceKind, index: u32) -> Result<u32, ResourceError> {
        match &self.policies[kind as usize] {
            RemapPolicy::Offset(offset) => Ok(index + offset),
            RemapPolicy::Identity => Ok(index),
            RemapPolicy::Map(map) => map
                .get(&index)
                .copied()
                .ok_or(ResourceError::Unmapped { kind, index }),
        }
    }

    /// Policy chosen for a kind (inspection/tests)
    pub fn policy(&self, kind: ResourceKind) -> &RemapPolicy {
        &self.policies[kind as usize]
    }
}
