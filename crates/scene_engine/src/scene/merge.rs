//! Subgraph cloning with resource retargeting
//!
//! Copies an object subgraph (with its components) from a source document
//! into a destination scene, re-pointing every reference along the way:
//! object references go through a source→destination id map, resource
//! references through the per-kind [`RemapTable`] built for the merge.
//!
//! The operation is two-phase. [`SubgraphSnapshot::capture`] walks the
//! source immutably and performs *all* validation: root liveness, handle
//! provenance, and (for distinct-document merges) subgraph-ownership of
//! object references. [`SubgraphSnapshot::apply`] then mutates the
//! destination. A merge that fails therefore fails before the destination
//! is touched.

use std::collections::HashMap;
use std::rc::Rc;

use thiserror::Error;

use crate::resources::{
    MergeKind, RemapTable, ResourceError, ResourceHandle, ResourceKind, ResourceRecord,
    SceneResources,
};
use crate::scene::component::{ComponentRef, ComponentType, LifecycleFlags, PropertyValue};
use crate::scene::lifecycle;
use crate::scene::object::ObjectId;
use crate::scene::{Scene, SceneError, SceneId};

/// Merge (retargeting) failures
///
/// Ownership variants name both scenes involved and are raised during
/// capture, before the destination is mutated.
#[derive(Debug, Clone, Error)]
pub enum MergeError {
    /// An object reference points outside the subgraph being merged, so
    /// the referenced object cannot belong to the document copy
    #[error(
        "{object} does not belong to the subgraph merged from scene #{} into scene #{}",
        .source_scene.index(), .dest.index()
    )]
    ObjectOwnership {
        /// The referenced object
        object: ObjectId,
        /// Scene supplying the subgraph
        source_scene: SceneId,
        /// Destination scene
        dest: SceneId,
    },

    /// A resource handle belongs to a different document than the one
    /// supplying the subgraph
    #[error(
        "{kind} handle {index} owned by scene #{} cannot be merged from scene #{} into scene #{}",
        .owner.index(), .source_scene.index(), .dest.index()
    )]
    ResourceOwnership {
        /// Table kind of the offending handle
        kind: ResourceKind,
        /// Slot index of the offending handle
        index: u32,
        /// Scene whose table issued the handle
        owner: SceneId,
        /// Scene supplying the subgraph
        source_scene: SceneId,
        /// Destination scene
        dest: SceneId,
    },

    /// Record access failure in the source or destination
    #[error(transparent)]
    Scene(#[from] SceneError),
}

impl From<ResourceError> for MergeError {
    fn from(error: ResourceError) -> Self {
        Self::Scene(SceneError::Resource(error))
    }
}

/// What a completed merge produced
#[derive(Debug)]
pub struct MergeResult {
    /// The new copy of the subgraph root
    pub root: ObjectId,
    /// Source object id → its new copy
    pub id_map: HashMap<ObjectId, ObjectId>,
    /// Every created object, in pre-order
    pub objects: Vec<ObjectId>,
    /// Every created component, in per-object pre-order
    pub components: Vec<ComponentRef>,
}

impl MergeResult {
    /// Re-key an out-of-band payload from source object ids to their copies
    ///
    /// Entries keyed by objects outside the merged subgraph are dropped.
    pub fn translate_keys<V>(&self, payload: HashMap<ObjectId, V>) -> HashMap<ObjectId, V> {
        payload
            .into_iter()
            .filter_map(|(key, value)| self.id_map.get(&key).map(|&new_key| (new_key, value)))
            .collect()
    }
}

/// A captured property value, with references lifted out for retargeting
#[derive(Debug, Clone)]
enum SnapValue {
    /// Scalar or null reference, copied through unchanged
    Plain(PropertyValue),
    /// Reference to subgraph member at this pre-order slot
    ObjectSlot(usize),
    /// Reference out of the subgraph, kept as-is (self-instantiation only)
    OutsideObject(ObjectId),
    /// Resource reference, index still in source terms
    Resource {
        kind: ResourceKind,
        index: u32,
    },
}

#[derive(Debug)]
struct SnapObject {
    source_id: ObjectId,
    name: Option<String>,
    enabled: bool,
    /// Pre-order slot of the parent; `None` for the subgraph root
    parent_slot: Option<usize>,
}

#[derive(Debug)]
struct SnapComponent {
    owner_slot: usize,
    ty: Rc<ComponentType>,
    marked_active: bool,
    values: Vec<SnapValue>,
}

/// An immutable, fully validated copy of a source subgraph
#[derive(Debug)]
pub(crate) struct SubgraphSnapshot {
    merge: MergeKind,
    objects: Vec<SnapObject>,
    components: Vec<SnapComponent>,
    /// Cloned source tables, appended on apply (distinct merges only)
    source_resources: Option<SceneResources>,
    /// Referenced player slots with their records, in first-reference order
    /// (self-instantiation only)
    players: Vec<(u32, ResourceRecord)>,
}

impl SubgraphSnapshot {
    /// Walk and validate the subgraph rooted at `root` in `source`, for a
    /// merge whose destination is `dest`
    pub(crate) fn capture(
        source: &Scene,
        root: ObjectId,
        dest: SceneId,
    ) -> Result<Self, MergeError> {
        let merge = if source.id() == dest {
            MergeKind::SelfInstantiate
        } else {
            MergeKind::DistinctDocument
        };

        // Pass 1: collect the subgraph pre-order, children in original
        // order, and build the membership map object refs resolve against.
        let mut objects = Vec::new();
        let mut membership: HashMap<ObjectId, usize> = HashMap::new();
        let mut stack = vec![(root, None::<usize>)];
        while let Some((id, parent_slot)) = stack.pop() {
            let record = source.object(id)?;
            let slot = objects.len();
            objects.push(SnapObject {
                source_id: id,
                name: record.name().map(str::to_string),
                enabled: record.enabled(),
                parent_slot,
            });
            membership.insert(id, slot);
            for &child in record.children().iter().rev() {
                stack.push((child, Some(slot)));
            }
        }

        // Pass 2: capture components, lifting references.
        let mut components = Vec::new();
        let mut players: Vec<(u32, ResourceRecord)> = Vec::new();
        for slot in 0..objects.len() {
            let object_id = objects[slot].source_id;
            for comp in source.components_of(object_id)? {
                let record = source.component(comp)?;
                let ty = source.component_type(comp)?;
                let mut values = Vec::with_capacity(record.values.len());
                for value in &record.values {
                    values.push(match value {
                        PropertyValue::Object(Some(target)) => {
                            if let Some(&target_slot) = membership.get(target) {
                                SnapValue::ObjectSlot(target_slot)
                            } else if merge == MergeKind::DistinctDocument {
                                return Err(MergeError::ObjectOwnership {
                                    object: *target,
                                    source_scene: source.id(),
                                    dest,
                                });
                            } else {
                                SnapValue::OutsideObject(*target)
                            }
                        }
                        PropertyValue::Resource(Some(handle)) => {
                            if handle.owner != source.id() {
                                return Err(MergeError::ResourceOwnership {
                                    kind: handle.kind,
                                    index: handle.index,
                                    owner: handle.owner,
                                    source_scene: source.id(),
                                    dest,
                                });
                            }
                            if merge == MergeKind::SelfInstantiate
                                && handle.kind.is_per_instance()
                                && !players.iter().any(|(index, _)| *index == handle.index)
                            {
                                let record =
                                    source.resources().table(handle.kind).get(handle.index)?;
                                players.push((handle.index, record.clone()));
                            }
                            SnapValue::Resource {
                                kind: handle.kind,
                                index: handle.index,
                            }
                        }
                        other => SnapValue::Plain(other.clone()),
                    });
                }
                components.push(SnapComponent {
                    owner_slot: slot,
                    ty,
                    marked_active: record.flags().contains(LifecycleFlags::MARKED_ACTIVE),
                    values,
                });
            }
        }

        let source_resources = match merge {
            MergeKind::DistinctDocument => Some(source.resources().clone()),
            MergeKind::SelfInstantiate => None,
        };
        Ok(Self {
            merge,
            objects,
            components,
            source_resources,
            players,
        })
    }

    /// Materialize the snapshot in `dest`, attached under `parent`
    /// ([`ObjectId::NONE`] for a new root object)
    ///
    /// Objects and component records are placed first; creation lifecycle
    /// callbacks then run in per-object pre-order over a fully built
    /// subgraph.
    pub(crate) fn apply(
        &self,
        dest: &mut Scene,
        dest_active: bool,
        parent: ObjectId,
    ) -> Result<MergeResult, MergeError> {
        if !parent.is_none() {
            dest.object(parent)?;
        }

        let mut dest_counts = [0u32; ResourceKind::COUNT];
        for kind in ResourceKind::ALL {
            dest_counts[kind as usize] = dest.resources().table(kind).count();
        }

        let mut player_map = HashMap::new();
        match (self.merge, &self.source_resources) {
            (MergeKind::DistinctDocument, Some(source_resources)) => {
                for kind in ResourceKind::ALL {
                    dest.resources_mut()
                        .table_mut(kind)
                        .append_table(source_resources.table(kind));
                }
            }
            _ => {
                for (source_index, record) in &self.players {
                    let fresh = dest
                        .resources_mut()
                        .table_mut(ResourceKind::AnimationPlayer)
                        .push(record.clone());
                    player_map.insert(*source_index, fresh);
                }
            }
        }
        let remap = RemapTable::for_merge(self.merge, &dest_counts, player_map);

        let mut new_ids = Vec::with_capacity(self.objects.len());
        let mut id_map = HashMap::with_capacity(self.objects.len());
        for snap in &self.objects {
            let new_parent = match snap.parent_slot {
                Some(slot) => new_ids[slot],
                None => parent,
            };
            let id = dest.create_object(new_parent, snap.name.clone(), snap.enabled)?;
            id_map.insert(snap.source_id, id);
            new_ids.push(id);
        }

        let mut created = Vec::with_capacity(self.components.len());
        for snap in &self.components {
            let owner = new_ids[snap.owner_slot];
            let comp = dest.create_component_record(owner, &snap.ty, snap.marked_active)?;
            let mut values = Vec::with_capacity(snap.values.len());
            for value in &snap.values {
                values.push(match value {
                    SnapValue::Plain(plain) => plain.clone(),
                    SnapValue::ObjectSlot(slot) => PropertyValue::Object(Some(new_ids[*slot])),
                    SnapValue::OutsideObject(id) => PropertyValue::Object(Some(*id)),
                    SnapValue::Resource { kind, index } => {
                        let new_index = remap.remap(*kind, *index)?;
                        PropertyValue::Resource(Some(ResourceHandle::new(
                            *kind, new_index,
                            dest.id(),
                        )))
                    }
                });
            }
            dest.set_values(comp, values)?;
            created.push(comp);
        }

        for &comp in &created {
            lifecycle::run_creation_callbacks(dest, dest_active, comp)?;
        }

        Ok(MergeResult {
            root: new_ids[0],
            id_map,
            objects: new_ids,
            components: created,
        })
    }
}
