//! Scene documents: dense object and component tables plus resource arenas
//!
//! A [`Scene`] owns an array of object records, one dense
//! [`ComponentManager`] per component type in use, and per-kind resource
//! tables. Ids are dense indices into their owning table; destroyed records
//! keep their slot but carry the -1 sentinel and reject all further access.
//!
//! Lifecycle callbacks (see [`lifecycle`]) and subgraph merging
//! (see [`merge`]) are layered on top of the raw record operations here.

pub mod component;
pub mod lifecycle;
pub mod merge;
pub mod object;

use std::collections::HashMap;
use std::rc::Rc;

use thiserror::Error;

use crate::resources::{ResourceError, SceneResources};

pub use component::{
    ComponentBehavior, ComponentId, ComponentManager, ComponentRecord, ComponentRef,
    ComponentRegistry, ComponentType, ComponentTypeDecl, ComponentTypeId, DataBehavior, HookCtx,
    LifecycleFlags, LifecycleState, PropertyDescriptor, PropertyKind, PropertyValue,
};
pub use merge::{MergeError, MergeResult};
pub use object::{ObjectId, ObjectRecord};

/// Scene bookkeeping errors
#[derive(Debug, Clone, Error)]
pub enum SceneError {
    /// Access to a destroyed object record
    #[error("{0} has been destroyed")]
    ObjectDestroyed(ObjectId),

    /// Object id past the end of the table
    #[error("{0} out of range")]
    ObjectOutOfRange(ObjectId),

    /// Access to a destroyed component record
    #[error("component {id:?} of type #{} has been destroyed", .type_id.raw())]
    ComponentDestroyed {
        /// Manager the component lived in
        type_id: ComponentTypeId,
        /// Offending local id
        id: ComponentId,
    },

    /// Component id past the end of its manager
    #[error("component {id:?} of type #{} out of range", .type_id.raw())]
    ComponentOutOfRange {
        /// Manager the id was resolved against
        type_id: ComponentTypeId,
        /// Offending local id
        id: ComponentId,
    },

    /// No component type registered under this name
    #[error("unknown component type '{0}'")]
    UnknownComponentType(String),

    /// A named property does not exist on the target type
    #[error("component type '{type_name}' has no property '{property}'")]
    NoSuchProperty {
        /// Target component type
        type_name: String,
        /// Requested property name
        property: String,
    },

    /// Value tag does not match the declared property kind
    #[error("value does not match the declared kind of '{type_name}.{property}'")]
    PropertyTypeMismatch {
        /// Target component type
        type_name: String,
        /// Offending property name
        property: String,
    },

    /// Access to a destroyed scene slot
    #[error("scene #{} has been destroyed", .0.index())]
    SceneDestroyed(SceneId),

    /// Scene id past the end of the engine's scene list
    #[error("scene #{} out of range", .0.index())]
    SceneOutOfRange(SceneId),

    /// The currently active scene cannot be destroyed
    #[error("scene #{} is the active scene and cannot be destroyed", .0.index())]
    ActiveSceneDestroy(SceneId),

    /// Resource table access failure
    #[error(transparent)]
    Resource(#[from] ResourceError),
}

/// Index of a scene in the engine's scene list
///
/// Indices increase monotonically and are never reused, which is what makes
/// a streamed load's result index strictly greater than every earlier one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SceneId(u32);

impl SceneId {
    pub(crate) fn from_index(index: usize) -> Self {
        Self(index as u32)
    }

    /// Dense index into the engine's scene list
    pub fn index(self) -> usize {
        self.0 as usize
    }

    /// Raw value
    pub fn raw(self) -> u32 {
        self.0
    }
}

/// A scene document: objects, component managers, and resource tables
pub struct Scene {
    id: SceneId,
    name: String,
    objects: Vec<ObjectRecord>,
    managers: Vec<ComponentManager>,
    manager_index: HashMap<ComponentTypeId, usize>,
    resources: SceneResources,
}

impl Scene {
    pub(crate) fn new(id: SceneId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            objects: Vec::new(),
            managers: Vec::new(),
            manager_index: HashMap::new(),
            resources: SceneResources::new(),
        }
    }

    /// This scene's id
    pub fn id(&self) -> SceneId {
        self.id
    }

    /// Scene name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The per-kind resource tables
    pub fn resources(&self) -> &SceneResources {
        &self.resources
    }

    /// Mutable access to the resource tables
    pub fn resources_mut(&mut self) -> &mut SceneResources {
        &mut self.resources
    }

    // ---- objects -------------------------------------------------------

    /// Allocate a new object record
    ///
    /// `parent` may be [`ObjectId::NONE`] for a root object. The record is
    /// linked as the last child of its parent.
    pub fn create_object(
        &mut self,
        parent: ObjectId,
        name: Option<String>,
        enabled: bool,
    ) -> Result<ObjectId, SceneError> {
        if !parent.is_none() {
            self.object(parent)?;
        }
        let id = ObjectId::from_index(self.objects.len());
        self.objects.push(ObjectRecord {
            id,
            name,
            parent,
            children: Vec::new(),
            components: Vec::new(),
            enabled,
        });
        if let Some(index) = parent.index() {
            self.objects[index].children.push(id);
        }
        Ok(id)
    }

    /// Access a live object record
    pub fn object(&self, id: ObjectId) -> Result<&ObjectRecord, SceneError> {
        let index = id.index().ok_or(SceneError::ObjectDestroyed(id))?;
        match self.objects.get(index) {
            Some(record) if !record.is_destroyed() => Ok(record),
            Some(_) => Err(SceneError::ObjectDestroyed(id)),
            None => Err(SceneError::ObjectOutOfRange(id)),
        }
    }

    pub(crate) fn object_mut(&mut self, id: ObjectId) -> Result<&mut ObjectRecord, SceneError> {
        let index = id.index().ok_or(SceneError::ObjectDestroyed(id))?;
        match self.objects.get_mut(index) {
            Some(record) if !record.is_destroyed() => Ok(record),
            Some(_) => Err(SceneError::ObjectDestroyed(id)),
            None => Err(SceneError::ObjectOutOfRange(id)),
        }
    }

    /// Total object slot count, destroyed records included
    pub fn object_count(&self) -> usize {
        self.objects.len()
    }

    /// Ids of all live objects, in creation order
    pub fn live_objects(&self) -> impl Iterator<Item = ObjectId> + '_ {
        self.objects
            .iter()
            .filter(|record| !record.is_destroyed())
            .map(ObjectRecord::id)
    }

    /// Ids of all live root objects, in creation order
    pub fn root_objects(&self) -> Vec<ObjectId> {
        self.objects
            .iter()
            .filter(|record| !record.is_destroyed() && record.parent.is_none())
            .map(ObjectRecord::id)
            .collect()
    }

    /// Set an object's own requested-active flag
    ///
    /// Stored only; the derived effective activity is own flag AND the
    /// owning scene being the active one.
    pub fn set_object_enabled(&mut self, id: ObjectId, enabled: bool) -> Result<(), SceneError> {
        self.object_mut(id)?.enabled = enabled;
        Ok(())
    }

    /// Re-parent `child` as the last child of `parent` in a second pass
    /// after bulk creation (used by the document deserializer)
    pub(crate) fn attach_child(&mut self, parent: ObjectId, child: ObjectId) -> Result<(), SceneError> {
        self.object(parent)?;
        {
            let record = self.object_mut(child)?;
            debug_assert!(record.parent.is_none());
            record.parent = parent;
        }
        self.object_mut(parent)?.children.push(child);
        Ok(())
    }

    pub(crate) fn unlink_from_parent(&mut self, id: ObjectId) -> Result<(), SceneError> {
        let parent = self.object(id)?.parent;
        if let Some(parent_index) = parent.index() {
            if let Some(record) = self.objects.get_mut(parent_index) {
                record.children.retain(|&c| c != id);
            }
        }
        Ok(())
    }

    pub(crate) fn tombstone_object(&mut self, id: ObjectId) {
        if let Some(index) = id.index() {
            if let Some(record) = self.objects.get_mut(index) {
                record.id = ObjectId::NONE;
                record.children.clear();
                record.components.clear();
            }
        }
    }

    // ---- component managers -------------------------------------------

    /// Manager for a type, if any component of it was ever created here
    pub fn manager(&self, type_id: ComponentTypeId) -> Option<&ComponentManager> {
        self.manager_index
            .get(&type_id)
            .map(|&index| &self.managers[index])
    }

    pub(crate) fn manager_mut(&mut self, type_id: ComponentTypeId) -> Option<&mut ComponentManager> {
        self.manager_index
            .get(&type_id)
            .map(|&index| &mut self.managers[index])
    }

    /// All managers, in first-use order
    pub fn managers(&self) -> &[ComponentManager] {
        &self.managers
    }

    pub(crate) fn manager_for(&mut self, ty: &Rc<ComponentType>) -> usize {
        if let Some(&index) = self.manager_index.get(&ty.id) {
            return index;
        }
        let index = self.managers.len();
        self.managers.push(ComponentManager::new(Rc::clone(ty)));
        self.manager_index.insert(ty.id, index);
        index
    }

    /// Allocate a component record with its declared defaults
    ///
    /// No lifecycle callback runs here; see
    /// [`lifecycle::create_component`].
    pub(crate) fn create_component_record(
        &mut self,
        object: ObjectId,
        ty: &Rc<ComponentType>,
        marked_active: bool,
    ) -> Result<ComponentRef, SceneError> {
        self.object(object)?;
        let manager_slot = self.manager_for(ty);
        let manager = &mut self.managers[manager_slot];
        let id = ComponentId::from_index(manager.records.len());
        let mut flags = LifecycleFlags::empty();
        if marked_active {
            flags |= LifecycleFlags::MARKED_ACTIVE;
        }
        manager.records.push(ComponentRecord {
            id,
            object,
            flags,
            values: ty.default_values(),
        });
        let reference = ComponentRef { type_id: ty.id, id };
        self.object_mut(object)?.components.push(reference);
        Ok(reference)
    }

    /// Access a live component record
    pub fn component(&self, reference: ComponentRef) -> Result<&ComponentRecord, SceneError> {
        self.manager(reference.type_id)
            .ok_or(SceneError::ComponentOutOfRange {
                type_id: reference.type_id,
                id: reference.id,
            })?
            .record(reference.id)
    }

    pub(crate) fn component_mut(
        &mut self,
        reference: ComponentRef,
    ) -> Result<&mut ComponentRecord, SceneError> {
        self.manager_mut(reference.type_id)
            .ok_or(SceneError::ComponentOutOfRange {
                type_id: reference.type_id,
                id: reference.id,
            })?
            .record_mut(reference.id)
    }

    /// The type of a component
    pub fn component_type(&self, reference: ComponentRef) -> Result<Rc<ComponentType>, SceneError> {
        Ok(Rc::clone(
            &self
                .manager(reference.type_id)
                .ok_or(SceneError::ComponentOutOfRange {
                    type_id: reference.type_id,
                    id: reference.id,
                })?
                .ty,
        ))
    }

    // ---- properties ----------------------------------------------------

    /// Read a property value
    ///
    /// Fails on a destroyed component or an unknown property name; never
    /// returns stale data.
    pub fn property(&self, reference: ComponentRef, name: &str) -> Result<PropertyValue, SceneError> {
        let ty = self.component_type(reference)?;
        let record = self.component(reference)?;
        let index = ty.property_index(name).ok_or_else(|| SceneError::NoSuchProperty {
            type_name: ty.name.clone(),
            property: name.to_string(),
        })?;
        Ok(record.values[index].clone())
    }

    /// Write a property value, checking it against the declared kind
    pub fn set_property(
        &mut self,
        reference: ComponentRef,
        name: &str,
        value: PropertyValue,
    ) -> Result<(), SceneError> {
        let ty = self.component_type(reference)?;
        let index = ty.property_index(name).ok_or_else(|| SceneError::NoSuchProperty {
            type_name: ty.name.clone(),
            property: name.to_string(),
        })?;
        if !value.matches(ty.properties[index].kind) {
            return Err(SceneError::PropertyTypeMismatch {
                type_name: ty.name.clone(),
                property: name.to_string(),
            });
        }
        self.component_mut(reference)?.values[index] = value;
        Ok(())
    }

    /// Re-apply the declared defaults to a component's properties
    pub(crate) fn apply_defaults(&mut self, reference: ComponentRef) -> Result<(), SceneError> {
        let ty = self.component_type(reference)?;
        self.component_mut(reference)?.values = ty.default_values();
        Ok(())
    }

    /// Overwrite a component's full value layout (merge internal)
    pub(crate) fn set_values(
        &mut self,
        reference: ComponentRef,
        values: Vec<PropertyValue>,
    ) -> Result<(), SceneError> {
        let record = self.component_mut(reference)?;
        debug_assert_eq!(record.values.len(), values.len());
        record.values = values;
        Ok(())
    }

    /// Components of an object, cloned out for iteration while mutating
    pub fn components_of(&self, object: ObjectId) -> Result<Vec<ComponentRef>, SceneError> {
        Ok(self.object(object)?.components.clone())
    }
}

impl std::fmt::Debug for Scene {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scene")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("objects", &self.objects.len())
            .field("managers", &self.managers.len())
            .finish()
    }
}
