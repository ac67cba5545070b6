//! Component types, property descriptors, and the component registry
//!
//! Component types are declared once, as a closed, ordered list of tagged
//! property descriptors plus a lifecycle behavior, and resolved at
//! registration time into a fixed layout. Instances are plain records in a
//! dense per-scene [`ComponentManager`]; there is no runtime reflection.

use std::collections::HashMap;
use std::rc::Rc;

use bitflags::bitflags;

use crate::resources::{ResourceHandle, ResourceKind};
use crate::scene::object::ObjectId;
use crate::scene::{Scene, SceneError};

/// Identifier of a registered component type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ComponentTypeId(pub(crate) u32);

impl ComponentTypeId {
    /// Raw index into the registry
    pub fn raw(self) -> u32 {
        self.0
    }
}

/// Dense component identifier within one manager
///
/// Like [`ObjectId`], a destroyed record's id becomes the -1 sentinel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ComponentId(i32);

impl ComponentId {
    /// The destroyed/none sentinel (-1)
    pub const NONE: Self = Self(-1);

    pub(crate) fn from_index(index: usize) -> Self {
        Self(index as i32)
    }

    /// Raw signed value
    pub fn raw(self) -> i32 {
        self.0
    }

    /// Dense index, unless this is the sentinel
    pub fn index(self) -> Option<usize> {
        (self.0 >= 0).then_some(self.0 as usize)
    }
}

/// (manager, local id) pair; globally unique within an engine instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ComponentRef {
    /// The component's type (which selects the manager)
    pub type_id: ComponentTypeId,
    /// Local id within that manager
    pub id: ComponentId,
}

bitflags! {
    /// Per-component lifecycle flag word
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct LifecycleFlags: u8 {
        /// `init` has run
        const INITIALIZED = 1 << 0;
        /// `start` has run (at most once, ever)
        const STARTED = 1 << 1;
        /// The component's own requested-active flag
        const MARKED_ACTIVE = 1 << 2;
        /// Currently effectively active (own flag AND scene active)
        const ACTIVE = 1 << 3;
        /// `on_destroy` has run; all further access fails
        const DESTROYED = 1 << 4;
    }
}

/// Reportable lifecycle state, derived from [`LifecycleFlags`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    /// Record exists, `init` not yet run
    Constructed,
    /// `init` has run, `start` has not
    Initialized,
    /// Started but not currently active
    Inactive,
    /// Started and effectively active
    Active,
    /// `on_destroy` has run
    Destroyed,
}

impl LifecycleFlags {
    /// Derive the reportable state
    pub fn state(self) -> LifecycleState {
        if self.contains(Self::DESTROYED) {
            LifecycleState::Destroyed
        } else if self.contains(Self::ACTIVE) {
            LifecycleState::Active
        } else if self.contains(Self::STARTED) {
            LifecycleState::Inactive
        } else if self.contains(Self::INITIALIZED) {
            LifecycleState::Initialized
        } else {
            LifecycleState::Constructed
        }
    }
}

/// Tag of one property slot in a component type's closed layout
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertyKind {
    /// 64-bit float scalar
    Number,
    /// Boolean scalar
    Bool,
    /// String value
    Text,
    /// Reference to an object in the same scene; may be null
    Object,
    /// Reference to a resource of the given kind; may be null
    Resource(ResourceKind),
}

/// A typed property value
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyValue {
    /// Scalar number
    Number(f64),
    /// Scalar flag
    Bool(bool),
    /// String value
    Text(String),
    /// Same-scene object reference; `None` is a valid null reference
    Object(Option<ObjectId>),
    /// Resource reference; `None` is a valid null reference
    Resource(Option<ResourceHandle>),
}

impl PropertyValue {
    /// Whether this value is admissible for a slot of the given kind
    pub fn matches(&self, kind: PropertyKind) -> bool {
        match (self, kind) {
            (Self::Number(_), PropertyKind::Number)
            | (Self::Bool(_), PropertyKind::Bool)
            | (Self::Text(_), PropertyKind::Text)
            | (Self::Object(_), PropertyKind::Object)
            | (Self::Resource(None), PropertyKind::Resource(_)) => true,
            (Self::Resource(Some(handle)), PropertyKind::Resource(expected)) => {
                handle.kind == expected
            }
            _ => false,
        }
    }

    /// The declared default for a property kind
    pub fn default_for(kind: PropertyKind) -> Self {
        match kind {
            PropertyKind::Number => Self::Number(0.0),
            PropertyKind::Bool => Self::Bool(false),
            PropertyKind::Text => Self::Text(String::new()),
            PropertyKind::Object => Self::Object(None),
            PropertyKind::Resource(_) => Self::Resource(None),
        }
    }
}

/// One slot in a component type's property layout
#[derive(Debug, Clone)]
pub struct PropertyDescriptor {
    /// Property name, unique within the type
    pub name: String,
    /// Value tag
    pub kind: PropertyKind,
    /// Declared default, applied on construction and after a failed reset
    pub default: PropertyValue,
}

impl PropertyDescriptor {
    /// Descriptor with the kind's standard default
    pub fn new(name: impl Into<String>, kind: PropertyKind) -> Self {
        Self {
            name: name.into(),
            kind,
            default: PropertyValue::default_for(kind),
        }
    }

    /// Descriptor with an explicit default
    pub fn with_default(name: impl Into<String>, kind: PropertyKind, default: PropertyValue) -> Self {
        Self {
            name: name.into(),
            kind,
            default,
        }
    }
}

/// Context handed to lifecycle hooks
pub struct HookCtx<'a> {
    /// The owning scene
    pub scene: &'a mut Scene,
    /// Object the component sits on
    pub object: ObjectId,
    /// The component itself
    pub component: ComponentRef,
}

/// Lifecycle callbacks of a component type
///
/// All hooks default to no-ops; a type implements the ones it cares about.
/// Hooks run synchronously inside the engine call that triggers them.
#[allow(unused_variables)]
pub trait ComponentBehavior {
    /// Construction-time hook, run after defaults are applied and before
    /// `init`. If it fails, the framework re-applies the declared defaults
    /// so the component is never observed in a half-reset state.
    fn reset(&self, ctx: &mut HookCtx<'_>) -> Result<(), SceneError> {
        Ok(())
    }

    /// Runs exactly once, at creation, regardless of activation flags
    fn init(&self, ctx: &mut HookCtx<'_>) {}

    /// Runs exactly once, the first time the component becomes effectively
    /// active
    fn start(&self, ctx: &mut HookCtx<'_>) {}

    /// Runs on every inactive→active transition, after `start`
    fn on_activate(&self, ctx: &mut HookCtx<'_>) {}

    /// Runs on every active→inactive transition
    fn on_deactivate(&self, ctx: &mut HookCtx<'_>) {}

    /// Runs once per simulation tick while effectively active
    fn update(&self, ctx: &mut HookCtx<'_>, delta_time: f32) {}

    /// Runs exactly once when the component, its object, or its (non-active)
    /// scene is destroyed; fires even if the component never started
    fn on_destroy(&self, ctx: &mut HookCtx<'_>) {}
}

/// No-op behavior for data-only component types
pub struct DataBehavior;

impl ComponentBehavior for DataBehavior {}

/// Resolved component type, shared by every scene in the engine
pub struct ComponentType {
    /// Registry id
    pub id: ComponentTypeId,
    /// Unique type name
    pub name: String,
    /// Closed property layout, in declaration order
    pub properties: Vec<PropertyDescriptor>,
    /// Lifecycle behavior
    pub behavior: Rc<dyn ComponentBehavior>,
}

impl ComponentType {
    /// Slot index of a property by name
    pub fn property_index(&self, name: &str) -> Option<usize> {
        self.properties.iter().position(|p| p.name == name)
    }

    /// The declared default layout for a fresh instance
    pub fn default_values(&self) -> Vec<PropertyValue> {
        self.properties.iter().map(|p| p.default.clone()).collect()
    }
}

impl std::fmt::Debug for ComponentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComponentType")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("properties", &self.properties.len())
            .finish()
    }
}

/// Declaration handed to [`ComponentRegistry::register`]
///
/// `requires` lists component types that must be registered alongside this
/// one; registration resolves them in declaration order, each exactly once.
pub struct ComponentTypeDecl {
    /// Unique type name
    pub name: String,
    /// Property layout
    pub properties: Vec<PropertyDescriptor>,
    /// Lifecycle behavior
    pub behavior: Rc<dyn ComponentBehavior>,
    /// Dependency declarations, registered in order before use
    pub requires: Vec<ComponentTypeDecl>,
}

impl ComponentTypeDecl {
    /// Declaration with the given behavior and no dependencies
    pub fn new(
        name: impl Into<String>,
        properties: Vec<PropertyDescriptor>,
        behavior: Rc<dyn ComponentBehavior>,
    ) -> Self {
        Self {
            name: name.into(),
            properties,
            behavior,
            requires: Vec::new(),
        }
    }

    /// Data-only declaration
    pub fn data(name: impl Into<String>, properties: Vec<PropertyDescriptor>) -> Self {
        Self::new(name, properties, Rc::new(DataBehavior))
    }

    /// Add a dependency declaration
    pub fn requires(mut self, dep: ComponentTypeDecl) -> Self {
        self.requires.push(dep);
        self
    }
}

/// Engine-wide registry of component types
#[derive(Default)]
pub struct ComponentRegistry {
    types: Vec<Rc<ComponentType>>,
    by_name: HashMap<String, ComponentTypeId>,
}

impl ComponentRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a component type and, in order, its declared dependencies
    ///
    /// Registration is idempotent: a name that is already registered keeps
    /// its existing resolution and triggers no side effects a second time.
    pub fn register(&mut self, decl: ComponentTypeDecl) -> Result<ComponentTypeId, SceneError> {
        if let Some(&existing) = self.by_name.get(&decl.name) {
            return Ok(existing);
        }

        for descriptor in &decl.properties {
            if !descriptor.default.matches(descriptor.kind) {
                return Err(SceneError::PropertyTypeMismatch {
                    type_name: decl.name.clone(),
                    property: descriptor.name.clone(),
                });
            }
        }

        let id = ComponentTypeId(self.types.len() as u32);
        self.types.push(Rc::new(ComponentType {
            id,
            name: decl.name.clone(),
            properties: decl.properties,
            behavior: decl.behavior,
        }));
        self.by_name.insert(decl.name.clone(), id);
        log::debug!("registered component type '{}' as #{}", decl.name, id.0);

        for dep in decl.requires {
            self.register(dep)?;
        }
        Ok(id)
    }

    /// Look up a type by name
    pub fn get(&self, name: &str) -> Option<Rc<ComponentType>> {
        self.by_name
            .get(name)
            .map(|id| Rc::clone(&self.types[id.0 as usize]))
    }

    /// Look up a type by id
    pub fn by_id(&self, id: ComponentTypeId) -> Option<Rc<ComponentType>> {
        self.types.get(id.0 as usize).map(Rc::clone)
    }

    /// Number of registered types
    pub fn len(&self) -> usize {
        self.types.len()
    }

    /// Whether no types are registered
    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}

/// One component instance
#[derive(Debug, Clone)]
pub struct ComponentRecord {
    pub(crate) id: ComponentId,
    pub(crate) object: ObjectId,
    pub(crate) flags: LifecycleFlags,
    pub(crate) values: Vec<PropertyValue>,
}

impl ComponentRecord {
    /// Local id; the -1 sentinel once destroyed
    pub fn id(&self) -> ComponentId {
        self.id
    }

    /// Owning object
    pub fn object(&self) -> ObjectId {
        self.object
    }

    /// Lifecycle flag word
    pub fn flags(&self) -> LifecycleFlags {
        self.flags
    }

    /// Derived lifecycle state
    pub fn state(&self) -> LifecycleState {
        self.flags.state()
    }

    pub(crate) fn is_destroyed(&self) -> bool {
        self.flags.contains(LifecycleFlags::DESTROYED)
    }
}

/// Dense per-scene storage for one component type
#[derive(Debug)]
pub struct ComponentManager {
    pub(crate) ty: Rc<ComponentType>,
    pub(crate) records: Vec<ComponentRecord>,
}

impl ComponentManager {
    pub(crate) fn new(ty: Rc<ComponentType>) -> Self {
        Self {
            ty,
            records: Vec::new(),
        }
    }

    /// The managed type
    pub fn ty(&self) -> &Rc<ComponentType> {
        &self.ty
    }

    /// Record count, destroyed records included
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the manager holds no records at all
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub(crate) fn record(&self, id: ComponentId) -> Result<&ComponentRecord, SceneError> {
        let index = id.index().ok_or(SceneError::ComponentDestroyed {
            type_id: self.ty.id,
            id,
        })?;
        match self.records.get(index) {
            Some(record) if !record.is_destroyed() => Ok(record),
            Some(_) => Err(SceneError::ComponentDestroyed {
                type_id: self.ty.id,
                id,
            }),
            None => Err(SceneError::ComponentOutOfRange {
                type_id: self.ty.id,
                id,
            }),
        }
    }

    pub(crate) fn record_mut(&mut self, id: ComponentId) -> Result<&mut ComponentRecord, SceneError> {
        let type_id = self.ty.id;
        let index = id.index().ok_or(SceneError::ComponentDestroyed { type_id, id })?;
        match self.records.get_mut(index) {
            Some(record) if !record.is_destroyed() => Ok(record),
            Some(_) => Err(SceneError::ComponentDestroyed { type_id, id }),
            None => Err(SceneError::ComponentOutOfRange { type_id, id }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lifecycle_state_derivation() {
        let mut flags = LifecycleFlags::empty();
        assert_eq!(flags.state(), LifecycleState::Constructed);
        flags |= LifecycleFlags::INITIALIZED;
        assert_eq!(flags.state(), LifecycleState::Initialized);
        flags |= LifecycleFlags::STARTED | LifecycleFlags::ACTIVE;
        assert_eq!(flags.state(), LifecycleState::Active);
        flags -= LifecycleFlags::ACTIVE;
        assert_eq!(flags.state(), LifecycleState::Inactive);
        flags |= LifecycleFlags::DESTROYED;
        assert_eq!(flags.state(), LifecycleState::Destroyed);
    }

    #[test]
    fn test_property_value_kind_matching() {
        use crate::scene::SceneId;

        assert!(PropertyValue::Number(1.0).matches(PropertyKind::Number));
        assert!(PropertyValue::Object(None).matches(PropertyKind::Object));
        assert!(PropertyValue::Resource(None).matches(PropertyKind::Resource(ResourceKind::Mesh)));

        let handle = ResourceHandle::new(ResourceKind::Skin, 0, SceneId::from_index(0));
        assert!(PropertyValue::Resource(Some(handle))
            .matches(PropertyKind::Resource(ResourceKind::Skin)));
        assert!(!PropertyValue::Resource(Some(handle))
            .matches(PropertyKind::Resource(ResourceKind::Mesh)));
        assert!(!PropertyValue::Bool(true).matches(PropertyKind::Number));
    }

    #[test]
    fn test_registry_registers_dependencies_in_order_once() {
        let mut registry = ComponentRegistry::new();
        let decl = ComponentTypeDecl::data("rig", vec![])
            .requires(ComponentTypeDecl::data("skeleton", vec![]))
            .requires(
                ComponentTypeDecl::data("pose", vec![])
                    .requires(ComponentTypeDecl::data("skeleton", vec![])),
            );
        registry.register(decl).unwrap();

        // rig first, then its requires in declaration order; the nested
        // duplicate "skeleton" registration is a no-op.
        assert_eq!(registry.len(), 3);
        assert_eq!(registry.get("rig").unwrap().id.raw(), 0);
        assert_eq!(registry.get("skeleton").unwrap().id.raw(), 1);
        assert_eq!(registry.get("pose").unwrap().id.raw(), 2);
    }

    #[test]
    fn test_registry_is_idempotent() {
        let mut registry = ComponentRegistry::new();
        let first = registry
            .register(ComponentTypeDecl::data(
                "light",
                vec![PropertyDescriptor::new("intensity", PropertyKind::Number)],
            ))
            .unwrap();
        let second = registry
            .register(ComponentTypeDecl::data("light", vec![]))
            .unwrap();
        assert_eq!(first, second);
        assert_eq!(registry.len(), 1);
        // The original layout survives the duplicate registration.
        assert_eq!(registry.get("light").unwrap().properties.len(), 1);
    }

    #[test]
    fn test_registry_rejects_mismatched_default() {
        let mut registry = ComponentRegistry::new();
        let result = registry.register(ComponentTypeDecl::data(
            "broken",
            vec![PropertyDescriptor::with_default(
                "speed",
                PropertyKind::Number,
                PropertyValue::Bool(true),
            )],
        ));
        assert!(matches!(
            result,
            Err(SceneError::PropertyTypeMismatch { .. })
        ));
    }
}
