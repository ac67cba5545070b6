//! Object records

use crate::scene::component::ComponentRef;

/// Dense object identifier within its owning scene
///
/// Ids are indices into the scene's object list. A destroyed record's id is
/// set to [`ObjectId::NONE`] and must never be dereferenced again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjectId(i32);

impl ObjectId {
    /// The "no object" / destroyed sentinel (-1)
    pub const NONE: Self = Self(-1);

    /// Id for a dense index
    pub(crate) fn from_index(index: usize) -> Self {
        Self(index as i32)
    }

    /// Raw signed value, -1 for the sentinel
    pub fn raw(self) -> i32 {
        self.0
    }

    /// Dense index, unless this is the sentinel
    pub fn index(self) -> Option<usize> {
        (self.0 >= 0).then_some(self.0 as usize)
    }

    /// Whether this is the sentinel
    pub fn is_none(self) -> bool {
        self.0 < 0
    }
}

impl std::fmt::Display for ObjectId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_none() {
            f.write_str("object(none)")
        } else {
            write!(f, "object({})", self.0)
        }
    }
}

/// One object in a scene's dense object table
#[derive(Debug, Clone)]
pub struct ObjectRecord {
    pub(crate) id: ObjectId,
    pub(crate) name: Option<String>,
    pub(crate) parent: ObjectId,
    pub(crate) children: Vec<ObjectId>,
    pub(crate) components: Vec<ComponentRef>,
    pub(crate) enabled: bool,
}

impl ObjectRecord {
    /// The object's id; [`ObjectId::NONE`] once destroyed
    pub fn id(&self) -> ObjectId {
        self.id
    }

    /// Authoring-time name, if any
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Parent object, or [`ObjectId::NONE`] for roots
    pub fn parent(&self) -> ObjectId {
        self.parent
    }

    /// Child objects, in attach order
    pub fn children(&self) -> &[ObjectId] {
        &self.children
    }

    /// Components attached to this object, in attach order
    pub fn components(&self) -> &[ComponentRef] {
        &self.components
    }

    /// The object's own requested-active flag
    ///
    /// Effective activity (own flag AND the owning scene being the active
    /// one) is derived, never stored; see
    /// [`crate::engine::Engine::object_effectively_active`].
    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub(crate) fn is_destroyed(&self) -> bool {
        self.id.is_none()
    }
}
