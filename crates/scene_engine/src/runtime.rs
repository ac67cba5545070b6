//! Native runtime boundary
//!
//! The core only bookkeeps the scene model; rendering, asset upload, and
//! other heavy work live on the other side of this trait. The interface is
//! deliberately flat and numeric (scene/object/component indices, no
//! references) so it can sit on an FFI seam without marshalling object
//! graphs.

/// Receiver for scene-model changes
///
/// All methods default to no-ops; a runtime implements the ones it cares
/// about. Calls arrive synchronously from within the engine operation that
/// caused the change.
#[allow(unused_variables)]
pub trait NativeRuntime {
    /// A scene slot was allocated
    fn on_scene_created(&mut self, scene: u32) {}

    /// A scene slot was torn down
    fn on_scene_destroyed(&mut self, scene: u32) {}

    /// A scene became the active one
    fn on_scene_activated(&mut self, scene: u32) {}

    /// A scene stopped being the active one
    fn on_scene_deactivated(&mut self, scene: u32) {}

    /// An object record was created
    fn on_object_created(&mut self, scene: u32, object: i32) {}

    /// An object record was destroyed
    fn on_object_destroyed(&mut self, scene: u32, object: i32) {}

    /// A component record was created
    fn on_component_created(&mut self, scene: u32, component_type: u32, component: i32) {}

    /// A component record was destroyed
    fn on_component_destroyed(&mut self, scene: u32, component_type: u32, component: i32) {}
}

/// Runtime that ignores every notification; the default for tests and
/// headless use
#[derive(Debug, Default)]
pub struct NullRuntime;

impl NativeRuntime for NullRuntime {}
