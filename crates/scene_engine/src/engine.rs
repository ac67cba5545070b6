//! Engine orchestration
//!
//! [`Engine`] owns the scene list, the component type registry, the native
//! runtime boundary, and the engine-level event emitters. Exactly one scene
//! may be the *active* scene; a component is effectively active only while
//! its own flag is set AND its scene is the active one, so activation
//! sweeps happen here, on scene switches.
//!
//! Scene slots are dense and never reused: a destroyed scene leaves a
//! tombstoned slot behind, and every id handed out stays meaningful (as an
//! error) forever.

use thiserror::Error;

use crate::core::config::{ConfigError, EngineConfig};
use crate::document::{DocumentData, DocumentError};
use crate::events::{Emitter, RetainEmitter};
use crate::runtime::{NativeRuntime, NullRuntime};
use crate::scene::lifecycle::{self, DestroyReport};
use crate::scene::merge::SubgraphSnapshot;
use crate::scene::{
    ComponentRef, ComponentRegistry, ComponentTypeDecl, ComponentTypeId, LifecycleState,
    MergeError, MergeResult, ObjectId, PropertyValue, Scene, SceneError, SceneId,
};
use crate::stream::sink::DocumentStream;
use crate::stream::StreamError;

/// Umbrella error for engine operations
#[derive(Debug, Error)]
pub enum EngineError {
    /// Scene bookkeeping failure
    #[error(transparent)]
    Scene(#[from] SceneError),

    /// Merge (retargeting) failure
    #[error(transparent)]
    Merge(#[from] MergeError),

    /// Stream framing or session failure
    #[error(transparent)]
    Stream(#[from] StreamError),

    /// Document format failure
    #[error(transparent)]
    Document(#[from] DocumentError),

    /// Configuration failure
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Engine-level lifecycle events
pub struct EngineEvents {
    /// Fires on every activation; retains the payload so late listeners
    /// still learn the current active scene
    pub scene_activated: RetainEmitter<SceneId>,
    /// Fires when a scene stops being the active one
    pub scene_deactivated: Emitter<SceneId>,
    /// Fires when a streamed document finishes materializing
    pub document_loaded: Emitter<SceneId>,
}

impl EngineEvents {
    fn new() -> Self {
        Self {
            scene_activated: RetainEmitter::new(),
            scene_deactivated: Emitter::new(),
            document_loaded: Emitter::new(),
        }
    }
}

/// The scene-model engine
pub struct Engine {
    config: EngineConfig,
    registry: ComponentRegistry,
    scenes: Vec<Option<Scene>>,
    active: Option<SceneId>,
    runtime: Box<dyn NativeRuntime>,
    events: EngineEvents,
    next_session: i64,
}

impl Engine {
    /// Engine with a [`NullRuntime`]
    pub fn new(config: EngineConfig) -> Self {
        Self::with_runtime(config, Box::new(NullRuntime))
    }

    /// Engine wired to a native runtime
    pub fn with_runtime(config: EngineConfig, runtime: Box<dyn NativeRuntime>) -> Self {
        log::info!("scene engine initialized");
        Self {
            config,
            registry: ComponentRegistry::new(),
            scenes: Vec::new(),
            active: None,
            runtime,
            events: EngineEvents::new(),
            next_session: 0,
        }
    }

    /// Engine settings
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Engine-level event emitters
    pub fn events(&self) -> &EngineEvents {
        &self.events
    }

    /// The component type registry
    pub fn registry(&self) -> &ComponentRegistry {
        &self.registry
    }

    /// Register a component type (and its declared dependencies)
    pub fn register_component(
        &mut self,
        decl: ComponentTypeDecl,
    ) -> Result<ComponentTypeId, EngineError> {
        Ok(self.registry.register(decl)?)
    }

    // ---- scenes --------------------------------------------------------

    /// Allocate an empty scene
    pub fn create_scene(&mut self, name: impl Into<String>) -> SceneId {
        let id = SceneId::from_index(self.scenes.len());
        let scene = Scene::new(id, name);
        log::debug!("created scene #{} '{}'", id.index(), scene.name());
        self.scenes.push(Some(scene));
        self.runtime.on_scene_created(id.raw());
        id
    }

    /// Access a live scene
    pub fn scene(&self, id: SceneId) -> Result<&Scene, SceneError> {
        match self.scenes.get(id.index()) {
            Some(Some(scene)) => Ok(scene),
            Some(None) => Err(SceneError::SceneDestroyed(id)),
            None => Err(SceneError::SceneOutOfRange(id)),
        }
    }

    /// Mutable access to a live scene
    pub fn scene_mut(&mut self, id: SceneId) -> Result<&mut Scene, SceneError> {
        match self.scenes.get_mut(id.index()) {
            Some(Some(scene)) => Ok(scene),
            Some(None) => Err(SceneError::SceneDestroyed(id)),
            None => Err(SceneError::SceneOutOfRange(id)),
        }
    }

    /// Number of scene slots ever allocated, tombstones included
    pub fn scene_count(&self) -> usize {
        self.scenes.len()
    }

    /// The active scene, if any
    pub fn active_scene(&self) -> Option<SceneId> {
        self.active
    }

    fn is_active(&self, id: SceneId) -> bool {
        self.active == Some(id)
    }

    /// Make `target` the active scene (or none)
    ///
    /// The outgoing scene's effectively-active components deactivate before
    /// the incoming scene's own-active components activate; both sweeps run
    /// in object-then-component order. Switching to the already-active
    /// scene is a no-op.
    pub fn switch_to(&mut self, target: Option<SceneId>) -> Result<(), EngineError> {
        if let Some(id) = target {
            self.scene(id)?;
        }
        if target == self.active {
            return Ok(());
        }
        if let Some(old) = self.active.take() {
            lifecycle::deactivate_scene(self.scene_mut(old)?)?;
            self.runtime.on_scene_deactivated(old.raw());
            self.events.scene_deactivated.notify(&old);
            log::debug!("scene #{} deactivated", old.index());
        }
        if let Some(new) = target {
            self.active = Some(new);
            lifecycle::activate_scene(self.scene_mut(new)?)?;
            self.runtime.on_scene_activated(new.raw());
            self.events.scene_activated.notify(&new);
            log::debug!("scene #{} activated", new.index());
        }
        Ok(())
    }

    /// Tear down a scene
    ///
    /// The active scene cannot be destroyed; switch away first. Every live
    /// object runs the destroy lifecycle, then the slot is tombstoned.
    pub fn destroy_scene(&mut self, id: SceneId) -> Result<(), EngineError> {
        if self.is_active(id) {
            return Err(SceneError::ActiveSceneDestroy(id).into());
        }
        let roots = self.scene(id)?.root_objects();
        let mut report = DestroyReport::default();
        for root in roots {
            if self.scene(id)?.object(root).is_ok() {
                lifecycle::destroy_object(self.scene_mut(id)?, root, &mut report)?;
            }
        }
        self.notify_destroyed(id, &report);
        self.scenes[id.index()] = None;
        self.runtime.on_scene_destroyed(id.raw());
        log::debug!("destroyed scene #{}", id.index());
        Ok(())
    }

    /// Advance the active scene by one tick
    pub fn update(&mut self, delta_time: f32) -> Result<(), EngineError> {
        if let Some(active) = self.active {
            lifecycle::update_scene(self.scene_mut(active)?, delta_time)?;
        }
        Ok(())
    }

    // ---- objects -------------------------------------------------------

    /// Create an object in a scene
    pub fn create_object(
        &mut self,
        scene: SceneId,
        parent: ObjectId,
        name: Option<String>,
        enabled: bool,
    ) -> Result<ObjectId, EngineError> {
        let id = self.scene_mut(scene)?.create_object(parent, name, enabled)?;
        self.runtime.on_object_created(scene.raw(), id.raw());
        Ok(id)
    }

    /// Destroy an object, its components, and its subtree
    pub fn destroy_object(&mut self, scene: SceneId, object: ObjectId) -> Result<(), EngineError> {
        let mut report = DestroyReport::default();
        lifecycle::destroy_object(self.scene_mut(scene)?, object, &mut report)?;
        self.notify_destroyed(scene, &report);
        Ok(())
    }

    /// Set an object's own requested-active flag
    pub fn set_object_enabled(
        &mut self,
        scene: SceneId,
        object: ObjectId,
        enabled: bool,
    ) -> Result<(), EngineError> {
        Ok(self.scene_mut(scene)?.set_object_enabled(object, enabled)?)
    }

    /// Whether an object's own flag is set AND its scene is the active one
    pub fn object_effectively_active(
        &self,
        scene: SceneId,
        object: ObjectId,
    ) -> Result<bool, EngineError> {
        Ok(self.scene(scene)?.object(object)?.enabled() && self.is_active(scene))
    }

    // ---- components ----------------------------------------------------

    /// Create a component by registered type name and run its creation
    /// lifecycle
    pub fn add_component(
        &mut self,
        scene: SceneId,
        object: ObjectId,
        type_name: &str,
        active: bool,
    ) -> Result<ComponentRef, EngineError> {
        let ty = self
            .registry
            .get(type_name)
            .ok_or_else(|| SceneError::UnknownComponentType(type_name.to_string()))?;
        let scene_active = self.is_active(scene);
        let comp =
            lifecycle::create_component(self.scene_mut(scene)?, scene_active, &ty, object, active)?;
        self.runtime
            .on_component_created(scene.raw(), comp.type_id.raw(), comp.id.raw());
        Ok(comp)
    }

    /// Destroy a single component
    pub fn destroy_component(
        &mut self,
        scene: SceneId,
        comp: ComponentRef,
    ) -> Result<(), EngineError> {
        let mut report = DestroyReport::default();
        lifecycle::destroy_component(self.scene_mut(scene)?, comp, &mut report)?;
        self.notify_destroyed(scene, &report);
        Ok(())
    }

    /// Toggle a component's own requested-active flag
    pub fn set_component_active(
        &mut self,
        scene: SceneId,
        comp: ComponentRef,
        active: bool,
    ) -> Result<(), EngineError> {
        let scene_active = self.is_active(scene);
        Ok(lifecycle::set_component_active(
            self.scene_mut(scene)?,
            scene_active,
            comp,
            active,
        )?)
    }

    /// A component's derived lifecycle state
    pub fn component_state(
        &self,
        scene: SceneId,
        comp: ComponentRef,
    ) -> Result<LifecycleState, EngineError> {
        Ok(self.scene(scene)?.component(comp)?.state())
    }

    /// Read a component property
    pub fn property(
        &self,
        scene: SceneId,
        comp: ComponentRef,
        name: &str,
    ) -> Result<PropertyValue, EngineError> {
        Ok(self.scene(scene)?.property(comp, name)?)
    }

    /// Write a component property
    pub fn set_property(
        &mut self,
        scene: SceneId,
        comp: ComponentRef,
        name: &str,
        value: PropertyValue,
    ) -> Result<(), EngineError> {
        Ok(self.scene_mut(scene)?.set_property(comp, name, value)?)
    }

    fn notify_destroyed(&mut self, scene: SceneId, report: &DestroyReport) {
        for comp in &report.components {
            self.runtime
                .on_component_destroyed(scene.raw(), comp.type_id.raw(), comp.id.raw());
        }
        for object in &report.objects {
            self.runtime.on_object_destroyed(scene.raw(), object.raw());
        }
    }

    // ---- merging -------------------------------------------------------

    /// Clone the subgraph rooted at `root` from `source` into `dest` as a
    /// new root object
    ///
    /// `source == dest` is self-instantiation: backing resource stores are
    /// shared, so only per-instance resources get fresh slots. A distinct
    /// source document has its resource tables appended and every handle
    /// offset. Validation precedes mutation either way.
    pub fn instantiate(
        &mut self,
        source: SceneId,
        root: ObjectId,
        dest: SceneId,
    ) -> Result<MergeResult, EngineError> {
        self.append(source, root, dest, ObjectId::NONE)
    }

    /// [`instantiate`](Self::instantiate), attaching the copy under
    /// `parent` in the destination
    pub fn append(
        &mut self,
        source: SceneId,
        root: ObjectId,
        dest: SceneId,
        parent: ObjectId,
    ) -> Result<MergeResult, EngineError> {
        self.scene(dest)?;
        let snapshot = SubgraphSnapshot::capture(self.scene(source)?, root, dest)?;
        let dest_active = self.is_active(dest);
        let result = snapshot.apply(self.scene_mut(dest)?, dest_active, parent)?;
        for object in &result.objects {
            self.runtime.on_object_created(dest.raw(), object.raw());
        }
        for comp in &result.components {
            self.runtime
                .on_component_created(dest.raw(), comp.type_id.raw(), comp.id.raw());
        }
        log::debug!(
            "merged {} objects from scene #{} into scene #{}",
            result.objects.len(),
            source.index(),
            dest.index()
        );
        Ok(result)
    }

    // ---- document loading ----------------------------------------------

    /// Open a streamed loading session
    ///
    /// Session ids are distinct and monotonically increasing; sessions
    /// never share buffers.
    pub fn open_document_stream(&mut self, name: impl Into<String>) -> DocumentStream {
        self.next_session += 1;
        DocumentStream::open(
            self.next_session,
            name.into(),
            self.config.loader.high_water_mark,
        )
    }

    /// Load a whole in-memory document in one call
    pub fn load_document(&mut self, name: &str, bytes: &[u8]) -> Result<SceneId, EngineError> {
        let mut stream = self.open_document_stream(name);
        stream.write(bytes)?;
        stream.close(self)
    }

    /// Materialize decoded document data as a fresh, inactive scene
    pub(crate) fn materialize_document(
        &mut self,
        name: &str,
        data: &DocumentData,
    ) -> Result<SceneId, EngineError> {
        let id = self.create_scene(name);
        let index = id.index();
        let populated = match self.scenes[index].as_mut() {
            Some(scene) => data.populate(scene, &self.registry, false),
            None => return Err(SceneError::SceneDestroyed(id).into()),
        };
        let created = match populated {
            Ok(created) => created,
            Err(error) => {
                // A half-populated scene must not stay reachable.
                self.scenes[index] = None;
                self.runtime.on_scene_destroyed(id.raw());
                log::warn!(
                    "discarded partially loaded scene #{index} for document '{name}': {error}"
                );
                return Err(error.into());
            }
        };
        let objects: Vec<ObjectId> = self.scene(id)?.live_objects().collect();
        for object in &objects {
            self.runtime.on_object_created(id.raw(), object.raw());
        }
        for comp in &created {
            self.runtime
                .on_component_created(id.raw(), comp.type_id.raw(), comp.id.raw());
        }
        self.events.document_loaded.notify(&id);
        log::info!(
            "loaded document '{}' as scene #{} ({} objects, {} components)",
            name,
            id.index(),
            objects.len(),
            created.len()
        );
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::{
        ComponentBehavior, HookCtx, LifecycleFlags, PropertyDescriptor, PropertyKind,
    };
    use std::cell::RefCell;
    use std::rc::Rc;

    type Log = Rc<RefCell<Vec<String>>>;

    struct Recorder {
        log: Log,
    }

    impl ComponentBehavior for Recorder {
        fn start(&self, _ctx: &mut HookCtx<'_>) {
            self.log.borrow_mut().push("start".into());
        }
        fn on_activate(&self, _ctx: &mut HookCtx<'_>) {
            self.log.borrow_mut().push("activate".into());
        }
        fn on_deactivate(&self, _ctx: &mut HookCtx<'_>) {
            self.log.borrow_mut().push("deactivate".into());
        }
        fn update(&self, _ctx: &mut HookCtx<'_>, _delta_time: f32) {
            self.log.borrow_mut().push("update".into());
        }
    }

    fn engine_with_recorder(log: &Log) -> Engine {
        let mut engine = Engine::new(EngineConfig::default());
        engine
            .register_component(ComponentTypeDecl::new(
                "recorder",
                vec![PropertyDescriptor::new("speed", PropertyKind::Number)],
                Rc::new(Recorder {
                    log: Rc::clone(log),
                }),
            ))
            .unwrap();
        engine
    }

    #[test]
    fn test_switch_a_b_a_does_not_rerun_start() {
        let log: Log = Rc::default();
        let mut engine = engine_with_recorder(&log);
        let a = engine.create_scene("a");
        let b = engine.create_scene("b");
        let object = engine.create_object(a, ObjectId::NONE, None, true).unwrap();
        let comp = engine.add_component(a, object, "recorder", true).unwrap();

        engine.switch_to(Some(a)).unwrap();
        assert_eq!(*log.borrow(), vec!["start", "activate"]);
        assert_eq!(
            engine.component_state(a, comp).unwrap(),
            LifecycleState::Active
        );

        engine.switch_to(Some(b)).unwrap();
        assert_eq!(
            engine.component_state(a, comp).unwrap(),
            LifecycleState::Inactive
        );

        engine.switch_to(Some(a)).unwrap();
        assert_eq!(
            *log.borrow(),
            vec!["start", "activate", "deactivate", "activate"]
        );
    }

    #[test]
    fn test_update_only_reaches_the_active_scene() {
        let log: Log = Rc::default();
        let mut engine = engine_with_recorder(&log);
        let a = engine.create_scene("a");
        let b = engine.create_scene("b");
        let object = engine.create_object(a, ObjectId::NONE, None, true).unwrap();
        engine.add_component(a, object, "recorder", true).unwrap();

        engine.switch_to(Some(b)).unwrap();
        engine.update(0.016).unwrap();
        assert!(log.borrow().is_empty());

        engine.switch_to(Some(a)).unwrap();
        log.borrow_mut().clear();
        engine.update(0.016).unwrap();
        assert_eq!(*log.borrow(), vec!["update"]);
    }

    #[test]
    fn test_active_scene_cannot_be_destroyed() {
        let mut engine = Engine::new(EngineConfig::default());
        let a = engine.create_scene("a");
        engine.switch_to(Some(a)).unwrap();

        assert!(matches!(
            engine.destroy_scene(a),
            Err(EngineError::Scene(SceneError::ActiveSceneDestroy(_)))
        ));
        engine.switch_to(None).unwrap();
        engine.destroy_scene(a).unwrap();
        assert!(matches!(
            engine.scene(a),
            Err(SceneError::SceneDestroyed(_))
        ));
    }

    #[test]
    fn test_scene_activated_event_is_retained() {
        let mut engine = Engine::new(EngineConfig::default());
        let a = engine.create_scene("a");
        engine.switch_to(Some(a)).unwrap();

        // Added after the switch, still sees the current active scene.
        let seen: Rc<RefCell<Option<SceneId>>> = Rc::default();
        let sink = Rc::clone(&seen);
        engine.events().scene_activated.add(move |id| {
            *sink.borrow_mut() = Some(*id);
            Ok(())
        });
        assert_eq!(*seen.borrow(), Some(a));
    }

    struct CountingRuntime {
        calls: Log,
    }

    impl NativeRuntime for CountingRuntime {
        fn on_object_created(&mut self, scene: u32, object: i32) {
            self.calls.borrow_mut().push(format!("obj+ {scene}:{object}"));
        }
        fn on_object_destroyed(&mut self, scene: u32, object: i32) {
            self.calls.borrow_mut().push(format!("obj- {scene}:{object}"));
        }
        fn on_component_created(&mut self, scene: u32, _ty: u32, component: i32) {
            self.calls.borrow_mut().push(format!("comp+ {scene}:{component}"));
        }
        fn on_component_destroyed(&mut self, scene: u32, _ty: u32, component: i32) {
            self.calls.borrow_mut().push(format!("comp- {scene}:{component}"));
        }
    }

    #[test]
    fn test_runtime_sees_creates_and_destroys() {
        let calls: Log = Rc::default();
        let mut engine = Engine::with_runtime(
            EngineConfig::default(),
            Box::new(CountingRuntime {
                calls: Rc::clone(&calls),
            }),
        );
        engine
            .register_component(ComponentTypeDecl::data(
                "tag",
                vec![PropertyDescriptor::new("label", PropertyKind::Text)],
            ))
            .unwrap();

        let a = engine.create_scene("a");
        let object = engine.create_object(a, ObjectId::NONE, None, true).unwrap();
        engine.add_component(a, object, "tag", true).unwrap();
        engine.destroy_object(a, object).unwrap();

        assert_eq!(
            *calls.borrow(),
            vec!["obj+ 0:0", "comp+ 0:0", "comp- 0:0", "obj- 0:0"]
        );
    }

    #[test]
    fn test_failed_document_load_discards_the_partial_scene() {
        use crate::document::DocumentBuilder;

        let mut engine = Engine::new(EngineConfig::default());
        let bytes = DocumentBuilder::new()
            .object(Some("root"), -1, true)
            .component("missing", 0, true, vec![])
            .encode()
            .unwrap();

        assert!(engine.load_document("broken", &bytes).is_err());
        // The slot is tombstoned; no half-populated scene stays reachable.
        assert_eq!(engine.scene_count(), 1);
        assert!(matches!(
            engine.scene(SceneId::from_index(0)),
            Err(SceneError::SceneDestroyed(_))
        ));
    }

    #[test]
    fn test_engine_instantiate_runs_destination_lifecycle() {
        let log: Log = Rc::default();
        let mut engine = engine_with_recorder(&log);
        let source = engine.create_scene("source");
        let dest = engine.create_scene("dest");
        let root = engine
            .create_object(source, ObjectId::NONE, Some("proto".into()), true)
            .unwrap();
        engine.add_component(source, root, "recorder", true).unwrap();

        engine.switch_to(Some(dest)).unwrap();
        log.borrow_mut().clear();

        let result = engine.instantiate(source, root, dest).unwrap();
        // Copies activated because the destination is the active scene.
        assert_eq!(*log.borrow(), vec!["start", "activate"]);
        assert!(engine
            .scene(dest)
            .unwrap()
            .component(result.components[0])
            .unwrap()
            .flags()
            .contains(LifecycleFlags::ACTIVE));
    }
}
