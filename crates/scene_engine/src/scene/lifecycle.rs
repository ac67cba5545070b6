//! Object/component lifecycle control
//!
//! Implements the activation state machine:
//! `Constructed → Initialized → (Started ⇄ [Active ⇄ Inactive]) → Destroyed`.
//!
//! Effective activity is derived (a component's own `MARKED_ACTIVE` flag
//! AND its owning scene being the engine's active scene), so every function
//! here takes the owning scene plus a `scene_active` bit supplied by the
//! engine. All transitions happen synchronously within the triggering call.

use std::rc::Rc;

use crate::scene::component::{
    ComponentBehavior, ComponentId, ComponentRef, ComponentType, HookCtx, LifecycleFlags,
    PropertyValue,
};
use crate::scene::object::ObjectId;
use crate::scene::{Scene, SceneError};

/// Everything a destroy sweep tore down, for runtime-boundary notification
#[derive(Debug, Default)]
pub struct DestroyReport {
    /// Objects destroyed, in destruction order
    pub objects: Vec<ObjectId>,
    /// Components destroyed, in destruction order
    pub components: Vec<ComponentRef>,
}

fn hook(
    scene: &mut Scene,
    comp: ComponentRef,
    run: impl FnOnce(&dyn ComponentBehavior, &mut HookCtx<'_>),
) -> Result<(), SceneError> {
    let ty = scene.component_type(comp)?;
    let object = scene.component(comp)?.object();
    let behavior = Rc::clone(&ty.behavior);
    let mut ctx = HookCtx {
        scene,
        object,
        component: comp,
    };
    run(&*behavior, &mut ctx);
    Ok(())
}

/// Create a component and run its creation-time lifecycle
///
/// Defaults are applied, the `reset` hook runs (a failure re-applies the
/// defaults and is logged, never corrupting the record), `init` runs exactly
/// once, and, if the component is created effectively active, `start`
/// then `on_activate` run immediately, in that order.
pub(crate) fn create_component(
    scene: &mut Scene,
    scene_active: bool,
    ty: &Rc<ComponentType>,
    object: ObjectId,
    marked_active: bool,
) -> Result<ComponentRef, SceneError> {
    create_component_with_values(scene, scene_active, ty, object, marked_active, Vec::new())
}

/// [`create_component`], with authored values applied between `reset` and
/// `init` (the document deserializer's path)
///
/// `values` pairs property slot indices with pre-validated values.
pub(crate) fn create_component_with_values(
    scene: &mut Scene,
    scene_active: bool,
    ty: &Rc<ComponentType>,
    object: ObjectId,
    marked_active: bool,
    values: Vec<(usize, PropertyValue)>,
) -> Result<ComponentRef, SceneError> {
    let comp = scene.create_component_record(object, ty, marked_active)?;

    if let Err(error) = {
        let behavior = Rc::clone(&ty.behavior);
        let mut ctx = HookCtx {
            scene,
            object,
            component: comp,
        };
        behavior.reset(&mut ctx)
    } {
        log::warn!("reset hook of '{}' failed: {error}; defaults restored", ty.name);
        scene.apply_defaults(comp)?;
    }

    if !values.is_empty() {
        let record = scene.component_mut(comp)?;
        for (index, value) in values {
            record.values[index] = value;
        }
    }

    run_creation_callbacks(scene, scene_active, comp)?;
    Ok(comp)
}

/// Run `init` (exactly once) and, when created effectively active,
/// `start` + `on_activate`, on an already-placed record
pub(crate) fn run_creation_callbacks(
    scene: &mut Scene,
    scene_active: bool,
    comp: ComponentRef,
) -> Result<(), SceneError> {
    {
        let record = scene.component_mut(comp)?;
        debug_assert!(!record.flags.contains(LifecycleFlags::INITIALIZED));
        record.flags |= LifecycleFlags::INITIALIZED;
    }
    hook(scene, comp, |behavior, ctx| behavior.init(ctx))?;

    let marked = scene
        .component(comp)?
        .flags()
        .contains(LifecycleFlags::MARKED_ACTIVE);
    if marked && scene_active {
        start_and_activate(scene, comp)?;
    }
    Ok(())
}

/// Transition a component into the effectively-active state
///
/// Runs `start` if it never ran, then `on_activate`.
fn start_and_activate(scene: &mut Scene, comp: ComponentRef) -> Result<(), SceneError> {
    let needs_start = {
        let record = scene.component_mut(comp)?;
        let needs = !record.flags.contains(LifecycleFlags::STARTED);
        record.flags |= LifecycleFlags::STARTED;
        needs
    };
    if needs_start {
        hook(scene, comp, |behavior, ctx| behavior.start(ctx))?;
    }
    scene.component_mut(comp)?.flags |= LifecycleFlags::ACTIVE;
    hook(scene, comp, |behavior, ctx| behavior.on_activate(ctx))
}

fn deactivate(scene: &mut Scene, comp: ComponentRef) -> Result<(), SceneError> {
    scene.component_mut(comp)?.flags -= LifecycleFlags::ACTIVE;
    hook(scene, comp, |behavior, ctx| behavior.on_deactivate(ctx))
}

/// Toggle a component's own requested-active flag
///
/// Setting the flag to its current value is a no-op. While the owning scene
/// is inactive only the stored flag changes; while it is active the
/// component transitions, running `start` (once) / `on_activate` /
/// `on_deactivate` as appropriate.
pub(crate) fn set_component_active(
    scene: &mut Scene,
    scene_active: bool,
    comp: ComponentRef,
    active: bool,
) -> Result<(), SceneError> {
    {
        let record = scene.component_mut(comp)?;
        if record.flags.contains(LifecycleFlags::MARKED_ACTIVE) == active {
            return Ok(());
        }
        record.flags.set(LifecycleFlags::MARKED_ACTIVE, active);
    }
    if scene_active {
        if active {
            start_and_activate(scene, comp)?;
        } else {
            deactivate(scene, comp)?;
        }
    }
    Ok(())
}

/// Activate every own-active component of a scene that just became the
/// active one, in object-then-component order
pub(crate) fn activate_scene(scene: &mut Scene) -> Result<(), SceneError> {
    sweep(scene, |flags| {
        flags.contains(LifecycleFlags::MARKED_ACTIVE) && !flags.contains(LifecycleFlags::ACTIVE)
    }, start_and_activate)
}

/// Deactivate every effectively-active component of a scene that stopped
/// being the active one, in object-then-component order
pub(crate) fn deactivate_scene(scene: &mut Scene) -> Result<(), SceneError> {
    sweep(scene, |flags| flags.contains(LifecycleFlags::ACTIVE), deactivate)
}

fn sweep(
    scene: &mut Scene,
    wants: impl Fn(LifecycleFlags) -> bool,
    apply: impl Fn(&mut Scene, ComponentRef) -> Result<(), SceneError>,
) -> Result<(), SceneError> {
    let mut object_index = 0;
    while object_index < scene.object_count() {
        let object = ObjectId::from_index(object_index);
        object_index += 1;
        let Ok(components) = scene.components_of(object) else {
            continue; // destroyed slot
        };
        for comp in components {
            let Ok(record) = scene.component(comp) else {
                continue;
            };
            if wants(record.flags()) {
                apply(scene, comp)?;
            }
        }
    }
    Ok(())
}

/// Destroy a single component
///
/// An effectively-active component is deactivated first; `on_destroy` runs
/// exactly once, even for components that never started. Afterwards the
/// record carries the -1 sentinel and rejects all access.
pub(crate) fn destroy_component(
    scene: &mut Scene,
    comp: ComponentRef,
    report: &mut DestroyReport,
) -> Result<(), SceneError> {
    if scene
        .component(comp)?
        .flags()
        .contains(LifecycleFlags::ACTIVE)
    {
        deactivate(scene, comp)?;
    }
    hook(scene, comp, |behavior, ctx| behavior.on_destroy(ctx))?;

    let object = {
        let record = scene.component_mut(comp)?;
        record.id = ComponentId::NONE;
        record.flags |= LifecycleFlags::DESTROYED;
        record.object()
    };
    if let Ok(record) = scene.object_mut(object) {
        record.components.retain(|&c| c != comp);
    }
    report.components.push(comp);
    Ok(())
}

/// Destroy an object, its components, and its subtree
///
/// Every still-live component of an object runs `on_destroy` before any
/// sibling object is touched; children follow in pre-order.
pub(crate) fn destroy_object(
    scene: &mut Scene,
    object: ObjectId,
    report: &mut DestroyReport,
) -> Result<(), SceneError> {
    scene.object(object)?;

    for comp in scene.components_of(object)? {
        // A hook earlier in the sweep may already have destroyed it.
        if scene.component(comp).is_ok() {
            destroy_component(scene, comp, report)?;
        }
    }
    let children = scene.object(object)?.children().to_vec();
    for child in children {
        if scene.object(child).is_ok() {
            destroy_object(scene, child, report)?;
        }
    }
    scene.unlink_from_parent(object)?;
    scene.tombstone_object(object);
    report.objects.push(object);
    Ok(())
}

/// Run the per-tick `update` hook on every effectively-active component
pub(crate) fn update_scene(scene: &mut Scene, delta_time: f32) -> Result<(), SceneError> {
    let mut manager_index = 0;
    while manager_index < scene.managers().len() {
        let mut record_index = 0;
        loop {
            let comp = {
                let manager = &scene.managers()[manager_index];
                if record_index >= manager.len() {
                    break;
                }
                let record = &manager.records[record_index];
                let live = !record.is_destroyed()
                    && record.flags().contains(LifecycleFlags::ACTIVE);
                let comp = ComponentRef {
                    type_id: manager.ty.id,
                    id: ComponentId::from_index(record_index),
                };
                record_index += 1;
                live.then_some(comp)
            };
            if let Some(comp) = comp {
                hook(scene, comp, |behavior, ctx| behavior.update(ctx, delta_time))?;
            }
        }
        manager_index += 1;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::component::{
        ComponentRegistry, ComponentTypeDecl, PropertyDescriptor, PropertyKind,
    };
    use crate::scene::SceneId;
    use std::cell::RefCell;

    type Log = Rc<RefCell<Vec<String>>>;

    struct Recorder {
        log: Log,
    }

    impl Recorder {
        fn push(&self, ctx: &HookCtx<'_>, event: &str) {
            self.log
                .borrow_mut()
                .push(format!("{}:{event}", ctx.component.id.raw()));
        }
    }

    impl ComponentBehavior for Recorder {
        fn init(&self, ctx: &mut HookCtx<'_>) {
            self.push(ctx, "init");
        }
        fn start(&self, ctx: &mut HookCtx<'_>) {
            self.push(ctx, "start");
        }
        fn on_activate(&self, ctx: &mut HookCtx<'_>) {
            self.push(ctx, "activate");
        }
        fn on_deactivate(&self, ctx: &mut HookCtx<'_>) {
            self.push(ctx, "deactivate");
        }
        fn update(&self, ctx: &mut HookCtx<'_>, _delta_time: f32) {
            self.push(ctx, "update");
        }
        fn on_destroy(&self, ctx: &mut HookCtx<'_>) {
            self.push(ctx, "destroy");
        }
    }

    fn recorder_registry(log: &Log) -> ComponentRegistry {
        let mut registry = ComponentRegistry::new();
        registry
            .register(ComponentTypeDecl::new(
                "recorder",
                vec![PropertyDescriptor::new("speed", PropertyKind::Number)],
                Rc::new(Recorder {
                    log: Rc::clone(log),
                }),
            ))
            .unwrap();
        registry
    }

    fn scene_with_object() -> (Scene, ObjectId) {
        let mut scene = Scene::new(SceneId::from_index(0), "test");
        let object = scene.create_object(ObjectId::NONE, None, true).unwrap();
        (scene, object)
    }

    #[test]
    fn test_init_runs_once_in_inactive_scene() {
        let log: Log = Rc::default();
        let registry = recorder_registry(&log);
        let ty = registry.get("recorder").unwrap();
        let (mut scene, object) = scene_with_object();

        let comp = create_component(&mut scene, false, &ty, object, true).unwrap();
        assert_eq!(*log.borrow(), vec!["0:init"]);
        assert_eq!(scene.component(comp).unwrap().state(), super::super::LifecycleState::Initialized);
    }

    #[test]
    fn test_created_effectively_active_runs_start_then_activate() {
        let log: Log = Rc::default();
        let registry = recorder_registry(&log);
        let ty = registry.get("recorder").unwrap();
        let (mut scene, object) = scene_with_object();

        create_component(&mut scene, true, &ty, object, true).unwrap();
        assert_eq!(*log.borrow(), vec!["0:init", "0:start", "0:activate"]);
    }

    #[test]
    fn test_flag_toggle_while_scene_inactive_fires_nothing() {
        let log: Log = Rc::default();
        let registry = recorder_registry(&log);
        let ty = registry.get("recorder").unwrap();
        let (mut scene, object) = scene_with_object();

        let comp = create_component(&mut scene, false, &ty, object, false).unwrap();
        log.borrow_mut().clear();

        set_component_active(&mut scene, false, comp, true).unwrap();
        set_component_active(&mut scene, false, comp, false).unwrap();
        assert!(log.borrow().is_empty());
        // The stored flag still tracked the last request.
        set_component_active(&mut scene, false, comp, true).unwrap();
        assert!(scene
            .component(comp)
            .unwrap()
            .flags()
            .contains(LifecycleFlags::MARKED_ACTIVE));
    }

    #[test]
    fn test_flag_toggles_while_scene_active() {
        let log: Log = Rc::default();
        let registry = recorder_registry(&log);
        let ty = registry.get("recorder").unwrap();
        let (mut scene, object) = scene_with_object();

        let comp = create_component(&mut scene, true, &ty, object, false).unwrap();
        assert_eq!(*log.borrow(), vec!["0:init"]);
        log.borrow_mut().clear();

        set_component_active(&mut scene, true, comp, true).unwrap();
        assert_eq!(*log.borrow(), vec!["0:start", "0:activate"]);
        log.borrow_mut().clear();

        // Same value is a no-op.
        set_component_active(&mut scene, true, comp, true).unwrap();
        assert!(log.borrow().is_empty());

        set_component_active(&mut scene, true, comp, false).unwrap();
        assert_eq!(*log.borrow(), vec!["0:deactivate"]);
        log.borrow_mut().clear();

        // Reactivation never re-runs start.
        set_component_active(&mut scene, true, comp, true).unwrap();
        assert_eq!(*log.borrow(), vec!["0:activate"]);
    }

    #[test]
    fn test_scene_sweeps_honor_object_then_component_order() {
        let log: Log = Rc::default();
        let registry = recorder_registry(&log);
        let ty = registry.get("recorder").unwrap();
        let mut scene = Scene::new(SceneId::from_index(0), "test");
        let first = scene.create_object(ObjectId::NONE, None, true).unwrap();
        let second = scene.create_object(ObjectId::NONE, None, true).unwrap();

        // Interleave creation across objects; sweep order must follow
        // objects, not creation order.
        create_component(&mut scene, false, &ty, second, true).unwrap();
        create_component(&mut scene, false, &ty, first, true).unwrap();
        create_component(&mut scene, false, &ty, first, false).unwrap();
        log.borrow_mut().clear();

        activate_scene(&mut scene).unwrap();
        assert_eq!(*log.borrow(), vec!["1:start", "1:activate", "0:start", "0:activate"]);
        log.borrow_mut().clear();

        deactivate_scene(&mut scene).unwrap();
        assert_eq!(*log.borrow(), vec!["1:deactivate", "0:deactivate"]);
        log.borrow_mut().clear();

        // Switching back reactivates without re-running start.
        activate_scene(&mut scene).unwrap();
        assert_eq!(*log.borrow(), vec!["1:activate", "0:activate"]);
    }

    #[test]
    fn test_destroy_component_fires_once_and_poisons_access() {
        let log: Log = Rc::default();
        let registry = recorder_registry(&log);
        let ty = registry.get("recorder").unwrap();
        let (mut scene, object) = scene_with_object();

        let comp = create_component(&mut scene, true, &ty, object, true).unwrap();
        log.borrow_mut().clear();

        let mut report = DestroyReport::default();
        destroy_component(&mut scene, comp, &mut report).unwrap();
        assert_eq!(*log.borrow(), vec!["0:deactivate", "0:destroy"]);
        assert_eq!(report.components, vec![comp]);

        // All further access fails, and a second destroy is rejected.
        assert!(matches!(
            scene.property(comp, "speed"),
            Err(SceneError::ComponentDestroyed { .. })
        ));
        assert!(destroy_component(&mut scene, comp, &mut report).is_err());
        assert_eq!(log.borrow().len(), 2);
        // The owning object no longer lists it.
        assert!(scene.object(object).unwrap().components().is_empty());
    }

    #[test]
    fn test_destroy_never_started_component_still_fires_on_destroy() {
        let log: Log = Rc::default();
        let registry = recorder_registry(&log);
        let ty = registry.get("recorder").unwrap();
        let (mut scene, object) = scene_with_object();

        let comp = create_component(&mut scene, false, &ty, object, false).unwrap();
        log.borrow_mut().clear();

        let mut report = DestroyReport::default();
        destroy_component(&mut scene, comp, &mut report).unwrap();
        assert_eq!(*log.borrow(), vec!["0:destroy"]);
    }

    #[test]
    fn test_destroy_object_groups_components_before_siblings() {
        let log: Log = Rc::default();
        let registry = recorder_registry(&log);
        let ty = registry.get("recorder").unwrap();
        let mut scene = Scene::new(SceneId::from_index(0), "test");
        let root = scene.create_object(ObjectId::NONE, None, true).unwrap();
        let child_a = scene.create_object(root, None, true).unwrap();
        let child_b = scene.create_object(root, None, true).unwrap();

        create_component(&mut scene, false, &ty, root, false).unwrap(); // id 0
        create_component(&mut scene, false, &ty, child_a, false).unwrap(); // id 1
        create_component(&mut scene, false, &ty, child_a, false).unwrap(); // id 2
        create_component(&mut scene, false, &ty, child_b, false).unwrap(); // id 3
        log.borrow_mut().clear();

        let mut report = DestroyReport::default();
        destroy_object(&mut scene, root, &mut report).unwrap();

        // Root's components, then all of child_a's before child_b is touched.
        assert_eq!(
            *log.borrow(),
            vec!["0:destroy", "1:destroy", "2:destroy", "3:destroy"]
        );
        assert_eq!(report.objects, vec![child_a, child_b, root]);
        assert!(matches!(
            scene.object(child_b),
            Err(SceneError::ObjectDestroyed(_))
        ));
    }

    #[test]
    fn test_update_only_reaches_effectively_active_components() {
        let log: Log = Rc::default();
        let registry = recorder_registry(&log);
        let ty = registry.get("recorder").unwrap();
        let (mut scene, object) = scene_with_object();

        let active = create_component(&mut scene, true, &ty, object, true).unwrap();
        create_component(&mut scene, true, &ty, object, false).unwrap();
        log.borrow_mut().clear();

        update_scene(&mut scene, 0.016).unwrap();
        assert_eq!(*log.borrow(), vec!["0:update"]);
        log.borrow_mut().clear();

        let mut report = DestroyReport::default();
        destroy_component(&mut scene, active, &mut report).unwrap();
        log.borrow_mut().clear();
        update_scene(&mut scene, 0.016).unwrap();
        assert!(log.borrow().is_empty());
    }

    struct FaultyReset {
        log: Log,
    }

    impl ComponentBehavior for FaultyReset {
        fn reset(&self, ctx: &mut HookCtx<'_>) -> Result<(), SceneError> {
            // Mangle a property, then fail: the framework must restore the
            // declared defaults.
            ctx.scene
                .set_property(ctx.component, "speed", PropertyValue::Number(99.0))?;
            Err(SceneError::NoSuchProperty {
                type_name: "faulty".into(),
                property: "ghost".into(),
            })
        }
        fn init(&self, _ctx: &mut HookCtx<'_>) {
            self.log.borrow_mut().push("init".into());
        }
    }

    #[test]
    fn test_failed_reset_restores_declared_defaults() {
        let log: Log = Rc::default();
        let mut registry = ComponentRegistry::new();
        registry
            .register(ComponentTypeDecl::new(
                "faulty",
                vec![PropertyDescriptor::with_default(
                    "speed",
                    PropertyKind::Number,
                    PropertyValue::Number(7.0),
                )],
                Rc::new(FaultyReset {
                    log: Rc::clone(&log),
                }),
            ))
            .unwrap();
        let ty = registry.get("faulty").unwrap();
        let (mut scene, object) = scene_with_object();

        let comp = create_component(&mut scene, false, &ty, object, true).unwrap();
        assert_eq!(
            scene.property(comp, "speed").unwrap(),
            PropertyValue::Number(7.0)
        );
        // Creation still completed: init ran.
        assert_eq!(*log.borrow(), vec!["init"]);
    }
}
