//! # Scene Engine
//!
//! Client-side scene-model bookkeeping for a streamed 3D engine.
//!
//! ## Features
//!
//! - **Lifecycle Controller**: object/component activation state machine
//!   tied to scene switching (`init`/`start`/`on_activate`/`on_deactivate`/
//!   `update`/`on_destroy`)
//! - **Resource Retargeting**: subgraph instantiation across scene
//!   documents with per-kind index remapping
//! - **Streamed Loading**: chunked, fragmentation-tolerant document
//!   ingestion with backpressure
//! - **Events**: reentrancy-safe emitters with a retaining variant
//!
//! ## Quick Start
//!
//! ```rust
//! use scene_engine::prelude::*;
//!
//! fn main() -> Result<(), EngineError> {
//!     let mut engine = Engine::new(EngineConfig::default());
//!     engine.register_component(ComponentTypeDecl::data(
//!         "tag",
//!         vec![PropertyDescriptor::new("label", PropertyKind::Text)],
//!     ))?;
//!
//!     let scene = engine.create_scene("main");
//!     let object = engine.create_object(scene, ObjectId::NONE, None, true)?;
//!     engine.add_component(scene, object, "tag", true)?;
//!     engine.switch_to(Some(scene))?;
//!     engine.update(0.016)?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions, clippy::similar_names, clippy::too_many_arguments)]

pub mod core;

pub mod document;
pub mod events;
pub mod foundation;
pub mod resources;
pub mod runtime;
pub mod scene;
pub mod stream;

mod engine;

pub use engine::{Engine, EngineError, EngineEvents};

/// Common imports for engine users
pub mod prelude {
    pub use crate::core::config::{Config, EngineConfig, LoaderConfig};
    pub use crate::events::{Emitter, ListenerResult, RetainEmitter};
    pub use crate::resources::{ResourceHandle, ResourceKind};
    pub use crate::runtime::{NativeRuntime, NullRuntime};
    pub use crate::scene::{
        ComponentBehavior, ComponentRef, ComponentTypeDecl, HookCtx, LifecycleState, ObjectId,
        PropertyDescriptor, PropertyKind, PropertyValue, Scene, SceneId,
    };
    pub use crate::stream::sink::DocumentStream;
    pub use crate::{Engine, EngineError, EngineEvents};
}
