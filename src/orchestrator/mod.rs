//! Canvas orchestration.
//!
//! Covers canvas kind resolution, the per-instance result state machine,
//! and the spawner that ties listener, pane, and deadline together.

pub mod instance;
pub mod resolver;
pub mod spawner;

pub use instance::{AwaitMachine, CanvasResult, InstanceState, Transition, Trigger};
pub use resolver::{
    build_launch_command, shell_quote, CanvasKind, CanvasResolver, ConfigResolver, Rendezvous,
};
pub use spawner::{new_instance_id, CanvasRequest, CanvasSpawner, SpawnOptions};
