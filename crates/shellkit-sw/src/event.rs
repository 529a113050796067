//! Controller events.

use serde::Serialize;

use crate::config::GenerationId;

/// Controller lifecycle state.
///
/// `Uninitialized → Activating → Ready` is the happy path. A seeding failure
/// ends in `Failed`, which is terminal for that controller instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ControllerState {
    /// Constructed, nothing seeded.
    #[default]
    Uninitialized,
    /// Seeding the current generation.
    Activating,
    /// Seed set committed; requests are intercepted.
    Ready,
    /// Seeding failed.
    Failed,
}

/// Events emitted by the controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControllerEvent {
    /// State changed.
    StateChange {
        generation: GenerationId,
        state: ControllerState,
    },
    /// A revalidated response was written to the cache.
    EntryStored { generation: GenerationId, url: String },
    /// A stale generation was deleted.
    GenerationPurged { generation: GenerationId },
    /// A detached task failed. Never surfaced on the request path.
    BackgroundFailure { task: &'static str, error: String },
}
