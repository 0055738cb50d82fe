//! MediaForge Core Library
//!
//! Headless core of a desktop batch media converter: the job model, the
//! FIFO queue state machine, the pluggable conversion-engine registry, and
//! the single-worker executor with cooperative cancellation.
//!
//! The GUI layer (file pickers, settings forms, progress widgets) lives in a
//! separate application crate and talks to this library exclusively through
//! [`core::JobQueue`] snapshots and [`core::Executor`] events; it never
//! touches job state directly.

pub mod core;
pub mod logging;

use std::sync::Arc;

use crate::core::{
    ai::AiRuntime,
    engines::{EngineRegistry, FfToolEngine, FfmpegEngine, PixelEngine},
    settings::ConverterSettings,
    Executor, JobQueue,
};

// =============================================================================
// Converter assembly
// =============================================================================

/// Fully wired conversion core: queue, engine registry, and executor.
///
/// This is the single owner of all mutable conversion state. UI layers read
/// through [`JobQueue::snapshot`] and the executor's event stream.
pub struct Converter {
    /// Job queue shared between the executor (writer) and UI observers
    pub queue: Arc<JobQueue>,
    /// Registered engines plus the active selection
    pub registry: Arc<EngineRegistry>,
    /// The drain loop driving jobs through engines
    pub executor: Arc<Executor>,
}

impl Converter {
    /// Builds the conversion core from persisted settings.
    ///
    /// All three engine variants are always registered; `settings.engine`
    /// decides which one jobs are dispatched to.
    pub fn from_settings(settings: &ConverterSettings, ai: Arc<dyn AiRuntime>) -> Self {
        let mut registry = EngineRegistry::new(settings.engine);
        registry.register(Arc::new(FfmpegEngine::new(
            &settings.ffmpeg_path,
            &settings.ffprobe_path,
        )));
        registry.register(Arc::new(FfToolEngine::new(
            &settings.ffmpeg_path,
            Some(Arc::clone(&ai)),
        )));
        registry.register(Arc::new(PixelEngine::new()));
        let registry = Arc::new(registry);

        let queue = Arc::new(JobQueue::new());
        let executor = Arc::new(Executor::new(
            Arc::clone(&queue),
            Arc::clone(&registry),
            ai,
        ));

        Self {
            queue,
            registry,
            executor,
        }
    }
}
