use crate::core::config::Config;
use crate::core::error::{DubError, DubResult};
use crate::core::io::Storage;
use crate::core::params::{resolve_for_line, GenerationParameters, ParameterLayer};
use crate::core::paths::{ArtifactPaths, LineNumbering, OutputLayout};
use crate::core::script::{LineId, ResolvedDialogue};
use crate::core::session::Session;
use crate::services::tts::SynthesisBackend;
use log::{info, warn};
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::OwnedMutexGuard;

const PREVIEW_CHARS: usize = 20;

type LockTable = HashMap<PathBuf, Arc<tokio::sync::Mutex<()>>>;

/// One async lock per output path, so a single-line regeneration and the
/// batch sweep never write the same artifact at once. Entries live only
/// while someone holds or waits for them.
#[derive(Default)]
pub struct PathLocks {
    inner: Mutex<LockTable>,
}

impl PathLocks {
    fn table(&self) -> std::sync::MutexGuard<'_, LockTable> {
        self.inner.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub async fn lock(&self, path: &Path) -> PathGuard<'_> {
        let lock = self.table().entry(path.to_path_buf()).or_default().clone();
        let guard = lock.lock_owned().await;
        PathGuard {
            locks: self,
            path: path.to_path_buf(),
            guard: Some(guard),
        }
    }

    #[cfg(test)]
    fn tracked(&self) -> usize {
        self.table().len()
    }
}

pub struct PathGuard<'a> {
    locks: &'a PathLocks,
    path: PathBuf,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for PathGuard<'_> {
    fn drop(&mut self) {
        self.guard.take();
        let mut table = self.locks.table();
        // Waiters clone the Arc under the table lock, so a count of one means idle.
        if table
            .get(&self.path)
            .map_or(false, |lock| Arc::strong_count(lock) == 1)
        {
            table.remove(&self.path);
        }
    }
}

/// Cooperative stop signal, checked between lines.
#[derive(Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineState {
    Idle,
    Requesting,
    Written,
    Reported,
}

#[derive(Debug, Clone)]
pub struct LinePlan {
    pub line: ResolvedDialogue,
    pub paths: ArtifactPaths,
    pub generated: bool,
}

#[derive(Debug, Clone)]
pub struct BatchPlan {
    pub lines: Vec<LinePlan>,
    /// Scenes whose legacy line numbers run into the next scene.
    pub numbering_collisions: Vec<(usize, String)>,
}

impl BatchPlan {
    pub fn pending(&self) -> impl Iterator<Item = &LinePlan> {
        self.lines.iter().filter(|l| !l.generated)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum LineOutcome {
    Written { paths: ArtifactPaths, bytes: usize },
    Skipped { paths: ArtifactPaths },
}

#[derive(Debug)]
pub struct LineFailure {
    pub id: LineId,
    pub preview: String,
    pub error: DubError,
}

#[derive(Debug, Default)]
pub struct BatchSummary {
    pub total: usize,
    pub succeeded: usize,
    pub skipped: usize,
    pub failed: Vec<LineFailure>,
    pub cancelled: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProgressEvent {
    /// 1-based position among the lines selected for this sweep.
    pub index: usize,
    pub total: usize,
    pub id: LineId,
    pub preview: String,
    pub succeeded: bool,
}

/// Hooks for whatever presentation layer drives the workflow.
pub trait WorkflowObserver: Send + Sync {
    fn on_start(&self, _pending: usize, _skipped: usize) {}
    fn on_state(&self, _id: LineId, _state: LineState) {}
    fn on_progress(&self, _event: &ProgressEvent) {}
    fn on_error(&self, _id: LineId, _error: &DubError) {}
    fn on_finished(&self, _summary: &BatchSummary) {}
}

pub struct NoopObserver;

impl WorkflowObserver for NoopObserver {}

pub struct WorkflowManager {
    layout: OutputLayout,
    defaults: ParameterLayer,
    backend: Arc<dyn SynthesisBackend>,
    storage: Arc<dyn Storage>,
    locks: PathLocks,
}

impl WorkflowManager {
    pub fn new(
        layout: OutputLayout,
        defaults: ParameterLayer,
        backend: Arc<dyn SynthesisBackend>,
        storage: Arc<dyn Storage>,
    ) -> Self {
        Self {
            layout,
            defaults,
            backend,
            storage,
            locks: PathLocks::default(),
        }
    }

    pub fn from_config(
        config: &Config,
        program_dir: &Path,
        backend: Arc<dyn SynthesisBackend>,
        storage: Arc<dyn Storage>,
    ) -> Self {
        let layout = OutputLayout::new(
            config.output_root(program_dir),
            &config.audio_extension(),
            config.line_numbering,
        );
        Self::new(layout, config.inference_defaults.clone(), backend, storage)
    }

    pub fn layout(&self) -> &OutputLayout {
        &self.layout
    }

    pub fn artifact(&self, session: &Session, id: LineId) -> DubResult<ArtifactPaths> {
        let line = session.original(id)?;
        Ok(self.layout.artifact(&session.script().name, &line))
    }

    /// The parameters a generation of `id` would send right now.
    pub fn resolve(&self, session: &Session, id: LineId) -> DubResult<GenerationParameters> {
        let line = session.effective(id)?;
        resolve_for_line(
            &self.defaults,
            session.script(),
            &line,
            &session.overrides(id),
        )
    }

    /// Every line with its artifact paths and whether its audio exists.
    pub async fn plan(&self, session: &Session) -> BatchPlan {
        let script = session.script();
        let mut lines = Vec::with_capacity(script.line_count());
        for line in script.lines() {
            let paths = self.layout.artifact(&script.name, &line);
            let generated = match self.storage.exists(&paths.audio).await {
                Ok(exists) => exists,
                Err(e) => {
                    warn!("Cannot check {}: {}", paths.audio.display(), e);
                    false
                }
            };
            lines.push(LinePlan {
                line,
                paths,
                generated,
            });
        }

        let numbering_collisions = if self.layout.numbering() == LineNumbering::Legacy {
            script
                .oversized_scenes()
                .into_iter()
                .map(|(i, name)| (i, name.to_string()))
                .collect()
        } else {
            Vec::new()
        };

        BatchPlan {
            lines,
            numbering_collisions,
        }
    }

    /// Generate one line. Without `force`, an existing artifact is left alone.
    pub async fn generate_line(
        &self,
        session: &Session,
        id: LineId,
        force: bool,
    ) -> DubResult<LineOutcome> {
        let paths = self.artifact(session, id)?;
        let _guard = self.locks.lock(&paths.audio).await;

        if !force {
            let exists = self
                .storage
                .exists(&paths.audio)
                .await
                .map_err(|e| DubError::fs(&paths.audio, e))?;
            if exists {
                return Ok(LineOutcome::Skipped { paths });
            }
        }

        let params = self.resolve(session, id)?;
        let audio = self.backend.synthesize(&params).await?;
        let sidecar = params.to_yaml()?;

        // Sidecar first: audio existence is what marks the line as done.
        // A failed audio write puts the previous sidecar back, so the pair on
        // disk always comes from the same generation.
        let previous = match self.storage.read(&paths.metadata).await {
            Ok(bytes) => Some(bytes),
            Err(e) if e.kind() == io::ErrorKind::NotFound => None,
            Err(e) => return Err(DubError::fs(&paths.metadata, e)),
        };
        self.storage
            .write(&paths.metadata, sidecar.as_bytes())
            .await
            .map_err(|e| DubError::fs(&paths.metadata, e))?;
        if let Err(e) = self.storage.write(&paths.audio, &audio).await {
            let restored = match &previous {
                Some(bytes) => self.storage.write(&paths.metadata, bytes).await,
                None => self.storage.remove(&paths.metadata).await,
            };
            if let Err(restore) = restored {
                warn!("Cannot restore {}: {}", paths.metadata.display(), restore);
            }
            return Err(DubError::fs(&paths.audio, e));
        }

        info!("Wrote {}", paths.audio.display());
        Ok(LineOutcome::Written {
            paths,
            bytes: audio.len(),
        })
    }

    /// Generate every line whose audio is missing, one at a time.
    pub async fn run_batch(
        &self,
        session: &Session,
        observer: &dyn WorkflowObserver,
        cancel: &CancelFlag,
    ) -> BatchSummary {
        let plan = self.plan(session).await;
        for (index, name) in &plan.numbering_collisions {
            warn!(
                "Scene {} '{}' overflows legacy numbering; its artifacts may overwrite the next scene's",
                index, name
            );
        }

        let pending: Vec<&LinePlan> = plan.pending().collect();
        let mut summary = BatchSummary {
            total: plan.lines.len(),
            skipped: plan.lines.len() - pending.len(),
            ..Default::default()
        };
        observer.on_start(pending.len(), summary.skipped);
        info!(
            "Batch for '{}': {} pending, {} already generated",
            session.script().name,
            pending.len(),
            summary.skipped
        );

        for (i, item) in pending.iter().enumerate() {
            if cancel.is_cancelled() {
                info!("Batch cancelled before line {}", item.line.id());
                summary.cancelled = true;
                break;
            }

            let id = item.line.id();
            let preview = item.line.preview(PREVIEW_CHARS);
            observer.on_state(id, LineState::Requesting);

            let succeeded = match self.generate_line(session, id, false).await {
                Ok(LineOutcome::Written { .. }) => {
                    summary.succeeded += 1;
                    observer.on_state(id, LineState::Written);
                    true
                }
                Ok(LineOutcome::Skipped { .. }) => {
                    summary.skipped += 1;
                    true
                }
                Err(error) => {
                    warn!("Line {} ({}) failed: {}", id, preview, error);
                    observer.on_state(id, LineState::Reported);
                    observer.on_error(id, &error);
                    summary.failed.push(LineFailure {
                        id,
                        preview: preview.clone(),
                        error,
                    });
                    false
                }
            };
            observer.on_state(id, LineState::Idle);

            observer.on_progress(&ProgressEvent {
                index: i + 1,
                total: pending.len(),
                id,
                preview,
                succeeded,
            });
        }

        info!(
            "Batch finished: {} succeeded, {} failed, {} skipped{}",
            summary.succeeded,
            summary.failed.len(),
            summary.skipped,
            if summary.cancelled { " (cancelled)" } else { "" }
        );
        observer.on_finished(&summary);
        summary
    }
}
