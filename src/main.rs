mod review;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use log::warn;
use script2dub::core::config::{program_dir, Config, DEFAULT_CONFIG_FILE};
use script2dub::core::error::DubError;
use script2dub::core::io::NativeStorage;
use script2dub::core::params::{parse_override, resolve_voice};
use script2dub::core::script::{LineId, Script};
use script2dub::core::session::Session;
use script2dub::services::tts::create_backend;
use script2dub::services::workflow::{
    BatchSummary, CancelFlag, LineOutcome, ProgressEvent, WorkflowManager, WorkflowObserver,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::task::JoinHandle;

#[derive(Parser)]
#[command(name = "script2dub")]
#[command(version)]
#[command(about = "Dub YAML dialogue scripts through a GPT-SoVITS style TTS server", long_about = None)]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long, global = true, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List every line with its generation state and audio path
    Status { script: PathBuf },

    /// Generate every line whose audio does not exist yet
    Batch { script: PathBuf },

    /// Generate a single line, replacing existing audio
    Generate {
        script: PathBuf,

        /// Scene index (0-based)
        #[arg(long)]
        scene: usize,

        /// Dialogue index within the scene (0-based)
        #[arg(long)]
        line: usize,

        /// Replacement text for this run
        #[arg(long)]
        text: Option<String>,

        /// Replacement emotion for this run
        #[arg(long)]
        emotion: Option<String>,

        /// Parameter override, e.g. --set speed_facter=1.1
        #[arg(long = "set", value_name = "KEY=VALUE")]
        set: Vec<String>,

        /// Leave existing audio untouched
        #[arg(long)]
        skip_existing: bool,
    },

    /// Browse, edit and regenerate lines interactively
    Review { script: PathBuf },
}

/// Drives an indicatif bar from workflow events.
pub(crate) struct ProgressReporter {
    pb: ProgressBar,
}

impl ProgressReporter {
    pub(crate) fn new() -> Result<Self> {
        let pb = ProgressBar::new(0);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")?
                .progress_chars("#>-"),
        );
        Ok(Self { pb })
    }
}

impl WorkflowObserver for ProgressReporter {
    fn on_start(&self, pending: usize, skipped: usize) {
        self.pb.set_length(pending as u64);
        if skipped > 0 {
            self.pb
                .println(format!("{} line(s) already generated, skipping", skipped));
        }
    }

    fn on_progress(&self, event: &ProgressEvent) {
        self.pb.set_message(format!("[{}] {}", event.id, event.preview));
        self.pb.set_position(event.index as u64);
    }

    fn on_error(&self, id: LineId, error: &DubError) {
        self.pb.println(format!("✗ {}: {}", id, error));
    }

    fn on_finished(&self, _summary: &BatchSummary) {
        self.pb.finish_and_clear();
    }
}

/// A cancel flag that Ctrl-C sets. Abort the handle once the sweep is over.
pub(crate) fn cancel_on_ctrl_c() -> (CancelFlag, JoinHandle<()>) {
    let cancel = CancelFlag::new();
    let flag = cancel.clone();
    let handle = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted; stopping after the current line");
            flag.cancel();
        }
    });
    (cancel, handle)
}

pub(crate) fn print_summary(summary: &BatchSummary) {
    println!(
        "Done: {} generated, {} skipped, {} failed (of {} lines){}",
        summary.succeeded,
        summary.skipped,
        summary.failed.len(),
        summary.total,
        if summary.cancelled { ", cancelled" } else { "" }
    );
    for failure in &summary.failed {
        println!(
            "  {} [{}] {}: {}",
            failure.id,
            failure.error.kind(),
            failure.preview,
            failure.error
        );
    }
}

pub(crate) async fn run_batch(manager: &WorkflowManager, session: &Session) -> Result<BatchSummary> {
    let reporter = ProgressReporter::new()?;
    let (cancel, listener) = cancel_on_ctrl_c();
    let summary = manager.run_batch(session, &reporter, &cancel).await;
    listener.abort();
    print_summary(&summary);
    Ok(summary)
}

fn load_session(config: &Config, path: &Path) -> Result<Session> {
    let script = Script::load_with_voice_table(path, &config.characters)
        .with_context(|| format!("Failed to load script {}", path.display()))?;
    Ok(Session::new(script))
}

async fn status(manager: &WorkflowManager, session: &Session) -> Result<()> {
    let plan = manager.plan(session).await;
    let script = session.script();
    println!("{} ({} lines)", script.name, plan.lines.len());

    for (index, name) in &plan.numbering_collisions {
        println!("! scene {} '{}' overflows legacy line numbering", index, name);
    }

    let mut done = 0;
    for item in &plan.lines {
        let line = &item.line;
        let state = if item.generated {
            done += 1;
            "done"
        } else if resolve_voice(script, &line.character).is_err() {
            "no voice"
        } else {
            "pending"
        };
        println!(
            "{:>4}:{:<4} {:<12} {:<8} {}",
            line.scene_index,
            line.dialogue_index,
            line.character,
            state,
            item.paths.audio.display()
        );
    }
    println!("{}/{} generated", done, plan.lines.len());
    Ok(())
}

async fn generate(
    manager: &WorkflowManager,
    mut session: Session,
    id: LineId,
    text: Option<String>,
    emotion: Option<String>,
    set: &[String],
    skip_existing: bool,
) -> Result<()> {
    session.original(id)?;
    if let Some(text) = text {
        session.set_text(id, text);
    }
    if let Some(emotion) = emotion {
        session.set_emotion(id, emotion);
    }
    for raw in set {
        let (key, value) = parse_override(raw)?;
        session.set_param(id, key, value);
    }

    match manager.generate_line(&session, id, !skip_existing).await? {
        LineOutcome::Written { paths, bytes } => {
            println!("Wrote {} ({} bytes)", paths.audio.display(), bytes);
        }
        LineOutcome::Skipped { paths } => {
            println!("Already generated: {}", paths.audio.display());
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let config = Config::load(&cli.config)
        .with_context(|| format!("Error loading config from {}", cli.config.display()))?;

    let backend =
        create_backend(&config.api).context("Failed to initialize the synthesis backend")?;
    let backend = Arc::from(backend);
    let storage = Arc::new(NativeStorage::new());
    let manager = WorkflowManager::from_config(&config, &program_dir(), backend, storage);

    match cli.command {
        Commands::Status { script } => {
            let session = load_session(&config, &script)?;
            status(&manager, &session).await
        }
        Commands::Batch { script } => {
            let session = load_session(&config, &script)?;
            let summary = run_batch(&manager, &session).await?;
            if !summary.failed.is_empty() {
                return Err(anyhow!("{} line(s) failed", summary.failed.len()));
            }
            if summary.cancelled {
                return Err(anyhow!("batch cancelled"));
            }
            Ok(())
        }
        Commands::Generate {
            script,
            scene,
            line,
            text,
            emotion,
            set,
            skip_existing,
        } => {
            let session = load_session(&config, &script)?;
            let id = LineId {
                scene_index: scene,
                dialogue_index: line,
            };
            generate(&manager, session, id, text, emotion, &set, skip_existing).await
        }
        Commands::Review { script } => {
            let session = load_session(&config, &script)?;
            review::run(&manager, session).await
        }
    }
}
