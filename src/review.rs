use anyhow::Result;
use inquire::{InquireError, Select, Text};
use script2dub::core::params::parse_override;
use script2dub::core::script::LineId;
use script2dub::core::session::Session;
use script2dub::services::workflow::{LineOutcome, WorkflowManager};
use std::fmt;

const PREVIEW_CHARS: usize = 40;

enum MainAction {
    PickLine,
    RunBatch,
    Quit,
}

impl fmt::Display for MainAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            MainAction::PickLine => "Pick a line",
            MainAction::RunBatch => "Generate all missing lines",
            MainAction::Quit => "Quit",
        };
        write!(f, "{}", label)
    }
}

enum LineAction {
    Show,
    EditText,
    EditEmotion,
    SetParam,
    ClearEdits,
    Regenerate,
    Back,
}

impl fmt::Display for LineAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            LineAction::Show => "Show details",
            LineAction::EditText => "Edit text",
            LineAction::EditEmotion => "Edit emotion",
            LineAction::SetParam => "Set parameter (key=value)",
            LineAction::ClearEdits => "Clear edits",
            LineAction::Regenerate => "Regenerate",
            LineAction::Back => "Back",
        };
        write!(f, "{}", label)
    }
}

struct LineChoice {
    id: LineId,
    label: String,
}

impl fmt::Display for LineChoice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label)
    }
}

/// `None` when the operator backs out of a prompt.
fn answered<T>(result: std::result::Result<T, InquireError>) -> Result<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(InquireError::OperationCanceled) | Err(InquireError::OperationInterrupted) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

pub async fn run(manager: &WorkflowManager, mut session: Session) -> Result<()> {
    loop {
        let actions = vec![MainAction::PickLine, MainAction::RunBatch, MainAction::Quit];
        let title = format!(
            "{} ({} edited line(s))",
            session.script().name,
            session.edited_lines()
        );
        match answered(Select::new(&title, actions).prompt())? {
            Some(MainAction::PickLine) => {
                if let Some(id) = pick_line(manager, &session).await? {
                    line_menu(manager, &mut session, id).await?;
                }
            }
            Some(MainAction::RunBatch) => {
                crate::run_batch(manager, &session).await?;
            }
            Some(MainAction::Quit) | None => return Ok(()),
        }
    }
}

async fn pick_line(manager: &WorkflowManager, session: &Session) -> Result<Option<LineId>> {
    let plan = manager.plan(session).await;
    if plan.lines.is_empty() {
        println!("The script has no dialogue lines.");
        return Ok(None);
    }

    let choices: Vec<LineChoice> = plan
        .lines
        .iter()
        .map(|item| {
            let id = item.line.id();
            let edited = session.edit(id).map_or(false, |e| !e.is_empty());
            LineChoice {
                id,
                label: format!(
                    "{} {} {}: {}{}",
                    if item.generated { "✓" } else { "·" },
                    id,
                    item.line.character,
                    item.line.preview(PREVIEW_CHARS),
                    if edited { " (edited)" } else { "" }
                ),
            }
        })
        .collect();

    let picked = answered(Select::new("Line:", choices).with_page_size(15).prompt())?;
    Ok(picked.map(|c| c.id))
}

async fn line_menu(manager: &WorkflowManager, session: &mut Session, id: LineId) -> Result<()> {
    loop {
        let actions = vec![
            LineAction::Show,
            LineAction::EditText,
            LineAction::EditEmotion,
            LineAction::SetParam,
            LineAction::ClearEdits,
            LineAction::Regenerate,
            LineAction::Back,
        ];
        let Some(action) = answered(Select::new(&format!("Line {}", id), actions).prompt())? else {
            return Ok(());
        };

        match action {
            LineAction::Show => show_line(manager, session, id)?,
            LineAction::EditText => {
                let current = session.effective(id)?.text;
                if let Some(text) =
                    answered(Text::new("Text:").with_initial_value(&current).prompt())?
                {
                    session.set_text(id, text);
                }
            }
            LineAction::EditEmotion => {
                let current = session.effective(id)?.emotion;
                if let Some(emotion) =
                    answered(Text::new("Emotion:").with_initial_value(&current).prompt())?
                {
                    session.set_emotion(id, emotion);
                }
            }
            LineAction::SetParam => {
                if let Some(raw) = answered(Text::new("key=value:").prompt())? {
                    match parse_override(&raw) {
                        Ok((key, value)) => session.set_param(id, key, value),
                        Err(e) => println!("{}", e),
                    }
                }
            }
            LineAction::ClearEdits => session.clear(id),
            LineAction::Regenerate => match manager.generate_line(session, id, true).await {
                Ok(LineOutcome::Written { paths, bytes }) => {
                    println!("Wrote {} ({} bytes)", paths.audio.display(), bytes)
                }
                Ok(LineOutcome::Skipped { paths }) => {
                    println!("Already generated: {}", paths.audio.display())
                }
                Err(e) => println!("Generation failed [{}]: {}", e.kind(), e),
            },
            LineAction::Back => return Ok(()),
        }
    }
}

fn show_line(manager: &WorkflowManager, session: &Session, id: LineId) -> Result<()> {
    let original = session.original(id)?;
    let effective = session.effective(id)?;
    let paths = manager.artifact(session, id)?;

    println!("Scene:     {}", original.scene_name);
    println!("Character: {}", original.character);
    println!("Text:      {}", effective.text);
    if effective.text != original.text {
        println!("  (script: {})", original.text);
    }
    println!("Emotion:   {}", effective.emotion);
    println!("Audio:     {}", paths.audio.display());

    let overrides = session.overrides(id);
    if !overrides.is_empty() {
        println!("Overrides: {}", serde_json::to_string(&overrides)?);
    }

    match manager.resolve(session, id) {
        Ok(params) => print!("{}", params.to_yaml()?),
        Err(e) => println!("Cannot resolve parameters: {}", e),
    }
    Ok(())
}
