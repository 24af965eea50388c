//! Line-oriented front end for the turn engine.
//!
//! A simple protocol suited to terminals, scripts and AI agents:
//! - Lines starting with `#` are commands (party, start, options, ...)
//! - Any other line is a free-text player action
//! - Output lines are tagged (`[DM]`, `[OPTIONS]`, `[ERROR]`, ...)

use crate::CliOptions;
use dnd_rag_core::{SessionSnapshot, TurnEngine};
use std::io::{self, BufRead, Write};
use std::path::PathBuf;

const HELP: &[(&str, &str)] = &[
    ("#party", "Generate a new party (resets the session)"),
    ("#start", "Narrate the opening scene"),
    ("#options", "Ask the DM for three possible actions"),
    ("#choose <n>", "Take option n, then let the DM respond"),
    ("#do <text>", "Take your own action (same as a plain line)"),
    ("#dm", "Retry the DM response after a failure"),
    ("#suggest <slot>", "Suggest an action for a party member, e.g. #suggest Player 2"),
    ("#ask <question>", "Ask the DM a question; the story is unchanged"),
    ("#lore <dir>", "Load .txt/.md lore files from a folder"),
    ("#save <path>", "Save the session"),
    ("#load <path>", "Load a saved session"),
    ("#status", "Show turn and phase"),
    ("#help", "Show this help"),
    ("#quit", "Exit"),
];

/// A parsed input line.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Party,
    Start,
    Options,
    /// 1-based option number as typed.
    Choose(usize),
    Do(String),
    Dm,
    Suggest(String),
    Ask(String),
    Lore(PathBuf),
    Save(PathBuf),
    Load(PathBuf),
    Status,
    Help,
    Quit,
}

/// Whether the loop keeps reading input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Quit,
}

/// Parse one non-empty input line.
pub fn parse_command(line: &str) -> Result<Command, String> {
    let line = line.trim();
    let Some(rest) = line.strip_prefix('#') else {
        return Ok(Command::Do(line.to_string()));
    };

    let (name, arg) = match rest.split_once(char::is_whitespace) {
        Some((name, arg)) => (name, arg.trim()),
        None => (rest, ""),
    };
    let required = |usage: &str| {
        if arg.is_empty() {
            Err(format!("Usage: {usage}"))
        } else {
            Ok(arg.to_string())
        }
    };

    match name.to_lowercase().as_str() {
        "party" => Ok(Command::Party),
        "start" => Ok(Command::Start),
        "options" => Ok(Command::Options),
        "choose" => match arg.parse::<usize>() {
            Ok(n) if n >= 1 => Ok(Command::Choose(n)),
            _ => Err("Usage: #choose <n> (n starts at 1)".to_string()),
        },
        "do" => required("#do <text>").map(Command::Do),
        "dm" => Ok(Command::Dm),
        "suggest" => required("#suggest <slot>").map(Command::Suggest),
        "ask" => required("#ask <question>").map(Command::Ask),
        "lore" => required("#lore <dir>").map(|p| Command::Lore(p.into())),
        "save" => required("#save <path>").map(|p| Command::Save(p.into())),
        "load" => required("#load <path>").map(|p| Command::Load(p.into())),
        "status" => Ok(Command::Status),
        "help" => Ok(Command::Help),
        "quit" | "exit" => Ok(Command::Quit),
        _ => Err("Unknown command. Type #help for help.".to_string()),
    }
}

/// Run the read-eval-print loop on stdin/stdout.
pub async fn run(mut engine: TurnEngine, options: CliOptions) -> io::Result<()> {
    let mut stdout = io::stdout();

    writeln!(stdout, "=== D&D Dungeon Master ===")?;
    if let Some(dir) = options.lore {
        execute(&mut engine, Command::Lore(dir), &mut stdout).await?;
    }
    if let Some(path) = options.load {
        execute(&mut engine, Command::Load(path), &mut stdout).await?;
    }
    print_help(&mut stdout)?;
    writeln!(stdout)?;
    writeln!(stdout, "Type #party to begin.")?;
    stdout.flush()?;

    let stdin = io::stdin();
    for line in stdin.lock().lines() {
        let line = match line {
            Ok(l) => l,
            Err(e) => {
                eprintln!("Error reading input: {e}");
                break;
            }
        };

        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let flow = match parse_command(line) {
            Ok(command) => execute(&mut engine, command, &mut stdout).await?,
            Err(message) => {
                writeln!(stdout, "[ERROR] {message}")?;
                Flow::Continue
            }
        };
        stdout.flush()?;

        if flow == Flow::Quit {
            break;
        }
    }

    Ok(())
}

/// Apply one command to the engine and print the outcome.
///
/// Engine errors are printed, not returned; the session stays where it was.
pub async fn execute(
    engine: &mut TurnEngine,
    command: Command,
    out: &mut impl Write,
) -> io::Result<Flow> {
    match command {
        Command::Party => match engine.new_party().await {
            Ok(party) => {
                writeln!(out, "[PARTY]")?;
                for member in party.iter() {
                    writeln!(out, "  {}: {}", member.slot, member.character.summary())?;
                    writeln!(out, "    {}", member.character.backstory)?;
                }
            }
            Err(e) => writeln!(out, "[ERROR] Party creation failed: {e}")?,
        },
        Command::Start => match engine.start_adventure().await {
            Ok(state) => {
                let intro = state.intro_text.clone().unwrap_or_default();
                print_narration(out, &intro)?;
            }
            Err(e) => writeln!(out, "[ERROR] {e}")?,
        },
        Command::Options => match engine.request_options().await {
            Ok(state) => {
                writeln!(out, "[OPTIONS]")?;
                for (n, option) in state.current_options.iter().enumerate() {
                    writeln!(out, "  {}. {option}", n + 1)?;
                }
            }
            Err(e) => writeln!(out, "[ERROR] {e}")?,
        },
        Command::Choose(n) => {
            let committed = engine.process_player_choice(Some(n - 1), None).await.map(|_| ());
            act(engine, committed, out).await?;
        }
        Command::Do(text) => {
            let committed = engine.process_player_choice(None, Some(text.as_str())).await.map(|_| ());
            act(engine, committed, out).await?;
        }
        Command::Dm => act(engine, Ok(()), out).await?,
        Command::Suggest(slot) => match engine.suggest_player_action(&slot).await {
            Ok(action) => {
                writeln!(out, "[SUGGESTION] {slot}")?;
                writeln!(out, "{action}")?;
            }
            Err(e) => writeln!(out, "[ERROR] {e}")?,
        },
        Command::Ask(question) => match engine.ask_dm(&question).await {
            Ok(answer) => {
                writeln!(out, "[ANSWER]")?;
                writeln!(out, "{answer}")?;
            }
            Err(e) => writeln!(out, "[ERROR] {e}")?,
        },
        Command::Lore(dir) => match engine.lore().ingest_dir(&dir).await {
            Ok(summary) => writeln!(
                out,
                "[LORE] {} documents, {} chunks from {}",
                summary.documents,
                summary.chunks,
                dir.display()
            )?,
            Err(e) => writeln!(out, "[ERROR] Lore loading failed: {e}")?,
        },
        Command::Save(path) => match engine.snapshot().save(&path).await {
            Ok(()) => writeln!(out, "[SAVED] Session saved to {}", path.display())?,
            Err(e) => writeln!(out, "[ERROR] Save failed: {e}")?,
        },
        Command::Load(path) => match SessionSnapshot::load(&path).await {
            Ok(snapshot) => {
                let found = snapshot.is_some();
                engine.restore(snapshot).await;
                if found {
                    writeln!(out, "[LOADED] Session loaded from {}", path.display())?;
                } else {
                    writeln!(out, "[LOADED] No save at {}, starting fresh", path.display())?;
                }
                print_status(engine, out)?;
            }
            Err(e) => writeln!(out, "[ERROR] Load failed: {e}")?,
        },
        Command::Status => print_status(engine, out)?,
        Command::Help => {
            writeln!(out, "[HELP]")?;
            print_help(out)?;
        }
        Command::Quit => {
            writeln!(out, "Goodbye!")?;
            return Ok(Flow::Quit);
        }
    }

    Ok(Flow::Continue)
}

/// Run the DM turn after a committed player action.
async fn act(
    engine: &mut TurnEngine,
    committed: Result<(), dnd_rag_core::EngineError>,
    out: &mut impl Write,
) -> io::Result<()> {
    if let Err(e) = committed {
        return writeln!(out, "[ERROR] {e}");
    }

    match engine.run_dm_turn().await {
        Ok(state) => {
            let narration = state
                .last_line()
                .and_then(|line| line.strip_prefix("DM: "))
                .unwrap_or_default()
                .to_string();
            print_narration(out, &narration)?;
            if engine.turn_limit_reached() {
                writeln!(out, "[NOTICE] Turn limit reached; time to bring the tale to a close.")?;
            }
            Ok(())
        }
        Err(e) => writeln!(out, "[ERROR] {e} (type #dm to retry)"),
    }
}

fn print_narration(out: &mut impl Write, text: &str) -> io::Result<()> {
    writeln!(out, "[DM]")?;
    for para in text.split("\n\n") {
        writeln!(out, "{para}")?;
    }
    writeln!(out)
}

fn print_status(engine: &TurnEngine, out: &mut impl Write) -> io::Result<()> {
    let state = engine.state();
    writeln!(out, "[STATUS]")?;
    writeln!(out, "  Turn: {} ({} remaining)", state.turn, engine.turns_remaining())?;
    writeln!(out, "  Phase: {}", state.phase)?;
    if let Some(party) = engine.party() {
        writeln!(out, "  Party: {}", party.names().join(", "))?;
    }
    if let Some(choice) = &state.last_choice {
        writeln!(out, "  Last action: {choice}")?;
    }
    Ok(())
}

fn print_help(out: &mut impl Write) -> io::Result<()> {
    writeln!(out, "Commands:")?;
    for (command, description) in HELP {
        writeln!(out, "  {command:<16} - {description}")?;
    }
    writeln!(out, "  (anything else is sent as your action)")
}
