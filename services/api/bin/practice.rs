//! Rehearse a scenario in the terminal.
//!
//! Lines typed at the prompt are spoken to the simulated patient. Lines
//! starting with `/` are commands; `/help` lists them.

use anyhow::{Context, Result, bail};
use clap::Parser;
use rehearse_api::audio_utils::FileSink;
use rehearse_api::bootstrap::{build_boundaries, build_engine_services};
use rehearse_api::config::Config;
use rehearse_core::engine::ResetOutcome;
use rehearse_core::{
    CheckpointScenarioEngine, EngineState, PlaybackOutcome, ScenarioId, Speaker, SurfaceId,
    TurnId,
};
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::fmt::time::ChronoLocal;

#[derive(Parser)]
#[command(version, about = "Rehearse a clinical conversation in the terminal")]
struct Cli {
    /// Scenario to rehearse; omit to list the available ones
    scenario: Option<String>,
    /// Seed for the patient's replies, for repeatable runs
    #[arg(long)]
    seed: Option<u64>,
    /// Directory to write spoken turns to as MP3 files
    #[arg(long)]
    audio_dir: Option<PathBuf>,
}

const HELP: &str = "\
/guidance        what to aim for at this checkpoint
/feedback        coaching on your last line
/speak [turn]    synthesize a turn (default: the patient's last line)
/reset           start the conversation over
/rate <1-5>      rate your confidence once all checkpoints are done
/test            check the connection to the feedback service
/quit            leave";

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env().context("Failed to load configuration")?;
    tracing_subscriber::fmt()
        .with_max_level(config.log_level)
        .with_timer(ChronoLocal::rfc_3339())
        .with_writer(std::io::stderr)
        .init();

    let args = Cli::parse();

    let boundaries = build_boundaries(&config)?;
    let services = build_engine_services(&config, &boundaries, args.seed)?;

    let Some(scenario) = args.scenario else {
        println!("Available scenarios:");
        for scenario in services.catalog.scenarios() {
            println!(
                "  {:<16} {} ({}, {} checkpoints)",
                scenario.id.as_str(),
                scenario.title,
                scenario.difficulty,
                scenario.checkpoint_count()
            );
        }
        return Ok(());
    };

    if let Some(dir) = &args.audio_dir {
        tokio::fs::create_dir_all(dir)
            .await
            .with_context(|| format!("Failed to create audio directory {:?}", dir))?;
    }

    let mut engine = CheckpointScenarioEngine::new(services, SurfaceId::new("terminal"));
    let session = engine.start(&ScenarioId::new(scenario))?;
    for turn in session.conversation_log() {
        print_turn(turn.speaker(), turn.text());
    }
    print_goal(&engine);
    println!("(type /help for commands)");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match run_line(&mut engine, line, args.audio_dir.as_ref()).await {
            Ok(Flow::Continue) => {}
            Ok(Flow::Quit) => break,
            Err(err) => println!("! {err}"),
        }
        if engine.state() == EngineState::Completed {
            break;
        }
    }
    Ok(())
}

enum Flow {
    Continue,
    Quit,
}

async fn run_line(
    engine: &mut CheckpointScenarioEngine,
    line: &str,
    audio_dir: Option<&PathBuf>,
) -> Result<Flow> {
    let Some(command) = line.strip_prefix('/') else {
        let outcome = engine.submit_turn(line).await?;
        print_turn(Speaker::Assistant, outcome.reply.text());
        if let Some(index) = outcome.checkpoint_reached {
            println!("* checkpoint {} reached", index + 1);
        }
        print_goal(engine);
        return Ok(Flow::Continue);
    };

    let mut parts = command.split_whitespace();
    match (parts.next(), parts.next()) {
        (Some("help"), _) => println!("{HELP}"),
        (Some("quit"), _) => return Ok(Flow::Quit),
        (Some("guidance"), _) => println!("? {}", engine.request_guidance()?),
        (Some("feedback"), _) => {
            let report = engine.evaluate_latest_turn().await?;
            match report.failure {
                Some(kind) => println!("! {}\n  {}", kind.status_message(), report.text),
                None => println!("> {}", report.text),
            }
        }
        (Some("reset"), _) => match engine.reset_conversation()? {
            ResetOutcome::Reset => {
                println!("* conversation reset");
                if let Some(session) = engine.session() {
                    for turn in session.conversation_log() {
                        print_turn(turn.speaker(), turn.text());
                    }
                }
                print_goal(engine);
            }
            ResetOutcome::Disabled => println!("* nothing to reset yet"),
        },
        (Some("rate"), Some(score)) => {
            let score: u8 = score.parse().context("the rating must be a number from 1 to 5")?;
            let result = engine.submit_rating(score)?;
            println!(
                "* session complete: confidence {}/5 after {} turns",
                result.confidence_score.value(),
                result.learner_turns
            );
        }
        (Some("test"), _) => {
            let probe = engine.test_connection().await?;
            match probe.failure {
                Some(err) => println!("! {} ({err})", err.kind().status_message()),
                None => println!("* feedback service: {}", probe.status),
            }
        }
        (Some("speak"), turn) => speak(engine, turn, audio_dir).await?,
        _ => bail!("unknown command; type /help"),
    }
    Ok(Flow::Continue)
}

async fn speak(
    engine: &CheckpointScenarioEngine,
    turn: Option<&str>,
    audio_dir: Option<&PathBuf>,
) -> Result<()> {
    let Some(dir) = audio_dir else {
        bail!("start with --audio-dir to save spoken turns");
    };
    let turn_id = match turn {
        Some(raw) => raw.parse::<TurnId>().context("turn ids are numbers")?,
        None => engine
            .session()
            .and_then(|s| {
                s.conversation_log()
                    .iter()
                    .rev()
                    .find(|t| t.speaker() == Speaker::Assistant)
            })
            .map(|t| t.id())
            .context("the patient has not said anything yet")?,
    };

    let sink = FileSink::new(dir.join(format!("turn-{turn_id}.mp3")));
    match engine.speak_turn(turn_id, &sink).await? {
        PlaybackOutcome::Played => println!("* saved {:?}", sink.path()),
        PlaybackOutcome::Rejected { .. } => println!("! audio is already playing"),
        PlaybackOutcome::Failed(failure) => println!("! {failure}"),
    }
    Ok(())
}

fn print_turn(speaker: Speaker, text: &str) {
    match speaker {
        Speaker::Assistant => println!("patient: {text}"),
        Speaker::User => println!("you: {text}"),
    }
}

fn print_goal(engine: &CheckpointScenarioEngine) {
    match engine.state() {
        EngineState::InProgress(index) => {
            if let Some(goal) = engine.current_goal() {
                println!("[{}] goal: {}", index + 1, goal.goal);
            }
        }
        EngineState::AwaitingRating => println!("* all checkpoints done; /rate <1-5>"),
        _ => {}
    }
}
