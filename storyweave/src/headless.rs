//! Line-oriented play loop.
//!
//! This provides a simple protocol on stdin/stdout:
//! - A number picks one of the offered choices
//! - Lines starting with `#` are commands (quit, status, image, map, help)
//! - Any other text is free input that steers the next scene

use std::io::{self, BufRead, Write};
use storyweave_core::{Engine, EngineConfig, EngineError, PremiseMode, TurnPhase};

/// Command line options for a session.
#[derive(Debug, Clone)]
pub struct PlayOptions {
    pub resume: bool,
    pub genre: String,
    pub artstyle: String,
    pub premise: PremiseMode,
    pub data_dir: Option<String>,
}

impl Default for PlayOptions {
    fn default() -> Self {
        Self {
            resume: false,
            genre: "fantasy".to_string(),
            artstyle: "painterly".to_string(),
            premise: PremiseMode::Custom,
            data_dir: None,
        }
    }
}

/// Parse session options from command line arguments.
pub fn parse_options_from_args(args: &[String]) -> PlayOptions {
    let mut options = PlayOptions::default();

    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--resume" => options.resume = true,
            "--default-premise" => options.premise = PremiseMode::Default,
            "--genre" => {
                if let Some(genre) = args.get(i + 1) {
                    options.genre = genre.clone();
                    i += 1;
                }
            }
            "--artstyle" => {
                if let Some(style) = args.get(i + 1) {
                    options.artstyle = style.clone();
                    i += 1;
                }
            }
            "--data-dir" => {
                if let Some(dir) = args.get(i + 1) {
                    options.data_dir = Some(dir.clone());
                    i += 1;
                }
            }
            _ => {}
        }
        i += 1;
    }

    options
}

fn prompt_line(lines: &mut impl Iterator<Item = io::Result<String>>) -> Option<String> {
    print!("> ");
    io::stdout().flush().ok();
    loop {
        match lines.next()? {
            Ok(line) if line.trim().is_empty() => continue,
            Ok(line) => return Some(line.trim().to_string()),
            Err(e) => {
                eprintln!("Error reading input: {e}");
                return None;
            }
        }
    }
}

/// Run a session until the player quits or input ends.
pub async fn run(config: EngineConfig, options: PlayOptions) -> Result<(), EngineError> {
    let mut engine = Engine::from_config(config);
    let stdin = io::stdin();
    let mut lines = stdin.lock().lines();

    println!("=== Storyweave ===");
    let resumed = if options.resume {
        match engine.resume().await {
            Ok(phase) => {
                println!("[LOADED] Resuming saved game.");
                phase != TurnPhase::NeedPremise
            }
            Err(EngineError::NoSave) => {
                println!("[INFO] No saved game found; starting a new one.");
                false
            }
            Err(e) => return Err(e),
        }
    } else {
        false
    };

    if !resumed {
        println!("[WORKING] Creating a {} world...", options.genre);
        let candidates = engine
            .start_new_game(&options.genre, &options.artstyle, options.premise)
            .await?;
        if let Some(outline) = &engine.state().outline {
            println!("\n{}\n{}\n", outline.world_name, outline.world_overview);
        }
        println!("[COMPANIONS]");
        for (i, c) in candidates.iter().enumerate() {
            println!("  {}. {} - {}", i + 1, c.name, c.description);
        }
    }

    if engine.phase() == TurnPhase::NeedCompanion {
        let available = engine.state().companion_options.len();
        loop {
            println!("Choose a companion (1-{available}):");
            let Some(line) = prompt_line(&mut lines) else {
                return Ok(());
            };
            match line.parse::<usize>() {
                Ok(n) if n >= 1 => match engine.select_companion(n - 1).await {
                    Ok(companion) => {
                        println!("[COMPANION] {} joins you.", companion.name);
                        break;
                    }
                    Err(e) => println!("[ERROR] {e}"),
                },
                _ => println!("[ERROR] Enter a number."),
            }
        }
    }

    loop {
        let text = engine.get_current_text().await?;
        let choices = engine.get_current_choices().await?;
        println!();
        for para in text.split("\n\n") {
            println!("{para}");
        }
        println!();
        for (i, choice) in choices.iter().enumerate() {
            println!("  {}. {choice}", i + 1);
        }

        let input = loop {
            let Some(line) = prompt_line(&mut lines) else {
                return Ok(());
            };
            if let Some(command) = line.strip_prefix('#') {
                if !run_command(&mut engine, command.trim()).await? {
                    println!("Goodbye!");
                    return Ok(());
                }
                continue;
            }
            match line.parse::<usize>() {
                Ok(n) if (1..=choices.len()).contains(&n) => break choices[n - 1].clone(),
                Ok(_) => println!("[ERROR] No such choice."),
                Err(_) => break line,
            }
        };

        let outcome = engine.make_choice(&input).await?;
        if let Some(place) = &outcome.moved_to {
            println!("[LOCATION] You arrive at {place}.");
        }
        for id in &outcome.party.added {
            println!("[PARTY] {} joins you.", engine.state().npc_name(id).unwrap_or(id.as_str()));
        }
        for id in &outcome.party.removed {
            println!("[PARTY] {} leaves.", engine.state().npc_name(id).unwrap_or(id.as_str()));
        }
    }
}

/// Handle a `#` command. Returns `false` to quit.
async fn run_command(engine: &mut Engine, command: &str) -> Result<bool, EngineError> {
    match command {
        "quit" | "exit" => return Ok(false),
        "status" => {
            let state = engine.state();
            println!("[STATUS]");
            if let Some(title) = state.acts.current_title() {
                println!("  Act {}: {title}", state.acts.current + 1);
            }
            if let Some(loc) = &state.current_location {
                println!("  Location: {} ({})", loc.subarea, loc.region);
            }
            if let Some(companion) = &state.companion {
                println!("  Companion: {} ({})", companion.name, state.companion_profile.describe());
            }
            let party: Vec<&str> = state.party.iter().filter_map(|id| state.npc_name(id)).collect();
            println!("  Party: {}", if party.is_empty() { "-".to_string() } else { party.join(", ") });
            println!("  Profile: {}", state.player_profile.describe());
            if !state.personality_analysis.is_empty() {
                println!("  Analysis: {}", state.personality_analysis);
            }
            println!("  Choices made: {}", state.choice_log.len());
        }
        "image" => match engine.get_current_image_path().await? {
            Some(path) => println!("[IMAGE] {}", path.display()),
            None => println!("[IMAGE] No image available."),
        },
        "map" => {
            let (visited, revealed) = engine.state().revealed_map();
            println!("[MAP]");
            for place in &revealed {
                let mark = if visited.contains(place) { "*" } else { " " };
                println!("  {mark} {place}");
            }
        }
        "help" => {
            println!("[HELP]");
            println!("  <number>  - Pick an offered choice");
            println!("  <text>    - Do something else");
            println!("  #status   - Show act, location, party and profile");
            println!("  #image    - Illustrate the current scene");
            println!("  #map      - Show known places (* = visited)");
            println!("  #quit     - Exit (the game is saved every turn)");
        }
        _ => println!("[ERROR] Unknown command. Type #help for help."),
    }
    Ok(true)
}
