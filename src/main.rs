use jungle_arena::*;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

const USAGE: &str = "usage: jungle-arena [new [RED] [BLUE] | load <id> | replay <id>] [--json]";

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let mut args: Vec<String> = std::env::args().skip(1).collect();
    let json = args.iter().any(|a| a == "--json");
    args.retain(|a| a != "--json");

    println!("Jungle Arena");
    println!("============\n");

    let store = Store::default();
    let state = match args.first().map(String::as_str) {
        None | Some("new") => {
            let players = Players::or_random(
                args.get(1).map(String::as_str),
                args.get(2).map(String::as_str),
            );
            GameState::with_players(players)
        }
        Some("load") => {
            let Some(id) = args.get(1) else {
                eprintln!("{USAGE}");
                return ExitCode::FAILURE;
            };
            match store.load_str(id) {
                Ok(report) => {
                    for skipped in &report.skipped {
                        println!("Skipped {}", skipped);
                    }
                    report.state
                }
                Err(e) => {
                    eprintln!("Failed to load save: {e}");
                    return ExitCode::FAILURE;
                }
            }
        }
        Some("replay") => {
            let Some(id) = args.get(1).and_then(|id| id.trim().parse::<u32>().ok()) else {
                eprintln!("{USAGE}");
                return ExitCode::FAILURE;
            };
            match store.replay(id) {
                Ok(report) => {
                    println!("Replayed {} commands from record {}", report.applied, id);
                    for skipped in &report.skipped {
                        println!("Skipped {}", skipped);
                    }
                    for issue in &report.issues {
                        println!("  #{} `{}`: {}", issue.index + 1, issue.entry, issue.error);
                    }
                    if report.stopped {
                        println!("Stop command encountered in record.");
                    }
                    report.state
                }
                Err(e) => {
                    eprintln!("Failed to load record: {e}");
                    return ExitCode::FAILURE;
                }
            }
        }
        Some(_) => {
            eprintln!("{USAGE}");
            return ExitCode::FAILURE;
        }
    };

    if json {
        match serde_json::to_string_pretty(&state) {
            Ok(text) => println!("{text}"),
            Err(e) => {
                eprintln!("Failed to encode state: {e}");
                return ExitCode::FAILURE;
            }
        }
    } else {
        println!("{}", state.display_board());
        match state.result_message() {
            Some(message) => println!("{message}"),
            None => println!("Game not ended."),
        }
    }

    ExitCode::SUCCESS
}
