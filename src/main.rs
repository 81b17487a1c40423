use std::path::PathBuf;

use anyhow::{anyhow, Result};
use dotenvy::dotenv;
use tracing::{error, info};

mod config;
mod db;
mod handlers;
mod llm;
mod state;
mod studio;
mod utils;

use config::CONFIG;
use db::database::Database;
use handlers::commands::{self, CreditsAction, GenerateArgs};
use state::AppState;
use studio::credits::SubscriptionLevel;
use studio::references::RefCategory;
use studio::types::DEFAULT_ASPECT_RATIO;
use studio::{BatchSize, ImageStatus};
use utils::logging::init_logging;
use utils::timing::{complete_command_timer, start_command_timer};

const DEFAULT_GALLERY_LIMIT: i64 = 20;

#[derive(Debug, Clone, PartialEq)]
enum Command {
    Generate(GenerateArgs),
    Dna { faces: Vec<PathBuf> },
    Enhance { prompt: String },
    Regenerate { id: String },
    Gallery { limit: i64 },
    Show { id: String },
    Status { id: String, status: ImageStatus },
    Export { id: String, out_dir: PathBuf },
    Credits(CreditsAction),
    Help,
}

impl Command {
    fn name(&self) -> &'static str {
        match self {
            Command::Generate(_) => "generate",
            Command::Dna { .. } => "dna",
            Command::Enhance { .. } => "enhance",
            Command::Regenerate { .. } => "regenerate",
            Command::Gallery { .. } => "gallery",
            Command::Show { .. } => "show",
            Command::Status { .. } => "status",
            Command::Export { .. } => "export",
            Command::Credits(_) => "credits",
            Command::Help => "help",
        }
    }
}

fn usage() -> &'static str {
    "Usage: shooter <command> [options]

Commands:
  generate --theme <text> [--batch-size 3|5|8|10] [--aspect-ratio 1:1|3:4|4:3|9:16|16:9]
           [--face <file>]... [--style <file>]... [--scene <file>]...
           [--lock-identity | --dna <text>] [--enhance]
  dna --face <file>...
  enhance --prompt <text>
  regenerate --id <id>
  gallery [--limit <n>]
  show --id <id>
  status --id <id> --set draft|scheduled|posted
  export --id <id> [--out <dir>]
  credits [top-up --pack 10|25|50|100 | subscribe --level none|basic|pro]"
}

fn take_value<'a>(args: &'a [String], index: &mut usize, flag: &str) -> Result<&'a str> {
    *index += 1;
    args.get(*index)
        .map(|value| value.as_str())
        .ok_or_else(|| anyhow!("Missing value for {flag}"))
}

fn unknown_argument(command: &str, other: &str) -> anyhow::Error {
    anyhow!("Unknown {command} argument: {other}\n{}", usage())
}

fn parse_generate_args(args: &[String]) -> Result<GenerateArgs> {
    let mut theme: Option<String> = None;
    let mut batch_size = BatchSize::default();
    let mut aspect_ratio = DEFAULT_ASPECT_RATIO.to_string();
    let mut references = Vec::new();
    let mut lock_identity = false;
    let mut character_dna = None;
    let mut enhance = false;

    let mut index = 0;
    while index < args.len() {
        match args[index].as_str() {
            "--theme" | "--prompt" => {
                theme = Some(take_value(args, &mut index, "--theme")?.to_string());
            }
            "--batch-size" => {
                batch_size = take_value(args, &mut index, "--batch-size")?.parse()?;
            }
            "--aspect-ratio" => {
                aspect_ratio = take_value(args, &mut index, "--aspect-ratio")?.to_string();
            }
            flag @ ("--face" | "--style" | "--scene") => {
                let category: RefCategory = flag.trim_start_matches("--").parse()?;
                let path = take_value(args, &mut index, flag)?;
                references.push((category, PathBuf::from(path)));
            }
            "--lock-identity" => lock_identity = true,
            "--dna" => {
                character_dna = Some(take_value(args, &mut index, "--dna")?.to_string());
            }
            "--enhance" => enhance = true,
            other => return Err(unknown_argument("generate", other)),
        }
        index += 1;
    }

    let theme = theme.ok_or_else(|| anyhow!("--theme is required"))?;
    if lock_identity && character_dna.is_some() {
        return Err(anyhow!("--dna and --lock-identity cannot be combined"));
    }
    Ok(GenerateArgs {
        theme,
        batch_size,
        aspect_ratio,
        references,
        lock_identity,
        character_dna,
        enhance,
    })
}

fn parse_id(command: &str, args: &[String]) -> Result<String> {
    let mut id = None;
    let mut index = 0;
    while index < args.len() {
        match args[index].as_str() {
            "--id" => id = Some(take_value(args, &mut index, "--id")?.to_string()),
            other => return Err(unknown_argument(command, other)),
        }
        index += 1;
    }
    id.ok_or_else(|| anyhow!("--id is required"))
}

fn parse_credits_args(args: &[String]) -> Result<CreditsAction> {
    match args.first().map(|value| value.as_str()) {
        None => Ok(CreditsAction::Show),
        Some("top-up") => match args.get(1).map(|value| value.as_str()) {
            Some("--pack") => {
                let mut index = 1;
                let value = take_value(args, &mut index, "--pack")?;
                let amount = value
                    .parse::<u32>()
                    .map_err(|_| anyhow!("Invalid --pack value: {value}"))?;
                Ok(CreditsAction::TopUp(amount))
            }
            _ => Err(anyhow!("credits top-up requires --pack <amount>")),
        },
        Some("subscribe") => match args.get(1).map(|value| value.as_str()) {
            Some("--level") => {
                let mut index = 1;
                let level: SubscriptionLevel = take_value(args, &mut index, "--level")?.parse()?;
                Ok(CreditsAction::Subscribe(level))
            }
            _ => Err(anyhow!("credits subscribe requires --level <level>")),
        },
        Some(other) => Err(unknown_argument("credits", other)),
    }
}

fn parse_command(args: &[String]) -> Result<Command> {
    let Some(command) = args.get(1) else {
        return Ok(Command::Help);
    };
    let rest = &args[2..];

    match command.as_str() {
        "generate" => Ok(Command::Generate(parse_generate_args(rest)?)),
        "dna" => {
            let mut faces = Vec::new();
            let mut index = 0;
            while index < rest.len() {
                match rest[index].as_str() {
                    "--face" => faces.push(PathBuf::from(take_value(rest, &mut index, "--face")?)),
                    other => return Err(unknown_argument("dna", other)),
                }
                index += 1;
            }
            if faces.is_empty() {
                return Err(anyhow!("dna requires at least one --face <file>"));
            }
            Ok(Command::Dna { faces })
        }
        "enhance" => {
            let mut prompt = None;
            let mut index = 0;
            while index < rest.len() {
                match rest[index].as_str() {
                    "--prompt" => prompt = Some(take_value(rest, &mut index, "--prompt")?.to_string()),
                    other => return Err(unknown_argument("enhance", other)),
                }
                index += 1;
            }
            let prompt = prompt.ok_or_else(|| anyhow!("--prompt is required"))?;
            Ok(Command::Enhance { prompt })
        }
        "regenerate" | "redo" => Ok(Command::Regenerate {
            id: parse_id("regenerate", rest)?,
        }),
        "gallery" => {
            let mut limit = DEFAULT_GALLERY_LIMIT;
            let mut index = 0;
            while index < rest.len() {
                match rest[index].as_str() {
                    "--limit" => {
                        let value = take_value(rest, &mut index, "--limit")?;
                        limit = value
                            .parse::<i64>()
                            .map_err(|_| anyhow!("Invalid --limit value: {value}"))?
                            .max(1);
                    }
                    other => return Err(unknown_argument("gallery", other)),
                }
                index += 1;
            }
            Ok(Command::Gallery { limit })
        }
        "show" => Ok(Command::Show {
            id: parse_id("show", rest)?,
        }),
        "status" => {
            let mut id = None;
            let mut status: Option<ImageStatus> = None;
            let mut index = 0;
            while index < rest.len() {
                match rest[index].as_str() {
                    "--id" => id = Some(take_value(rest, &mut index, "--id")?.to_string()),
                    "--set" => status = Some(take_value(rest, &mut index, "--set")?.parse()?),
                    other => return Err(unknown_argument("status", other)),
                }
                index += 1;
            }
            Ok(Command::Status {
                id: id.ok_or_else(|| anyhow!("--id is required"))?,
                status: status.ok_or_else(|| anyhow!("--set is required"))?,
            })
        }
        "export" => {
            let mut id = None;
            let mut out_dir = CONFIG.export_dir.clone();
            let mut index = 0;
            while index < rest.len() {
                match rest[index].as_str() {
                    "--id" => id = Some(take_value(rest, &mut index, "--id")?.to_string()),
                    "--out" => out_dir = PathBuf::from(take_value(rest, &mut index, "--out")?),
                    other => return Err(unknown_argument("export", other)),
                }
                index += 1;
            }
            Ok(Command::Export {
                id: id.ok_or_else(|| anyhow!("--id is required"))?,
                out_dir,
            })
        }
        "credits" => Ok(Command::Credits(parse_credits_args(rest)?)),
        "help" | "--help" | "-h" => Ok(Command::Help),
        other => Err(anyhow!("Unknown command: {other}\n{}", usage())),
    }
}

async fn run(state: &AppState, command: Command) -> Result<()> {
    match command {
        Command::Generate(args) => commands::generate_handler(state, args).await,
        Command::Dna { faces } => commands::dna_handler(state, &faces).await,
        Command::Enhance { prompt } => commands::enhance_handler(state, &prompt).await,
        Command::Regenerate { id } => commands::regenerate_handler(state, &id).await,
        Command::Gallery { limit } => commands::gallery_handler(state, limit).await,
        Command::Show { id } => commands::show_handler(state, &id).await,
        Command::Status { id, status } => commands::status_handler(state, &id, status).await,
        Command::Export { id, out_dir } => commands::export_handler(state, &id, &out_dir).await,
        Command::Credits(action) => commands::credits_handler(state, action).await,
        Command::Help => {
            println!("{}", usage());
            Ok(())
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    let _guards = init_logging();

    let args: Vec<String> = std::env::args().collect();
    let command = parse_command(&args)?;
    if command == Command::Help {
        println!("{}", usage());
        return Ok(());
    }

    let db = Database::init(&CONFIG.database_url).await?;
    db.health_check().await?;
    let state = AppState::new(db, &CONFIG);
    info!(
        "The Shooter ready (text model {}, image model {})",
        CONFIG.gemini_text_model, CONFIG.gemini_image_model
    );

    let mut timer = start_command_timer(command.name(), &args[1..]);
    match run(&state, command).await {
        Ok(()) => {
            complete_command_timer(&mut timer, "success", None);
            Ok(())
        }
        Err(err) => {
            error!("Command failed: {err:#}");
            complete_command_timer(&mut timer, "error", Some(err.to_string()));
            Err(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn argv(parts: &[&str]) -> Vec<String> {
        std::iter::once("shooter")
            .chain(parts.iter().copied())
            .map(|part| part.to_string())
            .collect()
    }

    #[test]
    fn generate_collects_references_by_category() {
        let command = parse_command(&argv(&[
            "generate",
            "--theme",
            "paris fashion week",
            "--batch-size",
            "5",
            "--face",
            "me.png",
            "--style",
            "mood.jpg",
            "--face",
            "me2.png",
            "--lock-identity",
        ]))
        .unwrap();

        let Command::Generate(args) = command else {
            panic!("expected generate");
        };
        assert_eq!(args.theme, "paris fashion week");
        assert_eq!(args.batch_size, BatchSize::Five);
        assert_eq!(args.aspect_ratio, DEFAULT_ASPECT_RATIO);
        assert!(args.lock_identity);
        assert!(!args.enhance);
        assert_eq!(
            args.references,
            vec![
                (RefCategory::Face, PathBuf::from("me.png")),
                (RefCategory::Style, PathBuf::from("mood.jpg")),
                (RefCategory::Face, PathBuf::from("me2.png")),
            ]
        );
    }

    #[test]
    fn generate_rejects_bad_input() {
        assert!(parse_command(&argv(&["generate"])).is_err());
        assert!(parse_command(&argv(&["generate", "--theme", "x", "--batch-size", "4"])).is_err());
        assert!(parse_command(&argv(&["generate", "--theme"])).is_err());
        assert!(parse_command(&argv(&["generate", "--theme", "x", "--pose", "a.png"])).is_err());
    }

    #[test]
    fn generate_accepts_saved_dna() {
        let command = parse_command(&argv(&[
            "generate",
            "--theme",
            "ski trip",
            "--dna",
            "freckles, auburn bob",
        ]))
        .unwrap();
        let Command::Generate(args) = command else {
            panic!("expected generate");
        };
        assert_eq!(args.character_dna.as_deref(), Some("freckles, auburn bob"));
        assert!(!args.lock_identity);

        assert!(parse_command(&argv(&[
            "generate",
            "--theme",
            "ski trip",
            "--dna",
            "x",
            "--lock-identity",
        ]))
        .is_err());
    }

    #[test]
    fn credits_subcommands_parse() {
        assert_eq!(
            parse_command(&argv(&["credits"])).unwrap(),
            Command::Credits(CreditsAction::Show)
        );
        assert_eq!(
            parse_command(&argv(&["credits", "top-up", "--pack", "50"])).unwrap(),
            Command::Credits(CreditsAction::TopUp(50))
        );
        assert_eq!(
            parse_command(&argv(&["credits", "subscribe", "--level", "pro"])).unwrap(),
            Command::Credits(CreditsAction::Subscribe(SubscriptionLevel::Pro))
        );
        assert!(parse_command(&argv(&["credits", "refund"])).is_err());
    }

    #[test]
    fn status_and_gallery_parse() {
        assert_eq!(
            parse_command(&argv(&["status", "--id", "abc", "--set", "posted"])).unwrap(),
            Command::Status {
                id: "abc".to_string(),
                status: ImageStatus::Posted
            }
        );
        assert_eq!(
            parse_command(&argv(&["gallery", "--limit", "0"])).unwrap(),
            Command::Gallery { limit: 1 }
        );
        assert!(parse_command(&argv(&["status", "--id", "abc", "--set", "archived"])).is_err());
    }

    #[test]
    fn no_arguments_prints_help() {
        assert_eq!(parse_command(&argv(&[])).unwrap(), Command::Help);
        assert!(parse_command(&argv(&["fly"])).is_err());
    }
}
