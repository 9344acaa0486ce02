use std::io::{self, ErrorKind, Write};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use atelier_contracts::chat::{parse_intent, CHAT_HELP_COMMANDS};
use atelier_contracts::images::EncodedImage;
use atelier_engine::{
    SessionEngine, SubmitRejection, SubmitReply, GENERATION_APOLOGY,
};
use clap::{Parser, Subcommand};
use serde_json::Value;

#[derive(Debug, Parser)]
#[command(
    name = "atelier",
    version,
    about = "Conversational studio for style-consistent synthetic images"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    Chat(ChatArgs),
    Render(RenderArgs),
}

#[derive(Debug, Parser)]
struct ChatArgs {
    /// Directory where rendered artifacts are written.
    #[arg(long)]
    out: PathBuf,
    /// Events file; defaults to events.jsonl inside --out.
    #[arg(long)]
    events: Option<PathBuf>,
    /// Style id to pin before the first generation.
    #[arg(long)]
    style: Option<String>,
}

#[derive(Debug, Parser)]
struct RenderArgs {
    #[arg(long)]
    prompt: String,
    #[arg(long)]
    out: PathBuf,
    #[arg(long)]
    events: Option<PathBuf>,
    #[arg(long)]
    style: Option<String>,
    /// Base image file to restyle instead of composing fresh.
    #[arg(long)]
    base: Option<PathBuf>,
}

fn main() {
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("atelier error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Chat(args) => {
            run_chat(args)?;
            Ok(0)
        }
        Command::Render(args) => run_render(args),
    }
}

fn run_chat(args: ChatArgs) -> Result<()> {
    let events_path = args
        .events
        .clone()
        .unwrap_or_else(|| args.out.join("events.jsonl"));
    let mut engine = SessionEngine::new(events_path)?;
    if let Some(style) = &args.style {
        apply_style(&mut engine, style)?;
    }

    let stdin = io::stdin();
    let mut line = String::new();

    println!("Atelier chat started. Type /help for commands.");

    loop {
        print!("> ");
        io::stdout().flush()?;

        line.clear();
        let read = match stdin.read_line(&mut line) {
            Ok(read) => read,
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => return Err(err.into()),
        };
        if read == 0 {
            break;
        }

        let input = line.trim_end_matches(['\n', '\r']);
        let intent = parse_intent(input);
        match intent.action.as_str() {
            "noop" => continue,
            "help" => {
                println!("Commands: {}", CHAT_HELP_COMMANDS.join(" "));
            }
            "list_styles" => {
                let active = engine.active_style_id().map(str::to_string);
                for profile in engine.styles() {
                    let marker = if active.as_deref() == Some(profile.id.as_str()) {
                        "*"
                    } else {
                        " "
                    };
                    println!("{marker} {:<14} {}", profile.id, profile.label);
                }
            }
            "set_style" => {
                match value_as_non_empty_string(intent.command_args.get("style")) {
                    Some(requested) => apply_style(&mut engine, &requested)?,
                    None => println!("/style requires a style id (see /styles)"),
                }
            }
            "set_base_image" => {
                let Some(path_text) = value_as_non_empty_string(intent.command_args.get("path"))
                else {
                    println!("/use requires a path");
                    continue;
                };
                let path = PathBuf::from(&path_text);
                match EncodedImage::from_path(&path) {
                    Ok(image) => {
                        let label = file_label(&path);
                        engine.set_base_image(image, label)?;
                        println!("Base image set to {path_text}");
                    }
                    Err(err) => println!("Could not load base image: {err:#}"),
                }
            }
            "clear_base_image" => {
                if engine.clear_base_image()? {
                    println!("Base image cleared");
                } else {
                    println!("No base image to clear");
                }
            }
            "adopt_base_image" => {
                let Some(message_id) =
                    value_as_non_empty_string(intent.command_args.get("message_id"))
                else {
                    println!("/adopt requires a message id");
                    continue;
                };
                if engine.adopt_base_image(&message_id)? {
                    println!("Adopted {message_id} as the base image");
                } else {
                    println!("Message {message_id} has no image to adopt");
                }
            }
            "generate" => match engine.submit(input)? {
                SubmitReply::Rejected(SubmitRejection::Busy) => {
                    println!("A render is already in flight; wait for it to settle.");
                }
                SubmitReply::Rejected(SubmitRejection::EmptyPrompt) => continue,
                SubmitReply::Completed(record) => {
                    let (caption, image) = engine
                        .message(&record.message_id)
                        .map(|message| (message.text.clone(), message.image.clone()))
                        .unwrap_or_default();
                    println!("[{}] {caption}", record.message_id);
                    if let Some(image) = image {
                        let path = save_artifact(&args.out, record.iteration, &image)?;
                        println!("Saved iteration {} to {}", record.iteration, path.display());
                    }
                }
                SubmitReply::Failed(_) => {
                    println!("{GENERATION_APOLOGY}");
                }
            },
            _ => {
                let command = value_as_non_empty_string(intent.command_args.get("command"))
                    .unwrap_or_else(|| "?".to_string());
                println!("Unknown command /{command}. Type /help for commands.");
            }
        }
    }

    Ok(())
}

fn run_render(args: RenderArgs) -> Result<i32> {
    let events_path = args
        .events
        .clone()
        .unwrap_or_else(|| args.out.join("events.jsonl"));
    let mut engine = SessionEngine::new(events_path)?;
    if let Some(style) = &args.style {
        apply_style(&mut engine, style)?;
    }
    if let Some(base) = &args.base {
        let image = EncodedImage::from_path(base)?;
        engine.set_base_image(image, file_label(base))?;
    }

    match engine.submit(&args.prompt)? {
        SubmitReply::Completed(record) => {
            let (caption, image) = engine
                .message(&record.message_id)
                .map(|message| (message.text.clone(), message.image.clone()))
                .unwrap_or_default();
            let Some(image) = image else {
                bail!("completed generation carried no image");
            };
            let path = save_artifact(&args.out, record.iteration, &image)?;
            println!("{caption}");
            println!("{}", path.display());
            Ok(0)
        }
        SubmitReply::Failed(_) => {
            eprintln!("{GENERATION_APOLOGY}");
            Ok(1)
        }
        SubmitReply::Rejected(SubmitRejection::EmptyPrompt) => {
            bail!("prompt must not be empty")
        }
        SubmitReply::Rejected(SubmitRejection::Busy) => {
            bail!("a render is already in flight")
        }
    }
}

fn apply_style(engine: &mut SessionEngine, requested: &str) -> Result<()> {
    let selection = engine.select_style(requested)?;
    match selection.fallback_reason {
        Some(reason) => println!("{reason}"),
        None => println!(
            "Style set to {} ({})",
            selection.profile.id, selection.profile.label
        ),
    }
    Ok(())
}

fn save_artifact(out_dir: &Path, iteration: u64, image: &EncodedImage) -> Result<PathBuf> {
    let (mime, bytes) = image.decode()?;
    let ext = match mime.as_str() {
        "image/jpeg" => "jpg",
        "image/webp" => "webp",
        _ => "png",
    };
    std::fs::create_dir_all(out_dir)
        .with_context(|| format!("failed to create {}", out_dir.display()))?;
    let path = out_dir.join(format!("artifact-{iteration:03}.{ext}"));
    std::fs::write(&path, bytes).with_context(|| format!("failed to write {}", path.display()))?;
    Ok(path)
}

fn file_label(path: &Path) -> String {
    path.file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("base image")
        .to_string()
}

fn value_as_non_empty_string(value: Option<&Value>) -> Option<String> {
    value
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|text| !text.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use atelier_contracts::images::EncodedImage;
    use serde_json::json;

    use super::{file_label, save_artifact, value_as_non_empty_string};

    #[test]
    fn value_helper_rejects_blank_and_missing_values() {
        assert_eq!(value_as_non_empty_string(None), None);
        assert_eq!(value_as_non_empty_string(Some(&json!("   "))), None);
        assert_eq!(value_as_non_empty_string(Some(&json!(7))), None);
        assert_eq!(
            value_as_non_empty_string(Some(&json!("  glasswing "))),
            Some("glasswing".to_string())
        );
    }

    #[test]
    fn file_label_falls_back_for_pathless_values() {
        assert_eq!(file_label(Path::new("/tmp/harbor.png")), "harbor.png");
        assert_eq!(file_label(Path::new("/")), "base image");
    }

    #[test]
    fn save_artifact_writes_decoded_bytes_with_the_right_extension() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let image = EncodedImage::from_bytes(b"png-bytes", "image/png");

        let path = save_artifact(temp.path(), 3, &image)?;
        assert!(path.ends_with("artifact-003.png"));
        assert_eq!(std::fs::read(&path)?, b"png-bytes");

        let jpeg = EncodedImage::from_bytes(b"jpeg-bytes", "image/jpeg");
        let path = save_artifact(temp.path(), 12, &jpeg)?;
        assert!(path.ends_with("artifact-012.jpg"));
        Ok(())
    }
}
