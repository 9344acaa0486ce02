use std::collections::BTreeMap;

use serde_json::Value;

use super::command_registry::{
    CommandSpec, NO_ARG_COMMANDS, RAW_ARG_COMMANDS, SINGLE_PATH_COMMANDS,
};

/// A parsed line of chat input: either a slash command or a generation
/// prompt. `prompt` is set only for `generate` intents.
#[derive(Debug, Clone, PartialEq)]
pub struct Intent {
    pub action: String,
    pub raw: String,
    pub prompt: Option<String>,
    pub command_args: BTreeMap<String, Value>,
}

impl Intent {
    fn new(action: &str, raw: &str) -> Self {
        Self {
            action: action.to_string(),
            raw: raw.to_string(),
            prompt: None,
            command_args: BTreeMap::new(),
        }
    }
}

fn find_action(command: &str, specs: &[CommandSpec]) -> Option<&'static str> {
    specs
        .iter()
        .find(|spec| spec.command == command)
        .map(|spec| spec.action)
}

fn parse_single_path_arg(arg: &str) -> String {
    if arg.trim().is_empty() {
        return String::new();
    }
    let parts = match shell_words::split(arg) {
        Ok(parts) => parts,
        Err(_) => arg.split_whitespace().map(str::to_string).collect(),
    };
    let parts: Vec<String> = parts.into_iter().filter(|value| !value.is_empty()).collect();
    match parts.len() {
        0 => String::new(),
        1 => parts[0].clone(),
        _ => parts.join(" "),
    }
}

pub fn parse_intent(text: &str) -> Intent {
    let raw_trimmed = text.trim();
    if raw_trimmed.is_empty() {
        return Intent::new("noop", text);
    }

    if let Some(slash_tail) = raw_trimmed.strip_prefix('/') {
        let command_len = slash_tail
            .chars()
            .take_while(|ch| ch.is_ascii_alphanumeric() || *ch == '_')
            .count();
        if command_len > 0 {
            let command = slash_tail[..command_len].to_ascii_lowercase();
            let remainder = &slash_tail[command_len..];
            let arg = if remainder.is_empty() {
                ""
            } else {
                remainder.trim()
            };

            if let Some(action) = find_action(&command, RAW_ARG_COMMANDS) {
                let key = if action == "set_style" {
                    "style"
                } else {
                    "message_id"
                };
                let mut intent = Intent::new(action, text);
                intent
                    .command_args
                    .insert(key.to_string(), Value::String(arg.to_string()));
                return intent;
            }

            if let Some(action) = find_action(&command, SINGLE_PATH_COMMANDS) {
                let mut intent = Intent::new(action, text);
                intent.command_args.insert(
                    "path".to_string(),
                    Value::String(parse_single_path_arg(arg)),
                );
                return intent;
            }

            if let Some(action) = find_action(&command, NO_ARG_COMMANDS) {
                return Intent::new(action, text);
            }

            let mut intent = Intent::new("unknown", text);
            intent
                .command_args
                .insert("command".to_string(), Value::String(command));
            intent
                .command_args
                .insert("arg".to_string(), Value::String(arg.to_string()));
            return intent;
        }
    }

    let mut intent = Intent::new("generate", text);
    intent.prompt = Some(raw_trimmed.to_string());
    intent
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::parse_intent;

    #[test]
    fn blank_input_is_a_noop() {
        assert_eq!(parse_intent("").action, "noop");
        assert_eq!(parse_intent("   \t ").action, "noop");
    }

    #[test]
    fn bare_text_becomes_a_generate_intent() {
        let intent = parse_intent("  red lighthouse at night  ");
        assert_eq!(intent.action, "generate");
        assert_eq!(intent.prompt.as_deref(), Some("red lighthouse at night"));
    }

    #[test]
    fn parse_style_command() {
        let intent = parse_intent("/style ember-noir");
        assert_eq!(intent.action, "set_style");
        assert_eq!(intent.command_args["style"], json!("ember-noir"));
    }

    #[test]
    fn parse_use_command_with_quoted_path() {
        let intent = parse_intent("/use \"/tmp/my base.png\"");
        assert_eq!(intent.action, "set_base_image");
        assert_eq!(intent.command_args["path"], json!("/tmp/my base.png"));

        let bare = parse_intent("/use base.png");
        assert_eq!(bare.command_args["path"], json!("base.png"));
    }

    #[test]
    fn parse_adopt_command() {
        let intent = parse_intent("/adopt m4");
        assert_eq!(intent.action, "adopt_base_image");
        assert_eq!(intent.command_args["message_id"], json!("m4"));
    }

    #[test]
    fn parse_no_arg_commands() {
        assert_eq!(parse_intent("/clear").action, "clear_base_image");
        assert_eq!(parse_intent("/styles").action, "list_styles");
        assert_eq!(parse_intent("/help").action, "help");
    }

    #[test]
    fn parse_unknown_command() {
        let intent = parse_intent("/magic foo bar");
        assert_eq!(intent.action, "unknown");
        assert_eq!(intent.command_args["command"], json!("magic"));
        assert_eq!(intent.command_args["arg"], json!("foo bar"));
    }

    #[test]
    fn slash_text_without_command_token_is_a_prompt() {
        let intent = parse_intent("/ wait this is not a command");
        assert_eq!(intent.action, "generate");
        assert_eq!(
            intent.prompt.as_deref(),
            Some("/ wait this is not a command")
        );
    }
}
