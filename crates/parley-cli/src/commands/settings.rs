//! /model, /temperature, /scope - show and change generation settings

use super::CommandResult;
use parley_proto::GenerationConfig;

pub struct SettingsCommand;

impl SettingsCommand {
    pub fn execute(command: &str, args: &str, current: &GenerationConfig) -> CommandResult {
        if args.is_empty() {
            return CommandResult::Message(show_settings(current));
        }

        let mut next = current.clone();
        match command {
            "model" | "m" => next.model = Some(args.to_string()),
            "temperature" | "temp" => match parse_temperature(args) {
                Some(value) => next.temperature = Some(value),
                None => {
                    return CommandResult::Message(format!(
                        "Invalid temperature: '{}'\nExpected a number between 0 and 2",
                        args
                    ));
                }
            },
            "scope" => next.knowledge_scope = Some(args.to_string()),
            other => return CommandResult::Unknown(other.to_string()),
        }
        CommandResult::UpdateSettings(next)
    }
}

fn parse_temperature(s: &str) -> Option<f32> {
    s.parse::<f32>()
        .ok()
        .filter(|t| t.is_finite() && (0.0..=2.0).contains(t))
}

fn show_settings(config: &GenerationConfig) -> String {
    let unset = || "(default)".to_string();
    let mut output = String::from("Generation settings:\n\n");
    output.push_str(&format!(
        "  model        {}\n",
        config.model.clone().unwrap_or_else(unset)
    ));
    output.push_str(&format!(
        "  temperature  {}\n",
        config
            .temperature
            .map(|t| t.to_string())
            .unwrap_or_else(unset)
    ));
    output.push_str(&format!(
        "  scope        {}\n",
        config.knowledge_scope.clone().unwrap_or_else(unset)
    ));
    output.push_str("\nSet with: /model <name>, /temperature <value>, /scope <value>");
    output
}
