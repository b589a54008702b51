use rig::{agent::Agent, client::CompletionClient, providers::openrouter};

/// Provider configuration carried in [`crate::config::AppConfig`] and handed
/// to each task explicitly.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub api_key: String,
    /// Model used for interview turns and the two evaluation passes.
    pub chat_model: String,
    /// Model used for case generation, document extraction and coaching.
    pub authoring_model: String,
}

pub fn chat_agent(config: &LlmConfig, preamble: &str) -> Agent<openrouter::CompletionModel> {
    agent(config, &config.chat_model, preamble, None)
}

pub fn chat_agent_with_temperature(
    config: &LlmConfig,
    preamble: &str,
    temperature: f64,
) -> Agent<openrouter::CompletionModel> {
    agent(config, &config.chat_model, preamble, Some(temperature))
}

pub fn authoring_agent(config: &LlmConfig, preamble: &str) -> Agent<openrouter::CompletionModel> {
    agent(config, &config.authoring_model, preamble, None)
}

fn agent(
    config: &LlmConfig,
    model: &str,
    preamble: &str,
    temperature: Option<f64>,
) -> Agent<openrouter::CompletionModel> {
    let client = openrouter::Client::new(&config.api_key);
    let mut builder = client.agent(model).preamble(preamble);
    if let Some(t) = temperature {
        builder = builder.temperature(t);
    }
    builder.build()
}

/// Strip a Markdown code fence from a model reply before JSON parsing.
/// Models wrap JSON in ```json fences often enough that every parse site
/// goes through this.
pub fn clean_json_reply(raw: &str) -> &str {
    let trimmed = raw.trim();
    let without_prefix = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .unwrap_or(trimmed);
    without_prefix
        .strip_suffix("```")
        .unwrap_or(without_prefix)
        .trim()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_json_reply_strips_fences() {
        assert_eq!(clean_json_reply("```json\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(clean_json_reply("```\n{\"a\":1}\n```"), "{\"a\":1}");
    }

    #[test]
    fn clean_json_reply_leaves_plain_json_alone() {
        assert_eq!(clean_json_reply("  {\"a\":1} "), "{\"a\":1}");
        assert_eq!(clean_json_reply("plain text"), "plain text");
    }
}
