//! Prompt templates loaded from disk at startup.

use anyhow::Context;
use std::collections::HashMap;
use std::fs;
use std::path::Path;

/// Name of the system prompt used by the feedback boundary.
pub const FEEDBACK_SYSTEM_PROMPT: &str = "feedback_system";

/// Loads every `.md` file in `path`, keyed by file stem.
pub fn load_prompts(path: &Path) -> anyhow::Result<HashMap<String, String>> {
    let mut prompts = HashMap::new();
    for entry in fs::read_dir(path)
        .with_context(|| format!("Failed to read prompts directory: {:?}", path))?
    {
        let entry = entry?;
        let path = entry.path();
        if path.is_file() && path.extension().and_then(|s| s.to_str()) == Some("md") {
            let name = path
                .file_stem()
                .and_then(|s| s.to_str())
                .ok_or_else(|| anyhow::anyhow!("Invalid prompt file name: {:?}", path))?
                .to_string();
            let content = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read prompt file: {:?}", path))?;
            prompts.insert(name, content);
        }
    }
    Ok(prompts)
}

/// Looks up a prompt that the service cannot run without.
pub fn require_prompt<'a>(prompts: &'a HashMap<String, String>, name: &str) -> anyhow::Result<&'a str> {
    prompts
        .get(name)
        .map(String::as_str)
        .ok_or_else(|| anyhow::anyhow!("Missing required prompt '{name}.md'"))
}
