//! Architect and manager adapters.
//!
//! The tick loop consumes plain generator functions; these constructors
//! build the real ones on top of the codex harness. Tests inject fakes
//! instead.

use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;

use crate::config::Config;
use crate::runner::{self, AgentRequest};

const GENERATOR_NO_OUTPUT_TIMEOUT: Duration = Duration::from_secs(600);
const GENERATOR_HARD_TIMEOUT: Duration = Duration::from_secs(1800);

/// One area document produced by the architect.
#[derive(Debug, Clone, Deserialize)]
pub struct AreaDoc {
    pub id: String,
    pub content: String,
}

/// One ticket document produced by the manager.
#[derive(Debug, Clone, Deserialize)]
pub struct TicketDoc {
    pub slug: String,
    pub content: String,
}

/// `(model, spec) -> areas`
pub type AreaGenerator = Box<dyn Fn(&str, &str) -> anyhow::Result<Vec<AreaDoc>>>;
/// `(model, area_rel_path, area_content) -> tickets`
pub type TicketGenerator = Box<dyn Fn(&str, &str, &str) -> anyhow::Result<Vec<TicketDoc>>>;

pub fn codex_area_generator(config: &Config, repo: &Path, log_root: &Path) -> AreaGenerator {
    let repo = repo.to_path_buf();
    let log_root = log_root.to_path_buf();
    let effort = config.reasoning_effort.architect.clone();
    Box::new(move |model, spec| {
        let prompt = format!(
            "You are the architect for this repository. Decompose the specification \
             below into coarse areas of work.\n\n\
             Respond with ONLY a JSON array. Each element must be an object \
             {{\"id\": \"<kebab-case-area-id>\", \"content\": \"<markdown body>\"}}.\n\n\
             Specification:\n\n{spec}\n"
        );
        let docs: Vec<AreaDoc> =
            run_generator(&repo, &log_root, model, "architect", &prompt, effort.as_deref())?;
        Ok(docs)
    })
}

pub fn codex_ticket_generator(config: &Config, repo: &Path, log_root: &Path) -> TicketGenerator {
    let repo = repo.to_path_buf();
    let log_root = log_root.to_path_buf();
    let effort = config.reasoning_effort.manager.clone();
    Box::new(move |model, area_path, area_content| {
        let prompt = format!(
            "You are the engineering manager for this repository. The area file \
             {area_path} is reproduced below. Break it into small, independent \
             tickets a coding agent can finish in one session.\n\n\
             Respond with ONLY a JSON array. Each element must be an object \
             {{\"slug\": \"<kebab-case-slug>\", \"content\": \"<markdown ticket body>\"}}. \
             Every ticket body must keep a line of the form `**Area:** <area-id>` \
             naming this area.\n\n\
             Area content:\n\n{area_content}\n"
        );
        let docs: Vec<TicketDoc> =
            run_generator(&repo, &log_root, model, "manager", &prompt, effort.as_deref())?;
        Ok(docs)
    })
}

fn run_generator<T: serde::de::DeserializeOwned>(
    repo: &Path,
    log_root: &Path,
    model: &str,
    role: &str,
    prompt: &str,
    effort: Option<&str>,
) -> anyhow::Result<Vec<T>> {
    let request = AgentRequest {
        prompt: prompt.to_string(),
        workdir: repo.to_path_buf(),
        model: model.to_string(),
        ticket_id: role.to_string(),
        binary: runner::DEFAULT_AGENT_BINARY.to_string(),
        skip_git_repo_check: false,
        log_root: log_root.to_path_buf(),
        no_output_timeout: GENERATOR_NO_OUTPUT_TIMEOUT,
        hard_timeout: GENERATOR_HARD_TIMEOUT,
        mcp_endpoint: None,
        max_attempts: 1,
        continuation: None,
        reasoning_effort: effort.map(String::from),
    };
    let outcome = runner::run_agent(&request)?;
    if !outcome.completed() {
        anyhow::bail!(
            "{role} generator exited with code {} (timeout: {})",
            outcome.exit_code,
            outcome.timeout_kind
        );
    }
    let text = if outcome.last_message.trim().is_empty() {
        &outcome.stdout
    } else {
        &outcome.last_message
    };
    parse_doc_array(text).with_context(|| format!("parsing {role} generator output"))
}

/// Pull the JSON array out of generator output that may carry prose or code
/// fences around it.
fn parse_doc_array<T: serde::de::DeserializeOwned>(text: &str) -> anyhow::Result<Vec<T>> {
    let start = text
        .find('[')
        .ok_or_else(|| anyhow::anyhow!("no JSON array in output"))?;
    let end = text
        .rfind(']')
        .filter(|&end| end > start)
        .ok_or_else(|| anyhow::anyhow!("unterminated JSON array in output"))?;
    Ok(serde_json::from_str(&text[start..=end])?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bare_array() {
        let docs: Vec<AreaDoc> =
            parse_doc_array("[{\"id\": \"core\", \"content\": \"# Core\\n\"}]").unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].id, "core");
    }

    #[test]
    fn parses_fenced_array() {
        let text = "Here you go:\n```json\n[{\"slug\": \"fix-parser\", \"content\": \"body\"}]\n```\n";
        let docs: Vec<TicketDoc> = parse_doc_array(text).unwrap();
        assert_eq!(docs[0].slug, "fix-parser");
    }

    #[test]
    fn rejects_output_without_array() {
        let result: anyhow::Result<Vec<AreaDoc>> = parse_doc_array("sorry, nothing");
        assert!(result.is_err());
    }
}
