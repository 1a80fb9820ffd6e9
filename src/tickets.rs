//! Ticket and merge-queue state, interpreted from files in a plan worktree.
//!
//! Everything here is a pure function over paths and strings; commits are the
//! caller's business.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;

use crate::error::Error;

pub const AREAS_DIR: &str = "areas";
pub const TICKETS_OPEN: &str = "tickets/open";
pub const TICKETS_IN_PROGRESS: &str = "tickets/in-progress";
pub const TICKETS_DONE: &str = "tickets/done";
pub const QUEUE_PENDING: &str = "queue/merge/pending";
pub const QUEUE_ACTIVE: &str = "queue/merge/active.md";

const AREA_MARKER: &str = "**Area:**";
const WORKTREE_MARKER: &str = "**Worktree:**";
const FAILURE_HEADING: &str = "## Merge Queue Failure";
const EXCERPT_LIMIT: usize = 400;

fn re_ticket_file() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(\d{4})-([a-z0-9][a-z0-9-]*)\.md$").unwrap())
}

fn re_queue_entry() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\d{4}-\d{4}\.md$").unwrap())
}

/// Branch name for a ticket.
pub fn ticket_branch(id: u32) -> String {
    format!("scriptorium/ticket-{id:04}")
}

/// Pending queue entry filename for a ticket.
pub fn pending_entry_name(id: u32) -> String {
    format!("{id:04}-{id:04}.md")
}

/// Parse `<NNNN>-<slug>.md` into (id, slug).
pub fn parse_ticket_filename(name: &str) -> Option<(u32, String)> {
    let caps = re_ticket_file().captures(name)?;
    let id = caps.get(1)?.as_str().parse().ok()?;
    Some((id, caps.get(2)?.as_str().to_string()))
}

/// Validate a pending queue entry name (`<NNNN>-<NNNN>.md`).
pub fn is_queue_entry_name(name: &str) -> bool {
    re_queue_entry().is_match(name)
}

/// Area id referenced by a ticket body: the suffix of the first line that
/// starts with `**Area:**` after trimming. Empty string when absent.
pub fn parse_area_id(body: &str) -> String {
    for line in body.lines() {
        if let Some(rest) = line.trim().strip_prefix(AREA_MARKER) {
            return rest.trim().to_string();
        }
    }
    String::new()
}

/// Worktree path recorded in an in-progress ticket body.
pub fn parse_worktree_path(body: &str) -> Option<PathBuf> {
    for line in body.lines() {
        if let Some(rest) = line.trim().strip_prefix(WORKTREE_MARKER) {
            let path = rest.trim();
            if !path.is_empty() {
                return Some(PathBuf::from(path));
            }
        }
    }
    None
}

/// Lowercase a slug candidate: keep `[a-z0-9]`, fold spaces, underscores,
/// and hyphens into single hyphens, drop everything else, trim trailing
/// hyphens. Rejects an empty result.
pub fn normalize_slug(input: &str) -> anyhow::Result<String> {
    let mut slug = String::with_capacity(input.len());
    for ch in input.to_lowercase().chars() {
        match ch {
            'a'..='z' | '0'..='9' => slug.push(ch),
            ' ' | '_' | '-' => {
                if !slug.ends_with('-') {
                    slug.push('-');
                }
            }
            _ => {}
        }
    }
    let slug = slug.trim_end_matches('-').to_string();
    if slug.is_empty() {
        return Err(Error::InvalidSlug(input.to_string()).into());
    }
    Ok(slug)
}

/// Validate an area path: relative, no `..` component, `.md` extension
/// (case-insensitive).
pub fn normalize_area_path(input: &str) -> anyhow::Result<PathBuf> {
    let path = Path::new(input);
    if path.is_absolute() {
        return Err(Error::InvalidAreaPath(input.to_string()).into());
    }
    if path
        .components()
        .any(|c| matches!(c, Component::ParentDir))
    {
        return Err(Error::InvalidAreaPath(input.to_string()).into());
    }
    let ext_ok = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("md"));
    if !ext_ok {
        return Err(Error::InvalidAreaPath(input.to_string()).into());
    }
    Ok(path.to_path_buf())
}

/// Sorted filenames of the markdown tickets in one state directory.
pub fn list_state(plan: &Path, state_dir: &str) -> anyhow::Result<Vec<String>> {
    let dir = plan.join(state_dir);
    let mut names = Vec::new();
    if dir.is_dir() {
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.ends_with(".md") && entry.file_type()?.is_file() {
                names.push(name);
            }
        }
    }
    names.sort();
    Ok(names)
}

/// Find the ticket filename for a numeric id within a state directory.
pub fn find_ticket_in_state(plan: &Path, state_dir: &str, id: u32) -> anyhow::Result<Option<String>> {
    for name in list_state(plan, state_dir)? {
        if let Some((ticket_id, _)) = parse_ticket_filename(&name)
            && ticket_id == id
        {
            return Ok(Some(name));
        }
    }
    Ok(None)
}

/// Next ticket id: scan all three state directories, take the integer value
/// of every digits-only filename prefix (up to the first hyphen), and return
/// max + 1, or 1 when none parse.
pub fn next_ticket_id(plan: &Path) -> anyhow::Result<u32> {
    let mut max = 0u32;
    for state in [TICKETS_OPEN, TICKETS_IN_PROGRESS, TICKETS_DONE] {
        for name in list_state(plan, state)? {
            let prefix = name.split('-').next().unwrap_or("");
            if !prefix.is_empty()
                && prefix.bytes().all(|b| b.is_ascii_digit())
                && let Ok(id) = prefix.parse::<u32>()
            {
                max = max.max(id);
            }
        }
    }
    Ok(max + 1)
}

/// Union of area ids referenced by tickets in `open` and `in-progress`.
pub fn collect_active_areas(plan: &Path) -> anyhow::Result<BTreeSet<String>> {
    let mut active = BTreeSet::new();
    for state in [TICKETS_OPEN, TICKETS_IN_PROGRESS] {
        for name in list_state(plan, state)? {
            let body = fs::read_to_string(plan.join(state).join(&name))?;
            let area = parse_area_id(&body);
            if !area.is_empty() {
                active.insert(area);
            }
        }
    }
    Ok(active)
}

/// Area files (paths relative to the plan root, sorted) whose stem has no
/// ticket in `open` or `in-progress`.
pub fn areas_needing_tickets(plan: &Path) -> anyhow::Result<Vec<PathBuf>> {
    let active = collect_active_areas(plan)?;
    let mut needing = Vec::new();
    for rel in walk_markdown(plan, Path::new(AREAS_DIR))? {
        let stem = rel
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or_default()
            .to_string();
        if !active.contains(&stem) {
            needing.push(rel);
        }
    }
    needing.sort();
    Ok(needing)
}

/// Markdown files under `root/rel`, recursively, as paths relative to
/// `root`, sorted lexicographically by full path.
pub fn walk_markdown(root: &Path, rel: &Path) -> anyhow::Result<Vec<PathBuf>> {
    let mut found = Vec::new();
    let dir = root.join(rel);
    if !dir.is_dir() {
        return Ok(found);
    }
    for entry in fs::read_dir(&dir)? {
        let entry = entry?;
        let child = rel.join(entry.file_name());
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            found.extend(walk_markdown(root, &child)?);
        } else if child
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("md"))
        {
            found.push(child);
        }
    }
    found.sort();
    Ok(found)
}

/// Remove any `**Worktree:**` lines from a ticket body.
pub fn strip_worktree_line(body: &str) -> String {
    let mut out = String::with_capacity(body.len());
    for line in body.lines() {
        if line.trim().starts_with(WORKTREE_MARKER) {
            continue;
        }
        out.push_str(line);
        out.push('\n');
    }
    out
}

/// Append the merge-failure section to a ticket body.
pub fn append_failure_section(body: &str, summary: &str, diagnostic: &str, detail: &str) -> String {
    let mut out = body.to_string();
    if !out.ends_with('\n') {
        out.push('\n');
    }
    out.push_str(&format!(
        "\n{FAILURE_HEADING}\n\n- Summary: {summary}\n- Diagnostic: {diagnostic}\n"
    ));
    let excerpt = tail(detail.trim(), EXCERPT_LIMIT);
    if !excerpt.is_empty() {
        out.push('\n');
        out.push_str(excerpt);
        out.push('\n');
    }
    out
}

/// Last `limit` characters of a string, on a char boundary.
pub fn tail(s: &str, limit: usize) -> &str {
    let count = s.chars().count();
    if count <= limit {
        return s;
    }
    let skip = count - limit;
    match s.char_indices().nth(skip) {
        Some((idx, _)) => &s[idx..],
        None => s,
    }
}

/// One pending merge-queue entry, rendered to and parsed from markdown.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingEntry {
    pub ticket_id: u32,
    /// Plan-relative path of the in-progress ticket file.
    pub ticket_path: String,
    pub branch: String,
    pub worktree: PathBuf,
    pub summary: String,
}

impl PendingEntry {
    pub fn render(&self) -> String {
        format!(
            "# Merge Request {id:04}\n\n**Ticket:** {ticket}\n**Branch:** {branch}\n{WORKTREE_MARKER} {worktree}\n\n## Summary\n\n{summary}\n",
            id = self.ticket_id,
            ticket = self.ticket_path,
            branch = self.branch,
            worktree = self.worktree.display(),
            summary = self.summary,
        )
    }

    pub fn parse(body: &str) -> anyhow::Result<Self> {
        let mut ticket_path = None;
        let mut branch = None;
        let mut worktree = None;
        let mut summary_lines: Vec<&str> = Vec::new();
        let mut in_summary = false;

        for line in body.lines() {
            let trimmed = line.trim();
            if in_summary {
                summary_lines.push(line);
            } else if let Some(rest) = trimmed.strip_prefix("**Ticket:**") {
                ticket_path = Some(rest.trim().to_string());
            } else if let Some(rest) = trimmed.strip_prefix("**Branch:**") {
                branch = Some(rest.trim().to_string());
            } else if let Some(rest) = trimmed.strip_prefix(WORKTREE_MARKER) {
                worktree = Some(PathBuf::from(rest.trim()));
            } else if trimmed == "## Summary" {
                in_summary = true;
            }
        }

        let ticket_path = ticket_path
            .ok_or_else(|| Error::InvalidInput("queue entry has no **Ticket:** line".into()))?;
        let branch = branch
            .ok_or_else(|| Error::InvalidInput("queue entry has no **Branch:** line".into()))?;
        let worktree = worktree
            .ok_or_else(|| Error::InvalidInput("queue entry has no **Worktree:** line".into()))?;

        let file_name = Path::new(&ticket_path)
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default();
        let (ticket_id, _) = parse_ticket_filename(file_name).ok_or_else(|| {
            Error::InvalidInput(format!("queue entry references bad ticket {ticket_path:?}"))
        })?;

        Ok(Self {
            ticket_id,
            ticket_path,
            branch,
            worktree,
            summary: summary_lines.join("\n").trim().to_string(),
        })
    }
}
