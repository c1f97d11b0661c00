//! Policy file editor: idempotent insertion of a recipient key.
//!
//! The editor works on lines, not on a re-serialized document, so comments,
//! key order and unrelated rules survive byte for byte. Membership is
//! decided on the parsed structure; the text is only touched when the key
//! is missing from the rule that governs the private settings file.
//!
//! Mutation steps:
//!
//! 1. Missing file: write the canonical document holding just this key.
//! 2. Key already granted by the governing rule: no-op.
//! 3. Otherwise back the file up, plan a line-level edit that keeps the
//!    rule's existing serialization, re-parse the result to confirm every
//!    previous grant survived plus the new one, and replace the file
//!    atomically.
//! 4. When the layout cannot be edited safely, append a fresh rule instead
//!    and report [`PolicyUpdate::FallbackAppended`] so the operator reviews
//!    the file. In strict mode that case is an error and nothing is written.
//!    It is also an error when the file parses but an earlier rule would
//!    still shadow the appended one.

use std::path::{Path, PathBuf};

use crate::crypto::keys;
use crate::error::{Result, VaultError};
use crate::policy::document::{match_candidates, Policy, RecipientStyle};
use crate::policy::{PRIVATE_PATH_REGEX, PRIVATE_SAMPLE_PATH};
use crate::storage::fs as vfs;

/// Mode of a freshly created policy file.
const NEW_POLICY_MODE: u32 = 0o644;

/// Indentation of rule items in a freshly written document.
const DEFAULT_ITEM_INDENT: usize = 2;

/// What [`PolicyEditor::ensure_recipient`] did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyUpdate {
    /// The policy file did not exist and was created.
    Created,
    /// The governing rule already granted the key. Nothing was written.
    AlreadyPresent,
    /// The key was added to the governing rule in the given form.
    Inserted {
        style: RecipientStyle,
        backup: PathBuf,
    },
    /// No rule governed the private settings file; one was added.
    RuleAdded { backup: PathBuf },
    /// The layout could not be edited safely; a rule was appended.
    FallbackAppended { reason: String, backup: PathBuf },
}

impl PolicyUpdate {
    /// Whether the file on disk changed.
    pub fn changed(&self) -> bool {
        !matches!(self, PolicyUpdate::AlreadyPresent)
    }

    /// Whether an operator should inspect the file.
    pub fn needs_review(&self) -> bool {
        matches!(self, PolicyUpdate::FallbackAppended { .. })
    }

    /// Backup written before the mutation, if any.
    pub fn backup(&self) -> Option<&Path> {
        match self {
            PolicyUpdate::Inserted { backup, .. }
            | PolicyUpdate::RuleAdded { backup }
            | PolicyUpdate::FallbackAppended { backup, .. } => Some(backup.as_path()),
            PolicyUpdate::Created | PolicyUpdate::AlreadyPresent => None,
        }
    }
}

/// Edits one policy file.
#[derive(Debug, Clone)]
pub struct PolicyEditor {
    path: PathBuf,
    targets: Vec<String>,
    normalize: bool,
    strict: bool,
}

impl PolicyEditor {
    /// Edit the policy at `path`, targeting the private settings rule.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            targets: vec![PRIVATE_SAMPLE_PATH.to_string()],
            normalize: false,
            strict: false,
        }
    }

    /// Target the rule governing `file` instead of the private settings file.
    pub fn for_file(mut self, file: &Path) -> Self {
        self.targets = match_candidates(&self.policy_dir(), file);
        self
    }

    /// Rewrite the governing rule's recipients in canonical scalar-block
    /// form (sorted, deduplicated) on every write.
    pub fn normalize(mut self, yes: bool) -> Self {
        self.normalize = yes;
        self
    }

    /// Refuse to write when only the fallback append is possible.
    pub fn strict(mut self, yes: bool) -> Self {
        self.strict = yes;
        self
    }

    /// Path of the policy file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Directory that relative rule patterns are resolved against.
    pub fn policy_dir(&self) -> PathBuf {
        match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        }
    }

    /// Make sure `public_key` may decrypt files matching the target rule.
    ///
    /// # Errors
    ///
    /// `VaultError::InvalidKey` for a malformed key,
    /// `VaultError::PolicyParseAmbiguous` when the file cannot be edited
    /// safely and either strict mode is on or an appended rule would not
    /// take effect, I/O errors otherwise.
    pub fn ensure_recipient(&self, public_key: &str) -> Result<PolicyUpdate> {
        let key = public_key.trim();
        keys::parse_recipient(key)?;

        if !self.path.exists() {
            vfs::write_atomic(
                &self.path,
                canonical_document(key).as_bytes(),
                Some(NEW_POLICY_MODE),
            )?;
            log::info!("created policy {} with key {key}", self.path.display());
            return Ok(PolicyUpdate::Created);
        }

        let text = std::fs::read_to_string(&self.path)
            .map_err(|e| VaultError::from_io(&self.path, e))?;
        let candidates = &self.targets;

        let parsed = Policy::parse(&text);
        match &parsed {
            Ok(policy) => {
                if let Some(rule) = policy.rule_for(candidates) {
                    if rule.grants(key) {
                        log::debug!("{key} already granted by {}", self.path.display());
                        return Ok(PolicyUpdate::AlreadyPresent);
                    }
                }
            }
            Err(_) if has_appended_rule(&text, key) => {
                log::debug!(
                    "{key} already appended to unparsable policy {}",
                    self.path.display()
                );
                return Ok(PolicyUpdate::AlreadyPresent);
            }
            Err(_) => {}
        }

        let planned = match &parsed {
            Ok(policy) => {
                let idx = policy.rule_index_for(candidates);
                plan_edit(&text, policy, idx, key, self.normalize).and_then(|plan| {
                    verify(&plan.text, policy, candidates, key).map(|()| plan)
                })
            }
            Err(e) => Err(e.to_string()),
        };

        let (new_text, kind) = match planned {
            Ok(plan) => (plan.text, plan.kind),
            Err(reason) => {
                if self.strict {
                    return Err(VaultError::PolicyParseAmbiguous(format!(
                        "{}: {reason}",
                        self.path.display()
                    )));
                }
                let appended = fallback_append(&text, key);
                // An earlier matching rule shadows the appended one.
                if let Ok(policy) = &parsed {
                    if let Err(why) = verify(&appended, policy, candidates, key) {
                        return Err(VaultError::PolicyParseAmbiguous(format!(
                            "{}: {reason}; an appended rule would not take effect ({why})",
                            self.path.display()
                        )));
                    }
                }
                log::warn!(
                    "policy {} could not be edited in place ({reason}); appending a new rule, review the file manually",
                    self.path.display()
                );
                (appended, PlanKind::Fallback(reason))
            }
        };

        let mode = vfs::mode_of(&self.path).unwrap_or(NEW_POLICY_MODE);
        let backup = vfs::backup(&self.path)?;
        vfs::write_atomic(&self.path, new_text.as_bytes(), Some(mode))?;

        let update = match kind {
            PlanKind::Inserted(style) => PolicyUpdate::Inserted { style, backup },
            PlanKind::RuleAdded => PolicyUpdate::RuleAdded { backup },
            PlanKind::Fallback(reason) => PolicyUpdate::FallbackAppended { reason, backup },
        };
        log::info!("added {key} to policy {}", self.path.display());
        Ok(update)
    }
}

// ── Planning ──────────────────────────────────────────────────────────────────

enum PlanKind {
    Inserted(RecipientStyle),
    RuleAdded,
    Fallback(String),
}

struct Plan {
    text: String,
    kind: PlanKind,
}

/// Line range of one `creation_rules` item.
#[derive(Debug, Clone, Copy)]
struct ItemSpan {
    start: usize,
    end: usize,
    item_indent: usize,
    key_indent: usize,
}

/// The `creation_rules` block.
#[derive(Debug)]
struct RulesBlock {
    header: usize,
    items: Vec<ItemSpan>,
    /// Header written as `creation_rules: []`.
    empty_flow: bool,
}

impl RulesBlock {
    /// Line index after the last item (or after the header when empty).
    fn end(&self) -> usize {
        self.items.last().map_or(self.header + 1, |i| i.end)
    }
}

/// How the `age:` value is written.
enum FieldForm {
    Block,
    List,
    Flow,
    /// Plain scalar, inline and/or on continuation lines.
    PlainScalar,
    Empty,
}

/// The `age:` field inside an item.
struct AgeField {
    line: usize,
    value_end: usize,
    form: FieldForm,
}

fn plan_edit(
    text: &str,
    policy: &Policy,
    rule: Option<usize>,
    key: &str,
    normalize: bool,
) -> std::result::Result<Plan, String> {
    let lines: Vec<&str> = text.lines().collect();
    let block = scan_rules(&lines)?;

    let Some(idx) = rule else {
        return Ok(Plan {
            text: add_rule(text, &lines, block.as_ref(), key),
            kind: PlanKind::RuleAdded,
        });
    };

    let block = block.ok_or("parsed rules but found no `creation_rules:` block")?;
    if block.items.len() != policy.rules.len() {
        return Err(format!(
            "found {} rule items in the text but {} parsed rules",
            block.items.len(),
            policy.rules.len()
        ));
    }
    let item = block.items[idx];
    let existing = &policy.rules[idx].recipients;

    let mut out: Vec<String> = lines.iter().map(|l| l.to_string()).collect();
    let style = match find_age_field(&lines, &item)? {
        None => {
            let entries = sorted_with(existing, key);
            let new_lines = scalar_block_lines(&" ".repeat(item.key_indent), item.key_indent + 2, &entries);
            splice(&mut out, item.end, item.end, new_lines);
            RecipientStyle::ScalarBlock
        }
        Some(field) if normalize => {
            let entries = sorted_with(existing, key);
            let prefix = field_prefix(lines[field.line]);
            let new_lines = scalar_block_lines(&prefix, item.key_indent + 2, &entries);
            splice(&mut out, field.line, field.value_end, new_lines);
            RecipientStyle::ScalarBlock
        }
        Some(field) => match field.form {
            FieldForm::Block => {
                let values = &lines[field.line + 1..field.value_end];
                let indent = values
                    .iter()
                    .find(|l| !l.trim().is_empty())
                    .map_or(item.key_indent + 2, |l| indent_of(l));
                let has_entries = values.iter().any(|l| !l.trim().is_empty());
                let entry = format!(
                    "{}{key}{}",
                    " ".repeat(indent),
                    if has_entries { "," } else { "" }
                );
                splice(&mut out, field.line + 1, field.line + 1, vec![entry]);
                RecipientStyle::ScalarBlock
            }
            FieldForm::List | FieldForm::Flow => {
                let entries = sorted_with(existing, key);
                let indent = lines[field.line + 1..field.value_end]
                    .iter()
                    .find(|l| l.trim_start_matches(' ').starts_with('-'))
                    .map_or(item.key_indent + 2, |l| indent_of(l));
                let mut new_lines = vec![field_prefix(lines[field.line])];
                new_lines.extend(
                    entries
                        .iter()
                        .map(|e| format!("{}- \"{e}\"", " ".repeat(indent))),
                );
                splice(&mut out, field.line, field.value_end, new_lines);
                RecipientStyle::List
            }
            FieldForm::PlainScalar | FieldForm::Empty => {
                let mut entries = vec![key.to_string()];
                entries.extend(existing.iter().filter(|e| *e != key).cloned());
                let prefix = field_prefix(lines[field.line]);
                let new_lines = scalar_block_lines(&prefix, item.key_indent + 2, &entries);
                splice(&mut out, field.line, field.value_end, new_lines);
                RecipientStyle::ScalarBlock
            }
        },
    };

    Ok(Plan {
        text: join_lines(text, &out),
        kind: PlanKind::Inserted(style),
    })
}

/// Re-parse `candidate` and check that the governing rule grants `key` and
/// no previously granted key was lost.
fn verify(
    candidate: &str,
    before: &Policy,
    targets: &[String],
    key: &str,
) -> std::result::Result<(), String> {
    let after = Policy::parse(candidate).map_err(|e| format!("rewrite did not parse: {e}"))?;
    let granted = after
        .rule_for(targets)
        .map(|r| r.grants(key))
        .unwrap_or(false);
    if !granted {
        return Err("rewrite did not grant the key".to_string());
    }
    for (old, new) in before.rules.iter().zip(after.rules.iter()) {
        if old.path_regex != new.path_regex || !old.recipients.iter().all(|k| new.grants(k)) {
            return Err("rewrite would have dropped an existing grant".to_string());
        }
    }
    if after.rules.len() < before.rules.len() {
        return Err("rewrite would have dropped a rule".to_string());
    }
    Ok(())
}

/// Append a new canonical rule to the `creation_rules` block, or a whole
/// block at the end of the file when there is none.
fn add_rule(text: &str, lines: &[&str], block: Option<&RulesBlock>, key: &str) -> String {
    let mut out: Vec<String> = lines.iter().map(|l| l.to_string()).collect();
    match block {
        Some(b) => {
            if b.empty_flow {
                out[b.header] = "creation_rules:".to_string();
            }
            let item_indent = b.items.first().map_or(DEFAULT_ITEM_INDENT, |i| i.item_indent);
            let at = b.end();
            splice(&mut out, at, at, rule_item_lines(item_indent, key));
        }
        None => {
            out.push("creation_rules:".to_string());
            out.extend(rule_item_lines(DEFAULT_ITEM_INDENT, key));
        }
    }
    join_lines(text, &out)
}

/// Whether a previous fallback already appended a rule for `key`.
fn has_appended_rule(text: &str, key: &str) -> bool {
    let item = format!("- path_regex: {PRIVATE_PATH_REGEX}");
    let lines: Vec<&str> = text.lines().map(str::trim).collect();
    lines
        .windows(3)
        .any(|w| w[0] == item && w[1] == "age: >-" && w[2] == key)
}

/// Best-effort append used when the layout is not understood.
fn fallback_append(text: &str, key: &str) -> String {
    let lines: Vec<&str> = text.lines().collect();
    match scan_rules(&lines) {
        Ok(block) => add_rule(text, &lines, block.as_ref(), key),
        Err(_) => {
            let has_header = lines
                .iter()
                .any(|l| indent_of(l) == 0 && l.starts_with("creation_rules:"));
            let mut out: Vec<String> = lines.iter().map(|l| l.to_string()).collect();
            if !has_header {
                out.push("creation_rules:".to_string());
            }
            out.extend(rule_item_lines(DEFAULT_ITEM_INDENT, key));
            join_lines(text, &out)
        }
    }
}

// ── Text scanning ─────────────────────────────────────────────────────────────

fn indent_of(line: &str) -> usize {
    line.len() - line.trim_start_matches(' ').len()
}

fn is_blank(line: &str) -> bool {
    line.trim().is_empty()
}

// Only ASCII spaces count as indentation, matching `indent_of`, so the
// column of a `-` is always a char boundary.
fn is_comment(line: &str) -> bool {
    line.trim_start_matches(' ').starts_with('#')
}

fn is_item_start(line: &str) -> bool {
    let t = line.trim_start_matches(' ');
    t == "-" || t.starts_with("- ")
}

/// Strip a trailing ` # comment` from an inline value.
fn strip_comment(value: &str) -> &str {
    match value.find(" #") {
        Some(i) => &value[..i],
        None => value,
    }
    .trim()
}

/// Locate the `creation_rules` block and its items.
///
/// `Ok(None)` means the file has no such block. `Err` means it has one whose
/// layout is not a block sequence the editor understands.
fn scan_rules(lines: &[&str]) -> std::result::Result<Option<RulesBlock>, String> {
    let Some(header) = lines
        .iter()
        .position(|l| indent_of(l) == 0 && l.starts_with("creation_rules:"))
    else {
        return Ok(None);
    };

    let inline = strip_comment(&lines[header]["creation_rules:".len()..]);
    if inline == "[]" {
        return Ok(Some(RulesBlock {
            header,
            items: Vec::new(),
            empty_flow: true,
        }));
    }
    if !inline.is_empty() {
        return Err(format!("`creation_rules: {inline}` is not a block sequence"));
    }

    let mut items: Vec<ItemSpan> = Vec::new();
    let mut item_indent: Option<usize> = None;

    for (i, line) in lines.iter().enumerate().skip(header + 1) {
        if is_blank(line) {
            continue;
        }
        let ind = indent_of(line);
        match item_indent {
            None => {
                if is_comment(line) {
                    continue;
                }
                if is_item_start(line) {
                    item_indent = Some(ind);
                    items.push(new_item(lines, i, ind));
                } else if ind == 0 {
                    break;
                } else {
                    return Err(format!("unexpected line {} inside creation_rules", i + 1));
                }
            }
            Some(base) => {
                if ind == base && is_item_start(line) {
                    items.push(new_item(lines, i, ind));
                } else if ind > base {
                    if let Some(last) = items.last_mut() {
                        last.end = i + 1;
                    }
                } else if is_comment(line) {
                    continue;
                } else {
                    break;
                }
            }
        }
    }

    Ok(Some(RulesBlock {
        header,
        items,
        empty_flow: false,
    }))
}

fn new_item(lines: &[&str], start: usize, item_indent: usize) -> ItemSpan {
    let after_dash = &lines[start][item_indent + 1..];
    let key_indent = if after_dash.trim().is_empty() {
        lines
            .iter()
            .skip(start + 1)
            .find(|l| !is_blank(l))
            .map_or(item_indent + 2, |l| indent_of(l))
    } else {
        item_indent + 1 + indent_of(after_dash)
    };
    ItemSpan {
        start,
        end: start + 1,
        item_indent,
        key_indent,
    }
}

/// Column where the content of `line` starts, looking past a leading `- `
/// on an item's first line.
fn content_of<'a>(line: &'a str, item: &ItemSpan, index: usize) -> (usize, &'a str) {
    if index == item.start {
        let after_dash = &line[item.item_indent + 1..];
        let col = item.item_indent + 1 + indent_of(after_dash);
        (col, line.get(col..).unwrap_or(""))
    } else {
        let col = indent_of(line);
        (col, &line[col..])
    }
}

fn find_age_field(lines: &[&str], item: &ItemSpan) -> std::result::Result<Option<AgeField>, String> {
    for i in item.start..item.end {
        let (col, content) = content_of(lines[i], item, i);
        if col != item.key_indent || !content.starts_with("age:") {
            continue;
        }
        let inline = strip_comment(&content["age:".len()..]);

        let mut value_end = i + 1;
        for (j, line) in lines.iter().enumerate().take(item.end).skip(i + 1) {
            if is_blank(line) {
                continue;
            }
            let ind = indent_of(line);
            let same_level_list = inline.is_empty() && ind == item.key_indent && is_item_start(line);
            if ind > item.key_indent || same_level_list {
                value_end = j + 1;
            } else {
                break;
            }
        }

        let first_value = lines[i + 1..value_end].iter().find(|l| !is_blank(l));
        let form = if inline.starts_with('>') || inline.starts_with('|') {
            FieldForm::Block
        } else if inline.starts_with('[') {
            if !inline.ends_with(']') || value_end != i + 1 {
                return Err("multi-line flow sequence for `age`".to_string());
            }
            FieldForm::Flow
        } else if inline.is_empty() {
            match first_value {
                None => FieldForm::Empty,
                Some(l) if is_item_start(l) => FieldForm::List,
                Some(_) => FieldForm::PlainScalar,
            }
        } else {
            FieldForm::PlainScalar
        };

        return Ok(Some(AgeField {
            line: i,
            value_end,
            form,
        }));
    }
    Ok(None)
}

// ── Emission ──────────────────────────────────────────────────────────────────

/// The `...age:` part of a field line, keeping a leading `- ` if present.
fn field_prefix(line: &str) -> String {
    match line.find("age:") {
        Some(i) => line[..i + "age:".len()].to_string(),
        None => line.to_string(),
    }
}

fn scalar_block_lines(prefix: &str, indent: usize, entries: &[String]) -> Vec<String> {
    let head = if prefix.trim_end().ends_with("age:") {
        format!("{} >-", prefix.trim_end())
    } else {
        format!("{}age: >-", prefix)
    };
    let pad = " ".repeat(indent);
    let mut out = vec![head];
    for (n, e) in entries.iter().enumerate() {
        let comma = if n + 1 < entries.len() { "," } else { "" };
        out.push(format!("{pad}{e}{comma}"));
    }
    out
}

fn rule_item_lines(item_indent: usize, key: &str) -> Vec<String> {
    let pad = " ".repeat(item_indent);
    let inner = " ".repeat(item_indent + 2);
    let entry = " ".repeat(item_indent + 4);
    vec![
        format!("{pad}- path_regex: {PRIVATE_PATH_REGEX}"),
        format!("{inner}age: >-"),
        format!("{entry}{key}"),
    ]
}

/// The document written when no policy file exists.
pub fn canonical_document(key: &str) -> String {
    let mut out = String::from("creation_rules:\n");
    for line in rule_item_lines(DEFAULT_ITEM_INDENT, key) {
        out.push_str(&line);
        out.push('\n');
    }
    out
}

fn sorted_with(existing: &[String], key: &str) -> Vec<String> {
    let mut entries: Vec<String> = existing.to_vec();
    entries.push(key.to_string());
    entries.sort();
    entries.dedup();
    entries
}

fn splice(lines: &mut Vec<String>, from: usize, to: usize, with: Vec<String>) {
    lines.splice(from..to, with);
}

/// Join lines with the original file's line ending, always ending in one.
fn join_lines(original: &str, lines: &[String]) -> String {
    let newline = if original.contains("\r\n") { "\r\n" } else { "\n" };
    let mut out = lines.join(newline);
    out.push_str(newline);
    out
}
