//! Transition function and rule handlers

use chrono::{DateTime, Utc};
use regex::Captures;
use serde::Serialize;
use serde_json::{Value, json};
use tracing::debug;

use super::grammar;
use super::keys;
use super::settings::{current_config, describe_config, merge_config, parse_assignments};
use super::state::{Branch, DialogState};
use crate::domain::Metadata;

const MENU_TEXT: &str = "Main menu:\n  1-1  Generate questions from an existing document\n  1-2  Upload a new lecture video\nType `help` for guidance.";

const HELP_TEXT: &str = "Reply `1-1` (or `existing`) to build a quiz from a document you already uploaded, \
or `1-2` (or `upload`) to start from a new lecture video. \
From any step, `back` returns to the previous step and `home` returns here.";

const SELECT_PROMPT: &str = "Which document should the questions come from? Reply with `select document: <id>`.";

const UPLOAD_PROMPT: &str = "Upload your lecture video, then reply with `uploaded: <id>`.";

const SET_USAGE: &str = "Change settings with `set: key=value[, key=value...]` or type `run` to start.";

const DONE_TEXT: &str = "Question generation is running. Type `back` to adjust the settings or `home` for the main menu.";

/// Side effect requested by a transition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    /// Launch the extraction -> generation chain for the conversation
    StartProcessing,
}

/// Result of a matched rule
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Transition {
    pub reply: String,
    pub next_state: DialogState,
    /// Keys to shallow-merge into the conversation metadata
    pub metadata_patch: Metadata,
    pub action: Option<Action>,
}

impl Transition {
    fn to(next_state: DialogState, reply: impl Into<String>) -> Self {
        Self {
            reply: reply.into(),
            next_state,
            metadata_patch: Metadata::new(),
            action: None,
        }
    }

    fn with(mut self, key: &str, value: Value) -> Self {
        self.metadata_patch.insert(key.to_string(), value);
        self
    }

    fn action(mut self, action: Action) -> Self {
        self.action = Some(action);
        self
    }
}

/// Everything a handler may look at
pub(super) struct Context<'a> {
    pub state: DialogState,
    pub metadata: &'a Metadata,
    pub now: DateTime<Utc>,
}

/// Interpret `text` in `state`; `None` means no rule matched
pub fn transition(text: &str, state: DialogState, metadata: &Metadata) -> Option<Transition> {
    transition_at(text, state, metadata, Utc::now())
}

/// Same as [`transition`] with an explicit clock for `last_run_at`
pub fn transition_at(text: &str, state: DialogState, metadata: &Metadata, now: DateTime<Utc>) -> Option<Transition> {
    let input = text.trim();
    let ctx = Context { state, metadata, now };

    let matched = grammar::rules_for(state).find_map(|rule| {
        let caps = rule.pattern.captures(input)?;
        debug!(%state, rule = rule.name, "dialog rule matched");
        Some((rule.handler)(&caps, &ctx))
    });

    if matched.is_none() {
        debug!(%state, "no dialog rule matched");
    }
    matched
}

fn config_prompt(metadata: &Metadata) -> String {
    format!("Current settings: {}.\n{}", describe_config(&current_config(metadata)), SET_USAGE)
}

/// Prompt shown on arrival in `target`
fn prompt_for(target: DialogState, metadata: &Metadata) -> String {
    match target {
        DialogState::RootMenu => MENU_TEXT.to_string(),
        DialogState::ExistingDocSelect => SELECT_PROMPT.to_string(),
        DialogState::UploadDocWait => UPLOAD_PROMPT.to_string(),
        DialogState::ExistingDocConfig | DialogState::UploadDocConfig => config_prompt(metadata),
        DialogState::QgDone => DONE_TEXT.to_string(),
    }
}

fn captured_id(caps: &Captures<'_>) -> Option<i64> {
    caps.get(1).and_then(|m| m.as_str().parse().ok())
}

fn choose_branch(branch: Branch) -> Transition {
    let (next, prompt) = match branch {
        Branch::Existing => (DialogState::ExistingDocSelect, SELECT_PROMPT),
        Branch::Upload => (DialogState::UploadDocWait, UPLOAD_PROMPT),
    };
    Transition::to(next, prompt)
        .with(keys::BRANCH, json!(branch.tag()))
        .with(keys::LAST_MENU_CHOICE, json!(branch.menu_choice()))
}

pub(super) fn go_home(_: &Captures<'_>, _: &Context<'_>) -> Transition {
    Transition::to(DialogState::RootMenu, MENU_TEXT)
}

pub(super) fn go_back(_: &Captures<'_>, ctx: &Context<'_>) -> Transition {
    let target = ctx.state.back_target(ctx.metadata);
    Transition::to(target, prompt_for(target, ctx.metadata))
}

pub(super) fn choose_existing(_: &Captures<'_>, _: &Context<'_>) -> Transition {
    choose_branch(Branch::Existing)
}

pub(super) fn choose_upload(_: &Captures<'_>, _: &Context<'_>) -> Transition {
    choose_branch(Branch::Upload)
}

pub(super) fn show_help(_: &Captures<'_>, _: &Context<'_>) -> Transition {
    Transition::to(DialogState::RootMenu, format!("{}\n\n{}", HELP_TEXT, MENU_TEXT))
}

pub(super) fn select_document(caps: &Captures<'_>, ctx: &Context<'_>) -> Transition {
    match captured_id(caps) {
        Some(id) => Transition::to(
            DialogState::ExistingDocConfig,
            format!("Selected document {}.\n{}", id, config_prompt(ctx.metadata)),
        )
        .with(keys::SELECTED_DOC_ID, json!(id)),
        None => reprompt_select(caps, ctx),
    }
}

pub(super) fn reprompt_select(_: &Captures<'_>, _: &Context<'_>) -> Transition {
    Transition::to(
        DialogState::ExistingDocSelect,
        format!("That is not a valid document id. {}", SELECT_PROMPT),
    )
}

pub(super) fn set_config(caps: &Captures<'_>, ctx: &Context<'_>) -> Transition {
    let body = caps.get(1).map_or("", |m| m.as_str());
    let pairs = parse_assignments(body);
    if pairs.is_empty() {
        return Transition::to(ctx.state, format!("Nothing to change. {}", SET_USAGE));
    }

    let merged = merge_config(current_config(ctx.metadata), pairs);
    Transition::to(
        ctx.state,
        format!("Updated settings: {}.\n{}", describe_config(&merged), SET_USAGE),
    )
    .with(keys::QG_CONFIG, Value::Object(merged))
}

pub(super) fn run_generation(_: &Captures<'_>, ctx: &Context<'_>) -> Transition {
    let config = current_config(ctx.metadata);
    Transition::to(
        DialogState::QgDone,
        format!("Starting question generation with {}.\n{}", describe_config(&config), DONE_TEXT),
    )
    .with(keys::QG_CONFIG, Value::Object(config))
    .with(keys::LAST_RUN_AT, json!(ctx.now.to_rfc3339()))
    .action(Action::StartProcessing)
}

pub(super) fn mark_uploaded(caps: &Captures<'_>, ctx: &Context<'_>) -> Transition {
    match captured_id(caps) {
        Some(id) => Transition::to(
            DialogState::UploadDocConfig,
            format!("Received document {}.\n{}", id, config_prompt(ctx.metadata)),
        )
        .with(keys::UPLOADED_DOC_ID, json!(id)),
        None => reprompt_upload(caps, ctx),
    }
}

pub(super) fn reprompt_upload(_: &Captures<'_>, _: &Context<'_>) -> Transition {
    Transition::to(DialogState::UploadDocWait, format!("Still waiting for your upload. {}", UPLOAD_PROMPT))
}
