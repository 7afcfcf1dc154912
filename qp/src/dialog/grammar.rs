//! Intent grammar: ordered per-state rule tables
//!
//! Every pattern is matched against the whole trimmed input, case-insensitive
//! and Unicode-aware. The first matching rule of a state wins; global
//! navigation is tried before the state's own rules in every state except
//! the root menu.

use std::sync::LazyLock;

use regex::{Captures, Regex};

use super::engine::{self, Context, Transition};
use super::state::DialogState;

pub(super) type Handler = fn(&Captures<'_>, &Context<'_>) -> Transition;

pub(super) struct Rule {
    pub name: &'static str,
    pub pattern: &'static LazyLock<Regex>,
    pub handler: Handler,
}

fn pattern(re: &str) -> Regex {
    Regex::new(re).expect("dialog patterns are static and valid")
}

static HOME: LazyLock<Regex> = LazyLock::new(|| pattern(r"(?i)^(?:home|menu|top|ホーム|メニュー|トップ)$"));

static BACK: LazyLock<Regex> = LazyLock::new(|| pattern(r"(?i)^(?:back|return|戻る|もどる)$"));

static EXISTING: LazyLock<Regex> = LazyLock::new(|| {
    pattern(
        r"(?i)^(?:1-1|1|existing|(?:use\s+)?(?:an?\s+)?existing\s+(?:document|doc|file|video)s?|use\s+existing|既存(?:の)?(?:資料|ドキュメント|動画)?(?:を(?:使う|選ぶ))?)$",
    )
});

static UPLOAD: LazyLock<Regex> = LazyLock::new(|| {
    pattern(
        r"(?i)^(?:1-2|2|upload|new|upload\s+(?:a\s+)?(?:new\s+)?(?:document|doc|file|video)|new\s+(?:document|doc|file|video|upload)|新規(?:の)?(?:資料|ドキュメント|動画)?(?:を)?(?:アップロード)?|アップロード(?:する)?)$",
    )
});

static HELP: LazyLock<Regex> = LazyLock::new(|| pattern(r"(?i)^(?:help|\?|？|ヘルプ|使い方)$"));

static SELECT: LazyLock<Regex> = LazyLock::new(|| {
    pattern(r"(?i)^(?:select(?:\s+(?:document|doc))?|doc(?:ument)?|選択)\s*[:：]?\s*([0-9]+)$")
});

/// Looks like a select command but carries no usable id
static SELECT_ATTEMPT: LazyLock<Regex> =
    LazyLock::new(|| pattern(r"(?i)^(?:select|doc(?:ument)?|選択)(?:[\s:：].*)?$"));

static SET: LazyLock<Regex> = LazyLock::new(|| pattern(r"(?is)^(?:set|設定)(?:\s*[:：]\s*|\s+|$)(.*)$"));

static RUN: LazyLock<Regex> = LazyLock::new(|| pattern(r"(?i)^(?:run|start|go|実行|開始)$"));

static UPLOADED: LazyLock<Regex> = LazyLock::new(|| {
    pattern(r"(?i)^(?:uploaded|upload(?:ed)?\s+done|アップロード(?:済み|完了)?)\s*[:：]\s*([0-9]+)$")
});

static ANYTHING: LazyLock<Regex> = LazyLock::new(|| pattern(r"(?s)^.*$"));

static NAVIGATION: [Rule; 2] = [
    Rule {
        name: "home",
        pattern: &HOME,
        handler: engine::go_home,
    },
    Rule {
        name: "back",
        pattern: &BACK,
        handler: engine::go_back,
    },
];

static ROOT_MENU: [Rule; 3] = [
    Rule {
        name: "existing",
        pattern: &EXISTING,
        handler: engine::choose_existing,
    },
    Rule {
        name: "upload",
        pattern: &UPLOAD,
        handler: engine::choose_upload,
    },
    Rule {
        name: "help",
        pattern: &HELP,
        handler: engine::show_help,
    },
];

static EXISTING_DOC_SELECT: [Rule; 2] = [
    Rule {
        name: "select",
        pattern: &SELECT,
        handler: engine::select_document,
    },
    Rule {
        name: "select-malformed",
        pattern: &SELECT_ATTEMPT,
        handler: engine::reprompt_select,
    },
];

static DOC_CONFIG: [Rule; 2] = [
    Rule {
        name: "set",
        pattern: &SET,
        handler: engine::set_config,
    },
    Rule {
        name: "run",
        pattern: &RUN,
        handler: engine::run_generation,
    },
];

static UPLOAD_DOC_WAIT: [Rule; 2] = [
    Rule {
        name: "uploaded",
        pattern: &UPLOADED,
        handler: engine::mark_uploaded,
    },
    Rule {
        name: "upload-reprompt",
        pattern: &ANYTHING,
        handler: engine::reprompt_upload,
    },
];

/// Rules tried for `state`, in order
pub(super) fn rules_for(state: DialogState) -> impl Iterator<Item = &'static Rule> {
    let (navigation, own): (&'static [Rule], &'static [Rule]) = match state {
        DialogState::RootMenu => (&[], &ROOT_MENU),
        DialogState::ExistingDocSelect => (&NAVIGATION, &EXISTING_DOC_SELECT),
        DialogState::ExistingDocConfig | DialogState::UploadDocConfig => (&NAVIGATION, &DOC_CONFIG),
        DialogState::UploadDocWait => (&NAVIGATION, &UPLOAD_DOC_WAIT),
        DialogState::QgDone => (&NAVIGATION, &[]),
    };
    navigation.iter().chain(own.iter())
}
