//! Task template definitions and event matching.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{Result, TaskError};

/// Longest accepted template key; matches the store column budget.
pub const MAX_KEY_LEN: usize = 64;

/// Words that end in `s` but are not plurals in block/crop ids.
const IRREGULAR_SINGULARS: &[&str] = &[
    "cactus",
    "chorus",
    "bamboo",
    "sugar_cane",
    "chorus_plant",
    "chorus_flower",
    "kelp",
    "seagrass",
    "tall_seagrass",
    "vines",
    "cave_vines",
    "weeping_vines",
    "twisting_vines",
];

/// Kind of activity a task counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    Chat,
    Craft,
    Fish,
    Consume,
    Break,
    Harvest,
    Submit,
    Kill,
    Breed,
    Command,
}

impl TaskKind {
    pub const ALL: [TaskKind; 10] = [
        Self::Chat,
        Self::Craft,
        Self::Fish,
        Self::Consume,
        Self::Break,
        Self::Harvest,
        Self::Submit,
        Self::Kill,
        Self::Breed,
        Self::Command,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Chat => "chat",
            Self::Craft => "craft",
            Self::Fish => "fish",
            Self::Consume => "consume",
            Self::Break => "break",
            Self::Harvest => "harvest",
            Self::Submit => "submit",
            Self::Kill => "kill",
            Self::Breed => "breed",
            Self::Command => "command",
        }
    }

    /// Block and crop tasks compare normalized ids.
    fn uses_loose_names(self) -> bool {
        matches!(self, Self::Break | Self::Harvest)
    }
}

impl std::fmt::Display for TaskKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TaskKind {
    type Err = TaskError;

    fn from_str(s: &str) -> Result<Self> {
        let needle = s.trim();
        Self::ALL
            .into_iter()
            .find(|k| k.as_str().eq_ignore_ascii_case(needle))
            .ok_or_else(|| TaskError::Validation(format!("unknown task type '{s}'")))
    }
}

/// Reward granted on claim. Opaque to the engine.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Reward {
    pub money: f64,
    pub items: Vec<RewardItem>,
    /// Console commands; `{player}` is substituted by the granter.
    pub commands: Vec<String>,
}

impl Reward {
    pub fn is_empty(&self) -> bool {
        self.money == 0.0 && self.items.is_empty() && self.commands.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewardItem {
    pub item: String,
    pub amount: u32,
}

/// Extra predicate on an event's detail string (item metadata, entity name).
///
/// All conditions on a template must hold after a selector matched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", content = "value", rename_all = "snake_case")]
pub enum MatchCondition {
    Equals(String),
    Contains(String),
    Prefix(String),
}

impl MatchCondition {
    fn accepts(&self, detail: Option<&str>) -> bool {
        let Some(detail) = detail else {
            return false;
        };
        let detail = detail.to_lowercase();
        match self {
            Self::Equals(v) => detail == v.to_lowercase(),
            Self::Contains(v) => detail.contains(&v.to_lowercase()),
            Self::Prefix(v) => detail.starts_with(&v.to_lowercase()),
        }
    }
}

/// A catalog entry: what a task asks for and what it pays.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskTemplate {
    pub key: String,
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type")]
    pub kind: TaskKind,
    /// OR-matched selectors. Empty means "anything of this kind".
    #[serde(default)]
    pub targets: Vec<String>,
    #[serde(default = "default_target_amount")]
    pub target_amount: u32,
    /// Relative selection weight. Zero is never picked.
    #[serde(default = "default_weight")]
    pub weight: u32,
    #[serde(default)]
    pub reward: Reward,
    #[serde(default = "default_category")]
    pub category: String,
    #[serde(default)]
    pub conditions: Vec<MatchCondition>,
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default)]
    pub description: Vec<String>,
    #[serde(default)]
    pub icon: Option<String>,
    /// Host-specific data carried through untouched.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extensions: BTreeMap<String, serde_json::Value>,
}

fn default_target_amount() -> u32 {
    1
}

fn default_weight() -> u32 {
    10
}

fn default_category() -> String {
    "daily".to_owned()
}

fn default_version() -> u32 {
    1
}

impl TaskTemplate {
    /// Minimal template; handy for imports built in code.
    pub fn new(key: impl Into<String>, kind: TaskKind, target_amount: u32) -> Self {
        let key = key.into();
        Self {
            name: key.clone(),
            key,
            kind,
            targets: Vec::new(),
            target_amount,
            weight: default_weight(),
            reward: Reward::default(),
            category: default_category(),
            conditions: Vec::new(),
            version: default_version(),
            description: Vec::new(),
            icon: None,
            extensions: BTreeMap::new(),
        }
    }

    pub fn with_targets<I, S>(mut self, targets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.targets = targets.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = category.into();
        self
    }

    pub fn with_weight(mut self, weight: u32) -> Self {
        self.weight = weight;
        self
    }

    pub fn with_reward(mut self, reward: Reward) -> Self {
        self.reward = reward;
        self
    }

    /// Reject templates the engine cannot run.
    pub fn validate(&self) -> Result<()> {
        if self.key.trim().is_empty() {
            return Err(TaskError::Validation("template key is empty".into()));
        }
        if self.key.len() > MAX_KEY_LEN {
            return Err(TaskError::Validation(format!(
                "template key '{}' longer than {MAX_KEY_LEN} bytes",
                self.key
            )));
        }
        if self.target_amount == 0 {
            return Err(TaskError::Validation(format!(
                "template '{}' has target_amount 0",
                self.key
            )));
        }
        if self.category.trim().is_empty() {
            return Err(TaskError::Validation(format!(
                "template '{}' has no category",
                self.key
            )));
        }
        Ok(())
    }

    /// Whether two definitions differ in anything but their version stamp.
    pub fn same_content(&self, other: &Self) -> bool {
        Self {
            version: 0,
            ..self.clone()
        } == Self {
            version: 0,
            ..other.clone()
        }
    }

    /// Whether an event of `kind` on `selector` counts toward this template.
    pub fn accepts(&self, kind: TaskKind, selector: &str, detail: Option<&str>) -> bool {
        if self.kind != kind {
            return false;
        }
        let selector_ok = self.targets.is_empty()
            || self
                .targets
                .iter()
                .any(|target| selector_matches(kind, target, selector));
        selector_ok && self.conditions.iter().all(|c| c.accepts(detail))
    }
}

fn selector_matches(kind: TaskKind, target: &str, selector: &str) -> bool {
    match kind {
        TaskKind::Chat => selector.to_lowercase().contains(&target.to_lowercase()),
        TaskKind::Command => {
            let cmd = selector.trim_start_matches('/').to_lowercase();
            let want = target.trim_start_matches('/').to_lowercase();
            cmd.starts_with(&want)
        }
        k if k.uses_loose_names() => normalize_block_id(target) == normalize_block_id(selector),
        _ => target.eq_ignore_ascii_case(selector),
    }
}

/// Normalize a block or crop id for loose comparison.
///
/// Strips the `minecraft:` namespace, folds cocoa synonyms, and drops a
/// plural `s` unless the word is one of the irregular singulars.
pub fn normalize_block_id(raw: &str) -> String {
    let lower = raw.trim().to_lowercase();
    let name = lower.strip_prefix("minecraft:").unwrap_or(&lower);
    if name == "cocoa" || name == "cocoa_beans" {
        return "cocoa_bean".to_owned();
    }
    if IRREGULAR_SINGULARS.contains(&name) {
        return name.to_owned();
    }
    match name.strip_suffix('s') {
        Some(stem) if !stem.is_empty() => stem.to_owned(),
        _ => name.to_owned(),
    }
}
