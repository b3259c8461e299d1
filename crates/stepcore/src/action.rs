use crate::{EngineError, FRAME_SEPARATOR, PATH_SEPARATOR};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// One node of the action graph. Actions form a linked list through
/// `next_action`; Branch, Split and Loop hold nested lists of their own.
#[derive(Debug, Clone, Deserialize)]
#[serde(try_from = "RawAction")]
pub struct Action {
    pub name: String,
    pub display_name: String,
    pub skip: bool,
    pub next_action: Option<Arc<Action>>,
    pub kind: ActionKind,
}

#[derive(Debug, Clone)]
pub enum ActionKind {
    Code(CodeStep),
    Block(BlockStep),
    Branch(BranchStep),
    Split(SplitStep),
    LoopOnItems(LoopStep),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionType {
    Code,
    Block,
    Branch,
    Split,
    LoopOnItems,
}

impl ActionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionType::Code => "CODE",
            ActionType::Block => "BLOCK",
            ActionType::Branch => "BRANCH",
            ActionType::Split => "SPLIT",
            ActionType::LoopOnItems => "LOOP_ON_ITEMS",
        }
    }
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ActionType {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CODE" => Ok(ActionType::Code),
            "BLOCK" | "PIECE" => Ok(ActionType::Block),
            "BRANCH" => Ok(ActionType::Branch),
            "SPLIT" | "ROUTER" => Ok(ActionType::Split),
            "LOOP_ON_ITEMS" => Ok(ActionType::LoopOnItems),
            other => Err(EngineError::UnsupportedActionType(other.to_string())),
        }
    }
}

/// Retry and continue-on-failure switches carried by Code and Block steps.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorHandlingOptions {
    #[serde(default)]
    pub continue_on_failure: bool,
    #[serde(default)]
    pub retry_on_failure: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CodeStep {
    #[serde(default)]
    pub input: Value,
    #[serde(default)]
    pub error_handling_options: ErrorHandlingOptions,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockStep {
    pub block_name: String,
    pub block_version: String,
    pub action_name: String,
    #[serde(default)]
    pub input: Value,
    #[serde(default)]
    pub error_handling_options: ErrorHandlingOptions,
}

#[derive(Debug, Clone)]
pub struct BranchStep {
    /// Unresolved condition groups; resolved and parsed at execution time.
    pub conditions: Value,
    pub on_success_action: Option<Arc<Action>>,
    pub on_failure_action: Option<Arc<Action>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SplitOption {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub conditions: Value,
}

#[derive(Debug, Clone)]
pub struct SplitBranch {
    pub option_id: String,
    pub action: Option<Arc<Action>>,
}

#[derive(Debug, Clone)]
pub struct SplitStep {
    pub options: Vec<SplitOption>,
    pub default_branch_id: String,
    pub branches: Vec<SplitBranch>,
}

impl SplitStep {
    pub fn branch_for(&self, option_id: &str) -> Option<&SplitBranch> {
        self.branches.iter().find(|b| b.option_id == option_id)
    }
}

#[derive(Debug, Clone)]
pub struct LoopStep {
    pub items: Value,
    pub first_loop_action: Option<Arc<Action>>,
}

impl Action {
    pub fn action_type(&self) -> ActionType {
        match &self.kind {
            ActionKind::Code(_) => ActionType::Code,
            ActionKind::Block(_) => ActionType::Block,
            ActionKind::Branch(_) => ActionType::Branch,
            ActionKind::Split(_) => ActionType::Split,
            ActionKind::LoopOnItems(_) => ActionType::LoopOnItems,
        }
    }

    pub fn error_handling(&self) -> ErrorHandlingOptions {
        match &self.kind {
            ActionKind::Code(code) => code.error_handling_options,
            ActionKind::Block(block) => block.error_handling_options,
            _ => ErrorHandlingOptions::default(),
        }
    }

    /// Child chains nested directly under this action, in declaration order.
    pub fn children(&self) -> Vec<&Arc<Action>> {
        match &self.kind {
            ActionKind::Branch(branch) => branch
                .on_success_action
                .iter()
                .chain(branch.on_failure_action.iter())
                .collect(),
            ActionKind::Split(split) => split.branches.iter().filter_map(|b| b.action.as_ref()).collect(),
            ActionKind::LoopOnItems(lp) => lp.first_loop_action.iter().collect(),
            ActionKind::Code(_) | ActionKind::Block(_) => Vec::new(),
        }
    }

    /// Depth-first search of this chain (and everything nested in it).
    pub fn find(&self, name: &str) -> Option<&Action> {
        let mut current = Some(self);
        while let Some(action) = current {
            if action.name == name {
                return Some(action);
            }
            for child in action.children() {
                if let Some(found) = child.find(name) {
                    return Some(found);
                }
            }
            current = action.next_action.as_deref();
        }
        None
    }

    /// A copy of this action detached from its successor.
    pub fn detached(&self) -> Action {
        Action {
            next_action: None,
            ..self.clone()
        }
    }
}

/// Wire shape of an action. Converted into [`Action`] so that an unknown
/// type tag surfaces as [`EngineError::UnsupportedActionType`].
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawAction {
    pub name: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(rename = "type")]
    pub action_type: String,
    #[serde(default)]
    pub skip: bool,
    #[serde(default)]
    pub settings: Value,
    #[serde(default)]
    pub next_action: Option<Box<RawAction>>,
    #[serde(default)]
    pub on_success_action: Option<Box<RawAction>>,
    #[serde(default)]
    pub on_failure_action: Option<Box<RawAction>>,
    #[serde(default)]
    pub first_loop_action: Option<Box<RawAction>>,
    #[serde(default)]
    pub branches: Vec<RawSplitBranch>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawSplitBranch {
    pub option_id: String,
    #[serde(default)]
    pub action: Option<Box<RawAction>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawBranchSettings {
    #[serde(default)]
    conditions: Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawSplitSettings {
    #[serde(default)]
    options: Vec<SplitOption>,
    default_branch_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawLoopSettings {
    #[serde(default)]
    items: Value,
}

fn convert_child(raw: Option<Box<RawAction>>) -> Result<Option<Arc<Action>>, EngineError> {
    raw.map(|child| Action::try_from(*child).map(Arc::new))
        .transpose()
}

fn settings<T: serde::de::DeserializeOwned>(name: &str, value: Value) -> Result<T, EngineError> {
    let value = if value.is_null() {
        Value::Object(Default::default())
    } else {
        value
    };
    serde_json::from_value(value)
        .map_err(|e| EngineError::Configuration(format!("Invalid settings for step '{}': {}", name, e)))
}

impl TryFrom<RawAction> for Action {
    type Error = EngineError;

    fn try_from(raw: RawAction) -> Result<Self, Self::Error> {
        let action_type: ActionType = raw.action_type.parse()?;
        let kind = match action_type {
            ActionType::Code => ActionKind::Code(settings(&raw.name, raw.settings)?),
            ActionType::Block => ActionKind::Block(settings(&raw.name, raw.settings)?),
            ActionType::Branch => {
                let parsed: RawBranchSettings = settings(&raw.name, raw.settings)?;
                ActionKind::Branch(BranchStep {
                    conditions: parsed.conditions,
                    on_success_action: convert_child(raw.on_success_action)?,
                    on_failure_action: convert_child(raw.on_failure_action)?,
                })
            }
            ActionType::Split => {
                let parsed: RawSplitSettings = settings(&raw.name, raw.settings)?;
                let branches = raw
                    .branches
                    .into_iter()
                    .map(|b| {
                        Ok(SplitBranch {
                            option_id: b.option_id,
                            action: convert_child(b.action)?,
                        })
                    })
                    .collect::<Result<Vec<_>, EngineError>>()?;
                ActionKind::Split(SplitStep {
                    options: parsed.options,
                    default_branch_id: parsed.default_branch_id,
                    branches,
                })
            }
            ActionType::LoopOnItems => {
                // Loop names become resume-key frames.
                if raw.name.contains([PATH_SEPARATOR, FRAME_SEPARATOR]) {
                    return Err(EngineError::Configuration(format!(
                        "Loop name '{}' must not contain '{}' or '{}'",
                        raw.name, PATH_SEPARATOR, FRAME_SEPARATOR
                    )));
                }
                let parsed: RawLoopSettings = settings(&raw.name, raw.settings)?;
                ActionKind::LoopOnItems(LoopStep {
                    items: parsed.items,
                    first_loop_action: convert_child(raw.first_loop_action)?,
                })
            }
        };

        Ok(Action {
            display_name: raw.display_name.unwrap_or_else(|| raw.name.clone()),
            name: raw.name,
            skip: raw.skip,
            next_action: convert_child(raw.next_action)?,
            kind,
        })
    }
}

impl Action {
    /// Parse an action chain, reporting an unknown type tag distinctly.
    pub fn from_json(value: Value) -> Result<Action, EngineError> {
        let raw: RawAction = serde_json::from_value(value)?;
        Action::try_from(raw)
    }
}
