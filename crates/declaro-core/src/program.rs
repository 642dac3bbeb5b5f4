//! Program definitions: state, computed values, actions, effects,
//! invariants, components and the UI tree.
//!
//! [`ProgramDef`] is the full document handed to the runtime at start-up.
//! [`ProgramUpdate`] is the partial form delivered by live updates, where an
//! absent section means "unchanged" rather than "delete".
//!
//! All registries are [`IndexMap`]s so that definition order survives
//! parsing: effects activate, and hot updates reconcile, in document order.

use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use smallvec::SmallVec;

use crate::error::CoreError;
use crate::expr::Expr;
use crate::types::ValueType;

// ---------------------------------------------------------------------------
// Node definitions
// ---------------------------------------------------------------------------

/// A named, directly-settable reactive value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateDef {
    #[serde(rename = "type", default)]
    pub ty: ValueType,
    #[serde(default)]
    pub initial: Value,
}

impl StateDef {
    pub fn new(ty: ValueType, initial: Value) -> Self {
        StateDef { ty, initial }
    }
}

/// A named value derived from its declared dependencies on every read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComputedDef {
    #[serde(default)]
    pub deps: SmallVec<[String; 4]>,
    pub expr: Expr,
}

/// When an effect runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trigger {
    /// Runs at definition and whenever a watched identifier is notified.
    Watch,
    /// Runs once when the runtime is attached to a render target.
    Mount,
    /// Runs once at attach; repeats are scheduled by the embedder.
    Interval,
    /// Runs once at attach; the delay is applied by the embedder.
    Timeout,
}

impl Trigger {
    /// Returns true for triggers whose first run waits for attach.
    pub fn is_deferred(&self) -> bool {
        !matches!(self, Trigger::Watch)
    }
}

/// What an effect (or an action follow-up) does when it runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum EffectRun {
    /// Apply a list of mutations in one batch.
    Mutate { mutations: Vec<MutationDef> },
    /// Dispatch another action with resolved arguments.
    Dispatch {
        action: String,
        #[serde(default)]
        args: Vec<Expr>,
    },
    /// Publish a resolved value on the runtime's effect channel.
    Emit {
        event: String,
        #[serde(default = "null_expr")]
        value: Expr,
    },
}

fn null_expr() -> Expr {
    Expr::Literal(Value::Null)
}

/// A side-effecting reaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EffectDef {
    pub trigger: Trigger,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub watch: Vec<String>,
    pub run: EffectRun,
    /// Period or delay for `interval`/`timeout` triggers, in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ms: Option<u64>,
}

// ---------------------------------------------------------------------------
// Actions and mutations
// ---------------------------------------------------------------------------

/// The closed set of mutation operation kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MutationKind {
    Set,
    Add,
    Subtract,
    Multiply,
    Toggle,
    Push,
    Pop,
    Merge,
    Filter,
    Map,
}

impl MutationKind {
    /// Returns true if the kind takes a value expression.
    pub fn takes_value(&self) -> bool {
        !matches!(self, MutationKind::Toggle | MutationKind::Pop)
    }

    pub fn name(&self) -> &'static str {
        match self {
            MutationKind::Set => "set",
            MutationKind::Add => "add",
            MutationKind::Subtract => "subtract",
            MutationKind::Multiply => "multiply",
            MutationKind::Toggle => "toggle",
            MutationKind::Push => "push",
            MutationKind::Pop => "pop",
            MutationKind::Merge => "merge",
            MutationKind::Filter => "filter",
            MutationKind::Map => "map",
        }
    }
}

impl fmt::Display for MutationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One mutation instruction of an action.
///
/// A literal `null` value must be written as `{"literal": null}`, since a
/// bare `null` reads as "no value".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MutationDef {
    pub target: String,
    pub op: MutationKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Expr>,
}

impl MutationDef {
    pub fn new(target: impl Into<String>, op: MutationKind, value: Option<Expr>) -> Self {
        MutationDef {
            target: target.into(),
            op,
            value,
        }
    }

    /// Checks that the value is present exactly when the kind takes one.
    pub fn validate(&self) -> Result<(), CoreError> {
        let reason = match (self.op.takes_value(), self.value.is_some()) {
            (true, false) => "operation requires a value",
            (false, true) => "operation takes no value",
            _ => return Ok(()),
        };
        Err(CoreError::InvalidMutation {
            target: self.target.clone(),
            op: self.op.name().to_string(),
            reason: reason.to_string(),
        })
    }
}

/// A named, parameterized sequence of mutations plus follow-up effects.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActionDef {
    #[serde(default)]
    pub params: Vec<String>,
    #[serde(default)]
    pub mutations: Vec<MutationDef>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub effects: Vec<EffectRun>,
}

/// A predicate over state checked after each committed batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvariantDef {
    pub name: String,
    pub expr: Expr,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

// ---------------------------------------------------------------------------
// Documents
// ---------------------------------------------------------------------------

/// A complete program definition.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProgramDef {
    #[serde(default)]
    pub state: IndexMap<String, StateDef>,
    #[serde(default)]
    pub computed: IndexMap<String, ComputedDef>,
    #[serde(default)]
    pub actions: IndexMap<String, ActionDef>,
    #[serde(default)]
    pub effects: IndexMap<String, EffectDef>,
    #[serde(default)]
    pub invariants: Vec<InvariantDef>,
    #[serde(default)]
    pub components: IndexMap<String, Value>,
    #[serde(default)]
    pub root: Option<Value>,
}

impl ProgramDef {
    /// Parses and validates a program document.
    pub fn from_json(text: &str) -> Result<Self, CoreError> {
        let def: ProgramDef = serde_json::from_str(text)?;
        def.validate()?;
        Ok(def)
    }

    /// Structural validation that serde alone cannot express.
    pub fn validate(&self) -> Result<(), CoreError> {
        validate_sections(
            Some(&self.state),
            Some(&self.computed),
            Some(&self.actions),
            Some(&self.effects),
        )
    }

    /// Converts the full definition into an update that replaces every
    /// section.
    pub fn into_update(self) -> ProgramUpdate {
        ProgramUpdate {
            state: Some(self.state),
            computed: Some(self.computed),
            actions: Some(self.actions),
            effects: Some(self.effects),
            invariants: Some(self.invariants),
            components: Some(self.components),
            root: self.root,
        }
    }
}

/// A partial program definition delivered by a live update.
///
/// `None` means the section is unchanged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProgramUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<IndexMap<String, StateDef>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub computed: Option<IndexMap<String, ComputedDef>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actions: Option<IndexMap<String, ActionDef>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub effects: Option<IndexMap<String, EffectDef>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invariants: Option<Vec<InvariantDef>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub components: Option<IndexMap<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root: Option<Value>,
}

impl ProgramUpdate {
    pub fn from_json(text: &str) -> Result<Self, CoreError> {
        let update: ProgramUpdate = serde_json::from_str(text)?;
        update.validate()?;
        Ok(update)
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        validate_sections(
            self.state.as_ref(),
            self.computed.as_ref(),
            self.actions.as_ref(),
            self.effects.as_ref(),
        )
    }

    /// Returns the sections this update carries, in reconciliation order.
    pub fn sections(&self) -> Vec<Section> {
        let mut out = Vec::new();
        if self.state.is_some() {
            out.push(Section::State);
        }
        if self.computed.is_some() {
            out.push(Section::Computed);
        }
        if self.invariants.is_some() {
            out.push(Section::Invariants);
        }
        if self.actions.is_some() {
            out.push(Section::Actions);
        }
        if self.effects.is_some() {
            out.push(Section::Effects);
        }
        if self.components.is_some() {
            out.push(Section::Components);
        }
        if self.root.is_some() {
            out.push(Section::Root);
        }
        out
    }

    pub fn is_empty(&self) -> bool {
        self.sections().is_empty()
    }
}

/// A reconcilable section of a program definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Section {
    State,
    Computed,
    Invariants,
    Actions,
    Effects,
    Components,
    Root,
}

impl fmt::Display for Section {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Section::State => "state",
            Section::Computed => "computed",
            Section::Invariants => "invariants",
            Section::Actions => "actions",
            Section::Effects => "effects",
            Section::Components => "components",
            Section::Root => "root",
        };
        f.write_str(name)
    }
}

fn validate_sections(
    state: Option<&IndexMap<String, StateDef>>,
    computed: Option<&IndexMap<String, ComputedDef>>,
    actions: Option<&IndexMap<String, ActionDef>>,
    effects: Option<&IndexMap<String, EffectDef>>,
) -> Result<(), CoreError> {
    if let (Some(state), Some(computed)) = (state, computed) {
        if let Some(id) = computed.keys().find(|id| state.contains_key(*id)) {
            return Err(CoreError::ConflictingIdentifier { id: id.clone() });
        }
    }

    for action in actions.into_iter().flat_map(|a| a.values()) {
        for mutation in &action.mutations {
            mutation.validate()?;
        }
        validate_runs(&action.effects)?;
    }

    for (id, effect) in effects.into_iter().flat_map(|e| e.iter()) {
        if effect.trigger == Trigger::Watch && effect.watch.is_empty() {
            return Err(CoreError::InvalidEffect {
                id: id.clone(),
                reason: "watch trigger requires at least one watched identifier".into(),
            });
        }
        validate_runs(std::slice::from_ref(&effect.run))?;
    }

    Ok(())
}

fn validate_runs(runs: &[EffectRun]) -> Result<(), CoreError> {
    for run in runs {
        if let EffectRun::Mutate { mutations } = run {
            for mutation in mutations {
                mutation.validate()?;
            }
        }
    }
    Ok(())
}
