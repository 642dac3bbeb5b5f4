//! Hot-update engine: in-place reconciliation of a live runtime with a
//! revised (partial or full) program definition.
//!
//! Sections are applied in a fixed order: state, computed, invariants,
//! actions, effects, components, root. An absent section is left unchanged.
//!
//! | section    | rule                                                        |
//! |------------|-------------------------------------------------------------|
//! | state      | preserve type-compatible live values, reset the rest, add new ids, drop missing ids |
//! | computed   | full replace                                                |
//! | invariants | full replace                                                |
//! | actions    | full replace                                                |
//! | effects    | remove all, then define and trigger the incoming set        |
//! | components | full replace                                                |
//! | root       | replace, re-render if a target is attached                  |
//!
//! Application is best-effort: the first failing section stops the update
//! and sections already applied stay applied. The failure is returned as
//! [`RuntimeError::UpdateFailed`] and published on the `error` channel.

use serde::Serialize;

use declaro_core::{ProgramUpdate, Section};

use crate::error::RuntimeError;
use crate::events::{ErrorOrigin, RuntimeEvent};
use crate::runtime::Runtime;

/// What an applied update changed.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct UpdateReport {
    /// Sections applied, in application order.
    pub sections: Vec<Section>,
    /// State ids whose live value survived.
    pub preserved: Vec<String>,
    /// State ids reset to the incoming initial value.
    pub reset: Vec<String>,
    /// State ids defined fresh.
    pub added: Vec<String>,
    /// State ids removed.
    pub removed: Vec<String>,
}

impl Runtime {
    /// Reconciles the live runtime with `update`.
    ///
    /// A structurally invalid update (bad mutation, watch effect without a
    /// watch list, state/computed id clash) is rejected before any section
    /// is applied.
    pub fn apply_update(&self, update: ProgramUpdate) -> Result<UpdateReport, RuntimeError> {
        let mut report = UpdateReport::default();
        let result = update
            .validate()
            .map_err(RuntimeError::from)
            .and_then(|()| self.reconcile(&update, &mut report));

        match result {
            Ok(()) => {
                tracing::info!(
                    sections = ?report.sections,
                    preserved = report.preserved.len(),
                    reset = report.reset.len(),
                    "hot update applied"
                );
                self.events.emit(RuntimeEvent::Update {
                    report: report.clone(),
                });
                Ok(report)
            }
            Err(err) => {
                tracing::warn!(applied = ?report.sections, "hot update failed: {}", err);
                self.events
                    .emit(RuntimeEvent::from_error(ErrorOrigin::Update, &err));
                Err(err)
            }
        }
    }

    fn reconcile(&self, update: &ProgramUpdate, report: &mut UpdateReport) -> Result<(), RuntimeError> {
        for section in update.sections() {
            self.apply_section(section, update, report)
                .map_err(|source| RuntimeError::UpdateFailed {
                    section,
                    source: Box::new(source),
                })?;
            report.sections.push(section);
        }
        Ok(())
    }

    fn apply_section(
        &self,
        section: Section,
        update: &ProgramUpdate,
        report: &mut UpdateReport,
    ) -> Result<(), RuntimeError> {
        match section {
            Section::State => {
                if let Some(state) = &update.state {
                    let outcome = self.graph.reconcile_state(state)?;
                    report.preserved = outcome.preserved;
                    report.reset = outcome.reset;
                    report.added = outcome.added;
                    report.removed = outcome.removed;
                }
            }
            Section::Computed => {
                if let Some(computed) = &update.computed {
                    let removed = self.graph.replace_computed(computed)?;
                    tracing::debug!(removed = ?removed, "computed nodes replaced");
                }
            }
            Section::Invariants => {
                if let Some(invariants) = &update.invariants {
                    self.graph.replace_invariants(invariants.clone());
                }
            }
            Section::Actions => {
                if let Some(actions) = &update.actions {
                    self.dispatcher.replace_actions(actions);
                }
            }
            Section::Effects => {
                if let Some(effects) = &update.effects {
                    let dropped = self.graph.clear_effects();
                    tracing::debug!(dropped, incoming = effects.len(), "effects replaced");
                    for (id, def) in effects {
                        self.graph.define_effect(id, def.clone())?;
                    }
                }
            }
            Section::Components => {
                if let Some(components) = &update.components {
                    *self.components.borrow_mut() = components.clone();
                }
            }
            Section::Root => {
                if let Some(root) = &update.root {
                    self.replace_root(root.clone());
                }
            }
        }
        Ok(())
    }
}
