//! Output Rendering
//!
//! Renders plans and run summaries as text or JSON. Renderers return strings;
//! the binary decides where they go.

use serde_json::json;

use crate::application::{PlanAction, ReleasePlan, ReleaseResult, RevertResult};
use crate::domain::value_objects::{ObjectId, ObjectRef};

/// Output format for rendering
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    /// Human-readable text output
    #[default]
    Text,
    /// JSON output for scripting
    Json,
}

/// Icons for output rendering
struct Icons {
    check: &'static str,
    cross: &'static str,
    create: &'static str,
    update: &'static str,
    same: &'static str,
    warn: &'static str,
    trash: &'static str,
}

impl Icons {
    fn unicode() -> Self {
        Self {
            check: "✓",
            cross: "✗",
            create: "+",
            update: "~",
            same: "○",
            warn: "⚠",
            trash: "🗑",
        }
    }

    fn ascii() -> Self {
        Self {
            check: "[OK]",
            cross: "[FAIL]",
            create: "+",
            update: "~",
            same: "[ ]",
            warn: "[!]",
            trash: "[DEL]",
        }
    }

    fn action(&self, action: PlanAction) -> &'static str {
        match action {
            PlanAction::Create => self.create,
            PlanAction::Update => self.update,
            PlanAction::Unchanged => self.same,
        }
    }
}

/// Rendering of release outcomes
pub trait ReleaseRenderer {
    fn render_plan(&self, plan: &ReleasePlan) -> String;

    fn render_result(&self, result: &ReleaseResult) -> String;

    fn render_revert(&self, result: &RevertResult) -> String;
}

/// Text renderer
pub struct TextRenderer {
    pub unicode: bool,
    /// Verbosity level; diffs of unchanged entries are hidden below 1
    pub verbose: u8,
}

impl Default for TextRenderer {
    fn default() -> Self {
        Self {
            unicode: true,
            verbose: 0,
        }
    }
}

impl TextRenderer {
    fn icons(&self) -> Icons {
        if self.unicode {
            Icons::unicode()
        } else {
            Icons::ascii()
        }
    }
}

impl ReleaseRenderer for TextRenderer {
    fn render_plan(&self, plan: &ReleasePlan) -> String {
        let icons = self.icons();
        let mut out = String::new();

        if !plan.has_changes() && !plan.has_conflicts() {
            out.push_str(&format!("{} Already up-to-date\n", icons.check));
            out.push_str(&format!("\n  {}\n", plan.summary()));
            return out;
        }

        out.push_str(&format!("Release plan: {}\n", plan.summary()));
        for entry in &plan.entries {
            if entry.action == PlanAction::Unchanged && self.verbose == 0 && entry.warnings.is_empty() {
                continue;
            }
            let target = match entry.target_id {
                Some(id) => format!("target {id}"),
                None => format!("target #{}", entry.target_index),
            };
            out.push_str(&format!(
                "\n  {} {} ({target}) {}\n",
                icons.action(entry.action),
                entry.object,
                entry.diff.summary()
            ));
            if entry.action != PlanAction::Unchanged || self.verbose > 1 {
                for line in entry.diff.unified.lines() {
                    out.push_str(&format!("      {line}\n"));
                }
            }
            for warning in &entry.warnings {
                out.push_str(&format!("    {} {warning}\n", icons.warn));
            }
            if let Some(comparison) = &entry.comparison {
                for (path, value) in &comparison.rebase_candidates {
                    out.push_str(&format!("    {} target-side change {path} = {value}\n", icons.update));
                }
                for (path, conflict) in &comparison.conflicts {
                    out.push_str(&format!(
                        "    {} conflict {path}: source {} / target {}\n",
                        icons.cross, conflict.source, conflict.target
                    ));
                }
                for warning in &comparison.warnings {
                    out.push_str(&format!("    {} {warning}\n", icons.warn));
                }
            }
        }
        out
    }

    fn render_result(&self, result: &ReleaseResult) -> String {
        let icons = self.icons();
        let mut out = format!("{} Release complete\n\n", icons.check);
        out.push_str(&format!(
            "  {} created, {} updated, {} unchanged\n",
            result.created.len(),
            result.updated.len(),
            result.unchanged.len()
        ));
        for (object, id) in &result.created {
            out.push_str(&format!("    {} {object} -> {id}\n", icons.create));
        }
        if self.verbose > 0 {
            for (object, id) in &result.updated {
                out.push_str(&format!("    {} {object} -> {id}\n", icons.update));
            }
        }
        out
    }

    fn render_revert(&self, result: &RevertResult) -> String {
        let icons = self.icons();
        let mut out = format!(
            "{} Revert complete: {} deleted, {} state entries purged\n",
            icons.check,
            result.deleted.len(),
            result.purged
        );
        for (object, id) in &result.deleted {
            out.push_str(&format!("    {} {object} ({id})\n", icons.trash));
        }
        out
    }
}

/// JSON renderer
pub struct JsonRenderer;

fn refs(items: &[(ObjectRef, ObjectId)]) -> Vec<serde_json::Value> {
    items
        .iter()
        .map(|(object, id)| {
            json!({
                "type": object.resource_type.plural(),
                "id": object.id,
                "name": object.name,
                "target_id": id,
            })
        })
        .collect()
}

impl ReleaseRenderer for JsonRenderer {
    fn render_plan(&self, plan: &ReleasePlan) -> String {
        let entries: Vec<_> = plan
            .entries
            .iter()
            .map(|entry| {
                let comparison = entry.comparison.as_ref().map(|c| {
                    json!({
                        "rebase_candidates": c.rebase_candidates,
                        "conflicts": c.conflicts.iter().map(|(path, conflict)| {
                            (path.clone(), json!({"source": conflict.source, "target": conflict.target}))
                        }).collect::<serde_json::Map<_, _>>(),
                        "warnings": c.warnings,
                    })
                });
                json!({
                    "type": entry.object.resource_type.plural(),
                    "id": entry.object.id,
                    "name": entry.object.name,
                    "target_index": entry.target_index,
                    "target_id": entry.target_id,
                    "action": entry.action.to_string(),
                    "additions": entry.diff.additions,
                    "deletions": entry.diff.deletions,
                    "diff": entry.diff.unified,
                    "warnings": entry.warnings,
                    "comparison": comparison,
                })
            })
            .collect();
        let json = json!({
            "create": plan.count(PlanAction::Create),
            "update": plan.count(PlanAction::Update),
            "unchanged": plan.count(PlanAction::Unchanged),
            "has_conflicts": plan.has_conflicts(),
            "entries": entries,
        });
        serde_json::to_string_pretty(&json).unwrap_or_default()
    }

    fn render_result(&self, result: &ReleaseResult) -> String {
        let json = json!({
            "success": true,
            "created": refs(&result.created),
            "updated": refs(&result.updated),
            "unchanged": refs(&result.unchanged),
            "state_entries": result.state_entries,
            "manifest_ids_changed": result.manifest_ids_changed,
        });
        serde_json::to_string_pretty(&json).unwrap_or_default()
    }

    fn render_revert(&self, result: &RevertResult) -> String {
        let json = json!({
            "success": true,
            "deleted": refs(&result.deleted),
            "purged": result.purged,
        });
        serde_json::to_string_pretty(&json).unwrap_or_default()
    }
}

/// Create a renderer based on format
pub fn create_renderer(format: OutputFormat, unicode: bool, verbose: u8) -> Box<dyn ReleaseRenderer> {
    match format {
        OutputFormat::Text => Box::new(TextRenderer { unicode, verbose }),
        OutputFormat::Json => Box::new(JsonRenderer),
    }
}
