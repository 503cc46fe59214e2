//! The metadata-driven form engine.
//!
//! `render_plan` is a pure function from `(meta, document)` to a
//! [`RenderPlan`]: one entry per field carrying visibility, read-only and
//! required state plus the widget to draw. It is recomputed once per
//! document-state change; nothing here performs IO or mutates the document.

use serde::Serialize;

use crate::condition::{eval_condition, mentions_roles};
use crate::types::{DocField, DocTypeMeta, Document, FieldType, FieldValue};

/// The input control (or layout element) selected for a field.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WidgetKind {
    /// Plain text control. Link fields carry a placeholder naming the
    /// target schema; no autocomplete or lookup is performed.
    Text {
        #[serde(skip_serializing_if = "Option::is_none")]
        placeholder: Option<String>,
    },
    /// Choice control; the first entry is always the empty "unselected"
    /// placeholder. Values are the raw option strings.
    Select { options: Vec<String> },
    /// Boolean control; the underlying stored value is exactly 0 or 1.
    Checkbox,
    /// Numeric text control; values marshal as raw strings with no
    /// client-side coercion or range checks.
    Numeric,
    /// Date text control; ISO date strings pass through unchanged.
    Date,
    /// Non-input divider carrying the field's label as a heading.
    SectionHeading,
}

impl WidgetKind {
    /// Whether this widget accepts a value. Section headings are visual
    /// only.
    pub fn is_input(&self) -> bool {
        !matches!(self, WidgetKind::SectionHeading)
    }
}

/// Computed render state for one field.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldPlan {
    pub fieldname: String,
    pub label: String,
    pub visible: bool,
    pub read_only: bool,
    /// Advisory only: no client-side submit blocking. The remote save is
    /// the authority on rejecting invalid documents.
    pub required: bool,
    /// `None` for fields with no output at all (column breaks).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub widget: Option<WidgetKind>,
}

/// The full plan for one document render.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RenderPlan {
    /// Schema identifier the plan was computed from.
    pub schema: String,
    pub fields: Vec<FieldPlan>,
}

impl RenderPlan {
    /// Fields that would currently draw an input control.
    pub fn visible_inputs(&self) -> impl Iterator<Item = &FieldPlan> {
        self.fields.iter().filter(|f| {
            f.visible && f.widget.as_ref().is_some_and(WidgetKind::is_input)
        })
    }
}

/// Compute the render plan for a document under its metadata.
pub fn render_plan(meta: &DocTypeMeta, doc: &Document) -> RenderPlan {
    RenderPlan {
        schema: meta.name.clone(),
        fields: meta.fields.iter().map(|f| plan_field(f, doc)).collect(),
    }
}

fn plan_field(field: &DocField, doc: &Document) -> FieldPlan {
    FieldPlan {
        fieldname: field.fieldname.clone(),
        label: field.label.clone(),
        visible: is_visible(field, doc),
        read_only: is_read_only(field, doc),
        required: is_required(field, doc),
        widget: select_widget(field),
    }
}

/// The `hidden` flag forces invisible; otherwise `depends_on` decides,
/// defaulting to visible.
fn is_visible(field: &DocField, doc: &Document) -> bool {
    if field.hidden {
        return false;
    }
    match &field.depends_on {
        Some(cond) => eval_condition(cond, doc, true),
        None => true,
    }
}

/// The `read_only` flag forces read-only; otherwise `read_only_depends_on`
/// decides, defaulting to editable. Role-referencing conditions always
/// resolve to editable.
fn is_read_only(field: &DocField, doc: &Document) -> bool {
    if field.read_only {
        return true;
    }
    match &field.read_only_depends_on {
        Some(cond) if mentions_roles(cond) => false,
        Some(cond) => eval_condition(cond, doc, false),
        None => false,
    }
}

fn is_required(field: &DocField, doc: &Document) -> bool {
    if field.required {
        return true;
    }
    match &field.mandatory_depends_on {
        Some(cond) => eval_condition(cond, doc, false),
        None => false,
    }
}

fn select_widget(field: &DocField) -> Option<WidgetKind> {
    match field.fieldtype {
        FieldType::Select => Some(WidgetKind::Select {
            options: select_options(field.options.as_deref()),
        }),
        FieldType::Check => Some(WidgetKind::Checkbox),
        FieldType::Int | FieldType::Float | FieldType::Currency => Some(WidgetKind::Numeric),
        FieldType::Date => Some(WidgetKind::Date),
        FieldType::SectionBreak => Some(WidgetKind::SectionHeading),
        // Layout columns are deferred; the contract is a flat single column.
        FieldType::ColumnBreak => None,
        FieldType::Link => Some(WidgetKind::Text {
            placeholder: field
                .options
                .as_deref()
                .map(|target| format!("Select {}...", target)),
        }),
        FieldType::Data
        | FieldType::Text
        | FieldType::SmallText
        | FieldType::ReadOnly
        | FieldType::Other => Some(WidgetKind::Text { placeholder: None }),
    }
}

/// Parse a Select field's newline-delimited options, with the empty
/// "unselected" entry always leading.
fn select_options(options: Option<&str>) -> Vec<String> {
    let mut parsed = vec![String::new()];
    if let Some(raw) = options {
        parsed.extend(
            raw.split('\n')
                .filter(|o| !o.is_empty())
                .map(String::from),
        );
    }
    parsed
}

/// Toggle helper for Check fields; the only values it produces are 0 and 1.
pub fn check_value(on: bool) -> FieldValue {
    FieldValue::check(on)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn meta(fields: serde_json::Value) -> DocTypeMeta {
        serde_json::from_value(json!({ "name": "Project Info", "fields": fields })).unwrap()
    }

    fn doc(entries: &[(&str, FieldValue)]) -> Document {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn widget_per_fieldtype() {
        let meta = meta(json!([
            { "fieldname": "status", "fieldtype": "Select", "options": "Proposed\nActive" },
            { "fieldname": "done", "fieldtype": "Check" },
            { "fieldname": "credits", "fieldtype": "Int" },
            { "fieldname": "rate", "fieldtype": "Currency" },
            { "fieldname": "start", "fieldtype": "Date" },
            { "fieldname": "sec", "fieldtype": "Section Break", "label": "Details" },
            { "fieldname": "col", "fieldtype": "Column Break" },
            { "fieldname": "dev", "fieldtype": "Link", "options": "Developer" },
            { "fieldname": "notes", "fieldtype": "Small Text" }
        ]));
        let plan = render_plan(&meta, &Document::new());

        assert_eq!(
            plan.fields[0].widget,
            Some(WidgetKind::Select {
                options: vec!["".into(), "Proposed".into(), "Active".into()]
            })
        );
        assert_eq!(plan.fields[1].widget, Some(WidgetKind::Checkbox));
        assert_eq!(plan.fields[2].widget, Some(WidgetKind::Numeric));
        assert_eq!(plan.fields[3].widget, Some(WidgetKind::Numeric));
        assert_eq!(plan.fields[4].widget, Some(WidgetKind::Date));
        assert_eq!(plan.fields[5].widget, Some(WidgetKind::SectionHeading));
        assert_eq!(plan.fields[6].widget, None);
        assert_eq!(
            plan.fields[7].widget,
            Some(WidgetKind::Text {
                placeholder: Some("Select Developer...".into())
            })
        );
        assert_eq!(
            plan.fields[8].widget,
            Some(WidgetKind::Text { placeholder: None })
        );
    }

    #[test]
    fn unknown_fieldtype_renders_as_text() {
        let meta = meta(json!([
            { "fieldname": "geo", "fieldtype": "Geolocation" }
        ]));
        let plan = render_plan(&meta, &Document::new());
        assert_eq!(
            plan.fields[0].widget,
            Some(WidgetKind::Text { placeholder: None })
        );
    }

    #[test]
    fn visible_input_count_excludes_layout_and_hidden() {
        let meta = meta(json!([
            { "fieldname": "a", "fieldtype": "Data" },
            { "fieldname": "sec", "fieldtype": "Section Break" },
            { "fieldname": "col", "fieldtype": "Column Break" },
            { "fieldname": "b", "fieldtype": "Data", "hidden": 1 },
            { "fieldname": "c", "fieldtype": "Data", "depends_on": "eval:doc.a=='yes'" }
        ]));

        let plan = render_plan(&meta, &doc(&[("a", "no".into())]));
        assert_eq!(plan.visible_inputs().count(), 1);

        let plan = render_plan(&meta, &doc(&[("a", "yes".into())]));
        assert_eq!(plan.visible_inputs().count(), 2);
    }

    #[test]
    fn hidden_flag_beats_depends_on() {
        let meta = meta(json!([
            { "fieldname": "a", "fieldtype": "Data", "hidden": 1, "depends_on": "eval:true" }
        ]));
        let plan = render_plan(&meta, &Document::new());
        assert!(!plan.fields[0].visible);
    }

    #[test]
    fn depends_on_absent_means_visible() {
        let meta = meta(json!([{ "fieldname": "a", "fieldtype": "Data" }]));
        let plan = render_plan(&meta, &Document::new());
        assert!(plan.fields[0].visible);
    }

    #[test]
    fn broken_depends_on_does_not_hide() {
        let meta = meta(json!([
            { "fieldname": "a", "fieldtype": "Data", "depends_on": "eval:doc.missing=='x'" }
        ]));
        let plan = render_plan(&meta, &doc(&[("b", "y".into())]));
        assert!(plan.fields[0].visible);
    }

    #[test]
    fn read_only_flag_and_condition() {
        let meta = meta(json!([
            { "fieldname": "a", "fieldtype": "Data", "read_only": 1 },
            { "fieldname": "b", "fieldtype": "Data",
              "read_only_depends_on": "eval:doc.status=='Submitted'" }
        ]));

        let plan = render_plan(&meta, &doc(&[("status", "Submitted".into())]));
        assert!(plan.fields[0].read_only);
        assert!(plan.fields[1].read_only);

        let plan = render_plan(&meta, &doc(&[("status", "Draft".into())]));
        assert!(plan.fields[0].read_only);
        assert!(!plan.fields[1].read_only);
    }

    #[test]
    fn role_condition_resolves_editable() {
        let meta = meta(json!([
            { "fieldname": "a", "fieldtype": "Data",
              "read_only_depends_on": "eval:!has_common(user_roles, ['Administrator'])" }
        ]));
        let plan = render_plan(&meta, &Document::new());
        assert!(!plan.fields[0].read_only);
    }

    #[test]
    fn mandatory_depends_on() {
        let meta = meta(json!([
            { "fieldname": "reason", "fieldtype": "Data",
              "mandatory_depends_on": "eval:doc.status=='Rejected'" }
        ]));

        let plan = render_plan(&meta, &doc(&[("status", "Rejected".into())]));
        assert!(plan.fields[0].required);

        let plan = render_plan(&meta, &doc(&[("status", "Draft".into())]));
        assert!(!plan.fields[0].required);
    }

    #[test]
    fn section_break_keeps_label_but_is_not_an_input() {
        let meta = meta(json!([
            { "fieldname": "sec", "fieldtype": "Section Break", "label": "Timeline" }
        ]));
        let plan = render_plan(&meta, &Document::new());
        let sec = &plan.fields[0];
        assert!(sec.visible);
        assert_eq!(sec.label, "Timeline");
        assert_eq!(sec.widget, Some(WidgetKind::SectionHeading));
        assert_eq!(plan.visible_inputs().count(), 0);
    }

    #[test]
    fn select_options_always_lead_with_placeholder() {
        assert_eq!(select_options(Some("A\nB")), vec!["", "A", "B"]);
        assert_eq!(select_options(Some("\nA")), vec!["", "A"]);
        assert_eq!(select_options(None), vec![""]);
    }

    #[test]
    fn check_value_domain() {
        assert_eq!(check_value(true), FieldValue::Int(1));
        assert_eq!(check_value(false), FieldValue::Int(0));
    }

    #[test]
    fn plan_is_pure() {
        let meta = meta(json!([
            { "fieldname": "a", "fieldtype": "Data", "depends_on": "eval:doc.b=='x'" }
        ]));
        let d = doc(&[("b", "x".into())]);
        let first = render_plan(&meta, &d);
        let second = render_plan(&meta, &d);
        assert_eq!(first, second);
    }

    #[test]
    fn plan_serializes_for_tooling() {
        let meta = meta(json!([
            { "fieldname": "status", "fieldtype": "Select", "options": "A\nB" }
        ]));
        let plan = render_plan(&meta, &Document::new());
        let out = serde_json::to_value(&plan).unwrap();
        assert_eq!(out["schema"], "Project Info");
        assert_eq!(out["fields"][0]["widget"]["kind"], "select");
        assert_eq!(out["fields"][0]["widget"]["options"][0], "");
    }
}
