//! axe-core invocation and result decoding.

use crate::error::{BrowserError, Result};
use clarion_core::{AffectedNode, AuditStandard, AuditViolation, ImpactLevel};
use serde::Deserialize;
use serde_json::Value;

#[derive(Debug, Deserialize)]
struct RawViolation {
    id: String,
    #[serde(default)]
    impact: Option<String>,
    #[serde(default)]
    help: String,
    #[serde(default)]
    nodes: Vec<RawNode>,
}

#[derive(Debug, Deserialize)]
struct RawNode {
    #[serde(default)]
    html: String,
    #[serde(default)]
    target: Vec<Value>,
    #[serde(default, rename = "failureSummary")]
    failure_summary: Option<String>,
}

/// Expression that runs axe against the current document, restricted to the
/// rule tags of `standard`, and resolves to the `violations` array.
pub fn run_expression(standard: &AuditStandard) -> String {
    let tags = Value::from(standard.rule_tags()).to_string();
    format!(
        "axe.run(document, {{ runOnly: {{ type: 'tag', values: {tags} }}, resultTypes: ['violations'] }})\
         .then(results => results.violations)"
    )
}

// Shadow DOM targets arrive as nested selector arrays.
fn flatten_target(target: &[Value]) -> Vec<String> {
    target
        .iter()
        .filter_map(|selector| match selector {
            Value::String(s) => Some(s.clone()),
            Value::Array(parts) => Some(
                parts
                    .iter()
                    .filter_map(Value::as_str)
                    .collect::<Vec<_>>()
                    .join(" >>> "),
            ),
            _ => None,
        })
        .collect()
}

/// Decode axe's `violations` array. A missing or unknown impact counts as minor.
pub fn parse_violations(value: Value) -> Result<Vec<AuditViolation>> {
    let raw: Vec<RawViolation> = serde_json::from_value(value)
        .map_err(|e| BrowserError::Audit(format!("unexpected axe result shape: {e}")))?;

    Ok(raw
        .into_iter()
        .map(|violation| AuditViolation {
            impact: ImpactLevel::parse_lenient(violation.impact.as_deref()),
            rule_id: violation.id,
            help: violation.help,
            nodes: violation
                .nodes
                .into_iter()
                .map(|node| AffectedNode {
                    target: flatten_target(&node.target),
                    html: node.html,
                    summary: node.failure_summary,
                })
                .collect(),
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clarion_core::{ConformanceLevel, WcagVersion};
    use serde_json::json;

    #[test]
    fn test_run_expression_carries_standard_tags() {
        let standard = AuditStandard {
            version: WcagVersion::V2_0,
            level: ConformanceLevel::AA,
        };
        let expr = run_expression(&standard);
        assert!(expr.contains(r#"["wcag2a","wcag2aa"]"#));
        assert!(expr.contains("results.violations"));
    }

    #[test]
    fn test_parse_violations() {
        let value = json!([
            {
                "id": "image-alt",
                "impact": "critical",
                "help": "Images must have alternate text",
                "tags": ["wcag2a"],
                "nodes": [
                    {
                        "html": "<img src=\"logo.png\">",
                        "target": ["header > img"],
                        "failureSummary": "Fix any of the following: Element does not have an alt attribute"
                    },
                    {
                        "html": "<img src=\"x.png\">",
                        "target": [["my-widget", "img"]]
                    }
                ]
            },
            { "id": "landmark-one-main", "impact": null, "help": "Document should have one main landmark", "nodes": [] },
            { "id": "experimental", "impact": "cosmetic", "help": "", "nodes": [] }
        ]);

        let violations = parse_violations(value).unwrap();
        assert_eq!(violations.len(), 3);

        assert_eq!(violations[0].impact, ImpactLevel::Critical);
        assert_eq!(violations[0].rule_id, "image-alt");
        assert_eq!(violations[0].nodes.len(), 2);
        assert_eq!(violations[0].nodes[0].target, vec!["header > img"]);
        assert!(violations[0].nodes[0].summary.is_some());
        assert_eq!(violations[0].nodes[1].target, vec!["my-widget >>> img"]);

        assert_eq!(violations[1].impact, ImpactLevel::Minor);
        assert_eq!(violations[2].impact, ImpactLevel::Minor);
    }

    #[test]
    fn test_parse_violations_rejects_non_array() {
        let result = parse_violations(json!({ "violations": [] }));
        assert!(matches!(result, Err(BrowserError::Audit(_))));
    }
}
