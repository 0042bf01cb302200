//! Retry-pattern parsing and matching (§3 "RetryPolicy", §4.E).

use plexus_types::{EngineError, SchemaStage};

/// A single parsed retry rule.
#[derive(Debug, Clone, PartialEq, Eq)]
enum RetryRule {
    /// `ToolCallError` or `ToolCallError:NNN` or `ToolCallError:Nxx`.
    ToolCall { code: Option<u16>, family: Option<u16> },
    /// `SchemaError` or `SchemaError:PRE` or `SchemaError:POST`.
    Schema { stage: Option<SchemaStage> },
    /// Bare `EngineError`.
    Engine,
}

impl RetryRule {
    fn matches(&self, err: &EngineError) -> bool {
        match (self, err) {
            (RetryRule::ToolCall { code, family }, EngineError::ToolCall { status, .. }) => {
                if let Some(code) = code {
                    return *status == Some(*code);
                }
                if let Some(family) = family {
                    return status.map(|s| (s / 100) * 100 == *family).unwrap_or(false);
                }
                true
            }
            (RetryRule::Schema { stage }, EngineError::Schema { stage: actual, .. }) => match stage {
                Some(expected) => expected == actual,
                None => true,
            },
            (RetryRule::Engine, EngineError::Engine(_)) => true,
            _ => false,
        }
    }
}

fn parse(pattern: &str) -> Result<RetryRule, String> {
    let (class, spec) = match pattern.split_once(':') {
        Some((class, spec)) => (class, Some(spec)),
        None => (pattern, None),
    };

    match class {
        "ToolCallError" => match spec {
            None => Ok(RetryRule::ToolCall { code: None, family: None }),
            Some(spec) if spec.len() == 3 && spec.ends_with("xx") => {
                let digit: u16 = spec[..1]
                    .parse()
                    .map_err(|_| format!("invalid family spec in retry pattern {pattern:?}"))?;
                Ok(RetryRule::ToolCall { code: None, family: Some(digit * 100) })
            }
            Some(spec) => {
                let code: u16 = spec
                    .parse()
                    .map_err(|_| format!("invalid status code in retry pattern {pattern:?}"))?;
                Ok(RetryRule::ToolCall { code: Some(code), family: None })
            }
        },
        "SchemaError" => match spec {
            None => Ok(RetryRule::Schema { stage: None }),
            Some("PRE") => Ok(RetryRule::Schema { stage: Some(SchemaStage::Pre) }),
            Some("POST") => Ok(RetryRule::Schema { stage: Some(SchemaStage::Post) }),
            Some(other) => Err(format!("unknown schema stage {other:?} in retry pattern {pattern:?}")),
        },
        "EngineError" => Ok(RetryRule::Engine),
        other => Err(format!("unknown retry class {other:?}")),
    }
}

/// Parses a node or execution-default `retry_on` list and decides whether a
/// given failure should be retried.
///
/// Construction fails (a `PlanSchemaError` one layer up, in `plexus-plan`)
/// when any pattern names an unknown class or a malformed spec.
#[derive(Debug, Clone)]
pub struct RetryMatcher {
    rules: Vec<RetryRule>,
}

impl RetryMatcher {
    /// Parse every pattern in `patterns`, short-circuiting on the first
    /// invalid one.
    pub fn new<S: AsRef<str>>(patterns: &[S]) -> Result<Self, String> {
        let rules = patterns.iter().map(|p| parse(p.as_ref())).collect::<Result<Vec<_>, _>>()?;
        Ok(RetryMatcher { rules })
    }

    /// Whether `err` matches any rule (first match wins, order irrelevant to
    /// the result since matching is a pure predicate).
    pub fn matches(&self, err: &EngineError) -> bool {
        self.rules.iter().any(|r| r.matches(err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_class_is_rejected() {
        assert!(RetryMatcher::new(&["BogusError"]).is_err());
    }

    #[test]
    fn bare_tool_call_error_matches_any_status() {
        let m = RetryMatcher::new(&["ToolCallError"]).unwrap();
        assert!(m.matches(&EngineError::tool_call_status(500, "x")));
        assert!(m.matches(&EngineError::tool_call_network("x")));
    }

    #[test]
    fn exact_status_match() {
        let m = RetryMatcher::new(&["ToolCallError:503"]).unwrap();
        assert!(m.matches(&EngineError::tool_call_status(503, "x")));
        assert!(!m.matches(&EngineError::tool_call_status(500, "x")));
    }

    #[test]
    fn status_family_match() {
        let m = RetryMatcher::new(&["ToolCallError:5xx"]).unwrap();
        assert!(m.matches(&EngineError::tool_call_status(500, "x")));
        assert!(m.matches(&EngineError::tool_call_status(599, "x")));
        assert!(!m.matches(&EngineError::tool_call_status(404, "x")));
        assert!(!m.matches(&EngineError::tool_call_network("x")));
    }

    #[test]
    fn schema_stage_match() {
        let m = RetryMatcher::new(&["SchemaError:PRE"]).unwrap();
        assert!(m.matches(&EngineError::schema_pre("x")));
        assert!(!m.matches(&EngineError::schema_post("x")));
    }

    #[test]
    fn bare_schema_error_matches_either_stage() {
        let m = RetryMatcher::new(&["SchemaError"]).unwrap();
        assert!(m.matches(&EngineError::schema_pre("x")));
        assert!(m.matches(&EngineError::schema_post("x")));
    }

    #[test]
    fn bare_engine_error_matches_only_engine_variant() {
        let m = RetryMatcher::new(&["EngineError"]).unwrap();
        assert!(m.matches(&EngineError::Engine("x".into())));
        assert!(!m.matches(&EngineError::Budget("x".into())));
    }

    #[test]
    fn non_matching_variant_never_matches() {
        let m = RetryMatcher::new(&["ToolCallError:5xx"]).unwrap();
        assert!(!m.matches(&EngineError::schema_pre("x")));
        assert!(!m.matches(&EngineError::PlanSchema("x".into())));
    }
}
