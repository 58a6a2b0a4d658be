//! Cache-key template parsing and rendering.
//!
//! A template is a `|`-separated sequence of segments. Each segment is a
//! literal, an equality substitution `field=%v`, or an inequality
//! predicate `field!=LITERAL`. Equality fields substitute row values into
//! the rendered key; inequality fields only gate whether a row belongs to
//! the query at all.

use serde_json::Value;

use crate::entity::FieldMap;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Segment {
    /// Copied into the key verbatim.
    Literal(String),
    /// `column=%v`: substitutes the row's value for this column.
    Eq { column: String },
    /// `column!=value`: the row is skipped when its value equals `value`.
    Ne { column: String, value: String },
}

/// Parsed cache-key template.
#[derive(Debug, Clone)]
pub(crate) struct KeyTemplate {
    segments: Vec<Segment>,
    has_not_equals: bool,
}

impl KeyTemplate {
    pub(crate) fn parse(raw: &str) -> Result<Self, String> {
        if raw.is_empty() {
            return Err("cache key template must not be empty".to_string());
        }

        let mut segments = Vec::new();
        let mut has_not_equals = false;

        for segment in raw.split('|') {
            if let Some((column, value)) = segment.split_once("!=") {
                if value.contains("%v") {
                    return Err(format!(
                        "segment `{segment}`: `!=` must compare against a literal, not `%v`"
                    ));
                }
                if column.is_empty() || value.is_empty() {
                    return Err(format!("segment `{segment}`: malformed `!=` comparison"));
                }
                if column.contains('=') || value.contains('=') {
                    return Err(format!(
                        "segment `{segment}`: at most one comparison operator per segment"
                    ));
                }
                has_not_equals = true;
                segments.push(Segment::Ne {
                    column: column.to_string(),
                    value: value.to_string(),
                });
            } else if let Some((column, placeholder)) = segment.split_once('=') {
                if placeholder != "%v" {
                    return Err(format!(
                        "segment `{segment}`: `=` must substitute `%v` exactly once"
                    ));
                }
                if column.is_empty() || column.contains('=') {
                    return Err(format!(
                        "segment `{segment}`: at most one comparison operator per segment"
                    ));
                }
                segments.push(Segment::Eq {
                    column: column.to_string(),
                });
            } else {
                if segment.contains("%v") {
                    return Err(format!(
                        "segment `{segment}`: literal segments must not contain `%v`"
                    ));
                }
                segments.push(Segment::Literal(segment.to_string()));
            }
        }

        Ok(Self {
            segments,
            has_not_equals,
        })
    }

    /// Equality columns in declaration order.
    pub(crate) fn eq_columns(&self) -> impl Iterator<Item = &str> {
        self.segments.iter().filter_map(|segment| match segment {
            Segment::Eq { column } => Some(column.as_str()),
            _ => None,
        })
    }

    /// Whether a write on this row affects the query's key.
    ///
    /// A row whose value at any `!=` column equals the template literal
    /// cannot belong to the query's result, so the query is skipped.
    pub(crate) fn matches(&self, map: &FieldMap) -> bool {
        if !self.has_not_equals {
            return true;
        }
        for segment in &self.segments {
            if let Segment::Ne { column, value } = segment {
                if render_value(map.get(column.as_str())) == *value {
                    return false;
                }
            }
        }
        true
    }

    /// Substitute equality values from the row and rebuild the template.
    pub(crate) fn render(&self, map: &FieldMap) -> String {
        let parts: Vec<String> = self
            .segments
            .iter()
            .map(|segment| match segment {
                Segment::Literal(text) => text.clone(),
                Segment::Eq { column } => {
                    format!("{column}={}", render_value(map.get(column.as_str())))
                }
                Segment::Ne { column, value } => format!("{column}!={value}"),
            })
            .collect();
        parts.join("|")
    }
}

/// Render one JSON value into key text. Strings render bare so keys stay
/// readable; everything else uses compact JSON.
pub(crate) fn render_value(value: Option<&Value>) -> String {
    match value {
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
        None => "null".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn map(pairs: &[(&str, Value)]) -> FieldMap {
        let mut m = FieldMap::new();
        for (k, v) in pairs {
            m.insert((*k).to_string(), v.clone());
        }
        m
    }

    #[test]
    fn parses_equality_segment() {
        let template = KeyTemplate::parse("lead_id=%v").expect("parse");
        assert_eq!(template.eq_columns().collect::<Vec<_>>(), vec!["lead_id"]);
        assert_eq!(
            template.render(&map(&[("lead_id", json!(42))])),
            "lead_id=42"
        );
    }

    #[test]
    fn parses_mixed_segments() {
        let template = KeyTemplate::parse("user_id=%v|role!=OWNER|filter:").expect("parse");
        assert_eq!(template.eq_columns().collect::<Vec<_>>(), vec!["user_id"]);
        assert_eq!(
            template.render(&map(&[("user_id", json!(7)), ("role", json!("MEMBER"))])),
            "user_id=7|role!=OWNER|filter:"
        );
    }

    #[test]
    fn rejects_not_equals_placeholder() {
        assert!(KeyTemplate::parse("role!=%v").is_err());
    }

    #[test]
    fn rejects_double_operator_segment() {
        assert!(KeyTemplate::parse("a=b=%v").is_err());
        assert!(KeyTemplate::parse("a!=b=c").is_err());
    }

    #[test]
    fn rejects_equality_without_placeholder() {
        assert!(KeyTemplate::parse("role=OWNER").is_err());
    }

    #[test]
    fn rejects_placeholder_in_literal() {
        assert!(KeyTemplate::parse("prefix:%v").is_err());
    }

    #[test]
    fn not_equals_gates_matching_rows() {
        let template = KeyTemplate::parse("group_id=%v|role!=OWNER").expect("parse");

        let owner = map(&[("group_id", json!(1)), ("role", json!("OWNER"))]);
        let member = map(&[("group_id", json!(1)), ("role", json!("MEMBER"))]);

        assert!(!template.matches(&owner));
        assert!(template.matches(&member));
    }

    #[test]
    fn templates_without_predicates_always_match() {
        let template = KeyTemplate::parse("lead_id=%v").expect("parse");
        assert!(template.matches(&FieldMap::new()));
    }

    #[test]
    fn missing_values_render_as_null() {
        let template = KeyTemplate::parse("lead_id=%v").expect("parse");
        assert_eq!(template.render(&FieldMap::new()), "lead_id=null");
    }

    #[test]
    fn string_values_render_bare() {
        assert_eq!(render_value(Some(&json!("abc"))), "abc");
        assert_eq!(render_value(Some(&json!(1.5))), "1.5");
        assert_eq!(render_value(Some(&json!(true))), "true");
        assert_eq!(render_value(None), "null");
    }
}
