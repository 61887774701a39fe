//! Subscription filter expressions and flow coloring.
//!
//! Flow coloring lets several logical environments share one physical topic.
//! Producers stamp their color in the [`FLOW_COLOR_PROPERTY`] message
//! property and consumers narrow every subscription to their own color with
//! [`FilterExpression::with_flow_color`].

use serde::{Deserialize, Serialize};

/// Message property carrying the flow color
pub const FLOW_COLOR_PROPERTY: &str = "FlowColor";

/// Tag expression matching every message
pub const TAG_ALL: &str = "*";

/// Syntax of a filter expression
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FilterType {
    /// `*`, a single tag, or tags joined with `||`
    Tag,
    /// SQL92 predicate over message properties and `TAGS`
    Sql92,
}

/// Subscription filter for one topic
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FilterExpression {
    pub expression: String,
    pub filter_type: FilterType,
}

impl FilterExpression {
    /// Tag filter
    pub fn tag(expression: impl Into<String>) -> Self {
        Self {
            expression: expression.into(),
            filter_type: FilterType::Tag,
        }
    }

    /// SQL92 filter
    pub fn sql92(expression: impl Into<String>) -> Self {
        Self {
            expression: expression.into(),
            filter_type: FilterType::Sql92,
        }
    }

    /// Subscribe to every message of the topic
    pub fn sub_all() -> Self {
        Self::tag(TAG_ALL)
    }

    /// Tags listed by a tag expression; `None` means all tags
    pub fn tags(&self) -> Option<Vec<&str>> {
        if self.filter_type != FilterType::Tag {
            return None;
        }

        let expression = self.expression.trim();
        if expression.is_empty() || expression == TAG_ALL {
            return None;
        }

        Some(
            expression
                .split("||")
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .collect(),
        )
    }

    /// Rewrite the filter so that it only matches messages of `color`
    ///
    /// The color predicate is `FlowColor='<color>'`, widened to
    /// `(FlowColor='<color>' OR FlowColor='')` on a base environment, and is
    /// joined with the original filter by `AND`. The result is always SQL92.
    pub fn with_flow_color(&self, color: &str, base: bool) -> Self {
        let color = escape_literal(color);
        let color_predicate = if base {
            format!(
                "({prop}='{color}' OR {prop}='')",
                prop = FLOW_COLOR_PROPERTY,
                color = color
            )
        } else {
            format!("{}='{}'", FLOW_COLOR_PROPERTY, color)
        };

        let original = match self.filter_type {
            FilterType::Tag => match self.tags() {
                None => None,
                Some(tags) if tags.len() == 1 => {
                    Some(format!("TAGS='{}'", escape_literal(tags[0])))
                }
                Some(tags) => Some(format!(
                    "({})",
                    tags.iter()
                        .map(|t| format!("TAGS='{}'", escape_literal(t)))
                        .collect::<Vec<_>>()
                        .join(" OR ")
                )),
            },
            FilterType::Sql92 => Some(self.expression.trim().to_string()),
        };

        match original {
            Some(original) if !original.is_empty() => {
                Self::sql92(format!("{} AND {}", color_predicate, original))
            }
            _ => Self::sql92(color_predicate),
        }
    }
}

impl Default for FilterExpression {
    fn default() -> Self {
        Self::sub_all()
    }
}

fn escape_literal(value: &str) -> String {
    value.replace('\'', "''")
}

#[cfg(test)]
#[path = "filter_tests.rs"]
mod tests;
