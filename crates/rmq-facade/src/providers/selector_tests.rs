//! Tests for filter evaluation.

use super::*;

fn props(pairs: &[(&str, &str)]) -> HashMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

fn sql(expression: &str) -> Selector {
    Selector::compile(&FilterExpression::sql92(expression)).expect("filter should compile")
}

mod tag_filters {
    use super::*;

    /// Test that subscribe-all matches untagged messages
    #[test]
    fn test_sub_all_matches_untagged_messages() {
        // Act
        let selector = Selector::compile(&FilterExpression::sub_all()).unwrap();

        // Assert
        assert!(selector.matches(None, &HashMap::new()));
        assert!(selector.matches(Some("x"), &HashMap::new()));
    }

    /// Test that tag list matches any listed tag
    #[test]
    fn test_tag_list_matches_any_listed_tag() {
        // Act
        let selector = Selector::compile(&FilterExpression::tag("a||b")).unwrap();

        // Assert
        assert!(selector.matches(Some("a"), &HashMap::new()));
        assert!(selector.matches(Some("b"), &HashMap::new()));
        assert!(!selector.matches(Some("c"), &HashMap::new()));
        assert!(!selector.matches(None, &HashMap::new()));
    }
}

mod sql_filters {
    use super::*;

    /// Test the base-environment flow color filter
    #[test]
    fn test_flow_color_base_filter() {
        // Act
        let selector =
            Selector::compile(&FilterExpression::tag("x").with_flow_color("blue", true)).unwrap();

        // Assert
        assert!(selector.matches(Some("x"), &props(&[("FlowColor", "blue")])));
        assert!(selector.matches(Some("x"), &props(&[("FlowColor", "")])));
        assert!(selector.matches(Some("x"), &HashMap::new()));
        assert!(!selector.matches(Some("x"), &props(&[("FlowColor", "green")])));
        assert!(!selector.matches(Some("y"), &props(&[("FlowColor", "blue")])));
    }

    /// Test the colored-only flow color filter
    #[test]
    fn test_flow_color_non_base_filter() {
        // Act
        let selector =
            Selector::compile(&FilterExpression::sub_all().with_flow_color("blue", false))
                .unwrap();

        // Assert
        assert!(selector.matches(None, &props(&[("FlowColor", "blue")])));
        assert!(!selector.matches(None, &HashMap::new()));
    }

    /// Test that keywords are case insensitive
    #[test]
    fn test_keywords_are_case_insensitive() {
        // Act
        let selector = sql("a = '1' and not (b = '2' or c <> '3')");

        // Assert
        assert!(selector.matches(None, &props(&[("a", "1"), ("b", "0"), ("c", "3")])));
        assert!(!selector.matches(None, &props(&[("a", "1"), ("b", "2"), ("c", "3")])));
    }

    /// Test IS NULL on absent versus empty properties
    #[test]
    fn test_is_null_distinguishes_absent_from_empty() {
        // Act
        let selector = sql("region IS NULL");
        assert!(selector.matches(None, &HashMap::new()));
        assert!(!selector.matches(None, &props(&[("region", "")])));

        // Assert
        let selector = sql("region IS NOT NULL");
        assert!(selector.matches(None, &props(&[("region", "")])));
    }

    /// Test numeric comparison operators
    #[test]
    fn test_numeric_comparisons() {
        // Act
        let selector = sql("amount >= 10 AND amount < 100");

        // Assert
        assert!(selector.matches(None, &props(&[("amount", "10")])));
        assert!(selector.matches(None, &props(&[("amount", "99.5")])));
        assert!(!selector.matches(None, &props(&[("amount", "100")])));
        assert!(!selector.matches(None, &props(&[("amount", "abc")])));
    }

    /// Test doubled quotes inside string literals
    #[test]
    fn test_escaped_quote_in_literal() {
        // Act
        let selector = sql("owner = 'o''neil'");

        // Assert
        assert!(selector.matches(None, &props(&[("owner", "o'neil")])));
    }

    /// Test that malformed expressions are rejected
    #[test]
    fn test_malformed_expressions_are_rejected() {
        for expression in ["a =", "(a = 'b'", "a = 'b", "a ? 'b'", "'x' IS NULL", "a = 'b' c"] {
            let result = Selector::compile(&FilterExpression::sql92(expression));
            assert!(result.is_err(), "expression {:?} should be rejected", expression);
        }
    }
}
