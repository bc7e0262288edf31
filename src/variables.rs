use once_cell::sync::Lazy;
use regex::{Captures, Regex};

use crate::flow::session::Variable;

static VARIABLE_REFERENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{\{([^{}]+)\}\}").expect("variable reference pattern"));

/// Replaces every `{{name}}` in `text` with the bound value of `name`.
///
/// Names are matched after trimming. Unknown variables and variables without
/// a value render as the empty string.
pub fn parse_variables(variables: &[Variable], text: &str) -> String {
    VARIABLE_REFERENCE
        .replace_all(text, |caps: &Captures| {
            let name = caps[1].trim();
            variables
                .iter()
                .find(|v| v.name == name)
                .and_then(|v| v.value.as_ref())
                .map(|value| value.to_template_string())
                .unwrap_or_default()
        })
        .into_owned()
}

/// Leading-digits integer parsing: skips leading whitespace, accepts one
/// optional sign, then reads decimal digits up to the first non-digit.
/// `None` when no digit is read or the value does not fit in an `i64`.
pub fn safe_parse_int(value: &str) -> Option<i64> {
    let trimmed = value.trim_start();
    let (negative, rest) = match trimmed.as_bytes().first() {
        Some(b'-') => (true, &trimmed[1..]),
        Some(b'+') => (false, &trimmed[1..]),
        _ => (false, trimmed),
    };

    let digits_len = rest.bytes().take_while(u8::is_ascii_digit).count();
    if digits_len == 0 {
        return None;
    }

    let mut parsed: i64 = 0;
    for digit in rest[..digits_len].bytes() {
        parsed = parsed
            .checked_mul(10)?
            .checked_add(i64::from(digit - b'0'))?;
    }
    Some(if negative { -parsed } else { parsed })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::session::VariableValue;

    fn vars() -> Vec<Variable> {
        vec![
            Variable::new("v1", "count", Some(VariableValue::String("5".into()))),
            Variable::new("v2", "first name", Some(VariableValue::String("Ada".into()))),
            Variable::new("v3", "score", Some(VariableValue::Number(12.0))),
            Variable::new("v4", "unset", None),
        ]
    }

    #[test]
    fn test_substitutes_known_variables() {
        assert_eq!(parse_variables(&vars(), "{{count}}"), "5");
        assert_eq!(parse_variables(&vars(), "Hi {{ first name }}!"), "Hi Ada!");
        assert_eq!(parse_variables(&vars(), "{{score}}s"), "12s");
    }

    #[test]
    fn test_unknown_and_empty_variables_render_empty() {
        assert_eq!(parse_variables(&vars(), "[{{missing}}]"), "[]");
        assert_eq!(parse_variables(&vars(), "[{{unset}}]"), "[]");
    }

    #[test]
    fn test_text_without_references_is_untouched() {
        assert_eq!(parse_variables(&vars(), "plain 10"), "plain 10");
        assert_eq!(parse_variables(&[], "{{count}}"), "");
    }

    #[test]
    fn test_safe_parse_int_leading_digits() {
        assert_eq!(safe_parse_int("5"), Some(5));
        assert_eq!(safe_parse_int("  42  "), Some(42));
        assert_eq!(safe_parse_int("12abc"), Some(12));
        assert_eq!(safe_parse_int("3.9"), Some(3));
        assert_eq!(safe_parse_int("+7"), Some(7));
        assert_eq!(safe_parse_int("-4"), Some(-4));
        assert_eq!(safe_parse_int("0"), Some(0));
    }

    #[test]
    fn test_safe_parse_int_failures() {
        assert_eq!(safe_parse_int("abc"), None);
        assert_eq!(safe_parse_int(""), None);
        assert_eq!(safe_parse_int("   "), None);
        assert_eq!(safe_parse_int("-"), None);
        assert_eq!(safe_parse_int("x12"), None);
        assert_eq!(safe_parse_int("99999999999999999999999"), None);
    }
}
