use std::collections::HashMap;

use crate::error::EngineError;

/// Renders `{{dotted.path}}` placeholders against a flat variable map.
///
/// This is deliberately not a templating language: no conditionals, no
/// loops, no code execution. A placeholder that isn't present in `vars`
/// is a validation error rather than a silently empty substitution, so a
/// typo'd variable name in a trigger action or oracle source config fails
/// fast instead of shipping a broken URL or body.
pub fn render(template: &str, vars: &HashMap<String, String>) -> Result<String, EngineError> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after_open = &rest[start + 2..];
        let end = after_open.find("}}").ok_or_else(|| {
            EngineError::Validation(format!("unterminated template placeholder in `{template}`"))
        })?;
        let key = after_open[..end].trim();
        let value = vars.get(key).ok_or_else(|| {
            EngineError::Validation(format!("unresolved template variable `{key}`"))
        })?;
        out.push_str(value);
        rest = &after_open[end + 2..];
    }
    out.push_str(rest);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn substitutes_known_variables() {
        let rendered = render(
            "https://api.example.com/price/{{symbol}}",
            &vars(&[("symbol", "NEO")]),
        )
        .unwrap();
        assert_eq!(rendered, "https://api.example.com/price/NEO");
    }

    #[test]
    fn rejects_unresolved_variable() {
        let err = render("{{missing}}", &vars(&[])).unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
    }

    #[test]
    fn rejects_unterminated_placeholder() {
        let err = render("{{oops", &vars(&[])).unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
    }

    #[test]
    fn passes_through_plain_text() {
        let rendered = render("no placeholders here", &vars(&[])).unwrap();
        assert_eq!(rendered, "no placeholders here");
    }
}
