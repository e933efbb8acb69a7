//! System-prompt composer: pure `(template, variables) -> String`,
//! deterministic on its inputs.

use std::collections::HashMap;
use std::path::PathBuf;

/// Environment variable overriding the prompt template directory.
pub const PROMPTS_DIR_ENV: &str = "LLXPRT_PROMPTS_DIR";

/// Resolves the prompt template directory: `LLXPRT_PROMPTS_DIR` if set,
/// otherwise `~/.llxprt/prompts`.
pub fn prompts_dir() -> PathBuf {
    if let Ok(dir) = std::env::var(PROMPTS_DIR_ENV) {
        return PathBuf::from(dir);
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".llxprt")
        .join("prompts")
}

/// Loads the named template file (without extension handling — callers pass
/// the full file name) from the resolved prompts directory.
pub fn load_template(name: &str) -> std::io::Result<String> {
    std::fs::read_to_string(prompts_dir().join(name))
}

/// Substitutes `{{VARIABLE}}` tokens in `template` from `variables`.
///
/// - An unmatched variable resolves to an empty string.
/// - A `{{` that contains a nested `{{` before its closing `}}` is left
///   untouched (emitted literally) — scanning resumes right after the
///   opening brace pair rather than skipping the whole span.
/// - An opening `{{` with no matching `}}` anywhere after it is emitted
///   as-is and scanning resumes right after it.
pub fn substitute_variables(template: &str, variables: &HashMap<String, String>) -> String {
    let mut output = String::with_capacity(template.len());
    let bytes = template.as_bytes();
    let len = bytes.len();
    let mut i = 0;

    while i < len {
        if template[i..].starts_with("{{") {
            let search_start = i + 2;
            let next_open = template[search_start..].find("{{").map(|p| p + search_start);
            let next_close = template[search_start..].find("}}").map(|p| p + search_start);

            match (next_open, next_close) {
                (Some(open), Some(close)) if open < close => {
                    // Nested opener before any closer: literal, resume after this opener.
                    output.push_str("{{");
                    i = search_start;
                }
                (_, Some(close)) => {
                    let var_name = template[search_start..close].trim();
                    if let Some(value) = variables.get(var_name) {
                        output.push_str(value);
                    }
                    i = close + 2;
                }
                (_, None) => {
                    // Unbalanced: no closing brace anywhere.
                    output.push_str("{{");
                    i = search_start;
                }
            }
        } else {
            let ch = template[i..].chars().next().unwrap();
            output.push(ch);
            i += ch.len_utf8();
        }
    }

    output
}

/// Builds the variable map conventionally available to every template.
pub fn default_variables(model: &str, provider: &str) -> HashMap<String, String> {
    let mut vars = HashMap::new();
    vars.insert("MODEL".to_string(), model.to_string());
    vars.insert("PROVIDER".to_string(), provider.to_string());
    vars
}

/// Composes the final system prompt: substitutes variables into the
/// template, then appends user memory (if any) after a `---` separator.
pub fn compose_prompt(
    template: &str,
    variables: &HashMap<String, String>,
    user_memory: Option<&str>,
) -> String {
    let body = substitute_variables(template, variables);
    match user_memory {
        Some(memory) if !memory.is_empty() => format!("{body}\n---\n{memory}"),
        _ => body,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn substitutes_known_variable() {
        let mut vars = HashMap::new();
        vars.insert("MODEL".to_string(), "gpt-4o".to_string());
        let result = substitute_variables("model: {{MODEL}}", &vars);
        assert_eq!(result, "model: gpt-4o");
    }

    #[test]
    fn unmatched_variable_becomes_empty() {
        let vars = HashMap::new();
        let result = substitute_variables("hello {{MISSING}}!", &vars);
        assert_eq!(result, "hello !");
    }

    #[test]
    fn nested_braces_kept_literal() {
        let mut vars = HashMap::new();
        vars.insert("INNER".to_string(), "X".to_string());
        let result = substitute_variables("{{ {{INNER}} }}", &vars);
        assert_eq!(result, "{{ X }}");
    }

    #[test]
    fn unbalanced_opener_emitted_as_is() {
        let vars = HashMap::new();
        let result = substitute_variables("oops {{ unterminated", &vars);
        assert_eq!(result, "oops {{ unterminated");
    }

    #[test]
    fn compose_appends_memory_after_separator() {
        let vars = default_variables("gpt-4o", "openai");
        let result = compose_prompt("You are using {{MODEL}}.", &vars, Some("remember this"));
        assert_eq!(result, "You are using gpt-4o.\n---\nremember this");
    }

    #[test]
    fn compose_without_memory_has_no_separator() {
        let vars = default_variables("gpt-4o", "openai");
        let result = compose_prompt("You are using {{MODEL}}.", &vars, None);
        assert_eq!(result, "You are using gpt-4o.");
    }

    #[test]
    fn deterministic_on_same_inputs() {
        let vars = default_variables("m", "p");
        let a = compose_prompt("{{MODEL}}-{{PROVIDER}}", &vars, Some("mem"));
        let b = compose_prompt("{{MODEL}}-{{PROVIDER}}", &vars, Some("mem"));
        assert_eq!(a, b);
    }
}
