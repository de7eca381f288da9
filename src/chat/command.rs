//! Usage-string parsing and chat tokenization.

use thiserror::Error;

/// One declared parameter of a chat command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Parameter {
    pub name: String,
    pub required: bool,
    /// Consumes all remaining tokens, joined by single spaces.
    pub rest: bool,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum UsageError {
    #[error("command name is empty")]
    EmptyName,
    #[error("required parameter {0:?} follows an optional one")]
    RequiredAfterOptional(String),
    #[error("rest parameter {0:?} must be last")]
    RestNotLast(String),
    #[error("malformed parameter token: {0:?}")]
    MalformedParameter(String),
}

/// Parsed `"name <required> [optional...]"` usage string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Usage {
    pub name: String,
    pub params: Vec<Parameter>,
}

impl Usage {
    pub fn parse(usage: &str) -> Result<Usage, UsageError> {
        let mut tokens = usage.split(' ').filter(|t| !t.is_empty());
        let name = tokens.next().ok_or(UsageError::EmptyName)?.to_string();
        if name.is_empty() {
            return Err(UsageError::EmptyName);
        }
        if name.starts_with('<') || name.starts_with('[') {
            // A parameter where the name should be means the name
            // contained spaces or was missing.
            return Err(UsageError::EmptyName);
        }

        let mut params: Vec<Parameter> = Vec::new();
        let mut seen_optional = false;
        for token in tokens {
            let (inner, required) = if let Some(inner) =
                token.strip_prefix('<').and_then(|t| t.strip_suffix('>'))
            {
                (inner, true)
            } else if let Some(inner) = token.strip_prefix('[').and_then(|t| t.strip_suffix(']')) {
                (inner, false)
            } else {
                return Err(UsageError::MalformedParameter(token.to_string()));
            };

            let (param_name, rest) = match inner.strip_suffix("...") {
                Some(stripped) => (stripped, true),
                None => (inner, false),
            };
            if param_name.is_empty() {
                return Err(UsageError::MalformedParameter(token.to_string()));
            }

            if let Some(last) = params.last() {
                if last.rest {
                    return Err(UsageError::RestNotLast(last.name.clone()));
                }
            }
            if required && seen_optional {
                return Err(UsageError::RequiredAfterOptional(param_name.to_string()));
            }
            seen_optional |= !required;

            params.push(Parameter {
                name: param_name.to_string(),
                required,
                rest,
            });
        }

        Ok(Usage { name, params })
    }

    /// Renders back to the usage syntax `parse` accepts.
    pub fn render(&self) -> String {
        let mut out = self.name.clone();
        for param in &self.params {
            let ellipsis = if param.rest { "..." } else { "" };
            if param.required {
                out.push_str(&format!(" <{}{}>", param.name, ellipsis));
            } else {
                out.push_str(&format!(" [{}{}]", param.name, ellipsis));
            }
        }
        out
    }
}

/// Splits a chat message into tokens. Single quotes toggle
/// inside-string mode and are stripped; outside a string, a space is
/// the separator. Empty trailing tokens are discarded.
pub fn tokenize(input: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_string = false;
    for c in input.chars() {
        match c {
            '\'' => in_string = !in_string,
            ' ' if !in_string => {
                tokens.push(std::mem::take(&mut current));
            }
            _ => current.push(c),
        }
    }
    tokens.push(current);
    while tokens.last().map(|t| t.is_empty()).unwrap_or(false) {
        tokens.pop();
    }
    tokens
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_required_and_optional() {
        let usage = Usage::parse("kick <name> [reason...]").unwrap();
        assert_eq!(usage.name, "kick");
        assert_eq!(
            usage.params,
            vec![
                Parameter {
                    name: "name".into(),
                    required: true,
                    rest: false,
                },
                Parameter {
                    name: "reason".into(),
                    required: false,
                    rest: true,
                },
            ]
        );
    }

    #[test]
    fn parse_rejects_required_after_optional() {
        assert_eq!(
            Usage::parse("cmd [opt] <req>"),
            Err(UsageError::RequiredAfterOptional("req".into()))
        );
    }

    #[test]
    fn parse_rejects_rest_not_last() {
        assert_eq!(
            Usage::parse("cmd <all...> <more>"),
            Err(UsageError::RestNotLast("all".into()))
        );
    }

    #[test]
    fn parse_rejects_empty_and_malformed() {
        assert_eq!(Usage::parse(""), Err(UsageError::EmptyName));
        assert_eq!(Usage::parse("   "), Err(UsageError::EmptyName));
        assert_eq!(
            Usage::parse("cmd bare"),
            Err(UsageError::MalformedParameter("bare".into()))
        );
        assert_eq!(
            Usage::parse("cmd <>"),
            Err(UsageError::MalformedParameter("<>".into()))
        );
    }

    #[test]
    fn render_roundtrip() {
        for usage in [
            "help [command]",
            "kick <name> [reason...]",
            "say <text...>",
            "ping",
        ] {
            let parsed = Usage::parse(usage).unwrap();
            let rendered = parsed.render();
            let reparsed = Usage::parse(&rendered).unwrap();
            assert_eq!(reparsed.params, parsed.params, "{usage}");
            assert_eq!(rendered, usage);
        }
    }

    #[test]
    fn tokenize_plain() {
        assert_eq!(tokenize("kick bob mean"), vec!["kick", "bob", "mean"]);
    }

    #[test]
    fn tokenize_quoted_strings() {
        assert_eq!(
            tokenize("kick 'big bob' was being mean"),
            vec!["kick", "big bob", "was", "being", "mean"]
        );
    }

    #[test]
    fn tokenize_strips_quotes_and_trailing_empties() {
        assert_eq!(tokenize("say 'hello'  "), vec!["say", "hello"]);
        assert_eq!(tokenize("say hello   "), vec!["say", "hello"]);
        assert_eq!(tokenize(""), Vec::<String>::new());
    }

    #[test]
    fn tokenize_unterminated_quote_runs_to_end() {
        assert_eq!(tokenize("kick 'big bob"), vec!["kick", "big bob"]);
    }
}
