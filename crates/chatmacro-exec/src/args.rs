//! Argument binding: placeholder counting, shell-style argument splitting
//! and line rendering.
//!
//! Placeholders follow positional format syntax: `{0}`, `{1}`, … with
//! `{{`/`}}` as escaped braces. `{n:relay}` renders argument `n` in relay
//! form (one leading `/` stripped, `<`/`>` turned into `[`/`]`).

use chatmacro_core::error::{MacroError, Result};

/// Custom format specifier selecting relay rendering for one placeholder.
pub const RELAY_SPEC: &str = "relay";

/// Outbound formatting convention for a whole execution.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MessageFormat {
    /// Arguments are substituted verbatim.
    #[default]
    Plain,
    /// Every argument is rendered in relay form.
    Relay,
}

/// Decides whether a macro can run with a given argument string.
#[derive(Debug, Clone)]
pub struct ArgumentBinder {
    required: usize,
    args: Vec<String>,
}

impl ArgumentBinder {
    pub fn new(content: &str, arg_string: &str) -> Self {
        Self {
            required: count_placeholders(content),
            args: split_args(arg_string),
        }
    }

    /// Bind arguments that were already split (e.g. by a shell or CLI parser).
    pub fn from_args(content: &str, args: Vec<String>) -> Self {
        Self {
            required: count_placeholders(content),
            args,
        }
    }

    pub fn is_executable(&self) -> bool {
        self.required == self.args.len()
    }

    /// Arguments the content needs.
    pub fn required_count(&self) -> usize {
        self.required
    }

    pub fn given_count(&self) -> usize {
        self.args.len()
    }

    /// Arguments still missing (0 when enough or too many were given).
    pub fn missing_count(&self) -> usize {
        self.required.saturating_sub(self.args.len())
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// Typed validation result; consumes the binder into its arguments.
    pub fn into_args(self) -> Result<Vec<String>> {
        if self.is_executable() {
            Ok(self.args)
        } else {
            Err(MacroError::ArgumentCount {
                required: self.required,
                given: self.args.len(),
            })
        }
    }
}

/// One parsed piece of a format string.
enum Segment<'a> {
    Literal(char),
    Placeholder { index: usize, spec: &'a str },
}

/// Walk `line`, yielding literals and placeholders. `None` when malformed.
fn parse(line: &str) -> Option<Vec<Segment<'_>>> {
    let mut segments = Vec::new();
    let mut chars = line.char_indices().peekable();
    while let Some((i, c)) = chars.next() {
        match c {
            '{' if matches!(chars.peek(), Some((_, '{'))) => {
                chars.next();
                segments.push(Segment::Literal('{'));
            }
            '{' => {
                let close = line[i..].find('}')? + i;
                let inner = &line[i + 1..close];
                let (head, spec) = inner.split_once(':').unwrap_or((inner, ""));
                let index_part = head.split(',').next().unwrap_or("").trim();
                let index: usize = index_part.parse().ok()?;
                segments.push(Segment::Placeholder { index, spec: spec.trim() });
                while let Some((j, _)) = chars.peek() {
                    if *j > close {
                        break;
                    }
                    chars.next();
                }
            }
            '}' if matches!(chars.peek(), Some((_, '}'))) => {
                chars.next();
                segments.push(Segment::Literal('}'));
            }
            '}' => return None,
            other => segments.push(Segment::Literal(other)),
        }
    }
    Some(segments)
}

/// Arguments needed by `content`: highest unescaped placeholder index + 1.
///
/// Malformed lines contribute nothing; they are sent literally.
pub fn count_placeholders(content: &str) -> usize {
    content
        .lines()
        .filter_map(parse)
        .flatten()
        .filter_map(|s| match s {
            Segment::Placeholder { index, .. } => Some(index + 1),
            Segment::Literal(_) => None,
        })
        .max()
        .unwrap_or(0)
}

/// Shell-style split: whitespace separates, `"` groups, `\` escapes the next
/// character, and `""` inside a quoted range is a literal quote.
pub fn split_args(input: &str) -> Vec<String> {
    let mut args = Vec::new();
    let mut current = String::new();
    let mut in_token = false;
    let mut quoted = false;
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                current.push(chars.next().unwrap_or('\\'));
                in_token = true;
            }
            '"' if quoted && chars.peek() == Some(&'"') => {
                chars.next();
                current.push('"');
            }
            '"' => {
                quoted = !quoted;
                in_token = true;
            }
            c if c.is_whitespace() && !quoted => {
                if in_token {
                    args.push(std::mem::take(&mut current));
                    in_token = false;
                }
            }
            c => {
                current.push(c);
                in_token = true;
            }
        }
    }
    if in_token {
        args.push(current);
    }
    args
}

/// Relay form: strip one leading `/`, `<` → `[`, `>` → `]`.
pub fn relay(value: &str) -> String {
    value
        .strip_prefix('/')
        .unwrap_or(value)
        .chars()
        .map(|c| match c {
            '<' => '[',
            '>' => ']',
            other => other,
        })
        .collect()
}

/// Render one line with positional arguments.
///
/// Malformed lines, or lines referencing missing arguments, come back unchanged.
pub fn render(line: &str, args: &[String], format: MessageFormat) -> String {
    let Some(segments) = parse(line) else {
        return line.to_string();
    };
    let mut out = String::with_capacity(line.len());
    for segment in segments {
        match segment {
            Segment::Literal(c) => out.push(c),
            Segment::Placeholder { index, spec } => {
                let Some(arg) = args.get(index) else {
                    return line.to_string();
                };
                if spec.eq_ignore_ascii_case(RELAY_SPEC) || format == MessageFormat::Relay {
                    out.push_str(&relay(arg));
                } else {
                    out.push_str(arg);
                }
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_count_ignores_escaped() {
        assert_eq!(count_placeholders("/say hi"), 0);
        assert_eq!(count_placeholders("/say {0}"), 1);
        assert_eq!(count_placeholders("/say {{0}}"), 0);
        assert_eq!(count_placeholders("/say {0} {0}\n/tell {1:relay}"), 2);
        assert_eq!(count_placeholders("/say {{0}} {0}"), 1);
    }

    #[test]
    fn test_split_args() {
        assert_eq!(split_args("world"), strings(&["world"]));
        assert_eq!(split_args("  a   b  "), strings(&["a", "b"]));
        assert_eq!(split_args(r#""hello world" x"#), strings(&["hello world", "x"]));
        assert_eq!(split_args(r#"a\ b c"#), strings(&["a b", "c"]));
        assert_eq!(split_args(r#""say ""hi""""#), strings(&[r#"say "hi""#]));
        assert_eq!(split_args(r#"a "" b"#), strings(&["a", "", "b"]));
        assert!(split_args("   ").is_empty());
    }

    #[test]
    fn test_binder_executable() {
        let binder = ArgumentBinder::new("/say {0}", "world");
        assert!(binder.is_executable());
        assert_eq!(render("/say {0}", binder.args(), MessageFormat::Plain), "/say world");

        let short = ArgumentBinder::new("/tell {0} {1}", "bob");
        assert!(!short.is_executable());
        assert_eq!(short.required_count(), 2);
        assert_eq!(short.missing_count(), 1);
        assert!(matches!(
            short.into_args(),
            Err(MacroError::ArgumentCount { required: 2, given: 1 })
        ));

        assert!(ArgumentBinder::new("/say {{0}}", "").is_executable());
    }

    #[test]
    fn test_pre_split_args_keep_spaces() {
        let binder = ArgumentBinder::from_args("/tell {0} {1}", strings(&["bob", "good luck"]));
        assert!(binder.is_executable());
        assert_eq!(render("/tell {0} {1}", binder.args(), MessageFormat::Plain), "/tell bob good luck");
        assert!(!ArgumentBinder::new("/tell {0} {1}", "bob good luck").is_executable());
    }

    #[test]
    fn test_render_escapes_and_relay() {
        let args = strings(&["/p <pull>"]);
        assert_eq!(render("{{0}} {0}", &args, MessageFormat::Plain), "{0} /p <pull>");
        assert_eq!(render("/e {0:relay}", &args, MessageFormat::Plain), "/e p [pull]");
        assert_eq!(render("/e {0}", &args, MessageFormat::Relay), "/e p [pull]");
    }

    #[test]
    fn test_malformed_degrades_to_literal() {
        let args = strings(&["x"]);
        assert_eq!(render("/say {oops}", &args, MessageFormat::Plain), "/say {oops}");
        assert_eq!(render("/say {0", &args, MessageFormat::Plain), "/say {0");
        assert_eq!(render("/say }", &args, MessageFormat::Plain), "/say }");
        assert_eq!(render("/say {3}", &args, MessageFormat::Plain), "/say {3}");
    }

    #[test]
    fn test_relay_strips_single_slash() {
        assert_eq!(relay("//x"), "/x");
        assert_eq!(relay("no slash"), "no slash");
    }
}
