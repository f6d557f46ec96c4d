//! Client-side macro lookup over an in-memory candidate set.
//!
//! Every whitespace token of the filter must appear (case-insensitive) in at
//! least one of name, path, command or a tag. Matches are ranked by how
//! close the size of their searchable text is to the filter's size.

use chatmacro_core::macros::Macro;

/// Filter and rank `candidates` by `filter`. Pure; returns a fresh list.
///
/// A blank filter returns every candidate in input order.
pub fn lookup<'a, I>(candidates: I, filter: &str) -> Vec<Macro>
where
    I: IntoIterator<Item = &'a Macro>,
{
    let tokens: Vec<String> = filter
        .split_whitespace()
        .map(str::to_lowercase)
        .collect();
    if tokens.is_empty() {
        return candidates.into_iter().cloned().collect();
    }

    let filter_len = filter.chars().count() as f64;
    let mut ranked: Vec<(f64, &Macro)> = candidates
        .into_iter()
        .filter(|m| matches(m, &tokens))
        .map(|m| (searchable_len(m) as f64 / filter_len, m))
        .collect();
    ranked.sort_by(|a, b| a.0.total_cmp(&b.0));
    ranked.into_iter().map(|(_, m)| m.clone()).collect()
}

fn matches(m: &Macro, tokens: &[String]) -> bool {
    let fields = [m.name.to_lowercase(), m.path.to_lowercase(), m.command.to_lowercase()];
    let tags: Vec<String> = m.tags.iter().map(|t| t.to_lowercase()).collect();
    tokens.iter().all(|token| {
        fields.iter().any(|f| f.contains(token.as_str())) || tags.iter().any(|t| t.contains(token.as_str()))
    })
}

fn searchable_len(m: &Macro) -> usize {
    m.name.chars().count()
        + m.path.chars().count()
        + m.command.chars().count()
        + m.tags.iter().map(|t| t.chars().count()).sum::<usize>()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool() -> Vec<Macro> {
        vec![
            Macro::new("raid/countdown/long-version").with_command("cd").with_tags(["pull", "timer"]),
            Macro::new("raid/countdown").with_tags(["pull"]),
            Macro::new("social/greet").with_command("hi").with_tags(["Friendly"]),
        ]
    }

    #[test]
    fn test_all_tokens_must_match() {
        let pool = pool();
        let hits = lookup(&pool, "raid timer");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].path, "raid/countdown/long-version");

        assert!(lookup(&pool, "raid friendly").is_empty());
    }

    #[test]
    fn test_case_insensitive_tag_match() {
        let pool = pool();
        let hits = lookup(&pool, "FRIEND");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].path, "social/greet");
    }

    #[test]
    fn test_shorter_text_ranks_first() {
        let pool = pool();
        let hits = lookup(&pool, "countdown");
        let paths: Vec<&str> = hits.iter().map(|m| m.path.as_str()).collect();
        assert_eq!(paths, vec!["raid/countdown", "raid/countdown/long-version"]);
    }

    #[test]
    fn test_every_result_contains_every_token() {
        let pool = pool();
        for filter in ["ra", "pull cd", "greet hi", "o"] {
            for m in lookup(&pool, filter) {
                let text = format!("{} {} {} {}", m.name, m.path, m.command, m.joined_tags()).to_lowercase();
                for token in filter.split_whitespace() {
                    assert!(text.contains(&token.to_lowercase()), "{filter} -> {}", m.path);
                }
            }
        }
    }

    #[test]
    fn test_blank_filter_returns_everything() {
        let pool = pool();
        assert_eq!(lookup(&pool, "   ").len(), 3);
    }
}
