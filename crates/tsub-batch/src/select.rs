//! Selecting cached configs by name, with interactive close-match suggestions.

use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};

use tsub_core::{Error, Result};

/// Minimum similarity for a suggestion.
pub const SUGGESTION_CUTOFF: f64 = 0.6;

/// Maximum number of suggestions offered per name.
pub const MAX_SUGGESTIONS: usize = 3;

/// Yes/no confirmation from the operator.
pub trait Prompt {
    fn confirm(&mut self, question: &str) -> Result<bool>;
}

/// Asks on stderr and reads the answer from stdin; anything but `y` means no.
pub struct StdinPrompt;

impl Prompt for StdinPrompt {
    fn confirm(&mut self, question: &str) -> Result<bool> {
        let mut err = std::io::stderr().lock();
        write!(err, "{question} [yN] ")?;
        err.flush()?;
        let mut answer = String::new();
        std::io::stdin().lock().read_line(&mut answer)?;
        Ok(answer.trim().eq_ignore_ascii_case("y"))
    }
}

/// Similarity in `[0, 1]`: twice the number of matching characters (found by
/// recursive longest-common-block matching) over the total length.
pub fn similarity(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let total = a.len() + b.len();
    if total == 0 {
        return 1.0;
    }
    2.0 * matching_chars(&a, &b) as f64 / total as f64
}

fn matching_chars(a: &[char], b: &[char]) -> usize {
    if a.is_empty() || b.is_empty() {
        return 0;
    }
    // Longest common block via DP over suffix lengths.
    let (mut best_len, mut best_i, mut best_j) = (0usize, 0usize, 0usize);
    let mut prev = vec![0usize; b.len() + 1];
    for i in 1..=a.len() {
        let mut cur = vec![0usize; b.len() + 1];
        for j in 1..=b.len() {
            if a[i - 1] == b[j - 1] {
                cur[j] = prev[j - 1] + 1;
                if cur[j] > best_len {
                    best_len = cur[j];
                    best_i = i - cur[j];
                    best_j = j - cur[j];
                }
            }
        }
        prev = cur;
    }
    if best_len == 0 {
        return 0;
    }
    best_len
        + matching_chars(&a[..best_i], &b[..best_j])
        + matching_chars(&a[best_i + best_len..], &b[best_j + best_len..])
}

/// Candidates with similarity >= `cutoff`, best first, at most `n`.
pub fn close_matches<'a>(word: &str, candidates: &[&'a str], n: usize, cutoff: f64) -> Vec<&'a str> {
    let mut scored: Vec<(f64, &str)> = candidates
        .iter()
        .map(|c| (similarity(word, c), *c))
        .filter(|(score, _)| *score >= cutoff)
        .collect();
    scored.sort_by(|x, y| y.0.total_cmp(&x.0).then_with(|| x.1.cmp(y.1)));
    scored.into_iter().take(n).map(|(_, c)| c).collect()
}

fn file_name(path: &Path) -> String {
    path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default()
}

/// Resolve `requested` config file names against the `cached` config paths.
///
/// A name not found verbatim is offered its close matches one by one; the first
/// confirmed one is used. No confirmed match is fatal. Repeated selections are
/// skipped with a warning.
pub fn select_configs(
    cached: &[PathBuf],
    requested: &[String],
    prompt: &mut dyn Prompt,
) -> Result<Vec<PathBuf>> {
    let names: Vec<String> = cached.iter().map(|p| file_name(p)).collect();
    let name_refs: Vec<&str> = names.iter().map(String::as_str).collect();
    let mut selected: Vec<PathBuf> = Vec::new();

    for wanted in requested {
        let index = match names.iter().position(|n| n == wanted) {
            Some(i) => i,
            None => {
                let mut chosen = None;
                for candidate in close_matches(wanted, &name_refs, MAX_SUGGESTIONS, SUGGESTION_CUTOFF)
                {
                    let question =
                        format!("Could not find '{wanted}' directly! Did you mean '{candidate}'?");
                    if prompt.confirm(&question)? {
                        chosen = names.iter().position(|n| n == candidate);
                        break;
                    }
                }
                chosen.ok_or_else(|| {
                    Error::Validation(format!(
                        "could not find config '{wanted}'; cached configs are:\n  - {}",
                        names.join("\n  - ")
                    ))
                })?
            }
        };

        let path = cached[index].clone();
        if selected.contains(&path) {
            tracing::warn!(config = %names[index], "config already selected, skipping");
        } else {
            selected.push(path);
        }
    }
    Ok(selected)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    struct Scripted {
        answers: VecDeque<bool>,
        asked: Vec<String>,
    }

    impl Scripted {
        fn new(answers: &[bool]) -> Self {
            Self { answers: answers.iter().copied().collect(), asked: Vec::new() }
        }
    }

    impl Prompt for Scripted {
        fn confirm(&mut self, question: &str) -> Result<bool> {
            self.asked.push(question.to_string());
            Ok(self.answers.pop_front().unwrap_or(false))
        }
    }

    fn cached() -> Vec<PathBuf> {
        ["config_1l.yaml", "config_2l.yaml", "combined.yaml"]
            .iter()
            .map(|n| PathBuf::from("/w/configs").join(n))
            .collect()
    }

    #[test]
    fn similarity_bounds() {
        assert_eq!(similarity("abc", "abc"), 1.0);
        assert_eq!(similarity("abc", "xyz"), 0.0);
        assert!((similarity("abcd", "bcde") - 0.75).abs() < 1e-12);
    }

    #[test]
    fn close_matches_orders_best_first() {
        let got = close_matches("config_1l", &["config_2l.yaml", "config_1l.yaml", "zzz"], 3, 0.6);
        assert_eq!(got, vec!["config_1l.yaml", "config_2l.yaml"]);
    }

    #[test]
    fn verbatim_names_need_no_prompt() {
        let mut prompt = Scripted::new(&[]);
        let got = select_configs(&cached(), &["combined.yaml".into()], &mut prompt).unwrap();
        assert_eq!(got, vec![PathBuf::from("/w/configs/combined.yaml")]);
        assert!(prompt.asked.is_empty());
    }

    #[test]
    fn confirmed_suggestion_is_used() {
        let mut prompt = Scripted::new(&[true]);
        let got = select_configs(&cached(), &["config_1l".into()], &mut prompt).unwrap();
        assert_eq!(got, vec![PathBuf::from("/w/configs/config_1l.yaml")]);
        assert!(prompt.asked[0].contains("config_1l.yaml"));
    }

    #[test]
    fn rejected_suggestions_are_fatal() {
        let mut prompt = Scripted::new(&[false, false, false]);
        let err = select_configs(&cached(), &["config_1l".into()], &mut prompt).unwrap_err();
        assert!(err.to_string().contains("combined.yaml"), "{err}");
    }

    #[test]
    fn duplicates_are_skipped() {
        let mut prompt = Scripted::new(&[]);
        let got = select_configs(
            &cached(),
            &["combined.yaml".into(), "combined.yaml".into()],
            &mut prompt,
        )
        .unwrap();
        assert_eq!(got.len(), 1);
    }
}
