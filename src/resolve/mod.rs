//! Resolve a user-supplied identifier to exactly one run.
//!
//! Resolution levels, each short-circuiting:
//! 1. exact name among eligible runs (not broken, not archived unless asked)
//! 2. exact run ID across *all* runs, broken and archived included
//! 3. run ID prefix among eligible runs
//!
//! Level 2 guarantees every run, however damaged, stays reachable by its
//! own ID. Ambiguous results list candidates sorted by run ID then repo ID,
//! independent of corpus order.

use thiserror::Error;

use crate::domain::RunRef;

/// Resolution errors
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ResolveError {
    #[error("No run matches '{input}'")]
    NotFound { input: String },

    #[error("'{input}' is ambiguous; candidates: {}", list_candidates(.candidates))]
    Ambiguous { input: String, candidates: Vec<RunRef> },
}

fn list_candidates(candidates: &[RunRef]) -> String {
    candidates.iter().map(|c| c.to_string()).collect::<Vec<_>>().join(", ")
}

/// Options controlling which runs are eligible for name/prefix matching.
#[derive(Debug, Clone, Copy, Default)]
pub struct ResolveOptions {
    pub include_archived: bool,
}

impl ResolveOptions {
    pub fn including_archived() -> Self {
        Self { include_archived: true }
    }
}

fn is_eligible(r: &RunRef, opts: ResolveOptions) -> bool {
    !r.broken && (opts.include_archived || !r.archived)
}

/// Resolve `input` against `corpus`.
pub fn resolve(input: &str, corpus: &[RunRef], opts: ResolveOptions) -> Result<RunRef, ResolveError> {
    let needle = input.trim();
    if needle.is_empty() {
        return Err(ResolveError::NotFound {
            input: input.to_string(),
        });
    }

    let by_name: Vec<&RunRef> = corpus
        .iter()
        .filter(|r| is_eligible(r, opts) && r.name == needle)
        .collect();
    if !by_name.is_empty() {
        return single_or_ambiguous(needle, by_name);
    }

    let by_id: Vec<&RunRef> = corpus.iter().filter(|r| r.run_id == needle).collect();
    if !by_id.is_empty() {
        return single_or_ambiguous(needle, by_id);
    }

    let by_prefix: Vec<&RunRef> = corpus
        .iter()
        .filter(|r| is_eligible(r, opts) && r.run_id.starts_with(needle))
        .collect();
    if by_prefix.is_empty() {
        return Err(ResolveError::NotFound {
            input: needle.to_string(),
        });
    }
    single_or_ambiguous(needle, by_prefix)
}

fn single_or_ambiguous(needle: &str, mut matches: Vec<&RunRef>) -> Result<RunRef, ResolveError> {
    if matches.len() == 1 {
        return Ok(matches[0].clone());
    }
    matches.sort_by(|a, b| a.run_id.cmp(&b.run_id).then_with(|| a.repo_id.cmp(&b.repo_id)));
    Err(ResolveError::Ambiguous {
        input: needle.to_string(),
        candidates: matches.into_iter().cloned().collect(),
    })
}

/// Reject `name` if a non-archived run in `corpus` already uses it.
/// Returns the conflicting run ID.
pub fn check_name_unique(name: &str, corpus: &[RunRef]) -> Result<(), String> {
    match corpus.iter().find(|r| !r.broken && !r.archived && r.name == name) {
        Some(conflict) => Err(conflict.run_id.clone()),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn corpus() -> Vec<RunRef> {
        vec![
            RunRef::valid("r1", "abc111", "login"),
            RunRef::valid("r1", "abc222", "signup"),
            RunRef::valid("r1", "def333", "abc111x"),
            RunRef::valid("r1", "old999", "legacy").with_archived(true),
            RunRef::broken("r1", "bad000"),
        ]
    }

    fn ids(candidates: &[RunRef]) -> Vec<&str> {
        candidates.iter().map(|c| c.run_id.as_str()).collect()
    }

    #[test]
    fn test_empty_input_not_found() {
        assert!(matches!(
            resolve("   ", &corpus(), ResolveOptions::default()),
            Err(ResolveError::NotFound { .. })
        ));
    }

    #[test]
    fn test_name_match_wins_and_trims() {
        let r = resolve("  signup \n", &corpus(), ResolveOptions::default()).unwrap();
        assert_eq!(r.run_id, "abc222");
    }

    #[test]
    fn test_exact_id_beats_prefix_ambiguity() {
        let mut c = corpus();
        c.push(RunRef::valid("r1", "abc2220", "longer"));
        let r = resolve("abc222", &c, ResolveOptions::default()).unwrap();
        assert_eq!(r.run_id, "abc222");
    }

    #[test]
    fn test_prefix_ambiguity_lists_sorted_candidates() {
        let forward = corpus();
        let mut reversed = corpus();
        reversed.reverse();

        for c in [forward, reversed] {
            match resolve("abc", &c, ResolveOptions::default()) {
                Err(ResolveError::Ambiguous { candidates, .. }) => {
                    assert_eq!(ids(&candidates), vec!["abc111", "abc222"]);
                }
                other => panic!("expected ambiguous, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_ambiguous_ties_sorted_by_repo() {
        let c = vec![RunRef::valid("r2", "same", "a"), RunRef::valid("r1", "same", "b")];
        match resolve("same", &c, ResolveOptions::default()) {
            Err(ResolveError::Ambiguous { candidates, .. }) => {
                let repos: Vec<&str> = candidates.iter().map(|c| c.repo_id.as_str()).collect();
                assert_eq!(repos, vec!["r1", "r2"]);
            }
            other => panic!("expected ambiguous, got {other:?}"),
        }
    }

    #[test]
    fn test_broken_only_by_exact_id() {
        let c = corpus();
        let r = resolve("bad000", &c, ResolveOptions::default()).unwrap();
        assert!(r.broken);
        assert!(matches!(
            resolve("bad", &c, ResolveOptions::default()),
            Err(ResolveError::NotFound { .. })
        ));
    }

    #[test]
    fn test_broken_excluded_from_name_match() {
        // A broken run has no trustworthy name; it must not shadow a valid one.
        let mut broken = RunRef::broken("r1", "zzz");
        broken.name = "login".to_string();
        let mut c = corpus();
        c.push(broken);
        let r = resolve("login", &c, ResolveOptions::default()).unwrap();
        assert_eq!(r.run_id, "abc111");
    }

    #[test]
    fn test_archived_reachable_by_id_but_not_name_or_prefix() {
        let c = corpus();
        assert!(resolve("old999", &c, ResolveOptions::default()).unwrap().archived);
        assert!(resolve("legacy", &c, ResolveOptions::default()).is_err());
        assert!(resolve("old", &c, ResolveOptions::default()).is_err());

        let r = resolve("legacy", &c, ResolveOptions::including_archived()).unwrap();
        assert_eq!(r.run_id, "old999");
    }

    #[test]
    fn test_name_matching_an_id_prefers_name() {
        // "abc111x" is the name of def333 and also not an ID: name wins.
        let r = resolve("abc111x", &corpus(), ResolveOptions::default()).unwrap();
        assert_eq!(r.run_id, "def333");
    }

    #[test]
    fn test_duplicate_names_are_ambiguous() {
        let c = vec![RunRef::valid("r1", "b2", "same"), RunRef::valid("r2", "a1", "same")];
        match resolve("same", &c, ResolveOptions::default()) {
            Err(ResolveError::Ambiguous { candidates, .. }) => assert_eq!(ids(&candidates), vec!["a1", "b2"]),
            other => panic!("expected ambiguous, got {other:?}"),
        }
    }

    #[test]
    fn test_check_name_unique() {
        let c = corpus();
        assert_eq!(check_name_unique("login", &c), Err("abc111".to_string()));
        assert!(check_name_unique("legacy", &c).is_ok());
        assert!(check_name_unique("fresh", &c).is_ok());
    }
}
