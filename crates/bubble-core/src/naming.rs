//! Container name generation.

use std::collections::HashSet;

/// Generate a container name from repo short name, source kind, and
/// identifier.
///
/// `repo`-kind bubbles get a date stamp instead of an identifier:
///
/// ```
/// use bubble_core::naming::generate_name;
/// assert_eq!(generate_name("mathlib4", "pr", "12345"), "mathlib4-pr-12345");
/// assert_eq!(
///     generate_name("batteries", "branch", "fix/Grind_bug"),
///     "batteries-branch-fix-grind-bug"
/// );
/// ```
pub fn generate_name(repo_short: &str, source: &str, identifier: &str) -> String {
    let stamp;
    let identifier = if source == "main" && identifier.is_empty() {
        stamp = chrono::Local::now().format("%Y%m%d").to_string();
        &stamp
    } else {
        identifier
    };

    let joined = [repo_short, source, identifier]
        .iter()
        .filter(|p| !p.is_empty())
        .copied()
        .collect::<Vec<_>>()
        .join("-");

    // Lowercase, replace anything outside [a-z0-9-], collapse runs of
    // hyphens, trim the ends.
    let mut name = String::with_capacity(joined.len());
    let mut last_hyphen = true;
    for c in joined.to_lowercase().chars() {
        let c = if c.is_ascii_lowercase() || c.is_ascii_digit() {
            c
        } else {
            '-'
        };
        if c == '-' {
            if last_hyphen {
                continue;
            }
            last_hyphen = true;
        } else {
            last_hyphen = false;
        }
        name.push(c);
    }
    let name = name.trim_matches('-').to_owned();

    // Incus names must start with a letter.
    match name.chars().next() {
        Some(c) if c.is_ascii_alphabetic() => name,
        Some(_) => format!("b-{name}"),
        None => name,
    }
}

/// Add a numeric suffix if the name is already taken.
pub fn deduplicate_name(name: &str, existing: &HashSet<String>) -> String {
    if !existing.contains(name) {
        return name.to_owned();
    }
    for i in 2..1000 {
        let candidate = format!("{name}-{i}");
        if !existing.contains(&candidate) {
            return candidate;
        }
    }
    // 998 collisions on one name means something else is wrong.
    format!("{name}-{}", existing.len() + 2)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pr_name() {
        assert_eq!(generate_name("mathlib4", "pr", "12345"), "mathlib4-pr-12345");
    }

    #[test]
    fn branch_name_sanitized() {
        assert_eq!(
            generate_name("myrepo", "branch", "feat/A_b"),
            "myrepo-branch-feat-a-b"
        );
    }

    #[test]
    fn uppercase_repo_lowercased() {
        assert_eq!(
            generate_name("MyRepo", "branch", "feat/A_b"),
            "myrepo-branch-feat-a-b"
        );
    }

    #[test]
    fn main_gets_date_stamp() {
        let name = generate_name("lean4", "main", "");
        assert!(name.starts_with("lean4-main-20"));
        assert_eq!(name.len(), "lean4-main-".len() + 8);
    }

    #[test]
    fn leading_digit_gets_prefix() {
        assert_eq!(generate_name("4color", "pr", "1"), "b-4color-pr-1");
    }

    #[test]
    fn collapses_hyphen_runs() {
        assert_eq!(generate_name("a--b", "branch", "--x--"), "a-b-branch-x");
    }

    #[test]
    fn dedup_appends_counter() {
        let existing: HashSet<String> = ["x".to_owned(), "x-2".to_owned()].into_iter().collect();
        assert_eq!(deduplicate_name("x", &existing), "x-3");
        assert_eq!(deduplicate_name("y", &existing), "y");
    }

    proptest::proptest! {
        #[test]
        fn generated_names_are_valid_container_names(
            repo in "[a-zA-Z0-9_./ -]{1,30}",
            id in "[a-zA-Z0-9_./ -]{0,30}",
        ) {
            let name = generate_name(&repo, "branch", &id);
            if !name.is_empty() {
                proptest::prop_assert!(name.chars().next().unwrap().is_ascii_alphabetic());
                proptest::prop_assert!(
                    name.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
                );
                proptest::prop_assert!(!name.contains("--"));
                proptest::prop_assert!(!name.ends_with('-'));
            }
        }
    }
}
