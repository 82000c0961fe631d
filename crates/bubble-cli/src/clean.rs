//! Container clean-state checking.
//!
//! A bubble is "clean" (safe to destroy without data loss) when:
//! 1. Nothing unexpected sits in `/home/user` beside the project
//! 2. The working tree has no modified/staged/untracked files
//! 3. There are no stashes
//! 4. Every local branch is pushed (PR checkout branches are compared
//!    against the commit recorded at registration)

use bubble_core::{sh_quote, BubbleInfo};
use bubble_runtime::ContainerRuntime;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CleanStatus {
    pub clean: bool,
    pub reasons: Vec<String>,
    pub error: Option<String>,
}

impl CleanStatus {
    fn error(message: &str) -> Self {
        Self {
            clean: false,
            reasons: Vec::new(),
            error: Some(message.to_owned()),
        }
    }

    pub fn summary(&self) -> String {
        if let Some(error) = &self.error {
            return error.clone();
        }
        if self.clean {
            return "clean".to_owned();
        }
        format_reasons(&self.reasons).join(", ")
    }
}

/// Check whether a bubble can be destroyed without data loss. Requires
/// the container to be running; any failure lands in
/// [`CleanStatus::error`].
pub async fn check_clean<R: ContainerRuntime>(
    runtime: &R,
    name: &str,
    info: Option<&BubbleInfo>,
) -> CleanStatus {
    let initial_commit = info.map(|i| i.commit.as_str()).unwrap_or("");
    let repo_short = info
        .map(|i| bubble_core::config::repo_short_name(&i.org_repo))
        .unwrap_or_default();

    let script = build_check_script(initial_commit, &repo_short);
    let output = match runtime.exec(name, &["su", "-", "user", "-c", &script]).await {
        Ok(output) => output,
        Err(e) => {
            let message = e.to_string().to_lowercase();
            if message.contains("not running") || message.contains("not found") {
                return CleanStatus::error("not running");
            }
            return CleanStatus::error("check failed");
        }
    };

    parse_check_output(&output)
}

/// Build the remote check script. All interpolated values come from
/// the registry and are shell-quoted; the script prints exactly one
/// `CLEAN=<bool> REASONS=<tags>` line.
fn build_check_script(initial_commit: &str, repo_short: &str) -> String {
    let q_repo = sh_quote(repo_short);
    let q_commit = sh_quote(initial_commit);

    format!(
        r#"CLEAN=true
REASONS=""
EXPECTED=$(echo {q_repo} | tr '[:upper:]' '[:lower:]')

# Check 1: no unexpected non-hidden items in home
ITEMS=$(ls /home/user/ 2>/dev/null || true)
if [ -n "$EXPECTED" ]; then
  if [ "$(echo "$ITEMS" | tr '[:upper:]' '[:lower:]')" != "$EXPECTED" ]; then
    CLEAN=false
    REASONS="${{REASONS}}extra_files;"
  fi
elif [ -n "$ITEMS" ]; then
  CLEAN=false
  REASONS="${{REASONS}}extra_files;"
fi

# Find the project directory
if [ -n "$EXPECTED" ] && [ -d "/home/user/$EXPECTED" ]; then
  PROJECT="/home/user/$EXPECTED"
else
  PROJECT=$(ls -d /home/user/*/ 2>/dev/null | head -1)
fi

# If there's a project dir, it must have a working git repo
if [ -n "$PROJECT" ]; then
  if [ ! -d "$PROJECT/.git" ]; then
    CLEAN=false
    REASONS="${{REASONS}}no_git;"
  elif ! command -v git >/dev/null 2>&1; then
    CLEAN=false
    REASONS="${{REASONS}}no_git;"
  else
    cd "$PROJECT"

    # Check 2: clean working tree
    if [ -n "$(git status --porcelain 2>/dev/null)" ]; then
      CLEAN=false
      REASONS="${{REASONS}}dirty_worktree;"
    fi

    # Check 3: no stashes
    if [ -n "$(git stash list 2>/dev/null)" ]; then
      CLEAN=false
      REASONS="${{REASONS}}stashes;"
    fi

    # Check 4: no unpushed commits
    INITIAL={q_commit}
    while IFS= read -r branch; do
      [ -z "$branch" ] && continue
      UPSTREAM=$(git rev-parse --verify --quiet "$branch@{{upstream}}" 2>/dev/null || true)
      if [ -n "$UPSTREAM" ]; then
        AHEAD=$(git rev-list --count "$UPSTREAM".."$branch" 2>/dev/null || echo 0)
        if [ "$AHEAD" -gt 0 ]; then
          CLEAN=false
          REASONS="${{REASONS}}unpushed:$branch;"
        fi
      else
        if [ -n "$INITIAL" ]; then
          BRANCH_HEAD=$(git rev-parse "$branch" 2>/dev/null || true)
          if [ "$BRANCH_HEAD" != "$INITIAL" ]; then
            CLEAN=false
            REASONS="${{REASONS}}unpushed:$branch;"
          fi
        else
          CLEAN=false
          REASONS="${{REASONS}}untracked_branch:$branch;"
        fi
      fi
    done < <(git for-each-ref --format='%(refname:short)' refs/heads/)
  fi
fi

if [ -z "$REASONS" ]; then
  REASONS="none"
fi
echo "CLEAN=$CLEAN REASONS=$REASONS"
"#
    )
}

fn parse_check_output(output: &str) -> CleanStatus {
    for line in output.lines() {
        let line = line.trim();
        let Some(rest) = line.strip_prefix("CLEAN=") else {
            continue;
        };
        let (clean_str, reasons_str) = match rest.split_once(' ') {
            Some((clean, rest)) => (clean, rest.strip_prefix("REASONS=").unwrap_or("none")),
            None => (rest, "none"),
        };
        let clean = clean_str == "true";
        let reasons = if reasons_str == "none" || reasons_str.is_empty() {
            Vec::new()
        } else {
            reasons_str
                .trim_end_matches(';')
                .split(';')
                .filter(|r| !r.is_empty())
                .map(str::to_owned)
                .collect()
        };
        return CleanStatus {
            clean,
            reasons,
            error: None,
        };
    }
    CleanStatus::error("unexpected output")
}

/// Translate machine-readable reason tags into human-readable text.
pub fn format_reasons(reasons: &[String]) -> Vec<String> {
    reasons
        .iter()
        .map(|r| match r.as_str() {
            "extra_files" => "extra files in home".to_owned(),
            "dirty_worktree" => "uncommitted changes".to_owned(),
            "stashes" => "git stashes".to_owned(),
            "no_git" => "no git repository".to_owned(),
            other => {
                if let Some(branch) = other.strip_prefix("unpushed:") {
                    format!("unpushed commits on {branch}")
                } else if let Some(branch) = other.strip_prefix("untracked_branch:") {
                    format!("untracked branch {branch}")
                } else {
                    other.to_owned()
                }
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn script_quotes_registry_values() {
        let script = build_check_script("$(evil)", "repo'; rm -rf /");
        assert!(script.contains("'$(evil)'"));
        assert!(!script.contains("EXPECTED=$(echo repo';"));
        assert!(script.contains("echo \"CLEAN=$CLEAN REASONS=$REASONS\""));
    }

    #[test]
    fn parses_clean_output() {
        let status = parse_check_output("CLEAN=true REASONS=none\n");
        assert!(status.clean);
        assert!(status.reasons.is_empty());
        assert!(status.error.is_none());
        assert_eq!(status.summary(), "clean");
    }

    #[test]
    fn parses_dirty_output_with_reasons() {
        let status = parse_check_output("CLEAN=false REASONS=dirty_worktree;unpushed:fix-1;\n");
        assert!(!status.clean);
        assert_eq!(status.reasons, vec!["dirty_worktree", "unpushed:fix-1"]);
        assert_eq!(status.summary(), "uncommitted changes, unpushed commits on fix-1");
    }

    #[test]
    fn skips_noise_before_status_line() {
        let status = parse_check_output("some warning\nCLEAN=true REASONS=none\n");
        assert!(status.clean);
    }

    #[test]
    fn unexpected_output_is_an_error() {
        let status = parse_check_output("garbage\n");
        assert!(!status.clean);
        assert_eq!(status.error.as_deref(), Some("unexpected output"));
    }

    #[test]
    fn formats_all_known_tags() {
        let reasons: Vec<String> = [
            "extra_files",
            "no_git",
            "dirty_worktree",
            "stashes",
            "unpushed:main",
            "untracked_branch:scratch",
            "mystery",
        ]
        .into_iter()
        .map(str::to_owned)
        .collect();
        let formatted = format_reasons(&reasons);
        assert_eq!(
            formatted,
            vec![
                "extra files in home",
                "no git repository",
                "uncommitted changes",
                "git stashes",
                "unpushed commits on main",
                "untracked branch scratch",
                "mystery",
            ]
        );
    }
}
