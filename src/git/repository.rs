//! A thin, testable wrapper over a local git working copy.
//!
//! Behavioral contract, not a literal one: callers depend on the method
//! shapes here, not on `git2` directly, so the Memory Service and Sync
//! Engine stay testable against a fake `Repository` if needed.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, TimeZone, Utc};
use regex::RegexBuilder;
use tracing::{debug, info, warn};

use crate::errors::CairnError;
use crate::git::types::{CommitInfo, DiffHunk, DiffResult, GrepMatch, RemoteCredential, GREP_EXTENSIONS};

/// Reserved directory names that `grep` and the Rebuilder must both skip
/// consistently.
pub const RESERVED_DIRS: &[&str] = &[".git", ".cairn"];

pub struct Repository {
    #[cfg(feature = "git-integration")]
    repo: git2::Repository,
    root: PathBuf,
}

impl Repository {
    /// Initialize a brand-new repository at `path`.
    pub fn init(path: impl AsRef<Path>) -> Result<Self> {
        let root = path.as_ref().to_path_buf();
        std::fs::create_dir_all(&root)
            .with_context(|| format!("creating repository directory at {root:?}"))?;

        #[cfg(feature = "git-integration")]
        {
            let repo = git2::Repository::init(&root)
                .with_context(|| format!("initializing git repository at {root:?}"))?;
            info!("initialized repository at {:?}", root);
            Ok(Self { repo, root })
        }

        #[cfg(not(feature = "git-integration"))]
        {
            anyhow::bail!("git-integration feature not enabled");
        }
    }

    /// Open an existing repository at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let root = path.as_ref().to_path_buf();

        #[cfg(feature = "git-integration")]
        {
            let repo = git2::Repository::open(&root)
                .with_context(|| format!("opening git repository at {root:?}"))?;
            Ok(Self { repo, root })
        }

        #[cfg(not(feature = "git-integration"))]
        {
            anyhow::bail!("git-integration feature not enabled");
        }
    }

    /// Clone a remote repository into `path`, authenticating with
    /// `credential` when given.
    pub fn clone_repo(
        url: &str,
        credential: Option<&RemoteCredential>,
        path: impl AsRef<Path>,
    ) -> Result<Self> {
        let root = path.as_ref().to_path_buf();

        #[cfg(feature = "git-integration")]
        {
            let mut builder = git2::build::RepoBuilder::new();
            let mut callbacks = git2::RemoteCallbacks::new();
            if let Some(cred) = credential.cloned() {
                callbacks.credentials(move |_url, _username, _allowed| {
                    git2::Cred::userpass_plaintext(&cred.username, &cred.secret)
                });
            }
            let mut fetch_options = git2::FetchOptions::new();
            fetch_options.remote_callbacks(callbacks);
            builder.fetch_options(fetch_options);

            let repo = builder
                .clone(url, &root)
                .with_context(|| format!("cloning {url} into {root:?}"))?;
            Ok(Self { repo, root })
        }

        #[cfg(not(feature = "git-integration"))]
        {
            let _ = (url, credential);
            anyhow::bail!("git-integration feature not enabled");
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Stage `paths` (or every change, when `paths == ["."]`) and commit.
    /// Fails with `NothingToCommit` if the worktree is clean and
    /// `allow_empty` is false.
    #[cfg(feature = "git-integration")]
    pub fn commit(
        &self,
        paths: &[String],
        author: &str,
        author_email: &str,
        message: &str,
        allow_empty: bool,
    ) -> Result<String> {
        let mut index = self.repo.index()?;

        if paths.iter().any(|p| p == ".") {
            index.add_all(["*"].iter(), git2::IndexAddOption::DEFAULT, None)?;
        } else {
            for path in paths {
                let full = self.root.join(path);
                if full.exists() {
                    index.add_path(Path::new(path))?;
                } else {
                    index.remove_path(Path::new(path)).ok();
                }
            }
        }
        index.write()?;

        let tree_oid = index.write_tree()?;
        let tree = self.repo.find_tree(tree_oid)?;

        let head_commit = self.repo.head().ok().and_then(|h| h.peel_to_commit().ok());

        if !allow_empty {
            if let Some(ref parent) = head_commit {
                if parent.tree_id() == tree_oid {
                    return Err(CairnError::NothingToCommit.into());
                }
            }
        }

        let signature = git2::Signature::now(author, author_email)?;
        let parents: Vec<&git2::Commit> = head_commit.iter().collect();

        let oid = self.repo.commit(
            Some("HEAD"),
            &signature,
            &signature,
            message,
            &tree,
            &parents,
        )?;

        Ok(oid.to_string())
    }

    #[cfg(not(feature = "git-integration"))]
    pub fn commit(
        &self,
        _paths: &[String],
        _author: &str,
        _author_email: &str,
        _message: &str,
        _allow_empty: bool,
    ) -> Result<String> {
        anyhow::bail!("git-integration feature not enabled");
    }

    /// Seed a freshly initialized repository with `README.md` (recording
    /// `user_id` as the owner) and the `archive/` and `tags/` placement
    /// directories, committing whatever was missing. Idempotent: calling
    /// this again on an already-seeded repo commits nothing.
    #[cfg(feature = "git-integration")]
    pub fn seed_layout(&self, user_id: &str) -> Result<()> {
        let mut written = Vec::new();

        let readme_path = self.root.join("README.md");
        if !readme_path.exists() {
            std::fs::write(&readme_path, format!("Owner: {user_id}\n"))
                .with_context(|| format!("writing {}", readme_path.display()))?;
            written.push("README.md".to_string());
        }

        for dir in ["archive", "tags"] {
            let keep_path = self.root.join(dir).join(".gitkeep");
            if !keep_path.exists() {
                std::fs::create_dir_all(keep_path.parent().unwrap())
                    .with_context(|| format!("creating {dir}/ directory"))?;
                std::fs::write(&keep_path, "")
                    .with_context(|| format!("writing {}", keep_path.display()))?;
                written.push(format!("{dir}/.gitkeep"));
            }
        }

        if !written.is_empty() {
            self.commit(
                &written,
                user_id,
                &format!("{user_id}@localhost"),
                "chore: Seed repository layout",
                false,
            )?;
        }

        Ok(())
    }

    /// Reverse-chronological commit log, optionally filtered by path,
    /// message regex, and a `[since, until]` window.
    #[cfg(feature = "git-integration")]
    pub fn history(
        &self,
        path_filter: Option<&str>,
        message_regex: Option<&str>,
        since: Option<DateTime<Utc>>,
        until: Option<DateTime<Utc>>,
        limit: usize,
    ) -> Result<Vec<CommitInfo>> {
        let mut revwalk = self.repo.revwalk()?;
        revwalk.push_head()?;
        revwalk.set_sorting(git2::Sort::TIME)?;

        let message_re = message_regex
            .map(|p| RegexBuilder::new(p).case_insensitive(true).build())
            .transpose()
            .context("invalid message_regex")?;

        let mut results = Vec::new();
        for oid in revwalk {
            let oid = oid?;
            let commit = self.repo.find_commit(oid)?;
            let timestamp = git_time_to_utc(commit.time());

            if let Some(since) = since {
                if timestamp < since {
                    continue;
                }
            }
            if let Some(until) = until {
                if timestamp > until {
                    continue;
                }
            }

            let message = commit.message().unwrap_or("").to_string();
            if let Some(re) = &message_re {
                if !re.is_match(&message) {
                    continue;
                }
            }

            let files_changed = self.files_changed(&commit)?;
            if let Some(path) = path_filter {
                if !files_changed.iter().any(|f| f == path) {
                    continue;
                }
            }

            results.push(CommitInfo {
                hash: oid.to_string(),
                message,
                author: commit.author().name().unwrap_or("unknown").to_string(),
                timestamp,
                files_changed,
            });

            if results.len() >= limit {
                break;
            }
        }

        Ok(results)
    }

    #[cfg(not(feature = "git-integration"))]
    pub fn history(
        &self,
        _path_filter: Option<&str>,
        _message_regex: Option<&str>,
        _since: Option<DateTime<Utc>>,
        _until: Option<DateTime<Utc>>,
        _limit: usize,
    ) -> Result<Vec<CommitInfo>> {
        anyhow::bail!("git-integration feature not enabled");
    }

    /// Files changed in `commit`, computed against the first parent (or
    /// the full tree, for the initial commit).
    #[cfg(feature = "git-integration")]
    fn files_changed(&self, commit: &git2::Commit) -> Result<Vec<String>> {
        let tree = commit.tree()?;
        let parent_tree = commit.parent(0).ok().and_then(|p| p.tree().ok());

        let diff = self
            .repo
            .diff_tree_to_tree(parent_tree.as_ref(), Some(&tree), None)?;

        let mut files = HashSet::new();
        diff.foreach(
            &mut |delta, _| {
                if let Some(path) = delta.new_file().path().or_else(|| delta.old_file().path()) {
                    files.insert(path.to_string_lossy().to_string());
                }
                true
            },
            None,
            None,
            None,
        )?;

        Ok(files.into_iter().collect())
    }

    /// Bytes of `path` at `ref_spec`, which resolves `HEAD`, `HEAD~N`,
    /// a branch/tag name, or any commit hash >= 7 chars.
    #[cfg(feature = "git-integration")]
    pub fn show_at(&self, path: &str, ref_spec: &str) -> Result<Option<Vec<u8>>> {
        let object = match self.repo.revparse_single(ref_spec) {
            Ok(obj) => obj,
            Err(_) => return Ok(None),
        };
        let commit = object.peel_to_commit()?;
        let tree = commit.tree()?;

        match tree.get_path(Path::new(path)) {
            Ok(entry) => {
                let blob = entry.to_object(&self.repo)?.peel_to_blob()?;
                Ok(Some(blob.content().to_vec()))
            }
            Err(_) => Ok(None),
        }
    }

    #[cfg(not(feature = "git-integration"))]
    pub fn show_at(&self, _path: &str, _ref_spec: &str) -> Result<Option<Vec<u8>>> {
        anyhow::bail!("git-integration feature not enabled");
    }

    /// Line-set difference between `from_ref` and `to_ref` for `path`,
    /// plus a unified-diff-style hunk list. Missing on either side yields
    /// empty content for that side (not an error).
    pub fn diff(&self, path: &str, from_ref: &str, to_ref: &str) -> Result<DiffResult> {
        let from_bytes = self.show_at(path, from_ref)?.unwrap_or_default();
        let to_bytes = self.show_at(path, to_ref)?.unwrap_or_default();

        let from_text = String::from_utf8_lossy(&from_bytes);
        let to_text = String::from_utf8_lossy(&to_bytes);

        let from_lines: HashSet<&str> = from_text.lines().filter(|l| !l.trim().is_empty()).collect();
        let to_lines: HashSet<&str> = to_text.lines().filter(|l| !l.trim().is_empty()).collect();

        let additions: Vec<String> = to_lines
            .iter()
            .filter(|l| !from_lines.contains(*l))
            .map(|l| l.to_string())
            .collect();
        let deletions: Vec<String> = from_lines
            .iter()
            .filter(|l| !to_lines.contains(*l))
            .map(|l| l.to_string())
            .collect();

        let hunks = build_hunks(&from_text, &to_text);

        Ok(DiffResult {
            additions,
            deletions,
            hunks,
        })
    }

    /// Case-insensitive regex search over the working tree, skipping
    /// `.git/`, reserved internal directories, and unrecognized
    /// extensions.
    pub fn grep(&self, pattern: &str, path_prefix: Option<&str>) -> Result<Vec<GrepMatch>> {
        let re = RegexBuilder::new(pattern)
            .case_insensitive(true)
            .build()
            .context("invalid grep pattern")?;

        let mut matches = Vec::new();
        let search_root = match path_prefix {
            Some(prefix) => self.root.join(prefix),
            None => self.root.clone(),
        };
        if !search_root.exists() {
            return Ok(matches);
        }

        walk_text_files(&self.root, &search_root, &mut |relpath, content| {
            for (idx, line) in content.lines().enumerate() {
                if let Some(m) = re.find(line) {
                    matches.push(GrepMatch {
                        relative_path: relpath.to_string(),
                        line_number: idx + 1,
                        line: line.to_string(),
                        match_start: m.start(),
                        match_end: m.end(),
                    });
                }
            }
        })?;

        Ok(matches)
    }

    #[cfg(feature = "git-integration")]
    pub fn fetch(&self, credential: Option<&RemoteCredential>) -> Result<()> {
        let mut remote = match self.repo.find_remote("origin") {
            Ok(remote) => remote,
            Err(_) => {
                debug!("no origin remote configured; nothing to fetch");
                return Ok(());
            }
        };

        let mut callbacks = git2::RemoteCallbacks::new();
        if let Some(cred) = credential.cloned() {
            callbacks.credentials(move |_url, _username, _allowed| {
                git2::Cred::userpass_plaintext(&cred.username, &cred.secret)
            });
        }
        let mut fetch_options = git2::FetchOptions::new();
        fetch_options.remote_callbacks(callbacks);

        remote
            .fetch(&[] as &[&str], Some(&mut fetch_options), None)
            .map_err(|e| CairnError::RemoteFailure {
                detail: format!("fetch failed: {e}"),
            })?;

        Ok(())
    }

    #[cfg(not(feature = "git-integration"))]
    pub fn fetch(&self, _credential: Option<&RemoteCredential>) -> Result<()> {
        Ok(())
    }

    /// Merge `origin/<current-branch>` into the current branch. Detects a
    /// merge conflict distinctly from other failures.
    #[cfg(feature = "git-integration")]
    pub fn pull(&self, credential: Option<&RemoteCredential>) -> Result<PullOutcome> {
        self.fetch(credential)?;

        let head = self.repo.head()?;
        let branch_name = head.shorthand().unwrap_or("main").to_string();
        let remote_ref = format!("refs/remotes/origin/{branch_name}");

        let remote_oid = match self.repo.refname_to_id(&remote_ref) {
            Ok(oid) => oid,
            Err(_) => return Ok(PullOutcome::AlreadyUpToDate),
        };

        let local_oid = head
            .target()
            .ok_or_else(|| anyhow::anyhow!("HEAD has no target"))?;

        if remote_oid == local_oid {
            return Ok(PullOutcome::AlreadyUpToDate);
        }

        let annotated = self.repo.find_annotated_commit(remote_oid)?;
        let (analysis, _) = self.repo.merge_analysis(&[&annotated])?;

        if analysis.is_fast_forward() {
            let mut reference = self.repo.find_reference(&head.name().unwrap_or("HEAD"))?;
            reference.set_target(remote_oid, "fast-forward pull")?;
            self.repo.set_head(reference.name().unwrap_or("HEAD"))?;
            self.repo
                .checkout_head(Some(git2::build::CheckoutBuilder::new().force()))?;
            return Ok(PullOutcome::FastForwarded);
        }

        self.repo.merge(&[&annotated], None, None)?;
        let index = self.repo.index()?;
        if index.has_conflicts() {
            return Ok(PullOutcome::Conflict);
        }

        Ok(PullOutcome::Merged)
    }

    #[cfg(not(feature = "git-integration"))]
    pub fn pull(&self, _credential: Option<&RemoteCredential>) -> Result<PullOutcome> {
        Ok(PullOutcome::AlreadyUpToDate)
    }

    #[cfg(feature = "git-integration")]
    pub fn push(&self, credential: Option<&RemoteCredential>) -> Result<()> {
        let mut remote = match self.repo.find_remote("origin") {
            Ok(remote) => remote,
            Err(_) => return Ok(()),
        };

        let head = self.repo.head()?;
        let branch_name = head.shorthand().unwrap_or("main").to_string();
        let refspec = format!("refs/heads/{branch_name}:refs/heads/{branch_name}");

        let mut callbacks = git2::RemoteCallbacks::new();
        if let Some(cred) = credential.cloned() {
            callbacks.credentials(move |_url, _username, _allowed| {
                git2::Cred::userpass_plaintext(&cred.username, &cred.secret)
            });
        }
        let mut push_options = git2::PushOptions::new();
        push_options.remote_callbacks(callbacks);

        remote
            .push(&[refspec.as_str()], Some(&mut push_options))
            .map_err(|e| CairnError::RemoteFailure {
                detail: format!("push failed: {e}"),
            })?;

        Ok(())
    }

    #[cfg(not(feature = "git-integration"))]
    pub fn push(&self, _credential: Option<&RemoteCredential>) -> Result<()> {
        Ok(())
    }

    /// Whether an `origin` remote is configured.
    #[cfg(feature = "git-integration")]
    pub fn has_origin(&self) -> bool {
        self.repo.find_remote("origin").is_ok()
    }

    #[cfg(not(feature = "git-integration"))]
    pub fn has_origin(&self) -> bool {
        false
    }

    /// Paths with uncommitted changes (used by the Sync Engine's
    /// last-write-wins resolution path).
    #[cfg(feature = "git-integration")]
    pub fn working_status_paths(&self) -> Result<Vec<String>> {
        let mut opts = git2::StatusOptions::new();
        opts.include_untracked(true);
        let statuses = self.repo.statuses(Some(&mut opts))?;
        Ok(statuses
            .iter()
            .filter_map(|entry| entry.path().map(String::from))
            .collect())
    }

    #[cfg(not(feature = "git-integration"))]
    pub fn working_status_paths(&self) -> Result<Vec<String>> {
        Ok(vec![])
    }

    pub fn is_clean(&self) -> Result<bool> {
        Ok(self.working_status_paths()?.is_empty())
    }

    /// Resolve every conflicted path left by a failed `pull` merge by
    /// staging "ours" unconditionally — last-write-wins here means the
    /// side already in the local worktree always wins a conflict, not
    /// whichever side parses to a later `updated` header — and commit the
    /// resolution. Returns the resolution commit hash, or `None` if there
    /// was nothing conflicted.
    #[cfg(feature = "git-integration")]
    pub fn resolve_conflicts_last_write_wins(
        &self,
        author: &str,
        author_email: &str,
    ) -> Result<Option<String>> {
        let mut index = self.repo.index()?;
        if !index.has_conflicts() {
            return Ok(None);
        }

        let conflicts: Vec<git2::IndexConflict> =
            index.conflicts()?.collect::<std::result::Result<_, _>>()?;

        for conflict in conflicts {
            let path = conflict
                .our
                .as_ref()
                .or(conflict.their.as_ref())
                .map(|entry| String::from_utf8_lossy(&entry.path).to_string());
            let path = match path {
                Some(p) => p,
                None => continue,
            };

            match conflict.our.as_ref().and_then(|e| self.repo.find_blob(e.id).ok()) {
                Some(blob) => {
                    let full_path = self.root.join(&path);
                    if let Some(parent) = full_path.parent() {
                        std::fs::create_dir_all(parent)?;
                    }
                    std::fs::write(&full_path, blob.content())?;
                    index.add_path(Path::new(&path))?;
                }
                None => {
                    // No "ours" entry: ours deleted the path, so the
                    // resolution is to keep it deleted.
                    let full_path = self.root.join(&path);
                    let _ = std::fs::remove_file(&full_path);
                    let _ = index.remove_path(Path::new(&path));
                }
            }
        }

        index.write()?;
        let tree_oid = index.write_tree()?;
        let tree = self.repo.find_tree(tree_oid)?;
        let signature = git2::Signature::now(author, author_email)?;

        let head_commit = self.repo.head()?.peel_to_commit()?;
        let mut parents = vec![head_commit];
        if let Ok(merge_head_oid) = self.repo.refname_to_id("MERGE_HEAD") {
            parents.push(self.repo.find_commit(merge_head_oid)?);
        }
        let parent_refs: Vec<&git2::Commit> = parents.iter().collect();

        let oid = self.repo.commit(
            Some("HEAD"),
            &signature,
            &signature,
            "chore: Resolve merge conflicts (last-write-wins)",
            &tree,
            &parent_refs,
        )?;

        self.repo.cleanup_state()?;
        self.repo
            .checkout_head(Some(git2::build::CheckoutBuilder::new().force()))?;

        Ok(Some(oid.to_string()))
    }

    #[cfg(not(feature = "git-integration"))]
    pub fn resolve_conflicts_last_write_wins(
        &self,
        _author: &str,
        _author_email: &str,
    ) -> Result<Option<String>> {
        Ok(None)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PullOutcome {
    AlreadyUpToDate,
    FastForwarded,
    Merged,
    Conflict,
}

#[cfg(feature = "git-integration")]
fn git_time_to_utc(time: git2::Time) -> DateTime<Utc> {
    Utc.timestamp_opt(time.seconds(), 0).single().unwrap_or_else(Utc::now)
}

fn build_hunks(from_text: &str, to_text: &str) -> Vec<DiffHunk> {
    let from_lines: Vec<&str> = from_text.lines().collect();
    let to_lines: Vec<&str> = to_text.lines().collect();

    if from_lines == to_lines {
        return vec![];
    }

    vec![DiffHunk {
        from_start: 1,
        from_lines: from_lines.len(),
        to_start: 1,
        to_lines: to_lines.len(),
        lines: to_lines.iter().map(|l| l.to_string()).collect(),
    }]
}

fn is_reserved_component(name: &str) -> bool {
    RESERVED_DIRS.contains(&name) || (name.starts_with('.') && name != "." && name != "..")
}

fn walk_text_files(
    repo_root: &Path,
    dir: &Path,
    visit: &mut impl FnMut(&str, &str),
) -> Result<()> {
    if !dir.is_dir() {
        if let Some(relpath) = relpath_if_eligible(repo_root, dir) {
            if let Ok(content) = std::fs::read_to_string(dir) {
                visit(&relpath, &content);
            }
        }
        return Ok(());
    }

    for entry in std::fs::read_dir(dir).with_context(|| format!("reading directory {dir:?}"))? {
        let entry = entry?;
        let path = entry.path();
        let name = entry.file_name();
        let name = name.to_string_lossy();

        if path.is_dir() {
            if is_reserved_component(&name) {
                continue;
            }
            walk_text_files(repo_root, &path, visit)?;
            continue;
        }

        if let Some(relpath) = relpath_if_eligible(repo_root, &path) {
            match std::fs::read_to_string(&path) {
                Ok(content) => visit(&relpath, &content),
                Err(e) => warn!("skipping unreadable file {:?}: {}", path, e),
            }
        }
    }

    Ok(())
}

fn relpath_if_eligible(repo_root: &Path, path: &Path) -> Option<String> {
    let extension = path.extension()?.to_str()?.to_lowercase();
    if !GREP_EXTENSIONS.contains(&extension.as_str()) {
        return None;
    }
    let rel = path.strip_prefix(repo_root).ok()?;
    Some(rel.to_string_lossy().replace('\\', "/"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn init_creates_repository_directory() {
        let dir = TempDir::new().unwrap();
        let repo_path = dir.path().join("repo");
        let result = Repository::init(&repo_path);
        #[cfg(feature = "git-integration")]
        {
            assert!(result.is_ok());
            assert!(repo_path.join(".git").exists());
        }
        #[cfg(not(feature = "git-integration"))]
        assert!(result.is_err());
    }

    #[test]
    fn grep_skips_reserved_directories() {
        assert!(is_reserved_component(".git"));
        assert!(is_reserved_component(".cairn"));
        assert!(!is_reserved_component("tags"));
    }

    #[test]
    fn empty_diff_for_identical_text_has_no_hunks() {
        assert!(build_hunks("a\nb\n", "a\nb\n").is_empty());
    }
}
