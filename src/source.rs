//! Project source reader
//!
//! Commit, history, revision, tree and blob lookups for one project, plus the derived
//! views built on them (day-grouped history, README).

use crate::backend::{Backend, Blob, Changeset, CommitSummary, ObjectType, Revision, Tree};
use crate::codec::ProjectUrn;
use crate::config::{Config, DayBoundary};
use crate::error::{Error, Result};
use crate::remote::{RemoteData, RemoteStore};
use chrono::{DateTime, Datelike, Local, TimeZone, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, OnceLock};
use tokio::sync::watch;
use tracing::debug;

/// A commit with its branch and changeset filled in
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Commit {
    #[serde(flatten)]
    pub header: CommitSummary,
    pub branch: String,
    pub changeset: Changeset,
}

/// Commits of one day, newest first
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitGroup {
    /// Committer time of the commit that opened the group
    pub time: i64,
    pub commits: Vec<CommitSummary>,
}

pub type CommitHistory = Vec<CommitGroup>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SourceObject {
    Tree(Tree),
    Blob(Blob),
}

impl SourceObject {
    pub fn path(&self) -> &str {
        match self {
            SourceObject::Tree(tree) => &tree.path,
            SourceObject::Blob(blob) => &blob.path,
        }
    }

    pub fn object_type(&self) -> ObjectType {
        match self {
            SourceObject::Tree(_) => ObjectType::Tree,
            SourceObject::Blob(_) => ObjectType::Blob,
        }
    }
}

/// Group a newest-first history by local calendar day
pub fn group_commits(history: Vec<CommitSummary>, rule: DayBoundary) -> CommitHistory {
    group_commits_in(history, &Local, rule)
}

/// Group a newest-first history by calendar day in `tz`.
///
/// A commit opens a new group when its date is earlier than the date of the commit
/// that opened the current group. The input is not re-sorted, so an out-of-order
/// history can yield several groups for the same day.
pub fn group_commits_in<Tz: TimeZone>(
    history: Vec<CommitSummary>,
    tz: &Tz,
    rule: DayBoundary,
) -> CommitHistory {
    let mut days: CommitHistory = Vec::new();
    let mut group_date: Option<DateTime<Tz>> = None;

    for commit in history {
        let date = DateTime::<Utc>::from_timestamp(commit.committer_time, 0)
            .unwrap_or_default()
            .with_timezone(tz);

        let is_new_day = match &group_date {
            None => true,
            Some(current) => earlier_day(&date, current, rule),
        };

        if is_new_day {
            days.push(CommitGroup {
                time: commit.committer_time,
                commits: Vec::new(),
            });
            group_date = Some(date);
        }
        if let Some(group) = days.last_mut() {
            group.commits.push(commit);
        }
    }
    days
}

fn earlier_day<Tz: TimeZone>(date: &DateTime<Tz>, current: &DateTime<Tz>, rule: DayBoundary) -> bool {
    match rule {
        DayBoundary::Components => {
            date.day() < current.day() || date.month() < current.month() || date.year() < current.year()
        }
        DayBoundary::Calendar => date.date_naive() < current.date_naive(),
    }
}

fn readme_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(?i)^readme\b").ok()).as_ref()
}

/// Path of the first README blob among the tree's immediate children
pub fn locate_readme(tree: &Tree) -> Option<&str> {
    let pattern = readme_pattern()?;
    tree.entries
        .iter()
        .filter(|entry| entry.info.object_type == ObjectType::Blob)
        .find(|entry| pattern.is_match(&entry.info.name))
        .map(|entry| entry.path.as_str())
}

/// Source lookups for projects of the local proxy
pub struct SourceReader {
    backend: Arc<dyn Backend>,
    hidden_branches: Vec<String>,
    default_branch: String,
    day_boundary: DayBoundary,
    commit: RemoteStore<Commit>,
    commits: RemoteStore<CommitHistory>,
    object: RemoteStore<SourceObject>,
    revisions: RemoteStore<Vec<Revision>>,
    current_path: watch::Sender<String>,
    current_revision: watch::Sender<String>,
}

impl SourceReader {
    pub fn new(
        backend: Arc<dyn Backend>,
        hidden_branches: Vec<String>,
        default_branch: impl Into<String>,
        day_boundary: DayBoundary,
    ) -> Self {
        let (current_path, _) = watch::channel(String::new());
        let (current_revision, _) = watch::channel(String::new());
        Self {
            backend,
            hidden_branches,
            default_branch: default_branch.into(),
            day_boundary,
            commit: RemoteStore::new("commit"),
            commits: RemoteStore::new("commits"),
            object: RemoteStore::new("object"),
            revisions: RemoteStore::new("revisions"),
            current_path,
            current_revision,
        }
    }

    pub fn from_config(backend: Arc<dyn Backend>, config: &Config) -> Self {
        Self::new(
            backend,
            config.hidden_branches.clone(),
            config.default_branch.clone(),
            config.day_boundary,
        )
    }

    pub fn commit(&self) -> &RemoteStore<Commit> {
        &self.commit
    }

    pub fn commits(&self) -> &RemoteStore<CommitHistory> {
        &self.commits
    }

    pub fn object(&self) -> &RemoteStore<SourceObject> {
        &self.object
    }

    pub fn revisions(&self) -> &RemoteStore<Vec<Revision>> {
        &self.revisions
    }

    pub fn current_path(&self) -> watch::Receiver<String> {
        self.current_path.subscribe()
    }

    pub fn current_revision(&self) -> watch::Receiver<String> {
        self.current_revision.subscribe()
    }

    /// Fetch one commit. Branch and changeset fall back to defaults when the proxy
    /// leaves them out.
    pub async fn fetch_commit(&self, project: &ProjectUrn, sha1: &str) -> std::result::Result<Commit, Arc<Error>> {
        let ticket = self.commit.loading();
        let result = self.backend.commit(project, sha1).await.map(|record| Commit {
            header: record.header,
            branch: record.branch.unwrap_or_else(|| self.default_branch.clone()),
            changeset: record.changeset.unwrap_or_default(),
        });
        self.commit.finish(ticket, result)
    }

    /// Fetch a branch history grouped by day
    pub async fn fetch_commit_history(
        &self,
        project: &ProjectUrn,
        branch: &str,
    ) -> std::result::Result<CommitHistory, Arc<Error>> {
        let ticket = self.commits.loading();
        let result = self
            .backend
            .commits(project, branch)
            .await
            .map(|history| group_commits(history, self.day_boundary));
        self.commits.finish(ticket, result)
    }

    /// Fetch revisions with hidden branches removed
    pub async fn fetch_revisions(&self, project: &ProjectUrn) -> std::result::Result<Vec<Revision>, Arc<Error>> {
        let ticket = self.revisions.loading();
        let result = self.backend.revisions(project).await.map(|revisions| {
            revisions
                .into_iter()
                .map(|revision| Revision {
                    branches: self.filter_branches(revision.branches),
                    ..revision
                })
                .collect()
        });
        self.revisions.finish(ticket, result)
    }

    fn filter_branches(&self, branches: Vec<String>) -> Vec<String> {
        branches
            .into_iter()
            .filter(|branch| !self.hidden_branches.contains(branch))
            .collect()
    }

    pub async fn fetch_tree(&self, project: &ProjectUrn, revision: &str, prefix: &str) -> Result<Tree> {
        Ok(self.backend.tree(project, revision, prefix).await?)
    }

    pub async fn fetch_blob(&self, project: &ProjectUrn, revision: &str, path: &str) -> Result<Blob> {
        Ok(self.backend.blob(project, revision, path).await?)
    }

    /// Navigate to `path` at `revision` and load the tree or blob there
    pub async fn update_params(
        &self,
        project: &ProjectUrn,
        revision: &str,
        path: &str,
        kind: ObjectType,
    ) -> std::result::Result<SourceObject, Arc<Error>> {
        self.current_path.send_replace(path.to_string());
        self.current_revision.send_replace(revision.to_string());

        let ticket = self.object.loading();
        let result = match kind {
            ObjectType::Tree => self.fetch_tree(project, revision, path).await.map(SourceObject::Tree),
            ObjectType::Blob => self.fetch_blob(project, revision, path).await.map(SourceObject::Blob),
        };
        self.object.finish(ticket, result)
    }

    /// Branches of a repository on disk
    pub async fn local_branches(&self, path: &str) -> Result<Vec<String>> {
        Ok(self.backend.local_branches(path).await?)
    }

    /// README blob of `tree`, unless there is none or it is binary
    pub async fn resolve_readme(&self, project: &ProjectUrn, revision: &str, tree: &Tree) -> Result<Option<Blob>> {
        let Some(path) = locate_readme(tree) else {
            return Ok(None);
        };

        let blob = self.fetch_blob(project, revision, path).await?;
        if blob.binary {
            debug!(project = %project, path = %path, "README is binary, not showing it");
            return Ok(None);
        }
        Ok(Some(blob))
    }

    /// README of the object currently loaded, if that object is a tree.
    ///
    /// A failed object fetch is passed on as the README's error.
    pub async fn readme(
        &self,
        project: &ProjectUrn,
        revision: &str,
    ) -> std::result::Result<Option<Blob>, Arc<Error>> {
        match self.object.get() {
            RemoteData::Success(SourceObject::Tree(tree)) => {
                self.resolve_readme(project, revision, &tree).await.map_err(Arc::new)
            }
            RemoteData::Error(err) => Err(err),
            _ => Ok(None),
        }
    }
}
