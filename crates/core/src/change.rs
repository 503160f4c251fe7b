//! Change records emitted by the metadata store.
//!
//! Every successful insert, update or connector deletion produces one
//! record carrying the image before and after the mutation, mirroring a
//! database change stream. Retention purges of expired jobs are not
//! published.

use serde::{Deserialize, Serialize};

use crate::connector::Connector;
use crate::job::Job;
use crate::status::JobStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChangeKind {
    Insert,
    Modify,
    Remove,
}

/// One entity mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Change<T> {
    pub kind: ChangeKind,
    pub old_image: Option<T>,
    pub new_image: T,
}

impl<T> Change<T> {
    pub fn insert(new_image: T) -> Self {
        Self {
            kind: ChangeKind::Insert,
            old_image: None,
            new_image,
        }
    }

    pub fn modify(old_image: T, new_image: T) -> Self {
        Self {
            kind: ChangeKind::Modify,
            old_image: Some(old_image),
            new_image,
        }
    }

    /// A deletion. `new_image` repeats the last stored image.
    pub fn remove(old_image: T) -> Self
    where
        T: Clone,
    {
        Self {
            kind: ChangeKind::Remove,
            old_image: Some(old_image.clone()),
            new_image: old_image,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "entity", rename_all = "snake_case")]
pub enum ChangeRecord {
    Connector(Change<Connector>),
    Job(Change<Job>),
}

impl Change<Job> {
    /// The status the job moved into, if this change altered its status.
    ///
    /// Inserts always count as entering their status.
    pub fn entered_status(&self) -> Option<JobStatus> {
        match &self.old_image {
            Some(old) if old.status == self.new_image.status => None,
            _ => Some(self.new_image.status),
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;

    #[test]
    fn insert_enters_initial_status() {
        let job = Job::new("cc-abc", Vec::new(), Utc::now());
        let change = Change::insert(job);
        assert_eq!(change.kind, ChangeKind::Insert);
        assert_eq!(change.entered_status(), Some(JobStatus::Started));
    }

    #[test]
    fn claim_only_modify_enters_nothing() {
        let now = Utc::now();
        let job = Job::new("cc-abc", Vec::new(), now);
        let claimed = job.claim(now);
        assert_eq!(Change::modify(job, claimed).entered_status(), None);
    }

    #[test]
    fn stop_request_enters_stopping() {
        let now = Utc::now();
        let job = Job::new("cc-abc", Vec::new(), now);
        let stopping = job.transition(JobStatus::Stopping, now).unwrap();
        assert_eq!(
            Change::modify(job, stopping).entered_status(),
            Some(JobStatus::Stopping)
        );
    }
}
