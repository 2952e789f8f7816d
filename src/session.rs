//! Per-session results of a tracking run, kept so later requests can re-render
//! the same video without tracking it again.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, Instant};

use serde_derive::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::frame::{BoxStream, TrackId};

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for SessionId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// What a session remembers about its last tracking run.
#[derive(Debug, Clone)]
pub struct SessionArtifact {
    pub video: PathBuf,
    pub boxes: BoxStream,
    pub track_ids: BTreeSet<TrackId>,
}

impl SessionArtifact {
    pub fn new<P: Into<PathBuf>>(video: P, boxes: BoxStream) -> Self {
        let track_ids = boxes.track_ids();

        Self {
            video: video.into(),
            boxes,
            track_ids,
        }
    }
}

struct Entry {
    artifact: Arc<SessionArtifact>,
    stored_at: Instant,
}

/// Session-keyed artifact store. Entries expire `ttl` after they were last
/// written.
pub struct SessionStore {
    ttl: Duration,
    entries: RwLock<HashMap<SessionId, Entry>>,
}

impl SessionStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Stores `artifact` under `id`, dropping whatever was there.
    pub fn replace(&self, id: SessionId, artifact: SessionArtifact) {
        let tracks = artifact.track_ids.len();
        let entry = Entry {
            artifact: Arc::new(artifact),
            stored_at: Instant::now(),
        };

        let prev = self
            .entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, entry);

        info!(session = %id, tracks, replaced = prev.is_some(), "Session stored");
    }

    pub fn get(&self, id: SessionId) -> Result<Arc<SessionArtifact>> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);

        match entries.get(&id) {
            Some(entry) if entry.stored_at.elapsed() <= self.ttl => Ok(entry.artifact.clone()),
            Some(_) => {
                debug!(session = %id, "Session expired");
                Err(Error::UninitializedSession(id))
            }
            None => Err(Error::UninitializedSession(id)),
        }
    }

    pub fn remove(&self, id: SessionId) -> Option<Arc<SessionArtifact>> {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id)
            .map(|e| e.artifact)
    }

    /// Drops every expired entry and returns the dropped ids.
    pub fn purge_expired(&self) -> Vec<SessionId> {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);

        let ttl = self.ttl;
        let mut purged = Vec::new();
        entries.retain(|&id, e| {
            let alive = e.stored_at.elapsed() <= ttl;
            if !alive {
                purged.push(id);
            }
            alive
        });

        if !purged.is_empty() {
            info!(purged = purged.len(), left = entries.len(), "Expired sessions purged");
        }

        purged
    }

    /// Number of stored entries, expired ones included until purged.
    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{FrameBoxes, TrackedBox};
    use crate::geometry::Rect;

    fn artifact(ids: &[TrackId]) -> SessionArtifact {
        let frame: FrameBoxes = ids
            .iter()
            .map(|&id| TrackedBox::tracked(Rect::new(0, 0, 4, 4), id))
            .collect();

        SessionArtifact::new("match.mp4", BoxStream::new(25.0, vec![frame]))
    }

    #[test]
    fn test_artifact_collects_ids() {
        let a = artifact(&[5, 2]);

        assert_eq!(a.track_ids.into_iter().collect::<Vec<_>>(), vec![2, 5]);
    }

    #[test]
    fn test_sessions_are_isolated() {
        let store = SessionStore::new(Duration::from_secs(60));
        let (a, b) = (SessionId::new(), SessionId::new());
        store.replace(a, artifact(&[1]));
        store.replace(b, artifact(&[2, 3]));

        assert_ne!(a, b);
        assert_eq!(store.len(), 2);
        assert_eq!(store.get(a).unwrap().track_ids.len(), 1);
        assert_eq!(store.get(b).unwrap().track_ids.len(), 2);

        store.replace(a, artifact(&[7, 8, 9]));
        assert_eq!(store.get(a).unwrap().track_ids.len(), 3);
        assert_eq!(store.get(b).unwrap().track_ids.len(), 2);
    }

    #[test]
    fn test_missing_session() {
        let store = SessionStore::new(Duration::from_secs(60));
        let id = SessionId::new();

        assert!(matches!(store.get(id), Err(Error::UninitializedSession(s)) if s == id));

        store.replace(id, artifact(&[1]));
        assert!(store.remove(id).is_some());
        assert!(store.get(id).is_err());
        assert!(store.is_empty());
    }

    #[test]
    fn test_expired_sessions() {
        let store = SessionStore::new(Duration::ZERO);
        let id = SessionId::new();
        store.replace(id, artifact(&[1]));
        std::thread::sleep(Duration::from_millis(5));

        assert!(matches!(store.get(id), Err(Error::UninitializedSession(_))));
        assert_eq!(store.len(), 1);
        assert_eq!(store.purge_expired(), vec![id]);
        assert!(store.is_empty());
        assert!(store.purge_expired().is_empty());
    }

    #[test]
    fn test_id_round_trips_through_text() {
        let id = SessionId::new();

        assert_eq!(id.to_string().parse::<SessionId>().unwrap(), id);
        assert!("not-a-session".parse::<SessionId>().is_err());
    }
}
