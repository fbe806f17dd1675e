use std::sync::{Arc, Mutex};

use narration_types::{PlaybackState, ProgressSnapshot};

/// Latest progress of the active session, written by the worker and read by callers.
#[derive(Debug, Default)]
pub(crate) struct ProgressStore {
    inner: Mutex<ProgressSnapshot>,
}

impl ProgressStore {
    pub(crate) fn shared() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn snapshot(&self) -> ProgressSnapshot {
        self.inner
            .lock()
            .map(|s| s.clone())
            .unwrap_or_else(|p| p.into_inner().clone())
    }

    pub(crate) fn state(&self) -> Option<PlaybackState> {
        self.inner
            .lock()
            .map(|s| s.state)
            .unwrap_or_else(|p| p.into_inner().state)
    }

    pub(crate) fn update(&self, f: impl FnOnce(&mut ProgressSnapshot)) {
        let mut guard = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        f(&mut guard);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn update_is_visible_in_snapshot() {
        let store = ProgressStore::shared();
        assert_eq!(store.state(), None);
        store.update(|s| {
            s.state = Some(PlaybackState::Loading);
            s.title = "Harbour".into();
        });
        let snap = store.snapshot();
        assert_eq!(snap.state, Some(PlaybackState::Loading));
        assert_eq!(snap.title, "Harbour");
    }
}
