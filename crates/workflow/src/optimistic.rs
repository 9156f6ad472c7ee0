use std::future::Future;
use tracing::{debug, warn};

use backend::BackendError;
use episode::{CacheError, CacheHandle, Episode, Snapshot, Ticket};

use crate::{Result, StudioError};

/// Snapshot, apply locally, await the backend, and undo on failure.
pub struct Transaction {
    cache: CacheHandle,
    snapshot: Snapshot,
}

impl Transaction {
    pub fn begin(cache: &CacheHandle, ticket: &Ticket) -> Result<Self> {
        let snapshot = cache.snapshot(ticket)?;
        Ok(Self {
            cache: cache.clone(),
            snapshot,
        })
    }

    /// Apply the optimistic change. Visible to readers immediately.
    pub fn apply<R>(&self, f: impl FnOnce(&mut Episode) -> R) -> Result<R> {
        Ok(self.cache.mutate(self.snapshot.ticket(), f)?)
    }

    /// Await the backend confirmation, rolling back if it fails.
    pub async fn confirm<T, Fut>(self, request: Fut) -> Result<T>
    where
        Fut: Future<Output = std::result::Result<T, BackendError>>,
    {
        match request.await {
            Ok(value) => {
                if !self.cache.is_current(self.snapshot.ticket()) {
                    debug!("confirmation arrived after teardown; dropped");
                    return Err(StudioError::Stale);
                }
                Ok(value)
            }
            Err(err) => {
                warn!(%err, "backend rejected optimistic update");
                self.rollback();
                Err(err.into())
            }
        }
    }

    pub fn rollback(self) {
        match self.cache.restore(self.snapshot) {
            Ok(()) => {}
            Err(CacheError::Stale) | Err(CacheError::Empty) => {
                debug!("rollback skipped; episode no longer loaded");
            }
        }
    }
}

/// One-shot optimistic update: `apply` locally, then `request`, undone on error.
pub async fn optimistic<T, Fut>(
    cache: &CacheHandle,
    ticket: &Ticket,
    apply: impl FnOnce(&mut Episode),
    request: Fut,
) -> Result<T>
where
    Fut: Future<Output = std::result::Result<T, BackendError>>,
{
    let tx = Transaction::begin(cache, ticket)?;
    tx.apply(apply)?;
    tx.confirm(request).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use episode::{ScriptLine, StageKind};
    use std::sync::Arc;

    fn loaded() -> (CacheHandle, Ticket) {
        let cache = CacheHandle::new();
        let mut ep = Episode::new("ep1", "Episode 1", StageKind::Script.default_id());
        Arc::make_mut(&mut ep.script).lines =
            vec![ScriptLine::new("l1", "mom").with_text("早", "zǎo", "Morning")];
        let ticket = cache.load(ep);
        (cache, ticket)
    }

    #[tokio::test]
    async fn success_keeps_local_change() {
        let (cache, ticket) = loaded();
        let out = optimistic(
            &cache,
            &ticket,
            |ep| Arc::make_mut(&mut ep.script).lines[0].text_en = "Hello".into(),
            async { Ok::<_, BackendError>(7) },
        )
        .await
        .unwrap();
        assert_eq!(out, 7);
        assert_eq!(cache.get().unwrap().script.lines[0].text_en, "Hello");
    }

    #[tokio::test]
    async fn failure_restores_exact_prior_state() {
        let (cache, ticket) = loaded();
        let before = cache.get().unwrap();
        let err = optimistic(
            &cache,
            &ticket,
            |ep| Arc::make_mut(&mut ep.script).lines[0].text_en = "Hello".into(),
            async { Err::<(), _>(BackendError::Rejected("nope".into())) },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, StudioError::Backend(BackendError::Rejected(_))));
        let after = cache.get().unwrap();
        assert!(Arc::ptr_eq(&before, &after));
        assert_eq!(after.script.lines[0].text_en, "Morning");
    }

    #[tokio::test]
    async fn late_result_after_teardown_is_dropped() {
        let (cache, ticket) = loaded();
        let tx = Transaction::begin(&cache, &ticket).unwrap();
        tx.apply(|ep| ep.art_style = "ink".into()).unwrap();
        cache.clear();
        let err = tx.confirm(async { Ok::<_, BackendError>(()) }).await.unwrap_err();
        assert!(matches!(err, StudioError::Stale));
        assert!(cache.current().is_none());
    }
}
