//! On-disk cache for LLM completions.
//!
//! One file per answer under the cache directory, named by a blake3 hash of
//! the model, prompt version, preamble and prompt. A hit skips the model
//! call entirely; cache I/O problems are logged and never fail a request.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use blake3::Hasher;
use resolution::LocatorResult;
use tracing::{debug, warn};

use crate::llm::{Completion, ModelRole};
use crate::prompts::PROMPT_VERSION;

pub struct CachedCompletion {
    inner: Arc<dyn Completion>,
    dir: PathBuf,
}

impl CachedCompletion {
    pub fn new(inner: Arc<dyn Completion>, dir: impl Into<PathBuf>) -> Self {
        Self {
            inner,
            dir: dir.into(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Hex key for one request.
    pub fn key(&self, role: ModelRole, preamble: &str, prompt: &str) -> String {
        let mut hasher = Hasher::new();
        for part in [
            self.inner.model_name(role).as_str(),
            PROMPT_VERSION,
            preamble,
            prompt,
        ] {
            hasher.update(part.as_bytes());
            // Separator so ("ab", "c") and ("a", "bc") differ.
            hasher.update(&[0]);
        }
        hasher.finalize().to_hex().to_string()
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.txt"))
    }

    async fn store(&self, path: &Path, answer: &str) {
        if let Err(e) = tokio::fs::create_dir_all(&self.dir).await {
            warn!(dir = %self.dir.display(), error = %e, "cannot create completion cache dir");
            return;
        }
        if let Err(e) = tokio::fs::write(path, answer).await {
            warn!(path = %path.display(), error = %e, "cannot write cached completion");
        }
    }
}

#[async_trait]
impl Completion for CachedCompletion {
    async fn complete(
        &self,
        role: ModelRole,
        preamble: &str,
        prompt: &str,
    ) -> LocatorResult<String> {
        let path = self.path_for(&self.key(role, preamble, prompt));
        match tokio::fs::read_to_string(&path).await {
            Ok(cached) => {
                debug!(%role, path = %path.display(), "completion cache hit");
                return Ok(cached);
            }
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => {
                warn!(path = %path.display(), error = %e, "unreadable cache entry, calling model");
            }
            Err(_) => {}
        }

        let answer = self.inner.complete(role, preamble, prompt).await?;
        if !answer.trim().is_empty() {
            self.store(&path, &answer).await;
        }
        Ok(answer)
    }

    fn model_name(&self, role: ModelRole) -> String {
        self.inner.model_name(role)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use resolution::LocatorError;

    use super::*;

    /// Echoes the prompt uppercased and counts calls.
    #[derive(Default)]
    struct CountingCompletion {
        calls: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl Completion for CountingCompletion {
        async fn complete(
            &self,
            _role: ModelRole,
            _preamble: &str,
            prompt: &str,
        ) -> LocatorResult<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(LocatorError::Transport("offline".into()));
            }
            Ok(prompt.to_uppercase())
        }
    }

    #[tokio::test]
    async fn second_identical_request_is_served_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let inner = Arc::new(CountingCompletion::default());
        let cache = CachedCompletion::new(inner.clone(), dir.path().join("completions"));

        let first = cache.complete(ModelRole::Normalizer, "p", "krakow").await.unwrap();
        let second = cache.complete(ModelRole::Normalizer, "p", "krakow").await.unwrap();

        assert_eq!(first, "KRAKOW");
        assert_eq!(second, "KRAKOW");
        assert_eq!(inner.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn role_and_preamble_are_part_of_the_key() {
        let dir = tempfile::tempdir().unwrap();
        let inner = Arc::new(CountingCompletion::default());
        let cache = CachedCompletion::new(inner.clone(), dir.path());

        cache.complete(ModelRole::Normalizer, "p", "x").await.unwrap();
        cache.complete(ModelRole::Resolver, "p", "x").await.unwrap();
        cache.complete(ModelRole::Resolver, "q", "x").await.unwrap();

        assert_eq!(inner.calls.load(Ordering::SeqCst), 3);
        assert_ne!(
            cache.key(ModelRole::Normalizer, "ab", "c"),
            cache.key(ModelRole::Normalizer, "a", "bc")
        );
    }

    #[tokio::test]
    async fn errors_are_not_cached() {
        let dir = tempfile::tempdir().unwrap();
        let inner = Arc::new(CountingCompletion {
            fail: true,
            ..Default::default()
        });
        let cache = CachedCompletion::new(inner.clone(), dir.path());

        assert!(cache.complete(ModelRole::Resolver, "p", "x").await.is_err());
        assert!(cache.complete(ModelRole::Resolver, "p", "x").await.is_err());
        assert_eq!(inner.calls.load(Ordering::SeqCst), 2);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
