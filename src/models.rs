//! Loading our OCR engine and translation model once per process.

use std::sync::{Arc, LazyLock};

use indicatif::ProgressBar;
use tokio::sync::OnceCell;

use crate::{
    config::AppConfig,
    ocr::{OcrEngine, tesseract::TesseractOcrEngine},
    prelude::*,
    translate::{Translator, marian::MarianTranslator},
    ui::{ProgressConfig, Ui},
};

/// A lazily-initialized, never-invalidated slot holding one shared instance
/// of an expensive resource.
pub struct ResourceCache<T: ?Sized> {
    cell: OnceCell<Arc<T>>,
}

impl<T: ?Sized + Send + Sync> ResourceCache<T> {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self {
            cell: OnceCell::new(),
        }
    }

    /// Return the cached instance, running `init` first if this is the first
    /// call. Concurrent first calls run `init` once. If `init` fails, nothing
    /// is cached.
    pub async fn get_or_try_init<F, Fut>(&self, init: F) -> Result<Arc<T>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Arc<T>>>,
    {
        self.cell.get_or_try_init(init).await.cloned()
    }
}

/// Our OCR engine.
static OCR_ENGINE: LazyLock<ResourceCache<dyn OcrEngine>> =
    LazyLock::new(ResourceCache::new);

/// Our translation model and tokenizers.
static TRANSLATOR: LazyLock<ResourceCache<dyn Translator>> =
    LazyLock::new(ResourceCache::new);

/// Where the pipeline gets its models from.
#[async_trait]
pub trait ModelProvider: Send + Sync {
    /// Get the OCR engine.
    async fn ocr_engine(&self) -> Result<Arc<dyn OcrEngine>>;

    /// Get the translator.
    async fn translator(&self) -> Result<Arc<dyn Translator>>;
}

/// The process-wide models.
///
/// Only the first successful load uses its config. Later calls return the
/// same instances even if they pass a different config.
#[derive(Clone)]
pub struct SharedModels {
    ui: Ui,
    config: Arc<AppConfig>,
}

impl SharedModels {
    pub fn new(ui: Ui, config: &AppConfig) -> Self {
        Self {
            ui,
            config: Arc::new(config.to_owned()),
        }
    }

    /// Load both models now, instead of on first use.
    pub async fn preload(&self) -> Result<()> {
        self.ocr_engine().await?;
        self.translator().await?;
        Ok(())
    }
}

#[async_trait]
impl ModelProvider for SharedModels {
    async fn ocr_engine(&self) -> Result<Arc<dyn OcrEngine>> {
        OCR_ENGINE
            .get_or_try_init(|| async move {
                let sp = self.ui.new_spinner(&ProgressConfig {
                    emoji: "🔤",
                    msg: "Checking OCR engine",
                    done_msg: "OCR engine ready",
                });
                let engine = TesseractOcrEngine::new(&self.config.ocr)
                    .await
                    .context("cannot load OCR engine");
                finish_spinner(&sp, &engine, "OCR engine failed to load");
                Ok(Arc::new(engine?) as Arc<dyn OcrEngine>)
            })
            .await
    }

    async fn translator(&self) -> Result<Arc<dyn Translator>> {
        TRANSLATOR
            .get_or_try_init(|| async move {
                let sp = self.ui.new_spinner(&ProgressConfig {
                    emoji: "🧠",
                    msg: "Loading translation model",
                    done_msg: "Translation model ready",
                });
                let translator =
                    MarianTranslator::load(self.ui.clone(), &self.config.translation)
                        .await
                        .context("cannot load translation model");
                finish_spinner(&sp, &translator, "Translation model failed to load");
                Ok(Arc::new(translator?) as Arc<dyn Translator>)
            })
            .await
    }
}

/// Finish a spinner with its done message, or with `failed_msg` if the
/// work failed.
fn finish_spinner<T>(sp: &ProgressBar, result: &Result<T>, failed_msg: &'static str) {
    match result {
        Ok(_) => sp.finish_using_style(),
        Err(_) => sp.abandon_with_message(failed_msg),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[derive(Debug)]
    struct Expensive(usize);

    #[tokio::test]
    async fn loads_once_and_returns_the_same_instance() -> Result<()> {
        let cache = ResourceCache::<Expensive>::new();
        let loads = &AtomicUsize::new(0);
        let load = || async move {
            let n = loads.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(Expensive(n)))
        };

        let first = cache.get_or_try_init(load).await?;
        let second = cache.get_or_try_init(load).await?;
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(loads.load(Ordering::SeqCst), 1);
        assert_eq!(second.0, 0);
        Ok(())
    }

    #[tokio::test]
    async fn failed_load_is_not_cached() -> Result<()> {
        let cache = ResourceCache::<Expensive>::new();
        let failed = cache
            .get_or_try_init(|| async move { Err(anyhow!("weights missing")) })
            .await;
        assert!(failed.is_err());

        let loaded = cache
            .get_or_try_init(|| async move { Ok(Arc::new(Expensive(7))) })
            .await?;
        assert_eq!(loaded.0, 7);
        Ok(())
    }

    #[tokio::test]
    async fn concurrent_first_access_loads_once() -> Result<()> {
        let cache = Arc::new(ResourceCache::<Expensive>::new());
        let loads = Arc::new(AtomicUsize::new(0));
        let mut handles = vec![];
        for _ in 0..8 {
            let cache = cache.clone();
            let loads = loads.clone();
            handles.push(tokio::spawn(async move {
                cache
                    .get_or_try_init(|| async move {
                        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
                        Ok(Arc::new(Expensive(loads.fetch_add(1, Ordering::SeqCst))))
                    })
                    .await
            }));
        }
        let mut instances = vec![];
        for handle in handles {
            instances.push(handle.await??);
        }
        assert_eq!(loads.load(Ordering::SeqCst), 1);
        assert!(instances.iter().all(|i| Arc::ptr_eq(i, &instances[0])));
        Ok(())
    }

    #[tokio::test]
    #[ignore = "Requires tesseract with the nep and eng language packs"]
    async fn shared_ocr_engine_is_a_singleton() -> Result<()> {
        let models = SharedModels::new(Ui::init_for_tests(), &AppConfig::default());
        let first = models.ocr_engine().await?;
        let second = SharedModels::new(Ui::init_for_tests(), &AppConfig::default())
            .ocr_engine()
            .await?;
        assert!(Arc::ptr_eq(&first, &second));
        Ok(())
    }
}
