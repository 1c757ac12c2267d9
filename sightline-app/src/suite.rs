use anyhow::Result;
use regex::Regex;
use sightline_agent::{Integrations, Orchestrator};
use sightline_cache::ActionCache;
use sightline_common::{SightlineConfig, Size};
use sightline_drivers::Driver;
use sightline_llm::ensure_llm_ready;
use sightline_runner::{compile_pattern, discover, RunSummary, Runner, TestWatcher, DEFAULT_DEBOUNCE};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// The launched driver and the runner wired against it.
pub struct Suite {
    config: SightlineConfig,
    pattern: Option<Regex>,
    driver: Arc<Driver>,
    runner: Runner,
}

impl Suite {
    /// Validate the model and integrations first; the driver is launched last
    /// so a bad config never leaves a server running.
    pub async fn build(config: SightlineConfig, pattern: Option<&str>) -> Result<Self> {
        let pattern = compile_pattern(pattern)?;
        let llm = ensure_llm_ready(&config.ai)?;
        let integrations = Integrations::from_config(&config)?;
        let display = Size {
            width: config.browser.viewport_width,
            height: config.browser.viewport_height,
        };
        let orchestrator = Orchestrator::new(llm, config.ai.clone(), config.retry.clone())
            .with_integrations(integrations.clone())
            .with_display(display);

        let mut driver = Driver::new(
            config.browser.clone(),
            config.screenshots.clone(),
            config.headless,
        );
        driver.launch().await?;
        let driver = Arc::new(driver);

        let mut runner = Runner::new(driver.clone(), Arc::new(orchestrator))
            .with_integrations(integrations)
            .with_base_url(config.base_url.clone());
        if config.cache.enabled {
            let cache = ActionCache::new(&config.cache);
            match cache.purge_expired().await {
                Ok(0) => {}
                Ok(purged) => tracing::info!(purged, "app.cache.purged"),
                Err(e) => tracing::warn!(error = %e, "app.cache.purge_failed"),
            }
            runner = runner.with_cache(cache);
        } else {
            tracing::info!("app.cache.disabled");
        }

        Ok(Self {
            config,
            pattern,
            driver,
            runner,
        })
    }

    /// Discover and run every selected test file once.
    pub async fn run_once(&self) -> Result<RunSummary> {
        let files = discover(
            &self.config.test_dir,
            &self.config.test_suffix,
            self.pattern.as_ref(),
        )?;
        if files.is_empty() {
            tracing::warn!(dir = %self.config.test_dir.display(), "app.run.no_test_files");
        }
        let summary = self.runner.run_files(&files).await;
        print!("{}", summary.render());
        Ok(summary)
    }

    /// Re-run changed files until `cancel` fires. Returns the exit code of
    /// the last run, or `initial` if nothing changed.
    pub async fn watch(&self, cancel: &CancellationToken, initial: i32) -> Result<i32> {
        let mut watcher = TestWatcher::new(
            &self.config.test_dir,
            self.config.test_suffix.clone(),
            self.pattern.clone(),
            DEFAULT_DEBOUNCE,
        )?;
        println!("Watching {} for changes (ctrl-c to stop)", self.config.test_dir.display());

        let mut code = initial;
        while let Some(files) = watcher.next_batch(cancel).await {
            let summary = self.runner.run_files(&files).await;
            print!("{}", summary.render());
            code = summary.exit_code();
        }
        Ok(code)
    }

    /// Stop the WebDriver server.
    pub async fn shutdown(self) {
        drop(self.runner);
        match Arc::try_unwrap(self.driver) {
            Ok(mut driver) => {
                if let Err(e) = driver.destroy().await {
                    tracing::warn!(error = %e, "app.driver.destroy_failed");
                }
            }
            // Still shared; the server is killed when the last handle drops.
            Err(_) => tracing::warn!("app.driver.still_shared"),
        }
    }
}
