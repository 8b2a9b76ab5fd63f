//! Concurrent discovery of every activity page.
//!
//! The provider exposes no total count, so pages are claimed from an open-ended
//! queue of indices by a fixed pool of workers until one of them sees an empty
//! page. Workers report each page's outcome over a channel to the coordinating
//! task, which is the only owner of the [`PageStore`].

use crate::retry::RetryPolicy;
use crate::{AccessToken, Activity, FetchError, MAX_PER_PAGE, Page, StravaClient};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;

/// What to do when a page cannot be fetched.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Stop claiming pages and fail the whole download.
    #[default]
    Abort,
    /// Record the page as a gap and keep going. The run still stops on a fatal
    /// client error or after too many failures in a row.
    SkipPage,
}

#[derive(Clone, Debug)]
pub struct PaginationConfig {
    pub per_page: u32,
    /// Number of concurrent page fetches.
    pub workers: usize,
    /// Pages above this index are paced by `pacing_delay`. `None` disables pacing.
    pub pacing_threshold: Option<u32>,
    pub pacing_delay: Duration,
    pub failure_policy: FailurePolicy,
    pub retry: RetryPolicy,
    /// Never claim a page above this index.
    pub max_pages: Option<u32>,
    /// Under [`FailurePolicy::SkipPage`], stop after this many failed pages
    /// with no successful page in between.
    pub max_consecutive_failures: u32,
}

impl Default for PaginationConfig {
    fn default() -> Self {
        Self {
            per_page: MAX_PER_PAGE,
            workers: 8,
            pacing_threshold: Some(10),
            pacing_delay: Duration::from_millis(250),
            failure_policy: FailurePolicy::Abort,
            retry: RetryPolicy::default(),
            max_pages: None,
            max_consecutive_failures: 5,
        }
    }
}

/// Stop flag shared by every worker. Once set it stays set.
#[derive(Clone, Debug)]
pub struct TerminationSignal {
    tx: Arc<watch::Sender<bool>>,
}

impl Default for TerminationSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl TerminationSignal {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Set the flag. Returns `true` only for the call that flipped it.
    pub fn set(&self) -> bool {
        self.tx.send_if_modified(|stopped| {
            if *stopped {
                false
            } else {
                *stopped = true;
                true
            }
        })
    }

    pub fn is_set(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolves once the flag has been set.
    pub async fn wait(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives in `self`, so `wait_for` cannot observe a closed channel.
        let _ = rx.wait_for(|stopped| *stopped).await;
    }
}

/// Activities keyed by the page index that produced them.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PageStore {
    pages: BTreeMap<u32, Vec<Activity>>,
}

impl PageStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a page. A page index is written at most once; a second write is
    /// refused and handed back.
    pub fn insert(&mut self, page: Page) -> Result<(), Page> {
        if self.pages.contains_key(&page.index) {
            return Err(page);
        }
        self.pages.insert(page.index, page.activities);
        Ok(())
    }

    pub fn get(&self, index: u32) -> Option<&[Activity]> {
        self.pages.get(&index).map(Vec::as_slice)
    }

    /// Recorded page indices in ascending order.
    pub fn indices(&self) -> impl Iterator<Item = u32> + '_ {
        self.pages.keys().copied()
    }

    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    pub fn total_activities(&self) -> usize {
        self.pages.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    /// Consume the store, yielding pages in ascending index order.
    pub fn into_pages(self) -> impl Iterator<Item = (u32, Vec<Activity>)> {
        self.pages.into_iter()
    }
}

impl FromIterator<Page> for PageStore {
    fn from_iter<I: IntoIterator<Item = Page>>(iter: I) -> Self {
        let mut store = PageStore::new();
        for page in iter {
            // Later duplicates lose, as they would during a download.
            let _ = store.insert(page);
        }
        store
    }
}

/// A page that could not be fetched.
#[derive(Debug)]
pub struct PageFailure {
    pub page: u32,
    pub error: FetchError,
}

/// Everything the coordinator learned during one download.
#[derive(Debug, Default)]
pub struct DownloadReport {
    pub pages: PageStore,
    /// Index of the first empty page, if one was seen.
    pub terminal_page: Option<u32>,
    /// Pages recorded as gaps under [`FailurePolicy::SkipPage`], or the failures
    /// that stopped an aborted run.
    pub failures: Vec<PageFailure>,
    /// Page requests issued, counting retries as one.
    pub requests: u32,
    /// The failure that cut a [`FailurePolicy::SkipPage`] run short.
    pub halted_by: Option<PageFailure>,
}

impl DownloadReport {
    /// True when the listing was read to its end with no gaps.
    pub fn is_complete(&self) -> bool {
        self.terminal_page.is_some() && self.failures.is_empty() && self.halted_by.is_none()
    }
}

enum PageOutcome {
    Fetched(Page),
    Terminal(u32),
    Failed(PageFailure),
}

/// Drives page fetches for one access token.
pub struct PaginationCoordinator<C: StravaClient + ?Sized> {
    client: Arc<C>,
    config: PaginationConfig,
}

impl<C: StravaClient + ?Sized> PaginationCoordinator<C> {
    pub fn new(client: Arc<C>, config: PaginationConfig) -> Self {
        Self { client, config }
    }

    pub fn config(&self) -> &PaginationConfig {
        &self.config
    }

    /// Fetch pages until the terminal page is found and return what was gathered.
    ///
    /// Failures never return early here; they are collected in the report
    /// according to the configured [`FailurePolicy`].
    pub async fn run(&self, token: &AccessToken) -> DownloadReport {
        let workers = self.config.workers.max(1);
        let next_page = Arc::new(AtomicU32::new(1));
        let stop = TerminationSignal::new();
        let token = Arc::new(token.clone());
        let (tx, mut rx) = mpsc::channel::<PageOutcome>(workers * 2);

        tracing::info!(workers, per_page = self.config.per_page, "starting page download");

        let mut join_set = JoinSet::new();
        for worker in 0..workers {
            let ctx = WorkerContext {
                client: Arc::clone(&self.client),
                config: self.config.clone(),
                token: Arc::clone(&token),
                next_page: Arc::clone(&next_page),
                stop: stop.clone(),
                tx: tx.clone(),
            };
            join_set.spawn(async move { ctx.run(worker).await });
        }
        // Workers hold the remaining senders; the loop below ends when all exit.
        drop(tx);

        let skip = self.config.failure_policy == FailurePolicy::SkipPage;
        let max_streak = self.config.max_consecutive_failures.max(1);
        let mut streak = 0u32;
        let mut report = DownloadReport::default();
        while let Some(outcome) = rx.recv().await {
            report.requests += 1;
            match outcome {
                PageOutcome::Fetched(page) => {
                    streak = 0;
                    let index = page.index;
                    let count = page.activities.len();
                    if let Err(dup) = report.pages.insert(page) {
                        tracing::warn!(page = dup.index, "page recorded twice, keeping first copy");
                    } else {
                        metrics::counter!("strava_pages_fetched_total").increment(1);
                        tracing::debug!(page = index, count, "page stored");
                    }
                }
                PageOutcome::Terminal(index) => {
                    streak = 0;
                    let first = report.terminal_page.map_or(index, |t| t.min(index));
                    report.terminal_page = Some(first);
                }
                PageOutcome::Failed(failure) => {
                    metrics::counter!("strava_page_failures_total").increment(1);
                    tracing::warn!(page = failure.page, error = %failure.error, "page failed");
                    streak += 1;
                    let halt = failure.error.is_fatal() || streak >= max_streak;
                    if skip && halt && report.halted_by.is_none() {
                        stop.set();
                        tracing::error!(
                            page = failure.page,
                            streak,
                            "giving up on remaining pages"
                        );
                        report.halted_by = Some(failure);
                    } else {
                        report.failures.push(failure);
                    }
                }
            }
        }

        while let Some(joined) = join_set.join_next().await {
            if let Err(e) = joined {
                tracing::error!(error = %e, "page worker panicked");
                report.failures.push(PageFailure {
                    page: 0,
                    error: FetchError::Worker(e.to_string()),
                });
            }
        }
        report.failures.sort_by_key(|f| f.page);

        tracing::info!(
            pages = report.pages.page_count(),
            activities = report.pages.total_activities(),
            terminal_page = ?report.terminal_page,
            failures = report.failures.len(),
            requests = report.requests,
            "page download finished"
        );
        report
    }

    /// Like [`run`](Self::run), but under [`FailurePolicy::Abort`] the first page
    /// failure is returned as the error and no partial result escapes. A halted
    /// [`FailurePolicy::SkipPage`] run returns the failure that halted it.
    pub async fn download_all(&self, token: &AccessToken) -> Result<DownloadReport, FetchError> {
        let mut report = self.run(token).await;
        let abort = self.config.failure_policy == FailurePolicy::Abort;
        if abort && !report.failures.is_empty() {
            return Err(report.failures.swap_remove(0).error);
        }
        if let Some(halt) = report.halted_by.take() {
            return Err(halt.error);
        }
        Ok(report)
    }
}

struct WorkerContext<C: StravaClient + ?Sized> {
    client: Arc<C>,
    config: PaginationConfig,
    token: Arc<AccessToken>,
    next_page: Arc<AtomicU32>,
    stop: TerminationSignal,
    tx: mpsc::Sender<PageOutcome>,
}

impl<C: StravaClient + ?Sized> WorkerContext<C> {
    async fn run(self, worker: usize) {
        loop {
            // The flag is only consulted before claiming, so every claimed index
            // below the terminal page is fetched to completion.
            if self.stop.is_set() {
                break;
            }
            let page = self.next_page.fetch_add(1, Ordering::SeqCst);
            if self.config.max_pages.is_some_and(|max| page > max) {
                tracing::debug!(worker, page, "page cap reached");
                break;
            }
            if self.config.pacing_threshold.is_some_and(|t| page > t) {
                tokio::time::sleep(self.config.pacing_delay).await;
            }

            let outcome = match self.fetch(page).await {
                Ok(p) if p.is_terminal() => {
                    if self.stop.set() {
                        tracing::debug!(worker, page, "terminal page found");
                    }
                    PageOutcome::Terminal(page)
                }
                Ok(p) => PageOutcome::Fetched(p),
                Err(error) => {
                    if self.config.failure_policy == FailurePolicy::Abort {
                        self.stop.set();
                    }
                    PageOutcome::Failed(PageFailure { page, error })
                }
            };
            if self.tx.send(outcome).await.is_err() {
                break;
            }
        }
    }

    async fn fetch(&self, page: u32) -> Result<Page, FetchError> {
        let per_page = self.config.per_page;
        self.config
            .retry
            .retry_async(
                || self.client.fetch_activities_page(&self.token, page, per_page),
                FetchError::is_transient,
            )
            .await
    }
}
