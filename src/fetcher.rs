use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::RwLock;
use tracing::{error, info, warn};

use crate::article::{sort_newest_first, Article};
use crate::gateway::{CategoryGateway, GatewayError};
use crate::state::{AggregatedFeed, NewsStore};

/// Drives the gateway and publishes results into the store.
///
/// Queries run concurrently inside the calling task and the store is only
/// written once they have all finished, so observers never see a partial
/// merge.
pub struct Fetcher {
    gateway: Arc<CategoryGateway>,
    store: Arc<NewsStore>,
    categories: Vec<String>,
    refreshing: Arc<RwLock<bool>>,
}

impl Fetcher {
    pub fn new(
        gateway: Arc<CategoryGateway>,
        store: Arc<NewsStore>,
        categories: Vec<String>,
    ) -> Self {
        Self {
            gateway,
            store,
            categories,
            refreshing: Arc::new(RwLock::new(false)),
        }
    }

    pub fn categories(&self) -> &[String] {
        &self.categories
    }

    pub fn is_category(&self, name: &str) -> bool {
        self.categories.iter().any(|c| c == name)
    }

    pub async fn is_refreshing(&self) -> bool {
        *self.refreshing.read().await
    }

    /// Fan out one news-of-the-day query per category and publish the merge.
    pub async fn fetch_latest_news(&self) -> AggregatedFeed {
        let results = join_all(
            self.categories
                .iter()
                .map(|category| self.gateway.fetch_news_of_the_day(category)),
        )
        .await;

        let mut per_category = Vec::with_capacity(results.len());
        let mut failed = Vec::new();
        let mut succeeded = Vec::new();
        for (category, result) in self.categories.iter().zip(results) {
            match result {
                Ok(articles) => {
                    succeeded.push(category.clone());
                    per_category.push(articles);
                }
                Err(e) => failed.push((category.clone(), e.to_string())),
            }
        }

        if !failed.is_empty() {
            warn!(
                failed = failed.len(),
                total = self.categories.len(),
                "Some categories failed, merging the rest"
            );
        }

        let feed = merge_latest(per_category);
        info!(
            articles = feed.latest.len(),
            has_header = feed.header.is_some(),
            "Latest news merged"
        );

        self.store.record_latest_failures(failed, &succeeded);
        self.store.publish_latest(feed.clone());
        feed
    }

    /// Fetch the selected category and replace its stored feed.
    ///
    /// The category is captured before the query starts, so switching the
    /// selection mid-flight still stores the result under the right key.
    /// On failure the previously stored feed is kept.
    pub async fn fetch_current_category_feed(&self) -> Result<(), GatewayError> {
        let category = self.store.selected_category();
        self.fetch_category(&category).await
    }

    async fn fetch_category(&self, category: &str) -> Result<(), GatewayError> {
        match self.gateway.fetch_category_feed(category).await {
            Ok(mut articles) => {
                sort_newest_first(&mut articles);
                info!(category = category, articles = articles.len(), "Category feed fetched");
                self.store.record_category_result(category, None);
                self.store.replace_category_feed(category, articles);
                Ok(())
            }
            Err(e) => {
                self.store.record_category_result(category, Some(e.to_string()));
                Err(e)
            }
        }
    }

    /// Select a category, fetching it only if nothing is cached for it yet.
    pub async fn select_category(&self, category: &str) -> Option<Vec<Article>> {
        self.store.select_category(category);
        if !self.store.has_category_feed(category) {
            // a failure is kept in the store for the caller to report
            let _ = self.fetch_category(category).await;
        }
        self.store.category_feed(category)
    }

    pub async fn refresh_all(&self) -> anyhow::Result<()> {
        // Check if already refreshing
        {
            let mut refreshing = self.refreshing.write().await;
            if *refreshing {
                info!("Refresh already in progress, skipping");
                return Ok(());
            }
            *refreshing = true;
        }

        self.fetch_latest_news().await;
        let category_feed = self.fetch_current_category_feed().await;

        {
            let mut refreshing = self.refreshing.write().await;
            *refreshing = false;
        }

        // every configured category was either cleared or recorded above
        let latest_failed = self.store.snapshot().latest_failures.len();
        match (latest_failed, category_feed) {
            (0, Ok(())) => {
                info!("News refresh complete");
                Ok(())
            }
            (0, Err(e)) => anyhow::bail!("Category feed refresh failed: {}", e),
            (n, Ok(())) => anyhow::bail!("{} categories failed the latest news refresh", n),
            (n, Err(e)) => anyhow::bail!(
                "{} categories failed the latest news refresh; category feed failed: {}",
                n,
                e
            ),
        }
    }
}

/// Merge per-category results newest first.
///
/// The header is the newest article. With two or more articles the latest
/// list is everything after the header; with zero or one it is the whole
/// merge, header included.
pub fn merge_latest(per_category: Vec<Vec<Article>>) -> AggregatedFeed {
    let mut merged: Vec<Article> = per_category.into_iter().flatten().collect();
    sort_newest_first(&mut merged);

    let header = merged.first().cloned();
    let latest = if merged.len() > 1 {
        merged.split_off(1)
    } else {
        merged
    };

    AggregatedFeed { header, latest }
}

pub async fn start_background_refresh(fetcher: Arc<Fetcher>, interval_minutes: u64) {
    let interval = Duration::from_secs(interval_minutes * 60);

    // Do initial fetch
    info!("Starting initial news fetch");
    if let Err(e) = fetcher.refresh_all().await {
        error!("Initial news fetch failed: {}", e);
    }

    loop {
        tokio::time::sleep(interval).await;
        info!("Starting scheduled news refresh");
        if let Err(e) = fetcher.refresh_all().await {
            error!("Scheduled news refresh failed: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::test_support::{loader, FakeHttp, FakeStorage};
    use crate::assets::{AssetOptions, AssetRegistry};
    use crate::gateway::test_support::{article_fields, raw, FakeStore};
    use crate::remote::DiskCache;
    use proptest::prelude::*;

    fn article(id: &str, ts: f64) -> Article {
        Article {
            id: id.to_string(),
            created_at: ts,
            ..Article::placeholder()
        }
    }

    fn ids(articles: &[Article]) -> Vec<&str> {
        articles.iter().map(|a| a.id.as_str()).collect()
    }

    fn fetcher_with(store: Arc<FakeStore>, categories: &[&str]) -> (Fetcher, Arc<NewsStore>) {
        let storage = Arc::new(FakeStorage::default());
        let http = Arc::new(FakeHttp::new(storage.clone()));
        let assets = Arc::new(AssetRegistry::new(loader(
            storage,
            http,
            DiskCache::new(std::env::temp_dir().join("matchday-news-fetcher-tests")),
            AssetOptions::default(),
        )));
        let gateway = Arc::new(CategoryGateway::new(store, assets, 10, 50));
        let news = Arc::new(NewsStore::new(categories[0]));
        let fetcher = Fetcher::new(
            gateway,
            news.clone(),
            categories.iter().map(|c| c.to_string()).collect(),
        );
        (fetcher, news)
    }

    fn seed(store: &FakeStore, category: &str, stamps: &[f64], of_the_day: bool) {
        for ts in stamps {
            store.insert(
                category,
                raw(
                    &format!("{}-{}", category, ts),
                    article_fields(category, *ts, of_the_day),
                ),
            );
        }
    }

    mod merge_tests {
        use super::*;

        #[test]
        fn test_merge_example_two_categories() {
            let feed = merge_latest(vec![
                vec![article("a100", 100.0), article("a50", 50.0)],
                vec![article("b90", 90.0)],
            ]);

            assert_eq!(feed.header.unwrap().id, "a100");
            assert_eq!(ids(&feed.latest), vec!["b90", "a50"]);
        }

        #[test]
        fn test_single_article_passes_through() {
            let feed = merge_latest(vec![vec![article("only", 10.0)]]);

            assert_eq!(feed.header.as_ref().unwrap().id, "only");
            assert_eq!(ids(&feed.latest), vec!["only"]);
        }

        #[test]
        fn test_empty_merge() {
            let feed = merge_latest(vec![vec![], vec![]]);

            assert!(feed.header.is_none());
            assert!(feed.latest.is_empty());
        }

        #[test]
        fn test_ties_keep_category_order() {
            let feed = merge_latest(vec![
                vec![article("a", 5.0), article("a-new", 9.0)],
                vec![article("b", 5.0)],
            ]);

            assert_eq!(feed.header.unwrap().id, "a-new");
            assert_eq!(ids(&feed.latest), vec!["a", "b"]);
        }
    }

    proptest! {
        #[test]
        fn prop_merge_is_sorted_stable_and_complete(
            groups in prop::collection::vec(prop::collection::vec(0u8..20, 0..6), 0..5)
        ) {
            let per_category: Vec<Vec<Article>> = groups
                .iter()
                .enumerate()
                .map(|(c, stamps)| {
                    stamps
                        .iter()
                        .enumerate()
                        .map(|(i, ts)| article(&format!("{}-{}", c, i), *ts as f64))
                        .collect()
                })
                .collect();
            let input_order: Vec<String> = per_category
                .iter()
                .flatten()
                .map(|a| a.id.clone())
                .collect();
            let total = input_order.len();

            let feed = merge_latest(per_category);

            let mut full: Vec<Article> = feed.header.iter().cloned().collect();
            if total > 1 {
                full.extend(feed.latest.iter().cloned());
            } else {
                prop_assert_eq!(&feed.latest, &full);
            }
            prop_assert_eq!(full.len(), total);
            prop_assert_eq!(feed.header.is_none(), total == 0);

            for pair in full.windows(2) {
                prop_assert!(pair[0].created_at >= pair[1].created_at);
                if pair[0].created_at == pair[1].created_at {
                    let first = input_order.iter().position(|id| *id == pair[0].id);
                    let second = input_order.iter().position(|id| *id == pair[1].id);
                    prop_assert!(first < second);
                }
            }
        }
    }

    mod latest_news_tests {
        use super::*;

        #[tokio::test]
        async fn test_fetch_latest_news_publishes_merge() {
            let store = Arc::new(FakeStore::default());
            seed(&store, "A", &[50.0, 100.0], true);
            seed(&store, "B", &[90.0], true);
            seed(&store, "B", &[200.0], false);
            let (fetcher, news) = fetcher_with(store.clone(), &["A", "B"]);

            let feed = fetcher.fetch_latest_news().await;

            assert_eq!(feed.header.as_ref().unwrap().created_at, 100.0);
            let state = news.snapshot();
            assert_eq!(state.header_article, feed.header);
            let stamps: Vec<f64> = state
                .latest_news
                .unwrap()
                .iter()
                .map(|a| a.created_at)
                .collect();
            assert_eq!(stamps, vec![90.0, 50.0]);
            assert_eq!(store.total_calls(), 2);
        }

        #[tokio::test]
        async fn test_nothing_published_until_every_category_finishes() {
            let mut fake = FakeStore::default();
            fake.delays
                .insert("Slow".to_string(), Duration::from_millis(100));
            let store = Arc::new(fake);
            seed(&store, "Fast", &[1.0], true);
            seed(&store, "Slow", &[2.0], true);
            let (fetcher, news) = fetcher_with(store.clone(), &["Fast", "Slow"]);
            let fetcher = Arc::new(fetcher);

            let handle = tokio::spawn({
                let fetcher = fetcher.clone();
                async move { fetcher.fetch_latest_news().await }
            });

            tokio::time::sleep(Duration::from_millis(30)).await;
            assert_eq!(store.total_calls(), 2);
            assert!(news.snapshot().latest_news.is_none());

            handle.await.unwrap();
            let state = news.snapshot();
            assert_eq!(state.header_article.unwrap().created_at, 2.0);
            assert_eq!(state.latest_news.unwrap().len(), 1);
        }

        #[tokio::test]
        async fn test_failed_category_contributes_nothing_and_is_recorded() {
            let store = Arc::new(FakeStore::default());
            seed(&store, "A", &[10.0, 20.0], true);
            seed(&store, "B", &[30.0], true);
            store.fail("B");
            let (fetcher, news) = fetcher_with(store, &["A", "B"]);

            let feed = fetcher.fetch_latest_news().await;

            assert_eq!(feed.header.unwrap().created_at, 20.0);
            let state = news.snapshot();
            assert!(state.latest_failures.contains_key("B"));
            assert!(!state.latest_failures.contains_key("A"));
        }

        #[tokio::test]
        async fn test_category_feed_success_keeps_latest_failure() {
            let store = Arc::new(FakeStore::default());
            seed(&store, "Arsenal", &[1.0], true);
            store.fail("Arsenal");
            let (fetcher, news) = fetcher_with(store.clone(), &["Arsenal"]);

            fetcher.fetch_latest_news().await;
            store.recover("Arsenal");
            fetcher.fetch_current_category_feed().await.unwrap();

            let state = news.snapshot();
            assert!(state.latest_failures.contains_key("Arsenal"));
            assert!(state.category_failures.is_empty());
        }
    }

    mod category_feed_tests {
        use super::*;

        #[tokio::test]
        async fn test_fetch_current_category_sorts_descending() {
            let store = Arc::new(FakeStore::default());
            seed(&store, "Arsenal", &[1.0, 2.0, 3.0], false);
            let (fetcher, news) = fetcher_with(store, &["Arsenal", "Chelsea"]);

            fetcher.fetch_current_category_feed().await.unwrap();

            let feed = news.category_feed("Arsenal").unwrap();
            let stamps: Vec<f64> = feed.iter().map(|a| a.created_at).collect();
            assert_eq!(stamps, vec![3.0, 2.0, 1.0]);
            assert!(news.category_feed("Chelsea").is_none());
        }

        #[tokio::test]
        async fn test_switching_categories_keeps_cached_feeds() {
            let store = Arc::new(FakeStore::default());
            seed(&store, "Arsenal", &[1.0, 2.0], false);
            seed(&store, "Chelsea", &[5.0], false);
            let (fetcher, news) = fetcher_with(store.clone(), &["Arsenal", "Chelsea"]);

            fetcher.fetch_current_category_feed().await.unwrap();
            let arsenal = news.category_feed("Arsenal").unwrap();

            let chelsea = fetcher.select_category("Chelsea").await.unwrap();
            assert_eq!(chelsea.len(), 1);

            let back = fetcher.select_category("Arsenal").await.unwrap();

            assert_eq!(back, arsenal);
            assert_eq!(store.query_count("Arsenal"), 1);
            assert_eq!(store.query_count("Chelsea"), 1);
            assert_eq!(news.selected_category(), "Arsenal");
        }

        #[tokio::test]
        async fn test_failed_category_fetch_keeps_previous_feed() {
            let store = Arc::new(FakeStore::default());
            seed(&store, "Arsenal", &[1.0], false);
            let (fetcher, news) = fetcher_with(store.clone(), &["Arsenal"]);

            fetcher.fetch_current_category_feed().await.unwrap();
            store.fail("Arsenal");
            assert!(fetcher.fetch_current_category_feed().await.is_err());

            assert_eq!(news.category_feed("Arsenal").unwrap().len(), 1);
            assert!(news.snapshot().category_failures.contains_key("Arsenal"));
        }

        #[tokio::test]
        async fn test_latest_success_keeps_category_feed_failure() {
            let store = Arc::new(FakeStore::default());
            seed(&store, "Arsenal", &[1.0], true);
            store.fail_feed("Arsenal");
            let (fetcher, news) = fetcher_with(store, &["Arsenal"]);

            assert!(fetcher.fetch_current_category_feed().await.is_err());
            let feed = fetcher.fetch_latest_news().await;

            assert!(feed.header.is_some());
            let state = news.snapshot();
            assert!(state.category_failures.contains_key("Arsenal"));
            assert!(state.latest_failures.is_empty());
        }
    }

    mod refresh_tests {
        use super::*;

        #[tokio::test]
        async fn test_refresh_all_runs_both_fetches() {
            let store = Arc::new(FakeStore::default());
            seed(&store, "Arsenal", &[1.0], true);
            let (fetcher, news) = fetcher_with(store, &["Arsenal"]);

            fetcher.refresh_all().await.unwrap();

            let state = news.snapshot();
            assert!(state.header_article.is_some());
            assert!(state.category_news.contains_key("Arsenal"));
            assert!(!fetcher.is_refreshing().await);
        }

        #[tokio::test]
        async fn test_refresh_all_reports_failures() {
            let store = Arc::new(FakeStore::default());
            store.fail("Arsenal");
            let (fetcher, _news) = fetcher_with(store, &["Arsenal"]);

            assert!(fetcher.refresh_all().await.is_err());
            assert!(!fetcher.is_refreshing().await);
        }

        #[tokio::test]
        async fn test_refresh_all_reports_category_feed_failure_alone() {
            let store = Arc::new(FakeStore::default());
            seed(&store, "Arsenal", &[1.0], true);
            store.fail_feed("Arsenal");
            let (fetcher, news) = fetcher_with(store, &["Arsenal"]);

            let result = fetcher.refresh_all().await;

            assert!(result.is_err());
            assert!(news.snapshot().header_article.is_some());
        }

        #[tokio::test]
        async fn test_concurrent_refresh_is_skipped() {
            let mut fake = FakeStore::default();
            fake.delays
                .insert("Arsenal".to_string(), Duration::from_millis(50));
            let store = Arc::new(fake);
            let (fetcher, _news) = fetcher_with(store.clone(), &["Arsenal"]);

            let (first, second) = tokio::join!(fetcher.refresh_all(), async {
                tokio::time::sleep(Duration::from_millis(10)).await;
                fetcher.refresh_all().await
            });

            assert!(first.is_ok());
            assert!(second.is_ok());
            // one latest-news query plus one category query
            assert_eq!(store.total_calls(), 2);
        }
    }

    #[test]
    fn test_category_lookup() {
        let (fetcher, _news) = fetcher_with(Arc::new(FakeStore::default()), &["Arsenal", "Wolves"]);

        assert!(fetcher.is_category("Wolves"));
        assert!(!fetcher.is_category("Barcelona"));
        assert_eq!(fetcher.categories().len(), 2);
    }
}
