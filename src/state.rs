use std::collections::HashMap;

use tokio::sync::watch;

use crate::article::Article;

/// Header article plus the rest of the merged news-of-the-day list.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AggregatedFeed {
    pub header: Option<Article>,
    pub latest: Vec<Article>,
}

/// Everything the presentation layer renders from.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NewsState {
    pub selected_category: String,
    /// `None` until the first aggregation completes
    pub latest_news: Option<Vec<Article>>,
    pub header_article: Option<Article>,
    pub category_news: HashMap<String, Vec<Article>>,
    pub selected_article: Option<Article>,
    pub show_article_details: bool,
    /// Categories missing from the latest merge because their query failed
    pub latest_failures: HashMap<String, String>,
    /// Last failed category-feed fetch, cleared when that feed next loads
    pub category_failures: HashMap<String, String>,
}

/// Owns the published state. Views subscribe and read snapshots; only the
/// methods below mutate it, and every mutation notifies subscribers.
pub struct NewsStore {
    tx: watch::Sender<NewsState>,
}

impl NewsStore {
    pub fn new(initial_category: &str) -> Self {
        let state = NewsState {
            selected_category: initial_category.to_string(),
            ..NewsState::default()
        };
        Self {
            tx: watch::Sender::new(state),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<NewsState> {
        self.tx.subscribe()
    }

    pub fn snapshot(&self) -> NewsState {
        self.tx.borrow().clone()
    }

    pub fn selected_category(&self) -> String {
        self.tx.borrow().selected_category.clone()
    }

    pub fn category_feed(&self, category: &str) -> Option<Vec<Article>> {
        self.tx.borrow().category_news.get(category).cloned()
    }

    pub fn has_category_feed(&self, category: &str) -> bool {
        self.tx.borrow().category_news.contains_key(category)
    }

    pub fn publish_latest(&self, feed: AggregatedFeed) {
        self.tx.send_modify(|state| {
            state.header_article = feed.header;
            state.latest_news = Some(feed.latest);
        });
    }

    /// Replace the whole feed for one category. Other categories are untouched.
    pub fn replace_category_feed(&self, category: &str, articles: Vec<Article>) {
        self.tx.send_modify(|state| {
            state.category_news.insert(category.to_string(), articles);
        });
    }

    pub fn select_category(&self, category: &str) {
        self.tx.send_if_modified(|state| {
            if state.selected_category == category {
                return false;
            }
            state.selected_category = category.to_string();
            true
        });
    }

    pub fn select_article(&self, article: Article) {
        self.tx.send_modify(|state| {
            state.selected_article = Some(article);
            state.show_article_details = true;
        });
    }

    pub fn dismiss_article(&self) {
        self.tx.send_modify(|state| state.show_article_details = false);
    }

    /// Looks through the header, the latest list and every cached category.
    pub fn find_article(&self, id: &str) -> Option<Article> {
        let state = self.tx.borrow();
        state
            .header_article
            .iter()
            .chain(state.latest_news.iter().flatten())
            .chain(state.category_news.values().flatten())
            .find(|a| a.id == id)
            .cloned()
    }

    pub fn record_latest_failures(&self, failed: Vec<(String, String)>, succeeded: &[String]) {
        self.tx.send_if_modified(|state| {
            let mut changed = false;
            for category in succeeded {
                changed |= state.latest_failures.remove(category).is_some();
            }
            for (category, error) in failed {
                state.latest_failures.insert(category, error);
                changed = true;
            }
            changed
        });
    }

    /// `None` clears the category's feed error.
    pub fn record_category_result(&self, category: &str, error: Option<String>) {
        self.tx.send_if_modified(|state| match error {
            Some(error) => {
                state.category_failures.insert(category.to_string(), error);
                true
            }
            None => state.category_failures.remove(category).is_some(),
        });
    }
}
