use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, warn};

use crate::article::Article;
use crate::assets::AssetRegistry;
use crate::db::{DocumentStore, Query, RawRecord, StoreError};

const NEWS_OF_THE_DAY_FIELD: &str = "newsOfTheDay";
const CREATED_AT_FIELD: &str = "createdAt";

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("Query for '{category}' failed: {source}")]
    Store {
        category: String,
        #[source]
        source: StoreError,
    },
}

/// Runs one collection query per call and decodes the results.
///
/// `Ok(vec![])` means the category has no matching articles; a transport
/// problem is always an `Err`.
pub struct CategoryGateway {
    store: Arc<dyn DocumentStore>,
    assets: Arc<AssetRegistry>,
    news_of_the_day_limit: usize,
    category_feed_limit: usize,
}

impl CategoryGateway {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        assets: Arc<AssetRegistry>,
        news_of_the_day_limit: usize,
        category_feed_limit: usize,
    ) -> Self {
        Self {
            store,
            assets,
            news_of_the_day_limit,
            category_feed_limit,
        }
    }

    /// The most recent flagged articles, oldest first.
    pub async fn fetch_news_of_the_day(
        &self,
        category: &str,
    ) -> Result<Vec<Article>, GatewayError> {
        let query = Query::collection(category, CREATED_AT_FIELD)
            .where_eq(NEWS_OF_THE_DAY_FIELD, true)
            .limit_to_last(self.news_of_the_day_limit);
        self.run(category, &query).await
    }

    /// The most recent articles of the category, oldest first.
    pub async fn fetch_category_feed(&self, category: &str) -> Result<Vec<Article>, GatewayError> {
        let query =
            Query::collection(category, CREATED_AT_FIELD).limit_to_last(self.category_feed_limit);
        self.run(category, &query).await
    }

    async fn run(&self, category: &str, query: &Query) -> Result<Vec<Article>, GatewayError> {
        let records = self.store.query(query).await.map_err(|source| {
            warn!(category = category, error = %source, "Category query failed");
            GatewayError::Store {
                category: category.to_string(),
                source,
            }
        })?;

        let articles = decode_records(category, &records);
        self.assets.register_all(&articles).await;
        Ok(articles)
    }
}

/// Malformed records are dropped; the rest of the batch survives.
pub fn decode_records(category: &str, records: &[RawRecord]) -> Vec<Article> {
    records
        .iter()
        .filter_map(|record| match Article::from_record(record) {
            Ok(article) => Some(article),
            Err(e) => {
                debug!(
                    category = category,
                    id = %record.id,
                    error = %e,
                    "Dropping malformed article"
                );
                None
            }
        })
        .collect()
}
