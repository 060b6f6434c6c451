//! Scroll cursor.
//!
//! A lazy, forward-only sequence over every hit of a query, fetched page by
//! page through a server-side cursor. The cursor owns its token and current
//! page, so it cannot be shared between consumers.

use std::collections::VecDeque;

use futures::stream::{self, Stream};
use serde_json::Value;
use tracing::{debug, warn};

use search_writer_repository::{SearchApiClient, SearchError};
use search_writer_shared::SearchHit;

/// Configuration for opening a [`ScrollCursor`].
#[derive(Debug, Clone)]
pub struct ScrollConfig {
    /// Hits per page.
    pub page_size: usize,
    /// How long the engine keeps the cursor alive between page fetches.
    pub ttl: String,
}

impl Default for ScrollConfig {
    fn default() -> Self {
        Self {
            page_size: 1000,
            ttl: "5m".to_string(),
        }
    }
}

impl ScrollConfig {
    pub fn new(page_size: usize, ttl: impl Into<String>) -> Self {
        Self {
            page_size,
            ttl: ttl.into(),
        }
    }
}

/// Single-pass iterator over a scrolled search.
pub struct ScrollCursor {
    client: SearchApiClient,
    ttl: String,
    token: Option<String>,
    page: VecDeque<Value>,
    total: u64,
    exhausted: bool,
}

impl ScrollCursor {
    /// Open a scroll over `clause` on `index`.
    ///
    /// The total is the match count when the cursor was opened; concurrent
    /// writes can make the actual number of hits differ.
    pub async fn open(
        client: SearchApiClient,
        index: &str,
        clause: Value,
        config: &ScrollConfig,
    ) -> Result<Self, SearchError> {
        let first = client
            .open_scroll(index, clause, config.page_size, &config.ttl)
            .await?;

        // Some engines answer the opening call with no hits and only a token.
        let exhausted = first.hits.is_empty() && first.total == 0;

        Ok(Self {
            client,
            ttl: config.ttl.clone(),
            token: first.token,
            page: first.hits.into(),
            total: first.total,
            exhausted,
        })
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    /// Next raw hit, fetching a page when the current one is used up.
    pub async fn next_raw(&mut self) -> Result<Option<Value>, SearchError> {
        loop {
            if let Some(hit) = self.page.pop_front() {
                return Ok(Some(hit));
            }
            if self.exhausted {
                self.release().await;
                return Ok(None);
            }
            let Some(token) = self.token.as_deref() else {
                self.exhausted = true;
                return Ok(None);
            };

            let page = self.client.scroll(token, &self.ttl).await?;
            if page.token.is_some() {
                self.token = page.token;
            }
            if page.hits.is_empty() {
                debug!(total = self.total, "Scroll exhausted");
                self.exhausted = true;
            } else {
                self.page = page.hits.into();
            }
        }
    }

    /// Next hit.
    ///
    /// A hit without the metadata needed to replay it is an error, not skipped.
    pub async fn next(&mut self) -> Result<Option<SearchHit>, SearchError> {
        match self.next_raw().await? {
            Some(raw) => SearchHit::from_value(&raw)
                .map(Some)
                .ok_or_else(|| SearchError::parse(format!("unparsable search hit: {}", raw))),
            None => Ok(None),
        }
    }

    /// Release the server-side cursor before it expires.
    pub async fn close(mut self) -> Result<(), SearchError> {
        match self.token.take() {
            Some(token) => self.client.clear_scroll(&token).await,
            None => Ok(()),
        }
    }

    /// Consume the cursor as a stream of hits. The stream ends after the first error.
    pub fn into_stream(self) -> impl Stream<Item = Result<SearchHit, SearchError>> + Send {
        stream::unfold(Some(self), |state| async move {
            let mut cursor = state?;
            match cursor.next().await {
                Ok(Some(hit)) => Some((Ok(hit), Some(cursor))),
                Ok(None) => None,
                Err(e) => Some((Err(e), None)),
            }
        })
    }

    async fn release(&mut self) {
        if let Some(token) = self.token.take() {
            if let Err(e) = self.client.clear_scroll(&token).await {
                warn!(error = %e, "Failed to clear exhausted scroll");
            }
        }
    }
}
