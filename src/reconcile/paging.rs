//! Page-numbered listing drain
//!
//! Handles the pagination loop only; the caller supplies the page fetch and
//! decides what to do with each entity as it arrives.

use super::error::ReconcileError;
use super::resource::Page;
use log::debug;
use std::future::Future;

#[derive(Debug, Clone, Copy)]
pub struct PagedFetcher {
    page_size: u32,
}

impl PagedFetcher {
    pub fn new(page_size: u32) -> Result<Self, ReconcileError> {
        if page_size == 0 {
            return Err(ReconcileError::InvalidArgument(
                "page size must be greater than zero".to_string(),
            ));
        }
        Ok(Self { page_size })
    }

    pub fn page_size(&self) -> u32 {
        self.page_size
    }

    /// Drain every page starting at page 1.
    ///
    /// Stops on a short page, an empty page, or `has_more == false`; the page
    /// function is not called again after that. `on_item` sees each entity
    /// once, in listing order, as its page is consumed.
    pub async fn fetch_all<T, E, F, Fut, S>(&self, mut fetch_page: F, mut on_item: S) -> Result<Vec<T>, E>
    where
        F: FnMut(u32, u32) -> Fut,
        Fut: Future<Output = Result<Page<T>, E>>,
        S: FnMut(&T),
    {
        let mut collected = Vec::new();
        let mut page_number = 1;

        loop {
            let page = fetch_page(page_number, self.page_size).await?;
            let received = page.items.len();
            debug!(
                "Listing page {}: {} entities (page size {}, has_more: {})",
                page_number, received, self.page_size, page.has_more
            );

            for item in &page.items {
                on_item(item);
            }
            collected.extend(page.items);

            if received == 0 || received < self.page_size as usize || !page.has_more {
                break;
            }
            page_number += 1;
        }

        debug!("Listing drained: {} entities over {} pages", collected.len(), page_number);
        Ok(collected)
    }
}
