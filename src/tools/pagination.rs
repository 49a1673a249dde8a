//! Walks the paged AADT history table of one (station, direction) view.
//!
//! ```text
//! WAITING_FOR_TABLE --visible--> READING_ROWS --next enabled--> NEXT_PAGE --click--> WAITING_FOR_TABLE
//!        |                             |
//!        +--timeout--> DONE            +--next absent / disabled / error / page cap--> DONE
//! ```
//!
//! Whatever was accumulated before a terminal condition is always returned.

use std::collections::HashSet;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::core::config::{DelayRange, HarvestConfig, Selectors};
use crate::core::error::DriverError;
use crate::core::types::{AadtRecord, Extraction, Termination};
use crate::scraping::driver::PageSession;
use crate::scraping::markup;

pub struct PaginationExtractor<'a> {
    selectors: &'a Selectors,
    element_timeout: Duration,
    max_pages: usize,
    page_settle: DelayRange,
}

impl<'a> PaginationExtractor<'a> {
    pub fn new(
        selectors: &'a Selectors,
        element_timeout: Duration,
        max_pages: usize,
        page_settle: DelayRange,
    ) -> Self {
        Self {
            selectors,
            element_timeout,
            max_pages: max_pages.max(1),
            page_settle,
        }
    }

    pub fn from_config(cfg: &'a HarvestConfig) -> Self {
        Self::new(
            &cfg.selectors,
            cfg.extraction.element_timeout(),
            cfg.extraction.max_pages,
            cfg.pacing.page_settle,
        )
    }

    /// Extract every distinct year on every page of the currently shown view.
    ///
    /// The seen-year set lives for this call only: directional views of the
    /// same station legitimately repeat years.
    pub async fn extract<S: PageSession>(&self, session: &mut S) -> Extraction {
        let mut seen_years: HashSet<String> = HashSet::new();
        let mut records: Vec<AadtRecord> = Vec::new();
        let mut pages_read = 0usize;

        let termination = loop {
            let settle = self.page_settle.sample();
            if !settle.is_zero() {
                tokio::time::sleep(settle).await;
            }

            let container = match session
                .wait_visible(&self.selectors.container, self.element_timeout)
                .await
            {
                Ok(c) => c,
                Err(e) if e.is_timeout() => break Termination::ContainerTimeout,
                Err(e) => break Termination::PaginationError(e.to_string()),
            };

            match self
                .read_page(session, &container, &mut seen_years, &mut records)
                .await
            {
                Ok((fresh, duplicates)) => {
                    pages_read += 1;
                    debug!(
                        "page {}: {} new rows, {} duplicate years dropped",
                        pages_read, fresh, duplicates
                    );
                }
                Err(e) => break Termination::PaginationError(e.to_string()),
            }

            let next = match session
                .wait_present(&self.selectors.next_button, self.element_timeout)
                .await
            {
                Ok(b) => b,
                Err(DriverError::Timeout { .. }) | Err(DriverError::NotFound(_)) => {
                    break Termination::NoNextControl
                }
                Err(e) => break Termination::PaginationError(e.to_string()),
            };

            match session.is_enabled(&next).await {
                Ok(false) => break Termination::LastPage,
                Ok(true) => {}
                Err(e) => break Termination::PaginationError(e.to_string()),
            }

            if pages_read >= self.max_pages {
                break Termination::PageLimitExceeded(self.max_pages);
            }

            if let Err(e) = session.click(&next).await {
                break Termination::PaginationError(e.to_string());
            }
        };

        match &termination {
            Termination::LastPage | Termination::NoNextControl => {
                info!("📄 {} pages, {} years", pages_read, records.len());
            }
            Termination::ContainerTimeout => {
                warn!(
                    "AADT table not visible after {} pages ({} years kept)",
                    pages_read,
                    records.len()
                );
            }
            Termination::PaginationError(e) => {
                warn!(
                    "pagination stopped after {} pages ({} years kept): {}",
                    pages_read,
                    records.len(),
                    e
                );
            }
            Termination::PageLimitExceeded(max) => {
                warn!(
                    "page cap of {} reached with next page still enabled ({} years kept)",
                    max,
                    records.len()
                );
            }
        }

        Extraction {
            records,
            pages_read,
            termination,
        }
    }

    /// Returns `(new rows, duplicate-year rows)` for the current page.
    async fn read_page<S: PageSession>(
        &self,
        session: &mut S,
        container: &S::Element,
        seen_years: &mut HashSet<String>,
        records: &mut Vec<AadtRecord>,
    ) -> Result<(usize, usize), DriverError> {
        let sel = self.selectors;
        let min_cells = sel.min_cells.max(sel.year_cell.max(sel.count_cell) + 1);
        let rows = session.find_all(Some(container), &sel.rows).await?;

        let mut fresh = 0;
        let mut duplicates = 0;
        for row in &rows {
            let cells = session.find_all(Some(row), &sel.cells).await?;
            if cells.len() < min_cells {
                continue;
            }
            let year_html = session.inner_html(&cells[sel.year_cell]).await?.unwrap_or_default();
            let count_html = session.inner_html(&cells[sel.count_cell]).await?.unwrap_or_default();

            let year = markup::fragment_text(&year_html);
            if year.is_empty() {
                continue;
            }
            if !seen_years.insert(year.clone()) {
                // Slow re-renders can show the previous page again.
                duplicates += 1;
                continue;
            }
            records.push(AadtRecord::new(year, markup::count_text(&count_html)));
            fresh += 1;
        }
        Ok((fresh, duplicates))
    }
}
