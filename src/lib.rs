pub mod core;
pub mod features;
pub mod scraping;
pub mod tools;

// --- Primary exports ---
pub use crate::core::types::*;
pub use crate::core::{DriverError, HarvestConfig, LedgerError};
pub use features::ledger::{CorruptLedgerPolicy, LedgerStore, ProgressLedger};
pub use features::result_sink::{read_results, ResultLine, ResultSink};
pub use scraping::browser_manager::ChromiumDriver;
pub use scraping::driver::{Locator, PageDriver, PageSession};
pub use tools::{BatchHarvester, DirectionResolver, PaginationExtractor, StopSignal};
