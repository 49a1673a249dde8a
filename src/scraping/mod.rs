pub mod browser_manager;
pub mod driver;
pub mod markup;

pub use driver::{Locator, PageDriver, PageSession};
