//! Page-driver boundary.
//!
//! The extractor, direction resolver and orchestrator only ever talk to a
//! browser through these two traits. `PageDriver` opens one session per
//! station; the returned `PageSession` is passed explicitly into every
//! operation and closed by the orchestrator when the station is done.
//!
//! The production implementation lives in [`super::browser_manager`]; tests
//! drive the pipeline with a scripted in-memory session.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::core::error::DriverError;
use crate::core::types::{DirectionCode, StationId};

/// How an element is located on the page.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Locator {
    Css(String),
    Xpath(String),
}

impl Locator {
    pub fn expression(&self) -> &str {
        match self {
            Locator::Css(s) | Locator::Xpath(s) => s,
        }
    }

    /// Fill `{direction}` (short code) and `{direction_name}` placeholders.
    pub fn for_direction(&self, direction: DirectionCode) -> Locator {
        self.for_toggle(direction, direction.code())
    }

    /// Like [`Locator::for_direction`], but `{direction}` takes the toggle's
    /// value exactly as the page rendered it.
    pub fn for_toggle(&self, direction: DirectionCode, value: &str) -> Locator {
        let fill = |s: &str| {
            s.replace("{direction_name}", direction.name())
                .replace("{direction}", value)
        };
        match self {
            Locator::Css(s) => Locator::Css(fill(s)),
            Locator::Xpath(s) => Locator::Xpath(fill(s)),
        }
    }
}

impl std::fmt::Display for Locator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Locator::Css(s) => write!(f, "css:{s}"),
            Locator::Xpath(s) => write!(f, "xpath:{s}"),
        }
    }
}

#[async_trait]
pub trait PageDriver: Send + Sync {
    type Session: PageSession;

    /// Navigate to the station's detail view and block until the page settles.
    async fn open(&self, station: &StationId) -> Result<Self::Session, DriverError>;
}

/// One open station page. All calls are strictly sequential.
#[async_trait]
pub trait PageSession: Send {
    type Element: Send + Sync;

    /// Wait until the element exists and is rendered visibly.
    async fn wait_visible(
        &mut self,
        locator: &Locator,
        timeout: Duration,
    ) -> Result<Self::Element, DriverError>;

    /// Wait until the element exists in the DOM, visible or not.
    async fn wait_present(
        &mut self,
        locator: &Locator,
        timeout: Duration,
    ) -> Result<Self::Element, DriverError>;

    /// All matches, searched under `scope` when given, else the whole document.
    async fn find_all(
        &mut self,
        scope: Option<&Self::Element>,
        locator: &Locator,
    ) -> Result<Vec<Self::Element>, DriverError>;

    async fn click(&mut self, element: &Self::Element) -> Result<(), DriverError>;

    async fn attribute(
        &mut self,
        element: &Self::Element,
        name: &str,
    ) -> Result<Option<String>, DriverError>;

    async fn inner_html(&mut self, element: &Self::Element) -> Result<Option<String>, DriverError>;

    async fn is_enabled(&mut self, element: &Self::Element) -> Result<bool, DriverError>;

    async fn close(self) -> Result<(), DriverError>;
}
