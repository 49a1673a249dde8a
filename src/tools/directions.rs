use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::core::config::Selectors;
use crate::core::types::DirectionCode;
use crate::scraping::driver::PageSession;

const CONFIRM_POLL: Duration = Duration::from_millis(250);

/// Finds and switches the per-direction views of a station page.
pub struct DirectionResolver<'a> {
    selectors: &'a Selectors,
    settle: Duration,
}

impl<'a> DirectionResolver<'a> {
    pub fn new(selectors: &'a Selectors, settle: Duration) -> Self {
        Self { selectors, settle }
    }

    /// Directions the station offers toggles for, each with the toggle value
    /// it was recognised from. Empty means two-way only.
    pub async fn discover<S: PageSession>(&self, session: &mut S) -> BTreeMap<DirectionCode, String> {
        let mut found = BTreeMap::new();

        let containers = match session.find_all(None, &self.selectors.direction_container).await {
            Ok(c) => c,
            Err(e) => {
                warn!("direction scan failed, treating station as two-way: {}", e);
                return found;
            }
        };
        let Some(container) = containers.first() else {
            debug!("no direction container on page");
            return found;
        };

        let toggles = match session
            .find_all(Some(container), &self.selectors.direction_toggles)
            .await
        {
            Ok(t) => t,
            Err(e) => {
                warn!("direction toggle lookup failed, treating station as two-way: {}", e);
                return found;
            }
        };

        for toggle in &toggles {
            let value = match session
                .attribute(toggle, &self.selectors.direction_value_attribute)
                .await
            {
                Ok(Some(v)) => v,
                Ok(None) => continue,
                Err(e) => {
                    debug!("unreadable direction toggle: {}", e);
                    continue;
                }
            };
            if let Ok(direction) = value.parse::<DirectionCode>() {
                found.entry(direction).or_insert(value);
            }
        }

        found
    }

    /// Click the toggle for `direction` and confirm the page switched to it.
    /// `value` is the toggle value returned by [`Self::discover`].
    ///
    /// Returns `false` when the control is missing, the click fails, or the
    /// control's marker attribute never reaches the sentinel within `timeout`.
    /// The whole call, settle pause included, stays within `timeout`.
    pub async fn activate<S: PageSession>(
        &self,
        session: &mut S,
        direction: DirectionCode,
        value: &str,
        timeout: Duration,
    ) -> bool {
        let button = self.selectors.direction_button.for_toggle(direction, value);
        let deadline = Instant::now() + timeout;

        let control = match session.wait_present(&button, timeout).await {
            Ok(el) => el,
            Err(e) => {
                warn!("{} toggle not found: {}", direction, e);
                return false;
            }
        };
        if let Err(e) = session.click(&control).await {
            warn!("{} toggle click failed: {}", direction, e);
            return false;
        }

        tokio::time::sleep(self.settle.min(deadline.saturating_duration_since(Instant::now()))).await;

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            // The toggle is re-rendered after the switch, so look it up again every poll.
            if let Ok(control) = session.wait_present(&button, remaining.min(CONFIRM_POLL)).await {
                let marker = session
                    .attribute(&control, &self.selectors.active_marker_attribute)
                    .await
                    .ok()
                    .flatten();
                if marker.as_deref().map(str::trim) == Some(self.selectors.active_marker_sentinel.trim()) {
                    info!("➡️  switched to {} view", direction.name());
                    return true;
                }
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                warn!(
                    "{} activation not confirmed within {}ms",
                    direction,
                    timeout.as_millis()
                );
                return false;
            }
            tokio::time::sleep(CONFIRM_POLL.min(remaining)).await;
        }
    }
}
