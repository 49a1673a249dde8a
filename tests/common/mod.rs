//! Scripted in-memory page driver for exercising the pipeline without Chrome.
#![allow(dead_code)]

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use aadt_harvest::core::config::{PacingConfig, Selectors};
use aadt_harvest::{
    DirectionCode, DriverError, HarvestConfig, Locator, PageDriver, PageSession, StationId,
    StopSignal,
};
use async_trait::async_trait;

pub fn init_logger() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}

/// Defaults with every pause removed and short timeouts.
pub fn test_config(dir: &Path) -> HarvestConfig {
    let mut cfg = HarvestConfig::default();
    cfg.pacing = PacingConfig::none();
    cfg.extraction.element_timeout_ms = 50;
    cfg.extraction.activation_timeout_ms = 300;
    cfg.extraction.activation_settle_ms = 0;
    cfg.output.dir = dir.to_path_buf();
    cfg
}

/// A history-table row as the site renders it: label, year, count.
pub fn row(year: &str, count: &str) -> Vec<String> {
    vec!["AADT".to_string(), year.to_string(), count.to_string()]
}

/// What the next-page control looks like on the final page.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LastPage {
    Disabled,
    Absent,
    /// Stays enabled; clicking it re-shows the final page.
    Enabled,
}

#[derive(Clone, Debug)]
pub struct ViewScript {
    pub pages: Vec<Vec<Vec<String>>>,
    pub last_page: LastPage,
    /// Row lookup errors when this page index is shown.
    pub fail_read_at: Option<usize>,
    /// Container never becomes visible on this page index.
    pub container_timeout_at: Option<usize>,
    /// Next-control lookup raises on this page index.
    pub fail_next_lookup_at: Option<usize>,
    /// Reading the next control's enabled state raises on this page index.
    pub fail_enabled_at: Option<usize>,
    /// Clicking the next control raises on this page index.
    pub fail_click_at: Option<usize>,
}

impl ViewScript {
    pub fn pages(pages: Vec<Vec<Vec<String>>>) -> Self {
        Self {
            pages,
            last_page: LastPage::Disabled,
            fail_read_at: None,
            container_timeout_at: None,
            fail_next_lookup_at: None,
            fail_enabled_at: None,
            fail_click_at: None,
        }
    }

    pub fn last_page(mut self, last: LastPage) -> Self {
        self.last_page = last;
        self
    }

    pub fn fail_read_at(mut self, page: usize) -> Self {
        self.fail_read_at = Some(page);
        self
    }

    pub fn container_timeout_at(mut self, page: usize) -> Self {
        self.container_timeout_at = Some(page);
        self
    }

    pub fn fail_next_lookup_at(mut self, page: usize) -> Self {
        self.fail_next_lookup_at = Some(page);
        self
    }

    pub fn fail_enabled_at(mut self, page: usize) -> Self {
        self.fail_enabled_at = Some(page);
        self
    }

    pub fn fail_click_at(mut self, page: usize) -> Self {
        self.fail_click_at = Some(page);
        self
    }
}

#[derive(Clone, Debug)]
pub struct DirectionScript {
    pub direction: DirectionCode,
    /// The toggle's `value` attribute as rendered.
    pub value: String,
    /// Whether clicking the toggle actually switches the view.
    pub confirms: bool,
    pub view: ViewScript,
}

#[derive(Clone, Debug)]
pub struct StationScript {
    pub fail_open: bool,
    pub base: ViewScript,
    pub directions: Vec<DirectionScript>,
}

impl StationScript {
    pub fn two_way(base: ViewScript) -> Self {
        Self {
            fail_open: false,
            base,
            directions: Vec::new(),
        }
    }

    pub fn unreachable() -> Self {
        Self {
            fail_open: true,
            base: ViewScript::pages(vec![]),
            directions: Vec::new(),
        }
    }

    pub fn with_direction(self, direction: DirectionCode, confirms: bool, view: ViewScript) -> Self {
        self.with_direction_value(direction, direction.code(), confirms, view)
    }

    pub fn with_direction_value(
        mut self,
        direction: DirectionCode,
        value: &str,
        confirms: bool,
        view: ViewScript,
    ) -> Self {
        self.directions.push(DirectionScript {
            direction,
            value: value.to_string(),
            confirms,
            view,
        });
        self
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FakeElement {
    Container,
    Row(usize),
    Cell { row: usize, idx: usize },
    Next,
    DirContainer,
    Toggle(DirectionCode),
    DirButton(DirectionCode),
}

pub struct ScriptedDriver {
    scripts: HashMap<StationId, StationScript>,
    selectors: Selectors,
    log: Arc<Mutex<Vec<String>>>,
    stop_after_opens: Option<(usize, StopSignal)>,
    snapshot: Option<PathBuf>,
}

impl ScriptedDriver {
    pub fn new(selectors: &Selectors) -> Self {
        Self {
            scripts: HashMap::new(),
            selectors: selectors.clone(),
            log: Arc::new(Mutex::new(Vec::new())),
            stop_after_opens: None,
            snapshot: None,
        }
    }

    pub fn station(mut self, id: &str, script: StationScript) -> Self {
        self.scripts.insert(StationId::from(id), script);
        self
    }

    /// Trigger `stop` once `opens` stations have been opened.
    pub fn stop_after(mut self, opens: usize, stop: StopSignal) -> Self {
        self.stop_after_opens = Some((opens, stop));
        self
    }

    /// Log `snapshot:<id>:<file contents>` on every open, or `missing` when absent.
    pub fn snapshot_on_open(mut self, path: impl Into<PathBuf>) -> Self {
        self.snapshot = Some(path.into());
        self
    }

    /// `open:<id>` and `close:<id>` entries in call order.
    pub fn log(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    pub fn opened(&self) -> Vec<String> {
        self.log()
            .into_iter()
            .filter_map(|e| e.strip_prefix("open:").map(str::to_string))
            .collect()
    }

    pub fn snapshots(&self) -> Vec<String> {
        self.log()
            .into_iter()
            .filter_map(|e| e.strip_prefix("snapshot:").map(str::to_string))
            .collect()
    }
}

#[async_trait]
impl PageDriver for ScriptedDriver {
    type Session = ScriptedSession;

    async fn open(&self, station: &StationId) -> Result<ScriptedSession, DriverError> {
        let opens = {
            let mut log = self.log.lock().unwrap();
            log.push(format!("open:{}", station));
            log.iter().filter(|e| e.starts_with("open:")).count()
        };
        if let Some(path) = &self.snapshot {
            let contents = std::fs::read_to_string(path).unwrap_or_else(|_| "missing".to_string());
            self.log
                .lock()
                .unwrap()
                .push(format!("snapshot:{}:{}", station, contents));
        }
        if let Some((after, stop)) = &self.stop_after_opens {
            if opens >= *after {
                stop.trigger();
            }
        }

        let script = match self.scripts.get(station) {
            Some(s) if !s.fail_open => s.clone(),
            _ => {
                return Err(DriverError::Navigation {
                    station: station.to_string(),
                    reason: "net::ERR_CONNECTION_RESET".to_string(),
                })
            }
        };
        Ok(ScriptedSession {
            station: station.clone(),
            script,
            selectors: self.selectors.clone(),
            active: None,
            page: 0,
            log: Arc::clone(&self.log),
        })
    }
}

pub struct ScriptedSession {
    station: StationId,
    script: StationScript,
    selectors: Selectors,
    active: Option<DirectionCode>,
    page: usize,
    log: Arc<Mutex<Vec<String>>>,
}

impl ScriptedSession {
    fn view(&self) -> &ViewScript {
        match self.active {
            None => &self.script.base,
            Some(d) => self
                .script
                .directions
                .iter()
                .find(|s| s.direction == d)
                .map(|s| &s.view)
                .unwrap_or(&self.script.base),
        }
    }

    fn next_state(&self) -> Option<bool> {
        let view = self.view();
        let last = view.pages.len().saturating_sub(1);
        if self.page < last {
            return Some(true);
        }
        match view.last_page {
            LastPage::Disabled => Some(false),
            LastPage::Absent => None,
            LastPage::Enabled => Some(true),
        }
    }

    /// Matches only the exact rendered toggle value.
    fn direction_for_button(&self, locator: &Locator) -> Option<DirectionCode> {
        self.script
            .directions
            .iter()
            .find(|s| self.selectors.direction_button.for_toggle(s.direction, &s.value) == *locator)
            .map(|s| s.direction)
    }

    fn toggle_value(&self, direction: DirectionCode) -> Option<String> {
        self.script
            .directions
            .iter()
            .find(|s| s.direction == direction)
            .map(|s| s.value.clone())
    }

    fn present(&self, locator: &Locator) -> Option<FakeElement> {
        if *locator == self.selectors.next_button {
            return self.next_state().map(|_| FakeElement::Next);
        }
        if *locator == self.selectors.container {
            return Some(FakeElement::Container);
        }
        self.direction_for_button(locator).map(FakeElement::DirButton)
    }

    fn unsupported(&self, what: &str, locator: &Locator) -> DriverError {
        DriverError::Protocol(format!("scripted page has no {} for {}", what, locator))
    }
}

#[async_trait]
impl PageSession for ScriptedSession {
    type Element = FakeElement;

    async fn wait_visible(
        &mut self,
        locator: &Locator,
        timeout: Duration,
    ) -> Result<FakeElement, DriverError> {
        if *locator == self.selectors.container && self.view().container_timeout_at == Some(self.page) {
            return Err(DriverError::Timeout {
                what: locator.to_string(),
                after: timeout,
            });
        }
        self.present(locator).ok_or(DriverError::Timeout {
            what: locator.to_string(),
            after: timeout,
        })
    }

    async fn wait_present(
        &mut self,
        locator: &Locator,
        timeout: Duration,
    ) -> Result<FakeElement, DriverError> {
        if *locator == self.selectors.next_button && self.view().fail_next_lookup_at == Some(self.page) {
            return Err(DriverError::Protocol("Cannot find context with specified id".to_string()));
        }
        self.present(locator).ok_or(DriverError::Timeout {
            what: locator.to_string(),
            after: timeout,
        })
    }

    async fn find_all(
        &mut self,
        scope: Option<&FakeElement>,
        locator: &Locator,
    ) -> Result<Vec<FakeElement>, DriverError> {
        let view = self.view();
        match scope {
            None if *locator == self.selectors.direction_container => {
                if self.script.directions.is_empty() {
                    Ok(vec![])
                } else {
                    Ok(vec![FakeElement::DirContainer])
                }
            }
            Some(FakeElement::DirContainer) if *locator == self.selectors.direction_toggles => Ok(self
                .script
                .directions
                .iter()
                .map(|s| FakeElement::Toggle(s.direction))
                .collect()),
            Some(FakeElement::Container) if *locator == self.selectors.rows => {
                if view.fail_read_at == Some(self.page) {
                    return Err(DriverError::Protocol("node detached during read".to_string()));
                }
                let rows = view.pages.get(self.page).map_or(0, Vec::len);
                Ok((0..rows).map(FakeElement::Row).collect())
            }
            Some(FakeElement::Row(row)) if *locator == self.selectors.cells => {
                let cells = view.pages[self.page][*row].len();
                Ok((0..cells)
                    .map(|idx| FakeElement::Cell { row: *row, idx })
                    .collect())
            }
            _ => Err(self.unsupported("elements", locator)),
        }
    }

    async fn click(&mut self, element: &FakeElement) -> Result<(), DriverError> {
        match *element {
            FakeElement::Next => {
                if self.view().fail_click_at == Some(self.page) {
                    return Err(DriverError::Protocol("click: node is detached".to_string()));
                }
                let last = self.view().pages.len().saturating_sub(1);
                self.page = (self.page + 1).min(last);
                Ok(())
            }
            FakeElement::DirButton(d) => {
                let confirms = self
                    .script
                    .directions
                    .iter()
                    .any(|s| s.direction == d && s.confirms);
                if confirms {
                    self.active = Some(d);
                    self.page = 0;
                }
                Ok(())
            }
            other => Err(DriverError::Protocol(format!("{:?} is not clickable", other))),
        }
    }

    async fn attribute(
        &mut self,
        element: &FakeElement,
        name: &str,
    ) -> Result<Option<String>, DriverError> {
        match *element {
            FakeElement::Toggle(d) if name == self.selectors.direction_value_attribute => {
                Ok(self.toggle_value(d))
            }
            FakeElement::DirButton(d) if name == self.selectors.active_marker_attribute => {
                if self.active == Some(d) {
                    Ok(Some(self.selectors.active_marker_sentinel.clone()))
                } else {
                    Ok(Some(format!("tcdsShowDir('{}'); return true;", d.code())))
                }
            }
            _ => Ok(None),
        }
    }

    async fn inner_html(&mut self, element: &FakeElement) -> Result<Option<String>, DriverError> {
        match *element {
            FakeElement::Cell { row, idx } => Ok(self.view().pages[self.page][row].get(idx).cloned()),
            _ => Ok(None),
        }
    }

    async fn is_enabled(&mut self, element: &FakeElement) -> Result<bool, DriverError> {
        match element {
            FakeElement::Next => {
                if self.view().fail_enabled_at == Some(self.page) {
                    return Err(DriverError::Protocol("Runtime.callFunctionOn failed".to_string()));
                }
                Ok(self.next_state().unwrap_or(false))
            }
            _ => Ok(true),
        }
    }

    async fn close(self) -> Result<(), DriverError> {
        self.log.lock().unwrap().push(format!("close:{}", self.station));
        Ok(())
    }
}
