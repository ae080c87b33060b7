use tracing::{debug, warn};

use crate::dom::{SelectorCheck, SelectorTable};
use crate::error::ActionError;
use crate::hands::BrowserDriver;

/// The one live browser session: the driver plus the discovery selectors
/// issued against its current page. Handed to components by `&mut`.
pub struct BrowserSession {
    pub driver: Box<dyn BrowserDriver>,
    pub selectors: SelectorTable,
}

impl BrowserSession {
    pub fn new(driver: Box<dyn BrowserDriver>) -> Self {
        Self {
            driver,
            selectors: SelectorTable::new(),
        }
    }

    pub fn driver(&mut self) -> &mut dyn BrowserDriver {
        self.driver.as_mut()
    }

    /// Called on every page switch: navigation, history, tab change.
    pub fn invalidate_selectors(&mut self) {
        self.selectors.invalidate();
        debug!(
            generation = self.selectors.generation(),
            "discovery selectors invalidated"
        );
    }

    /// Fail fast on a discovery selector issued for a page we already left.
    pub fn ensure_live(&mut self, selector: &str) -> Result<(), ActionError> {
        let url = self.driver.url()?;
        match self.selectors.check(selector, &url) {
            SelectorCheck::Stale => {
                warn!(selector, url = %url, "rejected stale discovery selector");
                Err(ActionError::StaleSelector(selector.to_string()))
            }
            SelectorCheck::Live(_) | SelectorCheck::NotDiscovery => Ok(()),
        }
    }

    pub fn shutdown(&mut self) {
        if let Err(e) = self.driver.shutdown() {
            warn!(error = %e, "browser shutdown failed");
        }
    }
}
