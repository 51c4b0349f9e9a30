//! Element registry — the catalog of known pages and their elements.
//!
//! The registry is *consumed*, never produced, by the core: a maintenance
//! pipeline outside this crate keeps it current. The generator agent's
//! prompt includes a page-filtered rendering of it, and the self-healing
//! agent walks an element's ordered fallback locators when the primary
//! breaks.
//!
//! # Wire shape
//!
//! ```json
//! {
//!   "version": "1.2",
//!   "lastUpdated": "2026-07-01T00:00:00Z",
//!   "defaultStrategy": "testid",
//!   "pages": {
//!     "LoginPage": {
//!       "url": "https://www.saucedemo.com",
//!       "pageObjectClass": "LoginPage",
//!       "elements": {
//!         "username": {
//!           "strategy": "testid", "value": "username",
//!           "playwrightCode": "page.getByTestId(\"username\")",
//!           "fallbacks": [{"strategy": "css", "value": "#user-name"}]
//!         }
//!       }
//!     }
//!   }
//! }
//! ```

use crate::qaforge::intent::Locator;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One locator entry (primary or fallback) for a registered element.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ElementLocator {
    pub strategy: String,
    pub value: String,
    /// Strategy-specific options (e.g. role name/exactness), passed through.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<serde_json::Value>,
}

impl ElementLocator {
    /// Normalize into the core [`Locator`] form (`strategy=value`).
    pub fn to_locator(&self) -> Option<Locator> {
        Locator::parse(&format!("{}={}", self.strategy, self.value))
    }

    /// The `strategy=value` string used in intents and error messages.
    pub fn as_locator_string(&self) -> String {
        format!("{}={}", self.strategy, self.value)
    }
}

/// A registered element: primary locator, renderer hint, ordered fallbacks.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RegistryElement {
    pub strategy: String,
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<serde_json::Value>,
    /// Driver-specific snippet the renderer may embed verbatim.
    #[serde(default)]
    pub playwright_code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Ordered fallback locators, best first.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fallbacks: Vec<ElementLocator>,
}

impl RegistryElement {
    /// The element's primary locator string.
    pub fn primary_locator(&self) -> String {
        format!("{}={}", self.strategy, self.value)
    }
}

/// A page and its known elements.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RegistryPage {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_object_class: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub elements: BTreeMap<String, RegistryElement>,
}

/// The full element registry document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ElementRegistry {
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub last_updated: String,
    #[serde(default)]
    pub default_strategy: String,
    #[serde(default)]
    pub pages: BTreeMap<String, RegistryPage>,
}

impl ElementRegistry {
    /// Parse a registry document from JSON text.
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Look an element up by page and element name.
    pub fn element(&self, page: &str, name: &str) -> Option<&RegistryElement> {
        self.pages.get(page)?.elements.get(name)
    }

    /// Find the element (with its page name) whose primary locator equals
    /// `locator` (in `strategy=value` form).
    pub fn find_by_primary_locator(
        &self,
        locator: &str,
    ) -> Option<(&str, &str, &RegistryElement)> {
        for (page_name, page) in &self.pages {
            for (element_name, element) in &page.elements {
                if element.primary_locator() == locator {
                    return Some((page_name.as_str(), element_name.as_str(), element));
                }
            }
        }
        None
    }

    /// Ordered fallback locator strings for the element whose primary
    /// locator equals `locator`. Empty when the locator is unknown or has
    /// no fallbacks.
    pub fn fallbacks_for(&self, locator: &str) -> Vec<String> {
        self.find_by_primary_locator(locator)
            .map(|(_, _, element)| {
                element
                    .fallbacks
                    .iter()
                    .map(ElementLocator::as_locator_string)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Page names whose name or URL is mentioned (case-insensitively) in
    /// `text`. Used to filter the prompt catalog to relevant pages.
    pub fn pages_mentioned_in(&self, text: &str) -> Vec<&str> {
        let lowered = text.to_lowercase();
        self.pages
            .keys()
            .filter(|name| {
                let name_lower = name.to_lowercase();
                // "LoginPage" should also match a story saying "login page".
                let spaced = name_lower.replace('_', " ");
                let depaged = name_lower.trim_end_matches("page").to_string();
                lowered.contains(&name_lower)
                    || lowered.contains(&spaced)
                    || (!depaged.is_empty() && lowered.contains(&depaged))
            })
            .map(|name| name.as_str())
            .collect()
    }

    /// Render a prompt-ready catalog of the named pages (or all pages when
    /// `only` is empty): page URL plus every element's name and primary
    /// locator.
    pub fn catalog(&self, only: &[&str]) -> String {
        let mut text = String::from("KNOWN PAGES AND ELEMENTS:\n");
        for (page_name, page) in &self.pages {
            if !only.is_empty() && !only.contains(&page_name.as_str()) {
                continue;
            }
            text.push_str(&format!("- {} ({})\n", page_name, page.url));
            for (element_name, element) in &page.elements {
                text.push_str(&format!(
                    "    {} -> {}\n",
                    element_name,
                    element.primary_locator()
                ));
            }
        }
        text
    }
}
