//! Headless Chrome implementation of the browser capability.
//!
//! `headless_chrome` is blocking, so every call runs on the blocking pool.
//! Elements are located by a page-side script that tags the first visible
//! match with a `data-nb-target` marker; the marker is then clicked or typed
//! into through real input events.

use async_trait::async_trait;
use headless_chrome::{Browser, LaunchOptions, Tab};
use serde_json::{Value, json};
use std::collections::HashSet;
use std::ffi::OsStr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::{BrowserContext, Page, PageHandle};
use crate::error::PageError;
use crate::script::{LoadState, Target};

const POLL_INTERVAL: Duration = Duration::from_millis(100);
const LOAD_TIMEOUT: Duration = Duration::from_secs(30);
const NETWORK_QUIET: Duration = Duration::from_millis(500);

const LOCATE_JS: &str = r#"
(spec) => {
  const norm = (s) => (s || '').replace(/\s+/g, ' ').trim().toLowerCase();
  const visible = (el) => {
    const r = el.getBoundingClientRect();
    return el.getClientRects().length > 0 && r.width > 0 && r.height > 0;
  };
  const all = (sel) => { try { return [...document.querySelectorAll(sel)]; } catch (e) { return []; } };
  const nameOf = (el) => el.getAttribute('aria-label') || el.textContent || el.value || el.title;
  const implicit = {
    button: 'button, input[type=button], input[type=submit], input[type=reset]',
    link: 'a[href]',
    textbox: 'input:not([type]), input[type=text], input[type=email], input[type=search], input[type=password], textarea',
    checkbox: 'input[type=checkbox]',
    heading: 'h1, h2, h3, h4, h5, h6',
    combobox: 'select',
  };

  let found = [];
  if (spec.kind === 'text') {
    const wanted = norm(spec.value);
    found = all('body *')
      .filter(el => norm(el.textContent) === wanted)
      .filter(el => ![...el.children].some(c => norm(c.textContent) === wanted));
    if (!found.length) found = all('input[type=button], input[type=submit]').filter(el => norm(el.value) === wanted);
  } else if (spec.kind === 'role') {
    found = all('[role="' + spec.role + '"]' + (implicit[spec.role] ? ', ' + implicit[spec.role] : ''));
    if (spec.name) found = found.filter(el => norm(nameOf(el)).includes(norm(spec.name)));
  } else if (spec.kind === 'placeholder') {
    found = all('[placeholder]').filter(el => norm(el.placeholder).includes(norm(spec.value)));
  } else if (spec.kind === 'label') {
    const wanted = norm(spec.value);
    found = all('label')
      .filter(l => norm(l.textContent).includes(wanted))
      .map(l => l.control || (l.htmlFor && document.getElementById(l.htmlFor)) || l.querySelector('input, textarea, select'))
      .filter(Boolean)
      .concat(all('[aria-label]').filter(el => norm(el.getAttribute('aria-label')).includes(wanted)));
  } else {
    found = all(spec.selector);
    if (spec.hasText) found = found.filter(el => norm(el.textContent || el.value).includes(norm(spec.hasText)));
  }

  const el = found.find(visible);
  if (!el) return null;
  window.__nbSeq = (window.__nbSeq || 0) + 1;
  const mark = String(window.__nbSeq);
  el.setAttribute('data-nb-target', mark);
  el.scrollIntoView({ block: 'center', inline: 'center' });
  return mark;
}
"#;

/// How to obtain a browser.
#[derive(Debug, Clone)]
pub struct LaunchConfig {
    pub headless: bool,
    /// Persistent profile so logins survive between runs.
    pub profile_dir: Option<PathBuf>,
    /// DevTools websocket URL of an already running Chrome.
    pub attach_ws_url: Option<String>,
    pub idle_timeout: Duration,
}

impl Default for LaunchConfig {
    fn default() -> Self {
        Self {
            headless: true,
            profile_dir: None,
            attach_ws_url: None,
            idle_timeout: Duration::from_secs(600),
        }
    }
}

/// Browser session. Created once, reused for every command.
pub struct ChromeSession {
    browser: Arc<Browser>,
}

impl ChromeSession {
    /// Blocking; call it from `spawn_blocking`.
    pub fn launch(config: &LaunchConfig) -> Result<Self, PageError> {
        if let Some(url) = &config.attach_ws_url {
            info!(target: "hands", "Attaching to existing Chrome at {}", url);
            match Browser::connect(url.clone()) {
                Ok(browser) => {
                    info!(target: "hands", "Attached to existing Chrome");
                    return Ok(Self {
                        browser: Arc::new(browser),
                    });
                }
                Err(e) => warn!(target: "hands", "Could not attach ({}), launching instead", e),
            }
        }

        let profile = match &config.profile_dir {
            Some(dir) => dir.clone(),
            None => default_profile_dir()?,
        };
        std::fs::create_dir_all(&profile).map_err(|e| {
            PageError::Browser(format!("cannot create profile {}: {e}", profile.display()))
        })?;
        info!(target: "hands", "Starting Chrome with profile {}", profile.display());

        let options = LaunchOptions {
            headless: config.headless,
            user_data_dir: Some(profile),
            args: vec![
                OsStr::new("--no-first-run"),
                OsStr::new("--no-default-browser-check"),
                OsStr::new("--disable-blink-features=AutomationControlled"),
                OsStr::new("--disable-infobars"),
            ],
            idle_browser_timeout: config.idle_timeout,
            ..Default::default()
        };
        let browser = Browser::new(options)
            .map_err(|e| PageError::Browser(format!("browser launch failed: {e}")))?;

        info!(target: "hands", "Chrome ready");
        Ok(Self {
            browser: Arc::new(browser),
        })
    }

    pub fn context(&self) -> Arc<ChromeContext> {
        Arc::new(ChromeContext {
            browser: self.browser.clone(),
        })
    }

    /// First open tab, or a fresh one when there is none.
    pub fn page(&self) -> Result<PageHandle, PageError> {
        match open_tabs(&self.browser).into_iter().next() {
            Some(tab) => Ok(Arc::new(ChromePage::new(tab, self.browser.clone()))),
            None => self.new_page(),
        }
    }

    pub fn new_page(&self) -> Result<PageHandle, PageError> {
        let tab = self
            .browser
            .new_tab()
            .map_err(|e| PageError::Browser(e.to_string()))?;
        Ok(Arc::new(ChromePage::new(tab, self.browser.clone())))
    }
}

fn default_profile_dir() -> Result<PathBuf, PageError> {
    match dirs::data_local_dir() {
        Some(dir) => Ok(dir.join("natural-browser").join("profile")),
        None => std::env::current_dir()
            .map(|dir| dir.join("agent_profile"))
            .map_err(|e| PageError::Browser(e.to_string())),
    }
}

fn open_tabs(browser: &Browser) -> Vec<Arc<Tab>> {
    match browser.get_tabs().lock() {
        Ok(tabs) => tabs.clone(),
        Err(poisoned) => poisoned.into_inner().clone(),
    }
}

pub struct ChromeContext {
    browser: Arc<Browser>,
}

#[async_trait]
impl BrowserContext for ChromeContext {
    fn pages(&self) -> Vec<PageHandle> {
        open_tabs(&self.browser)
            .into_iter()
            .map(|tab| Arc::new(ChromePage::new(tab, self.browser.clone())) as PageHandle)
            .collect()
    }

    async fn wait_for_page(&self, timeout: Duration) -> Option<PageHandle> {
        let known: HashSet<String> = open_tabs(&self.browser)
            .iter()
            .map(|tab| tab.get_target_id().clone())
            .collect();
        let deadline = Instant::now() + timeout;
        loop {
            let fresh = open_tabs(&self.browser)
                .into_iter()
                .find(|tab| !known.contains(tab.get_target_id()));
            if let Some(tab) = fresh {
                debug!(target: "hands", "New tab opened: {}", tab.get_url());
                return Some(Arc::new(ChromePage::new(tab, self.browser.clone())));
            }
            if Instant::now() >= deadline {
                return None;
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }
}

pub struct ChromePage {
    tab: Arc<Tab>,
    browser: Arc<Browser>,
}

impl ChromePage {
    pub fn new(tab: Arc<Tab>, browser: Arc<Browser>) -> Self {
        Self { tab, browser }
    }

    async fn blocking<T, F>(&self, f: F) -> Result<T, PageError>
    where
        F: FnOnce(&Tab) -> anyhow::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let tab = self.tab.clone();
        tokio::task::spawn_blocking(move || f(&tab))
            .await
            .map_err(|e| PageError::Browser(format!("browser task failed: {e}")))?
            .map_err(|e| PageError::Browser(format!("{e:#}")))
    }

    /// Tag the first visible match and return a selector for it.
    async fn locate(&self, target: &Target) -> Result<Option<String>, PageError> {
        let script = format!("({LOCATE_JS})({})", locator_spec(target));
        let mark = self.evaluate(&script).await?;
        Ok(mark
            .as_str()
            .map(|mark| format!("[data-nb-target=\"{mark}\"]")))
    }

    async fn require(&self, target: &Target) -> Result<String, PageError> {
        self.locate(target)
            .await?
            .ok_or_else(|| PageError::NotFound(target.to_string()))
    }
}

fn locator_spec(target: &Target) -> Value {
    match target {
        Target::Text(text) => json!({ "kind": "text", "value": text }),
        Target::Role { role, name } => json!({ "kind": "role", "role": role, "name": name }),
        Target::Placeholder(text) => json!({ "kind": "placeholder", "value": text }),
        Target::Label(text) => json!({ "kind": "label", "value": text }),
        // `:visible` is not CSS; visibility is checked page-side anyway.
        Target::Css { selector, has_text } => json!({
            "kind": "css",
            "selector": selector.replace(":visible", ""),
            "hasText": has_text,
        }),
    }
}

#[async_trait]
impl Page for ChromePage {
    fn url(&self) -> String {
        self.tab.get_url()
    }

    async fn title(&self) -> Result<String, PageError> {
        self.blocking(|tab| tab.get_title()).await
    }

    fn is_closed(&self) -> bool {
        !open_tabs(&self.browser)
            .iter()
            .any(|tab| tab.get_target_id() == self.tab.get_target_id())
    }

    fn context(&self) -> Option<Arc<dyn BrowserContext>> {
        Some(Arc::new(ChromeContext {
            browser: self.browser.clone(),
        }))
    }

    async fn evaluate(&self, script: &str) -> Result<Value, PageError> {
        let script = script.to_string();
        self.blocking(move |tab| Ok(tab.evaluate(&script, false)?.value.unwrap_or(Value::Null)))
            .await
            .map_err(|e| match e {
                PageError::Browser(message) => PageError::Script(message),
                other => other,
            })
    }

    async fn goto(&self, url: &str) -> Result<(), PageError> {
        info!(target: "hands", "Navigating to {}", url);
        let url = url.to_string();
        self.blocking(move |tab| {
            tab.navigate_to(&url)?;
            tab.wait_until_navigated()?;
            Ok(())
        })
        .await
    }

    async fn wait_for_load_state(&self, state: LoadState) -> Result<(), PageError> {
        self.blocking(|tab| {
            tab.wait_until_navigated()?;
            Ok(())
        })
        .await?;

        let wanted: &[&str] = match state {
            LoadState::DomContentLoaded => &["interactive", "complete"],
            LoadState::Load | LoadState::NetworkIdle => &["complete"],
        };
        let deadline = Instant::now() + LOAD_TIMEOUT;
        loop {
            let ready = self.evaluate("document.readyState").await?;
            if ready.as_str().is_some_and(|s| wanted.contains(&s)) {
                break;
            }
            if Instant::now() >= deadline {
                return Err(PageError::Timeout {
                    ms: LOAD_TIMEOUT.as_millis() as u64,
                    what: format!("load state {}", state.as_str()),
                });
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }

        // No request tracking here; a short quiet period stands in for it.
        if state == LoadState::NetworkIdle {
            tokio::time::sleep(NETWORK_QUIET).await;
        }
        Ok(())
    }

    async fn wait_for_selector(&self, selector: &str, timeout: Duration) -> Result<(), PageError> {
        let owned = selector.replace(":visible", "");
        self.blocking(move |tab| {
            tab.wait_for_element_with_custom_timeout(&owned, timeout)?;
            Ok(())
        })
        .await
        .map_err(|_| PageError::Timeout {
            ms: timeout.as_millis() as u64,
            what: selector.to_string(),
        })
    }

    async fn wait_for(&self, target: &Target, timeout: Duration) -> Result<(), PageError> {
        let deadline = Instant::now() + timeout;
        loop {
            if self.locate(target).await?.is_some() {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(PageError::Timeout {
                    ms: timeout.as_millis() as u64,
                    what: target.to_string(),
                });
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    async fn click(&self, target: &Target) -> Result<(), PageError> {
        let selector = self.require(target).await?;
        debug!(target: "hands", "Clicking {}", target);
        self.blocking(move |tab| {
            tab.find_element(&selector)?.click()?;
            Ok(())
        })
        .await
    }

    async fn fill(&self, target: &Target, text: &str) -> Result<(), PageError> {
        let selector = self.require(target).await?;
        debug!(target: "hands", "Filling {}", target);
        let text = text.to_string();
        self.blocking(move |tab| {
            tab.find_element(&selector)?.click()?;
            tab.evaluate(
                &format!("document.querySelector({}).value = ''", json!(selector)),
                false,
            )?;
            if !text.is_empty() {
                tab.type_str(&text)?;
            }
            Ok(())
        })
        .await
    }

    async fn press(&self, key: &str) -> Result<(), PageError> {
        let key = key.to_string();
        self.blocking(move |tab| {
            tab.press_key(&key)?;
            Ok(())
        })
        .await
    }

    async fn text_content(&self, target: &Target) -> Result<String, PageError> {
        let selector = self.require(target).await?;
        self.blocking(move |tab| tab.find_element(&selector)?.get_inner_text())
            .await
    }
}
