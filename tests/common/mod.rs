#![allow(dead_code)]

use async_trait::async_trait;
use natural_browser::error::{ModelError, PageError};
use natural_browser::hands::{BrowserContext, Page, PageHandle};
use natural_browser::script::{LoadState, Target};
use natural_browser::types::ChatMessage;
use natural_browser::CompletionModel;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Kind {
    Button,
    Input,
    Link,
    Text,
}

#[derive(Clone)]
pub struct FakeElement {
    pub kind: Kind,
    pub text: String,
    pub placeholder: String,
    pub label: String,
    pub visible: bool,
    pub popup: Option<Arc<FakePage>>,
}

impl FakeElement {
    fn new(kind: Kind, text: &str) -> Self {
        Self {
            kind,
            text: text.to_string(),
            placeholder: String::new(),
            label: String::new(),
            visible: true,
            popup: None,
        }
    }

    pub fn button(text: &str) -> Self {
        Self::new(Kind::Button, text)
    }

    pub fn link(text: &str) -> Self {
        Self::new(Kind::Link, text)
    }

    pub fn text(text: &str) -> Self {
        Self::new(Kind::Text, text)
    }

    pub fn input(placeholder: &str) -> Self {
        Self {
            placeholder: placeholder.to_string(),
            ..Self::new(Kind::Input, "")
        }
    }

    pub fn labelled(mut self, label: &str) -> Self {
        self.label = label.to_string();
        self
    }

    pub fn hidden(mut self) -> Self {
        self.visible = false;
        self
    }

    /// Clicking this element opens `page` in the same context.
    pub fn opens(mut self, page: Arc<FakePage>) -> Self {
        self.popup = Some(page);
        self
    }

    fn role(&self) -> &'static str {
        match self.kind {
            Kind::Button => "button",
            Kind::Input => "textbox",
            Kind::Link => "link",
            Kind::Text => "generic",
        }
    }

    /// The handful of selector shapes the engine and heuristics produce.
    fn matches_css(&self, selector: &str) -> bool {
        selector.split(',').map(str::trim).any(|part| {
            let part = part.trim_end_matches(":visible");
            match self.kind {
                Kind::Button => part == "button" || part == "[role=\"button\"]",
                Kind::Link => part == "a" || part.starts_with("a["),
                Kind::Input => part.starts_with("input") || part == "textarea",
                Kind::Text => false,
            }
        })
    }

    fn matches(&self, target: &Target) -> bool {
        match target {
            Target::Text(text) => norm(&self.text) == norm(text),
            Target::Role { role, name } => {
                role.as_str() == self.role()
                    && name
                        .as_deref()
                        .is_none_or(|n| norm(&self.text).contains(&norm(n)))
            }
            Target::Placeholder(p) => {
                self.kind == Kind::Input && norm(&self.placeholder).contains(&norm(p))
            }
            Target::Label(l) => self.kind == Kind::Input && norm(&self.label).contains(&norm(l)),
            Target::Css { selector, has_text } => {
                self.matches_css(selector)
                    && has_text
                        .as_deref()
                        .is_none_or(|t| norm(&self.text).contains(&norm(t)))
            }
        }
    }
}

fn norm(s: &str) -> String {
    s.trim().to_lowercase()
}

/// In-memory page that records every action it performs.
pub struct FakePage {
    url: Mutex<String>,
    title: String,
    elements: Mutex<Vec<FakeElement>>,
    log: Mutex<Vec<String>>,
    closed: AtomicBool,
    broken_snapshot: AtomicBool,
    failing_clicks: AtomicU32,
    panic_on_click: AtomicBool,
    context: Mutex<Weak<FakeContext>>,
}

impl FakePage {
    pub fn new(url: &str, title: &str, elements: Vec<FakeElement>) -> Arc<Self> {
        Arc::new(Self {
            url: Mutex::new(url.to_string()),
            title: title.to_string(),
            elements: Mutex::new(elements),
            log: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
            broken_snapshot: AtomicBool::new(false),
            failing_clicks: AtomicU32::new(0),
            panic_on_click: AtomicBool::new(false),
            context: Mutex::new(Weak::new()),
        })
    }

    pub fn blank() -> Arc<Self> {
        Self::new("about:blank", "Blank", Vec::new())
    }

    pub fn log(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    pub fn break_snapshot(&self) {
        self.broken_snapshot.store(true, Ordering::SeqCst);
    }

    /// The next `n` clicks fail before touching any element.
    pub fn fail_next_clicks(&self, n: u32) {
        self.failing_clicks.store(n, Ordering::SeqCst);
    }

    pub fn panic_on_click(&self) {
        self.panic_on_click.store(true, Ordering::SeqCst);
    }

    pub fn handle(self: &Arc<Self>) -> PageHandle {
        self.clone()
    }

    fn record(&self, entry: String) {
        self.log.lock().unwrap().push(entry);
    }

    fn find(&self, target: &Target) -> Result<FakeElement, PageError> {
        self.elements
            .lock()
            .unwrap()
            .iter()
            .find(|el| el.visible && el.matches(target))
            .cloned()
            .ok_or_else(|| PageError::NotFound(target.to_string()))
    }

    fn snapshot_json(&self) -> String {
        let elements = self.elements.lock().unwrap();
        let visible = || elements.iter().filter(|el| el.visible);
        json!({
            "buttons": visible()
                .filter(|el| el.kind == Kind::Button)
                .enumerate()
                .map(|(index, el)| json!({ "index": index, "text": el.text, "type": "button" }))
                .collect::<Vec<_>>(),
            "inputs": visible()
                .filter(|el| el.kind == Kind::Input)
                .enumerate()
                .map(|(index, el)| json!({
                    "index": index,
                    "type": "text",
                    "placeholder": el.placeholder,
                    "label": el.label,
                }))
                .collect::<Vec<_>>(),
            "links": visible()
                .filter(|el| el.kind == Kind::Link)
                .enumerate()
                .map(|(index, el)| json!({ "index": index, "text": el.text, "href": "#" }))
                .collect::<Vec<_>>(),
            "textElements": visible()
                .filter(|el| el.kind == Kind::Text)
                .map(|el| json!({ "tag": "p", "text": el.text }))
                .collect::<Vec<_>>(),
        })
        .to_string()
    }
}

#[async_trait]
impl Page for FakePage {
    fn url(&self) -> String {
        self.url.lock().unwrap().clone()
    }

    async fn title(&self) -> Result<String, PageError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(PageError::Closed);
        }
        Ok(self.title.clone())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn context(&self) -> Option<Arc<dyn BrowserContext>> {
        self.context
            .lock()
            .unwrap()
            .upgrade()
            .map(|ctx| ctx as Arc<dyn BrowserContext>)
    }

    async fn evaluate(&self, _script: &str) -> Result<Value, PageError> {
        if self.broken_snapshot.load(Ordering::SeqCst) {
            return Err(PageError::Script("ReferenceError: document is not defined".into()));
        }
        Ok(Value::String(self.snapshot_json()))
    }

    async fn goto(&self, url: &str) -> Result<(), PageError> {
        self.record(format!("goto:{url}"));
        *self.url.lock().unwrap() = url.to_string();
        Ok(())
    }

    async fn wait_for_load_state(&self, state: LoadState) -> Result<(), PageError> {
        self.record(format!("load:{}", state.as_str()));
        Ok(())
    }

    async fn wait_for_timeout(&self, ms: u64) {
        self.record(format!("wait:{ms}"));
        tokio::time::sleep(Duration::from_millis(ms)).await;
    }

    async fn wait_for_selector(&self, selector: &str, _timeout: Duration) -> Result<(), PageError> {
        self.find(&Target::css(selector)).map(|_| ())
    }

    async fn wait_for(&self, target: &Target, _timeout: Duration) -> Result<(), PageError> {
        self.find(target).map(|_| ())
    }

    async fn click(&self, target: &Target) -> Result<(), PageError> {
        if self.panic_on_click.load(Ordering::SeqCst) {
            panic!("renderer crashed");
        }
        if self
            .failing_clicks
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            self.record("click-failed".into());
            return Err(PageError::Browser("element detached".into()));
        }

        let element = self.find(target)?;
        self.record(format!("click:{}", element.text));
        if let Some(popup) = element.popup {
            if let Some(ctx) = self.context.lock().unwrap().upgrade() {
                ctx.open(popup);
            }
        }
        Ok(())
    }

    async fn fill(&self, target: &Target, text: &str) -> Result<(), PageError> {
        let element = self.find(target)?;
        self.record(format!("fill:{}={text}", element.placeholder));
        Ok(())
    }

    async fn press(&self, key: &str) -> Result<(), PageError> {
        self.record(format!("press:{key}"));
        Ok(())
    }

    async fn text_content(&self, target: &Target) -> Result<String, PageError> {
        self.find(target).map(|el| el.text)
    }
}

/// Browsing context holding fake pages, oldest first.
pub struct FakeContext {
    pages: Mutex<Vec<Arc<FakePage>>>,
    this: Weak<FakeContext>,
}

impl FakeContext {
    pub fn with_pages(pages: &[Arc<FakePage>]) -> Arc<Self> {
        let ctx = Arc::new_cyclic(|this| Self {
            pages: Mutex::new(Vec::new()),
            this: this.clone(),
        });
        for page in pages {
            ctx.open(page.clone());
        }
        ctx
    }

    pub fn open(&self, page: Arc<FakePage>) {
        *page.context.lock().unwrap() = self.this.clone();
        self.pages.lock().unwrap().push(page);
    }

    fn open_pages(&self) -> Vec<Arc<FakePage>> {
        self.pages
            .lock()
            .unwrap()
            .iter()
            .filter(|p| !p.is_closed())
            .cloned()
            .collect()
    }
}

#[async_trait]
impl BrowserContext for FakeContext {
    fn pages(&self) -> Vec<PageHandle> {
        self.open_pages()
            .into_iter()
            .map(|p| p as PageHandle)
            .collect()
    }

    async fn wait_for_page(&self, timeout: Duration) -> Option<PageHandle> {
        let known = self.pages.lock().unwrap().len();
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let opened = self.pages.lock().unwrap().get(known).cloned();
            if let Some(page) = opened {
                return Some(page);
            }
            if tokio::time::Instant::now() >= deadline {
                return None;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }
}

/// Model that answers from a queue and remembers what it was asked.
#[derive(Default)]
pub struct ScriptedModel {
    replies: Mutex<VecDeque<Result<String, ModelError>>>,
    calls: AtomicUsize,
    prompts: Mutex<Vec<Vec<ChatMessage>>>,
}

impl ScriptedModel {
    pub fn replying(replies: &[&str]) -> Arc<Self> {
        let model = Self::default();
        model
            .replies
            .lock()
            .unwrap()
            .extend(replies.iter().map(|r| Ok(r.to_string())));
        Arc::new(model)
    }

    /// A model whose endpoint is down.
    pub fn unreachable() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn prompts(&self) -> Vec<Vec<ChatMessage>> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl CompletionModel for ScriptedModel {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, ModelError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().unwrap().push(messages.to_vec());
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(ModelError::Transport("connection refused".into())))
    }
}
