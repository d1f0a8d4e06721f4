mod common;

use common::{FakeContext, FakeElement, FakePage};
use natural_browser::error::{ExecutionError, PageError, SessionError};
use natural_browser::script::Target;
use natural_browser::{Page, PageHandle, SessionTracker};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

#[test]
fn test_open_page_resolves_to_itself() {
    let page = FakePage::blank();
    let tracker = SessionTracker::new();

    let resolved = tracker.resolve_active_page(&page.handle()).unwrap();
    assert!(Arc::ptr_eq(&resolved, &page.handle()));
}

#[test]
fn test_closed_page_without_any_context() {
    let page = FakePage::blank();
    page.close();
    let tracker = SessionTracker::new();

    let Err(err) = tracker.resolve_active_page(&page.handle()) else {
        panic!("a closed page without a context cannot be resolved");
    };
    assert!(matches!(err, SessionError::NoActiveContext));
}

#[test]
fn test_closed_page_in_emptied_context() {
    let page = FakePage::blank();
    let _context = FakeContext::with_pages(&[page.clone()]);
    page.close();
    let tracker = SessionTracker::new();

    let Err(err) = tracker.resolve_active_page(&page.handle()) else {
        panic!("an emptied context has no page to offer");
    };
    assert!(matches!(err, SessionError::NoActivePages));
}

#[test]
fn test_recorded_context_is_used_when_page_lost_its_own() {
    let orphan = FakePage::blank();
    orphan.close();
    let survivor = FakePage::new("https://example.com/b", "B", vec![]);
    let context = FakeContext::with_pages(&[FakePage::blank(), survivor.clone()]);
    let mut tracker = SessionTracker::new();
    tracker.observe_context(context);

    let resolved = tracker.resolve_active_page(&orphan.handle()).unwrap();
    assert_eq!(resolved.url(), "https://example.com/b");
}

#[tokio::test(start_paused = true)]
async fn test_click_without_popup_keeps_page() {
    let page = FakePage::new(
        "https://example.com",
        "Inicio",
        vec![FakeElement::button("Guardar")],
    );
    let _context = FakeContext::with_pages(&[page.clone()]);
    let handle = page.handle();
    let target = Target::Text("Guardar".into());
    let mut tracker = SessionTracker::new().with_popup_wait(Duration::from_millis(300));

    let next = tracker
        .click_possibly_opening_new_page(&handle, || handle.click(&target))
        .await
        .unwrap();

    assert!(Arc::ptr_eq(&next, &handle));
    assert!(tracker.active_context().is_some());
    assert_eq!(page.log(), vec!["click:Guardar"]);
}

#[tokio::test(start_paused = true)]
async fn test_click_without_popup_returns_soon_after_clicking() {
    let page = FakePage::new(
        "https://example.com",
        "Inicio",
        vec![FakeElement::button("Guardar")],
    );
    let _context = FakeContext::with_pages(&[page.clone()]);
    let handle = page.handle();
    let target = Target::Text("Guardar".into());
    let mut tracker = SessionTracker::new();

    let start = Instant::now();
    let next = tracker
        .click_possibly_opening_new_page(&handle, || handle.click(&target))
        .await
        .unwrap();

    assert!(Arc::ptr_eq(&next, &handle));
    assert!(start.elapsed() < Duration::from_secs(1), "{:?}", start.elapsed());
}

#[tokio::test(start_paused = true)]
async fn test_click_opening_popup_switches_page() {
    let popup = FakePage::new("https://example.com/popup", "Popup", vec![]);
    let page = FakePage::new(
        "https://example.com",
        "Inicio",
        vec![FakeElement::link("Abrir ventana").opens(popup.clone())],
    );
    let _context = FakeContext::with_pages(&[page.clone()]);
    let handle = page.handle();
    let target = Target::Text("Abrir ventana".into());
    let mut tracker = SessionTracker::new();

    let next = tracker
        .click_possibly_opening_new_page(&handle, || handle.click(&target))
        .await
        .unwrap();

    assert_eq!(next.url(), "https://example.com/popup");
    assert_eq!(popup.log(), vec!["load:domcontentloaded"]);
}

#[tokio::test(start_paused = true)]
async fn test_click_error_is_propagated() {
    let page = FakePage::blank();
    let _context = FakeContext::with_pages(&[page.clone()]);
    let handle: PageHandle = page.handle();
    let target = Target::Text("Nada".into());
    let mut tracker = SessionTracker::new();

    let Err(err) = tracker
        .click_possibly_opening_new_page(&handle, || handle.click(&target))
        .await
    else {
        panic!("clicking a missing element must fail");
    };

    assert!(matches!(
        err,
        ExecutionError::ExecutionFailed(PageError::NotFound(_))
    ));
}
