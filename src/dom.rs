use tracing::{debug, warn};

use crate::error::PageError;
use crate::hands::Page;
use crate::types::{MAX_BUTTONS, MAX_INPUTS, MAX_LINKS, MAX_TEXT_ELEMENTS, PageElements, PageSnapshot};

/// Page-side script returning the visible interactive elements as a JSON string.
/// Read-only: it never touches styles, layout or attributes.
///
/// Visibility means the element has a render box; CSS `display` alone is not
/// consulted. Each group is capped so the listing stays prompt-sized.
pub const SNAPSHOT_JS: &str = r#"
(() => {
  const LIMITS = { buttons: __MAX_BUTTONS__, inputs: __MAX_INPUTS__, links: __MAX_LINKS__, textElements: __MAX_TEXT__ };
  const result = { buttons: [], inputs: [], links: [], textElements: [] };
  const visible = (el) => {
    const r = el.getBoundingClientRect();
    return el.getClientRects().length > 0 && r.width > 0 && r.height > 0;
  };
  const cls = (el) => (typeof el.className === 'string' && el.className) || null;
  const push = (group, item) => {
    if (result[group].length < LIMITS[group]) result[group].push(item);
  };

  document.querySelectorAll('button, input[type="button"], input[type="submit"], [role="button"], .btn, .button')
    .forEach((el, index) => {
      if (!visible(el)) return;
      const rect = el.getBoundingClientRect();
      push('buttons', {
        index,
        text: (el.textContent || el.value || el.title || '').trim(),
        id: el.id || null,
        className: cls(el),
        name: el.name || null,
        type: el.type || el.tagName.toLowerCase(),
        position: Math.round(rect.x) + ',' + Math.round(rect.y),
        size: Math.round(rect.width) + 'x' + Math.round(rect.height),
      });
    });

  document.querySelectorAll('input, textarea, select').forEach((el, index) => {
    if (!visible(el)) return;
    const explicit = el.id ? document.querySelector('label[for="' + CSS.escape(el.id) + '"]') : null;
    const label = (explicit || el.closest('label'))?.textContent?.trim() || '';
    push('inputs', {
      index,
      type: el.type || el.tagName.toLowerCase(),
      placeholder: el.placeholder || '',
      name: el.name || null,
      id: el.id || null,
      label,
      value: el.value || '',
      required: !!el.required,
      className: cls(el),
    });
  });

  document.querySelectorAll('a[href]').forEach((el, index) => {
    const text = (el.textContent || '').trim();
    if (!visible(el) || !text) return;
    push('links', { index, text, href: el.href, id: el.id || null, className: cls(el) });
  });

  document.querySelectorAll('h1, h2, h3, h4, h5, h6, p, span, div').forEach((el) => {
    const text = (el.textContent || '').trim();
    if (!visible(el) || text.length <= 3 || text.length >= 100) return;
    push('textElements', { tag: el.tagName.toLowerCase(), text, id: el.id || null, className: cls(el) });
  });

  return JSON.stringify(result);
})()
"#;

fn snapshot_script() -> String {
    SNAPSHOT_JS
        .replace("__MAX_BUTTONS__", &MAX_BUTTONS.to_string())
        .replace("__MAX_INPUTS__", &MAX_INPUTS.to_string())
        .replace("__MAX_LINKS__", &MAX_LINKS.to_string())
        .replace("__MAX_TEXT__", &MAX_TEXT_ELEMENTS.to_string())
}

/// Snapshot the page. Never fails: on any error the snapshot degrades to
/// url + title with empty element groups.
pub async fn extract(page: &dyn Page) -> PageSnapshot {
    match detailed_snapshot(page).await {
        Ok(snapshot) => snapshot,
        Err(e) => {
            warn!(target: "dom", "Detailed page context unavailable: {}", e);
            basic_snapshot(page).await
        }
    }
}

async fn detailed_snapshot(page: &dyn Page) -> Result<PageSnapshot, PageError> {
    let url = page.url();
    let title = page.title().await?;
    let raw = page.evaluate(&snapshot_script()).await?;
    let json = raw
        .as_str()
        .ok_or_else(|| PageError::Script(format!("snapshot returned {raw}")))?;
    let mut elements: PageElements =
        serde_json::from_str(json).map_err(|e| PageError::Script(e.to_string()))?;
    elements.cap();

    debug!(
        target: "dom",
        "Page context: url={} buttons={} inputs={} links={}",
        url,
        elements.buttons.len(),
        elements.inputs.len(),
        elements.links.len()
    );

    Ok(PageSnapshot {
        url,
        title,
        elements,
    })
}

pub async fn basic_snapshot(page: &dyn Page) -> PageSnapshot {
    PageSnapshot {
        url: page.url(),
        title: page
            .title()
            .await
            .unwrap_or_else(|_| "untitled".to_string()),
        elements: PageElements::default(),
    }
}
