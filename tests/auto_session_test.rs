mod common;

use common::{FakeContext, FakeElement, FakePage};
use natural_browser::{AutoContext, ModelConfig, auto};
use std::time::Duration;

// Kept to a single test: the context slot is shared by the whole process.
#[tokio::test(start_paused = true)]
async fn test_context_outlives_the_command_that_saw_it() {
    let survivor = FakePage::new(
        "https://example.com/b",
        "B",
        vec![FakeElement::button("Enviar")],
    );
    let page = FakePage::new(
        "https://example.com/a",
        "A",
        vec![FakeElement::button("Guardar")],
    );
    let context = FakeContext::with_pages(&[survivor.clone(), page.clone()]);
    let config = ModelConfig::default()
        .with_base_url("http://127.0.0.1:9/v1")
        .with_timeout(Duration::from_millis(200));

    auto(
        "pulsa el botón Guardar",
        AutoContext {
            page: page.handle(),
            test: Some("auto_session_test"),
        },
        Some(config.clone()),
    )
    .await
    .unwrap();
    assert_eq!(page.log(), vec!["click:Guardar"]);

    drop(context);
    page.close();

    auto(
        "pulsa el botón Enviar",
        AutoContext {
            page: page.handle(),
            test: Some("auto_session_test"),
        },
        Some(config),
    )
    .await
    .unwrap();

    assert_eq!(page.log(), vec!["click:Guardar"]);
    assert_eq!(survivor.log(), vec!["click:Enviar"]);
}
