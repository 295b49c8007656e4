use std::{sync::Arc, time::Duration};

use snapshotter::{
    browser_controller::{ChromeDriverFactory, PageRenderer, RenderSettings},
    capture::ScrollCapture,
    prechecker::{AccessibilityChecker, PrecheckOptions},
    rate_limiter::AdaptiveRateLimiter,
};

macro_rules! aw {
    ($e:expr) => {
        tokio_test::block_on($e)
    };
}

/*
RUST_LOG=debug cargo test --test live -- snapshot_live_page --exact --ignored
 */
#[test]
#[ignore = "needs chrome and network"]
fn snapshot_live_page() -> anyhow::Result<()> {
    env_logger::init();
    let url = "https://example.com/";

    let checker = AccessibilityChecker::new(
        Arc::new(AdaptiveRateLimiter::new(30)),
        PrecheckOptions::default(),
    )?;
    assert!(aw!(checker.is_accessible(url)));

    let renderer = PageRenderer::new(
        Arc::new(ChromeDriverFactory::default()),
        RenderSettings::default(),
    );
    let mut session = renderer.render(url)?;
    let dir = tempfile::tempdir()?;
    let count = ScrollCapture::new(1, 3, Duration::from_millis(500))
        .capture(&mut session, dir.path())?;
    println!("{} snapshots of {:?}", count, session.page_title());
    assert!(count >= 1);
    Ok(())
}
