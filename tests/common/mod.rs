#![allow(dead_code)]

use std::{
    io::Cursor,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use anyhow::anyhow;
use image::{ImageOutputFormat, Rgba, RgbaImage};
use serde_json::{json, Value};
use snapshotter::browser_controller::{
    DriverFactory, PageDriver, PageRenderer, RenderSettings, LIGHT_MODE_JS, PAGE_HEIGHT_JS,
    READY_STATE_JS, TITLE_JS, VIEWPORT_HEIGHT_JS,
};

/// What the fake browser pretends to have loaded.
#[derive(Debug, Clone)]
pub struct FakePage {
    pub title: String,
    pub viewport_height: u64,
    /// Heights reported by successive measurements, the last one repeats.
    pub heights: Vec<u64>,
    /// Ready state polls answered with "loading" before "complete".
    pub loading_polls: usize,
    /// Navigations that fail before one succeeds, shared across launches.
    pub navigation_failures: usize,
    /// Screenshots that fail before one succeeds, shared across launches.
    pub screenshot_failures: usize,
}

impl FakePage {
    pub fn new(title: &str, viewport_height: u64, height: u64) -> Self {
        FakePage {
            title: title.into(),
            viewport_height,
            heights: vec![height],
            loading_polls: 0,
            navigation_failures: 0,
            screenshot_failures: 0,
        }
    }
}

#[derive(Debug, Default)]
pub struct FakeLog {
    pub launched: usize,
    pub closed: usize,
    pub scripts: Vec<String>,
    pub scroll_offsets: Vec<u64>,
    pub screenshots: usize,
}

pub struct FakeDriverFactory {
    page: FakePage,
    pub log: Arc<Mutex<FakeLog>>,
    navigation_failures: Arc<AtomicUsize>,
    screenshot_failures: Arc<AtomicUsize>,
}

impl FakeDriverFactory {
    pub fn new(page: FakePage) -> Self {
        let navigation_failures = page.navigation_failures;
        let screenshot_failures = page.screenshot_failures;
        FakeDriverFactory {
            page,
            log: Arc::new(Mutex::new(FakeLog::default())),
            navigation_failures: Arc::new(AtomicUsize::new(navigation_failures)),
            screenshot_failures: Arc::new(AtomicUsize::new(screenshot_failures)),
        }
    }

    pub fn launched(&self) -> usize {
        self.log.lock().unwrap().launched
    }

    pub fn closed(&self) -> usize {
        self.log.lock().unwrap().closed
    }

    pub fn scroll_offsets(&self) -> Vec<u64> {
        self.log.lock().unwrap().scroll_offsets.clone()
    }

    pub fn scripts(&self) -> Vec<String> {
        self.log.lock().unwrap().scripts.clone()
    }
}

impl DriverFactory for FakeDriverFactory {
    fn launch(&self) -> anyhow::Result<Box<dyn PageDriver>> {
        self.log.lock().unwrap().launched += 1;
        Ok(Box::new(FakeDriver {
            page: self.page.clone(),
            log: self.log.clone(),
            navigation_failures: self.navigation_failures.clone(),
            screenshot_failures: self.screenshot_failures.clone(),
            height_reads: 0,
            ready_polls: 0,
            closed: false,
        }))
    }
}

pub struct FakeDriver {
    page: FakePage,
    log: Arc<Mutex<FakeLog>>,
    navigation_failures: Arc<AtomicUsize>,
    screenshot_failures: Arc<AtomicUsize>,
    height_reads: usize,
    ready_polls: usize,
    closed: bool,
}

impl PageDriver for FakeDriver {
    fn navigate(&mut self, url: &str, _timeout: Duration) -> anyhow::Result<()> {
        let left = self.navigation_failures.load(Ordering::SeqCst);
        if left > 0 {
            self.navigation_failures.store(left - 1, Ordering::SeqCst);
            return Err(anyhow!("timed out navigating to {}", url));
        }
        Ok(())
    }

    fn execute_script(&mut self, js: &str) -> anyhow::Result<Value> {
        self.log.lock().unwrap().scripts.push(js.to_string());
        if js == READY_STATE_JS {
            self.ready_polls += 1;
            if self.ready_polls > self.page.loading_polls {
                return Ok(json!("complete"));
            }
            return Ok(json!("loading"));
        }
        if js == VIEWPORT_HEIGHT_JS {
            return Ok(json!(self.page.viewport_height));
        }
        if js == PAGE_HEIGHT_JS {
            let idx = self.height_reads.min(self.page.heights.len() - 1);
            self.height_reads += 1;
            return Ok(json!(self.page.heights[idx]));
        }
        if js == TITLE_JS {
            return Ok(json!(self.page.title));
        }
        if js == LIGHT_MODE_JS {
            return Ok(json!(true));
        }
        if let Some(rest) = js.strip_prefix("window.scrollTo(0, ") {
            let offset = rest.trim_end_matches(')').parse::<u64>()?;
            self.log.lock().unwrap().scroll_offsets.push(offset);
            return Ok(Value::Null);
        }
        Err(anyhow!("unexpected script {}", js))
    }

    fn screenshot(&mut self) -> anyhow::Result<Vec<u8>> {
        self.log.lock().unwrap().screenshots += 1;
        let left = self.screenshot_failures.load(Ordering::SeqCst);
        if left > 0 {
            self.screenshot_failures.store(left - 1, Ordering::SeqCst);
            return Err(anyhow!("target crashed while capturing"));
        }
        Ok(tiny_png())
    }

    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.log.lock().unwrap().closed += 1;
        }
    }
}

pub fn tiny_png() -> Vec<u8> {
    let img = RgbaImage::from_pixel(4, 4, Rgba([200, 100, 50, 255]));
    let mut buffer = Vec::new();
    image::DynamicImage::ImageRgba8(img)
        .write_to(&mut Cursor::new(&mut buffer), ImageOutputFormat::Png)
        .unwrap();
    buffer
}

pub fn quick_settings() -> RenderSettings {
    RenderSettings {
        page_load_timeout: Duration::from_secs(1),
        ready_timeout: Duration::from_millis(200),
        ready_poll_interval: Duration::from_millis(1),
        settle_delay: Duration::ZERO,
    }
}

pub fn renderer_for(factory: &Arc<FakeDriverFactory>) -> PageRenderer {
    PageRenderer::new(factory.clone(), quick_settings())
}

pub fn png_files(dir: &std::path::Path) -> Vec<String> {
    let mut names = std::fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
        .collect::<Vec<_>>();
    names.sort();
    names
}
