use anyhow::{anyhow, Context, Result};
use headless_chrome::protocol::cdp::Page::CaptureScreenshotFormatOption;
use headless_chrome::Tab;
use headless_chrome::{browser::default_executable, Browser, LaunchOptions};
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;
use std::{thread::sleep, time::Duration};
use sysinfo::{Pid, PidExt, ProcessExt, System, SystemExt};

use crate::types::{CaptureError, RenderError};
use crate::utils::{folder_name, MAX_HEIGHT, MAX_WIDTH};

pub const READY_STATE_JS: &str = "document.readyState";
pub const TITLE_JS: &str = "document.title";
pub const VIEWPORT_HEIGHT_JS: &str = "window.innerHeight";
pub const PAGE_HEIGHT_JS: &str = "Math.max(document.body.scrollHeight, document.body.offsetHeight, document.documentElement.clientHeight, document.documentElement.scrollHeight, document.documentElement.offsetHeight)";

// Forces a light theme so captures look the same whatever the site prefers.
pub const LIGHT_MODE_JS: &str = r#"(() => {
    const style = document.createElement('style');
    style.id = '__snapshotter_light_mode';
    style.textContent = `
        :root { color-scheme: light !important; }
        html, body { background-color: #ffffff !important; color: #000000 !important; }
    `;
    (document.head || document.documentElement).appendChild(style);
    return true;
})()"#;

pub fn scroll_to_script(offset: u64) -> String {
    format!("window.scrollTo(0, {})", offset)
}

/// The narrow slice of a browser automation library the engine relies on.
pub trait PageDriver: Send {
    fn navigate(&mut self, url: &str, timeout: Duration) -> Result<()>;
    fn execute_script(&mut self, js: &str) -> Result<Value>;
    fn screenshot(&mut self) -> Result<Vec<u8>>;
    /// Releases the browser. Must be safe to call more than once.
    fn close(&mut self);
}

pub trait DriverFactory: Send + Sync {
    fn launch(&self) -> Result<Box<dyn PageDriver>>;
}

#[derive(Debug, Clone)]
pub struct ChromeDriverFactory {
    window_size: (u32, u32),
    idle_timeout: Duration,
}

impl Default for ChromeDriverFactory {
    fn default() -> Self {
        ChromeDriverFactory {
            window_size: (MAX_WIDTH, MAX_HEIGHT),
            idle_timeout: Duration::from_secs(45),
        }
    }
}

impl ChromeDriverFactory {
    pub fn new(window_size: (u32, u32), idle_timeout: Duration) -> Self {
        ChromeDriverFactory {
            window_size,
            idle_timeout,
        }
    }
}

impl DriverFactory for ChromeDriverFactory {
    fn launch(&self) -> Result<Box<dyn PageDriver>> {
        let is_docker = std::env::var("IN_DOCKER").is_ok();
        let path = default_executable().map_err(|e| anyhow!("no chrome binary found: {}", e))?;
        let options = LaunchOptions::default_builder()
            .path(Some(path))
            .headless(true)
            .window_size(Some(self.window_size))
            .idle_browser_timeout(self.idle_timeout)
            // warning only do this if in docker env
            .sandbox(!is_docker)
            .build()
            .map_err(|e| anyhow!("invalid browser launch options: {}", e))?;
        let browser = Browser::new(options).context("browser launching error")?;
        let tab = browser.new_tab().context("could not create new tab")?;

        Ok(Box::new(ChromeDriver {
            browser,
            tab,
            closed: false,
        }))
    }
}

pub struct ChromeDriver {
    browser: Browser,
    tab: Arc<Tab>,
    closed: bool,
}

impl ChromeDriver {
    fn kill(&self) -> bool {
        let pid = match self.browser.get_process_id() {
            Some(pid) => Pid::from_u32(pid),
            None => return false,
        };
        let mut s = System::new();
        s.refresh_process(pid);
        if let Some(process) = s.process(pid) {
            debug!("killing browser process with id {}", pid);
            process.kill();
            return true;
        }
        false
    }
}

impl PageDriver for ChromeDriver {
    fn navigate(&mut self, url: &str, timeout: Duration) -> Result<()> {
        self.tab.set_default_timeout(timeout);
        self.tab
            .navigate_to(url)
            .context(format!("could not navigate to {}", url))?
            .wait_until_navigated()
            .context(format!("navigation to {} did not finish", url))?;
        Ok(())
    }

    fn execute_script(&mut self, js: &str) -> Result<Value> {
        let obj = self.tab.evaluate(js, false)?;
        Ok(obj.value.unwrap_or(Value::Null))
    }

    fn screenshot(&mut self) -> Result<Vec<u8>> {
        self.tab
            .capture_screenshot(CaptureScreenshotFormatOption::Png, None, None, true)
            .context("screenshot could not be captured")
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if let Err(e) = self.tab.close(false) {
            debug!("could not close tab cleanly: {}", e);
        }
        self.kill();
    }
}

impl Drop for ChromeDriver {
    fn drop(&mut self) {
        debug!("killing browser process...");
        self.close();
    }
}

#[derive(Debug, Clone)]
pub struct RenderSettings {
    pub page_load_timeout: Duration,
    pub ready_timeout: Duration,
    pub ready_poll_interval: Duration,
    /// Pause after readiness for script driven layout
    pub settle_delay: Duration,
}

impl Default for RenderSettings {
    fn default() -> Self {
        RenderSettings {
            page_load_timeout: Duration::from_secs(30),
            ready_timeout: Duration::from_secs(30),
            ready_poll_interval: Duration::from_millis(250),
            settle_delay: Duration::from_secs(2),
        }
    }
}

impl RenderSettings {
    pub fn with_page_load_timeout(timeout: Duration) -> Self {
        RenderSettings {
            page_load_timeout: timeout,
            ready_timeout: timeout,
            ..Default::default()
        }
    }
}

/// A loaded page owned by exactly one worker. The browser is closed when
/// the session is dropped.
pub struct RenderSession {
    driver: Box<dyn PageDriver>,
    page_title: String,
    total_height: u64,
    viewport_height: u64,
}

impl RenderSession {
    fn new(driver: Box<dyn PageDriver>, page_title: String) -> Self {
        RenderSession {
            driver,
            page_title,
            total_height: 0,
            viewport_height: 0,
        }
    }

    pub fn page_title(&self) -> &str {
        &self.page_title
    }

    pub fn total_height(&self) -> u64 {
        self.total_height
    }

    pub fn viewport_height(&self) -> u64 {
        self.viewport_height
    }

    pub fn measure_viewport_height(&mut self) -> Result<u64, CaptureError> {
        self.viewport_height = self.measure(VIEWPORT_HEIGHT_JS)?;
        Ok(self.viewport_height)
    }

    pub fn measure_total_height(&mut self) -> Result<u64, CaptureError> {
        self.total_height = self.measure(PAGE_HEIGHT_JS)?;
        Ok(self.total_height)
    }

    fn measure(&mut self, js: &str) -> Result<u64, CaptureError> {
        let value = self
            .driver
            .execute_script(js)
            .map_err(|e| CaptureError::Measure(format!("{:#}", e)))?;
        match value.as_f64() {
            Some(v) if v >= 0.0 => Ok(v.ceil() as u64),
            _ => Err(CaptureError::Measure(format!(
                "`{}` returned {}",
                js, value
            ))),
        }
    }

    pub fn scroll_to(&mut self, offset: u64) -> Result<(), CaptureError> {
        self.driver
            .execute_script(&scroll_to_script(offset))
            .map(|_| ())
            .map_err(|e| CaptureError::Measure(format!("could not scroll to {}: {:#}", offset, e)))
    }

    pub fn screenshot(&mut self) -> Result<Vec<u8>, CaptureError> {
        self.driver
            .screenshot()
            .map_err(|e| CaptureError::Screenshot(format!("{:#}", e)))
    }
}

impl Drop for RenderSession {
    fn drop(&mut self) {
        debug!("closing render session for {}", self.page_title);
        self.driver.close();
    }
}

/// Loads pages into fresh browser sessions.
#[derive(Clone)]
pub struct PageRenderer {
    factory: Arc<dyn DriverFactory>,
    settings: RenderSettings,
}

impl PageRenderer {
    pub fn new(factory: Arc<dyn DriverFactory>, settings: RenderSettings) -> Self {
        PageRenderer { factory, settings }
    }

    pub fn render(&self, url: &str) -> Result<RenderSession, RenderError> {
        let mut driver = self
            .factory
            .launch()
            .map_err(|e| RenderError::BrowserLaunch(format!("{:#}", e)))?;

        match self.prepare(driver.as_mut(), url) {
            Ok(title) => Ok(RenderSession::new(driver, title)),
            Err(e) => {
                driver.close();
                Err(e)
            }
        }
    }

    fn prepare(&self, driver: &mut dyn PageDriver, url: &str) -> Result<String, RenderError> {
        driver
            .navigate(url, self.settings.page_load_timeout)
            .map_err(|e| RenderError::Navigation {
                url: url.into(),
                reason: format!("{:#}", e),
            })?;

        self.wait_until_ready(driver, url)?;

        if !self.settings.settle_delay.is_zero() {
            debug!("sleeping for {:?}", self.settings.settle_delay);
            sleep(self.settings.settle_delay);
        }

        driver
            .execute_script(LIGHT_MODE_JS)
            .map_err(|e| RenderError::Script {
                reason: format!("light mode override: {:#}", e),
            })?;

        let title = driver
            .execute_script(TITLE_JS)
            .map_err(|e| RenderError::Script {
                reason: format!("title: {:#}", e),
            })?;
        Ok(folder_name(title.as_str().unwrap_or_default(), url))
    }

    fn wait_until_ready(&self, driver: &mut dyn PageDriver, url: &str) -> Result<(), RenderError> {
        let started = Instant::now();
        loop {
            let state = driver
                .execute_script(READY_STATE_JS)
                .map_err(|e| RenderError::Script {
                    reason: format!("ready state: {:#}", e),
                })?;
            if state.as_str() == Some("complete") {
                return Ok(());
            }
            let waited = started.elapsed();
            if waited >= self.settings.ready_timeout {
                return Err(RenderError::ReadinessTimeout {
                    url: url.into(),
                    waited,
                });
            }
            sleep(self.settings.ready_poll_interval);
        }
    }
}
