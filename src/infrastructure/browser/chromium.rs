//! Headless Chromium session driven over CDP

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::Page;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::error::CdpError;
use futures::StreamExt;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::{BrowserError, BrowserResult, BrowserSession, ElementHandle, WaitCondition, js_string};
use crate::infrastructure::config::{BrowserSettings, ConfigError};

const SELECTOR_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Locations searched when no executable is configured
const KNOWN_EXECUTABLES: &[&str] = &[
    "/usr/bin/google-chrome-stable",
    "/usr/bin/google-chrome",
    "/opt/google/chrome/chrome",
    "/usr/bin/chromium",
    "/usr/bin/chromium-browser",
    "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
];

/// Resolves the browser binary, failing early with a configuration error
pub fn locate_executable(settings: &BrowserSettings) -> Result<PathBuf, ConfigError> {
    if let Some(path) = &settings.executable {
        return if path.exists() {
            Ok(path.clone())
        } else {
            Err(ConfigError::BrowserMissing(path.display().to_string()))
        };
    }
    KNOWN_EXECUTABLES
        .iter()
        .map(Path::new)
        .find(|p| p.exists())
        .map(Path::to_path_buf)
        .ok_or_else(|| ConfigError::BrowserMissing(KNOWN_EXECUTABLES.join(", ")))
}

fn classify(error: CdpError) -> BrowserError {
    match error {
        CdpError::Ws(_) | CdpError::ChannelSendError(_) | CdpError::NoResponse => BrowserError::SessionLost {
            message: error.to_string(),
        },
        CdpError::Timeout => BrowserError::Timeout {
            what: "CDP response".into(),
            waited_ms: 0,
        },
        CdpError::NotFound => BrowserError::not_found("(cdp)"),
        other => BrowserError::script(other.to_string()),
    }
}

pub struct ChromiumSession {
    browser: Browser,
    page: Page,
    handler: JoinHandle<()>,
    generation: u64,
}

impl ChromiumSession {
    pub async fn launch(settings: &BrowserSettings, executable: &Path) -> BrowserResult<Self> {
        let mut builder = BrowserConfig::builder()
            .chrome_executable(executable)
            .no_sandbox()
            .arg("--disable-dev-shm-usage")
            .arg("--disable-gpu")
            .arg(format!("--user-agent={}", settings.user_agent))
            .window_size(settings.window_width, settings.window_height)
            .request_timeout(Duration::from_secs(settings.request_timeout_secs));
        if !settings.headless {
            builder = builder.with_head();
        }
        let config = builder.build().map_err(|e| BrowserError::SessionLost {
            message: format!("browser config: {e}"),
        })?;

        let (browser, mut handler) = Browser::launch(config).await.map_err(|e| BrowserError::SessionLost {
            message: format!("browser launch failed: {e}"),
        })?;

        // The handler drives the CDP connection and must be polled for the session to work
        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    debug!("CDP handler stopped: {}", e);
                    break;
                }
            }
        });

        let page = browser.new_page("about:blank").await.map_err(classify)?;
        Ok(Self {
            browser,
            page,
            handler,
            generation: 0,
        })
    }

    async fn evaluate<T: serde::de::DeserializeOwned>(&self, script: &str) -> BrowserResult<T> {
        self.page
            .evaluate(script)
            .await
            .map_err(classify)?
            .into_value::<T>()
            .map_err(|e| BrowserError::script(e.to_string()))
    }

    async fn count(&self, selector: &str) -> BrowserResult<usize> {
        Ok(self.page.find_elements(selector).await.map_err(classify)?.len())
    }
}

#[async_trait]
impl BrowserSession for ChromiumSession {
    async fn navigate(&mut self, url: &str) -> BrowserResult<()> {
        self.generation += 1;
        self.page.goto(url).await.map_err(|e| match classify(e) {
            BrowserError::Script { message } => BrowserError::Navigation {
                url: url.to_string(),
                message,
            },
            other => other,
        })?;
        self.page.wait_for_navigation().await.map_err(classify)?;
        Ok(())
    }

    async fn set_field(&mut self, selector: &str, value: &str) -> BrowserResult<()> {
        let cleared: bool = self
            .evaluate(&format!(
                "(() => {{ const el = document.querySelector({}); if (!el) return false; el.value = ''; \
                 el.dispatchEvent(new Event('input', {{ bubbles: true }})); return true; }})()",
                js_string(selector)
            ))
            .await?;
        if !cleared {
            return Err(BrowserError::not_found(selector));
        }
        let element = self.page.find_element(selector).await.map_err(classify)?;
        element.click().await.map_err(classify)?;
        element.type_str(value).await.map_err(classify)?;
        Ok(())
    }

    async fn select_option(&mut self, selector: &str, value: &str) -> BrowserResult<()> {
        // Assigning an unknown value silently clears the selection
        let selected: String = self
            .evaluate(&format!(
                "(() => {{ const el = document.querySelector({}); const v = {}; if (!el) return 'missing'; \
                 if (!Array.from(el.options || []).some(o => o.value === v)) return 'no-option'; \
                 el.value = v; el.dispatchEvent(new Event('change', {{ bubbles: true }})); return 'ok'; }})()",
                js_string(selector),
                js_string(value)
            ))
            .await?;
        match selected.as_str() {
            "ok" => Ok(()),
            "no-option" => Err(BrowserError::OptionNotFound {
                selector: selector.to_string(),
                value: value.to_string(),
            }),
            _ => Err(BrowserError::not_found(selector)),
        }
    }

    async fn click(&mut self, selector: &str) -> BrowserResult<()> {
        // Script click: the registry overlays some buttons, which defeats pointer events
        let clicked: bool = self
            .evaluate(&format!(
                "(() => {{ const el = document.querySelector({}); if (!el) return false; \
                 el.scrollIntoView({{ block: 'center' }}); el.click(); return true; }})()",
                js_string(selector)
            ))
            .await?;
        if clicked {
            Ok(())
        } else {
            Err(BrowserError::not_found(selector))
        }
    }

    async fn click_element(&mut self, handle: &ElementHandle) -> BrowserResult<()> {
        if handle.generation != self.generation {
            return Err(BrowserError::StaleElement {
                reason: format!("handle from generation {} used in {}", handle.generation, self.generation),
            });
        }
        let clicked: bool = self
            .evaluate(&format!(
                "(() => {{ const el = document.querySelectorAll({})[{}]; if (!el) return false; \
                 el.scrollIntoView({{ block: 'center' }}); el.click(); return true; }})()",
                js_string(&handle.source_selector),
                handle.index
            ))
            .await?;
        if clicked {
            Ok(())
        } else {
            Err(BrowserError::StaleElement {
                reason: format!("{}[{}] no longer present", handle.source_selector, handle.index),
            })
        }
    }

    async fn wait_for(&mut self, condition: WaitCondition) -> BrowserResult<()> {
        match condition {
            WaitCondition::Delay(duration) => {
                tokio::time::sleep(duration).await;
                Ok(())
            }
            WaitCondition::Selector { selector, timeout } => {
                let started = Instant::now();
                loop {
                    if self.count(&selector).await? > 0 {
                        return Ok(());
                    }
                    if started.elapsed() >= timeout {
                        return Err(BrowserError::Timeout {
                            what: selector,
                            waited_ms: timeout.as_millis() as u64,
                        });
                    }
                    tokio::time::sleep(SELECTOR_POLL_INTERVAL).await;
                }
            }
            WaitCondition::Text {
                selector,
                contains,
                timeout,
            } => {
                let script = format!(
                    "Array.from(document.querySelectorAll({})).some(el => (el.innerText || '').includes({}))",
                    js_string(&selector),
                    js_string(&contains)
                );
                let started = Instant::now();
                loop {
                    if self.evaluate::<bool>(&script).await? {
                        return Ok(());
                    }
                    if started.elapsed() >= timeout {
                        return Err(BrowserError::Timeout {
                            what: format!("{contains:?} in {selector}"),
                            waited_ms: timeout.as_millis() as u64,
                        });
                    }
                    tokio::time::sleep(SELECTOR_POLL_INTERVAL).await;
                }
            }
        }
    }

    async fn read_text(&mut self, selector: &str) -> BrowserResult<Option<String>> {
        let elements = self.page.find_elements(selector).await.map_err(classify)?;
        match elements.first() {
            Some(element) => element.inner_text().await.map_err(classify),
            None => Ok(None),
        }
    }

    async fn read_all(&mut self, selector: &str) -> BrowserResult<Vec<ElementHandle>> {
        let elements = self.page.find_elements(selector).await.map_err(classify)?;
        let mut handles = Vec::with_capacity(elements.len());
        for (index, element) in elements.iter().enumerate() {
            let text = element.inner_text().await.map_err(classify)?.unwrap_or_default();
            let html = element.outer_html().await.map_err(classify)?.unwrap_or_default();
            handles.push(ElementHandle::new(self.generation, index, selector, text, html));
        }
        Ok(handles)
    }

    async fn execute_raw_action(&mut self, script: &str) -> BrowserResult<serde_json::Value> {
        let result = self.page.evaluate(script).await.map_err(classify)?;
        Ok(result.value().cloned().unwrap_or(serde_json::Value::Null))
    }

    async fn close(&mut self) -> BrowserResult<()> {
        if let Err(e) = self.browser.close().await {
            warn!("Browser close failed: {}", e);
        }
        if let Err(e) = self.browser.wait().await {
            debug!("Browser process wait failed: {}", e);
        }
        self.handler.abort();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn configured_executable_must_exist() {
        let settings = BrowserSettings {
            executable: Some(PathBuf::from("/definitely/not/here/chrome")),
            ..BrowserSettings::default()
        };
        assert!(matches!(locate_executable(&settings), Err(ConfigError::BrowserMissing(_))));
    }

    #[test]
    fn configured_executable_is_used_when_present() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let settings = BrowserSettings {
            executable: Some(file.path().to_path_buf()),
            ..BrowserSettings::default()
        };
        assert_eq!(locate_executable(&settings).unwrap(), file.path());
    }

    #[test]
    fn transport_failures_are_fatal() {
        assert!(classify(CdpError::NoResponse).is_fatal());
        assert!(!classify(CdpError::Timeout).is_fatal());
    }
}
