use crate::error::{BrowserError, Result};
use crate::fingerprint::FingerprintConfig;
use crate::session::{Anchor, LinkPredicate, PageContent, PageSession, SessionFactory};
use chromiumoxide::browser::{Browser, BrowserConfig as ChromiumConfig};
use chromiumoxide::cdp::browser_protocol::fetch::{
    AuthChallengeResponse, AuthChallengeResponseResponse, ContinueRequestParams,
    ContinueWithAuthParams, EnableParams, EventAuthRequired, EventRequestPaused,
};
use chromiumoxide::Page;
use futures_util::stream::StreamExt;
use mailsift_core::{BrowserConfig, ProxyCredentials, ProxyEndpoint};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

const QUIESCENCE_POLL: Duration = Duration::from_millis(500);

const BODY_TEXT_SCRIPT: &str = "document.body ? document.body.innerText : ''";

const RESOURCE_COUNT_SCRIPT: &str = "performance.getEntriesByType('resource').length";

const ANCHORS_SCRIPT: &str = r"Array.from(document.querySelectorAll('a[href]')).map(a => ({
    href: a.href || '',
    text: (a.textContent || '').trim(),
    title: a.getAttribute('title') || '',
    ariaLabel: a.getAttribute('aria-label') || ''
}))";

/// A launched Chromium process together with its CDP handler task.
struct LaunchedBrowser {
    browser: Browser,
    handler: JoinHandle<()>,
    // Removed when the browser is dropped
    _profile: Option<TempDir>,
}

impl LaunchedBrowser {
    async fn close(mut self, grace: Duration) {
        match tokio::time::timeout(grace, self.browser.close()).await {
            Ok(Ok(_)) => debug!("browser closed"),
            Ok(Err(e)) => warn!("browser close failed: {}", e),
            Err(_) => {
                warn!("browser did not close within {:?}, killing process", grace);
                if let Some(Err(e)) = self.browser.kill().await {
                    warn!("failed to kill browser process: {}", e);
                }
            }
        }
        self.handler.abort();
    }
}

/// Chromium-backed session factory.
///
/// Direct sessions are tabs in one shared browser. A proxied session gets a
/// dedicated browser launched with `--proxy-server`, because Chromium applies
/// proxy settings per process.
pub struct BrowserEngine {
    config: BrowserConfig,
    shared: Mutex<Option<LaunchedBrowser>>,
}

impl BrowserEngine {
    /// Launch the shared browser.
    pub async fn new(config: BrowserConfig) -> Result<Self> {
        let shared = launch(&config, None).await?;
        info!(
            "browser engine started (headless: {}, window: {}x{})",
            config.headless, config.window_width, config.window_height
        );

        Ok(Self {
            config,
            shared: Mutex::new(Some(shared)),
        })
    }

    async fn open_direct(&self) -> Result<Page> {
        let guard = self.shared.lock().await;
        let launched = guard
            .as_ref()
            .ok_or_else(|| BrowserError::SessionClosed("browser engine shut down".to_string()))?;
        Ok(launched.browser.new_page("about:blank").await?)
    }
}

async fn launch(config: &BrowserConfig, proxy: Option<&ProxyEndpoint>) -> Result<LaunchedBrowser> {
    let request_timeout = config
        .navigation_timeout()
        .max(config.secondary_navigation_timeout())
        + Duration::from_secs(5);

    let mut builder = ChromiumConfig::builder()
        .no_sandbox()
        .window_size(config.window_width, config.window_height)
        .request_timeout(request_timeout)
        .arg(format!("--lang={}", config.locale));

    if !config.headless {
        builder = builder.with_head();
    }

    let mut profile = None;
    if let Some(proxy) = proxy {
        // Each process needs its own profile or Chromium hands off to the running instance
        let dir = tempfile::Builder::new()
            .prefix("mailsift-proxy-")
            .tempdir()
            .map_err(|e| BrowserError::ChromiumError(e.to_string()))?;
        builder = builder
            .arg(format!("--proxy-server={}", proxy.server))
            .user_data_dir(dir.path());
        profile = Some(dir);
    }

    let chromium_config = builder.build().map_err(BrowserError::ChromiumError)?;

    let (browser, mut handler) = Browser::launch(chromium_config)
        .await
        .map_err(|e| BrowserError::ChromiumError(e.to_string()))?;

    let handler = tokio::spawn(async move {
        while let Some(event) = handler.next().await {
            if let Err(e) = event {
                debug!("browser handler error: {}", e);
            }
        }
    });

    Ok(LaunchedBrowser {
        browser,
        handler,
        _profile: profile,
    })
}

/// Answer proxy auth challenges with the endpoint's credentials.
///
/// Enabling auth handling pauses every request, so paused requests are
/// continued untouched.
async fn spawn_proxy_auth(page: &Page, credentials: ProxyCredentials) -> Result<JoinHandle<()>> {
    let mut auth_events = page.event_listener::<EventAuthRequired>().await?;
    let mut paused_events = page.event_listener::<EventRequestPaused>().await?;

    page.execute(EnableParams {
        patterns: None,
        handle_auth_requests: Some(true),
    })
    .await?;

    let page = page.clone();
    Ok(tokio::spawn(async move {
        loop {
            tokio::select! {
                Some(event) = auth_events.next() => {
                    let response = AuthChallengeResponse {
                        response: AuthChallengeResponseResponse::ProvideCredentials,
                        username: Some(credentials.username.clone()),
                        password: Some(credentials.password.clone()),
                    };
                    let params = ContinueWithAuthParams::new(event.request_id.clone(), response);
                    if let Err(e) = page.execute(params).await {
                        debug!("failed to answer proxy auth challenge: {}", e);
                    }
                }
                Some(event) = paused_events.next() => {
                    let params = ContinueRequestParams::new(event.request_id.clone());
                    if let Err(e) = page.execute(params).await {
                        debug!("failed to continue paused request: {}", e);
                    }
                }
                else => break,
            }
        }
    }))
}

#[async_trait::async_trait]
impl SessionFactory for BrowserEngine {
    async fn open(&self, proxy: Option<&ProxyEndpoint>) -> Result<Box<dyn PageSession>> {
        let (page, owned, auth_task) = match proxy {
            None => (self.open_direct().await?, None, None),
            Some(endpoint) => {
                let launched = launch(&self.config, Some(endpoint)).await?;
                let opened = launched.browser.new_page("about:blank").await;
                let page = match opened {
                    Ok(page) => page,
                    Err(e) => {
                        launched.close(self.config.close_grace()).await;
                        return Err(e.into());
                    }
                };
                let auth_task = match endpoint.credentials.clone() {
                    Some(credentials) => match spawn_proxy_auth(&page, credentials).await {
                        Ok(task) => Some(task),
                        Err(e) => {
                            launched.close(self.config.close_grace()).await;
                            return Err(e);
                        }
                    },
                    None => None,
                };
                debug!("opened proxied session via {}", endpoint);
                (page, Some(launched), auth_task)
            }
        };

        let fingerprint = FingerprintConfig::randomized()
            .with_viewport(self.config.window_width, self.config.window_height);
        if let Err(e) = fingerprint.apply(&page).await {
            warn!("failed to apply fingerprint: {}", e);
        }

        Ok(Box::new(ChromiumSession {
            page,
            owned,
            auth_task,
            close_grace: self.config.close_grace(),
        }))
    }

    async fn shutdown(&self, grace: Duration) {
        let launched = self.shared.lock().await.take();
        match launched {
            Some(launched) => {
                info!("shutting down browser engine");
                launched.close(grace).await;
            }
            None => debug!("browser engine already shut down"),
        }
    }
}

/// A single Chromium tab, plus the browser process when the session owns one.
pub struct ChromiumSession {
    page: Page,
    owned: Option<LaunchedBrowser>,
    auth_task: Option<JoinHandle<()>>,
    close_grace: Duration,
}

impl ChromiumSession {
    async fn eval<T: DeserializeOwned>(&self, script: &str) -> Result<T> {
        self.page
            .evaluate(script)
            .await
            .map_err(|e| BrowserError::ScriptError(e.to_string()))?
            .into_value::<T>()
            .map_err(|e| BrowserError::ScriptError(e.to_string()))
    }
}

#[async_trait::async_trait]
impl PageSession for ChromiumSession {
    async fn navigate(&mut self, url: &str, timeout: Duration) -> Result<()> {
        match tokio::time::timeout(timeout, self.page.goto(url)).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(e)) => match BrowserError::from(e) {
                BrowserError::Timeout(_) => Err(BrowserError::Timeout(url.to_string())),
                other => Err(BrowserError::NavigationError(format!("{url}: {other}"))),
            },
            Err(_) => Err(BrowserError::Timeout(url.to_string())),
        }
    }

    async fn wait_quiescent(&mut self, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        let mut last_count: Option<u64> = None;

        loop {
            let state: String = self.eval("document.readyState").await?;
            if state == "complete" {
                let count: u64 = self.eval(RESOURCE_COUNT_SCRIPT).await?;
                if last_count == Some(count) {
                    return Ok(());
                }
                last_count = Some(count);
            } else {
                last_count = None;
            }

            if Instant::now() >= deadline {
                return Err(BrowserError::Timeout("network quiescence".to_string()));
            }
            tokio::time::sleep(QUIESCENCE_POLL).await;
        }
    }

    async fn content(&mut self) -> Result<PageContent> {
        let html = self.page.content().await?;
        let text: String = self.eval(BODY_TEXT_SCRIPT).await?;
        Ok(PageContent { html, text })
    }

    async fn title(&mut self) -> Result<String> {
        Ok(self.page.get_title().await?.unwrap_or_default())
    }

    async fn current_url(&mut self) -> Result<String> {
        Ok(self.page.url().await?.unwrap_or_default())
    }

    async fn find_link(&mut self, predicate: &LinkPredicate<'_>) -> Result<Option<String>> {
        let anchors: Vec<Anchor> = self.eval(ANCHORS_SCRIPT).await?;
        Ok(anchors
            .into_iter()
            .find(|anchor| predicate(anchor))
            .map(|anchor| anchor.href))
    }

    async fn close(self: Box<Self>) -> Result<()> {
        let ChromiumSession {
            page,
            owned,
            auth_task,
            close_grace,
        } = *self;

        if let Some(task) = auth_task {
            task.abort();
        }

        let page_result = page.close().await;

        if let Some(launched) = owned {
            launched.close(close_grace).await;
        }

        page_result.map_err(|e| BrowserError::SessionClosed(e.to_string()))
    }
}
