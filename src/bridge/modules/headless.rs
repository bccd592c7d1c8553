//! `headless` module: browser automation through the DevTools protocol
//!
//! Browsers, pages and elements carry live external state. Launching is a
//! soft failure; every method on a live handle is fatal when the driver
//! reports an error.

use std::cell::RefCell;
use std::rc::Rc;

use chromiumoxide::{Browser, BrowserConfig};
use deno_core::{op2, Op, OpDecl, OpState};
use futures::future::LocalBoxFuture;
use futures::StreamExt;
use serde_json::Value;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{soft_err, soft_ok, NativeModule};
use crate::bridge::error::BridgeError;
use crate::bridge::handle::{Args, HandleKind, HandleTable, MethodOutput, MethodSet, NativeObject};
use crate::core::config::HeadlessConfig;

const LOADER: &str = r#"({ ops, soft }) => Object.freeze({
  browser: async () => soft(await ops.op_headless_browser()),
})"#;

type MethodFuture = LocalBoxFuture<'static, Result<MethodOutput, BridgeError>>;

/// A running browser and the task pumping its DevTools connection
pub struct BrowserHost {
    browser: Browser,
    driver: JoinHandle<()>,
}

impl BrowserHost {
    /// Connect to `ws_url` when configured, otherwise launch a local Chrome
    pub async fn start(settings: &HeadlessConfig) -> Result<Self, String> {
        let (browser, mut handler) = match &settings.ws_url {
            Some(ws_url) => {
                info!(ws_url = %ws_url, "Connecting to running browser");
                Browser::connect(ws_url.clone())
                    .await
                    .map_err(|e| format!("failed to connect to {}: {}", ws_url, e))?
            }
            None => {
                let config = launch_config(settings)
                    .map_err(|e| format!("failed to launch browser: {}", e))?;
                info!(headless = settings.headless, "Launching browser");
                Browser::launch(config)
                    .await
                    .map_err(|e| format!("failed to launch browser: {}", e))?
            }
        };

        let driver = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(err) = event {
                    debug!(error = %err, "Browser handler reported an error");
                }
            }
        });

        Ok(Self { browser, driver })
    }
}

impl Drop for BrowserHost {
    fn drop(&mut self) {
        self.driver.abort();
    }
}

fn launch_config(settings: &HeadlessConfig) -> Result<BrowserConfig, String> {
    let mut builder =
        BrowserConfig::builder().request_timeout(Duration::from_secs(settings.request_timeout));
    if !settings.headless {
        builder = builder.with_head();
    }
    if let Some(executable) = &settings.executable {
        builder = builder.chrome_executable(executable);
    }
    builder.build()
}

fn browser_page(object: NativeObject, args: Args) -> MethodFuture {
    Box::pin(async move {
        let host = object.as_browser()?;
        let url = args.string(0)?;
        info!(url = %url, "Opening page");
        let page = host.browser.new_page(url.clone()).await?;
        page.wait_for_navigation().await?;
        Ok(MethodOutput::Object(NativeObject::Page(page)))
    })
}

fn page_element(object: NativeObject, args: Args) -> MethodFuture {
    Box::pin(async move {
        let page = object.as_page()?;
        let selector = args.string(0)?;
        let element = page.find_element(selector.as_str()).await?;
        Ok(MethodOutput::Object(NativeObject::Element(Rc::new(element))))
    })
}

fn page_elements(object: NativeObject, args: Args) -> MethodFuture {
    Box::pin(async move {
        let page = object.as_page()?;
        let selector = args.string(0)?;
        let elements = page.find_elements(selector.as_str()).await?;
        Ok(MethodOutput::Objects(
            elements
                .into_iter()
                .map(|el| NativeObject::Element(Rc::new(el)))
                .collect(),
        ))
    })
}

fn page_html(object: NativeObject, _: Args) -> MethodFuture {
    Box::pin(async move {
        let content = object.as_page()?.content().await?;
        Ok(MethodOutput::Value(content.into()))
    })
}

fn page_navigate(object: NativeObject, args: Args) -> MethodFuture {
    Box::pin(async move {
        let page = object.as_page()?;
        let url = args.string(0)?;
        info!(url = %url, "Navigating page");
        page.goto(url.as_str()).await?;
        Ok(MethodOutput::Unit)
    })
}

fn page_url(object: NativeObject, _: Args) -> MethodFuture {
    Box::pin(async move {
        let url = object.as_page()?.url().await?;
        Ok(MethodOutput::Value(url.map(Value::String).unwrap_or(Value::Null)))
    })
}

fn element_input(object: NativeObject, args: Args) -> MethodFuture {
    Box::pin(async move {
        let element = object.as_element()?;
        let text = args.string(0)?;
        info!(chars = text.chars().count(), "Typing into element");
        element.focus().await?.type_str(text.as_str()).await?;
        Ok(MethodOutput::Unit)
    })
}

fn element_click(object: NativeObject, _: Args) -> MethodFuture {
    Box::pin(async move {
        let element = object.as_element()?;
        info!("Clicking element");
        element.click().await?;
        Ok(MethodOutput::Unit)
    })
}

fn element_text(object: NativeObject, _: Args) -> MethodFuture {
    Box::pin(async move {
        let element = object.as_element()?;
        info!("Reading element text");
        let text = element.inner_text().await?.unwrap_or_default();
        Ok(MethodOutput::Value(text.into()))
    })
}

fn element_attribute(object: NativeObject, args: Args) -> MethodFuture {
    Box::pin(async move {
        let element = object.as_element()?;
        let name = args.string(0)?;
        info!(attribute = %name, "Reading element attribute");
        let value = element.attribute(name.as_str()).await?;
        Ok(MethodOutput::Value(value.map(Value::String).unwrap_or(Value::Null)))
    })
}

fn element_html(object: NativeObject, _: Args) -> MethodFuture {
    Box::pin(async move {
        let element = object.as_element()?;
        info!("Reading element html");
        let html = element.outer_html().await?.unwrap_or_default();
        Ok(MethodOutput::Value(html.into()))
    })
}

fn element_property(object: NativeObject, args: Args) -> MethodFuture {
    Box::pin(async move {
        let element = object.as_element()?;
        let name = args.string(0)?;
        info!(property = %name, "Reading element property");
        let value = element.property(name.as_str()).await?;
        Ok(MethodOutput::Value(property_string(value)))
    })
}

/// Strings pass through, other values become their JSON text, missing is null
fn property_string(value: Option<Value>) -> Value {
    match value {
        None | Some(Value::Null) => Value::Null,
        Some(Value::String(s)) => Value::String(s),
        Some(other) => Value::String(other.to_string()),
    }
}

#[op2(async)]
#[serde]
async fn op_headless_browser(state: Rc<RefCell<OpState>>) -> Result<serde_json::Value, anyhow::Error> {
    let settings = state.borrow().borrow::<HeadlessConfig>().clone();

    match BrowserHost::start(&settings).await {
        Ok(host) => {
            let encoded = state
                .borrow_mut()
                .borrow_mut::<HandleTable>()
                .export_object(NativeObject::Browser(Rc::new(host)));
            Ok(soft_ok(encoded))
        }
        Err(err) => {
            warn!(error = %err, "Browser unavailable");
            Ok(soft_err(err))
        }
    }
}

pub struct HeadlessModule {
    settings: HeadlessConfig,
}

impl HeadlessModule {
    pub fn new(settings: HeadlessConfig) -> Self {
        Self { settings }
    }
}

impl NativeModule for HeadlessModule {
    fn name(&self) -> &'static str {
        "headless"
    }

    fn ops(&self) -> Vec<OpDecl> {
        vec![op_headless_browser::DECL]
    }

    fn register(&self, table: &mut HandleTable) {
        table.register(
            HandleKind::Browser,
            MethodSet::new().asynchronous("page", browser_page),
        );
        table.register(
            HandleKind::Page,
            MethodSet::new()
                .asynchronous("element", page_element)
                .asynchronous("elements", page_elements)
                .asynchronous("html", page_html)
                .asynchronous("navigate", page_navigate)
                .asynchronous("url", page_url),
        );
        table.register(
            HandleKind::Element,
            MethodSet::new()
                .asynchronous("input", element_input)
                .asynchronous("click", element_click)
                .asynchronous("text", element_text)
                .asynchronous("attribute", element_attribute)
                .asynchronous("html", element_html)
                .asynchronous("property", element_property),
        );
    }

    fn install(&self, state: &mut OpState) -> anyhow::Result<()> {
        state.put(self.settings.clone());
        Ok(())
    }

    fn loader(&self) -> &'static str {
        LOADER
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[tokio::test]
    async fn test_launch_with_missing_executable_is_soft() {
        let settings = HeadlessConfig {
            executable: Some(PathBuf::from("/nonexistent/folio/chrome")),
            ..HeadlessConfig::default()
        };
        let err = BrowserHost::start(&settings).await.err().unwrap();
        assert!(err.contains("failed to launch browser"), "{}", err);
    }

    #[tokio::test]
    async fn test_connect_to_closed_port_is_soft() {
        let settings = HeadlessConfig {
            ws_url: Some("ws://127.0.0.1:1/devtools/browser/none".to_string()),
            ..HeadlessConfig::default()
        };
        let err = BrowserHost::start(&settings).await.err().unwrap();
        assert!(err.contains("failed to connect"), "{}", err);
    }

    #[test]
    fn test_registers_async_methods() {
        let mut table = HandleTable::new();
        HeadlessModule::new(HeadlessConfig::default()).register(&mut table);
        let description = table.describe();
        assert_eq!(description["browser"]["page"], "async");
        assert_eq!(description["element"]["click"], "async");
        assert_eq!(description["page"]["elements"], "async");
        assert!(description.get("document").is_none());
    }

    #[test]
    fn test_property_is_read_as_string() {
        use serde_json::json;

        assert_eq!(property_string(None), Value::Null);
        assert_eq!(property_string(Some(Value::Null)), Value::Null);
        assert_eq!(property_string(Some(json!("next"))), json!("next"));
        assert_eq!(property_string(Some(json!(3))), json!("3"));

        let lookalike = json!({ "handle": { "id": 1, "kind": "browser" } });
        assert_eq!(
            property_string(Some(lookalike.clone())),
            Value::String(lookalike.to_string())
        );
    }
}
