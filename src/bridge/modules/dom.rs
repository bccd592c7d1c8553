//! `dom` module: parsed HTML documents and selections
//!
//! Documents and selections are immutable. Every query returns a new
//! selection that shares the parsed tree with the document it came from.

use std::cell::RefCell;
use std::collections::HashSet;
use std::rc::Rc;

use anyhow::Context;
use deno_core::{op2, Op, OpDecl, OpState};
use ego_tree::NodeId;
use scraper::{ElementRef, Html, Selector};
use serde_json::Value;
use tracing::{debug, warn};

use super::{soft_err, soft_ok, NativeModule};
use crate::bridge::error::BridgeError;
use crate::bridge::handle::{Args, HandleKind, HandleTable, MethodOutput, MethodSet, NativeObject};
use crate::core::config::HttpConfig;

const LOADER: &str = r#"({ ops, soft }) => Object.freeze({
  parse: (markup) => soft(ops.op_dom_parse(String(markup ?? ""))),
  fetch: async (url) => soft(await ops.op_dom_fetch(String(url))),
})"#;

pub struct Document {
    html: Html,
}

impl Document {
    pub fn parse(markup: &str) -> Self {
        Self {
            html: Html::parse_document(markup),
        }
    }

    pub fn html(&self) -> String {
        self.html.html()
    }

    pub fn text(&self) -> String {
        self.html.root_element().text().collect()
    }

    pub fn find(self: &Rc<Self>, selector: &str) -> Selection {
        let nodes = match compile(selector) {
            Some(selector) => self.html.select(&selector).map(|el| el.id()).collect(),
            None => Vec::new(),
        };
        Selection::new(self.clone(), nodes)
    }

    fn element(&self, id: NodeId) -> Option<ElementRef<'_>> {
        self.html.tree.get(id).and_then(ElementRef::wrap)
    }
}

/// An ordered set of elements of one document
pub struct Selection {
    document: Rc<Document>,
    nodes: Vec<NodeId>,
}

impl Selection {
    fn new(document: Rc<Document>, nodes: Vec<NodeId>) -> Self {
        Self { document, nodes }
    }

    fn elements(&self) -> impl Iterator<Item = ElementRef<'_>> {
        self.nodes.iter().filter_map(|id| self.document.element(*id))
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Descendants of every element in the selection matching `selector`
    pub fn find(&self, selector: &str) -> Selection {
        let Some(selector) = compile(selector) else {
            return Selection::new(self.document.clone(), Vec::new());
        };

        let mut seen = HashSet::new();
        let nodes = self
            .elements()
            .flat_map(|el| el.select(&selector).map(|found| found.id()).collect::<Vec<_>>())
            .filter(|id| seen.insert(*id))
            .collect();
        Selection::new(self.document.clone(), nodes)
    }

    /// Combined text of every element
    pub fn text(&self) -> String {
        self.elements().flat_map(|el| el.text()).collect()
    }

    /// Inner HTML of the first element
    pub fn html(&self) -> String {
        self.elements()
            .next()
            .map(|el| el.inner_html())
            .unwrap_or_default()
    }

    /// Attribute of the first element
    pub fn attr(&self, name: &str) -> Option<String> {
        self.elements()
            .next()
            .and_then(|el| el.value().attr(name).map(str::to_string))
    }

    /// Single-element selection at `index`, empty when out of range
    pub fn at(&self, index: usize) -> Selection {
        let nodes = self.nodes.get(index).copied().into_iter().collect();
        Selection::new(self.document.clone(), nodes)
    }

    pub fn split(&self) -> Vec<Selection> {
        (0..self.len()).map(|i| self.at(i)).collect()
    }
}

fn compile(selector: &str) -> Option<Selector> {
    match Selector::parse(selector) {
        Ok(selector) => Some(selector),
        Err(err) => {
            warn!(selector = %selector, error = ?err, "Invalid selector, matching nothing");
            None
        }
    }
}

fn selection(sel: Selection) -> MethodOutput {
    MethodOutput::Object(NativeObject::Selection(Rc::new(sel)))
}

fn document_find(object: &NativeObject, args: &Args) -> Result<MethodOutput, BridgeError> {
    Ok(selection(object.as_document()?.find(&args.string(0)?)))
}

fn document_html(object: &NativeObject, _: &Args) -> Result<MethodOutput, BridgeError> {
    Ok(MethodOutput::Value(object.as_document()?.html().into()))
}

fn document_text(object: &NativeObject, _: &Args) -> Result<MethodOutput, BridgeError> {
    Ok(MethodOutput::Value(object.as_document()?.text().into()))
}

fn selection_find(object: &NativeObject, args: &Args) -> Result<MethodOutput, BridgeError> {
    Ok(selection(object.as_selection()?.find(&args.string(0)?)))
}

fn selection_length(object: &NativeObject, _: &Args) -> Result<MethodOutput, BridgeError> {
    Ok(MethodOutput::Value(object.as_selection()?.len().into()))
}

fn selection_text(object: &NativeObject, _: &Args) -> Result<MethodOutput, BridgeError> {
    Ok(MethodOutput::Value(object.as_selection()?.text().into()))
}

fn selection_html(object: &NativeObject, _: &Args) -> Result<MethodOutput, BridgeError> {
    Ok(MethodOutput::Value(object.as_selection()?.html().into()))
}

fn selection_attr(object: &NativeObject, args: &Args) -> Result<MethodOutput, BridgeError> {
    let value = object.as_selection()?.attr(&args.string(0)?);
    Ok(MethodOutput::Value(value.map(Value::String).unwrap_or(Value::Null)))
}

fn selection_first(object: &NativeObject, _: &Args) -> Result<MethodOutput, BridgeError> {
    Ok(selection(object.as_selection()?.at(0)))
}

fn selection_at(object: &NativeObject, args: &Args) -> Result<MethodOutput, BridgeError> {
    Ok(selection(object.as_selection()?.at(args.index(0)?)))
}

fn selection_to_array(object: &NativeObject, _: &Args) -> Result<MethodOutput, BridgeError> {
    let parts = object
        .as_selection()?
        .split()
        .into_iter()
        .map(|sel| NativeObject::Selection(Rc::new(sel)))
        .collect();
    Ok(MethodOutput::Objects(parts))
}

/// GET `url` and parse the body whatever the status code
pub async fn fetch_document(client: &reqwest::Client, url: &str) -> reqwest::Result<Document> {
    let response = client.get(url).send().await?;
    let status = response.status();
    let body = response.bytes().await?;
    debug!(url = %url, status = %status, bytes = body.len(), "Fetched document");
    Ok(Document::parse(&String::from_utf8_lossy(&body)))
}

struct DomClient(reqwest::Client);

#[op2]
#[serde]
fn op_dom_parse(state: &mut OpState, #[string] markup: String) -> serde_json::Value {
    let document = Rc::new(Document::parse(&markup));
    let encoded = state
        .borrow_mut::<HandleTable>()
        .export_object(NativeObject::Document(document));
    soft_ok(encoded)
}

#[op2(async)]
#[serde]
async fn op_dom_fetch(
    state: Rc<RefCell<OpState>>,
    #[string] url: String,
) -> Result<serde_json::Value, anyhow::Error> {
    let client = state.borrow().borrow::<DomClient>().0.clone();

    match fetch_document(&client, &url).await {
        Ok(document) => {
            let encoded = state
                .borrow_mut()
                .borrow_mut::<HandleTable>()
                .export_object(NativeObject::Document(Rc::new(document)));
            Ok(soft_ok(encoded))
        }
        Err(err) => {
            warn!(url = %url, error = %err, "Document fetch failed");
            Ok(soft_err(err.to_string()))
        }
    }
}

pub struct DomModule {
    http: HttpConfig,
}

impl DomModule {
    pub fn new(http: HttpConfig) -> Self {
        Self { http }
    }
}

impl NativeModule for DomModule {
    fn name(&self) -> &'static str {
        "dom"
    }

    fn ops(&self) -> Vec<OpDecl> {
        vec![op_dom_parse::DECL, op_dom_fetch::DECL]
    }

    fn register(&self, table: &mut HandleTable) {
        table.register(
            HandleKind::Document,
            MethodSet::new()
                .sync("find", document_find)
                .sync("html", document_html)
                .sync("text", document_text),
        );
        table.register(
            HandleKind::Selection,
            MethodSet::new()
                .sync("find", selection_find)
                .sync("length", selection_length)
                .sync("text", selection_text)
                .sync("html", selection_html)
                .sync("attr", selection_attr)
                .sync("first", selection_first)
                .sync("at", selection_at)
                .sync("toArray", selection_to_array),
        );
    }

    fn install(&self, state: &mut OpState) -> anyhow::Result<()> {
        let client = self
            .http
            .build_client()
            .context("Failed to build HTTP client for the dom module")?;
        state.put(DomClient(client));
        Ok(())
    }

    fn loader(&self) -> &'static str {
        LOADER
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    const PAGE: &str = r#"<html><body>
        <ul id="chapters">
          <li><a href="/c/1" class="ch">One</a></li>
          <li><a href="/c/2" class="ch">Two</a></li>
          <li><a href="/c/3">Three</a></li>
        </ul>
      </body></html>"#;

    fn document(markup: &str) -> Rc<Document> {
        Rc::new(Document::parse(markup))
    }

    #[test]
    fn test_find_counts_matches() {
        let doc = document("<html><body><a>hi</a></body></html>");
        assert_eq!(doc.find("a").len(), 1);
        assert_eq!(doc.find("b").len(), 0);
        assert_eq!(doc.find("a").text(), "hi");
    }

    #[test]
    fn test_selection_queries() {
        let doc = document(PAGE);
        let links = doc.find("#chapters").find("a");
        assert_eq!(links.len(), 3);
        assert_eq!(links.attr("href").as_deref(), Some("/c/1"));
        assert_eq!(links.at(2).text(), "Three");
        assert_eq!(links.at(2).attr("class"), None);
        assert!(links.at(9).is_empty());
        assert_eq!(doc.find("a.ch").text(), "OneTwo");

        let parts = links.split();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[1].attr("href").as_deref(), Some("/c/2"));
    }

    #[test]
    fn test_nested_find_does_not_duplicate() {
        let doc = document("<div><div><p>x</p></div></div>");
        assert_eq!(doc.find("div").find("p").len(), 1);
    }

    #[test]
    fn test_invalid_selector_matches_nothing() {
        let doc = document(PAGE);
        assert!(doc.find("a[").is_empty());
        assert!(doc.find("ul").find(":::").is_empty());
    }

    #[test]
    fn test_html_of_first_element() {
        let doc = document("<p><b>bold</b></p><p>second</p>");
        assert_eq!(doc.find("p").html(), "<b>bold</b>");
        assert!(doc.html().contains("<p>second</p>"));
        assert_eq!(doc.find("span").html(), "");
    }

    #[test]
    fn test_selection_methods_reject_documents() {
        let object = NativeObject::Document(document(PAGE));
        let err = selection_length(&object, &Args::default()).err().unwrap();
        assert_eq!(err.to_string(), "type error: selection expected, got document");
    }

    /// Serve one canned HTTP response and return its URL
    pub(crate) async fn serve_once(status_line: &'static str, body: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 1024];
            let _ = socket.read(&mut buf).await;
            let response = format!(
                "{}\r\nContent-Type: text/html\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                status_line,
                body.len(),
                body
            );
            socket.write_all(response.as_bytes()).await.unwrap();
        });
        format!("http://{}/", addr)
    }

    #[tokio::test]
    async fn test_fetch_parses_error_status_body() {
        let url = serve_once(
            "HTTP/1.1 500 Internal Server Error",
            "<html><body><a>broken but valid</a></body></html>",
        )
        .await;
        let client = HttpConfig::default().build_client().unwrap();

        let doc = Rc::new(fetch_document(&client, &url).await.unwrap());
        assert_eq!(doc.find("a").text(), "broken but valid");
    }

    #[tokio::test]
    async fn test_fetch_unreachable_host_fails() {
        let client = HttpConfig::default().build_client().unwrap();
        let err = fetch_document(&client, "http://127.0.0.1:1/").await.err().unwrap();
        assert!(!err.to_string().is_empty());
    }
}
