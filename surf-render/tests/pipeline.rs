//! End-to-end tests of the render pipeline against a scripted fetcher

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use surf_protocol::{Attr, CompactNode, PagePayload, Tag};
use surf_render::{
    Error, Fetcher, MemoryStore, PageRenderer, RenderOptions, RenderPage, Resource, Result,
};

/// Scripted response for one URL
#[derive(Clone)]
enum Reply {
    Ok(&'static str, &'static str),
    Status(u16),
    Hang,
}

/// Fetcher that serves canned responses and counts requests
#[derive(Default)]
struct ScriptedFetcher {
    replies: HashMap<String, Reply>,
    calls: Mutex<HashMap<String, usize>>,
    total: AtomicUsize,
}

impl ScriptedFetcher {
    fn with(mut self, url: &str, reply: Reply) -> Self {
        self.replies.insert(url.to_string(), reply);
        self
    }

    fn calls(&self, url: &str) -> usize {
        self.calls.lock().unwrap().get(url).copied().unwrap_or(0)
    }
}

#[async_trait]
impl Fetcher for ScriptedFetcher {
    async fn fetch(&self, url: &str, timeout: Duration, _accept: &str) -> Result<Resource> {
        self.total.fetch_add(1, Ordering::SeqCst);
        *self.calls.lock().unwrap().entry(url.to_string()).or_default() += 1;

        match self.replies.get(url).cloned() {
            Some(Reply::Ok(content_type, body)) => Ok(Resource {
                url: url.to_string(),
                body: body.to_string(),
                content_type: Some(content_type.to_string()),
                content_length: Some(body.len() as u64),
                max_age: None,
            }),
            Some(Reply::Status(status)) => Err(Error::Http {
                url: url.to_string(),
                status,
            }),
            Some(Reply::Hang) | None => {
                tokio::time::sleep(timeout).await;
                Err(Error::Timeout {
                    url: url.to_string(),
                    timeout,
                })
            }
        }
    }
}

const PAGE: &str = r##"<!doctype html>
<html lang="en">
<head>
  <title>Sample</title>
  <style>.card { padding: 4px } .unused { color: blue }</style>
  <link rel="stylesheet" href="/site.css">
  <link rel="stylesheet" href="/missing.css">
  <script>track()</script>
</head>
<body bgcolor="#ffffff">
  <div class="card" onclick="go()">
    <h1>Hello   tunnel</h1>
    <img src="/logo.svg" alt="logo">
    <img src="/broken.svg" alt="broken">
    <img src="/photo.jpg" alt="photo">
    <input type="text" placeholder="Search">
  </div>
</body>
</html>"##;

const SITE_CSS: &str = "h1 { font-size: 2em } table { border: 0 }";

const LOGO: &str = r#"<svg xmlns="http://www.w3.org/2000/svg" onload="x()"><script>x()</script><circle r="1"/></svg>"#;

fn fetcher() -> ScriptedFetcher {
    ScriptedFetcher::default()
        .with("https://site.test/", Reply::Ok("text/html", PAGE))
        .with("https://site.test/site.css", Reply::Ok("text/css", SITE_CSS))
        .with("https://site.test/missing.css", Reply::Status(404))
        .with("https://site.test/logo.svg", Reply::Ok("image/svg+xml", LOGO))
        .with("https://site.test/broken.svg", Reply::Ok("text/html", "<html></html>"))
}

fn options() -> RenderOptions {
    RenderOptions {
        fetch_timeout: Duration::from_millis(500),
        resource_timeout: Duration::from_millis(100),
        ..RenderOptions::default()
    }
}

#[tokio::test]
async fn test_render_full_page() {
    let fetcher = Arc::new(fetcher());
    let renderer = PageRenderer::new(fetcher.clone(), Arc::new(MemoryStore::new(100)), options());

    let payload = renderer.render("https://site.test/").await.unwrap();

    assert_eq!(
        payload.body_attrs.get(&Attr::Bgcolor).map(String::as_str),
        Some("#ffffff")
    );

    assert_eq!(payload.dom.len(), 1);
    let card = payload.dom[0].as_element().unwrap();
    assert_eq!(card.tag, Tag::Div);
    assert_eq!(card.attrs, vec![(Attr::Class, "card".to_string())]);

    let heading = card.children[0].as_element().unwrap();
    assert_eq!(heading.tag, Tag::H1);
    assert_eq!(heading.children, vec![CompactNode::text("Hello tunnel")]);

    let placeholder = card.children.last().and_then(CompactNode::as_element).unwrap();
    assert_eq!(placeholder.tag, Tag::Div);
    assert_eq!(placeholder.attr(Attr::Class), Some("__chrome_input"));

    // purged against the body: .card and h1 survive, .unused and table do not
    assert!(payload.styles.contains(".card"));
    assert!(payload.styles.contains("h1"));
    assert!(!payload.styles.contains("unused"));
    assert!(!payload.styles.contains("table"));

    assert_eq!(payload.imgs.len(), 1);
    let logo = &payload.imgs["/logo.svg"];
    assert!(logo.contains("<circle"));
    assert!(!logo.contains("script"));
    assert!(!logo.contains("onload"));

    assert_eq!(fetcher.calls("https://site.test/photo.jpg"), 0);
}

#[tokio::test]
async fn test_resources_are_cached() {
    let fetcher = Arc::new(fetcher());
    let renderer = PageRenderer::new(fetcher.clone(), Arc::new(MemoryStore::new(100)), options());

    renderer.render("https://site.test/").await.unwrap();
    renderer.render("https://site.test/").await.unwrap();

    assert_eq!(fetcher.calls("https://site.test/"), 2);
    assert_eq!(fetcher.calls("https://site.test/site.css"), 1);
    assert_eq!(fetcher.calls("https://site.test/logo.svg"), 1);
    // failures are never cached
    assert_eq!(fetcher.calls("https://site.test/missing.css"), 2);
    assert_eq!(fetcher.calls("https://site.test/broken.svg"), 2);
}

#[tokio::test]
async fn test_page_errors_are_fatal() {
    let fetcher = Arc::new(
        ScriptedFetcher::default()
            .with("https://gone.test/", Reply::Status(500))
            .with("https://slow.test/", Reply::Hang),
    );
    let renderer = PageRenderer::new(fetcher, Arc::new(MemoryStore::new(10)), options());

    let err = renderer.render("https://gone.test/").await.unwrap_err();
    assert!(matches!(err, Error::Http { status: 500, .. }));
    assert!(!err.is_timeout());

    let err = renderer.render("https://slow.test/").await.unwrap_err();
    assert!(err.is_timeout());
}

#[tokio::test]
async fn test_slow_resource_is_skipped() {
    let fetcher = Arc::new(
        ScriptedFetcher::default()
            .with(
                "https://site.test/",
                Reply::Ok(
                    "text/html",
                    r#"<html><head><link rel="stylesheet" href="/slow.css"></head><body><p>ok</p></body></html>"#,
                ),
            )
            .with("https://site.test/slow.css", Reply::Hang),
    );
    let renderer = PageRenderer::new(fetcher, Arc::new(MemoryStore::new(10)), options());

    let payload = renderer.render("https://site.test/").await.unwrap();
    assert!(payload.styles.is_empty());
    assert_eq!(payload.dom.len(), 1);
}

#[tokio::test]
async fn test_render_compressed_round_trips() {
    let renderer = PageRenderer::new(
        Arc::new(fetcher()),
        Arc::new(MemoryStore::new(100)),
        options(),
    );

    let text = renderer.render_compressed("https://site.test/").await.unwrap();
    let decoded = PagePayload::decompress(&text).unwrap();
    assert_eq!(decoded, renderer.render("https://site.test/").await.unwrap());
}
