//! Page reassembly against a scripted tunnel

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use dnsurf_engine::{Error, FetchOptions, PageCache, PageFetcher};
use surf_dns::TxtQuery;
use surf_protocol::{chunk_text, select_fragment, AddressCodec, Fragment, PagePayload};
use tokio::time::Instant;

const URL: &str = "https://site.test/article";

/// Answers queries from a fixed chunk list, with scripted failures
#[derive(Default)]
struct ScriptedTunnel {
    chunks: Vec<String>,
    /// Raw answer to every query, bypassing `chunks`
    raw: Option<String>,
    /// Pages that always time out
    failing: HashSet<u32>,
    /// Pages answered with a fragment carrying the wrong index
    misnumbered: HashSet<u32>,
    /// Number of initial page-0 queries that time out
    first_failures: AtomicUsize,
    /// Time every query takes before it is answered
    latency: Option<Duration>,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
    queries: Mutex<Vec<(u32, Duration, Instant)>>,
}

impl ScriptedTunnel {
    fn with_text(text: &str) -> Self {
        Self {
            chunks: chunk_text(text, 240),
            ..Self::default()
        }
    }

    fn query_count(&self) -> usize {
        self.queries.lock().unwrap().len()
    }
}

#[async_trait]
impl TxtQuery for ScriptedTunnel {
    async fn send_query(&self, qname: &str, timeout: Duration) -> surf_dns::Result<String> {
        let address = AddressCodec::default().decode(qname).unwrap();
        assert_eq!(address.url, URL);
        let page = address.page;
        self.queries.lock().unwrap().push((page, timeout, Instant::now()));

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if page == 0
            && self
                .first_failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
        {
            return Err(surf_dns::Error::Timeout(qname.to_string()));
        }
        if self.failing.contains(&page) {
            return Err(surf_dns::Error::Timeout(qname.to_string()));
        }
        if let Some(raw) = &self.raw {
            return Ok(raw.clone());
        }

        let fragment = select_fragment(&self.chunks, page, 300).unwrap();
        if self.misnumbered.contains(&page) {
            return Ok(Fragment::new(99, fragment.total, "zzz").to_wire());
        }
        Ok(fragment.to_wire())
    }
}

fn fetcher(tunnel: Arc<ScriptedTunnel>) -> PageFetcher {
    PageFetcher::new(
        tunnel,
        AddressCodec::default(),
        PageCache::default(),
        FetchOptions::default(),
    )
}

fn no_progress(_done: usize, _total: usize) {}

/// Text that neither snappy nor the chunker can shrink much
fn noisy_text(len: usize) -> String {
    let mut state: u32 = 0x2545_f491;
    (0..len)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            char::from(b'a' + (state % 26) as u8)
        })
        .collect()
}

#[tokio::test(start_paused = true)]
async fn test_failed_fragment_leaves_gap() {
    let text = "a".repeat(240) + &"b".repeat(240) + &"c".repeat(240) + &"d".repeat(100);
    let mut tunnel = ScriptedTunnel::with_text(&text);
    tunnel.failing.insert(2); // fragment 3
    let tunnel = Arc::new(tunnel);

    let assembly = fetcher(tunnel.clone()).reassemble(URL, &no_progress).await.unwrap();

    assert_eq!(assembly.total, 4);
    assert_eq!(assembly.missing, vec![3]);
    assert_eq!(
        assembly.text,
        "a".repeat(240) + &"b".repeat(240) + &"d".repeat(100)
    );
    // one attempt per remaining fragment
    assert_eq!(tunnel.query_count(), 4);
}

#[tokio::test(start_paused = true)]
async fn test_index_mismatch_leaves_gap() {
    let mut tunnel = ScriptedTunnel::with_text(&"x".repeat(600));
    tunnel.misnumbered.insert(1);
    let assembly = fetcher(Arc::new(tunnel))
        .reassemble(URL, &no_progress)
        .await
        .unwrap();

    assert_eq!(assembly.missing, vec![2]);
    assert_eq!(assembly.text.len(), 360);
    assert!(!assembly.text.contains('z'));
}

#[tokio::test(start_paused = true)]
async fn test_fetch_page_decodes_and_caches() {
    let payload = PagePayload::notice(&noisy_text(900));
    let tunnel = Arc::new(ScriptedTunnel::with_text(&payload.compress().unwrap()));
    let fetcher = fetcher(tunnel.clone());

    let seen = Mutex::new(Vec::new());
    let progress = |done: usize, total: usize| seen.lock().unwrap().push((done, total));

    let page = fetcher.fetch_page(URL, &progress).await.unwrap();
    assert_eq!(*page, payload);

    let seen = seen.into_inner().unwrap();
    let total = seen[0].1;
    assert!(total > 1);
    assert_eq!(seen.len(), total);
    assert_eq!(seen.last(), Some(&(total, total)));

    let queries = tunnel.query_count();
    let again = fetcher.fetch_page(URL, &no_progress).await.unwrap();
    assert!(Arc::ptr_eq(&page, &again));
    assert_eq!(tunnel.query_count(), queries);
}

#[tokio::test(start_paused = true)]
async fn test_first_fragment_retries_with_growing_timeout() {
    let tunnel = ScriptedTunnel::with_text(&PagePayload::notice("hi").compress().unwrap());
    tunnel.first_failures.store(2, Ordering::SeqCst);
    let tunnel = Arc::new(tunnel);

    let page = fetcher(tunnel.clone()).fetch_page(URL, &no_progress).await.unwrap();
    assert_eq!(*page, PagePayload::notice("hi"));

    let timeouts: Vec<Duration> = tunnel.queries.lock().unwrap().iter().map(|q| q.1).collect();
    assert_eq!(
        timeouts,
        vec![
            Duration::from_millis(8000),
            Duration::from_millis(10_000),
            Duration::from_millis(12_000)
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_first_fragment_backoff_grows() {
    let tunnel = ScriptedTunnel::with_text(&PagePayload::notice("hi").compress().unwrap());
    tunnel.first_failures.store(2, Ordering::SeqCst);
    let tunnel = Arc::new(tunnel);

    fetcher(tunnel.clone()).fetch_page(URL, &no_progress).await.unwrap();

    let sent: Vec<Instant> = tunnel.queries.lock().unwrap().iter().map(|q| q.2).collect();
    assert_eq!(sent.len(), 3);
    let first_gap = sent[1] - sent[0];
    let second_gap = sent[2] - sent[1];

    // base delay times the attempt number, plus under 80ms of jitter
    assert!(first_gap >= Duration::from_millis(120), "{:?}", first_gap);
    assert!(first_gap < Duration::from_millis(200), "{:?}", first_gap);
    assert!(second_gap >= Duration::from_millis(240), "{:?}", second_gap);
    assert!(second_gap < Duration::from_millis(320), "{:?}", second_gap);
    assert!(second_gap > first_gap);
}

#[tokio::test(start_paused = true)]
async fn test_parallel_requests_bound_in_flight_queries() {
    for parallel_requests in [3, 5] {
        let tunnel = Arc::new(ScriptedTunnel {
            latency: Some(Duration::from_millis(50)),
            ..ScriptedTunnel::with_text(&"x".repeat(2400))
        });
        let fetcher = PageFetcher::new(
            tunnel.clone(),
            AddressCodec::default(),
            PageCache::default(),
            FetchOptions {
                parallel_requests,
                ..FetchOptions::default()
            },
        );

        let assembly = fetcher.reassemble(URL, &no_progress).await.unwrap();
        assert_eq!(assembly.total, 10);
        assert!(assembly.missing.is_empty());
        assert_eq!(tunnel.query_count(), 10);
        assert_eq!(
            tunnel.peak_in_flight.load(Ordering::SeqCst),
            parallel_requests
        );
    }
}

#[tokio::test(start_paused = true)]
async fn test_first_fragment_exhaustion_fails_page() {
    let tunnel = ScriptedTunnel::with_text("irrelevant");
    tunnel.first_failures.store(10, Ordering::SeqCst);
    let tunnel = Arc::new(tunnel);

    let err = fetcher(tunnel.clone())
        .fetch_page(URL, &no_progress)
        .await
        .unwrap_err();
    assert!(err.is_recoverable());
    assert_eq!(tunnel.query_count(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_short_single_fragment_is_not_cached() {
    let notice = PagePayload::notice("Timeout loading page");
    let tunnel = Arc::new(ScriptedTunnel::with_text(&notice.compress().unwrap()));
    let fetcher = fetcher(tunnel.clone());

    assert_eq!(*fetcher.fetch_page(URL, &no_progress).await.unwrap(), notice);
    assert_eq!(*fetcher.fetch_page(URL, &no_progress).await.unwrap(), notice);
    assert_eq!(tunnel.query_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_long_single_fragment_is_cached() {
    let payload = PagePayload::notice(&noisy_text(300));
    let text = payload.compress().unwrap();
    assert!(text.len() > 200);

    // no header: the whole answer is one fragment
    let tunnel = Arc::new(ScriptedTunnel {
        raw: Some(text),
        ..ScriptedTunnel::default()
    });
    let fetcher = fetcher(tunnel.clone());

    fetcher.fetch_page(URL, &no_progress).await.unwrap();
    fetcher.fetch_page(URL, &no_progress).await.unwrap();
    assert_eq!(tunnel.query_count(), 1);
    assert!(fetcher.cache().lock().await.has(URL));
}

#[tokio::test(start_paused = true)]
async fn test_undecodable_page_is_not_cached() {
    let tunnel = Arc::new(ScriptedTunnel::with_text(&"!".repeat(300)));
    let fetcher = fetcher(tunnel);

    let err = fetcher.fetch_page(URL, &no_progress).await.unwrap_err();
    assert!(matches!(err, Error::Decode(_)));
    assert!(fetcher.cache().lock().await.is_empty());
}
