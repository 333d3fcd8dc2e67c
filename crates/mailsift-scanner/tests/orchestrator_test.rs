use mailsift_browser::mock::{MockPage, MockSessionFactory, NavigationScript};
use mailsift_browser::ProxyPool;
use mailsift_core::FailureKind;
use mailsift_scanner::{BatchOrchestrator, EventBus, ExtractorSettings, ScanError, ScanEvent};
use std::sync::Arc;
use std::time::Duration;

fn site(i: usize) -> String {
    format!("https://site-{i}.test/")
}

fn site_page(i: usize) -> MockPage {
    MockPage::new(format!("<p>Reach us at office{i}@site-{i}.test</p>"))
}

fn factory_with_sites(count: usize, delay: Duration) -> MockSessionFactory {
    (0..count).fold(MockSessionFactory::new(), |factory, i| {
        factory.with_page(site(i), site_page(i).with_load_delay(delay))
    })
}

fn orchestrator(factory: &MockSessionFactory) -> BatchOrchestrator {
    BatchOrchestrator::new(Arc::new(factory.clone()), Arc::new(ProxyPool::disabled()))
}

fn sites(count: usize) -> Vec<String> {
    (0..count).map(site).collect()
}

#[tokio::test(start_paused = true)]
async fn test_concurrency_bound() {
    let factory = factory_with_sites(20, Duration::from_secs(1));
    let stats = factory.stats();

    let summary = orchestrator(&factory)
        .with_max_concurrency(3)
        .run(sites(20))
        .await
        .expect("run batch");

    assert!(stats.max_active() <= 3, "max active was {}", stats.max_active());
    assert_eq!(stats.max_active(), 3);
    assert_eq!(summary.total_processed, 20);
    assert_eq!(summary.emails.len(), 20);
    assert_eq!(stats.opened(), stats.closed());
}

#[tokio::test(start_paused = true)]
async fn test_zero_concurrency_is_one() {
    let factory = factory_with_sites(4, Duration::from_secs(1));
    let stats = factory.stats();
    let orchestrator = orchestrator(&factory).with_max_concurrency(0);
    assert_eq!(orchestrator.max_concurrency(), 1);

    let summary = orchestrator.run(sites(4)).await.expect("run batch");
    assert_eq!(summary.total_processed, 4);
    assert_eq!(stats.max_active(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_pause_and_resume() {
    let factory = factory_with_sites(5, Duration::from_secs(1));
    let stats = factory.stats();
    let orchestrator = Arc::new(orchestrator(&factory).with_max_concurrency(1));

    let run = tokio::spawn({
        let orchestrator = orchestrator.clone();
        async move { orchestrator.run(sites(5)).await }
    });

    tokio::time::sleep(Duration::from_millis(100)).await;
    orchestrator.pause();

    tokio::time::sleep(Duration::from_secs(120)).await;
    assert_eq!(stats.opened(), 1, "only the in-flight URL may run while paused");
    assert!(!run.is_finished());

    orchestrator.resume();
    let summary = run.await.expect("run task").expect("run batch");
    assert_eq!(summary.total_processed, 5);
    assert_eq!(stats.opened(), 5);
}

#[tokio::test(start_paused = true)]
async fn test_stop_halts_dispatch() {
    let factory = factory_with_sites(10, Duration::from_secs(5));
    let stats = factory.stats();
    let orchestrator = Arc::new(orchestrator(&factory).with_max_concurrency(2));

    let run = tokio::spawn({
        let orchestrator = orchestrator.clone();
        async move { orchestrator.run(sites(10)).await }
    });

    tokio::time::sleep(Duration::from_secs(1)).await;
    orchestrator.stop();

    let summary = run.await.expect("run task").expect("run batch");
    assert_eq!(summary.dispatched, 2);
    assert_eq!(summary.skipped_urls.len(), 8);
    assert!(summary.total_processed <= summary.dispatched);
    assert_eq!(stats.opened(), 2);
    assert_eq!(stats.active(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_stop_during_retry_wait() {
    let url = site(0);
    let factory = MockSessionFactory::new().with_page(
        url.clone(),
        site_page(0).with_outcomes(vec![NavigationScript::Timeout, NavigationScript::Load]),
    );
    let stats = factory.stats();
    let orchestrator = Arc::new(orchestrator(&factory));

    let run = tokio::spawn({
        let orchestrator = orchestrator.clone();
        let url = url.clone();
        async move { orchestrator.run(vec![url]).await }
    });

    // First navigation times out at 60s, the retry would start at 63s
    tokio::time::sleep(Duration::from_secs(61)).await;
    orchestrator.stop();

    let summary = run.await.expect("run task").expect("run batch");
    assert_eq!(summary.stopped_urls, vec![url.clone()]);
    assert!(summary.failed_urls.is_empty());
    assert_eq!(stats.navigations_to(&url), 1);
}

#[tokio::test(start_paused = true)]
async fn test_partial_failure_isolation() {
    let bad = "https://slow.test/".to_string();
    let factory = factory_with_sites(9, Duration::ZERO).with_page(
        bad.clone(),
        MockPage::new("").with_outcomes(vec![NavigationScript::Timeout]),
    );

    let mut urls = sites(9);
    urls.insert(4, bad.clone());
    let summary = orchestrator(&factory)
        .with_max_concurrency(3)
        .run(urls)
        .await
        .expect("run batch");

    assert_eq!(summary.failed_urls.len(), 1);
    assert_eq!(summary.failed_urls[0].url, bad);
    assert_eq!(summary.failed_urls[0].error, FailureKind::NavigationTimeout);
    assert_eq!(summary.succeeded_urls.len(), 9);
    assert_eq!(summary.total_processed, 10);
}

#[tokio::test(start_paused = true)]
async fn test_panicking_page_does_not_abort_siblings() {
    let bad = "https://crash.test/".to_string();
    let factory = factory_with_sites(3, Duration::ZERO).with_page(
        bad.clone(),
        MockPage::new("").with_outcomes(vec![NavigationScript::Panic]),
    );

    let mut urls = sites(3);
    urls.push(bad);
    let summary = orchestrator(&factory).run(urls).await.expect("run batch");

    assert_eq!(summary.failed_urls.len(), 1);
    assert_eq!(summary.failed_urls[0].error, FailureKind::UnknownExtractionError);
    assert_eq!(summary.succeeded_urls.len(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_contact_paragraph_end_to_end() {
    let url = "https://example.com/contact".to_string();
    let factory = MockSessionFactory::new().with_page(
        url.clone(),
        MockPage::new(
            "<p>Contact us: SALES@Example.COM or noreply@example.com. Logo: img@cdn.example.com.png</p>",
        ),
    );

    let summary = orchestrator(&factory).run(vec![url]).await.expect("run batch");
    let emails: Vec<&str> = summary.emails.iter().map(|e| e.as_str()).collect();
    assert_eq!(emails, vec!["sales@example.com"]);
}

#[tokio::test(start_paused = true)]
async fn test_dispositions_cover_every_url() {
    let empty = "https://empty.test/".to_string();
    let factory = factory_with_sites(2, Duration::ZERO)
        .with_page(empty.clone(), MockPage::new("<p>nothing here</p>"));

    let urls = vec![site(0), empty.clone(), site(1), site(0)];
    let summary = orchestrator(&factory).run(urls).await.expect("run batch");

    assert_eq!(summary.total, 4);
    assert_eq!(summary.empty_urls, vec![empty]);
    assert_eq!(summary.succeeded_urls.len(), 3, "duplicates are processed independently");
    assert_eq!(summary.emails.len(), 2, "addresses are deduplicated across URLs");
    let accounted = summary.succeeded_urls.len()
        + summary.empty_urls.len()
        + summary.failed_urls.len()
        + summary.stopped_urls.len()
        + summary.skipped_urls.len();
    assert_eq!(accounted, summary.total);
}

#[tokio::test(start_paused = true)]
async fn test_event_ordering_at_batch_end() {
    let factory = factory_with_sites(4, Duration::ZERO);
    let (events, mut rx) = EventBus::channel();

    let summary = orchestrator(&factory)
        .with_max_concurrency(2)
        .with_events(events)
        .run(sites(4))
        .await
        .expect("run batch");

    let mut seen = Vec::new();
    while let Ok(event) = rx.try_recv() {
        seen.push(event);
    }

    let progress: Vec<u8> = seen
        .iter()
        .filter_map(|e| match e {
            ScanEvent::Progress { progress } => Some(*progress),
            _ => None,
        })
        .collect();
    assert_eq!(progress, vec![25, 50, 75, 100]);

    let tail = &seen[seen.len() - 3..];
    assert!(matches!(tail[0], ScanEvent::FailedUrls { ref urls } if urls.is_empty()));
    assert!(matches!(tail[1], ScanEvent::NoEmailUrls { ref urls } if urls.is_empty()));
    assert!(matches!(&tail[2], ScanEvent::Complete { summary: s } if *s == summary));
}

#[tokio::test]
async fn test_empty_url_list_is_rejected() {
    let factory = MockSessionFactory::new();
    let result = orchestrator(&factory).run(vec![" ".to_string()]).await;
    assert!(matches!(result, Err(ScanError::InvalidUrlList(_))));
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_closes_factory() {
    let factory = factory_with_sites(1, Duration::ZERO);
    let stats = factory.stats();
    let orchestrator = orchestrator(&factory);

    orchestrator.run(sites(1)).await.expect("run batch");
    orchestrator.shutdown(Duration::from_secs(5)).await;
    orchestrator.shutdown(Duration::from_secs(5)).await;

    assert!(stats.shutdown_called());
    assert!(matches!(
        orchestrator.run(sites(1)).await,
        Err(ScanError::Shutdown)
    ));
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_during_batch() {
    let factory = factory_with_sites(6, Duration::from_secs(2));
    let stats = factory.stats();
    let orchestrator = Arc::new(orchestrator(&factory).with_max_concurrency(2));

    let run = tokio::spawn({
        let orchestrator = orchestrator.clone();
        async move { orchestrator.run(sites(6)).await }
    });
    tokio::time::sleep(Duration::from_millis(500)).await;

    orchestrator.shutdown(Duration::from_secs(30)).await;
    assert_eq!(stats.active(), 0);
    assert!(stats.shutdown_called());

    let summary = run.await.expect("run task").expect("run batch");
    assert_eq!(summary.dispatched, 2);
    assert_eq!(summary.skipped_urls.len(), 4);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_progress_is_monotonic_across_threads() {
    let factory = factory_with_sites(64, Duration::ZERO);
    let (events, mut rx) = EventBus::channel();
    let settings = ExtractorSettings {
        settle_delay: Duration::ZERO,
        retry_delay: Duration::ZERO,
        empty_retry_delay: Duration::ZERO,
        secondary_settle_delay: Duration::ZERO,
        ..ExtractorSettings::default()
    };

    orchestrator(&factory)
        .with_max_concurrency(64)
        .with_settings(settings)
        .with_events(events)
        .run(sites(64))
        .await
        .expect("run batch");

    let mut progress = Vec::new();
    while let Ok(event) = rx.try_recv() {
        if let ScanEvent::Progress { progress: value } = event {
            progress.push(value);
        }
    }

    assert_eq!(progress.len(), 64);
    assert!(
        progress.windows(2).all(|pair| pair[0] <= pair[1]),
        "progress went backwards: {progress:?}"
    );
    assert_eq!(progress.last(), Some(&100));
}

#[tokio::test(start_paused = true)]
async fn test_stop_during_final_attempt() {
    let url = site(0);
    let factory = MockSessionFactory::new().with_page(
        url.clone(),
        site_page(0).with_outcomes(vec![NavigationScript::Timeout]),
    );
    let stats = factory.stats();
    let orchestrator = Arc::new(orchestrator(&factory));

    let run = tokio::spawn({
        let orchestrator = orchestrator.clone();
        let url = url.clone();
        async move { orchestrator.run(vec![url]).await }
    });

    // Second navigation runs from 63s to 123s
    tokio::time::sleep(Duration::from_secs(100)).await;
    orchestrator.stop();

    let summary = run.await.expect("run task").expect("run batch");
    assert_eq!(summary.stopped_urls, vec![url.clone()]);
    assert!(summary.failed_urls.is_empty());
    assert_eq!(stats.navigations_to(&url), 2);
}

#[tokio::test(start_paused = true)]
async fn test_stop_before_run_skips_everything() {
    let factory = factory_with_sites(3, Duration::ZERO);
    let stats = factory.stats();
    let orchestrator = orchestrator(&factory);

    orchestrator.stop();
    let summary = orchestrator.run(sites(3)).await.expect("run batch");

    assert_eq!(summary.dispatched, 0);
    assert_eq!(summary.skipped_urls.len(), 3);
    assert_eq!(stats.opened(), 0);
    assert!(!orchestrator.control().is_stopped(), "flags clear after the batch");

    let summary = orchestrator.run(sites(3)).await.expect("run batch");
    assert_eq!(summary.succeeded_urls.len(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_shares_one_grace_period() {
    let factory = factory_with_sites(1, Duration::from_secs(50));
    let stats = factory.stats();
    let orchestrator = Arc::new(orchestrator(&factory));

    let run = tokio::spawn({
        let orchestrator = orchestrator.clone();
        async move { orchestrator.run(sites(1)).await }
    });
    tokio::time::sleep(Duration::from_secs(1)).await;

    let started = tokio::time::Instant::now();
    orchestrator.shutdown(Duration::from_secs(5)).await;

    assert_eq!(started.elapsed(), Duration::from_secs(5));
    assert_eq!(stats.shutdown_grace(), Some(Duration::ZERO));
    run.await.expect("run task").expect("run batch");
}

#[tokio::test(start_paused = true)]
async fn test_idle_shutdown_passes_full_grace() {
    let factory = factory_with_sites(1, Duration::ZERO);
    let stats = factory.stats();

    orchestrator(&factory).shutdown(Duration::from_secs(5)).await;
    assert_eq!(stats.shutdown_grace(), Some(Duration::from_secs(5)));
}
