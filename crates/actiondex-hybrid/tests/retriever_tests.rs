use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use actiondex_core::config::RetrievalConfig;
use actiondex_core::corpus::Corpus;
use actiondex_core::error::Error;
use actiondex_core::fingerprint::CorpusIdentity;
use actiondex_core::traits::Embedder;
use actiondex_core::types::SearchOutcome;
use actiondex_embed::HashEmbedder;
use actiondex_hybrid::cache::CACHE_DIR;
use actiondex_hybrid::{ActionRetriever, ActionTool, BuildOutcome, RetrieverState, NO_ACTION_FOUND};
use actiondex_text::QueryExpander;

const ACTION_DOC: &str = "Action Name: Apply Leave. Step 1: open HR portal. Step 2: click Apply Leave.";

const GUIDE: &str = "Action Name: Apply Leave\nLink: https://hr.example/leave\nSteps:\nStep 1: open HR portal\nStep 2: click Apply Leave\n\n\
Action Name: Download Payslip\nLink: https://hr.example/pay\nSteps:\nStep 1: open payroll\nStep 2: select the month\n\n\
Action Name: Update Profile\nLink: https://hr.example/profile\nSteps:\nStep 1: open my details\nStep 2: click Edit";

const TRAINING_GUIDE: &str = "Action Name: Book Training Course\nPortal: https://learn.example/courses\nProcedure:\nFirst sign in to the learning portal\nThen choose a course and press Enroll\n\n\
Action Name: Claim Travel Expenses\nPortal: https://finance.example/claims\nProcedure:\nFirst photograph every receipt\nThen upload them and press Submit Claim";

/// Hash embedder that counts calls and can be switched to fail.
struct FlakyEmbedder {
    inner: HashEmbedder,
    fail: AtomicBool,
    calls: AtomicUsize,
}

impl FlakyEmbedder {
    fn new() -> Arc<Self> {
        Arc::new(Self { inner: HashEmbedder::new(64), fail: AtomicBool::new(false), calls: AtomicUsize::new(0) })
    }
}

impl Embedder for FlakyEmbedder {
    fn embedder_id(&self) -> &str {
        self.inner.embedder_id()
    }

    fn dim(&self) -> usize {
        self.inner.dim()
    }

    fn embed_batch(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            anyhow::bail!("model offline");
        }
        self.inner.embed_batch(texts)
    }
}

fn small_config() -> RetrievalConfig {
    RetrievalConfig { chunk_size: 50, chunk_overlap: 10, ..RetrievalConfig::default() }
}

fn corpus(text: &str, tag: &str) -> Corpus {
    Corpus::from_texts(vec![("Knowledge Bot - Action Links and Steps.txt", text)], CorpusIdentity::VersionTag(tag.into()))
}

fn retriever(config: RetrievalConfig, root: &std::path::Path) -> ActionRetriever {
    ActionRetriever::new(config, Arc::new(HashEmbedder::new(64)), root).expect("retriever")
}

#[tokio::test]
async fn apply_leave_end_to_end() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let r = retriever(small_config(), tmp.path());

    assert_eq!(r.build(&corpus(ACTION_DOC, "v1"), false).await?, BuildOutcome::Built { persisted: true });
    assert_eq!(r.state(), RetrieverState::Ready);
    let bundle = r.bundle().expect("bundle");
    assert!(bundle.chunks.iter().any(|c| c.text.contains("Step 1")));

    let expanded = QueryExpander::default().expand("how do I apply for leave");
    assert!(expanded.contains("request") && expanded.contains("submit"));

    match r.search("how do I apply for leave") {
        SearchOutcome::Found(results) => {
            assert!(results.len() <= 5);
            assert!(results.iter().any(|res| res.content.contains("Step 1") && res.score >= 0.3), "{results:#?}");
            for pair in results.windows(2) {
                assert!(pair[0].score >= pair[1].score);
            }
        }
        SearchOutcome::NoMatch => panic!("expected a match"),
    }
    Ok(())
}

#[tokio::test]
async fn empty_corpus_stays_unbuilt() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let r = Arc::new(retriever(small_config(), tmp.path()));
    let empty = Corpus::from_texts(Vec::<(String, String)>::new(), CorpusIdentity::Files(vec![]));

    assert_eq!(r.build(&empty, false).await?, BuildOutcome::Empty);
    assert_eq!(r.state(), RetrieverState::Unbuilt);
    assert_eq!(r.search("apply leave"), SearchOutcome::NoMatch);
    assert_eq!(ActionTool::new(r).run("apply leave"), NO_ACTION_FOUND);
    Ok(())
}

#[tokio::test]
async fn a_fresh_process_loads_the_same_index() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let config = RetrievalConfig { chunk_size: 120, chunk_overlap: 20, ..RetrievalConfig::default() };
    let first = retriever(config.clone(), tmp.path());
    assert!(matches!(first.build(&corpus(GUIDE, "etag-1"), false).await?, BuildOutcome::Built { persisted: true }));

    let second = retriever(config, tmp.path());
    assert_eq!(second.build(&corpus(GUIDE, "etag-1"), false).await?, BuildOutcome::Loaded);
    assert_eq!(second.fingerprint(), first.fingerprint());
    for q in ["how do I apply for leave", "download payslip", "update my profile", "holiday"] {
        assert_eq!(second.inspect(q, 5)?, first.inspect(q, 5)?, "query {q:?}");
    }
    Ok(())
}

#[tokio::test]
async fn rebuild_decisions_follow_the_fingerprint() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let r = retriever(small_config(), tmp.path());
    let doc = corpus(GUIDE, "etag-1");

    assert!(matches!(r.build(&doc, false).await?, BuildOutcome::Built { .. }));
    assert_eq!(r.build(&doc, false).await?, BuildOutcome::Unchanged);
    assert!(matches!(r.build(&doc, true).await?, BuildOutcome::Built { persisted: true }));

    let before = r.fingerprint();
    assert!(matches!(r.build(&corpus(GUIDE, "etag-2"), false).await?, BuildOutcome::Built { .. }));
    assert_ne!(r.fingerprint(), before);
    Ok(())
}

#[tokio::test]
async fn confidence_gate_suppresses_weak_results() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let config = RetrievalConfig { confidence_threshold: 10.0, ..small_config() };
    let r = retriever(config, tmp.path());
    r.build(&corpus(GUIDE, "v1"), false).await?;

    assert!(!r.inspect("apply leave", 5)?.is_empty());
    assert_eq!(r.search("apply leave"), SearchOutcome::NoMatch);
    Ok(())
}

#[tokio::test]
async fn embedding_failure_keeps_the_previous_bundle() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let embedder = FlakyEmbedder::new();
    let r = ActionRetriever::new(small_config(), embedder.clone(), tmp.path())?;
    r.build(&corpus(GUIDE, "v1"), false).await?;
    let installed = r.fingerprint();

    embedder.fail.store(true, Ordering::SeqCst);
    let err = r.build(&corpus(GUIDE, "v2"), false).await.expect_err("embedding fails");
    assert!(matches!(err, Error::Embedding(_)), "{err}");
    assert_eq!(r.state(), RetrieverState::Ready);
    assert_eq!(r.fingerprint(), installed);
    Ok(())
}

#[tokio::test]
async fn query_failures_become_no_match() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let embedder = FlakyEmbedder::new();
    let r = ActionRetriever::new(small_config(), embedder.clone(), tmp.path())?;
    r.build(&corpus(GUIDE, "v1"), false).await?;

    embedder.fail.store(true, Ordering::SeqCst);
    assert_eq!(r.search("apply leave"), SearchOutcome::NoMatch);
    assert!(matches!(r.inspect("apply leave", 5), Err(Error::Search(_))));
    // The failure was not cached.
    embedder.fail.store(false, Ordering::SeqCst);
    assert!(r.search("apply leave").is_match());
    Ok(())
}

#[tokio::test]
async fn repeated_queries_are_served_from_cache() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let embedder = FlakyEmbedder::new();
    let r = ActionRetriever::new(small_config(), embedder.clone(), tmp.path())?;
    r.build(&corpus(GUIDE, "v1"), false).await?;

    let after_build = embedder.calls.load(Ordering::SeqCst);
    let first = r.search("download my payslip");
    let second = r.search("download my payslip");
    assert_eq!(first, second);
    assert_eq!(embedder.calls.load(Ordering::SeqCst), after_build + 1, "second search is a cache hit");

    r.clear_query_cache();
    assert_eq!(r.search("download my payslip"), first);
    assert_eq!(embedder.calls.load(Ordering::SeqCst), after_build + 2);
    Ok(())
}

#[tokio::test]
async fn clear_index_unloads_and_forgets() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let r = retriever(small_config(), tmp.path());
    let doc = corpus(GUIDE, "v1");
    r.build(&doc, false).await?;

    r.clear_index()?;
    assert_eq!(r.state(), RetrieverState::Unbuilt);
    assert_eq!(r.search("apply leave"), SearchOutcome::NoMatch);
    assert!(matches!(r.build(&doc, false).await?, BuildOutcome::Built { .. }), "nothing left to load");
    Ok(())
}

#[tokio::test]
async fn blank_queries_do_not_match() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let r = retriever(small_config(), tmp.path());
    r.build(&corpus(GUIDE, "v1"), false).await?;
    assert_eq!(r.search("   "), SearchOutcome::NoMatch);
    Ok(())
}

#[tokio::test]
async fn tool_renders_and_remembers_sources() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let r = Arc::new(retriever(small_config(), tmp.path()));
    r.build(&corpus(GUIDE, "v1"), false).await?;
    let tool = ActionTool::new(r);

    let text = tool.run("how do I download my payslip");
    assert!(text.starts_with("Found "), "{text}");
    assert!(text.contains("**[1]** (Score: "));
    assert!(text.ends_with("Sources: Knowledge Bot - Action Links and Steps.txt\n"));
    assert_eq!(tool.last_sources(), vec!["Knowledge Bot - Action Links and Steps.txt"]);

    tool.clear_last_sources();
    assert!(tool.last_sources().is_empty());
    Ok(())
}

#[tokio::test]
async fn failed_save_still_serves_from_memory() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let not_a_dir = tmp.path().join("storage-root");
    std::fs::write(&not_a_dir, b"occupied")?;
    let r = retriever(small_config(), &not_a_dir);

    assert_eq!(r.build(&corpus(GUIDE, "v1"), false).await?, BuildOutcome::Built { persisted: false });
    assert_eq!(r.state(), RetrieverState::Ready);
    assert!(r.search("how do I download my payslip").is_match());
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn searches_during_a_rebuild_see_one_whole_bundle() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let r = Arc::new(retriever(small_config(), tmp.path()));
    r.build(&corpus(GUIDE, "v1"), false).await?;
    let held = r.bundle().expect("bundle");
    let old_chunks = held.chunks.clone();
    let old: HashSet<String> = old_chunks.iter().map(|c| c.text.clone()).collect();

    let done = Arc::new(AtomicBool::new(false));
    let searcher = {
        let (r, done) = (Arc::clone(&r), Arc::clone(&done));
        tokio::task::spawn_blocking(move || {
            let queries = ["apply for leave", "book a training course", "claim travel expenses", "download payslip"];
            let mut outcomes = Vec::new();
            while !done.load(Ordering::SeqCst) || outcomes.len() < 20 {
                outcomes.push(r.search_top_k(queries[outcomes.len() % queries.len()], 3));
            }
            outcomes
        })
    };
    let rebuilt = r.build(&corpus(TRAINING_GUIDE, "v2"), true).await;
    done.store(true, Ordering::SeqCst);
    assert_eq!(rebuilt?, BuildOutcome::Built { persisted: true });
    let outcomes = searcher.await?;

    let current = r.bundle().expect("bundle");
    let new: HashSet<String> = current.chunks.iter().map(|c| c.text.clone()).collect();
    for outcome in &outcomes {
        let contents: Vec<&str> = outcome.results().iter().map(|res| res.content.as_str()).collect();
        let all_old = contents.iter().all(|c| old.contains(*c));
        let all_new = contents.iter().all(|c| new.contains(*c));
        assert!(all_old || all_new, "results mix two bundles: {contents:?}");
    }
    assert_ne!(current.fingerprint, held.fingerprint);
    assert_eq!(held.chunks, old_chunks, "a held bundle is never mutated by a rebuild");
    Ok(())
}

#[tokio::test]
async fn rebuilding_drops_results_cached_for_the_old_index() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let r = retriever(small_config(), tmp.path());
    let cached_files = || std::fs::read_dir(tmp.path().join(CACHE_DIR)).map(|d| d.flatten().count()).unwrap_or(0);

    r.build(&corpus(GUIDE, "v1"), false).await?;
    r.search("download my payslip");
    r.search("apply for leave");
    assert_eq!(cached_files(), 2);

    assert!(matches!(r.build(&corpus(GUIDE, "v2"), false).await?, BuildOutcome::Built { .. }));
    assert_eq!(cached_files(), 0);
    r.search("download my payslip");
    assert_eq!(cached_files(), 1);
    Ok(())
}
