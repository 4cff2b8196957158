use std::env;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use indicatif::{ProgressBar, ProgressStyle};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use actiondex_core::config::Config;
use actiondex_core::corpus::Corpus;
use actiondex_core::fingerprint::CorpusIdentity;
use actiondex_embed::get_default_embedder;
use actiondex_hybrid::{ActionRetriever, ActionTool, BuildOutcome};

mod args;

use args::Command;

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let argv: Vec<String> = env::args().skip(1).collect();
    let command = match args::parse(&argv) {
        Ok(command) => command,
        Err(e) => {
            eprintln!("Error: {e}\n\n{}", args::USAGE);
            std::process::exit(2);
        }
    };

    let config = Config::load().map_err(|e| { eprintln!("Error loading config: {e}"); e })?;
    let retrieval = config.retrieval()?;
    let root = config.storage_root()?;
    let top_k_default = retrieval.top_k;
    let retriever = ActionRetriever::new(retrieval, get_default_embedder()?, &root)?;
    let rt = tokio::runtime::Runtime::new()?;

    match command {
        Command::Build { docs, force, version_tag } => {
            let corpus = load_corpus(&docs, version_tag);
            let bar = progress_bar();
            let progress_bar = bar.clone();
            let retriever = retriever.with_progress(Arc::new(move |done, total| {
                progress_bar.set_length(total as u64);
                progress_bar.set_position(done as u64);
            }));
            let outcome = rt.block_on(retriever.build(&corpus, force))?;
            bar.finish_and_clear();
            match outcome {
                BuildOutcome::Unchanged => println!("✅ Index already current"),
                BuildOutcome::Loaded => println!("✅ Index restored from {}", retriever.store().dir().display()),
                BuildOutcome::Built { persisted: true } => println!("✅ Index built and saved to {}", retriever.store().dir().display()),
                BuildOutcome::Built { persisted: false } => println!("⚠️  Index built but could not be saved"),
                BuildOutcome::Empty => println!("⚠️  No documents with content in {}", docs.display()),
            }
            if let Some(bundle) = retriever.bundle() {
                println!("📊 {} chunks, fingerprint {}", bundle.chunks.len(), bundle.fingerprint.short());
            }
        }
        Command::Query { docs, query, version_tag } => {
            let corpus = load_corpus(&docs, version_tag);
            let retriever = Arc::new(retriever);
            rt.block_on(retriever.build(&corpus, false))?;
            let tool = ActionTool::new(Arc::clone(&retriever));
            println!("{}", tool.run(&query));
        }
        Command::Inspect { docs, query, top_k, version_tag } => {
            let corpus = load_corpus(&docs, version_tag);
            rt.block_on(retriever.build(&corpus, false))?;
            let top_k = top_k.unwrap_or(top_k_default);
            let results = retriever.inspect(&query, top_k)?;
            println!("🔍 '{query}' (top {top_k}, threshold {:.2})", retriever.config().confidence_threshold);
            if results.is_empty() {
                println!("No candidates");
            }
            for (i, r) in results.iter().enumerate() {
                let preview: String = r.content.chars().take(120).collect::<String>().replace('\n', " ");
                println!("{:>2}. [{:.3}] #{} {} | {}", i + 1, r.score, r.chunk_id, r.source_name, preview);
            }
        }
        Command::ClearIndex => {
            retriever.clear_index()?;
            println!("🗑️  Cleared persisted indexes under {}", retriever.store().dir().display());
        }
        Command::ClearCache => {
            retriever.clear_query_cache();
            println!("🗑️  Cleared query cache under {}", root.display());
        }
    }
    Ok(())
}

fn load_corpus(dir: &Path, version_tag: Option<String>) -> Corpus {
    let mut corpus = Corpus::load_directory(dir);
    if let Some(tag) = version_tag {
        corpus.identity = CorpusIdentity::VersionTag(tag);
    }
    corpus
}

fn progress_bar() -> ProgressBar {
    let bar = ProgressBar::new(0);
    if let Ok(style) = ProgressStyle::with_template("{spinner} embedding [{bar:40}] {pos}/{len} chunks") {
        bar.set_style(style.progress_chars("=> "));
    }
    bar.enable_steady_tick(Duration::from_millis(120));
    bar
}
