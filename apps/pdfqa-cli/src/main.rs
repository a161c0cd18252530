use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;
use walkdir::WalkDir;

use pdfqa_core::config::{Config, IndexBackend};
use pdfqa_core::types::{AnswerResult, UploadedFile};
use pdfqa_hybrid::{QuestionRequest, RagPipeline};

mod args;
use args::{Cli, Commands, QueryArgs};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = Config::load().map_err(|e| { eprintln!("Error loading config: {}", e); e })?;
    let mut settings = config.settings()?;
    if cli.memory { settings.index.backend = IndexBackend::Memory; }
    tracing::info!(backend = ?settings.index.backend, data_dir = %settings.index.data_dir, "opening index");
    let pipeline = RagPipeline::from_settings(settings).await?;

    match cli.command {
        Commands::Ingest { paths, session } => ingest(&pipeline, &paths, session.as_deref()).await?,
        Commands::Ask { question, query } => {
            let answer = pipeline.answer_question(&request(question, &query, None)).await?;
            print_answer(&answer);
        }
        Commands::Search { question, query, json } => {
            let candidates = pipeline.search(&request(question.clone(), &query, None)).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&candidates)?);
            } else {
                println!("🔍 {} candidates for: \"{}\"", candidates.len(), question);
                for (i, c) in candidates.iter().enumerate() {
                    let rank = |r: Option<usize>| r.map(|r| r.to_string()).unwrap_or_else(|| "-".into());
                    println!(
                        "\n  {}. fused={:.5}  dense={}  sparse={}  {} p.{}",
                        i + 1,
                        c.fused_score,
                        rank(c.dense_rank),
                        rank(c.sparse_rank),
                        c.chunk.filename,
                        c.chunk.page
                    );
                    println!("     📝 {}", snippet(&c.chunk.text, 200));
                }
            }
        }
        Commands::Chat { paths, query } => {
            let session = format!("cli-{}", std::process::id());
            if !paths.is_empty() { ingest(&pipeline, &paths, Some(&session)).await?; }
            chat(&pipeline, &session, &query).await?;
        }
        Commands::Status => println!("{}", serde_json::to_string_pretty(&pipeline.status())?),
        Commands::Delete { document_id } => {
            let removed = pipeline.delete_document(&document_id).await?;
            println!("🗑️  Removed {} ({} chunks)", document_id, removed);
        }
    }
    Ok(())
}

async fn ingest(pipeline: &RagPipeline, paths: &[PathBuf], session: Option<&str>) -> anyhow::Result<()> {
    let require_pdf = pipeline.settings().ingest.require_pdf;
    let files = collect_files(paths, require_pdf)?;
    if files.is_empty() { anyhow::bail!("No files found under {:?}", paths); }

    let mut uploads = Vec::with_capacity(files.len());
    for path in &files {
        let bytes = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
        let filename = path.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_else(|| path.display().to_string());
        uploads.push(UploadedFile::new(filename, bytes));
    }

    let pb = ProgressBar::new_spinner();
    pb.set_style(ProgressStyle::default_spinner().template("{spinner:.green} [{elapsed_precise}] {msg}")?);
    pb.enable_steady_tick(Duration::from_millis(120));
    pb.set_message(format!("Indexing {} files", uploads.len()));
    let report = pipeline.process_documents(uploads, session).await;
    pb.finish_and_clear();
    let report = report?;

    for f in &report.files {
        match &f.error {
            None => println!("✅ {} ({} chunks)", f.filename, f.chunks),
            Some(e) => println!("❌ {}: {}", f.filename, e),
        }
    }
    println!("📊 Indexed {} of {} documents, {} chunks", report.documents_indexed, report.files.len(), report.total_chunks);
    Ok(())
}

/// Files named directly are always taken; inside directories only PDFs
/// are picked up when `require_pdf` is set.
fn collect_files(paths: &[PathBuf], require_pdf: bool) -> anyhow::Result<Vec<PathBuf>> {
    let mut out = Vec::new();
    for path in paths {
        if path.is_file() { out.push(path.clone()); continue; }
        if !path.is_dir() { anyhow::bail!("{} does not exist", path.display()); }
        for entry in WalkDir::new(path).sort_by_file_name() {
            let entry = entry?;
            if !entry.file_type().is_file() { continue; }
            if require_pdf && !is_pdf(entry.path()) { continue; }
            out.push(entry.into_path());
        }
    }
    Ok(out)
}

fn is_pdf(path: &Path) -> bool { path.extension().and_then(|e| e.to_str()).is_some_and(|e| e.eq_ignore_ascii_case("pdf")) }

async fn chat(pipeline: &RagPipeline, session: &str, query: &QueryArgs) -> anyhow::Result<()> {
    println!("💬 Ask a question (empty line or Ctrl-D to quit)");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("> ");
        std::io::stdout().flush()?;
        let Some(line) = lines.next_line().await? else { break };
        let question = line.trim();
        if question.is_empty() { break; }
        match pipeline.answer_question(&request(question.to_string(), query, Some(session))).await {
            Ok(answer) => print_answer(&answer),
            Err(e) => eprintln!("❌ {}", e),
        }
    }
    Ok(())
}

fn request(question: String, query: &QueryArgs, session: Option<&str>) -> QuestionRequest {
    QuestionRequest {
        question,
        strategy: query.strategy.clone(),
        max_documents: query.max_documents,
        file_filters: (!query.files.is_empty()).then(|| query.files.clone()),
        session_id: session.map(str::to_string),
    }
}

fn print_answer(answer: &AnswerResult) {
    println!("\n{}\n", answer.answer);
    if let Some(backend) = &answer.backend { println!("🤖 answered by {}", backend); }
    for (i, r) in answer.references.iter().enumerate() {
        println!("  [{}] {}", i + 1, snippet(r, 160));
    }
}

fn snippet(text: &str, max_chars: usize) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= max_chars { return flat; }
    let cut: String = flat.chars().take(max_chars).collect();
    format!("{}…", cut)
}
