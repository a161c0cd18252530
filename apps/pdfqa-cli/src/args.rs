//! Command-line arguments for the `pdfqa` binary.
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// Ask questions about your PDFs, answered from the documents themselves
#[derive(Parser, Debug)]
#[command(name = "pdfqa", version, about, long_about = None)]
pub struct Cli {
    /// Keep the index in memory for this run instead of under `index.data_dir`
    #[arg(long, global = true)]
    pub memory: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Index PDF files (directories are walked recursively)
    Ingest {
        #[arg(value_name = "PATH", required = true)]
        paths: Vec<PathBuf>,

        /// Record the uploads under this session id
        #[arg(long)]
        session: Option<String>,
    },

    /// Answer one question
    Ask {
        question: String,

        #[command(flatten)]
        query: QueryArgs,
    },

    /// Show the fused candidates without generating an answer
    Search {
        question: String,

        #[command(flatten)]
        query: QueryArgs,

        /// Print candidates as JSON
        #[arg(long)]
        json: bool,
    },

    /// Index the given files into a fresh session, then answer questions from stdin
    Chat {
        #[arg(value_name = "PATH")]
        paths: Vec<PathBuf>,

        #[command(flatten)]
        query: QueryArgs,
    },

    /// Index and backend summary
    Status,

    /// Remove a document from both indexes
    Delete {
        document_id: String,
    },
}

#[derive(Args, Debug, Clone, Default)]
pub struct QueryArgs {
    /// dense, sparse or hybrid
    #[arg(short, long)]
    pub strategy: Option<String>,

    /// Number of passages handed to the answer backend
    #[arg(short = 'k', long)]
    pub max_documents: Option<usize>,

    /// Restrict retrieval to these filenames (repeatable)
    #[arg(short, long = "file")]
    pub files: Vec<String>,
}
