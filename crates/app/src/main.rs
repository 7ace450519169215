mod config;
mod http;
mod pipeline;

use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand};
use config::{RetrievalArgs, Settings};
use pdf_rag_core::ChunkingConfig;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "pdf-rag", version, about = "Question answering over a single PDF")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    #[command(flatten)]
    settings: Settings,
}

#[derive(Subcommand)]
enum Command {
    /// Extract the PDF text into extracted_text.json.
    Extract {
        pdf: PathBuf,
        /// Ask the analysis model for the text when lopdf finds none.
        #[arg(long, default_value_t = false)]
        llm_fallback: bool,
    },
    /// Split the extracted text into overlapping chunks.
    Chunk {
        #[arg(long, default_value = "1000")]
        chunk_size: usize,
        #[arg(long, default_value = "200")]
        overlap: usize,
    },
    /// Embed every chunk for retrieval.
    Embed,
    /// Write the embedded images of the PDF to the images directory.
    ExtractImages { pdf: PathBuf },
    /// Describe every extracted image with the analysis model.
    AnalyzeImages,
    /// Ask the analysis model for pages, people and diagrams of the PDF.
    AnalyzeDocument { pdf: PathBuf },
    /// Recreate the collection and upload the embedded chunks.
    Load {
        /// Source name stored with every point; defaults to the extracted file.
        #[arg(long)]
        source: Option<String>,
    },
    /// Answer one question from the command line.
    Ask {
        question: String,
        #[arg(long)]
        top_k: Option<usize>,
        #[command(flatten)]
        retrieval: RetrievalArgs,
    },
    /// Serve the question-answering HTTP API.
    Serve {
        #[arg(long, env = "PDF_RAG_HOST", default_value = "0.0.0.0")]
        host: IpAddr,
        #[arg(long, env = "PORT", default_value = "8000")]
        port: u16,
        #[command(flatten)]
        retrieval: RetrievalArgs,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer())
        .init();

    let cli = Cli::parse();
    let settings = cli.settings;
    info!(
        version = env!("CARGO_PKG_VERSION"),
        output_dir = %settings.output_dir.display(),
        started_at = %Utc::now().to_rfc3339(),
        "pdf-rag boot"
    );

    match cli.command {
        Command::Extract { pdf, llm_fallback } => {
            let extracted = pipeline::extract_text(&settings, &pdf, llm_fallback).await?;
            println!(
                "{} pages, {} characters extracted from {}",
                extracted.pages.len(),
                extracted.full_text.chars().count(),
                extracted.source_file
            );
        }
        Command::Chunk {
            chunk_size,
            overlap,
        } => {
            let chunks = pipeline::chunk(
                &settings,
                ChunkingConfig {
                    chunk_size,
                    overlap,
                },
            )?;
            println!("{} chunks written", chunks.len());
        }
        Command::Embed => {
            let chunks = pipeline::embed(&settings).await?;
            println!("{} chunks embedded", chunks.len());
        }
        Command::ExtractImages { pdf } => {
            let images = pipeline::extract_pdf_images(&settings, &pdf)?;
            println!("{} images extracted", images.len());
        }
        Command::AnalyzeImages => {
            let images = pipeline::analyze_images(&settings).await?;
            for image in &images {
                println!("[{:?}] {} page={}", image.kind, image.filename, image.page);
            }
        }
        Command::AnalyzeDocument { pdf } => {
            pipeline::analyze_document(&settings, &pdf).await?;
            println!(
                "analysis written to {}",
                settings.layout().document_analysis().display()
            );
        }
        Command::Load { source } => {
            let store = settings.vector_store()?;
            let loaded = pipeline::load(&settings, &store, source).await?;
            println!("{loaded} points loaded into {}", settings.qdrant_collection);
        }
        Command::Ask {
            question,
            top_k,
            retrieval,
        } => {
            let service = pipeline::build_service(&settings, retrieval.to_config())?;
            let answer = service
                .query(&question, top_k)
                .await
                .context("query failed")?;

            println!("{}", answer.answer);
            println!();
            println!("confidence={:.4}", answer.confidence);
            println!("sources={}", answer.sources.join(", "));
            for image in &answer.images {
                println!("image={} page={} {}", image.filename, image.page, image.description);
            }
        }
        Command::Serve {
            host,
            port,
            retrieval,
        } => {
            let service = pipeline::build_service(&settings, retrieval.to_config())?;
            http::serve(Arc::new(service), SocketAddr::new(host, port)).await?;
        }
    }

    Ok(())
}
