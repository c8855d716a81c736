//! # lexrag
//!
//! A retrieval-augmented question answering service for legal documents.
//!
//! lexrag indexes a directory of legal source documents (constitution
//! texts, acts, human-rights treaties), answers questions against them
//! with hybrid lexical + semantic retrieval, keeps multi-turn
//! conversation state with rolling summaries, and can score each answer
//! on a five-dimension rubric.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌───────────────┐   ┌───────────────┐
//! │  Corpus  │──▶│ Chunk + Embed │──▶│ IndexSnapshot │
//! │ txt/md/  │   │               │   │  BM25 + cos   │
//! │   pdf    │   └───────────────┘   └───────┬───────┘
//! └──────────┘                               │
//!               ┌────────────────────────────┤
//!               ▼                            ▼
//!        ┌────────────┐              ┌──────────────┐
//!        │    CLI     │              │  HTTP /chat  │
//!        │  (lexrag)  │              │   pipeline   │
//!        └────────────┘              └──────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! lexrag init                    # create database
//! lexrag index                   # chunk + embed the corpus
//! lexrag search "right to life"  # hybrid search from the CLI
//! lexrag serve                   # start the HTTP API
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration with env overrides |
//! | [`models`] | Core data types |
//! | [`corpus`] | Document loading (txt, md, pdf) |
//! | [`chunk`] | Sliding-window chunking |
//! | [`embedding`] | Embedding providers (hash, OpenAI) |
//! | [`lexical_index`] | BM25 scoring |
//! | [`vector_index`] | Cosine nearest-neighbor search |
//! | [`retriever`] | Hybrid score fusion |
//! | [`snapshot`] | Immutable index snapshots with atomic swap |
//! | [`conversation`] | Session and turn persistence |
//! | [`rewrite`] | Follow-up query rewriting |
//! | [`budget`] | Token-budgeted context assembly |
//! | [`generate`] | Answer generation |
//! | [`judge`] | Rubric-based response evaluation |
//! | [`pipeline`] | Request orchestration |
//! | [`server`] | JSON HTTP API |

pub mod budget;
pub mod chunk;
pub mod config;
pub mod conversation;
pub mod corpus;
pub mod db;
pub mod embedding;
pub mod generate;
pub mod judge;
pub mod lexical_index;
pub mod llm;
pub mod migrate;
pub mod models;
pub mod pipeline;
pub mod retriever;
pub mod rewrite;
pub mod server;
pub mod snapshot;
pub mod tokenize;
pub mod vector_index;
