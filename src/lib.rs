//! # Tankobon
//!
//! A manga catalog client: browses driver-backed source servers, keeps a
//! local library and reading history, and syncs them across devices.
//!
//! ## Architecture
//!
//! ```text
//! Transport → Api → Registry → CacheLayer → UI
//!                                  ↓
//!              Store ← Library / FreshnessEngine / SyncEngine
//! ```
//!
//! - [`registry`]: sources, servers and the health monitor
//! - [`cache`]: paginated list/search caches and batched detail fetches
//! - [`freshness`]: background refresh of saved items
//! - [`sync`]: hash-based reconciliation with the sync server
//!
//! ## Quick Start
//!
//! ```bash
//! # Browse the default source
//! tankobon browse
//!
//! # Search a specific source
//! tankobon search "one piece" --source mangadex
//!
//! # Save an item and refresh the library
//! tankobon save 12345 --source mangadex
//! tankobon refresh
//!
//! # Run health checks, refresh and sync in the background
//! tankobon daemon start
//! ```

/// HTTP API client for source and sync servers.
///
/// - [`Api`](api::Api): typed calls, one per endpoint
/// - [`wire`](api::wire): JSON shapes and their conversion to domain models
pub mod api;

/// Application context, events and error handling.
///
/// The [`AppContext`](app::AppContext) struct wires together all components:
/// store, registry, cache, engines and library.
pub mod app;

/// Per-source caches.
///
/// - [`CacheLayer`](cache::CacheLayer): list, search, details, suggestions, chapters
/// - [`PageCache`](cache::page::PageCache): ordered pagination with exhaustion
pub mod cache;

/// Command-line interface using clap.
pub mod cli;

/// Configuration management.
///
/// Loads from `~/.config/tankobon/config.toml`: source servers, the sync
/// server and engine timers.
pub mod config;

/// Background daemon running the health monitor, cache eviction, sync
/// trigger and periodic refresh.
///
/// - `tankobon daemon start` - Start the background daemon
/// - `tankobon daemon stop` - Stop the daemon
/// - `tankobon daemon status` - Check if daemon is running
pub mod daemon;

/// Core domain models.
///
/// - [`Item`](domain::Item): Summary or Detail, upgrade-only
/// - [`CollectionRecord`](domain::CollectionRecord): a saved item
/// - [`HistoryRecord`](domain::HistoryRecord): reading progress
/// - [`Server`](domain::Server): a source or sync server
pub mod domain;

/// Refresh of saved items with new-chapter detection.
pub mod freshness;

/// Saving, unsaving and reading-progress mutations.
pub mod library;

/// Source registry and health monitor.
pub mod registry;

/// SQLite persistence layer.
///
/// - [`Store`](store::Store): Trait defining storage operations
/// - [`SqliteStore`](store::SqliteStore): SQLite implementation
pub mod store;

/// Settings, history and collection sync.
pub mod sync;

/// HTTP transport behind a trait so tests can script responses.
pub mod transport;
