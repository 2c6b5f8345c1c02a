use std::collections::HashMap;

use crate::app::{AppContext, Result, TankobonError};
use crate::domain::{HistoryRecord, Item, ItemKey};
use crate::registry::SourceInfo;

/// Discovers sources and picks the one to work with.
async fn resolve_source(ctx: &AppContext, requested: Option<&str>) -> Result<String> {
    ctx.bootstrap().await;

    let id = match requested {
        Some(id) => id.to_string(),
        None => ctx.default_source().ok_or_else(|| {
            TankobonError::Config(
                "No source available. Add a [[servers]] entry to the config file".into(),
            )
        })?,
    };
    ctx.registry.select(&id).await?;
    Ok(ctx
        .registry
        .active()
        .map(|s| s.identifier.clone())
        .unwrap_or(id))
}

/// Fetches a single item; `full` asks for the detailed form.
async fn fetch_item(ctx: &AppContext, source: &str, id: &str, full: bool) -> Result<Item> {
    ctx.cache
        .get_details(source, &[id.to_string()], full, true)
        .await?
        .into_iter()
        .next()
        .ok_or_else(|| TankobonError::Other(format!("No item {} on {}", id, source)))
}

fn item_line(item: &Item) -> String {
    let summary = item.summary();
    let mut line = format!("{}  {}", summary.id, summary.title);
    if let Some(latest) = &summary.latest_label {
        line.push_str(&format!(" [{}]", latest));
    }
    if summary.is_ended {
        line.push_str(" (ended)");
    }
    line
}

fn source_line(info: &SourceInfo) -> String {
    let status = if info.is_down { "down" } else { "up" };
    let mut line = format!("{:<16} {}", info.identifier, status);
    if let Some(latency) = info.latency_ms {
        line.push_str(&format!(" {}ms", latency));
    }
    if let Some(server) = &info.server {
        line.push_str(&format!("  {}", server));
    }
    line
}

fn history_line(record: &HistoryRecord) -> String {
    let marker = if record.has_unread_update { "●" } else { " " };
    let opened = record.last_opened_at.format("%Y-%m-%d %H:%M");
    let mut line = format!("{} {} {}  {}", marker, opened, record.key, record.title);
    if let Some(chapter) = &record.last_read_chapter_id {
        line.push_str(&format!(" @ {}", chapter));
        if let Some(page) = record.last_read_page {
            line.push_str(&format!(" p{}", page));
        }
    }
    line
}

pub async fn list_sources(ctx: &AppContext) -> Result<()> {
    ctx.bootstrap().await;
    let sources = ctx.registry.sources();

    if sources.is_empty() {
        println!("No sources");
        return Ok(());
    }

    for source in sources {
        println!("{}", source_line(&source.info()));
    }
    Ok(())
}

/// Pages are fetched in order up to `page`; pagination never skips ahead.
pub async fn browse(
    ctx: &AppContext,
    source: Option<&str>,
    category: Option<&str>,
    status: &str,
    page: u32,
) -> Result<()> {
    let source = resolve_source(ctx, source).await?;

    for p in 1..=page.max(1) {
        if !ctx.cache.get_list(&source, category, status, p).await? {
            println!("No items on page {}", p);
            return Ok(());
        }
    }

    for item in ctx.cache.list_items(&source, category, status, page.max(1)) {
        println!("{}", item_line(&item));
    }
    Ok(())
}

pub async fn search(ctx: &AppContext, source: Option<&str>, keyword: &str, page: u32) -> Result<()> {
    let source = resolve_source(ctx, source).await?;

    for p in 1..=page.max(1) {
        if !ctx.cache.get_search(&source, keyword, p).await? {
            println!("No results on page {}", p);
            return Ok(());
        }
    }

    for item in ctx.cache.search_items(&source, keyword, page.max(1)) {
        println!("{}", item_line(&item));
    }
    Ok(())
}

pub async fn suggest(ctx: &AppContext, source: Option<&str>, keyword: &str) -> Result<()> {
    let source = resolve_source(ctx, source).await?;
    for suggestion in ctx.cache.get_suggestions(&source, keyword).await? {
        println!("{}", suggestion);
    }
    Ok(())
}

pub async fn show(ctx: &AppContext, source: Option<&str>, id: &str) -> Result<()> {
    let source = resolve_source(ctx, source).await?;
    let item = fetch_item(ctx, &source, id, true).await?;

    println!("{}", item_line(&item));
    if ctx.library.is_saved(&source, id)? {
        println!("In library");
    }

    if let Item::Detail(detail) = &item {
        if !detail.authors.is_empty() {
            println!("Authors: {}", detail.authors.join(", "));
        }
        if !detail.genres.is_empty() {
            println!("Genres: {}", detail.genres.join(", "));
        }
        if let Some(description) = &detail.description {
            println!("\n{}\n", description);
        }
        for chapter in &detail.serial_chapters {
            println!("  {}  {}", chapter.id, chapter.title);
        }
        if !detail.extra_chapters.is_empty() {
            println!("Extras:");
            for chapter in &detail.extra_chapters {
                println!("  {}  {}", chapter.id, chapter.title);
            }
        }
    }
    Ok(())
}

pub async fn chapter(ctx: &AppContext, source: Option<&str>, id: &str, extra: bool) -> Result<()> {
    let source = resolve_source(ctx, source).await?;
    for url in ctx.cache.get_chapter(&source, id, extra).await? {
        println!("{}", url);
    }
    Ok(())
}

pub async fn save(ctx: &AppContext, source: Option<&str>, id: &str) -> Result<()> {
    let source = resolve_source(ctx, source).await?;
    let item = fetch_item(ctx, &source, id, false).await?;
    let record = ctx.library.save_item(&source, &item).await?;
    println!("Saved: {}", record.title);
    Ok(())
}

/// Works offline: only the local record is required.
pub async fn unsave(ctx: &AppContext, source: Option<&str>, id: &str) -> Result<()> {
    let source = match source {
        Some(source) => source.to_string(),
        None => resolve_source(ctx, None).await?,
    };
    if ctx.library.unsave_item(&source, id).await? {
        println!("Removed: {}", ItemKey::new(&source, id));
    } else {
        println!("Not in library: {}", ItemKey::new(&source, id));
    }
    Ok(())
}

pub async fn read(
    ctx: &AppContext,
    source: Option<&str>,
    id: &str,
    chapter: &str,
    page: Option<i64>,
) -> Result<()> {
    let source = resolve_source(ctx, source).await?;
    let item = fetch_item(ctx, &source, id, false).await?;
    let record = ctx.library.record_progress(&source, &item, chapter, page)?;
    println!("{}", history_line(&record));
    Ok(())
}

pub fn list_library(ctx: &AppContext) -> Result<()> {
    let collections = ctx.library.collections()?;

    if collections.is_empty() {
        println!("Library is empty");
        return Ok(());
    }

    let unread: HashMap<ItemKey, bool> = ctx
        .library
        .history()?
        .into_iter()
        .map(|h| (h.key, h.has_unread_update))
        .collect();

    for record in collections {
        let marker = if unread.get(&record.key).copied().unwrap_or(false) {
            "●"
        } else {
            " "
        };
        let latest = record.latest_label.as_deref().unwrap_or("-");
        println!("{} {}  {} [{}]", marker, record.key, record.title, latest);
    }
    Ok(())
}

pub fn list_history(ctx: &AppContext, limit: usize) -> Result<()> {
    let history = ctx.library.history()?;

    if history.is_empty() {
        println!("No history");
        return Ok(());
    }

    for record in history.iter().take(limit) {
        println!("{}", history_line(record));
    }
    Ok(())
}

pub async fn refresh(ctx: &AppContext) -> Result<()> {
    ctx.bootstrap().await;

    match ctx.freshness.refresh().await? {
        Some(report) if report.total == 0 => println!("No saved items to refresh"),
        Some(report) => println!(
            "Refresh complete: {} new chapters, {} updated, {} failed batches",
            report.new_chapters, report.patched, report.failed_batches
        ),
        None => println!("A refresh is already running"),
    }
    Ok(())
}

pub async fn sync(ctx: &AppContext) -> Result<()> {
    ctx.bootstrap().await;

    match ctx.sync.sync().await? {
        Some(report) if report.reconciled.is_empty() => println!("Already in sync"),
        Some(report) => {
            let phases: Vec<String> = report.reconciled.iter().map(|p| p.to_string()).collect();
            println!("Reconciled: {}", phases.join(", "));
            if report.history_merged > 0 {
                println!("  {} history records merged", report.history_merged);
            }
            if report.collections_added + report.collections_removed > 0 {
                println!(
                    "  library: {} added, {} removed",
                    report.collections_added, report.collections_removed
                );
            }
            for phase in &report.failed {
                eprintln!("  ! {} failed, will retry on next sync", phase);
            }
        }
        None => println!("A sync is already running"),
    }
    Ok(())
}

pub async fn login(ctx: &AppContext, email: &str, password: &str) -> Result<()> {
    ctx.sync.login(email, password).await?;
    println!("Logged in as {}", email);
    Ok(())
}

pub async fn register(ctx: &AppContext, email: &str, password: &str) -> Result<()> {
    ctx.sync.register(email, password).await?;
    println!("Registered and logged in as {}", email);
    Ok(())
}

pub async fn settings(ctx: &AppContext, set: Option<&str>) -> Result<()> {
    if let Some(content) = set {
        ctx.sync.update_settings(content.as_bytes()).await?;
        println!("Settings updated");
        return Ok(());
    }

    match ctx.sync.local_settings()? {
        Some(settings) => println!("{}", String::from_utf8_lossy(&settings)),
        None => println!("No settings"),
    }
    Ok(())
}

pub fn logout(ctx: &AppContext) -> Result<()> {
    ctx.sync.logout()?;
    println!("Logged out");
    Ok(())
}

pub async fn whoami(ctx: &AppContext) -> Result<()> {
    let account = ctx.sync.me().await?;
    println!("{}", account.email);

    let state = ctx.sync.state();
    if let Some(last) = state.last_sync_at {
        println!("Last sync: {}", last.format("%Y-%m-%d %H:%M:%S"));
    }
    Ok(())
}

pub async fn clear_remote(ctx: &AppContext, confirmed: bool) -> Result<()> {
    if !confirmed {
        println!("This deletes all data stored on the sync server. Re-run with --yes to confirm.");
        return Ok(());
    }
    ctx.sync.clear_remote().await?;
    println!("Remote data cleared");
    Ok(())
}
