//! Browsable UI over the store and the usage ledger.
//!
//! Every page takes `mode=full|plain|append`: `full` wraps the
//! content in the page chrome, `plain` returns the bare fragment for
//! in-place swaps, `append` returns the next slice of a paginated
//! view.

use std::collections::{BTreeMap, HashMap};

use axum::extract::{Extension, Multipart, Path, Query};
use axum::response::Html;
use axum::routing::get;
use axum::Router;
use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::archive::{parse_records, Info, Sha};
use crate::database::{self, LedgerColumn};
use crate::error::{ServerError, ServerResult};
use crate::fuzzy;
use crate::html;
use crate::matching::{self, DiffRow};
use crate::store::Snapshot;
use crate::State;

pub(crate) fn get_router() -> Router {
    Router::new()
        .route("/", get(index))
        .route("/index.html", get(index))
        .route("/find/:package", get(find))
        .route("/package/:sha", get(package))
        .route("/match", get(match_form).post(match_abi))
        .route("/compare/:sha", get(compare))
        .route("/downloads", get(downloads))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
enum Mode {
    #[default]
    Full,
    Plain,
    Append,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
enum SortOrder {
    Ascending,
    Descending,
}

fn render(mode: Mode, title: &str, body: String) -> Html<String> {
    match mode {
        Mode::Full => Html(html::page(title, &body)),
        _ => Html(body),
    }
}

/// A sortable column header: clicking toggles the order once the
/// column is active.
fn sort_header(
    path: &str,
    label: &str,
    key: &str,
    active_key: Option<&str>,
    order: Option<SortOrder>,
    extra: &str,
) -> String {
    let next = if active_key == Some(key) && !matches!(order, Some(SortOrder::Descending)) {
        "descending"
    } else {
        "ascending"
    };
    format!("<th><a href=\"{path}?sort={key}&order={next}{extra}\">{label}</a></th>")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
enum PackageSort {
    Name,
    Count,
    Size,
    Used,
    Downloads,
}

impl PackageSort {
    fn key(self) -> &'static str {
        match self {
            Self::Name => "name",
            Self::Count => "count",
            Self::Size => "size",
            Self::Used => "used",
            Self::Downloads => "downloads",
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct ListQuery {
    #[serde(default)]
    mode: Mode,
    sort: Option<PackageSort>,
    order: Option<SortOrder>,
    search: Option<String>,
}

async fn index(
    Extension(state): Extension<State>,
    Query(query): Query<ListQuery>,
) -> ServerResult<Html<String>> {
    let snapshot = state.store.all_infos().await;

    let mut per_package: BTreeMap<&str, (usize, u64)> = BTreeMap::new();
    for info in snapshot.iter() {
        let entry = per_package.entry(info.package.as_str()).or_default();
        entry.0 += 1;
        entry.1 += info.size;
    }

    let db = state.database().await?;
    let stats: HashMap<String, (Option<DateTime<Utc>>, i64)> = database::package_stats(db)
        .await?
        .into_iter()
        .map(|pkg| (pkg.name, (pkg.last_used, pkg.downloads)))
        .collect();

    struct Row<'a> {
        name: &'a str,
        count: usize,
        size: u64,
        last_used: Option<DateTime<Utc>>,
        downloads: i64,
        score: u32,
    }

    let search = query.search.as_deref().filter(|s| !s.is_empty());
    let mut rows: Vec<Row> = per_package
        .into_iter()
        .map(|(name, (count, size))| {
            let stat = stats.get(name);
            Row {
                name,
                count,
                size,
                last_used: stat.and_then(|(used, _)| *used),
                downloads: stat.map(|(_, downloads)| *downloads).unwrap_or(0),
                score: search
                    .map(|needle| fuzzy::partial_ratio(needle, name))
                    .unwrap_or(100),
            }
        })
        .collect();

    if search.is_some() {
        rows.retain(|row| row.score > fuzzy::SEARCH_CUTOFF);
    }

    match (query.sort, search) {
        (Some(sort), _) => {
            match sort {
                PackageSort::Name => rows.sort_by(|a, b| a.name.cmp(b.name)),
                PackageSort::Count => rows.sort_by_key(|row| row.count),
                PackageSort::Size => rows.sort_by_key(|row| row.size),
                PackageSort::Used => rows.sort_by_key(|row| row.last_used),
                PackageSort::Downloads => rows.sort_by_key(|row| row.downloads),
            }
            if matches!(query.order, Some(SortOrder::Descending)) {
                rows.reverse();
            }
        }
        (None, Some(_)) => rows.sort_by(|a, b| b.score.cmp(&a.score)),
        (None, None) => rows.sort_by(|a, b| a.name.cmp(b.name)),
    }

    let extra = search
        .map(|s| format!("&search={}", html::encode_query(s)))
        .unwrap_or_default();
    let active = query.sort.map(PackageSort::key);

    let mut body = format!(
        "<h1>Packages</h1>\n<div>{}</div>\n\
         <form method=\"get\" action=\"/\">\
         <input type=\"search\" name=\"search\" value=\"{}\" placeholder=\"Search packages\">\
         <input type=\"submit\" value=\"Search\"></form>\n",
        html::escape(&snapshot.statistics()),
        html::escape(search.unwrap_or_default()),
    );

    body.push_str("<table>\n<tr>");
    for (label, key) in [
        ("Package", "name"),
        ("Count", "count"),
        ("Size", "size"),
        ("Last used", "used"),
        ("Downloads", "downloads"),
    ] {
        body.push_str(&sort_header("/", label, key, active, query.order, &extra));
    }
    body.push_str("</tr>\n");

    for row in &rows {
        body.push_str(&format!(
            "<tr><td><a href=\"/find/{0}\"><b>{0}</b></a></td>\
             <td>{1}</td><td>{2}</td><td>{3}</td><td>{4}</td></tr>\n",
            html::escape(row.name),
            row.count,
            html::format_size(row.size),
            html::format_last_used(row.last_used),
            row.downloads,
        ));
    }
    body.push_str("</table>\n");

    Ok(render(query.mode, "vcache", body))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
enum CacheSort {
    Version,
    Arch,
    Size,
    Created,
    Used,
    Downloads,
}

impl CacheSort {
    fn key(self) -> &'static str {
        match self {
            Self::Version => "version",
            Self::Arch => "arch",
            Self::Size => "size",
            Self::Created => "created",
            Self::Used => "used",
            Self::Downloads => "downloads",
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct FindQuery {
    #[serde(default)]
    mode: Mode,
    sort: Option<CacheSort>,
    order: Option<SortOrder>,
}

async fn find(
    Extension(state): Extension<State>,
    Path(package): Path<String>,
    Query(query): Query<FindQuery>,
) -> ServerResult<Html<String>> {
    let snapshot = state.store.all_infos().await;

    let db = state.database().await?;
    let ledger: HashMap<String, (Option<DateTime<Utc>>, i64)> =
        database::caches_of_package(db, &package)
            .await?
            .into_iter()
            .map(|row| (row.sha.clone(), (row.last_used, row.downloads)))
            .collect();

    struct Row<'a> {
        info: &'a Info,
        last_used: Option<DateTime<Utc>>,
        downloads: i64,
    }

    let mut rows: Vec<Row> = snapshot
        .iter()
        .filter(|info| info.package == package)
        .map(|info| {
            let stat = ledger.get(info.sha.as_str());
            Row {
                info,
                last_used: stat.and_then(|(used, _)| *used),
                downloads: stat.map(|(_, downloads)| *downloads).unwrap_or(0),
            }
        })
        .collect();

    match query.sort {
        Some(CacheSort::Version) => rows.sort_by(|a, b| a.info.version.cmp(&b.info.version)),
        Some(CacheSort::Arch) => {
            rows.sort_by(|a, b| a.info.architecture.cmp(&b.info.architecture))
        }
        Some(CacheSort::Size) => rows.sort_by_key(|row| row.info.size),
        Some(CacheSort::Created) => rows.sort_by_key(|row| row.info.mtime),
        Some(CacheSort::Used) => rows.sort_by_key(|row| row.last_used),
        Some(CacheSort::Downloads) => rows.sort_by_key(|row| row.downloads),
        // Newest first by default.
        None => rows.sort_by(|a, b| b.info.mtime.cmp(&a.info.mtime)),
    }
    if query.sort.is_some() && matches!(query.order, Some(SortOrder::Descending)) {
        rows.reverse();
    }

    let count = rows.len();
    let total: u64 = rows.iter().map(|row| row.info.size).sum();

    let mut body = format!(
        "<h1>{}</h1>Count: {}, Total Size: {}\n<table>\n<tr>",
        html::escape(&package),
        count,
        html::format_size(total),
    );
    let path = format!("/find/{package}");
    let active = query.sort.map(CacheSort::key);
    for (label, key) in [
        ("Version", "version"),
        ("Arch", "arch"),
        ("Size", "size"),
        ("Created", "created"),
        ("Last used", "used"),
        ("Downloads", "downloads"),
    ] {
        body.push_str(&sort_header(&path, label, key, active, query.order, ""));
    }
    body.push_str("<th>SHA</th><th></th></tr>\n");

    for row in &rows {
        body.push_str(&format!(
            "<tr><td>{0}</td><td>{1}</td><td>{2}</td><td>{3}</td><td>{4}</td><td>{5}</td>\
             <td><a href=\"/package/{6}\"><pre>{6}</pre></a></td>\
             <td><a href=\"/compare/{6}\"><pre>diff</pre></a></td></tr>\n",
            html::escape(&row.info.version),
            html::escape(&row.info.architecture),
            html::format_size(row.info.size),
            html::format_time(row.info.mtime),
            html::format_last_used(row.last_used),
            row.downloads,
            row.info.sha,
        ));
    }
    body.push_str("</table>\n");

    Ok(render(query.mode, &package, body))
}

#[derive(Debug, Default, Deserialize)]
struct PageQuery {
    #[serde(default)]
    mode: Mode,
}

fn format_info(info: &Info) -> String {
    format!(
        "<h2>{}</h2><dl>\
         <dt>Version:</dt><dd>{}</dd>\
         <dt>Arch:</dt><dd>{}</dd>\
         <dt>Created:</dt><dd>{}</dd>\
         <dt>Size:</dt><dd>{}</dd>\
         </dl>\n{}{}",
        html::escape(&info.package),
        html::escape(&info.version),
        html::escape(&info.architecture),
        html::format_time_precise(info.mtime),
        html::format_size(info.size),
        html::format_map(&info.ctrl),
        html::format_map(&info.abi),
    )
}

fn not_found_body(sha: &str) -> String {
    format!(
        "<h1>Error</h1><div>Sha: {} not found</div>",
        html::escape(sha)
    )
}

async fn package(
    Extension(state): Extension<State>,
    Path(sha): Path<String>,
    Query(query): Query<PageQuery>,
) -> ServerResult<Html<String>> {
    let parsed = Sha::new(&sha);
    let info = match &parsed {
        Some(sha) => state.store.info(sha).await?,
        None => None,
    };
    let Some(info) = info else {
        return Ok(render(query.mode, "Error", not_found_body(&sha)));
    };

    let mut body = format_info(&info);

    let db = state.database().await?;
    if let Some(parsed) = &parsed {
        if let Some(row) = database::cache_by_sha(db, parsed).await? {
            body.push_str(&format!(
                "<dl><dt>Uploaded by:</dt><dd>{} ({})</dd>\
                 <dt>Downloads:</dt><dd>{}</dd>\
                 <dt>Last used:</dt><dd>{}</dd></dl>\n",
                html::escape(&row.user),
                html::escape(&row.ip),
                row.downloads,
                html::format_last_used(row.last_used),
            ));
        }
    }
    body.push_str(&format!("<a href=\"/compare/{sha}\">Compare with siblings</a>\n"));

    Ok(render(query.mode, &info.package, body))
}

const MATCH_FORM: &str = r#"<form id="formElem">
  <input type="file" name="abi_file" accept="text/*">
  Package: <input type="text" name="package">
  <input type="submit">
</form>
<div id="result"></div>
"#;

async fn match_form(Query(query): Query<PageQuery>) -> Html<String> {
    render(query.mode, "ABI match", MATCH_FORM.to_owned())
}

fn render_diff(target: &BTreeMap<String, String>, source: &BTreeMap<String, String>) -> String {
    let mut out = String::from("<dl>");
    for row in matching::diff(target, source) {
        match row {
            DiffRow::Changed {
                key,
                target,
                source,
            } => out.push_str(&format!(
                "<dt>{}</dt><dd><ul><li><code>{}</code></li><li><code>{}</code></li></ul></dd>\n",
                html::escape(key),
                html::escape(target),
                html::escape(source),
            )),
            DiffRow::MissingInSource { key, target } => out.push_str(&format!(
                "<dt>{}</dt><dd>Missing in source <code>{}</code></dd>\n",
                html::escape(key),
                html::escape(target),
            )),
            DiffRow::MissingInTarget { key, source } => out.push_str(&format!(
                "<dt>{}</dt><dd>Missing in target <code>{}</code></dd>\n",
                html::escape(key),
                html::escape(source),
            )),
        }
    }
    out.push_str("</dl>");
    out
}

fn render_matches(
    target: &BTreeMap<String, String>,
    package: &str,
    snapshot: &Snapshot,
    take: usize,
    exclude: Option<&Sha>,
) -> String {
    matching::closest(snapshot.iter(), package, target, exclude)
        .into_iter()
        .take(take)
        .map(|(_, info)| {
            format!(
                "<div><h3>Time: {} <a href=\"/package/{1}\">{1}</a></h3>{2}</div>",
                html::format_time_precise(info.mtime),
                info.sha,
                render_diff(target, &info.abi),
            )
        })
        .collect()
}

async fn match_abi(
    Extension(state): Extension<State>,
    mut multipart: Multipart,
) -> ServerResult<Html<String>> {
    let mut abi_text = String::new();
    let mut package = String::new();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(ServerError::request_error)?
    {
        match field.name() {
            Some("abi_file") => {
                abi_text = field.text().await.map_err(ServerError::request_error)?;
            }
            Some("package") => {
                package = field.text().await.map_err(ServerError::request_error)?;
            }
            _ => {}
        }
    }

    let target = parse_records(&abi_text, ' ');
    let snapshot = state.store.all_infos().await;
    let matches = render_matches(&target, &package, &snapshot, 3, None);

    Ok(Html(format!(
        "<h1>Target ABI:</h1><div>{}</div><div>{}</div>",
        html::format_map(&target),
        matches,
    )))
}

async fn compare(
    Extension(state): Extension<State>,
    Path(sha): Path<String>,
    Query(query): Query<PageQuery>,
) -> ServerResult<Html<String>> {
    let Some(parsed) = Sha::new(&sha) else {
        return Ok(render(query.mode, "Error", not_found_body(&sha)));
    };

    let snapshot = state.store.all_infos().await;
    let Some(target) = snapshot.get(&parsed) else {
        return Ok(render(query.mode, "Error", not_found_body(&sha)));
    };

    let matches = render_matches(&target.abi, &target.package, &snapshot, 5, Some(&parsed));
    let body = format!("{}<div>{}</div>", format_info(target), matches);
    let title = target.package.clone();

    Ok(render(query.mode, &title, body))
}

#[derive(Debug, Default, Deserialize)]
struct DownloadsQuery {
    #[serde(default)]
    mode: Mode,
    sortidx: Option<usize>,
    order: Option<SortOrder>,
    offset: Option<u64>,
    limit: Option<u64>,
    selcol: Option<String>,
    selval: Option<String>,
}

const LEDGER_COLUMNS: [&str; 7] = ["Time", "Package", "Version", "Arch", "User", "IP", "SHA"];

fn ledger_column(sortidx: Option<usize>) -> LedgerColumn {
    // Version and arch live in the blob store, not the ledger; they
    // fall back to time ordering.
    match sortidx {
        Some(1) => LedgerColumn::Package,
        Some(4) => LedgerColumn::User,
        Some(5) => LedgerColumn::Ip,
        Some(6) => LedgerColumn::Sha,
        _ => LedgerColumn::Time,
    }
}

async fn downloads(
    Extension(state): Extension<State>,
    Query(query): Query<DownloadsQuery>,
) -> ServerResult<Html<String>> {
    let column = ledger_column(query.sortidx);
    let descending = match query.order {
        Some(SortOrder::Descending) => true,
        Some(SortOrder::Ascending) => false,
        None => column == LedgerColumn::Time,
    };
    let limit = query.limit.unwrap_or(50).clamp(1, 500);
    let offset = query.offset.unwrap_or(0);

    let filter = match (query.selcol.as_deref(), query.selval.clone()) {
        (Some("time"), Some(value)) => Some((LedgerColumn::Time, value)),
        (Some("package"), Some(value)) => Some((LedgerColumn::Package, value)),
        (Some("user"), Some(value)) => Some((LedgerColumn::User, value)),
        (Some("ip"), Some(value)) => Some((LedgerColumn::Ip, value)),
        (Some("sha"), Some(value)) => Some((LedgerColumn::Sha, value)),
        _ => None,
    };

    let db = state.database().await?;
    let rows = database::downloads_page(db, filter.clone(), column, descending, offset, limit).await?;
    let snapshot = state.store.all_infos().await;

    let mut rows_html = String::new();
    for row in &rows {
        let info = Sha::new(&row.sha).and_then(|sha| snapshot.get(&sha).cloned());
        let (version, arch) = info
            .as_ref()
            .map(|info| (info.version.as_str(), info.architecture.as_str()))
            .unwrap_or(("?", "?"));
        rows_html.push_str(&format!(
            "<tr><td>{}</td>\
             <td><a href=\"/find/{1}\">{1}</a></td>\
             <td>{2}</td><td>{3}</td>\
             <td><a href=\"/downloads?selcol=user&selval={4}\">{4}</a></td>\
             <td><a href=\"/downloads?selcol=ip&selval={5}\">{5}</a></td>\
             <td><a href=\"/package/{6}\"><pre>{6}</pre></a></td></tr>\n",
            html::format_time(row.time),
            html::escape(&row.package),
            html::escape(version),
            html::escape(arch),
            html::escape(&row.user),
            html::escape(&row.ip),
            html::escape(&row.sha),
        ));
    }

    if query.mode == Mode::Append {
        return Ok(Html(rows_html));
    }

    let keep_filter = filter
        .as_ref()
        .map(|(_, value)| {
            format!(
                "&selcol={}&selval={}",
                query.selcol.as_deref().unwrap_or_default(),
                html::encode_query(value)
            )
        })
        .unwrap_or_default();

    let mut body = String::from("<h1>Downloads</h1>\n<table>\n<tr>");
    for (idx, label) in LEDGER_COLUMNS.iter().enumerate() {
        let next = if query.sortidx == Some(idx) && !descending {
            "descending"
        } else {
            "ascending"
        };
        body.push_str(&format!(
            "<th><a href=\"/downloads?sortidx={idx}&order={next}{keep_filter}\">{label}</a></th>"
        ));
    }
    body.push_str("</tr>\n");
    body.push_str(&rows_html);
    body.push_str("</table>\n");

    if rows.len() as u64 == limit {
        let order = if descending { "descending" } else { "ascending" };
        body.push_str(&format!(
            "<a href=\"/downloads?offset={}&limit={}&sortidx={}&order={}{}\">Older</a>\n",
            offset + limit,
            limit,
            query.sortidx.unwrap_or(0),
            order,
            keep_filter,
        ));
    }

    Ok(render(query.mode, "Downloads", body))
}
