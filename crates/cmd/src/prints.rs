// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! Human-readable views of catalog and monitor responses, and of queued messages

use std::collections::BTreeMap;
use std::fmt::{self, Write};

use envelope::{Details, Payload, TransactionRecord, keys};
use rabbit::MessageSummary;
use serde::Deserialize;
use serde_json::Value;

/// The user the admin tools query as. Other users are named in `user_query`.
pub const ADMIN_USER: &str = "nlds";

/// Continuation indent for multi-line field values
const CONTINUATION: usize = 22;

/// Render the low nine bits of a unix mode, e.g. `0o750` as `rwxr-x---`
pub fn integer_permissions_to_string(mode: u32) -> String {
    let mut out = String::with_capacity(9);
    for shift in [6, 3, 0] {
        let digit = (mode >> shift) & 0o7;
        for (bit, letter) in [(4, 'r'), (2, 'w'), (1, 'x')] {
            out.push(if digit & bit != 0 { letter } else { '-' });
        }
    }
    out
}

/// File size with a decimal suffix, staying in a unit until it passes 2000
pub fn pretty_size(size: u64) -> String {
    const SUFFIXES: [(&str, f64); 5] = [
        ("B", 1.0),
        ("K", 1e3),
        ("M", 1e6),
        ("G", 1e9),
        ("T", 1e12),
    ];
    const LEVEL_UP: f64 = 2000.0;

    let size = size as f64;
    let (suffix, multiplier) = SUFFIXES
        .iter()
        .copied()
        .find(|(_, multiplier)| size / multiplier <= LEVEL_UP)
        .unwrap_or(SUFFIXES[SUFFIXES.len() - 1]);
    format!("{}{suffix}", two_places(size / multiplier))
}

fn two_places(value: f64) -> String {
    let rounded = (value * 100.0).round() / 100.0;
    if rounded.fract() == 0.0 {
        format!("{rounded:.1}")
    } else {
        format!("{rounded}")
    }
}

/// First `n` characters of `s`
fn clip(s: &str, n: usize) -> &str {
    s.char_indices().nth(n).map_or(s, |(i, _)| &s[..i])
}

/// ISO timestamp as `YYYY-MM-DD HH:MM:SS`
fn short_time(s: &str) -> String {
    clip(&s.replace('T', " "), 19).to_string()
}

fn field(out: &mut String, name: &str, value: impl fmt::Display) -> fmt::Result {
    writeln!(out, "{:<4}{name:<16}: {value}", "")
}

fn multiline<'a>(values: impl IntoIterator<Item = &'a str>) -> String {
    let separator = format!("\n{:<CONTINUATION$}", "");
    values.into_iter().collect::<Vec<_>>().join(&separator)
}

/// How `find` results are shown
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct View {
    /// One path per line
    pub simple: bool,
    /// Object storage URLs instead of paths
    pub url: bool,
}

fn meta_text(meta: &Payload, key: &str) -> Option<String> {
    match meta.get(key)? {
        Value::Null => None,
        Value::String(s) if s.is_empty() => None,
        Value::String(s) => Some(s.clone()),
        Value::Object(map) if map.is_empty() => None,
        Value::Object(map) => Some(
            map.iter()
                .map(|(k, v)| match v.as_str() {
                    Some(v) => format!("{k}:{v}"),
                    None => format!("{k}:{v}"),
                })
                .collect::<Vec<_>>()
                .join(","),
        ),
        other => Some(other.to_string()),
    }
}

fn nonempty(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.is_empty())
}

/// Describe the request a response answers, e.g.
/// `All users, state: COMPLETE, order: descending`
pub fn construct_header_string(details: &Details, meta: &Payload, descending: bool, view: View) -> String {
    let mut header = Vec::new();

    if let Some(user) = nonempty(details.user_query.as_deref()) {
        header.push(format!("user: {user}"));
    } else if details.groupall == Some(true) || details.user.as_deref() == Some(ADMIN_USER) {
        header.push("All users".to_string());
    } else {
        header.push(format!("user: {}", details.user.as_deref().unwrap_or_default()));
    }

    if let Some(group) = nonempty(details.group_query.as_deref()).or(nonempty(details.group.as_deref())) {
        header.push(format!("group: {group}"));
    }

    if view.simple {
        header.push("simple view".to_string());
    } else if view.url {
        header.push("url view".to_string());
    }

    if let Some(id) = details.id {
        header.push(format!("id: {id}"));
    }
    if let Some(transaction_id) = nonempty(details.transaction_id.as_deref())
        .map(str::to_string)
        .or_else(|| meta_text(meta, keys::TRANSACT_ID))
    {
        header.push(format!("transaction_id: {transaction_id}"));
    }
    if let Some(job_label) = nonempty(details.job_label.as_deref()) {
        header.push(format!("job_label: {job_label}"));
    }
    if let Some(state) = details.state {
        header.push(format!("state: {}", state.name()));
    }
    if let Some(sub_id) = nonempty(details.sub_id.as_deref()) {
        header.push(format!("sub_id: {sub_id}"));
    }
    if let Some(label) = nonempty(details.label.as_deref())
        .map(str::to_string)
        .or_else(|| meta_text(meta, keys::LABEL))
    {
        header.push(format!("label: {label}"));
    }
    if let Some(holding_id) = details
        .holding_id
        .map(|id| id.to_string())
        .or_else(|| meta_text(meta, keys::HOLDING_ID))
    {
        header.push(format!("holding_id: {holding_id}"));
    }
    let tag = match &details.tag {
        Some(tags) if !tags.is_empty() => Some(
            tags.iter()
                .map(|(k, v)| format!("{k}:{v}"))
                .collect::<Vec<_>>()
                .join(","),
        ),
        _ => meta_text(meta, keys::TAG),
    };
    if let Some(tag) = tag {
        header.push(format!("tag: {tag}"));
    }
    if let Some(path) = meta_text(meta, keys::PATH) {
        header.push(format!("path: {path}"));
    }
    if let Some(api_action) = meta_text(meta, keys::API_ACTION) {
        header.push(format!("api action: {api_action}"));
    }

    let order = if descending { "descending" } else { "ascending" };
    format!("{}, order: {order}", header.join(", "))
}

/// A holding as the catalog lists it
#[derive(Debug, Clone, Deserialize)]
pub struct Holding {
    pub id: i64,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub group: String,
    #[serde(default)]
    pub date: String,
    #[serde(default)]
    pub transactions: Vec<String>,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Location {
    pub storage_type: String,
    #[serde(default)]
    pub url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FileRecord {
    pub original_path: String,
    #[serde(default)]
    pub path_type: String,
    #[serde(default)]
    pub link_path: Option<String>,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub user: Option<i64>,
    #[serde(default)]
    pub group: Option<i64>,
    #[serde(default)]
    pub permissions: u32,
    #[serde(default)]
    pub locations: Vec<Location>,
}

impl FileRecord {
    /// URL of the object storage copy, if there is one
    pub fn object_url(&self) -> Option<&str> {
        self.locations
            .iter()
            .rev()
            .find(|l| l.storage_type == "OBJECT_STORAGE")
            .and_then(|l| l.url.as_deref())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct FileTransaction {
    #[serde(default)]
    pub ingest_time: String,
    #[serde(default)]
    pub filelist: Vec<FileRecord>,
}

/// A holding and the matching files in each of its transactions
#[derive(Debug, Clone, Deserialize)]
pub struct FileHolding {
    #[serde(default)]
    pub user: String,
    pub holding_id: i64,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub transactions: BTreeMap<String, FileTransaction>,
}

impl FileHolding {
    fn files(&self) -> impl Iterator<Item = (&FileTransaction, &FileRecord)> {
        self.transactions
            .values()
            .flat_map(|t| t.filelist.iter().map(move |f| (t, f)))
    }
}

/// Results of one query, ready to print
#[derive(Debug, Clone)]
pub enum Listing {
    Holdings(Vec<Holding>),
    Files(Vec<FileHolding>),
    Transactions(Vec<TransactionRecord>),
}

impl Listing {
    pub fn len(&self) -> usize {
        match self {
            Listing::Holdings(h) => h.len(),
            Listing::Files(h) => h.len(),
            Listing::Transactions(t) => t.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn nouns(&self) -> (&'static str, &'static str, &'static str) {
        match self {
            Listing::Holdings(_) => ("holdings", "Listing holding for", "Listing holdings for"),
            Listing::Files(_) => ("files", "Listing files for holding", "Listing files for holdings"),
            Listing::Transactions(_) => (
                "transactions",
                "State of transaction for",
                "State of transactions for",
            ),
        }
    }
}

/// Parse the catalog's `holdings`, a list of holdings for `list`
pub fn parse_holdings(holdings: &[Value]) -> serde_json::Result<Vec<Holding>> {
    holdings.iter().map(Holding::deserialize).collect()
}

/// Parse the catalog's `holdings` for `find`: a mapping of holding to files
pub fn parse_file_holdings(holdings: &Value) -> serde_json::Result<Vec<FileHolding>> {
    match holdings {
        Value::Object(map) => map.values().map(FileHolding::deserialize).collect(),
        Value::Array(items) => items.iter().map(FileHolding::deserialize).collect(),
        _ => Ok(Vec::new()),
    }
}

/// Render a query result under its header
pub fn render(listing: &Listing, header: &str, view: View) -> Result<String, fmt::Error> {
    let mut out = String::new();
    if let (true, Listing::Files(holdings)) = (view.simple, listing) {
        print_simple_file(&mut out, holdings, view.url)?;
        return Ok(out);
    }

    let (noun, single, multi) = listing.nouns();
    match listing.len() {
        0 => {
            writeln!(out, "No {noun} found for {header}")?;
        }
        1 => {
            writeln!(out, "{single} {header}")?;
            match listing {
                Listing::Holdings(h) => print_single_list(&mut out, &h[0])?,
                Listing::Files(h) => print_single_file(&mut out, h, view.url)?,
                Listing::Transactions(t) => print_single_stat(&mut out, t)?,
            }
        }
        _ => {
            writeln!(out, "{multi} {header}")?;
            out.push_str(&table_header(listing));
            match listing {
                Listing::Holdings(h) => print_multi_list(&mut out, h)?,
                Listing::Files(h) => print_multi_file(&mut out, h, view.url)?,
                Listing::Transactions(t) => print_multi_stat(&mut out, t)?,
            }
        }
    }
    Ok(out)
}

fn table_header(listing: &Listing) -> String {
    let common = format!("{:<4}{:<16}{:<16}", "", "user", "group");
    let columns = match listing {
        Listing::Holdings(_) => format!("{:<6}{:<32}{:<32}", "id", "label", "ingest time"),
        Listing::Files(_) => format!("{:<6}{:<16}{:<8}{:<12}path", "h-id", "h-label", "size", "date"),
        Listing::Transactions(_) => format!(
            "{:<12}{:<16}{:<16}{:<16}{:<23}{:<20}",
            "id", "action", "job label", "label", "state", "last update"
        ),
    };
    format!("{common}{columns}\n")
}

fn print_single_list(out: &mut String, holding: &Holding) -> fmt::Result {
    field(out, "user", &holding.user)?;
    field(out, "group", &holding.group)?;
    field(out, "id", holding.id)?;
    field(out, "label", &holding.label)?;
    field(out, "ingest time", short_time(&holding.date))?;
    if !holding.transactions.is_empty() {
        field(out, "transaction id", multiline(holding.transactions.iter().map(String::as_str)))?;
    }
    if !holding.tags.is_empty() {
        let tags: Vec<String> = holding.tags.iter().map(|(k, v)| format!("{k} : {v}")).collect();
        field(out, "tags", multiline(tags.iter().map(String::as_str)))?;
    }
    Ok(())
}

fn print_multi_list(out: &mut String, holdings: &[Holding]) -> fmt::Result {
    for h in holdings {
        writeln!(
            out,
            "{:<4}{:<16}{:<16}{:<6}{:<32}{:<32}",
            "",
            h.user,
            h.group,
            h.id,
            h.label,
            short_time(&h.date)
        )?;
    }
    Ok(())
}

fn print_single_file(out: &mut String, holdings: &[FileHolding], print_url: bool) -> fmt::Result {
    for holding in holdings {
        for (transaction, file) in holding.files() {
            field(out, "path", &file.original_path)?;
            field(out, "type", &file.path_type)?;
            if let Some(link) = nonempty(file.link_path.as_deref()) {
                field(out, "link path", link)?;
            }
            field(out, "size", pretty_size(file.size))?;
            field(out, "user uid", file.user.map(|u| u.to_string()).unwrap_or_default())?;
            field(out, "group gid", file.group.map(|g| g.to_string()).unwrap_or_default())?;
            field(out, "permissions", integer_permissions_to_string(file.permissions))?;
            field(out, "ingest time", short_time(&transaction.ingest_time))?;
            let storage: Vec<&str> = file.locations.iter().map(|l| l.storage_type.as_str()).collect();
            field(out, "storage location", storage.join(", "))?;
            if let (true, Some(url)) = (print_url, file.object_url()) {
                field(out, "url", url)?;
            }
        }
    }
    Ok(())
}

fn print_simple_file(out: &mut String, holdings: &[FileHolding], print_url: bool) -> fmt::Result {
    for holding in holdings {
        for (_, file) in holding.files() {
            let line = match (print_url, file.object_url()) {
                (true, Some(url)) => url,
                _ => file.original_path.as_str(),
            };
            writeln!(out, "{line}")?;
        }
    }
    Ok(())
}

fn print_multi_file(out: &mut String, holdings: &[FileHolding], print_url: bool) -> fmt::Result {
    for holding in holdings {
        for (transaction, file) in holding.files() {
            let path = match (print_url, file.object_url()) {
                (true, Some(url)) => url,
                _ => file.original_path.as_str(),
            };
            let date = transaction.ingest_time.replace('T', " ");
            writeln!(
                out,
                "{:<4}{:<16}{:<6}{:<16}{:<8}{:<12}{path}",
                "",
                holding.user,
                holding.holding_id,
                holding.label,
                pretty_size(file.size),
                clip(&date, 11)
            )?;
        }
    }
    Ok(())
}

fn print_single_stat(out: &mut String, records: &[TransactionRecord]) -> fmt::Result {
    for tr in records {
        let Some(status) = tr.status() else {
            continue;
        };
        field(out, "id", tr.id)?;
        field(out, "user", &tr.user)?;
        field(out, "group", &tr.group)?;
        field(out, "action", &tr.api_action)?;
        field(out, "transaction id", &tr.transaction_id)?;
        if let Some(label) = &tr.label {
            field(out, "label", label)?;
        }
        field(out, "creation time", tr.creation_time)?;
        field(out, "state", status.state.name())?;
        if !tr.warnings.is_empty() {
            field(out, "warnings", multiline(tr.warnings.iter().map(String::as_str)))?;
        }

        writeln!(out, "{:<4}{:<16}->", "", "sub records")?;
        for sr in &tr.sub_records {
            let id = sr.id.map(|id| id.to_string()).unwrap_or_default();
            writeln!(out, "{:<4}{:<4} {:<13}: {id}", "", "+", "id")?;
            writeln!(out, "{:<9}{:<13}: {}", "", "sub_id", sr.sub_id)?;
            writeln!(out, "{:<9}{:<13}: {}", "", "state", sr.state.name())?;
            writeln!(out, "{:<9}{:<13}: {}", "", "last update", sr.last_updated)?;
            if !sr.failed_files.is_empty() {
                writeln!(out, "{:<9}{:<13}->", "", "failed files")?;
                for (filepath, reason) in sr.failed_files.iter() {
                    writeln!(out, "{:<9}{:<4} {:<8} : {filepath}", "", "+", "filepath")?;
                    writeln!(out, "{:<9}{:>4} {:<8} : {reason}", "", "", "reason")?;
                }
            }
        }
    }
    Ok(())
}

fn print_multi_stat(out: &mut String, records: &[TransactionRecord]) -> fmt::Result {
    for tr in records {
        let Some(status) = tr.status() else {
            continue;
        };
        let id = tr.id.to_string();
        let time = status.last_activity.format("%Y-%m-%d %H:%M:%S").to_string();
        writeln!(
            out,
            "{:<4}{:<16}{:<16}{:<12}{:<16}{:<16}{:<16}{:<23}{:<20}",
            "",
            clip(&tr.user, 15),
            clip(&tr.group, 15),
            clip(&id, 11),
            clip(&tr.api_action, 15),
            clip(tr.job_label.as_deref().unwrap_or_default(), 15),
            clip(tr.label.as_deref().unwrap_or_default(), 15),
            clip(status.state.name(), 22),
            time
        )?;
    }
    Ok(())
}

/// Column titles for `qm list`
pub fn queue_table_header() -> String {
    format!(
        "{:<16}{:<12}{:<38}{:<38}{:<32}{:>10}",
        "user", "group", "transaction_id", "sub_id", "rk", "N files"
    )
}

/// One `qm list` row. Unreadable messages show `?` files and the reason.
pub fn queue_row(summary: &MessageSummary) -> String {
    let count = summary
        .file_count
        .map_or_else(|| "?".to_string(), |n| n.to_string());
    let mut row = format!(
        "{:<16}{:<12}{:<38}{:<38}{:<32}{:>10}",
        summary.user.as_deref().unwrap_or("-"),
        summary.group.as_deref().unwrap_or("-"),
        summary.transaction_id.as_deref().unwrap_or("-"),
        summary.sub_id.as_deref().unwrap_or("-"),
        summary.routing_key,
        count
    );
    if let Some(error) = &summary.error {
        row.push_str(&format!("  ({error})"));
    }
    row
}

#[cfg(test)]
mod tests {
    use super::*;
    use envelope::{ApiAction, State};
    use serde_json::json;

    fn admin_details(api_action: ApiAction) -> Details {
        let mut details = Details::new(api_action);
        details.user = Some(ADMIN_USER.to_string());
        details.group = Some(String::new());
        details
    }

    #[test]
    fn test_permissions() {
        assert_eq!(integer_permissions_to_string(0o755), "rwxr-xr-x");
        assert_eq!(integer_permissions_to_string(0o640), "rw-r-----");
        // file type bits are ignored
        assert_eq!(integer_permissions_to_string(0o100600), "rw-------");
    }

    #[test]
    fn test_pretty_size() {
        assert_eq!(pretty_size(0), "0.0B");
        assert_eq!(pretty_size(512), "512.0B");
        assert_eq!(pretty_size(2000), "2000.0B");
        assert_eq!(pretty_size(2500), "2.5K");
        assert_eq!(pretty_size(1_234_567), "1234.57K");
        assert_eq!(pretty_size(2_500_000), "2.5M");
        assert_eq!(pretty_size(7_000_000_000_000_000), "7000.0T");
    }

    #[test]
    fn test_header_for_admin_user() {
        let mut details = admin_details(ApiAction::Stat);
        details.state = Some(State::Complete);
        let mut meta = Payload::new();
        meta.insert("api_action".to_string(), json!("put"));
        assert_eq!(
            construct_header_string(&details, &meta, true, View::default()),
            "All users, state: COMPLETE, api action: put, order: descending"
        );
    }

    #[test]
    fn test_header_for_queried_user() {
        let mut details = admin_details(ApiAction::Find);
        details.user_query = Some("alice".to_string());
        details.group_query = Some("gws".to_string());
        let mut meta = Payload::new();
        meta.insert("holding_id".to_string(), json!(12));
        meta.insert("tag".to_string(), json!({"project": "cmip6"}));
        meta.insert("path".to_string(), json!("/gws/.*nc"));
        let view = View {
            simple: true,
            url: false,
        };
        assert_eq!(
            construct_header_string(&details, &meta, false, view),
            "user: alice, group: gws, simple view, holding_id: 12, tag: project:cmip6, \
             path: /gws/.*nc, order: ascending"
        );
    }

    fn holding(id: i64, label: &str) -> Value {
        json!({
            "id": id, "label": label, "user": "alice", "group": "gws",
            "date": "2024-03-01T10:20:30.123456",
            "transactions": ["5c3f1e8a-1111-4c61-9f5a-0d1a2b3c4d5e"],
            "tags": {"project": "cmip6"}
        })
    }

    #[test]
    fn test_render_holdings() -> anyhow::Result<()> {
        let header = "All users, order: ascending";
        let empty = render(&Listing::Holdings(vec![]), header, View::default())?;
        assert_eq!(empty, "No holdings found for All users, order: ascending\n");

        let one = Listing::Holdings(parse_holdings(&[holding(3, "run1")])?);
        let out = render(&one, header, View::default())?;
        assert!(out.starts_with("Listing holding for All users"));
        assert!(out.contains("    label           : run1\n"));
        assert!(out.contains("    ingest time     : 2024-03-01 10:20:30\n"));
        assert!(out.contains("    tags            : project : cmip6\n"));

        let two = Listing::Holdings(parse_holdings(&[holding(3, "run1"), holding(4, "run2")])?);
        let out = render(&two, header, View::default())?;
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines.len(), 4);
        assert!(lines[0].starts_with("Listing holdings for"));
        assert!(lines[1].starts_with("    user            group           id    label"));
        assert!(lines[3].starts_with("    alice           gws             4     run2"));
        Ok(())
    }

    fn file_holdings() -> Value {
        json!({
            "run1": {
                "user": "alice", "holding_id": 3, "label": "run1",
                "transactions": {
                    "5c3f1e8a-1111-4c61-9f5a-0d1a2b3c4d5e": {
                        "ingest_time": "2024-03-01T10:20:30",
                        "filelist": [{
                            "original_path": "/gws/a.nc", "path_type": "FILE",
                            "link_path": null, "size": 2500, "user": 1001,
                            "group": 26030, "permissions": 33188,
                            "locations": [
                                {"storage_type": "OBJECT_STORAGE", "url": "https://os/nlds.3/a.nc"},
                                {"storage_type": "TAPE", "url": null}
                            ]
                        }]
                    }
                }
            }
        })
    }

    #[test]
    fn test_render_files() -> anyhow::Result<()> {
        let files = Listing::Files(parse_file_holdings(&file_holdings())?);
        let out = render(&files, "user: alice, order: ascending", View::default())?;
        assert!(out.contains("    path            : /gws/a.nc\n"));
        assert!(out.contains("    size            : 2.5K\n"));
        assert!(out.contains("    permissions     : rw-r--r--\n"));
        assert!(out.contains("    storage location: OBJECT_STORAGE, TAPE\n"));
        assert!(!out.contains("url"));

        let url = View {
            simple: false,
            url: true,
        };
        assert!(render(&files, "", url)?.contains("    url             : https://os/nlds.3/a.nc\n"));

        let simple = View {
            simple: true,
            url: false,
        };
        assert_eq!(render(&files, "", simple)?, "/gws/a.nc\n");
        Ok(())
    }

    fn record(id: i64, states: &[&str]) -> Value {
        let sub_records: Vec<Value> = states
            .iter()
            .enumerate()
            .map(|(i, state)| {
                json!({
                    "id": i, "sub_id": format!("sub-{i}"), "state": state,
                    "last_updated": format!("2022-12-06T15:4{i}:44"),
                    "failed_files": if *state == "FAILED" {
                        json!([{"filepath": "/gws/b.nc", "reason": "permission denied"}])
                    } else {
                        json!([])
                    }
                })
            })
            .collect();
        json!({
            "id": id, "transaction_id": "a06ec7b3-e83c-4ac7-97d8-2545a0b8d317",
            "user": "alice", "group": "gws", "api_action": "putlist",
            "creation_time": "2022-12-06T15:45:43", "job_label": "nightly",
            "sub_records": sub_records
        })
    }

    #[test]
    fn test_render_transactions() -> anyhow::Result<()> {
        let single: Vec<TransactionRecord> = vec![serde_json::from_value(record(2, &["COMPLETE", "FAILED"]))?];
        let out = render(&Listing::Transactions(single), "All users", View::default())?;
        assert!(out.starts_with("State of transaction for All users\n"));
        assert!(out.contains("    state           : COMPLETE_WITH_ERRORS\n"));
        assert!(out.contains("    creation time   : 2022-12-06 15:45:43\n"));
        assert!(out.contains("         +    filepath : /gws/b.nc\n"));
        assert!(out.contains("              reason   : permission denied\n"));

        let multi: Vec<TransactionRecord> = vec![
            serde_json::from_value(record(2, &["COMPLETE"]))?,
            serde_json::from_value(record(3, &["ROUTING", "COMPLETE"]))?,
            serde_json::from_value(record(4, &[]))?,
        ];
        let out = render(&Listing::Transactions(multi), "All users", View::default())?;
        let lines: Vec<&str> = out.lines().collect();
        // records without sub-records are skipped
        assert_eq!(lines.len(), 4);
        assert!(lines[3].contains("ROUTING"));
        assert!(lines[3].contains("2022-12-06 15:41:44"));
        assert!(lines[2].starts_with("    alice           gws             2           putlist         nightly"));
        Ok(())
    }

    #[test]
    fn test_queue_rows() {
        let header = queue_table_header();
        assert!(header.starts_with("user            group       transaction_id"));
        assert!(header.ends_with("   N files"));

        let summary = MessageSummary {
            user: Some("alice".to_string()),
            group: Some("gws".to_string()),
            transaction_id: Some("5c3f1e8a-1111-4c61-9f5a-0d1a2b3c4d5e".to_string()),
            sub_id: Some("0b0c6f6e-2222-4d9a-8a1b-4f5e6d7c8b9a".to_string()),
            routing_key: "nlds-api.transfer-put.start".to_string(),
            file_count: Some(2500),
            error: None,
        };
        let row = queue_row(&summary);
        assert_eq!(row.len(), header.len());
        assert!(row.ends_with("      2500"));

        let unreadable = MessageSummary {
            user: None,
            group: None,
            transaction_id: None,
            sub_id: None,
            routing_key: "nlds-api.route.start".to_string(),
            file_count: None,
            error: Some("bad json".to_string()),
        };
        assert!(queue_row(&unreadable).ends_with("         ?  (bad json)"));
    }
}
