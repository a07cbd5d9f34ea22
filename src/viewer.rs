use std::collections::BTreeSet;
use std::fmt::Write as _;
use std::io::Read;
use std::path::Path;
use std::sync::Arc;

use axum::Router;
use axum::extract::{Form, Query, State};
use axum::response::Html;
use axum::routing::get;
use serde::Deserialize;

use crate::aggregate::{CELL_LINE_COLUMN, PROTEIN_TYPE_COLUMN};
use crate::error::EclipError;

pub const ALL: &str = "All";

#[derive(Debug, Clone)]
pub struct MergedTable {
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
    cell_line_column: usize,
    protein_type_column: usize,
    cell_lines: Vec<String>,
    protein_types: Vec<String>,
}

impl MergedTable {
    pub fn load(path: &Path) -> Result<Self, EclipError> {
        let file = std::fs::File::open(path)
            .map_err(|err| EclipError::Viewer(format!("open {}: {err}", path.display())))?;
        Self::from_reader(file)
    }

    pub fn from_reader<R: Read>(reader: R) -> Result<Self, EclipError> {
        let mut reader = csv::ReaderBuilder::new().has_headers(true).from_reader(reader);
        let headers: Vec<String> = reader
            .headers()
            .map_err(|err| EclipError::Viewer(err.to_string()))?
            .iter()
            .map(str::to_string)
            .collect();
        let column = |name: &str| {
            headers
                .iter()
                .position(|header| header == name)
                .ok_or_else(|| EclipError::Viewer(format!("merged table has no '{name}' column")))
        };
        let cell_line_column = column(CELL_LINE_COLUMN)?;
        let protein_type_column = column(PROTEIN_TYPE_COLUMN)?;

        let mut rows = Vec::new();
        for record in reader.records() {
            let record = record.map_err(|err| EclipError::Viewer(err.to_string()))?;
            rows.push(record.iter().map(str::to_string).collect::<Vec<_>>());
        }

        let distinct = |index: usize| -> Vec<String> {
            rows.iter()
                .filter_map(|row| row.get(index))
                .filter(|value| !value.is_empty())
                .cloned()
                .collect::<BTreeSet<_>>()
                .into_iter()
                .collect()
        };
        let cell_lines = distinct(cell_line_column);
        let protein_types = distinct(protein_type_column);

        Ok(Self {
            headers,
            rows,
            cell_line_column,
            protein_type_column,
            cell_lines,
            protein_types,
        })
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn cell_lines(&self) -> &[String] {
        &self.cell_lines
    }

    pub fn protein_types(&self) -> &[String] {
        &self.protein_types
    }

    pub fn view(&self, query: &ViewQuery, max_rows: usize) -> TableView<'_> {
        let cell_line = query.cell_line_filter();
        let protein_type = query.protein_type_filter();
        let mut matched = 0usize;
        let mut rows = Vec::new();
        for row in &self.rows {
            let keep = cell_line.is_none_or(|value| row[self.cell_line_column] == value)
                && protein_type.is_none_or(|value| row[self.protein_type_column] == value);
            if !keep {
                continue;
            }
            matched += 1;
            if rows.len() < max_rows {
                rows.push(row.as_slice());
            }
        }

        TableView {
            headers: &self.headers,
            rows,
            matched,
            selected_cell_line: query.selected_cell_line().to_string(),
            selected_protein_type: query.selected_protein_type().to_string(),
            cell_lines: &self.cell_lines,
            protein_types: &self.protein_types,
        }
    }
}

/// Filter selections of one request. Absent, empty or `"All"` means
/// unfiltered.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ViewQuery {
    #[serde(default)]
    pub cell_line: Option<String>,
    #[serde(default)]
    pub protein_type: Option<String>,
}

impl ViewQuery {
    fn cell_line_filter(&self) -> Option<&str> {
        active_filter(self.cell_line.as_deref())
    }

    fn protein_type_filter(&self) -> Option<&str> {
        active_filter(self.protein_type.as_deref())
    }

    pub fn selected_cell_line(&self) -> &str {
        self.cell_line_filter().unwrap_or(ALL)
    }

    pub fn selected_protein_type(&self) -> &str {
        self.protein_type_filter().unwrap_or(ALL)
    }
}

fn active_filter(value: Option<&str>) -> Option<&str> {
    value.filter(|value| !value.is_empty() && *value != ALL)
}

#[derive(Debug)]
pub struct TableView<'a> {
    pub headers: &'a [String],
    pub rows: Vec<&'a [String]>,
    pub matched: usize,
    pub selected_cell_line: String,
    pub selected_protein_type: String,
    pub cell_lines: &'a [String],
    pub protein_types: &'a [String],
}

impl TableView<'_> {
    pub fn render(&self) -> String {
        let mut html = String::from(
            "<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"utf-8\">\n\
             <title>eCLIP folded structures</title>\n</head>\n<body>\n\
             <h1>eCLIP folded structures</h1>\n<form method=\"post\" action=\"/\">\n",
        );
        render_select(
            &mut html,
            "cell_line",
            "Cell Line",
            self.cell_lines,
            &self.selected_cell_line,
        );
        render_select(
            &mut html,
            "protein_type",
            "Protein Type",
            self.protein_types,
            &self.selected_protein_type,
        );
        html.push_str("<button type=\"submit\">Filter</button>\n</form>\n");
        let _ = writeln!(
            html,
            "<p>Showing {} of {} matching rows</p>",
            self.rows.len(),
            self.matched
        );

        html.push_str("<table class=\"table table-bordered\">\n<thead>\n<tr>");
        for header in self.headers {
            let _ = write!(html, "<th>{}</th>", escape_html(header));
        }
        html.push_str("</tr>\n</thead>\n<tbody>\n");
        for row in &self.rows {
            html.push_str("<tr>");
            for cell in row.iter() {
                let _ = write!(html, "<td>{}</td>", escape_html(cell));
            }
            html.push_str("</tr>\n");
        }
        html.push_str("</tbody>\n</table>\n</body>\n</html>\n");
        html
    }
}

fn render_select(html: &mut String, name: &str, label: &str, values: &[String], selected: &str) {
    let _ = writeln!(html, "<label for=\"{name}\">{label}</label>");
    let _ = writeln!(html, "<select name=\"{name}\" id=\"{name}\">");
    for value in std::iter::once(ALL).chain(values.iter().map(String::as_str)) {
        let marker = if value == selected { " selected" } else { "" };
        let value = escape_html(value);
        let _ = writeln!(html, "<option value=\"{value}\"{marker}>{value}</option>");
    }
    html.push_str("</select>\n");
}

pub fn escape_html(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(ch),
        }
    }
    escaped
}

/// Loaded once before the server starts listening; handlers only read it.
#[derive(Debug, Clone)]
pub struct ViewerState {
    table: Arc<MergedTable>,
    max_rows: usize,
}

impl ViewerState {
    pub fn new(table: MergedTable, max_rows: usize) -> Self {
        Self {
            table: Arc::new(table),
            max_rows,
        }
    }

    pub fn load(path: &Path, max_rows: usize) -> Result<Self, EclipError> {
        let table = MergedTable::load(path)?;
        tracing::info!(rows = table.len(), path = %path.display(), "loaded merged table");
        Ok(Self::new(table, max_rows))
    }

    fn render(&self, query: &ViewQuery) -> Html<String> {
        Html(self.table.view(query, self.max_rows).render())
    }
}

pub fn router(state: ViewerState) -> Router {
    Router::new()
        .route("/", get(index_get).post(index_post))
        .with_state(state)
}

async fn index_get(State(state): State<ViewerState>, Query(query): Query<ViewQuery>) -> Html<String> {
    state.render(&query)
}

async fn index_post(State(state): State<ViewerState>, Form(query): Form<ViewQuery>) -> Html<String> {
    state.render(&query)
}

pub async fn serve(state: ViewerState, bind: &str) -> Result<(), EclipError> {
    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .map_err(|err| EclipError::Viewer(format!("bind {bind}: {err}")))?;
    tracing::info!("viewer listening on http://{bind}/");
    axum::serve(listener, router(state))
        .await
        .map_err(|err| EclipError::Viewer(err.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const TABLE: &str = "\
ENST_ID,Cell Line,Protein Type
ENST1,K562,PUM1
ENST2,HepG2,PUM2
ENST3,K562,\"PUM1, PUM2\"
";

    fn state(max_rows: usize) -> ViewerState {
        ViewerState::new(MergedTable::from_reader(TABLE.as_bytes()).unwrap(), max_rows)
    }

    #[tokio::test]
    async fn post_form_filters_and_echoes() {
        let query = ViewQuery {
            cell_line: Some("K562".to_string()),
            protein_type: Some("All".to_string()),
        };
        let Html(page) = index_post(State(state(500)), Form(query)).await;

        assert!(page.contains("<td>ENST1</td>"));
        assert!(page.contains("<td>ENST3</td>"));
        assert!(!page.contains("<td>ENST2</td>"));
        assert!(page.contains("<option value=\"K562\" selected>K562</option>"));
        assert!(page.contains("<option value=\"All\" selected>All</option>"));
    }

    #[tokio::test]
    async fn get_without_query_shows_everything() {
        let Html(page) = index_get(State(state(500)), Query(ViewQuery::default())).await;
        assert!(page.contains("Showing 3 of 3 matching rows"));
        assert!(page.contains("<td>PUM1, PUM2</td>"));
    }

    #[test]
    fn html_is_escaped() {
        assert_eq!(escape_html("<a href=\"x\">&'"), "&lt;a href=&quot;x&quot;&gt;&amp;&#39;");
    }
}
