use std::fmt::Write as _;

use assert_matches::assert_matches;

use eclip_fold::error::EclipError;
use eclip_fold::viewer::{MergedTable, ViewQuery, ViewerState};

fn table_with_rows(count: usize) -> MergedTable {
    let mut csv = String::from("ENST_ID,Refolded_MFE,Cell Line,Protein Type\n");
    for index in 0..count {
        let cell_line = if index % 2 == 0 { "K562" } else { "HepG2" };
        let _ = writeln!(csv, "ENST{index},-1.5,{cell_line},PUM1");
    }
    MergedTable::from_reader(csv.as_bytes()).unwrap()
}

fn query(cell_line: Option<&str>, protein_type: Option<&str>) -> ViewQuery {
    ViewQuery {
        cell_line: cell_line.map(str::to_string),
        protein_type: protein_type.map(str::to_string),
    }
}

#[test]
fn cell_line_filter_with_all_protein_types() {
    let table = table_with_rows(10);
    let view = table.view(&query(Some("K562"), Some("All")), 500);

    assert_eq!(view.matched, 5);
    assert_eq!(view.rows.len(), 5);
    assert!(view.rows.iter().all(|row| row[2] == "K562"));
    assert_eq!(view.selected_cell_line, "K562");
    assert_eq!(view.selected_protein_type, "All");
}

#[test]
fn output_is_capped_at_max_rows() {
    let table = table_with_rows(1200);
    let view = table.view(&ViewQuery::default(), 500);

    assert_eq!(view.matched, 1200);
    assert_eq!(view.rows.len(), 500);
    assert_eq!(view.rows[0][0], "ENST0");
    assert_eq!(view.rows[499][0], "ENST499");
}

#[test]
fn absent_selections_echo_all() {
    let table = table_with_rows(3);
    let view = table.view(&ViewQuery::default(), 500);
    assert_eq!(view.selected_cell_line, "All");
    assert_eq!(view.selected_protein_type, "All");

    let view = table.view(&query(Some(""), None), 500);
    assert_eq!(view.matched, 3);
    assert_eq!(view.selected_cell_line, "All");
}

#[test]
fn unknown_value_matches_nothing() {
    let table = table_with_rows(4);
    let view = table.view(&query(Some("HeLa"), None), 500);
    assert_eq!(view.matched, 0);
    assert!(view.rows.is_empty());
    assert!(view.render().contains("Showing 0 of 0 matching rows"));
}

#[test]
fn dropdown_values_are_sorted_and_distinct() {
    let csv = "Cell Line,Protein Type\nK562,PUM2\nHepG2,PUM1\nK562,\"PUM1, PUM2\"\nK562,PUM2\n";
    let table = MergedTable::from_reader(csv.as_bytes()).unwrap();
    assert_eq!(table.len(), 4);
    assert!(!table.is_empty());
    assert_eq!(table.cell_lines(), ["HepG2".to_string(), "K562".to_string()]);
    assert_eq!(
        table.protein_types(),
        ["PUM1".to_string(), "PUM1, PUM2".to_string(), "PUM2".to_string()]
    );
}

#[test]
fn table_without_required_columns_is_rejected() {
    let err = MergedTable::from_reader("ENST_ID,Cell Line\nENST1,K562\n".as_bytes()).unwrap_err();
    assert_matches!(err, EclipError::Viewer(message) if message.contains("Protein Type"));
}

#[test]
fn missing_table_file_fails_before_serving() {
    let temp = tempfile::tempdir().unwrap();
    let err = ViewerState::load(&temp.path().join("absent.csv"), 500).unwrap_err();
    assert_matches!(err, EclipError::Viewer(_));
}
