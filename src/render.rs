use crate::data_region::{List, Table, TableRow};
use crate::error::Result;
use crate::execution::{Execution, RegionFrame};
use crate::grouping::GroupEntry;
use crate::present::{ContainerKind, EntryKind, Presenter};
use crate::report_items::{ReportItem, ReportItems};
use crate::rows::Row;

/// Unpaged traversal: streams the body through `presenter`.
pub(crate) fn present_report(execution: &Execution<'_>, presenter: &mut dyn Presenter) -> Result<()> {
    presenter.report_start(execution.def);
    present_items(execution, &execution.def.body.items, None, presenter)?;
    presenter.report_end();
    Ok(())
}

fn present_items(
    execution: &Execution<'_>,
    items: &ReportItems,
    row: Option<&Row>,
    presenter: &mut dyn Presenter,
) -> Result<()> {
    for item in items.iter() {
        present_item(execution, item, row, presenter)?;
    }
    Ok(())
}

fn present_item(
    execution: &Execution<'_>,
    item: &ReportItem,
    row: Option<&Row>,
    presenter: &mut dyn Presenter,
) -> Result<()> {
    if execution.is_hidden(item.base(), row)? {
        return Ok(());
    }
    match item {
        ReportItem::Textbox(textbox) => {
            let text = execution.textbox_text(textbox, row, true)?;
            let link = execution.link(textbox, row)?;
            presenter.textbox(textbox.base.name.as_deref(), &text, link.as_deref());
        }
        ReportItem::Rectangle(rectangle) => {
            let name = rectangle.base.name.as_deref();
            if presenter.container_start(name, ContainerKind::Rectangle) {
                present_items(execution, &rectangle.items, row, presenter)?;
                presenter.container_end(name, ContainerKind::Rectangle);
            }
        }
        ReportItem::Chart(chart) => {
            let name = chart.base.name.as_deref();
            if presenter.container_start(name, ContainerKind::Chart) {
                presenter.container_end(name, ContainerKind::Chart);
            }
        }
        ReportItem::List(list) => present_list(execution, list, presenter)?,
        ReportItem::Table(table) => present_table(execution, table, presenter)?,
    }
    Ok(())
}

/// `true` when the region has rows; otherwise reports `NoRows` if defined.
fn region_has_rows(
    execution: &Execution<'_>,
    frame: &RegionFrame<'_, '_>,
    name: Option<&str>,
    no_rows: Option<&crate::expression::Expression>,
    presenter: &mut dyn Presenter,
) -> Result<bool> {
    if !frame.is_empty() {
        return Ok(true);
    }
    if let Some(message) = no_rows {
        let text = execution.evaluate(message, None, name.unwrap_or_default())?;
        presenter.no_rows(name, &text.to_string());
    }
    Ok(false)
}

fn present_list(execution: &Execution<'_>, list: &List, presenter: &mut dyn Presenter) -> Result<()> {
    let frame = execution.open_region(&list.base, &list.region, &list.levels(), list.sorting.as_ref())?;
    let name = list.base.name.as_deref();
    if !region_has_rows(execution, &frame, name, list.region.no_rows.as_ref(), presenter)? {
        return Ok(());
    }
    if !presenter.container_start(name, ContainerKind::List) {
        return Ok(());
    }
    for entry in &frame.tree.entries {
        frame.enter(entry);
        if entry.level.is_some() {
            let row = frame.row(entry.start_row);
            execution.visit_row();
            presenter.entry_begin(EntryKind::Group, row.map(Row::index));
            present_items(execution, &list.items, row, presenter)?;
            presenter.entry_end(EntryKind::Group);
        } else {
            for row in frame.rows_of(entry) {
                execution.visit_row();
                presenter.entry_begin(EntryKind::Detail, Some(row.index()));
                present_items(execution, &list.items, Some(row), presenter)?;
                presenter.entry_end(EntryKind::Detail);
            }
        }
    }
    presenter.container_end(name, ContainerKind::List);
    Ok(())
}

fn present_table(execution: &Execution<'_>, table: &Table, presenter: &mut dyn Presenter) -> Result<()> {
    let sorting = table.combined_sorting();
    let frame = execution.open_region(&table.base, &table.region, &table.levels(), sorting.as_ref())?;
    let name = table.base.name.as_deref();
    if !region_has_rows(execution, &frame, name, table.region.no_rows.as_ref(), presenter)? {
        return Ok(());
    }
    if !presenter.container_start(name, ContainerKind::Table) {
        return Ok(());
    }
    let first = frame.row(0);
    if let Some(header) = &table.header {
        present_rows(execution, &header.rows, EntryKind::Header, first, presenter)?;
    }
    present_table_entries(execution, &frame, table, &frame.tree.entries, presenter)?;
    frame.reset();
    if let Some(footer) = &table.footer {
        present_rows(execution, &footer.rows, EntryKind::Footer, first, presenter)?;
    }
    presenter.container_end(name, ContainerKind::Table);
    Ok(())
}

fn present_table_entries(
    execution: &Execution<'_>,
    frame: &RegionFrame<'_, '_>,
    table: &Table,
    entries: &[GroupEntry],
    presenter: &mut dyn Presenter,
) -> Result<()> {
    let detail_rows = table.details.as_ref().map(|d| d.rows.as_slice()).unwrap_or_default();
    for entry in entries {
        frame.enter(entry);
        let first = frame.row(entry.start_row);
        match entry.level {
            Some(level) if level < table.groups.len() => {
                let group = &table.groups[level];
                if let Some(header) = &group.header {
                    present_rows(execution, &header.rows, EntryKind::GroupHeader(level), first, presenter)?;
                }
                if entry.nested.is_empty() {
                    for row in frame.rows_of(entry) {
                        execution.visit_row();
                        present_rows(execution, detail_rows, EntryKind::Detail, Some(row), presenter)?;
                    }
                } else {
                    present_table_entries(execution, frame, table, &entry.nested, presenter)?;
                    frame.enter(entry);
                }
                if let Some(footer) = &group.footer {
                    present_rows(execution, &footer.rows, EntryKind::GroupFooter(level), first, presenter)?;
                }
            }
            Some(_) => {
                // Grouped details collapse to the group's first row.
                execution.visit_row();
                present_rows(execution, detail_rows, EntryKind::Group, first, presenter)?;
            }
            None => {
                for row in frame.rows_of(entry) {
                    execution.visit_row();
                    present_rows(execution, detail_rows, EntryKind::Detail, Some(row), presenter)?;
                }
            }
        }
    }
    Ok(())
}

fn present_rows(
    execution: &Execution<'_>,
    rows: &[TableRow],
    kind: EntryKind,
    row: Option<&Row>,
    presenter: &mut dyn Presenter,
) -> Result<()> {
    for table_row in rows {
        presenter.entry_begin(kind, row.map(Row::index));
        for cell in &table_row.cells {
            present_items(execution, &cell.items, row, presenter)?;
        }
        presenter.entry_end(kind);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::{ParameterValues, ReportDefinition};
    use crate::execution::ExecutionSetup;
    use crate::expression::BuiltinEvaluator;
    use crate::font::{FontRegistry, FontSpec};
    use crate::present::{PresenterEvent, RecordingPresenter};
    use crate::rows::{Field, MemoryRowSource, RowSet};
    use crate::state::StateStore;
    use crate::types::Pt;
    use crate::value::TypeCode;

    fn sales(rows: &[(&str, &str, i64)]) -> MemoryRowSource {
        MemoryRowSource::new().with_data_set(
            "Sales",
            RowSet::new(
                vec![
                    Field::new("Region", TypeCode::String),
                    Field::new("City", TypeCode::String),
                    Field::new("Amount", TypeCode::Int64),
                ],
                rows.iter()
                    .map(|(region, city, amount)| vec![(*region).into(), (*city).into(), (*amount).into()])
                    .collect(),
            ),
        )
    }

    fn present(xml: &str, source: &MemoryRowSource, presenter: &mut RecordingPresenter) -> Result<()> {
        let def = ReportDefinition::parse(xml).unwrap();
        let store = StateStore::new();
        let fonts = FontRegistry::new();
        let result = {
            let execution = Execution::start(
                &def,
                ExecutionSetup {
                    store: &store,
                    source,
                    evaluator: &BuiltinEvaluator,
                    measure: &fonts,
                    default_font: FontSpec::new("Helvetica", Pt::from_i32(10)),
                    debug: None,
                    perf: None,
                },
                &ParameterValues::new(),
            )?;
            present_report(&execution, presenter)
        };
        assert!(store.is_empty());
        result
    }

    const DATA_SET: &str = r#"
        <DataSets><DataSet Name="Sales"><Fields>
          <Field Name="Region"/><Field Name="City"/><Field Name="Amount"/>
        </Fields></DataSet></DataSets>"#;

    fn report(body: &str) -> String {
        format!("<Report>{DATA_SET}<Body><ReportItems>{body}</ReportItems></Body></Report>")
    }

    #[test]
    fn ungrouped_list_brackets_each_row() {
        let xml = report(
            r#"<List Name="Rows"><ReportItems>
                 <Textbox Name="City"><Value>=Fields!City.Value</Value></Textbox>
               </ReportItems></List>"#,
        );
        let source = sales(&[("N", "Oslo", 1), ("S", "Rome", 2)]);
        let mut presenter = RecordingPresenter::new();
        present(&xml, &source, &mut presenter).unwrap();
        assert_eq!(presenter.texts(), vec!["Oslo", "Rome"]);
        assert_eq!(presenter.events[1], PresenterEvent::ContainerStart(Some("Rows".into()), ContainerKind::List));
        assert_eq!(presenter.events[2], PresenterEvent::EntryBegin(EntryKind::Detail, Some(0)));
        assert_eq!(presenter.events.last(), Some(&PresenterEvent::ReportEnd));
    }

    #[test]
    fn empty_region_emits_nothing_but_no_rows() {
        let silent = report(r#"<List Name="Rows"><ReportItems><Textbox><Value>x</Value></Textbox></ReportItems></List>"#);
        let source = sales(&[]);
        let mut presenter = RecordingPresenter::new();
        present(&silent, &source, &mut presenter).unwrap();
        assert_eq!(presenter.events.len(), 2);

        let with_message = report(r#"<List Name="Rows"><NoRows>Nothing sold</NoRows></List>"#);
        let mut presenter = RecordingPresenter::new();
        present(&with_message, &source, &mut presenter).unwrap();
        assert_eq!(
            presenter.events[1],
            PresenterEvent::NoRows(Some("Rows".into()), "Nothing sold".into())
        );
        assert_eq!(presenter.events.len(), 3);
    }

    #[test]
    fn vetoed_container_is_skipped() {
        let xml = report(
            r#"<List Name="Rows"><ReportItems><Textbox><Value>=Fields!City.Value</Value></Textbox></ReportItems></List>"#,
        );
        let source = sales(&[("N", "Oslo", 1)]);
        let mut presenter = RecordingPresenter::new().vetoing("Rows");
        present(&xml, &source, &mut presenter).unwrap();
        assert!(presenter.texts().is_empty());
        assert_eq!(presenter.events.len(), 2);
    }

    #[test]
    fn table_emits_headers_groups_and_footers() {
        let xml = report(
            r#"<Table Name="T">
                 <TableColumns><TableColumn><Width>2in</Width></TableColumn></TableColumns>
                 <Header><TableRows><TableRow><Height>12pt</Height><TableCells>
                   <TableCell><ReportItems><Textbox><Value>Region</Value></Textbox></ReportItems></TableCell>
                 </TableCells></TableRow></TableRows></Header>
                 <TableGroups><TableGroup>
                   <Grouping Name="ByRegion"><GroupExpressions><GroupExpression>=Fields!Region.Value</GroupExpression></GroupExpressions></Grouping>
                   <Header><TableRows><TableRow><Height>12pt</Height><TableCells>
                     <TableCell><ReportItems><Textbox><Value>=Fields!Region.Value</Value></Textbox></ReportItems></TableCell>
                   </TableCells></TableRow></TableRows></Header>
                   <Footer><TableRows><TableRow><Height>12pt</Height><TableCells>
                     <TableCell><ReportItems><Textbox><Value>=Sum(Fields!Amount.Value, "ByRegion")</Value></Textbox></ReportItems></TableCell>
                   </TableCells></TableRow></TableRows></Footer>
                 </TableGroup></TableGroups>
                 <Details><TableRows><TableRow><Height>12pt</Height><TableCells>
                   <TableCell><ReportItems><Textbox><Value>=Fields!City.Value</Value></Textbox></ReportItems></TableCell>
                 </TableCells></TableRow></TableRows></Details>
                 <Footer><TableRows><TableRow><Height>12pt</Height><TableCells>
                   <TableCell><ReportItems><Textbox><Value>=Sum(Fields!Amount.Value)</Value></Textbox></ReportItems></TableCell>
                 </TableCells></TableRow></TableRows></Footer>
               </Table>"#,
        );
        let source = sales(&[("N", "Oslo", 1), ("N", "Bergen", 2), ("S", "Rome", 4)]);
        let mut presenter = RecordingPresenter::new();
        present(&xml, &source, &mut presenter).unwrap();
        assert_eq!(
            presenter.texts(),
            vec!["Region", "N", "Oslo", "Bergen", "3", "S", "Rome", "4", "7"]
        );
        let kinds: Vec<EntryKind> = presenter
            .events
            .iter()
            .filter_map(|event| match event {
                PresenterEvent::EntryBegin(kind, _) => Some(*kind),
                _ => None,
            })
            .collect();
        assert_eq!(kinds[0], EntryKind::Header);
        assert_eq!(kinds[1], EntryKind::GroupHeader(0));
        assert_eq!(kinds[4], EntryKind::GroupFooter(0));
        assert_eq!(kinds.last(), Some(&EntryKind::Footer));
    }

    #[test]
    fn hide_duplicates_blanks_repeats_within_scope() {
        let xml = report(
            r#"<List Name="Rows"><ReportItems>
                 <Textbox Name="Region"><Value>=Fields!Region.Value</Value><HideDuplicates>Sales</HideDuplicates></Textbox>
               </ReportItems></List>"#,
        );
        let source = sales(&[("N", "a", 1), ("N", "b", 1), ("S", "c", 1), ("S", "d", 1)]);
        let mut presenter = RecordingPresenter::new();
        present(&xml, &source, &mut presenter).unwrap();
        assert_eq!(presenter.texts(), vec!["N", "", "S", ""]);
    }

    #[test]
    fn nested_list_sees_parent_group_rows() {
        let xml = report(
            r#"<List Name="Outer">
                 <Grouping Name="ByRegion"><GroupExpressions><GroupExpression>=Fields!Region.Value</GroupExpression></GroupExpressions></Grouping>
                 <ReportItems>
                   <Textbox Name="Head"><Value>=Fields!Region.Value</Value></Textbox>
                   <List Name="Inner"><ReportItems>
                     <Textbox Name="City"><Value>=Fields!City.Value</Value></Textbox>
                   </ReportItems></List>
                 </ReportItems>
               </List>"#,
        );
        let source = sales(&[("N", "Oslo", 1), ("N", "Bergen", 2), ("S", "Rome", 4)]);
        let mut presenter = RecordingPresenter::new();
        present(&xml, &source, &mut presenter).unwrap();
        assert_eq!(presenter.texts(), vec!["N", "Oslo", "Bergen", "S", "Rome"]);
    }

    #[test]
    fn evaluation_errors_name_the_node_and_row() {
        let xml = report(
            r#"<List Name="Rows"><ReportItems>
                 <Textbox Name="Bad"><Value>=Sum(Fields!City.Value, "Sales")</Value></Textbox>
               </ReportItems></List>"#,
        );
        let source = sales(&[("N", "Oslo", 1)]);
        let mut presenter = RecordingPresenter::new();
        let err = match present(&xml, &source, &mut presenter) {
            Ok(()) => panic!("expected an evaluation error"),
            Err(err) => err,
        };
        assert!(matches!(
            err,
            crate::error::ReportError::Evaluation { ref node, row: Some(0), .. } if node == "Bad"
        ));
    }
}
