use std::cmp::Ordering;

use crate::canvas::{Command, Page};
use crate::data_region::{List, Table, TableRow, TableSection, cell_item};
use crate::error::Result;
use crate::execution::{Execution, RegionFrame};
use crate::expression::Expression;
use crate::grouping::GroupEntry;
use crate::metrics::PageMetrics;
use crate::pages::{PagedReport, Pages};
use crate::perf::PerfSpan;
use crate::report_items::{Chart, ItemBase, ReportItem, ReportItems, Side, Style, Textbox};
use crate::rows::Row;
use crate::textflow::{TextAlign, TextFlow, draw_flow};
use crate::types::{Color, Pt, Rect};

/// Paged traversal: lays the body out on fixed-size pages, then draws the
/// page header and footer once the page count is known.
///
/// Body items see the page count reached so far as `TotalPages`; only the
/// page bands see the final count.
pub(crate) fn paginate_report(execution: &Execution<'_>) -> Result<PagedReport> {
    let def = execution.def;
    let handle = Some(execution.handle.get());
    let mut pages = Pages::new(def.body_top(), def.body_bottom());
    {
        let _span = PerfSpan::start(execution.perf(), "paginate.body", handle);
        layout_items(
            execution,
            &mut pages,
            &def.body.items,
            None,
            def.margins.left,
            def.body_top(),
        )?;
    }

    let (mut pages, discarded) = pages.finish();
    let total = pages.len();
    let _span = PerfSpan::start(execution.perf(), "paginate.bands", handle);
    for page in &mut pages {
        let number = page.number();
        execution.set_page(number, total);
        if let Some(header) = def.page_header.as_ref().filter(|h| h.prints_on(number, total)) {
            draw_static(execution, page, &header.items, def.margins.left, def.margins.top)?;
        }
        if let Some(footer) = def.page_footer.as_ref().filter(|f| f.prints_on(number, total)) {
            draw_static(execution, page, &footer.items, def.margins.left, def.body_bottom())?;
        }
    }

    let mut metrics = execution.take_metrics();
    metrics.discarded_pages = discarded;
    metrics.pages = pages.iter().map(page_metrics).collect();
    Ok(PagedReport { pages, metrics })
}

fn page_metrics(page: &Page) -> PageMetrics {
    PageMetrics {
        page_number: page.number(),
        command_count: page.commands().len(),
        text_runs: page
            .commands()
            .iter()
            .filter(|command| matches!(command, Command::DrawString { .. }))
            .count(),
    }
}

/// Lays out the items of one container whose top edge sits at `y`.
///
/// Items keep their distance to the item above; once a data region has grown,
/// the items below it are placed relative to where it ended. On return the
/// page offset is the container's bottom on the current page.
fn layout_items(
    execution: &Execution<'_>,
    pages: &mut Pages,
    items: &ReportItems,
    row: Option<&Row>,
    x: Pt,
    y: Pt,
) -> Result<()> {
    let mut order: Vec<&ReportItem> = items.iter().collect();
    order.sort_by(|a, b| {
        a.base()
            .top
            .partial_cmp(&b.base().top)
            .unwrap_or(Ordering::Equal)
            .then(a.is_data_region().cmp(&b.is_data_region()))
    });

    let mut anchor = y;
    let mut anchor_top = Pt::ZERO;
    let mut page = pages.index();
    let mut end = y;
    for item in order {
        let base = item.base();
        if execution.is_hidden(base, row)? {
            continue;
        }
        execution.set_page(pages.index() + 1, pages.len());
        let mut top = anchor + (base.top - anchor_top);
        let height = match item {
            ReportItem::Textbox(textbox) => execution.textbox_height(textbox, row, base.width)?,
            _ => base.height,
        };

        if !item.is_data_region() {
            pages.set_offset(top);
            let from = pages.index() + 1;
            if let Some(reason) = pages.make_room(height, "item_overflow") {
                execution.log_page_break(reason, from, base.display_name());
                top = pages.offset();
                anchor = top;
                anchor_top = base.top;
                page = pages.index();
                end = top;
            }
            pages.mark_used();
        }

        match item {
            ReportItem::Textbox(textbox) => {
                let rect = Rect::new(x + base.left, top, base.width, height);
                draw_textbox(execution, pages.current_mut(), textbox, row, rect)?;
                end = end.max(top + height);
            }
            ReportItem::Chart(chart) => {
                let rect = Rect::new(x + base.left, top, base.width, height);
                draw_chart(execution, pages.current_mut(), chart, row, rect)?;
                end = end.max(top + height);
            }
            ReportItem::Rectangle(rectangle) => {
                layout_items(execution, pages, &rectangle.items, row, x + base.left, top)?;
                if pages.index() != page {
                    page = pages.index();
                    end = pages.offset();
                    anchor = end;
                    anchor_top = base.top + base.height;
                } else {
                    end = end.max(top + height).max(pages.offset());
                }
            }
            ReportItem::List(list) => {
                pages.set_offset(top);
                layout_list(execution, pages, list, x + base.left)?;
                (page, end) = settle_region(pages, page, end);
                anchor = pages.offset();
                anchor_top = base.top + base.height;
            }
            ReportItem::Table(table) => {
                pages.set_offset(top);
                layout_table(execution, pages, table, x + base.left)?;
                (page, end) = settle_region(pages, page, end);
                anchor = pages.offset();
                anchor_top = base.top + base.height;
            }
        }
    }
    pages.set_offset(end);
    Ok(())
}

/// Page and lowest offset reached once a data region is done.
fn settle_region(pages: &Pages, page: usize, end: Pt) -> (usize, Pt) {
    if pages.index() != page {
        (pages.index(), pages.offset())
    } else {
        (page, end.max(pages.offset()))
    }
}

/// Draws page header or footer items at a fixed origin. Data regions are not
/// laid out in page bands.
fn draw_static(
    execution: &Execution<'_>,
    page: &mut Page,
    items: &ReportItems,
    x: Pt,
    y: Pt,
) -> Result<()> {
    for item in items.iter() {
        let base = item.base();
        if execution.is_hidden(base, None)? {
            continue;
        }
        let rect = Rect::new(x + base.left, y + base.top, base.width, base.height);
        match item {
            ReportItem::Textbox(textbox) => draw_textbox(execution, page, textbox, None, rect)?,
            ReportItem::Chart(chart) => draw_chart(execution, page, chart, None, rect)?,
            ReportItem::Rectangle(rectangle) => {
                draw_static(execution, page, &rectangle.items, rect.x, rect.y)?
            }
            ReportItem::List(_) | ReportItem::Table(_) => {
                log::warn!("data region {} ignored in page band", base.display_name());
            }
        }
    }
    Ok(())
}

fn draw_textbox(
    execution: &Execution<'_>,
    page: &mut Page,
    textbox: &Textbox,
    row: Option<&Row>,
    rect: Rect,
) -> Result<()> {
    let base = &textbox.base;
    let text = execution.textbox_text(textbox, row, true)?;
    if let Some(link) = execution.link(textbox, row)? {
        page.meta("link", link);
    }
    draw_text(execution, page, &text, &base.style, rect, base.display_name(), row)
}

fn draw_text(
    execution: &Execution<'_>,
    page: &mut Page,
    text: &str,
    style: &Style,
    rect: Rect,
    node: &str,
    row: Option<&Row>,
) -> Result<()> {
    if text.is_empty() {
        return Ok(());
    }
    let inner = inset(execution, style, rect, node, row)?;
    let font = execution.font_for(style);
    page.set_fill_color(style.color.unwrap_or(Color::BLACK));
    let layout = TextFlow::new(execution.measure, font.clone())
        .align(style.text_align.unwrap_or(TextAlign::Left))
        .layout(text, inner);
    if layout.truncated {
        log::debug!("{node}: text cut after {} lines", layout.lines);
    }
    draw_flow(page, &layout, execution.measure, &font);
    Ok(())
}

fn draw_chart(
    execution: &Execution<'_>,
    page: &mut Page,
    chart: &Chart,
    row: Option<&Row>,
    rect: Rect,
) -> Result<()> {
    page.set_stroke_color(chart.base.style.color.unwrap_or(Color::BLACK));
    page.stroke_rect(rect);
    if let Some(plot_area) = &chart.plot_area {
        let plot = inset(execution, &plot_area.style, rect, chart.base.display_name(), row)?;
        page.stroke_rect(plot);
    }
    Ok(())
}

/// `rect` shrunk by the style's padding.
fn inset(
    execution: &Execution<'_>,
    style: &Style,
    rect: Rect,
    node: &str,
    row: Option<&Row>,
) -> Result<Rect> {
    let left = execution.style_padding(style, Side::Left, row, node)?;
    let right = execution.style_padding(style, Side::Right, row, node)?;
    let top = execution.style_padding(style, Side::Top, row, node)?;
    let bottom = execution.style_padding(style, Side::Bottom, row, node)?;
    Ok(Rect::new(
        rect.x + left,
        rect.y + top,
        (rect.width - left - right).max(Pt::ZERO),
        (rect.height - top - bottom).max(Pt::ZERO),
    ))
}

/// Draws the region's `NoRows` message, if it has one.
fn layout_no_rows(
    execution: &Execution<'_>,
    pages: &mut Pages,
    base: &ItemBase,
    no_rows: Option<&Expression>,
    x: Pt,
) -> Result<()> {
    let Some(message) = no_rows else {
        return Ok(());
    };
    let name = base.display_name();
    let text = execution.evaluate(message, None, name)?.to_string();
    let font = execution.font_for(&base.style);
    let height = base.height.max(execution.measure.line_height(&font));
    let from = pages.index() + 1;
    if let Some(reason) = pages.make_room(height, "item_overflow") {
        execution.log_page_break(reason, from, name);
    }
    pages.mark_used();
    let rect = Rect::new(x, pages.offset(), base.width, height);
    draw_text(execution, pages.current_mut(), &text, &base.style, rect, name, None)?;
    pages.set_offset(rect.bottom());
    Ok(())
}

fn layout_list(execution: &Execution<'_>, pages: &mut Pages, list: &List, x: Pt) -> Result<()> {
    let frame = execution.open_region(&list.base, &list.region, &list.levels(), list.sorting.as_ref())?;
    if frame.is_empty() {
        return layout_no_rows(execution, pages, &list.base, list.region.no_rows.as_ref(), x);
    }
    if list.region.page_break_at_start {
        pages.request_break("region_break_at_start");
    }
    let padding_bottom = execution.padding(&list.base, Side::Bottom, None)?;
    let grouping = list.grouping.as_ref();
    for entry in &frame.tree.entries {
        frame.enter(entry);
        if grouping.is_some_and(|g| g.page_break_at_start) {
            pages.request_break("page_break_at_start");
        }
        if entry.level.is_some() {
            if let Some(row) = frame.row(entry.start_row) {
                layout_list_row(execution, pages, &frame, list, row, x, padding_bottom)?;
            }
        } else {
            for row in frame.rows_of(entry) {
                layout_list_row(execution, pages, &frame, list, row, x, padding_bottom)?;
            }
        }
        if grouping.is_some_and(|g| g.page_break_at_end) {
            pages.request_break("page_break_at_end");
        }
    }
    if list.region.page_break_at_end {
        pages.request_break("region_break_at_end");
    }
    Ok(())
}

fn layout_list_row(
    execution: &Execution<'_>,
    pages: &mut Pages,
    frame: &RegionFrame<'_, '_>,
    list: &List,
    row: &Row,
    x: Pt,
    padding_bottom: Pt,
) -> Result<()> {
    execution.visit_row();
    let height = execution.list_row_height(&list.items.items, &list.grow_list, list.base.height, Some(row))?;
    frame.set_calc_height(height);
    let from = pages.index() + 1;
    if let Some(reason) = pages.make_room(height, "row_overflow") {
        execution.log_page_break(reason, from, list.base.display_name());
    }
    pages.mark_used();
    let row_y = pages.offset();
    let page = pages.index();
    layout_items(execution, pages, &list.items, Some(row), x, row_y)?;
    let offset = if pages.index() != page {
        pages.offset() + padding_bottom
    } else {
        let height = frame.calc_height().unwrap_or(height);
        (row_y + height).max(pages.offset())
    };
    pages.set_offset(offset);
    Ok(())
}

struct TableLayout<'t> {
    table: &'t Table,
    name: &'t str,
    x: Pt,
    first: Option<&'t Row>,
    repeat_header: Option<&'t TableSection>,
}

fn layout_table(execution: &Execution<'_>, pages: &mut Pages, table: &Table, x: Pt) -> Result<()> {
    let sorting = table.combined_sorting();
    let frame = execution.open_region(&table.base, &table.region, &table.levels(), sorting.as_ref())?;
    if frame.is_empty() {
        return layout_no_rows(execution, pages, &table.base, table.region.no_rows.as_ref(), x);
    }
    if table.region.page_break_at_start {
        pages.request_break("region_break_at_start");
    }
    let layout = TableLayout {
        table,
        name: table.base.display_name(),
        x,
        first: frame.row(0),
        repeat_header: table.header.as_ref().filter(|header| header.repeat_on_new_page),
    };
    if let Some(header) = &table.header {
        layout_table_rows(execution, pages, &layout, &header.rows, layout.first, false)?;
    }
    layout_table_entries(execution, pages, &frame, &layout, &frame.tree.entries)?;
    frame.reset();
    if let Some(footer) = &table.footer {
        layout_table_rows(execution, pages, &layout, &footer.rows, layout.first, true)?;
    }
    if table.region.page_break_at_end {
        pages.request_break("region_break_at_end");
    }
    Ok(())
}

fn layout_table_entries(
    execution: &Execution<'_>,
    pages: &mut Pages,
    frame: &RegionFrame<'_, '_>,
    layout: &TableLayout<'_>,
    entries: &[GroupEntry],
) -> Result<()> {
    let table = layout.table;
    let details = table.details.as_ref();
    let detail_rows = details.map(|d| d.rows.as_slice()).unwrap_or_default();
    for entry in entries {
        frame.enter(entry);
        let first = frame.row(entry.start_row);
        match entry.level {
            Some(level) if level < table.groups.len() => {
                let group = &table.groups[level];
                if group.grouping.page_break_at_start {
                    pages.request_break("page_break_at_start");
                }
                if let Some(header) = &group.header {
                    layout_table_rows(execution, pages, layout, &header.rows, first, true)?;
                }
                if entry.nested.is_empty() {
                    for row in frame.rows_of(entry) {
                        execution.visit_row();
                        layout_table_rows(execution, pages, layout, detail_rows, Some(row), true)?;
                    }
                } else {
                    layout_table_entries(execution, pages, frame, layout, &entry.nested)?;
                    frame.enter(entry);
                }
                if let Some(footer) = &group.footer {
                    layout_table_rows(execution, pages, layout, &footer.rows, first, true)?;
                }
                if group.grouping.page_break_at_end {
                    pages.request_break("page_break_at_end");
                }
            }
            Some(_) => {
                let grouping = details.and_then(|d| d.grouping.as_ref());
                if grouping.is_some_and(|g| g.page_break_at_start) {
                    pages.request_break("page_break_at_start");
                }
                execution.visit_row();
                layout_table_rows(execution, pages, layout, detail_rows, first, true)?;
                if grouping.is_some_and(|g| g.page_break_at_end) {
                    pages.request_break("page_break_at_end");
                }
            }
            None => {
                for row in frame.rows_of(entry) {
                    execution.visit_row();
                    layout_table_rows(execution, pages, layout, detail_rows, Some(row), true)?;
                }
            }
        }
    }
    Ok(())
}

/// Lays out `rows`; with `repeat` set, a page break first redraws the header
/// rows marked `RepeatOnNewPage`.
fn layout_table_rows(
    execution: &Execution<'_>,
    pages: &mut Pages,
    layout: &TableLayout<'_>,
    rows: &[TableRow],
    row: Option<&Row>,
    repeat: bool,
) -> Result<()> {
    for table_row in rows {
        let height = table_row_height(execution, layout.table, table_row, row)?;
        let from = pages.index() + 1;
        if let Some(reason) = pages.make_room(height, "row_overflow") {
            execution.log_page_break(reason, from, layout.name);
            if let Some(header) = layout.repeat_header.filter(|_| repeat) {
                layout_table_rows(execution, pages, layout, &header.rows, layout.first, false)?;
            }
        }
        layout_table_row(execution, pages, layout, table_row, row, height)?;
    }
    Ok(())
}

/// Row height stretched by the CanGrow textboxes of its cells.
fn table_row_height(
    execution: &Execution<'_>,
    table: &Table,
    table_row: &TableRow,
    row: Option<&Row>,
) -> Result<Pt> {
    let mut height = table_row.height;
    for &(cell_index, item_index) in &table_row.grow_cells {
        let Some(cell) = table_row.cells.get(cell_index) else {
            continue;
        };
        let Some(ReportItem::Textbox(textbox)) = cell.items.items.get(item_index) else {
            continue;
        };
        if execution.is_hidden(&textbox.base, row)? {
            continue;
        }
        let column: usize = table_row.cells[..cell_index].iter().map(|c| c.col_span).sum();
        let (_, width) = table.cell_bounds(column, cell.col_span);
        height = height.max(execution.textbox_height(textbox, row, width)?);
    }
    Ok(height)
}

/// Every cell starts at the row's origin; the cursor ends on the furthest
/// page any cell reached.
fn layout_table_row(
    execution: &Execution<'_>,
    pages: &mut Pages,
    layout: &TableLayout<'_>,
    table_row: &TableRow,
    row: Option<&Row>,
    height: Pt,
) -> Result<()> {
    pages.mark_used();
    let row_y = pages.offset();
    let start = pages.index();
    let mut furthest = (start, row_y + height);
    let mut column = 0;
    for cell in &table_row.cells {
        let (left, width) = layout.table.cell_bounds(column, cell.col_span);
        column += cell.col_span;
        let Some(item) = cell_item(cell) else {
            continue;
        };
        pages.set_index(start);
        execution.set_page(start + 1, pages.len());
        let rect = Rect::new(layout.x + left, row_y, width, height);
        match item {
            ReportItem::Textbox(textbox) => {
                if !execution.is_hidden(&textbox.base, row)? {
                    draw_textbox(execution, pages.current_mut(), textbox, row, rect)?;
                }
            }
            ReportItem::Chart(chart) => {
                if !execution.is_hidden(&chart.base, row)? {
                    draw_chart(execution, pages.current_mut(), chart, row, rect)?;
                }
            }
            _ => {
                layout_items(execution, pages, &cell.items, row, rect.x, row_y)?;
                let reached = (pages.index(), pages.offset());
                if reached.0 > furthest.0 {
                    furthest = reached;
                } else if reached.0 == furthest.0 {
                    furthest.1 = furthest.1.max(reached.1);
                }
            }
        }
    }
    pages.set_index(furthest.0);
    pages.set_offset(furthest.1);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::{ParameterValues, ReportDefinition};
    use crate::execution::ExecutionSetup;
    use crate::expression::BuiltinEvaluator;
    use crate::font::{FontRegistry, FontSpec};
    use crate::rows::{Field, MemoryRowSource, RowSet};
    use crate::state::StateStore;
    use crate::value::TypeCode;

    fn people(count: usize) -> MemoryRowSource {
        MemoryRowSource::new().with_data_set(
            "People",
            RowSet::new(
                vec![
                    Field::new("Team", TypeCode::String),
                    Field::new("Name", TypeCode::String),
                ],
                (0..count)
                    .map(|i| vec![if i < count / 2 { "A" } else { "B" }.into(), format!("P{i}").into()])
                    .collect(),
            ),
        )
    }

    // 200pt tall pages, 10pt margins: body runs from 10 to 190.
    fn report(header_footer: &str, body: &str) -> String {
        format!(
            r#"<Report>
                 <PageHeight>200pt</PageHeight><PageWidth>300pt</PageWidth>
                 <TopMargin>10pt</TopMargin><BottomMargin>10pt</BottomMargin>
                 <LeftMargin>10pt</LeftMargin><RightMargin>10pt</RightMargin>
                 <DataSets><DataSet Name="People"><Fields>
                   <Field Name="Team"/><Field Name="Name"/>
                 </Fields></DataSet></DataSets>
                 {header_footer}
                 <Body><ReportItems>{body}</ReportItems></Body>
               </Report>"#
        )
    }

    fn paginate(xml: &str, source: &MemoryRowSource) -> PagedReport {
        let def = ReportDefinition::parse(xml).unwrap();
        let store = StateStore::new();
        let fonts = FontRegistry::new();
        let report = {
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
            )
            .unwrap();
            paginate_report(&execution).unwrap()
        };
        assert!(store.is_empty());
        report
    }

    const ROW_LIST: &str = r#"
        <List Name="Rows"><Height>20pt</Height><Width>200pt</Width><ReportItems>
          <Textbox Name="Name"><Height>20pt</Height><Width>200pt</Width><Value>=Fields!Name.Value</Value></Textbox>
        </ReportItems></List>"#;

    #[test]
    fn list_rows_flow_onto_new_pages() {
        let report = paginate(&report("", ROW_LIST), &people(20));
        // 180pt of body holds nine 20pt rows.
        assert_eq!(report.page_count(), 3);
        assert_eq!(report.pages[0].text(), "P0 P1 P2 P3 P4 P5 P6 P7 P8");
        assert_eq!(report.pages[2].text(), "P18 P19");
        assert_eq!(report.metrics.page_breaks, 2);
        assert_eq!(report.metrics.rows_visited, 20);
        assert!(report.pages.iter().all(|page| !page.is_empty()));
        assert_eq!(
            report.metrics.pages.iter().map(|m| m.page_number).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );
    }

    #[test]
    fn group_break_at_end_starts_a_page_per_group() {
        let body = r#"
            <List Name="Teams"><Height>20pt</Height>
              <Grouping Name="ByTeam">
                <GroupExpressions><GroupExpression>=Fields!Team.Value</GroupExpression></GroupExpressions>
                <PageBreakAtEnd>true</PageBreakAtEnd>
              </Grouping>
              <ReportItems>
                <Textbox><Height>20pt</Height><Width>100pt</Width><Value>=Fields!Team.Value</Value></Textbox>
              </ReportItems>
            </List>"#;
        let report = paginate(&report("", body), &people(4));
        assert_eq!(report.page_count(), 2);
        assert_eq!(report.pages[0].text(), "A");
        assert_eq!(report.pages[1].text(), "B");
    }

    #[test]
    fn page_bands_see_the_final_page_count() {
        let bands = r#"
            <PageHeader><Height>20pt</Height><PrintOnFirstPage>false</PrintOnFirstPage><ReportItems>
              <Textbox><Height>20pt</Height><Width>100pt</Width><Value>Continued</Value></Textbox>
            </ReportItems></PageHeader>
            <PageFooter><Height>20pt</Height><ReportItems>
              <Textbox><Height>20pt</Height><Width>200pt</Width>
                <Value>=Globals!PageNumber &amp; " of " &amp; Globals!TotalPages</Value>
              </Textbox>
            </ReportItems></PageFooter>"#;
        let report = paginate(&report(bands, ROW_LIST), &people(10));
        // Body now runs from 30 to 170: seven rows per page.
        assert_eq!(report.page_count(), 2);
        assert!(report.pages[0].text().ends_with("1 of 2"));
        assert!(!report.pages[0].text().contains("Continued"));
        assert!(report.pages[1].text().starts_with("P7"));
        assert!(report.pages[1].text().contains("Continued"));
        assert!(report.pages[1].text().ends_with("2 of 2"));
    }

    #[test]
    fn empty_region_draws_no_rows_message_only() {
        let body = r#"
            <List Name="Rows"><Height>20pt</Height><Width>200pt</Width>
              <NoRows>Nobody here</NoRows>
              <ReportItems><Textbox><Height>20pt</Height><Value>=Fields!Name.Value</Value></Textbox></ReportItems>
            </List>"#;
        let with_message = paginate(&report("", body), &people(0));
        assert_eq!(with_message.page_count(), 1);
        assert_eq!(with_message.pages[0].text(), "Nobody here");

        let silent = paginate(&report("", ROW_LIST), &people(0));
        assert_eq!(silent.page_count(), 0);
    }

    #[test]
    fn table_repeats_header_on_each_page() {
        let body = r#"
            <Table Name="Roster">
              <TableColumns><TableColumn><Width>100pt</Width></TableColumn><TableColumn><Width>100pt</Width></TableColumn></TableColumns>
              <Header>
                <RepeatOnNewPage>true</RepeatOnNewPage>
                <TableRows><TableRow><Height>20pt</Height><TableCells>
                  <TableCell><ReportItems><Textbox><Value>Team</Value></Textbox></ReportItems></TableCell>
                  <TableCell><ReportItems><Textbox><Value>Name</Value></Textbox></ReportItems></TableCell>
                </TableCells></TableRow></TableRows>
              </Header>
              <Details><TableRows><TableRow><Height>20pt</Height><TableCells>
                <TableCell><ReportItems><Textbox><Value>=Fields!Team.Value</Value></Textbox></ReportItems></TableCell>
                <TableCell><ReportItems><Textbox><Value>=Fields!Name.Value</Value></Textbox></ReportItems></TableCell>
              </TableCells></TableRow></TableRows></Details>
            </Table>"#;
        let report = paginate(&report("", body), &people(10));
        // Header plus eight detail rows fill a page.
        assert_eq!(report.page_count(), 2);
        assert!(report.pages[0].text().starts_with("Team Name A P0"));
        assert_eq!(report.pages[1].text(), "Team Name B P8 B P9");
        let second_row_y = report.pages[1].commands().iter().find_map(|command| match command {
            Command::DrawString { text, y, .. } if text == "P8" => Some(*y),
            _ => None,
        });
        // 10pt top margin, 20pt header row, then the 10pt baseline.
        assert_eq!(second_row_y, Some(Pt::from_i32(40)));
    }

    fn bottom_text_y(page: &Page) -> Option<Pt> {
        page.commands()
            .iter()
            .filter_map(|command| match command {
                Command::DrawString { y, .. } => Some(*y),
                _ => None,
            })
            .reduce(Pt::max)
    }

    #[test]
    fn blank_rows_still_fill_pages() {
        let source = MemoryRowSource::new().with_data_set(
            "People",
            RowSet::new(
                vec![
                    Field::new("Team", TypeCode::String),
                    Field::new("Name", TypeCode::String),
                ],
                (0..20)
                    .map(|i| {
                        let name = if i < 12 { String::new() } else { format!("P{i}") };
                        vec!["A".into(), name.into()]
                    })
                    .collect(),
            ),
        );
        let report = paginate(&report("", ROW_LIST), &source);
        assert_eq!(report.page_count(), 3);
        assert_eq!(report.pages[0].text(), "");
        assert_eq!(report.pages[1].text(), "P12 P13 P14 P15 P16 P17");
        assert_eq!(report.pages[2].text(), "P18 P19");
        assert_eq!(report.metrics.page_breaks, 2);
        for page in &report.pages {
            assert!(bottom_text_y(page).is_none_or(|y| y <= Pt::from_i32(190)));
        }
    }

    #[test]
    fn textbox_shorter_than_a_line_still_draws() {
        let body = r#"
            <List Name="Rows"><Height>11pt</Height><Width>200pt</Width><ReportItems>
              <Textbox Name="Name"><Height>11pt</Height><Width>200pt</Width><Value>=Fields!Name.Value</Value></Textbox>
            </ReportItems></List>
            <Textbox Name="Caption"><Top>40pt</Top><Width>200pt</Width><Value>Roster</Value></Textbox>"#;
        let report = paginate(&report("", body), &people(3));
        assert_eq!(report.page_count(), 1);
        assert_eq!(report.pages[0].text(), "P0 P1 P2 Roster");
    }
}
