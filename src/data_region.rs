use roxmltree::Node;

use crate::definition::{BuildContext, Resolve, ResolveScope, elements, parse_bool, text_of};
use crate::expression::Expression;
use crate::group_spec::{Filters, Grouping, SortBy, Sorting};
use crate::report_items::{ItemBase, ReportItem, ReportItems};
use crate::state::NodeId;
use crate::types::Pt;
use crate::value::TypeCode;

/// Settings every data region shares.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DataRegionBase {
    pub data_set_name: Option<String>,
    pub no_rows: Option<Expression>,
    pub filters: Filters,
    pub page_break_at_start: bool,
    pub page_break_at_end: bool,
}

impl DataRegionBase {
    fn accept(&mut self, ctx: &mut BuildContext, child: Node<'_, '_>) -> bool {
        match child.tag_name().name() {
            "DataSetName" => self.data_set_name = Some(text_of(child)),
            "NoRows" => self.no_rows = Some(ctx.expression(child, TypeCode::String)),
            "Filters" => self.filters = Filters::build(ctx, child),
            "PageBreakAtStart" => self.page_break_at_start = parse_bool(child),
            "PageBreakAtEnd" => self.page_break_at_end = parse_bool(child),
            "KeepTogether" => {}
            _ => return false,
        }
        true
    }

    fn resolve(&mut self, scope: &mut ResolveScope) {
        self.filters.resolve(scope);
        if let Some(no_rows) = &mut self.no_rows {
            no_rows.resolve(scope);
        }
    }
}

/// A free-form data region repeating its items once per row or group.
#[derive(Debug, Clone, PartialEq)]
pub struct List {
    pub base: ItemBase,
    pub region: DataRegionBase,
    pub grouping: Option<Grouping>,
    pub sorting: Option<Sorting>,
    pub items: ReportItems,
    pub data_instance_name: Option<String>,
    pub data_instance_element_output: Option<String>,
    /// Indices into `items` of the textboxes that can grow.
    pub grow_list: Vec<usize>,
}

impl List {
    pub(crate) fn build(ctx: &mut BuildContext, node: Node<'_, '_>) -> Self {
        let mut list = List {
            base: ItemBase::new(ctx, node),
            region: DataRegionBase::default(),
            grouping: None,
            sorting: None,
            items: ReportItems::default(),
            data_instance_name: None,
            data_instance_element_output: None,
            grow_list: Vec::new(),
        };
        for child in elements(node) {
            if list.base.accept(ctx, child) || list.region.accept(ctx, child) {
                continue;
            }
            match child.tag_name().name() {
                "Grouping" => list.grouping = Some(Grouping::build(ctx, child)),
                "Sorting" => list.sorting = Some(Sorting::build(ctx, child)),
                "ReportItems" => list.items = ReportItems::build(ctx, child),
                "DataInstanceName" => list.data_instance_name = Some(text_of(child)),
                "DataInstanceElementOutput" => {
                    list.data_instance_element_output = Some(text_of(child))
                }
                "FillPage" => {}
                other => ctx.log.unknown_element("List", other),
            }
        }
        list
    }

    /// Grouping levels, outer first.
    pub fn levels(&self) -> Vec<&Grouping> {
        self.grouping.iter().collect()
    }
}

impl Resolve for List {
    fn resolve(&mut self, scope: &mut ResolveScope) {
        self.base.resolve(scope);
        scope.enter_region(self.region.data_set_name.as_deref(), self.base.display_name());
        self.region.resolve(scope);
        if let Some(grouping) = &mut self.grouping {
            grouping.level = 0;
            grouping.resolve(scope);
        }
        if let Some(sorting) = &mut self.sorting {
            sorting.resolve(scope);
        }
        self.items.resolve(scope);
        self.grow_list = self.items.grow_list();
        scope.leave_region();
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TableCell {
    pub items: ReportItems,
    pub col_span: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TableRow {
    pub id: NodeId,
    pub height: Pt,
    pub cells: Vec<TableCell>,
    /// `(cell, item)` pairs of the textboxes that can grow.
    pub grow_cells: Vec<(usize, usize)>,
}

impl TableRow {
    fn build(ctx: &mut BuildContext, node: Node<'_, '_>) -> Self {
        let mut row = TableRow {
            id: ctx.node_id(),
            height: Pt::ZERO,
            cells: Vec::new(),
            grow_cells: Vec::new(),
        };
        for child in elements(node) {
            match child.tag_name().name() {
                "Height" => row.height = ctx.size(child),
                "TableCells" => {
                    for cell in elements(child) {
                        if cell.tag_name().name() != "TableCell" {
                            ctx.log.unknown_element("TableCells", cell.tag_name().name());
                            continue;
                        }
                        row.cells.push(TableCell::build(ctx, cell));
                    }
                }
                "Visibility" => {}
                other => ctx.log.unknown_element("TableRow", other),
            }
        }
        row
    }
}

impl TableCell {
    fn build(ctx: &mut BuildContext, node: Node<'_, '_>) -> Self {
        let mut cell = TableCell {
            items: ReportItems::default(),
            col_span: 1,
        };
        for child in elements(node) {
            match child.tag_name().name() {
                "ReportItems" => cell.items = ReportItems::build(ctx, child),
                "ColSpan" => cell.col_span = text_of(child).parse().unwrap_or(1).max(1),
                other => ctx.log.unknown_element("TableCell", other),
            }
        }
        if cell.items.items.len() > 1 {
            ctx.log.warn("TableCell holds more than one report item.");
        }
        cell
    }
}

impl Resolve for TableRow {
    fn resolve(&mut self, scope: &mut ResolveScope) {
        self.grow_cells.clear();
        for (cell_index, cell) in self.cells.iter_mut().enumerate() {
            cell.items.resolve(scope);
            self.grow_cells
                .extend(cell.items.grow_list().into_iter().map(|item| (cell_index, item)));
        }
    }
}

fn build_rows(ctx: &mut BuildContext, node: Node<'_, '_>) -> Vec<TableRow> {
    let mut rows = Vec::new();
    for row in elements(node) {
        if row.tag_name().name() == "TableRow" {
            rows.push(TableRow::build(ctx, row));
        } else {
            ctx.log.unknown_element("TableRows", row.tag_name().name());
        }
    }
    rows
}

/// Table header or footer band.
#[derive(Debug, Clone, PartialEq)]
pub struct TableSection {
    pub rows: Vec<TableRow>,
    pub repeat_on_new_page: bool,
}

impl TableSection {
    fn build(ctx: &mut BuildContext, node: Node<'_, '_>) -> Self {
        let element = node.tag_name().name().to_string();
        let mut section = TableSection {
            rows: Vec::new(),
            repeat_on_new_page: false,
        };
        for child in elements(node) {
            match child.tag_name().name() {
                "TableRows" => section.rows = build_rows(ctx, child),
                "RepeatOnNewPage" => section.repeat_on_new_page = parse_bool(child),
                other => ctx.log.unknown_element(&element, other),
            }
        }
        section
    }

    fn resolve(&mut self, scope: &mut ResolveScope) {
        for row in &mut self.rows {
            row.resolve(scope);
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TableGroup {
    pub grouping: Grouping,
    pub sorting: Option<Sorting>,
    pub header: Option<TableSection>,
    pub footer: Option<TableSection>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Details {
    pub rows: Vec<TableRow>,
    pub grouping: Option<Grouping>,
    pub sorting: Option<Sorting>,
}

/// A data region laid out in fixed columns.
#[derive(Debug, Clone, PartialEq)]
pub struct Table {
    pub base: ItemBase,
    pub region: DataRegionBase,
    pub columns: Vec<Pt>,
    pub header: Option<TableSection>,
    pub groups: Vec<TableGroup>,
    pub details: Option<Details>,
    pub footer: Option<TableSection>,
}

impl Table {
    pub(crate) fn build(ctx: &mut BuildContext, node: Node<'_, '_>) -> Self {
        let mut table = Table {
            base: ItemBase::new(ctx, node),
            region: DataRegionBase::default(),
            columns: Vec::new(),
            header: None,
            groups: Vec::new(),
            details: None,
            footer: None,
        };
        for child in elements(node) {
            if table.base.accept(ctx, child) || table.region.accept(ctx, child) {
                continue;
            }
            match child.tag_name().name() {
                "TableColumns" => {
                    for column in elements(child) {
                        if column.tag_name().name() != "TableColumn" {
                            ctx.log.unknown_element("TableColumns", column.tag_name().name());
                            continue;
                        }
                        let width = elements(column)
                            .find(|part| part.tag_name().name() == "Width")
                            .map(|width| ctx.size(width))
                            .unwrap_or(Pt::ZERO);
                        table.columns.push(width);
                    }
                }
                "Header" => table.header = Some(TableSection::build(ctx, child)),
                "Footer" => table.footer = Some(TableSection::build(ctx, child)),
                "TableGroups" => {
                    for group in elements(child) {
                        if group.tag_name().name() == "TableGroup" {
                            if let Some(group) = Table::build_group(ctx, group) {
                                table.groups.push(group);
                            }
                        } else {
                            ctx.log.unknown_element("TableGroups", group.tag_name().name());
                        }
                    }
                }
                "Details" => {
                    let mut details = Details::default();
                    for part in elements(child) {
                        match part.tag_name().name() {
                            "TableRows" => details.rows = build_rows(ctx, part),
                            "Grouping" => details.grouping = Some(Grouping::build(ctx, part)),
                            "Sorting" => details.sorting = Some(Sorting::build(ctx, part)),
                            "Visibility" => {}
                            other => ctx.log.unknown_element("Details", other),
                        }
                    }
                    table.details = Some(details);
                }
                "FillPage" | "DetailDataElementName" | "DetailDataCollectionName"
                | "DetailDataElementOutput" => {}
                other => ctx.log.unknown_element("Table", other),
            }
        }
        if table.columns.is_empty() {
            ctx.log.error(format!(
                "Table '{}' requires TableColumns.",
                table.base.display_name()
            ));
        }
        table
    }

    fn build_group(ctx: &mut BuildContext, node: Node<'_, '_>) -> Option<TableGroup> {
        let mut grouping = None;
        let mut sorting = None;
        let mut header = None;
        let mut footer = None;
        for child in elements(node) {
            match child.tag_name().name() {
                "Grouping" => grouping = Some(Grouping::build(ctx, child)),
                "Sorting" => sorting = Some(Sorting::build(ctx, child)),
                "Header" => header = Some(TableSection::build(ctx, child)),
                "Footer" => footer = Some(TableSection::build(ctx, child)),
                "Visibility" => {}
                other => ctx.log.unknown_element("TableGroup", other),
            }
        }
        match grouping {
            Some(grouping) => Some(TableGroup {
                grouping,
                sorting,
                header,
                footer,
            }),
            None => {
                ctx.log.error("TableGroup requires a Grouping.");
                None
            }
        }
    }

    /// Grouping levels, outer first; the details grouping is innermost.
    pub fn levels(&self) -> Vec<&Grouping> {
        self.groups
            .iter()
            .map(|group| &group.grouping)
            .chain(self.details.as_ref().and_then(|d| d.grouping.as_ref()))
            .collect()
    }

    pub fn groupings(&self) -> impl Iterator<Item = &Grouping> {
        self.levels().into_iter()
    }

    /// Group sortings outer to inner, then the details sorting.
    pub fn combined_sorting(&self) -> Option<Sorting> {
        let sort_by: Vec<SortBy> = self
            .groups
            .iter()
            .filter_map(|group| group.sorting.as_ref())
            .chain(self.details.as_ref().and_then(|d| d.sorting.as_ref()))
            .flat_map(|sorting| sorting.sort_by.iter().cloned())
            .collect();
        (!sort_by.is_empty()).then_some(Sorting { sort_by })
    }

    /// Every row of the table in document order.
    pub fn rows(&self) -> impl Iterator<Item = &TableRow> {
        let header = self.header.iter().flat_map(|s| s.rows.iter());
        let groups = self.groups.iter().flat_map(|group| {
            group
                .header
                .iter()
                .flat_map(|s| s.rows.iter())
                .chain(group.footer.iter().flat_map(|s| s.rows.iter()))
        });
        let details = self.details.iter().flat_map(|d| d.rows.iter());
        let footer = self.footer.iter().flat_map(|s| s.rows.iter());
        header.chain(groups).chain(details).chain(footer)
    }

    /// Left edge and width of a cell starting at `column` spanning `span` columns.
    pub fn cell_bounds(&self, column: usize, span: usize) -> (Pt, Pt) {
        let left: Pt = self.columns.iter().take(column).copied().sum();
        let width: Pt = self.columns.iter().skip(column).take(span).copied().sum();
        (left, width)
    }

    pub fn width(&self) -> Pt {
        self.columns.iter().copied().sum()
    }
}

impl Resolve for Table {
    fn resolve(&mut self, scope: &mut ResolveScope) {
        self.base.resolve(scope);
        scope.enter_region(self.region.data_set_name.as_deref(), self.base.display_name());
        self.region.resolve(scope);
        let group_count = self.groups.len();
        for (level, group) in self.groups.iter_mut().enumerate() {
            group.grouping.level = level;
            group.grouping.resolve(scope);
            if let Some(sorting) = &mut group.sorting {
                sorting.resolve(scope);
            }
        }
        if let Some(details) = &mut self.details {
            if let Some(grouping) = &mut details.grouping {
                grouping.level = group_count;
                grouping.resolve(scope);
            }
            if let Some(sorting) = &mut details.sorting {
                sorting.resolve(scope);
            }
        }
        if let Some(header) = &mut self.header {
            header.resolve(scope);
        }
        for group in &mut self.groups {
            if let Some(section) = &mut group.header {
                section.resolve(scope);
            }
            if let Some(section) = &mut group.footer {
                section.resolve(scope);
            }
        }
        if let Some(details) = &mut self.details {
            for row in &mut details.rows {
                row.resolve(scope);
            }
        }
        if let Some(footer) = &mut self.footer {
            footer.resolve(scope);
        }
        scope.leave_region();
    }
}

/// Item of a cell, if any.
pub(crate) fn cell_item(cell: &TableCell) -> Option<&ReportItem> {
    cell.items.items.first()
}
