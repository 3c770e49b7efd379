use std::collections::{HashMap, HashSet};

use roxmltree::Node;

use crate::diagnostics::DefinitionLog;
use crate::error::{ReportError, Result};
use crate::expression::Expression;
use crate::report_items::{ReportItems, collect_scope_names};
use crate::rows::{Field, RowSet, field_position};
use crate::state::NodeId;
use crate::types::{Margins, Pt, Size};
use crate::value::{TypeCode, Value};

/// Construction state shared by every node while a definition is built.
pub(crate) struct BuildContext {
    pub log: DefinitionLog,
    next_id: u32,
}

impl BuildContext {
    pub fn new() -> Self {
        Self {
            log: DefinitionLog::new(),
            next_id: 0,
        }
    }

    pub fn node_id(&mut self) -> NodeId {
        let id = NodeId(self.next_id);
        self.next_id += 1;
        id
    }

    pub fn node_count(&self) -> u32 {
        self.next_id
    }

    pub fn size(&mut self, node: Node<'_, '_>) -> Pt {
        let raw = text_of(node);
        match parse_size(&raw) {
            Some(size) => size,
            None => {
                self.log.warn(format!(
                    "{} '{}' is not a valid size; 0pt used.",
                    node.tag_name().name(),
                    raw
                ));
                Pt::ZERO
            }
        }
    }

    pub fn expression(&mut self, node: Node<'_, '_>, expected: TypeCode) -> Expression {
        Expression::register(&text_of(node), expected)
    }

    /// `Name` attribute; logs an error when missing and `required` is set.
    pub fn name_attr(&mut self, node: Node<'_, '_>, required: bool) -> Option<String> {
        let name = node
            .attribute("Name")
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(str::to_string);
        if name.is_none() && required {
            self.log
                .error(format!("{} requires the Name attribute.", node.tag_name().name()));
        }
        name
    }
}

pub(crate) fn elements<'a, 'input>(
    node: Node<'a, 'input>,
) -> impl Iterator<Item = Node<'a, 'input>> {
    node.children().filter(Node::is_element)
}

pub(crate) fn text_of(node: Node<'_, '_>) -> String {
    node.descendants()
        .filter(Node::is_text)
        .filter_map(|n| n.text())
        .collect::<String>()
        .trim()
        .to_string()
}

pub(crate) fn parse_bool(node: Node<'_, '_>) -> bool {
    text_of(node).eq_ignore_ascii_case("true")
}

/// Parses an RDL size such as `1in`, `2.5cm` or `12pt`. Bare numbers are points.
pub fn parse_size(raw: &str) -> Option<Pt> {
    let raw = raw.trim();
    let split = raw
        .find(|ch: char| ch.is_ascii_alphabetic())
        .unwrap_or(raw.len());
    let (number, unit) = raw.split_at(split);
    let number: f32 = number.trim().parse().ok()?;
    let points = match unit.trim().to_ascii_lowercase().as_str() {
        "" | "pt" => number,
        "in" => number * 72.0,
        "cm" => number * 72.0 / 2.54,
        "mm" => number * 72.0 / 25.4,
        "pc" => number * 12.0,
        "px" => number * 72.0 / 96.0,
        _ => return None,
    };
    Some(Pt::from_f32(points))
}

/// Second construction pass: resolve and validate references.
pub(crate) trait Resolve {
    fn resolve(&mut self, scope: &mut ResolveScope);
}

/// Names visible while resolving, plus the log that collects problems.
pub(crate) struct ResolveScope {
    log: DefinitionLog,
    parameters: HashSet<String>,
    data_sets: HashMap<String, Vec<Field>>,
    scope_names: HashSet<String>,
    data_set_stack: Vec<String>,
    default_data_set: Option<String>,
}

impl ResolveScope {
    fn new(log: DefinitionLog, definition: &ReportDefinition) -> Self {
        let mut scope_names = HashSet::new();
        collect_scope_names(&definition.body.items, &mut scope_names);
        let mut data_sets = HashMap::new();
        for data_set in &definition.data_sets {
            if let Some(name) = &data_set.name {
                scope_names.insert(name.to_ascii_lowercase());
                data_sets.insert(name.to_ascii_lowercase(), data_set.schema());
            }
        }
        let default_data_set = match definition.data_sets.as_slice() {
            [only] => only.name.clone(),
            _ => None,
        };
        Self {
            log,
            parameters: definition
                .parameters
                .iter()
                .filter_map(|p| p.name.as_ref().map(|n| n.to_ascii_lowercase()))
                .collect(),
            data_sets,
            scope_names,
            data_set_stack: Vec::new(),
            default_data_set,
        }
    }

    #[cfg(test)]
    pub(crate) fn for_tests(fields: &[&str], parameters: &[&str], scopes: &[&str]) -> Self {
        let mut data_sets = HashMap::new();
        data_sets.insert(
            "test".to_string(),
            fields
                .iter()
                .map(|name| Field::new(*name, TypeCode::Object))
                .collect(),
        );
        Self {
            log: DefinitionLog::new(),
            parameters: parameters.iter().map(|p| p.to_ascii_lowercase()).collect(),
            data_sets,
            scope_names: scopes.iter().map(|s| s.to_ascii_lowercase()).collect(),
            data_set_stack: vec!["test".to_string()],
            default_data_set: None,
        }
    }

    pub fn log(&self) -> &DefinitionLog {
        &self.log
    }

    pub fn warn(&mut self, message: impl Into<String>) {
        self.log.warn(message);
    }

    pub fn error(&mut self, message: impl Into<String>) {
        self.log.error(message);
    }

    pub fn has_parameter(&self, name: &str) -> bool {
        self.parameters.contains(&name.to_ascii_lowercase())
    }

    pub fn has_scope(&self, name: &str) -> bool {
        self.scope_names.contains(&name.to_ascii_lowercase())
    }

    pub fn current_data_set(&self) -> Option<&str> {
        self.data_set_stack
            .last()
            .map(String::as_str)
            .or(self.default_data_set.as_deref())
    }

    /// Position of a field in the current data set.
    ///
    /// `Some(None)` means the field cannot be checked (no data set or no declared
    /// fields); `None` means it is definitely unknown, which is logged.
    pub fn field_hint(&mut self, name: &str) -> Option<Option<usize>> {
        let Some(data_set) = self.current_data_set().map(str::to_string) else {
            return Some(None);
        };
        let fields = match self.data_sets.get(&data_set.to_ascii_lowercase()) {
            Some(fields) if !fields.is_empty() => fields,
            _ => return Some(None),
        };
        match field_position(fields, name) {
            Some(position) => Some(Some(position)),
            None => {
                self.error(format!("Field '{name}' is not defined in data set '{data_set}'."));
                None
            }
        }
    }

    /// Enters a data region bound to `data_set_name`, or to the enclosing
    /// region's data set when the name is absent.
    pub fn enter_region(&mut self, data_set_name: Option<&str>, region: &str) {
        let resolved = match data_set_name {
            Some(name) => {
                if !self.data_sets.contains_key(&name.to_ascii_lowercase()) {
                    self.error(format!(
                        "DataSetName '{name}' of data region '{region}' does not name a data set."
                    ));
                }
                name.to_string()
            }
            None => match self.current_data_set() {
                Some(name) => name.to_string(),
                None => {
                    self.error(format!("Data region '{region}' needs a DataSetName."));
                    String::new()
                }
            },
        };
        self.data_set_stack.push(resolved);
    }

    pub fn leave_region(&mut self) {
        self.data_set_stack.pop();
    }

    fn into_log(self) -> DefinitionLog {
        self.log
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DataSetField {
    pub name: Option<String>,
    pub data_field: Option<String>,
    pub type_code: TypeCode,
}

/// A named query whose rows feed data regions.
#[derive(Debug, Clone, PartialEq)]
pub struct DataSetDefinition {
    pub name: Option<String>,
    pub fields: Vec<DataSetField>,
    pub command_text: Option<String>,
    pub data_source_name: Option<String>,
}

impl DataSetDefinition {
    pub(crate) fn build(ctx: &mut BuildContext, node: Node<'_, '_>) -> Self {
        let mut data_set = Self {
            name: ctx.name_attr(node, true),
            fields: Vec::new(),
            command_text: None,
            data_source_name: None,
        };
        for child in elements(node) {
            match child.tag_name().name() {
                "Fields" => {
                    for field in elements(child) {
                        if field.tag_name().name() != "Field" {
                            ctx.log.unknown_element("Fields", field.tag_name().name());
                            continue;
                        }
                        data_set.fields.push(DataSetField::build(ctx, field));
                    }
                }
                "Query" => {
                    for part in elements(child) {
                        match part.tag_name().name() {
                            "CommandText" => data_set.command_text = Some(text_of(part)),
                            "DataSourceName" => data_set.data_source_name = Some(text_of(part)),
                            "QueryParameters" | "CommandType" | "Timeout" => {}
                            other => ctx.log.unknown_element("Query", other),
                        }
                    }
                }
                "Filters" | "CaseSensitivity" | "Collation" => {}
                other => ctx.log.unknown_element("DataSet", other),
            }
        }
        data_set
    }

    pub fn schema(&self) -> Vec<Field> {
        self.fields
            .iter()
            .filter_map(|f| f.name.as_ref().map(|name| Field::new(name.clone(), f.type_code)))
            .collect()
    }

    /// Maps fetched rows onto the declared fields, converting to declared types.
    /// Without declared fields the rows are returned unchanged.
    pub fn conform(&self, fetched: RowSet) -> RowSet {
        let schema = self.schema();
        if schema.is_empty() {
            return fetched;
        }
        let columns: Vec<Option<usize>> = self
            .fields
            .iter()
            .filter(|f| f.name.is_some())
            .map(|f| {
                let source = f.data_field.as_deref().or(f.name.as_deref()).unwrap_or_default();
                let column = fetched.field_index(source);
                if column.is_none() {
                    log::warn!(
                        "data set {:?}: column {source} missing from fetched rows",
                        self.name
                    );
                }
                column
            })
            .collect();
        let rows = fetched
            .rows()
            .iter()
            .map(|row| {
                columns
                    .iter()
                    .zip(&schema)
                    .map(|(column, field)| {
                        let raw = column.map(|c| row.get(c).clone()).unwrap_or_default();
                        raw.convert(field.type_code).unwrap_or(raw)
                    })
                    .collect()
            })
            .collect();
        RowSet::new(schema, rows)
    }
}

impl DataSetField {
    fn build(ctx: &mut BuildContext, node: Node<'_, '_>) -> Self {
        let mut field = Self {
            name: ctx.name_attr(node, true),
            data_field: None,
            type_code: TypeCode::Object,
        };
        for child in elements(node) {
            match child.tag_name().name() {
                "DataField" => field.data_field = Some(text_of(child)),
                "TypeName" | "rd:TypeName" => {
                    let raw = text_of(child);
                    match TypeCode::parse(&raw) {
                        Some(type_code) => field.type_code = type_code,
                        None => ctx.log.warn(format!("Unknown field type '{raw}'; Object used.")),
                    }
                }
                "Value" => {}
                other => ctx.log.unknown_element("Field", other),
            }
        }
        field
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReportParameter {
    pub name: Option<String>,
    pub data_type: TypeCode,
    pub nullable: bool,
    pub prompt: Option<String>,
    pub default_values: Vec<Expression>,
}

impl ReportParameter {
    fn build(ctx: &mut BuildContext, node: Node<'_, '_>) -> Self {
        let mut parameter = Self {
            name: ctx.name_attr(node, true),
            data_type: TypeCode::String,
            nullable: false,
            prompt: None,
            default_values: Vec::new(),
        };
        let mut defaults = Vec::new();
        for child in elements(node) {
            match child.tag_name().name() {
                "DataType" => {
                    let raw = text_of(child);
                    match TypeCode::parse(&raw) {
                        Some(type_code) => parameter.data_type = type_code,
                        None => ctx.log.warn(format!("Unknown parameter DataType '{raw}'.")),
                    }
                }
                "Nullable" => parameter.nullable = parse_bool(child),
                "Prompt" => parameter.prompt = Some(text_of(child)),
                "DefaultValue" => {
                    for values in elements(child) {
                        match values.tag_name().name() {
                            "Values" => defaults.extend(
                                elements(values).filter(|v| v.tag_name().name() == "Value"),
                            ),
                            "DataSetReference" => {}
                            other => ctx.log.unknown_element("DefaultValue", other),
                        }
                    }
                }
                "AllowBlank" | "MultiValue" | "ValidValues" | "UsedInQuery" => {}
                other => ctx.log.unknown_element("ReportParameter", other),
            }
        }
        parameter.default_values = defaults
            .into_iter()
            .map(|value| ctx.expression(value, parameter.data_type))
            .collect();
        parameter
    }
}

impl Resolve for ReportParameter {
    fn resolve(&mut self, scope: &mut ResolveScope) {
        for value in &mut self.default_values {
            value.resolve(scope);
        }
    }
}

/// Runtime parameter values, looked up case-insensitively.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParameterValues {
    values: HashMap<String, Value>,
}

impl ParameterValues {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.set(name, value);
        self
    }

    pub fn set(&mut self, name: &str, value: impl Into<Value>) {
        self.values.insert(name.to_ascii_lowercase(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(&name.to_ascii_lowercase())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(&name.to_ascii_lowercase())
    }
}

/// Page header or footer band.
#[derive(Debug, Clone, PartialEq)]
pub struct PageSection {
    pub height: Pt,
    pub print_on_first_page: bool,
    pub print_on_last_page: bool,
    pub items: ReportItems,
}

impl PageSection {
    fn build(ctx: &mut BuildContext, node: Node<'_, '_>) -> Self {
        let element = node.tag_name().name().to_string();
        let mut section = Self {
            height: Pt::ZERO,
            print_on_first_page: true,
            print_on_last_page: true,
            items: ReportItems::default(),
        };
        for child in elements(node) {
            match child.tag_name().name() {
                "Height" => section.height = ctx.size(child),
                "PrintOnFirstPage" => section.print_on_first_page = parse_bool(child),
                "PrintOnLastPage" => section.print_on_last_page = parse_bool(child),
                "ReportItems" => section.items = ReportItems::build(ctx, child),
                "Style" => {}
                other => ctx.log.unknown_element(&element, other),
            }
        }
        section
    }

    /// Whether the band is drawn on page `number` of `total`.
    pub fn prints_on(&self, number: usize, total: usize) -> bool {
        if number == 1 && !self.print_on_first_page {
            return false;
        }
        if number == total && total > 1 && !self.print_on_last_page {
            return false;
        }
        true
    }
}

impl Resolve for PageSection {
    fn resolve(&mut self, scope: &mut ResolveScope) {
        self.items.resolve(scope);
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Body {
    pub height: Pt,
    pub items: ReportItems,
}

/// Root of an immutable report definition.
#[derive(Debug, Clone)]
pub struct ReportDefinition {
    pub name: String,
    pub description: Option<String>,
    pub author: Option<String>,
    pub page_size: Size,
    pub margins: Margins,
    pub width: Pt,
    pub parameters: Vec<ReportParameter>,
    pub data_sets: Vec<DataSetDefinition>,
    pub data_sources: Vec<String>,
    pub page_header: Option<PageSection>,
    pub page_footer: Option<PageSection>,
    pub body: Body,
    pub diagnostics: DefinitionLog,
    node_count: u32,
}

impl ReportDefinition {
    /// Builds a definition from an RDL document. Problems inside the document are
    /// collected in `diagnostics`; only unreadable documents fail.
    pub fn parse(xml: &str) -> Result<ReportDefinition> {
        let document = roxmltree::Document::parse(xml)?;
        let root = document.root_element();
        if root.tag_name().name() != "Report" {
            return Err(ReportError::InvalidDefinition(format!(
                "root element is '{}', expected 'Report'",
                root.tag_name().name()
            )));
        }
        let mut ctx = BuildContext::new();
        let mut definition = ReportDefinition::build(&mut ctx, root);
        definition.node_count = ctx.node_count();

        let log = std::mem::replace(&mut ctx.log, DefinitionLog::new());
        let mut scope = ResolveScope::new(log, &definition);
        definition.resolve(&mut scope);
        definition.diagnostics = scope.into_log();
        Ok(definition)
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn node_count(&self) -> u32 {
        self.node_count
    }

    pub fn data_set(&self, name: &str) -> Option<&DataSetDefinition> {
        self.data_sets
            .iter()
            .find(|d| d.name.as_deref().is_some_and(|n| n.eq_ignore_ascii_case(name)))
    }

    /// The data set a region without `DataSetName` binds to.
    pub fn default_data_set(&self) -> Option<&DataSetDefinition> {
        match self.data_sets.as_slice() {
            [only] => Some(only),
            _ => None,
        }
    }

    pub fn header_height(&self) -> Pt {
        self.page_header.as_ref().map(|h| h.height).unwrap_or(Pt::ZERO)
    }

    pub fn footer_height(&self) -> Pt {
        self.page_footer.as_ref().map(|f| f.height).unwrap_or(Pt::ZERO)
    }

    /// First y available to body content.
    pub fn body_top(&self) -> Pt {
        self.margins.top + self.header_height()
    }

    /// Last y available to body content.
    pub fn body_bottom(&self) -> Pt {
        self.page_size.height - self.margins.bottom - self.footer_height()
    }

    fn build(ctx: &mut BuildContext, node: Node<'_, '_>) -> Self {
        let mut definition = Self {
            name: "Report".to_string(),
            description: None,
            author: None,
            page_size: Size::letter(),
            margins: Margins::all(0.0),
            width: Pt::ZERO,
            parameters: Vec::new(),
            data_sets: Vec::new(),
            data_sources: Vec::new(),
            page_header: None,
            page_footer: None,
            body: Body {
                height: Pt::ZERO,
                items: ReportItems::default(),
            },
            diagnostics: DefinitionLog::new(),
            node_count: 0,
        };
        let mut saw_body = false;
        for child in elements(node) {
            match child.tag_name().name() {
                "PageHeight" => definition.page_size.height = ctx.size(child),
                "PageWidth" => definition.page_size.width = ctx.size(child),
                "TopMargin" => definition.margins.top = ctx.size(child),
                "BottomMargin" => definition.margins.bottom = ctx.size(child),
                "LeftMargin" => definition.margins.left = ctx.size(child),
                "RightMargin" => definition.margins.right = ctx.size(child),
                "Width" => definition.width = ctx.size(child),
                "Description" => definition.description = Some(text_of(child)),
                "Author" => definition.author = Some(text_of(child)),
                "ReportParameters" => {
                    for parameter in elements(child) {
                        if parameter.tag_name().name() == "ReportParameter" {
                            definition
                                .parameters
                                .push(ReportParameter::build(ctx, parameter));
                        } else {
                            ctx.log
                                .unknown_element("ReportParameters", parameter.tag_name().name());
                        }
                    }
                }
                "DataSets" => {
                    for data_set in elements(child) {
                        if data_set.tag_name().name() == "DataSet" {
                            definition
                                .data_sets
                                .push(DataSetDefinition::build(ctx, data_set));
                        } else {
                            ctx.log.unknown_element("DataSets", data_set.tag_name().name());
                        }
                    }
                }
                "DataSources" => {
                    definition.data_sources = elements(child)
                        .filter_map(|source| source.attribute("Name").map(str::to_string))
                        .collect();
                }
                "PageHeader" => definition.page_header = Some(PageSection::build(ctx, child)),
                "PageFooter" => definition.page_footer = Some(PageSection::build(ctx, child)),
                "Body" => {
                    saw_body = true;
                    for part in elements(child) {
                        match part.tag_name().name() {
                            "Height" => definition.body.height = ctx.size(part),
                            "ReportItems" => definition.body.items = ReportItems::build(ctx, part),
                            "Style" | "Columns" | "ColumnSpacing" => {}
                            other => ctx.log.unknown_element("Body", other),
                        }
                    }
                }
                "EmbeddedImages" | "Language" | "Code" | "CodeModules" | "Classes"
                | "DataElementName" | "DataElementStyle" | "DataSchema" | "DataTransform" => {}
                other => ctx.log.unknown_element("Report", other),
            }
        }
        if !saw_body {
            ctx.log.error("Report requires a Body element.");
        }
        definition
    }

    fn resolve(&mut self, scope: &mut ResolveScope) {
        for parameter in &mut self.parameters {
            parameter.resolve(scope);
        }
        // Page bands see no data set, so field references there stay unchecked.
        if let Some(header) = &mut self.page_header {
            header.resolve(scope);
        }
        if let Some(footer) = &mut self.page_footer {
            footer.resolve(scope);
        }
        self.body.items.resolve(scope);
    }
}
