use std::collections::HashSet;

use roxmltree::Node;

use crate::data_region::{List, Table};
use crate::definition::{BuildContext, Resolve, ResolveScope, elements, parse_bool, parse_size, text_of};
use crate::error::Result;
use crate::expression::{EvalContext, Evaluator, Expression};
use crate::state::NodeId;
use crate::textflow::TextAlign;
use crate::types::{Color, Pt};
use crate::value::{TypeCode, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Top,
    Right,
    Bottom,
    Left,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Style {
    pub padding_top: Option<Expression>,
    pub padding_right: Option<Expression>,
    pub padding_bottom: Option<Expression>,
    pub padding_left: Option<Expression>,
    pub font_family: Option<String>,
    pub font_size: Option<Pt>,
    pub bold: bool,
    pub italic: bool,
    pub text_align: Option<TextAlign>,
    pub color: Option<Color>,
    pub format: Option<String>,
}

impl Style {
    pub(crate) fn build(ctx: &mut BuildContext, node: Node<'_, '_>) -> Self {
        let mut style = Style::default();
        for child in elements(node) {
            match child.tag_name().name() {
                "PaddingTop" => style.padding_top = Some(ctx.expression(child, TypeCode::String)),
                "PaddingRight" => style.padding_right = Some(ctx.expression(child, TypeCode::String)),
                "PaddingBottom" => {
                    style.padding_bottom = Some(ctx.expression(child, TypeCode::String))
                }
                "PaddingLeft" => style.padding_left = Some(ctx.expression(child, TypeCode::String)),
                "FontFamily" => style.font_family = Some(text_of(child)),
                "FontSize" => style.font_size = Some(ctx.size(child)),
                "FontWeight" => {
                    let weight = text_of(child).to_ascii_lowercase();
                    style.bold = matches!(
                        weight.as_str(),
                        "bold" | "bolder" | "semibold" | "extrabold" | "heavy" | "600" | "700"
                            | "800" | "900"
                    );
                }
                "FontStyle" => style.italic = text_of(child).eq_ignore_ascii_case("italic"),
                "TextAlign" => {
                    let raw = text_of(child);
                    style.text_align = if raw.eq_ignore_ascii_case("general") {
                        None
                    } else {
                        Some(TextAlign::parse(&raw))
                    };
                }
                "Color" => {
                    let raw = text_of(child);
                    style.color = Color::parse(&raw);
                    if style.color.is_none() {
                        ctx.log.warn(format!("Color '{raw}' is not recognized."));
                    }
                }
                "Format" => style.format = Some(text_of(child)),
                "BorderColor" | "BorderStyle" | "BorderWidth" | "BackgroundColor"
                | "BackgroundGradientType" | "BackgroundGradientEndColor" | "BackgroundImage"
                | "TextDecoration" | "VerticalAlign" | "LineHeight" | "Direction"
                | "WritingMode" | "Language" | "Calendar" | "NumeralLanguage"
                | "NumeralVariant" | "UnicodeBiDi" => {}
                other => ctx.log.unknown_element("Style", other),
            }
        }
        style
    }

    /// Padding on `side`, evaluated for the current row. Missing padding is zero.
    pub fn padding(&self, side: Side, evaluator: &dyn Evaluator, ctx: &EvalContext<'_>) -> Result<Pt> {
        let expression = match side {
            Side::Top => &self.padding_top,
            Side::Right => &self.padding_right,
            Side::Bottom => &self.padding_bottom,
            Side::Left => &self.padding_left,
        };
        let Some(expression) = expression else {
            return Ok(Pt::ZERO);
        };
        let value = expression.evaluate(evaluator, ctx)?;
        Ok(parse_size(&value.to_string()).unwrap_or(Pt::ZERO))
    }
}

impl Resolve for Style {
    fn resolve(&mut self, scope: &mut ResolveScope) {
        for padding in [
            &mut self.padding_top,
            &mut self.padding_right,
            &mut self.padding_bottom,
            &mut self.padding_left,
        ]
        .into_iter()
        .flatten()
        {
            padding.resolve(scope);
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Visibility {
    pub hidden: Option<Expression>,
}

impl Visibility {
    fn build(ctx: &mut BuildContext, node: Node<'_, '_>) -> Self {
        let mut visibility = Visibility { hidden: None };
        for child in elements(node) {
            match child.tag_name().name() {
                "Hidden" => visibility.hidden = Some(ctx.expression(child, TypeCode::Boolean)),
                "ToggleItem" => {}
                other => ctx.log.unknown_element("Visibility", other),
            }
        }
        visibility
    }

    pub fn is_hidden(&self, evaluator: &dyn Evaluator, ctx: &EvalContext<'_>) -> Result<bool> {
        match &self.hidden {
            Some(hidden) => Ok(hidden
                .evaluate(evaluator, ctx)?
                .as_bool()
                .unwrap_or(false)),
            None => Ok(false),
        }
    }
}

/// Attributes every report item shares.
#[derive(Debug, Clone, PartialEq)]
pub struct ItemBase {
    pub id: NodeId,
    pub name: Option<String>,
    pub top: Pt,
    pub left: Pt,
    pub height: Pt,
    pub width: Pt,
    pub z_index: i32,
    pub style: Style,
    pub visibility: Option<Visibility>,
}

impl ItemBase {
    pub(crate) fn new(ctx: &mut BuildContext, node: Node<'_, '_>) -> Self {
        Self {
            id: ctx.node_id(),
            name: ctx.name_attr(node, false),
            top: Pt::ZERO,
            left: Pt::ZERO,
            height: Pt::ZERO,
            width: Pt::ZERO,
            z_index: 0,
            style: Style::default(),
            visibility: None,
        }
    }

    /// Consumes a child element common to all items; returns false otherwise.
    pub(crate) fn accept(&mut self, ctx: &mut BuildContext, child: Node<'_, '_>) -> bool {
        match child.tag_name().name() {
            "Top" => self.top = ctx.size(child),
            "Left" => self.left = ctx.size(child),
            "Height" => self.height = ctx.size(child),
            "Width" => self.width = ctx.size(child),
            "ZIndex" => self.z_index = text_of(child).parse().unwrap_or(0),
            "Style" => self.style = Style::build(ctx, child),
            "Visibility" => self.visibility = Some(Visibility::build(ctx, child)),
            "Label" | "Bookmark" | "ToolTip" | "RepeatWith" | "CustomProperties"
            | "DataElementName" | "DataElementOutput" | "LinkToChild" => {}
            _ => return false,
        }
        true
    }

    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("(unnamed)")
    }

    pub fn is_hidden(&self, evaluator: &dyn Evaluator, ctx: &EvalContext<'_>) -> Result<bool> {
        match &self.visibility {
            Some(visibility) => visibility.is_hidden(evaluator, ctx),
            None => Ok(false),
        }
    }
}

impl Resolve for ItemBase {
    fn resolve(&mut self, scope: &mut ResolveScope) {
        self.style.resolve(scope);
        if let Some(hidden) = self.visibility.as_mut().and_then(|v| v.hidden.as_mut()) {
            hidden.resolve(scope);
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DrillthroughParameter {
    pub name: Option<String>,
    pub value: Option<Expression>,
    pub omit: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Drillthrough {
    pub report_name: String,
    pub parameters: Vec<DrillthroughParameter>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Action {
    pub hyperlink: Option<Expression>,
    pub drillthrough: Option<Drillthrough>,
}

impl Action {
    fn build(ctx: &mut BuildContext, node: Node<'_, '_>) -> Self {
        let mut action = Action::default();
        for child in elements(node) {
            match child.tag_name().name() {
                "Hyperlink" => action.hyperlink = Some(ctx.expression(child, TypeCode::String)),
                "Drillthrough" => action.drillthrough = Some(Drillthrough::build(ctx, child)),
                "BookmarkLink" => {}
                other => ctx.log.unknown_element("Action", other),
            }
        }
        action
    }
}

impl Drillthrough {
    fn build(ctx: &mut BuildContext, node: Node<'_, '_>) -> Self {
        let mut drillthrough = Drillthrough {
            report_name: String::new(),
            parameters: Vec::new(),
        };
        for child in elements(node) {
            match child.tag_name().name() {
                "ReportName" => drillthrough.report_name = text_of(child),
                "Parameters" => {
                    for parameter in elements(child) {
                        if parameter.tag_name().name() != "Parameter" {
                            ctx.log.unknown_element("Parameters", parameter.tag_name().name());
                            continue;
                        }
                        let mut built = DrillthroughParameter {
                            name: ctx.name_attr(parameter, true),
                            value: None,
                            omit: false,
                        };
                        for part in elements(parameter) {
                            match part.tag_name().name() {
                                "Value" => built.value = Some(ctx.expression(part, TypeCode::Object)),
                                "Omit" => built.omit = parse_bool(part),
                                other => ctx.log.unknown_element("Parameter", other),
                            }
                        }
                        drillthrough.parameters.push(built);
                    }
                }
                other => ctx.log.unknown_element("Drillthrough", other),
            }
        }
        if drillthrough.report_name.is_empty() {
            ctx.log.error("Drillthrough requires a ReportName.");
        }
        drillthrough
    }

    /// `report?name=value&...` for the current row, skipping omitted parameters.
    pub fn link(&self, evaluator: &dyn Evaluator, ctx: &EvalContext<'_>) -> Result<String> {
        let mut link = self.report_name.clone();
        let mut separator = '?';
        for parameter in &self.parameters {
            let (Some(name), Some(value)) = (&parameter.name, &parameter.value) else {
                continue;
            };
            if parameter.omit {
                continue;
            }
            let value = value.evaluate(evaluator, ctx)?;
            link.push(separator);
            link.push_str(name);
            link.push('=');
            link.push_str(&value.to_string());
            separator = '&';
        }
        Ok(link)
    }
}

impl Resolve for Action {
    fn resolve(&mut self, scope: &mut ResolveScope) {
        if let Some(hyperlink) = &mut self.hyperlink {
            hyperlink.resolve(scope);
        }
        if let Some(drillthrough) = &mut self.drillthrough {
            for value in drillthrough.parameters.iter_mut().filter_map(|p| p.value.as_mut()) {
                value.resolve(scope);
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Textbox {
    pub base: ItemBase,
    pub value: Expression,
    pub can_grow: bool,
    pub can_shrink: bool,
    /// Scope whose repeated values are suppressed.
    pub hide_duplicates: Option<String>,
    pub action: Option<Action>,
}

impl Textbox {
    fn build(ctx: &mut BuildContext, node: Node<'_, '_>) -> Self {
        let mut base = ItemBase::new(ctx, node);
        let mut value = None;
        let mut can_grow = false;
        let mut can_shrink = false;
        let mut hide_duplicates = None;
        let mut action = None;
        for child in elements(node) {
            if base.accept(ctx, child) {
                continue;
            }
            match child.tag_name().name() {
                "Value" => value = Some(ctx.expression(child, TypeCode::Object)),
                "CanGrow" => can_grow = parse_bool(child),
                "CanShrink" => can_shrink = parse_bool(child),
                "HideDuplicates" => hide_duplicates = Some(text_of(child)),
                "Action" => action = Some(Action::build(ctx, child)),
                "ToggleImage" | "UserSort" | "DataElementStyle" => {}
                other => ctx.log.unknown_element("Textbox", other),
            }
        }
        if value.is_none() {
            ctx.log
                .error(format!("Textbox '{}' requires a Value.", base.display_name()));
        }
        Textbox {
            base,
            value: value.unwrap_or_else(|| Expression::constant(Value::Null)),
            can_grow,
            can_shrink,
            hide_duplicates,
            action,
        }
    }
}

impl Resolve for Textbox {
    fn resolve(&mut self, scope: &mut ResolveScope) {
        self.base.resolve(scope);
        self.value.resolve(scope);
        if let Some(hide) = &self.hide_duplicates {
            if !scope.has_scope(hide) {
                scope.error(format!(
                    "HideDuplicates scope '{hide}' of textbox '{}' does not name a group, data region or data set.",
                    self.base.display_name()
                ));
            }
        }
        if let Some(action) = &mut self.action {
            action.resolve(scope);
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct PlotArea {
    pub style: Style,
}

/// A chart; only its frame and plot area are laid out.
#[derive(Debug, Clone, PartialEq)]
pub struct Chart {
    pub base: ItemBase,
    pub plot_area: Option<PlotArea>,
}

impl Chart {
    fn build(ctx: &mut BuildContext, node: Node<'_, '_>) -> Self {
        let mut base = ItemBase::new(ctx, node);
        let mut plot_area = None;
        for child in elements(node) {
            if base.accept(ctx, child) {
                continue;
            }
            match child.tag_name().name() {
                "PlotArea" => {
                    let mut area = PlotArea::default();
                    for part in elements(child) {
                        match part.tag_name().name() {
                            "Style" => area.style = Style::build(ctx, part),
                            other => ctx.log.unknown_element("PlotArea", other),
                        }
                    }
                    plot_area = Some(area);
                }
                "Type" | "Subtype" | "SeriesGroupings" | "CategoryGroupings" | "ChartData"
                | "Legend" | "CategoryAxis" | "ValueAxis" | "Title" | "PointWidth" | "Palette"
                | "ThreeDProperties" | "DataSetName" | "Filters" | "NoRows" | "KeepTogether"
                | "PageBreakAtStart" | "PageBreakAtEnd" | "ChartElementOutput" => {}
                other => ctx.log.unknown_element("Chart", other),
            }
        }
        Chart { base, plot_area }
    }
}

impl Resolve for Chart {
    fn resolve(&mut self, scope: &mut ResolveScope) {
        self.base.resolve(scope);
        if let Some(area) = &mut self.plot_area {
            area.style.resolve(scope);
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Rectangle {
    pub base: ItemBase,
    pub items: ReportItems,
}

impl Rectangle {
    fn build(ctx: &mut BuildContext, node: Node<'_, '_>) -> Self {
        let mut base = ItemBase::new(ctx, node);
        let mut items = ReportItems::default();
        for child in elements(node) {
            if base.accept(ctx, child) {
                continue;
            }
            match child.tag_name().name() {
                "ReportItems" => items = ReportItems::build(ctx, child),
                "PageBreakAtStart" | "PageBreakAtEnd" => {}
                other => ctx.log.unknown_element("Rectangle", other),
            }
        }
        Rectangle { base, items }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ReportItem {
    Textbox(Textbox),
    Rectangle(Rectangle),
    Chart(Chart),
    List(List),
    Table(Table),
}

impl ReportItem {
    pub fn base(&self) -> &ItemBase {
        match self {
            ReportItem::Textbox(item) => &item.base,
            ReportItem::Rectangle(item) => &item.base,
            ReportItem::Chart(item) => &item.base,
            ReportItem::List(item) => &item.base,
            ReportItem::Table(item) => &item.base,
        }
    }

    pub fn name(&self) -> Option<&str> {
        self.base().name.as_deref()
    }

    pub fn id(&self) -> NodeId {
        self.base().id
    }

    pub fn is_data_region(&self) -> bool {
        matches!(self, ReportItem::List(_) | ReportItem::Table(_))
    }
}

impl Resolve for ReportItem {
    fn resolve(&mut self, scope: &mut ResolveScope) {
        match self {
            ReportItem::Textbox(item) => item.resolve(scope),
            ReportItem::Rectangle(item) => {
                item.base.resolve(scope);
                item.items.resolve(scope);
            }
            ReportItem::Chart(item) => item.resolve(scope),
            ReportItem::List(item) => item.resolve(scope),
            ReportItem::Table(item) => item.resolve(scope),
        }
    }
}

/// Items of a container, in drawing order (`ZIndex`, then document order).
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ReportItems {
    pub items: Vec<ReportItem>,
}

impl ReportItems {
    pub(crate) fn build(ctx: &mut BuildContext, node: Node<'_, '_>) -> Self {
        let mut items = Vec::new();
        for child in elements(node) {
            let item = match child.tag_name().name() {
                "Textbox" => ReportItem::Textbox(Textbox::build(ctx, child)),
                "Rectangle" => ReportItem::Rectangle(Rectangle::build(ctx, child)),
                "Chart" => ReportItem::Chart(Chart::build(ctx, child)),
                "List" => ReportItem::List(List::build(ctx, child)),
                "Table" => ReportItem::Table(Table::build(ctx, child)),
                other => {
                    ctx.log.unknown_element("ReportItems", other);
                    continue;
                }
            };
            items.push(item);
        }
        items.sort_by_key(|item| item.base().z_index);
        ReportItems { items }
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ReportItem> {
        self.items.iter()
    }

    /// Lowest bottom edge of the items, relative to their container.
    pub fn extent(&self) -> Pt {
        self.items
            .iter()
            .map(|item| item.base().top + item.base().height)
            .fold(Pt::ZERO, Pt::max)
    }

    /// Indices of textboxes whose height is measured at render time.
    pub(crate) fn grow_list(&self) -> Vec<usize> {
        self.items
            .iter()
            .enumerate()
            .filter(|(_, item)| matches!(item, ReportItem::Textbox(t) if t.can_grow))
            .map(|(index, _)| index)
            .collect()
    }
}

impl Resolve for ReportItems {
    fn resolve(&mut self, scope: &mut ResolveScope) {
        for item in &mut self.items {
            item.resolve(scope);
        }
    }
}

/// Adds every group, data region and nested scope name below `items`, lowercased.
pub(crate) fn collect_scope_names(items: &ReportItems, names: &mut HashSet<String>) {
    for item in items.iter() {
        match item {
            ReportItem::Textbox(_) | ReportItem::Chart(_) => {}
            ReportItem::Rectangle(rectangle) => collect_scope_names(&rectangle.items, names),
            ReportItem::List(list) => {
                insert_name(names, list.base.name.as_deref());
                if let Some(grouping) = &list.grouping {
                    insert_name(names, grouping.name.as_deref());
                }
                collect_scope_names(&list.items, names);
            }
            ReportItem::Table(table) => {
                insert_name(names, table.base.name.as_deref());
                for grouping in table.groupings() {
                    insert_name(names, grouping.name.as_deref());
                }
                for row in table.rows() {
                    for cell in &row.cells {
                        collect_scope_names(&cell.items, names);
                    }
                }
            }
        }
    }
}

fn insert_name(names: &mut HashSet<String>, name: Option<&str>) {
    if let Some(name) = name {
        names.insert(name.to_ascii_lowercase());
    }
}

/// Renders a value with an RDL-style format string: `N2`, `F0`, `P1`, `D`,
/// or a picture such as `#,##0.00`. Unknown formats fall back to plain text.
pub fn format_value(value: &Value, format: Option<&str>) -> String {
    let Some(format) = format.map(str::trim).filter(|f| !f.is_empty()) else {
        return value.to_string();
    };
    let Some(number) = (match value {
        Value::Int(_) | Value::Float(_) => value.as_f64(),
        _ => None,
    }) else {
        return value.to_string();
    };
    let mut chars = format.chars();
    let code = chars.next().map(|c| c.to_ascii_uppercase());
    let digits: Option<usize> = chars.as_str().parse().ok();
    match code {
        Some('N') if digits.is_some() || format.len() == 1 => {
            group_thousands(&format!("{:.*}", digits.unwrap_or(2), number))
        }
        Some('F') if digits.is_some() || format.len() == 1 => {
            format!("{:.*}", digits.unwrap_or(2), number)
        }
        Some('P') if digits.is_some() || format.len() == 1 => {
            format!("{:.*} %", digits.unwrap_or(2), number * 100.0)
        }
        Some('D') if digits.is_some() || format.len() == 1 => {
            let text = format!("{}", number.trunc() as i64);
            let width = digits.unwrap_or(0);
            match text.strip_prefix('-') {
                Some(abs) => format!("-{abs:0>width$}"),
                None => format!("{text:0>width$}"),
            }
        }
        _ if format.contains('0') || format.contains('#') => {
            let decimals = format
                .split_once('.')
                .map(|(_, fraction)| fraction.chars().filter(|c| *c == '0' || *c == '#').count())
                .unwrap_or(0);
            let fixed = format!("{:.*}", decimals, number);
            if format.contains(',') {
                group_thousands(&fixed)
            } else {
                fixed
            }
        }
        _ => value.to_string(),
    }
}

fn group_thousands(fixed: &str) -> String {
    let (sign, unsigned) = match fixed.strip_prefix('-') {
        Some(rest) => ("-", rest),
        None => ("", fixed),
    };
    let (whole, fraction) = match unsigned.split_once('.') {
        Some((whole, fraction)) => (whole, Some(fraction)),
        None => (unsigned, None),
    };
    let mut grouped = String::with_capacity(whole.len() + whole.len() / 3);
    for (index, ch) in whole.chars().enumerate() {
        if index > 0 && (whole.len() - index) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }
    match fraction {
        Some(fraction) => format!("{sign}{grouped}.{fraction}"),
        None => format!("{sign}{grouped}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::ParameterValues;
    use crate::expression::{BuiltinEvaluator, Globals, NoScopes};

    fn build_items(xml: &str) -> (ReportItems, BuildContext) {
        let document = roxmltree::Document::parse(xml).unwrap();
        let mut ctx = BuildContext::new();
        let items = ReportItems::build(&mut ctx, document.root_element());
        (items, ctx)
    }

    #[test]
    fn items_are_ordered_by_z_index() {
        let (items, ctx) = build_items(
            r#"<ReportItems>
                 <Textbox Name="Front"><ZIndex>2</ZIndex><Value>a</Value></Textbox>
                 <Textbox Name="Back"><ZIndex>1</ZIndex><Value>b</Value><CanGrow>true</CanGrow></Textbox>
                 <Line Name="Rule"/>
               </ReportItems>"#,
        );
        let names: Vec<_> = items.iter().filter_map(ReportItem::name).collect();
        assert_eq!(names, vec!["Back", "Front"]);
        assert_eq!(items.grow_list(), vec![0]);
        assert_eq!(ctx.log.entries().len(), 1);
        assert_ne!(items.items[0].id(), items.items[1].id());
    }

    #[test]
    fn drillthrough_parameter_without_name_is_an_error() {
        let (items, ctx) = build_items(
            r#"<ReportItems>
                 <Textbox Name="Link">
                   <Value>Details</Value>
                   <Action><Drillthrough>
                     <ReportName>detail</ReportName>
                     <Parameters>
                       <Parameter Name="Id"><Value>7</Value></Parameter>
                       <Parameter Name="Debug"><Value>1</Value><Omit>true</Omit></Parameter>
                       <Parameter><Value>x</Value></Parameter>
                     </Parameters>
                   </Drillthrough></Action>
                 </Textbox>
               </ReportItems>"#,
        );
        assert!(ctx.log.has_errors());
        let ReportItem::Textbox(textbox) = &items.items[0] else {
            panic!("expected a textbox");
        };
        let mut action = textbox.action.clone().unwrap();
        let mut scope = ResolveScope::for_tests(&[], &[], &[]);
        action.resolve(&mut scope);
        let params = ParameterValues::new();
        let globals = Globals::default();
        let ctx = EvalContext {
            row: None,
            parameters: &params,
            globals: &globals,
            scopes: &NoScopes,
        };
        let link = action
            .drillthrough
            .unwrap()
            .link(&BuiltinEvaluator, &ctx)
            .unwrap();
        assert_eq!(link, "detail?Id=7");
    }

    #[test]
    fn padding_is_evaluated_as_a_size() {
        let (mut items, _) = build_items(
            r#"<ReportItems>
                 <Textbox Name="Padded">
                   <Value>x</Value>
                   <Style><PaddingTop>2pt</PaddingTop><PaddingLeft>=Parameters!Indent.Value</PaddingLeft></Style>
                 </Textbox>
               </ReportItems>"#,
        );
        let mut scope = ResolveScope::for_tests(&[], &["Indent"], &[]);
        items.resolve(&mut scope);
        let params = ParameterValues::new().with("Indent", "0.5in");
        let globals = Globals::default();
        let ctx = EvalContext {
            row: None,
            parameters: &params,
            globals: &globals,
            scopes: &NoScopes,
        };
        let style = &items.items[0].base().style;
        assert_eq!(style.padding(Side::Top, &BuiltinEvaluator, &ctx).unwrap(), Pt::from_i32(2));
        assert_eq!(style.padding(Side::Left, &BuiltinEvaluator, &ctx).unwrap(), Pt::from_i32(36));
        assert_eq!(style.padding(Side::Bottom, &BuiltinEvaluator, &ctx).unwrap(), Pt::ZERO);
    }

    #[test]
    fn numeric_formats() {
        assert_eq!(format_value(&Value::Float(1234.5), Some("N2")), "1,234.50");
        assert_eq!(format_value(&Value::Int(-1234567), Some("N0")), "-1,234,567");
        assert_eq!(format_value(&Value::Float(0.25), Some("P0")), "25 %");
        assert_eq!(format_value(&Value::Int(42), Some("D5")), "00042");
        assert_eq!(format_value(&Value::Float(3.14159), Some("#,##0.00")), "3.14");
        assert_eq!(format_value(&Value::from("text"), Some("N2")), "text");
        assert_eq!(format_value(&Value::Int(7), None), "7");
    }
}
