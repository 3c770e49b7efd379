use std::cmp::Ordering;

use roxmltree::Node;

use crate::definition::{BuildContext, Resolve, ResolveScope, elements, parse_bool, text_of};
use crate::error::Result;
use crate::expression::{EvalContext, Evaluator, Expression};
use crate::value::{TypeCode, compare_typed};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortDirection {
    #[default]
    Ascending,
    Descending,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SortBy {
    pub expression: Expression,
    pub direction: SortDirection,
}

/// Ordered sort keys of a data region or grouping.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Sorting {
    pub sort_by: Vec<SortBy>,
}

impl Sorting {
    pub(crate) fn build(ctx: &mut BuildContext, node: Node<'_, '_>) -> Self {
        let mut sorting = Sorting::default();
        for child in elements(node) {
            if child.tag_name().name() != "SortBy" {
                ctx.log.unknown_element("Sorting", child.tag_name().name());
                continue;
            }
            let mut expression = None;
            let mut direction = SortDirection::Ascending;
            for part in elements(child) {
                match part.tag_name().name() {
                    "SortExpression" => expression = Some(ctx.expression(part, TypeCode::Object)),
                    "Direction" => {
                        direction = if text_of(part).eq_ignore_ascii_case("descending") {
                            SortDirection::Descending
                        } else {
                            SortDirection::Ascending
                        };
                    }
                    other => ctx.log.unknown_element("SortBy", other),
                }
            }
            match expression {
                Some(expression) => sorting.sort_by.push(SortBy {
                    expression,
                    direction,
                }),
                None => ctx.log.error("SortBy requires a SortExpression."),
            }
        }
        if sorting.sort_by.is_empty() {
            ctx.log.error("Sorting requires at least one SortBy.");
        }
        sorting
    }

    pub fn is_empty(&self) -> bool {
        self.sort_by.is_empty()
    }
}

impl Resolve for Sorting {
    fn resolve(&mut self, scope: &mut ResolveScope) {
        for sort_by in &mut self.sort_by {
            sort_by.expression.resolve(scope);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOperator {
    Equal,
    NotEqual,
    GreaterThan,
    GreaterThanOrEqual,
    LessThan,
    LessThanOrEqual,
    In,
}

impl FilterOperator {
    fn parse(raw: &str) -> Option<FilterOperator> {
        Some(match raw {
            "Equal" => FilterOperator::Equal,
            "NotEqual" => FilterOperator::NotEqual,
            "GreaterThan" => FilterOperator::GreaterThan,
            "GreaterThanOrEqual" => FilterOperator::GreaterThanOrEqual,
            "LessThan" => FilterOperator::LessThan,
            "LessThanOrEqual" => FilterOperator::LessThanOrEqual,
            "In" => FilterOperator::In,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    pub expression: Expression,
    pub operator: FilterOperator,
    pub values: Vec<Expression>,
}

impl Filter {
    fn passes(&self, evaluator: &dyn Evaluator, ctx: &EvalContext<'_>) -> Result<bool> {
        let left = self.expression.evaluate(evaluator, ctx)?;
        let type_code = self.expression.expected();
        if self.operator == FilterOperator::In {
            for value in &self.values {
                let right = value.evaluate(evaluator, ctx)?;
                if compare_typed(type_code, &left, &right)? == Ordering::Equal {
                    return Ok(true);
                }
            }
            return Ok(false);
        }
        let Some(value) = self.values.first() else {
            return Ok(false);
        };
        let right = value.evaluate(evaluator, ctx)?;
        let ordering = compare_typed(type_code, &left, &right)?;
        Ok(match self.operator {
            FilterOperator::Equal | FilterOperator::In => ordering == Ordering::Equal,
            FilterOperator::NotEqual => ordering != Ordering::Equal,
            FilterOperator::GreaterThan => ordering == Ordering::Greater,
            FilterOperator::GreaterThanOrEqual => ordering != Ordering::Less,
            FilterOperator::LessThan => ordering == Ordering::Less,
            FilterOperator::LessThanOrEqual => ordering != Ordering::Greater,
        })
    }
}

/// Row filters; a row is kept when every filter passes.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Filters {
    pub filters: Vec<Filter>,
}

impl Filters {
    pub(crate) fn build(ctx: &mut BuildContext, node: Node<'_, '_>) -> Self {
        let mut filters = Filters::default();
        for child in elements(node) {
            if child.tag_name().name() != "Filter" {
                ctx.log.unknown_element("Filters", child.tag_name().name());
                continue;
            }
            let mut expression = None;
            let mut operator = None;
            let mut values = Vec::new();
            for part in elements(child) {
                match part.tag_name().name() {
                    "FilterExpression" => {
                        expression = Some(ctx.expression(part, TypeCode::Object));
                    }
                    "Operator" => {
                        let raw = text_of(part);
                        operator = FilterOperator::parse(&raw);
                        if operator.is_none() {
                            ctx.log
                                .warn(format!("Filter operator '{raw}' is not supported; filter ignored."));
                        }
                    }
                    "FilterValues" => {
                        for value in elements(part) {
                            if value.tag_name().name() == "FilterValue" {
                                values.push(ctx.expression(value, TypeCode::Object));
                            } else {
                                ctx.log.unknown_element("FilterValues", value.tag_name().name());
                            }
                        }
                    }
                    other => ctx.log.unknown_element("Filter", other),
                }
            }
            match (expression, operator) {
                (Some(expression), Some(operator)) => filters.filters.push(Filter {
                    expression,
                    operator,
                    values,
                }),
                (None, _) => ctx.log.error("Filter requires a FilterExpression."),
                _ => {}
            }
        }
        filters
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    pub fn passes(&self, evaluator: &dyn Evaluator, ctx: &EvalContext<'_>) -> Result<bool> {
        for filter in &self.filters {
            if !filter.passes(evaluator, ctx)? {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

impl Resolve for Filters {
    fn resolve(&mut self, scope: &mut ResolveScope) {
        for filter in &mut self.filters {
            filter.expression.resolve(scope);
            for value in &mut filter.values {
                value.resolve(scope);
            }
        }
    }
}

/// One grouping level of a data region.
#[derive(Debug, Clone, PartialEq)]
pub struct Grouping {
    pub name: Option<String>,
    /// Position among the region's grouping levels, outer first.
    pub level: usize,
    pub group_expressions: Vec<Expression>,
    pub page_break_at_start: bool,
    pub page_break_at_end: bool,
    pub filters: Filters,
}

impl Grouping {
    pub(crate) fn build(ctx: &mut BuildContext, node: Node<'_, '_>) -> Self {
        let mut grouping = Grouping {
            name: ctx.name_attr(node, false),
            level: 0,
            group_expressions: Vec::new(),
            page_break_at_start: false,
            page_break_at_end: false,
            filters: Filters::default(),
        };
        for child in elements(node) {
            match child.tag_name().name() {
                "GroupExpressions" => {
                    for expression in elements(child) {
                        if expression.tag_name().name() == "GroupExpression" {
                            grouping
                                .group_expressions
                                .push(ctx.expression(expression, TypeCode::Object));
                        } else {
                            ctx.log
                                .unknown_element("GroupExpressions", expression.tag_name().name());
                        }
                    }
                }
                "PageBreakAtStart" => grouping.page_break_at_start = parse_bool(child),
                "PageBreakAtEnd" => grouping.page_break_at_end = parse_bool(child),
                "Filters" => grouping.filters = Filters::build(ctx, child),
                "Label" | "Parent" | "DataElementName" | "DataCollectionName"
                | "DataElementOutput" | "CustomProperties" => {}
                other => ctx.log.unknown_element("Grouping", other),
            }
        }
        if grouping.group_expressions.is_empty() {
            ctx.log.error("Grouping requires at least one GroupExpression.");
        }
        grouping
    }

    pub fn matches_scope(&self, scope: &str) -> bool {
        self.name
            .as_deref()
            .is_some_and(|name| name.eq_ignore_ascii_case(scope))
    }
}

impl Resolve for Grouping {
    fn resolve(&mut self, scope: &mut ResolveScope) {
        for expression in &mut self.group_expressions {
            expression.resolve(scope);
        }
        self.filters.resolve(scope);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::ParameterValues;
    use crate::expression::{BuiltinEvaluator, Globals, NoScopes};
    use crate::rows::{Field, RowSet};
    use crate::value::Value;

    fn build<T>(xml: &str, f: impl FnOnce(&mut BuildContext, Node<'_, '_>) -> T) -> (T, BuildContext) {
        let document = roxmltree::Document::parse(xml).unwrap();
        let mut ctx = BuildContext::new();
        let built = f(&mut ctx, document.root_element());
        (built, ctx)
    }

    #[test]
    fn empty_sorting_is_an_error() {
        let (sorting, ctx) = build("<Sorting/>", Sorting::build);
        assert!(sorting.is_empty());
        assert!(ctx.log.has_errors());
    }

    #[test]
    fn grouping_reads_keys_and_breaks() {
        let (grouping, ctx) = build(
            r#"<Grouping Name="ByRegion">
                 <GroupExpressions><GroupExpression>=Fields!Region.Value</GroupExpression></GroupExpressions>
                 <PageBreakAtEnd>true</PageBreakAtEnd>
               </Grouping>"#,
            Grouping::build,
        );
        assert_eq!(grouping.name.as_deref(), Some("ByRegion"));
        assert_eq!(grouping.group_expressions.len(), 1);
        assert!(grouping.page_break_at_end);
        assert!(!grouping.page_break_at_start);
        assert!(grouping.matches_scope("byregion"));
        assert!(ctx.log.is_empty());
    }

    #[test]
    fn filters_apply_operators() {
        let (mut filters, ctx) = build(
            r#"<Filters>
                 <Filter>
                   <FilterExpression>=Fields!Amount.Value</FilterExpression>
                   <Operator>GreaterThan</Operator>
                   <FilterValues><FilterValue>10</FilterValue></FilterValues>
                 </Filter>
                 <Filter>
                   <FilterExpression>=Fields!Region.Value</FilterExpression>
                   <Operator>In</Operator>
                   <FilterValues><FilterValue>North</FilterValue><FilterValue>East</FilterValue></FilterValues>
                 </Filter>
                 <Filter>
                   <FilterExpression>=Fields!Region.Value</FilterExpression>
                   <Operator>Like</Operator>
                   <FilterValues><FilterValue>N*</FilterValue></FilterValues>
                 </Filter>
               </Filters>"#,
            Filters::build,
        );
        assert_eq!(filters.filters.len(), 2);
        assert!(!ctx.log.has_errors());
        assert_eq!(ctx.log.entries().len(), 1);

        let mut scope = ResolveScope::for_tests(&["Region", "Amount"], &[], &[]);
        filters.resolve(&mut scope);

        let rows = RowSet::new(
            vec![
                Field::new("Region", TypeCode::String),
                Field::new("Amount", TypeCode::Int64),
            ],
            vec![
                vec!["North".into(), 20.into()],
                vec!["South".into(), 30.into()],
                vec!["East".into(), 5.into()],
            ],
        );
        let params = ParameterValues::new();
        let globals = Globals::default();
        let kept: Vec<usize> = rows
            .rows()
            .iter()
            .filter(|row| {
                let ctx = EvalContext {
                    row: Some(row),
                    parameters: &params,
                    globals: &globals,
                    scopes: &NoScopes,
                };
                filters.passes(&BuiltinEvaluator, &ctx).unwrap()
            })
            .map(|row| row.index())
            .collect();
        assert_eq!(kept, vec![0]);
        assert_eq!(Value::from("North"), rows.rows()[kept[0]].get(0).clone());
    }
}
