use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::sync::Arc;

use serde_json::json;

use crate::data_region::DataRegionBase;
use crate::debug::DebugLogger;
use crate::definition::{ParameterValues, ReportDefinition};
use crate::error::{ReportError, Result};
use crate::expression::{EvalContext, Evaluator, Expression, Globals, NoScopes, ScopeResolver};
use crate::font::{FontSpec, TextMeasure};
use crate::group_spec::{Filters, Grouping, Sorting};
use crate::grouping::{GroupEntry, GroupTree, build_group_tree, filter_rows, group_debug_enabled};
use crate::metrics::RenderMetrics;
use crate::perf::{PerfLogger, PerfSpan};
use crate::report_items::{ItemBase, ReportItem, Side, Style, Textbox, format_value};
use crate::rows::{Row, RowSet, RowSource, RowWindow};
use crate::state::{ExecutionHandle, NodeId, StateStore, WorkScope};
use crate::textflow::{TextAlign, TextFlow};
use crate::types::Pt;
use crate::value::Value;

/// A data region currently being rendered, innermost last.
struct ActiveRegion {
    node: NodeId,
    name: Option<String>,
    data_set: String,
    levels: Vec<Option<String>>,
    /// Textboxes whose hide-duplicates memory belongs to this region.
    tracked: Vec<NodeId>,
}

/// Everything one render needs. Dropping it releases the execution's state.
pub(crate) struct Execution<'a> {
    pub def: &'a ReportDefinition,
    pub handle: ExecutionHandle,
    store: &'a StateStore,
    pub evaluator: &'a dyn Evaluator,
    pub measure: &'a dyn TextMeasure,
    pub default_font: FontSpec,
    pub parameters: ParameterValues,
    data: HashMap<String, Arc<RowSet>>,
    regions: RefCell<Vec<ActiveRegion>>,
    page_number: Cell<usize>,
    total_pages: Cell<usize>,
    debug: Option<&'a DebugLogger>,
    perf: Option<&'a PerfLogger>,
    metrics: RefCell<RenderMetrics>,
}

pub(crate) struct ExecutionSetup<'a> {
    pub store: &'a StateStore,
    pub source: &'a dyn RowSource,
    pub evaluator: &'a dyn Evaluator,
    pub measure: &'a dyn TextMeasure,
    pub default_font: FontSpec,
    pub debug: Option<&'a DebugLogger>,
    pub perf: Option<&'a PerfLogger>,
}

impl<'a> Execution<'a> {
    /// Resolves parameters and fetches every data set before layout starts.
    pub fn start(
        def: &'a ReportDefinition,
        setup: ExecutionSetup<'a>,
        overrides: &ParameterValues,
    ) -> Result<Self> {
        let mut execution = Execution {
            def,
            handle: setup.store.begin_execution(),
            store: setup.store,
            evaluator: setup.evaluator,
            measure: setup.measure,
            default_font: setup.default_font,
            parameters: ParameterValues::new(),
            data: HashMap::new(),
            regions: RefCell::new(Vec::new()),
            page_number: Cell::new(1),
            total_pages: Cell::new(1),
            debug: setup.debug,
            perf: setup.perf,
            metrics: RefCell::new(RenderMetrics::default()),
        };
        execution.parameters = resolve_parameters(def, overrides, setup.evaluator)?;

        let _span = PerfSpan::start(setup.perf, "fetch", Some(execution.handle.get()));
        for data_set in &def.data_sets {
            let Some(name) = data_set.name.as_deref() else {
                continue;
            };
            let fetched = setup.source.fetch(data_set, &execution.parameters)?;
            let rows = data_set.conform(fetched);
            log::debug!("data set {name}: {} rows", rows.len());
            execution
                .data
                .insert(name.to_ascii_lowercase(), Arc::new(rows));
        }
        Ok(execution)
    }

    pub fn perf(&self) -> Option<&'a PerfLogger> {
        self.perf
    }

    pub fn globals(&self) -> Globals {
        Globals {
            page_number: self.page_number.get(),
            total_pages: self.total_pages.get(),
            report_name: self.def.name.clone(),
        }
    }

    pub fn set_page(&self, number: usize, total: usize) {
        self.page_number.set(number);
        self.total_pages.set(total);
    }

    pub fn with_ctx<R>(&self, row: Option<&Row>, f: impl FnOnce(&EvalContext<'_>) -> R) -> R {
        let globals = self.globals();
        let ctx = EvalContext {
            row,
            parameters: &self.parameters,
            globals: &globals,
            scopes: self,
        };
        f(&ctx)
    }

    /// Evaluates `expr` and tags failures with the node name and row.
    pub fn evaluate(&self, expr: &Expression, row: Option<&Row>, node: &str) -> Result<Value> {
        self.with_ctx(row, |ctx| expr.evaluate(self.evaluator, ctx))
            .map_err(|err| err.at(node, row.map(Row::index)))
    }

    pub fn is_hidden(&self, base: &ItemBase, row: Option<&Row>) -> Result<bool> {
        self.with_ctx(row, |ctx| base.is_hidden(self.evaluator, ctx))
            .map_err(|err| err.at(base.display_name(), row.map(Row::index)))
    }

    pub fn padding(&self, base: &ItemBase, side: Side, row: Option<&Row>) -> Result<Pt> {
        self.style_padding(&base.style, side, row, base.display_name())
    }

    pub fn style_padding(&self, style: &Style, side: Side, row: Option<&Row>, node: &str) -> Result<Pt> {
        self.with_ctx(row, |ctx| style.padding(side, self.evaluator, ctx))
            .map_err(|err| err.at(node, row.map(Row::index)))
    }

    pub fn font_for(&self, style: &Style) -> FontSpec {
        let family = style
            .font_family
            .clone()
            .unwrap_or_else(|| self.default_font.family.clone());
        let size = style.font_size.unwrap_or(self.default_font.size);
        FontSpec::new(family, size).styled(style.bold, style.italic)
    }

    /// Formatted textbox value; empty when hidden as a duplicate.
    ///
    /// With `commit` unset the hide-duplicates memory is only consulted, so a
    /// height measurement does not hide the value it measured.
    pub fn textbox_text(&self, textbox: &Textbox, row: Option<&Row>, commit: bool) -> Result<String> {
        let name = textbox.base.display_name();
        let value = self.evaluate(&textbox.value, row, name)?;
        if self.is_duplicate(textbox, &value, commit) {
            return Ok(String::new());
        }
        Ok(format_value(&value, textbox.base.style.format.as_deref()))
    }

    fn is_duplicate(&self, textbox: &Textbox, value: &Value, commit: bool) -> bool {
        let Some(scope) = textbox.hide_duplicates.as_deref() else {
            return false;
        };
        let epoch = self.window(Some(scope)).map(|w| w.start).unwrap_or(0);
        let id = textbox.base.id;
        if commit {
            if let Some(region) = self.regions.borrow_mut().last_mut() {
                if !region.tracked.contains(&id) {
                    region.tracked.push(id);
                }
            }
        }
        self.store.with_state(id, self.handle, |state| {
            let duplicate = state
                .last_value
                .as_ref()
                .is_some_and(|(last_epoch, last)| *last_epoch == epoch && last == value);
            if commit {
                state.last_value = Some((epoch, value.clone()));
            }
            duplicate
        })
    }

    /// Drillthrough or hyperlink target of a textbox.
    pub fn link(&self, textbox: &Textbox, row: Option<&Row>) -> Result<Option<String>> {
        let Some(action) = &textbox.action else {
            return Ok(None);
        };
        let name = textbox.base.display_name();
        if let Some(drillthrough) = &action.drillthrough {
            return self
                .with_ctx(row, |ctx| drillthrough.link(self.evaluator, ctx))
                .map(Some)
                .map_err(|err| err.at(name, row.map(Row::index)));
        }
        match &action.hyperlink {
            Some(hyperlink) => Ok(Some(self.evaluate(hyperlink, row, name)?.to_string())),
            None => Ok(None),
        }
    }

    /// Height of a textbox for `row`, honoring CanGrow and CanShrink.
    pub fn textbox_height(&self, textbox: &Textbox, row: Option<&Row>, width: Pt) -> Result<Pt> {
        let base = &textbox.base;
        if !textbox.can_grow && !textbox.can_shrink {
            return Ok(base.height);
        }
        let text = self.textbox_text(textbox, row, false)?;
        let horizontal = self.padding(base, Side::Left, row)? + self.padding(base, Side::Right, row)?;
        let vertical = self.padding(base, Side::Top, row)? + self.padding(base, Side::Bottom, row)?;
        let font = self.font_for(&base.style);
        let measured = TextFlow::new(self.measure, font)
            .align(base.style.text_align.unwrap_or(TextAlign::Left))
            .measure_height(&text, (width - horizontal).max(Pt::ZERO))
            + vertical;
        Ok(match (textbox.can_grow, textbox.can_shrink) {
            (true, true) => measured,
            (true, false) => base.height.max(measured),
            _ => base.height.min(measured),
        })
    }

    /// Height of one list repetition: the list height, stretched by growing textboxes.
    pub fn list_row_height(&self, items: &[ReportItem], grow: &[usize], default: Pt, row: Option<&Row>) -> Result<Pt> {
        let mut height = default;
        for &index in grow {
            if let Some(ReportItem::Textbox(textbox)) = items.get(index) {
                if self.is_hidden(&textbox.base, row)? {
                    continue;
                }
                let measured = self.textbox_height(textbox, row, textbox.base.width)?;
                height = height.max(textbox.base.top + measured);
            }
        }
        Ok(height)
    }

    /// Binds a data region: selects its rows, filters, sorts and groups them.
    pub fn open_region<'e>(
        &'e self,
        base: &ItemBase,
        region: &DataRegionBase,
        levels: &[&Grouping],
        sorting: Option<&Sorting>,
    ) -> Result<RegionFrame<'e, 'a>> {
        let name = base.display_name();
        let data_set = self.region_data_set(region, name)?;
        let source = self.region_source_rows(&data_set)?;

        let mut filters: Vec<&Filters> = vec![&region.filters];
        filters.extend(levels.iter().map(|grouping| &grouping.filters));
        let tree = self
            .with_ctx(None, |ctx| {
                let filtered = filter_rows(&source, &filters, self.evaluator, ctx)?;
                build_group_tree(&filtered, levels, sorting, self.evaluator, ctx)
            })
            .map_err(|err| err.at(name, None))?;

        self.metrics.borrow_mut().groups_built += tree.entry_count();
        if group_debug_enabled() {
            if let Some(debug) = self.debug {
                debug.log_event(json!({
                    "type": "groups",
                    "execution": self.handle.get(),
                    "region": name,
                    "tree": tree.to_json(),
                }));
            }
        }

        let tree = Arc::new(tree);
        let scope = self.store.scope(base.id, self.handle);
        scope.with(|state| {
            state.data = Some(Arc::clone(&tree.rows));
            state.current = vec![None; levels.len()];
        });
        self.regions.borrow_mut().push(ActiveRegion {
            node: base.id,
            name: base.name.clone(),
            data_set,
            levels: levels.iter().map(|grouping| grouping.name.clone()).collect(),
            tracked: Vec::new(),
        });
        Ok(RegionFrame {
            execution: self,
            scope,
            tree,
        })
    }

    fn region_data_set(&self, region: &DataRegionBase, name: &str) -> Result<String> {
        if let Some(data_set) = &region.data_set_name {
            return Ok(data_set.clone());
        }
        if let Some(parent) = self.regions.borrow().last() {
            return Ok(parent.data_set.clone());
        }
        self.def
            .default_data_set()
            .and_then(|data_set| data_set.name.clone())
            .ok_or_else(|| ReportError::evaluation(name, None, "data region has no data set"))
    }

    /// The data set's rows, or the enclosing region's current group when it is
    /// bound to the same data set.
    fn region_source_rows(&self, data_set: &str) -> Result<RowSet> {
        let parent_window = self
            .regions
            .borrow()
            .last()
            .filter(|parent| parent.data_set.eq_ignore_ascii_case(data_set))
            .and_then(|parent| {
                self.store
                    .inspect(parent.node, self.handle, |state| state.innermost_window())
                    .flatten()
            });
        if let Some(window) = parent_window {
            return Ok(window.rows.slice(window.start, window.end));
        }
        self.data
            .get(&data_set.to_ascii_lowercase())
            .map(|rows| rows.as_ref().clone())
            .ok_or_else(|| ReportError::MissingDataSet(data_set.to_string()))
    }

    pub fn visit_row(&self) {
        self.metrics.borrow_mut().rows_visited += 1;
    }

    pub fn log_page_break(&self, reason: &str, from_page: usize, region: &str) {
        self.metrics.borrow_mut().page_breaks += 1;
        let Some(debug) = self.debug else {
            return;
        };
        debug.log_event(json!({
            "type": "page_break",
            "execution": self.handle.get(),
            "reason": reason,
            "from_page": from_page,
            "to_page": from_page + 1,
            "region": region,
        }));
        debug.increment(&format!("page_break.{reason}"), 1);
    }

    pub fn take_metrics(&self) -> RenderMetrics {
        self.metrics.take()
    }
}

impl ScopeResolver for Execution<'_> {
    fn window(&self, scope: Option<&str>) -> Option<RowWindow> {
        let regions = self.regions.borrow();
        let inspect = |node: NodeId, level: Option<usize>| {
            self.store
                .inspect(node, self.handle, |state| match level {
                    Some(level) => state.window(Some(level)),
                    None => state.window(None),
                })
                .flatten()
        };
        let Some(scope) = scope else {
            return match regions.last() {
                Some(region) => self
                    .store
                    .inspect(region.node, self.handle, |state| state.innermost_window())
                    .flatten(),
                None => self
                    .def
                    .default_data_set()
                    .and_then(|data_set| data_set.name.as_deref())
                    .and_then(|name| self.data.get(&name.to_ascii_lowercase()))
                    .map(|rows| RowWindow::all(Arc::clone(rows))),
            };
        };
        for region in regions.iter().rev() {
            let level = region
                .levels
                .iter()
                .position(|level| level.as_deref().is_some_and(|l| l.eq_ignore_ascii_case(scope)));
            if let Some(level) = level {
                return inspect(region.node, Some(level));
            }
            if region
                .name
                .as_deref()
                .is_some_and(|name| name.eq_ignore_ascii_case(scope))
            {
                return inspect(region.node, None);
            }
        }
        self.data
            .get(&scope.to_ascii_lowercase())
            .map(|rows| RowWindow::all(Arc::clone(rows)))
    }
}

impl Drop for Execution<'_> {
    fn drop(&mut self) {
        let released = self.store.release_execution(self.handle);
        if released > 0 {
            log::debug!(
                "execution {} released {released} state records",
                self.handle.get()
            );
        }
    }
}

/// A bound data region. Dropping it forgets the region's state.
pub(crate) struct RegionFrame<'e, 'a> {
    execution: &'e Execution<'a>,
    scope: WorkScope<'e>,
    pub tree: Arc<GroupTree>,
}

impl RegionFrame<'_, '_> {
    /// Makes `entry` the current instance of its level and clears deeper levels.
    pub fn enter(&self, entry: &GroupEntry) {
        let Some(level) = entry.level else {
            return;
        };
        self.scope.with(|state| {
            for (index, slot) in state.current.iter_mut().enumerate().skip(level) {
                *slot = (index == level).then(|| entry.row_range());
            }
        });
    }

    /// Leaves every group level, so the whole region is the current scope.
    pub fn reset(&self) {
        self.scope.with(|state| state.current.iter_mut().for_each(|slot| *slot = None));
    }

    pub fn row(&self, index: usize) -> Option<&Row> {
        self.tree.rows.row(index)
    }

    /// Rows of `entry` in order.
    pub fn rows_of<'t>(&'t self, entry: &GroupEntry) -> impl Iterator<Item = &'t Row> + 't {
        let (start, end) = entry.row_range();
        let end = if end < 0 { 0 } else { end as usize + 1 };
        self.tree
            .rows
            .rows()
            .get(start..end.max(start))
            .unwrap_or_default()
            .iter()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.rows.is_empty()
    }

    pub fn set_calc_height(&self, height: Pt) {
        self.scope.with(|state| state.calc_height = Some(height));
    }

    /// Height recorded for the row being laid out.
    pub fn calc_height(&self) -> Option<Pt> {
        self.scope.with(|state| state.calc_height)
    }
}

impl Drop for RegionFrame<'_, '_> {
    fn drop(&mut self) {
        let popped = self.execution.regions.borrow_mut().pop();
        if let Some(region) = popped {
            for node in region.tracked {
                self.execution.store.remove(node, self.execution.handle);
            }
        }
    }
}

/// Default values overridden by the caller's, converted to each parameter's type.
pub(crate) fn resolve_parameters(
    def: &ReportDefinition,
    overrides: &ParameterValues,
    evaluator: &dyn Evaluator,
) -> Result<ParameterValues> {
    let mut values = ParameterValues::new();
    let empty = ParameterValues::new();
    let globals = Globals::default();
    let ctx = EvalContext {
        row: None,
        parameters: &empty,
        globals: &globals,
        scopes: &NoScopes,
    };
    for parameter in &def.parameters {
        let Some(name) = parameter.name.as_deref() else {
            continue;
        };
        let value = match overrides.get(name) {
            Some(value) => value.clone(),
            None => match parameter.default_values.first() {
                Some(default) => default
                    .evaluate(evaluator, &ctx)
                    .map_err(|err| err.at(name, None))?,
                None => Value::Null,
            },
        };
        let value = value
            .convert(parameter.data_type)
            .map_err(|err| ReportError::evaluation(name, None, err.to_string()))?;
        if value.is_null() && !parameter.nullable {
            return Err(ReportError::evaluation(
                name,
                None,
                "parameter requires a value",
            ));
        }
        values.set(name, value);
    }
    Ok(values)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::font::FontRegistry;
    use crate::rows::{Field, MemoryRowSource};
    use crate::value::TypeCode;

    const REPORT: &str = r#"
        <Report>
          <ReportParameters>
            <ReportParameter Name="Year">
              <DataType>Integer</DataType>
              <DefaultValue><Values><Value>2024</Value></Values></DefaultValue>
            </ReportParameter>
            <ReportParameter Name="Note"><DataType>String</DataType><Nullable>true</Nullable></ReportParameter>
          </ReportParameters>
          <DataSets>
            <DataSet Name="Sales">
              <Fields>
                <Field Name="Region"><DataField>Region</DataField></Field>
                <Field Name="Amount"><DataField>Amount</DataField><TypeName>System.Int64</TypeName></Field>
              </Fields>
            </DataSet>
          </DataSets>
          <Body><ReportItems>
            <List Name="Regions">
              <Grouping Name="ByRegion">
                <GroupExpressions><GroupExpression>=Fields!Region.Value</GroupExpression></GroupExpressions>
              </Grouping>
              <ReportItems>
                <Textbox Name="Total"><Value>=Sum(Fields!Amount.Value)</Value></Textbox>
              </ReportItems>
            </List>
          </ReportItems></Body>
        </Report>"#;

    fn source() -> MemoryRowSource {
        MemoryRowSource::new().with_data_set(
            "Sales",
            RowSet::new(
                vec![
                    Field::new("Region", TypeCode::String),
                    Field::new("Amount", TypeCode::Int64),
                ],
                vec![
                    vec!["North".into(), 10.into()],
                    vec!["North".into(), 5.into()],
                    vec!["South".into(), 7.into()],
                ],
            ),
        )
    }

    fn setup<'a>(
        store: &'a StateStore,
        source: &'a MemoryRowSource,
        fonts: &'a FontRegistry,
    ) -> ExecutionSetup<'a> {
        ExecutionSetup {
            store,
            source,
            evaluator: &crate::expression::BuiltinEvaluator,
            measure: fonts,
            default_font: FontSpec::new("Helvetica", Pt::from_i32(10)),
            debug: None,
            perf: None,
        }
    }

    #[test]
    fn parameters_take_defaults_and_overrides() {
        let def = ReportDefinition::parse(REPORT).unwrap();
        let store = StateStore::new();
        let source = source();
        let fonts = FontRegistry::new();
        let execution = Execution::start(&def, setup(&store, &source, &fonts), &ParameterValues::new()).unwrap();
        assert_eq!(execution.parameters.get("year"), Some(&Value::Int(2024)));
        assert_eq!(execution.parameters.get("Note"), Some(&Value::Null));

        let overrides = ParameterValues::new().with("Year", "2025");
        let execution = Execution::start(&def, setup(&store, &source, &fonts), &overrides).unwrap();
        assert_eq!(execution.parameters.get("Year"), Some(&Value::Int(2025)));
    }

    #[test]
    fn group_scope_follows_current_entry() {
        let def = ReportDefinition::parse(REPORT).unwrap();
        let store = StateStore::new();
        let source = source();
        let fonts = FontRegistry::new();
        let execution = Execution::start(&def, setup(&store, &source, &fonts), &ParameterValues::new()).unwrap();
        let ReportItem::List(list) = &def.body.items.items[0] else {
            panic!("expected a list");
        };
        let ReportItem::Textbox(total) = &list.items.items[0] else {
            panic!("expected a textbox");
        };
        {
            let frame = execution
                .open_region(&list.base, &list.region, &list.levels(), list.sorting.as_ref())
                .unwrap();
            let totals: Vec<String> = frame
                .tree
                .entries
                .iter()
                .map(|entry| {
                    frame.enter(entry);
                    let row = frame.row(entry.start_row);
                    execution.textbox_text(total, row, true).unwrap()
                })
                .collect();
            assert_eq!(totals, vec!["15", "7"]);
            assert_eq!(frame.rows_of(&frame.tree.entries[0]).count(), 2);
            assert_eq!(store.len(), 1);
        }
        assert!(store.is_empty());
        drop(execution);
        assert!(store.is_empty());
    }

    #[test]
    fn missing_data_set_fails_and_releases_state() {
        let def = ReportDefinition::parse(REPORT).unwrap();
        let store = StateStore::new();
        let source = MemoryRowSource::new();
        let fonts = FontRegistry::new();
        let err = match Execution::start(&def, setup(&store, &source, &fonts), &ParameterValues::new()) {
            Ok(_) => panic!("expected a missing data set"),
            Err(err) => err,
        };
        assert!(matches!(err, ReportError::MissingDataSet(ref name) if name == "Sales"));
        assert!(store.is_empty());
    }

    #[test]
    fn non_nullable_parameter_without_value_is_an_error() {
        let xml = r#"<Report><ReportParameters>
                       <ReportParameter Name="Region"><DataType>String</DataType></ReportParameter>
                     </ReportParameters><Body/></Report>"#;
        let def = ReportDefinition::parse(xml).unwrap();
        let err = match resolve_parameters(&def, &ParameterValues::new(), &crate::expression::BuiltinEvaluator) {
            Ok(values) => panic!("unexpected {values:?}"),
            Err(err) => err,
        };
        assert!(matches!(err, ReportError::Evaluation { ref node, .. } if node == "Region"));
    }
}
