mod canvas;
mod data_region;
mod debug;
mod definition;
mod diagnostics;
mod error;
mod execution;
mod expression;
mod font;
mod group_spec;
mod grouping;
mod metrics;
mod pages;
mod paginate;
mod perf;
mod present;
mod render;
mod report_items;
mod rows;
mod state;
mod stream;
mod textflow;
mod types;
mod value;

pub use canvas::{Command, Page};
pub use data_region::{
    DataRegionBase, Details, List, Table, TableCell, TableGroup, TableRow, TableSection,
};
pub use definition::{
    Body, DataSetDefinition, DataSetField, PageSection, ParameterValues, ReportDefinition,
    ReportParameter, parse_size,
};
pub use diagnostics::{DefinitionLog, Diagnostic, SEVERITY_ERROR, SEVERITY_WARNING};
pub use error::{ReportError, Result};
pub use expression::{
    AggregateFunc, BuiltinEvaluator, EvalContext, Evaluator, ExprKind, Expression, FieldRef,
    GlobalName, Globals, ScopeResolver,
};
pub use font::{FontRegistry, FontSpec, TextMeasure};
pub use group_spec::{Filter, FilterOperator, Filters, Grouping, SortBy, SortDirection, Sorting};
pub use grouping::{GroupEntry, GroupTree, build_group_tree, filter_rows, sort_rows};
pub use metrics::{PageMetrics, RenderMetrics};
pub use pages::PagedReport;
pub use present::{ContainerKind, EntryKind, Presenter, PresenterEvent, RecordingPresenter};
pub use report_items::{
    Action, Chart, Drillthrough, DrillthroughParameter, ItemBase, PlotArea, Rectangle, ReportItem,
    ReportItems, Side, Style, Textbox, Visibility, format_value,
};
pub use rows::{Field, MemoryRowSource, Row, RowSet, RowSource, RowWindow};
pub use state::{ExecutionHandle, NodeId, StateStore, WorkState};
pub use stream::StreamSequencer;
pub use textflow::{FlowLayout, TextAlign, TextFlow, WordPlacement, draw_flow};
pub use types::{Color, Margins, Pt, Rect, Size};
pub use value::{TypeCode, Value, compare_typed};

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use sha2::{Digest, Sha256};

use debug::DebugLogger;
use execution::{Execution, ExecutionSetup};
use perf::{PerfLogger, PerfSpan};

/// Loads report definitions and renders them against row sources.
///
/// An engine is shared freely between threads: definitions are immutable
/// once loaded and every render keeps its mutable state in the engine's
/// [`StateStore`] under its own execution handle.
pub struct ReportEngine {
    fonts: Arc<FontRegistry>,
    default_font: FontSpec,
    evaluator: Arc<dyn Evaluator>,
    strict_definitions: bool,
    page_size: Option<Size>,
    store: StateStore,
    definitions: Mutex<HashMap<[u8; 32], Arc<ReportDefinition>>>,
    debug: Option<Arc<DebugLogger>>,
    perf: Option<Arc<PerfLogger>>,
}

#[derive(Clone)]
pub struct ReportEngineBuilder {
    font_family: String,
    font_size: Pt,
    font_dirs: Vec<PathBuf>,
    font_files: Vec<PathBuf>,
    unicode_metrics: bool,
    strict_definitions: bool,
    evaluator: Arc<dyn Evaluator>,
    page_size: Option<Size>,
    debug_path: Option<PathBuf>,
    perf_path: Option<PathBuf>,
}

/// One report of a [`ReportEngine::paginate_batch`] call.
pub struct PaginateJob<'a> {
    pub definition: Arc<ReportDefinition>,
    pub source: &'a dyn RowSource,
    pub parameters: ParameterValues,
}

impl Default for ReportEngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ReportEngineBuilder {
    pub fn new() -> Self {
        Self {
            font_family: "Helvetica".to_string(),
            font_size: Pt::from_i32(10),
            font_dirs: Vec::new(),
            font_files: Vec::new(),
            unicode_metrics: true,
            strict_definitions: false,
            evaluator: Arc::new(BuiltinEvaluator),
            page_size: None,
            debug_path: None,
            perf_path: None,
        }
    }

    pub fn default_font(mut self, family: impl Into<String>, size: Pt) -> Self {
        self.font_family = family.into();
        self.font_size = size;
        self
    }

    pub fn register_font_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.font_dirs.push(path.into());
        self
    }

    pub fn register_font_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.font_files.push(path.into());
        self
    }

    // Measure every code point with the registered faces instead of the
    // Latin-1 fast path.
    pub fn unicode_metrics(mut self, enabled: bool) -> Self {
        self.unicode_metrics = enabled;
        self
    }

    /// Refuse definitions whose diagnostics contain errors.
    pub fn strict_definitions(mut self, enabled: bool) -> Self {
        self.strict_definitions = enabled;
        self
    }

    pub fn evaluator(mut self, evaluator: Arc<dyn Evaluator>) -> Self {
        self.evaluator = evaluator;
        self
    }

    /// Overrides the page size of every definition this engine loads.
    pub fn page_size(mut self, size: Size) -> Self {
        self.page_size = Some(size);
        self
    }

    pub fn debug_log(mut self, path: impl Into<PathBuf>) -> Self {
        self.debug_path = Some(path.into());
        self
    }

    pub fn perf_log(mut self, path: impl Into<PathBuf>) -> Self {
        self.perf_path = Some(path.into());
        self
    }

    pub fn build(self) -> Result<ReportEngine> {
        if self.font_family.trim().is_empty() {
            return Err(ReportError::InvalidConfiguration(
                "default font family must not be empty".to_string(),
            ));
        }
        if self.font_size <= Pt::ZERO {
            return Err(ReportError::InvalidConfiguration(
                "default font size must be positive".to_string(),
            ));
        }
        if let Some(size) = self.page_size {
            if size.width <= Pt::ZERO || size.height <= Pt::ZERO {
                return Err(ReportError::InvalidConfiguration(
                    "page size must be positive".to_string(),
                ));
            }
        }
        let mut registry = FontRegistry::new();
        registry.set_use_full_unicode_metrics(self.unicode_metrics);
        for dir in &self.font_dirs {
            let count = registry.register_dir(dir);
            log::debug!("registered {count} fonts from {}", dir.display());
        }
        for file in &self.font_files {
            if !registry.register_file(file) {
                return Err(ReportError::InvalidConfiguration(format!(
                    "cannot load font file {}",
                    file.display()
                )));
            }
        }
        let debug = if let Some(path) = self.debug_path {
            Some(Arc::new(DebugLogger::new(path)?))
        } else {
            None
        };
        let perf = if let Some(path) = self.perf_path {
            Some(Arc::new(PerfLogger::new(path)?))
        } else {
            None
        };
        Ok(ReportEngine {
            fonts: Arc::new(registry),
            default_font: FontSpec::new(self.font_family, self.font_size),
            evaluator: self.evaluator,
            strict_definitions: self.strict_definitions,
            page_size: self.page_size,
            store: StateStore::new(),
            definitions: Mutex::new(HashMap::new()),
            debug,
            perf,
        })
    }
}

impl ReportEngine {
    pub fn builder() -> ReportEngineBuilder {
        ReportEngineBuilder::new()
    }

    pub fn fonts(&self) -> &FontRegistry {
        &self.fonts
    }

    /// Live render state. Empty whenever no render is running.
    pub fn state_store(&self) -> &StateStore {
        &self.store
    }

    fn emit_debug_summary(&self, context: &str) {
        if let Some(logger) = self.debug.as_deref() {
            logger.emit_summary(context);
            logger.flush();
        }
        if let Some(perf) = self.perf.as_deref() {
            perf.flush();
        }
    }

    /// Parses and resolves a definition, or returns the cached copy of an
    /// identical document.
    pub fn load_definition(&self, xml: &str) -> Result<Arc<ReportDefinition>> {
        let mut key = [0u8; 32];
        key.copy_from_slice(&Sha256::digest(xml.as_bytes()));
        if let Some(cached) = self.lock_definitions().get(&key) {
            return Ok(Arc::clone(cached));
        }

        let _span = PerfSpan::start(self.perf.as_deref(), "definition.load", None);
        let mut definition = ReportDefinition::parse(xml)?;
        if let Some(size) = self.page_size {
            definition.page_size = size;
        }
        let diagnostics = &definition.diagnostics;
        if self.strict_definitions && diagnostics.has_errors() {
            let first = diagnostics
                .entries()
                .iter()
                .find(|entry| entry.severity >= SEVERITY_ERROR)
                .map(|entry| entry.message.clone())
                .unwrap_or_default();
            return Err(ReportError::InvalidDefinition(first));
        }
        if let Some(debug) = self.debug.as_deref() {
            debug.log_event(serde_json::json!({
                "type": "definition",
                "name": definition.name,
                "nodes": definition.node_count(),
                "diagnostics": diagnostics.entries().len(),
                "max_severity": diagnostics.max_severity(),
            }));
        }

        let definition = Arc::new(definition);
        self.lock_definitions()
            .entry(key)
            .or_insert_with(|| Arc::clone(&definition));
        Ok(definition)
    }

    fn lock_definitions(&self) -> std::sync::MutexGuard<'_, HashMap<[u8; 32], Arc<ReportDefinition>>> {
        self.definitions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn start<'a>(
        &'a self,
        definition: &'a ReportDefinition,
        source: &'a dyn RowSource,
        parameters: &ParameterValues,
    ) -> Result<Execution<'a>> {
        Execution::start(
            definition,
            ExecutionSetup {
                store: &self.store,
                source,
                evaluator: self.evaluator.as_ref(),
                measure: self.fonts.as_ref(),
                default_font: self.default_font.clone(),
                debug: self.debug.as_deref(),
                perf: self.perf.as_deref(),
            },
            parameters,
        )
    }

    /// Streams the report through `presenter` without pagination.
    pub fn render(
        &self,
        definition: &ReportDefinition,
        source: &dyn RowSource,
        parameters: &ParameterValues,
        presenter: &mut dyn Presenter,
    ) -> Result<RenderMetrics> {
        let result = self.render_inner(definition, source, parameters, presenter);
        self.emit_debug_summary("render");
        result
    }

    fn render_inner(
        &self,
        definition: &ReportDefinition,
        source: &dyn RowSource,
        parameters: &ParameterValues,
        presenter: &mut dyn Presenter,
    ) -> Result<RenderMetrics> {
        let execution = self.start(definition, source, parameters)?;
        let span = PerfSpan::start(self.perf.as_deref(), "render", Some(execution.handle.get()));
        render::present_report(&execution, presenter)?;
        let mut metrics = execution.take_metrics();
        metrics.total_render_ms = span.elapsed_ms();
        self.log_counts("render", &execution, &metrics);
        Ok(metrics)
    }

    /// Lays the report out on fixed-size pages.
    pub fn paginate(
        &self,
        definition: &ReportDefinition,
        source: &dyn RowSource,
        parameters: &ParameterValues,
    ) -> Result<PagedReport> {
        let result = self.paginate_inner(definition, source, parameters);
        self.emit_debug_summary("paginate");
        result
    }

    fn paginate_inner(
        &self,
        definition: &ReportDefinition,
        source: &dyn RowSource,
        parameters: &ParameterValues,
    ) -> Result<PagedReport> {
        let execution = self.start(definition, source, parameters)?;
        let span = PerfSpan::start(self.perf.as_deref(), "paginate", Some(execution.handle.get()));
        let mut report = paginate::paginate_report(&execution)?;
        report.metrics.total_render_ms = span.elapsed_ms();
        self.log_counts("paginate", &execution, &report.metrics);
        Ok(report)
    }

    /// Paginates several reports in parallel; results keep the input order.
    pub fn paginate_batch(&self, jobs: &[PaginateJob<'_>]) -> Vec<Result<PagedReport>> {
        use rayon::prelude::*;

        let results = jobs
            .par_iter()
            .map(|job| self.paginate_inner(&job.definition, job.source, &job.parameters))
            .collect();
        self.emit_debug_summary("paginate_batch");
        results
    }

    fn log_counts(&self, name: &str, execution: &Execution<'_>, metrics: &RenderMetrics) {
        let Some(perf) = self.perf.as_deref() else {
            return;
        };
        perf.log_counts(
            name,
            Some(execution.handle.get()),
            &[
                ("pages", metrics.pages.len() as u64),
                ("discarded_pages", metrics.discarded_pages as u64),
                ("rows", metrics.rows_visited),
                ("groups", metrics.groups_built),
                ("page_breaks", metrics.page_breaks),
            ],
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SALES: &str = r#"
        <Report>
          <PageHeight>200pt</PageHeight><PageWidth>300pt</PageWidth>
          <TopMargin>10pt</TopMargin><BottomMargin>10pt</BottomMargin>
          <DataSets><DataSet Name="Sales"><Fields>
            <Field Name="Region"><DataField>Region</DataField></Field>
            <Field Name="Amount"><DataField>Amount</DataField><TypeName>System.Int64</TypeName></Field>
          </Fields></DataSet></DataSets>
          <Body><ReportItems>
            <List Name="Regions"><Height>30pt</Height>
              <Grouping Name="ByRegion">
                <GroupExpressions><GroupExpression>=Fields!Region.Value</GroupExpression></GroupExpressions>
              </Grouping>
              <ReportItems>
                <Textbox Name="Region"><Height>15pt</Height><Width>100pt</Width><Value>=Fields!Region.Value</Value></Textbox>
                <Textbox Name="Total"><Top>15pt</Top><Height>15pt</Height><Width>100pt</Width>
                  <Value>=Sum(Fields!Amount.Value, "ByRegion")</Value>
                </Textbox>
              </ReportItems>
            </List>
          </ReportItems></Body>
        </Report>"#;

    fn sales(regions: usize) -> MemoryRowSource {
        MemoryRowSource::new().with_data_set(
            "Sales",
            RowSet::new(
                vec![
                    Field::new("Region", TypeCode::String),
                    Field::new("Amount", TypeCode::Int64),
                ],
                (0..regions * 2)
                    .map(|i| vec![format!("R{:02}", i / 2).into(), ((i % 2 + 1) as i64).into()])
                    .collect(),
            ),
        )
    }

    #[test]
    fn builder_rejects_invalid_configuration() {
        let err = match ReportEngine::builder().default_font("Helvetica", Pt::ZERO).build() {
            Ok(_) => panic!("expected a configuration error"),
            Err(err) => err,
        };
        assert!(matches!(err, ReportError::InvalidConfiguration(_)));

        let missing = ReportEngine::builder()
            .register_font_file("/nonexistent/font.ttf")
            .build();
        assert!(matches!(missing, Err(ReportError::InvalidConfiguration(_))));
    }

    #[test]
    fn identical_documents_share_one_definition() {
        let engine = ReportEngine::builder().build().unwrap();
        let first = engine.load_definition(SALES).unwrap();
        let second = engine.load_definition(SALES).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.page_size.height, Pt::from_i32(200));
    }

    #[test]
    fn strict_mode_refuses_definitions_with_errors() {
        let xml = "<Report><DataSets/></Report>";
        let lenient = ReportEngine::builder().build().unwrap();
        let definition = lenient.load_definition(xml).unwrap();
        assert!(definition.diagnostics.has_errors());

        let strict = ReportEngine::builder().strict_definitions(true).build().unwrap();
        assert!(matches!(strict.load_definition(xml), Err(ReportError::InvalidDefinition(_))));
    }

    #[test]
    fn render_streams_group_totals() {
        let engine = ReportEngine::builder().build().unwrap();
        let definition = engine.load_definition(SALES).unwrap();
        let mut presenter = RecordingPresenter::new();
        let metrics = engine
            .render(&definition, &sales(2), &ParameterValues::new(), &mut presenter)
            .unwrap();
        assert_eq!(presenter.texts(), vec!["R00", "3", "R01", "3"]);
        assert_eq!(metrics.rows_visited, 2);
        assert_eq!(metrics.groups_built, 2);
        assert!(engine.state_store().is_empty());
    }

    #[test]
    fn paginate_logs_page_breaks_and_never_emits_empty_pages() {
        let dir = tempfile::tempdir().unwrap();
        let debug_path = dir.path().join("debug.jsonl");
        let perf_path = dir.path().join("perf.jsonl");
        let engine = ReportEngine::builder()
            .debug_log(&debug_path)
            .perf_log(&perf_path)
            .build()
            .unwrap();
        let definition = engine.load_definition(SALES).unwrap();
        // 180pt of body, 30pt per group: six groups per page.
        let report = engine
            .paginate(&definition, &sales(8), &ParameterValues::new())
            .unwrap();
        assert_eq!(report.page_count(), 2);
        assert!(report.pages.iter().all(|page| !page.is_empty()));
        assert!(report.pages[1].text().starts_with("R06 3"));
        assert_eq!(report.metrics.page_breaks, 1);
        assert!(engine.state_store().is_empty());

        let log = std::fs::read_to_string(&debug_path).unwrap();
        let events: Vec<serde_json::Value> = log
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert!(events
            .iter()
            .any(|event| event["type"] == "page_break" && event["reason"] == "row_overflow"));
        let summary = events.last().unwrap();
        assert_eq!(summary["type"], "debug.summary");
        assert_eq!(summary["counts"]["page_break.row_overflow"], 1);

        let perf = std::fs::read_to_string(&perf_path).unwrap();
        assert!(perf.contains("\"paginate\""));
    }

    #[test]
    fn failed_render_releases_state() {
        let xml = SALES.replace(r#""ByRegion")"#, r#""Elsewhere")"#);
        let engine = ReportEngine::builder().build().unwrap();
        let definition = engine.load_definition(&xml).unwrap();
        let mut presenter = RecordingPresenter::new();
        let result = engine.render(&definition, &sales(2), &ParameterValues::new(), &mut presenter);
        assert!(matches!(result, Err(ReportError::Evaluation { .. })));
        assert!(engine.state_store().is_empty());
    }

    #[test]
    fn batch_results_keep_input_order() {
        let engine = ReportEngine::builder().build().unwrap();
        let definition = engine.load_definition(SALES).unwrap();
        let sources: Vec<MemoryRowSource> = (1..=4).map(sales).collect();
        let jobs: Vec<PaginateJob<'_>> = sources
            .iter()
            .map(|source| PaginateJob {
                definition: Arc::clone(&definition),
                source,
                parameters: ParameterValues::new(),
            })
            .collect();
        let results = engine.paginate_batch(&jobs);
        let firsts: Vec<String> = results
            .into_iter()
            .map(|result| result.unwrap().pages[0].text())
            .collect();
        assert_eq!(firsts[0], "R00 3");
        assert!(firsts[3].starts_with("R00 3 R01 3 R02 3 R03 3"));
        assert!(engine.state_store().is_empty());
    }
}
