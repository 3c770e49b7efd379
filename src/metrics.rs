#[derive(Debug, Clone, Default)]
pub struct PageMetrics {
    pub page_number: usize,
    pub command_count: usize,
    pub text_runs: usize,
}

#[derive(Debug, Clone, Default)]
pub struct RenderMetrics {
    pub pages: Vec<PageMetrics>,
    pub discarded_pages: usize,
    pub rows_visited: u64,
    pub groups_built: u64,
    pub page_breaks: u64,
    pub total_render_ms: f64,
}
