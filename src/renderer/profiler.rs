//! GPU stage timing
//!
//! Each frame wraps its major stages in backend timer queries. Results are
//! read at the start of the following frame. The "gui" query is issued last,
//! so while it is still pending none of the results are read and no new
//! queries are issued.

use crate::backend::{GpuBackend, QueryStatus};

/// Stage names, in issue order.
pub const GPU_QUERIES: [&str; 6] = ["before_render", "shadows", "reflections", "main", "postpo", "gui"];

const LAST_QUERY: usize = GPU_QUERIES.len() - 1;

#[derive(Debug, Clone)]
pub struct GpuProfiler {
    enabled: bool,
    /// Queries from an earlier frame are still unread.
    waiting: bool,
    issued_this_frame: bool,
    results: [Option<f64>; GPU_QUERIES.len()],
}

impl GpuProfiler {
    #[must_use]
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            waiting: false,
            issued_this_frame: false,
            results: [None; GPU_QUERIES.len()],
        }
    }

    #[inline]
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn slot(name: &str) -> Option<usize> {
        GPU_QUERIES.iter().position(|q| *q == name)
    }

    /// Reads the results of the previous frame's queries.
    pub fn resolve(&mut self, backend: &mut dyn GpuBackend) {
        self.issued_this_frame = false;
        if !self.enabled {
            return;
        }
        if !backend.timer_queries_supported() {
            log::debug!("Timer queries unsupported, GPU profiling disabled");
            self.enabled = false;
            self.results = [None; GPU_QUERIES.len()];
            return;
        }
        if !self.waiting {
            return;
        }

        match backend.timer_query_result(LAST_QUERY) {
            QueryStatus::Pending => {}
            QueryStatus::Unsupported => {
                self.enabled = false;
                self.results = [None; GPU_QUERIES.len()];
            }
            QueryStatus::Ready(last) => {
                // Backends may hand out each result only once.
                for (slot, result) in self.results[..LAST_QUERY].iter_mut().enumerate() {
                    *result = match backend.timer_query_result(slot) {
                        QueryStatus::Ready(ms) => Some(ms),
                        QueryStatus::Pending | QueryStatus::Unsupported => None,
                    };
                }
                self.results[LAST_QUERY] = Some(last);
                self.waiting = false;
            }
        }
    }

    pub fn begin(&mut self, backend: &mut dyn GpuBackend, name: &str) {
        if !self.enabled || self.waiting {
            return;
        }
        if let Some(slot) = Self::slot(name) {
            backend.begin_timer_query(slot);
            self.issued_this_frame = true;
        }
    }

    pub fn end(&mut self, backend: &mut dyn GpuBackend, name: &str) {
        if !self.enabled || self.waiting {
            return;
        }
        if let Some(slot) = Self::slot(name) {
            backend.end_timer_query(slot);
        }
    }

    /// Marks this frame's queries as awaiting results.
    pub fn end_frame(&mut self) {
        if self.issued_this_frame {
            self.waiting = true;
        }
    }

    /// Last known GPU time of a stage in milliseconds; `None` when unknown.
    #[must_use]
    pub fn result(&self, name: &str) -> Option<f64> {
        Self::slot(name).and_then(|slot| self.results[slot])
    }

    #[must_use]
    pub fn results(&self) -> impl Iterator<Item = (&'static str, Option<f64>)> + '_ {
        GPU_QUERIES.iter().copied().zip(self.results.iter().copied())
    }
}

#[cfg(test)]
mod tests {
    use std::any::Any;

    use super::*;
    use crate::backend::{
        ClearRequest, DrawCall, PipelineState, RenderTarget, TextureDesc, TextureHandle, Viewport,
    };

    /// Backend whose timer results can be read a single time.
    #[derive(Default)]
    struct ReadOnceQueries {
        ready: [Option<f64>; GPU_QUERIES.len()],
    }

    impl GpuBackend for ReadOnceQueries {
        fn drawing_buffer_size(&self) -> (u32, u32) {
            (1, 1)
        }
        fn viewport(&self) -> Viewport {
            Viewport::from_size(1, 1)
        }
        fn set_viewport(&mut self, _viewport: Viewport) {}
        fn pipeline_state(&self) -> PipelineState {
            PipelineState::default()
        }
        fn apply_state(&mut self, _state: &PipelineState) {}
        fn clear(&mut self, _request: &ClearRequest) {}
        fn create_texture(&mut self, _desc: &TextureDesc) -> TextureHandle {
            TextureHandle::default()
        }
        fn release_texture(&mut self, _texture: TextureHandle) {}
        fn texture_desc(&self, _texture: TextureHandle) -> Option<TextureDesc> {
            None
        }
        fn bind_target(&mut self, _target: Option<RenderTarget>) {}
        fn current_target(&self) -> Option<RenderTarget> {
            None
        }
        fn copy_color_buffer(&mut self, _dst: TextureHandle) {}
        fn blit_to_screen(&mut self, _texture: TextureHandle, _viewport: Viewport) {}
        fn draw(&mut self, _call: &DrawCall) {}

        fn timer_queries_supported(&self) -> bool {
            true
        }
        fn end_timer_query(&mut self, slot: usize) {
            self.ready[slot] = Some((slot + 1) as f64);
        }
        fn timer_query_result(&mut self, slot: usize) -> QueryStatus {
            match self.ready.get_mut(slot).and_then(Option::take) {
                Some(ms) => QueryStatus::Ready(ms),
                None => QueryStatus::Pending,
            }
        }

        fn as_any(&self) -> &dyn Any {
            self
        }
        fn as_any_mut(&mut self) -> &mut dyn Any {
            self
        }
    }

    #[test]
    fn every_stage_survives_read_once_results() {
        let mut backend = ReadOnceQueries::default();
        let mut profiler = GpuProfiler::new(true);

        profiler.resolve(&mut backend);
        for name in GPU_QUERIES {
            profiler.begin(&mut backend, name);
            profiler.end(&mut backend, name);
        }
        profiler.end_frame();
        profiler.resolve(&mut backend);

        for (slot, (name, time)) in profiler.results().enumerate() {
            assert_eq!(time, Some((slot + 1) as f64), "stage {name}");
        }
        assert_eq!(profiler.result("gui"), Some(6.0));
    }

    #[test]
    fn pending_last_query_keeps_waiting() {
        let mut backend = ReadOnceQueries::default();
        let mut profiler = GpuProfiler::new(true);

        profiler.begin(&mut backend, "main");
        profiler.end(&mut backend, "main");
        profiler.end_frame();
        profiler.resolve(&mut backend);

        assert_eq!(profiler.result("main"), None);
        profiler.begin(&mut backend, "main");
        assert!(!profiler.issued_this_frame, "No new queries while waiting");
    }
}
