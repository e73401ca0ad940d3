use std::fmt::Write as _;

use crate::renderer::profiler::GPU_QUERIES;

/// Counters of the last rendered frame.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RenderStats {
    pub frame: u64,
    /// `render_instances` calls, across all passes and cameras.
    pub rendered_passes: u32,
    /// Instances handed to a material.
    pub rendered_instances: u32,
    /// Draws issued by materials.
    pub render_calls: u32,
    /// CPU time of `render()` in milliseconds.
    pub frame_cpu_time: f64,
    /// GPU time per stage in milliseconds, `None` when unknown.
    pub gpu_times: [Option<f64>; GPU_QUERIES.len()],
}

impl RenderStats {
    pub(crate) fn begin_frame(&mut self, frame: u64) {
        self.frame = frame;
        self.rendered_passes = 0;
        self.rendered_instances = 0;
        self.render_calls = 0;
    }

    #[must_use]
    pub fn gpu_time(&self, stage: &str) -> Option<f64> {
        GPU_QUERIES
            .iter()
            .position(|q| *q == stage)
            .and_then(|i| self.gpu_times[i])
    }

    /// Human readable summary, one entry per line.
    #[must_use]
    pub fn lines(&self) -> Vec<String> {
        let mut lines = vec![
            format!("frame: {}", self.frame),
            format!("passes: {}", self.rendered_passes),
            format!("instances: {}", self.rendered_instances),
            format!("draw calls: {}", self.render_calls),
            format!("cpu: {:.2}ms", self.frame_cpu_time),
        ];
        for (name, time) in GPU_QUERIES.iter().zip(self.gpu_times) {
            let mut line = format!("gpu.{name}: ");
            match time {
                Some(ms) => {
                    let _ = write!(line, "{ms:.2}ms");
                }
                None => line.push_str("unknown"),
            }
            lines.push(line);
        }
        lines
    }
}
