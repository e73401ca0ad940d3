//! CPU-only backend that records every command it receives.

use std::any::Any;

use rustc_hash::FxHashMap;
use slotmap::SlotMap;

use super::{
    ClearRequest, DrawCall, GpuBackend, PipelineState, QueryStatus, RenderTarget, TextureDesc,
    TextureHandle, Viewport,
};

/// One recorded backend call.
#[derive(Debug, Clone, PartialEq)]
pub enum BackendCommand {
    SetViewport(Viewport),
    ApplyState(PipelineState),
    Clear(ClearRequest),
    CreateTexture(TextureHandle),
    ReleaseTexture(TextureHandle),
    BindTarget(Option<RenderTarget>),
    CopyColorBuffer {
        source: Option<RenderTarget>,
        dst: TextureHandle,
    },
    BlitToScreen {
        texture: TextureHandle,
        viewport: Viewport,
    },
    Draw {
        call: DrawCall,
        target: Option<RenderTarget>,
        state: PipelineState,
    },
    BeginTimerQuery(usize),
    EndTimerQuery(usize),
    EndFrame,
}

#[derive(Debug, Clone, Copy, Default)]
struct FakeQuery {
    ended_in_frame: Option<u64>,
}

/// Headless recorder.
///
/// Keeps the same observable state a GL context would (viewport, pipeline
/// state, bound target, texture table) and appends a [`BackendCommand`] for
/// every call. Timer queries are off unless enabled with
/// [`HeadlessBackend::with_timer_queries`]; fake results become available
/// one frame after the query ended.
#[derive(Debug)]
pub struct HeadlessBackend {
    size: (u32, u32),
    viewport: Viewport,
    state: PipelineState,
    target: Option<RenderTarget>,
    textures: SlotMap<TextureHandle, TextureDesc>,
    commands: Vec<BackendCommand>,

    fake_query_ms: Option<f64>,
    queries: FxHashMap<usize, FakeQuery>,
    frame: u64,
}

impl HeadlessBackend {
    #[must_use]
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            size: (width, height),
            viewport: Viewport::from_size(width, height),
            state: PipelineState::default(),
            target: None,
            textures: SlotMap::with_key(),
            commands: Vec::new(),
            fake_query_ms: None,
            queries: FxHashMap::default(),
            frame: 0,
        }
    }

    /// Enables fake timer queries that each report `ms` milliseconds.
    #[must_use]
    pub fn with_timer_queries(mut self, ms: f64) -> Self {
        self.fake_query_ms = Some(ms);
        self
    }

    /// Changes the drawing buffer size (a canvas resize).
    pub fn resize(&mut self, width: u32, height: u32) {
        self.size = (width, height);
    }

    #[must_use]
    pub fn commands(&self) -> &[BackendCommand] {
        &self.commands
    }

    pub fn take_commands(&mut self) -> Vec<BackendCommand> {
        std::mem::take(&mut self.commands)
    }

    pub fn clear_commands(&mut self) {
        self.commands.clear();
    }

    /// Recorded draw calls, in submission order.
    pub fn draw_calls(&self) -> impl Iterator<Item = &DrawCall> {
        self.commands.iter().filter_map(|c| match c {
            BackendCommand::Draw { call, .. } => Some(call),
            _ => None,
        })
    }

    /// Recorded clears, in submission order.
    pub fn clears(&self) -> impl Iterator<Item = &ClearRequest> {
        self.commands.iter().filter_map(|c| match c {
            BackendCommand::Clear(request) => Some(request),
            _ => None,
        })
    }

    /// Number of live textures.
    #[must_use]
    pub fn texture_count(&self) -> usize {
        self.textures.len()
    }
}

impl Default for HeadlessBackend {
    fn default() -> Self {
        Self::new(800, 600)
    }
}

impl GpuBackend for HeadlessBackend {
    fn drawing_buffer_size(&self) -> (u32, u32) {
        self.size
    }

    fn viewport(&self) -> Viewport {
        self.viewport
    }

    fn set_viewport(&mut self, viewport: Viewport) {
        self.viewport = viewport;
        self.commands.push(BackendCommand::SetViewport(viewport));
    }

    fn pipeline_state(&self) -> PipelineState {
        self.state
    }

    fn apply_state(&mut self, state: &PipelineState) {
        self.state = *state;
        self.commands.push(BackendCommand::ApplyState(*state));
    }

    fn clear(&mut self, request: &ClearRequest) {
        self.commands.push(BackendCommand::Clear(*request));
    }

    fn create_texture(&mut self, desc: &TextureDesc) -> TextureHandle {
        let handle = self.textures.insert(*desc);
        self.commands.push(BackendCommand::CreateTexture(handle));
        handle
    }

    fn release_texture(&mut self, texture: TextureHandle) {
        if self.textures.remove(texture).is_some() {
            self.commands.push(BackendCommand::ReleaseTexture(texture));
        }
    }

    fn texture_desc(&self, texture: TextureHandle) -> Option<TextureDesc> {
        self.textures.get(texture).copied()
    }

    fn bind_target(&mut self, target: Option<RenderTarget>) {
        self.target = target;
        self.commands.push(BackendCommand::BindTarget(target));
    }

    fn current_target(&self) -> Option<RenderTarget> {
        self.target
    }

    fn copy_color_buffer(&mut self, dst: TextureHandle) {
        self.commands.push(BackendCommand::CopyColorBuffer {
            source: self.target,
            dst,
        });
    }

    fn blit_to_screen(&mut self, texture: TextureHandle, viewport: Viewport) {
        self.commands
            .push(BackendCommand::BlitToScreen { texture, viewport });
    }

    fn draw(&mut self, call: &DrawCall) {
        self.commands.push(BackendCommand::Draw {
            call: *call,
            target: self.target,
            state: self.state,
        });
    }

    fn timer_queries_supported(&self) -> bool {
        self.fake_query_ms.is_some()
    }

    fn begin_timer_query(&mut self, slot: usize) {
        if self.fake_query_ms.is_none() {
            return;
        }
        self.queries.insert(slot, FakeQuery::default());
        self.commands.push(BackendCommand::BeginTimerQuery(slot));
    }

    fn end_timer_query(&mut self, slot: usize) {
        let frame = self.frame;
        if let Some(query) = self.queries.get_mut(&slot) {
            query.ended_in_frame = Some(frame);
            self.commands.push(BackendCommand::EndTimerQuery(slot));
        }
    }

    fn timer_query_result(&mut self, slot: usize) -> QueryStatus {
        let Some(ms) = self.fake_query_ms else {
            return QueryStatus::Unsupported;
        };
        match self.queries.get(&slot).and_then(|q| q.ended_in_frame) {
            Some(ended) if ended < self.frame => QueryStatus::Ready(ms),
            _ => QueryStatus::Pending,
        }
    }

    fn end_frame(&mut self) {
        self.frame += 1;
        self.commands.push(BackendCommand::EndFrame);
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
