/// Kind of pass currently being rendered.
///
/// Decides which instances are eligible and which material entry point is
/// called.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum RenderPass {
    #[default]
    Color,
    /// Depth-only, restricted to shadow casters.
    Shadow,
    /// Object ids, restricted to selectable nodes.
    Picking,
}
