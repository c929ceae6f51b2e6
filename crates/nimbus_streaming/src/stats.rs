//! Streaming statistics.

/// Counters accumulated by the streaming draw system.
#[derive(Debug, Clone, Copy, Default)]
pub struct StreamStats {
    /// Frames rendered.
    pub frames: u64,
    /// Multi-draw submissions issued (one per non-empty frame).
    pub draw_calls: u64,
    /// Instances covered by those submissions.
    pub instances_rendered: u64,
    /// Times the indirect-record ring was rebuilt larger.
    pub indirect_grows: u32,
    /// Times the world-matrix ring was rebuilt larger.
    pub matrix_grows: u32,
    /// Times a data pool (index/vertex/instance) grew on write.
    pub pool_grows: u32,
}

impl StreamStats {
    /// Mean instances per submitted draw call.
    #[must_use]
    pub fn instances_per_draw(&self) -> f64 {
        if self.draw_calls == 0 {
            0.0
        } else {
            self.instances_rendered as f64 / self.draw_calls as f64
        }
    }
}
