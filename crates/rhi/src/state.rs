//! Fixed-function state objects.
//!
//! Rasterizer, blend and depth-stencil states are immutable values shared by
//! many pipeline descriptors. Each one carries a content hash computed at
//! construction; two states with equal settings are interchangeable for
//! pipeline caching.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use crate::backend::{ColorBlendDesc, DepthBias, DepthStencilDesc, RasterizerDesc, StencilFaceDesc};
use crate::definitions::{BlendFactor, BlendOp, CompareOp, CullMode, PolygonMode, StencilOp};

/// Depth bias units are 24-bit fixed point.
const DEPTH_BIAS_SCALE: f32 = (1 << 24) as f32;

// =============================================================================
// Rasterizer
// =============================================================================

#[derive(Clone, Debug, PartialEq)]
pub struct RasterizerState {
    cull_mode: CullMode,
    polygon_mode: PolygonMode,
    depth_clip_enabled: bool,
    depth_bias: f32,
    depth_bias_clamp: f32,
    depth_bias_slope_scaled: f32,
    line_width: f32,
    hash: u64,
}

impl RasterizerState {
    pub fn new(cull_mode: CullMode, polygon_mode: PolygonMode) -> Self {
        Self {
            cull_mode,
            polygon_mode,
            depth_clip_enabled: true,
            depth_bias: 0.0,
            depth_bias_clamp: 0.0,
            depth_bias_slope_scaled: 0.0,
            line_width: 1.0,
            hash: 0,
        }
        .rehash()
    }

    /// Depth bias in depth-buffer units. Zero disables it.
    pub fn with_depth_bias(mut self, bias: f32, clamp: f32, slope_scaled: f32) -> Self {
        self.depth_bias = bias;
        self.depth_bias_clamp = clamp;
        self.depth_bias_slope_scaled = slope_scaled;
        self.rehash()
    }

    pub fn with_depth_clip(mut self, enabled: bool) -> Self {
        self.depth_clip_enabled = enabled;
        self.rehash()
    }

    pub fn with_line_width(mut self, line_width: f32) -> Self {
        self.line_width = line_width;
        self.rehash()
    }

    fn rehash(mut self) -> Self {
        let mut hasher = DefaultHasher::new();
        self.cull_mode.hash(&mut hasher);
        self.polygon_mode.hash(&mut hasher);
        self.depth_clip_enabled.hash(&mut hasher);
        self.depth_bias.to_bits().hash(&mut hasher);
        self.depth_bias_clamp.to_bits().hash(&mut hasher);
        self.depth_bias_slope_scaled.to_bits().hash(&mut hasher);
        self.line_width.to_bits().hash(&mut hasher);
        self.hash = hasher.finish();
        self
    }

    #[inline]
    pub fn hash(&self) -> u64 {
        self.hash
    }

    #[inline]
    pub fn cull_mode(&self) -> CullMode {
        self.cull_mode
    }

    #[inline]
    pub fn polygon_mode(&self) -> PolygonMode {
        self.polygon_mode
    }

    #[inline]
    pub fn depth_bias(&self) -> f32 {
        self.depth_bias
    }

    pub fn is_depth_bias_enabled(&self) -> bool {
        self.depth_bias != 0.0
    }

    /// Backend form. Bias is converted to fixed-point units.
    pub fn to_desc(&self) -> RasterizerDesc {
        RasterizerDesc {
            polygon_mode: self.polygon_mode,
            cull_mode: self.cull_mode,
            depth_clip_enabled: self.depth_clip_enabled,
            depth_bias: self.is_depth_bias_enabled().then(|| DepthBias {
                constant_factor: (self.depth_bias * DEPTH_BIAS_SCALE).floor(),
                clamp: self.depth_bias_clamp,
                slope_factor: self.depth_bias_slope_scaled,
            }),
            line_width: self.line_width,
        }
    }
}

// =============================================================================
// Blend
// =============================================================================

#[derive(Clone, Debug, PartialEq)]
pub struct BlendState {
    blend_enabled: bool,
    source_blend: BlendFactor,
    dest_blend: BlendFactor,
    blend_op: BlendOp,
    source_blend_alpha: BlendFactor,
    dest_blend_alpha: BlendFactor,
    blend_op_alpha: BlendOp,
    blend_factor: f32,
    hash: u64,
}

impl BlendState {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        blend_enabled: bool,
        source_blend: BlendFactor,
        dest_blend: BlendFactor,
        blend_op: BlendOp,
        source_blend_alpha: BlendFactor,
        dest_blend_alpha: BlendFactor,
        blend_op_alpha: BlendOp,
        blend_factor: f32,
    ) -> Self {
        let mut state = Self {
            blend_enabled,
            source_blend,
            dest_blend,
            blend_op,
            source_blend_alpha,
            dest_blend_alpha,
            blend_op_alpha,
            blend_factor,
            hash: 0,
        };

        let mut hasher = DefaultHasher::new();
        state.blend_enabled.hash(&mut hasher);
        state.source_blend.hash(&mut hasher);
        state.dest_blend.hash(&mut hasher);
        state.blend_op.hash(&mut hasher);
        state.source_blend_alpha.hash(&mut hasher);
        state.dest_blend_alpha.hash(&mut hasher);
        state.blend_op_alpha.hash(&mut hasher);
        state.blend_factor.to_bits().hash(&mut hasher);
        state.hash = hasher.finish();
        state
    }

    /// Opaque output.
    pub fn disabled() -> Self {
        Self::new(
            false,
            BlendFactor::One,
            BlendFactor::Zero,
            BlendOp::Add,
            BlendFactor::One,
            BlendFactor::Zero,
            BlendOp::Add,
            0.0,
        )
    }

    /// Standard alpha blending.
    pub fn alpha() -> Self {
        Self::new(
            true,
            BlendFactor::SrcAlpha,
            BlendFactor::InvSrcAlpha,
            BlendOp::Add,
            BlendFactor::One,
            BlendFactor::One,
            BlendOp::Add,
            0.0,
        )
    }

    pub fn additive() -> Self {
        Self::new(
            true,
            BlendFactor::One,
            BlendFactor::One,
            BlendOp::Add,
            BlendFactor::One,
            BlendFactor::One,
            BlendOp::Add,
            1.0,
        )
    }

    #[inline]
    pub fn hash(&self) -> u64 {
        self.hash
    }

    #[inline]
    pub fn is_enabled(&self) -> bool {
        self.blend_enabled
    }

    #[inline]
    pub fn blend_factor(&self) -> f32 {
        self.blend_factor
    }

    /// Backend form of one attachment's blend.
    pub fn to_desc(&self) -> ColorBlendDesc {
        ColorBlendDesc {
            enabled: self.blend_enabled,
            src_color: self.source_blend,
            dst_color: self.dest_blend,
            color_op: self.blend_op,
            src_alpha: self.source_blend_alpha,
            dst_alpha: self.dest_blend_alpha,
            alpha_op: self.blend_op_alpha,
        }
    }

    pub fn blend_constants(&self) -> [f32; 4] {
        [self.blend_factor; 4]
    }
}

// =============================================================================
// Depth-stencil
// =============================================================================

#[derive(Clone, Debug, PartialEq)]
pub struct DepthStencilState {
    depth_test: bool,
    depth_write: bool,
    depth_compare: CompareOp,
    stencil_test: bool,
    stencil_write: bool,
    stencil_compare: CompareOp,
    stencil_fail_op: StencilOp,
    stencil_depth_fail_op: StencilOp,
    stencil_pass_op: StencilOp,
    stencil_read_mask: u32,
    stencil_write_mask: u32,
    hash: u64,
}

impl DepthStencilState {
    pub fn new(depth_test: bool, depth_write: bool, depth_compare: CompareOp) -> Self {
        Self {
            depth_test,
            depth_write,
            depth_compare,
            stencil_test: false,
            stencil_write: false,
            stencil_compare: CompareOp::Always,
            stencil_fail_op: StencilOp::Keep,
            stencil_depth_fail_op: StencilOp::Keep,
            stencil_pass_op: StencilOp::Replace,
            stencil_read_mask: 0x01,
            stencil_write_mask: 0x01,
            hash: 0,
        }
        .rehash()
    }

    /// No depth or stencil work.
    pub fn disabled() -> Self {
        Self::new(false, false, CompareOp::Never)
    }

    /// Reverse-Z depth test with writes: nearer fragments have greater depth.
    pub fn read_write() -> Self {
        Self::new(true, true, CompareOp::GreaterEqual)
    }

    /// Reverse-Z depth test without writes.
    pub fn read() -> Self {
        Self::new(true, false, CompareOp::GreaterEqual)
    }

    pub fn with_stencil(
        mut self,
        compare: CompareOp,
        pass_op: StencilOp,
        write: bool,
        read_mask: u32,
        write_mask: u32,
    ) -> Self {
        self.stencil_test = true;
        self.stencil_write = write;
        self.stencil_compare = compare;
        self.stencil_pass_op = pass_op;
        self.stencil_read_mask = read_mask;
        self.stencil_write_mask = write_mask;
        self.rehash()
    }

    fn rehash(mut self) -> Self {
        let mut hasher = DefaultHasher::new();
        self.depth_test.hash(&mut hasher);
        self.depth_write.hash(&mut hasher);
        self.depth_compare.hash(&mut hasher);
        self.stencil_test.hash(&mut hasher);
        self.stencil_write.hash(&mut hasher);
        self.stencil_compare.hash(&mut hasher);
        self.stencil_fail_op.hash(&mut hasher);
        self.stencil_depth_fail_op.hash(&mut hasher);
        self.stencil_pass_op.hash(&mut hasher);
        self.stencil_read_mask.hash(&mut hasher);
        self.stencil_write_mask.hash(&mut hasher);
        self.hash = hasher.finish();
        self
    }

    #[inline]
    pub fn hash(&self) -> u64 {
        self.hash
    }

    #[inline]
    pub fn is_depth_test_enabled(&self) -> bool {
        self.depth_test
    }

    #[inline]
    pub fn is_depth_write_enabled(&self) -> bool {
        self.depth_write
    }

    #[inline]
    pub fn is_stencil_enabled(&self) -> bool {
        self.stencil_test
    }

    /// Backend form. Depth bounds follow the reverse-Z range.
    pub fn to_desc(&self) -> DepthStencilDesc {
        let face = StencilFaceDesc {
            fail_op: self.stencil_fail_op,
            depth_fail_op: self.stencil_depth_fail_op,
            pass_op: self.stencil_pass_op,
            compare_op: self.stencil_compare,
        };
        DepthStencilDesc {
            depth_test: self.depth_test,
            depth_write: self.depth_write,
            depth_compare: self.depth_compare,
            stencil_test: self.stencil_test,
            stencil_read_mask: self.stencil_read_mask,
            stencil_write_mask: if self.stencil_write {
                self.stencil_write_mask
            } else {
                0
            },
            front: face,
            back: face,
            min_depth_bounds: 1.0,
            max_depth_bounds: 0.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_equal_content_equal_hash() {
        let a = RasterizerState::new(CullMode::Back, PolygonMode::Solid);
        let b = RasterizerState::new(CullMode::Back, PolygonMode::Solid);
        let c = RasterizerState::new(CullMode::None, PolygonMode::Solid);
        assert_eq!(a.hash(), b.hash());
        assert_ne!(a.hash(), c.hash());

        assert_eq!(BlendState::alpha().hash(), BlendState::alpha().hash());
        assert_ne!(BlendState::alpha().hash(), BlendState::disabled().hash());
    }

    #[test]
    fn test_depth_bias_enabled_only_when_nonzero() {
        let plain = RasterizerState::new(CullMode::Back, PolygonMode::Solid);
        assert!(plain.to_desc().depth_bias.is_none());

        let biased = plain.with_depth_bias(0.0001, 0.0, 2.0);
        let bias = biased.to_desc().depth_bias.unwrap();
        assert_eq!(bias.constant_factor, (0.0001f32 * 16_777_216.0).floor());
        assert_eq!(bias.slope_factor, 2.0);
    }

    #[test]
    fn test_builders_rehash() {
        let a = RasterizerState::new(CullMode::Back, PolygonMode::Solid);
        let b = a.clone().with_line_width(2.0);
        assert_ne!(a.hash(), b.hash());
    }

    #[test]
    fn test_blend_constants_repeat_factor() {
        assert_eq!(BlendState::additive().blend_constants(), [1.0; 4]);
        assert!(!BlendState::disabled().to_desc().enabled);
    }

    #[test]
    fn test_depth_bounds_are_reversed() {
        let desc = DepthStencilState::read_write().to_desc();
        assert_eq!(desc.min_depth_bounds, 1.0);
        assert_eq!(desc.max_depth_bounds, 0.0);
        assert_eq!(desc.depth_compare, CompareOp::GreaterEqual);
    }

    #[test]
    fn test_stencil_write_mask_zero_without_write() {
        let state = DepthStencilState::read().with_stencil(
            CompareOp::Equal,
            StencilOp::Keep,
            false,
            0xff,
            0xff,
        );
        let desc = state.to_desc();
        assert!(desc.stencil_test);
        assert_eq!(desc.stencil_write_mask, 0);
        assert_eq!(desc.front, desc.back);
    }
}
