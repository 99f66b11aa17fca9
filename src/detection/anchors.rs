use crate::shapes::point::PointF32;

pub const NUM_ANCHORS: usize = 896;

const INPUT_SIZE: u32 = 128;
const STRIDES: [u32; 4] = [8, 16, 16, 16];
// One anchor at aspect ratio 1 plus one at the interpolated scale.
const ANCHORS_PER_LAYER: usize = 2;

/// SSD anchor centers for the short-range BlazeFace model, normalized to
/// [0, 1]. Anchor sizes are fixed at 1, so only the centers matter.
///
/// Consecutive layers sharing a stride are merged into one grid, so the
/// stride-8 layer yields 2 anchors per cell and the three stride-16 layers
/// yield 6.
pub fn gen_anchors() -> Vec<PointF32> {
    let mut anchors = Vec::with_capacity(NUM_ANCHORS);

    let mut layer = 0;
    while layer < STRIDES.len() {
        let stride = STRIDES[layer];
        let mut last_same_stride = layer;
        while last_same_stride < STRIDES.len() && STRIDES[last_same_stride] == stride {
            last_same_stride += 1;
        }
        let per_cell = (last_same_stride - layer) * ANCHORS_PER_LAYER;

        let grid = INPUT_SIZE.div_ceil(stride);
        for y in 0..grid {
            for x in 0..grid {
                let center = PointF32 {
                    x: (x as f32 + 0.5) / grid as f32,
                    y: (y as f32 + 0.5) / grid as f32,
                };
                anchors.extend(std::iter::repeat_n(center, per_cell));
            }
        }

        layer = last_same_stride;
    }

    anchors
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn produces_one_anchor_per_model_row() {
        assert_eq!(gen_anchors().len(), NUM_ANCHORS);
    }

    #[test]
    fn layers_are_laid_out_coarse_after_fine() {
        let anchors = gen_anchors();

        // stride 8: 16x16 grid, 2 per cell
        assert_eq!(anchors[0], PointF32::new(0.5 / 16., 0.5 / 16.));
        assert_eq!(anchors[1], anchors[0]);
        assert_eq!(anchors[2], PointF32::new(1.5 / 16., 0.5 / 16.));

        // stride 16: 8x8 grid, 6 per cell, starting after 16 * 16 * 2
        assert_eq!(anchors[512], PointF32::new(0.5 / 8., 0.5 / 8.));
        assert_eq!(anchors[517], anchors[512]);
        assert_eq!(anchors[518], PointF32::new(1.5 / 8., 0.5 / 8.));
        assert_eq!(anchors[NUM_ANCHORS - 1], PointF32::new(7.5 / 8., 7.5 / 8.));
    }
}
