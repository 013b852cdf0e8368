//! COCO instance annotation store and mask decoding.
//!
//! Supports the three segmentation payloads found in `instances_*.json`:
//! polygon lists, uncompressed RLE (`counts` as integers) and compressed RLE
//! (`counts` as the COCO LEB128-style string). RLE runs are column-major and
//! alternate background/foreground, starting with background.

use std::collections::HashMap;

use image::{GrayImage, Luma};
use imageproc::{drawing::draw_polygon_mut, point::Point};
use serde::{Deserialize, Serialize};

use crate::sample::{ClassMap, ValidityMask};

/// Image entry of a COCO annotation file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CocoImage {
    pub id: u64,
    pub file_name: String,
    pub width: u32,
    pub height: u32,
}

/// Category entry of a COCO annotation file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CocoCategory {
    pub id: u64,
    pub name: String,
    #[serde(default)]
    pub supercategory: String,
}

/// Instance annotation of a COCO annotation file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CocoAnnotation {
    pub id: u64,
    pub image_id: u64,
    pub category_id: u64,
    pub segmentation: Segmentation,
    pub area: f64,
    #[serde(default)]
    pub iscrowd: u8,
    #[serde(default)]
    pub bbox: Vec<f64>,
}

impl CocoAnnotation {
    /// Crowd regions are excluded from supervision.
    pub const fn is_crowd(&self) -> bool {
        self.iscrowd != 0
    }
}

/// Segmentation payload of an annotation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Segmentation {
    /// One or more polygons as flat `[x0, y0, x1, y1, ...]` lists.
    Polygons(Vec<Vec<f64>>),
    /// Run-length encoded mask.
    Rle(Rle),
}

/// Run-length encoded mask, `size` is `[height, width]`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rle {
    pub size: [u32; 2],
    pub counts: RleCounts,
}

/// Run lengths, plain or string-compressed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RleCounts {
    Uncompressed(Vec<u32>),
    Compressed(String),
}

/// Parsed `instances_*.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CocoStore {
    pub images: Vec<CocoImage>,
    #[serde(default)]
    pub annotations: Vec<CocoAnnotation>,
    pub categories: Vec<CocoCategory>,
}

impl CocoStore {
    /// Annotation indices per image id, in file order.
    pub fn annotations_by_image(&self) -> HashMap<u64, Vec<usize>> {
        let mut index: HashMap<u64, Vec<usize>> = HashMap::new();
        for (i, ann) in self.annotations.iter().enumerate() {
            index.entry(ann.image_id).or_default().push(i);
        }
        index
    }
}

/// Decode a segmentation payload into a `{0, 1}` mask of `width x height`.
pub fn decode_mask(
    segmentation: &Segmentation,
    width: u32,
    height: u32,
) -> Result<GrayImage, String> {
    match segmentation {
        Segmentation::Polygons(polygons) => rasterize_polygons(polygons, width, height),
        Segmentation::Rle(rle) => {
            let [rle_h, rle_w] = rle.size;
            if (rle_w, rle_h) != (width, height) {
                return Err(format!(
                    "RLE size {rle_w}x{rle_h} does not match image {width}x{height}"
                ));
            }
            let counts = match &rle.counts {
                RleCounts::Uncompressed(counts) => counts.clone(),
                RleCounts::Compressed(s) => decode_rle_string(s)?,
            };
            decode_rle(&counts, width, height)
        }
    }
}

/// Union of filled polygons. Polygons with fewer than three distinct vertices are ignored.
pub fn rasterize_polygons(
    polygons: &[Vec<f64>],
    width: u32,
    height: u32,
) -> Result<GrayImage, String> {
    let mut canvas = GrayImage::new(width, height);
    for coords in polygons {
        if coords.len() % 2 != 0 {
            return Err(format!(
                "polygon has an odd number of coordinates ({})",
                coords.len()
            ));
        }

        let mut points: Vec<Point<i32>> = Vec::with_capacity(coords.len() / 2);
        for xy in coords.chunks_exact(2) {
            let point = Point::new(xy[0].round() as i32, xy[1].round() as i32);
            if points.last() != Some(&point) {
                points.push(point);
            }
        }
        while points.len() > 1 && points.first() == points.last() {
            points.pop();
        }
        if points.len() < 3 {
            tracing::debug!(vertices = points.len(), "skipping degenerate polygon");
            continue;
        }

        draw_polygon_mut(&mut canvas, &points, Luma([1]));
    }
    Ok(canvas)
}

/// Expand column-major run lengths into a `{0, 1}` mask.
pub fn decode_rle(counts: &[u32], width: u32, height: u32) -> Result<GrayImage, String> {
    let total = width as usize * height as usize;
    let covered: usize = counts.iter().map(|&c| c as usize).sum();
    if covered != total {
        return Err(format!(
            "RLE covers {covered} pixels, expected {total}"
        ));
    }

    let mut mask = GrayImage::new(width, height);
    let h = height as usize;
    let mut pos = 0usize;
    // Odd runs are foreground; linear index k is column k / h, row k % h.
    for (run, &count) in counts.iter().enumerate() {
        let count = count as usize;
        if run % 2 == 1 {
            for k in pos..pos + count {
                mask.put_pixel((k / h) as u32, (k % h) as u32, Luma([1]));
            }
        }
        pos += count;
    }
    Ok(mask)
}

/// Decode the compressed `counts` string used by COCO.
///
/// Each value is stored in 5-bit groups offset by 48, with bit `0x20` flagging a
/// continuation and bit `0x10` of the last group carrying the sign. From the
/// fourth value on, values are deltas against the value two positions back.
pub fn decode_rle_string(s: &str) -> Result<Vec<u32>, String> {
    let bytes = s.as_bytes();
    let mut counts: Vec<i64> = Vec::new();
    let mut p = 0usize;

    while p < bytes.len() {
        let mut x: i64 = 0;
        let mut k = 0u32;
        loop {
            let byte = *bytes
                .get(p)
                .ok_or_else(|| "truncated RLE string".to_owned())?;
            let c = i64::from(byte) - 48;
            if !(0..64).contains(&c) || k >= 12 {
                return Err(format!("invalid RLE byte {byte:#x} at offset {p}"));
            }
            x |= (c & 0x1f) << (5 * k);
            p += 1;
            k += 1;
            if c & 0x20 == 0 {
                // sign-extend the last group
                if c & 0x10 != 0 {
                    x |= -1i64 << (5 * k);
                }
                break;
            }
        }
        // delta against the run of the same parity
        if counts.len() > 2 {
            x += counts[counts.len() - 2];
        }
        counts.push(x);
    }

    counts
        .into_iter()
        .map(|c| u32::try_from(c).map_err(|_| format!("negative or oversized RLE run {c}")))
        .collect()
}

/// Running class and validity grids for one image, folded over its annotations.
///
/// Both combine rules are commutative and idempotent, so the result does not
/// depend on annotation order:
/// - exclusion: `valid = valid AND NOT region`;
/// - assignment: `seg = max(seg, region * class_id)`.
#[derive(Debug, Clone)]
pub struct MaskFold {
    pub seg_mask: ClassMap,
    pub loss_mask: ValidityMask,
}

impl MaskFold {
    /// Everything background and valid.
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            seg_mask: ClassMap::new(width, height),
            loss_mask: ValidityMask::from_pixel(width, height, Luma([1])),
        }
    }

    /// Remove `region` from the validity mask.
    pub fn exclude(mut self, region: &GrayImage) -> Self {
        for (valid, r) in self.loss_mask.pixels_mut().zip(region.pixels()) {
            if r.0[0] != 0 {
                valid.0[0] = 0;
            }
        }
        self
    }

    /// Raise `region` to at least `class_id`.
    pub fn assign(mut self, region: &GrayImage, class_id: u16) -> Self {
        for (seg, r) in self.seg_mask.pixels_mut().zip(region.pixels()) {
            if r.0[0] != 0 {
                seg.0[0] = seg.0[0].max(class_id);
            }
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Inverse of [`decode_rle_string`].
    fn encode_rle_string(counts: &[u32]) -> String {
        let mut out = String::new();
        for i in 0..counts.len() {
            let mut x = i64::from(counts[i]);
            if i > 2 {
                x -= i64::from(counts[i - 2]);
            }
            loop {
                let mut c = x & 0x1f;
                x >>= 5;
                let more = if c & 0x10 != 0 { x != -1 } else { x != 0 };
                if more {
                    c |= 0x20;
                }
                out.push((c + 48) as u8 as char);
                if !more {
                    break;
                }
            }
        }
        out
    }

    #[test]
    fn rle_string_small_values_are_single_bytes() {
        assert_eq!(decode_rle_string("324").unwrap(), vec![3, 2, 4]);
    }

    #[test]
    fn rle_string_decodes_deltas_and_large_runs() {
        let counts = vec![1000, 20, 5, 37, 3, 70_000];
        let encoded = encode_rle_string(&counts);
        assert_eq!(decode_rle_string(&encoded).unwrap(), counts);
    }

    #[test]
    fn rle_string_rejects_out_of_alphabet_bytes() {
        assert!(decode_rle_string("3 2").is_err());
    }

    #[test]
    fn rle_is_column_major() {
        // 2 rows x 3 columns; skip 1, fill 2, skip 3: pixels (x=0,y=1) and (x=1,y=0).
        let mask = decode_rle(&[1, 2, 3], 3, 2).unwrap();
        assert_eq!(mask.as_raw(), &vec![0, 1, 0, 1, 0, 0]);
    }

    #[test]
    fn rle_with_wrong_total_is_rejected() {
        assert!(decode_rle(&[1, 2], 3, 2).is_err());
    }

    #[test]
    fn rle_size_must_match_image() {
        let seg = Segmentation::Rle(Rle {
            size: [2, 3],
            counts: RleCounts::Uncompressed(vec![6]),
        });
        assert!(decode_mask(&seg, 3, 2).is_ok());
        assert!(decode_mask(&seg, 2, 3).is_err());
    }

    #[test]
    fn polygon_fills_interior_and_ignores_closing_vertex() {
        let square = vec![vec![2.0, 2.0, 6.0, 2.0, 6.0, 6.0, 2.0, 6.0, 2.0, 2.0]];
        let mask = rasterize_polygons(&square, 10, 10).unwrap();

        assert_eq!(mask.get_pixel(4, 4).0[0], 1);
        assert_eq!(mask.get_pixel(0, 0).0[0], 0);
        assert_eq!(mask.get_pixel(8, 8).0[0], 0);
    }

    #[test]
    fn degenerate_polygon_is_ignored() {
        let line = vec![vec![1.0, 1.0, 5.0, 5.0]];
        let mask = rasterize_polygons(&line, 8, 8).unwrap();
        assert!(mask.pixels().all(|p| p.0[0] == 0));
    }

    #[test]
    fn odd_coordinate_count_is_an_error() {
        assert!(rasterize_polygons(&[vec![1.0, 2.0, 3.0]], 4, 4).is_err());
    }

    #[test]
    fn segmentation_deserializes_all_payloads() {
        let poly: Segmentation = serde_json::from_str("[[0, 0, 4, 0, 4, 4]]").unwrap();
        assert!(matches!(poly, Segmentation::Polygons(_)));

        let rle: Segmentation =
            serde_json::from_str(r#"{"size": [2, 3], "counts": [1, 2, 3]}"#).unwrap();
        assert!(matches!(
            rle,
            Segmentation::Rle(Rle {
                counts: RleCounts::Uncompressed(_),
                ..
            })
        ));

        let compressed: Segmentation =
            serde_json::from_str(r#"{"size": [2, 3], "counts": "123"}"#).unwrap();
        assert!(matches!(
            compressed,
            Segmentation::Rle(Rle {
                counts: RleCounts::Compressed(_),
                ..
            })
        ));
    }

    fn region(bits: &[u8]) -> GrayImage {
        GrayImage::from_raw(bits.len() as u32, 1, bits.to_vec()).unwrap()
    }

    #[test]
    fn assignment_keeps_the_higher_class_in_any_order() {
        let low = region(&[1, 1, 0]);
        let high = region(&[0, 1, 1]);

        let a = MaskFold::new(3, 1).assign(&low, 2).assign(&high, 5);
        let b = MaskFold::new(3, 1).assign(&high, 5).assign(&low, 2);

        assert_eq!(a.seg_mask.as_raw(), &vec![2, 5, 5]);
        assert_eq!(a.seg_mask, b.seg_mask);
    }

    #[test]
    fn exclusion_is_monotonic_and_independent_of_assignment() {
        let crowd = region(&[0, 1, 1]);
        let object = region(&[1, 1, 0]);

        let a = MaskFold::new(3, 1).exclude(&crowd).assign(&object, 3);
        let b = MaskFold::new(3, 1).assign(&object, 3).exclude(&crowd);

        assert_eq!(a.loss_mask.as_raw(), &vec![1, 0, 0]);
        assert_eq!(a.loss_mask, b.loss_mask);
        assert_eq!(a.seg_mask, b.seg_mask);
    }
}
