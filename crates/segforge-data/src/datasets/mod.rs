//! Dataset adapters, one per on-disk annotation format.
//!
//! - [`CocoDataset`]: COCO instance annotations (polygons and RLE).
//! - [`Ade20kDataset`]: ADE20K scene-parsing challenge, single-channel class maps.
//! - [`FineGrainedAde20kDataset`]: full ADE20K release, class ids packed into RGB.

mod ade20k;
mod coco;
mod fine_grained;

use std::path::Path;

use image::RgbImage;

pub use ade20k::{Ade20kDataset, Ade20kDatasetConfig, ClassLut};
pub use coco::{CocoDataset, CocoDatasetConfig};
pub use fine_grained::{
    packed_class_id, segmentation_path, FineGrainedAde20kDataset, FineGrainedAde20kDatasetConfig,
};

use crate::error::{DatasetError, DatasetResult};

/// Open an image file and force it to 8-bit RGB.
pub(crate) fn load_rgb(path: &Path) -> DatasetResult<RgbImage> {
    image::open(path)
        .map(|img| img.to_rgb8())
        .map_err(|source| DatasetError::ImageOpenFailed {
            path: path.to_path_buf(),
            source,
        })
}

/// Household object classes shared by the COCO and fine-grained ADE20K defaults.
pub fn default_object_classes() -> Vec<String> {
    [
        "bottle",
        "wine glass",
        "cup",
        "fork",
        "knife",
        "spoon",
        "bowl",
        "chair",
        "couch",
        "bed",
        "dining table",
        "toilet",
        "laptop",
        "mouse",
        "remote",
        "keyboard",
        "microwave",
        "oven",
        "toaster",
        "sink",
        "refrigerator",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

/// Indoor classes of the ADE20K challenge label set.
pub fn default_ade20k_classes() -> Vec<String> {
    [
        "wall",
        "floor, flooring",
        "ceiling",
        "bed",
        "cabinet",
        "door, double door",
        "table",
        "curtain, drape, drapery, mantle, pall",
        "chair",
        "sofa, couch, lounge",
        "shelf",
        "armchair",
        "seat",
        "desk",
        "lamp",
        "chest of drawers, chest, bureau, dresser",
        "pillow",
        "screen door, screen",
        "coffee table, cocktail table",
        "toilet, can, commode, crapper, pot, potty, stool, throne",
        "kitchen island",
        "computer, computing machine, computing device, data processor, electronic computer, information processing system",
        "swivel chair",
        "pole",
        "bannister, banister, balustrade, balusters, handrail",
        "cradle",
        "oven",
        "screen, silver screen, projection screen",
        "blanket, cover",
        "tray",
        "crt screen",
        "plate",
        "monitor, monitoring device",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

#[cfg(test)]
pub(crate) mod fixtures {
    use std::path::Path;

    use image::{GrayImage, Rgb, RgbImage};

    pub fn write_rgb(path: &Path, width: u32, height: u32, pixel: Rgb<u8>) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        RgbImage::from_pixel(width, height, pixel).save(path).unwrap();
    }

    pub fn write_rgb_image(path: &Path, image: &RgbImage) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        image.save(path).unwrap();
    }

    pub fn write_gray_image(path: &Path, image: &GrayImage) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        image.save(path).unwrap();
    }
}
