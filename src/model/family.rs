use std::fmt;

use serde::{Deserialize, Serialize};

/// Unit of mutual exclusion in accelerator memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelFamily {
    Depth,
    FocusEffects,
    Edit,
    Video,
    Segment,
    ImageGeneration,
    Other,
}

/// Keyword table consulted in order; the first family with a matching
/// keyword wins.
const FAMILY_KEYWORDS: &[(ModelFamily, &[&str])] = &[
    (
        ModelFamily::Depth,
        &["depth_anything", "depth-anything", "midas", "zoedepth", "depth"],
    ),
    (
        ModelFamily::FocusEffects,
        &["learn2refocus", "genfocus", "diffcamera", "refocus", "bokeh"],
    ),
    (ModelFamily::Edit, &["qwen", "instruct-pix2pix", "edit"]),
    (
        ModelFamily::Video,
        &["stable-video", "svd", "cogvideo", "video"],
    ),
    (ModelFamily::Segment, &["grounded-sam", "sam", "segment"]),
    (
        ModelFamily::ImageGeneration,
        &["sdxl", "flux", "stable-diffusion", "txt2img"],
    ),
];

impl ModelFamily {
    pub fn resolve(model_id: &str) -> ModelFamily {
        let id = model_id.to_ascii_lowercase();
        FAMILY_KEYWORDS
            .iter()
            .find(|(_, keywords)| keywords.iter().any(|kw| id.contains(kw)))
            .map(|(family, _)| *family)
            .unwrap_or(ModelFamily::Other)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ModelFamily::Depth => "depth",
            ModelFamily::FocusEffects => "focus_effects",
            ModelFamily::Edit => "edit",
            ModelFamily::Video => "video",
            ModelFamily::Segment => "segment",
            ModelFamily::ImageGeneration => "image_generation",
            ModelFamily::Other => "other",
        }
    }
}

impl fmt::Display for ModelFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_known_ids() {
        assert_eq!(ModelFamily::resolve("depth_anything"), ModelFamily::Depth);
        assert_eq!(ModelFamily::resolve("midas"), ModelFamily::Depth);
        assert_eq!(ModelFamily::resolve("learn2refocus"), ModelFamily::FocusEffects);
        assert_eq!(ModelFamily::resolve("diffcamera"), ModelFamily::FocusEffects);
        assert_eq!(ModelFamily::resolve("qwen-vl"), ModelFamily::Edit);
        assert_eq!(ModelFamily::resolve("sam2"), ModelFamily::Segment);
        assert_eq!(ModelFamily::resolve("grounded-sam"), ModelFamily::Segment);
        assert_eq!(ModelFamily::resolve("stable-video-diffusion"), ModelFamily::Video);
        assert_eq!(ModelFamily::resolve("sdxl-base"), ModelFamily::ImageGeneration);
    }

    #[test]
    fn unmatched_ids_fall_back_to_other() {
        assert_eq!(ModelFamily::resolve("rembg"), ModelFamily::Other);
        assert_eq!(ModelFamily::resolve(""), ModelFamily::Other);
    }

    #[test]
    fn first_family_in_table_order_wins() {
        // matches both the depth and the video keyword lists
        assert_eq!(ModelFamily::resolve("video-depth"), ModelFamily::Depth);
        // matches both the edit and the segment keyword lists
        assert_eq!(ModelFamily::resolve("sam-edit"), ModelFamily::Edit);
    }

    #[test]
    fn matching_ignores_case() {
        assert_eq!(ModelFamily::resolve("ZoeDepth"), ModelFamily::Depth);
    }
}
