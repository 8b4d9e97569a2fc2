use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{
    error::ValidationError,
    model::OutputFormat,
    ops::params::{decode, non_blank, point_within, require_text, require_url, within},
};

macro_rules! string_enum {
    ($(#[$meta:meta])* $name:ident = $default:ident { $($variant:ident => $raw:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
        #[serde(try_from = "String")]
        pub enum $name {
            $(#[serde(rename = $raw)] $variant),+
        }

        impl $name {
            pub const ALL: &'static [&'static str] = &[$($raw),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $raw),+
                }
            }
        }

        impl Default for $name {
            fn default() -> Self {
                $name::$default
            }
        }

        impl FromStr for $name {
            type Err = Vec<&'static str>;

            fn from_str(raw: &str) -> Result<Self, Self::Err> {
                match raw.trim().to_ascii_lowercase().as_str() {
                    $($raw => Ok($name::$variant),)+
                    _ => Err(Self::ALL.to_vec()),
                }
            }
        }

        impl TryFrom<String> for $name {
            type Error = String;

            fn try_from(raw: String) -> Result<Self, Self::Error> {
                raw.parse().map_err(|allowed: Vec<&'static str>| {
                    format!("`{raw}` is not one of {}", allowed.join(", "))
                })
            }
        }
    };
}

string_enum!(LensType = Vintage {
    Vintage => "vintage",
    Anamorphic => "anamorphic",
    Modern => "modern",
    Classic => "classic",
});

string_enum!(BokehShape = Circular {
    Circular => "circular",
    Oval => "oval",
    Hexagonal => "hexagonal",
    Swirly => "swirly",
});

string_enum!(
    /// Depth estimator to run; each is its own catalog entry.
    DepthModel = Midas {
        Midas => "midas",
        ZoeDepth => "zoedepth",
        DepthAnything => "depth_anything",
    }
);

fn yes() -> bool {
    true
}

/// Simulated focus pull between two points, rendered as video.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RackFocusRequest {
    pub source_url: String,
    pub focus_point_start: [f64; 2],
    pub focus_point_end: [f64; 2],
    #[serde(default = "RackFocusRequest::default_duration")]
    pub duration_seconds: f64,
    #[serde(default = "RackFocusRequest::default_fps")]
    pub fps: u32,
    #[serde(default = "RackFocusRequest::default_blur")]
    pub blur_strength: f64,
}

impl RackFocusRequest {
    fn default_duration() -> f64 {
        2.0
    }

    fn default_fps() -> u32 {
        24
    }

    fn default_blur() -> f64 {
        1.0
    }

    pub fn from_params(raw: &Map<String, Value>) -> Result<Self, ValidationError> {
        let req: Self = decode(raw)?;
        req.validate()?;
        Ok(req)
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        require_url("sourceUrl", &self.source_url)?;
        point_within("focusPointStart", self.focus_point_start, 0.0..=1.0)?;
        point_within("focusPointEnd", self.focus_point_end, 0.0..=1.0)?;
        within("durationSeconds", self.duration_seconds, 0.0..=30.0)?;
        if self.duration_seconds == 0.0 {
            return Err(ValidationError::new("durationSeconds", "must be greater than 0"));
        }
        within("fps", self.fps, 1..=120)?;
        within("blurStrength", self.blur_strength, 0.1..=3.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LensCharacterRequest {
    pub source_url: String,
    #[serde(default)]
    pub lens_type: LensType,
    #[serde(default)]
    pub bokeh_shape: BokehShape,
    #[serde(default = "LensCharacterRequest::default_aberration")]
    pub aberration_strength: f64,
    #[serde(default = "LensCharacterRequest::default_flare")]
    pub flare_intensity: f64,
    #[serde(default = "LensCharacterRequest::default_vignette")]
    pub vignette_strength: f64,
}

impl LensCharacterRequest {
    fn default_aberration() -> f64 {
        0.5
    }

    fn default_flare() -> f64 {
        0.3
    }

    fn default_vignette() -> f64 {
        0.2
    }

    pub fn from_params(raw: &Map<String, Value>) -> Result<Self, ValidationError> {
        let req: Self = decode(raw)?;
        req.validate()?;
        Ok(req)
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        require_url("sourceUrl", &self.source_url)?;
        within("aberrationStrength", self.aberration_strength, 0.0..=1.0)?;
        within("flareIntensity", self.flare_intensity, 0.0..=1.0)?;
        within("vignetteStrength", self.vignette_strength, 0.0..=1.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RescueFocusRequest {
    pub source_url: String,
    #[serde(default = "RescueFocusRequest::default_sharpness")]
    pub sharpness_target: f64,
    #[serde(default = "yes")]
    pub preserve_bokeh: bool,
}

impl RescueFocusRequest {
    fn default_sharpness() -> f64 {
        0.7
    }

    pub fn from_params(raw: &Map<String, Value>) -> Result<Self, ValidationError> {
        let req: Self = decode(raw)?;
        req.validate()?;
        Ok(req)
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        require_url("sourceUrl", &self.source_url)?;
        within("sharpnessTarget", self.sharpness_target, 0.0..=1.0)
    }
}

/// Natural-language image edit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectorEditRequest {
    pub source_url: String,
    pub instruction: String,
    #[serde(default = "yes")]
    pub preserve_identity: bool,
    #[serde(default = "DirectorEditRequest::default_strength")]
    pub strength: f64,
}

impl DirectorEditRequest {
    fn default_strength() -> f64 {
        0.7
    }

    pub fn from_params(raw: &Map<String, Value>) -> Result<Self, ValidationError> {
        let req: Self = decode(raw)?;
        req.validate()?;
        Ok(req)
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        require_url("sourceUrl", &self.source_url)?;
        require_text("instruction", &self.instruction)?;
        within("strength", self.strength, 0.1..=1.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DepthMapRequest {
    pub source_url: String,
    #[serde(default)]
    pub model: DepthModel,
}

impl DepthMapRequest {
    pub fn from_params(raw: &Map<String, Value>) -> Result<Self, ValidationError> {
        let req: Self = decode(raw)?;
        req.validate()?;
        Ok(req)
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        require_url("sourceUrl", &self.source_url)
    }
}

/// Text-guided segmentation when `prompt` is set, automatic masks otherwise.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SegmentRequest {
    pub source_url: String,
    #[serde(
        default,
        deserialize_with = "non_blank",
        skip_serializing_if = "Option::is_none"
    )]
    pub prompt: Option<String>,
}

impl SegmentRequest {
    pub fn from_params(raw: &Map<String, Value>) -> Result<Self, ValidationError> {
        let req: Self = decode(raw)?;
        req.validate()?;
        Ok(req)
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        require_url("sourceUrl", &self.source_url)
    }
}

/// A validated request for any registered operation.
#[derive(Debug, Clone, PartialEq)]
pub enum TypedRequest {
    RackFocus(RackFocusRequest),
    LensCharacter(LensCharacterRequest),
    RescueFocus(RescueFocusRequest),
    DirectorEdit(DirectorEditRequest),
    DepthMap(DepthMapRequest),
    Segment(SegmentRequest),
}

impl TypedRequest {
    pub fn operation(&self) -> &'static str {
        match self {
            TypedRequest::RackFocus(_) => "rack_focus",
            TypedRequest::LensCharacter(_) => "lens_character",
            TypedRequest::RescueFocus(_) => "rescue_focus",
            TypedRequest::DirectorEdit(_) => "director_edit",
            TypedRequest::DepthMap(_) => "depth_map",
            TypedRequest::Segment(_) => "segment",
        }
    }

    /// Catalog id of the model that serves this request.
    pub fn model_id(&self) -> &'static str {
        match self {
            TypedRequest::RackFocus(_) => "learn2refocus",
            TypedRequest::LensCharacter(_) => "genfocus",
            TypedRequest::RescueFocus(_) => "diffcamera",
            TypedRequest::DirectorEdit(_) => "qwen-vl",
            TypedRequest::DepthMap(req) => req.model.as_str(),
            TypedRequest::Segment(req) if req.prompt.is_some() => "grounded-sam",
            TypedRequest::Segment(_) => "sam2",
        }
    }

    pub fn output_format(&self) -> OutputFormat {
        match self {
            TypedRequest::RackFocus(_) => OutputFormat::MP4,
            _ => OutputFormat::PNG,
        }
    }

    /// The validated fields, camelCase, defaults filled in.
    pub fn to_params(&self) -> Value {
        let encoded = match self {
            TypedRequest::RackFocus(req) => serde_json::to_value(req),
            TypedRequest::LensCharacter(req) => serde_json::to_value(req),
            TypedRequest::RescueFocus(req) => serde_json::to_value(req),
            TypedRequest::DirectorEdit(req) => serde_json::to_value(req),
            TypedRequest::DepthMap(req) => serde_json::to_value(req),
            TypedRequest::Segment(req) => serde_json::to_value(req),
        };
        // plain structs of numbers, strings and bools always encode
        encoded.unwrap_or(Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn map(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn director_edit_fills_defaults() {
        let req = DirectorEditRequest::from_params(&map(json!({
            "sourceUrl": "https://img.test/portrait.jpg",
            "instruction": "golden hour lighting",
        })))
        .unwrap();
        assert!(req.preserve_identity);
        assert_eq!(req.strength, 0.7);
    }

    #[test]
    fn director_edit_rejects_out_of_range_strength() {
        let err = DirectorEditRequest::from_params(&map(json!({
            "sourceUrl": "https://img.test/portrait.jpg",
            "instruction": "add lens flare",
            "strength": 5.0,
        })))
        .unwrap_err();
        assert_eq!(err.field, "strength");
    }

    #[test]
    fn lens_character_rejects_unknown_lens() {
        let err = LensCharacterRequest::from_params(&map(json!({
            "sourceUrl": "https://img.test/a.jpg",
            "lensType": "fisheye",
        })))
        .unwrap_err();
        assert_eq!(err.field, "lensType");
        assert!(err.reason.contains("vintage, anamorphic, modern, classic"));
    }

    #[test]
    fn rack_focus_requires_positive_duration() {
        let err = RackFocusRequest::from_params(&map(json!({
            "sourceUrl": "https://img.test/a.jpg",
            "focusPointStart": [0.1, 0.1],
            "focusPointEnd": [0.9, 0.9],
            "durationSeconds": 0,
        })))
        .unwrap_err();
        assert_eq!(err.field, "durationSeconds");
    }

    #[test]
    fn rack_focus_names_mistyped_field() {
        let err = RackFocusRequest::from_params(&map(json!({
            "sourceUrl": "https://img.test/a.jpg",
            "focusPointStart": [0.1, 0.1],
            "focusPointEnd": [0.9],
            "fps": 30,
        })))
        .unwrap_err();
        assert_eq!(err.field, "focusPointEnd");
    }

    #[test]
    fn blank_instruction_is_missing() {
        let err = DirectorEditRequest::from_params(&map(json!({
            "sourceUrl": "https://img.test/portrait.jpg",
            "instruction": "  ",
            "strength": null,
        })))
        .unwrap_err();
        assert_eq!(err.field, "instruction");
        assert_eq!(err.reason, "field is required");
    }

    #[test]
    fn segment_model_follows_prompt() {
        let auto = TypedRequest::Segment(
            SegmentRequest::from_params(&map(json!({"sourceUrl": "https://img.test/a.jpg"})))
                .unwrap(),
        );
        let guided = TypedRequest::Segment(
            SegmentRequest::from_params(&map(json!({
                "sourceUrl": "https://img.test/a.jpg",
                "prompt": "the red car",
            })))
            .unwrap(),
        );
        assert_eq!(auto.model_id(), "sam2");
        assert_eq!(guided.model_id(), "grounded-sam");
    }

    #[test]
    fn depth_model_selects_catalog_entry() {
        let req = DepthMapRequest::from_params(&map(json!({
            "sourceUrl": "https://img.test/a.jpg",
            "model": "Depth_Anything",
        })))
        .unwrap();
        assert_eq!(TypedRequest::DepthMap(req).model_id(), "depth_anything");
    }

    #[test]
    fn params_echo_uses_wire_names() {
        let req = TypedRequest::LensCharacter(
            LensCharacterRequest::from_params(&map(json!({"sourceUrl": "https://img.test/a.jpg"})))
                .unwrap(),
        );
        let params = req.to_params();
        assert_eq!(params["lensType"], "vintage");
        assert_eq!(params["bokehShape"], "circular");
        assert_eq!(params["flareIntensity"], 0.3);
    }
}
