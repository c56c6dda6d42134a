//! Value types shared by the service façade and its callers.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::codec::to_data_url;

macro_rules! string_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum $name {
            $(#[serde(rename = $text)] $variant),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                $name::ALL
                    .iter()
                    .copied()
                    .find(|v| v.as_str().eq_ignore_ascii_case(s.trim()))
                    .ok_or_else(|| {
                        let allowed: Vec<_> = $name::ALL.iter().map(|v| v.as_str()).collect();
                        format!("'{s}' is not one of {}", allowed.join(", "))
                    })
            }
        }
    };
}

string_enum!(
    /// Output frame of a generated image.
    AspectRatio {
        Square => "1:1",
        Portrait2x3 => "2:3",
        Landscape3x2 => "3:2",
        Portrait3x4 => "3:4",
        Landscape4x3 => "4:3",
        Portrait9x16 => "9:16",
        Landscape16x9 => "16:9",
        Ultrawide21x9 => "21:9",
    }
);

string_enum!(
    /// Resolution tier of a generated image.
    ImageSize {
        OneK => "1K",
        TwoK => "2K",
        FourK => "4K",
    }
);

string_enum!(
    /// Frame of a generated video.
    VideoAspect {
        Landscape => "16:9",
        Portrait => "9:16",
    }
);

impl Default for AspectRatio {
    fn default() -> Self {
        AspectRatio::Square
    }
}

impl Default for ImageSize {
    fn default() -> Self {
        ImageSize::OneK
    }
}

impl Default for VideoAspect {
    fn default() -> Self {
        VideoAspect::Landscape
    }
}

/// Base64 media returned inline by the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InlineMedia {
    pub mime_type: String,
    pub data: String,
}

impl InlineMedia {
    pub fn to_data_url(&self) -> String {
        to_data_url(&self.mime_type, &self.data)
    }
}

/// A source cited by a grounded answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroundingLink {
    pub uri: String,
    #[serde(default)]
    pub title: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroundedAnswer {
    pub text: String,
    pub links: Vec<GroundingLink>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LatLng {
    pub latitude: f64,
    pub longitude: f64,
}

/// A finished video download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoAsset {
    /// Where the provider hosted the video.
    pub uri: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aspect_ratio_parses_and_displays() {
        assert_eq!("16:9".parse::<AspectRatio>().unwrap(), AspectRatio::Landscape16x9);
        assert_eq!(AspectRatio::Ultrawide21x9.to_string(), "21:9");
        assert!("5:4".parse::<AspectRatio>().is_err());
    }

    #[test]
    fn image_size_parse_is_case_insensitive() {
        assert_eq!("2k".parse::<ImageSize>().unwrap(), ImageSize::TwoK);
        let json = serde_json::to_value(ImageSize::FourK).unwrap();
        assert_eq!(json, "4K");
    }

    #[test]
    fn inline_media_renders_data_url() {
        let media = InlineMedia {
            mime_type: "image/png".into(),
            data: "iVBOR".into(),
        };
        assert_eq!(media.to_data_url(), "data:image/png;base64,iVBOR");
    }
}
