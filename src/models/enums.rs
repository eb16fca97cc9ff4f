use crate::db::DatabaseError;
use serde::{Deserialize, Serialize};

/// Macro to generate enum with as_str + std::str::FromStr pattern
macro_rules! str_enum {
    ($name:ident { $($variant:ident => $s:literal),+ $(,)? }) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $s),+
                }
            }
        }

        impl std::str::FromStr for $name {
            type Err = DatabaseError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($s => Ok(Self::$variant)),+,
                    _ => Err(DatabaseError::InvalidEnum {
                        field: stringify!($name).into(),
                        value: s.into(),
                    }),
                }
            }
        }
    };
}

// Pixel layout of a stored file. Names follow the usual raster-library
// mode strings so catalog rows stay readable.
str_enum!(ColorMode {
    L => "L",
    La => "LA",
    Rgb => "RGB",
    Rgba => "RGBA",
    Cmyk => "CMYK",
    Palette => "P",
    L16 => "I;16",
    Rgb16 => "RGB;16",
    Rgba16 => "RGBA;16",
});

impl ColorMode {
    /// Mode of a decoded buffer. Decoders expand palette and CMYK data, so
    /// those two only come from header sniffing.
    pub fn from_color_type(color: image::ColorType) -> Self {
        use image::ColorType;
        match color {
            ColorType::L8 => Self::L,
            ColorType::La8 | ColorType::La16 => Self::La,
            ColorType::L16 => Self::L16,
            ColorType::Rgb16 => Self::Rgb16,
            ColorType::Rgba16 => Self::Rgba16,
            ColorType::Rgba8 | ColorType::Bgra8 => Self::Rgba,
            _ => Self::Rgb,
        }
    }

    pub fn has_alpha(&self) -> bool {
        matches!(self, Self::La | Self::Rgba | Self::Rgba16)
    }
}
