//! Icon format sniffing for display and file naming

use dssb_core::ServerKey;

/// Image format guessed from an icon's magic bytes
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum IconFormat {
    Png,
    Jpeg,
    Unknown,
}

impl IconFormat {
    pub fn sniff(data: &[u8]) -> Self {
        if data.starts_with(b"\x89PNG") {
            Self::Png
        } else if data.starts_with(b"\xff\xd8") {
            Self::Jpeg
        } else {
            Self::Unknown
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            Self::Png => "png",
            Self::Jpeg => "jpg",
            Self::Unknown => "bin",
        }
    }
}

/// File name for a saved icon, e.g. `dss_10.0.0.1_4000.png`
pub fn icon_file_name(key: &ServerKey, data: &[u8]) -> String {
    format!(
        "dss_{}_{}.{}",
        key.ip.replace(':', "_"),
        key.port,
        IconFormat::sniff(data).extension()
    )
}
