//! Core types for the pipeline system

/// One of the two parallel paths between decoder and transfer stage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    /// Gray frames in, packed bitmaps out
    Video,
    /// PCM windows in, tone bytes out
    Audio,
}

impl MediaKind {
    /// Name of the stage converting this path
    pub fn stage_name(&self) -> &'static str {
        match self {
            MediaKind::Video => "DitherStage",
            MediaKind::Audio => "SpectrumStage",
        }
    }

    /// What one conversion unit of this path is called in logs
    pub fn unit_name(&self) -> &'static str {
        match self {
            MediaKind::Video => "frames",
            MediaKind::Audio => "windows",
        }
    }
}

impl std::fmt::Display for MediaKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MediaKind::Video => write!(f, "video"),
            MediaKind::Audio => write!(f, "audio"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_names() {
        assert_eq!(MediaKind::Video.stage_name(), "DitherStage");
        assert_eq!(MediaKind::Audio.unit_name(), "windows");
        assert_eq!(MediaKind::Audio.to_string(), "audio");
    }
}
