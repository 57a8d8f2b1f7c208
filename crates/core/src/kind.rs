use std::fmt;

/// Which independent transport session a frame belongs to.
///
/// Each kind gets its own [`StreamRuntime`](crate::StreamRuntime), its own
/// socket and its own RTP header state. The kind of a runtime never changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamKind {
    Audio,
    Video,
}

impl StreamKind {
    pub const ALL: [StreamKind; 2] = [StreamKind::Audio, StreamKind::Video];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Audio => "audio",
            Self::Video => "video",
        }
    }
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
