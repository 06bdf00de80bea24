//! Track session: the loaded image plus the parameters parsed from its header.

use std::sync::Arc;

/// Header fields consumed as playback parameters.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TrackMetadata {
    pub title: String,
    pub game: String,
    pub author: String,
    pub comment: String,
    pub date: String,
    /// Target play length before the fade starts. 0 means unknown.
    pub duration_secs: u32,
    /// Fade-out length after the target duration.
    pub fade_ms: u32,
}

/// One loaded track, replaced wholesale on the next load.
#[derive(Clone, Debug)]
pub struct TrackSession {
    pub image: Arc<[u8]>,
    pub metadata: TrackMetadata,
    /// File name the image was read from.
    pub filename: String,
    /// Member paths when the image came from a bundle.
    pub files: Vec<String>,
    /// Index of the playing member in `files`.
    pub index: usize,
}

impl TrackSession {
    pub fn new(filename: impl Into<String>, image: impl Into<Arc<[u8]>>, metadata: TrackMetadata) -> Self {
        Self {
            image: image.into(),
            metadata,
            filename: filename.into(),
            files: Vec::new(),
            index: 0,
        }
    }

    pub fn with_playlist(mut self, files: Vec<String>, index: usize) -> Self {
        self.index = index.min(files.len().saturating_sub(1));
        self.files = files;
        self
    }

    /// `"game - title"`, dropping blank parts; the file name when both are blank.
    pub fn display_title(&self) -> String {
        let joined = join_non_blank(&[&self.metadata.game, &self.metadata.title], " - ");
        if joined.is_empty() {
            self.filename.clone()
        } else {
            joined
        }
    }

    /// `"author, comment"`, dropping blank parts.
    pub fn subtitle(&self) -> String {
        join_non_blank(&[&self.metadata.author, &self.metadata.comment], ", ")
    }

    /// Target duration in seconds, if the header carries one.
    pub fn target_secs(&self) -> Option<f64> {
        (self.metadata.duration_secs > 0).then_some(self.metadata.duration_secs as f64)
    }

    pub fn fade_secs(&self) -> f64 {
        self.metadata.fade_ms as f64 / 1000.0
    }

    pub fn is_empty(&self) -> bool {
        self.image.is_empty()
    }
}

fn join_non_blank(parts: &[&str], sep: &str) -> String {
    parts
        .iter()
        .map(|p| p.trim())
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join(sep)
}

/// Playlist labels: member paths with their shared directory prefix removed.
///
/// The longest common prefix is cut back to its last `/`, so a shared partial
/// file name stays visible.
pub fn display_names(files: &[String]) -> Vec<String> {
    let Some(first) = files.first() else {
        return Vec::new();
    };
    let mut common = first.len();
    for file in &files[1..] {
        common = first
            .char_indices()
            .zip(file.chars())
            .take_while(|((i, a), b)| *i < common && a == b)
            .last()
            .map_or(0, |((i, a), _)| i + a.len_utf8());
    }
    let prefix = first[..common].rfind('/').map_or(0, |i| i + 1);
    files
        .iter()
        .map(|f| f.get(prefix..).unwrap_or(f).to_string())
        .collect()
}

/// `m:ss` clock text for a position in seconds.
pub fn format_clock(secs: f64) -> String {
    let total = if secs.is_finite() && secs > 0.0 { secs.floor() as u64 } else { 0 };
    format!("{}:{:02}", total / 60, total % 60)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(game: &str, title: &str) -> TrackSession {
        TrackSession::new(
            "castle.spc",
            vec![1u8, 2],
            TrackMetadata {
                game: game.into(),
                title: title.into(),
                ..Default::default()
            },
        )
    }

    #[test]
    fn title_joins_game_and_title() {
        assert_eq!(session("Hack", "Castle").display_title(), "Hack - Castle");
        assert_eq!(session("", "Castle").display_title(), "Castle");
        assert_eq!(session(" ", "").display_title(), "castle.spc");
    }

    #[test]
    fn subtitle_skips_blank_parts() {
        let mut s = session("", "");
        s.metadata.author = "Composer".into();
        assert_eq!(s.subtitle(), "Composer");
        s.metadata.comment = "ported".into();
        assert_eq!(s.subtitle(), "Composer, ported");
    }

    #[test]
    fn unknown_duration_has_no_target() {
        let mut s = session("", "");
        assert_eq!(s.target_secs(), None);
        s.metadata.duration_secs = 90;
        s.metadata.fade_ms = 2500;
        assert_eq!(s.target_secs(), Some(90.0));
        assert_eq!(s.fade_secs(), 2.5);
    }

    #[test]
    fn playlist_index_is_clamped() {
        let s = session("", "").with_playlist(vec!["a.spc".into(), "b.spc".into()], 9);
        assert_eq!(s.index, 1);
    }

    #[test]
    fn display_names_strip_shared_directory() {
        let files = vec![
            "pack/music/level1.spc".to_string(),
            "pack/music/level2.spc".to_string(),
            "pack/music/boss.spc".to_string(),
        ];
        assert_eq!(display_names(&files), ["level1.spc", "level2.spc", "boss.spc"]);
    }

    #[test]
    fn display_names_keep_partial_file_prefix() {
        let files = vec!["a/level1.spc".to_string(), "a/level2.spc".to_string()];
        assert_eq!(display_names(&files), ["level1.spc", "level2.spc"]);

        let flat = vec!["one.spc".to_string(), "two.spc".to_string()];
        assert_eq!(display_names(&flat), ["one.spc", "two.spc"]);
        assert!(display_names(&[]).is_empty());
    }

    #[test]
    fn clock_formatting() {
        assert_eq!(format_clock(0.0), "0:00");
        assert_eq!(format_clock(9.9), "0:09");
        assert_eq!(format_clock(75.0), "1:15");
        assert_eq!(format_clock(-3.0), "0:00");
    }
}
