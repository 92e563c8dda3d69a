/// One `analyses` row as stored; the cache layer decodes `chord_data`.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisRow {
    pub track_id: String,
    pub chord_data: String,
    pub plain_lyrics: Option<String>,
    pub lrc_lyrics: Option<String>,
    pub created_at: String,
}

/// Lyric fields to change. The outer `None` leaves a column as it is;
/// `Some(None)` clears it. Values are stored exactly as given.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LyricsUpdate {
    pub plain_lyrics: Option<Option<String>>,
    pub lrc_lyrics: Option<Option<String>>,
}

/// Local cache summary.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheStats {
    pub analyses: i64,
    pub with_plain_lyrics: i64,
    pub with_lrc_lyrics: i64,
    pub newest: Option<String>,
}
