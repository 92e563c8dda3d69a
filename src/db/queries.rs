use super::models::{AnalysisRow, CacheStats, LyricsUpdate};
use super::{Database, Result};
use rusqlite::{OptionalExtension, params};

impl Database {
    /// Insert or replace the analysis for a track.
    pub fn upsert_analysis(&self, row: &AnalysisRow) -> Result<()> {
        self.conn.execute(
            "INSERT INTO analyses (
                track_id, chord_data, plain_lyrics, lrc_lyrics, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, datetime('now'))
            ON CONFLICT(track_id) DO UPDATE SET
                chord_data = excluded.chord_data,
                plain_lyrics = excluded.plain_lyrics,
                lrc_lyrics = excluded.lrc_lyrics,
                created_at = excluded.created_at,
                updated_at = datetime('now')
            ",
            params![
                row.track_id,
                row.chord_data,
                row.plain_lyrics,
                row.lrc_lyrics,
                row.created_at,
            ],
        )?;
        Ok(())
    }

    pub fn get_analysis(&self, track_id: &str) -> Result<Option<AnalysisRow>> {
        let row = self
            .conn
            .query_row(
                "SELECT track_id, chord_data, plain_lyrics, lrc_lyrics, created_at
                 FROM analyses WHERE track_id = ?1",
                params![track_id],
                |row| {
                    Ok(AnalysisRow {
                        track_id: row.get(0)?,
                        chord_data: row.get(1)?,
                        plain_lyrics: row.get(2)?,
                        lrc_lyrics: row.get(3)?,
                        created_at: row.get(4)?,
                    })
                },
            )
            .optional()?;
        Ok(row)
    }

    /// Change only the lyric columns. Returns false when no row exists for `track_id`.
    pub fn update_lyrics(&self, track_id: &str, update: &LyricsUpdate) -> Result<bool> {
        let tx = self.conn.unchecked_transaction()?;

        let exists: bool = tx
            .query_row(
                "SELECT 1 FROM analyses WHERE track_id = ?1",
                params![track_id],
                |_| Ok(()),
            )
            .optional()?
            .is_some();
        if !exists {
            return Ok(false);
        }

        if let Some(plain) = &update.plain_lyrics {
            tx.execute(
                "UPDATE analyses SET plain_lyrics = ?2, updated_at = datetime('now')
                 WHERE track_id = ?1",
                params![track_id, plain],
            )?;
        }
        if let Some(lrc) = &update.lrc_lyrics {
            tx.execute(
                "UPDATE analyses SET lrc_lyrics = ?2, updated_at = datetime('now')
                 WHERE track_id = ?1",
                params![track_id, lrc],
            )?;
        }

        tx.commit()?;
        Ok(true)
    }

    /// Ids of every cached analysis, oldest first.
    pub fn list_track_ids(&self) -> Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT track_id FROM analyses ORDER BY created_at, track_id")?;
        let ids = stmt
            .query_map([], |row| row.get(0))?
            .collect::<std::result::Result<Vec<String>, _>>()?;
        Ok(ids)
    }

    pub fn stats(&self) -> Result<CacheStats> {
        let stats = self.conn.query_row(
            "SELECT COUNT(*),
                    COUNT(plain_lyrics),
                    COUNT(lrc_lyrics),
                    MAX(created_at)
             FROM analyses",
            [],
            |row| {
                Ok(CacheStats {
                    analyses: row.get(0)?,
                    with_plain_lyrics: row.get(1)?,
                    with_lrc_lyrics: row.get(2)?,
                    newest: row.get(3)?,
                })
            },
        )?;
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(track_id: &str) -> AnalysisRow {
        AnalysisRow {
            track_id: track_id.to_string(),
            chord_data: r#"{"segments":[]}"#.to_string(),
            plain_lyrics: None,
            lrc_lyrics: None,
            created_at: "2026-01-01T00:00:00+00:00".to_string(),
        }
    }

    #[test]
    fn test_upsert_and_get() {
        let db = Database::open_in_memory().unwrap();
        db.upsert_analysis(&row("abc")).unwrap();

        let got = db.get_analysis("abc").unwrap().unwrap();
        assert_eq!(got, row("abc"));
        assert!(db.get_analysis("missing").unwrap().is_none());
    }

    #[test]
    fn test_upsert_overwrites() {
        let db = Database::open_in_memory().unwrap();
        db.upsert_analysis(&row("abc")).unwrap();

        let mut newer = row("abc");
        newer.chord_data = r#"{"segments":[1]}"#.to_string();
        db.upsert_analysis(&newer).unwrap();

        assert_eq!(db.get_analysis("abc").unwrap().unwrap().chord_data, newer.chord_data);
        assert_eq!(db.stats().unwrap().analyses, 1);
    }

    #[test]
    fn test_update_lyrics_touches_only_lyrics() {
        let db = Database::open_in_memory().unwrap();
        db.upsert_analysis(&row("abc")).unwrap();

        let updated = db
            .update_lyrics(
                "abc",
                &LyricsUpdate {
                    plain_lyrics: Some(Some("hello".into())),
                    lrc_lyrics: None,
                },
            )
            .unwrap();
        assert!(updated);

        let got = db.get_analysis("abc").unwrap().unwrap();
        assert_eq!(got.plain_lyrics.as_deref(), Some("hello"));
        assert_eq!(got.lrc_lyrics, None);
        assert_eq!(got.chord_data, row("abc").chord_data);
    }

    #[test]
    fn test_update_lyrics_clears_with_null() {
        let db = Database::open_in_memory().unwrap();
        let mut r = row("abc");
        r.lrc_lyrics = Some("[00:01.00] x".into());
        db.upsert_analysis(&r).unwrap();

        db.update_lyrics(
            "abc",
            &LyricsUpdate {
                plain_lyrics: None,
                lrc_lyrics: Some(None),
            },
        )
        .unwrap();
        assert_eq!(db.get_analysis("abc").unwrap().unwrap().lrc_lyrics, None);
    }

    #[test]
    fn test_update_lyrics_stores_value_verbatim() {
        let db = Database::open_in_memory().unwrap();
        db.upsert_analysis(&row("abc")).unwrap();

        db.update_lyrics(
            "abc",
            &LyricsUpdate {
                plain_lyrics: Some(Some(" one\ntwo\n".into())),
                lrc_lyrics: None,
            },
        )
        .unwrap();
        assert_eq!(
            db.get_analysis("abc").unwrap().unwrap().plain_lyrics.as_deref(),
            Some(" one\ntwo\n")
        );
    }

    #[test]
    fn test_update_lyrics_missing_row() {
        let db = Database::open_in_memory().unwrap();
        let updated = db.update_lyrics("nope", &LyricsUpdate::default()).unwrap();
        assert!(!updated);
    }

    #[test]
    fn test_stats_and_listing() {
        let db = Database::open_in_memory().unwrap();
        assert_eq!(db.stats().unwrap().analyses, 0);
        assert_eq!(db.stats().unwrap().newest, None);

        let mut a = row("a");
        a.plain_lyrics = Some("words".into());
        db.upsert_analysis(&a).unwrap();
        let mut b = row("b");
        b.created_at = "2026-02-01T00:00:00+00:00".into();
        db.upsert_analysis(&b).unwrap();

        let stats = db.stats().unwrap();
        assert_eq!(stats.analyses, 2);
        assert_eq!(stats.with_plain_lyrics, 1);
        assert_eq!(stats.with_lrc_lyrics, 0);
        assert_eq!(stats.newest.as_deref(), Some("2026-02-01T00:00:00+00:00"));
        assert_eq!(db.list_track_ids().unwrap(), vec!["a", "b"]);
    }
}
