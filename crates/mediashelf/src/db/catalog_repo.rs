//! Catalog repository: series, episodes and episode cross-references.

use chrono::NaiveDate;
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::content_repo::parse_time;
use super::DatabaseError;
use crate::model::{Episode, EpisodeAssociation, Series};

fn parse_date(value: Option<String>) -> Option<NaiveDate> {
    value.and_then(|v| NaiveDate::parse_from_str(&v, "%Y-%m-%d").ok())
}

fn series_from_row(row: &Row<'_>) -> Result<Series, rusqlite::Error> {
    Ok(Series {
        id: row.get("id")?,
        name: row.get("name")?,
        episode_count: row.get("episode_count")?,
        episodes_with_files: row.get("episodes_with_files")?,
        missing_episodes: row.get("missing_episodes")?,
        latest_local_air_date: parse_date(row.get("latest_local_air_date")?),
        stats_updated_at: row
            .get::<_, Option<String>>("stats_updated_at")?
            .map(|s| parse_time(&s)),
    })
}

fn episode_from_row(row: &Row<'_>) -> Result<Episode, rusqlite::Error> {
    Ok(Episode {
        id: row.get("id")?,
        series_id: row.get("series_id")?,
        number: row.get("number")?,
        title: row.get("title")?,
        air_date: parse_date(row.get("air_date")?),
    })
}

fn xref_from_row(row: &Row<'_>) -> Result<EpisodeAssociation, rusqlite::Error> {
    Ok(EpisodeAssociation {
        hash: row.get("hash")?,
        episode_id: row.get("episode_id")?,
        series_id: row.get("series_id")?,
    })
}

pub fn upsert_series(conn: &Connection, series: &Series) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO series (id, name, episode_count, episodes_with_files, missing_episodes,
            latest_local_air_date, stats_updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
         ON CONFLICT(id) DO UPDATE SET name=excluded.name, episode_count=excluded.episode_count,
            episodes_with_files=excluded.episodes_with_files,
            missing_episodes=excluded.missing_episodes,
            latest_local_air_date=excluded.latest_local_air_date,
            stats_updated_at=excluded.stats_updated_at",
        params![
            series.id,
            series.name,
            series.episode_count,
            series.episodes_with_files,
            series.missing_episodes,
            series.latest_local_air_date.map(|d| d.to_string()),
            series.stats_updated_at.map(|t| t.to_rfc3339()),
        ],
    )?;
    Ok(())
}

/// Inserts or renames a series without touching its aggregate stats.
pub fn merge_series_name(conn: &Connection, id: i64, name: &str) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO series (id, name) VALUES (?1, ?2)
         ON CONFLICT(id) DO UPDATE SET name=excluded.name",
        params![id, name],
    )?;
    Ok(())
}

pub fn find_series(conn: &Connection, id: i64) -> Result<Option<Series>, DatabaseError> {
    Ok(conn
        .query_row("SELECT * FROM series WHERE id = ?1", params![id], series_from_row)
        .optional()?)
}

pub fn upsert_episode(conn: &Connection, episode: &Episode) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO episodes (id, series_id, number, title, air_date) VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT(id) DO UPDATE SET series_id=excluded.series_id, number=excluded.number,
            title=excluded.title, air_date=excluded.air_date",
        params![
            episode.id,
            episode.series_id,
            episode.number,
            episode.title,
            episode.air_date.map(|d| d.to_string()),
        ],
    )?;
    Ok(())
}

pub fn find_episode(conn: &Connection, id: i64) -> Result<Option<Episode>, DatabaseError> {
    Ok(conn
        .query_row("SELECT * FROM episodes WHERE id = ?1", params![id], episode_from_row)
        .optional()?)
}

/// Episodes of a series, latest air date first. Undated episodes sort last.
pub fn episodes_for_series(conn: &Connection, series_id: i64) -> Result<Vec<Episode>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT * FROM episodes WHERE series_id = ?1
         ORDER BY air_date IS NULL, air_date DESC, number DESC",
    )?;
    let rows = stmt
        .query_map(params![series_id], episode_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn insert_xref(conn: &Connection, xref: &EpisodeAssociation) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO episode_xrefs (hash, episode_id, series_id) VALUES (?1, ?2, ?3)
         ON CONFLICT(hash, episode_id) DO UPDATE SET series_id=excluded.series_id",
        params![xref.hash, xref.episode_id, xref.series_id],
    )?;
    Ok(())
}

pub fn delete_xref(conn: &Connection, hash: &str, episode_id: i64) -> Result<bool, DatabaseError> {
    let affected = conn.execute(
        "DELETE FROM episode_xrefs WHERE hash = ?1 AND episode_id = ?2",
        params![hash, episode_id],
    )?;
    Ok(affected > 0)
}

pub fn xrefs_for_hash(conn: &Connection, hash: &str) -> Result<Vec<EpisodeAssociation>, DatabaseError> {
    let mut stmt =
        conn.prepare("SELECT * FROM episode_xrefs WHERE hash = ?1 ORDER BY episode_id")?;
    let rows = stmt
        .query_map(params![hash], xref_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn xrefs_for_episode(
    conn: &Connection,
    episode_id: i64,
) -> Result<Vec<EpisodeAssociation>, DatabaseError> {
    let mut stmt =
        conn.prepare("SELECT * FROM episode_xrefs WHERE episode_id = ?1 ORDER BY hash")?;
    let rows = stmt
        .query_map(params![episode_id], xref_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn list_xrefs(conn: &Connection) -> Result<Vec<EpisodeAssociation>, DatabaseError> {
    let mut stmt = conn.prepare("SELECT * FROM episode_xrefs ORDER BY hash, episode_id")?;
    let rows = stmt
        .query_map([], xref_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}
