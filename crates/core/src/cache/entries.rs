//! Asset row CRUD operations.

use super::connection::CacheDb;
use crate::Error;
use tokio_rusqlite::params;
use tokio_rusqlite::rusqlite;

/// One persisted asset as stored in the `assets` table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetRow {
    pub category: String,
    pub key_hash: String,
    pub url: String,
    pub content_type: Option<String>,
    pub content_length: i64,
    pub body: Vec<u8>,
    pub stored_at: String,
    pub expires_at: Option<String>,
    pub max_age: Option<i64>,
    pub headers_json: String,
}

impl CacheDb {
    /// Insert or replace an asset row.
    pub async fn upsert_asset(&self, row: AssetRow) -> Result<(), Error> {
        self.conn
            .call(move |conn| -> Result<(), Error> {
                conn.execute(
                    "INSERT INTO assets (
                    category, key_hash, url, content_type, content_length, body,
                    stored_at, expires_at, max_age, headers_json
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
                ON CONFLICT(category, key_hash) DO UPDATE SET
                    url = excluded.url,
                    content_type = excluded.content_type,
                    content_length = excluded.content_length,
                    body = excluded.body,
                    stored_at = excluded.stored_at,
                    expires_at = excluded.expires_at,
                    max_age = excluded.max_age,
                    headers_json = excluded.headers_json",
                    params![
                        &row.category,
                        &row.key_hash,
                        &row.url,
                        &row.content_type,
                        row.content_length,
                        &row.body,
                        &row.stored_at,
                        &row.expires_at,
                        &row.max_age,
                        &row.headers_json,
                    ],
                )?;
                Ok(())
            })
            .await
            .map_err(Error::from)
    }

    /// Get an asset row by category and row key.
    ///
    /// Returns None if no row exists.
    pub async fn get_asset(&self, category: &str, key_hash: &str) -> Result<Option<AssetRow>, Error> {
        let category = category.to_string();
        let key_hash = key_hash.to_string();
        self.conn
            .call(move |conn| -> Result<Option<AssetRow>, Error> {
                let mut stmt = conn.prepare(
                    "SELECT
                    category, key_hash, url, content_type, content_length, body,
                    stored_at, expires_at, max_age, headers_json
                FROM assets WHERE category = ?1 AND key_hash = ?2",
                )?;

                let result = stmt.query_row(params![category, key_hash], |row| {
                    Ok(AssetRow {
                        category: row.get(0)?,
                        key_hash: row.get(1)?,
                        url: row.get(2)?,
                        content_type: row.get(3)?,
                        content_length: row.get(4)?,
                        body: row.get(5)?,
                        stored_at: row.get(6)?,
                        expires_at: row.get(7)?,
                        max_age: row.get(8)?,
                        headers_json: row.get(9)?,
                    })
                });

                match result {
                    Ok(row) => Ok(Some(row)),
                    Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                    Err(e) => Err(e.into()),
                }
            })
            .await
            .map_err(Error::from)
    }

    /// Delete an asset row.
    ///
    /// Returns whether a row was removed.
    pub async fn delete_asset(&self, category: &str, key_hash: &str) -> Result<bool, Error> {
        let category = category.to_string();
        let key_hash = key_hash.to_string();
        self.conn
            .call(move |conn| -> Result<bool, Error> {
                let count = conn.execute(
                    "DELETE FROM assets WHERE category = ?1 AND key_hash = ?2",
                    params![category, key_hash],
                )?;
                Ok(count > 0)
            })
            .await
            .map_err(Error::from)
    }

    /// Number of rows stored for a category.
    pub async fn count_assets(&self, category: &str) -> Result<u64, Error> {
        let category = category.to_string();
        self.conn
            .call(move |conn| -> Result<u64, Error> {
                let count: i64 =
                    conn.query_row("SELECT COUNT(*) FROM assets WHERE category = ?1", params![category], |row| {
                        row.get(0)
                    })?;
                Ok(count as u64)
            })
            .await
            .map_err(Error::from)
    }
}
