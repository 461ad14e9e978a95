use anyhow::{bail, Context, Result};
use chrono::Utc;
use serde::Serialize;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::{Sqlite, Transaction};
use std::collections::BTreeMap;
use std::str::FromStr;

/// Group reserved for flat, ungrouped strings stored in `lang/<locale>.json`
pub const GENERAL_GROUP: &str = "general";

/// Maximum length of a translation key
pub const MAX_KEY_LENGTH: usize = 500;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Translation {
    pub id: i64,
    pub key: String,
    pub group: Option<String>,
    pub values: BTreeMap<String, String>,
    pub created_at: String,
    pub updated_at: String,
}

impl Translation {
    /// Whether this record belongs in the flat JSON file
    pub fn is_general(&self) -> bool {
        is_general_group(self.group.as_deref())
    }

    /// Key as shown to editors: grouped keys are prefixed with their group
    pub fn display_key(&self) -> String {
        match self.group.as_deref() {
            Some(group) if !self.is_general() => format!("{}.{}", group, self.key),
            _ => self.key.clone(),
        }
    }
}

pub fn is_general_group(group: Option<&str>) -> bool {
    matches!(group, None | Some(GENERAL_GROUP))
}

/// Whether `group` can name a file inside a locale directory.
pub fn is_valid_group_name(group: &str) -> bool {
    !group.is_empty()
        && !group.contains(['/', '\\', '\0'])
        && !group.contains("..")
}

/// A single locale value of a record, as read by the publisher
#[derive(Debug, Clone, PartialEq)]
pub struct LocaleEntry {
    pub group: Option<String>,
    pub key: String,
    pub value: String,
}

/// What a merge did to the stored record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    Created,
    Updated,
    Unchanged,
}

/// Filter for listing translations in the admin API
#[derive(Debug, Clone, Default)]
pub struct TranslationFilter {
    pub group: Option<String>,
    pub search: Option<String>,
    pub limit: i64,
    pub offset: i64,
}

#[derive(sqlx::FromRow)]
struct TranslationRow {
    id: i64,
    key: String,
    group: Option<String>,
    values: String,
    created_at: String,
    updated_at: String,
}

impl TryFrom<TranslationRow> for Translation {
    type Error = anyhow::Error;

    fn try_from(row: TranslationRow) -> Result<Self> {
        let values = decode_values(&row.values)
            .with_context(|| format!("Corrupt values for translation {}", row.id))?;
        Ok(Translation {
            id: row.id,
            key: row.key,
            group: row.group,
            values,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

const SELECT_COLUMNS: &str =
    r#"SELECT id, "key", "group", "values", created_at, updated_at FROM translations"#;

#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Connect to the database and create tables
    pub async fn new(database_url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)
            .context(format!("Invalid database URL {}", database_url))?
            .create_if_missing(true);

        let parent = options.get_filename().parent().filter(|p| !p.as_os_str().is_empty());
        if let Some(parent) = parent {
            std::fs::create_dir_all(parent)
                .context(format!("Failed to create database directory {}", parent.display()))?;
        }

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .context(format!("Failed to open database at {}", database_url))?;

        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS translations (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                "key" TEXT NOT NULL,
                "group" TEXT,
                "values" TEXT NOT NULL DEFAULT '{}',
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                UNIQUE ("key", "group")
            )"#,
        )
        .execute(&pool)
        .await
        .context("Failed to create translations table")?;

        sqlx::query(r#"CREATE INDEX IF NOT EXISTS translations_group_index ON translations ("group")"#)
            .execute(&pool)
            .await
            .context("Failed to create translations group index")?;

        Ok(Self { pool })
    }

    /// Start a transaction for a batch of merges
    pub async fn begin(&self) -> Result<StoreTransaction> {
        let tx = self.pool.begin().await.context("Failed to start transaction")?;
        Ok(StoreTransaction { tx })
    }

    /// Merge locale values into a record in its own transaction
    pub async fn merge_values(
        &self,
        key: &str,
        group: Option<&str>,
        values: &BTreeMap<String, String>,
        overwrite: bool,
    ) -> Result<MergeOutcome> {
        let mut tx = self.begin().await?;
        let outcome = tx.merge_values(key, group, values, overwrite).await?;
        tx.commit().await?;
        Ok(outcome)
    }

    /// Find a record by its identity
    pub async fn find(&self, key: &str, group: Option<&str>) -> Result<Option<Translation>> {
        let row = sqlx::query_as::<_, TranslationRow>(&format!(
            r#"{SELECT_COLUMNS} WHERE "key" = ?1 AND "group" IS ?2"#
        ))
        .bind(key)
        .bind(group)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to look up translation")?;

        row.map(Translation::try_from).transpose()
    }

    pub async fn find_by_id(&self, id: i64) -> Result<Option<Translation>> {
        let row = sqlx::query_as::<_, TranslationRow>(&format!("{SELECT_COLUMNS} WHERE id = ?1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to look up translation")?;

        row.map(Translation::try_from).transpose()
    }

    /// Replace all values of a record (editor action)
    ///
    /// Returns false when the record does not exist.
    pub async fn update_values(&self, id: i64, values: &BTreeMap<String, String>) -> Result<bool> {
        let rows_affected = sqlx::query(
            r#"UPDATE translations SET "values" = ?1, updated_at = ?2 WHERE id = ?3"#,
        )
        .bind(encode_values(values)?)
        .bind(Utc::now().to_rfc3339())
        .bind(id)
        .execute(&self.pool)
        .await
        .context("Failed to update translation")?
        .rows_affected();

        Ok(rows_affected > 0)
    }

    /// Delete a record (operator action)
    pub async fn delete(&self, id: i64) -> Result<bool> {
        let rows_affected = sqlx::query("DELETE FROM translations WHERE id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await
            .context("Failed to delete translation")?
            .rows_affected();

        Ok(rows_affected > 0)
    }

    /// All values present for a locale, in storage order
    pub async fn entries_for_locale(&self, locale: &str) -> Result<Vec<LocaleEntry>> {
        let rows = sqlx::query_as::<_, TranslationRow>(&format!("{SELECT_COLUMNS} ORDER BY id"))
            .fetch_all(&self.pool)
            .await
            .context("Failed to load translations")?;

        let mut entries = Vec::new();
        for row in rows {
            let mut translation = Translation::try_from(row)?;
            if let Some(value) = translation.values.remove(locale) {
                entries.push(LocaleEntry {
                    group: translation.group,
                    key: translation.key,
                    value,
                });
            }
        }

        Ok(entries)
    }

    /// One page of records ordered by group then key
    pub async fn chunk(&self, offset: i64, limit: i64) -> Result<Vec<Translation>> {
        let rows = sqlx::query_as::<_, TranslationRow>(&format!(
            r#"{SELECT_COLUMNS} ORDER BY "group", "key", id LIMIT ?1 OFFSET ?2"#
        ))
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
        .context("Failed to load translation chunk")?;

        rows.into_iter().map(Translation::try_from).collect()
    }

    /// Records matching an admin filter, ordered by key
    pub async fn list(&self, filter: &TranslationFilter) -> Result<Vec<Translation>> {
        let search = filter.search.as_deref().map(|s| format!("%{}%", escape_like(s)));

        let rows = sqlx::query_as::<_, TranslationRow>(&format!(
            r#"{SELECT_COLUMNS}
               WHERE (?1 IS NULL OR "group" = ?1)
                 AND (?2 IS NULL OR "key" LIKE ?2 ESCAPE '\' OR "values" LIKE ?2 ESCAPE '\')
               ORDER BY "key", id
               LIMIT ?3 OFFSET ?4"#
        ))
        .bind(filter.group.as_deref())
        .bind(search)
        .bind(filter.limit)
        .bind(filter.offset)
        .fetch_all(&self.pool)
        .await
        .context("Failed to list translations")?;

        rows.into_iter().map(Translation::try_from).collect()
    }

    /// Distinct non-null groups
    pub async fn groups(&self) -> Result<Vec<String>> {
        let groups: Vec<(String,)> = sqlx::query_as(
            r#"SELECT DISTINCT "group" FROM translations WHERE "group" IS NOT NULL ORDER BY "group""#,
        )
        .fetch_all(&self.pool)
        .await
        .context("Failed to list groups")?;

        Ok(groups.into_iter().map(|(group,)| group).collect())
    }

    pub async fn count(&self) -> Result<i64> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM translations")
            .fetch_one(&self.pool)
            .await
            .context("Failed to count translations")?;
        Ok(count)
    }
}

/// A store transaction used by importers so a find-or-create followed by an
/// update cannot interleave with another import.
pub struct StoreTransaction {
    tx: Transaction<'static, Sqlite>,
}

impl StoreTransaction {
    /// Find or create `(key, group)` and merge `values` into it.
    ///
    /// With `overwrite`, every given locale is set. Without it, only locales
    /// absent from the stored mapping are set; an existing empty string
    /// counts as present.
    pub async fn merge_values(
        &mut self,
        key: &str,
        group: Option<&str>,
        values: &BTreeMap<String, String>,
        overwrite: bool,
    ) -> Result<MergeOutcome> {
        if key.chars().count() > MAX_KEY_LENGTH {
            bail!(
                "Translation key exceeds {} characters: {}...",
                MAX_KEY_LENGTH,
                key.chars().take(40).collect::<String>()
            );
        }
        if let Some(group) = group {
            if !is_valid_group_name(group) {
                bail!("Invalid translation group {:?} for key {:?}", group, key);
            }
        }

        let existing: Option<(i64, String)> = sqlx::query_as(
            r#"SELECT id, "values" FROM translations WHERE "key" = ?1 AND "group" IS ?2"#,
        )
        .bind(key)
        .bind(group)
        .fetch_optional(&mut *self.tx)
        .await
        .context("Failed to look up translation")?;

        let now = Utc::now().to_rfc3339();

        let Some((id, stored)) = existing else {
            sqlx::query(
                r#"INSERT INTO translations ("key", "group", "values", created_at, updated_at)
                   VALUES (?1, ?2, ?3, ?4, ?4)"#,
            )
            .bind(key)
            .bind(group)
            .bind(encode_values(values)?)
            .bind(&now)
            .execute(&mut *self.tx)
            .await
            .context("Failed to create translation")?;
            return Ok(MergeOutcome::Created);
        };

        let mut current = decode_values(&stored)
            .with_context(|| format!("Corrupt values for translation {}", id))?;
        let mut changed = false;

        for (locale, value) in values {
            if overwrite || !current.contains_key(locale) {
                if current.get(locale) != Some(value) {
                    current.insert(locale.clone(), value.clone());
                    changed = true;
                }
            }
        }

        if !changed {
            return Ok(MergeOutcome::Unchanged);
        }

        sqlx::query(r#"UPDATE translations SET "values" = ?1, updated_at = ?2 WHERE id = ?3"#)
            .bind(encode_values(&current)?)
            .bind(&now)
            .bind(id)
            .execute(&mut *self.tx)
            .await
            .context("Failed to update translation")?;

        Ok(MergeOutcome::Updated)
    }

    pub async fn commit(self) -> Result<()> {
        self.tx.commit().await.context("Failed to commit transaction")
    }
}

fn encode_values(values: &BTreeMap<String, String>) -> Result<String> {
    serde_json::to_string(values).context("Failed to encode translation values")
}

fn decode_values(raw: &str) -> Result<BTreeMap<String, String>> {
    Ok(serde_json::from_str(raw)?)
}

fn escape_like(s: &str) -> String {
    s.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_")
}
