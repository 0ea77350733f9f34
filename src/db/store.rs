use std::str::FromStr;

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use tracing::info;

use crate::db::models::{AnomalyRow, GameRow, SampleRow, SettingsRow};
use crate::db::{AnomalyLedger, CatalogStore, SettingsSource};
use crate::error::Result;
use crate::types::{now_ms, Anomaly, AnomalySettings, AnomalyWithGame, GameRef, Sample};

const ANOMALY_COLUMNS: &str = r#"
    a.id, a.game_id, a.timestamp_ms, a.delta, a.mean, a.stddev, a.threshold,
    a.direction, a.delivered, g.title AS game_title, g.reference_url
"#;

/// Outcome of a catalog upsert keyed on `external_id`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted(i64),
    Updated(i64),
}

/// SQLite-backed catalog, sample store, settings source and anomaly ledger.
/// Every operation is a single statement; there is one writer by convention.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (creating if missing) the database file and apply migrations.
    pub async fn open(db_path: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(&format!("sqlite:{db_path}"))?
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new().connect_with(options).await?;
        let store = Self::from_pool(pool).await?;
        info!("Database ready at {db_path}");
        Ok(store)
    }

    pub async fn from_pool(pool: SqlitePool) -> Result<Self> {
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool })
    }

    pub async fn get_game(&self, id: i64) -> Result<Option<GameRef>> {
        let row = sqlx::query_as::<_, GameRow>(
            "SELECT id, external_id, title, reference_url FROM games WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(GameRef::from))
    }

    /// Games other than `external_id` already using `reference_url`.
    pub async fn games_sharing_url(&self, reference_url: &str, external_id: &str) -> Result<Vec<GameRef>> {
        let rows = sqlx::query_as::<_, GameRow>(
            r#"
            SELECT id, external_id, title, reference_url
            FROM games
            WHERE reference_url = ? AND external_id != ?
            ORDER BY id
            "#,
        )
        .bind(reference_url)
        .bind(external_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(GameRef::from).collect())
    }

    /// Insert a game or refresh its title/URL, keyed on `external_id`.
    pub async fn upsert_game(&self, external_id: &str, title: &str, reference_url: &str) -> Result<UpsertOutcome> {
        let existing: Option<i64> = sqlx::query_scalar("SELECT id FROM games WHERE external_id = ?")
            .bind(external_id)
            .fetch_optional(&self.pool)
            .await?;

        match existing {
            Some(id) => {
                sqlx::query("UPDATE games SET title = ?, reference_url = ? WHERE id = ?")
                    .bind(title)
                    .bind(reference_url)
                    .bind(id)
                    .execute(&self.pool)
                    .await?;
                Ok(UpsertOutcome::Updated(id))
            }
            None => {
                let result = sqlx::query(
                    r#"
                    INSERT INTO games (external_id, title, reference_url, created_at_ms)
                    VALUES (?, ?, ?, ?)
                    "#,
                )
                .bind(external_id)
                .bind(title)
                .bind(reference_url)
                .bind(now_ms())
                .execute(&self.pool)
                .await?;
                Ok(UpsertOutcome::Inserted(result.last_insert_rowid()))
            }
        }
    }

    pub async fn update_settings(&self, settings: &AnomalySettings) -> Result<()> {
        settings.validate()?;
        sqlx::query(
            r#"
            INSERT INTO anomaly_settings (id, n_sigma, min_delta_threshold, custom_message_template)
            VALUES (1, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                n_sigma = excluded.n_sigma,
                min_delta_threshold = excluded.min_delta_threshold,
                custom_message_template = excluded.custom_message_template
            "#,
        )
        .bind(settings.n_sigma)
        .bind(settings.min_delta_threshold)
        .bind(settings.custom_message_template.as_deref())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Most recent anomalies first.
    pub async fn list_anomalies(&self, undelivered_only: bool, limit: i64) -> Result<Vec<AnomalyWithGame>> {
        let sql = format!(
            r#"
            SELECT {ANOMALY_COLUMNS}
            FROM anomalies a
            JOIN games g ON g.id = a.game_id
            WHERE (? = 0 OR a.delivered = 0)
            ORDER BY a.timestamp_ms DESC, a.id DESC
            LIMIT ?
            "#
        );
        let rows = sqlx::query_as::<_, AnomalyRow>(&sql)
            .bind(undelivered_only)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(AnomalyWithGame::from).collect())
    }

    pub async fn count_undelivered(&self) -> Result<i64> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM anomalies WHERE delivered = 0")
            .fetch_one(&self.pool)
            .await?;
        Ok(n)
    }

    pub async fn last_sample_at(&self) -> Result<Option<i64>> {
        let ts: Option<i64> = sqlx::query_scalar("SELECT MAX(timestamp_ms) FROM samples")
            .fetch_one(&self.pool)
            .await?;
        Ok(ts)
    }

    pub async fn prune_samples_before(&self, cutoff_ms: i64) -> Result<u64> {
        let result = sqlx::query("DELETE FROM samples WHERE timestamp_ms < ?")
            .bind(cutoff_ms)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    /// Undelivered anomalies are kept regardless of age.
    pub async fn prune_delivered_anomalies_before(&self, cutoff_ms: i64) -> Result<u64> {
        let result = sqlx::query("DELETE FROM anomalies WHERE delivered = 1 AND timestamp_ms < ?")
            .bind(cutoff_ms)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl CatalogStore for SqliteStore {
    async fn list_games(&self) -> Result<Vec<GameRef>> {
        let rows = sqlx::query_as::<_, GameRow>(
            "SELECT id, external_id, title, reference_url FROM games ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(GameRef::from).collect())
    }

    async fn append_sample(&self, game_id: i64, timestamp_ms: i64, ccu: i64) -> Result<()> {
        sqlx::query("INSERT INTO samples (game_id, timestamp_ms, ccu) VALUES (?, ?, ?)")
            .bind(game_id)
            .bind(timestamp_ms)
            .bind(ccu)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn recent_samples(&self, game_id: i64, since_ms: i64) -> Result<Vec<Sample>> {
        let rows = sqlx::query_as::<_, SampleRow>(
            r#"
            SELECT game_id, timestamp_ms, ccu
            FROM samples
            WHERE game_id = ? AND timestamp_ms >= ?
            ORDER BY timestamp_ms ASC, id ASC
            "#,
        )
        .bind(game_id)
        .bind(since_ms)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Sample::from).collect())
    }
}

#[async_trait]
impl SettingsSource for SqliteStore {
    async fn anomaly_settings(&self) -> Result<AnomalySettings> {
        let row = sqlx::query_as::<_, SettingsRow>(
            r#"
            SELECT n_sigma, min_delta_threshold, custom_message_template
            FROM anomaly_settings
            WHERE id = 1
            "#,
        )
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(AnomalySettings::from).unwrap_or_default())
    }
}

#[async_trait]
impl AnomalyLedger for SqliteStore {
    async fn record_anomaly(&self, anomaly: &Anomaly) -> Result<i64> {
        let direction = anomaly.direction.to_string();
        let result = sqlx::query(
            r#"
            INSERT INTO anomalies (
                game_id, timestamp_ms, delta, mean, stddev, threshold, direction, delivered
            ) VALUES (?, ?, ?, ?, ?, ?, ?, 0)
            "#,
        )
        .bind(anomaly.game_id)
        .bind(anomaly.timestamp_ms)
        .bind(anomaly.delta)
        .bind(anomaly.mean)
        .bind(anomaly.stddev)
        .bind(anomaly.threshold)
        .bind(direction)
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }

    async fn list_undelivered_anomalies(&self) -> Result<Vec<AnomalyWithGame>> {
        let sql = format!(
            r#"
            SELECT {ANOMALY_COLUMNS}
            FROM anomalies a
            JOIN games g ON g.id = a.game_id
            WHERE a.delivered = 0
            ORDER BY a.timestamp_ms ASC, a.id ASC
            "#
        );
        let rows = sqlx::query_as::<_, AnomalyRow>(&sql)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(AnomalyWithGame::from).collect())
    }

    async fn mark_anomaly_delivered(&self, id: i64) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE anomalies SET delivered = 1, delivered_at_ms = ? WHERE id = ? AND delivered = 0",
        )
        .bind(now_ms())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }
}

#[cfg(test)]
impl SqliteStore {
    /// Fresh migrated in-memory database. One connection, so every query
    /// sees the same database.
    pub async fn in_memory() -> Self {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .expect("in-memory sqlite");
        Self::from_pool(pool).await.expect("migrations")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Direction;

    fn anomaly(game_id: i64, timestamp_ms: i64, delta: f64) -> Anomaly {
        Anomaly {
            id: None,
            game_id,
            timestamp_ms,
            delta,
            mean: 100.0,
            stddev: 10.0,
            threshold: 30.0,
            direction: Direction::from_delta(delta),
            delivered: false,
        }
    }

    #[tokio::test]
    async fn upsert_is_keyed_on_external_id() {
        let store = SqliteStore::in_memory().await;
        let first = store.upsert_game("g-1", "Alpha", "https://a.example/1").await.unwrap();
        let UpsertOutcome::Inserted(id) = first else {
            panic!("expected insert, got {first:?}");
        };

        let second = store.upsert_game("g-1", "Alpha Renamed", "https://a.example/2").await.unwrap();
        assert_eq!(second, UpsertOutcome::Updated(id));

        let games = store.list_games().await.unwrap();
        assert_eq!(games.len(), 1);
        assert_eq!(games[0].title, "Alpha Renamed");
        assert_eq!(games[0].reference_url, "https://a.example/2");
    }

    #[tokio::test]
    async fn shared_url_is_reported_not_merged() {
        let store = SqliteStore::in_memory().await;
        store.upsert_game("g-1", "Alpha", "https://same.example").await.unwrap();
        store.upsert_game("g-2", "Beta", "https://same.example").await.unwrap();

        assert_eq!(store.list_games().await.unwrap().len(), 2);
        let sharing = store.games_sharing_url("https://same.example", "g-2").await.unwrap();
        assert_eq!(sharing.len(), 1);
        assert_eq!(sharing[0].external_id, "g-1");
    }

    #[tokio::test]
    async fn recent_samples_respect_window_and_order() {
        let store = SqliteStore::in_memory().await;
        let UpsertOutcome::Inserted(id) = store.upsert_game("g-1", "Alpha", "u").await.unwrap() else {
            panic!("expected insert");
        };
        store.append_sample(id, 3_000, 30).await.unwrap();
        store.append_sample(id, 1_000, 10).await.unwrap();
        store.append_sample(id, 2_000, 20).await.unwrap();

        let samples = store.recent_samples(id, 2_000).await.unwrap();
        let ccus: Vec<i64> = samples.iter().map(|s| s.ccu).collect();
        assert_eq!(ccus, vec![20, 30]);
    }

    #[tokio::test]
    async fn settings_roundtrip_and_validation() {
        let store = SqliteStore::in_memory().await;
        assert_eq!(store.anomaly_settings().await.unwrap(), AnomalySettings::default());

        let custom = AnomalySettings {
            n_sigma: 2.5,
            min_delta_threshold: 40,
            custom_message_template: Some("{title} {arrow} {delta}".to_string()),
        };
        store.update_settings(&custom).await.unwrap();
        assert_eq!(store.anomaly_settings().await.unwrap(), custom);

        let invalid = AnomalySettings { n_sigma: -1.0, ..custom };
        assert!(store.update_settings(&invalid).await.is_err());
        assert_eq!(store.anomaly_settings().await.unwrap().n_sigma, 2.5);
    }

    #[tokio::test]
    async fn delivered_latch_flips_once() {
        let store = SqliteStore::in_memory().await;
        let UpsertOutcome::Inserted(game) = store.upsert_game("g-1", "Alpha", "u").await.unwrap() else {
            panic!("expected insert");
        };
        let late = store.record_anomaly(&anomaly(game, 2_000, 35.0)).await.unwrap();
        let early = store.record_anomaly(&anomaly(game, 1_000, -35.0)).await.unwrap();

        let pending = store.list_undelivered_anomalies().await.unwrap();
        let ids: Vec<Option<i64>> = pending.iter().map(|a| a.anomaly.id).collect();
        assert_eq!(ids, vec![Some(early), Some(late)]);
        assert_eq!(pending[0].game_title, "Alpha");
        assert_eq!(pending[0].anomaly.direction, Direction::Down);

        assert!(store.mark_anomaly_delivered(early).await.unwrap());
        assert!(!store.mark_anomaly_delivered(early).await.unwrap());
        assert_eq!(store.count_undelivered().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn pruning_keeps_undelivered_anomalies() {
        let store = SqliteStore::in_memory().await;
        let UpsertOutcome::Inserted(game) = store.upsert_game("g-1", "Alpha", "u").await.unwrap() else {
            panic!("expected insert");
        };
        store.append_sample(game, 1_000, 10).await.unwrap();
        store.append_sample(game, 9_000, 90).await.unwrap();
        let delivered = store.record_anomaly(&anomaly(game, 1_000, 50.0)).await.unwrap();
        store.record_anomaly(&anomaly(game, 1_500, 50.0)).await.unwrap();
        store.mark_anomaly_delivered(delivered).await.unwrap();

        assert_eq!(store.prune_samples_before(5_000).await.unwrap(), 1);
        assert_eq!(store.prune_delivered_anomalies_before(5_000).await.unwrap(), 1);
        assert_eq!(store.count_undelivered().await.unwrap(), 1);
        assert_eq!(store.last_sample_at().await.unwrap(), Some(9_000));
    }
}
