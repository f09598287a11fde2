use crate::domain::entry::PortfolioEntry;
use crate::storage::{Portfolio, PortfolioStore};
use anyhow::Context;

const UPSERT_BATCH: usize = 200;

#[derive(Debug, sqlx::FromRow)]
struct EntryRow {
    ticker: String,
    name: String,
    currency: String,
    count: i64,
    total_invested_sek: i64,
    bought_at: Option<f64>,
    sold_at: Option<f64>,
    switched_at: Option<f64>,
    lock_key: i64,
    lock_counter: i64,
    manual_override_price_sek: Option<f64>,
}

impl From<EntryRow> for PortfolioEntry {
    fn from(r: EntryRow) -> Self {
        PortfolioEntry {
            ticker: r.ticker,
            name: r.name,
            currency: r.currency,
            count: r.count,
            total_invested_sek: r.total_invested_sek,
            bought_at: r.bought_at,
            sold_at: r.sold_at,
            switched_at: r.switched_at,
            lock_key: r.lock_key,
            lock_counter: r.lock_counter,
            manual_override_price_sek: r.manual_override_price_sek,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PgPortfolioStore {
    pool: sqlx::PgPool,
}

impl PgPortfolioStore {
    pub fn new(pool: sqlx::PgPool) -> Self {
        Self { pool }
    }

    /// Connects and runs migrations. Any failure here means the process cannot operate.
    pub async fn connect(db_url: &str) -> anyhow::Result<Self> {
        let pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(5)
            .connect(db_url)
            .await
            .context("connect DATABASE_URL failed")?;

        crate::storage::migrate(&pool).await?;
        Ok(Self { pool })
    }
}

#[async_trait::async_trait]
impl PortfolioStore for PgPortfolioStore {
    async fn load_all(&self) -> anyhow::Result<Portfolio> {
        let rows = sqlx::query_as::<_, EntryRow>(
            "SELECT ticker, name, currency, count, total_invested_sek, bought_at, sold_at, \
                    switched_at, lock_key, lock_counter, manual_override_price_sek \
             FROM portfolio_entries \
             ORDER BY ticker ASC",
        )
        .persistent(false)
        .fetch_all(&self.pool)
        .await
        .context("select portfolio_entries failed")?;

        Ok(rows
            .into_iter()
            .map(|r| (r.ticker.clone(), PortfolioEntry::from(r)))
            .collect())
    }

    async fn save_all(&self, entries: &Portfolio) -> anyhow::Result<()> {
        if entries.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await.context("begin transaction failed")?;

        let items: Vec<&PortfolioEntry> = entries.values().collect();
        for chunk in items.chunks(UPSERT_BATCH) {
            let mut qb = sqlx::QueryBuilder::new(
                "INSERT INTO portfolio_entries (ticker, name, currency, count, total_invested_sek, \
                 bought_at, sold_at, switched_at, lock_key, lock_counter, manual_override_price_sek) ",
            );
            qb.push_values(chunk, |mut b, e| {
                b.push_bind(e.ticker.trim())
                    .push_bind(&e.name)
                    .push_bind(&e.currency)
                    .push_bind(e.count)
                    .push_bind(e.total_invested_sek)
                    .push_bind(e.bought_at)
                    .push_bind(e.sold_at)
                    .push_bind(e.switched_at)
                    .push_bind(e.lock_key)
                    .push_bind(e.lock_counter)
                    .push_bind(e.manual_override_price_sek);
            });
            qb.push(
                " ON CONFLICT (ticker) DO UPDATE \
                   SET name = EXCLUDED.name, currency = EXCLUDED.currency, count = EXCLUDED.count, \
                       total_invested_sek = EXCLUDED.total_invested_sek, bought_at = EXCLUDED.bought_at, \
                       sold_at = EXCLUDED.sold_at, switched_at = EXCLUDED.switched_at, \
                       lock_key = EXCLUDED.lock_key, lock_counter = EXCLUDED.lock_counter, \
                       manual_override_price_sek = EXCLUDED.manual_override_price_sek, \
                       updated_at = now()",
            );

            qb.build()
                .persistent(false)
                .execute(&mut *tx)
                .await
                .context("batch upsert portfolio_entries failed")?;

            tracing::debug!(batch_size = chunk.len(), "portfolio_entries batch upsert");
        }

        tx.commit().await.context("commit transaction failed")?;
        Ok(())
    }

    async fn delete(&self, ticker: &str) -> anyhow::Result<bool> {
        let res = sqlx::query("DELETE FROM portfolio_entries WHERE ticker = $1")
            .persistent(false)
            .bind(ticker)
            .execute(&self.pool)
            .await
            .with_context(|| format!("delete portfolio_entries failed (ticker={ticker})"))?;
        Ok(res.rows_affected() > 0)
    }
}
