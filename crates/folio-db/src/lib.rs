use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgConnection, PgPool, Row};
use std::collections::HashMap;
use uuid::Uuid;

use folio_schemas::TradeSide;

pub const ENV_DB_URL: &str = "FOLIO_DATABASE_URL";

/// Connect to Postgres using FOLIO_DATABASE_URL.
pub async fn connect_from_env() -> Result<PgPool> {
    let url =
        std::env::var(ENV_DB_URL).with_context(|| format!("missing env var {ENV_DB_URL}"))?;

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&url)
        .await
        .context("failed to connect to Postgres")?;

    Ok(pool)
}

/// Run embedded SQLx migrations.
pub async fn migrate(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .context("db migrate failed")?;
    Ok(())
}

/// Simple status query (connectivity + schema presence).
pub async fn status(pool: &PgPool) -> Result<DbStatus> {
    let (one,): (i32,) = sqlx::query_as::<_, (i32,)>("select 1")
        .fetch_one(pool)
        .await
        .context("status connectivity query failed")?;
    let ok = one == 1;

    let (exists,): (bool,) = sqlx::query_as::<_, (bool,)>(
        r#"
        select exists (
            select 1
            from information_schema.tables
            where table_schema='public' and table_name='positions'
        )
        "#,
    )
    .fetch_one(pool)
    .await
    .context("status table-exists query failed")?;

    Ok(DbStatus {
        ok,
        has_positions_table: exists,
    })
}

#[derive(Debug, Clone)]
pub struct DbStatus {
    pub ok: bool,
    pub has_positions_table: bool,
}

/// Insert or refresh an instrument row, keyed by its unique symbol.
/// Used by operator seeding and tests; returns the internal id.
pub async fn upsert_instrument(pool: &PgPool, symbol: &str, name: &str) -> Result<i32> {
    let (id,): (i32,) = sqlx::query_as::<_, (i32,)>(
        r#"
        insert into instruments (symbol, name)
        values ($1, $2)
        on conflict (symbol)
        do update set name = excluded.name, updated_at = now()
        returning id
        "#,
    )
    .bind(symbol)
    .bind(name)
    .fetch_one(pool)
    .await
    .context("upsert_instrument failed")?;

    Ok(id)
}

/// Resolve external symbols to internal instrument ids in one lookup.
///
/// Returns only the symbols that exist; callers decide whether a missing
/// entry fails the batch.
pub async fn resolve_instruments(
    pool: &PgPool,
    symbols: &[String],
) -> Result<HashMap<String, i32>> {
    let rows = sqlx::query(
        r#"
        select id, symbol
        from instruments
        where symbol = any($1)
        "#,
    )
    .bind(symbols)
    .fetch_all(pool)
    .await
    .context("resolve_instruments query failed")?;

    let mut map = HashMap::with_capacity(rows.len());
    for row in rows {
        let id: i32 = row.try_get("id")?;
        let symbol: String = row.try_get("symbol")?;
        map.insert(symbol, id);
    }

    Ok(map)
}

#[derive(Debug, Clone)]
pub struct NewTrade {
    pub user_id: Uuid,
    pub instrument_id: i32,
    pub side: TradeSide,
    pub quantity: Decimal,
    pub price: Decimal,
    pub trade_date: NaiveDate,
}

/// Insert one immutable trade row. Takes a connection so the worker can run
/// it inside the per-message transaction; returns the new trade id.
pub async fn insert_trade(conn: &mut PgConnection, trade: &NewTrade) -> Result<i64> {
    let (id,): (i64,) = sqlx::query_as::<_, (i64,)>(
        r#"
        insert into trades (
          user_id, instrument_id, side, quantity, price, trade_date
        ) values (
          $1, $2, $3::trade_side, $4, $5, $6
        )
        returning id
        "#,
    )
    .bind(trade.user_id)
    .bind(trade.instrument_id)
    .bind(trade.side.as_str())
    .bind(trade.quantity)
    .bind(trade.price)
    .bind(trade.trade_date)
    .fetch_one(conn)
    .await
    .context("insert_trade failed")?;

    Ok(id)
}

#[derive(Debug, Clone)]
pub struct PositionRow {
    pub user_id: Uuid,
    pub instrument_id: i32,
    pub quantity: Decimal,
    pub average_cost: Decimal,
    pub updated_at: DateTime<Utc>,
}

/// Fetch the position row for (user, instrument), locking it for the rest of
/// the transaction. With prefetch=1 there is a single writer anyway; the row
/// lock is what keeps the read-modify-write correct if a second consumer is
/// ever attached.
pub async fn fetch_position(
    conn: &mut PgConnection,
    user_id: Uuid,
    instrument_id: i32,
) -> Result<Option<PositionRow>> {
    let row = sqlx::query(
        r#"
        select user_id, instrument_id, quantity, average_cost, updated_at
        from positions
        where user_id = $1 and instrument_id = $2
        for update
        "#,
    )
    .bind(user_id)
    .bind(instrument_id)
    .fetch_optional(conn)
    .await
    .context("fetch_position failed")?;

    let Some(row) = row else {
        return Ok(None);
    };

    Ok(Some(PositionRow {
        user_id: row.try_get("user_id")?,
        instrument_id: row.try_get("instrument_id")?,
        quantity: row.try_get("quantity")?,
        average_cost: row.try_get("average_cost")?,
        updated_at: row.try_get("updated_at")?,
    }))
}

/// Write the reconciled position for (user, instrument): insert on the first
/// buy, update in place afterwards. The unique (user_id, instrument_id)
/// constraint guarantees at most one row per pair.
pub async fn upsert_position(
    conn: &mut PgConnection,
    user_id: Uuid,
    instrument_id: i32,
    quantity: Decimal,
    average_cost: Decimal,
) -> Result<()> {
    if quantity < Decimal::ZERO {
        return Err(anyhow!(
            "refusing to write negative position quantity {quantity} for user {user_id}"
        ));
    }

    sqlx::query(
        r#"
        insert into positions (user_id, instrument_id, quantity, average_cost)
        values ($1, $2, $3, $4)
        on conflict (user_id, instrument_id)
        do update set
          quantity = excluded.quantity,
          average_cost = excluded.average_cost,
          updated_at = now()
        "#,
    )
    .bind(user_id)
    .bind(instrument_id)
    .bind(quantity)
    .bind(average_cost)
    .execute(conn)
    .await
    .context("upsert_position failed")?;

    Ok(())
}

/// Trade count for one user. Test/ops helper for atomicity checks.
pub async fn count_trades_for_user(pool: &PgPool, user_id: Uuid) -> Result<i64> {
    let (n,): (i64,) =
        sqlx::query_as::<_, (i64,)>("select count(*)::bigint from trades where user_id = $1")
            .bind(user_id)
            .fetch_one(pool)
            .await
            .context("count_trades_for_user failed")?;

    Ok(n)
}
