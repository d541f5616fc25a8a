//! SQLite ledger
//!
//! Durable storage for users, markets, bets and the reconciliation queue.
//! Amounts are stored as exact decimal TEXT and timestamps as INTEGER
//! milliseconds. Each read-modify-write runs in its own transaction while
//! the connection lock is held.

use async_trait::async_trait;
use betting_core::{
    Bet, Market, MarketId, MarketStatus, NewBet, PoolSnapshot, Side, User,
};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use rust_decimal::Decimal;
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, info};
use uuid::Uuid;

use super::{CreditKind, LedgerStore, PendingCredit, StoreError};

const MARKET_COLUMNS: &str = "id, title, description, category, status, yes_pool, no_pool, \
                              end_date, created_by, created_at, outcome, resolved_at";

const BET_COLUMNS: &str = "id, market_id, user_id, side, amount, payout, created_at";

const PENDING_COLUMNS: &str =
    "id, market_id, bet_id, user_id, amount, kind, balance_credited, attempts, created_at";

/// Ledger backed by a single SQLite connection
pub struct SqliteLedger {
    conn: Mutex<Connection>,
}

impl SqliteLedger {
    /// Open (or create) the ledger database at `db_path`
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self, StoreError> {
        if let Some(parent) = db_path.as_ref().parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                StoreError::Io(format!("Failed to create database directory: {}", e))
            })?;
        }

        let conn = Connection::open(db_path.as_ref())?;
        info!("Opened ledger database at {}", db_path.as_ref().display());

        let ledger = Self {
            conn: Mutex::new(conn),
        };
        ledger.init_schema()?;
        Ok(ledger)
    }

    /// Create an in-memory ledger (useful for testing)
    pub fn new_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        let ledger = Self {
            conn: Mutex::new(conn),
        };
        ledger.init_schema()?;
        Ok(ledger)
    }

    fn init_schema(&self) -> Result<(), StoreError> {
        let conn = self.conn.lock();

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                balance TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS markets (
                id TEXT PRIMARY KEY,
                title TEXT NOT NULL,
                description TEXT,
                category TEXT,
                status TEXT NOT NULL,
                yes_pool TEXT NOT NULL,
                no_pool TEXT NOT NULL,
                total_pool TEXT NOT NULL,
                end_date INTEGER NOT NULL,
                created_by TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                outcome TEXT,
                resolved_at INTEGER
            );

            CREATE INDEX IF NOT EXISTS idx_markets_creator
            ON markets(created_by, created_at);

            CREATE TABLE IF NOT EXISTS bets (
                id TEXT PRIMARY KEY,
                market_id TEXT NOT NULL,
                user_id TEXT NOT NULL,
                side TEXT NOT NULL,
                amount TEXT NOT NULL,
                payout TEXT,
                created_at INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_bets_market
            ON bets(market_id);

            CREATE INDEX IF NOT EXISTS idx_bets_user_market
            ON bets(user_id, market_id, created_at);

            CREATE TABLE IF NOT EXISTS chat_messages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                market_id TEXT NOT NULL,
                user_id TEXT NOT NULL,
                body TEXT NOT NULL,
                created_at INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_chat_market
            ON chat_messages(market_id);

            CREATE TABLE IF NOT EXISTS pending_credits (
                id TEXT PRIMARY KEY,
                market_id TEXT NOT NULL,
                bet_id TEXT NOT NULL,
                user_id TEXT NOT NULL,
                amount TEXT NOT NULL,
                kind TEXT NOT NULL,
                balance_credited INTEGER NOT NULL DEFAULT 0,
                attempts INTEGER NOT NULL DEFAULT 0,
                created_at INTEGER NOT NULL
            );
            "#,
        )?;

        Ok(())
    }
}

// ============================================================================
// Row conversion
// ============================================================================

fn parse_decimal(
    table: &'static str,
    column: &'static str,
    raw: &str,
) -> Result<Decimal, StoreError> {
    Decimal::from_str(raw).map_err(|_| StoreError::Corrupt {
        table,
        column,
        value: raw.to_string(),
    })
}

fn parse_side(table: &'static str, column: &'static str, raw: &str) -> Result<Side, StoreError> {
    raw.parse::<Side>().map_err(|_| StoreError::Corrupt {
        table,
        column,
        value: raw.to_string(),
    })
}

fn from_millis(table: &'static str, column: &'static str, ms: i64) -> Result<DateTime<Utc>, StoreError> {
    DateTime::from_timestamp_millis(ms).ok_or_else(|| StoreError::Corrupt {
        table,
        column,
        value: ms.to_string(),
    })
}

/// Raw `markets` row as read from SQLite
struct MarketRow {
    id: String,
    title: String,
    description: Option<String>,
    category: Option<String>,
    status: String,
    yes_pool: String,
    no_pool: String,
    end_date: i64,
    created_by: String,
    created_at: i64,
    outcome: Option<String>,
    resolved_at: Option<i64>,
}

impl MarketRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            title: row.get(1)?,
            description: row.get(2)?,
            category: row.get(3)?,
            status: row.get(4)?,
            yes_pool: row.get(5)?,
            no_pool: row.get(6)?,
            end_date: row.get(7)?,
            created_by: row.get(8)?,
            created_at: row.get(9)?,
            outcome: row.get(10)?,
            resolved_at: row.get(11)?,
        })
    }

    fn into_market(self) -> Result<Market, StoreError> {
        let status = MarketStatus::from_str(&self.status).map_err(|_| StoreError::Corrupt {
            table: "markets",
            column: "status",
            value: self.status.clone(),
        })?;
        let pools = PoolSnapshot::new(
            parse_decimal("markets", "yes_pool", &self.yes_pool)?,
            parse_decimal("markets", "no_pool", &self.no_pool)?,
        );
        let outcome = self
            .outcome
            .as_deref()
            .map(|o| parse_side("markets", "outcome", o))
            .transpose()?;
        let resolved_at = self
            .resolved_at
            .map(|ms| from_millis("markets", "resolved_at", ms))
            .transpose()?;

        Ok(Market {
            id: self.id,
            title: self.title,
            description: self.description,
            category: self.category,
            status,
            pools,
            end_date: from_millis("markets", "end_date", self.end_date)?,
            created_by: self.created_by,
            created_at: from_millis("markets", "created_at", self.created_at)?,
            outcome,
            resolved_at,
        })
    }
}

/// Raw `bets` row as read from SQLite
struct BetRow {
    id: String,
    market_id: String,
    user_id: String,
    side: String,
    amount: String,
    payout: Option<String>,
    created_at: i64,
}

impl BetRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            market_id: row.get(1)?,
            user_id: row.get(2)?,
            side: row.get(3)?,
            amount: row.get(4)?,
            payout: row.get(5)?,
            created_at: row.get(6)?,
        })
    }

    fn into_bet(self) -> Result<Bet, StoreError> {
        Ok(Bet {
            side: parse_side("bets", "side", &self.side)?,
            amount: parse_decimal("bets", "amount", &self.amount)?,
            payout: self
                .payout
                .as_deref()
                .map(|p| parse_decimal("bets", "payout", p))
                .transpose()?,
            created_at: from_millis("bets", "created_at", self.created_at)?,
            id: self.id,
            market_id: self.market_id,
            user_id: self.user_id,
        })
    }
}

/// Raw `pending_credits` row as read from SQLite
struct PendingRow {
    id: String,
    market_id: String,
    bet_id: String,
    user_id: String,
    amount: String,
    kind: String,
    balance_credited: bool,
    attempts: u32,
    created_at: i64,
}

impl PendingRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            market_id: row.get(1)?,
            bet_id: row.get(2)?,
            user_id: row.get(3)?,
            amount: row.get(4)?,
            kind: row.get(5)?,
            balance_credited: row.get(6)?,
            attempts: row.get(7)?,
            created_at: row.get(8)?,
        })
    }

    fn into_credit(self) -> Result<PendingCredit, StoreError> {
        let kind = match self.kind.as_str() {
            "payout" => CreditKind::Payout,
            "refund" => CreditKind::Refund,
            "unmatched" => CreditKind::Unmatched,
            other => {
                return Err(StoreError::Corrupt {
                    table: "pending_credits",
                    column: "kind",
                    value: other.to_string(),
                })
            }
        };

        Ok(PendingCredit {
            amount: parse_decimal("pending_credits", "amount", &self.amount)?,
            created_at: from_millis("pending_credits", "created_at", self.created_at)?,
            kind,
            id: self.id,
            market_id: self.market_id,
            bet_id: self.bet_id,
            user_id: self.user_id,
            balance_credited: self.balance_credited,
            attempts: self.attempts,
        })
    }
}

fn read_balance(conn: &Connection, id: &str) -> Result<Decimal, StoreError> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT balance FROM users WHERE id = ?1",
            params![id],
            |row| row.get(0),
        )
        .optional()?;
    match raw {
        Some(raw) => parse_decimal("users", "balance", &raw),
        None => Err(StoreError::Missing {
            table: "users",
            id: id.to_string(),
        }),
    }
}

fn read_market(conn: &Connection, id: &str) -> Result<Option<Market>, StoreError> {
    let sql = format!("SELECT {} FROM markets WHERE id = ?1", MARKET_COLUMNS);
    conn.query_row(&sql, params![id], MarketRow::read)
        .optional()?
        .map(MarketRow::into_market)
        .transpose()
}

fn write_pools(conn: &Connection, id: &str, pools: &PoolSnapshot) -> Result<(), StoreError> {
    conn.execute(
        "UPDATE markets SET yes_pool = ?1, no_pool = ?2, total_pool = ?3 WHERE id = ?4",
        params![
            pools.yes_pool.to_string(),
            pools.no_pool.to_string(),
            pools.total_pool.to_string(),
            id
        ],
    )?;
    Ok(())
}

fn missing_market(id: &str) -> StoreError {
    StoreError::Missing {
        table: "markets",
        id: id.to_string(),
    }
}

// ============================================================================
// LedgerStore
// ============================================================================

#[async_trait]
impl LedgerStore for SqliteLedger {
    async fn get_user(&self, id: &str) -> Result<Option<User>, StoreError> {
        let conn = self.conn.lock();
        match read_balance(&conn, id) {
            Ok(balance) => Ok(Some(User::new(id, balance))),
            Err(StoreError::Missing { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn insert_user(&self, user: &User) -> Result<bool, StoreError> {
        let conn = self.conn.lock();
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO users (id, balance) VALUES (?1, ?2)",
            params![user.id, user.balance.to_string()],
        )?;
        Ok(inserted > 0)
    }

    async fn set_user_balance(&self, id: &str, balance: Decimal) -> Result<(), StoreError> {
        let conn = self.conn.lock();
        let updated = conn.execute(
            "UPDATE users SET balance = ?1 WHERE id = ?2",
            params![balance.to_string(), id],
        )?;
        if updated == 0 {
            return Err(StoreError::Missing {
                table: "users",
                id: id.to_string(),
            });
        }
        Ok(())
    }

    async fn try_debit_balance(
        &self,
        id: &str,
        amount: Decimal,
    ) -> Result<Option<Decimal>, StoreError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        let balance = read_balance(&tx, id)?;
        if balance < amount {
            return Ok(None);
        }
        let new_balance = balance - amount;
        tx.execute(
            "UPDATE users SET balance = ?1 WHERE id = ?2",
            params![new_balance.to_string(), id],
        )?;
        tx.commit()?;

        Ok(Some(new_balance))
    }

    async fn credit_balance(&self, id: &str, amount: Decimal) -> Result<Decimal, StoreError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        let new_balance = read_balance(&tx, id)? + amount;
        tx.execute(
            "UPDATE users SET balance = ?1 WHERE id = ?2",
            params![new_balance.to_string(), id],
        )?;
        tx.commit()?;

        Ok(new_balance)
    }

    async fn get_market(&self, id: &str) -> Result<Option<Market>, StoreError> {
        let conn = self.conn.lock();
        read_market(&conn, id)
    }

    async fn insert_market(&self, market: &Market) -> Result<(), StoreError> {
        let conn = self.conn.lock();
        conn.execute(
            r#"
            INSERT INTO markets (id, title, description, category, status, yes_pool, no_pool,
                                 total_pool, end_date, created_by, created_at, outcome, resolved_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
            "#,
            params![
                market.id,
                market.title,
                market.description,
                market.category,
                market.status.as_str(),
                market.pools.yes_pool.to_string(),
                market.pools.no_pool.to_string(),
                market.pools.total_pool.to_string(),
                market.end_date.timestamp_millis(),
                market.created_by,
                market.created_at.timestamp_millis(),
                market.outcome.map(|o| o.as_str()),
                market.resolved_at.map(|t| t.timestamp_millis()),
            ],
        )?;
        debug!("Inserted market {}", market.id);
        Ok(())
    }

    async fn set_market_pools(&self, id: &str, pools: PoolSnapshot) -> Result<(), StoreError> {
        let conn = self.conn.lock();
        if read_market(&conn, id)?.is_none() {
            return Err(missing_market(id));
        }
        write_pools(&conn, id, &PoolSnapshot::new(pools.yes_pool, pools.no_pool))
    }

    async fn increment_pool(
        &self,
        id: &str,
        side: Side,
        amount: Decimal,
    ) -> Result<Option<PoolSnapshot>, StoreError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        let market = read_market(&tx, id)?.ok_or_else(|| missing_market(id))?;
        if market.status != MarketStatus::Active {
            return Ok(None);
        }
        let pools = market.pools.adjusted(side, amount);
        write_pools(&tx, id, &pools)?;
        tx.commit()?;

        Ok(Some(pools))
    }

    async fn decrement_pool(
        &self,
        id: &str,
        side: Side,
        amount: Decimal,
    ) -> Result<PoolSnapshot, StoreError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        let market = read_market(&tx, id)?.ok_or_else(|| missing_market(id))?;
        let pools = market.pools.adjusted(side, -amount);
        write_pools(&tx, id, &pools)?;
        tx.commit()?;

        Ok(pools)
    }

    async fn set_market_resolved(
        &self,
        id: &str,
        outcome: Side,
        resolved_at: DateTime<Utc>,
    ) -> Result<Option<Market>, StoreError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        let updated = tx.execute(
            "UPDATE markets SET status = 'resolved', outcome = ?1, resolved_at = ?2 \
             WHERE id = ?3 AND status = 'active'",
            params![outcome.as_str(), resolved_at.timestamp_millis(), id],
        )?;
        if updated == 0 {
            return match read_market(&tx, id)? {
                Some(_) => Ok(None),
                None => Err(missing_market(id)),
            };
        }
        let market = read_market(&tx, id)?.ok_or_else(|| missing_market(id))?;
        tx.commit()?;

        Ok(Some(market))
    }

    async fn list_markets_by_creator(&self, user: &str) -> Result<Vec<Market>, StoreError> {
        let conn = self.conn.lock();
        let sql = format!(
            "SELECT {} FROM markets WHERE created_by = ?1 ORDER BY created_at DESC, rowid DESC",
            MARKET_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params![user], MarketRow::read)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter().map(MarketRow::into_market).collect()
    }

    async fn delete_markets(&self, ids: &[MarketId]) -> Result<usize, StoreError> {
        if ids.is_empty() {
            return Ok(0);
        }

        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        let placeholders = vec!["?"; ids.len()].join(", ");
        tx.execute(
            &format!("DELETE FROM chat_messages WHERE market_id IN ({})", placeholders),
            params_from_iter(ids.iter()),
        )?;
        tx.execute(
            &format!("DELETE FROM bets WHERE market_id IN ({})", placeholders),
            params_from_iter(ids.iter()),
        )?;
        let removed = tx.execute(
            &format!("DELETE FROM markets WHERE id IN ({})", placeholders),
            params_from_iter(ids.iter()),
        )?;
        tx.commit()?;

        Ok(removed)
    }

    async fn get_most_recent_bet(
        &self,
        user: &str,
        market: &str,
    ) -> Result<Option<Bet>, StoreError> {
        let conn = self.conn.lock();
        let sql = format!(
            "SELECT {} FROM bets WHERE user_id = ?1 AND market_id = ?2 \
             ORDER BY created_at DESC, rowid DESC LIMIT 1",
            BET_COLUMNS
        );
        conn.query_row(&sql, params![user, market], BetRow::read)
            .optional()?
            .map(BetRow::into_bet)
            .transpose()
    }

    async fn insert_bet(&self, bet: NewBet) -> Result<Option<Bet>, StoreError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        let market = read_market(&tx, &bet.market_id)?
            .ok_or_else(|| missing_market(&bet.market_id))?;
        if market.status != MarketStatus::Active {
            return Ok(None);
        }

        let bet = bet.into_bet(Uuid::new_v4().to_string());
        tx.execute(
            r#"
            INSERT INTO bets (id, market_id, user_id, side, amount, payout, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, NULL, ?6)
            "#,
            params![
                bet.id,
                bet.market_id,
                bet.user_id,
                bet.side.as_str(),
                bet.amount.to_string(),
                bet.created_at.timestamp_millis(),
            ],
        )?;
        tx.commit()?;

        Ok(Some(bet))
    }

    async fn list_bets_for_market(&self, market: &str) -> Result<Vec<Bet>, StoreError> {
        let conn = self.conn.lock();
        let sql = format!(
            "SELECT {} FROM bets WHERE market_id = ?1 ORDER BY rowid ASC",
            BET_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params![market], BetRow::read)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter().map(BetRow::into_bet).collect()
    }

    async fn set_bet_payout(&self, bet: &str, payout: Decimal) -> Result<(), StoreError> {
        let conn = self.conn.lock();
        let updated = conn.execute(
            "UPDATE bets SET payout = ?1 WHERE id = ?2",
            params![payout.to_string(), bet],
        )?;
        if updated == 0 {
            return Err(StoreError::Missing {
                table: "bets",
                id: bet.to_string(),
            });
        }
        Ok(())
    }

    async fn record_pending_credit(&self, credit: &PendingCredit) -> Result<(), StoreError> {
        let conn = self.conn.lock();
        conn.execute(
            r#"
            INSERT OR REPLACE INTO pending_credits
                (id, market_id, bet_id, user_id, amount, kind, balance_credited, attempts, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
            params![
                credit.id,
                credit.market_id,
                credit.bet_id,
                credit.user_id,
                credit.amount.to_string(),
                credit.kind.as_str(),
                credit.balance_credited,
                credit.attempts,
                credit.created_at.timestamp_millis(),
            ],
        )?;
        Ok(())
    }

    async fn list_pending_credits(&self) -> Result<Vec<PendingCredit>, StoreError> {
        let conn = self.conn.lock();
        let sql = format!(
            "SELECT {} FROM pending_credits ORDER BY created_at ASC, rowid ASC",
            PENDING_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map([], PendingRow::read)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter().map(PendingRow::into_credit).collect()
    }

    async fn remove_pending_credit(&self, id: &str) -> Result<(), StoreError> {
        let conn = self.conn.lock();
        conn.execute("DELETE FROM pending_credits WHERE id = ?1", params![id])?;
        Ok(())
    }

    async fn bump_pending_credit(
        &self,
        id: &str,
        balance_credited: bool,
    ) -> Result<(), StoreError> {
        let conn = self.conn.lock();
        let updated = conn.execute(
            "UPDATE pending_credits SET attempts = attempts + 1, \
             balance_credited = MAX(balance_credited, ?1) WHERE id = ?2",
            params![balance_credited, id],
        )?;
        if updated == 0 {
            return Err(StoreError::Missing {
                table: "pending_credits",
                id: id.to_string(),
            });
        }
        Ok(())
    }
}
