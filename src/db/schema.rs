use anyhow::Result;
use sqlx::PgPool;

/// Account records. `version` is the optimistic-concurrency counter.
pub const CREATE_ACCOUNTS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS accounts_tb (
    account_id     TEXT PRIMARY KEY,
    iban           TEXT NOT NULL UNIQUE,
    currency       TEXT NOT NULL,
    balance        NUMERIC(38, 8) NOT NULL CHECK (balance >= 0),
    owner_user_id  TEXT NOT NULL,
    version        BIGINT NOT NULL DEFAULT 0,
    created_at     TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    updated_at     TIMESTAMPTZ NOT NULL DEFAULT NOW()
)
"#;

/// One row per applied leg. Credit and refund share slot 2, so at most one of
/// them can ever exist for a transfer.
pub const CREATE_POSTINGS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS ledger_postings_tb (
    idempotency_key  TEXT NOT NULL,
    slot             SMALLINT NOT NULL,
    leg              SMALLINT NOT NULL,
    account_id       TEXT NOT NULL REFERENCES accounts_tb (account_id),
    amount           NUMERIC(38, 8) NOT NULL,
    posted_at        TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    PRIMARY KEY (idempotency_key, slot)
)
"#;

/// Idempotency journal: in-flight claims and terminal outcomes.
pub const CREATE_JOURNAL_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS transfer_journal_tb (
    idempotency_key  TEXT PRIMARY KEY,
    from_iban        TEXT NOT NULL,
    to_iban          TEXT NOT NULL,
    amount           NUMERIC(38, 8) NOT NULL,
    state            SMALLINT NOT NULL,
    reason           TEXT,
    owner_token      TEXT,
    lease_until      TIMESTAMPTZ,
    attempts         INT NOT NULL DEFAULT 1,
    created_at       TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    updated_at       TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    applied_at       TIMESTAMPTZ
)
"#;

pub const CREATE_JOURNAL_STATE_INDEX: &str = r#"
CREATE INDEX IF NOT EXISTS transfer_journal_state_idx
    ON transfer_journal_tb (state, lease_until)
"#;

/// Durable transfer queue. A row is invisible while `visible_at` is in the
/// future; a consumer crash therefore turns into redelivery.
pub const CREATE_QUEUE_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS transfer_queue_tb (
    message_id   BIGSERIAL PRIMARY KEY,
    payload      TEXT NOT NULL,
    attempts     INT NOT NULL DEFAULT 0,
    visible_at   TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    lease_token  TEXT,
    dead         BOOLEAN NOT NULL DEFAULT FALSE,
    last_error   TEXT,
    created_at   TIMESTAMPTZ NOT NULL DEFAULT NOW()
)
"#;

pub const CREATE_QUEUE_INDEX: &str = r#"
CREATE INDEX IF NOT EXISTS transfer_queue_visible_idx
    ON transfer_queue_tb (visible_at) WHERE NOT dead
"#;

/// Create all tables used by the ledger, the journal and the queue
pub async fn init_schema(pool: &PgPool) -> Result<()> {
    tracing::info!("Initializing PostgreSQL schema...");

    let statements = [
        ("accounts_tb", CREATE_ACCOUNTS_TABLE),
        ("ledger_postings_tb", CREATE_POSTINGS_TABLE),
        ("transfer_journal_tb", CREATE_JOURNAL_TABLE),
        ("transfer_journal_state_idx", CREATE_JOURNAL_STATE_INDEX),
        ("transfer_queue_tb", CREATE_QUEUE_TABLE),
        ("transfer_queue_visible_idx", CREATE_QUEUE_INDEX),
    ];

    for (name, sql) in statements {
        sqlx::query(sql)
            .execute(pool)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to create {}: {}", name, e))?;
    }

    tracing::info!("PostgreSQL schema ready");
    Ok(())
}
