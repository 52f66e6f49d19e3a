//! Table definitions. Idempotent; safe to run on every start.

use sqlx::PgPool;
use tracing::info;

use super::map_sqlx_error;
use crate::error::StoreError;

pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS inventory_ledger (
    id              UUID PRIMARY KEY,
    seq             BIGSERIAL NOT NULL,
    tenant_id       UUID NOT NULL,
    branch_id       UUID NOT NULL,
    stock_item_id   UUID NOT NULL,
    delta           NUMERIC(18, 4) NOT NULL CHECK (delta <> 0),
    reason          TEXT NOT NULL,
    ref_sale_id     UUID NULL,
    note            TEXT NULL,
    actor_id        UUID NULL,
    occurred_at     TIMESTAMPTZ NOT NULL,
    created_at      TIMESTAMPTZ NOT NULL DEFAULT NOW()
);

CREATE INDEX IF NOT EXISTS inventory_ledger_subject_idx
    ON inventory_ledger (tenant_id, branch_id, stock_item_id, occurred_at, seq);

CREATE TABLE IF NOT EXISTS cash_sessions (
    id                  UUID PRIMARY KEY,
    tenant_id           UUID NOT NULL,
    branch_id           UUID NOT NULL,
    register_id         UUID NULL,
    status              TEXT NOT NULL,
    opened_by           UUID NOT NULL,
    responsible_actor   UUID NOT NULL,
    opened_at           TIMESTAMPTZ NOT NULL,
    opening_float_usd   NUMERIC(18, 2) NOT NULL,
    opening_float_khr   NUMERIC(18, 0) NOT NULL,
    closed_by           UUID NULL,
    closed_at           TIMESTAMPTZ NULL,
    expected_usd        NUMERIC(18, 2) NULL,
    expected_khr        NUMERIC(18, 0) NULL,
    counted_usd         NUMERIC(18, 2) NULL,
    counted_khr         NUMERIC(18, 0) NULL,
    variance_usd        NUMERIC(18, 2) NULL,
    variance_khr        NUMERIC(18, 0) NULL,
    review_requested_by UUID NULL,
    approved_by         UUID NULL,
    approved_at         TIMESTAMPTZ NULL,
    version             BIGINT NOT NULL
);

CREATE UNIQUE INDEX IF NOT EXISTS cash_sessions_open_register_uq
    ON cash_sessions (tenant_id, register_id)
    WHERE status = 'OPEN' AND register_id IS NOT NULL;

CREATE UNIQUE INDEX IF NOT EXISTS cash_sessions_open_branch_uq
    ON cash_sessions (tenant_id, branch_id)
    WHERE status = 'OPEN' AND register_id IS NULL;

CREATE INDEX IF NOT EXISTS cash_sessions_branch_idx
    ON cash_sessions (tenant_id, branch_id, opened_at DESC);

CREATE TABLE IF NOT EXISTS cash_movements (
    id              UUID PRIMARY KEY,
    seq             BIGSERIAL NOT NULL,
    tenant_id       UUID NOT NULL,
    branch_id       UUID NOT NULL,
    register_id     UUID NULL,
    session_id      UUID NOT NULL REFERENCES cash_sessions (id),
    actor_id        UUID NOT NULL,
    type            TEXT NOT NULL,
    status          TEXT NOT NULL,
    amount_usd      NUMERIC(18, 2) NOT NULL,
    amount_khr      NUMERIC(18, 0) NOT NULL,
    ref_sale_id     UUID NULL,
    reason          TEXT NULL,
    approved_by     UUID NULL,
    occurred_at     TIMESTAMPTZ NOT NULL,
    created_at      TIMESTAMPTZ NOT NULL DEFAULT NOW()
);

CREATE INDEX IF NOT EXISTS cash_movements_session_idx
    ON cash_movements (tenant_id, session_id, occurred_at, seq);

CREATE TABLE IF NOT EXISTS outbox (
    id          UUID PRIMARY KEY,
    tenant_id   UUID NOT NULL,
    type        TEXT NOT NULL,
    payload     JSONB NOT NULL,
    created_at  TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    sent_at     TIMESTAMPTZ NULL
);

CREATE INDEX IF NOT EXISTS outbox_unsent_idx
    ON outbox (created_at)
    WHERE sent_at IS NULL;

CREATE TABLE IF NOT EXISTS audit_log (
    id          UUID PRIMARY KEY,
    tenant_id   UUID NOT NULL,
    branch_id   UUID NOT NULL,
    actor_id    UUID NULL,
    action      TEXT NOT NULL,
    details     JSONB NOT NULL,
    created_at  TIMESTAMPTZ NOT NULL
);

CREATE TABLE IF NOT EXISTS stock_items (
    tenant_id   UUID NOT NULL,
    id          UUID NOT NULL,
    PRIMARY KEY (tenant_id, id)
);

CREATE TABLE IF NOT EXISTS branch_stock_items (
    tenant_id       UUID NOT NULL,
    branch_id       UUID NOT NULL,
    stock_item_id   UUID NOT NULL,
    min_threshold   NUMERIC(18, 4) NULL,
    PRIMARY KEY (tenant_id, branch_id, stock_item_id),
    FOREIGN KEY (tenant_id, stock_item_id) REFERENCES stock_items (tenant_id, id)
);

CREATE TABLE IF NOT EXISTS cash_session_policies (
    tenant_id                       UUID PRIMARY KEY,
    require_session_for_sales       BOOLEAN NOT NULL DEFAULT TRUE,
    allow_paid_out                  BOOLEAN NOT NULL DEFAULT TRUE,
    require_refund_approval         BOOLEAN NOT NULL DEFAULT TRUE,
    allow_manual_adjustment         BOOLEAN NOT NULL DEFAULT FALSE,
    paid_out_limit_usd              NUMERIC(18, 2) NULL,
    paid_out_limit_khr              NUMERIC(18, 0) NULL,
    variance_review_threshold_usd   NUMERIC(18, 2) NOT NULL DEFAULT 0,
    variance_review_threshold_khr   NUMERIC(18, 0) NOT NULL DEFAULT 0
);
"#;

/// Create any missing tables and indexes.
pub async fn ensure_schema(pool: &PgPool) -> Result<(), StoreError> {
    sqlx::raw_sql(SCHEMA)
        .execute(pool)
        .await
        .map_err(|e| map_sqlx_error("ensure_schema", e))?;
    info!("database schema ensured");
    Ok(())
}
