//! Idempotent schema bootstrap statements, applied in order.

/// `(name, sql)` pairs executed by `Storage::run_migrations`.
pub const STATEMENTS: &[(&str, &str)] = &[
    (
        "create_webhooks",
        r"
        CREATE TABLE IF NOT EXISTS webhooks (
            id UUID PRIMARY KEY,
            tenant_id UUID NOT NULL,
            url TEXT NOT NULL,
            events TEXT[] NOT NULL,
            secret TEXT NOT NULL,
            headers JSONB NOT NULL DEFAULT '{}'::jsonb,
            filters JSONB NOT NULL DEFAULT 'null'::jsonb,
            max_retries INTEGER NOT NULL DEFAULT 3 CHECK (max_retries >= 0),
            timeout_ms BIGINT NOT NULL DEFAULT 30000 CHECK (timeout_ms > 0),
            verify_ssl BOOLEAN NOT NULL DEFAULT TRUE,
            total_attempts BIGINT NOT NULL DEFAULT 0,
            successful_attempts BIGINT NOT NULL DEFAULT 0,
            failed_attempts BIGINT NOT NULL DEFAULT 0,
            consecutive_failures INTEGER NOT NULL DEFAULT 0,
            status TEXT NOT NULL DEFAULT 'active'
                CHECK (status IN ('active', 'disabled', 'failed')),
            last_success_at TIMESTAMPTZ,
            last_failure_at TIMESTAMPTZ,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )
        ",
    ),
    (
        "index_webhooks_tenant_status",
        r"
        CREATE INDEX IF NOT EXISTS idx_webhooks_tenant_status
        ON webhooks (tenant_id, status)
        ",
    ),
    (
        "create_webhook_attempts",
        r"
        CREATE TABLE IF NOT EXISTS webhook_attempts (
            id UUID PRIMARY KEY,
            webhook_id UUID NOT NULL REFERENCES webhooks(id) ON DELETE CASCADE,
            tenant_id UUID NOT NULL,
            event_id UUID NOT NULL,
            event TEXT NOT NULL,
            payload JSONB NOT NULL,
            occurred_at TIMESTAMPTZ NOT NULL,
            url TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'pending'
                CHECK (status IN ('pending', 'delivering', 'success', 'failed')),
            attempt_number INTEGER NOT NULL CHECK (attempt_number >= 0),
            http_status INTEGER,
            response_body TEXT,
            response_headers JSONB,
            error_message TEXT,
            duration_ms BIGINT,
            scheduled_at TIMESTAMPTZ NOT NULL,
            next_retry_at TIMESTAMPTZ,
            exhausted BOOLEAN NOT NULL DEFAULT FALSE,
            claimed_at TIMESTAMPTZ,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            completed_at TIMESTAMPTZ,
            UNIQUE (webhook_id, event_id, attempt_number)
        )
        ",
    ),
    (
        "index_webhook_attempts_due",
        r"
        CREATE INDEX IF NOT EXISTS idx_webhook_attempts_due
        ON webhook_attempts (scheduled_at)
        WHERE status = 'pending'
        ",
    ),
    (
        "index_webhook_attempts_one_in_flight",
        r"
        CREATE UNIQUE INDEX IF NOT EXISTS idx_webhook_attempts_one_in_flight
        ON webhook_attempts (webhook_id)
        WHERE status = 'delivering'
        ",
    ),
    (
        "index_webhook_attempts_webhook_recent",
        r"
        CREATE INDEX IF NOT EXISTS idx_webhook_attempts_webhook_recent
        ON webhook_attempts (webhook_id, created_at DESC)
        ",
    ),
];
