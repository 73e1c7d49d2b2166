use sqlx::{
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous},
    ConnectOptions, SqlitePool,
};
use std::{path::Path, str::FromStr, time::Duration};

pub async fn init_pool(database_url: &str) -> Result<SqlitePool, sqlx::Error> {
    // Extract path from sqlite: URL
    let db_path = database_url.strip_prefix("sqlite:").unwrap_or(database_url);

    // Create parent directory if needed
    if let Some(parent) = Path::new(db_path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).ok();
        }
    }

    // Add ?mode=rwc to create the file if it doesn't exist
    let connect_url = if database_url.contains('?') {
        database_url.to_string()
    } else {
        format!("{}?mode=rwc", database_url)
    };

    // WAL for read/write concurrency, busy_timeout to wait on the single writer
    let connect_options = SqliteConnectOptions::from_str(&connect_url)?
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .busy_timeout(Duration::from_secs(30))
        .log_slow_statements(log::LevelFilter::Warn, Duration::from_secs(5));

    // SQLite prefers small pools; larger ones just contend on the writer lock
    let pool = SqlitePoolOptions::new()
        .max_connections(2)
        .min_connections(1)
        .acquire_timeout(Duration::from_secs(30))
        .connect_with(connect_options)
        .await?;

    sqlx::query("PRAGMA foreign_keys = ON")
        .execute(&pool)
        .await?;

    tracing::info!(
        "SQLite pool initialized: max_connections=2, busy_timeout=30s, journal_mode=WAL"
    );

    Ok(pool)
}

pub async fn run_migrations(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    // =====================
    // Migration 001: Users
    // =====================

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS users (
            id TEXT PRIMARY KEY,
            email TEXT UNIQUE NOT NULL,
            display_name TEXT NOT NULL,
            password_hash TEXT NOT NULL,
            created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ','now'))
        )",
    )
    .execute(pool)
    .await?;

    // =====================
    // Migration 002: Households, memberships & contacts
    // =====================

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS households (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            currency_code TEXT NOT NULL DEFAULT 'COP',
            created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ','now'))
        )",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS household_members (
            household_id TEXT NOT NULL REFERENCES households(id) ON DELETE CASCADE,
            user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            role TEXT NOT NULL DEFAULT 'member' CHECK(role IN ('owner', 'member')),
            joined_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ','now')),
            PRIMARY KEY (household_id, user_id)
        )",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS contacts (
            id TEXT PRIMARY KEY,
            household_id TEXT NOT NULL REFERENCES households(id) ON DELETE CASCADE,
            display_name TEXT NOT NULL,
            email TEXT,
            phone TEXT,
            linked_user_id TEXT REFERENCES users(id) ON DELETE SET NULL,
            is_active INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ','now'))
        )",
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_members_user ON household_members(user_id)")
        .execute(pool)
        .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_contacts_household ON contacts(household_id)")
        .execute(pool)
        .await?;

    // Cross-household debt visibility resolves through this index
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_contacts_linked_user ON contacts(linked_user_id)")
        .execute(pool)
        .await?;

    // =====================
    // Migration 003: Accounts & payment methods
    // =====================

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS accounts (
            id TEXT PRIMARY KEY,
            household_id TEXT NOT NULL REFERENCES households(id) ON DELETE CASCADE,
            owner_user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            name TEXT NOT NULL,
            account_type TEXT NOT NULL DEFAULT 'other'
                CHECK(account_type IN ('savings', 'checking', 'cash', 'investment', 'other')),
            institution TEXT,
            last4 TEXT,
            initial_balance REAL NOT NULL DEFAULT 0,
            current_balance REAL NOT NULL DEFAULT 0,
            notes TEXT,
            is_active INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ','now')),
            UNIQUE(household_id, name)
        )",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS payment_methods (
            id TEXT PRIMARY KEY,
            household_id TEXT NOT NULL REFERENCES households(id) ON DELETE CASCADE,
            owner_user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            name TEXT NOT NULL,
            method_type TEXT NOT NULL DEFAULT 'other'
                CHECK(method_type IN ('debit_card', 'credit_card', 'cash', 'bank_transfer', 'other')),
            institution TEXT,
            last4 TEXT,
            is_shared_with_household INTEGER NOT NULL DEFAULT 0,
            is_active INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ','now')),
            UNIQUE(household_id, name)
        )",
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_accounts_household ON accounts(household_id)")
        .execute(pool)
        .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_payment_methods_household ON payment_methods(household_id)",
    )
    .execute(pool)
    .await?;

    // =====================
    // Migration 004: Category groups & categories
    // =====================

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS category_groups (
            id TEXT PRIMARY KEY,
            household_id TEXT NOT NULL REFERENCES households(id) ON DELETE CASCADE,
            name TEXT NOT NULL,
            icon TEXT,
            display_order INTEGER NOT NULL DEFAULT 0
        )",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS categories (
            id TEXT PRIMARY KEY,
            household_id TEXT NOT NULL REFERENCES households(id) ON DELETE CASCADE,
            category_group_id TEXT NOT NULL REFERENCES category_groups(id) ON DELETE CASCADE,
            name TEXT NOT NULL,
            icon TEXT,
            color TEXT,
            is_active INTEGER NOT NULL DEFAULT 1
        )",
    )
    .execute(pool)
    .await?;

    // Names unique per household among active categories
    sqlx::query(
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_categories_household_name
         ON categories(household_id, name) WHERE is_active = 1",
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_categories_group ON categories(category_group_id)")
        .execute(pool)
        .await?;

    // =====================
    // Migration 005: Movements & participants
    // =====================

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS movements (
            id TEXT PRIMARY KEY,
            household_id TEXT NOT NULL REFERENCES households(id) ON DELETE CASCADE,
            movement_type TEXT NOT NULL
                CHECK(movement_type IN ('HOUSEHOLD', 'SPLIT', 'DEBT_PAYMENT')),
            description TEXT NOT NULL DEFAULT '',
            amount REAL NOT NULL,
            currency_code TEXT NOT NULL,
            category_id TEXT REFERENCES categories(id) ON DELETE SET NULL,
            category_name TEXT,
            movement_date TEXT NOT NULL,
            payer_user_id TEXT REFERENCES users(id) ON DELETE SET NULL,
            payer_contact_id TEXT REFERENCES contacts(id) ON DELETE SET NULL,
            counterparty_user_id TEXT REFERENCES users(id) ON DELETE SET NULL,
            counterparty_contact_id TEXT REFERENCES contacts(id) ON DELETE SET NULL,
            payment_method_id TEXT REFERENCES payment_methods(id) ON DELETE SET NULL,
            receiver_account_id TEXT REFERENCES accounts(id) ON DELETE SET NULL,
            generated_from_template_id TEXT,
            created_by_user_id TEXT NOT NULL,
            created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ','now')),
            updated_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ','now'))
        )",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS movement_participants (
            id TEXT PRIMARY KEY,
            movement_id TEXT NOT NULL REFERENCES movements(id) ON DELETE CASCADE,
            participant_user_id TEXT REFERENCES users(id) ON DELETE SET NULL,
            participant_contact_id TEXT REFERENCES contacts(id) ON DELETE SET NULL,
            percentage REAL NOT NULL
        )",
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_movements_household ON movements(household_id)")
        .execute(pool)
        .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_movements_date ON movements(movement_date)")
        .execute(pool)
        .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_movements_template ON movements(generated_from_template_id)",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_participants_movement ON movement_participants(movement_id)",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_participants_contact
         ON movement_participants(participant_contact_id)",
    )
    .execute(pool)
    .await?;

    // =====================
    // Migration 006: Recurring templates
    // =====================

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS recurring_templates (
            id TEXT PRIMARY KEY,
            household_id TEXT NOT NULL REFERENCES households(id) ON DELETE CASCADE,
            name TEXT NOT NULL,
            description TEXT,
            category_id TEXT NOT NULL REFERENCES categories(id) ON DELETE CASCADE,
            movement_type TEXT NOT NULL
                CHECK(movement_type IN ('HOUSEHOLD', 'SPLIT', 'DEBT_PAYMENT')),
            amount REAL NOT NULL,
            currency_code TEXT NOT NULL,
            payer_user_id TEXT REFERENCES users(id) ON DELETE SET NULL,
            payer_contact_id TEXT REFERENCES contacts(id) ON DELETE SET NULL,
            counterparty_user_id TEXT REFERENCES users(id) ON DELETE SET NULL,
            counterparty_contact_id TEXT REFERENCES contacts(id) ON DELETE SET NULL,
            payment_method_id TEXT REFERENCES payment_methods(id) ON DELETE SET NULL,
            receiver_account_id TEXT REFERENCES accounts(id) ON DELETE SET NULL,
            auto_generate INTEGER NOT NULL DEFAULT 0,
            recurrence_pattern TEXT NOT NULL
                CHECK(recurrence_pattern IN ('MONTHLY', 'YEARLY', 'ONE_TIME')),
            day_of_month INTEGER,
            month_of_year INTEGER,
            start_date TEXT NOT NULL,
            end_date TEXT,
            last_generated_date TEXT,
            next_scheduled_date TEXT NOT NULL,
            is_active INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ','now'))
        )",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS recurring_template_participants (
            id TEXT PRIMARY KEY,
            template_id TEXT NOT NULL REFERENCES recurring_templates(id) ON DELETE CASCADE,
            participant_user_id TEXT REFERENCES users(id) ON DELETE SET NULL,
            participant_contact_id TEXT REFERENCES contacts(id) ON DELETE SET NULL,
            percentage REAL NOT NULL
        )",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_templates_household ON recurring_templates(household_id)",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_templates_due
         ON recurring_templates(is_active, auto_generate, next_scheduled_date)",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_template_participants_template
         ON recurring_template_participants(template_id)",
    )
    .execute(pool)
    .await?;

    // =====================
    // Migration 007: Budgets & incomes
    // =====================

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS budgets (
            id TEXT PRIMARY KEY,
            household_id TEXT NOT NULL REFERENCES households(id) ON DELETE CASCADE,
            category_id TEXT NOT NULL REFERENCES categories(id) ON DELETE CASCADE,
            month TEXT NOT NULL,
            amount REAL NOT NULL,
            UNIQUE(household_id, category_id, month)
        )",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS incomes (
            id TEXT PRIMARY KEY,
            household_id TEXT NOT NULL REFERENCES households(id) ON DELETE CASCADE,
            user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            description TEXT NOT NULL DEFAULT '',
            amount REAL NOT NULL,
            income_date TEXT NOT NULL,
            created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ','now'))
        )",
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_budgets_month ON budgets(household_id, month)")
        .execute(pool)
        .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_incomes_household ON incomes(household_id)")
        .execute(pool)
        .await?;

    // =====================
    // Migration 008: Audit log
    // =====================
    // No foreign keys: entries must survive deletion of every entity they
    // describe. Purged only by the retention cleanup (DELETE by created_at).

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS audit_logs (
            id TEXT PRIMARY KEY,
            created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ','now')),
            user_id TEXT,
            household_id TEXT,
            action TEXT NOT NULL,
            resource_type TEXT NOT NULL,
            resource_id TEXT,
            old_values TEXT,
            new_values TEXT,
            success INTEGER NOT NULL DEFAULT 1,
            error_message TEXT,
            ip TEXT,
            user_agent TEXT
        )",
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_audit_created ON audit_logs(created_at)")
        .execute(pool)
        .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_audit_household ON audit_logs(household_id)")
        .execute(pool)
        .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_audit_user ON audit_logs(user_id)")
        .execute(pool)
        .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_audit_resource ON audit_logs(resource_type, resource_id)",
    )
    .execute(pool)
    .await?;

    // =====================
    // Migration 009: Password resets
    // =====================

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS password_resets (
            token TEXT PRIMARY KEY,
            user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            expires_at TEXT NOT NULL,
            used_at TEXT
        )",
    )
    .execute(pool)
    .await?;

    tracing::info!("Database migrations completed");
    Ok(())
}
