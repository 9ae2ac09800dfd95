use rusqlite::Connection;
use std::path::Path;

pub const DB_FILE: &str = "schoold.sqlite3";

const SEED_PLANS: [(&str, &str, f64, i64); 3] = [
    ("basic", "Basic", 10.0, 12),
    ("standard", "Standard", 15.0, 12),
    ("quarterly", "Quarterly", 12.0, 3),
];

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join(DB_FILE);
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS academic_sessions(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL UNIQUE COLLATE NOCASE,
            start_date TEXT NOT NULL,
            end_date TEXT NOT NULL,
            is_active INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS classes(
            id TEXT PRIMARY KEY,
            session_id TEXT NOT NULL,
            name TEXT NOT NULL,
            section TEXT NOT NULL,
            created_at TEXT NOT NULL,
            UNIQUE(session_id, name COLLATE NOCASE, section COLLATE NOCASE),
            FOREIGN KEY(session_id) REFERENCES academic_sessions(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_classes_session ON classes(session_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id TEXT PRIMARY KEY,
            class_id TEXT NOT NULL,
            name TEXT NOT NULL,
            admission_no TEXT NOT NULL UNIQUE COLLATE NOCASE,
            roll_no INTEGER NOT NULL,
            father_name TEXT NOT NULL,
            mother_name TEXT NOT NULL,
            parents_phone TEXT NOT NULL,
            email TEXT,
            password_salt TEXT NOT NULL,
            password_hash TEXT NOT NULL,
            created_at TEXT NOT NULL,
            UNIQUE(class_id, roll_no),
            FOREIGN KEY(class_id) REFERENCES classes(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_class ON students(class_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS plans(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            price_per_student_per_month REAL NOT NULL,
            duration_months INTEGER NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS coupons(
            code TEXT PRIMARY KEY COLLATE NOCASE,
            discount_months INTEGER NOT NULL,
            expires_on TEXT,
            active INTEGER NOT NULL DEFAULT 1
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS subscriptions(
            id TEXT PRIMARY KEY,
            plan_id TEXT NOT NULL,
            billable_students INTEGER NOT NULL,
            starts_at TEXT NOT NULL,
            ends_at TEXT NOT NULL,
            created_at TEXT NOT NULL,
            FOREIGN KEY(plan_id) REFERENCES plans(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS payments(
            id TEXT PRIMARY KEY,
            quote_id TEXT NOT NULL,
            plan_id TEXT NOT NULL,
            entered_students INTEGER NOT NULL,
            future_students INTEGER NOT NULL,
            coupon_code TEXT,
            amount REAL NOT NULL,
            preview_json TEXT NOT NULL,
            status TEXT NOT NULL,
            gateway_payment_id TEXT,
            created_at TEXT NOT NULL,
            settled_at TEXT,
            FOREIGN KEY(plan_id) REFERENCES plans(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS invoices(
            id TEXT PRIMARY KEY,
            invoice_no TEXT NOT NULL UNIQUE,
            payment_id TEXT,
            subscription_id TEXT NOT NULL,
            plan_id TEXT NOT NULL,
            billable_students INTEGER NOT NULL,
            original_amount REAL NOT NULL,
            discount_amount REAL NOT NULL,
            paid_amount REAL NOT NULL,
            issued_at TEXT NOT NULL,
            FOREIGN KEY(subscription_id) REFERENCES subscriptions(id)
        )",
        [],
    )?;

    seed_plans(&conn)?;

    Ok(conn)
}

fn seed_plans(conn: &Connection) -> anyhow::Result<()> {
    let count: i64 = conn.query_row("SELECT COUNT(*) FROM plans", [], |r| r.get(0))?;
    if count > 0 {
        return Ok(());
    }
    for (id, name, rate, months) in SEED_PLANS {
        conn.execute(
            "INSERT INTO plans(id, name, price_per_student_per_month, duration_months)
             VALUES(?, ?, ?, ?)",
            (id, name, rate, months),
        )?;
    }
    Ok(())
}
