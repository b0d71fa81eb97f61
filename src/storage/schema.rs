use duckdb::Connection;

/// SQL statement to create the numeric archive table.
///
/// One row per (site, period span, segment, metric). Only base metrics are
/// stored; ratios are derived at query time.
pub const CREATE_ARCHIVE_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS archive_numeric (
    site_id         INTEGER NOT NULL,
    period          VARCHAR NOT NULL,
    date1           DATE NOT NULL,
    date2           DATE NOT NULL,
    segment_hash    VARCHAR NOT NULL DEFAULT '',
    name            VARCHAR NOT NULL,
    value           DOUBLE NOT NULL,
    ts_archived     TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
    PRIMARY KEY (site_id, period, date1, date2, segment_hash, name)
)
";

/// Initialize the database schema.
pub fn init_schema(conn: &Connection) -> Result<(), duckdb::Error> {
    conn.execute_batch(CREATE_ARCHIVE_TABLE)?;
    Ok(())
}
