//! SQLite schema definition

/// SQL schema for the metadata database
pub const SCHEMA_SQL: &str = r#"
-- Sources: external listing origins
CREATE TABLE IF NOT EXISTS sources (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL UNIQUE,
    source_type TEXT NOT NULL,
    base_url TEXT NOT NULL,
    trust_score INTEGER NOT NULL,
    enabled INTEGER NOT NULL DEFAULT 1,
    config_json TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

-- Crawl runs: one row per crawl attempt against a source
CREATE TABLE IF NOT EXISTS crawl_runs (
    id TEXT PRIMARY KEY,
    source_id TEXT NOT NULL REFERENCES sources(id),
    started_at TEXT NOT NULL,
    ended_at TEXT,
    status TEXT NOT NULL,
    items_found INTEGER NOT NULL DEFAULT 0,
    items_new INTEGER NOT NULL DEFAULT 0,
    errors_json TEXT
);

-- Snapshots: content-addressed captures of one external listing
CREATE TABLE IF NOT EXISTS snapshots (
    id TEXT PRIMARY KEY,
    source_id TEXT NOT NULL REFERENCES sources(id),
    external_id TEXT NOT NULL,
    source_url TEXT NOT NULL,
    fetched_at TEXT NOT NULL,
    raw_html TEXT,
    raw_json TEXT,
    content_hash TEXT NOT NULL,
    images_enriched INTEGER NOT NULL DEFAULT 0,
    enriched_at TEXT,
    enrichment_error TEXT,
    created_at TEXT NOT NULL,
    UNIQUE(source_id, external_id, content_hash)
);

-- Observed listings: parsed, fingerprinted interpretation of a snapshot
CREATE TABLE IF NOT EXISTS observed_listings (
    id TEXT PRIMARY KEY,
    snapshot_id TEXT NOT NULL UNIQUE REFERENCES snapshots(id),
    source_id TEXT NOT NULL REFERENCES sources(id),
    title TEXT,
    description TEXT,
    price REAL,
    currency TEXT,
    street TEXT,
    city TEXT,
    state TEXT,
    zip TEXT,
    lat REAL,
    lng REAL,
    status TEXT NOT NULL,
    listed_at TEXT,
    geo_hash TEXT,
    address_hash TEXT,
    media_hash TEXT,
    matched_listing_id TEXT,
    confidence_score REAL NOT NULL,
    input_issues_json TEXT,
    observed_at TEXT NOT NULL,
    created_at TEXT NOT NULL
);

-- Fingerprint index: fingerprint value -> observed listing
CREATE TABLE IF NOT EXISTS listing_fingerprints (
    listing_id TEXT NOT NULL REFERENCES observed_listings(id),
    kind TEXT NOT NULL,
    value TEXT NOT NULL,
    PRIMARY KEY(listing_id, kind, value)
);

-- Signals: anomalies raised against observed listings
CREATE TABLE IF NOT EXISTS signals (
    id TEXT PRIMARY KEY,
    signal_type TEXT NOT NULL,
    severity TEXT NOT NULL,
    observed_listing_id TEXT NOT NULL REFERENCES observed_listings(id),
    matched_listing_id TEXT,
    payload_json TEXT NOT NULL,
    status TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    updated_by TEXT
);

-- Signal transitions: review audit trail
CREATE TABLE IF NOT EXISTS signal_transitions (
    id TEXT PRIMARY KEY,
    signal_id TEXT NOT NULL REFERENCES signals(id),
    from_status TEXT NOT NULL,
    to_status TEXT NOT NULL,
    actor_id TEXT NOT NULL,
    created_at TEXT NOT NULL
);

-- Indexes for performance
CREATE INDEX IF NOT EXISTS idx_runs_source ON crawl_runs(source_id);
CREATE INDEX IF NOT EXISTS idx_snapshots_key ON snapshots(source_id, external_id);
CREATE INDEX IF NOT EXISTS idx_listings_source ON observed_listings(source_id);
CREATE INDEX IF NOT EXISTS idx_fingerprints_value ON listing_fingerprints(kind, value);
CREATE INDEX IF NOT EXISTS idx_signals_listing ON signals(observed_listing_id, signal_type);
CREATE INDEX IF NOT EXISTS idx_signals_status ON signals(status);
CREATE INDEX IF NOT EXISTS idx_transitions_signal ON signal_transitions(signal_id);
"#;
