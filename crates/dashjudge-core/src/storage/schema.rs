pub const DDL: &str = r#"
CREATE TABLE IF NOT EXISTS test_cases (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  key TEXT UNIQUE,
  user_prompt TEXT NOT NULL,
  expected_json TEXT NOT NULL,
  is_active INTEGER NOT NULL DEFAULT 1,
  created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS prompts (
  id TEXT NOT NULL,
  version INTEGER NOT NULL,
  role TEXT NOT NULL,
  template TEXT NOT NULL,
  created_at TEXT NOT NULL,
  PRIMARY KEY (id, version)
);

CREATE TABLE IF NOT EXISTS runs (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  prompt_id TEXT NOT NULL,
  prompt_version INTEGER NOT NULL,
  prompt_sha256 TEXT,
  model_id TEXT NOT NULL,
  judge_prompt_id TEXT,
  judge_model_id TEXT,
  total_test_cases INTEGER NOT NULL,
  completed_test_cases INTEGER NOT NULL DEFAULT 0,
  average_score REAL,
  status TEXT NOT NULL,
  error TEXT,
  cancel_requested INTEGER NOT NULL DEFAULT 0,
  started_at TEXT NOT NULL,
  completed_at TEXT
);

CREATE TABLE IF NOT EXISTS run_test_cases (
  run_id INTEGER NOT NULL REFERENCES runs(id),
  test_case_id INTEGER NOT NULL REFERENCES test_cases(id),
  position INTEGER NOT NULL,
  PRIMARY KEY (run_id, test_case_id)
);

CREATE TABLE IF NOT EXISTS results (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  run_id INTEGER NOT NULL REFERENCES runs(id),
  test_case_id INTEGER NOT NULL REFERENCES test_cases(id),
  generated_json TEXT,
  comparison_score REAL NOT NULL DEFAULT 0,
  comparison_details TEXT NOT NULL,
  judge_model_id TEXT,
  raw_judge_response TEXT,
  latency_ms INTEGER,
  tokens_used INTEGER,
  repair_fixes_json TEXT,
  created_at TEXT NOT NULL,
  UNIQUE (run_id, test_case_id)
);

CREATE INDEX IF NOT EXISTS idx_results_run ON results(run_id);
"#;
